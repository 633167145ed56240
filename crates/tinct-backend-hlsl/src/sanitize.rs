//! The HLSL lowering pipeline.

use log::debug;
use tinct_backend_core::BackendError;
use tinct_ir::Module;
use tinct_transform::{
    AddEmptyEntryPoint, ArrayLengthFromUniform, BindingRemapper, BitsLevel, BuiltinPolyfill,
    BuiltinPolyfillConfig, CanonicalizeEntryPointIO, CanonicalizeEntryPointIOConfig, DataMap,
    DemoteToHelper, DirectVariableAccess, DirectVariableAccessConfig, Level, Manager,
    MultiplanarExternalTexture, NumWorkgroupsFromUniform, NumWorkgroupsFromUniformConfig,
    PromoteSideEffectsToDecl, RemoveContinueInSwitch, Renamer, RenamerConfig, Robustness,
    RobustnessConfig, ShaderStyle, SimplifyPointers, SingleEntryPoint, SubstituteOverride, Target,
    Unshadow, VarForDynamicIndex, ZeroInitWorkgroupMemory,
};

use crate::Options;

/// The module ready for printing, and what the passes published.
#[derive(Debug)]
pub struct SanitizedResult {
    pub module: Module,
    pub data: DataMap,
}

fn polyfills(options: &Options) -> BuiltinPolyfillConfig {
    BuiltinPolyfillConfig {
        acosh: Level::Full,
        atanh: Level::Full,
        bitshift_modulo: true,
        clamp_int: false,
        count_leading_zeros: true,
        count_trailing_zeros: true,
        dot_4x8_packed: true,
        extract_bits: BitsLevel::Full,
        first_leading_bit: true,
        first_trailing_bit: true,
        insert_bits: BitsLevel::Full,
        int_div_mod: !options.disable_polyfill_integer_div_mod,
        pack_4x8: true,
        // HLSL has a native saturate.
        saturate: false,
    }
}

fn inputs(options: &Options) -> DataMap {
    let mut inputs = DataMap::new();
    options.common.populate(&mut inputs);
    inputs
        .insert(RobustnessConfig::default())
        .insert(polyfills(options))
        .insert(CanonicalizeEntryPointIOConfig::new(ShaderStyle::Hlsl))
        .insert(NumWorkgroupsFromUniformConfig {
            ubo_binding: options.root_constant_binding_point,
        })
        .insert(DirectVariableAccessConfig {
            transform_private: true,
            transform_function: false,
        })
        .insert(RenamerConfig {
            target: Target::HlslKeywords,
        });
    if let Some(cfg) = &options.array_length_from_uniform {
        inputs.insert(cfg.clone());
    }
    inputs
}

fn pipeline(options: &Options) -> Result<Manager, BackendError> {
    let mut manager = Manager::new();
    if options.common.entry_point.is_some() {
        manager.add(SingleEntryPoint)?;
    }
    manager.add(SubstituteOverride)?;
    manager.add(Unshadow)?;
    manager.add(SimplifyPointers)?;
    manager.add(PromoteSideEffectsToDecl)?;
    if !options.common.disable_robustness {
        manager.add(Robustness)?;
    }
    manager.add(BuiltinPolyfill)?;
    manager.add(MultiplanarExternalTexture)?;
    if !options.common.disable_workgroup_init {
        manager.add(ZeroInitWorkgroupMemory)?;
    }
    manager.add(CanonicalizeEntryPointIO)?;
    manager.add(NumWorkgroupsFromUniform)?;
    manager.add(DemoteToHelper)?;
    manager.add(BindingRemapper)?;
    if options.array_length_from_uniform.is_some() {
        manager.add(ArrayLengthFromUniform)?;
    }
    manager.add(VarForDynamicIndex)?;
    manager.add(RemoveContinueInSwitch)?;
    manager.add(AddEmptyEntryPoint)?;
    manager.add(DirectVariableAccess)?;
    // Pointer lets introduced by the specialized callees.
    manager.add(SimplifyPointers)?;
    manager.add(Renamer)?;
    Ok(manager)
}

/// Runs the HLSL pipeline over a copy of `module`.
pub fn sanitize(module: &Module, options: &Options) -> Result<SanitizedResult, BackendError> {
    let manager = pipeline(options)?;
    debug!("HLSL sanitizer: {}", manager.names().join(", "));
    let output = manager.run(module, &inputs(options))?;
    Ok(SanitizedResult {
        module: output.module,
        data: output.data,
    })
}
