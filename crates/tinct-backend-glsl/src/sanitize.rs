//! The GLSL lowering pipeline.

use log::debug;
use tinct_backend_core::BackendError;
use tinct_ir::Module;
use tinct_transform::{
    AddBlockAttribute, AddEmptyEntryPoint, BindingRemapper, BitsLevel, BuiltinPolyfill,
    BuiltinPolyfillConfig, CanonicalizeEntryPointIO, CanonicalizeEntryPointIOConfig,
    ClampFragDepth, ClampFragDepthConfig, DataMap, DemoteToHelper, DirectVariableAccess,
    DirectVariableAccessConfig, Level, Manager, MultiplanarExternalTexture, OffsetFirstIndex,
    OffsetFirstIndexConfig, PreservePadding, PromoteSideEffectsToDecl, RemoveContinueInSwitch,
    Renamer, RenamerConfig, Robustness, RobustnessConfig, ShaderStyle, SimplifyPointers,
    SingleEntryPoint, Std140, SubstituteOverride, Target, Unshadow, ZeroInitWorkgroupMemory,
};

use crate::{
    CombineSamplers, Options, PadStructs, Texture1DTo2D, TextureBuiltinsFromUniform,
};

/// The module ready for printing, and what the passes published.
#[derive(Debug)]
pub struct SanitizedResult {
    pub module: Module,
    pub data: DataMap,
}

fn polyfills(options: &Options) -> BuiltinPolyfillConfig {
    BuiltinPolyfillConfig {
        acosh: Level::RangeCheck,
        atanh: Level::RangeCheck,
        // The printer masks shift amounts itself.
        bitshift_modulo: false,
        count_leading_zeros: true,
        count_trailing_zeros: true,
        dot_4x8_packed: true,
        extract_bits: BitsLevel::ClampParameters,
        first_leading_bit: true,
        first_trailing_bit: true,
        insert_bits: BitsLevel::ClampParameters,
        int_div_mod: !options.disable_polyfill_integer_div_mod,
        pack_4x8: true,
        saturate: true,
        ..BuiltinPolyfillConfig::default()
    }
}

fn inputs(options: &Options) -> DataMap {
    let mut inputs = DataMap::new();
    options.common.populate(&mut inputs);
    inputs
        .insert(RobustnessConfig::default())
        .insert(polyfills(options))
        .insert(CanonicalizeEntryPointIOConfig::new(ShaderStyle::Glsl))
        .insert(DirectVariableAccessConfig {
            transform_private: true,
            transform_function: false,
        })
        .insert(RenamerConfig {
            target: Target::GlslKeywords,
        })
        .insert(OffsetFirstIndexConfig {
            first_vertex_offset: options.first_vertex_offset,
            first_instance_offset: options.first_instance_offset,
        });
    if let Some(range) = options.depth_range_offsets {
        inputs.insert(ClampFragDepthConfig {
            min_depth_offset: range.min,
            max_depth_offset: range.max,
        });
    }
    if let Some(cfg) = options.texture_builtins_from_uniform {
        inputs.insert(cfg);
    }
    inputs
}

fn pipeline(options: &Options) -> Result<Manager, BackendError> {
    let mut manager = Manager::new();
    if options.common.entry_point.is_some() {
        manager.add(SingleEntryPoint)?;
    }
    manager.add(SubstituteOverride)?;
    manager.add(PreservePadding)?;
    manager.add(Unshadow)?;
    manager.add(PromoteSideEffectsToDecl)?;
    if !options.common.disable_robustness {
        manager.add(Robustness)?;
    }
    if !options.common.disable_workgroup_init {
        manager.add(ZeroInitWorkgroupMemory)?;
    }
    manager.add(TextureBuiltinsFromUniform)?;
    manager.add(BindingRemapper)?;
    manager.add(MultiplanarExternalTexture)?;
    manager.add(AddBlockAttribute)?;
    manager.add(OffsetFirstIndex)?;
    manager.add(ClampFragDepth)?;
    manager.add(CanonicalizeEntryPointIO)?;
    manager.add(DemoteToHelper)?;
    manager.add(BuiltinPolyfill)?;
    manager.add(DirectVariableAccess)?;
    manager.add(CombineSamplers)?;
    manager.add(PadStructs)?;
    manager.add(RemoveContinueInSwitch)?;
    manager.add(AddEmptyEntryPoint)?;
    manager.add(Std140)?;
    manager.add(Texture1DTo2D)?;
    manager.add(SimplifyPointers)?;
    manager.add(Renamer)?;
    Ok(manager)
}

/// Runs the GLSL pipeline over a copy of `module`.
pub fn sanitize(module: &Module, options: &Options) -> Result<SanitizedResult, BackendError> {
    let manager = pipeline(options)?;
    debug!("GLSL sanitizer: {}", manager.names().join(", "));
    let output = manager.run(module, &inputs(options))?;
    Ok(SanitizedResult {
        module: output.module,
        data: output.data,
    })
}
