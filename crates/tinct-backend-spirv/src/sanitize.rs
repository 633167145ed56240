//! The SPIR-V lowering pipeline.

use log::debug;
use tinct_backend_core::BackendError;
use tinct_ir::Module;
use tinct_transform::{
    AddBlockAttribute, AddEmptyEntryPoint, BindingRemapper, BitsLevel, BuiltinPolyfill,
    BuiltinPolyfillConfig, CanonicalizeEntryPointIO, CanonicalizeEntryPointIOConfig, DataMap,
    DemoteToHelper, DirectVariableAccess, DirectVariableAccessConfig, Level, Manager,
    MultiplanarExternalTexture, PreservePadding, PromoteSideEffectsToDecl, RemoveContinueInSwitch,
    Robustness, RobustnessConfig, ShaderStyle, SimplifyPointers, SingleEntryPoint,
    SubstituteOverride, Unshadow, VarForDynamicIndex, ZeroInitWorkgroupMemory,
};

use crate::Options;

/// The module ready for lowering, and what the passes published.
#[derive(Debug)]
pub struct SanitizedResult {
    pub module: Module,
    pub data: DataMap,
}

fn polyfills() -> BuiltinPolyfillConfig {
    BuiltinPolyfillConfig {
        acosh: Level::RangeCheck,
        atanh: Level::RangeCheck,
        bitshift_modulo: true,
        clamp_int: true,
        count_leading_zeros: true,
        count_trailing_zeros: true,
        dot_4x8_packed: true,
        extract_bits: BitsLevel::ClampParameters,
        first_leading_bit: true,
        first_trailing_bit: true,
        insert_bits: BitsLevel::ClampParameters,
        int_div_mod: true,
        pack_4x8: true,
        // FClamp does it.
        saturate: false,
    }
}

fn inputs(options: &Options) -> DataMap {
    let mut inputs = DataMap::new();
    options.common.populate(&mut inputs);
    let mut io = CanonicalizeEntryPointIOConfig::new(ShaderStyle::Spirv);
    io.emit_vertex_point_size = options.emit_vertex_point_size;
    inputs
        .insert(RobustnessConfig {
            disable_image: options.disable_image_robustness,
            ..RobustnessConfig::default()
        })
        .insert(polyfills())
        .insert(io)
        .insert(DirectVariableAccessConfig {
            transform_private: true,
            transform_function: true,
        });
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
    manager.add(BindingRemapper)?;
    manager.add(MultiplanarExternalTexture)?;
    manager.add(BuiltinPolyfill)?;
    // With the extension, workgroup variables get a null initializer instead.
    if !options.common.disable_workgroup_init
        && !options.use_zero_initialize_workgroup_memory_extension
    {
        manager.add(ZeroInitWorkgroupMemory)?;
    }
    manager.add(CanonicalizeEntryPointIO)?;
    manager.add(RemoveContinueInSwitch)?;
    manager.add(DemoteToHelper)?;
    manager.add(DirectVariableAccess)?;
    manager.add(SimplifyPointers)?;
    manager.add(VarForDynamicIndex)?;
    manager.add(AddBlockAttribute)?;
    manager.add(AddEmptyEntryPoint)?;
    Ok(manager)
}

/// Runs the SPIR-V pipeline over a copy of `module`.
pub fn sanitize(module: &Module, options: &Options) -> Result<SanitizedResult, BackendError> {
    let manager = pipeline(options)?;
    debug!("SPIR-V sanitizer: {}", manager.names().join(", "));
    let output = manager.run(module, &inputs(options))?;
    Ok(SanitizedResult {
        module: output.module,
        data: output.data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pointer_parameters_are_removed_before_block_wrapping() {
        let names = pipeline(&Options::default()).unwrap().names();
        let pos = |n: &str| names.iter().position(|x| *x == n).unwrap();
        assert!(pos("CanonicalizeEntryPointIO") < pos("DirectVariableAccess"));
        assert!(pos("DirectVariableAccess") < pos("AddBlockAttribute"));
        assert!(pos("SimplifyPointers") < pos("VarForDynamicIndex"));
        assert_eq!(names.last(), Some(&"AddEmptyEntryPoint"));
        assert!(!names.contains(&"Renamer"));
    }

    #[test]
    fn zero_init_extension_replaces_the_pass() {
        let options = Options {
            use_zero_initialize_workgroup_memory_extension: true,
            ..Options::default()
        };
        let names = pipeline(&options).unwrap().names();
        assert!(!names.contains(&"ZeroInitWorkgroupMemory"));
        let names = pipeline(&Options::default()).unwrap().names();
        assert!(names.contains(&"ZeroInitWorkgroupMemory"));
    }

    #[test]
    fn saturate_is_native() {
        let config = polyfills();
        assert!(!config.saturate);
        assert!(config.first_leading_bit);
        assert!(config.int_div_mod);
    }
}
