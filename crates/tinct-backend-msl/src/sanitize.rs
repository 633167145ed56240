//! The MSL lowering pipeline.

use log::debug;
use tinct_backend_core::BackendError;
use tinct_ir::Module;
use tinct_transform::{
    ArrayLengthFromUniform, ArrayLengthFromUniformConfig, BindingRemapper, BitsLevel,
    BuiltinPolyfill, BuiltinPolyfillConfig, CanonicalizeEntryPointIO,
    CanonicalizeEntryPointIOConfig, DataMap, DemoteToHelper, Level, Manager,
    MultiplanarExternalTexture, PreservePadding, PromoteSideEffectsToDecl, RemoveContinueInSwitch,
    Renamer, RenamerConfig, Robustness, RobustnessConfig, ShaderStyle, SimplifyPointers,
    SingleEntryPoint, SubstituteOverride, Target, Unshadow, ZeroInitWorkgroupMemory,
};

use crate::Options;
use crate::module_scope_vars::ModuleScopeVarToEntryPointParam;

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
        bitshift_modulo: true,
        clamp_int: true,
        // clz and ctz are native.
        count_leading_zeros: false,
        count_trailing_zeros: false,
        dot_4x8_packed: true,
        extract_bits: BitsLevel::ClampParameters,
        first_leading_bit: true,
        first_trailing_bit: true,
        insert_bits: BitsLevel::ClampParameters,
        int_div_mod: !options.disable_polyfill_integer_div_mod,
        pack_4x8: true,
        saturate: false,
    }
}

fn inputs(options: &Options, alfu: &ArrayLengthFromUniformConfig) -> DataMap {
    let mut inputs = DataMap::new();
    options.common.populate(&mut inputs);
    let mut io = CanonicalizeEntryPointIOConfig::new(ShaderStyle::Msl);
    io.fixed_sample_mask = options.fixed_sample_mask;
    io.emit_vertex_point_size = options.emit_vertex_point_size;
    inputs
        .insert(RobustnessConfig::default())
        .insert(polyfills(options))
        .insert(io)
        .insert(alfu.clone())
        .insert(RenamerConfig {
            target: Target::MslKeywords,
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
    if !options.common.disable_workgroup_init {
        manager.add(ZeroInitWorkgroupMemory)?;
    }
    manager.add(CanonicalizeEntryPointIO)?;
    manager.add(RemoveContinueInSwitch)?;
    manager.add(DemoteToHelper)?;
    manager.add(ArrayLengthFromUniform)?;
    manager.add(SimplifyPointers)?;
    manager.add(ModuleScopeVarToEntryPointParam)?;
    manager.add(Renamer)?;
    Ok(manager)
}

/// Runs the MSL pipeline over a copy of `module`. `alfu` says where
/// runtime array lengths are read from.
pub fn sanitize(
    module: &Module,
    options: &Options,
    alfu: &ArrayLengthFromUniformConfig,
) -> Result<SanitizedResult, BackendError> {
    let manager = pipeline(options)?;
    debug!("MSL sanitizer: {}", manager.names().join(", "));
    let output = manager.run(module, &inputs(options, alfu))?;
    Ok(SanitizedResult {
        module: output.module,
        data: output.data,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn module_scope_vars_are_threaded_last() {
        let names = pipeline(&Options::default()).unwrap().names();
        let pos = |n: &str| names.iter().position(|x| *x == n).unwrap();
        assert!(pos("CanonicalizeEntryPointIO") < pos("ModuleScopeVarToEntryPointParam"));
        assert!(pos("ArrayLengthFromUniform") < pos("ModuleScopeVarToEntryPointParam"));
        assert!(pos("BindingRemapper") < pos("ArrayLengthFromUniform"));
        assert_eq!(names.last(), Some(&"Renamer"));
        assert!(!names.contains(&"SingleEntryPoint"));
    }

    #[test]
    fn bit_counting_is_native() {
        let config = polyfills(&Options::default());
        assert!(!config.count_leading_zeros);
        assert!(!config.count_trailing_zeros);
        assert_eq!(config.extract_bits, BitsLevel::ClampParameters);
        assert_eq!(config.acosh, Level::RangeCheck);
    }
}
