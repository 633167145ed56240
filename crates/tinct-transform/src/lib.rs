//! IR-to-IR transforms for tinct.
//!
//! Provides a [`Transform`] trait, a [`Manager`] that runs an ordered list
//! of transforms with validation between steps, a type-indexed
//! [`DataMap`] for pass configuration and results, and the catalogue of
//! lowering passes the backends assemble into their sanitize pipelines.

mod add_block_attribute;
mod add_empty_entry_point;
mod array_length_from_uniform;
mod binding_remapper;
mod builtin_polyfill;
mod canonicalize_entry_point_io;
mod clamp_frag_depth;
mod data;
mod demote_to_helper;
mod direct_variable_access;
mod error;
mod multiplanar_external_texture;
mod num_workgroups_from_uniform;
mod offset_first_index;
mod preserve_padding;
mod promote_side_effects;
pub mod push_constants;
mod remove_continue_in_switch;
mod renamer;
mod robustness;
mod simplify_pointers;
mod single_entry_point;
mod std140;
mod substitute_override;
mod unshadow;
pub mod util;
mod var_for_dynamic_index;
mod zero_init_workgroup_memory;

pub use add_block_attribute::AddBlockAttribute;
pub use add_empty_entry_point::AddEmptyEntryPoint;
pub use array_length_from_uniform::{
    ArrayLengthFromUniform, ArrayLengthFromUniformConfig, ArrayLengthFromUniformResult,
};
pub use binding_remapper::{BindingRemapper, BindingRemapperConfig};
pub use builtin_polyfill::{BitsLevel, BuiltinPolyfill, BuiltinPolyfillConfig, Level};
pub use canonicalize_entry_point_io::{
    CanonicalizeEntryPointIO, CanonicalizeEntryPointIOConfig, ShaderStyle,
};
pub use clamp_frag_depth::{ClampFragDepth, ClampFragDepthConfig};
pub use data::DataMap;
pub use demote_to_helper::DemoteToHelper;
pub use direct_variable_access::{DirectVariableAccess, DirectVariableAccessConfig};
pub use error::TransformError;
pub use multiplanar_external_texture::{
    ExternalTextureBindings, MultiplanarExternalTexture, MultiplanarExternalTextureConfig,
};
pub use num_workgroups_from_uniform::{NumWorkgroupsFromUniform, NumWorkgroupsFromUniformConfig};
pub use offset_first_index::{OffsetFirstIndex, OffsetFirstIndexConfig};
pub use preserve_padding::PreservePadding;
pub use promote_side_effects::PromoteSideEffectsToDecl;
pub use remove_continue_in_switch::RemoveContinueInSwitch;
pub use renamer::{Renamer, RenamerConfig, RenamerData, Target};
pub use robustness::{Robustness, RobustnessConfig};
pub use simplify_pointers::SimplifyPointers;
pub use single_entry_point::{SingleEntryPoint, SingleEntryPointConfig};
pub use std140::Std140;
pub use substitute_override::{SubstituteOverride, SubstituteOverrideConfig};
pub use unshadow::Unshadow;
pub use var_for_dynamic_index::VarForDynamicIndex;
pub use zero_init_workgroup_memory::ZeroInitWorkgroupMemory;

use std::fmt::Debug;

use log::{debug, warn};
use tinct_ir::Module;

/// A transform that rewrites a module into a new module.
///
/// Transforms never mutate their input: `apply` returns a fresh module, so
/// a failed pipeline leaves the caller's module untouched.
pub trait Transform: Debug {
    /// Name used in logs, errors and ordering constraints.
    fn name(&self) -> &'static str;

    /// Returns `false` if running the transform would not change `module`.
    fn should_run(&self, _module: &Module, _inputs: &DataMap) -> bool {
        true
    }

    /// Rewrites `module`. Configuration is read from `inputs`; results for
    /// later consumers are stored in `outputs`.
    fn apply(
        &self,
        module: &Module,
        inputs: &DataMap,
        outputs: &mut DataMap,
    ) -> Result<Module, TransformError>;

    /// Transforms that must run before this one when both are present.
    fn requires(&self) -> &'static [&'static str] {
        &[]
    }

    /// Transforms that must not run before this one.
    fn conflicts_before(&self) -> &'static [&'static str] {
        &[]
    }
}

/// The result of running a [`Manager`].
#[derive(Debug)]
pub struct Output {
    pub module: Module,
    /// Results published by the passes.
    pub data: DataMap,
}

/// Runs transforms in registration order.
#[derive(Debug)]
pub struct Manager {
    passes: Vec<Box<dyn Transform>>,
    validate: bool,
}

impl Default for Manager {
    fn default() -> Self {
        Self::new()
    }
}

impl Manager {
    /// Creates an empty manager that validates after every pass.
    pub fn new() -> Self {
        Self {
            passes: Vec::new(),
            validate: true,
        }
    }

    /// Turns validation between passes on or off.
    pub fn with_validation(mut self, validate: bool) -> Self {
        self.validate = validate;
        self
    }

    /// Appends a pass, rejecting registrations that break an ordering
    /// constraint declared by the pass or by one registered earlier.
    pub fn add(&mut self, pass: impl Transform + 'static) -> Result<(), TransformError> {
        self.add_boxed(Box::new(pass))
    }

    pub fn add_boxed(&mut self, pass: Box<dyn Transform>) -> Result<(), TransformError> {
        let name = pass.name();
        for earlier in &self.passes {
            if earlier.requires().contains(&name) || pass.conflicts_before().contains(&earlier.name())
            {
                return Err(TransformError::Ordering {
                    pass: name,
                    before: earlier.name(),
                });
            }
        }
        self.passes.push(pass);
        Ok(())
    }

    /// Names of the registered passes, in order.
    pub fn names(&self) -> Vec<&'static str> {
        self.passes.iter().map(|p| p.name()).collect()
    }

    pub fn is_empty(&self) -> bool {
        self.passes.is_empty()
    }

    /// Runs every pass in order on a copy of `module`.
    pub fn run(&self, module: &Module, inputs: &DataMap) -> Result<Output, TransformError> {
        let mut outputs = DataMap::new();
        let mut current: Option<Module> = None;
        for pass in &self.passes {
            let name = pass.name();
            let input = current.as_ref().unwrap_or(module);
            if !pass.should_run(input, inputs) {
                debug!("transform '{name}' skipped (should_run = false)");
                continue;
            }
            debug!("running transform '{name}'");
            let out = pass.apply(input, inputs, &mut outputs)?;
            if self.validate {
                if let Err(source) = tinct_ir::validate(&out) {
                    warn!("transform '{name}' produced invalid IR: {source}");
                    return Err(TransformError::Invalid { pass: name, source });
                }
            }
            current = Some(out);
        }
        Ok(Output {
            module: current.unwrap_or_else(|| module.clone()),
            data: outputs,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{
        AddressSpace, Expression, Function, FunctionArgument, GlobalVariable, Scalar, ShaderStage,
        Statement, StorageAccess, VectorSize,
    };

    #[derive(Debug)]
    struct Rename(&'static str, &'static str);

    impl Transform for Rename {
        fn name(&self) -> &'static str {
            self.0
        }

        fn apply(
            &self,
            module: &Module,
            _inputs: &DataMap,
            outputs: &mut DataMap,
        ) -> Result<Module, TransformError> {
            let mut out = module.clone();
            for (_, f) in out.functions.iter_mut() {
                f.name = format!("{}{}", f.name, self.1);
            }
            outputs.insert(self.0.to_string());
            Ok(out)
        }
    }

    fn module_with_main() -> Module {
        let mut module = Module::default();
        let mut main = Function::new("main");
        main.entry_point = Some(tinct_ir::EntryPoint::graphics(ShaderStage::Fragment));
        module.functions.append(main);
        module
    }

    #[test]
    fn empty_manager_copies_input() {
        let module = module_with_main();
        let out = Manager::new().run(&module, &DataMap::new()).unwrap();
        assert_eq!(out.module, module);
        assert!(out.data.is_empty());
    }

    #[test]
    fn passes_run_in_order_without_touching_input() {
        let module = module_with_main();
        let mut manager = Manager::new();
        manager.add(Rename("A", "_a")).unwrap();
        manager.add(Rename("B", "_b")).unwrap();
        let out = manager.run(&module, &DataMap::new()).unwrap();
        assert!(out.module.function_by_name("main_a_b").is_some());
        assert!(module.function_by_name("main").is_some());
        assert_eq!(out.data.get::<String>().map(String::as_str), Some("B"));
    }

    #[test]
    fn ordering_constraints_are_checked_at_registration() {
        let mut manager = Manager::new();
        manager.add(DirectVariableAccess).unwrap();
        let err = manager.add(PreservePadding).unwrap_err();
        assert!(matches!(
            err,
            TransformError::Ordering {
                pass: "PreservePadding",
                before: "DirectVariableAccess"
            }
        ));

        let mut manager = Manager::new();
        manager.add(PreservePadding).unwrap();
        manager.add(Unshadow).unwrap();
        manager.add(DirectVariableAccess).unwrap();
        assert_eq!(
            manager.names(),
            ["PreservePadding", "Unshadow", "DirectVariableAccess"]
        );
    }

    #[test]
    fn robustness_is_registered_before_polyfills_and_io() {
        let mut manager = Manager::new();
        manager.add(PromoteSideEffectsToDecl).unwrap();
        manager.add(BuiltinPolyfill).unwrap();
        let err = manager.add(Robustness).unwrap_err();
        assert!(matches!(
            err,
            TransformError::Ordering {
                pass: "Robustness",
                before: "BuiltinPolyfill"
            }
        ));

        let mut manager = Manager::new();
        manager.add(CanonicalizeEntryPointIO).unwrap();
        assert!(matches!(
            manager.add(Robustness),
            Err(TransformError::Ordering {
                pass: "Robustness",
                before: "CanonicalizeEntryPointIO"
            })
        ));

        let mut manager = Manager::new();
        manager.add(PromoteSideEffectsToDecl).unwrap();
        manager.add(Robustness).unwrap();
        manager.add(BuiltinPolyfill).unwrap();
        manager.add(CanonicalizeEntryPointIO).unwrap();
    }

    /// `struct S { a: f32, b: vec3<f32> }`
    /// `var<storage, read_write> buf: S;`
    /// `fn set(p: ptr<storage, S, read_write>) { *p = S(); }`
    /// `@compute fn main() { set(&buf); }`
    fn padded_store_through_pointer() -> Module {
        let mut module = Module::default();
        let f32_ty = module.scalar_type(Scalar::F32);
        let vec3 = module.vector_type(VectorSize::Tri, Scalar::F32);
        let s = module.struct_type("S", &[("a", f32_ty), ("b", vec3)]);
        let buf = module.global_variables.append(
            GlobalVariable::new("buf", AddressSpace::Storage, s)
                .with_binding(0, 0)
                .with_access(StorageAccess::LOAD_STORE),
        );
        let ptr = module.pointer_type(s, AddressSpace::Storage, StorageAccess::LOAD_STORE);
        let mut set = Function::new("set");
        set.arguments.push(FunctionArgument {
            name: "p".into(),
            ty: ptr,
            binding: None,
        });
        set.body = vec![Statement::store(
            Expression::FunctionArgument(0),
            Expression::ZeroValue(s),
        )];
        let set = module.functions.append(set);
        let mut main = Function::new("main");
        main.entry_point = Some(tinct_ir::EntryPoint::compute(1, 1, 1));
        main.body = vec![Statement::Call(Expression::call(
            set,
            vec![Expression::GlobalVariable(buf)],
        ))];
        module.functions.append(main);
        module
    }

    #[test]
    fn padding_then_pointer_specialization_pipeline() {
        let module = padded_store_through_pointer();
        let mut manager = Manager::new();
        manager.add(PreservePadding).unwrap();
        manager.add(Unshadow).unwrap();
        manager.add(DirectVariableAccess).unwrap();
        let out = manager.run(&module, &DataMap::new()).unwrap();

        assert!(out.module.function_by_name("set").is_none());
        assert!(out.module.function_by_name("assign_and_preserve_padding").is_none());
        assert!(out.module.function_by_name("set_buf").is_some());
        assert!(
            out.module
                .function_by_name("assign_and_preserve_padding_buf")
                .is_some()
        );
        let text = tinct_ir::dump_module(&out.module);
        assert!(text.contains("assign_and_preserve_padding_buf(S());"), "{text}");
        assert!(text.contains("set_buf();"), "{text}");
        assert!(!PreservePadding.should_run(&out.module, &DataMap::new()));
        assert!(!DirectVariableAccess.should_run(&out.module, &DataMap::new()));
    }

    #[test]
    fn invalid_output_is_reported_against_the_pass() {
        #[derive(Debug)]
        struct Breaker;
        impl Transform for Breaker {
            fn name(&self) -> &'static str {
                "Breaker"
            }
            fn apply(
                &self,
                module: &Module,
                _: &DataMap,
                _: &mut DataMap,
            ) -> Result<Module, TransformError> {
                let mut out = module.clone();
                out.functions.append(Function::new("main"));
                Ok(out)
            }
        }
        let mut manager = Manager::new();
        manager.add(Breaker).unwrap();
        let err = manager.run(&module_with_main(), &DataMap::new()).unwrap_err();
        assert!(matches!(err, TransformError::Invalid { pass: "Breaker", .. }));
        assert!(err.is_ice());
    }
}
