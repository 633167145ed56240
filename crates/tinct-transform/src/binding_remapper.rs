//! Rewrites resource binding points and storage access modes.

use std::collections::{HashMap, HashSet};

use tinct_ir::{AddressSpace, BindingPoint, Module, StorageAccess};

use crate::{DataMap, Transform, TransformError};

/// Remapping tables, keyed by the binding point in the source module.
#[derive(Clone, Debug, Default)]
pub struct BindingRemapperConfig {
    pub binding_points: HashMap<BindingPoint, BindingPoint>,
    pub access_controls: HashMap<BindingPoint, StorageAccess>,
    /// Allow two resources of one entry point to share a binding point
    /// after remapping.
    pub allow_collisions: bool,
}

#[derive(Debug)]
pub struct BindingRemapper;

const NAME: &str = "BindingRemapper";

impl Transform for BindingRemapper {
    fn name(&self) -> &'static str {
        NAME
    }

    fn should_run(&self, _module: &Module, inputs: &DataMap) -> bool {
        inputs
            .get::<BindingRemapperConfig>()
            .is_some_and(|c| !c.binding_points.is_empty() || !c.access_controls.is_empty())
    }

    fn apply(
        &self,
        module: &Module,
        inputs: &DataMap,
        _outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let cfg = inputs
            .get::<BindingRemapperConfig>()
            .ok_or_else(|| TransformError::missing(NAME, "BindingRemapperConfig"))?;
        let mut out = module.clone();
        for (_, var) in out.global_variables.iter_mut() {
            let Some(bp) = var.binding else {
                continue;
            };
            if let Some(&access) = cfg.access_controls.get(&bp) {
                if var.space != AddressSpace::Storage {
                    return Err(TransformError::user(
                        NAME,
                        format!("cannot apply access control to '{}', which is not in storage", var.name),
                    ));
                }
                var.access = access;
            }
            if let Some(&to) = cfg.binding_points.get(&bp) {
                var.binding = Some(to);
            }
        }

        if !cfg.allow_collisions {
            for (ep, f) in out.entry_points() {
                let mut seen = HashSet::new();
                for g in out.globals_used_by(ep) {
                    if let Some(bp) = out.global_variables[g].binding {
                        if !seen.insert(bp) {
                            return Err(TransformError::user(
                                NAME,
                                format!(
                                    "entry point '{}' uses binding point ({}, {}) more than once",
                                    f.name, bp.group, bp.binding
                                ),
                            ));
                        }
                    }
                }
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{EntryPoint, Expression, Function, GlobalVariable, Scalar, Statement};

    fn module() -> Module {
        let mut module = Module::default();
        let u32_ty = module.scalar_type(Scalar::U32);
        let a = module.global_variables.append(
            GlobalVariable::new("a", AddressSpace::Storage, u32_ty)
                .with_binding(0, 0)
                .with_access(StorageAccess::LOAD_STORE),
        );
        let b = module
            .global_variables
            .append(GlobalVariable::new("b", AddressSpace::Uniform, u32_ty).with_binding(0, 1));
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::compute(1, 1, 1));
        main.body = vec![Statement::store(
            Expression::GlobalVariable(a),
            Expression::load(Expression::GlobalVariable(b)),
        )];
        module.functions.append(main);
        module
    }

    #[test]
    fn binding_points_and_access_are_remapped() {
        let mut cfg = BindingRemapperConfig::default();
        cfg.binding_points
            .insert(BindingPoint::new(0, 1), BindingPoint::new(2, 5));
        cfg.access_controls
            .insert(BindingPoint::new(0, 0), StorageAccess::LOAD);
        let mut inputs = DataMap::new();
        inputs.insert(cfg);
        let out = BindingRemapper
            .apply(&module(), &inputs, &mut DataMap::new())
            .unwrap();
        let a = out.global_by_name("a").unwrap();
        let b = out.global_by_name("b").unwrap();
        assert_eq!(out.global_variables[a].access, StorageAccess::LOAD);
        assert_eq!(
            out.global_variables[b].binding,
            Some(BindingPoint::new(2, 5))
        );
    }

    #[test]
    fn collisions_are_rejected_unless_allowed() {
        let mut cfg = BindingRemapperConfig::default();
        cfg.binding_points
            .insert(BindingPoint::new(0, 1), BindingPoint::new(0, 0));
        let mut inputs = DataMap::new();
        inputs.insert(cfg.clone());
        let err = BindingRemapper
            .apply(&module(), &inputs, &mut DataMap::new())
            .unwrap_err();
        assert!(matches!(err, TransformError::User { .. }));

        cfg.allow_collisions = true;
        inputs.insert(cfg);
        assert!(
            BindingRemapper
                .apply(&module(), &inputs, &mut DataMap::new())
                .is_ok()
        );
    }
}
