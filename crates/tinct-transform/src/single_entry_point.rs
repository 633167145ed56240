//! Strips a module down to one entry point and what it references.

use std::collections::BTreeSet;

use tinct_ir::{Expression, Module};

use crate::{DataMap, Transform, TransformError};

/// Names the entry point [`SingleEntryPoint`] keeps.
#[derive(Clone, Debug)]
pub struct SingleEntryPointConfig {
    pub entry_point: String,
}

impl SingleEntryPointConfig {
    pub fn new(entry_point: impl Into<String>) -> Self {
        Self {
            entry_point: entry_point.into(),
        }
    }
}

/// Removes every entry point except the configured one, along with the
/// functions, module-scope variables and overrides it does not reach.
#[derive(Debug)]
pub struct SingleEntryPoint;

const NAME: &str = "SingleEntryPoint";

impl Transform for SingleEntryPoint {
    fn name(&self) -> &'static str {
        NAME
    }

    fn apply(
        &self,
        module: &Module,
        inputs: &DataMap,
        _outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let cfg = inputs
            .get::<SingleEntryPointConfig>()
            .ok_or_else(|| TransformError::missing(NAME, "SingleEntryPointConfig"))?;
        let entry = module
            .entry_points()
            .find(|(_, f)| f.name == cfg.entry_point)
            .map(|(h, _)| h)
            .ok_or_else(|| {
                TransformError::user(
                    NAME,
                    format!("entry point '{}' not found", cfg.entry_point),
                )
            })?;

        let functions = module.reachable_functions(entry);
        let globals = module.globals_used_by(entry);
        let mut overrides = module.overrides_used_by(entry);
        // Override initializers may name other overrides.
        let mut pending: Vec<_> = overrides.iter().copied().collect();
        while let Some(o) = pending.pop() {
            if let Some(init) = module.overrides[o].init.as_ref() {
                let mut found = BTreeSet::new();
                init.visit(&mut |e| {
                    if let Expression::Override(dep) = *e {
                        found.insert(dep);
                    }
                });
                for dep in found {
                    if overrides.insert(dep) {
                        pending.push(dep);
                    }
                }
            }
        }

        let mut out = module.clone();
        out.retain_functions(|h, _| functions.contains(&h));
        out.retain_globals(|h, _| globals.contains(&h));
        out.retain_overrides(|h, _| overrides.contains(&h));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{
        AddressSpace, EntryPoint, Function, GlobalVariable, Override, Scalar, ShaderStage,
        Statement,
    };

    fn two_entry_points() -> Module {
        let mut module = Module::default();
        let f32_ty = module.scalar_type(Scalar::F32);
        let a = module
            .global_variables
            .append(GlobalVariable::new("a", AddressSpace::Private, f32_ty));
        let b = module
            .global_variables
            .append(GlobalVariable::new("b", AddressSpace::Private, f32_ty));
        let scale = module.overrides.append(Override {
            name: "scale".into(),
            id: Some(0),
            ty: f32_ty,
            init: Some(Expression::f32(1.0)),
        });

        let mut helper = Function::new("helper");
        helper.body = vec![Statement::store(
            Expression::GlobalVariable(b),
            Expression::Override(scale),
        )];
        let helper = module.functions.append(helper);

        let mut first = Function::new("first");
        first.entry_point = Some(EntryPoint::compute(1, 1, 1));
        first.body = vec![Statement::store(
            Expression::GlobalVariable(a),
            Expression::f32(1.0),
        )];
        module.functions.append(first);

        let mut second = Function::new("second");
        second.entry_point = Some(EntryPoint::graphics(ShaderStage::Fragment));
        second.body = vec![Statement::Call(Expression::call(helper, vec![]))];
        module.functions.append(second);
        module
    }

    fn run(module: &Module, name: &str) -> Result<Module, TransformError> {
        let mut inputs = DataMap::new();
        inputs.insert(SingleEntryPointConfig::new(name));
        SingleEntryPoint.apply(module, &inputs, &mut DataMap::new())
    }

    #[test]
    fn keeps_only_what_the_entry_point_reaches() {
        let module = two_entry_points();
        let out = run(&module, "second").unwrap();
        let names: Vec<_> = out.functions.iter().map(|(_, f)| f.name.as_str()).collect();
        assert_eq!(names, ["helper", "second"]);
        assert!(out.global_by_name("a").is_none());
        assert!(out.global_by_name("b").is_some());
        assert_eq!(out.overrides.len(), 1);
        tinct_ir::validate(&out).unwrap();

        let out = run(&module, "first").unwrap();
        assert_eq!(out.functions.len(), 1);
        assert!(out.overrides.is_empty());
    }

    #[test]
    fn unknown_entry_point_is_a_user_error() {
        let err = run(&two_entry_points(), "helper").unwrap_err();
        assert!(matches!(err, TransformError::User { .. }));
        assert!(err.to_string().contains("entry point 'helper' not found"));
    }

    #[test]
    fn missing_config_is_reported() {
        let err = SingleEntryPoint
            .apply(&two_entry_points(), &DataMap::new(), &mut DataMap::new())
            .unwrap_err();
        assert!(matches!(err, TransformError::MissingData { .. }));
    }
}
