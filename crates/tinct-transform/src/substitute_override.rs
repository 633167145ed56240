//! Replaces pipeline-overridable constants with concrete values.

use std::collections::HashMap;

use tinct_ir::{Expression, Handle, Literal, Module, Override, ScalarKind, TypeInner, WorkgroupDim};

use crate::util::{eval_literal, literal_as_u32};
use crate::{DataMap, Transform, TransformError};

/// Override values supplied by the pipeline, keyed by `@id` or by name.
/// Values are converted to the override's declared type.
#[derive(Clone, Debug, Default)]
pub struct SubstituteOverrideConfig {
    pub by_id: HashMap<u16, f64>,
    pub by_name: HashMap<String, f64>,
}

/// Substitutes every override expression and override-sized workgroup
/// dimension, then removes the overrides.
#[derive(Debug)]
pub struct SubstituteOverride;

const NAME: &str = "SubstituteOverride";

fn literal_of(kind: ScalarKind, value: f64) -> Literal {
    match kind {
        ScalarKind::Bool => Literal::Bool(value != 0.0),
        ScalarKind::Sint => Literal::I32(value as i32),
        ScalarKind::Uint => Literal::U32(value as u32),
        ScalarKind::Float => Literal::F32(value as f32),
    }
}

fn replacement(
    module: &Module,
    h: Handle<Override>,
    cfg: &SubstituteOverrideConfig,
    done: &mut HashMap<Handle<Override>, Expression>,
) -> Result<Expression, TransformError> {
    if let Some(e) = done.get(&h) {
        return Ok(e.clone());
    }
    let o = &module.overrides[h];
    let kind = match module.types[o.ty].inner {
        TypeInner::Scalar(s) => s.kind,
        _ => {
            return Err(TransformError::ice(
                NAME,
                format!("override '{}' is not a scalar", o.name),
            ));
        }
    };
    let supplied = o
        .id
        .and_then(|id| cfg.by_id.get(&id))
        .or_else(|| cfg.by_name.get(&o.name));
    let expr = match (supplied, o.init.as_ref()) {
        (Some(&v), _) => Expression::Literal(literal_of(kind, v)),
        (None, Some(init)) => {
            let mut init = init.clone();
            let mut result = Ok(());
            init.visit_mut_post(&mut |e| {
                if let Expression::Override(dep) = *e {
                    match replacement(module, dep, cfg, done) {
                        Ok(r) => *e = r,
                        Err(err) => result = Err(err),
                    }
                }
            });
            result?;
            match eval_literal(&init) {
                Some(lit) => Expression::Literal(lit),
                None => init,
            }
        }
        (None, None) => {
            return Err(TransformError::user(
                NAME,
                format!("initializer not provided for override '{}'", o.name),
            ));
        }
    };
    done.insert(h, expr.clone());
    Ok(expr)
}

impl Transform for SubstituteOverride {
    fn name(&self) -> &'static str {
        NAME
    }

    fn should_run(&self, module: &Module, _inputs: &DataMap) -> bool {
        !module.overrides.is_empty()
    }

    fn requires(&self) -> &'static [&'static str] {
        &["SingleEntryPoint"]
    }

    fn apply(
        &self,
        module: &Module,
        inputs: &DataMap,
        _outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let default = SubstituteOverrideConfig::default();
        let cfg = inputs.get::<SubstituteOverrideConfig>().unwrap_or(&default);

        let mut done = HashMap::new();
        for h in module.overrides.handles() {
            replacement(module, h, cfg, &mut done)?;
        }

        let mut out = module.clone();
        out.rewrite_exprs(&mut |e| {
            if let Expression::Override(h) = *e {
                if let Some(r) = done.get(&h) {
                    *e = r.clone();
                }
            }
        });
        for (_, f) in out.functions.iter_mut() {
            let Some(ep) = f.entry_point.as_mut() else {
                continue;
            };
            for dim in ep.workgroup_size.iter_mut() {
                let WorkgroupDim::Override(h) = *dim else {
                    continue;
                };
                let value = done
                    .get(&h)
                    .and_then(eval_literal)
                    .and_then(literal_as_u32)
                    .ok_or_else(|| {
                        TransformError::user(
                            NAME,
                            format!(
                                "workgroup size of '{}' is not a positive integer constant",
                                f.name
                            ),
                        )
                    })?;
                *dim = WorkgroupDim::Literal(value);
            }
        }
        out.retain_overrides(|_, _| false);
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{AddressSpace, BinaryOp, EntryPoint, Function, GlobalVariable, Scalar, Statement};

    fn module() -> Module {
        let mut module = Module::default();
        let u32_ty = module.scalar_type(Scalar::U32);
        let f32_ty = module.scalar_type(Scalar::F32);
        let width = module.overrides.append(Override {
            name: "width".into(),
            id: Some(7),
            ty: u32_ty,
            init: Some(Expression::u32(8)),
        });
        let doubled = module.overrides.append(Override {
            name: "doubled".into(),
            id: None,
            ty: u32_ty,
            init: Some(Expression::binary(
                BinaryOp::Multiply,
                Expression::Override(width),
                Expression::u32(2),
            )),
        });
        let gain = module.overrides.append(Override {
            name: "gain".into(),
            id: None,
            ty: f32_ty,
            init: None,
        });
        let out = module
            .global_variables
            .append(GlobalVariable::new("out", AddressSpace::Private, f32_ty));
        let mut main = Function::new("main");
        let mut ep = EntryPoint::compute(1, 1, 1);
        ep.workgroup_size[0] = WorkgroupDim::Override(doubled);
        main.entry_point = Some(ep);
        main.body = vec![Statement::store(
            Expression::GlobalVariable(out),
            Expression::Override(gain),
        )];
        module.functions.append(main);
        module
    }

    #[test]
    fn values_come_from_config_then_initializers() {
        let mut cfg = SubstituteOverrideConfig::default();
        cfg.by_id.insert(7, 4.0);
        cfg.by_name.insert("gain".into(), 0.5);
        let mut inputs = DataMap::new();
        inputs.insert(cfg);
        let out = SubstituteOverride
            .apply(&module(), &inputs, &mut DataMap::new())
            .unwrap();
        assert!(out.overrides.is_empty());
        let (_, main) = out.entry_points().next().unwrap();
        assert_eq!(
            main.entry_point.as_ref().unwrap().literal_workgroup_size(),
            Some([8, 1, 1])
        );
        assert_eq!(
            main.body[0],
            Statement::store(
                Expression::GlobalVariable(Handle::new(0)),
                Expression::f32(0.5)
            )
        );
        assert!(!SubstituteOverride.should_run(&out, &inputs));
    }

    #[test]
    fn missing_value_is_a_user_error() {
        let err = SubstituteOverride
            .apply(&module(), &DataMap::new(), &mut DataMap::new())
            .unwrap_err();
        assert!(err.to_string().contains("override 'gain'"));
    }
}
