//! Copies arrays and matrices into a `var` before indexing them
//! dynamically, for targets that can only index memory.

use tinct_ir::{Expression, Function, Module, TypeInner};

use crate::util::{
    declare_var, flat_map_stmts, for_each_function, inner_of, try_rewrite, type_of, visit_roots,
};
use crate::{DataMap, Transform, TransformError};

#[derive(Debug)]
pub struct VarForDynamicIndex;

fn needs_var(module: &Module, func: &Function, base: &Expression, index: &Expression) -> bool {
    if matches!(index, Expression::Literal(_)) {
        return false;
    }
    matches!(
        inner_of(module, func, base),
        Ok(TypeInner::Array { .. } | TypeInner::Matrix { .. })
    )
}

impl Transform for VarForDynamicIndex {
    fn name(&self) -> &'static str {
        "VarForDynamicIndex"
    }

    fn should_run(&self, module: &Module, _inputs: &DataMap) -> bool {
        module.functions.iter().any(|(_, f)| {
            let mut found = false;
            tinct_ir::walk_all_exprs(&f.body, &mut |e| {
                if let Expression::Access { base, index } = e {
                    found |= needs_var(module, f, base, index);
                }
            });
            found
        })
    }

    fn apply(
        &self,
        module: &Module,
        _inputs: &DataMap,
        _outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let mut out = module.clone();
        for_each_function(&mut out, |module, _, func| {
            let mut body = std::mem::take(&mut func.body);
            flat_map_stmts::<TransformError>(&mut body, &mut |mut stmt, out| {
                visit_roots(&mut stmt, out, &mut |root, pre| {
                    try_rewrite(root, &mut |e| {
                        let Expression::Access { base, index } = e else {
                            return Ok(());
                        };
                        if !needs_var(module, func, base, index) {
                            return Ok(());
                        }
                        let ty = type_of(module, func, base)?;
                        let value = std::mem::replace(&mut **base, Expression::u32(0));
                        **base = declare_var(func, "tint_symbol", ty, Some(value), pre);
                        let access = std::mem::replace(e, Expression::u32(0));
                        *e = Expression::load(access);
                        Ok::<(), TransformError>(())
                    })
                })?;
                out.push(stmt);
                Ok(())
            })?;
            func.body = body;
            Ok(())
        })?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{FunctionArgument, LocalKind, Scalar, Statement};

    #[test]
    fn value_array_indexed_through_var() {
        let mut module = Module::default();
        let f32_ty = module.scalar_type(Scalar::F32);
        let u32_ty = module.scalar_type(Scalar::U32);
        let arr = module.array_type(f32_ty, 4);
        let mut f = Function::new("pick");
        f.arguments = vec![
            FunctionArgument {
                name: "values".into(),
                ty: arr,
                binding: None,
            },
            FunctionArgument {
                name: "i".into(),
                ty: u32_ty,
                binding: None,
            },
        ];
        f.result = Some(tinct_ir::FunctionResult {
            ty: f32_ty,
            binding: None,
        });
        let x = f.add_local("x", f32_ty, LocalKind::Let);
        f.body = vec![
            Statement::Declare {
                local: x,
                init: Some(Expression::access(
                    Expression::FunctionArgument(0),
                    Expression::FunctionArgument(1),
                )),
            },
            Statement::Return {
                value: Some(Expression::access(
                    Expression::FunctionArgument(0),
                    Expression::u32(0),
                )),
            },
        ];
        let f = module.functions.append(f);
        assert!(VarForDynamicIndex.should_run(&module, &DataMap::new()));
        let out = VarForDynamicIndex
            .apply(&module, &DataMap::new(), &mut DataMap::new())
            .unwrap();
        tinct_ir::validate(&out).unwrap();
        let text = tinct_ir::dump_function(&out, &out.functions[f]);
        assert!(text.contains("var tint_symbol: array<f32, 4> = values;"), "{text}");
        assert!(text.contains("let x: f32 = tint_symbol[i];"), "{text}");
        assert!(text.contains("return values[0u];"), "{text}");
        assert!(!VarForDynamicIndex.should_run(&out, &DataMap::new()));
    }
}
