//! Removes pointer `let`s by substituting their access chains at each use.

use std::collections::HashMap;

use tinct_ir::{Expression, Function, Handle, LocalKind, LocalVariable, Module, Statement};

use crate::util::{flat_map_stmts, for_each_function, save_indices};
use crate::{DataMap, Transform, TransformError};

/// After this pass every pointer expression is a chain of accesses rooted
/// at a variable or a pointer parameter. Dynamic indices of a substituted
/// chain are saved in `let`s where the pointer was declared, so later
/// writes to the index variables do not move the pointer.
#[derive(Debug)]
pub struct SimplifyPointers;

fn is_pointer_let(module: &Module, func: &Function, local: Handle<LocalVariable>) -> bool {
    let l = &func.locals[local];
    l.kind == LocalKind::Let && module.types[l.ty].inner.is_pointer()
}

fn substitute(expr: &mut Expression, map: &HashMap<Handle<LocalVariable>, Expression>) {
    expr.visit_mut_post(&mut |e| {
        if let Expression::LocalVariable(l) = *e {
            if let Some(chain) = map.get(&l) {
                *e = chain.clone();
            }
        }
    });
}

fn run_function(module: &mut Module, func: &mut Function) -> Result<(), TransformError> {
    let mut chains: HashMap<Handle<LocalVariable>, Expression> = HashMap::new();
    let mut body = std::mem::take(&mut func.body);
    flat_map_stmts(&mut body, &mut |stmt, out| {
        match stmt {
            Statement::Declare {
                local,
                init: Some(mut init),
            } if is_pointer_let(module, func, local) => {
                substitute(&mut init, &chains);
                let name = func.locals[local].name.clone();
                save_indices(module, func, &mut init, &name, out)?;
                chains.insert(local, init);
            }
            other => out.push(other),
        }
        Ok::<(), TransformError>(())
    })?;
    if !chains.is_empty() {
        tinct_ir::rewrite_all_exprs(&mut body, &mut |e| {
            if let Expression::LocalVariable(l) = *e {
                if let Some(chain) = chains.get(&l) {
                    *e = chain.clone();
                }
            }
        });
    }
    func.body = body;
    Ok(())
}

impl Transform for SimplifyPointers {
    fn name(&self) -> &'static str {
        "SimplifyPointers"
    }

    fn should_run(&self, module: &Module, _inputs: &DataMap) -> bool {
        module.functions.iter().any(|(_, f)| {
            let mut found = false;
            tinct_ir::walk_stmts(&f.body, &mut |s| {
                if let Statement::Declare { local, .. } = *s {
                    found |= is_pointer_let(module, f, local);
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
        for_each_function(&mut out, |module, _, func| run_function(module, func))?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{AddressSpace, GlobalVariable, Scalar, StorageAccess};

    #[test]
    fn pointer_lets_are_inlined_with_saved_indices() {
        let mut module = Module::default();
        let f32_ty = module.scalar_type(Scalar::F32);
        let u32_ty = module.scalar_type(Scalar::U32);
        let arr = module.array_type(f32_ty, 4);
        let ptr = module.pointer_type(f32_ty, AddressSpace::Private, StorageAccess::LOAD_STORE);
        let g = module
            .global_variables
            .append(GlobalVariable::new("values", AddressSpace::Private, arr));

        let mut f = Function::new("main");
        let i = f.add_local("i", u32_ty, LocalKind::Var);
        let p = f.add_local("p", ptr, LocalKind::Let);
        f.body = vec![
            Statement::Declare {
                local: i,
                init: Some(Expression::u32(1)),
            },
            Statement::Declare {
                local: p,
                init: Some(Expression::access(
                    Expression::GlobalVariable(g),
                    Expression::load(Expression::LocalVariable(i)),
                )),
            },
            Statement::store(Expression::LocalVariable(i), Expression::u32(2)),
            Statement::store(Expression::LocalVariable(p), Expression::f32(1.0)),
        ];
        let f = module.functions.append(f);
        assert!(SimplifyPointers.should_run(&module, &DataMap::new()));

        let out = SimplifyPointers
            .apply(&module, &DataMap::new(), &mut DataMap::new())
            .unwrap();
        tinct_ir::validate(&out).unwrap();
        let text = tinct_ir::dump_function(&out, &out.functions[f]);
        assert!(text.contains("let p_save: u32 = i;"), "{text}");
        assert!(text.contains("values[p_save] = 1f;"), "{text}");
        assert!(!SimplifyPointers.should_run(&out, &DataMap::new()));
    }
}
