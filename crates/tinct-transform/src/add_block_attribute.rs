//! Wraps buffer variables whose store type cannot carry a block decoration.

use std::collections::{HashMap, HashSet};

use tinct_ir::{AddressSpace, Expression, Handle, Module, Type, TypeInner, walk_all_exprs};

use crate::{DataMap, Transform, TransformError};

/// Every uniform, storage and push-constant variable ends up with a struct
/// store type that is used by nothing else. Variables of any other type
/// are wrapped in `struct <name>_block { inner: T }` and their uses are
/// redirected through `.inner`.
#[derive(Debug)]
pub struct AddBlockAttribute;

fn is_buffer(space: AddressSpace) -> bool {
    matches!(
        space,
        AddressSpace::Uniform | AddressSpace::Storage | AddressSpace::PushConstant
    )
}

/// Struct types used somewhere other than as the store type of exactly one
/// buffer variable.
fn shared_structs(module: &Module) -> HashSet<Handle<Type>> {
    let mut buffer_uses: HashMap<Handle<Type>, usize> = HashMap::new();
    let mut other = HashSet::new();
    for (_, var) in module.global_variables.iter() {
        if is_buffer(var.space) {
            *buffer_uses.entry(var.ty).or_default() += 1;
        } else {
            other.insert(var.ty);
        }
    }
    for (_, ty) in module.types.iter() {
        match ty.inner {
            TypeInner::Array { base, .. } => {
                other.insert(base);
            }
            TypeInner::Struct { ref members, .. } => {
                other.extend(members.iter().map(|m| m.ty));
            }
            _ => {}
        }
    }
    for (_, f) in module.functions.iter() {
        other.extend(f.arguments.iter().map(|a| a.ty));
        other.extend(f.result.iter().map(|r| r.ty));
        other.extend(f.locals.iter().map(|(_, l)| l.ty));
        walk_all_exprs(&f.body, &mut |e| {
            if let Expression::Compose { ty, .. } | Expression::ZeroValue(ty) = *e {
                other.insert(ty);
            }
        });
    }
    let shared: Vec<_> = buffer_uses
        .into_iter()
        .filter(|&(ty, n)| n > 1 || other.contains(&ty))
        .map(|(ty, _)| ty)
        .collect();
    other.extend(shared);
    other
}

fn needs_wrapping(module: &Module, shared: &HashSet<Handle<Type>>, ty: Handle<Type>) -> bool {
    !matches!(module.types[ty].inner, TypeInner::Struct { .. }) || shared.contains(&ty)
}

impl Transform for AddBlockAttribute {
    fn name(&self) -> &'static str {
        "AddBlockAttribute"
    }

    fn should_run(&self, module: &Module, _inputs: &DataMap) -> bool {
        let shared = shared_structs(module);
        module
            .global_variables
            .iter()
            .any(|(_, v)| is_buffer(v.space) && needs_wrapping(module, &shared, v.ty))
    }

    fn apply(
        &self,
        module: &Module,
        _inputs: &DataMap,
        _outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let shared = shared_structs(module);
        let mut out = module.clone();
        let mut wrapped = HashSet::new();
        for h in out.global_variables.handles().collect::<Vec<_>>() {
            let (space, ty, name) = {
                let v = &out.global_variables[h];
                (v.space, v.ty, v.name.clone())
            };
            if !is_buffer(space) || !needs_wrapping(&out, &shared, ty) {
                continue;
            }
            let block_name = out.fresh_name(&format!("{name}_block"));
            let block = out.struct_type(&block_name, &[("inner", ty)]);
            out.global_variables[h].ty = block;
            wrapped.insert(h);
        }
        out.rewrite_exprs(&mut |e| {
            if let Expression::GlobalVariable(g) = *e {
                if wrapped.contains(&g) {
                    *e = Expression::access_index(Expression::GlobalVariable(g), 0);
                }
            }
        });
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{EntryPoint, Function, GlobalVariable, Scalar, Statement};

    #[test]
    fn non_struct_and_shared_buffers_are_wrapped() {
        let mut module = Module::default();
        let f32_ty = module.scalar_type(Scalar::F32);
        let params = module.struct_type("Params", &[("scale", f32_ty)]);
        let u = module
            .global_variables
            .append(GlobalVariable::new("scale", AddressSpace::Uniform, f32_ty).with_binding(0, 0));
        let a = module
            .global_variables
            .append(GlobalVariable::new("a", AddressSpace::Uniform, params).with_binding(0, 1));
        module
            .global_variables
            .append(GlobalVariable::new("b", AddressSpace::Uniform, params).with_binding(0, 2));
        let out_var = module
            .global_variables
            .append(GlobalVariable::new("result", AddressSpace::Private, f32_ty));
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::compute(1, 1, 1));
        main.body = vec![Statement::store(
            Expression::GlobalVariable(out_var),
            Expression::binary(
                tinct_ir::BinaryOp::Add,
                Expression::load(Expression::GlobalVariable(u)),
                Expression::load(Expression::access_index(Expression::GlobalVariable(a), 0)),
            ),
        )];
        module.functions.append(main);
        assert!(AddBlockAttribute.should_run(&module, &DataMap::new()));

        let out = AddBlockAttribute
            .apply(&module, &DataMap::new(), &mut DataMap::new())
            .unwrap();
        tinct_ir::validate(&out).unwrap();
        let text = tinct_ir::dump_module(&out);
        assert!(text.contains("struct scale_block {"), "{text}");
        assert!(text.contains("struct a_block {"), "{text}");
        assert!(text.contains("struct b_block {"), "{text}");
        assert!(text.contains("result = (scale.inner + a.inner.scale);"), "{text}");
        assert!(!AddBlockAttribute.should_run(&out, &DataMap::new()));
    }
}
