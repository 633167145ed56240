//! Keeps the padding bytes of host-shareable memory intact on whole-value
//! stores.
//!
//! A store of a struct, array or `mat3xN` into a storage buffer would be
//! free to clobber the padding between members. Such stores are replaced
//! by calls to `assign_and_preserve_padding` helpers that write one member
//! (or element, or column) at a time.

use std::collections::HashMap;

use tinct_ir::{
    AddressSpace, ArraySize, BinaryOp, Expression, Function, FunctionArgument, Handle, LocalKind,
    Module, ResolveContext, Scalar, Statement, StorageAccess, Type, TypeInner, layout::has_padding,
};

use crate::util::{flat_map_stmts, for_each_function, while_loop};
use crate::{DataMap, Transform, TransformError};

#[derive(Debug)]
pub struct PreservePadding;

/// The stored type and pointer access of a store that needs a helper.
fn padded_store(
    module: &Module,
    func: &Function,
    pointer: &Expression,
) -> Option<(Handle<Type>, StorageAccess)> {
    let inner = ResolveContext::new(module, func).resolve_inner(pointer).ok()?;
    match inner {
        TypeInner::Pointer {
            base,
            space: AddressSpace::Storage,
            access,
        } if has_padding(&module.types, base) => Some((base, access)),
        _ => None,
    }
}

#[derive(Default)]
struct Helpers {
    made: HashMap<(Handle<Type>, StorageAccess), Handle<Function>>,
}

impl Helpers {
    /// `*dest = value`, split up if `ty` has padding.
    fn assign(
        &mut self,
        module: &mut Module,
        ty: Handle<Type>,
        access: StorageAccess,
        dest: Expression,
        value: Expression,
    ) -> Statement {
        if has_padding(&module.types, ty) {
            let helper = self.helper(module, ty, access);
            Statement::Call(Expression::call(helper, vec![dest, value]))
        } else {
            Statement::store(dest, value)
        }
    }

    fn helper(
        &mut self,
        module: &mut Module,
        ty: Handle<Type>,
        access: StorageAccess,
    ) -> Handle<Function> {
        if let Some(&h) = self.made.get(&(ty, access)) {
            return h;
        }
        let ptr = module.pointer_type(ty, AddressSpace::Storage, access);
        let mut f = Function::new(String::new());
        f.arguments = vec![
            FunctionArgument {
                name: "dest".into(),
                ty: ptr,
                binding: None,
            },
            FunctionArgument {
                name: "value".into(),
                ty,
                binding: None,
            },
        ];
        let dest = Expression::FunctionArgument(0);
        let value = Expression::FunctionArgument(1);

        match module.types[ty].inner.clone() {
            TypeInner::Struct { members, .. } => {
                for (i, m) in members.iter().enumerate() {
                    let i = i as u32;
                    let stmt = self.assign(
                        module,
                        m.ty,
                        access,
                        Expression::access_index(dest.clone(), i),
                        Expression::access_index(value.clone(), i),
                    );
                    f.body.push(stmt);
                }
            }
            TypeInner::Array {
                base,
                size: ArraySize::Constant(n),
                ..
            } => {
                let u32_ty = module.scalar_type(Scalar::U32);
                let i = f.add_local("i", u32_ty, LocalKind::Var);
                let index = Expression::load(Expression::LocalVariable(i));
                f.body.push(Statement::Declare {
                    local: i,
                    init: Some(Expression::u32(0)),
                });
                let element = self.assign(
                    module,
                    base,
                    access,
                    Expression::access(dest, index.clone()),
                    Expression::access(value, index.clone()),
                );
                f.body.push(while_loop(
                    Expression::binary(BinaryOp::Less, index.clone(), Expression::u32(n)),
                    vec![element],
                    vec![Statement::store(
                        Expression::LocalVariable(i),
                        Expression::binary(BinaryOp::Add, index, Expression::u32(1)),
                    )],
                ));
            }
            TypeInner::Matrix { columns, .. } => {
                for c in 0..columns.count() {
                    f.body.push(Statement::store(
                        Expression::access_index(dest.clone(), c),
                        Expression::access_index(value.clone(), c),
                    ));
                }
            }
            _ => f.body.push(Statement::store(dest, value)),
        }

        // Nested helpers are appended first, so the name is picked last.
        f.name = module.fresh_name("assign_and_preserve_padding");
        let h = module.functions.append(f);
        self.made.insert((ty, access), h);
        h
    }
}

impl Transform for PreservePadding {
    fn name(&self) -> &'static str {
        "PreservePadding"
    }

    fn should_run(&self, module: &Module, _inputs: &DataMap) -> bool {
        module.functions.iter().any(|(_, f)| {
            let mut found = false;
            tinct_ir::walk_stmts(&f.body, &mut |s| {
                if let Statement::Store { pointer, .. } = s {
                    found |= padded_store(module, f, pointer).is_some();
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
        let mut helpers = Helpers::default();
        for_each_function(&mut out, |module, _, func| {
            let mut body = std::mem::take(&mut func.body);
            flat_map_stmts::<TransformError>(&mut body, &mut |stmt, out| {
                let Statement::Store { pointer, value } = stmt else {
                    out.push(stmt);
                    return Ok(());
                };
                match padded_store(module, func, &pointer) {
                    Some((ty, access)) => {
                        out.push(helpers.assign(module, ty, access, pointer, value))
                    }
                    None => out.push(Statement::Store { pointer, value }),
                }
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
    use tinct_ir::{EntryPoint, GlobalVariable, VectorSize};

    fn module_storing(build: impl FnOnce(&mut Module) -> Handle<Type>) -> Module {
        let mut module = Module::default();
        let ty = build(&mut module);
        let buf = module.global_variables.append(
            GlobalVariable::new("buf", AddressSpace::Storage, ty)
                .with_binding(0, 0)
                .with_access(StorageAccess::LOAD_STORE),
        );
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::compute(1, 1, 1));
        main.body = vec![Statement::store(
            Expression::GlobalVariable(buf),
            Expression::ZeroValue(ty),
        )];
        module.functions.append(main);
        module
    }

    fn run(module: &Module) -> Module {
        let out = PreservePadding
            .apply(module, &DataMap::new(), &mut DataMap::new())
            .unwrap();
        tinct_ir::validate(&out).unwrap();
        out
    }

    #[test]
    fn struct_store_is_split_into_members() {
        let module = module_storing(|m| {
            let f32_ty = m.scalar_type(Scalar::F32);
            let vec3 = m.vector_type(VectorSize::Tri, Scalar::F32);
            m.struct_type("S", &[("a", f32_ty), ("b", vec3)])
        });
        assert!(PreservePadding.should_run(&module, &DataMap::new()));
        let out = run(&module);
        let text = tinct_ir::dump_module(&out);
        assert!(
            text.contains(
                "fn assign_and_preserve_padding(dest: ptr<storage, S, read_write>, value: S) {"
            ),
            "{text}"
        );
        assert!(text.contains("*dest.a = value.a;"), "{text}");
        assert!(text.contains("*dest.b = value.b;"), "{text}");
        assert!(text.contains("assign_and_preserve_padding(&buf, S());"), "{text}");
        assert!(!PreservePadding.should_run(&out, &DataMap::new()));
    }

    #[test]
    fn strided_array_is_stored_element_by_element() {
        let module = module_storing(|m| {
            let vec3 = m.vector_type(VectorSize::Tri, Scalar::F32);
            m.array_type(vec3, 4)
        });
        let out = run(&module);
        let text = tinct_ir::dump_module(&out);
        assert!(text.contains("var i: u32 = 0u;"), "{text}");
        assert!(text.contains("if (!(i < 4u)) {"), "{text}");
        assert!(text.contains("*dest[i] = value[i];"), "{text}");
        assert!(text.contains("i = (i + 1u);"), "{text}");
    }

    #[test]
    fn packed_types_are_left_alone() {
        let module = module_storing(|m| {
            let f32_ty = m.scalar_type(Scalar::F32);
            m.struct_type("P", &[("a", f32_ty), ("b", f32_ty)])
        });
        assert!(!PreservePadding.should_run(&module, &DataMap::new()));
    }
}
