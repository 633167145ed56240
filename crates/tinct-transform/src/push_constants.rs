//! Shared access to the module's push-constant block.
//!
//! Several passes need a slot in push constants, and a pipeline can bind
//! only one push-constant block per entry point. Members are therefore
//! added to a single `PushConstants` struct, created on first use.

use tinct_ir::{
    AddressSpace, Expression, GlobalVariable, Handle, Module, ResolveContext, StructMember, Type,
    TypeInner, TypeResolution, layout,
};

use crate::TransformError;
use crate::util::for_each_function;

/// The struct type behind an expression that is a struct value or a
/// pointer to one.
fn struct_handle(ctx: &ResolveContext, expr: &Expression) -> Option<Handle<Type>> {
    let h = match ctx.resolve(expr).ok()? {
        TypeResolution::Handle(h) => h,
        TypeResolution::Value(TypeInner::Pointer { base, .. }) => base,
        TypeResolution::Value(_) => return None,
    };
    matches!(ctx.module.types[h].inner, TypeInner::Struct { .. }).then_some(h)
}

/// Shifts member indices of `ty` at or after `at` up by one.
fn shift_members(
    module: &mut Module,
    ty: Handle<Type>,
    at: u32,
    zero: Handle<Type>,
) -> Result<(), TransformError> {
    for_each_function(module, |module, _, func| {
        let mut body = std::mem::take(&mut func.body);
        let ctx = ResolveContext::new(module, func);
        tinct_ir::rewrite_all_exprs(&mut body, &mut |e| match e {
            Expression::AccessIndex { base, index } if *index >= at => {
                if struct_handle(&ctx, base) == Some(ty) {
                    *index += 1;
                }
            }
            Expression::Compose { ty: t, components } if *t == ty => {
                components.insert(at as usize, Expression::ZeroValue(zero));
            }
            _ => {}
        });
        func.body = body;
        Ok(())
    })
}

/// Returns the push-constant variable and the index of member `name`,
/// adding the member at byte `offset` if it does not exist yet.
pub fn member(
    module: &mut Module,
    pass: &'static str,
    name: &str,
    ty: Handle<Type>,
    offset: u32,
) -> Result<(Handle<GlobalVariable>, u32), TransformError> {
    let existing = module
        .global_variables
        .iter()
        .find(|(_, v)| v.space == AddressSpace::PushConstant)
        .map(|(h, v)| (h, v.ty));

    let Some((var, block)) = existing else {
        let struct_name = module.fresh_name("PushConstants");
        let l = layout::layout_of(&module.types, ty);
        let members = vec![StructMember {
            name: name.to_string(),
            ty,
            binding: None,
            offset,
        }];
        let span = layout::round_up(l.align.max(4), offset + l.size);
        let block = module.insert_named_type(struct_name, TypeInner::Struct { members, span });
        let var_name = module.fresh_name("push_constants");
        let var = module.global_variables.append(GlobalVariable::new(
            var_name,
            AddressSpace::PushConstant,
            block,
        ));
        return Ok((var, 0));
    };

    let TypeInner::Struct {
        ref members,
        span,
    } = module.types[block].inner
    else {
        return Err(TransformError::user(
            pass,
            "the push-constant block must have a struct type",
        ));
    };
    if let Some(i) = members.iter().position(|m| m.name == name) {
        return Ok((var, i as u32));
    }
    let l = layout::layout_of(&module.types, ty);
    for m in members {
        let end = m.offset + layout::layout_of(&module.types, m.ty).size;
        if offset < end && m.offset < offset + l.size {
            return Err(TransformError::user(
                pass,
                format!("push-constant member '{name}' at offset {offset} overlaps '{}'", m.name),
            ));
        }
    }
    let at = members.iter().take_while(|m| m.offset < offset).count();
    let mut members = members.clone();
    members.insert(
        at,
        StructMember {
            name: name.to_string(),
            ty,
            binding: None,
            offset,
        },
    );
    let span = span.max(layout::round_up(l.align.max(4), offset + l.size));

    shift_members(module, block, at as u32, ty)?;
    module.types.map_in_place(|h, t| {
        if h == block {
            t.inner = TypeInner::Struct {
                members: members.clone(),
                span,
            };
        }
    });
    Ok((var, at as u32))
}

/// `push_constants.<member>` as a value.
pub fn load(var: Handle<GlobalVariable>, index: u32) -> Expression {
    Expression::load(Expression::access_index(Expression::GlobalVariable(var), index))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::Scalar;

    #[test]
    fn members_are_kept_in_offset_order() {
        let mut module = Module::default();
        let u32_ty = module.scalar_type(Scalar::U32);
        let f32_ty = module.scalar_type(Scalar::F32);
        let (var, first) = member(&mut module, "test", "max_depth", f32_ty, 12).unwrap();
        assert_eq!(first, 0);
        let (same, vertex) = member(&mut module, "test", "first_vertex", u32_ty, 0).unwrap();
        assert_eq!(same, var);
        assert_eq!(vertex, 0);
        let (_, again) = member(&mut module, "test", "max_depth", f32_ty, 12).unwrap();
        assert_eq!(again, 1);

        let ty = module.global_variables[var].ty;
        match module.types[ty].inner {
            TypeInner::Struct { ref members, span } => {
                let names: Vec<_> = members.iter().map(|m| m.name.as_str()).collect();
                assert_eq!(names, ["first_vertex", "max_depth"]);
                assert_eq!(span, 16);
            }
            ref other => panic!("expected struct, got {other:?}"),
        }
        assert!(member(&mut module, "test", "clash", u32_ty, 14).is_err());
    }
}
