//! Makes the byte layout of buffer structs explicit.
//!
//! GLSL computes member offsets itself from the std140/std430 rules, which
//! cannot express the gaps that `@align` and `@size` leave. Every struct
//! reachable from a uniform, storage or push-constant variable gets `u32`
//! members named `pad`, `pad_1`, … filling each gap, and trailing ones up
//! to its span.

use std::collections::{HashMap, HashSet};

use tinct_ir::layout::layout_of;
use tinct_ir::{
    ArraySize, Expression, Handle, IrError, Module, ResolveContext, Scalar, StructMember, Type,
    TypeInner,
};
use tinct_transform::util::for_each_function;
use tinct_transform::{DataMap, Transform, TransformError};

const NAME: &str = "PadStructs";

#[derive(Debug)]
pub struct PadStructs;

/// The padded member list of a struct, and where each original member
/// ended up.
struct Padded {
    members: Vec<StructMember>,
    index_map: Vec<u32>,
}

fn buffer_structs(module: &Module) -> Vec<Handle<Type>> {
    let mut seen = HashSet::new();
    let mut out = Vec::new();
    let mut stack: Vec<Handle<Type>> = module
        .global_variables
        .iter()
        .filter(|(_, g)| g.space.is_host_shareable())
        .map(|(_, g)| g.ty)
        .collect();
    while let Some(ty) = stack.pop() {
        if !seen.insert(ty) {
            continue;
        }
        match module.types[ty].inner {
            TypeInner::Array { base, .. } => stack.push(base),
            TypeInner::Struct { ref members, .. } => {
                out.push(ty);
                stack.extend(members.iter().map(|m| m.ty));
            }
            _ => {}
        }
    }
    out.sort();
    out
}

fn pad_members(module: &Module, ty: Handle<Type>, u32_ty: Handle<Type>) -> Option<Padded> {
    let TypeInner::Struct { ref members, span } = module.types[ty].inner else {
        return None;
    };
    let mut names: HashSet<String> = members.iter().map(|m| m.name.clone()).collect();
    let mut fresh_pad = || {
        let name = std::iter::once("pad".to_string())
            .chain((1..).map(|i| format!("pad_{i}")))
            .find(|n| !names.contains(n))
            .unwrap_or_else(|| "pad".to_string());
        names.insert(name.clone());
        name
    };

    let mut out = Vec::with_capacity(members.len());
    let mut index_map = Vec::with_capacity(members.len());
    let mut fill = |out: &mut Vec<StructMember>, from: u32, to: u32| {
        let mut offset = from;
        while offset + 4 <= to {
            out.push(StructMember {
                name: fresh_pad(),
                ty: u32_ty,
                binding: None,
                offset,
            });
            offset += 4;
        }
    };

    let mut cursor = 0;
    let mut ends_in_runtime_array = false;
    for m in members {
        fill(&mut out, cursor, m.offset);
        index_map.push(out.len() as u32);
        out.push(m.clone());
        cursor = m.offset + layout_of(&module.types, m.ty).size;
        ends_in_runtime_array = matches!(
            module.types[m.ty].inner,
            TypeInner::Array {
                size: ArraySize::Runtime,
                ..
            }
        );
    }
    if !ends_in_runtime_array {
        fill(&mut out, cursor, span);
    }
    (out.len() != members.len()).then_some(Padded {
        members: out,
        index_map,
    })
}

/// Rewrites member indices top-down, so every base still resolves against
/// the unpadded types.
fn remap(
    ctx: &ResolveContext<'_>,
    padded: &HashMap<Handle<Type>, Padded>,
    expr: &mut Expression,
) -> Result<(), IrError> {
    match expr {
        Expression::AccessIndex { base, index } => {
            let struct_ty = match ctx.resolve_inner(base)? {
                TypeInner::Pointer { base, .. } => Some(base),
                _ => ctx.resolve(base)?.handle(),
            };
            if let Some(p) = struct_ty.and_then(|ty| padded.get(&ty)) {
                if let Some(&new) = p.index_map.get(*index as usize) {
                    *index = new;
                }
            }
        }
        Expression::Compose { ty, components } => {
            if let Some(p) = padded.get(&*ty) {
                let mut old = std::mem::take(components).into_iter();
                let mut next = 0;
                for i in 0..p.members.len() as u32 {
                    if p.index_map.get(next) == Some(&i) {
                        components.extend(old.next());
                        next += 1;
                    } else {
                        components.push(Expression::u32(0));
                    }
                }
            }
        }
        _ => {}
    }
    let mut result = Ok(());
    expr.for_each_child_mut(|child| {
        if result.is_ok() {
            result = remap(ctx, padded, child);
        }
    });
    result
}

impl Transform for PadStructs {
    fn name(&self) -> &'static str {
        NAME
    }

    fn should_run(&self, module: &Module, _inputs: &DataMap) -> bool {
        // Only the member count matters here.
        buffer_structs(module)
            .into_iter()
            .any(|ty| pad_members(module, ty, Handle::new(0)).is_some())
    }

    fn apply(
        &self,
        module: &Module,
        _inputs: &DataMap,
        _outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let mut out = module.clone();
        let u32_ty = out.scalar_type(Scalar::U32);
        let padded: HashMap<Handle<Type>, Padded> = buffer_structs(&out)
            .into_iter()
            .filter_map(|ty| pad_members(&out, ty, u32_ty).map(|p| (ty, p)))
            .collect();
        if padded.is_empty() {
            return Ok(out);
        }

        for_each_function(&mut out, |module, _, func| {
            let mut body = std::mem::take(&mut func.body);
            let ctx = ResolveContext::new(module, func);
            let mut result = Ok(());
            tinct_ir::walk_exprs_mut(&mut body, &mut |root| {
                if result.is_ok() {
                    result = remap(&ctx, &padded, root);
                }
            });
            func.body = body;
            Ok(result?)
        })?;
        let inits: Vec<_> = out
            .global_variables
            .iter()
            .filter_map(|(h, g)| g.init.clone().map(|init| (h, init)))
            .collect();
        for (h, mut init) in inits {
            remap(&ResolveContext::module_scope(&out), &padded, &mut init)?;
            out.global_variables[h].init = Some(init);
        }

        out.types.map_in_place(|h, ty| {
            if let (Some(p), TypeInner::Struct { members, .. }) = (padded.get(&h), &mut ty.inner) {
                *members = p.members.clone();
            }
        });
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{
        AddressSpace, EntryPoint, Function, GlobalVariable, Statement, VectorSize, dump_module,
    };

    /// `struct S { a: f32, @align(16) b: vec3<f32>, c: f32 }` in a uniform
    /// buffer, read through `u.c`.
    fn module_with_gap() -> Module {
        let mut module = Module::default();
        let f32_ty = module.scalar_type(Scalar::F32);
        let vec3 = module.vector_type(VectorSize::Tri, Scalar::F32);
        let members = vec![
            StructMember {
                name: "a".into(),
                ty: f32_ty,
                binding: None,
                offset: 0,
            },
            StructMember {
                name: "b".into(),
                ty: vec3,
                binding: None,
                offset: 16,
            },
            StructMember {
                name: "c".into(),
                ty: f32_ty,
                binding: None,
                offset: 28,
            },
        ];
        let s = module.insert_named_type("S", TypeInner::Struct { members, span: 48 });
        let u = module
            .global_variables
            .append(GlobalVariable::new("u", AddressSpace::Uniform, s).with_binding(0, 0));
        let out = module
            .global_variables
            .append(GlobalVariable::new("out", AddressSpace::Private, f32_ty));
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::compute(1, 1, 1));
        main.body = vec![Statement::store(
            Expression::GlobalVariable(out),
            Expression::load(Expression::access_index(Expression::GlobalVariable(u), 2)),
        )];
        module.functions.append(main);
        module
    }

    #[test]
    fn gaps_become_members() {
        let module = module_with_gap();
        assert!(PadStructs.should_run(&module, &DataMap::new()));
        let out = PadStructs
            .apply(&module, &DataMap::new(), &mut DataMap::new())
            .unwrap();
        tinct_ir::validate(&out).unwrap();
        let text = dump_module(&out);
        assert!(text.contains("@offset(4) pad: u32,"), "{text}");
        assert!(text.contains("@offset(8) pad_1: u32,"), "{text}");
        assert!(text.contains("@offset(12) pad_2: u32,"), "{text}");
        assert!(text.contains("@offset(16) b: vec3<f32>,"), "{text}");
        assert!(text.contains("@offset(44) pad_6: u32,"), "{text}");
        assert!(text.contains("out = u.c;"), "{text}");
        assert!(!PadStructs.should_run(&out, &DataMap::new()));
    }

    #[test]
    fn private_structs_are_left_alone() {
        let mut module = module_with_gap();
        let u = module.global_by_name("u").unwrap();
        module.global_variables[u].space = AddressSpace::Private;
        module.global_variables[u].binding = None;
        assert!(!PadStructs.should_run(&module, &DataMap::new()));
    }
}
