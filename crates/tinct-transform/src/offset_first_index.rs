//! Adds the base vertex and base instance to `vertex_index` and
//! `instance_index`, for targets whose builtins start counting at zero
//! regardless of the draw call.

use tinct_ir::{
    BinaryOp, Binding, BuiltIn, Expression, Module, Scalar, ShaderStage, TypeInner,
};

use crate::push_constants;
use crate::util::for_each_function;
use crate::{DataMap, Transform, TransformError};

const NAME: &str = "OffsetFirstIndex";

/// Push-constant byte offsets of the first vertex and first instance
/// values. `None` leaves the corresponding builtin untouched.
#[derive(Clone, Debug, Default)]
pub struct OffsetFirstIndexConfig {
    pub first_vertex_offset: Option<u32>,
    pub first_instance_offset: Option<u32>,
}

#[derive(Debug)]
pub struct OffsetFirstIndex;

const VERTEX_MEMBER: &str = "first_vertex";
const INSTANCE_MEMBER: &str = "first_instance";

/// How an entry point reads one builtin.
#[derive(Clone, Copy, PartialEq)]
enum Source {
    Argument(u32),
    Member(u32, u32),
}

fn sources(module: &Module, func: &tinct_ir::Function, builtin: BuiltIn) -> Vec<Source> {
    let wanted = Some(Binding::BuiltIn(builtin));
    let mut out = Vec::new();
    for (i, arg) in func.arguments.iter().enumerate() {
        if arg.binding == wanted {
            out.push(Source::Argument(i as u32));
        } else if let TypeInner::Struct { ref members, .. } = module.types[arg.ty].inner {
            out.extend(
                members
                    .iter()
                    .enumerate()
                    .filter(|(_, m)| m.binding == wanted)
                    .map(|(m, _)| Source::Member(i as u32, m as u32)),
            );
        }
    }
    out
}

fn has_member(module: &Module, name: &str) -> bool {
    module.global_variables.iter().any(|(_, v)| {
        v.space == tinct_ir::AddressSpace::PushConstant
            && matches!(
                module.types[v.ty].inner,
                TypeInner::Struct { ref members, .. } if members.iter().any(|m| m.name == name)
            )
    })
}

impl OffsetFirstIndexConfig {
    fn wanted(&self) -> Vec<(BuiltIn, &'static str, u32)> {
        let mut out = Vec::new();
        if let Some(offset) = self.first_vertex_offset {
            out.push((BuiltIn::VertexIndex, VERTEX_MEMBER, offset));
        }
        if let Some(offset) = self.first_instance_offset {
            out.push((BuiltIn::InstanceIndex, INSTANCE_MEMBER, offset));
        }
        out
    }
}

impl Transform for OffsetFirstIndex {
    fn name(&self) -> &'static str {
        NAME
    }

    fn should_run(&self, module: &Module, inputs: &DataMap) -> bool {
        let Some(cfg) = inputs.get::<OffsetFirstIndexConfig>() else {
            return false;
        };
        cfg.wanted().into_iter().any(|(builtin, member, _)| {
            !has_member(module, member)
                && module.entry_points().any(|(_, f)| {
                    f.stage() == Some(ShaderStage::Vertex) && !sources(module, f, builtin).is_empty()
                })
        })
    }

    fn apply(
        &self,
        module: &Module,
        inputs: &DataMap,
        _outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let cfg = inputs
            .get::<OffsetFirstIndexConfig>()
            .ok_or_else(|| TransformError::missing(NAME, "OffsetFirstIndexConfig"))?;
        let mut out = module.clone();
        let u32_ty = out.scalar_type(Scalar::U32);

        let wanted: Vec<_> = cfg
            .wanted()
            .into_iter()
            .filter(|&(builtin, _, _)| {
                out.entry_points().any(|(_, f)| {
                    f.stage() == Some(ShaderStage::Vertex) && !sources(&out, f, builtin).is_empty()
                })
            })
            .collect();
        for &(_, member, offset) in &wanted {
            push_constants::member(&mut out, NAME, member, u32_ty, offset)?;
        }
        // Indices are only final once every member is in place.
        let mut offsets = Vec::new();
        for &(builtin, member, offset) in &wanted {
            let (var, index) = push_constants::member(&mut out, NAME, member, u32_ty, offset)?;
            offsets.push((builtin, push_constants::load(var, index)));
        }

        for_each_function(&mut out, |module, _, func| {
            if func.stage() != Some(ShaderStage::Vertex) {
                return Ok(());
            }
            for (builtin, value) in &offsets {
                let sources = sources(module, func, *builtin);
                tinct_ir::rewrite_all_exprs(&mut func.body, &mut |e| {
                    let source = match *e {
                        Expression::FunctionArgument(i) => Source::Argument(i),
                        Expression::AccessIndex { ref base, index } => match **base {
                            Expression::FunctionArgument(i) => Source::Member(i, index),
                            _ => return,
                        },
                        _ => return,
                    };
                    if sources.contains(&source) {
                        let read = std::mem::replace(e, Expression::u32(0));
                        *e = Expression::binary(BinaryOp::Add, read, value.clone());
                    }
                });
            }
            Ok(())
        })?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{EntryPoint, Function, FunctionArgument, FunctionResult, VectorSize};

    fn vertex_module() -> Module {
        let mut module = Module::default();
        let u32_ty = module.scalar_type(Scalar::U32);
        let vec4 = module.vector_type(VectorSize::Quad, Scalar::F32);
        let f32_ty = module.scalar_type(Scalar::F32);
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::graphics(ShaderStage::Vertex));
        main.arguments = vec![
            FunctionArgument {
                name: "vid".into(),
                ty: u32_ty,
                binding: Some(Binding::BuiltIn(BuiltIn::VertexIndex)),
            },
            FunctionArgument {
                name: "iid".into(),
                ty: u32_ty,
                binding: Some(Binding::BuiltIn(BuiltIn::InstanceIndex)),
            },
        ];
        main.result = Some(FunctionResult {
            ty: vec4,
            binding: Some(Binding::BuiltIn(BuiltIn::Position { invariant: false })),
        });
        let x = Expression::convert(
            Expression::binary(
                BinaryOp::Add,
                Expression::FunctionArgument(0),
                Expression::FunctionArgument(1),
            ),
            f32_ty,
        );
        main.body = vec![tinct_ir::Statement::Return {
            value: Some(Expression::Compose {
                ty: vec4,
                components: vec![x, Expression::f32(0.0), Expression::f32(0.0), Expression::f32(1.0)],
            }),
        }];
        module.functions.append(main);
        module
    }

    #[test]
    fn builtins_are_offset_through_push_constants() {
        let module = vertex_module();
        let mut inputs = DataMap::new();
        inputs.insert(OffsetFirstIndexConfig {
            first_vertex_offset: Some(4),
            first_instance_offset: Some(0),
        });
        assert!(OffsetFirstIndex.should_run(&module, &inputs));
        let out = OffsetFirstIndex
            .apply(&module, &inputs, &mut DataMap::new())
            .unwrap();
        tinct_ir::validate(&out).unwrap();
        let text = tinct_ir::dump_module(&out);
        assert!(text.contains("@offset(0) first_instance: u32,"), "{text}");
        assert!(text.contains("@offset(4) first_vertex: u32,"), "{text}");
        assert!(
            text.contains("f32(((vid + push_constants.first_vertex) + (iid + push_constants.first_instance)))"),
            "{text}"
        );
        assert!(!OffsetFirstIndex.should_run(&out, &inputs));
    }

    #[test]
    fn missing_config_means_nothing_to_do() {
        let module = vertex_module();
        assert!(!OffsetFirstIndex.should_run(&module, &DataMap::new()));
        let err = OffsetFirstIndex
            .apply(&module, &DataMap::new(), &mut DataMap::new())
            .unwrap_err();
        assert!(matches!(err, TransformError::MissingData { .. }));
    }
}
