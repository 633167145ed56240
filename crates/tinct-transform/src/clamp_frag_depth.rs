//! Clamps fragment depth outputs to the viewport depth range, which some
//! targets do not do for shader-written depth.

use std::collections::HashMap;

use tinct_ir::{
    Binding, BuiltIn, BuiltinFn, Expression, Function, FunctionArgument, FunctionResult, Handle,
    Module, Scalar, ShaderStage, Statement, Type, TypeInner,
};

use crate::push_constants;
use crate::util::{flat_map_stmts, for_each_function};
use crate::{DataMap, Transform, TransformError};

const NAME: &str = "ClampFragDepth";

/// Push-constant byte offsets of the depth range bounds.
#[derive(Clone, Copy, Debug)]
pub struct ClampFragDepthConfig {
    pub min_depth_offset: u32,
    pub max_depth_offset: u32,
}

#[derive(Debug)]
pub struct ClampFragDepth;

const FRAG_DEPTH: Option<Binding> = Some(Binding::BuiltIn(BuiltIn::FragDepth));

/// Where a fragment entry point writes its depth.
enum DepthOutput {
    Direct,
    /// Member index of a struct result.
    Member(Handle<Type>, u32),
}

fn depth_output(module: &Module, func: &Function) -> Option<DepthOutput> {
    if func.stage() != Some(ShaderStage::Fragment) {
        return None;
    }
    let result = func.result.as_ref()?;
    if result.binding == FRAG_DEPTH {
        return Some(DepthOutput::Direct);
    }
    match module.types[result.ty].inner {
        TypeInner::Struct { ref members, .. } => members
            .iter()
            .position(|m| m.binding == FRAG_DEPTH)
            .map(|i| DepthOutput::Member(result.ty, i as u32)),
        _ => None,
    }
}

fn unary_helper(name: String, ty: Handle<Type>, body: Expression) -> Function {
    let mut f = Function::new(name);
    f.arguments = vec![FunctionArgument {
        name: "v".into(),
        ty,
        binding: None,
    }];
    f.result = Some(FunctionResult { ty, binding: None });
    f.body = vec![Statement::Return { value: Some(body) }];
    f
}

/// `fn clamp_frag_depth_S(v: S) -> S`, rebuilding `v` with its depth
/// member passed through `clamp`.
fn struct_helper(
    module: &mut Module,
    clamp: Handle<Function>,
    ty: Handle<Type>,
    depth: u32,
) -> Handle<Function> {
    let count = match module.types[ty].inner {
        TypeInner::Struct { ref members, .. } => members.len() as u32,
        _ => 0,
    };
    let components = (0..count)
        .map(|i| {
            let m = Expression::access_index(Expression::FunctionArgument(0), i);
            if i == depth {
                Expression::call(clamp, vec![m])
            } else {
                m
            }
        })
        .collect();
    let struct_name = module.types[ty].name.clone().unwrap_or_default();
    let name = module.fresh_name(&format!("clamp_frag_depth_{struct_name}"));
    let body = Expression::Compose { ty, components };
    module.functions.append(unary_helper(name, ty, body))
}

impl Transform for ClampFragDepth {
    fn name(&self) -> &'static str {
        NAME
    }

    fn should_run(&self, module: &Module, inputs: &DataMap) -> bool {
        inputs.get::<ClampFragDepthConfig>().is_some()
            && module.function_by_name("clamp_frag_depth").is_none()
            && module
                .entry_points()
                .any(|(_, f)| depth_output(module, f).is_some())
    }

    fn apply(
        &self,
        module: &Module,
        inputs: &DataMap,
        _outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let cfg = inputs
            .get::<ClampFragDepthConfig>()
            .ok_or_else(|| TransformError::missing(NAME, "ClampFragDepthConfig"))?;
        let mut out = module.clone();
        let f32_ty = out.scalar_type(Scalar::F32);
        let bounds = [
            ("min_depth", cfg.min_depth_offset),
            ("max_depth", cfg.max_depth_offset),
        ];
        for (member, offset) in bounds {
            push_constants::member(&mut out, NAME, member, f32_ty, offset)?;
        }
        // Inserting a member shifts the ones after it; index both once both exist.
        let (pc, min) = push_constants::member(&mut out, NAME, bounds[0].0, f32_ty, bounds[0].1)?;
        let (_, max) = push_constants::member(&mut out, NAME, bounds[1].0, f32_ty, bounds[1].1)?;

        let name = out.fresh_name("clamp_frag_depth");
        let clamp = Expression::builtin(
            BuiltinFn::Clamp,
            vec![
                Expression::FunctionArgument(0),
                push_constants::load(pc, min),
                push_constants::load(pc, max),
            ],
        );
        let helper = out.functions.append(unary_helper(name, f32_ty, clamp));

        let outputs: Vec<_> = out
            .entry_points()
            .filter_map(|(h, f)| depth_output(&out, f).map(|d| (h, d)))
            .collect();
        let mut struct_helpers = HashMap::new();
        let mut wrappers = HashMap::new();
        for (ep, output) in outputs {
            let wrapper = match output {
                DepthOutput::Direct => helper,
                DepthOutput::Member(ty, index) => *struct_helpers
                    .entry(ty)
                    .or_insert_with(|| struct_helper(&mut out, helper, ty, index)),
            };
            wrappers.insert(ep, wrapper);
        }

        for_each_function(&mut out, |_, h, func| {
            let Some(&wrapper) = wrappers.get(&h) else {
                return Ok(());
            };
            flat_map_stmts::<TransformError>(&mut func.body, &mut |stmt, out| {
                out.push(match stmt {
                    Statement::Return { value: Some(v) } => Statement::Return {
                        value: Some(Expression::call(wrapper, vec![v])),
                    },
                    other => other,
                });
                Ok(())
            })
        })?;
        Ok(out)
    }
}
