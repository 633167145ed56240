//! Clamps indices and texel coordinates so that out-of-bounds accesses
//! stay inside the accessed object.

use tinct_ir::{
    AddressSpace, BinaryOp, BuiltinFn, Expression, Function, Literal, Module, Scalar, ScalarKind,
    TextureCall, TextureFn, TypeInner,
};

use crate::util::{
    eval_literal, for_each_function, inner_of, literal_as_u32, min, numeric_shape, shaped_type,
    splat, try_rewrite,
};
use crate::{DataMap, Transform, TransformError};

/// Which accesses [`Robustness`] leaves unclamped.
#[derive(Clone, Debug, Default)]
pub struct RobustnessConfig {
    /// Address spaces whose accesses are trusted. Indexing of values
    /// counts as the `function` space.
    pub disabled_spaces: Vec<AddressSpace>,
    /// Skip clamping of texture loads and stores.
    pub disable_image: bool,
}

#[derive(Debug)]
pub struct Robustness;

enum Bound {
    Constant(u32),
    /// A runtime-sized array, bounded by `arrayLength`.
    Runtime,
}

fn bound_of(
    module: &Module,
    func: &Function,
    base: &Expression,
    cfg: &RobustnessConfig,
) -> Result<Option<Bound>, TransformError> {
    let (space, shape) = match inner_of(module, func, base)? {
        TypeInner::Pointer { base, space, .. } => (space, module.types[base].inner.clone()),
        TypeInner::ValuePointer {
            size: Some(size),
            scalar,
            space,
            ..
        } => (space, TypeInner::Vector { size, scalar }),
        other => (AddressSpace::Function, other),
    };
    if cfg.disabled_spaces.contains(&space) {
        return Ok(None);
    }
    Ok(match shape {
        TypeInner::Vector { size, .. } => Some(Bound::Constant(size.count())),
        TypeInner::Matrix { columns, .. } => Some(Bound::Constant(columns.count())),
        TypeInner::Array {
            size: tinct_ir::ArraySize::Constant(n),
            ..
        } => Some(Bound::Constant(n)),
        TypeInner::Array { .. } => Some(Bound::Runtime),
        _ => None,
    })
}

/// `true` for an index this pass has already clamped against `bound`.
fn is_clamped(index: &Expression, bound: &Bound) -> bool {
    let Expression::Builtin {
        fun: BuiltinFn::Min,
        arguments,
    } = index
    else {
        return false;
    };
    match (bound, arguments.last()) {
        (Bound::Constant(n), Some(Expression::Literal(Literal::U32(v)))) => v < n,
        (Bound::Runtime, Some(Expression::Binary { left, .. })) => matches!(
            **left,
            Expression::Builtin {
                fun: BuiltinFn::ArrayLength,
                ..
            }
        ),
        _ => false,
    }
}

fn constant_in_bounds(index: &Expression, n: u32) -> bool {
    eval_literal(index)
        .and_then(literal_as_u32)
        .is_some_and(|i| i < n)
}

/// Whether `expr` is an access or texel operation that still needs a clamp.
fn needs_clamp(module: &Module, func: &Function, cfg: &RobustnessConfig, expr: &Expression) -> bool {
    match expr {
        Expression::Access { base, index } => match bound_of(module, func, base, cfg) {
            Ok(Some(Bound::Constant(n))) => {
                !constant_in_bounds(index, n) && !is_clamped(index, &Bound::Constant(n))
            }
            Ok(Some(Bound::Runtime)) => !is_clamped(index, &Bound::Runtime),
            Ok(None) => false,
            Err(_) => true,
        },
        Expression::Texture(call) if !cfg.disable_image => {
            let unclamped = |operand: &Option<Expression>, query: TextureFn| {
                operand.as_ref().is_some_and(|e| !is_clamped_by(e, query))
            };
            matches!(call.fun, TextureFn::Load | TextureFn::Store)
                && matches!(inner_of(module, func, &call.texture), Ok(TypeInner::Texture { .. }))
                && (unclamped(&call.level, TextureFn::NumLevels)
                    || unclamped(&call.array_index, TextureFn::NumLayers)
                    || unclamped(&call.coords, TextureFn::Dimensions))
        }
        _ => false,
    }
}

/// `true` for a texture operand already clamped by a `query` of the texture.
fn is_clamped_by(expr: &Expression, query: TextureFn) -> bool {
    match expr {
        Expression::Builtin {
            fun: BuiltinFn::Min | BuiltinFn::Clamp,
            arguments,
        } => arguments.last().is_some_and(|hi| {
            hi.any(&mut |e| matches!(e, Expression::Texture(call) if call.fun == query))
        }),
        _ => false,
    }
}

/// `expr` as a `u32` scalar.
fn to_u32(
    module: &mut Module,
    func: &Function,
    expr: Expression,
) -> Result<Expression, TransformError> {
    match inner_of(module, func, &expr)? {
        TypeInner::Scalar(Scalar {
            kind: ScalarKind::Uint,
            ..
        }) => Ok(expr),
        _ => {
            let u32_ty = module.scalar_type(Scalar::U32);
            Ok(Expression::convert(expr, u32_ty))
        }
    }
}

fn minus_one(e: Expression) -> Expression {
    Expression::binary(BinaryOp::Subtract, e, Expression::u32(1))
}

fn query(fun: TextureFn, texture: &Expression, level: Option<Expression>) -> Expression {
    let mut call = TextureCall::new(fun, texture.clone());
    call.level = level;
    Expression::Texture(Box::new(call))
}

fn clamp_index(
    module: &mut Module,
    func: &Function,
    cfg: &RobustnessConfig,
    base: &Expression,
    index: &mut Expression,
) -> Result<(), TransformError> {
    let Some(bound) = bound_of(module, func, base, cfg)? else {
        return Ok(());
    };
    if is_clamped(index, &bound) {
        return Ok(());
    }
    let limit = match bound {
        Bound::Constant(n) => {
            if constant_in_bounds(index, n) {
                return Ok(());
            }
            Expression::u32(n - 1)
        }
        Bound::Runtime => minus_one(Expression::builtin(BuiltinFn::ArrayLength, vec![base.clone()])),
    };
    let i = std::mem::replace(index, Expression::u32(0));
    *index = min(to_u32(module, func, i)?, limit);
    Ok(())
}

fn clamp_texel(
    module: &mut Module,
    func: &Function,
    call: &mut TextureCall,
) -> Result<(), TransformError> {
    if !matches!(call.fun, TextureFn::Load | TextureFn::Store) {
        return Ok(());
    }
    if !matches!(inner_of(module, func, &call.texture)?, TypeInner::Texture { .. }) {
        return Ok(());
    }

    if let Some(level) = call.level.take() {
        call.level = Some(if is_clamped_by(&level, TextureFn::NumLevels) {
            level
        } else {
            let levels = query(TextureFn::NumLevels, &call.texture, None);
            min(to_u32(module, func, level)?, minus_one(levels))
        });
    }
    if let Some(layer) = call.array_index.take() {
        call.array_index = Some(if is_clamped_by(&layer, TextureFn::NumLayers) {
            layer
        } else {
            let layers = query(TextureFn::NumLayers, &call.texture, None);
            min(to_u32(module, func, layer)?, minus_one(layers))
        });
    }
    if let Some(coords) = call.coords.take() {
        call.coords = Some(if is_clamped_by(&coords, TextureFn::Dimensions) {
            coords
        } else {
            let Some((scalar, size)) = numeric_shape(&inner_of(module, func, &coords)?) else {
                return Err(TransformError::ice("Robustness", "texel coordinates are not numeric"));
            };
            let dims = query(TextureFn::Dimensions, &call.texture, call.level.clone());
            let hi = Expression::binary(BinaryOp::Subtract, dims, splat(Literal::U32(1), size));
            if scalar.kind == ScalarKind::Uint {
                min(coords, hi)
            } else {
                let ity = shaped_type(module, Scalar::I32, size);
                Expression::builtin(
                    BuiltinFn::Clamp,
                    vec![coords, splat(Literal::I32(0), size), Expression::convert(hi, ity)],
                )
            }
        });
    }
    Ok(())
}

impl Transform for Robustness {
    fn name(&self) -> &'static str {
        "Robustness"
    }

    fn should_run(&self, module: &Module, inputs: &DataMap) -> bool {
        let default = RobustnessConfig::default();
        let cfg = inputs.get::<RobustnessConfig>().unwrap_or(&default);
        module.functions.iter().any(|(_, f)| {
            let mut found = false;
            tinct_ir::walk_all_exprs(&f.body, &mut |e| found |= needs_clamp(module, f, cfg, e));
            found
        })
    }

    fn apply(
        &self,
        module: &Module,
        inputs: &DataMap,
        _outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let default = RobustnessConfig::default();
        let cfg = inputs.get::<RobustnessConfig>().unwrap_or(&default);
        let mut out = module.clone();
        for_each_function(&mut out, |module, _, func| {
            let mut body = std::mem::take(&mut func.body);
            let mut result = Ok(());
            tinct_ir::walk_exprs_mut(&mut body, &mut |root| {
                if result.is_err() {
                    return;
                }
                result = try_rewrite(root, &mut |e| match e {
                    Expression::Access { base, index } => clamp_index(module, func, cfg, base, index),
                    Expression::Texture(call) if !cfg.disable_image => clamp_texel(module, func, call),
                    _ => Ok(()),
                });
            });
            func.body = body;
            result
        })?;
        Ok(out)
    }

    fn requires(&self) -> &'static [&'static str] {
        &["PromoteSideEffectsToDecl"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{
        EntryPoint, FunctionArgument, GlobalVariable, LocalKind, SampledKind, Statement,
        StorageAccess, TextureClass, TextureDimension, VectorSize,
    };

    fn arg(name: &str, ty: tinct_ir::Handle<tinct_ir::Type>) -> FunctionArgument {
        FunctionArgument {
            name: name.into(),
            ty,
            binding: None,
        }
    }

    fn run(module: &Module, inputs: &DataMap) -> Module {
        let out = Robustness
            .apply(module, inputs, &mut DataMap::new())
            .unwrap();
        tinct_ir::validate(&out).unwrap();
        assert!(!Robustness.should_run(&out, inputs));
        out
    }

    /// `fn f(i: i32) { var arr: array<f32, 4>; let x = arr[i]; let y = arr[2u]; }`
    fn local_array_module() -> Module {
        let mut module = Module::default();
        let f32_ty = module.scalar_type(Scalar::F32);
        let i32_ty = module.scalar_type(Scalar::I32);
        let arr_ty = module.array_type(f32_ty, 4);
        let mut f = Function::new("f");
        f.arguments = vec![arg("i", i32_ty)];
        let arr = f.add_local("arr", arr_ty, LocalKind::Var);
        let x = f.add_local("x", f32_ty, LocalKind::Let);
        let y = f.add_local("y", f32_ty, LocalKind::Let);
        f.body = vec![
            Statement::Declare {
                local: arr,
                init: None,
            },
            Statement::Declare {
                local: x,
                init: Some(Expression::load(Expression::access(
                    Expression::LocalVariable(arr),
                    Expression::FunctionArgument(0),
                ))),
            },
            Statement::Declare {
                local: y,
                init: Some(Expression::load(Expression::access(
                    Expression::LocalVariable(arr),
                    Expression::u32(2),
                ))),
            },
        ];
        module.functions.append(f);
        module
    }

    #[test]
    fn fixed_size_index_is_clamped() {
        let module = local_array_module();
        let out = run(&module, &DataMap::new());
        let text = tinct_ir::dump_module(&out);
        assert!(text.contains("let x: f32 = arr[min(u32(i), 3u)];"), "{text}");
        assert!(text.contains("let y: f32 = arr[2u];"), "{text}");

        let again = run(&out, &DataMap::new());
        assert_eq!(again, out);
    }

    #[test]
    fn already_clamped_index_is_left_alone() {
        let mut module = Module::default();
        let u32_ty = module.scalar_type(Scalar::U32);
        let arr_ty = module.array_type(u32_ty, 8);
        let sb = module.global_variables.append(
            GlobalVariable::new("sb", AddressSpace::Storage, arr_ty)
                .with_binding(0, 0)
                .with_access(StorageAccess::LOAD_STORE),
        );
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::compute(1, 1, 1));
        main.arguments = vec![arg("i", u32_ty)];
        main.arguments[0].binding = Some(tinct_ir::Binding::BuiltIn(
            tinct_ir::BuiltIn::LocalInvocationIndex,
        ));
        main.body = vec![Statement::store(
            Expression::access(
                Expression::GlobalVariable(sb),
                min(Expression::FunctionArgument(0), Expression::u32(7)),
            ),
            Expression::u32(1),
        )];
        module.functions.append(main);
        assert!(!Robustness.should_run(&module, &DataMap::new()));

        let local = local_array_module();
        assert!(Robustness.should_run(&local, &DataMap::new()));
        let mut inputs = DataMap::new();
        inputs.insert(RobustnessConfig {
            disabled_spaces: vec![AddressSpace::Function],
            disable_image: false,
        });
        assert!(!Robustness.should_run(&local, &inputs));
    }

    #[test]
    fn disabled_space_is_trusted() {
        let module = local_array_module();
        let mut inputs = DataMap::new();
        inputs.insert(RobustnessConfig {
            disabled_spaces: vec![AddressSpace::Function],
            disable_image: false,
        });
        assert_eq!(run(&module, &inputs), module);
    }

    #[test]
    fn runtime_array_uses_array_length() {
        let mut module = Module::default();
        let u32_ty = module.scalar_type(Scalar::U32);
        let arr_ty = module.runtime_array_type(u32_ty);
        let data = module.global_variables.append(
            GlobalVariable::new("data", AddressSpace::Storage, arr_ty)
                .with_binding(0, 0)
                .with_access(StorageAccess::LOAD_STORE),
        );
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::compute(1, 1, 1));
        main.body = vec![Statement::store(
            Expression::access(Expression::GlobalVariable(data), Expression::u32(7)),
            Expression::u32(1),
        )];
        module.functions.append(main);
        let text = tinct_ir::dump_module(&run(&module, &DataMap::new()));
        assert!(
            text.contains("data[min(7u, (arrayLength(&data) - 1u))] = 1u;"),
            "{text}"
        );
    }

    #[test]
    fn texture_load_clamps_coords_and_level() {
        let mut module = Module::default();
        let i32_ty = module.scalar_type(Scalar::I32);
        let coords_ty = module.vector_type(VectorSize::Bi, Scalar::I32);
        let tex_ty = module.insert_type(TypeInner::Texture {
            dim: TextureDimension::D2,
            class: TextureClass::Sampled(SampledKind::Float),
        });
        let t = module
            .global_variables
            .append(GlobalVariable::new("t", AddressSpace::Handle, tex_ty).with_binding(0, 0));
        let mut load = TextureCall::new(TextureFn::Load, Expression::GlobalVariable(t));
        load.coords = Some(Expression::FunctionArgument(0));
        load.level = Some(Expression::FunctionArgument(1));
        let vec4 = module.vector_type(VectorSize::Quad, Scalar::F32);
        let mut f = Function::new("f");
        f.arguments = vec![arg("coords", coords_ty), arg("level", i32_ty)];
        f.result = Some(tinct_ir::FunctionResult {
            ty: vec4,
            binding: None,
        });
        f.body = vec![Statement::Return {
            value: Some(Expression::Texture(Box::new(load))),
        }];
        module.functions.append(f);

        let out = run(&module, &DataMap::new());
        let text = tinct_ir::dump_module(&out);
        assert!(
            text.contains("min(u32(level), (textureNumLevels(t) - 1u))"),
            "{text}"
        );
        assert!(
            text.contains("clamp(coords, vec2(0i), vec2<i32>((textureDimensions(t, min(u32(level)"),
            "{text}"
        );
        assert_eq!(run(&out, &DataMap::new()), out);

        let mut inputs = DataMap::new();
        inputs.insert(RobustnessConfig {
            disabled_spaces: Vec::new(),
            disable_image: true,
        });
        assert_eq!(run(&module, &inputs), module);
    }
}
