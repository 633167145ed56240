//! Rewrites 1D textures as 2D textures one texel high, since GLSL ES has
//! no 1D samplers or images.

use tinct_ir::{
    Expression, Function, Handle, Module, ResolveContext, Scalar, ScalarKind, TextureDimension,
    TextureFn, Type, TypeInner, VectorSize,
};
use tinct_transform::util::{for_each_function, try_rewrite};
use tinct_transform::{DataMap, Transform, TransformError};

const NAME: &str = "Texture1DTo2D";

#[derive(Debug)]
pub struct Texture1DTo2D;

fn is_1d(inner: &TypeInner) -> bool {
    matches!(
        inner,
        TypeInner::Texture {
            dim: TextureDimension::D1,
            ..
        }
    )
}

struct Vec2Types {
    f32: Handle<Type>,
    i32: Handle<Type>,
    u32: Handle<Type>,
}

impl Vec2Types {
    fn of(&self, kind: ScalarKind) -> Handle<Type> {
        match kind {
            ScalarKind::Sint => self.i32,
            ScalarKind::Uint => self.u32,
            _ => self.f32,
        }
    }
}

fn widen(ty: Handle<Type>, x: Expression, y: Expression) -> Expression {
    Expression::Compose {
        ty,
        components: vec![x, y],
    }
}

fn rewrite_function(
    module: &Module,
    func: &mut Function,
    vec2: &Vec2Types,
) -> Result<(), TransformError> {
    let mut body = std::mem::take(&mut func.body);
    let ctx = ResolveContext::new(module, func);
    let mut result: Result<(), tinct_ir::IrError> = Ok(());
    tinct_ir::walk_exprs_mut(&mut body, &mut |root| {
        if result.is_err() {
            return;
        }
        result = try_rewrite(root, &mut |e| {
            let Expression::Texture(call) = e else {
                return Ok(());
            };
            if !is_1d(&ctx.resolve_inner(&call.texture)?) {
                return Ok(());
            }
            match call.fun {
                TextureFn::Sample => {
                    if let Some(c) = call.coords.take() {
                        call.coords = Some(widen(vec2.f32, c, Expression::f32(0.5)));
                    }
                }
                TextureFn::Load | TextureFn::Store => {
                    if let Some(c) = call.coords.take() {
                        let kind = ctx.resolve_inner(&c)?.scalar_kind().unwrap_or(ScalarKind::Sint);
                        let zero = match kind {
                            ScalarKind::Uint => Expression::u32(0),
                            _ => Expression::i32(0),
                        };
                        call.coords = Some(widen(vec2.of(kind), c, zero));
                    }
                }
                TextureFn::Dimensions => {
                    let query = std::mem::replace(e, Expression::u32(0));
                    *e = Expression::access_index(query, 0);
                }
                _ => {}
            }
            Ok(())
        });
    });
    func.body = body;
    result.map_err(TransformError::Ir)
}

impl Transform for Texture1DTo2D {
    fn name(&self) -> &'static str {
        NAME
    }

    fn should_run(&self, module: &Module, _inputs: &DataMap) -> bool {
        module.types.iter().any(|(_, t)| is_1d(&t.inner))
    }

    fn apply(
        &self,
        module: &Module,
        _inputs: &DataMap,
        _outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let mut out = module.clone();
        let vec2 = Vec2Types {
            f32: out.vector_type(VectorSize::Bi, Scalar::F32),
            i32: out.vector_type(VectorSize::Bi, Scalar::I32),
            u32: out.vector_type(VectorSize::Bi, Scalar::U32),
        };
        // Call sites are typed against the 1D textures, so types change last.
        for_each_function(&mut out, |module, _, func| {
            rewrite_function(module, func, &vec2)
        })?;
        out.types.map_in_place(|_, ty| {
            if let TypeInner::Texture { dim, .. } = &mut ty.inner {
                if *dim == TextureDimension::D1 {
                    *dim = TextureDimension::D2;
                }
            }
        });
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{
        AddressSpace, EntryPoint, GlobalVariable, LocalKind, SampledKind, Scalar, Statement,
        TextureCall, TextureClass, VectorSize, dump_module,
    };

    fn module_with_1d_texture() -> Module {
        let mut module = Module::default();
        let tex_ty = module.insert_type(TypeInner::Texture {
            dim: TextureDimension::D1,
            class: TextureClass::Sampled(SampledKind::Float),
        });
        let sampler_ty = module.insert_type(TypeInner::Sampler { comparison: false });
        let tex = module
            .global_variables
            .append(GlobalVariable::new("t", AddressSpace::Handle, tex_ty).with_binding(0, 0));
        let samp = module
            .global_variables
            .append(GlobalVariable::new("s", AddressSpace::Handle, sampler_ty).with_binding(0, 1));
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::graphics(tinct_ir::ShaderStage::Fragment));
        let mut sample = TextureCall::new(TextureFn::Sample, Expression::GlobalVariable(tex));
        sample.sampler = Some(Expression::GlobalVariable(samp));
        sample.coords = Some(Expression::f32(0.25));
        let mut load = TextureCall::new(TextureFn::Load, Expression::GlobalVariable(tex));
        load.coords = Some(Expression::u32(3));
        load.level = Some(Expression::i32(0));
        let dims = TextureCall::new(TextureFn::Dimensions, Expression::GlobalVariable(tex));
        let vec4 = module.vector_type(VectorSize::Quad, Scalar::F32);
        let u32_ty = module.scalar_type(Scalar::U32);
        main.body = [
            ("sampled", vec4, sample),
            ("loaded", vec4, load),
            ("width", u32_ty, dims),
        ]
        .into_iter()
        .map(|(name, ty, call)| {
            let local = main.add_local(name, ty, LocalKind::Let);
            Statement::Declare {
                local,
                init: Some(Expression::Texture(Box::new(call))),
            }
        })
        .collect();
        module.functions.append(main);
        module
    }

    #[test]
    fn coordinates_gain_a_second_component() {
        let module = module_with_1d_texture();
        assert!(Texture1DTo2D.should_run(&module, &DataMap::new()));
        let out = Texture1DTo2D
            .apply(&module, &DataMap::new(), &mut DataMap::new())
            .unwrap();
        tinct_ir::validate(&out).unwrap();
        let text = dump_module(&out);
        assert!(text.contains("var t: texture_2d<f32>;"), "{text}");
        assert!(
            text.contains("textureSample(t, s, vec2<f32>(0.25f, 0.5f))"),
            "{text}"
        );
        assert!(text.contains("textureLoad(t, vec2<u32>(3u, 0u), 0i)"), "{text}");
        assert!(text.contains("textureDimensions(t)[0]"), "{text}");
        assert!(!Texture1DTo2D.should_run(&out, &DataMap::new()));
    }
}
