//! Expands `texture_external` into two planes and a parameter uniform.
//!
//! Each external texture binding becomes the `texture_2d<f32>` luma (or
//! RGBA) plane it already names, an `ext_tex_plane_1` chroma plane and an
//! `ext_tex_params` uniform, at the binding points the host chose for
//! them. Function parameters of external type expand the same way, and
//! `textureLoad` / `textureSampleBaseClampToEdge` become calls of helpers
//! that perform the YUV conversion and gamma correction.

use std::collections::HashMap;

use tinct_ir::{
    AddressSpace, BinaryOp, BindingPoint, BuiltinFn, Expression, Function, FunctionArgument,
    FunctionResult, GlobalVariable, Handle, LocalKind, Module, SampledKind, Scalar, Statement,
    SwizzleComponent, TextureCall, TextureClass, TextureDimension, TextureFn, Type, TypeInner,
    VectorSize, fresh_local_name,
};

use crate::util::{bind_let, for_each_function, select, try_rewrite, type_of, with_function};
use crate::{DataMap, Transform, TransformError};

const NAME: &str = "MultiplanarExternalTexture";

/// Where the second plane and the parameters of one external texture go.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct ExternalTextureBindings {
    pub plane1: BindingPoint,
    pub params: BindingPoint,
}

#[derive(Clone, Debug, Default)]
pub struct MultiplanarExternalTextureConfig {
    /// Keyed by the binding point of the `texture_external` itself.
    pub bindings: HashMap<BindingPoint, ExternalTextureBindings>,
}

#[derive(Debug)]
pub struct MultiplanarExternalTexture;

fn is_external(module: &Module, ty: Handle<Type>) -> bool {
    matches!(
        module.types[ty].inner,
        TypeInner::Texture {
            class: TextureClass::External,
            ..
        }
    )
}

fn swizzle(vector: Expression, pattern: &[SwizzleComponent]) -> Expression {
    Expression::Swizzle {
        vector: Box::new(vector),
        pattern: pattern.to_vec(),
    }
}

fn member(base: Expression, index: u32) -> Expression {
    Expression::access_index(base, index)
}

fn splat(size: VectorSize, value: Expression) -> Expression {
    Expression::Splat {
        size,
        value: Box::new(value),
    }
}

const RGB: [SwizzleComponent; 3] = [SwizzleComponent::X, SwizzleComponent::Y, SwizzleComponent::Z];

// Member indices of the generated structs.
mod gamma {
    pub const G: u32 = 0;
    pub const A: u32 = 1;
    pub const B: u32 = 2;
    pub const C: u32 = 3;
    pub const D: u32 = 4;
    pub const E: u32 = 5;
    pub const F: u32 = 6;
}

mod params {
    pub const NUM_PLANES: u32 = 0;
    pub const YUV_ONLY: u32 = 1;
    pub const YUV_TO_RGB: u32 = 2;
    pub const GAMMA_DECODE: u32 = 3;
    pub const GAMMA_ENCODE: u32 = 4;
    pub const GAMUT: u32 = 5;
    pub const COORD_TRANSFORM: u32 = 6;
}

/// Generated declarations shared by every expanded texture.
struct Helpers {
    plane: Handle<Type>,
    params: Handle<Type>,
    gamma_params: Handle<Type>,
    gamma_correction: Option<Handle<Function>>,
    /// `texture_load_external`, one per coordinate type.
    load: HashMap<Handle<Type>, Handle<Function>>,
    sample: Option<Handle<Function>>,
}

impl Helpers {
    fn new(module: &mut Module) -> Self {
        let f32_ty = module.scalar_type(Scalar::F32);
        let u32_ty = module.scalar_type(Scalar::U32);
        let gamma_name = module.fresh_name("GammaTransferParams");
        let gamma_params = module.struct_type(
            &gamma_name,
            &[
                ("g", f32_ty),
                ("a", f32_ty),
                ("b", f32_ty),
                ("c", f32_ty),
                ("d", f32_ty),
                ("e", f32_ty),
                ("f", f32_ty),
                ("padding", u32_ty),
            ],
        );
        let mat3x4 = module.matrix_type(VectorSize::Tri, VectorSize::Quad, Scalar::F32);
        let mat3x3 = module.matrix_type(VectorSize::Tri, VectorSize::Tri, Scalar::F32);
        let mat3x2 = module.matrix_type(VectorSize::Tri, VectorSize::Bi, Scalar::F32);
        let params_name = module.fresh_name("ExternalTextureParams");
        let params = module.struct_type(
            &params_name,
            &[
                ("num_planes", u32_ty),
                ("do_yuv_to_rgb_conversion_only", u32_ty),
                ("yuv_to_rgb_conversion_matrix", mat3x4),
                ("gamma_decode_params", gamma_params),
                ("gamma_encode_params", gamma_params),
                ("gamut_conversion_matrix", mat3x3),
                ("coord_transformation_matrix", mat3x2),
            ],
        );
        let plane = module.insert_type(TypeInner::Texture {
            dim: TextureDimension::D2,
            class: TextureClass::Sampled(SampledKind::Float),
        });
        Self {
            plane,
            params,
            gamma_params,
            gamma_correction: None,
            load: HashMap::new(),
            sample: None,
        }
    }

    fn signature(&self, module: &mut Module, name: &str, args: &[(&str, Handle<Type>)]) -> Function {
        let vec4 = module.vector_type(VectorSize::Quad, Scalar::F32);
        let mut func = Function::new(module.fresh_name(name));
        func.arguments = args
            .iter()
            .map(|&(name, ty)| FunctionArgument {
                name: name.into(),
                ty,
                binding: None,
            })
            .collect();
        func.result = Some(FunctionResult {
            ty: vec4,
            binding: None,
        });
        func
    }

    /// `gamma_correction(v, params)`: the piecewise transfer function the
    /// host describes in `GammaTransferParams`.
    fn gamma_correction(&mut self, module: &mut Module) -> Result<Handle<Function>, TransformError> {
        if let Some(h) = self.gamma_correction {
            return Ok(h);
        }
        let vec3 = module.vector_type(VectorSize::Tri, Scalar::F32);
        let mut func = Function::new(module.fresh_name("gamma_correction"));
        func.arguments = vec![
            FunctionArgument {
                name: "v".into(),
                ty: vec3,
                binding: None,
            },
            FunctionArgument {
                name: "params".into(),
                ty: self.gamma_params,
                binding: None,
            },
        ];
        func.result = Some(FunctionResult {
            ty: vec3,
            binding: None,
        });
        let v = || Expression::FunctionArgument(0);
        let p = |k| member(Expression::FunctionArgument(1), k);
        let abs_v = || Expression::builtin(BuiltinFn::Abs, vec![v()]);
        let sign_v = || Expression::builtin(BuiltinFn::Sign, vec![v()]);

        let mut body = Vec::new();
        let cond = bind_let(
            module,
            &mut func,
            "cond",
            Expression::binary(BinaryOp::Less, abs_v(), splat(VectorSize::Tri, p(gamma::D))),
            &mut body,
        )?;
        let t = bind_let(
            module,
            &mut func,
            "t",
            Expression::binary(
                BinaryOp::Multiply,
                sign_v(),
                Expression::binary(
                    BinaryOp::Add,
                    Expression::binary(BinaryOp::Multiply, p(gamma::C), abs_v()),
                    splat(VectorSize::Tri, p(gamma::F)),
                ),
            ),
            &mut body,
        )?;
        let base = Expression::binary(
            BinaryOp::Add,
            Expression::binary(BinaryOp::Multiply, p(gamma::A), abs_v()),
            splat(VectorSize::Tri, p(gamma::B)),
        );
        let f = bind_let(
            module,
            &mut func,
            "f",
            Expression::binary(
                BinaryOp::Add,
                Expression::binary(
                    BinaryOp::Multiply,
                    sign_v(),
                    Expression::builtin(
                        BuiltinFn::Pow,
                        vec![base, splat(VectorSize::Tri, p(gamma::G))],
                    ),
                ),
                splat(VectorSize::Tri, p(gamma::E)),
            ),
            &mut body,
        )?;
        body.push(Statement::Return {
            value: Some(select(f, t, cond)),
        });
        func.body = body;
        let h = module.functions.append(func);
        self.gamma_correction = Some(h);
        Ok(h)
    }

    /// The shared tail of both helpers. Single-plane textures are RGBA in
    /// `plane0`; otherwise `plane0` holds Y and `plane1` holds UV, converted
    /// to RGB before the gamut conversion between gamma decode and encode.
    fn convert(
        &mut self,
        module: &mut Module,
        func: &mut Function,
        params_arg: u32,
        plane0: Expression,
        plane1: Expression,
        body: &mut Vec<Statement>,
    ) -> Result<(), TransformError> {
        let gamma = self.gamma_correction(module)?;
        let vec4 = module.vector_type(VectorSize::Quad, Scalar::F32);
        let color = func.add_local(fresh_local_name(func, "color"), vec4, LocalKind::Var);
        let color_ptr = || Expression::LocalVariable(color);
        let color_value = || Expression::load(Expression::LocalVariable(color));
        let params = |k| member(Expression::FunctionArgument(params_arg), k);

        let yuv = Expression::Compose {
            ty: vec4,
            components: vec![
                member(plane0.clone(), 0),
                swizzle(plane1, &[SwizzleComponent::X, SwizzleComponent::Y]),
                Expression::f32(1.0),
            ],
        };
        let rgb = Expression::binary(BinaryOp::Multiply, yuv, params(params::YUV_TO_RGB));
        body.push(Statement::Declare {
            local: color,
            init: None,
        });
        body.push(Statement::If {
            condition: Expression::binary(
                BinaryOp::Equal,
                params(params::NUM_PLANES),
                Expression::u32(1),
            ),
            accept: vec![Statement::store(color_ptr(), plane0)],
            reject: vec![Statement::store(
                color_ptr(),
                Expression::Compose {
                    ty: vec4,
                    components: vec![rgb, Expression::f32(1.0)],
                },
            )],
        });

        let with_alpha = |rgb: Expression| Expression::Compose {
            ty: vec4,
            components: vec![rgb, member(color_value(), 3)],
        };
        let corrected = |params_member| {
            Expression::call(
                gamma,
                vec![swizzle(color_value(), &RGB), params(params_member)],
            )
        };
        body.push(Statement::If {
            condition: Expression::binary(
                BinaryOp::Equal,
                params(params::YUV_ONLY),
                Expression::u32(0),
            ),
            accept: vec![
                Statement::store(color_ptr(), with_alpha(corrected(params::GAMMA_DECODE))),
                Statement::store(
                    color_ptr(),
                    with_alpha(Expression::binary(
                        BinaryOp::Multiply,
                        params(params::GAMUT),
                        swizzle(color_value(), &RGB),
                    )),
                ),
                Statement::store(color_ptr(), with_alpha(corrected(params::GAMMA_ENCODE))),
            ],
            reject: Vec::new(),
        });
        body.push(Statement::Return {
            value: Some(color_value()),
        });
        Ok(())
    }

    /// `texture_load_external(plane0, plane1, coord, params)`.
    fn load(
        &mut self,
        module: &mut Module,
        coord_ty: Handle<Type>,
    ) -> Result<Handle<Function>, TransformError> {
        if let Some(&h) = self.load.get(&coord_ty) {
            return Ok(h);
        }
        let mut func = self.signature(
            module,
            "texture_load_external",
            &[
                ("plane0", self.plane),
                ("plane1", self.plane),
                ("coord", coord_ty),
                ("params", self.params),
            ],
        );
        let texel = |plane: u32, coord: Expression| {
            let mut call = TextureCall::new(TextureFn::Load, Expression::FunctionArgument(plane));
            call.coords = Some(coord);
            call.level = Some(Expression::i32(0));
            Expression::Texture(Box::new(call))
        };
        let mut body = Vec::new();
        let coord1 = bind_let(
            module,
            &mut func,
            "coord1",
            Expression::binary(
                BinaryOp::ShiftRight,
                Expression::FunctionArgument(2),
                splat(VectorSize::Bi, Expression::u32(1)),
            ),
            &mut body,
        )?;
        let coord = || Expression::FunctionArgument(2);
        self.convert(
            module,
            &mut func,
            3,
            texel(0, coord()),
            texel(1, coord1),
            &mut body,
        )?;
        func.body = body;
        let h = module.functions.append(func);
        self.load.insert(coord_ty, h);
        Ok(h)
    }

    /// `texture_sample_external(plane0, plane1, smp, coord, params)`.
    fn sample(&mut self, module: &mut Module) -> Result<Handle<Function>, TransformError> {
        if let Some(h) = self.sample {
            return Ok(h);
        }
        let sampler = module.insert_type(TypeInner::Sampler { comparison: false });
        let vec2 = module.vector_type(VectorSize::Bi, Scalar::F32);
        let vec3 = module.vector_type(VectorSize::Tri, Scalar::F32);
        let mut func = self.signature(
            module,
            "texture_sample_external",
            &[
                ("plane0", self.plane),
                ("plane1", self.plane),
                ("smp", sampler),
                ("coord", vec2),
                ("params", self.params),
            ],
        );
        let mut body = Vec::new();
        let modified = bind_let(
            module,
            &mut func,
            "modified_coords",
            Expression::binary(
                BinaryOp::Multiply,
                member(Expression::FunctionArgument(4), params::COORD_TRANSFORM),
                Expression::Compose {
                    ty: vec3,
                    components: vec![Expression::FunctionArgument(3), Expression::f32(1.0)],
                },
            ),
            &mut body,
        )?;

        // Keeps the sample half a texel away from the plane edges.
        let mut clamped = Vec::with_capacity(2);
        for plane in 0..2u32 {
            let mut dims = TextureCall::new(TextureFn::Dimensions, Expression::FunctionArgument(plane));
            dims.level = Some(Expression::i32(0));
            let dims = bind_let(
                module,
                &mut func,
                &format!("plane{plane}_dims"),
                Expression::Convert {
                    expr: Box::new(Expression::Texture(Box::new(dims))),
                    ty: vec2,
                },
                &mut body,
            )?;
            let half_texel = bind_let(
                module,
                &mut func,
                &format!("plane{plane}_half_texel"),
                Expression::binary(
                    BinaryOp::Divide,
                    splat(VectorSize::Bi, Expression::f32(0.5)),
                    dims,
                ),
                &mut body,
            )?;
            clamped.push(bind_let(
                module,
                &mut func,
                &format!("plane{plane}_clamped"),
                Expression::builtin(
                    BuiltinFn::Clamp,
                    vec![
                        modified.clone(),
                        half_texel.clone(),
                        Expression::binary(
                            BinaryOp::Subtract,
                            splat(VectorSize::Bi, Expression::f32(1.0)),
                            half_texel,
                        ),
                    ],
                ),
                &mut body,
            )?);
        }
        let texel = |plane: u32, coord: &Expression| {
            let mut call =
                TextureCall::new(TextureFn::SampleLevel, Expression::FunctionArgument(plane));
            call.sampler = Some(Expression::FunctionArgument(2));
            call.coords = Some(coord.clone());
            call.level = Some(Expression::f32(0.0));
            Expression::Texture(Box::new(call))
        };
        self.convert(
            module,
            &mut func,
            4,
            texel(0, &clamped[0]),
            texel(1, &clamped[1]),
            &mut body,
        )?;
        func.body = body;
        let h = module.functions.append(func);
        self.sample = Some(h);
        Ok(h)
    }
}

/// The second plane and parameters standing in for an expanded texture.
fn expansion(
    expr: &Expression,
    globals: &HashMap<Handle<GlobalVariable>, (Handle<GlobalVariable>, Handle<GlobalVariable>)>,
    args: &[u32],
) -> Option<(Expression, Expression)> {
    match *expr {
        Expression::GlobalVariable(g) => globals.get(&g).map(|&(plane1, params)| {
            (
                Expression::GlobalVariable(plane1),
                Expression::load(Expression::GlobalVariable(params)),
            )
        }),
        Expression::FunctionArgument(i) if args.contains(&i) => Some((
            Expression::FunctionArgument(i + 1),
            Expression::FunctionArgument(i + 2),
        )),
        _ => None,
    }
}

/// Replaces each external texture parameter of `func` with its two planes
/// and parameters, returning the indices of the first planes.
fn expand_arguments(module: &Module, func: &mut Function, helpers: &Helpers) -> Vec<u32> {
    let mut expanded = Vec::new();
    let mut i = 0;
    while i < func.arguments.len() {
        if !is_external(module, func.arguments[i].ty) {
            i += 1;
            continue;
        }
        let base = func.arguments[i].name.clone();
        func.arguments[i].ty = helpers.plane;
        let plane1 = FunctionArgument {
            name: fresh_local_name(func, &format!("{base}_plane_1")),
            ty: helpers.plane,
            binding: None,
        };
        func.arguments.insert(i + 1, plane1);
        let params = FunctionArgument {
            name: fresh_local_name(func, &format!("{base}_params")),
            ty: helpers.params,
            binding: None,
        };
        func.arguments.insert(i + 2, params);
        let at = i as u32;
        tinct_ir::rewrite_all_exprs(&mut func.body, &mut |e| {
            if let Expression::FunctionArgument(j) = e {
                if *j > at {
                    *j += 2;
                }
            }
        });
        expanded.push(at);
        i += 3;
    }
    expanded
}

impl Transform for MultiplanarExternalTexture {
    fn name(&self) -> &'static str {
        NAME
    }

    fn should_run(&self, module: &Module, _inputs: &DataMap) -> bool {
        module
            .global_variables
            .iter()
            .any(|(_, g)| is_external(module, g.ty))
            || module
                .functions
                .iter()
                .any(|(_, f)| f.arguments.iter().any(|a| is_external(module, a.ty)))
    }

    fn apply(
        &self,
        module: &Module,
        inputs: &DataMap,
        _outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let cfg = inputs
            .get::<MultiplanarExternalTextureConfig>()
            .ok_or_else(|| TransformError::missing(NAME, "MultiplanarExternalTextureConfig"))?;
        let mut out = module.clone();
        let mut helpers = Helpers::new(&mut out);

        let externals: Vec<Handle<GlobalVariable>> = out
            .global_variables
            .iter()
            .filter(|(_, g)| is_external(module, g.ty))
            .map(|(h, _)| h)
            .collect();
        let mut globals = HashMap::new();
        for g in externals {
            let var = &out.global_variables[g];
            let Some(bp) = var.binding else {
                return Err(TransformError::user(
                    NAME,
                    format!("external texture '{}' has no binding", var.name),
                ));
            };
            let Some(&to) = cfg.bindings.get(&bp) else {
                return Err(TransformError::missing(
                    NAME,
                    format!("binding points for texture_external at {bp}"),
                ));
            };
            out.global_variables[g].ty = helpers.plane;
            let plane1 = out.global_variables.append(
                GlobalVariable::new(out.fresh_name("ext_tex_plane_1"), AddressSpace::Handle, helpers.plane)
                    .with_binding(to.plane1.group, to.plane1.binding),
            );
            let params = out.global_variables.append(
                GlobalVariable::new(out.fresh_name("ext_tex_params"), AddressSpace::Uniform, helpers.params)
                    .with_binding(to.params.group, to.params.binding),
            );
            globals.insert(g, (plane1, params));
        }

        let mut expanded_args = HashMap::new();
        for h in out.functions.handles().collect::<Vec<_>>() {
            let args = with_function(&mut out, h, |module, func| {
                expand_arguments(module, func, &helpers)
            });
            expanded_args.insert(h, args);
        }

        for_each_function(&mut out, |module, h, func| {
            let args = expanded_args.get(&h).cloned().unwrap_or_default();
            let mut body = std::mem::take(&mut func.body);
            let mut result = Ok(());
            tinct_ir::walk_exprs_mut(&mut body, &mut |root| {
                if result.is_err() {
                    return;
                }
                result = try_rewrite(root, &mut |e| match e {
                    Expression::Call { arguments, .. } => {
                        if arguments.iter().any(|a| expansion(a, &globals, &args).is_some()) {
                            let mut expanded = Vec::with_capacity(arguments.len() + 2);
                            for a in arguments.drain(..) {
                                let extra = expansion(&a, &globals, &args);
                                expanded.push(a);
                                if let Some((plane1, params)) = extra {
                                    expanded.extend([plane1, params]);
                                }
                            }
                            *arguments = expanded;
                        }
                        Ok(())
                    }
                    Expression::Texture(call) => {
                        let Some((plane1, params)) = expansion(&call.texture, &globals, &args)
                        else {
                            return Ok(());
                        };
                        let missing = |what| {
                            TransformError::ice(NAME, format!("{} without {what}", call.fun.wgsl_name()))
                        };
                        let replacement = match call.fun {
                            TextureFn::Load => {
                                let coords = call.coords.clone().ok_or_else(|| missing("coordinates"))?;
                                let coord_ty = type_of(module, func, &coords)?;
                                let helper = helpers.load(module, coord_ty)?;
                                Expression::call(
                                    helper,
                                    vec![call.texture.clone(), plane1, coords, params],
                                )
                            }
                            TextureFn::SampleBaseClampToEdge => {
                                let sampler = call.sampler.clone().ok_or_else(|| missing("a sampler"))?;
                                let coords = call.coords.clone().ok_or_else(|| missing("coordinates"))?;
                                let helper = helpers.sample(module)?;
                                Expression::call(
                                    helper,
                                    vec![call.texture.clone(), plane1, sampler, coords, params],
                                )
                            }
                            // The first plane has the dimensions of the whole texture.
                            TextureFn::Dimensions => return Ok(()),
                            other => {
                                return Err(TransformError::user(
                                    NAME,
                                    format!("{} is not supported on texture_external", other.wgsl_name()),
                                ));
                            }
                        };
                        *e = replacement;
                        Ok(())
                    }
                    _ => Ok(()),
                });
            });
            func.body = body;
            result
        })?;

        log::debug!("{NAME}: {} external texture binding(s) expanded", globals.len());
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{EntryPoint, ShaderStage};

    fn config() -> DataMap {
        let mut inputs = DataMap::new();
        let mut cfg = MultiplanarExternalTextureConfig::default();
        cfg.bindings.insert(
            BindingPoint::new(0, 0),
            ExternalTextureBindings {
                plane1: BindingPoint::new(0, 1),
                params: BindingPoint::new(0, 2),
            },
        );
        inputs.insert(cfg);
        inputs
    }

    /// `var t: texture_external` at (0, 0), read by `main` either directly
    /// or through `load(tex: texture_external)`.
    fn module(through_function: bool) -> Module {
        let mut module = Module::default();
        let ext = module.insert_type(TypeInner::Texture {
            dim: TextureDimension::D2,
            class: TextureClass::External,
        });
        let vec2i = module.vector_type(VectorSize::Bi, Scalar::I32);
        let vec4 = module.vector_type(VectorSize::Quad, Scalar::F32);
        let t = module
            .global_variables
            .append(GlobalVariable::new("t", AddressSpace::Handle, ext).with_binding(0, 0));

        let texel = |texture| {
            let mut call = TextureCall::new(TextureFn::Load, texture);
            call.coords = Some(Expression::ZeroValue(vec2i));
            Expression::Texture(Box::new(call))
        };
        let value = if through_function {
            let mut load = Function::new("load");
            load.arguments.push(FunctionArgument {
                name: "tex".into(),
                ty: ext,
                binding: None,
            });
            load.result = Some(FunctionResult {
                ty: vec4,
                binding: None,
            });
            load.body = vec![Statement::Return {
                value: Some(texel(Expression::FunctionArgument(0))),
            }];
            let load = module.functions.append(load);
            Expression::call(load, vec![Expression::GlobalVariable(t)])
        } else {
            texel(Expression::GlobalVariable(t))
        };

        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::graphics(ShaderStage::Fragment));
        let c = main.add_local("c", vec4, LocalKind::Let);
        main.body = vec![Statement::Declare {
            local: c,
            init: Some(value),
        }];
        module.functions.append(main);
        module
    }

    fn run(module: &Module) -> String {
        let inputs = config();
        assert!(MultiplanarExternalTexture.should_run(module, &inputs));
        let out = MultiplanarExternalTexture
            .apply(module, &inputs, &mut DataMap::new())
            .unwrap();
        tinct_ir::validate(&out).unwrap();
        assert!(!MultiplanarExternalTexture.should_run(&out, &inputs));
        tinct_ir::dump_module(&out)
    }

    #[test]
    fn bindings_expand_into_planes_and_params() {
        let text = run(&module(false));
        assert!(
            text.contains("@group(0) @binding(1) var ext_tex_plane_1: texture_2d<f32>;"),
            "{text}"
        );
        assert!(
            text.contains("@group(0) @binding(2) var<uniform> ext_tex_params: ExternalTextureParams;"),
            "{text}"
        );
        assert!(
            text.contains("let c: vec4<f32> = texture_load_external(t, ext_tex_plane_1, vec2<i32>(), ext_tex_params);"),
            "{text}"
        );
        assert!(text.contains("fn gamma_correction(v: vec3<f32>, params: GammaTransferParams) -> vec3<f32> {"), "{text}");
        assert!(!text.contains("texture_external"), "{text}");
    }

    #[test]
    fn parameters_expand_at_call_sites() {
        let text = run(&module(true));
        assert!(
            text.contains("fn load(tex: texture_2d<f32>, tex_plane_1: texture_2d<f32>, tex_params: ExternalTextureParams) -> vec4<f32> {"),
            "{text}"
        );
        assert!(
            text.contains("return texture_load_external(tex, tex_plane_1, vec2<i32>(), tex_params);"),
            "{text}"
        );
        assert!(
            text.contains("let c: vec4<f32> = load(t, ext_tex_plane_1, ext_tex_params);"),
            "{text}"
        );
    }

    #[test]
    fn unconfigured_binding_is_missing_data() {
        let mut inputs = DataMap::new();
        inputs.insert(MultiplanarExternalTextureConfig::default());
        let err = MultiplanarExternalTexture
            .apply(&module(false), &inputs, &mut DataMap::new())
            .unwrap_err();
        assert!(matches!(err, TransformError::MissingData { .. }), "{err}");
    }
}
