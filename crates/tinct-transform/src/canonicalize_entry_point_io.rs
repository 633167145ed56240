//! Rewrites entry-point IO into the shape each target expects.
//!
//! The original entry point is kept, unchanged apart from losing its IO
//! attributes, as `<name>_inner`. A new wrapper with the original name
//! gathers the shader inputs, calls the inner function and writes its
//! result back out. Where the inputs and outputs live depends on the
//! [`ShaderStyle`].

use std::collections::HashSet;

use tinct_ir::{
    AddressSpace, BinaryOp, Binding, BuiltIn, Expression, Function, FunctionArgument,
    FunctionResult, GlobalVariable, Handle, Interpolation, Literal, LocalKind, Module, Scalar,
    ScalarKind, ShaderStage, Statement, Type, TypeInner, UnaryOp,
};

use crate::{DataMap, Transform, TransformError};

const NAME: &str = "CanonicalizeEntryPointIO";

/// Where shader IO ends up after canonicalization.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ShaderStyle {
    /// Module-scope `in`/`out` variables.
    Spirv,
    /// Module-scope `in`/`out` variables with `gl_*` builtins.
    Glsl,
    /// One input struct parameter and one output struct result.
    Hlsl,
    /// Builtins as direct parameters, locations in a `stage_in` struct,
    /// and a struct result.
    Msl,
}

#[derive(Clone, Debug)]
pub struct CanonicalizeEntryPointIOConfig {
    pub style: ShaderStyle,
    /// Mask ANDed into every fragment shader's sample mask output.
    /// `0xFFFF_FFFF` leaves the mask alone.
    pub fixed_sample_mask: u32,
    /// Emit `point_size = 1.0` from vertex shaders.
    pub emit_vertex_point_size: bool,
}

impl CanonicalizeEntryPointIOConfig {
    pub fn new(style: ShaderStyle) -> Self {
        Self {
            style,
            fixed_sample_mask: u32::MAX,
            emit_vertex_point_size: false,
        }
    }
}

#[derive(Debug)]
pub struct CanonicalizeEntryPointIO;

/// One shader input or output.
#[derive(Clone, Debug)]
struct Item {
    name: String,
    ty: Handle<Type>,
    binding: Binding,
}

/// How an inner-function argument is rebuilt from the input items.
enum ArgShape {
    Item(usize),
    Struct(Handle<Type>, Vec<usize>),
}

/// How a builtin is stored in a GLSL or SPIR-V IO variable.
#[derive(Clone, Copy, PartialEq)]
enum Repr {
    Same,
    /// A signed scalar standing for a `u32`.
    Int,
    /// `array<i32, 1>` standing for a `u32` mask.
    IntArray,
    /// `array<u32, 1>` standing for a `u32` mask.
    UintArray,
}

fn applies_mask(value: &Expression, mask: u32) -> bool {
    let is_mask = |e: &Expression| matches!(*e, Expression::Literal(Literal::U32(v)) if v == mask);
    match *value {
        Expression::Binary {
            op: BinaryOp::BitwiseAnd,
            ref right,
            ..
        } => is_mask(&**right),
        ref other => is_mask(other),
    }
}

/// Returns `true` if the struct result of `func` already carries the point
/// size and fixed sample mask the config asks for.
fn extra_outputs_written(
    module: &Module,
    func: &Function,
    cfg: &CanonicalizeEntryPointIOConfig,
) -> bool {
    let members = match func.result.as_ref().map(|r| &module.types[r.ty].inner) {
        Some(TypeInner::Struct { members, .. }) => members.as_slice(),
        _ => &[],
    };
    let member = |builtin| {
        members
            .iter()
            .position(|m| m.binding == Some(Binding::BuiltIn(builtin)))
    };
    let stage = func.stage();
    if cfg.style == ShaderStyle::Msl
        && cfg.emit_vertex_point_size
        && stage == Some(ShaderStage::Vertex)
        && member(BuiltIn::PointSize).is_none()
    {
        return false;
    }
    if cfg.fixed_sample_mask != u32::MAX && stage == Some(ShaderStage::Fragment) {
        let Some(index) = member(BuiltIn::SampleMask) else {
            return false;
        };
        let mut masked = true;
        tinct_ir::walk_stmts(&func.body, &mut |stmt| {
            if let Statement::Return { value } = stmt {
                let component = match value {
                    Some(Expression::Compose { components, .. }) => components.get(index),
                    _ => None,
                };
                masked &= component.is_some_and(|c| applies_mask(c, cfg.fixed_sample_mask));
            }
        });
        return masked;
    }
    true
}

fn is_canonical(module: &Module, func: &Function, cfg: &CanonicalizeEntryPointIOConfig) -> bool {
    let style = cfg.style;
    let struct_result = func.result.as_ref().is_none_or(|r| {
        r.binding.is_none() && matches!(module.types[r.ty].inner, TypeInner::Struct { .. })
    });
    match style {
        ShaderStyle::Spirv | ShaderStyle::Glsl => func.arguments.is_empty() && func.result.is_none(),
        ShaderStyle::Hlsl => {
            func.arguments.len() <= 1
                && func.arguments.iter().all(|a| a.binding.is_none())
                && struct_result
                && extra_outputs_written(module, func, cfg)
        }
        ShaderStyle::Msl => {
            let mut structs = 0;
            let args_ok = func.arguments.iter().all(|a| match a.binding {
                Some(Binding::BuiltIn(_)) => true,
                Some(Binding::Location { .. }) => false,
                None => {
                    structs += 1;
                    matches!(
                        module.types[a.ty].inner,
                        TypeInner::Struct { ref members, .. }
                            if members.iter().all(|m| matches!(m.binding, Some(Binding::Location { .. })))
                    )
                }
            });
            args_ok && structs <= 1 && struct_result && extra_outputs_written(module, func, cfg)
        }
    }
}

fn is_integer(inner: &TypeInner) -> bool {
    matches!(
        inner.scalar_kind(),
        Some(ScalarKind::Sint | ScalarKind::Uint)
    )
}

fn glsl_builtin(builtin: BuiltIn, output: bool) -> (&'static str, Repr) {
    match builtin {
        BuiltIn::Position { .. } if output => ("gl_Position", Repr::Same),
        BuiltIn::Position { .. } => ("gl_FragCoord", Repr::Same),
        BuiltIn::VertexIndex => ("gl_VertexID", Repr::Int),
        BuiltIn::InstanceIndex => ("gl_InstanceID", Repr::Int),
        BuiltIn::PointSize => ("gl_PointSize", Repr::Same),
        BuiltIn::FrontFacing => ("gl_FrontFacing", Repr::Same),
        BuiltIn::FragDepth => ("gl_FragDepth", Repr::Same),
        BuiltIn::SampleIndex => ("gl_SampleID", Repr::Int),
        BuiltIn::SampleMask if output => ("gl_SampleMask", Repr::IntArray),
        BuiltIn::SampleMask => ("gl_SampleMaskIn", Repr::IntArray),
        BuiltIn::LocalInvocationId => ("gl_LocalInvocationID", Repr::Same),
        BuiltIn::LocalInvocationIndex => ("gl_LocalInvocationIndex", Repr::Same),
        BuiltIn::GlobalInvocationId => ("gl_GlobalInvocationID", Repr::Same),
        BuiltIn::WorkgroupId => ("gl_WorkGroupID", Repr::Same),
        BuiltIn::NumWorkgroups => ("gl_NumWorkGroups", Repr::Same),
    }
}

/// Builds a struct whose members carry IO attributes, ordered with
/// locations first and builtins after, each in their original order.
fn io_struct<T>(module: &mut Module, name: &str, items: &mut [(Item, T)]) -> Handle<Type> {
    items.sort_by_key(|(item, _)| match item.binding {
        Binding::Location { location, .. } => (0, location),
        Binding::BuiltIn(_) => (1, 0),
    });
    let mut names = HashSet::new();
    let members: Vec<(String, Handle<Type>)> = items
        .iter()
        .map(|(item, _)| {
            let mut name = item.name.clone();
            let mut n = 1;
            while !names.insert(name.clone()) {
                name = format!("{}_{n}", item.name);
                n += 1;
            }
            (name, item.ty)
        })
        .collect();
    let (mut members, span) = tinct_ir::layout::layout_struct(&module.types, members);
    for (member, (item, _)) in members.iter_mut().zip(items.iter()) {
        member.binding = Some(item.binding);
    }
    let name = module.fresh_name(name);
    module.insert_named_type(name, TypeInner::Struct { members, span })
}

struct Canonicalizer<'a> {
    module: &'a mut Module,
    cfg: &'a CanonicalizeEntryPointIOConfig,
    stage: ShaderStage,
    wrapper: Function,
}

impl Canonicalizer<'_> {
    /// Finds or declares an IO variable and returns it with its storage
    /// representation.
    fn io_var(&mut self, item: &Item, space: AddressSpace) -> (Handle<GlobalVariable>, Repr) {
        let glsl = match (self.cfg.style, item.binding) {
            (ShaderStyle::Glsl, Binding::BuiltIn(b)) => Some(glsl_builtin(b, space == AddressSpace::Out)),
            _ => None,
        };
        let repr = match (glsl, item.binding) {
            (Some((_, repr)), _) => repr,
            (None, Binding::BuiltIn(BuiltIn::SampleMask)) => Repr::UintArray,
            _ => Repr::Same,
        };
        let ty = match repr {
            Repr::Same => item.ty,
            Repr::Int => self.module.scalar_type(Scalar::I32),
            Repr::IntArray => {
                let i32_ty = self.module.scalar_type(Scalar::I32);
                self.module.array_type(i32_ty, 1)
            }
            Repr::UintArray => {
                let u32_ty = self.module.scalar_type(Scalar::U32);
                self.module.array_type(u32_ty, 1)
            }
        };
        let name = match glsl {
            Some((name, _)) => {
                if let Some(existing) = self.module.global_by_name(name) {
                    return (existing, repr);
                }
                name.to_string()
            }
            None => self.module.fresh_name(&format!("{}_1", item.name)),
        };
        let mut var = GlobalVariable::new(name, space, ty);
        var.io = Some(item.binding);
        (self.module.global_variables.append(var), repr)
    }

    /// Expressions reading each input item inside the wrapper.
    fn read_inputs(&mut self, inputs: Vec<Item>) -> Vec<Expression> {
        match self.cfg.style {
            ShaderStyle::Spirv | ShaderStyle::Glsl => {
                let u32_ty = self.module.scalar_type(Scalar::U32);
                inputs
                    .iter()
                    .map(|item| {
                        let (var, repr) = self.io_var(item, AddressSpace::In);
                        let var = Expression::GlobalVariable(var);
                        match repr {
                            Repr::Same => Expression::load(var),
                            Repr::Int => Expression::convert(Expression::load(var), u32_ty),
                            Repr::IntArray => Expression::convert(
                                Expression::load(Expression::access_index(var, 0)),
                                u32_ty,
                            ),
                            Repr::UintArray => Expression::load(Expression::access_index(var, 0)),
                        }
                    })
                    .collect()
            }
            ShaderStyle::Hlsl => {
                if inputs.is_empty() {
                    return Vec::new();
                }
                let count = inputs.len();
                let mut sorted: Vec<(Item, usize)> = inputs.into_iter().zip(0..).collect();
                let name = format!("{}_in", self.wrapper.name);
                let ty = io_struct(self.module, &name, &mut sorted);
                self.wrapper.arguments.push(FunctionArgument {
                    name: "inputs".into(),
                    ty,
                    binding: None,
                });
                let mut values = vec![Expression::u32(0); count];
                for (member, (_, i)) in sorted.into_iter().enumerate() {
                    values[i] = Expression::access_index(Expression::FunctionArgument(0), member as u32);
                }
                values
            }
            ShaderStyle::Msl => {
                let mut values = vec![Expression::u32(0); inputs.len()];
                let mut locations = Vec::new();
                for (i, item) in inputs.into_iter().enumerate() {
                    if let Binding::BuiltIn(_) = item.binding {
                        let arg = self.wrapper.arguments.len() as u32;
                        self.wrapper.arguments.push(FunctionArgument {
                            name: item.name.clone(),
                            ty: item.ty,
                            binding: Some(item.binding),
                        });
                        values[i] = Expression::FunctionArgument(arg);
                    } else {
                        locations.push((item, i));
                    }
                }
                if !locations.is_empty() {
                    let name = format!("{}_in", self.wrapper.name);
                    let ty = io_struct(self.module, &name, &mut locations);
                    let arg = self.wrapper.arguments.len() as u32;
                    self.wrapper.arguments.push(FunctionArgument {
                        name: "stage_in".into(),
                        ty,
                        binding: None,
                    });
                    for (member, (_, i)) in locations.into_iter().enumerate() {
                        values[i] =
                            Expression::access_index(Expression::FunctionArgument(arg), member as u32);
                    }
                }
                values
            }
        }
    }

    /// Writes each output item from the wrapper.
    fn write_outputs(&mut self, mut outputs: Vec<(Item, Expression)>) {
        if self.cfg.style != ShaderStyle::Hlsl
            && self.cfg.emit_vertex_point_size
            && self.stage == ShaderStage::Vertex
        {
            let f32_ty = self.module.scalar_type(Scalar::F32);
            outputs.push((
                Item {
                    name: "point_size".into(),
                    ty: f32_ty,
                    binding: Binding::BuiltIn(BuiltIn::PointSize),
                },
                Expression::f32(1.0),
            ));
        }
        if self.cfg.fixed_sample_mask != u32::MAX && self.stage == ShaderStage::Fragment {
            let mask = Expression::u32(self.cfg.fixed_sample_mask);
            let existing = outputs
                .iter_mut()
                .find(|(item, _)| item.binding == Binding::BuiltIn(BuiltIn::SampleMask));
            match existing {
                Some((_, value)) => {
                    let v = std::mem::replace(value, Expression::u32(0));
                    *value = Expression::binary(BinaryOp::BitwiseAnd, v, mask);
                }
                None => {
                    let u32_ty = self.module.scalar_type(Scalar::U32);
                    outputs.push((
                        Item {
                            name: "fixed_sample_mask".into(),
                            ty: u32_ty,
                            binding: Binding::BuiltIn(BuiltIn::SampleMask),
                        },
                        mask,
                    ));
                }
            }
        }

        match self.cfg.style {
            ShaderStyle::Spirv | ShaderStyle::Glsl => {
                let i32_ty = self.module.scalar_type(Scalar::I32);
                let mut position = None;
                for (item, value) in &outputs {
                    let (var, repr) = self.io_var(item, AddressSpace::Out);
                    let target = Expression::GlobalVariable(var);
                    let stmt = match repr {
                        Repr::Same => Statement::store(target.clone(), value.clone()),
                        Repr::Int => {
                            Statement::store(target.clone(), Expression::convert(value.clone(), i32_ty))
                        }
                        Repr::IntArray => Statement::store(
                            Expression::access_index(target.clone(), 0),
                            Expression::convert(value.clone(), i32_ty),
                        ),
                        Repr::UintArray => Statement::store(
                            Expression::access_index(target.clone(), 0),
                            value.clone(),
                        ),
                    };
                    self.wrapper.body.push(stmt);
                    if let Binding::BuiltIn(BuiltIn::Position { .. }) = item.binding {
                        position = Some(target);
                    }
                }
                if let (ShaderStyle::Glsl, Some(pos)) = (self.cfg.style, position) {
                    self.wrapper.body.extend(glsl_position_fixup(pos));
                }
            }
            ShaderStyle::Hlsl | ShaderStyle::Msl => {
                if outputs.is_empty() {
                    return;
                }
                let name = format!("{}_out", self.wrapper.name);
                let ty = io_struct(self.module, &name, &mut outputs);
                self.wrapper.result = Some(FunctionResult { ty, binding: None });
                self.wrapper.body.push(Statement::Return {
                    value: Some(Expression::Compose {
                        ty,
                        components: outputs.into_iter().map(|(_, v)| v).collect(),
                    }),
                });
            }
        }
    }
}

/// Flips Y and remaps depth from `[-w, w]` clip space to the GL range.
fn glsl_position_fixup(pos: Expression) -> Vec<Statement> {
    let component = |i| Expression::access_index(pos.clone(), i);
    let y = Statement::store(
        component(1),
        Expression::unary(UnaryOp::Negate, Expression::load(component(1))),
    );
    let z = Statement::store(
        component(2),
        Expression::binary(
            BinaryOp::Subtract,
            Expression::binary(
                BinaryOp::Multiply,
                Expression::f32(2.0),
                Expression::load(component(2)),
            ),
            Expression::load(component(3)),
        ),
    );
    vec![y, z]
}

fn canonicalize(
    module: &mut Module,
    cfg: &CanonicalizeEntryPointIOConfig,
    ep: Handle<Function>,
    io_structs: &mut HashSet<Handle<Type>>,
) -> Result<(), TransformError> {
    let original = module.functions[ep].clone();
    let Some(stage) = original.stage() else {
        return Err(TransformError::ice(NAME, format!("'{}' is not an entry point", original.name)));
    };

    let member_items = |module: &Module, ty: Handle<Type>| -> Option<Vec<Item>> {
        let TypeInner::Struct { ref members, .. } = module.types[ty].inner else {
            return None;
        };
        members
            .iter()
            .map(|m| {
                Some(Item {
                    name: m.name.clone(),
                    ty: m.ty,
                    binding: m.binding?,
                })
            })
            .collect()
    };

    let mut inputs = Vec::new();
    let mut shapes = Vec::new();
    for arg in &original.arguments {
        if let Some(binding) = arg.binding {
            shapes.push(ArgShape::Item(inputs.len()));
            inputs.push(Item {
                name: arg.name.clone(),
                ty: arg.ty,
                binding,
            });
        } else if let Some(items) = member_items(module, arg.ty) {
            io_structs.insert(arg.ty);
            let start = inputs.len();
            inputs.extend(items);
            shapes.push(ArgShape::Struct(arg.ty, (start..inputs.len()).collect()));
        } else {
            return Err(TransformError::user(
                NAME,
                format!("entry-point argument '{}' has no IO attribute", arg.name),
            ));
        }
    }

    // `None` for a direct result, member indices for a struct result.
    let mut outputs: Vec<Item> = Vec::new();
    let mut result_members = None;
    if let Some(result) = original.result.as_ref() {
        if let Some(binding) = result.binding {
            outputs.push(Item {
                name: "value".into(),
                ty: result.ty,
                binding,
            });
        } else if let Some(items) = member_items(module, result.ty) {
            io_structs.insert(result.ty);
            result_members = Some(items.len());
            outputs.extend(items);
        } else {
            return Err(TransformError::user(
                NAME,
                format!("result of '{}' has no IO attribute", original.name),
            ));
        }
    }

    let flat_inputs = stage == ShaderStage::Fragment;
    let flat_outputs = stage == ShaderStage::Vertex;
    for (items, flat) in [(&mut inputs, flat_inputs), (&mut outputs, flat_outputs)] {
        for item in items.iter_mut() {
            if let Binding::Location {
                ref mut interpolation,
                ..
            } = item.binding
            {
                if flat && interpolation.is_none() && is_integer(&module.types[item.ty].inner) {
                    *interpolation = Some(Interpolation::Flat);
                }
            }
        }
    }

    let mut inner = original.clone();
    inner.name = module.fresh_name(&format!("{}_inner", original.name));
    inner.entry_point = None;
    for arg in &mut inner.arguments {
        arg.binding = None;
    }
    if let Some(result) = inner.result.as_mut() {
        result.binding = None;
    }
    let inner_result_ty = inner.result.as_ref().map(|r| r.ty);
    let inner = module.functions.append(inner);

    let mut wrapper = Function::new(original.name.clone());
    wrapper.entry_point = original.entry_point.clone();
    let mut c = Canonicalizer {
        module: &mut *module,
        cfg,
        stage,
        wrapper,
    };

    let values = c.read_inputs(inputs);
    let arguments = shapes
        .iter()
        .map(|shape| match *shape {
            ArgShape::Item(i) => values[i].clone(),
            ArgShape::Struct(ty, ref members) => Expression::Compose {
                ty,
                components: members.iter().map(|&i| values[i].clone()).collect(),
            },
        })
        .collect();
    let call = Expression::call(inner, arguments);

    let written = match inner_result_ty {
        None => {
            c.wrapper.body.push(Statement::Call(call));
            Vec::new()
        }
        Some(ty) => {
            let local = c.wrapper.add_local("inner_result", ty, LocalKind::Let);
            c.wrapper.body.push(Statement::Declare {
                local,
                init: Some(call),
            });
            let result = Expression::LocalVariable(local);
            let values: Vec<Expression> = match result_members {
                None => vec![result],
                Some(n) => (0..n as u32)
                    .map(|m| Expression::access_index(result.clone(), m))
                    .collect(),
            };
            outputs.into_iter().zip(values).collect()
        }
    };
    c.write_outputs(written);

    let wrapper = c.wrapper;
    module.functions[ep] = wrapper;
    Ok(())
}

impl Transform for CanonicalizeEntryPointIO {
    fn name(&self) -> &'static str {
        NAME
    }

    fn requires(&self) -> &'static [&'static str] {
        &["ZeroInitWorkgroupMemory", "Unshadow", "Robustness"]
    }

    fn should_run(&self, module: &Module, inputs: &DataMap) -> bool {
        let fallback;
        let cfg = match inputs.get::<CanonicalizeEntryPointIOConfig>() {
            Some(cfg) => cfg,
            None => {
                fallback = CanonicalizeEntryPointIOConfig::new(ShaderStyle::Spirv);
                &fallback
            }
        };
        module
            .entry_points()
            .any(|(_, f)| !is_canonical(module, f, cfg))
    }

    fn apply(
        &self,
        module: &Module,
        inputs: &DataMap,
        _outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let cfg = inputs
            .get::<CanonicalizeEntryPointIOConfig>()
            .ok_or_else(|| TransformError::missing(NAME, "CanonicalizeEntryPointIOConfig"))?;
        let mut out = module.clone();
        let eps: Vec<Handle<Function>> = out
            .entry_points()
            .filter(|(_, f)| !is_canonical(module, f, cfg))
            .map(|(h, _)| h)
            .collect();
        let mut io_structs = HashSet::new();
        for ep in eps {
            canonicalize(&mut out, cfg, ep, &mut io_structs)?;
        }
        // The user's IO structs are plain data inside the inner functions.
        out.types.map_in_place(|h, ty| {
            if !io_structs.contains(&h) {
                return;
            }
            if let TypeInner::Struct { ref mut members, .. } = ty.inner {
                for m in members {
                    m.binding = None;
                }
            }
        });
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{EntryPoint, VectorSize};

    fn run(module: &Module, cfg: CanonicalizeEntryPointIOConfig) -> Module {
        let mut inputs = DataMap::new();
        inputs.insert(cfg);
        assert!(CanonicalizeEntryPointIO.should_run(module, &inputs));
        let out = CanonicalizeEntryPointIO
            .apply(module, &inputs, &mut DataMap::new())
            .unwrap();
        tinct_ir::validate(&out).unwrap();
        assert!(!CanonicalizeEntryPointIO.should_run(&out, &inputs));
        out
    }

    fn struct_with_bindings(module: &mut Module, name: &str, members: &[(&str, Handle<Type>, Binding)]) -> Handle<Type> {
        let plain: Vec<(&str, Handle<Type>)> = members.iter().map(|&(n, t, _)| (n, t)).collect();
        let ty = module.struct_type(name, &plain);
        module.types.map_in_place(|h, t| {
            if h != ty {
                return;
            }
            if let TypeInner::Struct { members: ref mut ms, .. } = t.inner {
                for (m, &(_, _, b)) in ms.iter_mut().zip(members) {
                    m.binding = Some(b);
                }
            }
        });
        ty
    }

    /// A fragment shader taking two IO structs and returning a third.
    fn fragment_module() -> Module {
        let mut module = Module::default();
        let vec4 = module.vector_type(VectorSize::Quad, Scalar::F32);
        let u32_ty = module.scalar_type(Scalar::U32);
        let a = struct_with_bindings(
            &mut module,
            "A",
            &[
                ("pos", vec4, Binding::BuiltIn(BuiltIn::Position { invariant: false })),
                ("color", vec4, Binding::location(1)),
            ],
        );
        let bool_ty = module.scalar_type(Scalar::BOOL);
        let b = struct_with_bindings(
            &mut module,
            "B",
            &[
                ("id", u32_ty, Binding::location(0)),
                ("front", bool_ty, Binding::BuiltIn(BuiltIn::FrontFacing)),
            ],
        );
        let out = struct_with_bindings(
            &mut module,
            "Out",
            &[
                ("color", vec4, Binding::location(0)),
                ("mask", u32_ty, Binding::BuiltIn(BuiltIn::SampleMask)),
            ],
        );
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::graphics(ShaderStage::Fragment));
        main.arguments = vec![
            FunctionArgument { name: "a".into(), ty: a, binding: None },
            FunctionArgument { name: "b".into(), ty: b, binding: None },
        ];
        main.result = Some(FunctionResult { ty: out, binding: None });
        main.body = vec![Statement::Return {
            value: Some(Expression::Compose {
                ty: out,
                components: vec![
                    Expression::access_index(Expression::FunctionArgument(0), 1),
                    Expression::access_index(Expression::FunctionArgument(1), 0),
                ],
            }),
        }];
        module.functions.append(main);
        module
    }

    #[test]
    fn hlsl_gathers_io_into_one_struct_each_way() {
        let module = fragment_module();
        let body = module.functions.iter().next().unwrap().1.body.clone();
        let out = run(&module, CanonicalizeEntryPointIOConfig::new(ShaderStyle::Hlsl));

        let main = &out.functions[out.function_by_name("main").unwrap()];
        assert_eq!(main.arguments.len(), 1);
        assert_eq!(out.types[main.arguments[0].ty].name.as_deref(), Some("main_in"));
        let result = main.result.as_ref().unwrap();
        assert_eq!(out.types[result.ty].name.as_deref(), Some("main_out"));

        let inner = &out.functions[out.function_by_name("main_inner").unwrap()];
        assert!(inner.entry_point.is_none());
        assert_eq!(inner.body, body);

        let text = tinct_ir::dump_module(&out);
        // Locations sort ahead of builtins.
        assert!(text.contains("struct main_in { // span"), "{text}");
        let in_struct = &text[text.find("struct main_in").unwrap()..];
        let id = in_struct.find("@location(0) @interpolate(flat) id: u32").unwrap();
        let color = in_struct.find("@location(1) color: vec4<f32>").unwrap();
        let pos = in_struct.find("@builtin(position) pos: vec4<f32>").unwrap();
        assert!(id < color && color < pos, "{text}");
        assert!(
            text.contains("let inner_result: Out = main_inner(A(inputs.pos, inputs.color), B(inputs.id, inputs.front));"),
            "{text}"
        );
        assert!(
            text.contains("return main_out(inner_result.color, inner_result.mask);"),
            "{text}"
        );
        assert!(text.contains("struct A { // span 32\n    @offset(0) pos: vec4<f32>,"), "{text}");
    }

    #[test]
    fn msl_passes_builtins_directly() {
        let module = fragment_module();
        let mut cfg = CanonicalizeEntryPointIOConfig::new(ShaderStyle::Msl);
        cfg.fixed_sample_mask = 0x3;
        let out = run(&module, cfg);
        let main = &out.functions[out.function_by_name("main").unwrap()];
        let names: Vec<&str> = main.arguments.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["pos", "front", "stage_in"]);
        let text = tinct_ir::dump_function(&out, main);
        assert!(
            text.contains("main_inner(A(pos, stage_in.color), B(stage_in.id, front))"),
            "{text}"
        );
        assert!(
            text.contains("return main_out(inner_result.color, (inner_result.mask & 3u));"),
            "{text}"
        );
    }

    fn vertex_module() -> Module {
        let mut module = Module::default();
        let vec4 = module.vector_type(VectorSize::Quad, Scalar::F32);
        let u32_ty = module.scalar_type(Scalar::U32);
        let f32_ty = module.scalar_type(Scalar::F32);
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::graphics(ShaderStage::Vertex));
        main.arguments = vec![FunctionArgument {
            name: "vid".into(),
            ty: u32_ty,
            binding: Some(Binding::BuiltIn(BuiltIn::VertexIndex)),
        }];
        main.result = Some(FunctionResult {
            ty: vec4,
            binding: Some(Binding::BuiltIn(BuiltIn::Position { invariant: false })),
        });
        main.body = vec![Statement::Return {
            value: Some(Expression::Compose {
                ty: vec4,
                components: vec![
                    Expression::convert(Expression::FunctionArgument(0), f32_ty),
                    Expression::f32(0.0),
                    Expression::f32(0.0),
                    Expression::f32(1.0),
                ],
            }),
        }];
        module.functions.append(main);
        module
    }

    #[test]
    fn glsl_uses_gl_builtins_and_fixes_position() {
        let mut cfg = CanonicalizeEntryPointIOConfig::new(ShaderStyle::Glsl);
        cfg.emit_vertex_point_size = true;
        let out = run(&vertex_module(), cfg);
        let text = tinct_ir::dump_module(&out);
        assert!(text.contains("@builtin(vertex_index) var<in> gl_VertexID: i32;"), "{text}");
        assert!(text.contains("@builtin(position) var<out> gl_Position: vec4<f32>;"), "{text}");
        assert!(text.contains("let inner_result: vec4<f32> = main_inner(u32(gl_VertexID));"), "{text}");
        assert!(text.contains("gl_Position = inner_result;"), "{text}");
        assert!(text.contains("gl_Position[1] = (-gl_Position[1]);"), "{text}");
        assert!(
            text.contains("gl_Position[2] = ((2f * gl_Position[2]) - gl_Position[3]);"),
            "{text}"
        );
        assert!(text.contains("gl_PointSize = 1f;"), "{text}");
        assert!(text.contains("fn main_inner(vid: u32) -> vec4<f32> {"), "{text}");
    }

    #[test]
    fn spirv_uses_io_variables() {
        let out = run(
            &vertex_module(),
            CanonicalizeEntryPointIOConfig::new(ShaderStyle::Spirv),
        );
        let text = tinct_ir::dump_module(&out);
        assert!(text.contains("@builtin(vertex_index) var<in> vid_1: u32;"), "{text}");
        assert!(text.contains("@builtin(position) var<out> value_1: vec4<f32>;"), "{text}");
        assert!(text.contains("value_1 = inner_result;"), "{text}");
        assert!(!text.contains("[1] = (-"), "{text}");
        let main = &out.functions[out.function_by_name("main").unwrap()];
        assert!(main.arguments.is_empty() && main.result.is_none());
    }

    /// An entry point already in MSL shape: no arguments and an IO struct
    /// result.
    fn struct_result_module(stage: ShaderStage, member: (&str, Binding)) -> Module {
        let mut module = Module::default();
        let vec4 = module.vector_type(VectorSize::Quad, Scalar::F32);
        let out_ty = struct_with_bindings(&mut module, "Out", &[(member.0, vec4, member.1)]);
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::graphics(stage));
        main.result = Some(FunctionResult {
            ty: out_ty,
            binding: None,
        });
        main.body = vec![Statement::Return {
            value: Some(Expression::ZeroValue(out_ty)),
        }];
        module.functions.append(main);
        module
    }

    #[test]
    fn struct_result_gains_point_size() {
        let module = struct_result_module(
            ShaderStage::Vertex,
            ("pos", Binding::BuiltIn(BuiltIn::Position { invariant: false })),
        );
        let mut inputs = DataMap::new();
        inputs.insert(CanonicalizeEntryPointIOConfig::new(ShaderStyle::Msl));
        assert!(!CanonicalizeEntryPointIO.should_run(&module, &inputs));

        let mut cfg = CanonicalizeEntryPointIOConfig::new(ShaderStyle::Msl);
        cfg.emit_vertex_point_size = true;
        let out = run(&module, cfg);
        let main = &out.functions[out.function_by_name("main").unwrap()];
        let result = main.result.as_ref().unwrap();
        let TypeInner::Struct { ref members, .. } = out.types[result.ty].inner else {
            panic!("struct result expected");
        };
        assert!(members
            .iter()
            .any(|m| m.binding == Some(Binding::BuiltIn(BuiltIn::PointSize))));
        let text = tinct_ir::dump_function(&out, main);
        assert!(text.contains("return main_out(inner_result.pos, 1f);"), "{text}");
    }

    #[test]
    fn struct_result_gains_fixed_sample_mask() {
        let module = struct_result_module(
            ShaderStage::Fragment,
            ("color", Binding::location(0)),
        );
        let mut cfg = CanonicalizeEntryPointIOConfig::new(ShaderStyle::Msl);
        cfg.fixed_sample_mask = 3;
        let out = run(&module, cfg);
        let main = &out.functions[out.function_by_name("main").unwrap()];
        let text = tinct_ir::dump_function(&out, main);
        assert!(text.contains("return main_out(inner_result.color, 3u);"), "{text}");

        let mut inputs = DataMap::new();
        let mut other = CanonicalizeEntryPointIOConfig::new(ShaderStyle::Msl);
        other.fixed_sample_mask = 1;
        inputs.insert(other);
        assert!(CanonicalizeEntryPointIO.should_run(&out, &inputs));
    }

    #[test]
    fn hlsl_ignores_point_size() {
        let module = struct_result_module(
            ShaderStage::Vertex,
            ("pos", Binding::BuiltIn(BuiltIn::Position { invariant: false })),
        );
        let mut cfg = CanonicalizeEntryPointIOConfig::new(ShaderStyle::Hlsl);
        cfg.emit_vertex_point_size = true;
        let mut inputs = DataMap::new();
        inputs.insert(cfg);
        assert!(!CanonicalizeEntryPointIO.should_run(&module, &inputs));
    }

    #[test]
    fn missing_config_is_reported() {
        let err = CanonicalizeEntryPointIO
            .apply(&vertex_module(), &DataMap::new(), &mut DataMap::new())
            .unwrap_err();
        assert!(matches!(err, TransformError::MissingData { .. }));
    }
}
