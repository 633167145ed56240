//! Prints a sanitized module as Metal Shading Language.
//!
//! The input must have been through [`crate::sanitize`]: entry points take
//! builtins as parameters and locations in one `[[stage_in]]` struct, and
//! only entry points name module-scope variables. Buffers become pointer
//! parameters of the entry point, so a reference to one prints as
//! `(*name)`; every other reference prints as an lvalue that a `Load`
//! reads as-is.

use std::collections::{HashMap, HashSet};

use tinct_backend_core::{BackendError, Namer, TextBuffer, f32_text};
use tinct_ir::{
    AddressSpace, ArraySize, Barrier, BinaryOp, Binding, Block, BuiltIn, BuiltinFn, CaseSelector,
    Expression, Function, GlobalVariable, Handle, Interpolation, Literal, LocalKind,
    LocalVariable, Module, ResolveContext, Sampling, Scalar, ScalarKind, ShaderStage, Statement,
    StorageAccess, TextureCall, TextureClass, TextureDimension, TextureFn, Type, TypeInner,
    TypeResolution, UnaryOp, UniqueArena, VectorSize, is_terminated,
};

/// Prints `module` as one MSL source file holding every entry point.
pub fn print(module: &Module) -> Result<String, BackendError> {
    let mut writer = Writer::new(module);
    let (decls, functions) = writer.write_module()?;
    Ok(writer.finish(&decls, &functions))
}

fn unsupported(what: impl Into<String>) -> BackendError {
    BackendError::Unsupported(what.into())
}

fn ice(what: impl Into<String>) -> BackendError {
    BackendError::Ice(what.into())
}

/// Identifiers starting with `__` are reserved in C++.
fn struct_name(name: &str) -> &str {
    name.trim_start_matches("__")
}

const TINT_ARRAY: &[&str] = &[
    "template<typename T, size_t N>",
    "struct tint_array {",
    "  const constant T& operator[](size_t i) const constant { return elements[i]; }",
    "  device T& operator[](size_t i) device { return elements[i]; }",
    "  const device T& operator[](size_t i) const device { return elements[i]; }",
    "  thread T& operator[](size_t i) thread { return elements[i]; }",
    "  const thread T& operator[](size_t i) const thread { return elements[i]; }",
    "  threadgroup T& operator[](size_t i) threadgroup { return elements[i]; }",
    "  const threadgroup T& operator[](size_t i) const threadgroup { return elements[i]; }",
    "  T elements[N];",
    "};",
];

fn binary_symbol(op: BinaryOp) -> &'static str {
    match op {
        BinaryOp::Add => "+",
        BinaryOp::Subtract => "-",
        BinaryOp::Multiply => "*",
        BinaryOp::Divide => "/",
        BinaryOp::Modulo => "%",
        BinaryOp::Equal => "==",
        BinaryOp::NotEqual => "!=",
        BinaryOp::Less => "<",
        BinaryOp::LessEqual => "<=",
        BinaryOp::Greater => ">",
        BinaryOp::GreaterEqual => ">=",
        BinaryOp::LogicalAnd => "&&",
        BinaryOp::LogicalOr => "||",
        BinaryOp::BitwiseAnd => "&",
        BinaryOp::BitwiseOr => "|",
        BinaryOp::BitwiseXor => "^",
        BinaryOp::ShiftLeft => "<<",
        BinaryOp::ShiftRight => ">>",
    }
}

/// The address space qualifier of a pointer.
fn space_qualifier(space: AddressSpace, access: StorageAccess) -> Result<&'static str, BackendError> {
    Ok(match space {
        AddressSpace::Function | AddressSpace::Private => "thread",
        AddressSpace::Workgroup => "threadgroup",
        AddressSpace::Storage if access.contains(StorageAccess::STORE) => "device",
        AddressSpace::Storage => "const device",
        AddressSpace::Uniform => "const constant",
        AddressSpace::PushConstant => return Err(unsupported("push constants on MSL")),
        AddressSpace::Handle | AddressSpace::In | AddressSpace::Out => {
            return Err(ice(format!("pointer into the {space:?} address space")));
        }
    })
}

fn builtin_attribute(builtin: BuiltIn) -> &'static str {
    match builtin {
        BuiltIn::Position { invariant: true } => "[[position]] [[invariant]]",
        BuiltIn::Position { invariant: false } => "[[position]]",
        BuiltIn::VertexIndex => "[[vertex_id]]",
        BuiltIn::InstanceIndex => "[[instance_id]]",
        BuiltIn::PointSize => "[[point_size]]",
        BuiltIn::FrontFacing => "[[front_facing]]",
        BuiltIn::FragDepth => "[[depth(any)]]",
        BuiltIn::SampleIndex => "[[sample_id]]",
        BuiltIn::SampleMask => "[[sample_mask]]",
        BuiltIn::LocalInvocationId => "[[thread_position_in_threadgroup]]",
        BuiltIn::LocalInvocationIndex => "[[thread_index_in_threadgroup]]",
        BuiltIn::GlobalInvocationId => "[[thread_position_in_grid]]",
        BuiltIn::WorkgroupId => "[[threadgroup_position_in_grid]]",
        BuiltIn::NumWorkgroups => "[[threadgroups_per_grid]]",
    }
}

/// Interpolation qualifier of a fragment input, if it needs one.
fn interpolation_attribute(
    interpolation: Option<Interpolation>,
    sampling: Option<Sampling>,
    integer: bool,
) -> Option<&'static str> {
    if integer || interpolation == Some(Interpolation::Flat) {
        return Some("[[flat]]");
    }
    let linear = interpolation == Some(Interpolation::Linear);
    Some(match (sampling, linear) {
        (None, false) => return None,
        (None | Some(Sampling::Center), true) => "[[center_no_perspective]]",
        (Some(Sampling::Center), false) => "[[center_perspective]]",
        (Some(Sampling::Centroid), false) => "[[centroid_perspective]]",
        (Some(Sampling::Centroid), true) => "[[centroid_no_perspective]]",
        (Some(Sampling::Sample), false) => "[[sample_perspective]]",
        (Some(Sampling::Sample), true) => "[[sample_no_perspective]]",
    })
}

/// `&lvalue`, simplified when the lvalue dereferences a plain pointer.
fn address_of(lvalue: &str) -> String {
    if let Some(inner) = lvalue.strip_prefix("(*").and_then(|s| s.strip_suffix(')')) {
        if !inner.contains(['(', ')', '[', '.']) {
            return inner.to_string();
        }
    }
    format!("&{lvalue}")
}

fn component_letter(i: u32) -> Result<char, BackendError> {
    "xyzw"
        .chars()
        .nth(i as usize)
        .ok_or_else(|| ice(format!("component {i} of a vector")))
}

/// The continuing construct of the innermost loop, printed again before
/// every `continue`.
#[derive(Clone, Copy)]
struct Continuing<'a> {
    block: &'a Block,
    break_if: Option<&'a Expression>,
}

/// Per-function printing state.
struct FnCtx<'a> {
    func: Option<&'a Function>,
    types: ResolveContext<'a>,
    /// `None` marks a construct where `continue` cannot appear.
    loops: Vec<Option<Continuing<'a>>>,
}

impl<'a> FnCtx<'a> {
    fn new(module: &'a Module, func: &'a Function) -> Self {
        Self {
            func: Some(func),
            types: ResolveContext::new(module, func),
            loops: Vec::new(),
        }
    }

    fn module_scope(module: &'a Module) -> Self {
        Self {
            func: None,
            types: ResolveContext::module_scope(module),
            loops: Vec::new(),
        }
    }

    fn ty(&self, e: &Expression) -> Result<TypeInner, BackendError> {
        Ok(self.types.resolve_inner(e)?)
    }

    /// The value type of `e`, looking through references.
    fn value_ty(&self, e: &Expression) -> Result<TypeInner, BackendError> {
        Ok(self.types.resolve_pointee(e)?)
    }

    fn function(&self) -> Result<&'a Function, BackendError> {
        self.func
            .ok_or_else(|| ice("function-local expression at module scope"))
    }

    fn local(&self, h: Handle<LocalVariable>) -> Result<&'a LocalVariable, BackendError> {
        self.function()?
            .locals
            .try_get(h)
            .ok_or_else(|| ice(format!("local {h:?} out of range")))
    }
}

struct Writer<'a> {
    module: &'a Module,
    namer: Namer,
    helpers: TextBuffer,
    helper_keys: HashMap<String, String>,
    /// Set once a `tint_array` is printed.
    uses_array: bool,
    /// Structs reachable from a buffer; their `vec3` members are packed.
    host_shareable: HashSet<Handle<Type>>,
    /// Entry-point IO structs, with their stage and direction.
    io_structs: HashMap<Handle<Type>, (ShaderStage, bool)>,
}

impl<'a> Writer<'a> {
    fn new(module: &'a Module) -> Self {
        let mut namer = Namer::default();
        for (_, ty) in module.types.iter() {
            if let Some(name) = &ty.name {
                namer.reserve(struct_name(name));
            }
        }
        for (_, g) in module.global_variables.iter() {
            namer.reserve(g.name.as_str());
        }
        for (_, f) in module.functions.iter() {
            namer.reserve(f.name.as_str());
            for a in &f.arguments {
                namer.reserve(a.name.as_str());
            }
            for (_, l) in f.locals.iter() {
                namer.reserve(l.name.as_str());
            }
        }
        let mut io_structs = HashMap::new();
        for (_, ep) in module.entry_points() {
            let Some(stage) = ep.stage() else { continue };
            for arg in &ep.arguments {
                io_structs.insert(arg.ty, (stage, false));
            }
            if let Some(result) = &ep.result {
                io_structs.insert(result.ty, (stage, true));
            }
        }
        let mut host_shareable = HashSet::new();
        for (_, g) in module.global_variables.iter() {
            if g.space.is_host_shareable() {
                mark_structs(&module.types, g.ty, &mut host_shareable);
            }
        }
        Self {
            module,
            namer,
            helpers: TextBuffer::new(),
            helper_keys: HashMap::new(),
            uses_array: false,
            host_shareable,
            io_structs,
        }
    }

    fn types(&self) -> &'a UniqueArena<Type> {
        &self.module.types
    }

    fn ty(&self, h: Handle<Type>) -> Result<&'a Type, BackendError> {
        self.types()
            .try_get(h)
            .ok_or_else(|| ice(format!("type {h:?} out of range")))
    }

    fn global(&self, h: Handle<GlobalVariable>) -> Result<&'a GlobalVariable, BackendError> {
        self.module
            .global_variables
            .try_get(h)
            .ok_or_else(|| ice(format!("global {h:?} out of range")))
    }

    // Module layout -------------------------------------------------------

    fn write_module(&mut self) -> Result<(TextBuffer, TextBuffer), BackendError> {
        let module = self.module;
        let mut decls = TextBuffer::new();
        self.write_structs(&mut decls)?;

        let mut functions = TextBuffer::new();
        for h in module.function_order() {
            let func = &module.functions[h];
            if !func.is_entry_point() {
                self.write_function(&mut functions, func)?;
                functions.blank();
            }
        }
        let mut first = true;
        for (_, ep) in module.entry_points() {
            if !first {
                functions.blank();
            }
            first = false;
            self.write_entry_point(&mut functions, ep)?;
        }
        Ok((decls, functions))
    }

    fn finish(&self, decls: &TextBuffer, functions: &TextBuffer) -> String {
        let mut out = TextBuffer::new();
        out.line("#include <metal_stdlib>");
        out.blank();
        out.line("using namespace metal;");
        out.blank();
        if self.uses_array {
            TINT_ARRAY.iter().for_each(|l| out.line(*l));
            out.blank();
        }
        if !decls.is_empty() {
            out.push_block(decls);
        }
        if !self.helpers.is_empty() {
            out.push_block(&self.helpers);
        }
        out.push_block(functions);
        out.finish()
    }

    /// Returns `true` if `member` of struct `owner` prints as a packed
    /// vector.
    fn is_packed(&self, owner: Handle<Type>, member: Handle<Type>) -> Result<bool, BackendError> {
        Ok(self.host_shareable.contains(&owner)
            && matches!(
                self.ty(member)?.inner,
                TypeInner::Vector {
                    size: VectorSize::Tri,
                    ..
                }
            ))
    }

    fn write_structs(&mut self, out: &mut TextBuffer) -> Result<(), BackendError> {
        let types = self.types();
        for (h, ty) in types.iter() {
            let TypeInner::Struct { ref members, span } = ty.inner else {
                continue;
            };
            let io = self.io_structs.get(&h).copied();
            let padded = self.host_shareable.contains(&h);
            let mut lines = Vec::with_capacity(members.len());
            let mut end = 0;
            let mut pad = 0;
            let mut pad_to = |lines: &mut Vec<String>, offset: u32, end: u32, this: &mut Self| {
                if padded && offset > end {
                    this.uses_array = true;
                    let mut name = format!("tint_pad_{pad}");
                    while members.iter().any(|m| m.name == name) {
                        pad += 1;
                        name = format!("tint_pad_{pad}");
                    }
                    pad += 1;
                    lines.push(format!("tint_array<int8_t, {}> {name};", offset - end));
                }
            };
            for m in members {
                pad_to(&mut lines, m.offset, end, self);
                let decl = if self.is_packed(h, m.ty)? {
                    let TypeInner::Vector { scalar, .. } = self.ty(m.ty)?.inner else {
                        return Err(ice("packed member that is not a vector"));
                    };
                    format!("packed_{}3 {}", Self::scalar_name(scalar), m.name)
                } else {
                    format!("{} {}", self.type_name(m.ty)?, m.name)
                };
                let attribute = match (io, m.binding) {
                    (Some((stage, output)), Some(binding)) => {
                        self.io_attribute(stage, output, binding, m.ty)?
                    }
                    _ => None,
                };
                lines.push(match attribute {
                    Some(a) => format!("{decl} {a};"),
                    None => format!("{decl};"),
                });
                end = m.offset + tinct_ir::layout::layout_of(types, m.ty).size;
            }
            pad_to(&mut lines, span, end, self);
            let name = struct_name(ty.name.as_deref().unwrap_or_default());
            out.line(format!("struct {name} {{"));
            out.indented(|b| lines.into_iter().for_each(|l| b.line(l)));
            out.line("};");
            out.blank();
        }
        Ok(())
    }

    /// The attribute of an IO struct member.
    fn io_attribute(
        &self,
        stage: ShaderStage,
        output: bool,
        binding: Binding,
        ty: Handle<Type>,
    ) -> Result<Option<String>, BackendError> {
        Ok(Some(match binding {
            Binding::BuiltIn(builtin) => builtin_attribute(builtin).to_string(),
            Binding::Location {
                location,
                interpolation,
                sampling,
                blend_src,
            } => match (stage, output) {
                (ShaderStage::Vertex, false) => format!("[[attribute({location})]]"),
                (ShaderStage::Vertex, true) => format!("[[user(locn{location})]]"),
                (ShaderStage::Fragment, false) => {
                    let integer = self.ty(ty)?.inner.scalar().is_some_and(|s| s.is_integer());
                    match interpolation_attribute(interpolation, sampling, integer) {
                        Some(i) => format!("[[user(locn{location})]] {i}"),
                        None => format!("[[user(locn{location})]]"),
                    }
                }
                (ShaderStage::Fragment, true) => match blend_src {
                    Some(index) => format!("[[color({location}), index({index})]]"),
                    None => format!("[[color({location})]]"),
                },
                (ShaderStage::Compute, _) => {
                    return Err(ice("location IO on a compute shader"));
                }
            },
        }))
    }

    /// `T name` for a parameter, with pointers spelled out.
    fn param(&mut self, ty: Handle<Type>, name: &str) -> Result<String, BackendError> {
        match self.ty(ty)?.inner {
            TypeInner::Pointer {
                base,
                space,
                access,
            } => {
                let space = space_qualifier(space, access)?;
                Ok(format!("{space} {}* {name}", self.type_name(base)?))
            }
            _ => Ok(format!("{} {name}", self.type_name(ty)?)),
        }
    }

    fn write_function(&mut self, out: &mut TextBuffer, func: &'a Function) -> Result<(), BackendError> {
        let result = match &func.result {
            Some(r) => self.type_name(r.ty)?,
            None => "void".to_string(),
        };
        let mut params = Vec::with_capacity(func.arguments.len());
        for arg in &func.arguments {
            params.push(self.param(arg.ty, &arg.name)?);
        }
        let mut f = FnCtx::new(self.module, func);
        let body = self.block(&mut f, &func.body)?;
        out.line(format!("{result} {}({}) {{", func.name, params.join(", ")));
        out.indented(|b| b.push_block(&body));
        out.line("}");
        Ok(())
    }

    fn resource_slot(g: &GlobalVariable) -> Result<u32, BackendError> {
        g.binding
            .map(|b| b.binding)
            .ok_or_else(|| ice(format!("resource '{}' has no binding", g.name)))
    }

    fn write_entry_point(&mut self, out: &mut TextBuffer, ep: &'a Function) -> Result<(), BackendError> {
        let info = ep
            .entry_point
            .as_ref()
            .ok_or_else(|| ice(format!("'{}' is not an entry point", ep.name)))?;
        let stage = match info.stage {
            ShaderStage::Vertex => "vertex",
            ShaderStage::Fragment => "fragment",
            ShaderStage::Compute => "kernel",
        };
        let result = match &ep.result {
            Some(r) => self.type_name(r.ty)?,
            None => "void".to_string(),
        };

        let mut params = Vec::new();
        for arg in &ep.arguments {
            let decl = self.param(arg.ty, &arg.name)?;
            params.push(match arg.binding {
                Some(Binding::BuiltIn(b)) => format!("{decl} {}", builtin_attribute(b)),
                Some(Binding::Location { .. }) => {
                    return Err(ice("location parameter left on an entry point"));
                }
                None => format!("{decl} [[stage_in]]"),
            });
        }

        let mut locals = TextBuffer::new();
        for h in Module::globals_referenced(ep) {
            let g = self.global(h)?;
            match g.space {
                AddressSpace::Storage | AddressSpace::Uniform => {
                    let space = space_qualifier(g.space, g.access)?;
                    let t = self.type_name(g.ty)?;
                    let slot = Self::resource_slot(g)?;
                    params.push(format!("{space} {t}* {} [[buffer({slot})]]", g.name));
                }
                AddressSpace::Handle => {
                    let t = self.type_name(g.ty)?;
                    let slot = Self::resource_slot(g)?;
                    let kind = match self.ty(g.ty)?.inner {
                        TypeInner::Sampler { .. } => "sampler",
                        _ => "texture",
                    };
                    params.push(format!("{t} {} [[{kind}({slot})]]", g.name));
                }
                AddressSpace::Private => {
                    let t = self.type_name(g.ty)?;
                    let value = match &g.init {
                        Some(init) => {
                            let mut f = FnCtx::module_scope(self.module);
                            self.expr(&mut f, init)?
                        }
                        None => self.zero(g.ty)?,
                    };
                    locals.line(format!("thread {t} {} = {value};", g.name));
                }
                AddressSpace::Workgroup => {
                    let t = self.type_name(g.ty)?;
                    locals.line(format!("threadgroup {t} {};", g.name));
                }
                AddressSpace::PushConstant => {
                    return Err(unsupported(format!(
                        "push constant '{}' on MSL; use a uniform buffer",
                        g.name
                    )));
                }
                AddressSpace::In | AddressSpace::Out | AddressSpace::Function => {
                    return Err(ice(format!(
                        "module-scope {:?} variable '{}'",
                        g.space, g.name
                    )));
                }
            }
        }

        let mut f = FnCtx::new(self.module, ep);
        let body = self.block(&mut f, &ep.body)?;
        let early = if info.stage == ShaderStage::Fragment && info.early_depth_test {
            "[[early_fragment_tests]] "
        } else {
            ""
        };
        out.line(format!(
            "{early}{stage} {result} {}({}) {{",
            ep.name,
            params.join(", ")
        ));
        out.indented(|b| {
            b.push_block(&locals);
            b.push_block(&body);
        });
        out.line("}");
        Ok(())
    }

    // Types ---------------------------------------------------------------

    fn scalar_name(scalar: Scalar) -> &'static str {
        match (scalar.kind, scalar.width) {
            (ScalarKind::Bool, _) => "bool",
            (ScalarKind::Sint, _) => "int",
            (ScalarKind::Uint, _) => "uint",
            (ScalarKind::Float, 2) => "half",
            (ScalarKind::Float, _) => "float",
        }
    }

    fn vector_name(size: u32, scalar: Scalar) -> String {
        format!("{}{size}", Self::scalar_name(scalar))
    }

    fn type_name(&mut self, ty: Handle<Type>) -> Result<String, BackendError> {
        let ty = self.ty(ty)?;
        match ty.inner {
            TypeInner::Struct { .. } => {
                Ok(struct_name(ty.name.as_deref().unwrap_or_default()).to_string())
            }
            ref inner => self.inner_name(inner),
        }
    }

    fn inner_name(&mut self, inner: &TypeInner) -> Result<String, BackendError> {
        Ok(match *inner {
            TypeInner::Scalar(s) => Self::scalar_name(s).to_string(),
            TypeInner::Atomic(s) => match s.kind {
                ScalarKind::Sint => "atomic_int".to_string(),
                ScalarKind::Uint => "atomic_uint".to_string(),
                _ => return Err(ice("atomic of a non-integer")),
            },
            TypeInner::Vector { size, scalar } => Self::vector_name(size.count(), scalar),
            TypeInner::ValuePointer {
                size: Some(size),
                scalar,
                ..
            } => Self::vector_name(size.count(), scalar),
            TypeInner::ValuePointer { scalar, .. } => Self::scalar_name(scalar).to_string(),
            TypeInner::Matrix {
                columns,
                rows,
                scalar,
            } => format!("{}{}x{}", Self::scalar_name(scalar), columns.count(), rows.count()),
            TypeInner::Pointer { base, .. } => self.type_name(base)?,
            TypeInner::Array { base, size, .. } => {
                self.uses_array = true;
                let n = match size {
                    ArraySize::Constant(n) => n,
                    ArraySize::Runtime => 1,
                };
                format!("tint_array<{}, {n}>", self.type_name(base)?)
            }
            TypeInner::Struct { .. } => return Err(ice("anonymous struct type")),
            TypeInner::Sampler { .. } => "sampler".to_string(),
            TypeInner::Texture { dim, class } => Self::texture_type(dim, class)?,
        })
    }

    fn texture_type(dim: TextureDimension, class: TextureClass) -> Result<String, BackendError> {
        let d = match dim {
            TextureDimension::D1 => "1d",
            TextureDimension::D2 => "2d",
            TextureDimension::D2Array => "2d_array",
            TextureDimension::D3 => "3d",
            TextureDimension::Cube => "cube",
            TextureDimension::CubeArray => "cube_array",
        };
        let texel = |scalar: Scalar| Self::scalar_name(scalar);
        Ok(match class {
            TextureClass::Sampled(kind) => {
                format!("texture{d}<{}, access::sample>", texel(kind.scalar()))
            }
            TextureClass::Depth => format!("depth{d}<float, access::sample>"),
            TextureClass::Multisampled(kind) => match dim {
                TextureDimension::D2 => format!("texture2d_ms<{}, access::read>", texel(kind.scalar())),
                _ => return Err(ice("multisampled texture that is not 2D")),
            },
            TextureClass::DepthMultisampled => match dim {
                TextureDimension::D2 => "depth2d_ms<float, access::read>".to_string(),
                _ => return Err(ice("multisampled texture that is not 2D")),
            },
            TextureClass::Storage { format, access } => {
                let mode = match (access.contains(StorageAccess::LOAD), access.contains(StorageAccess::STORE)) {
                    (true, true) => "read_write",
                    (true, false) => "read",
                    _ => "write",
                };
                format!(
                    "texture{d}<{}, access::{mode}>",
                    texel(format.sampled_kind().scalar())
                )
            }
            TextureClass::External => {
                return Err(unsupported("texture_external without the multiplanar lowering"));
            }
        })
    }

    fn literal(lit: Literal) -> String {
        let special = |v: f32| {
            if v.is_nan() {
                "NAN"
            } else if v > 0.0 {
                "INFINITY"
            } else {
                "-INFINITY"
            }
        };
        match lit {
            Literal::Bool(b) => b.to_string(),
            Literal::I32(i32::MIN) => "(-2147483647 - 1)".to_string(),
            Literal::I32(v) => v.to_string(),
            Literal::U32(v) => format!("{v}u"),
            Literal::F32(v) => match f32_text(v) {
                Some(text) => format!("{text}f"),
                None => special(v).to_string(),
            },
            Literal::F16(v) => match f32_text(v) {
                Some(text) => format!("{text}h"),
                None => format!("half({})", special(v)),
            },
        }
    }

    fn zero(&mut self, ty: Handle<Type>) -> Result<String, BackendError> {
        Ok(match self.ty(ty)?.inner {
            TypeInner::Scalar(s) => Self::literal(Literal::zero(s)),
            _ => format!("{}{{}}", self.type_name(ty)?),
        })
    }

    // Helpers -------------------------------------------------------------

    /// Returns the name of the helper registered under `key`, writing it
    /// with `write` the first time.
    fn helper(
        &mut self,
        base: &str,
        key: String,
        write: impl FnOnce(&mut Self, &str) -> Result<TextBuffer, BackendError>,
    ) -> Result<String, BackendError> {
        if let Some(name) = self.helper_keys.get(&key) {
            return Ok(name.clone());
        }
        let name = self.namer.unique(base);
        let body = write(self, &name)?;
        self.helpers.push_block(&body);
        self.helpers.blank();
        self.helper_keys.insert(key, name.clone());
        Ok(name)
    }

    /// `modf` and `frexp` write their second result through a reference.
    fn split_float(
        &mut self,
        fun: BuiltinFn,
        arg: &TypeInner,
        result: Handle<Type>,
    ) -> Result<String, BackendError> {
        let TypeInner::Struct { ref members, .. } = self.ty(result)?.inner else {
            return Err(ice("modf/frexp result is not a struct"));
        };
        let [first, second] = members.as_slice() else {
            return Err(ice("modf/frexp result needs two members"));
        };
        let t = self.inner_name(arg)?;
        let s = self.type_name(result)?;
        let (fract, other) = (first.name.clone(), second.name.clone());
        let (base, msl) = match fun {
            BuiltinFn::Modf => ("tint_modf", "modf"),
            _ => ("tint_frexp", "frexp"),
        };
        self.helper(base, format!("{msl} {t}"), |_, name| {
            let mut b = TextBuffer::new();
            b.line(format!("{s} {name}({t} param_0) {{"));
            b.indented(|b| {
                b.line(format!("{s} result = {{}};"));
                b.line(format!("result.{fract} = {msl}(param_0, result.{other});"));
                b.line("return result;");
            });
            b.line("}");
            Ok(b)
        })
    }

    /// MSL's `dot` is float-only.
    fn integer_dot(&mut self, arg: &TypeInner) -> Result<String, BackendError> {
        let (TypeInner::Vector { size, scalar }) = *arg else {
            return Err(ice("dot of a non-vector"));
        };
        let t = Self::vector_name(size.count(), scalar);
        let s = Self::scalar_name(scalar);
        self.helper("tint_dot", format!("dot {t}"), |_, name| {
            let terms: Vec<String> = (0..size.count())
                .map(|i| format!("a[{i}]*b[{i}]"))
                .collect();
            let mut b = TextBuffer::new();
            b.line(format!("{s} {name}({t} a, {t} b) {{"));
            b.indented(|b| b.line(format!("return {};", terms.join(" + "))));
            b.line("}");
            Ok(b)
        })
    }

    /// `atomicCompareExchangeWeak` returns the old value and whether the
    /// exchange happened.
    fn compare_exchange(
        &mut self,
        pointer: &TypeInner,
        result: Handle<Type>,
    ) -> Result<String, BackendError> {
        let TypeInner::Pointer {
            base,
            space,
            access,
        } = *pointer
        else {
            return Err(ice("atomicCompareExchangeWeak on a non-pointer"));
        };
        let TypeInner::Atomic(scalar) = self.ty(base)?.inner else {
            return Err(ice("atomicCompareExchangeWeak on a non-atomic"));
        };
        let TypeInner::Struct { ref members, .. } = self.ty(result)?.inner else {
            return Err(ice("atomicCompareExchangeWeak result is not a struct"));
        };
        let [old, exchanged] = members.as_slice() else {
            return Err(ice("atomicCompareExchangeWeak result needs two members"));
        };
        let (old, exchanged) = (old.name.clone(), exchanged.name.clone());
        let q = space_qualifier(space, access)?;
        let a = self.type_name(base)?;
        let t = Self::scalar_name(scalar);
        let s = self.type_name(result)?;
        self.helper(
            "tint_atomicCompareExchangeWeak",
            format!("cmpxchg {q} {a}"),
            |_, name| {
                let mut b = TextBuffer::new();
                b.line(format!("{s} {name}({q} {a}* atomic, {t} compare, {t} value) {{"));
                b.indented(|b| {
                    b.line(format!("{t} old_value = compare;"));
                    b.line("bool exchanged = atomic_compare_exchange_weak_explicit(atomic, &old_value, value, memory_order_relaxed, memory_order_relaxed);");
                    b.line(format!("return {s}{{.{old}=old_value, .{exchanged}=exchanged}};"));
                });
                b.line("}");
                Ok(b)
            },
        )
    }

    // Statements ----------------------------------------------------------

    fn block(&mut self, f: &mut FnCtx<'a>, block: &'a Block) -> Result<TextBuffer, BackendError> {
        let mut out = TextBuffer::new();
        for stmt in block {
            self.statement(f, &mut out, stmt)?;
        }
        Ok(out)
    }

    fn statement(
        &mut self,
        f: &mut FnCtx<'a>,
        out: &mut TextBuffer,
        stmt: &'a Statement,
    ) -> Result<(), BackendError> {
        match *stmt {
            Statement::Declare { local, ref init } => {
                let var = f.local(local)?;
                let t = self.type_name(var.ty)?;
                let value = match init {
                    Some(e) => self.expr(f, e)?,
                    None => self.zero(var.ty)?,
                };
                match var.kind {
                    LocalKind::Let => out.line(format!("{t} const {} = {value};", var.name)),
                    LocalKind::Var => out.line(format!("{t} {} = {value};", var.name)),
                }
            }
            Statement::Store {
                ref pointer,
                ref value,
            } => {
                let p = self.expr(f, pointer)?;
                let v = self.expr(f, value)?;
                out.line(format!("{p} = {v};"));
            }
            Statement::Call(ref e) => {
                let text = self.expr(f, e)?;
                out.line(format!("{text};"));
            }
            Statement::If {
                ref condition,
                ref accept,
                ref reject,
            } => {
                let c = self.expr(f, condition)?;
                let accept = self.block(f, accept)?;
                out.line(format!("if ({c}) {{"));
                out.indented(|b| b.push_block(&accept));
                if !reject.is_empty() {
                    let reject = self.block(f, reject)?;
                    out.line("} else {");
                    out.indented(|b| b.push_block(&reject));
                }
                out.line("}");
            }
            Statement::Loop {
                ref body,
                ref continuing,
                ref break_if,
            } => {
                f.loops.push(Some(Continuing {
                    block: continuing,
                    break_if: break_if.as_ref(),
                }));
                let result = self.loop_body(f, body);
                f.loops.pop();
                let body = result?;
                out.line("while (true) {");
                out.indented(|b| b.push_block(&body));
                out.line("}");
            }
            Statement::Switch {
                ref selector,
                ref cases,
            } => {
                let sel = self.expr(f, selector)?;
                out.line(format!("switch({sel}) {{"));
                f.loops.push(None);
                let result = self.switch_cases(f, out, cases);
                f.loops.pop();
                result?;
                out.line("}");
            }
            Statement::Break => out.line("break;"),
            Statement::Continue => {
                self.write_continuing(f, out)?;
                out.line("continue;");
            }
            Statement::Return { ref value } => match value {
                Some(v) => {
                    let v = self.expr(f, v)?;
                    out.line(format!("return {v};"));
                }
                None => out.line("return;"),
            },
            Statement::Discard => out.line("discard_fragment();"),
            Statement::Barrier(barrier) => {
                for (flag, mem) in [
                    (Barrier::STORAGE, "mem_device"),
                    (Barrier::WORKGROUP, "mem_threadgroup"),
                    (Barrier::TEXTURE, "mem_texture"),
                ] {
                    if barrier.contains(flag) {
                        out.line(format!("threadgroup_barrier(mem_flags::{mem});"));
                    }
                }
            }
            Statement::Block(ref inner) => {
                let inner = self.block(f, inner)?;
                out.line("{");
                out.indented(|b| b.push_block(&inner));
                out.line("}");
            }
        }
        Ok(())
    }

    fn switch_cases(
        &mut self,
        f: &mut FnCtx<'a>,
        out: &mut TextBuffer,
        cases: &'a [tinct_ir::SwitchCase],
    ) -> Result<(), BackendError> {
        for case in cases {
            let labels: Vec<String> = case
                .selectors
                .iter()
                .map(|s| match *s {
                    CaseSelector::I32(v) => format!("case {}:", Self::literal(Literal::I32(v))),
                    CaseSelector::U32(v) => format!("case {v}u:"),
                    CaseSelector::Default => "default:".to_string(),
                })
                .collect();
            let Some((last, rest)) = labels.split_last() else {
                continue;
            };
            let mut body = self.block(f, &case.body)?;
            if !is_terminated(&case.body) {
                body.line("break;");
            }
            out.indented(|b| {
                for label in rest {
                    b.line(label.clone());
                }
                b.line(format!("{last} {{"));
                b.indented(|b| b.push_block(&body));
                b.line("}");
            });
        }
        Ok(())
    }

    fn loop_body(&mut self, f: &mut FnCtx<'a>, body: &'a Block) -> Result<TextBuffer, BackendError> {
        let mut inner = self.block(f, body)?;
        if !is_terminated(body) {
            self.write_continuing(f, &mut inner)?;
        }
        Ok(inner)
    }

    /// Prints the continuing construct and `break if` of the innermost
    /// loop, braced when it declares locals so it can be repeated.
    fn write_continuing(&mut self, f: &mut FnCtx<'a>, out: &mut TextBuffer) -> Result<(), BackendError> {
        let Some(Some(cont)) = f.loops.iter().rev().find(|l| l.is_some()).copied() else {
            return Ok(());
        };
        f.loops.push(None);
        let printed = self.continuing_text(f, cont);
        f.loops.pop();
        let inner = printed?;
        if cont
            .block
            .iter()
            .any(|s| matches!(s, Statement::Declare { .. }))
        {
            out.line("{");
            out.indented(|b| b.push_block(&inner));
            out.line("}");
        } else {
            out.push_block(&inner);
        }
        Ok(())
    }

    fn continuing_text(&mut self, f: &mut FnCtx<'a>, cont: Continuing<'a>) -> Result<TextBuffer, BackendError> {
        let mut inner = self.block(f, cont.block)?;
        if let Some(cond) = cont.break_if {
            let c = self.expr(f, cond)?;
            inner.line(format!("if ({c}) {{"));
            inner.indented(|b| b.line("break;"));
            inner.line("}");
        }
        Ok(inner)
    }

    // Expressions ---------------------------------------------------------

    fn exprs(&mut self, f: &mut FnCtx<'a>, list: &[Expression]) -> Result<Vec<String>, BackendError> {
        list.iter().map(|e| self.expr(f, e)).collect()
    }

    fn opt_expr(
        &mut self,
        f: &mut FnCtx<'a>,
        e: &Option<Expression>,
    ) -> Result<Option<String>, BackendError> {
        e.as_ref().map(|e| self.expr(f, e)).transpose()
    }

    /// The struct a member access on `base` selects from.
    fn struct_of(&self, f: &FnCtx<'a>, base: &Expression) -> Result<Option<Handle<Type>>, BackendError> {
        let types = self.types();
        let mut h = match f.types.resolve(base)? {
            TypeResolution::Handle(h) => h,
            TypeResolution::Value(TypeInner::Pointer { base, .. }) => base,
            TypeResolution::Value(_) => return Ok(None),
        };
        if let TypeInner::Pointer { base, .. } = self.ty(h)?.inner {
            h = base;
        }
        Ok(matches!(types[h].inner, TypeInner::Struct { .. }).then_some(h))
    }

    /// Returns `true` if `e` selects a packed `vec3` struct member.
    fn selects_packed(&self, f: &FnCtx<'a>, e: &Expression) -> Result<bool, BackendError> {
        let Expression::AccessIndex { ref base, index } = *e else {
            return Ok(false);
        };
        let Some(owner) = self.struct_of(f, base)? else {
            return Ok(false);
        };
        let TypeInner::Struct { ref members, .. } = self.ty(owner)?.inner else {
            return Ok(false);
        };
        match members.get(index as usize) {
            Some(m) => self.is_packed(owner, m.ty),
            None => Err(ice(format!("member {index} out of range"))),
        }
    }

    /// Unpacks `text` when it names a packed `vec3` member.
    fn unpacked(&self, f: &FnCtx<'a>, e: &Expression, text: String) -> Result<String, BackendError> {
        if !self.selects_packed(f, e)? {
            return Ok(text);
        }
        match f.value_ty(e)? {
            TypeInner::Vector { size, scalar } => {
                Ok(format!("{}({text})", Self::vector_name(size.count(), scalar)))
            }
            _ => Ok(text),
        }
    }

    fn expr(&mut self, f: &mut FnCtx<'a>, e: &Expression) -> Result<String, BackendError> {
        Ok(match *e {
            Expression::Literal(lit) => Self::literal(lit),
            Expression::ZeroValue(ty) => self.zero(ty)?,
            Expression::Compose { ty, ref components } => {
                let parts = self.exprs(f, components)?;
                let t = self.type_name(ty)?;
                match self.ty(ty)?.inner {
                    TypeInner::Struct { ref members, .. } => {
                        let fields: Vec<String> = members
                            .iter()
                            .zip(parts)
                            .map(|(m, v)| format!(".{}={v}", m.name))
                            .collect();
                        format!("{t}{{{}}}", fields.join(", "))
                    }
                    TypeInner::Array { .. } => format!("{t}{{{}}}", parts.join(", ")),
                    _ => format!("{t}({})", parts.join(", ")),
                }
            }
            Expression::Splat { ref value, size } => {
                let scalar = f
                    .ty(value)?
                    .scalar()
                    .ok_or_else(|| ice("splat of a non-scalar"))?;
                let v = self.expr(f, value)?;
                format!("{}({v})", Self::vector_name(size.count(), scalar))
            }
            Expression::Swizzle {
                ref vector,
                ref pattern,
            } => {
                let v = self.expr(f, vector)?;
                let letters: String = pattern.iter().map(|c| c.letter()).collect();
                format!("{v}.{letters}")
            }
            Expression::FunctionArgument(i) => {
                let func = f.function()?;
                let arg = func
                    .arguments
                    .get(i as usize)
                    .ok_or_else(|| ice(format!("argument {i} out of range")))?;
                match self.ty(arg.ty)?.inner {
                    TypeInner::Pointer { .. } => format!("(*{})", arg.name),
                    _ => arg.name.clone(),
                }
            }
            Expression::GlobalVariable(h) => {
                let g = self.global(h)?;
                match g.space {
                    AddressSpace::Storage | AddressSpace::Uniform => format!("(*{})", g.name),
                    _ => g.name.clone(),
                }
            }
            Expression::LocalVariable(h) => f.local(h)?.name.clone(),
            Expression::Override(_) => {
                return Err(unsupported("override expression that was not substituted"));
            }
            Expression::Load { ref pointer } => {
                let p = self.expr(f, pointer)?;
                self.unpacked(f, pointer, p)?
            }
            Expression::Access {
                ref base,
                ref index,
            } => {
                let b = self.expr(f, base)?;
                let i = self.expr(f, index)?;
                format!("{b}[{i}]")
            }
            Expression::AccessIndex { ref base, index } => {
                let b = self.expr(f, base)?;
                let text = match f.value_ty(base)? {
                    TypeInner::Struct { ref members, .. } => {
                        let m = members
                            .get(index as usize)
                            .ok_or_else(|| ice(format!("member {index} out of range")))?;
                        format!("{b}.{}", m.name)
                    }
                    TypeInner::Vector { .. } => format!("{b}.{}", component_letter(index)?),
                    _ => format!("{b}[{index}]"),
                };
                // A pointer is unpacked by the load that reads it.
                if f.ty(base)?.is_pointer() {
                    text
                } else {
                    self.unpacked(f, e, text)?
                }
            }
            Expression::Unary { op, ref expr } => {
                let ty = f.ty(expr)?;
                let v = self.expr(f, expr)?;
                match op {
                    UnaryOp::Negate if ty.scalar_kind() == Some(ScalarKind::Sint) => {
                        let (signed, unsigned) = self.bit_types(&ty)?;
                        format!("as_type<{signed}>((0u - as_type<{unsigned}>({v})))")
                    }
                    UnaryOp::Negate => format!("-({v})"),
                    UnaryOp::LogicalNot => format!("!({v})"),
                    UnaryOp::BitwiseNot => format!("~({v})"),
                }
            }
            Expression::Binary {
                op,
                ref left,
                ref right,
            } => self.binary(f, op, left, right)?,
            Expression::Convert { ref expr, ty } => {
                let v = self.expr(f, expr)?;
                format!("{}({v})", self.type_name(ty)?)
            }
            Expression::Bitcast { ref expr, ty } => {
                let v = self.expr(f, expr)?;
                format!("as_type<{}>({v})", self.type_name(ty)?)
            }
            Expression::Call {
                function,
                ref arguments,
            } => {
                let callee = self
                    .module
                    .functions
                    .try_get(function)
                    .ok_or_else(|| ice(format!("function {function:?} out of range")))?;
                let mut args = Vec::with_capacity(arguments.len());
                for (arg, param) in arguments.iter().zip(&callee.arguments) {
                    let text = self.expr(f, arg)?;
                    args.push(if self.ty(param.ty)?.inner.is_pointer() {
                        address_of(&text)
                    } else {
                        text
                    });
                }
                format!("{}({})", callee.name, args.join(", "))
            }
            Expression::Builtin { fun, ref arguments } => self.builtin(f, e, fun, arguments)?,
            Expression::Texture(ref call) => self.texture(f, call)?,
        })
    }

    /// The signed and unsigned type names for wrapping integer math on
    /// values of type `ty`.
    fn bit_types(&self, ty: &TypeInner) -> Result<(String, String), BackendError> {
        Ok(match *ty {
            TypeInner::Vector { size, .. } => {
                let n = size.count();
                (format!("int{n}"), format!("uint{n}"))
            }
            TypeInner::Scalar(_) => ("int".into(), "uint".into()),
            _ => return Err(ice("integer operation on a non-numeric value")),
        })
    }

    fn binary(
        &mut self,
        f: &mut FnCtx<'a>,
        op: BinaryOp,
        left: &Expression,
        right: &Expression,
    ) -> Result<String, BackendError> {
        let (lt, rt) = (f.ty(left)?, f.ty(right)?);
        let l = self.expr(f, left)?;
        let r = self.expr(f, right)?;
        let sym = binary_symbol(op);
        let kind = lt.scalar_kind();

        // Signed overflow is undefined in C++; WGSL wraps.
        let wraps = matches!(
            op,
            BinaryOp::Add | BinaryOp::Subtract | BinaryOp::Multiply | BinaryOp::ShiftLeft
        );
        let is_matrix = |t: &TypeInner| matches!(t, TypeInner::Matrix { .. });
        if wraps && kind == Some(ScalarKind::Sint) && !is_matrix(&lt) && !is_matrix(&rt) {
            let result = if lt.vector_size().is_some() { &lt } else { &rt };
            let (signed, _) = self.bit_types(result)?;
            let (_, ul) = self.bit_types(&lt)?;
            let r = if op == BinaryOp::ShiftLeft {
                r
            } else {
                let (_, ur) = self.bit_types(&rt)?;
                format!("as_type<{ur}>({r})")
            };
            return Ok(format!("as_type<{signed}>((as_type<{ul}>({l}) {sym} {r}))"));
        }
        if kind == Some(ScalarKind::Bool) && matches!(op, BinaryOp::BitwiseAnd | BinaryOp::BitwiseOr) {
            return Ok(match lt.vector_size() {
                Some(size) => {
                    let n = size.count();
                    format!("bool{n}((uint{n}({l}) {sym} uint{n}({r})))")
                }
                None => format!("bool((uint({l}) {sym} uint({r})))"),
            });
        }
        if op == BinaryOp::Modulo && kind == Some(ScalarKind::Float) {
            // fmod takes matching types.
            let splat = |v: &str, t: &TypeInner| -> Result<String, BackendError> {
                let (Some(size), Some(scalar)) = (t.vector_size(), t.scalar()) else {
                    return Err(ice("modulo of a non-numeric value"));
                };
                Ok(format!("{}({v})", Self::vector_name(size.count(), scalar)))
            };
            let (l, r) = match (lt.vector_size(), rt.vector_size()) {
                (Some(_), None) => (l, splat(&r, &lt)?),
                (None, Some(_)) => (splat(&l, &rt)?, r),
                _ => (l, r),
            };
            return Ok(format!("fmod({l}, {r})"));
        }
        Ok(format!("({l} {sym} {r})"))
    }

    fn builtin(
        &mut self,
        f: &mut FnCtx<'a>,
        whole: &Expression,
        fun: BuiltinFn,
        arguments: &[Expression],
    ) -> Result<String, BackendError> {
        use BuiltinFn as B;
        let first = arguments
            .first()
            .ok_or_else(|| ice(format!("{} without arguments", fun.wgsl_name())))?;
        let arg_ty = f.ty(first)?;
        if fun.is_atomic() {
            return self.atomic(f, whole, fun, arguments, &arg_ty);
        }
        let a = self.exprs(f, arguments)?;
        let arg = |i: usize| a.get(i).cloned().unwrap_or_default();
        let call = |name: &str| format!("{name}({})", a.join(", "));
        let is_vector = arg_ty.vector_size().is_some();

        Ok(match fun {
            B::Acos | B::Acosh | B::Asin | B::Asinh | B::Atan | B::Atanh | B::Ceil | B::Clamp
            | B::Cos | B::Cosh | B::Cross | B::Determinant | B::Exp | B::Exp2 | B::Floor
            | B::Fma | B::Fract | B::Ldexp | B::Log | B::Log2 | B::Max | B::Min | B::Mix
            | B::Normalize | B::Pow | B::Reflect | B::Refract | B::Sign | B::Sin | B::Sinh
            | B::Sqrt | B::Step | B::Tan | B::Tanh | B::Transpose | B::Trunc | B::Saturate
            | B::Fwidth | B::Atan2 => call(fun.wgsl_name()),
            B::Abs if arg_ty.scalar_kind() == Some(ScalarKind::Uint) => arg(0),
            B::Abs => call("abs"),
            B::All | B::Any if !is_vector => arg(0),
            B::All | B::Any => call(fun.wgsl_name()),
            B::Length if !is_vector => format!("fabs({})", arg(0)),
            B::Length => call("length"),
            B::Distance if !is_vector => format!("fabs(({} - {}))", arg(0), arg(1)),
            B::Distance => call("distance"),
            B::Dot if arg_ty.scalar().is_some_and(|s| s.is_integer()) => {
                let name = self.integer_dot(&arg_ty)?;
                call(&name)
            }
            B::Dot => call("dot"),
            B::FaceForward => call("faceforward"),
            B::SmoothStep => call("smoothstep"),
            B::InverseSqrt => call("rsqrt"),
            B::Round => call("rint"),
            B::Degrees => format!("(({}) * 57.295779513082322865f)", arg(0)),
            B::Radians => format!("(({}) * 0.017453292519943295474f)", arg(0)),
            B::CountOneBits => call("popcount"),
            B::CountLeadingZeros => call("clz"),
            B::CountTrailingZeros => call("ctz"),
            B::ReverseBits => call("reverse_bits"),
            B::ExtractBits => format!("extract_bits({}, uint({}), uint({}))", arg(0), arg(1), arg(2)),
            B::InsertBits => format!(
                "insert_bits({}, {}, uint({}), uint({}))",
                arg(0),
                arg(1),
                arg(2),
                arg(3)
            ),
            B::Select => {
                let cond_ty = arguments
                    .get(2)
                    .map(|c| f.ty(c))
                    .transpose()?
                    .ok_or_else(|| ice("select without a condition"))?;
                if is_vector && cond_ty.vector_size().is_none() {
                    format!("(({}) ? {} : {})", arg(2), arg(1), arg(0))
                } else {
                    call("select")
                }
            }
            B::Dpdx | B::DpdxCoarse | B::DpdxFine => call("dfdx"),
            B::Dpdy | B::DpdyCoarse | B::DpdyFine => call("dfdy"),
            B::FwidthCoarse | B::FwidthFine => call("fwidth"),
            B::QuantizeToF16 => match arg_ty.vector_size() {
                Some(size) => {
                    let n = size.count();
                    format!("float{n}(half{n}({}))", arg(0))
                }
                None => format!("float(half({}))", arg(0)),
            },
            B::Pack2x16Float => format!("as_type<uint>(half2({}))", arg(0)),
            B::Unpack2x16Float => format!("float2(as_type<half2>({}))", arg(0)),
            B::Pack2x16Snorm => call("pack_float_to_snorm2x16"),
            B::Pack2x16Unorm => call("pack_float_to_unorm2x16"),
            B::Pack4x8Snorm => call("pack_float_to_snorm4x8"),
            B::Pack4x8Unorm => call("pack_float_to_unorm4x8"),
            B::Unpack2x16Snorm => call("unpack_snorm2x16_to_float"),
            B::Unpack2x16Unorm => call("unpack_unorm2x16_to_float"),
            B::Unpack4x8Snorm => call("unpack_snorm4x8_to_float"),
            B::Unpack4x8Unorm => call("unpack_unorm4x8_to_float"),
            B::Modf | B::Frexp => {
                let result = f
                    .types
                    .resolve(whole)?
                    .handle()
                    .ok_or_else(|| ice("modf/frexp result type is not named"))?;
                let name = self.split_float(fun, &arg_ty, result)?;
                call(&name)
            }
            B::ArrayLength => {
                return Err(unsupported(
                    "arrayLength on a buffer without a size index in the buffer-size uniform",
                ));
            }
            B::FirstLeadingBit | B::FirstTrailingBit | B::Dot4I8Packed | B::Dot4U8Packed
            | B::Pack4xI8 | B::Pack4xU8 | B::Unpack4xI8 | B::Unpack4xU8 => {
                return Err(ice(format!("{} must be polyfilled for MSL", fun.wgsl_name())));
            }
            _ => return Err(ice(format!("{} reached the plain builtin printer", fun.wgsl_name()))),
        })
    }

    fn atomic(
        &mut self,
        f: &mut FnCtx<'a>,
        whole: &Expression,
        fun: BuiltinFn,
        arguments: &[Expression],
        pointer_ty: &TypeInner,
    ) -> Result<String, BackendError> {
        use BuiltinFn as B;
        let [pointer, rest @ ..] = arguments else {
            return Err(ice("atomic builtin without a pointer"));
        };
        let p = address_of(&self.expr(f, pointer)?);
        let values = self.exprs(f, rest)?;
        let value = values.first().cloned().unwrap_or_default();
        let op = match fun {
            B::AtomicLoad => return Ok(format!("atomic_load_explicit({p}, memory_order_relaxed)")),
            B::AtomicStore => {
                return Ok(format!("atomic_store_explicit({p}, {value}, memory_order_relaxed)"));
            }
            B::AtomicCompareExchangeWeak => {
                let result = f
                    .types
                    .resolve(whole)?
                    .handle()
                    .ok_or_else(|| ice("atomicCompareExchangeWeak result type is not named"))?;
                let name = self.compare_exchange(pointer_ty, result)?;
                return Ok(format!("{name}({p}, {})", values.join(", ")));
            }
            B::AtomicExchange => "exchange",
            B::AtomicAdd => "fetch_add",
            B::AtomicSub => "fetch_sub",
            B::AtomicMax => "fetch_max",
            B::AtomicMin => "fetch_min",
            B::AtomicAnd => "fetch_and",
            B::AtomicOr => "fetch_or",
            B::AtomicXor => "fetch_xor",
            _ => return Err(ice(format!("{} is not an atomic", fun.wgsl_name()))),
        };
        Ok(format!("atomic_{op}_explicit({p}, {value}, memory_order_relaxed)"))
    }

    fn texture(&mut self, f: &mut FnCtx<'a>, call: &TextureCall) -> Result<String, BackendError> {
        let TypeInner::Texture { dim, class } = f.value_ty(&call.texture)? else {
            return Err(ice("texture builtin on a non-texture"));
        };
        let t = self.expr(f, &call.texture)?;
        let s = self.opt_expr(f, &call.sampler)?;
        let coords = self.opt_expr(f, &call.coords)?;
        let layer = self.opt_expr(f, &call.array_index)?;
        let level = self.opt_expr(f, &call.level)?;
        let sample = self.opt_expr(f, &call.sample_index)?;
        let bias = self.opt_expr(f, &call.bias)?;
        let ddx = self.opt_expr(f, &call.ddx)?;
        let ddy = self.opt_expr(f, &call.ddy)?;
        let dref = self.opt_expr(f, &call.depth_ref)?;
        let offset = self.opt_expr(f, &call.offset)?;
        let value = self.opt_expr(f, &call.value)?;
        let name = call.fun.wgsl_name();
        let need = |o: &Option<String>, what: &str| {
            o.clone()
                .ok_or_else(|| ice(format!("{name} without {what}")))
        };

        // Sampler, coordinates and layer, the head of every sampling call.
        let head = || -> Result<Vec<String>, BackendError> {
            let mut args = vec![need(&s, "a sampler")?, need(&coords, "coordinates")?];
            args.extend(layer.clone());
            Ok(args)
        };
        let finish = |method: &str, mut args: Vec<String>, extra: Option<String>| {
            args.extend(extra);
            args.extend(offset.clone());
            format!("{t}.{method}({})", args.join(", "))
        };
        let integer_coords = || -> Result<String, BackendError> {
            let c = need(&coords, "coordinates")?;
            Ok(match dim.coordinate_count() {
                1 => format!("uint({c})"),
                n => format!("uint{n}({c})"),
            })
        };
        let gradient = match dim {
            TextureDimension::D3 => "gradient3d",
            TextureDimension::Cube | TextureDimension::CubeArray => "gradientcube",
            _ => "gradient2d",
        };
        let mipped = matches!(class, TextureClass::Sampled(_) | TextureClass::Depth);

        Ok(match call.fun {
            TextureFn::Sample => finish("sample", head()?, None),
            TextureFn::SampleBias => {
                finish("sample", head()?, Some(format!("bias({})", need(&bias, "a bias")?)))
            }
            TextureFn::SampleLevel => {
                finish("sample", head()?, Some(format!("level({})", need(&level, "a level")?)))
            }
            TextureFn::SampleGrad => finish(
                "sample",
                head()?,
                Some(format!(
                    "{gradient}({}, {})",
                    need(&ddx, "ddx")?,
                    need(&ddy, "ddy")?
                )),
            ),
            TextureFn::SampleCompare => {
                let mut args = head()?;
                args.push(need(&dref, "a depth reference")?);
                finish("sample_compare", args, None)
            }
            TextureFn::SampleCompareLevel => {
                let mut args = head()?;
                args.push(need(&dref, "a depth reference")?);
                finish("sample_compare", args, Some("level(0)".into()))
            }
            TextureFn::SampleBaseClampToEdge => {
                let c = need(&coords, "coordinates")?;
                let sampler = need(&s, "a sampler")?;
                let half_texel =
                    format!("(float2(0.5f) / float2({t}.get_width(), {t}.get_height()))");
                format!(
                    "{t}.sample({sampler}, clamp({c}, {half_texel}, (1.0f - {half_texel})), level(0.0f))"
                )
            }
            TextureFn::Gather => {
                let mut args = head()?;
                let cube = matches!(dim, TextureDimension::Cube | TextureDimension::CubeArray);
                if class.is_depth() {
                    args.extend(offset.clone());
                } else {
                    if !cube {
                        args.push(offset.clone().unwrap_or_else(|| "int2(0)".into()));
                    }
                    let component = match call.component {
                        Some(Expression::Literal(Literal::I32(c))) => c as u32,
                        Some(Expression::Literal(Literal::U32(c))) => c,
                        None => 0,
                        Some(_) => return Err(ice("textureGather component is not a literal")),
                    };
                    args.push(format!("component::{}", component_letter(component)?));
                }
                format!("{t}.gather({})", args.join(", "))
            }
            TextureFn::GatherCompare => {
                let mut args = head()?;
                args.push(need(&dref, "a depth reference")?);
                finish("gather_compare", args, None)
            }
            TextureFn::Load => {
                let mut args = vec![integer_coords()?];
                args.extend(layer.iter().map(|l| format!("uint({l})")));
                args.extend(sample.iter().map(|s| format!("uint({s})")));
                if mipped {
                    args.extend(level.iter().map(|l| format!("uint({l})")));
                }
                format!("{t}.read({})", args.join(", "))
            }
            TextureFn::Store => {
                let mut args = vec![need(&value, "a value")?, integer_coords()?];
                args.extend(layer.iter().map(|l| format!("uint({l})")));
                format!("{t}.write({})", args.join(", "))
            }
            TextureFn::Dimensions => {
                let lod = match (&level, mipped) {
                    (Some(l), true) => format!("uint({l})"),
                    _ => String::new(),
                };
                let get = |axis: &str| format!("{t}.get_{axis}({lod})");
                match dim.size_components() {
                    1 => get("width"),
                    2 => format!("uint2({}, {})", get("width"), get("height")),
                    _ => format!("uint3({}, {}, {})", get("width"), get("height"), get("depth")),
                }
            }
            TextureFn::NumLayers => format!("{t}.get_array_size()"),
            TextureFn::NumLevels => format!("{t}.get_num_mip_levels()"),
            TextureFn::NumSamples => format!("{t}.get_num_samples()"),
        })
    }
}

/// Adds `ty` and every struct nested in it to `out`.
fn mark_structs(types: &UniqueArena<Type>, ty: Handle<Type>, out: &mut HashSet<Handle<Type>>) {
    match types[ty].inner {
        TypeInner::Struct { ref members, .. } => {
            if out.insert(ty) {
                for m in members {
                    mark_structs(types, m.ty, out);
                }
            }
        }
        TypeInner::Array { base, .. } => mark_structs(types, base, out),
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{EntryPoint, SampledKind, TexelFormat};

    #[test]
    fn literals() {
        assert_eq!(Writer::literal(Literal::F32(1.0)), "1.0f");
        assert_eq!(Writer::literal(Literal::F32(f32::INFINITY)), "INFINITY");
        assert_eq!(Writer::literal(Literal::F32(f32::NEG_INFINITY)), "-INFINITY");
        assert_eq!(Writer::literal(Literal::F32(f32::NAN)), "NAN");
        assert_eq!(Writer::literal(Literal::F16(0.5)), "0.5h");
        assert_eq!(Writer::literal(Literal::I32(i32::MIN)), "(-2147483647 - 1)");
        assert_eq!(Writer::literal(Literal::U32(7)), "7u");
    }

    #[test]
    fn texture_types() {
        let t = |dim, class| Writer::texture_type(dim, class).unwrap();
        assert_eq!(
            t(TextureDimension::D2, TextureClass::Sampled(SampledKind::Float)),
            "texture2d<float, access::sample>"
        );
        assert_eq!(
            t(TextureDimension::CubeArray, TextureClass::Depth),
            "depthcube_array<float, access::sample>"
        );
        assert_eq!(
            t(TextureDimension::D2, TextureClass::Multisampled(SampledKind::Uint)),
            "texture2d_ms<uint, access::read>"
        );
        assert_eq!(
            t(
                TextureDimension::D3,
                TextureClass::Storage {
                    format: TexelFormat::R32Sint,
                    access: StorageAccess::STORE,
                }
            ),
            "texture3d<int, access::write>"
        );
        assert!(Writer::texture_type(TextureDimension::D2, TextureClass::External).is_err());
    }

    #[test]
    fn pointer_addresses() {
        assert_eq!(address_of("(*data)"), "data");
        assert_eq!(address_of("(*data).items"), "&(*data).items");
        assert_eq!(address_of("hits"), "&hits");
        assert_eq!(
            space_qualifier(AddressSpace::Storage, StorageAccess::LOAD).unwrap(),
            "const device"
        );
        assert_eq!(
            space_qualifier(AddressSpace::Workgroup, StorageAccess::LOAD_STORE).unwrap(),
            "threadgroup"
        );
    }

    #[test]
    fn interpolation_attributes() {
        assert_eq!(interpolation_attribute(None, None, true), Some("[[flat]]"));
        assert_eq!(interpolation_attribute(None, None, false), None);
        assert_eq!(
            interpolation_attribute(Some(Interpolation::Linear), None, false),
            Some("[[center_no_perspective]]")
        );
        assert_eq!(
            interpolation_attribute(Some(Interpolation::Perspective), Some(Sampling::Centroid), false),
            Some("[[centroid_perspective]]")
        );
    }

    #[test]
    fn buffer_structs_are_packed_and_padded() {
        let mut module = Module::default();
        let f32_ty = module.scalar_type(Scalar::F32);
        let vec3 = module.vector_type(VectorSize::Tri, Scalar::F32);
        let vec4 = module.vector_type(VectorSize::Quad, Scalar::F32);
        let s = module.struct_type("S", &[("a", vec3), ("b", f32_ty), ("c", f32_ty), ("d", vec4)]);
        module.global_variables.append(
            GlobalVariable::new("buf", AddressSpace::Storage, s)
                .with_binding(0, 2)
                .with_access(StorageAccess::LOAD_STORE),
        );
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::compute(1, 1, 1));
        module.functions.append(main);

        let text = print(&module).unwrap();
        assert!(text.starts_with("#include <metal_stdlib>\n\nusing namespace metal;\n"), "{text}");
        assert!(text.contains("  packed_float3 a;\n  float b;\n"), "{text}");
        // `c` sits at 16, `d` at 32.
        assert!(text.contains("  float c;\n  tint_array<int8_t, 12> tint_pad_0;\n  float4 d;\n"), "{text}");
        assert!(text.contains("struct tint_array {"), "{text}");
        assert!(text.contains("kernel void main() {"), "{text}");
    }
}
