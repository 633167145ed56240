//! Prints a sanitized module as HLSL source.
//!
//! The input must have been through [`crate::sanitize`]: entry points take
//! at most one IO struct and return one, callees take no pointers into
//! buffers, and no pointer `let`s are left. Buffer accesses are printed
//! by [`crate::buffer`].

use std::collections::HashMap;

use tinct_backend_core::{BackendError, Namer, TextBuffer, f32_text};
use tinct_ir::{
    AddressSpace, ArraySize, Barrier, BinaryOp, Binding, Block, BuiltIn, BuiltinFn, CaseSelector,
    Expression, Function, GlobalVariable, Handle, Interpolation, Literal, LocalVariable, Module,
    ResolveContext, Sampling, Scalar, ScalarKind, ShaderStage, Statement, StorageAccess,
    TextureCall, TextureClass, TextureDimension, TextureFn, Type, TypeInner, UnaryOp, UniqueArena,
    WorkgroupDim, is_terminated,
};

use crate::Options;

/// Prints `module` as one HLSL source file holding every entry point.
pub fn print(module: &Module, options: &Options) -> Result<String, BackendError> {
    let mut writer = Writer::new(module, options);
    let (decls, functions) = writer.write_module()?;
    Ok(writer.finish(&decls, &functions))
}

pub(crate) fn unsupported(what: impl Into<String>) -> BackendError {
    BackendError::Unsupported(what.into())
}

pub(crate) fn ice(what: impl Into<String>) -> BackendError {
    BackendError::Ice(what.into())
}

/// Identifiers starting with `__` are reserved in HLSL.
fn struct_name(name: &str) -> &str {
    name.trim_start_matches("__")
}

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

fn texture_dim_name(dim: TextureDimension) -> &'static str {
    match dim {
        TextureDimension::D1 => "1D",
        TextureDimension::D2 => "2D",
        TextureDimension::D2Array => "2DArray",
        TextureDimension::D3 => "3D",
        TextureDimension::Cube => "Cube",
        TextureDimension::CubeArray => "CubeArray",
    }
}

fn texel_vector(scalar: Scalar) -> &'static str {
    match scalar.kind {
        ScalarKind::Sint => "int4",
        ScalarKind::Uint => "uint4",
        _ => "float4",
    }
}

/// `count` consecutive components starting at `first`.
pub(crate) fn swizzle(first: u32, count: u32) -> Result<&'static str, BackendError> {
    "xyzw"
        .get(first as usize..(first + count) as usize)
        .ok_or_else(|| ice(format!("swizzle of {count} components at {first}")))
}

/// The semantic of a builtin IO value.
fn builtin_semantic(builtin: BuiltIn) -> Result<&'static str, BackendError> {
    Ok(match builtin {
        BuiltIn::Position { .. } => "SV_Position",
        BuiltIn::VertexIndex => "SV_VertexID",
        BuiltIn::InstanceIndex => "SV_InstanceID",
        BuiltIn::FrontFacing => "SV_IsFrontFace",
        BuiltIn::FragDepth => "SV_Depth",
        BuiltIn::SampleIndex => "SV_SampleIndex",
        BuiltIn::SampleMask => "SV_Coverage",
        BuiltIn::LocalInvocationId => "SV_GroupThreadID",
        BuiltIn::LocalInvocationIndex => "SV_GroupIndex",
        BuiltIn::GlobalInvocationId => "SV_DispatchThreadID",
        BuiltIn::WorkgroupId => "SV_GroupID",
        BuiltIn::PointSize => return Err(unsupported("point_size output on HLSL")),
        BuiltIn::NumWorkgroups => {
            return Err(ice("num_workgroups left after reading it from a uniform"));
        }
    })
}

/// Where each `GetDimensions` output lands in the `uint4` returned by the
/// texture info helper.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) struct TextureInfo {
    /// Takes a mip level argument.
    pub mip: bool,
    /// Number of outputs.
    pub count: u32,
    pub layers: Option<u32>,
    pub levels: Option<u32>,
    pub samples: Option<u32>,
}

pub(crate) fn texture_info(dim: TextureDimension, class: TextureClass) -> TextureInfo {
    let size = match dim {
        TextureDimension::D1 => 1,
        TextureDimension::D3 => 3,
        _ => 2,
    };
    let layers = dim.is_arrayed().then_some(size);
    let count = size + u32::from(dim.is_arrayed());
    match class {
        TextureClass::Storage { .. } => TextureInfo {
            mip: false,
            count,
            layers,
            levels: None,
            samples: None,
        },
        c if c.is_multisampled() => TextureInfo {
            mip: false,
            count: count + 1,
            layers,
            levels: None,
            samples: Some(count),
        },
        _ => TextureInfo {
            mip: true,
            count: count + 1,
            layers,
            levels: Some(count),
            samples: None,
        },
    }
}

/// The continuing construct of the innermost loop, printed again before
/// every `continue`.
#[derive(Clone, Copy)]
struct Continuing<'a> {
    block: &'a Block,
    break_if: Option<&'a Expression>,
}

/// Per-function printing state.
pub(crate) struct FnCtx<'a> {
    func: Option<&'a Function>,
    pub(crate) types: ResolveContext<'a>,
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

    pub(crate) fn module_scope(module: &'a Module) -> Self {
        Self {
            func: None,
            types: ResolveContext::module_scope(module),
            loops: Vec::new(),
        }
    }

    pub(crate) fn ty(&self, e: &Expression) -> Result<TypeInner, BackendError> {
        Ok(self.types.resolve_inner(e)?)
    }

    /// The value type of `e`, looking through references.
    pub(crate) fn value_ty(&self, e: &Expression) -> Result<TypeInner, BackendError> {
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

pub(crate) struct Writer<'a> {
    pub(crate) module: &'a Module,
    options: &'a Options,
    pub(crate) namer: Namer,
    helpers: TextBuffer,
    /// Helper key to function name. Helpers of one family share an
    /// overloaded name.
    helper_keys: HashMap<String, String>,
    helper_families: HashMap<&'static str, String>,
    /// Lines that must run before the statement being printed.
    pub(crate) pending: Vec<String>,
    /// Entry-point IO structs, with their stage and direction.
    io_structs: HashMap<Handle<Type>, (ShaderStage, bool)>,
}

impl<'a> Writer<'a> {
    pub(crate) fn new(module: &'a Module, options: &'a Options) -> Self {
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
        Self {
            module,
            options,
            namer,
            helpers: TextBuffer::new(),
            helper_keys: HashMap::new(),
            helper_families: HashMap::new(),
            pending: Vec::new(),
            io_structs,
        }
    }

    pub(crate) fn types(&self) -> &'a UniqueArena<Type> {
        &self.module.types
    }

    pub(crate) fn ty(&self, h: Handle<Type>) -> Result<&'a Type, BackendError> {
        self.types()
            .try_get(h)
            .ok_or_else(|| ice(format!("type {h:?} out of range")))
    }

    pub(crate) fn global(&self, h: Handle<GlobalVariable>) -> Result<&'a GlobalVariable, BackendError> {
        self.module
            .global_variables
            .try_get(h)
            .ok_or_else(|| ice(format!("global {h:?} out of range")))
    }

    fn flush(&mut self, out: &mut TextBuffer) {
        for line in self.pending.drain(..) {
            out.line(line);
        }
    }

    // Module layout -------------------------------------------------------

    fn write_module(&mut self) -> Result<(TextBuffer, TextBuffer), BackendError> {
        let module = self.module;
        let mut decls = TextBuffer::new();
        self.write_structs(&mut decls)?;
        self.write_globals(&mut decls)?;

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
            self.write_entry_point_attributes(&mut functions, ep)?;
            self.write_function(&mut functions, ep)?;
        }
        Ok((decls, functions))
    }

    fn finish(&self, decls: &TextBuffer, functions: &TextBuffer) -> String {
        let mut out = TextBuffer::new();
        if !decls.is_empty() {
            out.push_block(decls);
            out.blank();
        }
        if !self.helpers.is_empty() {
            out.push_block(&self.helpers);
        }
        out.push_block(functions);
        out.finish()
    }

    fn write_structs(&mut self, out: &mut TextBuffer) -> Result<(), BackendError> {
        let types = self.types();
        for (h, ty) in types.iter() {
            let TypeInner::Struct { ref members, .. } = ty.inner else {
                continue;
            };
            // Only reachable through a buffer, which is read member-wise.
            let runtime_sized = members.last().is_some_and(|m| {
                matches!(
                    types[m.ty].inner,
                    TypeInner::Array {
                        size: ArraySize::Runtime,
                        ..
                    }
                )
            });
            let io = self.io_structs.get(&h).copied();
            let stale_io = io.is_none() && members.iter().any(|m| m.binding.is_some());
            if runtime_sized || stale_io {
                continue;
            }
            let mut lines = Vec::with_capacity(members.len());
            for m in members {
                let decl = self.declare(m.ty, &m.name)?;
                lines.push(match (io, m.binding) {
                    (Some((stage, output)), Some(binding)) => {
                        let (modifiers, semantic) = self.io_member(stage, output, binding, m.ty)?;
                        format!("{modifiers}{decl} : {semantic};")
                    }
                    _ => format!("{decl};"),
                });
            }
            let name = struct_name(ty.name.as_deref().unwrap_or_default());
            out.line(format!("struct {name} {{"));
            out.indented(|b| lines.into_iter().for_each(|l| b.line(l)));
            out.line("};");
            out.blank();
        }
        Ok(())
    }

    /// Interpolation modifiers and semantic of an IO struct member.
    fn io_member(
        &self,
        stage: ShaderStage,
        output: bool,
        binding: Binding,
        ty: Handle<Type>,
    ) -> Result<(String, String), BackendError> {
        match binding {
            Binding::BuiltIn(builtin) => {
                let precise = matches!(builtin, BuiltIn::Position { invariant: true });
                let modifiers = if precise { "precise " } else { "" };
                Ok((modifiers.to_string(), builtin_semantic(builtin)?.to_string()))
            }
            Binding::Location {
                location,
                interpolation,
                sampling,
                blend_src,
            } => {
                if stage == ShaderStage::Fragment && output {
                    return Ok((
                        String::new(),
                        format!("SV_Target{}", location + blend_src.unwrap_or(0)),
                    ));
                }
                let mut modifiers = String::new();
                let interpolated = matches!(
                    (stage, output),
                    (ShaderStage::Vertex, true) | (ShaderStage::Fragment, false)
                );
                if interpolated {
                    let integer = self.ty(ty)?.inner.scalar().is_some_and(|s| s.is_integer());
                    match interpolation {
                        _ if integer => modifiers.push_str("nointerpolation "),
                        Some(Interpolation::Flat) => modifiers.push_str("nointerpolation "),
                        Some(Interpolation::Linear) => modifiers.push_str("noperspective "),
                        _ => {}
                    }
                    match sampling {
                        Some(Sampling::Centroid) => modifiers.push_str("centroid "),
                        Some(Sampling::Sample) => modifiers.push_str("sample "),
                        _ => {}
                    }
                }
                Ok((modifiers, format!("TEXCOORD{location}")))
            }
        }
    }

    fn register(g: &GlobalVariable, class: char) -> Result<String, BackendError> {
        let b = g
            .binding
            .ok_or_else(|| ice(format!("resource '{}' has no binding", g.name)))?;
        Ok(format!("register({class}{}, space{})", b.binding, b.group))
    }

    fn write_globals(&mut self, out: &mut TextBuffer) -> Result<(), BackendError> {
        let module = self.module;
        for (_, g) in module.global_variables.iter() {
            match g.space {
                AddressSpace::Storage => {
                    let (ty, class) = if g.access.contains(StorageAccess::STORE) {
                        ("RWByteAddressBuffer", 'u')
                    } else {
                        ("ByteAddressBuffer", 't')
                    };
                    out.line(format!("{ty} {} : {};", g.name, Self::register(g, class)?));
                }
                AddressSpace::Uniform => {
                    let size = tinct_ir::layout::layout_of(self.types(), g.ty).size;
                    let registers = size.div_ceil(16).max(1);
                    out.line(format!(
                        "cbuffer cbuffer_{} : {} {{",
                        g.name,
                        Self::register(g, 'b')?
                    ));
                    out.indented(|b| b.line(format!("uint4 {}[{registers}];", g.name)));
                    out.line("};");
                }
                AddressSpace::Handle => {
                    let inner = &self.ty(g.ty)?.inner;
                    let class = match *inner {
                        TypeInner::Sampler { .. } => 's',
                        TypeInner::Texture {
                            class: TextureClass::Storage { access, .. },
                            ..
                        } if access.contains(StorageAccess::STORE) => 'u',
                        _ => 't',
                    };
                    let ty = self.inner_name(inner)?;
                    out.line(format!("{ty} {} : {};", g.name, Self::register(g, class)?));
                }
                AddressSpace::Private => {
                    let decl = self.declare(g.ty, &g.name)?;
                    let value = match &g.init {
                        Some(init) => {
                            let mut f = FnCtx::module_scope(module);
                            let value = self.initializer(&mut f, init)?;
                            if !self.pending.is_empty() {
                                return Err(ice("module-scope initializer needs temporaries"));
                            }
                            value
                        }
                        None => self.zero(g.ty)?,
                    };
                    out.line(format!("static {decl} = {value};"));
                }
                AddressSpace::Workgroup => {
                    let decl = self.declare(g.ty, &g.name)?;
                    out.line(format!("groupshared {decl};"));
                }
                AddressSpace::PushConstant => {
                    return Err(unsupported(format!(
                        "push constant '{}' on HLSL; use a uniform buffer",
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
        Ok(())
    }

    fn write_entry_point_attributes(
        &mut self,
        out: &mut TextBuffer,
        ep: &Function,
    ) -> Result<(), BackendError> {
        let Some(info) = &ep.entry_point else {
            return Ok(());
        };
        match info.stage {
            ShaderStage::Compute => {
                let mut dims = [1; 3];
                for (dim, size) in dims.iter_mut().zip(info.workgroup_size) {
                    match size {
                        WorkgroupDim::Literal(n) => *dim = n,
                        WorkgroupDim::Override(_) => {
                            return Err(unsupported(
                                "workgroup size set by an override that was not substituted",
                            ));
                        }
                    }
                }
                out.line(format!("[numthreads({}, {}, {})]", dims[0], dims[1], dims[2]));
            }
            ShaderStage::Fragment if info.early_depth_test => out.line("[earlydepthstencil]"),
            _ => {}
        }
        Ok(())
    }

    fn write_function(&mut self, out: &mut TextBuffer, func: &'a Function) -> Result<(), BackendError> {
        let result = match &func.result {
            Some(r) => match self.ty(r.ty)?.inner {
                TypeInner::Array { .. } => {
                    let typedef = self.namer.unique(&format!("{}_ret", func.name));
                    let decl = self.declare(r.ty, &typedef)?;
                    out.line(format!("typedef {decl};"));
                    typedef
                }
                _ => self.type_name(r.ty)?,
            },
            None => "void".to_string(),
        };
        let mut params = Vec::with_capacity(func.arguments.len());
        for arg in &func.arguments {
            params.push(match self.ty(arg.ty)?.inner {
                TypeInner::Pointer { base, .. } => {
                    format!("inout {}", self.declare(base, &arg.name)?)
                }
                _ => self.declare(arg.ty, &arg.name)?,
            });
        }
        let header = format!("{result} {}({}) {{", func.name, params.join(", "));
        let mut f = FnCtx::new(self.module, func);
        let body = self.block(&mut f, &func.body)?;
        out.line(header);
        out.indented(|b| b.push_block(&body));
        out.line("}");
        Ok(())
    }

    // Types ---------------------------------------------------------------

    pub(crate) fn scalar_name(scalar: Scalar) -> &'static str {
        match (scalar.kind, scalar.width) {
            (ScalarKind::Bool, _) => "bool",
            (ScalarKind::Sint, _) => "int",
            (ScalarKind::Uint, _) => "uint",
            (ScalarKind::Float, 2) => "float16_t",
            (ScalarKind::Float, _) => "float",
        }
    }

    pub(crate) fn vector_name(size: u32, scalar: Scalar) -> String {
        if scalar.width == 2 {
            format!("vector<float16_t, {size}>")
        } else {
            format!("{}{size}", Self::scalar_name(scalar))
        }
    }

    pub(crate) fn type_name(&mut self, ty: Handle<Type>) -> Result<String, BackendError> {
        let ty = self.ty(ty)?;
        match ty.inner {
            TypeInner::Struct { .. } => {
                Ok(struct_name(ty.name.as_deref().unwrap_or_default()).to_string())
            }
            ref inner => self.inner_name(inner),
        }
    }

    pub(crate) fn inner_name(&mut self, inner: &TypeInner) -> Result<String, BackendError> {
        Ok(match *inner {
            TypeInner::Scalar(s) | TypeInner::Atomic(s) => Self::scalar_name(s).to_string(),
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
            } => {
                if scalar.width == 2 {
                    format!("matrix<float16_t, {}, {}>", columns.count(), rows.count())
                } else {
                    format!("{}{}x{}", Self::scalar_name(scalar), columns.count(), rows.count())
                }
            }
            TypeInner::Pointer { base, .. } => self.type_name(base)?,
            TypeInner::Array { .. } => {
                let (base, dims) = self.array_parts(inner)?;
                format!("{base}{dims}")
            }
            TypeInner::Struct { .. } => return Err(ice("anonymous struct type")),
            TypeInner::Sampler { comparison: false } => "SamplerState".to_string(),
            TypeInner::Sampler { comparison: true } => "SamplerComparisonState".to_string(),
            TypeInner::Texture { dim, class } => Self::texture_type(dim, class)?,
        })
    }

    /// The innermost element type name and the `[N]` suffixes of a
    /// (possibly nested) array, outermost first.
    fn array_parts(&mut self, inner: &TypeInner) -> Result<(String, String), BackendError> {
        let mut dims = String::new();
        let mut current = inner.clone();
        while let TypeInner::Array { base, size, .. } = current {
            match size {
                ArraySize::Constant(n) => dims.push_str(&format!("[{n}]")),
                ArraySize::Runtime => {
                    return Err(ice("runtime-sized array outside of a buffer"));
                }
            }
            let elem = self.ty(base)?;
            if !matches!(elem.inner, TypeInner::Array { .. }) {
                return Ok((self.type_name(base)?, dims));
            }
            current = elem.inner.clone();
        }
        Ok((self.inner_name(&current)?, dims))
    }

    /// `T name` or `T name[N]`.
    pub(crate) fn declare(&mut self, ty: Handle<Type>, name: &str) -> Result<String, BackendError> {
        let inner = &self.ty(ty)?.inner;
        if let TypeInner::Array { .. } = inner {
            let (base, dims) = self.array_parts(inner)?;
            return Ok(format!("{base} {name}{dims}"));
        }
        Ok(format!("{} {name}", self.type_name(ty)?))
    }

    fn texture_type(dim: TextureDimension, class: TextureClass) -> Result<String, BackendError> {
        let d = texture_dim_name(dim);
        Ok(match class {
            TextureClass::Sampled(kind) => format!("Texture{d}<{}>", texel_vector(kind.scalar())),
            TextureClass::Depth => format!("Texture{d}"),
            TextureClass::Multisampled(_) | TextureClass::DepthMultisampled => {
                let texel = texel_vector(class.texel_scalar());
                match dim {
                    TextureDimension::D2 => format!("Texture2DMS<{texel}>"),
                    TextureDimension::D2Array => format!("Texture2DMSArray<{texel}>"),
                    _ => return Err(ice("multisampled texture that is not 2D")),
                }
            }
            TextureClass::Storage { format, access } => {
                let rw = if access.contains(StorageAccess::STORE) { "RW" } else { "" };
                format!("{rw}Texture{d}<{}>", texel_vector(format.sampled_kind().scalar()))
            }
            TextureClass::External => {
                return Err(unsupported("texture_external without the multiplanar lowering"));
            }
        })
    }

    pub(crate) fn literal(lit: Literal) -> String {
        match lit {
            Literal::Bool(b) => b.to_string(),
            Literal::I32(i32::MIN) => "int(-2147483647 - 1)".to_string(),
            Literal::I32(v) => v.to_string(),
            Literal::U32(v) => format!("{v}u"),
            Literal::F32(v) => match f32_text(v) {
                Some(text) => format!("{text}f"),
                None => format!("asfloat(0x{:08x}u)", v.to_bits()),
            },
            Literal::F16(v) => match f32_text(v) {
                Some(text) => format!("float16_t({text}h)"),
                None => format!("f16tof32(0x{:04x}u)", f16_bits(v)),
            },
        }
    }

    /// `(T)0` zeroes any constructible type.
    pub(crate) fn zero(&mut self, ty: Handle<Type>) -> Result<String, BackendError> {
        Ok(match self.ty(ty)?.inner {
            TypeInner::Scalar(s) | TypeInner::Atomic(s) => Self::literal(Literal::zero(s)),
            _ => format!("({})0", self.type_name(ty)?),
        })
    }

    // Helpers -------------------------------------------------------------

    /// Returns the name of the helper registered under `key`, writing it
    /// with `write` the first time. Helpers of one family share an
    /// overloaded name.
    pub(crate) fn helper(
        &mut self,
        family: &'static str,
        key: String,
        write: impl FnOnce(&mut Self, &str) -> Result<TextBuffer, BackendError>,
    ) -> Result<String, BackendError> {
        if let Some(name) = self.helper_keys.get(&key) {
            return Ok(name.clone());
        }
        let name = match self.helper_families.get(family) {
            Some(name) => name.clone(),
            None => {
                let name = self.namer.unique(family);
                self.helper_families.insert(family, name.clone());
                name
            }
        };
        self.emit_helper(key, name, write)
    }

    /// Like [`Self::helper`], but every key gets a name of its own.
    pub(crate) fn unique_helper(
        &mut self,
        base: &str,
        key: String,
        write: impl FnOnce(&mut Self, &str) -> Result<TextBuffer, BackendError>,
    ) -> Result<String, BackendError> {
        if let Some(name) = self.helper_keys.get(&key) {
            return Ok(name.clone());
        }
        let name = self.namer.unique(base);
        self.emit_helper(key, name, write)
    }

    fn emit_helper(
        &mut self,
        key: String,
        name: String,
        write: impl FnOnce(&mut Self, &str) -> Result<TextBuffer, BackendError>,
    ) -> Result<String, BackendError> {
        let body = write(self, &name)?;
        self.helpers.push_block(&body);
        self.helpers.blank();
        self.helper_keys.insert(key, name.clone());
        Ok(name)
    }

    /// A one-parameter helper `T name(P v) { return <expr>; }`.
    fn simple_helper(
        &mut self,
        family: &'static str,
        result: &str,
        param: &str,
        value: String,
    ) -> Result<String, BackendError> {
        let (result, param) = (result.to_string(), param.to_string());
        self.helper(family, format!("{family} {param}"), |_, name| {
            let mut b = TextBuffer::new();
            b.line(format!("{result} {name}({param} v) {{"));
            b.indented(|b| b.line(format!("return {value};")));
            b.line("}");
            Ok(b)
        })
    }

    fn float_modulo(&mut self, ty: &TypeInner) -> Result<String, BackendError> {
        let t = self.inner_name(ty)?;
        self.helper("tint_float_modulo", format!("mod {t}"), |_, name| {
            let mut b = TextBuffer::new();
            b.line(format!("{t} {name}({t} lhs, {t} rhs) {{"));
            b.indented(|b| b.line("return (lhs - (rhs * trunc((lhs / rhs))));"));
            b.line("}");
            Ok(b)
        })
    }

    fn hyperbolic(&mut self, fun: BuiltinFn, ty: &TypeInner) -> Result<String, BackendError> {
        let t = self.inner_name(ty)?;
        let (family, value) = match fun {
            BuiltinFn::Asinh => ("tint_asinh", "log((v + sqrt(((v * v) + 1.0f))))"),
            BuiltinFn::Acosh => ("tint_acosh", "log((v + sqrt(((v * v) - 1.0f))))"),
            _ => ("tint_atanh", "(log(((1.0f + v) / (1.0f - v))) * 0.5f)"),
        };
        self.simple_helper(family, &t, &t, value.to_string())
    }

    fn pack_helper(&mut self, fun: BuiltinFn) -> Result<String, BackendError> {
        use BuiltinFn as B;
        let (family, param, lines): (&'static str, &str, [&str; 2]) = match fun {
            B::Pack2x16Float => (
                "tint_pack2x16float",
                "float2",
                ["uint2 i = f32tof16(v);", "return (i.x | (i.y << 16u));"],
            ),
            B::Pack2x16Snorm => (
                "tint_pack2x16snorm",
                "float2",
                [
                    "int2 i = (int2(round((clamp(v, -1.0f, 1.0f) * 32767.0f))) & 65535);",
                    "return asuint((i.x | (i.y << 16u)));",
                ],
            ),
            B::Pack2x16Unorm => (
                "tint_pack2x16unorm",
                "float2",
                [
                    "uint2 i = uint2(round((clamp(v, 0.0f, 1.0f) * 65535.0f)));",
                    "return (i.x | (i.y << 16u));",
                ],
            ),
            B::Pack4x8Snorm => (
                "tint_pack4x8snorm",
                "float4",
                [
                    "int4 i = (int4(round((clamp(v, -1.0f, 1.0f) * 127.0f))) & 255);",
                    "return asuint((i.x | ((i.y << 8u) | ((i.z << 16u) | (i.w << 24u)))));",
                ],
            ),
            B::Pack4x8Unorm => (
                "tint_pack4x8unorm",
                "float4",
                [
                    "uint4 i = uint4(round((clamp(v, 0.0f, 1.0f) * 255.0f)));",
                    "return (i.x | ((i.y << 8u) | ((i.z << 16u) | (i.w << 24u))));",
                ],
            ),
            B::Unpack2x16Float => (
                "tint_unpack2x16float",
                "uint",
                ["uint i = v;", "return f16tof32(uint2((i & 65535u), (i >> 16u)));"],
            ),
            B::Unpack2x16Snorm => (
                "tint_unpack2x16snorm",
                "uint",
                [
                    "int2 i = (int2((int(v) << 16u), int(v)) >> 16u);",
                    "return clamp((float2(i) / 32767.0f), -1.0f, 1.0f);",
                ],
            ),
            B::Unpack2x16Unorm => (
                "tint_unpack2x16unorm",
                "uint",
                [
                    "uint2 i = uint2((v & 65535u), (v >> 16u));",
                    "return (float2(i) / 65535.0f);",
                ],
            ),
            B::Unpack4x8Snorm => (
                "tint_unpack4x8snorm",
                "uint",
                [
                    "int4 i = (int4((int(v) << 24u), (int(v) << 16u), (int(v) << 8u), int(v)) >> 24u);",
                    "return clamp((float4(i) / 127.0f), -1.0f, 1.0f);",
                ],
            ),
            _ => (
                "tint_unpack4x8unorm",
                "uint",
                [
                    "uint4 i = uint4((v & 255u), ((v >> 8u) & 255u), ((v >> 16u) & 255u), (v >> 24u));",
                    "return (float4(i) / 255.0f);",
                ],
            ),
        };
        let result = if family.starts_with("tint_pack") {
            "uint"
        } else if family.contains("2x16") {
            "float2"
        } else {
            "float4"
        };
        self.helper(family, family.to_string(), |_, name| {
            let mut b = TextBuffer::new();
            b.line(format!("{result} {name}({param} v) {{"));
            b.indented(|b| lines.into_iter().for_each(|l| b.line(l)));
            b.line("}");
            Ok(b)
        })
    }

    /// `tint_modf` / `tint_frexp`: HLSL returns the second half through an
    /// `out` parameter.
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
        let exp_ty = self.inner_name(&self.ty(second.ty)?.inner.clone())?;
        let (fract, other) = (first.name.clone(), second.name.clone());
        match fun {
            BuiltinFn::Modf => self.helper("tint_modf", format!("modf {t}"), |_, name| {
                let mut b = TextBuffer::new();
                b.line(format!("{s} {name}({t} v) {{"));
                b.indented(|b| {
                    b.line(format!("{s} result = ({s})0;"));
                    b.line(format!("result.{fract} = modf(v, result.{other});"));
                    b.line("return result;");
                });
                b.line("}");
                Ok(b)
            }),
            _ => self.helper("tint_frexp", format!("frexp {t}"), |_, name| {
                let mut b = TextBuffer::new();
                b.line(format!("{s} {name}({t} v) {{"));
                b.indented(|b| {
                    b.line(format!("{t} exp = ({t})0;"));
                    b.line(format!("{t} fract = (sign(v) * frexp(v, exp));"));
                    b.line(format!("{s} result = {{fract, {exp_ty}(exp)}};"));
                    b.line("return result;");
                });
                b.line("}");
                Ok(b)
            }),
        }
    }

    /// `uint4 tint_texture_info(T t[, uint level])`, overloaded per
    /// texture type.
    fn texture_info_helper(
        &mut self,
        dim: TextureDimension,
        class: TextureClass,
    ) -> Result<(String, TextureInfo), BackendError> {
        let info = texture_info(dim, class);
        let t = Self::texture_type(dim, class)?;
        let name = self.helper("tint_texture_info", format!("info {t}"), |_, name| {
            let mut outs: Vec<String> = (0..info.count)
                .map(|i| format!("info.{}", &"xyzw"[i as usize..=i as usize]))
                .collect();
            let params = if info.mip {
                outs.insert(0, "level".into());
                format!("{t} t, uint level")
            } else {
                format!("{t} t")
            };
            let mut b = TextBuffer::new();
            b.line(format!("uint4 {name}({params}) {{"));
            b.indented(|b| {
                b.line("uint4 info = (uint4)0;");
                b.line(format!("t.GetDimensions({});", outs.join(", ")));
                b.line("return info;");
            });
            b.line("}");
            Ok(b)
        })?;
        Ok((name, info))
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
                let decl = self.declare(var.ty, &var.name)?;
                let value = match init {
                    Some(e) => self.initializer(f, e)?,
                    None => self.zero(var.ty)?,
                };
                self.flush(out);
                out.line(format!("{decl} = {value};"));
            }
            Statement::Store {
                ref pointer,
                ref value,
            } => {
                let v = self.expr(f, value)?;
                let line = match self.buffer_ref(f, pointer)? {
                    Some(r) => self.buffer_store(&r, &v)?,
                    None => format!("{} = {v}", self.expr(f, pointer)?),
                };
                self.flush(out);
                out.line(format!("{line};"));
            }
            Statement::Call(ref e) => {
                let text = self.expr(f, e)?;
                self.flush(out);
                if !self.is_workgroup_atomic(f, e)? {
                    out.line(format!("{text};"));
                }
            }
            Statement::If {
                ref condition,
                ref accept,
                ref reject,
            } => {
                let c = self.expr(f, condition)?;
                self.flush(out);
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
                out.line("[loop] while (true) {");
                out.indented(|b| b.push_block(&body));
                out.line("}");
            }
            Statement::Switch {
                ref selector,
                ref cases,
            } => {
                let sel = self.expr(f, selector)?;
                self.flush(out);
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
                    self.flush(out);
                    out.line(format!("return {v};"));
                }
                None => out.line("return;"),
            },
            Statement::Discard => out.line("discard;"),
            Statement::Barrier(barrier) => {
                if barrier.contains(Barrier::STORAGE) || barrier.contains(Barrier::TEXTURE) {
                    out.line("DeviceMemoryBarrierWithGroupSync();");
                }
                if barrier.contains(Barrier::WORKGROUP) {
                    out.line("GroupMemoryBarrierWithGroupSync();");
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
            self.flush(&mut inner);
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

    /// The right-hand side of a declaration: arrays and structs are
    /// spelled as initializer lists.
    fn initializer(&mut self, f: &mut FnCtx<'a>, e: &Expression) -> Result<String, BackendError> {
        if let Expression::Compose { ty, ref components } = *e {
            if matches!(
                self.ty(ty)?.inner,
                TypeInner::Array { .. } | TypeInner::Struct { .. }
            ) {
                let mut parts = Vec::with_capacity(components.len());
                for c in components {
                    parts.push(self.initializer(f, c)?);
                }
                return Ok(format!("{{{}}}", parts.join(", ")));
            }
        }
        self.expr(f, e)
    }

    fn is_workgroup_atomic(&self, f: &FnCtx<'a>, e: &Expression) -> Result<bool, BackendError> {
        let Expression::Builtin { fun, ref arguments } = *e else {
            return Ok(false);
        };
        if !fun.is_atomic() {
            return Ok(false);
        }
        let Some(pointer) = arguments.first() else {
            return Ok(false);
        };
        Ok(f.ty(pointer)?.pointer_space() == Some(AddressSpace::Workgroup))
    }

    pub(crate) fn expr(&mut self, f: &mut FnCtx<'a>, e: &Expression) -> Result<String, BackendError> {
        Ok(match *e {
            Expression::Literal(lit) => Self::literal(lit),
            Expression::ZeroValue(ty) => self.zero(ty)?,
            Expression::Compose { ty, ref components } => match self.ty(ty)?.inner {
                TypeInner::Array { .. } | TypeInner::Struct { .. } => {
                    // Initializer lists are only allowed in declarations.
                    let value = self.initializer(f, e)?;
                    let name = self.namer.unique("tint_symbol");
                    let decl = self.declare(ty, &name)?;
                    self.pending.push(format!("{decl} = {value};"));
                    name
                }
                _ => {
                    let parts = self.exprs(f, components)?;
                    format!("{}({})", self.type_name(ty)?, parts.join(", "))
                }
            },
            Expression::Splat { ref value, size } => {
                let v = self.expr(f, value)?;
                format!("({v}).{}", "xxxx".get(..size.count() as usize).unwrap_or("xxxx"))
            }
            Expression::Swizzle {
                ref vector,
                ref pattern,
            } => {
                let v = self.expr(f, vector)?;
                let letters: String = pattern.iter().map(|c| c.letter()).collect();
                format!("{v}.{letters}")
            }
            Expression::FunctionArgument(i) => f
                .function()?
                .arguments
                .get(i as usize)
                .map(|a| a.name.clone())
                .ok_or_else(|| ice(format!("argument {i} out of range")))?,
            Expression::GlobalVariable(h) => {
                let g = self.global(h)?;
                if matches!(g.space, AddressSpace::Storage | AddressSpace::Uniform) {
                    return Err(ice(format!("buffer '{}' used as a value", g.name)));
                }
                g.name.clone()
            }
            Expression::LocalVariable(h) => f.local(h)?.name.clone(),
            Expression::Override(_) => {
                return Err(unsupported("override expression that was not substituted"));
            }
            Expression::Load { ref pointer } => match self.buffer_ref(f, pointer)? {
                Some(r) => self.buffer_load(&r)?,
                None => self.expr(f, pointer)?,
            },
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
                match f.value_ty(base)? {
                    TypeInner::Struct { ref members, .. } => {
                        let m = members
                            .get(index as usize)
                            .ok_or_else(|| ice(format!("member {index} out of range")))?;
                        format!("{b}.{}", m.name)
                    }
                    TypeInner::Vector { .. } => format!("{b}.{}", swizzle(index, 1)?),
                    _ => format!("{b}[{index}]"),
                }
            }
            Expression::Unary { op, ref expr } => {
                let v = self.expr(f, expr)?;
                match op {
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
            Expression::Bitcast { ref expr, ty } => self.bitcast(f, expr, ty)?,
            Expression::Call {
                function,
                ref arguments,
            } => {
                let callee = self
                    .module
                    .functions
                    .try_get(function)
                    .ok_or_else(|| ice(format!("function {function:?} out of range")))?;
                let args = self.exprs(f, arguments)?;
                format!("{}({})", callee.name, args.join(", "))
            }
            Expression::Builtin { fun, ref arguments } => self.builtin(f, e, fun, arguments)?,
            Expression::Texture(ref call) => self.texture(f, call)?,
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

        let is_matrix = |t: &TypeInner| matches!(t, TypeInner::Matrix { .. });
        let is_vector = |t: &TypeInner| matches!(t, TypeInner::Vector { .. });
        if op == BinaryOp::Multiply
            && ((is_matrix(&lt) && (is_matrix(&rt) || is_vector(&rt)))
                || (is_vector(&lt) && is_matrix(&rt)))
        {
            // Matrices are stored transposed, so the operands swap.
            return Ok(format!("mul({r}, {l})"));
        }
        let scalar = lt.scalar();
        let is_bool = scalar.is_some_and(|s| s.kind == ScalarKind::Bool);
        if is_bool && matches!(op, BinaryOp::BitwiseAnd | BinaryOp::BitwiseOr) {
            let sym = binary_symbol(op);
            return Ok(match lt.vector_size() {
                Some(size) => {
                    let n = size.count();
                    format!("bool{n}((uint{n}({l}) {sym} uint{n}({r})))")
                }
                None => format!("bool((uint({l}) {sym} uint({r})))"),
            });
        }
        if op == BinaryOp::Modulo && scalar.is_some_and(|s| s.is_float()) {
            // One side may be a scalar; the helper takes matching types.
            let result = if lt.vector_size().is_some() { lt.clone() } else { rt.clone() };
            let splat = |v: &str, size: tinct_ir::VectorSize| {
                format!("({v}).{}", "xxxx".get(..size.count() as usize).unwrap_or("xxxx"))
            };
            let (l, r) = match (lt.vector_size(), rt.vector_size()) {
                (Some(size), None) => (l, splat(&r, size)),
                (None, Some(size)) => (splat(&l, size), r),
                _ => (l, r),
            };
            let name = self.float_modulo(&result)?;
            return Ok(format!("{name}({l}, {r})"));
        }
        Ok(format!("({l} {} {r})", binary_symbol(op)))
    }

    fn bitcast(
        &mut self,
        f: &mut FnCtx<'a>,
        expr: &Expression,
        ty: Handle<Type>,
    ) -> Result<String, BackendError> {
        let from = f.ty(expr)?;
        let to = self.ty(ty)?.inner.clone();
        let v = self.expr(f, expr)?;
        let (Some(fs), Some(ts)) = (from.scalar(), to.scalar()) else {
            return Err(ice("bitcast of a non-numeric value"));
        };
        if fs.width != 4 || ts.width != 4 {
            return Err(unsupported("bitcast involving f16 on HLSL"));
        }
        Ok(match (fs.kind, ts.kind) {
            (a, b) if a == b => v,
            (_, ScalarKind::Float) => format!("asfloat({v})"),
            (_, ScalarKind::Sint) => format!("asint({v})"),
            (_, ScalarKind::Uint) => format!("asuint({v})"),
            _ => return Err(ice("bitcast of a bool")),
        })
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
        if fun.is_atomic() || fun == B::ArrayLength {
            return self.buffer_builtin(f, whole, fun, arguments);
        }
        let arg_ty = f.ty(first)?;
        let a = self.exprs(f, arguments)?;
        let arg = |i: usize| a.get(i).cloned().unwrap_or_default();
        let call = |name: &str| format!("{name}({})", a.join(", "));

        Ok(match fun {
            B::Acos | B::Asin | B::Atan | B::Atan2 | B::Ceil | B::Clamp | B::Cos | B::Cosh
            | B::Cross | B::Degrees | B::Determinant | B::Distance | B::Dot | B::Exp | B::Exp2
            | B::Floor | B::Ldexp | B::Length | B::Log | B::Log2 | B::Max | B::Min
            | B::Normalize | B::Pow | B::Radians | B::Reflect | B::Refract | B::Round | B::Sin
            | B::Sinh | B::Sqrt | B::Step | B::Tan | B::Tanh | B::Transpose | B::Trunc
            | B::Saturate | B::All | B::Any => call(fun.wgsl_name()),
            B::Abs if arg_ty.scalar_kind() == Some(ScalarKind::Uint) => arg(0),
            B::Abs => call("abs"),
            B::Asinh | B::Acosh | B::Atanh => {
                let name = self.hyperbolic(fun, &arg_ty)?;
                call(&name)
            }
            B::FaceForward => call("faceforward"),
            B::SmoothStep => call("smoothstep"),
            B::Fma => call("mad"),
            B::Fract => call("frac"),
            B::InverseSqrt => call("rsqrt"),
            B::Mix => call("lerp"),
            B::Sign => format!("{}({})", self.inner_name(&arg_ty)?, call("sign")),
            B::CountOneBits | B::ReverseBits => {
                let hlsl = if fun == B::CountOneBits { "countbits" } else { "reversebits" };
                match arg_ty.scalar_kind() {
                    Some(ScalarKind::Sint) => format!("asint({hlsl}(asuint({})))", arg(0)),
                    _ => call(hlsl),
                }
            }
            B::Select => format!("({} ? {} : {})", arg(2), arg(1), arg(0)),
            B::Dpdx => call("ddx"),
            B::DpdxCoarse => call("ddx_coarse"),
            B::DpdxFine => call("ddx_fine"),
            B::Dpdy => call("ddy"),
            B::DpdyCoarse => call("ddy_coarse"),
            B::DpdyFine => call("ddy_fine"),
            B::Fwidth | B::FwidthCoarse | B::FwidthFine => call("fwidth"),
            B::QuantizeToF16 => format!("f16tof32(f32tof16({}))", arg(0)),
            B::Pack2x16Float | B::Pack2x16Snorm | B::Pack2x16Unorm | B::Pack4x8Snorm
            | B::Pack4x8Unorm | B::Unpack2x16Float | B::Unpack2x16Snorm | B::Unpack2x16Unorm
            | B::Unpack4x8Snorm | B::Unpack4x8Unorm => {
                let name = self.pack_helper(fun)?;
                call(&name)
            }
            B::Modf | B::Frexp => {
                let result = f
                    .types
                    .resolve(whole)?
                    .handle()
                    .ok_or_else(|| ice("modf/frexp result type is not named"))?;
                let name = self.split_float(fun, &arg_ty, result)?;
                call(&name)
            }
            B::CountLeadingZeros | B::CountTrailingZeros | B::FirstLeadingBit
            | B::FirstTrailingBit | B::ExtractBits | B::InsertBits | B::Dot4I8Packed
            | B::Dot4U8Packed | B::Pack4xI8 | B::Pack4xU8 | B::Unpack4xI8 | B::Unpack4xU8 => {
                return Err(ice(format!("{} must be polyfilled for HLSL", fun.wgsl_name())));
            }
            _ => return Err(ice(format!("{} reached the plain builtin printer", fun.wgsl_name()))),
        })
    }

    /// `InterlockedX` on a `groupshared` variable. The result lands in a
    /// temporary declared ahead of the statement.
    pub(crate) fn workgroup_atomic(
        &mut self,
        f: &mut FnCtx<'a>,
        whole: &Expression,
        fun: BuiltinFn,
        arguments: &[Expression],
    ) -> Result<String, BackendError> {
        use BuiltinFn as B;
        let [pointer, rest @ ..] = arguments else {
            return Err(ice("atomic builtin without a pointer"));
        };
        let scalar = f
            .value_ty(pointer)?
            .scalar()
            .ok_or_else(|| ice("atomic builtin on a non-atomic"))?;
        let t = Self::scalar_name(scalar);
        let p = self.expr(f, pointer)?;
        let values = self.exprs(f, rest)?;
        let value = values.first().cloned().unwrap_or_default();
        let result = self.namer.unique("atomic_result");
        if fun == B::AtomicCompareExchangeWeak {
            let s_ty = f
                .types
                .resolve(whole)?
                .handle()
                .ok_or_else(|| ice("atomicCompareExchangeWeak result type is not named"))?;
            let TypeInner::Struct { ref members, .. } = self.ty(s_ty)?.inner else {
                return Err(ice("atomicCompareExchangeWeak result is not a struct"));
            };
            let [old, exchanged] = members.as_slice() else {
                return Err(ice("atomicCompareExchangeWeak result needs two members"));
            };
            let s = self.type_name(s_ty)?;
            let compare = self.namer.unique("atomic_compare_value");
            let new = values.get(1).cloned().unwrap_or_default();
            self.pending.push(format!("{t} {compare} = {value};"));
            self.pending.push(format!("{s} {result} = ({s})0;"));
            self.pending.push(format!(
                "InterlockedCompareExchange({p}, {compare}, {new}, {result}.{});",
                old.name
            ));
            self.pending.push(format!(
                "{result}.{} = ({result}.{} == {compare});",
                exchanged.name, old.name
            ));
            return Ok(result);
        }
        let zero = Self::literal(Literal::zero(scalar));
        let call = match fun {
            B::AtomicLoad => format!("InterlockedOr({p}, {zero}, {result});"),
            B::AtomicStore | B::AtomicExchange => {
                format!("InterlockedExchange({p}, {value}, {result});")
            }
            B::AtomicSub => format!("InterlockedAdd({p}, -({value}), {result});"),
            B::AtomicAdd => format!("InterlockedAdd({p}, {value}, {result});"),
            B::AtomicMax => format!("InterlockedMax({p}, {value}, {result});"),
            B::AtomicMin => format!("InterlockedMin({p}, {value}, {result});"),
            B::AtomicAnd => format!("InterlockedAnd({p}, {value}, {result});"),
            B::AtomicOr => format!("InterlockedOr({p}, {value}, {result});"),
            B::AtomicXor => format!("InterlockedXor({p}, {value}, {result});"),
            _ => return Err(ice(format!("{} is not an atomic", fun.wgsl_name()))),
        };
        self.pending.push(format!("{t} {result} = {zero};"));
        self.pending.push(call);
        Ok(result)
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

        let n = dim.coordinate_count();
        let depth = class.is_depth();
        // Float coordinates with the layer folded in.
        let sample_coords = || -> Result<String, BackendError> {
            let c = need(&coords, "coordinates")?;
            Ok(match &layer {
                Some(layer) => format!("float{}({c}, float({layer}))", n + 1),
                None => c,
            })
        };
        // Integer coordinates followed by `extra` integer operands.
        let texel = |extra: &[&Option<String>]| -> Result<String, BackendError> {
            let c = need(&coords, "coordinates")?;
            let mut parts = vec![c];
            for e in extra.iter().copied().flatten() {
                parts.push(format!("int({e})"));
            }
            let total = n as usize + parts.len() - 1;
            Ok(if total == 1 {
                format!("int({})", parts[0])
            } else {
                format!("int{total}({})", parts.join(", "))
            })
        };
        let sampler = || need(&s, "a sampler");
        let with_offset = |mut args: Vec<String>| {
            if let Some(off) = &offset {
                args.push(off.clone());
            }
            args.join(", ")
        };
        let depth_texel = |v: String| if depth { format!("{v}.x") } else { v };

        Ok(match call.fun {
            TextureFn::Sample => depth_texel(format!(
                "{t}.Sample({})",
                with_offset(vec![sampler()?, sample_coords()?])
            )),
            TextureFn::SampleBias => depth_texel(format!(
                "{t}.SampleBias({})",
                with_offset(vec![sampler()?, sample_coords()?, need(&bias, "a bias")?])
            )),
            TextureFn::SampleLevel => depth_texel(format!(
                "{t}.SampleLevel({})",
                with_offset(vec![
                    sampler()?,
                    sample_coords()?,
                    format!("float({})", need(&level, "a level")?)
                ])
            )),
            TextureFn::SampleGrad => depth_texel(format!(
                "{t}.SampleGrad({})",
                with_offset(vec![
                    sampler()?,
                    sample_coords()?,
                    need(&ddx, "ddx")?,
                    need(&ddy, "ddy")?
                ])
            )),
            TextureFn::SampleCompare => format!(
                "{t}.SampleCmp({})",
                with_offset(vec![sampler()?, sample_coords()?, need(&dref, "a depth reference")?])
            ),
            TextureFn::SampleCompareLevel => format!(
                "{t}.SampleCmpLevelZero({})",
                with_offset(vec![sampler()?, sample_coords()?, need(&dref, "a depth reference")?])
            ),
            TextureFn::SampleBaseClampToEdge => {
                let (info, _) = self.texture_info_helper(dim, class)?;
                let c = need(&coords, "coordinates")?;
                let half = format!("(float2(0.5f, 0.5f) / float2({info}({t}, 0u).xy))");
                format!(
                    "{t}.SampleLevel({}, clamp({c}, {half}, (float2(1.0f, 1.0f) - {half})), 0.0f)",
                    sampler()?
                )
            }
            TextureFn::Gather => {
                let method = if depth {
                    "Gather"
                } else {
                    let component = call
                        .component
                        .as_ref()
                        .ok_or_else(|| ice("textureGather without a component"))?;
                    match *component {
                        Expression::Literal(Literal::I32(0) | Literal::U32(0)) => "GatherRed",
                        Expression::Literal(Literal::I32(1) | Literal::U32(1)) => "GatherGreen",
                        Expression::Literal(Literal::I32(2) | Literal::U32(2)) => "GatherBlue",
                        Expression::Literal(Literal::I32(3) | Literal::U32(3)) => "GatherAlpha",
                        _ => {
                            return Err(unsupported(
                                "textureGather with a non-constant component",
                            ));
                        }
                    }
                };
                format!("{t}.{method}({})", with_offset(vec![sampler()?, sample_coords()?]))
            }
            TextureFn::GatherCompare => format!(
                "{t}.GatherCmp({})",
                with_offset(vec![sampler()?, sample_coords()?, need(&dref, "a depth reference")?])
            ),
            TextureFn::Load => match class {
                TextureClass::Storage { .. } => format!("{t}.Load({})", texel(&[&layer])?),
                c if c.is_multisampled() => depth_texel(format!(
                    "{t}.Load({}, int({}))",
                    texel(&[&layer])?,
                    need(&sample, "a sample index")?
                )),
                _ => {
                    let level = Some(level.clone().unwrap_or_else(|| "0".into()));
                    depth_texel(format!("{t}.Load({})", texel(&[&layer, &level])?))
                }
            },
            TextureFn::Store => {
                let v = need(&value, "a value")?;
                format!("{t}[{}] = {v}", texel(&[&layer])?)
            }
            TextureFn::Dimensions | TextureFn::NumLayers | TextureFn::NumLevels
            | TextureFn::NumSamples => {
                let (helper, info) = self.texture_info_helper(dim, class)?;
                let args = if info.mip {
                    let level = level.map_or("0u".to_string(), |l| format!("uint({l})"));
                    format!("{t}, {level}")
                } else {
                    t.clone()
                };
                let query = format!("{helper}({args})");
                let component = |slot: Option<u32>| -> Result<String, BackendError> {
                    let slot = slot.ok_or_else(|| {
                        ice(format!("{name} on a texture without that property"))
                    })?;
                    Ok(format!("{query}.{}", swizzle(slot, 1)?))
                };
                match call.fun {
                    TextureFn::Dimensions => {
                        format!("{query}.{}", swizzle(0, dim.size_components())?)
                    }
                    TextureFn::NumLayers => component(info.layers)?,
                    TextureFn::NumLevels => component(info.levels)?,
                    _ => component(info.samples)?,
                }
            }
        })
    }
}

/// Bits of the nearest `f16` to `v`, for non-finite literals.
fn f16_bits(v: f32) -> u16 {
    if v.is_nan() {
        0x7e00
    } else if v.is_sign_negative() {
        0xfc00
    } else {
        0x7c00
    }
}
