//! Prints a sanitized module as GLSL source.
//!
//! The input must have been through [`crate::sanitize`]: one entry point
//! with no parameters or result, combined samplers, `gl_*` IO variables,
//! block-compatible buffer types and no pointer `let`s. Anything else is
//! reported as an internal error rather than printed wrong.

use std::collections::{BTreeSet, HashMap, HashSet};

use tinct_backend_core::{BackendError, Namer, TextBuffer, f32_text};
use tinct_ir::{
    AddressSpace, ArraySize, Barrier, BinaryOp, Binding, Block, BuiltinFn, CaseSelector,
    Expression, Function, GlobalVariable, Handle, Interpolation, Literal, LocalVariable, Module,
    ResolveContext, Sampling, Scalar, ScalarKind, ShaderStage, Statement, StorageAccess,
    TexelFormat, TextureCall, TextureClass, TextureDimension, TextureFn, Type, TypeInner, UnaryOp,
    UniqueArena, WorkgroupDim, is_terminated,
};

use crate::Options;

const F16_EXTENSION: &str = "GL_AMD_gpu_shader_half_float";
const CUBE_ARRAY_EXTENSION: &str = "GL_EXT_texture_cube_map_array";
const SAMPLE_VARIABLES_EXTENSION: &str = "GL_OES_sample_variables";
const SAMPLE_INTERPOLATION_EXTENSION: &str = "GL_OES_shader_multisample_interpolation";
const BLEND_FUNC_EXTENSION: &str = "GL_EXT_blend_func_extended";
const MS_ARRAY_EXTENSION: &str = "GL_OES_texture_storage_multisample_2d_array";

/// Prints `module` as one GLSL shader.
pub fn print(module: &Module, options: &Options) -> Result<String, BackendError> {
    let mut writer = Writer::new(module, options);
    let (decls, functions) = writer.write_module()?;
    Ok(writer.finish(&decls, &functions))
}

fn unsupported(what: impl Into<String>) -> BackendError {
    BackendError::Unsupported(what.into())
}

fn ice(what: impl Into<String>) -> BackendError {
    BackendError::Ice(what.into())
}

/// Predeclared result structs start with `__`, which GLSL reserves.
fn struct_name(name: &str) -> &str {
    name.trim_start_matches("__")
}

fn vector_prefix(scalar: Scalar) -> &'static str {
    match (scalar.kind, scalar.width) {
        (ScalarKind::Bool, _) => "b",
        (ScalarKind::Sint, _) => "i",
        (ScalarKind::Uint, _) => "u",
        (ScalarKind::Float, 2) => "f16",
        (ScalarKind::Float, _) => "",
    }
}

fn dim_suffix(dim: TextureDimension) -> &'static str {
    match dim {
        TextureDimension::D1 => "1D",
        TextureDimension::D2 => "2D",
        TextureDimension::D2Array => "2DArray",
        TextureDimension::D3 => "3D",
        TextureDimension::Cube => "Cube",
        TextureDimension::CubeArray => "CubeArray",
    }
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

/// The component-wise function GLSL uses for a vector comparison.
fn vector_comparison(op: BinaryOp) -> Option<&'static str> {
    Some(match op {
        BinaryOp::Equal => "equal",
        BinaryOp::NotEqual => "notEqual",
        BinaryOp::Less => "lessThan",
        BinaryOp::LessEqual => "lessThanEqual",
        BinaryOp::Greater => "greaterThan",
        BinaryOp::GreaterEqual => "greaterThanEqual",
        _ => return None,
    })
}

fn image_format(format: TexelFormat, es: bool) -> Result<&'static str, BackendError> {
    use TexelFormat as F;
    Ok(match format {
        F::R32Uint => "r32ui",
        F::R32Sint => "r32i",
        F::R32Float => "r32f",
        F::Rgba8Unorm | F::Bgra8Unorm => "rgba8",
        F::Rgba8Snorm => "rgba8_snorm",
        F::Rgba8Uint => "rgba8ui",
        F::Rgba8Sint => "rgba8i",
        F::Rgba16Uint => "rgba16ui",
        F::Rgba16Sint => "rgba16i",
        F::Rgba16Float => "rgba16f",
        F::Rgba32Uint => "rgba32ui",
        F::Rgba32Sint => "rgba32i",
        F::Rgba32Float => "rgba32f",
        F::R8Unorm if !es => "r8",
        F::Rg32Uint if !es => "rg32ui",
        F::Rg32Sint if !es => "rg32i",
        F::Rg32Float if !es => "rg32f",
        other => {
            return Err(unsupported(format!(
                "storage texel format '{}' on GLSL ES",
                other.wgsl_name()
            )));
        }
    })
}

fn swizzle_letters(count: u32) -> &'static str {
    &"xyzw"[..count.min(4) as usize]
}

/// `out` gets `header`, `inner` one level deeper, then `}`.
fn braced(out: &mut TextBuffer, header: impl Into<String>, inner: &TextBuffer) {
    out.line(header);
    out.indented(|b| b.push_block(inner));
    out.line("}");
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
    options: &'a Options,
    stage: Option<ShaderStage>,
    namer: Namer,
    extensions: BTreeSet<&'static str>,
    helpers: TextBuffer,
    /// Helper key to function name. Helpers of one family share an
    /// overloaded name.
    helper_keys: HashMap<String, String>,
    helper_families: HashMap<&'static str, String>,
    /// Struct types printed as the body of an interface block.
    block_structs: HashSet<Handle<Type>>,
}

impl<'a> Writer<'a> {
    fn new(module: &'a Module, options: &'a Options) -> Self {
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
        namer.reserve("main");
        let stage = module.entry_points().next().and_then(|(_, f)| f.stage());
        Self {
            module,
            options,
            stage,
            namer,
            extensions: BTreeSet::new(),
            helpers: TextBuffer::new(),
            helper_keys: HashMap::new(),
            helper_families: HashMap::new(),
            block_structs: HashSet::new(),
        }
    }

    fn es(&self) -> bool {
        self.options.version.es
    }

    fn types(&self) -> &'a UniqueArena<Type> {
        &self.module.types
    }

    fn ty(&self, h: Handle<Type>) -> Result<&'a Type, BackendError> {
        self.types()
            .try_get(h)
            .ok_or_else(|| ice(format!("type {h:?} out of range")))
    }

    /// ES below 3.2 needs `ext` for a feature that became core there.
    fn require_es_extension(&mut self, ext: &'static str) {
        if self.es() && !self.options.version.is_at_least(3, 2) {
            self.extensions.insert(ext);
        }
    }

    // Module layout -------------------------------------------------------

    fn write_module(&mut self) -> Result<(TextBuffer, TextBuffer), BackendError> {
        let module = self.module;
        self.block_structs = self.interface_block_structs();
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
        for (_, ep) in module.entry_points() {
            self.write_entry_point_layout(&mut functions, ep)?;
            self.write_function(&mut functions, ep)?;
        }
        Ok((decls, functions))
    }

    fn finish(&self, decls: &TextBuffer, functions: &TextBuffer) -> String {
        let mut out = TextBuffer::new();
        out.line(self.options.version.to_string());
        for ext in &self.extensions {
            out.line(format!("#extension {ext}: require"));
        }
        if self.es() {
            out.line("precision highp float;");
            out.line("precision highp int;");
        }
        out.blank();
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

    fn is_block(&self, g: &GlobalVariable) -> bool {
        match g.space {
            AddressSpace::Uniform | AddressSpace::Storage => true,
            AddressSpace::PushConstant => !self.options.use_uniform_push_constants,
            _ => false,
        }
    }

    fn interface_block_structs(&self) -> HashSet<Handle<Type>> {
        self.module
            .global_variables
            .iter()
            .filter(|(_, g)| self.is_block(g))
            .map(|(_, g)| g.ty)
            .collect()
    }

    fn write_members(
        &mut self,
        out: &mut TextBuffer,
        ty: Handle<Type>,
    ) -> Result<(), BackendError> {
        let TypeInner::Struct { ref members, .. } = self.ty(ty)?.inner else {
            return Err(ice("interface block of a non-struct type"));
        };
        let mut lines = Vec::with_capacity(members.len());
        for m in members {
            lines.push(format!("{};", self.declare(m.ty, &m.name)?));
        }
        out.indented(|b| lines.into_iter().for_each(|l| b.line(l)));
        Ok(())
    }

    fn write_structs(&mut self, out: &mut TextBuffer) -> Result<(), BackendError> {
        let types = self.types();
        for (h, ty) in types.iter() {
            if !matches!(ty.inner, TypeInner::Struct { .. }) || self.block_structs.contains(&h) {
                continue;
            }
            let name = struct_name(ty.name.as_deref().unwrap_or_default()).to_string();
            out.line(format!("struct {name} {{"));
            self.write_members(out, h)?;
            out.line("};");
            out.blank();
        }
        Ok(())
    }

    fn write_globals(&mut self, out: &mut TextBuffer) -> Result<(), BackendError> {
        let module = self.module;
        for (_, g) in module.global_variables.iter() {
            match g.space {
                AddressSpace::Uniform | AddressSpace::Storage | AddressSpace::PushConstant => {
                    self.write_buffer(out, g)?
                }
                AddressSpace::Handle => self.write_handle(out, g)?,
                AddressSpace::Private => {
                    let decl = self.declare(g.ty, &g.name)?;
                    let value = match &g.init {
                        Some(init) => {
                            let mut f = FnCtx::module_scope(module);
                            self.expr(&mut f, init)?
                        }
                        None => self.zero(g.ty)?,
                    };
                    out.line(format!("{decl} = {value};"));
                }
                AddressSpace::Workgroup => {
                    let decl = self.declare(g.ty, &g.name)?;
                    out.line(format!("shared {decl};"));
                }
                AddressSpace::In | AddressSpace::Out => self.write_io(out, g)?,
                AddressSpace::Function => {
                    return Err(ice(format!("module-scope function variable '{}'", g.name)));
                }
            }
        }
        Ok(())
    }

    fn binding_number(g: &GlobalVariable) -> Result<u32, BackendError> {
        g.binding
            .map(|b| b.binding)
            .ok_or_else(|| ice(format!("resource '{}' has no binding", g.name)))
    }

    fn write_buffer(&mut self, out: &mut TextBuffer, g: &GlobalVariable) -> Result<(), BackendError> {
        if !self.is_block(g) {
            // Plain uniform struct for push constants.
            let decl = self.declare(g.ty, &g.name)?;
            out.line(format!("uniform {decl};"));
            return Ok(());
        }
        let base = struct_name(self.ty(g.ty)?.name.as_deref().unwrap_or(&g.name)).to_string();
        let header = match g.space {
            AddressSpace::Uniform => {
                let block = self.namer.unique(&format!("{base}_ubo"));
                format!(
                    "layout(binding = {}, std140) uniform {block} {{",
                    Self::binding_number(g)?
                )
            }
            AddressSpace::Storage => {
                let block = self.namer.unique(&format!("{base}_ssbo"));
                let access = if g.access == StorageAccess::LOAD {
                    "readonly "
                } else if g.access == StorageAccess::STORE {
                    "writeonly "
                } else {
                    ""
                };
                format!(
                    "layout(binding = {}, std430) {access}buffer {block} {{",
                    Self::binding_number(g)?
                )
            }
            _ => {
                let block = self.namer.unique(&format!("{base}_pc"));
                format!("layout(push_constant) uniform {block} {{")
            }
        };
        out.line(header);
        self.write_members(out, g.ty)?;
        out.line(format!("}} {};", g.name));
        Ok(())
    }

    fn write_handle(&mut self, out: &mut TextBuffer, g: &GlobalVariable) -> Result<(), BackendError> {
        let binding = Self::binding_number(g)?;
        let inner = &self.ty(g.ty)?.inner;
        let ty = self.inner_name(inner)?;
        match *inner {
            TypeInner::Texture {
                class: TextureClass::Storage { format, access },
                ..
            } => {
                let format = image_format(format, self.es())?;
                let access = if access == StorageAccess::LOAD {
                    "readonly "
                } else if access == StorageAccess::STORE {
                    "writeonly "
                } else {
                    ""
                };
                let precision = if self.es() { "highp " } else { "" };
                out.line(format!(
                    "layout(binding = {binding}, {format}) uniform {precision}{access}{ty} {};",
                    g.name
                ));
            }
            TypeInner::Texture { .. } => {
                let precision = if self.es() { "highp " } else { "" };
                out.line(format!(
                    "layout(binding = {binding}) uniform {precision}{ty} {};",
                    g.name
                ));
            }
            _ => return Err(ice(format!("handle '{}' is not a texture", g.name))),
        }
        Ok(())
    }

    fn write_io(&mut self, out: &mut TextBuffer, g: &GlobalVariable) -> Result<(), BackendError> {
        if g.name.starts_with("gl_") {
            if matches!(
                g.name.as_str(),
                "gl_SampleID" | "gl_SampleMask" | "gl_SampleMaskIn"
            ) {
                self.require_es_extension(SAMPLE_VARIABLES_EXTENSION);
            }
            return Ok(());
        }
        let Some(Binding::Location {
            location,
            interpolation,
            sampling,
            blend_src,
        }) = g.io
        else {
            return Err(ice(format!("IO variable '{}' has no location", g.name)));
        };
        let output = g.space == AddressSpace::Out;
        let mut layout = format!("location = {location}");
        if let Some(index) = blend_src {
            if self.es() {
                self.extensions.insert(BLEND_FUNC_EXTENSION);
            }
            layout.push_str(&format!(", index = {index}"));
        }

        let interpolated = matches!(
            (self.stage, output),
            (Some(ShaderStage::Vertex), true) | (Some(ShaderStage::Fragment), false)
        );
        let mut qualifiers = String::new();
        if interpolated {
            let integer = self
                .ty(g.ty)?
                .inner
                .scalar()
                .is_some_and(|s| s.is_integer());
            match interpolation {
                _ if integer => qualifiers.push_str("flat "),
                Some(Interpolation::Flat) => qualifiers.push_str("flat "),
                Some(Interpolation::Linear) if !self.es() => qualifiers.push_str("noperspective "),
                _ => {}
            }
            match sampling {
                Some(Sampling::Centroid) => qualifiers.push_str("centroid "),
                Some(Sampling::Sample) => {
                    self.require_es_extension(SAMPLE_INTERPOLATION_EXTENSION);
                    qualifiers.push_str("sample ");
                }
                _ => {}
            }
        }
        let decl = self.declare(g.ty, &g.name)?;
        let dir = if output { "out" } else { "in" };
        out.line(format!("layout({layout}) {qualifiers}{dir} {decl};"));
        Ok(())
    }

    fn write_entry_point_layout(
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
                out.line(format!(
                    "layout(local_size_x = {}, local_size_y = {}, local_size_z = {}) in;",
                    dims[0], dims[1], dims[2]
                ));
            }
            ShaderStage::Fragment if info.early_depth_test => {
                out.line("layout(early_fragment_tests) in;");
            }
            _ => {}
        }
        Ok(())
    }

    fn write_function(&mut self, out: &mut TextBuffer, func: &'a Function) -> Result<(), BackendError> {
        let header = if func.is_entry_point() {
            "void main() {".to_string()
        } else {
            let result = match &func.result {
                Some(r) => self.type_name(r.ty)?,
                None => "void".to_string(),
            };
            let mut params = Vec::with_capacity(func.arguments.len());
            for arg in &func.arguments {
                let inner = &self.ty(arg.ty)?.inner;
                params.push(match *inner {
                    TypeInner::Pointer { base, .. } => {
                        format!("inout {}", self.declare(base, &arg.name)?)
                    }
                    TypeInner::Texture { .. } if self.es() => {
                        format!("highp {}", self.declare(arg.ty, &arg.name)?)
                    }
                    _ => self.declare(arg.ty, &arg.name)?,
                });
            }
            format!("{result} {}({}) {{", func.name, params.join(", "))
        };
        let mut f = FnCtx::new(self.module, func);
        let body = self.block(&mut f, &func.body)?;
        braced(out, header, &body);
        Ok(())
    }

    // Types ---------------------------------------------------------------

    fn scalar_name(&mut self, scalar: Scalar) -> &'static str {
        match (scalar.kind, scalar.width) {
            (ScalarKind::Bool, _) => "bool",
            (ScalarKind::Sint, _) => "int",
            (ScalarKind::Uint, _) => "uint",
            (ScalarKind::Float, 2) => {
                self.extensions.insert(F16_EXTENSION);
                "float16_t"
            }
            (ScalarKind::Float, _) => "float",
        }
    }

    fn vector_name(&mut self, size: u32, scalar: Scalar) -> String {
        if scalar.width == 2 {
            self.extensions.insert(F16_EXTENSION);
        }
        format!("{}vec{size}", vector_prefix(scalar))
    }

    fn type_name(&mut self, ty: Handle<Type>) -> Result<String, BackendError> {
        let ty = self.ty(ty)?;
        match ty.inner {
            TypeInner::Struct { .. } => Ok(struct_name(ty.name.as_deref().unwrap_or_default()).to_string()),
            ref inner => self.inner_name(inner),
        }
    }

    fn inner_name(&mut self, inner: &TypeInner) -> Result<String, BackendError> {
        Ok(match *inner {
            TypeInner::Scalar(s) | TypeInner::Atomic(s) => self.scalar_name(s).to_string(),
            TypeInner::Vector { size, scalar } => self.vector_name(size.count(), scalar),
            TypeInner::ValuePointer {
                size: Some(size),
                scalar,
                ..
            } => self.vector_name(size.count(), scalar),
            TypeInner::ValuePointer { scalar, .. } => self.scalar_name(scalar).to_string(),
            TypeInner::Matrix {
                columns,
                rows,
                scalar,
            } => {
                let prefix = if scalar.width == 2 {
                    self.extensions.insert(F16_EXTENSION);
                    "f16"
                } else {
                    ""
                };
                if columns == rows && scalar.width != 2 {
                    format!("mat{}", columns.count())
                } else {
                    format!("{prefix}mat{}x{}", columns.count(), rows.count())
                }
            }
            TypeInner::Pointer { base, .. } => self.type_name(base)?,
            TypeInner::Array { .. } => {
                let (base, dims) = self.array_parts(inner)?;
                format!("{base}{dims}")
            }
            TypeInner::Struct { .. } => {
                return Err(ice("anonymous struct type"));
            }
            TypeInner::Sampler { .. } => {
                return Err(ice("separate sampler left after combining samplers"));
            }
            TypeInner::Texture { dim, class } => self.texture_type(dim, class)?,
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
                ArraySize::Runtime => dims.push_str("[]"),
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
    fn declare(&mut self, ty: Handle<Type>, name: &str) -> Result<String, BackendError> {
        let inner = &self.ty(ty)?.inner;
        if let TypeInner::Array { .. } = inner {
            let (base, dims) = self.array_parts(inner)?;
            return Ok(format!("{base} {name}{dims}"));
        }
        Ok(format!("{} {name}", self.type_name(ty)?))
    }

    fn texture_type(
        &mut self,
        dim: TextureDimension,
        class: TextureClass,
    ) -> Result<String, BackendError> {
        if dim == TextureDimension::CubeArray {
            self.require_es_extension(CUBE_ARRAY_EXTENSION);
        }
        if dim == TextureDimension::D1 && self.es() {
            return Err(ice("1D texture left after lowering to 2D"));
        }
        let suffix = dim_suffix(dim);
        Ok(match class {
            TextureClass::Sampled(kind) => {
                format!("{}sampler{suffix}", vector_prefix(kind.scalar()))
            }
            TextureClass::Depth => format!("sampler{suffix}Shadow"),
            TextureClass::Multisampled(_) | TextureClass::DepthMultisampled => {
                let prefix = vector_prefix(class.texel_scalar());
                match dim {
                    TextureDimension::D2 => format!("{prefix}sampler2DMS"),
                    TextureDimension::D2Array => {
                        if self.es() {
                            self.extensions.insert(MS_ARRAY_EXTENSION);
                        }
                        format!("{prefix}sampler2DMSArray")
                    }
                    _ => return Err(ice("multisampled texture that is not 2D")),
                }
            }
            TextureClass::Storage { format, .. } => {
                format!("{}image{suffix}", vector_prefix(format.sampled_kind().scalar()))
            }
            TextureClass::External => {
                return Err(unsupported("texture_external without the multiplanar lowering"));
            }
        })
    }

    fn literal(&mut self, lit: Literal) -> Result<String, BackendError> {
        Ok(match lit {
            Literal::Bool(b) => b.to_string(),
            Literal::I32(i32::MIN) => "(-2147483647 - 1)".to_string(),
            Literal::I32(v) => v.to_string(),
            Literal::U32(v) => format!("{v}u"),
            Literal::F32(v) => match f32_text(v) {
                Some(text) => format!("{text}f"),
                None => format!("uintBitsToFloat(0x{:08x}u)", v.to_bits()),
            },
            Literal::F16(v) => {
                self.extensions.insert(F16_EXTENSION);
                match f32_text(v) {
                    Some(text) => format!("{text}hf"),
                    None => return Err(unsupported("non-finite f16 literal")),
                }
            }
        })
    }

    fn zero(&mut self, ty: Handle<Type>) -> Result<String, BackendError> {
        let inner = &self.ty(ty)?.inner;
        Ok(match *inner {
            TypeInner::Scalar(s) | TypeInner::Atomic(s) => self.literal(Literal::zero(s))?,
            TypeInner::Vector { scalar, .. } | TypeInner::Matrix { scalar, .. } => {
                let z = self.literal(Literal::zero(scalar))?;
                format!("{}({z})", self.inner_name(inner)?)
            }
            TypeInner::Array {
                base,
                size: ArraySize::Constant(n),
                ..
            } => {
                let z = self.zero(base)?;
                let items = vec![z; n as usize].join(", ");
                format!("{}({items})", self.inner_name(inner)?)
            }
            TypeInner::Struct { ref members, .. } => {
                let mut items = Vec::with_capacity(members.len());
                for m in members {
                    items.push(self.zero(m.ty)?);
                }
                format!("{}({})", self.type_name(ty)?, items.join(", "))
            }
            _ => return Err(ice("zero value of a type without a constructor")),
        })
    }

    // Helpers -------------------------------------------------------------

    /// Returns the name of the helper registered under `key`, writing it
    /// with `write` the first time.
    fn helper(
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
        let body = write(self, &name)?;
        self.helpers.push_block(&body);
        self.helpers.blank();
        self.helper_keys.insert(key, name.clone());
        Ok(name)
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

    fn int_dot(&mut self, ty: &TypeInner) -> Result<String, BackendError> {
        let TypeInner::Vector { size, scalar } = *ty else {
            return Err(ice("integer dot of a non-vector"));
        };
        let v = self.inner_name(ty)?;
        let s = self.scalar_name(scalar);
        self.helper("tint_int_dot", format!("dot {v}"), |_, name| {
            let terms: Vec<String> = (0..size.count()).map(|i| format!("(a[{i}] * b[{i}])")).collect();
            let mut b = TextBuffer::new();
            b.line(format!("{s} {name}({v} a, {v} b) {{"));
            b.indented(|b| b.line(format!("return {};", terms.join(" + "))));
            b.line("}");
            Ok(b)
        })
    }

    fn quantize_to_f16(&mut self, ty: &TypeInner) -> Result<String, BackendError> {
        let t = self.inner_name(ty)?;
        let round = |v: &str| format!("unpackHalf2x16(packHalf2x16({v}))");
        let value = match ty.vector_size().map(|s| s.count()) {
            None => format!("{}.x", round("vec2(v)")),
            Some(2) => round("v"),
            Some(3) => format!("vec3({}, {}.x)", round("v.xy"), round("v.zz")),
            _ => format!("vec4({}, {})", round("v.xy"), round("v.zw")),
        };
        self.helper("tint_quantize_to_f16", format!("quantize {t}"), |_, name| {
            let mut b = TextBuffer::new();
            b.line(format!("{t} {name}({t} v) {{"));
            b.indented(|b| b.line(format!("return {value};")));
            b.line("}");
            Ok(b)
        })
    }

    /// `tint_modf` / `tint_frexp`: GLSL returns the second half through an
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
        let (family, glsl) = match fun {
            BuiltinFn::Modf => ("tint_modf", "modf"),
            _ => ("tint_frexp", "frexp"),
        };
        let t = self.inner_name(arg)?;
        let s = self.type_name(result)?;
        let (fract, other) = (first.name.clone(), second.name.clone());
        self.helper(family, format!("{glsl} {t}"), |_, name| {
            let mut b = TextBuffer::new();
            b.line(format!("{s} {name}({t} v) {{"));
            b.indented(|b| {
                b.line(format!("{s} result;"));
                b.line(format!("result.{fract} = {glsl}(v, result.{other});"));
                b.line("return result;");
            });
            b.line("}");
            Ok(b)
        })
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
            Statement::Declare { local, ref init } => self.write_declare(f, out, local, init.as_ref())?,
            Statement::Store {
                ref pointer,
                ref value,
            } => {
                let p = self.expr(f, pointer)?;
                let v = self.expr(f, value)?;
                out.line(format!("{p} = {v};"));
            }
            Statement::Call(Expression::Builtin {
                fun: BuiltinFn::AtomicCompareExchangeWeak,
                ref arguments,
            }) => {
                let args = self.exprs(f, arguments)?;
                out.line(format!("atomicCompSwap({});", args.join(", ")));
            }
            Statement::Call(ref e) => {
                let e = self.expr(f, e)?;
                out.line(format!("{e};"));
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
                braced(out, "while(true) {", &result?);
            }
            Statement::Switch {
                ref selector,
                ref cases,
            } => {
                let sel = self.expr(f, selector)?;
                out.line(format!("switch({sel}) {{"));
                for case in cases {
                    let mut labels = Vec::with_capacity(case.selectors.len());
                    for s in &case.selectors {
                        labels.push(match *s {
                            CaseSelector::I32(v) => format!("case {}:", self.literal(Literal::I32(v))?),
                            CaseSelector::U32(v) => format!("case {v}u:"),
                            CaseSelector::Default => "default:".to_string(),
                        });
                    }
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
                        braced(b, format!("{last} {{"), &body);
                    });
                }
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
            Statement::Discard => out.line("discard;"),
            Statement::Barrier(barrier) => {
                out.line("barrier();");
                if barrier.contains(Barrier::STORAGE) {
                    out.line("memoryBarrierBuffer();");
                }
                if barrier.contains(Barrier::TEXTURE) {
                    out.line("memoryBarrierImage();");
                }
            }
            Statement::Block(ref inner) => {
                let inner = self.block(f, inner)?;
                braced(out, "{", &inner);
            }
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
        let Some(Some(cont)) = f.loops.last().copied() else {
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
            braced(out, "{", &inner);
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

    fn write_declare(
        &mut self,
        f: &mut FnCtx<'a>,
        out: &mut TextBuffer,
        local: Handle<LocalVariable>,
        init: Option<&'a Expression>,
    ) -> Result<(), BackendError> {
        let var = f.local(local)?;
        if let Some(Expression::Builtin {
            fun: BuiltinFn::AtomicCompareExchangeWeak,
            arguments,
        }) = init
        {
            return self.write_compare_exchange(f, out, var, arguments);
        }
        let decl = self.declare(var.ty, &var.name)?;
        let value = match init {
            Some(e) => self.expr(f, e)?,
            None => self.zero(var.ty)?,
        };
        out.line(format!("{decl} = {value};"));
        Ok(())
    }

    /// GLSL's `atomicCompSwap` only returns the old value; the `exchanged`
    /// flag is recomputed from it.
    fn write_compare_exchange(
        &mut self,
        f: &mut FnCtx<'a>,
        out: &mut TextBuffer,
        var: &LocalVariable,
        arguments: &[Expression],
    ) -> Result<(), BackendError> {
        let [pointer, compare, value] = arguments else {
            return Err(ice("atomicCompareExchangeWeak takes three arguments"));
        };
        let TypeInner::Atomic(scalar) = f.value_ty(pointer)? else {
            return Err(ice("atomicCompareExchangeWeak on a non-atomic"));
        };
        let TypeInner::Struct { ref members, .. } = self.ty(var.ty)?.inner else {
            return Err(ice("atomicCompareExchangeWeak result is not a struct"));
        };
        let [old, exchanged] = members.as_slice() else {
            return Err(ice("atomicCompareExchangeWeak result needs two members"));
        };
        let (p, c, v) = (self.expr(f, pointer)?, self.expr(f, compare)?, self.expr(f, value)?);
        let s = self.scalar_name(scalar);
        let cmp = self.namer.unique(&format!("{}_cmp", var.name));
        let decl = self.declare(var.ty, &var.name)?;
        let name = &var.name;
        out.line(format!("{s} {cmp} = {c};"));
        out.line(format!("{decl};"));
        out.line(format!("{name}.{} = atomicCompSwap({p}, {cmp}, {v});", old.name));
        out.line(format!(
            "{name}.{} = ({name}.{} == {cmp});",
            exchanged.name, old.name
        ));
        Ok(())
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

    fn expr(&mut self, f: &mut FnCtx<'a>, e: &Expression) -> Result<String, BackendError> {
        Ok(match *e {
            Expression::Literal(lit) => self.literal(lit)?,
            Expression::ZeroValue(ty) => self.zero(ty)?,
            Expression::Compose { ty, ref components } => {
                let parts = self.exprs(f, components)?;
                format!("{}({})", self.type_name(ty)?, parts.join(", "))
            }
            Expression::Splat { size, ref value } => {
                let scalar = f
                    .ty(value)?
                    .scalar()
                    .ok_or_else(|| ice("splat of a non-scalar"))?;
                let v = self.expr(f, value)?;
                format!("{}({v})", self.vector_name(size.count(), scalar))
            }
            Expression::Swizzle {
                ref vector,
                ref pattern,
            } => {
                let v = self.expr(f, vector)?;
                let letters: String = pattern
                    .iter()
                    .map(|c| ['x', 'y', 'z', 'w'][*c as usize])
                    .collect();
                format!("{v}.{letters}")
            }
            Expression::FunctionArgument(i) => f
                .function()?
                .arguments
                .get(i as usize)
                .map(|a| a.name.clone())
                .ok_or_else(|| ice(format!("argument {i} out of range")))?,
            Expression::GlobalVariable(h) => self
                .module
                .global_variables
                .try_get(h)
                .map(|g| g.name.clone())
                .ok_or_else(|| ice(format!("global {h:?} out of range")))?,
            Expression::LocalVariable(h) => f.local(h)?.name.clone(),
            Expression::Override(_) => {
                return Err(unsupported("override expression that was not substituted"));
            }
            Expression::Load { ref pointer } => self.expr(f, pointer)?,
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
                    TypeInner::Vector { .. } | TypeInner::ValuePointer { size: Some(_), .. } => {
                        format!("{b}.{}", &"xyzw"[index as usize..=index as usize])
                    }
                    _ => format!("{b}[{index}]"),
                }
            }
            Expression::Unary { op, ref expr } => {
                let v = self.expr(f, expr)?;
                match op {
                    UnaryOp::Negate if v.starts_with('-') => format!("(-({v}))"),
                    UnaryOp::Negate => format!("(-{v})"),
                    UnaryOp::LogicalNot if f.ty(expr)?.vector_size().is_some() => {
                        format!("not({v})")
                    }
                    UnaryOp::LogicalNot => format!("!({v})"),
                    UnaryOp::BitwiseNot => format!("(~{v})"),
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
        let vector = lt.vector_size().or(rt.vector_size());

        if let (Some(_), Some(func)) = (vector, vector_comparison(op)) {
            return Ok(format!("{func}({l}, {r})"));
        }
        let scalar = lt.scalar();
        let is_bool = scalar.is_some_and(|s| s.kind == ScalarKind::Bool);
        if is_bool && matches!(op, BinaryOp::BitwiseAnd | BinaryOp::BitwiseOr) {
            let sym = binary_symbol(op);
            return Ok(match lt.vector_size() {
                Some(size) => {
                    let n = size.count();
                    format!("bvec{n}(uvec{n}({l}) {sym} uvec{n}({r}))")
                }
                None => format!("bool(uint({l}) {sym} uint({r}))"),
            });
        }
        if op == BinaryOp::Modulo && scalar.is_some_and(|s| s.is_float()) {
            // One side may be a scalar; the helper takes matching types.
            let result = if lt.vector_size().is_some() { lt.clone() } else { rt.clone() };
            let (l, r) = match (lt.vector_size(), rt.vector_size()) {
                (Some(_), None) => (l, format!("{}({r})", self.inner_name(&result)?)),
                (None, Some(_)) => (format!("{}({l})", self.inner_name(&result)?), r),
                _ => (l, r),
            };
            let name = self.float_modulo(&result)?;
            return Ok(format!("{name}({l}, {r})"));
        }
        if op.is_shift() {
            let mask = if rt.vector_size().is_some() {
                format!("{}(31u)", self.inner_name(&rt)?)
            } else {
                "31u".to_string()
            };
            return Ok(format!("({l} {} ({r} & {mask}))", binary_symbol(op)));
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
            return Err(unsupported("bitcast involving f16"));
        }
        Ok(match (fs.kind, ts.kind) {
            (a, b) if a == b => v,
            (ScalarKind::Float, ScalarKind::Sint) => format!("floatBitsToInt({v})"),
            (ScalarKind::Float, ScalarKind::Uint) => format!("floatBitsToUint({v})"),
            (ScalarKind::Sint, ScalarKind::Float) => format!("intBitsToFloat({v})"),
            (ScalarKind::Uint, ScalarKind::Float) => format!("uintBitsToFloat({v})"),
            (ScalarKind::Sint | ScalarKind::Uint, ScalarKind::Sint | ScalarKind::Uint) => {
                format!("{}({v})", self.inner_name(&to)?)
            }
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
        let arg_ty = f.ty(first)?;
        let a = self.exprs(f, arguments)?;
        let arg = |i: usize| a.get(i).cloned().unwrap_or_default();
        let call = |name: &str| format!("{name}({})", a.join(", "));
        let version = self.options.version;
        let desktop_at_least = |major, minor| !version.es && version.is_at_least(major, minor);

        Ok(match fun {
            B::Acos | B::Acosh | B::Asin | B::Asinh | B::Atan | B::Atanh | B::Ceil | B::Clamp
            | B::Cos | B::Cosh | B::Cross | B::Degrees | B::Determinant | B::Distance | B::Exp
            | B::Exp2 | B::Floor | B::Fract | B::Ldexp | B::Length | B::Log | B::Log2 | B::Max
            | B::Min | B::Mix | B::Normalize | B::Pow | B::Radians | B::Reflect | B::Refract
            | B::Sign | B::Sin | B::Sinh | B::SmoothStep | B::Sqrt | B::Step | B::Tan | B::Tanh
            | B::Transpose | B::Trunc | B::Fwidth => call(fun.wgsl_name()),
            B::Abs if arg_ty.scalar_kind() == Some(ScalarKind::Uint) => arg(0),
            B::Abs => call("abs"),
            B::All | B::Any if arg_ty.vector_size().is_none() => arg(0),
            B::All | B::Any => call(fun.wgsl_name()),
            B::Atan2 => call("atan"),
            B::InverseSqrt => call("inversesqrt"),
            B::Round => call("roundEven"),
            B::FaceForward => call("faceforward"),
            B::ReverseBits => call("bitfieldReverse"),
            B::ExtractBits => format!("bitfieldExtract({}, int({}), int({}))", arg(0), arg(1), arg(2)),
            B::InsertBits => format!(
                "bitfieldInsert({}, {}, int({}), int({}))",
                arg(0),
                arg(1),
                arg(2),
                arg(3)
            ),
            B::FirstLeadingBit | B::FirstTrailingBit | B::CountOneBits => {
                let glsl = match fun {
                    B::FirstLeadingBit => "findMSB",
                    B::FirstTrailingBit => "findLSB",
                    _ => "bitCount",
                };
                format!("{}({})", self.inner_name(&arg_ty)?, call(glsl))
            }
            B::Select => match f.ty(arguments.get(2).ok_or_else(|| ice("select without a condition"))?)? {
                TypeInner::Scalar(_) => format!("({} ? {} : {})", arg(2), arg(1), arg(0)),
                _ => format!("mix({}, {}, {})", arg(0), arg(1), arg(2)),
            },
            B::Dot if arg_ty.scalar().is_some_and(|s| s.is_integer()) => {
                let name = self.int_dot(&arg_ty)?;
                call(&name)
            }
            B::Dot => call("dot"),
            B::Fma if desktop_at_least(4, 0) || (version.es && version.is_at_least(3, 2)) => {
                call("fma")
            }
            B::Fma => format!("(({} * {}) + {})", arg(0), arg(1), arg(2)),
            B::Dpdx | B::Dpdy => call(if fun == B::Dpdx { "dFdx" } else { "dFdy" }),
            B::DpdxCoarse | B::DpdxFine | B::DpdyCoarse | B::DpdyFine | B::FwidthCoarse
            | B::FwidthFine => {
                let fine = desktop_at_least(4, 5);
                call(match fun {
                    B::DpdxCoarse if fine => "dFdxCoarse",
                    B::DpdxFine if fine => "dFdxFine",
                    B::DpdyCoarse if fine => "dFdyCoarse",
                    B::DpdyFine if fine => "dFdyFine",
                    B::FwidthCoarse if fine => "fwidthCoarse",
                    B::FwidthFine if fine => "fwidthFine",
                    B::DpdxCoarse | B::DpdxFine => "dFdx",
                    B::DpdyCoarse | B::DpdyFine => "dFdy",
                    _ => "fwidth",
                })
            }
            B::Pack2x16Float => call("packHalf2x16"),
            B::Pack2x16Snorm => call("packSnorm2x16"),
            B::Pack2x16Unorm => call("packUnorm2x16"),
            B::Pack4x8Snorm => call("packSnorm4x8"),
            B::Pack4x8Unorm => call("packUnorm4x8"),
            B::Unpack2x16Float => call("unpackHalf2x16"),
            B::Unpack2x16Snorm => call("unpackSnorm2x16"),
            B::Unpack2x16Unorm => call("unpackUnorm2x16"),
            B::Unpack4x8Snorm => call("unpackSnorm4x8"),
            B::Unpack4x8Unorm => call("unpackUnorm4x8"),
            B::QuantizeToF16 => {
                let name = self.quantize_to_f16(&arg_ty)?;
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
            B::Saturate => {
                let scalar = arg_ty.scalar().ok_or_else(|| ice("saturate of a non-float"))?;
                let zero = self.literal(Literal::zero(scalar))?;
                let one = match scalar.width {
                    2 => self.literal(Literal::F16(1.0))?,
                    _ => self.literal(Literal::F32(1.0))?,
                };
                format!("clamp({}, {zero}, {one})", arg(0))
            }
            B::ArrayLength => format!("uint({}.length())", arg(0)),
            B::AtomicLoad | B::AtomicSub => {
                let TypeInner::Atomic(scalar) = f.value_ty(first)? else {
                    return Err(ice("atomic builtin on a non-atomic"));
                };
                let unsigned = scalar.kind == ScalarKind::Uint;
                match fun {
                    B::AtomicLoad => format!("atomicOr({}, {})", arg(0), if unsigned { "0u" } else { "0" }),
                    _ if unsigned => format!("atomicAdd({}, (0u - {}))", arg(0), arg(1)),
                    _ => format!("atomicAdd({}, -({}))", arg(0), arg(1)),
                }
            }
            B::AtomicStore | B::AtomicExchange => call("atomicExchange"),
            B::AtomicAdd | B::AtomicMax | B::AtomicMin | B::AtomicAnd | B::AtomicOr
            | B::AtomicXor => call(fun.wgsl_name()),
            B::AtomicCompareExchangeWeak => {
                return Err(ice("atomicCompareExchangeWeak result not bound to a local"));
            }
            B::CountLeadingZeros | B::CountTrailingZeros | B::Dot4I8Packed | B::Dot4U8Packed
            | B::Pack4xI8 | B::Pack4xU8 | B::Unpack4xI8 | B::Unpack4xU8 => {
                return Err(ice(format!("{} must be polyfilled for GLSL", fun.wgsl_name())));
            }
        })
    }

    fn texture(&mut self, f: &mut FnCtx<'a>, call: &TextureCall) -> Result<String, BackendError> {
        let TypeInner::Texture { dim, class } = f.value_ty(&call.texture)? else {
            return Err(ice("texture builtin on a non-texture"));
        };
        let t = self.expr(f, &call.texture)?;
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
        let bgra = matches!(
            class,
            TextureClass::Storage {
                format: TexelFormat::Bgra8Unorm,
                ..
            }
        );
        // Float coordinates with the layer and depth reference folded in.
        let sample_coords = |with_dref: bool| -> Result<String, BackendError> {
            let c = need(&coords, "coordinates")?;
            let mut parts = vec![c.clone()];
            if let Some(layer) = &layer {
                parts.push(format!("float({layer})"));
            }
            if with_dref {
                parts.push(need(&dref, "a depth reference")?);
            }
            let total = n as usize + parts.len() - 1;
            Ok(if parts.len() == 1 {
                c
            } else {
                format!("vec{total}({})", parts.join(", "))
            })
        };
        // Integer coordinates with the layer folded in.
        let texel_coords = || -> Result<String, BackendError> {
            let c = need(&coords, "coordinates")?;
            Ok(match (&layer, n) {
                (Some(layer), _) => format!("ivec{}({c}, int({layer}))", n + 1),
                (None, 1) => format!("int({c})"),
                (None, _) => format!("ivec{n}({c})"),
            })
        };
        let with_offset = |plain: &str, args: Vec<String>| match &offset {
            Some(off) => {
                let mut args = args;
                args.push(off.clone());
                format!("{plain}Offset({})", args.join(", "))
            }
            None => format!("{plain}({})", args.join(", ")),
        };
        let size_query = |class: TextureClass, level: Option<&String>| match class {
            TextureClass::Storage { .. } => format!("imageSize({t})"),
            c if c.is_multisampled() => format!("textureSize({t})"),
            _ => format!("textureSize({t}, int({}))", level.map_or("0", |l| l.as_str())),
        };

        Ok(match call.fun {
            TextureFn::Sample => with_offset("texture", vec![t.clone(), sample_coords(false)?]),
            TextureFn::SampleBias => {
                let p = sample_coords(false)?;
                let bias = need(&bias, "a bias")?;
                match &offset {
                    Some(off) => format!("textureOffset({t}, {p}, {off}, {bias})"),
                    None => format!("texture({t}, {p}, {bias})"),
                }
            }
            TextureFn::SampleLevel => {
                let p = sample_coords(false)?;
                let level = format!("float({})", need(&level, "a level")?);
                with_offset("textureLod", vec![t.clone(), p, level])
            }
            TextureFn::SampleGrad => {
                let p = sample_coords(false)?;
                with_offset(
                    "textureGrad",
                    vec![t.clone(), p, need(&ddx, "ddx")?, need(&ddy, "ddy")?],
                )
            }
            TextureFn::SampleCompare if dim == TextureDimension::CubeArray => {
                format!("texture({t}, {}, {})", sample_coords(false)?, need(&dref, "a depth reference")?)
            }
            TextureFn::SampleCompare => with_offset("texture", vec![t.clone(), sample_coords(true)?]),
            TextureFn::SampleCompareLevel => match dim {
                TextureDimension::D2 => {
                    with_offset("textureLod", vec![t.clone(), sample_coords(true)?, "0.0f".into()])
                }
                TextureDimension::D2Array | TextureDimension::Cube => {
                    let zero = if dim == TextureDimension::Cube { "vec3(0.0f)" } else { "vec2(0.0f)" };
                    with_offset(
                        "textureGrad",
                        vec![t.clone(), sample_coords(true)?, zero.into(), zero.into()],
                    )
                }
                TextureDimension::CubeArray => format!(
                    "texture({t}, {}, {})",
                    sample_coords(false)?,
                    need(&dref, "a depth reference")?
                ),
                _ => return Err(ice("textureSampleCompareLevel on a 1D or 3D texture")),
            },
            TextureFn::SampleBaseClampToEdge => {
                let c = need(&coords, "coordinates")?;
                let half = format!("(vec2(0.5f) / vec2(textureSize({t}, 0)))");
                format!("textureLod({t}, clamp({c}, {half}, (vec2(1.0f) - {half})), 0.0f)")
            }
            TextureFn::Gather => {
                let mut args = vec![t.clone(), sample_coords(false)?];
                if let Some(off) = &offset {
                    args.push(off.clone());
                }
                if let Some(component) = &call.component {
                    let c = self.expr(f, component)?;
                    args.push(match f.ty(component)?.scalar_kind() {
                        Some(ScalarKind::Uint) => format!("int({c})"),
                        _ => c,
                    });
                }
                let func = if offset.is_some() { "textureGatherOffset" } else { "textureGather" };
                format!("{func}({})", args.join(", "))
            }
            TextureFn::GatherCompare => {
                let p = sample_coords(false)?;
                let d = need(&dref, "a depth reference")?;
                with_offset("textureGather", vec![t.clone(), p, d])
            }
            TextureFn::Load => match class {
                TextureClass::Storage { .. } => {
                    let texel = format!("imageLoad({t}, {})", texel_coords()?);
                    if bgra { format!("{texel}.zyxw") } else { texel }
                }
                c if c.is_multisampled() => {
                    format!("texelFetch({t}, {}, int({}))", texel_coords()?, need(&sample, "a sample index")?)
                }
                _ => format!(
                    "texelFetch({t}, {}, int({}))",
                    texel_coords()?,
                    level.clone().unwrap_or_else(|| "0".into())
                ),
            },
            TextureFn::Store => {
                let v = need(&value, "a value")?;
                let v = if bgra { format!("{v}.zyxw") } else { v };
                format!("imageStore({t}, {}, {v})", texel_coords()?)
            }
            TextureFn::Dimensions => {
                let query = size_query(class, level.as_ref());
                let native = match dim {
                    TextureDimension::D1 => 1,
                    TextureDimension::D2 | TextureDimension::Cube => 2,
                    _ => 3,
                };
                let want = dim.size_components();
                let query = if native > want {
                    format!("{query}.{}", swizzle_letters(want))
                } else {
                    query
                };
                if want == 1 {
                    format!("uint({query})")
                } else {
                    format!("uvec{want}({query})")
                }
            }
            TextureFn::NumLayers => format!("uint({}.z)", size_query(class, None)),
            TextureFn::NumLevels if desktop_version_at_least(self.options, 4, 3) => {
                format!("uint(textureQueryLevels({t}))")
            }
            TextureFn::NumSamples if desktop_version_at_least(self.options, 4, 5) => {
                format!("uint(textureSamples({t}))")
            }
            TextureFn::NumLevels | TextureFn::NumSamples => {
                return Err(unsupported(format!(
                    "{name} on {}; read it from a uniform instead",
                    self.options.version
                )));
            }
        })
    }
}

fn desktop_version_at_least(options: &Options, major: u32, minor: u32) -> bool {
    !options.version.es && options.version.is_at_least(major, minor)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_backend_core::GlslVersion;
    use tinct_ir::{EntryPoint, VectorSize};

    fn writer_for(module: &Module, options: &Options) -> String {
        print(module, options).unwrap()
    }

    #[test]
    fn empty_compute_shader() {
        let mut module = Module::default();
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::compute(8, 4, 1));
        module.functions.append(main);
        let text = writer_for(&module, &Options::default());
        assert!(text.starts_with("#version 310 es\n"), "{text}");
        assert!(text.contains("precision highp float;\nprecision highp int;\n"), "{text}");
        assert!(
            text.contains("layout(local_size_x = 8, local_size_y = 4, local_size_z = 1) in;\nvoid main() {\n}"),
            "{text}"
        );

        let desktop = Options {
            version: GlslVersion::DESKTOP_450,
            ..Options::default()
        };
        let text = writer_for(&module, &desktop);
        assert!(text.starts_with("#version 450\n"), "{text}");
        assert!(!text.contains("precision"), "{text}");
    }

    #[test]
    fn literals() {
        let module = Module::default();
        let options = Options::default();
        let mut w = Writer::new(&module, &options);
        assert_eq!(w.literal(Literal::I32(i32::MIN)).unwrap(), "(-2147483647 - 1)");
        assert_eq!(w.literal(Literal::U32(7)).unwrap(), "7u");
        assert_eq!(w.literal(Literal::F32(0.5)).unwrap(), "0.5f");
        assert_eq!(w.literal(Literal::F32(2.0)).unwrap(), "2.0f");
        assert_eq!(
            w.literal(Literal::F32(f32::INFINITY)).unwrap(),
            "uintBitsToFloat(0x7f800000u)"
        );
        assert!(w.extensions.is_empty());
        assert_eq!(w.literal(Literal::F16(1.5)).unwrap(), "1.5hf");
        assert!(w.extensions.contains(F16_EXTENSION));
    }

    #[test]
    fn type_names() {
        let mut module = Module::default();
        let vec3u = module.vector_type(VectorSize::Tri, Scalar::U32);
        let mat = module.insert_type(TypeInner::Matrix {
            columns: VectorSize::Quad,
            rows: VectorSize::Tri,
            scalar: Scalar::F32,
        });
        let arr = module.insert_type(TypeInner::Array {
            base: vec3u,
            size: ArraySize::Constant(4),
            stride: 16,
        });
        let nested = module.insert_type(TypeInner::Array {
            base: arr,
            size: ArraySize::Constant(2),
            stride: 64,
        });
        let options = Options::default();
        let mut w = Writer::new(&module, &options);
        assert_eq!(w.type_name(vec3u).unwrap(), "uvec3");
        assert_eq!(w.type_name(mat).unwrap(), "mat4x3");
        assert_eq!(w.type_name(nested).unwrap(), "uvec3[2][4]");
        assert_eq!(w.declare(nested, "a").unwrap(), "uvec3 a[2][4]");
        assert_eq!(w.zero(arr).unwrap(), "uvec3[4](uvec3(0u), uvec3(0u), uvec3(0u), uvec3(0u))");
        assert_eq!(
            w.texture_type(TextureDimension::CubeArray, TextureClass::Depth).unwrap(),
            "samplerCubeArrayShadow"
        );
        assert!(w.extensions.contains(CUBE_ARRAY_EXTENSION));
    }

    #[test]
    fn texture_type_table() {
        use tinct_ir::SampledKind;
        use TextureDimension::{Cube, CubeArray, D1, D2, D2Array, D3};

        let module = Module::default();
        let options = Options {
            version: GlslVersion::DESKTOP_450,
            ..Options::default()
        };
        let mut w = Writer::new(&module, &options);
        let prefixes = [
            (SampledKind::Float, ""),
            (SampledKind::Sint, "i"),
            (SampledKind::Uint, "u"),
        ];
        for dim in [D1, D2, D2Array, D3, Cube, CubeArray] {
            let suffix = dim_suffix(dim);
            for (kind, prefix) in prefixes {
                assert_eq!(
                    w.texture_type(dim, TextureClass::Sampled(kind)).unwrap(),
                    format!("{prefix}sampler{suffix}")
                );
            }
        }
        for (dim, expected) in [
            (D1, "sampler1DShadow"),
            (D2, "sampler2DShadow"),
            (D2Array, "sampler2DArrayShadow"),
            (Cube, "samplerCubeShadow"),
            (CubeArray, "samplerCubeArrayShadow"),
        ] {
            assert_eq!(w.texture_type(dim, TextureClass::Depth).unwrap(), expected);
        }
        for (kind, prefix) in prefixes {
            let class = TextureClass::Multisampled(kind);
            assert_eq!(w.texture_type(D2, class).unwrap(), format!("{prefix}sampler2DMS"));
            assert_eq!(
                w.texture_type(D2Array, class).unwrap(),
                format!("{prefix}sampler2DMSArray")
            );
        }
        assert_eq!(
            w.texture_type(D2, TextureClass::DepthMultisampled).unwrap(),
            "sampler2DMS"
        );
        for dim in [D3, Cube] {
            assert!(matches!(
                w.texture_type(dim, TextureClass::Multisampled(SampledKind::Float)),
                Err(BackendError::Ice(_))
            ));
        }
        for (format, prefix) in [
            (TexelFormat::Rgba8Unorm, ""),
            (TexelFormat::Rgba32Sint, "i"),
            (TexelFormat::R32Uint, "u"),
        ] {
            for dim in [D1, D2, D2Array, D3] {
                let class = TextureClass::Storage {
                    format,
                    access: StorageAccess::STORE,
                };
                assert_eq!(
                    w.texture_type(dim, class).unwrap(),
                    format!("{prefix}image{}", dim_suffix(dim))
                );
            }
        }
        assert!(matches!(
            w.texture_type(D2, TextureClass::External),
            Err(BackendError::Unsupported(_))
        ));
        assert!(w.extensions.is_empty());
    }

    #[test]
    fn es_texture_types_need_extensions() {
        use tinct_ir::SampledKind;

        let module = Module::default();
        let options = Options {
            version: GlslVersion::ES_310,
            ..Options::default()
        };
        let mut w = Writer::new(&module, &options);
        let float = TextureClass::Sampled(SampledKind::Float);
        assert!(matches!(
            w.texture_type(TextureDimension::D1, float),
            Err(BackendError::Ice(_))
        ));
        assert!(w.extensions.is_empty());

        assert_eq!(
            w.texture_type(TextureDimension::CubeArray, float).unwrap(),
            "samplerCubeArray"
        );
        assert!(w.extensions.contains(CUBE_ARRAY_EXTENSION));
        assert_eq!(
            w.texture_type(TextureDimension::D2Array, TextureClass::Multisampled(SampledKind::Uint))
                .unwrap(),
            "usampler2DMSArray"
        );
        assert!(w.extensions.contains(MS_ARRAY_EXTENSION));

        let options = Options {
            version: GlslVersion::from_number(320, true),
            ..Options::default()
        };
        let mut w = Writer::new(&module, &options);
        w.texture_type(TextureDimension::CubeArray, float).unwrap();
        assert!(!w.extensions.contains(CUBE_ARRAY_EXTENSION));
    }

    #[test]
    fn storage_formats_missing_from_es() {
        assert_eq!(image_format(TexelFormat::Rg32Float, false).unwrap(), "rg32f");
        assert!(matches!(
            image_format(TexelFormat::Rg32Float, true),
            Err(BackendError::Unsupported(_))
        ));
        assert_eq!(image_format(TexelFormat::Bgra8Unorm, true).unwrap(), "rgba8");
    }
}
