//! Lowers sanitized tinct IR to a SPIR-V module through `rspirv`'s
//! data-representation builder.
//!
//! Every function gets a leading block that holds its `OpVariable`s and
//! branches to the body once the body is complete, so locals can be
//! declared from anywhere in the function. Terminators leave the builder
//! without a selected block; statements that follow one are dead and are
//! not lowered.

use std::collections::{HashMap, HashSet};

use log::{debug, trace};
use rspirv::binary::Assemble;
use rspirv::dr::{Builder, Operand};
use rspirv::spirv::{
    self, AddressingModel, Capability, Decoration, Dim, ExecutionMode, ExecutionModel,
    FunctionControl, GLOp, ImageFormat, ImageOperands, LoopControl, MemoryModel,
    MemorySemantics, Scope, SelectionControl, StorageClass, Word,
};
use tinct_backend_core::BackendError;
use tinct_ir::{
    AddressSpace, ArraySize, Barrier, BinaryOp, Binding, BuiltIn, BuiltinFn, CaseSelector,
    Expression, Function, GlobalVariable, Handle, Interpolation, IrError, Literal, LocalKind,
    LocalVariable, Module, ResolveContext, Sampling, Scalar, ScalarKind, ShaderStage, Statement,
    StorageAccess, SwitchCase, TexelFormat, TextureCall, TextureClass, TextureDimension,
    TextureFn, Type, TypeInner, TypeResolution, UnaryOp, VectorSize, layout,
};

use crate::Options;

/// Failures while lowering to SPIR-V.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The builder rejected an instruction sequence.
    #[error("SPIR-V builder: {0}")]
    Builder(String),
    #[error(transparent)]
    Backend(#[from] BackendError),
    #[error(transparent)]
    Ir(#[from] IrError),
}

impl From<rspirv::dr::Error> for Error {
    fn from(e: rspirv::dr::Error) -> Self {
        Self::Builder(format!("{e:?}"))
    }
}

impl From<Error> for BackendError {
    fn from(e: Error) -> Self {
        match e {
            Error::Builder(message) => BackendError::Ice(message),
            Error::Backend(e) => e,
            Error::Ir(e) => e.into(),
        }
    }
}

fn ice(message: impl Into<String>) -> Error {
    Error::Backend(BackendError::Ice(message.into()))
}

fn unsupported(message: impl Into<String>) -> Error {
    Error::Backend(BackendError::Unsupported(message.into()))
}

/// IEEE binary16 bits of `value`, rounded to nearest even.
fn f16_bits(value: f32) -> u16 {
    let bits = value.to_bits();
    let sign = ((bits >> 16) & 0x8000) as u16;
    let exp = ((bits >> 23) & 0xff) as i32;
    let mantissa = bits & 0x7f_ffff;
    if exp == 0xff {
        let nan = if mantissa != 0 { 0x200 } else { 0 };
        return sign | 0x7c00 | nan;
    }
    let e = exp - 127 + 15;
    if e >= 0x1f {
        return sign | 0x7c00;
    }
    if e <= 0 {
        let shift = (14 - e) as u32;
        if shift > 24 {
            return sign;
        }
        let full = mantissa | 0x80_0000;
        let m = full >> shift;
        let rem = full & ((1 << shift) - 1);
        let halfway = 1 << (shift - 1);
        let up = u32::from(rem > halfway || (rem == halfway && m & 1 == 1));
        return sign | (m + up) as u16;
    }
    let m = mantissa >> 13;
    let rem = mantissa & 0x1fff;
    let up = u32::from(rem > 0x1000 || (rem == 0x1000 && m & 1 == 1));
    sign | ((((e as u32) << 10) | m) + up) as u16
}

fn negated(lit: Literal) -> Option<Literal> {
    match lit {
        Literal::I32(v) => Some(Literal::I32(v.wrapping_neg())),
        Literal::F32(v) => Some(Literal::F32(-v)),
        Literal::F16(v) => Some(Literal::F16(-v)),
        Literal::U32(_) | Literal::Bool(_) => None,
    }
}

/// Number of constituents an `OpConstantComposite` of `ty` takes.
fn constituent_count(module: &Module, ty: Handle<Type>) -> Option<usize> {
    match module.types.try_get(ty)?.inner {
        TypeInner::Vector { size, .. } => Some(size.count() as usize),
        TypeInner::Matrix { columns, .. } => Some(columns.count() as usize),
        TypeInner::Array {
            size: ArraySize::Constant(n),
            ..
        } => Some(n as usize),
        TypeInner::Struct { ref members, .. } => Some(members.len()),
        _ => None,
    }
}

/// Stride of the matrices in `ty`, looking through arrays.
fn matrix_stride(module: &Module, ty: Handle<Type>) -> Option<u32> {
    match module.types.try_get(ty)?.inner {
        TypeInner::Matrix { rows, scalar, .. } => {
            let column = layout::vector_layout(rows, u32::from(scalar.width));
            Some(layout::round_up(column.align, column.size))
        }
        TypeInner::Array { base, .. } => matrix_stride(module, base),
        _ => None,
    }
}

fn contains_f16(module: &Module, ty: Handle<Type>) -> bool {
    match module.types.try_get(ty).map(|t| &t.inner) {
        Some(TypeInner::Array { base, .. }) => contains_f16(module, *base),
        Some(TypeInner::Struct { members, .. }) => members.iter().any(|m| contains_f16(module, m.ty)),
        Some(inner) => inner.scalar() == Some(Scalar::F16),
        None => false,
    }
}

/// Types whose memory layout is visible to the host and so carries
/// `Offset`, `ArrayStride` and `MatrixStride` decorations.
fn host_shareable_types(module: &Module) -> HashSet<Handle<Type>> {
    let mut out = HashSet::new();
    let mut stack: Vec<_> = module
        .global_variables
        .iter()
        .filter(|(_, g)| g.space.is_host_shareable())
        .map(|(_, g)| g.ty)
        .collect();
    while let Some(ty) = stack.pop() {
        if !out.insert(ty) {
            continue;
        }
        match module.types.try_get(ty).map(|t| &t.inner) {
            Some(TypeInner::Array { base, .. }) => stack.push(*base),
            Some(TypeInner::Struct { members, .. }) => stack.extend(members.iter().map(|m| m.ty)),
            _ => {}
        }
    }
    out
}

fn image_format(format: TexelFormat) -> ImageFormat {
    match format {
        TexelFormat::R8Unorm => ImageFormat::R8,
        TexelFormat::R32Uint => ImageFormat::R32ui,
        TexelFormat::R32Sint => ImageFormat::R32i,
        TexelFormat::R32Float => ImageFormat::R32f,
        TexelFormat::Rg32Uint => ImageFormat::Rg32ui,
        TexelFormat::Rg32Sint => ImageFormat::Rg32i,
        TexelFormat::Rg32Float => ImageFormat::Rg32f,
        TexelFormat::Rgba8Unorm => ImageFormat::Rgba8,
        TexelFormat::Rgba8Snorm => ImageFormat::Rgba8Snorm,
        TexelFormat::Rgba8Uint => ImageFormat::Rgba8ui,
        TexelFormat::Rgba8Sint => ImageFormat::Rgba8i,
        TexelFormat::Bgra8Unorm => ImageFormat::Unknown,
        TexelFormat::Rgba16Uint => ImageFormat::Rgba16ui,
        TexelFormat::Rgba16Sint => ImageFormat::Rgba16i,
        TexelFormat::Rgba16Float => ImageFormat::Rgba16f,
        TexelFormat::Rgba32Uint => ImageFormat::Rgba32ui,
        TexelFormat::Rgba32Sint => ImageFormat::Rgba32i,
        TexelFormat::Rgba32Float => ImageFormat::Rgba32f,
    }
}

/// Formats outside the Vulkan baseline set of storage image formats.
fn is_extended_format(format: TexelFormat) -> bool {
    matches!(
        format,
        TexelFormat::R8Unorm | TexelFormat::Rg32Uint | TexelFormat::Rg32Sint | TexelFormat::Rg32Float
    )
}

fn nth(values: &[Word], i: usize, fun: BuiltinFn) -> Result<Word, Error> {
    values
        .get(i)
        .copied()
        .ok_or_else(|| ice(format!("{} is missing argument {i}", fun.wgsl_name())))
}

/// Per-function lowering state.
struct FnState<'m> {
    function: &'m Function,
    arguments: Vec<Word>,
    /// `var` locals map to their `OpVariable`, `let`s to their value.
    locals: HashMap<Handle<LocalVariable>, Word>,
    /// Label of the block holding the `OpVariable`s.
    vars_block: Word,
    break_targets: Vec<Word>,
    continue_targets: Vec<Word>,
}

pub(crate) struct Writer<'m> {
    module: &'m Module,
    options: &'m Options,
    builder: Builder,
    glsl: Word,
    capabilities: HashSet<Capability>,
    extensions: HashSet<&'static str>,
    types: HashMap<Handle<Type>, Word>,
    host_shareable: HashSet<Handle<Type>>,
    blocks: HashSet<Word>,
    constants: HashMap<(Word, u32), Word>,
    composites: HashMap<(Word, Vec<Word>), Word>,
    nulls: HashMap<Word, Word>,
    globals: HashMap<Handle<GlobalVariable>, Word>,
    functions: HashMap<Handle<Function>, Word>,
    global_stages: HashMap<Handle<GlobalVariable>, ShaderStage>,
}

impl<'m> Writer<'m> {
    pub(crate) fn new(module: &'m Module, options: &'m Options) -> Self {
        let mut builder = Builder::new();
        let (major, minor) = options.version;
        builder.set_version(major, minor);
        builder.memory_model(AddressingModel::Logical, MemoryModel::GLSL450);
        let glsl = builder.ext_inst_import("GLSL.std.450");
        let mut writer = Self {
            module,
            options,
            builder,
            glsl,
            capabilities: HashSet::new(),
            extensions: HashSet::new(),
            types: HashMap::new(),
            host_shareable: host_shareable_types(module),
            blocks: HashSet::new(),
            constants: HashMap::new(),
            composites: HashMap::new(),
            nulls: HashMap::new(),
            globals: HashMap::new(),
            functions: HashMap::new(),
            global_stages: HashMap::new(),
        };
        writer.require(Capability::Shader);
        writer
    }

    /// Lowers the whole module and returns the assembled words.
    pub(crate) fn write(mut self) -> Result<Vec<u32>, Error> {
        let module = self.module;
        for (h, f) in module.entry_points() {
            let Some(stage) = f.stage() else { continue };
            for g in module.globals_used_by(h) {
                self.global_stages.insert(g, stage);
            }
        }
        let order = module.function_order();
        for &h in &order {
            let id = self.builder.id();
            self.functions.insert(h, id);
        }
        for (h, var) in module.global_variables.iter() {
            self.global(h, var)?;
        }
        for &h in &order {
            self.function(h, &module.functions[h])?;
        }
        for (h, f) in module.entry_points() {
            self.entry_point(h, f)?;
        }
        debug!(
            "SPIR-V: {} function(s), {} global(s), {} capabilities",
            order.len(),
            self.globals.len(),
            self.capabilities.len()
        );
        Ok(self.builder.module().assemble())
    }

    fn require(&mut self, capability: Capability) {
        if self.capabilities.insert(capability) {
            self.builder.capability(capability);
        }
    }

    fn extension(&mut self, name: &'static str) {
        if self.extensions.insert(name) {
            self.builder.extension(name);
        }
    }

    fn version_at_least(&self, major: u8, minor: u8) -> bool {
        self.options.version >= (major, minor)
    }

    fn storage_class(&mut self, space: AddressSpace) -> StorageClass {
        match space {
            AddressSpace::Function => StorageClass::Function,
            AddressSpace::Private => StorageClass::Private,
            AddressSpace::Workgroup => StorageClass::Workgroup,
            AddressSpace::Uniform => StorageClass::Uniform,
            AddressSpace::Storage => {
                if !self.version_at_least(1, 3) {
                    self.extension("SPV_KHR_storage_buffer_storage_class");
                }
                StorageClass::StorageBuffer
            }
            AddressSpace::Handle => StorageClass::UniformConstant,
            AddressSpace::PushConstant => StorageClass::PushConstant,
            AddressSpace::In => StorageClass::Input,
            AddressSpace::Out => StorageClass::Output,
        }
    }

    // Types.

    fn scalar(&mut self, scalar: Scalar) -> Word {
        match scalar.kind {
            ScalarKind::Bool => self.builder.type_bool(),
            ScalarKind::Sint => self.builder.type_int(32, 1),
            ScalarKind::Uint => self.builder.type_int(32, 0),
            ScalarKind::Float => {
                if scalar.width == 2 {
                    self.require(Capability::Float16);
                }
                self.builder.type_float(u32::from(scalar.width) * 8)
            }
        }
    }

    fn vector(&mut self, size: VectorSize, scalar: Scalar) -> Word {
        let component = self.scalar(scalar);
        self.builder.type_vector(component, size.count())
    }

    fn inner_type(&mut self, inner: &TypeInner) -> Result<Word, Error> {
        Ok(match *inner {
            TypeInner::Scalar(s) | TypeInner::Atomic(s) => self.scalar(s),
            TypeInner::Vector { size, scalar } => self.vector(size, scalar),
            TypeInner::Matrix {
                columns,
                rows,
                scalar,
            } => {
                let column = self.vector(rows, scalar);
                self.builder.type_matrix(column, columns.count())
            }
            TypeInner::Pointer { base, space, .. } => {
                let base = self.type_handle(base)?;
                let class = self.storage_class(space);
                self.builder.type_pointer(None, class, base)
            }
            TypeInner::ValuePointer {
                size,
                scalar,
                space,
                ..
            } => {
                let base = match size {
                    Some(size) => self.vector(size, scalar),
                    None => self.scalar(scalar),
                };
                let class = self.storage_class(space);
                self.builder.type_pointer(None, class, base)
            }
            TypeInner::Sampler { .. } => self.builder.type_sampler(),
            TypeInner::Texture { dim, class } => self.image_type(dim, class)?,
            TypeInner::Array { .. } | TypeInner::Struct { .. } => {
                return Err(ice("composite type without an interned handle"));
            }
        })
    }

    fn type_handle(&mut self, ty: Handle<Type>) -> Result<Word, Error> {
        if let Some(&id) = self.types.get(&ty) {
            return Ok(id);
        }
        let module = self.module;
        let decl = module
            .types
            .try_get(ty)
            .ok_or_else(|| ice(format!("type handle {} out of range", ty.index())))?;
        let host = self.host_shareable.contains(&ty);
        let id = match decl.inner {
            TypeInner::Array { base, size, stride } => {
                let element = self.type_handle(base)?;
                // Host-shareable arrays are kept apart so their stride
                // decoration does not leak onto private copies.
                let fresh = if host { Some(self.builder.id()) } else { None };
                let id = match size {
                    ArraySize::Constant(n) => {
                        let length = self.const_u32(n);
                        self.builder.type_array_id(fresh, element, length)
                    }
                    ArraySize::Runtime => self.builder.type_runtime_array_id(fresh, element),
                };
                if host {
                    self.builder
                        .decorate(id, Decoration::ArrayStride, [Operand::LiteralBit32(stride)]);
                }
                id
            }
            TypeInner::Struct { ref members, .. } => {
                let mut member_types = Vec::with_capacity(members.len());
                for m in members {
                    member_types.push(self.type_handle(m.ty)?);
                }
                let id = self.builder.id();
                self.builder.type_struct_id(Some(id), member_types);
                if let Some(name) = &decl.name {
                    self.builder.name(id, name.as_str());
                }
                for (i, m) in members.iter().enumerate() {
                    let index = i as u32;
                    self.builder.member_name(id, index, m.name.as_str());
                    if !host {
                        continue;
                    }
                    self.builder.member_decorate(
                        id,
                        index,
                        Decoration::Offset,
                        [Operand::LiteralBit32(m.offset)],
                    );
                    if let Some(stride) = matrix_stride(module, m.ty) {
                        self.builder
                            .member_decorate(id, index, Decoration::ColMajor, []);
                        self.builder.member_decorate(
                            id,
                            index,
                            Decoration::MatrixStride,
                            [Operand::LiteralBit32(stride)],
                        );
                    }
                }
                id
            }
            ref other => self.inner_type(other)?,
        };
        self.types.insert(ty, id);
        Ok(id)
    }

    fn resolution_type(&mut self, resolution: &TypeResolution) -> Result<Word, Error> {
        match resolution {
            TypeResolution::Handle(h) => self.type_handle(*h),
            TypeResolution::Value(inner) => self.inner_type(inner),
        }
    }

    fn image_type(&mut self, dim: TextureDimension, class: TextureClass) -> Result<Word, Error> {
        let storage = matches!(class, TextureClass::Storage { .. });
        let (spv_dim, arrayed) = match dim {
            TextureDimension::D1 => {
                self.require(if storage {
                    Capability::Image1D
                } else {
                    Capability::Sampled1D
                });
                (Dim::Dim1D, 0)
            }
            TextureDimension::D2 => (Dim::Dim2D, 0),
            TextureDimension::D2Array => (Dim::Dim2D, 1),
            TextureDimension::D3 => (Dim::Dim3D, 0),
            TextureDimension::Cube => (Dim::DimCube, 0),
            TextureDimension::CubeArray => {
                self.require(if storage {
                    Capability::ImageCubeArray
                } else {
                    Capability::SampledCubeArray
                });
                (Dim::DimCube, 1)
            }
        };
        let (sampled, format) = match class {
            TextureClass::Storage { format, access } => {
                if is_extended_format(format) {
                    self.require(Capability::StorageImageExtendedFormats);
                }
                if format == TexelFormat::Bgra8Unorm {
                    if access.contains(StorageAccess::LOAD) {
                        self.require(Capability::StorageImageReadWithoutFormat);
                    }
                    if access.contains(StorageAccess::STORE) {
                        self.require(Capability::StorageImageWriteWithoutFormat);
                    }
                }
                (2, image_format(format))
            }
            TextureClass::External => {
                return Err(ice("texture_external was not expanded into planes"));
            }
            _ => (1, ImageFormat::Unknown),
        };
        let sampled_type = self.scalar(class.texel_scalar());
        Ok(self.builder.type_image(
            sampled_type,
            spv_dim,
            u32::from(class.is_depth()),
            arrayed,
            u32::from(class.is_multisampled()),
            sampled,
            format,
            None,
        ))
    }

    // Constants.

    fn const_bits(&mut self, ty: Word, bits: u32) -> Word {
        if let Some(&id) = self.constants.get(&(ty, bits)) {
            return id;
        }
        let id = self.builder.constant_bit32(ty, bits);
        self.constants.insert((ty, bits), id);
        id
    }

    fn const_u32(&mut self, value: u32) -> Word {
        let ty = self.scalar(Scalar::U32);
        self.const_bits(ty, value)
    }

    fn literal(&mut self, lit: Literal) -> Word {
        let ty = self.scalar(lit.scalar());
        match lit {
            Literal::Bool(value) => {
                let key = (ty, u32::from(value));
                if let Some(&id) = self.constants.get(&key) {
                    return id;
                }
                let id = if value {
                    self.builder.constant_true(ty)
                } else {
                    self.builder.constant_false(ty)
                };
                self.constants.insert(key, id);
                id
            }
            Literal::I32(v) => self.const_bits(ty, v as u32),
            Literal::U32(v) => self.const_bits(ty, v),
            Literal::F32(v) => self.const_bits(ty, v.to_bits()),
            Literal::F16(v) => self.const_bits(ty, u32::from(f16_bits(v))),
        }
    }

    fn const_composite(&mut self, ty: Word, parts: Vec<Word>) -> Word {
        let key = (ty, parts);
        if let Some(&id) = self.composites.get(&key) {
            return id;
        }
        let id = self.builder.constant_composite(ty, key.1.iter().copied());
        self.composites.insert(key, id);
        id
    }

    fn null(&mut self, ty: Word) -> Word {
        if let Some(&id) = self.nulls.get(&ty) {
            return id;
        }
        let id = self.builder.constant_null(ty);
        self.nulls.insert(ty, id);
        id
    }

    /// `value` as a constant of the scalar or vector shape `inner`.
    fn const_like(&mut self, inner: &TypeInner, value: i64) -> Result<Word, Error> {
        let scalar = inner
            .scalar()
            .ok_or_else(|| ice("numeric constant of a non-numeric type"))?;
        let component = self.literal(Literal::from_i64(scalar, value));
        match *inner {
            TypeInner::Scalar(_) => Ok(component),
            TypeInner::Vector { size, scalar } => {
                let ty = self.vector(size, scalar);
                Ok(self.const_composite(ty, vec![component; size.count() as usize]))
            }
            _ => Err(ice("numeric constant of a non-numeric type")),
        }
    }

    /// Lowers `e` to a constant if it is built from literals only.
    fn try_const(&mut self, ctx: ResolveContext<'m>, e: &Expression) -> Result<Option<Word>, Error> {
        let module = self.module;
        Ok(match *e {
            Expression::Literal(lit) => Some(self.literal(lit)),
            Expression::ZeroValue(ty) => {
                let ty = self.type_handle(ty)?;
                Some(self.null(ty))
            }
            Expression::Unary {
                op: UnaryOp::Negate,
                ref expr,
            } => match **expr {
                Expression::Literal(lit) => negated(lit).map(|lit| self.literal(lit)),
                _ => None,
            },
            Expression::Splat { size, ref value } => {
                let Some(component) = self.try_const(ctx, value)? else {
                    return Ok(None);
                };
                let TypeInner::Scalar(scalar) = ctx.resolve_inner(value)? else {
                    return Ok(None);
                };
                let ty = self.vector(size, scalar);
                Some(self.const_composite(ty, vec![component; size.count() as usize]))
            }
            Expression::Compose { ty, ref components } => {
                if constituent_count(module, ty) != Some(components.len()) {
                    return Ok(None);
                }
                let mut parts = Vec::with_capacity(components.len());
                for c in components {
                    match self.try_const(ctx, c)? {
                        Some(id) => parts.push(id),
                        None => return Ok(None),
                    }
                }
                let ty = self.type_handle(ty)?;
                Some(self.const_composite(ty, parts))
            }
            _ => None,
        })
    }

    // Module-scope variables and entry points.

    fn global(&mut self, handle: Handle<GlobalVariable>, var: &'m GlobalVariable) -> Result<(), Error> {
        let module = self.module;
        let store_type = self.type_handle(var.ty)?;
        let class = self.storage_class(var.space);
        let pointer = self.builder.type_pointer(None, class, store_type);
        let init = match var.space {
            AddressSpace::Private => Some(match &var.init {
                Some(e) => self
                    .try_const(ResolveContext::module_scope(module), e)?
                    .ok_or_else(|| {
                        unsupported(format!(
                            "initializer of private variable '{}' is not a constant expression",
                            var.name
                        ))
                    })?,
                None => self.null(store_type),
            }),
            AddressSpace::Workgroup
                if self.options.use_zero_initialize_workgroup_memory_extension
                    && !self.options.common.disable_workgroup_init =>
            {
                self.extension("SPV_KHR_zero_initialize_workgroup_memory");
                Some(self.null(store_type))
            }
            _ => None,
        };
        let id = self.builder.variable(pointer, None, class, init);
        self.builder.name(id, var.name.as_str());
        if let Some(bp) = var.binding {
            self.builder
                .decorate(id, Decoration::DescriptorSet, [Operand::LiteralBit32(bp.group)]);
            self.builder
                .decorate(id, Decoration::Binding, [Operand::LiteralBit32(bp.binding)]);
        }
        if contains_f16(module, var.ty) {
            match var.space {
                space if space.is_host_shareable() => {
                    if !self.version_at_least(1, 3) {
                        self.extension("SPV_KHR_16bit_storage");
                    }
                    self.require(Capability::StorageBuffer16BitAccess);
                    self.require(Capability::UniformAndStorageBuffer16BitAccess);
                }
                AddressSpace::In | AddressSpace::Out => {
                    if !self.version_at_least(1, 3) {
                        self.extension("SPV_KHR_16bit_storage");
                    }
                    self.require(Capability::StorageInputOutput16);
                }
                _ => {}
            }
        }
        match var.space {
            AddressSpace::Storage => {
                if !var.access.contains(StorageAccess::STORE) {
                    self.builder.decorate(id, Decoration::NonWritable, []);
                }
                self.block_decoration(store_type);
            }
            AddressSpace::Uniform | AddressSpace::PushConstant => self.block_decoration(store_type),
            AddressSpace::Handle => {
                if let TypeInner::Texture {
                    class: TextureClass::Storage { access, .. },
                    ..
                } = module.types[var.ty].inner
                {
                    if !access.contains(StorageAccess::LOAD) {
                        self.builder.decorate(id, Decoration::NonReadable, []);
                    }
                    if !access.contains(StorageAccess::STORE) {
                        self.builder.decorate(id, Decoration::NonWritable, []);
                    }
                }
            }
            AddressSpace::In | AddressSpace::Out => {
                if let Some(io) = var.io {
                    self.io_decorations(handle, id, var.space, io);
                }
            }
            AddressSpace::Function | AddressSpace::Private | AddressSpace::Workgroup => {}
        }
        self.globals.insert(handle, id);
        Ok(())
    }

    fn block_decoration(&mut self, ty: Word) {
        if self.blocks.insert(ty) {
            self.builder.decorate(ty, Decoration::Block, []);
        }
    }

    fn io_decorations(
        &mut self,
        handle: Handle<GlobalVariable>,
        id: Word,
        space: AddressSpace,
        io: Binding,
    ) {
        let stage = self.global_stages.get(&handle).copied();
        match io {
            Binding::BuiltIn(builtin) => {
                let builtin = match builtin {
                    BuiltIn::Position { invariant } => {
                        if invariant {
                            self.builder.decorate(id, Decoration::Invariant, []);
                        }
                        if stage == Some(ShaderStage::Fragment) {
                            spirv::BuiltIn::FragCoord
                        } else {
                            spirv::BuiltIn::Position
                        }
                    }
                    BuiltIn::VertexIndex => spirv::BuiltIn::VertexIndex,
                    BuiltIn::InstanceIndex => spirv::BuiltIn::InstanceIndex,
                    BuiltIn::PointSize => spirv::BuiltIn::PointSize,
                    BuiltIn::FrontFacing => spirv::BuiltIn::FrontFacing,
                    BuiltIn::FragDepth => spirv::BuiltIn::FragDepth,
                    BuiltIn::SampleIndex => {
                        self.require(Capability::SampleRateShading);
                        spirv::BuiltIn::SampleId
                    }
                    BuiltIn::SampleMask => spirv::BuiltIn::SampleMask,
                    BuiltIn::LocalInvocationId => spirv::BuiltIn::LocalInvocationId,
                    BuiltIn::LocalInvocationIndex => spirv::BuiltIn::LocalInvocationIndex,
                    BuiltIn::GlobalInvocationId => spirv::BuiltIn::GlobalInvocationId,
                    BuiltIn::WorkgroupId => spirv::BuiltIn::WorkgroupId,
                    BuiltIn::NumWorkgroups => spirv::BuiltIn::NumWorkgroups,
                };
                self.builder
                    .decorate(id, Decoration::BuiltIn, [Operand::BuiltIn(builtin)]);
            }
            Binding::Location {
                location,
                interpolation,
                sampling,
                blend_src,
            } => {
                self.builder
                    .decorate(id, Decoration::Location, [Operand::LiteralBit32(location)]);
                if let Some(index) = blend_src {
                    self.builder
                        .decorate(id, Decoration::Index, [Operand::LiteralBit32(index)]);
                }
                // Interpolation only applies between the vertex and fragment
                // stages.
                let interpolated = matches!(
                    (stage, space),
                    (Some(ShaderStage::Vertex), AddressSpace::Out)
                        | (Some(ShaderStage::Fragment), AddressSpace::In)
                );
                if !interpolated {
                    return;
                }
                match interpolation {
                    Some(Interpolation::Flat) => self.builder.decorate(id, Decoration::Flat, []),
                    Some(Interpolation::Linear) => {
                        self.builder.decorate(id, Decoration::NoPerspective, [])
                    }
                    Some(Interpolation::Perspective) | None => {}
                }
                match sampling {
                    Some(Sampling::Centroid) => self.builder.decorate(id, Decoration::Centroid, []),
                    Some(Sampling::Sample) => {
                        self.require(Capability::SampleRateShading);
                        self.builder.decorate(id, Decoration::Sample, []);
                    }
                    Some(Sampling::Center) | None => {}
                }
            }
        }
    }

    fn entry_point(&mut self, handle: Handle<Function>, func: &'m Function) -> Result<(), Error> {
        let Some(ep) = &func.entry_point else {
            return Ok(());
        };
        if !func.arguments.is_empty() || func.result.is_some() {
            return Err(ice(format!(
                "entry point '{}' still has parameters or a result",
                func.name
            )));
        }
        let module = self.module;
        let id = self.function_id(handle)?;
        let used = module.globals_used_by(handle);
        // SPIR-V 1.4 lists every variable the entry point touches.
        let all = self.version_at_least(1, 4);
        let mut interface = Vec::new();
        for &g in &used {
            let space = module.global_variables[g].space;
            if all || matches!(space, AddressSpace::In | AddressSpace::Out) {
                let var = self
                    .globals
                    .get(&g)
                    .copied()
                    .ok_or_else(|| ice(format!("global {} was not declared", g.index())))?;
                interface.push(var);
            }
        }
        let model = match ep.stage {
            ShaderStage::Vertex => ExecutionModel::Vertex,
            ShaderStage::Fragment => ExecutionModel::Fragment,
            ShaderStage::Compute => ExecutionModel::GLCompute,
        };
        self.builder
            .entry_point(model, id, func.name.as_str(), interface);
        match ep.stage {
            ShaderStage::Fragment => {
                self.builder
                    .execution_mode(id, ExecutionMode::OriginUpperLeft, []);
                if ep.early_depth_test {
                    self.builder
                        .execution_mode(id, ExecutionMode::EarlyFragmentTests, []);
                }
                let writes_depth = used.iter().any(|&g| {
                    matches!(
                        module.global_variables[g].io,
                        Some(Binding::BuiltIn(BuiltIn::FragDepth))
                    )
                });
                if writes_depth {
                    self.builder
                        .execution_mode(id, ExecutionMode::DepthReplacing, []);
                }
            }
            ShaderStage::Compute => {
                let [x, y, z] = ep.literal_workgroup_size().ok_or_else(|| {
                    unsupported(format!(
                        "workgroup size of '{}' set by an override that was not substituted",
                        func.name
                    ))
                })?;
                self.builder
                    .execution_mode(id, ExecutionMode::LocalSize, [x, y, z]);
            }
            ShaderStage::Vertex => {}
        }
        Ok(())
    }

    // Functions and statements.

    fn function_id(&self, handle: Handle<Function>) -> Result<Word, Error> {
        self.functions
            .get(&handle)
            .copied()
            .ok_or_else(|| ice(format!("function {} has no id", handle.index())))
    }

    fn function(&mut self, handle: Handle<Function>, func: &'m Function) -> Result<(), Error> {
        trace!("lowering function '{}'", func.name);
        let id = self.function_id(handle)?;
        let return_type = match &func.result {
            Some(result) => self.type_handle(result.ty)?,
            None => self.builder.type_void(),
        };
        let mut param_types = Vec::with_capacity(func.arguments.len());
        for arg in &func.arguments {
            param_types.push(self.type_handle(arg.ty)?);
        }
        let fn_type = self.builder.type_function(return_type, param_types.clone());
        self.builder
            .begin_function(return_type, Some(id), FunctionControl::NONE, fn_type)?;
        self.builder.name(id, func.name.as_str());
        let mut arguments = Vec::with_capacity(param_types.len());
        for (arg, ty) in func.arguments.iter().zip(param_types) {
            let param = self.builder.function_parameter(ty)?;
            self.builder.name(param, arg.name.as_str());
            arguments.push(param);
        }

        let vars_block = self.builder.id();
        let body_block = self.builder.id();
        self.builder.begin_block(Some(vars_block))?;
        let mut locals = HashMap::new();
        for (h, local) in func.locals.iter() {
            if local.kind != LocalKind::Var {
                continue;
            }
            let ty = self.type_handle(local.ty)?;
            let pointer = self.builder.type_pointer(None, StorageClass::Function, ty);
            let var = self
                .builder
                .variable(pointer, None, StorageClass::Function, None);
            self.builder.name(var, local.name.as_str());
            locals.insert(h, var);
        }
        // The variables block stays open until the body is done.
        self.builder.select_block(None)?;
        self.builder.begin_block(Some(body_block))?;

        let mut st = FnState {
            function: func,
            arguments,
            locals,
            vars_block,
            break_targets: Vec::new(),
            continue_targets: Vec::new(),
        };
        self.block(&mut st, &func.body)?;
        if self.builder.selected_block().is_some() {
            if func.result.is_some() {
                self.builder.unreachable()?;
            } else {
                self.builder.ret()?;
            }
        }
        let vars = self.block_index(vars_block)?;
        self.builder.select_block(Some(vars))?;
        self.builder.branch(body_block)?;
        self.builder.end_function()?;
        Ok(())
    }

    fn block_index(&self, label: Word) -> Result<usize, Error> {
        let function = self
            .builder
            .module_ref()
            .functions
            .last()
            .ok_or_else(|| ice("no function is being built"))?;
        function
            .blocks
            .iter()
            .position(|b| b.label.as_ref().map(|l| l.result_id) == Some(Some(label)))
            .ok_or_else(|| ice(format!("block %{label} not found")))
    }

    /// A fresh function-scope variable of type `ty`.
    fn temporary(&mut self, st: &FnState<'m>, ty: Word) -> Result<Word, Error> {
        let pointer = self.builder.type_pointer(None, StorageClass::Function, ty);
        let current = self.builder.selected_block();
        let vars = self.block_index(st.vars_block)?;
        self.builder.select_block(Some(vars))?;
        let var = self
            .builder
            .variable(pointer, None, StorageClass::Function, None);
        self.builder.select_block(current)?;
        Ok(var)
    }

    fn is_open(&self) -> bool {
        self.builder.selected_block().is_some()
    }

    fn block(&mut self, st: &mut FnState<'m>, block: &'m [Statement]) -> Result<(), Error> {
        for stmt in block {
            if !self.is_open() {
                break;
            }
            self.statement(st, stmt)?;
        }
        Ok(())
    }

    /// Lowers `body` into a new block labelled `label` that falls through
    /// to `next`.
    fn branch_block(
        &mut self,
        st: &mut FnState<'m>,
        label: Word,
        body: &'m [Statement],
        next: Word,
    ) -> Result<(), Error> {
        self.builder.begin_block(Some(label))?;
        self.block(st, body)?;
        if self.is_open() {
            self.builder.branch(next)?;
        }
        Ok(())
    }

    fn statement(&mut self, st: &mut FnState<'m>, stmt: &'m Statement) -> Result<(), Error> {
        match *stmt {
            Statement::Declare { local, ref init } => {
                let decl = st.function.locals.try_get(local).ok_or_else(|| {
                    ice(format!("local {} out of range", local.index()))
                })?;
                match decl.kind {
                    LocalKind::Let => {
                        let init = init
                            .as_ref()
                            .ok_or_else(|| ice(format!("let '{}' has no value", decl.name)))?;
                        let value = self.expr(st, init)?;
                        st.locals.insert(local, value);
                    }
                    LocalKind::Var => {
                        let var = st.locals.get(&local).copied().ok_or_else(|| {
                            ice(format!("var '{}' has no variable", decl.name))
                        })?;
                        let value = match init {
                            Some(e) => self.expr(st, e)?,
                            None => {
                                let ty = self.type_handle(decl.ty)?;
                                self.null(ty)
                            }
                        };
                        self.builder.store(var, value, None, [])?;
                    }
                }
            }
            Statement::Store {
                ref pointer,
                ref value,
            } => {
                let pointer = self.expr(st, pointer)?;
                let value = self.expr(st, value)?;
                self.builder.store(pointer, value, None, [])?;
            }
            Statement::Call(ref e) => match *e {
                Expression::Builtin {
                    fun: BuiltinFn::AtomicStore,
                    ref arguments,
                } => self.atomic_store(st, arguments)?,
                Expression::Texture(ref call) if call.fun == TextureFn::Store => {
                    self.texture_store(st, call)?
                }
                _ => {
                    self.expr(st, e)?;
                }
            },
            Statement::If {
                ref condition,
                ref accept,
                ref reject,
            } => {
                let condition = self.expr(st, condition)?;
                let merge = self.builder.id();
                let accept_label = self.builder.id();
                let reject_label = if reject.is_empty() {
                    merge
                } else {
                    self.builder.id()
                };
                self.builder
                    .selection_merge(merge, SelectionControl::NONE)?;
                self.builder
                    .branch_conditional(condition, accept_label, reject_label, [])?;
                self.branch_block(st, accept_label, accept, merge)?;
                if !reject.is_empty() {
                    self.branch_block(st, reject_label, reject, merge)?;
                }
                self.builder.begin_block(Some(merge))?;
            }
            Statement::Loop {
                ref body,
                ref continuing,
                ref break_if,
            } => {
                let header = self.builder.id();
                let body_label = self.builder.id();
                let continuing_label = self.builder.id();
                let merge = self.builder.id();
                self.builder.branch(header)?;
                self.builder.begin_block(Some(header))?;
                self.builder
                    .loop_merge(merge, continuing_label, LoopControl::NONE, [])?;
                self.builder.branch(body_label)?;

                st.break_targets.push(merge);
                st.continue_targets.push(continuing_label);
                self.branch_block(st, body_label, body, continuing_label)?;
                st.break_targets.pop();
                st.continue_targets.pop();

                self.builder.begin_block(Some(continuing_label))?;
                self.block(st, continuing)?;
                if self.is_open() {
                    match break_if {
                        Some(condition) => {
                            let condition = self.expr(st, condition)?;
                            self.builder
                                .branch_conditional(condition, merge, header, [])?;
                        }
                        None => self.builder.branch(header)?,
                    }
                }
                self.builder.begin_block(Some(merge))?;
            }
            Statement::Switch {
                ref selector,
                ref cases,
            } => self.switch(st, selector, cases)?,
            Statement::Break => {
                let target = st
                    .break_targets
                    .last()
                    .copied()
                    .ok_or_else(|| ice("break outside of a loop or switch"))?;
                self.builder.branch(target)?;
            }
            Statement::Continue => {
                let target = st
                    .continue_targets
                    .last()
                    .copied()
                    .ok_or_else(|| ice("continue outside of a loop"))?;
                self.builder.branch(target)?;
            }
            Statement::Return { ref value } => match value {
                Some(value) => {
                    let value = self.expr(st, value)?;
                    self.builder.ret_value(value)?;
                }
                None => self.builder.ret()?,
            },
            Statement::Discard => self.builder.kill()?,
            Statement::Barrier(barrier) => self.barrier(barrier)?,
            Statement::Block(ref block) => self.block(st, block)?,
        }
        Ok(())
    }

    fn switch(
        &mut self,
        st: &mut FnState<'m>,
        selector: &'m Expression,
        cases: &'m [SwitchCase],
    ) -> Result<(), Error> {
        let selector = self.expr(st, selector)?;
        let merge = self.builder.id();
        let labels: Vec<Word> = cases.iter().map(|_| self.builder.id()).collect();
        let mut default = merge;
        let mut targets = Vec::new();
        for (case, &label) in cases.iter().zip(&labels) {
            for selector in &case.selectors {
                match *selector {
                    CaseSelector::I32(v) => targets.push((Operand::LiteralBit32(v as u32), label)),
                    CaseSelector::U32(v) => targets.push((Operand::LiteralBit32(v), label)),
                    CaseSelector::Default => default = label,
                }
            }
        }
        self.builder
            .selection_merge(merge, SelectionControl::NONE)?;
        self.builder.switch(selector, default, targets)?;
        st.break_targets.push(merge);
        for (case, &label) in cases.iter().zip(&labels) {
            self.branch_block(st, label, &case.body, merge)?;
        }
        st.break_targets.pop();
        self.builder.begin_block(Some(merge))?;
        Ok(())
    }

    fn barrier(&mut self, barrier: Barrier) -> Result<(), Error> {
        let mut semantics = MemorySemantics::ACQUIRE_RELEASE;
        if barrier.contains(Barrier::WORKGROUP) {
            semantics |= MemorySemantics::WORKGROUP_MEMORY;
        }
        if barrier.contains(Barrier::STORAGE) {
            semantics |= MemorySemantics::UNIFORM_MEMORY;
        }
        if barrier.contains(Barrier::TEXTURE) {
            semantics |= MemorySemantics::IMAGE_MEMORY;
        }
        let scope = self.const_u32(Scope::Workgroup as u32);
        let semantics = self.const_u32(semantics.bits());
        self.builder.control_barrier(scope, scope, semantics)?;
        Ok(())
    }

    // Expressions.

    fn resolve(&self, st: &FnState<'m>, e: &Expression) -> Result<TypeResolution, Error> {
        Ok(ResolveContext::new(self.module, st.function).resolve(e)?)
    }

    fn resolve_inner(&self, st: &FnState<'m>, e: &Expression) -> Result<TypeInner, Error> {
        Ok(ResolveContext::new(self.module, st.function).resolve_inner(e)?)
    }

    fn result_type(&mut self, st: &FnState<'m>, e: &Expression) -> Result<Word, Error> {
        let resolution = self.resolve(st, e)?;
        self.resolution_type(&resolution)
    }

    fn exprs(&mut self, st: &mut FnState<'m>, exprs: &[Expression]) -> Result<Vec<Word>, Error> {
        exprs.iter().map(|e| self.expr(st, e)).collect()
    }

    fn opt_expr(
        &mut self,
        st: &mut FnState<'m>,
        e: &Option<Expression>,
    ) -> Result<Option<Word>, Error> {
        e.as_ref().map(|e| self.expr(st, e)).transpose()
    }

    fn splat(&mut self, value: Word, size: VectorSize, scalar: Scalar) -> Result<Word, Error> {
        let ty = self.vector(size, scalar);
        Ok(self
            .builder
            .composite_construct(ty, None, vec![value; size.count() as usize])?)
    }

    /// Evaluates `e`. Reference expressions yield pointers.
    fn expr(&mut self, st: &mut FnState<'m>, e: &Expression) -> Result<Word, Error> {
        let module = self.module;
        match *e {
            Expression::Literal(lit) => Ok(self.literal(lit)),
            Expression::ZeroValue(ty) => {
                let ty = self.type_handle(ty)?;
                Ok(self.null(ty))
            }
            Expression::Compose { ty, ref components } => {
                let ctx = ResolveContext::new(module, st.function);
                if let Some(id) = self.try_const(ctx, e)? {
                    return Ok(id);
                }
                let ty = self.type_handle(ty)?;
                let parts = self.exprs(st, components)?;
                Ok(self.builder.composite_construct(ty, None, parts)?)
            }
            Expression::Splat { size, ref value } => {
                let ctx = ResolveContext::new(module, st.function);
                if let Some(id) = self.try_const(ctx, e)? {
                    return Ok(id);
                }
                let scalar = self
                    .resolve_inner(st, value)?
                    .scalar()
                    .ok_or_else(|| ice("splat of a non-scalar"))?;
                let value = self.expr(st, value)?;
                self.splat(value, size, scalar)
            }
            Expression::Swizzle {
                ref vector,
                ref pattern,
            } => {
                let ty = self.result_type(st, e)?;
                let vector = self.expr(st, vector)?;
                Ok(self.builder.vector_shuffle(
                    ty,
                    None,
                    vector,
                    vector,
                    pattern.iter().map(|&c| c as u32),
                )?)
            }
            Expression::FunctionArgument(i) => st
                .arguments
                .get(i as usize)
                .copied()
                .ok_or_else(|| ice(format!("argument {i} out of range"))),
            Expression::GlobalVariable(h) => {
                let id = self
                    .globals
                    .get(&h)
                    .copied()
                    .ok_or_else(|| ice(format!("global {} was not declared", h.index())))?;
                let var = &module.global_variables[h];
                if var.space == AddressSpace::Handle {
                    let ty = self.type_handle(var.ty)?;
                    Ok(self.builder.load(ty, None, id, None, [])?)
                } else {
                    Ok(id)
                }
            }
            Expression::LocalVariable(h) => st.locals.get(&h).copied().ok_or_else(|| {
                ice(format!("local {} used before its declaration", h.index()))
            }),
            Expression::Override(_) => Err(unsupported(
                "override expressions must be substituted before SPIR-V generation",
            )),
            Expression::Load { ref pointer } => {
                let ty = self.result_type(st, e)?;
                let pointer = self.expr(st, pointer)?;
                Ok(self.builder.load(ty, None, pointer, None, [])?)
            }
            Expression::Access {
                ref base,
                ref index,
            } => self.access(st, e, base, index),
            Expression::AccessIndex { ref base, index } => {
                let ty = self.result_type(st, e)?;
                let base_is_pointer = self.resolve_inner(st, base)?.is_pointer();
                let base = self.expr(st, base)?;
                if base_is_pointer {
                    let index = self.const_u32(index);
                    Ok(self.builder.access_chain(ty, None, base, [index])?)
                } else {
                    Ok(self.builder.composite_extract(ty, None, base, [index])?)
                }
            }
            Expression::Unary { op, ref expr } => {
                let ty = self.result_type(st, e)?;
                let kind = self.resolve_inner(st, expr)?.scalar_kind();
                let value = self.expr(st, expr)?;
                Ok(match op {
                    UnaryOp::Negate if kind == Some(ScalarKind::Float) => {
                        self.builder.f_negate(ty, None, value)?
                    }
                    UnaryOp::Negate => self.builder.s_negate(ty, None, value)?,
                    UnaryOp::LogicalNot => self.builder.logical_not(ty, None, value)?,
                    UnaryOp::BitwiseNot => self.builder.not(ty, None, value)?,
                })
            }
            Expression::Binary {
                op,
                ref left,
                ref right,
            } => self.binary(st, e, op, left, right),
            Expression::Convert { ref expr, ty } => self.convert(st, expr, ty),
            Expression::Bitcast { ref expr, ty } => {
                let ty = self.type_handle(ty)?;
                let value = self.expr(st, expr)?;
                Ok(self.builder.bitcast(ty, None, value)?)
            }
            Expression::Call {
                function,
                ref arguments,
            } => {
                let callee = module
                    .functions
                    .try_get(function)
                    .ok_or_else(|| ice(format!("function {} out of range", function.index())))?;
                let return_type = match &callee.result {
                    Some(result) => self.type_handle(result.ty)?,
                    None => self.builder.type_void(),
                };
                let id = self.function_id(function)?;
                let arguments = self.exprs(st, arguments)?;
                Ok(self
                    .builder
                    .function_call(return_type, None, id, arguments)?)
            }
            Expression::Builtin { fun, ref arguments } => self.builtin(st, e, fun, arguments),
            Expression::Texture(ref call) => self.texture(st, call),
        }
    }

    fn access(
        &mut self,
        st: &mut FnState<'m>,
        e: &Expression,
        base: &Expression,
        index: &Expression,
    ) -> Result<Word, Error> {
        let ty = self.result_type(st, e)?;
        let base_resolution = self.resolve(st, base)?;
        let base_inner = base_resolution.inner(&self.module.types).clone();
        let base_id = self.expr(st, base)?;
        let index = self.expr(st, index)?;
        if base_inner.is_pointer() {
            return Ok(self.builder.access_chain(ty, None, base_id, [index])?);
        }
        if let TypeInner::Vector { .. } = base_inner {
            return Ok(self
                .builder
                .vector_extract_dynamic(ty, None, base_id, index)?);
        }
        // Arrays and matrices held by value are indexed through memory.
        let value_type = self.resolution_type(&base_resolution)?;
        let var = self.temporary(st, value_type)?;
        self.builder.store(var, base_id, None, [])?;
        let pointer = self.builder.type_pointer(None, StorageClass::Function, ty);
        let element = self.builder.access_chain(pointer, None, var, [index])?;
        Ok(self.builder.load(ty, None, element, None, [])?)
    }

    fn binary(
        &mut self,
        st: &mut FnState<'m>,
        e: &Expression,
        op: BinaryOp,
        left: &Expression,
        right: &Expression,
    ) -> Result<Word, Error> {
        let ty = self.result_type(st, e)?;
        let lt = self.resolve_inner(st, left)?;
        let rt = self.resolve_inner(st, right)?;
        let mut l = self.expr(st, left)?;
        let mut r = self.expr(st, right)?;
        let kind = lt
            .scalar_kind()
            .ok_or_else(|| ice("binary operator on a non-numeric operand"))?;
        let float = kind == ScalarKind::Float;

        match (op, &lt, &rt) {
            (BinaryOp::Multiply, TypeInner::Matrix { .. }, TypeInner::Vector { .. }) => {
                return Ok(self.builder.matrix_times_vector(ty, None, l, r)?);
            }
            (BinaryOp::Multiply, TypeInner::Vector { .. }, TypeInner::Matrix { .. }) => {
                return Ok(self.builder.vector_times_matrix(ty, None, l, r)?);
            }
            (BinaryOp::Multiply, TypeInner::Matrix { .. }, TypeInner::Matrix { .. }) => {
                return Ok(self.builder.matrix_times_matrix(ty, None, l, r)?);
            }
            (BinaryOp::Multiply, TypeInner::Matrix { .. }, TypeInner::Scalar(_)) => {
                return Ok(self.builder.matrix_times_scalar(ty, None, l, r)?);
            }
            (BinaryOp::Multiply, TypeInner::Scalar(_), TypeInner::Matrix { .. }) => {
                return Ok(self.builder.matrix_times_scalar(ty, None, r, l)?);
            }
            (BinaryOp::Multiply, TypeInner::Vector { .. }, TypeInner::Scalar(_)) if float => {
                return Ok(self.builder.vector_times_scalar(ty, None, l, r)?);
            }
            (BinaryOp::Multiply, TypeInner::Scalar(_), TypeInner::Vector { .. }) if float => {
                return Ok(self.builder.vector_times_scalar(ty, None, r, l)?);
            }
            (
                BinaryOp::Add | BinaryOp::Subtract,
                &TypeInner::Matrix {
                    columns,
                    rows,
                    scalar,
                },
                TypeInner::Matrix { .. },
            ) => {
                let column_type = self.vector(rows, scalar);
                let mut result = Vec::with_capacity(columns.count() as usize);
                for i in 0..columns.count() {
                    let a = self.builder.composite_extract(column_type, None, l, [i])?;
                    let b = self.builder.composite_extract(column_type, None, r, [i])?;
                    result.push(if op == BinaryOp::Add {
                        self.builder.f_add(column_type, None, a, b)?
                    } else {
                        self.builder.f_sub(column_type, None, a, b)?
                    });
                }
                return Ok(self.builder.composite_construct(ty, None, result)?);
            }
            _ => {}
        }

        // Mixed scalar and vector operands.
        match (&lt, &rt) {
            (&TypeInner::Vector { size, .. }, &TypeInner::Scalar(scalar)) => {
                r = self.splat(r, size, scalar)?;
            }
            (&TypeInner::Scalar(scalar), &TypeInner::Vector { size, .. }) => {
                l = self.splat(l, size, scalar)?;
            }
            _ => {}
        }

        let b = &mut self.builder;
        use ScalarKind as K;
        Ok(match op {
            BinaryOp::Add if float => b.f_add(ty, None, l, r)?,
            BinaryOp::Add => b.i_add(ty, None, l, r)?,
            BinaryOp::Subtract if float => b.f_sub(ty, None, l, r)?,
            BinaryOp::Subtract => b.i_sub(ty, None, l, r)?,
            BinaryOp::Multiply if float => b.f_mul(ty, None, l, r)?,
            BinaryOp::Multiply => b.i_mul(ty, None, l, r)?,
            BinaryOp::Divide => match kind {
                K::Float => b.f_div(ty, None, l, r)?,
                K::Sint => b.s_div(ty, None, l, r)?,
                _ => b.u_div(ty, None, l, r)?,
            },
            BinaryOp::Modulo => match kind {
                K::Float => b.f_rem(ty, None, l, r)?,
                K::Sint => b.s_rem(ty, None, l, r)?,
                _ => b.u_mod(ty, None, l, r)?,
            },
            BinaryOp::Equal => match kind {
                K::Bool => b.logical_equal(ty, None, l, r)?,
                K::Float => b.f_ord_equal(ty, None, l, r)?,
                _ => b.i_equal(ty, None, l, r)?,
            },
            BinaryOp::NotEqual => match kind {
                K::Bool => b.logical_not_equal(ty, None, l, r)?,
                K::Float => b.f_unord_not_equal(ty, None, l, r)?,
                _ => b.i_not_equal(ty, None, l, r)?,
            },
            BinaryOp::Less => match kind {
                K::Float => b.f_ord_less_than(ty, None, l, r)?,
                K::Sint => b.s_less_than(ty, None, l, r)?,
                _ => b.u_less_than(ty, None, l, r)?,
            },
            BinaryOp::LessEqual => match kind {
                K::Float => b.f_ord_less_than_equal(ty, None, l, r)?,
                K::Sint => b.s_less_than_equal(ty, None, l, r)?,
                _ => b.u_less_than_equal(ty, None, l, r)?,
            },
            BinaryOp::Greater => match kind {
                K::Float => b.f_ord_greater_than(ty, None, l, r)?,
                K::Sint => b.s_greater_than(ty, None, l, r)?,
                _ => b.u_greater_than(ty, None, l, r)?,
            },
            BinaryOp::GreaterEqual => match kind {
                K::Float => b.f_ord_greater_than_equal(ty, None, l, r)?,
                K::Sint => b.s_greater_than_equal(ty, None, l, r)?,
                _ => b.u_greater_than_equal(ty, None, l, r)?,
            },
            BinaryOp::LogicalAnd => b.logical_and(ty, None, l, r)?,
            BinaryOp::LogicalOr => b.logical_or(ty, None, l, r)?,
            BinaryOp::BitwiseAnd if kind == K::Bool => b.logical_and(ty, None, l, r)?,
            BinaryOp::BitwiseAnd => b.bitwise_and(ty, None, l, r)?,
            BinaryOp::BitwiseOr if kind == K::Bool => b.logical_or(ty, None, l, r)?,
            BinaryOp::BitwiseOr => b.bitwise_or(ty, None, l, r)?,
            BinaryOp::BitwiseXor if kind == K::Bool => b.logical_not_equal(ty, None, l, r)?,
            BinaryOp::BitwiseXor => b.bitwise_xor(ty, None, l, r)?,
            BinaryOp::ShiftLeft => b.shift_left_logical(ty, None, l, r)?,
            BinaryOp::ShiftRight if kind == K::Sint => b.shift_right_arithmetic(ty, None, l, r)?,
            BinaryOp::ShiftRight => b.shift_right_logical(ty, None, l, r)?,
        })
    }

    fn convert(
        &mut self,
        st: &mut FnState<'m>,
        expr: &Expression,
        ty: Handle<Type>,
    ) -> Result<Word, Error> {
        let module = self.module;
        let src = self.resolve_inner(st, expr)?;
        let dst = module
            .types
            .try_get(ty)
            .map(|t| t.inner.clone())
            .ok_or_else(|| ice(format!("type handle {} out of range", ty.index())))?;
        let target = self.type_handle(ty)?;
        let value = self.expr(st, expr)?;
        let (Some(from), Some(to)) = (src.scalar(), dst.scalar()) else {
            return Err(ice("conversion between non-numeric types"));
        };
        if from == to {
            return Ok(value);
        }
        if let TypeInner::Matrix { columns, rows, .. } = dst {
            // OpFConvert takes vectors; matrices go a column at a time.
            let src_column = self.vector(rows, from);
            let dst_column = self.vector(rows, to);
            let mut result = Vec::with_capacity(columns.count() as usize);
            for i in 0..columns.count() {
                let column = self.builder.composite_extract(src_column, None, value, [i])?;
                result.push(self.builder.f_convert(dst_column, None, column)?);
            }
            return Ok(self.builder.composite_construct(target, None, result)?);
        }
        use ScalarKind as K;
        Ok(match (from.kind, to.kind) {
            (K::Float, K::Float) => self.builder.f_convert(target, None, value)?,
            (K::Float, K::Sint) => self.builder.convert_f_to_s(target, None, value)?,
            (K::Float, K::Uint) => self.builder.convert_f_to_u(target, None, value)?,
            (K::Sint, K::Float) => self.builder.convert_s_to_f(target, None, value)?,
            (K::Uint, K::Float) => self.builder.convert_u_to_f(target, None, value)?,
            (K::Sint, K::Uint) | (K::Uint, K::Sint) => self.builder.bitcast(target, None, value)?,
            (K::Bool, _) => {
                let one = self.const_like(&dst, 1)?;
                let zero = self.const_like(&dst, 0)?;
                self.builder.select(target, None, value, one, zero)?
            }
            (K::Float, K::Bool) => {
                let zero = self.const_like(&src, 0)?;
                self.builder.f_unord_not_equal(target, None, value, zero)?
            }
            (_, K::Bool) => {
                let zero = self.const_like(&src, 0)?;
                self.builder.i_not_equal(target, None, value, zero)?
            }
            _ => return Err(ice(format!("conversion from {from:?} to {to:?}"))),
        })
    }

    fn integer_dot(
        &mut self,
        ty: Word,
        size: VectorSize,
        a: Word,
        b: Word,
    ) -> Result<Word, Error> {
        let mut sum = None;
        for i in 0..size.count() {
            let x = self.builder.composite_extract(ty, None, a, [i])?;
            let y = self.builder.composite_extract(ty, None, b, [i])?;
            let product = self.builder.i_mul(ty, None, x, y)?;
            sum = Some(match sum {
                Some(s) => self.builder.i_add(ty, None, s, product)?,
                None => product,
            });
        }
        sum.ok_or_else(|| ice("dot product of an empty vector"))
    }

    fn builtin(
        &mut self,
        st: &mut FnState<'m>,
        e: &Expression,
        fun: BuiltinFn,
        args: &[Expression],
    ) -> Result<Word, Error> {
        if fun.is_atomic() {
            return self.atomic(st, e, fun, args);
        }
        if fun == BuiltinFn::ArrayLength {
            return self.array_length(st, args);
        }
        let ty = self.result_type(st, e)?;
        let mut arg_types = Vec::with_capacity(args.len());
        for a in args {
            arg_types.push(self.resolve_inner(st, a)?);
        }
        let mut values = self.exprs(st, args)?;
        let first = arg_types
            .first()
            .cloned()
            .ok_or_else(|| ice(format!("{} without arguments", fun.wgsl_name())))?;
        let kind = first.scalar_kind();
        macro_rules! arg {
            ($i:expr) => {
                nth(&values, $i, fun)?
            };
        }

        use BuiltinFn as B;
        let by_kind = |float: GLOp, sint: GLOp, uint: GLOp| match kind {
            Some(ScalarKind::Float) => float,
            Some(ScalarKind::Sint) => sint,
            _ => uint,
        };
        let op = match fun {
            B::Abs => match kind {
                Some(ScalarKind::Float) => GLOp::FAbs,
                Some(ScalarKind::Sint) => GLOp::SAbs,
                _ => return Ok(arg!(0)),
            },
            B::Acos => GLOp::Acos,
            B::Acosh => GLOp::Acosh,
            B::Asin => GLOp::Asin,
            B::Asinh => GLOp::Asinh,
            B::Atan => GLOp::Atan,
            B::Atan2 => GLOp::Atan2,
            B::Atanh => GLOp::Atanh,
            B::Ceil => GLOp::Ceil,
            B::Clamp => by_kind(GLOp::FClamp, GLOp::SClamp, GLOp::UClamp),
            B::Cos => GLOp::Cos,
            B::Cosh => GLOp::Cosh,
            B::Cross => GLOp::Cross,
            B::Degrees => GLOp::Degrees,
            B::Determinant => GLOp::Determinant,
            B::Distance => GLOp::Distance,
            B::Exp => GLOp::Exp,
            B::Exp2 => GLOp::Exp2,
            B::FaceForward => GLOp::FaceForward,
            B::FirstLeadingBit => by_kind(GLOp::FindUMsb, GLOp::FindSMsb, GLOp::FindUMsb),
            B::FirstTrailingBit => GLOp::FindILsb,
            B::Floor => GLOp::Floor,
            B::Fma => GLOp::Fma,
            B::Fract => GLOp::Fract,
            B::Frexp => GLOp::FrexpStruct,
            B::InverseSqrt => GLOp::InverseSqrt,
            B::Ldexp => GLOp::Ldexp,
            B::Length => GLOp::Length,
            B::Log => GLOp::Log,
            B::Log2 => GLOp::Log2,
            B::Max => by_kind(GLOp::FMax, GLOp::SMax, GLOp::UMax),
            B::Min => by_kind(GLOp::FMin, GLOp::SMin, GLOp::UMin),
            B::Mix => {
                if let (TypeInner::Vector { size, scalar }, Some(TypeInner::Scalar(_))) =
                    (&first, arg_types.get(2))
                {
                    let t = self.splat(arg!(2), *size, *scalar)?;
                    values[2] = t;
                }
                GLOp::FMix
            }
            B::Modf => GLOp::ModfStruct,
            B::Normalize => GLOp::Normalize,
            B::Pack2x16Float => GLOp::PackHalf2x16,
            B::Pack2x16Snorm => GLOp::PackSnorm2x16,
            B::Pack2x16Unorm => GLOp::PackUnorm2x16,
            B::Pack4x8Snorm => GLOp::PackSnorm4x8,
            B::Pack4x8Unorm => GLOp::PackUnorm4x8,
            B::Pow => GLOp::Pow,
            B::Radians => GLOp::Radians,
            B::Reflect => GLOp::Reflect,
            B::Refract => GLOp::Refract,
            B::Round => GLOp::RoundEven,
            B::Saturate => {
                let zero = self.const_like(&first, 0)?;
                let one = self.const_like(&first, 1)?;
                values.extend([zero, one]);
                GLOp::FClamp
            }
            B::Sign => by_kind(GLOp::FSign, GLOp::SSign, GLOp::SSign),
            B::Sin => GLOp::Sin,
            B::Sinh => GLOp::Sinh,
            B::SmoothStep => GLOp::SmoothStep,
            B::Sqrt => GLOp::Sqrt,
            B::Step => GLOp::Step,
            B::Tan => GLOp::Tan,
            B::Tanh => GLOp::Tanh,
            B::Trunc => GLOp::Trunc,
            B::Unpack2x16Float => GLOp::UnpackHalf2x16,
            B::Unpack2x16Snorm => GLOp::UnpackSnorm2x16,
            B::Unpack2x16Unorm => GLOp::UnpackUnorm2x16,
            B::Unpack4x8Snorm => GLOp::UnpackSnorm4x8,
            B::Unpack4x8Unorm => GLOp::UnpackUnorm4x8,

            B::All | B::Any => {
                if !matches!(first, TypeInner::Vector { .. }) {
                    return Ok(arg!(0));
                }
                return Ok(if fun == B::All {
                    self.builder.all(ty, None, arg!(0))?
                } else {
                    self.builder.any(ty, None, arg!(0))?
                });
            }
            B::CountOneBits => return Ok(self.builder.bit_count(ty, None, arg!(0))?),
            B::ReverseBits => return Ok(self.builder.bit_reverse(ty, None, arg!(0))?),
            B::Dot => {
                return match first {
                    TypeInner::Vector { size, .. } if kind != Some(ScalarKind::Float) => {
                        self.integer_dot(ty, size, arg!(0), arg!(1))
                    }
                    _ => Ok(self.builder.dot(ty, None, arg!(0), arg!(1))?),
                };
            }
            B::Dpdx => return Ok(self.builder.d_pdx(ty, None, arg!(0))?),
            B::Dpdy => return Ok(self.builder.d_pdy(ty, None, arg!(0))?),
            B::Fwidth => return Ok(self.builder.fwidth(ty, None, arg!(0))?),
            B::DpdxCoarse
            | B::DpdxFine
            | B::DpdyCoarse
            | B::DpdyFine
            | B::FwidthCoarse
            | B::FwidthFine => {
                self.require(Capability::DerivativeControl);
                let p = arg!(0);
                let b = &mut self.builder;
                return Ok(match fun {
                    B::DpdxCoarse => b.d_pdx_coarse(ty, None, p)?,
                    B::DpdxFine => b.d_pdx_fine(ty, None, p)?,
                    B::DpdyCoarse => b.d_pdy_coarse(ty, None, p)?,
                    B::DpdyFine => b.d_pdy_fine(ty, None, p)?,
                    B::FwidthCoarse => b.fwidth_coarse(ty, None, p)?,
                    _ => b.fwidth_fine(ty, None, p)?,
                });
            }
            B::ExtractBits => {
                let (e, offset, count) = (arg!(0), arg!(1), arg!(2));
                return Ok(if kind == Some(ScalarKind::Sint) {
                    self.builder
                        .bit_field_s_extract(ty, None, e, offset, count)?
                } else {
                    self.builder
                        .bit_field_u_extract(ty, None, e, offset, count)?
                });
            }
            B::InsertBits => {
                let (e, newbits, offset, count) = (arg!(0), arg!(1), arg!(2), arg!(3));
                return Ok(self
                    .builder
                    .bit_field_insert(ty, None, e, newbits, offset, count)?);
            }
            B::QuantizeToF16 => return Ok(self.builder.quantize_to_f16(ty, None, arg!(0))?),
            B::Select => {
                let mut condition = arg!(2);
                if let (TypeInner::Vector { size, .. }, Some(TypeInner::Scalar(_))) =
                    (&first, arg_types.get(2))
                {
                    condition = self.splat(condition, *size, Scalar::BOOL)?;
                }
                return Ok(self.builder.select(ty, None, condition, arg!(1), arg!(0))?);
            }
            B::Transpose => return Ok(self.builder.transpose(ty, None, arg!(0))?),

            B::CountLeadingZeros
            | B::CountTrailingZeros
            | B::Dot4I8Packed
            | B::Dot4U8Packed
            | B::Pack4xI8
            | B::Pack4xU8
            | B::Unpack4xI8
            | B::Unpack4xU8 => {
                return Err(ice(format!("{} was not polyfilled", fun.wgsl_name())));
            }
            B::ArrayLength
            | B::AtomicLoad
            | B::AtomicStore
            | B::AtomicAdd
            | B::AtomicSub
            | B::AtomicMax
            | B::AtomicMin
            | B::AtomicAnd
            | B::AtomicOr
            | B::AtomicXor
            | B::AtomicExchange
            | B::AtomicCompareExchangeWeak => {
                return Err(ice(format!("{} reached the math lowering", fun.wgsl_name())));
            }
        };
        let operands: Vec<Operand> = values.into_iter().map(Operand::IdRef).collect();
        Ok(self.builder.ext_inst(ty, None, self.glsl, op as u32, operands)?)
    }

    fn array_length(&mut self, st: &mut FnState<'m>, args: &[Expression]) -> Result<Word, Error> {
        let Some(Expression::AccessIndex { base, index }) = args.first() else {
            return Err(ice("arrayLength of an array that is not a buffer member"));
        };
        let structure = self.expr(st, base)?;
        let ty = self.scalar(Scalar::U32);
        Ok(self.builder.array_length(ty, None, structure, *index)?)
    }

    /// The scope and the relaxed memory semantics of an atomic on
    /// `pointer`, and the atomic's scalar type.
    fn atomic_operands(
        &mut self,
        st: &FnState<'m>,
        pointer: &Expression,
    ) -> Result<(Word, Word, Scalar), Error> {
        let ctx = ResolveContext::new(self.module, st.function);
        let space = ctx
            .resolve_inner(pointer)?
            .pointer_space()
            .ok_or_else(|| ice("atomic builtin without a pointer"))?;
        let scalar = match ctx.resolve_pointee(pointer)? {
            TypeInner::Atomic(s) | TypeInner::Scalar(s) => s,
            _ => return Err(ice("atomic builtin on a non-atomic")),
        };
        let scope = if space == AddressSpace::Workgroup {
            Scope::Workgroup
        } else {
            Scope::Device
        };
        let scope = self.const_u32(scope as u32);
        let semantics = self.const_u32(MemorySemantics::NONE.bits());
        Ok((scope, semantics, scalar))
    }

    fn atomic_store(&mut self, st: &mut FnState<'m>, args: &[Expression]) -> Result<(), Error> {
        let [pointer, value] = args else {
            return Err(ice("atomicStore takes a pointer and a value"));
        };
        let (scope, semantics, _) = self.atomic_operands(st, pointer)?;
        let pointer = self.expr(st, pointer)?;
        let value = self.expr(st, value)?;
        self.builder
            .atomic_store(pointer, scope, semantics, value)?;
        Ok(())
    }

    fn atomic(
        &mut self,
        st: &mut FnState<'m>,
        e: &Expression,
        fun: BuiltinFn,
        args: &[Expression],
    ) -> Result<Word, Error> {
        let Some((pointer, rest)) = args.split_first() else {
            return Err(ice(format!("{} without a pointer", fun.wgsl_name())));
        };
        let (scope, semantics, scalar) = self.atomic_operands(st, pointer)?;
        let ty = self.scalar(scalar);
        let pointer = self.expr(st, pointer)?;
        let values = self.exprs(st, rest)?;
        let value = values
            .first()
            .copied()
            .ok_or_else(|| ice(format!("{} without a value", fun.wgsl_name())));
        let signed = scalar.kind == ScalarKind::Sint;
        use BuiltinFn as B;
        Ok(match fun {
            B::AtomicLoad => self
                .builder
                .atomic_load(ty, None, pointer, scope, semantics)?,
            B::AtomicAdd => self
                .builder
                .atomic_i_add(ty, None, pointer, scope, semantics, value?)?,
            B::AtomicSub => self
                .builder
                .atomic_i_sub(ty, None, pointer, scope, semantics, value?)?,
            B::AtomicMax if signed => self
                .builder
                .atomic_s_max(ty, None, pointer, scope, semantics, value?)?,
            B::AtomicMax => self
                .builder
                .atomic_u_max(ty, None, pointer, scope, semantics, value?)?,
            B::AtomicMin if signed => self
                .builder
                .atomic_s_min(ty, None, pointer, scope, semantics, value?)?,
            B::AtomicMin => self
                .builder
                .atomic_u_min(ty, None, pointer, scope, semantics, value?)?,
            B::AtomicAnd => self
                .builder
                .atomic_and(ty, None, pointer, scope, semantics, value?)?,
            B::AtomicOr => self
                .builder
                .atomic_or(ty, None, pointer, scope, semantics, value?)?,
            B::AtomicXor => self
                .builder
                .atomic_xor(ty, None, pointer, scope, semantics, value?)?,
            B::AtomicExchange => self
                .builder
                .atomic_exchange(ty, None, pointer, scope, semantics, value?)?,
            B::AtomicCompareExchangeWeak => {
                let [comparator, new] = values[..] else {
                    return Err(ice("atomicCompareExchangeWeak takes three arguments"));
                };
                let old = self.builder.atomic_compare_exchange(
                    ty, None, pointer, scope, semantics, semantics, new, comparator,
                )?;
                let bool_type = self.scalar(Scalar::BOOL);
                let exchanged = self
                    .builder
                    .i_equal(bool_type, None, old, comparator)?;
                let result = self.result_type(st, e)?;
                self.builder
                    .composite_construct(result, None, [old, exchanged])?
            }
            _ => {
                return Err(ice(format!(
                    "{} has no value to lower",
                    fun.wgsl_name()
                )));
            }
        })
    }

    // Textures.

    /// `coords` with the array layer appended as one more component of the
    /// coordinate's scalar type.
    fn append_layer(
        &mut self,
        st: &FnState<'m>,
        coords_expr: &Expression,
        coords: Word,
        layer_expr: &Expression,
        layer: Word,
    ) -> Result<Word, Error> {
        let (count, scalar) = match self.resolve_inner(st, coords_expr)? {
            TypeInner::Scalar(s) => (1, s),
            TypeInner::Vector { size, scalar } => (size.count(), scalar),
            _ => return Err(ice("texture coordinates are not numeric")),
        };
        let layer_scalar = self
            .resolve_inner(st, layer_expr)?
            .scalar()
            .ok_or_else(|| ice("array index is not numeric"))?;
        let component = self.scalar(scalar);
        let layer = match (layer_scalar.kind, scalar.kind) {
            (a, b) if a == b => layer,
            (ScalarKind::Sint, ScalarKind::Float) => {
                self.builder.convert_s_to_f(component, None, layer)?
            }
            (ScalarKind::Uint, ScalarKind::Float) => {
                self.builder.convert_u_to_f(component, None, layer)?
            }
            (ScalarKind::Sint | ScalarKind::Uint, ScalarKind::Sint | ScalarKind::Uint) => {
                self.builder.bitcast(component, None, layer)?
            }
            _ => return Err(ice("array index of an unexpected type")),
        };
        let size = VectorSize::from_u32(count + 1)
            .ok_or_else(|| ice("too many texture coordinates"))?;
        let ty = self.vector(size, scalar);
        Ok(self.builder.composite_construct(ty, None, [coords, layer])?)
    }

    /// Evaluates the coordinates of `call`, with the array layer folded in.
    fn coordinates(&mut self, st: &mut FnState<'m>, call: &TextureCall) -> Result<Word, Error> {
        let coords_expr = call
            .coords
            .as_ref()
            .ok_or_else(|| ice(format!("{} without coordinates", call.fun.wgsl_name())))?;
        let coords = self.expr(st, coords_expr)?;
        match &call.array_index {
            Some(layer_expr) => {
                let layer = self.expr(st, layer_expr)?;
                self.append_layer(st, coords_expr, coords, layer_expr, layer)
            }
            None => Ok(coords),
        }
    }

    /// `level` as an `f32` for explicit-LOD sampling.
    fn float_level(&mut self, st: &mut FnState<'m>, level: &Expression) -> Result<Word, Error> {
        let kind = self.resolve_inner(st, level)?.scalar_kind();
        let value = self.expr(st, level)?;
        let f32_type = self.scalar(Scalar::F32);
        Ok(match kind {
            Some(ScalarKind::Sint) => self.builder.convert_s_to_f(f32_type, None, value)?,
            Some(ScalarKind::Uint) => self.builder.convert_u_to_f(f32_type, None, value)?,
            _ => value,
        })
    }

    fn query_size(
        &mut self,
        dim: TextureDimension,
        class: TextureClass,
        image: Word,
        level: Option<Word>,
    ) -> Result<(Word, u32), Error> {
        self.require(Capability::ImageQuery);
        let count = dim.size_components() + u32::from(dim.is_arrayed());
        let ty = match VectorSize::from_u32(count) {
            Some(size) => self.vector(size, Scalar::U32),
            None => self.scalar(Scalar::U32),
        };
        let size = match class {
            TextureClass::Sampled(_) | TextureClass::Depth => {
                let level = match level {
                    Some(level) => level,
                    None => self.const_u32(0),
                };
                self.builder.image_query_size_lod(ty, None, image, level)?
            }
            _ => self.builder.image_query_size(ty, None, image)?,
        };
        Ok((size, count))
    }

    fn texture(&mut self, st: &mut FnState<'m>, call: &TextureCall) -> Result<Word, Error> {
        let module = self.module;
        let image_resolution = self.resolve(st, &call.texture)?;
        let (dim, class) = match *image_resolution.inner(&module.types) {
            TypeInner::Texture { dim, class } => (dim, class),
            _ => return Err(ice("texture builtin on a non-texture")),
        };
        let image_type = self.resolution_type(&image_resolution)?;
        let image = self.expr(st, &call.texture)?;
        let f32_type = self.scalar(Scalar::F32);
        let texel_type = self.vector(VectorSize::Quad, class.texel_scalar());
        let depth = class.is_depth();

        let sampled_image = match &call.sampler {
            Some(sampler) => {
                let sampler = self.expr(st, sampler)?;
                let ty = self.builder.type_sampled_image(image_type);
                Some(self.builder.sampled_image(ty, None, image, sampler)?)
            }
            None => None,
        };
        let sampled = || {
            sampled_image.ok_or_else(|| ice(format!("{} without a sampler", call.fun.wgsl_name())))
        };

        let component = self.opt_expr(st, &call.component)?;
        let coords = match call.coords {
            Some(_) => Some(self.coordinates(st, call)?),
            None => None,
        };
        let coords = || coords.ok_or_else(|| ice(format!("{} without coordinates", call.fun.wgsl_name())));
        let depth_ref = self.opt_expr(st, &call.depth_ref)?;
        let depth_ref = || {
            depth_ref.ok_or_else(|| ice(format!("{} without a depth reference", call.fun.wgsl_name())))
        };

        let mut mask = ImageOperands::NONE;
        let mut params = Vec::new();
        if let Some(bias) = &call.bias {
            mask |= ImageOperands::BIAS;
            params.push(Operand::IdRef(self.expr(st, bias)?));
        }
        let level = match &call.level {
            Some(level) if matches!(call.fun, TextureFn::SampleLevel) => {
                Some(self.float_level(st, level)?)
            }
            Some(level) => Some(self.expr(st, level)?),
            None => None,
        };
        if call.fun == TextureFn::SampleLevel {
            mask |= ImageOperands::LOD;
            params.push(Operand::IdRef(level.ok_or_else(|| ice("textureSampleLevel without a level"))?));
        }
        if call.fun == TextureFn::SampleCompareLevel {
            mask |= ImageOperands::LOD;
            params.push(Operand::IdRef(self.literal(Literal::F32(0.0))));
        }
        let sample_index = self.opt_expr(st, &call.sample_index)?;
        if let (Some(ddx), Some(ddy)) = (&call.ddx, &call.ddy) {
            mask |= ImageOperands::GRAD;
            let ddx = self.expr(st, ddx)?;
            let ddy = self.expr(st, ddy)?;
            params.extend([Operand::IdRef(ddx), Operand::IdRef(ddy)]);
        }
        if let Some(offset) = &call.offset {
            let ctx = ResolveContext::new(module, st.function);
            let offset = self.try_const(ctx, offset)?.ok_or_else(|| {
                unsupported("texture offsets must be constant expressions")
            })?;
            mask |= ImageOperands::CONST_OFFSET;
            params.push(Operand::IdRef(offset));
        }
        let optional = |mask: ImageOperands| if mask.is_empty() { None } else { Some(mask) };

        let result = match call.fun {
            TextureFn::Sample | TextureFn::SampleBias => {
                let ty = if depth { self.vector(VectorSize::Quad, Scalar::F32) } else { texel_type };
                self.builder
                    .image_sample_implicit_lod(ty, None, sampled()?, coords()?, optional(mask), params)?
            }
            TextureFn::SampleLevel | TextureFn::SampleGrad => {
                let ty = if depth { self.vector(VectorSize::Quad, Scalar::F32) } else { texel_type };
                self.builder
                    .image_sample_explicit_lod(ty, None, sampled()?, coords()?, mask, params)?
            }
            TextureFn::SampleCompare => self.builder.image_sample_dref_implicit_lod(
                f32_type,
                None,
                sampled()?,
                coords()?,
                depth_ref()?,
                optional(mask),
                params,
            )?,
            TextureFn::SampleCompareLevel => self.builder.image_sample_dref_explicit_lod(
                f32_type,
                None,
                sampled()?,
                coords()?,
                depth_ref()?,
                mask,
                params,
            )?,
            TextureFn::SampleBaseClampToEdge => {
                let (size, _) = self.query_size(dim, class, image, None)?;
                let vec2 = self.vector(VectorSize::Bi, Scalar::F32);
                let size = self.builder.convert_u_to_f(vec2, None, size)?;
                let half = self.literal(Literal::F32(0.5));
                let half = self.const_composite(vec2, vec![half; 2]);
                let one = self.literal(Literal::F32(1.0));
                let one = self.const_composite(vec2, vec![one; 2]);
                let half_texel = self.builder.f_div(vec2, None, half, size)?;
                let upper = self.builder.f_sub(vec2, None, one, half_texel)?;
                let clamped = self.builder.ext_inst(
                    vec2,
                    None,
                    self.glsl,
                    GLOp::FClamp as u32,
                    [coords()?, half_texel, upper].map(Operand::IdRef),
                )?;
                let zero = self.literal(Literal::F32(0.0));
                self.builder.image_sample_explicit_lod(
                    texel_type,
                    None,
                    sampled()?,
                    clamped,
                    ImageOperands::LOD,
                    [Operand::IdRef(zero)],
                )?
            }
            TextureFn::Gather => {
                let component = match component {
                    Some(c) => c,
                    None => self.const_u32(0),
                };
                self.builder.image_gather(
                    texel_type,
                    None,
                    sampled()?,
                    coords()?,
                    component,
                    optional(mask),
                    params,
                )?
            }
            TextureFn::GatherCompare => {
                let ty = self.vector(VectorSize::Quad, Scalar::F32);
                self.builder.image_dref_gather(
                    ty,
                    None,
                    sampled()?,
                    coords()?,
                    depth_ref()?,
                    optional(mask),
                    params,
                )?
            }
            TextureFn::Load => {
                let ty = if depth { self.vector(VectorSize::Quad, Scalar::F32) } else { texel_type };
                match class {
                    TextureClass::Storage { .. } => {
                        self.builder
                            .image_read(ty, None, image, coords()?, None, [])?
                    }
                    _ if class.is_multisampled() => {
                        let sample = sample_index
                            .ok_or_else(|| ice("multisampled textureLoad without a sample"))?;
                        self.builder.image_fetch(
                            ty,
                            None,
                            image,
                            coords()?,
                            Some(ImageOperands::SAMPLE),
                            [Operand::IdRef(sample)],
                        )?
                    }
                    _ => {
                        let level = match level {
                            Some(level) => level,
                            None => self.const_u32(0),
                        };
                        self.builder.image_fetch(
                            ty,
                            None,
                            image,
                            coords()?,
                            Some(ImageOperands::LOD),
                            [Operand::IdRef(level)],
                        )?
                    }
                }
            }
            TextureFn::Dimensions => {
                let (size, count) = self.query_size(dim, class, image, level)?;
                if !dim.is_arrayed() {
                    return Ok(size);
                }
                let ty = match VectorSize::from_u32(count - 1) {
                    Some(size) => self.vector(size, Scalar::U32),
                    None => self.scalar(Scalar::U32),
                };
                return Ok(self
                    .builder
                    .vector_shuffle(ty, None, size, size, 0..count - 1)?);
            }
            TextureFn::NumLayers => {
                let (size, count) = self.query_size(dim, class, image, None)?;
                let ty = self.scalar(Scalar::U32);
                return Ok(self
                    .builder
                    .composite_extract(ty, None, size, [count - 1])?);
            }
            TextureFn::NumLevels => {
                self.require(Capability::ImageQuery);
                let ty = self.scalar(Scalar::U32);
                return Ok(self.builder.image_query_levels(ty, None, image)?);
            }
            TextureFn::NumSamples => {
                self.require(Capability::ImageQuery);
                let ty = self.scalar(Scalar::U32);
                return Ok(self.builder.image_query_samples(ty, None, image)?);
            }
            TextureFn::Store => return Err(ice("textureStore has no value")),
        };
        let returns_scalar = depth
            && matches!(
                call.fun,
                TextureFn::Sample
                    | TextureFn::SampleBias
                    | TextureFn::SampleLevel
                    | TextureFn::SampleGrad
                    | TextureFn::Load
            );
        if returns_scalar {
            return Ok(self.builder.composite_extract(f32_type, None, result, [0])?);
        }
        Ok(result)
    }

    fn texture_store(&mut self, st: &mut FnState<'m>, call: &TextureCall) -> Result<(), Error> {
        let image = self.expr(st, &call.texture)?;
        let coords = self.coordinates(st, call)?;
        let value = call
            .value
            .as_ref()
            .ok_or_else(|| ice("textureStore without a value"))?;
        let value = self.expr(st, value)?;
        self.builder.image_write(image, coords, value, None, [])?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_precision_bits() {
        assert_eq!(f16_bits(1.0), 0x3c00);
        assert_eq!(f16_bits(-2.0), 0xc000);
        assert_eq!(f16_bits(0.5), 0x3800);
        assert_eq!(f16_bits(65504.0), 0x7bff);
        assert_eq!(f16_bits(1.0e6), 0x7c00);
        assert_eq!(f16_bits(0.0), 0);
        // Smallest subnormal.
        assert_eq!(f16_bits(5.960_464_5e-8), 0x0001);
    }

    #[test]
    fn literal_negation() {
        assert!(matches!(negated(Literal::I32(3)), Some(Literal::I32(-3))));
        assert!(matches!(
            negated(Literal::I32(i32::MIN)),
            Some(Literal::I32(i32::MIN))
        ));
        assert!(matches!(negated(Literal::F32(1.5)), Some(Literal::F32(n)) if n == -1.5));
        assert!(negated(Literal::U32(1)).is_none());
    }

    #[test]
    fn matrix_strides_follow_column_alignment() {
        let mut module = Module::default();
        let mat3 = module.matrix_type(VectorSize::Tri, VectorSize::Tri, Scalar::F32);
        let mat2 = module.matrix_type(VectorSize::Bi, VectorSize::Bi, Scalar::F32);
        let array = module.array_type(mat3, 2);
        assert_eq!(matrix_stride(&module, mat3), Some(16));
        assert_eq!(matrix_stride(&module, mat2), Some(8));
        assert_eq!(matrix_stride(&module, array), Some(16));
        let f32_ty = module.scalar_type(Scalar::F32);
        assert_eq!(matrix_stride(&module, f32_ty), None);
    }

    #[test]
    fn only_buffer_types_are_host_shareable() {
        let mut module = Module::default();
        let f32_ty = module.scalar_type(Scalar::F32);
        let u32_ty = module.scalar_type(Scalar::U32);
        let items = module.runtime_array_type(f32_ty);
        let data = module.struct_type("Data", &[("count", u32_ty), ("items", items)]);
        let private = module.array_type(u32_ty, 4);
        module.global_variables.append(
            GlobalVariable::new("data", AddressSpace::Storage, data).with_binding(0, 0),
        );
        module
            .global_variables
            .append(GlobalVariable::new("scratch", AddressSpace::Private, private));
        let host = host_shareable_types(&module);
        assert!(host.contains(&data));
        assert!(host.contains(&items));
        assert!(host.contains(&f32_ty));
        assert!(!host.contains(&private));
    }
}
