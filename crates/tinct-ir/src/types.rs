//! Type system for the tinct IR.

use crate::arena::Handle;
use crate::global::{AddressSpace, Binding, StorageAccess};

/// Width of a scalar type in bytes.
pub type Bytes = u8;

/// The kind of a scalar type.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum ScalarKind {
    /// Boolean.
    Bool,
    /// Signed integer.
    Sint,
    /// Unsigned integer.
    Uint,
    /// Floating point.
    Float,
}

/// A scalar type: kind + byte width.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct Scalar {
    pub kind: ScalarKind,
    pub width: Bytes,
}

impl Scalar {
    pub const BOOL: Self = Self {
        kind: ScalarKind::Bool,
        width: 1,
    };
    pub const I32: Self = Self {
        kind: ScalarKind::Sint,
        width: 4,
    };
    pub const U32: Self = Self {
        kind: ScalarKind::Uint,
        width: 4,
    };
    pub const F16: Self = Self {
        kind: ScalarKind::Float,
        width: 2,
    };
    pub const F32: Self = Self {
        kind: ScalarKind::Float,
        width: 4,
    };

    /// Returns `true` for `i32` and `u32`.
    pub fn is_integer(self) -> bool {
        matches!(self.kind, ScalarKind::Sint | ScalarKind::Uint)
    }

    /// Returns `true` for `f32` and `f16`.
    pub fn is_float(self) -> bool {
        self.kind == ScalarKind::Float
    }

    /// Returns the same kind with a different byte width.
    pub fn with_kind(self, kind: ScalarKind) -> Self {
        let width = match kind {
            ScalarKind::Bool => 1,
            _ if self.kind == ScalarKind::Bool => 4,
            _ => self.width,
        };
        Self { kind, width }
    }
}

/// Number of components in a vector.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum VectorSize {
    /// 2 components.
    Bi = 2,
    /// 3 components.
    Tri = 3,
    /// 4 components.
    Quad = 4,
}

impl VectorSize {
    /// Converts a component count into a vector size.
    pub fn from_u32(n: u32) -> Option<Self> {
        match n {
            2 => Some(Self::Bi),
            3 => Some(Self::Tri),
            4 => Some(Self::Quad),
            _ => None,
        }
    }

    /// Returns the component count.
    pub fn count(self) -> u32 {
        self as u32
    }
}

/// Size of an array.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum ArraySize {
    /// Fixed-size array.
    Constant(u32),
    /// Runtime-sized array (last member of a storage buffer struct).
    Runtime,
}

/// A member of a struct type.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct StructMember {
    pub name: String,
    pub ty: Handle<Type>,
    /// Shader IO attribute, only meaningful for entry-point IO structs.
    pub binding: Option<Binding>,
    /// Byte offset within the struct.
    pub offset: u32,
}

/// The dimensionality of a texture.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum TextureDimension {
    D1,
    D2,
    D2Array,
    D3,
    Cube,
    CubeArray,
}

impl TextureDimension {
    /// Returns `true` for the arrayed dimensions.
    pub fn is_arrayed(self) -> bool {
        matches!(self, Self::D2Array | Self::CubeArray)
    }

    /// Number of coordinates used to address a texel (array index excluded).
    pub fn coordinate_count(self) -> u32 {
        match self {
            Self::D1 => 1,
            Self::D2 | Self::D2Array => 2,
            Self::D3 | Self::Cube | Self::CubeArray => 3,
        }
    }

    /// Number of components of `textureDimensions` for this dimension.
    pub fn size_components(self) -> u32 {
        match self {
            Self::D1 => 1,
            Self::D3 => 3,
            _ => 2,
        }
    }
}

/// The component type of a sampled texture.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum SampledKind {
    Float,
    Sint,
    Uint,
}

impl SampledKind {
    /// The 32-bit scalar returned by sampling or loading.
    pub fn scalar(self) -> Scalar {
        match self {
            Self::Float => Scalar::F32,
            Self::Sint => Scalar::I32,
            Self::Uint => Scalar::U32,
        }
    }
}

/// Texel format of a storage texture.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum TexelFormat {
    R8Unorm,
    R32Uint,
    R32Sint,
    R32Float,
    Rg32Uint,
    Rg32Sint,
    Rg32Float,
    Rgba8Unorm,
    Rgba8Snorm,
    Rgba8Uint,
    Rgba8Sint,
    Bgra8Unorm,
    Rgba16Uint,
    Rgba16Sint,
    Rgba16Float,
    Rgba32Uint,
    Rgba32Sint,
    Rgba32Float,
}

impl TexelFormat {
    /// The channel type produced by loads from this format.
    pub fn sampled_kind(self) -> SampledKind {
        match self {
            Self::R32Uint | Self::Rg32Uint | Self::Rgba8Uint | Self::Rgba16Uint | Self::Rgba32Uint => {
                SampledKind::Uint
            }
            Self::R32Sint | Self::Rg32Sint | Self::Rgba8Sint | Self::Rgba16Sint | Self::Rgba32Sint => {
                SampledKind::Sint
            }
            _ => SampledKind::Float,
        }
    }

    /// The WGSL spelling of the format.
    pub fn wgsl_name(self) -> &'static str {
        match self {
            Self::R8Unorm => "r8unorm",
            Self::R32Uint => "r32uint",
            Self::R32Sint => "r32sint",
            Self::R32Float => "r32float",
            Self::Rg32Uint => "rg32uint",
            Self::Rg32Sint => "rg32sint",
            Self::Rg32Float => "rg32float",
            Self::Rgba8Unorm => "rgba8unorm",
            Self::Rgba8Snorm => "rgba8snorm",
            Self::Rgba8Uint => "rgba8uint",
            Self::Rgba8Sint => "rgba8sint",
            Self::Bgra8Unorm => "bgra8unorm",
            Self::Rgba16Uint => "rgba16uint",
            Self::Rgba16Sint => "rgba16sint",
            Self::Rgba16Float => "rgba16float",
            Self::Rgba32Uint => "rgba32uint",
            Self::Rgba32Sint => "rgba32sint",
            Self::Rgba32Float => "rgba32float",
        }
    }
}

/// What a texture holds and how it may be accessed.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum TextureClass {
    Sampled(SampledKind),
    Depth,
    Multisampled(SampledKind),
    DepthMultisampled,
    Storage {
        format: TexelFormat,
        access: StorageAccess,
    },
    /// `texture_external`, expanded into planes before printing.
    External,
}

impl TextureClass {
    /// Returns `true` for the depth classes.
    pub fn is_depth(self) -> bool {
        matches!(self, Self::Depth | Self::DepthMultisampled)
    }

    /// Returns `true` for the multisampled classes.
    pub fn is_multisampled(self) -> bool {
        matches!(self, Self::Multisampled(_) | Self::DepthMultisampled)
    }

    /// The scalar returned by texel reads.
    pub fn texel_scalar(self) -> Scalar {
        match self {
            Self::Sampled(kind) | Self::Multisampled(kind) => kind.scalar(),
            Self::Storage { format, .. } => format.sampled_kind().scalar(),
            Self::Depth | Self::DepthMultisampled | Self::External => Scalar::F32,
        }
    }
}

/// A named type.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub struct Type {
    /// Struct types carry their declared name; other types usually do not.
    pub name: Option<String>,
    pub inner: TypeInner,
}

/// The concrete shape of a type.
#[derive(Clone, Debug, Hash, Eq, PartialEq)]
pub enum TypeInner {
    /// A single scalar value.
    Scalar(Scalar),
    /// A vector of scalars.
    Vector { size: VectorSize, scalar: Scalar },
    /// A matrix of column vectors.
    Matrix {
        columns: VectorSize,
        rows: VectorSize,
        scalar: Scalar,
    },
    /// An atomic `i32` or `u32`.
    Atomic(Scalar),
    /// A pointer to a value in a given address space.
    Pointer {
        base: Handle<Type>,
        space: AddressSpace,
        access: StorageAccess,
    },
    /// A pointer to a vector component or matrix column, which may not
    /// have an interned type of its own.
    ValuePointer {
        size: Option<VectorSize>,
        scalar: Scalar,
        space: AddressSpace,
        access: StorageAccess,
    },
    /// A fixed-size or runtime-sized array.
    Array {
        base: Handle<Type>,
        size: ArraySize,
        stride: u32,
    },
    /// A composite struct type.
    Struct { members: Vec<StructMember>, span: u32 },
    /// `sampler` or `sampler_comparison`.
    Sampler { comparison: bool },
    /// Any texture type.
    Texture {
        dim: TextureDimension,
        class: TextureClass,
    },
}

impl TypeInner {
    /// The scalar of a scalar, vector, matrix or atomic type.
    pub fn scalar(&self) -> Option<Scalar> {
        match *self {
            Self::Scalar(s)
            | Self::Vector { scalar: s, .. }
            | Self::Matrix { scalar: s, .. }
            | Self::Atomic(s) => Some(s),
            _ => None,
        }
    }

    /// The kind of [`Self::scalar`].
    pub fn scalar_kind(&self) -> Option<ScalarKind> {
        self.scalar().map(|s| s.kind)
    }

    /// The vector width, if this is a vector.
    pub fn vector_size(&self) -> Option<VectorSize> {
        match *self {
            Self::Vector { size, .. } => Some(size),
            _ => None,
        }
    }

    /// Returns `true` for scalars and vectors.
    pub fn is_scalar_or_vector(&self) -> bool {
        matches!(self, Self::Scalar(_) | Self::Vector { .. })
    }

    /// Returns `true` for pointer types.
    pub fn is_pointer(&self) -> bool {
        matches!(self, Self::Pointer { .. } | Self::ValuePointer { .. })
    }

    /// Returns `true` for textures and samplers.
    pub fn is_handle(&self) -> bool {
        matches!(self, Self::Sampler { .. } | Self::Texture { .. })
    }

    /// The address space of a pointer type.
    pub fn pointer_space(&self) -> Option<AddressSpace> {
        match *self {
            Self::Pointer { space, .. } | Self::ValuePointer { space, .. } => Some(space),
            _ => None,
        }
    }

    /// The same shape with a different scalar, for scalars, vectors and
    /// matrices.
    pub fn with_scalar(&self, scalar: Scalar) -> Option<TypeInner> {
        match *self {
            Self::Scalar(_) => Some(Self::Scalar(scalar)),
            Self::Vector { size, .. } => Some(Self::Vector { size, scalar }),
            Self::Matrix { columns, rows, .. } => Some(Self::Matrix {
                columns,
                rows,
                scalar,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arena::UniqueArena;

    #[test]
    fn scalar_constants() {
        assert_eq!(Scalar::F32.kind, ScalarKind::Float);
        assert_eq!(Scalar::F16.width, 2);
        assert!(Scalar::U32.is_integer());
        assert!(!Scalar::BOOL.is_integer());
    }

    #[test]
    fn with_kind_fixes_bool_width() {
        assert_eq!(Scalar::F32.with_kind(ScalarKind::Bool), Scalar::BOOL);
        assert_eq!(Scalar::BOOL.with_kind(ScalarKind::Uint), Scalar::U32);
        assert_eq!(Scalar::F16.with_kind(ScalarKind::Float), Scalar::F16);
    }

    #[test]
    fn type_dedup() {
        let mut types = UniqueArena::new();
        let vec3 = TypeInner::Vector {
            size: VectorSize::Tri,
            scalar: Scalar::F32,
        };
        let t0 = types.insert(Type {
            name: None,
            inner: vec3.clone(),
        });
        let t1 = types.insert(Type {
            name: None,
            inner: vec3,
        });
        assert_eq!(t0, t1);
        assert_eq!(types.len(), 1);
    }

    #[test]
    fn structs_are_nominal() {
        let mut types = UniqueArena::new();
        let f32_ty = types.insert(Type {
            name: None,
            inner: TypeInner::Scalar(Scalar::F32),
        });
        let members = vec![StructMember {
            name: "a".into(),
            ty: f32_ty,
            binding: None,
            offset: 0,
        }];
        let s = types.insert(Type {
            name: Some("S".into()),
            inner: TypeInner::Struct {
                members: members.clone(),
                span: 4,
            },
        });
        let t = types.insert(Type {
            name: Some("T".into()),
            inner: TypeInner::Struct { members, span: 4 },
        });
        assert_ne!(s, t);
    }

    #[test]
    fn texture_dimension_queries() {
        assert!(TextureDimension::CubeArray.is_arrayed());
        assert!(!TextureDimension::D3.is_arrayed());
        assert_eq!(TextureDimension::D2Array.coordinate_count(), 2);
        assert_eq!(TextureDimension::Cube.size_components(), 2);
        assert_eq!(TextureDimension::D3.size_components(), 3);
    }

    #[test]
    fn texel_scalar_follows_format() {
        let class = TextureClass::Storage {
            format: TexelFormat::R32Uint,
            access: StorageAccess::STORE,
        };
        assert_eq!(class.texel_scalar(), Scalar::U32);
        assert_eq!(TextureClass::Depth.texel_scalar(), Scalar::F32);
        assert!(TextureClass::DepthMultisampled.is_multisampled());
    }

    #[test]
    fn vector_size_round_trip() {
        for n in 2..=4 {
            assert_eq!(VectorSize::from_u32(n).map(VectorSize::count), Some(n));
        }
        assert_eq!(VectorSize::from_u32(5), None);
    }
}
