//! Global variables, overrides, address spaces, and shader IO bindings.

use crate::arena::Handle;
use crate::expr::Expression;
use crate::types::Type;

/// Bitflags for the access mode of a variable, pointer or storage texture.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct StorageAccess(u32);

impl StorageAccess {
    /// No access.
    pub const EMPTY: Self = Self(0);
    /// Read access.
    pub const LOAD: Self = Self(1);
    /// Write access.
    pub const STORE: Self = Self(2);
    /// Read and write access.
    pub const LOAD_STORE: Self = Self(3);

    /// Returns `true` if `self` contains all flags in `other`.
    pub fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    /// Returns `true` if no flags are set.
    pub fn is_empty(self) -> bool {
        self.0 == 0
    }
}

impl std::ops::BitOr for StorageAccess {
    type Output = Self;
    fn bitor(self, rhs: Self) -> Self {
        Self(self.0 | rhs.0)
    }
}

impl std::ops::BitOrAssign for StorageAccess {
    fn bitor_assign(&mut self, rhs: Self) {
        self.0 |= rhs.0;
    }
}

/// The storage class of a variable.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum AddressSpace {
    Function,
    Private,
    Workgroup,
    Uniform,
    Storage,
    /// Opaque resources: textures and samplers.
    Handle,
    PushConstant,
    /// Stage input, introduced by entry-point IO canonicalization.
    In,
    /// Stage output, introduced by entry-point IO canonicalization.
    Out,
}

impl AddressSpace {
    /// Address spaces whose memory layout is observable by the host.
    pub fn is_host_shareable(self) -> bool {
        matches!(self, Self::Uniform | Self::Storage | Self::PushConstant)
    }

    /// Returns `true` if variables in this space take a binding point.
    pub fn needs_binding(self) -> bool {
        matches!(self, Self::Uniform | Self::Storage | Self::Handle)
    }
}

/// `@group(N) @binding(M)` resource binding.
#[derive(Clone, Copy, Debug, Default, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub struct BindingPoint {
    pub group: u32,
    pub binding: u32,
}

impl BindingPoint {
    /// Creates a binding point.
    pub const fn new(group: u32, binding: u32) -> Self {
        Self { group, binding }
    }
}

/// Built-in shader inputs and outputs.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum BuiltIn {
    Position { invariant: bool },
    VertexIndex,
    InstanceIndex,
    PointSize,
    FrontFacing,
    FragDepth,
    SampleIndex,
    SampleMask,
    LocalInvocationId,
    LocalInvocationIndex,
    GlobalInvocationId,
    WorkgroupId,
    NumWorkgroups,
}

/// Interpolation type of a user-defined IO location.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Interpolation {
    Perspective,
    Linear,
    Flat,
}

/// Interpolation sampling of a user-defined IO location.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Sampling {
    Center,
    Centroid,
    Sample,
}

/// Shader IO attribute of an argument, result, struct member or IO global.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum Binding {
    /// A built-in shader variable.
    BuiltIn(BuiltIn),
    /// A user-defined location.
    Location {
        location: u32,
        interpolation: Option<Interpolation>,
        sampling: Option<Sampling>,
        blend_src: Option<u32>,
    },
}

impl Binding {
    /// Creates a location binding without interpolation attributes.
    pub const fn location(location: u32) -> Self {
        Self::Location {
            location,
            interpolation: None,
            sampling: None,
            blend_src: None,
        }
    }

    /// The builtin, if this is a builtin binding.
    pub fn builtin(&self) -> Option<BuiltIn> {
        match *self {
            Self::BuiltIn(b) => Some(b),
            Self::Location { .. } => None,
        }
    }
}

/// A module-scope variable.
#[derive(Clone, Debug, PartialEq)]
pub struct GlobalVariable {
    pub name: String,
    pub space: AddressSpace,
    pub access: StorageAccess,
    pub binding: Option<BindingPoint>,
    pub ty: Handle<Type>,
    /// Initializer, only for `private` variables.
    pub init: Option<Expression>,
    /// IO attribute of `in`/`out` variables.
    pub io: Option<Binding>,
}

impl GlobalVariable {
    /// Creates a variable with default access for its address space.
    pub fn new(name: impl Into<String>, space: AddressSpace, ty: Handle<Type>) -> Self {
        let access = match space {
            AddressSpace::Uniform | AddressSpace::PushConstant | AddressSpace::In => {
                StorageAccess::LOAD
            }
            AddressSpace::Handle => StorageAccess::EMPTY,
            AddressSpace::Out => StorageAccess::STORE,
            _ => StorageAccess::LOAD_STORE,
        };
        Self {
            name: name.into(),
            space,
            access,
            binding: None,
            ty,
            init: None,
            io: None,
        }
    }

    /// Sets the binding point.
    pub fn with_binding(mut self, group: u32, binding: u32) -> Self {
        self.binding = Some(BindingPoint::new(group, binding));
        self
    }

    /// Sets the access mode.
    pub fn with_access(mut self, access: StorageAccess) -> Self {
        self.access = access;
        self
    }
}

/// A pipeline-overridable constant.
#[derive(Clone, Debug, PartialEq)]
pub struct Override {
    pub name: String,
    /// Numeric `@id`, if specified.
    pub id: Option<u16>,
    pub ty: Handle<Type>,
    /// Default value.
    pub init: Option<Expression>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn storage_access_flags() {
        let rw = StorageAccess::LOAD | StorageAccess::STORE;
        assert_eq!(rw, StorageAccess::LOAD_STORE);
        assert!(rw.contains(StorageAccess::LOAD));
        assert!(!StorageAccess::LOAD.contains(StorageAccess::STORE));
        assert!(StorageAccess::EMPTY.is_empty());
    }

    #[test]
    fn default_access_by_space() {
        let ty = Handle::new(0);
        assert_eq!(
            GlobalVariable::new("u", AddressSpace::Uniform, ty).access,
            StorageAccess::LOAD
        );
        assert_eq!(
            GlobalVariable::new("w", AddressSpace::Workgroup, ty).access,
            StorageAccess::LOAD_STORE
        );
        let sb = GlobalVariable::new("sb", AddressSpace::Storage, ty).with_binding(0, 3);
        assert_eq!(sb.binding, Some(BindingPoint::new(0, 3)));
    }

    #[test]
    fn binding_points_order_by_group_then_binding() {
        let mut points = vec![
            BindingPoint::new(1, 0),
            BindingPoint::new(0, 2),
            BindingPoint::new(0, 1),
        ];
        points.sort();
        assert_eq!(
            points,
            vec![
                BindingPoint::new(0, 1),
                BindingPoint::new(0, 2),
                BindingPoint::new(1, 0)
            ]
        );
    }

    #[test]
    fn host_shareable_spaces() {
        assert!(AddressSpace::Storage.is_host_shareable());
        assert!(!AddressSpace::Workgroup.is_host_shareable());
        assert!(AddressSpace::Handle.needs_binding());
    }
}
