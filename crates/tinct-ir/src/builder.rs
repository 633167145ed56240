//! Type-interning helpers used by the front end, passes and tests.

use crate::arena::Handle;
use crate::expr::BuiltinFn;
use crate::global::{AddressSpace, StorageAccess};
use crate::layout::{array_stride, layout_struct};
use crate::predeclared;
use crate::typifier::TypeResolution;
use crate::types::{ArraySize, Scalar, Type, TypeInner, VectorSize};
use crate::Module;

impl Module {
    /// Interns an unnamed type.
    pub fn insert_type(&mut self, inner: TypeInner) -> Handle<Type> {
        self.types.insert(Type { name: None, inner })
    }

    /// Interns a named type.
    pub fn insert_named_type(&mut self, name: impl Into<String>, inner: TypeInner) -> Handle<Type> {
        self.types.insert(Type {
            name: Some(name.into()),
            inner,
        })
    }

    pub fn scalar_type(&mut self, scalar: Scalar) -> Handle<Type> {
        self.insert_type(TypeInner::Scalar(scalar))
    }

    pub fn vector_type(&mut self, size: VectorSize, scalar: Scalar) -> Handle<Type> {
        self.insert_type(TypeInner::Vector { size, scalar })
    }

    pub fn matrix_type(
        &mut self,
        columns: VectorSize,
        rows: VectorSize,
        scalar: Scalar,
    ) -> Handle<Type> {
        self.insert_type(TypeInner::Matrix {
            columns,
            rows,
            scalar,
        })
    }

    /// `array<base, count>` with the natural stride.
    pub fn array_type(&mut self, base: Handle<Type>, count: u32) -> Handle<Type> {
        let stride = array_stride(&self.types, base);
        self.insert_type(TypeInner::Array {
            base,
            size: ArraySize::Constant(count),
            stride,
        })
    }

    /// `array<base>` with the natural stride.
    pub fn runtime_array_type(&mut self, base: Handle<Type>) -> Handle<Type> {
        let stride = array_stride(&self.types, base);
        self.insert_type(TypeInner::Array {
            base,
            size: ArraySize::Runtime,
            stride,
        })
    }

    /// A struct with members laid out in declaration order.
    pub fn struct_type(&mut self, name: &str, members: &[(&str, Handle<Type>)]) -> Handle<Type> {
        let (members, span) = layout_struct(
            &self.types,
            members
                .iter()
                .map(|&(n, ty)| (n.to_string(), ty))
                .collect(),
        );
        self.insert_named_type(name, TypeInner::Struct { members, span })
    }

    pub fn pointer_type(
        &mut self,
        base: Handle<Type>,
        space: AddressSpace,
        access: StorageAccess,
    ) -> Handle<Type> {
        self.insert_type(TypeInner::Pointer {
            base,
            space,
            access,
        })
    }

    /// The result struct of `modf`, `frexp` or `atomicCompareExchangeWeak`
    /// for an argument (or atomic pointee) of shape `arg`.
    pub fn predeclared_type(&mut self, fun: BuiltinFn, arg: &TypeInner) -> Handle<Type> {
        let name = predeclared::result_name(fun, arg);
        if let Some((h, _)) = self
            .types
            .iter()
            .find(|(_, t)| t.name.as_deref() == Some(name.as_str()))
        {
            return h;
        }
        let members: Vec<(String, Handle<Type>)> = predeclared::result_members(fun, arg)
            .into_iter()
            .map(|(n, inner)| (n.to_string(), self.insert_type(inner)))
            .collect();
        let (members, span) = layout_struct(&self.types, members);
        self.insert_named_type(name, TypeInner::Struct { members, span })
    }

    /// Interns the type of a resolution. Value pointers become pointers to
    /// an interned vector or scalar.
    pub fn resolution_handle(&mut self, resolution: &TypeResolution) -> Handle<Type> {
        match *resolution {
            TypeResolution::Handle(h) => h,
            TypeResolution::Value(TypeInner::ValuePointer {
                size,
                scalar,
                space,
                access,
            }) => {
                let base = match size {
                    Some(size) => self.vector_type(size, scalar),
                    None => self.scalar_type(scalar),
                };
                self.pointer_type(base, space, access)
            }
            TypeResolution::Value(ref inner) => self.insert_type(inner.clone()),
        }
    }

    /// The type with the same shape as `ty` but scalar `scalar`.
    pub fn with_scalar_type(&mut self, ty: Handle<Type>, scalar: Scalar) -> Option<Handle<Type>> {
        let inner = self.types[ty].inner.with_scalar(scalar)?;
        Some(self.insert_type(inner))
    }
}
