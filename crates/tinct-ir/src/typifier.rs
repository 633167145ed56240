//! Type resolution for expression trees.
//!
//! The typifier is the read-only "semantic analysis" that passes and
//! printers consult: it never interns new types, so results that have no
//! interned handle are returned by value.

use crate::arena::{Handle, UniqueArena};
use crate::error::IrError;
use crate::expr::{BinaryOp, BuiltinFn, Expression, TextureFn};
use crate::func::{Function, LocalKind};
use crate::global::{AddressSpace, StorageAccess};
use crate::predeclared;
use crate::types::{Scalar, ScalarKind, Type, TypeInner, VectorSize};
use crate::{Module, format_type_inner};

/// The resolved type of an expression.
#[derive(Clone, Debug, PartialEq)]
pub enum TypeResolution {
    /// An interned type.
    Handle(Handle<Type>),
    /// A type that may not be interned.
    Value(TypeInner),
}

impl TypeResolution {
    /// The shape of the resolved type.
    pub fn inner<'a>(&'a self, types: &'a UniqueArena<Type>) -> &'a TypeInner {
        match self {
            Self::Handle(h) => &types[*h].inner,
            Self::Value(inner) => inner,
        }
    }

    /// The interned handle, if any.
    pub fn handle(&self) -> Option<Handle<Type>> {
        match *self {
            Self::Handle(h) => Some(h),
            Self::Value(_) => None,
        }
    }
}

/// Resolves expression types within one function (or at module scope).
#[derive(Clone, Copy)]
pub struct ResolveContext<'a> {
    pub module: &'a Module,
    pub function: Option<&'a Function>,
}

impl<'a> ResolveContext<'a> {
    /// A context for expressions in the body of `function`.
    pub fn new(module: &'a Module, function: &'a Function) -> Self {
        Self {
            module,
            function: Some(function),
        }
    }

    /// A context for module-scope initializers.
    pub fn module_scope(module: &'a Module) -> Self {
        Self {
            module,
            function: None,
        }
    }

    fn context_name(&self) -> String {
        self.function
            .map(|f| f.name.clone())
            .unwrap_or_else(|| "<module>".into())
    }

    fn types(&self) -> &'a UniqueArena<Type> {
        &self.module.types
    }

    fn mismatch(&self, expected: &str, found: &TypeInner) -> IrError {
        IrError::TypeMismatch {
            context: self.context_name(),
            expected: expected.into(),
            found: format_type_inner(found, self.types()),
        }
    }

    fn check_type(&self, ty: Handle<Type>) -> Result<(), IrError> {
        if self.types().try_get(ty).is_none() {
            return Err(IrError::BadHandle {
                kind: "type",
                index: ty.index(),
                size: self.types().len(),
            });
        }
        Ok(())
    }

    /// Resolves the shape of `expr`, cloned.
    pub fn resolve_inner(&self, expr: &Expression) -> Result<TypeInner, IrError> {
        Ok(self.resolve(expr)?.inner(self.types()).clone())
    }

    /// Resolves the value type of `expr`, looking through pointers: the
    /// type a `Load` of the expression would produce.
    pub fn resolve_pointee(&self, expr: &Expression) -> Result<TypeInner, IrError> {
        match self.resolve_inner(expr)? {
            TypeInner::Pointer { base, .. } => Ok(self.types()[base].inner.clone()),
            TypeInner::ValuePointer {
                size: Some(size),
                scalar,
                ..
            } => Ok(TypeInner::Vector { size, scalar }),
            TypeInner::ValuePointer {
                size: None, scalar, ..
            } => Ok(TypeInner::Scalar(scalar)),
            other => Ok(other),
        }
    }

    /// Resolves the type of `expr`.
    pub fn resolve(&self, expr: &Expression) -> Result<TypeResolution, IrError> {
        use TypeResolution as R;
        let types = self.types();
        Ok(match *expr {
            Expression::Literal(lit) => R::Value(TypeInner::Scalar(lit.scalar())),
            Expression::ZeroValue(ty) | Expression::Compose { ty, .. } => {
                self.check_type(ty)?;
                R::Handle(ty)
            }
            Expression::Splat { size, ref value } => {
                let inner = self.resolve_inner(value)?;
                match inner {
                    TypeInner::Scalar(scalar) => R::Value(TypeInner::Vector { size, scalar }),
                    other => return Err(self.mismatch("scalar", &other)),
                }
            }
            Expression::Swizzle {
                ref vector,
                ref pattern,
            } => {
                let inner = self.resolve_inner(vector)?;
                let scalar = match inner {
                    TypeInner::Vector { scalar, .. } => scalar,
                    other => return Err(self.mismatch("vector", &other)),
                };
                let size = VectorSize::from_u32(pattern.len() as u32).ok_or_else(|| {
                    IrError::invalid(self.context_name(), "swizzle must select 2 to 4 components")
                })?;
                R::Value(TypeInner::Vector { size, scalar })
            }
            Expression::FunctionArgument(index) => {
                let function = self.function.ok_or_else(|| {
                    IrError::invalid("<module>", "function argument outside of a function")
                })?;
                let arg = function.arguments.get(index as usize).ok_or_else(|| {
                    IrError::invalid(
                        self.context_name(),
                        format!("argument index {index} out of range"),
                    )
                })?;
                R::Handle(arg.ty)
            }
            Expression::GlobalVariable(h) => {
                let var = self
                    .module
                    .global_variables
                    .try_get(h)
                    .ok_or(IrError::BadHandle {
                        kind: "global",
                        index: h.index(),
                        size: self.module.global_variables.len(),
                    })?;
                if var.space == AddressSpace::Handle {
                    R::Handle(var.ty)
                } else {
                    R::Value(TypeInner::Pointer {
                        base: var.ty,
                        space: var.space,
                        access: var.access,
                    })
                }
            }
            Expression::LocalVariable(h) => {
                let function = self.function.ok_or_else(|| {
                    IrError::invalid("<module>", "local variable outside of a function")
                })?;
                let local = function.locals.try_get(h).ok_or(IrError::BadHandle {
                    kind: "local",
                    index: h.index(),
                    size: function.locals.len(),
                })?;
                match local.kind {
                    LocalKind::Let => R::Handle(local.ty),
                    LocalKind::Var => R::Value(TypeInner::Pointer {
                        base: local.ty,
                        space: AddressSpace::Function,
                        access: StorageAccess::LOAD_STORE,
                    }),
                }
            }
            Expression::Override(h) => {
                let o = self.module.overrides.try_get(h).ok_or(IrError::BadHandle {
                    kind: "override",
                    index: h.index(),
                    size: self.module.overrides.len(),
                })?;
                R::Handle(o.ty)
            }
            Expression::Load { ref pointer } => match self.resolve_inner(pointer)? {
                TypeInner::Pointer { base, .. } => match types[base].inner {
                    TypeInner::Atomic(scalar) => R::Value(TypeInner::Scalar(scalar)),
                    _ => R::Handle(base),
                },
                TypeInner::ValuePointer {
                    size: Some(size),
                    scalar,
                    ..
                } => R::Value(TypeInner::Vector { size, scalar }),
                TypeInner::ValuePointer {
                    size: None, scalar, ..
                } => R::Value(TypeInner::Scalar(scalar)),
                other => return Err(self.mismatch("pointer", &other)),
            },
            Expression::Access { ref base, .. } => self.resolve_access(base, None)?,
            Expression::AccessIndex { ref base, index } => self.resolve_access(base, Some(index))?,
            Expression::Unary { ref expr, .. } => self.resolve(expr)?,
            Expression::Binary {
                op,
                ref left,
                ref right,
            } => self.resolve_binary(op, left, right)?,
            Expression::Convert { ty, .. } | Expression::Bitcast { ty, .. } => {
                self.check_type(ty)?;
                R::Handle(ty)
            }
            Expression::Call { function, .. } => {
                let callee =
                    self.module
                        .functions
                        .try_get(function)
                        .ok_or(IrError::BadHandle {
                            kind: "function",
                            index: function.index(),
                            size: self.module.functions.len(),
                        })?;
                match callee.result {
                    Some(ref result) => R::Handle(result.ty),
                    None => {
                        return Err(IrError::NoValue {
                            context: self.context_name(),
                            detail: format!("call of void function '{}'", callee.name),
                        });
                    }
                }
            }
            Expression::Builtin { fun, ref arguments } => self.resolve_builtin(fun, arguments)?,
            Expression::Texture(ref call) => {
                let (class, dim) = match self.resolve_inner(&call.texture)? {
                    TypeInner::Texture { class, dim } => (class, dim),
                    other => return Err(self.mismatch("texture", &other)),
                };
                let vec4 = |scalar| {
                    R::Value(TypeInner::Vector {
                        size: VectorSize::Quad,
                        scalar,
                    })
                };
                match call.fun {
                    TextureFn::Sample
                    | TextureFn::SampleBias
                    | TextureFn::SampleLevel
                    | TextureFn::SampleGrad
                    | TextureFn::SampleBaseClampToEdge
                    | TextureFn::Load => {
                        if class.is_depth() {
                            R::Value(TypeInner::Scalar(Scalar::F32))
                        } else {
                            vec4(class.texel_scalar())
                        }
                    }
                    TextureFn::SampleCompare | TextureFn::SampleCompareLevel => {
                        R::Value(TypeInner::Scalar(Scalar::F32))
                    }
                    TextureFn::Gather => vec4(class.texel_scalar()),
                    TextureFn::GatherCompare => vec4(Scalar::F32),
                    TextureFn::Store => {
                        return Err(IrError::NoValue {
                            context: self.context_name(),
                            detail: "textureStore".into(),
                        });
                    }
                    TextureFn::Dimensions => match VectorSize::from_u32(dim.size_components()) {
                        Some(size) => R::Value(TypeInner::Vector {
                            size,
                            scalar: Scalar::U32,
                        }),
                        None => R::Value(TypeInner::Scalar(Scalar::U32)),
                    },
                    TextureFn::NumLayers | TextureFn::NumLevels | TextureFn::NumSamples => {
                        R::Value(TypeInner::Scalar(Scalar::U32))
                    }
                }
            }
        })
    }

    fn resolve_access(
        &self,
        base: &Expression,
        index: Option<u32>,
    ) -> Result<TypeResolution, IrError> {
        use TypeResolution as R;
        let types = self.types();
        let base_inner = self.resolve_inner(base)?;
        let member = |members: &[crate::StructMember]| -> Result<Handle<Type>, IrError> {
            let i = index.ok_or_else(|| {
                IrError::invalid(self.context_name(), "dynamic index into a struct")
            })?;
            members.get(i as usize).map(|m| m.ty).ok_or_else(|| {
                IrError::invalid(
                    self.context_name(),
                    format!("member index {i} out of range"),
                )
            })
        };
        Ok(match base_inner {
            TypeInner::Vector { scalar, .. } => R::Value(TypeInner::Scalar(scalar)),
            TypeInner::Matrix { rows, scalar, .. } => R::Value(TypeInner::Vector {
                size: rows,
                scalar,
            }),
            TypeInner::Array { base, .. } => R::Handle(base),
            TypeInner::Struct { ref members, .. } => R::Handle(member(members)?),
            TypeInner::ValuePointer {
                size: Some(_),
                scalar,
                space,
                access,
            } => R::Value(TypeInner::ValuePointer {
                size: None,
                scalar,
                space,
                access,
            }),
            TypeInner::Pointer {
                base: pointee,
                space,
                access,
            } => match types[pointee].inner {
                TypeInner::Vector { scalar, .. } => R::Value(TypeInner::ValuePointer {
                    size: None,
                    scalar,
                    space,
                    access,
                }),
                TypeInner::Matrix { rows, scalar, .. } => R::Value(TypeInner::ValuePointer {
                    size: Some(rows),
                    scalar,
                    space,
                    access,
                }),
                TypeInner::Array { base, .. } => R::Value(TypeInner::Pointer {
                    base,
                    space,
                    access,
                }),
                TypeInner::Struct { ref members, .. } => R::Value(TypeInner::Pointer {
                    base: member(members)?,
                    space,
                    access,
                }),
                ref other => return Err(self.mismatch("indexable pointer", other)),
            },
            other => return Err(self.mismatch("indexable value", &other)),
        })
    }

    fn resolve_binary(
        &self,
        op: BinaryOp,
        left: &Expression,
        right: &Expression,
    ) -> Result<TypeResolution, IrError> {
        use TypeResolution as R;
        let l = self.resolve(left)?;
        let r = self.resolve(right)?;
        let types = self.types();
        let li = l.inner(types);
        let ri = r.inner(types);
        if op.is_comparison() {
            return Ok(R::Value(match *li {
                TypeInner::Vector { size, .. } => TypeInner::Vector {
                    size,
                    scalar: Scalar::BOOL,
                },
                _ => TypeInner::Scalar(Scalar::BOOL),
            }));
        }
        if op == BinaryOp::Multiply {
            match (li, ri) {
                (
                    TypeInner::Matrix { rows, scalar, .. },
                    TypeInner::Vector { .. },
                ) => {
                    return Ok(R::Value(TypeInner::Vector {
                        size: *rows,
                        scalar: *scalar,
                    }));
                }
                (
                    TypeInner::Vector { .. },
                    TypeInner::Matrix {
                        columns, scalar, ..
                    },
                ) => {
                    return Ok(R::Value(TypeInner::Vector {
                        size: *columns,
                        scalar: *scalar,
                    }));
                }
                (
                    TypeInner::Matrix { rows, scalar, .. },
                    TypeInner::Matrix { columns, .. },
                ) => {
                    return Ok(R::Value(TypeInner::Matrix {
                        columns: *columns,
                        rows: *rows,
                        scalar: *scalar,
                    }));
                }
                (TypeInner::Scalar(_), TypeInner::Matrix { .. } | TypeInner::Vector { .. }) => {
                    return Ok(r);
                }
                _ => {}
            }
        }
        if !op.is_shift()
            && matches!(li, TypeInner::Scalar(_))
            && matches!(ri, TypeInner::Vector { .. })
        {
            return Ok(r);
        }
        Ok(l)
    }

    fn resolve_builtin(
        &self,
        fun: BuiltinFn,
        args: &[Expression],
    ) -> Result<TypeResolution, IrError> {
        use BuiltinFn as B;
        use TypeResolution as R;
        let arg = |i: usize| -> Result<TypeInner, IrError> {
            let e = args.get(i).ok_or_else(|| {
                IrError::invalid(
                    self.context_name(),
                    format!("{} is missing argument {i}", fun.wgsl_name()),
                )
            })?;
            self.resolve_inner(e)
        };
        let first = || -> Result<TypeResolution, IrError> {
            let e = args.first().ok_or_else(|| {
                IrError::invalid(
                    self.context_name(),
                    format!("{} has no arguments", fun.wgsl_name()),
                )
            })?;
            self.resolve(e)
        };
        let scalar = |s: Scalar| R::Value(TypeInner::Scalar(s));
        let vector = |size: VectorSize, s: Scalar| R::Value(TypeInner::Vector { size, scalar: s });
        Ok(match fun {
            B::All | B::Any => scalar(Scalar::BOOL),
            B::ArrayLength
            | B::Pack2x16Float
            | B::Pack2x16Snorm
            | B::Pack2x16Unorm
            | B::Pack4x8Snorm
            | B::Pack4x8Unorm
            | B::Pack4xI8
            | B::Pack4xU8
            | B::Dot4U8Packed => scalar(Scalar::U32),
            B::Dot4I8Packed => scalar(Scalar::I32),
            B::Unpack2x16Float | B::Unpack2x16Snorm | B::Unpack2x16Unorm => {
                vector(VectorSize::Bi, Scalar::F32)
            }
            B::Unpack4x8Snorm | B::Unpack4x8Unorm => vector(VectorSize::Quad, Scalar::F32),
            B::Unpack4xI8 => vector(VectorSize::Quad, Scalar::I32),
            B::Unpack4xU8 => vector(VectorSize::Quad, Scalar::U32),
            B::Dot | B::Length | B::Distance | B::Determinant => match arg(0)?.scalar() {
                Some(s) => scalar(s),
                None => return Err(self.mismatch("numeric", &arg(0)?)),
            },
            B::Transpose => match arg(0)? {
                TypeInner::Matrix {
                    columns,
                    rows,
                    scalar,
                } => R::Value(TypeInner::Matrix {
                    columns: rows,
                    rows: columns,
                    scalar,
                }),
                other => return Err(self.mismatch("matrix", &other)),
            },
            B::Step | B::Ldexp | B::Mix | B::Select => first()?,
            B::SmoothStep => R::Value(arg(2)?),
            B::Modf | B::Frexp => {
                let name = predeclared::result_name(fun, &arg(0)?);
                self.find_predeclared(&name)?
            }
            B::AtomicLoad
            | B::AtomicAdd
            | B::AtomicSub
            | B::AtomicMax
            | B::AtomicMin
            | B::AtomicAnd
            | B::AtomicOr
            | B::AtomicXor
            | B::AtomicExchange => match self.atomic_pointee(args)? {
                TypeInner::Atomic(s) | TypeInner::Scalar(s) => scalar(s),
                other => return Err(self.mismatch("atomic", &other)),
            },
            B::AtomicCompareExchangeWeak => {
                let pointee = self.atomic_pointee(args)?;
                let name = predeclared::result_name(fun, &pointee);
                self.find_predeclared(&name)?
            }
            B::AtomicStore => {
                return Err(IrError::NoValue {
                    context: self.context_name(),
                    detail: "atomicStore".into(),
                });
            }
            B::CountLeadingZeros
            | B::CountOneBits
            | B::CountTrailingZeros
            | B::FirstLeadingBit
            | B::FirstTrailingBit
            | B::ReverseBits
            | B::ExtractBits
            | B::InsertBits => {
                let r = first()?;
                match r.inner(self.types()).scalar_kind() {
                    Some(ScalarKind::Sint | ScalarKind::Uint) => r,
                    _ => return Err(self.mismatch("integer", r.inner(self.types()))),
                }
            }
            _ => first()?,
        })
    }

    fn atomic_pointee(&self, args: &[Expression]) -> Result<TypeInner, IrError> {
        let pointer = args.first().ok_or_else(|| {
            IrError::invalid(self.context_name(), "atomic builtin without pointer")
        })?;
        self.resolve_pointee(pointer)
    }

    fn find_predeclared(&self, name: &str) -> Result<TypeResolution, IrError> {
        self.module
            .types
            .iter()
            .find(|(_, ty)| ty.name.as_deref() == Some(name))
            .map(|(h, _)| TypeResolution::Handle(h))
            .ok_or_else(|| IrError::MissingPredeclared(name.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::expr::{Literal, SwizzleComponent};
    use crate::func::FunctionArgument;
    use crate::global::GlobalVariable;

    #[test]
    fn literals_and_vectors() {
        let module = Module::default();
        let f = Function::new("f");
        let ctx = ResolveContext::new(&module, &f);
        assert_eq!(
            ctx.resolve_inner(&Expression::u32(1)).unwrap(),
            TypeInner::Scalar(Scalar::U32)
        );
        let splat = Expression::Splat {
            size: VectorSize::Tri,
            value: Box::new(Expression::f32(1.0)),
        };
        assert_eq!(
            ctx.resolve_inner(&splat).unwrap(),
            TypeInner::Vector {
                size: VectorSize::Tri,
                scalar: Scalar::F32
            }
        );
        let swz = Expression::Swizzle {
            vector: Box::new(splat),
            pattern: vec![SwizzleComponent::X, SwizzleComponent::Y],
        };
        assert_eq!(
            ctx.resolve_inner(&swz).unwrap().vector_size(),
            Some(VectorSize::Bi)
        );
    }

    #[test]
    fn storage_access_chain_produces_pointers() {
        let mut module = Module::default();
        let f32_ty = module.scalar_type(Scalar::F32);
        let vec4 = module.vector_type(VectorSize::Quad, Scalar::F32);
        let arr = module.runtime_array_type(vec4);
        let s = module.struct_type("S", &[("pad", f32_ty), ("data", arr)]);
        let g = module
            .global_variables
            .append(GlobalVariable::new("sb", AddressSpace::Storage, s).with_binding(0, 0));
        let f = Function::new("f");
        let ctx = ResolveContext::new(&module, &f);
        let elem = Expression::access(
            Expression::access_index(Expression::GlobalVariable(g), 1),
            Expression::u32(3),
        );
        assert!(matches!(
            ctx.resolve_inner(&elem).unwrap(),
            TypeInner::Pointer { base, space: AddressSpace::Storage, .. } if base == vec4
        ));
        let comp = Expression::access_index(elem.clone(), 2);
        assert!(matches!(
            ctx.resolve_inner(&comp).unwrap(),
            TypeInner::ValuePointer { size: None, scalar: Scalar::F32, .. }
        ));
        assert_eq!(
            ctx.resolve_inner(&Expression::load(comp)).unwrap(),
            TypeInner::Scalar(Scalar::F32)
        );
    }

    #[test]
    fn matrix_vector_products() {
        let mut module = Module::default();
        let mat = module.insert_type(TypeInner::Matrix {
            columns: VectorSize::Quad,
            rows: VectorSize::Bi,
            scalar: Scalar::F32,
        });
        let v4 = module.vector_type(VectorSize::Quad, Scalar::F32);
        let v2 = module.vector_type(VectorSize::Bi, Scalar::F32);
        let mut f = Function::new("f");
        for (name, ty) in [("m", mat), ("a", v4), ("b", v2)] {
            f.arguments.push(FunctionArgument {
                name: name.into(),
                ty,
                binding: None,
            });
        }
        let ctx = ResolveContext::new(&module, &f);
        let mv = Expression::binary(
            BinaryOp::Multiply,
            Expression::FunctionArgument(0),
            Expression::FunctionArgument(1),
        );
        assert_eq!(ctx.resolve_inner(&mv).unwrap().vector_size(), Some(VectorSize::Bi));
        let vm = Expression::binary(
            BinaryOp::Multiply,
            Expression::FunctionArgument(2),
            Expression::FunctionArgument(0),
        );
        assert_eq!(ctx.resolve_inner(&vm).unwrap().vector_size(), Some(VectorSize::Quad));
        let cmp = Expression::binary(
            BinaryOp::Less,
            Expression::FunctionArgument(1),
            Expression::FunctionArgument(1),
        );
        assert_eq!(
            ctx.resolve_inner(&cmp).unwrap(),
            TypeInner::Vector {
                size: VectorSize::Quad,
                scalar: Scalar::BOOL
            }
        );
    }

    #[test]
    fn modf_needs_predeclared_struct() {
        let mut module = Module::default();
        let f = Function::new("f");
        let call = Expression::builtin(BuiltinFn::Modf, vec![Expression::f32(1.5)]);
        {
            let ctx = ResolveContext::new(&module, &f);
            assert_eq!(
                ctx.resolve(&call),
                Err(IrError::MissingPredeclared("__modf_result_f32".into()))
            );
        }
        let ty = module.predeclared_type(BuiltinFn::Modf, &TypeInner::Scalar(Scalar::F32));
        let ctx = ResolveContext::new(&module, &f);
        assert_eq!(ctx.resolve(&call).unwrap(), TypeResolution::Handle(ty));
    }

    #[test]
    fn void_call_has_no_value() {
        let mut module = Module::default();
        let callee = module.functions.append(Function::new("g"));
        let f = Function::new("f");
        let ctx = ResolveContext::new(&module, &f);
        assert!(matches!(
            ctx.resolve(&Expression::call(callee, vec![])),
            Err(IrError::NoValue { .. })
        ));
        assert!(matches!(
            ctx.resolve(&Expression::Literal(Literal::Bool(true))),
            Ok(TypeResolution::Value(TypeInner::Scalar(Scalar::BOOL)))
        ));
    }
}
