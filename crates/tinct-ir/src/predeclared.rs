//! Result structs of builtins that return more than one value.

use crate::expr::BuiltinFn;
use crate::types::{Scalar, ScalarKind, TypeInner};

fn shape_suffix(inner: &TypeInner) -> String {
    let scalar = |s: Scalar| match (s.kind, s.width) {
        (ScalarKind::Float, 2) => "f16",
        (ScalarKind::Float, _) => "f32",
        (ScalarKind::Sint, _) => "i32",
        (ScalarKind::Uint, _) => "u32",
        (ScalarKind::Bool, _) => "bool",
    };
    match *inner {
        TypeInner::Vector { size, scalar: s } => format!("vec{}_{}", size.count(), scalar(s)),
        TypeInner::Scalar(s) | TypeInner::Atomic(s) => scalar(s).to_string(),
        _ => "unknown".to_string(),
    }
}

/// Name of the struct returned by `fun` applied to an argument of shape
/// `arg` (for atomics, the pointee).
pub fn result_name(fun: BuiltinFn, arg: &TypeInner) -> String {
    let prefix = match fun {
        BuiltinFn::Modf => "__modf_result",
        BuiltinFn::Frexp => "__frexp_result",
        BuiltinFn::AtomicCompareExchangeWeak => "__atomic_compare_exchange_result",
        _ => "__result",
    };
    format!("{prefix}_{}", shape_suffix(arg))
}

/// Member names and shapes of the result struct, in declaration order.
pub fn result_members(fun: BuiltinFn, arg: &TypeInner) -> Vec<(&'static str, TypeInner)> {
    match fun {
        BuiltinFn::Modf => vec![("fract", arg.clone()), ("whole", arg.clone())],
        BuiltinFn::Frexp => {
            let exp = arg.with_scalar(Scalar::I32).unwrap_or(TypeInner::Scalar(Scalar::I32));
            vec![("fract", arg.clone()), ("exp", exp)]
        }
        BuiltinFn::AtomicCompareExchangeWeak => {
            let scalar = arg.scalar().unwrap_or(Scalar::I32);
            vec![
                ("old_value", TypeInner::Scalar(scalar)),
                ("exchanged", TypeInner::Scalar(Scalar::BOOL)),
            ]
        }
        _ => Vec::new(),
    }
}

/// Returns `true` for names produced by [`result_name`].
pub fn is_predeclared_name(name: &str) -> bool {
    name.starts_with("__modf_result")
        || name.starts_with("__frexp_result")
        || name.starts_with("__atomic_compare_exchange_result")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::VectorSize;

    #[test]
    fn names() {
        let v3 = TypeInner::Vector {
            size: VectorSize::Tri,
            scalar: Scalar::F32,
        };
        assert_eq!(result_name(BuiltinFn::Modf, &v3), "__modf_result_vec3_f32");
        assert_eq!(
            result_name(BuiltinFn::Frexp, &TypeInner::Scalar(Scalar::F16)),
            "__frexp_result_f16"
        );
        assert_eq!(
            result_name(BuiltinFn::AtomicCompareExchangeWeak, &TypeInner::Atomic(Scalar::U32)),
            "__atomic_compare_exchange_result_u32"
        );
        assert!(is_predeclared_name("__modf_result_f32"));
        assert!(!is_predeclared_name("modf_result"));
    }

    #[test]
    fn frexp_exponent_is_integer() {
        let members = result_members(
            BuiltinFn::Frexp,
            &TypeInner::Vector {
                size: VectorSize::Bi,
                scalar: Scalar::F32,
            },
        );
        assert_eq!(
            members[1].1,
            TypeInner::Vector {
                size: VectorSize::Bi,
                scalar: Scalar::I32
            }
        );
    }
}
