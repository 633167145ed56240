//! Size and alignment of types under WGSL's host-shareable layout rules.

use crate::arena::{Handle, UniqueArena};
use crate::types::{ArraySize, StructMember, Type, TypeInner, VectorSize};

/// Size and alignment of a type, in bytes.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct TypeLayout {
    pub size: u32,
    pub align: u32,
}

/// Rounds `value` up to a multiple of `align`.
pub fn round_up(align: u32, value: u32) -> u32 {
    if align <= 1 {
        value
    } else {
        value.div_ceil(align) * align
    }
}

/// Layout of a vector of `size` components `width` bytes wide.
pub fn vector_layout(size: VectorSize, width: u32) -> TypeLayout {
    let n = size.count();
    TypeLayout {
        size: n * width,
        align: if n == 2 { 2 * width } else { 4 * width },
    }
}

/// Layout of the type `ty`.
pub fn layout_of(types: &UniqueArena<Type>, ty: Handle<Type>) -> TypeLayout {
    layout_of_inner(types, &types[ty].inner)
}

/// Layout of a type shape. Opaque and pointer types report a zero size.
pub fn layout_of_inner(types: &UniqueArena<Type>, inner: &TypeInner) -> TypeLayout {
    match *inner {
        TypeInner::Scalar(s) | TypeInner::Atomic(s) => {
            let w = u32::from(s.width).max(if s.kind == crate::ScalarKind::Bool { 4 } else { 1 });
            TypeLayout { size: w, align: w }
        }
        TypeInner::Vector { size, scalar } => vector_layout(size, u32::from(scalar.width)),
        TypeInner::Matrix {
            columns,
            rows,
            scalar,
        } => {
            let col = vector_layout(rows, u32::from(scalar.width));
            TypeLayout {
                size: columns.count() * round_up(col.align, col.size),
                align: col.align,
            }
        }
        TypeInner::Array { base, size, stride } => {
            let elem = layout_of(types, base);
            let count = match size {
                ArraySize::Constant(n) => n,
                ArraySize::Runtime => 1,
            };
            TypeLayout {
                size: count * stride,
                align: elem.align,
            }
        }
        TypeInner::Struct { ref members, span } => TypeLayout {
            size: span,
            align: members
                .iter()
                .map(|m| layout_of(types, m.ty).align)
                .max()
                .unwrap_or(1),
        },
        TypeInner::Pointer { .. }
        | TypeInner::ValuePointer { .. }
        | TypeInner::Sampler { .. }
        | TypeInner::Texture { .. } => TypeLayout { size: 0, align: 1 },
    }
}

/// Natural array stride for elements of type `base`.
pub fn array_stride(types: &UniqueArena<Type>, base: Handle<Type>) -> u32 {
    let l = layout_of(types, base);
    round_up(l.align, l.size)
}

/// Lays out struct members in declaration order, returning the members
/// with offsets assigned and the struct span.
pub fn layout_struct(
    types: &UniqueArena<Type>,
    members: Vec<(String, Handle<Type>)>,
) -> (Vec<StructMember>, u32) {
    let mut offset = 0;
    let mut align = 1;
    let mut out = Vec::with_capacity(members.len());
    for (name, ty) in members {
        let l = layout_of(types, ty);
        offset = round_up(l.align, offset);
        align = align.max(l.align);
        out.push(StructMember {
            name,
            ty,
            binding: None,
            offset,
        });
        offset += l.size;
    }
    (out, round_up(align, offset))
}

/// Returns `true` if a value of type `ty` has bytes that are not covered
/// by any scalar component: gaps between struct members, trailing struct
/// padding, or array strides larger than the element.
pub fn has_padding(types: &UniqueArena<Type>, ty: Handle<Type>) -> bool {
    match types[ty].inner {
        TypeInner::Struct { ref members, span } => {
            let mut end = 0;
            for m in members {
                if m.offset != end || has_padding(types, m.ty) {
                    return true;
                }
                end = m.offset + layout_of(types, m.ty).size;
            }
            end != span
        }
        TypeInner::Array { base, stride, .. } => {
            stride != layout_of(types, base).size || has_padding(types, base)
        }
        TypeInner::Matrix { rows, .. } => rows == VectorSize::Tri,
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Module;
    use crate::types::Scalar;

    #[test]
    fn vector_and_matrix_layouts() {
        let module = Module::default();
        let vec3 = TypeInner::Vector {
            size: VectorSize::Tri,
            scalar: Scalar::F32,
        };
        assert_eq!(
            layout_of_inner(&module.types, &vec3),
            TypeLayout { size: 12, align: 16 }
        );
        let mat2x3 = TypeInner::Matrix {
            columns: VectorSize::Bi,
            rows: VectorSize::Tri,
            scalar: Scalar::F32,
        };
        assert_eq!(
            layout_of_inner(&module.types, &mat2x3),
            TypeLayout { size: 32, align: 16 }
        );
        let mat3x2h = TypeInner::Matrix {
            columns: VectorSize::Tri,
            rows: VectorSize::Bi,
            scalar: Scalar::F16,
        };
        assert_eq!(
            layout_of_inner(&module.types, &mat3x2h),
            TypeLayout { size: 12, align: 4 }
        );
    }

    #[test]
    fn struct_offsets_follow_alignment() {
        let mut module = Module::default();
        let f32_ty = module.scalar_type(Scalar::F32);
        let vec3 = module.vector_type(VectorSize::Tri, Scalar::F32);
        let (members, span) = layout_struct(
            &module.types,
            vec![("a".into(), f32_ty), ("b".into(), vec3), ("c".into(), f32_ty)],
        );
        let offsets: Vec<u32> = members.iter().map(|m| m.offset).collect();
        assert_eq!(offsets, vec![0, 16, 28]);
        assert_eq!(span, 32);
    }

    #[test]
    fn padding_detection() {
        let mut module = Module::default();
        let f32_ty = module.scalar_type(Scalar::F32);
        let vec3 = module.vector_type(VectorSize::Tri, Scalar::F32);
        let packed = module.struct_type("Packed", &[("a", f32_ty), ("b", f32_ty)]);
        assert!(!has_padding(&module.types, packed));
        let padded = module.struct_type("Padded", &[("a", f32_ty), ("b", vec3)]);
        assert!(has_padding(&module.types, padded));
        let arr = module.array_type(vec3, 4);
        assert!(has_padding(&module.types, arr));
    }

    #[test]
    fn round_up_values() {
        assert_eq!(round_up(16, 17), 32);
        assert_eq!(round_up(4, 8), 8);
        assert_eq!(round_up(1, 3), 3);
    }
}
