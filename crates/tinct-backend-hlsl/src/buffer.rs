//! Storage and uniform buffer access.
//!
//! Storage buffers are `ByteAddressBuffer`s and uniform buffers `uint4`
//! arrays, so every access chain rooted at one is flattened to a byte
//! offset. Scalars and vectors are read in place; composites go through
//! a per-buffer helper that reads or writes them member by member.

use tinct_backend_core::{BackendError, TextBuffer};
use tinct_ir::layout::{round_up, vector_layout};
use tinct_ir::{
    AddressSpace, BuiltinFn, Expression, Handle, Literal, Scalar, ScalarKind, Type, TypeInner,
};

use crate::writer::{FnCtx, Writer, ice, swizzle, unsupported};

/// A byte offset: dynamic terms plus a constant.
#[derive(Clone, Debug, Default, PartialEq)]
pub(crate) struct Offset {
    terms: Vec<String>,
    constant: u32,
}

impl Offset {
    fn param() -> Self {
        Self {
            terms: vec!["offset".to_string()],
            constant: 0,
        }
    }

    fn constant(&self) -> Option<u32> {
        self.terms.is_empty().then_some(self.constant)
    }

    fn plus(&self, constant: u32) -> Self {
        Self {
            terms: self.terms.clone(),
            constant: self.constant + constant,
        }
    }

    fn text(&self) -> String {
        if self.terms.is_empty() {
            return format!("{}u", self.constant);
        }
        let mut parts = self.terms.clone();
        if self.constant != 0 {
            parts.push(format!("{}u", self.constant));
        }
        match parts.as_slice() {
            [only] => only.clone(),
            _ => format!("({})", parts.join(" + ")),
        }
    }
}

/// A reference into a buffer, resolved to a byte offset.
#[derive(Clone, Debug)]
pub(crate) struct BufferRef {
    name: String,
    space: AddressSpace,
    offset: Offset,
    inner: TypeInner,
    /// The interned type of the referenced value, when there is one.
    ty: Option<Handle<Type>>,
}

enum Index {
    Constant(u32),
    Dynamic(String),
}

fn from_bits(scalar: Scalar, bits: String) -> String {
    match scalar.kind {
        ScalarKind::Sint => format!("asint({bits})"),
        ScalarKind::Float => format!("asfloat({bits})"),
        _ => bits,
    }
}

fn to_bits(scalar: Scalar, value: &str) -> String {
    match scalar.kind {
        ScalarKind::Uint => value.to_string(),
        _ => format!("asuint({value})"),
    }
}

fn count_suffix(n: u32) -> String {
    if n == 1 { String::new() } else { n.to_string() }
}

impl<'a> Writer<'a> {
    fn lookup(&self, inner: &TypeInner) -> Option<Handle<Type>> {
        self.types().get(&Type {
            name: None,
            inner: inner.clone(),
        })
    }

    fn type_key(r: &BufferRef) -> String {
        match r.ty {
            Some(h) => format!("{h:?}"),
            None => format!("{:?}", r.inner),
        }
    }

    /// Resolves `pointer` to a buffer reference, or `None` when it is not
    /// rooted at a storage or uniform buffer.
    pub(crate) fn buffer_ref(
        &mut self,
        f: &mut FnCtx<'a>,
        pointer: &Expression,
    ) -> Result<Option<BufferRef>, BackendError> {
        match *pointer {
            Expression::GlobalVariable(h) => {
                let g = self.global(h)?;
                if !matches!(g.space, AddressSpace::Storage | AddressSpace::Uniform) {
                    return Ok(None);
                }
                Ok(Some(BufferRef {
                    name: g.name.clone(),
                    space: g.space,
                    offset: Offset::default(),
                    inner: self.ty(g.ty)?.inner.clone(),
                    ty: Some(g.ty),
                }))
            }
            Expression::AccessIndex { ref base, index } => {
                let Some(mut r) = self.buffer_ref(f, base)? else {
                    return Ok(None);
                };
                self.step(&mut r, Index::Constant(index))?;
                Ok(Some(r))
            }
            Expression::Access {
                ref base,
                ref index,
            } => {
                let Some(mut r) = self.buffer_ref(f, base)? else {
                    return Ok(None);
                };
                let index = match **index {
                    Expression::Literal(Literal::U32(v)) => Index::Constant(v),
                    Expression::Literal(Literal::I32(v)) if v >= 0 => Index::Constant(v as u32),
                    ref e => {
                        let signed = f.ty(e)?.scalar_kind() == Some(ScalarKind::Sint);
                        let text = self.expr(f, e)?;
                        Index::Dynamic(if signed { format!("uint({text})") } else { text })
                    }
                };
                self.step(&mut r, index)?;
                Ok(Some(r))
            }
            _ => Ok(None),
        }
    }

    fn step(&self, r: &mut BufferRef, index: Index) -> Result<(), BackendError> {
        let types = self.types();
        let (scale, ty, inner) = match r.inner {
            TypeInner::Struct { ref members, .. } => {
                let Index::Constant(i) = index else {
                    return Err(ice("dynamic index into a struct"));
                };
                let m = members
                    .get(i as usize)
                    .ok_or_else(|| ice(format!("member {i} out of range")))?;
                let (offset, ty) = (m.offset, m.ty);
                r.offset.constant += offset;
                r.ty = Some(ty);
                r.inner = types[ty].inner.clone();
                return Ok(());
            }
            TypeInner::Array { base, stride, .. } => (stride, Some(base), types[base].inner.clone()),
            TypeInner::Matrix { rows, scalar, .. } => {
                let column = vector_layout(rows, u32::from(scalar.width));
                let inner = TypeInner::Vector { size: rows, scalar };
                (round_up(column.align, column.size), self.lookup(&inner), inner)
            }
            TypeInner::Vector { scalar, .. } => {
                let inner = TypeInner::Scalar(scalar);
                (u32::from(scalar.width), self.lookup(&inner), inner)
            }
            ref other => return Err(ice(format!("cannot index into {other:?}"))),
        };
        match index {
            Index::Constant(i) => r.offset.constant += i * scale,
            Index::Dynamic(text) => r.offset.terms.push(format!("({text} * {scale}u)")),
        }
        r.ty = ty;
        r.inner = inner;
        Ok(())
    }

    fn child(r: &BufferRef, offset: Offset, ty: Option<Handle<Type>>, inner: TypeInner) -> BufferRef {
        BufferRef {
            name: r.name.clone(),
            space: r.space,
            offset,
            inner,
            ty,
        }
    }

    // Loads ---------------------------------------------------------------

    pub(crate) fn buffer_load(&mut self, r: &BufferRef) -> Result<String, BackendError> {
        match (r.space, &r.inner) {
            (AddressSpace::Storage, &(TypeInner::Scalar(s) | TypeInner::Atomic(s))) => {
                Ok(self.storage_load(r, s, 1))
            }
            (AddressSpace::Storage, &TypeInner::Vector { size, scalar }) => {
                Ok(self.storage_load(r, scalar, size.count()))
            }
            (AddressSpace::Uniform, &(TypeInner::Scalar(s) | TypeInner::Atomic(s))) => {
                self.uniform_load(r, s, 1)
            }
            (AddressSpace::Uniform, &TypeInner::Vector { size, scalar }) => {
                self.uniform_load(r, scalar, size.count())
            }
            _ => {
                let name = self.load_helper(r)?;
                Ok(format!("{name}({})", r.offset.text()))
            }
        }
    }

    fn storage_load(&self, r: &BufferRef, scalar: Scalar, n: u32) -> String {
        let (name, off) = (&r.name, r.offset.text());
        if scalar.width == 2 {
            let t = if n == 1 {
                "float16_t".to_string()
            } else {
                format!("{} ", Self::vector_name(n, scalar))
            };
            return format!("{name}.Load<{t}>({off})");
        }
        from_bits(scalar, format!("{name}.Load{}({off})", count_suffix(n)))
    }

    fn uniform_load(&self, r: &BufferRef, scalar: Scalar, n: u32) -> Result<String, BackendError> {
        if scalar.width == 2 {
            return Err(unsupported("f16 values in uniform buffers on HLSL"));
        }
        let name = &r.name;
        let bits = match r.offset.constant() {
            Some(o) => {
                let reg = format!("{name}[{}]", o / 16);
                let first = (o % 16) / 4;
                match n {
                    4 => reg,
                    _ => format!("{reg}.{}", swizzle(first, n)?),
                }
            }
            None => {
                let off = r.offset.text();
                let reg = format!("{name}[({off} / 16u)]");
                match n {
                    1 => format!("{reg}[(({off} % 16u) / 4u)]"),
                    2 => format!("((({off} % 16u) == 0u) ? {reg}.xy : {reg}.zw)"),
                    3 => format!("{reg}.xyz"),
                    _ => reg,
                }
            }
        };
        Ok(from_bits(scalar, bits))
    }

    /// `T <buffer>_load(uint offset)` for a matrix, array or struct.
    fn load_helper(&mut self, r: &BufferRef) -> Result<String, BackendError> {
        let key = format!("load {} {}", r.name, Self::type_key(r));
        let base = format!("{}_load", r.name);
        let r = r.clone();
        self.unique_helper(&base, key, move |w, name| {
            let mut b = TextBuffer::new();
            match r.inner {
                TypeInner::Matrix {
                    columns,
                    rows,
                    scalar,
                } => {
                    let t = w.inner_name(&r.inner)?;
                    let column = vector_layout(rows, u32::from(scalar.width));
                    let stride = round_up(column.align, column.size);
                    let inner = TypeInner::Vector { size: rows, scalar };
                    let mut parts = Vec::new();
                    for c in 0..columns.count() {
                        let col = Self::child(&r, Offset::param().plus(c * stride), None, inner.clone());
                        parts.push(w.buffer_load(&col)?);
                    }
                    b.line(format!("{t} {name}(uint offset) {{"));
                    b.indented(|b| b.line(format!("return {t}({});", parts.join(", "))));
                    b.line("}");
                }
                TypeInner::Struct { ref members, .. } => {
                    let ty = r.ty.ok_or_else(|| ice("unnamed struct in a buffer"))?;
                    let s = w.type_name(ty)?;
                    let mut parts = Vec::with_capacity(members.len());
                    for m in members {
                        let inner = w.ty(m.ty)?.inner.clone();
                        let field = Self::child(&r, Offset::param().plus(m.offset), Some(m.ty), inner);
                        parts.push(w.buffer_load(&field)?);
                    }
                    b.line(format!("{s} {name}(uint offset) {{"));
                    b.indented(|b| {
                        b.line(format!("{s} value = {{{}}};", parts.join(", ")));
                        b.line("return value;");
                    });
                    b.line("}");
                }
                TypeInner::Array {
                    base: elem,
                    size: tinct_ir::ArraySize::Constant(n),
                    stride,
                } => {
                    let ty = r.ty.ok_or_else(|| ice("array type without a handle"))?;
                    let typedef = w.namer.unique(&format!("{name}_ret"));
                    let decl = w.declare(ty, &typedef)?;
                    let arr = w.declare(ty, "arr")?;
                    let zero = w.zero(ty)?;
                    let inner = w.ty(elem)?.inner.clone();
                    let element = Self::child(
                        &r,
                        Offset {
                            terms: vec!["offset".into(), format!("(i * {stride}u)")],
                            constant: 0,
                        },
                        Some(elem),
                        inner,
                    );
                    let value = w.buffer_load(&element)?;
                    b.line(format!("typedef {decl};"));
                    b.line(format!("{typedef} {name}(uint offset) {{"));
                    b.indented(|b| {
                        b.line(format!("{arr} = {zero};"));
                        b.line("{");
                        b.indented(|b| {
                            b.line(format!("for(uint i = 0u; (i < {n}u); i = (i + 1u)) {{"));
                            b.indented(|b| b.line(format!("arr[i] = {value};")));
                            b.line("}");
                        });
                        b.line("}");
                        b.line("return arr;");
                    });
                    b.line("}");
                }
                ref other => {
                    return Err(ice(format!("cannot load {other:?} from a buffer as a whole")));
                }
            }
            Ok(b)
        })
    }

    // Stores --------------------------------------------------------------

    /// The statement text (without `;`) storing `value` through `r`.
    pub(crate) fn buffer_store(&mut self, r: &BufferRef, value: &str) -> Result<String, BackendError> {
        if r.space != AddressSpace::Storage {
            return Err(ice(format!("store into read-only buffer '{}'", r.name)));
        }
        let (name, off) = (&r.name, r.offset.text());
        let (scalar, n) = match r.inner {
            TypeInner::Scalar(s) | TypeInner::Atomic(s) => (s, 1),
            TypeInner::Vector { size, scalar } => (scalar, size.count()),
            _ => {
                let helper = self.store_helper(r)?;
                return Ok(format!("{helper}({off}, {value})"));
            }
        };
        if scalar.width == 2 {
            let t = if n == 1 {
                "float16_t".to_string()
            } else {
                format!("{} ", Self::vector_name(n, scalar))
            };
            return Ok(format!("{name}.Store<{t}>({off}, {value})"));
        }
        Ok(format!(
            "{name}.Store{}({off}, {})",
            count_suffix(n),
            to_bits(scalar, value)
        ))
    }

    /// `void <buffer>_store(uint offset, T value)` for a composite.
    fn store_helper(&mut self, r: &BufferRef) -> Result<String, BackendError> {
        let key = format!("store {} {}", r.name, Self::type_key(r));
        let base = format!("{}_store", r.name);
        let r = r.clone();
        self.unique_helper(&base, key, move |w, name| {
            let mut lines = Vec::new();
            let param = match r.inner {
                TypeInner::Matrix {
                    columns,
                    rows,
                    scalar,
                } => {
                    let column = vector_layout(rows, u32::from(scalar.width));
                    let stride = round_up(column.align, column.size);
                    let inner = TypeInner::Vector { size: rows, scalar };
                    for c in 0..columns.count() {
                        let col = Self::child(&r, Offset::param().plus(c * stride), None, inner.clone());
                        lines.push(format!("{};", w.buffer_store(&col, &format!("value[{c}u]"))?));
                    }
                    format!("{} value", w.inner_name(&r.inner)?)
                }
                TypeInner::Struct { ref members, .. } => {
                    let ty = r.ty.ok_or_else(|| ice("unnamed struct in a buffer"))?;
                    for m in members {
                        let inner = w.ty(m.ty)?.inner.clone();
                        let field = Self::child(&r, Offset::param().plus(m.offset), Some(m.ty), inner);
                        lines.push(format!("{};", w.buffer_store(&field, &format!("value.{}", m.name))?));
                    }
                    format!("{} value", w.type_name(ty)?)
                }
                TypeInner::Array {
                    base: elem,
                    size: tinct_ir::ArraySize::Constant(n),
                    stride,
                } => {
                    let ty = r.ty.ok_or_else(|| ice("array type without a handle"))?;
                    let inner = w.ty(elem)?.inner.clone();
                    let element = Self::child(
                        &r,
                        Offset {
                            terms: vec!["offset".into(), format!("(i * {stride}u)")],
                            constant: 0,
                        },
                        Some(elem),
                        inner,
                    );
                    let store = w.buffer_store(&element, "value[i]")?;
                    lines.push(format!("for(uint i = 0u; (i < {n}u); i = (i + 1u)) {{"));
                    lines.push(format!("  {store};"));
                    lines.push("}".to_string());
                    w.declare(ty, "value")?
                }
                ref other => {
                    return Err(ice(format!("cannot store {other:?} into a buffer as a whole")));
                }
            };
            let mut b = TextBuffer::new();
            b.line(format!("void {name}(uint offset, {param}) {{"));
            b.indented(|b| lines.into_iter().for_each(|l| b.line(l)));
            b.line("}");
            Ok(b)
        })
    }

    // Builtins ------------------------------------------------------------

    /// Atomics and `arrayLength`, whose first argument is a pointer.
    pub(crate) fn buffer_builtin(
        &mut self,
        f: &mut FnCtx<'a>,
        whole: &Expression,
        fun: BuiltinFn,
        arguments: &[Expression],
    ) -> Result<String, BackendError> {
        let [pointer, rest @ ..] = arguments else {
            return Err(ice(format!("{} without a pointer", fun.wgsl_name())));
        };
        if fun == BuiltinFn::ArrayLength {
            let r = self
                .buffer_ref(f, pointer)?
                .ok_or_else(|| ice("arrayLength of a value outside a storage buffer"))?;
            let TypeInner::Array { stride, .. } = r.inner else {
                return Err(ice("arrayLength of a non-array"));
            };
            let buffer = r.name.clone();
            let helper = self.unique_helper(
                &format!("{buffer}_byte_length"),
                format!("byte length {buffer}"),
                |_, name| {
                    let mut b = TextBuffer::new();
                    b.line(format!("uint {name}() {{"));
                    b.indented(|b| {
                        b.line("uint length = 0u;");
                        b.line(format!("{buffer}.GetDimensions(length);"));
                        b.line("return length;");
                    });
                    b.line("}");
                    Ok(b)
                },
            )?;
            return Ok(format!("(({helper}() - {}) / {stride}u)", r.offset.text()));
        }

        match f.ty(pointer)?.pointer_space() {
            Some(AddressSpace::Workgroup) => self.workgroup_atomic(f, whole, fun, arguments),
            Some(AddressSpace::Storage) => {
                let r = self
                    .buffer_ref(f, pointer)?
                    .ok_or_else(|| ice("storage atomic outside a buffer"))?;
                let values = rest
                    .iter()
                    .map(|e| self.expr(f, e))
                    .collect::<Result<Vec<_>, _>>()?;
                let result = match fun {
                    BuiltinFn::AtomicCompareExchangeWeak => Some(
                        f.types
                            .resolve(whole)?
                            .handle()
                            .ok_or_else(|| ice("atomicCompareExchangeWeak result type is not named"))?,
                    ),
                    _ => None,
                };
                let helper = self.storage_atomic(&r, fun, result)?;
                let mut args = vec![r.offset.text()];
                args.extend(values);
                Ok(format!("{helper}({})", args.join(", ")))
            }
            other => Err(ice(format!("atomic in address space {other:?}"))),
        }
    }

    /// `<buffer>_atomicX(uint offset, ...)` wrapping the `Interlocked`
    /// method of the buffer.
    fn storage_atomic(
        &mut self,
        r: &BufferRef,
        fun: BuiltinFn,
        result: Option<Handle<Type>>,
    ) -> Result<String, BackendError> {
        let TypeInner::Atomic(scalar) = r.inner else {
            return Err(ice("atomic builtin on a non-atomic"));
        };
        let buffer = r.name.clone();
        let base = format!("{buffer}_{}", fun.wgsl_name());
        let key = format!("{base} {}", Self::type_key(r));
        let t = Self::scalar_name(scalar);
        let zero = Self::literal(Literal::zero(scalar));
        self.unique_helper(&base, key, move |w, name| {
            let mut b = TextBuffer::new();
            match fun {
                BuiltinFn::AtomicLoad => {
                    b.line(format!("{t} {name}(uint offset) {{"));
                    b.indented(|b| {
                        b.line(format!("{t} value = {zero};"));
                        b.line(format!("{buffer}.InterlockedOr(offset, {zero}, value);"));
                        b.line("return value;");
                    });
                }
                BuiltinFn::AtomicStore => {
                    b.line(format!("void {name}(uint offset, {t} value) {{"));
                    b.indented(|b| {
                        b.line(format!("{t} ignored;"));
                        b.line(format!("{buffer}.InterlockedExchange(offset, value, ignored);"));
                    });
                }
                BuiltinFn::AtomicCompareExchangeWeak => {
                    let ty = result.ok_or_else(|| ice("compare-exchange without a result type"))?;
                    let TypeInner::Struct { ref members, .. } = w.ty(ty)?.inner else {
                        return Err(ice("atomicCompareExchangeWeak result is not a struct"));
                    };
                    let [old, exchanged] = members.as_slice() else {
                        return Err(ice("atomicCompareExchangeWeak result needs two members"));
                    };
                    let s = w.type_name(ty)?;
                    let (old, exchanged) = (old.name.clone(), exchanged.name.clone());
                    b.line(format!("{s} {name}(uint offset, {t} compare, {t} value) {{"));
                    b.indented(|b| {
                        b.line(format!("{s} result = ({s})0;"));
                        b.line(format!(
                            "{buffer}.InterlockedCompareExchange(offset, compare, value, result.{old});"
                        ));
                        b.line(format!("result.{exchanged} = (result.{old} == compare);"));
                        b.line("return result;");
                    });
                }
                _ => {
                    let (method, operand) = match fun {
                        BuiltinFn::AtomicAdd => ("InterlockedAdd", "value"),
                        BuiltinFn::AtomicSub => ("InterlockedAdd", "-(value)"),
                        BuiltinFn::AtomicMax => ("InterlockedMax", "value"),
                        BuiltinFn::AtomicMin => ("InterlockedMin", "value"),
                        BuiltinFn::AtomicAnd => ("InterlockedAnd", "value"),
                        BuiltinFn::AtomicOr => ("InterlockedOr", "value"),
                        BuiltinFn::AtomicXor => ("InterlockedXor", "value"),
                        BuiltinFn::AtomicExchange => ("InterlockedExchange", "value"),
                        other => {
                            return Err(ice(format!("{} is not an atomic", other.wgsl_name())));
                        }
                    };
                    b.line(format!("{t} {name}(uint offset, {t} value) {{"));
                    b.indented(|b| {
                        b.line(format!("{t} original_value = {zero};"));
                        b.line(format!(
                            "{buffer}.{method}(offset, {operand}, original_value);"
                        ));
                        b.line("return original_value;");
                    });
                }
            }
            b.line("}");
            Ok(b)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::Options;
    use tinct_ir::{GlobalVariable, Module, StorageAccess, VectorSize};

    #[test]
    fn offset_text() {
        assert_eq!(Offset::default().plus(16).text(), "16u");
        assert_eq!(Offset::param().text(), "offset");
        assert_eq!(Offset::param().plus(8).text(), "(offset + 8u)");
        let dynamic = Offset {
            terms: vec!["(i * 4u)".into()],
            constant: 0,
        };
        assert_eq!(dynamic.constant(), None);
        assert_eq!(dynamic.text(), "(i * 4u)");
    }

    fn module_with_buffers() -> Module {
        let mut module = Module::default();
        let vec4f = module.vector_type(VectorSize::Quad, tinct_ir::Scalar::F32);
        let vec2f = module.vector_type(VectorSize::Bi, tinct_ir::Scalar::F32);
        let f32_ty = module.scalar_type(tinct_ir::Scalar::F32);
        let params = module.struct_type("Params", &[("color", vec4f), ("uv", vec2f), ("scale", f32_ty)]);
        module.global_variables.append(
            GlobalVariable::new("params", AddressSpace::Uniform, params).with_binding(0, 0),
        );
        let arr = module.runtime_array_type(vec4f);
        module.global_variables.append(
            GlobalVariable::new("data", AddressSpace::Storage, arr)
                .with_binding(0, 1)
                .with_access(StorageAccess::LOAD_STORE),
        );
        module
    }

    #[test]
    fn uniform_members_read_registers() {
        let module = module_with_buffers();
        let options = Options::default();
        let mut w = Writer::new(&module, &options);
        let params = module.global_by_name("params").unwrap();
        let mut f = FnCtx::module_scope(&module);
        let uv = Expression::access_index(Expression::GlobalVariable(params), 1);
        let r = w.buffer_ref(&mut f, &uv).unwrap().unwrap();
        assert_eq!(w.buffer_load(&r).unwrap(), "asfloat(params[1].xy)");
        let scale = Expression::access_index(Expression::GlobalVariable(params), 2);
        let r = w.buffer_ref(&mut f, &scale).unwrap().unwrap();
        assert_eq!(w.buffer_load(&r).unwrap(), "asfloat(params[1].z)");
    }

    #[test]
    fn storage_elements_use_byte_offsets() {
        let module = module_with_buffers();
        let options = Options::default();
        let mut w = Writer::new(&module, &options);
        let data = module.global_by_name("data").unwrap();
        let mut f = FnCtx::module_scope(&module);
        let elem = Expression::access(Expression::GlobalVariable(data), Expression::u32(3));
        let r = w.buffer_ref(&mut f, &elem).unwrap().unwrap();
        assert_eq!(w.buffer_load(&r).unwrap(), "asfloat(data.Load4(48u))");
        assert_eq!(
            w.buffer_store(&r, "v").unwrap(),
            "data.Store4(48u, asuint(v))"
        );
    }
}
