//! Expressions: owned trees evaluated for a value.
//!
//! Reference expressions (`GlobalVariable` outside the handle space,
//! `LocalVariable` of a `var`, and `Access*` applied to a pointer) evaluate
//! to pointers. `Load` turns a pointer into the value it points at.

use std::hash::{Hash, Hasher};

use crate::arena::Handle;
use crate::func::{Function, LocalVariable};
use crate::global::{GlobalVariable, Override};
use crate::types::{Scalar, Type, VectorSize};

/// A vector swizzle component.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum SwizzleComponent {
    X = 0,
    Y = 1,
    Z = 2,
    W = 3,
}

impl SwizzleComponent {
    pub const XYZW: [Self; 4] = [Self::X, Self::Y, Self::Z, Self::W];

    /// The component with index `i`.
    pub fn from_index(i: u32) -> Option<Self> {
        Self::XYZW.get(i as usize).copied()
    }

    /// The conventional lowercase letter.
    pub fn letter(self) -> char {
        ['x', 'y', 'z', 'w'][self as usize]
    }
}

/// A literal constant value.
#[derive(Clone, Copy, Debug)]
pub enum Literal {
    Bool(bool),
    I32(i32),
    U32(u32),
    F32(f32),
    /// An `f16` value, held widened.
    F16(f32),
}

impl Literal {
    /// Returns the scalar type of this literal.
    pub fn scalar(&self) -> Scalar {
        match *self {
            Self::Bool(_) => Scalar::BOOL,
            Self::I32(_) => Scalar::I32,
            Self::U32(_) => Scalar::U32,
            Self::F32(_) => Scalar::F32,
            Self::F16(_) => Scalar::F16,
        }
    }

    /// The zero value of `scalar`.
    pub fn zero(scalar: Scalar) -> Self {
        Self::from_i64(scalar, 0)
    }

    /// `value` converted to the literal kind of `scalar`.
    pub fn from_i64(scalar: Scalar, value: i64) -> Self {
        use crate::types::ScalarKind as K;
        match (scalar.kind, scalar.width) {
            (K::Bool, _) => Self::Bool(value != 0),
            (K::Sint, _) => Self::I32(value as i32),
            (K::Uint, _) => Self::U32(value as u32),
            (K::Float, 2) => Self::F16(value as f32),
            (K::Float, _) => Self::F32(value as f32),
        }
    }

    fn bits(&self) -> (u8, u64) {
        match *self {
            Self::Bool(v) => (0, v as u64),
            Self::I32(v) => (1, v as u32 as u64),
            Self::U32(v) => (2, v as u64),
            Self::F32(v) => (3, v.to_bits() as u64),
            Self::F16(v) => (4, v.to_bits() as u64),
        }
    }
}

impl PartialEq for Literal {
    fn eq(&self, other: &Self) -> bool {
        self.bits() == other.bits()
    }
}

impl Eq for Literal {}

impl Hash for Literal {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.bits().hash(state);
    }
}

/// A unary operator.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum UnaryOp {
    Negate,
    LogicalNot,
    BitwiseNot,
}

/// A binary operator.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum BinaryOp {
    Add,
    Subtract,
    Multiply,
    Divide,
    Modulo,
    Equal,
    NotEqual,
    Less,
    LessEqual,
    Greater,
    GreaterEqual,
    LogicalAnd,
    LogicalOr,
    BitwiseAnd,
    BitwiseOr,
    BitwiseXor,
    ShiftLeft,
    ShiftRight,
}

impl BinaryOp {
    /// Comparison operators produce booleans.
    pub fn is_comparison(self) -> bool {
        matches!(
            self,
            Self::Equal
                | Self::NotEqual
                | Self::Less
                | Self::LessEqual
                | Self::Greater
                | Self::GreaterEqual
        )
    }

    /// Short-circuiting operators.
    pub fn is_logical(self) -> bool {
        matches!(self, Self::LogicalAnd | Self::LogicalOr)
    }

    /// Shift operators.
    pub fn is_shift(self) -> bool {
        matches!(self, Self::ShiftLeft | Self::ShiftRight)
    }
}

/// A WGSL builtin function other than the texture builtins.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum BuiltinFn {
    Abs,
    Acos,
    Acosh,
    All,
    Any,
    ArrayLength,
    Asin,
    Asinh,
    Atan,
    Atan2,
    Atanh,
    Ceil,
    Clamp,
    Cos,
    Cosh,
    CountLeadingZeros,
    CountOneBits,
    CountTrailingZeros,
    Cross,
    Degrees,
    Determinant,
    Distance,
    Dot,
    Dot4I8Packed,
    Dot4U8Packed,
    Dpdx,
    DpdxCoarse,
    DpdxFine,
    Dpdy,
    DpdyCoarse,
    DpdyFine,
    Exp,
    Exp2,
    ExtractBits,
    FaceForward,
    FirstLeadingBit,
    FirstTrailingBit,
    Floor,
    Fma,
    Fract,
    Frexp,
    Fwidth,
    FwidthCoarse,
    FwidthFine,
    InsertBits,
    InverseSqrt,
    Ldexp,
    Length,
    Log,
    Log2,
    Max,
    Min,
    Mix,
    Modf,
    Normalize,
    Pack2x16Float,
    Pack2x16Snorm,
    Pack2x16Unorm,
    Pack4x8Snorm,
    Pack4x8Unorm,
    Pack4xI8,
    Pack4xU8,
    Pow,
    QuantizeToF16,
    Radians,
    Reflect,
    Refract,
    ReverseBits,
    Round,
    Saturate,
    /// `select(false_value, true_value, condition)`.
    Select,
    Sign,
    Sin,
    Sinh,
    SmoothStep,
    Sqrt,
    Step,
    Tan,
    Tanh,
    Transpose,
    Trunc,
    Unpack2x16Float,
    Unpack2x16Snorm,
    Unpack2x16Unorm,
    Unpack4x8Snorm,
    Unpack4x8Unorm,
    Unpack4xI8,
    Unpack4xU8,
    AtomicLoad,
    AtomicStore,
    AtomicAdd,
    AtomicSub,
    AtomicMax,
    AtomicMin,
    AtomicAnd,
    AtomicOr,
    AtomicXor,
    AtomicExchange,
    AtomicCompareExchangeWeak,
}

impl BuiltinFn {
    /// The WGSL spelling of the builtin.
    pub fn wgsl_name(self) -> &'static str {
        use BuiltinFn as B;
        match self {
            B::Abs => "abs",
            B::Acos => "acos",
            B::Acosh => "acosh",
            B::All => "all",
            B::Any => "any",
            B::ArrayLength => "arrayLength",
            B::Asin => "asin",
            B::Asinh => "asinh",
            B::Atan => "atan",
            B::Atan2 => "atan2",
            B::Atanh => "atanh",
            B::Ceil => "ceil",
            B::Clamp => "clamp",
            B::Cos => "cos",
            B::Cosh => "cosh",
            B::CountLeadingZeros => "countLeadingZeros",
            B::CountOneBits => "countOneBits",
            B::CountTrailingZeros => "countTrailingZeros",
            B::Cross => "cross",
            B::Degrees => "degrees",
            B::Determinant => "determinant",
            B::Distance => "distance",
            B::Dot => "dot",
            B::Dot4I8Packed => "dot4I8Packed",
            B::Dot4U8Packed => "dot4U8Packed",
            B::Dpdx => "dpdx",
            B::DpdxCoarse => "dpdxCoarse",
            B::DpdxFine => "dpdxFine",
            B::Dpdy => "dpdy",
            B::DpdyCoarse => "dpdyCoarse",
            B::DpdyFine => "dpdyFine",
            B::Exp => "exp",
            B::Exp2 => "exp2",
            B::ExtractBits => "extractBits",
            B::FaceForward => "faceForward",
            B::FirstLeadingBit => "firstLeadingBit",
            B::FirstTrailingBit => "firstTrailingBit",
            B::Floor => "floor",
            B::Fma => "fma",
            B::Fract => "fract",
            B::Frexp => "frexp",
            B::Fwidth => "fwidth",
            B::FwidthCoarse => "fwidthCoarse",
            B::FwidthFine => "fwidthFine",
            B::InsertBits => "insertBits",
            B::InverseSqrt => "inverseSqrt",
            B::Ldexp => "ldexp",
            B::Length => "length",
            B::Log => "log",
            B::Log2 => "log2",
            B::Max => "max",
            B::Min => "min",
            B::Mix => "mix",
            B::Modf => "modf",
            B::Normalize => "normalize",
            B::Pack2x16Float => "pack2x16float",
            B::Pack2x16Snorm => "pack2x16snorm",
            B::Pack2x16Unorm => "pack2x16unorm",
            B::Pack4x8Snorm => "pack4x8snorm",
            B::Pack4x8Unorm => "pack4x8unorm",
            B::Pack4xI8 => "pack4xI8",
            B::Pack4xU8 => "pack4xU8",
            B::Pow => "pow",
            B::QuantizeToF16 => "quantizeToF16",
            B::Radians => "radians",
            B::Reflect => "reflect",
            B::Refract => "refract",
            B::ReverseBits => "reverseBits",
            B::Round => "round",
            B::Saturate => "saturate",
            B::Select => "select",
            B::Sign => "sign",
            B::Sin => "sin",
            B::Sinh => "sinh",
            B::SmoothStep => "smoothstep",
            B::Sqrt => "sqrt",
            B::Step => "step",
            B::Tan => "tan",
            B::Tanh => "tanh",
            B::Transpose => "transpose",
            B::Trunc => "trunc",
            B::Unpack2x16Float => "unpack2x16float",
            B::Unpack2x16Snorm => "unpack2x16snorm",
            B::Unpack2x16Unorm => "unpack2x16unorm",
            B::Unpack4x8Snorm => "unpack4x8snorm",
            B::Unpack4x8Unorm => "unpack4x8unorm",
            B::Unpack4xI8 => "unpack4xI8",
            B::Unpack4xU8 => "unpack4xU8",
            B::AtomicLoad => "atomicLoad",
            B::AtomicStore => "atomicStore",
            B::AtomicAdd => "atomicAdd",
            B::AtomicSub => "atomicSub",
            B::AtomicMax => "atomicMax",
            B::AtomicMin => "atomicMin",
            B::AtomicAnd => "atomicAnd",
            B::AtomicOr => "atomicOr",
            B::AtomicXor => "atomicXor",
            B::AtomicExchange => "atomicExchange",
            B::AtomicCompareExchangeWeak => "atomicCompareExchangeWeak",
        }
    }

    /// Atomic builtins take a pointer to an atomic as their first argument.
    pub fn is_atomic(self) -> bool {
        matches!(
            self,
            Self::AtomicLoad
                | Self::AtomicStore
                | Self::AtomicAdd
                | Self::AtomicSub
                | Self::AtomicMax
                | Self::AtomicMin
                | Self::AtomicAnd
                | Self::AtomicOr
                | Self::AtomicXor
                | Self::AtomicExchange
                | Self::AtomicCompareExchangeWeak
        )
    }

    /// Derivative builtins, only valid in fragment shaders.
    pub fn is_derivative(self) -> bool {
        matches!(
            self,
            Self::Dpdx
                | Self::DpdxCoarse
                | Self::DpdxFine
                | Self::Dpdy
                | Self::DpdyCoarse
                | Self::DpdyFine
                | Self::Fwidth
                | Self::FwidthCoarse
                | Self::FwidthFine
        )
    }

    /// Builtins with no result value.
    pub fn is_void(self) -> bool {
        self == Self::AtomicStore
    }
}

/// A texture builtin.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Ord, PartialOrd)]
pub enum TextureFn {
    Sample,
    SampleBias,
    SampleLevel,
    SampleGrad,
    SampleCompare,
    SampleCompareLevel,
    SampleBaseClampToEdge,
    Gather,
    GatherCompare,
    Load,
    Store,
    Dimensions,
    NumLayers,
    NumLevels,
    NumSamples,
}

impl TextureFn {
    /// The WGSL spelling of the builtin.
    pub fn wgsl_name(self) -> &'static str {
        match self {
            Self::Sample => "textureSample",
            Self::SampleBias => "textureSampleBias",
            Self::SampleLevel => "textureSampleLevel",
            Self::SampleGrad => "textureSampleGrad",
            Self::SampleCompare => "textureSampleCompare",
            Self::SampleCompareLevel => "textureSampleCompareLevel",
            Self::SampleBaseClampToEdge => "textureSampleBaseClampToEdge",
            Self::Gather => "textureGather",
            Self::GatherCompare => "textureGatherCompare",
            Self::Load => "textureLoad",
            Self::Store => "textureStore",
            Self::Dimensions => "textureDimensions",
            Self::NumLayers => "textureNumLayers",
            Self::NumLevels => "textureNumLevels",
            Self::NumSamples => "textureNumSamples",
        }
    }

    /// Builtins that take a sampler.
    pub fn uses_sampler(self) -> bool {
        !matches!(
            self,
            Self::Load
                | Self::Store
                | Self::Dimensions
                | Self::NumLayers
                | Self::NumLevels
                | Self::NumSamples
        )
    }
}

/// Operands of a texture builtin call, by role.
#[derive(Clone, Debug, PartialEq)]
pub struct TextureCall {
    pub fun: TextureFn,
    pub texture: Expression,
    pub sampler: Option<Expression>,
    pub coords: Option<Expression>,
    pub array_index: Option<Expression>,
    pub level: Option<Expression>,
    pub sample_index: Option<Expression>,
    pub bias: Option<Expression>,
    pub ddx: Option<Expression>,
    pub ddy: Option<Expression>,
    pub depth_ref: Option<Expression>,
    pub offset: Option<Expression>,
    pub component: Option<Expression>,
    pub value: Option<Expression>,
}

impl TextureCall {
    /// A call with only the texture operand set.
    pub fn new(fun: TextureFn, texture: Expression) -> Self {
        Self {
            fun,
            texture,
            sampler: None,
            coords: None,
            array_index: None,
            level: None,
            sample_index: None,
            bias: None,
            ddx: None,
            ddy: None,
            depth_ref: None,
            offset: None,
            component: None,
            value: None,
        }
    }

    /// All operands in evaluation order.
    pub fn operands(&self) -> impl Iterator<Item = &Expression> {
        std::iter::once(&self.texture).chain(
            [
                &self.sampler,
                &self.component,
                &self.coords,
                &self.array_index,
                &self.depth_ref,
                &self.bias,
                &self.level,
                &self.sample_index,
                &self.ddx,
                &self.ddy,
                &self.offset,
                &self.value,
            ]
            .into_iter()
            .flatten(),
        )
    }

    /// All operands in evaluation order, mutably.
    pub fn operands_mut(&mut self) -> impl Iterator<Item = &mut Expression> {
        std::iter::once(&mut self.texture).chain(
            [
                &mut self.sampler,
                &mut self.component,
                &mut self.coords,
                &mut self.array_index,
                &mut self.depth_ref,
                &mut self.bias,
                &mut self.level,
                &mut self.sample_index,
                &mut self.ddx,
                &mut self.ddy,
                &mut self.offset,
                &mut self.value,
            ]
            .into_iter()
            .flatten(),
        )
    }
}

/// An expression tree.
#[derive(Clone, Debug, PartialEq)]
pub enum Expression {
    Literal(Literal),
    /// The zero value of a constructible type.
    ZeroValue(Handle<Type>),
    /// A value constructor of a vector, matrix, array or struct.
    Compose {
        ty: Handle<Type>,
        components: Vec<Expression>,
    },
    /// A vector with every component set to a scalar.
    Splat {
        size: VectorSize,
        value: Box<Expression>,
    },
    /// Two to four components of a vector value.
    Swizzle {
        vector: Box<Expression>,
        pattern: Vec<SwizzleComponent>,
    },
    /// The value of the i'th argument of the enclosing function.
    FunctionArgument(u32),
    GlobalVariable(Handle<GlobalVariable>),
    LocalVariable(Handle<LocalVariable>),
    Override(Handle<Override>),
    Load {
        pointer: Box<Expression>,
    },
    /// Dynamic indexing of an array, vector or matrix (value or pointer).
    Access {
        base: Box<Expression>,
        index: Box<Expression>,
    },
    /// Constant indexing, including struct member selection.
    AccessIndex {
        base: Box<Expression>,
        index: u32,
    },
    Unary {
        op: UnaryOp,
        expr: Box<Expression>,
    },
    Binary {
        op: BinaryOp,
        left: Box<Expression>,
        right: Box<Expression>,
    },
    /// Value conversion to a scalar, vector or matrix type.
    Convert {
        expr: Box<Expression>,
        ty: Handle<Type>,
    },
    /// Bit-preserving reinterpretation.
    Bitcast {
        expr: Box<Expression>,
        ty: Handle<Type>,
    },
    /// A call of a user-defined function.
    Call {
        function: Handle<Function>,
        arguments: Vec<Expression>,
    },
    Builtin {
        fun: BuiltinFn,
        arguments: Vec<Expression>,
    },
    Texture(Box<TextureCall>),
}

impl Expression {
    /// A `u32` literal.
    pub fn u32(v: u32) -> Self {
        Self::Literal(Literal::U32(v))
    }

    /// An `i32` literal.
    pub fn i32(v: i32) -> Self {
        Self::Literal(Literal::I32(v))
    }

    /// An `f32` literal.
    pub fn f32(v: f32) -> Self {
        Self::Literal(Literal::F32(v))
    }

    /// A `bool` literal.
    pub fn bool(v: bool) -> Self {
        Self::Literal(Literal::Bool(v))
    }

    /// `left op right`.
    pub fn binary(op: BinaryOp, left: Expression, right: Expression) -> Self {
        Self::Binary {
            op,
            left: Box::new(left),
            right: Box::new(right),
        }
    }

    /// `op expr`.
    pub fn unary(op: UnaryOp, expr: Expression) -> Self {
        Self::Unary {
            op,
            expr: Box::new(expr),
        }
    }

    /// `*pointer`.
    pub fn load(pointer: Expression) -> Self {
        Self::Load {
            pointer: Box::new(pointer),
        }
    }

    /// `base[index]`.
    pub fn access(base: Expression, index: Expression) -> Self {
        Self::Access {
            base: Box::new(base),
            index: Box::new(index),
        }
    }

    /// `base.index`.
    pub fn access_index(base: Expression, index: u32) -> Self {
        Self::AccessIndex {
            base: Box::new(base),
            index,
        }
    }

    /// A builtin call.
    pub fn builtin(fun: BuiltinFn, arguments: Vec<Expression>) -> Self {
        Self::Builtin { fun, arguments }
    }

    /// A user function call.
    pub fn call(function: Handle<Function>, arguments: Vec<Expression>) -> Self {
        Self::Call {
            function,
            arguments,
        }
    }

    /// A value conversion.
    pub fn convert(expr: Expression, ty: Handle<Type>) -> Self {
        Self::Convert {
            expr: Box::new(expr),
            ty,
        }
    }

    /// A bitcast.
    pub fn bitcast(expr: Expression, ty: Handle<Type>) -> Self {
        Self::Bitcast {
            expr: Box::new(expr),
            ty,
        }
    }

    /// Calls `f` on each direct child in evaluation order.
    pub fn for_each_child(&self, mut f: impl FnMut(&Expression)) {
        match self {
            Self::Literal(_)
            | Self::ZeroValue(_)
            | Self::FunctionArgument(_)
            | Self::GlobalVariable(_)
            | Self::LocalVariable(_)
            | Self::Override(_) => {}
            Self::Compose { components: v, .. }
            | Self::Call { arguments: v, .. }
            | Self::Builtin { arguments: v, .. } => v.iter().for_each(f),
            Self::Splat { value: e, .. }
            | Self::Swizzle { vector: e, .. }
            | Self::Load { pointer: e }
            | Self::AccessIndex { base: e, .. }
            | Self::Unary { expr: e, .. }
            | Self::Convert { expr: e, .. }
            | Self::Bitcast { expr: e, .. } => f(e),
            Self::Access { base, index } => {
                f(base);
                f(index);
            }
            Self::Binary { left, right, .. } => {
                f(left);
                f(right);
            }
            Self::Texture(call) => call.operands().for_each(f),
        }
    }

    /// Calls `f` on each direct child in evaluation order, mutably.
    pub fn for_each_child_mut(&mut self, mut f: impl FnMut(&mut Expression)) {
        match self {
            Self::Literal(_)
            | Self::ZeroValue(_)
            | Self::FunctionArgument(_)
            | Self::GlobalVariable(_)
            | Self::LocalVariable(_)
            | Self::Override(_) => {}
            Self::Compose { components: v, .. }
            | Self::Call { arguments: v, .. }
            | Self::Builtin { arguments: v, .. } => v.iter_mut().for_each(f),
            Self::Splat { value: e, .. }
            | Self::Swizzle { vector: e, .. }
            | Self::Load { pointer: e }
            | Self::AccessIndex { base: e, .. }
            | Self::Unary { expr: e, .. }
            | Self::Convert { expr: e, .. }
            | Self::Bitcast { expr: e, .. } => f(e),
            Self::Access { base, index } => {
                f(base);
                f(index);
            }
            Self::Binary { left, right, .. } => {
                f(left);
                f(right);
            }
            Self::Texture(call) => call.operands_mut().for_each(f),
        }
    }

    /// Pre-order traversal of this expression and all its descendants.
    pub fn visit(&self, f: &mut dyn FnMut(&Expression)) {
        f(self);
        self.for_each_child(|child| child.visit(f));
    }

    /// Post-order mutable traversal: children are rewritten before their
    /// parent sees them.
    pub fn visit_mut_post(&mut self, f: &mut dyn FnMut(&mut Expression)) {
        self.for_each_child_mut(|child| child.visit_mut_post(f));
        f(self);
    }

    /// Returns `true` if `pred` holds for this expression or a descendant.
    pub fn any(&self, pred: &mut dyn FnMut(&Expression) -> bool) -> bool {
        if pred(self) {
            return true;
        }
        let mut found = false;
        self.for_each_child(|child| {
            if !found {
                found = child.any(pred);
            }
        });
        found
    }

    /// Returns `true` if evaluating this expression may have side effects.
    pub fn has_side_effects(&self) -> bool {
        self.any(&mut |e| match e {
            Self::Call { .. } => true,
            Self::Builtin { fun, .. } => fun.is_atomic(),
            Self::Texture(call) => call.fun == TextureFn::Store,
            _ => false,
        })
    }

    /// The root variable of a reference expression, looking through
    /// accesses.
    pub fn root(&self) -> &Expression {
        match self {
            Self::Access { base, .. } | Self::AccessIndex { base, .. } => base.root(),
            other => other,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn literal_equality_is_bitwise() {
        assert_eq!(Literal::F32(f32::NAN), Literal::F32(f32::NAN));
        assert_ne!(Literal::F32(0.0), Literal::F32(-0.0));
        assert_ne!(Literal::I32(1), Literal::U32(1));
    }

    #[test]
    fn literal_from_i64() {
        assert_eq!(Literal::from_i64(Scalar::U32, 3), Literal::U32(3));
        assert_eq!(Literal::from_i64(Scalar::F16, 1), Literal::F16(1.0));
        assert_eq!(Literal::zero(Scalar::BOOL), Literal::Bool(false));
    }

    #[test]
    fn visit_is_preorder() {
        let e = Expression::binary(
            BinaryOp::Add,
            Expression::u32(1),
            Expression::binary(BinaryOp::Multiply, Expression::u32(2), Expression::u32(3)),
        );
        let mut seen = Vec::new();
        e.visit(&mut |node| {
            if let Expression::Literal(Literal::U32(v)) = node {
                seen.push(*v);
            }
        });
        assert_eq!(seen, vec![1, 2, 3]);
    }

    #[test]
    fn visit_mut_post_rewrites_leaves_first() {
        let mut e = Expression::binary(BinaryOp::Add, Expression::u32(1), Expression::u32(2));
        e.visit_mut_post(&mut |node| {
            if let Expression::Literal(Literal::U32(v)) = node {
                *v *= 10;
            }
        });
        assert_eq!(
            e,
            Expression::binary(BinaryOp::Add, Expression::u32(10), Expression::u32(20))
        );
    }

    #[test]
    fn side_effects_detected_through_nesting() {
        let pure = Expression::builtin(BuiltinFn::Abs, vec![Expression::i32(-1)]);
        assert!(!pure.has_side_effects());
        let call = Expression::binary(
            BinaryOp::Add,
            Expression::i32(1),
            Expression::call(Handle::new(0), vec![]),
        );
        assert!(call.has_side_effects());
    }

    #[test]
    fn root_looks_through_accesses() {
        let e = Expression::access_index(
            Expression::access(Expression::GlobalVariable(Handle::new(4)), Expression::u32(0)),
            1,
        );
        assert_eq!(e.root(), &Expression::GlobalVariable(Handle::new(4)));
    }

    #[test]
    fn texture_operands_in_order() {
        let mut call = TextureCall::new(TextureFn::SampleLevel, Expression::GlobalVariable(Handle::new(0)));
        call.sampler = Some(Expression::GlobalVariable(Handle::new(1)));
        call.coords = Some(Expression::f32(0.5));
        call.level = Some(Expression::f32(2.0));
        assert_eq!(call.operands().count(), 4);
        assert!(TextureFn::SampleLevel.uses_sampler());
        assert!(!TextureFn::Load.uses_sampler());
    }
}
