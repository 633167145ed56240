//! Replaces builtins a target lacks, or implements differently, with
//! generated helper functions.
//!
//! Each helper is built once per builtin and operand type and shared by
//! every call site in the module.

use std::collections::HashMap;

use tinct_ir::{
    BinaryOp, BuiltinFn, Expression, Function, FunctionArgument, FunctionResult, Handle, Literal,
    LocalKind, Module, ResolveContext, Scalar, ScalarKind, Statement, Type, UnaryOp,
    VectorSize,
};

use crate::util::{for_each_function, numeric_shape, select, shaped_type, splat, try_rewrite, type_of};
use crate::{DataMap, Transform, TransformError};

const NAME: &str = "BuiltinPolyfill";

/// Polyfill level for builtins with an out-of-range domain.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
pub enum Level {
    #[default]
    None,
    /// Return zero outside the builtin's domain, call it otherwise.
    RangeCheck,
    /// Implement the builtin from scratch.
    Full,
}

/// Polyfill level for `extractBits` and `insertBits`.
#[derive(Clone, Copy, Debug, Default, Hash, PartialEq, Eq)]
pub enum BitsLevel {
    #[default]
    None,
    /// Clamp `offset` and `count` to the bit width, then call the builtin.
    ClampParameters,
    /// Implement the builtin with shifts and masks.
    Full,
}

/// Which builtins to polyfill. Everything is off by default.
#[derive(Clone, Debug, Default)]
pub struct BuiltinPolyfillConfig {
    pub acosh: Level,
    pub atanh: Level,
    /// Mask shift amounts to the bit width of the shifted value.
    pub bitshift_modulo: bool,
    /// `clamp` on integers.
    pub clamp_int: bool,
    pub count_leading_zeros: bool,
    pub count_trailing_zeros: bool,
    /// `dot4I8Packed` and `dot4U8Packed`.
    pub dot_4x8_packed: bool,
    pub extract_bits: BitsLevel,
    pub first_leading_bit: bool,
    pub first_trailing_bit: bool,
    pub insert_bits: BitsLevel,
    /// Integer `/` and `%` that cannot trap on a zero divisor or on
    /// `i32::MIN / -1`.
    pub int_div_mod: bool,
    /// `pack4xI8`, `pack4xU8`, `unpack4xI8` and `unpack4xU8`.
    pub pack_4x8: bool,
    pub saturate: bool,
}

#[derive(Debug)]
pub struct BuiltinPolyfill;

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
enum Poly {
    Acosh(Level),
    Atanh(Level),
    Clamp,
    Clz,
    Ctz,
    Dot4I8,
    Dot4U8,
    ExtractBits(BitsLevel),
    FirstLeadingBit,
    FirstTrailingBit,
    InsertBits(BitsLevel),
    Div,
    Mod,
    Pack4xI8,
    Pack4xU8,
    Unpack4xI8,
    Unpack4xU8,
    Saturate,
    /// Masked in place, no helper.
    Shift,
}

const HELPERS: &[&str] = &[
    "tint_acosh",
    "tint_atanh",
    "tint_clamp",
    "tint_count_leading_zeros",
    "tint_count_trailing_zeros",
    "tint_dot4_i8_packed",
    "tint_dot4_u8_packed",
    "tint_extract_bits",
    "tint_first_leading_bit",
    "tint_first_trailing_bit",
    "tint_insert_bits",
    "tint_div",
    "tint_mod",
    "tint_pack_4xi8",
    "tint_pack_4xu8",
    "tint_unpack_4xi8",
    "tint_unpack_4xu8",
    "tint_saturate",
];

impl Poly {
    fn helper_name(self) -> &'static str {
        match self {
            Self::Acosh(_) => HELPERS[0],
            Self::Atanh(_) => HELPERS[1],
            Self::Clamp => HELPERS[2],
            Self::Clz => HELPERS[3],
            Self::Ctz => HELPERS[4],
            Self::Dot4I8 => HELPERS[5],
            Self::Dot4U8 => HELPERS[6],
            Self::ExtractBits(_) => HELPERS[7],
            Self::FirstLeadingBit => HELPERS[8],
            Self::FirstTrailingBit => HELPERS[9],
            Self::InsertBits(_) => HELPERS[10],
            Self::Div => HELPERS[11],
            Self::Mod => HELPERS[12],
            Self::Pack4xI8 => HELPERS[13],
            Self::Pack4xU8 => HELPERS[14],
            Self::Unpack4xI8 => HELPERS[15],
            Self::Unpack4xU8 => HELPERS[16],
            Self::Saturate | Self::Shift => HELPERS[17],
        }
    }
}

/// Helpers are not polyfilled again, which keeps the pass idempotent for
/// helpers that call the native builtin.
fn is_helper(name: &str) -> bool {
    HELPERS.iter().any(|h| {
        name == *h
            || name
                .strip_prefix(h)
                .and_then(|rest| rest.strip_prefix('_'))
                .is_some_and(|n| n.parse::<u32>().is_ok())
    })
}

/// `rhs & 31u` (or its splat).
fn is_masked(rhs: &Expression) -> bool {
    let Expression::Binary {
        op: BinaryOp::BitwiseAnd,
        ref right,
        ..
    } = *rhs
    else {
        return false;
    };
    match **right {
        Expression::Literal(Literal::U32(31)) => true,
        Expression::Splat { ref value, .. } => **value == Expression::Literal(Literal::U32(31)),
        _ => false,
    }
}

fn classify(
    cfg: &BuiltinPolyfillConfig,
    ctx: &ResolveContext,
    expr: &Expression,
) -> Result<Option<Poly>, tinct_ir::IrError> {
    let kind_of = |e: &Expression| ctx.resolve_inner(e).map(|inner| inner.scalar_kind());
    Ok(match *expr {
        Expression::Builtin { fun, ref arguments } => {
            let Some(first) = arguments.first() else {
                return Ok(None);
            };
            let kind = kind_of(first)?;
            let int = matches!(kind, Some(ScalarKind::Sint | ScalarKind::Uint));
            let float = kind == Some(ScalarKind::Float);
            use BuiltinFn as B;
            match fun {
                B::Acosh if float && cfg.acosh != Level::None => Some(Poly::Acosh(cfg.acosh)),
                B::Atanh if float && cfg.atanh != Level::None => Some(Poly::Atanh(cfg.atanh)),
                B::Clamp if int && cfg.clamp_int => Some(Poly::Clamp),
                B::CountLeadingZeros if int && cfg.count_leading_zeros => Some(Poly::Clz),
                B::CountTrailingZeros if int && cfg.count_trailing_zeros => Some(Poly::Ctz),
                B::FirstLeadingBit if int && cfg.first_leading_bit => Some(Poly::FirstLeadingBit),
                B::FirstTrailingBit if int && cfg.first_trailing_bit => {
                    Some(Poly::FirstTrailingBit)
                }
                B::ExtractBits if cfg.extract_bits != BitsLevel::None => {
                    Some(Poly::ExtractBits(cfg.extract_bits))
                }
                B::InsertBits if cfg.insert_bits != BitsLevel::None => {
                    Some(Poly::InsertBits(cfg.insert_bits))
                }
                B::Saturate if float && cfg.saturate => Some(Poly::Saturate),
                B::Dot4I8Packed if cfg.dot_4x8_packed => Some(Poly::Dot4I8),
                B::Dot4U8Packed if cfg.dot_4x8_packed => Some(Poly::Dot4U8),
                B::Pack4xI8 if cfg.pack_4x8 => Some(Poly::Pack4xI8),
                B::Pack4xU8 if cfg.pack_4x8 => Some(Poly::Pack4xU8),
                B::Unpack4xI8 if cfg.pack_4x8 => Some(Poly::Unpack4xI8),
                B::Unpack4xU8 if cfg.pack_4x8 => Some(Poly::Unpack4xU8),
                _ => None,
            }
        }
        Expression::Binary {
            op: op @ (BinaryOp::Divide | BinaryOp::Modulo),
            ref left,
            ..
        } if cfg.int_div_mod => match kind_of(left)? {
            Some(ScalarKind::Sint | ScalarKind::Uint) if op == BinaryOp::Divide => Some(Poly::Div),
            Some(ScalarKind::Sint | ScalarKind::Uint) => Some(Poly::Mod),
            _ => None,
        },
        Expression::Binary {
            op: BinaryOp::ShiftLeft | BinaryOp::ShiftRight,
            ref right,
            ..
        } if cfg.bitshift_modulo && !is_masked(right) => Some(Poly::Shift),
        _ => None,
    })
}

/// The scalar and vector shape helpers are generated for.
#[derive(Clone, Copy)]
struct Shape {
    ty: Handle<Type>,
    scalar: Scalar,
    size: Option<VectorSize>,
    /// `u32` with the same vector size.
    uty: Handle<Type>,
    /// `scalar` as a type of its own.
    sty: Handle<Type>,
}

impl Shape {
    fn of(module: &mut Module, ty: Handle<Type>) -> Result<Self, TransformError> {
        let (scalar, size) = numeric_shape(&module.types[ty].inner)
            .ok_or_else(|| TransformError::ice(NAME, "polyfill of a non-numeric type"))?;
        Ok(Self {
            ty,
            scalar,
            size,
            uty: shaped_type(module, Scalar::U32, size),
            sty: module.scalar_type(scalar),
        })
    }

    fn u(&self, v: u32) -> Expression {
        splat(Literal::U32(v), self.size)
    }

    fn lit(&self, v: i64) -> Expression {
        splat(Literal::from_i64(self.scalar, v), self.size)
    }

    fn float(&self, v: f32) -> Expression {
        let lit = if self.scalar == Scalar::F16 {
            Literal::F16(v)
        } else {
            Literal::F32(v)
        };
        splat(lit, self.size)
    }

    /// Widens a scalar to this shape.
    fn vec(&self, e: Expression) -> Expression {
        match self.size {
            Some(size) => Expression::Splat {
                size,
                value: Box::new(e),
            },
            None => e,
        }
    }

    fn to_u(&self, e: Expression) -> Expression {
        if self.scalar == Scalar::U32 {
            e
        } else {
            Expression::bitcast(e, self.uty)
        }
    }

    fn from_u(&self, e: Expression) -> Expression {
        if self.scalar == Scalar::U32 {
            e
        } else {
            Expression::bitcast(e, self.ty)
        }
    }

    /// A scalar `u32` reinterpreted as this shape's scalar, then widened.
    fn from_u_scalar(&self, e: Expression) -> Expression {
        if self.scalar == Scalar::U32 {
            self.vec(e)
        } else {
            self.vec(Expression::bitcast(e, self.sty))
        }
    }
}

fn bin(op: BinaryOp, left: Expression, right: Expression) -> Expression {
    Expression::binary(op, left, right)
}

/// Builds one helper function body statement by statement.
struct HelperBuilder<'a> {
    module: &'a mut Module,
    func: Function,
}

impl<'a> HelperBuilder<'a> {
    fn new(
        module: &'a mut Module,
        name: &str,
        args: &[(&str, Handle<Type>)],
        result: Handle<Type>,
    ) -> Self {
        let mut func = Function::new(name);
        func.arguments = args
            .iter()
            .map(|&(name, ty)| FunctionArgument {
                name: name.into(),
                ty,
                binding: None,
            })
            .collect();
        func.result = Some(FunctionResult {
            ty: result,
            binding: None,
        });
        Self { module, func }
    }

    fn arg(&self, i: u32) -> Expression {
        Expression::FunctionArgument(i)
    }

    fn bind(&mut self, name: &str, value: Expression) -> Result<Expression, TransformError> {
        let ty = type_of(self.module, &self.func, &value)?;
        let local = self.func.add_local(name, ty, LocalKind::Let);
        self.func.body.push(Statement::Declare {
            local,
            init: Some(value),
        });
        Ok(Expression::LocalVariable(local))
    }

    /// Declares a `var` and returns a reference to it.
    fn var(&mut self, name: &str, ty: Handle<Type>, value: Expression) -> Expression {
        let local = self.func.add_local(name, ty, LocalKind::Var);
        self.func.body.push(Statement::Declare {
            local,
            init: Some(value),
        });
        Expression::LocalVariable(local)
    }

    fn store(&mut self, pointer: Expression, value: Expression) {
        self.func.body.push(Statement::store(pointer, value));
    }

    fn finish(mut self, value: Expression) -> Function {
        self.func.body.push(Statement::Return { value: Some(value) });
        self.func
    }
}

/// Per-step bit width, mask and whether `x` is shifted by the step result.
type Steps = [(&'static str, u32, u32); 5];

const CLZ_STEPS: Steps = [
    ("b16", 0xffff, 16),
    ("b8", 0xff_ffff, 8),
    ("b4", 0xfff_ffff, 4),
    ("b2", 0x3fff_ffff, 2),
    ("b1", 0x7fff_ffff, 1),
];
const LOW_STEPS: Steps = [
    ("b16", 0xffff, 16),
    ("b8", 0xff, 8),
    ("b4", 0xf, 4),
    ("b2", 0x3, 2),
    ("b1", 0x1, 1),
];
const HIGH_STEPS: Steps = [
    ("b16", 0xffff_0000, 16),
    ("b8", 0xff00, 8),
    ("b4", 0xf0, 4),
    ("b2", 0xc, 2),
    ("b1", 0x2, 1),
];

/// The shared shape of the bit-search helpers: narrow `x` down in five
/// halving steps, then combine the step results with the zero check.
#[allow(clippy::too_many_arguments)]
fn bit_search(
    b: &mut HelperBuilder,
    s: Shape,
    init: Expression,
    steps: &Steps,
    step_cond: impl Fn(Expression, u32) -> Expression,
    shift: BinaryOp,
    zero_value: u32,
    combine: BinaryOp,
) -> Result<Expression, TransformError> {
    let x = b.var("x", s.uty, init);
    let mut bits = Vec::new();
    for &(name, mask, width) in steps {
        let cond = step_cond(Expression::load(x.clone()), mask);
        let m = b.bind(name, select(s.u(0), s.u(width), cond))?;
        if width > 1 {
            b.store(x.clone(), bin(shift, Expression::load(x.clone()), m.clone()));
        }
        bits.push(m);
    }
    let is_zero = b.bind(
        "is_zero",
        select(
            s.u(0),
            s.u(zero_value),
            bin(BinaryOp::Equal, Expression::load(x), s.u(0)),
        ),
    )?;
    let total = bits
        .into_iter()
        .reduce(|acc, m| bin(BinaryOp::BitwiseOr, acc, m))
        .ok_or_else(|| TransformError::Unreachable {
            pass: NAME,
            message: "bit search without steps".into(),
        })?;
    Ok(s.from_u(bin(combine, total, is_zero)))
}

/// `vec4<u32>(a, b, c, d)`.
fn vec4u(module: &mut Module, v: [u32; 4]) -> Expression {
    let ty = module.vector_type(VectorSize::Quad, Scalar::U32);
    Expression::Compose {
        ty,
        components: v.into_iter().map(Expression::u32).collect(),
    }
}

fn splat4(e: Expression) -> Expression {
    Expression::Splat {
        size: VectorSize::Quad,
        value: Box::new(e),
    }
}

fn build_helper(module: &mut Module, poly: Poly, ty: Handle<Type>) -> Result<Function, TransformError> {
    let name = poly.helper_name();
    let u32_ty = module.scalar_type(Scalar::U32);
    let i32_ty = module.scalar_type(Scalar::I32);
    let vec4u_ty = module.vector_type(VectorSize::Quad, Scalar::U32);
    let vec4i_ty = module.vector_type(VectorSize::Quad, Scalar::I32);
    use BinaryOp as Op;

    let func = match poly {
        Poly::Acosh(level) | Poly::Atanh(level) => {
            let s = Shape::of(module, ty)?;
            let b = HelperBuilder::new(module, name, &[("x", ty)], ty);
            let x = b.arg(0);
            let acosh = matches!(poly, Poly::Acosh(_));
            let value = match (level, acosh) {
                (Level::Full, true) => Expression::builtin(
                    BuiltinFn::Log,
                    vec![bin(
                        Op::Add,
                        x.clone(),
                        Expression::builtin(
                            BuiltinFn::Sqrt,
                            vec![bin(Op::Subtract, bin(Op::Multiply, x.clone(), x), s.float(1.0))],
                        ),
                    )],
                ),
                (Level::Full, false) => bin(
                    Op::Multiply,
                    Expression::builtin(
                        BuiltinFn::Log,
                        vec![bin(
                            Op::Divide,
                            bin(Op::Add, s.float(1.0), x.clone()),
                            bin(Op::Subtract, s.float(1.0), x),
                        )],
                    ),
                    s.float(0.5),
                ),
                (_, true) => select(
                    Expression::builtin(BuiltinFn::Acosh, vec![x.clone()]),
                    s.float(0.0),
                    bin(Op::Less, x, s.float(1.0)),
                ),
                (_, false) => select(
                    Expression::builtin(BuiltinFn::Atanh, vec![x.clone()]),
                    s.float(0.0),
                    bin(Op::GreaterEqual, x, s.float(1.0)),
                ),
            };
            b.finish(value)
        }
        Poly::Clamp => {
            let b = HelperBuilder::new(module, name, &[("e", ty), ("low", ty), ("high", ty)], ty);
            let value = Expression::builtin(
                BuiltinFn::Min,
                vec![
                    Expression::builtin(BuiltinFn::Max, vec![b.arg(0), b.arg(1)]),
                    b.arg(2),
                ],
            );
            b.finish(value)
        }
        Poly::Saturate => {
            let s = Shape::of(module, ty)?;
            let b = HelperBuilder::new(module, name, &[("v", ty)], ty);
            let value = Expression::builtin(
                BuiltinFn::Clamp,
                vec![b.arg(0), s.float(0.0), s.float(1.0)],
            );
            b.finish(value)
        }
        Poly::Clz | Poly::Ctz | Poly::FirstLeadingBit | Poly::FirstTrailingBit => {
            let s = Shape::of(module, ty)?;
            let mut b = HelperBuilder::new(module, name, &[("v", ty)], ty);
            let v = b.arg(0);
            let and_is = |op: Op| {
                move |x: Expression, mask: u32| {
                    bin(op, bin(Op::BitwiseAnd, x, s.u(mask)), s.u(0))
                }
            };
            let value = match poly {
                Poly::Clz => bit_search(
                    &mut b,
                    s,
                    s.to_u(v),
                    &CLZ_STEPS,
                    |x, mask| bin(Op::LessEqual, x, s.u(mask)),
                    Op::ShiftLeft,
                    1,
                    Op::Add,
                )?,
                Poly::Ctz => bit_search(
                    &mut b,
                    s,
                    s.to_u(v),
                    &LOW_STEPS,
                    and_is(Op::Equal),
                    Op::ShiftRight,
                    1,
                    Op::Add,
                )?,
                Poly::FirstTrailingBit => bit_search(
                    &mut b,
                    s,
                    s.to_u(v),
                    &LOW_STEPS,
                    and_is(Op::Equal),
                    Op::ShiftRight,
                    u32::MAX,
                    Op::BitwiseOr,
                )?,
                _ => {
                    // Negative values search for the highest zero bit.
                    let init = if s.scalar.kind == ScalarKind::Sint {
                        select(
                            s.to_u(v.clone()),
                            Expression::unary(UnaryOp::BitwiseNot, s.to_u(v.clone())),
                            bin(Op::Less, v, s.lit(0)),
                        )
                    } else {
                        v
                    };
                    bit_search(
                        &mut b,
                        s,
                        init,
                        &HIGH_STEPS,
                        and_is(Op::NotEqual),
                        Op::ShiftRight,
                        u32::MAX,
                        Op::BitwiseOr,
                    )?
                }
            };
            b.finish(value)
        }
        Poly::ExtractBits(level) | Poly::InsertBits(level) => {
            let s = Shape::of(module, ty)?;
            let extract = matches!(poly, Poly::ExtractBits(_));
            let args: &[(&str, Handle<Type>)] = if extract {
                &[("v", ty), ("offset", u32_ty), ("count", u32_ty)]
            } else {
                &[("v", ty), ("n", ty), ("offset", u32_ty), ("count", u32_ty)]
            };
            let mut b = HelperBuilder::new(module, name, args, ty);
            let (offset, count) = if extract {
                (b.arg(1), b.arg(2))
            } else {
                (b.arg(2), b.arg(3))
            };
            let start = b.bind(
                "s",
                Expression::builtin(BuiltinFn::Min, vec![offset, Expression::u32(32)]),
            )?;
            let end = b.bind(
                "e",
                Expression::builtin(
                    BuiltinFn::Min,
                    vec![Expression::u32(32), bin(Op::Add, start.clone(), count)],
                ),
            )?;
            let width = bin(Op::Subtract, end.clone(), start.clone());
            let value = match (level, extract) {
                (BitsLevel::Full, true) => {
                    let shl = b.bind("shl", bin(Op::Subtract, Expression::u32(32), end))?;
                    let shr = b.bind("shr", bin(Op::Add, shl.clone(), start))?;
                    let shl_result = b.bind(
                        "shl_result",
                        select(
                            s.lit(0),
                            bin(Op::ShiftLeft, b.arg(0), s.vec(shl.clone())),
                            s.vec(bin(Op::Less, shl, Expression::u32(32))),
                        ),
                    )?;
                    select(
                        bin(
                            Op::ShiftRight,
                            bin(Op::ShiftRight, shl_result.clone(), s.u(31)),
                            s.u(1),
                        ),
                        bin(Op::ShiftRight, shl_result, s.vec(shr.clone())),
                        s.vec(bin(Op::Less, shr, Expression::u32(32))),
                    )
                }
                (BitsLevel::Full, false) => {
                    let low_bits = |bit: Expression| {
                        bin(
                            Op::Subtract,
                            select(
                                Expression::u32(0),
                                bin(Op::ShiftLeft, Expression::u32(1), bit.clone()),
                                bin(Op::Less, bit, Expression::u32(32)),
                            ),
                            Expression::u32(1),
                        )
                    };
                    let mask = b.bind(
                        "mask",
                        bin(Op::BitwiseXor, low_bits(start.clone()), low_bits(end)),
                    )?;
                    let inserted = select(
                        s.lit(0),
                        bin(Op::ShiftLeft, b.arg(1), s.vec(start.clone())),
                        s.vec(bin(Op::Less, start, Expression::u32(32))),
                    );
                    bin(
                        Op::BitwiseOr,
                        bin(Op::BitwiseAnd, inserted, s.from_u_scalar(mask.clone())),
                        bin(
                            Op::BitwiseAnd,
                            b.arg(0),
                            s.from_u_scalar(Expression::unary(UnaryOp::BitwiseNot, mask)),
                        ),
                    )
                }
                (_, true) => Expression::builtin(BuiltinFn::ExtractBits, vec![b.arg(0), start, width]),
                (_, false) => Expression::builtin(
                    BuiltinFn::InsertBits,
                    vec![b.arg(0), b.arg(1), start, width],
                ),
            };
            b.finish(value)
        }
        Poly::Div | Poly::Mod => {
            let s = Shape::of(module, ty)?;
            let b = HelperBuilder::new(module, name, &[("lhs", ty), ("rhs", ty)], ty);
            let (lhs, rhs) = (b.arg(0), b.arg(1));
            let mut trap = bin(Op::Equal, rhs.clone(), s.lit(0));
            if s.scalar.kind == ScalarKind::Sint {
                trap = bin(
                    Op::BitwiseOr,
                    trap,
                    bin(
                        Op::BitwiseAnd,
                        bin(Op::Equal, lhs.clone(), s.lit(i64::from(i32::MIN))),
                        bin(Op::Equal, rhs.clone(), s.lit(-1)),
                    ),
                );
            }
            let divisor = select(rhs, s.lit(1), trap);
            let value = match poly {
                Poly::Div => bin(Op::Divide, lhs, divisor),
                _ if s.scalar.kind == ScalarKind::Sint => {
                    let mut b = b;
                    let divisor = b.bind("rhs_or_one", divisor)?;
                    let quotient = bin(Op::Divide, lhs.clone(), divisor.clone());
                    return Ok(b.finish(bin(
                        Op::Subtract,
                        lhs,
                        bin(Op::Multiply, quotient, divisor),
                    )));
                }
                _ => bin(Op::Modulo, lhs, divisor),
            };
            b.finish(value)
        }
        Poly::Dot4I8 | Poly::Dot4U8 => {
            let result = if poly == Poly::Dot4I8 { i32_ty } else { u32_ty };
            let left = vec4u(module, [24, 16, 8, 0]);
            let right = vec4u(module, [0, 8, 16, 24]);
            let mut b = HelperBuilder::new(module, name, &[("a", u32_ty), ("b", u32_ty)], result);
            let (av, bv) = if poly == Poly::Dot4I8 {
                (
                    unpack_i8(b.arg(0), left.clone(), vec4i_ty),
                    unpack_i8(b.arg(1), left, vec4i_ty),
                )
            } else {
                (unpack_u8(b.arg(0), right.clone()), unpack_u8(b.arg(1), right))
            };
            let av = b.bind("a_unpacked", av)?;
            let bv = b.bind("b_unpacked", bv)?;
            b.finish(Expression::builtin(BuiltinFn::Dot, vec![av, bv]))
        }
        Poly::Pack4xI8 | Poly::Pack4xU8 => {
            let shifts = vec4u(module, [0, 8, 16, 24]);
            let mut b = HelperBuilder::new(module, name, &[("v", ty)], u32_ty);
            let v = if poly == Poly::Pack4xI8 {
                Expression::bitcast(b.arg(0), vec4u_ty)
            } else {
                b.arg(0)
            };
            let bytes = b.bind(
                "bytes",
                bin(
                    Op::ShiftLeft,
                    bin(Op::BitwiseAnd, v, splat4(Expression::u32(0xff))),
                    shifts,
                ),
            )?;
            b.finish(Expression::builtin(
                BuiltinFn::Dot,
                vec![bytes, splat4(Expression::u32(1))],
            ))
        }
        Poly::Unpack4xI8 => {
            let shifts = vec4u(module, [24, 16, 8, 0]);
            let b = HelperBuilder::new(module, name, &[("a", u32_ty)], vec4i_ty);
            let value = unpack_i8(b.arg(0), shifts, vec4i_ty);
            b.finish(value)
        }
        Poly::Unpack4xU8 => {
            let shifts = vec4u(module, [0, 8, 16, 24]);
            let b = HelperBuilder::new(module, name, &[("a", u32_ty)], vec4u_ty);
            let value = unpack_u8(b.arg(0), shifts);
            b.finish(value)
        }
        Poly::Shift => {
            return Err(TransformError::ice(NAME, "shifts are masked in place"));
        }
    };
    Ok(func)
}

/// `(vec4(a) >> shifts) & vec4(0xffu)`.
fn unpack_u8(packed: Expression, shifts: Expression) -> Expression {
    bin(
        BinaryOp::BitwiseAnd,
        bin(BinaryOp::ShiftRight, splat4(packed), shifts),
        splat4(Expression::u32(0xff)),
    )
}

/// `bitcast<vec4<i32>>(vec4(a) << shifts) >> vec4(24u)`, sign-extending
/// each byte.
fn unpack_i8(packed: Expression, shifts: Expression, vec4i: Handle<Type>) -> Expression {
    bin(
        BinaryOp::ShiftRight,
        Expression::bitcast(bin(BinaryOp::ShiftLeft, splat4(packed), shifts), vec4i),
        splat4(Expression::u32(24)),
    )
}

struct Polyfiller<'a> {
    cfg: &'a BuiltinPolyfillConfig,
    made: HashMap<(Poly, Handle<Type>), Handle<Function>>,
}

impl Polyfiller<'_> {
    fn helper(
        &mut self,
        module: &mut Module,
        poly: Poly,
        ty: Handle<Type>,
    ) -> Result<Handle<Function>, TransformError> {
        if let Some(&h) = self.made.get(&(poly, ty)) {
            return Ok(h);
        }
        let mut func = build_helper(module, poly, ty)?;
        func.name = module.fresh_name(poly.helper_name());
        log::trace!("{NAME}: generated '{}'", func.name);
        let h = module.functions.append(func);
        self.made.insert((poly, ty), h);
        Ok(h)
    }

    fn expr(
        &mut self,
        module: &mut Module,
        func: &Function,
        expr: &mut Expression,
    ) -> Result<(), TransformError> {
        let Some(poly) = classify(self.cfg, &ResolveContext::new(module, func), expr)? else {
            return Ok(());
        };
        match poly {
            Poly::Shift => {
                let Expression::Binary { left, right, .. } = expr else {
                    return Err(TransformError::ice(NAME, "shift is not a binary expression"));
                };
                let size = numeric_shape(&crate::util::inner_of(module, func, &**left)?)
                    .and_then(|(_, size)| size);
                let amount = std::mem::replace(&mut **right, Expression::u32(0));
                **right = bin(BinaryOp::BitwiseAnd, amount, splat(Literal::U32(31), size));
            }
            Poly::Div | Poly::Mod => {
                let Expression::Binary { left, right, .. } =
                    std::mem::replace(expr, Expression::u32(0))
                else {
                    return Err(TransformError::ice(NAME, "lost a binary expression"));
                };
                let (mut left, mut right) = (*left, *right);
                let left_size = crate::util::inner_of(module, func, &left)?.vector_size();
                let right_size = crate::util::inner_of(module, func, &right)?.vector_size();
                match (left_size, right_size) {
                    (Some(size), None) => {
                        right = Expression::Splat {
                            size,
                            value: Box::new(right),
                        }
                    }
                    (None, Some(size)) => {
                        left = Expression::Splat {
                            size,
                            value: Box::new(left),
                        }
                    }
                    _ => {}
                }
                let ty = type_of(module, func, &left)?;
                let helper = self.helper(module, poly, ty)?;
                *expr = Expression::call(helper, vec![left, right]);
            }
            _ => {
                let Expression::Builtin { arguments, .. } =
                    std::mem::replace(expr, Expression::u32(0))
                else {
                    return Err(TransformError::ice(NAME, "lost a builtin call"));
                };
                let ty = type_of(module, func, &arguments[0])?;
                let helper = self.helper(module, poly, ty)?;
                *expr = Expression::call(helper, arguments);
            }
        }
        Ok(())
    }
}

impl Transform for BuiltinPolyfill {
    fn name(&self) -> &'static str {
        NAME
    }

    fn requires(&self) -> &'static [&'static str] {
        &["Robustness"]
    }

    fn should_run(&self, module: &Module, inputs: &DataMap) -> bool {
        let Some(cfg) = inputs.get::<BuiltinPolyfillConfig>() else {
            return false;
        };
        module.functions.iter().any(|(_, func)| {
            if is_helper(&func.name) {
                return false;
            }
            let ctx = ResolveContext::new(module, func);
            let mut found = false;
            tinct_ir::walk_all_exprs(&func.body, &mut |e| {
                found = found || matches!(classify(cfg, &ctx, e), Ok(Some(_)));
            });
            found
        })
    }

    fn apply(
        &self,
        module: &Module,
        inputs: &DataMap,
        _outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let cfg = inputs
            .get::<BuiltinPolyfillConfig>()
            .ok_or_else(|| TransformError::missing(NAME, "BuiltinPolyfillConfig"))?;
        let mut out = module.clone();
        let mut polyfiller = Polyfiller {
            cfg,
            made: HashMap::new(),
        };
        for_each_function(&mut out, |module, _, func| {
            if is_helper(&func.name) {
                return Ok(());
            }
            let mut body = std::mem::take(&mut func.body);
            let mut result = Ok(());
            tinct_ir::walk_exprs_mut(&mut body, &mut |root| {
                if result.is_ok() {
                    result = try_rewrite(root, &mut |e| polyfiller.expr(module, func, e));
                }
            });
            func.body = body;
            result
        })?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{EntryPoint, LocalVariable};

    /// A tiny evaluator for the scalar integer helpers.
    #[derive(Clone, Copy, Debug, PartialEq)]
    enum V {
        U(u32),
        I(i32),
        B(bool),
    }

    fn eval_helper(func: &Function, args: &[V]) -> V {
        let mut locals: HashMap<Handle<LocalVariable>, V> = HashMap::new();
        for stmt in &func.body {
            match stmt {
                Statement::Declare {
                    local,
                    init: Some(e),
                } => {
                    let v = eval(e, args, &locals);
                    locals.insert(*local, v);
                }
                Statement::Store {
                    pointer: Expression::LocalVariable(l),
                    value,
                } => {
                    let v = eval(value, args, &locals);
                    locals.insert(*l, v);
                }
                Statement::Return { value: Some(e) } => return eval(e, args, &locals),
                other => panic!("unexpected statement {other:?}"),
            }
        }
        panic!("helper did not return")
    }

    fn eval(e: &Expression, args: &[V], locals: &HashMap<Handle<LocalVariable>, V>) -> V {
        let ev = |e: &Expression| eval(e, args, locals);
        match *e {
            Expression::Literal(Literal::U32(v)) => V::U(v),
            Expression::Literal(Literal::I32(v)) => V::I(v),
            Expression::Literal(Literal::Bool(v)) => V::B(v),
            Expression::FunctionArgument(i) => args[i as usize],
            Expression::LocalVariable(l) => locals[&l],
            Expression::Load { ref pointer } => ev(pointer),
            Expression::Bitcast { ref expr, .. } => match ev(expr) {
                V::U(v) => V::I(v as i32),
                V::I(v) => V::U(v as u32),
                other => panic!("bitcast of {other:?}"),
            },
            Expression::Unary {
                op: UnaryOp::BitwiseNot,
                ref expr,
            } => match ev(expr) {
                V::U(v) => V::U(!v),
                V::I(v) => V::I(!v),
                other => panic!("not of {other:?}"),
            },
            Expression::Builtin {
                fun: BuiltinFn::Min,
                ref arguments,
            } => match (ev(&arguments[0]), ev(&arguments[1])) {
                (V::U(a), V::U(b)) => V::U(a.min(b)),
                other => panic!("min of {other:?}"),
            },
            Expression::Builtin {
                fun: BuiltinFn::Select,
                ref arguments,
            } => match ev(&arguments[2]) {
                V::B(true) => ev(&arguments[1]),
                V::B(false) => ev(&arguments[0]),
                other => panic!("select on {other:?}"),
            },
            Expression::Binary {
                op,
                ref left,
                ref right,
            } => {
                use BinaryOp as Op;
                match (ev(left), ev(right)) {
                    (V::U(a), V::U(b)) => match op {
                        Op::Add => V::U(a.wrapping_add(b)),
                        Op::Subtract => V::U(a.wrapping_sub(b)),
                        Op::Multiply => V::U(a.wrapping_mul(b)),
                        Op::Divide => V::U(a / b),
                        Op::Modulo => V::U(a % b),
                        Op::BitwiseAnd => V::U(a & b),
                        Op::BitwiseOr => V::U(a | b),
                        Op::BitwiseXor => V::U(a ^ b),
                        Op::ShiftLeft => V::U(a.wrapping_shl(b)),
                        Op::ShiftRight => V::U(a.wrapping_shr(b)),
                        Op::Equal => V::B(a == b),
                        Op::NotEqual => V::B(a != b),
                        Op::Less => V::B(a < b),
                        Op::LessEqual => V::B(a <= b),
                        other => panic!("{other:?} on u32"),
                    },
                    (V::I(a), V::I(b)) => match op {
                        Op::Subtract => V::I(a.wrapping_sub(b)),
                        Op::Multiply => V::I(a.wrapping_mul(b)),
                        Op::Divide => V::I(a.wrapping_div(b)),
                        Op::Equal => V::B(a == b),
                        Op::Less => V::B(a < b),
                        other => panic!("{other:?} on i32"),
                    },
                    (V::B(a), V::B(b)) => match op {
                        Op::BitwiseAnd => V::B(a & b),
                        Op::BitwiseOr => V::B(a | b),
                        other => panic!("{other:?} on bool"),
                    },
                    other => panic!("mismatched operands {other:?}"),
                }
            }
            ref other => panic!("unexpected expression {other:?}"),
        }
    }

    /// `main` evaluates each of `calls` into a `let`.
    fn module_with(calls: impl FnOnce(&mut Module) -> Vec<Expression>) -> Module {
        let mut module = Module::default();
        let calls = calls(&mut module);
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::compute(1, 1, 1));
        for (i, call) in calls.into_iter().enumerate() {
            let ty = {
                let ctx = ResolveContext::new(&module, &main);
                let res = ctx.resolve(&call).unwrap();
                module.resolution_handle(&res)
            };
            let local = main.add_local(format!("r{i}"), ty, LocalKind::Let);
            main.body.push(Statement::Declare {
                local,
                init: Some(call),
            });
        }
        module.functions.append(main);
        module
    }

    fn run(module: &Module, cfg: BuiltinPolyfillConfig) -> Module {
        let mut inputs = DataMap::new();
        inputs.insert(cfg);
        assert!(BuiltinPolyfill.should_run(module, &inputs));
        let out = BuiltinPolyfill
            .apply(module, &inputs, &mut DataMap::new())
            .unwrap();
        tinct_ir::validate(&out).unwrap();
        assert!(!BuiltinPolyfill.should_run(&out, &inputs));
        out
    }

    fn helper<'m>(module: &'m Module, name: &str) -> &'m Function {
        &module.functions[module.function_by_name(name).unwrap()]
    }

    #[test]
    fn count_leading_zeros_is_bit_exact() {
        let module = module_with(|_| {
            vec![Expression::builtin(
                BuiltinFn::CountLeadingZeros,
                vec![Expression::i32(15)],
            )]
        });
        let out = run(
            &module,
            BuiltinPolyfillConfig {
                count_leading_zeros: true,
                ..Default::default()
            },
        );
        let text = tinct_ir::dump_module(&out);
        assert!(
            text.contains("let r0: i32 = tint_count_leading_zeros(15i);"),
            "{text}"
        );
        let clz = helper(&out, "tint_count_leading_zeros");
        assert_eq!(eval_helper(clz, &[V::I(15)]), V::I(28));
        assert_eq!(eval_helper(clz, &[V::I(0)]), V::I(32));
        assert_eq!(eval_helper(clz, &[V::I(1)]), V::I(31));
        assert_eq!(eval_helper(clz, &[V::I(-1)]), V::I(0));
    }

    #[test]
    fn bit_searches_match_native_results() {
        let module = module_with(|_| {
            vec![
                Expression::builtin(BuiltinFn::CountTrailingZeros, vec![Expression::u32(8)]),
                Expression::builtin(BuiltinFn::FirstLeadingBit, vec![Expression::i32(-8)]),
                Expression::builtin(BuiltinFn::FirstTrailingBit, vec![Expression::u32(8)]),
            ]
        });
        let out = run(
            &module,
            BuiltinPolyfillConfig {
                count_trailing_zeros: true,
                first_leading_bit: true,
                first_trailing_bit: true,
                ..Default::default()
            },
        );
        let ctz = helper(&out, "tint_count_trailing_zeros");
        assert_eq!(eval_helper(ctz, &[V::U(8)]), V::U(3));
        assert_eq!(eval_helper(ctz, &[V::U(0)]), V::U(32));
        let flb = helper(&out, "tint_first_leading_bit");
        assert_eq!(eval_helper(flb, &[V::I(1)]), V::I(0));
        assert_eq!(eval_helper(flb, &[V::I(i32::MAX)]), V::I(30));
        assert_eq!(eval_helper(flb, &[V::I(-8)]), V::I(2));
        assert_eq!(eval_helper(flb, &[V::I(-1)]), V::I(-1));
        let ftb = helper(&out, "tint_first_trailing_bit");
        assert_eq!(eval_helper(ftb, &[V::U(8)]), V::U(3));
        assert_eq!(eval_helper(ftb, &[V::U(0)]), V::U(u32::MAX));
    }

    #[test]
    fn integer_division_never_traps() {
        let module = module_with(|_| {
            vec![
                Expression::binary(BinaryOp::Divide, Expression::i32(7), Expression::i32(0)),
                Expression::binary(BinaryOp::Modulo, Expression::i32(-7), Expression::i32(2)),
            ]
        });
        let out = run(
            &module,
            BuiltinPolyfillConfig {
                int_div_mod: true,
                ..Default::default()
            },
        );
        let text = tinct_ir::dump_module(&out);
        assert!(
            text.contains(
                "return (lhs / select(rhs, 1i, ((rhs == 0i) | ((lhs == -2147483648i) & (rhs == -1i)))));"
            ),
            "{text}"
        );
        let div = helper(&out, "tint_div");
        assert_eq!(eval_helper(div, &[V::I(7), V::I(0)]), V::I(7));
        assert_eq!(eval_helper(div, &[V::I(i32::MIN), V::I(-1)]), V::I(i32::MIN));
        assert_eq!(eval_helper(div, &[V::I(-7), V::I(2)]), V::I(-3));
        let rem = helper(&out, "tint_mod");
        assert_eq!(eval_helper(rem, &[V::I(-7), V::I(2)]), V::I(-1));
        assert_eq!(eval_helper(rem, &[V::I(5), V::I(0)]), V::I(0));
    }

    #[test]
    fn helpers_are_shared_per_type() {
        let module = module_with(|_| {
            vec![
                Expression::builtin(BuiltinFn::CountLeadingZeros, vec![Expression::u32(1)]),
                Expression::builtin(BuiltinFn::CountLeadingZeros, vec![Expression::u32(2)]),
                Expression::builtin(BuiltinFn::CountLeadingZeros, vec![Expression::i32(3)]),
            ]
        });
        let out = run(
            &module,
            BuiltinPolyfillConfig {
                count_leading_zeros: true,
                ..Default::default()
            },
        );
        let names: Vec<&str> = out.functions.iter().map(|(_, f)| f.name.as_str()).collect();
        assert_eq!(
            names,
            ["main", "tint_count_leading_zeros", "tint_count_leading_zeros_1"]
        );
    }

    #[test]
    fn extract_bits_full_matches_native() {
        let module = module_with(|_| {
            vec![Expression::builtin(
                BuiltinFn::ExtractBits,
                vec![Expression::u32(0xabcd), Expression::u32(4), Expression::u32(8)],
            )]
        });
        let out = run(
            &module,
            BuiltinPolyfillConfig {
                extract_bits: BitsLevel::Full,
                ..Default::default()
            },
        );
        let f = helper(&out, "tint_extract_bits");
        assert_eq!(eval_helper(f, &[V::U(0xabcd), V::U(4), V::U(8)]), V::U(0xbc));
        assert_eq!(eval_helper(f, &[V::U(0xabcd), V::U(40), V::U(8)]), V::U(0));
        assert_eq!(eval_helper(f, &[V::U(0xabcd), V::U(0), V::U(32)]), V::U(0xabcd));
    }

    #[test]
    fn insert_bits_full_matches_native() {
        let module = module_with(|_| {
            vec![Expression::builtin(
                BuiltinFn::InsertBits,
                vec![
                    Expression::u32(0xffff),
                    Expression::u32(0),
                    Expression::u32(4),
                    Expression::u32(8),
                ],
            )]
        });
        let out = run(
            &module,
            BuiltinPolyfillConfig {
                insert_bits: BitsLevel::Full,
                ..Default::default()
            },
        );
        let f = helper(&out, "tint_insert_bits");
        assert_eq!(
            eval_helper(f, &[V::U(0xffff), V::U(0), V::U(4), V::U(8)]),
            V::U(0xf00f)
        );
        assert_eq!(
            eval_helper(f, &[V::U(0), V::U(0xff), V::U(0), V::U(32)]),
            V::U(0xff)
        );
    }

    #[test]
    fn shift_amounts_are_masked_once() {
        let module = module_with(|_| {
            vec![Expression::binary(
                BinaryOp::ShiftLeft,
                Expression::i32(1),
                Expression::u32(33),
            )]
        });
        let out = run(
            &module,
            BuiltinPolyfillConfig {
                bitshift_modulo: true,
                ..Default::default()
            },
        );
        let text = tinct_ir::dump_module(&out);
        assert!(text.contains("let r0: i32 = (1i << (33u & 31u));"), "{text}");
    }

    #[test]
    fn nothing_enabled_means_nothing_to_do() {
        let module = module_with(|_| {
            vec![Expression::builtin(
                BuiltinFn::CountLeadingZeros,
                vec![Expression::u32(1)],
            )]
        });
        let mut inputs = DataMap::new();
        inputs.insert(BuiltinPolyfillConfig::default());
        assert!(!BuiltinPolyfill.should_run(&module, &inputs));
        assert!(!BuiltinPolyfill.should_run(&module, &DataMap::new()));
    }
}
