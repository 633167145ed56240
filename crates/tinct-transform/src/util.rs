//! Rewriting helpers shared by the passes.

use tinct_ir::{
    BinaryOp, Block, Expression, Function, Handle, Literal, LocalKind, Module, ResolveContext,
    Scalar, Statement, Type, TypeInner, UnaryOp, VectorSize, fresh_local_name,
};

use crate::TransformError;

/// Temporarily moves function `h` out of the module so that `f` can edit
/// it while interning types into the module. A stub with the same
/// signature stands in while `f` runs, so calls to it still typify.
pub fn with_function<R>(
    module: &mut Module,
    h: Handle<Function>,
    f: impl FnOnce(&mut Module, &mut Function) -> R,
) -> R {
    let mut stub = Function::new(module.functions[h].name.clone());
    stub.arguments = module.functions[h].arguments.clone();
    stub.result = module.functions[h].result.clone();
    let mut func = std::mem::replace(&mut module.functions[h], stub);
    let out = f(module, &mut func);
    module.functions[h] = func;
    out
}

/// Runs `f` on every function in turn, stopping at the first error.
pub fn for_each_function(
    module: &mut Module,
    mut f: impl FnMut(&mut Module, Handle<Function>, &mut Function) -> Result<(), TransformError>,
) -> Result<(), TransformError> {
    for h in module.functions.handles().collect::<Vec<_>>() {
        with_function(module, h, |module, func| f(module, h, func))?;
    }
    Ok(())
}

/// Resolves `expr` in `func` and interns its type.
pub fn type_of(
    module: &mut Module,
    func: &Function,
    expr: &Expression,
) -> Result<Handle<Type>, TransformError> {
    let resolution = ResolveContext::new(module, func).resolve(expr)?;
    Ok(module.resolution_handle(&resolution))
}

/// Resolves the shape of `expr` in `func`.
pub fn inner_of(
    module: &Module,
    func: &Function,
    expr: &Expression,
) -> Result<TypeInner, TransformError> {
    Ok(ResolveContext::new(module, func).resolve_inner(expr)?)
}

/// Binds `value` to a fresh `let`, appending the declaration to `out`, and
/// returns an expression reading it.
pub fn bind_let(
    module: &mut Module,
    func: &mut Function,
    base: &str,
    value: Expression,
    out: &mut Block,
) -> Result<Expression, TransformError> {
    let ty = type_of(module, func, &value)?;
    let name = fresh_local_name(func, base);
    let local = func.add_local(name, ty, LocalKind::Let);
    out.push(Statement::Declare {
        local,
        init: Some(value),
    });
    Ok(Expression::LocalVariable(local))
}

/// Declares a fresh `var` of type `ty`, appending the declaration to `out`.
pub fn declare_var(
    func: &mut Function,
    base: &str,
    ty: Handle<Type>,
    init: Option<Expression>,
    out: &mut Block,
) -> Expression {
    let name = fresh_local_name(func, base);
    let local = func.add_local(name, ty, LocalKind::Var);
    out.push(Statement::Declare { local, init });
    Expression::LocalVariable(local)
}

/// Rebuilds every block of `block` (nested blocks first), letting `f`
/// replace each statement by any number of statements.
pub fn flat_map_stmts<E>(
    block: &mut Block,
    f: &mut dyn FnMut(Statement, &mut Block) -> Result<(), E>,
) -> Result<(), E> {
    let old = std::mem::take(block);
    for mut stmt in old {
        let mut nested = Ok(());
        stmt.for_each_block_mut(|b| {
            if nested.is_ok() {
                nested = flat_map_stmts(b, &mut *f);
            }
        });
        nested?;
        f(stmt, block)?;
    }
    Ok(())
}

/// Literals, arguments, overrides and `let`s: values that cannot change
/// within one invocation of the function.
pub fn is_stable(expr: &Expression, func: &Function) -> bool {
    match *expr {
        Expression::Literal(_) | Expression::FunctionArgument(_) | Expression::Override(_) => true,
        Expression::LocalVariable(l) => func.locals[l].kind == LocalKind::Let,
        _ => false,
    }
}

/// Replaces every dynamic index along the access chain `expr` that could
/// change before the chain is re-evaluated with a saved `<base_name>_save`
/// `let`.
pub fn save_indices(
    module: &mut Module,
    func: &mut Function,
    expr: &mut Expression,
    base_name: &str,
    out: &mut Block,
) -> Result<(), TransformError> {
    match expr {
        Expression::Access { base, index } => {
            save_indices(module, func, base, base_name, out)?;
            if !is_stable(index, func) {
                let value = std::mem::replace(&mut **index, Expression::u32(0));
                **index = bind_let(module, func, &format!("{base_name}_save"), value, out)?;
            }
        }
        Expression::AccessIndex { base, .. } => save_indices(module, func, base, base_name, out)?,
        _ => {}
    }
    Ok(())
}

/// Calls `f` on each expression root owned by `stmt`, with the block that
/// statements evaluated before that root should be appended to: `out` for
/// most roots, the end of `continuing` for a loop's `break if`.
pub fn visit_roots<E>(
    stmt: &mut Statement,
    out: &mut Block,
    f: &mut dyn FnMut(&mut Expression, &mut Block) -> Result<(), E>,
) -> Result<(), E> {
    match stmt {
        Statement::Loop {
            continuing,
            break_if: Some(cond),
            ..
        } => f(cond, continuing),
        other => {
            let mut result = Ok(());
            other.for_each_expr_mut(|e| {
                if result.is_ok() {
                    result = f(e, out);
                }
            });
            result
        }
    }
}

/// Post-order rewrite of `expr` that stops at the first error.
pub fn try_rewrite<E>(
    expr: &mut Expression,
    f: &mut dyn FnMut(&mut Expression) -> Result<(), E>,
) -> Result<(), E> {
    let mut result = Ok(());
    expr.for_each_child_mut(|child| {
        if result.is_ok() {
            result = try_rewrite(child, &mut *f);
        }
    });
    result?;
    f(expr)
}

/// A scalar literal, or a splat of it when `size` is set.
pub fn splat(value: Literal, size: Option<VectorSize>) -> Expression {
    match size {
        Some(size) => Expression::Splat {
            size,
            value: Box::new(Expression::Literal(value)),
        },
        None => Expression::Literal(value),
    }
}

/// The scalar and vector size of a numeric type.
pub fn numeric_shape(inner: &TypeInner) -> Option<(Scalar, Option<VectorSize>)> {
    match *inner {
        TypeInner::Scalar(s) => Some((s, None)),
        TypeInner::Vector { size, scalar } => Some((scalar, Some(size))),
        _ => None,
    }
}

/// Interns `scalar` or `vecN<scalar>`.
pub fn shaped_type(
    module: &mut Module,
    scalar: Scalar,
    size: Option<VectorSize>,
) -> Handle<Type> {
    match size {
        Some(size) => module.vector_type(size, scalar),
        None => module.scalar_type(scalar),
    }
}

/// `loop { if !(cond) { break; } body continuing { step } }`.
pub fn while_loop(cond: Expression, mut body: Block, step: Block) -> Statement {
    body.insert(
        0,
        Statement::If {
            condition: Expression::unary(UnaryOp::LogicalNot, cond),
            accept: vec![Statement::Break],
            reject: Vec::new(),
        },
    );
    Statement::Loop {
        body,
        continuing: step,
        break_if: None,
    }
}

/// `min(x, hi)`.
pub fn min(x: Expression, hi: Expression) -> Expression {
    Expression::builtin(tinct_ir::BuiltinFn::Min, vec![x, hi])
}

/// `select(f, t, cond)`.
pub fn select(f: Expression, t: Expression, cond: Expression) -> Expression {
    Expression::builtin(tinct_ir::BuiltinFn::Select, vec![f, t, cond])
}

/// Evaluates a constant scalar expression built from literals.
pub fn eval_literal(expr: &Expression) -> Option<Literal> {
    match *expr {
        Expression::Literal(lit) => Some(lit),
        Expression::Unary { op, ref expr } => match (op, eval_literal(expr)?) {
            (UnaryOp::Negate, Literal::I32(v)) => Some(Literal::I32(v.wrapping_neg())),
            (UnaryOp::Negate, Literal::F32(v)) => Some(Literal::F32(-v)),
            (UnaryOp::Negate, Literal::F16(v)) => Some(Literal::F16(-v)),
            (UnaryOp::LogicalNot, Literal::Bool(v)) => Some(Literal::Bool(!v)),
            (UnaryOp::BitwiseNot, Literal::I32(v)) => Some(Literal::I32(!v)),
            (UnaryOp::BitwiseNot, Literal::U32(v)) => Some(Literal::U32(!v)),
            _ => None,
        },
        Expression::Binary {
            op,
            ref left,
            ref right,
        } => eval_binary(op, eval_literal(left)?, eval_literal(right)?),
        _ => None,
    }
}

fn eval_binary(op: BinaryOp, l: Literal, r: Literal) -> Option<Literal> {
    use BinaryOp as B;
    Some(match (l, r) {
        (Literal::U32(a), Literal::U32(b)) => Literal::U32(match op {
            B::Add => a.wrapping_add(b),
            B::Subtract => a.wrapping_sub(b),
            B::Multiply => a.wrapping_mul(b),
            B::Divide => a.checked_div(b)?,
            B::Modulo => a.checked_rem(b)?,
            B::BitwiseAnd => a & b,
            B::BitwiseOr => a | b,
            B::BitwiseXor => a ^ b,
            _ => return None,
        }),
        (Literal::I32(a), Literal::I32(b)) => Literal::I32(match op {
            B::Add => a.wrapping_add(b),
            B::Subtract => a.wrapping_sub(b),
            B::Multiply => a.wrapping_mul(b),
            B::Divide => a.checked_div(b)?,
            B::Modulo => a.checked_rem(b)?,
            B::BitwiseAnd => a & b,
            B::BitwiseOr => a | b,
            B::BitwiseXor => a ^ b,
            _ => return None,
        }),
        (Literal::F32(a), Literal::F32(b)) => Literal::F32(match op {
            B::Add => a + b,
            B::Subtract => a - b,
            B::Multiply => a * b,
            B::Divide => a / b,
            _ => return None,
        }),
        _ => return None,
    })
}

/// Converts a numeric literal to `u32` if it is a non-negative integer.
pub fn literal_as_u32(lit: Literal) -> Option<u32> {
    match lit {
        Literal::U32(v) => Some(v),
        Literal::I32(v) => u32::try_from(v).ok(),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn evaluates_constant_arithmetic() {
        let e = Expression::binary(
            BinaryOp::Multiply,
            Expression::u32(4),
            Expression::binary(BinaryOp::Add, Expression::u32(1), Expression::u32(2)),
        );
        assert_eq!(eval_literal(&e), Some(Literal::U32(12)));
        let neg = Expression::unary(UnaryOp::Negate, Expression::i32(3));
        assert_eq!(eval_literal(&neg), Some(Literal::I32(-3)));
        let div0 = Expression::binary(BinaryOp::Divide, Expression::u32(1), Expression::u32(0));
        assert_eq!(eval_literal(&div0), None);
    }

    #[test]
    fn flat_map_rewrites_nested_blocks() {
        let mut block = vec![Statement::If {
            condition: Expression::bool(true),
            accept: vec![Statement::Discard],
            reject: vec![],
        }];
        flat_map_stmts::<()>(&mut block, &mut |stmt, out| {
            if stmt == Statement::Discard {
                out.push(Statement::Barrier(tinct_ir::Barrier::WORKGROUP));
            }
            out.push(stmt);
            Ok(())
        })
        .unwrap();
        match &block[0] {
            Statement::If { accept, .. } => assert_eq!(accept.len(), 2),
            other => panic!("unexpected {other:?}"),
        }
    }
}
