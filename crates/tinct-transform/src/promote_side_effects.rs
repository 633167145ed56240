//! Hoists side-effecting calls out of expressions into `let`s, so that
//! backends may reorder the remaining operands freely.
//!
//! Operands evaluated before a hoisted call are hoisted too, preserving
//! left-to-right evaluation. `&&` and `||` with a side-effecting right
//! operand become an `if` over a temporary `var`.

use tinct_ir::{
    AddressSpace, BinaryOp, Block, Expression, Function, LocalKind, Module, Scalar, Statement,
    UnaryOp,
};

use crate::util::{
    bind_let, declare_var, flat_map_stmts, for_each_function, inner_of, visit_roots,
};
use crate::{DataMap, Transform, TransformError};

#[derive(Debug)]
pub struct PromoteSideEffectsToDecl;

/// Calls and atomics that produce a value.
fn is_effectful_call(expr: &Expression) -> bool {
    match expr {
        Expression::Call { .. } => true,
        Expression::Builtin { fun, .. } => fun.is_atomic() && !fun.is_void(),
        _ => false,
    }
}

/// Operands whose value cannot change between evaluation and use.
fn is_stable(module: &Module, func: &Function, expr: &Expression) -> bool {
    match *expr {
        Expression::Literal(_)
        | Expression::ZeroValue(_)
        | Expression::FunctionArgument(_)
        | Expression::Override(_) => true,
        Expression::LocalVariable(l) => func.locals[l].kind == LocalKind::Let,
        Expression::GlobalVariable(g) => module.global_variables[g].space == AddressSpace::Handle,
        _ => false,
    }
}

fn has_inner_call(root: &Expression) -> bool {
    let mut found = false;
    root.for_each_child(|c| found |= c.any(&mut |e| is_effectful_call(e)));
    found
}

struct Promoter<'a> {
    module: &'a mut Module,
    func: &'a mut Function,
}

impl Promoter<'_> {
    fn expr(&mut self, e: &mut Expression, root: bool, pre: &mut Block) -> Result<(), TransformError> {
        if let Expression::Binary {
            op: op @ (BinaryOp::LogicalAnd | BinaryOp::LogicalOr),
            left,
            right,
        } = e
        {
            if right.has_side_effects() {
                let op = *op;
                self.expr(left, false, pre)?;
                let bool_ty = self.module.scalar_type(Scalar::BOOL);
                let left = std::mem::replace(&mut **left, Expression::bool(false));
                let tmp = declare_var(self.func, "tint_tmp", bool_ty, Some(left), pre);
                let mut accept = Block::new();
                self.expr(right, false, &mut accept)?;
                let right = std::mem::replace(&mut **right, Expression::bool(false));
                accept.push(Statement::store(tmp.clone(), right));
                let value = Expression::load(tmp);
                let condition = match op {
                    BinaryOp::LogicalAnd => value.clone(),
                    _ => Expression::unary(UnaryOp::LogicalNot, value.clone()),
                };
                pre.push(Statement::If {
                    condition,
                    accept,
                    reject: Block::new(),
                });
                *e = value;
                return Ok(());
            }
        }

        let mut effects = Vec::new();
        e.for_each_child(|c| effects.push(c.has_side_effects()));
        let last = effects.iter().rposition(|&b| b);

        let mut result = Ok(());
        let mut i = 0;
        e.for_each_child_mut(|child| {
            if result.is_ok() {
                let hoist = last.is_some_and(|last| i < last);
                result = self.operand(child, hoist, pre);
            }
            i += 1;
        });
        result?;

        if !root && is_effectful_call(e) {
            let value = std::mem::replace(e, Expression::bool(false));
            *e = bind_let(self.module, self.func, "tint_symbol", value, pre)?;
        }
        Ok(())
    }

    fn operand(
        &mut self,
        child: &mut Expression,
        hoist: bool,
        pre: &mut Block,
    ) -> Result<(), TransformError> {
        self.expr(child, false, pre)?;
        if !hoist || is_stable(self.module, self.func, child) {
            return Ok(());
        }
        if inner_of(self.module, self.func, child)?.is_pointer() {
            return Ok(());
        }
        let value = std::mem::replace(child, Expression::bool(false));
        *child = bind_let(self.module, self.func, "tint_symbol", value, pre)?;
        Ok(())
    }
}

impl Transform for PromoteSideEffectsToDecl {
    fn name(&self) -> &'static str {
        "PromoteSideEffectsToDecl"
    }

    fn should_run(&self, module: &Module, _inputs: &DataMap) -> bool {
        module.functions.iter().any(|(_, f)| {
            let mut found = false;
            tinct_ir::walk_exprs(&f.body, &mut |root| found |= has_inner_call(root));
            found
        })
    }

    fn apply(
        &self,
        module: &Module,
        _inputs: &DataMap,
        _outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let mut out = module.clone();
        for_each_function(&mut out, |module, _, func| {
            let mut body = std::mem::take(&mut func.body);
            let mut promoter = Promoter {
                module: &mut *module,
                func: &mut *func,
            };
            flat_map_stmts(&mut body, &mut |mut stmt, out| {
                visit_roots(&mut stmt, out, &mut |root, pre| promoter.expr(root, true, pre))?;
                out.push(stmt);
                Ok::<(), TransformError>(())
            })?;
            func.body = body;
            Ok(())
        })?;
        Ok(out)
    }

    fn requires(&self) -> &'static [&'static str] {
        &["Unshadow"]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{EntryPoint, FunctionResult, Handle};

    /// `fn f() -> i32 { return 1i; }` plus an empty compute entry point.
    fn module_with_f() -> (Module, Handle<Function>, Handle<Function>) {
        let mut module = Module::default();
        let i32_ty = module.scalar_type(Scalar::I32);
        let mut f = Function::new("f");
        f.result = Some(FunctionResult {
            ty: i32_ty,
            binding: None,
        });
        f.body = vec![Statement::Return {
            value: Some(Expression::i32(1)),
        }];
        let f = module.functions.append(f);
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::compute(1, 1, 1));
        let main = module.functions.append(main);
        (module, f, main)
    }

    fn run(module: &Module, main: Handle<Function>) -> String {
        let out = PromoteSideEffectsToDecl
            .apply(module, &DataMap::new(), &mut DataMap::new())
            .unwrap();
        tinct_ir::validate(&out).unwrap();
        assert!(!PromoteSideEffectsToDecl.should_run(&out, &DataMap::new()));
        tinct_ir::dump_function(&out, &out.functions[main])
    }

    #[test]
    fn operands_before_a_call_are_hoisted_in_order() {
        let (mut module, f, main) = module_with_f();
        let i32_ty = module.scalar_type(Scalar::I32);
        let func = &mut module.functions[main];
        let x = func.add_local("x", i32_ty, LocalKind::Var);
        let y = func.add_local("y", i32_ty, LocalKind::Let);
        func.body = vec![
            Statement::Declare {
                local: x,
                init: Some(Expression::i32(0)),
            },
            Statement::Declare {
                local: y,
                init: Some(Expression::binary(
                    BinaryOp::Add,
                    Expression::load(Expression::LocalVariable(x)),
                    Expression::call(f, vec![]),
                )),
            },
        ];
        assert!(PromoteSideEffectsToDecl.should_run(&module, &DataMap::new()));
        let text = run(&module, main);
        let expected = "    let tint_symbol: i32 = x;\n    \
                        let tint_symbol_1: i32 = f();\n    \
                        let y: i32 = (tint_symbol + tint_symbol_1);\n";
        assert!(text.contains(expected), "{text}");
    }

    #[test]
    fn short_circuit_with_call_becomes_if() {
        let (mut module, f, main) = module_with_f();
        let bool_ty = module.scalar_type(Scalar::BOOL);
        let func = &mut module.functions[main];
        let b = func.add_local("b", bool_ty, LocalKind::Let);
        func.body = vec![Statement::Declare {
            local: b,
            init: Some(Expression::binary(
                BinaryOp::LogicalOr,
                Expression::bool(false),
                Expression::binary(BinaryOp::Equal, Expression::call(f, vec![]), Expression::i32(1)),
            )),
        }];
        let text = run(&module, main);
        assert!(text.contains("var tint_tmp: bool = false;"), "{text}");
        assert!(text.contains("if (!tint_tmp) {"), "{text}");
        assert!(text.contains("let tint_symbol: i32 = f();"), "{text}");
        assert!(text.contains("tint_tmp = (tint_symbol == 1i);"), "{text}");
        assert!(text.contains("let b: bool = tint_tmp;"), "{text}");
    }

    #[test]
    fn root_calls_stay_in_place() {
        let (mut module, f, main) = module_with_f();
        let i32_ty = module.scalar_type(Scalar::I32);
        let func = &mut module.functions[main];
        let y = func.add_local("y", i32_ty, LocalKind::Let);
        func.body = vec![Statement::Declare {
            local: y,
            init: Some(Expression::call(f, vec![])),
        }];
        assert!(!PromoteSideEffectsToDecl.should_run(&module, &DataMap::new()));
    }
}
