//! Replaces `continue` statements that sit inside a `switch`.
//!
//! Several targets treat `continue` inside a `switch` as an error or give
//! it different semantics. The pass sets a flag and breaks out of the
//! switch instead, then continues after it:
//!
//! ```text
//! var tint_continue: bool = false;
//! switch x { case 0: { tint_continue = true; break; } ... }
//! if tint_continue { continue; }
//! ```

use tinct_ir::{Block, Expression, Function, Handle, Module, Scalar, Statement, Type};

use crate::util::{declare_var, for_each_function};
use crate::{DataMap, Transform, TransformError};

#[derive(Debug)]
pub struct RemoveContinueInSwitch;

/// Returns `true` if `block` holds a `continue` whose innermost breakable
/// construct is not a loop.
fn has_switch_continue(block: &Block) -> bool {
    block.iter().any(|s| match s {
        Statement::Continue => true,
        Statement::Loop { .. } => false,
        other => {
            let mut found = false;
            other.for_each_block(|b| found |= has_switch_continue(b));
            found
        }
    })
}

fn switch_has_continue(stmt: &Statement) -> bool {
    match stmt {
        Statement::Switch { cases, .. } => cases.iter().any(|c| has_switch_continue(&c.body)),
        _ => false,
    }
}

/// Replaces `continue` with `flag = true; break;`, staying out of loops.
fn replace_continues(block: &mut Block, flag: &Expression) {
    let old = std::mem::take(block);
    for mut stmt in old {
        match stmt {
            Statement::Continue => {
                block.push(Statement::store(flag.clone(), Expression::bool(true)));
                block.push(Statement::Break);
            }
            Statement::Loop { .. } => block.push(stmt),
            _ => {
                stmt.for_each_block_mut(|b| replace_continues(b, flag));
                block.push(stmt);
            }
        }
    }
}

fn rewrite_block(block: &mut Block, func: &mut Function, bool_ty: Handle<Type>) {
    let old = std::mem::take(block);
    for mut stmt in old {
        stmt.for_each_block_mut(|b| rewrite_block(b, func, bool_ty));
        if !switch_has_continue(&stmt) {
            block.push(stmt);
            continue;
        }
        let flag = declare_var(
            func,
            "tint_continue",
            bool_ty,
            Some(Expression::bool(false)),
            block,
        );
        if let Statement::Switch { cases, .. } = &mut stmt {
            for case in cases.iter_mut() {
                replace_continues(&mut case.body, &flag);
            }
        }
        block.push(stmt);
        block.push(Statement::If {
            condition: Expression::load(flag),
            accept: vec![Statement::Continue],
            reject: Vec::new(),
        });
    }
}

impl Transform for RemoveContinueInSwitch {
    fn name(&self) -> &'static str {
        "RemoveContinueInSwitch"
    }

    fn should_run(&self, module: &Module, _inputs: &DataMap) -> bool {
        module.functions.iter().any(|(_, f)| {
            let mut found = false;
            tinct_ir::walk_stmts(&f.body, &mut |s| found |= switch_has_continue(s));
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
        let bool_ty = out.scalar_type(Scalar::BOOL);
        for_each_function(&mut out, |_, _, func| {
            let mut body = std::mem::take(&mut func.body);
            rewrite_block(&mut body, func, bool_ty);
            func.body = body;
            Ok(())
        })?;
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{CaseSelector, EntryPoint, SwitchCase};

    #[test]
    fn continue_in_switch_becomes_flag() {
        let mut module = Module::default();
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::compute(1, 1, 1));
        main.body = vec![Statement::Loop {
            body: vec![
                Statement::Switch {
                    selector: Expression::i32(1),
                    cases: vec![
                        SwitchCase {
                            selectors: vec![CaseSelector::I32(1)],
                            body: vec![Statement::If {
                                condition: Expression::bool(true),
                                accept: vec![Statement::Continue],
                                reject: vec![],
                            }],
                        },
                        SwitchCase {
                            selectors: vec![CaseSelector::Default],
                            body: vec![],
                        },
                    ],
                },
                Statement::Break,
            ],
            continuing: vec![],
            break_if: None,
        }];
        let main = module.functions.append(main);
        assert!(RemoveContinueInSwitch.should_run(&module, &DataMap::new()));

        let out = RemoveContinueInSwitch
            .apply(&module, &DataMap::new(), &mut DataMap::new())
            .unwrap();
        tinct_ir::validate(&out).unwrap();
        let text = tinct_ir::dump_function(&out, &out.functions[main]);
        assert!(text.contains("var tint_continue: bool = false;"), "{text}");
        assert!(text.contains("tint_continue = true;"), "{text}");
        assert!(text.contains("if tint_continue {"), "{text}");
        assert!(!RemoveContinueInSwitch.should_run(&out, &DataMap::new()));
    }

    #[test]
    fn continue_in_nested_loop_is_untouched() {
        let block = vec![Statement::Switch {
            selector: Expression::i32(1),
            cases: vec![SwitchCase {
                selectors: vec![CaseSelector::Default],
                body: vec![Statement::Loop {
                    body: vec![Statement::Continue],
                    continuing: vec![],
                    break_if: None,
                }],
            }],
        }];
        assert!(!switch_has_continue(&block[0]));
    }
}
