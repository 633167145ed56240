//! Gives `discard` demote-to-helper semantics.
//!
//! A discarded invocation keeps running as a helper so that derivatives in
//! its quad stay defined. `discard` clears a module-scope flag instead of
//! terminating, writes with visible side effects are guarded by the flag,
//! and the entry point discards for real right before it returns.

use std::collections::BTreeSet;

use tinct_ir::{
    AddressSpace, Block, Expression, Function, GlobalVariable, Handle, Module, Scalar,
    ShaderStage, Statement, TextureFn, UnaryOp,
};

use crate::util::{declare_var, flat_map_stmts, inner_of, type_of, with_function};
use crate::{DataMap, Transform, TransformError};

const NAME: &str = "DemoteToHelper";
const FLAG: &str = "continue_execution";

#[derive(Debug)]
pub struct DemoteToHelper;

/// `if (!flag) { discard; }`, the only `discard` left once the pass ran.
fn is_final_discard(stmt: &Statement) -> bool {
    let Statement::If {
        condition: Expression::Unary {
            op: UnaryOp::LogicalNot,
            expr,
        },
        accept,
        reject,
    } = stmt
    else {
        return false;
    };
    matches!(**expr, Expression::Load { ref pointer } if matches!(**pointer, Expression::GlobalVariable(_)))
        && matches!(accept.as_slice(), [Statement::Discard])
        && reject.is_empty()
}

fn has_discard(block: &Block) -> bool {
    block.iter().any(|stmt| match stmt {
        Statement::Discard => true,
        s if is_final_discard(s) => false,
        s => {
            let mut found = false;
            s.for_each_block(|b| found |= has_discard(b));
            found
        }
    })
}

/// Functions that may run as part of a fragment shader that discards.
fn targets(module: &Module) -> BTreeSet<Handle<Function>> {
    let mut out = BTreeSet::new();
    for (h, f) in module.entry_points() {
        if f.stage() != Some(ShaderStage::Fragment) {
            continue;
        }
        let reachable = module.reachable_functions(h);
        if reachable
            .iter()
            .any(|&r| has_discard(&module.functions[r].body))
        {
            out.extend(reachable);
        }
    }
    out
}

fn is_guarded_call(expr: &Expression) -> bool {
    match *expr {
        Expression::Builtin { fun, .. } => fun.is_atomic() && fun != tinct_ir::BuiltinFn::AtomicLoad,
        Expression::Texture(ref call) => call.fun == TextureFn::Store,
        _ => false,
    }
}

fn final_discard(flag: Handle<GlobalVariable>) -> Statement {
    Statement::If {
        condition: Expression::unary(
            UnaryOp::LogicalNot,
            Expression::load(Expression::GlobalVariable(flag)),
        ),
        accept: vec![Statement::Discard],
        reject: vec![],
    }
}

fn demote(
    module: &mut Module,
    func: &mut Function,
    flag: Handle<GlobalVariable>,
) -> Result<(), TransformError> {
    let flag_set = || Expression::load(Expression::GlobalVariable(flag));
    let guard = |stmt: Statement| Statement::If {
        condition: flag_set(),
        accept: vec![stmt],
        reject: vec![],
    };
    let entry = func.is_entry_point();
    let mut body = std::mem::take(&mut func.body);
    flat_map_stmts(&mut body, &mut |stmt, out| {
        match stmt {
            Statement::Discard => out.push(Statement::store(
                Expression::GlobalVariable(flag),
                Expression::bool(false),
            )),
            Statement::Store { ref pointer, .. }
                if inner_of(module, func, pointer)?.pointer_space() == Some(AddressSpace::Storage) =>
            {
                out.push(guard(stmt))
            }
            Statement::Store { ref value, .. } | Statement::Call(ref value)
                if is_guarded_call(value) =>
            {
                out.push(guard(stmt))
            }
            Statement::Declare {
                local,
                init: Some(value),
            } if is_guarded_call(&value) => {
                let ty = type_of(module, func, &value)?;
                let result = declare_var(func, "tint_atomic_result", ty, None, out);
                out.push(guard(Statement::store(result.clone(), value)));
                out.push(Statement::Declare {
                    local,
                    init: Some(Expression::load(result)),
                });
            }
            Statement::Return { .. } if entry => {
                out.push(final_discard(flag));
                out.push(stmt);
            }
            other => out.push(other),
        }
        Ok::<(), TransformError>(())
    })?;
    if entry && !tinct_ir::is_terminated(&body) {
        body.push(final_discard(flag));
    }
    func.body = body;
    Ok(())
}

impl Transform for DemoteToHelper {
    fn name(&self) -> &'static str {
        NAME
    }

    fn requires(&self) -> &'static [&'static str] {
        &["CanonicalizeEntryPointIO"]
    }

    fn should_run(&self, module: &Module, _inputs: &DataMap) -> bool {
        !targets(module).is_empty()
    }

    fn apply(
        &self,
        module: &Module,
        _inputs: &DataMap,
        _outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let mut out = module.clone();
        let targets = targets(&out);
        let bool_ty = out.scalar_type(Scalar::BOOL);
        let mut var = GlobalVariable::new(out.fresh_name(FLAG), AddressSpace::Private, bool_ty);
        var.init = Some(Expression::bool(true));
        let flag = out.global_variables.append(var);
        for h in targets {
            with_function(&mut out, h, |module, func| demote(module, func, flag))?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{
        Binding, BuiltIn, BuiltinFn, EntryPoint, FunctionArgument, LocalKind, StorageAccess,
    };

    fn fragment(with_discard: bool) -> Module {
        let mut module = Module::default();
        let u32_ty = module.scalar_type(Scalar::U32);
        let bool_ty = module.scalar_type(Scalar::BOOL);
        let arr = module.array_type(u32_ty, 4);
        let atomic = module.insert_type(tinct_ir::TypeInner::Atomic(Scalar::U32));
        let buf = module.global_variables.append(
            GlobalVariable::new("buf", AddressSpace::Storage, arr)
                .with_binding(0, 0)
                .with_access(StorageAccess::LOAD_STORE),
        );
        let counter = module.global_variables.append(
            GlobalVariable::new("counter", AddressSpace::Storage, atomic)
                .with_binding(0, 1)
                .with_access(StorageAccess::LOAD_STORE),
        );
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::graphics(ShaderStage::Fragment));
        main.arguments = vec![FunctionArgument {
            name: "front".into(),
            ty: bool_ty,
            binding: Some(Binding::BuiltIn(BuiltIn::FrontFacing)),
        }];
        let old = main.add_local("old", u32_ty, LocalKind::Let);
        main.body = vec![
            Statement::If {
                condition: Expression::FunctionArgument(0),
                accept: if with_discard { vec![Statement::Discard] } else { vec![] },
                reject: vec![],
            },
            Statement::store(
                Expression::access_index(Expression::GlobalVariable(buf), 0),
                Expression::u32(1),
            ),
            Statement::Declare {
                local: old,
                init: Some(Expression::builtin(
                    BuiltinFn::AtomicAdd,
                    vec![Expression::GlobalVariable(counter), Expression::u32(1)],
                )),
            },
        ];
        module.functions.append(main);
        module
    }

    #[test]
    fn discard_becomes_a_flag() {
        let module = fragment(true);
        assert!(DemoteToHelper.should_run(&module, &DataMap::new()));
        let out = DemoteToHelper
            .apply(&module, &DataMap::new(), &mut DataMap::new())
            .unwrap();
        tinct_ir::validate(&out).unwrap();
        let text = tinct_ir::dump_module(&out);
        assert!(text.contains("var<private> continue_execution: bool = true;"), "{text}");
        assert!(text.contains("        continue_execution = false;"), "{text}");
        assert!(
            text.contains("    if continue_execution {\n        buf[0] = 1u;\n    }"),
            "{text}"
        );
        assert!(text.contains("    var tint_atomic_result: u32;"), "{text}");
        assert!(
            text.contains("        tint_atomic_result = atomicAdd(&counter, 1u);"),
            "{text}"
        );
        assert!(text.contains("    let old: u32 = tint_atomic_result;"), "{text}");
        assert!(
            text.ends_with("    if (!continue_execution) {\n        discard;\n    }\n}\n\n"),
            "{text}"
        );
        assert!(!DemoteToHelper.should_run(&out, &DataMap::new()));
    }

    #[test]
    fn shaders_without_discard_are_left_alone() {
        assert!(!DemoteToHelper.should_run(&fragment(false), &DataMap::new()));
    }
}
