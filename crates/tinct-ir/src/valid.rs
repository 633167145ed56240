//! Structural validation of a module.
//!
//! The validator checks what passes rely on: handles resolve, every
//! expression typifies, stores write through pointers, calls match their
//! callee, returns match the function result, `break`/`continue` sit inside
//! a construct they can leave, and module-scope names are unique.

use std::collections::HashSet;

use crate::Module;
use crate::arena::Handle;
use crate::error::IrError;
use crate::expr::Expression;
use crate::func::{Function, LocalKind, ShaderStage};
use crate::stmt::Statement;
use crate::typifier::ResolveContext;
use crate::types::{Type, TypeInner};

/// Validates `module`, returning the first problem found.
pub fn validate(module: &Module) -> Result<(), IrError> {
    validate_types(module)?;
    validate_names(module)?;

    let scope = ResolveContext::module_scope(module);
    for (_, var) in module.global_variables.iter() {
        check_type_handle(module, var.ty)?;
        if let Some(init) = var.init.as_ref() {
            scope.resolve(init)?;
        }
    }
    for (_, o) in module.overrides.iter() {
        check_type_handle(module, o.ty)?;
        if !matches!(module.types[o.ty].inner, TypeInner::Scalar(_)) {
            return Err(IrError::invalid(
                o.name.clone(),
                "override must have a scalar type",
            ));
        }
        if let Some(init) = o.init.as_ref() {
            scope.resolve(init)?;
        }
    }
    for (_, func) in module.functions.iter() {
        validate_function(module, func)?;
    }
    Ok(())
}

fn check_type_handle(module: &Module, ty: Handle<Type>) -> Result<(), IrError> {
    if module.types.try_get(ty).is_none() {
        return Err(IrError::BadHandle {
            kind: "type",
            index: ty.index(),
            size: module.types.len(),
        });
    }
    Ok(())
}

fn validate_types(module: &Module) -> Result<(), IrError> {
    for (h, ty) in module.types.iter() {
        let refs: Vec<Handle<Type>> = match ty.inner {
            TypeInner::Pointer { base, .. } | TypeInner::Array { base, .. } => vec![base],
            TypeInner::Struct { ref members, .. } => members.iter().map(|m| m.ty).collect(),
            _ => Vec::new(),
        };
        // Only composites need declaring before use; members added by later
        // passes may be plain scalars interned after the struct.
        for r in refs {
            let composite = matches!(
                module.types.try_get(r).map(|t| &t.inner),
                Some(TypeInner::Struct { .. } | TypeInner::Array { .. })
            );
            if r >= h && (composite || module.types.try_get(r).is_none()) {
                return Err(IrError::invalid(
                    format!("type {h:?}"),
                    format!("refers to later type {r:?}"),
                ));
            }
        }
    }
    Ok(())
}

fn validate_names(module: &Module) -> Result<(), IrError> {
    let mut seen = HashSet::new();
    let names = module
        .functions
        .iter()
        .map(|(_, f)| f.name.as_str())
        .chain(module.global_variables.iter().map(|(_, g)| g.name.as_str()))
        .chain(module.overrides.iter().map(|(_, o)| o.name.as_str()));
    for name in names {
        if !seen.insert(name) {
            return Err(IrError::invalid(
                "<module>",
                format!("duplicate module-scope name '{name}'"),
            ));
        }
    }
    Ok(())
}

struct FunctionValidator<'a> {
    module: &'a Module,
    func: &'a Function,
    ctx: ResolveContext<'a>,
}

impl FunctionValidator<'_> {
    fn invalid(&self, message: impl Into<String>) -> IrError {
        IrError::invalid(self.func.name.clone(), message)
    }

    fn expr(&self, expr: &Expression) -> Result<(), IrError> {
        let mut result = Ok(());
        expr.visit(&mut |e| {
            if result.is_err() {
                return;
            }
            if let Expression::Call {
                function,
                ref arguments,
            } = *e
            {
                result = match self.module.functions.try_get(function) {
                    None => Err(IrError::BadHandle {
                        kind: "function",
                        index: function.index(),
                        size: self.module.functions.len(),
                    }),
                    Some(callee) if callee.is_entry_point() => {
                        Err(self.invalid(format!("call of entry point '{}'", callee.name)))
                    }
                    Some(callee) if callee.arguments.len() != arguments.len() => {
                        Err(self.invalid(format!(
                            "'{}' expects {} arguments, got {}",
                            callee.name,
                            callee.arguments.len(),
                            arguments.len()
                        )))
                    }
                    Some(_) => Ok(()),
                };
            }
        });
        result?;
        match *expr {
            Expression::Call { function, .. }
                if self.module.functions[function].result.is_none() =>
            {
                Ok(())
            }
            Expression::Builtin { fun, .. } if fun.is_void() => Ok(()),
            Expression::Texture(ref call) if call.fun == crate::TextureFn::Store => Ok(()),
            _ => self.ctx.resolve(expr).map(|_| ()),
        }
    }

    fn block(&self, block: &[Statement], in_loop: bool, in_switch: bool) -> Result<(), IrError> {
        for stmt in block {
            self.stmt(stmt, in_loop, in_switch)?;
        }
        Ok(())
    }

    fn stmt(&self, stmt: &Statement, in_loop: bool, in_switch: bool) -> Result<(), IrError> {
        match stmt {
            Statement::Declare { local, init } => {
                let l = self.func.locals.try_get(*local).ok_or(IrError::BadHandle {
                    kind: "local",
                    index: local.index(),
                    size: self.func.locals.len(),
                })?;
                check_type_handle(self.module, l.ty)?;
                match init {
                    Some(e) => self.expr(e)?,
                    None if l.kind == LocalKind::Let => {
                        return Err(self.invalid(format!("let '{}' has no initializer", l.name)));
                    }
                    None => {}
                }
            }
            Statement::Store { pointer, value } => {
                self.expr(value)?;
                if !self.ctx.resolve_inner(pointer)?.is_pointer() {
                    return Err(self.invalid("store target is not a pointer"));
                }
            }
            Statement::Call(e) => {
                if !matches!(
                    e,
                    Expression::Call { .. } | Expression::Builtin { .. } | Expression::Texture(_)
                ) {
                    return Err(self.invalid("call statement does not evaluate a call"));
                }
                self.expr(e)?;
            }
            Statement::If {
                condition,
                accept,
                reject,
            } => {
                self.expr(condition)?;
                self.block(accept, in_loop, in_switch)?;
                self.block(reject, in_loop, in_switch)?;
            }
            Statement::Loop {
                body,
                continuing,
                break_if,
            } => {
                self.block(body, true, false)?;
                self.block(continuing, true, false)?;
                if let Some(cond) = break_if {
                    self.expr(cond)?;
                }
            }
            Statement::Switch { selector, cases } => {
                self.expr(selector)?;
                let defaults = cases
                    .iter()
                    .flat_map(|c| c.selectors.iter())
                    .filter(|s| **s == crate::CaseSelector::Default)
                    .count();
                if defaults != 1 {
                    return Err(self.invalid("switch must have exactly one default selector"));
                }
                for case in cases {
                    self.block(&case.body, in_loop, true)?;
                }
            }
            Statement::Break => {
                if !in_loop && !in_switch {
                    return Err(self.invalid("break outside of a loop or switch"));
                }
            }
            Statement::Continue => {
                if !in_loop {
                    return Err(self.invalid("continue outside of a loop"));
                }
            }
            Statement::Return { value } => match (value, self.func.result.as_ref()) {
                (Some(v), Some(_)) => self.expr(v)?,
                (None, None) => {}
                (Some(_), None) => return Err(self.invalid("return value in a void function")),
                (None, Some(_)) => return Err(self.invalid("missing return value")),
            },
            Statement::Discard => {
                if self.func.stage().is_some_and(|s| s != ShaderStage::Fragment) {
                    return Err(self.invalid("discard outside of a fragment shader"));
                }
            }
            Statement::Barrier(_) => {}
            Statement::Block(b) => self.block(b, in_loop, in_switch)?,
        }
        Ok(())
    }
}

fn validate_function(module: &Module, func: &Function) -> Result<(), IrError> {
    for arg in &func.arguments {
        check_type_handle(module, arg.ty)?;
    }
    if let Some(result) = func.result.as_ref() {
        check_type_handle(module, result.ty)?;
    }
    for (_, local) in func.locals.iter() {
        check_type_handle(module, local.ty)?;
    }
    if let Some(ep) = func.entry_point.as_ref() {
        if ep.stage == ShaderStage::Compute {
            if let Some(size) = ep.literal_workgroup_size() {
                if size.contains(&0) {
                    return Err(IrError::InvalidWorkgroupSize(size));
                }
            }
        }
        for arg in &func.arguments {
            let has_io = arg.binding.is_some()
                || matches!(
                    module.types[arg.ty].inner,
                    TypeInner::Struct { ref members, .. }
                        if members.iter().all(|m| m.binding.is_some())
                );
            if !has_io {
                return Err(IrError::invalid(
                    func.name.clone(),
                    format!("entry-point argument '{}' has no IO attribute", arg.name),
                ));
            }
        }
    }
    let validator = FunctionValidator {
        module,
        func,
        ctx: ResolveContext::new(module, func),
    };
    validator.block(&func.body, false, false)
}
