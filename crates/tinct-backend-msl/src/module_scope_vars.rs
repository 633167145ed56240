//! Threads module-scope variables through function parameters.
//!
//! MSL has no mutable or resource globals. Entry points receive buffers,
//! textures and samplers as parameters and declare their own `thread` and
//! `threadgroup` variables; every other function that touches a
//! module-scope variable, directly or through a callee, takes it as an
//! extra parameter: a pointer for memory, the handle itself for textures
//! and samplers.

use std::collections::{BTreeSet, HashMap};

use tinct_ir::{
    AddressSpace, Expression, Function, FunctionArgument, GlobalVariable, Handle, Module, Type,
    rewrite_all_exprs,
};
use tinct_transform::{DataMap, Transform, TransformError};

const NAME: &str = "ModuleScopeVarToEntryPointParam";

#[derive(Debug)]
pub struct ModuleScopeVarToEntryPointParam;

/// Variables that an MSL function can only reach through a parameter.
fn is_threaded(var: &GlobalVariable) -> bool {
    matches!(
        var.space,
        AddressSpace::Private
            | AddressSpace::Workgroup
            | AddressSpace::Uniform
            | AddressSpace::Storage
            | AddressSpace::Handle
            | AddressSpace::PushConstant
    )
}

fn touches_threaded(module: &Module, func: &Function) -> bool {
    Module::globals_referenced(func)
        .into_iter()
        .any(|g| module.global_variables.try_get(g).is_some_and(is_threaded))
}

/// The variables each function needs, its callees' included, in handle
/// order.
fn needed_vars(module: &Module) -> HashMap<Handle<Function>, Vec<Handle<GlobalVariable>>> {
    let mut needs: HashMap<Handle<Function>, Vec<Handle<GlobalVariable>>> = HashMap::new();
    for h in module.function_order() {
        let func = &module.functions[h];
        let mut set: BTreeSet<Handle<GlobalVariable>> = Module::globals_referenced(func)
            .into_iter()
            .filter(|&g| module.global_variables.try_get(g).is_some_and(is_threaded))
            .collect();
        for callee in Module::callees(func) {
            if let Some(vars) = needs.get(&callee) {
                set.extend(vars.iter().copied());
            }
        }
        needs.insert(h, set.into_iter().collect());
    }
    needs
}

impl Transform for ModuleScopeVarToEntryPointParam {
    fn name(&self) -> &'static str {
        NAME
    }

    fn should_run(&self, module: &Module, _inputs: &DataMap) -> bool {
        module
            .functions
            .iter()
            .any(|(_, f)| !f.is_entry_point() && touches_threaded(module, f))
    }

    fn requires(&self) -> &'static [&'static str] {
        &["CanonicalizeEntryPointIO"]
    }

    fn apply(
        &self,
        module: &Module,
        _inputs: &DataMap,
        _outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let mut out = module.clone();
        let needs = needed_vars(&out);

        let vars: Vec<_> = out
            .global_variables
            .iter()
            .filter(|(_, g)| is_threaded(g))
            .map(|(h, g)| (h, g.space, g.ty, g.access))
            .collect();
        let mut param_types: HashMap<Handle<GlobalVariable>, Handle<Type>> = HashMap::new();
        for (h, space, ty, access) in vars {
            let param = match space {
                AddressSpace::Handle => ty,
                _ => out.pointer_type(ty, space, access),
            };
            param_types.insert(h, param);
        }

        for h in out.function_order() {
            let extra = needs.get(&h).cloned().unwrap_or_default();
            let func = &mut out.functions[h];
            // Callers pass the variables their callees now take.
            rewrite_all_exprs(&mut func.body, &mut |e| {
                if let Expression::Call {
                    function,
                    arguments,
                } = e
                {
                    if let Some(vars) = needs.get(&*function) {
                        arguments.extend(vars.iter().map(|&g| Expression::GlobalVariable(g)));
                    }
                }
            });
            if func.is_entry_point() || extra.is_empty() {
                continue;
            }
            let first = func.arguments.len() as u32;
            for &g in &extra {
                let ty = param_types.get(&g).copied().ok_or_else(|| {
                    TransformError::ice(NAME, format!("no parameter type for global {g:?}"))
                })?;
                func.arguments.push(FunctionArgument {
                    name: out.global_variables[g].name.clone(),
                    ty,
                    binding: None,
                });
            }
            rewrite_all_exprs(&mut func.body, &mut |e| {
                if let Expression::GlobalVariable(g) = *e {
                    if let Some(i) = extra.iter().position(|&x| x == g) {
                        *e = Expression::FunctionArgument(first + i as u32);
                    }
                }
            });
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{EntryPoint, Scalar, Statement, StorageAccess, TypeInner};

    /// `main` calls `outer`, which calls `inner`; only `inner` touches the
    /// globals.
    fn call_chain() -> Module {
        let mut module = Module::default();
        let u32_ty = module.scalar_type(Scalar::U32);
        let counter = module
            .global_variables
            .append(GlobalVariable::new("counter", AddressSpace::Private, u32_ty));
        let buf = module.global_variables.append(
            GlobalVariable::new("buf", AddressSpace::Storage, u32_ty)
                .with_binding(0, 0)
                .with_access(StorageAccess::LOAD_STORE),
        );

        let mut inner = Function::new("inner");
        inner.body = vec![Statement::store(
            Expression::GlobalVariable(buf),
            Expression::load(Expression::GlobalVariable(counter)),
        )];
        let inner = module.functions.append(inner);

        let mut outer = Function::new("outer");
        outer.body = vec![Statement::Call(Expression::call(inner, vec![]))];
        let outer = module.functions.append(outer);

        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::compute(1, 1, 1));
        main.body = vec![Statement::Call(Expression::call(outer, vec![]))];
        module.functions.append(main);
        module
    }

    #[test]
    fn callees_take_pointer_parameters() {
        let module = call_chain();
        assert!(ModuleScopeVarToEntryPointParam.should_run(&module, &DataMap::new()));
        let out = ModuleScopeVarToEntryPointParam
            .apply(&module, &DataMap::new(), &mut DataMap::new())
            .unwrap();
        tinct_ir::validate(&out).unwrap();

        let inner = &out.functions[out.function_by_name("inner").unwrap()];
        let names: Vec<_> = inner.arguments.iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, ["counter", "buf"]);
        assert!(matches!(
            out.types[inner.arguments[1].ty].inner,
            TypeInner::Pointer {
                space: AddressSpace::Storage,
                ..
            }
        ));
        assert!(Module::globals_referenced(inner).is_empty());

        let outer = &out.functions[out.function_by_name("outer").unwrap()];
        assert_eq!(outer.arguments.len(), 2);
        let main = &out.functions[out.function_by_name("main").unwrap()];
        assert!(main.arguments.is_empty());
        assert_eq!(Module::globals_referenced(main).len(), 2);

        assert!(!ModuleScopeVarToEntryPointParam.should_run(&out, &DataMap::new()));
    }
}
