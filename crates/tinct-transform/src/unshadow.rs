//! Renames function-scope declarations that shadow other declarations.

use std::collections::HashSet;

use tinct_ir::{Function, Module};

use crate::{DataMap, Transform, TransformError};

/// Gives every parameter and local a name that no module-scope
/// declaration and no other declaration in the same function uses, so
/// that printers can emit names without tracking scopes.
#[derive(Debug)]
pub struct Unshadow;

fn module_names(module: &Module) -> HashSet<String> {
    module
        .functions
        .iter()
        .map(|(_, f)| f.name.clone())
        .chain(module.global_variables.iter().map(|(_, g)| g.name.clone()))
        .chain(module.overrides.iter().map(|(_, o)| o.name.clone()))
        .chain(module.types.iter().filter_map(|(_, t)| t.name.clone()))
        .collect()
}

fn function_shadows(func: &Function, module: &HashSet<String>) -> bool {
    let mut seen = HashSet::new();
    func.arguments
        .iter()
        .map(|a| a.name.as_str())
        .chain(func.locals.iter().map(|(_, l)| l.name.as_str()))
        .any(|name| module.contains(name) || !seen.insert(name))
}

impl Transform for Unshadow {
    fn name(&self) -> &'static str {
        "Unshadow"
    }

    fn should_run(&self, module: &Module, _inputs: &DataMap) -> bool {
        let names = module_names(module);
        module
            .functions
            .iter()
            .any(|(_, f)| function_shadows(f, &names))
    }

    fn apply(
        &self,
        module: &Module,
        _inputs: &DataMap,
        _outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let names = module_names(module);
        let mut out = module.clone();
        for (_, func) in out.functions.iter_mut() {
            let mut used: HashSet<String> = HashSet::new();
            let mut rename = |name: &mut String| {
                if names.contains(name.as_str()) || used.contains(name.as_str()) {
                    let fresh = (1..)
                        .map(|i| format!("{name}_{i}"))
                        .find(|n| !names.contains(n) && !used.contains(n))
                        .unwrap_or_else(|| name.clone());
                    *name = fresh;
                }
                used.insert(name.clone());
            };
            for arg in func.arguments.iter_mut() {
                rename(&mut arg.name);
            }
            for (_, local) in func.locals.iter_mut() {
                rename(&mut local.name);
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{AddressSpace, FunctionArgument, GlobalVariable, LocalKind, Scalar};

    #[test]
    fn shadowing_locals_and_parameters_are_renamed() {
        let mut module = Module::default();
        let f32_ty = module.scalar_type(Scalar::F32);
        module
            .global_variables
            .append(GlobalVariable::new("a", AddressSpace::Private, f32_ty));
        let mut f = Function::new("f");
        f.arguments.push(FunctionArgument {
            name: "a".into(),
            ty: f32_ty,
            binding: None,
        });
        f.add_local("f", f32_ty, LocalKind::Let);
        f.add_local("x", f32_ty, LocalKind::Var);
        f.add_local("x", f32_ty, LocalKind::Var);
        let f = module.functions.append(f);
        assert!(Unshadow.should_run(&module, &DataMap::new()));

        let out = Unshadow
            .apply(&module, &DataMap::new(), &mut DataMap::new())
            .unwrap();
        let func = &out.functions[f];
        assert_eq!(func.arguments[0].name, "a_1");
        let locals: Vec<_> = func.locals.iter().map(|(_, l)| l.name.as_str()).collect();
        assert_eq!(locals, ["f_1", "x", "x_1"]);
        assert!(!Unshadow.should_run(&out, &DataMap::new()));
    }
}
