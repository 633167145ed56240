//! Tinct intermediate representation.
//!
//! Module-level declarations (types, globals, overrides, functions) live in
//! arenas and are referenced by handle. Function bodies are owned trees of
//! statements and expressions, so passes can rewrite them in place without
//! keeping a side table of expression handles in sync.

pub mod arena;
mod builder;
mod display;
mod error;
mod expr;
mod func;
mod global;
pub mod layout;
pub mod predeclared;
mod stmt;
mod typifier;
mod types;
mod valid;

use std::collections::{BTreeSet, HashSet};

pub use arena::{Arena, Handle, HandleMap, UniqueArena};
pub use display::{dump_function, dump_module, format_type, format_type_inner};
pub use error::IrError;
pub use expr::{
    BinaryOp, BuiltinFn, Expression, Literal, SwizzleComponent, TextureCall, TextureFn, UnaryOp,
};
pub use func::{
    EntryPoint, Function, FunctionArgument, FunctionResult, LocalKind, LocalVariable, ShaderStage,
    WorkgroupDim,
};
pub use global::{
    AddressSpace, Binding, BindingPoint, BuiltIn, GlobalVariable, Interpolation, Override,
    Sampling, StorageAccess,
};
pub use stmt::{
    Barrier, Block, CaseSelector, Statement, SwitchCase, is_terminated, rewrite_all_exprs,
    rewrite_blocks, walk_all_exprs, walk_exprs, walk_exprs_mut, walk_stmts,
};
pub use typifier::{ResolveContext, TypeResolution};
pub use types::{
    ArraySize, Bytes, SampledKind, Scalar, ScalarKind, StructMember, TexelFormat, TextureClass,
    TextureDimension, Type, TypeInner, VectorSize,
};
pub use valid::validate;

/// A shader module in tinct IR.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct Module {
    /// Deduplicated type arena.
    pub types: UniqueArena<Type>,
    /// Module-scope variables.
    pub global_variables: Arena<GlobalVariable>,
    /// Pipeline-overridable constants.
    pub overrides: Arena<Override>,
    /// All functions, entry points included.
    pub functions: Arena<Function>,
}

impl Module {
    /// Iterates over the entry-point functions.
    pub fn entry_points(&self) -> impl Iterator<Item = (Handle<Function>, &Function)> {
        self.functions.iter().filter(|(_, f)| f.is_entry_point())
    }

    /// Looks up a function by name.
    pub fn function_by_name(&self, name: &str) -> Option<Handle<Function>> {
        self.functions
            .iter()
            .find(|(_, f)| f.name == name)
            .map(|(h, _)| h)
    }

    /// Looks up a module-scope variable by name.
    pub fn global_by_name(&self, name: &str) -> Option<Handle<GlobalVariable>> {
        self.global_variables
            .iter()
            .find(|(_, g)| g.name == name)
            .map(|(h, _)| h)
    }

    /// The functions called directly by `function`, in first-call order.
    pub fn callees(function: &Function) -> Vec<Handle<Function>> {
        let mut out = Vec::new();
        walk_all_exprs(&function.body, &mut |e| {
            if let Expression::Call { function, .. } = *e {
                if !out.contains(&function) {
                    out.push(function);
                }
            }
        });
        out
    }

    /// All functions in callee-first order: every function appears after
    /// the functions it calls.
    pub fn function_order(&self) -> Vec<Handle<Function>> {
        fn visit(
            module: &Module,
            h: Handle<Function>,
            seen: &mut HashSet<Handle<Function>>,
            out: &mut Vec<Handle<Function>>,
        ) {
            if !seen.insert(h) {
                return;
            }
            if let Some(f) = module.functions.try_get(h) {
                for callee in Module::callees(f) {
                    visit(module, callee, seen, out);
                }
                out.push(h);
            }
        }
        let mut seen = HashSet::new();
        let mut out = Vec::with_capacity(self.functions.len());
        for h in self.functions.handles() {
            visit(self, h, &mut seen, &mut out);
        }
        out
    }

    /// The functions reachable from `root` through calls, `root` included.
    pub fn reachable_functions(&self, root: Handle<Function>) -> BTreeSet<Handle<Function>> {
        let mut out = BTreeSet::new();
        let mut stack = vec![root];
        while let Some(h) = stack.pop() {
            if !out.insert(h) {
                continue;
            }
            if let Some(f) = self.functions.try_get(h) {
                stack.extend(Self::callees(f));
            }
        }
        out
    }

    /// Module-scope variables referenced by `function` directly.
    pub fn globals_referenced(function: &Function) -> BTreeSet<Handle<GlobalVariable>> {
        let mut out = BTreeSet::new();
        walk_all_exprs(&function.body, &mut |e| {
            if let Expression::GlobalVariable(g) = *e {
                out.insert(g);
            }
        });
        out
    }

    /// Module-scope variables referenced by `root` or anything it calls.
    pub fn globals_used_by(&self, root: Handle<Function>) -> BTreeSet<Handle<GlobalVariable>> {
        self.reachable_functions(root)
            .into_iter()
            .filter_map(|h| self.functions.try_get(h))
            .flat_map(Self::globals_referenced)
            .collect()
    }

    /// Overrides referenced by `root`, anything it calls, or its workgroup
    /// size.
    pub fn overrides_used_by(&self, root: Handle<Function>) -> BTreeSet<Handle<Override>> {
        let mut out = BTreeSet::new();
        for h in self.reachable_functions(root) {
            let Some(f) = self.functions.try_get(h) else {
                continue;
            };
            walk_all_exprs(&f.body, &mut |e| {
                if let Expression::Override(o) = *e {
                    out.insert(o);
                }
            });
            if let Some(ep) = f.entry_point.as_ref() {
                for dim in ep.workgroup_size {
                    if let WorkgroupDim::Override(o) = dim {
                        out.insert(o);
                    }
                }
            }
        }
        for g in self.globals_used_by(root) {
            if let Some(init) = self.global_variables.try_get(g).and_then(|v| v.init.as_ref()) {
                init.visit(&mut |e| {
                    if let Expression::Override(o) = *e {
                        out.insert(o);
                    }
                });
            }
        }
        out
    }

    /// Rewrites every expression node in the module bottom-up: function
    /// bodies, global initializers and override initializers.
    pub fn rewrite_exprs(&mut self, f: &mut dyn FnMut(&mut Expression)) {
        for (_, func) in self.functions.iter_mut() {
            rewrite_all_exprs(&mut func.body, f);
        }
        for (_, var) in self.global_variables.iter_mut() {
            if let Some(init) = var.init.as_mut() {
                init.visit_mut_post(f);
            }
        }
        for (_, o) in self.overrides.iter_mut() {
            if let Some(init) = o.init.as_mut() {
                init.visit_mut_post(f);
            }
        }
    }

    /// Removes functions for which `keep` returns `false` and remaps calls
    /// in the survivors.
    pub fn retain_functions(&mut self, keep: impl FnMut(Handle<Function>, &Function) -> bool) {
        let map = self.functions.retain_mapped(keep);
        if map.is_identity() {
            return;
        }
        self.rewrite_exprs(&mut |e| {
            if let Expression::Call { function, .. } = e {
                if let Some(new) = map.get(*function) {
                    *function = new;
                }
            }
        });
    }

    /// Removes module-scope variables for which `keep` returns `false` and
    /// remaps references to the survivors.
    pub fn retain_globals(
        &mut self,
        keep: impl FnMut(Handle<GlobalVariable>, &GlobalVariable) -> bool,
    ) {
        let map = self.global_variables.retain_mapped(keep);
        if map.is_identity() {
            return;
        }
        self.rewrite_exprs(&mut |e| {
            if let Expression::GlobalVariable(g) = e {
                if let Some(new) = map.get(*g) {
                    *g = new;
                }
            }
        });
    }

    /// Removes overrides for which `keep` returns `false` and remaps
    /// references to the survivors, workgroup sizes included.
    pub fn retain_overrides(&mut self, keep: impl FnMut(Handle<Override>, &Override) -> bool) {
        let map = self.overrides.retain_mapped(keep);
        if map.is_identity() {
            return;
        }
        self.rewrite_exprs(&mut |e| {
            if let Expression::Override(o) = e {
                if let Some(new) = map.get(*o) {
                    *o = new;
                }
            }
        });
        for (_, f) in self.functions.iter_mut() {
            if let Some(ep) = f.entry_point.as_mut() {
                for dim in ep.workgroup_size.iter_mut() {
                    if let WorkgroupDim::Override(o) = dim {
                        if let Some(new) = map.get(*o) {
                            *o = new;
                        }
                    }
                }
            }
        }
    }

    /// Returns `true` if `name` is taken by a module-scope declaration.
    pub fn is_name_taken(&self, name: &str) -> bool {
        self.functions.iter().any(|(_, f)| f.name == name)
            || self.global_variables.iter().any(|(_, g)| g.name == name)
            || self.overrides.iter().any(|(_, o)| o.name == name)
            || self
                .types
                .iter()
                .any(|(_, t)| t.name.as_deref() == Some(name))
    }

    /// A module-scope name derived from `base` that no declaration uses.
    pub fn fresh_name(&self, base: &str) -> String {
        if !self.is_name_taken(base) {
            return base.to_string();
        }
        (1..)
            .map(|i| format!("{base}_{i}"))
            .find(|candidate| !self.is_name_taken(candidate))
            .unwrap_or_else(|| base.to_string())
    }
}

/// A function-scope name derived from `base` that no argument or local of
/// `function` uses.
pub fn fresh_local_name(function: &Function, base: &str) -> String {
    let taken = |name: &str| {
        function.arguments.iter().any(|a| a.name == name)
            || function.locals.iter().any(|(_, l)| l.name == name)
    };
    if !taken(base) {
        return base.to_string();
    }
    (1..)
        .map(|i| format!("{base}_{i}"))
        .find(|candidate| !taken(candidate))
        .unwrap_or_else(|| base.to_string())
}
