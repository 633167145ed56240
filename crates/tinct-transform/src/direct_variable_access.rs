//! Specializes functions taking pointers into module-scope memory.
//!
//! For each distinct access chain a callee is reached through, a copy of
//! the callee is made in which the pointer parameter is replaced by the
//! dynamic indices of the chain. Roots in the `function` address space are
//! still passed by pointer, as `<param>_root`. Variants are named after the
//! chain: `f_S_X_arr` is `f` specialized for `&S[i].arr`.

use std::collections::HashMap;

use tinct_ir::{
    AddressSpace, Expression, Function, FunctionArgument, GlobalVariable, Handle, LocalKind,
    LocalVariable, Module, ResolveContext, Scalar, ScalarKind, Statement, StorageAccess, Type,
    TypeInner,
};

use crate::util::{flat_map_stmts, save_indices, try_rewrite, with_function};
use crate::{DataMap, Transform, TransformError};

const NAME: &str = "DirectVariableAccess";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct DirectVariableAccessConfig {
    /// Also specialize parameters pointing into `private` variables.
    pub transform_private: bool,
    /// Also specialize parameters pointing into function-scope variables.
    pub transform_function: bool,
}

impl DirectVariableAccessConfig {
    fn transforms(&self, space: AddressSpace) -> bool {
        match space {
            AddressSpace::Storage | AddressSpace::Uniform | AddressSpace::Workgroup => true,
            AddressSpace::Private => self.transform_private,
            AddressSpace::Function => self.transform_function,
            _ => false,
        }
    }

    /// The address space of each parameter this pass replaces.
    fn params(&self, module: &Module, func: &Function) -> Vec<Option<AddressSpace>> {
        func.arguments
            .iter()
            .map(|a| match module.types[a.ty].inner {
                TypeInner::Pointer { space, .. } if self.transforms(space) => Some(space),
                _ => None,
            })
            .collect()
    }

    fn specializes(&self, module: &Module, func: &Function) -> bool {
        !func.is_entry_point() && self.params(module, func).iter().any(Option::is_some)
    }
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
enum Root {
    /// A module-scope variable, reached by name in the variant.
    Global(Handle<GlobalVariable>),
    /// A function-scope variable of this type, passed as `<param>_root`.
    Function(Handle<Type>),
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
enum Step {
    Member(u32),
    Index,
}

#[derive(Clone, Debug, Hash, PartialEq, Eq)]
struct Shape {
    root: Root,
    steps: Vec<Step>,
}

impl Shape {
    fn index_count(&self) -> u32 {
        self.steps.iter().filter(|s| **s == Step::Index).count() as u32
    }
}

/// A pointer argument split into its static shape and the values a call
/// passes for it.
struct Chain {
    shape: Shape,
    root_pointer: Option<Expression>,
    indices: Vec<Expression>,
}

impl Chain {
    fn root(root: Root, root_pointer: Option<Expression>) -> Self {
        Self {
            shape: Shape {
                root,
                steps: Vec::new(),
            },
            root_pointer,
            indices: Vec::new(),
        }
    }
}

type PointerLets = HashMap<Handle<LocalVariable>, Expression>;

fn unresolved(func: &Function) -> TransformError {
    TransformError::user(
        NAME,
        format!(
            "cannot resolve the variable a pointer argument in '{}' refers to",
            func.name
        ),
    )
}

/// Splits the pointer expression `expr` into a root and an access chain.
fn resolve_chain(
    module: &Module,
    func: &Function,
    lets: &PointerLets,
    u32_ty: Handle<Type>,
    expr: &Expression,
) -> Result<Chain, TransformError> {
    let ctx = ResolveContext::new(module, func);
    match *expr {
        Expression::GlobalVariable(g) => Ok(Chain::root(Root::Global(g), None)),
        Expression::LocalVariable(l) => match lets.get(&l) {
            Some(init) => resolve_chain(module, func, lets, u32_ty, init),
            None if func.locals[l].kind == LocalKind::Var => Ok(Chain::root(
                Root::Function(func.locals[l].ty),
                Some(expr.clone()),
            )),
            None => Err(unresolved(func)),
        },
        Expression::FunctionArgument(i) => {
            let arg = func.arguments.get(i as usize).ok_or_else(|| unresolved(func))?;
            match module.types[arg.ty].inner {
                TypeInner::Pointer {
                    base,
                    space: AddressSpace::Function,
                    ..
                } => Ok(Chain::root(Root::Function(base), Some(expr.clone()))),
                _ => Err(unresolved(func)),
            }
        }
        Expression::AccessIndex { ref base, index } => {
            let mut chain = resolve_chain(module, func, lets, u32_ty, base)?;
            if matches!(ctx.resolve_pointee(base)?, TypeInner::Struct { .. }) {
                chain.shape.steps.push(Step::Member(index));
            } else {
                chain.shape.steps.push(Step::Index);
                chain.indices.push(Expression::u32(index));
            }
            Ok(chain)
        }
        Expression::Access {
            ref base,
            ref index,
        } => {
            let mut chain = resolve_chain(module, func, lets, u32_ty, base)?;
            let index = match ctx.resolve_inner(index)?.scalar_kind() {
                Some(ScalarKind::Uint) => (**index).clone(),
                _ => Expression::convert((**index).clone(), u32_ty),
            };
            chain.shape.steps.push(Step::Index);
            chain.indices.push(index);
            Ok(chain)
        }
        _ => Err(unresolved(func)),
    }
}

fn variant_name(module: &Module, callee: &Function, shapes: &[Option<Shape>]) -> String {
    let mut name = callee.name.clone();
    for shape in shapes.iter().flatten() {
        let mut ty = match shape.root {
            Root::Global(g) => {
                let var = &module.global_variables[g];
                name.push('_');
                name.push_str(&var.name);
                var.ty
            }
            Root::Function(ty) => {
                name.push_str("_F");
                ty
            }
        };
        for step in &shape.steps {
            match (*step, &module.types[ty].inner) {
                (Step::Member(m), TypeInner::Struct { members, .. }) => {
                    if let Some(member) = members.get(m as usize) {
                        name.push('_');
                        name.push_str(&member.name);
                        ty = member.ty;
                    }
                }
                (Step::Index, TypeInner::Array { base, .. }) => {
                    name.push_str("_X");
                    ty = *base;
                }
                _ => name.push_str("_X"),
            }
        }
    }
    name
}

struct Specializer {
    cfg: DirectVariableAccessConfig,
    u32_ty: Handle<Type>,
    variants: HashMap<(Handle<Function>, Vec<Option<Shape>>), Handle<Function>>,
    /// Variants whose bodies still need their own calls rewritten.
    pending: Vec<Handle<Function>>,
}

impl Specializer {
    fn variant(
        &mut self,
        module: &mut Module,
        callee: Handle<Function>,
        shapes: Vec<Option<Shape>>,
    ) -> Handle<Function> {
        let key = (callee, shapes);
        if let Some(&h) = self.variants.get(&key) {
            return h;
        }
        let orig = module.functions[callee].clone();
        let shapes = &key.1;
        let mut func = Function::new(module.fresh_name(&variant_name(module, &orig, shapes)));
        func.result = orig.result;
        func.locals = orig.locals;
        func.body = orig.body;

        let mut replacements = Vec::with_capacity(orig.arguments.len());
        for (arg, shape) in orig.arguments.into_iter().zip(shapes) {
            let Some(shape) = shape else {
                replacements.push(Expression::FunctionArgument(func.arguments.len() as u32));
                func.arguments.push(arg);
                continue;
            };
            let mut pointer = match shape.root {
                Root::Global(g) => Expression::GlobalVariable(g),
                Root::Function(ty) => {
                    let ty =
                        module.pointer_type(ty, AddressSpace::Function, StorageAccess::LOAD_STORE);
                    func.arguments.push(FunctionArgument {
                        name: format!("{}_root", arg.name),
                        ty,
                        binding: None,
                    });
                    Expression::FunctionArgument(func.arguments.len() as u32 - 1)
                }
            };
            let count = shape.index_count();
            let indices = if count > 0 {
                let ty = module.array_type(self.u32_ty, count);
                func.arguments.push(FunctionArgument {
                    name: format!("{}_indices", arg.name),
                    ty,
                    binding: None,
                });
                Some(Expression::FunctionArgument(func.arguments.len() as u32 - 1))
            } else {
                None
            };
            let mut k = 0;
            for step in &shape.steps {
                pointer = match (*step, indices.as_ref()) {
                    (Step::Member(m), _) => Expression::access_index(pointer, m),
                    (Step::Index, Some(indices)) => {
                        k += 1;
                        Expression::access(pointer, Expression::access_index(indices.clone(), k - 1))
                    }
                    (Step::Index, None) => pointer,
                };
            }
            replacements.push(pointer);
        }
        tinct_ir::rewrite_all_exprs(&mut func.body, &mut |e| {
            if let Expression::FunctionArgument(i) = *e {
                if let Some(r) = replacements.get(i as usize) {
                    *e = r.clone();
                }
            }
        });

        log::debug!("{NAME}: specialized '{}' as '{}'", module.functions[callee].name, func.name);
        let h = module.functions.append(func);
        self.variants.insert(key, h);
        self.pending.push(h);
        h
    }

    fn rewrite_call(
        &mut self,
        module: &mut Module,
        func: &Function,
        lets: &PointerLets,
        expr: &mut Expression,
    ) -> Result<(), TransformError> {
        let Expression::Call {
            function,
            arguments,
        } = expr
        else {
            return Ok(());
        };
        let callee = *function;
        if !self.cfg.specializes(module, &module.functions[callee]) {
            return Ok(());
        }
        let params = self.cfg.params(module, &module.functions[callee]);
        let mut shapes = Vec::with_capacity(params.len());
        let mut new_args = Vec::with_capacity(arguments.len());
        for (arg, param) in std::mem::take(arguments).into_iter().zip(params) {
            if param.is_none() {
                shapes.push(None);
                new_args.push(arg);
                continue;
            }
            let chain = resolve_chain(module, func, lets, self.u32_ty, &arg)?;
            new_args.extend(chain.root_pointer);
            if !chain.indices.is_empty() {
                let ty = module.array_type(self.u32_ty, chain.indices.len() as u32);
                new_args.push(Expression::Compose {
                    ty,
                    components: chain.indices,
                });
            }
            shapes.push(Some(chain.shape));
        }
        let variant = self.variant(module, callee, shapes);
        *expr = Expression::call(variant, new_args);
        Ok(())
    }

    fn run_function(&mut self, module: &mut Module, func: &mut Function) -> Result<(), TransformError> {
        let mut lets = PointerLets::new();
        let mut body = std::mem::take(&mut func.body);
        flat_map_stmts(&mut body, &mut |stmt, out| {
            match stmt {
                Statement::Declare {
                    local,
                    init: Some(mut init),
                } if func.locals[local].kind == LocalKind::Let
                    && matches!(
                        module.types[func.locals[local].ty].inner,
                        TypeInner::Pointer { space, .. } if self.cfg.transforms(space)
                    ) =>
                {
                    let name = func.locals[local].name.clone();
                    save_indices(module, func, &mut init, &name, out)?;
                    lets.insert(local, init.clone());
                    out.push(Statement::Declare {
                        local,
                        init: Some(init),
                    });
                }
                other => out.push(other),
            }
            Ok::<(), TransformError>(())
        })?;

        let mut result = Ok(());
        tinct_ir::walk_exprs_mut(&mut body, &mut |root| {
            if result.is_err() {
                return;
            }
            result = try_rewrite(root, &mut |e| self.rewrite_call(module, func, &lets, e));
        });
        func.body = body;
        result
    }
}

/// Whether some call passes a pointer this pass would replace. Whole
/// function-scope variables passed to their root parameter are already
/// direct.
fn has_indirect_calls(module: &Module, cfg: &DirectVariableAccessConfig) -> bool {
    module.functions.iter().any(|(_, caller)| {
        let mut found = false;
        tinct_ir::walk_all_exprs(&caller.body, &mut |e| {
            let Expression::Call {
                function,
                ref arguments,
            } = *e
            else {
                return;
            };
            let Some(callee) = module.functions.try_get(function) else {
                return;
            };
            for (arg, space) in arguments.iter().zip(cfg.params(module, callee)) {
                let direct = match (space, arg) {
                    (None, _) => true,
                    (Some(AddressSpace::Function), Expression::FunctionArgument(_)) => true,
                    (Some(AddressSpace::Function), Expression::LocalVariable(l)) => caller
                        .locals
                        .try_get(*l)
                        .is_some_and(|l| l.kind == LocalKind::Var),
                    _ => false,
                };
                found |= !direct;
            }
        });
        found
    })
}

#[derive(Debug)]
pub struct DirectVariableAccess;

impl Transform for DirectVariableAccess {
    fn name(&self) -> &'static str {
        NAME
    }

    fn requires(&self) -> &'static [&'static str] {
        &["PreservePadding", "Unshadow"]
    }

    fn should_run(&self, module: &Module, inputs: &DataMap) -> bool {
        let cfg = inputs
            .get::<DirectVariableAccessConfig>()
            .copied()
            .unwrap_or_default();
        let uncalled = module.functions.iter().any(|(_, f)| {
            cfg.specializes(module, f)
                && cfg
                    .params(module, f)
                    .iter()
                    .any(|s| s.is_some_and(|s| s != AddressSpace::Function))
        });
        uncalled || has_indirect_calls(module, &cfg)
    }

    fn apply(
        &self,
        module: &Module,
        inputs: &DataMap,
        _outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let cfg = inputs
            .get::<DirectVariableAccessConfig>()
            .copied()
            .unwrap_or_default();
        let mut out = module.clone();
        let originals: Vec<Handle<Function>> = out
            .functions
            .iter()
            .filter(|(_, f)| cfg.specializes(&out, f))
            .map(|(h, _)| h)
            .collect();
        let mut spec = Specializer {
            cfg,
            u32_ty: out.scalar_type(Scalar::U32),
            variants: HashMap::new(),
            pending: Vec::new(),
        };
        let mut worklist: Vec<Handle<Function>> = out
            .functions
            .handles()
            .filter(|h| !originals.contains(h))
            .collect();
        while let Some(h) = worklist.pop() {
            with_function(&mut out, h, |module, func| spec.run_function(module, func))?;
            worklist.append(&mut spec.pending);
        }
        out.retain_functions(|h, _| !originals.contains(&h));
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{BuiltinFn, EntryPoint, FunctionResult};

    /// `struct Str { a: i32, arr: array<i32, 4> }`
    /// `var<storage, read_write> S: array<Str, 4>;`
    /// `fn f(p: ptr<storage, i32, read_write>) -> i32 { return *p; }`
    fn storage_module() -> (Module, Handle<Function>, Handle<GlobalVariable>) {
        let mut module = Module::default();
        let i32_ty = module.scalar_type(Scalar::I32);
        let arr = module.array_type(i32_ty, 4);
        let str_ty = module.struct_type("Str", &[("a", i32_ty), ("arr", arr)]);
        let s_arr = module.array_type(str_ty, 4);
        let s = module.global_variables.append(
            GlobalVariable::new("S", AddressSpace::Storage, s_arr)
                .with_binding(0, 0)
                .with_access(StorageAccess::LOAD_STORE),
        );
        let ptr = module.pointer_type(i32_ty, AddressSpace::Storage, StorageAccess::LOAD_STORE);
        let mut f = Function::new("f");
        f.arguments.push(FunctionArgument {
            name: "p".into(),
            ty: ptr,
            binding: None,
        });
        f.result = Some(FunctionResult {
            ty: i32_ty,
            binding: None,
        });
        f.body = vec![Statement::Return {
            value: Some(Expression::load(Expression::FunctionArgument(0))),
        }];
        let f = module.functions.append(f);
        (module, f, s)
    }

    fn run(module: &Module, cfg: DirectVariableAccessConfig) -> Module {
        let mut inputs = DataMap::new();
        inputs.insert(cfg);
        assert!(DirectVariableAccess.should_run(module, &inputs));
        let out = DirectVariableAccess
            .apply(module, &inputs, &mut DataMap::new())
            .unwrap();
        tinct_ir::validate(&out).unwrap();
        assert!(!DirectVariableAccess.should_run(&out, &inputs));
        out
    }

    #[test]
    fn storage_pointers_become_index_arrays() {
        let (mut module, f, s) = storage_module();
        let i32_ty = module.scalar_type(Scalar::I32);
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::compute(1, 1, 1));
        let i = main.add_local("i", i32_ty, LocalKind::Let);
        let r0 = main.add_local("r0", i32_ty, LocalKind::Let);
        let r1 = main.add_local("r1", i32_ty, LocalKind::Let);
        let element = Expression::access(
            Expression::GlobalVariable(s),
            Expression::LocalVariable(i),
        );
        main.body = vec![
            Statement::Declare {
                local: i,
                init: Some(Expression::i32(1)),
            },
            Statement::Declare {
                local: r0,
                init: Some(Expression::call(
                    f,
                    vec![Expression::access_index(
                        Expression::access_index(element, 1),
                        2,
                    )],
                )),
            },
            Statement::Declare {
                local: r1,
                init: Some(Expression::call(
                    f,
                    vec![Expression::access_index(
                        Expression::access_index(Expression::GlobalVariable(s), 0),
                        0,
                    )],
                )),
            },
        ];
        module.functions.append(main);

        let out = run(&module, DirectVariableAccessConfig::default());
        assert!(out.function_by_name("f").is_none());
        let text = tinct_ir::dump_module(&out);
        assert!(
            text.contains("fn f_S_X_arr_X(p_indices: array<u32, 2>) -> i32 {"),
            "{text}"
        );
        assert!(
            text.contains("return S[p_indices[0]].arr[p_indices[1]];"),
            "{text}"
        );
        assert!(text.contains("fn f_S_X_a(p_indices: array<u32, 1>) -> i32 {"), "{text}");
        assert!(
            text.contains("let r0: i32 = f_S_X_arr_X(array<u32, 2>(u32(i), 2u));"),
            "{text}"
        );
        assert!(
            text.contains("let r1: i32 = f_S_X_a(array<u32, 1>(0u));"),
            "{text}"
        );
    }

    #[test]
    fn pointer_lets_keep_the_index_they_were_made_with() {
        let (mut module, f, s) = storage_module();
        let i32_ty = module.scalar_type(Scalar::I32);
        let ptr = module.pointer_type(i32_ty, AddressSpace::Storage, StorageAccess::LOAD_STORE);
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::compute(1, 1, 1));
        let i = main.add_local("i", i32_ty, LocalKind::Var);
        let p = main.add_local("p", ptr, LocalKind::Let);
        let r = main.add_local("r", i32_ty, LocalKind::Let);
        main.body = vec![
            Statement::Declare {
                local: i,
                init: Some(Expression::i32(1)),
            },
            Statement::Declare {
                local: p,
                init: Some(Expression::access_index(
                    Expression::access(
                        Expression::GlobalVariable(s),
                        Expression::load(Expression::LocalVariable(i)),
                    ),
                    0,
                )),
            },
            Statement::store(Expression::LocalVariable(i), Expression::i32(2)),
            Statement::Declare {
                local: r,
                init: Some(Expression::call(f, vec![Expression::LocalVariable(p)])),
            },
        ];
        module.functions.append(main);

        let out = run(&module, DirectVariableAccessConfig::default());
        let text = tinct_ir::dump_module(&out);
        assert!(text.contains("let p_save: i32 = i;"), "{text}");
        assert!(
            text.contains("let r: i32 = f_S_X_a(array<u32, 1>(u32(p_save)));"),
            "{text}"
        );
    }

    #[test]
    fn function_roots_are_passed_by_pointer() {
        let mut module = Module::default();
        let f32_ty = module.scalar_type(Scalar::F32);
        let arr = module.array_type(f32_ty, 4);
        let ptr = module.pointer_type(f32_ty, AddressSpace::Function, StorageAccess::LOAD_STORE);
        let mut g = Function::new("g");
        g.arguments.push(FunctionArgument {
            name: "p".into(),
            ty: ptr,
            binding: None,
        });
        g.body = vec![Statement::store(
            Expression::FunctionArgument(0),
            Expression::f32(1.0),
        )];
        let g = module.functions.append(g);
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::compute(1, 1, 1));
        let v = main.add_local("v", arr, LocalKind::Var);
        main.body = vec![
            Statement::Declare {
                local: v,
                init: None,
            },
            Statement::Call(Expression::call(
                g,
                vec![Expression::access_index(Expression::LocalVariable(v), 1)],
            )),
        ];
        module.functions.append(main);

        let untouched = DataMap::new();
        assert!(!DirectVariableAccess.should_run(&module, &untouched));

        let out = run(
            &module,
            DirectVariableAccessConfig {
                transform_private: false,
                transform_function: true,
            },
        );
        let text = tinct_ir::dump_module(&out);
        assert!(
            text.contains("fn g_F_X(p_root: ptr<function, array<f32, 4>"),
            "{text}"
        );
        assert!(text.contains("p_indices: array<u32, 1>)"), "{text}");
        assert!(text.contains("g_F_X(&v, array<u32, 1>(1u));"), "{text}");
    }

    #[test]
    fn variants_are_shared_between_identical_chains() {
        let (mut module, f, s) = storage_module();
        let i32_ty = module.scalar_type(Scalar::I32);
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::compute(1, 1, 1));
        let a = main.add_local("a", i32_ty, LocalKind::Let);
        let b = main.add_local("b", i32_ty, LocalKind::Let);
        let call = |index: u32| {
            Expression::call(
                f,
                vec![Expression::access_index(
                    Expression::access_index(Expression::GlobalVariable(s), index),
                    0,
                )],
            )
        };
        main.body = vec![
            Statement::Declare {
                local: a,
                init: Some(call(0)),
            },
            Statement::Declare {
                local: b,
                init: Some(Expression::builtin(BuiltinFn::Abs, vec![call(3)])),
            },
        ];
        module.functions.append(main);

        let out = run(&module, DirectVariableAccessConfig::default());
        assert_eq!(out.functions.len(), 2);
        let text = tinct_ir::dump_module(&out);
        assert!(text.contains("abs(f_S_X_a(array<u32, 1>(3u)))"), "{text}");
    }
}
