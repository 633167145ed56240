//! Zero-initializes workgroup memory at the start of compute entry points.
//!
//! Scalars and structs are written by invocation 0. Arrays are split
//! across the workgroup, each invocation clearing every `W`th element
//! where `W` is the workgroup size. A `workgroupBarrier()` then makes the
//! zeroed memory visible before the original body runs.

use std::collections::{BTreeMap, BTreeSet};

use tinct_ir::{
    AddressSpace, ArraySize, Barrier, BinaryOp, Binding, BuiltIn, BuiltinFn, Expression, Function,
    FunctionArgument, GlobalVariable, Handle, Literal, Module, Scalar, ShaderStage, Statement,
    Type, TypeInner, fresh_local_name,
};

use crate::util::while_loop;
use crate::{DataMap, Transform, TransformError};

const NAME: &str = "ZeroInitWorkgroupMemory";

#[derive(Debug)]
pub struct ZeroInitWorkgroupMemory;

#[derive(Clone, Copy)]
enum Step {
    Member(u32),
    /// Index into the array at this position of the dimension list.
    Element(usize),
}

/// One scalar-or-struct-free leaf of a workgroup variable, reached through
/// `steps` from the variable.
struct Leaf {
    var: Handle<GlobalVariable>,
    steps: Vec<Step>,
    /// Array counts along `steps`, outermost first.
    dims: Vec<u32>,
    ty: Handle<Type>,
}

fn collect_leaves(
    module: &Module,
    var: Handle<GlobalVariable>,
    ty: Handle<Type>,
    steps: &mut Vec<Step>,
    dims: &mut Vec<u32>,
    out: &mut Vec<Leaf>,
) -> Result<(), TransformError> {
    match module.types[ty].inner {
        TypeInner::Array { base, size, .. } => {
            let ArraySize::Constant(n) = size else {
                return Err(TransformError::user(
                    NAME,
                    "workgroup variables cannot hold runtime-sized arrays",
                ));
            };
            steps.push(Step::Element(dims.len()));
            dims.push(n);
            collect_leaves(module, var, base, steps, dims, out)?;
            dims.pop();
            steps.pop();
        }
        TypeInner::Struct { ref members, .. } => {
            for (i, m) in members.iter().enumerate() {
                steps.push(Step::Member(i as u32));
                collect_leaves(module, var, m.ty, steps, dims, out)?;
                steps.pop();
            }
        }
        _ => out.push(Leaf {
            var,
            steps: steps.clone(),
            dims: dims.clone(),
            ty,
        }),
    }
    Ok(())
}

/// Workgroup variables `ep` uses that are not yet cleared before its first
/// top-level barrier.
fn uninitialized_vars(module: &Module, ep: Handle<Function>) -> BTreeSet<Handle<GlobalVariable>> {
    let mut vars: BTreeSet<_> = module
        .globals_used_by(ep)
        .into_iter()
        .filter(|&g| module.global_variables[g].space == AddressSpace::Workgroup)
        .collect();
    let body = &module.functions[ep].body;
    let Some(barrier) = body
        .iter()
        .position(|s| matches!(s, Statement::Barrier(b) if b.contains(Barrier::WORKGROUP)))
    else {
        return vars;
    };
    let mut cleared = |s: &Statement| {
        let target = match s {
            Statement::Store { pointer, .. } => Some(pointer.root()),
            Statement::Call(Expression::Builtin {
                fun: BuiltinFn::AtomicStore,
                arguments,
            }) => arguments.first().map(Expression::root),
            _ => None,
        };
        if let Some(Expression::GlobalVariable(g)) = target {
            vars.remove(g);
        }
    };
    for stmt in &body[..barrier] {
        cleared(stmt);
        stmt.for_each_block(|b| tinct_ir::walk_stmts(b, &mut cleared));
    }
    vars
}

/// The `local_invocation_index` of `func`, adding an argument if needed.
fn local_index(module: &mut Module, func: &mut Function) -> Expression {
    let wanted = Binding::BuiltIn(BuiltIn::LocalInvocationIndex);
    for (i, arg) in func.arguments.iter().enumerate() {
        if arg.binding == Some(wanted) {
            return Expression::FunctionArgument(i as u32);
        }
        if let TypeInner::Struct { ref members, .. } = module.types[arg.ty].inner {
            if let Some(m) = members.iter().position(|m| m.binding == Some(wanted)) {
                return Expression::access_index(Expression::FunctionArgument(i as u32), m as u32);
            }
        }
    }
    let u32_ty = module.scalar_type(Scalar::U32);
    let name = fresh_local_name(func, "tint_local_index");
    func.arguments.push(FunctionArgument {
        name,
        ty: u32_ty,
        binding: Some(wanted),
    });
    Expression::FunctionArgument(func.arguments.len() as u32 - 1)
}

fn leaf_store(module: &Module, leaf: &Leaf, indices: &[Expression]) -> Statement {
    let mut pointer = Expression::GlobalVariable(leaf.var);
    for step in &leaf.steps {
        pointer = match *step {
            Step::Member(i) => Expression::access_index(pointer, i),
            Step::Element(d) => Expression::access(pointer, indices[d].clone()),
        };
    }
    match module.types[leaf.ty].inner {
        TypeInner::Atomic(scalar) => Statement::Call(Expression::builtin(
            BuiltinFn::AtomicStore,
            vec![pointer, Expression::Literal(Literal::zero(scalar))],
        )),
        _ => Statement::store(pointer, Expression::ZeroValue(leaf.ty)),
    }
}

/// Splits a flat element index into one index per array dimension.
fn decompose(idx: &Expression, dims: &[u32]) -> Vec<Expression> {
    let mut out = Vec::with_capacity(dims.len());
    let mut inner = 1u32;
    for (d, &n) in dims.iter().enumerate().rev() {
        let mut e = idx.clone();
        if inner > 1 {
            e = Expression::binary(BinaryOp::Divide, e, Expression::u32(inner));
        }
        if d > 0 {
            e = Expression::binary(BinaryOp::Modulo, e, Expression::u32(n));
        }
        out.push(e);
        inner *= n;
    }
    out.reverse();
    out
}

fn init_block(
    module: &mut Module,
    func: &mut Function,
    vars: &BTreeSet<Handle<GlobalVariable>>,
) -> Result<Vec<Statement>, TransformError> {
    let size = func
        .entry_point
        .as_ref()
        .and_then(|ep| ep.literal_workgroup_size())
        .ok_or_else(|| {
            TransformError::user(NAME, "workgroup size must be a constant to zero-initialize memory")
        })?;
    let invocations: u32 = size.iter().product();

    let mut leaves = Vec::new();
    for &var in vars {
        let ty = module.global_variables[var].ty;
        collect_leaves(module, var, ty, &mut Vec::new(), &mut Vec::new(), &mut leaves)?;
    }
    // Leaves grouped by element count share one loop.
    let mut by_count: BTreeMap<u32, Vec<Leaf>> = BTreeMap::new();
    for leaf in leaves {
        by_count.entry(leaf.dims.iter().product()).or_default().push(leaf);
    }

    let index = local_index(module, func);
    let u32_ty = module.scalar_type(Scalar::U32);
    let mut out = Vec::new();
    for (count, leaves) in by_count {
        if count == 1 {
            let stores = leaves.iter().map(|l| leaf_store(module, l, &[])).collect();
            out.push(Statement::If {
                condition: Expression::binary(BinaryOp::Equal, index.clone(), Expression::u32(0)),
                accept: stores,
                reject: Vec::new(),
            });
            continue;
        }
        let name = fresh_local_name(func, "idx");
        let idx_var = func.add_local(name, u32_ty, tinct_ir::LocalKind::Var);
        let idx = Expression::load(Expression::LocalVariable(idx_var));
        out.push(Statement::Declare {
            local: idx_var,
            init: Some(index.clone()),
        });
        let body = leaves
            .iter()
            .map(|l| leaf_store(module, l, &decompose(&idx, &l.dims)))
            .collect();
        out.push(while_loop(
            Expression::binary(BinaryOp::Less, idx.clone(), Expression::u32(count)),
            body,
            vec![Statement::store(
                Expression::LocalVariable(idx_var),
                Expression::binary(BinaryOp::Add, idx, Expression::u32(invocations)),
            )],
        ));
    }
    out.push(Statement::Barrier(Barrier::WORKGROUP));
    Ok(out)
}

impl Transform for ZeroInitWorkgroupMemory {
    fn name(&self) -> &'static str {
        NAME
    }

    fn should_run(&self, module: &Module, _inputs: &DataMap) -> bool {
        module.entry_points().any(|(h, f)| {
            f.stage() == Some(ShaderStage::Compute) && !uninitialized_vars(module, h).is_empty()
        })
    }

    fn apply(
        &self,
        module: &Module,
        _inputs: &DataMap,
        _outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let mut out = module.clone();
        let entry_points: Vec<_> = out
            .entry_points()
            .filter(|(_, f)| f.stage() == Some(ShaderStage::Compute))
            .map(|(h, _)| h)
            .collect();
        for ep in entry_points {
            let vars = uninitialized_vars(&out, ep);
            if vars.is_empty() {
                continue;
            }
            crate::util::with_function(&mut out, ep, |module, func| {
                let mut body = init_block(module, func, &vars)?;
                body.append(&mut func.body);
                func.body = body;
                Ok::<(), TransformError>(())
            })?;
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::EntryPoint;

    fn workgroup(module: &mut Module, name: &str, ty: Handle<Type>) -> Handle<GlobalVariable> {
        module
            .global_variables
            .append(GlobalVariable::new(name, AddressSpace::Workgroup, ty))
    }

    fn compute_main(module: &mut Module, size: [u32; 3]) -> Handle<Function> {
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::compute(size[0], size[1], size[2]));
        module.functions.append(main)
    }

    fn run(module: &Module) -> Module {
        let out = ZeroInitWorkgroupMemory
            .apply(module, &DataMap::new(), &mut DataMap::new())
            .unwrap();
        assert!(!ZeroInitWorkgroupMemory.should_run(&out, &DataMap::new()));
        out
    }

    #[test]
    fn scalars_are_cleared_by_the_first_invocation() {
        let mut module = Module::default();
        let i32_ty = module.scalar_type(Scalar::I32);
        let atomic = module.insert_type(TypeInner::Atomic(Scalar::U32));
        let v = workgroup(&mut module, "v", i32_ty);
        let a = workgroup(&mut module, "a", atomic);
        let main = compute_main(&mut module, [1, 1, 1]);
        module.functions[main].body = vec![
            Statement::store(Expression::GlobalVariable(v), Expression::i32(1)),
            Statement::Call(Expression::builtin(
                BuiltinFn::AtomicAdd,
                vec![Expression::GlobalVariable(a), Expression::u32(1)],
            )),
        ];
        assert!(ZeroInitWorkgroupMemory.should_run(&module, &DataMap::new()));
        let out = run(&module);
        tinct_ir::validate(&out).unwrap();
        let text = tinct_ir::dump_function(&out, &out.functions[main]);
        let expected = "\
fn main(@builtin(local_invocation_index) tint_local_index: u32) {
    if (tint_local_index == 0u) {
        v = i32();
        atomicStore(&a, 0u);
    }
    workgroupBarrier();
    v = 1i;
";
        assert!(text.contains(expected), "{text}");
    }

    #[test]
    fn arrays_are_cleared_with_a_strided_loop() {
        let mut module = Module::default();
        let u32_ty = module.scalar_type(Scalar::U32);
        let row = module.array_type(u32_ty, 3);
        let grid = module.array_type(row, 2);
        let g = workgroup(&mut module, "grid", grid);
        let main = compute_main(&mut module, [4, 1, 1]);
        module.functions[main].body = vec![Statement::store(
            Expression::access_index(Expression::access_index(Expression::GlobalVariable(g), 1), 2),
            Expression::u32(9),
        )];
        let out = run(&module);
        tinct_ir::validate(&out).unwrap();
        let text = tinct_ir::dump_function(&out, &out.functions[main]);
        assert!(text.contains("var idx: u32 = tint_local_index;"), "{text}");
        assert!(text.contains("if (!(idx < 6u)) {"), "{text}");
        assert!(text.contains("grid[(idx / 3u)][(idx % 3u)] = u32();"), "{text}");
        assert!(text.contains("idx = (idx + 4u);"), "{text}");
    }

    #[test]
    fn existing_local_index_is_reused() {
        let mut module = Module::default();
        let i32_ty = module.scalar_type(Scalar::I32);
        let u32_ty = module.scalar_type(Scalar::U32);
        let v = workgroup(&mut module, "v", i32_ty);
        let main = compute_main(&mut module, [1, 1, 1]);
        let f = &mut module.functions[main];
        f.arguments.push(FunctionArgument {
            name: "lid".into(),
            ty: u32_ty,
            binding: Some(Binding::BuiltIn(BuiltIn::LocalInvocationIndex)),
        });
        f.body = vec![Statement::store(Expression::GlobalVariable(v), Expression::i32(1))];
        let out = run(&module);
        let f = &out.functions[main];
        assert_eq!(f.arguments.len(), 1);
        let text = tinct_ir::dump_function(&out, f);
        assert!(text.contains("if (lid == 0u) {"), "{text}");
    }

    #[test]
    fn entry_points_without_workgroup_memory_are_skipped() {
        let mut module = Module::default();
        compute_main(&mut module, [8, 1, 1]);
        assert!(!ZeroInitWorkgroupMemory.should_run(&module, &DataMap::new()));
    }
}
