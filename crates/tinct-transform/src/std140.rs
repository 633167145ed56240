//! Decomposes uniform-buffer matrices whose columns are not 16-byte
//! aligned.
//!
//! std140 rounds the column stride of every matrix up to 16 bytes, which
//! disagrees with WGSL for `matCx2<f32>` and every `f16` matrix. Such
//! matrices are split into one vector member per column: a member `m`
//! becomes `m_0`, `m_1`, … of a `<S>_std140` copy of its struct, and a
//! matrix outside a struct becomes a `mat<C>x<R>_<T>_std140` struct of
//! `col<i>` members. Loads rebuild the authored type, through `conv_*`
//! helpers for whole structs and arrays.

use std::collections::HashMap;

use tinct_ir::{
    AddressSpace, BinaryOp, Expression, Function, FunctionArgument, FunctionResult, GlobalVariable,
    Handle, LocalKind, LocalVariable, Module, Scalar, Statement, StructMember, Type, TypeInner,
    VectorSize,
};

use crate::util::{flat_map_stmts, save_indices, while_loop, with_function};
use crate::{DataMap, Transform, TransformError};

const NAME: &str = "Std140";

#[derive(Debug)]
pub struct Std140;

/// The columns of a matrix that std140 lays out differently, if it does.
fn split_columns(inner: &TypeInner) -> Option<(VectorSize, VectorSize, Scalar)> {
    let TypeInner::Matrix {
        columns,
        rows,
        scalar,
    } = *inner
    else {
        return None;
    };
    let column = tinct_ir::layout::vector_layout(rows, u32::from(scalar.width));
    (column.align < 16).then_some((columns, rows, scalar))
}

fn needs_fork(module: &Module, ty: Handle<Type>) -> bool {
    match module.types[ty].inner {
        ref m @ TypeInner::Matrix { .. } => split_columns(m).is_some(),
        TypeInner::Array { base, .. } => needs_fork(module, base),
        TypeInner::Struct { ref members, .. } => members.iter().any(|m| needs_fork(module, m.ty)),
        _ => false,
    }
}

/// Index of member `k` of the authored struct in its std140 copy.
fn forked_member_index(module: &Module, members: &[StructMember], k: u32) -> u32 {
    members
        .iter()
        .take(k as usize)
        .map(|m| match split_columns(&module.types[m.ty].inner) {
            Some((columns, ..)) => columns.count(),
            None => 1,
        })
        .sum()
}

/// A short name for `ty`, used in generated declarations.
fn type_tag(module: &Module, ty: Handle<Type>) -> String {
    let t = &module.types[ty];
    match t.inner {
        TypeInner::Matrix {
            columns,
            rows,
            scalar,
        } => format!("mat{columns}x{rows}_{scalar}"),
        TypeInner::Array {
            base,
            size: tinct_ir::ArraySize::Constant(n),
            ..
        } => format!("arr{n}_{}", type_tag(module, base)),
        _ => t.name.clone().unwrap_or_else(|| "T".to_string()),
    }
}

#[derive(Clone, Debug)]
enum Step {
    Const(u32),
    Dynamic(Expression),
}

impl Step {
    fn apply(self, base: Expression) -> Expression {
        match self {
            Self::Const(i) => Expression::access_index(base, i),
            Self::Dynamic(i) => Expression::access(base, i),
        }
    }
}

#[derive(Default)]
struct Forker {
    /// Authored type to std140 type.
    forks: HashMap<Handle<Type>, Handle<Type>>,
    /// Authored type to the helper converting its std140 copy back.
    convs: HashMap<Handle<Type>, Handle<Function>>,
    /// Forked uniform variables and their authored types.
    vars: HashMap<Handle<GlobalVariable>, Handle<Type>>,
}

impl Forker {
    fn fork(&mut self, module: &mut Module, ty: Handle<Type>) -> Option<Handle<Type>> {
        if let Some(&f) = self.forks.get(&ty) {
            return Some(f);
        }
        if !needs_fork(module, ty) {
            return None;
        }
        let forked = match module.types[ty].inner.clone() {
            TypeInner::Matrix {
                columns,
                rows,
                scalar,
            } => {
                let column = module.vector_type(rows, scalar);
                let name = module.fresh_name(&format!("{}_std140", type_tag(module, ty)));
                let members: Vec<(String, Handle<Type>)> = (0..columns.count())
                    .map(|c| (format!("col{c}"), column))
                    .collect();
                let (members, span) = tinct_ir::layout::layout_struct(&module.types, members);
                module.insert_named_type(name, TypeInner::Struct { members, span })
            }
            TypeInner::Array { base, size, stride } => {
                let base = self.fork(module, base)?;
                module.insert_type(TypeInner::Array { base, size, stride })
            }
            TypeInner::Struct { members, span } => {
                let mut out = Vec::with_capacity(members.len());
                for m in members {
                    if let Some((columns, rows, scalar)) =
                        split_columns(&module.types[m.ty].inner)
                    {
                        let column = module.vector_type(rows, scalar);
                        let stride = tinct_ir::layout::array_stride(&module.types, column);
                        out.extend((0..columns.count()).map(|c| StructMember {
                            name: format!("{}_{c}", m.name),
                            ty: column,
                            binding: None,
                            offset: m.offset + c * stride,
                        }));
                    } else {
                        let ty = self.fork(module, m.ty).unwrap_or(m.ty);
                        out.push(StructMember { ty, ..m });
                    }
                }
                let name = module.fresh_name(&format!("{}_std140", type_tag(module, ty)));
                module.insert_named_type(name, TypeInner::Struct { members: out, span })
            }
            _ => return None,
        };
        self.forks.insert(ty, forked);
        Some(forked)
    }

    /// The helper converting a std140 copy of `ty` back to `ty`.
    fn conv(&mut self, module: &mut Module, ty: Handle<Type>) -> Result<Handle<Function>, TransformError> {
        if let Some(&f) = self.convs.get(&ty) {
            return Ok(f);
        }
        let forked = self
            .fork(module, ty)
            .ok_or_else(|| TransformError::ice(NAME, "conversion of an unforked type"))?;
        let mut func = Function::new(module.fresh_name(&format!("conv_{}", type_tag(module, ty))));
        func.arguments.push(FunctionArgument {
            name: "val".into(),
            ty: forked,
            binding: None,
        });
        func.result = Some(FunctionResult { ty, binding: None });
        let val = || Expression::FunctionArgument(0);

        match module.types[ty].inner.clone() {
            TypeInner::Matrix { columns, .. } => {
                let components = (0..columns.count())
                    .map(|c| Expression::access_index(val(), c))
                    .collect();
                func.body = vec![Statement::Return {
                    value: Some(Expression::Compose { ty, components }),
                }];
            }
            TypeInner::Struct { members, .. } => {
                let mut components = Vec::with_capacity(members.len());
                for (k, m) in members.iter().enumerate() {
                    let first = forked_member_index(module, &members, k as u32);
                    let value = match split_columns(&module.types[m.ty].inner) {
                        Some((columns, ..)) => Expression::Compose {
                            ty: m.ty,
                            components: (0..columns.count())
                                .map(|c| Expression::access_index(val(), first + c))
                                .collect(),
                        },
                        None if needs_fork(module, m.ty) => {
                            let f = self.conv(module, m.ty)?;
                            Expression::call(f, vec![Expression::access_index(val(), first)])
                        }
                        None => Expression::access_index(val(), first),
                    };
                    components.push(value);
                }
                func.body = vec![Statement::Return {
                    value: Some(Expression::Compose { ty, components }),
                }];
            }
            TypeInner::Array {
                base,
                size: tinct_ir::ArraySize::Constant(n),
                ..
            } => {
                let element = self.conv(module, base)?;
                let u32_ty = module.scalar_type(Scalar::U32);
                let arr = func.add_local("arr", ty, LocalKind::Var);
                let i = func.add_local("i", u32_ty, LocalKind::Var);
                let index = || Expression::load(Expression::LocalVariable(i));
                func.body = vec![
                    Statement::Declare {
                        local: arr,
                        init: None,
                    },
                    Statement::Declare {
                        local: i,
                        init: Some(Expression::u32(0)),
                    },
                    while_loop(
                        Expression::binary(BinaryOp::Less, index(), Expression::u32(n)),
                        vec![Statement::store(
                            Expression::access(Expression::LocalVariable(arr), index()),
                            Expression::call(element, vec![Expression::access(val(), index())]),
                        )],
                        vec![Statement::store(
                            Expression::LocalVariable(i),
                            Expression::binary(BinaryOp::Add, index(), Expression::u32(1)),
                        )],
                    ),
                    Statement::Return {
                        value: Some(Expression::load(Expression::LocalVariable(arr))),
                    },
                ];
            }
            _ => return Err(TransformError::ice(NAME, "conversion of an unsupported type")),
        }

        let h = module.functions.append(func);
        self.convs.insert(ty, h);
        Ok(h)
    }

    /// The access chain of `pointer` if it is rooted at a forked uniform.
    fn chain(&self, pointer: &Expression) -> Option<(Handle<GlobalVariable>, Vec<Step>)> {
        match *pointer {
            Expression::GlobalVariable(g) if self.vars.contains_key(&g) => Some((g, Vec::new())),
            Expression::AccessIndex { ref base, index } => {
                let (g, mut steps) = self.chain(base)?;
                steps.push(Step::Const(index));
                Some((g, steps))
            }
            Expression::Access {
                ref base,
                ref index,
            } => {
                let (g, mut steps) = self.chain(base)?;
                steps.push(Step::Dynamic((**index).clone()));
                Some((g, steps))
            }
            _ => None,
        }
    }

    /// `cur` points at the std140 copy of matrix `ty`, whose columns start
    /// at member `first`; loads the whole matrix.
    fn matrix_value(cur: &Expression, ty: Handle<Type>, first: u32, columns: VectorSize) -> Expression {
        Expression::Compose {
            ty,
            components: (0..columns.count())
                .map(|c| Expression::load(Expression::access_index(cur.clone(), first + c)))
                .collect(),
        }
    }

    /// Loads through `steps` from forked uniform `var`, producing a value
    /// of the authored type.
    fn load(
        &mut self,
        module: &mut Module,
        var: Handle<GlobalVariable>,
        steps: Vec<Step>,
    ) -> Result<Expression, TransformError> {
        let mut cur = Expression::GlobalVariable(var);
        // The authored type `cur` points at, while it is one that was forked.
        let mut ty = self.vars.get(&var).copied();
        let mut value: Option<Expression> = None;
        let mut steps = steps.into_iter().peekable();
        while let Some(step) = steps.next() {
            if let Some(v) = value.take() {
                value = Some(step.apply(v));
                continue;
            }
            let Some(t) = ty else {
                cur = step.apply(cur);
                continue;
            };
            match module.types[t].inner.clone() {
                TypeInner::Struct { members, .. } => {
                    let Step::Const(k) = step else {
                        return Err(TransformError::ice(NAME, "dynamic index into a struct"));
                    };
                    let member = members
                        .get(k as usize)
                        .ok_or_else(|| TransformError::ice(NAME, "member index out of range"))?;
                    let first = forked_member_index(module, &members, k);
                    match split_columns(&module.types[member.ty].inner) {
                        Some((columns, ..)) => match steps.next() {
                            Some(Step::Const(c)) => {
                                cur = Expression::access_index(cur, first + c);
                                ty = None;
                            }
                            Some(Step::Dynamic(i)) => {
                                value = Some(Expression::access(
                                    Self::matrix_value(&cur, member.ty, first, columns),
                                    i,
                                ));
                            }
                            None => {
                                value = Some(Self::matrix_value(&cur, member.ty, first, columns));
                            }
                        },
                        None => {
                            cur = Expression::access_index(cur, first);
                            ty = needs_fork(module, member.ty).then_some(member.ty);
                        }
                    }
                }
                ref m @ TypeInner::Matrix { .. } => {
                    let Some((columns, ..)) = split_columns(m) else {
                        cur = step.apply(cur);
                        ty = None;
                        continue;
                    };
                    match step {
                        Step::Const(c) => {
                            cur = Expression::access_index(cur, c);
                            ty = None;
                        }
                        Step::Dynamic(i) => {
                            value = Some(Expression::access(
                                Self::matrix_value(&cur, t, 0, columns),
                                i,
                            ));
                        }
                    }
                }
                TypeInner::Array { base, .. } => {
                    cur = step.apply(cur);
                    ty = needs_fork(module, base).then_some(base);
                }
                _ => {
                    cur = step.apply(cur);
                    ty = None;
                }
            }
        }
        if let Some(v) = value {
            return Ok(v);
        }
        match ty {
            Some(t) if needs_fork(module, t) => {
                let conv = self.conv(module, t)?;
                Ok(Expression::call(conv, vec![Expression::load(cur)]))
            }
            _ => Ok(Expression::load(cur)),
        }
    }

    /// Rewrites every load from a forked uniform inside `expr`.
    fn rewrite(&mut self, module: &mut Module, expr: &mut Expression) -> Result<(), TransformError> {
        if let Expression::Load { pointer } = expr {
            if let Some((var, mut steps)) = self.chain(pointer) {
                for step in &mut steps {
                    if let Step::Dynamic(index) = step {
                        self.rewrite(module, index)?;
                    }
                }
                *expr = self.load(module, var, steps)?;
                return Ok(());
            }
        }
        if let Expression::GlobalVariable(g) = *expr {
            if self.vars.contains_key(&g) {
                return Err(TransformError::user(
                    NAME,
                    format!(
                        "uniform '{}' is used other than by loading from it",
                        module.global_variables[g].name
                    ),
                ));
            }
        }
        let mut result = Ok(());
        expr.for_each_child_mut(|child| {
            if result.is_ok() {
                result = self.rewrite(module, child);
            }
        });
        result
    }
}

fn forked_root(forker: &Forker, expr: &Expression) -> bool {
    matches!(*expr.root(), Expression::GlobalVariable(g) if forker.vars.contains_key(&g))
}

/// Substitutes pointer `let`s into a forked uniform at their uses.
fn inline_pointer_lets(
    module: &mut Module,
    func: &mut Function,
    forker: &Forker,
) -> Result<(), TransformError> {
    let mut chains: HashMap<Handle<LocalVariable>, Expression> = HashMap::new();
    let mut body = std::mem::take(&mut func.body);
    let substitute = |e: &mut Expression, chains: &HashMap<Handle<LocalVariable>, Expression>| {
        e.visit_mut_post(&mut |e| {
            if let Expression::LocalVariable(l) = *e {
                if let Some(chain) = chains.get(&l) {
                    *e = chain.clone();
                }
            }
        })
    };
    flat_map_stmts(&mut body, &mut |stmt, out| {
        match stmt {
            Statement::Declare {
                local,
                init: Some(mut init),
            } if func.locals[local].kind == LocalKind::Let
                && module.types[func.locals[local].ty].inner.is_pointer() =>
            {
                substitute(&mut init, &chains);
                if forked_root(forker, &init) {
                    let name = func.locals[local].name.clone();
                    save_indices(module, func, &mut init, &name, out)?;
                    chains.insert(local, init);
                } else {
                    out.push(Statement::Declare {
                        local,
                        init: Some(init),
                    });
                }
            }
            other => out.push(other),
        }
        Ok::<(), TransformError>(())
    })?;
    if !chains.is_empty() {
        tinct_ir::walk_exprs_mut(&mut body, &mut |root| substitute(root, &chains));
    }
    func.body = body;
    Ok(())
}

impl Transform for Std140 {
    fn name(&self) -> &'static str {
        NAME
    }

    fn conflicts_before(&self) -> &'static [&'static str] {
        &["SimplifyPointers"]
    }

    fn should_run(&self, module: &Module, _inputs: &DataMap) -> bool {
        module
            .global_variables
            .iter()
            .any(|(_, g)| g.space == AddressSpace::Uniform && needs_fork(module, g.ty))
    }

    fn apply(
        &self,
        module: &Module,
        _inputs: &DataMap,
        _outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let mut out = module.clone();
        let mut forker = Forker::default();
        let uniforms: Vec<Handle<GlobalVariable>> = out
            .global_variables
            .iter()
            .filter(|(_, g)| g.space == AddressSpace::Uniform && needs_fork(module, g.ty))
            .map(|(h, _)| h)
            .collect();
        for g in uniforms {
            let authored = out.global_variables[g].ty;
            if let Some(forked) = forker.fork(&mut out, authored) {
                out.global_variables[g].ty = forked;
                forker.vars.insert(g, authored);
            }
        }

        // Helpers appended while rewriting already read the std140 types.
        let existing: Vec<Handle<Function>> = out.functions.handles().collect();
        for h in existing {
            with_function(&mut out, h, |module, func| {
                inline_pointer_lets(module, func, &forker)?;
                let mut body = std::mem::take(&mut func.body);
                let mut result = Ok(());
                tinct_ir::walk_exprs_mut(&mut body, &mut |root| {
                    if result.is_ok() {
                        result = forker.rewrite(module, root);
                    }
                });
                func.body = body;
                result
            })?;
        }
        log::debug!(
            "{NAME}: {} type(s) forked, {} conversion helper(s)",
            forker.forks.len(),
            forker.convs.len()
        );
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::EntryPoint;

    /// `struct S { a: f32, m: mat2x2<f32>, b: f32 }`, `var<uniform> u: S`.
    fn uniform_module(loads: impl FnOnce(&mut Module, Handle<GlobalVariable>, &mut Function)) -> Module {
        let mut module = Module::default();
        let f32_ty = module.scalar_type(Scalar::F32);
        let mat = module.matrix_type(VectorSize::Bi, VectorSize::Bi, Scalar::F32);
        let s = module.struct_type("S", &[("a", f32_ty), ("m", mat), ("b", f32_ty)]);
        let u = module
            .global_variables
            .append(GlobalVariable::new("u", AddressSpace::Uniform, s).with_binding(0, 0));
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::compute(1, 1, 1));
        loads(&mut module, u, &mut main);
        module.functions.append(main);
        module
    }

    fn run(module: &Module) -> String {
        assert!(Std140.should_run(module, &DataMap::new()));
        let out = Std140
            .apply(module, &DataMap::new(), &mut DataMap::new())
            .unwrap();
        tinct_ir::validate(&out).unwrap();
        assert!(!Std140.should_run(&out, &DataMap::new()));
        tinct_ir::dump_module(&out)
    }

    fn declare(main: &mut Function, name: &str, ty: Handle<Type>, init: Expression) {
        let local = main.add_local(name, ty, LocalKind::Let);
        main.body.push(Statement::Declare {
            local,
            init: Some(init),
        });
    }

    #[test]
    fn columns_become_members_and_loads_rebuild_the_matrix() {
        let module = uniform_module(|module, u, main| {
            let f32_ty = module.scalar_type(Scalar::F32);
            let vec2 = module.vector_type(VectorSize::Bi, Scalar::F32);
            let mat = module.matrix_type(VectorSize::Bi, VectorSize::Bi, Scalar::F32);
            let m = Expression::access_index(Expression::GlobalVariable(u), 1);
            declare(main, "whole", mat, Expression::load(m.clone()));
            declare(
                main,
                "col",
                vec2,
                Expression::load(Expression::access_index(m, 1)),
            );
            declare(
                main,
                "b",
                f32_ty,
                Expression::load(Expression::access_index(Expression::GlobalVariable(u), 2)),
            );
        });
        let text = run(&module);
        assert!(text.contains("var<uniform> u: S_std140;"), "{text}");
        assert!(
            text.contains("let whole: mat2x2<f32> = mat2x2<f32>(u.m_0, u.m_1);"),
            "{text}"
        );
        assert!(text.contains("let col: vec2<f32> = u.m_1;"), "{text}");
        assert!(text.contains("let b: f32 = u.b;"), "{text}");
    }

    #[test]
    fn member_offsets_are_preserved() {
        let module = uniform_module(|_, _, _| {});
        let mut out = module.clone();
        let s = out.global_variables.iter().next().unwrap().1.ty;
        let forked = Forker::default().fork(&mut out, s).unwrap();
        let TypeInner::Struct { ref members, span } = out.types[forked].inner else {
            panic!("not a struct");
        };
        let layout: Vec<(&str, u32)> = members.iter().map(|m| (m.name.as_str(), m.offset)).collect();
        assert_eq!(layout, [("a", 0), ("m_0", 8), ("m_1", 16), ("b", 24)]);
        assert_eq!(span, 32);
    }

    #[test]
    fn whole_struct_loads_go_through_a_helper() {
        let module = uniform_module(|module, u, main| {
            let s = module.global_variables[u].ty;
            let u32_ty = module.scalar_type(Scalar::U32);
            let vec2 = module.vector_type(VectorSize::Bi, Scalar::F32);
            declare(main, "all", s, Expression::load(Expression::GlobalVariable(u)));
            declare(main, "i", u32_ty, Expression::u32(1));
            let i = main.locals.handles().last().unwrap();
            declare(
                main,
                "dynamic",
                vec2,
                Expression::load(Expression::access(
                    Expression::access_index(Expression::GlobalVariable(u), 1),
                    Expression::LocalVariable(i),
                )),
            );
        });
        let text = run(&module);
        assert!(text.contains("fn conv_S(val: S_std140) -> S {"), "{text}");
        assert!(
            text.contains("return S(val.a, mat2x2<f32>(val.m_0, val.m_1), val.b);"),
            "{text}"
        );
        assert!(text.contains("let all: S = conv_S(u);"), "{text}");
        assert!(
            text.contains("let dynamic: vec2<f32> = mat2x2<f32>(u.m_0, u.m_1)[i];"),
            "{text}"
        );
    }

    #[test]
    fn pointer_lets_into_the_uniform_are_inlined() {
        let module = uniform_module(|module, u, main| {
            let mat = module.matrix_type(VectorSize::Bi, VectorSize::Bi, Scalar::F32);
            let ptr = module.pointer_type(mat, AddressSpace::Uniform, tinct_ir::StorageAccess::LOAD);
            declare(
                main,
                "p",
                ptr,
                Expression::access_index(Expression::GlobalVariable(u), 1),
            );
            let p = main.locals.handles().last().unwrap();
            declare(main, "m", mat, Expression::load(Expression::LocalVariable(p)));
        });
        let text = run(&module);
        assert!(!text.contains("let p"), "{text}");
        assert!(
            text.contains("let m: mat2x2<f32> = mat2x2<f32>(u.m_0, u.m_1);"),
            "{text}"
        );
    }

    #[test]
    fn wide_columns_are_left_alone() {
        let mut module = Module::default();
        let mat = module.matrix_type(VectorSize::Quad, VectorSize::Quad, Scalar::F32);
        module
            .global_variables
            .append(GlobalVariable::new("u", AddressSpace::Uniform, mat).with_binding(0, 0));
        assert!(!Std140.should_run(&module, &DataMap::new()));
    }
}
