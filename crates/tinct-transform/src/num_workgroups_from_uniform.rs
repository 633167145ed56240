//! Reads the `num_workgroups` builtin from a uniform buffer.
//!
//! Targets without a system value for the dispatch size get it from a
//! `tint_num_workgroups` uniform that the host fills before dispatching.

use tinct_ir::{
    AddressSpace, Binding, BindingPoint, BuiltIn, Expression, Function, GlobalVariable, Handle,
    Module, Scalar, ShaderStage, Type, TypeInner, VectorSize,
};

use crate::util::with_function;
use crate::{DataMap, Transform, TransformError};

const NAME: &str = "NumWorkgroupsFromUniform";

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct NumWorkgroupsFromUniformConfig {
    /// Where the uniform goes. When unset, the next free binding of group 0
    /// is used.
    pub ubo_binding: Option<BindingPoint>,
}

#[derive(Debug)]
pub struct NumWorkgroupsFromUniform;

fn is_num_workgroups(binding: Option<&Binding>) -> bool {
    binding.and_then(Binding::builtin) == Some(BuiltIn::NumWorkgroups)
}

/// Where the dispatch size is read from in one entry point.
enum Source {
    /// A whole argument.
    Argument(u32),
    /// A member of an IO struct argument.
    Member { arg: u32, ty: Handle<Type>, member: u32 },
}

fn sources(module: &Module, func: &Function) -> Vec<Source> {
    let mut out = Vec::new();
    for (i, arg) in func.arguments.iter().enumerate() {
        if is_num_workgroups(arg.binding.as_ref()) {
            out.push(Source::Argument(i as u32));
            continue;
        }
        if let TypeInner::Struct { ref members, .. } = module.types[arg.ty].inner {
            if let Some(m) = members
                .iter()
                .position(|m| is_num_workgroups(m.binding.as_ref()))
            {
                out.push(Source::Member {
                    arg: i as u32,
                    ty: arg.ty,
                    member: m as u32,
                });
            }
        }
    }
    out
}

fn free_binding(module: &Module) -> BindingPoint {
    let next = module
        .global_variables
        .iter()
        .filter_map(|(_, g)| g.binding)
        .filter(|b| b.group == 0)
        .map(|b| b.binding + 1)
        .max()
        .unwrap_or(0);
    BindingPoint::new(0, next)
}

/// Rewrites uses of the dispatch size in `func`, dropping the struct
/// member or argument it came from.
fn rewrite(
    module: &mut Module,
    func: &mut Function,
    ubo: Handle<GlobalVariable>,
) -> Result<(), TransformError> {
    let value = || Expression::load(Expression::access_index(Expression::GlobalVariable(ubo), 0));
    let mut removed_args = Vec::new();
    for source in sources(module, func) {
        match source {
            Source::Argument(arg) => {
                tinct_ir::rewrite_all_exprs(&mut func.body, &mut |e| {
                    if *e == Expression::FunctionArgument(arg) {
                        *e = value();
                    }
                });
                removed_args.push(arg);
            }
            Source::Member { arg, ty, member } => {
                let (mut uses, mut projections) = (0, 0);
                tinct_ir::walk_all_exprs(&func.body, &mut |e| match *e {
                    Expression::FunctionArgument(a) if a == arg => uses += 1,
                    Expression::AccessIndex { ref base, .. }
                        if **base == Expression::FunctionArgument(arg) =>
                    {
                        projections += 1
                    }
                    _ => {}
                });
                if uses != projections {
                    return Err(TransformError::ice(
                        NAME,
                        format!("'{}' uses its IO struct as a whole value", func.name),
                    ));
                }
                tinct_ir::rewrite_all_exprs(&mut func.body, &mut |e| {
                    let Expression::AccessIndex { base, index } = e else {
                        return;
                    };
                    if **base != Expression::FunctionArgument(arg) {
                        return;
                    }
                    if *index == member {
                        *e = value();
                    } else if *index > member {
                        *index -= 1;
                    }
                });
                let TypeInner::Struct { ref members, .. } = module.types[ty].inner else {
                    continue;
                };
                let remaining: Vec<_> = members
                    .iter()
                    .enumerate()
                    .filter(|&(i, _)| i as u32 != member)
                    .map(|(_, m)| m.clone())
                    .collect();
                if remaining.is_empty() {
                    removed_args.push(arg);
                    continue;
                }
                let (mut laid_out, span) = tinct_ir::layout::layout_struct(
                    &module.types,
                    remaining.iter().map(|m| (m.name.clone(), m.ty)).collect(),
                );
                for (new, old) in laid_out.iter_mut().zip(&remaining) {
                    new.binding = old.binding;
                }
                module.types.map_in_place(|h, t| {
                    if h == ty {
                        t.inner = TypeInner::Struct {
                            members: laid_out.clone(),
                            span,
                        };
                    }
                });
            }
        }
    }

    removed_args.sort_unstable();
    for &arg in removed_args.iter().rev() {
        func.arguments.remove(arg as usize);
        tinct_ir::rewrite_all_exprs(&mut func.body, &mut |e| {
            if let Expression::FunctionArgument(i) = e {
                if *i > arg {
                    *i -= 1;
                }
            }
        });
    }
    Ok(())
}

impl Transform for NumWorkgroupsFromUniform {
    fn name(&self) -> &'static str {
        NAME
    }

    fn should_run(&self, module: &Module, _inputs: &DataMap) -> bool {
        module.entry_points().any(|(_, f)| !sources(module, f).is_empty())
    }

    fn apply(
        &self,
        module: &Module,
        inputs: &DataMap,
        _outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let cfg = inputs
            .get::<NumWorkgroupsFromUniformConfig>()
            .copied()
            .unwrap_or_default();
        let mut out = module.clone();
        let binding = cfg.ubo_binding.unwrap_or_else(|| free_binding(&out));
        let vec3 = out.vector_type(VectorSize::Tri, Scalar::U32);
        let name = out.fresh_name("tint_num_workgroups_struct");
        let block = out.struct_type(&name, &[("num_workgroups", vec3)]);
        let ubo = out.global_variables.append(
            GlobalVariable::new(
                out.fresh_name("tint_num_workgroups"),
                AddressSpace::Uniform,
                block,
            )
            .with_binding(binding.group, binding.binding),
        );
        log::debug!("{NAME}: dispatch size read from {binding}");

        let targets: Vec<Handle<Function>> = out
            .entry_points()
            .filter(|(_, f)| f.stage() == Some(ShaderStage::Compute))
            .map(|(h, _)| h)
            .collect();
        for h in targets {
            with_function(&mut out, h, |module, func| rewrite(module, func, ubo))?;
        }
        Ok(out)
    }
}
