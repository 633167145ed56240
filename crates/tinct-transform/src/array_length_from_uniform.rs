//! Computes `arrayLength` from buffer sizes passed in a uniform buffer.
//!
//! The buffer holds `buffer_size: array<vec4<u32>, N>`; the byte size of
//! the storage buffer mapped to size index `i` is `buffer_size[i / 4][i % 4]`.

use std::collections::{BTreeSet, HashMap};

use tinct_ir::{
    AddressSpace, BinaryOp, BindingPoint, BuiltinFn, Expression, Function, GlobalVariable, Handle,
    LocalKind, LocalVariable, Module, ResolveContext, Scalar, Statement, TypeInner, VectorSize,
};

use crate::util::{for_each_function, try_rewrite};
use crate::{DataMap, Transform, TransformError};

const NAME: &str = "ArrayLengthFromUniform";

#[derive(Clone, Debug, Default)]
pub struct ArrayLengthFromUniformConfig {
    /// Binding point of the generated uniform buffer.
    pub ubo_binding: BindingPoint,
    /// Size index of each storage buffer, keyed by its binding point.
    pub bindpoint_to_size_index: HashMap<BindingPoint, u32>,
}

/// Size indices the rewritten module reads. The host only needs to fill
/// these.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ArrayLengthFromUniformResult {
    pub used_size_indices: BTreeSet<u32>,
}

#[derive(Debug)]
pub struct ArrayLengthFromUniform;

/// Where a runtime-sized array lives: its buffer, the byte offset of the
/// array in it, and the array stride.
struct Target {
    var: Handle<GlobalVariable>,
    offset: u32,
    stride: u32,
}

fn pointer_lets(func: &Function) -> HashMap<Handle<LocalVariable>, Expression> {
    let mut lets = HashMap::new();
    tinct_ir::walk_stmts(&func.body, &mut |stmt| {
        if let Statement::Declare {
            local,
            init: Some(init),
        } = stmt
        {
            if func.locals[*local].kind == LocalKind::Let {
                lets.insert(*local, init.clone());
            }
        }
    });
    lets
}

fn target(
    module: &Module,
    func: &Function,
    lets: &HashMap<Handle<LocalVariable>, Expression>,
    pointer: &Expression,
) -> Result<Target, TransformError> {
    let unresolved = || {
        TransformError::user(
            NAME,
            format!("cannot resolve the buffer of an arrayLength() call in '{}'", func.name),
        )
    };
    let stride = match ResolveContext::new(module, func).resolve_pointee(pointer)? {
        TypeInner::Array { stride, .. } => stride,
        _ => return Err(unresolved()),
    };
    match *pointer {
        Expression::GlobalVariable(var) => Ok(Target {
            var,
            offset: 0,
            stride,
        }),
        Expression::AccessIndex { ref base, index } => {
            let Expression::GlobalVariable(var) = **base else {
                return Err(unresolved());
            };
            match module.types[module.global_variables[var].ty].inner {
                TypeInner::Struct { ref members, .. } => {
                    let member = members.get(index as usize).ok_or_else(unresolved)?;
                    Ok(Target {
                        var,
                        offset: member.offset,
                        stride,
                    })
                }
                _ => Err(unresolved()),
            }
        }
        Expression::LocalVariable(l) => match lets.get(&l) {
            Some(init) => target(module, func, lets, init),
            None => Err(unresolved()),
        },
        _ => Err(unresolved()),
    }
}

fn size_index(
    module: &Module,
    cfg: &ArrayLengthFromUniformConfig,
    t: &Target,
) -> Option<u32> {
    let binding = module.global_variables[t.var].binding?;
    cfg.bindpoint_to_size_index.get(&binding).copied()
}

/// `arrayLength` calls whose buffer has a size index.
fn used_indices(
    module: &Module,
    cfg: &ArrayLengthFromUniformConfig,
) -> Result<BTreeSet<u32>, TransformError> {
    let mut used = BTreeSet::new();
    for (_, func) in module.functions.iter() {
        let lets = pointer_lets(func);
        let mut result = Ok(());
        tinct_ir::walk_all_exprs(&func.body, &mut |e| {
            if result.is_err() {
                return;
            }
            if let Expression::Builtin {
                fun: BuiltinFn::ArrayLength,
                ref arguments,
            } = *e
            {
                result = arguments
                    .first()
                    .map_or(Ok(()), |p| match target(module, func, &lets, p) {
                        Ok(t) => {
                            used.extend(size_index(module, cfg, &t));
                            Ok(())
                        }
                        Err(e) => Err(e),
                    });
            }
        });
        result?;
    }
    Ok(used)
}

impl Transform for ArrayLengthFromUniform {
    fn name(&self) -> &'static str {
        NAME
    }

    fn requires(&self) -> &'static [&'static str] {
        &["BindingRemapper"]
    }

    fn should_run(&self, module: &Module, inputs: &DataMap) -> bool {
        // Without a config, `apply` reports the missing input.
        let Some(cfg) = inputs.get::<ArrayLengthFromUniformConfig>() else {
            return true;
        };
        !matches!(used_indices(module, cfg), Ok(used) if used.is_empty())
    }

    fn apply(
        &self,
        module: &Module,
        inputs: &DataMap,
        outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let cfg = inputs
            .get::<ArrayLengthFromUniformConfig>()
            .ok_or_else(|| TransformError::missing(NAME, "ArrayLengthFromUniformConfig"))?;
        let mut out = module.clone();
        let used = used_indices(&out, cfg)?;
        let Some(&max) = used.last() else {
            outputs.insert(ArrayLengthFromUniformResult::default());
            return Ok(out);
        };

        let vec4 = out.vector_type(VectorSize::Quad, Scalar::U32);
        let sizes = out.array_type(vec4, max / 4 + 1);
        let name = out.fresh_name("ArrayLengths");
        let block = out.struct_type(&name, &[("buffer_size", sizes)]);
        let ubo = out.global_variables.append(
            GlobalVariable::new(out.fresh_name("ubo"), AddressSpace::Uniform, block)
                .with_binding(cfg.ubo_binding.group, cfg.ubo_binding.binding),
        );

        for_each_function(&mut out, |module, _, func| {
            let lets = pointer_lets(func);
            let mut body = std::mem::take(&mut func.body);
            let mut result = Ok(());
            tinct_ir::walk_exprs_mut(&mut body, &mut |root| {
                if result.is_err() {
                    return;
                }
                result = try_rewrite(root, &mut |e| {
                    let Expression::Builtin {
                        fun: BuiltinFn::ArrayLength,
                        arguments,
                    } = e
                    else {
                        return Ok(());
                    };
                    let Some(pointer) = arguments.first() else {
                        return Ok(());
                    };
                    let t = target(module, func, &lets, pointer)?;
                    let Some(index) = size_index(module, cfg, &t) else {
                        return Ok(());
                    };
                    let total = Expression::load(Expression::access_index(
                        Expression::access_index(
                            Expression::access_index(Expression::GlobalVariable(ubo), 0),
                            index / 4,
                        ),
                        index % 4,
                    ));
                    let bytes = if t.offset == 0 {
                        total
                    } else {
                        Expression::binary(BinaryOp::Subtract, total, Expression::u32(t.offset))
                    };
                    *e = Expression::binary(BinaryOp::Divide, bytes, Expression::u32(t.stride));
                    Ok(())
                });
            });
            func.body = body;
            result
        })?;

        log::debug!("{NAME}: {} buffer size(s) read from the uniform buffer", used.len());
        outputs.insert(ArrayLengthFromUniformResult {
            used_size_indices: used,
        });
        Ok(out)
    }
}
