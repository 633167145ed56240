//! Combines separate textures and samplers into GLSL combined samplers.
//!
//! GLSL has no separate sampler objects: every texture is sampled through
//! a `sampler2D`-style variable. Each distinct (texture, sampler) pair used
//! by a texture builtin becomes one texture-typed variable named
//! `<texture>_<sampler>`. A texture used only by non-sampling builtins
//! becomes `<texture>`, or shares the variable of a full pair over the same
//! texture in the same function.
//!
//! Pairs rooted in function parameters are passed down the call graph as
//! new trailing parameters, so after this pass no function takes a sampler
//! or a sampled texture argument.

use std::collections::{HashMap, HashSet};

use tinct_ir::{
    AddressSpace, BindingPoint, Expression, Function, FunctionArgument, GlobalVariable, Handle,
    Module, SampledKind, TextureCall, TextureClass, TextureFn, TypeInner, fresh_local_name,
};
use tinct_transform::util::with_function;
use tinct_transform::{DataMap, Transform, TransformError};

const NAME: &str = "CombineSamplers";

#[derive(Debug)]
pub struct CombineSamplers;

/// One combined sampler declared at module scope.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CombinedSampler {
    pub name: String,
    pub texture: Option<BindingPoint>,
    /// `None` for textures never paired with a sampler.
    pub sampler: Option<BindingPoint>,
}

/// The combined samplers created, in declaration order.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CombinedSamplers {
    pub samplers: Vec<CombinedSampler>,
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
enum Source {
    Global(Handle<GlobalVariable>),
    Arg(u32),
}

#[derive(Clone, Copy, Debug, Hash, PartialEq, Eq)]
struct Pair {
    texture: Source,
    sampler: Option<Source>,
}

impl Pair {
    fn is_global(&self) -> bool {
        matches!(self.texture, Source::Global(_))
            && !matches!(self.sampler, Some(Source::Arg(_)))
    }
}

/// How calls to an already processed function are rewritten.
#[derive(Debug, Default)]
struct FnInfo {
    /// Original argument index to new index, `None` for removed arguments.
    arg_map: Vec<Option<u32>>,
    /// Pairs passed as trailing arguments, in parameter order.
    param_pairs: Vec<Pair>,
}

fn is_combinable(inner: &TypeInner) -> bool {
    match inner {
        TypeInner::Sampler { .. } => true,
        TypeInner::Texture { class, .. } => !matches!(class, TextureClass::Storage { .. }),
        _ => false,
    }
}

fn user_error() -> TransformError {
    TransformError::user(
        NAME,
        "textures and samplers must be module-scope variables or function parameters",
    )
}

/// The texture operands of a function, read against its original
/// parameters.
struct Scope<'a> {
    module: &'a Module,
    args: &'a [FunctionArgument],
}

impl Scope<'_> {
    fn ty(&self, source: Source) -> Option<&TypeInner> {
        let ty = match source {
            Source::Global(g) => self.module.global_variables.try_get(g)?.ty,
            Source::Arg(i) => self.args.get(i as usize)?.ty,
        };
        Some(&self.module.types[ty].inner)
    }

    fn name(&self, source: Source) -> &str {
        match source {
            Source::Global(g) => self
                .module
                .global_variables
                .try_get(g)
                .map_or("", |v| v.name.as_str()),
            Source::Arg(i) => self.args.get(i as usize).map_or("", |a| a.name.as_str()),
        }
    }

    fn binding(&self, source: Option<Source>) -> Option<BindingPoint> {
        match source? {
            Source::Global(g) => self.module.global_variables.try_get(g)?.binding,
            Source::Arg(_) => None,
        }
    }

    fn source_of(&self, expr: &Expression) -> Option<Source> {
        let source = match *expr {
            Expression::GlobalVariable(g) => Source::Global(g),
            Expression::FunctionArgument(i) => Source::Arg(i),
            _ => return None,
        };
        self.ty(source).is_some_and(is_combinable).then_some(source)
    }

    fn texture_pair(&self, call: &TextureCall) -> Result<Option<Pair>, TransformError> {
        let Some(texture) = self.source_of(&call.texture) else {
            return Ok(None);
        };
        let sampler = match call.sampler {
            Some(ref s) if call.fun.uses_sampler() => {
                Some(self.source_of(s).ok_or_else(user_error)?)
            }
            _ => None,
        };
        Ok(Some(Pair { texture, sampler }))
    }

    fn map_source(&self, source: Source, args: &[Expression]) -> Result<Source, TransformError> {
        match source {
            Source::Global(_) => Ok(source),
            Source::Arg(i) => args
                .get(i as usize)
                .and_then(|a| self.source_of(a))
                .ok_or_else(user_error),
        }
    }

    /// The caller's view of a callee parameter pair.
    fn map_pair(&self, pair: Pair, args: &[Expression]) -> Result<Pair, TransformError> {
        Ok(Pair {
            texture: self.map_source(pair.texture, args)?,
            sampler: match pair.sampler {
                Some(s) => Some(self.map_source(s, args)?),
                None => None,
            },
        })
    }

    /// The type of the combined variable. Depth textures read without a
    /// comparison sampler become float textures.
    fn combined_inner(&self, pair: Pair) -> Option<TypeInner> {
        let TypeInner::Texture { dim, class } = *self.ty(pair.texture)? else {
            return None;
        };
        let comparison = pair
            .sampler
            .and_then(|s| self.ty(s))
            .is_some_and(|t| matches!(t, TypeInner::Sampler { comparison: true }));
        let class = match class {
            TextureClass::Depth if !comparison => TextureClass::Sampled(SampledKind::Float),
            TextureClass::DepthMultisampled => TextureClass::Multisampled(SampledKind::Float),
            other => other,
        };
        Some(TypeInner::Texture { dim, class })
    }

    fn reads_depth_as_float(&self, pair: Pair) -> bool {
        let was_depth = matches!(
            self.ty(pair.texture),
            Some(TypeInner::Texture {
                class: TextureClass::Depth | TextureClass::DepthMultisampled,
                ..
            })
        );
        let is_depth = matches!(
            self.combined_inner(pair),
            Some(TypeInner::Texture {
                class: TextureClass::Depth | TextureClass::DepthMultisampled,
                ..
            })
        );
        was_depth && !is_depth
    }

    fn collect_pairs(
        &self,
        func: &Function,
        infos: &HashMap<Handle<Function>, FnInfo>,
    ) -> Result<Vec<Pair>, TransformError> {
        let mut pairs = Vec::new();
        let mut result = Ok(());
        tinct_ir::walk_all_exprs(&func.body, &mut |e| {
            if result.is_err() {
                return;
            }
            let found = match e {
                Expression::Texture(call) => self.texture_pair(call).map(|p| p.into_iter().collect()),
                Expression::Call {
                    function,
                    arguments,
                } => infos.get(function).map_or(Ok(Vec::new()), |info| {
                    info.param_pairs
                        .iter()
                        .map(|p| self.map_pair(*p, arguments))
                        .collect::<Result<Vec<_>, _>>()
                }),
                _ => Ok(Vec::new()),
            };
            match found {
                Ok(found) => {
                    for pair in found {
                        if !pairs.contains(&pair) {
                            pairs.push(pair);
                        }
                    }
                }
                Err(err) => result = Err(err),
            }
        });
        result.map(|()| pairs)
    }

    /// The pair whose variable `pair` reads through.
    fn owner(&self, pair: Pair, pairs: &[Pair]) -> Pair {
        if pair.sampler.is_some() {
            return pair;
        }
        let inner = self.combined_inner(pair);
        pairs
            .iter()
            .find(|q| {
                q.texture == pair.texture && q.sampler.is_some() && self.combined_inner(**q) == inner
            })
            .copied()
            .unwrap_or(pair)
    }
}

/// What one owning pair turns into.
struct Planned {
    pair: Pair,
    inner: TypeInner,
    name: String,
    texture_binding: Option<BindingPoint>,
    sampler_binding: Option<BindingPoint>,
}

/// A module-scope name for a combined variable. The separate variables it
/// replaces are going away, so their names are free.
fn combined_name(
    module: &Module,
    originals: &HashSet<Handle<GlobalVariable>>,
    base: &str,
) -> String {
    let taken = |name: &str| {
        module.functions.iter().any(|(_, f)| f.name == name)
            || module.overrides.iter().any(|(_, o)| o.name == name)
            || module
                .types
                .iter()
                .any(|(_, t)| t.name.as_deref() == Some(name))
            || module
                .global_variables
                .iter()
                .any(|(h, g)| g.name == name && !originals.contains(&h))
    };
    std::iter::once(base.to_string())
        .chain((1..).map(|i| format!("{base}_{i}")))
        .find(|n| !taken(n))
        .unwrap_or_else(|| base.to_string())
}

struct Rewriter<'a> {
    scope: Scope<'a>,
    infos: &'a HashMap<Handle<Function>, FnInfo>,
    arg_map: &'a [Option<u32>],
    /// Every pair of the function, with the expression naming its combined
    /// variable and whether depth reads need a `[0]`.
    replacements: &'a HashMap<Pair, (Expression, bool)>,
}

impl Rewriter<'_> {
    fn replacement(&self, pair: Pair) -> Result<&(Expression, bool), TransformError> {
        self.replacements
            .get(&pair)
            .ok_or_else(|| TransformError::ice(NAME, "texture pair without a combined sampler"))
    }

    fn rewrite(&self, e: &mut Expression) -> Result<(), TransformError> {
        match e {
            Expression::Texture(call) => {
                if let Some(pair) = self.scope.texture_pair(call)? {
                    let (replacement, float_depth) = self.replacement(pair)?.clone();
                    call.texture = replacement;
                    call.sampler = None;
                    for op in [
                        &mut call.component,
                        &mut call.coords,
                        &mut call.array_index,
                        &mut call.depth_ref,
                        &mut call.bias,
                        &mut call.level,
                        &mut call.sample_index,
                        &mut call.ddx,
                        &mut call.ddy,
                        &mut call.offset,
                        &mut call.value,
                    ]
                    .into_iter()
                    .flatten()
                    {
                        self.rewrite(op)?;
                    }
                    let scalar_result = matches!(
                        call.fun,
                        TextureFn::Sample
                            | TextureFn::SampleBias
                            | TextureFn::SampleLevel
                            | TextureFn::SampleGrad
                            | TextureFn::Load
                    );
                    if float_depth && scalar_result {
                        let read = std::mem::replace(e, Expression::u32(0));
                        *e = Expression::access_index(read, 0);
                    }
                    return Ok(());
                }
            }
            Expression::Call {
                function,
                arguments,
            } => {
                if let Some(info) = self.infos.get(function) {
                    let old = std::mem::take(arguments);
                    let extra = info
                        .param_pairs
                        .iter()
                        .map(|p| {
                            let pair = self.scope.map_pair(*p, &old)?;
                            Ok(self.replacement(pair)?.0.clone())
                        })
                        .collect::<Result<Vec<_>, TransformError>>()?;
                    for (i, mut arg) in old.into_iter().enumerate() {
                        if info.arg_map.get(i).copied().flatten().is_some() {
                            self.rewrite(&mut arg)?;
                            arguments.push(arg);
                        }
                    }
                    arguments.extend(extra);
                    return Ok(());
                }
            }
            Expression::FunctionArgument(i) => {
                *i = self
                    .arg_map
                    .get(*i as usize)
                    .copied()
                    .flatten()
                    .ok_or_else(|| {
                        TransformError::ice(NAME, "removed parameter used outside a texture call")
                    })?;
                return Ok(());
            }
            _ => {}
        }
        let mut result = Ok(());
        e.for_each_child_mut(|child| {
            if result.is_ok() {
                result = self.rewrite(child);
            }
        });
        result
    }
}

impl Transform for CombineSamplers {
    fn name(&self) -> &'static str {
        NAME
    }

    fn should_run(&self, module: &Module, _inputs: &DataMap) -> bool {
        module
            .global_variables
            .iter()
            .any(|(_, g)| is_combinable(&module.types[g.ty].inner))
            || module.functions.iter().any(|(_, f)| {
                f.arguments
                    .iter()
                    .any(|a| is_combinable(&module.types[a.ty].inner))
            })
    }

    fn apply(
        &self,
        module: &Module,
        _inputs: &DataMap,
        outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let mut out = module.clone();
        let originals: HashSet<Handle<GlobalVariable>> = out
            .global_variables
            .iter()
            .filter(|(_, g)| g.space == AddressSpace::Handle && is_combinable(&out.types[g.ty].inner))
            .map(|(h, _)| h)
            .collect();
        let mut infos: HashMap<Handle<Function>, FnInfo> = HashMap::new();
        let mut globals: HashMap<Pair, Handle<GlobalVariable>> = HashMap::new();
        let mut combined = CombinedSamplers::default();

        for h in out.function_order() {
            let info = with_function(&mut out, h, |module, func| {
                let orig_args = func.arguments.clone();

                // Plan against the untouched module, then apply.
                let (pairs, owners, plans, float_depth) = {
                    let scope = Scope {
                        module,
                        args: &orig_args,
                    };
                    let pairs = scope.collect_pairs(func, &infos)?;
                    let owners: Vec<Pair> = pairs.iter().map(|p| scope.owner(*p, &pairs)).collect();
                    let mut plans: Vec<Planned> = Vec::new();
                    for &pair in &owners {
                        if plans.iter().any(|p| p.pair == pair) {
                            continue;
                        }
                        let inner = scope
                            .combined_inner(pair)
                            .ok_or_else(|| TransformError::ice(NAME, "texture pair without a texture"))?;
                        let name = match pair.sampler {
                            Some(s) => format!("{}_{}", scope.name(pair.texture), scope.name(s)),
                            None => scope.name(pair.texture).to_string(),
                        };
                        plans.push(Planned {
                            pair,
                            inner,
                            name,
                            texture_binding: scope.binding(Some(pair.texture)),
                            sampler_binding: scope.binding(pair.sampler),
                        });
                    }
                    let float_depth: Vec<bool> =
                        pairs.iter().map(|p| scope.reads_depth_as_float(*p)).collect();
                    (pairs, owners, plans, float_depth)
                };

                let mut arg_map = Vec::with_capacity(orig_args.len());
                let mut kept = Vec::new();
                for arg in &orig_args {
                    if is_combinable(&module.types[arg.ty].inner) {
                        arg_map.push(None);
                    } else {
                        arg_map.push(Some(kept.len() as u32));
                        kept.push(arg.clone());
                    }
                }
                func.arguments = kept;

                let mut owner_exprs: HashMap<Pair, Expression> = HashMap::new();
                let mut param_pairs = Vec::new();
                for plan in plans {
                    let ty = module.insert_type(plan.inner);
                    let expr = if plan.pair.is_global() {
                        let var = match globals.get(&plan.pair) {
                            Some(&var) => var,
                            None => {
                                let name = combined_name(module, &originals, &plan.name);
                                let mut var = GlobalVariable::new(name.clone(), AddressSpace::Handle, ty);
                                var.binding = plan.texture_binding;
                                let var = module.global_variables.append(var);
                                globals.insert(plan.pair, var);
                                combined.samplers.push(CombinedSampler {
                                    name,
                                    texture: plan.texture_binding,
                                    sampler: plan.sampler_binding,
                                });
                                var
                            }
                        };
                        Expression::GlobalVariable(var)
                    } else {
                        let index = func.arguments.len() as u32;
                        func.arguments.push(FunctionArgument {
                            name: fresh_local_name(func, &plan.name),
                            ty,
                            binding: None,
                        });
                        param_pairs.push(plan.pair);
                        Expression::FunctionArgument(index)
                    };
                    owner_exprs.insert(plan.pair, expr);
                }

                let mut replacements = HashMap::new();
                for ((pair, owner), float_depth) in pairs.iter().zip(&owners).zip(float_depth) {
                    let expr = owner_exprs
                        .get(owner)
                        .cloned()
                        .ok_or_else(|| TransformError::ice(NAME, "unplanned texture pair"))?;
                    replacements.insert(*pair, (expr, float_depth));
                }

                let mut body = std::mem::take(&mut func.body);
                let rewriter = Rewriter {
                    scope: Scope {
                        module,
                        args: &orig_args,
                    },
                    infos: &infos,
                    arg_map: &arg_map,
                    replacements: &replacements,
                };
                let mut result = Ok(());
                tinct_ir::walk_exprs_mut(&mut body, &mut |root| {
                    if result.is_ok() {
                        result = rewriter.rewrite(root);
                    }
                });
                func.body = body;
                result.map(|()| FnInfo {
                    arg_map,
                    param_pairs,
                })
            })?;
            infos.insert(h, info);
        }

        let mut referenced = HashSet::new();
        for (_, func) in out.functions.iter() {
            referenced.extend(Module::globals_referenced(func));
        }
        out.retain_globals(|h, _| !originals.contains(&h) || referenced.contains(&h));

        log::debug!("{NAME}: {} combined samplers", combined.samplers.len());
        outputs.insert(combined);
        Ok(out)
    }
}
