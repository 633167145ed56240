//! Reads `textureNumLevels` and `textureNumSamples` from a uniform buffer.
//!
//! GLSL ES has no `textureQueryLevels` and, before 3.2, no
//! `textureSamples`. Each distinct query of a module-scope texture gets a
//! `u32` slot in a uniform struct that the host fills in, and the query is
//! replaced by a read of that slot.

use tinct_ir::{
    AddressSpace, BindingPoint, Expression, GlobalVariable, Handle, Module, Scalar, TextureFn,
};
use tinct_transform::util::for_each_function;
use tinct_transform::{DataMap, Transform, TransformError};

const NAME: &str = "TextureBuiltinsFromUniform";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureBuiltinsFromUniformConfig {
    /// Binding point of the generated uniform buffer.
    pub ubo_binding: BindingPoint,
}

/// What the host writes into one slot of the uniform.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TextureBuiltinSlot {
    /// Binding point of the queried texture.
    pub texture: BindingPoint,
    /// `NumLevels` or `NumSamples`.
    pub query: TextureFn,
}

/// Slot `i` of the generated uniform holds `slots[i]`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct TextureBuiltinsFromUniformResult {
    pub slots: Vec<TextureBuiltinSlot>,
}

#[derive(Debug)]
pub struct TextureBuiltinsFromUniform;

fn is_query(fun: TextureFn) -> bool {
    matches!(fun, TextureFn::NumLevels | TextureFn::NumSamples)
}

/// The slot a query expression reads, if it queries a bound module-scope
/// texture.
fn slot_of(module: &Module, expr: &Expression) -> Option<TextureBuiltinSlot> {
    let Expression::Texture(call) = expr else {
        return None;
    };
    if !is_query(call.fun) {
        return None;
    }
    let Expression::GlobalVariable(g) = call.texture else {
        return None;
    };
    Some(TextureBuiltinSlot {
        texture: module.global_variables.try_get(g)?.binding?,
        query: call.fun,
    })
}

fn collect_slots(module: &Module) -> Vec<TextureBuiltinSlot> {
    let mut slots = Vec::new();
    for (_, func) in module.functions.iter() {
        tinct_ir::walk_all_exprs(&func.body, &mut |e| {
            if let Some(slot) = slot_of(module, e) {
                if !slots.contains(&slot) {
                    slots.push(slot);
                }
            }
        });
    }
    slots
}

impl Transform for TextureBuiltinsFromUniform {
    fn name(&self) -> &'static str {
        NAME
    }

    fn should_run(&self, module: &Module, inputs: &DataMap) -> bool {
        inputs.contains::<TextureBuiltinsFromUniformConfig>() && !collect_slots(module).is_empty()
    }

    fn apply(
        &self,
        module: &Module,
        inputs: &DataMap,
        outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let cfg = inputs
            .get::<TextureBuiltinsFromUniformConfig>()
            .ok_or_else(|| TransformError::missing(NAME, "TextureBuiltinsFromUniformConfig"))?;
        let mut out = module.clone();
        let slots = collect_slots(&out);

        let u32_ty = out.scalar_type(Scalar::U32);
        let member_names: Vec<String> = (0..slots.len())
            .map(|i| format!("texture_builtin_value_{i}"))
            .collect();
        let members: Vec<(&str, Handle<_>)> =
            member_names.iter().map(|n| (n.as_str(), u32_ty)).collect();
        let struct_name = out.fresh_name("TintTextureUniformData");
        let struct_ty = out.struct_type(&struct_name, &members);
        let var_name = out.fresh_name("tint_texture_builtins");
        let ubo = out.global_variables.append(
            GlobalVariable::new(var_name, AddressSpace::Uniform, struct_ty)
                .with_binding(cfg.ubo_binding.group, cfg.ubo_binding.binding),
        );

        for_each_function(&mut out, |module, _, func| {
            tinct_ir::rewrite_all_exprs(&mut func.body, &mut |e| {
                let Some(slot) = slot_of(module, e) else {
                    return;
                };
                if let Some(i) = slots.iter().position(|s| *s == slot) {
                    *e = Expression::load(Expression::access_index(
                        Expression::GlobalVariable(ubo),
                        i as u32,
                    ));
                }
            });
            Ok(())
        })?;

        outputs.insert(TextureBuiltinsFromUniformResult { slots });
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{
        EntryPoint, Function, SampledKind, Statement, TextureCall, TextureClass, TextureDimension,
        TypeInner, dump_module,
    };

    fn query(fun: TextureFn, texture: Handle<GlobalVariable>) -> Expression {
        Expression::Texture(Box::new(TextureCall::new(
            fun,
            Expression::GlobalVariable(texture),
        )))
    }

    #[test]
    fn queries_read_the_uniform() {
        let mut module = Module::default();
        let tex_ty = module.insert_type(TypeInner::Texture {
            dim: TextureDimension::D2,
            class: TextureClass::Sampled(SampledKind::Float),
        });
        let ms_ty = module.insert_type(TypeInner::Texture {
            dim: TextureDimension::D2,
            class: TextureClass::Multisampled(SampledKind::Float),
        });
        let u32_ty = module.scalar_type(Scalar::U32);
        let t = module
            .global_variables
            .append(GlobalVariable::new("t", AddressSpace::Handle, tex_ty).with_binding(0, 2));
        let ms = module
            .global_variables
            .append(GlobalVariable::new("ms", AddressSpace::Handle, ms_ty).with_binding(1, 0));
        let out = module
            .global_variables
            .append(GlobalVariable::new("n", AddressSpace::Private, u32_ty));
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::compute(1, 1, 1));
        main.body = vec![
            Statement::store(
                Expression::GlobalVariable(out),
                query(TextureFn::NumLevels, t),
            ),
            Statement::store(
                Expression::GlobalVariable(out),
                query(TextureFn::NumSamples, ms),
            ),
            Statement::store(
                Expression::GlobalVariable(out),
                query(TextureFn::NumLevels, t),
            ),
        ];
        module.functions.append(main);

        let mut inputs = DataMap::new();
        assert!(!TextureBuiltinsFromUniform.should_run(&module, &inputs));
        inputs.insert(TextureBuiltinsFromUniformConfig {
            ubo_binding: BindingPoint::new(0, 30),
        });
        assert!(TextureBuiltinsFromUniform.should_run(&module, &inputs));

        let mut outputs = DataMap::new();
        let result = TextureBuiltinsFromUniform
            .apply(&module, &inputs, &mut outputs)
            .unwrap();
        tinct_ir::validate(&result).unwrap();
        let text = dump_module(&result);
        assert!(text.contains("@offset(0) texture_builtin_value_0: u32,"), "{text}");
        assert!(text.contains("@offset(4) texture_builtin_value_1: u32,"), "{text}");
        assert!(
            text.contains("@group(0) @binding(30) var<uniform> tint_texture_builtins: TintTextureUniformData;"),
            "{text}"
        );
        assert!(text.contains("n = tint_texture_builtins.texture_builtin_value_1;"), "{text}");
        assert!(!text.contains("textureNumLevels"), "{text}");

        let data = outputs.get::<TextureBuiltinsFromUniformResult>().unwrap();
        assert_eq!(
            data.slots,
            vec![
                TextureBuiltinSlot {
                    texture: BindingPoint::new(0, 2),
                    query: TextureFn::NumLevels,
                },
                TextureBuiltinSlot {
                    texture: BindingPoint::new(1, 0),
                    query: TextureFn::NumSamples,
                },
            ]
        );
        assert!(!TextureBuiltinsFromUniform.should_run(&result, &inputs));
    }
}
