//! MSL backend for tinct.
//!
//! Sanitizes tinct IR for Metal (builtin parameters and a `[[stage_in]]`
//! struct, module-scope variables passed as parameters, runtime array
//! lengths read from a uniform buffer) and prints Metal Shading Language
//! 2.1 source.

mod module_scope_vars;
mod sanitize;
mod writer;

pub use module_scope_vars::ModuleScopeVarToEntryPointParam;
pub use sanitize::{SanitizedResult, sanitize};
pub use writer::print;

use std::collections::{BTreeSet, HashMap};

use log::debug;
use tinct_backend_core::{
    Backend, BackendError, BackendOptions, BackendOutput, CommonOptions, Diagnostic,
    DiagnosticLevel,
};
use tinct_ir::{AddressSpace, ArraySize, BindingPoint, Module, ShaderStage, TypeInner};
use tinct_transform::{ArrayLengthFromUniformConfig, ArrayLengthFromUniformResult, DataMap};

/// MSL generation options.
#[derive(Clone, Debug)]
pub struct Options {
    pub common: CommonOptions,
    /// Sample mask ANDed into every fragment shader's output.
    /// `u32::MAX` leaves the mask alone.
    pub fixed_sample_mask: u32,
    /// Write `[[point_size]]` from vertex shaders. Metal requires it when
    /// drawing points.
    pub emit_vertex_point_size: bool,
    /// `[[buffer(n)]]` slot of the generated buffer-size uniform.
    pub buffer_size_ubo_index: u32,
    /// Where `arrayLength` reads buffer sizes from. `None` assigns each
    /// storage buffer with a runtime-sized array its binding number as
    /// size index, with the sizes in [`Self::buffer_size_ubo_index`].
    pub array_length_from_uniform: Option<ArrayLengthFromUniformConfig>,
    /// Print integer `/` and `%` as-is instead of calling the
    /// trap-free helpers.
    pub disable_polyfill_integer_div_mod: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            common: CommonOptions::default(),
            fixed_sample_mask: u32::MAX,
            emit_vertex_point_size: false,
            buffer_size_ubo_index: 30,
            array_length_from_uniform: None,
            disable_polyfill_integer_div_mod: false,
        }
    }
}

/// The result of generating MSL for a module.
#[derive(Debug)]
pub struct MslOutput {
    pub msl: String,
    /// Entry points in the output, with their stages.
    pub entry_points: Vec<(String, ShaderStage)>,
    /// Threadgroup size of each compute entry point. Metal takes it from
    /// the dispatch call rather than the source.
    pub workgroup_sizes: HashMap<String, [u32; 3]>,
    /// Size indices of the buffer-size uniform the shader reads.
    pub used_array_length_indices: BTreeSet<u32>,
    /// Data published by the sanitizer passes.
    pub data: DataMap,
    /// The module that was printed.
    pub sanitized: Module,
}

/// Size indices for every storage buffer that ends in a runtime-sized
/// array, keyed by the binding point it has after remapping.
fn default_array_length_config(module: &Module, options: &Options) -> ArrayLengthFromUniformConfig {
    let remap = &options.common.binding_remapper.binding_points;
    let mut bindpoint_to_size_index = HashMap::new();
    for (_, g) in module.global_variables.iter() {
        if g.space != AddressSpace::Storage {
            continue;
        }
        let Some(binding) = g.binding else { continue };
        let last = match module.types[g.ty].inner {
            TypeInner::Struct { ref members, .. } => members.last().map(|m| m.ty),
            _ => Some(g.ty),
        };
        let runtime_sized = last.is_some_and(|ty| {
            matches!(
                module.types[ty].inner,
                TypeInner::Array {
                    size: ArraySize::Runtime,
                    ..
                }
            )
        });
        if runtime_sized {
            let binding = remap.get(&binding).copied().unwrap_or(binding);
            bindpoint_to_size_index.insert(binding, binding.binding);
        }
    }
    ArrayLengthFromUniformConfig {
        ubo_binding: BindingPoint::new(0, options.buffer_size_ubo_index),
        bindpoint_to_size_index,
    }
}

/// Sanitizes `module` and prints it as MSL.
pub fn generate(module: &Module, options: &Options) -> Result<MslOutput, BackendError> {
    let alfu = match &options.array_length_from_uniform {
        Some(cfg) => cfg.clone(),
        None => default_array_length_config(module, options),
    };
    let SanitizedResult {
        module: sanitized,
        data,
    } = sanitize(module, options, &alfu)?;
    let msl = print(&sanitized)?;
    let mut entry_points = Vec::new();
    let mut workgroup_sizes = HashMap::new();
    for (_, f) in sanitized.entry_points() {
        let Some(ep) = &f.entry_point else { continue };
        entry_points.push((f.name.clone(), ep.stage));
        if ep.stage == ShaderStage::Compute {
            let size = ep.literal_workgroup_size().ok_or_else(|| {
                BackendError::Unsupported(format!(
                    "workgroup size of '{}' set by an override that was not substituted",
                    f.name
                ))
            })?;
            workgroup_sizes.insert(f.name.clone(), size);
        }
    }
    let used_array_length_indices = data
        .get::<ArrayLengthFromUniformResult>()
        .map(|r| r.used_size_indices.clone())
        .unwrap_or_default();
    Ok(MslOutput {
        msl,
        entry_points,
        workgroup_sizes,
        used_array_length_indices,
        data,
        sanitized,
    })
}

/// MSL backend.
#[derive(Debug)]
pub struct MslBackend;

impl Backend for MslBackend {
    fn name(&self) -> &str {
        "MSL"
    }

    fn targets(&self) -> &[&str] {
        &["msl"]
    }

    fn compile(
        &self,
        module: &Module,
        opts: &BackendOptions,
    ) -> Result<BackendOutput, BackendError> {
        let options = Options {
            common: opts.common.clone(),
            ..Options::default()
        };
        let generated = generate(module, &options)?;
        debug!(
            "MSL: {} entry point(s), {} bytes",
            generated.entry_points.len(),
            generated.msl.len()
        );
        let mut output = BackendOutput::text("shader.metal", generated.msl)
            .with_ir(&generated.sanitized, opts);
        for (name, stage) in &generated.entry_points {
            let message = match generated.workgroup_sizes.get(name) {
                Some([x, y, z]) => {
                    format!("entry point '{name}': {stage:?} shader, threadgroup size ({x}, {y}, {z})")
                }
                None => format!("entry point '{name}': {stage:?} shader"),
            };
            output.diagnostics.push(Diagnostic {
                level: DiagnosticLevel::Info,
                message,
            });
        }
        if !generated.used_array_length_indices.is_empty() {
            output.diagnostics.push(Diagnostic {
                level: DiagnosticLevel::Info,
                message: format!(
                    "buffer sizes are read from [[buffer({})]] at indices {:?}",
                    options.buffer_size_ubo_index, generated.used_array_length_indices
                ),
            });
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{GlobalVariable, Scalar, StorageAccess};

    #[test]
    fn backend_targets() {
        assert_eq!(MslBackend.targets(), ["msl"]);
        assert_eq!(MslBackend.name(), "MSL");
    }

    #[test]
    fn runtime_sized_buffers_get_size_indices() {
        let mut module = Module::default();
        let f32_ty = module.scalar_type(Scalar::F32);
        let runtime = module.runtime_array_type(f32_ty);
        let wrapped = module.struct_type("Data", &[("count", f32_ty), ("items", runtime)]);
        module.global_variables.append(
            GlobalVariable::new("data", AddressSpace::Storage, wrapped)
                .with_binding(0, 3)
                .with_access(StorageAccess::LOAD_STORE),
        );
        module.global_variables.append(
            GlobalVariable::new("flat", AddressSpace::Storage, runtime).with_binding(1, 5),
        );
        module
            .global_variables
            .append(GlobalVariable::new("one", AddressSpace::Storage, f32_ty).with_binding(0, 4));

        let mut options = Options::default();
        options
            .common
            .binding_remapper
            .binding_points
            .insert(BindingPoint::new(1, 5), BindingPoint::new(2, 7));
        let cfg = default_array_length_config(&module, &options);
        assert_eq!(cfg.ubo_binding, BindingPoint::new(0, 30));
        assert_eq!(cfg.bindpoint_to_size_index.len(), 2);
        assert_eq!(cfg.bindpoint_to_size_index[&BindingPoint::new(0, 3)], 3);
        assert_eq!(cfg.bindpoint_to_size_index[&BindingPoint::new(2, 7)], 7);
    }
}
