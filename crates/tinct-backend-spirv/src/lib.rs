//! SPIR-V backend for tinct.
//!
//! Sanitizes tinct IR for Vulkan (entry-point IO as `Input`/`Output`
//! variables, buffers wrapped in `Block` structs, no pointer parameters)
//! and builds a SPIR-V binary module with `rspirv`.

mod builder;
mod sanitize;

pub use builder::Error;
pub use sanitize::{SanitizedResult, sanitize};

use log::debug;
use tinct_backend_core::{
    Backend, BackendError, BackendOptions, BackendOutput, CommonOptions, Diagnostic,
    DiagnosticLevel,
};
use tinct_ir::{Module, ShaderStage};
use tinct_transform::DataMap;

/// SPIR-V generation options.
#[derive(Clone, Debug)]
pub struct Options {
    pub common: CommonOptions,
    /// Write `PointSize` (as 1.0) from vertex shaders.
    pub emit_vertex_point_size: bool,
    /// Leave texture coordinates and levels unclamped even when
    /// robustness is on.
    pub disable_image_robustness: bool,
    /// Zero workgroup memory with `SPV_KHR_zero_initialize_workgroup_memory`
    /// initializers instead of generated stores.
    pub use_zero_initialize_workgroup_memory_extension: bool,
    /// SPIR-V version as `(major, minor)`.
    pub version: (u8, u8),
}

impl Default for Options {
    fn default() -> Self {
        Self {
            common: CommonOptions::default(),
            emit_vertex_point_size: false,
            disable_image_robustness: false,
            use_zero_initialize_workgroup_memory_extension: false,
            version: (1, 3),
        }
    }
}

/// The result of generating SPIR-V for a module.
#[derive(Debug)]
pub struct SpirvOutput {
    pub words: Vec<u32>,
    /// Entry points in the output, with their stages.
    pub entry_points: Vec<(String, ShaderStage)>,
    /// Data published by the sanitizer passes.
    pub data: DataMap,
    /// The module that was lowered.
    pub sanitized: Module,
}

impl SpirvOutput {
    /// The module as little-endian bytes, as stored in `.spv` files.
    pub fn bytes(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }
}

/// Sanitizes `module` and lowers it to SPIR-V.
pub fn generate(module: &Module, options: &Options) -> Result<SpirvOutput, BackendError> {
    let SanitizedResult {
        module: sanitized,
        data,
    } = sanitize(module, options)?;
    let words = builder::Writer::new(&sanitized, options).write()?;
    let entry_points = sanitized
        .entry_points()
        .filter_map(|(_, f)| f.stage().map(|stage| (f.name.clone(), stage)))
        .collect();
    Ok(SpirvOutput {
        words,
        entry_points,
        data,
        sanitized,
    })
}

/// SPIR-V backend.
#[derive(Debug)]
pub struct SpirvBackend;

impl Backend for SpirvBackend {
    fn name(&self) -> &str {
        "SPIR-V"
    }

    fn targets(&self) -> &[&str] {
        &["spirv", "spv"]
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
            "SPIR-V: {} entry point(s), {} words",
            generated.entry_points.len(),
            generated.words.len()
        );
        let mut output = BackendOutput::binary("shader.spv", generated.bytes())
            .with_ir(&generated.sanitized, opts);
        for (name, stage) in &generated.entry_points {
            output.diagnostics.push(Diagnostic {
                level: DiagnosticLevel::Info,
                message: format!("entry point '{name}': {stage:?} shader"),
            });
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_targets() {
        assert_eq!(SpirvBackend.targets(), ["spirv", "spv"]);
        assert_eq!(SpirvBackend.name(), "SPIR-V");
    }

    #[test]
    fn bytes_are_little_endian() {
        let output = SpirvOutput {
            words: vec![0x0723_0203, 1],
            entry_points: Vec::new(),
            data: DataMap::new(),
            sanitized: Module::default(),
        };
        assert_eq!(output.bytes(), [0x03, 0x02, 0x23, 0x07, 1, 0, 0, 0]);
    }

    #[test]
    fn empty_module_gets_a_placeholder_entry_point() {
        let generated = generate(&Module::default(), &Options::default()).unwrap();
        assert_eq!(generated.words[0], 0x0723_0203);
        assert_eq!(generated.entry_points.len(), 1);
        assert_eq!(generated.entry_points[0].1, ShaderStage::Compute);
    }
}
