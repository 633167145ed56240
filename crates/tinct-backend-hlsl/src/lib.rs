//! HLSL backend for tinct.
//!
//! Sanitizes tinct IR for HLSL (struct entry-point IO, the dispatch size
//! read from a uniform, no pointer parameters into buffers) and prints
//! HLSL for Shader Model 5.1 and later. Storage buffers become
//! `ByteAddressBuffer`s and uniform buffers `uint4` arrays in a `cbuffer`;
//! both are read and written through generated, memoized helpers.

mod buffer;
mod sanitize;
mod writer;

pub use sanitize::{SanitizedResult, sanitize};
pub use writer::print;

use std::collections::BTreeSet;

use log::debug;
use tinct_backend_core::{
    Backend, BackendError, BackendOptions, BackendOutput, CommonOptions, Diagnostic,
    DiagnosticLevel,
};
use tinct_ir::{BindingPoint, Module, ShaderStage};
use tinct_transform::{ArrayLengthFromUniformConfig, ArrayLengthFromUniformResult, DataMap};

/// HLSL generation options.
#[derive(Clone, Debug, Default)]
pub struct Options {
    pub common: CommonOptions,
    /// Register of the `cbuffer` holding the dispatch size for
    /// `num_workgroups`. Defaults to the next free binding of group 0.
    pub root_constant_binding_point: Option<BindingPoint>,
    /// Compute `arrayLength` from sizes in a uniform buffer instead of
    /// querying the buffer.
    pub array_length_from_uniform: Option<ArrayLengthFromUniformConfig>,
    /// Print integer `/` and `%` as-is instead of calling the
    /// trap-free helpers.
    pub disable_polyfill_integer_div_mod: bool,
}

/// The result of generating HLSL for a module.
#[derive(Debug)]
pub struct HlslOutput {
    pub hlsl: String,
    /// Entry points in the output, with their stages.
    pub entry_points: Vec<(String, ShaderStage)>,
    /// Size indices of the array-length uniform the shader reads.
    pub used_array_length_indices: BTreeSet<u32>,
    /// Data published by the sanitizer passes.
    pub data: DataMap,
    /// The module that was printed.
    pub sanitized: Module,
}

/// Sanitizes `module` and prints it as HLSL.
pub fn generate(module: &Module, options: &Options) -> Result<HlslOutput, BackendError> {
    let SanitizedResult {
        module: sanitized,
        data,
    } = sanitize(module, options)?;
    let hlsl = print(&sanitized, options)?;
    let entry_points = sanitized
        .entry_points()
        .filter_map(|(_, f)| Some((f.name.clone(), f.stage()?)))
        .collect();
    let used_array_length_indices = data
        .get::<ArrayLengthFromUniformResult>()
        .map(|r| r.used_size_indices.clone())
        .unwrap_or_default();
    Ok(HlslOutput {
        hlsl,
        entry_points,
        used_array_length_indices,
        data,
        sanitized,
    })
}

/// HLSL backend.
#[derive(Debug)]
pub struct HlslBackend;

impl Backend for HlslBackend {
    fn name(&self) -> &str {
        "HLSL"
    }

    fn targets(&self) -> &[&str] {
        &["hlsl"]
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
            "HLSL: {} entry point(s), {} bytes",
            generated.entry_points.len(),
            generated.hlsl.len()
        );
        let mut output = BackendOutput::text("shader.hlsl", generated.hlsl)
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
    use tinct_backend_core::OutputContent;

    #[test]
    fn backend_targets() {
        assert_eq!(HlslBackend.targets(), ["hlsl"]);
        assert_eq!(HlslBackend.name(), "HLSL");
    }

    #[test]
    fn empty_module_gets_an_unused_entry_point() {
        let output = HlslBackend
            .compile(&Module::default(), &BackendOptions::default())
            .unwrap();
        assert_eq!(output.files.len(), 1);
        assert_eq!(output.files[0].name, "shader.hlsl");
        match &output.files[0].content {
            OutputContent::Text(text) => {
                assert!(text.contains("[numthreads(1, 1, 1)]"), "{text}");
                assert!(text.contains("void unused_entry_point() {"), "{text}");
            }
            OutputContent::Binary(_) => panic!("expected text"),
        }
    }
}
