//! GLSL backend for tinct.
//!
//! Sanitizes tinct IR for GLSL (combined samplers, `gl_*` builtins, block
//! interface layout, explicit struct padding) and prints GLSL ES or
//! desktop GLSL source, one file per entry point.

mod combine_samplers;
mod pad_structs;
mod sanitize;
mod texture_1d_to_2d;
mod texture_builtins_from_uniform;
mod writer;

pub use combine_samplers::{CombineSamplers, CombinedSampler, CombinedSamplers};
pub use pad_structs::PadStructs;
pub use sanitize::{SanitizedResult, sanitize};
pub use texture_1d_to_2d::Texture1DTo2D;
pub use texture_builtins_from_uniform::{
    TextureBuiltinSlot, TextureBuiltinsFromUniform, TextureBuiltinsFromUniformConfig,
    TextureBuiltinsFromUniformResult,
};
pub use writer::print;

use log::debug;
use tinct_backend_core::{
    Backend, BackendError, BackendOptions, BackendOutput, CommonOptions, Diagnostic,
    DiagnosticLevel, GlslVersion, OutputContent, OutputFile,
};
use tinct_ir::{Module, ShaderStage};
use tinct_transform::DataMap;

/// Push-constant byte offsets of the depth range used to clamp
/// `frag_depth`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DepthRangeOffsets {
    pub min: u32,
    pub max: u32,
}

/// GLSL generation options.
#[derive(Clone, Debug)]
pub struct Options {
    pub common: CommonOptions,
    pub version: GlslVersion,
    /// Push-constant offset of the first vertex, added to `vertex_index`.
    pub first_vertex_offset: Option<u32>,
    /// Push-constant offset of the first instance, added to
    /// `instance_index`.
    pub first_instance_offset: Option<u32>,
    pub depth_range_offsets: Option<DepthRangeOffsets>,
    /// Print integer `/` and `%` as-is instead of calling the
    /// trap-free helpers.
    pub disable_polyfill_integer_div_mod: bool,
    /// Read `textureNumLevels` and `textureNumSamples` from a uniform
    /// buffer instead of querying the texture.
    pub texture_builtins_from_uniform: Option<TextureBuiltinsFromUniformConfig>,
    /// Print push constants as a plain `uniform` struct rather than a
    /// `layout(push_constant)` block.
    pub use_uniform_push_constants: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            common: CommonOptions::default(),
            version: GlslVersion::default(),
            first_vertex_offset: None,
            first_instance_offset: None,
            depth_range_offsets: None,
            disable_polyfill_integer_div_mod: false,
            texture_builtins_from_uniform: None,
            use_uniform_push_constants: true,
        }
    }
}

/// The result of generating GLSL for one entry point.
#[derive(Debug)]
pub struct GlslOutput {
    pub glsl: String,
    /// Name of the entry point in the input module.
    pub entry_point: String,
    pub stage: ShaderStage,
    /// Data published by the sanitizer passes.
    pub data: DataMap,
    /// The module that was printed.
    pub sanitized: Module,
}

/// Sanitizes `module` and prints it as GLSL.
///
/// GLSL has a single `main` per shader, so the module must hold exactly
/// one entry point after [`CommonOptions::entry_point`] selection. A
/// module without entry points gets an empty compute shader.
pub fn generate(module: &Module, options: &Options) -> Result<GlslOutput, BackendError> {
    let entry_points = module.entry_points().count();
    if options.common.entry_point.is_none() && entry_points > 1 {
        return Err(BackendError::Unsupported(format!(
            "GLSL output holds one entry point but the module has {entry_points}; select one"
        )));
    }
    // The renamer may touch the entry point, so name it from the input.
    let entry_point = match &options.common.entry_point {
        Some(name) => name.clone(),
        None => module
            .entry_points()
            .next()
            .map(|(_, f)| f.name.clone())
            .unwrap_or_else(|| "unused_entry_point".to_string()),
    };
    let SanitizedResult { module: sanitized, data } = sanitize(module, options)?;
    let glsl = print(&sanitized, options)?;
    let stage = sanitized
        .entry_points()
        .next()
        .and_then(|(_, f)| f.stage())
        .ok_or_else(|| BackendError::Ice("sanitized module has no entry point".into()))?;
    Ok(GlslOutput {
        glsl,
        entry_point,
        stage,
        data,
        sanitized,
    })
}

/// File extension conventionally used for a stage.
pub fn stage_extension(stage: ShaderStage) -> &'static str {
    match stage {
        ShaderStage::Vertex => "vert",
        ShaderStage::Fragment => "frag",
        ShaderStage::Compute => "comp",
    }
}

/// GLSL backend, registered once for ES and once for desktop GLSL.
#[derive(Debug)]
pub struct GlslBackend {
    es: bool,
}

impl GlslBackend {
    /// GLSL ES, `#version 310 es` unless overridden.
    pub fn es() -> Self {
        Self { es: true }
    }

    /// Desktop GLSL, `#version 450` unless overridden.
    pub fn desktop() -> Self {
        Self { es: false }
    }

    fn options(&self, opts: &BackendOptions) -> Options {
        let version = match opts.glsl_version {
            Some(number) => GlslVersion::from_number(number, self.es),
            None if self.es => GlslVersion::ES_310,
            None => GlslVersion::DESKTOP_450,
        };
        Options {
            common: opts.common.clone(),
            version,
            ..Options::default()
        }
    }
}

impl Backend for GlslBackend {
    fn name(&self) -> &str {
        if self.es { "GLSL ES" } else { "GLSL" }
    }

    fn targets(&self) -> &[&str] {
        if self.es { &["glsl-es"] } else { &["glsl"] }
    }

    fn compile(
        &self,
        module: &Module,
        opts: &BackendOptions,
    ) -> Result<BackendOutput, BackendError> {
        let base = self.options(opts);
        let selected: Vec<Option<String>> = match &base.common.entry_point {
            Some(name) => vec![Some(name.clone())],
            None if module.entry_points().next().is_none() => vec![None],
            None => module.entry_points().map(|(_, f)| Some(f.name.clone())).collect(),
        };

        let mut output = BackendOutput::default();
        let mut dumps = Vec::new();
        for entry_point in selected {
            let mut options = base.clone();
            options.common.entry_point = entry_point;
            let generated = generate(module, &options)?;
            debug!(
                "{}: entry point '{}' printed ({} bytes)",
                self.name(),
                generated.entry_point,
                generated.glsl.len()
            );
            output.diagnostics.push(Diagnostic {
                level: DiagnosticLevel::Info,
                message: format!(
                    "entry point '{}': {:?} shader, {}",
                    generated.entry_point, generated.stage, options.version
                ),
            });
            if opts.emit_ir {
                dumps.push(tinct_ir::dump_module(&generated.sanitized));
            }
            output.files.push(OutputFile {
                name: format!(
                    "{}.{}",
                    generated.entry_point,
                    stage_extension(generated.stage)
                ),
                content: OutputContent::Text(generated.glsl),
            });
        }
        if opts.emit_ir {
            output.sanitized_ir = Some(dumps.join("\n"));
        }
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn backend_targets() {
        assert_eq!(GlslBackend::es().targets(), ["glsl-es"]);
        assert_eq!(GlslBackend::desktop().targets(), ["glsl"]);
        assert_eq!(GlslBackend::desktop().name(), "GLSL");
    }

    #[test]
    fn version_follows_dialect() {
        let opts = BackendOptions::default();
        assert_eq!(GlslBackend::es().options(&opts).version, GlslVersion::ES_310);
        assert_eq!(
            GlslBackend::desktop().options(&opts).version,
            GlslVersion::DESKTOP_450
        );
        let opts = BackendOptions {
            glsl_version: Some(300),
            ..BackendOptions::default()
        };
        assert_eq!(
            GlslBackend::es().options(&opts).version,
            GlslVersion::from_number(300, true)
        );
    }

    #[test]
    fn empty_module_gets_an_unused_compute_shader() {
        let output = GlslBackend::es()
            .compile(&Module::default(), &BackendOptions::default())
            .unwrap();
        assert_eq!(output.files.len(), 1);
        assert_eq!(output.files[0].name, "unused_entry_point.comp");
        match &output.files[0].content {
            OutputContent::Text(text) => {
                assert!(text.starts_with("#version 310 es\n"), "{text}");
                assert!(text.contains("void main() {"), "{text}");
            }
            OutputContent::Binary(_) => panic!("expected text"),
        }
    }

    #[test]
    fn several_entry_points_need_a_selection() {
        let mut module = Module::default();
        for name in ["a", "b"] {
            let mut f = tinct_ir::Function::new(name);
            f.entry_point = Some(tinct_ir::EntryPoint::compute(1, 1, 1));
            module.functions.append(f);
        }
        let err = generate(&module, &Options::default()).unwrap_err();
        assert!(matches!(err, BackendError::Unsupported(_)));
        let output = GlslBackend::desktop()
            .compile(&module, &BackendOptions::default())
            .unwrap();
        let names: Vec<_> = output.files.iter().map(|f| f.name.as_str()).collect();
        assert_eq!(names, ["a.comp", "b.comp"]);
    }
}
