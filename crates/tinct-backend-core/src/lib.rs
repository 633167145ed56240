#![warn(missing_docs)]
//! Backend trait and shared plumbing for tinct code generators.
//!
//! Defines the [`Backend`] trait that every target implements, the options
//! shared by all targets ([`CommonOptions`], [`BackendOptions`]), the
//! output types ([`BackendOutput`], [`OutputContent`]), a
//! [`BackendRegistry`] for CLI dispatch, and the text emission helpers
//! ([`TextBuffer`], [`Namer`]) used by the source printers.

mod error;
mod namer;
mod options;
mod text;

pub use error::BackendError;
pub use namer::Namer;
pub use options::{BackendOptions, CommonOptions, GlslVersion};
pub use text::TextBuffer;

use std::fmt::{self, Debug};

use tinct_ir::Module;

/// A backend that compiles tinct IR to target-specific output.
pub trait Backend: Debug + Send + Sync {
    /// Human-readable name (e.g. "GLSL").
    fn name(&self) -> &str;

    /// Target identifiers this backend handles (for `--target` dispatch).
    fn targets(&self) -> &[&str];

    /// Sanitizes `module` for the target and prints it.
    fn compile(&self, module: &Module, opts: &BackendOptions)
    -> Result<BackendOutput, BackendError>;
}

/// The output produced by a backend.
#[derive(Clone, Debug, Default)]
pub struct BackendOutput {
    /// One or more output files.
    pub files: Vec<OutputFile>,
    /// Non-fatal diagnostics.
    pub diagnostics: Vec<Diagnostic>,
    /// Text dump of the sanitized module, when
    /// [`BackendOptions::emit_ir`] is set.
    pub sanitized_ir: Option<String>,
}

impl BackendOutput {
    /// Output holding a single text file.
    pub fn text(name: impl Into<String>, text: String) -> Self {
        Self {
            files: vec![OutputFile {
                name: name.into(),
                content: OutputContent::Text(text),
            }],
            ..Self::default()
        }
    }

    /// Output holding a single binary file.
    pub fn binary(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            files: vec![OutputFile {
                name: name.into(),
                content: OutputContent::Binary(bytes),
            }],
            ..Self::default()
        }
    }

    /// Attaches a dump of `module` if `opts` asks for one.
    pub fn with_ir(mut self, module: &Module, opts: &BackendOptions) -> Self {
        if opts.emit_ir {
            self.sanitized_ir = Some(tinct_ir::dump_module(module));
        }
        self
    }
}

impl fmt::Display for BackendOutput {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} file(s), {} diagnostic(s)",
            self.files.len(),
            self.diagnostics.len()
        )
    }
}

/// A single output file.
#[derive(Clone, Debug)]
pub struct OutputFile {
    /// Suggested filename (e.g. "shader.glsl", "shader.spv").
    pub name: String,
    /// The file content.
    pub content: OutputContent,
}

impl fmt::Display for OutputFile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Content of an output file.
#[derive(Clone, Debug)]
pub enum OutputContent {
    /// UTF-8 text.
    Text(String),
    /// Raw binary data.
    Binary(Vec<u8>),
}

impl fmt::Display for OutputContent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Text(s) => write!(f, "Text({} chars)", s.len()),
            Self::Binary(b) => write!(f, "Binary({} bytes)", b.len()),
        }
    }
}

/// A non-fatal diagnostic message from a backend.
#[derive(Clone, Debug)]
pub struct Diagnostic {
    /// Severity level.
    pub level: DiagnosticLevel,
    /// Human-readable message.
    pub message: String,
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}] {}", self.level, self.message)
    }
}

/// Severity level for diagnostics.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiagnosticLevel {
    /// A warning that does not prevent compilation.
    Warning,
    /// An informational note.
    Info,
}

impl fmt::Display for DiagnosticLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Warning => "Warning",
            Self::Info => "Info",
        })
    }
}

/// Formats a finite float so that it always reads back as a float
/// (`1.0`, `0.5`, `1e-10`). Returns `None` for NaN and infinities, which
/// each target spells differently.
pub fn float_text(value: f64) -> Option<String> {
    if !value.is_finite() {
        return None;
    }
    let text = format!("{value:?}");
    Some(if text.contains(['.', 'e', 'E']) {
        text
    } else {
        format!("{text}.0")
    })
}

/// [`float_text`] for an `f32`, using the shortest text that reads back
/// as the same `f32` (`0.1` rather than `0.10000000149011612`).
pub fn f32_text(value: f32) -> Option<String> {
    if !value.is_finite() {
        return None;
    }
    let text = format!("{value:?}");
    Some(if text.contains(['.', 'e', 'E']) {
        text
    } else {
        format!("{text}.0")
    })
}

/// Registry of available backends, used for CLI `--target` dispatch.
pub struct BackendRegistry {
    backends: Vec<Box<dyn Backend>>,
}

impl Default for BackendRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl BackendRegistry {
    /// Creates an empty registry.
    pub fn new() -> Self {
        Self {
            backends: Vec::new(),
        }
    }

    /// Creates a registry pre-populated with built-in backends.
    pub fn with_builtins() -> Self {
        let mut reg = Self::new();
        reg.register(Box::new(IrDumpBackend));
        reg
    }

    /// Registers a backend.
    pub fn register(&mut self, backend: Box<dyn Backend>) {
        self.backends.push(backend);
    }

    /// Finds a backend that handles the given target identifier.
    pub fn find(&self, target: &str) -> Option<&dyn Backend> {
        self.backends
            .iter()
            .find(|b| b.targets().contains(&target))
            .map(|b| &**b)
    }

    /// Lists all supported target identifiers.
    pub fn list_targets(&self) -> Vec<&str> {
        self.backends
            .iter()
            .flat_map(|b| b.targets().iter().copied())
            .collect()
    }
}

/// Built-in backend that dumps the unsanitized IR using
/// [`tinct_ir::dump_module`].
#[derive(Debug)]
pub struct IrDumpBackend;

impl Backend for IrDumpBackend {
    fn name(&self) -> &str {
        "IR Dump"
    }

    fn targets(&self) -> &[&str] {
        &["ir-dump", "wgsl-ir"]
    }

    fn compile(
        &self,
        module: &Module,
        _opts: &BackendOptions,
    ) -> Result<BackendOutput, BackendError> {
        Ok(BackendOutput::text(
            "module.ir",
            tinct_ir::dump_module(module),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ir_dump_backend_targets() {
        let backend = IrDumpBackend;
        assert_eq!(backend.name(), "IR Dump");
        assert!(backend.targets().contains(&"ir-dump"));
        assert!(backend.targets().contains(&"wgsl-ir"));
    }

    #[test]
    fn ir_dump_backend_compile() {
        let mut module = Module::default();
        module.functions.append(tinct_ir::Function::new("helper"));
        let output = IrDumpBackend
            .compile(&module, &BackendOptions::default())
            .unwrap();
        assert_eq!(output.files.len(), 1);
        assert_eq!(output.files[0].name, "module.ir");
        match &output.files[0].content {
            OutputContent::Text(text) => assert!(text.contains("fn helper()")),
            _ => panic!("expected text output"),
        }
        assert!(output.sanitized_ir.is_none());
    }

    #[test]
    fn registry_find_builtin() {
        let reg = BackendRegistry::with_builtins();
        assert!(reg.find("ir-dump").is_some());
        assert!(reg.find("wgsl-ir").is_some());
        assert!(reg.find("nonexistent").is_none());
    }

    #[test]
    fn registry_custom_backend() {
        #[derive(Debug)]
        struct TestBackend;
        impl Backend for TestBackend {
            fn name(&self) -> &str {
                "test"
            }
            fn targets(&self) -> &[&str] {
                &["test-target"]
            }
            fn compile(
                &self,
                _module: &Module,
                _opts: &BackendOptions,
            ) -> Result<BackendOutput, BackendError> {
                Ok(BackendOutput::default())
            }
        }

        let mut reg = BackendRegistry::new();
        reg.register(Box::new(TestBackend));
        assert!(reg.find("test-target").is_some());
        assert_eq!(reg.list_targets(), ["test-target"]);
    }

    #[test]
    fn registry_default_is_empty() {
        assert!(BackendRegistry::default().list_targets().is_empty());
    }

    #[test]
    fn emit_ir_attaches_a_dump() {
        let module = Module::default();
        let opts = BackendOptions {
            emit_ir: true,
            ..BackendOptions::default()
        };
        let out = BackendOutput::text("a", String::new()).with_ir(&module, &opts);
        assert!(out.sanitized_ir.is_some());
    }

    #[test]
    fn display_backend_output() {
        let output = BackendOutput {
            files: vec![
                OutputFile {
                    name: "a.spv".into(),
                    content: OutputContent::Binary(vec![1, 2, 3]),
                },
                OutputFile {
                    name: "b.glsl".into(),
                    content: OutputContent::Text("hello".into()),
                },
            ],
            diagnostics: vec![Diagnostic {
                level: DiagnosticLevel::Info,
                message: "done".into(),
            }],
            sanitized_ir: None,
        };
        assert_eq!(format!("{output}"), "2 file(s), 1 diagnostic(s)");
        assert_eq!(format!("{}", output.files[0]), "a.spv");
        assert_eq!(format!("{}", output.files[0].content), "Binary(3 bytes)");
        assert_eq!(format!("{}", output.diagnostics[0]), "[Info] done");
    }

    #[test]
    fn float_text_always_reads_as_float() {
        assert_eq!(float_text(1.0).as_deref(), Some("1.0"));
        assert_eq!(float_text(0.5).as_deref(), Some("0.5"));
        assert_eq!(float_text(-2.0).as_deref(), Some("-2.0"));
        assert_eq!(float_text(1e-10).as_deref(), Some("1e-10"));
        assert_eq!(float_text(f64::NAN), None);
        assert_eq!(float_text(f64::INFINITY), None);
        assert_eq!(f32_text(0.1).as_deref(), Some("0.1"));
        assert_eq!(f32_text(3.0).as_deref(), Some("3.0"));
        assert_eq!(f32_text(f32::NEG_INFINITY), None);
    }
}
