//! WGSL front end for tinct.
//!
//! Parses WGSL source text with [naga](https://crates.io/crates/naga)'s
//! WGSL frontend and lowers the resulting `naga::Module` into a
//! [`tinct_ir::Module`]: naga's expression DAG becomes owned trees, `let`
//! bindings and call results become `let` locals, and constants are inlined.

mod lower;

/// Parse WGSL source into a tinct IR module.
///
/// The module is not validated; callers run [`tinct_ir::validate`] when
/// they need the guarantee.
pub fn parse(source: &str) -> Result<tinct_ir::Module, ParseError> {
    let naga_module = naga::front::wgsl::parse_str(source)?;
    lower::lower_module(&naga_module)
}

#[derive(Debug, thiserror::Error)]
pub enum ParseError {
    #[error(transparent)]
    Wgsl(#[from] naga::front::wgsl::ParseError),
    #[error("unsupported: {0}")]
    Unsupported(String),
    #[error("lowering: {0}")]
    Lowering(String),
    #[error("lowering produced an untypable expression: {0}")]
    Ir(#[from] tinct_ir::IrError),
}

impl ParseError {
    /// Renders the error with source context when naga has span
    /// information for it.
    pub fn render(&self, source: &str) -> String {
        match self {
            Self::Wgsl(e) => e.emit_to_string(source),
            other => other.to_string(),
        }
    }
}
