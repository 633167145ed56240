use tinct_backend_core::{Backend, BackendError, BackendOptions, BackendOutput, OutputContent};
#[allow(unused_imports)]
use tinct_ir::Module;

/// Every code-generating backend, as the CLI registers them.
#[allow(dead_code)]
pub fn all_backends() -> Vec<Box<dyn Backend>> {
    vec![
        Box::new(tinct_backend_glsl::GlslBackend::desktop()),
        Box::new(tinct_backend_glsl::GlslBackend::es()),
        Box::new(tinct_backend_hlsl::HlslBackend),
        Box::new(tinct_backend_msl::MslBackend),
        Box::new(tinct_backend_spirv::SpirvBackend),
    ]
}

/// Parse and validate WGSL source.
#[allow(dead_code)]
pub fn parse(source: &str) -> Module {
    let module = tinct_parser::parse(source).expect("WGSL parse failed");
    tinct_ir::validate(&module).expect("parsed module should validate");
    module
}

/// Parse WGSL source and compile it with the backend.
#[allow(dead_code)]
pub fn compile_wgsl(source: &str, backend: &dyn Backend, opts: &BackendOptions) -> BackendOutput {
    try_compile_wgsl(source, backend, opts)
        .unwrap_or_else(|e| panic!("{} compilation failed: {e}", backend.name()))
}

/// Like `compile_wgsl` but returns the backend error instead of panicking.
#[allow(dead_code)]
pub fn try_compile_wgsl(
    source: &str,
    backend: &dyn Backend,
    opts: &BackendOptions,
) -> Result<BackendOutput, BackendError> {
    backend.compile(&parse(source), opts)
}

/// Load a test shader by name (without extension).
#[allow(dead_code)]
pub fn load_shader(name: &str) -> String {
    let path = format!("{}/shaders/{name}.wgsl", env!("CARGO_MANIFEST_DIR"));
    std::fs::read_to_string(&path).unwrap_or_else(|e| panic!("failed to load {path}: {e}"))
}

/// Extract the first binary output from a `BackendOutput`.
#[allow(dead_code)]
pub fn first_binary(output: &BackendOutput) -> &[u8] {
    match &output.files[0].content {
        OutputContent::Binary(b) => b,
        OutputContent::Text(_) => panic!("expected binary output, got text"),
    }
}

/// Extract the first text output from a `BackendOutput`.
#[allow(dead_code)]
pub fn first_text(output: &BackendOutput) -> &str {
    match &output.files[0].content {
        OutputContent::Text(t) => t,
        OutputContent::Binary(_) => panic!("expected text output, got binary"),
    }
}

/// Load a SPIR-V binary with `rspirv`, checking it is well formed.
#[allow(dead_code)]
pub fn load_spirv(bytes: &[u8]) -> rspirv::dr::Module {
    assert_eq!(bytes.len() % 4, 0, "SPIR-V is a stream of words");
    let words: Vec<u32> = bytes
        .chunks_exact(4)
        .map(|c| u32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect();
    rspirv::dr::load_words(words).expect("SPIR-V should load")
}
