#![no_main]

use libfuzzer_sys::fuzz_target;
use tinct_backend_core::{Backend, BackendOptions};

fuzz_target!(|data: &[u8]| {
    let Ok(source) = std::str::from_utf8(data) else {
        return;
    };
    let Ok(module) = tinct_parser::parse(source) else {
        return;
    };
    if tinct_ir::validate(&module).is_err() {
        return;
    }
    let backends: [&dyn Backend; 4] = [
        &tinct_backend_glsl::GlslBackend::desktop(),
        &tinct_backend_hlsl::HlslBackend,
        &tinct_backend_msl::MslBackend,
        &tinct_backend_spirv::SpirvBackend,
    ];
    let opts = BackendOptions::default();
    for backend in backends {
        // Rejecting the input is fine; an internal error is a bug.
        if let Err(e) = backend.compile(&module, &opts) {
            assert!(!e.is_ice(), "{}: {e}", backend.name());
        }
    }
});
