#![no_main]

use libfuzzer_sys::fuzz_target;

fuzz_target!(|data: &[u8]| {
    if let Ok(source) = std::str::from_utf8(data) {
        // Parsing and lowering never panic, and whatever they accept is
        // valid IR that can be dumped.
        if let Ok(module) = tinct_parser::parse(source) {
            if let Err(e) = tinct_ir::validate(&module) {
                panic!("parser produced invalid IR: {e}");
            }
            let _ = tinct_ir::dump_module(&module);
        }
    }
});
