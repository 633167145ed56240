mod common;

use tinct_backend_core::{Backend, BackendError, BackendOptions, CommonOptions, IrDumpBackend};
use tinct_backend_hlsl::HlslBackend;
use tinct_backend_msl::MslBackend;

#[test]
fn invalid_wgsl_is_rejected() {
    let result = tinct_parser::parse("this is not valid WGSL @@@ {{{");
    assert!(result.is_err());
}

#[test]
fn syntax_error_gives_useful_message() {
    let source = "fn main( {}";
    let err = tinct_parser::parse(source).unwrap_err();
    assert!(!err.to_string().is_empty());
    // The rendered form points into the source.
    assert!(err.render(source).contains("main"), "{}", err.render(source));
}

#[test]
fn type_errors_are_rejected() {
    let source = r#"
@compute @workgroup_size(1)
fn main() {
    let x: u32 = 1.5;
}
"#;
    assert!(tinct_parser::parse(source).is_err());
}

#[test]
fn empty_module_gets_a_placeholder_entry_point() {
    let module = tinct_ir::Module::default();
    let opts = BackendOptions::default();
    for backend in common::all_backends() {
        let output = backend
            .compile(&module, &opts)
            .unwrap_or_else(|e| panic!("{}: {e}", backend.name()));
        assert!(!output.files.is_empty(), "{}", backend.name());
    }
}

#[test]
fn ir_dump_empty_module_ok() {
    let module = tinct_ir::Module::default();
    let result = IrDumpBackend.compile(&module, &BackendOptions::default());
    assert!(result.is_ok());
}

#[test]
fn unknown_entry_point_is_a_user_error() {
    let source = common::load_shader("histogram");
    let opts = BackendOptions {
        common: CommonOptions {
            entry_point: Some("missing".into()),
            ..CommonOptions::default()
        },
        ..BackendOptions::default()
    };
    for backend in common::all_backends() {
        let err = common::try_compile_wgsl(&source, backend.as_ref(), &opts).unwrap_err();
        assert!(!err.is_ice(), "{}: {err}", backend.name());
    }
}

#[test]
fn push_constants_are_unsupported_on_d3d_and_metal() {
    let source = r#"
var<push_constant> pc: vec4<f32>;

@fragment
fn fs() -> @location(0) vec4<f32> {
    return pc;
}
"#;
    for backend in [&HlslBackend as &dyn Backend, &MslBackend] {
        let err = common::try_compile_wgsl(source, backend, &BackendOptions::default())
            .unwrap_err();
        assert!(!err.is_ice(), "{}: {err:?}", backend.name());
    }
}

#[test]
fn several_stages_need_a_selection_for_glsl() {
    let source = common::load_shader("textured_quad");
    let module = common::parse(&source);
    let err = tinct_backend_glsl::generate(&module, &tinct_backend_glsl::Options::default())
        .unwrap_err();
    assert!(matches!(err, BackendError::Unsupported(_)), "{err:?}");
}
