mod common;

use rspirv::dr::Operand;
use rspirv::spirv;
use tinct_backend_core::BackendOptions;
use tinct_backend_glsl::GlslBackend;
use tinct_backend_hlsl::HlslBackend;
use tinct_backend_msl::MslBackend;
use tinct_backend_spirv::SpirvBackend;

const SHADERS: [&str; 3] = ["histogram", "textured_quad", "tiled_sum"];

#[test]
fn every_shader_compiles_for_every_target() {
    for name in SHADERS {
        let source = common::load_shader(name);
        for backend in common::all_backends() {
            let output = common::compile_wgsl(&source, backend.as_ref(), &BackendOptions::default());
            assert!(!output.files.is_empty(), "{name} / {}", backend.name());
            assert!(
                output.sanitized_ir.is_none(),
                "{name} / {}: IR dump was not requested",
                backend.name()
            );
        }
    }
}

#[test]
fn histogram_glsl() {
    let source = common::load_shader("histogram");
    let output = common::compile_wgsl(&source, &GlslBackend::desktop(), &BackendOptions::default());
    assert_eq!(output.files[0].name, "main.comp");
    let text = common::first_text(&output);
    assert!(text.starts_with("#version 450"), "{text}");
    assert!(text.contains("layout(local_size_x = 64, local_size_y = 1, local_size_z = 1) in;"), "{text}");
    assert!(text.contains("shared uint local_bins"), "{text}");
    assert!(text.contains("atomicAdd("), "{text}");
    assert!(text.contains("barrier();"), "{text}");
    assert!(text.contains("gl_GlobalInvocationID"), "{text}");
}

#[test]
fn histogram_hlsl() {
    let source = common::load_shader("histogram");
    let output = common::compile_wgsl(&source, &HlslBackend, &BackendOptions::default());
    let text = common::first_text(&output);
    assert!(text.contains("[numthreads(64, 1, 1)]"), "{text}");
    assert!(text.contains("groupshared uint local_bins"), "{text}");
    assert!(text.contains("ByteAddressBuffer values : register(t1, space0);"), "{text}");
    assert!(text.contains("RWByteAddressBuffer bins : register(u2, space0);"), "{text}");
    assert!(text.contains("cbuffer cbuffer_params : register(b0, space0) {"), "{text}");
    assert!(text.contains("GroupMemoryBarrierWithGroupSync();"), "{text}");
}

#[test]
fn histogram_msl_reports_the_threadgroup_size() {
    let source = common::load_shader("histogram");
    let output = common::compile_wgsl(&source, &MslBackend, &BackendOptions::default());
    let text = common::first_text(&output);
    assert!(text.starts_with("#include <metal_stdlib>"), "{text}");
    assert!(text.contains("kernel void "), "{text}");
    assert!(text.contains("threadgroup_barrier(mem_flags::mem_threadgroup);"), "{text}");
    assert!(
        output
            .diagnostics
            .iter()
            .any(|d| d.message.contains("threadgroup size (64, 1, 1)")),
        "{:?}",
        output.diagnostics
    );
}

#[test]
fn histogram_spirv() {
    let source = common::load_shader("histogram");
    let output = common::compile_wgsl(&source, &SpirvBackend, &BackendOptions::default());
    assert_eq!(output.files[0].name, "shader.spv");
    let module = common::load_spirv(common::first_binary(&output));
    assert_eq!(module.entry_points.len(), 1);
    assert_eq!(
        module.entry_points[0].operands[0],
        Operand::ExecutionModel(spirv::ExecutionModel::GLCompute)
    );
    assert!(
        module
            .all_inst_iter()
            .any(|i| i.class.opcode == spirv::Op::AtomicIAdd)
    );
}

#[test]
fn textured_quad_has_both_stages() {
    let source = common::load_shader("textured_quad");

    // GLSL holds one stage per file.
    let glsl = common::compile_wgsl(&source, &GlslBackend::es(), &BackendOptions::default());
    let names: Vec<_> = glsl.files.iter().map(|f| f.name.as_str()).collect();
    assert_eq!(names, ["vs_main.vert", "fs_main.frag"]);
    let vertex = common::first_text(&glsl);
    assert!(vertex.starts_with("#version 310 es"), "{vertex}");
    assert!(vertex.contains("gl_Position"), "{vertex}");

    let msl = common::compile_wgsl(&source, &MslBackend, &BackendOptions::default());
    let text = common::first_text(&msl);
    assert!(text.contains("vertex "), "{text}");
    assert!(text.contains("fragment "), "{text}");
    assert!(text.contains("[[position]]"), "{text}");
    assert!(text.contains("[[flat]]"), "{text}");

    let spirv = common::compile_wgsl(&source, &SpirvBackend, &BackendOptions::default());
    let module = common::load_spirv(common::first_binary(&spirv));
    let models: Vec<_> = module
        .entry_points
        .iter()
        .map(|ep| ep.operands[0].clone())
        .collect();
    assert!(models.contains(&Operand::ExecutionModel(spirv::ExecutionModel::Vertex)));
    assert!(models.contains(&Operand::ExecutionModel(spirv::ExecutionModel::Fragment)));
}

#[test]
fn ir_dump_targets_print_the_parsed_module() {
    let source = common::load_shader("tiled_sum");
    let output = common::compile_wgsl(
        &source,
        &tinct_backend_core::IrDumpBackend,
        &BackendOptions::default(),
    );
    let text = common::first_text(&output);
    assert!(text.contains("tile_size"), "{text}");
    assert!(text.contains("fn load_scaled("), "{text}");
}
