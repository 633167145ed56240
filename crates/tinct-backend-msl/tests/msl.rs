//! End-to-end MSL generation from WGSL source.

use std::collections::BTreeSet;

use tinct_backend_msl::{MslOutput, Options, generate};

fn msl(source: &str) -> MslOutput {
    let module = tinct_parser::parse(source).expect("test shader should parse");
    generate(&module, &Options::default()).expect("MSL generation")
}

#[test]
fn compute_kernel_takes_buffers_as_parameters() {
    let source = r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(64)
fn cs(@builtin(global_invocation_id) id: vec3<u32>) {
    data[id.x] = data[id.x] * 2u;
}
"#;
    let out = msl(source);
    let text = &out.msl;
    assert!(text.starts_with("#include <metal_stdlib>"), "{text}");
    assert!(text.contains("kernel void cs("), "{text}");
    assert!(text.contains("uint3 id [[thread_position_in_grid]]"), "{text}");
    assert!(
        text.contains("device tint_array<uint, 1>* data [[buffer(0)]]"),
        "{text}"
    );
    assert!(text.contains("struct tint_array {"), "{text}");
    // Metal takes the threadgroup size from the dispatch.
    assert!(!text.contains("64"), "{text}");
    assert_eq!(out.workgroup_sizes["cs"], [64, 1, 1]);
}

#[test]
fn vertex_io_uses_attributes() {
    let source = r#"
struct VOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) @interpolate(flat) id: u32,
    @location(1) uv: vec2<f32>,
}

@vertex
fn vs(@builtin(vertex_index) vi: u32, @location(0) offset: vec2<f32>) -> VOut {
    var out: VOut;
    out.pos = vec4<f32>(offset, f32(vi), 1.0);
    out.id = vi;
    out.uv = vec2<f32>(0.5, 0.25);
    return out;
}
"#;
    let text = msl(source).msl;
    assert!(text.contains("struct vs_in {"), "{text}");
    assert!(text.contains("float2 offset [[attribute(0)]];"), "{text}");
    assert!(text.contains("struct vs_out {"), "{text}");
    assert!(text.contains("uint id [[user(locn0)]];"), "{text}");
    assert!(text.contains("float2 uv [[user(locn1)]];"), "{text}");
    assert!(text.contains("float4 pos [[position]];"), "{text}");
    assert!(
        text.contains("vertex vs_out vs(uint vi [[vertex_id]], vs_in stage_in [[stage_in]]) {"),
        "{text}"
    );
    assert!(text.contains("float2(0.5f, 0.25f)"), "{text}");
}

#[test]
fn fragment_sampling() {
    let source = r#"
@group(0) @binding(0) var t: texture_2d<f32>;
@group(0) @binding(1) var s: sampler;

@fragment
fn fs(
    @location(1) @interpolate(linear) uv: vec2<f32>,
    @location(2) @interpolate(flat) layer: i32,
) -> @location(0) vec4<f32> {
    return textureSample(t, s, uv);
}
"#;
    let text = msl(source).msl;
    assert!(text.contains("struct fs_in {"), "{text}");
    assert!(
        text.contains("float2 uv [[user(locn1)]] [[center_no_perspective]];"),
        "{text}"
    );
    assert!(text.contains("int layer [[user(locn2)]] [[flat]];"), "{text}");
    assert!(text.contains("[[color(0)]];"), "{text}");
    assert!(
        text.contains("texture2d<float, access::sample> t [[texture(0)]]"),
        "{text}"
    );
    assert!(text.contains("sampler s [[sampler(1)]]"), "{text}");
    assert!(text.contains("fragment fs_out fs(fs_in stage_in [[stage_in]], "), "{text}");
    assert!(text.contains("t.sample(s, "), "{text}");
}

#[test]
fn packed_vectors_in_uniform_structs() {
    let source = r#"
struct Light {
    dir: vec3<f32>,
    intensity: f32,
    color: vec4<f32>,
}

@group(0) @binding(0) var<uniform> light: Light;
@group(0) @binding(1) var<storage, read_write> result: vec3<f32>;

@compute @workgroup_size(1)
fn cs() {
    result = light.dir * light.intensity;
}
"#;
    let text = msl(source).msl;
    assert!(text.contains("  packed_float3 dir;\n  float intensity;\n"), "{text}");
    assert!(text.contains("const constant Light* light [[buffer(0)]]"), "{text}");
    assert!(text.contains("device float3* result [[buffer(1)]]"), "{text}");
    assert!(text.contains("float3((*light).dir)"), "{text}");
}

#[test]
fn workgroup_atomics() {
    let source = r#"
var<workgroup> hits: atomic<u32>;
@group(0) @binding(0) var<storage, read_write> total: atomic<u32>;

@compute @workgroup_size(8, 8)
fn cs(@builtin(local_invocation_index) idx: u32) {
    atomicAdd(&hits, 1u);
    workgroupBarrier();
    if (idx == 0u) {
        atomicAdd(&total, atomicLoad(&hits));
    }
}
"#;
    let out = msl(source);
    let text = &out.msl;
    assert!(text.contains("threadgroup atomic_uint hits;"), "{text}");
    assert!(text.contains("device atomic_uint* total [[buffer(0)]]"), "{text}");
    assert!(text.contains("uint idx [[thread_index_in_threadgroup]]"), "{text}");
    assert!(
        text.contains("atomic_fetch_add_explicit(&hits, 1u, memory_order_relaxed)"),
        "{text}"
    );
    assert!(
        text.contains("atomic_load_explicit(&hits, memory_order_relaxed)"),
        "{text}"
    );
    assert!(
        text.contains("threadgroup_barrier(mem_flags::mem_threadgroup);"),
        "{text}"
    );
    assert_eq!(out.workgroup_sizes["cs"], [8, 8, 1]);
}

#[test]
fn struct_results_carry_point_size_and_sample_mask() {
    let source = r#"
struct VOut {
    @builtin(position) pos: vec4<f32>,
}

struct FOut {
    @location(0) color: vec4<f32>,
}

@vertex
fn vs() -> VOut {
    return VOut(vec4<f32>(0.0, 0.0, 0.0, 1.0));
}

@fragment
fn fs() -> FOut {
    return FOut(vec4<f32>(1.0));
}
"#;
    let module = tinct_parser::parse(source).expect("test shader should parse");
    let options = Options {
        emit_vertex_point_size: true,
        fixed_sample_mask: 3,
        ..Options::default()
    };
    let out = generate(&module, &options).expect("MSL generation");
    let text = &out.msl;
    assert!(text.contains("[[point_size]]"), "{text}");
    assert!(text.contains("[[sample_mask]]"), "{text}");
    assert!(text.contains("3u"), "{text}");
}

#[test]
fn array_length_reads_the_buffer_size_uniform() {
    let source = r#"
@group(0) @binding(2) var<storage, read_write> buf: array<f32>;

@compute @workgroup_size(1)
fn cs() {
    buf[0] = f32(arrayLength(&buf));
}
"#;
    let out = msl(source);
    let text = &out.msl;
    assert!(
        text.contains("device tint_array<float, 1>* buf [[buffer(2)]]"),
        "{text}"
    );
    assert!(text.contains("[[buffer(30)]]"), "{text}");
    assert!(text.contains("buffer_size"), "{text}");
    assert_eq!(out.used_array_length_indices, BTreeSet::from([2]));
}

#[test]
fn push_constants_are_rejected() {
    let source = r#"
var<push_constant> pc: vec4<f32>;

@fragment
fn fs() -> @location(0) vec4<f32> {
    return pc;
}
"#;
    let module = tinct_parser::parse(source).unwrap();
    let err = generate(&module, &Options::default()).unwrap_err();
    assert!(!err.is_ice(), "{err}");
}
