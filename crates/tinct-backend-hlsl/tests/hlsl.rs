//! End-to-end HLSL generation from WGSL source.

use tinct_backend_hlsl::{Options, generate};
use tinct_ir::BindingPoint;

fn hlsl(source: &str, options: &Options) -> String {
    let module = tinct_parser::parse(source).expect("test shader should parse");
    generate(&module, options).expect("HLSL generation").hlsl
}

#[test]
fn compute_kernel_uses_a_byte_address_buffer() {
    let source = r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32>;

@compute @workgroup_size(64)
fn main(@builtin(global_invocation_id) id: vec3<u32>) {
    let i = id.x;
    data[i] = data[i] << 2u;
}
"#;
    let text = hlsl(source, &Options::default());
    assert!(
        text.contains("RWByteAddressBuffer data : register(u0, space0);"),
        "{text}"
    );
    assert!(text.contains("[numthreads(64, 1, 1)]"), "{text}");
    assert!(text.contains(": SV_DispatchThreadID;"), "{text}");
    assert!(text.contains("data.Load("), "{text}");
    assert!(text.contains("data.Store("), "{text}");
    // Robustness clamps the index against the buffer size.
    assert!(text.contains("data.GetDimensions("), "{text}");
}

#[test]
fn vertex_outputs_get_semantics() {
    let source = r#"
struct VOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) @interpolate(flat) id: u32,
    @location(1) uv: vec2<f32>,
}

@vertex
fn vs(@builtin(vertex_index) vi: u32) -> VOut {
    var out: VOut;
    out.pos = vec4<f32>(f32(vi), 0.0, 0.0, 1.0);
    out.id = vi;
    out.uv = vec2<f32>(0.5, 0.25);
    return out;
}
"#;
    let text = hlsl(source, &Options::default());
    assert!(text.contains("struct vs_in {"), "{text}");
    assert!(text.contains("struct vs_out {"), "{text}");
    assert!(text.contains(": SV_VertexID;"), "{text}");
    assert!(text.contains(": SV_Position;"), "{text}");
    assert!(text.contains("nointerpolation uint "), "{text}");
    assert!(text.contains(": TEXCOORD1;"), "{text}");
    assert!(text.contains("vs_out vs(vs_in inputs) {"), "{text}");
    assert!(text.contains("float2(0.5f, 0.25f)"), "{text}");
}

#[test]
fn fragment_sampling() {
    let source = r#"
@group(0) @binding(0) var t: texture_2d<f32>;
@group(0) @binding(1) var s: sampler;

@fragment
fn fs(@location(1) uv: vec2<f32>) -> @location(0) vec4<f32> {
    return textureSample(t, s, uv);
}
"#;
    let text = hlsl(source, &Options::default());
    assert!(
        text.contains("Texture2D<float4> t : register(t0, space0);"),
        "{text}"
    );
    assert!(text.contains("SamplerState s : register(s1, space0);"), "{text}");
    assert!(text.contains("t.Sample(s, "), "{text}");
    assert!(text.contains(": SV_Target0;"), "{text}");
    assert!(text.contains(": TEXCOORD1;"), "{text}");
}

#[test]
fn uniform_buffers_are_register_arrays() {
    let source = r#"
struct Params {
    scale: f32,
    offset: vec2<f32>,
}

@group(1) @binding(2) var<uniform> params: Params;
@group(0) @binding(0) var<storage, read_write> result: array<f32, 4>;

@compute @workgroup_size(4)
fn main(@builtin(local_invocation_index) i: u32) {
    result[i] = params.scale * params.offset.x;
}
"#;
    let text = hlsl(source, &Options::default());
    assert!(
        text.contains("cbuffer cbuffer_params : register(b2, space1) {"),
        "{text}"
    );
    assert!(text.contains("  uint4 params[1];"), "{text}");
    assert!(text.contains("asfloat(params[0].x)"), "{text}");
    assert!(text.contains("asfloat(params[0]."), "{text}");
    assert!(text.contains(": SV_GroupIndex;"), "{text}");
}

#[test]
fn storage_atomics_use_interlocked_helpers() {
    let source = r#"
@group(0) @binding(0) var<storage, read_write> counter: atomic<u32>;

@compute @workgroup_size(1)
fn main() {
    atomicAdd(&counter, 1u);
}
"#;
    let text = hlsl(source, &Options::default());
    assert!(
        text.contains("uint counter_atomicAdd(uint offset, uint value) {"),
        "{text}"
    );
    assert!(
        text.contains("counter.InterlockedAdd(offset, value, original_value);"),
        "{text}"
    );
    assert!(text.contains("counter_atomicAdd(0u, 1u);"), "{text}");
}

#[test]
fn workgroup_atomics_write_a_result_temporary() {
    let source = r#"
var<workgroup> hits: atomic<u32>;

@compute @workgroup_size(1)
fn main() {
    atomicAdd(&hits, 1u);
}
"#;
    let text = hlsl(source, &Options::default());
    assert!(text.contains("groupshared uint hits;"), "{text}");
    assert!(text.contains("InterlockedAdd(hits, 1u, atomic_result"), "{text}");
    assert!(text.contains("GroupMemoryBarrierWithGroupSync();"), "{text}");
}

#[test]
fn dispatch_size_comes_from_a_root_constant() {
    let source = r#"
@group(0) @binding(0) var<storage, read_write> result: vec3<u32>;

@compute @workgroup_size(1)
fn main(@builtin(num_workgroups) n: vec3<u32>) {
    result = n;
}
"#;
    let options = Options {
        root_constant_binding_point: Some(BindingPoint::new(3, 7)),
        ..Options::default()
    };
    let text = hlsl(source, &options);
    assert!(
        text.contains("cbuffer cbuffer_tint_num_workgroups : register(b7, space3) {"),
        "{text}"
    );
    assert!(text.contains("tint_num_workgroups[0].xyz"), "{text}");
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
