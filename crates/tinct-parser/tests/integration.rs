//! Integration tests for the WGSL front end.

use tinct_ir::{AddressSpace, ShaderStage, StorageAccess, TypeInner, dump_module, validate};
use tinct_parser::{ParseError, parse};

#[test]
fn parse_vecadd() {
    let source = r#"
@group(0) @binding(0) var<storage, read> a: array<f32>;
@group(0) @binding(1) var<storage, read> b: array<f32>;
@group(0) @binding(2) var<storage, read_write> c: array<f32>;

@compute @workgroup_size(256)
fn main(@builtin(global_invocation_id) gid: vec3<u32>) {
    let i = gid.x;
    c[i] = a[i] + b[i];
}
"#;
    let module = parse(source).expect("vecadd should parse");
    validate(&module).expect("vecadd should validate");

    let eps: Vec<_> = module.entry_points().collect();
    assert_eq!(eps.len(), 1);
    assert_eq!(eps[0].1.name, "main");
    assert_eq!(eps[0].1.stage(), Some(ShaderStage::Compute));
    assert_eq!(module.global_variables.len(), 3);

    for (_, var) in module.global_variables.iter() {
        assert_eq!(var.space, AddressSpace::Storage);
    }
    let c = module.global_by_name("c").unwrap();
    assert_eq!(module.global_variables[c].access, StorageAccess::LOAD_STORE);
    let a = module.global_by_name("a").unwrap();
    assert_eq!(module.global_variables[a].access, StorageAccess::LOAD);

    let dump = dump_module(&module);
    assert!(dump.contains("@group(0) @binding(2) var<storage, read_write> c: array<f32>;"));
    assert!(dump.contains("@compute @workgroup_size(256, 1, 1)"));
    assert!(dump.contains("fn main(@builtin(global_invocation_id) gid: vec3<u32>) {"));
    assert!(dump.contains("let i: u32 = gid[0];"), "{dump}");
}

#[test]
fn parse_vertex_fragment_pair() {
    let source = r#"
struct VertexOut {
    @builtin(position) pos: vec4<f32>,
    @location(0) uv: vec2<f32>,
}

@group(0) @binding(0) var tex: texture_2d<f32>;
@group(0) @binding(1) var samp: sampler;

@vertex
fn vs(@builtin(vertex_index) vi: u32) -> VertexOut {
    var out: VertexOut;
    let x = f32(vi & 1u);
    let y = f32(vi >> 1u);
    out.pos = vec4<f32>(x, y, 0.0, 1.0);
    out.uv = vec2<f32>(x, y);
    return out;
}

@fragment
fn fs(in: VertexOut) -> @location(0) vec4<f32> {
    return textureSample(tex, samp, in.uv);
}
"#;
    let module = parse(source).expect("shader pair should parse");
    validate(&module).expect("shader pair should validate");

    assert_eq!(module.entry_points().count(), 2);
    let tex = module.global_by_name("tex").unwrap();
    assert_eq!(module.global_variables[tex].space, AddressSpace::Handle);
    assert!(matches!(
        module.types[module.global_variables[tex].ty].inner,
        TypeInner::Texture { .. }
    ));

    let dump = dump_module(&module);
    assert!(dump.contains("struct VertexOut"), "{dump}");
    assert!(dump.contains("textureSample(tex, samp, in.uv)"), "{dump}");
    assert!(dump.contains("@vertex"));
    assert!(dump.contains("@fragment"));
}

#[test]
fn parse_loops_and_overrides() {
    let source = r#"
override scale: f32 = 2.0;

@group(0) @binding(0) var<storage, read_write> data: array<f32, 16>;

@compute @workgroup_size(1)
fn main() {
    for (var i = 0u; i < 16u; i++) {
        if i == 3u {
            continue;
        }
        data[i] = data[i] * scale;
    }
}
"#;
    let module = parse(source).expect("loop shader should parse");
    validate(&module).expect("loop shader should validate");

    assert_eq!(module.overrides.len(), 1);
    let dump = dump_module(&module);
    assert!(dump.contains("override scale: f32"), "{dump}");
    assert!(dump.contains("loop {"), "{dump}");
    assert!(dump.contains("continue;"), "{dump}");
}

#[test]
fn parse_workgroup_barrier() {
    let source = r#"
var<workgroup> tile: array<u32, 64>;

@compute @workgroup_size(64)
fn main(@builtin(local_invocation_index) idx: u32) {
    tile[idx] = idx;
    workgroupBarrier();
    let v = workgroupUniformLoad(&tile[0]);
}
"#;
    let module = parse(source).expect("barrier shader should parse");
    validate(&module).expect("barrier shader should validate");
    let dump = dump_module(&module);
    assert!(dump.contains("workgroupBarrier();"), "{dump}");
}

#[test]
fn storage_barrier_and_packed_dot_product() {
    let source = r#"
@group(0) @binding(0) var<storage, read_write> data: array<u32, 4>;

@compute @workgroup_size(1)
fn main() {
    data[0] = u32(dot4I8Packed(data[1], data[2]));
    storageBarrier();
    data[3] = dot4U8Packed(data[0], data[1]);
}
"#;
    let module = parse(source).expect("packed dot shader should parse");
    validate(&module).expect("packed dot shader should validate");
    let dump = dump_module(&module);
    assert!(dump.contains("storageBarrier();"), "{dump}");
    assert!(dump.contains("dot4I8Packed("), "{dump}");
    assert!(dump.contains("dot4U8Packed("), "{dump}");
}

#[test]
fn syntax_errors_render_with_source() {
    let source = "fn main( {";
    let err = parse(source).unwrap_err();
    assert!(matches!(err, ParseError::Wgsl(_)));
    assert!(!err.render(source).is_empty());
}
