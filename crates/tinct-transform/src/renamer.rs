//! Renames identifiers that the target language reserves.

use std::collections::{BTreeMap, HashSet};

use tinct_ir::{Binding, GlobalVariable, Module, TypeInner, predeclared};

use crate::{DataMap, Transform, TransformError};

const NAME: &str = "Renamer";

/// Which identifiers to rename.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum Target {
    /// Every user identifier, for output that must not leak source names.
    All,
    #[default]
    GlslKeywords,
    HlslKeywords,
    MslKeywords,
}

impl Target {
    /// Returns `true` if `name` cannot be used as an identifier.
    pub fn is_reserved(self, name: &str) -> bool {
        match self {
            Self::All => true,
            Self::GlslKeywords => {
                name.starts_with("gl_") || name.contains("__") || GLSL.binary_search(&name).is_ok()
            }
            Self::HlslKeywords => HLSL.binary_search(&name).is_ok(),
            Self::MslKeywords => name.starts_with("__") || MSL.binary_search(&name).is_ok(),
        }
    }
}

#[derive(Clone, Copy, Debug, Default)]
pub struct RenamerConfig {
    pub target: Target,
}

/// Old identifier to new identifier, for every identifier renamed.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct RenamerData {
    pub remappings: BTreeMap<String, String>,
}

#[derive(Debug)]
pub struct Renamer;

const FRESH: &str = "tint_symbol";

fn is_fresh(name: &str) -> bool {
    name.strip_prefix(FRESH)
        .is_some_and(|rest| rest.is_empty() || rest.strip_prefix('_').is_some_and(|n| n.parse::<u32>().is_ok()))
}

/// `gl_*` IO variables stand for GLSL builtins and keep their names.
fn is_gl_builtin(var: &GlobalVariable) -> bool {
    var.name.starts_with("gl_") && var.io.as_ref().and_then(Binding::builtin).is_some()
}

/// Calls `f` on every identifier in `module`.
fn for_each_name(module: &Module, mut f: impl FnMut(&str)) {
    for (_, ty) in module.types.iter() {
        if let Some(name) = ty.name.as_deref().filter(|n| !predeclared::is_predeclared_name(n)) {
            f(name);
        }
        if let TypeInner::Struct { members, .. } = &ty.inner {
            members.iter().for_each(|m| f(&m.name));
        }
    }
    module
        .global_variables
        .iter()
        .filter(|(_, g)| !is_gl_builtin(g))
        .for_each(|(_, g)| f(&g.name));
    module.overrides.iter().for_each(|(_, o)| f(&o.name));
    for (_, func) in module.functions.iter() {
        f(&func.name);
        func.arguments.iter().for_each(|a| f(&a.name));
        func.locals.iter().for_each(|(_, l)| f(&l.name));
    }
}

struct Renaming {
    target: Target,
    taken: HashSet<String>,
    next: u32,
    remappings: BTreeMap<String, String>,
}

impl Renaming {
    fn fresh(&mut self) -> String {
        loop {
            let candidate = match self.next {
                0 => FRESH.to_string(),
                n => format!("{FRESH}_{n}"),
            };
            self.next += 1;
            if self.taken.insert(candidate.clone()) {
                return candidate;
            }
        }
    }

    fn rename(&mut self, name: &mut String) {
        if !self.target.is_reserved(name) || (self.target == Target::All && is_fresh(name)) {
            return;
        }
        let new = self.fresh();
        self.remappings.insert(std::mem::replace(name, new.clone()), new);
    }
}

impl Transform for Renamer {
    fn name(&self) -> &'static str {
        NAME
    }

    fn should_run(&self, module: &Module, inputs: &DataMap) -> bool {
        let target = inputs
            .get::<RenamerConfig>()
            .copied()
            .unwrap_or_default()
            .target;
        let mut found = false;
        for_each_name(module, |name| {
            found |= target.is_reserved(name) && !(target == Target::All && is_fresh(name));
        });
        found
    }

    fn apply(
        &self,
        module: &Module,
        inputs: &DataMap,
        outputs: &mut DataMap,
    ) -> Result<Module, TransformError> {
        let cfg = inputs.get::<RenamerConfig>().copied().unwrap_or_default();
        let mut out = module.clone();
        let mut taken = HashSet::new();
        for_each_name(&out, |name| {
            taken.insert(name.to_string());
        });
        let mut renaming = Renaming {
            target: cfg.target,
            taken,
            next: 0,
            remappings: BTreeMap::new(),
        };

        out.types.map_in_place(|_, ty| {
            // Builtin result structs are found by name; printers spell them.
            if let Some(name) = ty.name.as_mut().filter(|n| !predeclared::is_predeclared_name(n)) {
                renaming.rename(name);
            }
            if let TypeInner::Struct { members, .. } = &mut ty.inner {
                members.iter_mut().for_each(|m| renaming.rename(&mut m.name));
            }
        });
        for (_, g) in out.global_variables.iter_mut() {
            if !is_gl_builtin(g) {
                renaming.rename(&mut g.name);
            }
        }
        for (_, o) in out.overrides.iter_mut() {
            renaming.rename(&mut o.name);
        }
        for (_, func) in out.functions.iter_mut() {
            renaming.rename(&mut func.name);
            func.arguments
                .iter_mut()
                .for_each(|a| renaming.rename(&mut a.name));
            for (_, l) in func.locals.iter_mut() {
                renaming.rename(&mut l.name);
            }
        }

        log::debug!("{NAME}: {} identifier(s) renamed", renaming.remappings.len());
        outputs.insert(RenamerData {
            remappings: renaming.remappings,
        });
        Ok(out)
    }
}

// Sorted, for binary search.

const GLSL: &[&str] = &[
    "active", "asm", "atomic_uint", "attribute", "bool", "break", "buffer", "bvec2", "bvec3",
    "bvec4", "case", "cast", "centroid", "class", "coherent", "common", "const", "continue",
    "default", "discard", "dmat2", "dmat2x2", "dmat2x3", "dmat2x4", "dmat3", "dmat3x2",
    "dmat3x3", "dmat3x4", "dmat4", "dmat4x2", "dmat4x3", "dmat4x4", "do", "double", "dvec2",
    "dvec3", "dvec4", "else", "enum", "extern", "external", "false", "filter", "fixed", "flat",
    "float", "for", "fvec2", "fvec3", "fvec4", "goto", "half", "highp", "hvec2", "hvec3",
    "hvec4", "if", "iimage1D", "iimage1DArray", "iimage2D", "iimage2DArray", "iimage2DMS",
    "iimage2DMSArray", "iimage2DRect", "iimage3D", "iimageBuffer", "iimageCube",
    "iimageCubeArray", "image1D", "image1DArray", "image2D", "image2DArray", "image2DMS",
    "image2DMSArray", "image2DRect", "image3D", "imageBuffer", "imageCube", "imageCubeArray",
    "in", "inline", "inout", "input", "int", "interface", "invariant", "isampler1D",
    "isampler1DArray", "isampler2D", "isampler2DArray", "isampler2DMS", "isampler2DMSArray",
    "isampler2DRect", "isampler3D", "isamplerBuffer", "isamplerCube", "isamplerCubeArray",
    "ivec2", "ivec3", "ivec4", "layout", "long", "lowp", "main", "mat2", "mat2x2", "mat2x3",
    "mat2x4", "mat3", "mat3x2", "mat3x3", "mat3x4", "mat4", "mat4x2", "mat4x3", "mat4x4",
    "mediump", "namespace", "noinline", "noperspective", "out", "output", "partition", "patch",
    "precise", "precision", "public", "readonly", "resource", "restrict", "return", "sample",
    "sampler1D", "sampler1DArray", "sampler1DArrayShadow", "sampler1DShadow", "sampler2D",
    "sampler2DArray", "sampler2DArrayShadow", "sampler2DMS", "sampler2DMSArray",
    "sampler2DRect", "sampler2DRectShadow", "sampler2DShadow", "sampler3D", "sampler3DRect",
    "samplerBuffer", "samplerCube", "samplerCubeArray", "samplerCubeArrayShadow",
    "samplerCubeShadow", "shared", "short", "sizeof", "smooth", "static", "struct",
    "subroutine", "superp", "switch", "template", "this", "true", "typedef", "uimage1D",
    "uimage1DArray", "uimage2D", "uimage2DArray", "uimage2DMS", "uimage2DMSArray",
    "uimage2DRect", "uimage3D", "uimageBuffer", "uimageCube", "uimageCubeArray", "uint",
    "uniform", "union", "unsigned", "usampler1D", "usampler1DArray", "usampler2D",
    "usampler2DArray", "usampler2DMS", "usampler2DMSArray", "usampler2DRect", "usampler3D",
    "usamplerBuffer", "usamplerCube", "usamplerCubeArray", "using", "uvec2", "uvec3", "uvec4",
    "varying", "vec2", "vec3", "vec4", "void", "volatile", "while", "writeonly",
];

const HLSL: &[&str] = &[
    "AppendStructuredBuffer", "BlendState", "Buffer", "ByteAddressBuffer", "CompileShader",
    "ComputeShader", "ConsumeStructuredBuffer", "DepthStencilState", "DepthStencilView",
    "DomainShader", "GeometryShader", "HullShader", "InputPatch", "LineStream", "NULL",
    "OutputPatch", "PixelShader", "PointStream", "RWBuffer", "RWByteAddressBuffer",
    "RWStructuredBuffer", "RWTexture1D", "RWTexture1DArray", "RWTexture2D", "RWTexture2DArray",
    "RWTexture3D", "RasterizerState", "RenderTargetView", "SamplerComparisonState",
    "SamplerState", "StructuredBuffer", "Texture1D", "Texture1DArray", "Texture2D",
    "Texture2DArray", "Texture2DMS", "Texture2DMSArray", "Texture3D", "TextureCube",
    "TextureCubeArray", "TriangleStream", "VertexShader", "abort", "abs", "acos", "all",
    "asdouble", "asfloat", "asin", "asint", "asm", "asuint", "atan", "atan2", "auto", "bool",
    "bool2", "bool3", "bool4", "break", "buffer", "case", "catch", "cbuffer", "ceil", "centroid",
    "char", "clamp", "class", "clip", "column_major", "compile", "const", "const_cast",
    "continue", "cos", "cosh", "cross", "ddx", "ddy", "default", "degrees", "delete",
    "determinant", "discard", "distance", "do", "dot", "double", "dynamic_cast", "else", "enum",
    "errorf", "exp", "exp2", "explicit", "export", "extern", "false", "float", "float2",
    "float2x2", "float2x3", "float2x4", "float3", "float3x2", "float3x3", "float3x4", "float4",
    "float4x2", "float4x3", "float4x4", "floor", "fmod", "for", "frac", "friend", "fwidth",
    "globallycoherent", "goto", "groupshared", "half", "half2", "half3", "half4", "if", "in",
    "inline", "inout", "int", "int2", "int3", "int4", "interface", "isfinite", "isinf", "isnan",
    "ldexp", "length", "lerp", "line", "lineadj", "linear", "lit", "log", "log10", "log2",
    "long", "mad", "matrix", "max", "min", "min10float", "min12int", "min16float", "min16int",
    "min16uint", "modf", "mul", "mutable", "namespace", "new", "nointerpolation",
    "noperspective", "normalize", "operator", "out", "packoffset", "pass", "pixelfragment",
    "point", "pow", "precise", "printf", "private", "protected", "public", "radians",
    "register", "reinterpret_cast", "return", "round", "row_major", "rsqrt", "sample",
    "sampler", "sampler1D", "sampler2D", "sampler3D", "samplerCUBE", "saturate", "shared",
    "short", "sign", "signed", "sin", "sincos", "sinh", "sizeof", "smoothstep", "snorm", "sqrt",
    "stateblock", "static", "static_cast", "step", "string", "struct", "switch", "tan", "tanh",
    "tbuffer", "technique", "template", "texture", "this", "throw", "triangle", "triangleadj",
    "true", "try", "typedef", "typename", "uint", "uint2", "uint3", "uint4", "uniform", "union",
    "unorm", "unsigned", "using", "vector", "vertexfragment", "virtual", "void", "volatile",
    "while",
];

const MSL: &[&str] = &[
    "INFINITY", "NAN", "access", "alignas", "alignof", "and", "and_eq", "array", "array_ref",
    "as_type", "asm", "atomic", "atomic_bool", "atomic_int", "atomic_uint", "auto", "bias",
    "bitand", "bitor", "bool", "bool2", "bool3", "bool4", "break", "buffer", "case", "catch",
    "char", "char16_t", "char2", "char3", "char32_t", "char4", "class", "compl", "component",
    "const", "const_cast", "constant", "constexpr", "continue", "decltype", "default", "delete",
    "depth2d", "depth2d_array", "depth2d_ms", "depth2d_ms_array", "depthcube", "depthcube_array",
    "device", "discard_fragment", "do", "double", "dynamic_cast", "else", "enum", "explicit",
    "extern", "false", "float", "float2", "float2x2", "float2x3", "float2x4", "float3", "float3x2",
    "float3x3", "float3x4", "float4", "float4x2", "float4x3", "float4x4", "for", "fragment",
    "friend", "goto", "gradient2d", "gradient3d", "gradientcube", "half", "half2", "half2x2",
    "half2x3", "half2x4", "half3", "half3x2", "half3x3", "half3x4", "half4", "half4x2", "half4x3",
    "half4x4", "if", "inline", "int", "int16_t", "int2", "int3", "int32_t", "int4", "int64_t",
    "int8_t", "kernel", "level", "long", "long2", "long3", "long4", "main", "mem_flags",
    "memory_order_relaxed", "metal", "mutable", "namespace", "new", "noexcept", "not", "not_eq",
    "nullptr", "operator", "or", "or_eq", "packed_bool2", "packed_bool3", "packed_bool4",
    "packed_float2", "packed_float3", "packed_float4", "packed_half2", "packed_half3",
    "packed_half4", "packed_int2", "packed_int3", "packed_int4", "packed_uint2", "packed_uint3",
    "packed_uint4", "private", "protected", "ptrdiff_t", "public", "register", "reinterpret_cast",
    "return", "sampler", "short", "short2", "short3", "short4", "signed", "size_t", "sizeof",
    "static", "static_assert", "static_cast", "struct", "switch", "template", "texture",
    "texture1d", "texture1d_array", "texture2d", "texture2d_array", "texture2d_ms",
    "texture2d_ms_array", "texture3d", "texturecube", "texturecube_array", "this", "thread",
    "thread_local", "threadgroup", "throw", "tint_array", "true", "try", "typedef", "typeid",
    "typename", "uchar", "uchar2", "uchar3", "uchar4", "uint", "uint16_t", "uint2", "uint3",
    "uint32_t", "uint4", "uint64_t", "uint8_t", "ulong", "ulong2", "ulong3", "ulong4", "union",
    "unsigned", "ushort", "ushort2", "ushort3", "ushort4", "using", "vertex", "virtual", "void",
    "volatile", "wchar_t", "while", "xor", "xor_eq",
];

#[cfg(test)]
mod tests {
    use super::*;
    use tinct_ir::{
        AddressSpace, EntryPoint, Expression, Function, GlobalVariable, LocalKind, Scalar,
        Statement,
    };

    #[test]
    fn keyword_tables_are_sorted() {
        for table in [GLSL, HLSL, MSL] {
            assert!(table.windows(2).all(|w| w[0] < w[1]), "{:?}", table.windows(2).find(|w| w[0] >= w[1]));
        }
    }

    /// `var<private> float: f32;` read into `let half` by entry point `main`.
    fn module() -> Module {
        let mut module = Module::default();
        let f32_ty = module.scalar_type(Scalar::F32);
        let g = module
            .global_variables
            .append(GlobalVariable::new("float", AddressSpace::Private, f32_ty));
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::compute(1, 1, 1));
        let half = main.add_local("half", f32_ty, LocalKind::Let);
        main.body = vec![Statement::Declare {
            local: half,
            init: Some(Expression::load(Expression::GlobalVariable(g))),
        }];
        module.functions.append(main);
        module
    }

    fn run(module: &Module, target: Target) -> (String, RenamerData) {
        let mut inputs = DataMap::new();
        inputs.insert(RenamerConfig { target });
        let mut outputs = DataMap::new();
        let out = Renamer.apply(module, &inputs, &mut outputs).unwrap();
        tinct_ir::validate(&out).unwrap();
        assert!(!Renamer.should_run(&out, &inputs));
        let data = outputs.take::<RenamerData>().unwrap();
        (tinct_ir::dump_module(&out), data)
    }

    #[test]
    fn glsl_keywords_are_renamed() {
        let (text, data) = run(&module(), Target::GlslKeywords);
        assert!(text.contains("var<private> tint_symbol: f32;"), "{text}");
        assert_eq!(data.remappings.get("float").map(String::as_str), Some("tint_symbol"));
        assert_eq!(data.remappings.get("main").map(String::as_str), Some("tint_symbol_1"));
        assert!(text.contains("let tint_symbol_2: f32 = tint_symbol;"), "{text}");
    }

    #[test]
    fn each_target_has_its_own_keywords() {
        let (_, hlsl) = run(&module(), Target::HlslKeywords);
        assert_eq!(
            hlsl.remappings.keys().map(String::as_str).collect::<Vec<_>>(),
            ["float", "half"]
        );
        let (_, msl) = run(&module(), Target::MslKeywords);
        assert_eq!(
            msl.remappings.keys().map(String::as_str).collect::<Vec<_>>(),
            ["float", "half", "main"]
        );
    }

    #[test]
    fn glsl_reserves_prefixes() {
        assert!(Target::GlslKeywords.is_reserved("gl_Position"));
        assert!(Target::GlslKeywords.is_reserved("a__b"));
        assert!(!Target::GlslKeywords.is_reserved("position"));
    }

    #[test]
    fn glsl_builtin_io_variables_keep_their_names() {
        let mut module = module();
        let vec4 = module.vector_type(tinct_ir::VectorSize::Quad, Scalar::F32);
        let mut pos = GlobalVariable::new("gl_Position", AddressSpace::Out, vec4);
        pos.io = Some(Binding::BuiltIn(tinct_ir::BuiltIn::Position { invariant: false }));
        module.global_variables.append(pos);
        module
            .global_variables
            .append(GlobalVariable::new("gl_mine", AddressSpace::Private, vec4));
        let (text, data) = run(&module, Target::GlslKeywords);
        assert!(text.contains("var<out> gl_Position: vec4<f32>;"), "{text}");
        assert!(data.remappings.contains_key("gl_mine"));
        assert!(!data.remappings.contains_key("gl_Position"));
    }

    #[test]
    fn builtin_result_structs_keep_their_names() {
        let mut module = module();
        module.predeclared_type(
            tinct_ir::BuiltinFn::Modf,
            &TypeInner::Scalar(Scalar::F32),
        );
        let (_, data) = run(&module, Target::GlslKeywords);
        assert!(!data.remappings.contains_key("__modf_result_f32"));
        assert!(!data.remappings.contains_key("fract"));
    }

    #[test]
    fn all_renames_everything_once() {
        let (_, data) = run(&module(), Target::All);
        assert_eq!(data.remappings.len(), 3);
        assert!(data.remappings.values().all(|n| is_fresh(n)));
    }
}
