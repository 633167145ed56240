//! Display implementations and a WGSL-flavoured text dump for debugging.

use std::fmt::{self, Write as _};

use crate::Module;
use crate::arena::UniqueArena;
use crate::expr::{BinaryOp, Expression, Literal, SwizzleComponent, UnaryOp};
use crate::func::{Function, LocalKind, ShaderStage, WorkgroupDim};
use crate::global::{AddressSpace, Binding, BindingPoint, BuiltIn, Interpolation, Sampling, StorageAccess};
use crate::stmt::{Barrier, CaseSelector, Statement};
use crate::typifier::ResolveContext;
use crate::types::{
    ArraySize, Scalar, ScalarKind, TextureClass, TextureDimension, Type, TypeInner, VectorSize,
};

impl fmt::Display for Scalar {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.kind {
            ScalarKind::Bool => write!(f, "bool"),
            ScalarKind::Sint => write!(f, "i{}", self.width * 8),
            ScalarKind::Uint => write!(f, "u{}", self.width * 8),
            ScalarKind::Float => write!(f, "f{}", self.width * 8),
        }
    }
}

impl fmt::Display for VectorSize {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.count())
    }
}

impl fmt::Display for StorageAccess {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (self.contains(Self::LOAD), self.contains(Self::STORE)) {
            (true, true) => write!(f, "read_write"),
            (true, false) => write!(f, "read"),
            (false, true) => write!(f, "write"),
            (false, false) => write!(f, "none"),
        }
    }
}

impl fmt::Display for AddressSpace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Function => "function",
            Self::Private => "private",
            Self::Workgroup => "workgroup",
            Self::Uniform => "uniform",
            Self::Storage => "storage",
            Self::Handle => "handle",
            Self::PushConstant => "push_constant",
            Self::In => "in",
            Self::Out => "out",
        };
        f.write_str(name)
    }
}

impl fmt::Display for BuiltIn {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Position { .. } => "position",
            Self::VertexIndex => "vertex_index",
            Self::InstanceIndex => "instance_index",
            Self::PointSize => "point_size",
            Self::FrontFacing => "front_facing",
            Self::FragDepth => "frag_depth",
            Self::SampleIndex => "sample_index",
            Self::SampleMask => "sample_mask",
            Self::LocalInvocationId => "local_invocation_id",
            Self::LocalInvocationIndex => "local_invocation_index",
            Self::GlobalInvocationId => "global_invocation_id",
            Self::WorkgroupId => "workgroup_id",
            Self::NumWorkgroups => "num_workgroups",
        };
        f.write_str(name)
    }
}

impl fmt::Display for Binding {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            Self::BuiltIn(b) => {
                write!(f, "@builtin({b})")?;
                if let BuiltIn::Position { invariant: true } = b {
                    write!(f, " @invariant")?;
                }
                Ok(())
            }
            Self::Location {
                location,
                interpolation,
                sampling,
                blend_src,
            } => {
                write!(f, "@location({location})")?;
                if let Some(interp) = interpolation {
                    let i = match interp {
                        Interpolation::Perspective => "perspective",
                        Interpolation::Linear => "linear",
                        Interpolation::Flat => "flat",
                    };
                    match sampling {
                        Some(s) => {
                            let s = match s {
                                Sampling::Center => "center",
                                Sampling::Centroid => "centroid",
                                Sampling::Sample => "sample",
                            };
                            write!(f, " @interpolate({i}, {s})")?;
                        }
                        None => write!(f, " @interpolate({i})")?,
                    }
                }
                if let Some(src) = blend_src {
                    write!(f, " @blend_src({src})")?;
                }
                Ok(())
            }
        }
    }
}

impl fmt::Display for BindingPoint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "@group({}) @binding({})", self.group, self.binding)
    }
}

impl fmt::Display for Literal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Bool(v) => write!(f, "{v}"),
            Self::I32(v) => write!(f, "{v}i"),
            Self::U32(v) => write!(f, "{v}u"),
            Self::F32(v) => write!(f, "{v}f"),
            Self::F16(v) => write!(f, "{v}h"),
        }
    }
}

impl fmt::Display for UnaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Negate => write!(f, "-"),
            Self::LogicalNot => write!(f, "!"),
            Self::BitwiseNot => write!(f, "~"),
        }
    }
}

impl fmt::Display for BinaryOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let op = match self {
            Self::Add => "+",
            Self::Subtract => "-",
            Self::Multiply => "*",
            Self::Divide => "/",
            Self::Modulo => "%",
            Self::Equal => "==",
            Self::NotEqual => "!=",
            Self::Less => "<",
            Self::LessEqual => "<=",
            Self::Greater => ">",
            Self::GreaterEqual => ">=",
            Self::LogicalAnd => "&&",
            Self::LogicalOr => "||",
            Self::BitwiseAnd => "&",
            Self::BitwiseOr => "|",
            Self::BitwiseXor => "^",
            Self::ShiftLeft => "<<",
            Self::ShiftRight => ">>",
        };
        f.write_str(op)
    }
}

impl fmt::Display for SwizzleComponent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.letter())
    }
}

impl fmt::Display for ShaderStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Vertex => write!(f, "vertex"),
            Self::Fragment => write!(f, "fragment"),
            Self::Compute => write!(f, "compute"),
        }
    }
}

impl fmt::Display for Barrier {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut names = Vec::new();
        if self.contains(Barrier::WORKGROUP) {
            names.push("workgroupBarrier");
        }
        if self.contains(Barrier::STORAGE) {
            names.push("storageBarrier");
        }
        if self.contains(Barrier::TEXTURE) {
            names.push("textureBarrier");
        }
        if names.is_empty() {
            return write!(f, "<no barrier>");
        }
        write!(f, "{}", names.join(" | "))
    }
}

fn dim_suffix(dim: TextureDimension) -> &'static str {
    match dim {
        TextureDimension::D1 => "1d",
        TextureDimension::D2 => "2d",
        TextureDimension::D2Array => "2d_array",
        TextureDimension::D3 => "3d",
        TextureDimension::Cube => "cube",
        TextureDimension::CubeArray => "cube_array",
    }
}

/// Formats a type using the type arena for resolving inner references.
pub fn format_type(ty: &Type, types: &UniqueArena<Type>) -> String {
    if let Some(ref name) = ty.name {
        return name.clone();
    }
    format_type_inner(&ty.inner, types)
}

/// Formats a [`TypeInner`] using the type arena for resolving references.
pub fn format_type_inner(inner: &TypeInner, types: &UniqueArena<Type>) -> String {
    let named = |h: crate::Handle<Type>| match types.try_get(h) {
        Some(ty) => format_type(ty, types),
        None => format!("<bad type {h:?}>"),
    };
    match *inner {
        TypeInner::Scalar(s) => format!("{s}"),
        TypeInner::Vector { size, scalar } => format!("vec{size}<{scalar}>"),
        TypeInner::Matrix {
            columns,
            rows,
            scalar,
        } => format!("mat{columns}x{rows}<{scalar}>"),
        TypeInner::Atomic(s) => format!("atomic<{s}>"),
        TypeInner::Pointer {
            base,
            space,
            access,
        } => format!("ptr<{space}, {}, {access}>", named(base)),
        TypeInner::ValuePointer {
            size,
            scalar,
            space,
            access,
        } => match size {
            Some(size) => format!("ptr<{space}, vec{size}<{scalar}>, {access}>"),
            None => format!("ptr<{space}, {scalar}, {access}>"),
        },
        TypeInner::Array { base, size, .. } => match size {
            ArraySize::Constant(n) => format!("array<{}, {n}>", named(base)),
            ArraySize::Runtime => format!("array<{}>", named(base)),
        },
        TypeInner::Struct { ref members, .. } => format!("struct({} members)", members.len()),
        TypeInner::Sampler { comparison: false } => "sampler".into(),
        TypeInner::Sampler { comparison: true } => "sampler_comparison".into(),
        TypeInner::Texture { dim, class } => {
            let d = dim_suffix(dim);
            match class {
                TextureClass::Sampled(kind) => format!("texture_{d}<{}>", kind.scalar()),
                TextureClass::Depth => format!("texture_depth_{d}"),
                TextureClass::Multisampled(kind) => {
                    format!("texture_multisampled_{d}<{}>", kind.scalar())
                }
                TextureClass::DepthMultisampled => format!("texture_depth_multisampled_{d}"),
                TextureClass::Storage { format, access } => {
                    format!("texture_storage_{d}<{}, {access}>", format.wgsl_name())
                }
                TextureClass::External => "texture_external".into(),
            }
        }
    }
}

struct Dumper<'a> {
    module: &'a Module,
    function: Option<&'a Function>,
}

impl Dumper<'_> {
    fn ty(&self, h: crate::Handle<Type>) -> String {
        match self.module.types.try_get(h) {
            Some(ty) => format_type(ty, &self.module.types),
            None => format!("<bad type {h:?}>"),
        }
    }

    fn member_name(&self, base: &Expression, index: u32) -> Option<String> {
        let ctx = match self.function {
            Some(f) => ResolveContext::new(self.module, f),
            None => ResolveContext::module_scope(self.module),
        };
        let inner = ctx.resolve_pointee(base).ok()?;
        match inner {
            TypeInner::Struct { ref members, .. } => {
                members.get(index as usize).map(|m| m.name.clone())
            }
            _ => None,
        }
    }

    fn is_reference(&self, expr: &Expression) -> bool {
        match *expr {
            Expression::GlobalVariable(g) => self
                .module
                .global_variables
                .try_get(g)
                .is_some_and(|v| v.space != AddressSpace::Handle),
            Expression::LocalVariable(l) => self
                .function
                .and_then(|f| f.locals.try_get(l))
                .is_some_and(|l| l.kind == LocalKind::Var),
            Expression::Access { ref base, .. } | Expression::AccessIndex { ref base, .. } => {
                self.is_reference(base)
            }
            _ => false,
        }
    }

    /// An expression in value position: references are taken with `&`.
    fn expr(&self, expr: &Expression) -> String {
        if self.is_reference(expr) {
            format!("&{}", self.place(expr))
        } else {
            self.place(expr)
        }
    }

    fn list(&self, exprs: &[Expression]) -> String {
        exprs
            .iter()
            .map(|e| self.expr(e))
            .collect::<Vec<_>>()
            .join(", ")
    }

    fn place(&self, expr: &Expression) -> String {
        match *expr {
            Expression::Literal(lit) => lit.to_string(),
            Expression::ZeroValue(ty) => format!("{}()", self.ty(ty)),
            Expression::Compose { ty, ref components } => {
                format!("{}({})", self.ty(ty), self.list(components))
            }
            Expression::Splat { size, ref value } => format!("vec{size}({})", self.expr(value)),
            Expression::Swizzle {
                ref vector,
                ref pattern,
            } => {
                let letters: String = pattern.iter().map(|c| c.letter()).collect();
                format!("{}.{letters}", self.expr(vector))
            }
            Expression::FunctionArgument(i) => self
                .function
                .and_then(|f| f.arguments.get(i as usize))
                .map(|a| a.name.clone())
                .unwrap_or_else(|| format!("arg{i}")),
            Expression::GlobalVariable(h) => self
                .module
                .global_variables
                .try_get(h)
                .map(|g| g.name.clone())
                .unwrap_or_else(|| format!("global{h:?}")),
            Expression::LocalVariable(h) => self
                .function
                .and_then(|f| f.locals.try_get(h))
                .map(|l| l.name.clone())
                .unwrap_or_else(|| format!("local{h:?}")),
            Expression::Override(h) => self
                .module
                .overrides
                .try_get(h)
                .map(|o| o.name.clone())
                .unwrap_or_else(|| format!("override{h:?}")),
            Expression::Load { ref pointer } => {
                if self.is_reference(pointer) {
                    self.place(pointer)
                } else {
                    format!("(*{})", self.place(pointer))
                }
            }
            Expression::Access {
                ref base,
                ref index,
            } => format!("{}[{}]", self.place(base), self.expr(index)),
            Expression::AccessIndex { ref base, index } => match self.member_name(base, index) {
                Some(member) => format!("{}.{member}", self.place(base)),
                None => format!("{}[{index}]", self.place(base)),
            },
            Expression::Unary { op, ref expr } => format!("({op}{})", self.expr(expr)),
            Expression::Binary {
                op,
                ref left,
                ref right,
            } => format!("({} {op} {})", self.expr(left), self.expr(right)),
            Expression::Convert { ref expr, ty } => format!("{}({})", self.ty(ty), self.expr(expr)),
            Expression::Bitcast { ref expr, ty } => {
                format!("bitcast<{}>({})", self.ty(ty), self.expr(expr))
            }
            Expression::Call {
                function,
                ref arguments,
            } => {
                let name = self
                    .module
                    .functions
                    .try_get(function)
                    .map(|f| f.name.clone())
                    .unwrap_or_else(|| format!("function{function:?}"));
                format!("{name}({})", self.list(arguments))
            }
            Expression::Builtin { fun, ref arguments } => {
                format!("{}({})", fun.wgsl_name(), self.list(arguments))
            }
            Expression::Texture(ref call) => {
                let args: Vec<String> = call.operands().map(|e| self.expr(e)).collect();
                format!("{}({})", call.fun.wgsl_name(), args.join(", "))
            }
        }
    }

    fn block(&self, out: &mut String, block: &[Statement], indent: usize) {
        for stmt in block {
            self.stmt(out, stmt, indent);
        }
    }

    fn stmt(&self, out: &mut String, stmt: &Statement, indent: usize) {
        let pad = " ".repeat(indent);
        match stmt {
            Statement::Declare { local, init } => {
                let (keyword, name, ty) = match self.function.and_then(|f| f.locals.try_get(*local)) {
                    Some(l) => (
                        if l.kind == LocalKind::Let { "let" } else { "var" },
                        l.name.clone(),
                        self.ty(l.ty),
                    ),
                    None => ("var", format!("local{local:?}"), "?".into()),
                };
                let _ = match init {
                    Some(e) => writeln!(out, "{pad}{keyword} {name}: {ty} = {};", self.expr(e)),
                    None => writeln!(out, "{pad}{keyword} {name}: {ty};"),
                };
            }
            Statement::Store { pointer, value } => {
                let target = if self.is_reference(pointer) {
                    self.place(pointer)
                } else {
                    format!("*{}", self.place(pointer))
                };
                let _ = writeln!(out, "{pad}{target} = {};", self.expr(value));
            }
            Statement::Call(e) => {
                let _ = writeln!(out, "{pad}{};", self.expr(e));
            }
            Statement::If {
                condition,
                accept,
                reject,
            } => {
                let _ = writeln!(out, "{pad}if {} {{", self.expr(condition));
                self.block(out, accept, indent + 4);
                if !reject.is_empty() {
                    let _ = writeln!(out, "{pad}}} else {{");
                    self.block(out, reject, indent + 4);
                }
                let _ = writeln!(out, "{pad}}}");
            }
            Statement::Loop {
                body,
                continuing,
                break_if,
            } => {
                let _ = writeln!(out, "{pad}loop {{");
                self.block(out, body, indent + 4);
                if !continuing.is_empty() || break_if.is_some() {
                    let _ = writeln!(out, "{pad}    continuing {{");
                    self.block(out, continuing, indent + 8);
                    if let Some(cond) = break_if {
                        let _ = writeln!(out, "{pad}        break if {};", self.expr(cond));
                    }
                    let _ = writeln!(out, "{pad}    }}");
                }
                let _ = writeln!(out, "{pad}}}");
            }
            Statement::Switch { selector, cases } => {
                let _ = writeln!(out, "{pad}switch {} {{", self.expr(selector));
                for case in cases {
                    let selectors: Vec<String> = case
                        .selectors
                        .iter()
                        .map(|s| match s {
                            CaseSelector::I32(v) => format!("{v}i"),
                            CaseSelector::U32(v) => format!("{v}u"),
                            CaseSelector::Default => "default".into(),
                        })
                        .collect();
                    let _ = writeln!(out, "{pad}    case {}: {{", selectors.join(", "));
                    self.block(out, &case.body, indent + 8);
                    let _ = writeln!(out, "{pad}    }}");
                }
                let _ = writeln!(out, "{pad}}}");
            }
            Statement::Break => {
                let _ = writeln!(out, "{pad}break;");
            }
            Statement::Continue => {
                let _ = writeln!(out, "{pad}continue;");
            }
            Statement::Return { value } => {
                let _ = match value {
                    Some(v) => writeln!(out, "{pad}return {};", self.expr(v)),
                    None => writeln!(out, "{pad}return;"),
                };
            }
            Statement::Discard => {
                let _ = writeln!(out, "{pad}discard;");
            }
            Statement::Barrier(b) => {
                let _ = writeln!(out, "{pad}{b}();");
            }
            Statement::Block(b) => {
                let _ = writeln!(out, "{pad}{{");
                self.block(out, b, indent + 4);
                let _ = writeln!(out, "{pad}}}");
            }
        }
    }

    fn function(&self, out: &mut String, func: &Function) {
        if let Some(ep) = func.entry_point.as_ref() {
            let _ = write!(out, "@{}", ep.stage);
            if ep.stage == ShaderStage::Compute {
                let dims: Vec<String> = ep
                    .workgroup_size
                    .iter()
                    .map(|d| match *d {
                        WorkgroupDim::Literal(v) => v.to_string(),
                        WorkgroupDim::Override(o) => self
                            .module
                            .overrides
                            .try_get(o)
                            .map(|o| o.name.clone())
                            .unwrap_or_else(|| format!("override{o:?}")),
                    })
                    .collect();
                let _ = write!(out, " @workgroup_size({})", dims.join(", "));
            }
            if ep.early_depth_test {
                let _ = write!(out, " @early_depth_test");
            }
            out.push('\n');
        }
        let args: Vec<String> = func
            .arguments
            .iter()
            .map(|a| match a.binding {
                Some(ref b) => format!("{b} {}: {}", a.name, self.ty(a.ty)),
                None => format!("{}: {}", a.name, self.ty(a.ty)),
            })
            .collect();
        let ret = match func.result {
            Some(ref r) => match r.binding {
                Some(ref b) => format!(" -> {b} {}", self.ty(r.ty)),
                None => format!(" -> {}", self.ty(r.ty)),
            },
            None => String::new(),
        };
        let _ = writeln!(out, "fn {}({}){ret} {{", func.name, args.join(", "));
        self.block(out, &func.body, 4);
        out.push_str("}\n");
    }
}

/// Produces a WGSL-flavoured text dump of one function.
pub fn dump_function(module: &Module, func: &Function) -> String {
    let mut out = String::new();
    Dumper {
        module,
        function: Some(func),
    }
    .function(&mut out, func);
    out
}

/// Produces a WGSL-flavoured text dump of a [`Module`] for debugging.
///
/// Loads through references are implicit as in WGSL. References in value
/// position print with `&`, and loads through pointer values with `*`.
pub fn dump_module(module: &Module) -> String {
    let mut out = String::new();
    let scope = Dumper {
        module,
        function: None,
    };

    for (_, ty) in module.types.iter() {
        let (Some(name), TypeInner::Struct { members, span }) = (&ty.name, &ty.inner) else {
            continue;
        };
        let _ = writeln!(out, "struct {name} {{ // span {span}");
        for m in members {
            let binding = m.binding.map(|b| format!(" {b}")).unwrap_or_default();
            let _ = writeln!(
                out,
                "    @offset({}){binding} {}: {},",
                m.offset,
                m.name,
                scope.ty(m.ty)
            );
        }
        out.push_str("}\n\n");
    }

    for (_, o) in module.overrides.iter() {
        let id = o.id.map(|id| format!("@id({id}) ")).unwrap_or_default();
        let _ = match o.init {
            Some(ref init) => writeln!(
                out,
                "{id}override {}: {} = {};",
                o.name,
                scope.ty(o.ty),
                scope.expr(init)
            ),
            None => writeln!(out, "{id}override {}: {};", o.name, scope.ty(o.ty)),
        };
    }

    for (_, var) in module.global_variables.iter() {
        let mut attrs = String::new();
        if let Some(bp) = var.binding {
            let _ = write!(attrs, "{bp} ");
        }
        if let Some(io) = var.io {
            let _ = write!(attrs, "{io} ");
        }
        let space = match var.space {
            AddressSpace::Handle => String::new(),
            AddressSpace::Storage => format!("<storage, {}>", var.access),
            other => format!("<{other}>"),
        };
        let init = var
            .init
            .as_ref()
            .map(|e| format!(" = {}", scope.expr(e)))
            .unwrap_or_default();
        let _ = writeln!(
            out,
            "{attrs}var{space} {}: {}{init};",
            var.name,
            scope.ty(var.ty)
        );
    }
    if !module.overrides.is_empty() || !module.global_variables.is_empty() {
        out.push('\n');
    }

    for (_, func) in module.functions.iter() {
        Dumper {
            module,
            function: Some(func),
        }
        .function(&mut out, func);
        out.push('\n');
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::func::{EntryPoint, FunctionArgument};
    use crate::global::GlobalVariable;

    #[test]
    fn display_scalars_and_spaces() {
        assert_eq!(Scalar::F16.to_string(), "f16");
        assert_eq!(Scalar::BOOL.to_string(), "bool");
        assert_eq!(AddressSpace::PushConstant.to_string(), "push_constant");
        assert_eq!(StorageAccess::LOAD_STORE.to_string(), "read_write");
    }

    #[test]
    fn display_bindings() {
        assert_eq!(
            Binding::BuiltIn(BuiltIn::Position { invariant: true }).to_string(),
            "@builtin(position) @invariant"
        );
        let flat = Binding::Location {
            location: 2,
            interpolation: Some(Interpolation::Flat),
            sampling: None,
            blend_src: None,
        };
        assert_eq!(flat.to_string(), "@location(2) @interpolate(flat)");
        assert_eq!(BindingPoint::new(1, 3).to_string(), "@group(1) @binding(3)");
    }

    #[test]
    fn display_literals() {
        assert_eq!(Literal::F32(0.5).to_string(), "0.5f");
        assert_eq!(Literal::U32(31).to_string(), "31u");
        assert_eq!(Literal::I32(-2).to_string(), "-2i");
    }

    #[test]
    fn barrier_names() {
        assert_eq!(
            (Barrier::WORKGROUP | Barrier::STORAGE).to_string(),
            "workgroupBarrier | storageBarrier"
        );
    }

    #[test]
    fn texture_type_names() {
        let types = UniqueArena::new();
        let t = TypeInner::Texture {
            dim: TextureDimension::D2Array,
            class: TextureClass::Depth,
        };
        assert_eq!(format_type_inner(&t, &types), "texture_depth_2d_array");
    }

    #[test]
    fn dump_compute_shader() {
        let mut module = Module::default();
        let f32_ty = module.scalar_type(Scalar::F32);
        let arr = module.runtime_array_type(f32_ty);
        let s = module.struct_type("Buf", &[("data", arr)]);
        let vec3u = module.vector_type(VectorSize::Tri, Scalar::U32);
        let g = module.global_variables.append(
            GlobalVariable::new("buf", AddressSpace::Storage, s).with_binding(0, 1),
        );
        let mut main = Function::new("main");
        main.entry_point = Some(EntryPoint::compute(64, 1, 1));
        main.arguments.push(FunctionArgument {
            name: "gid".into(),
            ty: vec3u,
            binding: Some(Binding::BuiltIn(BuiltIn::GlobalInvocationId)),
        });
        let elem = Expression::access(
            Expression::access_index(Expression::GlobalVariable(g), 0),
            Expression::access_index(Expression::FunctionArgument(0), 0),
        );
        main.body.push(Statement::store(
            elem.clone(),
            Expression::binary(BinaryOp::Multiply, Expression::load(elem), Expression::f32(2.0)),
        ));
        module.functions.append(main);

        let dump = dump_module(&module);
        assert!(dump.contains("struct Buf {"));
        assert!(dump.contains("@group(0) @binding(1) var<storage, read_write> buf: Buf;"));
        assert!(dump.contains("@compute @workgroup_size(64, 1, 1)"));
        assert!(dump.contains("fn main(@builtin(global_invocation_id) gid: vec3<u32>) {"));
        assert!(dump.contains("    buf.data[gid[0]] = (buf.data[gid[0]] * 2f);"));
    }
}
