//! Functions, entry points, and local variables.

use crate::arena::{Arena, Handle};
use crate::global::{Binding, Override};
use crate::stmt::Block;
use crate::types::Type;

/// A function argument declaration.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionArgument {
    pub name: String,
    pub ty: Handle<Type>,
    /// Shader IO attribute (entry points only).
    pub binding: Option<Binding>,
}

/// The return type and optional IO attribute of a function.
#[derive(Clone, Debug, PartialEq)]
pub struct FunctionResult {
    pub ty: Handle<Type>,
    pub binding: Option<Binding>,
}

/// Whether a local is a mutable `var` or an immutable `let`.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum LocalKind {
    /// A `var`: references evaluate to a function-space pointer.
    Var,
    /// A `let`: references evaluate to the bound value.
    Let,
}

/// A function-local variable, introduced by a `Declare` statement.
#[derive(Clone, Debug, PartialEq)]
pub struct LocalVariable {
    pub name: String,
    pub ty: Handle<Type>,
    pub kind: LocalKind,
}

/// Pipeline stage of an entry point.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum ShaderStage {
    Vertex,
    Fragment,
    Compute,
}

/// One dimension of a compute workgroup size.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub enum WorkgroupDim {
    Literal(u32),
    Override(Handle<Override>),
}

/// Stage attributes of an entry-point function.
#[derive(Clone, Debug, PartialEq)]
pub struct EntryPoint {
    pub stage: ShaderStage,
    /// Meaningful for compute only.
    pub workgroup_size: [WorkgroupDim; 3],
    /// `@early_depth_test` for fragment shaders.
    pub early_depth_test: bool,
}

impl EntryPoint {
    /// A vertex or fragment entry point.
    pub fn graphics(stage: ShaderStage) -> Self {
        Self {
            stage,
            workgroup_size: [WorkgroupDim::Literal(1); 3],
            early_depth_test: false,
        }
    }

    /// A compute entry point with a literal workgroup size.
    pub fn compute(x: u32, y: u32, z: u32) -> Self {
        Self {
            stage: ShaderStage::Compute,
            workgroup_size: [
                WorkgroupDim::Literal(x),
                WorkgroupDim::Literal(y),
                WorkgroupDim::Literal(z),
            ],
            early_depth_test: false,
        }
    }

    /// The literal workgroup size, or `None` if any dimension is an override.
    pub fn literal_workgroup_size(&self) -> Option<[u32; 3]> {
        let mut out = [0; 3];
        for (slot, dim) in out.iter_mut().zip(self.workgroup_size) {
            match dim {
                WorkgroupDim::Literal(v) => *slot = v,
                WorkgroupDim::Override(_) => return None,
            }
        }
        Some(out)
    }
}

/// An IR function.
#[derive(Clone, Debug, PartialEq)]
pub struct Function {
    pub name: String,
    pub arguments: Vec<FunctionArgument>,
    pub result: Option<FunctionResult>,
    pub locals: Arena<LocalVariable>,
    pub body: Block,
    /// Set for entry points.
    pub entry_point: Option<EntryPoint>,
}

impl Function {
    /// Creates an empty function with the given name.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            arguments: Vec::new(),
            result: None,
            locals: Arena::new(),
            body: Vec::new(),
            entry_point: None,
        }
    }

    /// Returns `true` if this function is a pipeline entry point.
    pub fn is_entry_point(&self) -> bool {
        self.entry_point.is_some()
    }

    /// The pipeline stage, for entry points.
    pub fn stage(&self) -> Option<ShaderStage> {
        self.entry_point.as_ref().map(|ep| ep.stage)
    }

    /// Adds a local variable and returns its handle. The caller is
    /// responsible for emitting its `Declare` statement.
    pub fn add_local(&mut self, name: impl Into<String>, ty: Handle<Type>, kind: LocalKind) -> Handle<LocalVariable> {
        self.locals.append(LocalVariable {
            name: name.into(),
            ty,
            kind,
        })
    }
}
