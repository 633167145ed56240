//! Error types for the tinct IR.

/// Errors raised while resolving types or validating a module.
#[derive(Debug, thiserror::Error, Clone, PartialEq)]
pub enum IrError {
    /// A handle index is out of bounds for its arena.
    #[error("{kind} handle index {index} out of bounds (arena size: {size})")]
    BadHandle {
        kind: &'static str,
        index: usize,
        size: usize,
    },

    /// A type mismatch was detected.
    #[error("type mismatch in '{context}': expected {expected}, found {found}")]
    TypeMismatch {
        context: String,
        expected: String,
        found: String,
    },

    /// An expression has no type (for example a call of a void function
    /// used as a value).
    #[error("expression in '{context}' has no value: {detail}")]
    NoValue { context: String, detail: String },

    /// A struct-returning builtin refers to a predeclared result struct
    /// that the module does not contain.
    #[error("missing predeclared type '{0}'")]
    MissingPredeclared(String),

    /// A structural rule of the IR is violated.
    #[error("invalid IR in '{context}': {message}")]
    Invalid { context: String, message: String },

    /// An invalid workgroup size was specified.
    #[error("invalid workgroup size: [{}, {}, {}]", .0[0], .0[1], .0[2])]
    InvalidWorkgroupSize([u32; 3]),
}

impl IrError {
    /// Shorthand for [`IrError::Invalid`].
    pub fn invalid(context: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Invalid {
            context: context.into(),
            message: message.into(),
        }
    }
}
