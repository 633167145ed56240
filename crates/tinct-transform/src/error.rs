//! Errors raised by transforms.

use tinct_ir::IrError;

/// Why a transform could not produce a module.
#[derive(Debug, thiserror::Error)]
pub enum TransformError {
    /// A pass hit a state it should never see. This is a compiler bug.
    #[error("internal compiler error: {pass}: {message}")]
    Ice { pass: &'static str, message: String },

    /// The input is valid IR that the pass cannot lower for this target.
    #[error("{pass}: {message}")]
    User { pass: &'static str, message: String },

    /// A case the pass assumed impossible was reached.
    #[error("internal compiler error: {pass}: unreachable: {message}")]
    Unreachable { pass: &'static str, message: String },

    /// Configuration that the pass requires was not supplied.
    #[error("{pass}: missing transform data: {what}")]
    MissingData { pass: &'static str, what: String },

    /// The pass produced a module that fails validation.
    #[error("internal compiler error: {pass} produced invalid IR: {source}")]
    Invalid {
        pass: &'static str,
        #[source]
        source: IrError,
    },

    /// A pass was registered in an order its dependencies forbid.
    #[error("transform '{pass}' must run before '{before}'")]
    Ordering {
        pass: &'static str,
        before: &'static str,
    },

    /// Type resolution failed while rewriting.
    #[error("internal compiler error: {0}")]
    Ir(#[from] IrError),
}

impl TransformError {
    pub fn ice(pass: &'static str, message: impl Into<String>) -> Self {
        Self::Ice {
            pass,
            message: message.into(),
        }
    }

    pub fn user(pass: &'static str, message: impl Into<String>) -> Self {
        Self::User {
            pass,
            message: message.into(),
        }
    }

    pub fn missing(pass: &'static str, what: impl Into<String>) -> Self {
        Self::MissingData {
            pass,
            what: what.into(),
        }
    }

    /// Returns `true` for errors that indicate a compiler bug rather than
    /// a problem with the input.
    pub fn is_ice(&self) -> bool {
        matches!(
            self,
            Self::Ice { .. } | Self::Unreachable { .. } | Self::Invalid { .. } | Self::Ir(_)
        )
    }
}
