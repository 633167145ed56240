use tinct_transform::TransformError;

/// Errors that can occur during backend compilation.
#[derive(Debug, thiserror::Error)]
pub enum BackendError {
    /// The input uses a feature not supported by this backend.
    #[error("unsupported: {0}")]
    Unsupported(String),

    /// A sanitizer pass failed.
    #[error(transparent)]
    Transform(#[from] TransformError),

    /// The printer reached a state the sanitizer should have ruled out.
    #[error("internal compiler error: {0}")]
    Ice(String),

    /// Any other backend error.
    #[error("{0}")]
    Other(String),
}

impl BackendError {
    /// Returns `true` if the error is a compiler bug rather than a problem
    /// with the input.
    pub fn is_ice(&self) -> bool {
        match self {
            Self::Ice(_) => true,
            Self::Transform(e) => e.is_ice(),
            Self::Unsupported(_) | Self::Other(_) => false,
        }
    }
}

impl From<tinct_ir::IrError> for BackendError {
    fn from(e: tinct_ir::IrError) -> Self {
        Self::Ice(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_and_classification() {
        let e = BackendError::Unsupported("f64".into());
        assert_eq!(e.to_string(), "unsupported: f64");
        assert!(!e.is_ice());

        let e = BackendError::Ice("bad handle".into());
        assert_eq!(e.to_string(), "internal compiler error: bad handle");
        assert!(e.is_ice());

        let e: BackendError = TransformError::user("Robustness", "nope").into();
        assert_eq!(e.to_string(), "Robustness: nope");
        assert!(!e.is_ice());

        let e: BackendError = TransformError::ice("Std140", "lost a member").into();
        assert!(e.is_ice());
    }
}
