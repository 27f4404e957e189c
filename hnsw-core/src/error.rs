use hnsw_format::FormatError;
use std::collections::TryReserveError;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, IndexError>;

/// Coarse classification of an [`IndexError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad configuration or a dataset whose shape disagrees with it.
    Config,
    /// Operation requires a trained or loaded index.
    NotReady,
    /// Persisted state is missing, malformed or inconsistent.
    Serialization,
    /// Allocation failed while growing index storage.
    Resource,
}

#[derive(Error, Debug)]
pub enum IndexError {
    #[error("dimension mismatch in {context}: expected {expected}, got {actual}")]
    DimensionMismatch {
        context: &'static str,
        expected: i64,
        actual: i64,
    },
    #[error("invalid parameter `{field}`: {value}")]
    InvalidParameter { field: &'static str, value: String },
    #[error("dataset field `{field}` has wrong size: expected at least {expected}, got {actual}")]
    ShapeMismatch {
        field: &'static str,
        expected: u64,
        actual: u64,
    },
    #[error("index not ready: `{operation}` called on an empty index")]
    NotReady { operation: &'static str },
    #[error(transparent)]
    Format(#[from] FormatError),
    #[error("allocation failed while {context}: {source}")]
    Resource {
        context: &'static str,
        #[source]
        source: TryReserveError,
    },
}

impl IndexError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IndexError::DimensionMismatch { .. }
            | IndexError::InvalidParameter { .. }
            | IndexError::ShapeMismatch { .. } => ErrorKind::Config,
            IndexError::NotReady { .. } => ErrorKind::NotReady,
            IndexError::Format(_) => ErrorKind::Serialization,
            IndexError::Resource { .. } => ErrorKind::Resource,
        }
    }

    pub(crate) fn invalid(field: &'static str, value: impl ToString) -> Self {
        IndexError::InvalidParameter {
            field,
            value: value.to_string(),
        }
    }

    pub(crate) fn resource(context: &'static str) -> impl FnOnce(TryReserveError) -> Self {
        move |source| IndexError::Resource { context, source }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kinds_and_context() {
        let err = IndexError::DimensionMismatch {
            context: "query",
            expected: 128,
            actual: 64,
        };
        assert_eq!(err.kind(), ErrorKind::Config);
        assert_eq!(
            err.to_string(),
            "dimension mismatch in query: expected 128, got 64"
        );

        let err: IndexError = FormatError::MissingBlob("RAW_VECTORS".into()).into();
        assert_eq!(err.kind(), ErrorKind::Serialization);
        assert!(err.to_string().contains("RAW_VECTORS"));

        let err = IndexError::NotReady { operation: "count" };
        assert_eq!(err.kind(), ErrorKind::NotReady);
    }
}
