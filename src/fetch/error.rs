use std::sync::Arc;

use crate::Error;

/// Which stage of the request failed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// A read produced no usable result.
    Query,
    /// A write failed.
    Mutation,
    /// Anything not already reported through an envelope.
    Unexpected,
}

/// The uniform error shape kept in observer state.
///
/// Cloneable so a snapshot can carry it; the original [`Error`] is kept as the
/// source.
#[derive(thiserror::Error, Debug, Clone)]
#[error("{message}")]
pub struct FetchError {
    pub kind: ErrorKind,
    pub message: String,
    pub code: Option<String>,
    #[source]
    pub cause: Option<Arc<Error>>,
}

impl FetchError {
    pub fn new(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            code: None,
            cause: None,
        }
    }

    pub fn is_query(&self) -> bool {
        self.kind == ErrorKind::Query
    }

    pub fn is_mutation(&self) -> bool {
        self.kind == ErrorKind::Mutation
    }
}

impl From<Error> for FetchError {
    fn from(err: Error) -> Self {
        let (kind, code) = match &err {
            Error::NoRows | Error::Query(_) => (ErrorKind::Query, None),
            Error::Mutation(_) => (ErrorKind::Mutation, None),
            Error::Unexpected { code, .. } => (ErrorKind::Unexpected, code.clone()),
            _ => (ErrorKind::Unexpected, None),
        };
        Self {
            kind,
            message: err.to_string(),
            code,
            cause: Some(Arc::new(err)),
        }
    }
}
