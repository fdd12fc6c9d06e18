use thiserror::Error;

use crate::types::SpanKind;

pub type Result<T> = std::result::Result<T, TreeError>;

/// Reasons a span collection cannot be turned into a tree. None of them are retryable, the
/// input itself is bad.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TreeError {
    #[error("Invalid Trace: Expected 1 root span, found {candidates} root span candidates")]
    AmbiguousRoot { candidates: usize },

    #[error("Invalid Trace: Expected 1 root span, found two root span candidates ({first}, {second}) which are not a client/server pair")]
    InvalidSiblingRoot { first: String, second: String },

    #[error("Invalid Trace: Expected 1 root span, found none")]
    NoRoot,

    #[error("Invalid Trace: Both spans with id {span_id} are {}", .kind.as_str())]
    ConflictingSiblingKinds { span_id: String, kind: SpanKind },
}

impl TreeError {
    /// `NoRoot` is the zero-candidate flavour of an ambiguous root.
    pub fn is_ambiguous_root(&self) -> bool {
        matches!(self, TreeError::AmbiguousRoot { .. } | TreeError::NoRoot)
    }
}
