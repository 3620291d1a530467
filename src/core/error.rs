//! Core validation errors.
//!
//! Bounded and stable: these represent domain refusal states, not
//! implementation details.

use thiserror::Error;

/// Invalid identifier.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum InvalidId {
    #[error("node id `{raw}` is invalid: {reason}")]
    Node { raw: String, reason: String },
    #[error("cluster id `{raw}` is invalid: {reason}")]
    Cluster { raw: String, reason: String },
    #[error("peer address `{raw}` is invalid: {reason}")]
    Addr { raw: String, reason: String },
    #[error("app state key `{raw}` is invalid: {reason}")]
    AppStateKey { raw: String, reason: String },
}

/// Canonical error enum for the core layer.
#[derive(Debug, Error, Clone)]
#[non_exhaustive]
pub enum CoreError {
    #[error(transparent)]
    InvalidId(#[from] InvalidId),
}
