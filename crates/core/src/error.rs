//! Error type shared by every pass of the engine.
//!
//! Construction, refinement and optimization are all-or-nothing: when one of
//! them returns an error the graph is left exactly as it was before the pass.

use crate::graph::ObjectId;
use std::io;

/// Errors produced by the index, its passes and its persistence layer.
#[derive(Debug, thiserror::Error)]
pub enum IndexError {
    /// A vector or query does not have the index dimension. Nothing was changed.
    #[error("dimension mismatch: expected {expected}, got {actual}")]
    DimensionMismatch { expected: usize, actual: usize },

    /// A property or option is out of range or contradicts another one.
    #[error("invalid configuration for `{field}`: {reason}")]
    InvalidConfiguration { field: &'static str, reason: String },

    /// A thread or buffer could not be allocated.
    #[error("resource exhausted ({resource}): {reason}")]
    ResourceExhaustion {
        resource: &'static str,
        reason: String,
    },

    /// An internal invariant of the graph does not hold.
    #[error("corrupt graph at object {id}: {reason}")]
    CorruptGraph { id: ObjectId, reason: String },

    /// The pass observed its abort flag and stopped before completion.
    #[error("pass cancelled before object {id}")]
    Cancelled { id: ObjectId },

    /// A worker routine panicked.
    #[error("worker `{worker}` panicked: {message}")]
    WorkerPanicked { worker: String, message: String },

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("serialization error: {0}")]
    Serialization(String),
}

impl IndexError {
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        IndexError::InvalidConfiguration {
            field,
            reason: reason.into(),
        }
    }

    pub(crate) fn corrupt(id: ObjectId, reason: impl Into<String>) -> Self {
        IndexError::CorruptGraph {
            id,
            reason: reason.into(),
        }
    }
}

impl From<bincode::Error> for IndexError {
    fn from(e: bincode::Error) -> Self {
        IndexError::Serialization(e.to_string())
    }
}

/// Result alias used throughout the crate.
pub type Result<T> = std::result::Result<T, IndexError>;
