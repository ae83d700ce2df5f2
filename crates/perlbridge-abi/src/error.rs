//! Boundary Error Type
//!
//! Failures reported by an [`EmbeddingApi`](crate::EmbeddingApi)
//! implementation. A `Died` error hands the caller one reference count on
//! the error value, exactly like any other returned cell.

use thiserror::Error;

use crate::raw::{CellKind, RawSv};

/// Result type for embedding API calls
pub type AbiResult<T> = Result<T, AbiError>;

/// Embedding API error types
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AbiError {
    /// Foreign code died; the payload is the (owned) error value
    #[error("foreign code died with {0}")]
    Died(RawSv),

    /// The cell has already been freed
    #[error("{0} has already been freed")]
    FreedCell(RawSv),

    /// The cell is not of the kind the operation needs
    #[error("expected {expected} cell, found {found}")]
    WrongKind {
        /// Kind the operation required
        expected: CellKind,
        /// Kind actually found
        found: CellKind,
    },

    /// No interpreter has been constructed, or it was destructed
    #[error("interpreter is not constructed")]
    NotConstructed,

    /// Operation not supported by this implementation
    #[error("unsupported operation: {0}")]
    Unsupported(String),
}

impl AbiError {
    /// Create a wrong-kind error
    pub fn wrong_kind(expected: CellKind, found: CellKind) -> Self {
        AbiError::WrongKind { expected, found }
    }

    /// The owned error value, when foreign code died
    pub fn died_value(&self) -> Option<RawSv> {
        match self {
            AbiError::Died(sv) => Some(*sv),
            _ => None,
        }
    }
}
