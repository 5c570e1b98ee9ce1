//! LinOpError: unified error type for fv-linop public APIs.
//!
//! Fatal kinds (communication, inconsistent pattern, unsupported fill
//! type) identify the component and the entity at fault so the outer
//! driver can abort with a usable diagnostic. Recoverable kinds
//! (backend failure, non-convergence) are returned as statuses and left
//! to the calling equation.

use thiserror::Error;

/// Unified error type for fv-linop operations.
#[derive(Debug, Error, Clone, PartialEq)]
pub enum LinOpError {
    /// A peer rank failed to deliver or accept a message.
    #[error("communication failure with rank {rank}: {detail}")]
    Communication { rank: usize, detail: String },

    /// A value was posted for a (row, col) absent from the frozen pattern.
    #[error("value posted for unregistered matrix entry (row {row}, col {col})")]
    InconsistentPattern { row: u64, col: u64 },

    /// The requested (storage, fill type) pair has no SpMV kernel.
    #[error("no {operation} kernel for {storage} storage with {fill} fill")]
    UnsupportedFillType {
        storage: &'static str,
        fill: &'static str,
        operation: &'static str,
    },

    /// An external solver library reported a failure.
    #[error("external backend `{backend}`: {detail}")]
    Backend { backend: String, detail: String },

    /// The iterative driver exhausted its iteration budget.
    #[error("solver stopped at residual {residual:e} after {iterations} iterations")]
    NonConverged { residual: f64, iterations: usize },

    /// An array argument does not match the size the structure implies.
    #[error("{what}: expected length {expected}, got {found}")]
    SizeMismatch {
        what: &'static str,
        expected: usize,
        found: usize,
    },

    /// Mesh adjacency failed a structural invariant.
    #[error("mesh adjacency invariant violated: {0}")]
    InvalidAdjacency(String),

    /// The assembler was used out of phase (e.g. values before compute).
    #[error("assembler phase error: {0}")]
    AssemblerPhase(&'static str),

    /// A global row or column has no owning rank.
    #[error("global id {id} is outside every rank's row range")]
    UnownedGlobalId { id: u64 },

    /// Coefficients were queried after `release_coefficients`.
    #[error("matrix coefficients were released and not reset")]
    CoefficientsReleased,
}

/// Shorthand used throughout the crate.
pub type Result<T> = std::result::Result<T, LinOpError>;
