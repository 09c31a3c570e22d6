//! Error types.
//!
//! The engine is deliberately forgiving on the read side (a miss is a miss,
//! and it is still tracked) and on read-only violations (a diagnostic and a
//! no-op, never a failure). Errors are reserved for mutating operations
//! applied to a record of the wrong kind, where silently doing nothing
//! would hide a real bug in the caller.

use thiserror::Error;

use crate::target::TargetKind;

/// Errors returned by mutating operations on observation wrappers.
#[derive(Debug, Error)]
pub enum Error {
    /// A mutating operation was applied to a record kind that does not
    /// support it, e.g. `push` on a plain object or `insert` on an array.
    #[error("`{op}` is not supported on a {kind:?} target")]
    UnsupportedOp {
        op: &'static str,
        kind: TargetKind,
    },

    /// An array `length` write with a non-numeric or negative value.
    #[error("array length must be a non-negative number")]
    InvalidLength,
}

pub type Result<T, E = Error> = std::result::Result<T, E>;
