//! Error taxonomy for the decision-diagram engine (spec.md §7, C1–C3 slice).

use thiserror::Error;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum DdError {
    #[error("insufficient memory: could not grow the forest's backing array")]
    InsufficientMemory,

    #[error("invalid policy: {0}")]
    InvalidPolicy(String),

    #[error("type mismatch: expected {expected}, found {found}")]
    TypeMismatch { expected: &'static str, found: &'static str },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("invalid level: {0}")]
    InvalidLevel(i32),

    #[error("invalid assignment encountered while reading forest data")]
    InvalidAssignment,

    #[error("not implemented for this forest flavor: {0}")]
    NotImplemented(&'static str),

    #[error("invariant broken: {0}")]
    Miscellaneous(String),
}

pub type DdResult<T> = Result<T, DdError>;
