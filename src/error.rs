//! The engine's error taxonomy (§7).
//!
//! `StateMismatch` is deliberately absent: a lost `compare_and_append` race
//! is the expected, non-fatal outcome of optimistic concurrency and is
//! reported as `Ok(false)`, never as an `Err`.

use crate::ids::ObjectId;

#[derive(Debug, Clone, thiserror::Error)]
pub enum EngineError {
    #[error("invalid event configuration: {0}")]
    InvalidEventConfiguration(String),

    #[error("object {0:?} is not known to this universe")]
    ObjectUnknown(ObjectId),

    #[error("object {0:?} already exists")]
    ObjectAlreadyExists(ObjectId),

    #[error("append time does not strictly exceed the history's last event")]
    NonMonotonicAppend,

    #[error("append rejected: history for {0:?} is sealed (its last event destroyed the object)")]
    Resurrection(ObjectId),

    #[error("advancement failed: {0}")]
    AdvanceFailed(String),
}

pub type EngineResult<T> = Result<T, EngineError>;
