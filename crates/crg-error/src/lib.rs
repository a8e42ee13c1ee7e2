#![forbid(unsafe_code)]
//! Error types for the crg rollback guard.
//!
//! Defines `CrgError` and a `Result<T>` alias used throughout the workspace.
//! Most corruption conditions are handled in place by clearing or repairing
//! the offending record; `CrgError` covers the seams where a caller has to
//! change course (store unavailable, partition lookup, boot switch).

use crg_types::{LabelError, SlotLabel};
use thiserror::Error;

/// Unified error type for all crg operations.
#[derive(Debug, Error)]
pub enum CrgError {
    #[error("cannot open NVS namespace '{namespace}': {detail}")]
    StoreUnavailable { namespace: String, detail: String },

    #[error("write attempted through a read-only session")]
    ReadOnlyStore,

    #[error("no app partition labeled '{0}'")]
    PartitionNotFound(SlotLabel),

    #[error("boot partition switch to '{0}' rejected")]
    SwitchFailed(SlotLabel),

    #[error("marking running image valid failed: {detail}")]
    OtaValidateFailed { detail: String },

    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    #[error(transparent)]
    Label(#[from] LabelError),
}

/// Result alias using `CrgError`.
pub type Result<T> = std::result::Result<T, CrgError>;
