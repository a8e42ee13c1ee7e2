#![forbid(unsafe_code)]
//! Public API facade for the crg rollback guard.
//!
//! Re-exports the guard, its configuration and platform contract, and the
//! durable-store building blocks. Embedders depend on this crate and
//! implement [`Platform`] plus [`KvBackend`] over their SDK.

pub use crg_error::{CrgError, Result};
pub use crg_guard::{
    AppPartition, BootReport, Decision, LogLevel, Options, Platform, ResetReasonPredicate,
    RollbackGuard,
};
pub use crg_store::{
    KvBackend, KvSession, KvString, LabelRecord, LabelStatus, MemoryKv, PendingAction,
    PendingRecord,
};
pub use crg_types::{
    LabelError, Namespace, OtaImageState, ResetReason, SlotLabel, NAMESPACE_MAX_LEN,
    SLOT_LABEL_MAX_LEN,
};

/// Simulation platform and scripted demo, for host-side integration.
pub mod sim {
    pub use crg_guard::sim::{simulate_boot, BootOutcome, RestartSignal, SimPlatform};
}

/// Scripted crash-loop demo.
pub mod demo {
    pub use crg_guard::demo::{run_crash_loop_demo, DemoConfig, DemoResult};
}
