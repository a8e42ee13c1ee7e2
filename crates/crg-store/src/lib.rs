#![forbid(unsafe_code)]
//! Durable state store for the crg rollback guard.
//!
//! Everything the guard persists lives in nine key-value records inside one
//! NVS namespace: a complement-mirrored fail counter, a complement-mirrored
//! rollback counter, a CRC-tagged previous-slot label, and a pending-action
//! record. The platform primitive guarantees power-cut atomicity only for
//! single-key writes; the multi-key protocols in [`counter`] and [`pending`]
//! are ordered so that any interruption leaves state self-detectable and
//! recoverable on the next boot.
//!
//! # Recovery bias
//!
//! Every repair path recovers toward "no failures recorded". Under-counting
//! delays a rollback by one boot; over-counting would trigger a spurious one.

pub mod counter;
pub mod crc;
pub mod keys;
pub mod kv;
pub mod label;
pub mod memory;
pub mod pending;

pub use counter::{RedundantCounter, FAIL_COUNTER, ROLLBACK_COUNTER, ROLLBACK_COUNT_MAX};
pub use crc::label_crc;
pub use kv::{KvBackend, KvSession, KvString};
pub use label::{LabelRecord, LabelStatus, PREV_SLOT};
pub use memory::MemoryKv;
pub use pending::{PendingAction, PendingRecord};
