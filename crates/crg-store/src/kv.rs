//! Typed key-value contract over the platform's non-volatile storage.
//!
//! The platform primitive (ESP-IDF NVS or equivalent) guarantees power-cut
//! atomicity per single-key write. Sessions are short-lived open/close
//! brackets; dropping a session closes it. A `false` from a put means the
//! write was rejected and nothing durable changed for that key.

use crg_error::Result;
use crg_types::{Namespace, SLOT_LABEL_MAX_LEN};

/// Owned string value as read back from the store.
///
/// String records only ever hold slot labels, so the capacity matches the
/// label limit; longer on-disk values are truncated on read and will fail
/// their CRC check downstream.
pub type KvString = heapless::String<SLOT_LABEL_MAX_LEN>;

/// Factory for sessions against one non-volatile namespace.
pub trait KvBackend {
    /// Open a session. Fails with `CrgError::StoreUnavailable` when the
    /// underlying storage cannot be mounted or the namespace is inaccessible.
    fn open(&self, namespace: &Namespace, read_only: bool) -> Result<Box<dyn KvSession + '_>>;
}

/// One open bracket against a namespace.
///
/// Gets return `None` for an absent key or a type mismatch. Puts report
/// rejection via `false` rather than an error: callers decide per protocol
/// whether a rejected write needs compensation.
pub trait KvSession {
    fn get_u32(&mut self, key: &str) -> Option<u32>;
    fn put_u32(&mut self, key: &str, value: u32) -> bool;

    fn get_u8(&mut self, key: &str) -> Option<u8>;
    fn put_u8(&mut self, key: &str, value: u8) -> bool;

    fn get_str(&mut self, key: &str) -> Option<KvString>;
    fn put_str(&mut self, key: &str, value: &str) -> bool;

    fn contains(&mut self, key: &str) -> bool;
    fn remove(&mut self, key: &str);
}
