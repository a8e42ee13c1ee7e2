//! Durable key names.
//!
//! The on-disk format is exactly these nine records; nothing else is written
//! to the namespace. Key names are part of the format and must not change.

/// Consecutive unhealthy boots (u32).
pub const FAILS: &str = "fails";
/// Bitwise complement of [`FAILS`] (u32).
pub const FAILS_INV: &str = "failsInv";
/// Consecutive rollbacks without an intervening mark-healthy (u8).
pub const ROLLBACK_COUNT: &str = "rbCnt";
/// Bitwise complement of [`ROLLBACK_COUNT`] (u8).
pub const ROLLBACK_COUNT_INV: &str = "rbCntInv";
/// Label of the last-known-good slot (string).
pub const PREV_LABEL: &str = "prev";
/// CRC-32 of [`PREV_LABEL`] (u32).
pub const PREV_CRC: &str = "prevCrc";
/// Pending-action code (u8).
pub const PENDING_ACTION: &str = "pendAct";
/// Target slot label for the pending action (string, optional).
pub const PENDING_LABEL: &str = "pendLbl";
/// CRC-32 of [`PENDING_LABEL`] (u32).
pub const PENDING_CRC: &str = "pendCrc";
