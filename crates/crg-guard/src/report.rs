//! Per-boot evidence record.

use crate::guard::Decision;
use crg_store::PendingAction;
use crg_types::ResetReason;
use serde::{Deserialize, Serialize};

/// What one `begin_early` pass observed and decided.
///
/// Purely informational: nothing reads it back into control flow. On a boot
/// that ends in a rollback reset the report never materializes, because the
/// device is already restarting.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootReport {
    pub reset_reason: ResetReason,
    pub suspicious: bool,
    /// Fail counter value after this boot's accounting.
    pub fail_count: u32,
    /// Pending action consumed during reconciliation, if any.
    pub consumed_pending: Option<PendingAction>,
    pub decision: Decision,
    /// Why a rollback path was entered, when one was.
    pub cause: Option<String>,
}

impl BootReport {
    pub(crate) fn new(reset_reason: ResetReason) -> Self {
        Self {
            reset_reason,
            suspicious: false,
            fail_count: 0,
            consumed_pending: None,
            decision: Decision::None,
            cause: None,
        }
    }

    pub fn to_json(&self) -> Result<String, serde_json::Error> {
        serde_json::to_string(self)
    }
}
