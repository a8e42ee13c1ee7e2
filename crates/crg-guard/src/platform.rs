//! Platform contract consumed by the guard.
//!
//! The guard never talks to hardware directly; everything it needs from the
//! SoC — reset cause, partition table, OTA metadata, the reboot primitive and
//! a monotonic clock — comes through this trait. Production code implements
//! it over the vendor SDK; tests and demos use [`crate::sim::SimPlatform`].

use crg_error::Result;
use crg_types::{OtaImageState, ResetReason, SlotLabel};

/// Handle to one application partition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AppPartition {
    label: SlotLabel,
}

impl AppPartition {
    #[must_use]
    pub fn new(label: SlotLabel) -> Self {
        Self { label }
    }

    #[must_use]
    pub fn label(&self) -> &SlotLabel {
        &self.label
    }
}

/// Hardware and bootloader services the guard depends on.
pub trait Platform {
    /// Cause of the reset that started this boot.
    fn reset_reason(&self) -> ResetReason;

    /// The partition the current image is running from, if determinable.
    fn running_partition(&self) -> Option<AppPartition>;

    /// Look up an application partition by label.
    fn find_app_partition(&self, label: &SlotLabel) -> Option<AppPartition>;

    /// Redirect the bootloader's next-boot target.
    fn set_boot_partition(&self, partition: &AppPartition) -> Result<()>;

    /// The bootloader's OTA state for a slot, if the feature is supported.
    fn ota_state_of(&self, partition: &AppPartition) -> Option<OtaImageState>;

    /// Commit the running image and cancel a pending bootloader revert.
    fn ota_mark_valid_cancel_rollback(&self) -> Result<()>;

    /// Hardware reset. Never returns; callers must not touch local state
    /// after invoking it.
    fn restart(&self) -> !;

    /// Monotonic milliseconds since an arbitrary epoch. Wraps at `u32::MAX`;
    /// consumers must subtract with wrapping arithmetic.
    fn monotonic_millis(&self) -> u32;
}
