//! Scripted platform for host-side tests and demos.
//!
//! `SimPlatform` plays the role of the SoC: a settable reset cause and
//! millisecond clock, a partition table with per-slot OTA states, and a
//! recorded boot target. `restart()` has to diverge, so it unwinds with a
//! [`RestartSignal`] payload; [`simulate_boot`] catches exactly that payload
//! and reports the boot as `Restarted`, the way the real device would come
//! back up through the bootloader.

use crate::guard::{Decision, RollbackGuard};
use crate::platform::{AppPartition, Platform};
use crg_error::{CrgError, Result};
use crg_types::{OtaImageState, ResetReason, SlotLabel};
use parking_lot::Mutex;
use std::panic::{catch_unwind, resume_unwind, AssertUnwindSafe};
use std::sync::Arc;

/// Unwind payload used by [`SimPlatform::restart`].
pub struct RestartSignal;

/// How one simulated `begin_early` ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BootOutcome {
    /// `begin_early` returned normally.
    Completed(Decision),
    /// The guard switched the boot target and reset the hardware.
    Restarted,
}

struct SimPartition {
    label: SlotLabel,
    state: OtaImageState,
}

struct SimState {
    reset_reason: ResetReason,
    millis: u32,
    partitions: Vec<SimPartition>,
    running: Option<SlotLabel>,
    boot_target: Option<SlotLabel>,
    restart_count: u32,
    reject_switch: bool,
    reject_ota_validate: bool,
    ota_validated: bool,
}

/// Scripted implementation of [`Platform`].
#[derive(Clone)]
pub struct SimPlatform {
    state: Arc<Mutex<SimState>>,
}

impl Default for SimPlatform {
    fn default() -> Self {
        Self::new()
    }
}

impl SimPlatform {
    #[must_use]
    pub fn new() -> Self {
        Self {
            state: Arc::new(Mutex::new(SimState {
                reset_reason: ResetReason::PowerOn,
                millis: 0,
                partitions: Vec::new(),
                running: None,
                boot_target: None,
                restart_count: 0,
                reject_switch: false,
                reject_ota_validate: false,
                ota_validated: false,
            })),
        }
    }

    pub fn add_partition(&self, label: SlotLabel, state: OtaImageState) {
        self.state.lock().partitions.push(SimPartition { label, state });
    }

    pub fn set_ota_state(&self, label: &SlotLabel, state: OtaImageState) {
        let mut guard = self.state.lock();
        if let Some(partition) = guard.partitions.iter_mut().find(|p| p.label == *label) {
            partition.state = state;
        }
    }

    pub fn set_running(&self, label: &SlotLabel) {
        self.state.lock().running = Some(label.clone());
    }

    pub fn clear_running(&self) {
        self.state.lock().running = None;
    }

    pub fn set_reset_reason(&self, reason: ResetReason) {
        self.state.lock().reset_reason = reason;
    }

    pub fn advance_millis(&self, delta: u32) {
        let mut guard = self.state.lock();
        guard.millis = guard.millis.wrapping_add(delta);
    }

    pub fn set_millis(&self, millis: u32) {
        self.state.lock().millis = millis;
    }

    /// Make the next and all further `set_boot_partition` calls fail.
    pub fn reject_switch(&self, reject: bool) {
        self.state.lock().reject_switch = reject;
    }

    pub fn reject_ota_validate(&self, reject: bool) {
        self.state.lock().reject_ota_validate = reject;
    }

    /// The boot target recorded by the last accepted switch.
    #[must_use]
    pub fn boot_target(&self) -> Option<SlotLabel> {
        self.state.lock().boot_target.clone()
    }

    #[must_use]
    pub fn restart_count(&self) -> u32 {
        self.state.lock().restart_count
    }

    /// Whether `ota_mark_valid_cancel_rollback` has been accepted.
    #[must_use]
    pub fn ota_validated(&self) -> bool {
        self.state.lock().ota_validated
    }

    /// Come back up after a reset: adopt the recorded boot target (if any)
    /// as the running slot and latch the new reset cause, the way the
    /// bootloader would on real hardware.
    pub fn apply_reboot(&self, reason: ResetReason) {
        let mut guard = self.state.lock();
        if let Some(target) = guard.boot_target.take() {
            guard.running = Some(target);
        }
        guard.reset_reason = reason;
    }
}

impl Platform for SimPlatform {
    fn reset_reason(&self) -> ResetReason {
        self.state.lock().reset_reason
    }

    fn running_partition(&self) -> Option<AppPartition> {
        self.state.lock().running.clone().map(AppPartition::new)
    }

    fn find_app_partition(&self, label: &SlotLabel) -> Option<AppPartition> {
        self.state
            .lock()
            .partitions
            .iter()
            .find(|p| p.label == *label)
            .map(|p| AppPartition::new(p.label.clone()))
    }

    fn set_boot_partition(&self, partition: &AppPartition) -> Result<()> {
        let mut guard = self.state.lock();
        if guard.reject_switch {
            return Err(CrgError::SwitchFailed(partition.label().clone()));
        }
        guard.boot_target = Some(partition.label().clone());
        Ok(())
    }

    fn ota_state_of(&self, partition: &AppPartition) -> Option<OtaImageState> {
        self.state
            .lock()
            .partitions
            .iter()
            .find(|p| p.label == *partition.label())
            .map(|p| p.state)
    }

    fn ota_mark_valid_cancel_rollback(&self) -> Result<()> {
        let mut guard = self.state.lock();
        if guard.reject_ota_validate {
            return Err(CrgError::OtaValidateFailed {
                detail: "simulated rejection".to_owned(),
            });
        }
        guard.ota_validated = true;
        if let Some(running) = guard.running.clone() {
            if let Some(partition) = guard.partitions.iter_mut().find(|p| p.label == running) {
                partition.state = OtaImageState::Valid;
            }
        }
        Ok(())
    }

    fn restart(&self) -> ! {
        {
            let mut guard = self.state.lock();
            guard.restart_count += 1;
        }
        std::panic::panic_any(RestartSignal)
    }

    fn monotonic_millis(&self) -> u32 {
        self.state.lock().millis
    }
}

/// Run one `begin_early`, treating a guard-initiated reset as a normal
/// outcome instead of a test failure. Any other panic is propagated.
pub fn simulate_boot(guard: &mut RollbackGuard<'_>) -> BootOutcome {
    match catch_unwind(AssertUnwindSafe(|| guard.begin_early())) {
        Ok(decision) => BootOutcome::Completed(decision),
        Err(payload) => {
            if payload.downcast_ref::<RestartSignal>().is_some() {
                BootOutcome::Restarted
            } else {
                resume_unwind(payload)
            }
        }
    }
}
