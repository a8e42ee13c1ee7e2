//! The boot-time decision state machine.
//!
//! `begin_early` runs before any user code that could crash again: it latches
//! the reset cause, reconciles whatever the previous boot left pending,
//! counts the crash if the reset was suspicious, and either returns to let
//! the boot continue or redirects the bootloader and resets. `mark_healthy_now`
//! is the client's "alive" signal and clears all crash state.
//!
//! Every durable mutation goes through the ordered protocols in `crg-store`,
//! so a power cut at any point here is recovered on the next entry.

use crate::options::{LogLevel, Options};
use crate::platform::Platform;
use crate::report::BootReport;
use crg_store::{
    pending, KvBackend, KvSession, LabelStatus, PendingAction, FAIL_COUNTER, PREV_SLOT,
    ROLLBACK_COUNTER, ROLLBACK_COUNT_MAX,
};
use crg_types::{ResetReason, SlotLabel};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

#[cfg(feature = "pending-verify")]
use crg_types::OtaImageState;

/// Outcome of one `begin_early` pass.
///
/// The rollback variants are returned only when the corresponding switch
/// could not complete: a successful switch ends in a hardware reset and
/// never returns at all.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Decision {
    None,
    RollbackToPrev,
    RollbackToFactory,
    /// Rollback wanted but no usable previous slot is recorded.
    SkippedNoPrev,
    /// The recorded previous slot is the one already running.
    SkippedSameSlot,
    /// The boot-partition switch was rejected.
    FailedSwitch,
}

impl core::fmt::Display for Decision {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        let token = match self {
            Self::None => "none",
            Self::RollbackToPrev => "rollback_to_prev",
            Self::RollbackToFactory => "rollback_to_factory",
            Self::SkippedNoPrev => "skipped_no_prev",
            Self::SkippedSameSlot => "skipped_same_slot",
            Self::FailedSwitch => "failed_switch",
        };
        f.write_str(token)
    }
}

/// Override for the suspicious-reset policy.
pub type ResetReasonPredicate = fn(ResetReason) -> bool;

/// Crash-loop detector and rollback guard.
///
/// One instance per firmware; all state is owned by the instance. Not safe
/// to share across threads without external locking — the boot path is
/// single-threaded by construction.
pub struct RollbackGuard<'a> {
    opt: Options,
    platform: &'a dyn Platform,
    backend: &'a dyn KvBackend,
    suspicious_pred: Option<ResetReasonPredicate>,
    healthy_marked: bool,
    reset_reason: ResetReason,
    pending_verify: bool,
    stable_start_ms: u32,
    #[cfg(feature = "pending-verify")]
    running_state: OtaImageState,
    last_report: Option<BootReport>,
}

impl<'a> RollbackGuard<'a> {
    /// Build a guard with default [`Options`].
    pub fn new(platform: &'a dyn Platform, backend: &'a dyn KvBackend) -> Self {
        Self {
            opt: Options::default(),
            platform,
            backend,
            suspicious_pred: None,
            healthy_marked: false,
            reset_reason: ResetReason::Unknown,
            pending_verify: false,
            stable_start_ms: 0,
            #[cfg(feature = "pending-verify")]
            running_state: OtaImageState::Undefined,
            last_report: None,
        }
    }

    /// Build a guard and apply `options` (including validation).
    pub fn with_options(
        platform: &'a dyn Platform,
        backend: &'a dyn KvBackend,
        options: Options,
    ) -> Self {
        let mut guard = Self::new(platform, backend);
        guard.set_options(options);
        guard
    }

    /// Replace the options. May be called any time before `begin_early`.
    ///
    /// With factory fallback requested but no partition carrying the factory
    /// label, the fallback is disabled here rather than failing at the worst
    /// possible moment during a crash loop.
    pub fn set_options(&mut self, options: Options) {
        self.opt = options;
        #[cfg(feature = "factory-fallback")]
        if self.opt.fallback_to_factory
            && self
                .platform
                .find_app_partition(&self.opt.factory_label)
                .is_none()
        {
            if self.log_on(LogLevel::Error) {
                error!(
                    target: "crg::guard",
                    factory = %self.opt.factory_label,
                    "factory fallback disabled: partition not found"
                );
            }
            self.opt.fallback_to_factory = false;
        }
    }

    /// The effective (validated) options.
    #[must_use]
    pub fn options(&self) -> &Options {
        &self.opt
    }

    /// Replace the default suspicious-reset policy entirely.
    pub fn set_suspicious_predicate(&mut self, pred: ResetReasonPredicate) {
        self.suspicious_pred = Some(pred);
    }

    /// Reset cause latched by the last `begin_early`.
    #[must_use]
    pub fn last_reset_reason(&self) -> ResetReason {
        self.reset_reason
    }

    /// Whether the running image was in pending-verify state at boot.
    #[must_use]
    pub fn pending_verify_state(&self) -> bool {
        self.pending_verify
    }

    /// Evidence record from the last completed `begin_early` pass.
    #[must_use]
    pub fn last_boot_report(&self) -> Option<&BootReport> {
        self.last_report.as_ref()
    }

    /// Label of the partition currently running, if determinable.
    #[must_use]
    pub fn running_label(&self) -> Option<SlotLabel> {
        self.platform.running_partition().map(|p| p.label().clone())
    }

    /// Current fail counter, read through a fresh read-only session without
    /// repairing. 0 when the store cannot be opened.
    #[must_use]
    pub fn fail_count(&self) -> u32 {
        match self.backend.open(&self.opt.namespace, true) {
            Ok(mut session) => FAIL_COUNTER.read(session.as_mut(), false),
            Err(_) => 0,
        }
    }

    fn log_on(&self, level: LogLevel) -> bool {
        self.opt.log_level >= level
    }

    fn is_suspicious(&self, reason: ResetReason) -> bool {
        if let Some(pred) = self.suspicious_pred {
            return pred(reason);
        }
        match reason {
            ResetReason::PowerOn | ResetReason::External => false,
            ResetReason::Software => self.opt.sw_reset_counts_as_crash,
            ResetReason::Brownout => self.opt.brownout_counts_as_crash,
            _ => true,
        }
    }

    /// Boot-time entry point; call as early as possible in startup.
    ///
    /// Reads the reset cause and durable failure state, reconciles any
    /// pending action against the slot actually running, and decides whether
    /// this image gets another chance. A decided rollback switches the boot
    /// partition and resets the hardware, so this returns only on the
    /// no-action, skip, and failure paths.
    pub fn begin_early(&mut self) -> Decision {
        self.reset_reason = self.platform.reset_reason();
        self.stable_start_ms = self.platform.monotonic_millis();
        self.healthy_marked = false;
        self.pending_verify = false;

        let mut report = BootReport::new(self.reset_reason);

        #[cfg(feature = "pending-verify")]
        {
            self.running_state = OtaImageState::Undefined;
            if let Some(running) = self.platform.running_partition() {
                if let Some(state) = self.platform.ota_state_of(&running) {
                    self.running_state = state;
                    self.pending_verify = state == OtaImageState::PendingVerify;
                    if state == OtaImageState::Invalid && self.log_on(LogLevel::Error) {
                        error!(target: "crg::guard", "running slot marked invalid");
                    }
                }
            }
        }

        let mut session = match self.backend.open(&self.opt.namespace, false) {
            Ok(session) => session,
            Err(err) => {
                // Best effort only: a broken store must never block boot.
                if self.log_on(LogLevel::Error) {
                    error!(
                        target: "crg::guard",
                        error = %err,
                        "store open failed, guard inactive this boot"
                    );
                }
                return self.finish_boot(report);
            }
        };
        let session = session.as_mut();

        let mut fails = FAIL_COUNTER.read(session, true);
        let running = self.running_label();

        let pending_boot = self.reconcile_pending(session, &running, &mut fails, &mut report);

        if self.opt.auto_save_prev_slot {
            self.auto_save_prev(session, &running);
        }

        let suspicious = !pending_boot && self.is_suspicious(self.reset_reason);
        report.suspicious = suspicious;

        if !suspicious {
            if fails != 0 {
                FAIL_COUNTER.write(session, 0);
            }
            return self.finish_boot(report);
        }

        #[cfg(feature = "pending-verify")]
        if !pending_boot && self.running_state == OtaImageState::Invalid {
            report.fail_count = fails;
            report.cause = Some("running image invalid".to_owned());
            report.decision = self.attempt_rollback(session, "running image invalid");
            return self.finish_boot(report);
        }

        let cap = if self.opt.fail_limit > 0 {
            self.opt.fail_limit
        } else {
            u32::MAX - 1
        };
        if fails < cap {
            fails += 1;
            FAIL_COUNTER.write(session, fails);
        }
        report.fail_count = fails;

        if self.opt.fail_limit > 0 && fails >= self.opt.fail_limit {
            if self.opt.max_rollback_attempts > 0 {
                let rollbacks = ROLLBACK_COUNTER.read(session, true);
                if rollbacks >= self.opt.max_rollback_attempts {
                    if self.log_on(LogLevel::Error) {
                        error!(
                            target: "crg::guard",
                            rollbacks,
                            limit = self.opt.max_rollback_attempts,
                            "rollback guard active, not rolling back again"
                        );
                    }
                    report.cause = Some("rollback guard active".to_owned());
                    report.decision = self.factory_fallback(
                        session,
                        Decision::SkippedNoPrev,
                        "rollback guard active",
                    );
                    return self.finish_boot(report);
                }
            }
            report.cause = Some("crash-loop limit reached".to_owned());
            report.decision = self.attempt_rollback(session, "crash-loop limit reached");
            return self.finish_boot(report);
        }

        self.finish_boot(report)
    }

    /// Reconcile the stored pending action against the running slot.
    /// Returns true when this boot is the expected result of our own switch
    /// or of a user-armed restart, and must not be counted as a crash.
    fn reconcile_pending(
        &self,
        session: &mut dyn KvSession,
        running: &Option<SlotLabel>,
        fails: &mut u32,
        report: &mut BootReport,
    ) -> bool {
        let record = pending::read(session);
        if record.action == PendingAction::None {
            return false;
        }

        let label_matches = matches!(
            (&record.label, running),
            (Some(stored), Some(current)) if stored == current
        );

        match record.action {
            PendingAction::ControlledRestart => {
                pending::clear(session);
                FAIL_COUNTER.reset(session);
                *fails = 0;
                report.consumed_pending = Some(record.action);
                match &record.label {
                    Some(stored) if !label_matches => {
                        // Trust user intent anyway; the mismatch is worth a trace.
                        if self.log_on(LogLevel::Error) {
                            error!(
                                target: "crg::guard",
                                stored = %stored,
                                running = running.as_ref().map(SlotLabel::as_str).unwrap_or(""),
                                "controlled restart label mismatch"
                            );
                        }
                    }
                    Some(_) => {
                        if self.log_on(LogLevel::Info) {
                            info!(
                                target: "crg::guard",
                                running = running.as_ref().map(SlotLabel::as_str).unwrap_or(""),
                                "controlled restart completed"
                            );
                        }
                    }
                    None => {
                        if self.log_on(LogLevel::Error) {
                            error!(
                                target: "crg::guard",
                                "controlled restart had no label, trusting user intent"
                            );
                        }
                    }
                }
                true
            }
            PendingAction::RollbackPrev | PendingAction::RollbackFactory if label_matches => {
                pending::clear(session);
                FAIL_COUNTER.reset(session);
                *fails = 0;
                report.consumed_pending = Some(record.action);
                if self.log_on(LogLevel::Info) {
                    info!(
                        target: "crg::guard",
                        action = ?record.action,
                        running = running.as_ref().map(SlotLabel::as_str).unwrap_or(""),
                        "pending rollback completed"
                    );
                }
                true
            }
            _ => {
                // Switch did not take effect, or the wrong slot booted.
                // Keep counting crashes in whatever slot this is.
                if self.log_on(LogLevel::Error) {
                    error!(
                        target: "crg::guard",
                        action = ?record.action,
                        stored = record.label.as_ref().map(SlotLabel::as_str).unwrap_or(""),
                        running = running.as_ref().map(SlotLabel::as_str).unwrap_or(""),
                        "pending action did not match running slot"
                    );
                }
                pending::clear(session);
                false
            }
        }
    }

    fn auto_save_prev(&self, session: &mut dyn KvSession, running: &Option<SlotLabel>) {
        match PREV_SLOT.load(session) {
            LabelStatus::Missing => {
                if let Some(running) = running {
                    if PREV_SLOT.store(session, running) {
                        ROLLBACK_COUNTER.reset(session);
                        if self.log_on(LogLevel::Debug) {
                            debug!(
                                target: "crg::guard",
                                prev = %running,
                                "auto-saved running slot as previous"
                            );
                        }
                    }
                }
            }
            LabelStatus::Corrupted => {
                if self.log_on(LogLevel::Error) {
                    error!(
                        target: "crg::guard",
                        "stored previous slot corrupted, clearing"
                    );
                }
                PREV_SLOT.clear(session);
            }
            LabelStatus::Valid(_) => {}
        }
    }

    /// Try to redirect the next boot to the recorded previous slot.
    fn attempt_rollback(&self, session: &mut dyn KvSession, why: &str) -> Decision {
        let current = self.running_label();
        let prev = match PREV_SLOT.load(session) {
            LabelStatus::Valid(label) => Some(label),
            LabelStatus::Corrupted => {
                if self.log_on(LogLevel::Error) {
                    error!(target: "crg::guard", "previous slot record corrupted, clearing");
                }
                PREV_SLOT.clear(session);
                None
            }
            LabelStatus::Missing => None,
        };

        if self.log_on(LogLevel::Error) {
            error!(
                target: "crg::guard",
                cause = why,
                fails = FAIL_COUNTER.read(session, true),
                current = current.as_ref().map(SlotLabel::as_str).unwrap_or(""),
                prev = prev.as_ref().map(SlotLabel::as_str).unwrap_or(""),
                reset = %self.reset_reason,
                "attempting rollback"
            );
        }

        let Some(prev) = prev else {
            return self.factory_fallback(session, Decision::SkippedNoPrev, "no previous slot");
        };

        if Some(&prev) == current.as_ref() {
            return self.factory_fallback(
                session,
                Decision::SkippedSameSlot,
                "previous slot matches current",
            );
        }

        let Some(partition) = self.platform.find_app_partition(&prev) else {
            if self.log_on(LogLevel::Error) {
                error!(target: "crg::guard", prev = %prev, "previous partition missing");
            }
            return self.factory_fallback(
                session,
                Decision::SkippedNoPrev,
                "previous partition missing",
            );
        };

        #[cfg(feature = "pending-verify")]
        if let Some(state) = self.platform.ota_state_of(&partition) {
            if matches!(state, OtaImageState::Invalid | OtaImageState::Aborted) {
                if self.log_on(LogLevel::Error) {
                    error!(
                        target: "crg::guard",
                        prev = %prev,
                        state = %state,
                        "previous slot unusable"
                    );
                }
                return self.factory_fallback(
                    session,
                    Decision::FailedSwitch,
                    "previous slot invalid",
                );
            }
        }

        pending::write(session, PendingAction::RollbackPrev, Some(&prev));
        match self.platform.set_boot_partition(&partition) {
            Ok(()) => {
                let rollbacks = ROLLBACK_COUNTER.read(session, true);
                if rollbacks < ROLLBACK_COUNT_MAX {
                    ROLLBACK_COUNTER.write(session, rollbacks + 1);
                }
                if self.log_on(LogLevel::Error) {
                    error!(target: "crg::guard", prev = %prev, "boot switched, resetting");
                }
                self.platform.restart()
            }
            Err(err) => {
                pending::clear(session);
                if self.log_on(LogLevel::Error) {
                    error!(target: "crg::guard", prev = %prev, error = %err, "boot switch failed");
                }
                self.factory_fallback(session, Decision::FailedSwitch, "boot switch failed")
            }
        }
    }

    /// Last-resort switch to the factory image. Returns `failure` when the
    /// fallback is disabled; `FailedSwitch` when it was tried and rejected.
    #[cfg(feature = "factory-fallback")]
    fn factory_fallback(
        &self,
        session: &mut dyn KvSession,
        failure: Decision,
        cause: &str,
    ) -> Decision {
        if !self.opt.fallback_to_factory {
            return failure;
        }
        let factory = &self.opt.factory_label;
        if self.log_on(LogLevel::Error) {
            error!(
                target: "crg::guard",
                cause,
                factory = %factory,
                "falling back to factory image"
            );
        }

        pending::write(session, PendingAction::RollbackFactory, Some(factory));
        let switched = self
            .platform
            .find_app_partition(factory)
            .map(|partition| self.platform.set_boot_partition(&partition));
        match switched {
            Some(Ok(())) => self.platform.restart(),
            _ => {
                pending::clear(session);
                if self.log_on(LogLevel::Error) {
                    error!(target: "crg::guard", factory = %factory, "factory switch failed");
                }
                Decision::FailedSwitch
            }
        }
    }

    #[cfg(not(feature = "factory-fallback"))]
    fn factory_fallback(
        &self,
        _session: &mut dyn KvSession,
        failure: Decision,
        _cause: &str,
    ) -> Decision {
        failure
    }

    fn finish_boot(&mut self, report: BootReport) -> Decision {
        let decision = report.decision;
        if self.log_on(LogLevel::Debug) {
            if let Ok(json) = report.to_json() {
                debug!(target: "crg::guard", report = %json, "boot report");
            }
        }
        self.last_report = Some(report);
        decision
    }

    /// Confirm the running image as healthy and clear all crash state.
    ///
    /// Idempotent: once marked, later calls return immediately, and a call
    /// that finds everything already clean performs no writes at all.
    pub fn mark_healthy_now(&mut self) {
        if self.healthy_marked {
            return;
        }
        let mut session = match self.backend.open(&self.opt.namespace, false) {
            Ok(session) => session,
            Err(err) => {
                if self.log_on(LogLevel::Debug) {
                    debug!(target: "crg::guard", error = %err, "mark-healthy skipped, store unavailable");
                }
                return;
            }
        };
        let session = session.as_mut();

        let fails = FAIL_COUNTER.read(session, true);
        let rollbacks = ROLLBACK_COUNTER.read(session, true);
        #[cfg(feature = "pending-verify")]
        let need_ota_mark = self.pending_verify;
        #[cfg(not(feature = "pending-verify"))]
        let need_ota_mark = false;

        if fails == 0 && rollbacks == 0 && !need_ota_mark {
            self.healthy_marked = true;
            if self.log_on(LogLevel::Debug) {
                debug!(target: "crg::guard", "mark-healthy skipped, already clean");
            }
            return;
        }

        FAIL_COUNTER.reset(session);
        ROLLBACK_COUNTER.reset(session);

        #[cfg(feature = "pending-verify")]
        if self.pending_verify {
            match self.platform.ota_mark_valid_cancel_rollback() {
                Ok(()) => {
                    if self.log_on(LogLevel::Info) {
                        info!(target: "crg::guard", "running image marked valid");
                    }
                }
                Err(err) => {
                    if self.log_on(LogLevel::Error) {
                        error!(target: "crg::guard", error = %err, "marking image valid failed");
                    }
                }
            }
            self.pending_verify = false;
            self.running_state = OtaImageState::Valid;
        }

        self.healthy_marked = true;
        if self.log_on(LogLevel::Info) {
            info!(target: "crg::guard", "marked healthy, crash state cleared");
        }
    }

    /// Auto-confirm once the configured stable uptime has elapsed. Call from
    /// the application's main loop.
    pub fn loop_tick(&mut self) {
        #[cfg(feature = "stable-tick")]
        {
            if self.healthy_marked || self.opt.stable_time_ms == 0 {
                return;
            }
            let now = self.platform.monotonic_millis();
            if now.wrapping_sub(self.stable_start_ms) >= self.opt.stable_time_ms {
                self.mark_healthy_now();
            }
        }
    }

    /// Record that the next reset is deliberate, so the following boot is
    /// not counted as a crash regardless of its reset cause. Call right
    /// before a voluntary restart.
    pub fn arm_controlled_restart(&self) {
        let mut session = match self.backend.open(&self.opt.namespace, false) {
            Ok(session) => session,
            Err(err) => {
                if self.log_on(LogLevel::Debug) {
                    debug!(target: "crg::guard", error = %err, "arm skipped, store unavailable");
                }
                return;
            }
        };

        let running = self.running_label();
        pending::write(
            session.as_mut(),
            PendingAction::ControlledRestart,
            running.as_ref(),
        );
        match &running {
            Some(label) => {
                if self.log_on(LogLevel::Debug) {
                    debug!(target: "crg::guard", running = %label, "controlled restart armed");
                }
            }
            None => {
                if self.log_on(LogLevel::Error) {
                    error!(
                        target: "crg::guard",
                        "controlled restart armed without label, partition lookup failed"
                    );
                }
            }
        }
    }

    /// Record the running slot as the known-good previous slot. Call before
    /// starting an OTA update into another slot.
    pub fn save_current_as_previous_slot(&self) -> bool {
        let Some(running) = self.running_label() else {
            return false;
        };
        let Ok(mut session) = self.backend.open(&self.opt.namespace, false) else {
            return false;
        };
        let session = session.as_mut();

        let saved = PREV_SLOT.store(session, &running);
        if saved {
            ROLLBACK_COUNTER.reset(session);
            if self.log_on(LogLevel::Info) {
                info!(target: "crg::guard", prev = %running, "saved previous slot");
            }
        }
        saved
    }

    /// The stored previous slot, if present and intact. A corrupted record
    /// is cleared and reported absent.
    #[must_use]
    pub fn previous_slot(&self) -> Option<SlotLabel> {
        let mut session = self.backend.open(&self.opt.namespace, true).ok()?;
        match PREV_SLOT.load(session.as_mut()) {
            LabelStatus::Valid(label) => Some(label),
            LabelStatus::Missing => None,
            LabelStatus::Corrupted => {
                if self.log_on(LogLevel::Error) {
                    error!(target: "crg::guard", "stored previous slot corrupted, clearing");
                }
                drop(session);
                if let Ok(mut writer) = self.backend.open(&self.opt.namespace, false) {
                    PREV_SLOT.clear(writer.as_mut());
                }
                None
            }
        }
    }

    /// Forget the previous slot and reset the rollback counter.
    pub fn clear_previous_slot(&self) {
        if let Ok(mut session) = self.backend.open(&self.opt.namespace, false) {
            PREV_SLOT.clear(session.as_mut());
            ROLLBACK_COUNTER.reset(session.as_mut());
        }
    }
}
