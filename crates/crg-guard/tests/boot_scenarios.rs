//! End-to-end boot scenarios driven through the simulation platform.
//!
//! Each test plays a device lifecycle: every "boot" constructs a fresh guard
//! over the same shared backend, the way a reboot discards RAM but keeps
//! flash.

use crg_guard::sim::{simulate_boot, BootOutcome, SimPlatform};
use crg_guard::{Decision, Options, RollbackGuard};
use crg_store::{keys, MemoryKv, FAIL_COUNTER};
use crg_types::{Namespace, OtaImageState, ResetReason, SlotLabel};

fn label(value: &str) -> SlotLabel {
    SlotLabel::new(value).expect("valid label")
}

fn ns() -> Namespace {
    Namespace::new("crg").expect("valid namespace")
}

fn two_slot_device(running: &str) -> (SimPlatform, MemoryKv) {
    let sim = SimPlatform::new();
    sim.add_partition(label("app0"), OtaImageState::Valid);
    sim.add_partition(label("app1"), OtaImageState::Valid);
    sim.set_running(&label(running));
    (sim, MemoryKv::new())
}

fn options(fail_limit: u32) -> Options {
    let mut opt = Options::default();
    opt.fail_limit = fail_limit;
    opt
}

/// Store `prev` through the guard's own API while running on that slot.
/// Callers re-point `set_running` afterwards.
fn save_prev_as(sim: &SimPlatform, backend: &MemoryKv, slot: &str) {
    sim.set_running(&label(slot));
    let guard = RollbackGuard::new(sim, backend);
    assert!(guard.save_current_as_previous_slot());
}

#[test]
fn clean_boot_on_fresh_store_does_nothing() {
    let (sim, backend) = two_slot_device("app0");
    sim.set_reset_reason(ResetReason::PowerOn);

    let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
    assert_eq!(simulate_boot(&mut guard), BootOutcome::Completed(Decision::None));
    assert_eq!(guard.fail_count(), 0);
    assert_eq!(guard.last_reset_reason(), ResetReason::PowerOn);
    assert!(!backend.contains_key(&ns(), keys::FAILS));
}

#[test]
fn suspicious_boots_count_up_but_stay_below_limit() {
    let (sim, backend) = two_slot_device("app0");
    save_prev_as(&sim, &backend, "app1");
    sim.set_running(&label("app0"));
    sim.set_reset_reason(ResetReason::TaskWatchdog);

    for expected in 1..=2 {
        let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
        assert_eq!(simulate_boot(&mut guard), BootOutcome::Completed(Decision::None));
        assert_eq!(guard.fail_count(), expected);
    }
}

#[test]
fn reaching_the_limit_rolls_back_and_reentry_clears_state() {
    let (sim, backend) = two_slot_device("app0");
    save_prev_as(&sim, &backend, "app1");
    sim.set_running(&label("app0"));
    sim.set_reset_reason(ResetReason::TaskWatchdog);

    for _ in 0..2 {
        let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
        assert_eq!(simulate_boot(&mut guard), BootOutcome::Completed(Decision::None));
    }

    // Third suspicious boot: pending record persisted, boot switched, reset.
    let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
    assert_eq!(simulate_boot(&mut guard), BootOutcome::Restarted);
    assert_eq!(sim.boot_target(), Some(label("app1")));
    assert_eq!(sim.restart_count(), 1);
    assert_eq!(backend.raw_u8(&ns(), keys::PENDING_ACTION), Some(1));
    assert_eq!(backend.raw_str(&ns(), keys::PENDING_LABEL).as_deref(), Some("app1"));
    assert_eq!(backend.raw_u8(&ns(), keys::ROLLBACK_COUNT), Some(1));

    // Device comes back on the rolled-back-to slot.
    sim.apply_reboot(ResetReason::Software);
    let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
    assert_eq!(simulate_boot(&mut guard), BootOutcome::Completed(Decision::None));
    assert_eq!(guard.fail_count(), 0);
    assert_eq!(backend.raw_u8(&ns(), keys::PENDING_ACTION), Some(0));
    assert!(!backend.contains_key(&ns(), keys::PENDING_LABEL));

    let report = guard.last_boot_report().expect("report recorded");
    assert_eq!(report.decision, Decision::None);
    assert!(!report.suspicious);
}

#[test]
fn exactly_fail_limit_boots_trigger_for_various_limits() {
    for fail_limit in [1_u32, 2, 5] {
        let (sim, backend) = two_slot_device("app0");
        save_prev_as(&sim, &backend, "app1");
        sim.set_running(&label("app0"));
        sim.set_reset_reason(ResetReason::Panic);

        for _ in 1..fail_limit {
            let mut guard = RollbackGuard::with_options(&sim, &backend, options(fail_limit));
            assert_eq!(
                simulate_boot(&mut guard),
                BootOutcome::Completed(Decision::None),
                "limit {fail_limit} fired early"
            );
        }
        let mut guard = RollbackGuard::with_options(&sim, &backend, options(fail_limit));
        assert_eq!(
            simulate_boot(&mut guard),
            BootOutcome::Restarted,
            "limit {fail_limit} failed to fire"
        );
    }
}

#[test]
fn zero_fail_limit_disables_rollback() {
    let (sim, backend) = two_slot_device("app0");
    save_prev_as(&sim, &backend, "app1");
    sim.set_running(&label("app0"));
    sim.set_reset_reason(ResetReason::TaskWatchdog);

    for _ in 0..6 {
        let mut guard = RollbackGuard::with_options(&sim, &backend, options(0));
        assert_eq!(simulate_boot(&mut guard), BootOutcome::Completed(Decision::None));
    }
    assert_eq!(sim.restart_count(), 0);
}

#[test]
fn rollback_guard_blocks_ping_pong_between_bad_slots() {
    let (sim, backend) = two_slot_device("app0");
    save_prev_as(&sim, &backend, "app1");
    sim.set_running(&label("app0"));
    sim.set_reset_reason(ResetReason::TaskWatchdog);

    // First crash loop ends in a rollback to app1.
    for _ in 0..2 {
        let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
        simulate_boot(&mut guard);
    }
    let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
    assert_eq!(simulate_boot(&mut guard), BootOutcome::Restarted);
    sim.apply_reboot(ResetReason::Software);
    let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
    assert_eq!(simulate_boot(&mut guard), BootOutcome::Completed(Decision::None));

    // The rolled-back-to slot also crash-loops. With one rollback already
    // spent and max_rollback_attempts = 1, the guard refuses to ping back.
    sim.set_reset_reason(ResetReason::TaskWatchdog);
    for _ in 0..2 {
        let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
        assert_eq!(simulate_boot(&mut guard), BootOutcome::Completed(Decision::None));
    }
    let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
    assert_eq!(
        simulate_boot(&mut guard),
        BootOutcome::Completed(Decision::SkippedNoPrev)
    );
    assert_eq!(sim.restart_count(), 1, "no second rollback issued");
}

#[test]
fn controlled_restart_is_never_counted_as_crash() {
    let (sim, backend) = two_slot_device("app0");
    sim.set_reset_reason(ResetReason::TaskWatchdog);

    // Two crashes on record.
    let mut opt = options(5);
    opt.sw_reset_counts_as_crash = true;
    for _ in 0..2 {
        let mut guard = RollbackGuard::with_options(&sim, &backend, opt.clone());
        simulate_boot(&mut guard);
    }

    let guard = RollbackGuard::with_options(&sim, &backend, opt.clone());
    assert_eq!(guard.fail_count(), 2);
    guard.arm_controlled_restart();

    // Even with software resets configured as crashes, the armed restart
    // must absolve the next boot.
    sim.apply_reboot(ResetReason::Software);
    let mut guard = RollbackGuard::with_options(&sim, &backend, opt);
    assert_eq!(simulate_boot(&mut guard), BootOutcome::Completed(Decision::None));
    assert_eq!(guard.fail_count(), 0);
    assert_eq!(backend.raw_u8(&ns(), keys::PENDING_ACTION), Some(0));
}

#[test]
fn controlled_restart_trusted_on_label_mismatch() {
    let (sim, backend) = two_slot_device("app0");
    sim.set_reset_reason(ResetReason::TaskWatchdog);
    let mut guard = RollbackGuard::with_options(&sim, &backend, options(5));
    simulate_boot(&mut guard);
    assert_eq!(guard.fail_count(), 1);

    guard.arm_controlled_restart();
    // A different slot comes up than the one recorded in the pending label.
    sim.set_running(&label("app1"));
    sim.apply_reboot(ResetReason::Software);

    let mut guard = RollbackGuard::with_options(&sim, &backend, options(5));
    assert_eq!(simulate_boot(&mut guard), BootOutcome::Completed(Decision::None));
    assert_eq!(guard.fail_count(), 0, "user intent clears fails despite mismatch");
}

#[test]
fn unconsumed_rollback_pending_keeps_fail_counter() {
    let (sim, backend) = two_slot_device("app0");
    save_prev_as(&sim, &backend, "app1");
    sim.set_running(&label("app0"));
    sim.set_reset_reason(ResetReason::TaskWatchdog);
    let mut opt = options(3);
    opt.max_rollback_attempts = 0; // isolate pending handling from the guard

    for _ in 0..2 {
        let mut guard = RollbackGuard::with_options(&sim, &backend, opt.clone());
        simulate_boot(&mut guard);
    }
    let mut guard = RollbackGuard::with_options(&sim, &backend, opt.clone());
    assert_eq!(simulate_boot(&mut guard), BootOutcome::Restarted);

    // The bootloader silently ignores the switch: same slot boots again with
    // the pending record still on disk.
    sim.set_reset_reason(ResetReason::TaskWatchdog);
    let mut guard = RollbackGuard::with_options(&sim, &backend, opt);
    let outcome = simulate_boot(&mut guard);
    // Pending is cleared without clearing fails, so the counter is still at
    // the limit and the guard immediately re-evaluates the rollback branch.
    assert_eq!(outcome, BootOutcome::Restarted);
    assert_eq!(backend.raw_u32(&ns(), keys::FAILS), Some(3));
}

#[test]
fn corrupt_prev_record_is_cleared_and_rollback_skips() {
    let (sim, backend) = two_slot_device("app0");
    save_prev_as(&sim, &backend, "app1");
    sim.set_running(&label("app0"));

    // Flip the stored CRC.
    let crc = backend.raw_u32(&ns(), keys::PREV_CRC).expect("crc present");
    backend.corrupt_u32(&ns(), keys::PREV_CRC, crc ^ 0x1000);

    let guard = RollbackGuard::with_options(&sim, &backend, options(3));
    assert_eq!(guard.previous_slot(), None);
    assert!(!backend.contains_key(&ns(), keys::PREV_LABEL));
    assert!(!backend.contains_key(&ns(), keys::PREV_CRC));

    // With no usable previous slot, the crash loop ends in a skip.
    sim.set_reset_reason(ResetReason::TaskWatchdog);
    for _ in 0..2 {
        let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
        simulate_boot(&mut guard);
    }
    let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
    assert_eq!(
        simulate_boot(&mut guard),
        BootOutcome::Completed(Decision::SkippedNoPrev)
    );
}

#[test]
fn prev_matching_running_slot_skips() {
    let (sim, backend) = two_slot_device("app0");
    save_prev_as(&sim, &backend, "app0");
    sim.set_reset_reason(ResetReason::TaskWatchdog);

    for _ in 0..2 {
        let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
        simulate_boot(&mut guard);
    }
    let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
    assert_eq!(
        simulate_boot(&mut guard),
        BootOutcome::Completed(Decision::SkippedSameSlot)
    );
}

#[test]
fn missing_prev_partition_skips() {
    let sim = SimPlatform::new();
    sim.add_partition(label("app0"), OtaImageState::Valid);
    sim.set_running(&label("app0"));
    let backend = MemoryKv::new();

    // prev points at a slot that is not in the partition table.
    {
        let mut session = crg_store::KvBackend::open(&backend, &ns(), false).expect("open");
        assert!(crg_store::PREV_SLOT.store(session.as_mut(), &label("app9")));
    }

    sim.set_reset_reason(ResetReason::TaskWatchdog);
    for _ in 0..2 {
        let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
        simulate_boot(&mut guard);
    }
    let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
    assert_eq!(
        simulate_boot(&mut guard),
        BootOutcome::Completed(Decision::SkippedNoPrev)
    );
}

#[test]
fn rejected_switch_reports_failed_switch_and_clears_pending() {
    let (sim, backend) = two_slot_device("app0");
    save_prev_as(&sim, &backend, "app1");
    sim.set_running(&label("app0"));
    sim.reject_switch(true);
    sim.set_reset_reason(ResetReason::TaskWatchdog);

    for _ in 0..2 {
        let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
        simulate_boot(&mut guard);
    }
    let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
    assert_eq!(
        simulate_boot(&mut guard),
        BootOutcome::Completed(Decision::FailedSwitch)
    );
    assert_eq!(backend.raw_u8(&ns(), keys::PENDING_ACTION), Some(0));
    assert!(!backend.contains_key(&ns(), keys::PENDING_LABEL));
}

#[test]
fn store_unavailable_degrades_to_normal_boot() {
    let (sim, backend) = two_slot_device("app0");
    backend.set_open_fails(true);
    sim.set_reset_reason(ResetReason::TaskWatchdog);

    let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
    assert_eq!(simulate_boot(&mut guard), BootOutcome::Completed(Decision::None));
    assert_eq!(sim.restart_count(), 0);
}

#[test]
fn non_suspicious_boot_resets_fail_counter() {
    let (sim, backend) = two_slot_device("app0");
    sim.set_reset_reason(ResetReason::TaskWatchdog);
    for _ in 0..2 {
        let mut guard = RollbackGuard::with_options(&sim, &backend, options(5));
        simulate_boot(&mut guard);
    }

    sim.set_reset_reason(ResetReason::PowerOn);
    let mut guard = RollbackGuard::with_options(&sim, &backend, options(5));
    assert_eq!(simulate_boot(&mut guard), BootOutcome::Completed(Decision::None));
    assert_eq!(guard.fail_count(), 0);
}

#[test]
fn auto_save_records_running_slot_once() {
    let (sim, backend) = two_slot_device("app0");
    sim.set_reset_reason(ResetReason::PowerOn);
    let mut opt = options(3);
    opt.auto_save_prev_slot = true;

    let mut guard = RollbackGuard::with_options(&sim, &backend, opt.clone());
    simulate_boot(&mut guard);
    assert_eq!(guard.previous_slot(), Some(label("app0")));

    // A later boot on another slot must not overwrite the saved record.
    sim.set_running(&label("app1"));
    let mut guard = RollbackGuard::with_options(&sim, &backend, opt);
    simulate_boot(&mut guard);
    assert_eq!(guard.previous_slot(), Some(label("app0")));
}

#[test]
fn mark_healthy_clears_counters_and_is_idempotent() {
    let (sim, backend) = two_slot_device("app0");
    sim.set_reset_reason(ResetReason::TaskWatchdog);
    for _ in 0..2 {
        let mut guard = RollbackGuard::with_options(&sim, &backend, options(5));
        simulate_boot(&mut guard);
    }

    let mut guard = RollbackGuard::with_options(&sim, &backend, options(5));
    simulate_boot(&mut guard);
    assert_eq!(guard.fail_count(), 3);
    guard.mark_healthy_now();
    assert_eq!(guard.fail_count(), 0);

    // Second call performs no further store mutations.
    let before = backend.mutation_count();
    guard.mark_healthy_now();
    assert_eq!(backend.mutation_count(), before);
}

#[test]
fn mark_healthy_on_clean_state_writes_nothing() {
    let (sim, backend) = two_slot_device("app0");
    sim.set_reset_reason(ResetReason::PowerOn);
    let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
    simulate_boot(&mut guard);

    let before = backend.mutation_count();
    guard.mark_healthy_now();
    assert_eq!(backend.mutation_count(), before);
}

#[test]
fn save_and_clear_previous_slot_round_trip() {
    let (sim, backend) = two_slot_device("app0");
    let guard = RollbackGuard::with_options(&sim, &backend, options(3));

    assert!(guard.save_current_as_previous_slot());
    assert_eq!(guard.previous_slot(), Some(label("app0")));

    guard.clear_previous_slot();
    assert_eq!(guard.previous_slot(), None);
    assert_eq!(backend.raw_u8(&ns(), keys::ROLLBACK_COUNT), Some(0));
}

#[test]
fn fail_counter_saturates_at_limit_without_wrapping_policy() {
    let (sim, backend) = two_slot_device("app0");
    sim.set_reset_reason(ResetReason::TaskWatchdog);
    let mut opt = options(3);
    opt.max_rollback_attempts = 1;

    // No prev slot and no factory: the limit branch can never switch, so
    // fails pins at the limit on every further suspicious boot.
    for _ in 0..5 {
        let mut guard = RollbackGuard::with_options(&sim, &backend, opt.clone());
        let outcome = simulate_boot(&mut guard);
        assert!(matches!(outcome, BootOutcome::Completed(_)));
    }
    {
        let mut session = crg_store::KvBackend::open(&backend, &ns(), true).expect("open");
        assert_eq!(FAIL_COUNTER.read(session.as_mut(), false), 3);
    }
}

#[cfg(feature = "stable-tick")]
mod stable_tick {
    use super::*;

    #[test]
    fn loop_tick_marks_healthy_after_stable_window() {
        let (sim, backend) = two_slot_device("app0");
        sim.set_reset_reason(ResetReason::TaskWatchdog);
        let mut opt = options(5);
        opt.stable_time_ms = 1_000;

        let mut guard = RollbackGuard::with_options(&sim, &backend, opt);
        simulate_boot(&mut guard);
        assert_eq!(guard.fail_count(), 1);

        sim.advance_millis(999);
        guard.loop_tick();
        assert_eq!(guard.fail_count(), 1, "window not yet elapsed");

        sim.advance_millis(1);
        guard.loop_tick();
        assert_eq!(guard.fail_count(), 0, "auto-confirmed after window");
    }

    #[test]
    fn loop_tick_survives_millis_wraparound() {
        let (sim, backend) = two_slot_device("app0");
        sim.set_reset_reason(ResetReason::TaskWatchdog);
        sim.set_millis(u32::MAX - 100);
        let mut opt = options(5);
        opt.stable_time_ms = 1_000;

        let mut guard = RollbackGuard::with_options(&sim, &backend, opt);
        simulate_boot(&mut guard);

        sim.advance_millis(500); // clock wraps past zero here
        guard.loop_tick();
        assert_eq!(guard.fail_count(), 1);

        sim.advance_millis(600);
        guard.loop_tick();
        assert_eq!(guard.fail_count(), 0);
    }

    #[test]
    fn zero_stable_time_disables_auto_confirm() {
        let (sim, backend) = two_slot_device("app0");
        sim.set_reset_reason(ResetReason::TaskWatchdog);
        let mut opt = options(5);
        opt.stable_time_ms = 0;

        let mut guard = RollbackGuard::with_options(&sim, &backend, opt);
        simulate_boot(&mut guard);
        sim.advance_millis(u32::MAX / 2);
        guard.loop_tick();
        assert_eq!(guard.fail_count(), 1);
    }
}

#[cfg(feature = "pending-verify")]
mod pending_verify {
    use super::*;

    #[test]
    fn pending_verify_image_is_confirmed_on_mark_healthy() {
        let (sim, backend) = two_slot_device("app0");
        sim.set_ota_state(&label("app0"), OtaImageState::PendingVerify);
        sim.set_reset_reason(ResetReason::PowerOn);

        let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
        simulate_boot(&mut guard);
        assert!(guard.pending_verify_state());
        assert!(!sim.ota_validated());

        guard.mark_healthy_now();
        assert!(sim.ota_validated());
        assert!(!guard.pending_verify_state());
    }

    #[test]
    fn invalid_running_image_rolls_back_without_counting() {
        let (sim, backend) = two_slot_device("app1");
        save_prev_as(&sim, &backend, "app0");
        sim.set_running(&label("app1"));
        sim.set_ota_state(&label("app1"), OtaImageState::Invalid);
        sim.set_reset_reason(ResetReason::TaskWatchdog);

        let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
        assert_eq!(simulate_boot(&mut guard), BootOutcome::Restarted);
        assert_eq!(sim.boot_target(), Some(label("app0")));
        // The crash counter was bypassed entirely.
        assert!(!backend.contains_key(&ns(), keys::FAILS));
    }

    #[test]
    fn invalid_image_on_clean_reset_still_boots() {
        let (sim, backend) = two_slot_device("app1");
        save_prev_as(&sim, &backend, "app0");
        sim.set_running(&label("app1"));
        sim.set_ota_state(&label("app1"), OtaImageState::Invalid);
        sim.set_reset_reason(ResetReason::PowerOn);

        let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
        assert_eq!(simulate_boot(&mut guard), BootOutcome::Completed(Decision::None));
    }

    #[test]
    fn rollback_refuses_an_invalidated_previous_slot() {
        let (sim, backend) = two_slot_device("app0");
        save_prev_as(&sim, &backend, "app1");
        sim.set_running(&label("app0"));
        sim.set_ota_state(&label("app1"), OtaImageState::Aborted);
        sim.set_reset_reason(ResetReason::TaskWatchdog);

        for _ in 0..2 {
            let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
            simulate_boot(&mut guard);
        }
        let mut guard = RollbackGuard::with_options(&sim, &backend, options(3));
        assert_eq!(
            simulate_boot(&mut guard),
            BootOutcome::Completed(Decision::FailedSwitch)
        );
        assert_eq!(sim.restart_count(), 0);
    }
}

#[cfg(feature = "factory-fallback")]
mod factory {
    use super::*;

    fn factory_options(fail_limit: u32) -> Options {
        let mut opt = options(fail_limit);
        opt.fallback_to_factory = true;
        opt
    }

    fn device_with_factory(running: &str) -> (SimPlatform, MemoryKv) {
        let (sim, backend) = two_slot_device(running);
        sim.add_partition(label("factory"), OtaImageState::Valid);
        (sim, backend)
    }

    #[test]
    fn no_prev_slot_falls_back_to_factory() {
        let (sim, backend) = device_with_factory("app0");
        sim.set_reset_reason(ResetReason::TaskWatchdog);

        for _ in 0..2 {
            let mut guard = RollbackGuard::with_options(&sim, &backend, factory_options(3));
            simulate_boot(&mut guard);
        }
        let mut guard = RollbackGuard::with_options(&sim, &backend, factory_options(3));
        assert_eq!(simulate_boot(&mut guard), BootOutcome::Restarted);
        assert_eq!(sim.boot_target(), Some(label("factory")));
        assert_eq!(backend.raw_u8(&ns(), keys::PENDING_ACTION), Some(2));

        // Re-entry on factory reconciles the pending record.
        sim.apply_reboot(ResetReason::Software);
        let mut guard = RollbackGuard::with_options(&sim, &backend, factory_options(3));
        assert_eq!(simulate_boot(&mut guard), BootOutcome::Completed(Decision::None));
        assert_eq!(guard.fail_count(), 0);
    }

    #[test]
    fn rollback_guard_routes_to_factory_when_enabled() {
        let (sim, backend) = device_with_factory("app0");
        save_prev_as(&sim, &backend, "app1");
        sim.set_running(&label("app0"));
        sim.set_reset_reason(ResetReason::TaskWatchdog);

        // Spend the single allowed rollback.
        for _ in 0..2 {
            let mut guard = RollbackGuard::with_options(&sim, &backend, factory_options(3));
            simulate_boot(&mut guard);
        }
        let mut guard = RollbackGuard::with_options(&sim, &backend, factory_options(3));
        assert_eq!(simulate_boot(&mut guard), BootOutcome::Restarted);
        sim.apply_reboot(ResetReason::Software);
        let mut guard = RollbackGuard::with_options(&sim, &backend, factory_options(3));
        simulate_boot(&mut guard);

        // Second crash loop: guard is active, factory takes over.
        sim.set_reset_reason(ResetReason::TaskWatchdog);
        for _ in 0..2 {
            let mut guard = RollbackGuard::with_options(&sim, &backend, factory_options(3));
            simulate_boot(&mut guard);
        }
        let mut guard = RollbackGuard::with_options(&sim, &backend, factory_options(3));
        assert_eq!(simulate_boot(&mut guard), BootOutcome::Restarted);
        assert_eq!(sim.boot_target(), Some(label("factory")));
    }

    #[test]
    fn rejected_factory_switch_returns_failed_switch() {
        let (sim, backend) = device_with_factory("app0");
        sim.reject_switch(true);
        sim.set_reset_reason(ResetReason::TaskWatchdog);

        for _ in 0..2 {
            let mut guard = RollbackGuard::with_options(&sim, &backend, factory_options(3));
            simulate_boot(&mut guard);
        }
        let mut guard = RollbackGuard::with_options(&sim, &backend, factory_options(3));
        assert_eq!(
            simulate_boot(&mut guard),
            BootOutcome::Completed(Decision::FailedSwitch)
        );
        assert_eq!(backend.raw_u8(&ns(), keys::PENDING_ACTION), Some(0));
    }
}
