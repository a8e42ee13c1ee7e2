//! Scripted crash-loop demo.
//!
//! Plays one full guard lifecycle against the simulation platform: a clean
//! first boot, an OTA into a second slot with the previous slot saved, a
//! crash loop in the new image up to the fail limit, the rollback, and the
//! reconciliation pass after the device comes back on the old image. Returns
//! machine-friendly metrics plus README-friendly output lines.

use crate::guard::{Decision, RollbackGuard};
use crate::options::Options;
use crate::sim::{simulate_boot, BootOutcome, SimPlatform};
use crg_error::{CrgError, Result};
use crg_store::MemoryKv;
use crg_types::{OtaImageState, ResetReason, SlotLabel};
use tracing::info;

/// Configuration for the crash-loop demo.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoConfig {
    /// Suspicious boots before the guard rolls back.
    pub fail_limit: u32,
    /// Label of the slot the device starts on.
    pub good_slot: &'static str,
    /// Label of the misbehaving OTA slot.
    pub bad_slot: &'static str,
}

impl Default for DemoConfig {
    fn default() -> Self {
        Self {
            fail_limit: 3,
            good_slot: "app0",
            bad_slot: "app1",
        }
    }
}

/// Metrics from one demo run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DemoResult {
    /// Crashes absorbed before the guard acted.
    pub crashes_counted: u32,
    /// Slot the guard redirected the bootloader to.
    pub rolled_back_to: SlotLabel,
    /// Decision returned by the reconciliation boot after the rollback.
    pub recovery_decision: Decision,
    /// Fail counter after recovery.
    pub fails_after_recovery: u32,
    pub output_lines: Vec<String>,
}

/// Run the scripted crash-loop scenario end to end.
pub fn run_crash_loop_demo(config: &DemoConfig) -> Result<DemoResult> {
    if config.fail_limit == 0 {
        return Err(CrgError::InvalidArgument("fail_limit must be at least 1"));
    }
    let good: SlotLabel = config.good_slot.parse()?;
    let bad: SlotLabel = config.bad_slot.parse()?;
    if good == bad {
        return Err(CrgError::InvalidArgument("demo needs two distinct slots"));
    }

    let backend = MemoryKv::new();
    let sim = SimPlatform::new();
    sim.add_partition(good.clone(), OtaImageState::Valid);
    sim.add_partition(bad.clone(), OtaImageState::Valid);
    sim.set_running(&good);

    let mut options = Options::default();
    options.fail_limit = config.fail_limit;
    options.stable_time_ms = 0;

    let mut lines = Vec::new();

    // Clean first boot on the good slot.
    let mut guard = RollbackGuard::with_options(&sim, &backend, options.clone());
    let first = simulate_boot(&mut guard);
    lines.push(format!(
        "boot 0: power-on on '{good}', outcome {first:?}"
    ));

    // The application saves its slot before flashing the update, then the
    // updater switches boot to the new image.
    guard.save_current_as_previous_slot();
    sim.set_running(&bad);
    info!(target: "crg::guard::demo", from = %good, to = %bad, "ota applied");

    // The new image crashes on every boot.
    let mut crashes = 0;
    let mut restarted = false;
    for boot in 1..=config.fail_limit {
        sim.set_reset_reason(ResetReason::TaskWatchdog);
        let mut guard = RollbackGuard::with_options(&sim, &backend, options.clone());
        match simulate_boot(&mut guard) {
            BootOutcome::Completed(decision) => {
                crashes += 1;
                lines.push(format!(
                    "boot {boot}: crash on '{bad}', fails={}, decision {decision}",
                    guard.fail_count()
                ));
            }
            BootOutcome::Restarted => {
                restarted = true;
                lines.push(format!(
                    "boot {boot}: crash limit hit, rolling back to '{good}'"
                ));
                break;
            }
        }
    }
    debug_assert!(restarted, "demo script must reach the rollback");

    let rolled_back_to = sim.boot_target().unwrap_or_else(|| good.clone());
    info!(
        target: "crg::guard::demo",
        crashes,
        target_slot = %rolled_back_to,
        "rollback issued"
    );

    // The device comes back on the previous image; the guard reconciles the
    // pending record and clears the crash state.
    sim.apply_reboot(ResetReason::Software);
    let mut guard = RollbackGuard::with_options(&sim, &backend, options.clone());
    let recovery = simulate_boot(&mut guard);
    let recovery_decision = match recovery {
        BootOutcome::Completed(decision) => decision,
        BootOutcome::Restarted => Decision::None,
    };
    guard.mark_healthy_now();
    let fails_after_recovery = guard.fail_count();
    lines.push(format!(
        "recovery: running '{rolled_back_to}', decision {recovery_decision}, fails={fails_after_recovery}"
    ));

    Ok(DemoResult {
        crashes_counted: crashes,
        rolled_back_to,
        recovery_decision,
        fails_after_recovery,
        output_lines: lines,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn demo_script_recovers_to_good_slot() {
        let result = run_crash_loop_demo(&DemoConfig::default()).expect("demo runs");
        assert_eq!(result.crashes_counted, 2);
        assert_eq!(result.rolled_back_to.as_str(), "app0");
        assert_eq!(result.recovery_decision, Decision::None);
        assert_eq!(result.fails_after_recovery, 0);
        assert_eq!(result.output_lines.len(), 5);
    }

    #[test]
    fn demo_rejects_degenerate_configs() {
        let mut config = DemoConfig::default();
        config.fail_limit = 0;
        assert!(run_crash_loop_demo(&config).is_err());

        let mut config = DemoConfig::default();
        config.bad_slot = config.good_slot;
        assert!(run_crash_loop_demo(&config).is_err());
    }
}
