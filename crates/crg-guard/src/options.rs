//! Guard configuration.

use crg_types::{Namespace, SlotLabel};

/// Verbosity of the guard's own diagnostics.
///
/// Gates what the guard emits at all; subscriber-side filtering still applies
/// on top. `None` silences the guard even under a permissive subscriber.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum LogLevel {
    None,
    Error,
    Info,
    Debug,
}

/// Tunable policy for the rollback guard.
///
/// String fields are owned copies; callers may pass transient borrows to the
/// constructors and drop them immediately.
#[derive(Debug, Clone)]
pub struct Options {
    /// NVS namespace holding the guard's durable records.
    pub namespace: Namespace,
    /// Suspicious boots before a rollback is attempted. 0 disables rollback.
    pub fail_limit: u32,
    /// Uptime in running state before auto mark-healthy. 0 disables the
    /// stable timer.
    pub stable_time_ms: u32,
    /// On the first boot with no previous slot stored, record the running
    /// slot as previous. Usually better done explicitly before an OTA.
    pub auto_save_prev_slot: bool,
    pub log_level: LogLevel,
    /// Try the factory image when no usable previous slot exists.
    pub fallback_to_factory: bool,
    /// Partition label of the factory image.
    pub factory_label: SlotLabel,
    /// Consecutive rollbacks tolerated before the factory fallback is tried
    /// instead. 0 means unlimited, with ping-pong risk between two bad slots.
    pub max_rollback_attempts: u8,
    /// Treat a software-requested reset as suspicious.
    pub sw_reset_counts_as_crash: bool,
    /// Treat a brownout reset as suspicious.
    pub brownout_counts_as_crash: bool,
}

impl Default for Options {
    fn default() -> Self {
        Self {
            namespace: Namespace::new("crg").expect("default namespace is valid"),
            fail_limit: 3,
            stable_time_ms: 60_000,
            auto_save_prev_slot: false,
            log_level: LogLevel::Info,
            fallback_to_factory: false,
            factory_label: SlotLabel::new("factory").expect("default factory label is valid"),
            max_rollback_attempts: 1,
            sw_reset_counts_as_crash: false,
            brownout_counts_as_crash: false,
        }
    }
}
