//! Durable pending-action record.
//!
//! A boot switch followed by a hardware reset is not atomic: power can drop
//! between the two, or the bootloader can silently keep the old slot. The
//! pending record lets the next boot distinguish "our rollback completed"
//! from "still crash-looping in the original slot".
//!
//! The action byte is the commit point. Writes go `action := None`, then the
//! label pair, then `action := code`, so no interruption can pair an old
//! action with a half-written label.

use crate::keys;
use crate::kv::KvSession;
use crate::label::{LabelStatus, PENDING_SLOT};
use crg_types::SlotLabel;
use serde::{Deserialize, Serialize};
use tracing::{debug, error};

/// What the previous boot left for us to finish or acknowledge.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PendingAction {
    None,
    /// Boot was redirected to the recorded previous slot.
    RollbackPrev,
    /// Boot was redirected to the factory slot.
    RollbackFactory,
    /// The user armed a deliberate restart; the next reset is not a crash.
    ControlledRestart,
}

impl PendingAction {
    #[must_use]
    pub const fn code(self) -> u8 {
        match self {
            Self::None => 0,
            Self::RollbackPrev => 1,
            Self::RollbackFactory => 2,
            Self::ControlledRestart => 3,
        }
    }

    #[must_use]
    pub const fn from_code(code: u8) -> Option<Self> {
        match code {
            0 => Some(Self::None),
            1 => Some(Self::RollbackPrev),
            2 => Some(Self::RollbackFactory),
            3 => Some(Self::ControlledRestart),
            _ => None,
        }
    }
}

/// A decoded pending record. `action == None` implies `label == None`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingRecord {
    pub action: PendingAction,
    pub label: Option<SlotLabel>,
}

impl PendingRecord {
    #[must_use]
    pub const fn none() -> Self {
        Self {
            action: PendingAction::None,
            label: None,
        }
    }
}

/// Persist a pending action with an optional target label.
///
/// Failure at any step degrades to "nothing pending": the action byte stays
/// (or reverts to) `None` and the label keys are removed.
pub fn write(session: &mut dyn KvSession, action: PendingAction, label: Option<&SlotLabel>) {
    if !session.put_u8(keys::PENDING_ACTION, PendingAction::None.code()) {
        error!(
            target: "crg::store::pending",
            "failed to clear pending action before label write"
        );
        return;
    }

    match label {
        Some(label) => {
            if !PENDING_SLOT.store(session, label) {
                // store() already removed the label keys
                return;
            }
        }
        None => PENDING_SLOT.clear(session),
    }

    if !session.put_u8(keys::PENDING_ACTION, action.code()) {
        error!(
            target: "crg::store::pending",
            action = action.code(),
            "failed to write pending action, reverting label keys"
        );
        PENDING_SLOT.clear(session);
    }
}

/// Read and validate the pending record.
///
/// Out-of-range action bytes clear the whole record. Label-bearing actions
/// with a missing or corrupt label clear the record — except
/// `ControlledRestart`, which is honored without a label because it encodes
/// explicit user intent, not a slot switch to verify.
pub fn read(session: &mut dyn KvSession) -> PendingRecord {
    let raw = session.get_u8(keys::PENDING_ACTION).unwrap_or(0);
    let Some(action) = PendingAction::from_code(raw) else {
        error!(
            target: "crg::store::pending",
            raw,
            "pending action byte out of range, clearing record"
        );
        clear(session);
        return PendingRecord::none();
    };

    if action == PendingAction::None {
        if session.contains(keys::PENDING_LABEL) || session.contains(keys::PENDING_CRC) {
            PENDING_SLOT.clear(session);
        }
        return PendingRecord::none();
    }

    match PENDING_SLOT.load(session) {
        LabelStatus::Valid(label) => PendingRecord {
            action,
            label: Some(label),
        },
        status => {
            if action == PendingAction::ControlledRestart {
                if status == LabelStatus::Corrupted {
                    error!(
                        target: "crg::store::pending",
                        "controlled-restart label corrupted, trusting user intent without it"
                    );
                    PENDING_SLOT.clear(session);
                } else {
                    debug!(
                        target: "crg::store::pending",
                        "controlled restart armed without a label"
                    );
                }
                return PendingRecord {
                    action,
                    label: None,
                };
            }
            error!(
                target: "crg::store::pending",
                action = action.code(),
                corrupted = (status == LabelStatus::Corrupted),
                "pending action lacks a valid label, clearing record"
            );
            clear(session);
            PendingRecord::none()
        }
    }
}

/// Reset the record to "nothing pending".
pub fn clear(session: &mut dyn KvSession) {
    session.put_u8(keys::PENDING_ACTION, PendingAction::None.code());
    PENDING_SLOT.clear(session);
}
