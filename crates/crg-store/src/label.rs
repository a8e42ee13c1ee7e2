//! CRC-tagged durable label records.
//!
//! A label record is a string key plus a u32 CRC key. The CRC covers the
//! label bytes only, so a torn write of either key — or any bit flip — turns
//! the record `Corrupted` rather than silently yielding a wrong slot name.

use crate::crc::label_crc;
use crate::keys;
use crate::kv::KvSession;
use crg_types::SlotLabel;
use tracing::error;

/// Outcome of loading a label record.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum LabelStatus {
    /// Neither stored nor partially stored.
    Missing,
    Valid(SlotLabel),
    /// Present but failing its CRC or label validation; must be cleared.
    Corrupted,
}

/// The previous-slot record.
pub const PREV_SLOT: LabelRecord = LabelRecord::new(keys::PREV_LABEL, keys::PREV_CRC);

/// The pending-action target record.
pub(crate) const PENDING_SLOT: LabelRecord =
    LabelRecord::new(keys::PENDING_LABEL, keys::PENDING_CRC);

/// A durable (label, CRC) key pair.
pub struct LabelRecord {
    label_key: &'static str,
    crc_key: &'static str,
}

impl LabelRecord {
    #[must_use]
    pub const fn new(label_key: &'static str, crc_key: &'static str) -> Self {
        Self { label_key, crc_key }
    }

    /// Load and verify the record.
    ///
    /// An empty or absent string reads as `Missing`. A present label with a
    /// missing CRC key, a CRC mismatch, or bytes that fail label validation
    /// all read as `Corrupted`; the caller owns clearing the record.
    pub fn load(&self, session: &mut dyn KvSession) -> LabelStatus {
        let raw = match session.get_str(self.label_key) {
            Some(value) if !value.is_empty() => value,
            _ => return LabelStatus::Missing,
        };
        if !session.contains(self.crc_key) {
            return LabelStatus::Corrupted;
        }
        let stored = session.get_u32(self.crc_key).unwrap_or(0);
        if stored != label_crc(&raw) {
            return LabelStatus::Corrupted;
        }
        match SlotLabel::new(&raw) {
            Ok(label) => LabelStatus::Valid(label),
            Err(_) => LabelStatus::Corrupted,
        }
    }

    /// Store label then CRC. On any rejected write both keys are removed so
    /// a half-written record can never validate.
    pub fn store(&self, session: &mut dyn KvSession, label: &SlotLabel) -> bool {
        if !session.put_str(self.label_key, label.as_str()) {
            error!(
                target: "crg::store::label",
                key = self.label_key,
                "label write rejected"
            );
            session.remove(self.label_key);
            session.remove(self.crc_key);
            return false;
        }
        if !session.put_u32(self.crc_key, label_crc(label.as_str())) {
            error!(
                target: "crg::store::label",
                key = self.crc_key,
                "label CRC write rejected"
            );
            session.remove(self.label_key);
            session.remove(self.crc_key);
            return false;
        }
        true
    }

    /// Remove both keys.
    pub fn clear(&self, session: &mut dyn KvSession) {
        session.remove(self.label_key);
        session.remove(self.crc_key);
    }
}
