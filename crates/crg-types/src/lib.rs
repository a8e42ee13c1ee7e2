#![forbid(unsafe_code)]
//! Domain types shared across the crg workspace.
//!
//! Defines the validated owned string types (`SlotLabel`, `Namespace`), the
//! reset-cause and OTA image-state enums, and the size limits the durable
//! format depends on. Labels are owned fixed-capacity strings so callers can
//! hand in borrowed data without keeping it alive for the guard's lifetime.

use core::fmt;
use core::str::FromStr;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use thiserror::Error;

/// Maximum slot label length in bytes, excluding any terminator.
///
/// Matches the partition-table label field width on the target bootloaders.
pub const SLOT_LABEL_MAX_LEN: usize = 16;

/// Maximum NVS namespace length in bytes, excluding any terminator.
pub const NAMESPACE_MAX_LEN: usize = 15;

/// Rejection reasons for [`SlotLabel`] / [`Namespace`] construction.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum LabelError {
    #[error("label is empty")]
    Empty,
    #[error("label exceeds {max} bytes")]
    TooLong { max: usize },
    #[error("label has a non-printable or non-ASCII byte at offset {offset}")]
    InvalidByte { offset: usize },
}

fn validate(value: &str, max: usize) -> Result<(), LabelError> {
    if value.is_empty() {
        return Err(LabelError::Empty);
    }
    if value.len() > max {
        return Err(LabelError::TooLong { max });
    }
    if let Some(offset) = value.bytes().position(|b| !(0x20..=0x7E).contains(&b)) {
        return Err(LabelError::InvalidByte { offset });
    }
    Ok(())
}

/// Owned, validated application-partition label.
///
/// At most [`SLOT_LABEL_MAX_LEN`] bytes of printable ASCII with no embedded
/// NUL. Compared by byte equality. The backing storage has compile-time
/// capacity, so cloning and storing labels never allocates.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SlotLabel(heapless::String<SLOT_LABEL_MAX_LEN>);

impl SlotLabel {
    /// Validate and copy `value` into an owned label.
    pub fn new(value: &str) -> Result<Self, LabelError> {
        validate(value, SLOT_LABEL_MAX_LEN)?;
        let mut owned = heapless::String::new();
        owned.push_str(value).map_err(|()| LabelError::TooLong {
            max: SLOT_LABEL_MAX_LEN,
        })?;
        Ok(Self(owned))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for SlotLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SlotLabel {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<&str> for SlotLabel {
    type Error = LabelError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl AsRef<str> for SlotLabel {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

impl PartialEq<str> for SlotLabel {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl Serialize for SlotLabel {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> Deserialize<'de> for SlotLabel {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        Self::new(&raw).map_err(D::Error::custom)
    }
}

/// Owned, validated NVS namespace name (at most [`NAMESPACE_MAX_LEN`] bytes).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Namespace(heapless::String<NAMESPACE_MAX_LEN>);

impl Namespace {
    pub fn new(value: &str) -> Result<Self, LabelError> {
        validate(value, NAMESPACE_MAX_LEN)?;
        let mut owned = heapless::String::new();
        owned.push_str(value).map_err(|()| LabelError::TooLong {
            max: NAMESPACE_MAX_LEN,
        })?;
        Ok(Self(owned))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        self.0.as_str()
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Namespace {
    type Err = LabelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for Namespace {
    fn as_ref(&self) -> &str {
        self.as_str()
    }
}

/// Cause of the most recent chip reset, as reported by the platform.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResetReason {
    Unknown,
    PowerOn,
    /// External reset pin.
    External,
    /// Software-requested reset.
    Software,
    Panic,
    /// Interrupt watchdog fired.
    IntWatchdog,
    /// Task watchdog fired.
    TaskWatchdog,
    /// Any other watchdog source.
    OtherWatchdog,
    /// Wake from deep sleep.
    DeepSleep,
    Brownout,
    /// Reset over the SDIO interface.
    Sdio,
}

impl fmt::Display for ResetReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            Self::Unknown => "unknown",
            Self::PowerOn => "power_on",
            Self::External => "external",
            Self::Software => "software",
            Self::Panic => "panic",
            Self::IntWatchdog => "int_watchdog",
            Self::TaskWatchdog => "task_watchdog",
            Self::OtherWatchdog => "other_watchdog",
            Self::DeepSleep => "deep_sleep",
            Self::Brownout => "brownout",
            Self::Sdio => "sdio",
        };
        f.write_str(token)
    }
}

/// Per-slot image state maintained by the bootloader's OTA metadata.
///
/// `PendingVerify` means the slot booted for the first time and must be
/// explicitly confirmed or the bootloader will revert on the next reset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OtaImageState {
    New,
    PendingVerify,
    Valid,
    Invalid,
    Aborted,
    Undefined,
}

impl fmt::Display for OtaImageState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let token = match self {
            Self::New => "new",
            Self::PendingVerify => "pending_verify",
            Self::Valid => "valid",
            Self::Invalid => "invalid",
            Self::Aborted => "aborted",
            Self::Undefined => "undefined",
        };
        f.write_str(token)
    }
}

// ── Tests ───────────────────────────────────────────────────────────────────
