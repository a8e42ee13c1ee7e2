//! Complement-mirrored durable counters with self-repair.
//!
//! Each counter is stored as `(value, !value)` under two keys. A read that
//! fails the complement check logs, optionally rewrites `(0, !0)`, and
//! returns 0. Recovery deliberately under-counts: a lost increment delays a
//! rollback by one boot, while an invented one would trigger a spurious
//! rollback. Writes go value first, mirror second, so a power cut between
//! the two leaves a mismatch the next read detects.

use crate::keys;
use crate::kv::KvSession;
use core::fmt;
use core::marker::PhantomData;
use tracing::error;

/// Highest value the rollback counter is bumped to; `0xFF` stays unused so a
/// blank-flash read of all-ones never looks like a legitimate count.
pub const ROLLBACK_COUNT_MAX: u8 = 0xFE;

mod sealed {
    pub trait Sealed {}
    impl Sealed for u8 {}
    impl Sealed for u32 {}
}

/// Integer widths a redundant counter can be stored at.
pub trait KvWord: sealed::Sealed + Copy + Eq + fmt::Display {
    const ZERO: Self;
    #[must_use]
    fn invert(self) -> Self;
    fn load(session: &mut dyn KvSession, key: &str) -> Option<Self>;
    fn store(session: &mut dyn KvSession, key: &str, value: Self) -> bool;
}

impl KvWord for u32 {
    const ZERO: Self = 0;

    fn invert(self) -> Self {
        !self
    }

    fn load(session: &mut dyn KvSession, key: &str) -> Option<Self> {
        session.get_u32(key)
    }

    fn store(session: &mut dyn KvSession, key: &str, value: Self) -> bool {
        session.put_u32(key, value)
    }
}

impl KvWord for u8 {
    const ZERO: Self = 0;

    fn invert(self) -> Self {
        !self
    }

    fn load(session: &mut dyn KvSession, key: &str) -> Option<Self> {
        session.get_u8(key)
    }

    fn store(session: &mut dyn KvSession, key: &str, value: Self) -> bool {
        session.put_u8(key, value)
    }
}

/// A durable counter stored with its bitwise complement.
pub struct RedundantCounter<W> {
    value_key: &'static str,
    mirror_key: &'static str,
    _word: PhantomData<W>,
}

/// The consecutive-unhealthy-boots counter.
pub const FAIL_COUNTER: RedundantCounter<u32> =
    RedundantCounter::new(keys::FAILS, keys::FAILS_INV);

/// The consecutive-rollbacks counter.
pub const ROLLBACK_COUNTER: RedundantCounter<u8> =
    RedundantCounter::new(keys::ROLLBACK_COUNT, keys::ROLLBACK_COUNT_INV);

impl<W: KvWord> RedundantCounter<W> {
    #[must_use]
    pub const fn new(value_key: &'static str, mirror_key: &'static str) -> Self {
        Self {
            value_key,
            mirror_key,
            _word: PhantomData,
        }
    }

    /// Read and validate the counter.
    ///
    /// A missing primary reads as zero; a missing mirror defaults to the
    /// complement of the primary so a fresh namespace validates without any
    /// repair writes. On mismatch the counter reads as zero and, when
    /// `repair` is set, both keys are rewritten as `(0, !0)`.
    pub fn read(&self, session: &mut dyn KvSession, repair: bool) -> W {
        let value = W::load(session, self.value_key).unwrap_or(W::ZERO);
        let mirror = W::load(session, self.mirror_key).unwrap_or_else(|| value.invert());
        if mirror != value.invert() {
            error!(
                target: "crg::store::counter",
                key = self.value_key,
                value = %value,
                mirror = %mirror,
                "redundant counter mismatch, recovering to zero"
            );
            if repair {
                self.write(session, W::ZERO);
            }
            return W::ZERO;
        }
        value
    }

    /// Write `value` then its complement.
    pub fn write(&self, session: &mut dyn KvSession, value: W) {
        W::store(session, self.value_key, value);
        W::store(session, self.mirror_key, value.invert());
    }

    pub fn reset(&self, session: &mut dyn KvSession) {
        self.write(session, W::ZERO);
    }
}
