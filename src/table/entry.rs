//! Per-terminal state.

use std::net::Ipv4Addr;
use std::time::{Duration, Instant};

use serde::Serialize;

use crate::error::{TableErrorKind, TermError, TermResult};

use super::mac::MacAddr;

/// Terminal state bits.
#[derive(Clone, Copy, PartialEq, Eq, Default, Debug)]
pub struct TermFlags(u8);

impl TermFlags {
    pub const EMPTY: Self = Self(0);
    /// The terminal passed authentication.
    pub const AUTHORIZED: Self = Self(1 << 0);
    /// Traffic was seen since the last expiry check.
    pub const ACTIVE_SINCE_SWEEP: Self = Self(1 << 1);

    pub const fn contains(self, other: Self) -> bool {
        self.0 & other.0 == other.0
    }

    pub fn insert(&mut self, other: Self) {
        self.0 |= other.0;
    }

    pub fn remove(&mut self, other: Self) {
        self.0 &= !other.0;
    }

    pub fn set(&mut self, other: Self, value: bool) {
        if value {
            self.insert(other);
        } else {
            self.remove(other);
        }
    }
}

/// Stable handle to an arena slot.
///
/// The generation changes every time the slot is reused, so a handle held by
/// the timer queue can never resolve to a later occupant of the same slot.
#[derive(Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Debug)]
pub struct EntryId {
    pub(crate) slot: u32,
    pub(crate) generation: u32,
}

/// A terminal as stored in the index.
#[derive(Debug, Clone)]
pub struct Entry {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub flags: TermFlags,
    pub created_at: Instant,
    /// When the entry's expiry timer next fires.
    pub deadline: Instant,
}

impl Entry {
    /// Fails when `now + ttl` is not representable as an `Instant`.
    pub fn new(mac: MacAddr, ip: Ipv4Addr, now: Instant, ttl: Duration) -> TermResult<Self> {
        Ok(Self {
            mac,
            ip,
            rx_bytes: 0,
            tx_bytes: 0,
            flags: TermFlags::EMPTY,
            created_at: now,
            deadline: deadline_after(now, ttl)?,
        })
    }

    pub fn is_authorized(&self) -> bool {
        self.flags.contains(TermFlags::AUTHORIZED)
    }

    pub fn is_active(&self) -> bool {
        self.flags.contains(TermFlags::ACTIVE_SINCE_SWEEP)
    }

    /// Owned copy handed out to callers outside the lock.
    pub fn view(&self, now: Instant) -> EntryView {
        EntryView {
            mac: self.mac,
            ip: self.ip,
            rx_bytes: self.rx_bytes,
            tx_bytes: self.tx_bytes,
            authorized: self.is_authorized(),
            active: self.is_active(),
            age_secs: now.saturating_duration_since(self.created_at).as_secs(),
        }
    }
}

/// `now + ttl`, or a table error when the sum overflows `Instant`.
pub fn deadline_after(now: Instant, ttl: Duration) -> TermResult<Instant> {
    now.checked_add(ttl).ok_or_else(|| {
        TermError::table(TableErrorKind::TtlOutOfRange {
            ttl_secs: ttl.as_secs(),
        })
    })
}

/// Snapshot of one terminal.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntryView {
    pub mac: MacAddr,
    pub ip: Ipv4Addr,
    pub rx_bytes: u64,
    pub tx_bytes: u64,
    pub authorized: bool,
    pub active: bool,
    /// Whole seconds since the terminal was first added.
    pub age_secs: u64,
}
