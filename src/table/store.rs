//! The terminal table: hash index, expiry timers and the lock around them.

use std::net::Ipv4Addr;
use std::sync::{Arc, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::{Duration, Instant};

use tokio::sync::Notify;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::error::{TableErrorKind, TermError, TermResult};

use super::entry::{deadline_after, Entry, EntryView, TermFlags};
use super::hash::HashSalt;
use super::index::HashIndex;
use super::mac::MacAddr;
use super::scheduler::{SweepReport, TimerQueue};

/// Default idle timeout.
pub const DEFAULT_TTL: Duration = Duration::from_secs(60);

/// Default upper bound on tracked terminals.
pub const DEFAULT_MAX_ENTRIES: usize = 65_536;

/// Timers handled per write-lock acquisition during a sweep.
const SWEEP_BATCH: usize = 64;

#[derive(Debug)]
struct TableState {
    index: HashIndex,
    timers: TimerQueue,
}

/// Thread-safe table of terminals keyed by hardware address.
///
/// Lookups and traversal share a read lock; every mutation, including the
/// expiry sweep, takes the write lock. No I/O happens while a guard is held.
pub struct TermTable {
    state: RwLock<TableState>,
    ttl: Duration,
    /// Wakes the expiry task when a new timer is armed.
    timers_changed: Notify,
}

impl TermTable {
    /// Create an empty table with a freshly drawn hash salt.
    pub fn new(ttl: Duration, max_entries: usize) -> TermResult<Self> {
        Ok(Self::with_salt(ttl, max_entries, HashSalt::random()?))
    }

    pub fn with_salt(ttl: Duration, max_entries: usize, salt: HashSalt) -> Self {
        Self {
            state: RwLock::new(TableState {
                index: HashIndex::new(salt, max_entries),
                timers: TimerQueue::new(),
            }),
            ttl,
            timers_changed: Notify::new(),
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, TableState> {
        self.state.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, TableState> {
        self.state.write().unwrap_or_else(|e| e.into_inner())
    }

    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    pub fn len(&self) -> usize {
        self.read().index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of armed expiry timers. Equals `len()` at rest.
    pub fn pending_timers(&self) -> usize {
        self.read().timers.len()
    }

    pub fn lookup(&self, mac: &MacAddr) -> Option<EntryView> {
        let now = Instant::now();
        self.read().index.get_by_mac(mac).map(|e| e.view(now))
    }

    /// Whether `mac` is known and authorized. Unknown terminals are not.
    pub fn is_authenticated(&self, mac: &MacAddr) -> bool {
        self.read()
            .index
            .get_by_mac(mac)
            .map(Entry::is_authorized)
            .unwrap_or(false)
    }

    /// Record a terminal sighting.
    ///
    /// A known terminal keeps its counters, flags and timer; its address is
    /// refreshed and it counts as active for the current period.
    pub fn add(&self, mac: MacAddr, ip: Ipv4Addr) -> TermResult<EntryView> {
        self.add_at(mac, ip, Instant::now())
    }

    pub(crate) fn add_at(
        &self,
        mac: MacAddr,
        ip: Ipv4Addr,
        now: Instant,
    ) -> TermResult<EntryView> {
        let mut state = self.write();
        let TableState { index, timers } = &mut *state;

        if let Some(entry) = index.get_by_mac_mut(&mac) {
            entry.ip = ip;
            entry.flags.insert(TermFlags::ACTIVE_SINCE_SWEEP);
            return Ok(entry.view(now));
        }

        let entry = Entry::new(mac, ip, now, self.ttl)?;
        let deadline = entry.deadline;
        let view = entry.view(now);
        let id = index.insert(entry).map_err(TermError::table)?;
        timers.arm(id, deadline);
        drop(state);

        self.timers_changed.notify_one();
        Ok(view)
    }

    /// Drop a single terminal and its timer.
    pub fn remove(&self, mac: &MacAddr) -> bool {
        let mut state = self.write();
        let TableState { index, timers } = &mut *state;
        match index.find(mac) {
            Some(id) => {
                timers.cancel(id);
                index.remove(id).is_some()
            }
            None => false,
        }
    }

    /// Set or clear the authorized flag. Leaves activity and timer alone.
    pub fn mark(&self, mac: &MacAddr, authorized: bool) -> TermResult<()> {
        let mut state = self.write();
        match state.index.get_by_mac_mut(mac) {
            Some(entry) => {
                entry.flags.set(TermFlags::AUTHORIZED, authorized);
                Ok(())
            }
            None => Err(TermError::table(TableErrorKind::NotFound { mac: *mac })),
        }
    }

    /// Packet-path update: add to the byte counters and flag the terminal as
    /// active for the current period. Returns false for unknown terminals.
    pub fn record_traffic(&self, mac: &MacAddr, rx_bytes: u64, tx_bytes: u64) -> bool {
        let mut state = self.write();
        match state.index.get_by_mac_mut(mac) {
            Some(entry) => {
                entry.rx_bytes = entry.rx_bytes.wrapping_add(rx_bytes);
                entry.tx_bytes = entry.tx_bytes.wrapping_add(tx_bytes);
                entry.flags.insert(TermFlags::ACTIVE_SINCE_SWEEP);
                true
            }
            None => false,
        }
    }

    /// Drop every terminal and every pending timer in one critical section.
    pub fn flush(&self) -> usize {
        let dropped = {
            let mut state = self.write();
            state.timers.clear();
            state.index.clear()
        };
        info!(dropped, "Terminal table flushed");
        dropped
    }

    /// Visit every terminal under a single read lock, so the walk sees one
    /// consistent state of the table.
    pub fn for_each<F>(&self, mut visitor: F)
    where
        F: FnMut(&EntryView),
    {
        let now = Instant::now();
        let state = self.read();
        for entry in state.index.iter() {
            visitor(&entry.view(now));
        }
    }

    pub fn snapshot(&self) -> Vec<EntryView> {
        let mut out = Vec::with_capacity(self.len());
        self.for_each(|view| out.push(view.clone()));
        out
    }

    pub fn next_deadline(&self) -> Option<Instant> {
        self.read().timers.next_deadline()
    }

    /// Fire every timer due at `now`.
    ///
    /// An entry that saw traffic since its last check has the activity bit
    /// cleared and is re-armed for another period; an idle one is unlinked.
    /// The write lock is released every `SWEEP_BATCH` timers so lookups are
    /// not held up by a large burst of expiries.
    pub fn sweep_expired(&self, now: Instant) -> SweepReport {
        let mut report = SweepReport::default();
        let mut evicted = Vec::new();
        loop {
            let mut state = self.write();
            let TableState { index, timers } = &mut *state;

            let mut handled = 0;
            while handled < SWEEP_BATCH {
                let Some(timer) = timers.pop_due(now) else {
                    break;
                };
                handled += 1;
                let Some(entry) = index.get_mut(timer.id) else {
                    continue;
                };
                if entry.is_active() {
                    if let Ok(deadline) = deadline_after(now, self.ttl) {
                        entry.flags.remove(TermFlags::ACTIVE_SINCE_SWEEP);
                        entry.deadline = deadline;
                        timers.arm(timer.id, deadline);
                        report.renewed += 1;
                        continue;
                    }
                    warn!(mac = %entry.mac, "Expiry deadline out of range, dropping terminal");
                }
                if let Some(entry) = index.remove(timer.id) {
                    evicted.push(entry.mac);
                    report.evicted += 1;
                }
            }
            drop(state);

            if handled < SWEEP_BATCH {
                break;
            }
        }

        for mac in evicted {
            debug!(mac = %mac, "Terminal expired");
        }
        report
    }

    /// Spawn the task that fires expiry timers.
    ///
    /// The task sleeps until the earliest deadline, or until a new timer is
    /// armed, and stops when `shutdown` is notified.
    pub fn start_expiry_task(self: &Arc<Self>, shutdown: Arc<Notify>) -> JoinHandle<()> {
        let table = Arc::clone(self);
        tokio::spawn(async move {
            debug!(ttl_secs = table.ttl.as_secs(), "Expiry task started");
            loop {
                let next = table.next_deadline();
                let wait = async {
                    match next {
                        Some(deadline) => {
                            tokio::time::sleep_until(tokio::time::Instant::from_std(deadline)).await
                        }
                        None => std::future::pending::<()>().await,
                    }
                };

                tokio::select! {
                    _ = wait => {
                        let report = table.sweep_expired(Instant::now());
                        if report.evicted > 0 {
                            debug!(
                                evicted = report.evicted,
                                renewed = report.renewed,
                                remaining = table.len(),
                                "Expiry sweep"
                            );
                        }
                    }
                    _ = table.timers_changed.notified() => {}
                    _ = shutdown.notified() => break,
                }
            }
            debug!("Expiry task stopped");
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const TTL: Duration = Duration::from_secs(60);

    fn table() -> TermTable {
        TermTable::with_salt(TTL, 1024, HashSalt::from_raw(0x5eed))
    }

    fn mac(last: u8) -> MacAddr {
        MacAddr::new([0x00, 0x11, 0x22, 0x33, 0x44, last])
    }

    fn ip(last: u8) -> Ipv4Addr {
        Ipv4Addr::new(10, 0, 0, last)
    }

    #[test]
    fn test_add_then_lookup() {
        let table = table();
        table.add(mac(0x55), ip(5)).unwrap();

        let view = table.lookup(&mac(0x55)).unwrap();
        assert_eq!(view.mac, mac(0x55));
        assert_eq!(view.ip, ip(5));
        assert!(!view.authorized);
        assert_eq!(view.rx_bytes, 0);
    }

    #[test]
    fn test_lookup_unknown() {
        let table = table();
        assert!(table.lookup(&mac(1)).is_none());
        assert!(!table.is_authenticated(&mac(1)));
    }

    #[test]
    fn test_second_add_upserts() {
        let table = table();
        table.add(mac(1), ip(1)).unwrap();
        table.mark(&mac(1), true).unwrap();
        table.add(mac(1), ip(99)).unwrap();

        assert_eq!(table.len(), 1);
        assert_eq!(table.pending_timers(), 1);
        let view = table.lookup(&mac(1)).unwrap();
        assert_eq!(view.ip, ip(99));
        assert!(view.authorized);
    }

    #[test]
    fn test_add_when_full() {
        let table = TermTable::with_salt(TTL, 2, HashSalt::from_raw(1));
        table.add(mac(1), ip(1)).unwrap();
        table.add(mac(2), ip(2)).unwrap();

        let err = table.add(mac(3), ip(3)).unwrap_err();
        assert!(matches!(
            err,
            TermError::Table {
                kind: TableErrorKind::ResourceExhausted { capacity: 2 }
            }
        ));
        assert!(table.lookup(&mac(3)).is_none());
        assert_eq!(table.pending_timers(), 2);

        // Upserting an existing terminal still works at capacity.
        assert!(table.add(mac(1), ip(7)).is_ok());
    }

    #[test]
    fn test_mark_authorized_and_denied() {
        let table = table();
        table.add(mac(1), ip(1)).unwrap();

        table.mark(&mac(1), true).unwrap();
        assert!(table.is_authenticated(&mac(1)));

        table.mark(&mac(1), false).unwrap();
        assert!(!table.is_authenticated(&mac(1)));
    }

    #[test]
    fn test_mark_unknown_is_not_found() {
        let table = table();
        table.add(mac(1), ip(1)).unwrap();

        let err = table.mark(&mac(2), true).unwrap_err();
        assert!(matches!(
            err,
            TermError::Table {
                kind: TableErrorKind::NotFound { .. }
            }
        ));
        assert_eq!(table.len(), 1);
        assert!(table.lookup(&mac(2)).is_none());
        assert!(!table.is_authenticated(&mac(1)));
    }

    #[test]
    fn test_mark_does_not_touch_activity() {
        let table = table();
        let t0 = Instant::now();
        table.add_at(mac(1), ip(1), t0).unwrap();
        table.mark(&mac(1), true).unwrap();
        assert!(!table.lookup(&mac(1)).unwrap().active);

        // Still idle, so the first sweep evicts it.
        let report = table.sweep_expired(t0 + TTL);
        assert_eq!(report.evicted, 1);
    }

    #[test]
    fn test_record_traffic() {
        let table = table();
        table.add(mac(1), ip(1)).unwrap();
        assert!(table.record_traffic(&mac(1), 100, 40));
        assert!(table.record_traffic(&mac(1), 1, 2));
        assert!(!table.record_traffic(&mac(2), 1, 1));

        let view = table.lookup(&mac(1)).unwrap();
        assert_eq!((view.rx_bytes, view.tx_bytes), (101, 42));
        assert!(view.active);
    }

    #[test]
    fn test_idle_entry_evicted_after_one_period() {
        let table = table();
        let t0 = Instant::now();
        table.add_at(mac(0x55), ip(5), t0).unwrap();

        let report = table.sweep_expired(t0 + TTL - Duration::from_millis(1));
        assert_eq!(report, SweepReport::default());
        assert!(table.lookup(&mac(0x55)).is_some());

        let report = table.sweep_expired(t0 + TTL);
        assert_eq!(report.evicted, 1);
        assert!(table.lookup(&mac(0x55)).is_none());
        assert_eq!(table.pending_timers(), 0);
    }

    #[test]
    fn test_one_missed_period_is_tolerated() {
        let table = table();
        let t0 = Instant::now();
        table.add_at(mac(1), ip(1), t0).unwrap();
        table.record_traffic(&mac(1), 10, 10);

        let report = table.sweep_expired(t0 + TTL);
        assert_eq!(report, SweepReport { renewed: 1, evicted: 0 });
        assert!(!table.lookup(&mac(1)).unwrap().active);

        let report = table.sweep_expired(t0 + TTL * 2);
        assert_eq!(report.evicted, 1);
        assert!(table.is_empty());
    }

    #[test]
    fn test_active_entry_never_expires() {
        let table = table();
        let t0 = Instant::now();
        table.add_at(mac(1), ip(1), t0).unwrap();
        table.add_at(mac(2), ip(2), t0).unwrap();

        for period in 1..=10u32 {
            table.record_traffic(&mac(1), 1, 1);
            table.sweep_expired(t0 + TTL * period);
        }

        assert!(table.lookup(&mac(1)).is_some());
        assert!(table.lookup(&mac(2)).is_none());
        assert_eq!(table.pending_timers(), 1);
    }

    #[test]
    fn test_timers_fire_independently() {
        let table = table();
        let t0 = Instant::now();
        table.add_at(mac(1), ip(1), t0).unwrap();
        table.add_at(mac(2), ip(2), t0 + Duration::from_secs(30)).unwrap();

        table.sweep_expired(t0 + TTL);
        assert!(table.lookup(&mac(1)).is_none());
        assert!(table.lookup(&mac(2)).is_some());
        assert_eq!(table.next_deadline(), Some(t0 + Duration::from_secs(90)));
    }

    #[test]
    fn test_remove_cancels_timer() {
        let table = table();
        table.add(mac(1), ip(1)).unwrap();
        table.add(mac(2), ip(2)).unwrap();

        assert!(table.remove(&mac(1)));
        assert!(!table.remove(&mac(1)));
        assert_eq!(table.len(), 1);
        assert_eq!(table.pending_timers(), 1);
    }

    #[test]
    fn test_sweep_after_remove_only_touches_live_entries() {
        let table = table();
        let t0 = Instant::now();
        table.add_at(mac(1), ip(1), t0).unwrap();
        table.add_at(mac(2), ip(2), t0).unwrap();
        assert!(table.remove(&mac(1)));

        // Same address comes back later and may reuse the freed slot.
        table.add_at(mac(1), ip(3), t0 + Duration::from_secs(10)).unwrap();
        assert_eq!(table.pending_timers(), 2);

        let report = table.sweep_expired(t0 + TTL);
        assert_eq!(report, SweepReport { renewed: 0, evicted: 1 });
        assert!(table.lookup(&mac(2)).is_none());
        assert_eq!(table.lookup(&mac(1)).unwrap().ip, ip(3));
        assert_eq!(table.pending_timers(), 1);
        assert_eq!(table.next_deadline(), Some(t0 + Duration::from_secs(70)));

        let report = table.sweep_expired(t0 + Duration::from_secs(70));
        assert_eq!(report.evicted, 1);
        assert!(table.is_empty());
        assert_eq!(table.pending_timers(), 0);
    }

    #[test]
    fn test_sweep_handles_bursts_larger_than_a_batch() {
        let table = table();
        let t0 = Instant::now();
        for i in 0..200u8 {
            table.add_at(MacAddr::new([2, 0, 0, 0, i, i]), ip(i), t0).unwrap();
        }
        for i in 0..100u8 {
            table.record_traffic(&MacAddr::new([2, 0, 0, 0, i, i]), 1, 1);
        }

        let report = table.sweep_expired(t0 + TTL);
        assert_eq!(report, SweepReport { renewed: 100, evicted: 100 });
        assert_eq!(table.len(), 100);
        assert_eq!(table.pending_timers(), 100);
        assert_eq!(table.next_deadline(), Some(t0 + TTL * 2));
    }

    #[test]
    fn test_activity_just_after_a_sweep_bounds_eviction_at_two_periods() {
        let table = table();
        let t0 = Instant::now();
        let eps = Duration::from_secs(1);
        table.add_at(mac(1), ip(1), t0).unwrap();
        table.record_traffic(&mac(1), 1, 1);

        assert_eq!(table.sweep_expired(t0 + TTL).renewed, 1);

        // Last activity lands right after the first sweep.
        table.record_traffic(&mac(1), 1, 1);
        let last_activity = t0 + TTL + eps;

        assert_eq!(table.sweep_expired(t0 + TTL * 2).renewed, 1);
        assert!(table.lookup(&mac(1)).is_some());

        let report = table.sweep_expired(t0 + TTL * 3 - Duration::from_millis(1));
        assert_eq!(report, SweepReport::default());
        assert!(table.lookup(&mac(1)).is_some());

        let evicted_at = t0 + TTL * 3;
        assert_eq!(table.sweep_expired(evicted_at).evicted, 1);
        assert!(table.lookup(&mac(1)).is_none());
        assert!(evicted_at - last_activity <= TTL * 2);
        assert!(evicted_at - last_activity >= TTL);
    }

    #[test]
    fn test_re_add_before_due_sweep_keeps_entry() {
        let table = table();
        let t0 = Instant::now();
        table.add_at(mac(1), ip(1), t0).unwrap();

        // The timer is already due when the terminal is seen again.
        table.add_at(mac(1), ip(1), t0 + TTL).unwrap();
        let report = table.sweep_expired(t0 + TTL);
        assert_eq!(report, SweepReport { renewed: 1, evicted: 0 });
        assert!(table.lookup(&mac(1)).is_some());
        assert_eq!(table.pending_timers(), 1);

        assert_eq!(table.sweep_expired(t0 + TTL * 2).evicted, 1);
    }

    #[test]
    fn test_ttl_out_of_range_is_reported() {
        let table = TermTable::with_salt(Duration::from_secs(u64::MAX), 16, HashSalt::from_raw(9));
        let err = table.add(mac(1), ip(1)).unwrap_err();
        assert!(matches!(
            err,
            TermError::Table {
                kind: TableErrorKind::TtlOutOfRange { .. }
            }
        ));
        assert!(table.is_empty());
        assert_eq!(table.pending_timers(), 0);
    }

    #[test]
    fn test_re_add_after_eviction_gets_fresh_state() {
        let table = table();
        let t0 = Instant::now();
        table.add_at(mac(1), ip(1), t0).unwrap();
        table.mark(&mac(1), true).unwrap();
        table.sweep_expired(t0 + TTL);

        let view = table.add_at(mac(1), ip(2), t0 + TTL).unwrap();
        assert!(!view.authorized);
        assert_eq!(table.pending_timers(), 1);
    }

    #[test]
    fn test_flush_drops_entries_and_timers() {
        let table = table();
        for i in 0..20 {
            table.add(mac(i), ip(i)).unwrap();
        }
        assert_eq!(table.flush(), 20);
        assert!(table.is_empty());
        assert_eq!(table.pending_timers(), 0);
        assert!(table.next_deadline().is_none());
        assert_eq!(table.snapshot().len(), 0);
    }

    #[test]
    fn test_snapshot_matches_contents() {
        let table = table();
        for i in 0..10 {
            table.add(mac(i), ip(i)).unwrap();
        }
        let mut macs: Vec<u8> = table.snapshot().iter().map(|v| v.mac.octets()[5]).collect();
        macs.sort_unstable();
        assert_eq!(macs, (0..10).collect::<Vec<_>>());
    }

    #[test]
    fn test_concurrent_dump_sees_consistent_entries() {
        let table = Arc::new(table());
        let writers: Vec<_> = (0..4u8)
            .map(|w| {
                let table = Arc::clone(&table);
                thread::spawn(move || {
                    for round in 0..200u32 {
                        let m = MacAddr::new([w, 0, 0, 0, w, (round % 32) as u8]);
                        let _ = table.add(m, Ipv4Addr::new(10, w, 0, (round % 32) as u8));
                        let _ = table.mark(&m, round % 2 == 0);
                        table.record_traffic(&m, 1, 1);
                        if round % 50 == 0 {
                            table.flush();
                        }
                    }
                })
            })
            .collect();

        let reader = {
            let table = Arc::clone(&table);
            thread::spawn(move || {
                for _ in 0..200 {
                    table.for_each(|view| {
                        let [w, _, _, _, _, last] = view.mac.octets();
                        assert_eq!(view.ip, Ipv4Addr::new(10, w, 0, last));
                        assert_eq!(view.rx_bytes, view.tx_bytes);
                    });
                }
            })
        };

        for handle in writers {
            handle.join().unwrap();
        }
        reader.join().unwrap();
        assert_eq!(table.len(), table.pending_timers());
    }

    #[tokio::test]
    async fn test_expiry_task_evicts_idle_terminals() {
        let table = Arc::new(TermTable::with_salt(
            Duration::from_millis(50),
            16,
            HashSalt::from_raw(3),
        ));
        let shutdown = Arc::new(Notify::new());
        let handle = table.start_expiry_task(Arc::clone(&shutdown));

        table.add(mac(1), ip(1)).unwrap();
        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(table.lookup(&mac(1)).is_some());

        tokio::time::sleep(Duration::from_millis(200)).await;
        assert!(table.lookup(&mac(1)).is_none());

        shutdown.notify_waiters();
        handle.abort();
    }
}
