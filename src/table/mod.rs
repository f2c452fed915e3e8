//! Terminal table.
//!
//! Tracks every client device seen on the network by hardware address:
//! its assigned IPv4 address, traffic counters, authorization flag and idle
//! expiry timer.
//!
//! ## Layout
//!
//! - [`MacAddr`]: the key type
//! - [`HashIndex`]: 256 salted buckets with chains threaded through an arena
//! - `TimerQueue`: per-entry expiry deadlines in a min-heap
//! - [`TermTable`]: the lock around both, and the operations callers use

mod entry;
mod hash;
mod index;
mod mac;
mod scheduler;
mod store;

pub use entry::{Entry, EntryId, EntryView, TermFlags};
pub use hash::{HashSalt, BUCKET_COUNT};
pub use index::HashIndex;
pub use mac::{MacAddr, ParseMacError, ETH_ALEN};
pub use scheduler::SweepReport;
pub use store::{TermTable, DEFAULT_MAX_ENTRIES, DEFAULT_TTL};
