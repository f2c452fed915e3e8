//! Audit log of control channel changes.
//!
//! Every mutating control command (authorize, deny, clear) is written as one
//! JSON object per line.

mod entry;
mod logger;

pub use entry::{AuditEntry, AuditResult};
pub use logger::AuditLogger;
