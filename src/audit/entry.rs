//! Audit entry types.

use serde::Serialize;
use uuid::Uuid;

use crate::auth::PeerInfo;
use crate::table::MacAddr;

/// A single audit log entry.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEntry {
    /// RFC 3339 timestamp of the command.
    pub timestamp: String,
    /// Unique identifier for the request.
    pub request_id: Uuid,
    /// Command name (`authorize`, `deny`, `clear`).
    pub command: String,
    /// Target terminal, for mark commands.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub mac: Option<MacAddr>,
    /// UID of the peer that made the request.
    pub peer_uid: u32,
    /// GID of the peer that made the request.
    pub peer_gid: u32,
    /// PID of the peer process.
    pub peer_pid: i32,
    /// What happened.
    pub result: AuditResult,
}

impl AuditEntry {
    pub fn new(
        timestamp: String,
        request_id: Uuid,
        command: impl Into<String>,
        mac: Option<MacAddr>,
        peer: &PeerInfo,
        result: AuditResult,
    ) -> Self {
        Self {
            timestamp,
            request_id,
            command: command.into(),
            mac,
            peer_uid: peer.uid,
            peer_gid: peer.gid,
            peer_pid: peer.pid,
            result,
        }
    }
}

/// Outcome of an audited command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum AuditResult {
    /// The flag was changed.
    Marked,
    /// Mark targeted an address the table does not hold.
    NotFound,
    /// The table was flushed.
    Flushed { dropped: usize },
    /// The peer may not change the table.
    Rejected { reason: String },
}
