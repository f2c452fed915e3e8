//! Per-connection handler.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::io::{AsyncBufRead, AsyncWrite, BufReader};
use tokio::net::UnixStream;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::audit::{AuditEntry, AuditLogger, AuditResult};
use crate::auth::{peer_credentials, PeerInfo, PeerPolicy};
use crate::control::{read_line_with_timeout, write_reply_with_timeout, ControlCommand, Outcome};
use crate::error::{ProtocolErrorKind, TermError};
use crate::table::TermTable;

/// Shared state every connection handler needs.
pub struct ConnectionContext {
    pub table: Arc<TermTable>,
    pub policy: PeerPolicy,
    pub audit_logger: Option<Arc<AuditLogger>>,
    pub max_line_length: usize,
    pub socket_timeout: Duration,
}

/// Handle a single control connection until the peer hangs up.
pub async fn handle_connection(
    stream: UnixStream,
    ctx: Arc<ConnectionContext>,
) -> Result<(), TermError> {
    let peer = peer_credentials(&stream)?;
    debug!(uid = peer.uid, gid = peer.gid, pid = peer.pid, "Control peer connected");

    let (reader, mut writer) = stream.into_split();
    let mut reader = BufReader::new(reader);

    loop {
        match process_request(&mut reader, &mut writer, &ctx, &peer).await {
            Ok(()) => continue,
            Err(TermError::Protocol {
                kind: ProtocolErrorKind::ConnectionClosed,
            }) => {
                debug!(uid = peer.uid, "Control peer disconnected");
                return Ok(());
            }
            Err(TermError::Protocol {
                kind: ProtocolErrorKind::ConnectionTimeout,
            }) => {
                warn!(uid = peer.uid, "Control connection timed out");
                return Ok(());
            }
            Err(e) => return Err(e),
        }
    }
}

/// Read one line, act on it and write the reply.
///
/// Malformed input never fails the request: it is logged and answered like
/// any other write, with the number of bytes consumed.
async fn process_request<R, W>(
    reader: &mut R,
    writer: &mut W,
    ctx: &ConnectionContext,
    peer: &PeerInfo,
) -> Result<(), TermError>
where
    R: AsyncBufRead + Unpin,
    W: AsyncWrite + Unpin,
{
    let line = read_line_with_timeout(reader, ctx.max_line_length, ctx.socket_timeout).await?;

    let reply = match ControlCommand::parse(&line.text) {
        Ok(command) => {
            let outcome = if command.is_mutation() {
                apply_mutation(ctx, peer, command)
            } else {
                Some(command.execute(&ctx.table))
            };
            match outcome {
                Some(Outcome::Dumped(mut out)) => {
                    out.push('\n');
                    out
                }
                _ => format!("OK {}\n", line.consumed),
            }
        }
        Err(kind) => {
            error!(uid = peer.uid, error = %kind, "Invalid control input");
            format!("OK {}\n", line.consumed)
        }
    };

    write_reply_with_timeout(writer, reply.as_bytes(), ctx.socket_timeout).await
}

/// Check the peer against the write policy, run the command and audit it.
/// Returns `None` when the peer was refused.
fn apply_mutation(
    ctx: &ConnectionContext,
    peer: &PeerInfo,
    command: ControlCommand,
) -> Option<Outcome> {
    let request_id = Uuid::new_v4();

    let (outcome, result) = match ctx.policy.authorize_write(peer) {
        Ok(()) => {
            let outcome = command.execute(&ctx.table);
            let result = match &outcome {
                Outcome::Marked => {
                    info!(request_id = %request_id, command = %command, uid = peer.uid, "Terminal marked");
                    Some(AuditResult::Marked)
                }
                Outcome::UnknownTerminal => {
                    debug!(request_id = %request_id, command = %command, "Mark on unknown terminal ignored");
                    Some(AuditResult::NotFound)
                }
                Outcome::Flushed(dropped) => {
                    info!(request_id = %request_id, uid = peer.uid, dropped, "Table cleared by control request");
                    Some(AuditResult::Flushed { dropped: *dropped })
                }
                Outcome::Dumped(_) => None,
            };
            let Some(result) = result else {
                return Some(outcome);
            };
            (Some(outcome), result)
        }
        Err(e) => {
            warn!(request_id = %request_id, command = %command, error = %e, "Control change refused");
            let result = AuditResult::Rejected {
                reason: e.to_string(),
            };
            (None, result)
        }
    };

    if let Some(logger) = &ctx.audit_logger {
        let entry = AuditEntry::new(
            Utc::now().to_rfc3339(),
            request_id,
            command.name(),
            command.mac(),
            peer,
            result,
        );
        if let Err(e) = logger.log(&entry) {
            error!(error = %e, "Failed to write audit log entry");
        }
    }
    outcome
}
