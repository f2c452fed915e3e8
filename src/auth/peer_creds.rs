//! Peer credential lookup and write authorization.

use std::os::fd::AsFd;

use crate::error::{AuthErrorKind, TermError};

/// Information about the connected peer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeerInfo {
    /// User ID of the peer process.
    pub uid: u32,
    /// Group ID of the peer process.
    pub gid: u32,
    /// Process ID of the peer process (0 where the platform does not report it).
    pub pid: i32,
}

/// Read the credentials of the process on the other end of a Unix socket.
#[cfg(target_os = "linux")]
pub fn peer_credentials<S: AsFd>(stream: &S) -> Result<PeerInfo, TermError> {
    use nix::sys::socket::{getsockopt, sockopt::PeerCredentials};

    let creds = getsockopt(stream, PeerCredentials).map_err(|e| TermError::Socket {
        message: format!("Failed to get peer credentials: {}", e),
    })?;

    Ok(PeerInfo {
        uid: creds.uid(),
        gid: creds.gid(),
        pid: creds.pid(),
    })
}

/// Read the credentials of the process on the other end of a Unix socket.
#[cfg(not(target_os = "linux"))]
pub fn peer_credentials<S: AsFd>(stream: &S) -> Result<PeerInfo, TermError> {
    let (uid, gid) = nix::unistd::getpeereid(stream).map_err(|e| TermError::Socket {
        message: format!("Failed to get peer credentials: {}", e),
    })?;

    Ok(PeerInfo {
        uid: uid.as_raw(),
        gid: gid.as_raw(),
        pid: 0,
    })
}

/// Who may change the terminal table.
#[derive(Debug, Clone)]
pub struct PeerPolicy {
    allowed_uids: Vec<u32>,
}

impl PeerPolicy {
    pub fn new(allowed_uids: Vec<u32>) -> Self {
        Self { allowed_uids }
    }

    /// Check that `peer` may issue mutating commands.
    ///
    /// An empty allow list rejects every peer.
    pub fn authorize_write(&self, peer: &PeerInfo) -> Result<(), TermError> {
        if self.allowed_uids.contains(&peer.uid) {
            Ok(())
        } else {
            Err(TermError::Auth {
                kind: AuthErrorKind::UnauthorizedPeer { uid: peer.uid },
            })
        }
    }
}
