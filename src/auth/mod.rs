//! Control channel access checks.
//!
//! The control socket is world-readable: any local peer may dump the table.
//! Changing it requires the peer's UID to be on the configured allow list.

mod peer_creds;

pub use peer_creds::{peer_credentials, PeerInfo, PeerPolicy};
