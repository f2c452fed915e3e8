//! Error types for the terminal daemon.

use thiserror::Error;

use crate::table::MacAddr;

/// Main error type for the daemon.
#[derive(Error, Debug)]
pub enum TermError {
    /// Configuration-related errors.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Socket-related errors.
    #[error("Socket error: {message}")]
    Socket { message: String },

    /// Peer authorization errors on the control channel.
    #[error("Authentication error: {kind}")]
    Auth { kind: AuthErrorKind },

    /// Terminal table errors.
    #[error("Table error: {kind}")]
    Table { kind: TableErrorKind },

    /// Control protocol errors.
    #[error("Protocol error: {kind}")]
    Protocol { kind: ProtocolErrorKind },

    /// I/O errors.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization errors.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Authentication error kinds.
#[derive(Error, Debug)]
pub enum AuthErrorKind {
    #[error("Peer UID {uid} may not modify the terminal table")]
    UnauthorizedPeer { uid: u32 },
}

/// Terminal table error kinds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TableErrorKind {
    #[error("Terminal table full ({capacity} entries)")]
    ResourceExhausted { capacity: usize },

    #[error("No terminal with address {mac}")]
    NotFound { mac: MacAddr },

    #[error("Expiry deadline out of range for a {ttl_secs}s TTL")]
    TtlOutOfRange { ttl_secs: u64 },
}

/// Control protocol error kinds.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolErrorKind {
    #[error("Empty command")]
    Empty,

    #[error("Invalid MAC address format: {line}")]
    InvalidMac { line: String },

    #[error("Invalid format: {line}")]
    UnknownOperation { line: String },

    #[error("Connection closed")]
    ConnectionClosed,

    #[error("Connection timed out")]
    ConnectionTimeout,
}

impl TermError {
    /// Shorthand for a table error.
    pub fn table(kind: TableErrorKind) -> Self {
        TermError::Table { kind }
    }

    /// Shorthand for a protocol error.
    pub fn protocol(kind: ProtocolErrorKind) -> Self {
        TermError::Protocol { kind }
    }
}

/// Result type alias for daemon operations.
pub type TermResult<T> = Result<T, TermError>;
