//! Unix socket control endpoint.
//!
//! Handles socket listening and per-connection request processing.

mod connection;
mod listener;

pub use connection::{handle_connection, ConnectionContext};
pub use listener::{ConnectionMetrics, ControlListener};
