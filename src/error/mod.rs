//! Error types for the terminal daemon.
//!
//! Provides a unified error handling system using thiserror.

mod types;

pub use types::*;
