//! Terminal table daemon library.
//!
//! Tracks the client devices ("terminals") behind a captive-portal gateway by
//! hardware address, expires idle ones, and exposes a Unix-socket control
//! channel for marking terminals authorized or denied.

pub mod audit;
pub mod auth;
pub mod config;
pub mod control;
pub mod error;
pub mod service;
pub mod socket;
pub mod table;

pub use error::{TermError, TermResult};
pub use service::TermService;
pub use table::{EntryView, MacAddr, TermTable};
