//! Administrative control protocol.
//!
//! ## Wire Format
//!
//! One command per `\n`-terminated line:
//! ```text
//! clear                  drop every terminal
//! +AA:BB:CC:DD:EE:FF     mark authorized
//! -AA:BB:CC:DD:EE:FF     mark denied
//! dump                   print the table
//! ```
//!
//! Mutations and malformed lines are answered with `OK <bytes consumed>`;
//! `dump` is answered with the table followed by an empty line.

mod command;
mod dump;
mod wire;

pub use command::{ControlCommand, Outcome};
pub use dump::{header, render_dump, row};
pub use wire::{
    read_line, read_line_with_timeout, write_reply_with_timeout, RequestLine,
    DEFAULT_MAX_LINE_LENGTH,
};
