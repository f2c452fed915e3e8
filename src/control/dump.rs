//! Text rendering of the terminal table.

use std::fmt::Write;

use crate::table::{EntryView, TermTable};

/// Render the header row.
pub fn header() -> String {
    format!(
        "{:<17}  {:<16}  {:<16}  {:<16}  {:<14}  {:<7}\n",
        "MAC", "IP", "Rx", "Tx", "Time", "Authed"
    )
}

/// Render one terminal. `Time` is seconds since the terminal was first added,
/// not since it was last active.
pub fn row(view: &EntryView) -> String {
    format!(
        "{:<17}  {:<16}  {:<16}  {:<16}  {:<14}  {:<7}\n",
        view.mac.to_string(),
        view.ip.to_string(),
        view.rx_bytes,
        view.tx_bytes,
        view.age_secs,
        u8::from(view.authorized)
    )
}

/// Render the whole table in bucket order from a single read-locked pass.
pub fn render_dump(table: &TermTable) -> String {
    let mut out = header();
    table.for_each(|view| {
        let _ = write!(out, "{}", row(view));
    });
    out
}
