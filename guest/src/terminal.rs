//! Terminal size negotiation over the serial console.
//!
//! A serial line carries no window size, so the init asks the terminal
//! emulator where the cursor lands after moving it to the far corner.

use std::time::Duration;

use crate::ops::GuestOps;

/// Save cursor, jump to the bottom-right corner, report position, restore.
pub const SIZE_QUERY: &[u8] = b"\x1b7\x1b[999;999H\x1b[6n\x1b8";

/// Per-byte read timeout while waiting for the report.
pub const BYTE_TIMEOUT: Duration = Duration::from_millis(250);

pub const DEFAULT_SIZE: (u16, u16) = (24, 80);

/// Parse a cursor position report `ESC [ rows ; cols R`.
///
/// Bytes before the escape (typed input racing the reply) are skipped.
pub fn parse_cursor_report(reply: &[u8]) -> Option<(u16, u16)> {
    let start = reply.windows(2).position(|w| w == b"\x1b[")?;
    let body = &reply[start + 2..];
    let end = body.iter().position(|&b| b == b'R')?;
    let text = std::str::from_utf8(&body[..end]).ok()?;
    let (rows, cols) = text.split_once(';')?;
    let rows: u16 = rows.parse().ok()?;
    let cols: u16 = cols.parse().ok()?;
    if rows == 0 || cols == 0 {
        return None;
    }
    Some((rows, cols))
}

/// Ask the terminal for its size, falling back to 24x80.
pub fn negotiate<O: GuestOps>(ops: &mut O) -> (u16, u16) {
    match ops.terminal_exchange(SIZE_QUERY, b'R', BYTE_TIMEOUT) {
        Ok(reply) => parse_cursor_report(&reply).unwrap_or_else(|| {
            tracing::debug!(bytes = reply.len(), "No cursor report, using default size");
            DEFAULT_SIZE
        }),
        Err(e) => {
            tracing::debug!("Terminal size query failed: {}", e);
            DEFAULT_SIZE
        }
    }
}
