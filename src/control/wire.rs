//! Line framing for the control channel.
//!
//! Requests are `\n`-terminated lines. Only the first `max_len` bytes of a
//! line are kept; the rest is read and discarded but still counted as
//! consumed.

use std::time::Duration;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tokio::time::timeout;

use crate::error::{ProtocolErrorKind, TermError};

/// Longest line the control channel looks at.
pub const DEFAULT_MAX_LINE_LENGTH: usize = 128;

/// One request line as read from the wire.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestLine {
    /// Line text without the terminator, truncated to the maximum length.
    pub text: String,
    /// Bytes taken off the stream for this line, terminator included.
    pub consumed: usize,
}

/// Read one line.
///
/// Returns `ConnectionClosed` if the stream ends before any byte of a new
/// line arrives. A final line without a terminator is returned as is.
pub async fn read_line<R>(reader: &mut R, max_len: usize) -> Result<RequestLine, TermError>
where
    R: AsyncBufRead + Unpin,
{
    let mut kept: Vec<u8> = Vec::new();
    let mut consumed = 0usize;

    loop {
        let available = reader.fill_buf().await?;
        if available.is_empty() {
            if consumed == 0 {
                return Err(TermError::protocol(ProtocolErrorKind::ConnectionClosed));
            }
            break;
        }

        let (chunk, done) = match available.iter().position(|&b| b == b'\n') {
            Some(pos) => (&available[..=pos], true),
            None => (available, false),
        };

        let room = max_len.saturating_sub(kept.len());
        let body = if done { &chunk[..chunk.len() - 1] } else { chunk };
        kept.extend_from_slice(&body[..body.len().min(room)]);

        let taken = chunk.len();
        consumed += taken;
        reader.consume(taken);

        if done {
            break;
        }
    }

    Ok(RequestLine {
        text: String::from_utf8_lossy(&kept).into_owned(),
        consumed,
    })
}

/// Read one line with a timeout.
pub async fn read_line_with_timeout<R>(
    reader: &mut R,
    max_len: usize,
    timeout_duration: Duration,
) -> Result<RequestLine, TermError>
where
    R: AsyncBufRead + Unpin,
{
    timeout(timeout_duration, read_line(reader, max_len))
        .await
        .map_err(|_| TermError::protocol(ProtocolErrorKind::ConnectionTimeout))?
}

/// Write a reply and flush, with a timeout.
pub async fn write_reply_with_timeout<W>(
    writer: &mut W,
    data: &[u8],
    timeout_duration: Duration,
) -> Result<(), TermError>
where
    W: AsyncWrite + Unpin,
{
    timeout(timeout_duration, async {
        writer.write_all(data).await?;
        writer.flush().await?;
        Ok::<(), TermError>(())
    })
    .await
    .map_err(|_| TermError::protocol(ProtocolErrorKind::ConnectionTimeout))?
}
