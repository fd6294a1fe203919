//! Newline-delimited JSON framing.
//!
//! Used on both channels: build tool ↔ worker and worker ↔ guest host.
//! Each message is one JSON object terminated by `\n`. Blank lines are
//! skipped, and end of input before a message means the peer closed the
//! stream.

use std::io::{self, BufRead, Write};

use serde::de::DeserializeOwned;
use serde::Serialize;
use thiserror::Error;

/// Errors from reading or writing framed messages.
#[derive(Debug, Error)]
pub enum FrameError {
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    #[error("invalid JSON: {0}")]
    Decode(#[source] serde_json::Error),

    #[error("message exceeds maximum size of {max} bytes")]
    TooLarge { max: usize },

    #[error("failed to encode message: {0}")]
    Encode(#[source] serde_json::Error),
}

impl FrameError {
    /// Whether the stream is still usable after this error.
    ///
    /// Decode and size errors consume exactly one line, so the next read
    /// starts at a message boundary.
    pub fn is_recoverable(&self) -> bool {
        matches!(self, Self::Decode(_) | Self::TooLarge { .. })
    }
}

/// Read the next message.
///
/// Returns `Ok(None)` on end of stream.
pub fn read_message<T, R>(reader: &mut R, max_bytes: usize) -> Result<Option<T>, FrameError>
where
    T: DeserializeOwned,
    R: BufRead,
{
    let mut line = Vec::new();
    loop {
        line.clear();
        let (consumed, overflow) = read_line_bounded(reader, max_bytes, &mut line)?;
        if consumed == 0 {
            return Ok(None);
        }
        if overflow {
            return Err(FrameError::TooLarge { max: max_bytes });
        }
        let text = trim_ascii(&line);
        if text.is_empty() {
            continue;
        }
        return serde_json::from_slice(text)
            .map(Some)
            .map_err(FrameError::Decode);
    }
}

/// Write one message followed by a newline, then flush.
pub fn write_message<T, W>(writer: &mut W, message: &T) -> Result<(), FrameError>
where
    T: Serialize,
    W: Write,
{
    let json = serde_json::to_string(message).map_err(FrameError::Encode)?;
    writeln!(writer, "{}", json)?;
    writer.flush()?;
    Ok(())
}

/// Read up to and including the next `\n` without buffering more than
/// `max_bytes` of content; the terminator does not count. Returns the
/// number of bytes consumed and whether the line was longer than the
/// limit (in which case `buf` is left empty and the rest of the line is
/// drained).
fn read_line_bounded<R: BufRead>(
    reader: &mut R,
    max_bytes: usize,
    buf: &mut Vec<u8>,
) -> io::Result<(usize, bool)> {
    let mut consumed = 0;
    let mut overflow = false;
    loop {
        let available = match reader.fill_buf() {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e),
        };
        if available.is_empty() {
            break;
        }
        let (done, used) = match available.iter().position(|&b| b == b'\n') {
            Some(index) => (true, index + 1),
            None => (false, available.len()),
        };
        let content = if done { used - 1 } else { used };
        if !overflow {
            if buf.len() + content > max_bytes {
                overflow = true;
                buf.clear();
            } else {
                buf.extend_from_slice(&available[..used]);
            }
        }
        reader.consume(used);
        consumed += used;
        if done {
            break;
        }
    }
    Ok((consumed, overflow))
}

fn trim_ascii(bytes: &[u8]) -> &[u8] {
    let start = bytes
        .iter()
        .position(|b| !b.is_ascii_whitespace())
        .unwrap_or(bytes.len());
    let end = bytes
        .iter()
        .rposition(|b| !b.is_ascii_whitespace())
        .map_or(start, |index| index + 1);
    &bytes[start..end]
}
