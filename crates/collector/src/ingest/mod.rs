//! Ingest connections: newline-delimited log lines, fire-and-forget.
//!
//! The server never writes a byte back on an ingest connection. Each line
//! becomes one buffer entry; oversized lines are truncated, undecodable
//! lines are skipped, and neither ends the connection.

use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncReadExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use crate::registry::ConnectionGuard;
use crate::state::{CollectorState, SharedState};

/// Runs until the peer closes the connection or a read error occurs. The
/// registry guard decrements exactly once however the loop ends.
pub async fn handle_connection(stream: TcpStream, state: SharedState) {
    let _guard = ConnectionGuard::register(Arc::clone(&state.clients));

    let mut reader = BufReader::new(stream);
    let mut raw = Vec::new();
    // Room for the newline and a CR on top of the stored maximum; anything
    // past this is discarded up to the next newline.
    let read_limit = state.config.max_line_len as u64 + 2;

    loop {
        raw.clear();
        let n = {
            let mut limited = (&mut reader).take(read_limit);
            match limited.read_until(b'\n', &mut raw).await {
                Ok(0) => break, // EOF
                Ok(n) => n,
                Err(e) => {
                    debug!("ingest read failed: {}", e);
                    break;
                }
            }
        };

        let clipped = raw.last() != Some(&b'\n');
        if clipped && n as u64 == read_limit {
            // Oversized line: keep the prefix, drop the remainder.
            match discard_to_newline(&mut reader).await {
                Ok(more) => {
                    ingest_line(&state, &raw);
                    if !more {
                        break; // EOF while discarding
                    }
                    continue;
                }
                Err(e) => {
                    debug!("ingest read failed: {}", e);
                    ingest_line(&state, &raw);
                    break;
                }
            }
        }

        ingest_line(&state, &raw);
        if clipped {
            break; // final line ended by EOF, not a newline
        }
    }
}

/// One raw line (newline possibly included) into the buffer and, when
/// enabled, onto the persistence queue.
fn ingest_line(state: &CollectorState, raw: &[u8]) {
    let raw = strip_line_ending(raw);

    let text = match std::str::from_utf8(raw) {
        Ok(text) => text,
        // A multi-byte character clipped at the truncation point is not a
        // client error; salvage the valid prefix.
        Err(e) if e.error_len().is_none() => {
            std::str::from_utf8(&raw[..e.valid_up_to()]).unwrap_or_default()
        }
        Err(_) => return, // undecodable line, skip it
    };

    let text = truncate_to_boundary(text, state.config.max_line_len);
    let (entry, _evicted) = state.buffer.append(text.to_string());

    if let Some(persist) = &state.persist {
        persist.enqueue(entry);
    }
}

fn strip_line_ending(raw: &[u8]) -> &[u8] {
    let raw = raw.strip_suffix(b"\n").unwrap_or(raw);
    raw.strip_suffix(b"\r").unwrap_or(raw)
}

/// Truncate to at most `max` bytes without splitting a UTF-8 character.
fn truncate_to_boundary(text: &str, max: usize) -> &str {
    if text.len() <= max {
        return text;
    }
    let mut end = max;
    while end > 0 && !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Consume and drop bytes up to and including the next newline.
/// Returns false when EOF arrives first.
async fn discard_to_newline<R: AsyncBufRead + Unpin>(reader: &mut R) -> std::io::Result<bool> {
    loop {
        let buf = reader.fill_buf().await?;
        if buf.is_empty() {
            return Ok(false);
        }
        if let Some(pos) = buf.iter().position(|&b| b == b'\n') {
            reader.consume(pos + 1);
            return Ok(true);
        }
        let len = buf.len();
        reader.consume(len);
    }
}
