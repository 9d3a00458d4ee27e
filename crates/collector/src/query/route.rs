//! One-shot query connections: read one line, execute, respond, close.

use std::io::ErrorKind;

use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tracing::debug;

use crate::state::{CollectorState, SharedState};

use super::parse::{self, QueryCommand};
use super::predicate::SearchPredicate;

/// Upper bound on a request line; a well-formed request is far smaller.
const MAX_REQUEST_LEN: u64 = 4096;

/// Fixed catalogue of the query grammar. `HELP_LINE_COUNT` pins the line
/// count so the catalogue and the command set cannot drift apart silently.
pub const HELP_TEXT: &str = "Available commands:
  QUERY key=value ...      - Search buffered logs
  STATS                    - Show buffer statistics
  COUNT                    - Show number of buffered logs
  HELP                     - Show this help

Query parameters:
  keywords=w1,w2,...       - Keywords, comma-separated (no escaping)
  operator=AND|OR          - Keyword combination (default: AND)
  regex=<pattern>          - Match pattern anywhere in the text
  time_from=<unix seconds> - Inclusive lower bound on receive time
  time_to=<unix seconds>   - Inclusive upper bound on receive time

Example: QUERY keywords=error,timeout operator=OR regex=user_id=[0-9]+
";

pub const HELP_LINE_COUNT: usize = 14;

/// Turn one raw request line into the full response payload. Malformed
/// input yields a single `ERROR:` line; nothing here can fail the caller.
pub fn execute(state: &CollectorState, line: &str) -> String {
    match parse::parse_command(line) {
        Ok(QueryCommand::Search(query)) => match SearchPredicate::compile(&query) {
            Ok(predicate) => run_search(state, &predicate),
            Err(e) => format!("ERROR: {e}\n"),
        },
        Ok(QueryCommand::Stats) => {
            let stats = state.buffer.stats();
            format!(
                "STATS: Total={}, Dropped={}, Current={}, Clients={}\n",
                stats.total,
                stats.dropped,
                stats.current,
                state.clients.count()
            )
        }
        Ok(QueryCommand::Count) => format!("{}\n", state.buffer.stats().current),
        Ok(QueryCommand::Help) => HELP_TEXT.to_string(),
        Err(e) => format!("ERROR: {e}\n"),
    }
}

fn run_search(state: &CollectorState, predicate: &SearchPredicate) -> String {
    if predicate.is_empty() {
        return "FOUND: 0\n".to_string();
    }

    let snapshot = state.buffer.snapshot();
    let matches: Vec<&str> = snapshot
        .iter()
        .filter(|entry| predicate.matches(entry))
        .map(|entry| entry.text.as_str())
        .collect();

    let mut response = format!("FOUND: {}\n", matches.len());
    for text in matches {
        response.push_str(text);
        response.push('\n');
    }
    response
}

/// Exactly one request/response cycle, then the server closes the
/// connection. Read failures get a response where one is still possible
/// (bad encoding) and are otherwise logged and dropped.
pub async fn handle_connection(stream: TcpStream, state: SharedState) {
    let mut reader = BufReader::new(stream);
    let mut line = String::new();

    let response = {
        let mut limited = (&mut reader).take(MAX_REQUEST_LEN);
        match limited.read_line(&mut line).await {
            Ok(0) => None, // peer closed without sending a request
            // A full-length read with no newline means the request was cut
            // off mid-line; executing the prefix would answer a different
            // query than the one sent.
            Ok(n) if n as u64 == MAX_REQUEST_LEN && !line.ends_with('\n') => {
                Some("ERROR: Request too long\n".to_string())
            }
            Ok(_) => Some(execute(&state, &line)),
            Err(e) if e.kind() == ErrorKind::InvalidData => {
                Some("ERROR: Request must be valid UTF-8\n".to_string())
            }
            Err(e) => {
                debug!("query read failed: {}", e);
                None
            }
        }
    };

    if let Some(response) = response {
        let stream = reader.get_mut();
        if let Err(e) = stream.write_all(response.as_bytes()).await {
            debug!("query response write failed: {}", e);
        }
        let _ = stream.shutdown().await;
    }
}
