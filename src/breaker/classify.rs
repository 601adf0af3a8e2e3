use crate::error::Error;
use std::io::ErrorKind;

/// Substrings drivers use for transport-level failures.
const CONNECTION_MARKERS: &[&str] = &[
    "connection refused",
    "connection reset",
    "connection aborted",
    "broken pipe",
    "bad connection",
    "invalid connection",
    "server has gone away",
    "lost connection",
    "unexpected eof",
    "i/o timeout",
    "timed out",
    "no route to host",
    "network is unreachable",
];

/// Whether an error means the server could not be reached.
///
/// Query-level failures (bad SQL, missing table, constraint errors) come from a
/// reachable server and must not count against the breaker.
pub fn is_connection_error(err: &Error) -> bool {
    match err {
        Error::Connection(_) => true,
        Error::Io(e) => is_connection_io_kind(e.kind()) || is_connection_error_message(&e.to_string()),
        Error::Timeout { .. } => true,
        Error::Store { source, .. } | Error::Database(source) => is_connection_sqlx_error(source),
        _ => false,
    }
}

/// Transport and pool failures of the SQL driver.
fn is_connection_sqlx_error(err: &sqlx::Error) -> bool {
    match err {
        sqlx::Error::Io(e) => is_connection_io_kind(e.kind()) || is_connection_error_message(&e.to_string()),
        sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => true,
        other => is_connection_error_message(&other.to_string()),
    }
}

fn is_connection_io_kind(kind: ErrorKind) -> bool {
    matches!(
        kind,
        ErrorKind::ConnectionRefused
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::NotConnected
            | ErrorKind::BrokenPipe
            | ErrorKind::TimedOut
            | ErrorKind::UnexpectedEof
    )
}

/// Classify a raw driver error message.
pub fn is_connection_error_message(message: &str) -> bool {
    let lower = message.to_ascii_lowercase();
    CONNECTION_MARKERS.iter().any(|m| lower.contains(m))
}
