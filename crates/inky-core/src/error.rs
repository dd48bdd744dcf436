// ── Core error types ──
//
// Domain errors as the dispatcher sees them. Transport detail stays in
// inky-api; the From impl translates it into the taxonomy that decides
// what an acknowledgment says. Nothing here is allowed to take the
// process down — the dispatcher converts every variant into a failure
// acknowledgment.

use thiserror::Error;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Content-store fetch failure or storage not yet configured.
    #[error("communication error: {message}")]
    Communication { message: String },

    /// Display hardware fault or pixel-dimension mismatch.
    #[error("display error: {message}")]
    Display { message: String },

    /// Malformed command: missing required fields or unknown action.
    /// Detected before any I/O.
    #[error("invalid command: {message}")]
    InvalidCommand { message: String },

    /// Configuration rejected at startup.
    #[error("configuration error: {message}")]
    Config { message: String },

    /// Anything unexpected (task panic, join failure). Logged with
    /// full detail at the dispatch boundary.
    #[error("internal error: {0}")]
    Internal(String),
}

// ── Conversion from transport-layer errors ───────────────────────────

impl From<inky_api::Error> for CoreError {
    fn from(err: inky_api::Error) -> Self {
        match err {
            // Publish/connection-wait failures and store failures both
            // surface as communication errors; the reconnect loop owns
            // connection-level recovery.
            inky_api::Error::ConnectionTimeout { .. }
            | inky_api::Error::SessionClosed
            | inky_api::Error::Publish { .. }
            | inky_api::Error::StoreNotConfigured
            | inky_api::Error::Storage { .. } => CoreError::Communication {
                message: err.to_string(),
            },
        }
    }
}
