use thiserror::Error;

/// Top-level error type for the `inky-api` crate.
///
/// Covers the two transport surfaces: the MQTT bus session and the
/// object-store read client. `inky-core` maps these into user-facing
/// domain errors.
#[derive(Debug, Error)]
pub enum Error {
    // ── Bus ─────────────────────────────────────────────────────────
    /// No live bus connection appeared within the bounded wait.
    #[error("bus connection timeout after {timeout_secs}s")]
    ConnectionTimeout { timeout_secs: u64 },

    /// The session's request channel is gone (session task exited).
    #[error("bus session closed")]
    SessionClosed,

    /// A publish was handed to the client but rejected outright.
    #[error("publish to {topic} failed: {reason}")]
    Publish { topic: String, reason: String },

    // ── Object store ────────────────────────────────────────────────
    /// Fetch attempted before registration delivered credentials.
    #[error("object store not configured - awaiting registration")]
    StoreNotConfigured,

    /// Object-store transport, HTTP status, or payload decode failure.
    #[error("object store request failed: {message}")]
    Storage { message: String },
}

impl Error {
    /// Returns `true` if this is a transient condition worth retrying.
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::ConnectionTimeout { .. } | Self::Publish { .. })
    }
}
