//! SDK error types.
//!
//! [`SdkError`] is the single error type returned by every fallible
//! operation in the SDK. It wraps transport, HTTP and serialization errors
//! and the registry's presence checks into a unified enum.

use commandlink_models::Login;

/// Error type for all SDK operations.
#[derive(Debug, thiserror::Error)]
pub enum SdkError {
    /// `connect` was called for a login that already has a live session.
    #[error("{login} is already connected as {role}")]
    AlreadyConnected {
        /// Principal of the existing session.
        login: Login,
        /// Role of the existing session.
        role: String,
    },

    /// No live session exists for the login.
    #[error("no connection for {login}")]
    NotConnected {
        /// Principal that was looked up.
        login: Login,
    },

    /// Connect, send or receive failed on the duplex channel.
    #[error("transport error: {0}")]
    Transport(String),

    /// An inbound frame was not a non-empty JSON object.
    #[error("invalid relay frame: {0}")]
    InvalidFrame(String),

    /// Invalid or missing configuration (e.g. bad URL, bad header value).
    #[error("configuration error: {0}")]
    Config(String),

    /// HTTP request failure.
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    /// JSON serialization / deserialization error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SdkError {
    /// Whether this error invalidates the session it happened on.
    pub fn is_transport(&self) -> bool {
        matches!(self, Self::Transport(_))
    }
}

impl From<tokio_tungstenite::tungstenite::Error> for SdkError {
    fn from(e: tokio_tungstenite::tungstenite::Error) -> Self {
        SdkError::Transport(e.to_string())
    }
}
