//! Error types for token construction.
//!
//! [`AuthError`] covers every failure between reading a credential record
//! and holding a signed token. None of them leave partial effects behind:
//! nothing is sent or persisted until a token exists.

use crate::key_material::SemanticKey;

/// Errors that can occur while resolving key material or issuing a token.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// A semantic key could not be resolved from the credential record.
    #[error("credential record does not resolve `{key}`: {reason}")]
    Resolution {
        /// First unresolved key, in table order.
        key: SemanticKey,
        /// What was wrong with it.
        reason: String,
    },

    /// The private key could not be parsed for the declared algorithm.
    #[error("unusable private key: {0}")]
    KeyFormat(String),

    /// The private key parsed but signing failed.
    #[error("token signing failed: {0}")]
    Signing(String),

    /// A mandatory claim is absent or malformed.
    #[error("cannot assemble claim `{claim}`: {reason}")]
    ClaimAssembly {
        /// Claim name as it appears in the token.
        claim: &'static str,
        /// Human-readable explanation.
        reason: String,
    },

    /// A token handed to [`decode`](crate::jwt::decode) is not a JWS compact
    /// serialization.
    #[error("malformed token: {0}")]
    InvalidToken(String),

    /// JSON (de)serialisation error.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AuthError {
    pub(crate) fn claim(claim: &'static str, reason: impl Into<String>) -> Self {
        Self::ClaimAssembly {
            claim,
            reason: reason.into(),
        }
    }
}
