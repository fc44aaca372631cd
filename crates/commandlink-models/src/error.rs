//! Error types for the `commandlink-models` crate.
//!
//! All fallible constructors and `FromStr` implementations in this crate
//! return variants of [`ModelError`].

/// Errors produced when constructing or validating model types.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ModelError {
    /// An identifier (login, minion id) was empty.
    #[error("invalid {kind} \"{value}\": {reason}")]
    InvalidIdentifier {
        /// Which identifier was being parsed.
        kind: &'static str,
        /// The value that failed validation.
        value: String,
        /// Human-readable explanation.
        reason: String,
    },

    /// An enterprise id was not a 32-bit unsigned integer.
    #[error("invalid enterprise id \"{value}\": must fit in 32 bits")]
    InvalidEnterpriseId {
        /// The value that failed validation.
        value: String,
    },
}
