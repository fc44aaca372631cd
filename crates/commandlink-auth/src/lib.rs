//! # commandlink auth
//!
//! Turns a root-key credential record into signed, role-scoped tokens.
//!
//! 1. [`KeyMaterial::resolve`] reads `alg`, `api`, `aud`, `iss`, `kid` and
//!    the key pair from the record's typed fields.
//! 2. [`TokenIssuer::issue`] signs a token for a login and an ordered scope
//!    list, optionally embedding a hashed enterprise id and the caller's
//!    [`PublicJwk`].
//! 3. [`decode`] reads a token back **without** verifying it, for local
//!    inspection only.
//!
//! ```rust,no_run
//! use commandlink_auth::{KeyMaterial, TokenIssuer, TokenRequest};
//! use commandlink_models::{CredentialRecord, Login};
//!
//! # fn run(record: &CredentialRecord) -> Result<(), commandlink_auth::AuthError> {
//! let material = KeyMaterial::resolve(record)?;
//! let issued = TokenIssuer::new().issue(
//!     &material,
//!     &TokenRequest::new(&Login::new("ops@example.com"), ["user"]),
//! )?;
//! println!("{} -> {}", issued.endpoint, issued.token);
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod jwk;
pub mod jwt;
pub mod key_material;

pub use error::AuthError;
pub use jwk::{JwkSet, PublicJwk};
pub use jwt::{
    DEFAULT_EXPIRY_DELTA, IssuedToken, TokenClaims, TokenHeader, TokenIssuer, TokenRequest,
    bucket_from_issuer, decode, hash_enterprise_id,
};
pub use key_material::{KeyMaterial, SemanticKey};
