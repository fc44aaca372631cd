//! Signing-key extraction from a credential record.
//!
//! A root-key record carries everything needed to mint a token as a fixed
//! set of typed custom fields:
//!
//! | key   | kind      | field |
//! |-------|-----------|-------|
//! | `alg` | `text`    | `alg` |
//! | `api` | `url`     | `api` |
//! | `aud` | `text`    | `aud` |
//! | `iss` | `url`     | `iss` |
//! | `kid` | `text`    | `kid` |
//! | `key` | `keyPair` | `key` |
//!
//! `url` keys with no matching field fall back to the record's endpoint URL.

use std::fmt;
use std::str::FromStr;

use commandlink_models::{CredentialRecord, FieldKind};
use jsonwebtoken::{Algorithm, EncodingKey};
use serde_json::Value;
use tracing::debug;

use crate::error::AuthError;

// ---------------------------------------------------------------------------
// SemanticKey
// ---------------------------------------------------------------------------

/// One entry of the fixed field table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "lowercase")]
pub enum SemanticKey {
    /// Signing algorithm (JWS `alg`).
    Alg,
    /// Endpoint the token is meant for.
    Api,
    /// Token audience.
    Aud,
    /// Token issuer.
    Iss,
    /// Key id (JWS `kid` and claim).
    Kid,
    /// The signing key pair.
    Key,
}

impl SemanticKey {
    /// Table order; resolution errors name the first failing key in this order.
    pub const ALL: [SemanticKey; 6] = [
        SemanticKey::Alg,
        SemanticKey::Api,
        SemanticKey::Aud,
        SemanticKey::Iss,
        SemanticKey::Kid,
        SemanticKey::Key,
    ];

    /// Declared kind of the backing field.
    pub fn field_kind(self) -> FieldKind {
        match self {
            Self::Alg | Self::Aud | Self::Kid => FieldKind::Text,
            Self::Api | Self::Iss => FieldKind::Url,
            Self::Key => FieldKind::KeyPair,
        }
    }

    /// Name of the backing field.
    pub fn field_name(self) -> &'static str {
        match self {
            Self::Alg => "alg",
            Self::Api => "api",
            Self::Aud => "aud",
            Self::Iss => "iss",
            Self::Kid => "kid",
            Self::Key => "key",
        }
    }
}

// ---------------------------------------------------------------------------
// KeyMaterial
// ---------------------------------------------------------------------------

/// Everything needed to sign a token, derived from one credential record.
///
/// Ephemeral: built per operation and dropped afterwards.
#[derive(Clone)]
pub struct KeyMaterial {
    /// Signing algorithm.
    pub alg: Algorithm,
    /// Endpoint URL callers should address with tokens from this key.
    pub api: String,
    /// Audience claim.
    pub aud: String,
    /// Issuer claim.
    pub iss: String,
    /// Key id.
    pub kid: String,
    public_key: Option<String>,
    encoding_key: EncodingKey,
}

impl KeyMaterial {
    /// Resolve every semantic key from `record`.
    ///
    /// # Errors
    ///
    /// [`AuthError::Resolution`] for the first key (in table order) that has
    /// no usable field, [`AuthError::KeyFormat`] if the private key does not
    /// parse for the resolved algorithm.
    pub fn resolve(record: &CredentialRecord) -> Result<Self, AuthError> {
        let alg_name = resolve_text(record, SemanticKey::Alg)?;
        let api = resolve_text(record, SemanticKey::Api)?;
        let aud = resolve_text(record, SemanticKey::Aud)?;
        let iss = resolve_text(record, SemanticKey::Iss)?;
        let kid = resolve_text(record, SemanticKey::Kid)?;
        let (private_key, public_key) = resolve_key_pair(record)?;

        let alg = Algorithm::from_str(&alg_name).map_err(|_| AuthError::Resolution {
            key: SemanticKey::Alg,
            reason: format!("unsupported algorithm {alg_name:?}"),
        })?;
        let encoding_key = encoding_key(alg, &private_key)?;

        debug!(record = %record.title, ?alg, %kid, "key material resolved");

        Ok(Self {
            alg,
            api,
            aud,
            iss,
            kid,
            public_key,
            encoding_key,
        })
    }

    /// Public half of the key pair, when the record stores one.
    pub fn public_key(&self) -> Option<&str> {
        self.public_key.as_deref()
    }

    pub(crate) fn encoding_key(&self) -> &EncodingKey {
        &self.encoding_key
    }
}

impl fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("alg", &self.alg)
            .field("api", &self.api)
            .field("aud", &self.aud)
            .field("iss", &self.iss)
            .field("kid", &self.kid)
            .field("private_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

// ---------------------------------------------------------------------------
// Field lookup
// ---------------------------------------------------------------------------

/// Explicit field first, then the endpoint-URL fallback for `url` keys.
fn lookup(record: &CredentialRecord, key: SemanticKey) -> Result<Value, AuthError> {
    if let Some(field) = record.field(key.field_kind(), key.field_name()) {
        return Ok(single(&field.value).clone());
    }
    if key.field_kind() == FieldKind::Url && !record.url.is_empty() {
        return Ok(Value::String(record.url.clone()));
    }
    Err(AuthError::Resolution {
        key,
        reason: format!(
            "no `{}` field named `{}`",
            key.field_kind(),
            key.field_name()
        ),
    })
}

/// Stores may wrap field values in a one-element list.
fn single(value: &Value) -> &Value {
    match value {
        Value::Array(items) if items.len() == 1 => &items[0],
        other => other,
    }
}

fn resolve_text(record: &CredentialRecord, key: SemanticKey) -> Result<String, AuthError> {
    match lookup(record, key)? {
        Value::String(s) if !s.trim().is_empty() => Ok(s),
        other => Err(AuthError::Resolution {
            key,
            reason: format!("expected a non-empty string, found {other}"),
        }),
    }
}

fn resolve_key_pair(record: &CredentialRecord) -> Result<(String, Option<String>), AuthError> {
    let key = SemanticKey::Key;
    let value = lookup(record, key)?;
    let private_key = value
        .get("privateKey")
        .and_then(Value::as_str)
        .filter(|pem| !pem.trim().is_empty())
        .ok_or_else(|| AuthError::Resolution {
            key,
            reason: "key pair has no `privateKey`".into(),
        })?;
    let public_key = value
        .get("publicKey")
        .and_then(Value::as_str)
        .filter(|pem| !pem.is_empty())
        .map(String::from);
    Ok((private_key.to_string(), public_key))
}

fn encoding_key(alg: Algorithm, pem: &str) -> Result<EncodingKey, AuthError> {
    let pem = pem.as_bytes();
    let key = match alg {
        Algorithm::RS256
        | Algorithm::RS384
        | Algorithm::RS512
        | Algorithm::PS256
        | Algorithm::PS384
        | Algorithm::PS512 => EncodingKey::from_rsa_pem(pem),
        Algorithm::ES256 | Algorithm::ES384 => EncodingKey::from_ec_pem(pem),
        Algorithm::EdDSA => EncodingKey::from_ed_pem(pem),
        other => {
            return Err(AuthError::KeyFormat(format!(
                "{other:?} is not an asymmetric algorithm"
            )));
        }
    };
    key.map_err(|e| AuthError::KeyFormat(e.to_string()))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
