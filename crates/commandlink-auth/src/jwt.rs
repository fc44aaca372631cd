//! Role-scoped token issuing.
//!
//! Signs a JWT whose header is exactly `{alg, kid}` and whose claims carry
//! the acting login, the ordered scope list and, optionally, a hashed
//! enterprise id and the caller's public JWK.

use std::fmt;
use std::sync::Arc;

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use commandlink_models::{EnterpriseId, Login};
use jsonwebtoken::{Algorithm, Header};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use tracing::debug;

use crate::error::AuthError;
use crate::jwk::PublicJwk;
use crate::key_material::KeyMaterial;

/// Default token lifetime: two hours.
pub const DEFAULT_EXPIRY_DELTA: u64 = 7200;

// ---------------------------------------------------------------------------
// Claim and header types
// ---------------------------------------------------------------------------

/// Token body. Field order is the serialized order.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TokenClaims {
    /// Expiry, seconds since the epoch.
    pub exp: i64,
    /// Audience.
    pub aud: String,
    /// Issuer.
    pub iss: String,
    /// Key id.
    pub kid: String,
    /// Principal the token is minted for.
    pub login: String,
    /// Space-joined ordered role list.
    pub scope: String,
    /// Hex SHA-256 of the 4-byte big-endian enterprise id.
    #[serde(rename = "ent-id", default, skip_serializing_if = "Option::is_none")]
    pub ent_id: Option<String>,
    /// Caller's public JWK as JSON text.
    #[serde(rename = "public-jwk", default, skip_serializing_if = "Option::is_none")]
    pub public_jwk: Option<String>,
}

/// Token header.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct TokenHeader {
    /// Signing algorithm.
    pub alg: Algorithm,
    /// Key id.
    pub kid: String,
}

/// Inputs for one token.
#[derive(Debug, Clone)]
pub struct TokenRequest {
    login: Login,
    scopes: Vec<String>,
    expiry_delta: u64,
    ent_id: Option<EnterpriseId>,
    public_jwk: Option<PublicJwk>,
}

impl TokenRequest {
    /// A request for `login` with the given ordered scopes and the default
    /// expiry.
    pub fn new<I, S>(login: &Login, scopes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            login: login.clone(),
            scopes: scopes.into_iter().map(Into::into).collect(),
            expiry_delta: DEFAULT_EXPIRY_DELTA,
            ent_id: None,
            public_jwk: None,
        }
    }

    /// Override the lifetime in seconds.
    #[must_use]
    pub fn expiry_delta(mut self, seconds: u64) -> Self {
        self.expiry_delta = seconds;
        self
    }

    /// Embed a hashed enterprise id.
    #[must_use]
    pub fn enterprise(mut self, ent_id: Option<EnterpriseId>) -> Self {
        self.ent_id = ent_id;
        self
    }

    /// Embed the caller's public JWK.
    #[must_use]
    pub fn public_jwk(mut self, jwk: Option<PublicJwk>) -> Self {
        self.public_jwk = jwk;
        self
    }
}

/// A signed token together with what it was built from.
#[derive(Debug, Clone)]
pub struct IssuedToken {
    /// URL to address with this token.
    pub endpoint: String,
    /// Compact JWS serialization.
    pub token: String,
    /// Header as signed.
    pub header: TokenHeader,
    /// Claims as signed.
    pub claims: TokenClaims,
}

// ---------------------------------------------------------------------------
// TokenIssuer
// ---------------------------------------------------------------------------

type Clock = Arc<dyn Fn() -> i64 + Send + Sync>;

/// Mints signed tokens. The only ambient input is the clock.
#[derive(Clone)]
pub struct TokenIssuer {
    clock: Clock,
}

impl Default for TokenIssuer {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for TokenIssuer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TokenIssuer").finish_non_exhaustive()
    }
}

impl TokenIssuer {
    /// Issuer reading the system clock.
    pub fn new() -> Self {
        Self::with_clock(|| chrono::Utc::now().timestamp())
    }

    /// Issuer reading a caller-supplied clock (seconds since the epoch).
    pub fn with_clock(clock: impl Fn() -> i64 + Send + Sync + 'static) -> Self {
        Self {
            clock: Arc::new(clock),
        }
    }

    /// Build and sign a token for `request` with `material`.
    ///
    /// # Errors
    ///
    /// [`AuthError::ClaimAssembly`] for an empty login, an empty scope list,
    /// a zero expiry or an empty mandatory claim; [`AuthError::Signing`] if
    /// the key cannot sign.
    pub fn issue(
        &self,
        material: &KeyMaterial,
        request: &TokenRequest,
    ) -> Result<IssuedToken, AuthError> {
        let login = request.login.as_str();
        if login.trim().is_empty() {
            return Err(AuthError::claim("login", "login must not be empty"));
        }
        let scope = join_scopes(&request.scopes)?;
        if request.expiry_delta == 0 {
            return Err(AuthError::claim("exp", "expiry delta must be positive"));
        }
        let delta = i64::try_from(request.expiry_delta)
            .map_err(|_| AuthError::claim("exp", "expiry delta out of range"))?;
        let exp = (self.clock)()
            .checked_add(delta)
            .ok_or_else(|| AuthError::claim("exp", "expiry overflows"))?;

        for (claim, value) in [
            ("aud", &material.aud),
            ("iss", &material.iss),
            ("kid", &material.kid),
        ] {
            if value.trim().is_empty() {
                return Err(AuthError::claim(claim, "resolved to an empty value"));
            }
        }

        let claims = TokenClaims {
            exp,
            aud: material.aud.clone(),
            iss: material.iss.clone(),
            kid: material.kid.clone(),
            login: login.to_string(),
            scope,
            ent_id: request.ent_id.map(hash_enterprise_id),
            public_jwk: request
                .public_jwk
                .as_ref()
                .map(PublicJwk::to_json)
                .transpose()?,
        };

        let header = TokenHeader {
            alg: material.alg,
            kid: material.kid.clone(),
        };
        let mut jws_header = Header::new(header.alg);
        jws_header.typ = None;
        jws_header.kid = Some(header.kid.clone());

        let token = jsonwebtoken::encode(&jws_header, &claims, material.encoding_key())
            .map_err(|e| AuthError::Signing(e.to_string()))?;

        debug!(payload = ?claims, "token claims");
        debug!(header = ?header, "token header");

        Ok(IssuedToken {
            endpoint: material.api.clone(),
            token,
            header,
            claims,
        })
    }
}

fn join_scopes(scopes: &[String]) -> Result<String, AuthError> {
    if scopes.is_empty() {
        return Err(AuthError::claim("scope", "at least one role is required"));
    }
    if let Some(bad) = scopes
        .iter()
        .find(|s| s.is_empty() || s.contains(char::is_whitespace))
    {
        return Err(AuthError::claim(
            "scope",
            format!("role {bad:?} must be a single non-empty word"),
        ));
    }
    Ok(scopes.join(" "))
}

/// Lowercase hex SHA-256 of the id's 4-byte big-endian encoding.
pub fn hash_enterprise_id(ent_id: EnterpriseId) -> String {
    hex::encode(Sha256::digest(ent_id.to_be_bytes()))
}

// ---------------------------------------------------------------------------
// Non-authoritative inspection
// ---------------------------------------------------------------------------

/// Parse a token **without verifying its signature**.
///
/// The result is only fit for local inspection, e.g. reading `iss` to
/// derive a bucket name. Never use it to make a trust decision; a token
/// from an untrusted source must go through a verifier holding the
/// issuer's public key.
///
/// # Errors
///
/// [`AuthError::InvalidToken`] if `raw` is not three dot-separated base64url
/// segments with a JSON object header and body.
pub fn decode(raw: &str) -> Result<(Map<String, Value>, Header), AuthError> {
    let mut parts = raw.split('.');
    let (Some(_), Some(body), Some(_), None) = (parts.next(), parts.next(), parts.next(), parts.next())
    else {
        return Err(AuthError::InvalidToken("expected three segments".into()));
    };

    let header = jsonwebtoken::decode_header(raw)
        .map_err(|e| AuthError::InvalidToken(format!("header: {e}")))?;
    let body = URL_SAFE_NO_PAD
        .decode(body)
        .map_err(|e| AuthError::InvalidToken(format!("body: {e}")))?;
    let claims: Map<String, Value> = serde_json::from_slice(&body)
        .map_err(|e| AuthError::InvalidToken(format!("body: {e}")))?;

    Ok((claims, header))
}

/// First DNS label of the issuer URL's host: `https://acme.example.com/` → `acme`.
///
/// # Errors
///
/// [`AuthError::ClaimAssembly`] if `iss` is not a URL with a host.
pub fn bucket_from_issuer(iss: &str) -> Result<String, AuthError> {
    let url = url::Url::parse(iss).map_err(|e| AuthError::claim("iss", e.to_string()))?;
    url.host_str()
        .and_then(|host| host.split('.').next())
        .filter(|label| !label.is_empty())
        .map(String::from)
        .ok_or_else(|| AuthError::claim("iss", format!("{iss} has no host")))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
