//! Public JWK export for the acting user's RSA key.
//!
//! Registration flows send the user's public key to the authorization API,
//! either bare (`users/{kid}`), wrapped in a [`JwkSet`] (enterprise
//! registration) or embedded in a token's `public-jwk` claim.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use rsa::RsaPrivateKey;
use rsa::pkcs1::DecodeRsaPrivateKey;
use rsa::pkcs8::DecodePrivateKey;
use rsa::traits::PublicKeyParts;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::AuthError;

/// RSA public key in JWK form, tagged for RS256 signature use.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct PublicJwk {
    /// Always `"RSA"`.
    pub kty: String,
    /// Modulus, base64url without padding.
    pub n: String,
    /// Public exponent, base64url without padding.
    pub e: String,
    /// Intended use; `"sig"`.
    #[serde(rename = "use")]
    pub key_use: String,
    /// Algorithm; `"RS256"`.
    pub alg: String,
    /// RFC 7638 SHA-256 thumbprint.
    pub kid: String,
}

impl PublicJwk {
    /// Derive the public JWK from a PKCS#8 or PKCS#1 PEM private key.
    ///
    /// # Errors
    ///
    /// [`AuthError::KeyFormat`] if the PEM is neither.
    pub fn from_private_pem(pem: &str) -> Result<Self, AuthError> {
        let key = RsaPrivateKey::from_pkcs8_pem(pem)
            .or_else(|_| RsaPrivateKey::from_pkcs1_pem(pem))
            .map_err(|e| AuthError::KeyFormat(format!("user key: {e}")))?;

        let n = URL_SAFE_NO_PAD.encode(key.n().to_bytes_be());
        let e = URL_SAFE_NO_PAD.encode(key.e().to_bytes_be());
        let kid = thumbprint(&n, &e);

        Ok(Self {
            kty: "RSA".to_string(),
            n,
            e,
            key_use: "sig".to_string(),
            alg: "RS256".to_string(),
            kid,
        })
    }

    /// Compact JSON text, as carried by the `public-jwk` claim.
    pub fn to_json(&self) -> Result<String, AuthError> {
        Ok(serde_json::to_string(self)?)
    }
}

/// RFC 7638: SHA-256 over the lexicographically ordered required members.
fn thumbprint(n: &str, e: &str) -> String {
    let canonical = format!(r#"{{"e":"{e}","kty":"RSA","n":"{n}"}}"#);
    URL_SAFE_NO_PAD.encode(Sha256::digest(canonical.as_bytes()))
}

/// `{"keys": [...]}` as published in an issuer's `jwks.json`.
#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq, Eq)]
pub struct JwkSet {
    /// Member keys.
    pub keys: Vec<PublicJwk>,
}

impl JwkSet {
    /// A set holding one key.
    pub fn single(jwk: PublicJwk) -> Self {
        Self { keys: vec![jwk] }
    }
}
