//! Principal identifiers.
//!
//! A [`Login`] names the principal a token is minted for and keys the
//! session registry. A [`MinionId`] addresses a remote agent through the
//! relay. An [`EnterpriseId`] is the numeric tenant identifier that only
//! ever appears in a token as a hash. A [`Role`] is one scope string.

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

// ---------------------------------------------------------------------------
// Login
// ---------------------------------------------------------------------------

/// Identity of a principal (user or minion) as carried in the `login` claim.
///
/// # Examples
///
/// ```
/// use commandlink_models::Login;
///
/// let login = Login::new("ops@example.com");
/// assert_eq!(login.to_string(), "ops@example.com");
///
/// let parsed: Login = "ops@example.com".parse().unwrap();
/// assert_eq!(login, parsed);
/// ```
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct Login(String);

impl Login {
    /// Create a new `Login` from a string slice.
    pub fn new(login: &str) -> Self {
        Self(login.to_string())
    }

    /// Return the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Login {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Login {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for Login {
    fn from(s: String) -> Self {
        Self(s)
    }
}

impl FromStr for Login {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        non_empty("login", s).map(Self)
    }
}

// ---------------------------------------------------------------------------
// MinionId
// ---------------------------------------------------------------------------

/// Identifier of a remote agent addressable through the relay.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq, Hash)]
pub struct MinionId(String);

impl MinionId {
    /// Create a new `MinionId` from a string slice.
    pub fn new(id: &str) -> Self {
        Self(id.to_string())
    }

    /// Return the inner string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for MinionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for MinionId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl FromStr for MinionId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        non_empty("minion id", s).map(Self)
    }
}

fn non_empty(kind: &'static str, s: &str) -> Result<String, ModelError> {
    if s.trim().is_empty() {
        return Err(ModelError::InvalidIdentifier {
            kind,
            value: s.to_string(),
            reason: "must not be empty".into(),
        });
    }
    Ok(s.to_string())
}

// ---------------------------------------------------------------------------
// EnterpriseId
// ---------------------------------------------------------------------------

/// Numeric enterprise (tenant) identifier.
///
/// Tokens never carry the raw value; see the `ent-id` claim.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct EnterpriseId(u32);

impl EnterpriseId {
    /// Wrap a raw enterprise id.
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// The raw numeric value.
    pub fn get(self) -> u32 {
        self.0
    }

    /// 4-byte big-endian encoding, the input to the `ent-id` hash.
    pub fn to_be_bytes(self) -> [u8; 4] {
        self.0.to_be_bytes()
    }
}

impl fmt::Display for EnterpriseId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl FromStr for EnterpriseId {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        s.trim()
            .parse::<u32>()
            .map(Self)
            .map_err(|_| ModelError::InvalidEnterpriseId {
                value: s.to_string(),
            })
    }
}

// ---------------------------------------------------------------------------
// Role
// ---------------------------------------------------------------------------

/// A scope string a token can be minted for.
///
/// Only the roles the client itself mints are enumerated; the `scope` claim
/// is still an ordered list of plain strings so callers can pass others.
#[derive(
    Serialize,
    Deserialize,
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    Hash,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    /// Enterprise administration.
    Admin,
    /// A human operator driving minions.
    User,
    /// A remote agent.
    Minion,
}
