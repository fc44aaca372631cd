//! Credential records as exposed by the record store.
//!
//! A [`CredentialRecord`] is read-only from the client's perspective: the
//! auth crate only looks up fields by `(kind, name)` and falls back to the
//! record's endpoint URL for `url` fields. [`NewRecord`] is the payload
//! handed to the record-creation collaborator.

use serde::{Deserialize, Serialize};
use serde_json::{json, Value};

use crate::identity::MinionId;

/// Record type assigned to credentials minted for minions.
pub const REMOTE_MINION_RECORD_TYPE: &str = "remote-minion";

// ---------------------------------------------------------------------------
// FieldKind
// ---------------------------------------------------------------------------

/// Declared kind of a record field.
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
)]
#[serde(rename_all = "camelCase")]
#[strum(serialize_all = "camelCase")]
pub enum FieldKind {
    /// Free text.
    Text,
    /// A URL; eligible for the endpoint-URL fallback.
    Url,
    /// `{ "privateKey": …, "publicKey": … }`.
    KeyPair,
    /// A login name.
    Login,
    /// An opaque secret such as a minted token.
    Secret,
}

// ---------------------------------------------------------------------------
// RecordField
// ---------------------------------------------------------------------------

/// One named, typed field of a record.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct RecordField {
    /// Declared kind.
    pub kind: FieldKind,
    /// Field label.
    pub name: String,
    /// Raw value; its expected shape depends on [`kind`](Self::kind).
    pub value: Value,
}

impl RecordField {
    /// Build a text-valued field.
    pub fn text(kind: FieldKind, name: &str, value: &str) -> Self {
        Self {
            kind,
            name: name.to_string(),
            value: Value::String(value.to_string()),
        }
    }

    /// Build a `keyPair` field.
    pub fn key_pair(name: &str, private_key: Option<&str>, public_key: &str) -> Self {
        let mut value = json!({ "publicKey": public_key });
        if let Some(private_key) = private_key {
            value["privateKey"] = Value::String(private_key.to_string());
        }
        Self {
            kind: FieldKind::KeyPair,
            name: name.to_string(),
            value,
        }
    }
}

// ---------------------------------------------------------------------------
// CredentialRecord
// ---------------------------------------------------------------------------

/// A stored credential as returned by the record store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct CredentialRecord {
    /// Store-assigned unique id.
    pub uid: String,
    /// Display title, used for path lookups.
    pub title: String,
    /// Login / identity string.
    #[serde(default)]
    pub login: String,
    /// Endpoint URL of the record.
    #[serde(default)]
    pub url: String,
    /// Ordered custom fields.
    #[serde(default)]
    pub fields: Vec<RecordField>,
}

impl CredentialRecord {
    /// First field matching both `kind` and `name` exactly.
    pub fn field(&self, kind: FieldKind, name: &str) -> Option<&RecordField> {
        self.fields
            .iter()
            .find(|f| f.kind == kind && f.name == name)
    }
}

/// A folder in the record store.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
pub struct FolderRef {
    /// Store-assigned unique id.
    pub uid: String,
    /// Folder name.
    pub name: String,
}

// ---------------------------------------------------------------------------
// NewRecord
// ---------------------------------------------------------------------------

/// Payload for creating a record through the record-creation collaborator.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct NewRecord {
    /// Record type, e.g. [`REMOTE_MINION_RECORD_TYPE`].
    #[serde(rename = "type")]
    pub record_type: String,
    /// Title of the new record.
    pub title: String,
    /// Login / identity string.
    pub login: String,
    /// Endpoint URL.
    pub url: String,
    /// Custom fields.
    pub fields: Vec<RecordField>,
}

impl NewRecord {
    /// The credential record persisted for a freshly minted minion token.
    ///
    /// The public key is left blank for the minion to fill in on first
    /// registration.
    pub fn remote_minion(minion: &MinionId, api_url: &str, token: &str) -> Self {
        Self {
            record_type: REMOTE_MINION_RECORD_TYPE.to_string(),
            title: minion.to_string(),
            login: minion.to_string(),
            url: api_url.to_string(),
            fields: vec![
                RecordField::text(FieldKind::Login, "login", minion.as_str()),
                RecordField::text(FieldKind::Url, "api", api_url),
                RecordField::text(FieldKind::Secret, "JWT token", token),
                RecordField::key_pair("public key", None, ""),
            ],
        }
    }
}
