//! Outbound relay requests.
//!
//! Every frame the client writes to the relay is one [`RelayRequest`]
//! serialized as a single JSON text frame. The `action` key selects the
//! variant:
//!
//! ```text
//! {"action":"send","type":"command","to":"<minion>","message":["ping"]}
//! {"action":"list","role":"minion"}
//! {"action":"connectSocket","to":"<minion>"}
//! ```

use serde::{Deserialize, Serialize};

use crate::identity::MinionId;

// ---------------------------------------------------------------------------
// RelayRequest
// ---------------------------------------------------------------------------

/// A request frame addressed to the relay.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(tag = "action")]
pub enum RelayRequest {
    /// Route an argument list to a named minion.
    #[serde(rename = "send")]
    Send {
        /// Payload type; always [`SendKind::Command`] today.
        #[serde(rename = "type")]
        kind: SendKind,
        /// Target minion.
        to: MinionId,
        /// Argument tokens, in order.
        message: Vec<String>,
    },
    /// Ask for the relay's view of connected principals.
    #[serde(rename = "list")]
    List {
        /// Optional role filter.
        #[serde(default, skip_serializing_if = "Option::is_none")]
        role: Option<String>,
    },
    /// Ask for a secondary socket bridge to a minion.
    #[serde(rename = "connectSocket")]
    ConnectSocket {
        /// Target minion.
        to: MinionId,
    },
}

/// Payload type of a [`RelayRequest::Send`].
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SendKind {
    /// A command line for the minion to execute.
    Command,
}

impl RelayRequest {
    /// A command for `to`, carrying `tokens` verbatim.
    pub fn command<I, S>(to: &MinionId, tokens: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Send {
            kind: SendKind::Command,
            to: to.clone(),
            message: tokens.into_iter().map(Into::into).collect(),
        }
    }

    /// The first command token, if this is a command send.
    pub fn directive(&self) -> Option<&str> {
        match self {
            Self::Send { message, .. } => message.first().map(String::as_str),
            _ => None,
        }
    }
}
