//! Client configuration.
//!
//! Built from environment variables at startup; a few values can then be
//! overridden by command-line flags in `main`.

use std::path::PathBuf;
use std::time::Duration;

use commandlink_models::{EnterpriseId, Login};
use tracing::warn;

/// Authorization API used for enterprise and user registration.
pub const DEFAULT_AUTH_API: &str = "https://9qn0mitn5d.execute-api.us-east-1.amazonaws.com/";
/// Endpoint that validates user tokens.
pub const DEFAULT_USER_AUTH_URL: &str = "https://xmr2imqr1d.execute-api.us-east-1.amazonaws.com/";

const DEFAULT_TIMEOUT_SECS: u64 = 3;

/// Settings shared by every command of one process.
#[derive(Debug, Clone)]
pub struct RemoteConfig {
    /// Authorization API base URL, always ending in `/`.
    pub auth_api: String,
    /// User check base URL, always ending in `/`.
    pub user_auth_url: String,
    /// Upper bound on establishing a relay connection.
    pub connect_timeout: Duration,
    /// Silence that ends an inbound burst.
    pub read_timeout: Duration,
    /// Upper bound on the close handshake.
    pub close_timeout: Duration,
    /// Location of the local record vault.
    pub vault_path: PathBuf,
    /// PEM file holding the acting user's RSA private key.
    pub user_key_path: Option<PathBuf>,
    /// Acting login when `--user-id` is not given.
    pub user: Option<Login>,
    /// Enterprise the acting user belongs to.
    pub enterprise_id: Option<EnterpriseId>,
}

impl RemoteConfig {
    /// Build the configuration from environment variables.
    ///
    /// | Variable                      | Default                                   |
    /// |-------------------------------|-------------------------------------------|
    /// | `REMOTE_AUTH_API`             | [`DEFAULT_AUTH_API`]                      |
    /// | `REMOTE_USER_AUTH_URL`        | [`DEFAULT_USER_AUTH_URL`]                 |
    /// | `REMOTE_CONNECT_TIMEOUT_SECS` | `3`                                       |
    /// | `REMOTE_READ_TIMEOUT_SECS`    | `3`                                       |
    /// | `REMOTE_CLOSE_TIMEOUT_SECS`   | `3`                                       |
    /// | `REMOTE_VAULT`                | `<config dir>/commandlink/vault.json`     |
    /// | `REMOTE_USER_KEY`             | unset                                     |
    /// | `REMOTE_USER`                 | unset                                     |
    /// | `REMOTE_ENTERPRISE_ID`        | unset                                     |
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build the configuration from an arbitrary variable source.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Self {
        let var = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());
        let secs = |name: &str| {
            Duration::from_secs(
                var(name)
                    .and_then(|v| v.trim().parse().ok())
                    .unwrap_or(DEFAULT_TIMEOUT_SECS),
            )
        };

        let enterprise_id = var("REMOTE_ENTERPRISE_ID").and_then(|v| match v.parse() {
            Ok(id) => Some(id),
            Err(e) => {
                warn!(value = %v, error = %e, "ignoring REMOTE_ENTERPRISE_ID");
                None
            }
        });

        Self {
            auth_api: with_trailing_slash(
                var("REMOTE_AUTH_API").unwrap_or_else(|| DEFAULT_AUTH_API.to_string()),
            ),
            user_auth_url: with_trailing_slash(
                var("REMOTE_USER_AUTH_URL").unwrap_or_else(|| DEFAULT_USER_AUTH_URL.to_string()),
            ),
            connect_timeout: secs("REMOTE_CONNECT_TIMEOUT_SECS"),
            read_timeout: secs("REMOTE_READ_TIMEOUT_SECS"),
            close_timeout: secs("REMOTE_CLOSE_TIMEOUT_SECS"),
            vault_path: var("REMOTE_VAULT").map_or_else(default_vault_path, PathBuf::from),
            user_key_path: var("REMOTE_USER_KEY").map(PathBuf::from),
            user: var("REMOTE_USER").map(|v| Login::new(v.trim())),
            enterprise_id,
        }
    }
}

fn with_trailing_slash(mut url: String) -> String {
    if !url.ends_with('/') {
        url.push('/');
    }
    url
}

fn default_vault_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("commandlink")
        .join("vault.json")
}
