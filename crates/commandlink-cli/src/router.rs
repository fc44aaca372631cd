//! Maps `<object> <action>` commands onto token issuance, authorization API
//! calls and relay sessions.
//!
//! | object       | actions                                                       |
//! |--------------|---------------------------------------------------------------|
//! | `enterprise` | `add`, `check`                                                |
//! | `minion`     | `add`, `cmd`, `exit`, `ping`                                  |
//! | `user`       | `add`, `check`, `connect`, `disconnect`, `list`, `receive`, `connectSocket` |
//!
//! Every precondition (records, ids, keys, an open session) is checked
//! before anything goes on the network. An unmet one is not an error: the
//! command is skipped with a warning and [`Dispatch::Skipped`] says why.

use std::fmt;
use std::sync::Arc;

use commandlink_auth::{
    bucket_from_issuer, decode, AuthError, JwkSet, KeyMaterial, PublicJwk, TokenIssuer,
    TokenRequest,
};
use commandlink_models::{
    EnterpriseId, FolderRef, Login, MinionId, NewRecord, RelayRequest, Role,
};
use commandlink_sdk::{
    ApiResponse, AuthApiClient, AuthHeaders, ChannelGuard, ConnectionRegistry, Inbound, SdkError,
    SessionChannel,
};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::cli::RemoteArgs;
use crate::config::RemoteConfig;
use crate::records::{RecordCreator, RecordError, RecordStore};

// ---------------------------------------------------------------------------
// Outcomes
// ---------------------------------------------------------------------------

/// Why a command was not carried out.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Precondition {
    /// No object/action given.
    EmptyCommand,
    /// The object/action pair is not one the router knows.
    UnknownCommand(String),
    /// `--root-key` was not given.
    MissingRootKey,
    /// `--root-key` did not name a record.
    RootKeyNotFound(String),
    /// `--folder` was not given.
    MissingFolder,
    /// `--folder` did not name a folder.
    FolderNotFound(String),
    /// `--minion-id` was not given.
    MissingMinionId,
    /// Neither `--user-id` nor `REMOTE_USER` is set.
    MissingUser,
    /// `REMOTE_ENTERPRISE_ID` is not set.
    MissingEnterpriseId,
    /// No user private key is configured.
    MissingUserKey,
    /// The login has no open session.
    NotConnected(Login),
}

impl fmt::Display for Precondition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::EmptyCommand => f.write_str("please specify a command to run"),
            Self::UnknownCommand(command) => write!(f, "unknown command \"{command}\""),
            Self::MissingRootKey => f.write_str("the --root-key (-k) option is required"),
            Self::RootKeyNotFound(path) => write!(f, "can't find root key {path}"),
            Self::MissingFolder => f.write_str("the --folder (-f) option is required"),
            Self::FolderNotFound(path) => write!(f, "can't find folder {path}"),
            Self::MissingMinionId => f.write_str("the --minion-id (-m) option is required"),
            Self::MissingUser => f.write_str("the --user-id (-u) option or REMOTE_USER is required"),
            Self::MissingEnterpriseId => f.write_str("REMOTE_ENTERPRISE_ID is required"),
            Self::MissingUserKey => f.write_str("a user key (--user-key or REMOTE_USER_KEY) is required"),
            Self::NotConnected(login) => write!(f, "can't find connection for {login}"),
        }
    }
}

/// Result of routing one command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Dispatch {
    /// The command ran; lines to show the operator.
    Done(Vec<String>),
    /// A precondition was not met; nothing was sent.
    Skipped(Precondition),
}

/// Failure while carrying out a command.
#[derive(Debug, thiserror::Error)]
pub enum RouterError {
    /// Key resolution or token issuance failed.
    #[error(transparent)]
    Auth(#[from] AuthError),
    /// Relay or authorization API failure.
    #[error(transparent)]
    Sdk(#[from] SdkError),
    /// Record store failure.
    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Internal short-circuit: either skip with a reason or fail.
enum Halt {
    Skip(Precondition),
    Fail(RouterError),
}

impl From<Precondition> for Halt {
    fn from(p: Precondition) -> Self {
        Halt::Skip(p)
    }
}

impl From<AuthError> for Halt {
    fn from(e: AuthError) -> Self {
        Halt::Fail(e.into())
    }
}

impl From<SdkError> for Halt {
    fn from(e: SdkError) -> Self {
        Halt::Fail(e.into())
    }
}

impl From<RecordError> for Halt {
    fn from(e: RecordError) -> Self {
        Halt::Fail(e.into())
    }
}

type Step<T> = Result<T, Halt>;

// ---------------------------------------------------------------------------
// CommandRouter
// ---------------------------------------------------------------------------

/// Executes remote commands against a record vault and a session registry.
pub struct CommandRouter<V> {
    config: RemoteConfig,
    vault: V,
    registry: Arc<ConnectionRegistry>,
    api: AuthApiClient,
    issuer: TokenIssuer,
    user_key: Option<String>,
}

impl<V: RecordStore + RecordCreator> CommandRouter<V> {
    /// A router with no user key and the system clock.
    pub fn new(config: RemoteConfig, vault: V, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            config,
            vault,
            registry,
            api: AuthApiClient::new(),
            issuer: TokenIssuer::new(),
            user_key: None,
        }
    }

    /// Use `pem` as the acting user's RSA private key.
    #[must_use]
    pub fn with_user_key(mut self, pem: Option<String>) -> Self {
        self.user_key = pem;
        self
    }

    /// Replace the token issuer (e.g. to pin the clock).
    #[cfg(test)]
    #[must_use]
    pub fn with_issuer(mut self, issuer: TokenIssuer) -> Self {
        self.issuer = issuer;
        self
    }

    /// Sessions opened by this router.
    pub fn registry(&self) -> &ConnectionRegistry {
        &self.registry
    }

    /// Run one command.
    ///
    /// # Errors
    ///
    /// Key, token, record store, relay and HTTP failures. A transport
    /// failure on a session also drops that session from the registry.
    pub async fn execute(&self, args: &RemoteArgs) -> Result<Dispatch, RouterError> {
        let result = match args.command.first().map(String::as_str) {
            None => Err(Precondition::EmptyCommand.into()),
            Some("enterprise") => self.enterprise(args).await,
            Some("minion") => self.minion(args).await,
            Some("user") => self.user(args).await,
            Some(_) => Err(unknown(args)),
        };
        match result {
            Ok(output) => Ok(Dispatch::Done(output)),
            Err(Halt::Skip(precondition)) => {
                warn!(command = %args.command.join(" "), "{precondition}");
                Ok(Dispatch::Skipped(precondition))
            }
            Err(Halt::Fail(e)) => Err(e),
        }
    }

    /// Disconnect every open session.
    pub async fn close_all(&self) {
        for login in self.registry.logins().await {
            if let Err(e) = self
                .registry
                .disconnect(&login, self.config.close_timeout)
                .await
            {
                warn!(%login, error = %e, "disconnect failed");
            }
        }
    }

    // -- enterprise ---------------------------------------------------------

    async fn enterprise(&self, args: &RemoteArgs) -> Step<Vec<String>> {
        let action = action(args);
        if !matches!(action, Some("add" | "check")) {
            return Err(unknown(args));
        }
        let material = self.root_key(args)?;
        let login = self.login(args)?;
        let request = TokenRequest::new(&login, scopes(args, Role::Admin));

        if action == Some("add") {
            let ent_id = self.enterprise_id()?;
            let jwk = self.user_jwk()?;
            let issued = self.issuer.issue(&material, &request)?;

            let (claims, _) = decode(&issued.token)?;
            let iss = claims
                .get("iss")
                .and_then(Value::as_str)
                .ok_or_else(|| AuthError::InvalidToken("token has no iss claim".into()))?;
            let body = json!({
                "iss": iss,
                "bucket": bucket_from_issuer(iss)?,
                "folder": ent_id.to_string(),
                "jwks": JwkSet::single(jwk),
            });
            let url = format!("{}enterprise/{ent_id}", self.config.auth_api);
            let res = self.api.put(&url, &issued.token, &body).await?;
            return Ok(vec![pretty(&res)]);
        }

        let issued = self.issuer.issue(&material, &request)?;
        let url = format!("{}enterprise", self.config.auth_api);
        let res = self.api.get(&url, &issued.token).await?;
        if res.is_success() {
            info!("enterprise check successful");
        } else {
            warn!(status = %res.status, "enterprise check failed");
        }
        Ok(vec![pretty(&res)])
    }

    // -- minion -------------------------------------------------------------

    async fn minion(&self, args: &RemoteArgs) -> Step<Vec<String>> {
        match action(args) {
            Some("add") => {
                let minion = minion_id(args)?;
                let folder = self.folder(args)?;
                let material = self.root_key(args)?;
                let request =
                    TokenRequest::new(&Login::new(minion.as_str()), scopes(args, Role::Minion))
                        .enterprise(self.config.enterprise_id)
                        .expiry_delta(args.expire_token_delta);
                let issued = self.issuer.issue(&material, &request)?;

                let record = NewRecord::remote_minion(&minion, &issued.endpoint, &issued.token);
                let uid = self.vault.create(&folder, record, args.force)?;
                info!(%minion, %uid, folder = %folder.name, "record for minion has been added");
                Ok(Vec::new())
            }
            Some(action @ ("cmd" | "exit" | "ping")) => {
                let minion = minion_id(args)?;
                let skip = if action == "cmd" { 2 } else { 1 };
                let tokens = args.command.get(skip..).unwrap_or_default();
                if tokens.is_empty() {
                    return Err(Precondition::EmptyCommand.into());
                }
                let login = self.login(args)?;
                let session = self.session(&login).await?;

                let request = RelayRequest::command(&minion, tokens.iter().cloned());
                // The minion answers an exit in two bursts.
                let drains = if request.directive() == Some("exit") { 2 } else { 1 };
                self.exchange(&session, Some(&request), drains).await
            }
            _ => Err(unknown(args)),
        }
    }

    // -- user ---------------------------------------------------------------

    async fn user(&self, args: &RemoteArgs) -> Step<Vec<String>> {
        match action(args) {
            Some("disconnect") => {
                let login = self.login(args)?;
                self.session(&login).await?;
                self.registry
                    .disconnect(&login, self.config.close_timeout)
                    .await?;
                info!(%login, "disconnected");
                Ok(Vec::new())
            }
            Some("list") => {
                let login = self.login(args)?;
                let session = self.session(&login).await?;
                let request = RelayRequest::List {
                    role: args.command.get(2).cloned(),
                };
                self.exchange(&session, Some(&request), 1).await
            }
            Some("receive") => {
                let login = self.login(args)?;
                let session = self.session(&login).await?;
                self.exchange(&session, None, 1).await
            }
            Some("connectSocket") => {
                let minion = minion_id(args)?;
                let login = self.login(args)?;
                let session = self.session(&login).await?;
                let request = RelayRequest::ConnectSocket { to: minion.clone() };
                self.exchange(&session, Some(&request), 0).await?;
                info!(%minion, "socket connection requested");
                Ok(Vec::new())
            }
            Some("add") => {
                let material = self.root_key(args)?;
                let login = self.login(args)?;
                let jwk = self.user_jwk()?;
                let issued = self
                    .issuer
                    .issue(&material, &TokenRequest::new(&login, scopes(args, Role::User)))?;

                let url = format!("{}users/{}", self.config.auth_api, jwk.kid);
                let res = self
                    .api
                    .put(&url, &issued.token, &json!({ "jwk_key": jwk }))
                    .await?;
                Ok(vec![pretty(&res)])
            }
            Some(action @ ("check" | "connect")) => {
                let material = self.root_key(args)?;
                let login = self.login(args)?;
                let jwk = self.user_jwk()?;
                if action == "connect" && self.registry.get(&login).await.is_some() {
                    warn!(%login, "user is already connected");
                    return Ok(Vec::new());
                }

                let scopes = scopes(args, Role::User);
                let role = scopes.first().cloned().unwrap_or_default();
                let request = TokenRequest::new(&login, scopes)
                    .enterprise(self.config.enterprise_id)
                    .public_jwk(Some(jwk));
                let issued = self.issuer.issue(&material, &request)?;

                if action == "check" {
                    let url = format!("{}{role}", self.config.user_auth_url);
                    let res = self.api.get(&url, &issued.token).await?;
                    if res.is_success() {
                        info!("user check successful");
                    } else {
                        warn!(status = %res.status, "user check failed");
                    }
                    return Ok(vec![pretty(&res)]);
                }

                let headers = AuthHeaders {
                    authorization: issued.token,
                    role: role.clone(),
                    user: login.to_string(),
                };
                let session = match self
                    .registry
                    .connect(
                        &login,
                        &role,
                        &issued.endpoint,
                        &headers,
                        self.config.connect_timeout,
                    )
                    .await
                {
                    Ok(session) => session,
                    Err(SdkError::AlreadyConnected { login, .. }) => {
                        warn!(%login, "user is already connected");
                        return Ok(Vec::new());
                    }
                    Err(e) => return Err(e.into()),
                };

                match args.minion_id.as_deref() {
                    Some(minion) => {
                        let ping = RelayRequest::command(&MinionId::new(minion), ["ping"]);
                        self.exchange(&session, Some(&ping), 1).await
                    }
                    None => Ok(Vec::new()),
                }
            }
            _ => Err(unknown(args)),
        }
    }

    // -- preconditions ------------------------------------------------------

    fn login(&self, args: &RemoteArgs) -> Step<Login> {
        args.user_id
            .as_deref()
            .map(Login::new)
            .or_else(|| self.config.user.clone())
            .ok_or_else(|| Precondition::MissingUser.into())
    }

    fn root_key(&self, args: &RemoteArgs) -> Step<KeyMaterial> {
        let path = args.root_key.as_deref().ok_or(Precondition::MissingRootKey)?;
        let record = self
            .vault
            .resolve_record(path)?
            .ok_or_else(|| Precondition::RootKeyNotFound(path.to_string()))?;
        info!(title = %record.title, "found root key");
        Ok(KeyMaterial::resolve(&record)?)
    }

    fn folder(&self, args: &RemoteArgs) -> Step<FolderRef> {
        let path = args.folder.as_deref().ok_or(Precondition::MissingFolder)?;
        let folder = self
            .vault
            .resolve_folder(path)?
            .ok_or_else(|| Precondition::FolderNotFound(path.to_string()))?;
        info!(name = %folder.name, "found folder");
        Ok(folder)
    }

    fn enterprise_id(&self) -> Step<EnterpriseId> {
        Ok(self
            .config
            .enterprise_id
            .ok_or(Precondition::MissingEnterpriseId)?)
    }

    fn user_jwk(&self) -> Step<PublicJwk> {
        let pem = self
            .user_key
            .as_deref()
            .ok_or(Precondition::MissingUserKey)?;
        Ok(PublicJwk::from_private_pem(pem)?)
    }

    async fn session(&self, login: &Login) -> Step<Arc<SessionChannel>> {
        self.registry
            .get(login)
            .await
            .ok_or_else(|| Precondition::NotConnected(login.clone()).into())
    }

    // -- relay I/O ----------------------------------------------------------

    /// Send `request` (if any), then drain `drains` bursts, all under the
    /// session lock. A transport failure evicts the session.
    async fn exchange(
        &self,
        session: &Arc<SessionChannel>,
        request: Option<&RelayRequest>,
        drains: usize,
    ) -> Step<Vec<String>> {
        let mut output = Vec::new();
        let result = {
            let mut guard = session.lock().await;
            converse(&mut guard, request, drains, &mut output).await
        };
        match result {
            Ok(()) => Ok(output),
            Err(e) => {
                if e.is_transport() {
                    self.registry.evict(session).await;
                }
                Err(e.into())
            }
        }
    }
}

async fn converse(
    guard: &mut ChannelGuard<'_>,
    request: Option<&RelayRequest>,
    drains: usize,
    output: &mut Vec<String>,
) -> Result<(), SdkError> {
    if let Some(request) = request {
        guard.send(request).await?;
    }
    for _ in 0..drains {
        guard
            .receive_all(|inbound| match inbound {
                Inbound::Rendering(text) => output.push(text),
                // Already logged by the channel.
                Inbound::InvalidFrame(_) => {}
                Inbound::LogRotation => info!("relay requested log rotation"),
            })
            .await?;
    }
    Ok(())
}

fn action(args: &RemoteArgs) -> Option<&str> {
    args.command.get(1).map(String::as_str)
}

fn unknown(args: &RemoteArgs) -> Halt {
    Precondition::UnknownCommand(args.command.join(" ")).into()
}

fn minion_id(args: &RemoteArgs) -> Step<MinionId> {
    args.minion_id
        .as_deref()
        .map(MinionId::new)
        .ok_or_else(|| Precondition::MissingMinionId.into())
}

fn scopes(args: &RemoteArgs, default: Role) -> Vec<String> {
    if args.roles.is_empty() {
        vec![default.to_string()]
    } else {
        args.roles.clone()
    }
}

fn pretty(res: &ApiResponse) -> String {
    match &res.body {
        Value::String(text) => text.clone(),
        body => serde_json::to_string_pretty(body).unwrap_or_else(|_| body.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;
    use commandlink_auth::hash_enterprise_id;
    use commandlink_models::FieldKind;
    use commandlink_sdk::transport::memory::MemoryRelay;
    use tempfile::TempDir;
    use wiremock::matchers::{body_partial_json, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    use super::*;
    use crate::cli::ShellLine;
    use crate::vault::FileVault;

    const ROOT_PEM: &str = include_str!("../tests/fixtures/root_key.pem");
    const USER_PEM: &str = include_str!("../tests/fixtures/user_key.pem");
    const USER_KID: &str = "tQVcXByTWYW8Ze9oTBLiKUHNYW0rPDA1cEqSZUWg1Mc";
    const OPERATOR: &str = "ops@example.com";
    const NOW: i64 = 1_700_000_000;

    struct Harness {
        _dir: TempDir,
        router: CommandRouter<FileVault>,
        relay: MemoryRelay,
    }

    impl Harness {
        fn new(auth_api: &str) -> Self {
            Self::with_user_key(auth_api, Some(USER_PEM))
        }

        fn with_user_key(auth_api: &str, user_key: Option<&str>) -> Self {
            let dir = tempfile::tempdir().unwrap();
            let vault_path = dir.path().join("vault.json");
            let seed = json!({
                "folders": [{"uid": "f-remote", "name": "Remote"}],
                "records": [{
                    "uid": "r-root",
                    "title": "Root",
                    "url": "wss://relay.test/ws",
                    "fields": [
                        {"kind": "text", "name": "alg", "value": "RS256"},
                        {"kind": "text", "name": "aud", "value": "commandlink-relay"},
                        {"kind": "url", "name": "iss", "value": "https://acme.issuer.example.com/"},
                        {"kind": "text", "name": "kid", "value": "root-1"},
                        {"kind": "keyPair", "name": "key", "value": {"privateKey": ROOT_PEM, "publicKey": ""}}
                    ]
                }]
            });
            std::fs::write(&vault_path, seed.to_string()).unwrap();

            let config = RemoteConfig::from_lookup(|name| match name {
                "REMOTE_AUTH_API" | "REMOTE_USER_AUTH_URL" => Some(auth_api.to_string()),
                "REMOTE_USER" => Some(OPERATOR.to_string()),
                "REMOTE_ENTERPRISE_ID" => Some("1234".to_string()),
                _ => None,
            });
            let relay = MemoryRelay::new();
            let registry = Arc::new(ConnectionRegistry::new(
                Arc::new(relay.clone()),
                config.read_timeout,
            ));
            let router = CommandRouter::new(config, FileVault::open(vault_path).unwrap(), registry)
                .with_user_key(user_key.map(str::to_string))
                .with_issuer(TokenIssuer::with_clock(|| NOW));
            Self {
                _dir: dir,
                router,
                relay,
            }
        }

        async fn run(&self, line: &str) -> Result<Dispatch, RouterError> {
            let args = ShellLine::try_parse_from(line.split_whitespace())
                .unwrap()
                .args;
            self.router.execute(&args).await
        }

        async fn done(&self, line: &str) -> Vec<String> {
            match self.run(line).await.unwrap() {
                Dispatch::Done(output) => output,
                Dispatch::Skipped(p) => panic!("{line}: skipped: {p}"),
            }
        }

        async fn skipped(&self, line: &str) -> Precondition {
            match self.run(line).await.unwrap() {
                Dispatch::Skipped(p) => p,
                Dispatch::Done(output) => panic!("{line}: ran: {output:?}"),
            }
        }

        fn sent(&self) -> Vec<Value> {
            self.relay
                .sent()
                .iter()
                .map(|frame| serde_json::from_str(frame).unwrap())
                .collect()
        }
    }

    // Nothing listens here; reaching it would fail the test with an HTTP error.
    const OFFLINE: &str = "http://127.0.0.1:9/";

    #[tokio::test]
    async fn unknown_and_empty_commands_are_skipped() {
        let h = Harness::new(OFFLINE);
        assert_eq!(h.skipped("").await, Precondition::EmptyCommand);
        assert_eq!(
            h.skipped("robot dance").await,
            Precondition::UnknownCommand("robot dance".into())
        );
        assert_eq!(
            h.skipped("-k Root user fly").await,
            Precondition::UnknownCommand("user fly".into())
        );
        assert_eq!(
            h.skipped("enterprise").await,
            Precondition::UnknownCommand("enterprise".into())
        );
    }

    #[tokio::test]
    async fn missing_inputs_skip_before_any_network_call() {
        let h = Harness::new(OFFLINE);
        assert_eq!(h.skipped("enterprise check").await, Precondition::MissingRootKey);
        assert_eq!(
            h.skipped("-k Nope enterprise check").await,
            Precondition::RootKeyNotFound("Nope".into())
        );
        assert_eq!(h.skipped("minion add").await, Precondition::MissingMinionId);
        assert_eq!(
            h.skipped("-m m-1 -k Root minion add").await,
            Precondition::MissingFolder
        );
        assert_eq!(
            h.skipped("-m m-1 -f Elsewhere -k Root minion add").await,
            Precondition::FolderNotFound("Elsewhere".into())
        );
        assert_eq!(
            h.skipped("-m m-1 minion cmd").await,
            Precondition::EmptyCommand
        );
        assert_eq!(
            h.skipped("user connectSocket").await,
            Precondition::MissingMinionId
        );

        let keyless = Harness::with_user_key(OFFLINE, None);
        assert_eq!(
            keyless.skipped("-k Root user add").await,
            Precondition::MissingUserKey
        );
        assert_eq!(
            keyless.skipped("-k Root enterprise add").await,
            Precondition::MissingUserKey
        );
        assert!(keyless.relay.connects().is_empty());
    }

    #[tokio::test]
    async fn session_commands_need_a_connection() {
        let h = Harness::new(OFFLINE);
        let operator = Login::new(OPERATOR);
        for line in [
            "-m m-1 minion cmd ls",
            "-m m-1 minion ping",
            "user list",
            "user receive",
            "user disconnect",
        ] {
            assert_eq!(h.skipped(line).await, Precondition::NotConnected(operator.clone()));
        }
        assert_eq!(
            h.skipped("-u someone-else user receive").await,
            Precondition::NotConnected(Login::new("someone-else"))
        );
        assert!(h.relay.sent().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn user_connect_presents_token_headers_and_pings_minion() {
        let h = Harness::new(OFFLINE);
        h.relay.push(r#"{"from":"m-1","message":"pong"}"#);

        let output = h.done("-k Root -m m-1 user connect").await;
        assert_eq!(output, ["m-1: pong"]);

        let connects = h.relay.connects();
        assert_eq!(connects.len(), 1);
        let (endpoint, headers) = &connects[0];
        assert_eq!(endpoint, "wss://relay.test/ws");
        assert_eq!(headers.role, "user");
        assert_eq!(headers.user, OPERATOR);

        let (claims, header) = decode(&headers.authorization).unwrap();
        assert_eq!(header.kid.as_deref(), Some("root-1"));
        assert_eq!(claims["login"], OPERATOR);
        assert_eq!(claims["scope"], "user");
        assert_eq!(claims["exp"], NOW + 7200);
        assert_eq!(
            claims["ent-id"],
            hash_enterprise_id(EnterpriseId::new(1234)).as_str()
        );
        let public_jwk: Value =
            serde_json::from_str(claims["public-jwk"].as_str().unwrap()).unwrap();
        assert_eq!(public_jwk["kid"], USER_KID);

        assert_eq!(
            h.sent(),
            [json!({"action": "send", "type": "command", "to": "m-1", "message": ["ping"]})]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn second_connect_keeps_the_first_session() {
        let h = Harness::new(OFFLINE);
        h.done("-k Root user connect").await;
        assert_eq!(h.done("-k Root user connect").await, Vec::<String>::new());
        assert_eq!(h.relay.connects().len(), 1);
        assert_eq!(h.router.registry().logins().await, [Login::new(OPERATOR)]);
    }

    #[tokio::test(start_paused = true)]
    async fn role_override_sets_scope_and_auth_role() {
        let h = Harness::new(OFFLINE);
        h.done("-k Root -r admin -r user user connect").await;
        let (_, headers) = &h.relay.connects()[0];
        assert_eq!(headers.role, "admin");
        let (claims, _) = decode(&headers.authorization).unwrap();
        assert_eq!(claims["scope"], "admin user");
    }

    #[tokio::test(start_paused = true)]
    async fn exit_drains_twice_and_ping_once() {
        let h = Harness::new(OFFLINE);
        h.done("-k Root user connect").await;
        assert_eq!(h.relay.idle_reads(), 0);

        h.done("-m m-1 minion cmd exit").await;
        assert_eq!(h.relay.idle_reads(), 2);

        h.done("-m m-1 minion ping").await;
        assert_eq!(h.relay.idle_reads(), 3);

        h.done("-m m-1 minion exit now").await;
        assert_eq!(h.relay.idle_reads(), 5);

        h.done("-m m-1 minion cmd ls -la").await;
        assert_eq!(h.relay.idle_reads(), 6);

        let messages: Vec<Value> = h.sent().into_iter().map(|f| f["message"].clone()).collect();
        assert_eq!(
            messages,
            [
                json!(["exit"]),
                json!(["ping"]),
                json!(["exit", "now"]),
                json!(["ls", "-la"]),
            ]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn list_forwards_role_filter_and_renders_members() {
        let h = Harness::new(OFFLINE);
        h.done("-k Root user connect").await;
        h.relay.push(r#"{"members":["m-1","m-2"]}"#);

        let output = h.done("user list minion").await;
        assert_eq!(output, ["members: \n    m-1\n    m-2"]);
        assert_eq!(h.sent(), [json!({"action": "list", "role": "minion"})]);

        h.done("user list").await;
        assert_eq!(h.sent()[1], json!({"action": "list"}));
    }

    #[tokio::test(start_paused = true)]
    async fn receive_reports_log_rotation_without_output() {
        let h = Harness::new(OFFLINE);
        h.done("-k Root user connect").await;
        h.relay.push(r#"{"message":{"rotate_log":true}}"#);
        h.relay.push(r#"{"from":"m-1","message":"late"}"#);

        assert!(h.done("user receive").await.is_empty());
        assert_eq!(h.relay.pending(), 1);
        assert_eq!(h.done("user receive").await, ["m-1: late"]);
    }

    #[tokio::test(start_paused = true)]
    async fn connect_socket_sends_without_draining() {
        let h = Harness::new(OFFLINE);
        h.done("-k Root user connect").await;
        h.done("-m m-1 user connectSocket").await;
        assert_eq!(h.sent(), [json!({"action": "connectSocket", "to": "m-1"})]);
        assert_eq!(h.relay.idle_reads(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_failure_evicts_the_session() {
        let h = Harness::new(OFFLINE);
        h.done("-k Root user connect").await;
        h.relay.push_error("connection reset");

        let err = h.run("user receive").await.unwrap_err();
        assert!(matches!(err, RouterError::Sdk(ref e) if e.is_transport()));
        assert!(h.router.registry().logins().await.is_empty());
        assert_eq!(
            h.skipped("user receive").await,
            Precondition::NotConnected(Login::new(OPERATOR))
        );
    }

    #[tokio::test(start_paused = true)]
    async fn disconnect_closes_and_close_all_empties_registry() {
        let h = Harness::new(OFFLINE);
        h.done("-k Root user connect").await;
        h.done("user disconnect").await;
        assert!(h.relay.closed());
        assert!(h.router.registry().logins().await.is_empty());

        h.done("-k Root -u second user connect").await;
        h.router.close_all().await;
        assert!(h.router.registry().logins().await.is_empty());
    }

    #[tokio::test]
    async fn minion_add_stores_a_minion_token() {
        let h = Harness::new(OFFLINE);
        h.done("-k Root -f Remote -m m-7 -e 60 minion add").await;

        let record = h.router.vault.resolve_record("Remote/m-7").unwrap().unwrap();
        assert_eq!(record.login, "m-7");
        assert_eq!(record.field(FieldKind::Url, "api").unwrap().value, "wss://relay.test/ws");
        let token = record.field(FieldKind::Secret, "JWT token").unwrap().value.clone();
        let (claims, _) = decode(token.as_str().unwrap()).unwrap();
        assert_eq!(claims["login"], "m-7");
        assert_eq!(claims["scope"], "minion");
        assert_eq!(claims["exp"], NOW + 60);
        assert!(claims.contains_key("ent-id"));
        assert!(!claims.contains_key("public-jwk"));

        let err = h.run("-k Root -f Remote -m m-7 minion add").await.unwrap_err();
        assert!(matches!(err, RouterError::Record(RecordError::Duplicate { .. })));
        h.done("--force -k Root -f Remote -m m-7 minion add").await;
    }

    #[tokio::test]
    async fn enterprise_add_registers_issuer_and_jwks() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path("/enterprise/1234"))
            .and(header_exists("Authorization"))
            .and(body_partial_json(json!({
                "iss": "https://acme.issuer.example.com/",
                "bucket": "acme",
                "folder": "1234",
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        let h = Harness::new(&server.uri());
        let output = h.done("-k Root enterprise add").await;
        assert_eq!(output, ["{\n  \"ok\": true\n}"]);

        let requests = server.received_requests().await.unwrap();
        let body: Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["jwks"]["keys"][0]["kid"], USER_KID);
        let token = requests[0].headers.get("Authorization").unwrap().to_str().unwrap();
        let (claims, _) = decode(token).unwrap();
        assert_eq!(claims["scope"], "admin");
    }

    #[tokio::test]
    async fn enterprise_check_surfaces_rejection() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/enterprise"))
            .respond_with(ResponseTemplate::new(403).set_body_string("Forbidden"))
            .expect(1)
            .mount(&server)
            .await;

        let h = Harness::new(&server.uri());
        assert_eq!(h.done("-k Root enterprise check").await, ["Forbidden"]);
    }

    #[tokio::test]
    async fn user_add_registers_jwk_under_its_thumbprint() {
        let server = MockServer::start().await;
        Mock::given(method("PUT"))
            .and(path(format!("/users/{USER_KID}")))
            .and(body_partial_json(json!({
                "jwk_key": {"kty": "RSA", "e": "AQAB", "kid": USER_KID, "use": "sig", "alg": "RS256"}
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"registered": USER_KID})))
            .expect(1)
            .mount(&server)
            .await;

        let h = Harness::new(&server.uri());
        let output = h.done("-k Root user add").await;
        assert!(output[0].contains(USER_KID));
    }

    #[tokio::test]
    async fn user_check_calls_the_user_endpoint() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/user"))
            .and(header_exists("Authorization"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"login": OPERATOR})))
            .expect(1)
            .mount(&server)
            .await;

        let h = Harness::new(&server.uri());
        let output = h.done("-k Root user check").await;
        assert!(output[0].contains(OPERATOR));
        assert!(h.relay.connects().is_empty());
    }
}
