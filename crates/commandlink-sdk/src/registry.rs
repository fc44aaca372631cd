//! Table of live sessions keyed by principal login.
//!
//! The registry is an ordinary owned object: the CLI creates one per
//! process and hands it to the router. At most one live session exists per
//! login; a second `connect` is rejected rather than replacing the first.
//! A session that died on a transport failure no longer counts: it is
//! dropped the next time the registry looks at it.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use commandlink_models::Login;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::channel::SessionChannel;
use crate::error::SdkError;
use crate::transport::{AuthHeaders, Connector, WsConnector};

/// Live sessions, one per login.
pub struct ConnectionRegistry {
    connector: Arc<dyn Connector>,
    read_timeout: Duration,
    sessions: Mutex<HashMap<Login, Arc<SessionChannel>>>,
}

impl ConnectionRegistry {
    /// A registry opening transports through `connector`. Sessions it
    /// creates wait up to `read_timeout` per inbound frame.
    pub fn new(connector: Arc<dyn Connector>, read_timeout: Duration) -> Self {
        Self {
            connector,
            read_timeout,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// A registry connecting over WebSocket.
    pub fn websocket(read_timeout: Duration) -> Self {
        Self::new(Arc::new(WsConnector), read_timeout)
    }

    /// Open a session for `login` and register it.
    ///
    /// The presence check, the connect and the insert happen under one
    /// lock, so concurrent connects for the same login cannot both succeed.
    ///
    /// # Errors
    ///
    /// [`SdkError::AlreadyConnected`] if `login` has a live session (which
    /// is left untouched); [`SdkError::Transport`] if the connection is not
    /// established within `connect_timeout`. A dead session for `login` is
    /// replaced.
    pub async fn connect(
        &self,
        login: &Login,
        role: &str,
        endpoint: &str,
        headers: &AuthHeaders,
        connect_timeout: Duration,
    ) -> Result<Arc<SessionChannel>, SdkError> {
        let mut sessions = self.sessions.lock().await;
        match sessions.get(login) {
            Some(existing) if existing.is_live() => {
                return Err(SdkError::AlreadyConnected {
                    login: existing.login().clone(),
                    role: existing.role().to_string(),
                });
            }
            Some(_) => {
                sessions.remove(login);
                debug!(%login, "dropping dead session");
            }
            None => {}
        }

        debug!(%login, %role, %endpoint, "connecting to relay");
        let transport =
            match tokio::time::timeout(connect_timeout, self.connector.connect(endpoint, headers))
                .await
            {
                Ok(result) => result?,
                Err(_) => {
                    return Err(SdkError::Transport(format!(
                        "connect to {endpoint} timed out after {connect_timeout:?}"
                    )));
                }
            };

        let session = Arc::new(SessionChannel::new(
            login.clone(),
            role,
            endpoint,
            self.read_timeout,
            transport,
        ));
        sessions.insert(login.clone(), Arc::clone(&session));
        info!(%login, %role, "connected");
        Ok(session)
    }

    /// The live session for `login`, if any.
    pub async fn get(&self, login: &Login) -> Option<Arc<SessionChannel>> {
        let mut sessions = self.sessions.lock().await;
        prune(&mut sessions);
        sessions.get(login).cloned()
    }

    /// Remove and close the session for `login`.
    ///
    /// The session is unregistered and shut down under the registry lock;
    /// the close handshake runs after the lock is released and gets at most
    /// `close_timeout`, including any wait for the session's send lock.
    ///
    /// # Errors
    ///
    /// [`SdkError::NotConnected`] if `login` has no session.
    pub async fn disconnect(&self, login: &Login, close_timeout: Duration) -> Result<(), SdkError> {
        let session = {
            let mut sessions = self.sessions.lock().await;
            let session = sessions.remove(login).ok_or_else(|| SdkError::NotConnected {
                login: login.clone(),
            })?;
            session.shutdown();
            session
        };
        session.close(close_timeout).await;
        info!(%login, "disconnected");
        Ok(())
    }

    /// Drop `session`, invalidated by a transport error, without a close
    /// handshake.
    ///
    /// Does nothing if the login is now held by a different session.
    pub async fn evict(&self, session: &Arc<SessionChannel>) -> bool {
        let login = session.login();
        let mut sessions = self.sessions.lock().await;
        if !sessions.get(login).is_some_and(|current| Arc::ptr_eq(current, session)) {
            return false;
        }
        sessions.remove(login);
        session.shutdown();
        warn!(%login, "session evicted after transport failure");
        true
    }

    /// Logins with a live session, sorted.
    pub async fn logins(&self) -> Vec<Login> {
        let mut sessions = self.sessions.lock().await;
        prune(&mut sessions);
        let mut logins: Vec<Login> = sessions.keys().cloned().collect();
        logins.sort_by(|a, b| a.as_str().cmp(b.as_str()));
        logins
    }
}

fn prune(sessions: &mut HashMap<Login, Arc<SessionChannel>>) {
    sessions.retain(|login, session| {
        let live = session.is_live();
        if !live {
            debug!(%login, "dropping dead session");
        }
        live
    });
}
