//! One duplex session with the relay.
//!
//! Outbound, a [`RelayRequest`] becomes one JSON text frame. Inbound, the
//! relay never sends an end-of-response marker: a burst of frames is over
//! when a read produces nothing within the read timeout. Draining is
//! therefore a small state machine:
//!
//! ```text
//!            send / receive_all
//!   Idle ─────────────────────────▶ Draining
//!    ▲                                 │
//!    │ read timeout / log rotation     │ transport error, peer close,
//!    └─────────────────────────────────┤ shutdown
//!                                      ▼
//!                                    Closed
//! ```

use std::time::Duration;

use commandlink_models::{Login, RelayRequest};
use serde_json::{Map, Value};
use tokio::sync::{watch, Mutex, MutexGuard};
use tracing::{debug, trace, warn};

use crate::error::SdkError;
use crate::transport::FrameTransport;

// ---------------------------------------------------------------------------
// Public types
// ---------------------------------------------------------------------------

/// Where a channel stands in the drain cycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChannelState {
    /// Reading a burst.
    Draining,
    /// Last read timed out; the burst is over.
    Idle,
    /// The transport is gone.
    Closed,
}

/// What one inbound frame turned into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    /// Human-readable, newline-joined rendering of a frame.
    Rendering(String),
    /// A frame that was not a non-empty JSON object, verbatim.
    InvalidFrame(String),
    /// The relay asked the client to rotate its log.
    LogRotation,
}

/// Summary of one [`ChannelGuard::receive_all`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DrainReport {
    /// Frames read during the burst.
    pub frames: usize,
    /// State the channel was left in.
    pub state: ChannelState,
}

// ---------------------------------------------------------------------------
// SessionChannel
// ---------------------------------------------------------------------------

struct ChannelInner {
    transport: Box<dyn FrameTransport>,
    state: ChannelState,
}

/// A live session for one principal.
///
/// Sends and the drain that follows must not interleave with another send
/// on the same session, so all I/O goes through [`lock`](Self::lock).
pub struct SessionChannel {
    login: Login,
    role: String,
    endpoint: String,
    read_timeout: Duration,
    inner: Mutex<ChannelInner>,
    shutdown: watch::Sender<bool>,
}

impl SessionChannel {
    /// Wrap an already connected transport.
    pub fn new(
        login: Login,
        role: &str,
        endpoint: &str,
        read_timeout: Duration,
        transport: Box<dyn FrameTransport>,
    ) -> Self {
        let (shutdown, _) = watch::channel(false);
        Self {
            login,
            role: role.to_string(),
            endpoint: endpoint.to_string(),
            read_timeout,
            inner: Mutex::new(ChannelInner {
                transport,
                state: ChannelState::Idle,
            }),
            shutdown,
        }
    }

    /// Principal this session belongs to.
    pub fn login(&self) -> &Login {
        &self.login
    }

    /// Role the session was opened for.
    pub fn role(&self) -> &str {
        &self.role
    }

    /// Relay endpoint.
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    /// Take the per-session send lock.
    pub async fn lock(&self) -> ChannelGuard<'_> {
        ChannelGuard {
            read_timeout: self.read_timeout,
            closer: &self.shutdown,
            shutdown: self.shutdown.subscribe(),
            inner: self.inner.lock().await,
        }
    }

    /// Unblock any in-flight read; it ends with a transport error.
    pub fn shutdown(&self) {
        self.shutdown.send_replace(true);
    }

    /// Whether the session can still carry frames.
    ///
    /// Turns false on [`shutdown`](Self::shutdown), on [`close`](Self::close)
    /// and on any transport failure. Never waits for the send lock.
    pub fn is_live(&self) -> bool {
        !*self.shutdown.borrow()
    }

    /// Shut down, then run the close handshake for at most `close_timeout`
    /// before dropping the connection.
    ///
    /// Waiting for the send lock counts against `close_timeout`, so a stuck
    /// lock holder cannot stall the close.
    pub async fn close(&self, close_timeout: Duration) {
        self.shutdown();
        let handshake = async {
            let mut inner = self.inner.lock().await;
            if inner.state == ChannelState::Closed {
                return None;
            }
            inner.state = ChannelState::Closed;
            Some(inner.transport.close().await)
        };
        match tokio::time::timeout(close_timeout, handshake).await {
            Ok(None) => {}
            Ok(Some(Ok(()))) => debug!(login = %self.login, "session closed"),
            Ok(Some(Err(e))) => warn!(login = %self.login, error = %e, "close handshake failed"),
            Err(_) => warn!(
                login = %self.login,
                timeout = ?close_timeout,
                "close handshake timed out, dropping connection"
            ),
        }
    }
}

// ---------------------------------------------------------------------------
// ChannelGuard
// ---------------------------------------------------------------------------

/// Exclusive access to a session's transport.
pub struct ChannelGuard<'a> {
    read_timeout: Duration,
    closer: &'a watch::Sender<bool>,
    shutdown: watch::Receiver<bool>,
    inner: MutexGuard<'a, ChannelInner>,
}

impl ChannelGuard<'_> {
    /// Current drain state.
    pub fn state(&self) -> ChannelState {
        if *self.shutdown.borrow() {
            ChannelState::Closed
        } else {
            self.inner.state
        }
    }

    fn mark_closed(&mut self) {
        self.inner.state = ChannelState::Closed;
        self.closer.send_replace(true);
    }

    /// Serialize `request` and write it as one text frame.
    ///
    /// # Errors
    ///
    /// [`SdkError::Transport`] if the channel is closed or the write fails;
    /// the channel is then [`Closed`](ChannelState::Closed).
    pub async fn send(&mut self, request: &RelayRequest) -> Result<(), SdkError> {
        if self.inner.state == ChannelState::Closed || *self.shutdown.borrow() {
            return Err(SdkError::Transport("session is closed".into()));
        }
        let frame = serde_json::to_string(request)?;
        trace!(%frame, "sending relay frame");
        if let Err(e) = self.inner.transport.send_text(frame).await {
            self.mark_closed();
            return Err(e);
        }
        Ok(())
    }

    /// Read and demultiplex frames into `sink` until the burst ends.
    ///
    /// The burst ends when a read times out (state `Idle`) or a log-rotation
    /// frame arrives (state `Idle`, no further read). Invalid frames are
    /// reported to the sink and skipped.
    ///
    /// # Errors
    ///
    /// [`SdkError::Transport`] on a hard transport error, a peer close or a
    /// [`shutdown`](SessionChannel::shutdown); the channel is then `Closed`.
    pub async fn receive_all(
        &mut self,
        mut sink: impl FnMut(Inbound),
    ) -> Result<DrainReport, SdkError> {
        if self.inner.state == ChannelState::Closed || *self.shutdown.borrow() {
            self.mark_closed();
            return Err(SdkError::Transport("session is closed".into()));
        }

        self.inner.state = ChannelState::Draining;
        let read_timeout = self.read_timeout;
        let mut frames = 0;

        loop {
            let read = tokio::select! {
                biased;
                _ = self.shutdown.changed() => {
                    self.mark_closed();
                    return Err(SdkError::Transport("session shut down".into()));
                }
                read = tokio::time::timeout(read_timeout, self.inner.transport.next_text()) => read,
            };

            let text = match read {
                Err(_) => {
                    trace!(frames, "read timed out, burst over");
                    self.inner.state = ChannelState::Idle;
                    return Ok(DrainReport {
                        frames,
                        state: ChannelState::Idle,
                    });
                }
                Ok(None) => {
                    self.mark_closed();
                    return Err(SdkError::Transport("relay closed the connection".into()));
                }
                Ok(Some(Err(e))) => {
                    self.mark_closed();
                    return Err(e);
                }
                Ok(Some(Ok(text))) => text,
            };

            frames += 1;
            match render_frame(&text) {
                Ok(Inbound::LogRotation) => {
                    sink(Inbound::LogRotation);
                    self.inner.state = ChannelState::Idle;
                    return Ok(DrainReport {
                        frames,
                        state: ChannelState::Idle,
                    });
                }
                Ok(inbound) => sink(inbound),
                Err(e) => {
                    warn!(error = %e, "skipping relay frame");
                    sink(Inbound::InvalidFrame(text));
                }
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Frame rendering
// ---------------------------------------------------------------------------

/// Demultiplex one inbound frame.
///
/// `message`, `members`, `command` and `from` are lifted out of the object.
/// A `message` object with `rotate_log: true` wins over everything else.
/// Otherwise the rendering is, in order: the member list, the command
/// line, `<from>: <message>`, and any leftover keys as compact JSON.
///
/// # Errors
///
/// [`SdkError::InvalidFrame`] unless `raw` is a non-empty JSON object.
pub fn render_frame(raw: &str) -> Result<Inbound, SdkError> {
    let value: Value =
        serde_json::from_str(raw).map_err(|e| SdkError::InvalidFrame(format!("not JSON: {e}")))?;
    let mut frame = match value {
        Value::Object(map) if !map.is_empty() => map,
        Value::Object(_) => return Err(SdkError::InvalidFrame("empty object".into())),
        other => {
            return Err(SdkError::InvalidFrame(format!(
                "expected an object, got {}",
                kind_of(&other)
            )));
        }
    };

    let message = take(&mut frame, "message");
    let members = take(&mut frame, "members");
    let command = take(&mut frame, "command");
    let from = take(&mut frame, "from");

    if let Some(Value::Object(m)) = &message {
        if m.get("rotate_log") == Some(&Value::Bool(true)) {
            return Ok(Inbound::LogRotation);
        }
    }

    let mut lines = Vec::new();
    if let Some(members) = members {
        let list: String = items(&members)
            .iter()
            .map(|member| format!("\n    {member}"))
            .collect();
        lines.push(format!("members: {list}"));
    }
    if let Some(command) = command {
        lines.push(format!("command: {}", items(&command).join(" ")));
    }
    if let Some(message) = message {
        let sender = from.as_ref().map_or_else(|| "anonymous".to_string(), text_of);
        lines.push(format!("{sender}: {}", text_of(&message)));
    }
    if !frame.is_empty() {
        lines.push(Value::Object(frame).to_string());
    }

    Ok(Inbound::Rendering(lines.join("\n")))
}

/// Remove `key`, treating null, `false`, zero and empty values as absent.
fn take(frame: &mut Map<String, Value>, key: &str) -> Option<Value> {
    frame.remove(key).filter(|v| match v {
        Value::Null | Value::Bool(false) => false,
        Value::Number(n) => n.as_f64() != Some(0.0),
        Value::String(s) => !s.is_empty(),
        Value::Array(a) => !a.is_empty(),
        Value::Object(o) => !o.is_empty(),
        Value::Bool(true) => true,
    })
}

fn items(value: &Value) -> Vec<String> {
    match value {
        Value::Array(values) => values.iter().map(text_of).collect(),
        other => vec![text_of(other)],
    }
}

/// Strings verbatim, everything else as compact JSON.
fn text_of(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn kind_of(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::memory::MemoryRelay;
    use crate::transport::{AuthHeaders, Connector};
    use commandlink_models::MinionId;
    use std::sync::Arc;

    const READ_TIMEOUT: Duration = Duration::from_secs(3);

    async fn open(relay: &MemoryRelay) -> SessionChannel {
        let headers = AuthHeaders {
            authorization: "tok".into(),
            role: "user".into(),
            user: "alice".into(),
        };
        let transport = relay.connect("wss://relay.test/ws", &headers).await.unwrap();
        SessionChannel::new(
            Login::new("alice"),
            "user",
            "wss://relay.test/ws",
            READ_TIMEOUT,
            transport,
        )
    }

    fn collect(out: &mut Vec<Inbound>) -> impl FnMut(Inbound) + '_ {
        move |inbound| out.push(inbound)
    }

    // -- rendering --------------------------------------------------------

    #[test]
    fn members_render_as_indented_list() {
        let rendered = render_frame(r#"{"members":["a","b"]}"#).unwrap();
        assert_eq!(rendered, Inbound::Rendering("members: \n    a\n    b".into()));
    }

    #[test]
    fn command_renders_space_joined() {
        let rendered = render_frame(r#"{"command":["ping","-c","1"]}"#).unwrap();
        assert_eq!(rendered, Inbound::Rendering("command: ping -c 1".into()));
    }

    #[test]
    fn message_with_sender_and_leftovers() {
        let rendered =
            render_frame(r#"{"message":{"text":"hi"},"from":"bob","extra":1}"#).unwrap();
        assert_eq!(
            rendered,
            Inbound::Rendering("bob: {\"text\":\"hi\"}\n{\"extra\":1}".into())
        );
    }

    #[test]
    fn message_without_sender_is_anonymous() {
        let rendered = render_frame(r#"{"message":"pong"}"#).unwrap();
        assert_eq!(rendered, Inbound::Rendering("anonymous: pong".into()));
    }

    #[test]
    fn rendering_order_is_fixed() {
        let rendered =
            render_frame(r#"{"from":"m1","message":"done","command":["ls"],"members":["x"]}"#)
                .unwrap();
        assert_eq!(
            rendered,
            Inbound::Rendering("members: \n    x\ncommand: ls\nm1: done".into())
        );
    }

    #[test]
    fn rotate_log_takes_precedence() {
        let rendered =
            render_frame(r#"{"message":{"rotate_log":true},"members":["a"],"x":1}"#).unwrap();
        assert_eq!(rendered, Inbound::LogRotation);

        let not_rotation = render_frame(r#"{"message":{"rotate_log":false}}"#).unwrap();
        assert_eq!(
            not_rotation,
            Inbound::Rendering("anonymous: {\"rotate_log\":false}".into())
        );
    }

    #[test]
    fn empty_values_are_absent() {
        let rendered = render_frame(r#"{"members":[],"message":"","state":"up"}"#).unwrap();
        assert_eq!(rendered, Inbound::Rendering("{\"state\":\"up\"}".into()));
    }

    #[test]
    fn non_objects_are_invalid() {
        for raw in ["not json", "[]", "{}", "42", "\"text\""] {
            assert!(
                matches!(render_frame(raw), Err(SdkError::InvalidFrame(_))),
                "{raw} should be invalid"
            );
        }
    }

    // -- draining ---------------------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn burst_stops_after_log_rotation() {
        let relay = MemoryRelay::new();
        relay.push(r#"{"members":["a","b"]}"#);
        relay.push(r#"{"command":["ping"]}"#);
        relay.push(r#"{"message":{"rotate_log":true}}"#);
        relay.push(r#"{"message":"never read"}"#);
        let session = open(&relay).await;

        let mut out = Vec::new();
        let report = session.lock().await.receive_all(collect(&mut out)).await.unwrap();

        assert_eq!(
            out,
            vec![
                Inbound::Rendering("members: \n    a\n    b".into()),
                Inbound::Rendering("command: ping".into()),
                Inbound::LogRotation,
            ]
        );
        assert_eq!(report.frames, 3);
        assert_eq!(report.state, ChannelState::Idle);
        assert_eq!(relay.reads(), 3);
        assert_eq!(relay.idle_reads(), 0);
        assert_eq!(relay.pending(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn burst_ends_on_read_timeout() {
        let relay = MemoryRelay::new();
        relay.push(r#"{"message":"pong","from":"m1"}"#);
        let session = open(&relay).await;

        let mut out = Vec::new();
        let report = session.lock().await.receive_all(collect(&mut out)).await.unwrap();

        assert_eq!(out, vec![Inbound::Rendering("m1: pong".into())]);
        assert_eq!(report.state, ChannelState::Idle);
        assert_eq!(relay.idle_reads(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn invalid_frames_are_skipped() {
        let relay = MemoryRelay::new();
        relay.push("garbage");
        relay.push(r#"{"message":"after"}"#);
        let session = open(&relay).await;

        let mut out = Vec::new();
        let report = session.lock().await.receive_all(collect(&mut out)).await.unwrap();

        assert_eq!(
            out,
            vec![
                Inbound::InvalidFrame("garbage".into()),
                Inbound::Rendering("anonymous: after".into()),
            ]
        );
        assert_eq!(report.frames, 2);
    }

    #[tokio::test(start_paused = true)]
    async fn transport_error_closes_channel() {
        let relay = MemoryRelay::new();
        relay.push(r#"{"message":"first"}"#);
        relay.push_error("connection reset");
        let session = open(&relay).await;

        let mut out = Vec::new();
        let mut guard = session.lock().await;
        let err = guard.receive_all(collect(&mut out)).await.unwrap_err();
        assert!(err.is_transport());
        assert_eq!(guard.state(), ChannelState::Closed);
        assert!(!session.is_live());

        let send = guard
            .send(&RelayRequest::List { role: None })
            .await
            .unwrap_err();
        assert!(send.is_transport());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_unblocks_in_flight_read() {
        let relay = MemoryRelay::new();
        let session = Arc::new(open(&relay).await);

        let reader = {
            let session = Arc::clone(&session);
            tokio::spawn(async move {
                let mut guard = session.lock().await;
                guard.receive_all(|_| {}).await
            })
        };
        tokio::task::yield_now().await;
        session.shutdown();

        let result = reader.await.unwrap();
        assert!(matches!(result, Err(SdkError::Transport(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn send_writes_one_json_frame() {
        let relay = MemoryRelay::new();
        let session = open(&relay).await;

        session
            .lock()
            .await
            .send(&RelayRequest::command(&MinionId::new("m1"), ["ping"]))
            .await
            .unwrap();

        assert_eq!(
            relay.sent(),
            vec![r#"{"action":"send","type":"command","to":"m1","message":["ping"]}"#.to_string()]
        );
    }

    #[tokio::test(start_paused = true)]
    async fn close_runs_handshake_once() {
        let relay = MemoryRelay::new();
        let session = open(&relay).await;

        session.close(Duration::from_secs(3)).await;
        assert!(relay.closed());
        assert!(!session.is_live());
        assert_eq!(session.lock().await.state(), ChannelState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn stalled_close_handshake_is_abandoned_after_timeout() {
        let relay = MemoryRelay::new();
        relay.stall_close();
        let session = open(&relay).await;

        let started = tokio::time::Instant::now();
        session.close(Duration::from_secs(2)).await;

        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(2) && waited < Duration::from_secs(3));
        assert!(!relay.closed());
        assert!(!session.is_live());
        assert_eq!(session.lock().await.state(), ChannelState::Closed);
    }

    #[tokio::test(start_paused = true)]
    async fn close_does_not_wait_past_timeout_for_the_send_lock() {
        let relay = MemoryRelay::new();
        let session = open(&relay).await;
        let guard = session.lock().await;

        let started = tokio::time::Instant::now();
        session.close(Duration::from_secs(1)).await;

        let waited = started.elapsed();
        assert!(waited >= Duration::from_secs(1) && waited < Duration::from_secs(2));
        assert!(!relay.closed());
        assert_eq!(guard.state(), ChannelState::Closed);
        assert!(!session.is_live());
    }
}
