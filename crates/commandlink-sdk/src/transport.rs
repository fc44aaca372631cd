//! Duplex frame transport.
//!
//! A session only needs three things from the wire: write a text frame,
//! read the next text frame, and close. [`FrameTransport`] captures that,
//! [`Connector`] opens one, and [`WsConnector`] does both over a WebSocket.

use async_trait::async_trait;
use futures::{SinkExt, StreamExt};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, trace};

use crate::error::SdkError;

// ---------------------------------------------------------------------------
// Handshake headers
// ---------------------------------------------------------------------------

/// Headers presented on the connection handshake.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthHeaders {
    /// Signed token, sent verbatim as `Authorization`.
    pub authorization: String,
    /// Role the session is opened for (`AuthRole`).
    pub role: String,
    /// Principal login (`AuthUser`).
    pub user: String,
}

impl AuthHeaders {
    /// Header name / value pairs in the order they are sent.
    pub fn pairs(&self) -> [(&'static str, &str); 3] {
        [
            ("Authorization", self.authorization.as_str()),
            ("AuthRole", self.role.as_str()),
            ("AuthUser", self.user.as_str()),
        ]
    }
}

// ---------------------------------------------------------------------------
// Traits
// ---------------------------------------------------------------------------

/// One open duplex connection carrying text frames.
#[async_trait]
pub trait FrameTransport: Send {
    /// Write one text frame.
    async fn send_text(&mut self, text: String) -> Result<(), SdkError>;

    /// Next text frame, or `None` once the peer has closed the stream.
    ///
    /// Blocks until a frame arrives; callers bound it with a timeout.
    async fn next_text(&mut self) -> Option<Result<String, SdkError>>;

    /// Run the close handshake. Callers bound it with a timeout.
    async fn close(&mut self) -> Result<(), SdkError>;
}

/// Opens [`FrameTransport`]s.
#[async_trait]
pub trait Connector: Send + Sync {
    /// Connect to `endpoint` presenting `headers`.
    async fn connect(
        &self,
        endpoint: &str,
        headers: &AuthHeaders,
    ) -> Result<Box<dyn FrameTransport>, SdkError>;
}

// ---------------------------------------------------------------------------
// WebSocket implementation
// ---------------------------------------------------------------------------

/// Connects over `ws://` / `wss://` with `tokio-tungstenite`.
#[derive(Debug, Clone, Copy, Default)]
pub struct WsConnector;

#[async_trait]
impl Connector for WsConnector {
    async fn connect(
        &self,
        endpoint: &str,
        headers: &AuthHeaders,
    ) -> Result<Box<dyn FrameTransport>, SdkError> {
        let mut request = endpoint
            .into_client_request()
            .map_err(|e| SdkError::Config(format!("invalid relay endpoint {endpoint}: {e}")))?;
        for (name, value) in headers.pairs() {
            let value = HeaderValue::from_str(value)
                .map_err(|e| SdkError::Config(format!("invalid {name} header: {e}")))?;
            request.headers_mut().insert(name, value);
        }

        let (stream, response) = connect_async(request).await?;
        debug!(%endpoint, status = %response.status(), "relay handshake complete");

        Ok(Box::new(WsTransport { stream }))
    }
}

/// A connected WebSocket.
pub struct WsTransport {
    stream: WebSocketStream<MaybeTlsStream<TcpStream>>,
}

#[async_trait]
impl FrameTransport for WsTransport {
    async fn send_text(&mut self, text: String) -> Result<(), SdkError> {
        self.stream.send(Message::text(text)).await?;
        Ok(())
    }

    async fn next_text(&mut self) -> Option<Result<String, SdkError>> {
        loop {
            match self.stream.next().await? {
                Ok(Message::Text(text)) => return Some(Ok(text.as_str().to_owned())),
                Ok(Message::Binary(data)) => {
                    return Some(Ok(String::from_utf8_lossy(&data).into_owned()));
                }
                Ok(Message::Close(frame)) => {
                    debug!(?frame, "relay closed the connection");
                    return None;
                }
                // Pings are answered by tungstenite on the next read/write.
                Ok(Message::Ping(_) | Message::Pong(_) | Message::Frame(_)) => {
                    trace!("control frame");
                }
                Err(e) => return Some(Err(e.into())),
            }
        }
    }

    async fn close(&mut self) -> Result<(), SdkError> {
        match self.stream.close(None).await {
            Ok(()) => {}
            Err(tokio_tungstenite::tungstenite::Error::ConnectionClosed) => return Ok(()),
            Err(e) => return Err(e.into()),
        }
        // Wait for the peer's close frame.
        while let Some(msg) = self.stream.next().await {
            if msg.is_err() {
                break;
            }
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// In-process transport
// ---------------------------------------------------------------------------

/// Scripted in-process transport for exercising sessions without a relay.
#[cfg(any(test, feature = "test-util"))]
pub mod memory {
    use std::collections::VecDeque;
    use std::sync::{Arc, Mutex, PoisonError};

    use async_trait::async_trait;

    use super::{AuthHeaders, Connector, FrameTransport};
    use crate::error::SdkError;

    #[derive(Default)]
    struct Script {
        inbound: VecDeque<Result<String, SdkError>>,
        sent: Vec<String>,
        connects: Vec<(String, AuthHeaders)>,
        reads: usize,
        idle_reads: usize,
        closed: bool,
        refuse: bool,
        stall_connect: bool,
        stall_close: bool,
    }

    /// Relay side of the in-process transport: queue frames, inspect writes.
    #[derive(Clone, Default)]
    pub struct MemoryRelay {
        script: Arc<Mutex<Script>>,
    }

    impl MemoryRelay {
        /// A relay with nothing queued.
        pub fn new() -> Self {
            Self::default()
        }

        fn with<R>(&self, f: impl FnOnce(&mut Script) -> R) -> R {
            let mut script = self.script.lock().unwrap_or_else(PoisonError::into_inner);
            f(&mut script)
        }

        /// Queue one inbound frame.
        pub fn push(&self, frame: impl Into<String>) {
            let frame = frame.into();
            self.with(|s| s.inbound.push_back(Ok(frame)));
        }

        /// Queue a hard transport error.
        pub fn push_error(&self, message: &str) {
            let message = message.to_string();
            self.with(|s| s.inbound.push_back(Err(SdkError::Transport(message))));
        }

        /// Make subsequent connects fail.
        pub fn refuse_connections(&self) {
            self.with(|s| s.refuse = true);
        }

        /// Make subsequent connects hang without completing the handshake.
        pub fn stall_connections(&self) {
            self.with(|s| s.stall_connect = true);
        }

        /// Make the close handshake hang.
        pub fn stall_close(&self) {
            self.with(|s| s.stall_close = true);
        }

        /// Frames written by the client, in order.
        pub fn sent(&self) -> Vec<String> {
            self.with(|s| s.sent.clone())
        }

        /// Endpoints and headers of every connect, in order.
        pub fn connects(&self) -> Vec<(String, AuthHeaders)> {
            self.with(|s| s.connects.clone())
        }

        /// Number of reads that found a frame or an error.
        pub fn reads(&self) -> usize {
            self.with(|s| s.reads)
        }

        /// Number of reads that found nothing queued (each ends a drain).
        pub fn idle_reads(&self) -> usize {
            self.with(|s| s.idle_reads)
        }

        /// Frames still queued.
        pub fn pending(&self) -> usize {
            self.with(|s| s.inbound.len())
        }

        /// Whether the client completed the close handshake.
        pub fn closed(&self) -> bool {
            self.with(|s| s.closed)
        }
    }

    #[async_trait]
    impl Connector for MemoryRelay {
        async fn connect(
            &self,
            endpoint: &str,
            headers: &AuthHeaders,
        ) -> Result<Box<dyn FrameTransport>, SdkError> {
            if self.with(|s| s.refuse) {
                return Err(SdkError::Transport("connection refused".into()));
            }
            if self.with(|s| s.stall_connect) {
                return std::future::pending().await;
            }
            self.with(|s| s.connects.push((endpoint.to_string(), headers.clone())));
            Ok(Box::new(MemoryTransport {
                relay: self.clone(),
            }))
        }
    }

    struct MemoryTransport {
        relay: MemoryRelay,
    }

    #[async_trait]
    impl FrameTransport for MemoryTransport {
        async fn send_text(&mut self, text: String) -> Result<(), SdkError> {
            self.relay.with(|s| s.sent.push(text));
            Ok(())
        }

        async fn next_text(&mut self) -> Option<Result<String, SdkError>> {
            let next = self.relay.with(|s| {
                let next = s.inbound.pop_front();
                if next.is_some() {
                    s.reads += 1;
                } else {
                    s.idle_reads += 1;
                }
                next
            });
            match next {
                Some(frame) => Some(frame),
                None => std::future::pending().await,
            }
        }

        async fn close(&mut self) -> Result<(), SdkError> {
            if self.relay.with(|s| s.stall_close) {
                return std::future::pending().await;
            }
            self.relay.with(|s| s.closed = true);
            Ok(())
        }
    }
}
