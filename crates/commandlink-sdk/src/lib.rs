//! # commandlink SDK
//!
//! Client side of the relay protocol.
//!
//! * [`ConnectionRegistry`]: at most one live [`SessionChannel`] per login.
//! * [`SessionChannel`]: sends [`RelayRequest`] frames and drains inbound
//!   bursts until the relay goes quiet for the read timeout.
//! * [`AuthApiClient`]: one-shot authorized GET/PUT calls against the
//!   authorization API.
//! * [`SdkError`]: unified error type for all SDK operations.
//!
//! # Quick start
//!
//! ```rust,no_run
//! use std::time::Duration;
//!
//! use commandlink_models::{Login, MinionId, RelayRequest};
//! use commandlink_sdk::{AuthHeaders, ConnectionRegistry, Inbound};
//!
//! # async fn run(token: String) -> Result<(), commandlink_sdk::SdkError> {
//! let registry = ConnectionRegistry::websocket(Duration::from_secs(3));
//! let login = Login::new("ops@example.com");
//! let headers = AuthHeaders {
//!     authorization: token,
//!     role: "user".into(),
//!     user: login.to_string(),
//! };
//! let session = registry
//!     .connect(&login, "user", "wss://relay.example.com/ws", &headers, Duration::from_secs(3))
//!     .await?;
//!
//! let mut guard = session.lock().await;
//! guard.send(&RelayRequest::command(&MinionId::new("m-1"), ["ping"])).await?;
//! guard
//!     .receive_all(|inbound| {
//!         if let Inbound::Rendering(text) = inbound {
//!             println!("{text}");
//!         }
//!     })
//!     .await?;
//! # Ok(())
//! # }
//! ```

pub mod channel;
pub mod error;
pub mod http;
pub mod registry;
pub mod transport;

pub use channel::{ChannelGuard, ChannelState, DrainReport, Inbound, SessionChannel, render_frame};
pub use error::SdkError;
pub use http::{ApiResponse, AuthApiClient};
pub use registry::ConnectionRegistry;
pub use transport::{AuthHeaders, Connector, FrameTransport, WsConnector, WsTransport};

pub use commandlink_models::RelayRequest;
