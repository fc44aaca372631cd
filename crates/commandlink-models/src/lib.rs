#![deny(missing_docs)]

//! # commandlink models
//!
//! Core data types shared by the commandlink auth, SDK and CLI crates.
//!
//! ## Relay message flow
//!
//! ```text
//! client ──RelayRequest (JSON text frame)──▶ relay ──▶ minion
//! client ◀──────── JSON object frames ────── relay
//!                  { message, members, command, from, … }
//! ```
//!
//! ## Module layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identity`] | Principal identifiers (`Login`, `MinionId`, `EnterpriseId`, `Role`) |
//! | [`record`] | Credential records, field kinds, the minion record payload |
//! | [`envelope`] | Outbound relay requests (`RelayRequest`) |
//! | [`error`] | `ModelError` |

pub mod envelope;
pub mod error;
pub mod identity;
pub mod record;

// Re-export all public types at crate root for convenience.
// Downstream crates can use `commandlink_models::Login` directly.
pub use envelope::*;
pub use error::*;
pub use identity::*;
pub use record::*;
