//! # quarry-client
//!
//! Connection manager and session aggregator for the Quarry streaming query
//! protocol.
//!
//! A [`Client`] owns one logical WebSocket channel and any number of
//! in-flight queries:
//!
//! - **Connection manager** ([`client`]): channel lifecycle, pre-ready send
//!   queue and the single `init` flush, routing inbound fragments to
//!   sessions by `locationId`, the error/close asymmetry.
//! - **Session aggregator** ([`session`]): per-fragment state mutation,
//!   mid-flight re-keying on did-you-mean, at-most-once completion.
//! - **Template expansion** ([`template`]): assumption `${...}` templates
//!   rendered into display strings.
//! - **Transport seam** ([`transport`]): `tokio-tungstenite` adapter behind
//!   a trait so tests run against an in-memory channel.
//!
//! ```no_run
//! use quarry_client::{Client, ClientConfig};
//!
//! # async fn run() -> Result<(), quarry_client::ClientError> {
//! let client = Client::new(ClientConfig::new("wss://example.net/api"));
//! let session = client.submit("population of france", &[]);
//! session.wait().await?;
//! for pod in session.snapshot().pods.values() {
//!     println!("{}", pod.title);
//! }
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code)]

pub mod client;
pub mod errors;
pub mod session;
pub mod template;
pub mod transport;

pub use client::{Client, ClientConfig};
pub use errors::{ClientError, Result};
pub use session::{ExpandedAssumption, QueryResult, SessionHandle};
pub use transport::{ChannelEvent, ChannelEventKind, ChannelHandle, Transport, WsTransport};
