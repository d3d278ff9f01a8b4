//! tether-core: bidirectional JSON-RPC engine for persistent device links.
//!
//! A single [`RpcEngine`] owns one connection to a peer (typically an embedded
//! device reachable over a websocket). Frames flow both ways on the same link:
//! outbound calls are correlated with responses by id regardless of arrival
//! order, unsolicited notifications are forwarded to an [`EventSink`], and
//! inbound calls from the peer are answered with a fixed rejection. Peers that
//! require a password get the SHA-256 digest handshake during
//! [`RpcEngine::connect`].
//!
//! ```ignore
//! let engine = Arc::new(RpcEngine::new(|event| println!("{event:?}")));
//! let link = Transport::connect_websocket("ws://192.168.1.20/rpc").await?;
//! engine.connect(link, Some("secret")).await?;
//!
//! let status = engine.call("Sys.GetStatus", None, DEFAULT_CALL_TIMEOUT).await?;
//! ```
//!
//! Transports are feature-gated: `websocket` (default) for real devices,
//! `mem` (default) for in-process peers and tests.

mod auth;
mod engine;
mod error;
mod frame;
mod registry;
mod transport;

pub use auth::{hex_hash, AuthChallenge, Credential, AUTH_USERNAME};
pub use engine::{
    EngineEvent, EventSink, RpcEngine, DEFAULT_CALL_TIMEOUT, STATUS_METHOD,
};
pub use error::{RpcError, TransportError};
pub use frame::{Frame, FrameKind, Params};
pub use transport::Transport;

#[cfg(feature = "mem")]
pub use transport::mem::MemTransport;
#[cfg(feature = "websocket")]
pub use transport::websocket::WebSocketTransport;
