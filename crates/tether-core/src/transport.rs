//! Transport backends.
//!
//! A transport carries whole JSON frames in both directions over one
//! persistent link. Backends are feature-gated; the [`Transport`] enum
//! dispatches to whichever are compiled in.

#[cfg(feature = "mem")]
pub mod mem;
#[cfg(feature = "websocket")]
pub mod websocket;

use crate::{Frame, TransportError};

#[cfg(feature = "websocket")]
use crate::RpcError;

/// Backend contract. All methods are cancel-safe from the engine's point of
/// view: the engine serializes `recv` in a single task and `send` under its
/// own connection handle.
pub(crate) trait TransportBackend: Send + Sync + Clone + 'static {
    async fn send(&self, frame: Frame) -> Result<(), TransportError>;
    async fn recv(&self) -> Result<Frame, TransportError>;
    async fn close(&self);
    fn is_closed(&self) -> bool;
}

/// A connected link to a peer. Cheap to clone (backends share an inner).
#[derive(Debug, Clone)]
pub enum Transport {
    #[cfg(feature = "mem")]
    Mem(mem::MemTransport),
    #[cfg(feature = "websocket")]
    WebSocket(websocket::WebSocketTransport),
}

impl Transport {
    /// An in-process pair of linked endpoints, for tests and local peers.
    #[cfg(feature = "mem")]
    pub fn mem_pair() -> (Self, Self) {
        let (a, b) = mem::MemTransport::pair();
        (Transport::Mem(a), Transport::Mem(b))
    }

    /// Open a websocket link to `url`.
    #[cfg(feature = "websocket")]
    pub async fn connect_websocket(url: &str) -> Result<Self, RpcError> {
        Ok(Transport::WebSocket(
            websocket::WebSocketTransport::connect(url).await?,
        ))
    }

    pub async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        match self {
            #[cfg(feature = "mem")]
            Transport::Mem(t) => t.send(frame).await,
            #[cfg(feature = "websocket")]
            Transport::WebSocket(t) => t.send(frame).await,
        }
    }

    pub async fn recv(&self) -> Result<Frame, TransportError> {
        match self {
            #[cfg(feature = "mem")]
            Transport::Mem(t) => t.recv().await,
            #[cfg(feature = "websocket")]
            Transport::WebSocket(t) => t.recv().await,
        }
    }

    pub async fn close(&self) {
        match self {
            #[cfg(feature = "mem")]
            Transport::Mem(t) => t.close().await,
            #[cfg(feature = "websocket")]
            Transport::WebSocket(t) => t.close().await,
        }
    }

    pub fn is_closed(&self) -> bool {
        match self {
            #[cfg(feature = "mem")]
            Transport::Mem(t) => t.is_closed(),
            #[cfg(feature = "websocket")]
            Transport::WebSocket(t) => t.is_closed(),
        }
    }
}
