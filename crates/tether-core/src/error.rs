//! Error types for the engine and its transports.

use core::fmt;

/// Errors surfaced by a transport backend.
#[derive(Debug)]
pub enum TransportError {
    /// The link is closed (locally or by the peer).
    Closed,
    /// The link failed mid-operation (I/O error, encode failure).
    Failed(String),
    /// An inbound message could not be decoded as a JSON frame.
    InvalidMessage(String),
}

impl fmt::Display for TransportError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportError::Closed => write!(f, "transport closed"),
            TransportError::Failed(detail) => write!(f, "transport failed: {detail}"),
            TransportError::InvalidMessage(detail) => write!(f, "invalid message: {detail}"),
        }
    }
}

impl std::error::Error for TransportError {}

/// Errors surfaced by the RPC engine.
#[derive(Debug)]
pub enum RpcError {
    /// A call was issued with no open connection.
    NotConnected,
    /// Establishing the connection failed.
    ConnectFailed(String),
    /// The connection closed while an operation was in flight.
    ConnectionClosed,
    /// The peer did not answer within the caller's deadline.
    Timeout { method: String, id: u64 },
    /// The peer answered with an error payload.
    Remote { code: i64, message: String },
    /// The peer's response carried neither a result nor a usable error.
    MalformedResponse(String),
    /// A transport-level failure that is not a plain closure.
    Transport(TransportError),
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RpcError::NotConnected => write!(f, "not connected"),
            RpcError::ConnectFailed(detail) => write!(f, "connect failed: {detail}"),
            RpcError::ConnectionClosed => write!(f, "connection closed"),
            RpcError::Timeout { method, id } => {
                write!(f, "call {method} (id {id}) timed out")
            }
            RpcError::Remote { code, message } => {
                write!(f, "remote error {code}: {message}")
            }
            RpcError::MalformedResponse(detail) => {
                write!(f, "malformed response: {detail}")
            }
            RpcError::Transport(err) => write!(f, "transport error: {err}"),
        }
    }
}

impl std::error::Error for RpcError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            RpcError::Transport(err) => Some(err),
            _ => None,
        }
    }
}

impl From<TransportError> for RpcError {
    fn from(err: TransportError) -> Self {
        match err {
            // A closure observed mid-call is a closed connection to the caller.
            TransportError::Closed => RpcError::ConnectionClosed,
            other => RpcError::Transport(other),
        }
    }
}
