//! WebSocket transport.
//!
//! Each frame is one JSON object carried as a websocket text message. Ping
//! and pong are handled below us by tungstenite and skipped here; a close
//! frame or the end of the stream surfaces as [`TransportError::Closed`].

use std::fmt;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::{Sink, SinkExt, Stream, StreamExt};
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::Mutex;
use tokio_tungstenite::tungstenite::{Error as WsError, Message};
use tokio_tungstenite::WebSocketStream;

use super::TransportBackend;
use crate::{Frame, RpcError, TransportError};

type WsSink = Box<dyn Sink<Message, Error = WsError> + Send + Unpin>;
type WsSource = Box<dyn Stream<Item = Result<Message, WsError>> + Send + Unpin>;

#[derive(Clone)]
pub struct WebSocketTransport {
    inner: Arc<WsInner>,
}

struct WsInner {
    sink: Mutex<WsSink>,
    source: Mutex<WsSource>,
    closed: AtomicBool,
}

impl fmt::Debug for WebSocketTransport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WebSocketTransport")
            .field("closed", &self.is_closed())
            .finish_non_exhaustive()
    }
}

impl WebSocketTransport {
    /// Wrap an already-established websocket stream.
    pub fn new<S>(ws: WebSocketStream<S>) -> Self
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let (sink, source) = ws.split();
        WebSocketTransport {
            inner: Arc::new(WsInner {
                sink: Mutex::new(Box::new(sink)),
                source: Mutex::new(Box::new(source)),
                closed: AtomicBool::new(false),
            }),
        }
    }

    /// Dial `url` and complete the websocket handshake.
    pub async fn connect(url: &str) -> Result<Self, RpcError> {
        let (ws, _response) = tokio_tungstenite::connect_async(url)
            .await
            .map_err(|err| RpcError::ConnectFailed(format!("error connecting to {url}: {err}")))?;
        tracing::debug!(%url, "websocket connected");
        Ok(Self::new(ws))
    }

    fn mark_closed(&self) {
        self.inner.closed.store(true, Ordering::Release);
    }
}

impl TransportBackend for WebSocketTransport {
    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let text = serde_json::to_string(&frame)
            .map_err(|err| TransportError::Failed(format!("encode frame: {err}")))?;
        tracing::trace!(frame = %text, "send");
        let mut sink = self.inner.sink.lock().await;
        sink.send(Message::Text(text.into()))
            .await
            .map_err(|err| match err {
                WsError::ConnectionClosed | WsError::AlreadyClosed => {
                    self.mark_closed();
                    TransportError::Closed
                }
                other => TransportError::Failed(other.to_string()),
            })
    }

    async fn recv(&self) -> Result<Frame, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        let mut source = self.inner.source.lock().await;
        loop {
            let message = match source.next().await {
                Some(Ok(message)) => message,
                Some(Err(WsError::ConnectionClosed)) | None => {
                    self.mark_closed();
                    return Err(TransportError::Closed);
                }
                Some(Err(err)) => return Err(TransportError::Failed(err.to_string())),
            };
            match message {
                Message::Text(text) => {
                    tracing::trace!(frame = %text, "recv");
                    return serde_json::from_str(text.as_str()).map_err(|err| {
                        TransportError::InvalidMessage(format!("invalid JSON frame: {err}"))
                    });
                }
                Message::Close(_) => {
                    self.mark_closed();
                    return Err(TransportError::Closed);
                }
                Message::Ping(_) | Message::Pong(_) => continue,
                other => {
                    return Err(TransportError::InvalidMessage(format!(
                        "unexpected non-text message: {other:?}"
                    )))
                }
            }
        }
    }

    async fn close(&self) {
        if self.inner.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        let mut sink = self.inner.sink.lock().await;
        // Best-effort goodbye; the peer may already be gone.
        let _ = sink.send(Message::Close(None)).await;
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// Two linked endpoints over an in-memory duplex pipe, with a real
    /// websocket handshake between them.
    async fn pair() -> (WebSocketTransport, WebSocketTransport) {
        let (client_io, server_io) = tokio::io::duplex(64 * 1024);
        let (client, server) = tokio::join!(
            async {
                tokio_tungstenite::client_async("ws://localhost/rpc", client_io)
                    .await
                    .expect("client handshake failed")
                    .0
            },
            async {
                tokio_tungstenite::accept_async(server_io)
                    .await
                    .expect("server handshake failed")
            },
        );
        (WebSocketTransport::new(client), WebSocketTransport::new(server))
    }

    fn frame(id: u64) -> Frame {
        Frame::try_from(json!({"id": id, "method": "Sys.GetStatus", "src": "t"})).unwrap()
    }

    #[tokio::test]
    async fn frames_round_trip_as_text() {
        let (client, server) = pair().await;
        client.send(frame(1)).await.unwrap();
        assert_eq!(server.recv().await.unwrap(), frame(1));
        server.send(frame(2)).await.unwrap();
        assert_eq!(client.recv().await.unwrap(), frame(2));
    }

    #[tokio::test]
    async fn close_frame_surfaces_as_closed() {
        let (client, server) = pair().await;
        client.close().await;
        assert!(matches!(server.recv().await, Err(TransportError::Closed)));
        assert!(matches!(
            client.send(frame(1)).await,
            Err(TransportError::Closed)
        ));
    }

    #[tokio::test]
    async fn non_json_text_is_invalid() {
        let (client, server) = pair().await;
        {
            let mut sink = client.inner.sink.lock().await;
            sink.send(Message::Text("not json".into())).await.unwrap();
        }
        assert!(matches!(
            server.recv().await,
            Err(TransportError::InvalidMessage(_))
        ));
    }

    #[tokio::test]
    async fn binary_message_is_invalid() {
        let (client, server) = pair().await;
        {
            let mut sink = client.inner.sink.lock().await;
            sink.send(Message::Binary(vec![1, 2, 3].into())).await.unwrap();
        }
        assert!(matches!(
            server.recv().await,
            Err(TransportError::InvalidMessage(_))
        ));
    }
}
