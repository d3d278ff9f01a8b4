//! The RPC engine: call façade, route state, and the receive loop.
//!
//! One engine owns one connection at a time. Callers issue [`RpcEngine::call`]
//! from any task; a single spawned receive loop demultiplexes everything the
//! peer sends. Correlation is purely by call id, so responses may arrive in
//! any order relative to the calls that produced them.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use serde_json::Value;

use crate::auth::{AuthChallenge, Credential};
use crate::registry::CallRegistry;
use crate::{Frame, FrameKind, Params, RpcError, Transport, TransportError};

/// Deadline applied to the handshake probes and recommended for callers.
pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_secs(10);

/// Cheap status probe used to trigger and verify the auth handshake.
pub const STATUS_METHOD: &str = "Sys.GetStatus";

static NEXT_CLIENT_TAG: AtomicU64 = AtomicU64::new(1);

/// Events delivered to the engine's sink from the receive loop.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineEvent {
    /// The peer pushed an unsolicited notification.
    Notification { method: String, params: Option<Value> },
    /// The connection is gone and all pending calls have been cancelled.
    Disconnected,
}

/// Receives engine events. Implemented for free by closures.
pub trait EventSink: Send + Sync + 'static {
    fn on_event(&self, event: EngineEvent);
}

impl<F> EventSink for F
where
    F: Fn(EngineEvent) + Send + Sync + 'static,
{
    fn on_event(&self, event: EngineEvent) {
        self(event)
    }
}

pub struct RpcEngine {
    client_tag: String,
    /// Peer tag learned from inbound `src` fields, echoed back as `dst`.
    route: Mutex<Option<String>>,
    calls: CallRegistry,
    credential: Mutex<Option<Credential>>,
    /// Strictly increasing, never reused while the engine lives.
    next_id: AtomicU64,
    conn: Mutex<Option<Transport>>,
    /// Bumped on every connect; ties each receive loop to its connection so
    /// a stale teardown cannot dismantle a successor.
    conn_epoch: AtomicU64,
    sink: Box<dyn EventSink>,
}

impl RpcEngine {
    pub fn new(sink: impl EventSink) -> Self {
        let n = NEXT_CLIENT_TAG.fetch_add(1, Ordering::Relaxed);
        Self::with_client_tag(format!("tether-{n}"), sink)
    }

    pub fn with_client_tag(client_tag: String, sink: impl EventSink) -> Self {
        RpcEngine {
            client_tag,
            route: Mutex::new(None),
            calls: CallRegistry::new(),
            credential: Mutex::new(None),
            next_id: AtomicU64::new(1),
            conn: Mutex::new(None),
            conn_epoch: AtomicU64::new(0),
            sink: Box::new(sink),
        }
    }

    /// The tag stamped into every outbound frame's `src` field.
    pub fn client_tag(&self) -> &str {
        &self.client_tag
    }

    /// Adopt `transport` and spawn the receive loop.
    ///
    /// With a `secret`, the digest handshake runs to completion before this
    /// returns; do not issue calls concurrently with an in-progress connect.
    pub async fn connect(
        self: &Arc<Self>,
        transport: Transport,
        secret: Option<&str>,
    ) -> Result<(), RpcError> {
        let epoch;
        {
            let mut conn = self.conn.lock();
            if conn.as_ref().is_some_and(|t| !t.is_closed()) {
                return Err(RpcError::ConnectFailed("already connected".into()));
            }
            epoch = self.conn_epoch.fetch_add(1, Ordering::Relaxed) + 1;
            *conn = Some(transport.clone());
        }
        tokio::spawn(Arc::clone(self).rx_loop(transport, epoch));
        tracing::debug!(client_tag = %self.client_tag, "connected");

        if let Some(secret) = secret {
            if let Err(err) = self.authenticate(secret).await {
                self.disconnect().await;
                return Err(err);
            }
        }
        Ok(())
    }

    /// Close the connection. Teardown (cancelling pending calls, clearing the
    /// handle, the `Disconnected` event) runs in the receive loop so it
    /// happens exactly once whether we or the peer initiated closure.
    pub async fn disconnect(&self) {
        let transport = self.conn.lock().clone();
        if let Some(transport) = transport {
            transport.close().await;
        }
    }

    pub fn is_connected(&self) -> bool {
        self.conn.lock().as_ref().is_some_and(|t| !t.is_closed())
    }

    /// Install or clear the credential attached to outbound calls.
    pub fn set_credential(&self, credential: Option<Credential>) {
        *self.credential.lock() = credential;
    }

    /// The peer tag learned from inbound traffic, if any yet.
    pub fn peer_tag(&self) -> Option<String> {
        self.route.lock().clone()
    }

    /// Ids of calls still awaiting a response. Diagnostic.
    pub fn pending_ids(&self) -> Vec<u64> {
        self.calls.pending_ids()
    }

    /// Issue a call and await its response, up to `timeout`.
    ///
    /// An `"auth"` key embedded in `params` is hoisted into the frame's auth
    /// slot and overrides the stored credential. On timeout the pending entry
    /// stays registered; a late response resolves into a dropped receiver,
    /// which is a no-op.
    pub async fn call(
        &self,
        method: &str,
        params: Option<Params>,
        timeout: Duration,
    ) -> Result<Value, RpcError> {
        assert!(!method.is_empty(), "method must be non-empty");
        let transport = match &*self.conn.lock() {
            Some(t) if !t.is_closed() => t.clone(),
            _ => return Err(RpcError::NotConnected),
        };

        let mut params = params;
        let auth = match params.as_mut().and_then(|p| p.remove("auth")) {
            Some(auth) => Some(auth),
            None => self.credential.lock().as_ref().map(Credential::to_value),
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let dst = self.route.lock().clone();
        let frame = Frame::request(id, method, &self.client_tag, dst.as_deref(), auth, params);

        let rx = self.calls.register(id);
        transport.send(frame).await?;
        tracing::debug!(id, method, "call sent");

        let frame = match tokio::time::timeout(timeout, rx).await {
            Ok(Ok(frame)) => frame,
            Ok(Err(_)) => return Err(RpcError::ConnectionClosed),
            Err(_) => {
                tracing::warn!(id, method, ?timeout, "call timed out");
                return Err(RpcError::Timeout {
                    method: method.to_owned(),
                    id,
                });
            }
        };

        if let Some(result) = frame.result() {
            return Ok(result.clone());
        }
        if let Some((code, message)) = frame.error() {
            return Err(RpcError::Remote {
                code,
                message: message.to_owned(),
            });
        }
        Err(RpcError::MalformedResponse(format!(
            "response {id} has neither result nor error"
        )))
    }

    /// Status probe, 401 challenge, credential install, verifying probe.
    async fn authenticate(&self, secret: &str) -> Result<(), RpcError> {
        match self.call(STATUS_METHOD, None, DEFAULT_CALL_TIMEOUT).await {
            Ok(_) => return Ok(()),
            Err(RpcError::Remote { code: 401, message }) => {
                let challenge = AuthChallenge::parse(&message)?;
                self.set_credential(Some(Credential::from_challenge(&challenge, secret)));
            }
            Err(err) => return Err(err),
        }
        // A failure here (another 401 included) means the secret is wrong.
        match self.call(STATUS_METHOD, None, DEFAULT_CALL_TIMEOUT).await {
            Ok(_) => Ok(()),
            Err(err) => {
                tracing::warn!(error = %err, "authentication failed");
                Err(err)
            }
        }
    }

    async fn rx_loop(self: Arc<Self>, transport: Transport, epoch: u64) {
        loop {
            let frame = match transport.recv().await {
                Ok(frame) => frame,
                Err(TransportError::Closed) => {
                    tracing::debug!("connection closed");
                    break;
                }
                Err(err) => {
                    tracing::warn!(error = %err, "receive failed, dropping connection");
                    break;
                }
            };
            self.handle_frame(&transport, frame).await;
        }
        self.teardown(&transport, epoch).await;
    }

    async fn handle_frame(&self, transport: &Transport, frame: Frame) {
        if let Some(src) = frame.src() {
            let mut route = self.route.lock();
            match route.as_deref() {
                Some(known) if known != src => {
                    tracing::warn!(known, new = src, "peer tag changed, following new tag");
                    *route = Some(src.to_owned());
                }
                None => *route = Some(src.to_owned()),
                _ => {}
            }
        }

        match frame.kind() {
            FrameKind::Request { id } => {
                tracing::debug!(method = ?frame.method(), "rejecting inbound call");
                let rejection = Frame::rejection(id, &self.client_tag);
                if let Err(err) = transport.send(rejection).await {
                    tracing::warn!(error = %err, "failed to send rejection");
                }
            }
            FrameKind::Notification { method, params } => {
                self.sink
                    .on_event(EngineEvent::Notification { method, params });
            }
            FrameKind::Response { id } => {
                if !self.calls.resolve(id, frame) {
                    tracing::warn!(id, "response for unknown call id, dropping");
                }
            }
            FrameKind::Malformed => {
                tracing::warn!(?frame, "malformed frame, dropping");
            }
        }
    }

    /// Runs exactly once per connection, from the receive loop. A teardown
    /// whose connection has already been replaced only closes its own link:
    /// pending calls and the handle now belong to the successor.
    async fn teardown(&self, transport: &Transport, epoch: u64) {
        let owned = {
            let mut conn = self.conn.lock();
            let owned = self.conn_epoch.load(Ordering::Relaxed) == epoch;
            if owned {
                self.calls.cancel_all();
                *conn = None;
            }
            owned
        };
        if !transport.is_closed() {
            transport.close().await;
        }
        if owned {
            self.sink.on_event(EngineEvent::Disconnected);
        } else {
            tracing::debug!(epoch, "stale teardown, connection already replaced");
        }
    }
}
