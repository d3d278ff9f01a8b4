//! In-process paired transport.
//!
//! Two endpoints joined by a pair of bounded channels. Used by the test suite
//! to stand in for a device on the other end of the link.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex, Notify};

use super::TransportBackend;
use crate::{Frame, TransportError};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Debug, Clone)]
pub struct MemTransport {
    inner: Arc<MemInner>,
}

#[derive(Debug)]
struct MemInner {
    tx: mpsc::Sender<Frame>,
    rx: Mutex<mpsc::Receiver<Frame>>,
    closed: AtomicBool,
    // Wakes a recv() blocked on the channel when this side closes locally.
    shutdown: Notify,
}

impl MemTransport {
    /// Two linked endpoints; frames sent on one arrive on the other.
    pub fn pair() -> (Self, Self) {
        let (a_tx, b_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let (b_tx, a_rx) = mpsc::channel(CHANNEL_CAPACITY);
        let endpoint = |tx, rx| MemTransport {
            inner: Arc::new(MemInner {
                tx,
                rx: Mutex::new(rx),
                closed: AtomicBool::new(false),
                shutdown: Notify::new(),
            }),
        };
        (endpoint(a_tx, a_rx), endpoint(b_tx, b_rx))
    }
}

impl TransportBackend for MemTransport {
    async fn send(&self, frame: Frame) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        self.inner
            .tx
            .send(frame)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn recv(&self) -> Result<Frame, TransportError> {
        let mut rx = self.inner.rx.lock().await;
        // Register for the shutdown signal before re-checking the flag:
        // notify_waiters() stores no permit, so a close that lands between
        // the check and the select would otherwise be lost.
        let shutdown = self.inner.shutdown.notified();
        tokio::pin!(shutdown);
        shutdown.as_mut().enable();
        if self.is_closed() {
            return Err(TransportError::Closed);
        }
        tokio::select! {
            frame = rx.recv() => frame.ok_or(TransportError::Closed),
            _ = &mut shutdown => Err(TransportError::Closed),
        }
    }

    async fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.shutdown.notify_waiters();
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn frame(id: u64) -> Frame {
        Frame::try_from(json!({"id": id, "result": {}})).unwrap()
    }

    #[tokio::test]
    async fn frames_cross_the_pair() {
        let (a, b) = MemTransport::pair();
        a.send(frame(1)).await.unwrap();
        assert_eq!(b.recv().await.unwrap(), frame(1));
        b.send(frame(2)).await.unwrap();
        assert_eq!(a.recv().await.unwrap(), frame(2));
    }

    #[tokio::test]
    async fn local_close_wakes_blocked_recv() {
        let (a, _b) = MemTransport::pair();
        let waiter = {
            let a = a.clone();
            tokio::spawn(async move { a.recv().await })
        };
        tokio::task::yield_now().await;
        a.close().await;
        assert!(matches!(
            waiter.await.unwrap(),
            Err(TransportError::Closed)
        ));
        assert!(a.is_closed());
    }

    #[tokio::test]
    async fn close_wakes_recv_parked_on_the_lock() {
        let (a, _b) = MemTransport::pair();
        // First waiter parks inside the select, second parks on the rx lock
        // and only registers its shutdown waiter after close() has run.
        let first = {
            let a = a.clone();
            tokio::spawn(async move { a.recv().await })
        };
        let second = {
            let a = a.clone();
            tokio::spawn(async move { a.recv().await })
        };
        tokio::time::sleep(std::time::Duration::from_millis(10)).await;
        a.close().await;
        for waiter in [first, second] {
            let result =
                tokio::time::timeout(std::time::Duration::from_millis(200), waiter)
                    .await
                    .expect("recv did not observe close");
            assert!(matches!(result.unwrap(), Err(TransportError::Closed)));
        }
    }

    #[tokio::test]
    async fn peer_drop_closes_recv() {
        let (a, b) = MemTransport::pair();
        drop(b);
        assert!(matches!(a.recv().await, Err(TransportError::Closed)));
    }

    #[tokio::test]
    async fn send_after_close_fails() {
        let (a, _b) = MemTransport::pair();
        a.close().await;
        assert!(matches!(
            a.send(frame(1)).await,
            Err(TransportError::Closed)
        ));
    }
}
