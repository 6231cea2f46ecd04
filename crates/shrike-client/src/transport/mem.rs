//! In-process transport backed by a pair of mpsc channels.
//!
//! Used by the test suite and by anything embedding client and server in
//! one process. Dropping the last handle on one side closes the peer's
//! inbound stream.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;

use super::{TransportBackend, TransportError};

const CHANNEL_CAPACITY: usize = 64;

#[derive(Clone, Debug)]
pub struct MemChannel {
    inner: Arc<MemInner>,
}

#[derive(Debug)]
struct MemInner {
    tx: mpsc::Sender<Bytes>,
    rx: tokio::sync::Mutex<mpsc::Receiver<Bytes>>,
    closed: AtomicBool,
}

impl MemChannel {
    /// Create a connected pair of channels.
    pub fn pair() -> (Self, Self) {
        let (tx_a, rx_a) = mpsc::channel(CHANNEL_CAPACITY);
        let (tx_b, rx_b) = mpsc::channel(CHANNEL_CAPACITY);

        let a = MemChannel {
            inner: Arc::new(MemInner {
                tx: tx_b,
                rx: tokio::sync::Mutex::new(rx_a),
                closed: AtomicBool::new(false),
            }),
        };

        let b = MemChannel {
            inner: Arc::new(MemInner {
                tx: tx_a,
                rx: tokio::sync::Mutex::new(rx_b),
                closed: AtomicBool::new(false),
            }),
        };

        (a, b)
    }
}

impl TransportBackend for MemChannel {
    async fn send_message(&self, msg: Bytes) -> Result<(), TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        self.inner
            .tx
            .send(msg)
            .await
            .map_err(|_| TransportError::Closed)
    }

    async fn recv_message(&self) -> Result<Bytes, TransportError> {
        if self.is_closed() {
            return Err(TransportError::Closed);
        }

        let msg = {
            let mut rx = self.inner.rx.lock().await;
            rx.recv().await.ok_or(TransportError::Closed)?
        };

        Ok(msg)
    }

    fn close(&self) {
        self.inner.closed.store(true, Ordering::Release);
        // Refuse further peer sends; buffered messages stay readable.
        self.inner.rx.try_lock().map(|mut rx| rx.close()).ok();
    }

    fn is_closed(&self) -> bool {
        self.inner.closed.load(Ordering::Acquire)
    }

    fn window(&self) -> u32 {
        CHANNEL_CAPACITY as u32
    }
}
