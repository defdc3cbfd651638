// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Subscriber sink contract.
//!
//! The broker is opaque to how a subscriber is actually delivered bytes; it
//! only needs `send_binary`, `is_open`, and `close`. The HTTP/WebSocket
//! layer (`crate::api`) supplies `ChannelSink`; tests supply `RecordingSink`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::mpsc;

use crate::error::{BrokerError, Result};

/// Push-only binary-frame consumer attached to a channel.
#[async_trait]
pub trait SubscriberSink: Send + Sync {
    /// Deliver one broadcast payload. An `Err` marks the subscriber dead.
    async fn send_binary(&self, payload: Arc<Vec<u8>>) -> Result<()>;

    /// Liveness probe, consulted before each broadcast dispatch.
    fn is_open(&self) -> bool;

    /// Close the sink. Called by the broker only after the subscriber has
    /// already been removed from its channel.
    fn close(&self);
}

/// Sink backed by a bounded channel, fed to a WebSocket writer task by
/// `crate::api`. Keeps the broadcast loop decoupled from the WebSocket
/// send future, which otherwise does not implement `Sync`.
pub struct ChannelSink {
    tx: mpsc::Sender<Arc<Vec<u8>>>,
    open: AtomicBool,
}

impl ChannelSink {
    pub fn new(capacity: usize) -> (Arc<Self>, mpsc::Receiver<Arc<Vec<u8>>>) {
        let (tx, rx) = mpsc::channel(capacity);
        (
            Arc::new(Self {
                tx,
                open: AtomicBool::new(true),
            }),
            rx,
        )
    }
}

#[async_trait]
impl SubscriberSink for ChannelSink {
    async fn send_binary(&self, payload: Arc<Vec<u8>>) -> Result<()> {
        if !self.is_open() {
            return Err(BrokerError::SubscriberSendFailed("sink closed".into()));
        }
        self.tx
            .try_send(payload)
            .map_err(|e| BrokerError::SubscriberSendFailed(e.to_string()))
    }

    fn is_open(&self) -> bool {
        self.open.load(Ordering::Relaxed) && !self.tx.is_closed()
    }

    fn close(&self) {
        self.open.store(false, Ordering::Relaxed);
    }
}

/// Test-only sink that records every payload it receives, in order.
#[cfg(any(test, feature = "test-support"))]
pub mod test_support {
    use super::*;
    use parking_lot::Mutex;

    pub struct RecordingSink {
        received: Mutex<Vec<Vec<u8>>>,
        open: AtomicBool,
        delay: Option<std::time::Duration>,
    }

    impl RecordingSink {
        pub fn new() -> Arc<Self> {
            Arc::new(Self {
                received: Mutex::new(Vec::new()),
                open: AtomicBool::new(true),
                delay: None,
            })
        }

        /// A sink that sleeps `delay` before acknowledging each payload, to
        /// simulate a slow subscriber.
        pub fn with_delay(delay: std::time::Duration) -> Arc<Self> {
            Arc::new(Self {
                received: Mutex::new(Vec::new()),
                open: AtomicBool::new(true),
                delay: Some(delay),
            })
        }

        pub fn received(&self) -> Vec<Vec<u8>> {
            self.received.lock().clone()
        }
    }

    #[async_trait]
    impl SubscriberSink for RecordingSink {
        async fn send_binary(&self, payload: Arc<Vec<u8>>) -> Result<()> {
            if !self.is_open() {
                return Err(BrokerError::SubscriberSendFailed("sink closed".into()));
            }
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            self.received.lock().push((*payload).clone());
            Ok(())
        }

        fn is_open(&self) -> bool {
            self.open.load(Ordering::Relaxed)
        }

        fn close(&self) {
            self.open.store(false, Ordering::Relaxed);
        }
    }
}
