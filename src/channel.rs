// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! The broker's per-stream state: one [`Channel`] per [`ChannelKey`], shared
//! by every subscriber matching that fingerprint.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rand::Rng;
use tokio::net::TcpListener;
use tokio::sync::{Mutex as AsyncMutex, Notify};

use crate::model::{ChannelKey, ChannelSnapshot, ChannelStatus};
use crate::sink::SubscriberSink;
use crate::supervisor::Supervisor;

pub struct Subscriber {
    pub subscriber_id: String,
    pub sink: Arc<dyn SubscriberSink>,
    pub attached_at: Instant,
}

#[derive(Debug, Clone, Default)]
pub struct ExitInfo {
    pub exit_code: Option<i32>,
    pub exit_time: Option<DateTime<Utc>>,
    pub last_error: Option<String>,
}

/// Per-channel state. Always accessed through an `Arc<Channel>` so the
/// fan-out task, the reaper, and the registry can all hold a reference
/// without the registry's coarse lock being held across I/O.
pub struct Channel {
    pub key: ChannelKey,
    pub port: u16,
    pub supervisor: Supervisor,
    pub listener: AsyncMutex<Option<TcpListener>>,

    pub status: Mutex<ChannelStatus>,
    pub exit_info: Mutex<ExitInfo>,
    pub subscribers: Mutex<Vec<Subscriber>>,

    pub producer_connected: AtomicBool,
    pub broadcast_running: AtomicBool,
    pub pipeline_started: AtomicBool,

    pub created_at: Instant,
    pub created_at_wall: DateTime<Utc>,
    pub last_access_at: Mutex<Instant>,

    /// Signalled when the pipeline's read loop should stop.
    pub stop_requested: AtomicBool,
    pub stop_notify: Notify,

    /// Guards the teardown routine so it runs at most once per channel.
    pub torn_down: AtomicBool,
}

impl Channel {
    pub fn new(key: ChannelKey, port: u16, listener: TcpListener, supervisor: Supervisor) -> Self {
        let now = Instant::now();
        Self {
            key,
            port,
            supervisor,
            listener: AsyncMutex::new(Some(listener)),
            status: Mutex::new(ChannelStatus::Starting),
            exit_info: Mutex::new(ExitInfo::default()),
            subscribers: Mutex::new(Vec::new()),
            producer_connected: AtomicBool::new(false),
            broadcast_running: AtomicBool::new(false),
            pipeline_started: AtomicBool::new(false),
            created_at: now,
            created_at_wall: Utc::now(),
            last_access_at: Mutex::new(now),
            stop_requested: AtomicBool::new(false),
            stop_notify: Notify::new(),
            torn_down: AtomicBool::new(false),
        }
    }

    pub fn status(&self) -> ChannelStatus {
        *self.status.lock()
    }

    pub fn set_status(&self, status: ChannelStatus) {
        *self.status.lock() = status;
    }

    pub fn touch(&self) {
        *self.last_access_at.lock() = Instant::now();
    }

    pub fn last_access_at(&self) -> Instant {
        *self.last_access_at.lock()
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().len()
    }

    pub fn attach(&self, sink: Arc<dyn SubscriberSink>) -> String {
        let id = generate_subscriber_id();
        self.subscribers.lock().push(Subscriber {
            subscriber_id: id.clone(),
            sink,
            attached_at: Instant::now(),
        });
        self.touch();
        id
    }

    /// Removes the subscriber from the collection. Does not close its sink;
    /// the caller owns sink closure.
    pub fn detach(&self, subscriber_id: &str) {
        self.subscribers
            .lock()
            .retain(|s| s.subscriber_id != subscriber_id);
        self.touch();
    }

    pub fn request_stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.stop_notify.notify_waiters();
    }

    pub fn is_stop_requested(&self) -> bool {
        self.stop_requested.load(Ordering::SeqCst)
    }

    pub fn snapshot(&self) -> ChannelSnapshot {
        let exit_info = self.exit_info.lock().clone();
        let since_creation = self
            .last_access_at()
            .saturating_duration_since(self.created_at);
        let last_access_wall =
            self.created_at_wall + chrono::Duration::from_std(since_creation).unwrap_or_default();
        ChannelSnapshot {
            key: self.key.to_string(),
            status: self.status(),
            subscriber_count: self.subscriber_count(),
            local_port: self.port,
            created_at: self.created_at_wall,
            last_access_at: last_access_wall,
            exit_code: exit_info.exit_code,
            last_error: exit_info.last_error,
        }
    }

    /// URL-shaped hint the HTTP layer advertises to clients.
    pub fn endpoint_hint(&self, endpoint: &crate::config::EndpointConfig) -> String {
        format!(
            "ws://{host}:{port}{base}/{key}",
            host = endpoint.advertised_host,
            port = endpoint.advertised_port,
            base = endpoint.base_path,
            key = self.key,
        )
    }
}

fn generate_subscriber_id() -> String {
    const HEX: &[u8] = b"0123456789abcdef";
    let mut rng = rand::thread_rng();
    (0..8)
        .map(|_| HEX[rng.gen_range(0..HEX.len())] as char)
        .collect()
}
