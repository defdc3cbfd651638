// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Per-channel fan-out pipeline: accept the one producer connection, read
//! framed payloads, broadcast each to every open subscriber concurrently.
//!
//! A single slow subscriber cannot stall others — every dispatch for a
//! payload runs concurrently and the loop waits for all of them (a
//! "barrier") before reading the next payload, so the slowest sink sets
//! payload latency but the broker never reorders, duplicates, or buffers
//! history for late joiners.

use std::sync::atomic::Ordering;
use std::sync::Arc;

use tokio::io::AsyncReadExt;
use tokio::sync::mpsc;
use tracing::{info, warn};

use crate::channel::Channel;
use crate::model::ChannelKey;

const READ_BUFFER_SIZE: usize = 8 * 1024;

/// Idempotently spawns the pipeline task for `channel` if it hasn't started
/// yet. Safe to call from both the `Start` miss path and `Attach`.
pub fn ensure_started(channel: Arc<Channel>, teardown_tx: mpsc::Sender<ChannelKey>) {
    if channel
        .pipeline_started
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_ok()
    {
        tokio::spawn(run(channel, teardown_tx));
    }
}

async fn run(channel: Arc<Channel>, teardown_tx: mpsc::Sender<ChannelKey>) {
    let listener = {
        let mut guard = channel.listener.lock().await;
        guard.take()
    };
    let Some(listener) = listener else {
        warn!(channel = %channel.key, "Pipeline started with no listener available");
        return;
    };

    let mut stream = tokio::select! {
        biased;
        _ = channel.stop_notify.notified(), if channel.is_stop_requested() => {
            info!(channel = %channel.key, "Channel stopped before producer connected");
            return;
        }
        accepted = listener.accept() => {
            match accepted {
                Ok((stream, addr)) => {
                    info!(channel = %channel.key, peer = %addr, "Producer connected");
                    stream
                }
                Err(e) => {
                    warn!(channel = %channel.key, error = %e, "Producer accept failed");
                    let _ = teardown_tx.send(channel.key.clone()).await;
                    return;
                }
            }
        }
    };

    channel.producer_connected.store(true, Ordering::SeqCst);
    channel.broadcast_running.store(true, Ordering::SeqCst);

    let mut buf = vec![0u8; READ_BUFFER_SIZE];
    loop {
        if channel.is_stop_requested() {
            break;
        }

        let read = tokio::select! {
            biased;
            _ = channel.stop_notify.notified(), if channel.is_stop_requested() => break,
            read = stream.read(&mut buf) => read,
        };

        match read {
            Ok(0) => {
                info!(channel = %channel.key, "Producer closed connection (EOF)");
                break;
            }
            Ok(n) => {
                channel.touch();
                let payload = Arc::new(buf[..n].to_vec());
                broadcast(&channel, payload).await;
            }
            Err(e) => {
                warn!(channel = %channel.key, error = %e, "Producer read error");
                break;
            }
        }
    }

    channel.broadcast_running.store(false, Ordering::SeqCst);
    drop(stream);
    let _ = teardown_tx.send(channel.key.clone()).await;
}

/// Dispatch one payload to every currently-open subscriber concurrently,
/// waiting for all dispatches before returning. Subscribers whose send
/// fails are swept out under the channel lock once the barrier completes.
async fn broadcast(channel: &Channel, payload: Arc<Vec<u8>>) {
    let targets: Vec<_> = {
        let subs = channel.subscribers.lock();
        subs.iter()
            .filter(|s| s.sink.is_open())
            .map(|s| (s.subscriber_id.clone(), s.sink.clone()))
            .collect()
    };

    if targets.is_empty() {
        return;
    }

    let mut handles = Vec::with_capacity(targets.len());
    for (subscriber_id, sink) in targets {
        let payload = payload.clone();
        handles.push(tokio::spawn(async move {
            let ok = sink.send_binary(payload).await.is_ok();
            (subscriber_id, ok)
        }));
    }

    let mut dead = Vec::new();
    for handle in handles {
        match handle.await {
            Ok((_, true)) => {}
            Ok((subscriber_id, false)) => dead.push(subscriber_id),
            Err(e) => warn!(error = %e, "Subscriber dispatch task panicked"),
        }
    }

    if !dead.is_empty() {
        let mut subs = channel.subscribers.lock();
        subs.retain(|s| !dead.contains(&s.subscriber_id));
    }
}
