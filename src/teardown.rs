// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! The idempotent teardown routine. Every path that decides a channel
//! should go away — pipeline EOF, supervisor exit, the reaper,
//! `ShutdownAll` — funnels through this single function so the release
//! order (stop pipeline, kill process, close listener, release port,
//! drop registry entry) is never duplicated or raced.

use std::sync::atomic::Ordering;

use tracing::info;

use crate::broker::TranscoderBroker;
use crate::model::{ChannelKey, ChannelStatus};

pub async fn teardown(broker: &TranscoderBroker, key: &ChannelKey) {
    let Some(channel) = broker.registry().get(key) else {
        return;
    };

    if channel
        .torn_down
        .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
        .is_err()
    {
        return;
    }

    channel.request_stop();

    // `terminate` reports whether it actually signalled a still-running
    // process; when it did, this teardown is the broker forcing the
    // channel closed, not the transcoder exiting on its own.
    if channel.supervisor.terminate().await {
        channel.set_status(ChannelStatus::Killed);
    }

    {
        let mut guard = channel.listener.lock().await;
        if guard.take().is_some() {
            info!(channel = %key, "Producer listener closed");
        }
    }

    broker.ports_release(channel.port);

    let subscribers = channel.subscribers.lock().drain(..).collect::<Vec<_>>();
    for subscriber in subscribers {
        subscriber.sink.close();
    }

    broker.registry().remove(key);

    info!(channel = %key, port = channel.port, "Channel torn down");
}
