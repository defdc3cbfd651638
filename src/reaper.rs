// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Periodic garbage collector over idle or dead channels (spec.md §4.6).
//!
//! Snapshots channel state under the registry's lock, decides candidates,
//! then hands them to the shared teardown worker outside any lock.

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info};

use crate::broker::TranscoderBroker;
use crate::config::ReaperConfig;
use crate::model::ChannelKey;

pub struct Reaper;

impl Reaper {
    pub fn spawn(broker: Arc<TranscoderBroker>, stop: Arc<tokio::sync::Notify>) {
        tokio::spawn(async move {
            Self::run(broker, stop).await;
        });
    }

    async fn run(broker: Arc<TranscoderBroker>, stop: Arc<tokio::sync::Notify>) {
        let cfg = broker.config().reaper;
        let mut interval = tokio::time::interval(Duration::from_secs(cfg.tick_secs));
        interval.tick().await; // first tick fires immediately; skip it

        loop {
            tokio::select! {
                _ = stop.notified() => {
                    info!("Reaper stopped");
                    break;
                }
                _ = interval.tick() => {
                    Self::tick(&broker, cfg).await;
                }
            }
        }
    }

    async fn tick(broker: &Arc<TranscoderBroker>, cfg: ReaperConfig) {
        let now = Instant::now();
        let grace = Duration::from_secs(cfg.grace_secs);
        let long_idle = Duration::from_secs(cfg.long_idle_secs);
        let short_idle = Duration::from_secs(cfg.short_idle_secs);

        let mut candidates: Vec<ChannelKey> = Vec::new();

        for channel in broker.registry().all() {
            if now.saturating_duration_since(channel.created_at) < grace {
                continue;
            }

            if channel.status().is_terminal() {
                debug!(channel = %channel.key, "Reaper: dead producer");
                candidates.push(channel.key.clone());
                continue;
            }

            if channel.subscriber_count() == 0 {
                let idle_for = now.saturating_duration_since(channel.last_access_at());
                if idle_for > long_idle {
                    debug!(channel = %channel.key, ?idle_for, "Reaper: long idle");
                    candidates.push(channel.key.clone());
                } else if idle_for > short_idle {
                    debug!(channel = %channel.key, ?idle_for, "Reaper: short idle, live process");
                    candidates.push(channel.key.clone());
                }
            }
        }

        for key in candidates {
            let _ = broker.teardown_sender().send(key).await;
        }
    }
}
