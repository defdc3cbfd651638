// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! Public broker surface: `Start`, `Stop`, `Attach`, `Detach`, `Inspect`,
//! `ShutdownAll`. Owns the registry, port allocator, and the teardown
//! worker that every other component (pipeline EOF, supervisor exit,
//! reaper) funnels into.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio::net::TcpListener;
use tokio::sync::{mpsc, Mutex as AsyncMutex, Notify};
use tracing::{info, warn};

use crate::channel::Channel;
use crate::config::Config;
use crate::error::{BrokerError, Result};
use crate::model::{ChannelKey, ChannelSnapshot, ChannelStatus, SourceDescriptor, StartOutcome};
use crate::pipeline;
use crate::port::PortAllocator;
use crate::reaper::Reaper;
use crate::registry::ChannelRegistry;
use crate::sink::SubscriberSink;
use crate::source_url::build_source_url;
use crate::supervisor::{Supervisor, SupervisorEvent};

const START_PROBE_DELAY: Duration = Duration::from_millis(100);
const EXIT_FLUSH_DELAY: Duration = Duration::from_secs(3);
const EXIT_DRAIN_POLL: Duration = Duration::from_secs(1);
const EXIT_DRAIN_MAX_POLLS: u32 = 30;
const SHUTDOWN_TEARDOWN_TIMEOUT: Duration = Duration::from_secs(5);

pub struct TranscoderBroker {
    config: Config,
    registry: ChannelRegistry,
    ports: PortAllocator,
    teardown_tx: mpsc::Sender<ChannelKey>,
    in_flight_starts: AsyncMutex<HashMap<ChannelKey, Arc<Notify>>>,
    reaper_stop: Arc<Notify>,
}

impl TranscoderBroker {
    /// Builds the broker and spawns its background teardown worker and
    /// reaper. Call [`TranscoderBroker::shutdown_all`] to stop both.
    pub fn new(config: Config) -> Arc<Self> {
        let (teardown_tx, teardown_rx) = mpsc::channel(64);
        let ports = PortAllocator::new(config.ports);

        let broker = Arc::new(Self {
            config,
            registry: ChannelRegistry::new(),
            ports,
            teardown_tx,
            in_flight_starts: AsyncMutex::new(HashMap::new()),
            reaper_stop: Arc::new(Notify::new()),
        });

        spawn_teardown_worker(broker.clone(), teardown_rx);
        Reaper::spawn(broker.clone(), broker.reaper_stop.clone());

        broker
    }

    #[cfg(test)]
    pub fn new_with_ports(config: Config, ports: PortAllocator) -> Arc<Self> {
        let (teardown_tx, teardown_rx) = mpsc::channel(64);
        let broker = Arc::new(Self {
            config,
            registry: ChannelRegistry::new(),
            ports,
            teardown_tx,
            in_flight_starts: AsyncMutex::new(HashMap::new()),
            reaper_stop: Arc::new(Notify::new()),
        });
        spawn_teardown_worker(broker.clone(), teardown_rx);
        Reaper::spawn(broker.clone(), broker.reaper_stop.clone());
        broker
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub(crate) fn registry(&self) -> &ChannelRegistry {
        &self.registry
    }

    pub(crate) fn teardown_sender(&self) -> mpsc::Sender<ChannelKey> {
        self.teardown_tx.clone()
    }

    pub(crate) fn ports_release(&self, port: u16) {
        self.ports.release(port);
    }

    /// Number of loopback ports currently leased. Exposed for diagnostics
    /// and tests asserting the leased-port-set-equals-live-channels invariant.
    pub fn ports_leased_count(&self) -> usize {
        self.ports.leased_count()
    }

    /// `Start(descriptor) -> {channel_key, endpoint_hint, local_port, reused}`.
    pub async fn start(self: &Arc<Self>, descriptor: SourceDescriptor) -> Result<StartOutcome> {
        let key = descriptor.fingerprint();

        if let Some(channel) = self.registry.get(&key) {
            self.registry
                .map_source(descriptor.caller_source_id.clone(), key.clone());
            channel.touch();
            return Ok(StartOutcome {
                channel_key: key.to_string(),
                endpoint_hint: channel.endpoint_hint(&self.config.endpoint),
                local_port: channel.port,
                reused: true,
            });
        }

        loop {
            let wait_on = {
                let mut starting = self.in_flight_starts.lock().await;
                if let Some(notify) = starting.get(&key) {
                    Some(notify.clone())
                } else {
                    starting.insert(key.clone(), Arc::new(Notify::new()));
                    None
                }
            };

            match wait_on {
                Some(notify) => {
                    notify.notified().await;
                    if let Some(channel) = self.registry.get(&key) {
                        self.registry
                            .map_source(descriptor.caller_source_id.clone(), key.clone());
                        channel.touch();
                        return Ok(StartOutcome {
                            channel_key: key.to_string(),
                            endpoint_hint: channel.endpoint_hint(&self.config.endpoint),
                            local_port: channel.port,
                            reused: true,
                        });
                    }
                    // The other creator failed; fall through and retry as creator.
                    continue;
                }
                None => {
                    let result = self.create_channel(&key, &descriptor).await;
                    let mut starting = self.in_flight_starts.lock().await;
                    if let Some(notify) = starting.remove(&key) {
                        notify.notify_waiters();
                    }
                    return result;
                }
            }
        }
    }

    async fn create_channel(
        self: &Arc<Self>,
        key: &ChannelKey,
        descriptor: &SourceDescriptor,
    ) -> Result<StartOutcome> {
        let port = self.ports.lease()?;

        let listener = match TcpListener::bind(("127.0.0.1", port)).await {
            Ok(l) => l,
            Err(e) => {
                self.ports.release(port);
                return Err(BrokerError::ListenerBindFailed(e.to_string()));
            }
        };

        if !self.config.transcoder.binary_path.exists() {
            self.ports.release(port);
            return Err(BrokerError::TranscoderBinaryMissing(
                self.config.transcoder.binary_path.display().to_string(),
            ));
        }

        let source_url = build_source_url(descriptor);
        let spawn_result = Supervisor::spawn(
            &self.config.transcoder.binary_path,
            &source_url,
            descriptor.width,
            descriptor.height,
            port,
            &self.config.transcoder.progress_token,
        );

        let (supervisor, mut events) = match spawn_result {
            Ok(pair) => pair,
            Err(e) => {
                self.ports.release(port);
                drop(listener);
                return Err(e);
            }
        };

        let channel = Arc::new(Channel::new(key.clone(), port, listener, supervisor));
        self.registry.insert(channel.clone());
        self.registry
            .map_source(descriptor.caller_source_id.clone(), key.clone());

        spawn_exit_listener(self.clone(), channel.clone(), events);

        let probe_channel = channel.clone();
        let probe_broker = self.clone();
        tokio::spawn(async move {
            tokio::time::sleep(START_PROBE_DELAY).await;
            if probe_channel.status() == ChannelStatus::Starting {
                probe_channel.set_status(ChannelStatus::Running);
                pipeline::ensure_started(probe_channel.clone(), probe_broker.teardown_sender());
            }
        });

        info!(channel = %key, port, "Channel started");

        Ok(StartOutcome {
            channel_key: key.to_string(),
            endpoint_hint: channel.endpoint_hint(&self.config.endpoint),
            local_port: port,
            reused: false,
        })
    }

    /// `Stop(caller_source_id)`: drops only the source-id mapping. Does not
    /// tear the channel down — that is the reaper's and exit-detection's job.
    pub fn stop(&self, caller_source_id: &str) {
        self.registry.unmap_source(caller_source_id);
    }

    /// `Attach(channel_key, sink) -> subscriber_id`.
    pub fn attach(self: &Arc<Self>, channel_key: &str, sink: Arc<dyn SubscriberSink>) -> Result<String> {
        let channel = self
            .registry
            .get_by_str(channel_key)
            .ok_or_else(|| BrokerError::ChannelNotFound(channel_key.to_string()))?;
        let id = channel.attach(sink);
        pipeline::ensure_started(channel, self.teardown_sender());
        Ok(id)
    }

    /// `Detach(channel_key, subscriber_id)`.
    pub fn detach(&self, channel_key: &str, subscriber_id: &str) {
        if let Some(channel) = self.registry.get_by_str(channel_key) {
            channel.detach(subscriber_id);
        }
    }

    pub fn inspect(&self, channel_key: &str) -> Option<ChannelSnapshot> {
        self.registry.get_by_str(channel_key).map(|c| c.snapshot())
    }

    pub fn inspect_all(&self) -> Vec<ChannelSnapshot> {
        self.registry.all().iter().map(|c| c.snapshot()).collect()
    }

    /// Iterate all channels and force teardown; stop the reaper. Each
    /// channel's teardown is bounded to 5s (spec §5) so one stuck pipeline
    /// cannot block the rest of shutdown.
    pub async fn shutdown_all(&self) {
        self.reaper_stop.notify_waiters();
        let keys: Vec<ChannelKey> = self.registry.all().iter().map(|c| c.key.clone()).collect();
        for key in keys {
            if tokio::time::timeout(SHUTDOWN_TEARDOWN_TIMEOUT, crate::teardown::teardown(self, &key))
                .await
                .is_err()
            {
                warn!(channel = %key, "Teardown timed out during shutdown");
            }
        }
        info!("Broker shut down, registry empty: {}", self.registry.is_empty());
    }
}

fn spawn_exit_listener(
    broker: Arc<TranscoderBroker>,
    channel: Arc<Channel>,
    mut events: mpsc::Receiver<SupervisorEvent>,
) {
    tokio::spawn(async move {
        let Some(SupervisorEvent::Exited {
            exit_code,
            exit_time,
        }) = events.recv().await
        else {
            return;
        };

        {
            let mut info = channel.exit_info.lock();
            info.exit_code = exit_code;
            info.exit_time = Some(exit_time);
            info.last_error = channel.supervisor.last_error();
        }
        // A concurrent broker-forced teardown may already have marked this
        // channel Killed; don't relabel a forced kill as a bare exit.
        if !channel.status().is_terminal() {
            channel.set_status(if exit_code == Some(0) {
                ChannelStatus::ExitedNormally
            } else {
                ChannelStatus::ExitedWithError
            });
        }
        channel.request_stop();

        // Let in-flight bytes reach any still-attached subscribers.
        tokio::time::sleep(EXIT_FLUSH_DELAY).await;

        for _ in 0..EXIT_DRAIN_MAX_POLLS {
            if channel.subscriber_count() == 0 {
                break;
            }
            tokio::time::sleep(EXIT_DRAIN_POLL).await;
        }

        let _ = broker.teardown_sender().send(channel.key.clone()).await;
    });
}

fn spawn_teardown_worker(broker: Arc<TranscoderBroker>, mut rx: mpsc::Receiver<ChannelKey>) {
    tokio::spawn(async move {
        while let Some(key) = rx.recv().await {
            crate::teardown::teardown(&broker, &key).await;
        }
    });
}
