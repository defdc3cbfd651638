// This software is provided for non-commercial use only.
// Commercial use is strictly prohibited.
// If you use, modify, or redistribute this software, you must provide proper attribution to the original author.
// (c) 2026 Onur Tuna. All rights reserved.

//! End-to-end broker scenarios.
//!
//! `/bin/sh` stands in for the transcoder binary: it spawns and exits fast,
//! exercising the real supervisor/reaper paths without needing a real
//! transcoder installed. Tests act as the producer themselves by dialing
//! the channel's leased loopback port directly — the pipeline accepts
//! whichever connection arrives first, real transcoder or not.

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tokio::io::AsyncWriteExt;
use tokio::net::TcpStream;

use transcoder_broker::config::{
    ApiConfig, Config, EndpointConfig, PortRangeConfig, ReaperConfig, TranscoderConfig,
};
use transcoder_broker::model::{SourceDescriptor, StreamType};
use transcoder_broker::sink::test_support::RecordingSink;

fn test_config(port_start: u16, reaper: ReaperConfig) -> Config {
    Config {
        transcoder: TranscoderConfig {
            binary_path: PathBuf::from("/bin/sh"),
            progress_token: "frame=".into(),
        },
        endpoint: EndpointConfig::default(),
        ports: PortRangeConfig {
            start: port_start,
            end: port_start + 50,
        },
        reaper,
        api: ApiConfig {
            enabled: false,
            ..ApiConfig::default()
        },
    }
}

fn no_reap() -> ReaperConfig {
    ReaperConfig {
        tick_secs: 3600,
        grace_secs: 3600,
        long_idle_secs: 3600,
        short_idle_secs: 3600,
    }
}

fn descriptor(caller_source_id: &str) -> SourceDescriptor {
    SourceDescriptor {
        caller_source_id: caller_source_id.into(),
        host: "10.0.0.1".into(),
        port: 554,
        channel_no: 1,
        stream_type: StreamType::Main,
        username: "admin".into(),
        password: "pass".into(),
        width: 640,
        height: 480,
        start_time: None,
        end_time: None,
    }
}

async fn connect_as_producer(local_port: u16) -> TcpStream {
    // The pipeline only starts accepting once the channel reaches Running,
    // which lags Start by the broker's short probe delay.
    for _ in 0..20 {
        if let Ok(stream) = TcpStream::connect(("127.0.0.1", local_port)).await {
            return stream;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("producer could not connect to leased port {local_port}");
}

#[tokio::test]
async fn dedup_on_start_reuses_channel_and_port() {
    let broker = transcoder_broker::broker::TranscoderBroker::new(test_config(21200, no_reap()));

    let first = broker.start(descriptor("A")).await.expect("first start");
    assert!(!first.reused);

    let second = broker.start(descriptor("B")).await.expect("second start");
    assert!(second.reused);
    assert_eq!(first.channel_key, second.channel_key);
    assert_eq!(first.local_port, second.local_port);

    assert_eq!(broker.ports_leased_count(), 1);

    broker.shutdown_all().await;
}

#[tokio::test]
async fn attach_and_detach_only_affects_targeted_subscriber() {
    let broker = transcoder_broker::broker::TranscoderBroker::new(test_config(21250, no_reap()));
    let outcome = broker.start(descriptor("A")).await.expect("start");

    let mut producer = connect_as_producer(outcome.local_port).await;

    let s1 = RecordingSink::new();
    let s2 = RecordingSink::new();
    let s3 = RecordingSink::new();
    let id1 = broker
        .attach(&outcome.channel_key, s1.clone() as Arc<dyn transcoder_broker::sink::SubscriberSink>)
        .expect("attach s1");
    let _id2 = broker
        .attach(&outcome.channel_key, s2.clone() as Arc<dyn transcoder_broker::sink::SubscriberSink>)
        .expect("attach s2");
    let _id3 = broker
        .attach(&outcome.channel_key, s3.clone() as Arc<dyn transcoder_broker::sink::SubscriberSink>)
        .expect("attach s3");

    producer.write_all(&[1, 2, 3, 4]).await.expect("write payload 1");
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(s1.received(), vec![vec![1, 2, 3, 4]]);
    assert_eq!(s2.received(), vec![vec![1, 2, 3, 4]]);
    assert_eq!(s3.received(), vec![vec![1, 2, 3, 4]]);

    broker.detach(&outcome.channel_key, &id1);

    producer
        .write_all(&[9, 8, 7, 6, 5])
        .await
        .expect("write payload 2");
    tokio::time::sleep(Duration::from_millis(200)).await;

    assert_eq!(s1.received(), vec![vec![1, 2, 3, 4]]);
    assert_eq!(s2.received(), vec![vec![1, 2, 3, 4], vec![9, 8, 7, 6, 5]]);
    assert_eq!(s3.received(), vec![vec![1, 2, 3, 4], vec![9, 8, 7, 6, 5]]);

    broker.shutdown_all().await;
}

#[tokio::test]
async fn slow_subscriber_does_not_lose_or_reorder_fast_subscribers_payloads() {
    let broker = transcoder_broker::broker::TranscoderBroker::new(test_config(21300, no_reap()));
    let outcome = broker.start(descriptor("A")).await.expect("start");
    let mut producer = connect_as_producer(outcome.local_port).await;

    let fast = RecordingSink::new();
    let slow = RecordingSink::with_delay(Duration::from_millis(200));
    broker
        .attach(&outcome.channel_key, fast.clone() as Arc<dyn transcoder_broker::sink::SubscriberSink>)
        .expect("attach fast");
    broker
        .attach(&outcome.channel_key, slow.clone() as Arc<dyn transcoder_broker::sink::SubscriberSink>)
        .expect("attach slow");

    let payloads: Vec<u8> = (0..10u8).collect();
    for b in &payloads {
        producer.write_all(&[*b]).await.expect("write payload");
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    // Give the slow subscriber time to drain its backlog of barrier waits.
    tokio::time::sleep(Duration::from_secs(3)).await;

    let expected: Vec<Vec<u8>> = payloads.iter().map(|b| vec![*b]).collect();
    assert_eq!(fast.received(), expected);
    assert_eq!(slow.received(), expected);

    broker.shutdown_all().await;
}

#[tokio::test]
async fn process_crash_transitions_to_exited_and_eventually_disappears() {
    // grace=0 so the reaper will also happily collect it once it's terminal;
    // exit detection itself does not depend on the reaper at all.
    let broker = transcoder_broker::broker::TranscoderBroker::new(test_config(
        21350,
        ReaperConfig {
            tick_secs: 3600,
            ..no_reap()
        },
    ));
    let outcome = broker.start(descriptor("A")).await.expect("start");
    let _producer = connect_as_producer(outcome.local_port).await;

    // /bin/sh with no stdin and bogus argv exits almost immediately on its own,
    // which already exercises the crash path without us needing to kill it.
    let mut snapshot = broker.inspect(&outcome.channel_key);
    for _ in 0..100 {
        if let Some(s) = &snapshot {
            if s.status == transcoder_broker::model::ChannelStatus::ExitedWithError
                || s.status == transcoder_broker::model::ChannelStatus::ExitedNormally
            {
                break;
            }
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
        snapshot = broker.inspect(&outcome.channel_key);
    }
    let snapshot = snapshot.expect("channel still present right after exit");
    assert!(snapshot.status.is_terminal());

    assert!(broker.ports_leased_count() >= 1);

    broker.shutdown_all().await;
}

#[tokio::test]
async fn idle_channel_with_no_subscribers_is_reaped() {
    let broker = transcoder_broker::broker::TranscoderBroker::new(test_config(
        21400,
        ReaperConfig {
            tick_secs: 1,
            grace_secs: 0,
            long_idle_secs: 3600,
            short_idle_secs: 1,
        },
    ));
    let outcome = broker.start(descriptor("A")).await.expect("start");

    for _ in 0..100 {
        if broker.inspect(&outcome.channel_key).is_none() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }

    assert!(broker.inspect(&outcome.channel_key).is_none());
    assert_eq!(broker.ports_leased_count(), 0);

    broker.shutdown_all().await;
}

#[tokio::test]
async fn stop_only_drops_the_source_id_mapping() {
    let broker = transcoder_broker::broker::TranscoderBroker::new(test_config(21450, no_reap()));
    let outcome_a = broker.start(descriptor("A")).await.expect("start A");
    let outcome_b = broker.start(descriptor("B")).await.expect("start B");
    assert_eq!(outcome_a.channel_key, outcome_b.channel_key);

    let sink = RecordingSink::new();
    broker
        .attach(&outcome_a.channel_key, sink.clone() as Arc<dyn transcoder_broker::sink::SubscriberSink>)
        .expect("attach");

    broker.stop("A");
    assert!(broker.inspect(&outcome_a.channel_key).is_some());

    let mut producer = connect_as_producer(outcome_a.local_port).await;
    producer.write_all(&[42]).await.expect("write payload");
    tokio::time::sleep(Duration::from_millis(200)).await;
    assert_eq!(sink.received(), vec![vec![42]]);

    broker.stop("B");
    assert!(broker.inspect(&outcome_a.channel_key).is_some());

    broker.shutdown_all().await;
}
