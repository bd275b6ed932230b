use std::sync::Arc;
use std::time::Duration;

use lib_common::core::{
    Dispatcher, LifecycleController, MetricClassSpec, ReadMode, ServerMessage, TopicCatalog, TopicSpec,
};
use project_tests::CountingProducer;
use serde_json::json;
use tokio::sync::mpsc::UnboundedReceiver;

const TOPIC: &str = "disk-io";

fn hub(producer: Arc<CountingProducer>) -> LifecycleController {
    let catalog = TopicCatalog::new().with_topic(TopicSpec::new(
        TOPIC,
        vec![MetricClassSpec::new(
            "disks",
            Duration::from_secs(2),
            Duration::from_secs(1),
            producer,
        )],
    ));
    LifecycleController::new(Arc::new(catalog), Arc::new(Dispatcher::new()))
}

fn drain(rx: &mut UnboundedReceiver<Arc<ServerMessage>>) -> Vec<Arc<ServerMessage>> {
    let mut frames = Vec::new();
    while let Ok(frame) = rx.try_recv() {
        frames.push(frame);
    }
    frames
}

fn call_of(frame: &ServerMessage) -> serde_json::Value {
    match frame {
        ServerMessage::Update { data, .. } => data["disks"]["call"].clone(),
        other => panic!("expected an update, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn no_timers_without_members() {
    let hub = hub(CountingProducer::new());
    let (a, _rx_a) = hub.dispatcher().register();
    let (b, _rx_b) = hub.dispatcher().register();

    assert!(hub.active_timers(TOPIC).is_empty());

    hub.join(a, TOPIC).unwrap();
    hub.join(b, TOPIC).unwrap();
    assert_eq!(hub.active_timers(TOPIC).len(), 1);

    hub.leave(a, TOPIC);
    assert_eq!(hub.member_count(TOPIC), 1);
    assert_eq!(hub.active_timers(TOPIC).len(), 1);

    hub.disconnect(b);
    assert_eq!(hub.member_count(TOPIC), 0);
    assert!(hub.active_timers(TOPIC).is_empty());

    // Nothing polls once the room is gone.
    tokio::time::sleep(Duration::from_secs(10)).await;
    assert!(hub.active_timers(TOPIC).is_empty());
}

#[tokio::test(start_paused = true)]
async fn first_join_is_answered_with_a_forced_read_to_the_joiner_only() {
    let producer = CountingProducer::new();
    let hub = hub(Arc::clone(&producer));
    let (a, mut rx_a) = hub.dispatcher().register();
    let (_b, mut rx_b) = hub.dispatcher().register();

    // A fresh entry that a cached read would happily serve.
    let topic = hub.topic(TOPIC).unwrap();
    hub.cache()
        .read(TOPIC, &topic.classes[0], ReadMode::Cached)
        .await
        .unwrap();
    assert_eq!(producer.calls(), 1);

    let joined = hub.join(a, TOPIC).unwrap();
    assert!(joined.activated);
    assert!(hub.send_snapshot(a, &joined.topic, ReadMode::Forced).await);

    assert_eq!(producer.calls(), 2);
    let frames = drain(&mut rx_a);
    assert_eq!(frames.len(), 1);
    assert_eq!(call_of(&frames[0]), json!(2));
    assert!(drain(&mut rx_b).is_empty());
}

#[tokio::test(start_paused = true)]
async fn cached_reads_share_a_capture_until_the_ttl_expires() {
    let hub = hub(CountingProducer::new());
    let topic = hub.topic(TOPIC).unwrap();
    let class = &topic.classes[0];

    let first = hub.cache().read(TOPIC, class, ReadMode::Cached).await.unwrap();
    tokio::time::advance(Duration::from_millis(500)).await;
    let second = hub.cache().read(TOPIC, class, ReadMode::Cached).await.unwrap();
    assert_eq!(first.captured_at, second.captured_at);
    assert_eq!(first.value, second.value);

    tokio::time::advance(Duration::from_millis(600)).await;
    let third = hub.cache().read(TOPIC, class, ReadMode::Cached).await.unwrap();
    assert!(third.captured_at > first.captured_at);
    assert_ne!(third.value, first.value);
}

#[tokio::test(start_paused = true)]
async fn rejoin_never_sees_data_from_before_the_leave() {
    let producer = CountingProducer::new();
    let hub = hub(Arc::clone(&producer));
    let (a, mut rx_a) = hub.dispatcher().register();

    let joined = hub.join(a, TOPIC).unwrap();
    hub.send_snapshot(a, &joined.topic, ReadMode::Forced).await;
    let before = drain(&mut rx_a);
    assert_eq!(call_of(&before[0]), json!(1));

    hub.leave(a, TOPIC);
    assert!(hub.cache().peek(TOPIC, "disks").is_none());

    // Well inside the old entry's TTL.
    tokio::time::advance(Duration::from_millis(100)).await;
    let joined = hub.join(a, TOPIC).unwrap();
    assert!(joined.activated);
    hub.send_snapshot(a, &joined.topic, ReadMode::Forced).await;

    let after = drain(&mut rx_a);
    assert_eq!(after.len(), 1);
    assert_eq!(call_of(&after[0]), json!(2));
}

#[tokio::test(start_paused = true)]
async fn scheduled_ticks_reach_every_member() {
    let producer = CountingProducer::new();
    let hub = hub(Arc::clone(&producer));
    let (a, mut rx_a) = hub.dispatcher().register();
    let (b, mut rx_b) = hub.dispatcher().register();
    hub.join(a, TOPIC).unwrap();
    hub.join(b, TOPIC).unwrap();

    tokio::time::sleep(Duration::from_millis(2_100)).await;

    let to_a = drain(&mut rx_a);
    let to_b = drain(&mut rx_b);
    assert_eq!(to_a.len(), 1);
    assert_eq!(to_a, to_b);
    assert_eq!(producer.calls(), 1);
}
