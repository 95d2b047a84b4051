//! Unit tests for sse-relay

use sse_relay::{
    async_trait, decode_resume, encode_resume, BroadcastHub, Error, Event, EventHistory,
    MemoryHistory, Message, RedirectResolver, Relay, ResumePoint, Result, Subscriber,
    DEFAULT_EVENT_TYPE,
};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tokio_stream::StreamExt;

const WAIT: Duration = Duration::from_secs(1);
const IDLE: Duration = Duration::from_millis(50);

async fn next_event(stream: &mut sse_relay::EventStream) -> Event {
    timeout(WAIT, stream.next())
        .await
        .expect("timed out waiting for event")
        .expect("stream ended unexpectedly")
}

// ============== Message Tests ==============

#[test]
fn test_message_text_uses_default_type() {
    let (event_type, data) = Message::from("hi").into_parts();
    assert_eq!(event_type, DEFAULT_EVENT_TYPE);
    assert_eq!(data, "hi");
}

#[test]
fn test_message_typed() {
    let (event_type, data) = Message::typed("update", "42").into_parts();
    assert_eq!(event_type, "update");
    assert_eq!(data, "42");
}

#[test]
fn test_message_from_json_single_entry_object() {
    let msg = Message::from_json(&serde_json::json!({"notice": "x"}));
    assert_eq!(msg, Message::typed("notice", "x"));
}

#[test]
fn test_message_from_json_single_entry_structured_value() {
    let msg = Message::from_json(&serde_json::json!({"update": {"count": 1}}));
    assert_eq!(msg, Message::typed("update", r#"{"count":1}"#));
}

#[test]
fn test_message_from_json_string() {
    let msg = Message::from_json(&serde_json::json!("hi"));
    assert_eq!(msg, Message::Text("hi".to_string()));
}

#[test]
fn test_message_from_json_multi_entry_object_stays_plain() {
    let msg = Message::from_json(&serde_json::json!({"a": 1, "b": 2}));
    assert_eq!(msg, Message::Text(r#"{"a":1,"b":2}"#.to_string()));
}

#[test]
fn test_event_wire_id() {
    let event = Event::new("comment", 7, "message", "x");
    assert_eq!(event.wire_id(), "comment:7");
}

// ============== Resume Codec Tests ==============

#[test]
fn test_encode_resume_aligned_with_channel_order() {
    let channels = vec!["comment".to_string(), "post".to_string()];
    let resume = ResumePoint::from([("comment".to_string(), 3)]);
    assert_eq!(encode_resume(&channels, &resume), "3,0");
}

#[test]
fn test_decode_resume_comma_joined() {
    let channels = vec!["comment".to_string(), "post".to_string()];
    let resume = decode_resume(&channels, "3,5");
    assert_eq!(resume.get("comment"), Some(&3));
    assert_eq!(resume.get("post"), Some(&5));
}

#[test]
fn test_decode_resume_skips_zero_ids() {
    let channels = vec!["comment".to_string(), "post".to_string()];
    let resume = decode_resume(&channels, "3,0");
    assert_eq!(resume.get("comment"), Some(&3));
    assert!(!resume.contains_key("post"));
}

#[test]
fn test_decode_resume_wire_id_form() {
    let channels = vec!["comment".to_string(), "post".to_string()];
    let resume = decode_resume(&channels, "comment:3");
    assert_eq!(resume.get("comment"), Some(&3));
    assert_eq!(resume.len(), 1);
}

#[test]
fn test_decode_resume_garbage_is_empty() {
    let channels = vec!["comment".to_string()];
    assert!(decode_resume(&channels, "not-a-number").is_empty());
}

// ============== MemoryHistory Tests ==============

#[tokio::test]
async fn test_history_ids_start_at_one_and_increase() {
    let history = MemoryHistory::default();

    for expected in 1..=5u64 {
        let id = history.append("ch1", "message", "m").await.unwrap();
        assert_eq!(id, expected);
    }

    let events = history.range("ch1", 0).await.unwrap();
    let ids: Vec<u64> = events.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![1, 2, 3, 4, 5]);
}

#[tokio::test]
async fn test_history_range_after_id() {
    let history = MemoryHistory::default();
    for i in 1..=4 {
        history
            .append("ch1", "message", &format!("m{}", i))
            .await
            .unwrap();
    }

    let events = history.range("ch1", 2).await.unwrap();
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].id, 3);
    assert_eq!(events[1].id, 4);
    assert_eq!(events[1].data, "m4");

    assert!(history.range("ch1", 4).await.unwrap().is_empty());
    assert!(history.range("missing", 0).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_history_evicts_oldest_past_cap() {
    let history = MemoryHistory::new(3);
    for i in 1..=5 {
        history
            .append("ch1", "message", &format!("m{}", i))
            .await
            .unwrap();
    }

    let events = history.range("ch1", 0).await.unwrap();
    let ids: Vec<u64> = events.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![3, 4, 5]);
    assert_eq!(history.latest("ch1").await.unwrap(), 5);
}

#[tokio::test]
async fn test_history_channels_sequence_independently() {
    let history = MemoryHistory::default();
    assert_eq!(history.append("a", "message", "x").await.unwrap(), 1);
    assert_eq!(history.append("a", "message", "y").await.unwrap(), 2);
    assert_eq!(history.append("b", "message", "z").await.unwrap(), 1);

    assert_eq!(history.latest("a").await.unwrap(), 2);
    assert_eq!(history.latest("b").await.unwrap(), 1);
    assert_eq!(history.latest("never").await.unwrap(), 0);
}

// ============== BroadcastHub Tests ==============

#[tokio::test]
async fn test_hub_register_is_idempotent() {
    let hub = BroadcastHub::new();
    let (sub, _rx) = Subscriber::new();

    hub.register("ch1", &sub);
    hub.register("ch1", &sub);
    assert_eq!(hub.channel_subscriber_count("ch1"), 1);

    hub.unregister("ch1", &sub.id);
    hub.unregister("ch1", &sub.id);
    assert_eq!(hub.channel_subscriber_count("ch1"), 0);
}

#[tokio::test]
async fn test_hub_delivers_only_to_event_channel() {
    let hub = BroadcastHub::new();
    let (sub1, mut rx1) = Subscriber::new();
    let (sub2, mut rx2) = Subscriber::new();
    hub.register("ch1", &sub1);
    hub.register("ch2", &sub2);

    let delivered = hub.deliver(&Event::new("ch1", 1, "message", "hello"));
    assert_eq!(delivered, 1);
    assert_eq!(rx1.try_recv().unwrap().data, "hello");
    assert!(rx2.try_recv().is_err());
}

#[tokio::test]
async fn test_hub_drops_slow_subscriber_without_affecting_others() {
    let hub = BroadcastHub::new();
    let (fast, mut fast_rx) = Subscriber::new();
    let (slow, _slow_rx) = Subscriber::new(); // never drained
    hub.register("ch1", &fast);
    hub.register("ch1", &slow);

    // the slow queue fills up and the subscription is dropped; the fast
    // one keeps receiving every event
    for i in 1..=150u64 {
        hub.deliver(&Event::new("ch1", i, "message", "m"));
        assert_eq!(fast_rx.recv().await.unwrap().id, i);
    }

    assert_eq!(hub.channel_subscriber_count("ch1"), 1);
    assert!(!slow.is_active());
    assert!(fast.is_active());
}

#[tokio::test]
async fn test_hub_sweep_removes_closed_subscribers() {
    let hub = BroadcastHub::new();
    let (sub, rx) = Subscriber::new();
    hub.register("ch1", &sub);
    assert_eq!(hub.subscriber_count(), 1);

    drop(rx);
    assert_eq!(hub.sweep_closed(), 1);
    assert_eq!(hub.subscriber_count(), 0);
}

// ============== Test Doubles ==============

/// Fails the first `failures` appends, then behaves like memory history
#[derive(Clone)]
struct FlakyHistory {
    inner: MemoryHistory,
    failures: Arc<AtomicU32>,
}

impl FlakyHistory {
    fn failing(failures: u32) -> Self {
        Self {
            inner: MemoryHistory::default(),
            failures: Arc::new(AtomicU32::new(failures)),
        }
    }
}

#[async_trait]
impl EventHistory for FlakyHistory {
    async fn append(&self, channel: &str, event_type: &str, data: &str) -> Result<u64> {
        if self.failures.load(Ordering::SeqCst) > 0 {
            self.failures.fetch_sub(1, Ordering::SeqCst);
            return Err(Error::StoreUnavailable("injected failure".to_string()));
        }
        self.inner.append(channel, event_type, data).await
    }

    async fn range(&self, channel: &str, since: u64) -> Result<Vec<Event>> {
        self.inner.range(channel, since).await
    }

    async fn latest(&self, channel: &str) -> Result<u64> {
        self.inner.latest(channel).await
    }

    fn name(&self) -> &'static str {
        "flaky"
    }
}

/// Appends fine but every ranged read fails
#[derive(Clone)]
struct BrokenReads {
    inner: MemoryHistory,
}

#[async_trait]
impl EventHistory for BrokenReads {
    async fn append(&self, channel: &str, event_type: &str, data: &str) -> Result<u64> {
        self.inner.append(channel, event_type, data).await
    }

    async fn range(&self, _channel: &str, _since: u64) -> Result<Vec<Event>> {
        Err(Error::StoreUnavailable("read path down".to_string()))
    }

    async fn latest(&self, channel: &str) -> Result<u64> {
        self.inner.latest(channel).await
    }

    fn name(&self) -> &'static str {
        "broken-reads"
    }
}

/// Stalls appends on one channel to expose cross-channel contention
#[derive(Clone)]
struct StallingHistory {
    inner: MemoryHistory,
    stalled_channel: &'static str,
}

#[async_trait]
impl EventHistory for StallingHistory {
    async fn append(&self, channel: &str, event_type: &str, data: &str) -> Result<u64> {
        if channel == self.stalled_channel {
            tokio::time::sleep(Duration::from_millis(300)).await;
        }
        self.inner.append(channel, event_type, data).await
    }

    async fn range(&self, channel: &str, since: u64) -> Result<Vec<Event>> {
        self.inner.range(channel, since).await
    }

    async fn latest(&self, channel: &str) -> Result<u64> {
        self.inner.latest(channel).await
    }

    fn name(&self) -> &'static str {
        "stalling"
    }
}

// ============== Publisher Tests ==============

#[tokio::test]
async fn test_publish_assigns_sequence_ids() {
    let relay = Relay::new(MemoryHistory::default());

    let first = relay.publish("global", "a").await.unwrap();
    let second = relay.publish("global", "b").await.unwrap();
    assert_eq!(first.id, 1);
    assert_eq!(second.id, 2);
    assert_eq!(first.event_type, DEFAULT_EVENT_TYPE);
}

#[tokio::test]
async fn test_publish_normalizes_single_entry_mapping() {
    let relay = Relay::new(MemoryHistory::default());

    let message = Message::from_json(&serde_json::json!({"notice": "x"}));
    let event = relay.publish("global", message).await.unwrap();
    assert_eq!(event.event_type, "notice");
    assert_eq!(event.data, "x");

    let event = relay.publish("global", "hi").await.unwrap();
    assert_eq!(event.event_type, "message");
    assert_eq!(event.data, "hi");
}

#[tokio::test]
async fn test_publish_rejects_reserved_channel() {
    let relay = Relay::new(MemoryHistory::default());

    for reserved in ["polling", "lastEventId"] {
        let err = relay.publish(reserved, "x").await.unwrap_err();
        assert!(matches!(err, Error::ReservedChannelName(_)));
    }
    // nothing was stored
    assert_eq!(relay.history().latest("polling").await.unwrap(), 0);
}

#[tokio::test]
async fn test_publish_retries_transient_store_failures() {
    let relay = Relay::new(FlakyHistory::failing(2));

    let event = relay.publish("global", "x").await.unwrap();
    assert_eq!(event.id, 1);
}

#[tokio::test]
async fn test_publish_surfaces_persistent_store_failure() {
    let relay = Relay::new(FlakyHistory::failing(10));

    let err = relay.publish("global", "x").await.unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable(_)));
}

#[tokio::test]
async fn test_publishes_to_different_channels_do_not_block_each_other() {
    let relay = Relay::new(StallingHistory {
        inner: MemoryHistory::default(),
        stalled_channel: "slow",
    });

    let slow_relay = relay.clone();
    let slow = tokio::spawn(async move { slow_relay.publish("slow", "s").await });
    tokio::time::sleep(Duration::from_millis(20)).await;

    // while the slow channel's append is in flight, another channel
    // publishes within a bounded time
    let fast = timeout(Duration::from_millis(100), relay.publish("fast", "f")).await;
    assert!(fast.expect("fast channel was blocked by slow channel").is_ok());

    assert!(slow.await.unwrap().is_ok());
}

#[tokio::test]
async fn test_same_channel_publishes_are_linearized() {
    let relay = Relay::new(MemoryHistory::default());
    let channels = vec!["orders".to_string()];
    let mut stream = relay.subscribe(&channels, None).await.unwrap();

    let mut tasks = Vec::new();
    for _ in 0..4 {
        let relay = relay.clone();
        tasks.push(tokio::spawn(async move {
            for _ in 0..10 {
                relay.publish("orders", "tick").await.unwrap();
            }
        }));
    }
    for task in tasks {
        task.await.unwrap();
    }

    // every subscriber observes ids in assignment order, no gaps lost
    let mut last = 0;
    for _ in 0..40 {
        let event = next_event(&mut stream).await;
        assert!(event.id > last);
        last = event.id;
    }
    assert_eq!(last, 40);
}

// ============== Subscription Tests ==============

#[tokio::test]
async fn test_live_only_subscriber_sees_only_new_events() {
    let relay = Relay::new(MemoryHistory::default());
    for i in 1..=3 {
        relay.publish("news", format!("n{}", i)).await.unwrap();
    }

    let channels = vec!["news".to_string()];
    let mut stream = relay.subscribe(&channels, None).await.unwrap();
    relay.publish("news", "n4").await.unwrap();

    let event = next_event(&mut stream).await;
    assert_eq!(event.id, 4);
    assert_eq!(event.data, "n4");
    assert!(timeout(IDLE, stream.next()).await.is_err());
}

#[tokio::test]
async fn test_resume_replays_then_goes_live_without_duplicates() {
    let relay = Relay::new(MemoryHistory::default());
    for i in 1..=5 {
        relay.publish("comment", format!("c{}", i)).await.unwrap();
    }

    let channels = vec!["comment".to_string()];
    let resume = ResumePoint::from([("comment".to_string(), 2)]);
    let mut stream = relay.subscribe(&channels, Some(resume)).await.unwrap();
    relay.publish("comment", "c6").await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(next_event(&mut stream).await.id);
    }
    assert_eq!(ids, vec![3, 4, 5, 6]);
    assert!(!stream.partial_history());
    assert!(timeout(IDLE, stream.next()).await.is_err());
}

#[tokio::test]
async fn test_replayed_ids_are_discarded_from_live_delivery() {
    let relay = Relay::new(MemoryHistory::default());
    for i in 1..=3 {
        relay.publish("feed", format!("f{}", i)).await.unwrap();
    }

    let channels = vec!["feed".to_string()];
    let mut stream = relay
        .subscribe(&channels, Some(ResumePoint::new()))
        .await
        .unwrap();

    // a live duplicate of an already-replayed id must be dropped
    relay.hub().deliver(&Event::new("feed", 3, "message", "f3"));
    relay.publish("feed", "f4").await.unwrap();

    let mut ids = Vec::new();
    for _ in 0..4 {
        ids.push(next_event(&mut stream).await.id);
    }
    assert_eq!(ids, vec![1, 2, 3, 4]);
}

#[tokio::test]
async fn test_multi_channel_replay_keeps_per_channel_order() {
    let relay = Relay::new(MemoryHistory::default());
    relay.publish("a", "a1").await.unwrap();
    relay.publish("b", "b1").await.unwrap();
    relay.publish("a", "a2").await.unwrap();

    let channels = vec!["a".to_string(), "b".to_string()];
    let mut stream = relay
        .subscribe(&channels, Some(ResumePoint::new()))
        .await
        .unwrap();

    let mut replay = Vec::new();
    for _ in 0..3 {
        let event = next_event(&mut stream).await;
        replay.push((event.channel, event.id));
    }
    // channels drain in request order; within a channel, oldest first
    assert_eq!(
        replay,
        vec![
            ("a".to_string(), 1),
            ("a".to_string(), 2),
            ("b".to_string(), 1)
        ]
    );
}

#[tokio::test]
async fn test_resume_before_retained_window_is_partial() {
    let relay = Relay::new(MemoryHistory::new(3));
    for i in 1..=5 {
        relay.publish("log", format!("l{}", i)).await.unwrap();
    }

    let channels = vec!["log".to_string()];
    let resume = ResumePoint::from([("log".to_string(), 1)]);
    let mut stream = relay.subscribe(&channels, Some(resume)).await.unwrap();

    assert!(stream.partial_history());
    // best-effort replay from the oldest retained entry
    let mut ids = Vec::new();
    for _ in 0..3 {
        ids.push(next_event(&mut stream).await.id);
    }
    assert_eq!(ids, vec![3, 4, 5]);
}

#[tokio::test]
async fn test_failed_history_read_closes_session() {
    let relay = Relay::new(BrokenReads {
        inner: MemoryHistory::default(),
    });
    relay.publish("ch1", "x").await.unwrap();

    let channels = vec!["ch1".to_string()];
    let resume = ResumePoint::from([("ch1".to_string(), 0)]);
    let err = relay.subscribe(&channels, Some(resume)).await.unwrap_err();
    assert!(matches!(err, Error::StoreUnavailable(_)));

    // the half-opened session did not stay registered
    assert_eq!(relay.hub().channel_subscriber_count("ch1"), 0);
}

#[tokio::test]
async fn test_subscribe_requires_channels() {
    let relay = Relay::new(MemoryHistory::default());
    let err = relay.subscribe(&[], None).await.unwrap_err();
    assert!(matches!(err, Error::EmptyChannelSet));

    let reserved = vec!["polling".to_string()];
    let err = relay.subscribe(&reserved, None).await.unwrap_err();
    assert!(matches!(err, Error::ReservedChannelName(_)));
}

#[tokio::test]
async fn test_dropping_stream_unregisters_everywhere() {
    let relay = Relay::new(MemoryHistory::default());
    let channels = vec!["a".to_string(), "b".to_string()];
    let stream = relay.subscribe(&channels, None).await.unwrap();

    assert_eq!(relay.hub().channel_subscriber_count("a"), 1);
    assert_eq!(relay.hub().channel_subscriber_count("b"), 1);

    drop(stream);
    assert_eq!(relay.hub().channel_subscriber_count("a"), 0);
    assert_eq!(relay.hub().channel_subscriber_count("b"), 0);
}

#[tokio::test]
async fn test_hub_cancellation_ends_stream() {
    let relay = Relay::new(MemoryHistory::default());
    let channels = vec!["c".to_string()];
    let mut stream = relay.subscribe(&channels, None).await.unwrap();

    let subscribers = relay.hub().subscribers();
    assert_eq!(subscribers.len(), 1);
    subscribers[0].cancellation().cancel();

    let ended = timeout(WAIT, stream.next()).await.unwrap();
    assert!(ended.is_none());
}

#[tokio::test]
async fn test_replay_batch_for_polling() {
    let relay = Relay::new(MemoryHistory::default());
    for i in 1..=4 {
        relay.publish("poll", format!("p{}", i)).await.unwrap();
    }

    let channels = vec!["poll".to_string()];
    let resume = ResumePoint::from([("poll".to_string(), 2)]);
    let (events, partial) = relay.replay(&channels, &resume).await.unwrap();

    let ids: Vec<u64> = events.iter().map(|e| e.id).collect();
    assert_eq!(ids, vec![3, 4]);
    assert!(!partial);
    // no live subscription was opened
    assert_eq!(relay.hub().channel_subscriber_count("poll"), 0);
}

// ============== Redirect Resolver Tests ==============

#[test]
fn test_redirect_encodes_channels_and_resume() {
    let resolver = RedirectResolver::default();
    let channels = vec!["comment".to_string(), "post".to_string()];
    let resume = ResumePoint::from([("comment".to_string(), 3)]);

    let url = resolver.resolve(&channels, Some(&resume), false).unwrap();
    assert_eq!(url, "/stream/comment/post?lastEventId=3,0");
}

#[test]
fn test_redirect_polling_flag() {
    let resolver = RedirectResolver::default();
    let channels = vec!["comment".to_string()];

    let url = resolver.resolve(&channels, None, true).unwrap();
    assert_eq!(url, "/stream/comment?polling=1");

    let resume = ResumePoint::from([("comment".to_string(), 2)]);
    let url = resolver.resolve(&channels, Some(&resume), true).unwrap();
    assert_eq!(url, "/stream/comment?lastEventId=2&polling=1");
}

#[test]
fn test_redirect_rejects_reserved_channel_names() {
    let resolver = RedirectResolver::default();
    for reserved in ["polling", "lastEventId"] {
        let channels = vec![reserved.to_string()];
        let err = resolver.resolve(&channels, None, false).unwrap_err();
        assert!(matches!(err, Error::ReservedChannelName(_)));
    }

    let err = resolver.resolve(&[], None, false).unwrap_err();
    assert!(matches!(err, Error::EmptyChannelSet));
}

#[test]
fn test_redirect_percent_encodes_segments() {
    let resolver = RedirectResolver::new("/internal/");
    let channels = vec!["user events".to_string()];
    let url = resolver.resolve(&channels, None, false).unwrap();
    assert_eq!(url, "/internal/user%20events");
}

#[tokio::test]
async fn test_relay_resolves_redirects() {
    let relay = Relay::builder(MemoryHistory::default())
        .stream_prefix("/events")
        .build();

    let channels = vec!["global".to_string()];
    let url = relay.resolve_redirect(&channels, None, false).unwrap();
    assert_eq!(url, "/events/global");
}
