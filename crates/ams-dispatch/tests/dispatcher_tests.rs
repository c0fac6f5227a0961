//! Dispatcher behaviour against in-memory fakes.

use ams_common::{Message, MessageFilter, MessagePage, MessageStatus, NewMessage};
use ams_dispatch::{
    format_sent_at, CacheError, ChannelError, DeliveryChannel, DeliveryError, DispatchConfig,
    DispatchControl, DispatchError, Dispatcher, SideCache,
};
use ams_store::{MemoryMessageStore, MessageStore, SqliteMessageStore, StoreError};
use async_trait::async_trait;
use chrono::{DateTime, SubsecRound, Utc};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;
use uuid::Uuid;

// ============================================================================
// Fakes
// ============================================================================

/// Succeeds with `ext-<n>` unless the recipient is listed in `fail_for`
#[derive(Default)]
struct FakeChannel {
    fail_for: HashSet<String>,
    calls: Mutex<Vec<Uuid>>,
}

impl FakeChannel {
    fn failing_for(recipient: &str) -> Self {
        Self {
            fail_for: HashSet::from([recipient.to_string()]),
            ..Default::default()
        }
    }

    fn calls(&self) -> Vec<Uuid> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl DeliveryChannel for FakeChannel {
    async fn send(&self, message: &Message) -> Result<String, ChannelError> {
        let n = {
            let mut calls = self.calls.lock();
            calls.push(message.id);
            calls.len()
        };
        if self.fail_for.contains(&message.to) {
            return Err(ChannelError::Rejected {
                status: 500,
                body: "upstream down".to_string(),
            });
        }
        Ok(format!("ext-{}", n))
    }
}

/// Blocks each send until released
#[derive(Default)]
struct GatedChannel {
    started: Notify,
    release: Notify,
    calls: AtomicUsize,
}

#[async_trait]
impl DeliveryChannel for GatedChannel {
    async fn send(&self, _message: &Message) -> Result<String, ChannelError> {
        let n = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        self.started.notify_one();
        self.release.notified().await;
        Ok(format!("gated-{}", n))
    }
}

#[derive(Default)]
struct RecordingCache {
    fail: bool,
    entries: Mutex<HashMap<String, DateTime<Utc>>>,
}

#[async_trait]
impl SideCache for RecordingCache {
    async fn put(&self, external_id: &str, sent_at: DateTime<Utc>) -> Result<(), CacheError> {
        if self.fail {
            return Err(CacheError::Connection("redis unreachable".to_string()));
        }
        self.entries.lock().insert(external_id.to_string(), sent_at);
        Ok(())
    }

    async fn sent_at(&self, external_id: &str) -> Result<Option<DateTime<Utc>>, CacheError> {
        Ok(self.entries.lock().get(external_id).copied())
    }
}

/// Memory store with switchable failures and a fetch counter
#[derive(Default)]
struct FlakyStore {
    inner: MemoryMessageStore,
    fail_fetch: AtomicBool,
    fail_update_external_id: AtomicBool,
    fail_update_status: AtomicBool,
    fetches: AtomicUsize,
    status_updates: AtomicUsize,
}

impl FlakyStore {
    fn fetches(&self) -> usize {
        self.fetches.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl MessageStore for FlakyStore {
    async fn insert(&self, new: &NewMessage) -> ams_store::Result<Message> {
        self.inner.insert(new).await
    }

    async fn fetch_pending(&self, limit: u32) -> ams_store::Result<Vec<Message>> {
        self.fetches.fetch_add(1, Ordering::SeqCst);
        if self.fail_fetch.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("connection refused".to_string()));
        }
        self.inner.fetch_pending(limit).await
    }

    async fn update_external_id(&self, id: Uuid, external_id: &str) -> ams_store::Result<()> {
        if self.fail_update_external_id.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write timeout".to_string()));
        }
        self.inner.update_external_id(id, external_id).await
    }

    async fn update_status(
        &self,
        external_id: &str,
        status: MessageStatus,
        at: DateTime<Utc>,
    ) -> ams_store::Result<()> {
        self.status_updates.fetch_add(1, Ordering::SeqCst);
        if self.fail_update_status.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("write timeout".to_string()));
        }
        self.inner.update_status(external_id, status, at).await
    }

    async fn get(&self, id: Uuid) -> ams_store::Result<Option<Message>> {
        self.inner.get(id).await
    }

    async fn list(&self, filter: &MessageFilter) -> ams_store::Result<MessagePage> {
        self.inner.list(filter).await
    }

    async fn count(&self) -> ams_store::Result<u64> {
        self.inner.count().await
    }

    async fn ping(&self) -> ams_store::Result<()> {
        Ok(())
    }
}

fn dispatcher(
    store: Arc<dyn MessageStore>,
    channel: Arc<dyn DeliveryChannel>,
    cache: Arc<dyn SideCache>,
    poll_interval: Duration,
) -> Dispatcher {
    let config = DispatchConfig {
        poll_interval,
        batch_size: 2,
    };
    Dispatcher::new(config, store, channel, cache)
}

async fn pending(store: &dyn MessageStore, to: &str) -> Message {
    store.insert(&NewMessage::new(to, "Hello from the test")).await.unwrap()
}

async fn stored(store: &dyn MessageStore, id: Uuid) -> Message {
    store.get(id).await.unwrap().unwrap()
}

// ============================================================================
// Delivery protocol
// ============================================================================

#[tokio::test]
async fn test_tick_delivers_both_pending_messages() {
    let store = Arc::new(MemoryMessageStore::new());
    let channel = Arc::new(FakeChannel::default());
    let cache = Arc::new(RecordingCache::default());
    let d = dispatcher(store.clone(), channel.clone(), cache.clone(), Duration::from_secs(120));

    let a = pending(store.as_ref(), "+905551111111").await;
    let b = pending(store.as_ref(), "+905552222222").await;

    let before = Utc::now().trunc_subsecs(3);
    let report = d.run_once().await.unwrap();
    let after = Utc::now();

    assert_eq!(report.fetched, 2);
    assert_eq!(report.delivered.len(), 2);
    assert!(report.failed.is_empty());

    let a = stored(store.as_ref(), a.id).await;
    let b = stored(store.as_ref(), b.id).await;
    for msg in [&a, &b] {
        assert_eq!(msg.status, MessageStatus::Sent);
        let external_id = msg.external_id.as_deref().unwrap();
        assert!(!external_id.is_empty());

        let sent_at = msg.sent_at.unwrap();
        assert!(sent_at >= before && sent_at <= after);
        assert_eq!(cache.sent_at(external_id).await.unwrap(), Some(sent_at));
    }
    assert_ne!(a.external_id, b.external_id);
    assert_eq!(channel.calls(), vec![a.id, b.id]);
}

#[tokio::test]
async fn test_channel_failure_leaves_message_pending_and_continues() {
    let store = Arc::new(MemoryMessageStore::new());
    let channel = Arc::new(FakeChannel::failing_for("+905551111111"));
    let cache = Arc::new(RecordingCache::default());
    let d = dispatcher(store.clone(), channel.clone(), cache.clone(), Duration::from_secs(120));

    let first = pending(store.as_ref(), "+905551111111").await;
    let second = pending(store.as_ref(), "+905552222222").await;

    let report = d.run_once().await.unwrap();

    assert_eq!(report.delivered.len(), 1);
    assert_eq!(report.delivered[0].message_id, second.id);
    assert_eq!(report.failed.len(), 1);
    assert_eq!(report.failed[0].message_id, first.id);
    assert!(matches!(
        report.failed[0].error,
        DeliveryError::Send(ChannelError::Rejected { status: 500, .. })
    ));

    let first = stored(store.as_ref(), first.id).await;
    assert_eq!(first.status, MessageStatus::Pending);
    assert!(first.external_id.is_none());
    assert!(first.sent_at.is_none());
    assert_eq!(stored(store.as_ref(), second.id).await.status, MessageStatus::Sent);
    assert_eq!(cache.entries.lock().len(), 1);
}

#[tokio::test]
async fn test_failed_message_retried_on_next_tick() {
    let store = Arc::new(MemoryMessageStore::new());
    let failing = Arc::new(FakeChannel::failing_for("+905551111111"));
    let cache: Arc<dyn SideCache> = Arc::new(RecordingCache::default());

    let msg = pending(store.as_ref(), "+905551111111").await;
    let first = dispatcher(store.clone(), failing, cache.clone(), Duration::from_secs(120));
    assert_eq!(first.run_once().await.unwrap().failed.len(), 1);

    let healthy = Arc::new(FakeChannel::default());
    let second = dispatcher(store.clone(), healthy, cache, Duration::from_secs(120));
    let report = second.run_once().await.unwrap();
    assert_eq!(report.delivered.len(), 1);
    assert_eq!(stored(store.as_ref(), msg.id).await.status, MessageStatus::Sent);
}

#[tokio::test]
async fn test_store_failure_after_delivery_is_reported() {
    let store = Arc::new(FlakyStore::default());
    store.fail_update_status.store(true, Ordering::SeqCst);
    let channel = Arc::new(FakeChannel::default());
    let cache = Arc::new(RecordingCache::default());
    let d = dispatcher(store.clone(), channel.clone(), cache.clone(), Duration::from_secs(120));

    let msg = pending(store.as_ref(), "+905551111111").await;
    let report = d.run_once().await.unwrap();

    assert!(report.delivered.is_empty());
    assert_eq!(report.failed.len(), 1);
    let failure = &report.failed[0];
    assert_eq!(failure.message_id, msg.id);
    assert!(matches!(failure.error, DeliveryError::PersistStatus { .. }));
    assert_eq!(failure.error.external_id(), Some("ext-1"));

    // Delivered but not marked sent; nothing mirrored
    let msg = stored(store.as_ref(), msg.id).await;
    assert_eq!(msg.status, MessageStatus::Pending);
    assert!(cache.entries.lock().is_empty());
    assert_eq!(channel.calls().len(), 1);
}

#[tokio::test]
async fn test_external_id_write_failure_stops_before_status() {
    let store = Arc::new(FlakyStore::default());
    store.fail_update_external_id.store(true, Ordering::SeqCst);
    let channel = Arc::new(FakeChannel::default());
    let cache = Arc::new(RecordingCache::default());
    let d = dispatcher(store.clone(), channel.clone(), cache.clone(), Duration::from_secs(120));

    let msg = pending(store.as_ref(), "+905551111111").await;
    let report = d.run_once().await.unwrap();

    assert!(report.delivered.is_empty());
    assert_eq!(report.failed.len(), 1);
    let failure = &report.failed[0];
    assert_eq!(failure.message_id, msg.id);
    assert!(matches!(
        failure.error,
        DeliveryError::PersistExternalId {
            source: StoreError::Unavailable(_),
            ..
        }
    ));
    assert_eq!(failure.error.external_id(), Some("ext-1"));

    let msg = stored(store.as_ref(), msg.id).await;
    assert_eq!(msg.status, MessageStatus::Pending);
    assert!(msg.external_id.is_none());
    assert!(msg.sent_at.is_none());
    assert_eq!(store.status_updates.load(Ordering::SeqCst), 0);
    assert!(cache.entries.lock().is_empty());
    assert_eq!(channel.calls().len(), 1);
}

#[tokio::test]
async fn test_sqlite_sent_at_matches_cached_value() {
    let sqlite = SqliteMessageStore::connect("sqlite::memory:", 1).await.unwrap();
    sqlite.init_schema().await.unwrap();
    let store: Arc<dyn MessageStore> = Arc::new(sqlite);
    let cache = Arc::new(RecordingCache::default());
    let d = dispatcher(
        store.clone(),
        Arc::new(FakeChannel::default()),
        cache.clone(),
        Duration::from_secs(120),
    );

    let msg = pending(store.as_ref(), "+905551111111").await;
    let report = d.run_once().await.unwrap();
    assert_eq!(report.delivered.len(), 1);

    let msg = stored(store.as_ref(), msg.id).await;
    let external_id = msg.external_id.as_deref().unwrap();
    let stored_at = msg.sent_at.unwrap();
    let cached_at = cache.sent_at(external_id).await.unwrap().unwrap();
    assert_eq!(stored_at, cached_at);
    assert_eq!(report.delivered[0].sent_at, stored_at);

    // What Redis would hold reads back as the same instant
    let wire = format_sent_at(cached_at);
    let read_back = DateTime::parse_from_rfc3339(&wire).unwrap().with_timezone(&Utc);
    assert_eq!(read_back, stored_at);
}

#[tokio::test]
async fn test_run_once_refused_while_loop_running() {
    let store = Arc::new(MemoryMessageStore::new());
    let channel = Arc::new(FakeChannel::default());
    let d = dispatcher(
        store.clone(),
        channel.clone(),
        Arc::new(RecordingCache::default()),
        Duration::from_secs(120),
    );
    let msg = pending(store.as_ref(), "+905551111111").await;

    d.start().await.unwrap();
    assert!(matches!(d.run_once().await, Err(DispatchError::AlreadyRunning)));
    assert!(channel.calls().is_empty());
    assert!(stored(store.as_ref(), msg.id).await.is_pending());

    d.stop().await.unwrap();
    assert_eq!(d.run_once().await.unwrap().delivered.len(), 1);
}

#[tokio::test]
async fn test_cache_failure_does_not_change_outcome() {
    let store = Arc::new(MemoryMessageStore::new());
    let channel = Arc::new(FakeChannel::default());
    let cache = Arc::new(RecordingCache {
        fail: true,
        ..Default::default()
    });
    let d = dispatcher(store.clone(), channel, cache, Duration::from_secs(120));

    let msg = pending(store.as_ref(), "+905551111111").await;
    let report = d.run_once().await.unwrap();

    assert_eq!(report.delivered.len(), 1);
    assert!(!report.delivered[0].cached);
    assert!(report.failed.is_empty());
    assert_eq!(stored(store.as_ref(), msg.id).await.status, MessageStatus::Sent);
}

#[tokio::test]
async fn test_batch_size_bounds_each_tick() {
    let store = Arc::new(MemoryMessageStore::new());
    let channel = Arc::new(FakeChannel::default());
    let d = dispatcher(
        store.clone(),
        channel.clone(),
        Arc::new(RecordingCache::default()),
        Duration::from_secs(120),
    );

    for i in 0..5 {
        pending(store.as_ref(), &format!("+90555000000{}", i)).await;
    }

    assert_eq!(d.run_once().await.unwrap().delivered.len(), 2);
    assert_eq!(d.run_once().await.unwrap().delivered.len(), 2);
    assert_eq!(d.run_once().await.unwrap().delivered.len(), 1);
    assert!(d.run_once().await.unwrap().is_empty());
    assert_eq!(channel.calls().len(), 5);
}

#[tokio::test]
async fn test_fetch_failure_is_an_error() {
    let store = Arc::new(FlakyStore::default());
    store.fail_fetch.store(true, Ordering::SeqCst);
    let d = dispatcher(
        store,
        Arc::new(FakeChannel::default()),
        Arc::new(RecordingCache::default()),
        Duration::from_secs(120),
    );

    assert!(matches!(d.run_once().await, Err(DispatchError::Fetch(_))));
}

// ============================================================================
// Lifecycle
// ============================================================================

#[tokio::test]
async fn test_stop_before_start_is_noop() {
    let d = dispatcher(
        Arc::new(MemoryMessageStore::new()),
        Arc::new(FakeChannel::default()),
        Arc::new(RecordingCache::default()),
        Duration::from_secs(120),
    );

    assert!(!d.is_running());
    d.stop().await.unwrap();
    d.stop().await.unwrap();
    assert!(!d.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_start_twice_runs_single_loop() {
    let store = Arc::new(FlakyStore::default());
    let d = dispatcher(
        store.clone(),
        Arc::new(FakeChannel::default()),
        Arc::new(RecordingCache::default()),
        Duration::from_millis(100),
    );

    d.start().await.unwrap();
    d.start().await.unwrap();
    assert!(d.is_running());

    tokio::time::sleep(Duration::from_millis(350)).await;
    d.stop().await.unwrap();

    // Ticks at 100, 200 and 300ms from one loop
    assert_eq!(store.fetches(), 3);
    assert!(!d.is_running());
}

#[tokio::test(start_paused = true)]
async fn test_first_tick_waits_one_interval() {
    let store = Arc::new(FlakyStore::default());
    let d = dispatcher(
        store.clone(),
        Arc::new(FakeChannel::default()),
        Arc::new(RecordingCache::default()),
        Duration::from_millis(100),
    );

    d.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.fetches(), 0);

    tokio::time::sleep(Duration::from_millis(60)).await;
    assert_eq!(store.fetches(), 1);
    d.stop().await.unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_loop_survives_fetch_failures() {
    let store = Arc::new(FlakyStore::default());
    store.fail_fetch.store(true, Ordering::SeqCst);
    let d = dispatcher(
        store.clone(),
        Arc::new(FakeChannel::default()),
        Arc::new(RecordingCache::default()),
        Duration::from_millis(100),
    );

    d.start().await.unwrap();
    tokio::time::sleep(Duration::from_millis(250)).await;
    assert_eq!(store.fetches(), 2);
    assert!(d.is_running());

    store.fail_fetch.store(false, Ordering::SeqCst);
    let msg = pending(store.as_ref(), "+905551111111").await;
    tokio::time::sleep(Duration::from_millis(100)).await;
    d.stop().await.unwrap();

    assert_eq!(stored(store.as_ref(), msg.id).await.status, MessageStatus::Sent);
}

#[tokio::test(start_paused = true)]
async fn test_stop_waits_for_in_flight_delivery() {
    let store = Arc::new(MemoryMessageStore::new());
    let channel = Arc::new(GatedChannel::default());
    let d = Arc::new(dispatcher(
        store.clone(),
        channel.clone(),
        Arc::new(RecordingCache::default()),
        Duration::from_millis(100),
    ));

    let first = pending(store.as_ref(), "+905551111111").await;
    let second = pending(store.as_ref(), "+905552222222").await;

    d.start().await.unwrap();
    channel.started.notified().await;

    let stopper = {
        let d = Arc::clone(&d);
        tokio::spawn(async move { d.stop().await })
    };

    tokio::time::sleep(Duration::from_millis(50)).await;
    assert!(!stopper.is_finished(), "stop returned while a delivery was in flight");

    channel.release.notify_one();
    stopper.await.unwrap().unwrap();
    assert!(!d.is_running());

    // The in-flight message completed, its sibling was left for later
    assert_eq!(stored(store.as_ref(), first.id).await.status, MessageStatus::Sent);
    assert!(stored(store.as_ref(), second.id).await.is_pending());
    assert_eq!(channel.calls.load(Ordering::SeqCst), 1);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(channel.calls.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn test_restart_after_stop() {
    let store = Arc::new(FlakyStore::default());
    let d = dispatcher(
        store.clone(),
        Arc::new(FakeChannel::default()),
        Arc::new(RecordingCache::default()),
        Duration::from_millis(100),
    );

    d.start().await.unwrap();
    d.stop().await.unwrap();
    assert!(!d.is_running());

    d.start().await.unwrap();
    assert!(d.is_running());
    tokio::time::sleep(Duration::from_millis(150)).await;
    d.stop().await.unwrap();
    assert_eq!(store.fetches(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_dropping_dispatcher_ends_loop() {
    let store = Arc::new(FlakyStore::default());
    let d = dispatcher(
        store.clone(),
        Arc::new(FakeChannel::default()),
        Arc::new(RecordingCache::default()),
        Duration::from_millis(100),
    );

    d.start().await.unwrap();
    drop(d);

    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(store.fetches(), 0);
}
