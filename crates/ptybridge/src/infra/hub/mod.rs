//! Fan-out of tagged output chunks to a dynamic set of subscribers.
//!
//! Publishing pushes into one bounded queue per tag and never waits. A
//! dispatcher task per tag moves chunks from that queue into every
//! subscriber's own bounded queue with `try_send`; a subscriber whose queue is
//! full simply misses the chunk. The subscriber set is copy-on-write behind a
//! mutex held only for insert/remove and for cloning the current snapshot.

mod error;

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;
use std::sync::Weak;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TryRecvError;
use tokio::sync::mpsc::error::TrySendError;
use tokio_util::sync::CancellationToken;
use tracing::debug;
use tracing::trace;

use crate::domain::StreamChunk;
use crate::domain::StreamTag;
use ptybridge_common::mutex_lock_or_recover;

pub use error::HubError;

pub const HUB_QUEUE_CAPACITY: usize = 100;
pub const SUBSCRIBER_QUEUE_CAPACITY: usize = 10;

type SubscriberMap = HashMap<u64, mpsc::Sender<StreamChunk>>;

struct Registry {
    closed: bool,
    subscribers: Arc<SubscriberMap>,
}

struct HubInner {
    registry: Mutex<Registry>,
    publishers: Mutex<Option<[mpsc::Sender<StreamChunk>; 2]>>,
    next_id: AtomicU64,
    live_dispatchers: AtomicUsize,
    drained: CancellationToken,
}

impl HubInner {
    fn snapshot(&self) -> Arc<SubscriberMap> {
        Arc::clone(&mutex_lock_or_recover(&self.registry).subscribers)
    }

    fn remove(&self, id: u64) -> bool {
        let mut registry = mutex_lock_or_recover(&self.registry);
        if !registry.subscribers.contains_key(&id) {
            return false;
        }
        let mut next = SubscriberMap::clone(&registry.subscribers);
        next.remove(&id);
        registry.subscribers = Arc::new(next);
        true
    }

    fn dispatcher_finished(&self) {
        if self.live_dispatchers.fetch_sub(1, Ordering::AcqRel) != 1 {
            return;
        }
        {
            let mut registry = mutex_lock_or_recover(&self.registry);
            registry.closed = true;
            registry.subscribers = Arc::new(SubscriberMap::new());
        }
        self.drained.cancel();
        debug!("broadcast hub drained");
    }
}

/// Cloneable handle to a broadcast hub.
///
/// Must be created inside a Tokio runtime: dispatchers are spawned eagerly.
#[derive(Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    pub fn new() -> Self {
        let (stdout_tx, stdout_rx) = mpsc::channel(HUB_QUEUE_CAPACITY);
        let (stderr_tx, stderr_rx) = mpsc::channel(HUB_QUEUE_CAPACITY);

        let inner = Arc::new(HubInner {
            registry: Mutex::new(Registry {
                closed: false,
                subscribers: Arc::new(SubscriberMap::new()),
            }),
            publishers: Mutex::new(Some([stdout_tx, stderr_tx])),
            next_id: AtomicU64::new(1),
            live_dispatchers: AtomicUsize::new(2),
            drained: CancellationToken::new(),
        });

        for rx in [stdout_rx, stderr_rx] {
            tokio::spawn(dispatch(Arc::downgrade(&inner), rx));
        }

        Self { inner }
    }

    /// Returns a publishing handle for `tag`, or an error once the hub is closed.
    pub fn publisher(&self, tag: StreamTag) -> Result<Publisher, HubError> {
        let publishers = mutex_lock_or_recover(&self.inner.publishers);
        let senders = publishers.as_ref().ok_or(HubError::Closed)?;
        let tx = match tag {
            StreamTag::Stdout => senders[0].clone(),
            StreamTag::Stderr => senders[1].clone(),
        };
        Ok(Publisher { tag, tx })
    }

    /// Registers a new subscriber. After the hub has drained, the returned
    /// subscription yields nothing and ends immediately.
    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_QUEUE_CAPACITY);
        let id = self.inner.next_id.fetch_add(1, Ordering::Relaxed);

        let mut registry = mutex_lock_or_recover(&self.inner.registry);
        if registry.closed {
            drop(tx);
            return Subscription {
                id,
                rx,
                hub: Weak::new(),
                registered: false,
            };
        }
        let mut next = SubscriberMap::clone(&registry.subscribers);
        next.insert(id, tx);
        registry.subscribers = Arc::new(next);
        drop(registry);

        trace!(subscriber = id, "subscribed");
        Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
            registered: true,
        }
    }

    /// Stops accepting new publishers. Dispatchers finish once every
    /// outstanding [`Publisher`] is dropped and queued chunks are delivered.
    /// Idempotent.
    pub fn close(&self) {
        let released = mutex_lock_or_recover(&self.inner.publishers).take();
        if released.is_some() {
            debug!("broadcast hub closing");
        }
    }

    pub fn is_closed(&self) -> bool {
        mutex_lock_or_recover(&self.inner.publishers).is_none()
    }

    /// Resolves once every queued chunk has been handed to subscribers and
    /// all subscriptions have been ended.
    pub async fn drained(&self) {
        self.inner.drained.cancelled().await;
    }

    pub fn subscriber_count(&self) -> usize {
        self.inner.snapshot().len()
    }
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::new()
    }
}

async fn dispatch(hub: Weak<HubInner>, mut rx: mpsc::Receiver<StreamChunk>) {
    while let Some(chunk) = rx.recv().await {
        let Some(inner) = hub.upgrade() else {
            break;
        };
        let subscribers = inner.snapshot();
        drop(inner);

        for (id, tx) in subscribers.iter() {
            match tx.try_send(chunk.clone()) {
                Ok(()) => {}
                Err(TrySendError::Full(_)) => {
                    trace!(subscriber = id, tag = %chunk.tag, "subscriber saturated, chunk dropped");
                }
                Err(TrySendError::Closed(_)) => {}
            }
        }
    }

    if let Some(inner) = hub.upgrade() {
        inner.dispatcher_finished();
    }
}

/// Publishing side for one tag. Cheap to clone.
#[derive(Clone)]
pub struct Publisher {
    tag: StreamTag,
    tx: mpsc::Sender<StreamChunk>,
}

impl Publisher {
    pub fn tag(&self) -> StreamTag {
        self.tag
    }

    /// Queues `data` without waiting. Returns `false` if the chunk was
    /// dropped because the hub queue is full or the hub is gone.
    pub fn publish(&self, data: impl Into<Bytes>) -> bool {
        match self.tx.try_send(StreamChunk::new(self.tag, data)) {
            Ok(()) => true,
            Err(TrySendError::Full(_)) => {
                trace!(tag = %self.tag, "hub queue full, chunk dropped");
                false
            }
            Err(TrySendError::Closed(_)) => false,
        }
    }
}

/// A registered subscriber queue. Deregisters itself on drop.
pub struct Subscription {
    id: u64,
    rx: mpsc::Receiver<StreamChunk>,
    hub: Weak<HubInner>,
    registered: bool,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Next chunk, or `None` once the hub has drained or this subscription
    /// was removed.
    pub async fn recv(&mut self) -> Option<StreamChunk> {
        self.rx.recv().await
    }

    /// Non-blocking variant used to drain what is already queued.
    pub fn try_recv(&mut self) -> Option<StreamChunk> {
        match self.rx.try_recv() {
            Ok(chunk) => Some(chunk),
            Err(TryRecvError::Empty | TryRecvError::Disconnected) => None,
        }
    }

    /// Removes this subscriber from the hub. Safe to call more than once.
    pub fn unsubscribe(&mut self) {
        if !self.registered {
            return;
        }
        self.registered = false;
        if let Some(hub) = self.hub.upgrade()
            && hub.remove(self.id)
        {
            trace!(subscriber = self.id, "unsubscribed");
        }
        self.rx.close();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    const WAIT: Duration = Duration::from_secs(2);

    async fn next(sub: &mut Subscription) -> Option<StreamChunk> {
        tokio::time::timeout(WAIT, sub.recv())
            .await
            .expect("timed out waiting for chunk")
    }

    async fn settle() {
        tokio::time::sleep(Duration::from_millis(20)).await;
    }

    #[tokio::test]
    async fn test_every_subscriber_gets_every_chunk_in_order() {
        let hub = BroadcastHub::new();
        let mut subs: Vec<Subscription> = (0..3).map(|_| hub.subscribe()).collect();
        let publisher = hub.publisher(StreamTag::Stdout).unwrap();

        for i in 0..5 {
            assert!(publisher.publish(format!("line {i}")));
        }

        for sub in &mut subs {
            for i in 0..5 {
                let chunk = next(sub).await.unwrap();
                assert_eq!(chunk.tag, StreamTag::Stdout);
                assert_eq!(chunk.text(), format!("line {i}"));
            }
            assert!(sub.try_recv().is_none());
        }
    }

    #[tokio::test]
    async fn test_paused_subscriber_never_blocks_others() {
        let hub = BroadcastHub::new();
        let mut fast = hub.subscribe();
        let mut paused = hub.subscribe();
        let publisher = hub.publisher(StreamTag::Stdout).unwrap();

        for i in 0..50 {
            assert!(publisher.publish(format!("{i}")));
            let chunk = next(&mut fast).await.unwrap();
            assert_eq!(chunk.text(), format!("{i}"));
        }

        let held: Vec<String> = std::iter::from_fn(|| paused.try_recv())
            .map(|chunk| chunk.text())
            .collect();
        let expected: Vec<String> = (0..SUBSCRIBER_QUEUE_CAPACITY).map(|i| i.to_string()).collect();
        assert_eq!(held, expected);
    }

    #[tokio::test]
    async fn test_publish_does_not_wait_on_a_full_queue() {
        let hub = BroadcastHub::new();
        let _idle = hub.subscribe();
        let publisher = hub.publisher(StreamTag::Stderr).unwrap();

        let started = std::time::Instant::now();
        for i in 0..(HUB_QUEUE_CAPACITY * 5) {
            let _ = publisher.publish(format!("{i}"));
        }
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn test_unsubscribe_is_idempotent() {
        let hub = BroadcastHub::new();
        let mut sub = hub.subscribe();
        let _other = hub.subscribe();
        assert_eq!(hub.subscriber_count(), 2);

        sub.unsubscribe();
        sub.unsubscribe();
        assert_eq!(hub.subscriber_count(), 1);
        assert!(sub.recv().await.is_none());

        drop(sub);
        assert_eq!(hub.subscriber_count(), 1);
    }

    #[tokio::test]
    async fn test_drop_deregisters() {
        let hub = BroadcastHub::new();
        {
            let _sub = hub.subscribe();
            assert_eq!(hub.subscriber_count(), 1);
        }
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_close_delivers_queued_chunks_then_ends() {
        let hub = BroadcastHub::new();
        let mut sub = hub.subscribe();
        let stdout = hub.publisher(StreamTag::Stdout).unwrap();
        let stderr = hub.publisher(StreamTag::Stderr).unwrap();

        stdout.publish("out");
        stderr.publish("err");
        drop(stdout);
        drop(stderr);
        hub.close();
        tokio::time::timeout(WAIT, hub.drained()).await.unwrap();

        let mut got: Vec<(StreamTag, String)> = Vec::new();
        while let Some(chunk) = next(&mut sub).await {
            got.push((chunk.tag, chunk.text()));
        }
        got.sort_by_key(|(tag, _)| tag.as_str());
        assert_eq!(
            got,
            vec![
                (StreamTag::Stderr, "err".to_string()),
                (StreamTag::Stdout, "out".to_string()),
            ]
        );
    }

    #[tokio::test]
    async fn test_close_waits_for_outstanding_publishers() {
        let hub = BroadcastHub::new();
        let mut sub = hub.subscribe();
        let publisher = hub.publisher(StreamTag::Stdout).unwrap();
        hub.close();
        assert!(hub.is_closed());
        assert!(matches!(
            hub.publisher(StreamTag::Stdout),
            Err(HubError::Closed)
        ));

        assert!(publisher.publish("late but queued"));
        assert_eq!(next(&mut sub).await.unwrap().text(), "late but queued");

        drop(publisher);
        assert!(next(&mut sub).await.is_none());
    }

    #[tokio::test]
    async fn test_late_subscriber_ends_immediately() {
        let hub = BroadcastHub::new();
        hub.close();
        tokio::time::timeout(WAIT, hub.drained()).await.unwrap();

        let mut late = hub.subscribe();
        assert!(next(&mut late).await.is_none());
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_close_is_idempotent() {
        let hub = BroadcastHub::new();
        hub.close();
        hub.close();
        settle().await;
        tokio::time::timeout(WAIT, hub.drained()).await.unwrap();
    }
}
