//! Broadcast hub: fans extracted records out to every connected subscriber.
//!
//! Each subscriber gets a private unbounded channel. Registration,
//! deregistration and publishing all go through one registry lock, so a
//! publish sees a consistent set of subscribers and a subscriber removed
//! before a publish never receives it.
//!
//! Delivery is at-most-once and best effort: a subscriber whose channel is
//! closed is dropped from the registry on the next publish, and nobody gets a
//! backlog of records published before they connected.
//!
//! The hub never stops the producer. The first connection starts it and it
//! keeps running (and restarting) after the last subscriber leaves.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;

use crate::record::Record;
use crate::supervisor::Supervisor;

/// Unique identifier of one connected subscriber.
pub type SubscriberId = String;

type Registry = HashMap<SubscriberId, mpsc::UnboundedSender<Record>>;

#[derive(Debug)]
struct HubInner {
    subscribers: Mutex<Registry>,
    supervisor: Supervisor,
}

impl HubInner {
    fn registry(&self) -> MutexGuard<'_, Registry> {
        // Nothing in the critical sections can leave the map half-updated.
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn remove(&self, id: &str) -> bool {
        let mut subscribers = self.registry();
        let removed = subscribers.remove(id).is_some();
        if removed {
            log::info!(
                "[Hub] Subscriber {id} disconnected ({} remaining)",
                subscribers.len()
            );
        }
        removed
    }
}

/// Set of connected subscribers, clonable and shareable across tasks.
#[derive(Debug, Clone)]
pub struct BroadcastHub {
    inner: Arc<HubInner>,
}

impl BroadcastHub {
    /// Create an empty hub that starts `supervisor` on demand.
    #[must_use]
    pub fn new(supervisor: Supervisor) -> Self {
        Self {
            inner: Arc::new(HubInner {
                subscribers: Mutex::new(HashMap::new()),
                supervisor,
            }),
        }
    }

    /// Register a new subscriber and make sure the producer is running.
    ///
    /// The subscriber receives every record published from now on until the
    /// returned [`Subscription`] is dropped.
    pub fn on_connect(&self) -> Subscription {
        let id = generate_subscriber_id();
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut subscribers = self.inner.registry();
            subscribers.insert(id.clone(), tx);
            log::info!("[Hub] Subscriber {id} connected ({} total)", subscribers.len());
        }
        self.inner.supervisor.ensure_running();

        Subscription {
            id,
            rx,
            hub: Arc::downgrade(&self.inner),
        }
    }

    /// Remove a subscriber. Returns `false` if it was not registered.
    ///
    /// Dropping the [`Subscription`] does this automatically.
    pub fn on_disconnect(&self, id: &str) -> bool {
        self.inner.remove(id)
    }

    /// Deliver `record` to every registered subscriber.
    ///
    /// Subscribers whose channel has closed are removed. Returns the number
    /// of subscribers the record was delivered to.
    pub fn publish(&self, record: &Record) -> usize {
        let mut subscribers = self.inner.registry();
        let mut delivered = 0;
        subscribers.retain(|id, tx| {
            if tx.send(record.clone()).is_ok() {
                delivered += 1;
                true
            } else {
                log::debug!("[Hub] Dropping closed subscriber {id}");
                false
            }
        });
        delivered
    }

    /// Number of registered subscribers.
    #[must_use]
    pub fn subscriber_count(&self) -> usize {
        self.inner.registry().len()
    }

    /// The supervisor this hub starts on demand.
    #[must_use]
    pub fn supervisor(&self) -> &Supervisor {
        &self.inner.supervisor
    }

    /// Forward every record from the supervisor's channel, in order, until
    /// the channel closes.
    pub fn spawn_pump(&self, mut records: mpsc::UnboundedReceiver<Record>) -> JoinHandle<()> {
        let hub = self.clone();
        tokio::spawn(async move {
            while let Some(record) = records.recv().await {
                let delivered = hub.publish(&record);
                log::trace!(
                    "[Hub] Record at ({}, {}) delivered to {delivered} subscribers",
                    record.lat,
                    record.lon
                );
            }
            log::debug!("[Hub] Record channel closed, pump exiting");
        })
    }
}

/// A registered subscriber's end of the hub.
///
/// Deregisters itself when dropped.
#[derive(Debug)]
pub struct Subscription {
    id: SubscriberId,
    rx: mpsc::UnboundedReceiver<Record>,
    hub: Weak<HubInner>,
}

impl Subscription {
    /// This subscriber's id.
    #[must_use]
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Next record, in publish order. `None` once the hub is gone.
    pub async fn recv(&mut self) -> Option<Record> {
        self.rx.recv().await
    }

    /// Next record if one is already queued.
    pub fn try_recv(&mut self) -> Option<Record> {
        self.rx.try_recv().ok()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(hub) = self.hub.upgrade() {
            hub.remove(&self.id);
        }
    }
}

/// Generate a unique subscriber ID using a monotonic counter + random suffix.
fn generate_subscriber_id() -> SubscriberId {
    static COUNTER: AtomicU64 = AtomicU64::new(0);

    let seq = COUNTER.fetch_add(1, Ordering::Relaxed);
    let rand: u16 = rand::random();
    format!("sub:{seq:x}{rand:04x}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ProducerConfig;
    use crate::supervisor::SupervisorOptions;
    use std::time::Duration;
    use tokio::time::timeout;

    const WAIT: Duration = Duration::from_secs(5);

    /// Hub over an idle `sleep` producer; the record channel is returned so
    /// it stays open.
    fn test_hub(dir: &std::path::Path) -> (BroadcastHub, mpsc::UnboundedReceiver<Record>) {
        let options = SupervisorOptions::new(ProducerConfig::shell("exec sleep 30", dir));
        let (supervisor, records) = Supervisor::spawn(options);
        (BroadcastHub::new(supervisor), records)
    }

    async fn recv(subscription: &mut Subscription) -> Record {
        timeout(WAIT, subscription.recv()).await.unwrap().unwrap()
    }

    #[tokio::test]
    async fn test_publish_reaches_every_subscriber_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let (hub, _records) = test_hub(dir.path());
        let mut a = hub.on_connect();
        let mut b = hub.on_connect();
        assert_ne!(a.id(), b.id());

        assert_eq!(hub.publish(&Record::at(1.0, 1.0)), 2);
        assert_eq!(hub.publish(&Record::at(2.0, 2.0)), 2);

        for subscription in [&mut a, &mut b] {
            assert_eq!(recv(subscription).await.lat, 1.0);
            assert_eq!(recv(subscription).await.lat, 2.0);
        }
        hub.supervisor().stop().await;
    }

    #[tokio::test]
    async fn test_publish_with_no_subscribers_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let (hub, _records) = test_hub(dir.path());
        assert_eq!(hub.publish(&Record::at(0.0, 0.0)), 0);
        assert_eq!(hub.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn test_late_subscriber_gets_no_backlog() {
        let dir = tempfile::tempdir().unwrap();
        let (hub, _records) = test_hub(dir.path());
        let _early = hub.on_connect();
        hub.publish(&Record::at(1.0, 1.0));

        let mut late = hub.on_connect();
        assert!(late.try_recv().is_none());
        hub.publish(&Record::at(2.0, 2.0));
        assert_eq!(recv(&mut late).await.lat, 2.0);
        hub.supervisor().stop().await;
    }

    #[tokio::test]
    async fn test_dropping_subscription_deregisters() {
        let dir = tempfile::tempdir().unwrap();
        let (hub, _records) = test_hub(dir.path());
        let a = hub.on_connect();
        let b = hub.on_connect();
        assert_eq!(hub.subscriber_count(), 2);

        drop(a);
        assert_eq!(hub.subscriber_count(), 1);
        assert_eq!(hub.publish(&Record::at(1.0, 1.0)), 1);

        let id = b.id().to_string();
        drop(b);
        assert!(!hub.on_disconnect(&id), "already removed by drop");
        assert_eq!(hub.subscriber_count(), 0);
        hub.supervisor().stop().await;
    }

    #[tokio::test]
    async fn test_closed_channel_removed_on_publish() {
        let dir = tempfile::tempdir().unwrap();
        let (hub, _records) = test_hub(dir.path());
        let _live = hub.on_connect();
        let (tx, rx) = mpsc::unbounded_channel();
        drop(rx);
        hub.inner.registry().insert("sub:dead".to_string(), tx);
        assert_eq!(hub.subscriber_count(), 2);

        assert_eq!(hub.publish(&Record::at(1.0, 1.0)), 1);
        assert_eq!(hub.subscriber_count(), 1);
        hub.supervisor().stop().await;
    }

    #[tokio::test]
    async fn test_connect_starts_producer_once_and_disconnect_keeps_it() {
        let dir = tempfile::tempdir().unwrap();
        let (hub, _records) = test_hub(dir.path());
        assert_eq!(hub.supervisor().launches(), 0);

        let first = hub.on_connect();
        let mut state = hub.supervisor().subscribe_state();
        timeout(WAIT, state.wait_for(|s| s.is_running())).await.unwrap().unwrap();

        let second = hub.on_connect();
        drop(first);
        drop(second);
        tokio::time::sleep(Duration::from_millis(100)).await;

        assert_eq!(hub.supervisor().launches(), 1);
        assert!(hub.supervisor().state().is_running());
        hub.supervisor().stop().await;
    }

    #[tokio::test]
    async fn test_pump_forwards_channel_records() {
        let dir = tempfile::tempdir().unwrap();
        let (hub, _records) = test_hub(dir.path());
        let mut subscription = hub.on_connect();

        let (tx, rx) = mpsc::unbounded_channel();
        let pump = hub.spawn_pump(rx);
        for lat in [1.0, 2.0, 3.0] {
            tx.send(Record::at(lat, 0.0)).unwrap();
        }
        for lat in [1.0, 2.0, 3.0] {
            assert_eq!(recv(&mut subscription).await.lat, lat);
        }

        drop(tx);
        timeout(WAIT, pump).await.unwrap().unwrap();
        hub.supervisor().stop().await;
    }

    #[test]
    fn test_subscriber_ids_unique() {
        let ids: std::collections::HashSet<_> = (0..100).map(|_| generate_subscriber_id()).collect();
        assert_eq!(ids.len(), 100);
        assert!(ids.iter().all(|id| id.starts_with("sub:")));
    }
}
