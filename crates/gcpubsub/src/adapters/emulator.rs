//! In-process broker emulator.
//!
//! Keeps topics and subscriptions in memory and implements the delivery
//! semantics the engine relies on from a real broker:
//!
//! - at-least-once delivery with ack / nack
//! - `delivery_attempt` incremented on every redelivery
//! - ack deadlines that expire into redelivery, extendable per message
//! - per-key FIFO on subscriptions created with message ordering enabled
//!   (one outstanding message per ordering key)
//!
//! Suitable for tests and single-process development; it is what
//! [`super::InMemoryClientFactory`] connects to.

use async_trait::async_trait;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::{Duration, Instant, SystemTime};
use tokio::sync::Notify;
use tracing::debug;
use uuid::Uuid;

use crate::domain::{BrokerError, Message};
use crate::ports::{BrokerAdmin, ReceivedMessage, SubscriptionSettings};

/// Upper bound on how long a pull sleeps before re-checking lease expiry.
const EXPIRY_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// A message held by a subscription, with its delivery count so far.
#[derive(Debug, Clone)]
struct StoredMessage {
    message: Message,
    attempts: u32,
}

/// A delivered, not yet settled message.
#[derive(Debug)]
struct Lease {
    stored: StoredMessage,
    deadline: Instant,
}

#[derive(Debug, Default)]
struct QueueState {
    pending: VecDeque<StoredMessage>,
    outstanding: HashMap<String, Lease>,
    acked: u64,
    nacked: u64,
}

#[derive(Debug)]
struct SubscriptionQueue {
    settings: SubscriptionSettings,
    state: Mutex<QueueState>,
    notify: Notify,
}

impl SubscriptionQueue {
    fn new(settings: SubscriptionSettings) -> Self {
        Self {
            settings,
            state: Mutex::new(QueueState::default()),
            notify: Notify::new(),
        }
    }

    fn enqueue(&self, message: Message) {
        self.state.lock().pending.push_back(StoredMessage {
            message,
            attempts: 0,
        });
        self.notify.notify_waiters();
    }

    /// Return expired leases to the pending queue.
    fn reclaim_expired(&self, state: &mut QueueState, now: Instant) {
        let expired: Vec<String> = state
            .outstanding
            .iter()
            .filter(|(_, lease)| lease.deadline <= now)
            .map(|(ack_id, _)| ack_id.clone())
            .collect();

        for ack_id in expired {
            if let Some(lease) = state.outstanding.remove(&ack_id) {
                debug!(message_id = %lease.stored.message.id, "Ack deadline expired, redelivering");
                self.requeue(state, lease.stored);
            }
        }
    }

    /// Put a message back for redelivery, ahead of later messages with the
    /// same ordering key when ordering is enabled.
    fn requeue(&self, state: &mut QueueState, stored: StoredMessage) {
        if self.settings.enable_message_ordering && stored.message.is_ordered() {
            state.pending.push_front(stored);
        } else {
            state.pending.push_back(stored);
        }
    }

    /// Take up to `max` deliverable messages, honouring per-key exclusivity.
    fn take_deliverable(&self, state: &mut QueueState, max: usize, now: Instant) -> Vec<ReceivedMessage> {
        let mut busy_keys: HashSet<String> = if self.settings.enable_message_ordering {
            state
                .outstanding
                .values()
                .filter(|lease| lease.stored.message.is_ordered())
                .map(|lease| lease.stored.message.ordering_key.clone())
                .collect()
        } else {
            HashSet::new()
        };

        let mut delivered = Vec::new();
        let mut remaining = VecDeque::with_capacity(state.pending.len());

        while let Some(mut stored) = state.pending.pop_front() {
            let ordered =
                self.settings.enable_message_ordering && stored.message.is_ordered();
            if delivered.len() >= max || (ordered && busy_keys.contains(&stored.message.ordering_key)) {
                remaining.push_back(stored);
                continue;
            }
            if ordered {
                busy_keys.insert(stored.message.ordering_key.clone());
            }

            stored.attempts += 1;
            let mut message = stored.message.clone();
            message.delivery_attempt = stored.attempts;

            let ack_id = Uuid::new_v4().to_string();
            state.outstanding.insert(
                ack_id.clone(),
                Lease {
                    stored,
                    deadline: now + self.settings.ack_deadline,
                },
            );
            delivered.push(ReceivedMessage { ack_id, message });
        }

        state.pending = remaining;
        delivered
    }

    fn next_deadline(state: &QueueState) -> Option<Instant> {
        state.outstanding.values().map(|lease| lease.deadline).min()
    }
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: Mutex<HashMap<String, Vec<String>>>,
    subscriptions: Mutex<HashMap<String, Arc<SubscriptionQueue>>>,
    publish_delay: Mutex<Duration>,
    next_message_id: AtomicU64,
    publish_calls: AtomicU64,
}

/// Shared in-memory broker. Cloning yields another handle to the same broker.
#[derive(Debug, Clone, Default)]
pub struct InMemoryBroker {
    inner: Arc<BrokerState>,
}

impl InMemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Delay every publish by `delay` before it is stored (simulates a slow broker).
    pub fn set_publish_delay(&self, delay: Duration) {
        *self.inner.publish_delay.lock() = delay;
    }

    /// Number of publish requests that reached the broker, successful or not.
    pub fn publish_calls(&self) -> u64 {
        self.inner.publish_calls.load(Ordering::Relaxed)
    }

    /// Messages waiting for (re)delivery on a subscription.
    pub fn pending_count(&self, subscription_id: &str) -> usize {
        self.queue(subscription_id)
            .map(|q| q.state.lock().pending.len())
            .unwrap_or(0)
    }

    /// Delivered but unsettled messages on a subscription.
    pub fn outstanding_count(&self, subscription_id: &str) -> usize {
        self.queue(subscription_id)
            .map(|q| q.state.lock().outstanding.len())
            .unwrap_or(0)
    }

    /// Messages acknowledged on a subscription.
    pub fn acked_count(&self, subscription_id: &str) -> u64 {
        self.queue(subscription_id)
            .map(|q| q.state.lock().acked)
            .unwrap_or(0)
    }

    /// Messages negatively acknowledged on a subscription.
    pub fn nacked_count(&self, subscription_id: &str) -> u64 {
        self.queue(subscription_id)
            .map(|q| q.state.lock().nacked)
            .unwrap_or(0)
    }

    fn queue(&self, subscription_id: &str) -> Option<Arc<SubscriptionQueue>> {
        self.inner.subscriptions.lock().get(subscription_id).cloned()
    }

    fn require_queue(&self, subscription_id: &str) -> Result<Arc<SubscriptionQueue>, BrokerError> {
        self.queue(subscription_id)
            .ok_or_else(|| BrokerError::SubscriptionNotFound(subscription_id.to_string()))
    }

    pub(crate) async fn publish(&self, topic_id: &str, mut message: Message) -> Result<String, BrokerError> {
        self.inner.publish_calls.fetch_add(1, Ordering::Relaxed);

        let delay = *self.inner.publish_delay.lock();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }

        let subscription_ids = self
            .inner
            .topics
            .lock()
            .get(topic_id)
            .cloned()
            .ok_or_else(|| BrokerError::TopicNotFound(topic_id.to_string()))?;

        let id = self.inner.next_message_id.fetch_add(1, Ordering::Relaxed) + 1;
        message.id = id.to_string();
        message.delivery_attempt = 0;
        message.publish_time = Some(SystemTime::now());

        let queues: Vec<Arc<SubscriptionQueue>> = {
            let subscriptions = self.inner.subscriptions.lock();
            subscription_ids
                .iter()
                .filter_map(|sub_id| subscriptions.get(sub_id).cloned())
                .collect()
        };
        for queue in &queues {
            queue.enqueue(message.clone());
        }

        debug!(topic = topic_id, message_id = %message.id, subscriptions = queues.len(), "Message stored");
        Ok(message.id)
    }

    pub(crate) async fn pull(
        &self,
        subscription_id: &str,
        max_messages: usize,
    ) -> Result<Vec<ReceivedMessage>, BrokerError> {
        let queue = self.require_queue(subscription_id)?;
        let max = max_messages.max(1);

        loop {
            // Register interest before checking so a concurrent enqueue is not missed.
            let notified = queue.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            let wait = {
                let mut state = queue.state.lock();
                let now = Instant::now();
                queue.reclaim_expired(&mut state, now);
                let delivered = queue.take_deliverable(&mut state, max, now);
                if !delivered.is_empty() {
                    return Ok(delivered);
                }
                SubscriptionQueue::next_deadline(&state)
                    .map(|deadline| deadline.saturating_duration_since(now))
                    .unwrap_or(EXPIRY_POLL_INTERVAL)
                    .min(EXPIRY_POLL_INTERVAL)
            };

            let _ = tokio::time::timeout(wait, notified).await;
        }
    }

    pub(crate) fn ack(&self, subscription_id: &str, ack_id: &str) -> Result<(), BrokerError> {
        let queue = self.require_queue(subscription_id)?;
        let mut state = queue.state.lock();
        state
            .outstanding
            .remove(ack_id)
            .ok_or_else(|| BrokerError::UnknownAckId(ack_id.to_string()))?;
        state.acked += 1;
        drop(state);
        // A settled ordered message may unblock the next one with its key.
        queue.notify.notify_waiters();
        Ok(())
    }

    pub(crate) fn nack(&self, subscription_id: &str, ack_id: &str) -> Result<(), BrokerError> {
        let queue = self.require_queue(subscription_id)?;
        let mut state = queue.state.lock();
        let lease = state
            .outstanding
            .remove(ack_id)
            .ok_or_else(|| BrokerError::UnknownAckId(ack_id.to_string()))?;
        state.nacked += 1;
        queue.requeue(&mut state, lease.stored);
        drop(state);
        queue.notify.notify_waiters();
        Ok(())
    }

    pub(crate) fn modify_ack_deadline(
        &self,
        subscription_id: &str,
        ack_id: &str,
        extension: Duration,
    ) -> Result<(), BrokerError> {
        let queue = self.require_queue(subscription_id)?;
        let mut state = queue.state.lock();
        let lease = state
            .outstanding
            .get_mut(ack_id)
            .ok_or_else(|| BrokerError::UnknownAckId(ack_id.to_string()))?;
        lease.deadline = Instant::now() + extension;
        Ok(())
    }
}

#[async_trait]
impl BrokerAdmin for InMemoryBroker {
    async fn create_topic(&self, topic_id: &str) -> Result<(), BrokerError> {
        let mut topics = self.inner.topics.lock();
        if topics.contains_key(topic_id) {
            return Err(BrokerError::AlreadyExists(topic_id.to_string()));
        }
        topics.insert(topic_id.to_string(), Vec::new());
        debug!(topic = topic_id, "Topic created");
        Ok(())
    }

    async fn topic_exists(&self, topic_id: &str) -> Result<bool, BrokerError> {
        Ok(self.inner.topics.lock().contains_key(topic_id))
    }

    async fn create_subscription(
        &self,
        subscription_id: &str,
        settings: SubscriptionSettings,
    ) -> Result<(), BrokerError> {
        let mut topics = self.inner.topics.lock();
        let attached = topics
            .get_mut(&settings.topic_id)
            .ok_or_else(|| BrokerError::TopicNotFound(settings.topic_id.clone()))?;

        let mut subscriptions = self.inner.subscriptions.lock();
        if subscriptions.contains_key(subscription_id) {
            return Err(BrokerError::AlreadyExists(subscription_id.to_string()));
        }

        debug!(
            subscription = subscription_id,
            topic = %settings.topic_id,
            ordering = settings.enable_message_ordering,
            exactly_once = settings.enable_exactly_once_delivery,
            "Subscription created"
        );
        attached.push(subscription_id.to_string());
        subscriptions.insert(
            subscription_id.to_string(),
            Arc::new(SubscriptionQueue::new(settings)),
        );
        Ok(())
    }

    async fn subscription_exists(&self, subscription_id: &str) -> Result<bool, BrokerError> {
        Ok(self.inner.subscriptions.lock().contains_key(subscription_id))
    }
}
