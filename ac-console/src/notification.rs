use std::{
    collections::{HashMap, VecDeque},
    sync::{
        Arc, Mutex, MutexGuard, Weak,
        atomic::{AtomicU64, Ordering},
    },
};

use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::{
    logging::category_event,
    rpc::{CorrelationId, Notification},
};

const DEFAULT_BACKLOG_PER_ID: usize = 256;
const DEFAULT_BACKLOG_IDS: usize = 32;

pub type SharedNotificationChannel = Arc<NotificationChannel>;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Delivery {
    Delivered,
    Backlogged,
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelMetrics {
    pub delivered: u64,
    pub backlogged: u64,
    pub backlog_dropped: u64,
    pub unroutable: u64,
    pub polls_succeeded: u64,
    pub polls_failed: u64,
}

/// Routes debug notifications to the subscriber of their correlation id.
///
/// Events that arrive before anyone subscribed (the backend may start
/// streaming before the run-trigger reply lands) are parked in a bounded
/// backlog and replayed on `subscribe`.
pub struct NotificationChannel {
    inner: Mutex<ChannelState>,
    per_id_limit: usize,
    id_limit: usize,
    delivered: AtomicU64,
    backlogged: AtomicU64,
    backlog_dropped: AtomicU64,
    unroutable: AtomicU64,
    polls_succeeded: AtomicU64,
    polls_failed: AtomicU64,
}

#[derive(Default)]
struct ChannelState {
    subscribers: HashMap<CorrelationId, Subscriber>,
    backlog: HashMap<CorrelationId, VecDeque<Notification>>,
    backlog_order: VecDeque<CorrelationId>,
    next_token: u64,
}

struct Subscriber {
    token: u64,
    sender: mpsc::UnboundedSender<Notification>,
}

pub struct Subscription {
    correlation_id: CorrelationId,
    token: u64,
    receiver: mpsc::UnboundedReceiver<Notification>,
    channel: Weak<NotificationChannel>,
}

impl Subscription {
    pub fn correlation_id(&self) -> &CorrelationId {
        &self.correlation_id
    }

    /// `None` once the subscription was replaced or removed and the queue is drained.
    pub async fn recv(&mut self) -> Option<Notification> {
        self.receiver.recv().await
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(channel) = self.channel.upgrade() {
            channel.detach(&self.correlation_id, self.token);
        }
    }
}

impl NotificationChannel {
    pub fn new() -> SharedNotificationChannel {
        Self::with_limits(DEFAULT_BACKLOG_PER_ID, DEFAULT_BACKLOG_IDS)
    }

    pub fn with_limits(per_id_limit: usize, id_limit: usize) -> SharedNotificationChannel {
        Arc::new(Self {
            inner: Mutex::new(ChannelState::default()),
            per_id_limit: per_id_limit.max(1),
            id_limit: id_limit.max(1),
            delivered: AtomicU64::new(0),
            backlogged: AtomicU64::new(0),
            backlog_dropped: AtomicU64::new(0),
            unroutable: AtomicU64::new(0),
            polls_succeeded: AtomicU64::new(0),
            polls_failed: AtomicU64::new(0),
        })
    }

    /// Replaces any previous subscriber for the same id.
    pub fn subscribe(self: &Arc<Self>, correlation_id: CorrelationId) -> Subscription {
        let (sender, receiver) = mpsc::unbounded_channel();
        let mut state = self.lock();
        let token = state.next_token;
        state.next_token += 1;

        let replay = state.backlog.remove(&correlation_id).unwrap_or_default();
        state.backlog_order.retain(|id| id != &correlation_id);
        let replayed = replay.len();
        for notification in replay {
            let _ = sender.send(notification);
        }

        let previous = state
            .subscribers
            .insert(correlation_id.clone(), Subscriber { token, sender });
        drop(state);

        if previous.is_some() {
            debug!(
                "{} replaced subscriber correlation_id={correlation_id}",
                category_event()
            );
        }
        if replayed > 0 {
            self.delivered.fetch_add(replayed as u64, Ordering::Relaxed);
            debug!(
                "{} replayed {replayed} backlogged events correlation_id={correlation_id}",
                category_event()
            );
        }

        Subscription {
            correlation_id,
            token,
            receiver,
            channel: Arc::downgrade(self),
        }
    }

    pub fn unsubscribe(&self, correlation_id: &CorrelationId) -> bool {
        self.lock().subscribers.remove(correlation_id).is_some()
    }

    pub fn publish(&self, notification: Notification) -> Delivery {
        let mut state = self.lock();
        let correlation_id = notification.correlation_id().clone();

        let notification = match state.subscribers.get(&correlation_id) {
            Some(subscriber) => match subscriber.sender.send(notification) {
                Ok(()) => {
                    drop(state);
                    self.delivered.fetch_add(1, Ordering::Relaxed);
                    return Delivery::Delivered;
                }
                Err(mpsc::error::SendError(notification)) => {
                    state.subscribers.remove(&correlation_id);
                    notification
                }
            },
            None => notification,
        };

        self.park(&mut state, correlation_id, notification);
        Delivery::Backlogged
    }

    /// Counts an event that carried no usable correlation id.
    pub fn record_unroutable(&self) {
        self.unroutable.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_success(&self) {
        self.polls_succeeded.fetch_add(1, Ordering::Relaxed);
    }

    pub fn record_poll_error(&self) {
        self.polls_failed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn subscriber_count(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn metrics(&self) -> ChannelMetrics {
        ChannelMetrics {
            delivered: self.delivered.load(Ordering::Relaxed),
            backlogged: self.backlogged.load(Ordering::Relaxed),
            backlog_dropped: self.backlog_dropped.load(Ordering::Relaxed),
            unroutable: self.unroutable.load(Ordering::Relaxed),
            polls_succeeded: self.polls_succeeded.load(Ordering::Relaxed),
            polls_failed: self.polls_failed.load(Ordering::Relaxed),
        }
    }

    fn park(
        &self,
        state: &mut ChannelState,
        correlation_id: CorrelationId,
        notification: Notification,
    ) {
        if !state.backlog.contains_key(&correlation_id) {
            state.backlog_order.push_back(correlation_id.clone());
            while state.backlog_order.len() > self.id_limit {
                let Some(evicted) = state.backlog_order.pop_front() else {
                    break;
                };
                let dropped = state.backlog.remove(&evicted).map(|q| q.len()).unwrap_or(0);
                self.backlog_dropped
                    .fetch_add(dropped as u64, Ordering::Relaxed);
                warn!(
                    "{} evicted backlog correlation_id={evicted} dropped={dropped}",
                    category_event()
                );
            }
        }

        let queue = state.backlog.entry(correlation_id).or_default();
        if queue.len() >= self.per_id_limit {
            queue.pop_front();
            self.backlog_dropped.fetch_add(1, Ordering::Relaxed);
        }
        queue.push_back(notification);
        self.backlogged.fetch_add(1, Ordering::Relaxed);
    }

    fn detach(&self, correlation_id: &CorrelationId, token: u64) {
        let mut state = self.lock();
        if state
            .subscribers
            .get(correlation_id)
            .is_some_and(|subscriber| subscriber.token == token)
        {
            state.subscribers.remove(correlation_id);
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChannelState> {
        self.inner.lock().expect("notification channel lock poisoned")
    }
}
