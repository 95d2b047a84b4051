//! Broadcast hub: per-channel fan-out to live subscriptions

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use std::collections::{HashMap, HashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::warn;

use crate::event::Event;

/// Outbound queue depth per subscription
pub(crate) const OUTBOUND_BUFFER: usize = 100;

/// Hub-side handle for one live subscription
#[derive(Debug, Clone)]
pub struct Subscriber {
    /// Unique subscription id
    pub id: String,
    /// When the subscription was opened
    pub connected_at: DateTime<Utc>,
    sender: mpsc::Sender<Event>,
    cancel: CancellationToken,
}

impl Subscriber {
    /// Create a subscriber and the receiving half of its outbound queue
    pub fn new() -> (Self, mpsc::Receiver<Event>) {
        let (sender, receiver) = mpsc::channel(OUTBOUND_BUFFER);
        let subscriber = Self {
            id: uuid::Uuid::new_v4().to_string(),
            connected_at: Utc::now(),
            sender,
            cancel: CancellationToken::new(),
        };
        (subscriber, receiver)
    }

    /// Whether the receiving side is still listening
    pub fn is_active(&self) -> bool {
        !self.sender.is_closed() && !self.cancel.is_cancelled()
    }

    /// Token cancelled when the hub drops this subscription
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }
}

/// In-memory fan-out of published events to registered subscriptions
///
/// Cloneable; one hub is shared per process. Delivery to one subscription
/// never blocks or fails delivery to another: a subscription whose
/// outbound queue is full is cancelled and dropped on the spot.
#[derive(Clone, Default)]
pub struct BroadcastHub {
    channels: Arc<DashMap<String, Vec<Subscriber>>>,
}

impl BroadcastHub {
    /// Create a new hub
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a subscription on a channel. Idempotent.
    pub fn register(&self, channel: &str, subscriber: &Subscriber) {
        let mut subs = self.channels.entry(channel.to_string()).or_default();
        if !subs.iter().any(|s| s.id == subscriber.id) {
            subs.push(subscriber.clone());
        }
    }

    /// Remove a subscription from a channel. Idempotent.
    pub fn unregister(&self, channel: &str, subscriber_id: &str) {
        if let Some(mut subs) = self.channels.get_mut(channel) {
            subs.retain(|s| s.id != subscriber_id);
        }
        self.channels.remove_if(channel, |_, subs| subs.is_empty());
    }

    /// Deliver an event to every subscription currently registered for its
    /// channel, in call order, and return the delivered count
    ///
    /// Synchronous: callers serialize deliveries per channel, so queues
    /// observe publish order. A full or closed outbound queue cancels that
    /// one subscription and removes it from the channel.
    pub fn deliver(&self, event: &Event) -> usize {
        let mut delivered = 0;
        let mut broken: Vec<String> = Vec::new();

        if let Some(subs) = self.channels.get(&event.channel) {
            for sub in subs.iter() {
                match sub.sender.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        warn!(
                            subscriber = %sub.id,
                            channel = %event.channel,
                            "outbound queue full, dropping subscription"
                        );
                        sub.cancel.cancel();
                        broken.push(sub.id.clone());
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => {
                        broken.push(sub.id.clone());
                    }
                }
            }
        }

        for id in &broken {
            self.unregister(&event.channel, id);
        }
        delivered
    }

    /// Drop subscriptions whose receiving side went away without an
    /// explicit unregister. Returns how many were removed.
    pub fn sweep_closed(&self) -> usize {
        let mut removed = 0;
        for mut entry in self.channels.iter_mut() {
            let before = entry.len();
            entry.retain(|s| s.is_active());
            removed += before - entry.len();
        }
        self.channels.retain(|_, subs| !subs.is_empty());
        removed
    }

    /// Number of subscriptions registered on a channel
    pub fn channel_subscriber_count(&self, channel: &str) -> usize {
        self.channels.get(channel).map(|subs| subs.len()).unwrap_or(0)
    }

    /// Subscription counts per channel
    pub fn channel_counts(&self) -> HashMap<String, usize> {
        self.channels
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().len()))
            .collect()
    }

    /// All distinct subscriptions across channels
    pub fn subscribers(&self) -> Vec<Subscriber> {
        let mut seen = HashSet::new();
        let mut subscribers = Vec::new();
        for entry in self.channels.iter() {
            for sub in entry.iter() {
                if seen.insert(sub.id.clone()) {
                    subscribers.push(sub.clone());
                }
            }
        }
        subscribers
    }

    /// Number of distinct subscriptions across channels
    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }
}
