//! Publish path: sequence assignment, history append, hub fan-out

use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::error::{Error, Result};
use crate::event::{validate_channel, Event, Message};
use crate::history::EventHistory;
use crate::hub::BroadcastHub;

/// Store append retries before the failure surfaces to the caller
const APPEND_ATTEMPTS: u32 = 3;
/// Base delay of the append retry backoff, doubled per attempt
const APPEND_BACKOFF_BASE: Duration = Duration::from_millis(50);

/// Accepts messages, assigns channel-scoped sequence ids, persists them and
/// fans them out
///
/// Append and fan-out run under a channel-scoped lock: two publishes on one
/// channel are observed by every subscriber in the order they were issued,
/// and a subscriber attaching after a publish returns sees that event via
/// exactly one of replay or live delivery. Different channels never
/// contend.
#[derive(Clone)]
pub struct Publisher<H: EventHistory> {
    history: H,
    hub: BroadcastHub,
    locks: Arc<DashMap<String, Arc<Mutex<()>>>>,
}

impl<H: EventHistory> Publisher<H> {
    /// Create a publisher over a history store and a hub
    pub fn new(history: H, hub: BroadcastHub) -> Self {
        Self {
            history,
            hub,
            locks: Arc::new(DashMap::new()),
        }
    }

    fn channel_lock(&self, channel: &str) -> Arc<Mutex<()>> {
        self.locks.entry(channel.to_string()).or_default().clone()
    }

    /// Publish a message on a channel
    ///
    /// Exactly one history entry and one fan-out per successful call.
    /// Reserved channel names are rejected before any state change.
    pub async fn publish(&self, channel: &str, message: Message) -> Result<Event> {
        validate_channel(channel)?;
        let (event_type, data) = message.into_parts();

        let lock = self.channel_lock(channel);
        let _ordering = lock.lock().await;

        let id = self.append_with_retry(channel, &event_type, &data).await?;
        let event = Event {
            channel: channel.to_string(),
            id,
            event_type,
            data,
        };
        let delivered = self.hub.deliver(&event);
        debug!(channel, id, delivered, "event published");
        Ok(event)
    }

    async fn append_with_retry(&self, channel: &str, event_type: &str, data: &str) -> Result<u64> {
        let mut delay = APPEND_BACKOFF_BASE;
        let mut attempt = 1;
        loop {
            match self.history.append(channel, event_type, data).await {
                Ok(id) => return Ok(id),
                Err(Error::StoreUnavailable(reason)) if attempt < APPEND_ATTEMPTS => {
                    warn!(
                        channel,
                        attempt,
                        store = self.history.name(),
                        %reason,
                        "history append failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                    delay *= 2;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}
