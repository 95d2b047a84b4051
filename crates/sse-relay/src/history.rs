//! Event history trait and the in-memory implementation
//!
//! Implement `EventHistory` to back replay on client reconnection with a
//! store of your own.

use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::Arc;

use crate::error::Result;
use crate::event::Event;

/// Default retained entries per channel
pub const DEFAULT_HISTORY_LIMIT: usize = 100;

/// Append-only, bounded-length per-channel event log
///
/// For any channel, the retained ids are a contiguous suffix of all ids
/// ever assigned: eviction only ever removes the oldest entry.
///
/// # Example
///
/// ```rust,ignore
/// use sse_relay::{async_trait, Event, EventHistory, Result};
///
/// #[derive(Clone)]
/// struct MyHistory {
///     db: Database,
/// }
///
/// #[async_trait]
/// impl EventHistory for MyHistory {
///     async fn append(&self, channel: &str, event_type: &str, data: &str) -> Result<u64> {
///         self.db.insert_auto_increment(channel, event_type, data).await
///     }
///
///     async fn range(&self, channel: &str, since: u64) -> Result<Vec<Event>> {
///         self.db.select_after(channel, since).await
///     }
///
///     async fn latest(&self, channel: &str) -> Result<u64> {
///         self.db.max_id(channel).await
///     }
///
///     fn name(&self) -> &'static str { "MyHistory" }
/// }
/// ```
#[async_trait]
pub trait EventHistory: Send + Sync + Clone + 'static {
    /// Assign the next sequence id for `channel` (starting at 1), store the
    /// entry, evict the oldest entry past the per-channel cap and return
    /// the assigned id
    async fn append(&self, channel: &str, event_type: &str, data: &str) -> Result<u64>;

    /// Retained entries with `id > since`, oldest first
    ///
    /// When `since` predates the retained window the whole retained suffix
    /// is returned; the caller treats that as partial history.
    async fn range(&self, channel: &str, since: u64) -> Result<Vec<Event>>;

    /// Current high-water mark for `channel`, 0 if never published to
    async fn latest(&self, channel: &str) -> Result<u64>;

    /// Return the store name (for logging)
    fn name(&self) -> &'static str;
}

#[derive(Default)]
struct ChannelLog {
    next_id: u64,
    entries: VecDeque<Event>,
}

/// In-memory event history
///
/// Suitable for single-process deployments and testing.
#[derive(Clone)]
pub struct MemoryHistory {
    channels: Arc<DashMap<String, ChannelLog>>,
    limit: usize,
}

impl MemoryHistory {
    /// Create a new in-memory history retaining `limit` entries per channel
    pub fn new(limit: usize) -> Self {
        Self {
            channels: Arc::new(DashMap::new()),
            limit: limit.max(1),
        }
    }
}

impl Default for MemoryHistory {
    fn default() -> Self {
        Self::new(DEFAULT_HISTORY_LIMIT)
    }
}

#[async_trait]
impl EventHistory for MemoryHistory {
    async fn append(&self, channel: &str, event_type: &str, data: &str) -> Result<u64> {
        let mut log = self.channels.entry(channel.to_string()).or_default();
        log.next_id += 1;
        let id = log.next_id;
        log.entries.push_back(Event::new(channel, id, event_type, data));
        if log.entries.len() > self.limit {
            log.entries.pop_front();
        }
        Ok(id)
    }

    async fn range(&self, channel: &str, since: u64) -> Result<Vec<Event>> {
        Ok(self
            .channels
            .get(channel)
            .map(|log| {
                log.entries
                    .iter()
                    .filter(|e| e.id > since)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }

    async fn latest(&self, channel: &str) -> Result<u64> {
        Ok(self.channels.get(channel).map(|log| log.next_id).unwrap_or(0))
    }

    fn name(&self) -> &'static str {
        "memory"
    }
}
