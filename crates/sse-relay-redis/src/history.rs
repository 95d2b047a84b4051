//! Redis-backed event history

use async_trait::async_trait;
use redis::aio::ConnectionManager;
use sse_relay::{Error, Event, EventHistory, Result};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::{info, warn};

const DEFAULT_MAX_PER_CHANNEL: usize = 100;
const DEFAULT_TTL_SECONDS: u64 = 3600; // 1 hour

/// Event history on a Redis instance
///
/// Sequence ids come from a per-channel `INCR` counter (append with
/// auto-increment); entries live as JSON in a per-channel list trimmed to
/// the retention cap, so the retained ids are always the newest contiguous
/// suffix. Key TTLs are refreshed on every append so idle channels age
/// out.
///
/// # Example
///
/// ```rust,ignore
/// use sse_relay::Relay;
/// use sse_relay_redis::RedisHistory;
///
/// let history = RedisHistory::new();
/// history.connect("redis://localhost:6379").await?;
///
/// let relay = Relay::new(history);
/// ```
#[derive(Clone)]
pub struct RedisHistory {
    redis: Arc<RwLock<Option<ConnectionManager>>>,
    max_per_channel: usize,
    /// TTL for per-channel keys in seconds
    ttl_seconds: u64,
}

impl RedisHistory {
    /// Create a new Redis history with defaults
    pub fn new() -> Self {
        Self::with_options(DEFAULT_MAX_PER_CHANNEL, DEFAULT_TTL_SECONDS)
    }

    /// Create with a custom retention cap and key TTL
    pub fn with_options(max_per_channel: usize, ttl_seconds: u64) -> Self {
        Self {
            redis: Arc::new(RwLock::new(None)),
            max_per_channel: max_per_channel.max(1),
            ttl_seconds,
        }
    }

    /// Connect to Redis
    pub async fn connect(&self, redis_url: &str) -> anyhow::Result<()> {
        let client = redis::Client::open(redis_url)?;
        let manager = ConnectionManager::new(client).await?;
        *self.redis.write().await = Some(manager);
        info!("redis history connected");
        Ok(())
    }

    async fn connection(&self) -> Result<ConnectionManager> {
        self.redis
            .read()
            .await
            .clone()
            .ok_or_else(|| Error::StoreUnavailable("redis not connected".to_string()))
    }

    fn seq_key(channel: &str) -> String {
        format!("relay:seq:{}", channel)
    }

    fn log_key(channel: &str) -> String {
        format!("relay:log:{}", channel)
    }
}

impl Default for RedisHistory {
    fn default() -> Self {
        Self::new()
    }
}

fn store_err(e: redis::RedisError) -> Error {
    Error::StoreUnavailable(e.to_string())
}

#[async_trait]
impl EventHistory for RedisHistory {
    async fn append(&self, channel: &str, event_type: &str, data: &str) -> Result<u64> {
        let mut conn = self.connection().await?;

        let id: u64 = redis::cmd("INCR")
            .arg(Self::seq_key(channel))
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;

        let event = Event::new(channel, id, event_type, data);
        let entry = serde_json::to_string(&event)
            .map_err(|e| Error::StoreUnavailable(format!("encode entry: {}", e)))?;

        // One atomic round-trip: append, trim to the cap, refresh TTLs.
        let log_key = Self::log_key(channel);
        let mut pipe = redis::pipe();
        pipe.atomic()
            .cmd("RPUSH")
            .arg(&log_key)
            .arg(&entry)
            .ignore()
            .cmd("LTRIM")
            .arg(&log_key)
            .arg(-(self.max_per_channel as i64))
            .arg(-1)
            .ignore()
            .cmd("EXPIRE")
            .arg(&log_key)
            .arg(self.ttl_seconds)
            .ignore()
            .cmd("EXPIRE")
            .arg(Self::seq_key(channel))
            .arg(self.ttl_seconds)
            .ignore();
        pipe.query_async::<()>(&mut conn).await.map_err(store_err)?;

        Ok(id)
    }

    async fn range(&self, channel: &str, since: u64) -> Result<Vec<Event>> {
        let mut conn = self.connection().await?;

        let entries: Vec<String> = redis::cmd("LRANGE")
            .arg(Self::log_key(channel))
            .arg(0)
            .arg(-1)
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;

        let mut events = Vec::with_capacity(entries.len());
        for entry in entries {
            match serde_json::from_str::<Event>(&entry) {
                Ok(event) if event.id > since => events.push(event),
                Ok(_) => {}
                Err(e) => {
                    warn!(channel, error = %e, "skipping undecodable history entry");
                }
            }
        }
        Ok(events)
    }

    async fn latest(&self, channel: &str) -> Result<u64> {
        let mut conn = self.connection().await?;

        let latest: Option<u64> = redis::cmd("GET")
            .arg(Self::seq_key(channel))
            .query_async(&mut conn)
            .await
            .map_err(store_err)?;
        Ok(latest.unwrap_or(0))
    }

    fn name(&self) -> &'static str {
        "redis"
    }
}
