use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub redirect: RedirectConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_port")]
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HistoryConfig {
    /// Redis URL, e.g. "redis://localhost:6379" or
    /// "redis://:password@host:6379". Empty means in-memory history
    /// (single process, lost on restart).
    #[serde(default)]
    pub url: Option<String>,
    /// Retained entries per channel
    #[serde(default = "default_limit")]
    pub limit: usize,
    /// TTL of per-channel Redis keys
    #[serde(default = "default_ttl")]
    pub ttl_seconds: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RedirectConfig {
    /// Internal path prefix the redirect resolver points the edge proxy at
    #[serde(default = "default_prefix")]
    pub stream_prefix: String,
}

fn default_port() -> u16 {
    8080
}

fn default_limit() -> usize {
    sse_relay::DEFAULT_HISTORY_LIMIT
}

fn default_ttl() -> u64 {
    3600
}

fn default_prefix() -> String {
    sse_relay::DEFAULT_STREAM_PREFIX.to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
        }
    }
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            url: None,
            limit: default_limit(),
            ttl_seconds: default_ttl(),
        }
    }
}

impl Default for RedirectConfig {
    fn default() -> Self {
        Self {
            stream_prefix: default_prefix(),
        }
    }
}

impl RelayConfig {
    pub fn load() -> anyhow::Result<Self> {
        let config_path =
            std::env::var("CONFIG_PATH").unwrap_or_else(|_| "relay.yaml".to_string());

        let mut config = if Path::new(&config_path).exists() {
            let content = std::fs::read_to_string(&config_path)?;
            serde_yaml::from_str(&content)?
        } else {
            Self::default()
        };

        // Environment variables override the config file
        if let Ok(port) = std::env::var("PORT") {
            if let Ok(p) = port.parse() {
                config.server.port = p;
            }
        }
        if let Ok(url) = std::env::var("REDIS_URL") {
            config.history.url = Some(url);
        }
        if let Ok(limit) = std::env::var("HISTORY_LIMIT") {
            if let Ok(l) = limit.parse() {
                config.history.limit = l;
            }
        }
        if let Ok(prefix) = std::env::var("STREAM_PREFIX") {
            config.redirect.stream_prefix = prefix;
        }

        Ok(config)
    }
}
