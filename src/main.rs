mod config;

use std::net::SocketAddr;
use std::time::Duration;

use axum::{
    routing::{get, post},
    Router,
};
use sse_relay::handler::{self, RelayState};
use sse_relay::{EventHistory, MemoryHistory, Relay};
use sse_relay_redis::RedisHistory;
use tokio_util::sync::CancellationToken;
use tower_http::{
    cors::{Any, CorsLayer},
    trace::TraceLayer,
};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use crate::config::RelayConfig;

/// How often dead subscriptions are swept out of the hub
const SWEEP_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    init_tracing();

    let config = RelayConfig::load()?;
    tracing::info!(
        port = config.server.port,
        redis = ?config.history.url,
        history_limit = config.history.limit,
        stream_prefix = %config.redirect.stream_prefix,
        "relay starting"
    );

    match config.history.url.clone() {
        Some(url) => {
            let history =
                RedisHistory::with_options(config.history.limit, config.history.ttl_seconds);
            history.connect(&url).await?;
            serve(config, history).await
        }
        None => {
            tracing::info!("no redis configured, using in-memory history");
            let history = MemoryHistory::new(config.history.limit);
            serve(config, history).await
        }
    }
}

async fn serve<H: EventHistory>(config: RelayConfig, history: H) -> anyhow::Result<()> {
    let relay = Relay::builder(history)
        .stream_prefix(config.redirect.stream_prefix.clone())
        .build();
    let state = RelayState {
        relay: relay.clone(),
        auth: None,
    };

    let cancel = CancellationToken::new();

    // Sweep subscriptions whose client went away without a clean close
    let sweep_hub = relay.hub().clone();
    let sweep_cancel = cancel.clone();
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = sweep_cancel.cancelled() => break,
                _ = interval.tick() => {
                    let removed = sweep_hub.sweep_closed();
                    tracing::debug!(
                        subscriptions = sweep_hub.subscriber_count(),
                        removed,
                        "subscription sweep"
                    );
                }
            }
        }
    });

    let stream_route = format!("{}/{{*channels}}", config.redirect.stream_prefix);
    let app = Router::new()
        .route("/health", get(|| async { "OK" }))
        .route("/ready", get(|| async { "READY" }))
        .route(&stream_route, get(handler::stream::<H>))
        .route("/redirect/{*channels}", get(handler::redirect::<H>))
        .route("/publish", post(handler::publish::<H>))
        .route("/api/stats", get(handler::stats::<H>))
        .layer(
            CorsLayer::new()
                .allow_origin(Any)
                .allow_methods(Any)
                .allow_headers(Any),
        )
        .layer(TraceLayer::new_for_http())
        .with_state(state);

    let addr = SocketAddr::from(([0, 0, 0, 0], config.server.port));
    tracing::info!("listening on {}", addr);

    let listener = tokio::net::TcpListener::bind(addr).await?;

    let cancel_for_shutdown = cancel.clone();
    let shutdown_signal = async move {
        let ctrl_c = async {
            tokio::signal::ctrl_c()
                .await
                .expect("failed to install Ctrl+C handler");
        };

        #[cfg(unix)]
        let terminate = async {
            tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
                .expect("failed to install SIGTERM handler")
                .recv()
                .await;
        };

        #[cfg(not(unix))]
        let terminate = std::future::pending::<()>();

        tokio::select! {
            _ = ctrl_c => tracing::info!("received Ctrl+C"),
            _ = terminate => tracing::info!("received SIGTERM"),
        }

        cancel_for_shutdown.cancel();
    };

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal)
        .await?;

    tracing::info!("relay shutdown complete");
    Ok(())
}

fn init_tracing() {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "relay=info,sse_relay=info,tower_http=info".into()),
        )
        .with(tracing_subscriber::fmt::layer().json())
        .init();
}
