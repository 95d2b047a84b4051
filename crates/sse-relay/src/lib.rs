//! # sse-relay
//!
//! A channel-based Server-Sent Events distribution engine with resumable
//! delivery.
//!
//! ## Features
//!
//! - **Channel-scoped sequencing**: every event gets a per-channel,
//!   gap-free sequence id at publish time
//! - **Bounded history with replay**: a reconnecting client presents the
//!   last id it saw and receives everything published since, then resumes
//!   live streaming, with no duplicate at the boundary
//! - **Isolated fan-out**: a slow or dead subscriber is dropped, never
//!   allowed to stall the hub or other subscribers
//! - **Pluggable history**: implement `EventHistory` to back replay with
//!   any store supporting append-with-auto-increment and ranged reads
//! - **Redirect offload**: a pure resolver computes the internal stream
//!   URL so an edge proxy can hold the long-lived connection
//! - **Built-in handlers**: optional Axum handlers for the stream,
//!   redirect, publish and stats endpoints
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use sse_relay::{MemoryHistory, Relay};
//! use tokio_stream::StreamExt;
//!
//! #[tokio::main]
//! async fn main() -> sse_relay::Result<()> {
//!     let relay = Relay::new(MemoryHistory::default());
//!
//!     let channels = vec!["global".to_string()];
//!     let mut stream = relay.subscribe(&channels, None).await?;
//!
//!     relay.publish("global", "hello").await?;
//!
//!     let event = stream.next().await.unwrap();
//!     assert_eq!(event.data, "hello");
//!     Ok(())
//! }
//! ```
//!
//! ## Resuming
//!
//! ```rust,no_run
//! use sse_relay::{MemoryHistory, Relay, ResumePoint};
//!
//! # #[tokio::main]
//! # async fn main() -> sse_relay::Result<()> {
//! let relay = Relay::new(MemoryHistory::default());
//! let channels = vec!["comment".to_string()];
//!
//! // replay everything after id 3, then go live
//! let resume = ResumePoint::from([("comment".to_string(), 3)]);
//! let stream = relay.subscribe(&channels, Some(resume)).await?;
//! # Ok(())
//! # }
//! ```

mod error;
mod event;
mod history;
mod hub;
mod publisher;
mod redirect;
mod relay;
mod session;

#[cfg(feature = "server")]
pub mod auth;
#[cfg(feature = "server")]
pub mod handler;

// Re-exports
pub use error::{Error, Result};
pub use event::{
    decode_resume, encode_resume, validate_channel, Event, Message, ResumePoint,
    DEFAULT_EVENT_TYPE, RESERVED_CHANNEL_NAMES,
};
pub use history::{EventHistory, MemoryHistory, DEFAULT_HISTORY_LIMIT};
pub use hub::{BroadcastHub, Subscriber};
pub use publisher::Publisher;
pub use redirect::{RedirectResolver, DEFAULT_STREAM_PREFIX};
pub use relay::{Relay, RelayBuilder};
pub use session::EventStream;

// Re-export commonly used types from dependencies
pub use async_trait::async_trait;
pub use tokio_util::sync::CancellationToken;
