//! Engine façade and builder

use tracing::info;

use crate::error::Result;
use crate::event::{normalize_channels, Event, Message, ResumePoint};
use crate::history::EventHistory;
use crate::hub::BroadcastHub;
use crate::publisher::Publisher;
use crate::redirect::{RedirectResolver, DEFAULT_STREAM_PREFIX};
use crate::session::{drain_history, EventStream};

/// The event distribution engine: publish, subscribe, redirect-resolve
///
/// Built once at process start; request handlers receive it by reference
/// or clone (all internals are shared handles).
#[derive(Clone)]
pub struct Relay<H: EventHistory> {
    history: H,
    hub: BroadcastHub,
    publisher: Publisher<H>,
    resolver: RedirectResolver,
}

impl<H: EventHistory> Relay<H> {
    /// Start building a relay over a history store
    pub fn builder(history: H) -> RelayBuilder<H> {
        RelayBuilder {
            history,
            stream_prefix: DEFAULT_STREAM_PREFIX.to_string(),
        }
    }

    /// Build a relay with defaults
    pub fn new(history: H) -> Self {
        Self::builder(history).build()
    }

    /// Assign the next sequence id on `channel`, persist the event and fan
    /// it out to live subscriptions
    pub async fn publish(&self, channel: &str, message: impl Into<Message>) -> Result<Event> {
        self.publisher.publish(channel, message.into()).await
    }

    /// Open a subscription: replay anything missed since `resume`, then
    /// stream live events until the returned stream is dropped
    ///
    /// `None` for `resume` means live-only, no replay.
    pub async fn subscribe(
        &self,
        channels: &[String],
        resume: Option<ResumePoint>,
    ) -> Result<EventStream> {
        let channels = normalize_channels(channels)?;
        EventStream::open(&self.history, &self.hub, channels, resume).await
    }

    /// The history drain alone: replayed events plus the partial-history
    /// verdict. Serves the long-polling mode.
    pub async fn replay(
        &self,
        channels: &[String],
        resume: &ResumePoint,
    ) -> Result<(Vec<Event>, bool)> {
        let channels = normalize_channels(channels)?;
        drain_history(&self.history, &channels, resume).await
    }

    /// Compute the internal stream URL for the redirect offload mode
    pub fn resolve_redirect(
        &self,
        channels: &[String],
        resume: Option<&ResumePoint>,
        polling: bool,
    ) -> Result<String> {
        self.resolver.resolve(channels, resume, polling)
    }

    /// The shared fan-out hub
    pub fn hub(&self) -> &BroadcastHub {
        &self.hub
    }

    /// The backing history store
    pub fn history(&self) -> &H {
        &self.history
    }
}

/// Builder for [`Relay`]
pub struct RelayBuilder<H: EventHistory> {
    history: H,
    stream_prefix: String,
}

impl<H: EventHistory> RelayBuilder<H> {
    /// Set the internal path prefix the redirect resolver points at
    pub fn stream_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.stream_prefix = prefix.into();
        self
    }

    /// Build the relay
    pub fn build(self) -> Relay<H> {
        let hub = BroadcastHub::new();
        let publisher = Publisher::new(self.history.clone(), hub.clone());
        info!(store = self.history.name(), "relay engine initialized");
        Relay {
            history: self.history,
            hub,
            publisher,
            resolver: RedirectResolver::new(self.stream_prefix),
        }
    }
}
