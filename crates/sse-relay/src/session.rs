//! Subscription sessions: history drain, then live streaming

use futures::stream::{self, Stream};
use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, warn};

use crate::error::Result;
use crate::event::{Event, ResumePoint};
use crate::history::EventHistory;
use crate::hub::{BroadcastHub, Subscriber};

/// Drain retained history for a channel set against a resume point
///
/// Channels are drained in request order; within a channel, oldest first.
/// No order is invented across channels. Returns the replayed events and
/// whether any channel's resume id predated the retained window (replay is
/// then best-effort from the oldest retained entry).
pub(crate) async fn drain_history<H: EventHistory>(
    history: &H,
    channels: &[String],
    resume: &ResumePoint,
) -> Result<(Vec<Event>, bool)> {
    let mut replayed = Vec::new();
    let mut partial = false;
    for channel in channels {
        let since = resume.get(channel).copied().unwrap_or(0);
        let events = history.range(channel, since).await?;
        if let Some(first) = events.first() {
            if first.id > since + 1 {
                warn!(
                    channel = %channel,
                    since,
                    oldest = first.id,
                    "resume point predates retained history, replay is partial"
                );
                partial = true;
            }
        }
        replayed.extend(events);
    }
    Ok((replayed, partial))
}

/// Unregisters the subscription from every channel when the stream goes away
struct SessionGuard {
    hub: BroadcastHub,
    channels: Vec<String>,
    subscriber_id: String,
    cancel: CancellationToken,
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        self.cancel.cancel();
        for channel in &self.channels {
            self.hub.unregister(channel, &self.subscriber_id);
        }
        debug!(subscriber = %self.subscriber_id, "subscription closed");
    }
}

/// Ordered event stream for one subscription
///
/// Replayed history is emitted first (oldest to newest), then live
/// deliveries in arrival order; an event is never emitted twice across the
/// replay/live boundary. The stream ends when the hub drops the
/// subscription; dropping it unregisters from all channels in the same
/// step.
pub struct EventStream {
    inner: Pin<Box<dyn Stream<Item = Event> + Send>>,
    cancelled: Pin<Box<WaitForCancellationFutureOwned>>,
    partial_history: bool,
    done: bool,
    _guard: SessionGuard,
}

impl std::fmt::Debug for EventStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventStream")
            .field("partial_history", &self.partial_history)
            .field("done", &self.done)
            .finish_non_exhaustive()
    }
}

impl EventStream {
    /// Open a session: register on every channel, drain history if a
    /// resume point was given, then go live
    ///
    /// `channels` must already be validated and deduplicated. Hub
    /// registration happens before the drain so nothing published in
    /// between is missed; anything seen by both paths is filtered below.
    pub(crate) async fn open<H: EventHistory>(
        history: &H,
        hub: &BroadcastHub,
        channels: Vec<String>,
        resume: Option<ResumePoint>,
    ) -> Result<Self> {
        let (subscriber, receiver) = Subscriber::new();
        let cancel = subscriber.cancellation();
        for channel in &channels {
            hub.register(channel, &subscriber);
        }
        let guard = SessionGuard {
            hub: hub.clone(),
            channels: channels.clone(),
            subscriber_id: subscriber.id.clone(),
            cancel: cancel.clone(),
        };

        // A failed drain drops the guard, which unregisters everything:
        // the session closes rather than serving a stream with unknown gaps.
        let (replayed, partial_history) = match &resume {
            Some(resume) => drain_history(history, &channels, resume).await?,
            None => (Vec::new(), false),
        };

        // Per-channel high-water mark of everything already accounted for;
        // live deliveries at or below it were replayed and are discarded.
        let mut watermark: HashMap<String, u64> = HashMap::new();
        if let Some(resume) = &resume {
            for (channel, id) in resume {
                watermark.insert(channel.clone(), *id);
            }
        }
        for event in &replayed {
            let mark = watermark.entry(event.channel.clone()).or_insert(0);
            *mark = (*mark).max(event.id);
        }

        let live = ReceiverStream::new(receiver).filter(move |event: &Event| {
            match watermark.get(&event.channel) {
                Some(mark) => event.id > *mark,
                None => true,
            }
        });
        let inner = stream::iter(replayed).chain(live);

        debug!(
            subscriber = %subscriber.id,
            channels = ?guard.channels,
            resumed = resume.is_some(),
            partial_history,
            "subscription opened"
        );

        Ok(Self {
            inner: Box::pin(inner),
            cancelled: Box::pin(cancel.cancelled_owned()),
            partial_history,
            done: false,
            _guard: guard,
        })
    }

    /// True when a resume id predated the retained history window and the
    /// replay could only start from the oldest retained entry
    pub fn partial_history(&self) -> bool {
        self.partial_history
    }
}

impl Stream for EventStream {
    type Item = Event;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Event>> {
        let this = self.get_mut();
        if this.done {
            return Poll::Ready(None);
        }
        if this.cancelled.as_mut().poll(cx).is_ready() {
            this.done = true;
            return Poll::Ready(None);
        }
        match this.inner.as_mut().poll_next(cx) {
            Poll::Ready(None) => {
                this.done = true;
                Poll::Ready(None)
            }
            other => other,
        }
    }
}
