//! Per-connection streaming sessions.
//!
//! A session registers a channel when it opens, turns every payload it
//! receives into one SSE frame, and deregisters when it closes. Closing
//! happens on shutdown, when the registry drops the channel, or when the
//! session is dropped because the peer went away.

use bytes::Bytes;
use futures_util::stream::{self, Stream};
use murmur_protocol::codec;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{self, Instant, Interval, MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::registry::{SubscriberId, SubscriberRegistry, Subscription};

/// Session configuration.
#[derive(Debug, Clone, Default)]
pub struct SessionConfig {
    /// Interval between keep-alive comments on an idle stream. `None` sends none.
    pub keepalive: Option<Duration>,
}

/// Lifecycle of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    /// Not yet registered.
    Init,
    /// Registered and delivering.
    Streaming,
    /// Deregistered. Terminal.
    Closed,
}

enum Wake {
    Shutdown,
    Item(Option<Bytes>),
    Keepalive,
}

/// One subscriber's streaming loop.
#[derive(Debug)]
pub struct StreamingSession {
    registry: Arc<SubscriberRegistry>,
    subscription: Subscription,
    shutdown: CancellationToken,
    keepalive: Option<Interval>,
    state: SessionState,
}

impl StreamingSession {
    /// Register with the registry and start streaming.
    #[must_use]
    pub fn open(
        registry: Arc<SubscriberRegistry>,
        config: &SessionConfig,
        shutdown: CancellationToken,
    ) -> Self {
        // Init lasts only as long as registration.
        let subscription = registry.register();

        let keepalive = config
            .keepalive
            .filter(|period| !period.is_zero())
            .map(|period| {
                let mut interval = time::interval_at(Instant::now() + period, period);
                interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
                interval
            });

        debug!(subscriber = %subscription.id(), "Stream opened");

        Self {
            registry,
            subscription,
            shutdown,
            keepalive,
            state: SessionState::Streaming,
        }
    }

    /// The session's subscriber id.
    #[must_use]
    pub fn id(&self) -> SubscriberId {
        self.subscription.id()
    }

    /// Current lifecycle state.
    #[must_use]
    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Wait for the next frame to emit.
    ///
    /// Suspends until a payload arrives, the keep-alive interval elapses, or
    /// the session ends. Returns `None` once closed. Cancel safe: dropping the
    /// future loses no payload.
    pub async fn next_frame(&mut self) -> Option<Bytes> {
        if self.state != SessionState::Streaming {
            return None;
        }

        let wake = tokio::select! {
            biased;
            () = self.shutdown.cancelled() => Wake::Shutdown,
            item = self.subscription.recv() => Wake::Item(item),
            () = tick(self.keepalive.as_mut()) => Wake::Keepalive,
        };

        match wake {
            Wake::Item(Some(data)) => {
                if let Some(interval) = self.keepalive.as_mut() {
                    interval.reset();
                }
                Some(codec::event_frame(&data))
            }
            Wake::Keepalive => Some(codec::keepalive_frame()),
            Wake::Item(None) => {
                debug!(subscriber = %self.id(), "Channel closed by registry");
                self.close();
                None
            }
            Wake::Shutdown => {
                debug!(subscriber = %self.id(), "Stream ended by shutdown");
                self.close();
                None
            }
        }
    }

    /// Deregister and enter `Closed`. Later calls are no-ops.
    pub fn close(&mut self) {
        if self.state == SessionState::Closed {
            return;
        }
        self.state = SessionState::Closed;
        self.registry.deregister(self.id());
        debug!(subscriber = %self.id(), "Stream closed");
    }

    /// Adapt the session into a stream of frames.
    ///
    /// Dropping the stream closes the session.
    pub fn into_stream(self) -> impl Stream<Item = Bytes> + Send + 'static {
        stream::unfold(self, |mut session| async move {
            session.next_frame().await.map(|frame| (frame, session))
        })
    }
}

impl Drop for StreamingSession {
    fn drop(&mut self) {
        self.close();
    }
}

async fn tick(interval: Option<&mut Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending().await,
    }
}
