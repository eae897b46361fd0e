use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll, ready};

use tokio::runtime::Handle;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_stream::Stream;
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_util::sync::{CancellationToken, WaitForCancellationFutureOwned};
use tracing::{debug, instrument, trace, warn};

use crate::error::SessionError;
use crate::radio::{BroadcastCategory, BroadcastSink, RadioDriver, RawBroadcast, Registration};

type Projection<T> = Box<dyn FnMut(RawBroadcast) -> Option<T> + Send>;

/// A live multicast channel for one broadcast category.
///
/// Every subscriber owns an unbounded queue, so a slow reader never loses
/// events.
struct SharedChannel {
    generation: u64,
    subscribers: HashMap<u64, mpsc::UnboundedSender<RawBroadcast>>,
    _registration: Registration,
    pump: JoinHandle<()>,
}

impl SharedChannel {
    fn forward(&mut self, raw: &RawBroadcast) {
        self.subscribers
            .retain(|_, subscriber| subscriber.send(raw.clone()).is_ok());
    }
}

impl Drop for SharedChannel {
    fn drop(&mut self) {
        self.pump.abort();
    }
}

#[derive(Default)]
struct HubState {
    closed: bool,
    next_generation: u64,
    next_subscriber: u64,
    channels: HashMap<BroadcastCategory, SharedChannel>,
}

impl HubState {
    /// Removes the channel for `category` if it is still `generation`.
    fn release(&mut self, category: BroadcastCategory, generation: u64) -> Option<SharedChannel> {
        let current = self.channels.get(&category)?;
        if current.generation != generation {
            return None;
        }
        self.channels.remove(&category)
    }
}

fn lock(state: &Mutex<HubState>) -> MutexGuard<'_, HubState> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Reference-counted bridge from platform callbacks to multicast streams.
///
/// The driver listener for a category is registered on the first
/// subscription and released when the last subscriber drops. If the platform
/// side stops delivering, the category's streams end and the next
/// subscription registers afresh.
pub(crate) struct EventHub {
    driver: Arc<dyn RadioDriver>,
    compute: Handle,
    shutdown: CancellationToken,
    state: Arc<Mutex<HubState>>,
}

impl fmt::Debug for EventHub {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = lock(&self.state);
        f.debug_struct("EventHub")
            .field("closed", &state.closed)
            .field("categories", &state.channels.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl EventHub {
    pub(crate) fn new(
        driver: Arc<dyn RadioDriver>,
        compute: Handle,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            driver,
            compute,
            shutdown,
            state: Arc::new(Mutex::new(HubState::default())),
        }
    }

    /// Subscribes to one category, projecting raw broadcasts to `T`.
    ///
    /// Broadcasts for which `project` returns `None` are skipped.
    #[instrument(skip(self, project), level = "debug")]
    pub(crate) fn subscribe<T, F>(
        &self,
        category: BroadcastCategory,
        project: F,
    ) -> Result<EventStream<T>, SessionError>
    where
        F: FnMut(RawBroadcast) -> Option<T> + Send + 'static,
    {
        let mut state = lock(&self.state);
        if state.closed || self.shutdown.is_cancelled() {
            return Err(SessionError::SessionClosed);
        }

        let generation = match state.channels.get(&category) {
            Some(channel) => channel.generation,
            None => {
                let (sink_sender, sink_receiver) = mpsc::unbounded_channel();
                let registration = self
                    .driver
                    .register(category, BroadcastSink::new(sink_sender))?;

                state.next_generation += 1;
                let generation = state.next_generation;
                let pump = self.compute.spawn(pump(
                    Arc::clone(&self.state),
                    category,
                    generation,
                    sink_receiver,
                ));
                state.channels.insert(
                    category,
                    SharedChannel {
                        generation,
                        subscribers: HashMap::new(),
                        _registration: registration,
                        pump,
                    },
                );
                debug!(%category, "platform listener registered");
                generation
            }
        };

        state.next_subscriber += 1;
        let id = state.next_subscriber;
        let (sender, receiver) = mpsc::unbounded_channel();
        if let Some(channel) = state.channels.get_mut(&category) {
            channel.subscribers.insert(id, sender);
        }

        Ok(EventStream {
            inner: UnboundedReceiverStream::new(receiver),
            project: Box::new(project),
            shutdown: Box::pin(self.shutdown.clone().cancelled_owned()),
            finished: false,
            guard: SubscriptionGuard {
                state: Arc::clone(&self.state),
                category,
                generation,
                id,
            },
        })
    }

    /// Ends every channel and rejects later subscriptions.
    pub(crate) fn close(&self) {
        let channels = {
            let mut state = lock(&self.state);
            state.closed = true;
            std::mem::take(&mut state.channels)
        };
        debug!(categories = channels.len(), "releasing platform listeners");
        drop(channels);
    }

    #[cfg(test)]
    fn subscriber_count(&self, category: BroadcastCategory) -> usize {
        lock(&self.state)
            .channels
            .get(&category)
            .map_or(0, |channel| channel.subscribers.len())
    }
}

async fn pump(
    state: Arc<Mutex<HubState>>,
    category: BroadcastCategory,
    generation: u64,
    mut receiver: mpsc::UnboundedReceiver<RawBroadcast>,
) {
    while let Some(raw) = receiver.recv().await {
        trace!(%category, ?raw, "re-emitting broadcast");
        let mut hub = lock(&state);
        match hub.channels.get_mut(&category) {
            Some(channel) if channel.generation == generation => channel.forward(&raw),
            _ => return,
        }
    }

    let released = lock(&state).release(category, generation);
    if released.is_some() {
        warn!(%category, "platform listener stopped; ending its streams");
    }
}

struct SubscriptionGuard {
    state: Arc<Mutex<HubState>>,
    category: BroadcastCategory,
    generation: u64,
    id: u64,
}

impl Drop for SubscriptionGuard {
    fn drop(&mut self) {
        let released = {
            let mut state = lock(&self.state);
            let Some(channel) = state.channels.get_mut(&self.category) else {
                return;
            };
            if channel.generation != self.generation {
                return;
            }
            channel.subscribers.remove(&self.id);
            if channel.subscribers.is_empty() {
                state.release(self.category, self.generation)
            } else {
                None
            }
        };
        if released.is_some() {
            debug!(category = %self.category, "platform listener released");
        }
    }
}

/// A typed, multicast event stream.
///
/// Dropping the stream detaches this subscriber only. The stream ends when
/// the owning session shuts down or the platform stops delivering the
/// category.
pub struct EventStream<T> {
    inner: UnboundedReceiverStream<RawBroadcast>,
    project: Projection<T>,
    shutdown: Pin<Box<WaitForCancellationFutureOwned>>,
    finished: bool,
    guard: SubscriptionGuard,
}

impl<T> fmt::Debug for EventStream<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EventStream")
            .field("category", &self.guard.category)
            .field("finished", &self.finished)
            .finish_non_exhaustive()
    }
}

impl<T> Stream for EventStream<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        if this.finished {
            return Poll::Ready(None);
        }
        if this.shutdown.as_mut().poll(cx).is_ready() {
            this.finished = true;
            return Poll::Ready(None);
        }

        loop {
            match ready!(Pin::new(&mut this.inner).poll_next(cx)) {
                Some(raw) => {
                    if let Some(item) = (this.project)(raw) {
                        return Poll::Ready(Some(item));
                    }
                }
                None => {
                    this.finished = true;
                    return Poll::Ready(None);
                }
            }
        }
    }
}
