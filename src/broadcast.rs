//! Console fan-out from one process to many live subscribers.
//!
//! Each server has a feed of subscribers. A broadcaster run loop reads one
//! start generation's console and offers every line to every subscriber
//! with a non-blocking send: a subscriber whose buffer is full misses that
//! line, everyone else still gets it and the process is never stalled.
//!
//! There is no history replay. A subscriber receives exactly the lines
//! broadcast after it subscribed, in emission order.
//!
//! Every subscriber follows a start generation. When a generation's console
//! ends (the process exited), the subscribers following it or an earlier one
//! are closed: their receivers yield the lines still buffered and then
//! `None`. Subscribers waiting for the next generation, e.g. a client
//! reconnecting during a restart, are left alone, and so is everyone once a
//! newer generation has already started.

use crate::server::ServerId;
use futures::Stream;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use tokio::sync::mpsc::error::TrySendError;
use tokio::task::JoinHandle;
use uuid::Uuid;

/// Identifies one subscription
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(Uuid);

impl SubscriberId {
    fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for SubscriberId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Read side of a subscriber channel.
#[derive(Debug)]
pub struct ConsoleSubscription {
    server_id: ServerId,
    id: SubscriberId,
    receiver: mpsc::Receiver<String>,
}

impl ConsoleSubscription {
    /// Subscription id, used to unsubscribe
    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Server this subscription listens to
    pub fn server_id(&self) -> ServerId {
        self.server_id
    }

    /// Receive the next line, `None` once the subscription is closed and drained
    pub async fn recv(&mut self) -> Option<String> {
        self.receiver.recv().await
    }

    /// Receive a line if one is buffered
    pub fn try_recv(&mut self) -> Option<String> {
        self.receiver.try_recv().ok()
    }

    /// Turn the subscription into a stream of lines, e.g. for a web socket writer
    pub fn into_stream(mut self) -> impl Stream<Item = String> {
        async_stream::stream! {
            while let Some(line) = self.receiver.recv().await {
                yield line;
            }
        }
    }
}

struct Subscriber {
    id: SubscriberId,
    sender: mpsc::Sender<String>,
    /// Generation this subscriber follows
    generation: u64,
}

#[derive(Default)]
struct Feed {
    generation: u64,
    subscribers: Vec<Subscriber>,
}

/// Fans console lines out to per-server subscriber sets.
pub struct ConsoleBroadcaster {
    /// Capacity of each subscriber channel
    capacity: usize,
    /// Subscribers by server
    feeds: RwLock<HashMap<ServerId, Feed>>,
}

impl ConsoleBroadcaster {
    /// Create a broadcaster whose subscriber channels hold `capacity` lines
    pub fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            feeds: RwLock::new(HashMap::new()),
        }
    }

    /// Register a new subscriber for the current generation of `server_id`
    pub fn subscribe(&self, server_id: ServerId) -> ConsoleSubscription {
        self.register(server_id, None)
    }

    /// Register a new subscriber following `generation` of `server_id`.
    ///
    /// A subscriber for a generation that has not started yet survives the
    /// end of the current one.
    pub fn subscribe_from(&self, server_id: ServerId, generation: u64) -> ConsoleSubscription {
        self.register(server_id, Some(generation))
    }

    fn register(&self, server_id: ServerId, generation: Option<u64>) -> ConsoleSubscription {
        let (sender, receiver) = mpsc::channel(self.capacity);
        let id = SubscriberId::new();

        match self.feeds.write() {
            Ok(mut feeds) => {
                let feed = feeds.entry(server_id).or_default();
                let generation = generation.unwrap_or(feed.generation);
                feed.subscribers.push(Subscriber {
                    id,
                    sender,
                    generation,
                });
                tracing::debug!(server_id = %server_id, subscriber = %id, generation, "Console subscriber added");
            }
            // Dropping the sender hands back an already closed subscription
            Err(_) => tracing::error!(server_id = %server_id, "Console feed lock poisoned"),
        }

        ConsoleSubscription {
            server_id,
            id,
            receiver,
        }
    }

    /// Remove and close a subscription.
    ///
    /// Returns whether it was still registered; unknown ids are ignored.
    pub fn unsubscribe(&self, server_id: ServerId, subscriber: SubscriberId) -> bool {
        let Ok(mut feeds) = self.feeds.write() else {
            return false;
        };
        let Some(feed) = feeds.get_mut(&server_id) else {
            return false;
        };

        let before = feed.subscribers.len();
        feed.subscribers.retain(|s| s.id != subscriber);
        let removed = feed.subscribers.len() != before;
        if removed {
            tracing::debug!(server_id = %server_id, subscriber = %subscriber, "Console subscriber removed");
        }
        removed
    }

    /// Number of registered subscribers of a server
    pub fn subscriber_count(&self, server_id: ServerId) -> usize {
        self.feeds
            .read()
            .ok()
            .and_then(|feeds| feeds.get(&server_id).map(|feed| feed.subscribers.len()))
            .unwrap_or(0)
    }

    /// Offer one line to every subscriber of a server without blocking.
    ///
    /// Returns the number of subscribers the line was delivered to.
    pub fn broadcast(&self, server_id: ServerId, line: &str) -> usize {
        let mut delivered = 0;
        let mut gone = Vec::new();

        if let Ok(feeds) = self.feeds.read() {
            if let Some(feed) = feeds.get(&server_id) {
                for subscriber in &feed.subscribers {
                    match subscriber.sender.try_send(line.to_string()) {
                        Ok(()) => delivered += 1,
                        Err(TrySendError::Full(_)) => {
                            tracing::trace!(server_id = %server_id, subscriber = %subscriber.id, "Subscriber full, line dropped");
                        }
                        Err(TrySendError::Closed(_)) => gone.push(subscriber.id),
                    }
                }
            }
        }

        // Receivers dropped without unsubscribing
        for id in gone {
            self.unsubscribe(server_id, id);
        }

        delivered
    }

    /// Close every subscription of a server
    pub fn close(&self, server_id: ServerId) {
        if let Ok(mut feeds) = self.feeds.write() {
            if let Some(feed) = feeds.get_mut(&server_id) {
                let closed = feed.subscribers.len();
                feed.subscribers.clear();
                tracing::debug!(server_id = %server_id, closed, "Console subscribers closed");
            }
        }
    }

    /// Forget a server entirely, closing its subscriptions
    pub fn remove(&self, server_id: ServerId) {
        if let Ok(mut feeds) = self.feeds.write() {
            feeds.remove(&server_id);
        }
    }

    fn begin(&self, server_id: ServerId, generation: u64) {
        if let Ok(mut feeds) = self.feeds.write() {
            let feed = feeds.entry(server_id).or_default();
            feed.generation = feed.generation.max(generation);
        }
    }

    /// Start the run loop for a freshly started process generation
    pub fn spawn(
        self: &Arc<Self>,
        server_id: ServerId,
        generation: u64,
        console: mpsc::Receiver<String>,
    ) -> JoinHandle<()> {
        self.begin(server_id, generation);
        let broadcaster = Arc::clone(self);
        tokio::spawn(async move { broadcaster.run(server_id, generation, console).await })
    }

    /// Forward `console` until it closes.
    async fn run(&self, server_id: ServerId, generation: u64, mut console: mpsc::Receiver<String>) {
        tracing::debug!(server_id = %server_id, generation, "Console broadcaster started");

        let mut lines = 0u64;
        while let Some(line) = console.recv().await {
            self.broadcast(server_id, &line);
            lines += 1;
        }

        if let Ok(mut feeds) = self.feeds.write() {
            if let Some(feed) = feeds.get_mut(&server_id) {
                if feed.generation == generation {
                    feed.subscribers.retain(|s| s.generation > generation);
                }
            }
        }

        tracing::debug!(server_id = %server_id, generation, lines, "Console broadcaster finished");
    }
}

impl fmt::Debug for ConsoleBroadcaster {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConsoleBroadcaster")
            .field("capacity", &self.capacity)
            .finish_non_exhaustive()
    }
}
