//! Fan-out of telemetry messages to live subscribers.
//!
//! Each subscriber owns the receiving half of a bounded channel; the registry
//! keeps the sending halves. Broadcasting works on a snapshot of the registry
//! so connects and disconnects never wait on a slow send.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use futures::future::join_all;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Messages buffered per subscriber before sends start to wait.
pub const SUBSCRIBER_BUFFER: usize = 16;

pub const DEFAULT_SEND_TIMEOUT: Duration = Duration::from_millis(250);

pub type SubscriberId = u64;

/// Receiving end handed to a newly registered subscriber.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriberId,
    pub receiver: mpsc::Receiver<Arc<str>>,
}

#[derive(Debug, Default)]
struct RegistryInner {
    next_id: SubscriberId,
    subscribers: HashMap<SubscriberId, mpsc::Sender<Arc<str>>>,
    closed: bool,
}

/// The set of live subscribers.
#[derive(Debug)]
pub struct SubscriberRegistry {
    inner: Mutex<RegistryInner>,
    buffer: usize,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::with_buffer(SUBSCRIBER_BUFFER)
    }

    pub fn with_buffer(buffer: usize) -> Self {
        Self {
            inner: Mutex::new(RegistryInner::default()),
            buffer: buffer.max(1),
        }
    }

    fn lock(&self) -> MutexGuard<'_, RegistryInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Add a subscriber. Returns None once the registry has been closed.
    pub fn register(&self) -> Option<Subscription> {
        let (tx, receiver) = mpsc::channel(self.buffer);
        let mut inner = self.lock();
        if inner.closed {
            return None;
        }

        let id = inner.next_id;
        inner.next_id += 1;
        inner.subscribers.insert(id, tx);
        debug!("Subscriber {id} registered ({} live)", inner.subscribers.len());
        Some(Subscription { id, receiver })
    }

    /// Remove a subscriber. Returns false if it was already gone.
    pub fn deregister(&self, id: SubscriberId) -> bool {
        let mut inner = self.lock();
        let removed = inner.subscribers.remove(&id).is_some();
        if removed {
            debug!("Subscriber {id} deregistered ({} live)", inner.subscribers.len());
        }
        removed
    }

    /// Copy of the current senders.
    pub fn snapshot(&self) -> Vec<(SubscriberId, mpsc::Sender<Arc<str>>)> {
        self.lock()
            .subscribers
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().subscribers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Drop every sender and refuse new registrations. Subscribers see their
    /// receiver end once buffered messages are drained.
    pub fn close_all(&self) {
        let mut inner = self.lock();
        inner.closed = true;
        let count = inner.subscribers.len();
        inner.subscribers.clear();
        info!("Closed subscriber registry ({count} subscribers disconnected)");
    }
}

impl Default for SubscriberRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Result of one broadcast.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BroadcastOutcome {
    pub delivered: usize,
    pub dropped: usize,
}

enum SendFailure {
    Closed,
    TimedOut,
}

/// Sends each message to every registered subscriber with a per-send bound.
#[derive(Debug, Clone)]
pub struct Broadcaster {
    registry: Arc<SubscriberRegistry>,
    send_timeout: Duration,
}

impl Broadcaster {
    pub fn new(registry: Arc<SubscriberRegistry>, send_timeout: Duration) -> Self {
        Self {
            registry,
            send_timeout,
        }
    }

    pub fn registry(&self) -> &Arc<SubscriberRegistry> {
        &self.registry
    }

    /// Send `message` to all current subscribers concurrently.
    ///
    /// Subscribers that are closed or do not accept the message within the
    /// send timeout are deregistered. Others are unaffected.
    pub async fn broadcast(&self, message: Arc<str>) -> BroadcastOutcome {
        let snapshot = self.registry.snapshot();
        if snapshot.is_empty() {
            return BroadcastOutcome::default();
        }

        let sends = snapshot.into_iter().map(|(id, tx)| {
            let message = message.clone();
            async move {
                if tx.is_closed() {
                    return (id, Err(SendFailure::Closed));
                }
                let send = tokio::time::timeout(self.send_timeout, tx.send(message));
                let result = match send.await {
                    Ok(Ok(())) => Ok(()),
                    Ok(Err(_)) => Err(SendFailure::Closed),
                    Err(_) => Err(SendFailure::TimedOut),
                };
                (id, result)
            }
        });

        let mut outcome = BroadcastOutcome::default();
        for (id, result) in join_all(sends).await {
            match result {
                Ok(()) => outcome.delivered += 1,
                Err(failure) => {
                    match failure {
                        SendFailure::Closed => debug!("Subscriber {id} disconnected"),
                        SendFailure::TimedOut => warn!(
                            "Subscriber {id} did not accept a message within {:?}, dropping",
                            self.send_timeout
                        ),
                    }
                    self.registry.deregister(id);
                    outcome.dropped += 1;
                }
            }
        }
        outcome
    }
}
