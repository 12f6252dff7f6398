//! Fan-out of new candidates to live subscribers.
//!
//! Each subscriber owns a bounded `mpsc` queue. Publishing never waits: a
//! full queue drops the event for that subscriber only, a closed queue is
//! pruned. The registry mutex is held just long enough to copy or edit the
//! subscriber map, never across an `.await`.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError, Weak};

use futures::Stream;
use tokio::sync::mpsc::{self, error::TrySendError};

use crate::repository::Candidate;

pub const DEFAULT_SUBSCRIBER_QUEUE: usize = 100;

#[derive(Debug)]
struct Registry {
    next_id: AtomicU64,
    capacity: usize,
    subscribers: Mutex<HashMap<u64, mpsc::Sender<Candidate>>>,
}

impl Registry {
    fn lock(&self) -> MutexGuard<'_, HashMap<u64, mpsc::Sender<Candidate>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Cheap to clone; all clones share one subscriber registry.
#[derive(Debug, Clone)]
pub struct EventBroadcaster {
    registry: Arc<Registry>,
}

impl Default for EventBroadcaster {
    fn default() -> Self {
        Self::new(DEFAULT_SUBSCRIBER_QUEUE)
    }
}

impl EventBroadcaster {
    pub fn new(capacity: usize) -> Self {
        Self {
            registry: Arc::new(Registry {
                next_id: AtomicU64::new(1),
                capacity: capacity.max(1),
                subscribers: Mutex::new(HashMap::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let (tx, rx) = mpsc::channel(self.registry.capacity);
        let id = self.registry.next_id.fetch_add(1, Ordering::Relaxed);
        self.registry.lock().insert(id, tx);
        tracing::debug!(subscriber = id, "subscriber added");

        Subscription {
            id,
            receiver: rx,
            registry: Arc::downgrade(&self.registry),
        }
    }

    /// Remove a subscriber. Returns `false` if it was already gone.
    pub fn unsubscribe(&self, id: u64) -> bool {
        self.registry.lock().remove(&id).is_some()
    }

    /// Offer `candidate` to every subscriber; returns how many accepted it.
    pub fn publish(&self, candidate: &Candidate) -> usize {
        let targets: Vec<(u64, mpsc::Sender<Candidate>)> = self
            .registry
            .lock()
            .iter()
            .map(|(id, tx)| (*id, tx.clone()))
            .collect();

        let mut delivered = 0;
        let mut closed = Vec::new();
        for (id, tx) in targets {
            match tx.try_send(candidate.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    tracing::debug!(
                        subscriber = id,
                        code = %candidate.code,
                        "subscriber queue full, event dropped"
                    );
                }
                Err(TrySendError::Closed(_)) => closed.push(id),
            }
        }

        if !closed.is_empty() {
            let mut subscribers = self.registry.lock();
            for id in closed {
                subscribers.remove(&id);
            }
        }

        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.registry.lock().len()
    }

    /// Drop every subscriber queue so open streams end. Used at shutdown.
    pub fn close_all(&self) -> usize {
        let mut subscribers = self.registry.lock();
        let closed = subscribers.len();
        subscribers.clear();
        closed
    }
}

/// Receiving end of one subscription. Dropping it unsubscribes.
#[derive(Debug)]
pub struct Subscription {
    id: u64,
    receiver: mpsc::Receiver<Candidate>,
    registry: Weak<Registry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    pub async fn recv(&mut self) -> Option<Candidate> {
        self.receiver.recv().await
    }

    pub fn try_recv(&mut self) -> Option<Candidate> {
        self.receiver.try_recv().ok()
    }

    /// Stream of candidates; the subscription lives as long as the stream.
    pub fn into_stream(self) -> impl Stream<Item = Candidate> + Send {
        futures::stream::unfold(self, |mut subscription| async move {
            let candidate = subscription.recv().await?;
            Some((candidate, subscription))
        })
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.lock().remove(&self.id);
            tracing::debug!(subscriber = self.id, "subscriber removed");
        }
    }
}
