//! In-process fan-out of committed ledger events.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError, mpsc};

use thiserror::Error;

use crate::bus::{EventBus, Subscription};

#[derive(Debug, Error)]
pub enum InMemoryBusError {
    /// A publisher panicked while holding the subscriber list.
    #[error("event bus subscriber list is poisoned")]
    Poisoned,
}

/// Delivers every published message to every live [`Subscription`].
///
/// Publishing never blocks on a subscriber: each one owns an unbounded
/// channel, and subscriptions that were dropped are pruned on the next
/// publish. The executor publishes only after commit, so a subscriber sees
/// each committed transfer exactly once per process.
#[derive(Debug)]
pub struct InMemoryEventBus<M> {
    subscribers: Mutex<Vec<mpsc::Sender<M>>>,
    published: AtomicU64,
}

impl<M> InMemoryEventBus<M> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Live subscriptions as of the last publish.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers().len()
    }

    /// Messages accepted since the bus was created.
    pub fn published_count(&self) -> u64 {
        self.published.load(Ordering::Relaxed)
    }

    // A poisoned list is still a valid list.
    fn subscribers(&self) -> MutexGuard<'_, Vec<mpsc::Sender<M>>> {
        self.subscribers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}

impl<M> Default for InMemoryEventBus<M> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            published: AtomicU64::new(0),
        }
    }
}

impl<M> EventBus<M> for InMemoryEventBus<M>
where
    M: Clone + Send + 'static,
{
    type Error = InMemoryBusError;

    fn publish(&self, message: M) -> Result<(), Self::Error> {
        let mut subscribers = self
            .subscribers
            .lock()
            .map_err(|_| InMemoryBusError::Poisoned)?;

        subscribers.retain(|tx| tx.send(message.clone()).is_ok());
        self.published.fetch_add(1, Ordering::Relaxed);
        tracing::trace!(subscribers = subscribers.len(), "ledger event delivered");

        Ok(())
    }

    fn subscribe(&self) -> Subscription<M> {
        let (tx, rx) = mpsc::channel();
        self.subscribers().push(tx);
        Subscription::new(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn every_subscriber_receives_each_message() {
        let bus = InMemoryEventBus::<u32>::new();
        let a = bus.subscribe();
        let b = bus.subscribe();

        bus.publish(7).unwrap();
        bus.publish(8).unwrap();

        assert_eq!(a.drain(), vec![7, 8]);
        assert_eq!(b.drain(), vec![7, 8]);
        assert_eq!(bus.published_count(), 2);
    }

    #[test]
    fn dropped_subscribers_are_pruned() {
        let bus = InMemoryEventBus::<u32>::new();
        let kept = bus.subscribe();
        drop(bus.subscribe());

        bus.publish(1).unwrap();

        assert_eq!(bus.subscriber_count(), 1);
        assert_eq!(kept.try_recv().unwrap(), 1);
    }

    #[test]
    fn publishing_without_subscribers_is_accepted() {
        let bus = InMemoryEventBus::<&'static str>::new();
        bus.publish("lost").unwrap();
        assert_eq!(bus.published_count(), 1);
        assert_eq!(bus.subscriber_count(), 0);
    }
}
