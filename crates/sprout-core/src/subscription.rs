//! Live listener handles
//!
//! Every stream in Sprout (auth state, connectivity, query snapshots) is
//! delivered through a [`Subscription`]: an unbounded channel receiver paired
//! with a cancellation hook that removes the sender from its registry.
//!
//! After [`Subscription::unsubscribe`] returns, the handle yields nothing
//! more, including events that were already queued.

use std::collections::HashMap;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};

use futures_util::Stream;
use tokio::sync::mpsc;

/// Identifier of a registered listener
pub type ListenerId = u64;

type CancelHook = Box<dyn FnOnce() + Send>;

/// Receiving end of a live listener
pub struct Subscription<T> {
    rx: mpsc::UnboundedReceiver<T>,
    cancel: Option<CancelHook>,
    closed: bool,
}

impl<T> Subscription<T> {
    /// Wrap a receiver; `cancel` runs exactly once, on the first unsubscribe
    pub fn new(rx: mpsc::UnboundedReceiver<T>, cancel: impl FnOnce() + Send + 'static) -> Self {
        Self {
            rx,
            cancel: Some(Box::new(cancel)),
            closed: false,
        }
    }

    /// Wait for the next event
    ///
    /// Returns `None` once unsubscribed or when the source has gone away.
    pub async fn recv(&mut self) -> Option<T> {
        if self.closed {
            return None;
        }
        self.rx.recv().await
    }

    /// Take the next event if one is already queued
    pub fn try_recv(&mut self) -> Option<T> {
        if self.closed {
            return None;
        }
        self.rx.try_recv().ok()
    }

    /// Stop listening
    ///
    /// Idempotent. Queued events are discarded.
    pub fn unsubscribe(&mut self) {
        if let Some(cancel) = self.cancel.take() {
            cancel();
        }
        if !self.closed {
            self.closed = true;
            self.rx.close();
            while self.rx.try_recv().is_ok() {}
        }
    }

    /// Whether `unsubscribe` has been called
    pub fn is_unsubscribed(&self) -> bool {
        self.closed
    }
}

impl<T> Drop for Subscription<T> {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

impl<T> Stream for Subscription<T> {
    type Item = T;

    fn poll_next(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<T>> {
        let this = self.get_mut();
        if this.closed {
            return Poll::Ready(None);
        }
        this.rx.poll_recv(cx)
    }
}

impl<T> std::fmt::Debug for Subscription<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("closed", &self.closed)
            .finish()
    }
}

struct Registry<T> {
    next_id: ListenerId,
    latest: T,
    senders: HashMap<ListenerId, mpsc::UnboundedSender<T>>,
}

/// Fan-out of a value stream to any number of subscribers
///
/// Remembers the latest value; new subscribers receive it immediately.
pub struct Broadcaster<T> {
    registry: Arc<Mutex<Registry<T>>>,
}

impl<T> Clone for Broadcaster<T> {
    fn clone(&self) -> Self {
        Self {
            registry: Arc::clone(&self.registry),
        }
    }
}

impl<T: Clone + Send + 'static> Broadcaster<T> {
    /// Create a broadcaster holding `initial` as the latest value
    pub fn new(initial: T) -> Self {
        Self {
            registry: Arc::new(Mutex::new(Registry {
                next_id: 0,
                latest: initial,
                senders: HashMap::new(),
            })),
        }
    }

    /// Latest emitted value
    pub fn latest(&self) -> T {
        self.lock().latest.clone()
    }

    /// Register a listener and send it the latest value
    pub fn subscribe(&self) -> Subscription<T> {
        let (tx, rx) = mpsc::unbounded_channel();
        let id = {
            let mut registry = self.lock();
            let id = registry.next_id;
            registry.next_id += 1;
            let _ = tx.send(registry.latest.clone());
            registry.senders.insert(id, tx);
            id
        };

        let weak = Arc::downgrade(&self.registry);
        Subscription::new(rx, move || {
            if let Some(registry) = weak.upgrade() {
                let mut registry = registry.lock().unwrap_or_else(|e| e.into_inner());
                registry.senders.remove(&id);
            }
        })
    }

    /// Record `value` as latest and send it to every listener
    pub fn emit(&self, value: T) {
        let mut registry = self.lock();
        registry.latest = value.clone();
        registry
            .senders
            .retain(|_, tx| tx.send(value.clone()).is_ok());
    }

    /// Number of registered listeners
    pub fn listener_count(&self) -> usize {
        self.lock().senders.len()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Registry<T>> {
        self.registry.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use futures_util::StreamExt;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn test_subscribe_receives_latest_immediately() {
        let broadcaster = Broadcaster::new(1u32);
        broadcaster.emit(2);

        let mut sub = broadcaster.subscribe();
        assert_eq!(sub.recv().await, Some(2));
        assert!(sub.try_recv().is_none());
    }

    #[tokio::test]
    async fn test_emit_reaches_all_listeners() {
        let broadcaster = Broadcaster::new(0u32);
        let mut a = broadcaster.subscribe();
        let mut b = broadcaster.subscribe();
        broadcaster.emit(7);

        assert_eq!(a.recv().await, Some(0));
        assert_eq!(a.recv().await, Some(7));
        assert_eq!(b.recv().await, Some(0));
        assert_eq!(b.recv().await, Some(7));
    }

    #[tokio::test]
    async fn test_unsubscribe_drops_queued_events() {
        let broadcaster = Broadcaster::new(0u32);
        let mut sub = broadcaster.subscribe();
        broadcaster.emit(1);
        broadcaster.emit(2);

        sub.unsubscribe();
        broadcaster.emit(3);

        assert!(sub.is_unsubscribed());
        assert_eq!(sub.recv().await, None);
        assert_eq!(sub.try_recv(), None);
        assert_eq!(broadcaster.listener_count(), 0);
    }

    #[test]
    fn test_unsubscribe_is_idempotent() {
        let calls = Arc::new(AtomicUsize::new(0));
        let (_tx, rx) = mpsc::unbounded_channel::<u32>();
        let counter = Arc::clone(&calls);
        let mut sub = Subscription::new(rx, move || {
            counter.fetch_add(1, Ordering::SeqCst);
        });

        sub.unsubscribe();
        sub.unsubscribe();
        drop(sub);

        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_drop_unregisters() {
        let broadcaster = Broadcaster::new(());
        let sub = broadcaster.subscribe();
        assert_eq!(broadcaster.listener_count(), 1);
        drop(sub);
        assert_eq!(broadcaster.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_stream_ends_after_unsubscribe() {
        let broadcaster = Broadcaster::new(5u32);
        let mut sub = broadcaster.subscribe();
        assert_eq!(sub.next().await, Some(5));

        sub.unsubscribe();
        assert_eq!(sub.next().await, None);
    }
}
