//! Subscriber registry.
//!
//! Handlers are called in registration order. A panicking handler is caught
//! and counted; delivery continues with the next one.

use livefeed_core::UpdateEvent;
use livefeed_telemetry::Metrics;
use parking_lot::RwLock;
use std::any::Any;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};
use tracing::{debug, error};

/// Subscriber callback.
pub type Handler = Arc<dyn Fn(&UpdateEvent) + Send + Sync>;

/// Identifies one registration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(u64);

#[derive(Default)]
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    handlers: RwLock<Vec<(SubscriberId, Handler)>>,
    /// Set by `close`; checked before every handler call.
    closed: AtomicBool,
}

impl SubscriberRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(&self, handler: Handler) -> SubscriberId {
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let mut handlers = self.handlers.write();
        handlers.push((id, handler));
        Metrics::subscribers(handlers.len());
        debug!(id = id.0, total = handlers.len(), "Subscriber added");
        id
    }

    /// Remove one registration. Returns false if it was already gone.
    pub fn remove(&self, id: SubscriberId) -> bool {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|(existing, _)| *existing != id);
        Metrics::subscribers(handlers.len());
        handlers.len() != before
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }

    /// Call every handler with `event`. Returns how many completed without panicking.
    ///
    /// Works on a snapshot, so handlers may subscribe or unsubscribe while
    /// being called without deadlocking.
    pub fn dispatch(&self, event: &UpdateEvent) -> usize {
        let snapshot: Vec<(SubscriberId, Handler)> = self.handlers.read().clone();
        let mut delivered = 0;

        for (id, handler) in snapshot {
            if self.is_closed() {
                break;
            }
            match catch_unwind(AssertUnwindSafe(|| handler(event))) {
                Ok(()) => delivered += 1,
                Err(payload) => {
                    Metrics::subscriber_panic();
                    error!(
                        subscriber = id.0,
                        kind = %event.kind,
                        panic = %panic_message(payload.as_ref()),
                        "Subscriber panicked"
                    );
                }
            }
        }

        delivered
    }

    /// Stop all delivery and drop every handler.
    pub fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        let mut handlers = self.handlers.write();
        handlers.clear();
        Metrics::subscribers(0);
    }

    /// Accept deliveries again after `close`.
    pub fn reopen(&self) {
        self.closed.store(false, Ordering::SeqCst);
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.as_str()
    } else {
        "non-string panic payload"
    }
}

/// Handle returned by `subscribe`.
///
/// Dropping it keeps the subscription; call [`Unsubscribe::unsubscribe`] to remove it.
#[derive(Debug)]
#[must_use = "dropping the handle leaves the subscriber registered forever"]
pub struct Unsubscribe {
    registry: Weak<SubscriberRegistry>,
    id: SubscriberId,
}

impl Unsubscribe {
    pub(crate) fn new(registry: &Arc<SubscriberRegistry>, id: SubscriberId) -> Self {
        Self {
            registry: Arc::downgrade(registry),
            id,
        }
    }

    pub fn id(&self) -> SubscriberId {
        self.id
    }

    /// Remove exactly this subscriber.
    pub fn unsubscribe(self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}
