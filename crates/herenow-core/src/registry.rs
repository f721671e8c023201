//! Listener Registry / Dispatcher
//!
//! Fan-out of inbound messages to dynamically registered consumers.
//! `subscribe` hands back a `Subscription` disposer; `dispatch` invokes every
//! currently-registered handler synchronously, in unspecified order, with
//! per-listener fault isolation.

use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, Weak};

use tracing::warn;

use crate::envelope::InboundEnvelope;

type Handler = Arc<dyn Fn(&InboundEnvelope) + Send + Sync>;
type HandlerMap = Mutex<HashMap<u64, Handler>>;

// ----------------------------------------------------------------------------
// Listener Registry
// ----------------------------------------------------------------------------

/// Registry of inbound-message listeners owned by the connection manager
#[derive(Default)]
pub struct ListenerRegistry {
    handlers: Arc<HandlerMap>,
    next_token: AtomicU64,
}

impl ListenerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler for inbound messages.
    ///
    /// The returned `Subscription` is the only way to unregister; dropping
    /// it unregisters as well.
    pub fn subscribe<F>(&self, handler: F) -> Subscription
    where
        F: Fn(&InboundEnvelope) + Send + Sync + 'static,
    {
        let token = self.next_token.fetch_add(1, Ordering::Relaxed);
        lock_handlers(&self.handlers).insert(token, Arc::new(handler));
        Subscription {
            token,
            handlers: Arc::downgrade(&self.handlers),
        }
    }

    /// Dispatch a message to every currently-registered handler.
    ///
    /// A panicking handler is isolated: the fault is logged and delivery
    /// continues to the remaining handlers. Handlers registered or removed
    /// during a dispatch take effect for subsequent dispatches only.
    pub fn dispatch(&self, message: &InboundEnvelope) {
        let snapshot: Vec<Handler> = lock_handlers(&self.handlers).values().cloned().collect();
        for handler in snapshot {
            if catch_unwind(AssertUnwindSafe(|| handler(message))).is_err() {
                warn!("listener panicked while handling a message; continuing dispatch");
            }
        }
    }

    /// Number of currently-registered listeners
    pub fn len(&self) -> usize {
        lock_handlers(&self.handlers).len()
    }

    /// Whether no listener is registered
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

// A panicking handler can poison the map mutex; the map itself is never
// left mid-mutation, so recovering the guard is sound.
fn lock_handlers(handlers: &HandlerMap) -> MutexGuard<'_, HashMap<u64, Handler>> {
    handlers.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

// ----------------------------------------------------------------------------
// Subscription
// ----------------------------------------------------------------------------

/// Disposer handle returned by [`ListenerRegistry::subscribe`].
///
/// `unsubscribe` is idempotent and remains safe after the registry has been
/// discarded. Dropping the subscription unregisters the handler.
pub struct Subscription {
    token: u64,
    handlers: Weak<HandlerMap>,
}

impl Subscription {
    /// Unregister the handler; takes effect for subsequent dispatches only
    pub fn unsubscribe(&self) {
        if let Some(handlers) = self.handlers.upgrade() {
            lock_handlers(&handlers).remove(&self.token);
        }
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.unsubscribe();
    }
}

// ----------------------------------------------------------------------------
// Tests
// ----------------------------------------------------------------------------
