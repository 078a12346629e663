//! Listener bus for operation lifecycle events.
//!
//! Subscriptions live in a copy-on-write list behind `ArcSwap`: dispatch
//! loads the current list without locking, and (un)subscribe publishes a new
//! list. A listener that errors or panics is logged and skipped; delivery to
//! the remaining listeners continues and the triggering call is unaffected.
//!
//! Events are dispatched after the registry has released its locks, on the
//! thread that made the transition. Events raised by one thread arrive in
//! the order that thread made them. Transitions of the same operation made
//! by different threads (a worker completing while a request thread
//! cancels) may reach listeners in either order, and a REGISTERED event can
//! trail a CANCELLED or COMPLETED raised by another thread that found the
//! operation first. Each event's snapshot is read when the event is
//! dispatched, so it always includes its own transition; consumers that
//! need the latest state should go by the snapshot's `canceled`, `finished`
//! and `lastUpdateTime` fields rather than by arrival order.

use std::fmt;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use arc_swap::ArcSwap;
use longops_core::{EventType, EventTypes, OperationEvent};
use tracing::{error, warn};

use crate::operation::Operation;

/// Receiver of operation lifecycle events.
///
/// Called synchronously on the thread that caused the transition, so
/// implementations should hand long work off elsewhere.
pub trait OperationListener: Send + Sync {
    fn receive(&self, event: &OperationEvent) -> anyhow::Result<()>;
}

impl<F> OperationListener for F
where
    F: Fn(&OperationEvent) -> anyhow::Result<()> + Send + Sync,
{
    fn receive(&self, event: &OperationEvent) -> anyhow::Result<()> {
        self(event)
    }
}

struct Subscription {
    listener: Arc<dyn OperationListener>,
    event_types: EventTypes,
    code_prefix: String,
}

impl Subscription {
    fn matches(&self, event_type: EventType, code: &str) -> bool {
        self.event_types.contains(event_type) && code.starts_with(&self.code_prefix)
    }

    fn is_for(&self, listener: &Arc<dyn OperationListener>) -> bool {
        std::ptr::addr_eq(Arc::as_ptr(&self.listener), Arc::as_ptr(listener))
    }

    fn deliver(&self, event: &OperationEvent) -> bool {
        match catch_unwind(AssertUnwindSafe(|| self.listener.receive(event))) {
            Ok(Ok(())) => true,
            Ok(Err(err)) => {
                warn!(
                    event = %event.event_type,
                    operation = %event.operation.identifier,
                    code = %event.operation.code,
                    error = %err,
                    "operation listener failed"
                );
                false
            }
            Err(payload) => {
                error!(
                    event = %event.event_type,
                    operation = %event.operation.identifier,
                    code = %event.operation.code,
                    panic = %panic_message(payload.as_ref()),
                    "operation listener panicked"
                );
                false
            }
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// Fan-out of lifecycle events to subscribed listeners, in subscription order.
pub struct ListenerBus {
    subscriptions: ArcSwap<Vec<Arc<Subscription>>>,
}

impl ListenerBus {
    #[must_use]
    pub fn new() -> Self {
        Self {
            subscriptions: ArcSwap::from_pointee(Vec::new()),
        }
    }

    /// Subscribes `listener` to `event_types` for operations whose code
    /// starts with `code_prefix` (empty matches every code).
    ///
    /// Subscribing a listener that is already registered replaces its
    /// registration in place, so it keeps its dispatch position and still
    /// receives each event once.
    pub fn subscribe(
        &self,
        listener: Arc<dyn OperationListener>,
        event_types: impl Into<EventTypes>,
        code_prefix: impl Into<String>,
    ) {
        let subscription = Arc::new(Subscription {
            listener,
            event_types: event_types.into(),
            code_prefix: code_prefix.into(),
        });
        self.subscriptions.rcu(|current| {
            let mut next: Vec<Arc<Subscription>> = current.iter().cloned().collect();
            match next.iter().position(|s| s.is_for(&subscription.listener)) {
                Some(index) => next[index] = Arc::clone(&subscription),
                None => next.push(Arc::clone(&subscription)),
            }
            next
        });
    }

    /// Removes `listener`. Returns `false` if it was not subscribed.
    pub fn unsubscribe(&self, listener: &Arc<dyn OperationListener>) -> bool {
        let previous = self.subscriptions.rcu(|current| {
            current
                .iter()
                .filter(|s| !s.is_for(listener))
                .cloned()
                .collect::<Vec<_>>()
        });
        previous.iter().any(|s| s.is_for(listener))
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.subscriptions.load().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Delivers `event_type` for `operation` to every matching listener.
    ///
    /// The snapshot is taken only if at least one listener matches. Returns
    /// the number of listeners that accepted the event without failing.
    pub fn dispatch(&self, event_type: EventType, operation: &Operation, occurred_at: u64) -> usize {
        let subscriptions = self.subscriptions.load_full();
        let mut event: Option<OperationEvent> = None;
        let mut delivered = 0;
        for subscription in subscriptions
            .iter()
            .filter(|s| s.matches(event_type, operation.code()))
        {
            let event = event.get_or_insert_with(|| OperationEvent {
                event_type,
                operation: operation.snapshot(),
                occurred_at,
            });
            if subscription.deliver(event) {
                delivered += 1;
            }
        }
        delivered
    }
}

impl Default for ListenerBus {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for ListenerBus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ListenerBus")
            .field("listeners", &self.len())
            .finish()
    }
}
