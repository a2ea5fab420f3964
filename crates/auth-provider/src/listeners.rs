//! Listener registry for auth-change events
//!
//! Providers keep an `AuthListeners` and hand out an `AuthSubscription` per
//! registered handler. Handlers run synchronously on the emitting task, in
//! registration order, and must not block: the coordinator's handler only
//! pushes the event onto a channel.

use std::sync::{Arc, Mutex, PoisonError, Weak};

use tracing::trace;

use crate::event::AuthChangeEvent;

/// Callback invoked for every auth-change event.
pub type AuthChangeHandler = Arc<dyn Fn(&AuthChangeEvent) + Send + Sync>;

#[derive(Default)]
struct ListenerTable {
    next_id: u64,
    handlers: Vec<(u64, AuthChangeHandler)>,
}

/// Registry of auth-change handlers.
#[derive(Clone, Default)]
pub struct AuthListeners {
    table: Arc<Mutex<ListenerTable>>,
}

impl AuthListeners {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a handler. It stays registered for the lifetime of the
    /// returned subscription.
    pub fn subscribe(&self, handler: AuthChangeHandler) -> AuthSubscription {
        let mut table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
        let id = table.next_id;
        table.next_id += 1;
        table.handlers.push((id, handler));
        trace!(listener_id = id, "auth listener registered");
        AuthSubscription {
            id,
            table: Arc::downgrade(&self.table),
        }
    }

    /// Deliver an event to every registered handler.
    ///
    /// The handler list is snapshotted before delivery so a handler may
    /// unsubscribe (or subscribe another) without deadlocking.
    pub fn emit(&self, event: &AuthChangeEvent) {
        let handlers: Vec<AuthChangeHandler> = {
            let table = self.table.lock().unwrap_or_else(PoisonError::into_inner);
            table.handlers.iter().map(|(_, h)| h.clone()).collect()
        };
        trace!(kind = event.kind.label(), listeners = handlers.len(), "emitting auth event");
        for handler in handlers {
            handler(event);
        }
    }

    pub fn len(&self) -> usize {
        self.table
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .handlers
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Handle for a registered auth-change handler. Dropping it unsubscribes.
pub struct AuthSubscription {
    id: u64,
    table: Weak<Mutex<ListenerTable>>,
}

impl AuthSubscription {
    /// Remove the handler. Equivalent to dropping the subscription.
    pub fn unsubscribe(self) {}
}

impl Drop for AuthSubscription {
    fn drop(&mut self) {
        if let Some(table) = self.table.upgrade() {
            let mut table = table.lock().unwrap_or_else(PoisonError::into_inner);
            table.handlers.retain(|(id, _)| *id != self.id);
            trace!(listener_id = self.id, "auth listener removed");
        }
    }
}

impl std::fmt::Debug for AuthSubscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthSubscription").field("id", &self.id).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::AuthChangeKind;

    fn recording_handler(log: Arc<Mutex<Vec<String>>>, name: &'static str) -> AuthChangeHandler {
        Arc::new(move |event: &AuthChangeEvent| {
            log.lock()
                .unwrap()
                .push(format!("{name}:{}", event.kind.label()));
        })
    }

    #[test]
    fn emit_reaches_handlers_in_registration_order() {
        let listeners = AuthListeners::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let _a = listeners.subscribe(recording_handler(log.clone(), "a"));
        let _b = listeners.subscribe(recording_handler(log.clone(), "b"));

        listeners.emit(&AuthChangeEvent::signed_out());
        listeners.emit(&AuthChangeEvent::new(AuthChangeKind::UserUpdated, None));

        assert_eq!(
            *log.lock().unwrap(),
            vec![
                "a:signed_out",
                "b:signed_out",
                "a:user_updated",
                "b:user_updated"
            ]
        );
    }

    #[test]
    fn dropping_subscription_removes_handler() {
        let listeners = AuthListeners::new();
        let log = Arc::new(Mutex::new(Vec::new()));
        let sub = listeners.subscribe(recording_handler(log.clone(), "a"));
        assert_eq!(listeners.len(), 1);

        sub.unsubscribe();
        assert!(listeners.is_empty());

        listeners.emit(&AuthChangeEvent::signed_out());
        assert!(log.lock().unwrap().is_empty());
    }

    #[test]
    fn subscription_outliving_registry_is_harmless() {
        let listeners = AuthListeners::new();
        let sub = listeners.subscribe(Arc::new(|_: &AuthChangeEvent| {}));
        drop(listeners);
        drop(sub);
    }

    #[test]
    fn handler_may_unsubscribe_during_emit() {
        let listeners = AuthListeners::new();
        let slot: Arc<Mutex<Option<AuthSubscription>>> = Arc::new(Mutex::new(None));
        let slot_in_handler = slot.clone();
        let sub = listeners.subscribe(Arc::new(move |_: &AuthChangeEvent| {
            slot_in_handler.lock().unwrap().take();
        }));
        *slot.lock().unwrap() = Some(sub);

        listeners.emit(&AuthChangeEvent::signed_out());
        assert!(listeners.is_empty());
    }
}
