// =============================================================================
// Subscriber Notification — Synchronous fan-out of signal transitions
// =============================================================================

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use serde::Serialize;
use tracing::debug;

use crate::signals::lifecycle::Signal;

/// Why the active signal went away.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ClearReason {
    Expired,
    Stopped,
}

/// A lifecycle transition delivered to subscribers.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum SignalEvent {
    Created { signal: Signal },
    Countdown { signal: Signal },
    Cleared { signal_id: String, reason: ClearReason },
}

pub type SignalCallback = Box<dyn Fn(&SignalEvent) + Send + Sync>;

/// Registered callbacks, invoked in registration order.
///
/// Callbacks run with the registry lock held and must not subscribe or
/// unsubscribe from inside the callback.
pub struct SubscriberRegistry {
    next_id: AtomicU64,
    callbacks: Mutex<Vec<(u64, SignalCallback)>>,
}

impl SubscriberRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self {
            next_id: AtomicU64::new(1),
            callbacks: Mutex::new(Vec::new()),
        })
    }

    pub fn subscribe<F>(self: &Arc<Self>, callback: F) -> Subscription
    where
        F: Fn(&SignalEvent) + Send + Sync + 'static,
    {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        self.callbacks.lock().push((id, Box::new(callback)));
        debug!(subscription = id, "subscriber registered");
        Subscription {
            id,
            registry: Arc::downgrade(self),
        }
    }

    pub fn notify(&self, event: &SignalEvent) {
        let callbacks = self.callbacks.lock();
        for (_, callback) in callbacks.iter() {
            callback(event);
        }
    }

    pub fn len(&self) -> usize {
        self.callbacks.lock().len()
    }

    fn remove(&self, id: u64) {
        let mut callbacks = self.callbacks.lock();
        if let Some(pos) = callbacks.iter().position(|(cid, _)| *cid == id) {
            drop(callbacks.remove(pos));
            debug!(subscription = id, "subscriber removed");
        }
    }
}

/// Handle to one registration. Dropping it unsubscribes.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    id: u64,
    registry: Weak<SubscriberRegistry>,
}

impl Subscription {
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Remove this registration. Once this returns the callback is never
    /// invoked again.
    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        if let Some(registry) = self.registry.upgrade() {
            registry.remove(self.id);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cleared(id: &str) -> SignalEvent {
        SignalEvent::Cleared {
            signal_id: id.to_string(),
            reason: ClearReason::Expired,
        }
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&SignalEvent) + Send + Sync + 'static) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = seen.clone();
        (seen, move |e: &SignalEvent| {
            if let SignalEvent::Cleared { signal_id, .. } = e {
                sink.lock().push(signal_id.clone());
            }
        })
    }

    #[test]
    fn every_subscriber_sees_events_in_order() {
        let registry = SubscriberRegistry::new();
        let (a_seen, a) = recorder();
        let (b_seen, b) = recorder();
        let _a = registry.subscribe(a);
        let _b = registry.subscribe(b);

        registry.notify(&cleared("1"));
        registry.notify(&cleared("2"));

        assert_eq!(*a_seen.lock(), vec!["1", "2"]);
        assert_eq!(*b_seen.lock(), vec!["1", "2"]);
    }

    #[test]
    fn unsubscribe_removes_exactly_one_registration() {
        let registry = SubscriberRegistry::new();
        let (a_seen, a) = recorder();
        let (b_seen, b) = recorder();
        let sub_a = registry.subscribe(a);
        let _sub_b = registry.subscribe(b);

        registry.notify(&cleared("1"));
        sub_a.unsubscribe();
        registry.notify(&cleared("2"));

        assert_eq!(registry.len(), 1);
        assert_eq!(*a_seen.lock(), vec!["1"]);
        assert_eq!(*b_seen.lock(), vec!["1", "2"]);
    }

    #[test]
    fn dropping_handle_unsubscribes() {
        let registry = SubscriberRegistry::new();
        let (seen, cb) = recorder();
        {
            let _sub = registry.subscribe(cb);
        }
        registry.notify(&cleared("x"));
        assert!(seen.lock().is_empty());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn handle_outliving_registry_is_harmless() {
        let registry = SubscriberRegistry::new();
        let sub = registry.subscribe(|_| {});
        drop(registry);
        sub.unsubscribe();
    }

    #[test]
    fn cleared_event_serialises_with_type_tag() {
        let json = serde_json::to_value(cleared("abc")).unwrap();
        assert_eq!(json["type"], "cleared");
        assert_eq!(json["signal_id"], "abc");
        assert_eq!(json["reason"], "EXPIRED");
    }
}
