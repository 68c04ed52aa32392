use std::sync::{Arc, Mutex};

/// Opaque handle returned by `EventStream::subscribe`, used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriptionToken(u64);

struct Subscriber<T> {
    token: SubscriptionToken,
    callback: Arc<dyn Fn(&T) + Send + Sync>,
}

/// A synchronous publish/subscribe channel for a single event type.
///
/// `publish` takes the lock just long enough to snapshot the current
/// subscriber list, then releases it before invoking callbacks. Two
/// invariants fall out of that design (see `testable properties` in
/// `SPEC_FULL.md` §8 law 7): a subscriber added during a publish does not
/// receive that publish, and a subscriber removed during a publish still
/// receives it — both are snapshot semantics, not a special case.
pub struct EventStream<T> {
    subscribers: Mutex<Vec<Subscriber<T>>>,
    next_token: Mutex<u64>,
}

impl<T> Default for EventStream<T> {
    fn default() -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_token: Mutex::new(0),
        }
    }
}

impl<T> EventStream<T> {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn subscribe(&self, callback: impl Fn(&T) + Send + Sync + 'static) -> SubscriptionToken {
        let mut next = self.next_token.lock().unwrap();
        let token = SubscriptionToken(*next);
        *next += 1;
        drop(next);

        self.subscribers.lock().unwrap().push(Subscriber {
            token,
            callback: Arc::new(callback),
        });
        token
    }

    pub fn unsubscribe(&self, token: SubscriptionToken) {
        self.subscribers.lock().unwrap().retain(|s| s.token != token);
    }

    /// Delivers `event` to every subscriber present at the moment of the
    /// snapshot, in publish order.
    pub fn publish(&self, event: &T) {
        let snapshot: Vec<Arc<dyn Fn(&T) + Send + Sync>> = {
            let guard = self.subscribers.lock().unwrap();
            guard.iter().map(|s| s.callback.clone()).collect()
        };
        for callback in snapshot {
            callback(event);
        }
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.lock().unwrap().len()
    }
}
