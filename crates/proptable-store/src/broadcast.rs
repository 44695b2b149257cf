//! Change notification for property writes.
//!
//! The table hands every effective change to an injected
//! [`ChangeBroadcaster`]. [`PropertyBroadcaster`] is the standard
//! implementation: per-name callbacks invoked synchronously, plus a
//! `tokio` broadcast stream carrying every change.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, PoisonError, RwLock};

use proptable_types::PropertyValue;
use tokio::sync::broadcast;
use tracing::debug;

/// Default capacity of the change stream returned by [`PropertyBroadcaster::watch`].
pub const DEFAULT_WATCH_CAPACITY: usize = 256;

/// A property changed value. `name` is always the unscoped logical name.
#[derive(Clone, Debug, PartialEq)]
pub struct PropertyChanged {
    pub name: String,
    pub value: Option<PropertyValue>,
}

/// Receiver for every change published by a [`PropertyBroadcaster`].
pub type ChangeStream = broadcast::Receiver<PropertyChanged>;

/// Sink for property change notifications.
///
/// `publish` must deliver synchronously: when it returns, every subscriber
/// has observed the change.
pub trait ChangeBroadcaster: Send + Sync {
    fn publish(&self, name: &str, value: Option<&PropertyValue>);
}

/// Discards every notification.
#[derive(Clone, Copy, Debug, Default)]
pub struct NullBroadcaster;

impl ChangeBroadcaster for NullBroadcaster {
    fn publish(&self, _name: &str, _value: Option<&PropertyValue>) {}
}

/// Handle returned by [`PropertyBroadcaster::subscribe`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(u64);

type Callback = Arc<dyn Fn(&PropertyChanged) + Send + Sync>;

struct Subscriber {
    id: SubscriptionId,
    name: String,
    callback: Callback,
}

/// Publish/subscribe channel keyed by property name.
pub struct PropertyBroadcaster {
    subscribers: RwLock<Vec<Subscriber>>,
    next_id: AtomicU64,
    stream: broadcast::Sender<PropertyChanged>,
}

impl PropertyBroadcaster {
    /// Create a broadcaster with the default stream capacity.
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_WATCH_CAPACITY)
    }

    /// Create a broadcaster whose change stream buffers `capacity` changes.
    pub fn with_capacity(capacity: usize) -> Self {
        let (stream, _) = broadcast::channel(capacity.max(1));
        Self {
            subscribers: RwLock::new(Vec::new()),
            next_id: AtomicU64::new(1),
            stream,
        }
    }

    /// Call `callback` for every change of the property `name`.
    pub fn subscribe<F>(&self, name: impl Into<String>, callback: F) -> SubscriptionId
    where
        F: Fn(&PropertyChanged) + Send + Sync + 'static,
    {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let name = name.into();
        debug!(?id, property = %name, "subscribed");
        self.subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .push(Subscriber {
                id,
                name,
                callback: Arc::new(callback),
            });
        id
    }

    /// Remove a subscription. Returns `true` if it existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        let mut subs = self
            .subscribers
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        let before = subs.len();
        subs.retain(|s| s.id != id);
        before != subs.len()
    }

    /// Receive every change from now on, regardless of name.
    pub fn watch(&self) -> ChangeStream {
        self.stream.subscribe()
    }

    /// Number of registered callbacks.
    pub fn subscriber_count(&self) -> usize {
        self.subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }
}

impl Default for PropertyBroadcaster {
    fn default() -> Self {
        Self::new()
    }
}

impl ChangeBroadcaster for PropertyBroadcaster {
    fn publish(&self, name: &str, value: Option<&PropertyValue>) {
        let change = PropertyChanged {
            name: name.to_string(),
            value: value.cloned(),
        };

        // Snapshot first so callbacks may subscribe or unsubscribe.
        let callbacks: Vec<Callback> = self
            .subscribers
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .filter(|s| s.name == name)
            .map(|s| Arc::clone(&s.callback))
            .collect();

        for callback in &callbacks {
            callback(&change);
        }

        if self.stream.receiver_count() > 0 {
            // Only fails when every receiver dropped in between.
            let _ = self.stream.send(change);
        }

        debug!(property = name, delivered = callbacks.len(), "change published");
    }
}

impl std::fmt::Debug for PropertyBroadcaster {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PropertyBroadcaster")
            .field("subscriber_count", &self.subscriber_count())
            .field("watchers", &self.stream.receiver_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn recorder(
        b: &PropertyBroadcaster,
        name: &str,
    ) -> (SubscriptionId, Arc<Mutex<Vec<PropertyChanged>>>) {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&seen);
        let id = b.subscribe(name, move |c: &PropertyChanged| {
            sink.lock().unwrap().push(c.clone());
        });
        (id, seen)
    }

    #[test]
    fn delivers_only_matching_names() {
        let b = PropertyBroadcaster::new();
        let (_, theme) = recorder(&b, "Theme");
        let (_, font) = recorder(&b, "Font");

        b.publish("Theme", Some(&"Dark".into()));

        let theme = theme.lock().unwrap();
        assert_eq!(theme.len(), 1);
        assert_eq!(theme[0].name, "Theme");
        assert_eq!(theme[0].value, Some(PropertyValue::from("Dark")));
        assert!(font.lock().unwrap().is_empty());
    }

    #[test]
    fn delivery_is_ordered() {
        let b = PropertyBroadcaster::new();
        let (_, seen) = recorder(&b, "Count");
        for i in 0..5i64 {
            b.publish("Count", Some(&PropertyValue::Int(i)));
        }
        let values: Vec<_> = seen
            .lock()
            .unwrap()
            .iter()
            .map(|c| c.value.clone())
            .collect();
        let expected: Vec<_> = (0..5i64).map(|i| Some(PropertyValue::Int(i))).collect();
        assert_eq!(values, expected);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let b = PropertyBroadcaster::new();
        let (id, seen) = recorder(&b, "Theme");
        assert_eq!(b.subscriber_count(), 1);
        assert!(b.unsubscribe(id));
        assert!(!b.unsubscribe(id));
        b.publish("Theme", None);
        assert!(seen.lock().unwrap().is_empty());
        assert_eq!(b.subscriber_count(), 0);
    }

    #[test]
    fn callback_may_unsubscribe_itself() {
        let b = Arc::new(PropertyBroadcaster::new());
        let slot = Arc::new(Mutex::new(None::<SubscriptionId>));
        let (b2, slot2) = (Arc::clone(&b), Arc::clone(&slot));
        let id = b.subscribe("Theme", move |_| {
            if let Some(id) = *slot2.lock().unwrap() {
                b2.unsubscribe(id);
            }
        });
        *slot.lock().unwrap() = Some(id);
        b.publish("Theme", None);
        assert_eq!(b.subscriber_count(), 0);
    }

    #[tokio::test]
    async fn watch_receives_every_change() {
        let b = PropertyBroadcaster::with_capacity(8);
        let mut rx = b.watch();
        b.publish("Theme", Some(&"Dark".into()));
        b.publish("Font", Some(&"Mono".into()));

        assert_eq!(rx.recv().await.unwrap().name, "Theme");
        assert_eq!(rx.recv().await.unwrap().name, "Font");
    }

    #[test]
    fn null_broadcaster_accepts_everything() {
        NullBroadcaster.publish("Theme", Some(&"Dark".into()));
    }

    #[test]
    fn debug_format() {
        let b = PropertyBroadcaster::new();
        let debug = format!("{b:?}");
        assert!(debug.contains("PropertyBroadcaster"));
        assert!(debug.contains("subscriber_count"));
    }
}
