//! EventHub - ordered fan-out of events to subscribers.
//!
//! # Delivery
//!
//! ```text
//! publish("Network:changed", p)
//!     │  cache["Network:changed"] = p
//!     │  snapshot subscribers in registration order
//!     ├──► sub#1(p)   Ok
//!     ├──► sub#2(p)   Err ──┐ collected
//!     └──► sub#3(p)   Ok    │
//!                           ▼
//!                 Err(Subscribers[sub#2])
//! ```
//!
//! `publish` returns only after every subscriber has been invoked. A
//! failing or panicking subscriber never stops delivery to the rest; the
//! failures are returned together afterwards.
//!
//! The subscriber list is snapshotted before fan-out, so a callback that
//! subscribes or unsubscribes during delivery affects the next publish,
//! not the current one. No lock is held while callbacks run.
//!
//! # Late subscribers
//!
//! A subscriber never sees events published before it joined unless it
//! opts into [`SubscribeOptions::replay_latest`], which delivers the
//! one-slot cache of the most recent payload for that event type.

use parking_lot::{Mutex, RwLock};
use relay_types::{EventType, Namespace};
use serde_json::Value;
use std::collections::HashMap;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tracing::{debug, warn};

use crate::error::{BusError, HandlerError, SubscriberErrors, SubscriberFailure};

/// Subscriber callback. Runs synchronously inside `publish`; spawn a task
/// from it for async follow-up work.
pub type EventCallback = Arc<dyn Fn(&Value) -> Result<(), HandlerError> + Send + Sync>;

/// Projects a payload onto the part a subscriber cares about.
pub type Selector = Arc<dyn Fn(&Value) -> Value + Send + Sync>;

/// Unsubscribe token returned by `subscribe`.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Subscription {
    event: EventType,
    id: u64,
}

impl Subscription {
    #[must_use]
    pub fn event(&self) -> &EventType {
        &self.event
    }

    #[must_use]
    pub fn id(&self) -> u64 {
        self.id
    }
}

/// Options for [`EventHub::subscribe_with`].
#[derive(Clone, Default)]
pub struct SubscribeOptions {
    /// Deliver the most recently published payload immediately on subscribe.
    pub replay_latest: bool,
    /// Only fire when the selected value differs from the previous one;
    /// the callback receives the selected value instead of the payload.
    pub selector: Option<Selector>,
}

impl SubscribeOptions {
    #[must_use]
    pub fn replay_latest(mut self) -> Self {
        self.replay_latest = true;
        self
    }

    #[must_use]
    pub fn with_selector<S>(mut self, selector: S) -> Self
    where
        S: Fn(&Value) -> Value + Send + Sync + 'static,
    {
        self.selector = Some(Arc::new(selector));
        self
    }
}

impl std::fmt::Debug for SubscribeOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribeOptions")
            .field("replay_latest", &self.replay_latest)
            .field("selector", &self.selector.is_some())
            .finish()
    }
}

struct SelectorState {
    select: Selector,
    last: Mutex<Option<Value>>,
}

struct Subscriber {
    id: u64,
    owner: Option<Namespace>,
    callback: EventCallback,
    selector: Option<SelectorState>,
}

impl Subscriber {
    fn deliver(&self, payload: &Value) -> Result<(), HandlerError> {
        match &self.selector {
            None => invoke_guarded(&self.callback, payload),
            Some(state) => {
                let selected = (state.select)(payload);
                {
                    let mut last = state.last.lock();
                    if last.as_ref() == Some(&selected) {
                        return Ok(());
                    }
                    *last = Some(selected.clone());
                }
                invoke_guarded(&self.callback, &selected)
            }
        }
    }
}

/// Runs a callback, turning a panic into an error so one broken subscriber
/// cannot abort the fan-out.
fn invoke_guarded(callback: &EventCallback, payload: &Value) -> Result<(), HandlerError> {
    match catch_unwind(AssertUnwindSafe(|| callback(payload))) {
        Ok(result) => result,
        Err(panic) => {
            let message = panic
                .downcast_ref::<&str>()
                .map(|s| (*s).to_string())
                .or_else(|| panic.downcast_ref::<String>().cloned())
                .unwrap_or_else(|| "non-string panic payload".to_string());
            Err(format!("subscriber panicked: {message}").into())
        }
    }
}

#[derive(Default)]
struct HubState {
    subscribers: HashMap<EventType, Vec<Arc<Subscriber>>>,
    latest: HashMap<EventType, Arc<Value>>,
}

/// Maps each event type to its ordered subscriber list.
#[derive(Default)]
pub struct EventHub {
    state: RwLock<HubState>,
    next_id: AtomicU64,
}

impl EventHub {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends `callback` to the subscribers of `event`.
    pub fn subscribe<F>(&self, event: EventType, callback: F) -> Subscription
    where
        F: Fn(&Value) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.insert(event, Arc::new(callback), SubscribeOptions::default(), None)
            .0
    }

    /// Subscribes with replay and/or selector options.
    ///
    /// # Errors
    ///
    /// Only a replayed delivery can fail. In that case the subscription is
    /// rolled back and the failure is returned as [`BusError::Subscribers`].
    pub fn subscribe_with<F>(
        &self,
        event: EventType,
        options: SubscribeOptions,
        callback: F,
    ) -> Result<Subscription, BusError>
    where
        F: Fn(&Value) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe_owned(event, options, Arc::new(callback), None)
    }

    pub(crate) fn subscribe_owned(
        &self,
        event: EventType,
        options: SubscribeOptions,
        callback: EventCallback,
        owner: Option<Namespace>,
    ) -> Result<Subscription, BusError> {
        let replay = options.replay_latest;
        let (subscription, subscriber, latest) = self.insert(event, callback, options, owner);

        let Some(latest) = latest.filter(|_| replay) else {
            return Ok(subscription);
        };
        match subscriber.deliver(&latest) {
            Ok(()) => Ok(subscription),
            Err(error) => {
                self.unsubscribe(&subscription);
                Err(BusError::Subscribers(SubscriberErrors {
                    event: subscription.event.clone(),
                    failures: vec![SubscriberFailure {
                        subscription,
                        owner: subscriber.owner.clone(),
                        error,
                    }],
                }))
            }
        }
    }

    fn insert(
        &self,
        event: EventType,
        callback: EventCallback,
        options: SubscribeOptions,
        owner: Option<Namespace>,
    ) -> (Subscription, Arc<Subscriber>, Option<Arc<Value>>) {
        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut state = self.state.write();
        let latest = state.latest.get(&event).cloned();

        // Without replay, a selector starts from the current selection so
        // the first publish only fires if it actually changes something.
        let selector = options.selector.map(|select| {
            let seed = if options.replay_latest {
                None
            } else {
                latest.as_deref().map(|payload| select(payload))
            };
            SelectorState {
                select,
                last: Mutex::new(seed),
            }
        });

        let subscriber = Arc::new(Subscriber {
            id,
            owner,
            callback,
            selector,
        });
        state
            .subscribers
            .entry(event.clone())
            .or_default()
            .push(Arc::clone(&subscriber));
        debug!(event = %event, id, "Subscribed");

        (Subscription { event, id }, subscriber, latest)
    }

    /// Removes exactly the subscription behind `subscription`.
    ///
    /// Returns `false` when it was already removed.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.remove_where(&subscription.event, |sub| sub.id == subscription.id) > 0
    }

    /// Like [`unsubscribe`](Self::unsubscribe) but only if `owner` owns it.
    pub(crate) fn unsubscribe_owned(&self, subscription: &Subscription, owner: &Namespace) -> bool {
        self.remove_where(&subscription.event, |sub| {
            sub.id == subscription.id && sub.owner.as_ref() == Some(owner)
        }) > 0
    }

    /// Drops every subscriber of `event`, returning how many were removed.
    pub fn clear(&self, event: &EventType) -> usize {
        self.state
            .write()
            .subscribers
            .remove(event)
            .map_or(0, |subs| subs.len())
    }

    pub(crate) fn unsubscribe_owner(&self, owner: &Namespace) -> usize {
        let mut state = self.state.write();
        let mut removed = 0;
        state.subscribers.retain(|_, subs| {
            let before = subs.len();
            subs.retain(|sub| sub.owner.as_ref() != Some(owner));
            removed += before - subs.len();
            !subs.is_empty()
        });
        removed
    }

    fn remove_where(&self, event: &EventType, pred: impl Fn(&Subscriber) -> bool) -> usize {
        let mut state = self.state.write();
        let Some(subs) = state.subscribers.get_mut(event) else {
            return 0;
        };
        let before = subs.len();
        subs.retain(|sub| !pred(sub));
        let removed = before - subs.len();
        if subs.is_empty() {
            state.subscribers.remove(event);
        }
        removed
    }

    /// Delivers `payload` to every current subscriber of `event`, in
    /// subscription order, and caches it as the latest payload.
    ///
    /// # Errors
    ///
    /// [`BusError::Subscribers`] listing every subscriber that failed.
    /// Delivery to the others has already happened.
    pub fn publish(&self, event: &EventType, payload: Value) -> Result<(), BusError> {
        let payload = Arc::new(payload);
        let subscribers = {
            let mut state = self.state.write();
            state.latest.insert(event.clone(), Arc::clone(&payload));
            state.subscribers.get(event).cloned().unwrap_or_default()
        };

        let failures: Vec<SubscriberFailure> = subscribers
            .iter()
            .filter_map(|sub| {
                sub.deliver(&payload).err().map(|error| SubscriberFailure {
                    subscription: Subscription {
                        event: event.clone(),
                        id: sub.id,
                    },
                    owner: sub.owner.clone(),
                    error,
                })
            })
            .collect();

        if failures.is_empty() {
            return Ok(());
        }
        warn!(
            event = %event,
            failed = failures.len(),
            subscribers = subscribers.len(),
            "Subscriber failures during publish"
        );
        Err(BusError::Subscribers(SubscriberErrors {
            event: event.clone(),
            failures,
        }))
    }

    /// Most recently published payload for `event`.
    #[must_use]
    pub fn latest(&self, event: &EventType) -> Option<Arc<Value>> {
        self.state.read().latest.get(event).cloned()
    }

    #[must_use]
    pub fn subscriber_count(&self, event: &EventType) -> usize {
        self.state
            .read()
            .subscribers
            .get(event)
            .map_or(0, Vec::len)
    }
}

impl std::fmt::Debug for EventHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.read();
        f.debug_struct("EventHub")
            .field("event_types", &state.subscribers.len())
            .field("cached_payloads", &state.latest.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_types::ErrorCode;
    use serde_json::json;

    fn event(s: &str) -> EventType {
        EventType::new(s).unwrap()
    }

    fn recorder() -> (Arc<Mutex<Vec<String>>>, impl Fn(&'static str) -> EventCallback) {
        let log = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&log);
        let make = move |tag: &'static str| -> EventCallback {
            let sink = Arc::clone(&sink);
            Arc::new(move |payload: &Value| -> Result<(), HandlerError> {
                sink.lock().push(format!("{tag}:{payload}"));
                Ok(())
            })
        };
        (log, make)
    }

    #[test]
    fn delivers_in_subscription_order() {
        let hub = EventHub::new();
        let (log, make) = recorder();
        for tag in ["a", "b", "c"] {
            let cb = make(tag);
            hub.subscribe(event("Net:changed"), move |p| cb(p));
        }

        hub.publish(&event("Net:changed"), json!(1)).unwrap();
        assert_eq!(*log.lock(), vec!["a:1", "b:1", "c:1"]);
    }

    #[test]
    fn failing_subscriber_does_not_stop_fan_out() {
        let hub = EventHub::new();
        let (log, make) = recorder();
        let first = make("first");
        hub.subscribe(event("Net:changed"), move |p| first(p));
        hub.subscribe(event("Net:changed"), |_| Err("bad subscriber".into()));
        hub.subscribe(event("Net:changed"), |_| panic!("exploded"));
        let last = make("last");
        hub.subscribe(event("Net:changed"), move |p| last(p));

        let err = hub.publish(&event("Net:changed"), json!("x")).unwrap_err();
        assert_eq!(err.code(), "BUS_SUBSCRIBER_FAILED");
        assert_eq!(*log.lock(), vec!["first:\"x\"", "last:\"x\""]);

        let BusError::Subscribers(agg) = err else {
            panic!("expected aggregate");
        };
        assert_eq!(agg.len(), 2);
        assert_eq!(agg.failures[0].error.to_string(), "bad subscriber");
        assert!(agg.failures[1].error.to_string().contains("exploded"));
    }

    #[test]
    fn unsubscribe_is_idempotent_and_exact() {
        let hub = EventHub::new();
        let (log, make) = recorder();
        let a = make("a");
        let b = make("b");
        let sub_a = hub.subscribe(event("Net:changed"), move |p| a(p));
        hub.subscribe(event("Net:changed"), move |p| b(p));

        assert!(hub.unsubscribe(&sub_a));
        assert!(!hub.unsubscribe(&sub_a));
        hub.publish(&event("Net:changed"), json!(2)).unwrap();
        assert_eq!(*log.lock(), vec!["b:2"]);
    }

    #[test]
    fn late_subscriber_misses_earlier_events() {
        let hub = EventHub::new();
        hub.publish(&event("Net:changed"), json!("early")).unwrap();
        let (log, make) = recorder();
        let cb = make("late");
        hub.subscribe(event("Net:changed"), move |p| cb(p));
        assert!(log.lock().is_empty());

        hub.publish(&event("Net:changed"), json!("later")).unwrap();
        assert_eq!(*log.lock(), vec!["late:\"later\""]);
    }

    #[test]
    fn replay_latest_delivers_cached_payload() {
        let hub = EventHub::new();
        hub.publish(&event("Net:changed"), json!("v1")).unwrap();
        hub.publish(&event("Net:changed"), json!("v2")).unwrap();

        let (log, make) = recorder();
        let cb = make("late");
        hub.subscribe_with(
            event("Net:changed"),
            SubscribeOptions::default().replay_latest(),
            move |p| cb(p),
        )
        .unwrap();
        assert_eq!(*log.lock(), vec!["late:\"v2\""]);
    }

    #[test]
    fn replay_without_cache_is_silent() {
        let hub = EventHub::new();
        let (log, make) = recorder();
        let cb = make("x");
        hub.subscribe_with(
            event("Net:changed"),
            SubscribeOptions::default().replay_latest(),
            move |p| cb(p),
        )
        .unwrap();
        assert!(log.lock().is_empty());
    }

    #[test]
    fn failed_replay_rolls_back() {
        let hub = EventHub::new();
        hub.publish(&event("Net:changed"), json!(1)).unwrap();
        let err = hub
            .subscribe_with(
                event("Net:changed"),
                SubscribeOptions::default().replay_latest(),
                |_| Err("cannot handle".into()),
            )
            .unwrap_err();
        assert_eq!(err.code(), "BUS_SUBSCRIBER_FAILED");
        assert_eq!(hub.subscriber_count(&event("Net:changed")), 0);
    }

    #[test]
    fn selector_fires_only_on_change() {
        let hub = EventHub::new();
        let (log, make) = recorder();
        let cb = make("chain");
        hub.subscribe_with(
            event("Net:stateChange"),
            SubscribeOptions::default().with_selector(|state| state["chainId"].clone()),
            move |p| cb(p),
        )
        .unwrap();

        hub.publish(&event("Net:stateChange"), json!({"chainId": 1, "n": 1})).unwrap();
        hub.publish(&event("Net:stateChange"), json!({"chainId": 1, "n": 2})).unwrap();
        hub.publish(&event("Net:stateChange"), json!({"chainId": 5, "n": 3})).unwrap();
        assert_eq!(*log.lock(), vec!["chain:1", "chain:5"]);
    }

    #[test]
    fn selector_seeds_from_cache_without_replay() {
        let hub = EventHub::new();
        hub.publish(&event("Net:stateChange"), json!({"chainId": 1})).unwrap();
        let (log, make) = recorder();
        let cb = make("chain");
        hub.subscribe_with(
            event("Net:stateChange"),
            SubscribeOptions::default().with_selector(|state| state["chainId"].clone()),
            move |p| cb(p),
        )
        .unwrap();

        hub.publish(&event("Net:stateChange"), json!({"chainId": 1})).unwrap();
        assert!(log.lock().is_empty());
        hub.publish(&event("Net:stateChange"), json!({"chainId": 2})).unwrap();
        assert_eq!(*log.lock(), vec!["chain:2"]);
    }

    #[test]
    fn subscribe_during_fan_out_applies_to_next_publish() {
        let hub = Arc::new(EventHub::new());
        let (log, make) = recorder();
        let inner_hub = Arc::clone(&hub);
        let late = make("late");
        let added = Arc::new(Mutex::new(false));
        hub.subscribe(event("Net:changed"), move |_| {
            let mut added = added.lock();
            if !*added {
                *added = true;
                let late = Arc::clone(&late);
                inner_hub.subscribe(event("Net:changed"), move |p| late(p));
            }
            Ok(())
        });

        hub.publish(&event("Net:changed"), json!(1)).unwrap();
        assert!(log.lock().is_empty());
        hub.publish(&event("Net:changed"), json!(2)).unwrap();
        assert_eq!(*log.lock(), vec!["late:2"]);
    }

    #[test]
    fn clear_and_counts() {
        let hub = EventHub::new();
        hub.subscribe(event("A:x"), |_| Ok(()));
        hub.subscribe(event("A:x"), |_| Ok(()));
        assert_eq!(hub.subscriber_count(&event("A:x")), 2);
        assert_eq!(hub.clear(&event("A:x")), 2);
        assert_eq!(hub.subscriber_count(&event("A:x")), 0);
        assert_eq!(hub.clear(&event("A:x")), 0);
    }
}
