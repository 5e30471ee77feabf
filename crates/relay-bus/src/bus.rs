//! MessageBus - the per-process composition of actions and events.
//!
//! One bus is built by the composition root and handed to each module as
//! a [`RestrictedView`]. There is no global bus; anything that wants to
//! talk on the bus must be given a handle.
//!
//! ```text
//! composition root
//!     │ MessageBus::new()
//!     ├── bus.get_restricted("Accounts", [...], [...]) ──► AccountsController
//!     ├── bus.get_restricted("Preferences", [...], [...]) ► PreferencesController
//!     └── PortTransport::new(port, bus.clone(), ...)  ──► UI process
//! ```
//!
//! `MessageBus` is a cheap clone around shared state; every clone talks to
//! the same registry and hub.

use relay_types::{ActionType, EventType, Namespace};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;

use crate::action::{handler_fn, ActionHandler, ActionRegistry};
use crate::capability::Capability;
use crate::error::{BusError, HandlerError};
use crate::event::{EventCallback, EventHub, SubscribeOptions, Subscription};
use crate::restricted::RestrictedView;

#[derive(Default)]
struct BusInner {
    actions: ActionRegistry,
    events: EventHub,
}

/// Shared action registry plus event hub.
#[derive(Clone, Default)]
pub struct MessageBus {
    inner: Arc<BusInner>,
}

impl MessageBus {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    // === Actions ===

    /// Invokes the handler registered for `action`.
    ///
    /// # Errors
    ///
    /// [`BusError::NoHandler`] or the handler's own error as
    /// [`BusError::Handler`].
    pub async fn call(&self, action: &ActionType, args: Value) -> Result<Value, BusError> {
        self.inner.actions.invoke(action, args).await
    }

    /// # Errors
    ///
    /// [`BusError::AlreadyRegistered`] if `action` already has a handler.
    pub fn register_action_handler<F, Fut>(
        &self,
        action: ActionType,
        handler: F,
    ) -> Result<(), BusError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.inner.actions.register(action, handler)
    }

    /// # Errors
    ///
    /// [`BusError::AlreadyRegistered`] if `action` already has a handler.
    pub fn register_handler(
        &self,
        action: ActionType,
        handler: Arc<dyn ActionHandler>,
    ) -> Result<(), BusError> {
        self.inner.actions.register_handler(action, handler)
    }

    pub(crate) fn register_owned<F, Fut>(
        &self,
        action: ActionType,
        handler: F,
        owner: &Namespace,
    ) -> Result<(), BusError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.inner
            .actions
            .register_owned(action, handler_fn(handler), Some(owner.clone()))
    }

    pub fn unregister_action_handler(&self, action: &ActionType) -> bool {
        self.inner.actions.unregister(action)
    }

    #[must_use]
    pub fn has_action_handler(&self, action: &ActionType) -> bool {
        self.inner.actions.contains(action)
    }

    // === Events ===

    /// Delivers `payload` to every subscriber of `event`.
    ///
    /// # Errors
    ///
    /// [`BusError::Subscribers`] aggregating every failed subscriber.
    pub fn publish(&self, event: &EventType, payload: Value) -> Result<(), BusError> {
        self.inner.events.publish(event, payload)
    }

    pub fn subscribe<F>(&self, event: EventType, callback: F) -> Subscription
    where
        F: Fn(&Value) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.inner.events.subscribe(event, callback)
    }

    /// # Errors
    ///
    /// A failed replay delivery; the subscription is rolled back.
    pub fn subscribe_with<F>(
        &self,
        event: EventType,
        options: SubscribeOptions,
        callback: F,
    ) -> Result<Subscription, BusError>
    where
        F: Fn(&Value) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.inner.events.subscribe_with(event, options, callback)
    }

    pub(crate) fn subscribe_owned(
        &self,
        event: EventType,
        options: SubscribeOptions,
        callback: EventCallback,
        owner: &Namespace,
    ) -> Result<Subscription, BusError> {
        self.inner
            .events
            .subscribe_owned(event, options, callback, Some(owner.clone()))
    }

    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.inner.events.unsubscribe(subscription)
    }

    pub(crate) fn unsubscribe_owned(&self, subscription: &Subscription, owner: &Namespace) -> bool {
        self.inner.events.unsubscribe_owned(subscription, owner)
    }

    pub fn clear_event_subscriptions(&self, event: &EventType) -> usize {
        self.inner.events.clear(event)
    }

    #[must_use]
    pub fn subscriber_count(&self, event: &EventType) -> usize {
        self.inner.events.subscriber_count(event)
    }

    /// Last payload published for `event`, if any.
    #[must_use]
    pub fn latest_payload(&self, event: &EventType) -> Option<Arc<Value>> {
        self.inner.events.latest(event)
    }

    // === Restricted views ===

    /// Creates the capability-scoped handle a module uses to reach the bus.
    ///
    /// # Errors
    ///
    /// [`BusError::InvalidType`] when the name or an allow-list entry is
    /// not of the form `Module:name`.
    pub fn get_restricted<A, E>(
        &self,
        name: &str,
        allowed_actions: A,
        allowed_events: E,
    ) -> Result<RestrictedView, BusError>
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        let capability = Capability::new(name, allowed_actions, allowed_events)?;
        Ok(self.restricted(capability))
    }

    /// Creates a restricted view from an already validated capability.
    #[must_use]
    pub fn restricted(&self, capability: Capability) -> RestrictedView {
        RestrictedView::new(self.clone(), capability)
    }

    /// Removes every handler and subscription owned by `owner`.
    ///
    /// Returns `(handlers_removed, subscriptions_removed)`.
    pub(crate) fn release_owner(&self, owner: &Namespace) -> (usize, usize) {
        (
            self.inner.actions.unregister_owner(owner),
            self.inner.events.unsubscribe_owner(owner),
        )
    }
}

impl std::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageBus")
            .field("actions", &self.inner.actions)
            .field("events", &self.inner.events)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_types::ErrorCode;
    use serde_json::json;

    #[tokio::test]
    async fn call_and_publish_through_clones() {
        let bus = MessageBus::new();
        let other = bus.clone();
        bus.register_action_handler(ActionType::new("A:get").unwrap(), |_| async {
            Ok(json!("value"))
        })
        .unwrap();

        let out = other.call(&ActionType::new("A:get").unwrap(), Value::Null).await.unwrap();
        assert_eq!(out, json!("value"));

        let event = EventType::new("A:changed").unwrap();
        other.publish(&event, json!(1)).unwrap();
        assert_eq!(bus.latest_payload(&event).as_deref(), Some(&json!(1)));
    }

    #[tokio::test]
    async fn second_registration_keeps_first_handler() {
        let bus = MessageBus::new();
        let get = ActionType::new("A:get").unwrap();
        bus.register_action_handler(get.clone(), |_| async { Ok(json!("h1")) })
            .unwrap();
        let err = bus
            .register_action_handler(get.clone(), |_| async { Ok(json!("h2")) })
            .unwrap_err();
        assert_eq!(err.code(), "BUS_ALREADY_REGISTERED");
        assert_eq!(bus.call(&get, Value::Null).await.unwrap(), json!("h1"));
    }

    #[test]
    fn get_restricted_validates_names() {
        let bus = MessageBus::new();
        assert!(bus.get_restricted("Ui", ["Bg:getState"], ["Bg:stateChange"]).is_ok());
        let err = bus
            .get_restricted("Ui", ["getState"], Vec::<&str>::new())
            .unwrap_err();
        assert_eq!(err.code(), "BUS_INVALID_TYPE");
    }
}
