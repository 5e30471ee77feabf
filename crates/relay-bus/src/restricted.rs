//! RestrictedView - a module's capability-scoped handle on the bus.
//!
//! Every operation parses the requested type, checks it against the
//! view's [`Capability`], and only then touches the bus. A refused
//! request has no side effect and is logged on the `relay::security`
//! target, since it means a module reached for something it never
//! declared.
//!
//! ```
//! # use relay_bus::MessageBus;
//! # use serde_json::{json, Value};
//! # #[tokio::main(flavor = "current_thread")]
//! # async fn main() {
//! let bus = MessageBus::new();
//! let accounts = bus.get_restricted("Accounts", Vec::<&str>::new(), Vec::<&str>::new()).unwrap();
//! accounts
//!     .register_action_handler("Accounts:getSelected", |_| async { Ok(json!("0xabc")) })
//!     .unwrap();
//!
//! let prefs = bus
//!     .get_restricted("Preferences", ["Accounts:getSelected"], Vec::<&str>::new())
//!     .unwrap();
//! assert_eq!(prefs.call("Accounts:getSelected", Value::Null).await.unwrap(), json!("0xabc"));
//!
//! let ui = bus.get_restricted("Ui", Vec::<&str>::new(), Vec::<&str>::new()).unwrap();
//! assert!(ui.call("Accounts:getSelected", Value::Null).await.is_err());
//! # }
//! ```

use relay_types::{ActionType, EventType, Namespace};
use serde_json::Value;
use std::future::Future;
use std::sync::Arc;
use tracing::{debug, warn};

use crate::bus::MessageBus;
use crate::capability::Capability;
use crate::error::{Access, BusError, HandlerError};
use crate::event::{SubscribeOptions, Subscription};

/// Capability-scoped façade over a [`MessageBus`].
///
/// Cloning shares the same capability; the capability never changes for
/// the lifetime of the view.
#[derive(Clone)]
pub struct RestrictedView {
    bus: MessageBus,
    capability: Arc<Capability>,
}

impl RestrictedView {
    pub(crate) fn new(bus: MessageBus, capability: Capability) -> Self {
        debug!(
            view = %capability.name(),
            actions = capability.allowed_actions().len(),
            events = capability.allowed_events().len(),
            "Restricted view created"
        );
        Self {
            bus,
            capability: Arc::new(capability),
        }
    }

    #[must_use]
    pub fn name(&self) -> &Namespace {
        self.capability.name()
    }

    #[must_use]
    pub fn capability(&self) -> &Capability {
        &self.capability
    }

    fn action(&self, access: Access, raw: &str) -> Result<ActionType, BusError> {
        let action = ActionType::new(raw)?;
        self.capability
            .check_action(access, &action)
            .inspect_err(|err| self.report(err))?;
        Ok(action)
    }

    fn event(&self, access: Access, raw: &str) -> Result<EventType, BusError> {
        let event = EventType::new(raw)?;
        self.capability
            .check_event(access, &event)
            .inspect_err(|err| self.report(err))?;
        Ok(event)
    }

    fn report(&self, err: &BusError) {
        if let BusError::Forbidden { access, target, .. } = err {
            warn!(
                target: "relay::security",
                view = %self.name(),
                access = %access,
                denied = %target,
                "Capability violation"
            );
        }
    }

    /// Calls an action this view is allowed to call.
    ///
    /// # Errors
    ///
    /// - [`BusError::Forbidden`] before reaching the bus when `action` is
    ///   outside the allow-list
    /// - anything [`MessageBus::call`] returns
    pub async fn call(&self, action: &str, args: Value) -> Result<Value, BusError> {
        let action = self.action(Access::Call, action)?;
        self.bus.call(&action, args).await
    }

    /// Registers a handler for one of this module's own actions.
    ///
    /// # Errors
    ///
    /// [`BusError::Forbidden`] for a foreign namespace,
    /// [`BusError::AlreadyRegistered`] for a duplicate.
    pub fn register_action_handler<F, Fut>(&self, action: &str, handler: F) -> Result<(), BusError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        let action = self.action(Access::Register, action)?;
        self.bus.register_owned(action, handler, self.name())
    }

    /// Removes one of this module's own handlers.
    ///
    /// # Errors
    ///
    /// [`BusError::Forbidden`] for a foreign namespace.
    pub fn unregister_action_handler(&self, action: &str) -> Result<bool, BusError> {
        let action = self.action(Access::Unregister, action)?;
        Ok(self.bus.unregister_action_handler(&action))
    }

    /// Publishes one of this module's own events.
    ///
    /// # Errors
    ///
    /// [`BusError::Forbidden`] for a foreign namespace, or the aggregated
    /// subscriber failures.
    pub fn publish(&self, event: &str, payload: Value) -> Result<(), BusError> {
        let event = self.event(Access::Publish, event)?;
        self.bus.publish(&event, payload)
    }

    /// # Errors
    ///
    /// [`BusError::Forbidden`] when `event` is outside the allow-list.
    pub fn subscribe<F>(&self, event: &str, callback: F) -> Result<Subscription, BusError>
    where
        F: Fn(&Value) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        self.subscribe_with(event, SubscribeOptions::default(), callback)
    }

    /// # Errors
    ///
    /// [`BusError::Forbidden`] when `event` is outside the allow-list, or a
    /// failed replay delivery.
    pub fn subscribe_with<F>(
        &self,
        event: &str,
        options: SubscribeOptions,
        callback: F,
    ) -> Result<Subscription, BusError>
    where
        F: Fn(&Value) -> Result<(), HandlerError> + Send + Sync + 'static,
    {
        let event = self.event(Access::Subscribe, event)?;
        self.bus
            .subscribe_owned(event, options, Arc::new(callback), self.name())
    }

    /// Removes a subscription made through a view of this module. Tokens
    /// belonging to other modules are ignored.
    pub fn unsubscribe(&self, subscription: &Subscription) -> bool {
        self.bus.unsubscribe_owned(subscription, self.name())
    }

    /// Drops every subscriber of one of this module's own events.
    ///
    /// # Errors
    ///
    /// [`BusError::Forbidden`] for a foreign namespace.
    pub fn clear_event_subscriptions(&self, event: &str) -> Result<usize, BusError> {
        let event = self.event(Access::Unregister, event)?;
        Ok(self.bus.clear_event_subscriptions(&event))
    }

    /// Tears the module down: removes every handler it registered and every
    /// subscription it made. Returns `(handlers, subscriptions)` removed.
    pub fn release(&self) -> (usize, usize) {
        let removed = self.bus.release_owner(self.name());
        debug!(
            view = %self.name(),
            handlers = removed.0,
            subscriptions = removed.1,
            "Restricted view released"
        );
        removed
    }
}

impl std::fmt::Debug for RestrictedView {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RestrictedView")
            .field("capability", &self.capability)
            .finish_non_exhaustive()
    }
}
