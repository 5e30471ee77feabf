//! Capability - the immutable allow-list behind a restricted view.
//!
//! A capability is fixed when the view is created. Every check is a pure
//! function of the capability and the requested type, so the same inputs
//! always produce the same decision:
//!
//! | Access | Allowed when |
//! |--------|--------------|
//! | call action | own namespace, or listed in `allowed_actions` |
//! | subscribe event | own namespace, or listed in `allowed_events` |
//! | register / unregister action | own namespace only |
//! | publish / clear event | own namespace only |
//!
//! The own-namespace rule is what stops a module from answering or
//! emitting on behalf of another module.

use relay_types::{ActionType, EventType, Namespace};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use crate::error::{Access, BusError};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Capability {
    name: Namespace,
    #[serde(default)]
    allowed_actions: BTreeSet<ActionType>,
    #[serde(default)]
    allowed_events: BTreeSet<EventType>,
}

impl Capability {
    /// Builds a capability from raw `"Module:name"` strings.
    ///
    /// # Errors
    ///
    /// [`BusError::InvalidType`] if the name or any entry is malformed.
    pub fn new<A, E>(
        name: &str,
        allowed_actions: A,
        allowed_events: E,
    ) -> Result<Self, BusError>
    where
        A: IntoIterator,
        A::Item: AsRef<str>,
        E: IntoIterator,
        E::Item: AsRef<str>,
    {
        Ok(Self {
            name: Namespace::new(name)?,
            allowed_actions: allowed_actions
                .into_iter()
                .map(|a| ActionType::new(a.as_ref()))
                .collect::<Result<_, _>>()?,
            allowed_events: allowed_events
                .into_iter()
                .map(|e| EventType::new(e.as_ref()))
                .collect::<Result<_, _>>()?,
        })
    }

    /// A capability that only reaches its own namespace.
    #[must_use]
    pub fn isolated(name: Namespace) -> Self {
        Self {
            name,
            allowed_actions: BTreeSet::new(),
            allowed_events: BTreeSet::new(),
        }
    }

    #[must_use]
    pub fn name(&self) -> &Namespace {
        &self.name
    }

    #[must_use]
    pub fn allowed_actions(&self) -> &BTreeSet<ActionType> {
        &self.allowed_actions
    }

    #[must_use]
    pub fn allowed_events(&self) -> &BTreeSet<EventType> {
        &self.allowed_events
    }

    #[must_use]
    pub fn may_call(&self, action: &ActionType) -> bool {
        action.is_in(&self.name) || self.allowed_actions.contains(action)
    }

    #[must_use]
    pub fn may_subscribe(&self, event: &EventType) -> bool {
        event.is_in(&self.name) || self.allowed_events.contains(event)
    }

    /// Whether a peer holding this capability may deliver `event` into the
    /// local bus across a port. Same rule as subscribing.
    #[must_use]
    pub fn may_deliver(&self, event: &EventType) -> bool {
        self.may_subscribe(event)
    }

    #[must_use]
    pub fn owns_action(&self, action: &ActionType) -> bool {
        action.is_in(&self.name)
    }

    #[must_use]
    pub fn owns_event(&self, event: &EventType) -> bool {
        event.is_in(&self.name)
    }

    /// Checks an action access.
    ///
    /// # Errors
    ///
    /// [`BusError::Forbidden`] when the access is not allowed.
    pub fn check_action(&self, access: Access, action: &ActionType) -> Result<(), BusError> {
        let allowed = match access {
            Access::Call => self.may_call(action),
            Access::Register | Access::Unregister => self.owns_action(action),
            Access::Subscribe | Access::Publish => false,
        };
        self.decide(allowed, access, action)
    }

    /// Checks an event access.
    ///
    /// # Errors
    ///
    /// [`BusError::Forbidden`] when the access is not allowed.
    pub fn check_event(&self, access: Access, event: &EventType) -> Result<(), BusError> {
        let allowed = match access {
            Access::Subscribe => self.may_subscribe(event),
            Access::Publish | Access::Unregister => self.owns_event(event),
            Access::Call | Access::Register => false,
        };
        self.decide(allowed, access, event)
    }

    fn decide(
        &self,
        allowed: bool,
        access: Access,
        target: impl std::fmt::Display,
    ) -> Result<(), BusError> {
        if allowed {
            Ok(())
        } else {
            Err(BusError::forbidden(&self.name, access, target))
        }
    }
}
