//! ActionRegistry - one handler per action type.
//!
//! ```text
//! register("Accounts:getSelected", h) ──► handlers["Accounts:getSelected"] = h
//! register("Accounts:getSelected", h2) ─► AlreadyRegistered (h stays)
//! invoke("Accounts:getSelected", args) ─► h(args).await
//! invoke("Unknown:thing", args) ────────► NoHandler
//! ```
//!
//! The handler map is only locked while looking up or swapping entries,
//! never across the handler's `.await`, so a handler may itself call other
//! actions on the same registry.

use async_trait::async_trait;
use parking_lot::RwLock;
use relay_types::{ActionType, Namespace};
use serde_json::Value;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tracing::debug;

use crate::error::{BusError, HandlerError};

/// Handler for a single action type.
///
/// Closures of the shape `Fn(Value) -> impl Future<Output = Result<Value,
/// HandlerError>>` are registered through [`ActionRegistry::register`]; implement
/// this trait directly for stateful handlers that are easier to express as
/// a struct.
#[async_trait]
pub trait ActionHandler: Send + Sync {
    async fn handle(&self, args: Value) -> Result<Value, HandlerError>;
}

/// Adapts a closure into an [`ActionHandler`].
struct FnHandler<F>(F);

#[async_trait]
impl<F, Fut> ActionHandler for FnHandler<F>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    async fn handle(&self, args: Value) -> Result<Value, HandlerError> {
        (self.0)(args).await
    }
}

/// Wraps a closure as a shareable handler.
pub fn handler_fn<F, Fut>(f: F) -> Arc<dyn ActionHandler>
where
    F: Fn(Value) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
{
    Arc::new(FnHandler(f))
}

struct ActionEntry {
    owner: Option<Namespace>,
    handler: Arc<dyn ActionHandler>,
}

/// Maps each action type to exactly one handler.
#[derive(Default)]
pub struct ActionRegistry {
    handlers: RwLock<HashMap<ActionType, ActionEntry>>,
}

impl ActionRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a closure handler for `action`.
    ///
    /// # Errors
    ///
    /// [`BusError::AlreadyRegistered`] if `action` already has a handler;
    /// the existing handler is left untouched.
    pub fn register<F, Fut>(&self, action: ActionType, handler: F) -> Result<(), BusError>
    where
        F: Fn(Value) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Value, HandlerError>> + Send + 'static,
    {
        self.register_owned(action, handler_fn(handler), None)
    }

    /// Registers a trait-object handler for `action`.
    ///
    /// # Errors
    ///
    /// Same as [`register`](Self::register).
    pub fn register_handler(
        &self,
        action: ActionType,
        handler: Arc<dyn ActionHandler>,
    ) -> Result<(), BusError> {
        self.register_owned(action, handler, None)
    }

    pub(crate) fn register_owned(
        &self,
        action: ActionType,
        handler: Arc<dyn ActionHandler>,
        owner: Option<Namespace>,
    ) -> Result<(), BusError> {
        let mut handlers = self.handlers.write();
        if handlers.contains_key(&action) {
            return Err(BusError::AlreadyRegistered(action));
        }
        debug!(action = %action, owner = ?owner.as_ref().map(Namespace::as_str), "Action handler registered");
        handlers.insert(action, ActionEntry { owner, handler });
        Ok(())
    }

    /// Removes the handler for `action`. Returns `false` if there was none.
    pub fn unregister(&self, action: &ActionType) -> bool {
        let removed = self.handlers.write().remove(action).is_some();
        if removed {
            debug!(action = %action, "Action handler unregistered");
        }
        removed
    }

    /// Removes every handler registered by `owner`, returning how many.
    pub(crate) fn unregister_owner(&self, owner: &Namespace) -> usize {
        let mut handlers = self.handlers.write();
        let before = handlers.len();
        handlers.retain(|_, entry| entry.owner.as_ref() != Some(owner));
        before - handlers.len()
    }

    #[must_use]
    pub fn contains(&self, action: &ActionType) -> bool {
        self.handlers.read().contains_key(action)
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Runs the handler for `action` and returns its result.
    ///
    /// # Errors
    ///
    /// - [`BusError::NoHandler`] when nothing is registered for `action`
    /// - [`BusError::Handler`] carrying the handler's own error
    pub async fn invoke(&self, action: &ActionType, args: Value) -> Result<Value, BusError> {
        let handler = {
            let handlers = self.handlers.read();
            handlers.get(action).map(|entry| Arc::clone(&entry.handler))
        };
        let Some(handler) = handler else {
            return Err(BusError::NoHandler(action.clone()));
        };
        handler.handle(args).await.map_err(BusError::Handler)
    }
}

impl std::fmt::Debug for ActionRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let handlers = self.handlers.read();
        let mut types: Vec<&str> = handlers.keys().map(ActionType::as_str).collect();
        types.sort_unstable();
        f.debug_struct("ActionRegistry")
            .field("actions", &types)
            .finish()
    }
}
