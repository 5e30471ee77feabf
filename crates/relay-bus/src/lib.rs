//! Relay message bus.
//!
//! Controllers in the background process never hold references to each
//! other. They talk through one [`MessageBus`] per process, each through a
//! [`RestrictedView`] that can only reach what its registration declared.
//!
//! # Message Types
//!
//! | Kind | API | Handlers | Result |
//! |------|-----|----------|--------|
//! | Action | [`RestrictedView::call`] | exactly one | handler's value or error |
//! | Event | [`RestrictedView::publish`] | zero or more, in order | aggregated subscriber errors |
//!
//! # Layers
//!
//! ```text
//! RestrictedView ── Capability check (pure, fail-closed)
//!       │
//!       ▼
//! MessageBus ──┬── ActionRegistry  (type → 1 handler)
//!              └── EventHub        (type → N subscribers + latest payload)
//! ```
//!
//! # Example
//!
//! ```
//! use relay_bus::MessageBus;
//! use serde_json::json;
//! use std::sync::{Arc, Mutex};
//!
//! let bus = MessageBus::new();
//! let network = bus
//!     .get_restricted("Network", Vec::<&str>::new(), Vec::<&str>::new())
//!     .unwrap();
//! let tokens = bus
//!     .get_restricted("Tokens", Vec::<&str>::new(), ["Network:chainChanged"])
//!     .unwrap();
//!
//! let seen = Arc::new(Mutex::new(Vec::new()));
//! let sink = Arc::clone(&seen);
//! tokens
//!     .subscribe("Network:chainChanged", move |chain| {
//!         sink.lock().unwrap().push(chain.clone());
//!         Ok(())
//!     })
//!     .unwrap();
//!
//! network.publish("Network:chainChanged", json!("0x1")).unwrap();
//! assert_eq!(*seen.lock().unwrap(), vec![json!("0x1")]);
//! ```

mod action;
mod bus;
mod capability;
mod error;
mod event;
mod restricted;

pub use action::{handler_fn, ActionHandler, ActionRegistry};
pub use bus::MessageBus;
pub use capability::Capability;
pub use error::{Access, BusError, HandlerError, SubscriberErrors, SubscriberFailure};
pub use event::{EventCallback, EventHub, Selector, SubscribeOptions, Subscription};
pub use restricted::RestrictedView;

pub use async_trait::async_trait;
pub use relay_types::{ActionType, EventType, Namespace};
