//! Shared vocabulary for the relay message bus.
//!
//! Every other relay crate depends on this one. It stays small on purpose:
//!
//! ```text
//! ┌──────────────────────────────────────────────────────────┐
//! │ relay-types : ErrorCode, MessageId, ActionType, EventType │  ◄── HERE
//! ├──────────────────────────────────────────────────────────┤
//! │ relay-bus   : ActionRegistry, EventHub, MessageBus,       │
//! │               Capability, RestrictedView                  │
//! ├──────────────────────────────────────────────────────────┤
//! │ relay-port  : Frame, Reassembler, PortTransport           │
//! └──────────────────────────────────────────────────────────┘
//! ```
//!
//! # Naming convention
//!
//! Actions and events are addressed by `"Module:name"` strings. The bus
//! treats them as opaque keys, but capability checks need the module part,
//! so they are parsed once into [`ActionType`] / [`EventType`]:
//!
//! ```
//! use relay_types::{ActionType, EventType};
//!
//! let action: ActionType = "AccountsController:getSelectedAccount".parse().unwrap();
//! assert_eq!(action.namespace().as_str(), "AccountsController");
//! assert_eq!(action.name(), "getSelectedAccount");
//!
//! let event = EventType::new("KeyringController:stateChange").unwrap();
//! assert_eq!(event.to_string(), "KeyringController:stateChange");
//! ```

mod error;
mod id;
mod name;

pub use error::{assert_error_code, assert_error_codes, ErrorCode};
pub use id::MessageId;
pub use name::{ActionType, EventType, NameError, Namespace, NAMESPACE_SEPARATOR};
