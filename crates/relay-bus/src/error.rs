//! Bus errors.
//!
//! | Variant | Code | Recoverable |
//! |---------|------|-------------|
//! | [`BusError::AlreadyRegistered`] | `BUS_ALREADY_REGISTERED` | No |
//! | [`BusError::NoHandler`] | `BUS_NO_HANDLER` | Yes |
//! | [`BusError::Forbidden`] | `BUS_FORBIDDEN` | Yes |
//! | [`BusError::Handler`] | `BUS_HANDLER_FAILED` | No |
//! | [`BusError::Subscribers`] | `BUS_SUBSCRIBER_FAILED` | No |
//! | [`BusError::InvalidType`] | `BUS_INVALID_TYPE` | No |
//!
//! `AlreadyRegistered` means two modules claim the same action, which is a
//! wiring bug and should abort startup. `Forbidden` is recoverable for the
//! caller but is always logged on the `relay::security` target.

use relay_types::{ActionType, ErrorCode, EventType, NameError, Namespace};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

use crate::event::Subscription;

/// Error type returned by action handlers and event callbacks.
///
/// Boxed so handlers keep their own error types; callers can downcast the
/// error they get back from [`BusError::Handler`].
pub type HandlerError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// What a restricted view attempted when it was refused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Access {
    Call,
    Register,
    Unregister,
    Subscribe,
    Publish,
}

impl fmt::Display for Access {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Call => "call",
            Self::Register => "register",
            Self::Unregister => "unregister",
            Self::Subscribe => "subscribe to",
            Self::Publish => "publish",
        })
    }
}

#[derive(Debug, Error)]
pub enum BusError {
    /// The action already has a handler, which stays in place.
    #[error("action '{0}' already has a handler")]
    AlreadyRegistered(ActionType),

    #[error("no handler registered for action '{0}'")]
    NoHandler(ActionType),

    /// Capability violation, raised before the request reaches the bus.
    #[error("'{view}' is not allowed to {access} '{target}'")]
    Forbidden {
        view: Namespace,
        access: Access,
        target: String,
    },

    /// The action handler's own error, passed through untouched.
    #[error(transparent)]
    Handler(HandlerError),

    /// One or more event subscribers failed; every other subscriber was
    /// still invoked.
    #[error(transparent)]
    Subscribers(SubscriberErrors),

    #[error(transparent)]
    InvalidType(#[from] NameError),
}

impl BusError {
    pub(crate) fn forbidden(view: &Namespace, access: Access, target: impl fmt::Display) -> Self {
        Self::Forbidden {
            view: view.clone(),
            access,
            target: target.to_string(),
        }
    }

    /// Borrows the handler's error when this is [`BusError::Handler`].
    #[must_use]
    pub fn handler_error(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        match self {
            Self::Handler(err) => Some(err.as_ref()),
            _ => None,
        }
    }

    /// Takes the handler's error out when this is [`BusError::Handler`].
    ///
    /// # Errors
    ///
    /// Gives `self` back unchanged for any other variant.
    pub fn into_handler_error(self) -> Result<HandlerError, Self> {
        match self {
            Self::Handler(err) => Ok(err),
            other => Err(other),
        }
    }
}

impl ErrorCode for BusError {
    fn code(&self) -> &'static str {
        match self {
            Self::AlreadyRegistered(_) => "BUS_ALREADY_REGISTERED",
            Self::NoHandler(_) => "BUS_NO_HANDLER",
            Self::Forbidden { .. } => "BUS_FORBIDDEN",
            Self::Handler(_) => "BUS_HANDLER_FAILED",
            Self::Subscribers(_) => "BUS_SUBSCRIBER_FAILED",
            Self::InvalidType(_) => "BUS_INVALID_TYPE",
        }
    }

    fn is_recoverable(&self) -> bool {
        matches!(self, Self::NoHandler(_) | Self::Forbidden { .. })
    }
}

/// A single subscriber that failed during fan-out.
#[derive(Debug)]
pub struct SubscriberFailure {
    pub subscription: Subscription,
    /// Module that owns the subscription, if it came through a restricted view.
    pub owner: Option<Namespace>,
    pub error: HandlerError,
}

/// Aggregate of every subscriber failure from one publish.
#[derive(Debug)]
pub struct SubscriberErrors {
    pub event: EventType,
    pub failures: Vec<SubscriberFailure>,
}

impl SubscriberErrors {
    #[must_use]
    pub fn len(&self) -> usize {
        self.failures.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.failures.is_empty()
    }
}

impl fmt::Display for SubscriberErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} subscriber(s) of '{}' failed",
            self.failures.len(),
            self.event
        )?;
        for failure in &self.failures {
            write!(f, "; {}", failure.error)?;
        }
        Ok(())
    }
}

impl std::error::Error for SubscriberErrors {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        self.failures
            .first()
            .map(|f| f.error.as_ref() as &(dyn std::error::Error + 'static))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use relay_types::assert_error_codes;

    fn action(s: &str) -> ActionType {
        ActionType::new(s).unwrap()
    }

    fn all_variants() -> Vec<BusError> {
        vec![
            BusError::AlreadyRegistered(action("A:x")),
            BusError::NoHandler(action("A:x")),
            BusError::forbidden(&Namespace::new("B").unwrap(), Access::Call, "A:x"),
            BusError::Handler("boom".into()),
            BusError::Subscribers(SubscriberErrors {
                event: EventType::new("A:changed").unwrap(),
                failures: Vec::new(),
            }),
            BusError::InvalidType(ActionType::new("nope").unwrap_err()),
        ]
    }

    #[test]
    fn all_error_codes_valid() {
        assert_error_codes(&all_variants(), "BUS_");
    }

    #[test]
    fn recoverability() {
        let errs = all_variants();
        let recoverable: Vec<_> = errs
            .iter()
            .filter(|e| e.is_recoverable())
            .map(ErrorCode::code)
            .collect();
        assert_eq!(recoverable, vec!["BUS_NO_HANDLER", "BUS_FORBIDDEN"]);
    }

    #[test]
    fn handler_error_is_passed_through_unchanged() {
        let err = BusError::Handler("insufficient funds".into());
        assert_eq!(err.to_string(), "insufficient funds");
        assert_eq!(
            err.handler_error().map(ToString::to_string).as_deref(),
            Some("insufficient funds")
        );
    }

    #[test]
    fn forbidden_message_names_view_and_target() {
        let err = BusError::forbidden(&Namespace::new("Ui").unwrap(), Access::Subscribe, "Keyring:unlock");
        assert_eq!(err.to_string(), "'Ui' is not allowed to subscribe to 'Keyring:unlock'");
    }
}
