//! `"Module:name"` identifiers for actions and events.
//!
//! The part before the separator is the owning module's [`Namespace`].
//! Restricted views compare namespaces to decide whether a module is
//! touching its own actions/events or someone else's.

use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

use crate::ErrorCode;

/// Separator between namespace and name.
pub const NAMESPACE_SEPARATOR: char = ':';

/// A malformed action/event/namespace string.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("invalid name '{value}': {reason}")]
pub struct NameError {
    pub value: String,
    pub reason: &'static str,
}

impl NameError {
    fn new(value: &str, reason: &'static str) -> Self {
        Self {
            value: value.to_string(),
            reason,
        }
    }
}

impl ErrorCode for NameError {
    fn code(&self) -> &'static str {
        "TYPES_INVALID_NAME"
    }

    fn is_recoverable(&self) -> bool {
        false
    }
}

/// Module name owning a set of actions and events, e.g. `NetworkController`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Namespace(String);

impl Namespace {
    /// # Errors
    ///
    /// Fails when `value` is empty, contains the separator, or contains
    /// whitespace.
    pub fn new(value: impl Into<String>) -> Result<Self, NameError> {
        let value = value.into();
        validate_segment(&value, "namespace must not be empty")?;
        if value.contains(NAMESPACE_SEPARATOR) {
            return Err(NameError::new(&value, "namespace must not contain ':'"));
        }
        Ok(Self(value))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Namespace {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl FromStr for Namespace {
    type Err = NameError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for Namespace {
    type Error = NameError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<Namespace> for String {
    fn from(ns: Namespace) -> Self {
        ns.0
    }
}

fn validate_segment(value: &str, empty_reason: &'static str) -> Result<(), NameError> {
    if value.is_empty() {
        return Err(NameError::new(value, empty_reason));
    }
    if value.chars().any(char::is_whitespace) {
        return Err(NameError::new(value, "whitespace is not allowed"));
    }
    Ok(())
}

/// Splits `Module:name` into its validated parts, returning the byte index
/// of the separator.
fn split_qualified(value: &str) -> Result<usize, NameError> {
    let Some(idx) = value.find(NAMESPACE_SEPARATOR) else {
        return Err(NameError::new(value, "expected 'Module:name'"));
    };
    let (ns, rest) = value.split_at(idx);
    let name = &rest[NAMESPACE_SEPARATOR.len_utf8()..];
    validate_segment(ns, "namespace must not be empty")?;
    validate_segment(name, "name must not be empty")?;
    Ok(idx)
}

macro_rules! qualified_name {
    ($(#[$meta:meta])* $ty:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(try_from = "String", into = "String")]
        pub struct $ty {
            full: String,
            split: usize,
        }

        impl $ty {
            /// Parses and validates a `Module:name` string.
            ///
            /// # Errors
            ///
            /// Returns [`NameError`] when either part is missing or empty,
            /// or the string contains whitespace.
            pub fn new(value: impl Into<String>) -> Result<Self, NameError> {
                let full = value.into();
                let split = split_qualified(&full)?;
                Ok(Self { full, split })
            }

            /// Owning module.
            #[must_use]
            pub fn namespace(&self) -> Namespace {
                Namespace(self.full[..self.split].to_string())
            }

            /// `true` when this name belongs to `ns`.
            #[must_use]
            pub fn is_in(&self, ns: &Namespace) -> bool {
                &self.full[..self.split] == ns.as_str()
            }

            /// Part after the separator.
            #[must_use]
            pub fn name(&self) -> &str {
                &self.full[self.split + NAMESPACE_SEPARATOR.len_utf8()..]
            }

            #[must_use]
            pub fn as_str(&self) -> &str {
                &self.full
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.full)
            }
        }

        impl FromStr for $ty {
            type Err = NameError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                Self::new(s)
            }
        }

        impl TryFrom<String> for $ty {
            type Error = NameError;

            fn try_from(value: String) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl TryFrom<&str> for $ty {
            type Error = NameError;

            fn try_from(value: &str) -> Result<Self, Self::Error> {
                Self::new(value)
            }
        }

        impl From<$ty> for String {
            fn from(value: $ty) -> Self {
                value.full
            }
        }
    };
}

qualified_name!(
    /// Name of an action: a request with exactly one handler.
    ActionType
);

qualified_name!(
    /// Name of an event: a notification with any number of subscribers.
    EventType
);
