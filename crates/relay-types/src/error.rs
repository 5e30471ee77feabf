//! Machine-readable error codes shared by all relay crates.
//!
//! Each crate owns a code prefix:
//!
//! | Crate | Prefix |
//! |-------|--------|
//! | `relay-types` | `TYPES_` |
//! | `relay-bus` | `BUS_` |
//! | `relay-port` | `PORT_` |
//! | `relay-port` config | `CONFIG_` |
//!
//! Codes are part of the wire contract: a remote action call that fails is
//! answered with the code, so the calling process can branch on it without
//! parsing messages.

/// Stable code and retry classification for an error.
///
/// # Example
///
/// ```
/// use relay_types::ErrorCode;
///
/// enum PortFault {
///     Closed,
///     Garbled,
/// }
///
/// impl ErrorCode for PortFault {
///     fn code(&self) -> &'static str {
///         match self {
///             Self::Closed => "PORT_CLOSED",
///             Self::Garbled => "PORT_GARBLED",
///         }
///     }
///
///     fn is_recoverable(&self) -> bool {
///         matches!(self, Self::Closed)
///     }
/// }
///
/// assert_eq!(PortFault::Garbled.code(), "PORT_GARBLED");
/// assert!(PortFault::Closed.is_recoverable());
/// ```
pub trait ErrorCode {
    /// UPPER_SNAKE_CASE code, prefixed with the owning crate's namespace.
    ///
    /// Never change a code once released; remote peers match on it.
    fn code(&self) -> &'static str;

    /// `true` when the caller can reasonably retry or correct the situation
    /// at runtime; `false` for wiring bugs and malformed input.
    fn is_recoverable(&self) -> bool;
}

/// Asserts that `err` carries a well-formed code with the given prefix.
///
/// # Panics
///
/// Panics if the code is empty, lacks `expected_prefix`, or is not
/// UPPER_SNAKE_CASE.
///
/// ```
/// use relay_types::{assert_error_code, ErrorCode};
///
/// struct Boom;
/// impl ErrorCode for Boom {
///     fn code(&self) -> &'static str { "BUS_BOOM" }
///     fn is_recoverable(&self) -> bool { false }
/// }
///
/// assert_error_code(&Boom, "BUS_");
/// ```
pub fn assert_error_code<E: ErrorCode>(err: &E, expected_prefix: &str) {
    let code = err.code();
    assert!(!code.is_empty(), "error code must not be empty");
    assert!(
        code.starts_with(expected_prefix),
        "error code '{code}' must start with prefix '{expected_prefix}'"
    );
    assert!(
        is_upper_snake_case(code),
        "error code '{code}' must be UPPER_SNAKE_CASE"
    );
}

/// Runs [`assert_error_code`] over every value in `errors`.
///
/// Tests pass one value per enum variant so a newly added variant with a
/// sloppy code fails immediately.
pub fn assert_error_codes<E: ErrorCode>(errors: &[E], expected_prefix: &str) {
    errors
        .iter()
        .for_each(|err| assert_error_code(err, expected_prefix));
}

fn is_upper_snake_case(s: &str) -> bool {
    !s.is_empty()
        && s.split('_').all(|segment| {
            !segment.is_empty()
                && segment
                    .chars()
                    .all(|c| c.is_ascii_uppercase() || c.is_ascii_digit())
        })
}
