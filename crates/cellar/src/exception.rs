use std::fmt;

use serde::{Deserialize, Serialize};
use strum::{Display, EnumString, IntoStaticStr};

/// Result type alias for operations that can produce a runtime error.
pub type RunResult<T> = Result<T, RunError>;

/// Error classes surfaced to scripts.
///
/// Uses strum derives for automatic `Display`, `FromStr`, and `Into<&'static str>` implementations.
/// The string representation matches the script-visible constructor name (e.g. `RangeError`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Display, EnumString, IntoStaticStr, Serialize, Deserialize)]
pub enum ExcType {
    /// Operation invoked on the wrong receiver kind, on a non-constructor path, or on a detached buffer.
    TypeError,
    /// Numeric argument out of range, or an access outside a view's window.
    RangeError,
    /// Heap exhausted while allocating. Raised only through [`RunError::UncatchableExc`].
    MemoryError,
}

impl ExcType {
    /// Creates a simple TypeError with a custom message.
    #[must_use]
    pub(crate) fn type_error(msg: impl fmt::Display) -> RunError {
        Exception::new_msg(Self::TypeError, msg).into()
    }

    /// Creates a simple RangeError with a custom message.
    #[must_use]
    pub(crate) fn range_error(msg: impl fmt::Display) -> RunError {
        Exception::new_msg(Self::RangeError, msg).into()
    }

    /// TypeError for a builtin method called with a `this` of the wrong kind.
    ///
    /// Format: `Method Map.prototype.get called on incompatible receiver [object Set]`
    #[must_use]
    pub(crate) fn incompatible_receiver(method: &str, receiver: impl fmt::Display) -> RunError {
        Self::type_error(format!("Method {method} called on incompatible receiver {receiver}"))
    }

    /// TypeError for a constructor invoked as a plain function.
    #[must_use]
    pub(crate) fn constructor_requires_new(name: &str) -> RunError {
        Self::type_error(format!("{name}() called in function context instead of constructor"))
    }

    /// TypeError for reads and writes through a view whose buffer was detached.
    #[must_use]
    pub(crate) fn detached_buffer(method: &str) -> RunError {
        Self::type_error(format!("{method}(): Buffer is detached"))
    }
}

/// An error value as seen by scripts: its class plus an optional message.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Exception {
    exc_type: ExcType,
    message: Option<String>,
}

impl Exception {
    /// Creates a new exception with the given type and optional message.
    #[must_use]
    pub fn new(exc_type: ExcType, message: Option<String>) -> Self {
        Self { exc_type, message }
    }

    /// Creates a new exception with the given type and message.
    #[must_use]
    pub fn new_msg(exc_type: ExcType, message: impl fmt::Display) -> Self {
        Self {
            exc_type,
            message: Some(message.to_string()),
        }
    }

    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        self.exc_type
    }

    #[must_use]
    pub fn message(&self) -> Option<&str> {
        self.message.as_deref()
    }

    #[must_use]
    pub fn into_message(self) -> Option<String> {
        self.message
    }
}

impl fmt::Display for Exception {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(msg) => write!(f, "{}: {msg}", self.exc_type),
            None => write!(f, "{}", self.exc_type),
        }
    }
}

impl std::error::Error for Exception {}

/// Runtime error types that can occur while executing heap operations.
///
/// Two variants:
/// - `Exc`: script-visible error that a caller may catch (TypeError, RangeError)
/// - `UncatchableExc`: allocation failure from resource limits; fatal to the current operation
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum RunError {
    /// Catchable script error.
    Exc(Box<Exception>),
    /// Error from resource limits that must propagate to the embedder.
    UncatchableExc(Box<Exception>),
}

impl RunError {
    /// Returns the error class regardless of catchability.
    #[must_use]
    pub fn exc_type(&self) -> ExcType {
        match self {
            Self::Exc(exc) | Self::UncatchableExc(exc) => exc.exc_type(),
        }
    }

    /// Returns true if this error is a catchable exception of `exc_type`.
    #[must_use]
    pub fn is_exception_type(&self, exc_type: ExcType) -> bool {
        match self {
            Self::Exc(exc) => exc.exc_type() == exc_type,
            Self::UncatchableExc(_) => false,
        }
    }

    #[must_use]
    pub fn is_uncatchable(&self) -> bool {
        matches!(self, Self::UncatchableExc(_))
    }

    /// Converts this error into the underlying [`Exception`].
    #[must_use]
    pub fn into_exception(self) -> Exception {
        match self {
            Self::Exc(exc) | Self::UncatchableExc(exc) => *exc,
        }
    }
}

impl From<Exception> for RunError {
    fn from(exc: Exception) -> Self {
        Self::Exc(Box::new(exc))
    }
}

impl fmt::Display for RunError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exc(exc) | Self::UncatchableExc(exc) => exc.fmt(f),
        }
    }
}

impl std::error::Error for RunError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_includes_class_and_message() {
        let err = ExcType::range_error("Offset is outside the bounds of the DataView");
        assert_eq!(err.to_string(), "RangeError: Offset is outside the bounds of the DataView");
        assert!(err.is_exception_type(ExcType::RangeError));
        assert!(!err.is_uncatchable());
    }

    #[test]
    fn exc_type_parses_from_name() {
        assert_eq!("TypeError".parse::<ExcType>(), Ok(ExcType::TypeError));
        let name: &'static str = ExcType::MemoryError.into();
        assert_eq!(name, "MemoryError");
    }
}
