//! Error types for the bridge.

use crate::host::HostValue;
use std::fmt;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, BridgeError>;

/// Errors raised by bridge operations.
///
/// Errors that cross into V8 (returned from host callbacks) are thrown as
/// JavaScript exceptions: `Type` becomes a `TypeError`, `Js` rethrows the
/// original value, everything else becomes a plain `Error`.
#[derive(Debug, Error)]
pub enum BridgeError {
    /// A value had the wrong type for the operation.
    #[error("TypeError: {0}")]
    Type(String),

    /// Assignment to an attribute that cannot be written.
    #[error("AttributeError: {0}")]
    ReadOnly(String),

    /// The context or its host global could not be built.
    #[error("Context construction failed: {0}")]
    Construction(String),

    /// A script threw, failed to compile, or was terminated.
    #[error(transparent)]
    Js(#[from] JsException),

    /// The watchdog thread could not be started.
    #[error("Watchdog error: {0}")]
    Io(#[from] std::io::Error),

    /// The isolate is borrowed by something other than a bridge operation.
    #[error("Engine is busy (isolate borrowed outside of an operation)")]
    EngineBusy,

    /// The context was destroyed.
    #[error("Context has been destroyed")]
    Destroyed,

    /// A script or proxy belongs to a different engine.
    #[error("Value belongs to a different engine")]
    ForeignEngine,

    /// A future was settled twice, or a similar protocol violation.
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Error raised by host code.
    #[error("{0}")]
    Host(String),
}

impl BridgeError {
    /// Shorthand for `BridgeError::Type`.
    pub fn type_error(message: impl Into<String>) -> Self {
        Self::Type(message.into())
    }

    /// Shorthand for `BridgeError::Host`.
    pub fn host(message: impl Into<String>) -> Self {
        Self::Host(message.into())
    }

    /// True when the error comes from an execution stopped by the watchdog.
    pub fn is_timeout(&self) -> bool {
        matches!(self, Self::Js(e) if e.timed_out)
    }

    /// The exception raised by script code, if any.
    pub fn as_js(&self) -> Option<&JsException> {
        match self {
            Self::Js(e) => Some(e),
            _ => None,
        }
    }
}

/// An exception raised inside V8.
#[derive(Debug, Error)]
pub struct JsException {
    /// `String(exception)`, e.g. `"Error: boom"`.
    pub message: String,

    /// The `stack` property of the thrown value, when it has one.
    pub stack: Option<String>,

    /// The thrown value converted to the host side.
    pub value: HostValue,

    /// Set when the execution was terminated by the watchdog.
    pub timed_out: bool,
}

impl JsException {
    pub(crate) fn terminated(timed_out: bool) -> Self {
        let message = if timed_out {
            "Execution timed out".to_string()
        } else {
            "Execution terminated".to_string()
        };

        Self {
            message,
            stack: None,
            value: HostValue::Undefined,
            timed_out,
        }
    }
}

impl fmt::Display for JsException {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.message)
    }
}
