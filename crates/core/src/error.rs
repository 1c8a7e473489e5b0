//! Errors that cross the runtime boundary
//!
//! Native functions report failure by returning a `ScriptError`; the state
//! turns it into a runtime error value and unwinds to the nearest protected
//! call, the same way a raised error would inside the runtime itself.

use std::fmt;

/// An error raised into the runtime by native code.
#[derive(Debug, Clone, PartialEq)]
pub enum ScriptError {
    /// Raise this message as a string error value.
    Runtime(String),
    /// Raise whatever value is on top of the stack (it is popped).
    Raised,
}

impl ScriptError {
    pub fn runtime(msg: impl Into<String>) -> Self {
        ScriptError::Runtime(msg.into())
    }
}

impl fmt::Display for ScriptError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ScriptError::Runtime(msg) => f.write_str(msg),
            ScriptError::Raised => write!(f, "error object is on the stack"),
        }
    }
}

impl std::error::Error for ScriptError {}

/// Non-OK status of a protected call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CallStatus {
    /// The callable raised an error.
    Runtime,
    /// The message handler itself raised an error.
    MessageHandler,
}

impl fmt::Display for CallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CallStatus::Runtime => write!(f, "runtime error"),
            CallStatus::MessageHandler => write!(f, "error in error handling"),
        }
    }
}

impl std::error::Error for CallStatus {}
