//! Marshalling errors
//!
//! Decode failures are [`CheckError`]s. They abort the native call that
//! triggered them: native functions propagate them with `?`, and the
//! `From<CheckError> for ScriptError` conversion hands them to the runtime's
//! own error channel as a `bad argument #n (...)` message.
//!
//! Callback failures are the exception. A failing callback must not take
//! down the host code that merely triggered it, so protected invocation logs
//! the traced message and records it in a thread-local slot instead of
//! propagating it:
//!
//! ```ignore
//! call_function(state, handler.handle(), 1);
//! if let Some(msg) = take_callback_error() {
//!     // inspect or report the swallowed failure
//! }
//! ```

use lch_core::{LuaType, ScriptError};
use std::cell::RefCell;
use std::fmt;

/// Error category, independent of the detail carried by each variant.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// The value's dynamic type (or foreign type identity) is not the
    /// required shape.
    ArgumentType,
    /// The value has the right type but invalid structure.
    Argument,
    /// A generic decode met a dynamic type with no mapping.
    UnsupportedValueType,
}

/// Failure to decode the stack value at `position`.
#[derive(Debug, Clone, PartialEq)]
pub enum CheckError {
    /// Wrong dynamic type
    ArgumentType {
        position: i32,
        expected: &'static str,
        got: LuaType,
    },
    /// Foreign value whose identity tag is not the required registration
    ObjectIdentity { position: i32, type_name: String },
    /// Table key that is neither a string nor an integer
    UnsupportedKeyType { position: i32, key_type: LuaType },
    /// Tables nested deeper than the configured limit (self-referencing
    /// tables end up here)
    TooDeep { position: i32, limit: usize },
    /// Number with no representation in the requested integer type
    NoIntegerRepresentation { position: i32 },
    /// Generic decode of a type with no `Value` mapping
    UnsupportedValueType { position: i32, got: LuaType },
}

impl CheckError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            CheckError::ArgumentType { .. } | CheckError::ObjectIdentity { .. } => {
                ErrorKind::ArgumentType
            }
            CheckError::UnsupportedKeyType { .. }
            | CheckError::TooDeep { .. }
            | CheckError::NoIntegerRepresentation { .. } => ErrorKind::Argument,
            CheckError::UnsupportedValueType { .. } => ErrorKind::UnsupportedValueType,
        }
    }

    /// Stack position of the offending argument.
    pub fn position(&self) -> i32 {
        match self {
            CheckError::ArgumentType { position, .. }
            | CheckError::ObjectIdentity { position, .. }
            | CheckError::UnsupportedKeyType { position, .. }
            | CheckError::TooDeep { position, .. }
            | CheckError::NoIntegerRepresentation { position }
            | CheckError::UnsupportedValueType { position, .. } => *position,
        }
    }

    pub(crate) fn type_mismatch(position: i32, expected: &'static str, got: LuaType) -> Self {
        CheckError::ArgumentType {
            position,
            expected,
            got,
        }
    }
}

impl fmt::Display for CheckError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CheckError::ArgumentType {
                position,
                expected,
                got,
            } => write!(
                f,
                "bad argument #{} ({} expected, got {})",
                position, expected, got
            ),
            CheckError::ObjectIdentity {
                position,
                type_name,
            } => write!(f, "bad argument #{} (need a {})", position, type_name),
            CheckError::UnsupportedKeyType { position, key_type } => write!(
                f,
                "bad argument #{} (unsupported table key type: {})",
                position, key_type
            ),
            CheckError::TooDeep { position, limit } => write!(
                f,
                "bad argument #{} (table nested deeper than {} levels)",
                position, limit
            ),
            CheckError::NoIntegerRepresentation { position } => write!(
                f,
                "bad argument #{} (number has no integer representation)",
                position
            ),
            CheckError::UnsupportedValueType { position, got } => write!(
                f,
                "bad argument #{} (unsupported value type: {})",
                position, got
            ),
        }
    }
}

impl std::error::Error for CheckError {}

impl From<CheckError> for ScriptError {
    fn from(e: CheckError) -> Self {
        ScriptError::Runtime(e.to_string())
    }
}

thread_local! {
    /// Message of the last callback failure swallowed on this thread
    static LAST_CALLBACK_ERROR: RefCell<Option<String>> = const { RefCell::new(None) };
}

/// Record a swallowed callback failure.
pub fn set_callback_error(msg: impl Into<String>) {
    LAST_CALLBACK_ERROR.with(|e| {
        *e.borrow_mut() = Some(msg.into());
    });
}

/// Take (and clear) the last swallowed callback failure.
pub fn take_callback_error() -> Option<String> {
    LAST_CALLBACK_ERROR.with(|e| e.borrow_mut().take())
}

pub fn has_callback_error() -> bool {
    LAST_CALLBACK_ERROR.with(|e| e.borrow().is_some())
}

pub fn clear_callback_error() {
    LAST_CALLBACK_ERROR.with(|e| *e.borrow_mut() = None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_messages_name_position_and_shape() {
        let e = CheckError::type_mismatch(2, "boolean", LuaType::Number);
        assert_eq!(e.to_string(), "bad argument #2 (boolean expected, got number)");
        assert_eq!(e.kind(), ErrorKind::ArgumentType);
        assert_eq!(e.position(), 2);

        let e = CheckError::ObjectIdentity {
            position: 1,
            type_name: "Foo".to_string(),
        };
        assert_eq!(e.to_string(), "bad argument #1 (need a Foo)");
        assert_eq!(e.kind(), ErrorKind::ArgumentType);

        let e = CheckError::UnsupportedKeyType {
            position: 1,
            key_type: LuaType::Boolean,
        };
        assert_eq!(
            e.to_string(),
            "bad argument #1 (unsupported table key type: boolean)"
        );
        assert_eq!(e.kind(), ErrorKind::Argument);

        let e = CheckError::UnsupportedValueType {
            position: 3,
            got: LuaType::Thread,
        };
        assert_eq!(e.kind(), ErrorKind::UnsupportedValueType);
    }

    #[test]
    fn test_converts_into_runtime_error() {
        let e = CheckError::TooDeep {
            position: 1,
            limit: 4,
        };
        let script: ScriptError = e.into();
        assert_eq!(
            script,
            ScriptError::Runtime("bad argument #1 (table nested deeper than 4 levels)".into())
        );
    }

    #[test]
    fn test_set_and_take_callback_error() {
        clear_callback_error();
        assert!(!has_callback_error());

        set_callback_error("callback failed");
        assert!(has_callback_error());
        assert_eq!(take_callback_error(), Some("callback failed".to_string()));
        assert!(!has_callback_error());
    }
}
