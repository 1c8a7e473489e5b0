//! Protected invocation of retained callables
//!
//! Callbacks are invoked on behalf of host code that has no way to handle a
//! script error, so failures stop here: the traced message is logged and
//! recorded as the thread's last callback error, and the caller carries on.

use crate::config::config;
use crate::error::set_callback_error;
use lch_core::{LuaState, LuaType, RegistryRef, ScriptError, native};
use tracing::{debug, error};

/// How a [`call_function`] went.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CallOutcome {
    /// The handle was unset; the arguments were discarded
    Skipped,
    Completed,
    /// The call raised; carries the (traced) error message
    Failed(String),
}

impl CallOutcome {
    pub fn is_failure(&self) -> bool {
        matches!(self, CallOutcome::Failed(_))
    }
}

/// Message handler appending a stack traceback through `debug.traceback`.
///
/// Non-string errors are passed through untouched, as is the message when
/// the `debug` library is not loaded.
pub fn traceback(state: &mut dyn LuaState) -> Result<i32, ScriptError> {
    if !state.is_string(1) {
        state.set_top(1);
        return Ok(1);
    }
    if state.get_global("debug") != LuaType::Table {
        state.pop(1);
        return Ok(1);
    }
    if state.get_field(-1, "traceback") != LuaType::Function {
        state.pop(2);
        return Ok(1);
    }
    state.remove(-2);
    state.push_value(1);
    // skip this handler and the traceback function itself
    state.push_integer(2);
    state.call(2, 1)?;
    Ok(1)
}

/// Call the function retained by `func` with the `argc` values on top of
/// the stack as arguments, discarding any results.
///
/// An unset handle discards the arguments without calling anything. In
/// every case the arguments are consumed and nothing else is left behind.
/// Whether failures carry a traceback follows [`config()`].
pub fn call_function(state: &mut dyn LuaState, func: RegistryRef, argc: i32) -> CallOutcome {
    call_function_with(state, func, argc, config().traceback)
}

/// [`call_function`] with the traceback handler chosen explicitly. Without
/// it a failure reports the raw error message.
pub fn call_function_with(
    state: &mut dyn LuaState,
    func: RegistryRef,
    argc: i32,
    traced: bool,
) -> CallOutcome {
    if func == RegistryRef::NO_REF {
        state.pop(argc);
        return CallOutcome::Skipped;
    }
    let entry = state.top() - argc;

    let mut errfunc = 0;
    if traced {
        state.push_function(native(traceback));
        errfunc = state.top();
        // below the arguments
        if argc != 0 {
            state.insert(-1 - argc);
            errfunc -= argc;
        }
    }

    state.push_reference(func);
    if argc != 0 {
        state.insert(-1 - argc);
    }

    let outcome = match state.pcall(argc, 0, errfunc) {
        Ok(()) => CallOutcome::Completed,
        Err(status) => {
            let message = match state.to_bytes(-1) {
                Some(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                None => format!("({} error object is not a string)", state.type_of(-1)),
            };
            error!("[LUA ERROR]: {}", message);
            debug!(%status, handle = %func, "callback failed");
            set_callback_error(message.clone());
            state.pop(1);
            CallOutcome::Failed(message)
        }
    };

    if traced {
        state.pop(1);
    }
    debug_assert_eq!(state.top(), entry, "call_function left the stack unbalanced");
    outcome
}

/// Release the registry slot held by `func`.
pub fn remove_function(state: &mut dyn LuaState, func: RegistryRef) {
    if func != RegistryRef::NO_REF {
        debug!(handle = %func, "removing function");
    }
    state.unreference(func);
}
