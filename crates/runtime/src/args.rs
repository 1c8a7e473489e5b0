//! Variadic argument binding
//!
//! Binds the arguments of a native call to a list of out-parameters:
//! position 1 to the first parameter, position 2 to the second, and so on.
//!
//! ```ignore
//! fn set_size(state: &mut dyn LuaState) -> Result<i32, ScriptError> {
//!     let mut name = String::new();
//!     let mut width = 0i64;
//!     let mut height = 100i64;
//!     // height may be omitted
//!     check_args_min(state, 2, &mut [&mut name, &mut width, &mut height])?;
//!     ...
//! }
//! ```
//!
//! Binding runs left to right and stops at the first failure. The error is
//! meant to be propagated with `?`, which aborts the native call, so a
//! partially bound parameter list is never observed.

use crate::check::Check;
use crate::error::CheckError;
use lch_core::LuaState;
use tracing::trace;

/// Where one out-parameter is read from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Binding {
    pub position: i32,
    /// An absent or nil argument leaves the parameter untouched
    pub optional: bool,
}

/// Bindings for `count` parameters. Parameters past `min_required` are
/// optional; `None` makes every parameter mandatory.
pub fn bindings(count: usize, min_required: Option<usize>) -> Vec<Binding> {
    (1..=count)
        .map(|position| Binding {
            position: position as i32,
            optional: min_required.is_some_and(|min| position > min),
        })
        .collect()
}

/// Bind positions `1..=params.len()`, all mandatory.
pub fn check_args(
    state: &mut dyn LuaState,
    params: &mut [&mut dyn Check],
) -> Result<(), CheckError> {
    bind(state, &bindings(params.len(), None), params)
}

/// Bind positions `1..=params.len()`; only the first `min_required` must be
/// present.
pub fn check_args_min(
    state: &mut dyn LuaState,
    min_required: usize,
    params: &mut [&mut dyn Check],
) -> Result<(), CheckError> {
    bind(state, &bindings(params.len(), Some(min_required)), params)
}

fn bind(
    state: &mut dyn LuaState,
    bindings: &[Binding],
    params: &mut [&mut dyn Check],
) -> Result<(), CheckError> {
    for (binding, param) in bindings.iter().zip(params.iter_mut()) {
        if binding.optional && state.is_none_or_nil(binding.position) {
            trace!(position = binding.position, "optional argument absent");
            continue;
        }
        param.check(state, binding.position)?;
    }
    Ok(())
}
