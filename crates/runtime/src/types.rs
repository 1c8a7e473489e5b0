//! Named type registrations
//!
//! A foreign type is identified by a named metatable. The registration
//! optionally declares a `__gc` finalizer; whether it does decides, at push
//! time, if objects of that type are boxed (collectible) or raw.

use crate::guard::StackGuard;
use lch_core::{LuaState, LuaType, NativeFn};
use tracing::debug;

/// Register `name`, installing `finalizer` as its `__gc` when given.
/// Returns false when the name was already registered; a finalizer is
/// still installed on the existing registration.
pub fn register_type(state: &mut dyn LuaState, name: &str, finalizer: Option<NativeFn>) -> bool {
    let guard = StackGuard::new(state);
    let created = state.new_metatable(name);
    let finalized = finalizer.is_some();
    if let Some(gc) = finalizer {
        state.push_function(gc);
        state.set_field(-2, "__gc");
    }
    state.pop(1);
    guard.finish(state, 0);
    debug!(name, created, finalized, "registered type");
    created
}

/// Whether the registration of `name` declares a finalizer.
pub fn has_finalizer(state: &mut dyn LuaState, name: &str) -> bool {
    if state.push_named_metatable(name) != LuaType::Table {
        state.pop(1);
        return false;
    }
    let gc = state.get_field(-1, "__gc");
    state.pop(2);
    gc != LuaType::Nil
}
