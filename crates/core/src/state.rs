//! The scripting runtime's stack API
//!
//! `LuaState` is the fixed surface the marshalling layer consumes. It is
//! deliberately close to the runtime's own C API: values are addressed by
//! stack position, aggregates are walked with a `next` cursor, and anything
//! that must outlive a call is anchored in the retention registry.
//!
//! ## Index addressing
//!
//! - `1..=top` count from the bottom of the current call frame
//! - `-1..=-top` count from the top (`-1` is the topmost value)
//! - `0` and positions past either end are "acceptable" for queries and
//!   report [`LuaType::None`]; operations that need a real slot panic
//!
//! ## Stack effects
//!
//! Every method documents its effect as `[-o, +p]`: it pops `o` values and
//! pushes `p`. Callers are responsible for leaving the stack balanced.

use crate::error::{CallStatus, ScriptError};
use crate::types::{ForeignPtr, LuaType, RegistryRef};
use std::rc::Rc;

/// A callable implemented on the host side.
///
/// Arguments occupy positions `1..=top` of the new frame. Returning `Ok(n)`
/// hands the top `n` values back to the caller.
pub type NativeFn = Rc<dyn Fn(&mut dyn LuaState) -> Result<i32, ScriptError>>;

/// Wrap a closure as a [`NativeFn`].
pub fn native<F>(f: F) -> NativeFn
where
    F: Fn(&mut dyn LuaState) -> Result<i32, ScriptError> + 'static,
{
    Rc::new(f)
}

pub trait LuaState {
    // --- stack -----------------------------------------------------------

    /// Number of values in the current frame. `[-0, +0]`
    fn top(&self) -> i32;

    /// Grow (with nils) or shrink the frame to `index` values. `[-?, +?]`
    fn set_top(&mut self, index: i32);

    /// Convert an acceptable index into its positive form. `[-0, +0]`
    fn abs_index(&self, index: i32) -> i32;

    /// Push a copy of the value at `index`. `[-0, +1]`
    fn push_value(&mut self, index: i32);

    /// Move the top value into `index`, shifting values above it up. `[-1, +1]`
    fn insert(&mut self, index: i32);

    /// Remove the value at `index`, shifting values above it down. `[-1, +0]`
    fn remove(&mut self, index: i32);

    /// Pop `n` values. `[-n, +0]`
    fn pop(&mut self, n: i32) {
        self.set_top(-n - 1);
    }

    // --- type queries ----------------------------------------------------

    fn type_of(&self, index: i32) -> LuaType;

    /// True only for the integer subtype of numbers.
    fn is_integer(&self, index: i32) -> bool;

    /// True for numbers and strings convertible to numbers.
    fn is_number(&self, index: i32) -> bool {
        self.to_number(index).is_some()
    }

    /// True for strings and numbers (numbers convert to strings).
    fn is_string(&self, index: i32) -> bool {
        matches!(self.type_of(index), LuaType::String | LuaType::Number)
    }

    fn is_none_or_nil(&self, index: i32) -> bool {
        self.type_of(index).is_none_or_nil()
    }

    // --- conversions -----------------------------------------------------

    /// Truthiness: everything except nil and false is true.
    fn to_boolean(&self, index: i32) -> bool;

    /// Integer value when the slot has an exact integer representation
    /// (integers, integral floats, numeric strings).
    fn to_integer(&self, index: i32) -> Option<i64>;

    /// Float value of numbers and numeric strings.
    fn to_number(&self, index: i32) -> Option<f64>;

    /// Bytes of a string, or the runtime's formatting of a number.
    fn to_bytes(&self, index: i32) -> Option<Vec<u8>>;

    /// Pointer of a light userdata.
    fn to_light_userdata(&self, index: i32) -> Option<ForeignPtr>;

    /// Pointer stored in a full userdata block.
    fn to_userdata(&self, index: i32) -> Option<ForeignPtr>;

    // --- pushes ----------------------------------------------------------

    fn push_nil(&mut self);
    fn push_boolean(&mut self, b: bool);
    fn push_integer(&mut self, n: i64);
    fn push_number(&mut self, n: f64);
    fn push_bytes(&mut self, s: &[u8]);

    fn push_str(&mut self, s: &str) {
        self.push_bytes(s.as_bytes());
    }

    fn push_light_userdata(&mut self, ptr: ForeignPtr);

    /// Push a new full userdata whose block holds `ptr`. `[-0, +1]`
    fn new_userdata(&mut self, ptr: ForeignPtr);

    fn new_table(&mut self);

    fn push_function(&mut self, f: NativeFn);

    // --- tables ----------------------------------------------------------

    /// `t[k] = v` without metamethods, where `t` is at `index`, `v` is the
    /// top value and `k` the one below it. `[-2, +0]`
    fn raw_set(&mut self, index: i32);

    /// Push `t[name]` (nil when absent or `index` is not a table). `[-0, +1]`
    fn get_field(&mut self, index: i32, name: &str) -> LuaType;

    /// `t[name] = v` where `v` is the top value. `[-1, +0]`
    fn set_field(&mut self, index: i32, name: &str);

    /// Pop a key and push the next key/value pair of the table at `index`.
    /// Returns false, pushing nothing, once the traversal is complete.
    /// `[-1, +(2|0)]`
    fn next(&mut self, index: i32) -> bool;

    /// Primitive equality (no metamethods).
    fn raw_equal(&self, a: i32, b: i32) -> bool;

    // --- globals ---------------------------------------------------------

    fn get_global(&mut self, name: &str) -> LuaType;
    fn set_global(&mut self, name: &str);

    // --- metatables ------------------------------------------------------

    /// Push the metatable of the value at `index`, if it has one.
    /// `[-0, +(0|1)]`
    fn get_metatable(&mut self, index: i32) -> bool;

    /// Pop a table (or nil) and install it as the metatable of the value at
    /// `index`. `[-1, +0]`
    fn set_metatable(&mut self, index: i32);

    /// Push field `name` of the value's metatable when present and non-nil.
    /// Returns [`LuaType::Nil`] and pushes nothing otherwise. `[-0, +(0|1)]`
    fn get_metafield(&mut self, index: i32, name: &str) -> LuaType;

    /// Create the named metatable (with `__name = name`) and push it.
    /// Returns false, pushing the existing table, when the name is taken.
    /// `[-0, +1]`
    fn new_metatable(&mut self, name: &str) -> bool;

    /// Push the named metatable, or nil when unregistered. `[-0, +1]`
    fn push_named_metatable(&mut self, name: &str) -> LuaType;

    // --- retention registry ----------------------------------------------

    /// Pop the top value and anchor it, returning a fresh handle.
    /// A nil value yields [`RegistryRef::REF_NIL`] and is not stored.
    /// `[-1, +0]`
    fn reference(&mut self) -> RegistryRef;

    /// Release a handle. Sentinels are ignored. `[-0, +0]`
    fn unreference(&mut self, r: RegistryRef);

    /// Push the value anchored by `r` (nil for sentinels and released
    /// handles). `[-0, +1]`
    fn push_reference(&mut self, r: RegistryRef) -> LuaType;

    // --- calls -----------------------------------------------------------

    /// Call the function below the top `nargs` values. Errors propagate to
    /// the caller as [`ScriptError::Raised`] with the error value pushed.
    /// `[-(nargs+1), +nresults]`
    fn call(&mut self, nargs: i32, nresults: i32) -> Result<(), ScriptError>;

    /// Protected call. `msgh` is the index of a message handler or `0`.
    /// On failure exactly one value, the (handled) error, replaces the
    /// function and its arguments. `[-(nargs+1), +(nresults|1)]`
    fn pcall(&mut self, nargs: i32, nresults: i32, msgh: i32) -> Result<(), CallStatus>;
}
