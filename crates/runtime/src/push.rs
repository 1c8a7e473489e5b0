//! Encode: native value to stack
//!
//! Every [`Push`] places exactly one value on top of the stack. Tables are
//! filled string keys first, then integer keys, each partition in key order.
//!
//! Objects follow the finalization policy of their type registration: a
//! type whose metatable declares `__gc` gets a full userdata the runtime
//! collects and finalizes; any other object is pushed as a light userdata
//! that the runtime never finalizes.

use crate::guard::StackGuard;
use crate::types::has_finalizer;
use crate::value::{Array, Dict, Function, Object, Table, Value};
use lch_core::{LuaState, LuaType};
use tracing::{debug, trace};

pub trait Push {
    /// Push `self` onto the stack. `[-0, +1]`
    fn push(&self, state: &mut dyn LuaState);
}

impl<T: Push + ?Sized> Push for &T {
    fn push(&self, state: &mut dyn LuaState) {
        (**self).push(state)
    }
}

impl Push for () {
    fn push(&self, state: &mut dyn LuaState) {
        state.push_nil();
    }
}

impl Push for bool {
    fn push(&self, state: &mut dyn LuaState) {
        state.push_boolean(*self);
    }
}

macro_rules! push_integer_as {
    ($($t:ty),*) => {
        $(
            impl Push for $t {
                fn push(&self, state: &mut dyn LuaState) {
                    state.push_integer(*self as i64);
                }
            }
        )*
    };
}

push_integer_as!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl Push for f64 {
    fn push(&self, state: &mut dyn LuaState) {
        state.push_number(*self);
    }
}

impl Push for f32 {
    fn push(&self, state: &mut dyn LuaState) {
        state.push_number(*self as f64);
    }
}

impl Push for str {
    fn push(&self, state: &mut dyn LuaState) {
        state.push_str(self);
    }
}

impl Push for String {
    fn push(&self, state: &mut dyn LuaState) {
        state.push_str(self);
    }
}

impl Push for [u8] {
    fn push(&self, state: &mut dyn LuaState) {
        state.push_bytes(self);
    }
}

impl Push for Vec<u8> {
    fn push(&self, state: &mut dyn LuaState) {
        state.push_bytes(self);
    }
}

fn fill_dict(state: &mut dyn LuaState, dict: &Dict) {
    for (key, value) in dict {
        state.push_bytes(key);
        value.push(state);
        state.raw_set(-3);
    }
}

fn fill_array(state: &mut dyn LuaState, array: &Array) {
    for (key, value) in array {
        state.push_integer(*key);
        value.push(state);
        state.raw_set(-3);
    }
}

impl Push for Table {
    fn push(&self, state: &mut dyn LuaState) {
        let guard = StackGuard::new(state);
        state.new_table();
        fill_dict(state, &self.dict);
        fill_array(state, &self.array);
        guard.finish(state, 1);
    }
}

/// A table holding only the string-keyed partition.
impl Push for Dict {
    fn push(&self, state: &mut dyn LuaState) {
        let guard = StackGuard::new(state);
        state.new_table();
        fill_dict(state, self);
        guard.finish(state, 1);
    }
}

/// A table holding only the integer-keyed partition.
impl Push for Array {
    fn push(&self, state: &mut dyn LuaState) {
        let guard = StackGuard::new(state);
        state.new_table();
        fill_array(state, self);
        guard.finish(state, 1);
    }
}

impl Push for Object {
    fn push(&self, state: &mut dyn LuaState) {
        let guard = StackGuard::new(state);
        if self.type_name.is_empty() {
            state.push_light_userdata(self.ptr);
            guard.finish(state, 1);
            return;
        }

        if has_finalizer(state, &self.type_name) {
            debug!(type_name = %self.type_name, ptr = ?self.ptr, "pushing boxed object");
            state.new_userdata(self.ptr);
        } else {
            debug!(type_name = %self.type_name, ptr = ?self.ptr, "pushing raw object");
            state.push_light_userdata(self.ptr);
        }

        // Without a registration the reference stays untyped
        if state.push_named_metatable(&self.type_name) == LuaType::Table {
            state.set_metatable(-2);
        } else {
            state.pop(1);
        }
        guard.finish(state, 1);
    }
}

/// The retained callable, or nil for an unset or released handle.
impl Push for Function {
    fn push(&self, state: &mut dyn LuaState) {
        state.push_reference(self.handle());
    }
}

impl Push for Value {
    fn push(&self, state: &mut dyn LuaState) {
        trace!(value = %self, "pushing value");
        match self {
            Value::Nil => state.push_nil(),
            Value::Int(n) => state.push_integer(*n),
            Value::Float(f) => state.push_number(*f),
            Value::Boolean(b) => state.push_boolean(*b),
            Value::String(s) => state.push_bytes(s),
            Value::Table(t) => t.as_ref().push(state),
            Value::Object(o) => o.as_ref().push(state),
            Value::Function(handle) => {
                state.push_reference(*handle);
            }
        }
    }
}

/// Push every value in order and return how many stack slots they took,
/// ready to be returned from a native function.
pub fn results(state: &mut dyn LuaState, values: &[&dyn Push]) -> i32 {
    let entry = state.top();
    for value in values {
        value.push(state);
    }
    state.top() - entry
}

/// Result count of a native function that returns nothing.
pub fn no_results() -> i32 {
    0
}
