//! Stack balance checking
//!
//! Every operation in this crate either leaves the stack at the depth it
//! found it or moves it by a documented amount. `StackGuard` records the
//! entry depth so the exit depth can be asserted, and restored on error
//! paths that bail out halfway through a traversal.

use lch_core::LuaState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StackGuard {
    entry: i32,
}

impl StackGuard {
    pub fn new(state: &dyn LuaState) -> Self {
        Self { entry: state.top() }
    }

    pub fn entry(&self) -> i32 {
        self.entry
    }

    /// Assert (debug builds) that the stack moved by exactly `delta`.
    pub fn finish(self, state: &dyn LuaState, delta: i32) {
        debug_assert_eq!(
            state.top(),
            self.entry + delta,
            "stack unbalanced: entered at {}, expected net {:+}",
            self.entry,
            delta
        );
    }

    /// Drop everything pushed since the guard was created.
    pub fn restore(self, state: &mut dyn LuaState) {
        if state.top() > self.entry {
            state.set_top(self.entry);
        }
    }
}

/// Positive form of `index`, so it stays valid while values are pushed.
/// Positive and pseudo indices (0) are returned unchanged.
pub fn absolute(state: &dyn LuaState, index: i32) -> i32 {
    if index < 0 {
        state.top() + index + 1
    } else {
        index
    }
}
