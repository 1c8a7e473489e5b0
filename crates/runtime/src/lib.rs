//! LCH Runtime: typed marshalling across the scripting runtime's stack
//!
//! Key design principles:
//! - Value: the closed set of data a script can hand over (nil, numbers,
//!   booleans, strings, tables, foreign objects, functions)
//! - Check/Push: decode a stack position into a native value, and back
//! - Handles: retained callables are registry handles released explicitly,
//!   foreign objects are never owned
//!
//! A native function typically binds its arguments, works, and pushes its
//! results:
//!
//! ```ignore
//! fn greet(state: &mut dyn LuaState) -> Result<i32, ScriptError> {
//!     let mut name = String::new();
//!     let mut times = 1i64;
//!     check_args_min(state, 1, &mut [&mut name, &mut times])?;
//!     let greeting = format!("hello {}", name).repeat(times as usize);
//!     Ok(results(state, &[&greeting]))
//! }
//! ```

pub mod args;
pub mod call;
pub mod check;
pub mod config;
pub mod error;
pub mod guard;
pub mod push;
pub mod serialize;
pub mod types;
pub mod value;

pub use args::{Binding, check_args, check_args_min};
pub use call::{CallOutcome, call_function, call_function_with, remove_function, traceback};
pub use check::{Check, check};
pub use config::{BridgeConfig, config};
pub use error::{
    CheckError, ErrorKind, clear_callback_error, has_callback_error, take_callback_error,
};
pub use guard::{StackGuard, absolute};
pub use push::{Push, no_results, results};
pub use types::{has_finalizer, register_type};
pub use value::{Array, Dict, Function, Object, Table, Value, ValueType};

// Serialization types (for persistence/exchange with external systems)
pub use serialize::{SerializeError, TypedValue, ValueSerialize};
