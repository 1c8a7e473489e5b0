//! The `lch_example` library
//!
//! A module in the shape scripts expect from a native library: opening it
//! pushes a table of functions.
//!
//! ```lua
//! local lch = require("lch_example")
//! lch.print("hello")
//! ```

use lch_core::{LuaState, ScriptError, native};
use lch_runtime::{check_args, no_results};
use std::cell::RefCell;
use std::io::Write;
use std::rc::Rc;
use tracing::trace;

/// Name the library is registered under.
pub const LIBRARY_NAME: &str = "lch_example";

/// Where `print` writes.
pub type Output = Rc<RefCell<dyn Write>>;

/// Push the library table, printing to stdout. Returns the number of values
/// pushed, like any module opener.
pub fn open_lch_example(state: &mut dyn LuaState) -> Result<i32, ScriptError> {
    let stdout: Output = Rc::new(RefCell::new(std::io::stdout()));
    open_with_output(state, stdout)
}

/// Push the library table with `print` writing to `out`.
pub fn open_with_output(state: &mut dyn LuaState, out: Output) -> Result<i32, ScriptError> {
    state.new_table();
    state.push_function(native(move |s| print(s, &out)));
    state.set_field(-2, "print");
    Ok(1)
}

/// `print(msg)`: write `msg` and a newline.
fn print(state: &mut dyn LuaState, out: &Output) -> Result<i32, ScriptError> {
    let mut msg = Vec::<u8>::new();
    check_args(state, &mut [&mut msg])?;
    trace!(len = msg.len(), "print");

    let mut out = out.borrow_mut();
    out.write_all(&msg)
        .and_then(|_| out.write_all(b"\n"))
        .and_then(|_| out.flush())
        .map_err(|e| ScriptError::runtime(format!("print: {}", e)))?;
    Ok(no_results())
}
