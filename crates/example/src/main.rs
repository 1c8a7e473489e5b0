//! lch-example - call the example library's `print` from the host
//!
//! Opens `lch_example` in a fresh reference state, retains its `print`
//! function and invokes it once per message through protected invocation.
//!
//! Usage:
//!   lch-example hello world       # prints "hello" then "world"
//!   LCH_LOG=debug lch-example hi  # with retain/release logging
//!
//! Exits with status 1 if any invocation failed.

use clap::Parser as ClapParser;
use lch_core::{LuaState, LuaType, VmState, native};
use lch_example::{LIBRARY_NAME, open_lch_example};
use lch_runtime::{CallOutcome, Check, Function, Push, call_function};
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(ClapParser)]
#[command(name = "lch-example")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Invoke the lch_example print callback", long_about = None)]
struct Args {
    /// Messages to print, one invocation each
    #[arg(default_value = "hello from lch_example")]
    messages: Vec<String>,

    /// Pass each message as a number (non-numeric messages then fail)
    #[arg(long)]
    numeric: bool,
}

fn main() {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_env("LCH_LOG").unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut state = VmState::new();
    state.open_debug();

    if let Err(msg) = open_library(&mut state) {
        error!("cannot open {}: {}", LIBRARY_NAME, msg);
        std::process::exit(1);
    }

    let mut print = Function::UNSET;
    if let Err(e) = retain_print(&mut state, &mut print) {
        error!("{}", e);
        std::process::exit(1);
    }

    let mut failures = 0;
    for msg in &args.messages {
        if args.numeric {
            match msg.parse::<f64>() {
                Ok(n) => Push::push(&n, &mut state),
                // a table is not printable, so the callback fails
                Err(_) => state.new_table(),
            }
        } else {
            Push::push(msg, &mut state);
        }
        if let CallOutcome::Failed(_) = call_function(&mut state, print.handle(), 1) {
            failures += 1;
        }
    }

    print.release(&mut state);
    info!(failures, "done");
    state.close();

    if failures > 0 {
        std::process::exit(1);
    }
}

/// `lch_example = require("lch_example")`, run under protection.
fn open_library(state: &mut VmState) -> Result<(), String> {
    state.push_function(native(open_lch_example));
    if state.pcall(0, 1, 0).is_err() {
        let msg = state.to_bytes(-1).unwrap_or_default();
        state.pop(1);
        return Err(String::from_utf8_lossy(&msg).into_owned());
    }
    state.set_global(LIBRARY_NAME);
    Ok(())
}

fn retain_print(state: &mut VmState, print: &mut Function) -> Result<(), String> {
    state.get_global(LIBRARY_NAME);
    let found = state.get_field(-1, "print");
    if found != LuaType::Function {
        state.pop(2);
        return Err(format!("{}.print is a {}, not a function", LIBRARY_NAME, found));
    }
    let result = print.check(state, -1).map_err(|e| e.to_string());
    state.pop(2);
    result
}
