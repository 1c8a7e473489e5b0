//! LCH Core: the scripting runtime boundary
//!
//! The marshalling layer never talks to a concrete runtime. It talks to the
//! [`LuaState`] trait, which mirrors the runtime's stack API: positional
//! access to the evaluation stack, table traversal, the retention registry,
//! named metatables and protected calls.
//!
//! # Modules
//!
//! - `types`: dynamic type tags, registry handles, foreign pointers
//! - `error`: errors raised into the runtime and protected-call status
//! - `state`: the `LuaState` trait and native callables
//! - `number`: number/string coercion rules
//! - `slot`: value cells of the reference state
//! - `vm`: `VmState`, an in-process implementation of `LuaState`

pub mod error;
pub mod number;
pub mod slot;
pub mod state;
pub mod types;
pub mod vm;

pub use error::{CallStatus, ScriptError};
pub use state::{LuaState, NativeFn, native};
pub use types::{ForeignPtr, LuaType, MULTRET, RegistryRef};
pub use vm::VmState;
