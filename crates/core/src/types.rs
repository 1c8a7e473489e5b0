//! Dynamic type tags and registry handles shared by every runtime state.

use std::ffi::c_void;
use std::fmt;

/// A foreign (host-side) pointer carried through the runtime without ever
/// being dereferenced by it.
pub type ForeignPtr = *mut c_void;

/// `nresults` value for `call`/`pcall` that keeps every returned value.
pub const MULTRET: i32 = -1;

/// Dynamic type of a stack slot, as the runtime reports it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LuaType {
    /// Index is acceptable but holds no value (past the top of the frame).
    None,
    Nil,
    Boolean,
    LightUserdata,
    Number,
    String,
    Table,
    Function,
    Userdata,
    Thread,
}

impl LuaType {
    /// Name used by the runtime in error messages.
    pub fn name(self) -> &'static str {
        match self {
            LuaType::None => "no value",
            LuaType::Nil => "nil",
            LuaType::Boolean => "boolean",
            LuaType::LightUserdata | LuaType::Userdata => "userdata",
            LuaType::Number => "number",
            LuaType::String => "string",
            LuaType::Table => "table",
            LuaType::Function => "function",
            LuaType::Thread => "thread",
        }
    }

    pub fn is_none_or_nil(self) -> bool {
        matches!(self, LuaType::None | LuaType::Nil)
    }
}

impl fmt::Display for LuaType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Integer handle into the runtime's retention registry.
///
/// A handle is only meaningful while the slot it names is retained; the
/// registry never releases a slot on its own.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct RegistryRef(i32);

impl RegistryRef {
    /// "No reference" sentinel: nothing was ever retained.
    pub const NO_REF: RegistryRef = RegistryRef(-2);
    /// Returned when a nil value is retained; nothing is stored.
    pub const REF_NIL: RegistryRef = RegistryRef(-1);

    pub const fn from_raw(raw: i32) -> Self {
        RegistryRef(raw)
    }

    pub const fn raw(self) -> i32 {
        self.0
    }

    /// True for the two sentinels, which never name a live slot.
    pub const fn is_sentinel(self) -> bool {
        self.0 < 0
    }
}

impl Default for RegistryRef {
    fn default() -> Self {
        RegistryRef::NO_REF
    }
}

impl fmt::Display for RegistryRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match *self {
            RegistryRef::NO_REF => f.write_str("noref"),
            RegistryRef::REF_NIL => f.write_str("refnil"),
            RegistryRef(n) => write!(f, "ref#{}", n),
        }
    }
}
