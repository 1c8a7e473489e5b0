use lch_core::{ForeignPtr, LuaState, RegistryRef};
use std::collections::BTreeMap;
use std::fmt;
use tracing::debug;

/// String-keyed partition of a table. Keys are the runtime's exact bytes.
pub type Dict = BTreeMap<Vec<u8>, Value>;

/// Integer-keyed partition of a table.
pub type Array = BTreeMap<i64, Value>;

/// A decoded runtime table.
///
/// Every entry lives in exactly one partition, chosen by the dynamic type of
/// its key when the table was decoded: string keys go to `dict`, integer
/// keys to `array`. Both partitions iterate in key order.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct Table {
    pub dict: Dict,
    pub array: Array,
}

impl Table {
    pub fn new(dict: Dict, array: Array) -> Self {
        Self { dict, array }
    }

    pub fn is_empty(&self) -> bool {
        self.dict.is_empty() && self.array.is_empty()
    }

    pub fn len(&self) -> usize {
        self.dict.len() + self.array.len()
    }
}

/// Reference to a foreign object: the pointer plus the name of its type
/// registration.
///
/// An empty `type_name` is an untyped reference; any foreign value is
/// accepted for it without an identity check. The pointee is never owned.
#[derive(Debug, Clone, PartialEq)]
pub struct Object {
    pub ptr: ForeignPtr,
    pub type_name: String,
}

impl Object {
    pub fn new(ptr: ForeignPtr, type_name: impl Into<String>) -> Self {
        Self {
            ptr,
            type_name: type_name.into(),
        }
    }

    /// Untyped reference to `ptr`.
    pub fn untyped(ptr: ForeignPtr) -> Self {
        Self::new(ptr, String::new())
    }

    /// Empty out-parameter that will only accept objects of `type_name`.
    pub fn expecting(type_name: impl Into<String>) -> Self {
        Self::new(std::ptr::null_mut(), type_name)
    }

    pub fn is_null(&self) -> bool {
        self.ptr.is_null()
    }
}

impl Default for Object {
    fn default() -> Self {
        Self::untyped(std::ptr::null_mut())
    }
}

/// A callable retained in the runtime's registry.
///
/// Two states: *unset* (the handle is [`RegistryRef::NO_REF`]) and
/// *retained*. Checking a function into this out-parameter releases the old
/// slot before retaining the new callable. Nothing is released on drop:
/// owners must call [`Function::release`] in their teardown path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Function {
    handle: RegistryRef,
}

impl Function {
    pub const UNSET: Function = Function {
        handle: RegistryRef::NO_REF,
    };

    pub fn from_handle(handle: RegistryRef) -> Self {
        Self { handle }
    }

    pub fn handle(&self) -> RegistryRef {
        self.handle
    }

    pub fn is_retained(&self) -> bool {
        self.handle != RegistryRef::NO_REF
    }

    /// Retain the callable at `index`, releasing the slot currently held
    /// first. The registry may hand the released slot straight back.
    pub(crate) fn retain(&mut self, state: &mut dyn LuaState, index: i32) {
        if self.is_retained() {
            debug!(handle = %self.handle, "releasing replaced function");
        }
        state.unreference(self.handle);
        state.push_value(index);
        self.handle = state.reference();
        debug!(handle = %self.handle, "retained function");
    }

    /// Release the registry slot and return to the unset state.
    pub fn release(&mut self, state: &mut dyn LuaState) {
        if self.is_retained() {
            debug!(handle = %self.handle, "releasing function");
        }
        state.unreference(self.handle);
        self.handle = RegistryRef::NO_REF;
    }
}

/// Active tag of a [`Value`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValueType {
    Nil,
    Int,
    Float,
    Boolean,
    String,
    Table,
    Object,
    Function,
}

/// Value: any datum the marshalling layer can decode or encode
///
/// Exactly one tag is active. `String`, `Table` and `Object` own their
/// payload exclusively: cloning deep-copies it and dropping frees it once.
/// `Function` carries a registry handle by value and does not own the slot;
/// releasing it is an explicit operation.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum Value {
    #[default]
    Nil,

    /// 64-bit integer subtype of numbers
    Int(i64),

    /// Float subtype of numbers
    Float(f64),

    Boolean(bool),

    /// Exact bytes of a runtime string, not necessarily UTF-8
    String(Vec<u8>),

    /// Boxed so that nesting keeps `Value` small
    Table(Box<Table>),

    /// Owns the descriptor, never the pointee
    Object(Box<Object>),

    Function(RegistryRef),
}

impl Value {
    pub fn nil() -> Self {
        Value::Nil
    }

    pub fn int(n: i64) -> Self {
        Value::Int(n)
    }

    pub fn float(f: f64) -> Self {
        Value::Float(f)
    }

    pub fn boolean(b: bool) -> Self {
        Value::Boolean(b)
    }

    pub fn string(s: impl Into<Vec<u8>>) -> Self {
        Value::String(s.into())
    }

    /// String from an optional C-style string; `None` becomes `""`.
    pub fn string_or_empty(s: Option<&str>) -> Self {
        Value::string(s.unwrap_or_default())
    }

    pub fn table(table: Table) -> Self {
        Value::Table(Box::new(table))
    }

    pub fn table_parts(dict: Dict, array: Array) -> Self {
        Value::table(Table::new(dict, array))
    }

    /// Table with only string keys.
    pub fn dict(dict: Dict) -> Self {
        Value::table_parts(dict, Array::new())
    }

    /// Table with only integer keys.
    pub fn array(array: Array) -> Self {
        Value::table_parts(Dict::new(), array)
    }

    pub fn object(ptr: ForeignPtr, type_name: impl Into<String>) -> Self {
        Value::Object(Box::new(Object::new(ptr, type_name)))
    }

    pub fn function(handle: RegistryRef) -> Self {
        Value::Function(handle)
    }

    pub fn value_type(&self) -> ValueType {
        match self {
            Value::Nil => ValueType::Nil,
            Value::Int(_) => ValueType::Int,
            Value::Float(_) => ValueType::Float,
            Value::Boolean(_) => ValueType::Boolean,
            Value::String(_) => ValueType::String,
            Value::Table(_) => ValueType::Table,
            Value::Object(_) => ValueType::Object,
            Value::Function(_) => ValueType::Function,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Value::Nil)
    }

    pub fn as_int(&self) -> Option<i64> {
        match self {
            Value::Int(n) => Some(*n),
            _ => None,
        }
    }

    pub fn as_float(&self) -> Option<f64> {
        match self {
            Value::Float(f) => Some(*f),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    pub fn as_bytes(&self) -> Option<&[u8]> {
        match self {
            Value::String(s) => Some(s.as_slice()),
            _ => None,
        }
    }

    /// The string payload, if it is valid UTF-8.
    pub fn as_str(&self) -> Option<&str> {
        self.as_bytes().and_then(|b| std::str::from_utf8(b).ok())
    }

    pub fn as_table(&self) -> Option<&Table> {
        match self {
            Value::Table(t) => Some(t.as_ref()),
            _ => None,
        }
    }

    pub fn as_table_mut(&mut self) -> Option<&mut Table> {
        match self {
            Value::Table(t) => Some(t.as_mut()),
            _ => None,
        }
    }

    pub fn as_dict(&self) -> Option<&Dict> {
        self.as_table().map(|t| &t.dict)
    }

    pub fn as_array(&self) -> Option<&Array> {
        self.as_table().map(|t| &t.array)
    }

    pub fn as_object(&self) -> Option<&Object> {
        match self {
            Value::Object(o) => Some(o.as_ref()),
            _ => None,
        }
    }

    pub fn as_function(&self) -> Option<RegistryRef> {
        match self {
            Value::Function(f) => Some(*f),
            _ => None,
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Nil => write!(f, "nil"),
            Value::Int(n) => write!(f, "{}", n),
            Value::Float(x) => write!(f, "{}", lch_core::number::format_float(*x)),
            Value::Boolean(b) => write!(f, "{}", b),
            Value::String(s) => write!(f, "{:?}", String::from_utf8_lossy(s)),
            Value::Table(t) => {
                write!(f, "{{")?;
                let mut first = true;
                for (k, v) in &t.dict {
                    if !first {
                        write!(f, ", ")?;
                    }
                    write!(f, "{:?}: {}", String::from_utf8_lossy(k), v)?;
                    first = false;
                }
                for (k, v) in &t.array {
                    if !first {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", k, v)?;
                    first = false;
                }
                write!(f, "}}")
            }
            Value::Object(o) if o.type_name.is_empty() => write!(f, "object({:p})", o.ptr),
            Value::Object(o) => write!(f, "{}({:p})", o.type_name, o.ptr),
            Value::Function(h) => write!(f, "function({})", h),
        }
    }
}

impl From<i64> for Value {
    fn from(n: i64) -> Self {
        Value::Int(n)
    }
}

impl From<i32> for Value {
    fn from(n: i32) -> Self {
        Value::Int(n as i64)
    }
}

impl From<f64> for Value {
    fn from(f: f64) -> Self {
        Value::Float(f)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Boolean(b)
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::string(s)
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::string(s)
    }
}

impl From<Vec<u8>> for Value {
    fn from(bytes: Vec<u8>) -> Self {
        Value::String(bytes)
    }
}

impl From<Table> for Value {
    fn from(t: Table) -> Self {
        Value::table(t)
    }
}

impl From<Object> for Value {
    fn from(o: Object) -> Self {
        Value::Object(Box::new(o))
    }
}
