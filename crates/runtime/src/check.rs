//! Decode: stack position to native value
//!
//! Each native shape implements [`Check`], which decodes the value at a
//! stack position into an existing out-parameter. Out-parameters are only
//! written on success, with one exception: an [`Object`] whose identity
//! check fails is nulled, so a stale pointer can never be mistaken for a
//! verified one.
//!
//! Every decode leaves the stack at the depth it found it. A failure in the
//! middle of a table traversal drops the traversal's temporaries and no
//! partial table is produced: functions already retained for entries of the
//! abandoned table are released again.

use crate::config::config;
use crate::error::CheckError;
use crate::guard::{StackGuard, absolute};
use crate::value::{Array, Dict, Function, Object, Table, Value};
use lch_core::{LuaState, LuaType, RegistryRef};
use tracing::{debug, trace};

pub trait Check {
    /// Decode the value at `index` into `self`.
    fn check(&mut self, state: &mut dyn LuaState, index: i32) -> Result<(), CheckError>;
}

/// Decode the value at `index` into a fresh `T`.
pub fn check<T: Check + Default>(state: &mut dyn LuaState, index: i32) -> Result<T, CheckError> {
    let mut value = T::default();
    value.check(state, index)?;
    Ok(value)
}

impl Check for bool {
    fn check(&mut self, state: &mut dyn LuaState, index: i32) -> Result<(), CheckError> {
        match state.type_of(index) {
            LuaType::Boolean => {
                *self = state.to_boolean(index);
                Ok(())
            }
            other => Err(CheckError::type_mismatch(
                absolute(state, index),
                "boolean",
                other,
            )),
        }
    }
}

/// Integer coercion of the runtime: exact integers, integral floats and
/// numeric strings convert; other numbers have no integer representation.
fn check_integer(state: &dyn LuaState, index: i32) -> Result<i64, CheckError> {
    if let Some(n) = state.to_integer(index) {
        return Ok(n);
    }
    let position = absolute(state, index);
    if state.is_number(index) {
        Err(CheckError::NoIntegerRepresentation { position })
    } else {
        Err(CheckError::type_mismatch(
            position,
            "number",
            state.type_of(index),
        ))
    }
}

fn check_number(state: &dyn LuaState, index: i32) -> Result<f64, CheckError> {
    state.to_number(index).ok_or_else(|| {
        CheckError::type_mismatch(absolute(state, index), "number", state.type_of(index))
    })
}

// Narrowing follows a C cast of the runtime integer: wrap, never fail.
macro_rules! check_integer_as {
    ($($t:ty),*) => {
        $(
            impl Check for $t {
                fn check(&mut self, state: &mut dyn LuaState, index: i32) -> Result<(), CheckError> {
                    *self = check_integer(state, index)? as $t;
                    Ok(())
                }
            }
        )*
    };
}

check_integer_as!(i8, i16, i32, i64, isize, u8, u16, u32, u64, usize);

impl Check for f64 {
    fn check(&mut self, state: &mut dyn LuaState, index: i32) -> Result<(), CheckError> {
        *self = check_number(state, index)?;
        Ok(())
    }
}

impl Check for f32 {
    fn check(&mut self, state: &mut dyn LuaState, index: i32) -> Result<(), CheckError> {
        *self = check_number(state, index)? as f32;
        Ok(())
    }
}

fn check_bytes(state: &dyn LuaState, index: i32) -> Result<Vec<u8>, CheckError> {
    if !state.is_string(index) {
        return Err(CheckError::type_mismatch(
            absolute(state, index),
            "string",
            state.type_of(index),
        ));
    }
    Ok(state.to_bytes(index).unwrap_or_default())
}

/// Exact bytes, embedded zeros included.
impl Check for Vec<u8> {
    fn check(&mut self, state: &mut dyn LuaState, index: i32) -> Result<(), CheckError> {
        *self = check_bytes(state, index)?;
        Ok(())
    }
}

/// Invalid UTF-8 is replaced, use `Vec<u8>` for arbitrary bytes.
impl Check for String {
    fn check(&mut self, state: &mut dyn LuaState, index: i32) -> Result<(), CheckError> {
        let bytes = check_bytes(state, index)?;
        *self = String::from_utf8_lossy(&bytes).into_owned();
        Ok(())
    }
}

impl Check for Table {
    fn check(&mut self, state: &mut dyn LuaState, index: i32) -> Result<(), CheckError> {
        let position = absolute(state, index);
        let mut decode = Decode::new(position);
        match decode.table(state, position, 0) {
            Ok(table) => {
                *self = table;
                Ok(())
            }
            Err(e) => Err(decode.abort(state, e)),
        }
    }
}

/// String-keyed entries of a table; integer-keyed entries are dropped.
impl Check for Dict {
    fn check(&mut self, state: &mut dyn LuaState, index: i32) -> Result<(), CheckError> {
        let mut table = Table::default();
        table.check(state, index)?;
        *self = table.dict;
        Ok(())
    }
}

/// Integer-keyed entries of a table; string-keyed entries are dropped.
impl Check for Array {
    fn check(&mut self, state: &mut dyn LuaState, index: i32) -> Result<(), CheckError> {
        let mut table = Table::default();
        table.check(state, index)?;
        *self = table.array;
        Ok(())
    }
}

impl Check for Object {
    fn check(&mut self, state: &mut dyn LuaState, index: i32) -> Result<(), CheckError> {
        let position = absolute(state, index);
        let ptr = match state.type_of(position) {
            LuaType::Userdata => state.to_userdata(position),
            LuaType::LightUserdata => state.to_light_userdata(position),
            other => return Err(CheckError::type_mismatch(position, "userdata", other)),
        }
        .unwrap_or(std::ptr::null_mut());

        if !self.type_name.is_empty() && !has_identity(state, position, &self.type_name) {
            self.ptr = std::ptr::null_mut();
            return Err(CheckError::ObjectIdentity {
                position,
                type_name: self.type_name.clone(),
            });
        }
        self.ptr = ptr;
        Ok(())
    }
}

/// Whether the metatable of the value at `index` is the named registration.
fn has_identity(state: &mut dyn LuaState, index: i32, type_name: &str) -> bool {
    if !state.get_metatable(index) {
        return false;
    }
    state.push_named_metatable(type_name);
    let same = state.raw_equal(-1, -2);
    state.pop(2);
    same
}

impl Check for Function {
    fn check(&mut self, state: &mut dyn LuaState, index: i32) -> Result<(), CheckError> {
        match state.type_of(index) {
            LuaType::Function => {
                self.retain(state, index);
                Ok(())
            }
            other => Err(CheckError::type_mismatch(
                absolute(state, index),
                "function",
                other,
            )),
        }
    }
}

impl Check for Value {
    fn check(&mut self, state: &mut dyn LuaState, index: i32) -> Result<(), CheckError> {
        let position = absolute(state, index);
        let mut decode = Decode::new(position);
        match decode.value(state, position, 0) {
            Ok(value) => {
                *self = value;
                Ok(())
            }
            Err(e) => Err(decode.abort(state, e)),
        }
    }
}

/// One top-level generic decode.
///
/// `position` is the argument reported in errors. Every function retained
/// along the way is recorded so that a failed decode can hand the slots back.
struct Decode {
    position: i32,
    retained: Vec<RegistryRef>,
}

impl Decode {
    fn new(position: i32) -> Self {
        Self {
            position,
            retained: Vec::new(),
        }
    }

    /// Release everything retained so far and pass `err` through.
    fn abort(self, state: &mut dyn LuaState, err: CheckError) -> CheckError {
        for handle in self.retained {
            debug!(%handle, "releasing function of failed decode");
            state.unreference(handle);
        }
        err
    }

    /// Dynamic-type dispatch. `index` is absolute; `depth` counts enclosing
    /// tables.
    fn value(
        &mut self,
        state: &mut dyn LuaState,
        index: i32,
        depth: usize,
    ) -> Result<Value, CheckError> {
        let value = match state.type_of(index) {
            LuaType::Nil => Value::Nil,
            LuaType::Boolean => Value::Boolean(state.to_boolean(index)),
            LuaType::Number if state.is_integer(index) => {
                Value::Int(state.to_integer(index).unwrap_or_default())
            }
            LuaType::Number => Value::Float(state.to_number(index).unwrap_or_default()),
            LuaType::String => Value::String(state.to_bytes(index).unwrap_or_default()),
            LuaType::Table => Value::table(self.table(state, index, depth)?),
            LuaType::LightUserdata => {
                let ptr = state.to_light_userdata(index).unwrap_or(std::ptr::null_mut());
                Value::object(ptr, identity_name(state, index))
            }
            LuaType::Userdata => {
                let ptr = state.to_userdata(index).unwrap_or(std::ptr::null_mut());
                Value::object(ptr, identity_name(state, index))
            }
            LuaType::Function => {
                let mut func = Function::UNSET;
                func.retain(state, index);
                self.retained.push(func.handle());
                Value::Function(func.handle())
            }
            other @ (LuaType::None | LuaType::Thread) => {
                return Err(CheckError::UnsupportedValueType {
                    position: self.position,
                    got: other,
                });
            }
        };
        trace!(position = self.position, value = %value, "decoded value");
        Ok(value)
    }

    fn table(
        &mut self,
        state: &mut dyn LuaState,
        index: i32,
        depth: usize,
    ) -> Result<Table, CheckError> {
        let position = self.position;
        let ty = state.type_of(index);
        if ty != LuaType::Table {
            return Err(CheckError::type_mismatch(position, "table", ty));
        }
        let limit = config().max_table_depth;
        if depth >= limit {
            return Err(CheckError::TooDeep { position, limit });
        }

        let guard = StackGuard::new(state);
        let mut table = Table::default();
        state.push_nil();
        while state.next(index) {
            if let Err(e) = self.entry(state, depth, &mut table) {
                guard.restore(state);
                return Err(e);
            }
            // keep the key for the next step
            state.pop(1);
        }
        guard.finish(state, 0);
        Ok(table)
    }

    /// Decode the key/value pair at -2/-1 into the matching partition.
    fn entry(
        &mut self,
        state: &mut dyn LuaState,
        depth: usize,
        table: &mut Table,
    ) -> Result<(), CheckError> {
        let value_index = state.top();
        let value = self.value(state, value_index, depth + 1)?;

        // Classify by the key's actual type; numbers must not be read as strings
        match state.type_of(-2) {
            LuaType::String => {
                let key = state.to_bytes(-2).unwrap_or_default();
                table.dict.insert(key, value);
            }
            LuaType::Number if state.is_integer(-2) => {
                let key = state.to_integer(-2).unwrap_or_default();
                table.array.insert(key, value);
            }
            key_type => {
                return Err(CheckError::UnsupportedKeyType {
                    position: self.position,
                    key_type,
                });
            }
        }
        Ok(())
    }
}

/// `__name` of the value's metatable, or empty.
fn identity_name(state: &mut dyn LuaState, index: i32) -> String {
    if state.get_metafield(index, "__name") == LuaType::Nil {
        return String::new();
    }
    let name = if state.type_of(-1) == LuaType::String {
        state
            .to_bytes(-1)
            .map(|b| String::from_utf8_lossy(&b).into_owned())
            .unwrap_or_default()
    } else {
        String::new()
    };
    state.pop(1);
    name
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use lch_core::{ForeignPtr, VmState, native};

    #[test]
    fn test_boolean_requires_boolean_type() {
        let mut state = VmState::new();
        state.push_boolean(true);
        state.push_integer(1);

        assert!(check::<bool>(&mut state, 1).unwrap());

        let err = check::<bool>(&mut state, 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentType);
        assert_eq!(err.to_string(), "bad argument #2 (boolean expected, got number)");
    }

    #[test]
    fn test_integer_coercion() {
        let mut state = VmState::new();
        state.push_number(3.0);
        state.push_str("42");
        state.push_number(2.5);
        state.push_str("abc");
        state.push_integer(300);

        assert_eq!(check::<i64>(&mut state, 1).unwrap(), 3);
        assert_eq!(check::<i32>(&mut state, 2).unwrap(), 42);

        let err = check::<i64>(&mut state, 3).unwrap_err();
        assert_eq!(err, CheckError::NoIntegerRepresentation { position: 3 });

        let err = check::<i64>(&mut state, 4).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentType);

        // narrowing wraps like a C cast
        assert_eq!(check::<u8>(&mut state, 5).unwrap(), 44);
    }

    #[test]
    fn test_float_accepts_integers_and_numeric_strings() {
        let mut state = VmState::new();
        state.push_integer(7);
        state.push_str("0.5");
        state.push_boolean(false);

        assert_eq!(check::<f64>(&mut state, 1).unwrap(), 7.0);
        assert_eq!(check::<f32>(&mut state, 2).unwrap(), 0.5);
        assert!(check::<f64>(&mut state, 3).is_err());
    }

    #[test]
    fn test_string_keeps_embedded_zeros() {
        let mut state = VmState::new();
        state.push_bytes(b"a\0b");
        state.push_integer(12);
        state.new_table();

        assert_eq!(check::<Vec<u8>>(&mut state, 1).unwrap(), b"a\0b".to_vec());
        assert_eq!(check::<String>(&mut state, 2).unwrap(), "12");
        let err = check::<String>(&mut state, 3).unwrap_err();
        assert_eq!(err.to_string(), "bad argument #3 (string expected, got table)");
    }

    #[test]
    fn test_out_parameter_untouched_on_failure() {
        let mut state = VmState::new();
        state.push_str("nope");
        let mut n = 99i64;
        assert!(n.check(&mut state, 1).is_err());
        assert_eq!(n, 99);
    }

    #[test]
    fn test_table_partitions_keys() {
        let mut state = VmState::new();
        state.new_table();
        state.push_str("x");
        state.push_integer(1);
        state.raw_set(1);
        state.push_integer(2);
        state.push_str("two");
        state.raw_set(1);

        let table = check::<Table>(&mut state, -1).unwrap();
        assert_eq!(table.dict.get("x".as_bytes()), Some(&Value::Int(1)));
        assert_eq!(table.array.get(&2), Some(&Value::string("two")));
        assert_eq!(state.top(), 1);
    }

    #[test]
    fn test_float_key_aborts_and_restores_stack() {
        let mut state = VmState::new();
        state.push_integer(0);
        state.new_table();
        state.push_number(3.5);
        state.push_str("bad");
        state.raw_set(2);

        let mut table = Table::default();
        table.dict.insert("keep".into(), Value::Nil);
        let err = table.check(&mut state, 2).unwrap_err();
        assert_eq!(
            err,
            CheckError::UnsupportedKeyType {
                position: 2,
                key_type: LuaType::Number
            }
        );
        assert_eq!(err.kind(), ErrorKind::Argument);
        assert_eq!(state.top(), 2);
        assert!(table.dict.contains_key("keep".as_bytes()));
    }

    #[test]
    fn test_byte_string_keys_stay_distinct() {
        let mut state = VmState::new();
        state.new_table();
        state.push_bytes(b"\xff");
        state.push_integer(1);
        state.raw_set(1);
        state.push_bytes(b"\xfe");
        state.push_integer(2);
        state.raw_set(1);

        let table = check::<Table>(&mut state, 1).unwrap();
        assert_eq!(table.dict.len(), 2);
        assert_eq!(table.dict.get(&b"\xff"[..]), Some(&Value::Int(1)));
        assert_eq!(table.dict.get(&b"\xfe"[..]), Some(&Value::Int(2)));
    }

    #[test]
    fn test_value_string_keeps_exact_bytes() {
        let mut state = VmState::new();
        state.push_bytes(b"\xff\x00a");
        let value = check::<Value>(&mut state, 1).unwrap();
        assert_eq!(value, Value::string(b"\xff\x00a"));
        assert_eq!(value.as_bytes(), Some(&b"\xff\x00a"[..]));
    }

    #[test]
    fn test_failed_decode_releases_retained_functions() {
        let mut state = VmState::new();
        state.new_table();
        state.push_str("cb");
        state.push_function(native(|_| Ok(0)));
        state.raw_set(1);
        state.push_number(3.5);
        state.push_str("bad");
        state.raw_set(1);
        assert_eq!(state.live_references(), 0);

        let err = check::<Value>(&mut state, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Argument);
        assert_eq!(state.live_references(), 0);

        assert!(check::<Table>(&mut state, 1).is_err());
        assert_eq!(state.live_references(), 0);
        assert_eq!(state.top(), 1);
    }

    #[test]
    fn test_too_deep_releases_functions_of_outer_levels() {
        let mut state = VmState::new();
        state.new_table();
        state.push_str("cb");
        state.push_function(native(|_| Ok(0)));
        state.raw_set(1);
        state.push_str("self");
        state.push_value(1);
        state.raw_set(1);

        let err = check::<Value>(&mut state, 1).unwrap_err();
        assert!(matches!(err, CheckError::TooDeep { .. }));
        assert_eq!(state.live_references(), 0);
    }

    #[test]
    fn test_successful_decode_keeps_functions_retained() {
        let mut state = VmState::new();
        state.new_table();
        state.push_str("cb");
        state.push_function(native(|_| Ok(0)));
        state.raw_set(1);

        let table = check::<Table>(&mut state, 1).unwrap();
        let handle = table.dict[&b"cb"[..]].as_function().unwrap();
        assert!(state.is_referenced(handle));
        assert_eq!(state.live_references(), 1);
    }

    #[test]
    fn test_self_referencing_table_is_too_deep() {
        let mut state = VmState::new();
        state.new_table();
        state.push_str("self");
        state.push_value(1);
        state.raw_set(1);

        let err = check::<Value>(&mut state, 1).unwrap_err();
        assert!(matches!(err, CheckError::TooDeep { position: 1, .. }));
        assert_eq!(state.top(), 1);
    }

    #[test]
    fn test_value_distinguishes_int_and_float() {
        let mut state = VmState::new();
        state.push_integer(2);
        state.push_number(2.0);
        assert_eq!(check::<Value>(&mut state, 1).unwrap(), Value::Int(2));
        assert_eq!(check::<Value>(&mut state, 2).unwrap(), Value::Float(2.0));
    }

    #[test]
    fn test_value_rejects_threads_and_absent_positions() {
        let mut state = VmState::new();
        state.push_thread();
        let err = check::<Value>(&mut state, 1).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::UnsupportedValueType);
        let err = check::<Value>(&mut state, 5).unwrap_err();
        assert_eq!(
            err,
            CheckError::UnsupportedValueType {
                position: 5,
                got: LuaType::None
            }
        );
    }

    #[test]
    fn test_value_object_captures_type_name() {
        let mut state = VmState::new();
        let mut x = 1u8;
        let ptr = &mut x as *mut u8 as ForeignPtr;

        state.new_userdata(ptr);
        state.new_metatable("Foo");
        state.set_metatable(-2);
        state.push_light_userdata(ptr);

        let boxed = check::<Value>(&mut state, 1).unwrap();
        assert_eq!(boxed, Value::object(ptr, "Foo"));
        let raw = check::<Value>(&mut state, 2).unwrap();
        assert_eq!(raw, Value::object(ptr, ""));
        assert_eq!(state.top(), 2);
    }

    #[test]
    fn test_function_retains_callable() {
        let mut state = VmState::new();
        state.push_function(native(|_| Ok(0)));

        let mut func = Function::UNSET;
        func.check(&mut state, 1).unwrap();
        assert!(func.is_retained());
        assert!(state.is_referenced(func.handle()));
        assert_eq!(state.top(), 1);

        state.push_integer(1);
        let err = func.check(&mut state, 2).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ArgumentType);
        assert!(state.is_referenced(func.handle()));
    }

    #[test]
    fn test_dict_and_array_keep_one_partition() {
        let mut state = VmState::new();
        state.new_table();
        state.push_str("k");
        state.push_boolean(true);
        state.raw_set(1);
        state.push_integer(1);
        state.push_boolean(false);
        state.raw_set(1);

        let dict = check::<Dict>(&mut state, 1).unwrap();
        assert_eq!(dict.len(), 1);
        let array = check::<Array>(&mut state, 1).unwrap();
        assert_eq!(array.get(&1), Some(&Value::Boolean(false)));
    }
}
