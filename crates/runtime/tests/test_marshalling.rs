//! End-to-end marshalling through native calls on the reference state
//!
//! Each test registers a native function, calls it the way a script would,
//! and inspects what crossed the boundary.

use lch_core::{ForeignPtr, LuaState, LuaType, RegistryRef, ScriptError, VmState, native};
use lch_runtime::{
    Array, CallOutcome, Check, CheckError, Dict, ErrorKind, Function, Object, Push, Table, Value,
    call_function, check, check_args, check_args_min, register_type, remove_function, results,
    take_callback_error,
};
use std::cell::RefCell;
use std::rc::Rc;

/// Call the native `f` with `args` pushed, returning what it returned.
fn invoke(
    state: &mut VmState,
    f: impl Fn(&mut dyn LuaState) -> Result<i32, ScriptError> + 'static,
    args: &[&dyn Push],
) -> Result<i32, String> {
    let base = state.top();
    state.push_function(native(f));
    for arg in args {
        arg.push(state);
    }
    match state.pcall(args.len() as i32, lch_core::MULTRET, 0) {
        Ok(()) => Ok(state.top() - base),
        Err(_) => {
            let msg = state.to_bytes(-1).unwrap_or_default();
            state.pop(1);
            Err(String::from_utf8_lossy(&msg).into_owned())
        }
    }
}

fn round_trip(value: &Value) -> Value {
    let mut state = VmState::new();
    value.push(&mut state);
    let back = check::<Value>(&mut state, -1).unwrap();
    assert_eq!(state.top(), 1);
    back
}

#[test]
fn test_primitive_round_trips() {
    let samples = [
        Value::Nil,
        Value::Int(0),
        Value::Int(i64::MIN),
        Value::Int(i64::MAX),
        Value::Float(-0.5),
        Value::Float(1e300),
        Value::Boolean(true),
        Value::Boolean(false),
        Value::string(""),
        Value::string("héllo"),
        Value::string(b"\xff\x00a"),
    ];
    for value in &samples {
        assert_eq!(&round_trip(value), value);
    }
}

#[test]
fn test_integral_float_stays_float() {
    assert_eq!(round_trip(&Value::Float(3.0)), Value::Float(3.0));
}

#[test]
fn test_nested_table_round_trip() {
    let mut inner = Dict::new();
    inner.insert("deep".into(), Value::Boolean(true));
    let mut dict = Dict::new();
    dict.insert("child".into(), Value::dict(inner));
    dict.insert("name".into(), Value::string("root"));
    let mut array = Array::new();
    array.insert(1, Value::Float(1.5));
    array.insert(-7, Value::Int(7));
    let value = Value::table_parts(dict, array);

    assert_eq!(round_trip(&value), value);
}

#[test]
fn test_empty_table_round_trip() {
    let mut state = VmState::new();
    state.new_table();
    let table = check::<Table>(&mut state, 1).unwrap();
    assert!(table.dict.is_empty());
    assert!(table.array.is_empty());

    table.push(&mut state);
    assert_eq!(state.type_of(2), LuaType::Table);
    state.push_nil();
    assert!(!state.next(2));
    assert_eq!(check::<Table>(&mut state, 2).unwrap(), Table::default());
}

#[test]
fn test_key_classification_aborts_on_float_key() {
    let mut state = VmState::new();
    state.new_table();
    state.push_str("a");
    state.push_integer(1);
    state.raw_set(1);
    state.push_integer(2);
    state.push_str("x");
    state.raw_set(1);
    state.push_number(3.5);
    state.push_str("bad");
    state.raw_set(1);

    let err = check::<Table>(&mut state, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Argument);
    assert_eq!(state.top(), 1);

    // without the float key the same table decodes into both partitions
    state.push_number(3.5);
    state.push_nil();
    state.raw_set(1);
    let table = check::<Table>(&mut state, 1).unwrap();
    assert_eq!(table.dict.get("a".as_bytes()), Some(&Value::Int(1)));
    assert_eq!(table.array.get(&2), Some(&Value::string("x")));
    assert_eq!(table.len(), 2);
}

#[test]
fn test_numeric_string_key_goes_to_dict() {
    let mut state = VmState::new();
    state.new_table();
    state.push_str("10");
    state.push_boolean(true);
    state.raw_set(1);

    let table = check::<Table>(&mut state, 1).unwrap();
    assert!(table.dict.contains_key("10".as_bytes()));
    assert!(table.array.is_empty());
}

#[test]
fn test_object_identity() {
    let mut state = VmState::new();
    let mut payload = 11u64;
    let ptr = &mut payload as *mut u64 as ForeignPtr;
    register_type(&mut state, "Foo", None);
    register_type(&mut state, "Bar", None);

    Object::new(ptr, "Foo").push(&mut state);
    assert_eq!(state.type_of(1), LuaType::LightUserdata);

    let mut foo = Object::expecting("Foo");
    foo.check(&mut state, 1).unwrap();
    assert_eq!(foo.ptr, ptr);

    let mut bar = Object::new(ptr, "Bar");
    let err = bar.check(&mut state, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::ArgumentType);
    assert_eq!(err.to_string(), "bad argument #1 (need a Bar)");
    assert!(bar.ptr.is_null());

    let mut any = Object::default();
    any.check(&mut state, 1).unwrap();
    assert_eq!(any.ptr, ptr);
    assert_eq!(state.top(), 1);
}

#[test]
fn test_untagged_pointer_fails_named_identity() {
    let mut state = VmState::new();
    let mut payload = 5u8;
    let ptr = &mut payload as *mut u8 as ForeignPtr;
    register_type(&mut state, "Foo", None);

    // no metatable at all, not even the shared one
    state.push_light_userdata(ptr);
    assert!(!state.get_metatable(1));

    let mut foo = Object::new(ptr, "Foo");
    let err = foo.check(&mut state, 1).unwrap_err();
    assert_eq!(err.to_string(), "bad argument #1 (need a Foo)");
    assert!(foo.is_null());
    assert_eq!(state.top(), 1);
}

#[test]
fn test_byte_string_keys_do_not_merge() {
    let mut state = VmState::new();
    state.new_table();
    state.push_bytes(b"\xff");
    state.push_integer(1);
    state.raw_set(1);
    state.push_bytes(b"\xfe");
    state.push_integer(2);
    state.raw_set(1);

    let value = check::<Value>(&mut state, 1).unwrap();
    let dict = value.as_dict().unwrap();
    assert_eq!(dict.len(), 2);

    // and they come back as two distinct keys
    value.push(&mut state);
    assert_eq!(check::<Value>(&mut state, 2).unwrap(), value);
}

#[test]
fn test_aborted_table_decode_leaks_no_handles() {
    let mut state = VmState::new();
    state.new_table();
    state.push_str("cb");
    state.push_function(native(|_| Ok(0)));
    state.raw_set(1);
    state.push_number(3.5);
    state.push_str("bad");
    state.raw_set(1);

    let before = state.live_references();
    let err = check::<Value>(&mut state, 1).unwrap_err();
    assert_eq!(
        err.to_string(),
        "bad argument #1 (unsupported table key type: number)"
    );
    assert_eq!(state.live_references(), before);
    assert_eq!(state.top(), 1);
}

#[test]
fn test_boxed_object_identity() {
    let mut state = VmState::new();
    let mut payload = 3i32;
    let ptr = &mut payload as *mut i32 as ForeignPtr;
    register_type(&mut state, "Foo", Some(native(|_| Ok(0))));
    register_type(&mut state, "Bar", None);

    Object::new(ptr, "Foo").push(&mut state);
    assert_eq!(state.type_of(1), LuaType::Userdata);

    assert_eq!(check::<Value>(&mut state, 1).unwrap(), Value::object(ptr, "Foo"));
    let mut bar = Object::expecting("Bar");
    assert!(bar.check(&mut state, 1).is_err());
    assert!(bar.is_null());
}

#[test]
fn test_boxed_objects_are_finalized_raw_are_not() {
    let mut state = VmState::new();
    let finalized = Rc::new(RefCell::new(Vec::<usize>::new()));
    let seen = Rc::clone(&finalized);
    register_type(
        &mut state,
        "Owned",
        Some(native(move |s| {
            let obj = check::<Object>(s, 1)?;
            seen.borrow_mut().push(obj.ptr as usize);
            Ok(0)
        })),
    );
    register_type(&mut state, "Borrowed", None);

    let mut a = 1u8;
    let mut b = 2u8;
    let owned = &mut a as *mut u8 as ForeignPtr;
    let borrowed = &mut b as *mut u8 as ForeignPtr;
    Object::new(owned, "Owned").push(&mut state);
    Object::new(borrowed, "Borrowed").push(&mut state);
    state.close();

    assert_eq!(*finalized.borrow(), vec![owned as usize]);
}

#[test]
fn test_unset_handle_invocation_discards_arguments() {
    let mut state = VmState::new();
    state.push_str("below");
    state.push_integer(1);
    state.push_integer(2);
    state.push_integer(3);

    let outcome = call_function(&mut state, Function::UNSET.handle(), 3);
    assert_eq!(outcome, CallOutcome::Skipped);
    assert_eq!(state.top(), 1);
    assert_eq!(state.type_of(1), LuaType::String);
}

#[test]
fn test_handle_replacement_releases_old_slot() {
    let mut state = VmState::new();
    state.push_function(native(|s| {
        s.push_integer(1);
        s.set_global("which");
        Ok(0)
    }));
    state.push_function(native(|s| {
        s.push_integer(2);
        s.set_global("which");
        Ok(0)
    }));

    let mut func = Function::UNSET;
    func.check(&mut state, 1).unwrap();
    let first = func.handle();
    assert_eq!(state.live_references(), 1);

    func.check(&mut state, 2).unwrap();
    assert_eq!(state.live_references(), 1);

    // the retained callable is the second one, whatever slot it landed in
    assert_eq!(
        call_function(&mut state, func.handle(), 0),
        CallOutcome::Completed
    );
    state.get_global("which");
    assert_eq!(state.to_integer(-1), Some(2));
    state.pop(1);

    func.release(&mut state);
    assert!(!func.is_retained());
    assert!(!state.is_referenced(first));
    assert_eq!(state.live_references(), 0);
}

#[test]
fn test_function_value_is_not_released_on_drop() {
    let mut state = VmState::new();
    state.push_function(native(|_| Ok(0)));
    let handle = {
        let value = check::<Value>(&mut state, 1).unwrap();
        value.as_function().unwrap()
    };
    assert!(state.is_referenced(handle));
    remove_function(&mut state, handle);
    assert!(!state.is_referenced(handle));
}

#[test]
fn test_variadic_tail_optionality() {
    let mut state = VmState::new();
    let bound = Rc::new(RefCell::new(None));
    let sink = Rc::clone(&bound);
    let f = move |s: &mut dyn LuaState| -> Result<i32, ScriptError> {
        let mut a = 0i64;
        let mut b = String::new();
        let mut c = -1i64;
        check_args_min(s, 2, &mut [&mut a, &mut b, &mut c])?;
        *sink.borrow_mut() = Some((a, b, c));
        Ok(0)
    };

    invoke(&mut state, f.clone(), &[&5i64, &"five"]).unwrap();
    assert_eq!(*bound.borrow(), Some((5, "five".to_string(), -1)));

    *bound.borrow_mut() = None;
    let err = invoke(&mut state, f, &[&5i64]).unwrap_err();
    assert_eq!(err, "bad argument #2 (string expected, got no value)");
    assert!(bound.borrow().is_none());
}

#[test]
fn test_bind_failure_surfaces_as_script_error() {
    let mut state = VmState::new();
    let err = invoke(
        &mut state,
        |s| {
            let mut flag = false;
            let mut n = 0.0f64;
            check_args(s, &mut [&mut flag, &mut n])?;
            Ok(0)
        },
        &[&true, &"x"],
    )
    .unwrap_err();
    assert_eq!(err, "bad argument #2 (number expected, got string)");
}

#[test]
fn test_results_reach_the_caller() {
    let mut state = VmState::new();
    let n = invoke(
        &mut state,
        |s| {
            let mut dict = Dict::new();
            dict.insert("ok".into(), Value::Boolean(true));
            Ok(results(s, &[&42i64, &"answer", &dict]))
        },
        &[],
    )
    .unwrap();
    assert_eq!(n, 3);
    assert_eq!(state.to_integer(1), Some(42));
    assert_eq!(state.to_bytes(2), Some(b"answer".to_vec()));
    assert_eq!(state.get_field(3, "ok"), LuaType::Boolean);
}

#[test]
fn test_callback_failure_recorded_not_propagated() {
    let mut state = VmState::new();
    state.open_debug();
    state.push_function(native(|s| {
        let mut n = 0i64;
        n.check(s, 1)?;
        Ok(0)
    }));
    let handle = state.reference();
    assert_ne!(handle, RegistryRef::NO_REF);

    state.push_str("not a number");
    let outcome = call_function(&mut state, handle, 1);
    assert!(outcome.is_failure());
    let recorded = take_callback_error().unwrap();
    assert!(recorded.starts_with("bad argument #1 (number expected, got string)"));
    assert_eq!(state.top(), 0);
}

#[test]
fn test_check_error_reports_kind() {
    let mut state = VmState::new();
    state.push_thread();
    let err: CheckError = check::<Value>(&mut state, 1).unwrap_err();
    assert_eq!(err.kind(), ErrorKind::UnsupportedValueType);
}
