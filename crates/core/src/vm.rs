//! In-process reference state
//!
//! `VmState` implements [`LuaState`] on top of a plain `Vec<Slot>` stack.
//! It has no parser or bytecode: callables are native closures. What it does
//! have is the machinery the marshalling layer leans on, with the runtime's
//! semantics:
//!
//! - call frames with 1-based positive and negative indices
//! - tables walked by `next`, integral float keys stored as integers
//! - a retention registry with free-list reuse of released handles
//! - named metatables, per-value metatables for tables/userdata and one
//!   shared metatable per type for everything else (light userdata included)
//! - protected calls with a message handler
//! - `__gc` finalizers for full userdata, run by [`VmState::collect_garbage`]
//!   once nothing but the state still holds the block, and by
//!   [`VmState::close`] for whatever is left
//!
//! ## API misuse
//!
//! Passing an invalid index to an operation that needs a real slot, or
//! popping below the frame base, is a bug in the caller and panics, just as
//! the runtime's API checks abort.

use crate::error::{CallStatus, ScriptError};
use crate::slot::{Slot, TableData, TableRef, ThreadData, UserdataBlock, UserdataRef};
use crate::state::{LuaState, NativeFn, native};
use crate::types::{ForeignPtr, LuaType, MULTRET, RegistryRef};
use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use tracing::{trace, warn};

/// Maximum nesting of native calls before a call fails with a stack overflow.
pub const MAX_CALL_DEPTH: usize = 200;

pub struct VmState {
    stack: Vec<Slot>,
    /// Position in `stack` of index 1 of the current frame.
    base: usize,
    depth: usize,
    globals: TableRef,
    registry: Vec<Option<Slot>>,
    free_refs: Vec<i32>,
    named_metatables: HashMap<String, TableRef>,
    type_metatables: HashMap<LuaType, TableRef>,
    finalizable: Vec<UserdataRef>,
}

impl Default for VmState {
    fn default() -> Self {
        Self::new()
    }
}

impl VmState {
    pub fn new() -> Self {
        Self {
            stack: Vec::with_capacity(64),
            base: 0,
            depth: 0,
            globals: Rc::new(RefCell::new(TableData::default())),
            registry: Vec::new(),
            free_refs: Vec::new(),
            named_metatables: HashMap::new(),
            type_metatables: HashMap::new(),
            finalizable: Vec::new(),
        }
    }

    /// Install the `debug` library (only `debug.traceback`).
    pub fn open_debug(&mut self) {
        self.new_table();
        self.push_function(native(debug_traceback));
        self.set_field(-2, "traceback");
        self.set_global("debug");
    }

    /// Bind a native function to a global name.
    pub fn register(&mut self, name: &str, f: NativeFn) {
        self.push_function(f);
        self.set_global(name);
    }

    /// Push a coroutine handle. The state cannot run it.
    pub fn push_thread(&mut self) {
        self.push(Slot::Thread(Rc::new(ThreadData)));
    }

    /// Number of live registry handles.
    pub fn live_references(&self) -> usize {
        self.registry.iter().filter(|s| s.is_some()).count()
    }

    pub fn is_referenced(&self, r: RegistryRef) -> bool {
        self.registry_index(r)
            .and_then(|i| self.registry.get(i))
            .is_some_and(|s| s.is_some())
    }

    /// Current native call nesting (0 at the host level).
    pub fn call_depth(&self) -> usize {
        self.depth
    }

    /// Run the finalizer of every finalizable userdata that nothing but the
    /// state refers to any more. Returns how many finalizers ran.
    pub fn collect_garbage(&mut self) -> usize {
        let (dead, live): (Vec<_>, Vec<_>) = std::mem::take(&mut self.finalizable)
            .into_iter()
            .partition(|u| Rc::strong_count(u) == 1);
        self.finalizable = live;
        let count = dead.len();
        // Most recently marked first.
        for block in dead.into_iter().rev() {
            self.finalize(block);
        }
        count
    }

    /// Finalize every remaining finalizable userdata and drop the state.
    pub fn close(mut self) {
        let pending = std::mem::take(&mut self.finalizable);
        for block in pending.into_iter().rev() {
            self.finalize(block);
        }
    }

    fn finalize(&mut self, block: UserdataRef) {
        let gc = block
            .metatable
            .borrow()
            .as_ref()
            .map(|mt| mt.borrow().get_str("__gc"));
        let Some(Slot::Function(gc)) = gc else {
            return;
        };
        trace!(ptr = ?block.ptr, "running userdata finalizer");
        self.push(Slot::Function(gc));
        self.push(Slot::Userdata(block));
        if self.pcall(1, 0, 0).is_err() {
            let msg = self.to_bytes(-1).unwrap_or_default();
            warn!(
                "error in __gc metamethod: {}",
                String::from_utf8_lossy(&msg)
            );
            self.pop(1);
        }
    }

    // --- internals -------------------------------------------------------

    fn push(&mut self, slot: Slot) {
        self.stack.push(slot);
    }

    fn pop_slot(&mut self) -> Slot {
        if self.stack.len() <= self.base {
            panic!("stack underflow: pop from an empty frame");
        }
        self.stack.pop().unwrap_or(Slot::Nil)
    }

    fn slot_position(&self, index: i32) -> Option<usize> {
        let frame_len = self.stack.len() - self.base;
        if index > 0 {
            let offset = index as usize - 1;
            (offset < frame_len).then_some(self.base + offset)
        } else if index < 0 {
            let back = index.unsigned_abs() as usize;
            (back <= frame_len).then(|| self.stack.len() - back)
        } else {
            None
        }
    }

    fn position(&self, index: i32, op: &str) -> usize {
        self.slot_position(index)
            .unwrap_or_else(|| panic!("{}: invalid stack index {}", op, index))
    }

    fn slot(&self, index: i32) -> Option<&Slot> {
        self.slot_position(index).map(|i| &self.stack[i])
    }

    fn table_at(&self, index: i32, op: &str) -> TableRef {
        match &self.stack[self.position(index, op)] {
            Slot::Table(t) => Rc::clone(t),
            other => panic!("{}: table expected, got {}", op, other.lua_type()),
        }
    }

    fn metatable_of(&self, slot: &Slot) -> Option<TableRef> {
        match slot {
            Slot::Table(t) => t.borrow().metatable.clone(),
            Slot::Userdata(u) => u.metatable.borrow().clone(),
            other => self.type_metatables.get(&other.lua_type()).cloned(),
        }
    }

    fn registry_index(&self, r: RegistryRef) -> Option<usize> {
        if r.is_sentinel() || r.raw() == 0 {
            None
        } else {
            Some(r.raw() as usize - 1)
        }
    }

    /// Call the function at `func_pos` with the `nargs` values above it.
    /// On failure the frame is discarded and the error value returned.
    fn call_at(&mut self, func_pos: usize, nresults: i32) -> Result<(), Slot> {
        let func = match &self.stack[func_pos] {
            Slot::Function(f) => Rc::clone(f),
            other => {
                let msg = format!("attempt to call a {} value", other.lua_type());
                self.stack.truncate(func_pos);
                return Err(Slot::string(msg.as_bytes()));
            }
        };
        if self.depth >= MAX_CALL_DEPTH {
            self.stack.truncate(func_pos);
            return Err(Slot::string(b"stack overflow"));
        }

        let saved_base = self.base;
        self.base = func_pos + 1;
        self.depth += 1;
        let outcome = func(self);
        self.depth -= 1;

        match outcome {
            Ok(n) => {
                let n = n.max(0) as usize;
                let available = self.stack.len() - self.base;
                if n > available {
                    panic!(
                        "native function returned {} results with {} values on its frame",
                        n, available
                    );
                }
                let mut results = self.stack.split_off(self.stack.len() - n);
                self.stack.truncate(func_pos);
                self.base = saved_base;
                if nresults != MULTRET {
                    results.resize(nresults.max(0) as usize, Slot::Nil);
                }
                self.stack.extend(results);
                Ok(())
            }
            Err(e) => {
                let err = match e {
                    ScriptError::Runtime(msg) => Slot::string(msg.as_bytes()),
                    ScriptError::Raised if self.stack.len() > self.base => {
                        self.stack.pop().unwrap_or(Slot::Nil)
                    }
                    ScriptError::Raised => Slot::Nil,
                };
                self.stack.truncate(func_pos);
                self.base = saved_base;
                Err(err)
            }
        }
    }

    fn function_position(&self, nargs: i32, op: &str) -> usize {
        let nargs = nargs.max(0) as usize;
        let frame_len = self.stack.len() - self.base;
        if nargs + 1 > frame_len {
            panic!("{}: not enough values for function and {} arguments", op, nargs);
        }
        self.stack.len() - nargs - 1
    }
}

impl LuaState for VmState {
    fn top(&self) -> i32 {
        (self.stack.len() - self.base) as i32
    }

    fn set_top(&mut self, index: i32) {
        let new_len = if index >= 0 {
            self.base + index as usize
        } else {
            let back = (index.unsigned_abs() - 1) as usize;
            if back > self.stack.len() - self.base {
                panic!("set_top: invalid new top {}", index);
            }
            self.stack.len() - back
        };
        self.stack.resize(new_len, Slot::Nil);
    }

    fn abs_index(&self, index: i32) -> i32 {
        if index < 0 {
            self.top() + index + 1
        } else {
            index
        }
    }

    fn push_value(&mut self, index: i32) {
        let slot = self.stack[self.position(index, "push_value")].clone();
        self.push(slot);
    }

    fn insert(&mut self, index: i32) {
        let pos = self.position(index, "insert");
        let value = self.pop_slot();
        self.stack.insert(pos, value);
    }

    fn remove(&mut self, index: i32) {
        let pos = self.position(index, "remove");
        self.stack.remove(pos);
    }

    fn type_of(&self, index: i32) -> LuaType {
        self.slot(index).map(Slot::lua_type).unwrap_or(LuaType::None)
    }

    fn is_integer(&self, index: i32) -> bool {
        matches!(self.slot(index), Some(Slot::Integer(_)))
    }

    fn to_boolean(&self, index: i32) -> bool {
        self.slot(index).is_some_and(Slot::truthy)
    }

    fn to_integer(&self, index: i32) -> Option<i64> {
        self.slot(index)?.to_integer()
    }

    fn to_number(&self, index: i32) -> Option<f64> {
        self.slot(index)?.to_number()
    }

    fn to_bytes(&self, index: i32) -> Option<Vec<u8>> {
        self.slot(index)?.to_bytes()
    }

    fn to_light_userdata(&self, index: i32) -> Option<ForeignPtr> {
        match self.slot(index)? {
            Slot::LightUserdata(p) => Some(*p),
            _ => None,
        }
    }

    fn to_userdata(&self, index: i32) -> Option<ForeignPtr> {
        match self.slot(index)? {
            Slot::Userdata(u) => Some(u.ptr),
            _ => None,
        }
    }

    fn push_nil(&mut self) {
        self.push(Slot::Nil);
    }

    fn push_boolean(&mut self, b: bool) {
        self.push(Slot::Boolean(b));
    }

    fn push_integer(&mut self, n: i64) {
        self.push(Slot::Integer(n));
    }

    fn push_number(&mut self, n: f64) {
        self.push(Slot::Number(n));
    }

    fn push_bytes(&mut self, s: &[u8]) {
        self.push(Slot::string(s));
    }

    fn push_light_userdata(&mut self, ptr: ForeignPtr) {
        self.push(Slot::LightUserdata(ptr));
    }

    fn new_userdata(&mut self, ptr: ForeignPtr) {
        self.push(Slot::Userdata(Rc::new(UserdataBlock {
            ptr,
            metatable: RefCell::new(None),
        })));
    }

    fn new_table(&mut self) {
        self.push(Slot::new_table());
    }

    fn push_function(&mut self, f: NativeFn) {
        self.push(Slot::Function(f));
    }

    fn raw_set(&mut self, index: i32) {
        let table = self.table_at(index, "raw_set");
        let value = self.pop_slot();
        let key = self.pop_slot();
        if !table.borrow_mut().set(key, value) {
            panic!("raw_set: table index is nil or NaN");
        }
    }

    fn get_field(&mut self, index: i32, name: &str) -> LuaType {
        let value = match self.slot(index) {
            Some(Slot::Table(t)) => t.borrow().get_str(name),
            _ => Slot::Nil,
        };
        let ty = value.lua_type();
        self.push(value);
        ty
    }

    fn set_field(&mut self, index: i32, name: &str) {
        let table = self.table_at(index, "set_field");
        let value = self.pop_slot();
        table.borrow_mut().set_str(name, value);
    }

    fn next(&mut self, index: i32) -> bool {
        let table = self.table_at(index, "next");
        let key = self.pop_slot();
        let entry = table.borrow().next_after(&key);
        match entry {
            Ok(Some((k, v))) => {
                self.push(k);
                self.push(v);
                true
            }
            Ok(None) => false,
            Err(()) => panic!("next: invalid key to 'next'"),
        }
    }

    fn raw_equal(&self, a: i32, b: i32) -> bool {
        match (self.slot(a), self.slot(b)) {
            (Some(x), Some(y)) => x.raw_eq(y),
            _ => false,
        }
    }

    fn get_global(&mut self, name: &str) -> LuaType {
        let value = self.globals.borrow().get_str(name);
        let ty = value.lua_type();
        self.push(value);
        ty
    }

    fn set_global(&mut self, name: &str) {
        let value = self.pop_slot();
        self.globals.borrow_mut().set_str(name, value);
    }

    fn get_metatable(&mut self, index: i32) -> bool {
        let mt = self.slot(index).and_then(|s| self.metatable_of(s));
        match mt {
            Some(mt) => {
                self.push(Slot::Table(mt));
                true
            }
            None => false,
        }
    }

    fn set_metatable(&mut self, index: i32) {
        let target = self.stack[self.position(index, "set_metatable")].clone();
        let mt = match self.pop_slot() {
            Slot::Table(t) => Some(t),
            Slot::Nil => None,
            other => panic!("set_metatable: table expected, got {}", other.lua_type()),
        };
        match target {
            Slot::Table(t) => t.borrow_mut().metatable = mt,
            Slot::Userdata(u) => {
                let has_gc = mt
                    .as_ref()
                    .is_some_and(|m| !m.borrow().get_str("__gc").is_nil());
                *u.metatable.borrow_mut() = mt;
                if has_gc && !self.finalizable.iter().any(|f| Rc::ptr_eq(f, &u)) {
                    self.finalizable.push(u);
                }
            }
            other => {
                let ty = other.lua_type();
                match mt {
                    Some(mt) => {
                        self.type_metatables.insert(ty, mt);
                    }
                    None => {
                        self.type_metatables.remove(&ty);
                    }
                }
            }
        }
    }

    fn get_metafield(&mut self, index: i32, name: &str) -> LuaType {
        let field = self
            .slot(index)
            .and_then(|s| self.metatable_of(s))
            .map(|mt| mt.borrow().get_str(name))
            .unwrap_or(Slot::Nil);
        if field.is_nil() {
            return LuaType::Nil;
        }
        let ty = field.lua_type();
        self.push(field);
        ty
    }

    fn new_metatable(&mut self, name: &str) -> bool {
        if let Some(existing) = self.named_metatables.get(name) {
            let existing = Rc::clone(existing);
            self.push(Slot::Table(existing));
            return false;
        }
        let mut data = TableData::default();
        data.set_str("__name", Slot::string(name.as_bytes()));
        let table = Rc::new(RefCell::new(data));
        self.named_metatables
            .insert(name.to_string(), Rc::clone(&table));
        self.push(Slot::Table(table));
        true
    }

    fn push_named_metatable(&mut self, name: &str) -> LuaType {
        match self.named_metatables.get(name) {
            Some(t) => {
                let t = Rc::clone(t);
                self.push(Slot::Table(t));
                LuaType::Table
            }
            None => {
                self.push(Slot::Nil);
                LuaType::Nil
            }
        }
    }

    fn reference(&mut self) -> RegistryRef {
        let value = self.pop_slot();
        if value.is_nil() {
            return RegistryRef::REF_NIL;
        }
        match self.free_refs.pop() {
            Some(raw) => {
                self.registry[raw as usize - 1] = Some(value);
                RegistryRef::from_raw(raw)
            }
            None => {
                self.registry.push(Some(value));
                RegistryRef::from_raw(self.registry.len() as i32)
            }
        }
    }

    fn unreference(&mut self, r: RegistryRef) {
        let Some(i) = self.registry_index(r) else {
            return;
        };
        if let Some(entry) = self.registry.get_mut(i)
            && entry.take().is_some()
        {
            self.free_refs.push(r.raw());
        }
    }

    fn push_reference(&mut self, r: RegistryRef) -> LuaType {
        let value = self
            .registry_index(r)
            .and_then(|i| self.registry.get(i))
            .and_then(|s| s.clone())
            .unwrap_or(Slot::Nil);
        let ty = value.lua_type();
        self.push(value);
        ty
    }

    fn call(&mut self, nargs: i32, nresults: i32) -> Result<(), ScriptError> {
        let func_pos = self.function_position(nargs, "call");
        self.call_at(func_pos, nresults).map_err(|err| {
            self.push(err);
            ScriptError::Raised
        })
    }

    fn pcall(&mut self, nargs: i32, nresults: i32, msgh: i32) -> Result<(), CallStatus> {
        let handler = (msgh != 0).then(|| self.stack[self.position(msgh, "pcall")].clone());
        let func_pos = self.function_position(nargs, "pcall");

        let err = match self.call_at(func_pos, nresults) {
            Ok(()) => return Ok(()),
            Err(err) => err,
        };

        let (err, status) = match handler {
            None => (err, CallStatus::Runtime),
            Some(handler) => {
                let handler_pos = self.stack.len();
                self.push(handler);
                self.push(err);
                match self.call_at(handler_pos, 1) {
                    Ok(()) => (self.pop_slot(), CallStatus::Runtime),
                    Err(e) => (e, CallStatus::MessageHandler),
                }
            }
        };
        self.push(err);
        Err(status)
    }
}

/// `debug.traceback(msg [, level])`: non-string messages pass through
/// untouched; strings get a traceback block appended.
fn debug_traceback(state: &mut dyn LuaState) -> Result<i32, ScriptError> {
    let ty = state.type_of(1);
    if ty != LuaType::None && !state.is_string(1) {
        state.set_top(1);
        return Ok(1);
    }
    let mut msg = state.to_bytes(1).unwrap_or_default();
    if !msg.is_empty() {
        msg.push(b'\n');
    }
    msg.extend_from_slice(b"stack traceback:\n\t[C]: in ?");
    state.push_bytes(&msg);
    Ok(1)
}
