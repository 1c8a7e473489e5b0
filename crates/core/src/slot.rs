//! Values held by the reference state
//!
//! `Slot` is what a stack position, a table field or a registry entry holds
//! inside [`VmState`](crate::vm::VmState). Aggregates (tables, userdata,
//! functions, threads) are reference types: copying a slot copies the
//! reference, and identity is pointer identity, exactly as in the runtime.

use crate::number::{float_to_exact_i64, format_float, format_integer, parse_numeral};
use crate::state::NativeFn;
use crate::types::{ForeignPtr, LuaType};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

pub type TableRef = Rc<RefCell<TableData>>;
pub type UserdataRef = Rc<UserdataBlock>;

#[derive(Clone)]
pub enum Slot {
    Nil,
    Boolean(bool),
    Integer(i64),
    Number(f64),
    String(Rc<[u8]>),
    Table(TableRef),
    Function(NativeFn),
    LightUserdata(ForeignPtr),
    Userdata(UserdataRef),
    Thread(Rc<ThreadData>),
}

impl Slot {
    pub fn string(bytes: &[u8]) -> Self {
        Slot::String(Rc::from(bytes))
    }

    pub fn new_table() -> Self {
        Slot::Table(Rc::new(RefCell::new(TableData::default())))
    }

    pub fn lua_type(&self) -> LuaType {
        match self {
            Slot::Nil => LuaType::Nil,
            Slot::Boolean(_) => LuaType::Boolean,
            Slot::Integer(_) | Slot::Number(_) => LuaType::Number,
            Slot::String(_) => LuaType::String,
            Slot::Table(_) => LuaType::Table,
            Slot::Function(_) => LuaType::Function,
            Slot::LightUserdata(_) => LuaType::LightUserdata,
            Slot::Userdata(_) => LuaType::Userdata,
            Slot::Thread(_) => LuaType::Thread,
        }
    }

    pub fn is_nil(&self) -> bool {
        matches!(self, Slot::Nil)
    }

    pub fn truthy(&self) -> bool {
        !matches!(self, Slot::Nil | Slot::Boolean(false))
    }

    pub fn to_integer(&self) -> Option<i64> {
        match self {
            Slot::Integer(n) => Some(*n),
            Slot::Number(f) => float_to_exact_i64(*f),
            Slot::String(s) => parse_numeral(s)?.as_exact_i64(),
            _ => None,
        }
    }

    pub fn to_number(&self) -> Option<f64> {
        match self {
            Slot::Integer(n) => Some(*n as f64),
            Slot::Number(f) => Some(*f),
            Slot::String(s) => parse_numeral(s).map(|n| n.as_f64()),
            _ => None,
        }
    }

    pub fn to_bytes(&self) -> Option<Vec<u8>> {
        match self {
            Slot::String(s) => Some(s.to_vec()),
            Slot::Integer(n) => Some(format_integer(*n).into_bytes()),
            Slot::Number(f) => Some(format_float(*f).into_bytes()),
            _ => None,
        }
    }

    /// Primitive equality: numbers compare by value across subtypes,
    /// strings by content, everything else by identity.
    pub fn raw_eq(&self, other: &Slot) -> bool {
        match (self, other) {
            (Slot::Nil, Slot::Nil) => true,
            (Slot::Boolean(a), Slot::Boolean(b)) => a == b,
            (Slot::Integer(a), Slot::Integer(b)) => a == b,
            (Slot::Number(a), Slot::Number(b)) => a == b,
            (Slot::Integer(i), Slot::Number(f)) | (Slot::Number(f), Slot::Integer(i)) => {
                float_to_exact_i64(*f) == Some(*i)
            }
            (Slot::String(a), Slot::String(b)) => a == b,
            (Slot::Table(a), Slot::Table(b)) => Rc::ptr_eq(a, b),
            (Slot::Function(a), Slot::Function(b)) => Rc::ptr_eq(a, b),
            (Slot::LightUserdata(a), Slot::LightUserdata(b)) => a == b,
            (Slot::Userdata(a), Slot::Userdata(b)) => Rc::ptr_eq(a, b),
            (Slot::Thread(a), Slot::Thread(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Key form used for table storage: integral floats become integers.
    /// Nil and NaN are not valid keys.
    pub fn normalize_key(self) -> Option<Slot> {
        match self {
            Slot::Nil => None,
            Slot::Number(f) if f.is_nan() => None,
            Slot::Number(f) => Some(match float_to_exact_i64(f) {
                Some(n) => Slot::Integer(n),
                None => Slot::Number(f),
            }),
            other => Some(other),
        }
    }
}

impl fmt::Debug for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Slot::Nil => write!(f, "nil"),
            Slot::Boolean(b) => write!(f, "{}", b),
            Slot::Integer(n) => write!(f, "{}", n),
            Slot::Number(n) => write!(f, "{}", format_float(*n)),
            Slot::String(s) => write!(f, "{:?}", String::from_utf8_lossy(s)),
            Slot::Table(t) => write!(f, "table: {:p}", Rc::as_ptr(t)),
            Slot::Function(func) => write!(f, "function: {:p}", Rc::as_ptr(func)),
            Slot::LightUserdata(p) => write!(f, "userdata: {:p}", *p),
            Slot::Userdata(u) => write!(f, "userdata: {:p}", Rc::as_ptr(u)),
            Slot::Thread(t) => write!(f, "thread: {:p}", Rc::as_ptr(t)),
        }
    }
}

/// Hashable identity of a normalized table key: primitives by value,
/// strings by content, reference types by address.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
enum KeyId {
    Boolean(bool),
    Integer(i64),
    Float(u64),
    String(Rc<[u8]>),
    Ref(LuaType, usize),
}

impl KeyId {
    /// `key` must already be normalized.
    fn of(key: &Slot) -> Option<KeyId> {
        Some(match key {
            Slot::Nil => return None,
            Slot::Boolean(b) => KeyId::Boolean(*b),
            Slot::Integer(n) => KeyId::Integer(*n),
            Slot::Number(f) => KeyId::Float(f.to_bits()),
            Slot::String(s) => KeyId::String(Rc::clone(s)),
            Slot::Table(t) => KeyId::Ref(LuaType::Table, Rc::as_ptr(t) as *const () as usize),
            Slot::Function(f) => {
                KeyId::Ref(LuaType::Function, Rc::as_ptr(f) as *const () as usize)
            }
            Slot::LightUserdata(p) => KeyId::Ref(LuaType::LightUserdata, *p as usize),
            Slot::Userdata(u) => KeyId::Ref(LuaType::Userdata, Rc::as_ptr(u) as usize),
            Slot::Thread(t) => KeyId::Ref(LuaType::Thread, Rc::as_ptr(t) as usize),
        })
    }
}

/// Table storage: insertion-ordered entries with a key index.
///
/// Assigning nil to a field leaves a tombstone so that a traversal in
/// progress can still find its cursor. Tombstones are compacted away when a
/// new key is inserted, which is the point where the runtime already leaves
/// an ongoing traversal undefined.
#[derive(Default)]
pub struct TableData {
    entries: Vec<(Slot, Slot)>,
    index: HashMap<KeyId, usize>,
    tombstones: usize,
    pub metatable: Option<TableRef>,
}

impl TableData {
    fn position(&self, key: &Slot) -> Option<usize> {
        self.index.get(&KeyId::of(key)?).copied()
    }

    pub fn get(&self, key: &Slot) -> Slot {
        match key.clone().normalize_key() {
            Some(key) => self
                .position(&key)
                .map(|i| self.entries[i].1.clone())
                .unwrap_or(Slot::Nil),
            None => Slot::Nil,
        }
    }

    pub fn get_str(&self, name: &str) -> Slot {
        self.get(&Slot::string(name.as_bytes()))
    }

    /// Returns false (and stores nothing) for nil/NaN keys.
    pub fn set(&mut self, key: Slot, value: Slot) -> bool {
        let Some(key) = key.normalize_key() else {
            return false;
        };
        let Some(id) = KeyId::of(&key) else {
            return false;
        };
        match self.index.get(&id) {
            Some(&i) => {
                let slot = &mut self.entries[i].1;
                match (slot.is_nil(), value.is_nil()) {
                    (true, false) => self.tombstones -= 1,
                    (false, true) => self.tombstones += 1,
                    _ => {}
                }
                *slot = value;
            }
            None if !value.is_nil() => {
                if self.tombstones * 2 > self.entries.len() {
                    self.compact();
                }
                self.index.insert(id, self.entries.len());
                self.entries.push((key, value));
            }
            None => {}
        }
        true
    }

    pub fn set_str(&mut self, name: &str, value: Slot) {
        self.set(Slot::string(name.as_bytes()), value);
    }

    /// Drop tombstones and rebuild the index.
    fn compact(&mut self) {
        self.entries.retain(|(_, v)| !v.is_nil());
        self.index.clear();
        for (i, (k, _)) in self.entries.iter().enumerate() {
            if let Some(id) = KeyId::of(k) {
                self.index.insert(id, i);
            }
        }
        self.tombstones = 0;
    }

    /// Entry following `key` (nil starts the traversal). `Err(())` means the
    /// key is not part of the table.
    pub fn next_after(&self, key: &Slot) -> Result<Option<(Slot, Slot)>, ()> {
        let start = if key.is_nil() {
            0
        } else {
            let key = key.clone().normalize_key().ok_or(())?;
            self.position(&key).ok_or(())? + 1
        };
        Ok(self.entries[start..]
            .iter()
            .find(|(_, v)| !v.is_nil())
            .map(|(k, v)| (k.clone(), v.clone())))
    }

    pub fn len(&self) -> usize {
        self.entries.len() - self.tombstones
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// A full userdata block. The block carries exactly one foreign pointer.
pub struct UserdataBlock {
    pub ptr: ForeignPtr,
    pub metatable: RefCell<Option<TableRef>>,
}

/// Opaque coroutine handle. The reference state never runs coroutines; it
/// only needs a value of this type to exist.
#[derive(Default)]
pub struct ThreadData;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_raw_eq_numbers_across_subtypes() {
        assert!(Slot::Integer(2).raw_eq(&Slot::Number(2.0)));
        assert!(!Slot::Integer(2).raw_eq(&Slot::Number(2.5)));
        assert!(Slot::string(b"a").raw_eq(&Slot::string(b"a")));
        assert!(!Slot::new_table().raw_eq(&Slot::new_table()));
    }

    #[test]
    fn test_integral_float_keys_normalize() {
        let mut t = TableData::default();
        t.set(Slot::Number(2.0), Slot::Boolean(true));
        assert!(t.get(&Slot::Integer(2)).truthy());
        assert!(!t.set(Slot::Nil, Slot::Integer(1)));
        assert!(!t.set(Slot::Number(f64::NAN), Slot::Integer(1)));
    }

    #[test]
    fn test_next_skips_tombstones() {
        let mut t = TableData::default();
        t.set_str("a", Slot::Integer(1));
        t.set_str("b", Slot::Integer(2));
        t.set_str("c", Slot::Integer(3));
        t.set_str("b", Slot::Nil);
        assert_eq!(t.len(), 2);

        let (k1, _) = t.next_after(&Slot::Nil).unwrap().unwrap();
        let (k2, v2) = t.next_after(&k1).unwrap().unwrap();
        assert!(k2.raw_eq(&Slot::string(b"c")));
        assert!(v2.raw_eq(&Slot::Integer(3)));
        assert!(t.next_after(&k2).unwrap().is_none());
        assert!(t.next_after(&Slot::string(b"zzz")).is_err());
    }

    #[test]
    fn test_clearing_during_traversal_keeps_cursor() {
        let mut t = TableData::default();
        for i in 1..=4 {
            t.set(Slot::Integer(i), Slot::Integer(i * 10));
        }
        let mut key = Slot::Nil;
        let mut seen = 0;
        while let Some((k, _)) = t.next_after(&key).unwrap() {
            t.set(k.clone(), Slot::Nil);
            key = k;
            seen += 1;
        }
        assert_eq!(seen, 4);
        assert!(t.is_empty());
    }

    #[test]
    fn test_churned_keys_do_not_grow_storage() {
        let mut t = TableData::default();
        for i in 0..1000 {
            t.set(Slot::Integer(i), Slot::Boolean(true));
            t.set(Slot::Integer(i), Slot::Nil);
        }
        assert!(t.is_empty());
        assert!(t.entries.len() <= 2);
        assert_eq!(t.index.len(), t.entries.len());

        t.set_str("kept", Slot::Integer(1));
        assert!(t.get_str("kept").raw_eq(&Slot::Integer(1)));
        assert_eq!(t.len(), 1);
    }

    #[test]
    fn test_reference_keys_by_identity() {
        let mut t = TableData::default();
        let a = Slot::new_table();
        let b = Slot::new_table();
        t.set(a.clone(), Slot::Integer(1));
        t.set(b.clone(), Slot::Integer(2));
        t.set(Slot::Number(0.5), Slot::Integer(3));
        assert!(t.get(&a).raw_eq(&Slot::Integer(1)));
        assert!(t.get(&b).raw_eq(&Slot::Integer(2)));
        assert!(t.get(&Slot::Number(0.5)).raw_eq(&Slot::Integer(3)));
        assert!(t.get(&Slot::new_table()).is_nil());
    }

    #[test]
    fn test_large_traversal_visits_every_entry() {
        let mut t = TableData::default();
        for i in 0..20_000 {
            t.set(Slot::Integer(i), Slot::Integer(i));
        }
        let mut key = Slot::Nil;
        let mut count = 0;
        while let Some((k, _)) = t.next_after(&key).unwrap() {
            key = k;
            count += 1;
        }
        assert_eq!(count, 20_000);
    }

    #[test]
    fn test_string_coercions() {
        assert_eq!(Slot::string(b"10").to_integer(), Some(10));
        assert_eq!(Slot::string(b"2.5").to_number(), Some(2.5));
        assert_eq!(Slot::Number(2.0).to_bytes(), Some(b"2.0".to_vec()));
        assert_eq!(Slot::Boolean(true).to_bytes(), None);
    }
}
