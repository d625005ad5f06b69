//! Heap object model.
//!
//! Every heap-allocated entity embeds a common `Obj` header as its first
//! field (`#[repr(C)]`, so a `*mut Obj` and a `*mut ObjString` share an
//! address and casting between them is sound as long as `kind` agrees).
//! `Obj::next` threads every live object into one intrusive list rooted in
//! the `Heap`; `marked` is the one-bit GC color, flipped during a mark
//! phase and cleared again for survivors during sweep.

use crate::chunk::Chunk;
use crate::table::Table;
use crate::value::Value;
use std::cell::Cell;
use std::fmt;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ObjKind {
    String,
    Function,
    Native,
    Closure,
    Upvalue,
    Class,
    Instance,
    BoundMethod,
}

impl fmt::Display for ObjKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ObjKind::String => "string",
            ObjKind::Function => "function",
            ObjKind::Native => "native function",
            ObjKind::Closure => "closure",
            ObjKind::Upvalue => "upvalue",
            ObjKind::Class => "class",
            ObjKind::Instance => "instance",
            ObjKind::BoundMethod => "bound method",
        };
        write!(f, "{s}")
    }
}

/// Common header embedded as the first field of every heap object.
#[repr(C)]
pub struct Obj {
    pub kind: ObjKind,
    pub marked: Cell<bool>,
    pub next: Cell<*mut Obj>,
}

impl Obj {
    fn new(kind: ObjKind) -> Obj {
        Obj { kind, marked: Cell::new(false), next: Cell::new(std::ptr::null_mut()) }
    }
}

/// # Safety
/// `ptr` must point at a live `Obj` header (or a struct whose first field
/// is one), i.e. something allocated by one of the `Heap::alloc_*`
/// constructors and not yet freed.
#[inline]
pub unsafe fn kind_of(ptr: *mut Obj) -> ObjKind {
    unsafe { (*ptr).kind }
}

macro_rules! downcast {
    ($fn_as:ident, $fn_is:ident, $kind:ident, $ty:ty) => {
        /// # Safety
        /// `ptr` must be a live object of the matching kind.
        #[inline]
        pub unsafe fn $fn_as(ptr: *mut Obj) -> *mut $ty {
            debug_assert_eq!(unsafe { kind_of(ptr) }, ObjKind::$kind);
            ptr as *mut $ty
        }

        /// # Safety
        /// `ptr` must point at a live `Obj`.
        #[inline]
        pub unsafe fn $fn_is(ptr: *mut Obj) -> bool {
            unsafe { kind_of(ptr) == ObjKind::$kind }
        }
    };
}

downcast!(as_string, is_string, String, ObjString);
downcast!(as_function, is_function, Function, ObjFunction);
downcast!(as_native, is_native, Native, ObjNative);
downcast!(as_closure, is_closure, Closure, ObjClosure);
downcast!(as_upvalue, is_upvalue, Upvalue, ObjUpvalue);
downcast!(as_class, is_class, Class, ObjClass);
downcast!(as_instance, is_instance, Instance, ObjInstance);
downcast!(as_bound_method, is_bound_method, BoundMethod, ObjBoundMethod);

/// An immutable, interned byte string with a precomputed FNV-1a hash.
#[repr(C)]
pub struct ObjString {
    pub obj: Obj,
    pub hash: u32,
    pub chars: Box<str>,
}

impl ObjString {
    pub fn new(chars: Box<str>, hash: u32) -> ObjString {
        ObjString { obj: Obj::new(ObjKind::String), hash, chars }
    }

    pub fn as_str(&self) -> &str {
        &self.chars
    }
}

/// FNV-1a 32-bit hash, used for every interned string.
pub fn fnv1a_hash(bytes: &[u8]) -> u32 {
    let mut hash: u32 = 2166136261;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

/// A compiled function: its arity, upvalue count, optional name, and its
/// own `Chunk` of bytecode.
#[repr(C)]
pub struct ObjFunction {
    pub obj: Obj,
    pub arity: u8,
    pub upvalue_count: u32,
    pub name: Option<*mut ObjString>,
    pub chunk: Chunk,
}

impl ObjFunction {
    pub fn new() -> ObjFunction {
        ObjFunction {
            obj: Obj::new(ObjKind::Function),
            arity: 0,
            upvalue_count: 0,
            name: None,
            chunk: Chunk::new(),
        }
    }
}

impl Default for ObjFunction {
    fn default() -> Self {
        ObjFunction::new()
    }
}

pub type NativeFn = fn(args: &[Value]) -> Result<Value, String>;

/// A host function callable from Ember with signature `(argv) -> Value`.
#[repr(C)]
pub struct ObjNative {
    pub obj: Obj,
    pub function: NativeFn,
    pub arity: u8,
}

impl ObjNative {
    pub fn new(function: NativeFn, arity: u8) -> ObjNative {
        ObjNative { obj: Obj::new(ObjKind::Native), function, arity }
    }
}

/// Either open (pointing into the VM stack) or closed (owning its
/// captured value). `next_open` threads the VM's separate open-upvalues
/// list and is unrelated to `obj.next` (the heap object list).
#[repr(C)]
pub struct ObjUpvalue {
    pub obj: Obj,
    pub location: *mut Value,
    pub closed: Value,
    pub next_open: Cell<*mut ObjUpvalue>,
}

impl ObjUpvalue {
    pub fn new(location: *mut Value) -> ObjUpvalue {
        ObjUpvalue {
            obj: Obj::new(ObjKind::Upvalue),
            location,
            closed: Value::NIL,
            next_open: Cell::new(std::ptr::null_mut()),
        }
    }

    /// True while this upvalue still aliases a live stack slot.
    pub fn is_open(&self) -> bool {
        !self.location.is_null() && self.location != &self.closed as *const Value as *mut Value
    }
}

/// Runtime pairing of a `Function` with its captured upvalues.
#[repr(C)]
pub struct ObjClosure {
    pub obj: Obj,
    pub function: *mut ObjFunction,
    pub upvalues: Box<[*mut ObjUpvalue]>,
}

impl ObjClosure {
    pub fn new(function: *mut ObjFunction, upvalues: Box<[*mut ObjUpvalue]>) -> ObjClosure {
        ObjClosure { obj: Obj::new(ObjKind::Closure), function, upvalues }
    }
}

#[repr(C)]
pub struct ObjClass {
    pub obj: Obj,
    pub name: *mut ObjString,
    pub methods: Table,
}

impl ObjClass {
    pub fn new(name: *mut ObjString) -> ObjClass {
        ObjClass { obj: Obj::new(ObjKind::Class), name, methods: Table::new() }
    }
}

#[repr(C)]
pub struct ObjInstance {
    pub obj: Obj,
    pub class: *mut ObjClass,
    pub fields: Table,
}

impl ObjInstance {
    pub fn new(class: *mut ObjClass) -> ObjInstance {
        ObjInstance { obj: Obj::new(ObjKind::Instance), class, fields: Table::new() }
    }
}

#[repr(C)]
pub struct ObjBoundMethod {
    pub obj: Obj,
    pub receiver: Value,
    pub method: *mut ObjClosure,
}

impl ObjBoundMethod {
    pub fn new(receiver: Value, method: *mut ObjClosure) -> ObjBoundMethod {
        ObjBoundMethod { obj: Obj::new(ObjKind::BoundMethod), receiver, method }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fnv1a_matches_known_vector() {
        // FNV-1a 32-bit of the empty string is the offset basis.
        assert_eq!(fnv1a_hash(b""), 2166136261);
        // "a" hashed by hand: (2166136261 ^ 'a') * 16777619 mod 2^32
        let expected = (2166136261u32 ^ b'a' as u32).wrapping_mul(16777619);
        assert_eq!(fnv1a_hash(b"a"), expected);
    }

    #[test]
    fn downcast_round_trips_through_obj_pointer() {
        let mut s = ObjString::new("hi".into(), fnv1a_hash(b"hi"));
        let obj_ptr: *mut Obj = &mut s.obj as *mut Obj;
        unsafe {
            assert!(is_string(obj_ptr));
            assert!(!is_function(obj_ptr));
            let back = as_string(obj_ptr);
            assert_eq!((*back).as_str(), "hi");
        }
    }
}
