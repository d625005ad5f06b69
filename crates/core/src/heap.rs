//! Allocation and garbage collection primitives.
//!
//! `Heap` owns every object ever allocated, threaded through the
//! intrusive `Obj::next` list, plus the string intern pool. It knows how
//! to mark, trace and sweep, but it does not know what the current VM
//! roots are — the caller (the VM's `gc` module) supplies those by
//! calling `mark_value`/`mark_object` from a closure passed to
//! `Heap::collect`. This keeps the collector single-threaded and
//! trivially safe to drive: compiling and executing never overlap, so
//! there is never more than one root-marking pass in flight.

use crate::object::{
    fnv1a_hash, kind_of, ObjBoundMethod, ObjClass, ObjClosure, ObjFunction, ObjInstance,
    ObjKind, ObjNative, ObjString, ObjUpvalue, NativeFn,
};
use crate::object::Obj;
use crate::table::Table;
use crate::value::Value;
use std::cell::{Cell, RefCell};

pub struct GcStats {
    pub bytes_before: usize,
    pub bytes_after: usize,
    pub objects_freed: usize,
}

pub struct Heap {
    objects: Cell<*mut Obj>,
    strings: RefCell<Table>,
    gray_stack: RefCell<Vec<*mut Obj>>,
    bytes_allocated: Cell<usize>,
    next_gc: Cell<usize>,
}

impl Heap {
    pub fn new(initial_threshold: usize) -> Heap {
        Heap {
            objects: Cell::new(std::ptr::null_mut()),
            strings: RefCell::new(Table::new()),
            gray_stack: RefCell::new(Vec::new()),
            bytes_allocated: Cell::new(0),
            next_gc: Cell::new(initial_threshold),
        }
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated.get()
    }

    pub fn should_collect(&self) -> bool {
        self.bytes_allocated.get() > self.next_gc.get()
    }

    fn register(&self, obj_ptr: *mut Obj, size: usize) {
        unsafe {
            (*obj_ptr).next.set(self.objects.get());
        }
        self.objects.set(obj_ptr);
        self.bytes_allocated.set(self.bytes_allocated.get() + size);
    }

    // -- allocation -------------------------------------------------

    /// Interns `text`, allocating a new `ObjString` only if an equal one
    /// is not already in the pool.
    pub fn intern_str(&self, text: &str) -> *mut ObjString {
        let hash = fnv1a_hash(text.as_bytes());
        if let Some(existing) = unsafe { self.strings.borrow().find_string(text, hash) } {
            return existing;
        }
        let size = std::mem::size_of::<ObjString>();
        let ptr = Box::into_raw(Box::new(ObjString::new(text.into(), hash)));
        self.register(ptr as *mut Obj, size);
        self.strings.borrow_mut().set(ptr, Value::NIL);
        ptr
    }

    /// Like `intern_str`, but takes ownership of an already-built `String`
    /// (e.g. the result of string concatenation) so the happy path of a
    /// brand-new string avoids a second copy.
    pub fn take_string(&self, text: String) -> *mut ObjString {
        let hash = fnv1a_hash(text.as_bytes());
        if let Some(existing) = unsafe { self.strings.borrow().find_string(&text, hash) } {
            return existing;
        }
        let size = std::mem::size_of::<ObjString>();
        let ptr = Box::into_raw(Box::new(ObjString::new(text.into_boxed_str(), hash)));
        self.register(ptr as *mut Obj, size);
        self.strings.borrow_mut().set(ptr, Value::NIL);
        ptr
    }

    pub fn new_function(&self) -> *mut ObjFunction {
        let ptr = Box::into_raw(Box::new(ObjFunction::new()));
        self.register(ptr as *mut Obj, std::mem::size_of::<ObjFunction>());
        ptr
    }

    pub fn new_native(&self, function: NativeFn, arity: u8) -> *mut ObjNative {
        let ptr = Box::into_raw(Box::new(ObjNative::new(function, arity)));
        self.register(ptr as *mut Obj, std::mem::size_of::<ObjNative>());
        ptr
    }

    pub fn new_closure(
        &self,
        function: *mut ObjFunction,
        upvalues: Box<[*mut ObjUpvalue]>,
    ) -> *mut ObjClosure {
        let ptr = Box::into_raw(Box::new(ObjClosure::new(function, upvalues)));
        self.register(ptr as *mut Obj, std::mem::size_of::<ObjClosure>());
        ptr
    }

    pub fn new_upvalue(&self, location: *mut Value) -> *mut ObjUpvalue {
        let ptr = Box::into_raw(Box::new(ObjUpvalue::new(location)));
        self.register(ptr as *mut Obj, std::mem::size_of::<ObjUpvalue>());
        ptr
    }

    pub fn new_class(&self, name: *mut ObjString) -> *mut ObjClass {
        let ptr = Box::into_raw(Box::new(ObjClass::new(name)));
        self.register(ptr as *mut Obj, std::mem::size_of::<ObjClass>());
        ptr
    }

    pub fn new_instance(&self, class: *mut ObjClass) -> *mut ObjInstance {
        let ptr = Box::into_raw(Box::new(ObjInstance::new(class)));
        self.register(ptr as *mut Obj, std::mem::size_of::<ObjInstance>());
        ptr
    }

    pub fn new_bound_method(&self, receiver: Value, method: *mut ObjClosure) -> *mut ObjBoundMethod {
        let ptr = Box::into_raw(Box::new(ObjBoundMethod::new(receiver, method)));
        self.register(ptr as *mut Obj, std::mem::size_of::<ObjBoundMethod>());
        ptr
    }

    // -- mark / trace / sweep ---------------------------------------

    pub fn mark_value(&self, value: Value) {
        if value.is_obj() {
            self.mark_object(value.as_obj());
        }
    }

    pub fn mark_object(&self, ptr: *mut Obj) {
        if ptr.is_null() {
            return;
        }
        let marked = unsafe { &(*ptr).marked };
        if marked.get() {
            return;
        }
        marked.set(true);
        self.gray_stack.borrow_mut().push(ptr);
    }

    fn mark_table(&self, table: &Table) {
        for (key, value) in table.iter() {
            self.mark_object(key as *mut Obj);
            self.mark_value(value);
        }
    }

    fn blacken_object(&self, ptr: *mut Obj) {
        // Safety: `ptr` came off the gray stack, which only ever receives
        // pointers handed to `mark_object` by a live root or a live
        // reference already traced from one.
        unsafe {
            match kind_of(ptr) {
                ObjKind::String | ObjKind::Native => {}
                ObjKind::Upvalue => {
                    let uv = &*(ptr as *mut ObjUpvalue);
                    self.mark_value(uv.closed);
                }
                ObjKind::Function => {
                    let f = &*(ptr as *mut ObjFunction);
                    if let Some(name) = f.name {
                        self.mark_object(name as *mut Obj);
                    }
                    for constant in &f.chunk.constants {
                        self.mark_value(*constant);
                    }
                }
                ObjKind::Closure => {
                    let c = &*(ptr as *mut ObjClosure);
                    self.mark_object(c.function as *mut Obj);
                    for upvalue in c.upvalues.iter() {
                        self.mark_object(*upvalue as *mut Obj);
                    }
                }
                ObjKind::Class => {
                    let class = &*(ptr as *mut ObjClass);
                    self.mark_object(class.name as *mut Obj);
                    self.mark_table(&class.methods);
                }
                ObjKind::Instance => {
                    let inst = &*(ptr as *mut ObjInstance);
                    self.mark_object(inst.class as *mut Obj);
                    self.mark_table(&inst.fields);
                }
                ObjKind::BoundMethod => {
                    let bm = &*(ptr as *mut ObjBoundMethod);
                    self.mark_value(bm.receiver);
                    self.mark_object(bm.method as *mut Obj);
                }
            }
        }
    }

    fn trace_references(&self) {
        loop {
            let next = self.gray_stack.borrow_mut().pop();
            match next {
                Some(ptr) => self.blacken_object(ptr),
                None => break,
            }
        }
    }

    /// # Safety
    /// Every key pointer currently in the intern pool must point at a
    /// live `ObjString`, which holds as long as sweep has not yet run.
    unsafe fn remove_white_strings(&self) {
        unsafe { self.strings.borrow_mut().remove_white() };
    }

    fn sweep(&self) -> usize {
        let mut freed = 0usize;
        let mut prev: *mut Obj = std::ptr::null_mut();
        let mut current = self.objects.get();
        while !current.is_null() {
            let marked = unsafe { (*current).marked.get() };
            let next = unsafe { (*current).next.get() };
            if marked {
                unsafe { (*current).marked.set(false) };
                prev = current;
            } else {
                if prev.is_null() {
                    self.objects.set(next);
                } else {
                    unsafe { (*prev).next.set(next) };
                }
                let size = self.free_object(current);
                self.bytes_allocated.set(self.bytes_allocated.get() - size);
                freed += 1;
            }
            current = next;
        }
        freed
    }

    fn free_object(&self, ptr: *mut Obj) -> usize {
        unsafe {
            match kind_of(ptr) {
                ObjKind::String => {
                    let size = std::mem::size_of::<ObjString>();
                    drop(Box::from_raw(ptr as *mut ObjString));
                    size
                }
                ObjKind::Function => {
                    let size = std::mem::size_of::<ObjFunction>();
                    drop(Box::from_raw(ptr as *mut ObjFunction));
                    size
                }
                ObjKind::Native => {
                    let size = std::mem::size_of::<ObjNative>();
                    drop(Box::from_raw(ptr as *mut ObjNative));
                    size
                }
                ObjKind::Closure => {
                    let size = std::mem::size_of::<ObjClosure>();
                    drop(Box::from_raw(ptr as *mut ObjClosure));
                    size
                }
                ObjKind::Upvalue => {
                    let size = std::mem::size_of::<ObjUpvalue>();
                    drop(Box::from_raw(ptr as *mut ObjUpvalue));
                    size
                }
                ObjKind::Class => {
                    let size = std::mem::size_of::<ObjClass>();
                    drop(Box::from_raw(ptr as *mut ObjClass));
                    size
                }
                ObjKind::Instance => {
                    let size = std::mem::size_of::<ObjInstance>();
                    drop(Box::from_raw(ptr as *mut ObjInstance));
                    size
                }
                ObjKind::BoundMethod => {
                    let size = std::mem::size_of::<ObjBoundMethod>();
                    drop(Box::from_raw(ptr as *mut ObjBoundMethod));
                    size
                }
            }
        }
    }

    /// Runs one full mark-trace-remove_white-sweep cycle. `mark_roots` is
    /// called first and is expected to call `mark_value`/`mark_object` for
    /// every VM/compiler root; `grow_factor` sets the next threshold as a
    /// multiple of the post-sweep live-byte count.
    pub fn collect(&self, grow_factor: usize, mark_roots: impl FnOnce(&Heap)) -> GcStats {
        let bytes_before = self.bytes_allocated.get();
        mark_roots(self);
        self.trace_references();
        unsafe { self.remove_white_strings() };
        let objects_freed = self.sweep();
        let bytes_after = self.bytes_allocated.get();
        self.next_gc.set(bytes_after.max(1) * grow_factor);
        GcStats { bytes_before, bytes_after, objects_freed }
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let mut current = self.objects.get();
        while !current.is_null() {
            let next = unsafe { (*current).next.get() };
            self.free_object(current);
            current = next;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn interning_same_text_returns_same_pointer() {
        let heap = Heap::new(1024 * 1024);
        let a = heap.intern_str("hello");
        let b = heap.intern_str("hello");
        assert_eq!(a, b);
        let c = heap.intern_str("world");
        assert_ne!(a, c);
    }

    #[test]
    fn take_string_interns_against_existing_borrowed_string() {
        let heap = Heap::new(1024 * 1024);
        let a = heap.intern_str("abc");
        let b = heap.take_string(String::from("abc"));
        assert_eq!(a, b);
    }

    #[test]
    fn unreachable_objects_are_freed_on_collect() {
        let heap = Heap::new(0);
        let s = heap.intern_str("temp");
        let before = heap.bytes_allocated();
        assert!(before > 0);
        // No roots marked: every live object, including the interned
        // string, is garbage.
        let stats = heap.collect(2, |_| {});
        assert!(stats.objects_freed >= 1);
        assert_eq!(heap.bytes_allocated(), 0);
        let _ = s;
    }

    #[test]
    fn marked_roots_survive_collection() {
        let heap = Heap::new(0);
        let s = heap.intern_str("kept");
        let value = Value::obj(s as *mut Obj);
        let stats = heap.collect(2, |h| h.mark_value(value));
        assert_eq!(stats.objects_freed, 0);
        assert!(heap.bytes_allocated() > 0);
    }

    #[test]
    fn closure_blackening_marks_function_and_upvalues() {
        let heap = Heap::new(0);
        let function = heap.new_function();
        let mut slot = Value::number(7.0);
        let upvalue = heap.new_upvalue(&mut slot as *mut Value);
        let closure = heap.new_closure(function, Box::new([upvalue]));
        let value = Value::obj(closure as *mut Obj);
        let stats = heap.collect(2, |h| h.mark_value(value));
        assert_eq!(stats.objects_freed, 0);
    }
}
