//! Root enumeration for a collection cycle. `ember_core::Heap` supplies
//! the mechanical mark/trace/sweep primitives; this module supplies the
//! one thing only the VM knows: what is currently reachable while it is
//! running. `ember_compiler::Compiler` runs its own analogous root pass
//! (over the `FunctionState` chain) for collections triggered mid-compile,
//! since compiling and executing never overlap — by the time this module's
//! `collect` runs, there is no compiler state left to root.

use ember_core::{GcStats, Heap, Obj, ObjClosure, ObjString, ObjUpvalue, Table, Value};

#[allow(clippy::too_many_arguments)]
pub fn collect(
    heap: &Heap,
    grow_factor: usize,
    stack: &[Value],
    frame_closures: &[*mut ObjClosure],
    open_upvalues: *mut ObjUpvalue,
    globals: &Table,
    init_string: *mut ObjString,
) -> GcStats {
    heap.collect(grow_factor, |h| {
        for value in stack {
            h.mark_value(*value);
        }
        for closure in frame_closures {
            h.mark_object(*closure as *mut Obj);
        }
        let mut upvalue = open_upvalues;
        while !upvalue.is_null() {
            h.mark_object(upvalue as *mut Obj);
            upvalue = unsafe { (*upvalue).next_open.get() };
        }
        for (key, value) in globals.iter() {
            h.mark_object(key as *mut Obj);
            h.mark_value(value);
        }
        h.mark_object(init_string as *mut Obj);
    })
}
