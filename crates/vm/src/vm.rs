//! The stack-based dispatch loop: value stack, call frames, globals,
//! upvalue closing, and the class/instance/bound-method calling
//! convention of spec §4.5. `ember_compiler::compile` hands this module a
//! root `ObjFunction`; everything from there on is this file's problem.

use std::io::Write;

use ember_core::{
    as_bound_method, as_class, as_closure, as_function, as_instance, as_native, as_string,
    is_instance, is_string, kind_of, Chunk, Heap, Obj, ObjBoundMethod, ObjClass, ObjClosure,
    ObjFunction, ObjKind, ObjString, ObjUpvalue, OpCode, Table, Value,
};

use crate::config::VmConfig;
use crate::diagnostics::{self, DiagnosticsFlag, DiagnosticsSnapshot};
use crate::error::{FrameInfo, RuntimeError};
use crate::gc;
use crate::native;

/// 64 call frames of up to 256 locals each — the two limits spec §4.5
/// fixes independently turn out to multiply to exactly `STACK_MAX`, so a
/// frame-count check alone is sufficient to keep the value stack in bounds.
const FRAMES_MAX: usize = 64;
const STACK_MAX: usize = FRAMES_MAX * 256;

struct CallFrame {
    closure: *mut ObjClosure,
    ip: usize,
    slot_base: usize,
}

/// What `Vm::interpret` reports back to its host, mirroring spec §6's
/// `{OK, COMPILE_ERROR, RUNTIME_ERROR}` while carrying the diagnostics a
/// caller needs to report them (the CLI) or assert on them (tests).
pub enum InterpretResult {
    Ok,
    CompileError(Vec<ember_compiler::CompileError>),
    RuntimeError(RuntimeError),
}

/// Owns every piece of process-wide interpreter state as a single value,
/// per spec §9's "package it into a single owned context" note: the heap,
/// the value stack, the call-frame stack, the open-upvalue list, the
/// globals table, and the GC/trace configuration.
pub struct Vm {
    heap: Heap,
    stack: Box<[Value]>,
    stack_top: usize,
    frames: Vec<CallFrame>,
    open_upvalues: *mut ObjUpvalue,
    globals: Table,
    init_string: *mut ObjString,
    config: VmConfig,
    stdout: Box<dyn Write>,
    diagnostics: DiagnosticsFlag,
}

impl Vm {
    pub fn new(config: VmConfig) -> Vm {
        Vm::with_writer(config, Box::new(std::io::stdout()))
    }

    pub fn with_writer(config: VmConfig, stdout: Box<dyn Write>) -> Vm {
        let heap = Heap::new(config.initial_gc_threshold);
        let init_string = heap.intern_str("init");
        let mut vm = Vm {
            heap,
            stack: vec![Value::NIL; STACK_MAX].into_boxed_slice(),
            stack_top: 0,
            frames: Vec::with_capacity(FRAMES_MAX),
            open_upvalues: std::ptr::null_mut(),
            globals: Table::new(),
            init_string,
            config,
            stdout,
            diagnostics: DiagnosticsFlag::install(),
        };
        vm.define_native("clock", native::clock, 0);
        vm
    }

    /// Gives the CLI layer (or a test) a handle to request a SIGQUIT-style
    /// diagnostics dump without actually sending the process a signal.
    pub fn diagnostics_handle(&self) -> DiagnosticsFlag {
        self.diagnostics.clone()
    }

    /// Compiles `source` and, if that succeeds, runs it to completion.
    /// Resets the stack first so repeated REPL calls on one `Vm` don't
    /// inherit a prior line's leftover frames after a runtime error.
    pub fn interpret(&mut self, source: &str) -> InterpretResult {
        self.reset_stack();
        let compiled = ember_compiler::compile(
            source,
            &self.heap,
            self.config.stress_gc,
            self.config.gc_heap_grow_factor,
        );
        let function = match compiled {
            Ok(function) => function,
            Err(errors) => return InterpretResult::CompileError(errors),
        };
        let closure = self.heap.new_closure(function, Box::new([]));
        self.push(Value::obj(closure as *mut Obj));
        self.frames.push(CallFrame { closure, ip: 0, slot_base: 0 });
        match self.run() {
            Ok(()) => InterpretResult::Ok,
            Err(err) => InterpretResult::RuntimeError(err),
        }
    }

    fn define_native(&mut self, name: &str, function: ember_core::NativeFn, arity: u8) {
        let name_ptr = self.heap.intern_str(name);
        let native_ptr = self.heap.new_native(function, arity);
        self.globals.set(name_ptr, Value::obj(native_ptr as *mut Obj));
    }

    // -- stack primitives -------------------------------------------------

    fn reset_stack(&mut self) {
        self.stack_top = 0;
        self.frames.clear();
        self.open_upvalues = std::ptr::null_mut();
    }

    #[inline]
    fn push(&mut self, value: Value) {
        self.stack[self.stack_top] = value;
        self.stack_top += 1;
    }

    #[inline]
    fn pop(&mut self) -> Value {
        self.stack_top -= 1;
        self.stack[self.stack_top]
    }

    #[inline]
    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack_top - 1 - distance]
    }

    #[inline]
    fn slot_ptr(&mut self, index: usize) -> *mut Value {
        &mut self.stack[index] as *mut Value
    }

    // -- garbage collection -------------------------------------------------

    /// Checked before every allocation site in the dispatch loop, never
    /// after: the object about to be made room for doesn't exist yet, so a
    /// cycle run at this point needs no root for it (see
    /// `Compiler::maybe_collect` for the mirrored compile-time discipline).
    fn maybe_collect(&mut self) {
        if self.config.stress_gc || self.heap.should_collect() {
            let frame_closures: Vec<*mut ObjClosure> =
                self.frames.iter().map(|f| f.closure).collect();
            let stats = gc::collect(
                &self.heap,
                self.config.gc_heap_grow_factor,
                &self.stack[..self.stack_top],
                &frame_closures,
                self.open_upvalues,
                &self.globals,
                self.init_string,
            );
            tracing::debug!(
                bytes_before = stats.bytes_before,
                bytes_after = stats.bytes_after,
                objects_freed = stats.objects_freed,
                "gc cycle"
            );
        }
    }

    // -- upvalues -------------------------------------------------

    /// Finds or creates the open upvalue for `slot`, keeping the list
    /// sorted by descending stack address per spec §3's invariant.
    fn capture_upvalue(&mut self, slot: usize) -> *mut ObjUpvalue {
        let target = self.slot_ptr(slot);
        let mut prev: *mut ObjUpvalue = std::ptr::null_mut();
        let mut current = self.open_upvalues;
        unsafe {
            while !current.is_null() && (*current).location > target {
                prev = current;
                current = (*current).next_open.get();
            }
            if !current.is_null() && (*current).location == target {
                return current;
            }
        }
        self.maybe_collect();
        let created = self.heap.new_upvalue(target);
        unsafe {
            (*created).next_open.set(current);
        }
        if prev.is_null() {
            self.open_upvalues = created;
        } else {
            unsafe { (*prev).next_open.set(created) };
        }
        created
    }

    /// Closes every open upvalue at or above `from_slot`, copying the
    /// stack value into the upvalue's own storage so it survives the
    /// frame that owned the slot.
    fn close_upvalues(&mut self, from_slot: usize) {
        let boundary = self.slot_ptr(from_slot);
        unsafe {
            while !self.open_upvalues.is_null() && (*self.open_upvalues).location >= boundary {
                let uv = self.open_upvalues;
                (*uv).closed = *(*uv).location;
                (*uv).location = &mut (*uv).closed as *mut Value;
                self.open_upvalues = (*uv).next_open.get();
                (*uv).next_open.set(std::ptr::null_mut());
            }
        }
    }

    // -- errors -------------------------------------------------

    fn runtime_error(&mut self, message: impl Into<String>) -> RuntimeError {
        let mut frames = Vec::with_capacity(self.frames.len());
        for frame in self.frames.iter().rev() {
            let function = unsafe { &*(*frame.closure).function };
            let line = function.chunk.line_at(frame.ip.saturating_sub(1));
            let name = match function.name {
                Some(n) => unsafe { (*n).as_str().to_string() },
                None => "script".to_string(),
            };
            frames.push(FrameInfo { line, name });
        }
        let err = RuntimeError::new(message.into(), frames);
        self.reset_stack();
        err
    }

    // -- bytecode reads -------------------------------------------------

    fn current_chunk(&self) -> &Chunk {
        let frame = self.frames.last().unwrap();
        unsafe { &(*(*frame.closure).function).chunk }
    }

    #[inline]
    fn read_byte(&mut self) -> u8 {
        let frame = self.frames.last_mut().unwrap();
        let function = unsafe { &*(*frame.closure).function };
        let byte = function.chunk.code[frame.ip];
        frame.ip += 1;
        byte
    }

    #[inline]
    fn read_short(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        u16::from_be_bytes([hi, lo])
    }

    #[inline]
    fn read_constant(&mut self) -> Value {
        let idx = self.read_byte();
        self.current_chunk().constants[idx as usize]
    }

    #[inline]
    fn read_string(&mut self) -> *mut ObjString {
        unsafe { as_string(self.read_constant().as_obj()) }
    }

    // -- calling convention -------------------------------------------------

    fn call_value(&mut self, callee: Value, argc: u8) -> Result<(), RuntimeError> {
        if callee.is_obj() {
            let ptr = callee.as_obj();
            unsafe {
                match kind_of(ptr) {
                    ObjKind::Closure => return self.call_closure(as_closure(ptr), argc),
                    ObjKind::Native => return self.call_native(as_native(ptr), argc),
                    ObjKind::Class => return self.call_class(as_class(ptr), argc),
                    ObjKind::BoundMethod => return self.call_bound_method(as_bound_method(ptr), argc),
                    _ => {}
                }
            }
        }
        Err(self.runtime_error("Can only call functions and classes."))
    }

    fn call_closure(&mut self, closure: *mut ObjClosure, argc: u8) -> Result<(), RuntimeError> {
        let function = unsafe { (*closure).function };
        let arity = unsafe { (*function).arity };
        if argc != arity {
            return Err(
                self.runtime_error(format!("Expected {arity} arguments but got {argc}."))
            );
        }
        if self.frames.len() == FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        let slot_base = self.stack_top - argc as usize - 1;
        self.frames.push(CallFrame { closure, ip: 0, slot_base });
        Ok(())
    }

    fn call_native(&mut self, native: *mut ember_core::ObjNative, argc: u8) -> Result<(), RuntimeError> {
        let function = unsafe { (*native).function };
        let args_start = self.stack_top - argc as usize;
        let result = function(&self.stack[args_start..self.stack_top])
            .map_err(|msg| self.runtime_error(msg))?;
        self.stack_top -= argc as usize + 1;
        self.push(result);
        Ok(())
    }

    fn call_class(&mut self, class: *mut ObjClass, argc: u8) -> Result<(), RuntimeError> {
        self.maybe_collect();
        let instance = self.heap.new_instance(class);
        let callee_slot = self.stack_top - argc as usize - 1;
        self.stack[callee_slot] = Value::obj(instance as *mut Obj);
        if let Some(initializer) = unsafe { (*class).methods.get(self.init_string) } {
            let closure = unsafe { as_closure(initializer.as_obj()) };
            return self.call_closure(closure, argc);
        }
        if argc != 0 {
            return Err(self.runtime_error(format!("Expected 0 arguments but got {argc}.")));
        }
        Ok(())
    }

    fn call_bound_method(&mut self, bound: *mut ObjBoundMethod, argc: u8) -> Result<(), RuntimeError> {
        let receiver = unsafe { (*bound).receiver };
        let method = unsafe { (*bound).method };
        let callee_slot = self.stack_top - argc as usize - 1;
        self.stack[callee_slot] = receiver;
        self.call_closure(method, argc)
    }

    /// `receiver.name(args)` fused into one op: skips materializing a
    /// `BoundMethod` unless the name shadows a field, in which case it
    /// falls back to an ordinary call on whatever value the field holds.
    fn invoke(&mut self, name: *mut ObjString, argc: u8) -> Result<(), RuntimeError> {
        let receiver = self.peek(argc as usize);
        if !receiver.is_obj() || !unsafe { is_instance(receiver.as_obj()) } {
            return Err(self.runtime_error("Only instances have properties."));
        }
        let instance = unsafe { as_instance(receiver.as_obj()) };
        if let Some(value) = unsafe { (*instance).fields.get(name) } {
            let callee_slot = self.stack_top - argc as usize - 1;
            self.stack[callee_slot] = value;
            return self.call_value(value, argc);
        }
        let class = unsafe { (*instance).class };
        self.invoke_from_class(class, name, argc)
    }

    fn invoke_from_class(
        &mut self,
        class: *mut ObjClass,
        name: *mut ObjString,
        argc: u8,
    ) -> Result<(), RuntimeError> {
        let method = unsafe { (*class).methods.get(name) }.ok_or_else(|| {
            let name_str = unsafe { (*name).as_str() }.to_string();
            self.runtime_error(format!("Undefined property '{name_str}'."))
        })?;
        self.call_closure(unsafe { as_closure(method.as_obj()) }, argc)
    }

    /// Binds `name` looked up on `class`'s method table to the current
    /// `peek(0)` receiver, replacing it on the stack with a `BoundMethod`.
    /// Returns `false` (stack untouched) if `class` has no such method.
    fn bind_method(&mut self, class: *mut ObjClass, name: *mut ObjString) -> bool {
        let method = match unsafe { (*class).methods.get(name) } {
            Some(m) => m,
            None => return false,
        };
        self.maybe_collect();
        let bound = self.heap.new_bound_method(self.peek(0), unsafe { as_closure(method.as_obj()) });
        self.pop();
        self.push(Value::obj(bound as *mut Obj));
        true
    }

    fn concatenate(&mut self) -> Result<(), RuntimeError> {
        let b = unsafe { as_string(self.peek(0).as_obj()) };
        let a = unsafe { as_string(self.peek(1).as_obj()) };
        let mut joined = String::with_capacity(unsafe { (*a).as_str().len() + (*b).as_str().len() });
        joined.push_str(unsafe { (*a).as_str() });
        joined.push_str(unsafe { (*b).as_str() });
        self.maybe_collect();
        let result = self.heap.take_string(joined);
        self.pop();
        self.pop();
        self.push(Value::obj(result as *mut Obj));
        Ok(())
    }

    // -- the dispatch loop -------------------------------------------------

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            if self.config.trace_execution {
                self.trace_stack();
            }
            if self.diagnostics.take_requested() {
                diagnostics::dump(&DiagnosticsSnapshot {
                    bytes_allocated: self.heap.bytes_allocated(),
                    value_stack_depth: self.stack_top,
                    call_frame_depth: self.frames.len(),
                });
            }
            let instruction = OpCode::from_u8(self.read_byte());
            match instruction {
                OpCode::Constant => {
                    let constant = self.read_constant();
                    self.push(constant);
                }
                OpCode::Nil => self.push(Value::NIL),
                OpCode::True => self.push(Value::TRUE),
                OpCode::False => self.push(Value::FALSE),
                OpCode::Pop => {
                    self.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().unwrap().slot_base;
                    self.push(self.stack[base + slot]);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte() as usize;
                    let base = self.frames.last().unwrap().slot_base;
                    self.stack[base + slot] = self.peek(0);
                }
                OpCode::GetGlobal => {
                    let name = self.read_string();
                    match self.globals.get(name) {
                        Some(value) => self.push(value),
                        None => {
                            let name_str = unsafe { (*name).as_str() }.to_string();
                            return Err(self.runtime_error(format!("Undefined variable '{name_str}'.")));
                        }
                    }
                }
                OpCode::DefineGlobal => {
                    let name = self.read_string();
                    let value = self.peek(0);
                    self.globals.set(name, value);
                    self.pop();
                }
                OpCode::SetGlobal => {
                    let name = self.read_string();
                    let value = self.peek(0);
                    if self.globals.set(name, value) {
                        self.globals.delete(name);
                        let name_str = unsafe { (*name).as_str() }.to_string();
                        return Err(self.runtime_error(format!("Undefined variable '{name_str}'.")));
                    }
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let closure = self.frames.last().unwrap().closure;
                    let upvalue = unsafe { (*closure).upvalues[slot] };
                    self.push(unsafe { *(*upvalue).location });
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte() as usize;
                    let closure = self.frames.last().unwrap().closure;
                    let upvalue = unsafe { (*closure).upvalues[slot] };
                    let value = self.peek(0);
                    unsafe { *(*upvalue).location = value };
                }
                OpCode::GetProperty => {
                    let name = self.read_string();
                    let receiver = self.peek(0);
                    if !receiver.is_obj() || !unsafe { is_instance(receiver.as_obj()) } {
                        return Err(self.runtime_error("Only instances have properties."));
                    }
                    let instance = unsafe { as_instance(receiver.as_obj()) };
                    if let Some(value) = unsafe { (*instance).fields.get(name) } {
                        self.pop();
                        self.push(value);
                    } else {
                        let class = unsafe { (*instance).class };
                        if !self.bind_method(class, name) {
                            let name_str = unsafe { (*name).as_str() }.to_string();
                            return Err(self.runtime_error(format!("Undefined property '{name_str}'.")));
                        }
                    }
                }
                OpCode::SetProperty => {
                    let name = self.read_string();
                    let receiver = self.peek(1);
                    if !receiver.is_obj() || !unsafe { is_instance(receiver.as_obj()) } {
                        return Err(self.runtime_error("Only instances have fields."));
                    }
                    let instance = unsafe { as_instance(receiver.as_obj()) };
                    let value = self.peek(0);
                    unsafe { (*instance).fields.set(name, value) };
                    let value = self.pop();
                    self.pop();
                    self.push(value);
                }
                OpCode::GetSuper => {
                    let name = self.read_string();
                    let superclass = unsafe { as_class(self.pop().as_obj()) };
                    if !self.bind_method(superclass, name) {
                        let name_str = unsafe { (*name).as_str() }.to_string();
                        return Err(self.runtime_error(format!("Undefined property '{name_str}'.")));
                    }
                }
                OpCode::Equal => {
                    let b = self.pop();
                    let a = self.pop();
                    self.push(Value::bool(Value::values_equal(a, b)));
                }
                OpCode::Greater => self.binary_number_op(|a, b| Value::bool(a > b))?,
                OpCode::Less => self.binary_number_op(|a, b| Value::bool(a < b))?,
                OpCode::Not => {
                    let value = self.pop();
                    self.push(Value::bool(value.is_falsey()));
                }
                OpCode::Negate => {
                    if !self.peek(0).is_number() {
                        return Err(self.runtime_error("Operand must be a number."));
                    }
                    let value = self.pop().as_number();
                    self.push(Value::number(-value));
                }
                OpCode::Add => {
                    let (a, b) = (self.peek(1), self.peek(0));
                    if a.is_obj() && b.is_obj() && unsafe { is_string(a.as_obj()) && is_string(b.as_obj()) } {
                        self.concatenate()?;
                    } else if a.is_number() && b.is_number() {
                        let b = self.pop().as_number();
                        let a = self.pop().as_number();
                        self.push(Value::number(a + b));
                    } else {
                        return Err(
                            self.runtime_error("Operands must be two numbers or two strings.")
                        );
                    }
                }
                OpCode::Subtract => self.binary_number_op(|a, b| Value::number(a - b))?,
                OpCode::Multiply => self.binary_number_op(|a, b| Value::number(a * b))?,
                OpCode::Divide => self.binary_number_op(|a, b| Value::number(a / b))?,
                OpCode::Print => {
                    let value = self.pop();
                    let text = self.format_value(value);
                    let _ = writeln!(self.stdout, "{text}");
                }
                OpCode::Jump => {
                    let offset = self.read_short();
                    self.frames.last_mut().unwrap().ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_short();
                    if self.peek(0).is_falsey() {
                        self.frames.last_mut().unwrap().ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_short();
                    self.frames.last_mut().unwrap().ip -= offset as usize;
                }
                OpCode::Call => {
                    let argc = self.read_byte();
                    let callee = self.peek(argc as usize);
                    self.call_value(callee, argc)?;
                }
                OpCode::Invoke => {
                    let name = self.read_string();
                    let argc = self.read_byte();
                    self.invoke(name, argc)?;
                }
                OpCode::SuperInvoke => {
                    let name = self.read_string();
                    let argc = self.read_byte();
                    let superclass = unsafe { as_class(self.pop().as_obj()) };
                    self.invoke_from_class(superclass, name, argc)?;
                }
                OpCode::Closure => {
                    let function_val = self.read_constant();
                    let function = unsafe { function_val.as_obj() } as *mut ObjFunction;
                    let upvalue_count = unsafe { (*function).upvalue_count } as usize;
                    let mut upvalues = Vec::with_capacity(upvalue_count);
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() != 0;
                        let index = self.read_byte() as usize;
                        if is_local {
                            let base = self.frames.last().unwrap().slot_base;
                            upvalues.push(self.capture_upvalue(base + index));
                        } else {
                            let closure = self.frames.last().unwrap().closure;
                            upvalues.push(unsafe { (*closure).upvalues[index] });
                        }
                    }
                    self.maybe_collect();
                    let closure = self.heap.new_closure(function, upvalues.into_boxed_slice());
                    self.push(Value::obj(closure as *mut Obj));
                }
                OpCode::CloseUpvalue => {
                    self.close_upvalues(self.stack_top - 1);
                    self.pop();
                }
                OpCode::Class => {
                    let name = self.read_string();
                    self.maybe_collect();
                    let class = self.heap.new_class(name);
                    self.push(Value::obj(class as *mut Obj));
                }
                OpCode::Inherit => {
                    let superclass_val = self.peek(1);
                    if !superclass_val.is_obj() || !unsafe { ember_core::is_class(superclass_val.as_obj()) } {
                        return Err(self.runtime_error("Superclass must be a class."));
                    }
                    let superclass = unsafe { as_class(superclass_val.as_obj()) };
                    let subclass = unsafe { as_class(self.peek(0).as_obj()) };
                    unsafe { (*superclass).methods.copy_all_into(&mut (*subclass).methods) };
                    self.pop();
                }
                OpCode::Method => {
                    let name = self.read_string();
                    let method = self.peek(0);
                    let class = unsafe { as_class(self.peek(1).as_obj()) };
                    unsafe { (*class).methods.set(name, method) };
                    self.pop();
                }
                OpCode::Return => {
                    let result = self.pop();
                    let slot_base = self.frames.last().unwrap().slot_base;
                    self.close_upvalues(slot_base);
                    self.frames.pop();
                    if self.frames.is_empty() {
                        self.pop();
                        return Ok(());
                    }
                    self.stack_top = slot_base;
                    self.push(result);
                }
            }
        }
    }

    #[inline]
    fn binary_number_op(&mut self, op: impl Fn(f64, f64) -> Value) -> Result<(), RuntimeError> {
        if !self.peek(0).is_number() || !self.peek(1).is_number() {
            return Err(self.runtime_error("Operands must be numbers."));
        }
        let b = self.pop().as_number();
        let a = self.pop().as_number();
        self.push(op(a, b));
        Ok(())
    }

    fn format_value(&self, value: Value) -> String {
        if value.is_nil() {
            "nil".to_string()
        } else if value.is_bool() {
            value.as_bool().to_string()
        } else if value.is_number() {
            format_number(value.as_number())
        } else {
            unsafe { self.format_object(value.as_obj()) }
        }
    }

    unsafe fn format_object(&self, ptr: *mut Obj) -> String {
        match unsafe { kind_of(ptr) } {
            ObjKind::String => unsafe { (*as_string(ptr)).as_str().to_string() },
            ObjKind::Function => {
                let function = unsafe { as_function(ptr) };
                match unsafe { (*function).name } {
                    Some(name) => format!("<fn {}>", unsafe { (*name).as_str() }),
                    None => "<script>".to_string(),
                }
            }
            ObjKind::Native => "<native fn>".to_string(),
            ObjKind::Closure => unsafe { self.format_object((*as_closure(ptr)).function as *mut Obj) },
            ObjKind::Upvalue => "upvalue".to_string(),
            ObjKind::Class => unsafe { (*(*as_class(ptr)).name).as_str().to_string() },
            ObjKind::Instance => {
                let instance = unsafe { as_instance(ptr) };
                let class_name = unsafe { (*(*(*instance).class).name).as_str() };
                format!("{class_name} instance")
            }
            ObjKind::BoundMethod => unsafe {
                self.format_object((*(*as_bound_method(ptr)).method).function as *mut Obj)
            },
        }
    }

    fn trace_stack(&self) {
        let mut line = String::from("          ");
        for i in 0..self.stack_top {
            line.push_str(&format!("[ {} ]", self.format_value(self.stack[i])));
        }
        tracing::trace!("{line}");
    }
}

fn format_number(n: f64) -> String {
    if n == n.trunc() && n.is_finite() && n.abs() < 1e15 {
        format!("{n:.0}")
    } else {
        format!("{n}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[derive(Clone)]
    struct SharedWriter(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedWriter {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().extend_from_slice(buf);
            Ok(buf.len())
        }
        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    fn run_capture(source: &str) -> (InterpretResult, String) {
        let buf = Arc::new(Mutex::new(Vec::new()));
        let mut vm = Vm::with_writer(VmConfig::default(), Box::new(SharedWriter(buf.clone())));
        let result = vm.interpret(source);
        let out = String::from_utf8(buf.lock().unwrap().clone()).unwrap();
        (result, out)
    }

    #[test]
    fn arithmetic_precedence() {
        let (result, out) = run_capture("print 1 + 2 * 3;");
        assert!(matches!(result, InterpretResult::Ok));
        assert_eq!(out, "7\n");
    }

    #[test]
    fn string_concatenation() {
        let (result, out) = run_capture("print \"foo\" + \"bar\";");
        assert!(matches!(result, InterpretResult::Ok));
        assert_eq!(out, "foobar\n");
    }

    #[test]
    fn closures_capture_shared_mutable_state() {
        let source = r#"
            fun makeCounter() {
                var i = 0;
                fun count() {
                    i = i + 1;
                    print i;
                }
                return count;
            }
            var counter = makeCounter();
            counter();
            counter();
        "#;
        let (result, out) = run_capture(source);
        assert!(matches!(result, InterpretResult::Ok));
        assert_eq!(out, "1\n2\n");
    }

    #[test]
    fn classes_methods_and_inheritance() {
        let source = r#"
            class Animal {
                speak() {
                    print "...";
                }
            }
            class Dog < Animal {
                speak() {
                    print "Woof";
                }
            }
            var d = Dog();
            d.speak();
        "#;
        let (result, out) = run_capture(source);
        assert!(matches!(result, InterpretResult::Ok));
        assert_eq!(out, "Woof\n");
    }

    #[test]
    fn negating_a_string_is_a_runtime_error() {
        let (result, _) = run_capture("print -\"x\";");
        match result {
            InterpretResult::RuntimeError(err) => assert_eq!(err.message, "Operand must be a number."),
            _ => panic!("expected a runtime error"),
        }
    }

    #[test]
    fn undefined_global_is_a_runtime_error() {
        let (result, _) = run_capture("print missing;");
        match result {
            InterpretResult::RuntimeError(err) => {
                assert_eq!(err.message, "Undefined variable 'missing'.");
            }
            _ => panic!("expected a runtime error"),
        }
    }

    #[test]
    fn redeclared_local_is_a_compile_error() {
        let (result, _) = run_capture("{ var a; var a; }");
        match result {
            InterpretResult::CompileError(errors) => {
                assert!(errors.iter().any(|e| e.message.contains("Already a variable")));
            }
            _ => panic!("expected a compile error"),
        }
    }
}
