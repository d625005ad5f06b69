//! Single-pass Pratt parser fused directly with bytecode emission. There
//! is no intermediate AST: every grammar rule, on recognizing its input,
//! writes bytecode straight into the `Chunk` of the function currently
//! being compiled.

use crate::error::CompileError;
use crate::scanner::{Scanner, Token, TokenKind};
use ember_core::{Heap, ObjFunction, Obj, OpCode, Value};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionType {
    Script,
    Function,
    Method,
    Initializer,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Precedence {
    None,
    Assignment,
    Or,
    And,
    Equality,
    Comparison,
    Term,
    Factor,
    Unary,
    Call,
    Primary,
}

impl Precedence {
    fn one_higher(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call => Precedence::Primary,
            Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn<'src> = fn(&mut Compiler<'src>, bool);

struct ParseRule<'src> {
    prefix: Option<ParseFn<'src>>,
    infix: Option<ParseFn<'src>>,
    precedence: Precedence,
}

struct Local<'src> {
    name: &'src str,
    depth: i32,
    is_captured: bool,
}

#[derive(Clone, Copy)]
struct UpvalueInfo {
    index: u8,
    is_local: bool,
}

struct FunctionState<'src> {
    function: *mut ObjFunction,
    fn_type: FunctionType,
    locals: Vec<Local<'src>>,
    upvalues: Vec<UpvalueInfo>,
    scope_depth: i32,
}

impl<'src> FunctionState<'src> {
    fn new(fn_type: FunctionType, function: *mut ObjFunction) -> FunctionState<'src> {
        // Slot 0 is reserved: bound to `this` for methods/initializers,
        // unreferenceable (empty name, no identifier ever scans as "") for
        // plain functions and the top-level script.
        let reserved_name = match fn_type {
            FunctionType::Method | FunctionType::Initializer => "this",
            FunctionType::Function | FunctionType::Script => "",
        };
        FunctionState {
            function,
            fn_type,
            locals: vec![Local { name: reserved_name, depth: 0, is_captured: false }],
            upvalues: Vec::new(),
            scope_depth: 0,
        }
    }
}

struct ClassState {
    has_superclass: bool,
}

pub struct Compiler<'src> {
    scanner: Scanner<'src>,
    heap: &'src Heap,
    stress_gc: bool,
    gc_grow_factor: usize,
    previous: Token<'src>,
    current: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    states: Vec<FunctionState<'src>>,
    class_states: Vec<ClassState>,
}

/// Compiles `source` into a top-level `Function`. Allocations (the
/// function itself, interned identifiers/string literals) are made
/// through `heap`, so a failed compile may still leave interned strings
/// behind — they are ordinary garbage, reclaimed by the next collection.
///
/// `stress_gc`/`gc_grow_factor` let a collection run mid-compile (spec
/// §4.6's stress mode applies here too, not only during `Vm::run`): every
/// allocation checks the threshold first and, if a cycle fires, roots the
/// in-progress `Function` of every enclosing `FunctionState`, so nested
/// function bodies being built are never swept out from under the parser.
pub fn compile(
    source: &str,
    heap: &Heap,
    stress_gc: bool,
    gc_grow_factor: usize,
) -> Result<*mut ObjFunction, Vec<CompileError>> {
    let mut compiler = Compiler::new(source, heap, stress_gc, gc_grow_factor);
    compiler.advance();
    while !compiler.match_token(TokenKind::Eof) {
        compiler.declaration();
    }
    let function = compiler.end_script();
    if compiler.had_error {
        Err(compiler.errors)
    } else {
        Ok(function)
    }
}

impl<'src> Compiler<'src> {
    fn new(source: &'src str, heap: &'src Heap, stress_gc: bool, gc_grow_factor: usize) -> Compiler<'src> {
        let placeholder = Token { kind: TokenKind::Eof, lexeme: "", line: 1 };
        let script_fn = heap.new_function();
        Compiler {
            scanner: Scanner::new(source),
            heap,
            stress_gc,
            gc_grow_factor,
            previous: placeholder,
            current: placeholder,
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            states: vec![FunctionState::new(FunctionType::Script, script_fn)],
            class_states: Vec::new(),
        }
    }

    /// Runs a collection before any allocation that could grow the heap,
    /// rooting every `FunctionState` still under construction. Mirrors
    /// `Vm::maybe_collect`'s check-before-allocate discipline: the new
    /// object being made room for does not exist yet, so it needs no root.
    fn maybe_collect(&self) {
        if self.stress_gc || self.heap.should_collect() {
            self.heap.collect(self.gc_grow_factor, |h| {
                for state in &self.states {
                    h.mark_object(state.function as *mut Obj);
                }
            });
        }
    }

    fn intern(&self, text: &str) -> *mut ember_core::ObjString {
        self.maybe_collect();
        self.heap.intern_str(text)
    }

    fn alloc_function(&self) -> *mut ObjFunction {
        self.maybe_collect();
        self.heap.new_function()
    }

    // -- token stream -------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let msg = self.current.lexeme.to_string();
            self.error_at_current(&msg);
        }
    }

    fn check(&self, kind: TokenKind) -> bool {
        self.current.kind == kind
    }

    fn match_token(&mut self, kind: TokenKind) -> bool {
        if !self.check(kind) {
            return false;
        }
        self.advance();
        true
    }

    fn consume(&mut self, kind: TokenKind, msg: &str) {
        if self.current.kind == kind {
            self.advance();
            return;
        }
        self.error_at_current(msg);
    }

    fn error_at_current(&mut self, msg: &str) {
        let token = self.current;
        self.error_at(token, msg);
    }

    fn error(&mut self, msg: &str) {
        let token = self.previous;
        self.error_at(token, msg);
    }

    fn error_at(&mut self, token: Token<'src>, msg: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        self.errors.push(CompileError::new(msg.to_string(), token.line));
    }

    fn synchronize(&mut self) {
        self.panic_mode = false;
        tracing::warn!(line = self.previous.line, "recovering from parse error");
        while self.current.kind != TokenKind::Eof {
            if self.previous.kind == TokenKind::Semicolon {
                return;
            }
            match self.current.kind {
                TokenKind::Class
                | TokenKind::Fun
                | TokenKind::Var
                | TokenKind::For
                | TokenKind::If
                | TokenKind::While
                | TokenKind::Print
                | TokenKind::Return => return,
                _ => {}
            }
            self.advance();
        }
    }

    // -- chunk emission -------------------------------------------------

    fn current_function(&self) -> *mut ObjFunction {
        self.states.last().unwrap().function
    }

    fn chunk_len(&self) -> usize {
        unsafe { (*self.current_function()).chunk.code.len() }
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        unsafe {
            (*self.current_function()).chunk.write(byte, line);
        }
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_two(&mut self, op: OpCode, byte: u8) {
        self.emit_op(op);
        self.emit_byte(byte);
    }

    fn emit_return(&mut self) {
        if self.states.last().unwrap().fn_type == FunctionType::Initializer {
            self.emit_two(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let idx = unsafe { (*self.current_function()).chunk.add_constant(value) };
        if idx > u8::MAX as usize {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        idx as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.make_constant(value);
        self.emit_two(OpCode::Constant, idx);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.chunk_len() - 2
    }

    fn patch_jump(&mut self, offset: usize) {
        let jump = self.chunk_len() - offset - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
        }
        let bytes = (jump as u16).to_be_bytes();
        unsafe {
            let chunk = &mut (*self.current_function()).chunk;
            chunk.code[offset] = bytes[0];
            chunk.code[offset + 1] = bytes[1];
        }
    }

    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::Loop);
        let offset = self.chunk_len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        let bytes = (offset as u16).to_be_bytes();
        self.emit_byte(bytes[0]);
        self.emit_byte(bytes[1]);
    }

    fn identifier_constant(&mut self, name: Token<'src>) -> u8 {
        let ptr = self.intern(name.lexeme);
        self.make_constant(Value::obj(ptr as *mut Obj))
    }

    // -- scopes / locals / upvalues --------------------------------------

    fn begin_scope(&mut self) {
        self.states.last_mut().unwrap().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        let state_idx = self.states.len() - 1;
        self.states[state_idx].scope_depth -= 1;
        let depth = self.states[state_idx].scope_depth;
        loop {
            let should_pop = match self.states[state_idx].locals.last() {
                Some(local) => local.depth > depth,
                None => false,
            };
            if !should_pop {
                break;
            }
            let local = self.states[state_idx].locals.pop().unwrap();
            if local.is_captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
        }
    }

    fn add_local(&mut self, name: &'src str) {
        let state_idx = self.states.len() - 1;
        if self.states[state_idx].locals.len() == 256 {
            self.error("Too many local variables in function.");
            return;
        }
        self.states[state_idx].locals.push(Local { name, depth: -1, is_captured: false });
    }

    fn declare_variable(&mut self) {
        let state_idx = self.states.len() - 1;
        if self.states[state_idx].scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme;
        let scope_depth = self.states[state_idx].scope_depth;
        let mut duplicate = false;
        for local in self.states[state_idx].locals.iter().rev() {
            if local.depth != -1 && local.depth < scope_depth {
                break;
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
            return;
        }
        self.add_local(name);
    }

    fn parse_variable(&mut self, msg: &str) -> u8 {
        self.consume(TokenKind::Identifier, msg);
        self.declare_variable();
        if self.states.last().unwrap().scope_depth > 0 {
            return 0;
        }
        let name = self.previous;
        self.identifier_constant(name)
    }

    fn mark_initialized(&mut self) {
        let state_idx = self.states.len() - 1;
        if self.states[state_idx].scope_depth == 0 {
            return;
        }
        let depth = self.states[state_idx].scope_depth;
        self.states[state_idx].locals.last_mut().unwrap().depth = depth;
    }

    fn define_variable(&mut self, global: u8) {
        if self.states.last().unwrap().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_two(OpCode::DefineGlobal, global);
    }

    fn resolve_local(&mut self, state_idx: usize, name: &str) -> Option<u8> {
        for (i, local) in self.states[state_idx].locals.iter().enumerate().rev() {
            if local.name == name {
                if local.depth == -1 {
                    self.error("Can't read local variable in its own initializer.");
                }
                return Some(i as u8);
            }
        }
        None
    }

    fn resolve_upvalue(&mut self, state_idx: usize, name: &str) -> Option<u8> {
        if state_idx == 0 {
            return None;
        }
        let enclosing_idx = state_idx - 1;
        if let Some(local) = self.resolve_local(enclosing_idx, name) {
            self.states[enclosing_idx].locals[local as usize].is_captured = true;
            return Some(self.add_upvalue(state_idx, local, true));
        }
        if let Some(upvalue) = self.resolve_upvalue(enclosing_idx, name) {
            return Some(self.add_upvalue(state_idx, upvalue, false));
        }
        None
    }

    fn add_upvalue(&mut self, state_idx: usize, index: u8, is_local: bool) -> u8 {
        let upvalues = &self.states[state_idx].upvalues;
        for (i, uv) in upvalues.iter().enumerate() {
            if uv.index == index && uv.is_local == is_local {
                return i as u8;
            }
        }
        if upvalues.len() == 256 {
            self.error("Too many closure variables in function.");
            return 0;
        }
        self.states[state_idx].upvalues.push(UpvalueInfo { index, is_local });
        let count = self.states[state_idx].upvalues.len() as u32;
        unsafe {
            (*self.states[state_idx].function).upvalue_count = count;
        }
        (count - 1) as u8
    }

    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let state_idx = self.states.len() - 1;
        let (get_op, set_op, arg) = if let Some(idx) = self.resolve_local(state_idx, name.lexeme) {
            (OpCode::GetLocal, OpCode::SetLocal, idx)
        } else if let Some(idx) = self.resolve_upvalue(state_idx, name.lexeme) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, idx)
        } else {
            let idx = self.identifier_constant(name);
            (OpCode::GetGlobal, OpCode::SetGlobal, idx)
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_two(set_op, arg);
        } else {
            self.emit_two(get_op, arg);
        }
    }

    // -- declarations -------------------------------------------------

    fn declaration(&mut self) {
        if self.match_token(TokenKind::Class) {
            self.class_declaration();
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration();
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.statement();
        }

        if self.panic_mode {
            self.synchronize();
        } else if self.states.len() == 1 && self.states[0].scope_depth == 0 {
            tracing::debug!(line = self.previous.line, "compiled top-level declaration");
        }
    }

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_token(TokenKind::Equal) {
            self.expression();
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        let name = self.previous.lexeme;
        self.function_body(FunctionType::Function, name);
        self.define_variable(global);
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous;
        let name_const = self.identifier_constant(class_name);
        self.declare_variable();

        self.emit_two(OpCode::Class, name_const);
        self.define_variable(name_const);

        self.class_states.push(ClassState { has_superclass: false });

        if self.match_token(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            let superclass_name = self.previous;
            self.named_variable(superclass_name, false);
            if superclass_name.lexeme == class_name.lexeme {
                self.error("A class can't inherit from itself.");
            }
            self.begin_scope();
            self.add_local("super");
            self.mark_initialized();
            self.named_variable(class_name, false);
            self.emit_op(OpCode::Inherit);
            self.class_states.last_mut().unwrap().has_superclass = true;
        }

        self.named_variable(class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        if self.class_states.last().unwrap().has_superclass {
            self.end_scope();
        }
        self.class_states.pop();
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name_const = self.identifier_constant(self.previous);
        let method_name = self.previous.lexeme;
        let fn_type =
            if method_name == "init" { FunctionType::Initializer } else { FunctionType::Method };
        self.function_body(fn_type, method_name);
        self.emit_two(OpCode::Method, name_const);
    }

    /// Compiles a nested function/method body: pushes a fresh
    /// `FunctionState`, parses the parameter list and `{ ... }` block,
    /// then pops the state and emits `CLOSURE` (plus one `(isLocal,
    /// index)` pair per upvalue) into the *enclosing* chunk.
    fn function_body(&mut self, fn_type: FunctionType, name: &str) {
        let name_ptr = self.intern(name);
        let function_ptr = self.alloc_function();
        unsafe {
            (*function_ptr).name = Some(name_ptr);
        }
        self.states.push(FunctionState::new(fn_type, function_ptr));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        let mut arity: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                arity += 1;
                if arity > 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let param_const = self.parse_variable("Expect parameter name.");
                self.define_variable(param_const);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        unsafe {
            (*function_ptr).arity = arity.min(255) as u8;
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        self.emit_return();
        let state = self.states.pop().unwrap();
        let const_idx = self.make_constant(Value::obj(state.function as *mut Obj));
        self.emit_two(OpCode::Closure, const_idx);
        for upvalue in &state.upvalues {
            self.emit_byte(if upvalue.is_local { 1 } else { 0 });
            self.emit_byte(upvalue.index);
        }
    }

    fn end_script(&mut self) -> *mut ObjFunction {
        self.emit_return();
        self.states.pop().unwrap().function
    }

    // -- statements -------------------------------------------------

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else {
            self.expression_statement();
        }
    }

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
    }

    fn print_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        self.emit_op(OpCode::Print);
    }

    fn expression_statement(&mut self) {
        self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        self.emit_op(OpCode::Pop);
    }

    fn if_statement(&mut self) {
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();

        let else_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);

        if self.match_token(TokenKind::Else) {
            self.statement();
        }
        self.patch_jump(else_jump);
    }

    fn while_statement(&mut self) {
        let loop_start = self.chunk_len();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let exit_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.statement();
        self.emit_loop(loop_start);

        self.patch_jump(exit_jump);
        self.emit_op(OpCode::Pop);
    }

    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenKind::Semicolon) {
            // no initializer
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk_len();
        let mut exit_jump: Option<usize> = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.chunk_len();
            self.expression();
            self.emit_op(OpCode::Pop);
            self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

            self.emit_loop(loop_start);
            loop_start = increment_start;
            self.patch_jump(body_jump);
        }

        self.statement();
        self.emit_loop(loop_start);

        if let Some(exit_jump) = exit_jump {
            self.patch_jump(exit_jump);
            self.emit_op(OpCode::Pop);
        }
        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.states.len() == 1 {
            self.error("Can't return from top-level code.");
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.states.last().unwrap().fn_type == FunctionType::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    // -- expressions (Pratt parser) -------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let prefix = get_rule(self.previous.kind).prefix;
        let prefix = match prefix {
            Some(rule) => rule,
            None => {
                self.error("Expect expression.");
                return;
            }
        };
        let can_assign = precedence as u8 <= Precedence::Assignment as u8;
        prefix(self, can_assign);

        while precedence as u8 <= get_rule(self.current.kind).precedence as u8 {
            self.advance();
            let infix = get_rule(self.previous.kind).infix.unwrap();
            infix(self, can_assign);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self, _can_assign: bool) {
        let op_kind = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match op_kind {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => unreachable!("unary() invoked for non-unary token"),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let op_kind = self.previous.kind;
        let rule = get_rule(op_kind);
        self.parse_precedence(rule.precedence.one_higher());
        match op_kind {
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => {
                self.emit_op(OpCode::Less);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => {
                self.emit_op(OpCode::Greater);
                self.emit_op(OpCode::Not);
            }
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            _ => unreachable!("binary() invoked for non-binary token"),
        }
    }

    fn call(&mut self, _can_assign: bool) {
        let argc = self.argument_list();
        self.emit_two(OpCode::Call, argc);
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name_const = self.identifier_constant(self.previous);

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_two(OpCode::SetProperty, name_const);
        } else if self.match_token(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.emit_two(OpCode::Invoke, name_const);
            self.emit_byte(argc);
        } else {
            self.emit_two(OpCode::GetProperty, name_const);
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut argc: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if argc == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                argc += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        argc as u8
    }

    fn and_(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn number(&mut self, _can_assign: bool) {
        let value: f64 = self.previous.lexeme.parse().expect("scanner guarantees a valid number");
        self.emit_constant(Value::number(value));
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        let text = &lexeme[1..lexeme.len() - 1];
        let ptr = self.intern(text);
        self.emit_constant(Value::obj(ptr as *mut Obj));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::True => self.emit_op(OpCode::True),
            _ => unreachable!("literal() invoked for non-literal token"),
        }
    }

    fn variable(&mut self, can_assign: bool) {
        let name = self.previous;
        self.named_variable(name, can_assign);
    }

    fn this_(&mut self, _can_assign: bool) {
        if self.class_states.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.named_variable(synthetic_token("this"), false);
    }

    fn super_(&mut self, _can_assign: bool) {
        if self.class_states.is_empty() {
            self.error("Can't use 'super' outside of a class.");
        } else if !self.class_states.last().unwrap().has_superclass {
            self.error("Can't use 'super' in a class with no superclass.");
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name_const = self.identifier_constant(self.previous);

        self.named_variable(synthetic_token("this"), false);
        if self.match_token(TokenKind::LeftParen) {
            let argc = self.argument_list();
            self.named_variable(synthetic_token("super"), false);
            self.emit_two(OpCode::SuperInvoke, name_const);
            self.emit_byte(argc);
        } else {
            self.named_variable(synthetic_token("super"), false);
            self.emit_two(OpCode::GetSuper, name_const);
        }
    }
}

fn synthetic_token(text: &'static str) -> Token<'static> {
    Token { kind: TokenKind::Identifier, lexeme: text, line: 0 }
}

fn get_rule<'src>(kind: TokenKind) -> ParseRule<'src> {
    use TokenKind::*;
    let none = Precedence::None;
    let (prefix, infix, precedence): (Option<ParseFn<'src>>, Option<ParseFn<'src>>, Precedence) =
        match kind {
            LeftParen => (Some(Compiler::grouping), Some(Compiler::call), Precedence::Call),
            Dot => (None, Some(Compiler::dot), Precedence::Call),
            Minus => (Some(Compiler::unary), Some(Compiler::binary), Precedence::Term),
            Plus => (None, Some(Compiler::binary), Precedence::Term),
            Slash => (None, Some(Compiler::binary), Precedence::Factor),
            Star => (None, Some(Compiler::binary), Precedence::Factor),
            Bang => (Some(Compiler::unary), None, none),
            BangEqual => (None, Some(Compiler::binary), Precedence::Equality),
            EqualEqual => (None, Some(Compiler::binary), Precedence::Equality),
            Greater => (None, Some(Compiler::binary), Precedence::Comparison),
            GreaterEqual => (None, Some(Compiler::binary), Precedence::Comparison),
            Less => (None, Some(Compiler::binary), Precedence::Comparison),
            LessEqual => (None, Some(Compiler::binary), Precedence::Comparison),
            Identifier => (Some(Compiler::variable), None, none),
            String => (Some(Compiler::string), None, none),
            Number => (Some(Compiler::number), None, none),
            And => (None, Some(Compiler::and_), Precedence::And),
            False => (Some(Compiler::literal), None, none),
            Nil => (Some(Compiler::literal), None, none),
            Or => (None, Some(Compiler::or_), Precedence::Or),
            Super => (Some(Compiler::super_), None, none),
            This => (Some(Compiler::this_), None, none),
            True => (Some(Compiler::literal), None, none),
            _ => (None, None, none),
        };
    ParseRule { prefix, infix, precedence }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_ok(source: &str) -> *mut ObjFunction {
        let heap = Heap::new(1024 * 1024);
        compile(source, &heap, false, 2).expect("expected successful compile")
    }

    fn compile_err(source: &str) -> Vec<CompileError> {
        let heap = Heap::new(1024 * 1024);
        compile(source, &heap, false, 2).expect_err("expected compile error")
    }

    #[test]
    fn compiles_trivial_print_statement() {
        let f = compile_ok("print 1 + 2;");
        let chunk_len = unsafe { (*f).chunk.code.len() };
        assert!(chunk_len > 0);
    }

    #[test]
    fn reports_redeclared_local_in_same_scope() {
        let errors = compile_err("{ var a; var a; }");
        assert!(errors.iter().any(|e| e.message.contains("Already a variable")));
    }

    #[test]
    fn reports_top_level_return() {
        let errors = compile_err("return 1;");
        assert!(errors.iter().any(|e| e.message.contains("top-level")));
    }

    #[test]
    fn compiles_closures_and_classes_without_error() {
        let source = "fun outer(){ var x=1; fun inner(){ x=x+1; print x; } return inner; }";
        let _ = compile_ok(source);
        let source = "class A { greet(){ print \"hi\"; } } class B < A { greet(){ super.greet(); } }";
        let _ = compile_ok(source);
    }

    #[test]
    fn this_outside_class_is_a_compile_error() {
        let errors = compile_err("fun f() { print this; }");
        assert!(errors.iter().any(|e| e.message.contains("'this'")));
    }
}
