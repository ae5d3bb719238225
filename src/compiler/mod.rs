//! The front end: a single-pass Pratt parser that emits bytecode
//! directly into a `Chunk` as it parses, rather than building an
//! intermediate AST (see `tree_walker` for the alternative evaluator
//! that does build one).

pub mod lexer;

use std::rc::Rc;

use crate::common::chunk::{Chunk, OpCode};
use crate::common::object::{LoxFunction, ObjKind};
use crate::common::source::Source;
use crate::common::table::Table;
use crate::common::token::{Token, TokenKind};
use crate::common::value::Value;
use crate::diagnostics::{CompileError, CompileErrors};
use crate::gc::{Gc, GcRoots, Heap};
use lexer::Lexer;

#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
#[repr(u8)]
enum Precedence {
    None,
    Assignment, // =
    Or,         // or
    And,        // and
    Equality,   // == !=
    Comparison, // < > <= >=
    Term,       // + -
    Factor,     // * /
    Unary,      // ! -
    Call,       // . ()
    Primary,
}

impl Precedence {
    fn next(self) -> Precedence {
        use Precedence::*;
        match self {
            None => Assignment,
            Assignment => Or,
            Or => And,
            And => Equality,
            Equality => Comparison,
            Comparison => Term,
            Term => Factor,
            Factor => Unary,
            Unary => Call,
            Call | Primary => Primary,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum FunctionKind {
    Script,
    Function,
    Method,
    Initializer,
}

struct Local<'src> {
    name: &'src str,
    depth: i32,
    is_captured: bool,
}

struct UpvalueInfo {
    index: u8,
    is_local: bool,
}

/// One function's worth of in-progress compilation state: its
/// not-yet-finalized chunk, its local-variable slots, and the
/// upvalues it has resolved so far. Compiling a nested `fun` pushes a
/// fresh `CompilerState`; finishing the body pops it and turns it
/// into a heap-allocated `LoxFunction`.
struct CompilerState<'src> {
    kind: FunctionKind,
    chunk: Chunk,
    arity: u8,
    name: Option<Gc>,
    locals: Vec<Local<'src>>,
    scope_depth: i32,
    upvalues: Vec<UpvalueInfo>,
}

impl<'src> CompilerState<'src> {
    fn new(kind: FunctionKind, name: Option<Gc>) -> CompilerState<'src> {
        // Slot 0 is reserved for the callee itself (methods see their
        // receiver there as `this`; plain functions never name it).
        let slot0_name = if matches!(kind, FunctionKind::Method | FunctionKind::Initializer) {
            "this"
        } else {
            ""
        };
        CompilerState {
            kind,
            chunk: Chunk::new(),
            arity: 0,
            name,
            locals: vec![Local {
                name: slot0_name,
                depth: 0,
                is_captured: false,
            }],
            scope_depth: 0,
            upvalues: Vec::new(),
        }
    }
}

struct ClassInfo {
    has_superclass: bool,
}

struct Parser<'src, 'heap> {
    lexer: Lexer<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    heap: &'heap mut Heap,
    compilers: Vec<CompilerState<'src>>,
    classes: Vec<ClassInfo>,
}

impl<'src, 'heap> Parser<'src, 'heap> {
    fn new(source: &'src str, heap: &'heap mut Heap) -> Parser<'src, 'heap> {
        let mut lexer = Lexer::new(source);
        let first = lexer.next_token();
        Parser {
            lexer,
            current: first,
            previous: first,
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            heap,
            compilers: vec![CompilerState::new(FunctionKind::Script, None)],
            classes: Vec::new(),
        }
    }

    // ---- token stream -------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.lexer.next_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            self.error_at_current(self.current.lexeme);
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

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
        }
    }

    fn error_at_current(&mut self, message: &str) {
        let token = self.current;
        self.error_at(token, message);
    }

    fn error(&mut self, message: &str) {
        let token = self.previous;
        self.error_at(token, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let err = if token.kind == TokenKind::Eof {
            CompileError::at_eof(token.line, message)
        } else if token.kind == TokenKind::Error {
            CompileError::new(token.line, "", message)
        } else {
            CompileError::new(token.line, token.lexeme, message)
        };
        self.errors.push(err);
    }

    /// Re-synchronizes at the next statement boundary after an error,
    /// so one malformed statement doesn't cascade into spurious
    /// follow-on diagnostics.
    fn synchronize(&mut self) {
        self.panic_mode = false;
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
                _ => self.advance(),
            }
        }
    }

    // ---- heap plumbing --------------------------------------------------

    fn maybe_collect(&mut self) {
        if !self.heap.should_collect() {
            return;
        }
        let extra: Vec<Gc> = self
            .compilers
            .iter()
            .flat_map(|c| c.chunk.constants.iter())
            .filter_map(|v| v.as_gc())
            .collect();
        let empty_globals: Table<Value> = Table::new();
        self.heap.collect(GcRoots {
            stack: &[],
            frame_closures: &[],
            globals: &empty_globals,
            open_upvalues: &[],
            extra: &extra,
        });
    }

    fn intern(&mut self, text: &str) -> Gc {
        self.maybe_collect();
        self.heap.intern(text)
    }

    // ---- chunk emission -------------------------------------------------

    fn current_mut(&mut self) -> &mut CompilerState<'src> {
        self.compilers.last_mut().expect("compiler stack is never empty")
    }

    fn current(&self) -> &CompilerState<'src> {
        self.compilers.last().expect("compiler stack is never empty")
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.current_mut().chunk.write_byte(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op as u8);
    }

    fn emit_bytes(&mut self, op: OpCode, operand: u8) {
        self.emit_op(op);
        self.emit_byte(operand);
    }

    fn emit_jump(&mut self, op: OpCode) -> usize {
        let line = self.previous.line;
        self.current_mut().chunk.emit_jump(op, line)
    }

    fn patch_jump(&mut self, offset: usize) {
        self.current_mut().chunk.patch_jump(offset);
    }

    fn emit_loop(&mut self, loop_start: usize) {
        let line = self.previous.line;
        self.current_mut().chunk.emit_loop(loop_start, line);
    }

    fn emit_constant(&mut self, value: Value) {
        let idx = self.current_mut().chunk.add_constant(value);
        self.emit_bytes(OpCode::Constant, idx);
    }

    fn emit_return(&mut self) {
        if self.current().kind == FunctionKind::Initializer {
            self.emit_bytes(OpCode::GetLocal, 0);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.emit_op(OpCode::Return);
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let gc = self.intern(name);
        self.current_mut().chunk.add_constant(Value::Obj(gc))
    }

    // ---- scopes, locals, upvalues ---------------------------------------

    fn begin_scope(&mut self) {
        self.current_mut().scope_depth += 1;
    }

    fn end_scope(&mut self) {
        self.current_mut().scope_depth -= 1;
        let depth = self.current().scope_depth;
        while let Some(local) = self.current().locals.last() {
            if local.depth <= depth {
                break;
            }
            let captured = local.is_captured;
            self.current_mut().locals.pop();
            if captured {
                self.emit_op(OpCode::CloseUpvalue);
            } else {
                self.emit_op(OpCode::Pop);
            }
        }
    }

    fn add_local(&mut self, name: &'src str) {
        if self.current().locals.len() >= u8::MAX as usize + 1 {
            self.error("Too many local variables in function.");
            return;
        }
        self.current_mut().locals.push(Local {
            name,
            depth: -1,
            is_captured: false,
        });
    }

    fn declare_variable(&mut self, name: &'src str) {
        if self.current().scope_depth == 0 {
            return;
        }
        let depth = self.current().scope_depth;
        let redeclared = self
            .current()
            .locals
            .iter()
            .rev()
            .take_while(|l| l.depth == -1 || l.depth == depth)
            .any(|l| l.depth == depth && l.name == name);
        if redeclared {
            self.error("Already a variable with this name in this scope.");
            return;
        }
        self.add_local(name);
    }

    fn mark_initialized(&mut self) {
        if self.current().scope_depth == 0 {
            return;
        }
        let depth = self.current().scope_depth;
        if let Some(local) = self.current_mut().locals.last_mut() {
            local.depth = depth;
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.current().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_bytes(OpCode::DefineGlobal, global);
    }

    /// Parses a variable name and declares it; returns the constant
    /// pool index to use with `DEFINE_GLOBAL` (meaningless for
    /// locals, where `define_variable` just marks the slot
    /// initialized).
    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        let name = self.previous.lexeme;
        self.declare_variable(name);
        if self.current().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(name)
    }

    fn resolve_local(&mut self, idx: usize, name: &str) -> Option<u8> {
        let mut found: Option<(usize, bool)> = None;
        {
            let locals = &self.compilers[idx].locals;
            for (i, local) in locals.iter().enumerate().rev() {
                if local.name == name {
                    found = Some((i, local.depth == -1));
                    break;
                }
            }
        }
        match found {
            Some((i, true)) => {
                self.error("Can't read local variable in its own initializer.");
                Some(i as u8)
            }
            Some((i, false)) => Some(i as u8),
            None => None,
        }
    }

    fn add_upvalue(&mut self, idx: usize, index: u8, is_local: bool) -> u8 {
        {
            let upvalues = &self.compilers[idx].upvalues;
            for (i, uv) in upvalues.iter().enumerate() {
                if uv.index == index && uv.is_local == is_local {
                    return i as u8;
                }
            }
        }
        if self.compilers[idx].upvalues.len() >= u8::MAX as usize + 1 {
            self.error("Too many closure variables in function.");
            return 0;
        }
        self.compilers[idx].upvalues.push(UpvalueInfo { index, is_local });
        (self.compilers[idx].upvalues.len() - 1) as u8
    }

    fn resolve_upvalue(&mut self, idx: usize, name: &str) -> Option<u8> {
        if idx == 0 {
            return None;
        }
        let enclosing = idx - 1;
        if let Some(local) = self.resolve_local(enclosing, name) {
            self.compilers[enclosing].locals[local as usize].is_captured = true;
            return Some(self.add_upvalue(idx, local, true));
        }
        if let Some(upvalue) = self.resolve_upvalue(enclosing, name) {
            return Some(self.add_upvalue(idx, upvalue, false));
        }
        None
    }

    fn named_variable(&mut self, name: &str, can_assign: bool) {
        let idx = self.compilers.len() - 1;
        let (get_op, set_op, slot) = if let Some(local) = self.resolve_local(idx, name) {
            (OpCode::GetLocal, OpCode::SetLocal, local)
        } else if let Some(up) = self.resolve_upvalue(idx, name) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, up)
        } else {
            let global = self.identifier_constant(name);
            (OpCode::GetGlobal, OpCode::SetGlobal, global)
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_bytes(set_op, slot);
        } else {
            self.emit_bytes(get_op, slot);
        }
    }

    // ---- Pratt parser -----------------------------------------------------

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.advance();
        let can_assign = precedence <= Precedence::Assignment;
        if !self.prefix_rule(self.previous.kind, can_assign) {
            self.error("Expect expression.");
            return;
        }

        while precedence <= self.infix_precedence(self.current.kind) {
            self.advance();
            self.infix_rule(self.previous.kind, can_assign);
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Assignment);
    }

    fn prefix_rule(&mut self, kind: TokenKind, can_assign: bool) -> bool {
        use TokenKind::*;
        match kind {
            LeftParen => self.grouping(),
            Minus | Bang => self.unary(),
            Number => self.number(),
            String => self.string_literal(),
            Nil | True | False => self.literal(),
            Identifier => self.named_variable_from_previous(can_assign),
            This => self.this_expr(),
            Super => self.super_expr(),
            _ => return false,
        }
        true
    }

    fn infix_precedence(&self, kind: TokenKind) -> Precedence {
        use Precedence::*;
        use TokenKind::*;
        match kind {
            Minus | Plus => Term,
            Slash | Star => Factor,
            BangEqual | EqualEqual => Equality,
            Greater | GreaterEqual | Less | LessEqual => Comparison,
            And => Precedence::And,
            Or => Precedence::Or,
            LeftParen => Call,
            Dot => Call,
            _ => None,
        }
    }

    fn infix_rule(&mut self, kind: TokenKind, can_assign: bool) {
        use TokenKind::*;
        match kind {
            Minus | Plus | Slash | Star | BangEqual | EqualEqual | Greater | GreaterEqual
            | Less | LessEqual => self.binary(),
            And => self.and_expr(),
            Or => self.or_expr(),
            LeftParen => self.call_expr(),
            Dot => self.dot_expr(can_assign),
            _ => unreachable!("not an infix operator: {kind:?}"),
        }
    }

    fn grouping(&mut self) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn unary(&mut self) {
        let op = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match op {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => unreachable!(),
        }
    }

    fn binary(&mut self) {
        let op = self.previous.kind;
        let precedence = self.infix_precedence(op);
        self.parse_precedence(precedence.next());
        match op {
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::BangEqual => {
                self.emit_op(OpCode::Equal);
                self.emit_op(OpCode::Not);
            }
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
            _ => unreachable!(),
        }
    }

    fn and_expr(&mut self) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_expr(&mut self) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    fn number(&mut self) {
        let value: f64 = self.previous.lexeme.parse().expect("scanner only emits valid numbers");
        self.emit_constant(Value::Number(value));
    }

    fn string_literal(&mut self) {
        let lexeme = self.previous.lexeme;
        let text = &lexeme[1..lexeme.len() - 1];
        let gc = self.intern(text);
        self.emit_constant(Value::Obj(gc));
    }

    fn literal(&mut self) {
        match self.previous.kind {
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::False => self.emit_op(OpCode::False),
            _ => unreachable!(),
        }
    }

    fn named_variable_from_previous(&mut self, can_assign: bool) {
        let name = self.previous.lexeme;
        self.named_variable(name, can_assign);
    }

    fn this_expr(&mut self) {
        if self.classes.is_empty() {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.named_variable("this", false);
    }

    fn super_expr(&mut self) {
        if self.classes.is_empty() {
            self.error("Can't use 'super' outside of a class.");
        } else if !self.classes.last().unwrap().has_superclass {
            self.error("Can't use 'super' in a class with no superclass.");
        }

        self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
        self.consume(TokenKind::Identifier, "Expect superclass method name.");
        let name = self.previous.lexeme;
        let name_idx = self.identifier_constant(name);

        self.named_variable("this", false);
        if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.named_variable("super", false);
            self.emit_bytes(OpCode::SuperInvoke, name_idx);
            self.emit_byte(arg_count);
        } else {
            self.named_variable("super", false);
            self.emit_bytes(OpCode::GetSuper, name_idx);
        }
    }

    fn call_expr(&mut self) {
        let arg_count = self.argument_list();
        self.emit_bytes(OpCode::Call, arg_count);
    }

    fn dot_expr(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.previous.lexeme;
        let name_idx = self.identifier_constant(name);

        if can_assign && self.match_token(TokenKind::Equal) {
            self.expression();
            self.emit_bytes(OpCode::SetProperty, name_idx);
        } else if self.match_token(TokenKind::LeftParen) {
            let arg_count = self.argument_list();
            self.emit_bytes(OpCode::Invoke, name_idx);
            self.emit_byte(arg_count);
        } else {
            self.emit_bytes(OpCode::GetProperty, name_idx);
        }
    }

    fn argument_list(&mut self) -> u8 {
        let mut count: u32 = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.expression();
                if count == 255 {
                    self.error("Can't have more than 255 arguments.");
                }
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        count as u8
    }

    // ---- statements -------------------------------------------------------

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
        }
    }

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
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
        let loop_start = self.current().chunk.code.len();
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

    /// Desugars into a synthetic block containing the initializer,
    /// followed by a `while` loop whose body is the original body with
    /// the step expression appended — see the clox book's
    /// "for-loop desugaring equivalence" property in §8.
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

        let mut loop_start = self.current().chunk.code.len();
        let mut exit_jump: Option<usize> = None;

        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            let body_jump = self.emit_jump(OpCode::Jump);
            let increment_start = self.current().chunk.code.len();
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
        if self.current().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }

        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            if self.current().kind == FunctionKind::Initializer {
                self.error("Can't return a value from an initializer.");
            }
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
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
        let name = {
            self.consume(TokenKind::Identifier, "Expect function name.");
            self.previous.lexeme
        };
        self.declare_variable(name);
        let global = if self.current().scope_depth > 0 {
            0
        } else {
            self.identifier_constant(name)
        };
        self.mark_initialized();
        self.function(FunctionKind::Function, name);
        self.define_variable(global);
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous.lexeme;
        let name_constant = self.identifier_constant(class_name);
        self.declare_variable(class_name);

        self.emit_bytes(OpCode::Class, name_constant);
        self.define_variable(name_constant);

        self.classes.push(ClassInfo { has_superclass: false });

        let mut has_superclass = false;
        if self.match_token(TokenKind::Less) {
            self.consume(TokenKind::Identifier, "Expect superclass name.");
            let super_name = self.previous.lexeme;
            if super_name == class_name {
                self.error("A class can't inherit from itself.");
            }
            self.named_variable(super_name, false);

            self.begin_scope();
            self.add_local("super");
            self.mark_initialized();

            self.named_variable(class_name, false);
            self.emit_op(OpCode::Inherit);
            has_superclass = true;
            self.classes.last_mut().unwrap().has_superclass = true;
        }

        self.named_variable(class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);

        if has_superclass {
            self.end_scope();
        }
        self.classes.pop();
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let name = self.previous.lexeme;
        let name_constant = self.identifier_constant(name);
        let kind = if name == "init" {
            FunctionKind::Initializer
        } else {
            FunctionKind::Method
        };
        self.function(kind, name);
        self.emit_bytes(OpCode::Method, name_constant);
    }

    /// Compiles one function body (top-level `fun`, method, or
    /// initializer) into its own chunk, then wraps it in a
    /// `LoxFunction` and emits a `CLOSURE` instruction in the
    /// enclosing chunk that captures the upvalues it resolved.
    fn function(&mut self, kind: FunctionKind, name: &str) {
        let name_gc = self.intern(name);
        self.compilers.push(CompilerState::new(kind, Some(name_gc)));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                let arity = self.current().arity;
                if arity == 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                self.current_mut().arity += 1;
                let param = self.parse_variable("Expect parameter name.");
                self.define_variable(param);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let finished = self.end_function();
        let idx = self.current_mut().chunk.add_constant(Value::Obj(finished));
        self.emit_bytes(OpCode::Closure, idx);
    }

    /// Pops the current `CompilerState`, emits the implicit return,
    /// allocates the finished `LoxFunction`, and writes its upvalue
    /// capture operands right after the `CLOSURE` opcode in the
    /// (now again current) enclosing chunk.
    fn end_function(&mut self) -> Gc {
        self.emit_return();
        let finished = self.compilers.pop().expect("pushed a compiler for this function");

        if std::env::var_os("LOXCRAFT_TRACE").is_some() {
            let name = finished.name.map(|n| n.as_str().to_string());
            crate::debug::disassemble_chunk(&finished.chunk, name.as_deref().unwrap_or("<fn>"));
        }

        let function = LoxFunction {
            arity: finished.arity,
            upvalue_count: finished.upvalues.len(),
            chunk: finished.chunk,
            name: finished.name,
        };
        let gc = self.heap.allocate(ObjKind::Function(function));

        for uv in &finished.upvalues {
            self.emit_byte(if uv.is_local { 1 } else { 0 });
            self.emit_byte(uv.index);
        }

        gc
    }

    /// Finishes the implicit top-level script function.
    fn end_script(&mut self) -> Gc {
        self.emit_return();
        let finished = self.compilers.pop().expect("script compiler");
        debug_assert!(self.compilers.is_empty());

        if std::env::var_os("LOXCRAFT_TRACE").is_some() {
            crate::debug::disassemble_chunk(&finished.chunk, "script");
        }

        let function = LoxFunction {
            arity: 0,
            upvalue_count: finished.upvalues.len(),
            chunk: finished.chunk,
            name: None,
        };
        self.heap.allocate(ObjKind::Function(function))
    }
}

/// Compiles `source`'s contents into the implicit top-level script
/// function, or returns every compile error collected along the way.
pub fn compile(source: Rc<Source>, heap: &mut Heap) -> Result<Gc, CompileErrors> {
    let mut parser = Parser::new(&source.contents, heap);

    while !parser.check(TokenKind::Eof) {
        parser.declaration();
    }
    parser.consume(TokenKind::Eof, "Expect end of expression.");

    let function = parser.end_script();
    if parser.had_error {
        Err(CompileErrors(parser.errors))
    } else {
        Ok(function)
    }
}
