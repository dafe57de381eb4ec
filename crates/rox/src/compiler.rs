//! Single-pass bytecode compiler: a Pratt parser that emits instructions
//! as it goes.
//!
//! There is no AST. The parser pulls tokens from the scanner one at a time
//! and writes bytecode straight into the chunk of the function being
//! compiled. Nested function declarations push a fresh compile context onto
//! a stack; the enclosing context resumes when the inner function ends and
//! receives the finished function as a constant.
//!
//! Error recovery is panic-mode: the first error in a statement is
//! reported, everything after it is swallowed until a statement boundary,
//! and compilation continues so later errors still surface. A compile with
//! any error reports failure at the end.

use crate::bytecode::{Chunk, OpCode};
use crate::error::{CompileErrors, Error, Result};
use crate::heap::Heap;
use crate::object::{Function, Obj};
use crate::scanner::{Scanner, Token, TokenKind};
use crate::value::Value;

/// Locals per function, including the reserved slot 0.
const MAX_LOCALS: usize = 256;
/// Captured variables per function.
const MAX_UPVALUES: usize = 256;

/// Compile `source` into the top-level script function. Strings for
/// identifiers and literals are interned into `heap` as they are parsed.
pub(crate) fn compile(source: &str, heap: &mut Heap) -> Result<Function> {
    let mut parser = Parser::new(source, heap);
    parser.advance();
    while !parser.match_token(TokenKind::Eof) {
        parser.declaration();
    }
    parser.finish()
}

/// Binding powers, weakest first. The parser only continues an expression
/// while the next operator binds at least as tightly as the current level.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
enum Precedence {
    None,
    Comma,
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
    /// The next-tighter level, used for left-associative binary operators.
    fn next(self) -> Precedence {
        match self {
            Precedence::None => Precedence::Comma,
            Precedence::Comma => Precedence::Assignment,
            Precedence::Assignment => Precedence::Or,
            Precedence::Or => Precedence::And,
            Precedence::And => Precedence::Equality,
            Precedence::Equality => Precedence::Comparison,
            Precedence::Comparison => Precedence::Term,
            Precedence::Term => Precedence::Factor,
            Precedence::Factor => Precedence::Unary,
            Precedence::Unary => Precedence::Call,
            Precedence::Call | Precedence::Primary => Precedence::Primary,
        }
    }
}

type ParseFn<'src, 'h> = fn(&mut Parser<'src, 'h>, bool);

struct ParseRule<'src, 'h> {
    prefix: Option<ParseFn<'src, 'h>>,
    infix: Option<ParseFn<'src, 'h>>,
    precedence: Precedence,
}

/// The static token → (prefix, infix, precedence) table.
fn rule_for<'src, 'h>(kind: TokenKind) -> ParseRule<'src, 'h> {
    use TokenKind::*;
    let (prefix, infix, precedence): (
        Option<ParseFn<'src, 'h>>,
        Option<ParseFn<'src, 'h>>,
        Precedence,
    ) = match kind {
        LeftParen => (Some(Parser::grouping), Some(Parser::call), Precedence::Call),
        Dot => (None, Some(Parser::dot), Precedence::Call),
        Minus => (Some(Parser::unary), Some(Parser::binary), Precedence::Term),
        Plus => (None, Some(Parser::binary), Precedence::Term),
        Slash | Star => (None, Some(Parser::binary), Precedence::Factor),
        Bang => (Some(Parser::unary), None, Precedence::None),
        BangEqual | EqualEqual => (None, Some(Parser::binary), Precedence::Equality),
        Greater | GreaterEqual | Less | LessEqual => {
            (None, Some(Parser::binary), Precedence::Comparison)
        }
        Identifier => (Some(Parser::variable), None, Precedence::None),
        String => (Some(Parser::string), None, Precedence::None),
        Number => (Some(Parser::number), None, Precedence::None),
        And => (None, Some(Parser::and_op), Precedence::And),
        Or => (None, Some(Parser::or_op), Precedence::Or),
        True | False | Nil => (Some(Parser::literal), None, Precedence::None),
        This => (Some(Parser::this_), None, Precedence::None),
        Question => (None, Some(Parser::ternary), Precedence::Assignment),
        Comma => (None, Some(Parser::comma), Precedence::Comma),
        _ => (None, None, Precedence::None),
    };
    ParseRule {
        prefix,
        infix,
        precedence,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FunctionKind {
    Script,
    Function,
    Method,
}

/// One local variable slot. `depth == -1` marks a declared-but-uninitialized
/// local, which is how reads inside a variable's own initializer are caught.
struct Local<'src> {
    name: &'src str,
    depth: i32,
    captured: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct UpvalueDesc {
    index: u8,
    is_local: bool,
}

/// Per-function compile state. The outermost context compiles the script
/// itself; each `fun`/method declaration pushes another.
struct FnContext<'src> {
    function: Function,
    kind: FunctionKind,
    locals: Vec<Local<'src>>,
    scope_depth: i32,
    upvalues: Vec<UpvalueDesc>,
}

impl<'src> FnContext<'src> {
    fn new(kind: FunctionKind, function: Function) -> Self {
        // Slot 0 belongs to the callee value itself; in methods it is
        // addressable as `this`.
        let reserved = Local {
            name: if kind == FunctionKind::Method {
                "this"
            } else {
                ""
            },
            depth: 0,
            captured: false,
        };
        Self {
            function,
            kind,
            locals: vec![reserved],
            scope_depth: 0,
            upvalues: Vec::new(),
        }
    }
}

struct Parser<'src, 'h> {
    scanner: Scanner<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    heap: &'h mut Heap,
    contexts: Vec<FnContext<'src>>,
    /// Depth of nested class declarations; `this` is legal when non-zero.
    class_depth: usize,
    errors: Vec<String>,
    had_error: bool,
    panic_mode: bool,
}

impl<'src, 'h> Parser<'src, 'h> {
    fn new(source: &'src str, heap: &'h mut Heap) -> Self {
        Self {
            scanner: Scanner::new(source),
            current: Token::synthetic(),
            previous: Token::synthetic(),
            heap,
            contexts: vec![FnContext::new(FunctionKind::Script, Function::new(None))],
            class_depth: 0,
            errors: Vec::new(),
            had_error: false,
            panic_mode: false,
        }
    }

    fn finish(mut self) -> Result<Function> {
        let (function, _) = self.end_context();
        if self.had_error {
            Err(Error::Compile(CompileErrors(self.errors)))
        } else {
            Ok(function)
        }
    }

    // -----------------------------------------------------------------------
    // Token plumbing
    // -----------------------------------------------------------------------

    fn advance(&mut self) {
        self.previous = self.current;
        loop {
            self.current = self.scanner.scan_token();
            if self.current.kind != TokenKind::Error {
                break;
            }
            let message = self.current.lexeme;
            self.error_at_current(message);
        }
    }

    fn consume(&mut self, kind: TokenKind, message: &str) {
        if self.current.kind == kind {
            self.advance();
        } else {
            self.error_at_current(message);
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

    fn error(&mut self, message: &str) {
        self.error_at(self.previous, message);
    }

    fn error_at_current(&mut self, message: &str) {
        self.error_at(self.current, message);
    }

    fn error_at(&mut self, token: Token<'src>, message: &str) {
        if self.panic_mode {
            return;
        }
        self.panic_mode = true;
        self.had_error = true;
        let location = match token.kind {
            TokenKind::Eof => " at end".to_string(),
            // Lex errors already carry their message as the lexeme.
            TokenKind::Error => String::new(),
            _ => format!(" at '{}'", token.lexeme),
        };
        self.errors
            .push(format!("[line {}] Error{}: {}", token.line, location, message));
    }

    /// Leave panic mode by skipping to the next statement boundary.
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
                _ => {}
            }
            self.advance();
        }
    }

    // -----------------------------------------------------------------------
    // Emission
    // -----------------------------------------------------------------------

    fn ctx(&self) -> &FnContext<'src> {
        self.contexts.last().unwrap()
    }

    fn ctx_mut(&mut self) -> &mut FnContext<'src> {
        self.contexts.last_mut().unwrap()
    }

    fn chunk_mut(&mut self) -> &mut Chunk {
        &mut self.ctx_mut().function.chunk
    }

    fn chunk_len(&self) -> usize {
        self.ctx().function.chunk.code.len()
    }

    fn emit_byte(&mut self, byte: u8) {
        let line = self.previous.line;
        self.chunk_mut().write(byte, line);
    }

    fn emit_op(&mut self, op: OpCode) {
        self.emit_byte(op.into());
    }

    fn emit_ops(&mut self, first: OpCode, second: OpCode) {
        self.emit_op(first);
        self.emit_op(second);
    }

    fn emit_op_byte(&mut self, op: OpCode, byte: u8) {
        self.emit_op(op);
        self.emit_byte(byte);
    }

    fn emit_return(&mut self) {
        self.emit_ops(OpCode::Nil, OpCode::Return);
    }

    fn make_constant(&mut self, value: Value) -> u8 {
        let index = self.chunk_mut().add_constant(value);
        if index > u8::MAX as usize {
            self.error("Too many constants in one chunk.");
            return 0;
        }
        index as u8
    }

    fn emit_constant(&mut self, value: Value) {
        let constant = self.make_constant(value);
        self.emit_op_byte(OpCode::Constant, constant);
    }

    /// Emit a forward jump with a placeholder offset; returns the operand
    /// position for `patch_jump`.
    fn emit_jump(&mut self, op: OpCode) -> usize {
        self.emit_op(op);
        self.emit_byte(0xff);
        self.emit_byte(0xff);
        self.chunk_len() - 2
    }

    /// Point a previously emitted jump at the current write position.
    fn patch_jump(&mut self, operand: usize) {
        // The offset is measured from just past the operand bytes.
        let jump = self.chunk_len() - operand - 2;
        if jump > u16::MAX as usize {
            self.error("Too much code to jump over.");
            return;
        }
        let code = &mut self.chunk_mut().code;
        code[operand] = (jump >> 8) as u8;
        code[operand + 1] = jump as u8;
    }

    /// Emit a backward jump to `loop_start`.
    fn emit_loop(&mut self, loop_start: usize) {
        self.emit_op(OpCode::JumpBack);
        let offset = self.chunk_len() - loop_start + 2;
        if offset > u16::MAX as usize {
            self.error("Loop body too large.");
        }
        self.emit_byte((offset >> 8) as u8);
        self.emit_byte(offset as u8);
    }

    // -----------------------------------------------------------------------
    // Declarations
    // -----------------------------------------------------------------------

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

    fn var_declaration(&mut self) {
        let global = self.parse_variable("Expect variable name.");
        if self.match_token(TokenKind::Equal) {
            self.parse_precedence(Precedence::Assignment);
        } else {
            self.emit_op(OpCode::Nil);
        }
        self.consume(
            TokenKind::Semicolon,
            "Expect ';' after variable declaration.",
        );
        self.define_variable(global);
    }

    fn fun_declaration(&mut self) {
        let global = self.parse_variable("Expect function name.");
        self.mark_initialized();
        self.function(FunctionKind::Function);
        self.define_variable(global);
    }

    fn class_declaration(&mut self) {
        self.consume(TokenKind::Identifier, "Expect class name.");
        let class_name = self.previous;
        let name_constant = self.identifier_constant(self.previous.lexeme);
        self.declare_variable();
        self.emit_op_byte(OpCode::Class, name_constant);
        self.define_variable(name_constant);

        self.class_depth += 1;
        // Keep the class on the stack while its methods bind to it.
        self.named_variable(class_name, false);
        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.method();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");
        self.emit_op(OpCode::Pop);
        self.class_depth -= 1;
    }

    fn method(&mut self) {
        self.consume(TokenKind::Identifier, "Expect method name.");
        let constant = self.identifier_constant(self.previous.lexeme);
        self.function(FunctionKind::Method);
        self.emit_op_byte(OpCode::Method, constant);
    }

    /// Compile a function body in a fresh context, then emit the closure
    /// instruction with one `(is_local, index)` pair per captured variable.
    fn function(&mut self, kind: FunctionKind) {
        let name = self.heap.intern(self.previous.lexeme);
        self.contexts
            .push(FnContext::new(kind, Function::new(Some(name))));
        self.begin_scope();

        self.consume(TokenKind::LeftParen, "Expect '(' after function name.");
        if !self.check(TokenKind::RightParen) {
            loop {
                self.ctx_mut().function.arity += 1;
                if self.ctx().function.arity > 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let constant = self.parse_variable("Expect parameter name.");
                self.define_variable(constant);
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, "Expect '{' before function body.");
        self.block();

        let (function, upvalues) = self.end_context();
        let function_ref = self.heap.alloc(Obj::Function(function));
        let constant = self.make_constant(Value::Obj(function_ref));
        self.emit_op_byte(OpCode::Closure, constant);
        for upvalue in upvalues {
            self.emit_byte(u8::from(upvalue.is_local));
            self.emit_byte(upvalue.index);
        }
    }

    /// Seal the innermost context: emit the implicit return, record the
    /// final upvalue count, and hand the finished function back.
    fn end_context(&mut self) -> (Function, Vec<UpvalueDesc>) {
        self.emit_return();
        let context = self.contexts.pop().unwrap();
        let FnContext {
            mut function,
            upvalues,
            ..
        } = context;
        function.upvalue_count = upvalues.len();

        #[cfg(feature = "print-code")]
        if !self.had_error {
            let name = match function.name {
                Some(s) => self.heap.str_text(s).to_string(),
                None => "<script>".to_string(),
            };
            eprintln!(
                "{}",
                crate::debug::disassemble_chunk(&function.chunk, &name, self.heap)
            );
        }

        (function, upvalues)
    }

    // -----------------------------------------------------------------------
    // Variables and scopes
    // -----------------------------------------------------------------------

    /// Consume an identifier. In a local scope, declare it and return a
    /// dummy constant; at top level, intern the name into the constant pool.
    fn parse_variable(&mut self, message: &str) -> u8 {
        self.consume(TokenKind::Identifier, message);
        self.declare_variable();
        if self.ctx().scope_depth > 0 {
            return 0;
        }
        self.identifier_constant(self.previous.lexeme)
    }

    fn identifier_constant(&mut self, name: &str) -> u8 {
        let s = self.heap.intern(name);
        self.make_constant(Value::Obj(s.into()))
    }

    fn declare_variable(&mut self) {
        if self.ctx().scope_depth == 0 {
            return;
        }
        let name = self.previous.lexeme;
        let context = self.ctx();
        let mut duplicate = false;
        for local in context.locals.iter().rev() {
            if local.depth != -1 && local.depth < context.scope_depth {
                break;
            }
            if local.name == name {
                duplicate = true;
                break;
            }
        }
        if duplicate {
            self.error("Already a variable with this name in this scope.");
        }
        self.add_local(name);
    }

    fn add_local(&mut self, name: &'src str) {
        if self.ctx().locals.len() == MAX_LOCALS {
            self.error("Too many local variables in function.");
            return;
        }
        self.ctx_mut().locals.push(Local {
            name,
            depth: -1,
            captured: false,
        });
    }

    fn mark_initialized(&mut self) {
        if self.ctx().scope_depth == 0 {
            return;
        }
        let depth = self.ctx().scope_depth;
        if let Some(local) = self.ctx_mut().locals.last_mut() {
            local.depth = depth;
        }
    }

    fn define_variable(&mut self, global: u8) {
        if self.ctx().scope_depth > 0 {
            self.mark_initialized();
            return;
        }
        self.emit_op_byte(OpCode::DefineGlobal, global);
    }

    fn begin_scope(&mut self) {
        self.ctx_mut().scope_depth += 1;
    }

    /// Pop the scope's locals. Captured ones close their upvalue instead of
    /// a plain pop so closures keep seeing the binding.
    fn end_scope(&mut self) {
        self.ctx_mut().scope_depth -= 1;
        loop {
            let context = self.ctx();
            let Some(local) = context.locals.last() else {
                break;
            };
            if local.depth <= context.scope_depth {
                break;
            }
            let captured = local.captured;
            self.emit_op(if captured {
                OpCode::CloseUpvalue
            } else {
                OpCode::Pop
            });
            self.ctx_mut().locals.pop();
        }
    }

    /// Find `name` among the context's locals, innermost first.
    fn resolve_local(&mut self, ctx_index: usize, name: &str) -> Option<u8> {
        let found = self.contexts[ctx_index]
            .locals
            .iter()
            .enumerate()
            .rev()
            .find(|(_, local)| local.name == name)
            .map(|(slot, local)| (slot, local.depth));
        if let Some((slot, depth)) = found {
            if depth == -1 {
                self.error("Can't read local variable in its own initializer.");
            }
            return Some(slot as u8);
        }
        None
    }

    /// Resolve `name` against enclosing contexts, threading an upvalue
    /// descriptor through every function between the use and the binding.
    fn resolve_upvalue(&mut self, ctx_index: usize, name: &str) -> Option<u8> {
        if ctx_index == 0 {
            return None;
        }
        if let Some(local) = self.resolve_local(ctx_index - 1, name) {
            self.contexts[ctx_index - 1].locals[local as usize].captured = true;
            return self.add_upvalue(ctx_index, local, true);
        }
        if let Some(upvalue) = self.resolve_upvalue(ctx_index - 1, name) {
            return self.add_upvalue(ctx_index, upvalue, false);
        }
        None
    }

    /// Reuse a matching descriptor or append a new one.
    fn add_upvalue(&mut self, ctx_index: usize, index: u8, is_local: bool) -> Option<u8> {
        let desc = UpvalueDesc { index, is_local };
        if let Some(existing) = self.contexts[ctx_index]
            .upvalues
            .iter()
            .position(|u| *u == desc)
        {
            return Some(existing as u8);
        }
        if self.contexts[ctx_index].upvalues.len() == MAX_UPVALUES {
            self.error("Too many closure variables in function.");
            return Some(0);
        }
        self.contexts[ctx_index].upvalues.push(desc);
        Some((self.contexts[ctx_index].upvalues.len() - 1) as u8)
    }

    // -----------------------------------------------------------------------
    // Statements
    // -----------------------------------------------------------------------

    fn statement(&mut self) {
        if self.match_token(TokenKind::Print) {
            self.print_statement();
        } else if self.match_token(TokenKind::If) {
            self.if_statement();
        } else if self.match_token(TokenKind::While) {
            self.while_statement();
        } else if self.match_token(TokenKind::For) {
            self.for_statement();
        } else if self.match_token(TokenKind::Return) {
            self.return_statement();
        } else if self.match_token(TokenKind::LeftBrace) {
            self.begin_scope();
            self.block();
            self.end_scope();
        } else if self.match_token(TokenKind::Break) || self.match_token(TokenKind::Continue) {
            self.unsupported_loop_jump();
        } else {
            self.expression_statement();
        }
    }

    // TODO: thread loop start/exit offsets through the statement compiler so
    // break and continue can lower to jumps.
    fn unsupported_loop_jump(&mut self) {
        let keyword = self.previous.lexeme;
        self.error(&format!("'{keyword}' is not supported yet."));
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

    fn block(&mut self) {
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            self.declaration();
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
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

    /// `for` desugars onto the same jump primitives as `while`, with an
    /// extra scope so an initializer declaration stays private to the loop.
    fn for_statement(&mut self) {
        self.begin_scope();
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");
        if self.match_token(TokenKind::Semicolon) {
            // No initializer.
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration();
        } else {
            self.expression_statement();
        }

        let mut loop_start = self.chunk_len();
        let mut exit_jump = None;
        if !self.match_token(TokenKind::Semicolon) {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");
            exit_jump = Some(self.emit_jump(OpCode::JumpIfFalse));
            self.emit_op(OpCode::Pop);
        }

        if !self.match_token(TokenKind::RightParen) {
            // The increment runs after the body: jump over it now, run the
            // body, then loop back here.
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
        if let Some(exit) = exit_jump {
            self.patch_jump(exit);
            self.emit_op(OpCode::Pop);
        }
        self.end_scope();
    }

    fn return_statement(&mut self) {
        if self.ctx().kind == FunctionKind::Script {
            self.error("Can't return from top-level code.");
        }
        if self.match_token(TokenKind::Semicolon) {
            self.emit_return();
        } else {
            self.expression();
            self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
            self.emit_op(OpCode::Return);
        }
    }

    // -----------------------------------------------------------------------
    // Expressions
    // -----------------------------------------------------------------------

    fn expression(&mut self) {
        self.parse_precedence(Precedence::Comma);
    }

    fn parse_precedence(&mut self, precedence: Precedence) {
        self.parse_with(precedence, precedence <= Precedence::Assignment);
    }

    /// The Pratt driver. `can_assign` rides along so the variable and
    /// property handlers know whether a trailing `=` may be consumed; a
    /// leftover `=` after an assignable parse is reported here.
    fn parse_with(&mut self, precedence: Precedence, can_assign: bool) {
        self.advance();
        let Some(prefix) = rule_for(self.previous.kind).prefix else {
            self.error("Expect expression.");
            return;
        };
        prefix(self, can_assign);

        while precedence <= rule_for(self.current.kind).precedence {
            self.advance();
            if let Some(infix) = rule_for(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }

        if can_assign && self.match_token(TokenKind::Equal) {
            self.error("Invalid assignment target.");
        }
    }

    fn grouping(&mut self, _can_assign: bool) {
        self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after expression.");
    }

    fn number(&mut self, _can_assign: bool) {
        match self.previous.lexeme.parse::<f64>() {
            Ok(value) => self.emit_constant(Value::Number(value)),
            Err(_) => self.error("Invalid number literal."),
        }
    }

    fn string(&mut self, _can_assign: bool) {
        let lexeme = self.previous.lexeme;
        // Strip the quotes; the contents are taken raw.
        let s = self.heap.intern(&lexeme[1..lexeme.len() - 1]);
        self.emit_constant(Value::Obj(s.into()));
    }

    fn literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::True => self.emit_op(OpCode::True),
            TokenKind::False => self.emit_op(OpCode::False),
            TokenKind::Nil => self.emit_op(OpCode::Nil),
            _ => unreachable!("literal handler on non-literal token"),
        }
    }

    fn unary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        self.parse_precedence(Precedence::Unary);
        match operator {
            TokenKind::Minus => self.emit_op(OpCode::Negate),
            TokenKind::Bang => self.emit_op(OpCode::Not),
            _ => unreachable!("unary handler on non-unary token"),
        }
    }

    fn binary(&mut self, _can_assign: bool) {
        let operator = self.previous.kind;
        let next = rule_for(operator).precedence.next();
        self.parse_precedence(next);
        match operator {
            TokenKind::Plus => self.emit_op(OpCode::Add),
            TokenKind::Minus => self.emit_op(OpCode::Subtract),
            TokenKind::Star => self.emit_op(OpCode::Multiply),
            TokenKind::Slash => self.emit_op(OpCode::Divide),
            TokenKind::EqualEqual => self.emit_op(OpCode::Equal),
            TokenKind::BangEqual => self.emit_ops(OpCode::Equal, OpCode::Not),
            TokenKind::Greater => self.emit_op(OpCode::Greater),
            TokenKind::GreaterEqual => self.emit_ops(OpCode::Less, OpCode::Not),
            TokenKind::Less => self.emit_op(OpCode::Less),
            TokenKind::LessEqual => self.emit_ops(OpCode::Greater, OpCode::Not),
            _ => unreachable!("binary handler on non-binary token"),
        }
    }

    fn and_op(&mut self, _can_assign: bool) {
        let end_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::And);
        self.patch_jump(end_jump);
    }

    fn or_op(&mut self, _can_assign: bool) {
        let else_jump = self.emit_jump(OpCode::JumpIfFalse);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(else_jump);
        self.emit_op(OpCode::Pop);
        self.parse_precedence(Precedence::Or);
        self.patch_jump(end_jump);
    }

    /// `condition ? then : else`. Both branches parse at assignment level
    /// with assignment itself disallowed, so `a ? b : c = d` is rejected
    /// rather than quietly treating `c` as an assignment target.
    fn ternary(&mut self, _can_assign: bool) {
        let then_jump = self.emit_jump(OpCode::JumpIfFalse);
        self.emit_op(OpCode::Pop);
        self.parse_with(Precedence::Assignment, false);
        let end_jump = self.emit_jump(OpCode::Jump);
        self.patch_jump(then_jump);
        self.emit_op(OpCode::Pop);
        self.consume(
            TokenKind::Colon,
            "Expect ':' after then branch of conditional expression.",
        );
        self.parse_with(Precedence::Assignment, false);
        self.patch_jump(end_jump);
    }

    /// The comma operator discards its left operand. The right operand is
    /// parsed at assignment level with assignment disallowed, so
    /// `a, b = c` reports an invalid assignment target.
    fn comma(&mut self, _can_assign: bool) {
        self.emit_op(OpCode::Pop);
        self.parse_with(Precedence::Assignment, false);
    }

    fn variable(&mut self, can_assign: bool) {
        self.named_variable(self.previous, can_assign);
    }

    fn this_(&mut self, _can_assign: bool) {
        if self.class_depth == 0 {
            self.error("Can't use 'this' outside of a class.");
            return;
        }
        self.variable(false);
    }

    /// Emit a read or write for `name`, resolving local → upvalue → global.
    fn named_variable(&mut self, name: Token<'src>, can_assign: bool) {
        let ctx_index = self.contexts.len() - 1;
        let (get_op, set_op, arg) = if let Some(slot) = self.resolve_local(ctx_index, name.lexeme)
        {
            (OpCode::GetLocal, OpCode::SetLocal, slot)
        } else if let Some(index) = self.resolve_upvalue(ctx_index, name.lexeme) {
            (OpCode::GetUpvalue, OpCode::SetUpvalue, index)
        } else {
            let constant = self.identifier_constant(name.lexeme);
            (OpCode::GetGlobal, OpCode::SetGlobal, constant)
        };

        if can_assign && self.match_token(TokenKind::Equal) {
            self.parse_precedence(Precedence::Assignment);
            self.emit_op_byte(set_op, arg);
        } else {
            self.emit_op_byte(get_op, arg);
        }
    }

    fn call(&mut self, _can_assign: bool) {
        let arg_count = self.argument_list();
        self.emit_op_byte(OpCode::Call, arg_count);
    }

    /// Arguments parse at assignment level, so commas separate arguments
    /// instead of forming comma expressions.
    fn argument_list(&mut self) -> u8 {
        let mut count: usize = 0;
        if !self.check(TokenKind::RightParen) {
            loop {
                self.parse_precedence(Precedence::Assignment);
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
        count.min(255) as u8
    }

    fn dot(&mut self, can_assign: bool) {
        self.consume(TokenKind::Identifier, "Expect property name after '.'.");
        let name = self.identifier_constant(self.previous.lexeme);
        if can_assign && self.match_token(TokenKind::Equal) {
            self.parse_precedence(Precedence::Assignment);
            self.emit_op_byte(OpCode::SetProperty, name);
        } else {
            self.emit_op_byte(OpCode::GetProperty, name);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compile_ok(source: &str) -> (Function, Heap) {
        let mut heap = Heap::new();
        let function = compile(source, &mut heap).expect("compile failed");
        (function, heap)
    }

    fn compile_err(source: &str) -> Vec<String> {
        let mut heap = Heap::new();
        match compile(source, &mut heap) {
            Err(Error::Compile(CompileErrors(errors))) => errors,
            other => panic!("expected compile error, got {other:?}"),
        }
    }

    #[test]
    fn expression_statement_bytecode_shape() {
        let (function, _) = compile_ok("1 + 2;");
        let code = &function.chunk.code;
        assert_eq!(
            code.as_slice(),
            &[
                u8::from(OpCode::Constant),
                0,
                u8::from(OpCode::Constant),
                1,
                u8::from(OpCode::Add),
                u8::from(OpCode::Pop),
                u8::from(OpCode::Nil),
                u8::from(OpCode::Return),
            ]
        );
    }

    #[test]
    fn comparison_operators_lower_to_pairs() {
        let (function, _) = compile_ok("1 <= 2;");
        let code = &function.chunk.code;
        assert_eq!(code[4], u8::from(OpCode::Greater));
        assert_eq!(code[5], u8::from(OpCode::Not));
    }

    #[test]
    fn jump_offsets_land_on_opcode_boundaries() {
        let (function, _) = compile_ok("if (true) print 1; else print 2;");
        let code = &function.chunk.code;
        // First instruction is True, then JumpIfFalse with a patched offset.
        assert_eq!(code[0], u8::from(OpCode::True));
        assert_eq!(code[1], u8::from(OpCode::JumpIfFalse));
        let offset = usize::from(u16::from_be_bytes([code[2], code[3]]));
        let target = 4 + offset;
        assert_eq!(code[target], u8::from(OpCode::Pop));
    }

    #[test]
    fn uninitialized_local_self_reference_is_an_error() {
        let errors = compile_err("{ var a = a; }");
        assert_eq!(
            errors,
            vec!["[line 1] Error at 'a': Can't read local variable in its own initializer."]
        );
    }

    #[test]
    fn duplicate_local_declaration_is_an_error() {
        let errors = compile_err("{ var a = 1; var a = 2; }");
        assert_eq!(
            errors,
            vec!["[line 1] Error at 'a': Already a variable with this name in this scope."]
        );
    }

    #[test]
    fn panic_mode_recovers_at_statement_boundaries() {
        let errors = compile_err("var; print 1 +; var x = ;");
        assert_eq!(errors.len(), 3);
        assert!(errors[0].contains("Expect variable name."));
    }

    #[test]
    fn closure_descriptors_follow_the_closure_opcode() {
        let (function, heap) = compile_ok("fun outer() { var x = 1; fun inner() { print x; } }");
        // outer is the first function constant of the script chunk.
        let outer_ref = function
            .chunk
            .constants
            .iter()
            .find_map(|c| c.as_obj().filter(|&r| matches!(heap.get(r), Obj::Function(_))))
            .unwrap();
        let outer = heap.function(outer_ref);
        let inner_ref = outer
            .chunk
            .constants
            .iter()
            .find_map(|c| c.as_obj().filter(|&r| matches!(heap.get(r), Obj::Function(_))))
            .unwrap();
        assert_eq!(heap.function(inner_ref).upvalue_count, 1);
        // The Closure instruction for inner carries one (is_local, index) pair.
        let code = &outer.chunk.code;
        let closure_at = code
            .iter()
            .position(|&b| b == u8::from(OpCode::Closure))
            .unwrap();
        assert_eq!(code[closure_at + 2], 1); // captured a local
        assert_eq!(code[closure_at + 3], 1); // slot of x
    }

    #[test]
    fn break_and_continue_are_reported_as_unsupported() {
        let errors = compile_err("while (true) { break; }");
        assert_eq!(
            errors,
            vec!["[line 1] Error at 'break': 'break' is not supported yet."]
        );
    }
}
