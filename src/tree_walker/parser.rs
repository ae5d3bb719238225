//! Recursive-descent parser producing the `ast` types. Shares the
//! scanner with the bytecode pipeline (`compiler::lexer::Lexer`);
//! diverges from it only in what it builds with the tokens.

use std::rc::Rc;

use crate::common::token::{Token, TokenKind};
use crate::compiler::lexer::Lexer;
use crate::diagnostics::{CompileError, CompileErrors};

use super::ast::*;

pub struct Parser<'src> {
    lexer: Lexer<'src>,
    current: Token<'src>,
    previous: Token<'src>,
    had_error: bool,
    panic_mode: bool,
    errors: Vec<CompileError>,
    next_id: NodeId,
}

impl<'src> Parser<'src> {
    pub fn new(source: &'src str) -> Parser<'src> {
        let mut lexer = Lexer::new(source);
        let first = lexer.next_token();
        Parser {
            lexer,
            current: first,
            previous: first,
            had_error: false,
            panic_mode: false,
            errors: Vec::new(),
            next_id: 0,
        }
    }

    fn next_id(&mut self) -> NodeId {
        let id = self.next_id;
        self.next_id += 1;
        id
    }

    pub fn parse(mut self) -> Result<Vec<Stmt>, CompileErrors> {
        let mut statements = Vec::new();
        while !self.check(TokenKind::Eof) {
            if let Some(stmt) = self.declaration() {
                statements.push(stmt);
            }
        }
        if self.had_error {
            Err(CompileErrors(self.errors))
        } else {
            Ok(statements)
        }
    }

    // ---- token stream ----------------------------------------------------

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

    fn consume(&mut self, kind: TokenKind, message: &str) -> Token<'src> {
        if self.current.kind == kind {
            self.advance();
            self.previous
        } else {
            self.error_at_current(message);
            self.current
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

    // ---- declarations ------------------------------------------------------

    fn declaration(&mut self) -> Option<Stmt> {
        let result = if self.match_token(TokenKind::Class) {
            self.class_declaration()
        } else if self.match_token(TokenKind::Fun) {
            self.fun_declaration("function")
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration()
        } else {
            self.statement()
        };

        if self.panic_mode {
            self.synchronize();
        }
        result
    }

    fn class_declaration(&mut self) -> Option<Stmt> {
        let line = self.previous.line;
        let name_tok = self.consume(TokenKind::Identifier, "Expect class name.");
        let name = name_tok.lexeme.to_string();

        let superclass = if self.match_token(TokenKind::Less) {
            let super_tok = self.consume(TokenKind::Identifier, "Expect superclass name.");
            if super_tok.lexeme == name {
                self.error("A class can't inherit from itself.");
            }
            Some(Expr {
                id: self.next_id(),
                line: super_tok.line,
                kind: ExprKind::Variable(super_tok.lexeme.to_string()),
            })
        } else {
            None
        };

        self.consume(TokenKind::LeftBrace, "Expect '{' before class body.");
        let mut methods = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            if let Some(Stmt { kind: StmtKind::Function(decl), .. }) = self.fun_declaration("method")
            {
                methods.push(decl);
            }
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after class body.");

        Some(Stmt { line, kind: StmtKind::Class { name, superclass, methods } })
    }

    fn fun_declaration(&mut self, kind: &str) -> Option<Stmt> {
        let name_tok = self.consume(TokenKind::Identifier, &format!("Expect {kind} name."));
        let name = name_tok.lexeme.to_string();
        let line = name_tok.line;

        self.consume(TokenKind::LeftParen, &format!("Expect '(' after {kind} name."));
        let mut params = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                if params.len() >= 255 {
                    self.error_at_current("Can't have more than 255 parameters.");
                }
                let param = self.consume(TokenKind::Identifier, "Expect parameter name.");
                params.push(param.lexeme.to_string());
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after parameters.");
        self.consume(TokenKind::LeftBrace, &format!("Expect '{{' before {kind} body."));
        let body = self.block();

        Some(Stmt {
            line,
            kind: StmtKind::Function(Rc::new(FunctionDecl { name, params, body, line })),
        })
    }

    fn var_declaration(&mut self) -> Option<Stmt> {
        let name_tok = self.consume(TokenKind::Identifier, "Expect variable name.");
        let name = name_tok.lexeme.to_string();
        let line = name_tok.line;

        let initializer = if self.match_token(TokenKind::Equal) { Some(self.expression()) } else { None };
        self.consume(TokenKind::Semicolon, "Expect ';' after variable declaration.");
        Some(Stmt { line, kind: StmtKind::Var(name, initializer) })
    }

    // ---- statements --------------------------------------------------------

    fn statement(&mut self) -> Option<Stmt> {
        if self.match_token(TokenKind::Print) {
            self.print_statement()
        } else if self.match_token(TokenKind::For) {
            self.for_statement()
        } else if self.match_token(TokenKind::If) {
            self.if_statement()
        } else if self.match_token(TokenKind::Return) {
            self.return_statement()
        } else if self.match_token(TokenKind::While) {
            self.while_statement()
        } else if self.match_token(TokenKind::LeftBrace) {
            let line = self.previous.line;
            Some(Stmt { line, kind: StmtKind::Block(self.block()) })
        } else {
            self.expression_statement()
        }
    }

    fn block(&mut self) -> Vec<Stmt> {
        let mut statements = Vec::new();
        while !self.check(TokenKind::RightBrace) && !self.check(TokenKind::Eof) {
            if let Some(stmt) = self.declaration() {
                statements.push(stmt);
            }
        }
        self.consume(TokenKind::RightBrace, "Expect '}' after block.");
        statements
    }

    fn print_statement(&mut self) -> Option<Stmt> {
        let line = self.previous.line;
        let value = self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after value.");
        Some(Stmt { line, kind: StmtKind::Print(value) })
    }

    fn expression_statement(&mut self) -> Option<Stmt> {
        let line = self.current.line;
        let expr = self.expression();
        self.consume(TokenKind::Semicolon, "Expect ';' after expression.");
        Some(Stmt { line, kind: StmtKind::Expression(expr) })
    }

    fn if_statement(&mut self) -> Option<Stmt> {
        let line = self.previous.line;
        self.consume(TokenKind::LeftParen, "Expect '(' after 'if'.");
        let condition = self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");

        let then_branch = Box::new(self.statement()?);
        let else_branch = if self.match_token(TokenKind::Else) {
            Some(Box::new(self.statement()?))
        } else {
            None
        };
        Some(Stmt { line, kind: StmtKind::If(condition, then_branch, else_branch) })
    }

    fn while_statement(&mut self) -> Option<Stmt> {
        let line = self.previous.line;
        self.consume(TokenKind::LeftParen, "Expect '(' after 'while'.");
        let condition = self.expression();
        self.consume(TokenKind::RightParen, "Expect ')' after condition.");
        let body = Box::new(self.statement()?);
        Some(Stmt { line, kind: StmtKind::While(condition, body) })
    }

    /// Desugars directly into `StmtKind::{Block,While}` at parse time,
    /// matching the compiler's bytecode desugaring so both pipelines
    /// run the identical loop for the same source text.
    fn for_statement(&mut self) -> Option<Stmt> {
        let line = self.previous.line;
        self.consume(TokenKind::LeftParen, "Expect '(' after 'for'.");

        let initializer = if self.match_token(TokenKind::Semicolon) {
            None
        } else if self.match_token(TokenKind::Var) {
            self.var_declaration()
        } else {
            self.expression_statement()
        };

        let condition = if !self.check(TokenKind::Semicolon) {
            Some(self.expression())
        } else {
            None
        };
        self.consume(TokenKind::Semicolon, "Expect ';' after loop condition.");

        let increment = if !self.check(TokenKind::RightParen) {
            Some(self.expression())
        } else {
            None
        };
        self.consume(TokenKind::RightParen, "Expect ')' after for clauses.");

        let mut body = self.statement()?;

        if let Some(increment) = increment {
            let increment_line = increment.line;
            body = Stmt {
                line,
                kind: StmtKind::Block(vec![
                    body,
                    Stmt { line: increment_line, kind: StmtKind::Expression(increment) },
                ]),
            };
        }

        let condition = condition.unwrap_or(Expr { id: self.next_id(), line, kind: ExprKind::Literal(LitValue::Bool(true)) });
        body = Stmt { line, kind: StmtKind::While(condition, Box::new(body)) };

        if let Some(initializer) = initializer {
            body = Stmt { line, kind: StmtKind::Block(vec![initializer, body]) };
        }

        Some(body)
    }

    fn return_statement(&mut self) -> Option<Stmt> {
        let line = self.previous.line;
        let value = if !self.check(TokenKind::Semicolon) { Some(self.expression()) } else { None };
        self.consume(TokenKind::Semicolon, "Expect ';' after return value.");
        Some(Stmt { line, kind: StmtKind::Return(value) })
    }

    // ---- expressions -------------------------------------------------------

    fn expression(&mut self) -> Expr {
        self.assignment()
    }

    fn assignment(&mut self) -> Expr {
        let expr = self.or_expr();

        if self.match_token(TokenKind::Equal) {
            let equals_line = self.previous.line;
            let value = self.assignment();
            return match expr.kind {
                ExprKind::Variable(name) => Expr {
                    id: self.next_id(),
                    line: equals_line,
                    kind: ExprKind::Assign(name, Box::new(value)),
                },
                ExprKind::Get(object, name) => Expr {
                    id: self.next_id(),
                    line: equals_line,
                    kind: ExprKind::Set(object, name, Box::new(value)),
                },
                _ => {
                    self.error("Invalid assignment target.");
                    expr
                }
            };
        }
        expr
    }

    fn or_expr(&mut self) -> Expr {
        let mut expr = self.and_expr();
        while self.match_token(TokenKind::Or) {
            let line = self.previous.line;
            let right = self.and_expr();
            expr = Expr { id: self.next_id(), line, kind: ExprKind::Logical(Box::new(expr), LogicalOp::Or, Box::new(right)) };
        }
        expr
    }

    fn and_expr(&mut self) -> Expr {
        let mut expr = self.equality();
        while self.match_token(TokenKind::And) {
            let line = self.previous.line;
            let right = self.equality();
            expr = Expr { id: self.next_id(), line, kind: ExprKind::Logical(Box::new(expr), LogicalOp::And, Box::new(right)) };
        }
        expr
    }

    fn equality(&mut self) -> Expr {
        let mut expr = self.comparison();
        loop {
            let op = if self.match_token(TokenKind::BangEqual) {
                BinaryOp::NotEqual
            } else if self.match_token(TokenKind::EqualEqual) {
                BinaryOp::Equal
            } else {
                break;
            };
            let line = self.previous.line;
            let right = self.comparison();
            expr = Expr { id: self.next_id(), line, kind: ExprKind::Binary(Box::new(expr), op, Box::new(right)) };
        }
        expr
    }

    fn comparison(&mut self) -> Expr {
        let mut expr = self.term();
        loop {
            let op = if self.match_token(TokenKind::Greater) {
                BinaryOp::Greater
            } else if self.match_token(TokenKind::GreaterEqual) {
                BinaryOp::GreaterEqual
            } else if self.match_token(TokenKind::Less) {
                BinaryOp::Less
            } else if self.match_token(TokenKind::LessEqual) {
                BinaryOp::LessEqual
            } else {
                break;
            };
            let line = self.previous.line;
            let right = self.term();
            expr = Expr { id: self.next_id(), line, kind: ExprKind::Binary(Box::new(expr), op, Box::new(right)) };
        }
        expr
    }

    fn term(&mut self) -> Expr {
        let mut expr = self.factor();
        loop {
            let op = if self.match_token(TokenKind::Plus) {
                BinaryOp::Add
            } else if self.match_token(TokenKind::Minus) {
                BinaryOp::Subtract
            } else {
                break;
            };
            let line = self.previous.line;
            let right = self.factor();
            expr = Expr { id: self.next_id(), line, kind: ExprKind::Binary(Box::new(expr), op, Box::new(right)) };
        }
        expr
    }

    fn factor(&mut self) -> Expr {
        let mut expr = self.unary();
        loop {
            let op = if self.match_token(TokenKind::Star) {
                BinaryOp::Multiply
            } else if self.match_token(TokenKind::Slash) {
                BinaryOp::Divide
            } else {
                break;
            };
            let line = self.previous.line;
            let right = self.unary();
            expr = Expr { id: self.next_id(), line, kind: ExprKind::Binary(Box::new(expr), op, Box::new(right)) };
        }
        expr
    }

    fn unary(&mut self) -> Expr {
        if self.match_token(TokenKind::Bang) || self.match_token(TokenKind::Minus) {
            let op = if self.previous.kind == TokenKind::Bang { UnaryOp::Not } else { UnaryOp::Negate };
            let line = self.previous.line;
            let right = self.unary();
            return Expr { id: self.next_id(), line, kind: ExprKind::Unary(op, Box::new(right)) };
        }
        self.call()
    }

    fn call(&mut self) -> Expr {
        let mut expr = self.primary();
        loop {
            if self.match_token(TokenKind::LeftParen) {
                expr = self.finish_call(expr);
            } else if self.match_token(TokenKind::Dot) {
                let name_tok = self.consume(TokenKind::Identifier, "Expect property name after '.'.");
                let line = name_tok.line;
                expr = Expr { id: self.next_id(), line, kind: ExprKind::Get(Box::new(expr), name_tok.lexeme.to_string()) };
            } else {
                break;
            }
        }
        expr
    }

    fn finish_call(&mut self, callee: Expr) -> Expr {
        let line = self.previous.line;
        let mut args = Vec::new();
        if !self.check(TokenKind::RightParen) {
            loop {
                if args.len() >= 255 {
                    self.error_at_current("Can't have more than 255 arguments.");
                }
                args.push(self.expression());
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
        }
        self.consume(TokenKind::RightParen, "Expect ')' after arguments.");
        Expr { id: self.next_id(), line, kind: ExprKind::Call(Box::new(callee), args) }
    }

    fn primary(&mut self) -> Expr {
        let line = self.current.line;
        if self.match_token(TokenKind::False) {
            return Expr { id: self.next_id(), line, kind: ExprKind::Literal(LitValue::Bool(false)) };
        }
        if self.match_token(TokenKind::True) {
            return Expr { id: self.next_id(), line, kind: ExprKind::Literal(LitValue::Bool(true)) };
        }
        if self.match_token(TokenKind::Nil) {
            return Expr { id: self.next_id(), line, kind: ExprKind::Literal(LitValue::Nil) };
        }
        if self.match_token(TokenKind::Number) {
            let n: f64 = self.previous.lexeme.parse().expect("scanner only emits valid numbers");
            return Expr { id: self.next_id(), line, kind: ExprKind::Literal(LitValue::Number(n)) };
        }
        if self.match_token(TokenKind::String) {
            let lexeme = self.previous.lexeme;
            let text = lexeme[1..lexeme.len() - 1].to_string();
            return Expr { id: self.next_id(), line, kind: ExprKind::Literal(LitValue::Str(text)) };
        }
        if self.match_token(TokenKind::Super) {
            self.consume(TokenKind::Dot, "Expect '.' after 'super'.");
            let method = self.consume(TokenKind::Identifier, "Expect superclass method name.");
            return Expr { id: self.next_id(), line, kind: ExprKind::Super(method.lexeme.to_string()) };
        }
        if self.match_token(TokenKind::This) {
            return Expr { id: self.next_id(), line, kind: ExprKind::This };
        }
        if self.match_token(TokenKind::Identifier) {
            return Expr { id: self.next_id(), line, kind: ExprKind::Variable(self.previous.lexeme.to_string()) };
        }
        if self.match_token(TokenKind::LeftParen) {
            let inner = self.expression();
            self.consume(TokenKind::RightParen, "Expect ')' after expression.");
            return Expr { id: self.next_id(), line, kind: ExprKind::Grouping(Box::new(inner)) };
        }

        self.error_at_current("Expect expression.");
        self.advance();
        Expr { id: self.next_id(), line, kind: ExprKind::Literal(LitValue::Nil) }
    }
}
