//! Static pass between parsing and evaluation: for every variable
//! reference, computes how many enclosing scopes to climb so the
//! interpreter's environment chain never has to search. Also catches
//! the handful of errors that don't need a running program to detect
//! (self-referential initializers, `return` outside a function,
//! `this`/`super` misuse, returning a value from `init`).

use std::collections::HashMap;

use crate::diagnostics::{ResolveError, ResolveErrors};

use super::ast::*;

#[derive(Clone, Copy, PartialEq)]
enum FunctionType {
    None,
    Function,
    Initializer,
    Method,
}

#[derive(Clone, Copy, PartialEq)]
enum ClassType {
    None,
    Class,
    Subclass,
}

pub struct Resolver {
    scopes: Vec<HashMap<String, bool>>,
    locals: HashMap<NodeId, usize>,
    errors: Vec<ResolveError>,
    current_function: FunctionType,
    current_class: ClassType,
}

impl Resolver {
    pub fn new() -> Resolver {
        Resolver {
            scopes: Vec::new(),
            locals: HashMap::new(),
            errors: Vec::new(),
            current_function: FunctionType::None,
            current_class: ClassType::None,
        }
    }

    pub fn resolve(
        mut self,
        statements: &[Stmt],
    ) -> Result<HashMap<NodeId, usize>, ResolveErrors> {
        self.resolve_stmts(statements);
        if self.errors.is_empty() {
            Ok(self.locals)
        } else {
            Err(ResolveErrors(self.errors))
        }
    }

    fn error(&mut self, line: usize, message: impl Into<String>) {
        self.errors.push(ResolveError::new(line, message));
    }

    fn begin_scope(&mut self) {
        self.scopes.push(HashMap::new());
    }

    fn end_scope(&mut self) {
        self.scopes.pop();
    }

    fn declare(&mut self, line: usize, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            if scope.contains_key(name) {
                self.error(line, "Already a variable with this name in this scope.");
            }
            scope.insert(name.to_string(), false);
        }
    }

    fn define(&mut self, name: &str) {
        if let Some(scope) = self.scopes.last_mut() {
            scope.insert(name.to_string(), true);
        }
    }

    fn resolve_local(&mut self, id: NodeId, name: &str) {
        for (depth, scope) in self.scopes.iter().rev().enumerate() {
            if scope.contains_key(name) {
                self.locals.insert(id, depth);
                return;
            }
        }
        // Not found in any scope: treated as a global, resolved directly
        // against the VM's/interpreter's global environment at runtime.
    }

    fn resolve_stmts(&mut self, statements: &[Stmt]) {
        for stmt in statements {
            self.resolve_stmt(stmt);
        }
    }

    fn resolve_stmt(&mut self, stmt: &Stmt) {
        match &stmt.kind {
            StmtKind::Expression(expr) => self.resolve_expr(expr),
            StmtKind::Print(expr) => self.resolve_expr(expr),
            StmtKind::Var(name, initializer) => {
                self.declare(stmt.line, name);
                if let Some(init) = initializer {
                    self.resolve_expr(init);
                }
                self.define(name);
            }
            StmtKind::Block(statements) => {
                self.begin_scope();
                self.resolve_stmts(statements);
                self.end_scope();
            }
            StmtKind::If(condition, then_branch, else_branch) => {
                self.resolve_expr(condition);
                self.resolve_stmt(then_branch);
                if let Some(else_branch) = else_branch {
                    self.resolve_stmt(else_branch);
                }
            }
            StmtKind::While(condition, body) => {
                self.resolve_expr(condition);
                self.resolve_stmt(body);
            }
            StmtKind::Function(decl) => {
                self.declare(stmt.line, &decl.name);
                self.define(&decl.name);
                self.resolve_function(decl, FunctionType::Function);
            }
            StmtKind::Return(value) => {
                if self.current_function == FunctionType::None {
                    self.error(stmt.line, "Can't return from top-level code.");
                }
                if let Some(value) = value {
                    if self.current_function == FunctionType::Initializer {
                        self.error(stmt.line, "Can't return a value from an initializer.");
                    }
                    self.resolve_expr(value);
                }
            }
            StmtKind::Class { name, superclass, methods } => {
                let enclosing_class = self.current_class;
                self.current_class = ClassType::Class;

                self.declare(stmt.line, name);
                self.define(name);

                if let Some(superclass_expr) = superclass {
                    if let ExprKind::Variable(super_name) = &superclass_expr.kind {
                        if super_name == name {
                            self.error(stmt.line, "A class can't inherit from itself.");
                        }
                    }
                    self.current_class = ClassType::Subclass;
                    self.resolve_expr(superclass_expr);
                    self.begin_scope();
                    self.scopes.last_mut().unwrap().insert("super".to_string(), true);
                }

                self.begin_scope();
                self.scopes.last_mut().unwrap().insert("this".to_string(), true);

                for method in methods {
                    let kind = if method.name == "init" {
                        FunctionType::Initializer
                    } else {
                        FunctionType::Method
                    };
                    self.resolve_function(method, kind);
                }

                self.end_scope();
                if superclass.is_some() {
                    self.end_scope();
                }
                self.current_class = enclosing_class;
            }
        }
    }

    fn resolve_function(&mut self, decl: &FunctionDecl, kind: FunctionType) {
        let enclosing_function = self.current_function;
        self.current_function = kind;

        self.begin_scope();
        for param in &decl.params {
            self.declare(decl.line, param);
            self.define(param);
        }
        self.resolve_stmts(&decl.body);
        self.end_scope();

        self.current_function = enclosing_function;
    }

    fn resolve_expr(&mut self, expr: &Expr) {
        match &expr.kind {
            ExprKind::Literal(_) => {}
            ExprKind::Variable(name) => {
                if let Some(scope) = self.scopes.last() {
                    if scope.get(name) == Some(&false) {
                        self.error(expr.line, "Can't read local variable in its own initializer.");
                    }
                }
                self.resolve_local(expr.id, name);
            }
            ExprKind::Assign(name, value) => {
                self.resolve_expr(value);
                self.resolve_local(expr.id, name);
            }
            ExprKind::Unary(_, right) => self.resolve_expr(right),
            ExprKind::Binary(left, _, right) | ExprKind::Logical(left, _, right) => {
                self.resolve_expr(left);
                self.resolve_expr(right);
            }
            ExprKind::Call(callee, args) => {
                self.resolve_expr(callee);
                for arg in args {
                    self.resolve_expr(arg);
                }
            }
            ExprKind::Get(object, _) => self.resolve_expr(object),
            ExprKind::Set(object, _, value) => {
                self.resolve_expr(value);
                self.resolve_expr(object);
            }
            ExprKind::This => {
                if self.current_class == ClassType::None {
                    self.error(expr.line, "Can't use 'this' outside of a class.");
                }
                self.resolve_local(expr.id, "this");
            }
            ExprKind::Super(_) => {
                if self.current_class == ClassType::None {
                    self.error(expr.line, "Can't use 'super' outside of a class.");
                } else if self.current_class != ClassType::Subclass {
                    self.error(expr.line, "Can't use 'super' in a class with no superclass.");
                }
                self.resolve_local(expr.id, "super");
            }
            ExprKind::Grouping(inner) => self.resolve_expr(inner),
        }
    }
}

impl Default for Resolver {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::super::parser::Parser;
    use super::*;

    fn resolve(source: &str) -> Result<HashMap<NodeId, usize>, ResolveErrors> {
        let statements = Parser::new(source).parse().expect("source parses");
        Resolver::new().resolve(&statements)
    }

    #[test]
    fn rejects_self_referential_initializer() {
        let err = resolve("{ var a = a; }").unwrap_err();
        assert!(err.0[0].message.contains("own initializer"));
    }

    #[test]
    fn rejects_duplicate_local_declaration() {
        let err = resolve("{ var a = 1; var a = 2; }").unwrap_err();
        assert!(err.0[0].message.contains("Already a variable"));
    }

    #[test]
    fn rejects_top_level_return() {
        let err = resolve("return 1;").unwrap_err();
        assert!(err.0[0].message.contains("top-level code"));
    }

    #[test]
    fn rejects_value_return_from_initializer() {
        let err = resolve("class A { init() { return 1; } }").unwrap_err();
        assert!(err.0[0].message.contains("from an initializer"));
    }

    #[test]
    fn rejects_this_outside_class() {
        let err = resolve("print this;").unwrap_err();
        assert!(err.0[0].message.contains("'this' outside"));
    }

    #[test]
    fn rejects_super_without_superclass() {
        let err = resolve("class A { foo() { super.bar(); } }").unwrap_err();
        assert!(err.0[0].message.contains("no superclass"));
    }

    #[test]
    fn rejects_self_inheritance() {
        let err = resolve("class A < A {}").unwrap_err();
        assert!(err.0[0].message.contains("inherit from itself"));
    }

    #[test]
    fn accepts_well_formed_closure() {
        let locals = resolve(
            "fun makeCounter() { var i = 0; fun count() { i = i + 1; return i; } return count; }",
        )
        .expect("well-formed program resolves cleanly");
        assert!(!locals.is_empty());
    }
}
