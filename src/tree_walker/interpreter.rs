//! Visitor-style evaluator over the AST, using the resolver's distance
//! map to read/write variables without searching. `return` is modeled
//! as a `Signal` threaded back up through statement execution instead
//! of unwinding the Rust call stack with a panic or a special `Err`
//! variant — closer to how a tree-walker in a language with checked
//! exceptions would do it, and it keeps `RuntimeError` meaning what it
//! says (an actual failure, not control flow).

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::{SystemTime, UNIX_EPOCH};

use crate::diagnostics::{RuntimeError, TraceFrame};

use super::ast::*;
use super::environment::{self, new_env, Env};
use super::value::{NativeFn, TwBoundMethod, TwClass, TwFunction, TwInstance, TwNative, Value};

enum Signal {
    None,
    Return(Value),
}

type ExecResult = Result<Signal, RuntimeError>;
type EvalResult = Result<Value, RuntimeError>;

struct Frame {
    name: String,
    line: usize,
}

pub struct Interpreter {
    globals: Env,
    environment: Env,
    locals: HashMap<NodeId, usize>,
    frames: Vec<Frame>,
}

impl Interpreter {
    pub fn new(locals: HashMap<NodeId, usize>) -> Interpreter {
        let globals = new_env(None);
        define_native(&globals, "clock", 0, native_clock);
        Interpreter {
            environment: Rc::clone(&globals),
            globals,
            locals,
            frames: vec![Frame { name: "script".to_string(), line: 0 }],
        }
    }

    pub fn run(&mut self, statements: &[Stmt]) -> Result<(), RuntimeError> {
        for stmt in statements {
            match self.exec_stmt(stmt)? {
                Signal::None => {}
                Signal::Return(_) => return Ok(()),
            }
        }
        Ok(())
    }

    fn current_line_mut(&mut self) -> &mut usize {
        &mut self.frames.last_mut().expect("interpreter always has a frame").line
    }

    fn trace(&self) -> Vec<TraceFrame> {
        self.frames
            .iter()
            .rev()
            .map(|f| TraceFrame { line: f.line, function_name: f.name.clone() })
            .collect()
    }

    fn error(&self, message: impl Into<String>) -> RuntimeError {
        RuntimeError::new(message, self.trace())
    }

    fn exec_block(&mut self, statements: &[Stmt], env: Env) -> ExecResult {
        let previous = std::mem::replace(&mut self.environment, env);
        let result = (|| {
            for stmt in statements {
                match self.exec_stmt(stmt)? {
                    Signal::None => {}
                    signal @ Signal::Return(_) => return Ok(signal),
                }
            }
            Ok(Signal::None)
        })();
        self.environment = previous;
        result
    }

    fn exec_stmt(&mut self, stmt: &Stmt) -> ExecResult {
        *self.current_line_mut() = stmt.line;
        match &stmt.kind {
            StmtKind::Expression(expr) => {
                self.eval(expr)?;
                Ok(Signal::None)
            }
            StmtKind::Print(expr) => {
                let value = self.eval(expr)?;
                println!("{value}");
                Ok(Signal::None)
            }
            StmtKind::Var(name, initializer) => {
                let value = match initializer {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Nil,
                };
                self.environment.borrow_mut().define(name, value);
                Ok(Signal::None)
            }
            StmtKind::Block(statements) => {
                let env = new_env(Some(Rc::clone(&self.environment)));
                self.exec_block(statements, env)
            }
            StmtKind::If(condition, then_branch, else_branch) => {
                if self.eval(condition)?.is_truthy() {
                    self.exec_stmt(then_branch)
                } else if let Some(else_branch) = else_branch {
                    self.exec_stmt(else_branch)
                } else {
                    Ok(Signal::None)
                }
            }
            StmtKind::While(condition, body) => {
                while self.eval(condition)?.is_truthy() {
                    match self.exec_stmt(body)? {
                        Signal::None => {}
                        signal @ Signal::Return(_) => return Ok(signal),
                    }
                }
                Ok(Signal::None)
            }
            StmtKind::Function(decl) => {
                let function = Rc::new(TwFunction {
                    decl: Rc::clone(decl),
                    closure: Rc::clone(&self.environment),
                    is_initializer: false,
                });
                self.environment.borrow_mut().define(&decl.name, Value::Function(function));
                Ok(Signal::None)
            }
            StmtKind::Return(value) => {
                let value = match value {
                    Some(expr) => self.eval(expr)?,
                    None => Value::Nil,
                };
                Ok(Signal::Return(value))
            }
            StmtKind::Class { name, superclass, methods } => {
                self.exec_class(name, superclass, methods)
            }
        }
    }

    fn exec_class(
        &mut self,
        name: &str,
        superclass_expr: &Option<Expr>,
        methods: &[Rc<FunctionDecl>],
    ) -> ExecResult {
        let superclass = match superclass_expr {
            Some(expr) => {
                let value = self.eval(expr)?;
                match value {
                    Value::Class(class) => Some(class),
                    _ => return Err(self.error("Superclass must be a class.")),
                }
            }
            None => None,
        };

        self.environment.borrow_mut().define(name, Value::Nil);

        let method_env = match &superclass {
            Some(superclass) => {
                let env = new_env(Some(Rc::clone(&self.environment)));
                env.borrow_mut().define("super", Value::Class(Rc::clone(superclass)));
                env
            }
            None => Rc::clone(&self.environment),
        };

        let mut method_table = HashMap::new();
        for method in methods {
            let function = Rc::new(TwFunction {
                decl: Rc::clone(method),
                closure: Rc::clone(&method_env),
                is_initializer: method.name == "init",
            });
            method_table.insert(method.name.clone(), function);
        }

        let class = Rc::new(TwClass { name: name.to_string(), superclass, methods: method_table });
        self.environment.borrow_mut().assign(name, Value::Class(class));
        Ok(Signal::None)
    }

    fn eval(&mut self, expr: &Expr) -> EvalResult {
        match &expr.kind {
            ExprKind::Literal(lit) => Ok(match lit {
                LitValue::Nil => Value::Nil,
                LitValue::Bool(b) => Value::Bool(*b),
                LitValue::Number(n) => Value::Number(*n),
                LitValue::Str(s) => Value::Str(Rc::from(s.as_str())),
            }),
            ExprKind::Grouping(inner) => self.eval(inner),
            ExprKind::Variable(name) => self.lookup_variable(expr.id, name),
            ExprKind::Assign(name, value_expr) => {
                let value = self.eval(value_expr)?;
                match self.locals.get(&expr.id) {
                    Some(&distance) => {
                        environment::assign_at(&self.environment, distance, name, value.clone())
                    }
                    None => {
                        if !self.globals.borrow_mut().assign(name, value.clone()) {
                            return Err(self.error(format!("Undefined variable '{name}'.")));
                        }
                    }
                }
                Ok(value)
            }
            ExprKind::Unary(op, right) => {
                let right = self.eval(right)?;
                match op {
                    UnaryOp::Negate => match right {
                        Value::Number(n) => Ok(Value::Number(-n)),
                        _ => Err(self.error("Operand must be a number.")),
                    },
                    UnaryOp::Not => Ok(Value::Bool(!right.is_truthy())),
                }
            }
            ExprKind::Binary(left, op, right) => {
                let left = self.eval(left)?;
                let right = self.eval(right)?;
                self.binary(*op, left, right)
            }
            ExprKind::Logical(left, op, right) => {
                let left = self.eval(left)?;
                match op {
                    LogicalOp::Or if left.is_truthy() => Ok(left),
                    LogicalOp::And if !left.is_truthy() => Ok(left),
                    _ => self.eval(right),
                }
            }
            ExprKind::Call(callee, args) => self.call(expr.line, callee, args),
            ExprKind::Get(object, name) => {
                let object = self.eval(object)?;
                self.get_property(&object, name)
            }
            ExprKind::Set(object, name, value_expr) => {
                let object = self.eval(object)?;
                let instance = match &object {
                    Value::Instance(instance) => instance,
                    _ => return Err(self.error("Only instances have fields.")),
                };
                let value = self.eval(value_expr)?;
                instance.borrow_mut().fields.insert(name.clone(), value.clone());
                Ok(value)
            }
            ExprKind::This => self.lookup_variable(expr.id, "this"),
            ExprKind::Super(method_name) => self.eval_super(expr.id, method_name),
        }
    }

    fn lookup_variable(&mut self, id: NodeId, name: &str) -> EvalResult {
        match self.locals.get(&id) {
            Some(&distance) => Ok(environment::get_at(&self.environment, distance, name)),
            None => self
                .globals
                .borrow()
                .get(name)
                .ok_or_else(|| self.error(format!("Undefined variable '{name}'."))),
        }
    }

    fn eval_super(&mut self, id: NodeId, method_name: &str) -> EvalResult {
        let distance = *self
            .locals
            .get(&id)
            .expect("resolver always resolves 'super' inside a subclass method");
        let superclass = environment::get_at(&self.environment, distance, "super");
        let superclass = match superclass {
            Value::Class(class) => class,
            _ => unreachable!("'super' always resolves to a class"),
        };
        let this = environment::get_at(&self.environment, distance - 1, "this");
        let method = superclass
            .find_method(method_name)
            .ok_or_else(|| self.error(format!("Undefined property '{method_name}'.")))?;
        Ok(Value::BoundMethod(Rc::new(TwBoundMethod { receiver: this, method })))
    }

    fn get_property(&mut self, object: &Value, name: &str) -> EvalResult {
        let instance = match object {
            Value::Instance(instance) => instance,
            _ => return Err(self.error("Only instances have properties.")),
        };
        if let Some(value) = instance.borrow().fields.get(name) {
            return Ok(value.clone());
        }
        let class = Rc::clone(&instance.borrow().class);
        if let Some(method) = class.find_method(name) {
            return Ok(Value::BoundMethod(Rc::new(TwBoundMethod {
                receiver: object.clone(),
                method,
            })));
        }
        Err(self.error(format!("Undefined property '{name}'.")))
    }

    fn binary(&self, op: BinaryOp, left: Value, right: Value) -> EvalResult {
        use BinaryOp::*;
        match op {
            Add => match (left, right) {
                (Value::Number(a), Value::Number(b)) => Ok(Value::Number(a + b)),
                (Value::Str(a), Value::Str(b)) => Ok(Value::Str(Rc::from(format!("{a}{b}")))),
                _ => Err(self.error("Operands must be two numbers or two strings.")),
            },
            Subtract => self.arith(left, right, |a, b| a - b),
            Multiply => self.arith(left, right, |a, b| a * b),
            Divide => self.arith(left, right, |a, b| a / b),
            Greater => self.compare(left, right, |a, b| a > b),
            GreaterEqual => self.compare(left, right, |a, b| a >= b),
            Less => self.compare(left, right, |a, b| a < b),
            LessEqual => self.compare(left, right, |a, b| a <= b),
            Equal => Ok(Value::Bool(left == right)),
            NotEqual => Ok(Value::Bool(left != right)),
        }
    }

    fn arith(&self, left: Value, right: Value, f: impl Fn(f64, f64) -> f64) -> EvalResult {
        match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Number(f(a, b))),
            _ => Err(self.error("Operands must be numbers.")),
        }
    }

    fn compare(&self, left: Value, right: Value, f: impl Fn(f64, f64) -> bool) -> EvalResult {
        match (left, right) {
            (Value::Number(a), Value::Number(b)) => Ok(Value::Bool(f(a, b))),
            _ => Err(self.error("Operands must be numbers.")),
        }
    }

    fn call(&mut self, line: usize, callee: &Expr, arg_exprs: &[Expr]) -> EvalResult {
        let callee = self.eval(callee)?;
        let mut args = Vec::with_capacity(arg_exprs.len());
        for arg in arg_exprs {
            args.push(self.eval(arg)?);
        }

        match callee {
            Value::Native(native) => {
                if args.len() != native.arity as usize {
                    return Err(self.error(format!(
                        "Expected {} arguments but got {}.",
                        native.arity,
                        args.len()
                    )));
                }
                (native.function)(&args).map_err(|msg| self.error(msg))
            }
            Value::Function(function) => self.call_function(&function, args, None, line),
            Value::BoundMethod(bound) => {
                self.call_function(&bound.method, args, Some(bound.receiver.clone()), line)
            }
            Value::Class(class) => self.instantiate(&class, args, line),
            _ => Err(self.error("Can only call functions and classes.")),
        }
    }

    fn instantiate(&mut self, class: &Rc<TwClass>, args: Vec<Value>, line: usize) -> EvalResult {
        let instance = Rc::new(RefCell::new(TwInstance {
            class: Rc::clone(class),
            fields: HashMap::new(),
        }));
        if let Some(initializer) = class.find_method("init") {
            self.call_function(
                &initializer,
                args,
                Some(Value::Instance(Rc::clone(&instance))),
                line,
            )?;
        } else if !args.is_empty() {
            return Err(self.error(format!("Expected 0 arguments but got {}.", args.len())));
        }
        Ok(Value::Instance(instance))
    }

    fn call_function(
        &mut self,
        function: &Rc<TwFunction>,
        args: Vec<Value>,
        this: Option<Value>,
        call_line: usize,
    ) -> EvalResult {
        if args.len() != function.decl.params.len() {
            return Err(self.error(format!(
                "Expected {} arguments but got {}.",
                function.decl.params.len(),
                args.len()
            )));
        }

        *self.current_line_mut() = call_line;
        if self.frames.len() >= 255 {
            return Err(self.error("Stack overflow."));
        }

        // Mirrors a bound method's extra environment: when there's a
        // receiver, "this" lives one scope above the parameter scope,
        // matching the extra `beginScope` the resolver gives it.
        let bound_env = match this {
            Some(this) => {
                let env = new_env(Some(Rc::clone(&function.closure)));
                env.borrow_mut().define("this", this);
                env
            }
            None => Rc::clone(&function.closure),
        };

        let call_env = new_env(Some(Rc::clone(&bound_env)));
        for (param, arg) in function.decl.params.iter().zip(args) {
            call_env.borrow_mut().define(param, arg);
        }

        self.frames.push(Frame { name: function.decl.name.clone(), line: function.decl.line });
        let result = self.exec_block(&function.decl.body, call_env);
        self.frames.pop();

        match result? {
            Signal::Return(value) => {
                if function.is_initializer {
                    Ok(environment::get_at(&bound_env, 0, "this"))
                } else {
                    Ok(value)
                }
            }
            Signal::None if function.is_initializer => {
                Ok(environment::get_at(&bound_env, 0, "this"))
            }
            Signal::None => Ok(Value::Nil),
        }
    }
}

fn define_native(env: &Env, name: &'static str, arity: u8, function: NativeFn) {
    env.borrow_mut().define(
        name,
        Value::Native(Rc::new(TwNative { name, arity, function })),
    );
}

fn native_clock(_args: &[Value]) -> Result<Value, String> {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_err(|e| e.to_string())?;
    Ok(Value::Number(now.as_secs_f64()))
}

#[cfg(test)]
mod tests {
    use super::super::parser::Parser;
    use super::super::resolver::Resolver;
    use super::*;

    fn run_and_get(source: &str, global: &str) -> Value {
        let statements = Parser::new(source).parse().expect("source parses");
        let locals = Resolver::new().resolve(&statements).expect("source resolves");
        let mut interpreter = Interpreter::new(locals);
        interpreter.run(&statements).expect("source runs without error");
        interpreter.globals.borrow().get(global).expect("global was defined")
    }

    fn run_err(source: &str) -> RuntimeError {
        let statements = Parser::new(source).parse().expect("source parses");
        let locals = Resolver::new().resolve(&statements).expect("source resolves");
        let mut interpreter = Interpreter::new(locals);
        interpreter.run(&statements).expect_err("source fails at runtime")
    }

    #[test]
    fn evaluates_arithmetic() {
        let value = run_and_get("var result = (1 + 2) * 3 - 4 / 2;", "result");
        assert_eq!(value, Value::Number(7.0));
    }

    #[test]
    fn string_concatenation() {
        let value = run_and_get(r#"var result = "foo" + "bar";"#, "result");
        assert_eq!(value, Value::Str(Rc::from("foobar")));
    }

    #[test]
    fn short_circuits_and_or() {
        let value = run_and_get("var result = false and (1/0 == 1);", "result");
        assert_eq!(value, Value::Bool(false));
        let value = run_and_get("var result = true or (1/0 == 1);", "result");
        assert_eq!(value, Value::Bool(true));
    }

    #[test]
    fn closures_capture_by_reference() {
        let value = run_and_get(
            "fun makeCounter() { var i = 0; fun count() { i = i + 1; return i; } return count; }
             var c = makeCounter();
             c(); c();
             var result = c();",
            "result",
        );
        assert_eq!(value, Value::Number(3.0));
    }

    #[test]
    fn for_loop_desugars_like_while() {
        let value = run_and_get(
            "var result = 0;
             for (var i = 0; i < 5; i = i + 1) { result = result + i; }",
            "result",
        );
        assert_eq!(value, Value::Number(10.0));
    }

    #[test]
    fn classes_bind_methods_and_initializers() {
        let value = run_and_get(
            "class Counter {
                 init() { this.count = 0; }
                 increment() { this.count = this.count + 1; return this.count; }
             }
             var c = Counter();
             c.increment();
             var result = c.increment();",
            "result",
        );
        assert_eq!(value, Value::Number(2.0));
    }

    #[test]
    fn superclass_dispatch_prefers_subclass_override() {
        let value = run_and_get(
            r#"class A {
                 say() { return "A"; }
             }
             class B < A {
                 say() { return super.say() + "B"; }
             }
             var result = B().say();"#,
            "result",
        );
        assert_eq!(value, Value::Str(Rc::from("AB")));
    }

    #[test]
    fn calling_a_number_is_a_runtime_error() {
        let err = run_err("var x = 1; x();");
        assert!(err.message.contains("Can only call"));
    }

    #[test]
    fn undefined_variable_is_a_runtime_error() {
        let err = run_err("print nope;");
        assert!(err.message.contains("Undefined variable"));
    }
}
