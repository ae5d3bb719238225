//! The stack-based bytecode interpreter. `Vm::interpret` wraps a
//! freshly compiled script function in a closure and runs it to
//! completion; `Vm::new`/`heap_mut` let the REPL reuse one `Vm` (and
//! thus one global environment and one heap) across many calls.

use crate::common::chunk::OpCode;
use crate::common::object::{
    LoxBoundMethod, LoxClosure, LoxInstance, NativeFn, NativeFunction, ObjUpvalue, UpvalueState,
};
use crate::common::object::ObjKind;
use crate::common::table::Table;
use crate::common::value::Value;
use crate::diagnostics::{RuntimeError, TraceFrame};
use crate::gc::{Gc, GcRoots, Heap};

const FRAMES_MAX: usize = 64;
const STACK_MAX: usize = FRAMES_MAX * (u8::MAX as usize + 1);

struct CallFrame {
    closure: Gc,
    ip: usize,
    /// Index into `Vm::stack` of this frame's slot 0 (the callee
    /// itself, doubling as `this` for methods).
    slot_base: usize,
}

pub struct Vm {
    heap: Heap,
    frames: Vec<CallFrame>,
    stack: Vec<Value>,
    globals: Table<Value>,
    open_upvalues: Vec<Gc>,
    init_string: Gc,
}

impl Vm {
    pub fn new(mut heap: Heap) -> Vm {
        let init_string = heap.intern("init");
        let mut vm = Vm {
            heap,
            frames: Vec::with_capacity(FRAMES_MAX),
            stack: Vec::with_capacity(STACK_MAX),
            globals: Table::new(),
            open_upvalues: Vec::new(),
            init_string,
        };
        vm.define_native("clock", 0, native_clock);
        vm
    }

    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    pub fn interpret(&mut self, function: Gc) -> Result<(), RuntimeError> {
        let closure = self
            .heap
            .allocate(ObjKind::Closure(LoxClosure { function, upvalues: Vec::new() }));
        self.stack.push(Value::Obj(closure));
        self.call(closure, 0)?;
        self.run()
    }

    fn define_native(&mut self, name: &'static str, arity: u8, function: NativeFn) {
        let native = self.heap.allocate(ObjKind::Native(NativeFunction { name, arity, function }));
        let name_gc = self.heap.intern(name);
        self.globals.put(name_gc, Value::Obj(native));
    }

    // ---- bytecode stream ------------------------------------------------

    fn read_byte(&mut self) -> u8 {
        let idx = self.frames.len() - 1;
        let closure = self.frames[idx].closure;
        let ip = self.frames[idx].ip;
        let byte = match closure.kind() {
            ObjKind::Closure(c) => match c.function.kind() {
                ObjKind::Function(f) => f.chunk.code[ip],
                _ => unreachable!("closure must wrap a function"),
            },
            _ => unreachable!("frame must hold a closure"),
        };
        self.frames[idx].ip += 1;
        byte
    }

    fn read_u16(&mut self) -> u16 {
        let hi = self.read_byte();
        let lo = self.read_byte();
        ((hi as u16) << 8) | lo as u16
    }

    fn read_constant(&mut self) -> Value {
        let slot = self.read_byte();
        let idx = self.frames.len() - 1;
        let closure = self.frames[idx].closure;
        match closure.kind() {
            ObjKind::Closure(c) => match c.function.kind() {
                ObjKind::Function(f) => f.chunk.constants[slot as usize],
                _ => unreachable!(),
            },
            _ => unreachable!(),
        }
    }

    fn current_line(&self) -> usize {
        let idx = self.frames.len() - 1;
        let closure = self.frames[idx].closure;
        let ip = self.frames[idx].ip;
        match closure.kind() {
            ObjKind::Closure(c) => match c.function.kind() {
                ObjKind::Function(f) => f.chunk.line_at(ip.saturating_sub(1)),
                _ => unreachable!(),
            },
            _ => unreachable!(),
        }
    }

    /// Disassembles the instruction about to execute, stderr, for
    /// `LOXCRAFT_TRACE`.
    fn trace_instruction(&self) {
        let idx = self.frames.len() - 1;
        let closure = self.frames[idx].closure;
        let ip = self.frames[idx].ip;
        match closure.kind() {
            ObjKind::Closure(c) => match c.function.kind() {
                ObjKind::Function(f) => {
                    crate::debug::disassemble_instruction(&f.chunk, ip);
                }
                _ => unreachable!(),
            },
            _ => unreachable!(),
        }
    }

    // ---- stack ------------------------------------------------------------

    fn peek(&self, distance: usize) -> Value {
        self.stack[self.stack.len() - 1 - distance]
    }

    // ---- GC integration -----------------------------------------------------

    fn maybe_collect(&mut self) {
        if !self.heap.should_collect() {
            return;
        }
        let frame_closures: Vec<Gc> = self.frames.iter().map(|f| f.closure).collect();
        let extra = [self.init_string];
        self.heap.collect(GcRoots {
            stack: &self.stack,
            frame_closures: &frame_closures,
            globals: &self.globals,
            open_upvalues: &self.open_upvalues,
            extra: &extra,
        });
    }

    // ---- errors -------------------------------------------------------------

    fn build_trace(&self) -> Vec<TraceFrame> {
        self.frames
            .iter()
            .rev()
            .map(|frame| {
                let closure = frame.closure;
                let (line, name) = match closure.kind() {
                    ObjKind::Closure(c) => match c.function.kind() {
                        ObjKind::Function(f) => {
                            let line = f.chunk.line_at(frame.ip.saturating_sub(1));
                            let name = match f.name {
                                Some(n) => n.as_str().to_string(),
                                None => "script".to_string(),
                            };
                            (line, name)
                        }
                        _ => unreachable!(),
                    },
                    _ => unreachable!(),
                };
                TraceFrame { line, function_name: name }
            })
            .collect()
    }

    fn runtime_error(&mut self, message: impl Into<String>) -> RuntimeError {
        RuntimeError::new(message, self.build_trace())
    }

    // ---- calling ------------------------------------------------------------

    fn call(&mut self, closure: Gc, arg_count: u8) -> Result<(), RuntimeError> {
        let arity = match closure.kind() {
            ObjKind::Closure(c) => match c.function.kind() {
                ObjKind::Function(f) => f.arity,
                _ => unreachable!(),
            },
            _ => unreachable!(),
        };
        if arg_count != arity {
            return Err(self.runtime_error(format!(
                "Expected {arity} arguments but got {arg_count}."
            )));
        }
        if self.frames.len() >= FRAMES_MAX {
            return Err(self.runtime_error("Stack overflow."));
        }
        let slot_base = self.stack.len() - arg_count as usize - 1;
        self.frames.push(CallFrame { closure, ip: 0, slot_base });
        Ok(())
    }

    fn call_value(&mut self, callee: Value, arg_count: u8) -> Result<(), RuntimeError> {
        match classify(callee) {
            Callable::Closure(closure) => self.call(closure, arg_count),
            Callable::Native(function) => {
                let start = self.stack.len() - arg_count as usize;
                let args: Vec<Value> = self.stack[start..].to_vec();
                match function(&args) {
                    Ok(result) => {
                        self.stack.truncate(start - 1);
                        self.stack.push(result);
                        Ok(())
                    }
                    Err(message) => Err(self.runtime_error(message)),
                }
            }
            Callable::Class(class) => {
                self.maybe_collect();
                let instance = self.heap.allocate(ObjKind::Instance(LoxInstance::new(class)));
                let slot = self.stack.len() - arg_count as usize - 1;
                self.stack[slot] = Value::Obj(instance);
                match find_method(class, self.init_string) {
                    Some(initializer) => self.call(initializer, arg_count),
                    None if arg_count != 0 => Err(self.runtime_error(format!(
                        "Expected 0 arguments but got {arg_count}."
                    ))),
                    None => Ok(()),
                }
            }
            Callable::Bound { method, receiver } => {
                let slot = self.stack.len() - arg_count as usize - 1;
                self.stack[slot] = receiver;
                self.call(method, arg_count)
            }
            Callable::NotCallable => {
                Err(self.runtime_error("Can only call functions and classes."))
            }
        }
    }

    fn capture_upvalue(&mut self, stack_index: usize) -> Gc {
        for &uv in &self.open_upvalues {
            if let ObjKind::Upvalue(u) = uv.kind() {
                if let UpvalueState::Open(idx) = *u.state.borrow() {
                    if idx == stack_index {
                        return uv;
                    }
                }
            }
        }
        self.maybe_collect();
        let created = self.heap.allocate(ObjKind::Upvalue(ObjUpvalue::new(stack_index)));
        self.open_upvalues.push(created);
        created
    }

    fn close_upvalues(&mut self, from: usize) {
        let mut i = 0;
        while i < self.open_upvalues.len() {
            let uv = self.open_upvalues[i];
            let open_idx = match uv.kind() {
                ObjKind::Upvalue(u) => match *u.state.borrow() {
                    UpvalueState::Open(idx) => Some(idx),
                    UpvalueState::Closed(_) => None,
                },
                _ => unreachable!(),
            };
            match open_idx {
                Some(idx) if idx >= from => {
                    let value = self.stack[idx];
                    if let ObjKind::Upvalue(u) = uv.kind() {
                        *u.state.borrow_mut() = UpvalueState::Closed(value);
                    }
                    self.open_upvalues.remove(i);
                }
                _ => i += 1,
            }
        }
    }

    // ---- the interpreter loop -------------------------------------------------

    fn run(&mut self) -> Result<(), RuntimeError> {
        loop {
            if std::env::var_os("LOXCRAFT_TRACE").is_some() {
                self.trace_instruction();
            }

            let op = OpCode::from_u8(self.read_byte()).expect("compiler only emits valid opcodes");
            match op {
                OpCode::Constant => {
                    let value = self.read_constant();
                    self.stack.push(value);
                }
                OpCode::Nil => self.stack.push(Value::Nil),
                OpCode::True => self.stack.push(Value::Bool(true)),
                OpCode::False => self.stack.push(Value::Bool(false)),
                OpCode::Pop => {
                    self.stack.pop();
                }
                OpCode::GetLocal => {
                    let slot = self.read_byte();
                    let base = self.frames[self.frames.len() - 1].slot_base;
                    self.stack.push(self.stack[base + slot as usize]);
                }
                OpCode::SetLocal => {
                    let slot = self.read_byte();
                    let base = self.frames[self.frames.len() - 1].slot_base;
                    self.stack[base + slot as usize] = self.peek(0);
                }
                OpCode::GetUpvalue => {
                    let slot = self.read_byte();
                    let frame_idx = self.frames.len() - 1;
                    let closure = self.frames[frame_idx].closure;
                    let uv = upvalue_at(closure, slot);
                    let value = match uv.kind() {
                        ObjKind::Upvalue(u) => match *u.state.borrow() {
                            UpvalueState::Open(idx) => self.stack[idx],
                            UpvalueState::Closed(v) => v,
                        },
                        _ => unreachable!(),
                    };
                    self.stack.push(value);
                }
                OpCode::SetUpvalue => {
                    let slot = self.read_byte();
                    let frame_idx = self.frames.len() - 1;
                    let closure = self.frames[frame_idx].closure;
                    let uv = upvalue_at(closure, slot);
                    let value = self.peek(0);
                    let currently_open = match uv.kind() {
                        ObjKind::Upvalue(u) => match *u.state.borrow() {
                            UpvalueState::Open(idx) => Some(idx),
                            UpvalueState::Closed(_) => None,
                        },
                        _ => unreachable!(),
                    };
                    match currently_open {
                        Some(idx) => self.stack[idx] = value,
                        None => {
                            if let ObjKind::Upvalue(u) = uv.kind() {
                                *u.state.borrow_mut() = UpvalueState::Closed(value);
                            }
                        }
                    }
                }
                OpCode::GetGlobal => {
                    let name = self.read_constant().as_gc().expect("global name must be a string");
                    match self.globals.get(name) {
                        Some(value) => {
                            let value = *value;
                            self.stack.push(value);
                        }
                        None => {
                            let name = name.as_str().to_string();
                            return Err(self.runtime_error(format!("Undefined variable '{name}'.")));
                        }
                    }
                }
                OpCode::SetGlobal => {
                    let name = self.read_constant().as_gc().expect("global name must be a string");
                    let value = self.peek(0);
                    if self.globals.get(name).is_none() {
                        let name = name.as_str().to_string();
                        return Err(self.runtime_error(format!("Undefined variable '{name}'.")));
                    }
                    self.globals.put(name, value);
                }
                OpCode::DefineGlobal => {
                    let name = self.read_constant().as_gc().expect("global name must be a string");
                    let value = self.stack.pop().expect("value for global definition");
                    self.globals.put(name, value);
                }
                OpCode::GetProperty => {
                    let name = self.read_constant().as_gc().expect("property name must be a string");
                    let receiver = self.peek(0);
                    let instance_gc = match receiver.as_gc() {
                        Some(gc) if is_instance(gc) => gc,
                        _ => return Err(self.runtime_error("Only instances have properties.")),
                    };
                    let (class, field) = instance_field(instance_gc, name);
                    if let Some(value) = field {
                        self.stack.pop();
                        self.stack.push(value);
                    } else if let Some(method) = find_method(class, name) {
                        self.stack.pop();
                        self.maybe_collect();
                        let bound = self
                            .heap
                            .allocate(ObjKind::BoundMethod(LoxBoundMethod { receiver, method }));
                        self.stack.push(Value::Obj(bound));
                    } else {
                        let name = name.as_str().to_string();
                        return Err(self.runtime_error(format!("Undefined property '{name}'.")));
                    }
                }
                OpCode::SetProperty => {
                    let name = self.read_constant().as_gc().expect("property name must be a string");
                    let value = self.peek(0);
                    let receiver = self.peek(1);
                    let instance_gc = match receiver.as_gc() {
                        Some(gc) if is_instance(gc) => gc,
                        _ => return Err(self.runtime_error("Only instances have fields.")),
                    };
                    if let ObjKind::Instance(i) = instance_gc.kind() {
                        i.fields.borrow_mut().put(name, value);
                    }
                    self.stack.pop();
                    self.stack.pop();
                    self.stack.push(value);
                }
                OpCode::GetSuper => {
                    let name = self.read_constant().as_gc().expect("method name must be a string");
                    let superclass = self
                        .stack
                        .pop()
                        .and_then(|v| v.as_gc())
                        .expect("GET_SUPER operand must be a class");
                    let receiver = self.stack.pop().expect("GET_SUPER receiver");
                    match find_method(superclass, name) {
                        Some(method) => {
                            self.maybe_collect();
                            let bound = self
                                .heap
                                .allocate(ObjKind::BoundMethod(LoxBoundMethod { receiver, method }));
                            self.stack.push(Value::Obj(bound));
                        }
                        None => {
                            let name = name.as_str().to_string();
                            return Err(self.runtime_error(format!("Undefined property '{name}'.")));
                        }
                    }
                }
                OpCode::Equal => {
                    let b = self.stack.pop().expect("rhs for ==");
                    let a = self.stack.pop().expect("lhs for ==");
                    self.stack.push(Value::Bool(a == b));
                }
                OpCode::Greater => self.number_compare(|a, b| a > b)?,
                OpCode::Less => self.number_compare(|a, b| a < b)?,
                OpCode::Add => {
                    let b = self.stack.pop().expect("rhs for +");
                    let a = self.stack.pop().expect("lhs for +");
                    match (a, b) {
                        (Value::Number(x), Value::Number(y)) => {
                            self.stack.push(Value::Number(x + y));
                        }
                        (Value::Obj(ga), Value::Obj(gb)) if is_string(ga) && is_string(gb) => {
                            let mut concatenated = String::with_capacity(
                                ga.as_str().len() + gb.as_str().len(),
                            );
                            concatenated.push_str(ga.as_str());
                            concatenated.push_str(gb.as_str());
                            self.maybe_collect();
                            let gc = self.heap.intern(&concatenated);
                            self.stack.push(Value::Obj(gc));
                        }
                        _ => {
                            return Err(
                                self.runtime_error("Operands must be two numbers or two strings.")
                            )
                        }
                    }
                }
                OpCode::Subtract => self.number_binary(|a, b| a - b)?,
                OpCode::Multiply => self.number_binary(|a, b| a * b)?,
                OpCode::Divide => self.number_binary(|a, b| a / b)?,
                OpCode::Not => {
                    let value = self.stack.pop().expect("operand for !");
                    self.stack.push(Value::Bool(!value.is_truthy()));
                }
                OpCode::Negate => {
                    let value = self.stack.pop().expect("operand for unary -");
                    match value.as_number() {
                        Some(n) => self.stack.push(Value::Number(-n)),
                        None => return Err(self.runtime_error("Operand must be a number.")),
                    }
                }
                OpCode::Print => {
                    let value = self.stack.pop().expect("value for print");
                    println!("{value}");
                }
                OpCode::Jump => {
                    let offset = self.read_u16();
                    self.frames[self.frames.len() - 1].ip += offset as usize;
                }
                OpCode::JumpIfFalse => {
                    let offset = self.read_u16();
                    if !self.peek(0).is_truthy() {
                        self.frames[self.frames.len() - 1].ip += offset as usize;
                    }
                }
                OpCode::Loop => {
                    let offset = self.read_u16();
                    self.frames[self.frames.len() - 1].ip -= offset as usize;
                }
                OpCode::Call => {
                    let arg_count = self.read_byte();
                    let callee = self.peek(arg_count as usize);
                    self.call_value(callee, arg_count)?;
                }
                OpCode::Invoke => {
                    let name = self.read_constant().as_gc().expect("method name must be a string");
                    let arg_count = self.read_byte();
                    let receiver = self.peek(arg_count as usize);
                    let instance_gc = match receiver.as_gc() {
                        Some(gc) if is_instance(gc) => gc,
                        _ => return Err(self.runtime_error("Only instances have methods.")),
                    };
                    let (class, field) = instance_field(instance_gc, name);
                    if let Some(value) = field {
                        let slot = self.stack.len() - arg_count as usize - 1;
                        self.stack[slot] = value;
                        self.call_value(value, arg_count)?;
                    } else {
                        match find_method(class, name) {
                            Some(method) => self.call(method, arg_count)?,
                            None => {
                                let name = name.as_str().to_string();
                                return Err(
                                    self.runtime_error(format!("Undefined property '{name}'."))
                                );
                            }
                        }
                    }
                }
                OpCode::SuperInvoke => {
                    let name = self.read_constant().as_gc().expect("method name must be a string");
                    let arg_count = self.read_byte();
                    let superclass = self
                        .stack
                        .pop()
                        .and_then(|v| v.as_gc())
                        .expect("SUPER_INVOKE operand must be a class");
                    match find_method(superclass, name) {
                        Some(method) => self.call(method, arg_count)?,
                        None => {
                            let name = name.as_str().to_string();
                            return Err(self.runtime_error(format!("Undefined property '{name}'.")));
                        }
                    }
                }
                OpCode::Closure => {
                    let function_gc = self
                        .read_constant()
                        .as_gc()
                        .expect("CLOSURE operand must be a function");
                    let upvalue_count = match function_gc.kind() {
                        ObjKind::Function(f) => f.upvalue_count,
                        _ => unreachable!(),
                    };
                    let mut upvalues = Vec::with_capacity(upvalue_count);
                    for _ in 0..upvalue_count {
                        let is_local = self.read_byte() != 0;
                        let index = self.read_byte();
                        let frame_idx = self.frames.len() - 1;
                        if is_local {
                            let stack_index = self.frames[frame_idx].slot_base + index as usize;
                            upvalues.push(self.capture_upvalue(stack_index));
                        } else {
                            let enclosing = self.frames[frame_idx].closure;
                            upvalues.push(upvalue_at(enclosing, index));
                        }
                    }
                    self.maybe_collect();
                    let closure = self
                        .heap
                        .allocate(ObjKind::Closure(LoxClosure { function: function_gc, upvalues }));
                    self.stack.push(Value::Obj(closure));
                }
                OpCode::CloseUpvalue => {
                    let idx = self.stack.len() - 1;
                    self.close_upvalues(idx);
                    self.stack.pop();
                }
                OpCode::Return => {
                    let result = self.stack.pop().expect("value for return");
                    let frame = self.frames.pop().expect("frame for return");
                    self.close_upvalues(frame.slot_base);
                    self.stack.truncate(frame.slot_base);
                    if self.frames.is_empty() {
                        self.stack.pop();
                        return Ok(());
                    }
                    self.stack.push(result);
                }
                OpCode::Class => {
                    let name = self.read_constant().as_gc().expect("class name must be a string");
                    self.maybe_collect();
                    let class = self
                        .heap
                        .allocate(ObjKind::Class(crate::common::object::LoxClass::new(name)));
                    self.stack.push(Value::Obj(class));
                }
                OpCode::Inherit => {
                    let superclass_val = self.peek(1);
                    let subclass_val = self.peek(0);
                    let superclass_gc = match superclass_val.as_gc() {
                        Some(gc) if is_class(gc) => gc,
                        _ => return Err(self.runtime_error("Superclass must be a class.")),
                    };
                    let subclass_gc = subclass_val.as_gc().expect("subclass must be a class object");
                    copy_methods(superclass_gc, subclass_gc);
                    self.stack.pop();
                }
                OpCode::Method => {
                    let name = self.read_constant().as_gc().expect("method name must be a string");
                    let method = self.stack.pop().expect("method closure");
                    let class_val = self.peek(0);
                    let class_gc = class_val.as_gc().expect("class operand for METHOD");
                    if let ObjKind::Class(c) = class_gc.kind() {
                        c.methods.borrow_mut().put(name, method);
                    }
                }
            }
        }
    }

    fn number_binary(&mut self, op: impl Fn(f64, f64) -> f64) -> Result<(), RuntimeError> {
        let b = self.stack.pop().expect("rhs operand");
        let a = self.stack.pop().expect("lhs operand");
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => {
                self.stack.push(Value::Number(op(x, y)));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be numbers.")),
        }
    }

    fn number_compare(&mut self, op: impl Fn(f64, f64) -> bool) -> Result<(), RuntimeError> {
        let b = self.stack.pop().expect("rhs operand");
        let a = self.stack.pop().expect("lhs operand");
        match (a.as_number(), b.as_number()) {
            (Some(x), Some(y)) => {
                self.stack.push(Value::Bool(op(x, y)));
                Ok(())
            }
            _ => Err(self.runtime_error("Operands must be numbers.")),
        }
    }
}

enum Callable {
    Closure(Gc),
    Native(NativeFn),
    Class(Gc),
    Bound { method: Gc, receiver: Value },
    NotCallable,
}

fn classify(value: Value) -> Callable {
    match value {
        Value::Obj(gc) => match gc.kind() {
            ObjKind::Closure(_) => Callable::Closure(gc),
            ObjKind::Native(n) => Callable::Native(n.function),
            ObjKind::Class(_) => Callable::Class(gc),
            ObjKind::BoundMethod(b) => Callable::Bound { method: b.method, receiver: b.receiver },
            _ => Callable::NotCallable,
        },
        _ => Callable::NotCallable,
    }
}

fn is_string(gc: Gc) -> bool {
    matches!(gc.kind(), ObjKind::Str(_))
}

fn is_instance(gc: Gc) -> bool {
    matches!(gc.kind(), ObjKind::Instance(_))
}

fn is_class(gc: Gc) -> bool {
    matches!(gc.kind(), ObjKind::Class(_))
}

fn find_method(class: Gc, name: Gc) -> Option<Gc> {
    match class.kind() {
        ObjKind::Class(c) => c.methods.borrow().get(name).and_then(|v| v.as_gc()),
        _ => None,
    }
}

/// Returns the instance's class plus its own field value for `name`,
/// if it has one (fields shadow methods of the same name).
fn instance_field(instance: Gc, name: Gc) -> (Gc, Option<Value>) {
    match instance.kind() {
        ObjKind::Instance(i) => (i.class, i.fields.borrow().get(name).copied()),
        _ => unreachable!("instance_field called on a non-instance"),
    }
}

fn upvalue_at(closure: Gc, slot: u8) -> Gc {
    match closure.kind() {
        ObjKind::Closure(c) => c.upvalues[slot as usize],
        _ => unreachable!("upvalue_at called on a non-closure"),
    }
}

fn copy_methods(superclass: Gc, subclass: Gc) {
    match (superclass.kind(), subclass.kind()) {
        (ObjKind::Class(sup), ObjKind::Class(sub)) => {
            sub.methods.borrow_mut().copy_all_from(&sup.methods.borrow());
        }
        _ => unreachable!("INHERIT operands must both be classes"),
    }
}

fn native_clock(_args: &[Value]) -> Result<Value, String> {
    use std::time::{SystemTime, UNIX_EPOCH};
    let secs = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs_f64())
        .unwrap_or(0.0);
    Ok(Value::Number(secs))
}

#[cfg(test)]
mod tests {
    use std::rc::Rc;

    use crate::common::source::Source;

    use super::*;

    fn run_and_get(source: &str, name: &str) -> Value {
        let mut heap = Heap::new();
        let function = crate::compiler::compile(Rc::new(Source::repl(source)), &mut heap)
            .expect("source compiles");
        let mut vm = Vm::new(heap);
        vm.interpret(function).expect("source runs without error");
        let key = vm.heap_mut().intern(name);
        *vm.globals.get(key).expect("global was defined")
    }

    fn run_err(source: &str) -> RuntimeError {
        let mut heap = Heap::new();
        let function = crate::compiler::compile(Rc::new(Source::repl(source)), &mut heap)
            .expect("source compiles");
        let mut vm = Vm::new(heap);
        vm.interpret(function).expect_err("source fails at runtime")
    }

    #[test]
    fn evaluates_arithmetic() {
        let value = run_and_get("var result = (1 + 2) * 3 - 4 / 2;", "result");
        assert_eq!(value, Value::Number(7.0));
    }

    #[test]
    fn closures_capture_upvalues_by_reference() {
        let value = run_and_get(
            "fun makeCounter() {
                 var i = 0;
                 fun count() { i = i + 1; return i; }
                 return count;
             }
             var c = makeCounter();
             c(); c();
             var result = c();",
            "result",
        );
        assert_eq!(value, Value::Number(3.0));
    }

    #[test]
    fn superclass_dispatch_matches_tree_walker() {
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
        match value {
            Value::Obj(gc) => match gc.kind() {
                ObjKind::Str(s) => assert_eq!(s.bytes.as_ref(), "AB"),
                _ => panic!("expected a string"),
            },
            _ => panic!("expected a string"),
        }
    }

    #[test]
    fn calling_a_non_callable_is_a_runtime_error() {
        let err = run_err("var x = 1; x();");
        assert!(err.message.contains("Can only call"));
    }

    #[test]
    fn undefined_global_is_a_runtime_error() {
        let err = run_err("print nope;");
        assert!(err.message.contains("Undefined variable"));
    }

    #[test]
    fn stack_overflow_on_unbounded_recursion() {
        let err = run_err("fun recurse() { return recurse(); } recurse();");
        assert!(err.message.contains("Stack overflow"));
    }

    /// Forcing a collection on every single allocation must not free
    /// anything still reachable from the stack, globals, frames, or
    /// open upvalues: the program's result should be identical to a
    /// run with collection left at its normal, lazy threshold.
    #[test]
    fn stress_gc_does_not_collect_live_data() {
        let source = "class Node {
             init(value, next) { this.value = value; this.next = next; }
         }
         fun sum(node) {
             if (node == nil) return 0;
             return node.value + sum(node.next);
         }
         var list = nil;
         for (var i = 0; i < 50; i = i + 1) {
             list = Node(i, list);
         }
         fun makeAdder(n) {
             fun add(x) { return x + n; }
             return add;
         }
         var add10 = makeAdder(10);
         var result = sum(list) + add10(5);";

        let mut heap = Heap::new();
        heap.stress = true;
        let function = crate::compiler::compile(Rc::new(Source::repl(source)), &mut heap)
            .expect("source compiles");
        let mut vm = Vm::new(heap);
        vm.interpret(function).expect("source runs without error");
        let key = vm.heap_mut().intern("result");
        assert_eq!(*vm.globals.get(key).expect("global was defined"), Value::Number(1240.0));
    }
}
