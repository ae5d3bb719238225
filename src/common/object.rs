//! Heap object payloads. Every variant here is stored behind a `Gc`
//! (see `crate::gc`), which supplies the common header (mark bit,
//! intrusive sweep-list link) that the collector needs regardless of
//! payload kind.

use std::cell::RefCell;

use crate::common::chunk::Chunk;
use crate::common::table::Table;
use crate::common::value::Value;
use crate::gc::Gc;

/// FNV-1a, 32-bit. Used both to hash interned strings for the table
/// in `common::table` and as the cached hash stored alongside each
/// `LoxString`'s bytes.
pub fn fnv1a(bytes: &[u8]) -> u32 {
    const OFFSET_BASIS: u32 = 2166136261;
    const PRIME: u32 = 16777619;

    let mut hash = OFFSET_BASIS;
    for &b in bytes {
        hash ^= b as u32;
        hash = hash.wrapping_mul(PRIME);
    }
    hash
}

/// An immutable, interned byte sequence. Two `LoxString`s with equal
/// bytes are always the same heap object (see `gc::Heap::intern`), so
/// string equality elsewhere in the VM is pointer equality.
#[derive(Debug)]
pub struct LoxString {
    pub bytes: Box<str>,
    pub hash: u32,
}

impl LoxString {
    pub fn new(bytes: impl Into<Box<str>>) -> LoxString {
        let bytes = bytes.into();
        let hash = fnv1a(bytes.as_bytes());
        LoxString { bytes, hash }
    }
}

/// A compiled function body: its arity, how many upvalues its
/// closures must capture, the bytecode itself, and an optional name
/// (absent for the implicit top-level script function).
#[derive(Debug)]
pub struct LoxFunction {
    pub arity: u8,
    pub upvalue_count: usize,
    pub chunk: Chunk,
    pub name: Option<Gc>,
}

impl LoxFunction {
    pub fn new(name: Option<Gc>) -> LoxFunction {
        LoxFunction {
            arity: 0,
            upvalue_count: 0,
            chunk: Chunk::new(),
            name,
        }
    }
}

/// A host-provided callable, e.g. `clock`.
pub type NativeFn = fn(args: &[Value]) -> Result<Value, String>;

pub struct NativeFunction {
    pub name: &'static str,
    pub arity: u8,
    pub function: NativeFn,
}

impl std::fmt::Debug for NativeFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "NativeFunction({})", self.name)
    }
}

/// Either open — still pointing at a live slot on the VM's value
/// stack, identified by index — or closed, owning a `Value` that has
/// been moved off the stack because the frame that declared it has
/// returned.
#[derive(Debug, Clone, Copy)]
pub enum UpvalueState {
    Open(usize),
    Closed(Value),
}

#[derive(Debug)]
pub struct ObjUpvalue {
    pub state: RefCell<UpvalueState>,
}

impl ObjUpvalue {
    pub fn new(stack_index: usize) -> ObjUpvalue {
        ObjUpvalue {
            state: RefCell::new(UpvalueState::Open(stack_index)),
        }
    }
}

/// A `LoxFunction` paired with the upvalues its body closes over. This
/// is the value that actually gets called; bare `LoxFunction`s are
/// never directly callable.
#[derive(Debug)]
pub struct LoxClosure {
    pub function: Gc,
    pub upvalues: Vec<Gc>,
}

/// A class: its name and a method table mapping method-name strings
/// to `Closure` values. Instantiating a class allocates a fresh
/// `LoxInstance`; methods are looked up through the class, not copied
/// onto the instance (except when a subclass inherits them, which
/// does copy method-table entries — see `INHERIT`).
#[derive(Debug)]
pub struct LoxClass {
    pub name: Gc,
    pub methods: RefCell<Table<Value>>,
}

impl LoxClass {
    pub fn new(name: Gc) -> LoxClass {
        LoxClass {
            name,
            methods: RefCell::new(Table::new()),
        }
    }
}

/// An instance of some class, with its own field map independent of
/// any other instance of the same class.
#[derive(Debug)]
pub struct LoxInstance {
    pub class: Gc,
    pub fields: RefCell<Table<Value>>,
}

impl LoxInstance {
    pub fn new(class: Gc) -> LoxInstance {
        LoxInstance {
            class,
            fields: RefCell::new(Table::new()),
        }
    }
}

/// A method closure bound to the receiver it was accessed through.
/// Binding happens at property-access time, not at call time, so two
/// accesses of the same method on the same instance produce two
/// `BoundMethod`s whose receivers compare equal but which are distinct
/// heap objects.
#[derive(Debug)]
pub struct LoxBoundMethod {
    pub receiver: Value,
    pub method: Gc,
}

/// The tagged union of everything that can live on the heap.
#[derive(Debug)]
pub enum ObjKind {
    Str(LoxString),
    Function(LoxFunction),
    Native(NativeFunction),
    Closure(LoxClosure),
    Upvalue(ObjUpvalue),
    Class(LoxClass),
    Instance(LoxInstance),
    BoundMethod(LoxBoundMethod),
}

impl ObjKind {
    pub fn type_name(&self) -> &'static str {
        match self {
            ObjKind::Str(_) => "string",
            ObjKind::Function(_) => "function",
            ObjKind::Native(_) => "native function",
            ObjKind::Closure(_) => "function",
            ObjKind::Upvalue(_) => "upvalue",
            ObjKind::Class(_) => "class",
            ObjKind::Instance(_) => "instance",
            ObjKind::BoundMethod(_) => "bound method",
        }
    }
}
