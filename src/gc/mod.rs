//! The heap and the tri-color mark-sweep collector.
//!
//! Every Lox heap object is allocated individually with
//! [`Heap::allocate`] and threaded onto an intrusive, singly linked
//! list (`Obj::next`) so that sweeping can walk and free objects
//! without needing a separate index. [`Gc`] is a `Copy` handle into
//! that list; dereferencing one is the only unsafe operation this
//! module exposes, and it is sound as long as the collector is only
//! ever invoked with a complete root set (see [`GcRoots`]).

use std::cell::Cell;
use std::hash::{Hash, Hasher};
use std::ptr::NonNull;

use tracing::trace;

use crate::common::object::{fnv1a, LoxString, ObjKind, UpvalueState};
use crate::common::table::Table;
use crate::common::value::Value;

/// Collection runs once bytes-allocated exceeds `next_gc`; after each
/// collection `next_gc` is reset to `bytes_allocated * GROW_FACTOR`.
const GROW_FACTOR: usize = 2;
const INITIAL_NEXT_GC: usize = 1024 * 1024;

struct Obj {
    marked: Cell<bool>,
    next: Cell<Option<NonNull<Obj>>>,
    kind: ObjKind,
}

/// A handle to a heap-allocated object. Cheap to copy; equality and
/// hashing are by address, matching Lox's reference-identity
/// semantics for every heap type except strings (which are interned,
/// so reference identity and value identity coincide).
#[derive(Clone, Copy)]
pub struct Gc(NonNull<Obj>);

impl Gc {
    pub fn kind(&self) -> &ObjKind {
        // SAFETY: a `Gc` is only ever constructed by `Heap::allocate` or
        // copied from an existing `Gc`, and the collector never frees an
        // object reachable from a root set passed to `Heap::collect`.
        unsafe { &self.0.as_ref().kind }
    }

    fn is_marked(&self) -> bool {
        unsafe { self.0.as_ref().marked.get() }
    }

    fn set_marked(&self, marked: bool) {
        unsafe { self.0.as_ref().marked.set(marked) }
    }

    /// Panics if this object isn't a string; only ever called on keys
    /// of a `Table`, which by construction are always interned
    /// strings.
    pub fn hash(&self) -> u32 {
        match self.kind() {
            ObjKind::Str(s) => s.hash,
            other => panic!("table key was not a string: {}", other.type_name()),
        }
    }

    pub fn as_str(&self) -> &str {
        match self.kind() {
            ObjKind::Str(s) => &s.bytes,
            other => panic!("expected string, found {}", other.type_name()),
        }
    }

    pub fn as_str_hash(&self) -> u32 {
        self.hash()
    }
}

impl PartialEq for Gc {
    fn eq(&self, other: &Gc) -> bool {
        self.0 == other.0
    }
}
impl Eq for Gc {}

impl Hash for Gc {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.0.as_ptr().hash(state)
    }
}

impl std::fmt::Debug for Gc {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Gc({:p} -> {:?})", self.0.as_ptr(), self.kind())
    }
}

/// Every place a live object might be referenced from, gathered right
/// before a collection so that `Heap::collect` can mark them all
/// before tracing. Any heap object not reachable from one of these is
/// garbage.
pub struct GcRoots<'a> {
    pub stack: &'a [Value],
    pub frame_closures: &'a [Gc],
    pub globals: &'a Table<Value>,
    pub open_upvalues: &'a [Gc],
    /// Anything else that must survive: the compiler's chain of
    /// in-progress `LoxFunction`s, the interned `"init"` string, etc.
    pub extra: &'a [Gc],
}

pub struct Heap {
    head: Option<NonNull<Obj>>,
    bytes_allocated: usize,
    next_gc: usize,
    gray: Vec<Gc>,
    strings: Table<()>,
    /// Forces a collection on every allocation; set from
    /// `LOXCRAFT_STRESS_GC` so the "GC soundness" property in the
    /// test suite can be exercised without a separate build.
    pub stress: bool,
}

impl Heap {
    pub fn new() -> Heap {
        Heap {
            head: None,
            bytes_allocated: 0,
            next_gc: INITIAL_NEXT_GC,
            gray: Vec::new(),
            strings: Table::new(),
            stress: std::env::var_os("LOXCRAFT_STRESS_GC").is_some(),
        }
    }

    pub fn should_collect(&self) -> bool {
        self.stress || self.bytes_allocated > self.next_gc
    }

    fn approx_size(kind: &ObjKind) -> usize {
        match kind {
            ObjKind::Str(s) => std::mem::size_of::<LoxString>() + s.bytes.len(),
            _ => std::mem::size_of::<Obj>(),
        }
    }

    pub fn allocate(&mut self, kind: ObjKind) -> Gc {
        self.bytes_allocated += Self::approx_size(&kind);
        let obj = Box::new(Obj {
            marked: Cell::new(false),
            next: Cell::new(self.head),
            kind,
        });
        let ptr = NonNull::from(Box::leak(obj));
        self.head = Some(ptr);
        Gc(ptr)
    }

    /// Interns `text`, returning the existing `LoxString` if one with
    /// equal bytes is already live, allocating a new one otherwise.
    pub fn intern(&mut self, text: &str) -> Gc {
        let hash = fnv1a(text.as_bytes());
        if let Some(existing) = self.strings.find_string(text, hash) {
            return existing;
        }
        let gc = self.allocate(ObjKind::Str(LoxString::new(text)));
        self.strings.put(gc, ());
        gc
    }

    pub fn mark_value(&mut self, value: Value) {
        if let Value::Obj(gc) = value {
            self.mark_object(gc);
        }
    }

    pub fn mark_object(&mut self, gc: Gc) {
        if gc.is_marked() {
            return;
        }
        gc.set_marked(true);
        self.gray.push(gc);
    }

    fn blacken(&mut self, gc: Gc) {
        // `kind()`'s borrow is tied to the heap object itself, not to
        // `self`, so it's fine to keep it alive across the recursive
        // `mark_*` calls below.
        match gc.kind() {
            ObjKind::Str(_) | ObjKind::Native(_) => {}
            ObjKind::Function(f) => {
                if let Some(name) = f.name {
                    self.mark_object(name);
                }
                for constant in f.chunk.constants.iter().copied() {
                    self.mark_value(constant);
                }
            }
            ObjKind::Closure(c) => {
                self.mark_object(c.function);
                for uv in c.upvalues.iter().copied() {
                    self.mark_object(uv);
                }
            }
            ObjKind::Upvalue(u) => {
                if let UpvalueState::Closed(v) = *u.state.borrow() {
                    self.mark_value(v);
                }
            }
            ObjKind::Class(c) => {
                self.mark_object(c.name);
                for (k, v) in c.methods.borrow().iter() {
                    self.mark_object(k);
                    self.mark_value(*v);
                }
            }
            ObjKind::Instance(i) => {
                self.mark_object(i.class);
                for (k, v) in i.fields.borrow().iter() {
                    self.mark_object(k);
                    self.mark_value(*v);
                }
            }
            ObjKind::BoundMethod(b) => {
                self.mark_value(b.receiver);
                self.mark_object(b.method);
            }
        }
    }

    fn trace_references(&mut self) {
        while let Some(gc) = self.gray.pop() {
            self.blacken(gc);
        }
    }

    /// Deletes interner entries whose string is unmarked: the
    /// interner never roots a string by itself, so this is the one
    /// place a string actually dies.
    fn remove_white_strings(&mut self) {
        let dead: Vec<Gc> = self
            .strings
            .iter()
            .filter(|(k, _)| !k.is_marked())
            .map(|(k, _)| k)
            .collect();
        for gc in dead {
            self.strings.delete(gc);
        }
    }

    fn sweep(&mut self) {
        let mut prev: Option<NonNull<Obj>> = None;
        let mut current = self.head;

        while let Some(node) = current {
            let obj = unsafe { node.as_ref() };
            let next = obj.next.get();

            if obj.marked.get() {
                obj.marked.set(false);
                prev = Some(node);
            } else {
                match prev {
                    Some(p) => unsafe { p.as_ref().next.set(next) },
                    None => self.head = next,
                }
                self.bytes_allocated = self
                    .bytes_allocated
                    .saturating_sub(Self::approx_size(&obj.kind));
                // SAFETY: `node` was unlinked from the list above, and
                // since it was unmarked, `sweep`'s caller guarantees no
                // remaining root reaches it.
                unsafe {
                    drop(Box::from_raw(node.as_ptr()));
                }
            }
            current = next;
        }
    }

    /// Runs a full mark-sweep cycle, rooted at `roots`.
    pub fn collect(&mut self, roots: GcRoots<'_>) {
        trace!(bytes_allocated = self.bytes_allocated, "gc: begin");

        for value in roots.stack {
            self.mark_value(*value);
        }
        for gc in roots.frame_closures {
            self.mark_object(*gc);
        }
        for (k, v) in roots.globals.iter() {
            self.mark_object(k);
            self.mark_value(*v);
        }
        for gc in roots.open_upvalues {
            self.mark_object(*gc);
        }
        for gc in roots.extra {
            self.mark_object(*gc);
        }

        self.trace_references();
        self.remove_white_strings();
        self.sweep();

        self.next_gc = (self.bytes_allocated * GROW_FACTOR).max(INITIAL_NEXT_GC);
        trace!(bytes_allocated = self.bytes_allocated, next_gc = self.next_gc, "gc: end");
    }
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for Heap {
    fn drop(&mut self) {
        let mut current = self.head;
        while let Some(node) = current {
            let obj = unsafe { node.as_ref() };
            let next = obj.next.get();
            unsafe {
                drop(Box::from_raw(node.as_ptr()));
            }
            current = next;
        }
    }
}
