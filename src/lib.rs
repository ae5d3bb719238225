//! # loxcraft
//!
//! This crate contains two independent implementations of the Lox
//! programming language: a bytecode compiler paired with a stack-based
//! virtual machine (the `compiler`/`vm`/`gc` modules), and a
//! tree-walking evaluator built around a resolver pass
//! (`tree_walker`). Both share the lexer and source/token/diagnostic
//! types in `common`; each evaluator owns its own value representation
//! (see below).
//!
//! ## Overview of the bytecode pipeline
//! Source text is turned into tokens on demand by `compiler::lexer`.
//! `compiler::compile` runs a single-pass Pratt parser over that token
//! stream, emitting bytecode directly into a `common::chunk::Chunk`
//! owned by a freshly allocated `common::object::LoxFunction`. The
//! resulting function is handed to `vm::Vm::interpret`, which wraps it
//! in a closure and runs it.
//!
//! ## Overview of the tree-walking pipeline
//! The same token stream is parsed into an AST by
//! `tree_walker::parser`. `tree_walker::resolver` then walks the AST
//! once, annotating every variable reference with the number of
//! enclosing scopes to climb, before `tree_walker::interpreter` walks
//! the tree a second time to evaluate it.
//!
//! The two pipelines share a lexer and the same surface semantics, but
//! not a heap: the tree-walker has no bytecode chunks to root and no
//! REPL-scale allocation volume to bound, so its values are plain
//! `Rc`/`RefCell` (`tree_walker::value`) rather than objects tracked by
//! the mark-sweep collector in `gc`, which exists solely for the VM.

pub mod common;
pub mod compiler;
pub mod debug;
pub mod diagnostics;
pub mod gc;
pub mod tree_walker;
pub mod vm;

use std::path::Path;
use std::rc::Rc;

use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::common::source::Source;
use crate::diagnostics::{exit_code, LoxError};

/// Compiles and runs `source` with the bytecode VM, printing `print`
/// statement output to stdout and diagnostics to stderr.
///
/// This is the main embeddable entry point used by the CLI for both
/// file mode and the REPL.
pub fn run_source(source: Rc<Source>) -> Result<(), LoxError> {
    let mut heap = gc::Heap::new();
    let function = compiler::compile(Rc::clone(&source), &mut heap)
        .map_err(LoxError::Compile)?;
    let mut vm = vm::Vm::new(heap);
    vm.interpret(function).map_err(LoxError::Runtime)
}

/// Runs `source` with a caller-provided, persistent `Vm`, so that
/// globals defined on one call are visible to the next (used by the
/// REPL, where each line is compiled and executed independently but
/// globals persist across lines).
pub fn run_in_vm(vm: &mut vm::Vm, source: Rc<Source>) -> Result<(), LoxError> {
    let function = compiler::compile(Rc::clone(&source), vm.heap_mut())
        .map_err(LoxError::Compile)?;
    vm.interpret(function).map_err(LoxError::Runtime)
}

/// Reads `path`, runs it with [`run_source`], and prints any resulting
/// diagnostic to stderr. Returns the process exit code to use on
/// failure, per the exit-code table in `diagnostics::exit_code`.
pub fn run_file(path: &Path) -> Result<(), i32> {
    let source = Source::from_path(path).map_err(|err| {
        eprintln!("Error: could not read '{}': {err}", path.display());
        exit_code::IO_ERROR
    })?;

    run_source(Rc::new(source)).map_err(report)
}

/// Runs an interactive read-eval-print loop against a persistent `Vm`,
/// so globals and function definitions survive from one line to the
/// next. Returns on EOF/Ctrl-D/Ctrl-C.
pub fn run_prompt() -> Result<(), i32> {
    let mut vm = vm::Vm::new(gc::Heap::new());
    let mut editor = DefaultEditor::new().map_err(|err| {
        eprintln!("Error: could not start line editor: {err}");
        exit_code::IO_ERROR
    })?;

    loop {
        match editor.readline("> ") {
            Ok(line) => {
                let _ = editor.add_history_entry(line.as_str());
                let source = Rc::new(Source::repl(line));
                if let Err(err) = run_in_vm(&mut vm, source) {
                    report(err).ok();
                }
            }
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => return Ok(()),
            Err(err) => {
                eprintln!("Error: {err}");
                return Err(exit_code::IO_ERROR);
            }
        }
    }
}

fn report(error: LoxError) -> Result<(), i32> {
    eprintln!("{error}");
    Err(error.exit_code())
}
