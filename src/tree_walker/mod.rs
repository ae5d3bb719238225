//! The tree-walking evaluator: parse straight to an AST, resolve
//! variable references, then walk the tree directly. No chunks, no
//! stack machine, no garbage collector — see `value.rs` for why that's
//! a deliberate scope choice rather than an oversight.

pub mod ast;
pub mod environment;
pub mod interpreter;
pub mod parser;
pub mod resolver;
pub mod value;

use std::rc::Rc;

use crate::common::source::Source;
use crate::diagnostics::LoxError;

use self::interpreter::Interpreter;
use self::parser::Parser;
use self::resolver::Resolver;

/// Parses, resolves, and runs `source` against a fresh interpreter.
/// Every call starts with empty global state; there is no REPL-style
/// persistence across calls the way the bytecode VM offers, since
/// nothing in this evaluator currently needs it.
pub fn run(source: Rc<Source>) -> Result<(), LoxError> {
    let statements = Parser::new(&source.contents).parse()?;
    let locals = Resolver::new().resolve(&statements)?;
    let mut interpreter = Interpreter::new(locals);
    interpreter.run(&statements)?;
    Ok(())
}
