//! The three disjoint error categories: compile-time
//! (scanner/parser), resolution (tree-walker only), and runtime
//! (either evaluator). Each maps to a distinct process exit code, so
//! callers must be able to tell them apart — hence three concrete
//! `thiserror` types rather than one catch-all.

use std::fmt;

use thiserror::Error;

/// A single compile-time diagnostic, formatted exactly as
/// `[line N] Error at '<lexeme>': <message>`.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("[line {line}] Error{at_desc}: {message}")]
pub struct CompileError {
    pub line: usize,
    /// Pre-rendered " at '<lexeme>'" or " at end", computed once at
    /// construction so the `#[error(...)]` format string stays a
    /// plain field interpolation.
    pub at_desc: String,
    pub message: String,
}

impl CompileError {
    pub fn new(line: usize, lexeme: impl AsRef<str>, message: impl Into<String>) -> CompileError {
        CompileError {
            line,
            at_desc: format!(" at '{}'", lexeme.as_ref()),
            message: message.into(),
        }
    }

    pub fn at_eof(line: usize, message: impl Into<String>) -> CompileError {
        CompileError {
            line,
            at_desc: " at end".to_string(),
            message: message.into(),
        }
    }
}

/// A batch of compile errors: the scanner/parser keeps going after
/// the first error (panic-mode recovery), so a single malformed
/// program can surface more than one diagnostic.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub struct CompileErrors(pub Vec<CompileError>);

impl fmt::Display for CompileErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

/// A semantic error caught by the tree-walker's resolver pass, before
/// any code runs.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("[line {line}] Error: {message}")]
pub struct ResolveError {
    pub line: usize,
    pub message: String,
}

impl ResolveError {
    pub fn new(line: usize, message: impl Into<String>) -> ResolveError {
        ResolveError {
            line,
            message: message.into(),
        }
    }
}

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub struct ResolveErrors(pub Vec<ResolveError>);

impl fmt::Display for ResolveErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, err) in self.0.iter().enumerate() {
            if i > 0 {
                writeln!(f)?;
            }
            write!(f, "{err}")?;
        }
        Ok(())
    }
}

/// One call frame's contribution to a runtime error's backtrace,
/// innermost first.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TraceFrame {
    pub line: usize,
    pub function_name: String,
}

impl fmt::Display for TraceFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[line {}] in {}", self.line, self.function_name)
    }
}

/// A failure raised while executing an already-compiled (or already
/// resolved) program: type mismatches, undefined names, bad arity,
/// calling a non-callable, and so on.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub struct RuntimeError {
    pub message: String,
    pub trace: Vec<TraceFrame>,
}

impl RuntimeError {
    pub fn new(message: impl Into<String>, trace: Vec<TraceFrame>) -> RuntimeError {
        RuntimeError {
            message: message.into(),
            trace,
        }
    }
}

impl fmt::Display for RuntimeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "{}", self.message)?;
        for frame in &self.trace {
            writeln!(f, "{frame}")?;
        }
        Ok(())
    }
}

/// The union handed back to the CLI, which maps each variant to an
/// exit code.
#[derive(Debug, Error)]
pub enum LoxError {
    #[error(transparent)]
    Compile(#[from] CompileErrors),
    #[error(transparent)]
    Resolve(#[from] ResolveErrors),
    #[error(transparent)]
    Runtime(#[from] RuntimeError),
}

pub mod exit_code {
    pub const SUCCESS: i32 = 0;
    pub const USAGE: i32 = 64;
    pub const DATA_ERROR: i32 = 65;
    pub const RUNTIME_ERROR: i32 = 70;
    pub const IO_ERROR: i32 = 74;
}

impl LoxError {
    pub fn exit_code(&self) -> i32 {
        match self {
            LoxError::Compile(_) | LoxError::Resolve(_) => exit_code::DATA_ERROR,
            LoxError::Runtime(_) => exit_code::RUNTIME_ERROR,
        }
    }
}
