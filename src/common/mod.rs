//! Datatypes shared by both evaluators: source handles, tokens, the
//! tagged `Value`, the heap object kinds, bytecode chunks, and the
//! open-addressed hash table used for globals, fields, and interning.

pub mod chunk;
pub mod object;
pub mod source;
pub mod table;
pub mod token;
pub mod value;
