//! A small JIT-compiled expression language in the Kaleidoscope family:
//! every value is an f64, operators are user-definable with their own
//! precedence, and the backend lowers straight to LLVM IR. The same
//! pipeline backs an interactive REPL and an ahead-of-time object
//! compiler.

pub mod backend;
pub mod cli;
pub mod compile;
pub mod frontend;
pub mod repl;
