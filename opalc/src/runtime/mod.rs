///
/// Runtime Support Module
///
/// Runtime values for the interpreter backend. The symbol table stores these
/// alongside types when compiling in interpreted mode; the Rust-emitting
/// backend never materializes them.
///

pub mod value;

pub use value::{ProcedureValue, Value};
