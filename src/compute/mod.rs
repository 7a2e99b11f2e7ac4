//! Compiles node sets into linear programs and executes them.
pub mod bytecode;
pub mod engine;
pub mod function;
pub mod kernel;
pub mod ledger;

pub use bytecode::{Compiler, Program};
pub use engine::Engine;
pub use function::Function;
pub use ledger::{ComputationError, Ledger};
