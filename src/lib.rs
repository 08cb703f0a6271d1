//! A small Scheme-family interpreter. Every value lives in one arena of cells
//! tracked by a Registry; nothing is reclaimed unless the host asks for it.

pub mod env;
pub mod error;
pub mod eval;
pub mod heap;
pub mod list;
pub mod primitives;
pub mod printer;
pub mod reader;
pub mod symbol;
pub mod value;

pub use error::{LispError, LispResult};
pub use eval::{Config, Interp};
pub use heap::{Heap, HeapStats};
pub use value::{Cell, CellId, Native, Primitive, Raw, NIL};
