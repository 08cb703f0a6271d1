use thiserror::Error;

use crate::value::CellId;

/// Host-level failures. Lisp-level failures (unbound variables, bad arity,
/// parse errors) are ordinary ERROR cells and never show up here.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum LispError {
    /// The arena has no free slot left.
    #[error("heap capacity exceeded ({0} cells)")]
    OutOfMemory(usize),

    /// A handle was used after its cell was reclaimed.
    #[error("cell {0:?} has been reclaimed")]
    Dangling(CellId),

    /// I/O failure in the host front end.
    #[error("I/O error: {0}")]
    Io(String),
}

impl From<std::io::Error> for LispError {
    fn from(e: std::io::Error) -> Self {
        LispError::Io(e.to_string())
    }
}

pub type LispResult<T> = Result<T, LispError>;

/// Messages carried by ERROR cells.
pub mod msg {
    pub const SYMBOL_TOO_LONG: &str = "Symbol length too long";
    pub const LIST_NOT_TERMINATED: &str = "List was not terminated";
    pub const NESTING_TOO_DEEP: &str = "Nesting too deep";
    pub const UNEXPECTED_CLOSE: &str = "Unexpected ')'";
    pub const UNBOUND_VARIABLE: &str = "Unbound variable";
    pub const NO_FRAME: &str = "No frame to define in";
    pub const TOO_MANY_ARGUMENTS: &str = "Too many arguments supplied";
    pub const TOO_FEW_ARGUMENTS: &str = "Too few arguments supplied";
    pub const ELSE_NOT_LAST: &str = "ELSE clause isn't last -- COND->IF";
    pub const UNKNOWN_EXPRESSION: &str = "Unknown expression type -- EVAL";
    pub const UNKNOWN_PROCEDURE: &str = "Unknown procedure type -- APPLY";
    pub const RECURSION_TOO_DEEP: &str = "Recursion too deep";
    pub const NOT_A_NUMBER: &str = "Argument is not a number";
    pub const NOT_A_LIST: &str = "Argument is not a list";
    pub const CYCLIC_LIST: &str = "Argument is a cyclic list";
    pub const DIVISION_BY_ZERO: &str = "Division by zero";
    pub const INTEGER_OVERFLOW: &str = "Integer overflow";
    pub const WRONG_ARG_COUNT: &str = "Wrong number of arguments";
}
