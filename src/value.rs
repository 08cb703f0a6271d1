use std::fmt;
use std::rc::Rc;

use crate::error::LispResult;
use crate::eval::Interp;

/// Index into the cell arena. This is the handle every datum is passed by.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct CellId(pub u32);

/// The canonical Nil cell. Always slot 0 of the arena.
pub const NIL: CellId = CellId(0);

impl CellId {
    pub fn is_nil(self) -> bool {
        self == NIL
    }

    pub(crate) fn index(self) -> usize {
        self.0 as usize
    }
}

impl fmt::Debug for CellId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "CellId({})", self.0)
    }
}

/// A host function callable from Lisp. It receives the already evaluated
/// argument list and owns its own arity and type checking.
pub trait Primitive {
    fn call(&self, interp: &mut Interp, args: CellId) -> LispResult<CellId>;
}

impl<F> Primitive for F
where
    F: Fn(&mut Interp, CellId) -> LispResult<CellId>,
{
    fn call(&self, interp: &mut Interp, args: CellId) -> LispResult<CellId> {
        self(interp, args)
    }
}

/// Shared reference to host code. The interpreter never owns the code itself,
/// cloning only bumps the count.
#[derive(Clone)]
pub struct Native(pub Rc<dyn Primitive>);

impl Native {
    pub fn new(f: impl Primitive + 'static) -> Self {
        Native(Rc::new(f))
    }
}

impl fmt::Debug for Native {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Native({:p})", Rc::as_ptr(&self.0) as *const ())
    }
}

/// A single heap cell. Atomic payloads are owned copies of the data they were
/// built from.
#[derive(Debug, Clone)]
pub enum Cell {
    Nil,
    Cons(CellId, CellId),
    Integer(i64),
    #[cfg(feature = "float")]
    Float(f64),
    Str(Box<str>),
    Symbol(Box<str>),
    Error(Box<str>),
    Native(Native),
}

impl Cell {
    pub fn type_name(&self) -> &'static str {
        match self {
            Cell::Nil => "nil",
            Cell::Cons(..) => "cons",
            Cell::Integer(_) => "integer",
            #[cfg(feature = "float")]
            Cell::Float(_) => "float",
            Cell::Str(_) => "string",
            Cell::Symbol(_) => "symbol",
            Cell::Error(_) => "error",
            Cell::Native(_) => "native",
        }
    }

    /// Text payload of strings, symbols and errors.
    pub fn text(&self) -> Option<&str> {
        match self {
            Cell::Str(s) | Cell::Symbol(s) | Cell::Error(s) => Some(s),
            _ => None,
        }
    }
}

/// A host-side literal to compare a cell against with `Heap::eq`.
#[derive(Debug, Clone, Copy)]
pub enum Raw<'a> {
    Nil,
    Integer(i64),
    #[cfg(feature = "float")]
    Float(f64),
    Text(&'a str),
    Cell(CellId),
}
