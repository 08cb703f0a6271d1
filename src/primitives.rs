use std::cmp::Ordering;

use log::debug;

use crate::error::{msg, LispResult};
use crate::eval::Interp;
use crate::heap::Heap;
use crate::list;
use crate::symbol::sym;
use crate::value::{Cell, CellId, Native, NIL};

type PrimitiveFn = fn(&mut Interp, CellId) -> LispResult<CellId>;

/// The standard primitives, bound by `install`.
const PRIMITIVES: &[(&str, PrimitiveFn)] = &[
    ("+", prim_add),
    ("-", prim_sub),
    ("*", prim_mul),
    ("/", prim_div),
    ("=", prim_num_eq),
    ("<", prim_lt),
    (">", prim_gt),
    ("car", prim_car),
    ("cdr", prim_cdr),
    ("cons", prim_cons),
    ("list", prim_list),
    ("length", prim_length),
    ("nth", prim_nth),
    ("last", prim_last),
    ("append", prim_append),
    ("null?", prim_null),
    ("eq?", prim_eq),
    ("map", prim_map),
    ("reduce", prim_reduce),
    ("error", prim_error),
];

/// Build a primitive procedure value: `(primitive name native)`.
pub fn make_primitive(heap: &mut Heap, name: &str, native: Native) -> LispResult<CellId> {
    let tag = heap.symbol(sym::PRIMITIVE)?;
    let name = heap.symbol(name)?;
    let native = heap.native(native)?;
    heap.list(&[tag, name, native])
}

/// Bind every standard primitive in the global environment.
pub fn install(interp: &mut Interp) -> LispResult<()> {
    for &(name, f) in PRIMITIVES {
        interp.define_primitive(name, f)?;
    }
    debug!("installed {} primitives", PRIMITIVES.len());
    Ok(())
}

/// Exactly `N` arguments, or None.
fn expect_args<const N: usize>(heap: &Heap, args: CellId) -> LispResult<Option<[CellId; N]>> {
    Ok(heap
        .list_to_vec(args)?
        .and_then(|v| <[CellId; N]>::try_from(v).ok()))
}

fn arity_error(interp: &mut Interp, name: &str) -> LispResult<CellId> {
    interp.heap.error(&format!("{}: {}", msg::WRONG_ARG_COUNT, name))
}

fn boolean(interp: &mut Interp, b: bool) -> LispResult<CellId> {
    if b {
        interp.heap.symbol(sym::TRUE)
    } else {
        Ok(NIL)
    }
}

// ============================================================================
// Numbers
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq)]
enum Num {
    Int(i64),
    #[cfg(feature = "float")]
    Float(f64),
}

impl Num {
    fn from_cell(cell: &Cell) -> Option<Num> {
        match cell {
            Cell::Integer(n) => Some(Num::Int(*n)),
            #[cfg(feature = "float")]
            Cell::Float(f) => Some(Num::Float(*f)),
            _ => None,
        }
    }

    #[cfg(feature = "float")]
    fn as_f64(self) -> f64 {
        match self {
            Num::Int(n) => n as f64,
            Num::Float(f) => f,
        }
    }

    fn compare(self, other: Num) -> Option<Ordering> {
        match (self, other) {
            (Num::Int(a), Num::Int(b)) => Some(a.cmp(&b)),
            #[cfg(feature = "float")]
            (a, b) => a.as_f64().partial_cmp(&b.as_f64()),
        }
    }

    fn alloc(self, heap: &mut Heap) -> LispResult<CellId> {
        match self {
            Num::Int(n) => heap.integer(n),
            #[cfg(feature = "float")]
            Num::Float(f) => heap.float(f),
        }
    }
}

/// Every element of `args` as a number, or None if any is not one.
fn numbers(heap: &Heap, args: CellId) -> LispResult<Option<Vec<Num>>> {
    let Some(cells) = heap.list_to_vec(args)? else {
        return Ok(None);
    };
    let mut nums = Vec::with_capacity(cells.len());
    for id in cells {
        match Num::from_cell(heap.cell(id)?) {
            Some(n) => nums.push(n),
            None => return Ok(None),
        }
    }
    Ok(Some(nums))
}

#[derive(Debug, Clone, Copy)]
enum ArithOp {
    Add,
    Sub,
    Mul,
    Div,
}

impl ArithOp {
    fn name(self) -> &'static str {
        match self {
            ArithOp::Add => "+",
            ArithOp::Sub => "-",
            ArithOp::Mul => "*",
            ArithOp::Div => "/",
        }
    }

    fn identity(self) -> i64 {
        match self {
            ArithOp::Add | ArithOp::Sub => 0,
            ArithOp::Mul | ArithOp::Div => 1,
        }
    }

    /// Integers stay integers (checked); anything mixed goes to float.
    fn apply(self, a: Num, b: Num) -> Result<Num, &'static str> {
        match (a, b) {
            (Num::Int(x), Num::Int(y)) => {
                let result = match self {
                    ArithOp::Add => x.checked_add(y),
                    ArithOp::Sub => x.checked_sub(y),
                    ArithOp::Mul => x.checked_mul(y),
                    ArithOp::Div if y == 0 => return Err(msg::DIVISION_BY_ZERO),
                    ArithOp::Div => x.checked_div(y),
                };
                result.map(Num::Int).ok_or(msg::INTEGER_OVERFLOW)
            }
            #[cfg(feature = "float")]
            (a, b) => {
                let (x, y) = (a.as_f64(), b.as_f64());
                Ok(Num::Float(match self {
                    ArithOp::Add => x + y,
                    ArithOp::Sub => x - y,
                    ArithOp::Mul => x * y,
                    ArithOp::Div if y == 0.0 => return Err(msg::DIVISION_BY_ZERO),
                    ArithOp::Div => x / y,
                }))
            }
        }
    }
}

/// Fold `op` over the argument list. `+` and `*` accept zero arguments and
/// hand a single argument back unchanged; `-` and `/` with one argument
/// apply to the identity, so `(- x)` negates.
fn arithmetic(interp: &mut Interp, args: CellId, op: ArithOp) -> LispResult<CellId> {
    let Some(nums) = numbers(&interp.heap, args)? else {
        return interp.heap.error(msg::NOT_A_NUMBER);
    };

    let (mut acc, rest) = match (op, nums.as_slice()) {
        (ArithOp::Add | ArithOp::Mul, []) => return interp.heap.integer(op.identity()),
        (ArithOp::Add | ArithOp::Mul, [_]) => return interp.heap.car(args),
        (ArithOp::Sub | ArithOp::Div, []) => return arity_error(interp, op.name()),
        (ArithOp::Sub | ArithOp::Div, [_]) => (Num::Int(op.identity()), &nums[..]),
        (_, [first, rest @ ..]) => (*first, rest),
    };

    for &n in rest {
        acc = match op.apply(acc, n) {
            Ok(v) => v,
            Err(message) => return interp.heap.error(message),
        };
    }
    acc.alloc(&mut interp.heap)
}

fn prim_add(interp: &mut Interp, args: CellId) -> LispResult<CellId> {
    arithmetic(interp, args, ArithOp::Add)
}

fn prim_sub(interp: &mut Interp, args: CellId) -> LispResult<CellId> {
    arithmetic(interp, args, ArithOp::Sub)
}

fn prim_mul(interp: &mut Interp, args: CellId) -> LispResult<CellId> {
    arithmetic(interp, args, ArithOp::Mul)
}

fn prim_div(interp: &mut Interp, args: CellId) -> LispResult<CellId> {
    arithmetic(interp, args, ArithOp::Div)
}

/// Chained numeric comparison: true when every adjacent pair satisfies
/// `holds`.
fn comparison(
    interp: &mut Interp,
    args: CellId,
    name: &str,
    holds: fn(Ordering) -> bool,
) -> LispResult<CellId> {
    let Some(nums) = numbers(&interp.heap, args)? else {
        return interp.heap.error(msg::NOT_A_NUMBER);
    };
    if nums.is_empty() {
        return arity_error(interp, name);
    }
    let result = nums
        .windows(2)
        .all(|pair| pair[0].compare(pair[1]).map_or(false, holds));
    boolean(interp, result)
}

fn prim_num_eq(interp: &mut Interp, args: CellId) -> LispResult<CellId> {
    comparison(interp, args, "=", |o| o == Ordering::Equal)
}

fn prim_lt(interp: &mut Interp, args: CellId) -> LispResult<CellId> {
    comparison(interp, args, "<", |o| o == Ordering::Less)
}

fn prim_gt(interp: &mut Interp, args: CellId) -> LispResult<CellId> {
    comparison(interp, args, ">", |o| o == Ordering::Greater)
}

// ============================================================================
// Lists
// ============================================================================

/// (car x): car of a cons, nil of nil.
fn prim_car(interp: &mut Interp, args: CellId) -> LispResult<CellId> {
    match expect_args::<1>(&interp.heap, args)? {
        Some([x]) => interp.heap.car(x),
        None => arity_error(interp, "car"),
    }
}

fn prim_cdr(interp: &mut Interp, args: CellId) -> LispResult<CellId> {
    match expect_args::<1>(&interp.heap, args)? {
        Some([x]) => interp.heap.cdr(x),
        None => arity_error(interp, "cdr"),
    }
}

fn prim_cons(interp: &mut Interp, args: CellId) -> LispResult<CellId> {
    match expect_args::<2>(&interp.heap, args)? {
        Some([a, b]) => interp.heap.cons(a, b),
        None => arity_error(interp, "cons"),
    }
}

/// The evaluated argument list already is the answer.
fn prim_list(_interp: &mut Interp, args: CellId) -> LispResult<CellId> {
    Ok(args)
}

fn prim_length(interp: &mut Interp, args: CellId) -> LispResult<CellId> {
    match expect_args::<1>(&interp.heap, args)? {
        Some([x]) => match list::length(&interp.heap, x)? {
            Some(n) => interp.heap.integer(n as i64),
            None => interp.heap.error(msg::CYCLIC_LIST),
        },
        None => arity_error(interp, "length"),
    }
}

/// (nth list n), counting from 1.
fn prim_nth(interp: &mut Interp, args: CellId) -> LispResult<CellId> {
    let Some([l, n]) = expect_args::<2>(&interp.heap, args)? else {
        return arity_error(interp, "nth");
    };
    match interp.heap.cell(n)? {
        Cell::Integer(n) if *n >= 0 => {
            let n = *n as usize;
            list::nth(&interp.heap, l, n)
        }
        Cell::Integer(_) => Ok(NIL),
        _ => interp.heap.error(msg::NOT_A_NUMBER),
    }
}

fn prim_last(interp: &mut Interp, args: CellId) -> LispResult<CellId> {
    match expect_args::<1>(&interp.heap, args)? {
        Some([x]) => match list::last(&interp.heap, x)? {
            Some(tail) => Ok(tail),
            None => interp.heap.error(msg::CYCLIC_LIST),
        },
        None => arity_error(interp, "last"),
    }
}

/// (append a b): destructive, the last cdr of `a` is overwritten.
fn prim_append(interp: &mut Interp, args: CellId) -> LispResult<CellId> {
    let Some([a, b]) = expect_args::<2>(&interp.heap, args)? else {
        return arity_error(interp, "append");
    };
    if !a.is_nil() && !interp.heap.is_cons(a)? {
        return interp.heap.error(msg::NOT_A_LIST);
    }
    list::append(&mut interp.heap, a, b)
}

fn prim_null(interp: &mut Interp, args: CellId) -> LispResult<CellId> {
    match expect_args::<1>(&interp.heap, args)? {
        Some([x]) => boolean(interp, x.is_nil()),
        None => arity_error(interp, "null?"),
    }
}

/// (eq? a b): cell equality. Atoms compare by value, conses by identity.
fn prim_eq(interp: &mut Interp, args: CellId) -> LispResult<CellId> {
    let Some([a, b]) = expect_args::<2>(&interp.heap, args)? else {
        return arity_error(interp, "eq?");
    };
    let same = interp.heap.equals(a, b)?;
    boolean(interp, same)
}

fn prim_map(interp: &mut Interp, args: CellId) -> LispResult<CellId> {
    match expect_args::<2>(&interp.heap, args)? {
        Some([f, l]) => interp.map(f, l),
        None => arity_error(interp, "map"),
    }
}

fn prim_reduce(interp: &mut Interp, args: CellId) -> LispResult<CellId> {
    match expect_args::<2>(&interp.heap, args)? {
        Some([f, l]) => interp.reduce(f, l),
        None => arity_error(interp, "reduce"),
    }
}

/// (error "message"): raise an ERROR value carrying the message text.
fn prim_error(interp: &mut Interp, args: CellId) -> LispResult<CellId> {
    let Some([m]) = expect_args::<1>(&interp.heap, args)? else {
        return arity_error(interp, "error");
    };
    let text = match interp.heap.cell(m)?.text() {
        Some(text) => text.to_string(),
        None => crate::printer::print_val(m, &interp.heap),
    };
    interp.heap.error(&text)
}
