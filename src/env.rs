use log::trace;

use crate::error::{msg, LispResult};
use crate::heap::Heap;
use crate::value::{CellId, NIL};

// An environment is a chain of frames: (frame . enclosing), ending in the
// empty-environment sentinel (Nil is accepted as an end marker too).
// A frame is (vars . vals): two parallel lists scanned linearly.

pub fn is_empty(heap: &Heap, env: CellId) -> bool {
    env == NIL || env == heap.empty_env()
}

/// Allocate a frame and cons it onto `base`.
pub fn make_env(heap: &mut Heap, vars: CellId, vals: CellId, base: CellId) -> LispResult<CellId> {
    let frame = heap.cons(vars, vals)?;
    heap.cons(frame, base)
}

/// The vals cons holding `var` within one frame.
fn scan_frame(heap: &Heap, var: CellId, frame: CellId) -> LispResult<Option<CellId>> {
    let mut vars = heap.car(frame)?;
    let mut vals = heap.cdr(frame)?;
    while heap.is_cons(vars)? {
        if heap.equals(heap.car(vars)?, var)? {
            return Ok(Some(vals));
        }
        vars = heap.cdr(vars)?;
        vals = heap.cdr(vals)?;
    }
    Ok(None)
}

/// The vals cons holding `var`, innermost frame first.
fn find_binding(heap: &Heap, var: CellId, env: CellId) -> LispResult<Option<CellId>> {
    let mut current = env;
    while !is_empty(heap, current) {
        let frame = heap.car(current)?;
        if let Some(slot) = scan_frame(heap, var, frame)? {
            return Ok(Some(slot));
        }
        current = heap.cdr(current)?;
    }
    Ok(None)
}

fn unbound(heap: &mut Heap, var: CellId) -> LispResult<CellId> {
    let name = heap.cell(var)?.text().unwrap_or("?").to_string();
    heap.error(&format!("{}: {}", msg::UNBOUND_VARIABLE, name))
}

/// Value bound to `var`, or an "Unbound variable" ERROR.
pub fn lookup(heap: &mut Heap, var: CellId, env: CellId) -> LispResult<CellId> {
    match find_binding(heap, var, env)? {
        Some(slot) => heap.car(slot),
        None => unbound(heap, var),
    }
}

/// Overwrite the nearest existing binding of `var`. Returns `val`, or an
/// "Unbound variable" ERROR when there is none.
pub fn set_variable(heap: &mut Heap, var: CellId, val: CellId, env: CellId) -> LispResult<CellId> {
    match find_binding(heap, var, env)? {
        Some(slot) => {
            heap.set_car(slot, val)?;
            Ok(val)
        }
        None => unbound(heap, var),
    }
}

/// Bind `var` in the innermost frame only, replacing a binding already in
/// that frame or prepending a new one.
pub fn define_variable(heap: &mut Heap, var: CellId, val: CellId, env: CellId) -> LispResult<CellId> {
    if is_empty(heap, env) {
        return heap.error(msg::NO_FRAME);
    }
    let frame = heap.car(env)?;
    if let Some(slot) = scan_frame(heap, var, frame)? {
        heap.set_car(slot, val)?;
        return Ok(val);
    }

    trace!("define {:?} in frame {:?}", var, frame);
    let vars = heap.car(frame)?;
    let vars = heap.cons(var, vars)?;
    heap.set_car(frame, vars)?;
    let vals = heap.cdr(frame)?;
    let vals = heap.cons(val, vals)?;
    heap.set_cdr(frame, vals)?;
    Ok(val)
}

/// New environment binding `vars` to `vals` on top of `base`. The lists must
/// line up exactly, except that a symbol in the formals' tail position (or a
/// bare symbol as the formals) collects the remaining arguments.
pub fn extend(heap: &mut Heap, vars: CellId, vals: CellId, base: CellId) -> LispResult<CellId> {
    let mut names = Vec::new();
    let mut values = Vec::new();
    let mut formals = vars;
    let mut args = vals;

    loop {
        if heap.is_cons(formals)? {
            if !heap.is_cons(args)? {
                return heap.error(msg::TOO_FEW_ARGUMENTS);
            }
            names.push(heap.car(formals)?);
            values.push(heap.car(args)?);
            formals = heap.cdr(formals)?;
            args = heap.cdr(args)?;
        } else if heap.is_symbol(formals)? {
            names.push(formals);
            values.push(args);
            break;
        } else {
            if heap.is_cons(args)? {
                return heap.error(msg::TOO_MANY_ARGUMENTS);
            }
            break;
        }
    }

    let vars = heap.list(&names)?;
    let vals = heap.list(&values)?;
    make_env(heap, vars, vals, base)
}
