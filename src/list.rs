use crate::error::{msg, LispResult};
use crate::heap::Heap;
use crate::value::{CellId, NIL};

/// Number of cons cells along the cdr chain. Anything that is not a cons
/// counts as the end, so atoms have length 0. A chain that loops back on
/// itself (possible after `append`) has no length: None.
pub fn length(heap: &Heap, list: CellId) -> LispResult<Option<usize>> {
    let mut count = 0;
    let mut slow = list;
    let mut fast = list;
    while heap.is_cons(fast)? {
        fast = heap.cdr(fast)?;
        count += 1;
        if !heap.is_cons(fast)? {
            break;
        }
        fast = heap.cdr(fast)?;
        count += 1;
        slow = heap.cdr(slow)?;
        if fast == slow {
            return Ok(None);
        }
    }
    Ok(Some(count))
}

/// The last cons of a list, or Nil for Nil and atoms. None for a cyclic list.
pub fn last(heap: &Heap, list: CellId) -> LispResult<Option<CellId>> {
    let Some(n) = length(heap, list)? else {
        return Ok(None);
    };
    if n == 0 {
        return Ok(Some(NIL));
    }
    let mut current = list;
    for _ in 1..n {
        current = heap.cdr(current)?;
    }
    Ok(Some(current))
}

/// The `n`th element, counting from 1. Out of range gives Nil.
pub fn nth(heap: &Heap, list: CellId, n: usize) -> LispResult<CellId> {
    if n == 0 {
        return Ok(NIL);
    }
    let mut current = list;
    for _ in 1..n {
        if !heap.is_cons(current)? {
            return Ok(NIL);
        }
        current = heap.cdr(current)?;
    }
    heap.car(current)
}

/// Destructively append `other` to `head`: the cdr of the last cons of
/// `head` is overwritten, so every holder of `head` sees the longer list and
/// the result shares structure with both arguments. An empty `head` just
/// yields `other`. A cyclic `head` has no end to attach to and gives an
/// ERROR value.
pub fn append(heap: &mut Heap, head: CellId, other: CellId) -> LispResult<CellId> {
    let Some(tail) = last(heap, head)? else {
        return heap.error(msg::CYCLIC_LIST);
    };
    if tail.is_nil() {
        return Ok(other);
    }
    heap.set_cdr(tail, other)?;
    Ok(head)
}

/// Build a list from a fixed sequence of values.
pub fn mklist(heap: &mut Heap, values: &[CellId]) -> LispResult<CellId> {
    heap.list(values)
}
