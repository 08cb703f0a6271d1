use crate::heap::Heap;
use crate::symbol::sym;
use crate::value::{Cell, CellId};

const MAX_DEPTH: usize = 1000;
/// Elements printed per list before giving up, so cyclic cdr chains end.
const MAX_ELEMENTS: usize = 10_000;

/// Print a value to a string.
pub fn print_val(val: CellId, heap: &Heap) -> String {
    let mut out = String::new();
    print_inner(val, heap, &mut out, 0);
    out
}

fn print_inner(val: CellId, heap: &Heap, out: &mut String, depth: usize) {
    if depth > MAX_DEPTH {
        out.push_str("...");
        return;
    }

    let Ok(cell) = heap.cell(val) else {
        out.push_str("#<reclaimed>");
        return;
    };

    match cell {
        Cell::Nil => out.push_str("nil"),
        Cell::Integer(n) => out.push_str(&n.to_string()),
        #[cfg(feature = "float")]
        Cell::Float(f) => out.push_str(&format!("{:?}", f)),
        Cell::Str(s) => print_string(s, out),
        Cell::Symbol(name) => out.push_str(name),
        Cell::Error(message) => {
            out.push_str("#<error: ");
            out.push_str(message);
            out.push('>');
        }
        Cell::Native(_) => out.push_str("#<native>"),
        Cell::Cons(car, cdr) => print_cons(val, *car, *cdr, heap, out, depth),
    }
}

fn print_cons(val: CellId, car: CellId, cdr: CellId, heap: &Heap, out: &mut String, depth: usize) {
    // (quote x) -> 'x
    if is_symbol(heap, car, sym::QUOTE) && heap.cddr(val).map_or(false, |t| t.is_nil()) {
        if let Ok(quoted) = heap.cadr(val) {
            out.push('\'');
            print_inner(quoted, heap, out, depth + 1);
            return;
        }
    }

    // Procedures carry their environment; never print it.
    if is_symbol(heap, car, sym::PRIMITIVE) {
        out.push_str("#<primitive ");
        print_inner(heap.cadr(val).unwrap_or(cdr), heap, out, depth + 1);
        out.push('>');
        return;
    }
    if is_symbol(heap, car, sym::PROCEDURE) {
        out.push_str("#<procedure ");
        print_inner(heap.cadr(val).unwrap_or(cdr), heap, out, depth + 1);
        out.push('>');
        return;
    }

    out.push('(');
    print_inner(car, heap, out, depth + 1);

    let mut current = cdr;
    let mut count = 1;
    loop {
        match heap.cell(current) {
            Ok(Cell::Nil) => break,
            Ok(Cell::Cons(a, d)) => {
                if count >= MAX_ELEMENTS {
                    out.push_str(" ...");
                    break;
                }
                out.push(' ');
                print_inner(*a, heap, out, depth + 1);
                current = *d;
                count += 1;
            }
            _ => {
                out.push_str(" . ");
                print_inner(current, heap, out, depth + 1);
                break;
            }
        }
    }
    out.push(')');
}

fn is_symbol(heap: &Heap, id: CellId, name: &str) -> bool {
    heap.is_symbol_named(id, name).unwrap_or(false)
}

fn print_string(s: &str, out: &mut String) {
    out.push('"');
    for ch in s.chars() {
        match ch {
            '"' => out.push_str("\\\""),
            '\\' => out.push_str("\\\\"),
            c => out.push(c),
        }
    }
    out.push('"');
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reader::read_str;
    use crate::value::NIL;

    fn show(text: &str) -> String {
        let mut heap = Heap::new(1024);
        let val = read_str(text, &mut heap).unwrap();
        print_val(val, &heap)
    }

    #[test]
    fn atoms() {
        assert_eq!(show("()"), "nil");
        assert_eq!(show("42"), "42");
        assert_eq!(show("-7"), "-7");
        assert_eq!(show("foo"), "foo");
        assert_eq!(show("\"hi there\""), "\"hi there\"");
        assert_eq!(show("\"a \\\"b\\\"\""), "\"a \\\"b\\\"\"");
    }

    #[cfg(feature = "float")]
    #[test]
    fn floats() {
        assert_eq!(show("3.3"), "3.3");
        assert_eq!(show("2."), "2.0");
    }

    #[test]
    fn lists() {
        assert_eq!(show("(1 2 3)"), "(1 2 3)");
        assert_eq!(show("(a (b c) d)"), "(a (b c) d)");
        assert_eq!(show("'x"), "'x");
        assert_eq!(show("'(1 2)"), "'(1 2)");
    }

    #[test]
    fn dotted_pairs() {
        let mut heap = Heap::new(64);
        let a = heap.integer(1).unwrap();
        let b = heap.integer(2).unwrap();
        let pair = heap.cons(a, b).unwrap();
        assert_eq!(print_val(pair, &heap), "(1 . 2)");
        let longer = heap.cons(a, pair).unwrap();
        assert_eq!(print_val(longer, &heap), "(1 1 . 2)");
    }

    #[test]
    fn errors_and_reclaimed_cells() {
        let mut heap = Heap::new(64);
        let e = heap.error("bad thing").unwrap();
        assert_eq!(print_val(e, &heap), "#<error: bad thing>");
        heap.destroy(e).unwrap();
        assert_eq!(print_val(e, &heap), "#<reclaimed>");
    }

    #[test]
    fn cycles_terminate() {
        let mut heap = Heap::new(64);
        let a = heap.integer(1).unwrap();
        let cell = heap.cons(a, NIL).unwrap();
        heap.set_cdr(cell, cell).unwrap();
        let text = print_val(cell, &heap);
        assert!(text.starts_with("(1 1 1"));
        assert!(text.ends_with(" ...)"));
    }
}
