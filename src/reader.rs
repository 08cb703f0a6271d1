use crate::error::{msg, LispResult};
use crate::heap::Heap;
use crate::value::{CellId, NIL};

/// Longest atom the reader accepts, in bytes.
pub const MAX_ATOM_LEN: usize = 256;

/// How many lists and quotes may enclose a datum.
pub const MAX_NESTING: usize = 512;

/// Recursive-descent reader: parses source text straight into heap cells.
/// There is no separate tokenizer.
pub struct Reader<'a> {
    input: &'a [u8],
    pos: usize,
    heap: &'a mut Heap,
    max_atom_len: usize,
    depth: usize,
    max_depth: usize,
}

impl<'a> Reader<'a> {
    pub fn new(input: &'a str, heap: &'a mut Heap) -> Self {
        Reader {
            input: input.as_bytes(),
            pos: 0,
            heap,
            max_atom_len: MAX_ATOM_LEN,
            depth: 0,
            max_depth: MAX_NESTING,
        }
    }

    pub fn with_max_atom_len(mut self, max_atom_len: usize) -> Self {
        self.max_atom_len = max_atom_len;
        self
    }

    pub fn with_max_nesting(mut self, max_depth: usize) -> Self {
        self.max_depth = max_depth;
        self
    }

    /// Read one datum. Empty or blank input reads as Nil.
    pub fn read(&mut self) -> LispResult<CellId> {
        self.read_expr()
    }

    /// Read every remaining datum. Reading stops after the first ERROR value,
    /// which is the last element returned.
    pub fn read_all(&mut self) -> LispResult<Vec<CellId>> {
        let mut results = Vec::new();
        while !self.at_end() {
            let val = self.read_expr()?;
            results.push(val);
            if self.heap.is_error(val)? {
                break;
            }
        }
        Ok(results)
    }

    /// Return current position in input.
    pub fn position(&self) -> usize {
        self.pos
    }

    /// Skip blanks and report whether anything is left to read.
    pub fn at_end(&mut self) -> bool {
        self.skip_whitespace_and_comments();
        self.pos >= self.input.len()
    }

    fn peek(&self) -> Option<u8> {
        self.input.get(self.pos).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let ch = self.peek()?;
        self.pos += 1;
        Some(ch)
    }

    fn skip_whitespace_and_comments(&mut self) {
        loop {
            while self.peek().map_or(false, |ch| ch.is_ascii_whitespace()) {
                self.pos += 1;
            }
            // Line comments only start where a datum could.
            if self.peek() == Some(b';') {
                while self.peek().map_or(false, |ch| ch != b'\n') {
                    self.pos += 1;
                }
            } else {
                break;
            }
        }
    }

    fn read_expr(&mut self) -> LispResult<CellId> {
        self.skip_whitespace_and_comments();

        let Some(ch) = self.peek() else {
            return Ok(NIL);
        };

        match ch {
            b'\'' => self.nested(Self::read_quote),
            b'(' => self.nested(Self::read_list),
            b')' => {
                self.advance();
                self.heap.error(msg::UNEXPECTED_CLOSE)
            }
            b'"' => self.read_string(),
            _ => self.read_atom(),
        }
    }

    /// Run `read` one nesting level down. Past the limit the datum is
    /// rejected with an ERROR value instead of recursing further.
    fn nested(&mut self, read: fn(&mut Self) -> LispResult<CellId>) -> LispResult<CellId> {
        if self.depth >= self.max_depth {
            return self.heap.error(msg::NESTING_TOO_DEEP);
        }
        self.depth += 1;
        let result = read(self);
        self.depth -= 1;
        result
    }

    /// 'expr -> (quote expr)
    fn read_quote(&mut self) -> LispResult<CellId> {
        self.advance(); // consume '\''
        let expr = self.read_expr()?;
        if self.heap.is_error(expr)? {
            return Ok(expr);
        }
        self.heap.quote(expr)
    }

    /// (a b c). `()` is Nil. Running out of input before the `)` is an
    /// ERROR value, as is any ERROR read for an element.
    fn read_list(&mut self) -> LispResult<CellId> {
        self.advance(); // consume '('

        let mut elements = Vec::new();
        loop {
            self.skip_whitespace_and_comments();
            match self.peek() {
                None => return self.heap.error(msg::LIST_NOT_TERMINATED),
                Some(b')') => {
                    self.advance();
                    break;
                }
                Some(_) => {
                    let element = self.read_expr()?;
                    if self.heap.is_error(element)? {
                        return Ok(element);
                    }
                    elements.push(element);
                }
            }
        }

        self.heap.list(&elements)
    }

    /// "text". A backslash makes the next character literal and is itself
    /// dropped. Input that ends inside the string yields what was collected.
    fn read_string(&mut self) -> LispResult<CellId> {
        self.advance(); // consume '"'
        let mut bytes = Vec::new();

        while let Some(ch) = self.advance() {
            match ch {
                b'"' => break,
                b'\\' => {
                    if let Some(escaped) = self.advance() {
                        bytes.push(escaped);
                    }
                }
                c => bytes.push(c),
            }
        }

        let text = String::from_utf8_lossy(&bytes);
        self.heap.string(&text)
    }

    /// Integer, float or symbol, in that order of preference.
    fn read_atom(&mut self) -> LispResult<CellId> {
        let start = self.pos;
        while let Some(ch) = self.peek() {
            if ch.is_ascii_whitespace() || ch == b')' {
                break;
            }
            self.pos += 1;
        }

        if self.pos - start > self.max_atom_len {
            return self.heap.error(msg::SYMBOL_TOO_LONG);
        }

        let word = String::from_utf8_lossy(&self.input[start..self.pos]);
        if let Some(n) = parse_integer(&word) {
            return self.heap.integer(n);
        }
        #[cfg(feature = "float")]
        if let Ok(f) = word.parse::<f64>() {
            return self.heap.float(f);
        }
        self.heap.symbol(&word)
    }
}

/// Integer literal with optional sign, `0x` hex and leading-zero octal.
fn parse_integer(word: &str) -> Option<i64> {
    let (negative, digits) = match word.as_bytes().first()? {
        b'-' => (true, &word[1..]),
        b'+' => (false, &word[1..]),
        _ => (false, word),
    };

    let (radix, body) = if let Some(hex) = digits
        .strip_prefix("0x")
        .or_else(|| digits.strip_prefix("0X"))
    {
        (16, hex)
    } else if digits.len() > 1 && digits.starts_with('0') {
        (8, &digits[1..])
    } else {
        (10, digits)
    };

    if body.is_empty() || !body.chars().all(|c| c.is_digit(radix)) {
        return None;
    }
    if negative {
        i64::from_str_radix(&format!("-{}", body), radix).ok()
    } else {
        i64::from_str_radix(body, radix).ok()
    }
}

/// Read one datum from the front of `input` and advance it past the text
/// consumed.
pub fn read(input: &mut &str, heap: &mut Heap) -> LispResult<CellId> {
    let text: &str = *input;
    let mut reader = Reader::new(text, heap);
    let val = reader.read()?;
    let consumed = reader.position();
    *input = text.get(consumed..).unwrap_or("");
    Ok(val)
}

/// Read a single datum from a string.
pub fn read_str(input: &str, heap: &mut Heap) -> LispResult<CellId> {
    Reader::new(input, heap).read()
}

/// Read every datum in `input`.
pub fn read_all(input: &str, heap: &mut Heap) -> LispResult<Vec<CellId>> {
    Reader::new(input, heap).read_all()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::list;
    use crate::value::{Cell, Raw};

    fn heap() -> Heap {
        Heap::new(4096)
    }

    #[test]
    fn reads_integers() {
        let mut heap = heap();
        let n = read_str("3", &mut heap).unwrap();
        assert!(heap.eq(n, Raw::Integer(3)).unwrap());
        let n = read_str("  4  ", &mut heap).unwrap();
        assert!(heap.eq(n, Raw::Integer(4)).unwrap());
        let n = read_str("5432", &mut heap).unwrap();
        assert!(heap.eq(n, Raw::Integer(5432)).unwrap());
        let n = read_str("-17", &mut heap).unwrap();
        assert!(heap.eq(n, Raw::Integer(-17)).unwrap());
        let n = read_str("0x1F", &mut heap).unwrap();
        assert!(heap.eq(n, Raw::Integer(31)).unwrap());
        let n = read_str("017", &mut heap).unwrap();
        assert!(heap.eq(n, Raw::Integer(15)).unwrap());
    }

    #[cfg(feature = "float")]
    #[test]
    fn reads_floats() {
        let mut heap = heap();
        let f = read_str("3.3", &mut heap).unwrap();
        assert!(matches!(heap.cell(f).unwrap(), Cell::Float(x) if *x == 3.3));
    }

    #[test]
    fn reads_symbols() {
        let mut heap = heap();
        let a = read_str("ABCD", &mut heap).unwrap();
        assert!(heap.is_symbol(a).unwrap());
        assert!(heap.eq(a, Raw::Text("ABCD")).unwrap());
        for text in ["+", "-", "set!", "null?"] {
            let s = read_str(text, &mut heap).unwrap();
            assert!(heap.is_symbol_named(s, text).unwrap());
        }
    }

    #[test]
    fn only_first_datum_is_read() {
        let mut heap = heap();
        let a = read_str("XYZ ABC", &mut heap).unwrap();
        let b = read_str("XYZ DEF", &mut heap).unwrap();
        assert!(heap.equals(a, b).unwrap());
    }

    #[test]
    fn cursor_advances() {
        let mut heap = heap();
        let mut cursor = "(a b) 42 rest";
        let first = read(&mut cursor, &mut heap).unwrap();
        assert_eq!(list::length(&heap, first).unwrap(), Some(2));
        let second = read(&mut cursor, &mut heap).unwrap();
        assert!(heap.eq(second, Raw::Integer(42)).unwrap());
        assert_eq!(cursor.trim(), "rest");
    }

    #[test]
    fn blank_input_is_nil() {
        let mut heap = heap();
        assert_eq!(read_str("", &mut heap).unwrap(), NIL);
        assert_eq!(read_str("   \n\n\n\t     ", &mut heap).unwrap(), NIL);
        assert_eq!(read_str("()", &mut heap).unwrap(), NIL);
        assert_eq!(read_str("  (   \n  )  ", &mut heap).unwrap(), NIL);
    }

    #[test]
    fn reads_nested_lists() {
        let mut heap = heap();
        let l = read_str("(100 200 (300 400 500 (AAA XYZ C) 600) 700)", &mut heap).unwrap();
        assert_eq!(list::length(&heap, l).unwrap(), Some(4));
        let inner = list::nth(&heap, l, 3).unwrap();
        assert_eq!(list::length(&heap, inner).unwrap(), Some(5));
        let innermost = list::nth(&heap, inner, 4).unwrap();
        assert!(heap.eq(list::nth(&heap, innermost, 2).unwrap(), Raw::Text("XYZ")).unwrap());
    }

    #[test]
    fn quote_wraps_next_datum() {
        let mut heap = heap();
        let q = read_str("'A", &mut heap).unwrap();
        assert!(heap.is_symbol_named(heap.car(q).unwrap(), "quote").unwrap());
        assert!(heap.is_symbol_named(heap.cadr(q).unwrap(), "A").unwrap());
        assert_eq!(heap.cddr(q).unwrap(), NIL);

        let q = read_str("'(1 '2)", &mut heap).unwrap();
        let quoted = heap.cadr(q).unwrap();
        assert_eq!(list::length(&heap, quoted).unwrap(), Some(2));
        assert!(heap.is_tagged(heap.cadr(quoted).unwrap(), "quote").unwrap());
    }

    #[test]
    fn strings_keep_spaces_and_brackets() {
        let mut heap = heap();
        let s = read_str("\"a string\"", &mut heap).unwrap();
        assert!(matches!(heap.cell(s).unwrap(), Cell::Str(_)));
        assert!(heap.eq(s, Raw::Text("a string")).unwrap());
        let s = read_str("\"a (string)\"", &mut heap).unwrap();
        assert!(heap.eq(s, Raw::Text("a (string)")).unwrap());
    }

    #[test]
    fn string_escapes() {
        let mut heap = heap();
        let s = read_str("\"a \\\"str\\\\ing\\\"", &mut heap).unwrap();
        assert!(heap.eq(s, Raw::Text("a \"str\\ing\"")).unwrap());
    }

    #[test]
    fn unterminated_list_is_an_error_value() {
        let mut heap = heap();
        let e = read_str("(1 2", &mut heap).unwrap();
        assert!(heap.eq(e, Raw::Text(msg::LIST_NOT_TERMINATED)).unwrap());
        assert!(heap.is_error(e).unwrap());
        let e = read_str("(1 (2 3)", &mut heap).unwrap();
        assert!(heap.is_error(e).unwrap());
    }

    #[test]
    fn long_atoms_are_rejected() {
        let mut heap = heap();
        let exact = "a".repeat(MAX_ATOM_LEN);
        let s = read_str(&exact, &mut heap).unwrap();
        assert!(heap.is_symbol(s).unwrap());

        let long = "a".repeat(MAX_ATOM_LEN + 1);
        let e = read_str(&long, &mut heap).unwrap();
        assert!(heap.eq(e, Raw::Text(msg::SYMBOL_TOO_LONG)).unwrap());
        assert!(heap.is_error(e).unwrap());

        let e = read_str(&format!("(x {})", long), &mut heap).unwrap();
        assert!(heap.is_error(e).unwrap());
    }

    #[test]
    fn stray_close_paren_is_consumed() {
        let mut heap = heap();
        let mut cursor = ") 5";
        let e = read(&mut cursor, &mut heap).unwrap();
        assert!(heap.is_error(e).unwrap());
        let n = read(&mut cursor, &mut heap).unwrap();
        assert!(heap.eq(n, Raw::Integer(5)).unwrap());
    }

    #[test]
    fn comments_are_skipped() {
        let mut heap = heap();
        let all = read_all("; leading\n(a ; inside\n b)\n; trailing", &mut heap).unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(list::length(&heap, all[0]).unwrap(), Some(2));
    }

    #[test]
    fn read_all_stops_at_error() {
        let mut heap = heap();
        let all = read_all("1 ) 2", &mut heap).unwrap();
        assert_eq!(all.len(), 2);
        assert!(heap.is_error(all[1]).unwrap());
    }

    #[test]
    fn deep_nesting_is_an_error_value() {
        let mut heap = Heap::new(1 << 16);
        let e = read_str(&"(".repeat(100_000), &mut heap).unwrap();
        assert!(heap.eq(e, Raw::Text(msg::NESTING_TOO_DEEP)).unwrap());

        let e = read_str(&format!("{}a", "'".repeat(100_000)), &mut heap).unwrap();
        assert!(heap.eq(e, Raw::Text(msg::NESTING_TOO_DEEP)).unwrap());

        let balanced = format!("{}{}", "(".repeat(100_000), ")".repeat(100_000));
        let e = read_str(&balanced, &mut heap).unwrap();
        assert!(heap.is_error(e).unwrap());
    }

    #[test]
    fn nesting_up_to_the_limit_reads() {
        let mut heap = Heap::new(1 << 16);
        let text = format!("{}x{}", "(".repeat(MAX_NESTING), ")".repeat(MAX_NESTING));
        let val = read_str(&text, &mut heap).unwrap();
        assert!(heap.is_cons(val).unwrap());

        let text = format!("{}x{}", "(".repeat(MAX_NESTING + 1), ")".repeat(MAX_NESTING + 1));
        let e = read_str(&text, &mut heap).unwrap();
        assert!(heap.eq(e, Raw::Text(msg::NESTING_TOO_DEEP)).unwrap());
    }

    #[test]
    fn nesting_limit_is_configurable() {
        let mut heap = Heap::new(256);
        let text = format!("{}x", "'".repeat(3));
        let mut reader = Reader::new(&text, &mut heap).with_max_nesting(2);
        let e = reader.read().unwrap();
        assert!(reader.heap.eq(e, Raw::Text(msg::NESTING_TOO_DEEP)).unwrap());

        let mut reader = Reader::new("''x", &mut heap).with_max_nesting(2);
        let q = reader.read().unwrap();
        assert!(reader.heap.is_tagged(q, "quote").unwrap());
    }
}
