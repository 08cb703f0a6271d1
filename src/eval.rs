use log::debug;

use crate::env;
use crate::error::{msg, LispResult};
use crate::heap::{Heap, HeapStats};
use crate::list;
use crate::primitives;
use crate::printer;
use crate::reader::{Reader, MAX_ATOM_LEN, MAX_NESTING};
use crate::symbol::{sym, SpecialForm};
use crate::value::{Cell, CellId, Native, Primitive, NIL};

/// Interpreter limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Config {
    /// Arena slots, counting Registry wrappers and protected roots.
    pub heap_capacity: usize,
    /// Nesting limit for non-tail evaluation.
    pub max_depth: usize,
    /// Longest atom the reader accepts.
    pub max_symbol_len: usize,
    /// How deeply the reader lets lists and quotes nest.
    pub max_nesting: usize,
}

impl Default for Config {
    fn default() -> Self {
        Config {
            heap_capacity: 1 << 20,
            max_depth: 500,
            max_symbol_len: MAX_ATOM_LEN,
            max_nesting: MAX_NESTING,
        }
    }
}

/// The interpreter context. Owns the heap, and with it the canonical Nil, the
/// Registry and the global environment.
pub struct Interp {
    pub heap: Heap,
    /// The global environment: a protected (frame . empty-env) cell.
    pub global: CellId,
    config: Config,
    depth: usize,
}

/// What an expression is, as far as `eval` cares.
#[derive(Debug, Clone, Copy)]
enum Shape {
    SelfEvaluating,
    Variable,
    Special(SpecialForm),
    Application,
    Unknown,
}

/// A decoded procedure value.
enum Procedure {
    Primitive(Native),
    Compound {
        params: CellId,
        body: CellId,
        env: CellId,
    },
    Unknown,
}

/// Outcome of evaluating all but the last expression of a sequence.
enum Sequence {
    Done(CellId),
    Tail(CellId),
}

impl Interp {
    pub fn new() -> LispResult<Self> {
        Self::with_config(Config::default())
    }

    /// Build Nil, the Registry, the empty environment and a global
    /// environment holding `true` = 1 and `false` = nil.
    pub fn with_config(config: Config) -> LispResult<Self> {
        let mut heap = Heap::new(config.heap_capacity);
        let frame = heap.alloc_root(Cell::Cons(NIL, NIL))?;
        let empty = heap.empty_env();
        let global = heap.alloc_root(Cell::Cons(frame, empty))?;

        let mut interp = Interp {
            heap,
            global,
            config,
            depth: 0,
        };

        let one = interp.heap.integer(1)?;
        interp.define_global(sym::TRUE, one)?;
        interp.define_global(sym::FALSE, NIL)?;
        Ok(interp)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    /// Tear everything down. Every registered cell is freed; the protected
    /// roots go with the interpreter.
    pub fn cleanup(mut self) -> LispResult<usize> {
        let freed = self.destroy_all()?;
        debug!("cleanup released {} cells", freed);
        Ok(freed)
    }

    // ========================================================================
    // Embedding API
    // ========================================================================

    /// A reader over `text` that allocates on this heap under the configured
    /// limits.
    pub fn reader<'a>(&'a mut self, text: &'a str) -> Reader<'a> {
        Reader::new(text, &mut self.heap)
            .with_max_atom_len(self.config.max_symbol_len)
            .with_max_nesting(self.config.max_nesting)
    }

    /// Read one datum from the front of `cursor`, advancing it.
    pub fn read(&mut self, cursor: &mut &str) -> LispResult<CellId> {
        let text: &str = *cursor;
        let mut reader = self.reader(text);
        let val = reader.read()?;
        let consumed = reader.position();
        *cursor = text.get(consumed..).unwrap_or("");
        Ok(val)
    }

    /// Read and evaluate every datum in `text` in the global environment,
    /// returning the last value. The whole text is read first, so a reader
    /// ERROR means nothing is evaluated. Evaluation stops at the first ERROR.
    pub fn eval_str(&mut self, text: &str) -> LispResult<CellId> {
        let forms = self.reader(text).read_all()?;
        if let Some(&last) = forms.last() {
            if self.heap.is_error(last)? {
                return Ok(last);
            }
        }

        let mut result = NIL;
        for form in forms {
            result = self.eval(form, self.global)?;
            if self.heap.is_error(result)? {
                break;
            }
        }
        Ok(result)
    }

    pub fn render(&self, val: CellId) -> String {
        printer::print_val(val, &self.heap)
    }

    /// Bind `name` in the global environment.
    pub fn define_global(&mut self, name: &str, val: CellId) -> LispResult<CellId> {
        let var = self.heap.symbol(name)?;
        env::define_variable(&mut self.heap, var, val, self.global)
    }

    pub fn lookup_global(&mut self, name: &str) -> LispResult<CellId> {
        let var = self.heap.symbol(name)?;
        env::lookup(&mut self.heap, var, self.global)
    }

    /// Wrap host code as a primitive procedure and bind it globally.
    pub fn define_primitive(&mut self, name: &str, f: impl Primitive + 'static) -> LispResult<CellId> {
        let prim = primitives::make_primitive(&mut self.heap, name, Native::new(f))?;
        self.define_global(name, prim)
    }

    // ========================================================================
    // Reclamation
    // ========================================================================

    /// Reclaim every registered cell not reachable from Nil, the environment
    /// roots or `extra_roots`. Only ever runs when the host calls it.
    pub fn collect(&mut self, extra_roots: &[CellId]) -> LispResult<usize> {
        self.heap.collect(extra_roots)
    }

    pub fn destroy(&mut self, target: CellId) -> LispResult<bool> {
        self.heap.destroy(target)
    }

    /// Free every registered cell. The global frame lost all its contents, so
    /// it is emptied to keep the global environment usable.
    pub fn destroy_all(&mut self) -> LispResult<usize> {
        let freed = self.heap.destroy_all()?;
        let frame = self.heap.car(self.global)?;
        self.heap.set_car(frame, NIL)?;
        self.heap.set_cdr(frame, NIL)?;
        Ok(freed)
    }

    pub fn registry_len(&self) -> LispResult<usize> {
        self.heap.registry_len()
    }

    pub fn stats(&self) -> LispResult<HeapStats> {
        self.heap.stats()
    }

    // ========================================================================
    // Evaluation
    // ========================================================================

    /// Evaluate `expr` in `env`. ERROR values come back as ordinary results;
    /// `Err` means the host ran out of heap or used a stale handle.
    pub fn eval(&mut self, expr: CellId, env: CellId) -> LispResult<CellId> {
        if self.depth >= self.config.max_depth {
            return self.heap.error(msg::RECURSION_TOO_DEEP);
        }
        self.depth += 1;
        let result = self.eval_loop(expr, env);
        self.depth -= 1;
        result
    }

    fn shape(&self, expr: CellId) -> LispResult<Shape> {
        let head = match self.heap.cell(expr)? {
            Cell::Nil | Cell::Integer(_) | Cell::Str(_) | Cell::Error(_) => {
                return Ok(Shape::SelfEvaluating)
            }
            #[cfg(feature = "float")]
            Cell::Float(_) => return Ok(Shape::SelfEvaluating),
            Cell::Symbol(_) => return Ok(Shape::Variable),
            Cell::Native(_) => return Ok(Shape::Unknown),
            Cell::Cons(car, _) => *car,
        };
        Ok(match self.heap.cell(head)? {
            Cell::Symbol(name) => match SpecialForm::from_name(name) {
                Some(form) => Shape::Special(form),
                None => Shape::Application,
            },
            _ => Shape::Application,
        })
    }

    /// The dispatch loop. Tail positions replace `expr`/`env` and go round
    /// again instead of recursing.
    fn eval_loop(&mut self, mut expr: CellId, mut env: CellId) -> LispResult<CellId> {
        loop {
            match self.shape(expr)? {
                Shape::SelfEvaluating => return Ok(expr),
                Shape::Variable => return env::lookup(&mut self.heap, expr, env),
                Shape::Unknown => return self.heap.error(msg::UNKNOWN_EXPRESSION),
                Shape::Special(SpecialForm::Quote) => return self.heap.cadr(expr),
                Shape::Special(SpecialForm::Set) => return self.eval_assignment(expr, env),
                Shape::Special(SpecialForm::Define) => return self.eval_definition(expr, env),
                Shape::Special(SpecialForm::Lambda) => {
                    let params = self.heap.cadr(expr)?;
                    let body = self.heap.cddr(expr)?;
                    return self.make_procedure(params, body, env);
                }
                Shape::Special(SpecialForm::If) => {
                    let pred = self.eval(self.heap.cadr(expr)?, env)?;
                    if self.heap.is_error(pred)? {
                        return Ok(pred);
                    }
                    // A missing alternate is cadddr = nil, which evaluates to nil.
                    expr = if self.is_true(pred)? {
                        self.heap.caddr(expr)?
                    } else {
                        self.heap.cadddr(expr)?
                    };
                }
                Shape::Special(SpecialForm::Begin) => {
                    let actions = self.heap.cdr(expr)?;
                    match self.eval_sequence_prefix(actions, env)? {
                        Sequence::Done(val) => return Ok(val),
                        Sequence::Tail(last) => expr = last,
                    }
                }
                Shape::Special(SpecialForm::Cond) => {
                    let clauses = self.heap.cdr(expr)?;
                    expr = self.expand_clauses(clauses)?;
                }
                Shape::Application => {
                    let op = self.eval(self.heap.car(expr)?, env)?;
                    if self.heap.is_error(op)? {
                        return Ok(op);
                    }
                    let args = self.list_of_values(self.heap.cdr(expr)?, env)?;
                    if self.heap.is_error(args)? {
                        return Ok(args);
                    }
                    match self.procedure(op)? {
                        Procedure::Primitive(native) => return native.0.call(self, args),
                        Procedure::Compound {
                            params,
                            body,
                            env: captured,
                        } => {
                            let new_env = env::extend(&mut self.heap, params, args, captured)?;
                            if self.heap.is_error(new_env)? {
                                return Ok(new_env);
                            }
                            env = new_env;
                            match self.eval_sequence_prefix(body, env)? {
                                Sequence::Done(val) => return Ok(val),
                                Sequence::Tail(last) => expr = last,
                            }
                        }
                        Procedure::Unknown => return self.heap.error(msg::UNKNOWN_PROCEDURE),
                    }
                }
            }
        }
    }

    /// Truth is anything but nil and the symbol `false`.
    pub fn is_true(&self, val: CellId) -> LispResult<bool> {
        Ok(!(val.is_nil() || self.heap.is_symbol_named(val, sym::FALSE)?))
    }

    fn ok(&mut self) -> LispResult<CellId> {
        self.heap.symbol(sym::OK)
    }

    /// (set! var val)
    fn eval_assignment(&mut self, expr: CellId, env: CellId) -> LispResult<CellId> {
        let var = self.heap.cadr(expr)?;
        let val = self.eval(self.heap.caddr(expr)?, env)?;
        if self.heap.is_error(val)? {
            return Ok(val);
        }
        let result = env::set_variable(&mut self.heap, var, val, env)?;
        if self.heap.is_error(result)? {
            return Ok(result);
        }
        self.ok()
    }

    /// (define name value) or (define (name . params) . body), the latter
    /// being (define name (lambda params . body)).
    fn eval_definition(&mut self, expr: CellId, env: CellId) -> LispResult<CellId> {
        let target = self.heap.cadr(expr)?;
        let (var, value_expr) = if self.heap.is_symbol(target)? {
            (target, self.heap.caddr(expr)?)
        } else if self.heap.is_cons(target)? {
            let name = self.heap.car(target)?;
            let params = self.heap.cdr(target)?;
            let body = self.heap.cddr(expr)?;
            (name, self.make_lambda(params, body)?)
        } else {
            return self.heap.error(msg::UNKNOWN_EXPRESSION);
        };

        let val = self.eval(value_expr, env)?;
        if self.heap.is_error(val)? {
            return Ok(val);
        }
        let result = env::define_variable(&mut self.heap, var, val, env)?;
        if self.heap.is_error(result)? {
            return Ok(result);
        }
        self.ok()
    }

    /// Evaluate every expression but the last. An ERROR stops the sequence.
    fn eval_sequence_prefix(&mut self, exps: CellId, env: CellId) -> LispResult<Sequence> {
        if !self.heap.is_cons(exps)? {
            return Ok(Sequence::Done(NIL));
        }
        let mut current = exps;
        loop {
            let first = self.heap.car(current)?;
            let rest = self.heap.cdr(current)?;
            if !self.heap.is_cons(rest)? {
                return Ok(Sequence::Tail(first));
            }
            let val = self.eval(first, env)?;
            if self.heap.is_error(val)? {
                return Ok(Sequence::Done(val));
            }
            current = rest;
        }
    }

    /// Evaluate a body left to right, returning the last value (nil if empty).
    pub fn eval_sequence(&mut self, exps: CellId, env: CellId) -> LispResult<CellId> {
        match self.eval_sequence_prefix(exps, env)? {
            Sequence::Done(val) => Ok(val),
            Sequence::Tail(last) => self.eval(last, env),
        }
    }

    /// Evaluate operands left to right into a fresh list, or return the first
    /// ERROR produced.
    fn list_of_values(&mut self, operands: CellId, env: CellId) -> LispResult<CellId> {
        let mut values = Vec::new();
        let mut current = operands;
        while self.heap.is_cons(current)? {
            let val = self.eval(self.heap.car(current)?, env)?;
            if self.heap.is_error(val)? {
                return Ok(val);
            }
            values.push(val);
            current = self.heap.cdr(current)?;
        }
        self.heap.list(&values)
    }

    /// Rewrite cond clauses into nested ifs:
    /// (test . actions) -> (if test (begin . actions) <rest>),
    /// (else . actions) -> (begin . actions), allowed only as the last clause.
    fn expand_clauses(&mut self, clauses: CellId) -> LispResult<CellId> {
        let clauses = match self.heap.list_to_vec(clauses)? {
            Some(clauses) => clauses,
            None => return self.heap.error(msg::UNKNOWN_EXPRESSION),
        };

        let mut expansion = NIL;
        for (i, &clause) in clauses.iter().enumerate().rev() {
            let test = self.heap.car(clause)?;
            let actions = self.heap.cdr(clause)?;
            let consequent = self.make_begin(actions)?;
            if self.heap.is_symbol_named(test, sym::ELSE)? {
                if i != clauses.len() - 1 {
                    return self.heap.error(msg::ELSE_NOT_LAST);
                }
                expansion = consequent;
            } else {
                let if_sym = self.heap.symbol(sym::IF)?;
                expansion = self.heap.list(&[if_sym, test, consequent, expansion])?;
            }
        }
        Ok(expansion)
    }

    fn make_begin(&mut self, actions: CellId) -> LispResult<CellId> {
        let begin = self.heap.symbol(sym::BEGIN)?;
        self.heap.cons(begin, actions)
    }

    fn make_lambda(&mut self, params: CellId, body: CellId) -> LispResult<CellId> {
        let lambda = self.heap.symbol(sym::LAMBDA)?;
        let rest = self.heap.cons(params, body)?;
        self.heap.cons(lambda, rest)
    }

    /// (procedure params body env)
    fn make_procedure(&mut self, params: CellId, body: CellId, env: CellId) -> LispResult<CellId> {
        let tag = self.heap.symbol(sym::PROCEDURE)?;
        self.heap.list(&[tag, params, body, env])
    }

    fn procedure(&self, proc: CellId) -> LispResult<Procedure> {
        if self.heap.is_tagged(proc, sym::PRIMITIVE)? {
            if let Cell::Native(native) = self.heap.cell(self.heap.caddr(proc)?)? {
                return Ok(Procedure::Primitive(native.clone()));
            }
        } else if self.heap.is_tagged(proc, sym::PROCEDURE)? {
            return Ok(Procedure::Compound {
                params: self.heap.cadr(proc)?,
                body: self.heap.caddr(proc)?,
                env: self.heap.cadddr(proc)?,
            });
        }
        Ok(Procedure::Unknown)
    }

    /// Apply a procedure value to an evaluated argument list.
    pub fn apply(&mut self, proc: CellId, args: CellId) -> LispResult<CellId> {
        match self.procedure(proc)? {
            Procedure::Primitive(native) => native.0.call(self, args),
            Procedure::Compound { params, body, env } => {
                let new_env = env::extend(&mut self.heap, params, args, env)?;
                if self.heap.is_error(new_env)? {
                    return Ok(new_env);
                }
                self.eval_sequence(body, new_env)
            }
            Procedure::Unknown => self.heap.error(msg::UNKNOWN_PROCEDURE),
        }
    }

    // ========================================================================
    // Higher-order list operations
    // ========================================================================

    /// Apply `f` to every element, collecting the results in a new list.
    /// Works for primitive and compound procedures alike.
    pub fn map(&mut self, f: CellId, list: CellId) -> LispResult<CellId> {
        let mut results = Vec::new();
        let mut current = list;
        while self.heap.is_cons(current)? {
            let x = self.heap.car(current)?;
            let args = self.heap.list(&[x])?;
            let val = self.apply(f, args)?;
            if self.heap.is_error(val)? {
                return Ok(val);
            }
            results.push(val);
            current = self.heap.cdr(current)?;
        }
        list::mklist(&mut self.heap, &results)
    }

    /// Left fold with a binary `f`: (f (f x1 x2) x3) ... A one-element list
    /// yields its element, an empty one nil.
    pub fn reduce(&mut self, f: CellId, list: CellId) -> LispResult<CellId> {
        if !self.heap.is_cons(list)? {
            return Ok(NIL);
        }
        let mut acc = self.heap.car(list)?;
        let mut rest = self.heap.cdr(list)?;
        while self.heap.is_cons(rest)? {
            let x = self.heap.car(rest)?;
            let args = self.heap.list(&[acc, x])?;
            acc = self.apply(f, args)?;
            if self.heap.is_error(acc)? {
                return Ok(acc);
            }
            rest = self.heap.cdr(rest)?;
        }
        Ok(acc)
    }
}
