use log::{debug, trace, warn};

use crate::error::{LispError, LispResult};
use crate::value::{Cell, CellId, Native, Raw, NIL};

/// One arena slot. `None` means the slot is on the free list.
struct Slot {
    cell: Option<Cell>,
    mark: bool,
}

/// Snapshot of arena occupancy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeapStats {
    pub capacity: usize,
    /// Slots holding a cell, registry wrappers and roots included.
    pub live: usize,
    /// Cells reachable through the Registry.
    pub registered: usize,
    pub free: usize,
}

/// The cell arena. Every cell is allocated here and, unless it is a protected
/// root, recorded in the Registry: a singly-linked list of wrapper cons cells
/// (car = registered cell, cdr = next wrapper) that lives in the same arena and
/// ends in an unregistered backing node.
///
/// Nothing here runs on its own initiative. Reclamation happens only through
/// `destroy`, `destroy_all` and `collect`, all called by the host.
pub struct Heap {
    slots: Vec<Slot>,
    free_list: Vec<CellId>,
    capacity: usize,
    /// Head wrapper of the Registry.
    registry: CellId,
    /// The Registry's backing node, always the last wrapper.
    backing: CellId,
    empty_env: CellId,
    /// Unregistered cells that are never destroyed or swept.
    roots: Vec<CellId>,
}

/// Slots taken by Nil, the Registry backing node and the empty environment.
const RESERVED: usize = 3;

impl Heap {
    pub fn new(capacity: usize) -> Self {
        // Handles are u32 slot indices.
        let capacity = capacity.clamp(RESERVED, u32::MAX as usize);
        let mut heap = Heap {
            slots: Vec::with_capacity(capacity.min(1024)),
            free_list: Vec::new(),
            capacity,
            registry: NIL,
            backing: NIL,
            empty_env: NIL,
            roots: Vec::new(),
        };

        // Nil is its own car and cdr; `car`/`cdr` special-case it.
        heap.slots.push(Slot {
            cell: Some(Cell::Nil),
            mark: false,
        });
        let backing = heap.push_slot(Cell::Cons(NIL, NIL));
        let empty_env = heap.push_slot(Cell::Cons(NIL, NIL));
        heap.backing = backing;
        heap.registry = backing;
        heap.empty_env = empty_env;
        heap
    }

    fn push_slot(&mut self, cell: Cell) -> CellId {
        let id = CellId(self.slots.len() as u32);
        self.slots.push(Slot {
            cell: Some(cell),
            mark: false,
        });
        id
    }

    fn live_slots(&self) -> usize {
        self.slots.len() - self.free_list.len()
    }

    /// Put a cell into a slot without registering it.
    fn place(&mut self, cell: Cell) -> LispResult<CellId> {
        if let Some(id) = self.free_list.pop() {
            let slot = &mut self.slots[id.index()];
            slot.cell = Some(cell);
            slot.mark = false;
            return Ok(id);
        }
        if self.slots.len() >= self.capacity {
            return Err(LispError::OutOfMemory(self.capacity));
        }
        Ok(self.push_slot(cell))
    }

    fn release(&mut self, id: CellId) {
        let slot = &mut self.slots[id.index()];
        slot.cell = None;
        slot.mark = false;
        self.free_list.push(id);
    }

    /// Allocate a cell and push it onto the head of the Registry. The cell is
    /// visible to reclamation before this returns.
    pub fn alloc(&mut self, cell: Cell) -> LispResult<CellId> {
        // The cell and its wrapper must both fit, or neither is placed.
        if self.capacity - self.live_slots() < 2 {
            return Err(LispError::OutOfMemory(self.capacity));
        }
        trace!("alloc {}", cell.type_name());
        let id = self.place(cell)?;
        let wrapper = self.place(Cell::Cons(id, self.registry))?;
        self.registry = wrapper;
        Ok(id)
    }

    /// Allocate a protected root: unregistered, never destroyed or swept.
    pub fn alloc_root(&mut self, cell: Cell) -> LispResult<CellId> {
        let id = self.place(cell)?;
        self.roots.push(id);
        Ok(id)
    }

    pub fn is_protected(&self, id: CellId) -> bool {
        id == NIL || id == self.backing || id == self.empty_env || self.roots.contains(&id)
    }

    /// The empty-environment sentinel.
    pub fn empty_env(&self) -> CellId {
        self.empty_env
    }

    /// The head of the Registry list.
    pub fn registry(&self) -> CellId {
        self.registry
    }

    // === Access ===

    pub fn cell(&self, id: CellId) -> LispResult<&Cell> {
        self.slots
            .get(id.index())
            .and_then(|s| s.cell.as_ref())
            .ok_or(LispError::Dangling(id))
    }

    /// Car of a cons. Nil and atoms answer Nil.
    pub fn car(&self, id: CellId) -> LispResult<CellId> {
        match self.cell(id)? {
            Cell::Cons(car, _) => Ok(*car),
            _ => Ok(NIL),
        }
    }

    /// Cdr of a cons. Nil and atoms answer Nil.
    pub fn cdr(&self, id: CellId) -> LispResult<CellId> {
        match self.cell(id)? {
            Cell::Cons(_, cdr) => Ok(*cdr),
            _ => Ok(NIL),
        }
    }

    pub fn cadr(&self, id: CellId) -> LispResult<CellId> {
        self.car(self.cdr(id)?)
    }

    pub fn cddr(&self, id: CellId) -> LispResult<CellId> {
        self.cdr(self.cdr(id)?)
    }

    pub fn caddr(&self, id: CellId) -> LispResult<CellId> {
        self.car(self.cddr(id)?)
    }

    pub fn cdddr(&self, id: CellId) -> LispResult<CellId> {
        self.cdr(self.cddr(id)?)
    }

    pub fn cadddr(&self, id: CellId) -> LispResult<CellId> {
        self.car(self.cdddr(id)?)
    }

    pub fn set_car(&mut self, id: CellId, val: CellId) -> LispResult<()> {
        if id == NIL {
            warn!("refusing to set the car of nil");
            return Ok(());
        }
        match self.cell_mut(id)? {
            Cell::Cons(car, _) => *car = val,
            other => warn!("set-car! on a {}", other.type_name()),
        }
        Ok(())
    }

    pub fn set_cdr(&mut self, id: CellId, val: CellId) -> LispResult<()> {
        if id == NIL {
            warn!("refusing to set the cdr of nil");
            return Ok(());
        }
        match self.cell_mut(id)? {
            Cell::Cons(_, cdr) => *cdr = val,
            other => warn!("set-cdr! on a {}", other.type_name()),
        }
        Ok(())
    }

    fn cell_mut(&mut self, id: CellId) -> LispResult<&mut Cell> {
        self.slots
            .get_mut(id.index())
            .and_then(|s| s.cell.as_mut())
            .ok_or(LispError::Dangling(id))
    }

    pub fn is_cons(&self, id: CellId) -> LispResult<bool> {
        Ok(matches!(self.cell(id)?, Cell::Cons(..)))
    }

    pub fn is_symbol(&self, id: CellId) -> LispResult<bool> {
        Ok(matches!(self.cell(id)?, Cell::Symbol(_)))
    }

    pub fn is_error(&self, id: CellId) -> LispResult<bool> {
        Ok(matches!(self.cell(id)?, Cell::Error(_)))
    }

    /// True for a symbol cell spelled `name`.
    pub fn is_symbol_named(&self, id: CellId, name: &str) -> LispResult<bool> {
        Ok(matches!(self.cell(id)?, Cell::Symbol(s) if &**s == name))
    }

    /// True for a cons whose car is the symbol `tag`.
    pub fn is_tagged(&self, id: CellId, tag: &str) -> LispResult<bool> {
        match self.cell(id)? {
            Cell::Cons(car, _) => self.is_symbol_named(*car, tag),
            _ => Ok(false),
        }
    }

    // === Construction ===

    pub fn cons(&mut self, car: CellId, cdr: CellId) -> LispResult<CellId> {
        self.alloc(Cell::Cons(car, cdr))
    }

    pub fn integer(&mut self, n: i64) -> LispResult<CellId> {
        self.alloc(Cell::Integer(n))
    }

    #[cfg(feature = "float")]
    pub fn float(&mut self, f: f64) -> LispResult<CellId> {
        self.alloc(Cell::Float(f))
    }

    pub fn string(&mut self, s: &str) -> LispResult<CellId> {
        self.alloc(Cell::Str(s.into()))
    }

    pub fn symbol(&mut self, name: &str) -> LispResult<CellId> {
        self.alloc(Cell::Symbol(name.into()))
    }

    pub fn error(&mut self, message: &str) -> LispResult<CellId> {
        self.alloc(Cell::Error(message.into()))
    }

    pub fn native(&mut self, f: Native) -> LispResult<CellId> {
        self.alloc(Cell::Native(f))
    }

    /// `(quote x)`.
    pub fn quote(&mut self, x: CellId) -> LispResult<CellId> {
        let tail = self.cons(x, NIL)?;
        let tag = self.symbol(crate::symbol::sym::QUOTE)?;
        self.cons(tag, tail)
    }

    /// Build a proper list from a slice of values.
    pub fn list(&mut self, values: &[CellId]) -> LispResult<CellId> {
        let mut result = NIL;
        for &val in values.iter().rev() {
            result = self.cons(val, result)?;
        }
        Ok(result)
    }

    /// Collect a proper list into a Vec. Returns None for an improper or
    /// cyclic list.
    pub fn list_to_vec(&self, list: CellId) -> LispResult<Option<Vec<CellId>>> {
        let mut result = Vec::new();
        let mut current = list;
        // Trails `current` at half speed; meeting it means a loop.
        let mut slow = list;
        loop {
            match self.cell(current)? {
                Cell::Nil => return Ok(Some(result)),
                Cell::Cons(car, cdr) => {
                    result.push(*car);
                    current = *cdr;
                }
                _ => return Ok(None),
            }
            if result.len() % 2 == 0 {
                slow = self.cdr(slow)?;
                if slow == current {
                    return Ok(None);
                }
            }
        }
    }

    // === Equality ===

    /// Compare a cell against a host literal. Nil matches only Nil; numbers,
    /// strings, symbols and errors compare by value; conses and natives only
    /// match `Raw::Cell` of the very same handle.
    pub fn eq(&self, id: CellId, raw: Raw<'_>) -> LispResult<bool> {
        let cell = self.cell(id)?;
        Ok(match (cell, raw) {
            (Cell::Nil, Raw::Nil) => true,
            (Cell::Nil, Raw::Cell(other)) => other == NIL,
            (Cell::Integer(n), Raw::Integer(m)) => *n == m,
            #[cfg(feature = "float")]
            (Cell::Float(f), Raw::Float(g)) => *f == g,
            (Cell::Str(s) | Cell::Symbol(s) | Cell::Error(s), Raw::Text(t)) => &**s == t,
            (Cell::Cons(..) | Cell::Native(_), Raw::Cell(other)) => id == other,
            _ => false,
        })
    }

    /// Cell equality. Identical handles are always equal; otherwise the
    /// variants must match and atoms compare by value. Conses and natives
    /// compare by identity only, so two separately built lists with the same
    /// contents are not equal.
    pub fn equals(&self, lhs: CellId, rhs: CellId) -> LispResult<bool> {
        if lhs == rhs {
            return Ok(true);
        }
        Ok(match (self.cell(lhs)?, self.cell(rhs)?) {
            (Cell::Nil, Cell::Nil) => true,
            (Cell::Integer(a), Cell::Integer(b)) => a == b,
            #[cfg(feature = "float")]
            (Cell::Float(a), Cell::Float(b)) => a == b,
            (Cell::Str(a), Cell::Str(b))
            | (Cell::Symbol(a), Cell::Symbol(b))
            | (Cell::Error(a), Cell::Error(b)) => a == b,
            _ => false,
        })
    }

    // === Registry ===

    /// Number of wrapper nodes in the Registry, backing node included.
    pub fn registry_len(&self) -> LispResult<usize> {
        let mut count = 1;
        let mut current = self.registry;
        while current != self.backing {
            count += 1;
            current = self.cdr(current)?;
        }
        Ok(count)
    }

    /// The wrapper node that registers `target`, if any.
    pub fn find_object(&self, target: CellId) -> LispResult<Option<CellId>> {
        let mut current = self.registry;
        while current != self.backing {
            if self.car(current)? == target {
                return Ok(Some(current));
            }
            current = self.cdr(current)?;
        }
        Ok(None)
    }

    /// Free one registered cell and splice its wrapper out of the Registry.
    /// Protected roots are left alone. Returns whether anything was freed.
    ///
    /// Handles still pointing at the destroyed cell become dangling; keeping
    /// track of that is the caller's job.
    pub fn destroy(&mut self, target: CellId) -> LispResult<bool> {
        if self.is_protected(target) {
            warn!("refusing to destroy protected cell {:?}", target);
            return Ok(false);
        }

        let mut prev: Option<CellId> = None;
        let mut current = self.registry;
        while current != self.backing {
            let next = self.cdr(current)?;
            if self.car(current)? == target {
                match prev {
                    None => self.registry = next,
                    Some(p) => self.set_cdr(p, next)?,
                }
                self.release(target);
                self.release(current);
                trace!("destroyed {:?}", target);
                return Ok(true);
            }
            prev = Some(current);
            current = next;
        }
        Ok(false)
    }

    /// Free every registered cell. Only the backing node stays in the
    /// Registry; protected roots survive.
    pub fn destroy_all(&mut self) -> LispResult<usize> {
        let mut count = 0;
        while self.registry != self.backing {
            let head = self.registry;
            let target = self.car(head)?;
            self.registry = self.cdr(head)?;
            self.release(target);
            self.release(head);
            count += 1;
        }
        debug!("destroy_all freed {} cells", count);
        Ok(count)
    }

    // === Mark and sweep ===

    /// Clear all mark bits.
    pub fn clear_marks(&mut self) {
        for slot in &mut self.slots {
            slot.mark = false;
        }
    }

    /// Mark a cell as reachable and queue it for tracing.
    pub fn mark_value(&mut self, id: CellId, worklist: &mut Vec<CellId>) {
        if let Some(slot) = self.slots.get_mut(id.index()) {
            if slot.cell.is_some() && !slot.mark {
                slot.mark = true;
                worklist.push(id);
            }
        }
    }

    /// Trace the worklist: each marked cons marks its car and cdr.
    pub fn process_worklist(&mut self, worklist: &mut Vec<CellId>) {
        while let Some(id) = worklist.pop() {
            if let Some(Cell::Cons(car, cdr)) = self.slots[id.index()].cell {
                self.mark_value(car, worklist);
                self.mark_value(cdr, worklist);
            }
        }
    }

    pub fn is_marked(&self, id: CellId) -> bool {
        self.slots.get(id.index()).map_or(false, |s| s.mark)
    }

    /// Walk the Registry and reclaim every unmarked cell. Returns the number
    /// of cells freed.
    pub fn sweep(&mut self) -> LispResult<usize> {
        let mut freed = 0;
        let mut prev: Option<CellId> = None;
        let mut current = self.registry;
        while current != self.backing {
            let next = self.cdr(current)?;
            let target = self.car(current)?;
            if self.is_marked(target) {
                prev = Some(current);
            } else {
                match prev {
                    None => self.registry = next,
                    Some(p) => self.set_cdr(p, next)?,
                }
                self.release(target);
                self.release(current);
                freed += 1;
            }
            current = next;
        }
        Ok(freed)
    }

    /// Mark from the protected roots plus `extra_roots`, then sweep.
    pub fn collect(&mut self, extra_roots: &[CellId]) -> LispResult<usize> {
        self.clear_marks();
        let mut worklist = Vec::new();

        self.mark_value(NIL, &mut worklist);
        self.mark_value(self.empty_env, &mut worklist);
        for i in 0..self.roots.len() {
            let root = self.roots[i];
            self.mark_value(root, &mut worklist);
        }
        for &root in extra_roots {
            self.mark_value(root, &mut worklist);
        }
        self.process_worklist(&mut worklist);

        let freed = self.sweep()?;
        debug!(
            "collect freed {} cells, {} slots live",
            freed,
            self.live_slots()
        );
        Ok(freed)
    }

    pub fn stats(&self) -> LispResult<HeapStats> {
        Ok(HeapStats {
            capacity: self.capacity,
            live: self.live_slots(),
            registered: self.registry_len()? - 1,
            free: self.capacity - self.live_slots(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn alloc_registers_at_head() {
        let mut heap = Heap::new(64);
        assert_eq!(heap.registry_len().unwrap(), 1);
        let a = heap.integer(3).unwrap();
        let b = heap.integer(6).unwrap();
        let pair = heap.cons(a, b).unwrap();
        assert_eq!(heap.registry_len().unwrap(), 4);
        assert_eq!(heap.car(heap.registry()).unwrap(), pair);
        assert_eq!(heap.car(pair).unwrap(), a);
        assert_eq!(heap.cdr(pair).unwrap(), b);
        assert!(heap.find_object(a).unwrap().is_some());
    }

    #[test]
    fn nil_is_its_own_car_and_cdr() {
        let heap = Heap::new(8);
        assert_eq!(heap.car(NIL).unwrap(), NIL);
        assert_eq!(heap.cdr(NIL).unwrap(), NIL);
    }

    #[test]
    fn atoms_are_copied() {
        let mut heap = Heap::new(16);
        let text = String::from("transient");
        let s = heap.string(&text).unwrap();
        drop(text);
        assert!(heap.eq(s, Raw::Text("transient")).unwrap());
    }

    #[test]
    fn out_of_memory_is_an_error() {
        let mut heap = Heap::new(RESERVED + 4);
        heap.integer(1).unwrap();
        heap.integer(2).unwrap();
        assert_eq!(heap.integer(3), Err(LispError::OutOfMemory(RESERVED + 4)));
    }

    #[test]
    fn destroy_splices_and_reuses_slots() {
        let mut heap = Heap::new(16);
        let a = heap.symbol("a").unwrap();
        let b = heap.symbol("b").unwrap();
        let c = heap.symbol("c").unwrap();
        assert!(heap.destroy(b).unwrap());
        assert_eq!(heap.registry_len().unwrap(), 3);
        assert!(heap.find_object(b).unwrap().is_none());
        assert_eq!(heap.cell(b).unwrap_err(), LispError::Dangling(b));
        assert!(heap.find_object(a).unwrap().is_some());
        assert!(heap.find_object(c).unwrap().is_some());

        // Destroying the head works too.
        assert!(heap.destroy(c).unwrap());
        assert_eq!(heap.registry_len().unwrap(), 2);

        let live = heap.stats().unwrap().live;
        heap.symbol("d").unwrap();
        assert_eq!(heap.stats().unwrap().live, live + 2);
    }

    #[test]
    fn protected_cells_survive_destroy() {
        let mut heap = Heap::new(16);
        let root = heap.alloc_root(Cell::Cons(NIL, NIL)).unwrap();
        assert!(!heap.destroy(NIL).unwrap());
        assert!(!heap.destroy(heap.empty_env()).unwrap());
        assert!(!heap.destroy(root).unwrap());
        assert!(heap.cell(root).is_ok());
    }

    #[test]
    fn destroy_all_leaves_backing_node() {
        let mut heap = Heap::new(64);
        for n in 0..5 {
            heap.integer(n).unwrap();
        }
        assert_eq!(heap.destroy_all().unwrap(), 5);
        assert_eq!(heap.registry_len().unwrap(), 1);
        assert!(matches!(heap.cell(NIL).unwrap(), Cell::Nil));
    }

    #[test]
    fn collect_keeps_reachable_cells() {
        let mut heap = Heap::new(64);
        let one = heap.integer(1).unwrap();
        let two = heap.integer(2).unwrap();
        let kept = heap.list(&[one, two]).unwrap();
        let garbage = heap.symbol("garbage").unwrap();

        let freed = heap.collect(&[kept]).unwrap();
        assert_eq!(freed, 1);
        assert!(heap.cell(garbage).is_err());
        assert!(heap.eq(heap.car(kept).unwrap(), Raw::Integer(1)).unwrap());
        assert_eq!(heap.registry_len().unwrap(), 5);
    }

    #[test]
    fn collect_traces_through_roots() {
        let mut heap = Heap::new(64);
        let root = heap.alloc_root(Cell::Cons(NIL, NIL)).unwrap();
        let val = heap.string("held").unwrap();
        heap.set_car(root, val).unwrap();
        heap.collect(&[]).unwrap();
        assert!(heap.eq(val, Raw::Text("held")).unwrap());
    }

    #[test]
    fn cyclic_structure_is_collected() {
        let mut heap = Heap::new(64);
        let a = heap.cons(NIL, NIL).unwrap();
        let b = heap.cons(a, a).unwrap();
        heap.set_cdr(a, b).unwrap();
        assert_eq!(heap.collect(&[]).unwrap(), 2);
        assert_eq!(heap.registry_len().unwrap(), 1);
    }

    #[test]
    fn capacity_is_limited_to_handle_range() {
        let heap = Heap::new(usize::MAX);
        assert_eq!(heap.stats().unwrap().capacity, u32::MAX as usize);
        let tiny = Heap::new(0);
        assert_eq!(tiny.stats().unwrap().capacity, RESERVED);
    }

    #[test]
    fn raw_nil_matches_only_nil() {
        let mut heap = Heap::new(64);
        assert!(heap.eq(NIL, Raw::Nil).unwrap());
        assert!(heap.eq(NIL, Raw::Cell(NIL)).unwrap());
        let zero = heap.integer(0).unwrap();
        assert!(!heap.eq(zero, Raw::Nil).unwrap());
        let empty = heap.string("").unwrap();
        assert!(!heap.eq(empty, Raw::Nil).unwrap());
        let pair = heap.cons(NIL, NIL).unwrap();
        assert!(!heap.eq(pair, Raw::Nil).unwrap());
        assert!(!heap.eq(NIL, Raw::Integer(0)).unwrap());
    }

    #[cfg(feature = "float")]
    #[test]
    fn raw_float_compares_by_value() {
        let mut heap = Heap::new(64);
        let f = heap.float(2.5).unwrap();
        assert!(heap.eq(f, Raw::Float(2.5)).unwrap());
        assert!(!heap.eq(f, Raw::Float(2.25)).unwrap());
        // No cross-variant matching between integers and floats.
        let n = heap.integer(2).unwrap();
        assert!(!heap.eq(n, Raw::Float(2.0)).unwrap());
        assert!(!heap.eq(f, Raw::Integer(2)).unwrap());
    }

    #[test]
    fn raw_text_matches_error_message() {
        let mut heap = Heap::new(64);
        let e = heap.error("Something broke").unwrap();
        assert!(heap.eq(e, Raw::Text("Something broke")).unwrap());
        assert!(!heap.eq(e, Raw::Text("Something else")).unwrap());
        assert!(heap.is_error(e).unwrap());
    }

    #[test]
    fn natives_compare_by_identity() {
        fn ident(_: &mut crate::eval::Interp, args: CellId) -> LispResult<CellId> {
            Ok(args)
        }
        let mut heap = Heap::new(64);
        let shared = Native::new(ident);
        let a = heap.native(shared.clone()).unwrap();
        let b = heap.native(shared).unwrap();
        assert!(heap.eq(a, Raw::Cell(a)).unwrap());
        assert!(!heap.eq(a, Raw::Cell(b)).unwrap());
        assert!(!heap.equals(a, b).unwrap());
        assert!(heap.equals(a, a).unwrap());
    }

    #[test]
    fn list_to_vec_rejects_cycles() {
        let mut heap = Heap::new(64);
        let one = heap.integer(1).unwrap();
        let two = heap.integer(2).unwrap();
        let list = heap.list(&[one, two]).unwrap();
        assert_eq!(heap.list_to_vec(list).unwrap(), Some(vec![one, two]));

        let tail = heap.cdr(list).unwrap();
        heap.set_cdr(tail, list).unwrap();
        assert_eq!(heap.list_to_vec(list).unwrap(), None);

        let single = heap.cons(one, NIL).unwrap();
        heap.set_cdr(single, single).unwrap();
        assert_eq!(heap.list_to_vec(single).unwrap(), None);
    }
}
