//! Heap object registry, string interning, and the mark-sweep collector.
//!
//! The heap is the unique owner of every runtime object. Allocation hands
//! out [`ObjRef`] index handles; the slot vector doubles as the allocation
//! registry the sweeper walks, with a free list for slot reuse. Mark bits
//! live in a parallel vector so the trace loop can read an object while it
//! flags that object's children.
//!
//! The interned-string set is deliberately *weak*: it is not traced as a
//! root, and after marking any entry whose key did not survive is dropped.
//! That is what lets dead strings be collected at all.
//!
//! The heap never starts a collection on its own. The VM owns the roots, so
//! the VM decides when to collect; the heap only reports when the allocation
//! counter has crossed the threshold.

use crate::object::{Class, Closure, Function, Instance, Obj, ObjRef, StrRef, StringObj, Upvalue};
use crate::table::Table;
use crate::value::Value;

/// First collection fires once this many bytes are live.
const FIRST_GC_THRESHOLD: usize = 1024 * 1024;
/// After a collection the threshold is the surviving bytes times this.
const HEAP_GROW_FACTOR: usize = 2;

/// 32-bit FNV-1a.
pub(crate) fn hash_str(text: &str) -> u32 {
    let mut hash: u32 = 2166136261;
    for byte in text.bytes() {
        hash ^= u32::from(byte);
        hash = hash.wrapping_mul(16777619);
    }
    hash
}

#[derive(Default)]
pub struct Heap {
    slots: Vec<Option<Obj>>,
    marks: Vec<bool>,
    /// Bytes charged to each slot at allocation time. Objects that grow
    /// afterwards (closures, field tables) are not re-measured; the counter
    /// is a trigger heuristic, and charging a fixed amount per slot keeps
    /// the books exact on free.
    sizes: Vec<usize>,
    free: Vec<u32>,
    /// Interned strings, keyed by themselves (values are `nil`). Weak.
    strings: Table,
    /// Marked-but-not-scanned objects pending trace.
    gray: Vec<ObjRef>,
    bytes_allocated: usize,
    next_gc: usize,
}

impl Heap {
    pub fn new() -> Self {
        Self {
            next_gc: FIRST_GC_THRESHOLD,
            ..Self::default()
        }
    }

    // -----------------------------------------------------------------------
    // Allocation and interning
    // -----------------------------------------------------------------------

    /// Register a new object and return its handle. This never collects;
    /// the VM checks [`Heap::should_collect`] at its allocation sites.
    pub fn alloc(&mut self, obj: Obj) -> ObjRef {
        let size = obj.byte_count();
        let kind = obj.kind_name();
        self.bytes_allocated += size;
        let index = match self.free.pop() {
            Some(i) => {
                self.slots[i as usize] = Some(obj);
                self.sizes[i as usize] = size;
                i
            }
            None => {
                self.slots.push(Some(obj));
                self.marks.push(false);
                self.sizes.push(size);
                (self.slots.len() - 1) as u32
            }
        };
        tracing::trace!(index, size, kind, "allocate");
        ObjRef(index)
    }

    /// Return the canonical handle for `text`, allocating and registering a
    /// new string only if no interned string with the same content exists.
    pub fn intern(&mut self, text: &str) -> StrRef {
        let hash = hash_str(text);
        let slots = &self.slots;
        let existing = self.strings.find_string(text, hash, |k| {
            match slots[k.0 as usize].as_ref() {
                Some(Obj::String(s)) => s.text.as_str(),
                _ => "",
            }
        });
        if let Some(found) = existing {
            return found;
        }
        let r = self.alloc(Obj::String(StringObj {
            text: text.to_owned(),
            hash,
        }));
        let key = StrRef(r.0);
        self.strings.set(key, hash, Value::Nil);
        key
    }

    pub fn should_collect(&self) -> bool {
        self.bytes_allocated > self.next_gc
    }

    // -----------------------------------------------------------------------
    // Object access
    // -----------------------------------------------------------------------

    pub fn get(&self, r: ObjRef) -> &Obj {
        self.slots[r.0 as usize]
            .as_ref()
            .expect("use of collected object")
    }

    pub fn get_mut(&mut self, r: ObjRef) -> &mut Obj {
        self.slots[r.0 as usize]
            .as_mut()
            .expect("use of collected object")
    }

    /// `Some` when the handle refers to a string.
    pub fn as_string(&self, r: ObjRef) -> Option<StrRef> {
        match self.get(r) {
            Obj::String(_) => Some(StrRef(r.0)),
            _ => None,
        }
    }

    pub fn string(&self, s: StrRef) -> &StringObj {
        match self.get(s.into()) {
            Obj::String(obj) => obj,
            other => panic!("expected string, found {}", other.kind_name()),
        }
    }

    pub fn str_text(&self, s: StrRef) -> &str {
        &self.string(s).text
    }

    pub fn str_hash(&self, s: StrRef) -> u32 {
        self.string(s).hash
    }

    pub fn function(&self, r: ObjRef) -> &Function {
        match self.get(r) {
            Obj::Function(f) => f,
            other => panic!("expected function, found {}", other.kind_name()),
        }
    }

    pub fn closure(&self, r: ObjRef) -> &Closure {
        match self.get(r) {
            Obj::Closure(c) => c,
            other => panic!("expected closure, found {}", other.kind_name()),
        }
    }

    pub fn closure_mut(&mut self, r: ObjRef) -> &mut Closure {
        match self.get_mut(r) {
            Obj::Closure(c) => c,
            other => panic!("expected closure, found {}", other.kind_name()),
        }
    }

    pub fn upvalue(&self, r: ObjRef) -> &Upvalue {
        match self.get(r) {
            Obj::Upvalue(u) => u,
            other => panic!("expected upvalue, found {}", other.kind_name()),
        }
    }

    pub fn upvalue_mut(&mut self, r: ObjRef) -> &mut Upvalue {
        match self.get_mut(r) {
            Obj::Upvalue(u) => u,
            other => panic!("expected upvalue, found {}", other.kind_name()),
        }
    }

    pub fn class(&self, r: ObjRef) -> &Class {
        match self.get(r) {
            Obj::Class(c) => c,
            other => panic!("expected class, found {}", other.kind_name()),
        }
    }

    pub fn class_mut(&mut self, r: ObjRef) -> &mut Class {
        match self.get_mut(r) {
            Obj::Class(c) => c,
            other => panic!("expected class, found {}", other.kind_name()),
        }
    }

    pub fn instance(&self, r: ObjRef) -> &Instance {
        match self.get(r) {
            Obj::Instance(i) => i,
            other => panic!("expected instance, found {}", other.kind_name()),
        }
    }

    pub fn instance_mut(&mut self, r: ObjRef) -> &mut Instance {
        match self.get_mut(r) {
            Obj::Instance(i) => i,
            other => panic!("expected instance, found {}", other.kind_name()),
        }
    }

    // -----------------------------------------------------------------------
    // Printing
    // -----------------------------------------------------------------------

    /// Render a value the way `print` shows it.
    pub fn format_value(&self, value: Value) -> String {
        match value {
            Value::Nil => "nil".to_string(),
            Value::Bool(b) => b.to_string(),
            Value::Number(n) => n.to_string(),
            Value::Obj(r) => self.format_object(r),
        }
    }

    fn format_object(&self, r: ObjRef) -> String {
        match self.get(r) {
            Obj::String(s) => s.text.clone(),
            Obj::Function(f) => self.format_function(f),
            Obj::Native(n) => format!("<native fn: {} args>", n.arity),
            Obj::Closure(c) => self.format_function(self.function(c.function)),
            Obj::Upvalue(_) => "upvalue".to_string(),
            Obj::Class(c) => format!("<class: {}>", self.str_text(c.name)),
            Obj::Instance(i) => {
                format!(
                    "<instance of class: {}>",
                    self.str_text(self.class(i.class).name)
                )
            }
            Obj::BoundMethod(b) => {
                self.format_function(self.function(self.closure(b.method).function))
            }
        }
    }

    fn format_function(&self, f: &Function) -> String {
        match f.name {
            Some(name) => format!("<fn {}>", self.str_text(name)),
            None => "<script>".to_string(),
        }
    }

    // -----------------------------------------------------------------------
    // Collection: mark, trace, weak-string sweep, sweep
    // -----------------------------------------------------------------------

    pub fn mark_value(&mut self, value: Value) {
        if let Value::Obj(r) = value {
            self.mark_object(r);
        }
    }

    /// Set the mark bit and queue the object for tracing, once.
    pub fn mark_object(&mut self, r: ObjRef) {
        let index = r.0 as usize;
        if !self.marks[index] {
            self.marks[index] = true;
            self.gray.push(r);
        }
    }

    pub fn mark_str(&mut self, s: StrRef) {
        self.mark_object(s.into());
    }

    /// Mark every key and value of a table that lives outside the heap
    /// (the VM's globals).
    pub fn mark_table(&mut self, table: &Table) {
        for (key, value) in table.iter() {
            self.mark_object(key.into());
            self.mark_value(value);
        }
    }

    /// Drain the gray worklist, marking each object's outgoing references.
    pub fn trace_references(&mut self) {
        loop {
            let Some(r) = self.gray.pop() else { break };
            let Heap {
                slots, marks, gray, ..
            } = self;
            let slots = &*slots;
            let mut mark = |v: Value| {
                if let Value::Obj(o) = v {
                    let index = o.0 as usize;
                    if !marks[index] {
                        marks[index] = true;
                        gray.push(o);
                    }
                }
            };
            match slots[r.0 as usize].as_ref().expect("traced freed object") {
                Obj::String(_) | Obj::Native(_) => {}
                Obj::Function(f) => {
                    if let Some(name) = f.name {
                        mark(Value::Obj(name.into()));
                    }
                    for &constant in &f.chunk.constants {
                        mark(constant);
                    }
                }
                Obj::Closure(c) => {
                    mark(Value::Obj(c.function));
                    for &upvalue in &c.upvalues {
                        mark(Value::Obj(upvalue));
                    }
                }
                // An open upvalue points into the value stack, which is a
                // root in its own right.
                Obj::Upvalue(Upvalue::Open { .. }) => {}
                Obj::Upvalue(Upvalue::Closed(v)) => mark(*v),
                Obj::Class(c) => {
                    mark(Value::Obj(c.name.into()));
                    for (key, value) in c.methods.iter() {
                        mark(Value::Obj(key.into()));
                        mark(value);
                    }
                }
                Obj::Instance(i) => {
                    mark(Value::Obj(i.class));
                    for (key, value) in i.fields.iter() {
                        mark(Value::Obj(key.into()));
                        mark(value);
                    }
                }
                Obj::BoundMethod(b) => {
                    mark(b.receiver);
                    mark(Value::Obj(b.method));
                }
            }
        }
    }

    /// Drop interner entries whose strings did not survive marking. Must run
    /// after tracing and before the sweep frees the slots.
    pub fn sweep_strings(&mut self) {
        let marks = &self.marks;
        self.strings.retain(|k| marks[k.0 as usize]);
    }

    /// Free every unmarked object and clear the mark bits of survivors,
    /// then reset the collection threshold from the surviving byte count.
    pub fn sweep(&mut self) {
        let mut freed = 0usize;
        for (index, slot) in self.slots.iter_mut().enumerate() {
            if self.marks[index] {
                self.marks[index] = false;
                continue;
            }
            if let Some(obj) = slot.take() {
                freed += self.sizes[index];
                self.free.push(index as u32);
                tracing::trace!(index, kind = obj.kind_name(), "free");
            }
        }
        self.bytes_allocated -= freed;
        self.next_gc = self.bytes_allocated * HEAP_GROW_FACTOR;
        tracing::debug!(
            freed_bytes = freed,
            live_bytes = self.bytes_allocated,
            next_gc = self.next_gc,
            "sweep complete"
        );
    }

    // -----------------------------------------------------------------------
    // Introspection
    // -----------------------------------------------------------------------

    /// Number of live heap objects.
    pub fn object_count(&self) -> usize {
        self.slots.iter().filter(|s| s.is_some()).count()
    }

    pub fn bytes_allocated(&self) -> usize {
        self.bytes_allocated
    }

    /// Number of distinct interned strings.
    pub fn string_count(&self) -> usize {
        self.strings.len()
    }
}
