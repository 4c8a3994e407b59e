//! The object heap: an arena of collectable objects plus the tri-color
//! mark-sweep machinery that keeps it honest.
//!
//! Objects live in slots of `entries`; a slot index is the object's identity
//! (`HeapId`). Freed slots go on a free list and are reused by later
//! allocations, keeping memory flat for allocation-heavy compiles. The
//! occupied slots of the arena are the sweep list: every live object is
//! reachable through it until the collector frees it.
//!
//! # Temp-root discipline
//!
//! Allocation may trigger a collection. Between allocating an object and the
//! point where it becomes reachable from a root, the caller must hold it on
//! the temp-root stack (`push_temp_root`/`pop_temp_root`); the collector
//! treats that stack as an additional root set. Violating this is a latent
//! use-after-free whose symptom only appears under collection pressure.

use std::collections::BTreeMap;

use crate::{
    fiber::Fiber,
    function::Function,
    report::{RuntimeError, RuntimeResult},
    script::Script,
    types::{List, Map, Range, Str},
    value::{Value, value_hash},
};

/// Maximum depth of the temp-root stack. Exceeding it is a programmer error.
const MAX_TEMP_ROOTS: usize = 8;

/// Collection is considered once the estimated live bytes cross this floor.
const MIN_GC_THRESHOLD: usize = 1024 * 1024;

/// The heap grows its collection threshold by this factor after each sweep.
const GC_GROW_FACTOR: usize = 2;

/// Index of an object slot in the heap arena.
///
/// A `HeapId` acts as the object pointer: copy it freely, compare it for
/// identity, and dereference it through the heap.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct HeapId(usize);

impl HeapId {
    #[must_use]
    pub fn index(self) -> usize {
        self.0
    }
}

/// Payload of a heap slot: one of the closed set of object types.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub enum HeapData {
    Str(Str),
    List(List),
    Map(Map),
    Range(Range),
    Script(Script),
    Function(Function),
    Fiber(Fiber),
}

impl HeapData {
    /// Static name of the object type, for stats and diagnostics.
    #[must_use]
    pub fn type_name(&self) -> &'static str {
        match self {
            Self::Str(_) => "string",
            Self::List(_) => "list",
            Self::Map(_) => "map",
            Self::Range(_) => "range",
            Self::Script(_) => "script",
            Self::Function(_) => "function",
            Self::Fiber(_) => "fiber",
        }
    }

    /// Rough byte estimate used for collection scheduling.
    ///
    /// Function code buffers count here: the emitter appends to them after
    /// allocation, and the sweep re-measures survivors so the debt stays in
    /// step with real growth.
    fn estimate_size(&self) -> usize {
        let payload = match self {
            Self::Str(s) => s.len(),
            Self::List(list) => list.capacity() * size_of::<Value>(),
            Self::Map(map) => map.capacity() * 2 * size_of::<Value>(),
            Self::Range(_) => 0,
            Self::Script(script) => script.estimate_size(),
            Self::Function(function) => function.estimate_size(),
            Self::Fiber(fiber) => fiber.estimate_size(),
        };
        size_of::<Self>() + payload
    }
}

/// One occupied arena slot: the object plus its collector mark bit.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
struct HeapEntry {
    data: HeapData,
    marked: bool,
}

/// Snapshot of heap state at a point in time.
///
/// The `objects_by_type` map uses `BTreeMap` for deterministic iteration
/// order, making snapshots suitable for display and comparison.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeapStats {
    /// Total number of live objects on the heap.
    pub live_objects: usize,
    /// Number of free (recycled) slots available for reuse.
    pub free_slots: usize,
    /// Total heap capacity (live + free).
    pub total_slots: usize,
    /// Breakdown of live objects by type name.
    pub objects_by_type: BTreeMap<&'static str, usize>,
    /// Estimated live bytes, as tracked for collection scheduling.
    pub bytes_allocated: usize,
    /// Number of collections run so far.
    pub collections: usize,
}

/// Arena heap of garbage-collectable objects.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Heap {
    entries: Vec<Option<HeapEntry>>,
    /// IDs of freed slots available for reuse. Populated by the sweep,
    /// consumed by `alloc`.
    free_list: Vec<HeapId>,
    /// Bounded stack of objects protected while a caller assembles a
    /// not-yet-reachable structure.
    temp_roots: Vec<HeapId>,
    /// Persistent roots: scripts and fibers the embedder or VM holds.
    roots: Vec<HeapId>,
    /// Estimated live bytes; drives automatic collection.
    bytes_allocated: usize,
    /// Collection triggers when `bytes_allocated` exceeds this.
    gc_threshold: usize,
    collections: usize,
}

impl Default for Heap {
    fn default() -> Self {
        Self::new()
    }
}

impl Heap {
    #[must_use]
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
            free_list: Vec::new(),
            temp_roots: Vec::new(),
            roots: Vec::new(),
            bytes_allocated: 0,
            gc_threshold: MIN_GC_THRESHOLD,
            collections: 0,
        }
    }

    // ── Allocation ───────────────────────────────────────────────────────

    /// Allocates an object, collecting first when the allocation debt has
    /// crossed the threshold. Children of `data` must already be protected
    /// (temp-rooted or otherwise reachable) because the collection runs
    /// before the new object exists.
    pub fn alloc(&mut self, data: HeapData) -> HeapId {
        self.bytes_allocated += data.estimate_size();
        if self.bytes_allocated > self.gc_threshold {
            self.collect_garbage();
        }
        let entry = HeapEntry { data, marked: false };
        if let Some(id) = self.free_list.pop() {
            self.entries[id.index()] = Some(entry);
            id
        } else {
            self.entries.push(Some(entry));
            HeapId(self.entries.len() - 1)
        }
    }

    pub fn new_string(&mut self, content: &str) -> HeapId {
        self.alloc(HeapData::Str(Str::new(content)))
    }

    pub fn new_list(&mut self) -> HeapId {
        self.alloc(HeapData::List(List::new()))
    }

    pub fn new_map(&mut self) -> HeapId {
        self.alloc(HeapData::Map(Map::new()))
    }

    pub fn new_range(&mut self, from: f64, to: f64) -> HeapId {
        self.alloc(HeapData::Range(Range::new(from, to)))
    }

    /// Creates a script and its body function.
    ///
    /// The body is the initial emission target for top-level statements and
    /// is constructed immediately. The script is temp-rooted across the body
    /// allocation so an ill-timed collection cannot reclaim it mid-assembly.
    pub fn new_script(&mut self, path: &str) -> HeapId {
        let path_id = self.new_string(path);
        self.push_temp_root(path_id);
        let script_id = self.alloc(HeapData::Script(Script::new(path_id)));
        self.push_temp_root(script_id);
        let body = self.alloc(HeapData::Function(Function::new_scripted(script_id)));
        self.script_mut(script_id).set_body(body);
        self.pop_temp_root();
        self.pop_temp_root();
        script_id
    }

    pub fn new_function_scripted(&mut self, owner: HeapId) -> HeapId {
        self.alloc(HeapData::Function(Function::new_scripted(owner)))
    }

    pub fn new_function_native(&mut self, owner: HeapId) -> HeapId {
        self.alloc(HeapData::Function(Function::new_native(owner)))
    }

    pub fn new_fiber(&mut self, func: HeapId) -> HeapId {
        self.alloc(HeapData::Fiber(Fiber::new(func)))
    }

    // ── Access ───────────────────────────────────────────────────────────

    /// Borrows an object.
    ///
    /// # Panics
    /// Panics if the slot has been freed; holding a `HeapId` across a
    /// collection without rooting it is a temp-root violation.
    #[must_use]
    pub fn get(&self, id: HeapId) -> &HeapData {
        &self
            .entries
            .get(id.index())
            .and_then(Option::as_ref)
            .expect("heap id referenced a freed slot")
            .data
    }

    /// Mutable variant of [`Heap::get`].
    #[must_use]
    pub fn get_mut(&mut self, id: HeapId) -> &mut HeapData {
        &mut self
            .entries
            .get_mut(id.index())
            .and_then(Option::as_mut)
            .expect("heap id referenced a freed slot")
            .data
    }

    /// Borrows an object if its slot is still live.
    #[must_use]
    pub fn get_if_live(&self, id: HeapId) -> Option<&HeapData> {
        self.entries.get(id.index()).and_then(Option::as_ref).map(|entry| &entry.data)
    }

    #[must_use]
    pub fn string(&self, id: HeapId) -> &Str {
        match self.get(id) {
            HeapData::Str(s) => s,
            other => panic!("expected string, found {}", other.type_name()),
        }
    }

    #[must_use]
    pub fn list(&self, id: HeapId) -> &List {
        match self.get(id) {
            HeapData::List(list) => list,
            other => panic!("expected list, found {}", other.type_name()),
        }
    }

    #[must_use]
    pub fn map(&self, id: HeapId) -> &Map {
        match self.get(id) {
            HeapData::Map(map) => map,
            other => panic!("expected map, found {}", other.type_name()),
        }
    }

    #[must_use]
    pub fn range(&self, id: HeapId) -> &Range {
        match self.get(id) {
            HeapData::Range(range) => range,
            other => panic!("expected range, found {}", other.type_name()),
        }
    }

    #[must_use]
    pub fn script(&self, id: HeapId) -> &Script {
        match self.get(id) {
            HeapData::Script(script) => script,
            other => panic!("expected script, found {}", other.type_name()),
        }
    }

    #[must_use]
    pub fn script_mut(&mut self, id: HeapId) -> &mut Script {
        match self.get_mut(id) {
            HeapData::Script(script) => script,
            other => panic!("expected script, found {}", other.type_name()),
        }
    }

    #[must_use]
    pub fn function(&self, id: HeapId) -> &Function {
        match self.get(id) {
            HeapData::Function(function) => function,
            other => panic!("expected function, found {}", other.type_name()),
        }
    }

    #[must_use]
    pub fn function_mut(&mut self, id: HeapId) -> &mut Function {
        match self.get_mut(id) {
            HeapData::Function(function) => function,
            other => panic!("expected function, found {}", other.type_name()),
        }
    }

    #[must_use]
    pub fn fiber(&self, id: HeapId) -> &Fiber {
        match self.get(id) {
            HeapData::Fiber(fiber) => fiber,
            other => panic!("expected fiber, found {}", other.type_name()),
        }
    }

    #[must_use]
    pub fn fiber_mut(&mut self, id: HeapId) -> &mut Fiber {
        match self.get_mut(id) {
            HeapData::Fiber(fiber) => fiber,
            other => panic!("expected fiber, found {}", other.type_name()),
        }
    }

    // ── Roots ────────────────────────────────────────────────────────────

    /// Protects an in-flight object for the duration of an allocation-prone
    /// operation.
    ///
    /// # Panics
    /// Panics when the bounded stack overflows; that is a programmer error,
    /// not a recoverable condition.
    pub fn push_temp_root(&mut self, id: HeapId) {
        assert!(self.temp_roots.len() < MAX_TEMP_ROOTS, "temp-root stack overflow");
        self.temp_roots.push(id);
    }

    /// Releases the most recent temp root.
    pub fn pop_temp_root(&mut self) -> HeapId {
        self.temp_roots.pop().expect("temp-root stack underflow")
    }

    /// Registers a persistent root (an embedder-held script or fiber).
    pub fn add_root(&mut self, id: HeapId) {
        self.roots.push(id);
    }

    /// Drops one occurrence of a persistent root.
    pub fn remove_root(&mut self, id: HeapId) {
        if let Some(position) = self.roots.iter().position(|&root| root == id) {
            self.roots.swap_remove(position);
        }
    }

    // ── Collection ───────────────────────────────────────────────────────

    /// Runs a full mark-sweep collection.
    ///
    /// Mark: starting from the persistent roots and the temp-root stack, the
    /// gray worklist is drained; popping an object marks it and grays every
    /// object it references. Graying an already-marked object is a no-op,
    /// which is what terminates cycles. Sweep: unmarked slots are freed onto
    /// the free list and survivor marks are cleared.
    pub fn collect_garbage(&mut self) {
        let mut gray: Vec<HeapId> = Vec::with_capacity(self.roots.len() + self.temp_roots.len());
        gray.extend_from_slice(&self.roots);
        gray.extend_from_slice(&self.temp_roots);

        while let Some(id) = gray.pop() {
            let Some(entry) = self.entries.get_mut(id.index()).and_then(Option::as_mut) else {
                continue;
            };
            if entry.marked {
                continue;
            }
            entry.marked = true;
            gray_children(&entry.data, &mut gray);
        }

        let mut live_bytes = 0;
        for (index, slot) in self.entries.iter_mut().enumerate() {
            match slot {
                Some(entry) if entry.marked => {
                    entry.marked = false;
                    live_bytes += entry.data.estimate_size();
                }
                Some(_) => {
                    *slot = None;
                    self.free_list.push(HeapId(index));
                }
                None => {}
            }
        }

        self.bytes_allocated = live_bytes;
        self.gc_threshold = (live_bytes * GC_GROW_FACTOR).max(MIN_GC_THRESHOLD);
        self.collections += 1;
    }

    /// Overrides the automatic collection threshold, in estimated bytes.
    ///
    /// Setting a tiny threshold forces a collection before every allocation,
    /// which is how the temp-root discipline is exercised under test.
    pub fn set_gc_threshold(&mut self, bytes: usize) {
        self.gc_threshold = bytes;
    }

    /// Takes a point-in-time snapshot of heap occupancy.
    #[must_use]
    pub fn stats(&self) -> HeapStats {
        let mut objects_by_type: BTreeMap<&'static str, usize> = BTreeMap::new();
        let mut live_objects = 0;
        for entry in self.entries.iter().flatten() {
            live_objects += 1;
            *objects_by_type.entry(entry.data.type_name()).or_insert(0) += 1;
        }
        HeapStats {
            live_objects,
            free_slots: self.free_list.len(),
            total_slots: self.entries.len(),
            objects_by_type,
            bytes_allocated: self.bytes_allocated,
            collections: self.collections,
        }
    }

    // ── List operations ──────────────────────────────────────────────────

    pub fn list_push(&mut self, id: HeapId, value: Value) {
        match self.get_mut(id) {
            HeapData::List(list) => list.push(value),
            other => panic!("expected list, found {}", other.type_name()),
        }
    }

    pub fn list_insert(&mut self, id: HeapId, index: usize, value: Value) -> RuntimeResult<()> {
        match self.get_mut(id) {
            HeapData::List(list) => list.insert(index, value),
            other => panic!("expected list, found {}", other.type_name()),
        }
    }

    pub fn list_remove_at(&mut self, id: HeapId, index: usize) -> RuntimeResult<Value> {
        match self.get_mut(id) {
            HeapData::List(list) => list.remove_at(index),
            other => panic!("expected list, found {}", other.type_name()),
        }
    }

    // ── Map operations ───────────────────────────────────────────────────
    //
    // Map hashing and key equality read other heap objects (string hashes),
    // so the map is taken out of its slot, operated on against `&self`, and
    // put back. Nothing in between can allocate, so no collection can see
    // the placeholder.

    pub fn map_get(&mut self, id: HeapId, key: Value) -> RuntimeResult<Option<Value>> {
        let map = self.take_map(id);
        let result = map.get(self, key);
        self.put_back_map(id, map);
        result
    }

    pub fn map_set(&mut self, id: HeapId, key: Value, value: Value) -> RuntimeResult<()> {
        let mut map = self.take_map(id);
        let result = map.set(self, key, value);
        self.put_back_map(id, map);
        result
    }

    pub fn map_remove(&mut self, id: HeapId, key: Value) -> RuntimeResult<Option<Value>> {
        let mut map = self.take_map(id);
        let result = map.remove(self, key);
        self.put_back_map(id, map);
        result
    }

    fn take_map(&mut self, id: HeapId) -> Map {
        match self.get_mut(id) {
            HeapData::Map(map) => std::mem::take(map),
            other => panic!("expected map, found {}", other.type_name()),
        }
    }

    fn put_back_map(&mut self, id: HeapId, map: Map) {
        match self.get_mut(id) {
            HeapData::Map(slot) => *slot = map,
            other => panic!("expected map, found {}", other.type_name()),
        }
    }

    // ── Script operations ────────────────────────────────────────────────

    /// Interns `name` into the script's bytecode name table, returning its
    /// stable index.
    pub fn script_add_name(&mut self, script: HeapId, name: &str) -> u32 {
        if let Some(index) = self.script(script).names().find(self, name) {
            return index;
        }
        let id = self.new_string(name);
        self.script_mut(script).names_mut().push(id)
    }

    /// Defines a new global (initialized to null), returning its index.
    /// The global-name table stays index-aligned with the globals buffer.
    pub fn script_add_global(&mut self, script: HeapId, name: &str) -> u32 {
        debug_assert!(
            self.script(script).global_names().find(self, name).is_none(),
            "global '{name}' defined twice"
        );
        let id = self.new_string(name);
        let record = self.script_mut(script);
        record.globals_mut().push(Value::Null);
        record.global_names_mut().push(id)
    }

    /// Attaches a function to the script, returning its index. The
    /// function-name table stays index-aligned with the functions buffer.
    pub fn script_add_function(&mut self, script: HeapId, func: HeapId, name: &str) -> u32 {
        let id = self.new_string(name);
        let record = self.script_mut(script);
        record.functions_mut().push(func);
        record.function_names_mut().push(id)
    }

    // ── String formatting ────────────────────────────────────────────────

    /// Builds a string from a format template.
    ///
    /// `$` splices the next `FormatArg::Text`, `@` splices the bytes of the
    /// next `FormatArg::Val` (which must be a string value). The length is
    /// measured in a first pass, the destination filled in a second, and the
    /// result's hash computed at the end by `Str::new`.
    ///
    /// # Panics
    /// Panics when the template and arguments disagree; the template is
    /// compiler- or embedder-authored, never user input.
    pub fn string_format(&mut self, fmt: &str, args: &[FormatArg<'_>]) -> HeapId {
        let mut length = 0;
        let mut next = args.iter();
        for ch in fmt.chars() {
            match ch {
                '$' => match next.next() {
                    Some(FormatArg::Text(text)) => length += text.len(),
                    _ => panic!("string_format: '$' expects a text argument"),
                },
                '@' => match next.next() {
                    Some(&FormatArg::Val(value)) => length += self.format_value_str(value).len(),
                    _ => panic!("string_format: '@' expects a string value argument"),
                },
                _ => length += ch.len_utf8(),
            }
        }
        assert!(next.next().is_none(), "string_format: too many arguments");

        let mut out = String::with_capacity(length);
        let mut next = args.iter();
        for ch in fmt.chars() {
            match ch {
                '$' => {
                    let Some(FormatArg::Text(text)) = next.next() else {
                        unreachable!("checked by the measuring pass");
                    };
                    out.push_str(text);
                }
                '@' => {
                    let Some(&FormatArg::Val(value)) = next.next() else {
                        unreachable!("checked by the measuring pass");
                    };
                    out.push_str(self.format_value_str(value));
                }
                _ => out.push(ch),
            }
        }
        self.new_string(&out)
    }

    fn format_value_str(&self, value: Value) -> &str {
        match value {
            Value::Ref(id) => self.string(id).as_str(),
            _ => panic!("string_format: '@' expects a string value argument"),
        }
    }

    /// Hashes a map key, surfacing unhashable types as a runtime error.
    pub(crate) fn key_hash(&self, key: Value) -> RuntimeResult<u32> {
        value_hash(key, self).ok_or_else(|| RuntimeError::unhashable(key.type_name(self)))
    }
}

/// Argument to [`Heap::string_format`].
#[derive(Debug, Clone, Copy)]
pub enum FormatArg<'a> {
    /// Spliced by `$`.
    Text(&'a str),
    /// Spliced by `@`; must hold a string value.
    Val(Value),
}

/// Grays every object `data` references.
///
/// The gray worklist holds marked-but-not-yet-scanned objects; duplicates
/// are harmless because marked objects are skipped when popped.
fn gray_children(data: &HeapData, gray: &mut Vec<HeapId>) {
    match data {
        HeapData::Str(_) | HeapData::Range(_) => {}
        HeapData::List(list) => {
            for value in list.iter() {
                if let Value::Ref(id) = value {
                    gray.push(id);
                }
            }
        }
        HeapData::Map(map) => {
            for (key, value) in map.iter() {
                if let Value::Ref(id) = key {
                    gray.push(id);
                }
                if let Value::Ref(id) = value {
                    gray.push(id);
                }
            }
        }
        HeapData::Script(script) => script.gray_references(gray),
        HeapData::Function(function) => gray.push(function.owner()),
        HeapData::Fiber(fiber) => fiber.gray_references(gray),
    }
}
