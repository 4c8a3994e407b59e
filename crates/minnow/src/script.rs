//! Per-compilation-unit records.

use crate::{heap::HeapId, names::NameTable, value::Value};

/// The literal pool is addressed by a 16-bit `Constant` operand.
pub const MAX_LITERALS: usize = 1 << 16;

/// A compilation unit.
///
/// Owns the buffers the compiler writes into: globals (index-aligned with
/// `global_names`), the de-duplicated literal pool, declared functions
/// (index-aligned with `function_names`), the bytecode name table, imported
/// scripts, and the distinguished `body` function compiled from top-level
/// statements.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Script {
    path: HeapId,
    globals: Vec<Value>,
    global_names: NameTable,
    literals: Vec<Value>,
    functions: Vec<HeapId>,
    function_names: NameTable,
    names: NameTable,
    imports: Vec<HeapId>,
    /// Set by `Heap::new_script` immediately after construction; `None` only
    /// during that window.
    body: Option<HeapId>,
}

impl Script {
    #[must_use]
    pub(crate) fn new(path: HeapId) -> Self {
        Self {
            path,
            globals: Vec::new(),
            global_names: NameTable::new(),
            literals: Vec::new(),
            functions: Vec::new(),
            function_names: NameTable::new(),
            names: NameTable::new(),
            imports: Vec::new(),
            body: None,
        }
    }

    /// The interned source path string.
    #[must_use]
    pub fn path(&self) -> HeapId {
        self.path
    }

    /// The function holding the compiled top-level statements.
    #[must_use]
    pub fn body(&self) -> HeapId {
        self.body.expect("script body not initialized")
    }

    pub(crate) fn set_body(&mut self, body: HeapId) {
        debug_assert!(self.body.is_none(), "script body set twice");
        self.body = Some(body);
    }

    #[must_use]
    pub fn globals(&self) -> &[Value] {
        &self.globals
    }

    pub(crate) fn globals_mut(&mut self) -> &mut Vec<Value> {
        &mut self.globals
    }

    #[must_use]
    pub fn global_names(&self) -> &NameTable {
        &self.global_names
    }

    pub(crate) fn global_names_mut(&mut self) -> &mut NameTable {
        &mut self.global_names
    }

    /// The constant pool: values referenced by `Constant` operands.
    #[must_use]
    pub fn literals(&self) -> &[Value] {
        &self.literals
    }

    /// Appends a literal without dedup; the compiler de-duplicates before
    /// calling. Returns `None` once the 16-bit operand space is exhausted.
    pub(crate) fn push_literal(&mut self, value: Value) -> Option<u16> {
        if self.literals.len() >= MAX_LITERALS {
            return None;
        }
        let index = self.literals.len() as u16;
        self.literals.push(value);
        Some(index)
    }

    #[must_use]
    pub fn functions(&self) -> &[HeapId] {
        &self.functions
    }

    pub(crate) fn functions_mut(&mut self) -> &mut Vec<HeapId> {
        &mut self.functions
    }

    #[must_use]
    pub fn function_names(&self) -> &NameTable {
        &self.function_names
    }

    pub(crate) fn function_names_mut(&mut self) -> &mut NameTable {
        &mut self.function_names
    }

    /// Identifiers referenced by bytecode operands (attributes, imports).
    #[must_use]
    pub fn names(&self) -> &NameTable {
        &self.names
    }

    pub(crate) fn names_mut(&mut self) -> &mut NameTable {
        &mut self.names
    }

    #[must_use]
    pub fn imports(&self) -> &[HeapId] {
        &self.imports
    }

    /// Links an already-compiled script so its globals and functions resolve
    /// from this one.
    pub fn add_import(&mut self, script: HeapId) {
        self.imports.push(script);
    }

    /// Pushes every object this script references onto the gray worklist.
    pub(crate) fn gray_references(&self, gray: &mut Vec<HeapId>) {
        gray.push(self.path);
        for value in &self.globals {
            if let Value::Ref(id) = value {
                gray.push(*id);
            }
        }
        gray.extend(self.global_names.iter());
        for value in &self.literals {
            if let Value::Ref(id) = value {
                gray.push(*id);
            }
        }
        gray.extend_from_slice(&self.functions);
        gray.extend(self.function_names.iter());
        gray.extend(self.names.iter());
        gray.extend_from_slice(&self.imports);
        if let Some(body) = self.body {
            gray.push(body);
        }
    }

    /// Rough payload size for collection scheduling.
    pub(crate) fn estimate_size(&self) -> usize {
        (self.globals.len() + self.literals.len()) * size_of::<Value>()
            + (self.functions.len() + self.imports.len()) * size_of::<HeapId>()
            + (self.global_names.len() + self.function_names.len() + self.names.len()) * size_of::<HeapId>()
    }
}
