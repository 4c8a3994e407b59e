//! Function objects and their compiled code.

use std::fmt::Write as _;

use crate::{
    bytecode::Opcode,
    heap::{Heap, HeapId},
    report::{RuntimeError, RuntimeResult},
    value::Value,
};

/// Signature of a host-implemented function.
pub type NativeFn = fn(&mut Heap, &[Value]) -> RuntimeResult<Value>;

/// Declared parameter count.
///
/// Natives created by the heap start out variadic; a compiled declaration
/// pins the exact count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum Arity {
    Exact(u8),
    Variadic,
}

/// A callable: either a host callback or compiled bytecode.
///
/// Functions know their owning script; the collector treats that back
/// reference as strong for reachability, while destruction stays entirely
/// sweep-driven, so the script/function cycle needs no ordering.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Function {
    owner: HeapId,
    arity: Arity,
    kind: FunctionKind,
}

#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub enum FunctionKind {
    /// Host function. The callback is bound by the embedder after the
    /// `native` declaration is compiled; it is not serializable state.
    Native {
        #[serde(skip)]
        callback: Option<NativeFn>,
    },
    Scripted(Code),
}

impl Function {
    #[must_use]
    pub(crate) fn new_scripted(owner: HeapId) -> Self {
        Self {
            owner,
            arity: Arity::Exact(0),
            kind: FunctionKind::Scripted(Code::new()),
        }
    }

    #[must_use]
    pub(crate) fn new_native(owner: HeapId) -> Self {
        Self {
            owner,
            arity: Arity::Variadic,
            kind: FunctionKind::Native { callback: None },
        }
    }

    /// The owning script.
    #[must_use]
    pub fn owner(&self) -> HeapId {
        self.owner
    }

    #[must_use]
    pub fn arity(&self) -> Arity {
        self.arity
    }

    pub(crate) fn set_arity(&mut self, arity: Arity) {
        self.arity = arity;
    }

    #[must_use]
    pub fn kind(&self) -> &FunctionKind {
        &self.kind
    }

    #[must_use]
    pub fn is_native(&self) -> bool {
        matches!(self.kind, FunctionKind::Native { .. })
    }

    /// The compiled code, for scripted functions.
    #[must_use]
    pub fn code(&self) -> Option<&Code> {
        match &self.kind {
            FunctionKind::Scripted(code) => Some(code),
            FunctionKind::Native { .. } => None,
        }
    }

    pub(crate) fn code_mut(&mut self) -> Option<&mut Code> {
        match &mut self.kind {
            FunctionKind::Scripted(code) => Some(code),
            FunctionKind::Native { .. } => None,
        }
    }

    /// Installs the host callback for a compiled `native` declaration.
    pub fn bind_native(&mut self, callback: NativeFn) -> RuntimeResult<()> {
        match &mut self.kind {
            FunctionKind::Native { callback: slot } => {
                *slot = Some(callback);
                Ok(())
            }
            FunctionKind::Scripted(_) => Err(RuntimeError::new("cannot bind a host callback to a scripted function")),
        }
    }

    /// Rough payload size for collection scheduling; code buffers count
    /// toward the heap's allocation debt.
    pub(crate) fn estimate_size(&self) -> usize {
        match &self.kind {
            FunctionKind::Native { .. } => 0,
            FunctionKind::Scripted(code) => code.opcodes.len() + code.oplines.len() * size_of::<u32>(),
        }
    }
}

/// Compiled code of a scripted function: the opcode stream, a source-line
/// entry per opcode byte, and the emitter's operand-stack high-water mark.
#[derive(Debug, Default, serde::Serialize, serde::Deserialize)]
pub struct Code {
    opcodes: Vec<u8>,
    oplines: Vec<u32>,
    stack_size: u32,
}

impl Code {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn opcodes(&self) -> &[u8] {
        &self.opcodes
    }

    /// Source line recorded for each opcode byte.
    #[must_use]
    pub fn oplines(&self) -> &[u32] {
        &self.oplines
    }

    /// Maximum simulated operand-stack depth observed during compilation.
    #[must_use]
    pub fn stack_size(&self) -> u32 {
        self.stack_size
    }

    /// Current opcode count; the target address for jumps patched "here".
    #[must_use]
    pub fn count(&self) -> usize {
        self.opcodes.len()
    }

    /// Appends one byte and its source line, returning the byte's index.
    pub(crate) fn push_byte(&mut self, byte: u8, line: u32) -> usize {
        self.opcodes.push(byte);
        self.oplines.push(line);
        self.opcodes.len() - 1
    }

    /// Writes a 16-bit big-endian value over a previously emitted
    /// placeholder at `site`.
    pub(crate) fn patch_short(&mut self, site: usize, value: u16) {
        let [high, low] = value.to_be_bytes();
        self.opcodes[site] = high;
        self.opcodes[site + 1] = low;
    }

    pub(crate) fn note_stack_high_water(&mut self, depth: u32) {
        self.stack_size = self.stack_size.max(depth);
    }

    /// Renders a human-readable listing of this code object.
    ///
    /// `script` supplies the literal pool so `Constant` operands can show
    /// their values.
    #[must_use]
    pub fn disassemble(&self, heap: &Heap, script: HeapId, name: &str) -> String {
        let mut out = String::new();
        let _ = writeln!(out, "== {name} (stack {}) ==", self.stack_size);
        let literals = heap.script(script).literals();
        let mut pc = 0;
        while pc < self.opcodes.len() {
            let Some(op) = Opcode::from_repr(self.opcodes[pc]) else {
                let _ = writeln!(out, "{pc:04}  ??{:02x}", self.opcodes[pc]);
                pc += 1;
                continue;
            };
            let line = self.oplines[pc];
            let _ = write!(out, "{pc:04} {line:4}  {op}");
            match op.params() {
                0 => {}
                1 => {
                    let _ = write!(out, " {}", self.opcodes[pc + 1]);
                }
                2 => {
                    let operand = u16::from_be_bytes([self.opcodes[pc + 1], self.opcodes[pc + 2]]);
                    let _ = write!(out, " {operand}");
                    if op == Opcode::Constant
                        && let Some(&literal) = literals.get(operand as usize)
                    {
                        let _ = write!(out, " ({})", literal.display(heap));
                    }
                }
                _ => unreachable!("opcodes carry at most two operand bytes"),
            }
            out.push('\n');
            pc += 1 + op.params() as usize;
        }
        out
    }
}
