//! Execution contexts.
//!
//! A fiber is a cooperatively scheduled green thread: its own value stack
//! and call frames, running one function at a time. The compiler never
//! executes fibers (the dispatch loop is an external collaborator); they
//! live here because the heap produces them and the collector must blacken
//! them.

use crate::{heap::HeapId, value::Value};

/// One activation record.
#[derive(Debug, Clone, Copy, serde::Serialize, serde::Deserialize)]
pub struct CallFrame {
    /// Next opcode index in the frame's function.
    pub ip: usize,
    pub func: HeapId,
    /// Index into the fiber stack where this frame's slots begin.
    pub stack_start: usize,
}

/// A green thread: value stack, call frames, the function being run, and the
/// error that stopped it, if any.
#[derive(Debug, serde::Serialize, serde::Deserialize)]
pub struct Fiber {
    func: HeapId,
    stack: Vec<Value>,
    frames: Vec<CallFrame>,
    /// Error message string, set when the fiber failed.
    error: Option<HeapId>,
}

impl Fiber {
    #[must_use]
    pub(crate) fn new(func: HeapId) -> Self {
        Self {
            func,
            stack: Vec::new(),
            frames: Vec::new(),
            error: None,
        }
    }

    #[must_use]
    pub fn func(&self) -> HeapId {
        self.func
    }

    #[must_use]
    pub fn stack(&self) -> &[Value] {
        &self.stack
    }

    pub fn push(&mut self, value: Value) {
        self.stack.push(value);
    }

    pub fn pop(&mut self) -> Option<Value> {
        self.stack.pop()
    }

    #[must_use]
    pub fn frames(&self) -> &[CallFrame] {
        &self.frames
    }

    pub fn push_frame(&mut self, frame: CallFrame) {
        self.frames.push(frame);
    }

    #[must_use]
    pub fn error(&self) -> Option<HeapId> {
        self.error
    }

    pub fn set_error(&mut self, message: HeapId) {
        self.error = Some(message);
    }

    /// Pushes the function, every live stack slot, every frame's function
    /// and the error string onto the gray worklist.
    pub(crate) fn gray_references(&self, gray: &mut Vec<HeapId>) {
        gray.push(self.func);
        for value in &self.stack {
            if let Value::Ref(id) = value {
                gray.push(*id);
            }
        }
        for frame in &self.frames {
            gray.push(frame.func);
        }
        if let Some(error) = self.error {
            gray.push(error);
        }
    }

    pub(crate) fn estimate_size(&self) -> usize {
        self.stack.capacity() * size_of::<Value>() + self.frames.capacity() * size_of::<CallFrame>()
    }
}
