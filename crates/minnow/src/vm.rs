//! The VM: single owner of the heap and the embedding configuration.
//!
//! Everything heap-touching threads through this one value. A VM is not
//! reentrant across threads; multiple VMs may run concurrently as long as
//! they share no objects.

use crate::{
    bytecode::Compiler,
    config::Config,
    heap::{Heap, HeapId},
    report::{CompileError, Report, ReportKind},
    value::Value,
};

/// Outcome of [`Vm::interpret`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Interpret {
    Success,
    CompileError,
    RuntimeError,
}

/// An embeddable minnow virtual machine.
pub struct Vm {
    heap: Heap,
    config: Config,
}

impl Default for Vm {
    fn default() -> Self {
        Self::new(Config::default())
    }
}

impl Vm {
    #[must_use]
    pub fn new(config: Config) -> Self {
        Self {
            heap: Heap::new(),
            config,
        }
    }

    #[must_use]
    pub fn heap(&self) -> &Heap {
        &self.heap
    }

    #[must_use]
    pub fn heap_mut(&mut self) -> &mut Heap {
        &mut self.heap
    }

    #[must_use]
    pub fn config_mut(&mut self) -> &mut Config {
        &mut self.config
    }

    /// Compiles `source` into a fresh script, reporting diagnostics through
    /// the configured reporter.
    ///
    /// On success the script handle is returned un-rooted: callers that keep
    /// it across further allocation must register it with
    /// [`Vm::add_root`]. On failure the script is left to the collector.
    pub fn compile(&mut self, path: &str, source: &str) -> Result<HeapId, CompileError> {
        let script = self.heap.new_script(path);
        // The compiler state is a collection root for the whole compile.
        self.heap.push_temp_root(script);
        let result = Compiler::new(&mut self.heap, self.config.reporter.as_mut(), path, source, script).run();
        self.heap.pop_temp_root();
        match result {
            Ok(()) => Ok(script),
            Err(errors) => Err(CompileError { errors }),
        }
    }

    /// Resolves, loads and compiles the script at `path`.
    ///
    /// Execution belongs to the dispatch loop, an external collaborator; a
    /// successfully compiled script reports `Success` here.
    pub fn interpret(&mut self, path: &str) -> Interpret {
        let resolved = self
            .config
            .resolver
            .resolve(None, path)
            .unwrap_or_else(|| path.to_string());
        let Some(source) = self.config.loader.load(&resolved) else {
            self.config.reporter.report(&Report {
                kind: ReportKind::Runtime,
                path: resolved.clone(),
                line: 0,
                message: format!("cannot load script '{resolved}'"),
            });
            return Interpret::RuntimeError;
        };
        match self.compile(&resolved, &source) {
            Ok(_) => Interpret::Success,
            Err(_) => Interpret::CompileError,
        }
    }

    /// Wraps a host string as a value.
    ///
    /// The result is un-rooted: keep it on the temp-root stack (or otherwise
    /// reachable) before the next allocation.
    pub fn new_string_value(&mut self, content: &str) -> Value {
        Value::Ref(self.heap.new_string(content))
    }

    /// Registers an embedder-held object as a collection root.
    pub fn add_root(&mut self, id: HeapId) {
        self.heap.add_root(id);
    }

    /// Releases an embedder-held root.
    pub fn remove_root(&mut self, id: HeapId) {
        self.heap.remove_root(id);
    }

    /// Forces a full mark-sweep collection.
    pub fn collect_garbage(&mut self) {
        self.heap.collect_garbage();
    }
}
