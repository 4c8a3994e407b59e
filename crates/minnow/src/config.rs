//! Embedding configuration: the host-pluggable seams of a VM.
//!
//! Every outward-facing concern is a trait object with a working default:
//! diagnostics sink, user-visible print output, import-path resolution, and
//! source loading. Hosts override the pieces they care about and leave the
//! rest alone.

use std::{
    fs,
    io::{self, Write as _},
    path::Path,
};

use crate::report::{Reporter, StderrReporter};

/// Sink for user-visible print output.
pub trait Writer {
    /// Called with each chunk of output text; chunks carry their own
    /// newlines.
    fn write(&mut self, text: &str);
}

/// Default [`Writer`] that writes to stdout.
#[derive(Debug, Default)]
pub struct StdWriter;

impl Writer for StdWriter {
    fn write(&mut self, text: &str) {
        let _ = io::stdout().write_all(text.as_bytes());
    }
}

/// A [`Writer`] that collects all output into a string.
#[derive(Debug, Default)]
pub struct CollectWriter(String);

impl CollectWriter {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn output(&self) -> &str {
        &self.0
    }

    #[must_use]
    pub fn into_output(self) -> String {
        self.0
    }
}

impl Writer for CollectWriter {
    fn write(&mut self, text: &str) {
        self.0.push_str(text);
    }
}

/// A [`Writer`] that ignores all output.
#[derive(Debug, Default)]
pub struct NoWriter;

impl Writer for NoWriter {
    fn write(&mut self, _text: &str) {}
}

/// Maps a requested import name, from the context of the importing script's
/// path, to a canonical path the loader understands.
pub trait PathResolver {
    /// Returns the canonical path, or `None` when the name cannot resolve.
    fn resolve(&mut self, importer: Option<&str>, name: &str) -> Option<String>;
}

/// Default resolver: sibling of the importer, with the `.mn` extension
/// appended when the name has none.
#[derive(Debug, Default)]
pub struct DefaultResolver;

impl PathResolver for DefaultResolver {
    fn resolve(&mut self, importer: Option<&str>, name: &str) -> Option<String> {
        let mut resolved = match importer.map(Path::new).and_then(Path::parent) {
            Some(dir) if !dir.as_os_str().is_empty() => dir.join(name),
            _ => Path::new(name).to_path_buf(),
        };
        if resolved.extension().is_none() {
            resolved.set_extension("mn");
        }
        Some(resolved.to_string_lossy().into_owned())
    }
}

/// Yields source text for a canonical path.
///
/// The returned `String` is owned by the VM for exactly as long as the
/// compile runs; there is no completion callback to wire up.
pub trait SourceLoader {
    /// Returns the source, or `None` when the path cannot be read.
    fn load(&mut self, path: &str) -> Option<String>;
}

/// Default [`SourceLoader`] reading from the filesystem.
#[derive(Debug, Default)]
pub struct FileLoader;

impl SourceLoader for FileLoader {
    fn load(&mut self, path: &str) -> Option<String> {
        fs::read_to_string(path).ok()
    }
}

/// A [`SourceLoader`] serving sources from memory, for tests and REPLs.
#[derive(Debug, Default)]
pub struct MemoryLoader(Vec<(String, String)>);

impl MemoryLoader {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `source` under `path`.
    pub fn add(&mut self, path: impl Into<String>, source: impl Into<String>) {
        self.0.push((path.into(), source.into()));
    }
}

impl SourceLoader for MemoryLoader {
    fn load(&mut self, path: &str) -> Option<String> {
        self.0.iter().find(|(key, _)| key == path).map(|(_, source)| source.clone())
    }
}

/// The full embedding configuration of a VM.
pub struct Config {
    pub reporter: Box<dyn Reporter>,
    pub writer: Box<dyn Writer>,
    pub resolver: Box<dyn PathResolver>,
    pub loader: Box<dyn SourceLoader>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            reporter: Box::new(StderrReporter),
            writer: Box::new(StdWriter),
            resolver: Box::new(DefaultResolver),
            loader: Box::new(FileLoader),
        }
    }
}
