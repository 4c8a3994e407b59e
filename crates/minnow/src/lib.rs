#![doc = include_str!("../../../README.md")]

mod bytecode;
mod config;
mod fiber;
mod function;
mod hash;
mod heap;
mod names;
mod report;
mod script;
mod types;
mod value;
mod vm;

pub use crate::{
    bytecode::{Lexer, Opcode, Token, TokenKind, TokenValue},
    config::{
        CollectWriter, Config, DefaultResolver, FileLoader, MemoryLoader, NoWriter, PathResolver, SourceLoader,
        StdWriter, Writer,
    },
    fiber::{CallFrame, Fiber},
    function::{Arity, Code, Function, FunctionKind, NativeFn},
    hash::{hash_bits, hash_bytes, hash_number, hash_range, hash_str},
    heap::{FormatArg, Heap, HeapData, HeapId, HeapStats},
    names::NameTable,
    report::{
        CollectReports, CompileError, Report, ReportKind, Reporter, RuntimeError, RuntimeResult, SilentReporter,
        StderrReporter,
    },
    script::{MAX_LITERALS, Script},
    types::{List, Map, Range, Str},
    value::{Value, is_equal, is_same, value_hash},
    vm::{Interpret, Vm},
};
