//! The single-pass compiler: Pratt-style precedence-climbing expressions,
//! block and flow statements, and in-place jump patching.
//!
//! The compiler owns a three-token sliding window (`previous`, `current`,
//! `next`) over the lexer's output and emits straight into the current
//! function's code buffer. Literals and names land in the enclosing script
//! as they are first referenced. Errors are reported and compilation keeps
//! going, so one pass surfaces as many problems as possible; the sticky
//! `has_errors` flag marks the result unexecutable.

use ahash::AHashMap;
use smallvec::SmallVec;

use crate::{
    bytecode::{
        Opcode,
        lexer::{Lexer, Token, TokenKind, TokenValue},
    },
    function::{Arity, Code},
    heap::{Heap, HeapId},
    report::{Report, ReportKind, Reporter},
    value::{Value, is_equal, value_hash},
};

/// Local variables are addressed by a one-byte operand.
const MAX_VARIABLES: usize = 256;

/// Break-patch sites recorded per loop.
const MAX_BREAKS: usize = 256;

/// Call arguments are counted by a one-byte operand.
const MAX_ARGUMENTS: u32 = 255;

/// Globals are addressed by a two-byte operand.
const MAX_GLOBALS: usize = 1 << 16;

/// Placeholder written at jump sites until the target is known.
const JUMP_PLACEHOLDER: u16 = 0xffff;

/// Expression precedences, lowest binding first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, strum::FromRepr)]
#[repr(u8)]
enum Precedence {
    None,
    Lowest,
    Assignment,
    LogicalOr,
    LogicalAnd,
    LogicalNot,
    Equality,
    In,
    Is,
    Comparison,
    BitwiseOr,
    BitwiseXor,
    BitwiseAnd,
    BitwiseShift,
    Range,
    Term,
    Factor,
    Unary,
    Call,
    Subscript,
    Attrib,
    Primary,
}

impl Precedence {
    /// The next-higher precedence; recursing at it makes an operator
    /// left-associative.
    fn one_higher(self) -> Self {
        Self::from_repr(self as u8 + 1).unwrap_or(Self::Primary)
    }
}

type ParseFn = fn(&mut Compiler<'_>, bool);

/// One grammar-table entry.
struct Rule {
    prefix: Option<ParseFn>,
    infix: Option<ParseFn>,
    precedence: Precedence,
}

/// The fixed grammar table, keyed by token kind.
fn get_rule(kind: TokenKind) -> Rule {
    use Precedence as P;
    use TokenKind as T;

    fn entry(prefix: Option<ParseFn>, infix: Option<ParseFn>, precedence: Precedence) -> Rule {
        Rule { prefix, infix, precedence }
    }
    fn binary(precedence: Precedence) -> Rule {
        entry(None, Some(|c: &mut Compiler<'_>, b: bool| Compiler::expr_binary(c, b)), precedence)
    }

    match kind {
        T::LParen => entry(
            Some(|c: &mut Compiler<'_>, b: bool| Compiler::expr_grouping(c, b)),
            Some(|c: &mut Compiler<'_>, b: bool| Compiler::expr_call(c, b)),
            P::Call,
        ),
        T::LBracket => entry(
            Some(|c: &mut Compiler<'_>, b: bool| Compiler::expr_list(c, b)),
            Some(|c: &mut Compiler<'_>, b: bool| Compiler::expr_subscript(c, b)),
            P::Subscript,
        ),
        T::LBrace => entry(Some(|c: &mut Compiler<'_>, b: bool| Compiler::expr_map(c, b)), None, P::None),
        T::Dot => entry(None, Some(|c: &mut Compiler<'_>, b: bool| Compiler::expr_attribute(c, b)), P::Attrib),
        T::DotDot => binary(P::Range),
        T::Tild => entry(Some(|c: &mut Compiler<'_>, b: bool| Compiler::expr_unary(c, b)), None, P::None),
        T::Not => entry(Some(|c: &mut Compiler<'_>, b: bool| Compiler::expr_unary(c, b)), None, P::None),
        T::Minus => entry(
            Some(|c: &mut Compiler<'_>, b: bool| Compiler::expr_unary(c, b)),
            Some(|c: &mut Compiler<'_>, b: bool| Compiler::expr_binary(c, b)),
            P::Term,
        ),
        T::Plus => binary(P::Term),
        T::Star | T::Slash | T::Percent => binary(P::Factor),
        T::Amp => binary(P::BitwiseAnd),
        T::Pipe => binary(P::BitwiseOr),
        T::Caret => binary(P::BitwiseXor),
        T::SRight | T::SLeft => binary(P::BitwiseShift),
        T::EqEq | T::NotEq => binary(P::Equality),
        T::Gt | T::GtEq | T::Lt | T::LtEq => binary(P::Comparison),
        T::Is => binary(P::Is),
        T::In => binary(P::In),
        T::And => binary(P::LogicalAnd),
        T::Or => binary(P::LogicalOr),
        T::Eq | T::PlusEq | T::MinusEq | T::StarEq | T::SlashEq => {
            entry(None, Some(|c: &mut Compiler<'_>, b: bool| Compiler::expr_assignment(c, b)), P::Assignment)
        }
        T::Number | T::String | T::True | T::False | T::Null => {
            entry(Some(|c: &mut Compiler<'_>, b: bool| Compiler::expr_literal(c, b)), None, P::None)
        }
        T::Name => entry(Some(|c: &mut Compiler<'_>, b: bool| Compiler::expr_name(c, b)), None, P::None),
        _ => entry(None, None, P::None),
    }
}

/// A declared variable. `depth` of `-1` marks a global; `0` the parameter
/// scope; deeper values nested blocks. A local's index in the variable table
/// is its operand in the bytecode.
struct Variable<'src> {
    name: &'src str,
    depth: i32,
    line: u32,
}

/// Book-keeping for the innermost loop being compiled.
struct LoopFrame {
    /// Opcode offset of the condition; `continue` jumps here.
    start: usize,
    /// Patch site of the conditional exit jump.
    exit_patch: usize,
    /// Patch sites of every `break` in the loop body.
    break_patches: SmallVec<[usize; 8]>,
}

/// Where a name resolved.
enum NameRef {
    Local(u8),
    Global(u16),
    Function(u16),
    GlobalExt { import: u8, index: u8 },
    FnExt { import: u8, index: u8 },
    NotDefined,
}

/// Block flavors: an if-mode block additionally ends at `else`/`elif`.
#[derive(Clone, Copy, PartialEq, Eq)]
enum BlockKind {
    Regular,
    If,
}

/// Single-pass compiler state for one script.
pub struct Compiler<'a> {
    heap: &'a mut Heap,
    reporter: &'a mut dyn Reporter,
    path: &'a str,
    source: &'a str,
    lexer: Lexer<'a>,
    previous: Token,
    current: Token,
    next: Token,
    /// Sticks once set; the compiled script is then unsafe to execute.
    has_errors: bool,
    error_count: usize,
    /// The script being compiled.
    script: HeapId,
    /// The function currently being emitted into.
    func: HeapId,
    /// `-1` at top level, `0` in parameter scope, deeper in nested blocks.
    scope_depth: i32,
    vars: Vec<Variable<'a>>,
    /// Simulated operand-stack depth; locals occupy one slot each.
    stack_size: u32,
    /// Innermost loop last.
    loops: Vec<LoopFrame>,
    /// Literal-pool dedup index: value hash to candidate pool indices.
    literal_index: AHashMap<u32, SmallVec<[u16; 2]>>,
}

impl<'a> Compiler<'a> {
    pub(crate) fn new(
        heap: &'a mut Heap,
        reporter: &'a mut dyn Reporter,
        path: &'a str,
        source: &'a str,
        script: HeapId,
    ) -> Self {
        let func = heap.script(script).body();
        Self {
            heap,
            reporter,
            path,
            source,
            lexer: Lexer::new(path, source),
            previous: Token::before_start(),
            current: Token::before_start(),
            next: Token::before_start(),
            has_errors: false,
            error_count: 0,
            script,
            func,
            scope_depth: -1,
            vars: Vec::new(),
            stack_size: 0,
            loops: Vec::new(),
            literal_index: AHashMap::new(),
        }
    }

    /// Compiles the whole source into the script, returning the error count
    /// on failure. The script remains allocated either way; callers decide
    /// whether a failed compile is worth keeping.
    pub(crate) fn run(mut self) -> Result<(), usize> {
        // Prime `current` and `next`.
        self.lex_token();
        self.lex_token();
        self.skip_new_lines();
        while self.peek() != TokenKind::Eof {
            if self.match_token(TokenKind::Native) {
                self.compile_native_decl();
            } else if self.match_token(TokenKind::Def) {
                self.compile_function_decl();
            } else if self.match_token(TokenKind::Import) {
                self.compile_import();
            } else {
                self.compile_statement();
            }
            self.skip_new_lines();
        }
        if self.has_errors { Err(self.error_count.max(1)) } else { Ok(()) }
    }

    // ── Token flow ───────────────────────────────────────────────────────

    /// Shifts the token window forward by one and drains any lex errors the
    /// scan produced.
    fn lex_token(&mut self) {
        self.previous = std::mem::replace(
            &mut self.current,
            std::mem::replace(&mut self.next, self.lexer.next_token()),
        );
        for report in self.lexer.take_reports() {
            self.has_errors = true;
            self.error_count += 1;
            self.reporter.report(&report);
        }
    }

    fn peek(&self) -> TokenKind {
        self.current.kind
    }

    #[expect(dead_code, reason = "the lookahead window exposes one token past current")]
    fn peek_next(&self) -> TokenKind {
        self.next.kind
    }

    /// Skips newlines; true and advanced when the current token is `kind`.
    fn match_token(&mut self, kind: TokenKind) -> bool {
        while self.peek() == TokenKind::Line {
            self.lex_token();
        }
        if self.peek() == kind {
            self.lex_token();
            true
        } else {
            false
        }
    }

    /// Advances unconditionally; reports when the consumed token is not
    /// `kind`, re-synchronizing by at most one token.
    fn consume(&mut self, kind: TokenKind, message: &str) {
        self.lex_token();
        if self.previous.kind != kind {
            self.parse_error(message.to_string());
            if self.peek() == kind {
                self.lex_token();
            }
        }
    }

    /// A statement ends at `;`, one or more newlines, or EOF.
    fn consume_end_statement(&mut self) {
        match self.peek() {
            TokenKind::Semicolon => self.lex_token(),
            TokenKind::Line => self.skip_new_lines(),
            TokenKind::Eof => {}
            _ => self.parse_error("Expected ';' or a newline to end the statement.".to_string()),
        }
    }

    /// A block starts at `do` or a newline.
    fn consume_start_block(&mut self) {
        match self.peek() {
            TokenKind::Do => self.lex_token(),
            TokenKind::Line => self.skip_new_lines(),
            _ => self.parse_error("Expected 'do' or a newline to start the block.".to_string()),
        }
    }

    fn skip_new_lines(&mut self) {
        while self.peek() == TokenKind::Line {
            self.lex_token();
        }
    }

    /// The source text of a token.
    fn token_text(&self, token: &Token) -> &'a str {
        let source: &'a str = self.source;
        &source[token.start..token.start + token.length]
    }

    // ── Error reporting ──────────────────────────────────────────────────

    fn parse_error(&mut self, message: String) {
        self.has_errors = true;
        // An error token already produced a lex report; reporting the parse
        // error it precipitated would only cascade.
        if self.previous.kind == TokenKind::Error {
            return;
        }
        self.error_count += 1;
        self.reporter.report(&Report {
            kind: ReportKind::Parse,
            path: self.path.to_string(),
            line: self.previous.line,
            message,
        });
    }

    // ── Emission primitives ──────────────────────────────────────────────

    fn code(&self) -> &Code {
        self.heap
            .function(self.func)
            .code()
            .expect("the compiler only emits into scripted functions")
    }

    fn code_mut(&mut self) -> &mut Code {
        self.heap
            .function_mut(self.func)
            .code_mut()
            .expect("the compiler only emits into scripted functions")
    }

    /// Appends one byte and the previous token's line to the parallel line
    /// buffer, returning the byte's index.
    fn emit_byte(&mut self, byte: u8) -> usize {
        let line = self.previous.line;
        self.code_mut().push_byte(byte, line)
    }

    /// Emits big-endian high byte then low byte; returns the high byte's
    /// index, which is the patch site for jumps.
    fn emit_short(&mut self, value: u16) -> usize {
        let [high, low] = value.to_be_bytes();
        let site = self.emit_byte(high);
        self.emit_byte(low);
        site
    }

    /// Emits an opcode and applies its fixed stack delta.
    fn emit_op(&mut self, op: Opcode) -> usize {
        let index = self.emit_byte(op as u8);
        self.adjust_stack(op.stack_effect());
        index
    }

    /// Applies an operand-dependent stack delta and tracks the running
    /// maximum into the function's recorded stack size.
    fn adjust_stack(&mut self, delta: i32) {
        let depth = i64::from(self.stack_size) + i64::from(delta);
        debug_assert!(depth >= 0, "simulated operand stack went negative");
        self.stack_size = u32::try_from(depth.max(0)).unwrap_or(u32::MAX);
        self.note_stack_high_water();
    }

    fn note_stack_high_water(&mut self) {
        let depth = self.stack_size;
        self.code_mut().note_stack_high_water(depth);
    }

    /// Adds a literal to the enclosing script's pool (deduplicated by value
    /// equality) and emits `Constant` with its index.
    fn emit_constant(&mut self, value: Value) {
        match self.add_literal(value) {
            Some(index) => {
                self.emit_op(Opcode::Constant);
                self.emit_short(index);
            }
            None => {
                self.parse_error("A script may not have more than 65536 unique literals.".to_string());
                self.emit_op(Opcode::PushNull);
            }
        }
    }

    fn add_literal(&mut self, value: Value) -> Option<u16> {
        let heap = &*self.heap;
        let hash = value_hash(value, heap).expect("literal values are hashable");
        if let Some(candidates) = self.literal_index.get(&hash) {
            for &index in candidates {
                let existing = heap.script(self.script).literals()[index as usize];
                if is_equal(existing, value, heap) {
                    return Some(index);
                }
            }
        }
        let index = self.heap.script_mut(self.script).push_literal(value)?;
        self.literal_index.entry(hash).or_default().push(index);
        Some(index)
    }

    /// Writes the current opcode count over the 2-byte placeholder at
    /// `site`. Jump operands are absolute.
    fn patch_jump(&mut self, site: usize) {
        let target = self.code().count();
        assert!(target < (1 << 16), "jump target exceeds the 16-bit operand range");
        self.code_mut().patch_short(site, target as u16);
    }

    /// Interns a name into the script's bytecode name table.
    fn add_name(&mut self, name: &str) -> u16 {
        let index = self.heap.script_add_name(self.script, name);
        u16::try_from(index).unwrap_or_else(|_| {
            self.parse_error("A script may not reference more than 65536 names.".to_string());
            0
        })
    }

    // ── Scopes and name resolution ───────────────────────────────────────

    fn enter_block(&mut self) {
        self.scope_depth += 1;
    }

    /// Trims the variable table and the simulated stack to the surrounding
    /// depth. No pops are emitted: every local occupies one stack slot and
    /// the caller's frame layout absorbs them.
    fn exit_block(&mut self) {
        while self.vars.last().is_some_and(|var| var.depth >= self.scope_depth) {
            self.vars.pop();
            self.stack_size -= 1;
        }
        self.scope_depth -= 1;
    }

    /// Declares a local occupying the next variable-table slot. The caller
    /// accounts for the slot's stack effect when it reserves the slot
    /// itself; parameters account here.
    fn declare_param(&mut self, name: &'a str, line: u32) {
        if self.vars.len() >= MAX_VARIABLES {
            self.parse_error("A function may not have more than 256 local variables.".to_string());
            return;
        }
        self.vars.push(Variable {
            name,
            depth: self.scope_depth,
            line,
        });
        self.stack_size += 1;
        self.note_stack_high_water();
    }

    /// Resolves a name: the local table innermost-first, then the script's
    /// globals and functions, then the globals and functions of imported
    /// scripts.
    fn find_name(&self, name: &str) -> NameRef {
        for (index, var) in self.vars.iter().enumerate().rev() {
            if var.name == name {
                return NameRef::Local(index as u8);
            }
        }
        let heap = &*self.heap;
        let script = heap.script(self.script);
        if let Some(index) = script.global_names().find(heap, name) {
            return NameRef::Global(index as u16);
        }
        if let Some(index) = script.function_names().find(heap, name) {
            return NameRef::Function(index as u16);
        }
        for (import_index, &import) in script.imports().iter().enumerate() {
            if import_index > usize::from(u8::MAX) {
                break;
            }
            let imported = heap.script(import);
            if let Some(index) = imported.global_names().find(heap, name)
                && index <= u32::from(u8::MAX)
            {
                return NameRef::GlobalExt {
                    import: import_index as u8,
                    index: index as u8,
                };
            }
            if let Some(index) = imported.function_names().find(heap, name)
                && index <= u32::from(u8::MAX)
            {
                return NameRef::FnExt {
                    import: import_index as u8,
                    index: index as u8,
                };
            }
        }
        NameRef::NotDefined
    }

    // ── Expressions ──────────────────────────────────────────────────────

    fn compile_expression(&mut self) {
        self.parse_precedence(Precedence::Lowest);
    }

    /// The precedence climb: lex one token, run its prefix rule, then fold
    /// infix rules while the current token binds at least as tightly as
    /// `precedence`. Leaves exactly one value on the simulated stack.
    fn parse_precedence(&mut self, precedence: Precedence) {
        self.lex_token();
        let Some(prefix) = get_rule(self.previous.kind).prefix else {
            self.parse_error("Expected an expression.".to_string());
            self.emit_op(Opcode::PushNull);
            return;
        };
        let can_assign = precedence <= Precedence::Assignment;
        prefix(self, can_assign);
        while get_rule(self.peek()).precedence >= precedence {
            self.lex_token();
            if let Some(infix) = get_rule(self.previous.kind).infix {
                infix(self, can_assign);
            }
        }
    }

    fn expr_grouping(&mut self, _can_assign: bool) {
        self.compile_expression();
        self.consume(TokenKind::RParen, "Expected ')' after expression.");
    }

    fn expr_literal(&mut self, _can_assign: bool) {
        match self.previous.kind {
            TokenKind::True => self.emit_constant(Value::Bool(true)),
            TokenKind::False => self.emit_constant(Value::Bool(false)),
            TokenKind::Null => self.emit_constant(Value::Null),
            TokenKind::Number => {
                let number = match self.previous.value {
                    Some(TokenValue::Num(n)) => n,
                    _ => unreachable!("number tokens carry their value"),
                };
                self.emit_constant(Value::Num(number));
            }
            TokenKind::String => {
                let content = match &self.previous.value {
                    Some(TokenValue::Str(s)) => s.clone(),
                    _ => unreachable!("string tokens carry their value"),
                };
                // Root the fresh string until the literal pool (reached from
                // the script) holds it.
                let id = self.heap.new_string(&content);
                self.heap.push_temp_root(id);
                self.emit_constant(Value::Ref(id));
                self.heap.pop_temp_root();
            }
            _ => unreachable!("token has no literal rule"),
        }
    }

    fn expr_unary(&mut self, _can_assign: bool) {
        let op_kind = self.previous.kind;
        self.parse_precedence(Precedence::Unary.one_higher());
        let op = match op_kind {
            TokenKind::Tild => Opcode::BitNot,
            TokenKind::Minus => Opcode::Negative,
            TokenKind::Not => Opcode::Not,
            _ => unreachable!("token has no unary opcode"),
        };
        self.emit_op(op);
    }

    fn expr_binary(&mut self, _can_assign: bool) {
        let op_kind = self.previous.kind;
        self.parse_precedence(get_rule(op_kind).precedence.one_higher());
        let op = match op_kind {
            TokenKind::DotDot => Opcode::Range,
            TokenKind::Percent => Opcode::Mod,
            TokenKind::Amp => Opcode::BitAnd,
            TokenKind::Pipe => Opcode::BitOr,
            TokenKind::Caret => Opcode::BitXor,
            TokenKind::Plus => Opcode::Add,
            TokenKind::Minus => Opcode::Subtract,
            TokenKind::Star => Opcode::Multiply,
            TokenKind::Slash => Opcode::Divide,
            TokenKind::Gt => Opcode::Gt,
            TokenKind::Lt => Opcode::Lt,
            TokenKind::EqEq => Opcode::EqEq,
            TokenKind::NotEq => Opcode::NotEq,
            TokenKind::GtEq => Opcode::GtEq,
            TokenKind::LtEq => Opcode::LtEq,
            TokenKind::SRight => Opcode::BitRshift,
            TokenKind::SLeft => Opcode::BitLshift,
            TokenKind::Is => Opcode::Is,
            TokenKind::In => Opcode::In,
            TokenKind::And => Opcode::And,
            TokenKind::Or => Opcode::Or,
            _ => unreachable!("token has no binary opcode"),
        };
        self.emit_op(op);
    }

    /// Infix rule for `=` and compound assigns. Assignable targets (names,
    /// subscripts, attributes) intercept the operator themselves, so
    /// reaching this rule means the left-hand side was not assignable.
    fn expr_assignment(&mut self, _can_assign: bool) {
        self.parse_error("Invalid assignment target.".to_string());
        // Compile the right-hand side anyway so parsing stays in sync.
        self.parse_precedence(Precedence::Assignment);
        self.emit_op(Opcode::Pop);
    }

    fn expr_name(&mut self, can_assign: bool) {
        let name_token = self.previous.clone();
        let name = self.token_text(&name_token);
        let assign_op = if can_assign
            && matches!(
                self.peek(),
                TokenKind::Eq | TokenKind::PlusEq | TokenKind::MinusEq | TokenKind::StarEq | TokenKind::SlashEq
            ) {
            Some(self.peek())
        } else {
            None
        };

        match self.find_name(name) {
            NameRef::NotDefined => match assign_op {
                Some(TokenKind::Eq) => {
                    self.lex_token();
                    self.define_variable(name, name_token.line);
                }
                Some(op) => {
                    self.parse_error(format!("Name '{name}' is not defined."));
                    self.emit_op(Opcode::PushNull);
                    self.lex_token();
                    self.compile_expression();
                    self.emit_op(compound_opcode(op));
                }
                None => {
                    self.parse_error(format!("Name '{name}' is not defined."));
                    self.emit_op(Opcode::PushNull);
                }
            },
            NameRef::Local(index) => match assign_op {
                Some(TokenKind::Eq) => {
                    self.lex_token();
                    self.compile_expression();
                    self.emit_op(Opcode::StoreLocal);
                    self.emit_byte(index);
                }
                Some(op) => {
                    self.emit_op(Opcode::PushLocal);
                    self.emit_byte(index);
                    self.lex_token();
                    self.compile_expression();
                    self.emit_op(compound_opcode(op));
                    self.emit_op(Opcode::StoreLocal);
                    self.emit_byte(index);
                }
                None => {
                    self.emit_op(Opcode::PushLocal);
                    self.emit_byte(index);
                }
            },
            NameRef::Global(index) => match assign_op {
                Some(TokenKind::Eq) => {
                    self.lex_token();
                    self.compile_expression();
                    self.emit_op(Opcode::StoreGlobal);
                    self.emit_short(index);
                }
                Some(op) => {
                    self.emit_op(Opcode::PushGlobal);
                    self.emit_short(index);
                    self.lex_token();
                    self.compile_expression();
                    self.emit_op(compound_opcode(op));
                    self.emit_op(Opcode::StoreGlobal);
                    self.emit_short(index);
                }
                None => {
                    self.emit_op(Opcode::PushGlobal);
                    self.emit_short(index);
                }
            },
            // Functions and extern bindings are read-only; an assignment
            // falls through to `expr_assignment` and reports there.
            NameRef::Function(index) => {
                self.emit_op(Opcode::PushFn);
                self.emit_short(index);
            }
            NameRef::GlobalExt { import, index } => {
                self.emit_op(Opcode::PushGlobalExt);
                self.emit_byte(import);
                self.emit_byte(index);
            }
            NameRef::FnExt { import, index } => {
                self.emit_op(Opcode::PushFnExt);
                self.emit_byte(import);
                self.emit_byte(index);
            }
        }
    }

    /// Defines a new variable; the `=` is already consumed. Top level
    /// defines a global, any deeper scope a local whose stack slot is
    /// reserved with `PushNull` before the initializer runs. The variable is
    /// visible to its own initializer (reading it yields null).
    fn define_variable(&mut self, name: &'a str, line: u32) {
        if self.scope_depth == -1 {
            if self.heap.script(self.script).globals().len() >= MAX_GLOBALS {
                self.parse_error("A script may not have more than 65536 global variables.".to_string());
                self.compile_expression();
                return;
            }
            let index = self.heap.script_add_global(self.script, name) as u16;
            self.compile_expression();
            self.emit_op(Opcode::StoreGlobal);
            self.emit_short(index);
        } else {
            if self.vars.len() >= MAX_VARIABLES {
                self.parse_error("A function may not have more than 256 local variables.".to_string());
                self.compile_expression();
                return;
            }
            let index = self.vars.len() as u8;
            self.emit_op(Opcode::PushNull);
            self.vars.push(Variable {
                name,
                depth: self.scope_depth,
                line,
            });
            self.compile_expression();
            self.emit_op(Opcode::StoreLocal);
            self.emit_byte(index);
        }
    }

    fn expr_call(&mut self, _can_assign: bool) {
        let mut argc: u32 = 0;
        self.skip_new_lines();
        if self.peek() != TokenKind::RParen {
            loop {
                self.compile_expression();
                argc += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
                self.skip_new_lines();
                if self.peek() == TokenKind::RParen {
                    break;
                }
            }
        }
        self.consume(TokenKind::RParen, "Expected ')' after arguments.");
        if argc > MAX_ARGUMENTS {
            self.parse_error("A call may not have more than 255 arguments.".to_string());
        }
        self.emit_op(Opcode::Call);
        self.emit_byte(argc.min(MAX_ARGUMENTS) as u8);
        // Pops the callee and the arguments, pushes the result.
        self.adjust_stack(-(argc as i32));
    }

    fn expr_subscript(&mut self, can_assign: bool) {
        self.skip_new_lines();
        self.compile_expression();
        self.consume(TokenKind::RBracket, "Expected ']' after subscript.");
        if can_assign && self.peek() == TokenKind::Eq {
            self.lex_token();
            self.compile_expression();
            self.emit_op(Opcode::SetSubscript);
        } else {
            self.emit_op(Opcode::GetSubscript);
        }
    }

    fn expr_attribute(&mut self, can_assign: bool) {
        self.consume(TokenKind::Name, "Expected an attribute name after '.'.");
        let name_token = self.previous.clone();
        let name = self.token_text(&name_token);
        let index = self.add_name(name);
        if can_assign && self.peek() == TokenKind::Eq {
            self.lex_token();
            self.compile_expression();
            self.emit_op(Opcode::SetAttrib);
            self.emit_short(index);
        } else {
            self.emit_op(Opcode::GetAttrib);
            self.emit_short(index);
        }
    }

    fn expr_list(&mut self, _can_assign: bool) {
        let mut count: u32 = 0;
        self.skip_new_lines();
        if self.peek() != TokenKind::RBracket {
            loop {
                self.compile_expression();
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
                self.skip_new_lines();
                if self.peek() == TokenKind::RBracket {
                    break;
                }
            }
        }
        self.skip_new_lines();
        self.consume(TokenKind::RBracket, "Expected ']' after list elements.");
        if count > u32::from(u16::MAX) {
            self.parse_error("A list literal may not have more than 65535 elements.".to_string());
        }
        self.emit_op(Opcode::BuildList);
        self.emit_short(count.min(u32::from(u16::MAX)) as u16);
        // Pops the elements, pushes the list.
        self.adjust_stack(1 - count as i32);
    }

    fn expr_map(&mut self, _can_assign: bool) {
        let mut count: u32 = 0;
        self.skip_new_lines();
        if self.peek() != TokenKind::RBrace {
            loop {
                self.compile_expression();
                self.consume(TokenKind::Colon, "Expected ':' after a map key.");
                self.skip_new_lines();
                self.compile_expression();
                count += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
                self.skip_new_lines();
                if self.peek() == TokenKind::RBrace {
                    break;
                }
            }
        }
        self.skip_new_lines();
        self.consume(TokenKind::RBrace, "Expected '}' after map entries.");
        if count > u32::from(u16::MAX) {
            self.parse_error("A map literal may not have more than 65535 entries.".to_string());
        }
        self.emit_op(Opcode::BuildMap);
        self.emit_short(count.min(u32::from(u16::MAX)) as u16);
        // Pops the key/value pairs, pushes the map.
        self.adjust_stack(1 - 2 * count as i32);
    }

    // ── Statements ───────────────────────────────────────────────────────

    fn compile_statement(&mut self) {
        if self.match_token(TokenKind::Break) {
            self.compile_break();
        } else if self.match_token(TokenKind::Continue) {
            self.compile_continue();
        } else if self.match_token(TokenKind::Return) {
            self.compile_return();
        } else if self.match_token(TokenKind::If) {
            self.compile_if();
        } else if self.match_token(TokenKind::While) {
            self.compile_while();
        } else if self.match_token(TokenKind::For) {
            self.parse_error("The 'for' statement is reserved.".to_string());
            self.skip_to_end_of_line();
        } else {
            self.compile_expression();
            self.emit_op(Opcode::Pop);
            self.consume_end_statement();
        }
    }

    fn compile_break(&mut self) {
        if self.loops.is_empty() {
            self.parse_error("A 'break' may only occur inside a loop.".to_string());
        } else {
            self.emit_op(Opcode::Jump);
            let site = self.emit_short(JUMP_PLACEHOLDER);
            let overflowed = {
                let frame = self.loops.last_mut().expect("checked non-empty above");
                if frame.break_patches.len() >= MAX_BREAKS {
                    true
                } else {
                    frame.break_patches.push(site);
                    false
                }
            };
            if overflowed {
                self.parse_error("A loop may not have more than 256 'break' statements.".to_string());
            }
        }
        self.consume_end_statement();
    }

    fn compile_continue(&mut self) {
        if self.loops.is_empty() {
            self.parse_error("A 'continue' may only occur inside a loop.".to_string());
        } else {
            let start = self.loops.last().expect("checked non-empty above").start;
            debug_assert!(start < (1 << 16), "loop start exceeds the 16-bit operand range");
            self.emit_op(Opcode::Jump);
            self.emit_short(start as u16);
        }
        self.consume_end_statement();
    }

    fn compile_return(&mut self) {
        if self.func == self.heap.script(self.script).body() {
            self.parse_error("A 'return' may only occur inside a function.".to_string());
        }
        if matches!(self.peek(), TokenKind::Line | TokenKind::Semicolon | TokenKind::Eof) {
            self.emit_op(Opcode::PushNull);
            self.emit_op(Opcode::Return);
        } else {
            self.compile_expression();
            self.emit_op(Opcode::Return);
        }
        self.consume_end_statement();
    }

    fn compile_if(&mut self) {
        self.compile_expression();
        self.emit_op(Opcode::JumpIfNot);
        let patch = self.emit_short(JUMP_PLACEHOLDER);
        self.consume_start_block();
        self.compile_block_body(BlockKind::If);
        if self.match_token(TokenKind::Elif) {
            self.patch_jump(patch);
            // An elif is an if statement sharing the outer `end`.
            self.compile_if();
        } else if self.match_token(TokenKind::Else) {
            self.patch_jump(patch);
            self.compile_block_body(BlockKind::Regular);
            self.consume(TokenKind::End, "Expected 'end' after the else block.");
        } else {
            self.patch_jump(patch);
            self.consume(TokenKind::End, "Expected 'end' to close the if statement.");
        }
    }

    fn compile_while(&mut self) {
        let start = self.code().count();
        self.loops.push(LoopFrame {
            start,
            exit_patch: 0,
            break_patches: SmallVec::new(),
        });
        self.compile_expression();
        self.emit_op(Opcode::JumpIfNot);
        let exit = self.emit_short(JUMP_PLACEHOLDER);
        self.loops.last_mut().expect("pushed above").exit_patch = exit;
        self.consume_start_block();
        self.compile_block_body(BlockKind::Regular);
        self.consume(TokenKind::End, "Expected 'end' to close the while loop.");
        debug_assert!(start < (1 << 16), "loop start exceeds the 16-bit operand range");
        self.emit_op(Opcode::Jump);
        self.emit_short(start as u16);
        let frame = self.loops.pop().expect("pushed above");
        self.patch_jump(frame.exit_patch);
        for site in frame.break_patches {
            self.patch_jump(site);
        }
    }

    fn compile_block_body(&mut self, kind: BlockKind) {
        self.enter_block();
        self.skip_new_lines();
        while !self.at_block_end(kind) {
            self.compile_statement();
            self.skip_new_lines();
        }
        self.exit_block();
    }

    fn at_block_end(&self, kind: BlockKind) -> bool {
        match self.current.kind {
            TokenKind::End | TokenKind::Eof => true,
            TokenKind::Else | TokenKind::Elif => kind == BlockKind::If,
            _ => false,
        }
    }

    fn skip_to_end_of_line(&mut self) {
        while !matches!(self.peek(), TokenKind::Line | TokenKind::Eof) {
            self.lex_token();
        }
    }

    // ── Top-level declarations ───────────────────────────────────────────

    fn compile_function_decl(&mut self) {
        self.consume(TokenKind::Name, "Expected a function name.");
        let name_token = self.previous.clone();
        let name = self.token_text(&name_token);
        if !matches!(self.find_name(name), NameRef::NotDefined) {
            self.parse_error(format!("Name '{name}' already exists."));
        }
        let func = self.heap.new_function_scripted(self.script);
        self.heap.push_temp_root(func);
        self.heap.script_add_function(self.script, func, name);
        self.heap.pop_temp_root();

        self.consume(TokenKind::LParen, "Expected '(' after the function name.");
        let outer_func = std::mem::replace(&mut self.func, func);
        let outer_stack = std::mem::replace(&mut self.stack_size, 0);
        self.enter_block(); // parameter scope
        let arity = self.compile_parameter_list(true);
        self.heap.function_mut(func).set_arity(Arity::Exact(arity));

        self.consume_start_block();
        self.compile_block_body(BlockKind::Regular);
        self.consume(TokenKind::End, "Expected 'end' to close the function body.");
        // Implicit `return null` for bodies that fall off the end.
        self.emit_op(Opcode::PushNull);
        self.emit_op(Opcode::Return);
        self.exit_block(); // parameter scope; drops the parameters
        self.func = outer_func;
        self.stack_size = outer_stack;
    }

    fn compile_native_decl(&mut self) {
        self.consume(TokenKind::Name, "Expected a function name.");
        let name_token = self.previous.clone();
        let name = self.token_text(&name_token);
        if !matches!(self.find_name(name), NameRef::NotDefined) {
            self.parse_error(format!("Name '{name}' already exists."));
        }
        let func = self.heap.new_function_native(self.script);
        self.heap.push_temp_root(func);
        self.heap.script_add_function(self.script, func, name);
        self.heap.pop_temp_root();

        self.consume(TokenKind::LParen, "Expected '(' after the function name.");
        // Native declarations list parameters for arity only; the body lives
        // on the host.
        let arity = self.compile_parameter_list(false);
        self.heap.function_mut(func).set_arity(Arity::Exact(arity));
        self.consume_end_statement();
    }

    /// Parses `name, name, ...)`, returning the arity. The opening paren is
    /// already consumed. With `declare` set each parameter becomes a local
    /// of the function being compiled.
    fn compile_parameter_list(&mut self, declare: bool) -> u8 {
        let mut arity: u32 = 0;
        if !self.match_token(TokenKind::RParen) {
            loop {
                self.consume(TokenKind::Name, "Expected a parameter name.");
                let param_token = self.previous.clone();
                let param = self.token_text(&param_token);
                if !declare {
                    arity += 1;
                    if !self.match_token(TokenKind::Comma) {
                        break;
                    }
                    continue;
                }
                if let Some(existing) = self.vars.iter().find(|v| v.depth == self.scope_depth && v.name == param) {
                    let line = existing.line;
                    self.parse_error(format!("A parameter named '{param}' already exists (line {line})."));
                } else {
                    self.declare_param(param, param_token.line);
                }
                arity += 1;
                if !self.match_token(TokenKind::Comma) {
                    break;
                }
            }
            self.consume(TokenKind::RParen, "Expected ')' after parameters.");
        }
        if arity > 255 {
            self.parse_error("A function may not have more than 255 parameters.".to_string());
        }
        arity.min(255) as u8
    }

    fn compile_import(&mut self) {
        self.consume(TokenKind::Name, "Expected a module name after 'import'.");
        let name_token = self.previous.clone();
        let name = self.token_text(&name_token);
        let index = self.add_name(name);
        self.emit_op(Opcode::Import);
        self.emit_short(index);
        self.consume_end_statement();
    }
}

fn compound_opcode(kind: TokenKind) -> Opcode {
    match kind {
        TokenKind::PlusEq => Opcode::Add,
        TokenKind::MinusEq => Opcode::Subtract,
        TokenKind::StarEq => Opcode::Multiply,
        TokenKind::SlashEq => Opcode::Divide,
        _ => unreachable!("token is not a compound assignment"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::report::CollectReports;

    fn compile(source: &str) -> (Heap, HeapId, Vec<Report>) {
        let mut heap = Heap::new();
        let mut reporter = CollectReports::new();
        let script = heap.new_script("<test>");
        heap.push_temp_root(script);
        let compiler = Compiler::new(&mut heap, &mut reporter, "<test>", source, script);
        let _ = compiler.run();
        heap.pop_temp_root();
        (heap, script, reporter.into_reports())
    }

    fn body_opcodes(heap: &Heap, script: HeapId) -> Vec<u8> {
        let body = heap.script(script).body();
        heap.function(body).code().unwrap().opcodes().to_vec()
    }

    #[test]
    fn test_expression_statement_emits_pop() {
        let (heap, script, reports) = compile("1 + 2\n");
        assert!(reports.is_empty(), "{reports:?}");
        assert_eq!(
            body_opcodes(&heap, script),
            vec![
                Opcode::Constant as u8,
                0,
                0,
                Opcode::Constant as u8,
                0,
                1,
                Opcode::Add as u8,
                Opcode::Pop as u8,
            ]
        );
        let literals = heap.script(script).literals();
        assert_eq!(literals.len(), 2);
        assert_eq!(literals[0].as_num(), Some(1.0));
        assert_eq!(literals[1].as_num(), Some(2.0));
    }

    #[test]
    fn test_precedence_multiplication_binds_tighter() {
        let (heap, script, reports) = compile("1 + 2 * 3\n");
        assert!(reports.is_empty(), "{reports:?}");
        assert_eq!(
            body_opcodes(&heap, script),
            vec![
                Opcode::Constant as u8,
                0,
                0,
                Opcode::Constant as u8,
                0,
                1,
                Opcode::Constant as u8,
                0,
                2,
                Opcode::Multiply as u8,
                Opcode::Add as u8,
                Opcode::Pop as u8,
            ]
        );
        // Three operands were live at once.
        let body = heap.script(script).body();
        assert_eq!(heap.function(body).code().unwrap().stack_size(), 3);
    }

    #[test]
    fn test_line_buffer_parallels_opcodes() {
        let (heap, script, _) = compile("1\n2\n");
        let body = heap.script(script).body();
        let code = heap.function(body).code().unwrap();
        assert_eq!(code.opcodes().len(), code.oplines().len());
        // First statement on line 1, second on line 2.
        assert_eq!(code.oplines()[0], 1);
        assert_eq!(code.oplines()[code.oplines().len() - 1], 2);
    }

    #[test]
    fn test_literal_pool_dedups_by_value() {
        let (heap, script, reports) = compile("1 + 1\n\"a\" + \"a\"\n");
        assert!(reports.is_empty(), "{reports:?}");
        // One number literal and one string literal.
        assert_eq!(heap.script(script).literals().len(), 2);
    }

    #[test]
    fn test_global_definition_and_use() {
        let (heap, script, reports) = compile("x = 1\nx + 2\n");
        assert!(reports.is_empty(), "{reports:?}");
        let record = heap.script(script);
        assert_eq!(record.globals().len(), 1);
        assert_eq!(record.global_names().find(&heap, "x"), Some(0));
        let opcodes = body_opcodes(&heap, script);
        assert_eq!(
            opcodes,
            vec![
                Opcode::Constant as u8,
                0,
                0,
                Opcode::StoreGlobal as u8,
                0,
                0,
                Opcode::Pop as u8,
                Opcode::PushGlobal as u8,
                0,
                0,
                Opcode::Constant as u8,
                0,
                1,
                Opcode::Add as u8,
                Opcode::Pop as u8,
            ]
        );
    }

    #[test]
    fn test_undefined_name_is_reported() {
        let (_, _, reports) = compile("y + 1\n");
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, ReportKind::Parse);
        assert!(reports[0].message.contains("'y' is not defined"));
    }

    #[test]
    fn test_compound_assignment_desugars() {
        let (heap, script, reports) = compile("x = 1\nx += 2\n");
        assert!(reports.is_empty(), "{reports:?}");
        let opcodes = body_opcodes(&heap, script);
        let tail = &opcodes[7..];
        assert_eq!(
            tail,
            &[
                Opcode::PushGlobal as u8,
                0,
                0,
                Opcode::Constant as u8,
                0,
                1,
                Opcode::Add as u8,
                Opcode::StoreGlobal as u8,
                0,
                0,
                Opcode::Pop as u8,
            ]
        );
    }

    #[test]
    fn test_invalid_assignment_target() {
        let (_, _, reports) = compile("1 = 2\n");
        assert_eq!(reports.len(), 1);
        assert!(reports[0].message.contains("Invalid assignment target"));
    }

    #[test]
    fn test_locals_inside_function() {
        let (heap, script, reports) = compile("def f(a, b)\n c = a\n return c + b\nend\n");
        assert!(reports.is_empty(), "{reports:?}");
        let record = heap.script(script);
        assert_eq!(record.functions().len(), 1);
        assert_eq!(record.function_names().find(&heap, "f"), Some(0));
        let func = heap.function(record.functions()[0]);
        assert_eq!(func.arity(), Arity::Exact(2));
        let code = func.code().unwrap();
        assert_eq!(
            code.opcodes(),
            &[
                // c = a
                Opcode::PushNull as u8,
                Opcode::PushLocal as u8,
                0,
                Opcode::StoreLocal as u8,
                2,
                Opcode::Pop as u8,
                // return c + b
                Opcode::PushLocal as u8,
                2,
                Opcode::PushLocal as u8,
                1,
                Opcode::Add as u8,
                Opcode::Return as u8,
                // implicit return
                Opcode::PushNull as u8,
                Opcode::Return as u8,
            ]
        );
        // Two parameters, one local, and two operands live at the peak.
        assert_eq!(code.stack_size(), 5);
    }

    #[test]
    fn test_return_at_top_level_is_an_error() {
        let (_, _, reports) = compile("return 1\n");
        assert_eq!(reports.len(), 1);
        assert!(reports[0].message.contains("'return' may only occur inside a function"));
    }

    #[test]
    fn test_break_and_continue_outside_loop() {
        let (_, _, reports) = compile("break\ncontinue\n");
        assert_eq!(reports.len(), 2);
        assert!(reports[0].message.contains("'break' may only occur inside a loop"));
        assert!(reports[1].message.contains("'continue' may only occur inside a loop"));
    }

    #[test]
    fn test_native_declaration() {
        let (heap, script, reports) = compile("native clock(a, b, c)\n");
        assert!(reports.is_empty(), "{reports:?}");
        let record = heap.script(script);
        assert_eq!(record.functions().len(), 1);
        let func = heap.function(record.functions()[0]);
        assert!(func.is_native());
        assert_eq!(func.arity(), Arity::Exact(3));
        // Nothing is emitted into the body for a native declaration.
        assert!(body_opcodes(&heap, script).is_empty());
    }

    #[test]
    fn test_import_emits_name_operand() {
        let (heap, script, reports) = compile("import util\n");
        assert!(reports.is_empty(), "{reports:?}");
        assert_eq!(heap.script(script).names().find(&heap, "util"), Some(0));
        assert_eq!(body_opcodes(&heap, script), vec![Opcode::Import as u8, 0, 0]);
    }

    #[test]
    fn test_list_and_map_literals() {
        let (heap, script, reports) = compile("[1, 2, 3]\n{1: 2}\n");
        assert!(reports.is_empty(), "{reports:?}");
        let opcodes = body_opcodes(&heap, script);
        // [1, 2, 3]
        assert_eq!(opcodes[9], Opcode::BuildList as u8);
        assert_eq!(u16::from_be_bytes([opcodes[10], opcodes[11]]), 3);
        assert_eq!(opcodes[12], Opcode::Pop as u8);
        // {1: 2}
        assert_eq!(opcodes[19], Opcode::BuildMap as u8);
        assert_eq!(u16::from_be_bytes([opcodes[20], opcodes[21]]), 1);
    }

    #[test]
    fn test_call_and_attribute_and_subscript() {
        let (heap, script, reports) = compile("def f(a)\nend\nf(1).attr\nf(2)[0] = 3\n");
        assert!(reports.is_empty(), "{reports:?}");
        let opcodes = body_opcodes(&heap, script);
        let record = heap.script(script);
        assert_eq!(record.names().find(&heap, "attr"), Some(0));
        // f(1).attr → PushFn, Constant, Call 1, GetAttrib
        assert_eq!(
            &opcodes[..11],
            &[
                Opcode::PushFn as u8,
                0,
                0,
                Opcode::Constant as u8,
                0,
                0,
                Opcode::Call as u8,
                1,
                Opcode::GetAttrib as u8,
                0,
                0,
            ]
        );
        assert_eq!(opcodes[11], Opcode::Pop as u8);
        // f(2)[0] = 3 ends with SetSubscript then Pop.
        assert_eq!(opcodes[opcodes.len() - 2], Opcode::SetSubscript as u8);
        assert_eq!(opcodes[opcodes.len() - 1], Opcode::Pop as u8);
    }

    #[test]
    fn test_for_is_reserved() {
        let (_, _, reports) = compile("for x in y\n");
        assert!(!reports.is_empty());
        assert!(reports[0].message.contains("'for' statement is reserved"));
    }

    #[test]
    fn test_duplicate_function_name() {
        let (_, _, reports) = compile("def f()\nend\ndef f()\nend\n");
        assert_eq!(reports.len(), 1);
        assert!(reports[0].message.contains("'f' already exists"));
    }

    #[test]
    fn test_parse_error_recovers_and_continues() {
        // Both statements are bad; both are reported.
        let (_, _, reports) = compile("1 +\n) 2\n");
        assert!(reports.len() >= 2, "{reports:?}");
    }

    #[test]
    fn test_local_definition_reserves_stack_slot() {
        let (heap, script, reports) = compile("if true do\n x = 1\n x + 1\nend\n");
        assert!(reports.is_empty(), "{reports:?}");
        let body = heap.script(script).body();
        let code = heap.function(body).code().unwrap();
        // Slot + operand pair live at the peak.
        assert!(code.stack_size() >= 3);
        // No globals were defined: `x` was a block local of the body.
        assert!(heap.script(script).globals().is_empty());
    }
}
