//! The lexer: a character cursor over source text producing one token per
//! call.
//!
//! Whitespace (space, tab, CR) is skipped inline, `#` comments run to end of
//! line, and newlines come out as distinct `Line` tokens because statements
//! end at them. EOF is sticky: once produced, every further call re-emits
//! it. Lex errors are queued on the lexer and drained by the parser after
//! each call, so scanning always continues past them.

use crate::report::{Report, ReportKind};

/// Kind of a lexed token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum TokenKind {
    // Punctuation and operators.
    LParen,
    RParen,
    LBracket,
    RBracket,
    LBrace,
    RBrace,
    Comma,
    Colon,
    Semicolon,
    Dot,
    DotDot,
    Plus,
    PlusEq,
    Minus,
    MinusEq,
    Star,
    StarEq,
    Slash,
    SlashEq,
    Percent,
    Tild,
    Amp,
    Pipe,
    Caret,
    Eq,
    EqEq,
    Not,
    NotEq,
    Gt,
    GtEq,
    SRight,
    Lt,
    LtEq,
    SLeft,

    // Literals and names.
    Name,
    Number,
    String,

    // Keywords.
    True,
    False,
    Null,
    And,
    Or,
    Is,
    In,
    If,
    Elif,
    Else,
    Do,
    End,
    While,
    For,
    Break,
    Continue,
    Return,
    Def,
    Native,
    Import,

    // Stream control.
    Line,
    Error,
    Eof,
}

/// Literal payload carried by `Number` and `String` tokens.
#[derive(Debug, Clone, PartialEq)]
pub enum TokenValue {
    Num(f64),
    Str(String),
}

/// A lexed token: kind, source slice, 1-based line, optional literal.
#[derive(Debug, Clone)]
pub struct Token {
    pub kind: TokenKind,
    pub start: usize,
    pub length: usize,
    pub line: u32,
    pub value: Option<TokenValue>,
}

impl Token {
    /// Placeholder used to prime the parser's token window.
    #[must_use]
    pub(crate) fn before_start() -> Self {
        Self {
            kind: TokenKind::Eof,
            start: 0,
            length: 0,
            line: 1,
            value: None,
        }
    }
}

/// Looks up a reserved word. The keyword `not` lexes to the same kind as
/// `!`; both drive the same unary rule.
fn lookup_keyword(name: &str) -> Option<TokenKind> {
    match name {
        "true" => Some(TokenKind::True),
        "false" => Some(TokenKind::False),
        "null" => Some(TokenKind::Null),
        "and" => Some(TokenKind::And),
        "or" => Some(TokenKind::Or),
        "not" => Some(TokenKind::Not),
        "is" => Some(TokenKind::Is),
        "in" => Some(TokenKind::In),
        "if" => Some(TokenKind::If),
        "elif" => Some(TokenKind::Elif),
        "else" => Some(TokenKind::Else),
        "do" => Some(TokenKind::Do),
        "end" => Some(TokenKind::End),
        "while" => Some(TokenKind::While),
        "for" => Some(TokenKind::For),
        "break" => Some(TokenKind::Break),
        "continue" => Some(TokenKind::Continue),
        "return" => Some(TokenKind::Return),
        "def" => Some(TokenKind::Def),
        "native" => Some(TokenKind::Native),
        "import" => Some(TokenKind::Import),
        _ => None,
    }
}

fn is_name_start(byte: u8) -> bool {
    byte.is_ascii_alphabetic() || byte == b'_'
}

fn is_name_part(byte: u8) -> bool {
    byte.is_ascii_alphanumeric() || byte == b'_'
}

/// A character cursor over one source string.
pub struct Lexer<'src> {
    source: &'src str,
    path: &'src str,
    /// Start of the token being scanned.
    start: usize,
    pos: usize,
    line: u32,
    /// Lex errors queued for the parser to drain.
    pending: Vec<Report>,
}

impl<'src> Lexer<'src> {
    #[must_use]
    pub fn new(path: &'src str, source: &'src str) -> Self {
        Self {
            source,
            path,
            start: 0,
            pos: 0,
            line: 1,
            pending: Vec::new(),
        }
    }

    /// Reports queued since the last drain.
    pub fn take_reports(&mut self) -> Vec<Report> {
        std::mem::take(&mut self.pending)
    }

    /// Scans and returns the next token.
    pub fn next_token(&mut self) -> Token {
        self.skip_spaces();
        self.start = self.pos;
        let Some(byte) = self.advance() else {
            return self.make(TokenKind::Eof);
        };
        match byte {
            b'\n' => {
                let token = self.make(TokenKind::Line);
                self.line += 1;
                token
            }
            b'(' => self.make(TokenKind::LParen),
            b')' => self.make(TokenKind::RParen),
            b'[' => self.make(TokenKind::LBracket),
            b']' => self.make(TokenKind::RBracket),
            b'{' => self.make(TokenKind::LBrace),
            b'}' => self.make(TokenKind::RBrace),
            b',' => self.make(TokenKind::Comma),
            b':' => self.make(TokenKind::Colon),
            b';' => self.make(TokenKind::Semicolon),
            b'%' => self.make(TokenKind::Percent),
            b'~' => self.make(TokenKind::Tild),
            b'&' => self.make(TokenKind::Amp),
            b'|' => self.make(TokenKind::Pipe),
            b'^' => self.make(TokenKind::Caret),
            b'.' => self.two_char(b'.', TokenKind::DotDot, TokenKind::Dot),
            b'=' => self.two_char(b'=', TokenKind::EqEq, TokenKind::Eq),
            b'!' => self.two_char(b'=', TokenKind::NotEq, TokenKind::Not),
            b'+' => self.two_char(b'=', TokenKind::PlusEq, TokenKind::Plus),
            b'-' => self.two_char(b'=', TokenKind::MinusEq, TokenKind::Minus),
            b'*' => self.two_char(b'=', TokenKind::StarEq, TokenKind::Star),
            b'/' => self.two_char(b'=', TokenKind::SlashEq, TokenKind::Slash),
            b'>' => {
                if self.match_byte(b'>') {
                    self.make(TokenKind::SRight)
                } else {
                    self.two_char(b'=', TokenKind::GtEq, TokenKind::Gt)
                }
            }
            b'<' => {
                if self.match_byte(b'<') {
                    self.make(TokenKind::SLeft)
                } else {
                    self.two_char(b'=', TokenKind::LtEq, TokenKind::Lt)
                }
            }
            b'"' => self.string_literal(),
            b'0'..=b'9' => self.number_literal(),
            byte if is_name_start(byte) => self.identifier(),
            byte => {
                if byte.is_ascii_graphic() {
                    self.lex_error(format!("Unknown character '{}'.", byte as char));
                } else {
                    self.lex_error(format!("Unknown character {byte:#04x}."));
                }
                self.make(TokenKind::Error)
            }
        }
    }

    // ── Cursor helpers ───────────────────────────────────────────────────

    fn peek(&self) -> Option<u8> {
        self.source.as_bytes().get(self.pos).copied()
    }

    fn peek_next(&self) -> Option<u8> {
        self.source.as_bytes().get(self.pos + 1).copied()
    }

    fn advance(&mut self) -> Option<u8> {
        let byte = self.peek()?;
        self.pos += 1;
        Some(byte)
    }

    fn match_byte(&mut self, expected: u8) -> bool {
        if self.peek() == Some(expected) {
            self.pos += 1;
            true
        } else {
            false
        }
    }

    fn two_char(&mut self, trailing: u8, combined: TokenKind, plain: TokenKind) -> Token {
        if self.match_byte(trailing) {
            self.make(combined)
        } else {
            self.make(plain)
        }
    }

    fn skip_spaces(&mut self) {
        loop {
            match self.peek() {
                Some(b' ' | b'\t' | b'\r') => {
                    self.pos += 1;
                }
                Some(b'#') => {
                    // Comment to end of line; the newline itself still
                    // becomes a Line token.
                    while !matches!(self.peek(), None | Some(b'\n')) {
                        self.pos += 1;
                    }
                }
                _ => return,
            }
        }
    }

    fn make(&self, kind: TokenKind) -> Token {
        Token {
            kind,
            start: self.start,
            length: self.pos - self.start,
            line: self.line,
            value: None,
        }
    }

    fn make_literal(&self, kind: TokenKind, value: TokenValue) -> Token {
        Token {
            value: Some(value),
            ..self.make(kind)
        }
    }

    fn lex_error(&mut self, message: String) {
        self.pending.push(Report {
            kind: ReportKind::Lex,
            path: self.path.to_string(),
            line: self.line,
            message,
        });
    }

    // ── Literals ─────────────────────────────────────────────────────────

    fn string_literal(&mut self) -> Token {
        let mut bytes: Vec<u8> = Vec::new();
        loop {
            match self.advance() {
                None => {
                    self.lex_error("Unterminated string.".to_string());
                    return self.make(TokenKind::Error);
                }
                Some(b'"') => break,
                Some(b'\\') => match self.advance() {
                    Some(b'"') => bytes.push(b'"'),
                    Some(b'\\') => bytes.push(b'\\'),
                    Some(b'n') => bytes.push(b'\n'),
                    Some(b'r') => bytes.push(b'\r'),
                    Some(b't') => bytes.push(b'\t'),
                    Some(_) => {
                        self.lex_error("Invalid escape character.".to_string());
                    }
                    None => {
                        self.lex_error("Unterminated string.".to_string());
                        return self.make(TokenKind::Error);
                    }
                },
                Some(b'\n') => {
                    self.line += 1;
                    bytes.push(b'\n');
                }
                Some(byte) => bytes.push(byte),
            }
        }
        let content = String::from_utf8(bytes).expect("string literal copied from valid UTF-8 source");
        self.make_literal(TokenKind::String, TokenValue::Str(content))
    }

    fn number_literal(&mut self) -> Token {
        while self.peek().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
        }
        if self.peek() == Some(b'.') && self.peek_next().is_some_and(|b| b.is_ascii_digit()) {
            self.pos += 1;
            while self.peek().is_some_and(|b| b.is_ascii_digit()) {
                self.pos += 1;
            }
        }
        let text = &self.source[self.start..self.pos];
        let mut number: f64 = text.parse().unwrap_or(f64::INFINITY);
        if !number.is_finite() {
            self.lex_error("Number literal is out of range.".to_string());
            number = 0.0;
        }
        self.make_literal(TokenKind::Number, TokenValue::Num(number))
    }

    fn identifier(&mut self) -> Token {
        while self.peek().is_some_and(is_name_part) {
            self.pos += 1;
        }
        let name = &self.source[self.start..self.pos];
        match lookup_keyword(name) {
            Some(kind) => self.make(kind),
            None => self.make(TokenKind::Name),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn kinds(source: &str) -> Vec<TokenKind> {
        let mut lexer = Lexer::new("<test>", source);
        let mut out = Vec::new();
        loop {
            let token = lexer.next_token();
            let kind = token.kind;
            out.push(kind);
            if kind == TokenKind::Eof {
                return out;
            }
        }
    }

    #[test]
    fn test_two_char_operators() {
        use TokenKind::*;
        assert_eq!(
            kinds(".. . == = != ! >= >> > <= << < += -= *= /="),
            vec![
                DotDot, Dot, EqEq, Eq, NotEq, Not, GtEq, SRight, Gt, LtEq, SLeft, Lt, PlusEq, MinusEq, StarEq,
                SlashEq, Eof
            ]
        );
    }

    #[test]
    fn test_newline_is_a_token_and_comments_are_not() {
        use TokenKind::*;
        assert_eq!(kinds("a # comment\nb"), vec![Name, Line, Name, Eof]);
    }

    #[test]
    fn test_eof_is_sticky() {
        let mut lexer = Lexer::new("<test>", "");
        assert_eq!(lexer.next_token().kind, TokenKind::Eof);
        assert_eq!(lexer.next_token().kind, TokenKind::Eof);
    }

    #[test]
    fn test_string_escapes() {
        let mut lexer = Lexer::new("<test>", r#""a\nb\t\"\\""#);
        let token = lexer.next_token();
        assert_eq!(token.kind, TokenKind::String);
        assert_eq!(token.value, Some(TokenValue::Str("a\nb\t\"\\".to_string())));
        assert!(lexer.take_reports().is_empty());
    }

    #[test]
    fn test_invalid_escape_reports_and_continues() {
        let mut lexer = Lexer::new("<test>", r#""a\qb""#);
        let token = lexer.next_token();
        assert_eq!(token.kind, TokenKind::String);
        assert_eq!(token.value, Some(TokenValue::Str("ab".to_string())));
        let reports = lexer.take_reports();
        assert_eq!(reports.len(), 1);
        assert_eq!(reports[0].kind, ReportKind::Lex);
    }

    #[test]
    fn test_unterminated_string() {
        let mut lexer = Lexer::new("<test>", "\"abc");
        assert_eq!(lexer.next_token().kind, TokenKind::Error);
        assert_eq!(lexer.take_reports().len(), 1);
        // EOF is still reachable after the error.
        assert_eq!(lexer.next_token().kind, TokenKind::Eof);
    }

    #[test]
    fn test_number_literals() {
        let mut lexer = Lexer::new("<test>", "123.45");
        let token = lexer.next_token();
        assert_eq!(token.kind, TokenKind::Number);
        assert_eq!(token.value, Some(TokenValue::Num(123.45)));

        // A trailing dot is an attribute access, not a fraction.
        let mut lexer = Lexer::new("<test>", "1.foo");
        assert_eq!(lexer.next_token().kind, TokenKind::Number);
        assert_eq!(lexer.next_token().kind, TokenKind::Dot);
        assert_eq!(lexer.next_token().kind, TokenKind::Name);
    }

    #[test]
    fn test_out_of_range_number_lexes_as_zero() {
        let huge = "9".repeat(400);
        let mut lexer = Lexer::new("<test>", &huge);
        let token = lexer.next_token();
        assert_eq!(token.kind, TokenKind::Number);
        assert_eq!(token.value, Some(TokenValue::Num(0.0)));
        assert_eq!(lexer.take_reports().len(), 1);
    }

    #[test]
    fn test_keywords_and_names() {
        use TokenKind::*;
        assert_eq!(
            kinds("if elif else while end foo not and or is in"),
            vec![If, Elif, Else, While, End, Name, Not, And, Or, Is, In, Eof]
        );
    }

    #[test]
    fn test_line_numbers() {
        let mut lexer = Lexer::new("<test>", "a\nb\nc");
        assert_eq!(lexer.next_token().line, 1);
        assert_eq!(lexer.next_token().line, 1); // the Line token itself
        assert_eq!(lexer.next_token().line, 2);
        assert_eq!(lexer.next_token().line, 2);
        assert_eq!(lexer.next_token().line, 3);
    }
}
