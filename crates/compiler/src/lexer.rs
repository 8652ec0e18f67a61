//! Lexer for the Pascal subset
//!
//! Single pass over UTF-8 input. Keywords are recognized case-insensitively
//! and win over identifiers at word boundaries; both comment forms (`{ }`
//! and `(* *)`) are accepted, close each other, and do not nest. The lexical
//! alternatives `@` for `^`, `(.` for `[` and `.)` for `]` map to their
//! canonical kinds while keeping the verbatim text.
//!
//! Unrecognized characters are coalesced into one span per run and reported
//! once; the pending span is committed on newline, on a non-adjacent error
//! or at end of input.

use crate::diagnostics::{Diagnostics, Span};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TokenKind {
    // Keywords
    Program,
    Begin,
    End,
    Label,
    Const,
    Type,
    Var,
    Array,
    Packed,
    Set,
    File,
    Of,
    Record,
    Function,
    Procedure,
    If,
    Then,
    Else,
    For,
    To,
    Downto,
    Do,
    While,
    Repeat,
    Until,
    Case,
    Goto,
    With,
    And,
    Or,
    Not,
    In,
    Div,
    Mod,
    Nil,

    // Single-character symbols
    Period,
    Semicolon,
    Colon,
    LeftParen,
    Comma,
    RightParen,
    Less,
    Greater,
    Equal,
    Plus,
    Minus,
    Star,
    Slash,
    LeftBracket,
    RightBracket,
    Caret,

    // Compound symbols
    Different,
    LessEqual,
    GreaterEqual,
    Assign,
    Range,

    Identifier,
    Integer,
    Real,
    StringLiteral,
}

/// A lexed token. `text` is the processed value (string literals are
/// unescaped); `offset`/`length` cover the raw lexeme for diagnostics.
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub text: String,
    pub offset: usize,
    pub length: usize,
    pub line: usize,
}

impl Token {
    pub fn span(&self) -> Span {
        Span::new(self.offset, self.length, self.line)
    }

    pub fn integer_value(&self) -> i64 {
        self.text.parse().unwrap_or(i64::MAX)
    }

    pub fn real_value(&self) -> f64 {
        self.text.parse().unwrap_or(0.0)
    }
}

fn keyword_kind(lower: &str) -> Option<TokenKind> {
    let kind = match lower {
        "program" => TokenKind::Program,
        "begin" => TokenKind::Begin,
        "end" => TokenKind::End,
        "label" => TokenKind::Label,
        "const" => TokenKind::Const,
        "type" => TokenKind::Type,
        "var" => TokenKind::Var,
        "array" => TokenKind::Array,
        "packed" => TokenKind::Packed,
        "set" => TokenKind::Set,
        "file" => TokenKind::File,
        "of" => TokenKind::Of,
        "record" => TokenKind::Record,
        "function" => TokenKind::Function,
        "procedure" => TokenKind::Procedure,
        "if" => TokenKind::If,
        "then" => TokenKind::Then,
        "else" => TokenKind::Else,
        "for" => TokenKind::For,
        "to" => TokenKind::To,
        "downto" => TokenKind::Downto,
        "do" => TokenKind::Do,
        "while" => TokenKind::While,
        "repeat" => TokenKind::Repeat,
        "until" => TokenKind::Until,
        "case" => TokenKind::Case,
        "goto" => TokenKind::Goto,
        "with" => TokenKind::With,
        "and" => TokenKind::And,
        "or" => TokenKind::Or,
        "not" => TokenKind::Not,
        "in" => TokenKind::In,
        "div" => TokenKind::Div,
        "mod" => TokenKind::Mod,
        "nil" => TokenKind::Nil,
        _ => return None,
    };
    Some(kind)
}

struct Lexer<'a> {
    source: &'a str,
    pos: usize,
    line: usize,
    tokens: Vec<Token>,
    /// Pending run of unrecognized characters: (offset, length, line).
    pending_error: Option<(usize, usize, usize)>,
}

impl<'a> Lexer<'a> {
    fn new(source: &'a str) -> Self {
        Lexer {
            source,
            pos: 0,
            line: 1,
            tokens: Vec::new(),
            pending_error: None,
        }
    }

    fn rest(&self) -> &'a str {
        &self.source[self.pos..]
    }

    fn peek(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn peek_at(&self, offset: usize) -> Option<char> {
        self.source.get(self.pos + offset..)?.chars().next()
    }

    fn push(&mut self, kind: TokenKind, raw_length: usize, text: impl Into<String>) {
        self.tokens.push(Token {
            kind,
            text: text.into(),
            offset: self.pos,
            length: raw_length,
            line: self.line,
        });
        self.pos += raw_length;
    }

    fn push_verbatim(&mut self, kind: TokenKind, raw_length: usize) {
        let text = self.source[self.pos..self.pos + raw_length].to_string();
        self.push(kind, raw_length, text);
    }

    fn unrecognized(&mut self, diagnostics: &mut Diagnostics) {
        let char_len = self.peek().map_or(1, char::len_utf8);
        match self.pending_error {
            Some((start, length, line)) if start + length == self.pos => {
                self.pending_error = Some((start, length + char_len, line));
            }
            Some(_) => {
                self.commit_error(diagnostics);
                self.pending_error = Some((self.pos, char_len, self.line));
            }
            None => {
                self.pending_error = Some((self.pos, char_len, self.line));
            }
        }
        self.pos += char_len;
    }

    fn commit_error(&mut self, diagnostics: &mut Diagnostics) {
        if let Some((start, length, line)) = self.pending_error.take() {
            diagnostics.error(
                "Lexer failed to recognize the following characters",
                Span::new(start, length, line),
            );
        }
    }

    /// Scan a comment body starting right after the opener. Either closer
    /// ends either opener; a nested opener or end of input aborts the match.
    /// Returns the position after the closer and the newline count.
    fn scan_comment(&self, body_start: usize) -> Option<(usize, usize)> {
        let mut i = body_start;
        let mut newlines = 0;

        while i < self.source.len() {
            let rest = &self.source[i..];
            if rest.starts_with('}') {
                return Some((i + 1, newlines));
            }
            if rest.starts_with("*)") {
                return Some((i + 2, newlines));
            }
            if rest.starts_with('{') || rest.starts_with("(*") {
                return None;
            }

            let c = rest.chars().next()?;
            if c == '\n' {
                newlines += 1;
            }
            i += c.len_utf8();
        }

        None
    }

    /// Scan a string literal starting at the opening quote. Returns the
    /// position after the closing quote, the unescaped value and the number
    /// of newlines the literal spans.
    fn scan_string(&self) -> Option<(usize, String, usize)> {
        let mut i = self.pos + 1;
        let mut value = String::new();
        let mut newlines = 0;

        while i < self.source.len() {
            let rest = &self.source[i..];
            if rest.starts_with("''") {
                value.push('\'');
                i += 2;
                continue;
            }
            if rest.starts_with('\'') {
                return Some((i + 1, value, newlines));
            }

            let c = rest.chars().next()?;
            if c == '\n' {
                newlines += 1;
            }
            value.push(c);
            i += c.len_utf8();
        }

        None
    }

    fn scan_digits(&self, mut i: usize) -> usize {
        while self
            .source
            .get(i..)
            .and_then(|s| s.chars().next())
            .is_some_and(|c| c.is_ascii_digit())
        {
            i += 1;
        }
        i
    }

    fn char_at(&self, i: usize) -> Option<char> {
        self.source.get(i..)?.chars().next()
    }

    fn lex_number(&mut self, diagnostics: &mut Diagnostics) {
        let start = self.pos;
        let int_end = self.scan_digits(start);
        let mut end = int_end;
        let mut is_real = false;

        // Fraction: '.' must be followed by a digit, so `1..5` stays
        // INTEGER RANGE INTEGER.
        if self.char_at(end) == Some('.')
            && self.char_at(end + 1).is_some_and(|c| c.is_ascii_digit())
        {
            end = self.scan_digits(end + 2);
            is_real = true;
        }

        // Exponent: 'e' with optional sign and mandatory digits.
        if matches!(self.char_at(end), Some('e' | 'E')) {
            let mut exp = end + 1;
            if matches!(self.char_at(exp), Some('+' | '-')) {
                exp += 1;
            }
            let exp_end = self.scan_digits(exp);
            if exp_end > exp {
                end = exp_end;
                is_real = true;
            }
        }

        // Word boundary: a trailing letter invalidates the match. A real
        // falls back to its integer prefix when that one has a boundary.
        if self.char_at(end).is_some_and(|c| c.is_ascii_alphabetic()) {
            if is_real && !self.char_at(int_end).is_some_and(|c| c.is_ascii_alphabetic()) {
                self.push_verbatim(TokenKind::Integer, int_end - start);
            } else {
                self.unrecognized(diagnostics);
            }
            return;
        }

        let kind = if is_real {
            TokenKind::Real
        } else {
            TokenKind::Integer
        };
        self.push_verbatim(kind, end - start);
    }

    fn lex_word(&mut self) {
        let start = self.pos;
        let mut end = start;
        while self
            .char_at(end)
            .is_some_and(|c| c.is_ascii_alphanumeric())
        {
            end += 1;
        }

        let text = &self.source[start..end];
        let kind = keyword_kind(&text.to_ascii_lowercase()).unwrap_or(TokenKind::Identifier);
        self.push_verbatim(kind, end - start);
    }

    fn run(mut self, diagnostics: &mut Diagnostics) -> Vec<Token> {
        while let Some(c) = self.peek() {
            match c {
                ' ' | '\t' | '\r' => self.pos += 1,
                '\n' => {
                    self.commit_error(diagnostics);
                    self.line += 1;
                    self.pos += 1;
                }
                '{' => match self.scan_comment(self.pos + 1) {
                    Some((end, newlines)) => {
                        self.line += newlines;
                        self.pos = end;
                    }
                    None => self.unrecognized(diagnostics),
                },
                '(' => {
                    if self.peek_at(1) == Some('*') {
                        match self.scan_comment(self.pos + 2) {
                            Some((end, newlines)) => {
                                self.line += newlines;
                                self.pos = end;
                            }
                            // No closer: fall back to the bare parenthesis.
                            None => self.push_verbatim(TokenKind::LeftParen, 1),
                        }
                    } else if self.peek_at(1) == Some('.') {
                        self.push_verbatim(TokenKind::LeftBracket, 2);
                    } else {
                        self.push_verbatim(TokenKind::LeftParen, 1);
                    }
                }
                '\'' => match self.scan_string() {
                    Some((end, value, newlines)) => {
                        let length = end - self.pos;
                        self.push(TokenKind::StringLiteral, length, value);
                        self.line += newlines;
                    }
                    None => self.unrecognized(diagnostics),
                },
                '.' => {
                    if self.peek_at(1) == Some('.') {
                        self.push_verbatim(TokenKind::Range, 2);
                    } else if self.peek_at(1) == Some(')') {
                        self.push_verbatim(TokenKind::RightBracket, 2);
                    } else {
                        self.push_verbatim(TokenKind::Period, 1);
                    }
                }
                ':' => {
                    if self.peek_at(1) == Some('=') {
                        self.push_verbatim(TokenKind::Assign, 2);
                    } else {
                        self.push_verbatim(TokenKind::Colon, 1);
                    }
                }
                '<' => match self.peek_at(1) {
                    Some('>') => self.push_verbatim(TokenKind::Different, 2),
                    Some('=') => self.push_verbatim(TokenKind::LessEqual, 2),
                    _ => self.push_verbatim(TokenKind::Less, 1),
                },
                '>' => {
                    if self.peek_at(1) == Some('=') {
                        self.push_verbatim(TokenKind::GreaterEqual, 2);
                    } else {
                        self.push_verbatim(TokenKind::Greater, 1);
                    }
                }
                ';' => self.push_verbatim(TokenKind::Semicolon, 1),
                ',' => self.push_verbatim(TokenKind::Comma, 1),
                ')' => self.push_verbatim(TokenKind::RightParen, 1),
                '=' => self.push_verbatim(TokenKind::Equal, 1),
                '+' => self.push_verbatim(TokenKind::Plus, 1),
                '-' => self.push_verbatim(TokenKind::Minus, 1),
                '*' => self.push_verbatim(TokenKind::Star, 1),
                '/' => self.push_verbatim(TokenKind::Slash, 1),
                '[' => self.push_verbatim(TokenKind::LeftBracket, 1),
                ']' => self.push_verbatim(TokenKind::RightBracket, 1),
                '^' | '@' => self.push_verbatim(TokenKind::Caret, 1),
                c if c.is_ascii_digit() => self.lex_number(diagnostics),
                c if c.is_ascii_alphabetic() => self.lex_word(),
                _ => self.unrecognized(diagnostics),
            }
        }

        self.commit_error(diagnostics);
        self.tokens
    }
}

/// Tokenize a whole source text. Lexical errors are recorded in
/// `diagnostics`; the returned tokens cover everything that could still be
/// recognized, so the parser can keep producing diagnostics of its own.
pub fn tokenize(source: &str, diagnostics: &mut Diagnostics) -> Vec<Token> {
    Lexer::new(source).run(diagnostics)
}
