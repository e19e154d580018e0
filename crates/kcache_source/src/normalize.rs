//! Token-level normalization of kernel source fragments.
//!
//! Fragments are hashed over their token stream rather than raw bytes.
//! Comments, blank lines, spacing inside a line, line breaks inside brackets
//! and a uniform re-indentation of the whole fragment are dropped. Block
//! structure is kept as explicit `Newline`/`Indent`/`Dedent` tokens, so an
//! indentation change that moves a statement into or out of a block still
//! changes the digest.
//!
//! ```text
//! def f(x):          Ident(def) Ident(f) Op(() Ident(x) Op()) Op(:) Newline
//!     return x + 1   Indent Ident(return) Ident(x) Op(+) Number(1) Newline
//!                    Dedent
//! ```

use kcache_common::{ContentHash, ContentHasher};

/// The kind of a normalized token.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TokenKind {
    /// An identifier or keyword.
    Ident,
    /// A numeric literal, kept verbatim.
    Number,
    /// A string literal including its quotes.
    Str,
    /// An operator or delimiter.
    Op,
    /// End of a logical line.
    Newline,
    /// Start of a deeper block.
    Indent,
    /// End of a block.
    Dedent,
}

impl TokenKind {
    /// Single-byte tag written into fragment digests.
    fn tag(self) -> u8 {
        match self {
            TokenKind::Ident => b'i',
            TokenKind::Number => b'n',
            TokenKind::Str => b's',
            TokenKind::Op => b'o',
            TokenKind::Newline => b'\n',
            TokenKind::Indent => b'>',
            TokenKind::Dedent => b'<',
        }
    }
}

/// A token borrowed from the fragment text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    /// What the token is.
    pub kind: TokenKind,
    /// The token text; empty for structure tokens.
    pub text: &'a str,
    /// 1-indexed line within the fragment where the token starts.
    pub line: u32,
}

impl<'a> Token<'a> {
    fn new(kind: TokenKind, text: &'a str, line: u32) -> Self {
        Self { kind, text, line }
    }

    /// Returns `true` if this is the operator `op`.
    pub fn is_op(&self, op: &str) -> bool {
        self.kind == TokenKind::Op && self.text == op
    }

    /// Returns `true` if this is the identifier or keyword `name`.
    pub fn is_ident(&self, name: &str) -> bool {
        self.kind == TokenKind::Ident && self.text == name
    }
}

const THREE_CHAR_OPS: &[&str] = &["**=", "//=", ">>=", "<<=", "..."];
const TWO_CHAR_OPS: &[&str] = &[
    "**", "//", "==", "!=", "<=", ">=", "+=", "-=", "*=", "/=", "%=", "&=", "|=", "^=", "->",
    "<<", ">>", ":=", "@=",
];

/// Splits `src` into normalized tokens.
///
/// Never fails: bytes that fit no other class become single-character
/// operator tokens, and an unterminated string runs to the end of its line.
pub fn tokenize(src: &str) -> Vec<Token<'_>> {
    Lexer::new(src).run()
}

/// Digest of the normalized token stream of a fragment.
///
/// This is the hash stored for every visited callable and recomputed by
/// side-cache validation, so both sides must go through this function.
pub fn fragment_digest(src: &str) -> ContentHash {
    let mut hasher = ContentHasher::new();
    for token in tokenize(src) {
        hasher.update(&[token.kind.tag()]);
        hasher.update_str(token.text);
    }
    hasher.finish()
}

struct Lexer<'a> {
    src: &'a str,
    bytes: &'a [u8],
    pos: usize,
    line: u32,
    depth: usize,
    indents: Vec<usize>,
    line_has_tokens: bool,
    tokens: Vec<Token<'a>>,
}

impl<'a> Lexer<'a> {
    fn new(src: &'a str) -> Self {
        Self {
            src,
            bytes: src.as_bytes(),
            pos: 0,
            line: 1,
            depth: 0,
            indents: Vec::new(),
            line_has_tokens: false,
            tokens: Vec::new(),
        }
    }

    fn run(mut self) -> Vec<Token<'a>> {
        let mut at_line_start = true;
        while self.pos < self.bytes.len() {
            if at_line_start && self.depth == 0 {
                if !self.begin_logical_line() {
                    continue;
                }
                at_line_start = false;
            }
            let b = self.bytes[self.pos];
            match b {
                b'\n' => {
                    self.pos += 1;
                    self.line += 1;
                    if self.depth == 0 {
                        self.end_logical_line();
                        at_line_start = true;
                    }
                }
                b'\\' if self.peek(1) == Some(b'\n') => {
                    self.pos += 2;
                    self.line += 1;
                }
                b' ' | b'\t' | b'\r' | b'\x0c' => self.pos += 1,
                b'#' => self.skip_comment(),
                b'"' | b'\'' => self.string(b),
                b'0'..=b'9' => self.number(),
                b'.' if self.peek(1).is_some_and(|c| c.is_ascii_digit()) => self.number(),
                _ if is_ident_start(b) => self.ident(),
                _ => self.operator(),
            }
        }
        self.end_logical_line();
        let line = self.line;
        while self.indents.len() > 1 {
            self.indents.pop();
            self.tokens.push(Token::new(TokenKind::Dedent, "", line));
        }
        self.tokens
    }

    /// Measures indentation of the line at `pos`. Returns `false` (after
    /// consuming the line) if it is blank or comment-only.
    fn begin_logical_line(&mut self) -> bool {
        let mut col = 0usize;
        let mut p = self.pos;
        while p < self.bytes.len() {
            match self.bytes[p] {
                b' ' => col += 1,
                b'\t' => col = (col / 8 + 1) * 8,
                b'\x0c' | b'\r' => {}
                _ => break,
            }
            p += 1;
        }
        match self.bytes.get(p) {
            None | Some(b'\n') | Some(b'#') => {
                self.pos = p;
                self.skip_comment();
                if self.pos < self.bytes.len() {
                    self.pos += 1;
                    self.line += 1;
                }
                false
            }
            Some(_) => {
                self.pos = p;
                self.indent_to(col);
                true
            }
        }
    }

    fn indent_to(&mut self, col: usize) {
        let line = self.line;
        let Some(&top) = self.indents.last() else {
            // The first logical line sets the base column of the fragment.
            self.indents.push(col);
            return;
        };
        if col > top {
            self.indents.push(col);
            self.tokens.push(Token::new(TokenKind::Indent, "", line));
            return;
        }
        while self.indents.len() > 1 && self.indents.last().is_some_and(|&t| t > col) {
            self.indents.pop();
            self.tokens.push(Token::new(TokenKind::Dedent, "", line));
        }
        if self.indents.last().is_some_and(|&t| t < col) {
            self.indents.push(col);
            self.tokens.push(Token::new(TokenKind::Indent, "", line));
        }
    }

    fn end_logical_line(&mut self) {
        if self.line_has_tokens {
            let line = self.line;
            self.tokens.push(Token::new(TokenKind::Newline, "", line));
            self.line_has_tokens = false;
        }
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn push(&mut self, kind: TokenKind, start: usize) {
        let text = &self.src[start..self.pos];
        let line = self.line;
        self.tokens.push(Token::new(kind, text, line));
        self.line_has_tokens = true;
    }

    fn skip_comment(&mut self) {
        while self.pos < self.bytes.len() && self.bytes[self.pos] != b'\n' {
            self.pos += 1;
        }
    }

    fn ident(&mut self) {
        let start = self.pos;
        while self.pos < self.bytes.len() && is_ident_continue(self.bytes[self.pos]) {
            self.pos += 1;
        }
        self.push(TokenKind::Ident, start);
    }

    fn number(&mut self) {
        let start = self.pos;
        while self.pos < self.bytes.len() {
            let b = self.bytes[self.pos];
            let exponent_sign = (b == b'+' || b == b'-')
                && matches!(self.bytes[self.pos - 1], b'e' | b'E')
                && !self.src[start..self.pos].starts_with("0x");
            if b.is_ascii_alphanumeric() || b == b'.' || b == b'_' || exponent_sign {
                self.pos += 1;
            } else {
                break;
            }
        }
        self.push(TokenKind::Number, start);
    }

    fn string(&mut self, quote: u8) {
        let start = self.pos;
        let line = self.line;
        let triple = self.peek(1) == Some(quote) && self.peek(2) == Some(quote);
        if triple {
            self.pos += 3;
            while self.pos < self.bytes.len() {
                match self.bytes[self.pos] {
                    b'\\' => self.pos += 2,
                    b'\n' => {
                        self.line += 1;
                        self.pos += 1;
                    }
                    b if b == quote && self.peek(1) == Some(quote) && self.peek(2) == Some(quote) => {
                        self.pos += 3;
                        break;
                    }
                    _ => self.pos += 1,
                }
            }
        } else {
            self.pos += 1;
            while self.pos < self.bytes.len() {
                match self.bytes[self.pos] {
                    b'\\' if self.peek(1).is_some_and(|c| c != b'\n') => self.pos += 2,
                    b'\n' => break,
                    b if b == quote => {
                        self.pos += 1;
                        break;
                    }
                    _ => self.pos += 1,
                }
            }
        }
        self.pos = self.pos.min(self.bytes.len());
        let text = &self.src[start..self.pos];
        self.tokens.push(Token::new(TokenKind::Str, text, line));
        self.line_has_tokens = true;
    }

    fn operator(&mut self) {
        let start = self.pos;
        let rest = &self.src[start..];
        let len = THREE_CHAR_OPS
            .iter()
            .chain(TWO_CHAR_OPS)
            .find(|op| rest.starts_with(**op))
            .map_or_else(|| rest.chars().next().map_or(1, char::len_utf8), |op| op.len());
        match self.bytes[start] {
            b'(' | b'[' | b'{' => self.depth += 1,
            b')' | b']' | b'}' => self.depth = self.depth.saturating_sub(1),
            _ => {}
        }
        self.pos += len;
        self.push(TokenKind::Op, start);
    }
}

fn is_ident_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

fn is_ident_continue(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b >= 0x80
}
