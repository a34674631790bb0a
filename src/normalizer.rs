//! SQL statement shape normalization and verb classification
//!
//! Two statements that differ only in literal values, placeholder style,
//! whitespace, comments or keyword case map to the same [`StatementKey`].
//! Anything that changes the verb, the tables or the column set keeps the
//! keys distinct. The normalizer never rejects input: text it cannot make
//! sense of classifies as [`Verb::Other`] and normalizes to itself.
//!
//! # Example
//! ```
//! use querytap::normalizer::{analyze, normalize, Verb};
//!
//! let a = normalize("SELECT * FROM posts WHERE author_id = 1");
//! let b = normalize("select *\n  from posts where author_id=42");
//! assert_eq!(a, b);
//! assert_eq!(a.as_str(), "select * from posts where author_id = ?");
//!
//! let (_, verb) = analyze("UPDATE posts SET title = 'x' WHERE id = 1");
//! assert_eq!(verb, Verb::Update);
//! ```

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::LazyLock;

/// Statement verb, derived from the first significant token
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Verb {
    Select,
    Insert,
    Update,
    Delete,
    Other,
}

impl Verb {
    /// All verbs in report order
    pub const ALL: [Verb; 5] = [
        Verb::Select,
        Verb::Insert,
        Verb::Update,
        Verb::Delete,
        Verb::Other,
    ];

    /// Classify a single keyword (case-insensitive). Total: unknown words are `Other`.
    pub fn from_keyword(word: &str) -> Self {
        if word.eq_ignore_ascii_case("select") {
            Verb::Select
        } else if word.eq_ignore_ascii_case("insert") {
            Verb::Insert
        } else if word.eq_ignore_ascii_case("update") {
            Verb::Update
        } else if word.eq_ignore_ascii_case("delete") {
            Verb::Delete
        } else {
            Verb::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Verb::Select => "SELECT",
            Verb::Insert => "INSERT",
            Verb::Update => "UPDATE",
            Verb::Delete => "DELETE",
            Verb::Other => "OTHER",
        }
    }
}

impl fmt::Display for Verb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Normalized statement shape, used as the grouping identity
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct StatementKey(String);

impl StatementKey {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StatementKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// `( ? , ? , ? )` → `( ? )`
static PLACEHOLDER_LIST: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\( \?(?: , \?)+ \)").expect("placeholder list pattern is valid")
});

/// `( ? ) , ( ? ) , ( ? )` → `( ? )`
static PLACEHOLDER_TUPLES: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\( \? \)(?: , \( \? \))+").expect("placeholder tuple pattern is valid")
});

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Token<'a> {
    Word(&'a str),
    Quoted(&'a str),
    Literal,
    Placeholder,
    Punct(&'a str),
}

/// Byte-level SQL scanner. Every syntactic character it cares about is
/// ASCII, so slicing only ever happens on char boundaries.
struct Tokenizer<'a> {
    sql: &'a str,
    bytes: &'a [u8],
    pos: usize,
    prev: Option<Token<'a>>,
}

fn is_word_byte(b: u8) -> bool {
    b.is_ascii_alphanumeric() || b == b'_' || b == b'$' || b >= 0x80
}

fn is_word_start(b: u8) -> bool {
    b.is_ascii_alphabetic() || b == b'_' || b >= 0x80
}

fn is_operator_byte(b: u8) -> bool {
    matches!(b, b'<' | b'>' | b'=' | b'!' | b'|' | b'&')
}

/// Keywords after which `-1` is a signed literal rather than subtraction
const SIGN_KEYWORDS: &[&str] = &[
    "select", "where", "and", "or", "not", "in", "values", "between", "like", "is", "set",
    "when", "then", "else", "case", "limit", "offset", "having", "on", "return",
];

impl<'a> Tokenizer<'a> {
    fn new(sql: &'a str) -> Self {
        Self {
            sql,
            bytes: sql.as_bytes(),
            pos: 0,
            prev: None,
        }
    }

    fn peek(&self, offset: usize) -> Option<u8> {
        self.bytes.get(self.pos + offset).copied()
    }

    fn skip_while(&mut self, pred: impl Fn(u8) -> bool) {
        while self.peek(0).is_some_and(&pred) {
            self.pos += 1;
        }
    }

    /// Skip whitespace and comments. Unterminated block comments run to the end.
    fn skip_trivia(&mut self) {
        loop {
            match (self.peek(0), self.peek(1)) {
                (Some(b), _) if b.is_ascii_whitespace() => self.pos += 1,
                (Some(b'-'), Some(b'-')) => self.skip_while(|b| b != b'\n'),
                (Some(b'/'), Some(b'*')) => {
                    self.pos += 2;
                    while self.pos < self.bytes.len() {
                        if self.peek(0) == Some(b'*') && self.peek(1) == Some(b'/') {
                            self.pos += 2;
                            break;
                        }
                        self.pos += 1;
                    }
                }
                _ => return,
            }
        }
    }

    /// Consume a quoted run starting at the opening quote. A doubled quote
    /// is an escaped quote. Returns once past the closing quote or at end.
    fn skip_quoted(&mut self, quote: u8) {
        self.pos += 1;
        while let Some(b) = self.peek(0) {
            self.pos += 1;
            if b == quote {
                if self.peek(0) == Some(quote) {
                    self.pos += 1;
                } else {
                    return;
                }
            }
        }
    }

    /// Whether a `+`/`-` at the cursor can start a signed literal
    fn sign_allowed(&self) -> bool {
        match self.prev {
            None => true,
            Some(Token::Punct(p)) => {
                matches!(p, "(" | "," | "*" | "/" | "%" | "+" | "-")
                    || p.bytes().all(is_operator_byte)
            }
            Some(Token::Word(word)) => SIGN_KEYWORDS
                .iter()
                .any(|k| word.eq_ignore_ascii_case(k)),
            _ => false,
        }
    }

    fn skip_number(&mut self) {
        if self.peek(0) == Some(b'0') && matches!(self.peek(1), Some(b'x' | b'X')) {
            self.pos += 2;
            self.skip_while(|b| b.is_ascii_hexdigit());
            return;
        }
        self.skip_while(|b| b.is_ascii_digit());
        if self.peek(0) == Some(b'.') {
            self.pos += 1;
            self.skip_while(|b| b.is_ascii_digit());
        }
        if matches!(self.peek(0), Some(b'e' | b'E')) {
            let signed = matches!(self.peek(1), Some(b'+' | b'-'));
            let digit_at = if signed { 2 } else { 1 };
            if self.peek(digit_at).is_some_and(|b| b.is_ascii_digit()) {
                self.pos += digit_at;
                self.skip_while(|b| b.is_ascii_digit());
            }
        }
    }
}

impl<'a> Iterator for Tokenizer<'a> {
    type Item = Token<'a>;

    fn next(&mut self) -> Option<Token<'a>> {
        self.skip_trivia();
        let sql = self.sql;
        let start = self.pos;
        let b = self.peek(0)?;
        let next = self.peek(1);

        let token = match b {
            b'\'' => {
                self.skip_quoted(b'\'');
                Token::Literal
            }
            b'"' | b'`' => {
                self.skip_quoted(b);
                Token::Quoted(&sql[start..self.pos])
            }
            b if b.is_ascii_digit() => {
                self.skip_number();
                Token::Literal
            }
            b'-' | b'+' if next.is_some_and(|d| d.is_ascii_digit()) && self.sign_allowed() => {
                self.pos += 1;
                self.skip_number();
                Token::Literal
            }
            b'?' => {
                self.pos += 1;
                self.skip_while(|b| b.is_ascii_digit());
                Token::Placeholder
            }
            b'$' | b'@' if next.is_some_and(is_word_byte) => {
                self.pos += 1;
                self.skip_while(is_word_byte);
                Token::Placeholder
            }
            b':' if next == Some(b':') => {
                self.pos += 2;
                Token::Punct("::")
            }
            b':' if next.is_some_and(is_word_start) => {
                self.pos += 1;
                self.skip_while(is_word_byte);
                Token::Placeholder
            }
            b'%' if next == Some(b's') && !self.peek(2).is_some_and(is_word_byte) => {
                self.pos += 2;
                Token::Placeholder
            }
            b'%' if next == Some(b'(') => {
                // pyformat: %(name)s
                self.pos += 2;
                self.skip_while(|b| b != b')');
                if self.peek(0) == Some(b')') && self.peek(1) == Some(b's') {
                    self.pos += 2;
                    Token::Placeholder
                } else {
                    self.pos = start + 1;
                    Token::Punct("%")
                }
            }
            b if is_word_start(b) => {
                self.skip_while(is_word_byte);
                Token::Word(&sql[start..self.pos])
            }
            b if is_operator_byte(b) => {
                self.skip_while(is_operator_byte);
                Token::Punct(&sql[start..self.pos])
            }
            _ => {
                self.pos += 1;
                Token::Punct(&sql[start..self.pos])
            }
        };

        self.prev = Some(token);
        Some(token)
    }
}

fn verb_of<'a>(mut tokens: impl Iterator<Item = Token<'a>>) -> Verb {
    match tokens.find(|t| *t != Token::Punct("(")) {
        Some(Token::Word(word)) => Verb::from_keyword(word),
        _ => Verb::Other,
    }
}

fn shape_of(sql: &str, tokens: &[Token<'_>]) -> StatementKey {
    if tokens.is_empty() {
        return StatementKey(sql.to_string());
    }

    let mut shape = String::with_capacity(sql.len());
    for (i, token) in tokens.iter().enumerate() {
        if i > 0 {
            shape.push(' ');
        }
        match token {
            Token::Word(word) => shape.push_str(&word.to_lowercase()),
            Token::Quoted(text) | Token::Punct(text) => shape.push_str(text),
            Token::Literal | Token::Placeholder => shape.push('?'),
        }
    }

    let shape = PLACEHOLDER_LIST.replace_all(&shape, "( ? )");
    let shape = PLACEHOLDER_TUPLES.replace_all(&shape, "( ? )");
    StatementKey(shape.into_owned())
}

/// Canonicalize SQL text into its grouping key
pub fn normalize(sql: &str) -> StatementKey {
    let tokens: Vec<Token<'_>> = Tokenizer::new(sql).collect();
    shape_of(sql, &tokens)
}

/// Classify SQL text by its first significant token
pub fn classify(sql: &str) -> Verb {
    verb_of(Tokenizer::new(sql))
}

/// Normalize and classify in a single scan
pub fn analyze(sql: &str) -> (StatementKey, Verb) {
    let tokens: Vec<Token<'_>> = Tokenizer::new(sql).collect();
    let verb = verb_of(tokens.iter().copied());
    (shape_of(sql, &tokens), verb)
}
