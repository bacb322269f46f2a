//! Tokenizer for zeta source text.
//!
//! The lexer works on one chunk of text at a time (a whole file, or a single
//! line at the REPL) and can be refilled with [`Lexer::feed`] without losing
//! track of which brackets are still open. Bare words are classified with
//! `nom` recognizers: `nil`, `#t` and `#f` in any case, integers, reals, and
//! everything else as an upper-cased symbol.

use nom::{
    IResult, Parser,
    branch::alt,
    bytes::complete::tag_no_case,
    character::complete::{char, digit0, digit1, one_of},
    combinator::{opt, recognize, value},
};
use std::collections::VecDeque;

use crate::ast::{NumberType, Symbol};
use crate::{Error, ParseError, ParseErrorKind};

/// Characters allowed in symbols besides alphanumerics
const SYMBOL_SPECIAL_CHARS: &str = "-./_~:*+=!<>?&^%@$|";

/// Closes every open bracket at once in line-continuation mode
pub const FORCE_CLOSE: char = '\\';

/// The three interchangeable bracket spellings
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Bracket {
    Paren,
    Square,
    Curly,
}

impl Bracket {
    fn from_open(c: char) -> Option<Self> {
        match c {
            '(' => Some(Bracket::Paren),
            '[' => Some(Bracket::Square),
            '{' => Some(Bracket::Curly),
            _ => None,
        }
    }

    fn from_close(c: char) -> Option<Self> {
        match c {
            ')' => Some(Bracket::Paren),
            ']' => Some(Bracket::Square),
            '}' => Some(Bracket::Curly),
            _ => None,
        }
    }

    pub fn open_char(self) -> char {
        match self {
            Bracket::Paren => '(',
            Bracket::Square => '[',
            Bracket::Curly => '{',
        }
    }

    pub fn close_char(self) -> char {
        match self {
            Bracket::Paren => ')',
            Bracket::Square => ']',
            Bracket::Curly => '}',
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum TokenKind {
    Open(Bracket),
    Close(Bracket),
    Quote,
    Int(NumberType),
    Float(f64),
    Str(String),
    Symbol(Symbol),
    Nil,
    True,
    False,
    /// End of the current chunk; the lexer can be fed more text afterwards
    EndOfInput,
}

/// A token and the byte offset in its chunk where it starts
#[derive(Debug, Clone, PartialEq)]
pub struct Token {
    pub kind: TokenKind,
    pub offset: usize,
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LexerConfig {
    /// Character that closes all open brackets, if any
    pub force_close: Option<char>,
}

impl LexerConfig {
    /// Configuration for line-at-a-time input, with [`FORCE_CLOSE`] enabled
    pub fn interactive() -> Self {
        LexerConfig {
            force_close: Some(FORCE_CLOSE),
        }
    }
}

#[derive(Debug, Default)]
pub struct Lexer {
    config: LexerConfig,
    text: String,
    pos: usize,
    open: Vec<Bracket>,
    pending: VecDeque<Token>,
}

fn keyword(input: &str) -> IResult<&str, TokenKind> {
    alt((
        value(TokenKind::Nil, tag_no_case("nil")),
        value(TokenKind::True, tag_no_case("#t")),
        value(TokenKind::False, tag_no_case("#f")),
    ))
    .parse(input)
}

fn integer_literal(input: &str) -> IResult<&str, &str> {
    recognize((opt(one_of("+-")), digit1)).parse(input)
}

fn real_literal(input: &str) -> IResult<&str, &str> {
    recognize((
        opt(one_of("+-")),
        digit1,
        char('.'),
        digit0,
        opt((one_of("eE"), opt(one_of("+-")), digit1)),
    ))
    .parse(input)
}

fn is_symbol_char(c: char) -> bool {
    c.is_alphanumeric() || SYMBOL_SPECIAL_CHARS.contains(c)
}

impl Lexer {
    pub fn new(config: LexerConfig) -> Self {
        Lexer {
            config,
            ..Lexer::default()
        }
    }

    /// A lexer over a single chunk of text
    pub fn from_text(text: impl Into<String>, config: LexerConfig) -> Self {
        let mut lexer = Lexer::new(config);
        lexer.feed(text);
        lexer
    }

    /// Replace the current chunk with the next one. Open brackets carry over.
    pub fn feed(&mut self, text: impl Into<String>) {
        self.text = text.into();
        self.pos = 0;
    }

    /// Number of brackets opened and not yet closed
    pub fn open_depth(&self) -> usize {
        self.open.len()
    }

    /// Drop the rest of the current chunk
    pub fn clear_line(&mut self) {
        self.pos = self.text.len();
        self.pending.clear();
    }

    /// Drop the rest of the current chunk and forget all open brackets
    pub fn reset(&mut self) {
        self.clear_line();
        self.open.clear();
    }

    /// Build a parse error pointing into the current chunk
    pub(crate) fn error_at(
        &self,
        kind: ParseErrorKind,
        message: impl Into<String>,
        offset: usize,
        found: Option<String>,
    ) -> Error {
        ParseError::with_context(kind, message, &self.text, offset, found).into()
    }

    fn rest(&self) -> &str {
        self.text.get(self.pos..).unwrap_or_default()
    }

    fn peek_char(&self) -> Option<char> {
        self.rest().chars().next()
    }

    fn skip_whitespace_and_comments(&mut self) {
        while let Some(c) = self.peek_char() {
            if c.is_whitespace() {
                self.pos += c.len_utf8();
            } else if c == ';' {
                let rest = self.rest();
                self.pos += rest.find('\n').unwrap_or(rest.len());
            } else {
                break;
            }
        }
    }

    fn is_delimiter(&self, c: char) -> bool {
        c.is_whitespace()
            || matches!(c, '(' | ')' | '[' | ']' | '{' | '}' | '\'' | '"' | ';')
            || self.config.force_close == Some(c)
    }

    /// Produce the next token. At the end of the chunk this keeps returning
    /// [`TokenKind::EndOfInput`] until more text is fed.
    pub fn next_token(&mut self) -> Result<Token, Error> {
        loop {
            if let Some(token) = self.pending.pop_front() {
                return Ok(token);
            }

            self.skip_whitespace_and_comments();
            let offset = self.pos;
            let Some(c) = self.peek_char() else {
                return Ok(Token {
                    kind: TokenKind::EndOfInput,
                    offset,
                });
            };

            if self.config.force_close == Some(c) {
                self.pos += c.len_utf8();
                while let Some(bracket) = self.open.pop() {
                    self.pending.push_back(Token {
                        kind: TokenKind::Close(bracket),
                        offset,
                    });
                }
                continue;
            }

            let kind = if let Some(bracket) = Bracket::from_open(c) {
                self.pos += 1;
                self.open.push(bracket);
                TokenKind::Open(bracket)
            } else if let Some(bracket) = Bracket::from_close(c) {
                self.pos += 1;
                self.open.pop();
                TokenKind::Close(bracket)
            } else if c == '\'' {
                self.pos += 1;
                TokenKind::Quote
            } else if c == '"' {
                self.read_string(offset)?
            } else {
                self.read_word(offset)?
            };
            return Ok(Token { kind, offset });
        }
    }

    fn read_string(&mut self, offset: usize) -> Result<TokenKind, Error> {
        let body = &self.text[offset + 1..];
        // A string closes on the line it opens
        match body.find(['"', '\n']).filter(|&end| body[end..].starts_with('"')) {
            Some(end) => {
                let contents = body[..end].to_owned();
                self.pos = offset + 1 + end + 1;
                Ok(TokenKind::Str(contents))
            }
            None => {
                let error = self.error_at(
                    ParseErrorKind::Incomplete,
                    "unterminated string",
                    offset,
                    None,
                );
                self.pos = self.text.len();
                Err(error)
            }
        }
    }

    fn read_word(&mut self, offset: usize) -> Result<TokenKind, Error> {
        let rest = self.rest();
        let len = rest
            .char_indices()
            .find(|&(_, c)| self.is_delimiter(c))
            .map_or(rest.len(), |(i, _)| i);
        let word = rest[..len].to_owned();
        let word = word.as_str();
        self.pos += len;

        if let Ok(("", kind)) = keyword(word) {
            return Ok(kind);
        }
        if let Ok(("", digits)) = integer_literal(word) {
            return digits.parse::<NumberType>().map(TokenKind::Int).map_err(|_| {
                self.error_at(
                    ParseErrorKind::ImplementationLimit,
                    "integer literal out of range",
                    offset,
                    Some(word.to_owned()),
                )
            });
        }
        if let Ok(("", _)) = real_literal(word)
            && let Ok(r) = word.parse::<f64>()
        {
            return Ok(TokenKind::Float(r));
        }
        if word.chars().all(is_symbol_char) {
            return Ok(TokenKind::Symbol(Symbol::new(word)));
        }
        Err(self.error_at(
            ParseErrorKind::InvalidSyntax,
            "invalid symbol",
            offset,
            Some(word.to_owned()),
        ))
    }
}

impl Iterator for Lexer {
    type Item = Result<Token, Error>;

    fn next(&mut self) -> Option<Self::Item> {
        match self.next_token() {
            Ok(Token {
                kind: TokenKind::EndOfInput,
                ..
            }) => None,
            other => Some(other),
        }
    }
}
