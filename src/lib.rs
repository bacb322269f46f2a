//! zeta - a small Lisp with a tail-call-safe evaluator
//!
//! This crate reads s-expression programs, turns them into [`ast::Value`]
//! trees and evaluates them against a chain of shared lexical scopes.
//!
//! ```text
//! ;; definitions and tail recursion
//! (define (count-down n) (if (= n 0) 'done (count-down (- n 1))))
//! (count-down 100000)          ; => DONE, in constant native stack
//!
//! ;; quoting and list data
//! (cons 1 '(2 3))              ; => (1 2 3)
//! (let ((x 2) (y 3)) (+ x y))  ; => 5
//! ```
//!
//! ## Semantics
//!
//! - Symbols are case-insensitive: the reader upper-cases them.
//! - `#f` and the empty list (`nil`, `()`) are false; every other value is true.
//! - Closures capture their defining scope by reference, so later `define`s
//!   in that scope are visible to them.
//! - Calls in tail position (`if`, `cond`, `begin`, `let` bodies and closure
//!   bodies) run in a loop and do not grow the native stack.
//!
//! ## Modules
//!
//! - `lexer`: characters to tokens, with bracket tracking
//! - `reader`: tokens to expressions, single-form and streaming entry points
//! - `ast`: the expression/value model and its printer
//! - `evaluator`: environments, special forms and the trampoline
//! - `builtinops`: the registry of native operations

use std::fmt;

/// Maximum nesting depth accepted by the reader
pub const MAX_PARSE_DEPTH: usize = 10_000;

/// Maximum depth of non-tail evaluation (argument evaluation, nested forms).
/// Tail calls do not count towards this limit.
pub const MAX_EVAL_DEPTH: usize = 10_000;

/// Categorizes the different kinds of parsing errors.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ParseErrorKind {
    /// Invalid or unexpected syntax (stray closers, mismatched brackets)
    InvalidSyntax,
    /// Input ended before the expression was complete (unterminated string or expression)
    Incomplete,
    /// Expression nesting exceeded [`MAX_PARSE_DEPTH`]
    TooDeeplyNested,
    /// Extra input found after a complete expression
    TrailingContent,
    /// Implementation-imposed limit exceeded (integer literal out of range)
    ImplementationLimit,
}

/// A structured error providing detailed information about a parsing failure.
#[derive(Debug, PartialEq, Clone)]
pub struct ParseError {
    pub kind: ParseErrorKind,
    pub message: String,
    /// Context snippet from the input showing where the error occurred (max 100 chars)
    pub context: Option<String>,
    /// The problematic token or character encountered, if identifiable
    pub found: Option<String>,
}

impl ParseError {
    pub fn new(
        kind: ParseErrorKind,
        message: impl Into<String>,
        context: Option<String>,
        found: Option<String>,
    ) -> Self {
        ParseError {
            kind,
            message: message.into(),
            context,
            found,
        }
    }

    /// Create a ParseError with a kind and message but no context
    pub fn from_message(kind: ParseErrorKind, message: impl Into<String>) -> Self {
        Self::new(kind, message, None, None)
    }

    /// Create a ParseError with context extracted from input at a given byte offset
    pub fn with_context(
        kind: ParseErrorKind,
        message: impl Into<String>,
        input: &str,
        error_offset: usize,
        found: Option<String>,
    ) -> Self {
        const MAX_CONTEXT: usize = 100;

        let offset = error_offset.min(input.len());
        let prefix_chars = input
            .get(..offset)
            .map_or(0, |prefix| prefix.chars().count());
        let context_start = prefix_chars.saturating_sub(20);

        let context_str: String = input
            .chars()
            .skip(context_start)
            .take(MAX_CONTEXT)
            .collect();

        let mut display_context = String::new();
        if context_start > 0 {
            display_context.push_str("[...]");
        }
        display_context.push_str(context_str.trim_end_matches(['\n', '\r']));
        if context_start + context_str.chars().count() < input.chars().count() {
            display_context.push_str("[...]");
        }

        let display_context = display_context.replace('\n', "\\n").replace('\r', "");

        Self::new(kind, message, Some(display_context), found)
    }
}

impl fmt::Display for ParseError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)?;
        if let Some(found) = &self.found {
            write!(f, "\nFound: {found}")?;
        }
        if let Some(context) = &self.context {
            write!(f, "\nContext: {context}")?;
        }
        Ok(())
    }
}

impl From<ParseError> for Error {
    fn from(error: ParseError) -> Self {
        Error::ParseError(error)
    }
}

/// Error types for the interpreter.
///
/// Every variant displays as `Kind: message`, which is what the front end prints.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum Error {
    #[error("ParseError: {0}")]
    ParseError(ParseError),
    #[error("UnboundSymbolError: {0}")]
    UnboundSymbol(String),
    #[error("ArityError: {}", arity_message(.expected, .got, .expression))]
    ArityError {
        expected: usize,
        got: usize,
        expression: Option<String>,
    },
    #[error("TypeError: {0}")]
    TypeError(String),
    #[error("NotApplicableError: cannot apply '{0}'")]
    NotApplicable(String),
    #[error("UserError: {0}")]
    UserError(String),
    #[error("DomainError: {0}")]
    DomainError(String),
    #[error("IOError: {path}: {message}")]
    IoError { path: String, message: String },
    #[error("RecursionError: evaluation depth limit exceeded (max: {limit})")]
    RecursionError { limit: usize },
}

fn arity_message(expected: &usize, got: &usize, expression: &Option<String>) -> String {
    match expression {
        Some(expr) => format!("{expr}: expected {expected} arguments, got {got}"),
        None => format!("expected {expected} arguments but got {got}"),
    }
}

impl Error {
    /// Create an ArityError without expression context
    pub fn arity_error(expected: usize, got: usize) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: None,
        }
    }

    /// Create an ArityError naming the offending expression
    pub fn arity_error_with_expr(expected: usize, got: usize, expression: String) -> Self {
        Error::ArityError {
            expected,
            got,
            expression: Some(expression),
        }
    }

    /// An I/O failure on `path`
    pub fn io(path: impl Into<String>, error: &std::io::Error) -> Self {
        Error::IoError {
            path: path.into(),
            message: error.to_string(),
        }
    }

    /// The error kind as printed before the message
    pub fn kind(&self) -> &'static str {
        match self {
            Error::ParseError(_) => "ParseError",
            Error::UnboundSymbol(_) => "UnboundSymbolError",
            Error::ArityError { .. } => "ArityError",
            Error::TypeError(_) => "TypeError",
            Error::NotApplicable(_) => "NotApplicableError",
            Error::UserError(_) => "UserError",
            Error::DomainError(_) => "DomainError",
            Error::IoError { .. } => "IOError",
            Error::RecursionError { .. } => "RecursionError",
        }
    }

    /// True for an interactive-mode parse that ran out of input mid-form
    pub fn is_incomplete(&self) -> bool {
        matches!(self, Error::ParseError(e) if e.kind == ParseErrorKind::Incomplete)
    }
}

pub mod ast;
pub mod builtinops;
pub mod evaluator;
pub mod lexer;
pub mod reader;
pub mod stack;

pub use ast::{Symbol, Value};
pub use evaluator::{Environment, eval};
pub use reader::{read_expression, read_program};
