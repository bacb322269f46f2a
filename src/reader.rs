//! Recursive-descent reader turning tokens into [`Value`] trees.
//!
//! Grammar:
//!
//! ```text
//! s-expr := atom | OPEN s-expr* CLOSE | QUOTE s-expr
//! ```
//!
//! `'x` reads as `(QUOTE x)`. Any of `()`, `[]` and `{}` delimit a list, but a
//! list must be closed with the kind of bracket that opened it.
//!
//! A [`Reader`] pulls text from a [`LineSource`] as it needs it, so one form
//! can span many lines and one line can hold many forms. In
//! [`ReadMode::Interactive`] every form starts on a fresh line, a line that
//! ends inside a form asks the source for a continuation, and the
//! force-close character `\` closes all open brackets.

use std::io::BufRead;

use crate::ast::{Symbol, Value, nil};
use crate::lexer::{Bracket, Lexer, LexerConfig, Token, TokenKind};
use crate::stack::ensure_sufficient_stack;
use crate::{Error, MAX_PARSE_DEPTH, ParseError, ParseErrorKind};

/// Supplies successive chunks of program text to a [`Reader`].
pub trait LineSource {
    /// Return the next chunk, or `None` when the source is exhausted.
    /// `continuation` is true when the reader is in the middle of a form.
    fn next_line(&mut self, continuation: bool) -> Result<Option<String>, Error>;
}

/// A source holding a single chunk of text
pub struct StrSource {
    text: Option<String>,
}

impl StrSource {
    pub fn new(text: impl Into<String>) -> Self {
        StrSource {
            text: Some(text.into()),
        }
    }
}

impl LineSource for StrSource {
    fn next_line(&mut self, _continuation: bool) -> Result<Option<String>, Error> {
        Ok(self.text.take())
    }
}

/// Line-by-line source over any buffered reader, e.g. stdin
pub struct BufReadSource<R> {
    reader: R,
    name: String,
}

impl<R: BufRead> BufReadSource<R> {
    /// `name` identifies the input in I/O errors
    pub fn new(reader: R, name: impl Into<String>) -> Self {
        BufReadSource {
            reader,
            name: name.into(),
        }
    }
}

impl<R: BufRead> LineSource for BufReadSource<R> {
    fn next_line(&mut self, _continuation: bool) -> Result<Option<String>, Error> {
        let mut line = String::new();
        match self.reader.read_line(&mut line) {
            Ok(0) => Ok(None),
            Ok(_) => Ok(Some(line)),
            Err(e) => Err(Error::io(self.name.as_str(), &e)),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadMode {
    /// Files and piped input: forms may share lines, running out of input
    /// inside a form is an error
    Stream,
    /// Line-continuation input for the REPL
    Interactive,
}

pub struct Reader<S> {
    source: S,
    lexer: Lexer,
    mode: ReadMode,
    /// Lists and quotes currently being read, for the nesting limit
    nesting: usize,
    /// True between the first token of a form and its end
    mid_form: bool,
    exhausted: bool,
}

impl<S: LineSource> Reader<S> {
    pub fn new(source: S, mode: ReadMode) -> Self {
        let config = match mode {
            ReadMode::Stream => LexerConfig::default(),
            ReadMode::Interactive => LexerConfig::interactive(),
        };
        Reader {
            source,
            lexer: Lexer::new(config),
            mode,
            nesting: 0,
            mid_form: false,
            exhausted: false,
        }
    }

    /// Number of currently open brackets
    pub fn depth(&self) -> usize {
        self.lexer.open_depth()
    }

    /// Read the next complete form.
    ///
    /// Returns `Ok(None)` once the source is exhausted. In interactive mode
    /// that includes running out of input in the middle of a form. After an
    /// error the rest of the current line and all bracket state are dropped,
    /// so the next call starts fresh.
    pub fn read(&mut self) -> Result<Option<Value>, Error> {
        self.mid_form = false;
        match self.read_top() {
            Ok(form) => Ok(form),
            Err(e) => {
                self.mid_form = false;
                self.nesting = 0;
                self.lexer.reset();
                if e.is_incomplete() && self.exhausted && self.mode == ReadMode::Interactive {
                    Ok(None)
                } else {
                    Err(e)
                }
            }
        }
    }

    fn read_top(&mut self) -> Result<Option<Value>, Error> {
        let Some(token) = self.next_token()? else {
            return Ok(None);
        };
        self.mid_form = true;
        let form = self.parse_form(token)?;
        self.mid_form = false;

        if self.mode == ReadMode::Interactive {
            let next = self.lexer.next_token()?;
            if next.kind != TokenKind::EndOfInput {
                return Err(self.lexer.error_at(
                    ParseErrorKind::TrailingContent,
                    "unexpected content after expression",
                    next.offset,
                    None,
                ));
            }
        }
        Ok(Some(form))
    }

    /// Next token, pulling more text from the source at the end of each chunk
    fn next_token(&mut self) -> Result<Option<Token>, Error> {
        loop {
            let token = self.lexer.next_token()?;
            if token.kind != TokenKind::EndOfInput {
                return Ok(Some(token));
            }
            if self.exhausted {
                return self.end_of_source();
            }
            match self.source.next_line(self.mid_form)? {
                Some(line) => self.lexer.feed(line),
                None => {
                    self.exhausted = true;
                    return self.end_of_source();
                }
            }
        }
    }

    fn end_of_source(&self) -> Result<Option<Token>, Error> {
        if self.mid_form {
            Err(ParseError::from_message(ParseErrorKind::Incomplete, "unterminated expression").into())
        } else {
            Ok(None)
        }
    }

    /// Next token inside a form, where running out of input is an error
    fn expect_token(&mut self) -> Result<Token, Error> {
        match self.next_token()? {
            Some(token) => Ok(token),
            None => Err(
                ParseError::from_message(ParseErrorKind::Incomplete, "unterminated expression")
                    .into(),
            ),
        }
    }

    fn parse_form(&mut self, token: Token) -> Result<Value, Error> {
        ensure_sufficient_stack(|| match token.kind {
            TokenKind::Open(bracket) => self.nested(token.offset, |reader| {
                reader.parse_list(bracket)
            }),
            TokenKind::Close(bracket) => Err(self.lexer.error_at(
                ParseErrorKind::InvalidSyntax,
                format!("Expression cannot begin with '{}'", bracket.close_char()),
                token.offset,
                Some(bracket.close_char().to_string()),
            )),
            TokenKind::Quote => self.nested(token.offset, |reader| {
                let next = reader.expect_token()?;
                let quoted = reader.parse_form(next)?;
                Ok(Value::List(vec![Value::Symbol(Symbol::new("QUOTE")), quoted]))
            }),
            TokenKind::Int(n) => Ok(Value::Integer(n)),
            TokenKind::Float(r) => Ok(Value::Real(r)),
            TokenKind::Str(s) => Ok(Value::String(s)),
            TokenKind::Symbol(s) => Ok(Value::Symbol(s)),
            TokenKind::Nil => Ok(nil()),
            TokenKind::True => Ok(Value::Bool(true)),
            TokenKind::False => Ok(Value::Bool(false)),
            TokenKind::EndOfInput => Err(ParseError::from_message(
                ParseErrorKind::Incomplete,
                "unexpected end of input",
            )
            .into()),
        })
    }

    /// Run `f` one nesting level deeper, enforcing [`MAX_PARSE_DEPTH`]
    fn nested(
        &mut self,
        offset: usize,
        f: impl FnOnce(&mut Self) -> Result<Value, Error>,
    ) -> Result<Value, Error> {
        if self.nesting + 1 >= MAX_PARSE_DEPTH {
            return Err(self.lexer.error_at(
                ParseErrorKind::TooDeeplyNested,
                format!("Expression too deeply nested (max depth: {MAX_PARSE_DEPTH})"),
                offset,
                None,
            ));
        }
        self.nesting += 1;
        let result = f(self);
        self.nesting -= 1;
        result
    }

    fn parse_list(&mut self, open: Bracket) -> Result<Value, Error> {
        let mut elements = Vec::new();
        loop {
            let token = self.expect_token()?;
            match token.kind {
                TokenKind::Close(close) if close == open => return Ok(Value::List(elements)),
                TokenKind::Close(close) => {
                    return Err(self.lexer.error_at(
                        ParseErrorKind::InvalidSyntax,
                        format!("expected '{}'", open.close_char()),
                        token.offset,
                        Some(close.close_char().to_string()),
                    ));
                }
                _ => elements.push(self.parse_form(token)?),
            }
        }
    }
}

/// Read exactly one expression from `input`. Anything after it is an error.
pub fn read_expression(input: &str) -> Result<Value, Error> {
    let mut reader = Reader::new(StrSource::new(input), ReadMode::Stream);
    let Some(value) = reader.read()? else {
        return Err(ParseError::from_message(ParseErrorKind::Incomplete, "empty input").into());
    };
    if let Some(extra) = reader.next_token()? {
        return Err(reader.lexer.error_at(
            ParseErrorKind::TrailingContent,
            "unexpected content after expression",
            extra.offset,
            None,
        ));
    }
    Ok(value)
}

/// Read every expression in `input`
pub fn read_program(input: &str) -> Result<Vec<Value>, Error> {
    let mut reader = Reader::new(StrSource::new(input), ReadMode::Stream);
    let mut forms = Vec::new();
    while let Some(form) = reader.read()? {
        forms.push(form);
    }
    Ok(forms)
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{sym, val};
    use pretty_assertions::assert_eq;
    use proptest::prelude::*;

    /// Test result variants for parsing tests
    #[derive(Debug)]
    enum ParseTestResult {
        Success(Value),                           // Parsing should succeed with this value
        SpecificError(ParseErrorKind, &'static str), // Parsing should fail with this kind and message text
    }
    use ParseTestResult::*;

    fn success<T: Into<Value>>(value: T) -> ParseTestResult {
        Success(value.into())
    }

    fn quoted(value: Value) -> Value {
        val(vec![sym("quote"), value])
    }

    /// Run parse tests with round-trip validation of every success
    fn run_parse_tests(test_cases: Vec<(&str, ParseTestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let test_id = format!("Parse test #{} ({input:?})", i + 1);
            let result = read_expression(input);

            match (result, expected) {
                (Ok(actual), Success(expected_val)) => {
                    assert_eq!(actual, *expected_val, "{test_id}: value mismatch");

                    let displayed = format!("{actual}");
                    let reparsed = read_expression(&displayed).unwrap_or_else(|e| {
                        panic!("{test_id}: round-trip parse failed for '{displayed}': {e:?}")
                    });
                    assert_eq!(
                        displayed,
                        format!("{reparsed}"),
                        "{test_id}: round-trip display mismatch"
                    );
                }
                (Err(Error::ParseError(err)), SpecificError(kind, text)) => {
                    assert_eq!(err.kind, *kind, "{test_id}: error kind mismatch");
                    assert!(
                        err.message.contains(text),
                        "{test_id}: error '{}' should contain '{text}'",
                        err.message
                    );
                }
                (Ok(actual), SpecificError(..)) => {
                    panic!("{test_id}: expected error, got {actual:?}");
                }
                (Err(err), _) => {
                    panic!("{test_id}: unexpected result {err:?}");
                }
            }
        }
    }

    #[test]
    fn test_reader_comprehensive() {
        use ParseErrorKind::*;

        let test_cases = vec![
            // ===== ATOMS =====
            ("42", success(42)),
            ("-5", success(-5)),
            ("2.5", success(2.5)),
            ("\"Hello World\"", success("Hello World")),
            ("\"\"", success("")),
            ("#t", success(true)),
            ("#F", success(false)),
            ("nil", success(nil())),
            ("foo", success(sym("FOO"))),
            ("  \t\n foo  ; comment", success(sym("foo"))),
            // ===== LISTS =====
            ("()", success(nil())),
            ("[ ]", success(nil())),
            ("(1 2 3)", success([1, 2, 3])),
            ("[1 {2} (3)]", success(vec![val(1), val([2]), val([3])])),
            (
                "(define (f x)\n  ; body\n  (* x x))",
                success(vec![
                    sym("define"),
                    val(vec![sym("f"), sym("x")]),
                    val(vec![sym("*"), sym("x"), sym("x")]),
                ]),
            ),
            ("(nil #t)", success(vec![nil(), val(true)])),
            // ===== QUOTES =====
            ("'foo", success(quoted(sym("foo")))),
            ("'(1 2)", success(quoted(val([1, 2])))),
            ("''a", success(quoted(quoted(sym("a"))))),
            ("'()", success(quoted(nil()))),
            ("(quote x)", success(quoted(sym("x")))),
            // ===== ERRORS =====
            ("(1 2", SpecificError(Incomplete, "unterminated expression")),
            ("'", SpecificError(Incomplete, "unterminated expression")),
            ("\"abc", SpecificError(Incomplete, "unterminated string")),
            (")", SpecificError(InvalidSyntax, "cannot begin with ')'")),
            ("]", SpecificError(InvalidSyntax, "cannot begin with ']'")),
            ("(a]", SpecificError(InvalidSyntax, "expected ')'")),
            ("[a)", SpecificError(InvalidSyntax, "expected ']'")),
            ("1 2", SpecificError(TrailingContent, "after expression")),
            ("(1 2))", SpecificError(TrailingContent, "after expression")),
            ("", SpecificError(Incomplete, "empty input")),
            ("  ; only a comment", SpecificError(Incomplete, "empty input")),
            ("99999999999999999999", SpecificError(ImplementationLimit, "out of range")),
        ];

        run_parse_tests(test_cases);
    }

    #[test]
    fn test_reader_depth_limits() {
        let parens_deep = format!("{}x{}", "(".repeat(1_000), ")".repeat(1_000));
        let quotes_deep = format!("{}x", "'".repeat(1_000));
        let parens_at_limit = format!(
            "{}x{}",
            "(".repeat(MAX_PARSE_DEPTH),
            ")".repeat(MAX_PARSE_DEPTH)
        );

        assert!(read_expression(&parens_deep).is_ok());
        assert!(read_expression(&quotes_deep).is_ok());
        match read_expression(&parens_at_limit) {
            Err(Error::ParseError(e)) => assert_eq!(e.kind, ParseErrorKind::TooDeeplyNested),
            other => panic!("expected nesting error, got {other:?}"),
        }
        let quotes_at_limit = format!("{}x", "'".repeat(MAX_PARSE_DEPTH));
        expect_kind(
            read_expression(&quotes_at_limit).map(Some),
            ParseErrorKind::TooDeeplyNested,
        );
    }

    #[test]
    fn test_read_program() {
        let forms = read_program("(define x 1)\n'x 42 \"s\" ; done\n").unwrap();
        assert_eq!(
            forms,
            vec![
                val(vec![sym("define"), sym("x"), val(1)]),
                quoted(sym("x")),
                val(42),
                val("s"),
            ]
        );
        assert_eq!(read_program("  ").unwrap(), vec![]);
    }

    /// A source that hands out a fixed list of lines and records continuation requests
    struct Lines {
        lines: std::vec::IntoIter<&'static str>,
        continuations: Vec<bool>,
    }

    impl Lines {
        fn new(lines: Vec<&'static str>) -> Self {
            Lines {
                lines: lines.into_iter(),
                continuations: Vec::new(),
            }
        }
    }

    impl LineSource for &mut Lines {
        fn next_line(&mut self, continuation: bool) -> Result<Option<String>, Error> {
            self.continuations.push(continuation);
            Ok(self.lines.next().map(str::to_owned))
        }
    }

    #[test]
    fn test_interactive_continuation() {
        let mut lines = Lines::new(vec!["(+ 1", "   2)", "", "'", "x"]);
        let mut reader = Reader::new(&mut lines, ReadMode::Interactive);

        assert_eq!(reader.read().unwrap(), Some(val(vec![sym("+"), val(1), val(2)])));
        assert_eq!(reader.depth(), 0);
        assert_eq!(reader.read().unwrap(), Some(quoted(sym("x"))));
        assert_eq!(reader.read().unwrap(), None);
        drop(reader);
        assert_eq!(lines.continuations, vec![false, true, false, false, true, false]);
    }

    #[test]
    fn test_interactive_force_close() {
        let mut lines = Lines::new(vec!["(list (+ 1 2) [car '(a b \\"]);
        let mut reader = Reader::new(&mut lines, ReadMode::Interactive);
        let expected = read_expression("(list (+ 1 2) [car '(a b)])").unwrap();
        assert_eq!(reader.read().unwrap(), Some(expected));
    }

    fn expect_kind(result: Result<Option<Value>, Error>, kind: ParseErrorKind) {
        match result {
            Err(Error::ParseError(e)) => assert_eq!(e.kind, kind),
            other => panic!("expected {kind:?}, got {other:?}"),
        }
    }

    #[test]
    fn test_interactive_errors_discard_the_line() {
        let mut lines = Lines::new(vec!["1 2", "(a]", "(b c) junk", "ok"]);
        let mut reader = Reader::new(&mut lines, ReadMode::Interactive);

        expect_kind(reader.read(), ParseErrorKind::TrailingContent);
        expect_kind(reader.read(), ParseErrorKind::InvalidSyntax);
        assert_eq!(reader.depth(), 0);
        expect_kind(reader.read(), ParseErrorKind::TrailingContent);
        assert_eq!(reader.read().unwrap(), Some(sym("ok")));
    }

    #[test]
    fn test_interactive_end_of_input_mid_form() {
        let mut lines = Lines::new(vec!["(define x", "  (+ 1"]);
        let mut reader = Reader::new(&mut lines, ReadMode::Interactive);
        assert_eq!(reader.read().unwrap(), None);
    }

    #[test]
    fn test_stream_mode_reads_several_forms_per_line() {
        let input = "(a) (b\n c) 'd\n\n";
        let mut reader = Reader::new(
            BufReadSource::new(std::io::Cursor::new(input), "test"),
            ReadMode::Stream,
        );
        let mut forms = Vec::new();
        while let Some(form) = reader.read().unwrap() {
            forms.push(form.to_string());
        }
        assert_eq!(forms, vec!["(A)", "(B C)", "(QUOTE D)"]);

        let mut reader = Reader::new(
            BufReadSource::new(std::io::Cursor::new("(a\n(b)\n"), "test"),
            ReadMode::Stream,
        );
        assert!(reader.read().unwrap_err().is_incomplete());
    }

    fn arb_atom() -> impl Strategy<Value = Value> {
        prop_oneof![
            any::<i64>().prop_map(Value::Integer),
            (-1.0e12f64..1.0e12).prop_map(Value::Real),
            "[a-zA-Z0-9 ;()'\\[\\]]{0,12}".prop_map(Value::String),
            "[A-Z][A-Z0-9?!*<>=-]{0,8}"
                .prop_filter("NIL reads as the empty list", |s| s != "NIL")
                .prop_map(|s| Value::Symbol(Symbol::new(&s))),
            any::<bool>().prop_map(Value::Bool),
        ]
    }

    fn arb_value() -> impl Strategy<Value = Value> {
        arb_atom().prop_recursive(4, 48, 6, |inner| {
            prop::collection::vec(inner, 0..6).prop_map(Value::List)
        })
    }

    proptest! {
        #[test]
        fn prop_printed_values_read_back(value in arb_value()) {
            let printed = value.to_string();
            let reread = read_expression(&printed).unwrap();
            prop_assert_eq!(&reread, &value);
            prop_assert_eq!(reread.to_string(), printed);
        }
    }
}
