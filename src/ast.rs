//! This module defines the expression model shared by the reader, the evaluator
//! and the printer. The main enum, [`Value`], covers atoms (integers, reals,
//! strings, booleans, symbols, native callables and closures) and ordered
//! sequences. The empty sequence is NIL. Helper functions [`val`], [`sym`] and
//! [`nil`] keep AST construction short in code and tests, and the `From`
//! implementations turn Rust literals, arrays and vectors into values.
//!
//! `Display` is the canonical printer: its output reads back to an equal value
//! for everything the reader can produce.

use crate::Error;
use crate::evaluator::Environment;
use crate::evaluator::intooperation::OperationFn;
use crate::stack::ensure_sufficient_stack;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

/// Type alias for integer values in the interpreter
pub(crate) type NumberType = i64;

/// An upper-cased identifier.
///
/// Symbols are distinct from string values so the evaluator can tell the name
/// `FOO` from the string `"FOO"`.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Symbol(Rc<str>);

impl Symbol {
    /// Create a symbol, normalizing its case
    pub fn new(name: &str) -> Self {
        Symbol(name.to_uppercase().into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Debug for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Symbol({})", self.0)
    }
}

impl fmt::Display for Symbol {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Symbol {
    fn from(name: &str) -> Self {
        Symbol::new(name)
    }
}

/// A numeric argument as seen by native operations
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Number {
    Integer(NumberType),
    Real(f64),
}

impl Number {
    pub fn to_f64(self) -> f64 {
        match self {
            Number::Integer(n) => n as f64,
            Number::Real(r) => r,
        }
    }
}

/// A user-defined function: formals, body and the scope it was created in.
///
/// Closures never change after creation. The captured scope is shared, not
/// copied, so bindings added to it later are visible when the closure runs.
pub struct Closure {
    pub params: Vec<Symbol>,
    pub body: Value,
    pub env: Environment,
}

impl Closure {
    pub fn arity(&self) -> usize {
        self.params.len()
    }
}

/// Core expression type in the interpreter
///
/// To build an AST, use the helper functions:
/// - `val(42)` for values, `sym("name")` for symbols, `nil()` for the empty list
/// - `val([1, 2, 3])` for homogeneous lists
/// - `val(vec![sym("op"), val(42)])` for mixed lists
///
/// `Clone`, `Debug`, `Display` and `PartialEq` descend into nested lists
/// through [`ensure_sufficient_stack`], like the reader.
pub enum Value {
    Integer(NumberType),
    Real(f64),
    /// Identifiers, already upper-cased
    Symbol(Symbol),
    /// String literals, case preserved
    String(String),
    Bool(bool),
    /// Ordered sequences; the empty list is NIL
    List(Vec<Value>),
    /// Native operations from the registry or registered by the host.
    /// Compared by id, not by function pointer.
    BuiltinFunction {
        id: String,
        func: Arc<OperationFn>,
    },
    /// User-defined functions
    Closure(Rc<Closure>),
}

impl Clone for Value {
    fn clone(&self) -> Self {
        match self {
            Value::Integer(n) => Value::Integer(*n),
            Value::Real(r) => Value::Real(*r),
            Value::Symbol(s) => Value::Symbol(s.clone()),
            Value::String(s) => Value::String(s.clone()),
            Value::Bool(b) => Value::Bool(*b),
            Value::List(list) => ensure_sufficient_stack(|| Value::List(list.to_vec())),
            Value::BuiltinFunction { id, func } => Value::BuiltinFunction {
                id: id.clone(),
                func: Arc::clone(func),
            },
            Value::Closure(closure) => Value::Closure(Rc::clone(closure)),
        }
    }
}

impl fmt::Debug for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "Integer({n})"),
            Value::Real(r) => write!(f, "Real({r:?})"),
            Value::Symbol(s) => write!(f, "{s:?}"),
            Value::String(s) => write!(f, "String(\"{s}\")"),
            Value::Bool(b) => write!(f, "Bool({b})"),
            Value::List(list) => ensure_sufficient_stack(|| {
                write!(f, "List(")?;
                for (i, v) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{v:?}")?;
                }
                write!(f, ")")
            }),
            Value::BuiltinFunction { id, .. } => write!(f, "BuiltinFunction({id})"),
            Value::Closure(closure) => {
                write!(
                    f,
                    "Closure(params={:?}, body={:?})",
                    closure.params, closure.body
                )
            }
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::String(s.to_owned())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::String(s)
    }
}

impl From<bool> for Value {
    fn from(b: bool) -> Self {
        Value::Bool(b)
    }
}

impl From<f64> for Value {
    fn from(r: f64) -> Self {
        Value::Real(r)
    }
}

impl From<Symbol> for Value {
    fn from(s: Symbol) -> Self {
        Value::Symbol(s)
    }
}

impl From<Number> for Value {
    fn from(n: Number) -> Self {
        match n {
            Number::Integer(i) => Value::Integer(i),
            Number::Real(r) => Value::Real(r),
        }
    }
}

macro_rules! impl_from_integer {
    ($int_type:ty) => {
        impl From<$int_type> for Value {
            fn from(n: $int_type) -> Self {
                Value::Integer(n as NumberType)
            }
        }
    };
}

impl_from_integer!(i8);
impl_from_integer!(i16);
impl_from_integer!(i32);
impl_from_integer!(NumberType);
impl_from_integer!(u8);
impl_from_integer!(u16);
impl_from_integer!(u32);

impl<T: Into<Value>> From<Vec<T>> for Value {
    fn from(v: Vec<T>) -> Self {
        Value::List(v.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value>, const N: usize> From<[T; N]> for Value {
    fn from(arr: [T; N]) -> Self {
        Value::List(arr.into_iter().map(Into::into).collect())
    }
}

impl<T: Into<Value> + Clone> From<&[T]> for Value {
    fn from(slice: &[T]) -> Self {
        Value::List(slice.iter().cloned().map(Into::into).collect())
    }
}

// Fallible conversions used by the typed native adapters.

impl std::convert::TryInto<NumberType> for Value {
    type Error = Error;

    fn try_into(self) -> Result<NumberType, Error> {
        if let Value::Integer(n) = self {
            Ok(n)
        } else {
            Err(Error::TypeError(format!("expected integer, got {self}")))
        }
    }
}

impl std::convert::TryInto<Number> for Value {
    type Error = Error;

    fn try_into(self) -> Result<Number, Error> {
        match self {
            Value::Integer(n) => Ok(Number::Integer(n)),
            Value::Real(r) => Ok(Number::Real(r)),
            other => Err(Error::TypeError(format!("expected number, got {other}"))),
        }
    }
}

/// Helper function for creating symbols in tests
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn sym<S: AsRef<str>>(name: S) -> Value {
    Value::Symbol(Symbol::new(name.as_ref()))
}

/// Helper function for creating values in tests
#[cfg_attr(not(test), expect(dead_code))]
pub(crate) fn val<T: Into<Value>>(value: T) -> Value {
    value.into()
}

/// The empty list
pub fn nil() -> Value {
    Value::List(vec![])
}

/// Print a real so that it reads back as a real: always with a `.`
fn format_real(r: f64) -> String {
    let repr = format!("{r:?}");
    if !r.is_finite() || repr.contains('.') {
        return repr;
    }
    match repr.split_once('e') {
        Some((mantissa, exponent)) => format!("{mantissa}.0e{exponent}"),
        None => format!("{repr}.0"),
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Integer(n) => write!(f, "{n}"),
            Value::Real(r) => f.write_str(&format_real(*r)),
            Value::Symbol(s) => write!(f, "{s}"),
            // The reader does no escape processing, so neither does the printer
            Value::String(s) => write!(f, "\"{s}\""),
            Value::Bool(b) => write!(f, "{}", if *b { "#t" } else { "#f" }),
            Value::List(elements) => ensure_sufficient_stack(|| {
                write!(f, "(")?;
                for (i, elem) in elements.iter().enumerate() {
                    if i > 0 {
                        write!(f, " ")?;
                    }
                    write!(f, "{elem}")?;
                }
                write!(f, ")")
            }),
            Value::BuiltinFunction { id, .. } => write!(f, "#<NATIVE:{id}>"),
            Value::Closure(_) => write!(f, "#<CLOSURE>"),
        }
    }
}

impl Value {
    /// Check if a value is nil (the empty list)
    pub fn is_nil(&self) -> bool {
        matches!(self, Value::List(list) if list.is_empty())
    }

    /// `#f` and NIL are false, everything else is true
    pub fn is_truthy(&self) -> bool {
        !matches!(self, Value::Bool(false)) && !self.is_nil()
    }

    pub fn is_atom(&self) -> bool {
        !matches!(self, Value::List(_))
    }

    pub(crate) fn type_name(&self) -> &'static str {
        match self {
            Value::Integer(_) => "integer",
            Value::Real(_) => "real",
            Value::Symbol(_) => "symbol",
            Value::String(_) => "string",
            Value::Bool(_) => "boolean",
            Value::List(_) => "list",
            Value::BuiltinFunction { .. } => "native",
            Value::Closure(_) => "closure",
        }
    }

    /// The form `PRINT` uses: strings without quotes, lists without the outer parentheses
    pub fn to_plain_string(&self) -> String {
        match self {
            Value::List(elements) => elements
                .iter()
                .map(Value::to_plain_element)
                .collect::<Vec<_>>()
                .join(" "),
            other => other.to_plain_element(),
        }
    }

    fn to_plain_element(&self) -> String {
        match self {
            Value::String(s) => s.clone(),
            Value::List(_) => ensure_sufficient_stack(|| format!("({})", self.to_plain_string())),
            other => other.to_string(),
        }
    }
}

impl PartialEq for Value {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Value::Integer(a), Value::Integer(b)) => a == b,
            (Value::Real(a), Value::Real(b)) => a == b,
            (Value::Symbol(a), Value::Symbol(b)) => a == b,
            (Value::String(a), Value::String(b)) => a == b,
            (Value::Bool(a), Value::Bool(b)) => a == b,
            (Value::List(a), Value::List(b)) => ensure_sufficient_stack(|| a == b),
            (Value::BuiltinFunction { id: id1, .. }, Value::BuiltinFunction { id: id2, .. }) => {
                id1 == id2
            }
            (Value::Closure(a), Value::Closure(b)) => Rc::ptr_eq(a, b),
            _ => false,
        }
    }
}

#[cfg(test)]
mod helper_function_tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_helper_functions_data_driven() {
        let test_cases = vec![
            (val(42), Value::Integer(42)),
            (val(-17), Value::Integer(-17)),
            (val(4294967295u32), Value::Integer(4294967295)),
            (val(NumberType::MAX), Value::Integer(NumberType::MAX)),
            (val(2.5), Value::Real(2.5)),
            (val(true), Value::Bool(true)),
            (val("Hello"), Value::String("Hello".to_owned())),
            (sym("foo-bar?"), Value::Symbol(Symbol::new("FOO-BAR?"))),
            (nil(), Value::List(vec![])),
            (
                val([1, 2, 3]),
                Value::List(vec![Value::Integer(1), Value::Integer(2), Value::Integer(3)]),
            ),
            (
                val(vec![sym("op"), val(42), val("result")]),
                Value::List(vec![
                    Value::Symbol(Symbol::new("op")),
                    Value::Integer(42),
                    Value::String("result".to_owned()),
                ]),
            ),
        ];

        for (i, (actual, expected)) in test_cases.iter().enumerate() {
            assert_eq!(actual, expected, "test case {}", i + 1);
        }
    }

    #[test]
    fn test_symbols_are_case_normalized() {
        assert_eq!(Symbol::new("lambda"), Symbol::new("LAMBDA"));
        assert_eq!(Symbol::new("Car").as_str(), "CAR");
        assert_ne!(sym("foo"), val("FOO"));
    }

    #[test]
    fn test_truthiness() {
        assert!(!val(false).is_truthy());
        assert!(!nil().is_truthy());
        assert!(val(true).is_truthy());
        assert!(val(0).is_truthy());
        assert!(val("").is_truthy());
        assert!(val([0]).is_truthy());
    }

    #[test]
    fn test_canonical_printing() {
        let cases = vec![
            (val(-5), "-5"),
            (val(2.0), "2.0"),
            (val(0.25), "0.25"),
            (val(1e20), "1.0e20"),
            (val(1.5e-7), "1.5e-7"),
            (val("Mixed Case"), "\"Mixed Case\""),
            (val(false), "#f"),
            (nil(), "()"),
            (val(vec![sym("quote"), val([1, 2])]), "(QUOTE (1 2))"),
        ];
        for (value, expected) in cases {
            assert_eq!(value.to_string(), expected);
        }
    }

    #[test]
    fn test_plain_printing() {
        let value = val(vec![val("hi"), sym("there"), val(vec![val("x"), val(1)])]);
        assert_eq!(value.to_plain_string(), "hi THERE (x 1)");
        assert_eq!(val("alone").to_plain_string(), "alone");
    }

    #[test]
    fn test_numbers_compare_structurally() {
        assert_ne!(val(1), val(1.0));
        assert_eq!(val(1.5), val(1.5));
    }
}
