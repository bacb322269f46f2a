//! Registry of native operations.
//!
//! Natives receive their arguments already evaluated and return one value or
//! an error. Special forms (`IF`, `DEFINE`, `LAMBDA`, ...) control evaluation of
//! their own arguments, so they live in the evaluator and not here.
//!
//! The evaluator consults this table only after the environment has no
//! binding for a symbol. A user definition therefore shadows a native of the
//! same name, and deleting that definition makes the native visible again.
//!
//! ## Numbers
//!
//! - Integer arithmetic is checked: overflow is a `DomainError`, never a wrap.
//! - Any real operand makes the result real.
//! - `/` on two integers floors (`(/ -7 2)` is `-4`), and `MOD` takes the sign
//!   of the divisor, so `(+ (* (/ a b) b) (MOD a b))` is `a`.
//! - Division by zero is a `DomainError` for integers and reals alike.
//!
//! ## Adding New Operations
//!
//! 1. **Implement the function** with typed parameters (`Value`, `Number`,
//!    `i64`, `ValueIter`, `NumIter`); the adapter layer converts and checks them
//! 2. **Add a `BuiltinOp`** to `BUILTIN_OPS` with its name and arity
//! 3. **Add tests** for the edge cases and the error conditions

use crate::Error;
use crate::ast::{Number, NumberType, Value, nil};
use crate::evaluator::intooperation::{IntoOperation, IntoVariadicOperation, OperationFn};
use crate::evaluator::{NumIter, ValueIter};
use crate::stack::ensure_sufficient_stack;
use std::cmp::Ordering;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, LazyLock};

/// Number of arguments a native accepts
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    /// Exactly n arguments
    Exact(usize),
    /// At least n arguments
    AtLeast(usize),
    /// Any number of arguments
    Any,
}

impl Arity {
    pub fn validate(self, arg_count: usize) -> Result<(), Error> {
        match self {
            Arity::Exact(n) if arg_count != n => Err(Error::arity_error(n, arg_count)),
            Arity::AtLeast(n) if arg_count < n => Err(Error::arity_error(n, arg_count)),
            _ => Ok(()),
        }
    }
}

/// Check the argument count before handing the arguments to `inner`
pub(crate) fn with_arity(arity: Arity, inner: Arc<OperationFn>) -> Arc<OperationFn> {
    match arity {
        Arity::Any => inner,
        _ => Arc::new(move |args: Vec<Value>| {
            arity.validate(args.len())?;
            inner(args)
        }),
    }
}

/// Definition of a native operation
#[derive(Clone)]
pub struct BuiltinOp {
    /// Upper-case name the operation is found under
    pub name: String,
    /// Implementation, arity check included
    pub func: Arc<OperationFn>,
    pub arity: Arity,
}

impl fmt::Debug for BuiltinOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BuiltinOp")
            .field("name", &self.name)
            .field("arity", &self.arity)
            .finish_non_exhaustive()
    }
}

impl PartialEq for BuiltinOp {
    fn eq(&self, other: &Self) -> bool {
        self.name == other.name
    }
}

impl BuiltinOp {
    fn new(name: impl Into<String>, arity: Arity, func: Arc<OperationFn>) -> Self {
        BuiltinOp {
            name: name.into(),
            func: with_arity(arity, func),
            arity,
        }
    }

    /// The operation as a first-class value
    pub fn to_value(&self) -> Value {
        Value::BuiltinFunction {
            id: self.name.clone(),
            func: Arc::clone(&self.func),
        }
    }
}

//
// Arithmetic
//

fn overflow(operation: &str) -> Error {
    Error::DomainError(format!("integer overflow in {operation}"))
}

fn division_by_zero() -> Error {
    Error::DomainError("division by zero".to_owned())
}

#[derive(Debug, Clone, Copy)]
enum Arith {
    Add,
    Sub,
    Mul,
    Div,
}

impl Arith {
    fn describe(self) -> &'static str {
        match self {
            Arith::Add => "addition",
            Arith::Sub => "subtraction",
            Arith::Mul => "multiplication",
            Arith::Div => "division",
        }
    }

    fn apply(self, lhs: Number, rhs: Number) -> Result<Number, Error> {
        if let (Number::Integer(a), Number::Integer(b)) = (lhs, rhs) {
            let result = match self {
                Arith::Add => a.checked_add(b),
                Arith::Sub => a.checked_sub(b),
                Arith::Mul => a.checked_mul(b),
                Arith::Div => return floor_div(a, b).map(Number::Integer),
            };
            return result
                .map(Number::Integer)
                .ok_or_else(|| overflow(self.describe()));
        }

        let (a, b) = (lhs.to_f64(), rhs.to_f64());
        let result = match self {
            Arith::Add => a + b,
            Arith::Sub => a - b,
            Arith::Mul => a * b,
            Arith::Div if b == 0.0 => return Err(division_by_zero()),
            Arith::Div => a / b,
        };
        Ok(Number::Real(result))
    }

    /// Left fold over `first` and the remaining operands
    fn fold(self, first: Number, mut rest: NumIter<'_>) -> Result<Number, Error> {
        rest.try_fold(first, |acc, n| self.apply(acc, n))
    }
}

fn floor_div(a: NumberType, b: NumberType) -> Result<NumberType, Error> {
    if b == 0 {
        return Err(division_by_zero());
    }
    let quotient = a.checked_div(b).ok_or_else(|| overflow("division"))?;
    if a.wrapping_rem(b) != 0 && ((a < 0) != (b < 0)) {
        Ok(quotient - 1)
    } else {
        Ok(quotient)
    }
}

fn builtin_add(args: NumIter<'_>) -> Result<Number, Error> {
    Arith::Add.fold(Number::Integer(0), args)
}

fn builtin_sub(first: Number, rest: NumIter<'_>) -> Result<Number, Error> {
    if rest.len() == 0 {
        return match first {
            Number::Integer(n) => n
                .checked_neg()
                .map(Number::Integer)
                .ok_or_else(|| overflow("negation")),
            Number::Real(r) => Ok(Number::Real(-r)),
        };
    }
    Arith::Sub.fold(first, rest)
}

fn builtin_mul(first: Number, rest: NumIter<'_>) -> Result<Number, Error> {
    Arith::Mul.fold(first, rest)
}

fn builtin_div(first: Number, rest: NumIter<'_>) -> Result<Number, Error> {
    Arith::Div.fold(first, rest)
}

fn builtin_mod(dividend: Number, divisor: Number) -> Result<Number, Error> {
    match (dividend, divisor) {
        (_, Number::Integer(0)) => Err(division_by_zero()),
        (Number::Integer(a), Number::Integer(b)) => {
            let r = a.wrapping_rem(b);
            Ok(Number::Integer(if r != 0 && ((r < 0) != (b < 0)) {
                r + b
            } else {
                r
            }))
        }
        (a, b) => {
            let (a, b) = (a.to_f64(), b.to_f64());
            if b == 0.0 {
                return Err(division_by_zero());
            }
            let r = a % b;
            Ok(Number::Real(if r != 0.0 && ((r < 0.0) != (b < 0.0)) {
                r + b
            } else {
                r
            }))
        }
    }
}

fn builtin_inc(n: Number) -> Result<Number, Error> {
    Arith::Add.apply(n, Number::Integer(1))
}

fn builtin_dec(n: Number) -> Result<Number, Error> {
    Arith::Sub.apply(n, Number::Integer(1))
}

fn builtin_sqrt(n: Number) -> Result<f64, Error> {
    let x = n.to_f64();
    if x < 0.0 {
        return Err(Error::DomainError(format!(
            "square root of negative number: {}",
            Value::from(n)
        )));
    }
    Ok(x.sqrt())
}

fn builtin_sin(n: Number) -> f64 {
    n.to_f64().sin()
}

fn builtin_cos(n: Number) -> f64 {
    n.to_f64().cos()
}

fn builtin_tan(n: Number) -> f64 {
    n.to_f64().tan()
}

//
// Comparison and equality
//

/// Order two numbers (integers and reals mix) or two strings
fn compare(lhs: &Value, rhs: &Value) -> Result<Ordering, Error> {
    let ordering = match (lhs, rhs) {
        (Value::Integer(a), Value::Integer(b)) => Some(a.cmp(b)),
        (Value::Integer(a), Value::Real(b)) => (*a as f64).partial_cmp(b),
        (Value::Real(a), Value::Integer(b)) => a.partial_cmp(&(*b as f64)),
        (Value::Real(a), Value::Real(b)) => a.partial_cmp(b),
        (Value::String(a), Value::String(b)) => Some(a.cmp(b)),
        _ => {
            return Err(Error::TypeError(format!(
                "cannot compare {} with {}",
                lhs.type_name(),
                rhs.type_name()
            )));
        }
    };
    ordering.ok_or_else(|| Error::DomainError(format!("cannot order {lhs} and {rhs}")))
}

macro_rules! ordering_comparison {
    ($name:ident, $($ordering:pat_param)|+) => {
        fn $name(lhs: Value, rhs: Value) -> Result<bool, Error> {
            Ok(matches!(compare(&lhs, &rhs)?, $($ordering)|+))
        }
    };
}

ordering_comparison!(builtin_lt, Ordering::Less);
ordering_comparison!(builtin_gt, Ordering::Greater);
ordering_comparison!(builtin_le, Ordering::Less | Ordering::Equal);
ordering_comparison!(builtin_ge, Ordering::Greater | Ordering::Equal);

/// Structural equality; numbers compare by value across integer and real
fn values_equal(lhs: &Value, rhs: &Value) -> bool {
    match (lhs, rhs) {
        (Value::Integer(a), Value::Real(b)) | (Value::Real(b), Value::Integer(a)) => {
            *a as f64 == *b
        }
        (Value::List(a), Value::List(b)) => ensure_sufficient_stack(|| {
            a.len() == b.len() && a.iter().zip(b).all(|(x, y)| values_equal(x, y))
        }),
        _ => lhs == rhs,
    }
}

fn builtin_equal(lhs: Value, rhs: Value) -> bool {
    values_equal(&lhs, &rhs)
}

fn builtin_not_equal(lhs: Value, rhs: Value) -> bool {
    !values_equal(&lhs, &rhs)
}

/// Identity: equal atoms, both NIL, or the same closure or native.
/// Two non-empty lists are never identical.
fn builtin_eq(lhs: Value, rhs: Value) -> bool {
    match (&lhs, &rhs) {
        (Value::List(a), Value::List(b)) => a.is_empty() && b.is_empty(),
        _ => lhs == rhs,
    }
}

fn builtin_not(value: Value) -> bool {
    !value.is_truthy()
}

//
// Lists
//

fn car_of_nil() -> Error {
    Error::DomainError("cannot take CAR of an empty list".to_owned())
}

fn builtin_car(mut list: ValueIter<'_>) -> Result<Value, Error> {
    list.next().cloned().ok_or_else(car_of_nil)
}

fn builtin_cdr(list: ValueIter<'_>) -> Value {
    Value::List(list.skip(1).cloned().collect())
}

/// One `A` or `D` step of a generated accessor
fn access(letter: char, value: &Value) -> Result<Value, Error> {
    let Value::List(items) = value else {
        return Err(Error::TypeError(format!("expected list, got {value}")));
    };
    if letter == 'A' {
        items.first().cloned().ok_or_else(car_of_nil)
    } else {
        Ok(Value::List(items.iter().skip(1).cloned().collect()))
    }
}

/// `CAAR` through `CDDDDR`. The letters apply right to left, so `CADR` is
/// the `CAR` of the `CDR`.
fn car_cdr_variants() -> Vec<BuiltinOp> {
    let mut ops = Vec::new();
    for len in 2..=4 {
        for bits in 0..(1u32 << len) {
            let path: String = (0..len)
                .rev()
                .map(|i| if (bits >> i) & 1 == 0 { 'A' } else { 'D' })
                .collect();
            let name = format!("C{path}R");
            let func: Arc<OperationFn> = Arc::new(move |mut args: Vec<Value>| {
                let mut value = args.pop().unwrap_or_else(nil);
                for letter in path.chars().rev() {
                    value = access(letter, &value)?;
                }
                Ok(value)
            });
            ops.push(BuiltinOp::new(name, Arity::Exact(1), func));
        }
    }
    ops
}

fn builtin_cons(first: Value, rest: Value) -> Result<Value, Error> {
    match rest {
        Value::List(mut items) => {
            items.insert(0, first);
            Ok(Value::List(items))
        }
        other => Err(Error::TypeError(format!(
            "cons expects a list as its second argument, got {other}"
        ))),
    }
}

fn builtin_append(first: ValueIter<'_>, second: ValueIter<'_>) -> Value {
    Value::List(first.chain(second).cloned().collect())
}

fn builtin_list(args: ValueIter<'_>) -> Value {
    Value::List(args.cloned().collect())
}

//
// Predicates
//

fn builtin_is_null(value: Value) -> bool {
    value.is_nil()
}

fn builtin_is_atom(value: Value) -> bool {
    value.is_atom()
}

fn builtin_is_pair(value: Value) -> bool {
    matches!(value, Value::List(items) if !items.is_empty())
}

fn builtin_is_list(value: Value) -> bool {
    matches!(value, Value::List(_))
}

fn builtin_is_integer(value: Value) -> bool {
    matches!(value, Value::Integer(_))
}

fn builtin_is_number(value: Value) -> bool {
    matches!(value, Value::Integer(_) | Value::Real(_))
}

fn builtin_is_string(value: Value) -> bool {
    matches!(value, Value::String(_))
}

fn builtin_is_symbol(value: Value) -> bool {
    matches!(value, Value::Symbol(_))
}

//
// Output and errors
//

/// Arguments in plain form, space separated
fn plain_join(args: ValueIter<'_>) -> String {
    Value::List(args.cloned().collect()).to_plain_string()
}

fn builtin_print(args: ValueIter<'_>) -> Value {
    println!("{}", plain_join(args));
    nil()
}

fn builtin_error(args: ValueIter<'_>) -> Result<Value, Error> {
    Err(Error::UserError(plain_join(args)))
}

/// Global registry of all native operations.
///
/// Built once on first use. Every implementation goes through the same
/// adapter layer as natives registered on an `Environment`.
static BUILTIN_OPS: LazyLock<Vec<BuiltinOp>> = LazyLock::new(|| {
    fn builtin_fixed<Args, F>(f: F) -> Arc<OperationFn>
    where
        F: IntoOperation<Args>,
    {
        <F as IntoOperation<Args>>::into_operation(f)
    }

    fn builtin_variadic<Args, F>(f: F) -> Arc<OperationFn>
    where
        F: IntoVariadicOperation<Args>,
    {
        <F as IntoVariadicOperation<Args>>::into_variadic_operation(f)
    }

    let unary = |name: &str, func: Arc<OperationFn>| BuiltinOp::new(name, Arity::Exact(1), func);
    let binary = |name: &str, func: Arc<OperationFn>| BuiltinOp::new(name, Arity::Exact(2), func);

    let mut ops = vec![
        // Arithmetic
        BuiltinOp::new(
            "+",
            Arity::Any,
            builtin_variadic::<(NumIter<'static>,), _>(builtin_add),
        ),
        BuiltinOp::new(
            "-",
            Arity::AtLeast(1),
            builtin_variadic::<(Number, NumIter<'static>), _>(builtin_sub),
        ),
        BuiltinOp::new(
            "*",
            Arity::AtLeast(1),
            builtin_variadic::<(Number, NumIter<'static>), _>(builtin_mul),
        ),
        BuiltinOp::new(
            "/",
            Arity::AtLeast(1),
            builtin_variadic::<(Number, NumIter<'static>), _>(builtin_div),
        ),
        binary("MOD", builtin_fixed::<(Number, Number), _>(builtin_mod)),
        unary("1+", builtin_fixed::<(Number,), _>(builtin_inc)),
        unary("1-", builtin_fixed::<(Number,), _>(builtin_dec)),
        unary("SQRT", builtin_fixed::<(Number,), _>(builtin_sqrt)),
        unary("SIN", builtin_fixed::<(Number,), _>(builtin_sin)),
        unary("COS", builtin_fixed::<(Number,), _>(builtin_cos)),
        unary("TAN", builtin_fixed::<(Number,), _>(builtin_tan)),
        // Comparison
        binary("<", builtin_fixed::<(Value, Value), _>(builtin_lt)),
        binary(">", builtin_fixed::<(Value, Value), _>(builtin_gt)),
        binary("<=", builtin_fixed::<(Value, Value), _>(builtin_le)),
        binary(">=", builtin_fixed::<(Value, Value), _>(builtin_ge)),
        binary("=", builtin_fixed::<(Value, Value), _>(builtin_equal)),
        binary("/=", builtin_fixed::<(Value, Value), _>(builtin_not_equal)),
        binary("EQ?", builtin_fixed::<(Value, Value), _>(builtin_eq)),
        unary("NOT", builtin_fixed::<(Value,), _>(builtin_not)),
        // Lists
        unary("CAR", builtin_fixed::<(ValueIter<'static>,), _>(builtin_car)),
        unary("CDR", builtin_fixed::<(ValueIter<'static>,), _>(builtin_cdr)),
        binary("CONS", builtin_fixed::<(Value, Value), _>(builtin_cons)),
        binary(
            "APPEND",
            builtin_fixed::<(ValueIter<'static>, ValueIter<'static>), _>(builtin_append),
        ),
        BuiltinOp::new(
            "LIST",
            Arity::Any,
            builtin_variadic::<(ValueIter<'static>,), _>(builtin_list),
        ),
        // Predicates
        unary("NULL?", builtin_fixed::<(Value,), _>(builtin_is_null)),
        unary("ATOM?", builtin_fixed::<(Value,), _>(builtin_is_atom)),
        unary("PAIR?", builtin_fixed::<(Value,), _>(builtin_is_pair)),
        unary("LIST?", builtin_fixed::<(Value,), _>(builtin_is_list)),
        unary("INTEGER?", builtin_fixed::<(Value,), _>(builtin_is_integer)),
        unary("REAL?", builtin_fixed::<(Value,), _>(builtin_is_number)),
        unary("NUMBER?", builtin_fixed::<(Value,), _>(builtin_is_number)),
        unary("STRING?", builtin_fixed::<(Value,), _>(builtin_is_string)),
        unary("SYMBOL?", builtin_fixed::<(Value,), _>(builtin_is_symbol)),
        // Output and errors
        BuiltinOp::new(
            "PRINT",
            Arity::Any,
            builtin_variadic::<(ValueIter<'static>,), _>(builtin_print),
        ),
        BuiltinOp::new(
            "ERROR",
            Arity::Any,
            builtin_variadic::<(ValueIter<'static>,), _>(builtin_error),
        ),
    ];
    ops.extend(car_cdr_variants());
    ops
});

/// Lazy static map from name to BuiltinOp (private - use find_builtin_op)
static BUILTIN_BY_NAME: LazyLock<HashMap<&'static str, &'static BuiltinOp>> =
    LazyLock::new(|| {
        let ops: &'static [BuiltinOp] = BUILTIN_OPS.as_slice();
        ops.iter().map(|op| (op.name.as_str(), op)).collect()
    });

/// All native operations, in registry order
pub fn get_builtin_ops() -> &'static [BuiltinOp] {
    BUILTIN_OPS.as_slice()
}

/// Find a native operation by its upper-case name
pub fn find_builtin_op(name: &str) -> Option<&'static BuiltinOp> {
    BUILTIN_BY_NAME.get(name).copied()
}
