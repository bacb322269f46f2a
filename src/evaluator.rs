//! Evaluation of [`Value`] expressions against an [`Environment`].
//!
//! The evaluator is a loop: special forms and closure application hand back
//! the next expression (and possibly the next scope) as a [`Step`] instead of
//! recursing, so a call in tail position costs no native stack. Only
//! non-tail evaluation (an operator, an argument, an `IF` test) recurses,
//! and that recursion is bounded by [`MAX_EVAL_DEPTH`].

use tracing::trace;

use crate::Error;
use crate::MAX_EVAL_DEPTH;
use crate::ast::{Symbol, Value, nil};
use crate::builtinops::find_builtin_op;
use crate::stack::ensure_sufficient_stack;

mod environment;
pub mod intooperation;
mod special_forms;

pub use environment::Environment;
pub use intooperation::{NumIter, OperationFn, ValueIter};
use special_forms::SpecialForm;

/// Outcome of one trip through the evaluator loop
pub(crate) enum Step {
    /// Evaluation finished with this value
    Done(Value),
    /// Continue with this expression in the same scope
    Tail(Value),
    /// Continue with this expression in another scope
    TailIn(Value, Environment),
}

/// Evaluate an expression.
///
/// `DEFINE` and `DELETE` at the top of `expr` act on the scope `env` refers
/// to, so the caller sees their effect through its own handle.
pub fn eval(expr: &Value, env: &Environment) -> Result<Value, Error> {
    eval_with_depth_tracking(expr, env, 0)
}

/// Evaluate with depth tracking to keep nested evaluation bounded
pub(crate) fn eval_with_depth_tracking(
    expr: &Value,
    env: &Environment,
    depth: usize,
) -> Result<Value, Error> {
    if depth >= MAX_EVAL_DEPTH {
        return Err(Error::RecursionError {
            limit: MAX_EVAL_DEPTH,
        });
    }
    ensure_sufficient_stack(|| eval_loop(expr, env, depth))
}

fn eval_loop(expr: &Value, env: &Environment, depth: usize) -> Result<Value, Error> {
    let mut step = eval_step(expr, env, depth).map_err(|err| add_context(err, expr))?;
    let mut env = env.clone();
    loop {
        let expr = match step {
            Step::Done(value) => return Ok(value),
            Step::Tail(next) => next,
            Step::TailIn(next, scope) => {
                env = scope;
                next
            }
        };
        step = eval_step(&expr, &env, depth).map_err(|err| add_context(err, &expr))?;
    }
}

/// Attach the failing expression to type and domain errors, once
fn add_context(error: Error, expr: &Value) -> Error {
    const MARKER: &str = "\n  Context: while evaluating: ";
    match error {
        Error::TypeError(msg) if !msg.contains(MARKER) => {
            Error::TypeError(format!("{msg}{MARKER}{expr}"))
        }
        Error::DomainError(msg) if !msg.contains(MARKER) => {
            Error::DomainError(format!("{msg}{MARKER}{expr}"))
        }
        other => other,
    }
}

fn eval_step(expr: &Value, env: &Environment, depth: usize) -> Result<Step, Error> {
    match expr {
        Value::Symbol(name) => resolve_symbol(name, env).map(Step::Done),
        Value::List(elements) => match elements.as_slice() {
            [] => Ok(Step::Done(nil())),
            [head, arg_exprs @ ..] => {
                if let Value::Symbol(name) = head
                    && let Some(form) = SpecialForm::from_symbol(name)
                {
                    trace!(form = ?form, "special form");
                    return form.eval(arg_exprs, env, depth);
                }

                let func = eval_with_depth_tracking(head, env, depth + 1)?;
                let args = eval_args(arg_exprs, env, depth)?;
                apply(func, args)
            }
        },
        // Every other atom evaluates to itself
        _ => Ok(Step::Done(expr.clone())),
    }
}

/// Environment first, then the operator registry
fn resolve_symbol(name: &Symbol, env: &Environment) -> Result<Value, Error> {
    if let Some(value) = env.get(name) {
        return Ok(value);
    }
    find_builtin_op(name.as_str())
        .map(|op| op.to_value())
        .ok_or_else(|| Error::UnboundSymbol(name.to_string()))
}

/// Evaluate argument expressions left to right
fn eval_args(args: &[Value], env: &Environment, depth: usize) -> Result<Vec<Value>, Error> {
    args.iter()
        .map(|arg| eval_with_depth_tracking(arg, env, depth + 1))
        .collect()
}

fn apply(func: Value, args: Vec<Value>) -> Result<Step, Error> {
    match func {
        Value::BuiltinFunction { func, .. } => func(args).map(Step::Done),
        Value::Closure(closure) => {
            if closure.arity() != args.len() {
                return Err(Error::arity_error(closure.arity(), args.len()));
            }
            trace!(arity = closure.arity(), "applying closure");

            let scope = closure.env.child();
            for (param, arg) in closure.params.iter().zip(args) {
                scope.define(param.clone(), arg);
            }
            Ok(Step::TailIn(closure.body.clone(), scope))
        }
        other => Err(Error::NotApplicable(other.to_string())),
    }
}

#[cfg(test)]
#[expect(clippy::unwrap_used)] // test code OK
mod tests {
    use super::*;
    use crate::ast::{Number, sym, val};
    use crate::builtinops::Arity;
    use crate::reader::read_expression;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_register_builtin_operation_add() {
        fn add(a: i64, b: i64) -> i64 {
            a + b
        }
        let env = Environment::new();
        env.register_builtin_operation::<_, (i64, i64)>("add2", add);
        let expr = read_expression("(add2 7 5)").unwrap();
        assert_eq!(eval(&expr, &env).unwrap(), Value::Integer(12));

        let expr = read_expression("(add2 7)").unwrap();
        assert_eq!(eval(&expr, &env).unwrap_err(), crate::Error::arity_error(2, 1));
    }

    #[test]
    fn test_register_builtin_operation_zero_arg() {
        fn forty_two() -> i64 {
            42
        }

        let env = Environment::new();
        env.register_builtin_operation::<_, ()>("forty-two", forty_two);

        let expr = read_expression("(forty-two)").unwrap();
        assert_eq!(eval(&expr, &env).unwrap(), Value::Integer(42));
    }

    #[test]
    fn test_register_builtin_operation_result_builtin() {
        fn safe_div(a: i64, b: i64) -> Result<i64, crate::Error> {
            if b == 0 {
                Err(crate::Error::DomainError("division by zero".to_owned()))
            } else {
                Ok(a / b)
            }
        }

        let env = Environment::new();
        env.register_builtin_operation::<_, (i64, i64)>("safe-div", safe_div);

        let expr_ok = read_expression("(safe-div 6 3)").unwrap();
        assert_eq!(eval(&expr_ok, &env).unwrap(), Value::Integer(2));

        let expr_err = read_expression("(safe-div 1 0)").unwrap();
        let msg = eval(&expr_err, &env).unwrap_err().to_string();
        assert!(msg.starts_with("DomainError: division by zero"));
        assert!(msg.contains("Context: while evaluating: (SAFE-DIV 1 0)"));
    }

    #[test]
    fn test_register_variadic_builtin_operation_with_explicit_arity() {
        fn largest(nums: NumIter<'_>) -> Value {
            nums.map(Number::to_f64).fold(f64::NEG_INFINITY, f64::max).into()
        }

        let env = Environment::new();
        env.register_variadic_builtin_operation::<_, (NumIter<'static>,)>(
            "largest",
            Arity::AtLeast(1),
            largest,
        );

        let expr = read_expression("(largest 1 7.5 3)").unwrap();
        assert_eq!(eval(&expr, &env).unwrap(), Value::Real(7.5));

        let expr = read_expression("(largest)").unwrap();
        assert!(matches!(
            eval(&expr, &env),
            Err(crate::Error::ArityError { expected: 1, got: 0, .. })
        ));
    }

    #[test]
    fn test_register_builtin_function_slice_api() {
        fn second(args: &[Value]) -> Result<Value, crate::Error> {
            args.get(1)
                .cloned()
                .ok_or_else(|| crate::Error::arity_error(2, args.len()))
        }

        let env = Environment::new();
        env.register_builtin_function("second", second);
        let expr = read_expression("(second 'a 'b 'c)").unwrap();
        assert_eq!(eval(&expr, &env).unwrap(), sym("b"));

        // Registered natives print by their normalized name
        let expr = read_expression("second").unwrap();
        assert_eq!(eval(&expr, &env).unwrap().to_string(), "#<NATIVE:SECOND>");
    }

    /// Test result variants for data-driven evaluation tests
    #[derive(Debug)]
    enum TestResult {
        EvalResult(Value),           // Evaluation should succeed with this value
        SpecificError(&'static str), // Evaluation should fail with error containing this string
        Error,                       // Evaluation should fail (any error)
    }
    use TestResult::*;

    /// Test cases that share one environment
    struct TestEnvironment(Vec<(&'static str, TestResult)>);

    fn success<T: Into<Value>>(value: T) -> TestResult {
        EvalResult(val(value))
    }

    /// Setup expressions such as DEFINE evaluate to NIL
    macro_rules! test_setup {
        ($expr:expr) => {
            ($expr, EvalResult(nil()))
        };
    }

    fn run_tests_in_environment(test_environments: Vec<TestEnvironment>) {
        for (env_idx, TestEnvironment(test_cases)) in test_environments.iter().enumerate() {
            let env = Environment::new();
            for (test_idx, (input, expected)) in test_cases.iter().enumerate() {
                let test_id = format!("Environment #{} test #{}", env_idx + 1, test_idx + 1);
                execute_test_case(input, expected, &env, &test_id);
            }
        }
    }

    fn execute_test_case(input: &str, expected: &TestResult, env: &Environment, test_id: &str) {
        let expr = match read_expression(input) {
            Ok(expr) => expr,
            Err(parse_err) => {
                panic!("{test_id}: unexpected parse error for '{input}': {parse_err:?}");
            }
        };

        match (eval(&expr, env), expected) {
            (Ok(actual), EvalResult(expected_val)) => {
                assert_eq!(actual, *expected_val, "{test_id}: wrong value for '{input}'");
            }
            (Err(_), Error) => {}
            (Err(e), SpecificError(expected_text)) => {
                let error_msg = format!("{e}");
                assert!(
                    error_msg.contains(expected_text),
                    "{test_id}: error should contain '{expected_text}', got: {error_msg}"
                );
            }
            (Ok(actual), Error) => {
                panic!("{test_id}: expected error, got {actual:?}");
            }
            (Ok(actual), SpecificError(expected_text)) => {
                panic!("{test_id}: expected error containing '{expected_text}', got {actual:?}");
            }
            (Err(err), EvalResult(expected_val)) => {
                panic!("{test_id}: expected {expected_val:?}, got error {err:?}");
            }
        }
    }

    fn run_comprehensive_tests(test_cases: Vec<(&str, TestResult)>) {
        for (i, (input, expected)) in test_cases.iter().enumerate() {
            let env = Environment::new();
            let test_id = format!("#{}", i + 1);
            execute_test_case(input, expected, &env, &test_id);
        }
    }

    #[test]
    #[expect(clippy::too_many_lines)] // Comprehensive test coverage is intentionally thorough
    fn test_comprehensive_operations_data_driven() {
        let test_cases = vec![
            // === SELF-EVALUATING FORMS ===
            ("42", success(42)),
            ("-271", success(-271)),
            ("2.5", success(2.5)),
            ("\"Case Kept\"", success("Case Kept")),
            ("#t", success(true)),
            ("#f", success(false)),
            ("nil", EvalResult(nil())),
            ("()", EvalResult(nil())),
            // === SYMBOLS ===
            ("undefined-var", SpecificError("UnboundSymbolError: UNDEFINED-VAR")),
            ("car", EvalResult(find_builtin_op("CAR").unwrap().to_value())),
            // === QUOTE ===
            ("'x", success(sym("x"))),
            ("'(1 (2 3))", success(vec![val(1), val([2, 3])])),
            ("(quote (a b))", success(vec![sym("a"), sym("b")])),
            ("''a", success(vec![sym("quote"), sym("a")])),
            ("(quote)", SpecificError("ArityError")),
            ("(quote a b)", SpecificError("ArityError")),
            // === IF ===
            ("(if #t 1 2)", success(1)),
            ("(if #f 1 2)", success(2)),
            ("(if nil 1 2)", success(2)),
            ("(if '() 1 2)", success(2)),
            ("(if 0 1 2)", success(1)),
            ("(if \"\" 1 2)", success(1)),
            ("(if '(nil) 1 2)", success(1)),
            ("(if #t 1)", SpecificError("ArityError: IF: expected 3 arguments, got 2")),
            ("(if #t 1 2 3)", SpecificError("ArityError")),
            ("(if #t 1 undefined)", success(1)),
            // === COND ===
            ("(cond (#f 1) (#t 2) (#t 3))", success(2)),
            ("(cond (#f 1) (else 9))", success(9)),
            ("(cond (#f 1))", EvalResult(nil())),
            ("(cond)", EvalResult(nil())),
            ("(cond ((+ 1 2)))", success(3)),
            ("(cond (#t 1 2 3))", success(3)),
            ("(cond (nil (error \"skipped\")) (1 'ok))", success(sym("ok"))),
            ("(cond 5)", SpecificError("TypeError")),
            // === BEGIN ===
            ("(begin)", EvalResult(nil())),
            ("(begin 1 2 3)", success(3)),
            // === OR / AND ===
            ("(or)", success(false)),
            ("(or #f nil 7 undefined)", success(7)),
            ("(or #f nil)", success(false)),
            ("(and)", success(true)),
            ("(and 1 2 3)", success(3)),
            ("(and 1 #f undefined)", success(false)),
            ("(and 1 nil)", success(false)),
            // === LET ===
            ("(let ((x 2) (y 3)) (+ x y))", success(5)),
            ("(let ((x 2) (y (* x 10))) y)", success(20)),
            ("(let () 1 2)", success(2)),
            ("(let ((x 1)))", EvalResult(nil())),
            ("(begin (let ((x 1)) x) x)", SpecificError("UnboundSymbolError: X")),
            // Each binding sees the earlier ones only
            ("(let ((y x) (x 1)) y)", SpecificError("UnboundSymbolError: X")),
            ("(let (x) x)", SpecificError("TypeError")),
            ("(let x x)", SpecificError("TypeError")),
            // === LAMBDA ===
            ("((lambda (x) (* x x)) 7)", success(49)),
            ("((lambda () 1 2 3))", success(3)),
            ("((lambda (a b) (list b a)) 1 2)", success([2, 1])),
            ("((lambda nil 5))", success(5)),
            ("((lambda (x) x))", SpecificError("ArityError: expected 1 arguments but got 0")),
            ("((lambda (x) x) 1 2)", SpecificError("ArityError")),
            (
                "((lambda (a b) (+ a b)) 1)",
                SpecificError("ArityError: expected 2 arguments but got 1"),
            ),
            (
                "((lambda (a b) (+ a b)) 1 2 3)",
                SpecificError("ArityError: expected 2 arguments but got 3"),
            ),
            ("((lambda (a b) (+ a b)) 1 (car nil))", Error),
            ("(lambda (x x) x)", SpecificError("duplicate parameter")),
            ("(lambda (1) x)", SpecificError("TypeError")),
            ("(lambda x x)", SpecificError("TypeError")),
            ("(lambda (x))", SpecificError("ArityError")),
            ("(quote)", Error),
            ("(car)", Error),
            // === APPLICATION ===
            ("(1 2 3)", SpecificError("NotApplicableError: cannot apply '1'")),
            ("(\"f\")", SpecificError("NotApplicableError")),
            ("((if #t + -) 5 3)", success(8)),
            ("((if #f + -) 5 3)", success(2)),
            ("(car (list (+ 1 2) (* 2 3)))", success(3)),
            // === DEFINE / DELETE errors ===
            ("(define 5 1)", SpecificError("TypeError")),
            ("(define \"x\" 1)", SpecificError("TypeError")),
            ("(define (5 x) 1)", SpecificError("TypeError")),
            ("(define x)", SpecificError("ArityError")),
            ("(delete undefined)", SpecificError("UnboundSymbolError")),
            ("(delete \"x\")", SpecificError("TypeError")),
            // === CONTEXT ===
            (
                "(+ 1 (car 5))",
                SpecificError("Context: while evaluating: (CAR 5)"),
            ),
            ("(load 5)", SpecificError("TypeError")),
            ("(load \"/nonexistent/zeta/file.lisp\")", SpecificError("IOError")),
        ];

        run_comprehensive_tests(test_cases);
    }

    #[test]
    fn test_stateful_environments() {
        let environment_test_cases = vec![
            TestEnvironment(vec![
                test_setup!("(define x 10)"),
                ("x", success(10)),
                test_setup!("(define x 20)"),
                ("x", success(20)),
                test_setup!("(delete x)"),
                ("x", SpecificError("UnboundSymbolError")),
            ]),
            TestEnvironment(vec![
                test_setup!("(define (square n) (* n n))"),
                ("(square 12)", success(144)),
                test_setup!("(define (two-step n) (define m (+ n 1)) (* m 2))"),
                ("(two-step 4)", success(10)),
                ("m", SpecificError("UnboundSymbolError")),
            ]),
            TestEnvironment(vec![
                // Closures see bindings added to their scope after creation
                test_setup!("(define (get-later) later)"),
                ("(get-later)", SpecificError("UnboundSymbolError: LATER")),
                test_setup!("(define later 'now-bound)"),
                ("(get-later)", success(sym("now-bound"))),
            ]),
            TestEnvironment(vec![
                test_setup!("(define (make-counter) (let ((n 0)) (lambda () n)))"),
                test_setup!("(define c (make-counter))"),
                ("(c)", success(0)),
            ]),
            TestEnvironment(vec![
                // Recursive and mutually recursive definitions
                test_setup!("(define (fact n) (if (= n 0) 1 (* n (fact (- n 1)))))"),
                ("(fact 5)", success(120)),
                ("(fact 20)", success(2_432_902_008_176_640_000_i64)),
                test_setup!("(define (is-even n) (if (= n 0) #t (is-odd (- n 1))))"),
                test_setup!("(define (is-odd n) (if (= n 0) #f (is-even (- n 1))))"),
                ("(is-even 10)", success(true)),
                ("(is-odd 7)", success(true)),
            ]),
            TestEnvironment(vec![
                // User definitions shadow natives until deleted
                test_setup!("(define car 'shadowed)"),
                ("car", success(sym("shadowed"))),
                test_setup!("(delete car)"),
                ("(car '(1 2))", success(1)),
            ]),
        ];

        run_tests_in_environment(environment_test_cases);
    }

    #[test]
    fn test_builtin_function_self_evaluation() {
        let env = Environment::new();
        eval(&read_expression("(define f +)").unwrap(), &env).unwrap();
        let result = eval(&read_expression("f").unwrap(), &env).unwrap();
        assert!(matches!(result, Value::BuiltinFunction { .. }));
        let again = eval(&result, &env).unwrap();
        assert_eq!(again, result);
    }

    #[test]
    fn test_tail_calls_run_in_constant_stack() {
        let env = Environment::new();
        let program = [
            "(define (count-down n) (if (= n 0) 'done (count-down (- n 1))))",
            "(define (loop-cond n acc) (cond ((= n 0) acc) (else (loop-cond (- n 1) (+ acc 1)))))",
            "(define (loop-let n) (let ((m (- n 1))) (if (< m 0) 'done (loop-let m))))",
            "(define (loop-begin n) (begin 1 (if (= n 0) 'done (loop-begin (- n 1)))))",
        ];
        for form in program {
            eval(&read_expression(form).unwrap(), &env).unwrap();
        }

        let cases = [
            ("(count-down 100000)", sym("done")),
            ("(loop-cond 100000 0)", val(100_000)),
            ("(loop-let 100000)", sym("done")),
            ("(loop-begin 100000)", sym("done")),
        ];
        for (input, expected) in cases {
            let result = eval(&read_expression(input).unwrap(), &env).unwrap();
            assert_eq!(result, expected, "{input}");
        }
    }

    #[test]
    fn test_evaluation_depth_limit() {
        let depth_test_environments = vec![TestEnvironment(vec![
            test_setup!("(define (make-deep depth) (if (= depth 0) 42 (+ 1 (make-deep (- depth 1)))))"),
            ("(make-deep 10)", success(52)),
            ("(make-deep 2000)", success(2042)),
            // Non-tail recursion is bounded
            ("(make-deep 20000)", SpecificError("RecursionError")),
        ])];

        run_tests_in_environment(depth_test_environments);
    }

    #[test]
    fn test_arguments_evaluate_left_to_right() {
        let env = Environment::new();
        let expr = read_expression("(list (error \"first\") (error \"second\"))").unwrap();
        assert_eq!(
            eval(&expr, &env).unwrap_err(),
            crate::Error::UserError("first".to_owned())
        );

        // The operator position is evaluated before any argument
        let expr = read_expression("((error \"operator\") (error \"argument\"))").unwrap();
        assert_eq!(
            eval(&expr, &env).unwrap_err(),
            crate::Error::UserError("operator".to_owned())
        );
    }
}
