//! Forms that control the evaluation of their own arguments.
//!
//! Each handler receives the unevaluated argument expressions and returns a
//! [`Step`]: either a finished value, or an expression for the evaluator loop
//! to continue with. Continuing through the loop is what keeps `IF`, `COND`,
//! `BEGIN` and `LET` bodies from growing the native stack.

use std::rc::Rc;

use tracing::debug;

use super::{Step, eval_with_depth_tracking};
use crate::Error;
use crate::ast::{Closure, Symbol, Value, nil};
use crate::evaluator::Environment;
use crate::reader::read_program;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SpecialForm {
    Quote,
    Lambda,
    Let,
    If,
    Cond,
    Begin,
    Or,
    And,
    Define,
    Delete,
    Load,
}

impl SpecialForm {
    pub(crate) fn from_symbol(name: &Symbol) -> Option<Self> {
        let form = match name.as_str() {
            "QUOTE" => SpecialForm::Quote,
            "LAMBDA" => SpecialForm::Lambda,
            "LET" => SpecialForm::Let,
            "IF" => SpecialForm::If,
            "COND" => SpecialForm::Cond,
            "BEGIN" => SpecialForm::Begin,
            "OR" => SpecialForm::Or,
            "AND" => SpecialForm::And,
            "DEFINE" => SpecialForm::Define,
            "DELETE" => SpecialForm::Delete,
            "LOAD" => SpecialForm::Load,
            _ => return None,
        };
        Some(form)
    }

    pub(crate) fn eval(
        self,
        args: &[Value],
        env: &Environment,
        depth: usize,
    ) -> Result<Step, Error> {
        match self {
            SpecialForm::Quote => eval_quote(args),
            SpecialForm::Lambda => eval_lambda(args, env),
            SpecialForm::Let => eval_let(args, env, depth),
            SpecialForm::If => eval_if(args, env, depth),
            SpecialForm::Cond => eval_cond(args, env, depth),
            SpecialForm::Begin => eval_sequence(args, env, depth),
            SpecialForm::Or => eval_or(args, env, depth),
            SpecialForm::And => eval_and(args, env, depth),
            SpecialForm::Define => eval_define(args, env, depth),
            SpecialForm::Delete => eval_delete(args, env),
            SpecialForm::Load => eval_load(args, env, depth),
        }
    }
}

fn eval_quote(args: &[Value]) -> Result<Step, Error> {
    match args {
        [expr] => Ok(Step::Done(expr.clone())),
        _ => Err(Error::arity_error(1, args.len())),
    }
}

/// Evaluate all but the last expression for effect and continue with the last
fn eval_sequence(exprs: &[Value], env: &Environment, depth: usize) -> Result<Step, Error> {
    match exprs {
        [] => Ok(Step::Done(nil())),
        [init @ .., last] => {
            for expr in init {
                eval_with_depth_tracking(expr, env, depth + 1)?;
            }
            Ok(Step::Tail(last.clone()))
        }
    }
}

/// Build a closure from a formals list and one or more body forms
fn make_closure(formals: &Value, body: &[Value], env: &Environment) -> Result<Value, Error> {
    let Value::List(formals) = formals else {
        return Err(Error::TypeError(format!(
            "lambda parameters must be a list, got {formals}"
        )));
    };

    let mut params: Vec<Symbol> = Vec::with_capacity(formals.len());
    for formal in formals {
        match formal {
            Value::Symbol(name) if params.contains(name) => {
                return Err(Error::TypeError(format!("duplicate parameter name: {name}")));
            }
            Value::Symbol(name) => params.push(name.clone()),
            other => {
                return Err(Error::TypeError(format!(
                    "lambda parameters must be symbols, got {other}"
                )));
            }
        }
    }

    let body = match body {
        [] => return Err(Error::arity_error(2, 1)),
        [single] => single.clone(),
        many => {
            let mut forms = Vec::with_capacity(many.len() + 1);
            forms.push(Value::Symbol(Symbol::new("BEGIN")));
            forms.extend_from_slice(many);
            Value::List(forms)
        }
    };

    Ok(Value::Closure(Rc::new(Closure {
        params,
        body,
        env: env.clone(),
    })))
}

fn eval_lambda(args: &[Value], env: &Environment) -> Result<Step, Error> {
    match args {
        [formals, body @ ..] => make_closure(formals, body, env).map(Step::Done),
        [] => Err(Error::arity_error(2, 0)),
    }
}

/// Sequential bindings in a fresh child scope; later bindings see earlier ones
fn eval_let(args: &[Value], env: &Environment, depth: usize) -> Result<Step, Error> {
    let [bindings, body @ ..] = args else {
        return Err(Error::arity_error(1, 0));
    };
    let Value::List(bindings) = bindings else {
        return Err(Error::TypeError(format!(
            "let bindings must be a list, got {bindings}"
        )));
    };

    let scope = env.child();
    for binding in bindings {
        match binding {
            Value::List(pair) => match pair.as_slice() {
                [Value::Symbol(name), expr] => {
                    let value = eval_with_depth_tracking(expr, &scope, depth + 1)?;
                    scope.define(name.clone(), value);
                }
                _ => {
                    return Err(Error::TypeError(format!(
                        "let binding must be (name expr), got {binding}"
                    )));
                }
            },
            other => {
                return Err(Error::TypeError(format!(
                    "let binding must be (name expr), got {other}"
                )));
            }
        }
    }

    match body {
        [] => Ok(Step::Done(nil())),
        [init @ .., last] => {
            for expr in init {
                eval_with_depth_tracking(expr, &scope, depth + 1)?;
            }
            Ok(Step::TailIn(last.clone(), scope))
        }
    }
}

fn eval_if(args: &[Value], env: &Environment, depth: usize) -> Result<Step, Error> {
    match args {
        [condition, consequent, alternative] => {
            let test = eval_with_depth_tracking(condition, env, depth + 1)?;
            let branch = if test.is_truthy() {
                consequent
            } else {
                alternative
            };
            Ok(Step::Tail(branch.clone()))
        }
        _ => Err(Error::arity_error_with_expr(
            3,
            args.len(),
            "IF".to_owned(),
        )),
    }
}

fn eval_cond(clauses: &[Value], env: &Environment, depth: usize) -> Result<Step, Error> {
    for clause in clauses {
        let Value::List(parts) = clause else {
            return Err(Error::TypeError(format!(
                "cond clause must be a list, got {clause}"
            )));
        };
        let [test, body @ ..] = parts.as_slice() else {
            return Err(Error::TypeError("cond clause must not be empty".to_owned()));
        };

        let result = match test {
            Value::Symbol(name) if name.as_str() == "ELSE" => Value::Bool(true),
            _ => eval_with_depth_tracking(test, env, depth + 1)?,
        };
        if result.is_truthy() {
            return match body {
                [] => Ok(Step::Done(result)),
                _ => eval_sequence(body, env, depth),
            };
        }
    }
    Ok(Step::Done(nil()))
}

fn eval_or(args: &[Value], env: &Environment, depth: usize) -> Result<Step, Error> {
    for arg in args {
        let value = eval_with_depth_tracking(arg, env, depth + 1)?;
        if value.is_truthy() {
            return Ok(Step::Done(value));
        }
    }
    Ok(Step::Done(Value::Bool(false)))
}

fn eval_and(args: &[Value], env: &Environment, depth: usize) -> Result<Step, Error> {
    let mut last = Value::Bool(true);
    for arg in args {
        last = eval_with_depth_tracking(arg, env, depth + 1)?;
        if !last.is_truthy() {
            return Ok(Step::Done(Value::Bool(false)));
        }
    }
    Ok(Step::Done(last))
}

/// `(DEFINE name expr)` or `(DEFINE (name formal...) body...)`, always in
/// the current scope
fn eval_define(args: &[Value], env: &Environment, depth: usize) -> Result<Step, Error> {
    match args {
        [Value::Symbol(name), expr] => {
            let value = eval_with_depth_tracking(expr, env, depth + 1)?;
            env.define(name.clone(), value);
        }
        [Value::Symbol(_), ..] => return Err(Error::arity_error(2, args.len())),
        [head @ Value::List(signature), body @ ..] => {
            let [Value::Symbol(name), formals @ ..] = signature.as_slice() else {
                return Err(Error::TypeError(format!(
                    "define expects a function name, got {head}"
                )));
            };
            let closure = make_closure(&Value::List(formals.to_vec()), body, env)?;
            env.define(name.clone(), closure);
        }
        [other, ..] => {
            return Err(Error::TypeError(format!(
                "define expects a symbol or a list, got {other}"
            )));
        }
        [] => return Err(Error::arity_error(2, 0)),
    }
    Ok(Step::Done(nil()))
}

fn eval_delete(args: &[Value], env: &Environment) -> Result<Step, Error> {
    match args {
        [Value::Symbol(name)] => {
            env.remove(name)?;
            Ok(Step::Done(nil()))
        }
        [other] => Err(Error::TypeError(format!(
            "delete expects a symbol, got {other}"
        ))),
        _ => Err(Error::arity_error(1, args.len())),
    }
}

/// Read a file and evaluate each form in the current scope
fn eval_load(args: &[Value], env: &Environment, depth: usize) -> Result<Step, Error> {
    let [path_expr] = args else {
        return Err(Error::arity_error(1, args.len()));
    };
    let path = match eval_with_depth_tracking(path_expr, env, depth + 1)? {
        Value::String(path) => path,
        other => {
            return Err(Error::TypeError(format!(
                "load expects a string path, got {other}"
            )));
        }
    };

    debug!(path = %path, "loading file");
    let text = std::fs::read_to_string(&path).map_err(|e| Error::io(path.as_str(), &e))?;
    let forms = read_program(&text)?;
    debug!(path = %path, forms = forms.len(), "read file");

    let mut value = nil();
    for form in &forms {
        value = eval_with_depth_tracking(form, env, depth + 1)?;
    }
    Ok(Step::Done(value))
}
