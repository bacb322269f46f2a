use crate::Error;
use crate::ast::{Symbol, Value};
use crate::builtinops::{Arity, with_arity};
use crate::evaluator::intooperation::{IntoOperation, IntoVariadicOperation, OperationFn};
use std::cell::RefCell;
use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;
use std::sync::Arc;

struct Scope {
    bindings: HashMap<Symbol, Value>,
    parent: Option<Environment>,
}

/// A handle to one scope in a chain of lexical scopes.
///
/// Cloning the handle shares the scope: a `define` through any clone is seen
/// by every other holder, including closures that captured it. The scope
/// with no parent is the global scope.
#[derive(Clone)]
pub struct Environment(Rc<RefCell<Scope>>);

impl Default for Environment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment {
    /// A fresh global scope
    pub fn new() -> Self {
        Environment(Rc::new(RefCell::new(Scope {
            bindings: HashMap::new(),
            parent: None,
        })))
    }

    /// A new empty scope whose parent is this one
    pub fn child(&self) -> Self {
        Environment(Rc::new(RefCell::new(Scope {
            bindings: HashMap::new(),
            parent: Some(self.clone()),
        })))
    }

    /// Bind `name` in this scope, replacing any existing binding here
    pub fn define(&self, name: Symbol, value: Value) {
        self.0.borrow_mut().bindings.insert(name, value);
    }

    pub fn is_global(&self) -> bool {
        self.0.borrow().parent.is_none()
    }

    fn parent(&self) -> Option<Environment> {
        self.0.borrow().parent.clone()
    }

    /// Find the innermost binding of `name`
    pub fn get(&self, name: &Symbol) -> Option<Value> {
        let mut scope = self.clone();
        loop {
            if let Some(value) = scope.0.borrow().bindings.get(name) {
                return Some(value.clone());
            }
            scope = scope.parent()?;
        }
    }

    /// Like [`Environment::get`], but a missing binding is an error
    pub fn lookup(&self, name: &Symbol) -> Result<Value, Error> {
        self.get(name)
            .ok_or_else(|| Error::UnboundSymbol(name.to_string()))
    }

    /// Remove the innermost binding of `name` from the scope that owns it
    pub fn remove(&self, name: &Symbol) -> Result<Value, Error> {
        let mut scope = self.clone();
        loop {
            if let Some(value) = scope.0.borrow_mut().bindings.remove(name) {
                return Ok(value);
            }
            scope = scope
                .parent()
                .ok_or_else(|| Error::UnboundSymbol(name.to_string()))?;
        }
    }

    /// All visible bindings, inner scopes shadowing outer ones, sorted by name
    pub fn get_all_bindings(&self) -> Vec<(Symbol, Value)> {
        let mut bindings = HashMap::new();
        let mut scope = Some(self.clone());
        while let Some(current) = scope {
            for (name, value) in &current.0.borrow().bindings {
                bindings
                    .entry(name.clone())
                    .or_insert_with(|| value.clone());
            }
            scope = current.parent();
        }

        let mut result: Vec<_> = bindings.into_iter().collect();
        result.sort_by(|a, b| a.0.cmp(&b.0));
        result
    }

    fn define_native(&self, name: &str, func: Arc<OperationFn>) {
        let name = Symbol::new(name);
        self.define(
            name.clone(),
            Value::BuiltinFunction {
                id: name.to_string(),
                func,
            },
        );
    }

    /// Register a native that works on the raw argument slice.
    ///
    /// ```
    /// use zeta::{Environment, Error, Value, eval, read_expression};
    ///
    /// fn count_args(args: &[Value]) -> Result<Value, Error> {
    ///     Ok(Value::Integer(args.len() as i64))
    /// }
    ///
    /// let env = Environment::new();
    /// env.register_builtin_function("count-args", count_args);
    /// let expr = read_expression("(count-args 1 2 3)").unwrap();
    /// assert_eq!(eval(&expr, &env).unwrap(), Value::Integer(3));
    /// ```
    pub fn register_builtin_function(&self, name: &str, func: fn(&[Value]) -> Result<Value, Error>) {
        self.define_native(name, Arc::new(move |args: Vec<Value>| func(&args)));
    }

    /// Register a typed Rust function as a native.
    ///
    /// Parameters may be `Value`, `i64`, [`crate::ast::Number`], or a list
    /// argument as [`ValueIter`](crate::evaluator::ValueIter) /
    /// [`NumIter`](crate::evaluator::NumIter). The return type may be anything
    /// `Into<Value>`, or `Result<T, Error>` of such a type. Arity comes from
    /// the signature; conversion failures are `TypeError`s.
    ///
    /// ```rust,ignore
    /// fn hypot(a: Number, b: Number) -> f64 {
    ///     a.to_f64().hypot(b.to_f64())
    /// }
    /// env.register_builtin_operation::<_, (Number, Number)>("hypot", hypot);
    /// ```
    pub fn register_builtin_operation<F, Args>(&self, name: &str, func: F)
    where
        F: IntoOperation<Args> + 'static,
    {
        self.define_native(name, func.into_operation());
    }

    /// Register a native whose last parameter collects the remaining
    /// arguments, e.g. `fn(NumIter<'_>) -> R` or `fn(Value, ValueIter<'_>) -> R`.
    ///
    /// The minimum count is not derivable from such a signature, so `arity`
    /// is checked before the function runs.
    pub fn register_variadic_builtin_operation<F, Args>(&self, name: &str, arity: Arity, func: F)
    where
        F: IntoVariadicOperation<Args> + 'static,
    {
        self.define_native(name, with_arity(arity, func.into_variadic_operation()));
    }
}

impl PartialEq for Environment {
    fn eq(&self, other: &Self) -> bool {
        Rc::ptr_eq(&self.0, &other.0)
    }
}

// Scopes can contain closures that capture the scope itself, so Debug
// must not recurse into bindings.
impl fmt::Debug for Environment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let scope = self.0.borrow();
        f.debug_struct("Environment")
            .field("bindings", &scope.bindings.len())
            .field("global", &scope.parent.is_none())
            .finish()
    }
}
