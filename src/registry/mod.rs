//! Embedded expression callables and the facility that compiles them.
//!
//! The compiler never interprets expression source text. It hands each
//! [`Embedded`] fragment to an [`ExprCompiler`], which returns an
//! [`EmbeddedFn`]. At render time the callable receives [`Bindings`]
//! holding exactly the fragment's declared free names.
//!
//! [`Registry`] is the stock [`ExprCompiler`]: it maps source text to
//! callables registered by the host. There are two ways to register them:
//!
//! - **Closure-based**: Use [`ClosureExpr`] (or [`Registry::register_fn`])
//!   for simple cases where a full trait implementation would be
//!   boilerplate.
//! - **Trait-based**: Implement [`EmbeddedFn`] directly to declare typed
//!   parameters. The `#[weft_expr]` macro in the `weft_macros` crate
//!   generates such implementations from a function signature.

use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use crate::ast::{Embedded, Value};
use crate::error::{CompileError, RenderError, RenderErrorKind};

// ── Trait definitions ───────────────────────────────────────────────────

/// A compiled embedded expression.
///
/// `call` either produces a value or performs a side effect (the value of
/// an effect expression is discarded). Errors returned here propagate
/// unchanged to the consumer of the render stream.
pub trait EmbeddedFn: Send + Sync {
    /// Evaluate against the current values of the declared free names.
    fn call(&self, bindings: &Bindings<'_>) -> Result<Value, RenderError>;

    /// Declare the source this callable implements and the names it reads.
    ///
    /// Every parameter must be among the free names the parser declared
    /// for the fragment; this is checked when the document is compiled.
    fn signature(&self) -> ExprSignature;
}

/// Turns embedded expression fragments into callables.
pub trait ExprCompiler {
    fn compile(&self, expr: &Embedded) -> Result<Arc<dyn EmbeddedFn>, CompileError>;
}

impl<F> ExprCompiler for F
where
    F: Fn(&Embedded) -> Result<Arc<dyn EmbeddedFn>, CompileError>,
{
    fn compile(&self, expr: &Embedded) -> Result<Arc<dyn EmbeddedFn>, CompileError> {
        self(expr)
    }
}

// ── Signatures ──────────────────────────────────────────────────────────

/// Describes the source text a callable implements and the names it reads.
#[derive(Debug, Clone)]
pub struct ExprSignature {
    pub source: String,
    pub params: Vec<ParamDef>,
}

/// A named parameter read from [`Bindings`].
///
/// The compiled expression checks each binding against its parameter
/// before calling into the host.
#[derive(Debug, Clone)]
pub struct ParamDef {
    pub name: String,
    pub expected_type: Option<ValueType>,
    /// When `false`, a [`Value::None`] binding passes any type check.
    pub required: bool,
}

impl ParamDef {
    /// Validate the value bound to this parameter.
    pub fn check(&self, value: &Value) -> Result<(), RenderError> {
        if !self.required && *value == Value::None {
            return Ok(());
        }
        match self.expected_type {
            Some(expected) if !expected.matches(value) => Err(RenderError::new(
                RenderErrorKind::TypeError,
                format!(
                    "parameter `{}` expected {}, got {}",
                    self.name,
                    expected.name(),
                    value.type_name()
                ),
            )),
            _ => Ok(()),
        }
    }
}

/// Type tag used in signatures for runtime validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueType {
    String,
    Number,
    Bool,
    Array,
    /// Accepts any value type.
    Any,
}

impl ValueType {
    /// Check whether a runtime [`Value`] matches this type expectation.
    pub fn matches(&self, value: &Value) -> bool {
        match self {
            ValueType::Any => true,
            ValueType::String => matches!(value, Value::String(_)),
            ValueType::Number => matches!(value, Value::Number(_)),
            ValueType::Bool => matches!(value, Value::Bool(_)),
            ValueType::Array => matches!(value, Value::Array(_)),
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            ValueType::String => "string",
            ValueType::Number => "number",
            ValueType::Bool => "bool",
            ValueType::Array => "array",
            ValueType::Any => "any",
        }
    }
}

// ── Bindings ────────────────────────────────────────────────────────────

/// The values of an expression's declared free names, in declaration
/// order.
///
/// Values were located by address when the document was compiled; this
/// view only pairs them with their names.
pub struct Bindings<'a> {
    names: &'a [String],
    values: Vec<&'a Value>,
}

impl<'a> Bindings<'a> {
    /// Pair `names` with `values`. Both must be in the same order.
    pub fn new(names: &'a [String], values: Vec<&'a Value>) -> Self {
        debug_assert_eq!(names.len(), values.len());
        Self { names, values }
    }

    /// Look up a declared name. Asking for any other name is an
    /// [`UnboundName`](crate::RenderErrorKind::UnboundName) error.
    pub fn get(&self, name: &str) -> Result<&'a Value, RenderError> {
        self.value(name).ok_or_else(|| RenderError::unbound_name(name))
    }

    pub fn value(&self, name: &str) -> Option<&'a Value> {
        self.names
            .iter()
            .position(|n| n == name)
            .and_then(|i| self.values.get(i).copied())
    }

    fn iter(&self) -> impl Iterator<Item = (&'a str, &'a Value)> + '_ {
        self.names
            .iter()
            .map(String::as_str)
            .zip(self.values.iter().copied())
    }
}

impl fmt::Debug for Bindings<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_map().entries(self.iter()).finish()
    }
}

// ── Registry ────────────────────────────────────────────────────────────

/// Stores registered expression callables, keyed by source text.
///
/// As an [`ExprCompiler`], a fragment whose source is exactly one of its
/// declared free names compiles to a plain read of that binding, so simple
/// variable outputs need no registration.
///
/// ```rust
/// use weft::{Registry, Value};
///
/// let mut registry = Registry::new();
///
/// registry.register_fn("count * 2", |b| {
///     let n = b.get("count")?.as_number().unwrap_or(0.0);
///     Ok(Value::Number(n * 2.0))
/// });
/// ```
pub struct Registry {
    exprs: HashMap<String, Arc<dyn EmbeddedFn>>,
}

impl Registry {
    pub fn new() -> Self {
        Self {
            exprs: HashMap::new(),
        }
    }

    /// Register a callable under its signature's source text. If one with
    /// the same source already exists, it is replaced.
    pub fn register(&mut self, expr: impl EmbeddedFn + 'static) {
        let sig = expr.signature();
        self.exprs.insert(sig.source, Arc::new(expr));
    }

    /// Register a closure for `source`.
    pub fn register_fn<F>(&mut self, source: impl Into<String>, func: F)
    where
        F: Fn(&Bindings<'_>) -> Result<Value, RenderError> + Send + Sync + 'static,
    {
        self.register(ClosureExpr::new(source, func));
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::new()
    }
}

impl ExprCompiler for Registry {
    fn compile(&self, expr: &Embedded) -> Result<Arc<dyn EmbeddedFn>, CompileError> {
        if let Some(found) = self.exprs.get(&expr.source) {
            return Ok(Arc::clone(found));
        }

        let name = expr.source.trim();
        if expr.names.iter().any(|n| n == name) {
            return Ok(Arc::new(BindingRead {
                name: name.to_string(),
            }));
        }

        Err(CompileError::unknown_expression(&expr.source)
            .with_hint("register a callable for this source with `Registry::register`"))
    }
}

/// Reads one binding unchanged.
struct BindingRead {
    name: String,
}

impl EmbeddedFn for BindingRead {
    fn call(&self, bindings: &Bindings<'_>) -> Result<Value, RenderError> {
        bindings.get(&self.name).cloned()
    }

    fn signature(&self) -> ExprSignature {
        ExprSignature {
            source: self.name.clone(),
            params: vec![ParamDef {
                name: self.name.clone(),
                expected_type: Some(ValueType::Any),
                required: true,
            }],
        }
    }
}

// ── Closure-based convenience wrapper ───────────────────────────────────

/// An [`EmbeddedFn`] implementation backed by a closure.
///
/// Closure expressions declare no parameters; they may read any of the
/// fragment's declared names through [`Bindings::get`].
///
/// ```rust
/// use weft::{ClosureExpr, Value};
///
/// let expr = ClosureExpr::new("greeting", |b| {
///     let name = b.get("name")?.to_output_string();
///     Ok(Value::String(format!("Hello, {name}!")))
/// });
/// ```
pub struct ClosureExpr<F>
where
    F: Fn(&Bindings<'_>) -> Result<Value, RenderError> + Send + Sync,
{
    sig: ExprSignature,
    func: F,
}

impl<F> ClosureExpr<F>
where
    F: Fn(&Bindings<'_>) -> Result<Value, RenderError> + Send + Sync,
{
    pub fn new(source: impl Into<String>, func: F) -> Self {
        Self {
            sig: ExprSignature {
                source: source.into(),
                params: Vec::new(),
            },
            func,
        }
    }
}

impl<F> EmbeddedFn for ClosureExpr<F>
where
    F: Fn(&Bindings<'_>) -> Result<Value, RenderError> + Send + Sync,
{
    fn call(&self, bindings: &Bindings<'_>) -> Result<Value, RenderError> {
        (self.func)(bindings)
    }

    fn signature(&self) -> ExprSignature {
        self.sig.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::CompileErrorKind;

    #[test]
    fn test_bindings_only_expose_declared_names() {
        let names = vec!["a".to_string()];
        let one = Value::Number(1.0);
        let bindings = Bindings::new(&names, vec![&one]);
        assert_eq!(bindings.get("a").unwrap(), &Value::Number(1.0));
        let err = bindings.get("b").unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::UnboundName);
    }

    #[test]
    fn test_registry_compiles_registered_source() {
        let mut registry = Registry::new();
        registry.register_fn("a + 1", |b| {
            Ok(Value::Number(b.get("a")?.as_number().unwrap_or(0.0) + 1.0))
        });
        let func = registry.compile(&Embedded::new("a + 1", &["a"])).unwrap();

        let names = vec!["a".to_string()];
        let two = Value::Number(2.0);
        let result = func.call(&Bindings::new(&names, vec![&two])).unwrap();
        assert_eq!(result, Value::Number(3.0));
    }

    #[test]
    fn test_registry_reads_bare_names() {
        let registry = Registry::new();
        let func = registry.compile(&Embedded::new(" item ", &["item"])).unwrap();
        assert_eq!(func.signature().params[0].name, "item");

        let names = vec!["item".to_string()];
        let value = Value::from("x");
        let result = func.call(&Bindings::new(&names, vec![&value])).unwrap();
        assert_eq!(result, Value::from("x"));
    }

    #[test]
    fn test_registry_rejects_unknown_source() {
        let registry = Registry::new();
        let err = registry
            .compile(&Embedded::new("a.b()", &["a"]))
            .err()
            .expect("should not compile");
        assert_eq!(err.kind, CompileErrorKind::UnknownExpression);
        assert!(err.hint.is_some());
    }

    #[test]
    fn test_value_type_matching() {
        assert!(ValueType::Any.matches(&Value::None));
        assert!(ValueType::Array.matches(&Value::Array(Vec::new())));
        assert!(!ValueType::Number.matches(&Value::from("1")));
    }

    #[test]
    fn test_param_check() {
        let param = ParamDef {
            name: "items".into(),
            expected_type: Some(ValueType::Array),
            required: true,
        };
        assert!(param.check(&Value::from(vec!["a"])).is_ok());
        let err = param.check(&Value::None).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::TypeError);
        assert_eq!(err.message, "parameter `items` expected array, got none");

        let optional = ParamDef {
            required: false,
            ..param
        };
        assert!(optional.check(&Value::None).is_ok());
        assert!(optional.check(&Value::from("a")).is_err());
    }
}
