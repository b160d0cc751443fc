//! Error types for compilation and rendering.
//!
//! [`CompileError`] is produced while turning a [`Document`](crate::Document)
//! into a [`Program`](crate::Program), before any output exists.
//! [`RenderError`] is produced while a render stream is drained and can
//! originate from the renderer itself or from an embedded expression.

use std::sync::Arc;
use thiserror::Error;

// ── Compile errors ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct CompileError {
    pub kind: CompileErrorKind,
    pub message: String,
    pub hint: Option<String>,
}

impl CompileError {
    pub fn new(kind: CompileErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            hint: None,
        }
    }

    pub fn with_hint(mut self, hint: impl Into<String>) -> Self {
        self.hint = Some(hint.into());
        self
    }

    pub fn structural(found: &str, block: &str) -> Self {
        Self::new(
            CompileErrorKind::StructuralViolation,
            format!("expected only lines within {block}, found {found}"),
        )
    }

    pub fn unbound_name(name: &str, source: &str) -> Self {
        Self::new(
            CompileErrorKind::UnboundName,
            format!("unbound name `{name}` in expression `{source}`"),
        )
    }

    pub fn undeclared_name(name: &str, source: &str) -> Self {
        Self::new(
            CompileErrorKind::UndeclaredName,
            format!("expression `{source}` reads `{name}`, which is not among its free names"),
        )
    }

    pub fn unknown_expression(source: &str) -> Self {
        Self::new(
            CompileErrorKind::UnknownExpression,
            format!("no evaluator registered for expression `{source}`"),
        )
    }

    /// Render the error with its hint, for diagnostics.
    pub fn format_with_hint(&self) -> String {
        match &self.hint {
            Some(hint) => format!("Error: {}\n  = hint: {hint}", self.message),
            None => format!("Error: {}", self.message),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompileErrorKind {
    /// A block contains a node that is not a line.
    StructuralViolation,
    /// A node tag string did not name a known node variant.
    UnrecognizedNodeKind,
    /// An expression tag string did not name a known expression kind.
    UnrecognizedExpressionKind,
    /// An expression's free name is not bound where the expression appears.
    UnboundName,
    /// An evaluator reads a name the expression did not declare.
    UndeclaredName,
    /// The expression compiler has nothing for this source text.
    UnknownExpression,
    /// An include names a document that is not part of the program.
    UnknownDocument,
}

// ── Render errors ───────────────────────────────────────────────────────

/// An error that occurs while a render stream is drained.
///
/// Carries a structured [`RenderErrorKind`], a human-readable message and
/// an optional underlying error cause. A render stream stops at its first
/// error; chunks produced before it have already reached the consumer.
///
/// # Error chaining
///
/// Embedded expressions that fail because of an underlying error can keep
/// the original chain with [`with_source`](RenderError::with_source):
///
/// ```rust
/// use weft::RenderError;
///
/// fn example() -> Result<(), RenderError> {
///     let parse_err = "x".parse::<i32>().unwrap_err();
///     Err(RenderError::evaluation("bad number").with_source(parse_err))
/// }
/// ```
#[derive(Debug, Clone, Error)]
#[error("{message}")]
pub struct RenderError {
    pub kind: RenderErrorKind,
    pub message: String,
    /// The underlying error that caused this render error, if any.
    ///
    /// Wrapped in `Arc` so that `RenderError` remains `Clone`.
    #[source]
    pub source: Option<Arc<dyn std::error::Error + Send + Sync>>,
}

impl RenderError {
    pub fn new(kind: RenderErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            source: None,
        }
    }

    /// Attach an underlying error cause to this render error.
    pub fn with_source(mut self, source: impl std::error::Error + Send + Sync + 'static) -> Self {
        self.source = Some(Arc::new(source));
        self
    }

    // Convenience constructors for common error types

    pub fn unbound_name(name: &str) -> Self {
        Self::new(RenderErrorKind::UnboundName, format!("unbound name: {name}"))
    }

    pub fn type_error(expected: &str, got: &str) -> Self {
        Self::new(
            RenderErrorKind::TypeError,
            format!("expected {expected}, got {got}"),
        )
    }

    pub fn not_iterable(got: &str) -> Self {
        Self::new(
            RenderErrorKind::NotIterable,
            format!("each requires an array, got {got}"),
        )
    }

    pub fn evaluation(message: impl Into<String>) -> Self {
        Self::new(RenderErrorKind::Evaluation, message)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RenderErrorKind {
    UnboundName,
    TypeError,
    NotIterable,
    /// Raised by an embedded expression.
    Evaluation,
    /// A section was entered again while its first rendering was still
    /// being drained.
    ReentrantSection,
    RecursionLimit,
    /// A render or include named a document the program does not hold.
    UnknownDocument,
    /// The render exceeded a configured iteration cap.
    ResourceLimit,
    /// The render was cancelled via an external cancellation token.
    Cancelled,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_render_error_keeps_source() {
        let cause = "x".parse::<i32>().unwrap_err();
        let err = RenderError::evaluation("bad number").with_source(cause);
        assert_eq!(err.kind, RenderErrorKind::Evaluation);
        assert!(err.source().is_some());
        assert_eq!(err.to_string(), "bad number");
    }

    #[test]
    fn test_compile_error_hint_formatting() {
        let err = CompileError::unbound_name("x", "x + 1").with_hint("bind `x` with a let");
        assert_eq!(
            err.format_with_hint(),
            "Error: unbound name `x` in expression `x + 1`\n  = hint: bind `x` with a let"
        );
    }
}
