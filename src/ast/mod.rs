//! Abstract syntax tree types consumed by the compiler.
//!
//! The tree is produced by an external parser and is line oriented: every
//! block (a document root, the body of a `Let`, `If`, `Each`, `Transform`
//! or `Section`) is a sequence of [`Line`] nodes, and lines hold the
//! literal text, expressions and nested control flow.
//!
//! Embedded expressions are carried as opaque [`Embedded`] fragments
//! together with their free variable names. Their runtime results are
//! [`Value`]s.

pub mod node;
pub mod value;

// Convenience re-exports
pub use node::*;
pub use value::Value;
