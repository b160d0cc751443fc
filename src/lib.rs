//! # weft
//!
//! Compiles line-oriented template ASTs into lazy, streaming renderers.
//! A document is a tree of lines holding literal text, embedded
//! expressions and control flow (`Let`, `If`, `Each`, `Transform`,
//! `Include`, `Slot`). Compiling a set of documents yields a [`Program`];
//! rendering one of its documents yields a [`Render`], an iterator of
//! text chunks that does work only as the consumer pulls.
//!
//! The crate is split into two layers:
//!
//! - **The compiler and renderer** live here and never interpret embedded
//!   expression source text.
//! - **The host** turns expression fragments into callables by
//!   implementing [`ExprCompiler`], or by populating a [`Registry`].
//!
//! ## Quick start
//!
//! ```rust
//! use weft::{render, Document, Let, Line, Node, Registry, Value};
//!
//! let mut registry = Registry::new();
//! registry.register_fn("\"Alice\"", |_| Ok(Value::from("Alice")));
//!
//! let greeting = Line::new(vec![
//!     Node::literal("Hello, "),
//!     Node::output("name", &["name"]),
//!     Node::literal("!"),
//! ]);
//! let doc = Document::new(vec![
//!     Line::new(vec![Node::Let(Let {
//!         name: "name".into(),
//!         expr: Some(weft::Embedded::new("\"Alice\"", &[])),
//!         children: vec![greeting.into()],
//!     })])
//!     .into(),
//! ]);
//!
//! assert_eq!(render(&doc, &registry).unwrap(), "Hello, Alice!");
//! ```
//!
//! ## Streaming
//!
//! For incremental output, compile once with [`Program::compile`] and
//! pull chunks from [`Program::render`]:
//!
//! ```rust
//! use weft::{DocId, Document, Line, Node, Program, Registry};
//!
//! let doc = Document::new(vec![
//!     Line::new(vec![Node::literal("a")]).into(),
//!     Line::newline("\n").into(),
//!     Line::new(vec![Node::literal("b")]).into(),
//! ]);
//! let program = Program::compile(&[doc], &Registry::new()).unwrap();
//!
//! let chunks: Vec<String> = program
//!     .render(DocId(0))
//!     .map(|chunk| chunk.unwrap().into_owned())
//!     .collect();
//! assert_eq!(chunks, ["a", "\n", "b"]);
//! ```
//!
//! ## Render options
//!
//! Use [`RenderOptions`] to configure escaping, resource limits and
//! cancellation:
//!
//! ```rust
//! use weft::{DocId, Document, Escape, Line, Node, Program, Registry, RenderOptions, Value};
//!
//! let mut registry = Registry::new();
//! registry.register_fn("markup", |_| Ok(Value::from("<b>")));
//! let doc = Document::new(vec![Line::new(vec![Node::output("markup", &[])]).into()]);
//! let program = Program::compile(&[doc], &registry).unwrap();
//!
//! assert_eq!(program.render_to_string(DocId(0)).unwrap(), "&lt;b&gt;");
//!
//! let opts = RenderOptions::new().escape(Escape::None).max_iterations(1_000);
//! let raw = program.render_with_options(DocId(0), opts).into_string().unwrap();
//! assert_eq!(raw, "<b>");
//! ```

pub mod ast;
pub mod compile;
pub mod error;
pub mod registry;
pub mod render;

pub use ast::{
    DocId, Document, Each, Embedded, ExpressionKind, If, Include, IncludeBinding, Let, Line, Node,
    NodeTag, Section, Transform, Value,
};
pub use compile::{Address, Program, TRANSFORM_BINDING};
pub use error::{CompileError, CompileErrorKind, RenderError, RenderErrorKind};
pub use registry::{
    Bindings, ClosureExpr, EmbeddedFn, ExprCompiler, ExprSignature, ParamDef, Registry, ValueType,
};
pub use render::{
    Chunk, Context, Escape, Normalized, Render, RenderOptions, Scope, is_newline, normalize,
};

/// Compile a single document and render it to a string in one step.
///
/// For repeated rendering, or for documents that include one another,
/// prefer [`Program::compile`].
pub fn render<C: ExprCompiler + ?Sized>(document: &Document, compiler: &C) -> Result<String, Error> {
    let program = Program::compile(std::slice::from_ref(document), compiler)?;
    Ok(program.render_to_string(DocId(0))?)
}

/// Combined error type returned by [`render`].
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// The document failed a static check.
    #[error(transparent)]
    Compile(#[from] CompileError),
    /// The render stream failed.
    #[error(transparent)]
    Render(#[from] RenderError),
}
