//! The node compiler.
//!
//! Compilation turns each [`Document`] into a [`Block`] of routines, one
//! routine per AST node. All static checks happen here, before anything
//! renders:
//!
//! - every block holds only lines,
//! - every embedded expression compiles, reads only names it declared,
//!   and each declared name is bound where the expression appears,
//! - every include names a document of the program.
//!
//! The resulting [`Program`] is immutable and can render any number of
//! times.

use std::fmt;
use std::sync::Arc;

use tracing::debug;

use crate::ast::*;
use crate::error::{CompileError, CompileErrorKind, RenderError};
use crate::registry::{Bindings, EmbeddedFn, ExprCompiler, ParamDef};
use crate::render::{self, Render, RenderOptions, Scope};

mod resolve;

pub use resolve::Address;
use resolve::StaticScope;

/// Scope name under which a `Transform` exposes its rendered block.
pub const TRANSFORM_BINDING: &str = "__block";

/// A set of compiled documents, any of which can be rendered or included.
///
/// ```rust
/// use weft::{Document, DocId, Line, Node, Program, Registry};
///
/// let doc = Document::new(vec![Line::new(vec![Node::literal("Hello!")]).into()]);
/// let program = Program::compile(&[doc], &Registry::new()).unwrap();
///
/// assert_eq!(program.render_to_string(DocId(0)).unwrap(), "Hello!");
/// assert_eq!(program.render_to_string(DocId(0)).unwrap(), "Hello!");
/// ```
#[derive(Debug)]
pub struct Program {
    documents: Vec<Block>,
}

impl Program {
    /// Compile every document, resolving embedded expressions through
    /// `compiler`.
    pub fn compile<C: ExprCompiler + ?Sized>(
        documents: &[Document],
        compiler: &C,
    ) -> Result<Self, CompileError> {
        let mut compiled = Vec::with_capacity(documents.len());
        for (index, document) in documents.iter().enumerate() {
            let mut cx = Compiler {
                exprs: compiler,
                scope: StaticScope::new(),
                document_count: documents.len(),
            };
            let block = cx.block(&document.nodes, "a document").map_err(|e| {
                let message = format!("in document {}: {}", DocId(index), e.message);
                CompileError { message, ..e }
            })?;
            compiled.push(block);
        }
        debug!(documents = compiled.len(), "compiled program");
        Ok(Self { documents: compiled })
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    /// Start a lazy render of `document` with default options.
    pub fn render(&self, document: DocId) -> Render<'_> {
        self.render_with_options(document, RenderOptions::default())
    }

    pub fn render_with_options(&self, document: DocId, options: RenderOptions) -> Render<'_> {
        render::start(self, document, options)
    }

    /// Render `document` and concatenate every chunk.
    pub fn render_to_string(&self, document: DocId) -> Result<String, RenderError> {
        self.render(document).into_string()
    }

    pub(crate) fn document(&self, id: DocId) -> Option<&Block> {
        self.documents.get(id.0)
    }
}

// ── Compiled routines ───────────────────────────────────────────────────

/// A block: the lines of a document root or of a control-flow body.
#[derive(Debug, Default)]
pub(crate) struct Block {
    pub(crate) lines: Vec<LineRoutine>,
}

#[derive(Debug)]
pub(crate) struct LineRoutine {
    pub(crate) children: Vec<Routine>,
    /// Source text of a newline-only line, emitted when it follows content.
    pub(crate) separator: Option<String>,
    pub(crate) indentation: Option<String>,
}

#[derive(Debug)]
pub(crate) enum Routine {
    Literal(String),
    Output { expr: CompiledExpr, raw: bool },
    Effect(CompiledExpr),
    Let {
        name: String,
        value: Option<CompiledExpr>,
        body: Block,
    },
    If {
        condition: CompiledExpr,
        then: Block,
        otherwise: Block,
    },
    Each(EachRoutine),
    Transform { expr: CompiledExpr, body: Block },
    Include(IncludeRoutine),
    Slot(String),
}

#[derive(Debug)]
pub(crate) struct EachRoutine {
    pub(crate) name: String,
    pub(crate) index_name: Option<String>,
    pub(crate) iterable: CompiledExpr,
    pub(crate) separator: Option<String>,
    pub(crate) body: Block,
    pub(crate) empty: Block,
}

#[derive(Debug)]
pub(crate) struct IncludeRoutine {
    pub(crate) target: DocId,
    pub(crate) bindings: Vec<(String, CompiledExpr)>,
    pub(crate) sections: Vec<SectionRoutine>,
}

#[derive(Debug)]
pub(crate) struct SectionRoutine {
    pub(crate) name: String,
    pub(crate) body: Block,
}

/// An embedded expression with its free names resolved to addresses.
pub(crate) struct CompiledExpr {
    source: String,
    names: Vec<String>,
    addresses: Vec<Address>,
    /// Declared parameters, each with the index of its name in `names`.
    params: Vec<(usize, ParamDef)>,
    func: Arc<dyn EmbeddedFn>,
}

impl CompiledExpr {
    pub(crate) fn eval(&self, scope: &Scope<'_>) -> Result<Value, RenderError> {
        let values = self
            .addresses
            .iter()
            .zip(&self.names)
            .map(|(address, name)| {
                scope
                    .resolve(*address)
                    .ok_or_else(|| RenderError::unbound_name(name))
            })
            .collect::<Result<Vec<_>, _>>()?;
        for (slot, param) in &self.params {
            if let Some(value) = values.get(*slot) {
                param.check(value)?;
            }
        }
        self.func.call(&Bindings::new(&self.names, values))
    }
}

impl fmt::Debug for CompiledExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CompiledExpr")
            .field("source", &self.source)
            .field("addresses", &self.addresses)
            .finish()
    }
}

// ── Compiler ────────────────────────────────────────────────────────────

struct Compiler<'c, C: ?Sized> {
    exprs: &'c C,
    scope: StaticScope,
    document_count: usize,
}

impl<C: ExprCompiler + ?Sized> Compiler<'_, C> {
    /// Compile a block, whose members must all be lines.
    fn block(&mut self, nodes: &[Node], what: &str) -> Result<Block, CompileError> {
        let lines = nodes
            .iter()
            .map(|node| match node {
                Node::Line(line) => self.line(line),
                other => Err(CompileError::structural(other.tag().as_str(), what)),
            })
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Block { lines })
    }

    /// Compile a block with one more scope frame holding `names`.
    fn block_with(
        &mut self,
        names: Vec<String>,
        nodes: &[Node],
        what: &str,
    ) -> Result<Block, CompileError> {
        self.scope.push(names);
        let block = self.block(nodes, what);
        self.scope.pop();
        block
    }

    fn line(&mut self, line: &Line) -> Result<LineRoutine, CompileError> {
        let children = line
            .children
            .iter()
            .filter(|child| !matches!(child, Node::Section(_)))
            .map(|child| self.node(child))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(LineRoutine {
            children,
            separator: line.is_newline.then(|| line.source.clone()),
            indentation: line.indentation.clone(),
        })
    }

    fn node(&mut self, node: &Node) -> Result<Routine, CompileError> {
        Ok(match node {
            Node::Line(_) => {
                return Err(CompileError::new(
                    CompileErrorKind::StructuralViolation,
                    "a line cannot appear directly inside another line",
                ));
            }
            Node::Section(section) => {
                return Err(CompileError::new(
                    CompileErrorKind::StructuralViolation,
                    format!("section `{}` must be declared on an include", section.name),
                ));
            }
            Node::Literal(text) => Routine::Literal(text.clone()),
            Node::Expression(kind, embedded) => {
                let expr = self.expr(embedded)?;
                match kind {
                    ExpressionKind::Normal => Routine::Output { expr, raw: false },
                    ExpressionKind::Inject => Routine::Output { expr, raw: true },
                    ExpressionKind::Effect => Routine::Effect(expr),
                }
            }
            Node::Let(node) => Routine::Let {
                name: node.name.clone(),
                value: node.expr.as_ref().map(|e| self.expr(e)).transpose()?,
                body: self.block_with(vec![node.name.clone()], &node.children, "a let")?,
            },
            Node::If(node) => Routine::If {
                condition: self.expr(&node.condition)?,
                then: self.block(&node.true_branch, "an if")?,
                otherwise: self.block(&node.false_branch, "an else")?,
            },
            Node::Each(node) => {
                let iterable = self.expr(&node.iterable)?;
                let mut names = vec![node.name.clone()];
                names.extend(node.index_name.iter().cloned());
                Routine::Each(EachRoutine {
                    name: node.name.clone(),
                    index_name: node.index_name.clone(),
                    iterable,
                    separator: node.line_separator.clone(),
                    body: self.block_with(names, &node.true_branch, "an each")?,
                    empty: self.block(&node.false_branch, "an each fallback")?,
                })
            }
            Node::Transform(node) => {
                let body = self.block(&node.children, "a transform")?;
                self.scope.push(vec![TRANSFORM_BINDING.to_string()]);
                let expr = self.expr(&node.expr);
                self.scope.pop();
                Routine::Transform { expr: expr?, body }
            }
            Node::Include(node) => Routine::Include(self.include(node)?),
            Node::Slot(name) => Routine::Slot(name.clone()),
        })
    }

    fn include(&mut self, node: &Include) -> Result<IncludeRoutine, CompileError> {
        if node.target.0 >= self.document_count {
            return Err(CompileError::new(
                CompileErrorKind::UnknownDocument,
                format!("include of unknown document {}", node.target),
            ));
        }

        let bindings = node
            .bindings
            .iter()
            .map(|binding| Ok((binding.name.clone(), self.expr(&binding.expr)?)))
            .collect::<Result<Vec<_>, CompileError>>()?;

        let sections = node
            .sections
            .iter()
            .map(|section| {
                Ok(SectionRoutine {
                    name: section.name.clone(),
                    body: self.block(&section.children, "a section")?,
                })
            })
            .collect::<Result<Vec<_>, CompileError>>()?;

        Ok(IncludeRoutine {
            target: node.target,
            bindings,
            sections,
        })
    }

    fn expr(&mut self, embedded: &Embedded) -> Result<CompiledExpr, CompileError> {
        let func = self.exprs.compile(embedded)?;

        let mut params = Vec::new();
        for param in func.signature().params {
            let Some(slot) = embedded.names.iter().position(|name| *name == param.name) else {
                return Err(CompileError::undeclared_name(&param.name, &embedded.source));
            };
            params.push((slot, param));
        }

        let addresses = embedded
            .names
            .iter()
            .map(|name| {
                self.scope.resolve(name).ok_or_else(|| {
                    CompileError::unbound_name(name, &embedded.source)
                        .with_hint("only names bound by an enclosing let, each or transform are visible")
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(CompiledExpr {
            source: embedded.source.clone(),
            names: embedded.names.clone(),
            addresses,
            params,
            func,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RenderErrorKind;
    use crate::registry::{ClosureExpr, ExprSignature, Registry, ValueType};

    fn line(children: Vec<Node>) -> Node {
        Line::new(children).into()
    }

    fn compile(nodes: Vec<Node>) -> Result<Program, CompileError> {
        Program::compile(&[Document::new(nodes)], &Registry::new())
    }

    #[test]
    fn test_root_must_hold_lines() {
        let err = compile(vec![Node::literal("bare")]).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::StructuralViolation);
        assert!(err.message.contains("literal"));
        assert!(err.message.contains("document #0"));
    }

    #[test]
    fn test_nested_blocks_must_hold_lines() {
        let node = Node::If(If {
            condition: Embedded::new("flag", &["flag"]),
            true_branch: vec![Node::literal("x")],
            false_branch: Vec::new(),
        });
        let doc = line(vec![Node::Let(Let {
            name: "flag".into(),
            expr: None,
            children: vec![line(vec![node])],
        })]);
        let err = compile(vec![doc]).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::StructuralViolation);
        assert!(err.message.contains("an if"));
    }

    #[test]
    fn test_line_inside_line_is_rejected() {
        let err = compile(vec![line(vec![line(vec![])])]).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::StructuralViolation);
    }

    #[test]
    fn test_free_names_must_be_bound() {
        let err = compile(vec![line(vec![Node::output("x", &["x"])])]).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnboundName);
        assert!(err.hint.is_some());
    }

    #[test]
    fn test_let_binds_for_its_children_only() {
        let inner = line(vec![Node::output("x", &["x"])]);
        let bound = Node::Let(Let {
            name: "x".into(),
            expr: None,
            children: vec![inner.clone()],
        });
        assert!(compile(vec![line(vec![bound])]).is_ok());

        let leaked = vec![
            line(vec![Node::Let(Let {
                name: "x".into(),
                expr: None,
                children: Vec::new(),
            })]),
            inner,
        ];
        assert_eq!(compile(leaked).unwrap_err().kind, CompileErrorKind::UnboundName);
    }

    #[test]
    fn test_evaluator_params_must_be_declared() {
        struct ReadsHidden;
        impl EmbeddedFn for ReadsHidden {
            fn call(&self, bindings: &Bindings<'_>) -> Result<Value, RenderError> {
                bindings.get("hidden").cloned()
            }
            fn signature(&self) -> ExprSignature {
                ExprSignature {
                    source: "peek".into(),
                    params: vec![ParamDef {
                        name: "hidden".into(),
                        expected_type: None,
                        required: true,
                    }],
                }
            }
        }

        let mut registry = Registry::new();
        registry.register(ReadsHidden);
        let doc = Document::new(vec![line(vec![Node::output("peek", &[])])]);
        let err = Program::compile(&[doc], &registry).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UndeclaredName);
    }

    #[test]
    fn test_declared_param_types_are_checked_before_the_call() {
        struct Doubles;
        impl EmbeddedFn for Doubles {
            fn call(&self, bindings: &Bindings<'_>) -> Result<Value, RenderError> {
                let n = bindings.get("n")?.as_number().unwrap_or_default();
                Ok(Value::Number(n * 2.0))
            }
            fn signature(&self) -> ExprSignature {
                ExprSignature {
                    source: "n * 2".into(),
                    params: vec![ParamDef {
                        name: "n".into(),
                        expected_type: Some(ValueType::Number),
                        required: false,
                    }],
                }
            }
        }

        let mut registry = Registry::new();
        registry.register(Doubles);
        registry.register_fn("21", |_| Ok(Value::Number(21.0)));
        registry.register_fn("'21'", |_| Ok(Value::from("21")));
        registry.register_fn("nothing", |_| Ok(Value::None));
        let doc = |source: &str| {
            Document::new(vec![line(vec![Node::Let(Let {
                name: "n".into(),
                expr: Some(Embedded::new(source, &[])),
                children: vec![line(vec![Node::output("n * 2", &["n"])])],
            })])])
        };
        let program =
            Program::compile(&[doc("21"), doc("'21'"), doc("nothing")], &registry).unwrap();

        assert_eq!(program.render_to_string(DocId(0)).unwrap(), "42");

        let err = program.render_to_string(DocId(1)).unwrap_err();
        assert_eq!(err.kind, RenderErrorKind::TypeError);
        assert!(err.message.contains("`n`"));
        assert!(err.message.contains("number"));

        // An optional parameter accepts an absent value
        assert_eq!(program.render_to_string(DocId(2)).unwrap(), "0");
    }

    #[test]
    fn test_transform_binding_is_only_visible_to_its_expression() {
        let mut registry = Registry::new();
        registry.register(ClosureExpr::new("shout", |b| {
            Ok(Value::String(b.get(TRANSFORM_BINDING)?.to_output_string().to_uppercase()))
        }));
        let transform = Node::Transform(Transform {
            expr: Embedded::new("shout", &[TRANSFORM_BINDING]),
            children: vec![line(vec![Node::literal("hi")])],
        });
        let ok = Document::new(vec![line(vec![transform])]);
        assert!(Program::compile(&[ok], &registry).is_ok());

        let leaked = Transform {
            expr: Embedded::new("shout", &[TRANSFORM_BINDING]),
            children: vec![line(vec![Node::output("__block", &[TRANSFORM_BINDING])])],
        };
        let bad = Document::new(vec![line(vec![Node::Transform(leaked)])]);
        let err = Program::compile(&[bad], &registry).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnboundName);
    }

    #[test]
    fn test_include_target_must_exist() {
        let include = Node::Include(Include {
            target: DocId(3),
            bindings: Vec::new(),
            sections: Vec::new(),
        });
        let err = compile(vec![line(vec![include])]).unwrap_err();
        assert_eq!(err.kind, CompileErrorKind::UnknownDocument);
    }

    #[test]
    fn test_sections_inside_lines_are_skipped() {
        let section = Section {
            name: "body".into(),
            children: vec![line(vec![Node::literal("x")])],
        };
        let program = compile(vec![line(vec![
            Node::literal("a"),
            Node::Section(section),
        ])])
        .unwrap();
        let root = program.document(DocId(0)).unwrap();
        assert_eq!(root.lines[0].children.len(), 1);
    }

    #[test]
    fn test_each_frame_holds_item_and_index() {
        let each = Node::Each(Each {
            name: "item".into(),
            index_name: Some("i".into()),
            iterable: Embedded::new("items", &["items"]),
            line_separator: None,
            true_branch: vec![line(vec![Node::output("i", &["i"])])],
            false_branch: Vec::new(),
        });
        let doc = line(vec![Node::Let(Let {
            name: "items".into(),
            expr: None,
            children: vec![line(vec![each])],
        })]);
        let program = compile(vec![doc]).unwrap();
        let Routine::Let { body, .. } = &program.document(DocId(0)).unwrap().lines[0].children[0]
        else {
            panic!("expected let");
        };
        let Routine::Each(each) = &body.lines[0].children[0] else {
            panic!("expected each");
        };
        let Routine::Output { expr, .. } = &each.body.lines[0].children[0] else {
            panic!("expected output");
        };
        assert_eq!(expr.addresses, vec![Address { depth: 0, slot: 1 }]);
        assert_eq!(each.iterable.addresses, vec![Address { depth: 0, slot: 0 }]);
    }
}
