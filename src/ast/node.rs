use std::fmt;
use std::str::FromStr;

use crate::error::{CompileError, CompileErrorKind};

/// Index of a [`Document`] within the slice handed to
/// [`Program::compile`](crate::Program::compile). Used by [`Include`] to
/// name its target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct DocId(pub usize);

impl fmt::Display for DocId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// A parsed template. Its nodes form the root block, so every one of them
/// must be a [`Node::Line`].
#[derive(Debug, Clone, Default)]
pub struct Document {
    pub nodes: Vec<Node>,
}

impl Document {
    pub fn new(nodes: Vec<Node>) -> Self {
        Self { nodes }
    }
}

/// One node of the template tree, as produced by an external parser.
#[derive(Debug, Clone)]
pub enum Node {
    /// A single logical output line.
    Line(Line),

    /// Static text.
    Literal(String),

    /// An embedded expression in output position.
    Expression(ExpressionKind, Embedded),

    /// Binds a name for the nested block.
    Let(Let),

    /// Conditional block.
    If(If),

    /// Loop block, with an optional fallback for empty sequences.
    Each(Each),

    /// Renders a block to a string and post-processes it with an expression.
    Transform(Transform),

    /// Renders another document of the same program.
    Include(Include),

    /// Dispatches to a [`Section`] supplied by the including document.
    Slot(String),

    /// A named block body. Sections are declared on an [`Include`]; when the
    /// parser also leaves them among a line's children they are skipped
    /// there.
    Section(Section),
}

impl Node {
    pub fn literal(text: impl Into<String>) -> Self {
        Node::Literal(text.into())
    }

    /// An escaped expression output.
    pub fn output(source: impl Into<String>, names: &[&str]) -> Self {
        Node::Expression(ExpressionKind::Normal, Embedded::new(source, names))
    }

    /// A raw (unescaped) expression output.
    pub fn inject(source: impl Into<String>, names: &[&str]) -> Self {
        Node::Expression(ExpressionKind::Inject, Embedded::new(source, names))
    }

    /// An expression evaluated only for its side effects.
    pub fn effect(source: impl Into<String>, names: &[&str]) -> Self {
        Node::Expression(ExpressionKind::Effect, Embedded::new(source, names))
    }

    pub fn slot(name: impl Into<String>) -> Self {
        Node::Slot(name.into())
    }

    pub fn tag(&self) -> NodeTag {
        match self {
            Node::Line(_) => NodeTag::Line,
            Node::Literal(_) => NodeTag::Literal,
            Node::Expression(..) => NodeTag::Expression,
            Node::Let(_) => NodeTag::Let,
            Node::If(_) => NodeTag::If,
            Node::Each(_) => NodeTag::Each,
            Node::Transform(_) => NodeTag::Transform,
            Node::Include(_) => NodeTag::Include,
            Node::Slot(_) => NodeTag::Slot,
            Node::Section(_) => NodeTag::Section,
        }
    }
}

/// The variant tag of a [`Node`], for parsers that build the tree from
/// tagged records.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum NodeTag {
    Line,
    Literal,
    Expression,
    Let,
    If,
    Each,
    Transform,
    Include,
    Slot,
    Section,
}

impl NodeTag {
    pub fn as_str(&self) -> &'static str {
        match self {
            NodeTag::Line => "line",
            NodeTag::Literal => "literal",
            NodeTag::Expression => "expression",
            NodeTag::Let => "let",
            NodeTag::If => "if",
            NodeTag::Each => "each",
            NodeTag::Transform => "transform",
            NodeTag::Include => "include",
            NodeTag::Slot => "slot",
            NodeTag::Section => "section",
        }
    }
}

impl fmt::Display for NodeTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for NodeTag {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "line" => NodeTag::Line,
            "literal" => NodeTag::Literal,
            "expression" => NodeTag::Expression,
            "let" => NodeTag::Let,
            "if" => NodeTag::If,
            "each" => NodeTag::Each,
            "transform" => NodeTag::Transform,
            "include" => NodeTag::Include,
            "slot" => NodeTag::Slot,
            "section" => NodeTag::Section,
            other => {
                return Err(CompileError::new(
                    CompileErrorKind::UnrecognizedNodeKind,
                    format!("unrecognized node kind: {other}"),
                ));
            }
        })
    }
}

/// How an [`Node::Expression`] contributes to the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ExpressionKind {
    /// Normalized and escaped.
    Normal,
    /// Normalized without escaping.
    Inject,
    /// Evaluated for side effects; produces no output.
    Effect,
}

impl FromStr for ExpressionKind {
    type Err = CompileError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "normal" => Ok(ExpressionKind::Normal),
            "inject" => Ok(ExpressionKind::Inject),
            "effect" => Ok(ExpressionKind::Effect),
            other => Err(CompileError::new(
                CompileErrorKind::UnrecognizedExpressionKind,
                format!("unrecognized expression kind: {other}"),
            )),
        }
    }
}

/// An embedded expression fragment: its source text and the free variable
/// names the parser found in it.
///
/// The source is opaque to this crate. It is handed to an
/// [`ExprCompiler`](crate::ExprCompiler), and the names are resolved
/// against the enclosing bindings when the document is compiled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Embedded {
    pub source: String,
    pub names: Vec<String>,
}

impl Embedded {
    pub fn new(source: impl Into<String>, names: &[&str]) -> Self {
        Self {
            source: source.into(),
            names: names.iter().map(|n| n.to_string()).collect(),
        }
    }
}

/// A single logical output line.
///
/// `is_newline` marks a line that consists only of a line terminator;
/// when such a line produces content after an earlier line of the same
/// block already did, `source` is emitted first as a separator.
/// `indentation` is prefixed to the line's first non-empty chunk when the
/// output sits at the start of a fresh line.
#[derive(Debug, Clone, Default)]
pub struct Line {
    pub children: Vec<Node>,
    pub is_newline: bool,
    pub source: String,
    pub indentation: Option<String>,
}

impl Line {
    pub fn new(children: Vec<Node>) -> Self {
        Self {
            children,
            ..Self::default()
        }
    }

    /// A line made of nothing but its terminator.
    ///
    /// Its only child is an empty literal, so the terminator reaches the
    /// output as the line's separator: never at the start of a block, and
    /// only once an earlier line of the block produced content.
    pub fn newline(source: impl Into<String>) -> Self {
        Self {
            children: vec![Node::Literal(String::new())],
            is_newline: true,
            source: source.into(),
            indentation: None,
        }
    }

    pub fn indented(mut self, indentation: impl Into<String>) -> Self {
        self.indentation = Some(indentation.into());
        self
    }
}

/// `Let(name, expr?)`: binds `name` for `children`. Without an
/// expression, the value forwarded under `name` by the enclosing
/// [`Include`] is used.
#[derive(Debug, Clone)]
pub struct Let {
    pub name: String,
    pub expr: Option<Embedded>,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone)]
pub struct If {
    pub condition: Embedded,
    pub true_branch: Vec<Node>,
    /// Empty when the template has no else branch.
    pub false_branch: Vec<Node>,
}

/// Iterates an array. `false_branch` renders only when the array is empty.
/// With a `line_separator`, the separator is emitted between iterations
/// that produce content.
#[derive(Debug, Clone)]
pub struct Each {
    pub name: String,
    pub index_name: Option<String>,
    pub iterable: Embedded,
    pub line_separator: Option<String>,
    pub true_branch: Vec<Node>,
    pub false_branch: Vec<Node>,
}

/// Materializes `children` into one string bound as
/// [`TRANSFORM_BINDING`](crate::TRANSFORM_BINDING), then outputs `expr`
/// unescaped.
#[derive(Debug, Clone)]
pub struct Transform {
    pub expr: Embedded,
    pub children: Vec<Node>,
}

#[derive(Debug, Clone)]
pub struct Include {
    pub target: DocId,
    pub bindings: Vec<IncludeBinding>,
    pub sections: Vec<Section>,
}

/// A value forwarded into an included document, read there by an
/// expression-less [`Let`] of the same name.
#[derive(Debug, Clone)]
pub struct IncludeBinding {
    pub name: String,
    pub expr: Embedded,
}

#[derive(Debug, Clone)]
pub struct Section {
    pub name: String,
    pub children: Vec<Node>,
}

macro_rules! into_node {
    ($($ty:ident),*) => {
        $(
            impl From<$ty> for Node {
                fn from(value: $ty) -> Self {
                    Node::$ty(value)
                }
            }
        )*
    };
}

into_node!(Line, Let, If, Each, Transform, Include, Section);
