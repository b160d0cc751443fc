//! The persistent scope chain and the per-include [`Context`].

use std::collections::HashMap;
use std::fmt;
use std::rc::Rc;

use crate::ast::Value;
use crate::compile::{Address, SectionRoutine};
use crate::error::RenderError;

use super::memo::SectionMemo;

/// An immutable variable environment.
///
/// Every extension returns a new scope that shares its parent by
/// reference, so a parent lives as long as its longest-lived child.
/// Lookup is linear in the number of enclosing `Let`/`Each`/`Transform`
/// frames.
///
/// ```rust
/// use weft::{Context, Scope, Value};
///
/// let root = Scope::root(Context::root());
/// let outer = root.extend("a", Value::from(1i64));
/// let inner = outer.extend_two("b", Value::from("x"), "a", Value::from(2i64));
///
/// assert_eq!(inner.lookup("a").unwrap(), &Value::Number(2.0));
/// assert_eq!(outer.lookup("a").unwrap(), &Value::Number(1.0));
/// assert!(root.lookup("a").is_err());
/// ```
#[derive(Clone)]
pub struct Scope<'p> {
    node: Rc<ScopeNode<'p>>,
}

struct ScopeNode<'p> {
    locals: Locals<'p>,
    parent: Option<Scope<'p>>,
    context: Rc<Context<'p>>,
}

enum Locals<'p> {
    None,
    One(Local<'p>),
    Two(Local<'p>, Local<'p>),
}

struct Local<'p> {
    name: &'p str,
    value: Value,
}

impl<'p> Locals<'p> {
    fn slot(&self, slot: usize) -> Option<&Local<'p>> {
        match (self, slot) {
            (Locals::One(first), 0) | (Locals::Two(first, _), 0) => Some(first),
            (Locals::Two(_, second), 1) => Some(second),
            _ => None,
        }
    }

    fn find(&self, name: &str) -> Option<&Value> {
        (0..2)
            .map_while(|slot| self.slot(slot))
            .find(|local| local.name == name)
            .map(|local| &local.value)
    }
}

impl<'p> Scope<'p> {
    /// A scope with no bindings, tied to `context`.
    pub fn root(context: Rc<Context<'p>>) -> Self {
        Self {
            node: Rc::new(ScopeNode {
                locals: Locals::None,
                parent: None,
                context,
            }),
        }
    }

    pub fn extend(&self, name: &'p str, value: Value) -> Self {
        self.child(Locals::One(Local { name, value }))
    }

    pub fn extend_two(&self, name1: &'p str, value1: Value, name2: &'p str, value2: Value) -> Self {
        self.child(Locals::Two(
            Local {
                name: name1,
                value: value1,
            },
            Local {
                name: name2,
                value: value2,
            },
        ))
    }

    fn child(&self, locals: Locals<'p>) -> Self {
        Self {
            node: Rc::new(ScopeNode {
                locals,
                parent: Some(self.clone()),
                context: Rc::clone(&self.node.context),
            }),
        }
    }

    /// Look a name up through the chain, then through the values the
    /// enclosing include forwarded.
    pub fn lookup(&self, name: &str) -> Result<&Value, RenderError> {
        let mut scope = Some(self);
        while let Some(current) = scope {
            if let Some(value) = current.node.locals.find(name) {
                return Ok(value);
            }
            scope = current.node.parent.as_ref();
        }
        self.context()
            .forwarded(name)
            .ok_or_else(|| RenderError::unbound_name(name))
    }

    /// Read the binding at a compile-time address.
    pub(crate) fn resolve(&self, address: Address) -> Option<&Value> {
        let mut node: &ScopeNode<'p> = &self.node;
        for _ in 0..address.depth {
            node = &node.parent.as_ref()?.node;
        }
        node.locals.slot(address.slot).map(|local| &local.value)
    }

    pub fn context(&self) -> &Rc<Context<'p>> {
        &self.node.context
    }
}

impl fmt::Debug for Scope<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut frames = f.debug_list();
        let mut scope = Some(self);
        while let Some(current) = scope {
            let names: Vec<&str> = (0..2)
                .map_while(|slot| current.node.locals.slot(slot))
                .map(|local| local.name)
                .collect();
            frames.entry(&names);
            scope = current.node.parent.as_ref();
        }
        frames.finish()
    }
}

/// State shared by everything rendered under one include (or under the
/// document root): forwarded bindings, the sections supplied by the
/// includer, the includer's scope, and the section memo.
///
/// A context is created once and never mutated afterwards, apart from its
/// memo filling up.
pub struct Context<'p> {
    bindings: Option<HashMap<&'p str, Value>>,
    sections: HashMap<&'p str, &'p SectionRoutine>,
    outer: Option<Scope<'p>>,
    memo: SectionMemo<'p>,
    depth: usize,
}

impl<'p> Context<'p> {
    /// The context of a document rendered directly: nothing forwarded, no
    /// sections, no includer.
    pub fn root() -> Rc<Self> {
        Rc::new(Self {
            bindings: None,
            sections: HashMap::new(),
            outer: None,
            memo: SectionMemo::new(),
            depth: 0,
        })
    }

    pub(crate) fn for_include(
        bindings: HashMap<&'p str, Value>,
        sections: HashMap<&'p str, &'p SectionRoutine>,
        outer: Scope<'p>,
    ) -> Rc<Self> {
        let depth = outer.context().depth + 1;
        Rc::new(Self {
            bindings: Some(bindings),
            sections,
            outer: Some(outer),
            memo: SectionMemo::new(),
            depth,
        })
    }

    /// A value forwarded by the includer under `name`.
    pub fn forwarded(&self, name: &str) -> Option<&Value> {
        self.bindings.as_ref()?.get(name)
    }

    /// The scope active where the include appeared; sections render in it.
    pub fn outer_scope(&self) -> Option<&Scope<'p>> {
        self.outer.as_ref()
    }

    /// Include nesting depth; `0` for the document root.
    pub fn depth(&self) -> usize {
        self.depth
    }

    pub(crate) fn section(&self, name: &str) -> Option<&'p SectionRoutine> {
        self.sections.get(name).copied()
    }

    pub(crate) fn memo(&self) -> &SectionMemo<'p> {
        &self.memo
    }
}
