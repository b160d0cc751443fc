//! Lazy execution of compiled programs.
//!
//! Each routine of a [`Program`] renders as a pull-based iterator of
//! chunks. Nothing is evaluated until the consumer asks for the next
//! chunk, and chunks come out in document order. Two pieces of state
//! thread through a render:
//!
//! - the render state, shared by the whole render call, which knows
//!   whether the output currently sits at the start of a line,
//! - a per-block flag recording whether an earlier line of the block
//!   already produced content, which drives separator insertion.
//!
//! A `Transform` is the one place where a block is drained eagerly.

use std::borrow::Cow;
use std::cell::Cell;
use std::collections::HashMap;
use std::rc::Rc;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, trace};

use crate::ast::{DocId, Value};
use crate::compile::{
    Block, EachRoutine, IncludeRoutine, LineRoutine, Program, Routine, SectionRoutine,
    TRANSFORM_BINDING,
};
use crate::error::{RenderError, RenderErrorKind};

mod driver;
mod memo;
mod normalize;
mod scope;

pub use driver::{Render, is_newline};
pub use normalize::{Escape, Normalized, normalize};
pub use scope::{Context, Scope};

use memo::MemoState;

/// One unit of rendered text. Static text is borrowed from the program.
pub type Chunk<'p> = Cow<'p, str>;

pub(crate) type Chunks<'p> = Box<dyn Iterator<Item = Result<Chunk<'p>, RenderError>> + 'p>;

// ── Render options ──────────────────────────────────────────────────────

/// Configuration for escaping, resource limits and cancellation.
///
/// Create with [`RenderOptions::new()`] and chain builder methods:
///
/// ```rust
/// use weft::{Escape, RenderOptions};
/// use std::sync::Arc;
/// use std::sync::atomic::AtomicBool;
///
/// let token = Arc::new(AtomicBool::new(false));
/// let opts = RenderOptions::new()
///     .escape(Escape::None)
///     .max_iterations(1_000)
///     .max_include_depth(8)
///     .cancellation_token(token);
/// ```
#[derive(Clone)]
pub struct RenderOptions {
    /// Escaping applied to string values of `normal` expressions.
    pub escape: Escape,

    /// Maximum number of loop iterations (across all `Each` nodes of one
    /// render) before the render fails with
    /// [`ResourceLimit`](RenderErrorKind::ResourceLimit). `None` means
    /// unlimited.
    pub max_iterations: Option<u64>,

    /// Maximum include nesting before the render fails with
    /// [`RecursionLimit`](RenderErrorKind::RecursionLimit). Defaults to 64.
    pub max_include_depth: Option<usize>,

    /// An external flag that can be set to `true` to cancel an
    /// in-progress render. Checked before each chunk is pulled.
    pub cancellation_token: Option<Arc<AtomicBool>>,
}

impl RenderOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn escape(mut self, escape: Escape) -> Self {
        self.escape = escape;
        self
    }

    pub fn max_iterations(mut self, limit: u64) -> Self {
        self.max_iterations = Some(limit);
        self
    }

    pub fn max_include_depth(mut self, limit: usize) -> Self {
        self.max_include_depth = Some(limit);
        self
    }

    /// Attach a cancellation token. Set the `AtomicBool` to `true` from
    /// another thread to abort the render.
    pub fn cancellation_token(mut self, token: Arc<AtomicBool>) -> Self {
        self.cancellation_token = Some(token);
        self
    }
}

impl Default for RenderOptions {
    fn default() -> Self {
        Self {
            escape: Escape::default(),
            max_iterations: None,
            max_include_depth: Some(64),
            cancellation_token: None,
        }
    }
}

impl std::fmt::Debug for RenderOptions {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RenderOptions")
            .field("escape", &self.escape)
            .field("max_iterations", &self.max_iterations)
            .field("max_include_depth", &self.max_include_depth)
            .field("cancellation_token", &self.cancellation_token.is_some())
            .finish()
    }
}

// ── Render state ────────────────────────────────────────────────────────

pub(crate) struct RenderState<'p> {
    program: &'p Program,
    options: Rc<RenderOptions>,
    at_newline: Cell<bool>,
    iterations: Rc<Cell<u64>>,
}

impl<'p> RenderState<'p> {
    fn new(program: &'p Program, options: RenderOptions) -> Self {
        Self {
            program,
            options: Rc::new(options),
            at_newline: Cell::new(true),
            iterations: Rc::new(Cell::new(0)),
        }
    }

    /// A state for a nested driver: fresh line tracking, shared limits.
    fn fork(&self) -> Self {
        Self {
            program: self.program,
            options: Rc::clone(&self.options),
            at_newline: Cell::new(true),
            iterations: Rc::clone(&self.iterations),
        }
    }

    fn at_newline(&self) -> bool {
        self.at_newline.get()
    }

    pub(crate) fn set_at_newline(&self, at_newline: bool) {
        self.at_newline.set(at_newline);
    }

    fn count_iteration(&self) -> Result<(), RenderError> {
        let count = self.iterations.get() + 1;
        self.iterations.set(count);
        if let Some(max) = self.options.max_iterations
            && count > max
        {
            return Err(RenderError::new(
                RenderErrorKind::ResourceLimit,
                format!("render exceeded maximum of {max} loop iterations"),
            ));
        }
        Ok(())
    }

    pub(crate) fn check_cancelled(&self) -> Result<(), RenderError> {
        if let Some(ref token) = self.options.cancellation_token
            && token.load(Ordering::Relaxed)
        {
            return Err(RenderError::new(RenderErrorKind::Cancelled, "render cancelled"));
        }
        Ok(())
    }
}

/// Begin rendering `document` under a fresh root scope and context.
pub(crate) fn start<'p>(program: &'p Program, document: DocId, options: RenderOptions) -> Render<'p> {
    debug!(%document, ?options, "starting render");
    let state = Rc::new(RenderState::new(program, options));
    let chunks = match program.document(document) {
        Some(root) => render_block(root, Scope::root(Context::root()), Rc::clone(&state)),
        None => failed(RenderError::new(
            RenderErrorKind::UnknownDocument,
            format!("program has no document {document}"),
        )),
    };
    Render::new(chunks, state)
}

// ── Iterator helpers ────────────────────────────────────────────────────

/// Runs `init` on the first pull, then yields from the iterator it built.
struct Deferred<'p, F> {
    init: Option<F>,
    inner: Option<Chunks<'p>>,
}

impl<'p, F> Iterator for Deferred<'p, F>
where
    F: FnOnce() -> Result<Chunks<'p>, RenderError>,
{
    type Item = Result<Chunk<'p>, RenderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if let Some(init) = self.init.take() {
            match init() {
                Ok(chunks) => self.inner = Some(chunks),
                Err(e) => return Some(Err(e)),
            }
        }
        self.inner.as_mut()?.next()
    }
}

fn deferred<'p>(init: impl FnOnce() -> Result<Chunks<'p>, RenderError> + 'p) -> Chunks<'p> {
    Box::new(Deferred {
        init: Some(init),
        inner: None,
    })
}

fn empty<'p>() -> Chunks<'p> {
    Box::new(std::iter::empty())
}

fn failed<'p>(error: RenderError) -> Chunks<'p> {
    Box::new(std::iter::once(Err::<Chunk<'p>, _>(error)))
}

fn normalized<'p>(value: Value, raw: bool, escape: Escape) -> Chunks<'p> {
    Box::new(normalize(value, raw, escape).map(|text| Ok::<_, RenderError>(Cow::Owned(text))))
}

// ── Routines ────────────────────────────────────────────────────────────

fn render_block<'p>(block: &'p Block, scope: Scope<'p>, state: Rc<RenderState<'p>>) -> Chunks<'p> {
    let need_separator = Rc::new(Cell::new(false));
    Box::new(block.lines.iter().flat_map(move |line| {
        render_line(line, scope.clone(), Rc::clone(&state), Rc::clone(&need_separator))
    }))
}

fn render_line<'p>(
    line: &'p LineRoutine,
    scope: Scope<'p>,
    state: Rc<RenderState<'p>>,
    need_separator: Rc<Cell<bool>>,
) -> Chunks<'p> {
    let children = {
        let state = Rc::clone(&state);
        line.children
            .iter()
            .flat_map(move |child| render_node(child, scope.clone(), Rc::clone(&state)))
    };

    Box::new(LineChunks {
        line,
        children: Box::new(children),
        state,
        need_separator,
        first: true,
        held: None,
        indented: false,
    })
}

/// Adds a line's separator and indentation around its content.
///
/// The separator (or an empty marker) is yielded on its own pull, and the
/// indentation is decided on the following one. By then the driver has
/// seen everything an enclosing routine emitted ahead of the marker, such
/// as an `Each` separator.
struct LineChunks<'p> {
    line: &'p LineRoutine,
    children: Chunks<'p>,
    state: Rc<RenderState<'p>>,
    need_separator: Rc<Cell<bool>>,
    first: bool,
    /// Content chunk waiting behind the marker or the indentation.
    held: Option<Chunk<'p>>,
    /// Whether the held chunk already passed the indentation check.
    indented: bool,
}

impl<'p> Iterator for LineChunks<'p> {
    type Item = Result<Chunk<'p>, RenderError>;

    fn next(&mut self) -> Option<Self::Item> {
        let line = self.line;
        let chunk = match self.held.take() {
            Some(chunk) if self.indented => {
                self.indented = false;
                return Some(Ok(chunk));
            }
            Some(chunk) => chunk,
            None => match self.children.next()? {
                Ok(chunk) if !is_newline(&chunk) => {
                    let lead = match &line.separator {
                        Some(separator) if self.first && self.need_separator.get() => separator.as_str(),
                        _ => "",
                    };
                    self.need_separator.set(true);
                    if self.first {
                        self.first = false;
                        self.held = Some(chunk);
                        return Some(Ok(Cow::Borrowed(lead)));
                    }
                    chunk
                }
                other => return Some(other),
            },
        };

        if let Some(indentation) = &line.indentation
            && !chunk.is_empty()
            && self.state.at_newline()
        {
            self.held = Some(chunk);
            self.indented = true;
            return Some(Ok(Cow::Borrowed(indentation.as_str())));
        }
        Some(Ok(chunk))
    }
}

fn render_node<'p>(routine: &'p Routine, scope: Scope<'p>, state: Rc<RenderState<'p>>) -> Chunks<'p> {
    match routine {
        Routine::Literal(text) => Box::new(std::iter::once(Ok::<_, RenderError>(Cow::Borrowed(
            text.as_str(),
        )))),
        Routine::Output { expr, raw } => deferred(move || {
            let value = expr.eval(&scope)?;
            Ok(normalized(value, *raw, state.options.escape))
        }),
        Routine::Effect(expr) => deferred(move || {
            expr.eval(&scope)?;
            Ok(empty())
        }),
        Routine::Let { name, value, body } => deferred(move || {
            let bound = match value {
                Some(expr) => expr.eval(&scope)?,
                None => scope
                    .context()
                    .forwarded(name)
                    .cloned()
                    .ok_or_else(|| RenderError::unbound_name(name))?,
            };
            Ok(render_block(body, scope.extend(name, bound), state))
        }),
        Routine::If {
            condition,
            then,
            otherwise,
        } => deferred(move || {
            let branch = if condition.eval(&scope)?.is_truthy() {
                then
            } else {
                otherwise
            };
            Ok(render_block(branch, scope, state))
        }),
        Routine::Each(each) => deferred(move || render_each(each, scope, state)),
        Routine::Transform { expr, body } => deferred(move || {
            let local = Rc::new(state.fork());
            let text = Render::new(render_block(body, scope.clone(), Rc::clone(&local)), local)
                .into_string()?;
            let value = expr.eval(&scope.extend(TRANSFORM_BINDING, Value::String(text)))?;
            Ok(normalized(value, true, state.options.escape))
        }),
        Routine::Include(include) => deferred(move || render_include(include, &scope, state)),
        Routine::Slot(name) => deferred(move || render_slot(name, &scope, state)),
    }
}

fn render_each<'p>(
    each: &'p EachRoutine,
    scope: Scope<'p>,
    state: Rc<RenderState<'p>>,
) -> Result<Chunks<'p>, RenderError> {
    let value = each.iterable.eval(&scope)?;
    let type_name = value.type_name();
    let items = value
        .into_array()
        .ok_or_else(|| RenderError::not_iterable(type_name))?;

    if items.is_empty() {
        return Ok(render_block(&each.empty, scope, state));
    }

    let need_separator = Rc::new(Cell::new(false));
    Ok(Box::new(items.into_iter().enumerate().flat_map(
        move |(index, item)| -> Chunks<'p> {
            if let Err(e) = state.count_iteration() {
                return failed(e);
            }
            let inner = match &each.index_name {
                Some(index_name) => scope.extend_two(&each.name, item, index_name, Value::from(index)),
                None => scope.extend(&each.name, item),
            };
            let body = render_block(&each.body, inner, Rc::clone(&state));
            match &each.separator {
                Some(separator) => separated(body, separator, Rc::clone(&need_separator)),
                None => body,
            }
        },
    )))
}

/// Prefix one iteration's first content chunk with `separator` when an
/// earlier iteration produced content.
fn separated<'p>(body: Chunks<'p>, separator: &'p str, need_separator: Rc<Cell<bool>>) -> Chunks<'p> {
    let mut first = true;
    Box::new(body.flat_map(move |item| {
        let mut out = Vec::with_capacity(2);
        if let Ok(chunk) = &item
            && !is_newline(chunk)
        {
            if first && need_separator.get() {
                out.push(Ok(Cow::Borrowed(separator)));
            }
            first = false;
            need_separator.set(true);
        }
        out.push(item);
        out
    }))
}

fn render_include<'p>(
    include: &'p IncludeRoutine,
    scope: &Scope<'p>,
    state: Rc<RenderState<'p>>,
) -> Result<Chunks<'p>, RenderError> {
    let depth = scope.context().depth() + 1;
    if let Some(max) = state.options.max_include_depth
        && depth > max
    {
        return Err(RenderError::new(
            RenderErrorKind::RecursionLimit,
            format!("include of document {} exceeded maximum depth of {max}", include.target),
        ));
    }

    let root = state.program.document(include.target).ok_or_else(|| {
        RenderError::new(
            RenderErrorKind::UnknownDocument,
            format!("program has no document {}", include.target),
        )
    })?;

    let bindings = include
        .bindings
        .iter()
        .map(|(name, expr)| Ok::<_, RenderError>((name.as_str(), expr.eval(scope)?)))
        .collect::<Result<HashMap<_, _>, RenderError>>()?;
    let sections = include
        .sections
        .iter()
        .map(|section| (section.name.as_str(), section))
        .collect();

    trace!(document = %include.target, depth, "entering include");
    let context = Context::for_include(bindings, sections, scope.clone());
    Ok(render_block(root, Scope::root(context), state))
}

fn render_slot<'p>(
    name: &'p str,
    scope: &Scope<'p>,
    state: Rc<RenderState<'p>>,
) -> Result<Chunks<'p>, RenderError> {
    let context = Rc::clone(scope.context());
    let (Some(section), Some(outer)) = (context.section(name), context.outer_scope()) else {
        return Ok(empty());
    };
    let outer = outer.clone();
    render_section(section, outer, state, context)
}

/// Render a section in the includer's scope, or replay its first
/// rendering from the context's memo.
fn render_section<'p>(
    section: &'p SectionRoutine,
    scope: Scope<'p>,
    state: Rc<RenderState<'p>>,
    context: Rc<Context<'p>>,
) -> Result<Chunks<'p>, RenderError> {
    let memo_state = context.memo().begin(&section.name)?;
    match memo_state {
        MemoState::Replay(chunks) => {
            trace!(section = %section.name, chunks = chunks.len(), "replaying section");
            Ok(Box::new((0..chunks.len()).map(move |i| Ok::<_, RenderError>(chunks[i].clone()))))
        }
        MemoState::Record => {
            trace!(section = %section.name, "recording section");
            Ok(Box::new(Recording {
                name: &section.name,
                inner: render_block(&section.body, scope, state),
                buffer: Vec::new(),
                context,
                done: false,
            }))
        }
    }
}

/// Passes a section's chunks through while keeping a copy, and stores
/// the copy in the memo once the section is fully drained.
struct Recording<'p> {
    name: &'p str,
    inner: Chunks<'p>,
    buffer: Vec<Chunk<'p>>,
    context: Rc<Context<'p>>,
    done: bool,
}

impl<'p> Iterator for Recording<'p> {
    type Item = Result<Chunk<'p>, RenderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }
        match self.inner.next() {
            Some(Ok(chunk)) => {
                self.buffer.push(chunk.clone());
                Some(Ok(chunk))
            }
            Some(Err(e)) => {
                self.done = true;
                Some(Err(e))
            }
            None => {
                self.done = true;
                self.context
                    .memo()
                    .finish(self.name, std::mem::take(&mut self.buffer));
                None
            }
        }
    }
}
