use std::rc::Rc;

use crate::error::RenderError;

use super::{Chunk, Chunks, RenderState};

/// True iff `chunk` is exactly a line terminator.
pub fn is_newline(chunk: &str) -> bool {
    chunk == "\n"
}

/// A lazy render in progress.
///
/// Yields the non-empty chunks of a document in order and records, after
/// each one, whether the output now sits at the start of a line. The
/// stream ends after the first error.
///
/// Render state is reference counted without synchronization, so a render
/// cannot be moved to or drained from another thread.
pub struct Render<'p> {
    chunks: Chunks<'p>,
    state: Rc<RenderState<'p>>,
    finished: bool,
}

impl<'p> Render<'p> {
    pub(crate) fn new(chunks: Chunks<'p>, state: Rc<RenderState<'p>>) -> Self {
        Self {
            chunks,
            state,
            finished: false,
        }
    }

    /// Drain the render into one string.
    pub fn into_string(self) -> Result<String, RenderError> {
        self.collect()
    }
}

impl<'p> Iterator for Render<'p> {
    type Item = Result<Chunk<'p>, RenderError>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        loop {
            if let Err(e) = self.state.check_cancelled() {
                self.finished = true;
                return Some(Err(e));
            }
            match self.chunks.next() {
                None => {
                    self.finished = true;
                    return None;
                }
                Some(Err(e)) => {
                    self.finished = true;
                    return Some(Err(e));
                }
                Some(Ok(chunk)) if chunk.is_empty() => continue,
                Some(Ok(chunk)) => {
                    self.state.set_at_newline(is_newline(&chunk));
                    return Some(Ok(chunk));
                }
            }
        }
    }
}
