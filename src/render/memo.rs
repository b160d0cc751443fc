use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;

use crate::error::{RenderError, RenderErrorKind};

use super::Chunk;

/// Per-context cache of rendered sections.
///
/// Each section name moves through `absent → Pending → Cached` at most
/// once per context. Replay is content only: cached chunks are yielded as
/// they were first produced, whatever the render state at the replaying
/// slot.
pub(crate) struct SectionMemo<'p> {
    entries: RefCell<HashMap<&'p str, MemoEntry<'p>>>,
}

enum MemoEntry<'p> {
    /// First rendering in progress.
    Pending,
    Cached(Rc<[Chunk<'p>]>),
}

/// What a section invocation should do.
pub(crate) enum MemoState<'p> {
    /// Render the body and hand the chunks back via [`SectionMemo::finish`].
    Record,
    Replay(Rc<[Chunk<'p>]>),
}

impl<'p> SectionMemo<'p> {
    pub(crate) fn new() -> Self {
        Self {
            entries: RefCell::new(HashMap::new()),
        }
    }

    pub(crate) fn begin(&self, name: &'p str) -> Result<MemoState<'p>, RenderError> {
        let mut entries = self.entries.borrow_mut();
        match entries.get(name) {
            Some(MemoEntry::Cached(chunks)) => Ok(MemoState::Replay(Rc::clone(chunks))),
            Some(MemoEntry::Pending) => Err(RenderError::new(
                RenderErrorKind::ReentrantSection,
                format!("section `{name}` was invoked again before its first rendering finished"),
            )),
            None => {
                entries.insert(name, MemoEntry::Pending);
                Ok(MemoState::Record)
            }
        }
    }

    pub(crate) fn finish(&self, name: &'p str, chunks: Vec<Chunk<'p>>) {
        self.entries
            .borrow_mut()
            .insert(name, MemoEntry::Cached(chunks.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::borrow::Cow;

    #[test]
    fn test_record_then_replay() {
        let memo = SectionMemo::new();
        assert!(matches!(memo.begin("body").unwrap(), MemoState::Record));
        memo.finish("body", vec![Cow::Borrowed("a"), Cow::Owned("b".to_string())]);

        let MemoState::Replay(chunks) = memo.begin("body").unwrap() else {
            panic!("expected replay");
        };
        assert_eq!(&*chunks, &[Cow::Borrowed("a"), Cow::Borrowed("b")]);
    }

    #[test]
    fn test_pending_section_rejects_reentry() {
        let memo = SectionMemo::new();
        assert!(matches!(memo.begin("body").unwrap(), MemoState::Record));
        let err = memo.begin("body").err().expect("reentry must fail");
        assert_eq!(err.kind, RenderErrorKind::ReentrantSection);
        assert!(matches!(memo.begin("other").unwrap(), MemoState::Record));
    }
}
