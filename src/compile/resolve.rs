//! Compile-time name resolution.
//!
//! Every binding construct (`Let`, `Each`, `Transform`) pushes exactly one
//! frame both here and, at render time, on the [`Scope`](crate::Scope)
//! chain. A name therefore resolves to a fixed [`Address`]: how many
//! frames to walk up, and which local within that frame.

/// Location of a binding relative to the innermost scope frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Address {
    pub depth: usize,
    pub slot: usize,
}

#[derive(Debug, Default)]
pub(crate) struct StaticScope {
    frames: Vec<Vec<String>>,
}

impl StaticScope {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Innermost frame first; within a frame, the first local wins.
    pub(crate) fn resolve(&self, name: &str) -> Option<Address> {
        self.frames
            .iter()
            .rev()
            .enumerate()
            .find_map(|(depth, frame)| {
                frame
                    .iter()
                    .position(|n| n == name)
                    .map(|slot| Address { depth, slot })
            })
    }

    pub(crate) fn push(&mut self, names: Vec<String>) {
        self.frames.push(names);
    }

    pub(crate) fn pop(&mut self) {
        self.frames.pop();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve_innermost_first() {
        let mut scope = StaticScope::new();
        scope.push(vec!["x".into()]);
        scope.push(vec!["y".into(), "x".into()]);
        assert_eq!(scope.resolve("x"), Some(Address { depth: 0, slot: 1 }));
        assert_eq!(scope.resolve("y"), Some(Address { depth: 0, slot: 0 }));

        scope.pop();
        assert_eq!(scope.resolve("x"), Some(Address { depth: 0, slot: 0 }));
        assert_eq!(scope.resolve("y"), None);
    }

    #[test]
    fn test_outer_frames_count_depth() {
        let mut scope = StaticScope::new();
        scope.push(vec!["a".into()]);
        scope.push(vec!["b".into()]);
        assert_eq!(scope.resolve("a"), Some(Address { depth: 1, slot: 0 }));
        assert_eq!(scope.resolve("missing"), None);
    }
}
