//! Turning expression results into text chunks.

use std::borrow::Cow;

use crate::ast::Value;

/// Escaping applied to string values of `normal` expressions.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Escape {
    /// Escape `&`, `<`, `>`, `"` and `'` as HTML entities.
    #[default]
    Html,
    /// Emit strings unchanged.
    None,
}

impl Escape {
    pub fn apply<'a>(&self, text: &'a str) -> Cow<'a, str> {
        match self {
            Escape::None => Cow::Borrowed(text),
            Escape::Html => {
                if !text.contains(['&', '<', '>', '"', '\'']) {
                    return Cow::Borrowed(text);
                }
                let mut out = String::with_capacity(text.len() + 8);
                for ch in text.chars() {
                    match ch {
                        '&' => out.push_str("&amp;"),
                        '<' => out.push_str("&lt;"),
                        '>' => out.push_str("&gt;"),
                        '"' => out.push_str("&quot;"),
                        '\'' => out.push_str("&#39;"),
                        _ => out.push(ch),
                    }
                }
                Cow::Owned(out)
            }
        }
    }
}

/// Flatten `value` into chunks.
///
/// - `None` yields nothing.
/// - A string yields one chunk, escaped unless `raw`.
/// - An array yields the chunks of its elements, depth first.
/// - Anything else yields its string form.
///
/// ```rust
/// use weft::{normalize, Escape, Value};
///
/// let nested = Value::Array(vec![
///     Value::from(vec!["a"]),
///     Value::None,
///     Value::from(vec!["b", "c"]),
/// ]);
/// let chunks: Vec<String> = normalize(nested, false, Escape::Html).collect();
/// assert_eq!(chunks, ["a", "b", "c"]);
/// ```
pub fn normalize(value: Value, raw: bool, escape: Escape) -> Normalized {
    Normalized {
        stack: vec![vec![value].into_iter()],
        escape: if raw { Escape::None } else { escape },
    }
}

/// Lazy, single-pass iterator returned by [`normalize`].
pub struct Normalized {
    stack: Vec<std::vec::IntoIter<Value>>,
    escape: Escape,
}

impl Iterator for Normalized {
    type Item = String;

    fn next(&mut self) -> Option<String> {
        loop {
            let value = match self.stack.last_mut()?.next() {
                Some(value) => value,
                None => {
                    self.stack.pop();
                    continue;
                }
            };
            match value {
                Value::None => continue,
                Value::Array(items) => self.stack.push(items.into_iter()),
                Value::String(s) => {
                    let escaped = match self.escape.apply(&s) {
                        Cow::Owned(escaped) => Some(escaped),
                        Cow::Borrowed(_) => None,
                    };
                    return Some(escaped.unwrap_or(s));
                }
                other => return Some(other.to_output_string()),
            }
        }
    }
}
