//! Fence-line grammar.
//!
//! An opening fence is at most three spaces of indentation, a run of three or
//! more backticks or tildes, and an optional info string. A backtick fence
//! whose info string contains a backtick is plain text. A closing fence uses
//! the same character, a run at least as long as the opener, and carries no
//! info string.

use crate::document::Metadata;

const MAX_INDENT: usize = 3;
const MIN_RUN: usize = 3;

/// A recognised fence line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct Fence {
    pub ch: char,
    pub len: usize,
    pub indent: usize,
    pub info: String,
}

impl Fence {
    /// Parse `line` as a fence, if it is one.
    pub fn parse(line: &str) -> Option<Self> {
        let indent = line.len() - line.trim_start_matches(' ').len();
        if indent > MAX_INDENT {
            return None;
        }

        let rest = &line[indent..];
        let ch = rest.chars().next()?;
        if ch != '`' && ch != '~' {
            return None;
        }

        // Fence characters are ASCII, so the char count is also a byte offset.
        let len = rest.chars().take_while(|c| *c == ch).count();
        if len < MIN_RUN {
            return None;
        }

        let info = rest[len..].trim();
        if ch == '`' && info.contains('`') {
            return None;
        }

        Some(Self {
            ch,
            len,
            indent,
            info: info.to_string(),
        })
    }

    /// Whether `line` closes a block opened by `self`.
    pub fn is_closed_by(&self, line: &str) -> bool {
        matches!(Fence::parse(line), Some(f) if f.ch == self.ch && f.len >= self.len && f.info.is_empty())
    }

    /// Whether `line` looks like a fence opening inside `self` that the
    /// author expected to nest, but which is not shorter than `self`.
    pub fn is_ambiguous_inner(&self, line: &str) -> bool {
        matches!(Fence::parse(line), Some(f) if f.ch == self.ch && f.len >= self.len && !f.info.is_empty())
    }

    /// The fence marker as written, e.g. "```".
    pub fn marker(&self) -> String {
        std::iter::repeat(self.ch).take(self.len).collect()
    }
}

/// Split an info string into the language tag and annotation metadata.
///
/// The first word is the language unless the info string starts with `{`.
/// Remaining words (separated by whitespace or commas, braces stripped) are
/// `key=value` pairs or bare flags recorded as `"true"`.
pub(crate) fn split_info(info: &str) -> (Option<String>, Metadata) {
    let mut tokens = info
        .split(|c: char| c.is_whitespace() || c == ',')
        .map(|t| t.trim_matches(|c| c == '{' || c == '}'))
        .filter(|t| !t.is_empty());

    let language = if info.starts_with('{') {
        None
    } else {
        tokens.next().map(str::to_string)
    };

    let mut metadata = Metadata::new();
    for token in tokens {
        match token.split_once('=') {
            Some((key, value)) => {
                metadata.insert(
                    key.trim().to_string(),
                    value.trim().trim_matches('"').to_string(),
                );
            }
            None => {
                metadata.insert(token.to_string(), "true".to_string());
            }
        }
    }

    (language, metadata)
}

/// Language tag only, ignoring annotations.
pub(crate) fn language_of(info: &str) -> Option<String> {
    split_info(info).0
}

/// Remove up to `indent` leading spaces.
pub(crate) fn strip_indent(line: &str, indent: usize) -> &str {
    let spaces = line.len() - line.trim_start_matches(' ').len();
    &line[spaces.min(indent)..]
}
