//! Documents and the code blocks extracted from them.

use std::collections::BTreeMap;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::{DocumentError, ParseError};
use crate::parser::Parser;

/// Free-form annotations attached to an opening fence.
pub type Metadata = BTreeMap<String, String>;

/// Metadata key marking a block that must never execute.
pub const SKIP_KEY: &str = "skip";
/// Metadata key naming a sequential execution group.
pub const GROUP_KEY: &str = "group";
/// Bare marker equivalent to `group=shared`.
pub const SHARED_KEY: &str = "shared";
/// Metadata key overriding the per-block timeout (milliseconds).
pub const TIMEOUT_KEY: &str = "timeout";
/// Metadata key inverting the expected exit status.
pub const SHOULD_FAIL_KEY: &str = "should-fail";

const SHARED_GROUP: &str = "shared";

/// A source text plus its file identifier. Immutable once loaded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Document {
    path: String,
    source: String,
    digest: String,
}

impl Document {
    /// Build a document from in-memory text.
    pub fn new(path: impl Into<String>, source: impl Into<String>) -> Self {
        let source = source.into();
        let digest = content_digest(source.as_bytes());
        Self {
            path: path.into(),
            source,
            digest,
        }
    }

    /// Read a document from disk.
    pub fn load(path: &Path) -> Result<Self, DocumentError> {
        let source = std::fs::read_to_string(path).map_err(|source| DocumentError::Io {
            path: path.display().to_string(),
            source,
        })?;
        Ok(Self::new(path.display().to_string(), source))
    }

    /// Read a document from disk without blocking the runtime.
    pub async fn load_async(path: &Path) -> Result<Self, DocumentError> {
        let source = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| DocumentError::Io {
                path: path.display().to_string(),
                source,
            })?;
        Ok(Self::new(path.display().to_string(), source))
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    pub fn source(&self) -> &str {
        &self.source
    }

    /// Hex-encoded SHA-256 of the source text.
    pub fn digest(&self) -> &str {
        &self.digest
    }

    /// Extract this document's code blocks with the given parser.
    pub fn blocks(&self, parser: &dyn Parser) -> Result<Vec<CodeBlock>, ParseError> {
        parser.parse(self)
    }
}

/// Hex-encoded SHA-256 digest of raw bytes.
pub fn content_digest(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex::encode(hasher.finalize())
}

/// Stable identity of a block: its document, position in that document, and
/// the line of its opening fence.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockId {
    pub file: String,
    /// 0-based position among the document's blocks.
    pub index: usize,
    /// 1-based line of the opening fence.
    pub line: usize,
}

impl std::fmt::Display for BlockId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}:{}", self.file, self.line)
    }
}

/// Execution state of a single block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BlockStatus {
    Pending,
    Running,
    Passed,
    Failed,
    Skipped,
}

impl BlockStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            BlockStatus::Passed | BlockStatus::Failed | BlockStatus::Skipped
        )
    }
}

impl std::fmt::Display for BlockStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            BlockStatus::Pending => write!(f, "pending"),
            BlockStatus::Running => write!(f, "running"),
            BlockStatus::Passed => write!(f, "passed"),
            BlockStatus::Failed => write!(f, "failed"),
            BlockStatus::Skipped => write!(f, "skipped"),
        }
    }
}

/// Rejected [`CodeBlock::transition`].
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransitionError {
    #[error("block {block} cannot move from {from} to {to}")]
    Invalid {
        block: String,
        from: BlockStatus,
        to: BlockStatus,
    },

    #[error("block {block} is marked skip and can only become skipped")]
    SkipMarked { block: String },
}

/// One fenced region extracted from a document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CodeBlock {
    pub id: BlockId,
    /// Language tag as written on the fence, the parser's default language,
    /// or empty.
    pub language: String,
    pub code: String,
    /// 1-based line of the closing fence.
    pub end_line: usize,
    /// Full info string following the opening fence.
    pub info: String,
    pub metadata: Metadata,
    pub status: BlockStatus,
}

impl CodeBlock {
    /// Line of the opening fence.
    pub fn line(&self) -> usize {
        self.id.line
    }

    /// Document line holding line `code_line` (1-based) of the block's code.
    pub fn document_line(&self, code_line: usize) -> usize {
        let count = self.code.lines().count().max(1);
        self.id.line + code_line.clamp(1, count)
    }

    pub fn is_skipped(&self) -> bool {
        flag(&self.metadata, SKIP_KEY)
    }

    pub fn should_fail(&self) -> bool {
        flag(&self.metadata, SHOULD_FAIL_KEY) || flag(&self.metadata, "should_fail")
    }

    /// Sequential group this block belongs to, if any.
    pub fn group(&self) -> Option<&str> {
        match self.metadata.get(GROUP_KEY) {
            Some(name) if !name.is_empty() => Some(name.as_str()),
            _ if flag(&self.metadata, SHARED_KEY) => Some(SHARED_GROUP),
            _ => None,
        }
    }

    /// Per-block timeout override.
    pub fn timeout(&self) -> Option<Duration> {
        self.metadata
            .get(TIMEOUT_KEY)
            .and_then(|v| v.trim_end_matches("ms").parse::<u64>().ok())
            .filter(|ms| *ms > 0)
            .map(Duration::from_millis)
    }

    /// Move to `next`, enforcing the block lifecycle.
    pub fn transition(&mut self, next: BlockStatus) -> Result<(), TransitionError> {
        if self.is_skipped() && next != BlockStatus::Skipped {
            return Err(TransitionError::SkipMarked {
                block: self.id.to_string(),
            });
        }

        let allowed = matches!(
            (self.status, next),
            (BlockStatus::Pending, BlockStatus::Running)
                | (BlockStatus::Pending, BlockStatus::Skipped)
                | (BlockStatus::Running, BlockStatus::Passed)
                | (BlockStatus::Running, BlockStatus::Failed)
                | (BlockStatus::Running, BlockStatus::Skipped)
        );
        if !allowed {
            return Err(TransitionError::Invalid {
                block: self.id.to_string(),
                from: self.status,
                to: next,
            });
        }

        self.status = next;
        Ok(())
    }
}

fn flag(metadata: &Metadata, key: &str) -> bool {
    metadata
        .get(key)
        .map(|v| !matches!(v.as_str(), "false" | "0" | "no"))
        .unwrap_or(false)
}
