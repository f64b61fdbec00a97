//! Code-block extraction.
//!
//! [`Parser`] is the capability; [`MarkdownParser`] is the default fenced
//! code block implementation. Parsing is a pure text-to-structure transform
//! and safe to run concurrently over independent documents.

mod fence;

use serde::{Deserialize, Serialize};

use crate::document::{BlockId, BlockStatus, CodeBlock, Document, Metadata};
use crate::error::ParseError;

use fence::{language_of, split_info, strip_indent, Fence};

/// Extracts code blocks from a document in document order.
pub trait Parser: Send + Sync {
    fn parse(&self, document: &Document) -> Result<Vec<CodeBlock>, ParseError>;
}

/// Options for [`MarkdownParser`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParseOptions {
    /// Language applied to blocks whose fence carries no tag.
    pub default_language: Option<String>,
    /// Populate block metadata from fence annotations.
    pub parse_metadata: bool,
}

impl Default for ParseOptions {
    fn default() -> Self {
        Self {
            default_language: None,
            parse_metadata: true,
        }
    }
}

/// Fenced code block parser for markdown and plain text.
#[derive(Debug, Clone, Default)]
pub struct MarkdownParser {
    options: ParseOptions,
}

struct OpenBlock<'a> {
    fence: Fence,
    line: usize,
    lines: Vec<&'a str>,
}

impl MarkdownParser {
    pub fn new(options: ParseOptions) -> Self {
        Self { options }
    }

    pub fn options(&self) -> &ParseOptions {
        &self.options
    }

    fn finish(
        &self,
        document: &Document,
        index: usize,
        open: OpenBlock<'_>,
        end_line: usize,
    ) -> CodeBlock {
        let (language, metadata) = if self.options.parse_metadata {
            split_info(&open.fence.info)
        } else {
            (language_of(&open.fence.info), Metadata::new())
        };

        let language = language
            .or_else(|| self.options.default_language.clone())
            .unwrap_or_default();

        let mut code = open.lines.join("\n");
        if !code.is_empty() {
            code.push('\n');
        }

        CodeBlock {
            id: BlockId {
                file: document.path().to_string(),
                index,
                line: open.line,
            },
            language,
            code,
            end_line,
            info: open.fence.info,
            metadata,
            status: BlockStatus::Pending,
        }
    }
}

impl Parser for MarkdownParser {
    fn parse(&self, document: &Document) -> Result<Vec<CodeBlock>, ParseError> {
        let mut blocks = Vec::new();
        let mut open: Option<OpenBlock<'_>> = None;

        for (idx, raw) in document.source().lines().enumerate() {
            let line_no = idx + 1;

            open = match open.take() {
                None => Fence::parse(raw).map(|fence| OpenBlock {
                    fence,
                    line: line_no,
                    lines: Vec::new(),
                }),
                Some(mut current) => {
                    if current.fence.is_closed_by(raw) {
                        let block = self.finish(document, blocks.len(), current, line_no);
                        blocks.push(block);
                        None
                    } else if current.fence.is_ambiguous_inner(raw) {
                        return Err(ParseError::ambiguous_nesting(
                            document.path(),
                            current.line,
                            line_no,
                            &current.fence.marker(),
                        ));
                    } else {
                        current.lines.push(strip_indent(raw, current.fence.indent));
                        Some(current)
                    }
                }
            };
        }

        if let Some(current) = open {
            return Err(ParseError::unterminated(
                document.path(),
                current.line,
                &current.fence.marker(),
            ));
        }

        tracing::debug!(file = %document.path(), blocks = blocks.len(), "parsed document");
        Ok(blocks)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ParseErrorKind;

    fn parse(src: &str) -> Result<Vec<CodeBlock>, ParseError> {
        MarkdownParser::default().parse(&Document::new("doc.md", src))
    }

    #[test]
    fn test_extracts_blocks_in_order_with_lines() {
        let src = "# Intro\n\n```bash\necho hi\n```\n\ntext\n\n```Python\nprint(1)\nprint(2)\n```\n";
        let blocks = parse(src).unwrap();
        assert_eq!(blocks.len(), 2);

        assert_eq!(blocks[0].language, "bash");
        assert_eq!(blocks[0].code, "echo hi\n");
        assert_eq!(blocks[0].line(), 3);
        assert_eq!(blocks[0].end_line, 5);
        assert_eq!(blocks[0].id.index, 0);

        // Tag case is preserved.
        assert_eq!(blocks[1].language, "Python");
        assert_eq!(blocks[1].code, "print(1)\nprint(2)\n");
        assert_eq!(blocks[1].line(), 9);
        assert_eq!(blocks[1].id.index, 1);
    }

    #[test]
    fn test_no_blocks() {
        assert!(parse("just prose\n\n- a list\n").unwrap().is_empty());
        assert!(parse("").unwrap().is_empty());
    }

    #[test]
    fn test_untagged_block_uses_default_language() {
        let parser = MarkdownParser::new(ParseOptions {
            default_language: Some("sh".to_string()),
            parse_metadata: true,
        });
        let blocks = parser
            .parse(&Document::new("doc.md", "```\nls\n```\n"))
            .unwrap();
        assert_eq!(blocks[0].language, "sh");

        let blocks = parse("```\nls\n```\n").unwrap();
        assert_eq!(blocks[0].language, "");
    }

    #[test]
    fn test_metadata_from_fence_annotations() {
        let blocks = parse("```bash skip group=setup\nexit 1\n```\n").unwrap();
        assert!(blocks[0].is_skipped());
        assert_eq!(blocks[0].group(), Some("setup"));
        assert_eq!(blocks[0].info, "bash skip group=setup");
    }

    #[test]
    fn test_metadata_disabled_keeps_language() {
        let parser = MarkdownParser::new(ParseOptions {
            default_language: None,
            parse_metadata: false,
        });
        let blocks = parser
            .parse(&Document::new("doc.md", "```bash skip\nexit 1\n```\n"))
            .unwrap();
        assert_eq!(blocks[0].language, "bash");
        assert!(blocks[0].metadata.is_empty());
        assert!(!blocks[0].is_skipped());
    }

    #[test]
    fn test_unterminated_fence_reports_opening_line() {
        let err = parse("ok\n\n```sh\necho 1\n```\n\n```python\nprint(1)\n").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::Unterminated);
        assert_eq!(err.line, 7);
        assert_eq!(err.file, "doc.md");
    }

    #[test]
    fn test_longer_outer_fence_nests_example() {
        let src = "````markdown\n```rust\nfn main() {}\n```\n````\n";
        let blocks = parse(src).unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].language, "markdown");
        assert_eq!(blocks[0].code, "```rust\nfn main() {}\n```\n");
    }

    #[test]
    fn test_tilde_fence_contains_backticks() {
        let src = "~~~text\n```\nnot a fence here\n~~~\n";
        let blocks = parse(src).unwrap();
        assert_eq!(blocks.len(), 1);
        assert!(blocks[0].code.contains("```"));
    }

    #[test]
    fn test_ambiguous_nesting_is_rejected() {
        let err = parse("```markdown\n```rust\nfn x() {}\n```\n```\n").unwrap_err();
        assert_eq!(err.kind, ParseErrorKind::AmbiguousNesting);
        assert_eq!(err.line, 1);
        assert!(err.message.contains("line 2"));
    }

    #[test]
    fn test_forgotten_closer_reports_unclosed_block() {
        let err = parse("```sh\necho a\n\ntext\n\n```python\nprint(1)\n```\n").unwrap_err();
        assert_eq!(err.line, 1);
        assert!(err.message.contains("line 6"));
    }

    #[test]
    fn test_indented_code_is_not_a_fence() {
        let blocks = parse("    ```\n    code\n").unwrap();
        assert!(blocks.is_empty());
    }

    #[test]
    fn test_indented_fence_strips_indent() {
        let blocks = parse("  ```sh\n  echo a\n    echo b\n  ```\n").unwrap();
        assert_eq!(blocks[0].code, "echo a\n  echo b\n");
    }

    #[test]
    fn test_crlf_line_endings() {
        let blocks = parse("```sh\r\necho hi\r\n```\r\n").unwrap();
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].language, "sh");
        assert_eq!(blocks[0].code, "echo hi\n");
    }

    #[test]
    fn test_block_count_equals_fence_pairs() {
        let mut src = String::new();
        for i in 0..25 {
            src.push_str(&format!("para {i}\n```sh\necho {i}\n```\n"));
        }
        assert_eq!(parse(&src).unwrap().len(), 25);
    }

    #[test]
    fn test_empty_block() {
        let blocks = parse("```sh\n```\n").unwrap();
        assert_eq!(blocks[0].code, "");
        assert_eq!(blocks[0].end_line, 2);
    }
}
