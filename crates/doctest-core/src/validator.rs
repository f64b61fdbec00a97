//! Structural validation without execution.
//!
//! Validation never aborts: a document that fails to parse becomes an error
//! entry and the remaining documents are still analysed. Output depends only
//! on the input documents, so repeated runs produce identical reports.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::config::ValidationSettings;
use crate::document::{CodeBlock, Document};
use crate::parser::{MarkdownParser, Parser};

/// Rule names used in [`ValidationIssue::rule`].
pub mod rules {
    pub const FENCE: &str = "fence";
    pub const LANGUAGE: &str = "language";
    pub const EMPTY_BLOCK: &str = "empty-block";
    pub const DUPLICATE_ANCHOR: &str = "duplicate-anchor";
}

/// One structural finding.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationIssue {
    pub file: String,
    pub line: usize,
    pub rule: String,
    pub message: String,
}

/// What the validator learned about one document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DocumentAnalysis {
    pub file: String,
    /// Whether the fence structure parsed.
    pub parsed: bool,
    pub blocks: usize,
    /// Block count per language tag.
    pub languages: BTreeMap<String, usize>,
}

/// Result of validating a set of documents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationReport {
    pub is_valid: bool,
    pub errors: Vec<ValidationIssue>,
    pub warnings: Vec<ValidationIssue>,
    pub documents: Vec<DocumentAnalysis>,
}

impl ValidationReport {
    /// Plain-text rendering listing every issue.
    pub fn render_text(&self) -> String {
        let mut out = String::new();
        for issue in &self.errors {
            out.push_str(&format!(
                "error[{}] {}:{}: {}\n",
                issue.rule, issue.file, issue.line, issue.message
            ));
        }
        for issue in &self.warnings {
            out.push_str(&format!(
                "warning[{}] {}:{}: {}\n",
                issue.rule, issue.file, issue.line, issue.message
            ));
        }
        let blocks: usize = self.documents.iter().map(|d| d.blocks).sum();
        out.push_str(&format!(
            "{} document(s), {} block(s), {} error(s), {} warning(s)\n",
            self.documents.len(),
            blocks,
            self.errors.len(),
            self.warnings.len()
        ));
        out
    }
}

/// Checks documents for well-formedness.
pub struct Validator {
    parser: Arc<dyn Parser>,
    settings: ValidationSettings,
    known_languages: Option<BTreeSet<String>>,
}

impl Default for Validator {
    fn default() -> Self {
        Self::new(Arc::new(MarkdownParser::default()), ValidationSettings::default())
    }
}

impl Validator {
    pub fn new(parser: Arc<dyn Parser>, settings: ValidationSettings) -> Self {
        Self {
            parser,
            settings,
            known_languages: None,
        }
    }

    /// Warn on language tags outside this set (compared lower-cased).
    pub fn with_known_languages<I, S>(mut self, languages: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.known_languages = Some(
            languages
                .into_iter()
                .map(|l| l.as_ref().to_ascii_lowercase())
                .collect(),
        );
        self
    }

    /// Validate every document; never fails.
    pub fn validate(&self, documents: &[Document]) -> ValidationReport {
        let mut errors = Vec::new();
        let mut warnings = Vec::new();
        let mut analyses = Vec::with_capacity(documents.len());

        for document in documents {
            let analysis = self.validate_document(document, &mut errors, &mut warnings);
            analyses.push(analysis);
        }

        tracing::debug!(
            documents = documents.len(),
            errors = errors.len(),
            warnings = warnings.len(),
            "validation finished"
        );

        ValidationReport {
            is_valid: errors.is_empty(),
            errors,
            warnings,
            documents: analyses,
        }
    }

    fn validate_document(
        &self,
        document: &Document,
        errors: &mut Vec<ValidationIssue>,
        warnings: &mut Vec<ValidationIssue>,
    ) -> DocumentAnalysis {
        let blocks = match self.parser.parse(document) {
            Ok(blocks) => blocks,
            Err(err) => {
                errors.push(ValidationIssue {
                    file: err.file.clone(),
                    line: err.line,
                    rule: rules::FENCE.to_string(),
                    message: err.message.clone(),
                });
                return DocumentAnalysis {
                    file: document.path().to_string(),
                    parsed: false,
                    blocks: 0,
                    languages: BTreeMap::new(),
                };
            }
        };

        let mut languages = BTreeMap::new();
        for block in &blocks {
            *languages.entry(block.language.clone()).or_insert(0) += 1;
            self.check_block(block, warnings);
        }

        if self.settings.unique_anchors {
            check_anchors(document, &blocks, errors);
        }

        DocumentAnalysis {
            file: document.path().to_string(),
            parsed: true,
            blocks: blocks.len(),
            languages,
        }
    }

    fn check_block(&self, block: &CodeBlock, warnings: &mut Vec<ValidationIssue>) {
        let warn = |rule: &str, message: String| ValidationIssue {
            file: block.id.file.clone(),
            line: block.line(),
            rule: rule.to_string(),
            message,
        };

        if block.language.is_empty() {
            warnings.push(warn(
                rules::LANGUAGE,
                "code block has no language tag".to_string(),
            ));
        } else if let Some(known) = &self.known_languages {
            if !known.contains(&block.language.to_ascii_lowercase()) && !block.is_skipped() {
                warnings.push(warn(
                    rules::LANGUAGE,
                    format!("no runner registered for language `{}`", block.language),
                ));
            }
        }

        if block.code.trim().is_empty() {
            warnings.push(warn(rules::EMPTY_BLOCK, "code block is empty".to_string()));
        }
    }
}

/// Flag headings outside code blocks that produce the same anchor.
fn check_anchors(document: &Document, blocks: &[CodeBlock], errors: &mut Vec<ValidationIssue>) {
    let mut seen: BTreeMap<String, usize> = BTreeMap::new();

    for (line_no, title) in headings(document, blocks) {
        let anchor = slugify(&title);
        if anchor.is_empty() {
            continue;
        }
        match seen.get(&anchor) {
            Some(first) => errors.push(ValidationIssue {
                file: document.path().to_string(),
                line: line_no,
                rule: rules::DUPLICATE_ANCHOR.to_string(),
                message: format!("heading anchor `#{anchor}` already defined at line {first}"),
            }),
            None => {
                seen.insert(anchor, line_no);
            }
        }
    }
}

/// ATX and setext headings with the line their text starts on, in document
/// order. Lines inside code blocks are ignored.
fn headings(document: &Document, blocks: &[CodeBlock]) -> Vec<(usize, String)> {
    let inside_block = |line: usize| blocks.iter().any(|b| line >= b.line() && line <= b.end_line);
    let mut found = Vec::new();
    // Open paragraph: first line number and its lines so far.
    let mut paragraph: Option<(usize, Vec<&str>)> = None;

    for (idx, raw) in document.source().lines().enumerate() {
        let line_no = idx + 1;
        if inside_block(line_no) || raw.trim().is_empty() {
            paragraph = None;
            continue;
        }
        if let Some(title) = heading_text(raw) {
            paragraph = None;
            found.push((line_no, title.to_string()));
            continue;
        }
        if is_setext_underline(raw) {
            // Without a paragraph above, `---` is a thematic break.
            if let Some((start, lines)) = paragraph.take() {
                found.push((start, lines.join(" ")));
            }
            continue;
        }
        if starts_container(raw) {
            paragraph = None;
            continue;
        }
        match &mut paragraph {
            Some((_, lines)) => lines.push(raw.trim()),
            None => paragraph = Some((line_no, vec![raw.trim()])),
        }
    }
    found
}

/// Text of an ATX heading line (`#` to `######`).
fn heading_text(line: &str) -> Option<&str> {
    let trimmed = line.trim_start_matches(' ');
    if line.len() - trimmed.len() > 3 {
        return None;
    }
    let level = trimmed.chars().take_while(|c| *c == '#').count();
    if level == 0 || level > 6 {
        return None;
    }
    let rest = &trimmed[level..];
    if !rest.is_empty() && !rest.starts_with(' ') && !rest.starts_with('\t') {
        return None;
    }
    Some(rest.trim().trim_end_matches('#').trim())
}

/// A run of `=` or `-` under a paragraph line.
fn is_setext_underline(line: &str) -> bool {
    let indent = line.len() - line.trim_start_matches(' ').len();
    let marker = line.trim();
    indent <= 3
        && marker
            .chars()
            .next()
            .map(|first| (first == '=' || first == '-') && marker.chars().all(|c| c == first))
            .unwrap_or(false)
}

/// List items and block quotes, which never form setext headings here.
fn starts_container(line: &str) -> bool {
    let trimmed = line.trim_start();
    if trimmed.starts_with('>') {
        return true;
    }
    if ["- ", "* ", "+ "].iter().any(|marker| trimmed.starts_with(marker)) {
        return true;
    }
    let digits = trimmed.chars().take_while(char::is_ascii_digit).count();
    digits > 0 && (trimmed[digits..].starts_with(". ") || trimmed[digits..].starts_with(") "))
}

/// GitHub-style anchor slug.
fn slugify(title: &str) -> String {
    let mut slug = String::with_capacity(title.len());
    for c in title.trim().chars() {
        if c.is_alphanumeric() || c == '_' || c == '-' {
            slug.extend(c.to_lowercase());
        } else if c == ' ' {
            slug.push('-');
        }
    }
    slug
}
