//! Property tests for fence extraction over generated documents.
//!
//! Documents are random sequences of prose lines and fenced blocks with
//! varied fence characters, run lengths and indentation.

use doctest_core::{CodeBlock, Document, MarkdownParser, ParseError, ParseErrorKind, Parser};
use proptest::prelude::*;

fn parse(src: &str) -> Result<Vec<CodeBlock>, ParseError> {
    MarkdownParser::default().parse(&Document::new("p.md", src))
}

#[derive(Debug, Clone)]
enum Segment {
    Prose(String),
    Block {
        fence: String,
        indent: usize,
        language: String,
        lines: Vec<String>,
    },
}

/// A document as written plus what the parser should find in it.
struct Rendered {
    text: String,
    openers: Vec<usize>,
    codes: Vec<String>,
}

fn arb_segment() -> impl Strategy<Value = Segment> {
    prop_oneof![
        // Prose never starts with a fence character.
        "[A-Za-z][a-z0-9 .,]{0,30}".prop_map(Segment::Prose),
        (
            prop_oneof![Just('`'), Just('~')],
            3usize..7,
            0usize..4,
            "[a-z]{1,8}",
            prop::collection::vec("[a-z0-9 .=()]{0,24}", 0..5),
        )
            .prop_map(|(ch, len, indent, language, lines)| Segment::Block {
                fence: ch.to_string().repeat(len),
                indent,
                language,
                lines,
            }),
    ]
}

fn arb_document() -> impl Strategy<Value = Vec<Segment>> {
    prop::collection::vec(arb_segment(), 0..24)
}

/// Render `segments`, leaving out the closer of block `drop_closer`.
fn render(segments: &[Segment], drop_closer: Option<usize>) -> Rendered {
    let mut text = String::new();
    let mut line = 0usize;
    let mut openers = Vec::new();
    let mut codes = Vec::new();
    let mut push = |text: &mut String, s: &str| {
        text.push_str(s);
        text.push('\n');
        line += 1;
        line
    };

    for segment in segments {
        match segment {
            Segment::Prose(prose) => {
                push(&mut text, prose);
                push(&mut text, "");
            }
            Segment::Block {
                fence,
                indent,
                language,
                lines,
            } => {
                let pad = " ".repeat(*indent);
                let block = openers.len();
                openers.push(push(&mut text, &format!("{pad}{fence}{language}")));
                for code in lines {
                    push(&mut text, &format!("{pad}{code}"));
                }
                if drop_closer != Some(block) {
                    push(&mut text, &format!("{pad}{fence}"));
                }

                let mut code = lines.join("\n");
                if !code.is_empty() {
                    code.push('\n');
                }
                codes.push(code);
            }
        }
    }

    Rendered {
        text,
        openers,
        codes,
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(128))]

    #[test]
    fn test_block_count_equals_fence_pairs(segments in arb_document()) {
        let doc = render(&segments, None);
        let parsed = parse(&doc.text);
        prop_assert!(parsed.is_ok(), "balanced document failed: {:?}", parsed);
        let blocks = parsed.unwrap();

        prop_assert_eq!(blocks.len(), doc.openers.len());
        for (i, block) in blocks.iter().enumerate() {
            prop_assert_eq!(block.id.index, i);
            prop_assert_eq!(block.line(), doc.openers[i]);
            prop_assert_eq!(&block.code, &doc.codes[i]);
        }
    }

    #[test]
    fn test_missing_closer_reported_at_its_opener(
        segments in arb_document(),
        pick in any::<prop::sample::Index>(),
    ) {
        let count = segments
            .iter()
            .filter(|s| matches!(s, Segment::Block { .. }))
            .count();
        prop_assume!(count > 0);
        let dropped = pick.index(count);

        let doc = render(&segments, Some(dropped));
        let err = match parse(&doc.text) {
            Ok(blocks) => return Err(TestCaseError::fail(format!(
                "unbalanced document parsed into {} blocks", blocks.len()
            ))),
            Err(err) => err,
        };
        prop_assert!(matches!(
            err.kind,
            ParseErrorKind::Unterminated | ParseErrorKind::AmbiguousNesting
        ));
        prop_assert_eq!(err.line, doc.openers[dropped]);
    }

    #[test]
    fn test_parse_is_deterministic(segments in arb_document()) {
        let doc = render(&segments, None);
        prop_assert_eq!(parse(&doc.text), parse(&doc.text));
    }
}

#[test]
fn test_forgotten_closer_before_next_block() {
    let src = "```sh\necho a\n\ntext\n\n```python\nprint(1)\n```\n";
    let err = parse(src).unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::AmbiguousNesting);
    assert_eq!(err.line, 1);
}

#[test]
fn test_dangling_fence_at_end_of_input() {
    let err = parse("# Title\n\n```sh\necho ok\n```\n\n```bash\necho dangling\n").unwrap_err();
    assert_eq!(err.kind, ParseErrorKind::Unterminated);
    assert_eq!(err.line, 7);
}
