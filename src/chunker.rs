//! Markdown chunking for embeddings.
//!
//! Splits an item's documentation into semantically meaningful chunks using
//! AST-based heading detection. Every chunk gets the preamble (item path +
//! signature) prepended so each embedded text carries the item's identity.
//!
//! Additionally:
//! - The first paragraph before any heading is emitted as a standalone
//!   summary chunk when the body has more than one section, doubling its
//!   representation in vector space.
//! - Fenced code blocks of at least 80 bytes are extracted as standalone
//!   chunks.
//!
//! No maximum size is enforced; the embedding provider truncates if needed.

use std::ops::Range;

use pulldown_cmark::{Event, Parser, Tag, TagEnd};

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub text: String,
    pub index: usize,
}

/// Splits markdown into preamble-prefixed chunks.
pub fn chunk_sections(preamble: &str, markdown: &str) -> Vec<Chunk> {
    let markdown = markdown.trim();
    if markdown.is_empty() {
        return vec![Chunk { text: preamble.to_string(), index: 0 }];
    }

    let scan = scan_blocks(markdown);

    let mut sections: Vec<String> = Vec::new();
    if scan.heading_offsets.is_empty() {
        sections.push(markdown.to_string());
    } else {
        if scan.heading_offsets[0] > 0 {
            let intro = &markdown[..scan.heading_offsets[0]];
            if !intro.trim().is_empty() {
                sections.push(intro.trim().to_string());
            }
        }
        for (i, &offset) in scan.heading_offsets.iter().enumerate() {
            let end = scan
                .heading_offsets
                .get(i + 1)
                .copied()
                .unwrap_or(markdown.len());
            let section = markdown[offset..end].trim();
            if !section.is_empty() {
                sections.push(section.to_string());
            }
        }
    }

    let emit_summary = !scan.summary.is_empty() && sections.len() > 1;

    // With a dedicated summary chunk, the summary paragraph is removed from
    // the intro section so the two chunks do not duplicate each other.
    if emit_summary {
        if let Some(range) = &scan.summary_range {
            if !sections.is_empty() && scan.heading_offsets.first().copied().unwrap_or(0) > 0 {
                let first_heading = scan
                    .heading_offsets
                    .first()
                    .copied()
                    .unwrap_or(markdown.len());
                let before = markdown[..range.start.min(first_heading)].trim();
                let after = markdown[range.end.min(first_heading)..first_heading].trim();
                let stripped = match (before.is_empty(), after.is_empty()) {
                    (true, true) => String::new(),
                    (false, true) => before.to_string(),
                    (true, false) => after.to_string(),
                    (false, false) => format!("{before}\n\n{after}"),
                };
                if stripped.is_empty() {
                    sections.remove(0);
                } else {
                    sections[0] = stripped;
                }
            }
        }
    }

    let mut chunks = Vec::new();
    let mut push = |text: String, chunks: &mut Vec<Chunk>| {
        let index = chunks.len();
        chunks.push(Chunk { text: format!("{preamble}\n\n{text}"), index });
    };

    if emit_summary {
        push(scan.summary.clone(), &mut chunks);
    }
    for section in sections {
        push(section, &mut chunks);
    }
    for code in scan.code_blocks {
        push(format!("```\n{code}\n```"), &mut chunks);
    }

    if chunks.is_empty() {
        chunks.push(Chunk { text: preamble.to_string(), index: 0 });
    }
    chunks
}

struct BlockScan {
    heading_offsets: Vec<usize>,
    summary: String,
    summary_range: Option<Range<usize>>,
    code_blocks: Vec<String>,
}

/// Walks the markdown AST collecting top-level heading offsets, the first
/// paragraph before any heading, and long fenced code blocks.
fn scan_blocks(markdown: &str) -> BlockScan {
    let mut scan = BlockScan {
        heading_offsets: Vec::new(),
        summary: String::new(),
        summary_range: None,
        code_blocks: Vec::new(),
    };

    // Ranges of container blocks (lists, quotes, tables). Headings and code
    // blocks nested inside them are not split points.
    let mut container_ranges: Vec<Range<usize>> = Vec::new();
    let inside_container = |ranges: &[Range<usize>], offset: usize| {
        ranges.iter().any(|r| r.start < offset && offset < r.end)
    };

    let mut seen_heading = false;
    let mut in_summary = false;
    let mut in_code: Option<String> = None;

    for (event, range) in Parser::new(markdown).into_offset_iter() {
        match event {
            Event::Start(
                Tag::List(_) | Tag::BlockQuote(_) | Tag::Table(_) | Tag::FootnoteDefinition(_),
            ) => {
                if !inside_container(&container_ranges, range.start) {
                    container_ranges.push(range.clone());
                }
            }
            Event::Start(Tag::Heading { .. }) => {
                if !inside_container(&container_ranges, range.start) {
                    seen_heading = true;
                    scan.heading_offsets.push(range.start);
                }
            }
            Event::Start(Tag::Paragraph) => {
                if !seen_heading
                    && scan.summary_range.is_none()
                    && !inside_container(&container_ranges, range.start)
                {
                    scan.summary_range = Some(range.clone());
                    in_summary = true;
                }
            }
            Event::End(TagEnd::Paragraph) => {
                in_summary = false;
            }
            Event::Start(Tag::CodeBlock(_)) => {
                if !inside_container(&container_ranges, range.start) {
                    in_code = Some(String::new());
                }
            }
            Event::End(TagEnd::CodeBlock) => {
                if let Some(code) = in_code.take() {
                    let code = code.trim().to_string();
                    if code.len() >= 80 {
                        scan.code_blocks.push(code);
                    }
                }
            }
            Event::Text(text) => {
                if let Some(code) = in_code.as_mut() {
                    code.push_str(&text);
                } else if in_summary {
                    scan.summary.push_str(&text);
                }
            }
            Event::Code(code) => {
                if in_summary {
                    scan.summary.push_str(&code);
                }
            }
            Event::SoftBreak | Event::HardBreak => {
                if in_summary {
                    scan.summary.push(' ');
                }
            }
            _ => {}
        }
    }

    scan.summary = scan.summary.trim().to_string();
    scan
}

#[cfg(test)]
mod tests {
    use super::*;

    fn texts(chunks: &[Chunk]) -> Vec<&str> {
        chunks.iter().map(|c| c.text.as_str()).collect()
    }

    #[test]
    fn empty_markdown_yields_preamble_only() {
        let chunks = chunk_sections("serde::Serialize", "");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "serde::Serialize");
        assert_eq!(chunks[0].index, 0);
    }

    #[test]
    fn single_paragraph() {
        let chunks = chunk_sections("my_crate::Foo", "A simple struct for doing things.");
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].text, "my_crate::Foo\n\nA simple struct for doing things.");
    }

    #[test]
    fn summary_intro_and_section_split() {
        let chunks = chunk_sections(
            "p",
            "Summary line.\n\nMore intro.\n\n# Details\n\nThe details.",
        );
        assert_eq!(
            texts(&chunks),
            vec![
                "p\n\nSummary line.",
                "p\n\nMore intro.",
                "p\n\n# Details\n\nThe details.",
            ]
        );
    }

    #[test]
    fn preamble_on_every_chunk() {
        let md = "Summary line.\n\n# Section One\n\nContent of section one.\n\n# Section Two\n\nContent of section two.\n";
        let chunks = chunk_sections("tokio::spawn\npub fn spawn<F>(f: F)", md);
        assert!(chunks.len() >= 3);
        for chunk in &chunks {
            assert!(
                chunk.text.starts_with("tokio::spawn\npub fn spawn<F>(f: F)\n\n"),
                "missing preamble: {:?}",
                chunk.text
            );
        }
    }

    #[test]
    fn no_summary_chunk_for_single_section() {
        let chunks = chunk_sections("p", "Just one paragraph with no headings.");
        assert_eq!(chunks.len(), 1);
    }

    #[test]
    fn summary_stripped_when_intro_is_only_summary() {
        let chunks = chunk_sections("p", "Summary.\n\n# A\n\ntext");
        assert_eq!(texts(&chunks), vec!["p\n\nSummary.", "p\n\n# A\n\ntext"]);
    }

    #[test]
    fn long_code_block_extracted() {
        let code = "let x = foo();\n".repeat(10);
        let md = format!("Some text.\n\n```rust\n{code}```\n");
        let chunks = chunk_sections("p", &md);

        let found = chunks.iter().any(|c| {
            c.text.starts_with("p\n\n```\n") && c.text.contains(code.trim())
        });
        assert!(found, "expected a standalone code chunk, got {:?}", texts(&chunks));
    }

    #[test]
    fn short_code_block_not_extracted() {
        let chunks = chunk_sections("p", "Text.\n\n```rust\nlet x = 1;\n```\n");
        for chunk in &chunks {
            let body = chunk.text.strip_prefix("p\n\n").unwrap_or(&chunk.text);
            assert!(!body.starts_with("```\n"), "small code block extracted: {body:?}");
        }
    }

    #[test]
    fn code_block_at_exact_boundary() {
        let code = "x".repeat(80);
        let md = format!("Text.\n\n```\n{code}\n```\n");
        let chunks = chunk_sections("p", &md);
        let found = chunks
            .iter()
            .any(|c| c.text.strip_prefix("p\n\n").is_some_and(|b| b.starts_with("```")));
        assert!(found, "code block at exactly 80 bytes should be extracted");
    }

    #[test]
    fn splits_on_every_heading_depth() {
        let md = "# First\n\nContent one.\n\n## Second\n\nContent two.\n\n# Third\n\nContent three.\n";
        let chunks = chunk_sections("p", md);
        let all = texts(&chunks);
        assert!(all.iter().any(|t| t.contains("# First") && t.contains("Content one")));
        assert!(all.iter().any(|t| t.contains("## Second") && t.contains("Content two")));
        assert!(all.iter().any(|t| t.contains("# Third") && t.contains("Content three")));
    }

    #[test]
    fn indexes_are_sequential() {
        let md = "Summary.\n\n# A\n\ntext\n\n# B\n\ntext\n";
        let chunks = chunk_sections("p", md);
        for (i, chunk) in chunks.iter().enumerate() {
            assert_eq!(chunk.index, i);
        }
    }

    #[test]
    fn headings_without_content() {
        let chunks = chunk_sections("p", "# Heading One\n\n# Heading Two\n\n# Heading Three\n");
        assert!(chunks.len() >= 2);
    }

    #[test]
    fn multiple_code_blocks() {
        let code1 = "let a = 1;\n".repeat(10);
        let code2 = "let b = 2;\n".repeat(10);
        let md = format!("Intro.\n\n```rust\n{code1}```\n\nMiddle.\n\n```rust\n{code2}```\n");
        let chunks = chunk_sections("p", &md);

        let code_chunks = chunks
            .iter()
            .filter(|c| c.text.strip_prefix("p\n\n").is_some_and(|b| b.starts_with("```")))
            .count();
        assert_eq!(code_chunks, 2);
    }

    #[test]
    fn heading_inside_blockquote_is_not_a_split_point() {
        let md = "Intro paragraph.\n\n> # Quoted Heading\n> quoted text\n";
        let chunks = chunk_sections("p", md);
        assert_eq!(chunks.len(), 1, "quoted heading should not split: {:?}", texts(&chunks));
    }
}
