//! Header-aware markdown chunker.
//!
//! Splits a markdown document into [`Chunk`]s in two passes:
//!
//! 1. **Sections.** Every ATX header (`#` to `######`) outside a code fence
//!    opens a new section. Text before the first header becomes a preamble
//!    section with an empty header and level `0`.
//! 2. **Parts.** A section longer than `max_chars` is cut on blank-line
//!    boundaries. Fenced code blocks and runs of table rows are atomic, so a
//!    cut never lands inside either. Each part after the first is seeded with
//!    the last `overlap_lines` lines of the previous part.
//!
//! A section with no usable cut point is emitted whole, even when it is
//! larger than `max_chars`. Whitespace-only input yields no chunks.
//!
//! Chunk indices are contiguous from `0` across the document and every chunk
//! carries `total_chunks`.

use crate::models::{Chunk, ChunkMetadata, ChunkType};

struct Section<'a> {
    header: String,
    level: u8,
    lines: Vec<&'a str>,
}

/// Split markdown into header-aware, overlapping chunks.
pub fn chunk_markdown(text: &str, max_chars: usize, overlap_lines: usize) -> Vec<Chunk> {
    let sections = split_sections(text);
    let mut pieces: Vec<(String, &Section, ChunkType)> = Vec::new();

    for section in &sections {
        let body = section.lines.join("\n");
        let body = body.trim();
        if body.is_empty() {
            continue;
        }

        if body.chars().count() <= max_chars {
            pieces.push((body.to_string(), section, ChunkType::CompleteSection));
            continue;
        }

        let parts = split_section(&section.lines, max_chars, overlap_lines);
        let chunk_type = if parts.len() > 1 {
            ChunkType::SectionPart
        } else {
            ChunkType::CompleteSection
        };
        for part in parts {
            let content = part.join("\n").trim().to_string();
            if !content.is_empty() {
                pieces.push((content, section, chunk_type));
            }
        }
    }

    let total = pieces.len();
    pieces
        .into_iter()
        .enumerate()
        .map(|(i, (content, section, chunk_type))| Chunk {
            chunk_index: i as i64,
            metadata: ChunkMetadata {
                header: section.header.clone(),
                header_level: section.level,
                chunk_type,
                size: content.chars().count(),
                total_chunks: total,
            },
            content,
        })
        .collect()
}

fn split_sections(text: &str) -> Vec<Section<'_>> {
    let mut sections = Vec::new();
    let mut current = Section {
        header: String::new(),
        level: 0,
        lines: Vec::new(),
    };
    let mut fence = FenceTracker::default();

    for line in text.lines() {
        if !fence.is_open() {
            if let Some((level, header)) = parse_header(line) {
                if !current.lines.is_empty() {
                    sections.push(current);
                }
                current = Section {
                    header,
                    level,
                    lines: vec![line],
                };
                continue;
            }
        }
        fence.advance(line);
        current.lines.push(line);
    }

    if !current.lines.is_empty() {
        sections.push(current);
    }
    sections
}

/// Group lines into blocks separated by blank lines. Blank lines inside a
/// code fence do not end a block.
fn split_blocks<'a>(lines: &[&'a str]) -> Vec<Vec<&'a str>> {
    let mut blocks = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    let mut fence = FenceTracker::default();

    for &line in lines {
        if line.trim().is_empty() && !fence.is_open() {
            if !current.is_empty() {
                blocks.push(std::mem::take(&mut current));
            }
            continue;
        }
        fence.advance(line);
        current.push(line);
    }

    if !current.is_empty() {
        blocks.push(current);
    }
    blocks
}

fn split_section<'a>(
    lines: &[&'a str],
    max_chars: usize,
    overlap_lines: usize,
) -> Vec<Vec<&'a str>> {
    let mut parts = Vec::new();
    let mut current: Vec<&str> = Vec::new();
    // False until the first block lands.
    let mut fresh = false;

    for block in split_blocks(lines) {
        let block_len = joined_len(&block);
        let projected = if current.is_empty() {
            block_len
        } else {
            joined_len(&current) + 2 + block_len
        };

        if projected > max_chars && fresh {
            let overlap = overlap_tail(&current, overlap_lines);
            parts.push(std::mem::replace(&mut current, overlap));
        }

        if !current.is_empty() {
            current.push("");
        }
        current.extend(block);
        fresh = true;
    }

    if fresh {
        parts.push(current);
    }
    parts
}

/// The last `n` lines of a part, cut after its final fence delimiter so the
/// overlap never opens or closes a fence. At most half the part is carried,
/// so repeated overlap cannot grow parts without bound.
fn overlap_tail<'a>(lines: &[&'a str], n: usize) -> Vec<&'a str> {
    if n == 0 {
        return Vec::new();
    }
    let n = n.min((lines.len() / 2).max(1));
    let mut start = lines.len().saturating_sub(n);

    let mut fence = FenceTracker::default();
    for (i, line) in lines.iter().enumerate() {
        if fence.advance(line) && i >= start {
            start = i + 1;
        }
    }

    let mut tail = lines[start..].to_vec();
    while tail.first().is_some_and(|l| l.trim().is_empty()) {
        tail.remove(0);
    }
    tail
}

fn joined_len(lines: &[&str]) -> usize {
    let chars: usize = lines.iter().map(|l| l.chars().count()).sum();
    chars + lines.len().saturating_sub(1)
}

fn parse_header(line: &str) -> Option<(u8, String)> {
    let hashes = line.chars().take_while(|&c| c == '#').count();
    if hashes == 0 || hashes > 6 {
        return None;
    }
    let rest = &line[hashes..];
    if !rest.is_empty() && !rest.starts_with([' ', '\t']) {
        return None;
    }
    Some((hashes as u8, rest.trim().to_string()))
}

/// An open code fence: its marker character and run length.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Fence {
    marker: char,
    len: usize,
}

impl Fence {
    fn opened_by(line: &str) -> Option<Fence> {
        let trimmed = line.trim_start();
        let marker = trimmed.chars().next().filter(|&c| c == '`' || c == '~')?;
        let len = trimmed.chars().take_while(|&c| c == marker).count();
        (len >= 3).then_some(Fence { marker, len })
    }

    /// A closing line repeats the opening marker at least as many times and
    /// carries nothing else.
    fn closed_by(&self, line: &str) -> bool {
        let trimmed = line.trim();
        let run = trimmed.chars().take_while(|&c| c == self.marker).count();
        run >= self.len && run == trimmed.chars().count()
    }
}

#[derive(Debug, Default)]
struct FenceTracker {
    open: Option<Fence>,
}

impl FenceTracker {
    fn is_open(&self) -> bool {
        self.open.is_some()
    }

    /// Feed the next line. Returns true when the line opens or closes a fence.
    fn advance(&mut self, line: &str) -> bool {
        match self.open {
            Some(fence) if fence.closed_by(line) => {
                self.open = None;
                true
            }
            Some(_) => false,
            None => {
                self.open = Fence::opened_by(line);
                self.open.is_some()
            }
        }
    }
}

/// Title of a document: its first `# ` header, else the file stem with
/// separators turned into spaces and each word capitalised.
pub fn extract_title(content: &str, file_stem: &str) -> String {
    for line in content.lines() {
        if let Some(title) = line.strip_prefix("# ") {
            let title = title.trim();
            if !title.is_empty() {
                return title.to_string();
            }
        }
    }

    file_stem
        .replace(['_', '-'], " ")
        .split_whitespace()
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => first
                    .to_uppercase()
                    .chain(chars.flat_map(|c| c.to_lowercase()))
                    .collect::<String>(),
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join(" ")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fence_count(s: &str) -> usize {
        let mut fence = FenceTracker::default();
        s.lines().filter(|l| fence.advance(l)).count()
    }

    #[test]
    fn empty_and_blank_text_yield_nothing() {
        assert!(chunk_markdown("", 512, 3).is_empty());
        assert!(chunk_markdown("  \n\n\t\n", 512, 3).is_empty());
    }

    #[test]
    fn small_document_is_one_complete_section() {
        let chunks = chunk_markdown("# Notes\n\nShort body.", 512, 3);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].chunk_index, 0);
        assert_eq!(chunks[0].content, "# Notes\n\nShort body.");
        assert_eq!(chunks[0].metadata.header, "Notes");
        assert_eq!(chunks[0].metadata.header_level, 1);
        assert_eq!(chunks[0].metadata.chunk_type, ChunkType::CompleteSection);
        assert_eq!(chunks[0].metadata.total_chunks, 1);
        assert_eq!(chunks[0].metadata.size, chunks[0].content.chars().count());
    }

    #[test]
    fn each_header_starts_a_section() {
        let text = "Preamble line.\n\n# Alpha\n\nalpha body\n\n## Beta\n\nbeta body\n\n### Gamma\ngamma body";
        let chunks = chunk_markdown(text, 512, 3);
        let headers: Vec<(&str, u8)> = chunks
            .iter()
            .map(|c| (c.metadata.header.as_str(), c.metadata.header_level))
            .collect();
        assert_eq!(headers, vec![("", 0), ("Alpha", 1), ("Beta", 2), ("Gamma", 3)]);
        assert!(chunks[2].content.starts_with("## Beta"));
        assert!(chunks.iter().all(|c| c.metadata.total_chunks == 4));
    }

    #[test]
    fn hash_lines_inside_fences_are_not_headers() {
        let text = "# Script\n\n```bash\n# install deps\nmake\n```";
        let chunks = chunk_markdown(text, 512, 3);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].content.contains("# install deps"));
    }

    #[test]
    fn hashtag_without_space_is_not_a_header() {
        let chunks = chunk_markdown("#tag line\n\nbody", 512, 3);
        assert_eq!(chunks.len(), 1);
        assert_eq!(chunks[0].metadata.header_level, 0);
    }

    #[test]
    fn oversized_section_splits_into_parts_with_overlap() {
        let paragraphs: Vec<String> = (0..12)
            .map(|i| format!("Paragraph {} has a few words in it.", i))
            .collect();
        let text = format!("# Long\n\n{}", paragraphs.join("\n\n"));
        let chunks = chunk_markdown(&text, 120, 1);

        assert!(chunks.len() > 1);
        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.chunk_index, i as i64);
            assert_eq!(c.metadata.chunk_type, ChunkType::SectionPart);
            assert_eq!(c.metadata.header, "Long");
        }
        for pair in chunks.windows(2) {
            let last_line = pair[0].content.lines().last().unwrap();
            assert!(
                pair[1].content.starts_with(last_line),
                "expected {:?} to start with {:?}",
                pair[1].content,
                last_line
            );
        }
    }

    #[test]
    fn zero_overlap_does_not_repeat_lines() {
        let text = (0..10)
            .map(|i| format!("line {}", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_markdown(&text, 20, 0);
        let joined: Vec<&str> = chunks
            .iter()
            .flat_map(|c| c.content.lines())
            .filter(|l| !l.is_empty())
            .collect();
        assert_eq!(joined.len(), 10);
    }

    #[test]
    fn fenced_block_larger_than_target_stays_whole() {
        let code: Vec<String> = (0..30).map(|i| format!("let value_{} = {};", i, i)).collect();
        let text = format!(
            "# Example\n\nSome intro text before the code.\n\n```rust\n{}\n\n{}\n```\n\nClosing remarks after the code.",
            code[..15].join("\n"),
            code[15..].join("\n")
        );
        let chunks = chunk_markdown(&text, 100, 4);

        let holders: Vec<&Chunk> = chunks.iter().filter(|c| c.content.contains("```rust")).collect();
        assert_eq!(holders.len(), 1);
        let holder = holders[0];
        for line in &code {
            assert!(holder.content.contains(line.as_str()));
        }
        assert!(holder.content.chars().count() > 100);
        for c in &chunks {
            assert_eq!(fence_count(&c.content) % 2, 0, "unbalanced fence in {:?}", c.content);
        }
    }

    #[test]
    fn tilde_line_inside_backtick_fence_does_not_close_it() {
        let text = "# Doc\n\nIntro paragraph that takes up some room.\n\n\
```markdown\n~~~\ninner line 1\ninner line 2\n# not a header\n\n\
inner line 3\ninner line 4\ninner line 5\n~~~\n```";
        let chunks = chunk_markdown(text, 80, 2);

        assert!(chunks.iter().all(|c| c.metadata.header == "Doc"));
        let holders: Vec<&Chunk> = chunks.iter().filter(|c| c.content.contains("```markdown")).collect();
        assert_eq!(holders.len(), 1);
        assert!(holders[0].content.contains("inner line 2\n# not a header\n\ninner line 3"));
        assert!(holders[0].content.ends_with("~~~\n```"));
        for c in &chunks {
            assert_eq!(fence_count(&c.content) % 2, 0, "unbalanced fence in {:?}", c.content);
        }
    }

    #[test]
    fn longer_fence_needs_an_equally_long_close() {
        let mut fence = FenceTracker::default();
        assert!(fence.advance("````md"));
        assert!(!fence.advance("```"));
        assert!(!fence.advance("````rust"));
        assert!(fence.is_open());
        assert!(fence.advance("`````"));
        assert!(!fence.is_open());
    }

    #[test]
    fn large_overlap_does_not_grow_parts() {
        let text = (0..20)
            .map(|i| format!("Paragraph number {:02}.", i))
            .collect::<Vec<_>>()
            .join("\n\n");
        let chunks = chunk_markdown(&format!("# Doc\n\n{}", text), 30, 50);

        assert!(chunks.len() > 5);
        for c in &chunks {
            assert!(c.metadata.size <= 60, "part grew to {}: {:?}", c.metadata.size, c.content);
        }
        assert!(chunks.last().unwrap().content.ends_with("Paragraph number 19."));
    }

    #[test]
    fn table_rows_are_never_split() {
        let rows: Vec<String> = (0..25).map(|i| format!("| row {} | value {} |", i, i)).collect();
        let text = format!(
            "# Table\n\nLead paragraph.\n\n| name | value |\n|------|-------|\n{}\n\nTail paragraph.",
            rows.join("\n")
        );
        let chunks = chunk_markdown(&text, 80, 2);

        let holders: Vec<&Chunk> = chunks.iter().filter(|c| c.content.contains("| name | value |")).collect();
        assert_eq!(holders.len(), 1);
        for row in &rows {
            assert!(holders[0].content.contains(row.as_str()));
        }
    }

    #[test]
    fn unsplittable_section_is_one_oversized_chunk() {
        let text = format!("# Wall\n{}", "word ".repeat(300));
        let chunks = chunk_markdown(&text, 100, 3);
        assert_eq!(chunks.len(), 1);
        assert!(chunks[0].metadata.size > 100);
        assert_eq!(chunks[0].metadata.chunk_type, ChunkType::CompleteSection);
    }

    #[test]
    fn deterministic() {
        let text = "# A\n\none\n\ntwo\n\nthree\n\n# B\n\nfour";
        let a = chunk_markdown(text, 10, 1);
        let b = chunk_markdown(text, 10, 1);
        assert_eq!(a.len(), b.len());
        for (x, y) in a.iter().zip(b.iter()) {
            assert_eq!(x.content, y.content);
            assert_eq!(x.metadata, y.metadata);
        }
    }

    #[test]
    fn title_from_first_h1() {
        assert_eq!(extract_title("intro\n# Real Title \nbody", "file"), "Real Title");
        assert_eq!(extract_title("## Not h1\nbody", "deploy_notes-v2"), "Deploy Notes V2");
        assert_eq!(extract_title("", "README"), "Readme");
    }
}
