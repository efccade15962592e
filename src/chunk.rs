//! Boundary-seeking text chunker with exact overlap.
//!
//! Splits extracted page text into [`Chunk`]s of at most `chunk_size`
//! characters. Each chunk ends at the best boundary available inside its
//! window, trying paragraph breaks first, then line breaks, sentence ends,
//! word gaps, and finally an arbitrary character offset.
//!
//! Consecutive chunks of the same page share exactly `chunk_overlap`
//! characters: the next chunk starts with the tail of the previous one.
//! Dropping that shared prefix from every chunk after the first and
//! concatenating gives back the page text unchanged.
//!
//! Lengths are counted in `char`s so multi-byte text is never split inside
//! a code point.

use std::collections::HashMap;

use crate::config::ChunkingConfig;
use crate::models::{Chunk, PageText};

/// Break candidates, most preferred first.
const SEPARATORS: &[&str] = &["\n\n", "\n", ". ", "! ", "? ", " "];

/// Splits pages into overlapping, provenance-tagged chunks.
#[derive(Debug, Clone, Copy)]
pub struct Chunker {
    chunk_size: usize,
    chunk_overlap: usize,
}

impl Chunker {
    /// Create a chunker. `chunk_overlap` is clamped below `chunk_size`.
    pub fn new(chunk_size: usize, chunk_overlap: usize) -> Self {
        let chunk_size = chunk_size.max(1);
        Self {
            chunk_size,
            chunk_overlap: chunk_overlap.min(chunk_size - 1),
        }
    }

    pub fn from_config(config: &ChunkingConfig) -> Self {
        Self::new(config.chunk_size, config.chunk_overlap)
    }

    pub fn chunk_size(&self) -> usize {
        self.chunk_size
    }

    pub fn chunk_overlap(&self) -> usize {
        self.chunk_overlap
    }

    /// Split pages into chunks, preserving input order.
    ///
    /// `sequence_index` counts chunks per `source_id`, so it stays
    /// contiguous across the pages of one document. Blank pages produce
    /// no chunks.
    pub fn split(&self, pages: &[PageText]) -> Vec<Chunk> {
        let mut next_index: HashMap<&str, u32> = HashMap::new();
        let mut chunks = Vec::new();

        for page in pages {
            for text in split_text(&page.text, self.chunk_size, self.chunk_overlap) {
                let counter = next_index.entry(page.source_id.as_str()).or_insert(0);
                chunks.push(Chunk {
                    text,
                    source_id: page.source_id.clone(),
                    page_number: page.page_number,
                    sequence_index: *counter,
                });
                *counter += 1;
            }
        }

        chunks
    }
}

/// Split a single text into overlapping pieces of at most `chunk_size` chars.
///
/// Returns an empty vector for empty or whitespace-only text, and the whole
/// text as one piece when it already fits.
pub fn split_text(text: &str, chunk_size: usize, chunk_overlap: usize) -> Vec<String> {
    if text.trim().is_empty() {
        return Vec::new();
    }

    let chunk_size = chunk_size.max(1);
    let overlap = chunk_overlap.min(chunk_size - 1);
    let chars: Vec<char> = text.chars().collect();
    let len = chars.len();

    if len <= chunk_size {
        return vec![text.to_string()];
    }

    let mut pieces = Vec::new();
    let mut start = 0;

    loop {
        let max_end = (start + chunk_size).min(len);
        if max_end == len {
            pieces.push(chars[start..len].iter().collect());
            break;
        }

        // The break must leave room for the overlap and still advance;
        // past that, avoid chunks under half the target size.
        let min_end = (start + overlap + 1).max(start + chunk_size / 2);
        let end = find_break(&chars, min_end, max_end, SEPARATORS).unwrap_or(max_end);

        pieces.push(chars[start..end].iter().collect());
        start = end - overlap;
    }

    pieces
}

/// Find the latest position in `min_end..=max_end` that directly follows a
/// separator, trying each separator level in turn.
fn find_break(chars: &[char], min_end: usize, max_end: usize, separators: &[&str]) -> Option<usize> {
    let (sep, rest) = separators.split_first()?;
    let sep: Vec<char> = sep.chars().collect();

    let found = (min_end..=max_end).rev().find(|&pos| {
        pos >= sep.len() && chars[pos - sep.len()..pos] == sep[..]
    });

    match found {
        Some(pos) => Some(pos),
        None => find_break(chars, min_end, max_end, rest),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn reconstruct(pieces: &[String], overlap: usize) -> String {
        let mut out = String::new();
        for (i, p) in pieces.iter().enumerate() {
            if i == 0 {
                out.push_str(p);
            } else {
                out.extend(p.chars().skip(overlap));
            }
        }
        out
    }

    fn assert_exact_overlap(pieces: &[String], overlap: usize) {
        for pair in pieces.windows(2) {
            let prev: Vec<char> = pair[0].chars().collect();
            let next: Vec<char> = pair[1].chars().collect();
            assert_eq!(
                prev[prev.len() - overlap..],
                next[..overlap],
                "chunks do not share exactly {} chars",
                overlap
            );
        }
    }

    fn long_document() -> String {
        (0..40)
            .map(|i| {
                format!(
                    "Paragraph {} discusses quarterly figures. Revenue moved by {} percent! \
                     Costs were reviewed again. Was the forecast met? Mostly yes.",
                    i,
                    i * 3
                )
            })
            .collect::<Vec<_>>()
            .join("\n\n")
    }

    #[test]
    fn test_short_text_single_chunk() {
        let pieces = split_text("Revenue was $5M.", 1000, 200);
        assert_eq!(pieces, vec!["Revenue was $5M.".to_string()]);
    }

    #[test]
    fn test_text_exactly_chunk_size_is_one_chunk() {
        let text = "a".repeat(1000);
        let pieces = split_text(&text, 1000, 200);
        assert_eq!(pieces.len(), 1);
        assert_eq!(pieces[0], text);
    }

    #[test]
    fn test_empty_and_blank_text() {
        assert!(split_text("", 1000, 200).is_empty());
        assert!(split_text("  \n\n \t", 1000, 200).is_empty());
    }

    #[test]
    fn test_long_text_overlap_and_reconstruction() {
        let text = long_document();
        let pieces = split_text(&text, 1000, 200);
        assert!(pieces.len() > 1);
        for p in &pieces {
            assert!(p.chars().count() <= 1000);
        }
        assert_exact_overlap(&pieces, 200);
        assert_eq!(reconstruct(&pieces, 200), text);
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let text = long_document();
        let pieces = split_text(&text, 1000, 200);
        for p in &pieces[..pieces.len() - 1] {
            assert!(p.ends_with("\n\n"), "chunk should end at a paragraph break: {:?}", &p[p.len() - 20..]);
        }
    }

    #[test]
    fn test_falls_back_to_sentences_then_words() {
        let sentences = (0..60)
            .map(|i| format!("Sentence number {} is here.", i))
            .collect::<Vec<_>>()
            .join(" ");
        let pieces = split_text(&sentences, 200, 50);
        for p in &pieces[..pieces.len() - 1] {
            assert!(p.ends_with(". "), "expected sentence break, got {:?}", p);
        }
        assert_eq!(reconstruct(&pieces, 50), sentences);

        let words = "lorem ipsum dolor ".repeat(40);
        let pieces = split_text(&words, 100, 20);
        for p in &pieces[..pieces.len() - 1] {
            assert!(p.ends_with(' '));
        }
        assert_eq!(reconstruct(&pieces, 20), words);
    }

    #[test]
    fn test_hard_split_without_separators() {
        let text = "x".repeat(2500);
        let pieces = split_text(&text, 1000, 200);
        assert_eq!(pieces[0].len(), 1000);
        assert_eq!(pieces[1].len(), 1000);
        assert_exact_overlap(&pieces, 200);
        assert_eq!(reconstruct(&pieces, 200), text);
    }

    #[test]
    fn test_multibyte_text_is_split_on_chars() {
        let text = "Umsatz stieg um fünf Prozent — żółć ✓ ".repeat(60);
        let pieces = split_text(&text, 300, 60);
        for p in &pieces {
            assert!(p.chars().count() <= 300);
        }
        assert_exact_overlap(&pieces, 60);
        assert_eq!(reconstruct(&pieces, 60), text);
    }

    #[test]
    fn test_zero_overlap() {
        let text = long_document();
        let pieces = split_text(&text, 500, 0);
        assert_eq!(pieces.concat(), text);
    }

    #[test]
    fn test_split_pages_keeps_provenance_and_sequence() {
        let chunker = Chunker::new(120, 20);
        let body = "Alpha beta gamma delta. ".repeat(20);
        let pages = vec![
            PageText::new("report.pdf", Some(1), body.clone()),
            PageText::new("report.pdf", Some(2), "Revenue was $5M."),
            PageText::new("other.pdf", Some(1), "Unrelated text."),
            PageText::new("report.pdf", Some(3), "   "),
        ];
        let chunks = chunker.split(&pages);

        let report: Vec<&Chunk> = chunks.iter().filter(|c| c.source_id == "report.pdf").collect();
        for (i, c) in report.iter().enumerate() {
            assert_eq!(c.sequence_index, i as u32);
        }
        let last = report.last().unwrap();
        assert_eq!(last.page_number, Some(2));
        assert_eq!(last.text, "Revenue was $5M.");

        let other: Vec<&Chunk> = chunks.iter().filter(|c| c.source_id == "other.pdf").collect();
        assert_eq!(other.len(), 1);
        assert_eq!(other[0].sequence_index, 0);
        assert!(chunks.iter().all(|c| c.page_number != Some(3)));
    }

    #[test]
    fn test_deterministic() {
        let chunker = Chunker::new(300, 50);
        let pages = vec![PageText::new("a.pdf", Some(1), long_document())];
        assert_eq!(chunker.split(&pages), chunker.split(&pages));
    }

    #[test]
    fn test_overlap_clamped_below_size() {
        let chunker = Chunker::new(10, 50);
        assert_eq!(chunker.chunk_overlap(), 9);
        let pieces = split_text(&"abcdefghij".repeat(5), 10, 50);
        assert!(pieces.iter().all(|p| p.chars().count() <= 10));
    }
}
