//! Boundary-aware text splitting.
//!
//! Provides the `TextSplitter` trait and a recursive implementation that
//! prefers semantic boundaries: paragraph break, line break, sentence end,
//! word boundary and finally single characters.

use std::collections::VecDeque;

/// Separators in priority order. The empty separator splits into characters.
pub const DEFAULT_SEPARATORS: [&str; 5] = ["\n\n", "\n", ". ", " ", ""];

/// Trait for splitting one text into ordered, possibly overlapping pieces.
pub trait TextSplitter: Send + Sync {
    /// Split `text` into pieces of at most `chunk_size` characters where the
    /// boundaries allow it, with up to `overlap` characters shared between
    /// adjacent pieces.
    fn split(&self, text: &str, chunk_size: usize, overlap: usize) -> Vec<String>;
}

/// Recursive character splitter.
///
/// Algorithm:
/// 1. Pick the highest-priority separator present in the text
/// 2. Cut the text before every occurrence (the separator leads the next piece)
/// 3. Greedily merge pieces up to `chunk_size`, carrying an `overlap` tail
/// 4. Recurse with lower-priority separators into pieces that are still too large
#[derive(Debug, Clone)]
pub struct RecursiveSplitter {
    separators: Vec<String>,
}

impl Default for RecursiveSplitter {
    fn default() -> Self {
        Self::new()
    }
}

impl RecursiveSplitter {
    /// Create a splitter with the default separator hierarchy.
    pub fn new() -> Self {
        Self::with_separators(DEFAULT_SEPARATORS.iter().map(|s| s.to_string()).collect())
    }

    /// Create a splitter with a custom separator hierarchy.
    pub fn with_separators(separators: Vec<String>) -> Self {
        Self { separators }
    }
}

impl TextSplitter for RecursiveSplitter {
    fn split(&self, text: &str, chunk_size: usize, overlap: usize) -> Vec<String> {
        if chunk_size == 0 || text.trim().is_empty() {
            return Vec::new();
        }

        let overlap = overlap.min(chunk_size.saturating_sub(1));
        let separators: Vec<&str> = self.separators.iter().map(String::as_str).collect();

        split_recursive(text, &separators, chunk_size, overlap)
    }
}

fn char_len(s: &str) -> usize {
    s.chars().count()
}

fn split_recursive(
    text: &str,
    separators: &[&str],
    chunk_size: usize,
    overlap: usize,
) -> Vec<String> {
    let (separator, finer) = pick_separator(text, separators);

    let mut chunks = Vec::new();
    let mut fitting: Vec<&str> = Vec::new();

    for piece in split_keeping_separator(text, separator) {
        if char_len(piece) < chunk_size {
            fitting.push(piece);
            continue;
        }

        if !fitting.is_empty() {
            chunks.extend(merge_pieces(&fitting, chunk_size, overlap));
            fitting.clear();
        }

        if finer.is_empty() {
            let trimmed = piece.trim();
            if !trimmed.is_empty() {
                chunks.push(trimmed.to_string());
            }
        } else {
            chunks.extend(split_recursive(piece, finer, chunk_size, overlap));
        }
    }

    if !fitting.is_empty() {
        chunks.extend(merge_pieces(&fitting, chunk_size, overlap));
    }

    chunks
}

/// First separator present in `text`, plus the finer separators after it.
fn pick_separator<'a, 's>(text: &str, separators: &'a [&'s str]) -> (&'s str, &'a [&'s str]) {
    for (i, &sep) in separators.iter().enumerate() {
        if sep.is_empty() {
            return (sep, &[]);
        }
        if text.contains(sep) {
            return (sep, &separators[i + 1..]);
        }
    }
    (separators.last().copied().unwrap_or(""), &[])
}

/// Cut `text` before each separator occurrence. Empty pieces are dropped.
fn split_keeping_separator<'t>(text: &'t str, separator: &str) -> Vec<&'t str> {
    if separator.is_empty() {
        return text
            .char_indices()
            .map(|(i, c)| &text[i..i + c.len_utf8()])
            .collect();
    }

    let mut pieces = Vec::new();
    let mut start = 0;
    for (idx, _) in text.match_indices(separator) {
        if idx > start {
            pieces.push(&text[start..idx]);
        }
        start = idx;
    }
    if start < text.len() {
        pieces.push(&text[start..]);
    }
    pieces
}

/// Greedily merge adjacent pieces into chunks, keeping an overlap tail.
fn merge_pieces(pieces: &[&str], chunk_size: usize, overlap: usize) -> Vec<String> {
    let mut chunks = Vec::new();
    let mut window: VecDeque<(&str, usize)> = VecDeque::new();
    let mut total = 0usize;

    for &piece in pieces {
        let len = char_len(piece);

        if total + len > chunk_size && !window.is_empty() {
            if let Some(chunk) = join_window(&window) {
                chunks.push(chunk);
            }

            // Drop from the front until only the overlap tail remains
            // and the next piece fits.
            while total > overlap || (total + len > chunk_size && total > 0) {
                match window.pop_front() {
                    Some((_, front_len)) => total -= front_len,
                    None => break,
                }
            }
        }

        window.push_back((piece, len));
        total += len;
    }

    if let Some(chunk) = join_window(&window) {
        chunks.push(chunk);
    }

    chunks
}

fn join_window(window: &VecDeque<(&str, usize)>) -> Option<String> {
    let joined: String = window.iter().map(|(piece, _)| *piece).collect();
    let trimmed = joined.trim();
    (!trimmed.is_empty()).then(|| trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn splitter() -> RecursiveSplitter {
        RecursiveSplitter::new()
    }

    #[test]
    fn test_blank_text_yields_nothing() {
        assert!(splitter().split("", 100, 10).is_empty());
        assert!(splitter().split("  \n\n \t", 100, 10).is_empty());
    }

    #[test]
    fn test_short_text_is_single_piece() {
        let pieces = splitter().split("A short note.", 100, 10);
        assert_eq!(pieces, vec!["A short note.".to_string()]);
    }

    #[test]
    fn test_prefers_paragraph_boundaries() {
        let first = "First paragraph sentence one. Sentence two.";
        let second = "Second paragraph sentence one. Sentence two.";
        let text = format!("{first}\n\n{second}");

        let pieces = splitter().split(&text, 50, 0);

        assert_eq!(pieces, vec![first.to_string(), second.to_string()]);
    }

    #[test]
    fn test_falls_back_to_words() {
        let text = "alpha beta gamma delta epsilon zeta eta theta iota kappa";
        let pieces = splitter().split(text, 20, 0);

        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(piece.chars().count() <= 20, "piece too long: {piece:?}");
            // Word boundaries are respected
            for word in piece.split_whitespace() {
                assert!(text.split_whitespace().any(|w| w == word));
            }
        }
    }

    #[test]
    fn test_falls_back_to_characters() {
        let text = "x".repeat(45);
        let pieces = splitter().split(&text, 10, 0);

        assert_eq!(pieces.len(), 5);
        assert!(pieces.iter().all(|p| p.chars().count() <= 10));
        assert_eq!(pieces.concat(), text);
    }

    #[test]
    fn test_overlap_is_carried_between_pieces() {
        let text = (0..40).map(|i| format!("w{i:02}")).collect::<Vec<_>>().join(" ");
        let pieces = splitter().split(&text, 40, 12);

        assert!(pieces.len() > 1);
        for pair in pieces.windows(2) {
            let last_word = pair[0].split_whitespace().last().unwrap();
            assert!(
                pair[1].contains(last_word),
                "expected {last_word:?} to be repeated in {:?}",
                pair[1]
            );
        }
    }

    #[test]
    fn test_pieces_are_contiguous_substrings() {
        let text = "Line one is here.\nLine two follows. It has two sentences.\n\nNew paragraph with words and more words.";
        let pieces = splitter().split(text, 30, 5);

        assert!(pieces.len() > 1);
        for piece in &pieces {
            assert!(text.contains(piece.as_str()), "piece {piece:?} not found in text");
        }
        assert!(text.starts_with(pieces[0].as_str()));
        assert!(text.ends_with(pieces[pieces.len() - 1].as_str()));
    }

    #[test]
    fn test_multibyte_characters_are_counted_as_chars() {
        let text = "ü".repeat(30);
        let pieces = splitter().split(&text, 10, 0);
        assert_eq!(pieces.len(), 3);
        assert!(pieces.iter().all(|p| p.chars().count() == 10));
    }

    #[test]
    fn test_split_keeping_separator_attaches_to_next_piece() {
        let pieces = split_keeping_separator("a\n\nb\n\nc", "\n\n");
        assert_eq!(pieces, vec!["a", "\n\nb", "\n\nc"]);
    }

    #[test]
    fn test_deterministic() {
        let text = "The quick brown fox jumps over the lazy dog. ".repeat(30);
        let a = splitter().split(&text, 120, 20);
        let b = splitter().split(&text, 120, 20);
        assert_eq!(a, b);
    }
}
