//! Snippet extraction and term highlighting.
//!
//! Query terms arrive already analyzed (lowercased, stemmed); raw field
//! text is matched word by word through the same normalization, so
//! "Running" highlights for the query "run". The snippet centers on the
//! first hit, trims at whitespace, and marks truncation with ellipses.

use crate::analyzer::Stemmer;
use std::sync::Arc;

/// Ellipsis affix used when a snippet is cut from longer text.
const ELLIPSIS: &str = "…";

#[derive(Debug, Clone)]
pub(crate) struct Highlighter {
    pub open_tag: String,
    pub close_tag: String,
    pub snippet_length: usize,
}

/// A word occurrence in the raw text.
struct WordSpan {
    start: usize,
    end: usize,
}

impl Highlighter {
    /// Highlight `terms` inside `text`, returning `None` when nothing
    /// matches. Terms ending in `*` match by prefix.
    pub(crate) fn highlight(
        &self,
        text: &str,
        terms: &[String],
        stemmer: &Arc<dyn Stemmer>,
    ) -> Option<String> {
        if text.is_empty() || terms.is_empty() {
            return None;
        }

        let (prefixes, exact): (Vec<&String>, Vec<&String>) =
            terms.iter().partition(|t| t.ends_with('*'));
        let prefixes: Vec<&str> = prefixes
            .iter()
            .map(|t| t.trim_end_matches('*'))
            .filter(|t| !t.is_empty())
            .collect();

        let matches: Vec<WordSpan> = words(text)
            .filter(|span| {
                let word = text[span.start..span.end].to_lowercase();
                let stemmed = stemmer.stem(&word);
                exact.iter().any(|t| **t == stemmed || **t == word)
                    || prefixes.iter().any(|p| word.starts_with(p))
            })
            .collect();
        let first = matches.first()?;

        // Window around the first hit, snapped to char boundaries then
        // widened to whitespace.
        let (win_start, win_end) = self.window(text, first.start, first.end);

        let mut out = String::with_capacity(self.snippet_length + 32);
        if win_start > 0 {
            out.push_str(ELLIPSIS);
        }
        let mut cursor = win_start;
        for span in &matches {
            if span.end <= win_start || span.start >= win_end {
                continue;
            }
            out.push_str(&text[cursor..span.start]);
            out.push_str(&self.open_tag);
            out.push_str(&text[span.start..span.end]);
            out.push_str(&self.close_tag);
            cursor = span.end;
        }
        out.push_str(&text[cursor..win_end]);
        if win_end < text.len() {
            out.push_str(ELLIPSIS);
        }
        Some(out)
    }

    /// Compute the snippet window `[start, end)` in byte offsets.
    fn window(&self, text: &str, hit_start: usize, hit_end: usize) -> (usize, usize) {
        if text.len() <= self.snippet_length {
            return (0, text.len());
        }
        let half = self.snippet_length / 2;
        let mut start = hit_start.saturating_sub(half);
        let mut end = (hit_end + half).min(text.len());
        while start > 0 && !text.is_char_boundary(start) {
            start -= 1;
        }
        while end < text.len() && !text.is_char_boundary(end) {
            end += 1;
        }
        // Align to whitespace so words are not cut in half.
        if start > 0 {
            if let Some(ws) = text[start..hit_start].find(char::is_whitespace) {
                start += ws + 1;
            }
        }
        if end < text.len() {
            if let Some(ws) = text[hit_end..end].rfind(char::is_whitespace) {
                end = hit_end + ws;
            }
        }
        (start, end.max(hit_end))
    }
}

/// Iterate alphanumeric word spans of `text`.
fn words(text: &str) -> impl Iterator<Item = WordSpan> + '_ {
    let mut spans = Vec::new();
    let mut start: Option<usize> = None;
    for (i, c) in text.char_indices() {
        if c.is_alphanumeric() {
            start.get_or_insert(i);
        } else if let Some(s) = start.take() {
            spans.push(WordSpan { start: s, end: i });
        }
    }
    if let Some(s) = start {
        spans.push(WordSpan {
            start: s,
            end: text.len(),
        });
    }
    spans.into_iter()
}
