//! Character n-gram (default trigram) similarity.
//!
//! Words are padded with boundary markers so prefixes and suffixes
//! weigh in, then compared by Jaccard similarity of their n-gram sets.

use ahash::AHashSet;

/// Trigram matcher with a Jaccard acceptance threshold.
#[derive(Debug, Clone)]
pub(crate) struct TrigramMatcher {
    /// n-gram size, normally 3.
    pub size: usize,
    pub threshold: f64,
}

impl TrigramMatcher {
    /// Jaccard similarity of the two words' padded n-gram sets, or
    /// `None` when below the threshold.
    pub(crate) fn score(&self, query: &str, term: &str) -> Option<f64> {
        if query == term {
            return Some(1.0);
        }
        let a = self.grams(query);
        let b = self.grams(term);
        if a.is_empty() || b.is_empty() {
            return None;
        }
        let intersection = a.intersection(&b).count() as f64;
        let union = (a.len() + b.len()) as f64 - intersection;
        let jaccard = intersection / union;
        (jaccard >= self.threshold).then_some(jaccard)
    }

    /// Padded n-gram set. The pad character marks word boundaries; it
    /// cannot occur in analyzed tokens, which never contain whitespace.
    fn grams(&self, word: &str) -> AHashSet<String> {
        let n = self.size.max(2);
        let pad = " ".repeat(n - 1);
        let padded: Vec<char> = format!("{pad}{word}{pad}").chars().collect();
        padded
            .windows(n)
            .map(|w| w.iter().collect::<String>())
            .collect()
    }
}
