//! QWERTY keyboard-proximity matching.
//!
//! Substitution typos are scored by the Euclidean distance between the
//! two keys on a staggered QWERTY layout; adjacent keys (distance ≤
//! 1.5) count as plausible typos. Words differing in length by one are
//! aligned with a single insertion/deletion before scoring.

/// Keys further apart than this are not plausible substitution typos.
const ADJACENT: f64 = 1.5;

/// Per-word score below which the matcher rejects.
const SCORE_THRESHOLD: f64 = 0.7;

/// Penalty applied for a one-character length difference.
const LENGTH_GAP_PENALTY: f64 = 0.1;

#[derive(Debug, Clone, Default)]
pub(crate) struct KeyboardMatcher;

/// Staggered QWERTY coordinates: (column, row) with per-row offsets.
fn key_position(c: char) -> Option<(f64, f64)> {
    const ROWS: [(&str, f64); 3] = [
        ("qwertyuiop", 0.0),
        ("asdfghjkl", 0.25),
        ("zxcvbnm", 0.75),
    ];
    for (row_idx, (row, offset)) in ROWS.iter().enumerate() {
        if let Some(col) = row.find(c) {
            return Some((col as f64 + offset, row_idx as f64));
        }
    }
    None
}

/// Euclidean distance between two keys, if both are letters.
fn key_distance(a: char, b: char) -> Option<f64> {
    let (ax, ay) = key_position(a)?;
    let (bx, by) = key_position(b)?;
    Some(((ax - bx).powi(2) + (ay - by).powi(2)).sqrt())
}

impl KeyboardMatcher {
    pub(crate) fn score(&self, query: &str, term: &str) -> Option<f64> {
        let q: Vec<char> = query.to_lowercase().chars().collect();
        let t: Vec<char> = term.to_lowercase().chars().collect();
        if q.is_empty() || t.is_empty() {
            return None;
        }

        match q.len().abs_diff(t.len()) {
            0 => Self::aligned_score(&q, &t),
            1 => {
                // Try every single deletion from the longer word and keep
                // the best alignment.
                let (longer, shorter) = if q.len() > t.len() { (&q, &t) } else { (&t, &q) };
                (0..longer.len())
                    .filter_map(|skip| {
                        let reduced: Vec<char> = longer
                            .iter()
                            .enumerate()
                            .filter(|(i, _)| *i != skip)
                            .map(|(_, c)| *c)
                            .collect();
                        Self::aligned_score(&reduced, shorter)
                    })
                    .fold(None, |best: Option<f64>, s| {
                        Some(best.map_or(s, |b| b.max(s)))
                    })
                    .map(|s| (s - LENGTH_GAP_PENALTY).max(0.0))
                    .filter(|s| *s >= SCORE_THRESHOLD)
            }
            _ => None,
        }
    }

    /// Score two equal-length words position by position.
    fn aligned_score(a: &[char], b: &[char]) -> Option<f64> {
        debug_assert_eq!(a.len(), b.len());
        let mut penalty = 0.0;
        for (&ca, &cb) in a.iter().zip(b.iter()) {
            if ca == cb {
                continue;
            }
            match key_distance(ca, cb) {
                // A substitution beyond adjacency is not a fat-finger typo.
                Some(d) if d <= ADJACENT => penalty += d / 3.0,
                _ => return None,
            }
        }
        let score = 1.0 - penalty / (a.len() as f64);
        (score >= SCORE_THRESHOLD).then_some(score)
    }
}
