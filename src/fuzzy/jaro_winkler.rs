//! Jaro-Winkler similarity with a configurable prefix bonus.
//!
//! Base Jaro similarity comes from `rapidfuzz`; the Winkler prefix
//! bonus is applied on top so the configured prefix scale is honoured
//! (up to four leading characters, per the classic formulation). A
//! cheap length-ratio short-circuit rejects obviously hopeless pairs
//! before the O(n·m) comparison runs.

use rapidfuzz::distance::jaro;

/// Longest prefix the Winkler bonus considers.
const MAX_PREFIX: usize = 4;

#[derive(Debug, Clone)]
pub(crate) struct JaroWinklerMatcher {
    pub threshold: f64,
    /// Winkler prefix scale, classically 0.1.
    pub prefix_scale: f64,
}

impl JaroWinklerMatcher {
    /// Similarity in [0, 1], or `None` when below the threshold.
    pub(crate) fn score(&self, query: &str, term: &str) -> Option<f64> {
        let (short, long) = {
            let (a, b) = (query.chars().count(), term.chars().count());
            if a <= b { (a, b) } else { (b, a) }
        };
        if long == 0 {
            return None;
        }
        // Pairs too different in length cannot reach the threshold.
        if (short as f64) / (long as f64) < 0.8 * self.threshold {
            return None;
        }

        let base = jaro::similarity(query.chars(), term.chars());
        let prefix = query
            .chars()
            .zip(term.chars())
            .take(MAX_PREFIX)
            .take_while(|(a, b)| a == b)
            .count();
        let score = base + (prefix as f64) * self.prefix_scale * (1.0 - base);
        (score >= self.threshold).then_some(score)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::check;
    use rstest::rstest;

    fn matcher() -> JaroWinklerMatcher {
        JaroWinklerMatcher {
            threshold: 0.85,
            prefix_scale: 0.1,
        }
    }

    #[test]
    fn test_exact_match_scores_one() {
        check!(matcher().score("anakin", "anakin") == Some(1.0));
    }

    #[rstest]
    #[case("amakin", "anakin")]
    #[case("dkywalker", "skywalker")]
    #[case("skywalkre", "skywalker")]
    fn test_single_typos_pass(#[case] typo: &str, #[case] correct: &str) {
        let score = matcher().score(typo, correct);
        check!(score.is_some(), "{typo} vs {correct} scored {score:?}");
    }

    #[test]
    fn test_shared_prefix_beats_shared_suffix() {
        let m = matcher();
        // Same edits, one pair sharing the prefix: the prefix pair wins.
        let prefixed = jaro_with_bonus(&m, "martha", "marhta");
        let plain = jaro_with_bonus(&m, "amarth", "tamrha");
        check!(prefixed > plain);
    }

    fn jaro_with_bonus(m: &JaroWinklerMatcher, a: &str, b: &str) -> f64 {
        m.score(a, b).unwrap_or_else(|| {
            // Below threshold still has a defined value for comparison.
            jaro::similarity(a.chars(), b.chars())
        })
    }

    #[test]
    fn test_length_ratio_short_circuit() {
        // 2 vs 12 characters: ratio 0.17 < 0.8 × 0.85, rejected outright.
        check!(matcher().score("ab", "abcdefghijkl").is_none());
    }

    #[test]
    fn test_unrelated_words_rejected() {
        check!(matcher().score("luke", "vader").is_none());
    }
}
