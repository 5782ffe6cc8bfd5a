//! Relevance scoring on top of the raw BM25 base.
//!
//! The FTS engine's BM25 is a per-row base `B`; this module layers the
//! field-aware adjustments on it:
//!
//! ```text
//! score = B × max_f(boost_f × quality_f × length_penalty_f) + max_f(exact_bonus_f)
//! ```
//!
//! then multiplies by `(1 - fuzzy_score_penalty)` when the row was
//! reached only through fuzzy variants.

/// Match quality of a field against the query terms.
///
/// - 1.0  — the field's terms are exactly the query terms
/// - 0.85 — the query phrase occurs inside the field
/// - 0.7  — at least one query term occurs in the field
/// - None — no term matches
pub(crate) fn match_quality(field_terms: &str, query_terms: &[String]) -> Option<f32> {
    if query_terms.is_empty() || field_terms.is_empty() {
        return None;
    }
    let phrase = query_terms.join(" ");
    if field_terms == phrase {
        return Some(1.0);
    }
    if contains_phrase(field_terms, &phrase) {
        return Some(0.85);
    }
    let mut words = field_terms.split_whitespace();
    if words.any(|w| query_terms.iter().any(|t| t == w)) {
        return Some(0.7);
    }
    None
}

/// Whole-word phrase containment ("star war" in "a star war story", but
/// not in "superstar warp").
fn contains_phrase(haystack: &str, phrase: &str) -> bool {
    let mut from = 0;
    while let Some(pos) = haystack[from..].find(phrase) {
        let start = from + pos;
        let end = start + phrase.len();
        let left_ok = start == 0 || haystack[..start].ends_with(' ');
        let right_ok = end == haystack.len() || haystack[end..].starts_with(' ');
        if left_ok && right_ok {
            return true;
        }
        from = start + 1;
    }
    false
}

/// Bonus for a field value equal to the query string.
///
/// High-priority fields (boost ≥ 2.5) earn 50.0 on a normalized match;
/// any field earns 30.0 when equal after punctuation stripping.
pub(crate) fn exact_bonus(field_value: &str, query: &str, field_boost: f32) -> f32 {
    let norm_field = normalize(field_value);
    let norm_query = normalize(query);
    if norm_field.is_empty() || norm_query.is_empty() {
        return 0.0;
    }
    if field_boost >= 2.5 && norm_field == norm_query {
        return 50.0;
    }
    if strip_punctuation(&norm_field) == strip_punctuation(&norm_query) {
        return 30.0;
    }
    0.0
}

/// Penalty for long fields that merely contain the query: the further
/// the field length exceeds the phrase, the lower the multiplier,
/// floored at 0.5.
pub(crate) fn length_penalty(field_value: &str, query: &str) -> f32 {
    let norm_field = normalize(field_value);
    let norm_query = normalize(query);
    if norm_query.is_empty() || !norm_field.contains(&norm_query) {
        return 1.0;
    }
    let excess = norm_field.chars().count().saturating_sub(norm_query.chars().count());
    1.0 - (excess as f32 / 100.0).min(0.5)
}

fn normalize(s: &str) -> String {
    s.trim().to_lowercase()
}

fn strip_punctuation(s: &str) -> String {
    s.chars()
        .filter(|c| c.is_alphanumeric() || c.is_whitespace())
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Signals gathered for one field of one row.
#[derive(Debug, Clone, Copy)]
pub(crate) struct FieldSignal {
    pub boost: f32,
    pub quality: f32,
    pub length_penalty: f32,
    pub exact_bonus: f32,
}

/// Combine the per-field signals with the BM25 base.
pub(crate) fn combine(bm25: f64, signals: &[FieldSignal], fuzzy_matched: bool, fuzzy_penalty: f32) -> f32 {
    let factor = signals
        .iter()
        .map(|s| s.boost * s.quality * s.length_penalty)
        .fold(f32::NAN, f32::max);
    let factor = if factor.is_nan() { 1.0 } else { factor };
    let bonus = signals
        .iter()
        .map(|s| s.exact_bonus)
        .fold(0.0f32, f32::max);

    let mut score = (bm25 as f32) * factor + bonus;
    if fuzzy_matched {
        score *= 1.0 - fuzzy_penalty.clamp(0.0, 1.0);
    }
    score.max(0.0)
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::check;
    use rstest::rstest;

    fn terms(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[rstest]
    #[case("star war", &["star", "war"], Some(1.0))]
    #[case("a star war stori", &["star", "war"], Some(0.85))]
    #[case("star trek stori", &["star", "war"], Some(0.7))]
    #[case("cook book", &["star", "war"], None)]
    fn test_match_quality(
        #[case] field: &str,
        #[case] query: &[&str],
        #[case] expected: Option<f32>,
    ) {
        check!(match_quality(field, &terms(query)) == expected);
    }

    #[test]
    fn test_phrase_containment_is_word_aligned() {
        check!(!contains_phrase("superstar warp core", "star war"));
        check!(contains_phrase("the star war saga", "star war"));
    }

    #[test]
    fn test_exact_bonus_tiers() {
        // High-priority field, exact normalized match.
        check!(exact_bonus("Star Wars", "star wars", 3.0) == 50.0);
        // Regular field, exact match still earns the lower tier.
        check!(exact_bonus("Star Wars", "star wars", 1.0) == 30.0);
        // Punctuation-stripped equality.
        check!(exact_bonus("Star Wars: Episode", "star wars episode", 3.0) == 30.0);
        // No match.
        check!(exact_bonus("Spaceballs", "star wars", 3.0) == 0.0);
    }

    #[test]
    fn test_length_penalty_scales_with_excess() {
        let exact = length_penalty("star wars", "star wars");
        check!(exact == 1.0);
        let short = length_penalty("star wars: episode iv", "star wars");
        let long = length_penalty(
            "star wars: episode iv - a new hope from a galaxy far far away",
            "star wars",
        );
        check!(short > long);
        check!(long >= 0.5);
    }

    #[test]
    fn test_length_penalty_floors_at_half() {
        let very_long = format!("star wars {}", "padding ".repeat(50));
        check!(length_penalty(&very_long, "star wars") == 0.5);
    }

    #[test]
    fn test_non_containing_field_has_no_penalty() {
        check!(length_penalty("completely different text", "star wars") == 1.0);
    }

    #[test]
    fn test_combine_prefers_best_field() {
        let signals = [
            FieldSignal {
                boost: 3.0,
                quality: 1.0,
                length_penalty: 1.0,
                exact_bonus: 50.0,
            },
            FieldSignal {
                boost: 1.0,
                quality: 0.7,
                length_penalty: 1.0,
                exact_bonus: 0.0,
            },
        ];
        let score = combine(2.0, &signals, false, 0.25);
        // 2.0 × max(3.0, 0.7) + 50.
        check!((score - 56.0).abs() < 1e-5);
    }

    #[test]
    fn test_combine_applies_fuzzy_penalty() {
        let signals = [FieldSignal {
            boost: 1.0,
            quality: 0.7,
            length_penalty: 1.0,
            exact_bonus: 0.0,
        }];
        let plain = combine(2.0, &signals, false, 0.25);
        let fuzzy = combine(2.0, &signals, true, 0.25);
        check!((fuzzy - plain * 0.75).abs() < 1e-5);
    }

    #[test]
    fn test_combine_without_signals_uses_neutral_factor() {
        let score = combine(2.0, &[], false, 0.25);
        check!((score - 2.0).abs() < 1e-5);
    }
}
