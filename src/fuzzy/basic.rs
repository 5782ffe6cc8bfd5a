//! Wildcard-and-deletion variant generation.
//!
//! The fastest strategy: no vocabulary scan at all. Each token yields a
//! prefix wildcard (`term*`) plus one deletion variant per character
//! position, which recovers missing-letter typos. Insertions and
//! substitutions are not handled; pick a scoring matcher for those.

/// Generate up to `max_variations` match variants for `token`.
///
/// The wildcard comes first so it survives truncation; deletion variants
/// follow in position order. Tokens shorter than three characters only
/// get the wildcard (single-letter deletions would flood the match with
/// one- and two-character terms).
pub(crate) fn variants(token: &str, max_variations: usize) -> Vec<String> {
    let mut out = Vec::with_capacity(max_variations.min(token.chars().count() + 1));
    if max_variations == 0 {
        return out;
    }
    out.push(format!("{token}*"));

    if token.chars().count() >= 3 {
        let chars: Vec<char> = token.chars().collect();
        for skip in 0..chars.len() {
            if out.len() >= max_variations {
                break;
            }
            let variant: String = chars
                .iter()
                .enumerate()
                .filter(|(i, _)| *i != skip)
                .map(|(_, c)| c)
                .collect();
            out.push(variant);
        }
    }
    out
}
