//! Phonetic matching via Metaphone keys.
//!
//! Two words match when their Metaphone keys are equal (score 1.0). A
//! quick-lookup table catches a fixed set of common English
//! misspellings outright. When keys differ, a character-similarity
//! fallback over the keys grants partial credit. Words that produce an
//! empty key (no Latin consonant structure) never match phonetically.

use rapidfuzz::distance::jaro;

/// Common misspellings resolved without touching the phonetic key.
const MISSPELLINGS: &[(&str, &str)] = &[
    ("teh", "the"),
    ("thier", "their"),
    ("fone", "phone"),
    ("recieve", "receive"),
    ("freind", "friend"),
    ("wierd", "weird"),
    ("definately", "definitely"),
    ("seperate", "separate"),
    ("occured", "occurred"),
    ("untill", "until"),
    ("becuase", "because"),
    ("beleive", "believe"),
    ("adress", "address"),
    ("tommorow", "tomorrow"),
    ("wich", "which"),
];

/// Word similarity below which the fallback rejects.
const FALLBACK_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Default)]
pub(crate) struct PhoneticMatcher;

impl PhoneticMatcher {
    pub(crate) fn score(&self, query: &str, term: &str) -> Option<f64> {
        let query = query.to_lowercase();
        let term = term.to_lowercase();
        if query == term {
            return Some(1.0);
        }
        if MISSPELLINGS
            .iter()
            .any(|(wrong, right)| *wrong == query && *right == term)
        {
            return Some(1.0);
        }

        let qk = metaphone(&query);
        let tk = metaphone(&term);
        // Empty keys carry no phonetic information; matching them against
        // everything would be noise.
        if qk.is_empty() || tk.is_empty() {
            return None;
        }
        if qk == tk {
            return Some(1.0);
        }
        // Keys differ: grant partial credit by character similarity of
        // the words themselves, ranked below any exact key match.
        let sim = jaro::similarity(query.chars(), term.chars());
        (sim >= FALLBACK_THRESHOLD).then(|| sim * 0.9)
    }
}

/// Compute a Metaphone key for an ASCII-lowercase word. Non-Latin
/// characters are ignored and may yield an empty key.
pub(crate) fn metaphone(word: &str) -> String {
    let letters: Vec<char> = word.chars().filter(char::is_ascii_lowercase).collect();
    if letters.is_empty() {
        return String::new();
    }

    // Initial-cluster exceptions.
    let mut start = 0;
    match (letters.first(), letters.get(1)) {
        (Some('k' | 'g' | 'p'), Some('n')) | (Some('w'), Some('r')) | (Some('a'), Some('e')) => {
            start = 1;
        }
        _ => {}
    }

    let mut key = String::new();
    let mut i = start;
    while i < letters.len() {
        let c = letters[i];
        let prev = if i > 0 { Some(letters[i - 1]) } else { None };
        let next = letters.get(i + 1).copied();
        let next2 = letters.get(i + 2).copied();

        // Collapse doubled letters, except 'c' ("accept" keeps both sounds).
        if prev == Some(c) && c != 'c' {
            i += 1;
            continue;
        }

        match c {
            'a' | 'e' | 'i' | 'o' | 'u' => {
                if i == start {
                    key.push(c);
                }
            }
            'b' => {
                // Silent terminal b after m ("lamb").
                if !(prev == Some('m') && next.is_none()) {
                    key.push('b');
                }
            }
            'c' => {
                if next == Some('i') && next2 == Some('a') {
                    key.push('x');
                } else if next == Some('h') {
                    key.push('x');
                    i += 1;
                } else if matches!(next, Some('i' | 'e' | 'y')) {
                    key.push('s');
                } else {
                    key.push('k');
                }
            }
            'd' => {
                if next == Some('g') && matches!(next2, Some('e' | 'y' | 'i')) {
                    key.push('j');
                    i += 1;
                } else {
                    key.push('t');
                }
            }
            'g' => {
                if next == Some('h') && !matches!(next2, Some('a' | 'e' | 'i' | 'o' | 'u')) {
                    // Silent gh ("night").
                    i += 1;
                } else if matches!(next, Some('i' | 'e' | 'y')) {
                    key.push('j');
                } else if next == Some('n') {
                    // Silent in "sign", "gnome" handled at start.
                } else {
                    key.push('k');
                }
            }
            'h' => {
                let prev_vowel = matches!(prev, Some('a' | 'e' | 'i' | 'o' | 'u'));
                let next_vowel = matches!(next, Some('a' | 'e' | 'i' | 'o' | 'u'));
                if !prev_vowel || next_vowel {
                    key.push('h');
                }
            }
            'k' => {
                if prev != Some('c') {
                    key.push('k');
                }
            }
            'p' => {
                if next == Some('h') {
                    key.push('f');
                    i += 1;
                } else {
                    key.push('p');
                }
            }
            'q' => key.push('k'),
            's' => {
                if next == Some('h') {
                    key.push('x');
                    i += 1;
                } else if next == Some('i') && matches!(next2, Some('o' | 'a')) {
                    key.push('x');
                } else {
                    key.push('s');
                }
            }
            't' => {
                if next == Some('i') && matches!(next2, Some('o' | 'a')) {
                    key.push('x');
                } else if next == Some('h') {
                    key.push('0');
                    i += 1;
                } else {
                    key.push('t');
                }
            }
            'v' => key.push('f'),
            'w' | 'y' => {
                if matches!(next, Some('a' | 'e' | 'i' | 'o' | 'u')) {
                    key.push(c);
                }
            }
            'x' => {
                if i == start {
                    key.push('s');
                } else {
                    key.push_str("ks");
                }
            }
            'z' => key.push('s'),
            'f' | 'j' | 'l' | 'm' | 'n' | 'r' => key.push(c),
            _ => {}
        }
        i += 1;
    }
    key
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::check;
    use rstest::rstest;

    #[rstest]
    #[case("phone", "fone")]
    #[case("night", "nite")]
    #[case("knight", "nite")]
    #[case("cat", "kat")]
    fn test_homophones_share_keys(#[case] a: &str, #[case] b: &str) {
        check!(metaphone(a) == metaphone(b), "{} vs {}", metaphone(a), metaphone(b));
    }

    #[rstest]
    #[case("teh", "the")]
    #[case("fone", "phone")]
    #[case("thier", "their")]
    fn test_misspelling_table(#[case] wrong: &str, #[case] right: &str) {
        check!(PhoneticMatcher.score(wrong, right) == Some(1.0));
    }

    #[test]
    fn test_different_sounds_rejected() {
        check!(PhoneticMatcher.score("cat", "dog").is_none());
    }

    #[test]
    fn test_empty_key_never_matches() {
        // Cyrillic input produces an empty key on both sides.
        check!(PhoneticMatcher.score("москва", "москвы").is_none());
        check!(metaphone("москва").is_empty());
    }

    #[test]
    fn test_silent_letters() {
        check!(metaphone("lamb") == metaphone("lam"));
        check!(metaphone("wrack") == metaphone("rack"));
    }
}
