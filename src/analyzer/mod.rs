//! Text analysis: the deterministic pipeline that turns raw text into
//! index/query terms.
//!
//! Pipeline order (fixed): HTML strip → contraction expansion → Unicode
//! lowercase → tokenization on non-alphanumeric boundaries → numeric
//! drop → length filter → stop-word filter → stemming. The same
//! analyzer instance (and therefore the same configuration) serves both
//! the indexing and the query path, which is what makes terms line up.

mod stemmer;
mod stop_words;

pub use stemmer::{Stemmer, stemmer_for};

use crate::config::AnalyzerConfig;
use ahash::{AHashMap, AHashSet};
use regex::Regex;
use std::sync::{Arc, OnceLock, RwLock};

/// English contractions expanded before tokenization. Anything ending in
/// `n't` that is not listed falls back to `<base> not`.
const CONTRACTIONS: &[(&str, &str)] = &[
    ("can't", "cannot"),
    ("won't", "will not"),
    ("shan't", "shall not"),
    ("ain't", "is not"),
    ("i'm", "i am"),
    ("i've", "i have"),
    ("i'll", "i will"),
    ("i'd", "i would"),
    ("you're", "you are"),
    ("you've", "you have"),
    ("you'll", "you will"),
    ("he's", "he is"),
    ("she's", "she is"),
    ("it's", "it is"),
    ("we're", "we are"),
    ("we've", "we have"),
    ("we'll", "we will"),
    ("they're", "they are"),
    ("they've", "they have"),
    ("they'll", "they will"),
    ("that's", "that is"),
    ("there's", "there is"),
    ("what's", "what is"),
    ("who's", "who is"),
    ("let's", "let us"),
    ("could've", "could have"),
    ("should've", "should have"),
    ("would've", "would have"),
];

fn html_tag_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"<[^>]*>").expect("static regex"))
}

fn html_entity_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"&#?[a-zA-Z0-9]{1,8};").expect("static regex"))
}

fn contraction_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    // A word with exactly one inner apostrophe (ASCII or typographic).
    RE.get_or_init(|| Regex::new(r"[A-Za-z]+['\u{2019}][A-Za-z]+").expect("static regex"))
}

/// The outcome of analyzing one piece of text.
///
/// `tokens` preserves duplicates and original order; phrase handling
/// downstream depends on both.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AnalyzedText {
    pub tokens: Vec<String>,
    pub original: String,
}

impl AnalyzedText {
    /// Whether analysis produced no usable terms.
    pub fn is_empty(&self) -> bool {
        self.tokens.is_empty()
    }
}

/// Configurable, shareable text analyzer.
///
/// Immutable after construction; share freely behind an `Arc`.
pub struct Analyzer {
    config: AnalyzerConfig,
    /// Per-language merged stop-word sets, built lazily.
    stop_sets: RwLock<AHashMap<String, Arc<AHashSet<String>>>>,
}

impl std::fmt::Debug for Analyzer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Analyzer")
            .field("default_language", &self.config.default_language)
            .finish_non_exhaustive()
    }
}

impl Analyzer {
    pub fn new(config: AnalyzerConfig) -> Self {
        Self {
            config,
            stop_sets: RwLock::new(AHashMap::new()),
        }
    }

    /// The configuration this analyzer was built with.
    pub fn config(&self) -> &AnalyzerConfig {
        &self.config
    }

    /// Run the full pipeline over `text`.
    ///
    /// `language` overrides the configured default for stop words and
    /// stemming; `None` uses `analyzer.default_language`.
    pub fn analyze(&self, text: &str, language: Option<&str>) -> AnalyzedText {
        let language = language.unwrap_or(&self.config.default_language);
        let mut working = text.to_string();

        if self.config.strip_html {
            working = html_tag_re().replace_all(&working, " ").into_owned();
            working = html_entity_re().replace_all(&working, " ").into_owned();
        }
        if self.config.expand_contractions && is_english(language) {
            working = expand_contractions(&working);
        }
        if self.config.lowercase {
            working = working.to_lowercase();
        }

        let stop_set = if self.config.disable_stop_words {
            None
        } else {
            Some(self.stop_set(language))
        };
        let stemmer = stemmer_for(language);

        let mut tokens = Vec::new();
        for raw in self.split_tokens(&working) {
            if self.config.remove_numbers && raw.chars().all(char::is_numeric) {
                continue;
            }
            let char_count = raw.chars().count();
            if char_count < self.config.min_word_length {
                continue;
            }
            let token: &str = if char_count > self.config.max_word_length {
                truncate_chars(raw, self.config.max_word_length)
            } else {
                raw
            };
            if let Some(set) = &stop_set {
                // Stop words are stored lowercase; compare accordingly even
                // when lowercasing is disabled.
                if set.contains(token.to_lowercase().as_str()) {
                    continue;
                }
            }
            tokens.push(stemmer.stem(token));
        }

        AnalyzedText {
            tokens,
            original: text.to_string(),
        }
    }

    /// The effective stop-word list for a language: defaults merged with
    /// `custom_stop_words`. Sorted for determinism.
    pub fn stop_words(&self, language: &str) -> Vec<String> {
        let mut words: Vec<String> = self.stop_set(language).iter().cloned().collect();
        words.sort_unstable();
        words
    }

    /// Whether a (raw) token would be filtered as a stop word.
    pub fn is_stop_word(&self, word: &str, language: &str) -> bool {
        !self.config.disable_stop_words && self.stop_set(language).contains(&word.to_lowercase())
    }

    fn stop_set(&self, language: &str) -> Arc<AHashSet<String>> {
        let key = language.to_ascii_lowercase();
        if let Some(set) = self
            .stop_sets
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&key)
        {
            return Arc::clone(set);
        }

        let mut set: AHashSet<String> = stop_words::for_language(&key)
            .iter()
            .map(|w| (*w).to_string())
            .collect();
        for custom in &self.config.custom_stop_words {
            let trimmed = custom.trim().to_lowercase();
            if !trimmed.is_empty() {
                set.insert(trimmed);
            }
        }
        let set = Arc::new(set);
        self.stop_sets
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .insert(key, Arc::clone(&set));
        set
    }

    /// Split normalized text into raw token slices.
    ///
    /// With punctuation stripping (the default), any non-alphanumeric
    /// character is a boundary, which keeps letters of every script.
    /// Without it, only whitespace separates tokens.
    fn split_tokens<'a>(&self, text: &'a str) -> impl Iterator<Item = &'a str> {
        let strip = self.config.strip_punctuation;
        text.split(move |c: char| {
            if strip {
                !c.is_alphanumeric()
            } else {
                c.is_whitespace()
            }
        })
        .filter(|s| !s.is_empty())
    }
}

fn is_english(language: &str) -> bool {
    matches!(language.to_ascii_lowercase().as_str(), "en" | "english")
}

/// Replace known contractions; unknown `...n't` forms expand generically.
fn expand_contractions(text: &str) -> String {
    contraction_re()
        .replace_all(text, |caps: &regex::Captures<'_>| {
            let word = &caps[0];
            let normalized: String = word
                .to_lowercase()
                .replace('\u{2019}', "'");
            if let Some((_, expansion)) = CONTRACTIONS.iter().find(|(c, _)| *c == normalized) {
                (*expansion).to_string()
            } else if let Some(base) = normalized.strip_suffix("n't") {
                format!("{base} not")
            } else {
                word.to_string()
            }
        })
        .into_owned()
}

/// Truncate at a character (not byte) boundary.
fn truncate_chars(s: &str, max_chars: usize) -> &str {
    match s.char_indices().nth(max_chars) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert2::check;
    use rstest::rstest;

    fn analyzer() -> Analyzer {
        Analyzer::new(AnalyzerConfig::default())
    }

    #[test]
    fn test_basic_pipeline() {
        let out = analyzer().analyze("The Quick Brown Foxes are Running!", None);
        check!(out.tokens == vec!["quick", "brown", "fox", "run"]);
        check!(out.original == "The Quick Brown Foxes are Running!");
    }

    #[test]
    fn test_duplicates_and_order_preserved() {
        let out = analyzer().analyze("wars star wars", None);
        check!(out.tokens == vec!["war", "star", "war"]);
    }

    #[test]
    fn test_html_is_stripped_and_href_not_tokenized() {
        let out = analyzer().analyze(
            r#"<p>Visit <a href="https://secret-host.example">our site</a></p>"#,
            None,
        );
        check!(out.tokens.contains(&"visit".to_string()));
        check!(out.tokens.contains(&"site".to_string()));
        check!(!out.tokens.iter().any(|t| t.contains("secret")));
        check!(!out.tokens.iter().any(|t| t.contains("example")));
    }

    #[rstest]
    // "does"/"not"/"they"/"have" are stop words; only the content words remain.
    #[case("doesn't work", vec!["work"])]
    #[case("they've arrived", vec!["arriv"])]
    #[case("won't stop", vec!["stop"])]
    fn test_contraction_expansion(#[case] input: &str, #[case] expected: Vec<&str>) {
        let out = analyzer().analyze(input, None);
        let expected: Vec<String> = expected.iter().map(|s| (*s).to_string()).collect();
        check!(out.tokens == expected);
    }

    #[test]
    fn test_contraction_table_is_bypassed_for_other_languages() {
        let out = analyzer().analyze("can't", Some("fr"));
        // No expansion: the apostrophe is a token boundary instead.
        check!(out.tokens == vec!["can"]);
    }

    #[test]
    fn test_stop_word_symmetry_with_custom_words() {
        let mut config = AnalyzerConfig::default();
        config.custom_stop_words = vec!["  Widget ".to_string()];
        let analyzer = Analyzer::new(config);
        check!(analyzer.is_stop_word("widget", "en"));
        check!(analyzer.is_stop_word("WIDGET", "en"));
        let out = analyzer.analyze("widget assembly", None);
        check!(out.tokens == vec!["assembl"]);
    }

    #[test]
    fn test_min_and_max_word_length() {
        let mut config = AnalyzerConfig::default();
        config.min_word_length = 3;
        config.max_word_length = 5;
        config.disable_stop_words = true;
        let analyzer = Analyzer::new(config);
        // Identity language so truncation is observable without stemming.
        let out = analyzer.analyze("ab abc abcdefgh", Some("xx"));
        check!(out.tokens == vec!["abc", "abcde"]);
    }

    #[test]
    fn test_remove_numbers() {
        let mut config = AnalyzerConfig::default();
        config.remove_numbers = true;
        let analyzer = Analyzer::new(config);
        let out = analyzer.analyze("route 66 remains", None);
        check!(out.tokens == vec!["rout", "remain"]);
    }

    #[test]
    fn test_numbers_kept_by_default() {
        let out = analyzer().analyze("route 66", None);
        check!(out.tokens == vec!["rout", "66"]);
    }

    #[test]
    fn test_language_switches_stemmer_and_stop_words() {
        let out = analyzer().analyze("les chanteurs chantaient", Some("fr"));
        // "les" is a French stop word; the rest stems via Snowball French.
        check!(!out.tokens.contains(&"les".to_string()));
        check!(out.tokens.len() == 2);
    }

    #[test]
    fn test_unicode_scripts_are_retained() {
        let out = analyzer().analyze("Москва 東京", Some("xx"));
        check!(out.tokens == vec!["москва", "東京"]);
    }

    #[rstest]
    #[case("")]
    #[case("   \n\t  ")]
    #[case("the and of")]
    fn test_empty_or_stop_only_inputs(#[case] input: &str) {
        let out = analyzer().analyze(input, None);
        check!(out.is_empty());
    }

    #[test]
    fn test_disable_stop_words() {
        let mut config = AnalyzerConfig::default();
        config.disable_stop_words = true;
        let analyzer = Analyzer::new(config);
        let out = analyzer.analyze("the cat", None);
        check!(out.tokens == vec!["the", "cat"]);
    }
}
