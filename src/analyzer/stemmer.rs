//! Stemmer trait and the process-wide stemmer registry.
//!
//! Per-language suffix tables are not our business: Snowball stemmers
//! from `rust-stemmers` do the actual word reduction. This module owns
//! the polymorphic seam (so callers and tests can plug their own) and
//! the alias → algorithm resolution, with instances cached process-wide.

use ahash::AHashMap;
use rust_stemmers::Algorithm;
use std::sync::{Arc, Mutex, OnceLock};

/// A language-specific word stemmer.
///
/// Implementations must be pure: equal inputs yield equal outputs.
pub trait Stemmer: Send + Sync {
    /// Reduce a (lowercased) word to its root form.
    fn stem(&self, word: &str) -> String;

    /// Canonical language code this stemmer serves (`"english"`, ...).
    fn language(&self) -> &str;
}

/// Snowball-backed stemmer for one language.
struct SnowballStemmer {
    inner: rust_stemmers::Stemmer,
    language: &'static str,
}

impl Stemmer for SnowballStemmer {
    fn stem(&self, word: &str) -> String {
        self.inner.stem(word).into_owned()
    }

    fn language(&self) -> &str {
        self.language
    }
}

/// Pass-through stemmer for unknown languages.
struct IdentityStemmer;

impl Stemmer for IdentityStemmer {
    fn stem(&self, word: &str) -> String {
        word.to_string()
    }

    fn language(&self) -> &str {
        "identity"
    }
}

/// Resolve a language tag (code or full name, any case) to a Snowball
/// algorithm.
fn resolve_algorithm(language: &str) -> Option<(Algorithm, &'static str)> {
    let alg = match language.to_ascii_lowercase().as_str() {
        "ar" | "arabic" => (Algorithm::Arabic, "arabic"),
        "da" | "danish" => (Algorithm::Danish, "danish"),
        "nl" | "dutch" => (Algorithm::Dutch, "dutch"),
        "en" | "english" => (Algorithm::English, "english"),
        "fi" | "finnish" => (Algorithm::Finnish, "finnish"),
        "fr" | "french" => (Algorithm::French, "french"),
        "de" | "german" => (Algorithm::German, "german"),
        "el" | "greek" => (Algorithm::Greek, "greek"),
        "hu" | "hungarian" => (Algorithm::Hungarian, "hungarian"),
        "it" | "italian" => (Algorithm::Italian, "italian"),
        "no" | "norwegian" => (Algorithm::Norwegian, "norwegian"),
        "pt" | "portuguese" => (Algorithm::Portuguese, "portuguese"),
        "ro" | "romanian" => (Algorithm::Romanian, "romanian"),
        "ru" | "russian" => (Algorithm::Russian, "russian"),
        "es" | "spanish" => (Algorithm::Spanish, "spanish"),
        "sv" | "swedish" => (Algorithm::Swedish, "swedish"),
        "ta" | "tamil" => (Algorithm::Tamil, "tamil"),
        "tr" | "turkish" => (Algorithm::Turkish, "turkish"),
        _ => return None,
    };
    Some(alg)
}

type Registry = Mutex<AHashMap<String, Arc<dyn Stemmer>>>;

fn registry() -> &'static Registry {
    static REGISTRY: OnceLock<Registry> = OnceLock::new();
    REGISTRY.get_or_init(|| Mutex::new(AHashMap::new()))
}

/// Get the cached stemmer for a language tag, creating it on first use.
///
/// Unknown languages resolve to the identity stemmer, so stemming never
/// fails; it only degrades to exact-form matching.
pub fn stemmer_for(language: &str) -> Arc<dyn Stemmer> {
    let key = language.to_ascii_lowercase();
    let mut reg = registry().lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    if let Some(existing) = reg.get(&key) {
        return Arc::clone(existing);
    }
    let stemmer: Arc<dyn Stemmer> = match resolve_algorithm(&key) {
        Some((alg, canonical)) => Arc::new(SnowballStemmer {
            inner: rust_stemmers::Stemmer::create(alg),
            language: canonical,
        }),
        None => Arc::new(IdentityStemmer),
    };
    reg.insert(key, Arc::clone(&stemmer));
    stemmer
}
