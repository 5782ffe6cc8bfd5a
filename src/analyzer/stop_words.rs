//! Per-language default stop-word lists.
//!
//! These high-frequency words add little value to search relevance and
//! are excluded from both indexing and querying. Lists are intentionally
//! compact; callers extend them through
//! `analyzer.custom_stop_words`.

/// Common English stop words.
pub(crate) const ENGLISH: &[&str] = &[
    "a", "about", "above", "after", "again", "against", "all", "am", "an", "and", "any", "are",
    "as", "at", "be", "because", "been", "before", "being", "below", "between", "both", "but",
    "by", "can", "cannot", "could", "did", "do", "does", "doing", "down", "during", "each",
    "few", "for", "from", "further", "had", "has", "have", "having", "he", "her", "here", "hers",
    "him", "his", "how", "i", "if", "in", "into", "is", "it", "its", "itself", "just", "me",
    "more", "most", "my", "myself", "no", "nor", "not", "now", "of", "off", "on", "once", "only",
    "or", "other", "our", "ours", "out", "over", "own", "same", "she", "should", "so", "some",
    "such", "than", "that", "the", "their", "theirs", "them", "then", "there", "these", "they",
    "this", "those", "through", "to", "too", "under", "until", "up", "very", "was", "we", "were",
    "what", "when", "where", "which", "while", "who", "whom", "why", "will", "with", "would",
    "you", "your", "yours", "yourself",
];

/// Common French stop words.
pub(crate) const FRENCH: &[&str] = &[
    "au", "aux", "avec", "ce", "ces", "dans", "de", "des", "du", "elle", "en", "et", "eux", "il",
    "ils", "je", "la", "le", "les", "leur", "lui", "ma", "mais", "me", "mes", "moi", "mon", "ne",
    "nos", "notre", "nous", "on", "ou", "par", "pas", "pour", "qu", "que", "qui", "sa", "se",
    "ses", "son", "sur", "ta", "te", "tes", "toi", "ton", "tu", "un", "une", "vos", "votre",
    "vous",
];

/// Common German stop words.
pub(crate) const GERMAN: &[&str] = &[
    "aber", "als", "am", "an", "auch", "auf", "aus", "bei", "bin", "bis", "bist", "da", "das",
    "dem", "den", "der", "des", "die", "doch", "du", "ein", "eine", "einem", "einen", "einer",
    "eines", "er", "es", "für", "hat", "hatte", "ich", "ihr", "im", "in", "ist", "ja", "kann",
    "mein", "mit", "nach", "nicht", "noch", "nur", "oder", "sein", "sich", "sie", "sind", "so",
    "über", "um", "und", "uns", "von", "vor", "war", "was", "wenn", "wie", "wir", "zu", "zum",
    "zur",
];

/// Common Spanish stop words.
pub(crate) const SPANISH: &[&str] = &[
    "al", "algo", "como", "con", "de", "del", "desde", "donde", "el", "ella", "ellas", "ellos",
    "en", "entre", "era", "es", "esta", "este", "esto", "fue", "ha", "hay", "la", "las", "le",
    "les", "lo", "los", "más", "me", "mi", "muy", "no", "nos", "o", "para", "pero", "por", "que",
    "se", "ser", "si", "sin", "sobre", "son", "su", "sus", "también", "te", "tiene", "todo",
    "un", "una", "uno", "y", "ya", "yo",
];

/// Default stop words for a language tag. Accepts both short codes and
/// full names; unknown languages get the empty list.
pub(crate) fn for_language(language: &str) -> &'static [&'static str] {
    match language.to_ascii_lowercase().as_str() {
        "en" | "english" => ENGLISH,
        "fr" | "french" => FRENCH,
        "de" | "german" => GERMAN,
        "es" | "spanish" => SPANISH,
        _ => &[],
    }
}
