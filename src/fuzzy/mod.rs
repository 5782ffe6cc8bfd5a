//! Typo tolerance: variant expansion, single-best correction, and
//! did-you-mean suggestions.
//!
//! One matcher is selected per query (`search.fuzzy_algorithm`); the
//! correction path additionally runs a fixed panel of matchers and
//! requires consensus before rewriting a token. Candidate terms come
//! from the index vocabulary; computed variants are remembered in a
//! persistent per-index [`FuzzyTermCache`].

mod basic;
mod jaro_winkler;
mod keyboard;
mod levenshtein;
mod phonetic;
mod term_cache;
mod trigram;

pub use term_cache::FuzzyTermCache;

use crate::config::SearchTuning;
use jaro_winkler::JaroWinklerMatcher;
use keyboard::KeyboardMatcher;
use levenshtein::LevenshteinMatcher;
use phonetic::PhoneticMatcher;
use serde::{Deserialize, Serialize};
use trigram::TrigramMatcher;

/// Matcher selection. `Trigram` is the default; `Basic` is the only
/// variant that needs no vocabulary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FuzzyAlgorithm {
    Basic,
    #[default]
    Trigram,
    JaroWinkler,
    Levenshtein,
    Phonetic,
    Keyboard,
}

/// One vocabulary term with its document frequency.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct VocabTerm {
    pub term: String,
    pub doc_count: u64,
}

/// A scored variant for a query token.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct FuzzyCandidate {
    pub term: String,
    pub score: f64,
}

/// How one query token was treated by the fuzzy pass.
#[derive(Debug, Clone)]
pub(crate) enum ExpandedToken {
    /// Left as-is (vocabulary hit, or fuzzification disabled for it).
    Exact(String),
    /// Replaced by a single consensus correction.
    Corrected {
        original: String,
        replacement: String,
        confidence: f64,
    },
    /// OR-expanded with scored variants.
    Expanded {
        original: String,
        variants: Vec<FuzzyCandidate>,
    },
}

impl ExpandedToken {
    /// The terms this token contributes to the match expression, the
    /// original first where it still applies.
    pub(crate) fn match_terms(&self) -> Vec<&str> {
        match self {
            Self::Exact(t) => vec![t.as_str()],
            Self::Corrected { replacement, .. } => vec![replacement.as_str()],
            Self::Expanded { original, variants } => {
                let mut terms = vec![original.as_str()];
                terms.extend(variants.iter().map(|v| v.term.as_str()));
                terms
            }
        }
    }

    /// Whether this token was touched by fuzzy matching at all.
    pub(crate) fn is_fuzzy(&self) -> bool {
        !matches!(self, Self::Exact(_))
    }
}

/// Minimum number of panel matchers that must accept a candidate before
/// a correction is applied.
const CORRECTION_CONSENSUS: usize = 2;

/// The per-query fuzzy driver.
pub(crate) struct FuzzyEngine {
    algorithm: FuzzyAlgorithm,
    max_variations: usize,
    correction_mode: bool,
    correction_threshold: f64,
    last_token_only: bool,
    trigram: TrigramMatcher,
    jaro: JaroWinklerMatcher,
    levenshtein: LevenshteinMatcher,
    phonetic: PhoneticMatcher,
    keyboard: KeyboardMatcher,
}

impl FuzzyEngine {
    /// Build a driver from tuning plus the query's effective fuzziness.
    ///
    /// Fuzziness in [0, 1] scales the similarity thresholds: 0.5 leaves
    /// the configured values untouched, 1.0 relaxes them by 20%, 0.0
    /// tightens them by 20% (clamped to 1.0).
    pub(crate) fn new(tuning: &SearchTuning, fuzziness: f64) -> Self {
        let scale = 1.2 - 0.4 * fuzziness.clamp(0.0, 1.0);
        let clamp01 = |v: f64| v.clamp(0.0, 1.0);
        Self {
            algorithm: tuning.fuzzy_algorithm,
            max_variations: tuning.max_fuzzy_variations,
            correction_mode: tuning.fuzzy_correction_mode,
            correction_threshold: tuning.correction_threshold,
            last_token_only: tuning.fuzzy_last_token_only,
            trigram: TrigramMatcher {
                size: tuning.trigram_size,
                threshold: clamp01(tuning.trigram_threshold * scale),
            },
            jaro: JaroWinklerMatcher {
                threshold: clamp01(tuning.jaro_winkler_threshold * scale),
                prefix_scale: tuning.jaro_winkler_prefix_scale,
            },
            levenshtein: LevenshteinMatcher {
                max_distance: tuning.levenshtein_threshold,
            },
            phonetic: PhoneticMatcher,
            keyboard: KeyboardMatcher,
        }
    }

    /// Run the fuzzy pass over the query tokens.
    ///
    /// In last-token-only mode, every token but the final one stays
    /// exact. Tokens present in the vocabulary are never corrected.
    pub(crate) fn expand(
        &self,
        tokens: &[String],
        vocab: &[VocabTerm],
        cache: &mut FuzzyTermCache,
    ) -> Vec<ExpandedToken> {
        let last = tokens.len().saturating_sub(1);
        tokens
            .iter()
            .enumerate()
            .map(|(i, token)| {
                if self.last_token_only && i != last {
                    return ExpandedToken::Exact(token.clone());
                }
                self.expand_token(token, vocab, cache)
            })
            .collect()
    }

    fn expand_token(
        &self,
        token: &str,
        vocab: &[VocabTerm],
        cache: &mut FuzzyTermCache,
    ) -> ExpandedToken {
        let in_vocab = vocab.iter().any(|v| v.term == token);

        if self.correction_mode {
            if in_vocab {
                return ExpandedToken::Exact(token.to_string());
            }
            if let Some((replacement, confidence)) = self.best_correction(token, vocab) {
                return ExpandedToken::Corrected {
                    original: token.to_string(),
                    replacement,
                    confidence,
                };
            }
            // No consensus: fall through to expansion for this token.
        }

        let variants = self.variants_for(token, vocab, cache);
        if variants.is_empty() {
            ExpandedToken::Exact(token.to_string())
        } else {
            ExpandedToken::Expanded {
                original: token.to_string(),
                variants,
            }
        }
    }

    /// Scored variants for one token, cache-assisted.
    fn variants_for(
        &self,
        token: &str,
        vocab: &[VocabTerm],
        cache: &mut FuzzyTermCache,
    ) -> Vec<FuzzyCandidate> {
        if self.algorithm == FuzzyAlgorithm::Basic {
            return basic::variants(token, self.max_variations)
                .into_iter()
                .map(|term| FuzzyCandidate { term, score: 1.0 })
                .collect();
        }

        // A cached variant list narrows the scan from the whole
        // vocabulary to a handful of terms.
        if let Some(cached) = cache.get(token) {
            let mut out: Vec<FuzzyCandidate> = cached
                .iter()
                .filter_map(|term| {
                    self.score_selected(token, term)
                        .map(|score| FuzzyCandidate {
                            term: term.clone(),
                            score,
                        })
                })
                .collect();
            if !out.is_empty() {
                out.sort_by(|a, b| b.score.total_cmp(&a.score));
                out.truncate(self.max_variations);
                return out;
            }
        }

        let mut out: Vec<FuzzyCandidate> = vocab
            .iter()
            .filter(|v| v.term != token)
            .filter_map(|v| {
                self.score_selected(token, &v.term)
                    .map(|score| FuzzyCandidate {
                        term: v.term.clone(),
                        score,
                    })
            })
            .collect();
        out.sort_by(|a, b| b.score.total_cmp(&a.score));
        out.truncate(self.max_variations);
        cache.insert(token, out.iter().map(|c| c.term.clone()).collect());
        out
    }

    /// Score with the query's selected algorithm.
    fn score_selected(&self, query: &str, term: &str) -> Option<f64> {
        match self.algorithm {
            FuzzyAlgorithm::Basic => None,
            FuzzyAlgorithm::Trigram => self.trigram.score(query, term),
            FuzzyAlgorithm::JaroWinkler => self.jaro.score(query, term),
            FuzzyAlgorithm::Levenshtein => self.levenshtein.score(query, term),
            FuzzyAlgorithm::Phonetic => self.phonetic.score(query, term),
            FuzzyAlgorithm::Keyboard => self.keyboard.score(query, term),
        }
    }

    /// Panel scores for the correction consensus, in a fixed order.
    fn panel_scores(&self, query: &str, term: &str) -> Vec<f64> {
        [
            self.trigram.score(query, term),
            self.jaro.score(query, term),
            self.levenshtein.score(query, term),
            self.phonetic.score(query, term),
            self.keyboard.score(query, term),
        ]
        .into_iter()
        .flatten()
        .collect()
    }

    /// The single best correction for a token: at least two panel
    /// matchers must accept, and their mean score must reach the
    /// correction threshold. Document frequency breaks ties.
    fn best_correction(&self, token: &str, vocab: &[VocabTerm]) -> Option<(String, f64)> {
        let mut best: Option<(&VocabTerm, f64)> = None;
        for candidate in vocab.iter().filter(|v| v.term != token) {
            let scores = self.panel_scores(token, &candidate.term);
            if scores.len() < CORRECTION_CONSENSUS {
                continue;
            }
            let confidence = scores.iter().sum::<f64>() / scores.len() as f64;
            if confidence < self.correction_threshold {
                continue;
            }
            let better = match best {
                None => true,
                Some((prev, prev_conf)) => {
                    confidence > prev_conf
                        || (confidence == prev_conf && candidate.doc_count > prev.doc_count)
                }
            };
            if better {
                best = Some((candidate, confidence));
            }
        }
        best.map(|(v, conf)| (v.term.clone(), conf))
    }

    /// Ranked correction candidates for a single term (the `suggest`
    /// surface). No consensus requirement: the selected algorithm alone
    /// scores the vocabulary.
    pub(crate) fn rank_candidates(&self, term: &str, vocab: &[VocabTerm]) -> Vec<FuzzyCandidate> {
        let mut out: Vec<FuzzyCandidate> = vocab
            .iter()
            .filter(|v| v.term != term)
            .filter_map(|v| {
                self.score_selected(term, &v.term)
                    .map(|score| FuzzyCandidate {
                        term: v.term.clone(),
                        score,
                    })
            })
            .collect();
        out.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then_with(|| a.term.cmp(&b.term))
        });
        out.truncate(self.max_variations);
        out
    }

    /// Did-you-mean rewrites of the whole token list, best first.
    ///
    /// Suggestion *k* substitutes each correctable token with its
    /// *k*-th best panel candidate; confidence is the mean over the
    /// substituted tokens.
    pub(crate) fn suggestions(
        &self,
        tokens: &[String],
        vocab: &[VocabTerm],
        limit: usize,
    ) -> Vec<(String, f64)> {
        // Per-token ranked correction candidates (consensus-scored).
        let per_token: Vec<Vec<(String, f64)>> = tokens
            .iter()
            .map(|token| {
                if vocab.iter().any(|v| v.term == *token) {
                    return Vec::new();
                }
                let mut ranked: Vec<(String, f64)> = vocab
                    .iter()
                    .filter(|v| v.term != *token)
                    .filter_map(|v| {
                        let scores = self.panel_scores(token, &v.term);
                        if scores.len() < CORRECTION_CONSENSUS {
                            return None;
                        }
                        let conf = scores.iter().sum::<f64>() / scores.len() as f64;
                        (conf >= self.correction_threshold).then(|| (v.term.clone(), conf))
                    })
                    .collect();
                ranked.sort_by(|a, b| b.1.total_cmp(&a.1).then_with(|| a.0.cmp(&b.0)));
                ranked
            })
            .collect();

        if per_token.iter().all(Vec::is_empty) {
            return Vec::new();
        }

        let mut out = Vec::new();
        for k in 0..limit {
            let mut changed = false;
            let mut confidences = Vec::new();
            let rewritten: Vec<String> = tokens
                .iter()
                .zip(&per_token)
                .map(|(token, candidates)| {
                    // Fall back to the best candidate when the k-th is gone.
                    let pick = candidates.get(k).or_else(|| candidates.first());
                    match pick {
                        Some((term, conf)) => {
                            changed |= term != token;
                            confidences.push(*conf);
                            term.clone()
                        }
                        None => token.clone(),
                    }
                })
                .collect();
            if !changed || confidences.is_empty() {
                continue;
            }
            let text = rewritten.join(" ");
            if out.iter().any(|(t, _)| *t == text) {
                continue;
            }
            let confidence = confidences.iter().sum::<f64>() / confidences.len() as f64;
            out.push((text, confidence));
        }
        out.sort_by(|a, b| b.1.total_cmp(&a.1));
        out
    }
}
