//! Token-level string matching with optional bounded-error fuzzy mode.
//!
//! A [`Matcher`] is built once from the query string and then matched against
//! many candidate strings. Both sides are tokenized the same way: soft
//! hyphens stripped, optionally decomposed and stripped of combining marks,
//! optionally lower-cased, split on separator characters, optionally sorted
//! to ignore word order. Matching walks the query tokens over the candidate
//! tokens in order; a query token is consumed when it is a prefix of the
//! current candidate token (exact mode) or within the allowed prefix edit
//! distance (fuzzy mode).
//!
//! The resulting score is `matched_chars / total_chars`, i.e. the fraction of
//! the candidate covered by the query. `1.0` is a perfect match.

use unicode_normalization::char::is_combining_mark;
use unicode_normalization::UnicodeNormalization;

/// Characters treated as token separators in addition to Unicode whitespace.
pub const DEFAULT_SEPARATORS: &str = r#"\/-[](){}#!?<>"'=+*.:,;_"#;

/// Configuration of the tokenizer and the matching mode.
#[derive(Debug, Clone)]
pub struct MatchConfig {
    /// Lower-case both sides before matching.
    pub ignore_case: bool,

    /// Decompose to NFD and drop combining marks, so e.g. "é" matches "e".
    pub ignore_diacritics: bool,

    /// Sort tokens lexicographically so token order does not matter.
    pub ignore_word_order: bool,

    /// Separator character class. Unicode whitespace always separates.
    pub separators: String,

    /// Allow bounded-error matching instead of exact prefix matching.
    pub fuzzy: bool,

    /// Allowed errors per query token: `token_len / error_tolerance_divisor`.
    pub error_tolerance_divisor: u32,
}

impl Default for MatchConfig {
    fn default() -> Self {
        Self {
            ignore_case: true,
            ignore_diacritics: true,
            ignore_word_order: true,
            separators: DEFAULT_SEPARATORS.to_string(),
            fuzzy: false,
            error_tolerance_divisor: 4,
        }
    }
}

/// The outcome of matching a candidate against a [`Matcher`].
///
/// Wraps the score such that "no match" (negative) sorts below every match.
/// An empty query matches everything with score `0.0`.
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct Match(f64);

impl Match {
    /// The non-match sentinel.
    pub const NONE: Match = Match(-1.0);

    pub fn new(score: f64) -> Self {
        Self(score)
    }

    /// Whether the candidate matched at all.
    pub fn is_match(self) -> bool {
        self.0 >= 0.0
    }

    /// Whether this is the zero-score match produced by an empty query.
    pub fn is_empty_match(self) -> bool {
        self.0 == 0.0
    }

    /// Whether the candidate was covered completely.
    pub fn is_exact_match(self) -> bool {
        self.0 == 1.0
    }

    pub fn score(self) -> f64 {
        self.0
    }
}

impl From<Match> for f64 {
    fn from(m: Match) -> f64 {
        m.0
    }
}

/// A tokenized query string ready to be matched against candidates.
#[derive(Debug, Clone)]
pub struct Matcher {
    config: MatchConfig,
    string: String,
    tokens: Vec<String>,
}

impl Matcher {
    pub fn new(string: &str, config: MatchConfig) -> Self {
        let tokens = tokenize(string, &config);
        Self {
            config,
            string: string.to_string(),
            tokens,
        }
    }

    /// The string the matcher was built from.
    pub fn string(&self) -> &str {
        &self.string
    }

    /// Match a single candidate.
    pub fn match_str(&self, candidate: &str) -> Match {
        // An empty query is a zero-score match for everything.
        if self.string.is_empty() {
            return Match::new(0.0);
        }

        // A query consisting only of separators matches nothing.
        if self.tokens.is_empty() {
            return Match::NONE;
        }

        let candidate_tokens = tokenize(candidate, &self.config);

        let mut matched_chars = 0.0;
        let mut total_chars = 0.0;
        let mut i = 0;

        for candidate_token in &candidate_tokens {
            let candidate_len = candidate_token.chars().count();

            if i < self.tokens.len() {
                let query_token = &self.tokens[i];
                let query_len = query_token.chars().count();

                // A longer query token cannot be a prefix.
                if query_len <= candidate_len {
                    if self.config.fuzzy {
                        let allowed =
                            query_len as u32 / self.config.error_tolerance_divisor.max(1);
                        let pattern: Vec<char> = query_token.chars().collect();
                        let text: Vec<char> = candidate_token.chars().collect();
                        let distance = prefix_edit_distance(&pattern, &text, allowed);
                        if distance <= allowed {
                            matched_chars += (query_len as u32 - distance) as f64;
                            i += 1;
                        }
                    } else if candidate_token.starts_with(query_token.as_str()) {
                        matched_chars += query_len as f64;
                        i += 1;
                    }
                }
            }

            total_chars += candidate_len as f64;
        }

        // A match requires every query token to have been consumed.
        if i == self.tokens.len() {
            Match::new(matched_chars / total_chars)
        } else {
            Match::NONE
        }
    }

    /// Match several candidates and return the best match. Ties keep the
    /// first candidate's match.
    pub fn match_any<I, S>(&self, candidates: I) -> Match
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut best = Match::NONE;
        for candidate in candidates {
            let m = self.match_str(candidate.as_ref());
            if m.score() > best.score() {
                best = m;
            }
        }
        best
    }
}

fn tokenize(s: &str, config: &MatchConfig) -> Vec<String> {
    // Soft hyphens are invisible and never meaningful for matching.
    let mut s: String = s.chars().filter(|&c| c != '\u{00AD}').collect();

    if config.ignore_diacritics {
        s = s.nfd().filter(|&c| !is_combining_mark(c)).collect();
    }

    if config.ignore_case {
        s = s.to_lowercase();
    }

    let mut tokens: Vec<String> = s
        .split(|c: char| c.is_whitespace() || config.separators.contains(c))
        .filter(|t| !t.is_empty())
        .map(str::to_string)
        .collect();

    if config.ignore_word_order {
        tokens.sort_unstable();
    }

    tokens
}

/// Minimum number of edits turning `pattern` into a prefix of `text`,
/// bounded by `limit`. Returns `limit + 1` as soon as the bound is exceeded.
fn prefix_edit_distance(pattern: &[char], text: &[char], limit: u32) -> u32 {
    if pattern.is_empty() {
        return 0;
    }

    // Prefixes longer than |pattern| + limit cannot be within the bound.
    let cols = text.len().min(pattern.len() + limit as usize);
    let mut prev: Vec<u32> = (0..=cols as u32).collect();
    let mut cur: Vec<u32> = vec![0; cols + 1];

    for (i, &p) in pattern.iter().enumerate() {
        cur[0] = i as u32 + 1;
        let mut row_min = cur[0];
        for j in 1..=cols {
            let substitution = prev[j - 1] + u32::from(p != text[j - 1]);
            cur[j] = substitution.min(prev[j] + 1).min(cur[j - 1] + 1);
            row_min = row_min.min(cur[j]);
        }
        if row_min > limit {
            return limit + 1;
        }
        std::mem::swap(&mut prev, &mut cur);
    }

    // The pattern may stop at any prefix of the text.
    *prev.iter().min().unwrap()
}
