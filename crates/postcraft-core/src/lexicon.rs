//! Keyword tables used by the heuristic scorers
//!
//! Every table is plain data owned by a [`Lexicon`]. The scorer receives a
//! lexicon at construction, so tests can substitute small fixture tables
//! without touching the production ones.

use regex::Regex;
use std::collections::HashSet;
use std::sync::LazyLock;

/// Matches a digit anywhere, or a spelled-out number as a whole word
static RE_STATISTIC: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(
        r"(?i)\d|\b(?:one|two|three|four|five|six|seven|eight|nine|ten|hundred|thousand|million|billion)\b",
    )
    .expect("valid regex")
});

const STOP_WORDS: &[&str] = &[
    "the", "a", "an", "and", "or", "but", "of", "to", "in", "for", "with", "on", "at", "by",
    "as", "this", "that", "these", "those", "from", "have", "has", "had", "will", "would",
    "could", "should", "your", "their", "there", "they", "them", "then", "than", "what", "when",
    "where", "which", "while", "were", "been", "being", "into", "more", "most", "some", "such",
    "just", "also", "very", "about", "after", "before", "because", "only", "over", "each",
];

const POWER_WORDS: &[&str] = &[
    "exclusive", "secret", "shocking", "amazing", "revolutionary", "incredible", "essential",
    "crucial", "vital", "massive", "powerful", "proven", "guaranteed", "extraordinary",
    "remarkable", "devastating", "urgent", "limited", "unique", "breakthrough", "instantly",
    "skyrocket", "explode", "transform", "announcing", "warning", "danger", "critical", "fear",
    "success", "failure", "mistake",
];

const EMOJIS: &[&str] = &[
    "🔎", "💡", "🚀", "✅", "🤔", "👉", "💪", "📊", "🔑", "💼", "📈", "🔄", "📱", "💭", "⚡", "🎯",
    "💰", "🧠", "⭐",
];

/// Terms that signal a substantive free-text style description
const STYLE_TERMS: &[&str] = &[
    "tone", "structure", "formatting", "emoji", "hook", "cta", "hashtag", "bullet", "question",
    "engagement", "vocabulary", "formality", "sentence", "paragraph", "voice",
];

/// Dimensions a structured characterization is expected to cover
const STYLE_DIMENSIONS: &[&str] = &["tone", "structure", "formatting", "hooks_and_cta", "emoji_usage"];

const PROBLEM_TERMS: &[&str] = &[
    "challenge", "problem", "issue", "struggle", "difficult", "pain", "risk",
];

const SOLUTION_TERMS: &[&str] = &[
    "solution", "benefit", "advantage", "opportunity", "results", "outcome", "success",
];

const EVIDENCE_TERMS: &[&str] = &[
    "example", "study", "research", "data", "survey", "report", "case", "proof", "evidence",
];

const CTA_TERMS: &[&str] = &[
    "comment", "share", "thoughts", "agree", "follow", "connect", "learn", "contact",
];

const SPECIFIC_CTA_PHRASES: &[&str] = &[
    "what do you think about",
    "what has your experience been",
    "share your",
];

const CONSTRUCTIVE_MARKERS: &[&str] = &[
    "improve", "enhance", "better", "consider", "suggest", "engagement", "hook", "emoji",
];

const ACTIONABLE_PHRASES: &[&str] = &[
    "try adding", "consider using", "try using", "consider adding", "replace", "instead of",
];

const BULLET_PREFIXES: &[&str] = &["•", "-", "✅", "✓", "→", "1.", "2.", "3.", "4.", "5."];

/// Immutable keyword tables consumed by the scorers
#[derive(Clone, Debug)]
pub struct Lexicon {
    pub stop_words: HashSet<String>,
    pub power_words: HashSet<String>,
    pub emojis: Vec<String>,
    pub style_terms: Vec<String>,
    pub style_dimensions: Vec<String>,
    pub problem_terms: Vec<String>,
    pub solution_terms: Vec<String>,
    pub evidence_terms: Vec<String>,
    pub cta_terms: Vec<String>,
    pub specific_cta_phrases: Vec<String>,
    pub constructive_markers: Vec<String>,
    pub actionable_phrases: Vec<String>,
    pub bullet_prefixes: Vec<String>,
    pub statistic_pattern: Regex,
}

fn owned(words: &[&str]) -> Vec<String> {
    words.iter().map(|w| w.to_string()).collect()
}

impl Default for Lexicon {
    fn default() -> Self {
        Self {
            stop_words: STOP_WORDS.iter().map(|w| w.to_string()).collect(),
            power_words: POWER_WORDS.iter().map(|w| w.to_string()).collect(),
            emojis: owned(EMOJIS),
            style_terms: owned(STYLE_TERMS),
            style_dimensions: owned(STYLE_DIMENSIONS),
            problem_terms: owned(PROBLEM_TERMS),
            solution_terms: owned(SOLUTION_TERMS),
            evidence_terms: owned(EVIDENCE_TERMS),
            cta_terms: owned(CTA_TERMS),
            specific_cta_phrases: owned(SPECIFIC_CTA_PHRASES),
            constructive_markers: owned(CONSTRUCTIVE_MARKERS),
            actionable_phrases: owned(ACTIONABLE_PHRASES),
            bullet_prefixes: owned(BULLET_PREFIXES),
            statistic_pattern: RE_STATISTIC.clone(),
        }
    }
}

impl Lexicon {
    /// Replace the emoji table (used by tests with fixture emoji sets)
    pub fn with_emojis(mut self, emojis: &[&str]) -> Self {
        self.emojis = owned(emojis);
        self
    }

    /// Replace the power-word table
    pub fn with_power_words(mut self, words: &[&str]) -> Self {
        self.power_words = words.iter().map(|w| w.to_string()).collect();
        self
    }

    /// Whether any term of `terms` occurs as a substring of the lowercased text
    pub fn mentions_any(text_lower: &str, terms: &[String]) -> bool {
        terms.iter().any(|t| text_lower.contains(t.as_str()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_tables_populated() {
        let lexicon = Lexicon::default();
        assert!(lexicon.power_words.contains("breakthrough"));
        assert!(lexicon.stop_words.contains("the"));
        assert_eq!(lexicon.emojis.len(), 19);
        assert_eq!(lexicon.style_dimensions.len(), 5);
    }

    #[test]
    fn test_statistic_pattern_word_boundaries() {
        let lexicon = Lexicon::default();
        assert!(lexicon.statistic_pattern.is_match("We grew 40% in a year"));
        assert!(lexicon.statistic_pattern.is_match("Three lessons I learned"));
        // "someone" must not count as the number "one"
        assert!(!lexicon.statistic_pattern.is_match("someone told me"));
    }

    #[test]
    fn test_fixture_substitution() {
        let lexicon = Lexicon::default().with_emojis(&["🔥"]).with_power_words(&["bold"]);
        assert_eq!(lexicon.emojis, vec!["🔥".to_string()]);
        assert!(lexicon.power_words.contains("bold"));
        assert!(!lexicon.power_words.contains("breakthrough"));
    }
}
