//! Lexical feature extractors
//!
//! Pure functions over a single text span. None of them can fail: empty or
//! malformed input yields the "absent" signal (false, 0, empty).

use crate::lexicon::Lexicon;
use regex::Regex;
use std::collections::HashMap;
use std::sync::LazyLock;

/// Sentence-terminal punctuation followed by whitespace or end of text
static RE_SENTENCE_END: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"[.!?]+(?:\s+|$)").expect("valid regex"));

/// Number of topics returned by [`extract_topics`]
pub const TOPIC_COUNT: usize = 5;

/// Upper word bound of a "short" sentence
pub const SHORT_SENTENCE_WORDS: usize = 10;
/// Upper word bound of a "medium" sentence
pub const MEDIUM_SENTENCE_WORDS: usize = 20;

fn strip_punctuation(token: &str) -> &str {
    token.trim_matches(|c: char| !c.is_alphanumeric())
}

/// Lowercased, punctuation-stripped whitespace tokens
fn normalized_tokens(text: &str) -> Vec<String> {
    text.split_whitespace()
        .map(|t| strip_punctuation(t).to_lowercase())
        .filter(|t| !t.is_empty())
        .collect()
}

/// Paragraphs delimited by blank lines, trimmed, empty ones dropped
pub fn paragraphs(text: &str) -> Vec<&str> {
    text.split("\n\n")
        .map(str::trim)
        .filter(|p| !p.is_empty())
        .collect()
}

/// Word count on whitespace boundaries
pub fn word_count(text: &str) -> usize {
    text.split_whitespace().count()
}

/// The five most frequent content words, ties broken by first appearance
pub fn extract_topics(text: &str, lexicon: &Lexicon) -> Vec<String> {
    let mut counts: Vec<(String, usize)> = Vec::new();
    let mut positions: HashMap<String, usize> = HashMap::new();

    for token in normalized_tokens(text) {
        if token.chars().count() <= 3 || lexicon.stop_words.contains(&token) {
            continue;
        }
        match positions.get(&token) {
            Some(&idx) => counts[idx].1 += 1,
            None => {
                positions.insert(token.clone(), counts.len());
                counts.push((token, 1));
            }
        }
    }

    // Stable sort keeps first-encountered order among equal counts
    counts.sort_by(|a, b| b.1.cmp(&a.1));
    counts
        .into_iter()
        .take(TOPIC_COUNT)
        .map(|(word, _)| word)
        .collect()
}

pub fn has_power_words(text: &str, lexicon: &Lexicon) -> bool {
    normalized_tokens(text)
        .iter()
        .any(|t| lexicon.power_words.contains(t))
}

pub fn has_statistic(text: &str, lexicon: &Lexicon) -> bool {
    lexicon.statistic_pattern.is_match(text)
}

pub fn has_emoji(text: &str, lexicon: &Lexicon) -> bool {
    lexicon.emojis.iter().any(|e| text.contains(e.as_str()))
}

/// Total occurrences of lexicon emojis in the text
pub fn emoji_count(text: &str, lexicon: &Lexicon) -> usize {
    lexicon
        .emojis
        .iter()
        .map(|e| text.matches(e.as_str()).count())
        .sum()
}

/// Fraction of paragraphs holding at least one emoji (0.0 without paragraphs)
pub fn emoji_distribution(text: &str, lexicon: &Lexicon) -> f32 {
    let paras = paragraphs(text);
    if paras.is_empty() {
        return 0.0;
    }
    let with_emoji = paras.iter().filter(|p| has_emoji(p, lexicon)).count();
    (with_emoji as f32 / paras.len() as f32).min(1.0)
}

/// 1.0 when short and medium sentences are mixed, 0.5 for a single band, else 0.0
pub fn sentence_length_variety(text: &str) -> f32 {
    let sentences: Vec<&str> = RE_SENTENCE_END
        .split(text)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .collect();

    if sentences.len() < 2 {
        return 0.0;
    }

    let lengths: Vec<usize> = sentences.iter().map(|s| word_count(s)).collect();
    let short = lengths.iter().any(|&l| l <= SHORT_SENTENCE_WORDS);
    let medium = lengths
        .iter()
        .any(|&l| l > SHORT_SENTENCE_WORDS && l <= MEDIUM_SENTENCE_WORDS);

    match (short, medium) {
        (true, true) => 1.0,
        (true, false) | (false, true) => 0.5,
        (false, false) => 0.0,
    }
}

/// Lines that open with a bullet or list marker
pub fn bullet_line_count(text: &str, lexicon: &Lexicon) -> usize {
    text.lines()
        .map(str::trim_start)
        .filter(|line| {
            lexicon
                .bullet_prefixes
                .iter()
                .any(|prefix| line.starts_with(prefix.as_str()))
        })
        .count()
}

/// Whitespace tokens starting with `#` followed by at least one character
pub fn hashtags(text: &str) -> Vec<&str> {
    text.split_whitespace()
        .filter(|w| w.starts_with('#') && w.chars().count() > 1)
        .collect()
}

pub fn question_line_count(text: &str) -> usize {
    text.lines().filter(|line| line.contains('?')).count()
}

/// Whether the text carries a call-to-action verb
pub fn has_call_to_action(text: &str, lexicon: &Lexicon) -> bool {
    Lexicon::mentions_any(&text.to_lowercase(), &lexicon.cta_terms)
}
