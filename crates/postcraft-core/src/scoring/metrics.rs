//! Top-level metrics
//!
//! Each returns an [`Evaluation`] in [0, 1] and never fails: missing or
//! malformed fields degrade to a defined low score.

use super::composite::{
    cta_score, emoji_score, formatting_score, hashtag_score, hook_score, structure_score,
};
use super::features::{extract_topics, hashtags, paragraphs, word_count};
use super::{Evaluation, Scorer};
use crate::lexicon::Lexicon;
use crate::optimizer::Example;
use crate::pipeline::values::{parse_json_object, StyleCharacteristics, FALLBACK_PLACEHOLDER};
use crate::pipeline::Prediction;
use std::collections::BTreeMap;

fn normalize_key(key: &str) -> String {
    key.trim().to_lowercase().replace([' ', '-'], "_")
}

fn is_substantive(value: &str) -> bool {
    let value = value.trim();
    !value.is_empty() && value != FALLBACK_PLACEHOLDER
}

impl Scorer {
    /// Quality of a style characterization
    pub fn style_quality(&self, _reference: Option<&Example>, prediction: &Prediction) -> Evaluation {
        let weights = &self.weights.style;

        let Some(characteristics) = &prediction.style_characteristics else {
            return Evaluation::new(0.0, "Missing style_characteristics\n");
        };

        match characteristics {
            StyleCharacteristics::Text(text) => {
                if text.trim().chars().count() < weights.min_text_chars {
                    return Evaluation::new(
                        weights.too_short_score,
                        "Style description too short\n  Suggestion: Describe tone, structure, formatting, hooks and emoji usage\n",
                    );
                }
                match parse_json_object(text) {
                    Some(map) => {
                        let map: BTreeMap<String, String> =
                            match StyleCharacteristics::from_value(serde_json::Value::Object(map)) {
                                StyleCharacteristics::Structured(map) => map,
                                StyleCharacteristics::Text(_) => BTreeMap::new(),
                            };
                        self.style_mapping_quality(&map)
                    }
                    None => self.style_text_quality(text),
                }
            }
            StyleCharacteristics::Structured(map) => self.style_mapping_quality(map),
        }
    }

    fn style_text_quality(&self, text: &str) -> Evaluation {
        let weights = &self.weights.style;
        let lower = text.to_lowercase();

        let found: Vec<&str> = self
            .lexicon
            .style_terms
            .iter()
            .filter(|t| lower.contains(t.as_str()))
            .map(String::as_str)
            .collect();
        let terms = f32::min(weights.term_cap, found.len() as f32 * weights.term_points);
        let detail = (text.chars().count() as f32 / weights.text_detail_chars as f32).min(1.0)
            * weights.text_detail_cap;

        let mut feedback = String::new();
        if found.len() < 3 {
            feedback.push_str(&format!(
                "Sparse style description\n  Mentions: {:?}\n  Suggestion: Return a JSON object covering each style dimension\n",
                found
            ));
        }

        Evaluation::new(weights.text_base + terms + detail, feedback)
    }

    fn style_mapping_quality(&self, map: &BTreeMap<String, String>) -> Evaluation {
        let weights = &self.weights.style;

        let substantive: BTreeMap<String, &str> = map
            .iter()
            .filter(|(_, v)| is_substantive(v))
            .map(|(k, v)| (normalize_key(k), v.trim()))
            .collect();

        if substantive.is_empty() {
            return Evaluation::new(
                weights.too_short_score,
                "Empty style mapping\n  Issue: No dimension has a real description\n",
            );
        }

        let dimensions = &self.lexicon.style_dimensions;
        let missing: Vec<&str> = dimensions
            .iter()
            .filter(|d| !substantive.contains_key(d.as_str()))
            .map(String::as_str)
            .collect();
        let completeness = if dimensions.is_empty() {
            1.0
        } else {
            (dimensions.len() - missing.len()) as f32 / dimensions.len() as f32
        };

        let detail_chars: usize = substantive.values().map(|v| v.chars().count()).sum();
        let detail = (detail_chars as f32 / weights.map_detail_chars as f32).min(1.0)
            * weights.map_detail_cap;

        let mut feedback = String::new();
        if !missing.is_empty() {
            feedback.push_str(&format!("Incomplete style mapping\n  Missing: {:?}\n", missing));
        }

        Evaluation::new(
            weights.map_base + completeness * weights.completeness_weight + detail,
            feedback,
        )
    }

    /// Quality of a rewritten post
    pub fn content_quality(&self, reference: Option<&Example>, prediction: &Prediction) -> Evaluation {
        let weights = &self.weights.content;
        let lexicon: &Lexicon = &self.lexicon;

        let article = match prediction.article.as_deref() {
            Some(article) if !article.trim().is_empty() => article,
            _ => return Evaluation::new(0.0, "No article produced\n"),
        };

        let original = reference.map(|r| r.content_to_transform.as_str()).unwrap_or("");
        if article.trim() == original.trim() {
            return Evaluation::new(
                weights.noop_score,
                "No transformation\n  Issue: Output is identical to the input content\n",
            );
        }

        let mut feedback = String::new();
        let paras = paragraphs(article);
        let first_line = article.lines().map(str::trim).find(|l| !l.is_empty()).unwrap_or("");
        // Closing paragraph ignores a trailing block made only of hashtags
        let last_paragraph = paras
            .iter()
            .rev()
            .find(|p| word_count(p) > hashtags(p).len())
            .copied()
            .unwrap_or("");
        let topics = extract_topics(original, lexicon);

        let mut score = weights.base;
        score += hook_score(first_line, lexicon, weights, &mut feedback);
        score += structure_score(article, lexicon, weights, &mut feedback);
        score += formatting_score(article, lexicon, weights, &mut feedback);
        score += emoji_score(article, lexicon, weights, &mut feedback);
        score += hashtag_score(article, &topics, weights, &mut feedback);
        score += cta_score(last_paragraph, lexicon, weights, &mut feedback);

        let words = word_count(article);
        if (weights.min_words..=weights.max_words).contains(&words) {
            score += weights.word_band_bonus;
        } else {
            score -= weights.word_band_penalty;
            feedback.push_str(&format!(
                "Length\n  Got: {} words\n  Expected: {}-{} words\n",
                words, weights.min_words, weights.max_words
            ));
        }

        if !topics.is_empty() {
            let lower = article.to_lowercase();
            let kept = topics.iter().filter(|t| lower.contains(t.as_str())).count();
            score += kept as f32 / topics.len() as f32 * weights.topic_overlap;
            if kept < topics.len() {
                let dropped: Vec<&String> =
                    topics.iter().filter(|t| !lower.contains(t.as_str())).collect();
                feedback.push_str(&format!("Topic drift\n  Dropped topics: {:?}\n", dropped));
            }
        }

        if let Some(expected) = reference.and_then(|r| r.expected_output.as_deref()) {
            let expected_len = expected.chars().count() as f32;
            let actual_len = article.chars().count() as f32;
            if expected_len > 0.0 && actual_len < expected_len * weights.reference_short_ratio {
                score -= weights.reference_short_penalty;
                feedback.push_str(&format!(
                    "Too short versus reference\n  Got: {} chars\n  Reference: {} chars\n",
                    actual_len, expected_len
                ));
            }
        }

        Evaluation::new(score.clamp(weights.floor, 1.0), feedback)
    }

    /// Quality of an evaluator's score and written feedback
    pub fn feedback_quality(&self, _reference: Option<&Example>, prediction: &Prediction) -> Evaluation {
        let weights = &self.weights.feedback;

        let (Some(raw_score), Some(feedback)) = (&prediction.quality_score, &prediction.feedback)
        else {
            return Evaluation::new(0.0, "Missing quality_score or feedback\n");
        };

        let numeric = raw_score.coerce();
        let lower = feedback.to_lowercase();

        let text_quality = if feedback.chars().count() <= weights.min_feedback_chars {
            0.0
        } else if Lexicon::mentions_any(&lower, &self.lexicon.actionable_phrases) {
            weights.actionable
        } else if Lexicon::mentions_any(&lower, &self.lexicon.constructive_markers) {
            weights.constructive
        } else {
            weights.detailed
        };

        let notes = if text_quality < weights.actionable {
            "Feedback could be more actionable\n  Suggestion: Name concrete changes such as \"try adding\" or \"consider using\"\n"
        } else {
            ""
        };

        Evaluation::new(
            weights.score_weight * numeric + weights.text_weight * text_quality,
            notes,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::optimizer::Example;
    use crate::pipeline::values::RawScore;

    fn scorer() -> Scorer {
        Scorer::default()
    }

    fn mapping(pairs: &[(&str, &str)]) -> Prediction {
        Prediction::with_style(StyleCharacteristics::Structured(
            pairs.iter().map(|(k, v)| (k.to_string(), v.to_string())).collect(),
        ))
    }

    fn reference(content: &str, expected: Option<&str>) -> Example {
        Example {
            name: Some("ref".to_string()),
            sample: "A sample post.".to_string(),
            content_to_transform: content.to_string(),
            expected_output: expected.map(String::from),
            style_characteristics: None,
        }
    }

    const STRONG_POST: &str = "🚀 Why do 70% of remote teams struggle with alignment?\n\n\
        The challenge is simple: nobody writes anything down, and decisions vanish into calls.\n\n\
        • Weekly written updates\n\
        • Decision logs\n\
        • Async reviews\n\n\
        The solution we found was boring but it works. Results came within a month.\n\n\
        💡 A survey of our own teams showed a clear jump in clarity and fewer repeat meetings.\n\n\
        ✅ Remote alignment is a habit, not a tool.\n\n\
        What has your experience been with remote alignment? Share your thoughts below.\n\n\
        #RemoteWork #Alignment #Teams";

    const SOURCE: &str = "Remote teams struggle with alignment. Writing decisions down \
        helps remote teams keep alignment. Teams that write things down do better.";

    #[test]
    fn test_missing_fields_score_zero() {
        let empty = Prediction::default();
        let s = scorer();
        assert_eq!(s.style_quality(None, &empty).score, 0.0);
        assert_eq!(s.content_quality(None, &empty).score, 0.0);
        assert_eq!(s.feedback_quality(None, &empty).score, 0.0);

        // Feedback metric needs both fields
        let only_score = Prediction {
            quality_score: Some(RawScore::Number(0.9)),
            ..Default::default()
        };
        assert_eq!(s.feedback_quality(None, &only_score).score, 0.0);
    }

    #[test]
    fn test_style_short_text() {
        let s = scorer();
        let short = Prediction::with_style(StyleCharacteristics::Text("Short".into()));
        assert_eq!(s.style_quality(None, &short).score, 0.25);
        let empty = Prediction::with_style(StyleCharacteristics::Text(String::new()));
        assert_eq!(s.style_quality(None, &empty).score, 0.25);
    }

    #[test]
    fn test_style_text_keyword_density() {
        let s = scorer();
        let medium = Prediction::with_style(StyleCharacteristics::Text(
            "This text has a formal tone with some advanced vocabulary.".into(),
        ));
        assert!(s.style_quality(None, &medium).score > 0.5);

        let rich = Prediction::with_style(StyleCharacteristics::Text(
            "This text exhibits a formal tone with advanced vocabulary and complex sentence structure. \
             It uses third-person voice consistently and maintains a professional paragraph format. \
             The formatting is precise and every post ends with a question to drive engagement."
                .into(),
        ));
        assert!(s.style_quality(None, &rich).score > 0.7);
    }

    #[test]
    fn test_style_json_text_scored_as_mapping() {
        let s = scorer();
        let text = Prediction::with_style(StyleCharacteristics::Text(
            r#"{"tone": "confident and warm", "structure": "hook, story, lesson, question"}"#.into(),
        ));
        let as_map = mapping(&[
            ("tone", "confident and warm"),
            ("structure", "hook, story, lesson, question"),
        ]);
        assert_eq!(s.style_quality(None, &text).score, s.style_quality(None, &as_map).score);
    }

    #[test]
    fn test_style_empty_and_full_mapping() {
        let s = scorer();
        assert!(s.style_quality(None, &mapping(&[])).score < 0.6);

        let full = mapping(&[
            ("tone", "Confident, optimistic and conversational, with first-person storytelling throughout."),
            ("structure", "One-line hook, short personal story, three lessons, closing question to the reader."),
            ("formatting", "Single-sentence paragraphs separated by blank lines, bullet lists for the lessons."),
            ("hooks_and_cta", "Opens with a bold statistic and ends by asking readers to share their experience."),
            ("emoji_usage", "Two to four emojis placed at the start of key lines, never inside sentences."),
        ]);
        assert!(s.style_quality(None, &full).score > 0.85);
    }

    #[test]
    fn test_style_monotonic_in_dimensions() {
        let s = scorer();
        let dims = [
            ("tone", "warm"),
            ("structure", "story arc"),
            ("formatting", "short lines"),
            ("hooks_and_cta", "question close"),
            ("emoji_usage", "sparse"),
        ];
        let mut previous = s.style_quality(None, &mapping(&[])).score;
        for n in 1..=dims.len() {
            let current = s.style_quality(None, &mapping(&dims[..n])).score;
            assert!(current >= previous, "{} dims scored {} < {}", n, current, previous);
            previous = current;
        }
    }

    #[test]
    fn test_style_placeholder_counts_as_absent() {
        let s = scorer();
        let fallback = Prediction::with_style(StyleCharacteristics::fallback());
        assert_eq!(s.style_quality(None, &fallback).score, 0.25);
    }

    #[test]
    fn test_content_noop_exactly_point_one() {
        let s = scorer();
        for input in ["x", "Some plain content.", SOURCE] {
            let example = reference(input, None);
            let prediction = Prediction::with_article(input);
            assert_eq!(s.content_quality(Some(&example), &prediction).score, 0.1);
        }
    }

    #[test]
    fn test_content_strong_post_beats_plain_rewrite() {
        let s = scorer();
        let example = reference(SOURCE, None);
        let strong = s.content_quality(Some(&example), &Prediction::with_article(STRONG_POST));
        let plain = s.content_quality(
            Some(&example),
            &Prediction::with_article("Teams should write decisions down."),
        );
        assert!(strong.score > 0.8, "strong post scored {}", strong.score);
        assert!(plain.score >= 0.1);
        assert!(plain.score < strong.score);
        assert!(plain.feedback.contains("Missing call to action"));
    }

    #[test]
    fn test_content_without_reference() {
        let s = scorer();
        let score = s.content_quality(None, &Prediction::with_article(STRONG_POST)).score;
        assert!(score > 0.7);
        assert!(score <= 1.0);
    }

    #[test]
    fn test_content_short_versus_reference_penalized() {
        let s = scorer();
        let long_reference = STRONG_POST.repeat(3);
        let with_ref = reference(SOURCE, Some(&long_reference));
        let without_ref = reference(SOURCE, None);
        let prediction = Prediction::with_article(STRONG_POST);
        let penalized = s.content_quality(Some(&with_ref), &prediction).score;
        let unpenalized = s.content_quality(Some(&without_ref), &prediction).score;
        assert!(penalized < unpenalized);
    }

    #[test]
    fn test_feedback_quality_blend() {
        let s = scorer();
        let low = Prediction {
            quality_score: Some(RawScore::Number(0.3)),
            feedback: Some("Short".into()),
            ..Default::default()
        };
        assert!(s.feedback_quality(None, &low).score < 0.3);

        let good = Prediction {
            quality_score: Some(RawScore::Text("80%".into())),
            feedback: Some(
                "To improve the post, consider enhancing the hook with a domain-specific statistic."
                    .into(),
            ),
            ..Default::default()
        };
        let score = s.feedback_quality(None, &good).score;
        assert!((score - (0.7 * 0.8 + 0.3 * 0.8)).abs() < 1e-6);

        let actionable = Prediction {
            quality_score: Some(RawScore::Text("0.8".into())),
            feedback: Some(
                "Solid draft overall. Try adding a closing question and consider using fewer hashtags."
                    .into(),
            ),
            ..Default::default()
        };
        assert!(s.feedback_quality(None, &actionable).score > score);

        let unparseable = Prediction {
            quality_score: Some(RawScore::Text("great".into())),
            feedback: Some(String::new()),
            ..Default::default()
        };
        assert!((s.feedback_quality(None, &unparseable).score - 0.35).abs() < 1e-6);
    }

    #[test]
    fn test_feedback_non_finite_score_uses_default() {
        let s = scorer();
        for raw in ["NaN%", "nan", "inf"] {
            let prediction = Prediction {
                quality_score: Some(RawScore::Text(raw.into())),
                feedback: Some(String::new()),
                ..Default::default()
            };
            let score = s.feedback_quality(None, &prediction).score;
            assert!((score - 0.35).abs() < 1e-6, "{} scored {}", raw, score);
        }
    }

    #[test]
    fn test_evaluation_rejects_nan() {
        assert_eq!(Evaluation::new(f32::NAN, "").score, 0.0);
        assert_eq!(Evaluation::new(1.5, "").score, 1.0);
    }
}
