//! Heuristic scoring of pipeline outputs
//!
//! Every score is a deterministic function of lexical and structural pattern
//! matches. Sub-scores are additive point accumulations clamped to a ceiling,
//! so each signal's marginal effect can be read off [`ScoringWeights`] directly.
//!
//! ## Metrics
//!
//! | Metric            | Field inspected                 | Used for                  |
//! |-------------------|---------------------------------|---------------------------|
//! | style quality     | `style_characteristics`         | style-analyzer search     |
//! | content quality   | `article`                       | content-transformer search|
//! | feedback quality  | `quality_score` + `feedback`    | evaluator output          |
//!
//! All metrics accept an optional reference example. Without one, the
//! reference-dependent parts (topic overlap, length ratio) are skipped.

pub mod composite;
pub mod features;
pub mod metrics;

use crate::lexicon::Lexicon;
use crate::optimizer::Example;
use crate::pipeline::Prediction;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Constants of the style-quality metric
///
/// The values were tuned against a small set of generated posts and should be
/// recalibrated against a larger corpus of real output.
#[derive(Clone, Debug)]
pub struct StyleWeights {
    /// Text shorter than this counts as too short
    pub min_text_chars: usize,
    /// Score for empty or too-short characterizations
    pub too_short_score: f32,
    pub text_base: f32,
    /// Points per style term found in a free-text description
    pub term_points: f32,
    pub term_cap: f32,
    pub text_detail_cap: f32,
    /// Characters of free text that earn the full detail bonus
    pub text_detail_chars: usize,
    pub map_base: f32,
    /// Weight of the fraction of expected dimensions present
    pub completeness_weight: f32,
    pub map_detail_cap: f32,
    /// Characters across all dimension values that earn the full detail bonus
    pub map_detail_chars: usize,
}

impl Default for StyleWeights {
    fn default() -> Self {
        Self {
            min_text_chars: 20,
            too_short_score: 0.25,
            text_base: 0.5,
            term_points: 0.05,
            term_cap: 0.35,
            text_detail_cap: 0.15,
            text_detail_chars: 600,
            map_base: 0.3,
            completeness_weight: 0.5,
            map_detail_cap: 0.2,
            map_detail_chars: 400,
        }
    }
}

/// Constants of the content-quality metric
#[derive(Clone, Debug)]
pub struct ContentWeights {
    /// Exact score for output identical to the untransformed input
    pub noop_score: f32,
    /// Minimum score once any transformation happened
    pub floor: f32,
    pub base: f32,

    pub hook_cap: f32,
    pub hook_question: f32,
    pub hook_statistic: f32,
    pub hook_power_word: f32,
    pub hook_emoji: f32,
    pub hook_brevity: f32,
    pub hook_max_words: usize,

    pub structure_cap: f32,
    pub structure_problem: f32,
    pub structure_solution: f32,
    pub structure_evidence: f32,

    pub formatting_cap: f32,
    pub min_bullets: usize,
    pub bullets_many: f32,
    pub bullets_some: f32,
    /// Longest paragraph allowed for the short-paragraph bonus
    pub max_paragraph_chars: usize,
    pub short_paragraphs: f32,
    pub min_paragraphs: usize,
    pub paragraph_breaks: f32,
    pub sentence_variety: f32,

    /// Emoji count sweet spot, inclusive
    pub emoji_min: usize,
    pub emoji_max: usize,
    pub emoji_in_range: f32,
    pub emoji_distribution: f32,
    pub emoji_out_of_range: f32,

    pub hashtag_cap: f32,
    pub hashtag_min: usize,
    pub hashtag_max: usize,
    pub hashtag_count: f32,
    pub hashtag_relevance: f32,
    pub hashtag_position: f32,

    pub cta_cap: f32,
    pub cta_question: f32,
    pub cta_verb: f32,
    pub cta_specific: f32,

    pub min_words: usize,
    pub max_words: usize,
    pub word_band_bonus: f32,
    pub word_band_penalty: f32,

    pub topic_overlap: f32,

    /// Output shorter than this fraction of the reference is penalized
    pub reference_short_ratio: f32,
    pub reference_short_penalty: f32,
}

impl Default for ContentWeights {
    fn default() -> Self {
        Self {
            noop_score: 0.1,
            floor: 0.1,
            base: 0.05,

            hook_cap: 0.15,
            hook_question: 0.05,
            hook_statistic: 0.05,
            hook_power_word: 0.04,
            hook_emoji: 0.03,
            hook_brevity: 0.03,
            hook_max_words: 15,

            structure_cap: 0.15,
            structure_problem: 0.06,
            structure_solution: 0.06,
            structure_evidence: 0.04,

            formatting_cap: 0.1,
            min_bullets: 3,
            bullets_many: 0.03,
            bullets_some: 0.015,
            max_paragraph_chars: 250,
            short_paragraphs: 0.03,
            min_paragraphs: 4,
            paragraph_breaks: 0.02,
            sentence_variety: 0.02,

            emoji_min: 2,
            emoji_max: 8,
            emoji_in_range: 0.05,
            emoji_distribution: 0.05,
            emoji_out_of_range: 0.02,

            hashtag_cap: 0.15,
            hashtag_min: 2,
            hashtag_max: 5,
            hashtag_count: 0.05,
            hashtag_relevance: 0.05,
            hashtag_position: 0.05,

            cta_cap: 0.15,
            cta_question: 0.05,
            cta_verb: 0.05,
            cta_specific: 0.05,

            min_words: 50,
            max_words: 1000,
            word_band_bonus: 0.1,
            word_band_penalty: 0.05,

            topic_overlap: 0.1,

            reference_short_ratio: 0.5,
            reference_short_penalty: 0.2,
        }
    }
}

/// Constants of the feedback-quality metric
#[derive(Clone, Debug)]
pub struct FeedbackWeights {
    pub score_weight: f32,
    pub text_weight: f32,
    /// Feedback must be longer than this to earn any credit
    pub min_feedback_chars: usize,
    pub detailed: f32,
    pub constructive: f32,
    pub actionable: f32,
}

impl Default for FeedbackWeights {
    fn default() -> Self {
        Self {
            score_weight: 0.7,
            text_weight: 0.3,
            min_feedback_chars: 50,
            detailed: 0.5,
            constructive: 0.8,
            actionable: 1.0,
        }
    }
}

#[derive(Clone, Debug, Default)]
pub struct ScoringWeights {
    pub style: StyleWeights,
    pub content: ContentWeights,
    pub feedback: FeedbackWeights,
}

/// Score plus the textual reasons behind it
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Evaluation {
    /// Overall score (0.0 - 1.0)
    pub score: f32,
    /// Human-readable notes, fed back into the search procedure's reflection
    pub feedback: String,
}

impl Evaluation {
    pub(crate) fn new(score: f32, feedback: impl Into<String>) -> Self {
        Self {
            score: if score.is_finite() {
                score.clamp(0.0, 1.0)
            } else {
                0.0
            },
            feedback: feedback.into(),
        }
    }
}

/// Which top-level metric to apply
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MetricKind {
    StyleQuality,
    ContentQuality,
    FeedbackQuality,
}

/// Owns the lexicon and weights every metric reads
#[derive(Clone, Debug, Default)]
pub struct Scorer {
    pub lexicon: Lexicon,
    pub weights: ScoringWeights,
}

impl Scorer {
    pub fn new(lexicon: Lexicon, weights: ScoringWeights) -> Self {
        Self { lexicon, weights }
    }

    pub fn evaluate(
        &self,
        kind: MetricKind,
        reference: Option<&Example>,
        prediction: &Prediction,
    ) -> Evaluation {
        match kind {
            MetricKind::StyleQuality => self.style_quality(reference, prediction),
            MetricKind::ContentQuality => self.content_quality(reference, prediction),
            MetricKind::FeedbackQuality => self.feedback_quality(reference, prediction),
        }
    }

    pub fn score(
        &self,
        kind: MetricKind,
        reference: Option<&Example>,
        prediction: &Prediction,
    ) -> f32 {
        self.evaluate(kind, reference, prediction).score
    }
}

/// A metric bound to a shared scorer, handed to the search procedure
#[derive(Clone, Debug)]
pub struct StageMetric {
    scorer: Arc<Scorer>,
    kind: MetricKind,
}

impl StageMetric {
    pub fn new(scorer: Arc<Scorer>, kind: MetricKind) -> Self {
        Self { scorer, kind }
    }

    pub fn kind(&self) -> MetricKind {
        self.kind
    }

    pub fn evaluate(&self, reference: Option<&Example>, prediction: &Prediction) -> Evaluation {
        self.scorer.evaluate(self.kind, reference, prediction)
    }

    pub fn score(&self, reference: Option<&Example>, prediction: &Prediction) -> f32 {
        self.evaluate(reference, prediction).score
    }
}
