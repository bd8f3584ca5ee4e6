//! Per-dimension scorers for transformed content
//!
//! Each scorer adds up independent points and clamps the sum to its cap.
//! Notes on what was missing are appended to `feedback`.

use super::features::{
    bullet_line_count, emoji_count, emoji_distribution, has_call_to_action, has_emoji,
    has_power_words, has_statistic, hashtags, paragraphs, question_line_count,
    sentence_length_variety, word_count,
};
use super::ContentWeights;
use crate::lexicon::Lexicon;

/// Opening line: question, statistic, power word, emoji, brevity
pub fn hook_score(
    first_line: &str,
    lexicon: &Lexicon,
    weights: &ContentWeights,
    feedback: &mut String,
) -> f32 {
    let mut points = 0.0;

    if first_line.contains('?') {
        points += weights.hook_question;
    }
    if has_statistic(first_line, lexicon) {
        points += weights.hook_statistic;
    }
    if has_power_words(first_line, lexicon) {
        points += weights.hook_power_word;
    }
    if has_emoji(first_line, lexicon) {
        points += weights.hook_emoji;
    }
    let words = word_count(first_line);
    if words > 0 && words <= weights.hook_max_words {
        points += weights.hook_brevity;
    }

    if points < weights.hook_cap * 0.5 {
        feedback.push_str(&format!(
            "Weak hook\n  First line: \"{}\"\n  Suggestion: Open with a question, a number or a bold claim\n",
            first_line.trim()
        ));
    }

    f32::min(weights.hook_cap, points)
}

/// Split paragraphs into an early and a middle third
///
/// With fewer than three paragraphs both regions cover the whole text.
fn positional_thirds<'a, 'b>(paras: &'b [&'a str]) -> (&'b [&'a str], &'b [&'a str]) {
    let n = paras.len();
    if n < 3 {
        return (paras, paras);
    }
    let third = n.div_ceil(3);
    (&paras[..third], &paras[third..(2 * third).min(n)])
}

/// Problem early, solution in the middle, evidence anywhere
pub fn structure_score(
    article: &str,
    lexicon: &Lexicon,
    weights: &ContentWeights,
    feedback: &mut String,
) -> f32 {
    let paras = paragraphs(article);
    let (early, middle) = positional_thirds(&paras);
    let early_text = early.join(" ").to_lowercase();
    let middle_text = middle.join(" ").to_lowercase();

    let mut points = 0.0;
    let mut missing = Vec::new();

    if Lexicon::mentions_any(&early_text, &lexicon.problem_terms) {
        points += weights.structure_problem;
    } else {
        missing.push("problem statement up front");
    }
    if Lexicon::mentions_any(&middle_text, &lexicon.solution_terms) {
        points += weights.structure_solution;
    } else {
        missing.push("solution in the middle");
    }
    if Lexicon::mentions_any(&article.to_lowercase(), &lexicon.evidence_terms) {
        points += weights.structure_evidence;
    } else {
        missing.push("supporting evidence");
    }

    if !missing.is_empty() {
        feedback.push_str(&format!(
            "Structure gaps\n  Missing: {}\n  Suggestion: Follow a problem -> solution -> evidence arc\n",
            missing.join(", ")
        ));
    }

    f32::min(weights.structure_cap, points)
}

/// Bullets, paragraph length and breaks, sentence variety
pub fn formatting_score(
    article: &str,
    lexicon: &Lexicon,
    weights: &ContentWeights,
    feedback: &mut String,
) -> f32 {
    let paras = paragraphs(article);
    let mut points = 0.0;

    let bullets = bullet_line_count(article, lexicon);
    if bullets >= weights.min_bullets {
        points += weights.bullets_many;
    } else if bullets > 0 {
        points += weights.bullets_some;
    }

    let longest = paras.iter().map(|p| p.chars().count()).max().unwrap_or(0);
    if !paras.is_empty() && longest < weights.max_paragraph_chars {
        points += weights.short_paragraphs;
    } else if longest >= weights.max_paragraph_chars {
        feedback.push_str(&format!(
            "Dense paragraphs\n  Longest paragraph: {} chars\n  Suggestion: Keep paragraphs under {} chars\n",
            longest, weights.max_paragraph_chars
        ));
    }

    if paras.len() >= weights.min_paragraphs {
        points += weights.paragraph_breaks;
    }

    points += sentence_length_variety(article) * weights.sentence_variety;

    f32::min(weights.formatting_cap, points)
}

/// Emoji count inside the sweet spot, weighted by how spread out they are
pub fn emoji_score(
    article: &str,
    lexicon: &Lexicon,
    weights: &ContentWeights,
    feedback: &mut String,
) -> f32 {
    let count = emoji_count(article, lexicon);
    if (weights.emoji_min..=weights.emoji_max).contains(&count) {
        return weights.emoji_in_range
            + emoji_distribution(article, lexicon) * weights.emoji_distribution;
    }

    feedback.push_str(&format!(
        "Emoji usage\n  Got: {} emoji\n  Expected: between {} and {}\n",
        count, weights.emoji_min, weights.emoji_max
    ));
    if count > 0 {
        weights.emoji_out_of_range
    } else {
        0.0
    }
}

/// Hashtag count, relevance to the source topics, placement at the end
pub fn hashtag_score(
    article: &str,
    topics: &[String],
    weights: &ContentWeights,
    feedback: &mut String,
) -> f32 {
    let tags = hashtags(article);
    if !(weights.hashtag_min..=weights.hashtag_max).contains(&tags.len()) {
        feedback.push_str(&format!(
            "Hashtags\n  Got: {}\n  Expected: between {} and {}\n",
            tags.len(),
            weights.hashtag_min,
            weights.hashtag_max
        ));
        return 0.0;
    }

    let mut points = weights.hashtag_count;

    if !topics.is_empty() {
        let tag_text = tags
            .iter()
            .map(|t| t.trim_start_matches('#').to_lowercase())
            .collect::<Vec<_>>()
            .join(" ");
        let matched = topics.iter().filter(|t| tag_text.contains(t.as_str())).count();
        points += (matched as f32 / topics.len() as f32).min(1.0) * weights.hashtag_relevance;
    }

    let paras = paragraphs(article);
    if let Some(last) = paras.last() {
        if hashtags(last).len() == tags.len() {
            points += weights.hashtag_position;
        }
    }

    f32::min(weights.hashtag_cap, points)
}

/// Closing paragraph: question, engagement verb, specific prompt
pub fn cta_score(
    last_paragraph: &str,
    lexicon: &Lexicon,
    weights: &ContentWeights,
    feedback: &mut String,
) -> f32 {
    let lower = last_paragraph.to_lowercase();
    let mut points = 0.0;

    if question_line_count(last_paragraph) > 0 {
        points += weights.cta_question;
    }
    if has_call_to_action(last_paragraph, lexicon) {
        points += weights.cta_verb;
        if Lexicon::mentions_any(&lower, &lexicon.specific_cta_phrases) {
            points += weights.cta_specific;
        }
    }

    if points == 0.0 {
        feedback.push_str(
            "Missing call to action\n  Suggestion: End with a question or invite readers to comment or share\n",
        );
    }

    f32::min(weights.cta_cap, points)
}
