//! Search procedures that turn a stage program into a better one
//!
//! [`ReflectiveSearch`] evolves the instruction by reflecting on low-scoring
//! execution traces and proposing rewrites, then bootstraps few-shot
//! demonstrations from the best program's own high-scoring outputs.

use super::dataset::Example;
use super::driver::is_rate_limited;
use crate::pipeline::{Demo, Fields, LanguageModel, Prediction, SignatureKind, StageProgram};
use crate::scoring::StageMetric;
use anyhow::Result;
use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

/// Traces scoring below this are handed to the reflection step
const FAILURE_THRESHOLD: f32 = 0.95;

/// Stop early once the average reaches this
const TARGET_SCORE: f32 = 0.99;

/// Minimum score for an output to be kept as a demonstration
const DEMO_THRESHOLD: f32 = 0.7;

const REFLECT_INSTRUCTION: &str = "You are an expert prompt engineer analyzing why a language-model \
    stage produced low-scoring outputs. Identify specific patterns in the failures and suggest \
    concrete fixes. Point to exact phrases that should be added or changed.";

const PROPOSE_INSTRUCTION: &str = "You are an expert prompt engineer. Given the reflection on \
    failures, output an improved version of the instruction that fixes the issues. Output only \
    the complete instruction text. Keep what works and add or modify rules to fix the failures.";

/// Effort knobs for one search run
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SearchKnobs {
    pub max_bootstrapped_demos: usize,
    pub max_candidates: usize,
    pub num_trials: usize,
}

impl Default for SearchKnobs {
    fn default() -> Self {
        Self {
            max_bootstrapped_demos: 4,
            max_candidates: 4,
            num_trials: 10,
        }
    }
}

/// Optimizes one stage program against a metric
#[async_trait]
pub trait SearchProcedure: Send + Sync {
    async fn compile(
        &self,
        stage: &StageProgram,
        metric: &StageMetric,
        trainset: &[Example],
        knobs: &SearchKnobs,
    ) -> Result<StageProgram>;
}

/// One example run through a candidate program
#[derive(Clone, Debug)]
struct ExecutionTrace {
    example_idx: usize,
    inputs: Fields,
    prediction: Option<Prediction>,
    score: f32,
    feedback: String,
}

impl ExecutionTrace {
    fn format_for_reflection(&self) -> String {
        let inputs = self
            .inputs
            .iter()
            .map(|(k, v)| format!("{}: {}", k, truncate(&value_text(v), 300)))
            .collect::<Vec<_>>()
            .join("\n");
        let output = match &self.prediction {
            Some(p) => truncate(&serde_json::to_string(p).unwrap_or_default(), 600),
            None => "(no output)".to_string(),
        };
        format!(
            "Example {}:\n{}\nOutput: {}\nScore: {:.2}\nFeedback: {}",
            self.example_idx, inputs, output, self.score, self.feedback
        )
    }
}

fn value_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn truncate(text: &str, max_chars: usize) -> String {
    match text.char_indices().nth(max_chars) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

#[derive(Clone, Debug)]
struct Candidate {
    program: StageProgram,
    traces: Vec<ExecutionTrace>,
}

impl Candidate {
    fn average_score(&self) -> f32 {
        if self.traces.is_empty() {
            return 0.0;
        }
        self.traces.iter().map(|t| t.score).sum::<f32>() / self.traces.len() as f32
    }
}

/// Reflect-and-propose instruction search with demo bootstrapping
pub struct ReflectiveSearch {
    lm: Arc<dyn LanguageModel>,
    reflection_lm: Arc<dyn LanguageModel>,
}

impl ReflectiveSearch {
    pub fn new(lm: Arc<dyn LanguageModel>, reflection_lm: Arc<dyn LanguageModel>) -> Self {
        Self { lm, reflection_lm }
    }

    /// Run every usable example through `program`
    ///
    /// Rate-limit failures abort the evaluation; any other failure scores 0.
    async fn evaluate(
        &self,
        program: &StageProgram,
        metric: &StageMetric,
        trainset: &[Example],
    ) -> Result<Candidate> {
        let mut traces = Vec::with_capacity(trainset.len());

        for (idx, example) in trainset.iter().enumerate() {
            let Some(inputs) = program.inputs_for(example) else {
                tracing::debug!("Example {} lacks inputs for {}, skipping", idx, program.kind);
                continue;
            };

            match program.forward(self.lm.as_ref(), &inputs).await {
                Ok(prediction) => {
                    let evaluation = metric.evaluate(Some(example), &prediction);
                    traces.push(ExecutionTrace {
                        example_idx: idx,
                        inputs,
                        prediction: Some(prediction),
                        score: evaluation.score,
                        feedback: evaluation.feedback,
                    });
                }
                Err(e) if is_rate_limited(&e) => return Err(e),
                Err(e) => {
                    tracing::warn!("Example {} failed: {:#}", idx, e);
                    traces.push(ExecutionTrace {
                        example_idx: idx,
                        inputs,
                        prediction: None,
                        score: 0.0,
                        feedback: format!("Error: {:#}", e),
                    });
                }
            }
        }

        Ok(Candidate {
            program: program.clone(),
            traces,
        })
    }

    async fn reflect(&self, best: &Candidate) -> Result<Option<String>> {
        let failed: Vec<_> = best
            .traces
            .iter()
            .filter(|t| t.score < FAILURE_THRESHOLD)
            .collect();
        if failed.is_empty() {
            return Ok(None);
        }

        let traces_text = failed
            .iter()
            .map(|t| t.format_for_reflection())
            .collect::<Vec<_>>()
            .join("\n\n---\n\n");

        let mut inputs = Fields::new();
        inputs.insert(
            "current_instruction".into(),
            Value::String(best.program.instruction.clone()),
        );
        inputs.insert("failed_traces".into(), Value::String(traces_text));
        inputs.insert(
            "task_description".into(),
            Value::String(best.program.kind.task_description().to_string()),
        );

        let outputs = self
            .reflection_lm
            .invoke(SignatureKind::ReflectOnTraces, REFLECT_INSTRUCTION, &inputs)
            .await?;
        let reflection = outputs
            .get("reflection")
            .map(value_text)
            .unwrap_or_default();

        Ok((!reflection.trim().is_empty()).then_some(reflection))
    }

    async fn propose(&self, current: &str, reflection: &str, max_candidates: usize) -> Result<Vec<String>> {
        let mut inputs = Fields::new();
        inputs.insert("current_instruction".into(), Value::String(current.to_string()));
        inputs.insert("reflection".into(), Value::String(reflection.to_string()));

        let mut proposals: Vec<String> = Vec::new();
        for _ in 0..max_candidates {
            let outputs = match self
                .reflection_lm
                .invoke(SignatureKind::ProposeInstruction, PROPOSE_INSTRUCTION, &inputs)
                .await
            {
                Ok(outputs) => outputs,
                Err(e) if is_rate_limited(&e) => return Err(e),
                Err(e) => {
                    tracing::warn!("Proposal failed: {:#}", e);
                    continue;
                }
            };

            let instruction = outputs
                .get("improved_instruction")
                .map(value_text)
                .unwrap_or_default()
                .trim()
                .to_string();
            if !instruction.is_empty() && instruction != current && !proposals.contains(&instruction) {
                proposals.push(instruction);
            }
        }

        Ok(proposals)
    }

    /// Keep the best-scoring outputs of `best` as demonstrations
    fn bootstrap_demos(best: &Candidate, max_demos: usize) -> Vec<Demo> {
        let mut ranked: Vec<&ExecutionTrace> = best
            .traces
            .iter()
            .filter(|t| t.prediction.is_some() && t.score >= DEMO_THRESHOLD)
            .collect();
        ranked.sort_by(|a, b| b.score.total_cmp(&a.score));

        ranked
            .into_iter()
            .take(max_demos)
            .filter_map(|t| {
                let prediction = t.prediction.as_ref()?;
                Some(best.program.demo_from(t.inputs.clone(), prediction))
            })
            .collect()
    }
}

#[async_trait]
impl SearchProcedure for ReflectiveSearch {
    async fn compile(
        &self,
        stage: &StageProgram,
        metric: &StageMetric,
        trainset: &[Example],
        knobs: &SearchKnobs,
    ) -> Result<StageProgram> {
        let mut best = self.evaluate(stage, metric, trainset).await?;
        let baseline = best.average_score();
        tracing::info!(
            "{} baseline {:?} score: {:.3}",
            stage.kind,
            metric.kind(),
            baseline
        );

        for trial in 1..=knobs.num_trials {
            if best.average_score() >= TARGET_SCORE {
                tracing::info!("Near-perfect score, stopping after {} trials", trial - 1);
                break;
            }

            let reflection = match self.reflect(&best).await {
                Ok(Some(reflection)) => reflection,
                Ok(None) => {
                    tracing::info!("No failures to address, stopping");
                    break;
                }
                Err(e) if is_rate_limited(&e) => return Err(e),
                Err(e) => {
                    tracing::warn!("Reflection failed in trial {}: {:#}", trial, e);
                    continue;
                }
            };
            tracing::debug!("Trial {} reflection: {}", trial, truncate(&reflection, 500));

            let proposals = self
                .propose(&best.program.instruction, &reflection, knobs.max_candidates)
                .await?;

            for instruction in proposals {
                let program = best.program.with_instruction(instruction);
                let candidate = self.evaluate(&program, metric, trainset).await?;
                let score = candidate.average_score();

                if score > best.average_score() {
                    tracing::info!(
                        "Trial {}: improvement {:.3} -> {:.3}",
                        trial,
                        best.average_score(),
                        score
                    );
                    best = candidate;
                } else {
                    tracing::debug!("Trial {}: candidate scored {:.3}, keeping best", trial, score);
                }
            }
        }

        let mut program = best.program.clone();
        program.demos = Self::bootstrap_demos(&best, knobs.max_bootstrapped_demos);

        tracing::info!(
            "{} search done: {:.3} -> {:.3} with {} demos",
            stage.kind,
            baseline,
            best.average_score(),
            program.demos.len()
        );
        Ok(program)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::StageKind;
    use crate::scoring::{MetricKind, Scorer};
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const IMPROVED: &str = "Return a detailed JSON object.";

    /// Analyzer output quality depends on whether the instruction was improved
    struct InstructionSensitiveModel {
        proposals: AtomicUsize,
    }

    #[async_trait]
    impl LanguageModel for InstructionSensitiveModel {
        async fn invoke(
            &self,
            signature: SignatureKind,
            instruction: &str,
            _inputs: &Fields,
        ) -> Result<Fields> {
            let value = match signature {
                SignatureKind::StyleAnalysis if instruction.starts_with(IMPROVED) => json!({
                    "style_characteristics": {
                        "tone": "Confident, optimistic and conversational, with first-person storytelling.",
                        "structure": "One-line hook, short personal story, three lessons, closing question.",
                        "formatting": "Single-sentence paragraphs separated by blank lines, bullet lists.",
                        "hooks_and_cta": "Opens with a bold statistic and ends by asking readers to share.",
                        "emoji_usage": "Two to four emojis at the start of key lines, never mid-sentence."
                    }
                }),
                SignatureKind::StyleAnalysis => json!({"style_characteristics": "Short."}),
                SignatureKind::ReflectOnTraces => {
                    json!({"reflection": "Outputs are not JSON; ask for every dimension."})
                }
                SignatureKind::ProposeInstruction => {
                    self.proposals.fetch_add(1, Ordering::SeqCst);
                    json!({"improved_instruction": IMPROVED})
                }
                other => anyhow::bail!("unexpected signature {:?}", other),
            };
            match value {
                Value::Object(map) => Ok(map),
                _ => unreachable!(),
            }
        }
    }

    struct RateLimitedModel;

    #[async_trait]
    impl LanguageModel for RateLimitedModel {
        async fn invoke(&self, _: SignatureKind, _: &str, _: &Fields) -> Result<Fields> {
            anyhow::bail!("HTTP 429 Too Many Requests")
        }
    }

    fn trainset(n: usize) -> Vec<Example> {
        (0..n)
            .map(|i| Example {
                name: Some(format!("ex{}", i)),
                sample: format!("Sample post {}", i),
                content_to_transform: format!("Content {}", i),
                expected_output: None,
                style_characteristics: None,
            })
            .collect()
    }

    fn style_metric() -> StageMetric {
        StageMetric::new(Arc::new(Scorer::default()), MetricKind::StyleQuality)
    }

    #[tokio::test]
    async fn test_reflective_search_adopts_better_instruction() {
        let lm = Arc::new(InstructionSensitiveModel {
            proposals: AtomicUsize::new(0),
        });
        let search = ReflectiveSearch::new(lm.clone(), lm.clone());
        let knobs = SearchKnobs {
            max_bootstrapped_demos: 2,
            max_candidates: 3,
            num_trials: 2,
        };

        let stage = StageProgram::new(StageKind::StyleAnalyzer);
        let optimized = search
            .compile(&stage, &style_metric(), &trainset(3), &knobs)
            .await
            .unwrap();

        assert_eq!(optimized.instruction, IMPROVED);
        assert_eq!(optimized.demos.len(), 2);
        assert!(optimized.demos[0].outputs.contains_key("style_characteristics"));
        // One trial proposes, the second finds no failures and stops
        assert_eq!(lm.proposals.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_rate_limit_propagates() {
        let lm: Arc<dyn LanguageModel> = Arc::new(RateLimitedModel);
        let search = ReflectiveSearch::new(lm.clone(), lm);
        let stage = StageProgram::new(StageKind::StyleAnalyzer);
        let err = search
            .compile(&stage, &style_metric(), &trainset(2), &SearchKnobs::default())
            .await
            .unwrap_err();
        assert!(is_rate_limited(&err));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("héllo", 2), "hé...");
        assert_eq!(truncate("hi", 5), "hi");
    }
}
