//! Per-stage optimization with one reduced-effort retry on rate limiting
//!
//! ```text
//! unoptimized --(< 2 examples)--> skipped
//!      |
//!   full attempt --ok--> optimized
//!      | rate limited            \--other error--> fell back
//!   cool-down, reduced attempt --ok--> optimized after retry
//!      \--error--> fell back
//! ```

use super::dataset::{Example, PreparedDatasets};
use super::prompts::{prompts_for, write_prompts};
use super::search::{SearchKnobs, SearchProcedure};
use crate::pipeline::{LanguageModel, StageKind, StageProgram};
use crate::scoring::{MetricKind, Scorer, StageMetric};
use anyhow::Result;
use postcraft_tools::OptimizedPrompts;
use regex::Regex;
use std::path::PathBuf;
use std::sync::{Arc, LazyLock};
use std::time::Duration;

/// Substrings of an error message that mark it as rate limiting
const RATE_LIMIT_MARKERS: &[&str] = &[
    "rate limit",
    "rate-limit",
    "rate_limit",
    "ratelimit",
    "too many requests",
];

/// HTTP 429 as a standalone number, not part of a longer one
static RE_STATUS_429: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"(^|[^0-9.])429(\.?[^0-9]|\.?$)").expect("valid regex"));

/// Minimum training examples worth searching over
const MIN_TRAIN_EXAMPLES: usize = 2;

/// Whether an error (or anything in its chain) signals rate limiting
pub fn is_rate_limited(err: &anyhow::Error) -> bool {
    let message = format!("{:#}", err).to_lowercase();
    RATE_LIMIT_MARKERS.iter().any(|m| message.contains(m)) || RE_STATUS_429.is_match(&message)
}

#[derive(Clone, Debug)]
pub struct DriverConfig {
    pub knobs: SearchKnobs,
    /// Trial budget of the retry after rate limiting
    pub reduced_trials: usize,
    pub cooldown: Duration,
    pub output_dir: PathBuf,
}

impl Default for DriverConfig {
    fn default() -> Self {
        Self {
            knobs: SearchKnobs::default(),
            reduced_trials: 3,
            cooldown: Duration::from_secs(60),
            output_dir: PathBuf::from("."),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Attempt {
    Full,
    Reduced,
}

impl Attempt {
    fn knobs(&self, config: &DriverConfig) -> SearchKnobs {
        match self {
            Self::Full => config.knobs,
            Self::Reduced => SearchKnobs {
                num_trials: config.reduced_trials,
                ..config.knobs
            },
        }
    }

    fn outcome(&self) -> StageOutcome {
        match self {
            Self::Full => StageOutcome::Optimized,
            Self::Reduced => StageOutcome::OptimizedAfterRetry,
        }
    }
}

/// How a stage left the driver
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum StageOutcome {
    /// Too few examples; the default program was kept
    Skipped,
    Optimized,
    OptimizedAfterRetry,
    /// Search failed; the default program was kept
    FellBack,
}

impl std::fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Skipped => write!(f, "skipped"),
            Self::Optimized => write!(f, "optimized"),
            Self::OptimizedAfterRetry => write!(f, "optimized after retry"),
            Self::FellBack => write!(f, "fell back to default"),
        }
    }
}

#[derive(Clone, Debug)]
pub struct OptimizedStage {
    pub program: StageProgram,
    pub outcome: StageOutcome,
    /// Where the program was persisted, if it was
    pub artifact: Option<PathBuf>,
}

impl OptimizedStage {
    fn unoptimized(kind: StageKind, outcome: StageOutcome) -> Self {
        Self {
            program: StageProgram::new(kind),
            outcome,
            artifact: None,
        }
    }
}

/// Result of a full optimization run
#[derive(Clone, Debug)]
pub struct OptimizationReport {
    pub analyzer: OptimizedStage,
    pub transformer: OptimizedStage,
    pub prompts: OptimizedPrompts,
    pub prompts_path: PathBuf,
}

pub struct OptimizationDriver {
    search: Arc<dyn SearchProcedure>,
    scorer: Arc<Scorer>,
    config: DriverConfig,
}

impl OptimizationDriver {
    pub fn new(search: Arc<dyn SearchProcedure>, scorer: Arc<Scorer>, config: DriverConfig) -> Self {
        Self {
            search,
            scorer,
            config,
        }
    }

    /// Optimize one stage; never fails, degrading to the default program
    pub async fn optimize_stage(
        &self,
        kind: StageKind,
        metric_kind: MetricKind,
        trainset: &[Example],
    ) -> OptimizedStage {
        if trainset.len() < MIN_TRAIN_EXAMPLES {
            tracing::info!(
                "Only {} training example(s) for {}, skipping optimization",
                trainset.len(),
                kind
            );
            return OptimizedStage::unoptimized(kind, StageOutcome::Skipped);
        }

        let stage = StageProgram::new(kind);
        let metric = StageMetric::new(self.scorer.clone(), metric_kind);

        let (program, attempt) = match self
            .attempt(Attempt::Full, &stage, &metric, trainset)
            .await
        {
            Ok(program) => (program, Attempt::Full),
            Err(e) if is_rate_limited(&e) => {
                tracing::warn!(
                    "{} optimization rate limited ({:#}), retrying in {:?} with {} trials",
                    kind,
                    e,
                    self.config.cooldown,
                    self.config.reduced_trials
                );
                tokio::time::sleep(self.config.cooldown).await;

                match self
                    .attempt(Attempt::Reduced, &stage, &metric, trainset)
                    .await
                {
                    Ok(program) => (program, Attempt::Reduced),
                    Err(e) => {
                        tracing::error!("{} optimization failed after retry: {:#}", kind, e);
                        return OptimizedStage::unoptimized(kind, StageOutcome::FellBack);
                    }
                }
            }
            Err(e) => {
                tracing::error!("{} optimization failed: {:#}", kind, e);
                return OptimizedStage::unoptimized(kind, StageOutcome::FellBack);
            }
        };
        let outcome = attempt.outcome();

        let path = self.config.output_dir.join(kind.artifact_file());
        let artifact = match program.save(&path).await {
            Ok(()) => {
                tracing::info!("{} {}, saved to {}", kind, outcome, path.display());
                Some(path)
            }
            Err(e) => {
                tracing::error!("Failed to persist optimized {}: {:#}", kind, e);
                None
            }
        };

        OptimizedStage {
            program,
            outcome,
            artifact,
        }
    }

    async fn attempt(
        &self,
        attempt: Attempt,
        stage: &StageProgram,
        metric: &StageMetric,
        trainset: &[Example],
    ) -> Result<StageProgram> {
        let knobs = attempt.knobs(&self.config);
        tracing::info!(
            "Optimizing {} on {} examples ({:?} attempt: {} trials, {} candidates, {} demos)",
            stage.kind,
            trainset.len(),
            attempt,
            knobs.num_trials,
            knobs.max_candidates,
            knobs.max_bootstrapped_demos
        );
        self.search.compile(stage, metric, trainset, &knobs).await
    }

    pub async fn optimize_analyzer(&self, trainset: &[Example]) -> OptimizedStage {
        self.optimize_stage(StageKind::StyleAnalyzer, MetricKind::StyleQuality, trainset)
            .await
    }

    /// Attach the analyzer's characterization of each sample
    ///
    /// Examples the analyzer fails on are dropped.
    pub async fn transformer_trainset(
        &self,
        lm: &dyn LanguageModel,
        analyzer: &StageProgram,
        trainset: &[Example],
    ) -> Vec<Example> {
        let mut examples = Vec::with_capacity(trainset.len());
        for (idx, example) in trainset.iter().enumerate() {
            let Some(inputs) = analyzer.inputs_for(example) else {
                continue;
            };
            match analyzer.forward(lm, &inputs).await {
                Ok(prediction) => {
                    let mut example = example.clone();
                    example.style_characteristics = prediction.style_characteristics;
                    examples.push(example);
                }
                Err(e) => {
                    tracing::warn!("Style analysis failed for example {}: {:#}", idx, e);
                }
            }
        }
        examples
    }

    pub async fn optimize_transformer(
        &self,
        lm: &dyn LanguageModel,
        analyzer: &StageProgram,
        trainset: &[Example],
    ) -> OptimizedStage {
        let examples = self.transformer_trainset(lm, analyzer, trainset).await;
        self.optimize_stage(
            StageKind::ContentTransformer,
            MetricKind::ContentQuality,
            &examples,
        )
        .await
    }

    /// Analyzer, then transformer on the analyzer's output, then prompt extraction
    pub async fn run(
        &self,
        lm: &dyn LanguageModel,
        datasets: &PreparedDatasets,
    ) -> Result<OptimizationReport> {
        let analyzer = self.optimize_analyzer(&datasets.analyzer_train).await;
        let transformer = self
            .optimize_transformer(lm, &analyzer.program, &datasets.train)
            .await;

        let prompts = prompts_for(&analyzer, &transformer).await;
        let prompts_path = write_prompts(&self.config.output_dir, &prompts).await?;

        Ok(OptimizationReport {
            analyzer,
            transformer,
            prompts,
            prompts_path,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::model::field_text;
    use crate::pipeline::{Fields, SignatureKind, StyleCharacteristics};
    use async_trait::async_trait;
    use serde_json::{json, Value};
    use std::collections::VecDeque;
    use std::sync::Mutex;
    use tokio::time::Instant;

    /// Returns queued results and records when and how it was called
    struct ScriptedSearch {
        results: Mutex<VecDeque<Result<StageProgram>>>,
        calls: Mutex<Vec<(SearchKnobs, Instant)>>,
        trainsets: Mutex<Vec<Vec<Example>>>,
    }

    impl ScriptedSearch {
        fn new(results: Vec<Result<StageProgram>>) -> Self {
            Self {
                results: Mutex::new(results.into()),
                calls: Mutex::new(Vec::new()),
                trainsets: Mutex::new(Vec::new()),
            }
        }

        fn calls(&self) -> Vec<(SearchKnobs, Instant)> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SearchProcedure for ScriptedSearch {
        async fn compile(
            &self,
            _stage: &StageProgram,
            _metric: &StageMetric,
            trainset: &[Example],
            knobs: &SearchKnobs,
        ) -> Result<StageProgram> {
            self.calls.lock().unwrap().push((*knobs, Instant::now()));
            self.trainsets.lock().unwrap().push(trainset.to_vec());
            self.results
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Err(anyhow::anyhow!("no scripted result")))
        }
    }

    fn examples(n: usize) -> Vec<Example> {
        (0..n)
            .map(|i| Example {
                name: None,
                sample: format!("Sample {}", i),
                content_to_transform: format!("Content {}", i),
                expected_output: None,
                style_characteristics: None,
            })
            .collect()
    }

    fn driver(search: Arc<ScriptedSearch>, dir: &std::path::Path) -> OptimizationDriver {
        OptimizationDriver::new(
            search,
            Arc::new(Scorer::default()),
            DriverConfig {
                knobs: SearchKnobs {
                    max_bootstrapped_demos: 4,
                    max_candidates: 4,
                    num_trials: 10,
                },
                reduced_trials: 3,
                cooldown: Duration::from_secs(60),
                output_dir: dir.to_path_buf(),
            },
        )
    }

    fn optimized(instruction: &str) -> StageProgram {
        StageProgram::new(StageKind::StyleAnalyzer).with_instruction(instruction)
    }

    /// Describes each sample's tone; fails on samples mentioning "broken"
    struct ToneModel {
        instructions: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl LanguageModel for ToneModel {
        async fn invoke(
            &self,
            signature: SignatureKind,
            instruction: &str,
            inputs: &Fields,
        ) -> Result<Fields> {
            self.instructions.lock().unwrap().push(instruction.to_string());
            let sample = field_text(inputs, "sample_post");
            if signature != SignatureKind::StyleAnalysis || sample.contains("broken") {
                anyhow::bail!("analysis timed out");
            }
            let response = json!({ "style_characteristics": { "tone": format!("tone of {}", sample) } });
            Ok(response.as_object().cloned().unwrap())
        }
    }

    #[test]
    fn test_rate_limit_detection() {
        assert!(is_rate_limited(&anyhow::anyhow!("Rate limit exceeded")));
        assert!(is_rate_limited(&anyhow::anyhow!("status 429")));
        assert!(is_rate_limited(
            &anyhow::anyhow!("Too Many Requests").context("style analyzer call failed")
        ));
        assert!(!is_rate_limited(&anyhow::anyhow!("connection refused")));
    }

    #[test]
    fn test_429_inside_other_numbers_is_not_rate_limiting() {
        assert!(!is_rate_limited(&anyhow::anyhow!(
            "parse error: response of 1429 chars has no linkedin_article field"
        )));
        assert!(!is_rate_limited(&anyhow::anyhow!("request id 4290 failed")));
        assert!(!is_rate_limited(&anyhow::anyhow!("score 0.429 out of range")));
        assert!(is_rate_limited(&anyhow::anyhow!("HTTP status: 429")));
        assert!(is_rate_limited(&anyhow::anyhow!("429")));
        assert!(is_rate_limited(&anyhow::anyhow!("provider returned 429.")));
    }

    #[tokio::test(start_paused = true)]
    async fn test_large_number_error_falls_back_without_cooldown() {
        let dir = tempfile::tempdir().unwrap();
        let search = Arc::new(ScriptedSearch::new(vec![Err(anyhow::anyhow!(
            "response of 1429 chars could not be parsed"
        ))]));
        let start = Instant::now();
        let result = driver(search.clone(), dir.path())
            .optimize_analyzer(&examples(3))
            .await;

        assert_eq!(search.calls().len(), 1);
        assert_eq!(result.outcome, StageOutcome::FellBack);
        assert_eq!(Instant::now() - start, Duration::ZERO);
    }

    #[tokio::test]
    async fn test_single_example_skips_search() {
        let dir = tempfile::tempdir().unwrap();
        let search = Arc::new(ScriptedSearch::new(vec![]));
        let result = driver(search.clone(), dir.path())
            .optimize_analyzer(&examples(1))
            .await;

        assert!(search.calls().is_empty());
        assert_eq!(result.outcome, StageOutcome::Skipped);
        assert_eq!(result.program, StageProgram::new(StageKind::StyleAnalyzer));
        assert!(result.artifact.is_none());
    }

    #[tokio::test]
    async fn test_success_persists_artifact() {
        let dir = tempfile::tempdir().unwrap();
        let search = Arc::new(ScriptedSearch::new(vec![Ok(optimized("Tuned."))]));
        let result = driver(search.clone(), dir.path())
            .optimize_analyzer(&examples(3))
            .await;

        assert_eq!(result.outcome, StageOutcome::Optimized);
        assert_eq!(result.program.instruction, "Tuned.");
        let path = result.artifact.unwrap();
        assert_eq!(path, dir.path().join("optimized_style_analyzer.json"));
        assert_eq!(StageProgram::load(&path).await.unwrap(), result.program);
    }

    #[tokio::test(start_paused = true)]
    async fn test_rate_limit_then_success() {
        let dir = tempfile::tempdir().unwrap();
        let search = Arc::new(ScriptedSearch::new(vec![
            Err(anyhow::anyhow!("429 Too Many Requests")),
            Ok(optimized("Retried.")),
        ]));
        let result = driver(search.clone(), dir.path())
            .optimize_analyzer(&examples(3))
            .await;

        assert_eq!(result.outcome, StageOutcome::OptimizedAfterRetry);
        assert_eq!(result.program.instruction, "Retried.");

        let calls = search.calls();
        assert_eq!(calls.len(), 2);
        assert_eq!(calls[0].0.num_trials, 10);
        assert_eq!(calls[1].0.num_trials, 3);
        assert_eq!(calls[1].0.max_candidates, 4);
        assert_eq!(calls[1].1 - calls[0].1, Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn test_retry_failure_falls_back() {
        let dir = tempfile::tempdir().unwrap();
        let search = Arc::new(ScriptedSearch::new(vec![
            Err(anyhow::anyhow!("rate limit")),
            Err(anyhow::anyhow!("rate limit again")),
        ]));
        let result = driver(search.clone(), dir.path())
            .optimize_analyzer(&examples(3))
            .await;

        assert_eq!(search.calls().len(), 2);
        assert_eq!(result.outcome, StageOutcome::FellBack);
        assert_eq!(result.program, StageProgram::new(StageKind::StyleAnalyzer));
        assert!(!dir.path().join("optimized_style_analyzer.json").exists());
    }

    #[tokio::test]
    async fn test_other_error_falls_back_without_retry() {
        let dir = tempfile::tempdir().unwrap();
        let search = Arc::new(ScriptedSearch::new(vec![Err(anyhow::anyhow!(
            "invalid response format"
        ))]));
        let result = driver(search.clone(), dir.path())
            .optimize_analyzer(&examples(3))
            .await;

        assert_eq!(search.calls().len(), 1);
        assert_eq!(result.outcome, StageOutcome::FellBack);
    }

    #[tokio::test]
    async fn test_run_feeds_analyzer_output_to_transformer() {
        let dir = tempfile::tempdir().unwrap();
        let search = Arc::new(ScriptedSearch::new(vec![
            Ok(optimized("Tuned analyzer.")),
            Ok(StageProgram::new(StageKind::ContentTransformer).with_instruction("Tuned transformer.")),
        ]));
        let lm = ToneModel {
            instructions: Mutex::new(Vec::new()),
        };

        let mut train = examples(3);
        train[1].sample = "A broken sample".to_string();
        let datasets = PreparedDatasets {
            analyzer_train: examples(3),
            train,
            test: examples(1),
        };

        let report = driver(search.clone(), dir.path())
            .run(&lm, &datasets)
            .await
            .unwrap();

        assert_eq!(report.analyzer.outcome, StageOutcome::Optimized);
        assert_eq!(report.transformer.outcome, StageOutcome::Optimized);

        // The transformer was trained on analyzed examples only
        let trainsets = search.trainsets.lock().unwrap().clone();
        assert_eq!(trainsets.len(), 2);
        assert_eq!(trainsets[0].len(), 3);
        let transformer_set = &trainsets[1];
        assert_eq!(transformer_set.len(), 2);
        assert!(transformer_set.iter().all(|e| !e.sample.contains("broken")));
        for example in transformer_set {
            match example.style_characteristics.as_ref().unwrap() {
                StyleCharacteristics::Structured(map) => {
                    assert_eq!(map["tone"], format!("tone of {}", example.sample));
                }
                other => panic!("expected structured style, got {:?}", other),
            }
        }

        // Analysis ran with the optimized analyzer's instruction
        let instructions = lm.instructions.lock().unwrap().clone();
        assert_eq!(instructions.len(), 3);
        assert!(instructions.iter().all(|i| i.contains("Tuned analyzer.")));

        assert_eq!(report.prompts_path, dir.path().join("optimized_prompts.json"));
        let written: Value =
            serde_json::from_str(&std::fs::read_to_string(&report.prompts_path).unwrap()).unwrap();
        assert!(written["style_analyzer_prompt"]
            .as_str()
            .unwrap()
            .contains("Tuned analyzer."));
        assert!(written["style_applicator_prompt"]
            .as_str()
            .unwrap()
            .contains("Tuned transformer."));
    }

    #[tokio::test]
    async fn test_transformer_skipped_when_analysis_leaves_one_example() {
        let dir = tempfile::tempdir().unwrap();
        let search = Arc::new(ScriptedSearch::new(vec![]));
        let lm = ToneModel {
            instructions: Mutex::new(Vec::new()),
        };
        let mut train = examples(2);
        train[0].sample = "broken".to_string();

        let analyzer = StageProgram::new(StageKind::StyleAnalyzer);
        let result = driver(search.clone(), dir.path())
            .optimize_transformer(&lm, &analyzer, &train)
            .await;

        assert!(search.calls().is_empty());
        assert_eq!(result.outcome, StageOutcome::Skipped);
        assert_eq!(result.program, StageProgram::new(StageKind::ContentTransformer));
    }
}
