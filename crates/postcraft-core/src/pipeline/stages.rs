//! Pipeline stages and their persisted form
//!
//! A [`StageProgram`] is an instruction plus few-shot demonstrations for one
//! LM signature. The search procedure rewrites both; everything else about a
//! stage (signature, normalization of its output) is fixed by [`StageKind`].

use super::model::{field_text, Fields, LanguageModel, SignatureKind};
use super::values::{Prediction, RawScore, StyleCharacteristics};
use crate::optimizer::Example;
use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::Path;
use uuid::Uuid;

/// Artifact format written by [`StageProgram::save`]
pub const ARTIFACT_VERSION: u32 = 1;

pub const DEFAULT_ANALYZER_PROMPT: &str = r#"You analyze professional social-network posts and describe their writing style so another writer can reproduce it.

Return a JSON object with these keys:
- tone: voice, formality and energy of the writing
- structure: how the post opens, develops and closes
- formatting: paragraph length, line breaks, bullet points
- hooks_and_cta: how the first line grabs attention and how the post invites engagement
- emoji_usage: which emoji appear, how often and where

Describe what the author actually does. Be concrete and quote short phrases where useful."#;

pub const DEFAULT_TRANSFORMER_PROMPT: &str = r#"You rewrite content as a professional social-network post in a given writing style.

Apply the style characteristics closely: tone, structure, formatting, hooks, calls to action and emoji usage.
Open with a short line that earns attention. Keep paragraphs short and separated by blank lines.
Keep every fact from the original content and do not invent new ones.
End with a question or an invitation to comment, followed by two to five relevant hashtags.
Return only the post text."#;

pub const DEFAULT_EVALUATOR_PROMPT: &str = r#"You review a generated professional social-network post against a sample post that defines the target style.

Give a quality score between 0.0 and 1.0 for how well the generated post matches the sample's style while reading as a strong post on its own.
Then give specific feedback: name what to change and how, for example which hook, emoji or call to action to try instead."#;

/// Which step of the pipeline a program implements
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StageKind {
    StyleAnalyzer,
    ContentTransformer,
    QualityEvaluator,
}

impl StageKind {
    pub fn signature(&self) -> SignatureKind {
        match self {
            Self::StyleAnalyzer => SignatureKind::StyleAnalysis,
            Self::ContentTransformer => SignatureKind::ContentTransformation,
            Self::QualityEvaluator => SignatureKind::QualityEvaluation,
        }
    }

    pub fn default_prompt(&self) -> &'static str {
        match self {
            Self::StyleAnalyzer => DEFAULT_ANALYZER_PROMPT,
            Self::ContentTransformer => DEFAULT_TRANSFORMER_PROMPT,
            Self::QualityEvaluator => DEFAULT_EVALUATOR_PROMPT,
        }
    }

    /// One-line description handed to the reflection step
    pub fn task_description(&self) -> &'static str {
        match self {
            Self::StyleAnalyzer => {
                "Characterize the writing style of a sample post as a JSON object covering \
                 tone, structure, formatting, hooks_and_cta and emoji_usage, in enough detail \
                 for another writer to imitate it."
            }
            Self::ContentTransformer => {
                "Rewrite content as an engaging professional social-network post in the given \
                 style: strong hook, problem -> solution -> evidence arc, short paragraphs, \
                 a few well-placed emoji, a clear call to action and relevant hashtags."
            }
            Self::QualityEvaluator => {
                "Score how well a generated post matches a sample's style and give specific, \
                 actionable feedback."
            }
        }
    }

    /// File name of the persisted artifact for this stage
    pub fn artifact_file(&self) -> &'static str {
        match self {
            Self::StyleAnalyzer => "optimized_style_analyzer.json",
            Self::ContentTransformer => "optimized_content_transformer.json",
            Self::QualityEvaluator => "optimized_quality_evaluator.json",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::StyleAnalyzer => write!(f, "style analyzer"),
            Self::ContentTransformer => write!(f, "content transformer"),
            Self::QualityEvaluator => write!(f, "quality evaluator"),
        }
    }
}

/// A few-shot demonstration: signature inputs and the outputs to imitate
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Demo {
    pub inputs: Fields,
    pub outputs: Fields,
}

/// Instruction and demonstrations for one stage
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct StageProgram {
    pub kind: StageKind,
    pub instruction: String,
    #[serde(default)]
    pub demos: Vec<Demo>,
}

/// On-disk form of a stage program
#[derive(Debug, Serialize, Deserialize)]
struct StageArtifact {
    version: u32,
    run_id: Uuid,
    saved_at: DateTime<Utc>,
    kind: StageKind,
    instruction: String,
    /// Instruction with demonstrations rendered in, as sent to the LM
    template: String,
    #[serde(default)]
    demos: Vec<Demo>,
}

impl StageProgram {
    /// Unoptimized program with the stage's default prompt
    pub fn new(kind: StageKind) -> Self {
        Self {
            kind,
            instruction: kind.default_prompt().to_string(),
            demos: Vec::new(),
        }
    }

    pub fn with_instruction(&self, instruction: impl Into<String>) -> Self {
        Self {
            kind: self.kind,
            instruction: instruction.into(),
            demos: self.demos.clone(),
        }
    }

    /// The full prompt: instruction followed by rendered demonstrations
    pub fn compiled_template(&self) -> String {
        if self.demos.is_empty() {
            return self.instruction.clone();
        }

        let mut template = self.instruction.clone();
        template.push_str("\n\nHere are examples of good responses:");
        for (i, demo) in self.demos.iter().enumerate() {
            template.push_str(&format!("\n\n--- Example {} ---", i + 1));
            for (key, value) in demo.inputs.iter().chain(demo.outputs.iter()) {
                let text = match value {
                    Value::String(s) => s.clone(),
                    other => other.to_string(),
                };
                template.push_str(&format!("\n{}: {}", key, text));
            }
        }
        template
    }

    /// Signature inputs for an example, if it carries everything this stage needs
    pub fn inputs_for(&self, example: &Example) -> Option<Fields> {
        let mut inputs = Fields::new();
        match self.kind {
            StageKind::StyleAnalyzer => {
                inputs.insert("sample_post".into(), Value::String(example.sample.clone()));
            }
            StageKind::ContentTransformer => {
                let style = example.style_characteristics.as_ref()?;
                inputs.insert(
                    "content_to_transform".into(),
                    Value::String(example.content_to_transform.clone()),
                );
                inputs.insert(
                    "style_characteristics".into(),
                    Value::String(style.to_prompt_text()),
                );
            }
            StageKind::QualityEvaluator => {
                let generated = example.expected_output.as_ref()?;
                inputs.insert("original_sample".into(), Value::String(example.sample.clone()));
                inputs.insert("generated_article".into(), Value::String(generated.clone()));
            }
        }
        Some(inputs)
    }

    /// Demonstration of `prediction`, keyed by this stage's output field names
    pub fn demo_from(&self, inputs: Fields, prediction: &Prediction) -> Demo {
        let mut outputs = prediction.to_fields();
        if let Some(article) = outputs.remove("article") {
            outputs.insert("linkedin_article".into(), article);
        }
        Demo { inputs, outputs }
    }

    /// Invoke the LM and normalize its output into a [`Prediction`]
    pub async fn forward(&self, lm: &dyn LanguageModel, inputs: &Fields) -> Result<Prediction> {
        let template = self.compiled_template();
        let mut outputs = lm
            .invoke(self.kind.signature(), &template, inputs)
            .await
            .with_context(|| format!("{} call failed", self.kind))?;

        for field in self.kind.signature().output_fields() {
            if !outputs.contains_key(*field) {
                tracing::debug!("{} response is missing {}", self.kind, field);
            }
        }

        let prediction = match self.kind {
            StageKind::StyleAnalyzer => Prediction::with_style(StyleCharacteristics::normalize(
                outputs.remove("style_characteristics"),
            )),
            StageKind::ContentTransformer => {
                let article = field_text(&outputs, "linkedin_article").trim().to_string();
                Prediction {
                    article: (!article.is_empty()).then_some(article),
                    ..Default::default()
                }
            }
            StageKind::QualityEvaluator => {
                let score = outputs
                    .remove("quality_score")
                    .or_else(|| outputs.remove("similarity_score"))
                    .unwrap_or(Value::Null);
                let feedback = field_text(&outputs, "feedback");
                Prediction {
                    quality_score: Some(RawScore::from_value(score)),
                    feedback: (!feedback.trim().is_empty()).then_some(feedback),
                    ..Default::default()
                }
            }
        };

        Ok(prediction)
    }

    /// Persist as a versioned JSON artifact (overwrites)
    pub async fn save(&self, path: &Path) -> Result<()> {
        let artifact = StageArtifact {
            version: ARTIFACT_VERSION,
            run_id: Uuid::new_v4(),
            saved_at: Utc::now(),
            kind: self.kind,
            instruction: self.instruction.clone(),
            template: self.compiled_template(),
            demos: self.demos.clone(),
        };
        let content = serde_json::to_string_pretty(&artifact)?;

        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                tokio::fs::create_dir_all(parent)
                    .await
                    .with_context(|| format!("Failed to create {}", parent.display()))?;
            }
        }
        tokio::fs::write(path, content)
            .await
            .with_context(|| format!("Failed to write {}", path.display()))?;

        tracing::debug!("Saved {} artifact {} to {}", self.kind, artifact.run_id, path.display());
        Ok(())
    }

    pub async fn load(path: &Path) -> Result<Self> {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        let artifact: StageArtifact = serde_json::from_str(&content)
            .with_context(|| format!("Malformed stage artifact {}", path.display()))?;

        if artifact.version > ARTIFACT_VERSION {
            tracing::warn!(
                "Artifact {} has version {}, newer than supported {}",
                path.display(),
                artifact.version,
                ARTIFACT_VERSION
            );
        }

        Ok(Self {
            kind: artifact.kind,
            instruction: artifact.instruction,
            demos: artifact.demos,
        })
    }

    /// Persisted program for `kind` under `dir`, or the default one
    pub async fn load_or_default(kind: StageKind, dir: &Path) -> Self {
        let path = dir.join(kind.artifact_file());
        match Self::load(&path).await {
            Ok(program) if program.kind == kind => {
                tracing::info!("Loaded {} from {}", kind, path.display());
                program
            }
            Ok(program) => {
                tracing::warn!(
                    "{} holds a {} program, using default {}",
                    path.display(),
                    program.kind,
                    kind
                );
                Self::new(kind)
            }
            Err(e) => {
                tracing::debug!("No usable {} artifact ({:#}), using default", kind, e);
                Self::new(kind)
            }
        }
    }
}

/// Analyzer -> transformer -> evaluator
#[derive(Clone, Debug, PartialEq)]
pub struct StylePipeline {
    pub analyzer: StageProgram,
    pub transformer: StageProgram,
    pub evaluator: StageProgram,
}

impl Default for StylePipeline {
    fn default() -> Self {
        Self {
            analyzer: StageProgram::new(StageKind::StyleAnalyzer),
            transformer: StageProgram::new(StageKind::ContentTransformer),
            evaluator: StageProgram::new(StageKind::QualityEvaluator),
        }
    }
}

impl StylePipeline {
    /// Pipeline built from whatever artifacts exist under `dir`
    pub async fn load(dir: &Path) -> Self {
        Self {
            analyzer: StageProgram::load_or_default(StageKind::StyleAnalyzer, dir).await,
            transformer: StageProgram::load_or_default(StageKind::ContentTransformer, dir).await,
            evaluator: StageProgram::new(StageKind::QualityEvaluator),
        }
    }

    /// Run all three stages; the result carries every output field
    pub async fn forward(
        &self,
        lm: &dyn LanguageModel,
        sample: &str,
        content: &str,
    ) -> Result<Prediction> {
        let mut inputs = Fields::new();
        inputs.insert("sample_post".into(), Value::String(sample.to_string()));
        let analyzed = self.analyzer.forward(lm, &inputs).await?;
        let style = analyzed
            .style_characteristics
            .unwrap_or_else(StyleCharacteristics::fallback);

        let mut inputs = Fields::new();
        inputs.insert("content_to_transform".into(), Value::String(content.to_string()));
        inputs.insert(
            "style_characteristics".into(),
            Value::String(style.to_prompt_text()),
        );
        let transformed = self.transformer.forward(lm, &inputs).await?;
        let article = transformed.article.unwrap_or_default();

        let mut inputs = Fields::new();
        inputs.insert("original_sample".into(), Value::String(sample.to_string()));
        inputs.insert("generated_article".into(), Value::String(article.clone()));
        let evaluated = self.evaluator.forward(lm, &inputs).await?;

        Ok(Prediction {
            style_characteristics: Some(style),
            article: (!article.is_empty()).then_some(article),
            quality_score: evaluated.quality_score,
            feedback: evaluated.feedback,
        })
    }
}
