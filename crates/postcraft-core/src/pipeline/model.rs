//! Language-model boundary
//!
//! Stages talk to the LM only through [`LanguageModel`]: named input fields
//! in, named output fields out. [`DspyModel`] implements it with dspy-rs
//! typed signatures; tests substitute in-memory fakes.

use anyhow::Result;
use async_trait::async_trait;
use dspy_rs::{configure, ChatAdapter, Predict, Signature, LM};
use serde::{Deserialize, Serialize};
use serde_json::Value;

// baml_bridge is needed for the Signature derive macro expansion
#[allow(unused_imports)]
use baml_bridge;

/// Named fields of a structured LM input or output
pub type Fields = serde_json::Map<String, Value>;

/// The signatures the pipeline and the search procedure invoke
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignatureKind {
    StyleAnalysis,
    ContentTransformation,
    QualityEvaluation,
    ReflectOnTraces,
    ProposeInstruction,
}

impl SignatureKind {
    pub fn output_fields(&self) -> &'static [&'static str] {
        match self {
            Self::StyleAnalysis => &["style_characteristics"],
            Self::ContentTransformation => &["linkedin_article"],
            Self::QualityEvaluation => &["quality_score", "feedback"],
            Self::ReflectOnTraces => &["reflection"],
            Self::ProposeInstruction => &["improved_instruction"],
        }
    }
}

/// A structured LM call: instruction + named inputs -> named outputs
///
/// Output values may be free text even where a number or JSON object is
/// expected; callers normalize them.
#[async_trait]
pub trait LanguageModel: Send + Sync {
    async fn invoke(
        &self,
        signature: SignatureKind,
        instruction: &str,
        inputs: &Fields,
    ) -> Result<Fields>;
}

/// Connection settings for an OpenAI-compatible endpoint
#[derive(Clone, Debug)]
pub struct LmSettings {
    pub api_url: String,
    pub api_key: String,
    pub model: String,
    pub temperature: f32,
    pub max_tokens: u32,
}

#[derive(Signature, Clone, Debug)]
struct StyleAnalysis {
    #[input(desc = "A sample professional social-network post whose writing style should be characterized")]
    sample_post: String,

    #[output(desc = "JSON object with keys tone, structure, formatting, hooks_and_cta, emoji_usage")]
    style_characteristics: String,
}

#[derive(Signature, Clone, Debug)]
struct ContentTransformation {
    #[input(desc = "The content to rewrite")]
    content_to_transform: String,

    #[input(desc = "Style characteristics to apply")]
    style_characteristics: String,

    #[output(desc = "The content rewritten as a professional social-network post in the given style")]
    linkedin_article: String,
}

#[derive(Signature, Clone, Debug)]
struct QualityEvaluation {
    #[input(desc = "The sample post that defines the target style")]
    original_sample: String,

    #[input(desc = "The generated post to evaluate")]
    generated_article: String,

    #[output(desc = "Style match and quality score between 0.0 and 1.0")]
    quality_score: String,

    #[output(desc = "Specific, actionable feedback on how to improve the generated post")]
    feedback: String,
}

#[derive(Signature, Clone, Debug)]
struct ReflectOnTraces {
    #[input(desc = "The current instruction being optimized")]
    current_instruction: String,

    #[input(desc = "Execution traces with inputs, outputs, and feedback for low-scoring examples")]
    failed_traces: String,

    #[input(desc = "Description of what the stage should accomplish")]
    task_description: String,

    #[output(desc = "Analysis of specific weaknesses and concrete improvement suggestions")]
    reflection: String,
}

#[derive(Signature, Clone, Debug)]
struct ProposeInstruction {
    #[input(desc = "The current instruction")]
    current_instruction: String,

    #[input(desc = "Analysis of weaknesses and improvement suggestions")]
    reflection: String,

    #[output(desc = "The complete improved instruction that addresses the identified issues")]
    improved_instruction: String,
}

/// Read an input field as text; objects and arrays are rendered as JSON
pub fn field_text(inputs: &Fields, key: &str) -> String {
    match inputs.get(key) {
        Some(Value::String(s)) => s.clone(),
        Some(Value::Null) | None => String::new(),
        Some(other) => other.to_string(),
    }
}

/// dspy-rs backed model
///
/// The global dspy-rs LM is re-configured before every call so that two
/// instances (program and reflection models) can be used in turn.
#[derive(Clone)]
pub struct DspyModel {
    lm: LM,
}

impl DspyModel {
    pub async fn connect(settings: &LmSettings) -> Result<Self> {
        let lm = LM::builder()
            .base_url(settings.api_url.clone())
            .api_key(settings.api_key.clone())
            .model(settings.model.clone())
            .temperature(settings.temperature)
            .max_tokens(settings.max_tokens)
            .build()
            .await?;

        tracing::info!("LM configured: {} @ {}", settings.model, settings.api_url);

        Ok(Self { lm })
    }
}

#[async_trait]
impl LanguageModel for DspyModel {
    async fn invoke(
        &self,
        signature: SignatureKind,
        instruction: &str,
        inputs: &Fields,
    ) -> Result<Fields> {
        configure(self.lm.clone(), ChatAdapter);

        let mut outputs = Fields::new();
        match signature {
            SignatureKind::StyleAnalysis => {
                let predictor = Predict::<StyleAnalysis>::builder()
                    .instruction(instruction)
                    .build();
                let response = predictor
                    .call(StyleAnalysisInput {
                        sample_post: field_text(inputs, "sample_post"),
                    })
                    .await?;
                outputs.insert(
                    "style_characteristics".into(),
                    Value::String(response.style_characteristics),
                );
            }
            SignatureKind::ContentTransformation => {
                let predictor = Predict::<ContentTransformation>::builder()
                    .instruction(instruction)
                    .build();
                let response = predictor
                    .call(ContentTransformationInput {
                        content_to_transform: field_text(inputs, "content_to_transform"),
                        style_characteristics: field_text(inputs, "style_characteristics"),
                    })
                    .await?;
                outputs.insert(
                    "linkedin_article".into(),
                    Value::String(response.linkedin_article),
                );
            }
            SignatureKind::QualityEvaluation => {
                let predictor = Predict::<QualityEvaluation>::builder()
                    .instruction(instruction)
                    .build();
                let response = predictor
                    .call(QualityEvaluationInput {
                        original_sample: field_text(inputs, "original_sample"),
                        generated_article: field_text(inputs, "generated_article"),
                    })
                    .await?;
                outputs.insert("quality_score".into(), Value::String(response.quality_score));
                outputs.insert("feedback".into(), Value::String(response.feedback));
            }
            SignatureKind::ReflectOnTraces => {
                let predictor = Predict::<ReflectOnTraces>::builder()
                    .instruction(instruction)
                    .build();
                let response = predictor
                    .call(ReflectOnTracesInput {
                        current_instruction: field_text(inputs, "current_instruction"),
                        failed_traces: field_text(inputs, "failed_traces"),
                        task_description: field_text(inputs, "task_description"),
                    })
                    .await?;
                outputs.insert("reflection".into(), Value::String(response.reflection));
            }
            SignatureKind::ProposeInstruction => {
                let predictor = Predict::<ProposeInstruction>::builder()
                    .instruction(instruction)
                    .build();
                let response = predictor
                    .call(ProposeInstructionInput {
                        current_instruction: field_text(inputs, "current_instruction"),
                        reflection: field_text(inputs, "reflection"),
                    })
                    .await?;
                outputs.insert(
                    "improved_instruction".into(),
                    Value::String(response.improved_instruction),
                );
            }
        }

        Ok(outputs)
    }
}
