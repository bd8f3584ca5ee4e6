//! Prompt text extraction from optimized stages

use super::driver::OptimizedStage;
use crate::pipeline::{StageKind, StageProgram};
use anyhow::{Context, Result};
use postcraft_tools::{OptimizedPrompts, PROMPTS_FILE};
use serde_json::Value;
use std::path::{Path, PathBuf};

/// Where a compiled prompt may live in a serialized stage, highest priority first
const TEMPLATE_POINTERS: &[&str] = &[
    "/compiled_lm/program_template",
    "/predictor/template",
    "/template",
    "/instruction",
];

/// First non-empty template found in `artifact`, else the stage default
pub fn extract_prompt(artifact: &Value, kind: StageKind) -> String {
    TEMPLATE_POINTERS
        .iter()
        .filter_map(|pointer| artifact.pointer(pointer))
        .filter_map(Value::as_str)
        .map(str::trim)
        .find(|text| !text.is_empty())
        .map(String::from)
        .unwrap_or_else(|| kind.default_prompt().to_string())
}

/// Serialized view of an in-memory program, with its compiled template
fn program_value(program: &StageProgram) -> Value {
    let mut value = serde_json::to_value(program).unwrap_or(Value::Null);
    if let Value::Object(map) = &mut value {
        map.insert("template".into(), Value::String(program.compiled_template()));
    }
    value
}

/// Prompt of a stage as the driver left it
///
/// The persisted artifact is preferred; an unreadable one falls back to the
/// in-memory program, which for skipped or failed stages is the default.
pub async fn stage_prompt(stage: &OptimizedStage) -> String {
    let kind = stage.program.kind;
    if let Some(path) = &stage.artifact {
        match read_artifact(path).await {
            Ok(artifact) => return extract_prompt(&artifact, kind),
            Err(e) => tracing::warn!("Could not read {}: {:#}", path.display(), e),
        }
    }
    extract_prompt(&program_value(&stage.program), kind)
}

async fn read_artifact(path: &Path) -> Result<Value> {
    let content = tokio::fs::read_to_string(path).await?;
    Ok(serde_json::from_str(&content)?)
}

pub async fn prompts_for(analyzer: &OptimizedStage, transformer: &OptimizedStage) -> OptimizedPrompts {
    OptimizedPrompts {
        style_analyzer_prompt: stage_prompt(analyzer).await,
        style_applicator_prompt: stage_prompt(transformer).await,
    }
}

/// Write `optimized_prompts.json` under `dir`
pub async fn write_prompts(dir: &Path, prompts: &OptimizedPrompts) -> Result<PathBuf> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let path = dir.join(PROMPTS_FILE);
    let content = serde_json::to_string_pretty(prompts)?;
    tokio::fs::write(&path, content)
        .await
        .with_context(|| format!("Failed to write {}", path.display()))?;
    tracing::info!("Wrote prompts to {}", path.display());
    Ok(path)
}
