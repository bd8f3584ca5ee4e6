//! Postcraft Tools - operations on files outside the optimizer
//!
//! - patcher: inject optimized prompts into a client application's sources

pub mod patcher;

pub use patcher::{apply_prompts, PatchError, PatchTarget, PATCH_TARGETS};

use serde::{Deserialize, Serialize};

/// File name the optimizer writes its final prompts to
pub const PROMPTS_FILE: &str = "optimized_prompts.json";

/// Final prompt text per stage, as exchanged between optimizer and patcher
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct OptimizedPrompts {
    pub style_analyzer_prompt: String,
    pub style_applicator_prompt: String,
}

/// Tool execution result
#[derive(Clone, Debug, PartialEq)]
pub struct ToolResult {
    pub success: bool,
    pub output: String,
    pub error: Option<String>,
}

impl ToolResult {
    pub fn success(output: impl Into<String>) -> Self {
        Self {
            success: true,
            output: output.into(),
            error: None,
        }
    }

    pub fn error(error: impl Into<String>) -> Self {
        Self {
            success: false,
            output: String::new(),
            error: Some(error.into()),
        }
    }
}
