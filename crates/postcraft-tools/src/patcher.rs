//! Prompt injection into application sources
//!
//! Each target file is located by a fixed path under the application root.
//! Text between `// POSTCRAFT:<KEY>:BEGIN` and `// POSTCRAFT:<KEY>:END` is
//! replaced when the markers exist; otherwise the legacy hardcoded prompt is
//! replaced verbatim. Files are rewritten whole through a temp file and a
//! rename, so a failed patch leaves the original untouched.

use crate::{OptimizedPrompts, ToolResult};
use std::path::{Path, PathBuf};

#[derive(Debug, thiserror::Error)]
pub enum PatchError {
    #[error("prompts file not found: {0}")]
    PromptsNotFound(PathBuf),

    #[error("prompts file {path} is not valid: {source}")]
    PromptsMalformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("target file not found: {0}")]
    TargetNotFound(PathBuf),

    #[error("{0} has neither prompt markers nor the default prompt")]
    NoAnchor(PathBuf),

    #[error("{path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A source file that receives one of the optimized prompts
#[derive(Debug)]
pub struct PatchTarget {
    /// Path relative to the application root
    pub relative_path: &'static str,
    /// Key used in the marker comments
    pub marker_key: &'static str,
    /// Hardcoded prompt shipped before markers were introduced
    pub legacy_prompt: &'static str,
    prompt: fn(&OptimizedPrompts) -> &str,
}

impl PatchTarget {
    pub fn prompt<'a>(&self, prompts: &'a OptimizedPrompts) -> &'a str {
        (self.prompt)(prompts)
    }

    fn begin_marker(&self) -> String {
        format!("// POSTCRAFT:{}:BEGIN", self.marker_key)
    }

    fn end_marker(&self) -> String {
        format!("// POSTCRAFT:{}:END", self.marker_key)
    }

    /// Replacement content, or `None` if the file has no anchor for it
    pub fn patch(&self, content: &str, prompt: &str) -> Option<String> {
        let begin = self.begin_marker();
        let end = self.end_marker();

        if let Some(begin_at) = content.find(&begin) {
            let body_start = match content[begin_at..].find('\n') {
                Some(offset) => begin_at + offset + 1,
                None => return None,
            };
            let end_at = body_start + content[body_start..].find(&end)?;
            // Keep the END marker's indentation
            let line_start = content[..end_at].rfind('\n').map(|i| i + 1).unwrap_or(0);
            let line_start = line_start.max(body_start);
            let indent = &content[line_start..end_at];
            let indent = if indent.trim().is_empty() { indent } else { "" };

            let mut patched = String::with_capacity(content.len() + prompt.len());
            patched.push_str(&content[..body_start]);
            patched.push_str(prompt);
            patched.push('\n');
            patched.push_str(indent);
            patched.push_str(&content[end_at..]);
            return Some(patched);
        }

        if content.contains(self.legacy_prompt) {
            return Some(content.replace(self.legacy_prompt, prompt));
        }

        None
    }
}

/// Files patched by `apply`, in order
pub static PATCH_TARGETS: [PatchTarget; 2] = [
    PatchTarget {
        relative_path: "lib/style_page.dart",
        marker_key: "STYLE_ANALYZER_PROMPT",
        legacy_prompt: "You are an AI that analyzes text and creates concise style instructions for other AI's to rewrite texts.",
        prompt: |p| p.style_analyzer_prompt.as_str(),
    },
    PatchTarget {
        relative_path: "lib/chat_page.dart",
        marker_key: "STYLE_APPLICATOR_PROMPT",
        legacy_prompt: "You are a helpful assistant for writing any sort of texts.",
        prompt: |p| p.style_applicator_prompt.as_str(),
    },
];

pub async fn read_prompts(path: &Path) -> Result<OptimizedPrompts, PatchError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PatchError::PromptsNotFound(path.to_path_buf()));
        }
        Err(source) => {
            return Err(PatchError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };
    serde_json::from_str(&content).map_err(|source| PatchError::PromptsMalformed {
        path: path.to_path_buf(),
        source,
    })
}

/// Compute the patched content of one target without writing it
pub async fn plan_patch(
    app_path: &Path,
    target: &PatchTarget,
    prompts: &OptimizedPrompts,
) -> Result<(PathBuf, String), PatchError> {
    let path = app_path.join(target.relative_path);
    let content = match tokio::fs::read_to_string(&path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(PatchError::TargetNotFound(path));
        }
        Err(source) => return Err(PatchError::Io { path, source }),
    };

    let patched = target
        .patch(&content, target.prompt(prompts))
        .ok_or_else(|| PatchError::NoAnchor(path.clone()))?;
    Ok((path, patched))
}

/// Write `content` to a sibling temp file, then rename it over `path`
async fn write_whole(path: &Path, content: &str) -> Result<(), PatchError> {
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default();
    let tmp = path.with_file_name(format!(".{}.postcraft.tmp", file_name));

    let io_err = |source| PatchError::Io {
        path: path.to_path_buf(),
        source,
    };
    tokio::fs::write(&tmp, content).await.map_err(io_err)?;
    if let Err(source) = tokio::fs::rename(&tmp, path).await {
        let _ = tokio::fs::remove_file(&tmp).await;
        return Err(io_err(source));
    }
    Ok(())
}

/// Inject the prompts from `prompts_path` into the application at `app_path`
///
/// Succeeds when at least one target was (or, in dry-run, would be) patched.
pub async fn apply_prompts(app_path: &Path, prompts_path: &Path, dry_run: bool) -> ToolResult {
    let prompts = match read_prompts(prompts_path).await {
        Ok(prompts) => prompts,
        Err(e) => return ToolResult::error(e.to_string()),
    };

    let mut patched = Vec::new();
    let mut problems = Vec::new();

    for target in &PATCH_TARGETS {
        let (path, content) = match plan_patch(app_path, target, &prompts).await {
            Ok(plan) => plan,
            Err(e) => {
                tracing::warn!("Skipping {}: {}", target.relative_path, e);
                problems.push(e.to_string());
                continue;
            }
        };

        if dry_run {
            tracing::info!("Dry run: would patch {}", path.display());
            patched.push(format!("would patch {}", path.display()));
            continue;
        }

        match write_whole(&path, &content).await {
            Ok(()) => {
                tracing::info!("Patched {}", path.display());
                patched.push(format!("patched {}", path.display()));
            }
            Err(e) => {
                tracing::error!("Failed to write {}: {}", path.display(), e);
                problems.push(e.to_string());
            }
        }
    }

    if patched.is_empty() {
        return ToolResult::error(problems.join("\n"));
    }

    let mut output = patched.join("\n");
    for problem in &problems {
        output.push_str(&format!("\nskipped: {}", problem));
    }
    ToolResult::success(output)
}
