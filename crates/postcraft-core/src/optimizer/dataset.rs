//! Example records and the train/test split

use crate::pipeline::StyleCharacteristics;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Share of records that go to the training split
const TRAIN_FRACTION: f64 = 0.7;

#[derive(Debug, thiserror::Error)]
pub enum DatasetError {
    #[error("examples file not found: {0}")]
    NotFound(PathBuf),

    #[error("failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("malformed examples file {path}: {source}")]
    Malformed {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("examples file {0} contains no examples")]
    Empty(PathBuf),

    #[error("example {index} is invalid: {reason}")]
    InvalidRecord { index: usize, reason: String },
}

/// Record family named by the optional `type` tag
///
/// Field aliases already normalize every family to one shape, so the tag is
/// only validated.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
enum ExampleKind {
    #[serde(alias = "linkedin")]
    Transform,
    #[serde(alias = "test")]
    Style,
}

/// One training or evaluation unit
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Example {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Post that defines the target style
    pub sample: String,
    pub content_to_transform: String,
    /// Reference rewrite, when the record has one
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expected_output: Option<String>,
    /// Filled in from the analyzer when building the transformer's training set
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub style_characteristics: Option<StyleCharacteristics>,
}

/// A record as it appears on disk, before validation
#[derive(Debug, Deserialize)]
struct RawExample {
    #[serde(default)]
    name: Option<String>,
    #[serde(default, rename = "type")]
    #[allow(dead_code)]
    kind: Option<ExampleKind>,
    #[serde(default, alias = "sample_post", alias = "sample_text")]
    sample: Option<String>,
    #[serde(default, alias = "content_to_style", alias = "content")]
    content_to_transform: Option<String>,
    #[serde(
        default,
        alias = "expected_linkedin_article",
        alias = "expected_styled_content"
    )]
    expected_output: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum ExamplesFile {
    List(Vec<RawExample>),
    Wrapped { examples: Vec<RawExample> },
}

impl RawExample {
    fn validate(self, index: usize) -> Result<Example, DatasetError> {
        let sample = non_empty(self.sample).ok_or_else(|| DatasetError::InvalidRecord {
            index,
            reason: "missing or empty style sample".into(),
        })?;
        let content_to_transform =
            non_empty(self.content_to_transform).ok_or_else(|| DatasetError::InvalidRecord {
                index,
                reason: "missing or empty content to transform".into(),
            })?;
        let expected_output = non_empty(self.expected_output);

        Ok(Example {
            name: self.name,
            sample,
            content_to_transform,
            expected_output,
            style_characteristics: None,
        })
    }
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}

/// Parse examples from JSON text: a list, or an object with an `examples` list
pub fn parse_examples(content: &str, path: &Path) -> Result<Vec<Example>, DatasetError> {
    let file: ExamplesFile =
        serde_json::from_str(content).map_err(|source| DatasetError::Malformed {
            path: path.to_path_buf(),
            source,
        })?;
    let raw = match file {
        ExamplesFile::List(list) => list,
        ExamplesFile::Wrapped { examples } => examples,
    };
    if raw.is_empty() {
        return Err(DatasetError::Empty(path.to_path_buf()));
    }

    raw.into_iter()
        .enumerate()
        .map(|(index, record)| record.validate(index))
        .collect()
}

/// Load and validate the examples file
pub async fn load_examples(path: &Path) -> Result<Vec<Example>, DatasetError> {
    let content = match tokio::fs::read_to_string(path).await {
        Ok(content) => content,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            return Err(DatasetError::NotFound(path.to_path_buf()));
        }
        Err(source) => {
            return Err(DatasetError::Io {
                path: path.to_path_buf(),
                source,
            });
        }
    };

    let examples = parse_examples(&content, path)?;
    tracing::info!("Loaded {} examples from {}", examples.len(), path.display());
    Ok(examples)
}

/// Number of leading records used for training
///
/// Exactly two records split 1/1; otherwise `max(1, floor(0.7 n))`.
pub fn split_index(n: usize) -> usize {
    if n == 2 {
        return 1;
    }
    let index = (n as f64 * TRAIN_FRACTION).floor() as usize;
    index.max(1).min(n)
}

/// Order-preserving splits handed to the optimization driver
#[derive(Clone, Debug, Default)]
pub struct PreparedDatasets {
    /// Training records for the style analyzer
    pub analyzer_train: Vec<Example>,
    /// Training records for the full pipeline
    pub train: Vec<Example>,
    /// Held-out records
    pub test: Vec<Example>,
}

pub fn prepare_datasets(examples: &[Example]) -> PreparedDatasets {
    let split = split_index(examples.len());
    let (train, test) = examples.split_at(split.min(examples.len()));
    PreparedDatasets {
        analyzer_train: train.to_vec(),
        train: train.to_vec(),
        test: test.to_vec(),
    }
}
