//! Postcraft Core Library
//!
//! Heuristic scoring and prompt optimization for a pipeline that analyzes
//! the writing style of a sample post and rewrites content in that style.

pub mod config;
pub mod lexicon;
pub mod optimizer;
pub mod pipeline;
pub mod scoring;

// Re-export key types for convenience
pub use config::Config;
pub use lexicon::Lexicon;
pub use optimizer::{
    load_examples, prepare_datasets, Example, OptimizationDriver, ReflectiveSearch,
};
pub use pipeline::{DspyModel, LanguageModel, Prediction, StageKind, StageProgram, StylePipeline};
pub use scoring::{Evaluation, MetricKind, Scorer, ScoringWeights};
