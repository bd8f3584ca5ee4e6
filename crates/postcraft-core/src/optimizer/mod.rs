//! Prompt optimization for the style pipeline
//!
//! ## Flow
//!
//! 1. Load examples and split them 70/30, order preserved ([`dataset`])
//! 2. Search over the style analyzer with the style-quality metric
//! 3. Characterize every training sample with the resulting analyzer
//! 4. Search over the content transformer with the content-quality metric
//! 5. Extract the final prompt of each stage into `optimized_prompts.json`
//!
//! Stages run strictly in sequence since step 4 depends on step 2. A stage
//! whose search fails keeps its default prompt, so a run always produces
//! usable prompts.

pub mod dataset;
pub mod driver;
pub mod prompts;
pub mod search;

pub use dataset::{
    load_examples, prepare_datasets, split_index, DatasetError, Example,
    PreparedDatasets,
};
pub use driver::{
    is_rate_limited, DriverConfig, OptimizationDriver, OptimizationReport, OptimizedStage,
    StageOutcome,
};
pub use prompts::{extract_prompt, prompts_for, write_prompts};
pub use search::{ReflectiveSearch, SearchKnobs, SearchProcedure};
