//! Style analysis and transformation pipeline
//!
//! Each stage wraps one LM signature and normalizes whatever comes back into
//! the committed output schema in [`values`].

pub mod model;
pub mod stages;
pub mod values;

pub use model::{DspyModel, Fields, LanguageModel, LmSettings, SignatureKind};
pub use stages::{Demo, StageKind, StageProgram, StylePipeline};
pub use values::{Prediction, RawScore, StyleCharacteristics};
