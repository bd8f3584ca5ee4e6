use anyhow::{Context, Result};
use std::path::PathBuf;
use std::time::Duration;

use crate::optimizer::{DriverConfig, SearchKnobs};
use crate::pipeline::LmSettings;

#[derive(Debug, Clone)]
pub struct Config {
    pub api_url: String,
    pub api_key: Option<String>,
    pub model: String,
    /// Model used by the search procedure for reflection and proposals
    pub reflection_model: String,
    pub temperature: f32,
    pub max_tokens: u32,

    pub examples_path: PathBuf,
    pub output_dir: PathBuf,

    pub trials: usize,
    pub candidates: usize,
    pub demos: usize,
    /// Trial budget of the retry after rate limiting
    pub reduced_trials: usize,
    pub rate_limit_cooldown: Duration,
}

fn parse_var<T: std::str::FromStr>(name: &str, default: T) -> Result<T>
where
    T::Err: std::error::Error + Send + Sync + 'static,
{
    match std::env::var(name) {
        Ok(value) => value
            .trim()
            .parse()
            .with_context(|| format!("{} has an invalid value: {:?}", name, value)),
        Err(_) => Ok(default),
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let model = std::env::var("POSTCRAFT_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string());

        Ok(Self {
            api_url: std::env::var("POSTCRAFT_API_URL")
                .unwrap_or_else(|_| "http://localhost:8080/v1".to_string()),
            api_key: std::env::var("POSTCRAFT_API_KEY").ok(),
            reflection_model: std::env::var("POSTCRAFT_REFLECTION_MODEL")
                .unwrap_or_else(|_| model.clone()),
            model,
            temperature: parse_var("POSTCRAFT_TEMPERATURE", 0.7)?,
            max_tokens: parse_var("POSTCRAFT_MAX_TOKENS", 4096)?,

            examples_path: std::env::var("POSTCRAFT_EXAMPLES")
                .unwrap_or_else(|_| "linkedin_examples.json".to_string())
                .into(),
            output_dir: std::env::var("POSTCRAFT_OUTPUT_DIR")
                .unwrap_or_else(|_| ".".to_string())
                .into(),

            trials: parse_var("POSTCRAFT_TRIALS", 10)?,
            candidates: parse_var("POSTCRAFT_CANDIDATES", 4)?,
            demos: parse_var("POSTCRAFT_DEMOS", 4)?,
            reduced_trials: parse_var("POSTCRAFT_REDUCED_TRIALS", 3)?,
            rate_limit_cooldown: Duration::from_secs(parse_var(
                "POSTCRAFT_RATE_LIMIT_COOLDOWN_SECS",
                60,
            )?),
        })
    }

    fn lm_settings(&self, model: &str) -> Result<LmSettings> {
        let api_key = self
            .api_key
            .clone()
            .ok_or_else(|| anyhow::anyhow!("POSTCRAFT_API_KEY not set"))?;
        Ok(LmSettings {
            api_url: self.api_url.clone(),
            api_key,
            model: model.to_string(),
            temperature: self.temperature,
            max_tokens: self.max_tokens,
        })
    }

    pub fn program_lm(&self) -> Result<LmSettings> {
        self.lm_settings(&self.model)
    }

    pub fn reflection_lm(&self) -> Result<LmSettings> {
        self.lm_settings(&self.reflection_model)
    }

    pub fn driver_config(&self) -> DriverConfig {
        DriverConfig {
            knobs: SearchKnobs {
                max_bootstrapped_demos: self.demos,
                max_candidates: self.candidates,
                num_trials: self.trials,
            },
            reduced_trials: self.reduced_trials,
            cooldown: self.rate_limit_cooldown,
            output_dir: self.output_dir.clone(),
        }
    }
}
