use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use postcraft_core::optimizer::{OptimizationReport, OptimizedStage};
use postcraft_core::{
    load_examples, prepare_datasets, Config, DspyModel, LanguageModel, MetricKind,
    OptimizationDriver, ReflectiveSearch, Scorer, StylePipeline,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[derive(Parser)]
#[command(name = "postcraft", version, about = "Style prompt optimizer")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Optimize the analyzer and transformer prompts
    Optimize {
        /// Examples file (JSON)
        #[arg(short, long)]
        examples: Option<PathBuf>,
        /// Directory for artifacts and optimized_prompts.json
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Trial budget per stage
        #[arg(long)]
        trials: Option<usize>,
        /// Instruction candidates proposed per trial
        #[arg(long)]
        candidates: Option<usize>,
        /// Maximum bootstrapped demonstrations per stage
        #[arg(long)]
        demos: Option<usize>,
    },
    /// Score the current pipeline on the held-out examples
    Evaluate {
        #[arg(short, long)]
        examples: Option<PathBuf>,
        /// Directory holding the stage artifacts
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Inject optimized prompts into the client application
    Apply {
        /// Application root
        #[arg(long, default_value = ".")]
        app_path: PathBuf,
        #[arg(short, long, default_value = postcraft_tools::PROMPTS_FILE)]
        prompts: PathBuf,
        /// Compute the changes without writing them
        #[arg(long)]
        dry_run: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize logging
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "postcraft=debug,info".into()),
        ))
        .with(tracing_subscriber::fmt::layer())
        .init();

    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    let mut config = Config::from_env()?;

    match cli.command {
        Command::Optimize {
            examples,
            output,
            trials,
            candidates,
            demos,
        } => {
            if let Some(path) = examples {
                config.examples_path = path;
            }
            if let Some(dir) = output {
                config.output_dir = dir;
            }
            config.trials = trials.unwrap_or(config.trials);
            config.candidates = candidates.unwrap_or(config.candidates);
            config.demos = demos.unwrap_or(config.demos);
            run_optimize(&config).await
        }
        Command::Evaluate { examples, output } => {
            if let Some(path) = examples {
                config.examples_path = path;
            }
            if let Some(dir) = output {
                config.output_dir = dir;
            }
            run_evaluate(&config).await
        }
        Command::Apply {
            app_path,
            prompts,
            dry_run,
        } => {
            let result = postcraft_tools::apply_prompts(&app_path, &prompts, dry_run).await;
            if !result.success {
                anyhow::bail!(
                    "Failed to apply prompts: {}",
                    result.error.unwrap_or_default()
                );
            }
            println!("{}", result.output);
            Ok(())
        }
    }
}

async fn connect(config: &Config) -> Result<(Arc<dyn LanguageModel>, Arc<dyn LanguageModel>)> {
    let program: Arc<dyn LanguageModel> = Arc::new(DspyModel::connect(&config.program_lm()?).await?);
    let reflection: Arc<dyn LanguageModel> = if config.reflection_model == config.model {
        program.clone()
    } else {
        Arc::new(DspyModel::connect(&config.reflection_lm()?).await?)
    };
    Ok((program, reflection))
}

async fn run_optimize(config: &Config) -> Result<()> {
    println!("=== Prompt Optimization ===\n");
    info!("Program LM: {} @ {}", config.model, config.api_url);
    info!("Reflection LM: {}", config.reflection_model);

    let examples = load_examples(&config.examples_path).await?;
    let datasets = prepare_datasets(&examples);
    println!(
        "Examples: {} ({} train, {} held out)\n",
        examples.len(),
        datasets.train.len(),
        datasets.test.len()
    );

    let (lm, reflection_lm) = connect(config).await?;
    let search = Arc::new(ReflectiveSearch::new(lm.clone(), reflection_lm));
    let driver = OptimizationDriver::new(search, Arc::new(Scorer::default()), config.driver_config());

    let report = driver
        .run(lm.as_ref(), &datasets)
        .await
        .context("Optimization run failed")?;
    print_report(&report);
    Ok(())
}

fn print_stage(name: &str, stage: &OptimizedStage) {
    let saved = stage
        .artifact
        .as_ref()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "not saved".to_string());
    println!(
        "  {:<12} {} ({} demos, {})",
        name,
        stage.outcome,
        stage.program.demos.len(),
        saved
    );
}

fn print_report(report: &OptimizationReport) {
    println!("\n============================================================");
    println!("OPTIMIZATION COMPLETE");
    println!("============================================================\n");
    print_stage("analyzer", &report.analyzer);
    print_stage("transformer", &report.transformer);
    println!("\nPrompts saved to: {}", report.prompts_path.display());
    println!("\n=== Style analyzer prompt ===\n");
    println!("{}", report.prompts.style_analyzer_prompt);
    println!("\n=== Style applicator prompt ===\n");
    println!("{}", report.prompts.style_applicator_prompt);
}

async fn run_evaluate(config: &Config) -> Result<()> {
    println!("=== Pipeline Evaluation ===\n");

    let examples = load_examples(&config.examples_path).await?;
    let datasets = prepare_datasets(&examples);
    let evalset = if datasets.test.is_empty() {
        warn!("No held-out examples, evaluating on the training split");
        datasets.train
    } else {
        datasets.test
    };

    let (lm, _) = connect(config).await?;
    let pipeline = StylePipeline::load(&config.output_dir).await;
    let scorer = Scorer::default();

    let kinds = [
        MetricKind::StyleQuality,
        MetricKind::ContentQuality,
        MetricKind::FeedbackQuality,
    ];
    let mut totals = [0.0f32; 3];

    for example in &evalset {
        let label = example
            .name
            .clone()
            .unwrap_or_else(|| example.sample.chars().take(40).collect());

        match pipeline
            .forward(lm.as_ref(), &example.sample, &example.content_to_transform)
            .await
        {
            Ok(prediction) => {
                let scores: Vec<f32> = kinds
                    .iter()
                    .map(|kind| scorer.score(*kind, Some(example), &prediction))
                    .collect();
                for (total, score) in totals.iter_mut().zip(&scores) {
                    *total += score;
                }
                println!(
                    "[style {:.2} | content {:.2} | feedback {:.2}] {}",
                    scores[0], scores[1], scores[2], label
                );
            }
            Err(e) => {
                println!("✗ [0.00] {} - Error: {:#}", label, e);
            }
        }
    }

    let n = evalset.len().max(1) as f32;
    println!("\n=== Results ===");
    println!("Style quality:    {:.3}", totals[0] / n);
    println!("Content quality:  {:.3}", totals[1] / n);
    println!("Feedback quality: {:.3}", totals[2] / n);

    Ok(())
}
