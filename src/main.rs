// Detoxifier - seq2seq text detoxification with feedback-driven retraining
// Main entry point

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use detoxifier::config::{load_config, Config, RetrainMode};
use detoxifier::curation::dataset::load_parallel_corpus;
use detoxifier::curation::{curate_feedback, prepare_preferences, CurationPolicy, CurationSummary, UnfixablePolicy};
use detoxifier::feedback::{FeedbackStore, PreferenceStore};
use detoxifier::logging::init_tracing;
use detoxifier::metrics::MetricsLogger;
use detoxifier::models::{SamplingParams, TextGenerator};
use detoxifier::server::{AppState, DetoxServer, ProcessRetrainRunner};
use detoxifier::training::{default_backend, Checkpoint, RetrainingDriver, TrainingInputs};

#[derive(Parser, Debug)]
#[command(name = "detoxifier")]
#[command(about = "Rewrite toxic text and learn from user feedback", long_about = None)]
#[command(version)]
struct Args {
    /// Configuration file (defaults to ~/.detoxifier/config.toml when present)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Serve the web UI and feedback endpoints
    Serve {
        /// Bind address (overrides server.bind_address)
        #[arg(long)]
        bind: Option<String>,
    },
    /// Retrain the checkpoint in place from stored feedback
    Retrain {
        /// `ratings` or `preferences` (defaults to server.retrain_mode)
        #[arg(long)]
        mode: Option<String>,
    },
    /// Fine-tune a base model on the parallel corpus
    Train {
        /// TSV with `toxic` and `neutral1..3` columns
        #[arg(long)]
        data: Option<PathBuf>,
        /// TSV of inputs that cannot be rewritten
        #[arg(long)]
        cannot_rewrite: Option<PathBuf>,
        /// Local checkpoint directory or Hugging Face model id
        #[arg(long)]
        base: Option<String>,
        /// Output directory (defaults to paths.checkpoint_dir)
        #[arg(long)]
        output: Option<PathBuf>,
    },
    /// Show what curation would produce from the stores
    Curate {
        /// Print the curated examples as JSON lines
        #[arg(long)]
        dump: bool,
    },
    /// Generate rewrites for one message
    Generate {
        message: String,
        /// Number of candidates (defaults to generation.num_candidates)
        #[arg(short = 'n', long)]
        count: Option<usize>,
    },
    /// Summarize the training metrics log
    Metrics,
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing();

    let args = Args::parse();
    let config = load_config(args.config.as_deref())?;

    match args.command {
        Command::Serve { bind } => run_serve(config, args.config, bind).await,
        Command::Retrain { mode } => run_retrain(config, mode).await,
        Command::Train {
            data,
            cannot_rewrite,
            base,
            output,
        } => run_train(config, data, cannot_rewrite, base, output).await,
        Command::Curate { dump } => run_curate(&config, dump),
        Command::Generate { message, count } => run_generate(config, message, count).await,
        Command::Metrics => run_metrics(&config),
    }
}

async fn run_serve(mut config: Config, config_path: Option<PathBuf>, bind: Option<String>) -> Result<()> {
    if let Some(bind) = bind {
        config.server.bind_address = bind;
    }

    let generator = load_generator(&config).await?;
    let runner = ProcessRetrainRunner::current_exe(
        config_path,
        Duration::from_secs(config.server.retrain_timeout_secs),
    )?;

    let state = AppState::new(config, generator, Arc::new(runner))?;
    DetoxServer::new(state).serve().await
}

#[cfg(feature = "candle")]
async fn load_generator(config: &Config) -> Result<Arc<dyn TextGenerator>> {
    use detoxifier::models::T5Generator;

    // Fail at startup rather than on the first request
    let checkpoint = Checkpoint::recover(config.paths.checkpoint_dir.clone())?;
    let training = config.training.clone();
    let generation = config.generation.clone();
    let generator = tokio::task::spawn_blocking(move || {
        T5Generator::load(checkpoint.dir(), &training, &generation)
    })
    .await??;
    Ok(Arc::new(generator))
}

#[cfg(not(feature = "candle"))]
async fn load_generator(_config: &Config) -> Result<Arc<dyn TextGenerator>> {
    bail!("detoxifier was built without the `candle` feature; no generator available")
}

async fn run_retrain(config: Config, mode: Option<String>) -> Result<()> {
    let mode: RetrainMode = mode
        .as_deref()
        .unwrap_or(&config.server.retrain_mode)
        .parse()?;

    let report = tokio::task::spawn_blocking(move || -> Result<_> {
        let inputs = TrainingInputs::load(mode, &config)?;
        let backend = default_backend(&config.training.device)?;
        let driver = RetrainingDriver::new(backend, &config)?;
        Ok(driver.retrain(&config.paths.checkpoint_dir, &inputs)?)
    })
    .await??;

    println!("{}", report);
    Ok(())
}

async fn run_train(
    config: Config,
    data: Option<PathBuf>,
    cannot_rewrite: Option<PathBuf>,
    base: Option<String>,
    output: Option<PathBuf>,
) -> Result<()> {
    if data.is_none() && cannot_rewrite.is_none() {
        bail!("Pass --data and/or --cannot-rewrite");
    }

    let report = tokio::task::spawn_blocking(move || -> Result<_> {
        let examples = load_parallel_corpus(data.as_deref(), cannot_rewrite.as_deref())?;
        let base_model = base.unwrap_or_else(|| config.training.base_model.clone());
        let base = Checkpoint::resolve_base(&base_model)
            .with_context(|| format!("Failed to resolve base model '{}'", base_model))?;
        let output = output.unwrap_or_else(|| config.paths.checkpoint_dir.clone());

        let backend = default_backend(&config.training.device)?;
        let driver = RetrainingDriver::new(backend, &config)?;
        Ok(driver.train_initial(&base, &output, examples)?)
    })
    .await??;

    println!("{}", report);
    Ok(())
}

fn run_curate(config: &Config, dump: bool) -> Result<()> {
    let feedback = FeedbackStore::open(&config.paths.feedback_store)?.load()?;
    let policy = CurationPolicy::from(&config.curation);
    let examples = curate_feedback(&feedback, &policy);
    let summary = CurationSummary::of(&feedback, &policy);

    let preferences = PreferenceStore::open(&config.paths.preference_store)?.load()?;
    let pairs = prepare_preferences(&preferences, &UnfixablePolicy::from(&config.preference));

    println!("Feedback records:   {}", summary.records);
    println!("  emphasized:       {}", summary.emphasized);
    println!("  kept:             {}", summary.kept);
    println!("  discarded:        {}", summary.discarded);
    println!("  out of range:     {}", summary.out_of_range);
    println!("Training examples:  {}", summary.examples);
    println!("Preference records: {}", preferences.len());
    println!("Preference pairs:   {}", pairs.len());

    if dump {
        for example in &examples {
            println!("{}", serde_json::to_string(example)?);
        }
        for pair in &pairs {
            println!("{}", serde_json::to_string(pair)?);
        }
    }
    Ok(())
}

async fn run_generate(config: Config, message: String, count: Option<usize>) -> Result<()> {
    let generator = load_generator(&config).await?;
    let params = SamplingParams::from(&config.generation);
    let count = count.unwrap_or(config.generation.num_candidates);

    let candidates = tokio::task::spawn_blocking(move || {
        (0..count)
            .map(|i| generator.generate(&message, &params.for_candidate(i)))
            .collect::<Result<Vec<_>>>()
    })
    .await??;

    for (i, candidate) in candidates.iter().enumerate() {
        println!("{}. {}", i + 1, candidate);
    }
    Ok(())
}

fn run_metrics(config: &Config) -> Result<()> {
    let logger = MetricsLogger::new(config.paths.metrics_log.clone())?;
    let summary = logger.summary()?;

    if summary.total == 0 {
        println!("No training steps logged in {}", logger.path().display());
        return Ok(());
    }

    println!("Logged steps: {}", summary.total);
    if let Some(last) = summary.last {
        println!("Last:  {}", last.to_line());
    }
    if let Some(best) = summary.best {
        println!("Best:  {}", best.to_line());
    }
    Ok(())
}
