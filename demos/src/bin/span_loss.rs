//! Span Loss Evaluation
//!
//! Evaluates the similarity-aware span loss on a batch recorded from a
//! training run and prints the per-row losses with their diagnostics as JSON.
//!
//! ## Usage
//!
//! ```bash
//! # Evaluate with S_Diff and S_Q_P enabled
//! cargo run --bin span_loss -- eval --batch demos/data/sample_batch.json --term 1 --term 3
//!
//! # Evaluate with a saved configuration and write the report to a file
//! cargo run --bin span_loss -- eval --batch batch.json --config loss.json --output report.json
//!
//! # Write a configuration file to edit
//! cargo run --bin span_loss -- config --output loss.json --term 2
//! ```
//!
//! Set `RUST_LOG=moment_loss=debug` to see per-batch logging.

use std::{fs, path::PathBuf};

use anyhow::{anyhow, Context, Result};
use burn::{config::Config, tensor::cast::ToElement};
use clap::{Parser, Subcommand};
use moment_loss::SimilarityLossConfig;
use moment_loss_demos::{
    create_device, get_backend_name, BatchFile, BatchTensors, LossReport, SelectedBackend,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Evaluate the loss on a recorded batch
    Eval {
        /// Path to the batch JSON file
        #[arg(short, long)]
        batch: PathBuf,

        /// Loss configuration file path
        #[arg(short, long)]
        config: Option<PathBuf>,

        /// Similarity term ids to enable (1 = S_Diff, 2 = S_GT_P, 3 = S_Q_P)
        #[arg(short, long = "term")]
        terms: Vec<u8>,

        /// Write the report to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
    /// Write a loss configuration file
    Config {
        /// Output path of the configuration
        #[arg(short, long, default_value = "loss_config.json")]
        output: PathBuf,

        /// Similarity term ids to enable
        #[arg(short, long = "term")]
        terms: Vec<u8>,
    },
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    match Args::parse().command {
        Command::Eval {
            batch,
            config,
            terms,
            output,
        } => eval(batch, config, &terms, output),
        Command::Config { output, terms } => {
            let config = SimilarityLossConfig::new().with_term_ids(&terms)?;
            config.validate()?;
            config
                .save(&output)
                .with_context(|| format!("Failed to write config file: {}", output.display()))?;
            tracing::info!(path = %output.display(), "wrote loss configuration");
            Ok(())
        }
    }
}

fn eval(
    batch_path: PathBuf,
    config_path: Option<PathBuf>,
    terms: &[u8],
    output: Option<PathBuf>,
) -> Result<()> {
    let config = match config_path {
        Some(path) => {
            let config = SimilarityLossConfig::load(&path).map_err(|err| {
                anyhow!("Failed to load config file {}: {err:?}", path.display())
            })?;
            if terms.is_empty() {
                config
            } else {
                config.with_term_ids(terms)?
            }
        }
        None => SimilarityLossConfig::new().with_term_ids(terms)?,
    };
    let loss = config.init()?;

    let batch = BatchFile::load(&batch_path)?;
    let device = create_device();
    tracing::info!(
        backend = get_backend_name(),
        batch = %batch_path.display(),
        rows = batch.pred_spans.len(),
        %loss,
        "evaluating batch"
    );

    let BatchTensors {
        pred_spans,
        gt_spans,
        sims,
    } = batch.to_tensors::<SelectedBackend>(&device)?;

    let (values, diagnostics) = loss.forward_no_reduction(
        pred_spans,
        gt_spans,
        sims,
        &batch.idx,
        batch.durations.as_deref(),
    )?;

    let mean_loss = values.clone().mean().into_scalar().to_f32();
    let loss_values = values
        .into_data()
        .to_vec::<f32>()
        .map_err(|err| anyhow!("Failed to read loss values: {err:?}"))?;

    let report = LossReport {
        backend: get_backend_name().to_string(),
        loss: loss_values,
        mean_loss,
        diagnostics,
    };
    let report_str = serde_json::to_string_pretty(&report)?;

    match output {
        Some(path) => {
            fs::write(&path, report_str)
                .with_context(|| format!("Failed to write report: {}", path.display()))?;
            tracing::info!(path = %path.display(), mean_loss, "wrote loss report");
        }
        None => println!("{report_str}"),
    }

    Ok(())
}
