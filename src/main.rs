//! Scaled Inference - Main Entry Point
//!
//! Loads the configured model and scale table, then reads input vectors as
//! JSON lines from stdin and writes one prediction record per line to stdout.

use anyhow::{Context, Result};
use clap::Parser;
use scaled_inference::{
    config::{AppConfig, LoggingConfig},
    metrics::{MetricsReporter, PredictionMetrics},
    models::ModelLoader,
    serve::serve_lines,
    state::ModelHandle,
};
use std::path::PathBuf;
use std::sync::Arc;
use tokio::io::BufReader;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "scaled-inference", version, about = "Scale input vectors and run them through a pretrained model")]
struct Cli {
    /// Configuration file (defaults to config/config.toml when present)
    #[arg(short, long, env = "SCALED_INFERENCE_CONFIG")]
    config: Option<PathBuf>,

    /// Override the model description location
    #[arg(long)]
    model: Option<String>,

    /// Override the scale table location
    #[arg(long)]
    scaler: Option<String>,
}

fn init_logging(logging: &LoggingConfig) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::from_default_env()
        .add_directive(format!("scaled_inference={}", logging.level).parse()?);

    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);

    if logging.format == "json" {
        builder.json().init();
    } else {
        builder.init();
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let mut config = match &cli.config {
        Some(path) => AppConfig::load_from_path(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => AppConfig::load()?,
    };
    if let Some(model) = cli.model {
        config.assets.model = model;
    }
    if let Some(scaler) = cli.scaler {
        config.assets.scaler = scaler;
    }

    init_logging(&config.logging)?;
    info!("Starting scaled inference");

    let metrics = Arc::new(PredictionMetrics::new());
    if config.runtime.metrics_interval_secs > 0 {
        let reporter = MetricsReporter::new(metrics.clone(), config.runtime.metrics_interval_secs);
        tokio::spawn(reporter.start());
    }

    let loader = Arc::new(ModelLoader::new(&config.assets)?);
    let handle = ModelHandle::new();
    handle.spawn_load(loader);

    let ctx = handle
        .wait_ready()
        .await
        .context("Model assets failed to load")?;
    info!(
        model = %ctx.model().name(),
        features = ctx.feature_count(),
        outputs = ctx.output_dim(),
        "Ready for input"
    );

    let stdin = BufReader::new(tokio::io::stdin());
    serve_lines(&ctx, &metrics, stdin, tokio::io::stdout()).await?;

    info!("Input exhausted, shutting down");
    metrics.print_summary();

    Ok(())
}
