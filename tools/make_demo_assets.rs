//! Demo Asset Generator
//!
//! Writes a randomly initialised dense network in the layers-model format,
//! a matching scale table and a handful of sample input lines, so the
//! prediction CLI can be exercised without a trained model.

use anyhow::{Context, Result};
use clap::Parser;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde_json::json;
use std::path::PathBuf;
use tracing::info;

#[derive(Debug, Parser)]
#[command(name = "make-demo-assets", about = "Generate a demo model, scale table and inputs")]
struct Args {
    /// Output directory
    #[arg(long, default_value = "assets")]
    out: PathBuf,

    /// Input features
    #[arg(long, default_value_t = 8)]
    features: usize,

    /// Hidden units
    #[arg(long, default_value_t = 16)]
    hidden: usize,

    /// Output units (softmax when > 1, sigmoid otherwise)
    #[arg(long, default_value_t = 1)]
    outputs: usize,

    /// Sample input lines to write to inputs.jsonl
    #[arg(long, default_value_t = 5)]
    samples: usize,

    /// RNG seed
    #[arg(long, default_value_t = 42)]
    seed: u64,
}

fn random_weights(rng: &mut StdRng, count: usize, fan_in: usize) -> Vec<f32> {
    let limit = (6.0 / fan_in.max(1) as f32).sqrt();
    (0..count).map(|_| rng.gen_range(-limit..limit)).collect()
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("make_demo_assets=info".parse()?),
        )
        .init();

    let args = Args::parse();
    anyhow::ensure!(
        args.features > 0 && args.hidden > 0 && args.outputs > 0,
        "features, hidden and outputs must all be positive"
    );

    let mut rng = StdRng::seed_from_u64(args.seed);

    let hidden_kernel = random_weights(&mut rng, args.features * args.hidden, args.features);
    let hidden_bias = vec![0.0_f32; args.hidden];
    let head_kernel = random_weights(&mut rng, args.hidden * args.outputs, args.hidden);
    let head_bias = vec![0.0_f32; args.outputs];
    let head_activation = if args.outputs > 1 { "softmax" } else { "sigmoid" };

    let shard_name = "group1-shard1of1.bin";
    let model = json!({
        "format": "layers-model",
        "generatedBy": "make-demo-assets",
        "modelTopology": {
            "class_name": "Sequential",
            "config": {
                "name": "demo",
                "layers": [
                    {"class_name": "InputLayer", "config": {
                        "name": "input", "batch_input_shape": [null, args.features], "dtype": "float32"
                    }},
                    {"class_name": "Dense", "config": {
                        "name": "hidden", "units": args.hidden, "activation": "relu", "use_bias": true
                    }},
                    {"class_name": "Dense", "config": {
                        "name": "head", "units": args.outputs, "activation": head_activation, "use_bias": true
                    }}
                ]
            }
        },
        "weightsManifest": [{
            "paths": [shard_name],
            "weights": [
                {"name": "hidden/kernel", "shape": [args.features, args.hidden], "dtype": "float32"},
                {"name": "hidden/bias", "shape": [args.hidden], "dtype": "float32"},
                {"name": "head/kernel", "shape": [args.hidden, args.outputs], "dtype": "float32"},
                {"name": "head/bias", "shape": [args.outputs], "dtype": "float32"}
            ]
        }]
    });

    let shard: Vec<u8> = hidden_kernel
        .iter()
        .chain(&hidden_bias)
        .chain(&head_kernel)
        .chain(&head_bias)
        .flat_map(|v| v.to_le_bytes())
        .collect();

    // Divisors roughly matching the magnitude of the sample inputs
    let scaler: Vec<f32> = (0..args.features)
        .map(|_| 10f32.powi(rng.gen_range(0..4)))
        .collect();

    std::fs::create_dir_all(&args.out)
        .with_context(|| format!("Failed to create {}", args.out.display()))?;
    std::fs::write(args.out.join("model.json"), serde_json::to_vec_pretty(&model)?)?;
    std::fs::write(args.out.join(shard_name), &shard)?;
    std::fs::write(args.out.join("scaler.json"), serde_json::to_vec(&scaler)?)?;

    let mut samples = String::new();
    for i in 0..args.samples {
        let input: Vec<f32> = scaler
            .iter()
            .map(|&d| (rng.gen_range(-1.0..1.0_f32) * d * 100.0).round() / 100.0)
            .collect();
        samples.push_str(&serde_json::to_string(&json!({"id": format!("sample-{}", i + 1), "input": input}))?);
        samples.push('\n');
    }
    std::fs::write(args.out.join("inputs.jsonl"), samples)?;

    info!(
        out = %args.out.display(),
        features = args.features,
        hidden = args.hidden,
        outputs = args.outputs,
        shard_bytes = shard.len(),
        samples = args.samples,
        "Demo assets written"
    );

    Ok(())
}
