use anyhow::{Context, Result};
use clap::{Args as ClapArgs, Parser, Subcommand};
use std::path::PathBuf;
use terrain_classifier::{
    classify::{report, ClassificationPipeline, ClassifyOptions},
    config::{ConfigArgs, DEFAULT_CONFIDENCE_THRESHOLD, DEFAULT_INPUT_SIZE},
    models::ModelManager,
    web::serve,
    Config,
};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "terrain-classifier")]
#[command(about = "ONNX-powered terrain image classification service")]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    #[command(flatten)]
    common: CommonArgs,
}

#[derive(Subcommand)]
enum Command {
    /// Run the HTTP service (default)
    Serve,

    /// Classify a single local image and print the result
    Predict {
        /// JPEG or PNG image to classify
        image: PathBuf,

        /// Write the two-line prediction report to this file
        #[arg(long)]
        output: Option<PathBuf>,
    },
}

#[derive(ClapArgs)]
struct CommonArgs {
    /// Server bind address
    #[arg(long, env = "TERRAIN_BIND", default_value = "0.0.0.0:5005", global = true)]
    bind: String,

    /// Number of worker threads
    #[arg(long, env = "TERRAIN_WORKERS", global = true)]
    workers: Option<usize>,

    /// Log level
    #[arg(long, env = "TERRAIN_LOG_LEVEL", default_value = "info", global = true)]
    log_level: String,

    /// Model directory path
    #[arg(long, env = "TERRAIN_MODELS_DIR", default_value = "models", global = true)]
    models_dir: String,

    /// Explicit ONNX model file (overrides --models-dir)
    #[arg(long, env = "TERRAIN_MODEL_PATH", global = true)]
    model_path: Option<String>,

    /// Confidence below which a prediction is reported as uncertain
    #[arg(long, env = "TERRAIN_THRESHOLD", default_value_t = DEFAULT_CONFIDENCE_THRESHOLD, global = true)]
    threshold: f32,

    /// Model input edge length in pixels
    #[arg(long, env = "TERRAIN_INPUT_SIZE", default_value_t = DEFAULT_INPUT_SIZE, global = true)]
    input_size: u32,

    /// Enable development mode
    #[arg(long, global = true)]
    dev: bool,
}

fn main() -> Result<()> {
    let args = Args::parse();
    let common = args.common;

    // 初始化日志系统
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new(&common.log_level)),
        )
        .with_target(false)
        .init();

    let config = Config::new(ConfigArgs {
        bind_addr: common.bind,
        models_dir: common.models_dir,
        model_path: common.model_path,
        workers: common.workers,
        threshold: common.threshold,
        input_size: common.input_size,
        dev_mode: common.dev,
    })?;

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .worker_threads(config.workers)
        .enable_all()
        .build()
        .context("failed to build tokio runtime")?;

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => {
            tracing::info!("Starting terrain classifier service...");
            tracing::info!("Bind address: {}", config.bind_addr);
            tracing::info!("Model path: {}", config.terrain_model_path().display());
            tracing::info!(
                "Confidence threshold: {}",
                config.classifier_config.confidence_threshold
            );

            runtime.block_on(serve(config))?;
        }
        Command::Predict { image, output } => {
            runtime.block_on(predict(config, image, output))?;
        }
    }

    Ok(())
}

async fn predict(config: Config, image: PathBuf, output: Option<PathBuf>) -> Result<()> {
    let manager = ModelManager::load(config)?;
    let result =
        ClassificationPipeline::process_path(&manager, &image, ClassifyOptions::default())
            .await
            .with_context(|| format!("failed to classify {}", image.display()))?;

    println!("{}", result.message);
    if result.is_confident() {
        println!(
            "Confidence: {}",
            report::format_percentage(result.prediction.confidence)
        );
    }

    if let Some(path) = output {
        match &result.report {
            Some(text) => {
                tokio::fs::write(&path, text)
                    .await
                    .with_context(|| format!("failed to write {}", path.display()))?;
                tracing::info!("Prediction report written to {}", path.display());
            }
            None => tracing::warn!("Prediction is uncertain, no report written"),
        }
    }

    Ok(())
}
