use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

mod area_filter;
mod coherence_filter;
mod comparison;
mod config;
mod douglas_peucker;
mod error;
mod movement_metrics;
mod pipeline;
mod quality_filter;
mod spatial_filter;
mod summary;
mod telemetry;
mod temporal_corrector;
mod track_io;

use config::PipelineConfig;
use pipeline::{run_all, run_comparison, run_metrics, run_stage, Stage};

#[derive(Parser, Debug)]
#[command(name = "argos-track-cleaner")]
#[command(about = "Clean, correct and simplify Argos sea turtle tracks")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Command,

    /// Pipeline configuration (TOML); built-in defaults when absent
    #[arg(short, long, global = true, env = "ARGOS_TRACK_CONFIG")]
    config: Option<PathBuf>,

    /// Log level (error, warn, info, debug, trace)
    #[arg(short, long, default_value = "info", global = true)]
    log_level: String,

    /// Worker threads, overrides the config file
    #[arg(short = 'j', long, global = true)]
    threads: Option<usize>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run every stage from raw exports to metrics and comparison
    Run {
        /// Folder with the raw per-transmitter Argos CSVs
        #[arg(long)]
        raw: PathBuf,
        /// Folder receiving one sub-folder per stage
        #[arg(long, default_value = "processed")]
        work: PathBuf,
    },
    /// Keep fixes with accepted Argos location classes
    Quality(StageArgs),
    /// Drop fixes outside the study area or on land
    Spatial(StageArgs),
    /// Sort fixes and collapse same-minute duplicates
    Temporal(StageArgs),
    /// Drop fixes implying impossible swim speeds
    Coherence(StageArgs),
    /// Douglas-Peucker simplification
    Simplify(StageArgs),
    /// Crop simplified tracks to the focus area
    Area(StageArgs),
    /// Movement metrics of simplified tracks
    Metrics(StageArgs),
    /// Compare raw exports with simplified tracks
    Compare {
        #[arg(long)]
        raw: PathBuf,
        #[arg(long)]
        processed: PathBuf,
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Print the effective configuration as TOML
    Config,
}

#[derive(Args, Debug)]
struct StageArgs {
    /// Folder with the previous stage's tracks
    #[arg(short, long)]
    input: PathBuf,
    /// Output folder
    #[arg(short, long)]
    output: PathBuf,
}

fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // RUST_LOG wins over --log-level.
    let log_filter = std::env::var("RUST_LOG").unwrap_or_else(|_| cli.log_level.clone());
    tracing_subscriber::registry()
        .with(fmt::layer().with_writer(std::io::stderr))
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&log_filter)))
        .init();

    let mut config = PipelineConfig::load_or_default(cli.config.as_deref())?;
    if cli.threads.is_some() {
        config.threads = cli.threads;
        config.validate()?;
    }

    match cli.command {
        Command::Config => {
            print!("{}", config.to_toml()?);
            return Ok(());
        }
        Command::Run { raw, work } => {
            println!("\n🐢 ARGOS TRACK CLEANER");
            println!("======================");
            println!("📁 Raw tracks: {}", raw.display());
            println!("📁 Work folder: {}", work.display());
            run_all(&raw, &work, &config)?;
        }
        Command::Quality(args) => stage(Stage::Quality, &args, &config)?,
        Command::Spatial(args) => stage(Stage::Spatial, &args, &config)?,
        Command::Temporal(args) => stage(Stage::Temporal, &args, &config)?,
        Command::Coherence(args) => stage(Stage::Coherence, &args, &config)?,
        Command::Simplify(args) => stage(Stage::Simplify, &args, &config)?,
        Command::Area(args) => stage(Stage::Area, &args, &config)?,
        Command::Metrics(args) => {
            run_metrics(&args.input, &args.output, &config)?;
        }
        Command::Compare { raw, processed, output } => {
            run_comparison(&raw, &processed, &output, &config)?;
        }
    }

    Ok(())
}

fn stage(stage: Stage, args: &StageArgs, config: &PipelineConfig) -> Result<(), Box<dyn std::error::Error>> {
    let report = run_stage(stage, &args.input, &args.output, config)?;
    if report.processed == 0 && !report.skipped.is_empty() {
        return Err(format!("{}: every track was skipped", stage.name()).into());
    }
    Ok(())
}
