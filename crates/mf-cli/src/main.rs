//! MultiFit CLI

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mf_inference::profile_scan;
use serde::Serialize;
use std::path::PathBuf;

mod analysis_spec;

use analysis_spec::{AnalysisSpec, build_joint};

#[derive(Parser)]
#[command(name = "multifit")]
#[command(about = "MultiFit - Joint maximum-likelihood fitting of heterogeneous datasets")]
#[command(version)]
struct Cli {
    /// Log verbosity level (trace, debug, info, warn, error)
    #[arg(long, global = true, default_value = "warn")]
    log_level: tracing::Level,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a joint fit from an analysis spec
    Fit {
        /// Input analysis spec (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Profile likelihood scan over one model parameter
    Scan {
        /// Input analysis spec (JSON)
        #[arg(short, long)]
        input: PathBuf,

        /// Qualified parameter name (e.g. "src.slope")
        #[arg(short, long)]
        parameter: String,

        /// Scan start
        #[arg(long)]
        start: f64,

        /// Scan stop
        #[arg(long)]
        stop: f64,

        /// Number of points (inclusive)
        #[arg(long, default_value = "21")]
        points: usize,

        /// Output file for results (pretty JSON). Defaults to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Print version information
    Version,
}

/// JSON contract for `fit` output.
#[derive(Serialize)]
struct FitReport {
    parameter_names: Vec<String>,
    bestfit: Vec<f64>,
    uncertainties: Vec<f64>,
    nll: f64,
    converged: bool,
    n_evaluations: usize,
    log_likes: Vec<(String, f64)>,
}

fn load_spec(input: &PathBuf) -> Result<AnalysisSpec> {
    let text = std::fs::read_to_string(input)
        .with_context(|| format!("cannot read {}", input.display()))?;
    let spec: AnalysisSpec = serde_json::from_str(&text)
        .with_context(|| format!("cannot parse {}", input.display()))?;
    Ok(spec)
}

fn write_output<T: Serialize>(output: Option<&PathBuf>, value: &T) -> Result<()> {
    let text = serde_json::to_string_pretty(value)?;
    match output {
        Some(path) => std::fs::write(path, text)
            .with_context(|| format!("cannot write {}", path.display()))?,
        None => println!("{text}"),
    }
    Ok(())
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    tracing_subscriber::fmt().with_max_level(cli.log_level).with_writer(std::io::stderr).init();

    match cli.command {
        Commands::Fit { input, output } => {
            let spec = load_spec(&input)?;
            let mut jl = build_joint(&spec)?;
            let result = jl.fit()?;

            let report = FitReport {
                parameter_names: result.fit.names.clone(),
                bestfit: result.fit.values.clone(),
                uncertainties: result.fit.uncertainties.clone(),
                nll: result.fit.nll,
                converged: result.fit.converged,
                n_evaluations: result.fit.n_evaluations,
                log_likes: result.log_likes.clone(),
            };
            write_output(output.as_ref(), &report)?;
        }

        Commands::Scan { input, parameter, start, stop, points, output } => {
            anyhow::ensure!(points >= 2, "scan requires at least 2 points");
            anyhow::ensure!(stop > start, "scan stop must be greater than start");

            let spec = load_spec(&input)?;
            let mut jl = build_joint(&spec)?;

            let step = (stop - start) / (points - 1) as f64;
            let values: Vec<f64> = (0..points).map(|i| start + i as f64 * step).collect();
            let scan = profile_scan(&mut jl, &parameter, &values)?;
            write_output(output.as_ref(), &scan)?;
        }

        Commands::Version => {
            println!("multifit {}", env!("CARGO_PKG_VERSION"));
        }
    }

    Ok(())
}
