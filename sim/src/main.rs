//! FLIGHTCORE: replay and synthetic-data front-end for the flightcore position estimator.
//!
//! Three commands are available:
//!
//! - `replay`: run the estimator over logged sensor CSV files (a single file or every CSV in a
//!   directory) and write one estimate CSV per input.
//! - `synth`: generate a seeded synthetic hover/climb flight, optionally with a barometer spike.
//! - `config`: write a parameter template (TOML/JSON/YAML) with the default tuning.
//!
//! Estimator parameters come from `--config` when given, defaults otherwise.

mod common;

use clap::{Args, Parser, Subcommand};
use common::{ensure_parent_dir, estimate_output_path, get_csv_files, init_logger};
use flightcore::config::EstimatorParams;
use flightcore::events::EventId;
use flightcore::sim::{
    BaroSpike, EstimateRecord, SensorRecord, SynthConfig, run_replay, synthesize_flight,
};
use log::{error, info};
use rayon::prelude::*;
use std::error::Error;
use std::path::{Path, PathBuf};

const LONG_ABOUT: &str = "FLIGHTCORE: replay and synthetic-data tool for the flightcore position estimator.

Sensor logs are CSV files with one row per estimator cycle and the columns
timestamp_us, accel_n, accel_e, accel_d, baro_alt_m, gnss_north_m, gnss_east_m,
gnss_alt_m, gnss_eph_m, gnss_epv_m, range_m. Leave a field empty when the sensor
delivered nothing in that cycle.";

/// Command line arguments
#[derive(Parser)]
#[command(author, version, about = "Replay and synthetic-data tool for the flightcore estimator.", long_about = LONG_ABOUT)]
struct Cli {
    /// Estimator parameter file (TOML/JSON/YAML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,

    /// Log level (off, error, warn, info, debug, trace)
    #[arg(long, default_value = "info", global = true)]
    log_level: String,

    /// Log file path (if not specified, logs to stderr)
    #[arg(long, global = true)]
    log_file: Option<PathBuf>,

    /// Replay multiple files in parallel
    #[arg(long, global = true)]
    parallel: bool,
}

#[derive(Subcommand, Clone)]
enum Command {
    #[command(about = "Run the estimator over logged sensor data")]
    Replay(ReplayArgs),
    #[command(about = "Generate a synthetic sensor log")]
    Synth(SynthArgs),
    #[command(about = "Write a template parameter file")]
    Config(ConfigArgs),
}

#[derive(Args, Clone, Debug)]
struct ReplayArgs {
    /// Input CSV file or directory of CSV files
    #[arg(short, long)]
    input: PathBuf,
    /// Output directory for estimate CSV files
    #[arg(short, long)]
    output: PathBuf,
}

#[derive(Args, Clone, Debug)]
struct SynthArgs {
    /// Output CSV file
    #[arg(short, long)]
    output: PathBuf,
    /// Random seed
    #[arg(long, default_value_t = 0)]
    seed: u64,
    /// Flight duration (s)
    #[arg(long, default_value_t = 60.0)]
    duration: f64,
    /// Sample rate (Hz)
    #[arg(long, default_value_t = 50.0)]
    rate: f64,
    /// Climb rate during the climb segment (m/s)
    #[arg(long, default_value_t = 1.0)]
    climb_rate: f64,
    /// Inject a barometer spike at this time (s)
    #[arg(long)]
    spike_at: Option<f64>,
    /// Spike magnitude (m)
    #[arg(long, default_value_t = 50.0)]
    spike_magnitude: f64,
}

#[derive(Args, Clone, Debug)]
struct ConfigArgs {
    /// Output file; the extension selects the format
    #[arg(short, long, default_value = "flightcore.toml")]
    output: PathBuf,
}

/// Per-file replay summary.
struct ReplaySummary {
    input: PathBuf,
    output: PathBuf,
    records: usize,
    faults: usize,
    timeouts: usize,
    final_altitude: Option<f64>,
}

fn load_params(path: Option<&Path>) -> Result<EstimatorParams, Box<dyn Error>> {
    match path {
        Some(p) => {
            info!("Loading estimator parameters from {}", p.display());
            Ok(EstimatorParams::from_file(p)?)
        }
        None => Ok(EstimatorParams::default()),
    }
}

fn replay_file(
    input: &Path,
    output_dir: &Path,
    params: &EstimatorParams,
) -> Result<ReplaySummary, Box<dyn Error>> {
    let records = SensorRecord::from_csv(input)?;
    info!("Read {} records from {}", records.len(), input.display());
    let result = run_replay(&records, params);

    let output = estimate_output_path(input, output_dir);
    EstimateRecord::to_csv(&result.estimates, &output)?;

    let faults = [EventId::BaroFault, EventId::GnssFault, EventId::RangeFault]
        .into_iter()
        .map(|id| result.events.count(id))
        .sum();
    let timeouts = [EventId::BaroTimeout, EventId::GnssTimeout, EventId::RangeTimeout]
        .into_iter()
        .map(|id| result.events.count(id))
        .sum();
    Ok(ReplaySummary {
        input: input.to_path_buf(),
        output,
        records: records.len(),
        faults,
        timeouts,
        final_altitude: result.estimates.last().and_then(|e| e.altitude_m),
    })
}

fn run_replay_cmd(
    args: &ReplayArgs,
    params: &EstimatorParams,
    parallel: bool,
) -> Result<(), Box<dyn Error>> {
    let csv_files = get_csv_files(&args.input)?;
    std::fs::create_dir_all(&args.output)?;
    info!("Replaying {} file(s)", csv_files.len());

    let outcomes: Vec<Result<ReplaySummary, (PathBuf, String)>> = if parallel && csv_files.len() > 1
    {
        csv_files
            .par_iter()
            .map(|f| replay_file(f, &args.output, params).map_err(|e| (f.clone(), e.to_string())))
            .collect()
    } else {
        csv_files
            .iter()
            .map(|f| replay_file(f, &args.output, params).map_err(|e| (f.clone(), e.to_string())))
            .collect()
    };

    let mut failures = 0usize;
    for outcome in outcomes {
        match outcome {
            Ok(summary) => {
                info!(
                    "{} -> {}: {} records, {} fault(s), {} timeout(s), final altitude {}",
                    summary.input.display(),
                    summary.output.display(),
                    summary.records,
                    summary.faults,
                    summary.timeouts,
                    summary
                        .final_altitude
                        .map(|a| format!("{:.2} m", a))
                        .unwrap_or_else(|| "n/a".to_string())
                );
            }
            Err((file, e)) => {
                error!("Error processing {}: {}", file.display(), e);
                failures += 1;
            }
        }
    }
    if failures > 0 {
        return Err(format!("{} file(s) failed to process", failures).into());
    }
    Ok(())
}

fn synth_config(args: &SynthArgs) -> SynthConfig {
    let mut cfg = SynthConfig {
        duration_s: args.duration,
        rate_hz: args.rate,
        climb_rate_mps: args.climb_rate,
        baro_spike: args.spike_at.map(|at_s| BaroSpike {
            at_s,
            magnitude_m: args.spike_magnitude,
        }),
        ..Default::default()
    };
    // keep the climb window inside short flights
    if cfg.climb_end_s > cfg.duration_s {
        cfg.climb_start_s = cfg.duration_s / 3.0;
        cfg.climb_end_s = 2.0 * cfg.duration_s / 3.0;
    }
    cfg
}

fn run_synth_cmd(args: &SynthArgs) -> Result<(), Box<dyn Error>> {
    let cfg = synth_config(args);
    let records = synthesize_flight(&cfg, args.seed)?;
    ensure_parent_dir(&args.output)?;
    SensorRecord::to_csv(&records, &args.output)?;
    info!(
        "Wrote {} synthetic records to {}",
        records.len(),
        args.output.display()
    );
    Ok(())
}

fn run_config_cmd(args: &ConfigArgs, params: &EstimatorParams) -> Result<(), Box<dyn Error>> {
    ensure_parent_dir(&args.output)?;
    params.to_file(&args.output)?;
    info!("Wrote parameter template to {}", args.output.display());
    Ok(())
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    init_logger(&cli.log_level, cli.log_file.as_deref())?;

    let params = load_params(cli.config.as_deref())?;
    match &cli.command {
        Command::Replay(args) => run_replay_cmd(args, &params, cli.parallel),
        Command::Synth(args) => run_synth_cmd(args),
        Command::Config(args) => run_config_cmd(args, &params),
    }
}
