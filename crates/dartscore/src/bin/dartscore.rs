//! dartscore CLI: score throws, inspect calibration, list runtime flags.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};
use dartscore::detect::io::{load_throws, write_outcomes};
use dartscore::detect::DetectIoError;
use dartscore::{
    check_calibration, open_detector, parse_flag_assignment, resolve_config, DetectorConfig,
    Error, Flag, SessionOptions,
};
use log::{info, warn};
use serde::Serialize;

#[derive(Parser)]
#[command(name = "dartscore")]
#[command(about = "Score dart throws from multi-camera tip detections")]
#[command(version)]
struct Cli {
    /// More log output (-v info, -vv debug, -vvv trace).
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Emit logs as JSON lines (tracing builds only).
    #[arg(long, global = true)]
    log_json: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Score one throw, or a list of throws, from a JSON file.
    Score(ScoreArgs),

    /// Report which cameras of a calibration file are usable.
    CheckCalibration {
        /// Calibration document (JSON object keyed by camera id).
        #[arg(long)]
        calibration: PathBuf,

        /// Fit without the interpolated mid-ring control points.
        #[arg(long)]
        no_mid_rings: bool,
    },

    /// List every runtime flag with its current value.
    Flags {
        /// Detector config to read values from.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Flag override, NAME=VALUE. Repeatable.
        #[arg(long = "flag", value_name = "NAME=VALUE")]
        flags: Vec<String>,

        /// Print JSON instead of a table.
        #[arg(long)]
        json: bool,
    },
}

#[derive(Debug, Clone, Args)]
struct ScoreArgs {
    /// Calibration document (JSON object keyed by camera id).
    #[arg(long)]
    calibration: PathBuf,

    /// Throw input: one ThrowInput object or an array of them.
    #[arg(long)]
    throw: PathBuf,

    /// Detector config (JSON). Defaults are used if omitted.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Bias map for apply mode (sparse or legacy grid JSON).
    #[arg(long)]
    bias_map: Option<PathBuf>,

    /// Flag override, NAME=VALUE. Repeatable, applied after --config.
    #[arg(long = "flag", value_name = "NAME=VALUE")]
    flags: Vec<String>,

    /// Attach diagnostics to every result.
    #[arg(long)]
    diagnostics: bool,

    /// Append learn-mode observations to this JSON-lines file.
    #[arg(long)]
    learn_log: Option<PathBuf>,

    /// Write outcomes here instead of stdout.
    #[arg(long)]
    out: Option<PathBuf>,
}

#[derive(Serialize)]
struct FlagRow {
    name: &'static str,
    value: i64,
    description: &'static str,
}

fn init_logging(verbose: u8, json: bool) {
    #[cfg(feature = "tracing")]
    {
        let _ = tracing_log::LogTracer::init();
        // RUST_LOG drives the filter here
        let _ = verbose;
        dartscore::core::init_tracing(json);
    }
    #[cfg(not(feature = "tracing"))]
    {
        if json {
            eprintln!("--log-json needs the `tracing` feature; using plain logs");
        }
        let _ = dartscore::core::init_with_level(dartscore::core::verbosity_level(verbose));
    }
}

fn parse_flags(raw: &[String]) -> Result<Vec<(String, i64)>, Error> {
    raw.iter().map(|s| parse_flag_assignment(s)).collect()
}

fn run_score(args: &ScoreArgs) -> Result<(), Error> {
    let mut options = SessionOptions {
        calibration: args.calibration.clone(),
        config: args.config.clone(),
        bias_map: args.bias_map.clone(),
        flags: parse_flags(&args.flags)?,
    };
    if args.diagnostics {
        options = options.with_flag(Flag::EmitDiagnostics.name(), 1);
    }
    let detector = open_detector(&options)?;
    if detector.calibration().usable_count() == 0 {
        warn!("no usable camera in {}", args.calibration.display());
    }

    let throws = load_throws(&args.throw)?;
    info!("scoring {} throw(s)", throws.len());
    let outcomes = throws.map(|t| detector.detect(&t));

    match &args.out {
        Some(path) => {
            let file = fs::File::create(path).map_err(DetectIoError::from)?;
            write_outcomes(io::BufWriter::new(file), &outcomes)?;
            info!("outcomes written to {}", path.display());
        }
        None => write_outcomes(io::stdout().lock(), &outcomes)?,
    }

    match &args.learn_log {
        Some(path) => {
            let n = detector.flush_learn_log(path)?;
            info!("{n} bias observation(s) appended to {}", path.display());
        }
        None => {
            let pending = detector.bias().pending();
            if pending > 0 {
                warn!("{pending} bias observation(s) discarded; pass --learn-log to keep them");
            }
        }
    }
    Ok(())
}

fn run_check_calibration(path: &Path, no_mid_rings: bool) -> Result<bool, Error> {
    let options = dartscore::TransformOptions {
        mid_ring_control_points: !no_mid_rings,
    };
    let report = check_calibration(path, &options)?;
    let json = serde_json::to_string_pretty(&report).map_err(DetectIoError::from)?;
    println!("{json}");
    Ok(report.iter().any(|s| s.usable))
}

fn run_flags(config: Option<PathBuf>, raw: &[String], json: bool) -> Result<(), Error> {
    let options = SessionOptions {
        config,
        flags: parse_flags(raw)?,
        ..SessionOptions::default()
    };
    let config: DetectorConfig = resolve_config(&options)?;
    let rows: Vec<FlagRow> = Flag::ALL
        .iter()
        .map(|&f| FlagRow {
            name: f.name(),
            value: config.get_flag(f),
            description: f.description(),
        })
        .collect();
    if json {
        let text = serde_json::to_string_pretty(&rows).map_err(DetectIoError::from)?;
        println!("{text}");
    } else {
        let width = rows.iter().map(|r| r.name.len()).max().unwrap_or(0);
        for r in &rows {
            println!("{:<width$}  {:>6}  {}", r.name, r.value, r.description);
        }
    }
    Ok(())
}

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose, cli.log_json);

    let result = match cli.command {
        Commands::Score(args) => run_score(&args),
        Commands::CheckCalibration {
            calibration,
            no_mid_rings,
        } => match run_check_calibration(&calibration, no_mid_rings) {
            Ok(true) => Ok(()),
            Ok(false) => {
                eprintln!("error: no usable camera in {}", calibration.display());
                std::process::exit(2);
            }
            Err(e) => Err(e),
        },
        Commands::Flags {
            config,
            flags,
            json,
        } => run_flags(config, &flags, json),
    };

    if let Err(err) = result {
        eprintln!("error: {err}");
        std::process::exit(1);
    }
}
