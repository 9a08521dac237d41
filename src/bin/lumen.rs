//! Lumen CLI - Command-line interface for Synheart Lumen
//!
//! Commands:
//! - normalize: Normalize optical samples in batches (NDJSON in, NDJSON out)
//! - segments: Detect stability segments in an optical series
//! - classify: Replay telemetry through the device context classifier
//! - trend: Bucketed trend of a normalized channel
//! - doctor: Diagnose configuration and baseline snapshot health
//!
//! Input is newline-delimited JSON with one record per line, tagged by type:
//! `{"type":"optical","timestamp":...,"channel_a":...,"channel_b":...,"channel_c":...}`
//! or `{"type":"telemetry","timestamp":...,"motion_magnitude":...,
//! "temperature_celsius":...,"charge_level_percent":...}`.

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use synheart_lumen::baseline::BaselineSnapshot;
use synheart_lumen::types::sorted_by_time;
use synheart_lumen::{
    ComputeError, DeviceContextClassifier, EngineConfig, NormalizationEngine,
    NormalizationMethod, OpticalSample, SegmentDetector, TelemetrySample, TimeRange,
    TrendAggregator, TrendMetric, LUMEN_VERSION, PRODUCER_NAME,
};

/// Lumen - Context-aware normalization for wearable optical signals
#[derive(Parser)]
#[command(name = "lumen")]
#[command(author = "Synheart AI Inc")]
#[command(version = LUMEN_VERSION)]
#[command(about = "Normalize wearable optical signals using device context", long_about = None)]
struct Cli {
    /// Log engine decisions at debug level (overridden by RUST_LOG)
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Normalize optical samples in timestamp-ordered batches
    Normalize {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Normalization method
        #[arg(short, long, default_value = "persistent")]
        method: NormalizationMethod,

        /// Optical samples per batch
        #[arg(long, default_value = "50")]
        batch_size: usize,

        /// Engine configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Load a baseline snapshot before processing
        #[arg(long)]
        load_baseline: Option<PathBuf>,

        /// Save the baseline snapshot after processing
        #[arg(long)]
        save_baseline: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Detect stability segments in an optical series
    Segments {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Engine configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Replay telemetry through the device context classifier
    Classify {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Telemetry samples between classifications
        #[arg(long, default_value = "1")]
        step: usize,

        /// Engine configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Bucketed trend of a normalized channel
    Trend {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Normalization method applied before bucketing
        #[arg(short, long, default_value = "persistent")]
        method: NormalizationMethod,

        /// Channel to trend
        #[arg(long, value_enum, default_value = "channel-a")]
        metric: MetricArg,

        /// Trend range
        #[arg(long, value_enum, default_value = "hour")]
        range: RangeArg,

        /// Optical samples per batch
        #[arg(long, default_value = "50")]
        batch_size: usize,

        /// Engine configuration file (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Load a baseline snapshot before processing
        #[arg(long)]
        load_baseline: Option<PathBuf>,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,
    },

    /// Diagnose configuration and baseline snapshot health
    Doctor {
        /// Check an engine configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Check a baseline snapshot file
        #[arg(long)]
        baseline: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one record per line)
    Ndjson,
    /// JSON array of records
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[derive(Clone, Copy, ValueEnum)]
enum MetricArg {
    ChannelA,
    ChannelB,
    ChannelC,
}

impl From<MetricArg> for TrendMetric {
    fn from(arg: MetricArg) -> Self {
        match arg {
            MetricArg::ChannelA => TrendMetric::ChannelA,
            MetricArg::ChannelB => TrendMetric::ChannelB,
            MetricArg::ChannelC => TrendMetric::ChannelC,
        }
    }
}

#[derive(Clone, Copy, ValueEnum)]
enum RangeArg {
    Hour,
    Day,
    Week,
}

impl From<RangeArg> for TimeRange {
    fn from(arg: RangeArg) -> Self {
        match arg {
            RangeArg::Hour => TimeRange::Hour,
            RangeArg::Day => TimeRange::Day,
            RangeArg::Week => TimeRange::Week,
        }
    }
}

/// One tagged input line
#[derive(Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum InputRecord {
    Optical(OpticalSample),
    Telemetry(TelemetrySample),
}

/// One normalized output line
#[derive(Serialize)]
struct NormalizedRecord {
    batch: usize,
    method: NormalizationMethod,
    #[serde(flatten)]
    sample: OpticalSample,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!(
                "{}",
                serde_json::to_string(&CliError::from(e))
                    .unwrap_or_else(|_| "Unknown error".to_string())
            );
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(verbose: bool) {
    let default = if verbose {
        "synheart_lumen=debug"
    } else {
        "synheart_lumen=info"
    };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), LumenCliError> {
    match cli.command {
        Commands::Normalize {
            input,
            output,
            method,
            batch_size,
            config,
            load_baseline,
            save_baseline,
            output_format,
        } => cmd_normalize(
            &input,
            &output,
            method,
            batch_size,
            config.as_deref(),
            load_baseline.as_deref(),
            save_baseline.as_deref(),
            &output_format,
        ),

        Commands::Segments {
            input,
            config,
            output_format,
        } => cmd_segments(&input, config.as_deref(), &output_format),

        Commands::Classify {
            input,
            step,
            config,
            output_format,
        } => cmd_classify(&input, step, config.as_deref(), &output_format),

        Commands::Trend {
            input,
            method,
            metric,
            range,
            batch_size,
            config,
            load_baseline,
            output_format,
        } => cmd_trend(
            &input,
            method,
            metric.into(),
            range.into(),
            batch_size,
            config.as_deref(),
            load_baseline.as_deref(),
            &output_format,
        ),

        Commands::Doctor {
            config,
            baseline,
            json,
        } => cmd_doctor(config.as_deref(), baseline.as_deref(), json),
    }
}

#[allow(clippy::too_many_arguments)]
fn cmd_normalize(
    input: &Path,
    output: &Path,
    method: NormalizationMethod,
    batch_size: usize,
    config: Option<&Path>,
    load_baseline: Option<&Path>,
    save_baseline: Option<&Path>,
    output_format: &OutputFormat,
) -> Result<(), LumenCliError> {
    let (optical, telemetry) = parse_records(&read_input(input)?)?;
    if optical.is_empty() {
        return Err(LumenCliError::NoSamples);
    }

    let mut engine = build_engine(config)?;
    if let Some(path) = load_baseline {
        warm_start(&mut engine, path)?;
    }

    let records = normalize_batches(&mut engine, &optical, &telemetry, method, batch_size)?;
    info!("{}", engine.baseline_diagnostics());

    if let Some(path) = save_baseline {
        match engine.save_baseline_snapshot()? {
            Some(json) => fs::write(path, json)?,
            None => info!("no baseline learned; snapshot not written"),
        }
    }

    write_output(output, &format_output(&records, output_format)?)
}

fn cmd_segments(
    input: &Path,
    config: Option<&Path>,
    output_format: &OutputFormat,
) -> Result<(), LumenCliError> {
    let (optical, _) = parse_records(&read_input(input)?)?;
    let config = load_config(config)?;

    let sorted = sorted_by_time(&optical, |s| s.timestamp);
    let segments = SegmentDetector::with_config(config.segments).detect(&sorted);
    write_output(Path::new("-"), &format_output(&segments, output_format)?)
}

fn cmd_classify(
    input: &Path,
    step: usize,
    config: Option<&Path>,
    output_format: &OutputFormat,
) -> Result<(), LumenCliError> {
    let (_, telemetry) = parse_records(&read_input(input)?)?;
    let config = load_config(config)?;
    let window = config.classifier.window_size;
    let step = step.max(1);

    let sorted = sorted_by_time(&telemetry, |s| s.timestamp);
    let mut classifier = DeviceContextClassifier::with_config(config.classifier);
    let mut contexts = Vec::new();
    let mut end = step.min(sorted.len());
    while end <= sorted.len() && end > 0 {
        let start = end.saturating_sub(window);
        if let Some(context) = classifier.classify(&sorted[start..end]) {
            contexts.push(context);
        }
        if end == sorted.len() {
            break;
        }
        end = (end + step).min(sorted.len());
    }

    write_output(Path::new("-"), &format_output(&contexts, output_format)?)
}

#[allow(clippy::too_many_arguments)]
fn cmd_trend(
    input: &Path,
    method: NormalizationMethod,
    metric: TrendMetric,
    range: TimeRange,
    batch_size: usize,
    config: Option<&Path>,
    load_baseline: Option<&Path>,
    output_format: &OutputFormat,
) -> Result<(), LumenCliError> {
    let (optical, telemetry) = parse_records(&read_input(input)?)?;
    if optical.is_empty() {
        return Err(LumenCliError::NoSamples);
    }

    let mut engine = build_engine(config)?;
    if let Some(path) = load_baseline {
        warm_start(&mut engine, path)?;
    }

    let normalized: Vec<OpticalSample> =
        normalize_batches(&mut engine, &optical, &telemetry, method, batch_size)?
            .into_iter()
            .map(|r| r.sample)
            .collect();
    let points = TrendAggregator::default().trend(&normalized, metric, range);
    write_output(Path::new("-"), &format_output(&points, output_format)?)
}

fn cmd_doctor(
    config: Option<&Path>,
    baseline: Option<&Path>,
    json: bool,
) -> Result<(), LumenCliError> {
    let mut checks: Vec<DoctorCheck> = Vec::new();

    checks.push(DoctorCheck {
        name: "lumen_version".to_string(),
        status: CheckStatus::Ok,
        message: format!("Lumen version {}", LUMEN_VERSION),
    });

    checks.push(match config {
        Some(path) => match EngineConfig::from_file(path) {
            Ok(_) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Ok,
                message: format!("Configuration {} is valid", path.display()),
            },
            Err(e) => DoctorCheck {
                name: "config".to_string(),
                status: CheckStatus::Error,
                message: format!("Invalid configuration: {}", e),
            },
        },
        None => DoctorCheck {
            name: "config".to_string(),
            status: CheckStatus::Ok,
            message: "Using default configuration".to_string(),
        },
    });

    if let Some(path) = baseline {
        checks.push(check_baseline(path));
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a TTY (interactive mode)".to_string(),
        }
    } else {
        DoctorCheck {
            name: "stdin".to_string(),
            status: CheckStatus::Ok,
            message: "stdin is a pipe (streaming input ready)".to_string(),
        }
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: LUMEN_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Lumen Doctor Report");
        println!("===================");
        println!("Producer: {}", report.producer);
        println!("Version:  {}", report.version);
        println!("\nChecks:");
        for check in &report.checks {
            let status_icon = match check.status {
                CheckStatus::Ok => "[OK]",
                CheckStatus::Warning => "[WARN]",
                CheckStatus::Error => "[ERR]",
            };
            println!("  {} {}: {}", status_icon, check.name, check.message);
        }
    }

    let has_errors = report
        .checks
        .iter()
        .any(|c| matches!(c.status, CheckStatus::Error));
    if has_errors {
        Err(LumenCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn check_baseline(path: &Path) -> DoctorCheck {
    let name = "baseline".to_string();
    if !path.exists() {
        return DoctorCheck {
            name,
            status: CheckStatus::Warning,
            message: "Baseline snapshot does not exist (engine will start cold)".to_string(),
        };
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => {
            return DoctorCheck {
                name,
                status: CheckStatus::Error,
                message: format!("Cannot read baseline snapshot: {}", e),
            }
        }
    };

    match BaselineSnapshot::parse_baseline(&content) {
        Ok(state) if state.is_reliable() => DoctorCheck {
            name,
            status: CheckStatus::Ok,
            message: format!(
                "Baseline valid (confidence {:.2}, {} samples, learned {})",
                state.confidence,
                state.sample_count,
                state.timestamp.to_rfc3339()
            ),
        },
        Ok(state) => DoctorCheck {
            name,
            status: CheckStatus::Warning,
            message: format!(
                "Baseline not reliable (confidence {:.2}, {} samples); it will be relearned",
                state.confidence, state.sample_count
            ),
        },
        Err(e) => DoctorCheck {
            name,
            status: CheckStatus::Error,
            message: format!("Invalid baseline snapshot: {}", e),
        },
    }
}

// Helper functions

fn read_input(input: &Path) -> Result<String, LumenCliError> {
    if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(input)?)
    }
}

fn write_output(output: &Path, data: &str) -> Result<(), LumenCliError> {
    if output.to_string_lossy() == "-" {
        let mut stdout = io::stdout();
        write!(stdout, "{}", data)?;
        stdout.flush()?;
    } else {
        fs::write(output, data)?;
    }
    Ok(())
}

fn parse_records(data: &str) -> Result<(Vec<OpticalSample>, Vec<TelemetrySample>), LumenCliError> {
    let mut optical = Vec::new();
    let mut telemetry = Vec::new();

    for (line_no, line) in data.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record: InputRecord = serde_json::from_str(trimmed).map_err(|e| {
            LumenCliError::ParseError(format!("line {}: {}", line_no + 1, e))
        })?;
        match record {
            InputRecord::Optical(sample) => optical.push(sample),
            InputRecord::Telemetry(sample) => telemetry.push(sample),
        }
    }

    debug!(
        optical = optical.len(),
        telemetry = telemetry.len(),
        "parsed input records"
    );
    Ok((optical, telemetry))
}

fn load_config(path: Option<&Path>) -> Result<EngineConfig, LumenCliError> {
    match path {
        Some(path) => Ok(EngineConfig::from_file(path)?),
        None => Ok(EngineConfig::default()),
    }
}

fn build_engine(config: Option<&Path>) -> Result<NormalizationEngine, LumenCliError> {
    Ok(NormalizationEngine::with_config(load_config(config)?)?)
}

fn warm_start(engine: &mut NormalizationEngine, path: &Path) -> Result<(), LumenCliError> {
    let json = fs::read_to_string(path)?;
    if engine.load_baseline_snapshot(&json) {
        info!(path = %path.display(), "baseline snapshot loaded");
    }
    Ok(())
}

fn normalize_batches(
    engine: &mut NormalizationEngine,
    optical: &[OpticalSample],
    telemetry: &[TelemetrySample],
    method: NormalizationMethod,
    batch_size: usize,
) -> Result<Vec<NormalizedRecord>, LumenCliError> {
    if batch_size == 0 {
        return Err(LumenCliError::ParseError("batch size must be at least 1".to_string()));
    }

    let sorted = sorted_by_time(optical, |s| s.timestamp);
    let mut records = Vec::with_capacity(sorted.len());
    for (batch, chunk) in sorted.chunks(batch_size).enumerate() {
        let result = engine.normalize_aligned(chunk, method, telemetry);
        records.extend(result.samples.into_iter().map(|sample| NormalizedRecord {
            batch,
            method: result.applied,
            sample,
        }));
    }
    Ok(records)
}

fn format_output<T: Serialize>(
    records: &[T],
    format: &OutputFormat,
) -> Result<String, LumenCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut lines: Vec<String> = Vec::new();
            for record in records {
                lines.push(serde_json::to_string(record)?);
            }
            if lines.is_empty() {
                Ok(String::new())
            } else {
                Ok(lines.join("\n") + "\n")
            }
        }
        OutputFormat::Json => Ok(serde_json::to_string(records)? + "\n"),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(records)? + "\n"),
    }
}

// Error types

#[derive(Debug)]
enum LumenCliError {
    Io(io::Error),
    Compute(ComputeError),
    Json(serde_json::Error),
    NoSamples,
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for LumenCliError {
    fn from(e: io::Error) -> Self {
        LumenCliError::Io(e)
    }
}

impl From<ComputeError> for LumenCliError {
    fn from(e: ComputeError) -> Self {
        LumenCliError::Compute(e)
    }
}

impl From<serde_json::Error> for LumenCliError {
    fn from(e: serde_json::Error) -> Self {
        LumenCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<LumenCliError> for CliError {
    fn from(e: LumenCliError) -> Self {
        match e {
            LumenCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            LumenCliError::Compute(e) => CliError {
                code: "COMPUTE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some(
                    "Run 'lumen doctor --config <file>' to check the configuration".to_string(),
                ),
            },
            LumenCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            LumenCliError::NoSamples => CliError {
                code: "NO_SAMPLES".to_string(),
                message: "No optical samples found in input".to_string(),
                hint: Some("Records need \"type\": \"optical\" or \"telemetry\"".to_string()),
            },
            LumenCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            LumenCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
        }
    }
}

// Report types

#[derive(Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

#[derive(Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
