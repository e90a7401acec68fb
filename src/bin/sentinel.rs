//! Sentinel CLI - Command-line interface for Synheart Sentinel
//!
//! Commands:
//! - process: Run recorded readings through the alert pipeline
//! - validate: Validate reading envelopes
//! - doctor: Diagnose configuration and baselines
//! - config: Print the default configuration

use clap::{Parser, Subcommand, ValueEnum};
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{info, warn, Level};
use tracing_subscriber::EnvFilter;

use synheart_sentinel::baseline::BaselineSnapshot;
use synheart_sentinel::schema::{self, ReadingEnvelope, SCHEMA_VERSION};
use synheart_sentinel::{
    Alert, AlertError, AlertMetrics, AlertPipeline, InMemoryAlertStore, SentinelConfig,
    TimeRange, PRODUCER_NAME, SENTINEL_VERSION,
};

/// Sentinel - Real-time alert pipeline for wearable sensor streams
#[derive(Parser)]
#[command(name = "sentinel")]
#[command(author = "Synheart AI Inc")]
#[command(version = SENTINEL_VERSION)]
#[command(about = "Turn wearable sensor readings into prioritized alerts", long_about = None)]
struct Cli {
    /// Log level (overridden by RUST_LOG)
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run reading envelopes through the pipeline and emit surfaced alerts
    Process {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output format
        #[arg(long, default_value = "ndjson")]
        output_format: OutputFormat,

        /// Pipeline configuration (JSON)
        #[arg(long)]
        config: Option<PathBuf>,

        /// Load baselines from file
        #[arg(long)]
        load_baselines: Option<PathBuf>,

        /// Save baselines to file after processing
        #[arg(long)]
        save_baselines: Option<PathBuf>,

        /// Print alert metrics to stderr when done
        #[arg(long)]
        metrics: bool,
    },

    /// Validate reading envelopes
    Validate {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output validation report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Diagnose configuration and baselines
    Doctor {
        /// Check a configuration file
        #[arg(long)]
        config: Option<PathBuf>,

        /// Check a baselines file
        #[arg(long)]
        baselines: Option<PathBuf>,

        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the default configuration as JSON
    Config,
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one envelope per line)
    Ndjson,
    /// JSON array of envelopes
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one alert per line)
    Ndjson,
    /// JSON array of alerts
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(&cli.log_level);

    match run(cli).await {
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

fn init_tracing(log_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        let level = match log_level.to_lowercase().as_str() {
            "trace" => Level::TRACE,
            "debug" => Level::DEBUG,
            "info" => Level::INFO,
            "error" => Level::ERROR,
            _ => Level::WARN,
        };
        EnvFilter::from_default_env().add_directive(level.into())
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

async fn run(cli: Cli) -> Result<(), SentinelCliError> {
    match cli.command {
        Commands::Process {
            input,
            output,
            input_format,
            output_format,
            config,
            load_baselines,
            save_baselines,
            metrics,
        } => {
            cmd_process(ProcessArgs {
                input: &input,
                output: &output,
                input_format,
                output_format,
                config: config.as_deref(),
                load_baselines: load_baselines.as_deref(),
                save_baselines: save_baselines.as_deref(),
                metrics,
            })
            .await
        }

        Commands::Validate {
            input,
            input_format,
            json,
        } => cmd_validate(&input, input_format, json),

        Commands::Doctor {
            config,
            baselines,
            json,
        } => cmd_doctor(config.as_deref(), baselines.as_deref(), json),

        Commands::Config => {
            println!("{}", SentinelConfig::default().to_json()?);
            Ok(())
        }
    }
}

struct ProcessArgs<'a> {
    input: &'a Path,
    output: &'a Path,
    input_format: InputFormat,
    output_format: OutputFormat,
    config: Option<&'a Path>,
    load_baselines: Option<&'a Path>,
    save_baselines: Option<&'a Path>,
    metrics: bool,
}

async fn cmd_process(args: ProcessArgs<'_>) -> Result<(), SentinelCliError> {
    let envelopes = read_envelopes(args.input, &args.input_format)?;
    if envelopes.is_empty() {
        return Err(SentinelCliError::NoReadings);
    }

    let invalid = schema::validate_envelopes(&envelopes);
    if let Some(first) = invalid.first() {
        return Err(SentinelCliError::ParseError(format!(
            "envelope {} ({}): {}",
            first.index, first.sensor_id, first.error
        )));
    }

    let config = match args.config {
        Some(path) => SentinelConfig::from_file(path)?,
        None => SentinelConfig::default(),
    };
    let pipeline = AlertPipeline::new(config, Arc::new(InMemoryAlertStore::new()))?;

    if let Some(path) = args.load_baselines {
        let loaded = pipeline.load_baselines(&fs::read_to_string(path)?)?;
        info!(loaded, path = %path.display(), "baselines loaded");
    }

    let started = chrono::Utc::now();
    let mut alerts: Vec<Alert> = Vec::new();
    let mut rejected = 0usize;

    for envelope in envelopes {
        let ReadingEnvelope {
            session_id,
            reading,
            options,
            ..
        } = envelope;
        match pipeline
            .process_incoming_data(reading, &session_id, options)
            .await
        {
            Ok(surfaced) => alerts.extend(surfaced),
            Err(e) if e.is_retryable() => {
                rejected += 1;
                warn!(%session_id, error = %e, "reading not processed");
            }
            Err(e) => return Err(e.into()),
        }
    }

    if rejected > 0 {
        warn!(rejected, "some readings were rejected by the pipeline");
    }

    if let Some(path) = args.save_baselines {
        fs::write(path, pipeline.save_baselines()?)?;
    }

    if args.metrics {
        let summary = MetricsSummary {
            producer: PRODUCER_NAME,
            version: SENTINEL_VERSION,
            rejected_readings: rejected,
            circuit_state: pipeline.circuit_state().as_str(),
            alerts: pipeline.get_alert_metrics(&TimeRange::new(started, chrono::Utc::now())),
        };
        eprintln!("{}", serde_json::to_string_pretty(&summary)?);
    }

    let output_data = format_output(&alerts, &args.output_format)?;
    if args.output.to_string_lossy() == "-" {
        print!("{}", output_data);
    } else {
        fs::write(args.output, output_data)?;
    }

    Ok(())
}

fn cmd_validate(input: &Path, input_format: InputFormat, json: bool) -> Result<(), SentinelCliError> {
    let envelopes = read_envelopes(input, &input_format)?;
    let results = schema::validate_envelopes(&envelopes);

    let report = ValidationReport {
        total_readings: envelopes.len(),
        valid_readings: envelopes.len() - results.len(),
        invalid_readings: results.len(),
        errors: results,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Validation Report");
        println!("=================");
        println!("Total readings:   {}", report.total_readings);
        println!("Valid readings:   {}", report.valid_readings);
        println!("Invalid readings: {}", report.invalid_readings);

        if !report.errors.is_empty() {
            println!("\nErrors:");
            for err in &report.errors {
                println!(
                    "  - Sensor {} (index {}): {}",
                    err.sensor_id, err.index, err.error
                );
            }
        }
    }

    if report.invalid_readings > 0 {
        Err(SentinelCliError::ValidationFailed(report.invalid_readings))
    } else {
        Ok(())
    }
}

fn cmd_doctor(
    config: Option<&Path>,
    baselines: Option<&Path>,
    json: bool,
) -> Result<(), SentinelCliError> {
    let mut checks: Vec<DoctorCheck> = vec![
        DoctorCheck::ok("sentinel_version", format!("Sentinel version {}", SENTINEL_VERSION)),
        DoctorCheck::ok("schema_version", format!("Input schema: {}", SCHEMA_VERSION)),
    ];

    if let Some(path) = config {
        checks.push(match SentinelConfig::from_file(path) {
            Ok(config) => DoctorCheck::ok(
                "config",
                format!(
                    "Configuration valid (breaker timeout {} ms, window {} samples)",
                    config.breaker.timeout_ms, config.threshold.window_size
                ),
            ),
            Err(e) => DoctorCheck::error("config", format!("Invalid configuration: {}", e)),
        });
    }

    if let Some(path) = baselines {
        checks.push(check_baselines(path));
    }

    let stdin_check = if atty::is(atty::Stream::Stdin) {
        DoctorCheck::ok("stdin", "stdin is a TTY (interactive mode)".to_string())
    } else {
        DoctorCheck::ok("stdin", "stdin is a pipe (streaming input ready)".to_string())
    };
    checks.push(stdin_check);

    let report = DoctorReport {
        producer: PRODUCER_NAME.to_string(),
        version: SENTINEL_VERSION.to_string(),
        checks,
    };

    if json {
        println!("{}", serde_json::to_string_pretty(&report)?);
    } else {
        println!("Sentinel Doctor Report");
        println!("======================");
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

    if report.checks.iter().any(|c| matches!(c.status, CheckStatus::Error)) {
        Err(SentinelCliError::DoctorFailed)
    } else {
        Ok(())
    }
}

fn check_baselines(path: &Path) -> DoctorCheck {
    if !path.exists() {
        return DoctorCheck {
            name: "baselines".to_string(),
            status: CheckStatus::Warning,
            message: "Baselines file does not exist".to_string(),
        };
    }

    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) => return DoctorCheck::error("baselines", format!("Cannot read baselines file: {}", e)),
    };

    match serde_json::from_str::<BaselineSnapshot>(&content) {
        Ok(snapshot) => DoctorCheck::ok(
            "baselines",
            format!(
                "Baselines file valid ({}, {} sensors)",
                snapshot.version,
                snapshot.baselines.len()
            ),
        ),
        Err(e) => DoctorCheck::error("baselines", format!("Invalid baselines JSON: {}", e)),
    }
}

// Helper functions

fn read_envelopes(
    input: &Path,
    input_format: &InputFormat,
) -> Result<Vec<ReadingEnvelope>, SentinelCliError> {
    let input_data = if input.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        buffer
    } else {
        fs::read_to_string(input)?
    };

    let envelopes = match input_format {
        InputFormat::Ndjson => schema::parse_ndjson(&input_data)?,
        InputFormat::Json => schema::parse_array(&input_data)?,
    };
    Ok(envelopes)
}

fn format_output(alerts: &[Alert], format: &OutputFormat) -> Result<String, SentinelCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut out = String::new();
            for alert in alerts {
                out.push_str(&serde_json::to_string(alert)?);
                out.push('\n');
            }
            Ok(out)
        }
        OutputFormat::Json => Ok(serde_json::to_string(alerts)?),
        OutputFormat::JsonPretty => Ok(serde_json::to_string_pretty(alerts)?),
    }
}

// Error handling

#[derive(Debug)]
enum SentinelCliError {
    Io(io::Error),
    Pipeline(AlertError),
    Json(serde_json::Error),
    NoReadings,
    ValidationFailed(usize),
    DoctorFailed,
    ParseError(String),
}

impl From<io::Error> for SentinelCliError {
    fn from(e: io::Error) -> Self {
        SentinelCliError::Io(e)
    }
}

impl From<AlertError> for SentinelCliError {
    fn from(e: AlertError) -> Self {
        SentinelCliError::Pipeline(e)
    }
}

impl From<serde_json::Error> for SentinelCliError {
    fn from(e: serde_json::Error) -> Self {
        SentinelCliError::Json(e)
    }
}

#[derive(serde::Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<SentinelCliError> for CliError {
    fn from(e: SentinelCliError) -> Self {
        match e {
            SentinelCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            SentinelCliError::Pipeline(AlertError::Config(msg)) => CliError {
                code: "CONFIG_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'sentinel config' for a valid starting point".to_string()),
            },
            SentinelCliError::Pipeline(e) => CliError {
                code: "PIPELINE_ERROR".to_string(),
                message: e.to_string(),
                hint: Some(format!("Ensure input matches the {} schema", SCHEMA_VERSION)),
            },
            SentinelCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            SentinelCliError::NoReadings => CliError {
                code: "NO_READINGS".to_string(),
                message: "No readings found in input".to_string(),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            SentinelCliError::ValidationFailed(count) => CliError {
                code: "VALIDATION_FAILED".to_string(),
                message: format!("{} readings failed validation", count),
                hint: Some("Fix validation errors and retry".to_string()),
            },
            SentinelCliError::DoctorFailed => CliError {
                code: "DOCTOR_FAILED".to_string(),
                message: "One or more health checks failed".to_string(),
                hint: Some("Review the doctor report for details".to_string()),
            },
            SentinelCliError::ParseError(msg) => CliError {
                code: "VALIDATION_ERROR".to_string(),
                message: msg,
                hint: Some("Run 'sentinel validate' for details".to_string()),
            },
        }
    }
}

// Report types

#[derive(serde::Serialize)]
struct MetricsSummary {
    producer: &'static str,
    version: &'static str,
    rejected_readings: usize,
    circuit_state: &'static str,
    alerts: AlertMetrics,
}

#[derive(serde::Serialize)]
struct ValidationReport {
    total_readings: usize,
    valid_readings: usize,
    invalid_readings: usize,
    errors: Vec<schema::ValidationResult>,
}

#[derive(serde::Serialize)]
struct DoctorReport {
    producer: String,
    version: String,
    checks: Vec<DoctorCheck>,
}

#[derive(serde::Serialize)]
struct DoctorCheck {
    name: String,
    status: CheckStatus,
    message: String,
}

impl DoctorCheck {
    fn ok(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Ok,
            message,
        }
    }

    fn error(name: &str, message: String) -> Self {
        Self {
            name: name.to_string(),
            status: CheckStatus::Error,
            message,
        }
    }
}

#[derive(serde::Serialize)]
enum CheckStatus {
    Ok,
    Warning,
    Error,
}
