//! Attune CLI - Command-line interface for Synheart Attune
//!
//! Commands:
//! - classify: Extractor frames (NDJSON or JSON array) into fused readings (NDJSON)
//! - profile: Build a threshold profile from a baseline and trait category
//! - scan: Co-regulation scan over child readings and caregiver emotions
//! - summarize: Session summary over child readings and optional events

use clap::{Parser, Subcommand, ValueEnum};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::fs;
use std::io::{self, Read, Write};
use std::path::{Path, PathBuf};
use std::process::ExitCode;
use tracing::info;
use tracing_subscriber::EnvFilter;

use synheart_attune::adapters::{parse_frames_array, parse_frames_ndjson};
use synheart_attune::classifier::SmoothedBand;
use synheart_attune::profile::DEFAULT_BAND_BOUNDARIES;
use synheart_attune::{
    build_threshold_profile, ArousalProcessor, AttuneConfig, AttuneError, Band, BaselineSample,
    CoRegulationDetector, CoRegulationEvent, EmotionReading, FusedReading, ModalitySignal,
    SessionAggregator, ThresholdProfile, TraitCategory, ATTUNE_VERSION, PRODUCER_NAME,
};

/// Environment variable holding a tracing filter directive
const LOG_ENV: &str = "ATTUNE_LOG";

/// Attune - On-device arousal fusion and co-regulation analysis
#[derive(Parser)]
#[command(name = "attune")]
#[command(author = "Synheart AI Inc")]
#[command(version = ATTUNE_VERSION)]
#[command(about = "Fuse behavioral signals into arousal bands and find co-regulation", long_about = None)]
struct Cli {
    /// Log level used when ATTUNE_LOG is unset
    #[arg(long, global = true, default_value = "warn")]
    log_level: String,

    /// Configuration file (JSON); missing fields take defaults
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Classify extractor frames into fused readings
    Classify {
        /// Input file path (use - for stdin)
        #[arg(short, long)]
        input: PathBuf,

        /// Input format
        #[arg(long, value_enum, default_value = "ndjson")]
        input_format: InputFormat,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,

        /// Threshold profile (JSON); the default profile when omitted
        #[arg(long)]
        profile: Option<PathBuf>,
    },

    /// Build a threshold profile
    Profile {
        /// Resting-state baseline signals (NDJSON of modality signals)
        #[arg(long)]
        baseline: Option<PathBuf>,

        /// Trait category adjustment
        #[arg(long = "trait", value_enum)]
        trait_category: Option<TraitArg>,

        /// Default boundaries as four comma-separated cut-points
        #[arg(long, value_delimiter = ',')]
        boundaries: Option<Vec<f64>>,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },

    /// Scan child and caregiver histories for co-regulation events
    Scan {
        /// Child fused readings (NDJSON)
        #[arg(long)]
        child: PathBuf,

        /// Caregiver emotion readings (NDJSON)
        #[arg(long)]
        caregiver: PathBuf,

        /// Output format
        #[arg(long, default_value = "json-pretty")]
        output_format: OutputFormat,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },

    /// Summarize a classified session
    Summarize {
        /// Child fused readings (NDJSON)
        #[arg(long)]
        readings: PathBuf,

        /// Co-regulation events (JSON array) from a previous scan
        #[arg(long)]
        events: Option<PathBuf>,

        /// Output file path (use - for stdout)
        #[arg(short, long, default_value = "-")]
        output: PathBuf,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum TraitArg {
    RepetitiveMovement,
    VocalRepetition,
    ReducedFacialExpression,
    HighActivity,
    SensorySensitive,
}

impl From<TraitArg> for TraitCategory {
    fn from(arg: TraitArg) -> Self {
        match arg {
            TraitArg::RepetitiveMovement => TraitCategory::RepetitiveMovement,
            TraitArg::VocalRepetition => TraitCategory::VocalRepetition,
            TraitArg::ReducedFacialExpression => TraitCategory::ReducedFacialExpression,
            TraitArg::HighActivity => TraitCategory::HighActivity,
            TraitArg::SensorySensitive => TraitCategory::SensorySensitive,
        }
    }
}

#[derive(Clone, ValueEnum)]
enum InputFormat {
    /// Newline-delimited JSON (one frame per line)
    Ndjson,
    /// JSON array of frames
    Json,
}

#[derive(Clone, ValueEnum)]
enum OutputFormat {
    /// Newline-delimited JSON (one event per line)
    Ndjson,
    /// JSON array of events
    Json,
    /// Pretty-printed JSON
    JsonPretty,
}

/// One line of `classify` output
#[derive(Serialize)]
struct ClassifiedRecord {
    producer: &'static str,
    reading: FusedReading,
    #[serde(skip_serializing_if = "Option::is_none")]
    smoothed: Option<SmoothedBand>,
    #[serde(skip_serializing_if = "Option::is_none")]
    stabilized: Option<Band>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(&cli.log_level);

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

fn init_logging(level: &str) {
    let filter = EnvFilter::try_from_env(LOG_ENV)
        .or_else(|_| EnvFilter::try_new(level))
        .unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn run(cli: Cli) -> Result<(), AttuneCliError> {
    let config = match &cli.config {
        Some(path) => AttuneConfig::from_json(&read_input(path)?)?,
        None => AttuneConfig::default(),
    };

    match cli.command {
        Commands::Classify {
            input,
            input_format,
            output,
            profile,
        } => cmd_classify(&config, &input, &input_format, &output, profile.as_deref()),

        Commands::Profile {
            baseline,
            trait_category,
            boundaries,
            output,
        } => cmd_profile(
            baseline.as_deref(),
            trait_category.map(TraitCategory::from),
            boundaries,
            &output,
        ),

        Commands::Scan {
            child,
            caregiver,
            output_format,
            output,
        } => cmd_scan(&config, &child, &caregiver, &output_format, &output),

        Commands::Summarize {
            readings,
            events,
            output,
        } => cmd_summarize(&readings, events.as_deref(), &output),
    }
}

fn cmd_classify(
    config: &AttuneConfig,
    input: &Path,
    input_format: &InputFormat,
    output: &Path,
    profile: Option<&Path>,
) -> Result<(), AttuneCliError> {
    let input_data = read_input(input)?;
    let frames = match input_format {
        InputFormat::Ndjson => parse_frames_ndjson(&input_data)?,
        InputFormat::Json => parse_frames_array(&input_data)?,
    };
    if frames.is_empty() {
        return Err(AttuneCliError::NoRecords("extractor frames".to_string()));
    }

    let mut processor = ArousalProcessor::with_config(config);
    if let Some(path) = profile {
        processor.set_profile(ThresholdProfile::from_json(&read_input(path)?)?);
    }

    let mut out = String::new();
    for frame in &frames {
        let reading = processor.process_frame(frame);
        let record = ClassifiedRecord {
            producer: PRODUCER_NAME,
            reading,
            smoothed: processor.smoothed(),
            stabilized: processor.get_stabilized(),
        };
        out.push_str(&serde_json::to_string(&record)?);
        out.push('\n');
    }
    info!(frames = frames.len(), "classified frames");

    write_output(output, &out)
}

fn cmd_profile(
    baseline: Option<&Path>,
    trait_category: Option<TraitCategory>,
    boundaries: Option<Vec<f64>>,
    output: &Path,
) -> Result<(), AttuneCliError> {
    let defaults = match boundaries {
        Some(values) => <[f64; 4]>::try_from(values.as_slice()).map_err(|_| {
            AttuneCliError::ParseError("--boundaries needs exactly four values".to_string())
        })?,
        None => DEFAULT_BAND_BOUNDARIES,
    };
    let sample = match baseline {
        Some(path) => Some(BaselineSample::new(parse_ndjson::<ModalitySignal>(
            &read_input(path)?,
        )?)),
        None => None,
    };

    let profile = build_threshold_profile(defaults, sample.as_ref(), trait_category)?;
    let mut json = profile.to_json()?;
    json.push('\n');
    write_output(output, &json)
}

fn cmd_scan(
    config: &AttuneConfig,
    child: &Path,
    caregiver: &Path,
    output_format: &OutputFormat,
    output: &Path,
) -> Result<(), AttuneCliError> {
    let child_history = parse_ndjson::<FusedReading>(&read_input(child)?)?;
    let caregiver_history = parse_ndjson::<EmotionReading>(&read_input(caregiver)?)?;
    if child_history.is_empty() {
        return Err(AttuneCliError::NoRecords("child readings".to_string()));
    }
    if caregiver_history.is_empty() {
        return Err(AttuneCliError::NoRecords("caregiver readings".to_string()));
    }

    let detector = CoRegulationDetector::new(config.coregulation.clone());
    let events = detector.detect(&child_history, &caregiver_history);
    write_output(output, &format_events(&events, output_format)?)
}

fn cmd_summarize(
    readings: &Path,
    events: Option<&Path>,
    output: &Path,
) -> Result<(), AttuneCliError> {
    let history = parse_ndjson::<FusedReading>(&read_input(readings)?)?;
    let events: Vec<CoRegulationEvent> = match events {
        Some(path) => serde_json::from_str(&read_input(path)?)?,
        None => Vec::new(),
    };

    let summary = SessionAggregator::summarize(&history, &events);
    let mut json = serde_json::to_string_pretty(&summary)?;
    json.push('\n');
    write_output(output, &json)
}

fn format_events(
    events: &[CoRegulationEvent],
    format: &OutputFormat,
) -> Result<String, AttuneCliError> {
    match format {
        OutputFormat::Ndjson => {
            let mut out = String::new();
            for event in events {
                out.push_str(&serde_json::to_string(event)?);
                out.push('\n');
            }
            Ok(out)
        }
        OutputFormat::Json => Ok(format!("{}\n", serde_json::to_string(events)?)),
        OutputFormat::JsonPretty => Ok(format!("{}\n", serde_json::to_string_pretty(events)?)),
    }
}

fn parse_ndjson<T: DeserializeOwned>(data: &str) -> Result<Vec<T>, AttuneCliError> {
    let mut records = Vec::new();
    for (line_num, line) in data.lines().enumerate() {
        let trimmed = line.trim();
        if trimmed.is_empty() {
            continue;
        }
        let record = serde_json::from_str::<T>(trimmed).map_err(|e| {
            AttuneCliError::ParseError(format!("Failed to parse line {}: {}", line_num + 1, e))
        })?;
        records.push(record);
    }
    Ok(records)
}

fn read_input(path: &Path) -> Result<String, AttuneCliError> {
    if path.to_string_lossy() == "-" {
        let mut buffer = String::new();
        io::stdin().read_to_string(&mut buffer)?;
        Ok(buffer)
    } else {
        Ok(fs::read_to_string(path)?)
    }
}

fn write_output(path: &Path, data: &str) -> Result<(), AttuneCliError> {
    if path.to_string_lossy() == "-" {
        let mut stdout = io::stdout();
        stdout.write_all(data.as_bytes())?;
        stdout.flush()?;
    } else {
        fs::write(path, data)?;
    }
    Ok(())
}

// Error handling

#[derive(Debug)]
enum AttuneCliError {
    Io(io::Error),
    Attune(AttuneError),
    Json(serde_json::Error),
    NoRecords(String),
    ParseError(String),
}

impl From<io::Error> for AttuneCliError {
    fn from(e: io::Error) -> Self {
        AttuneCliError::Io(e)
    }
}

impl From<AttuneError> for AttuneCliError {
    fn from(e: AttuneError) -> Self {
        AttuneCliError::Attune(e)
    }
}

impl From<serde_json::Error> for AttuneCliError {
    fn from(e: serde_json::Error) -> Self {
        AttuneCliError::Json(e)
    }
}

#[derive(Serialize)]
struct CliError {
    code: String,
    message: String,
    hint: Option<String>,
}

impl From<AttuneCliError> for CliError {
    fn from(e: AttuneCliError) -> Self {
        match e {
            AttuneCliError::Io(e) => CliError {
                code: "IO_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check file paths and permissions".to_string()),
            },
            AttuneCliError::Attune(e) => {
                let (code, hint) = match &e {
                    AttuneError::InvalidProfile(_) => (
                        "INVALID_PROFILE",
                        "Boundaries must be strictly increasing within [0, 1]",
                    ),
                    AttuneError::InvalidConfig(_) => {
                        ("INVALID_CONFIG", "Run with defaults or fix the named field")
                    }
                    AttuneError::ParseError(_) | AttuneError::JsonError(_) => {
                        ("PARSE_ERROR", "Ensure each line is one JSON record")
                    }
                    AttuneError::ScanCancelled { .. } => ("SCAN_CANCELLED", "Retry the scan"),
                    AttuneError::InsufficientSignal(_) | AttuneError::AlignmentFailure(_) => {
                        ("INSUFFICIENT_DATA", "Provide longer overlapping histories")
                    }
                };
                CliError {
                    code: code.to_string(),
                    message: e.to_string(),
                    hint: Some(hint.to_string()),
                }
            }
            AttuneCliError::Json(e) => CliError {
                code: "JSON_ERROR".to_string(),
                message: e.to_string(),
                hint: Some("Check JSON syntax".to_string()),
            },
            AttuneCliError::NoRecords(what) => CliError {
                code: "NO_RECORDS".to_string(),
                message: format!("No {} found in input", what),
                hint: Some("Ensure input file is not empty".to_string()),
            },
            AttuneCliError::ParseError(msg) => CliError {
                code: "PARSE_ERROR".to_string(),
                message: msg,
                hint: Some("Check input format".to_string()),
            },
        }
    }
}
