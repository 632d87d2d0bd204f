use anyhow::{bail, Context, Result};
use bvp_lib::{
    config::PipelineConfig,
    detectors::bvp::RestingWindow,
    io::{
        recording::{read_recording, IngestOptions},
        tables::{
            output_path, write_heart_rate, write_heart_rate_summary,
            write_skin_response_summary, HEART_RATE_SUFFIX, HEART_RATE_SUMMARY_SUFFIX,
            SKIN_RESPONSE_SUMMARY_SUFFIX,
        },
    },
    metrics::phase::PhaseSummaryRow,
    pipeline::{run_heart_rate, run_skin_response},
    signal::Recording,
};
use clap::{Args, Parser, Subcommand, ValueEnum};
use log::{error, info};
use serde::Serialize;
use std::{
    fs::File,
    io::BufWriter,
    path::{Path, PathBuf},
};

#[derive(Parser)]
#[command(
    name = "bvp",
    version,
    about = "Heart rate and skin response phase summaries from BVP/GSR recordings"
)]
struct Cli {
    /// Only log warnings and errors
    #[arg(long, global = true)]
    quiet: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Copy, Clone, Debug, ValueEnum)]
enum Delimiter {
    Tab,
    Comma,
    Semicolon,
}

impl Delimiter {
    fn byte(&self) -> u8 {
        match self {
            Delimiter::Tab => b'\t',
            Delimiter::Comma => b',',
            Delimiter::Semicolon => b';',
        }
    }
}

#[derive(Args)]
struct RunArgs {
    /// Recording exported by the acquisition software
    input: PathBuf,
    /// TOML file with pipeline parameters; flags below override it
    #[arg(long)]
    config: Option<PathBuf>,
    #[arg(long, value_enum, default_value = "tab")]
    delimiter: Delimiter,
    /// Input has a header row; columns are located by name
    #[arg(long)]
    headers: bool,
    #[arg(long)]
    offset_scaler: Option<f64>,
    /// Centered rolling mean for onset detection (seconds)
    #[arg(long)]
    smoothing_window_s: Option<f64>,
    #[arg(long)]
    median_window_s: Option<f64>,
    /// Trailing mean applied to the median-filtered heart rate (seconds)
    #[arg(long)]
    hr_smoothing_window_s: Option<f64>,
    /// First sample index of the resting amplitude window
    #[arg(long, requires = "resting_end", conflicts_with = "whole_recording_resting")]
    resting_start: Option<usize>,
    /// End (exclusive) of the resting amplitude window
    #[arg(long, requires = "resting_start")]
    resting_end: Option<usize>,
    /// Measure resting amplitude over the whole recording
    #[arg(long)]
    whole_recording_resting: bool,
    /// Also print summaries as JSON on stdout
    #[arg(long)]
    json: bool,
}

impl RunArgs {
    fn pipeline_config(&self) -> Result<PipelineConfig> {
        let mut cfg = match &self.config {
            Some(path) => PipelineConfig::load(path)?,
            None => PipelineConfig::default(),
        };
        if let Some(v) = self.offset_scaler {
            cfg.peaks.offset_scaler = v;
        }
        if let Some(v) = self.smoothing_window_s {
            cfg.peaks.smoothing_window_s = v;
        }
        if let Some(v) = self.median_window_s {
            cfg.heart_rate.median_window_s = v;
        }
        if let Some(v) = self.hr_smoothing_window_s {
            cfg.heart_rate.smoothing_window_s = v;
        }
        if let (Some(start), Some(end)) = (self.resting_start, self.resting_end) {
            cfg.peaks.resting_window = RestingWindow::Range { start, end };
        }
        if self.whole_recording_resting {
            cfg.peaks.resting_window = RestingWindow::WholeRecording;
        }
        Ok(cfg)
    }

    fn ingest_options(&self) -> IngestOptions {
        IngestOptions {
            delimiter: self.delimiter.byte(),
            has_headers: self.headers,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Detect beats, write per-beat heart rate and a per-phase summary
    HeartRate(RunArgs),
    /// Write the per-phase skin response summary
    SkinResponse(RunArgs),
    /// Run both analyses on one recording
    All(RunArgs),
}

#[derive(Serialize)]
struct JsonReport<'a> {
    input: &'a Path,
    #[serde(skip_serializing_if = "Option::is_none")]
    heart_rate: Option<&'a [PhaseSummaryRow]>,
    #[serde(skip_serializing_if = "Option::is_none")]
    skin_response: Option<&'a [PhaseSummaryRow]>,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let level = if cli.quiet { "warn" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
    match cli.command {
        Commands::HeartRate(args) => cmd_run(&args, true, false)?,
        Commands::SkinResponse(args) => cmd_run(&args, false, true)?,
        Commands::All(args) => cmd_run(&args, true, true)?,
    }
    Ok(())
}

fn load_recording(args: &RunArgs) -> Result<Recording> {
    info!("reading {}", args.input.display());
    read_recording(&args.input, &args.ingest_options())
        .with_context(|| format!("failed to load {}", args.input.display()))
}

fn cmd_run(args: &RunArgs, heart_rate: bool, skin_response: bool) -> Result<()> {
    let cfg = args.pipeline_config()?;
    let recording = load_recording(args)?;

    // the analyses are independent; one failing still writes the other
    let hr = heart_rate.then(|| cmd_heart_rate(&args.input, &recording, &cfg));
    let gsr = skin_response.then(|| cmd_skin_response(&args.input, &recording, &cfg));

    if args.json {
        let report = JsonReport {
            input: &args.input,
            heart_rate: hr.as_ref().and_then(|r| r.as_deref().ok()),
            skin_response: gsr.as_ref().and_then(|r| r.as_deref().ok()),
        };
        println!("{}", serde_json::to_string(&report)?);
    }

    match (hr, gsr) {
        (Some(Err(hr_err)), Some(Err(gsr_err))) => {
            error!("{gsr_err:#}");
            Err(hr_err)
        }
        (Some(Err(err)), _) | (_, Some(Err(err))) => Err(err),
        _ => Ok(()),
    }
}

fn cmd_heart_rate(
    input: &Path,
    recording: &Recording,
    cfg: &PipelineConfig,
) -> Result<Vec<PhaseSummaryRow>> {
    info!("processing heart rate");
    let run = run_heart_rate(recording, cfg, None).context("heart rate pipeline")?;
    let analysis = match run.analysis {
        Ok(analysis) => analysis,
        Err(err) => bail!(
            "heart rate pipeline: {err} ({} peaks detected, offset {:.5})",
            run.detection.peaks.len(),
            run.detection.offset
        ),
    };

    let hr_path = output_path(input, HEART_RATE_SUFFIX);
    let summary_path = output_path(input, HEART_RATE_SUMMARY_SUFFIX);
    info!(
        "writing {} and {}",
        hr_path.display(),
        summary_path.display()
    );
    write_heart_rate(create(&hr_path)?, recording.clock, &analysis.records)
        .with_context(|| format!("writing {}", hr_path.display()))?;
    write_heart_rate_summary(create(&summary_path)?, &analysis.summary)
        .with_context(|| format!("writing {}", summary_path.display()))?;
    Ok(analysis.summary)
}

fn cmd_skin_response(
    input: &Path,
    recording: &Recording,
    cfg: &PipelineConfig,
) -> Result<Vec<PhaseSummaryRow>> {
    info!("processing skin response");
    let rows = run_skin_response(recording, cfg, None).context("skin response pipeline")?;
    let path = output_path(input, SKIN_RESPONSE_SUMMARY_SUFFIX);
    info!("writing {}", path.display());
    write_skin_response_summary(create(&path)?, &rows)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(rows)
}

fn create(path: &Path) -> Result<BufWriter<File>> {
    let file = File::create(path).with_context(|| format!("creating {}", path.display()))?;
    Ok(BufWriter::new(file))
}
