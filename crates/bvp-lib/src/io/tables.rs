use csv::WriterBuilder;
use serde::Serialize;
use std::io::Write;
use std::path::{Path, PathBuf};

use crate::{
    metrics::{heart_rate::HeartRateRecord, phase::PhaseSummaryRow},
    signal::Clock,
};

pub const HEART_RATE_SUFFIX: &str = "_hr";
pub const HEART_RATE_SUMMARY_SUFFIX: &str = "_summary";
pub const SKIN_RESPONSE_SUMMARY_SUFFIX: &str = "_summary_gsr";

#[derive(Serialize)]
struct HeartRateRow<'a> {
    timestamp: String,
    instantaneous_hr: Option<f64>,
    smoothed_hr: Option<f64>,
    phase: Option<&'a str>,
}

#[derive(Serialize)]
struct SummaryRow<'a> {
    phase: &'a str,
    mean: Option<f64>,
    diff_from_baseline: Option<f64>,
}

/// One row per beat. Missing values are written as empty fields.
pub fn write_heart_rate<W: Write>(
    out: W,
    clock: Clock,
    records: &[HeartRateRecord],
) -> Result<(), csv::Error> {
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(out);
    writer.write_record(["timestamp", "instantaneous_hr", "smoothed_hr", "phase"])?;
    for record in records {
        writer.serialize(HeartRateRow {
            timestamp: clock.format(record.time),
            instantaneous_hr: record.instantaneous_hr,
            smoothed_hr: record.smoothed_hr,
            phase: record.phase.as_deref(),
        })?;
    }
    writer.flush()?;
    Ok(())
}

pub fn write_heart_rate_summary<W: Write>(
    out: W,
    rows: &[PhaseSummaryRow],
) -> Result<(), csv::Error> {
    write_summary(out, "mean_hr", rows)
}

pub fn write_skin_response_summary<W: Write>(
    out: W,
    rows: &[PhaseSummaryRow],
) -> Result<(), csv::Error> {
    write_summary(out, "mean_value", rows)
}

fn write_summary<W: Write>(
    out: W,
    mean_column: &str,
    rows: &[PhaseSummaryRow],
) -> Result<(), csv::Error> {
    let mut writer = WriterBuilder::new().has_headers(false).from_writer(out);
    writer.write_record(["phase", mean_column, "diff_from_baseline"])?;
    for row in rows {
        writer.serialize(SummaryRow {
            phase: &row.phase,
            mean: row.mean_value,
            diff_from_baseline: row.diff_from_baseline,
        })?;
    }
    writer.flush()?;
    Ok(())
}

/// `dir/name.ext` becomes `dir/name<suffix>.ext`; without an extension the
/// suffix is simply appended.
pub fn output_path(input: &Path, suffix: &str) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    let name = match input.extension() {
        Some(ext) => format!("{stem}{suffix}.{}", ext.to_string_lossy()),
        None => format!("{stem}{suffix}"),
    };
    input.with_file_name(name)
}
