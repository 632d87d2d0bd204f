use chrono::{DateTime, NaiveDateTime};
use csv::{ReaderBuilder, StringRecord, Trim};
use log::info;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::{
    error::IngestError,
    signal::{secs_to_micros, Clock, Micros, Recording, Sample},
};

/// Reader settings for acquisition exports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct IngestOptions {
    pub delimiter: u8,
    /// Locate columns by header name instead of position.
    pub has_headers: bool,
}

impl Default for IngestOptions {
    fn default() -> Self {
        Self {
            delimiter: b'\t',
            has_headers: false,
        }
    }
}

/// Column positions of the headerless export: time, subject id, an acquisition
/// marker we drop, pulse, skin response, phase.
#[derive(Debug, Clone, Copy)]
struct Columns {
    time: usize,
    subject_id: Option<usize>,
    primary: usize,
    secondary: Option<usize>,
    phase: Option<usize>,
}

const POSITIONAL: Columns = Columns {
    time: 0,
    subject_id: Some(1),
    primary: 3,
    secondary: Some(4),
    phase: Some(5),
};

const WALL_CLOCK_FORMATS: [&str; 3] = [
    "%Y-%m-%d %H:%M:%S%.f",
    "%Y-%m-%dT%H:%M:%S%.f",
    "%Y/%m/%d %H:%M:%S%.f",
];

pub fn read_recording(path: &Path, opts: &IngestOptions) -> Result<Recording, IngestError> {
    let file = File::open(path).map_err(csv::Error::from)?;
    let recording = read_recording_from(file, opts)?;
    info!(
        "{}: {} samples, {} samples/s, phases {:?}",
        path.display(),
        recording.len(),
        recording
            .modal_samples_per_second()
            .map_or_else(|| "?".to_string(), |n| n.to_string()),
        recording
            .phase_intervals()
            .iter()
            .map(|p| p.name.as_str())
            .collect::<Vec<_>>()
    );
    Ok(recording)
}

pub fn read_recording_from<R: Read>(
    reader: R,
    opts: &IngestOptions,
) -> Result<Recording, IngestError> {
    let mut reader = ReaderBuilder::new()
        .delimiter(opts.delimiter)
        .has_headers(opts.has_headers)
        .flexible(true)
        .trim(Trim::All)
        .from_reader(reader);
    let columns = if opts.has_headers {
        locate_columns(reader.headers()?)?
    } else {
        POSITIONAL
    };

    let mut clock = None;
    let mut samples: Vec<Sample> = Vec::new();
    let mut rows: Vec<u64> = Vec::new();
    for record in reader.records() {
        let record = record?;
        let row = record.position().map_or(0, |p| p.line());
        if record.iter().all(str::is_empty) {
            continue;
        }

        let raw_time = required(&record, columns.time, row, "timestamp")?;
        let (row_clock, time) = parse_timestamp(raw_time, clock).ok_or_else(|| {
            IngestError::Timestamp {
                row,
                value: raw_time.to_string(),
            }
        })?;
        clock = Some(row_clock);

        let primary = parse_optional_f64(
            Some(required(&record, columns.primary, row, "pulse")?),
            row,
            "pulse",
        )?;
        let secondary = parse_optional_f64(
            columns.secondary.and_then(|idx| record.get(idx)),
            row,
            "skin response",
        )?;
        let subject_id = columns
            .subject_id
            .and_then(|idx| record.get(idx))
            .unwrap_or_default()
            .to_string();
        let phase = columns
            .phase
            .and_then(|idx| record.get(idx))
            .filter(|p| !p.is_empty())
            .map(str::to_string);

        samples.push(Sample {
            time,
            subject_id,
            primary,
            secondary,
            phase,
        });
        rows.push(row);
    }

    Recording::with_row_numbers(clock.unwrap_or(Clock::WallClock), samples, |idx| rows[idx])
}

/// Parse a timestamp as wall-clock time or plain seconds. Once the first row
/// fixed the clock, later rows must use the same one.
pub fn parse_timestamp(raw: &str, clock: Option<Clock>) -> Option<(Clock, Micros)> {
    let wall_clock = || {
        WALL_CLOCK_FORMATS
            .iter()
            .find_map(|fmt| NaiveDateTime::parse_from_str(raw, fmt).ok())
            .map(|dt| dt.and_utc().timestamp_micros())
            .or_else(|| {
                DateTime::parse_from_rfc3339(raw)
                    .ok()
                    .map(|dt| dt.timestamp_micros())
            })
            .map(|t| (Clock::WallClock, t))
    };
    let seconds = || {
        raw.parse::<f64>()
            .ok()
            .filter(|s| s.is_finite())
            .map(|s| (Clock::Seconds, secs_to_micros(s)))
    };
    match clock {
        Some(Clock::WallClock) => wall_clock(),
        Some(Clock::Seconds) => seconds(),
        None => wall_clock().or_else(seconds),
    }
}

fn required<'r>(
    record: &'r StringRecord,
    idx: usize,
    row: u64,
    column: &'static str,
) -> Result<&'r str, IngestError> {
    record
        .get(idx)
        .ok_or(IngestError::MissingColumn { row, column })
}

fn parse_optional_f64(
    raw: Option<&str>,
    row: u64,
    column: &'static str,
) -> Result<Option<f64>, IngestError> {
    match raw {
        None | Some("") => Ok(None),
        Some(value) => match value.parse::<f64>() {
            // exporters write NaN for dropped readings
            Ok(v) if v.is_nan() => Ok(None),
            Ok(v) if v.is_finite() => Ok(Some(v)),
            _ => Err(IngestError::Numeric {
                row,
                column,
                value: value.to_string(),
            }),
        },
    }
}

fn locate_columns(headers: &StringRecord) -> Result<Columns, IngestError> {
    let find = |names: &[&str]| {
        headers
            .iter()
            .position(|h| names.iter().any(|n| h.eq_ignore_ascii_case(n)))
    };
    Ok(Columns {
        time: find(&["time", "timestamp"]).ok_or(IngestError::MissingHeader {
            column: "timestamp",
        })?,
        subject_id: find(&["id", "subject_id", "subject"]),
        primary: find(&["bp", "bvp", "pulse", "primary"])
            .ok_or(IngestError::MissingHeader { column: "pulse" })?,
        secondary: find(&["gsr", "eda", "skin_response", "secondary"]),
        phase: find(&["phase"]),
    })
}
