use std::fmt;

use thiserror::Error;

use crate::signal::Micros;

/// Pipeline stage an error belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    PeakDetection,
    HeartRate,
    PhaseSummary,
    SkinResponse,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::PeakDetection => "peak detection",
            Stage::HeartRate => "heart rate",
            Stage::PhaseSummary => "phase summary",
            Stage::SkinResponse => "skin response summary",
        };
        f.write_str(name)
    }
}

/// Problems with the shape of an input recording. Raised before any stage runs.
#[derive(Debug, Error)]
pub enum IngestError {
    #[error("recording has no samples")]
    Empty,
    #[error("row {row}: missing {column} column")]
    MissingColumn { row: u64, column: &'static str },
    #[error("header has no {column} column")]
    MissingHeader { column: &'static str },
    #[error("row {row}: cannot parse timestamp '{value}'")]
    Timestamp { row: u64, value: String },
    #[error("row {row}: {column} value '{value}' is not numeric")]
    Numeric {
        row: u64,
        column: &'static str,
        value: String,
    },
    #[error("row {row}: timestamp goes backwards ({previous}us -> {current}us)")]
    Backwards {
        row: u64,
        previous: Micros,
        current: Micros,
    },
    #[error("reading delimited input")]
    Csv(#[from] csv::Error),
}

/// Stage-local failures. Outputs of earlier stages stay valid.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PipelineError {
    #[error("{stage}: {parameter} needs at least {needed} values, got {available}")]
    InsufficientData {
        stage: Stage,
        parameter: &'static str,
        needed: usize,
        available: usize,
    },
    #[error("{stage}: {parameter} {start}..{end} lies outside a recording of {len} samples")]
    OutOfBounds {
        stage: Stage,
        parameter: &'static str,
        start: usize,
        end: usize,
        len: usize,
    },
    #[error("{stage}: {parameter} must be positive, got {value}")]
    InvalidParameter {
        stage: Stage,
        parameter: &'static str,
        value: f64,
    },
    #[error("cancelled before {stage}")]
    Cancelled { stage: Stage },
}

/// Rejects non-positive or non-finite parameters.
pub(crate) fn require_positive(
    stage: Stage,
    parameter: &'static str,
    value: f64,
) -> Result<(), PipelineError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(PipelineError::InvalidParameter {
            stage,
            parameter,
            value,
        })
    }
}
