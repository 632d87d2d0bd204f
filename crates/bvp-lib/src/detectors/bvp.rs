use std::ops::Range;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::{
    error::{require_positive, PipelineError, Stage},
    signal::{secs_to_micros, Micros, Peak, Recording},
    window::{backfill, centered_mean, trailing_mean},
};

/// Samples in the default resting window.
pub const RESTING_TAIL_LEN: usize = 1000;
/// Samples between the end of the default resting window and the end of the recording.
pub const RESTING_TAIL_GAP: usize = 1000;

/// Where the resting amplitude is measured.
///
/// The estimate only means something if the window holds clean, artifact-free
/// pulse data. A bad window degrades every peak downstream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RestingWindow {
    /// Sample indices `[n - 2000, n - 1000)`.
    #[default]
    Tail,
    /// Explicit sample index range, end exclusive.
    Range { start: usize, end: usize },
    /// Every sample in the recording. Only used when asked for.
    WholeRecording,
}

/// Configurable parameters for BVP beat detection.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PeakDetectorConfig {
    /// Divides the resting amplitude to get the onset offset.
    pub offset_scaler: f64,
    /// Centered rolling mean length (seconds).
    pub smoothing_window_s: f64,
    /// Trailing moving average applied to the raw pulse before anything else (seconds).
    pub signal_smoothing_window_s: f64,
    pub resting_window: RestingWindow,
}

impl Default for PeakDetectorConfig {
    fn default() -> Self {
        Self {
            offset_scaler: 6.0,
            smoothing_window_s: 3.0,
            signal_smoothing_window_s: 0.050,
            resting_window: RestingWindow::Tail,
        }
    }
}

/// How a peak field is resolved from the samples of its period.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregation {
    /// Largest value of the field itself.
    Max,
    /// Taken from the sample holding the largest pulse value, first one on ties.
    ArgmaxOfPrimary,
}

/// Per-field aggregation policy for turning an onset period into a [`Peak`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PeakAggregation {
    pub index: Aggregation,
    pub time: Aggregation,
    pub value: Aggregation,
}

pub const PEAK_AGGREGATION: PeakAggregation = PeakAggregation {
    index: Aggregation::ArgmaxOfPrimary,
    time: Aggregation::ArgmaxOfPrimary,
    value: Aggregation::Max,
};

/// Everything the detector computed, kept for inspection and export.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeakDetection {
    /// Pulse signal after the short trailing average and back-fill.
    pub smoothed: Vec<Option<f64>>,
    pub rolling_mean: Vec<Option<f64>>,
    pub resting_range: f64,
    pub offset: f64,
    pub onset: Vec<bool>,
    /// 1-based run number per sample.
    pub periods: Vec<usize>,
    pub peaks: Vec<Peak>,
}

/// Smooth the pulse channel of a recording and detect beats on it.
pub fn detect_peaks(
    recording: &Recording,
    cfg: &PeakDetectorConfig,
) -> Result<PeakDetection, PipelineError> {
    require_positive(
        Stage::PeakDetection,
        "signal_smoothing_window_s",
        cfg.signal_smoothing_window_s,
    )?;
    let times = recording.times();
    let smoothed = smooth_signal(&times, &recording.primary(), cfg.signal_smoothing_window_s);
    detect_peaks_in(&times, smoothed, cfg)
}

/// Trailing moving average with back-fill of the leading gaps.
pub fn smooth_signal(times: &[Micros], raw: &[Option<f64>], window_s: f64) -> Vec<Option<f64>> {
    let mut smoothed = trailing_mean(times, raw, secs_to_micros(window_s));
    backfill(&mut smoothed);
    smoothed
}

/// Detect beats on an already smoothed signal.
pub fn detect_peaks_in(
    times: &[Micros],
    smoothed: Vec<Option<f64>>,
    cfg: &PeakDetectorConfig,
) -> Result<PeakDetection, PipelineError> {
    require_positive(Stage::PeakDetection, "offset_scaler", cfg.offset_scaler)?;
    require_positive(
        Stage::PeakDetection,
        "smoothing_window_s",
        cfg.smoothing_window_s,
    )?;

    let resting_range = resting_range(&smoothed, cfg.resting_window)?;
    let offset = resting_range / cfg.offset_scaler;
    info!("offset {offset:.5} (resting range {resting_range:.5})");

    let rolling_mean = centered_mean(times, &smoothed, secs_to_micros(cfg.smoothing_window_s));
    let onset: Vec<bool> = smoothed
        .iter()
        .zip(&rolling_mean)
        .map(|(value, mean)| match (value, mean) {
            (Some(v), Some(m)) => *v > m + offset,
            _ => false,
        })
        .collect();
    let periods = number_periods(&onset);
    let peaks: Vec<Peak> = onset_runs(&onset)
        .filter_map(|run| aggregate_period(times, &smoothed, run, &PEAK_AGGREGATION))
        .collect();
    debug!(
        "{} periods, {} peaks",
        periods.last().copied().unwrap_or(0),
        peaks.len()
    );

    Ok(PeakDetection {
        smoothed,
        rolling_mean,
        resting_range,
        offset,
        onset,
        periods,
        peaks,
    })
}

/// Peak-to-trough amplitude over the configured resting window.
pub fn resting_range(signal: &[Option<f64>], window: RestingWindow) -> Result<f64, PipelineError> {
    let n = signal.len();
    let range = match window {
        RestingWindow::Tail => {
            let needed = RESTING_TAIL_LEN + RESTING_TAIL_GAP;
            if n < needed {
                return Err(PipelineError::InsufficientData {
                    stage: Stage::PeakDetection,
                    parameter: "resting_window",
                    needed,
                    available: n,
                });
            }
            n - needed..n - RESTING_TAIL_GAP
        }
        RestingWindow::Range { start, end } => {
            if start > end || end > n {
                return Err(PipelineError::OutOfBounds {
                    stage: Stage::PeakDetection,
                    parameter: "resting_window",
                    start,
                    end,
                    len: n,
                });
            }
            start..end
        }
        RestingWindow::WholeRecording => 0..n,
    };

    signal[range]
        .iter()
        .flatten()
        .fold(None, |acc: Option<(f64, f64)>, &v| match acc {
            Some((lo, hi)) => Some((lo.min(v), hi.max(v))),
            None => Some((v, v)),
        })
        .map(|(lo, hi)| hi - lo)
        .ok_or(PipelineError::InsufficientData {
            stage: Stage::PeakDetection,
            parameter: "resting_window",
            needed: 1,
            available: 0,
        })
}

/// Run number per sample: starts at 1 and steps whenever the flag flips.
pub fn number_periods(onset: &[bool]) -> Vec<usize> {
    let mut out = Vec::with_capacity(onset.len());
    let mut period = 0usize;
    let mut prev = None;
    for &flag in onset {
        if prev != Some(flag) {
            period += 1;
        }
        out.push(period);
        prev = Some(flag);
    }
    out
}

/// Maximal runs of `true`.
fn onset_runs(onset: &[bool]) -> impl Iterator<Item = Range<usize>> + '_ {
    let mut i = 0usize;
    std::iter::from_fn(move || {
        while i < onset.len() && !onset[i] {
            i += 1;
        }
        if i >= onset.len() {
            return None;
        }
        let start = i;
        while i < onset.len() && onset[i] {
            i += 1;
        }
        Some(start..i)
    })
}

fn aggregate_period(
    times: &[Micros],
    signal: &[Option<f64>],
    run: Range<usize>,
    policy: &PeakAggregation,
) -> Option<Peak> {
    let argmax = first_argmax(&signal[run.clone()])? + run.start;
    let row = |field: PeakField, aggregation: Aggregation| match (aggregation, field) {
        (Aggregation::ArgmaxOfPrimary, _) | (Aggregation::Max, PeakField::Value) => argmax,
        // index and time only grow within a run
        (Aggregation::Max, PeakField::Index | PeakField::Time) => run.end - 1,
    };
    Some(Peak {
        index: row(PeakField::Index, policy.index),
        time: times[row(PeakField::Time, policy.time)],
        value: signal[row(PeakField::Value, policy.value)]?,
    })
}

#[derive(Debug, Clone, Copy)]
enum PeakField {
    Index,
    Time,
    Value,
}

fn first_argmax(values: &[Option<f64>]) -> Option<usize> {
    let mut best: Option<(usize, f64)> = None;
    for (idx, value) in values.iter().enumerate() {
        let Some(v) = *value else { continue };
        if best.map_or(true, |(_, b)| v > b) {
            best = Some((idx, v));
        }
    }
    best.map(|(idx, _)| idx)
}
