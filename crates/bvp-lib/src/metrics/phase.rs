use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::signal::{MetricSeries, PhaseInterval};

/// Default summary order for the heart-rate path.
pub const CANONICAL_PHASES: [&str; 4] = ["baseline", "stress", "experiment", "control"];
pub const BASELINE_PHASE: &str = "baseline";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PhaseConfig {
    /// Phases summarized for heart rate, in output order. Others are ignored.
    pub canonical_order: Vec<String>,
    /// Phase whose mean every later phase is differenced against.
    pub baseline: String,
}

impl Default for PhaseConfig {
    fn default() -> Self {
        Self {
            canonical_order: CANONICAL_PHASES.iter().map(|p| p.to_string()).collect(),
            baseline: BASELINE_PHASE.to_string(),
        }
    }
}

/// What `diff_from_baseline` is measured against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Reference<'a> {
    /// The mean of the named phase once it has been summarized; 0 before that.
    Baseline(&'a str),
    /// The mean of the phase summarized just before; 0 for the first phase.
    PreviousPhase,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSummaryRow {
    pub phase: String,
    pub mean_value: Option<f64>,
    pub diff_from_baseline: Option<f64>,
}

/// Per-sample phase labels alongside the summary rows.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PhaseSummary {
    pub annotations: Vec<Option<String>>,
    pub rows: Vec<PhaseSummaryRow>,
}

/// Intervals for the phases named in `order`, in that order, skipping absent ones.
pub fn select_phases(intervals: &[PhaseInterval], order: &[String]) -> Vec<PhaseInterval> {
    for interval in intervals {
        if !order.contains(&interval.name) {
            debug!("phase '{}' is not summarized", interval.name);
        }
    }
    order
        .iter()
        .filter_map(|name| intervals.iter().find(|i| &i.name == name).cloned())
        .collect()
}

/// Phase label per sample by strict interval membership. Later intervals win
/// where they overlap.
pub fn annotate(series: &MetricSeries, intervals: &[PhaseInterval]) -> Vec<Option<String>> {
    series
        .times
        .iter()
        .map(|&t| {
            intervals
                .iter()
                .rev()
                .find(|interval| interval.contains(t))
                .map(|interval| interval.name.clone())
        })
        .collect()
}

/// Mean of the defined values strictly inside the interval.
pub fn phase_mean(series: &MetricSeries, interval: &PhaseInterval) -> Option<f64> {
    let (sum, count) = series
        .times
        .iter()
        .zip(&series.values)
        .filter(|(t, _)| interval.contains(**t))
        .filter_map(|(_, v)| v.filter(|x| x.is_finite()))
        .fold((0.0, 0usize), |(sum, count), v| (sum + v, count + 1));
    (count > 0).then(|| sum / count as f64)
}

/// Value subtracted from a phase mean.
#[derive(Debug, Clone, Copy)]
enum Subtrahend {
    Unset,
    Mean(Option<f64>),
}

impl Subtrahend {
    fn value(self) -> Option<f64> {
        match self {
            Subtrahend::Unset => Some(0.0),
            Subtrahend::Mean(mean) => mean,
        }
    }
}

/// Annotate the series and summarize each interval, in the order given.
pub fn summarize(
    series: &MetricSeries,
    intervals: &[PhaseInterval],
    reference: Reference<'_>,
) -> PhaseSummary {
    let annotations = annotate(series, intervals);
    let (rows, _) = intervals.iter().fold(
        (Vec::with_capacity(intervals.len()), Subtrahend::Unset),
        |(mut rows, subtrahend), interval| {
            let mean = phase_mean(series, interval);
            if mean.is_none() {
                warn!("phase '{}' has no values inside its interval", interval.name);
            }
            let (diff, next) = match reference {
                Reference::Baseline(name) => {
                    let subtrahend = match subtrahend {
                        Subtrahend::Unset if interval.name == name => Subtrahend::Mean(mean),
                        other => other,
                    };
                    (difference(mean, subtrahend.value()), subtrahend)
                }
                Reference::PreviousPhase => {
                    let diff = match subtrahend {
                        Subtrahend::Unset => Some(0.0),
                        Subtrahend::Mean(prev) => difference(mean, prev),
                    };
                    (diff, Subtrahend::Mean(mean))
                }
            };
            rows.push(PhaseSummaryRow {
                phase: interval.name.clone(),
                mean_value: mean,
                diff_from_baseline: diff,
            });
            (rows, next)
        },
    );
    PhaseSummary { annotations, rows }
}

fn difference(mean: Option<f64>, subtrahend: Option<f64>) -> Option<f64> {
    mean.zip(subtrahend).map(|(m, s)| m - s)
}
