use log::{debug, warn};
use serde::{Deserialize, Serialize};

use crate::{
    error::{require_positive, PipelineError, Stage},
    signal::{micros_to_secs, secs_to_micros, MetricSeries, Micros, Peak},
    window::{centered_median, trailing_mean},
};

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct HeartRateConfig {
    /// Centered rolling median length (seconds). Suppresses missed or extra beats.
    pub median_window_s: f64,
    /// Trailing rolling mean length (seconds), applied after the median.
    pub smoothing_window_s: f64,
}

impl Default for HeartRateConfig {
    fn default() -> Self {
        Self {
            median_window_s: 10.0,
            smoothing_window_s: 2.0,
        }
    }
}

/// Heart rate at one beat, in beats per minute.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HeartRateRecord {
    pub time: Micros,
    /// `None` when the beat shares its timestamp with the previous one.
    pub instantaneous_hr: Option<f64>,
    pub smoothed_hr: Option<f64>,
    pub phase: Option<String>,
}

/// `60 / Δt` for every peak after the first.
pub fn instantaneous_rates(peaks: &[Peak]) -> Vec<(Micros, Option<f64>)> {
    peaks
        .windows(2)
        .map(|w| {
            let dt = micros_to_secs(w[1].time - w[0].time);
            let hr = (dt > 0.0).then(|| 60.0 / dt);
            if hr.is_none() {
                warn!("zero interval between peaks at sample {} and {}", w[0].index, w[1].index);
            }
            (w[1].time, hr)
        })
        .collect()
}

/// Instantaneous rate, then a centered median, then a trailing mean.
pub fn heart_rate(
    peaks: &[Peak],
    cfg: &HeartRateConfig,
) -> Result<Vec<HeartRateRecord>, PipelineError> {
    require_positive(Stage::HeartRate, "median_window_s", cfg.median_window_s)?;
    require_positive(Stage::HeartRate, "smoothing_window_s", cfg.smoothing_window_s)?;
    if peaks.len() < 2 {
        return Err(PipelineError::InsufficientData {
            stage: Stage::HeartRate,
            parameter: "peaks",
            needed: 2,
            available: peaks.len(),
        });
    }

    let (times, rates): (Vec<Micros>, Vec<Option<f64>>) =
        instantaneous_rates(peaks).into_iter().unzip();
    let median = centered_median(&times, &rates, secs_to_micros(cfg.median_window_s));
    let smoothed = trailing_mean(&times, &median, secs_to_micros(cfg.smoothing_window_s));
    debug!("{} heart rate records", times.len());

    Ok(times
        .into_iter()
        .zip(rates)
        .zip(smoothed)
        .map(|((time, instantaneous_hr), smoothed_hr)| HeartRateRecord {
            time,
            instantaneous_hr,
            smoothed_hr,
            phase: None,
        })
        .collect())
}

/// The smoothed rate as a metric series for phase summaries.
pub fn smoothed_series(records: &[HeartRateRecord]) -> MetricSeries {
    MetricSeries {
        times: records.iter().map(|r| r.time).collect(),
        values: records.iter().map(|r| r.smoothed_hr).collect(),
    }
}
