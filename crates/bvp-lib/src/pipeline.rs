//! Batch drivers chaining detection, heart rate and phase summaries.
//!
//! Stages run in order over a fully loaded [`Recording`]; each consumes the
//! previous stage's output by reference. An optional cancellation flag is
//! checked between stages.

use log::info;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};

use crate::{
    config::PipelineConfig,
    detectors::bvp::{detect_peaks, PeakDetection},
    error::{require_positive, PipelineError, Stage},
    metrics::{
        heart_rate::{heart_rate, smoothed_series, HeartRateRecord},
        phase::{select_phases, summarize, PhaseSummaryRow, Reference},
    },
    signal::{secs_to_micros, MetricSeries, Recording},
    window::trailing_mean,
};

/// Heart rate records with their phase labels and the per-phase summary.
#[derive(Debug, Clone, Serialize)]
pub struct HeartRateAnalysis {
    pub records: Vec<HeartRateRecord>,
    pub summary: Vec<PhaseSummaryRow>,
}

/// Peak detection always completes first; the rate stage may still fail
/// (e.g. fewer than two peaks) without discarding the peaks.
#[derive(Debug, Clone)]
pub struct HeartRateRun {
    pub detection: PeakDetection,
    pub analysis: Result<HeartRateAnalysis, PipelineError>,
}

fn checkpoint(cancel: Option<&AtomicBool>, next: Stage) -> Result<(), PipelineError> {
    match cancel {
        Some(flag) if flag.load(Ordering::Relaxed) => Err(PipelineError::Cancelled { stage: next }),
        _ => Ok(()),
    }
}

/// Recording → peaks → heart rate → summary in canonical phase order.
pub fn run_heart_rate(
    recording: &Recording,
    cfg: &PipelineConfig,
    cancel: Option<&AtomicBool>,
) -> Result<HeartRateRun, PipelineError> {
    checkpoint(cancel, Stage::PeakDetection)?;
    let detection = detect_peaks(recording, &cfg.peaks)?;
    info!("{} peaks", detection.peaks.len());
    let analysis = analyze_heart_rate(recording, &detection, cfg, cancel);
    Ok(HeartRateRun {
        detection,
        analysis,
    })
}

fn analyze_heart_rate(
    recording: &Recording,
    detection: &PeakDetection,
    cfg: &PipelineConfig,
    cancel: Option<&AtomicBool>,
) -> Result<HeartRateAnalysis, PipelineError> {
    checkpoint(cancel, Stage::HeartRate)?;
    let records = heart_rate(&detection.peaks, &cfg.heart_rate)?;

    checkpoint(cancel, Stage::PhaseSummary)?;
    let intervals = select_phases(&recording.phase_intervals(), &cfg.phases.canonical_order);
    let summary = summarize(
        &smoothed_series(&records),
        &intervals,
        Reference::Baseline(&cfg.phases.baseline),
    );
    let records = records
        .into_iter()
        .zip(summary.annotations)
        .map(|(record, phase)| HeartRateRecord { phase, ..record })
        .collect();
    Ok(HeartRateAnalysis {
        records,
        summary: summary.rows,
    })
}

/// Skin response per phase in first-seen order, differenced against the
/// preceding phase.
pub fn run_skin_response(
    recording: &Recording,
    cfg: &PipelineConfig,
    cancel: Option<&AtomicBool>,
) -> Result<Vec<PhaseSummaryRow>, PipelineError> {
    checkpoint(cancel, Stage::SkinResponse)?;
    let mut series = recording.secondary_series();
    if let Some(window_s) = cfg.skin_response.smoothing_window_s {
        require_positive(Stage::SkinResponse, "smoothing_window_s", window_s)?;
        series = MetricSeries {
            values: trailing_mean(&series.times, &series.values, secs_to_micros(window_s)),
            times: series.times,
        };
    }
    let intervals = recording.phase_intervals();
    Ok(summarize(&series, &intervals, Reference::PreviousPhase).rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        detectors::bvp::RestingWindow,
        signal::{Clock, Sample},
    };

    /// 100 Hz pulse at 60 bpm during baseline, 90 bpm during stress.
    fn two_phase_recording() -> Recording {
        let fs = 100.0;
        let mut beats = Vec::new();
        let mut t = 0.5;
        while t < 20.0 {
            beats.push(t);
            t += 1.0;
        }
        let mut t = 20.3;
        while t < 40.0 {
            beats.push(t);
            t += 60.0 / 90.0;
        }
        let samples = (0..(40.0 * fs) as i64)
            .map(|i| {
                let secs = i as f64 / fs;
                let pulse: f64 = beats
                    .iter()
                    .map(|b| (-0.5 * ((secs - b) / 0.04).powi(2)).exp())
                    .sum();
                let baseline = secs < 20.0;
                Sample {
                    time: i * 10_000,
                    subject_id: "S01".into(),
                    primary: Some(0.5 + pulse),
                    secondary: Some(if baseline { 2.0 } else { 3.5 }),
                    phase: Some(if baseline { "baseline" } else { "stress" }.into()),
                }
            })
            .collect();
        Recording::new(Clock::Seconds, samples).unwrap()
    }

    #[test]
    fn heart_rate_summary_follows_canonical_order() {
        let rec = two_phase_recording();
        let run = run_heart_rate(&rec, &PipelineConfig::default(), None).unwrap();
        let analysis = run.analysis.unwrap();
        assert_eq!(analysis.records.len(), run.detection.peaks.len() - 1);
        let phases: Vec<_> = analysis.summary.iter().map(|r| r.phase.as_str()).collect();
        assert_eq!(phases, vec!["baseline", "stress"]);
        let baseline = &analysis.summary[0];
        let stress = &analysis.summary[1];
        assert_eq!(baseline.diff_from_baseline, Some(0.0));
        let base_mean = baseline.mean_value.unwrap();
        let stress_mean = stress.mean_value.unwrap();
        assert!((58.0..70.0).contains(&base_mean), "baseline {base_mean}");
        assert!((85.0..92.0).contains(&stress_mean), "stress {stress_mean}");
        assert!(analysis
            .records
            .iter()
            .any(|r| r.phase.as_deref() == Some("stress")));
    }

    #[test]
    fn skin_response_differences_previous_phase() {
        let rec = two_phase_recording();
        let rows = run_skin_response(&rec, &PipelineConfig::default(), None).unwrap();
        assert_eq!(rows.len(), 2);
        assert_eq!(rows[0].phase, "baseline");
        assert_eq!(rows[0].mean_value, Some(2.0));
        assert_eq!(rows[0].diff_from_baseline, Some(0.0));
        assert_eq!(rows[1].mean_value, Some(3.5));
        assert_eq!(rows[1].diff_from_baseline, Some(1.5));
    }

    #[test]
    fn skin_response_keeps_first_seen_order() {
        let phases = [("stress", 5.0), ("baseline", 2.0), ("recovery", 3.0)];
        let samples = phases
            .iter()
            .enumerate()
            .flat_map(|(p, &(name, level))| {
                (0..10).map(move |i| Sample {
                    time: (p as i64 * 10 + i) * 100_000,
                    subject_id: "S01".into(),
                    primary: Some(0.0),
                    secondary: Some(level),
                    phase: Some(name.into()),
                })
            })
            .collect();
        let rec = Recording::new(Clock::Seconds, samples).unwrap();
        let rows = run_skin_response(&rec, &PipelineConfig::default(), None).unwrap();
        let order: Vec<_> = rows.iter().map(|r| r.phase.as_str()).collect();
        assert_eq!(order, vec!["stress", "baseline", "recovery"]);
        let diffs: Vec<_> = rows.iter().map(|r| r.diff_from_baseline).collect();
        assert_eq!(diffs, vec![Some(0.0), Some(-3.0), Some(1.0)]);
    }

    #[test]
    fn nan_cell_does_not_hide_later_beats() {
        use crate::io::recording::{read_recording_from, IngestOptions};

        let export = |gap: &str| -> String {
            (0..4000)
                .map(|i| {
                    let secs = i as f64 / 100.0;
                    let phase = (secs - 0.5).rem_euclid(1.0);
                    let pulse = 0.5 + (-0.5 * (phase.min(1.0 - phase) / 0.04).powi(2)).exp();
                    let cell = if i == 500 { gap.to_string() } else { pulse.to_string() };
                    format!("{secs}\tS01\tx\t{cell}\t1.0\tbaseline\n")
                })
                .collect()
        };
        let mut cfg = PipelineConfig::default();
        cfg.peaks.resting_window = RestingWindow::WholeRecording;
        let peaks = |text: String| {
            let rec = read_recording_from(text.as_bytes(), &IngestOptions::default()).unwrap();
            run_heart_rate(&rec, &cfg, None).unwrap().detection.peaks
        };

        let clean = peaks(export("0.5"));
        let gapped = peaks(export("NaN"));
        assert!(clean.len() > 30, "{} peaks", clean.len());
        assert_eq!(gapped.len(), clean.len());
        assert_eq!(gapped.last().map(|p| p.time), clean.last().map(|p| p.time));
    }

    #[test]
    fn too_few_peaks_keeps_detection() {
        let samples = (0..2500)
            .map(|i| Sample {
                time: i * 10_000,
                subject_id: "S01".into(),
                primary: Some(1.0),
                secondary: None,
                phase: None,
            })
            .collect();
        let rec = Recording::new(Clock::Seconds, samples).unwrap();
        let run = run_heart_rate(&rec, &PipelineConfig::default(), None).unwrap();
        assert!(run.detection.peaks.is_empty());
        assert!(matches!(
            run.analysis,
            Err(PipelineError::InsufficientData {
                stage: Stage::HeartRate,
                ..
            })
        ));
    }

    #[test]
    fn short_recording_fails_detection_with_tail_window() {
        let samples = (0..100)
            .map(|i| Sample {
                time: i * 10_000,
                subject_id: "S01".into(),
                primary: Some(1.0),
                secondary: None,
                phase: None,
            })
            .collect();
        let rec = Recording::new(Clock::Seconds, samples).unwrap();
        let err = run_heart_rate(&rec, &PipelineConfig::default(), None).unwrap_err();
        assert!(matches!(
            err,
            PipelineError::InsufficientData {
                parameter: "resting_window",
                ..
            }
        ));

        let mut cfg = PipelineConfig::default();
        cfg.peaks.resting_window = RestingWindow::WholeRecording;
        assert!(run_heart_rate(&rec, &cfg, None).is_ok());
    }

    #[test]
    fn cancellation_stops_before_first_stage() {
        let rec = two_phase_recording();
        let flag = AtomicBool::new(true);
        let err = run_heart_rate(&rec, &PipelineConfig::default(), Some(&flag)).unwrap_err();
        assert_eq!(
            err,
            PipelineError::Cancelled {
                stage: Stage::PeakDetection
            }
        );
        let err = run_skin_response(&rec, &PipelineConfig::default(), Some(&flag)).unwrap_err();
        assert_eq!(
            err,
            PipelineError::Cancelled {
                stage: Stage::SkinResponse
            }
        );
    }
}
