use serde::{Deserialize, Serialize};

use crate::error::IngestError;

/// Timestamps are integer microseconds on the recording's clock.
pub type Micros = i64;

pub const MICROS_PER_SECOND: f64 = 1_000_000.0;

pub fn secs_to_micros(secs: f64) -> Micros {
    (secs * MICROS_PER_SECOND).round() as Micros
}

pub fn micros_to_secs(us: Micros) -> f64 {
    us as f64 / MICROS_PER_SECOND
}

/// How the source file expressed time; outputs are written back the same way.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Clock {
    /// Calendar date and time of day, microseconds since the Unix epoch.
    WallClock,
    /// Plain seconds.
    Seconds,
}

impl Clock {
    pub fn format(&self, t: Micros) -> String {
        match self {
            Clock::WallClock => match chrono::DateTime::from_timestamp_micros(t) {
                Some(dt) => dt.naive_utc().format("%Y-%m-%d %H:%M:%S%.6f").to_string(),
                None => t.to_string(),
            },
            Clock::Seconds => micros_to_secs(t).to_string(),
        }
    }
}

/// One sensor reading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Sample {
    pub time: Micros,
    pub subject_id: String,
    /// Blood-volume-pulse channel; `None` when the field was empty.
    pub primary: Option<f64>,
    /// Skin response channel.
    pub secondary: Option<f64>,
    pub phase: Option<String>,
}

/// A fully loaded recording, ordered by non-decreasing timestamp.
#[derive(Debug, Clone)]
pub struct Recording {
    pub clock: Clock,
    samples: Vec<Sample>,
}

impl Recording {
    /// Validates that the recording is non-empty and that time never runs backwards.
    /// Duplicate timestamps are kept. Errors count rows from 1 in sample order.
    pub fn new(clock: Clock, samples: Vec<Sample>) -> Result<Self, IngestError> {
        Self::with_row_numbers(clock, samples, |idx| idx as u64 + 1)
    }

    /// Like [`Recording::new`], with `row_of` mapping a sample index to the
    /// input line it was read from.
    pub fn with_row_numbers(
        clock: Clock,
        samples: Vec<Sample>,
        row_of: impl Fn(usize) -> u64,
    ) -> Result<Self, IngestError> {
        if samples.is_empty() {
            return Err(IngestError::Empty);
        }
        if let Some(idx) = samples.windows(2).position(|w| w[1].time < w[0].time) {
            return Err(IngestError::Backwards {
                row: row_of(idx + 1),
                previous: samples[idx].time,
                current: samples[idx + 1].time,
            });
        }
        Ok(Self { clock, samples })
    }

    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    pub fn len(&self) -> usize {
        self.samples.len()
    }

    pub fn is_empty(&self) -> bool {
        self.samples.is_empty()
    }

    pub fn times(&self) -> Vec<Micros> {
        self.samples.iter().map(|s| s.time).collect()
    }

    pub fn primary(&self) -> Vec<Option<f64>> {
        self.samples.iter().map(|s| s.primary).collect()
    }

    pub fn secondary_series(&self) -> MetricSeries {
        MetricSeries {
            times: self.times(),
            values: self.samples.iter().map(|s| s.secondary).collect(),
        }
    }

    /// Phase labels with their first and last timestamp, in order of first appearance.
    pub fn phase_intervals(&self) -> Vec<PhaseInterval> {
        let mut out: Vec<PhaseInterval> = Vec::new();
        for sample in &self.samples {
            let Some(name) = sample.phase.as_deref() else {
                continue;
            };
            match out.iter_mut().find(|p| p.name == name) {
                Some(interval) => {
                    interval.start = interval.start.min(sample.time);
                    interval.end = interval.end.max(sample.time);
                }
                None => out.push(PhaseInterval {
                    name: name.to_string(),
                    start: sample.time,
                    end: sample.time,
                }),
            }
        }
        out
    }

    /// Most frequent number of samples falling in one whole second (ties go to the
    /// smaller count).
    pub fn modal_samples_per_second(&self) -> Option<usize> {
        let mut counts: Vec<usize> = Vec::new();
        let mut current: Option<(Micros, usize)> = None;
        for sample in &self.samples {
            let bin = sample.time.div_euclid(1_000_000);
            current = match current {
                Some((b, n)) if b == bin => Some((b, n + 1)),
                Some((_, n)) => {
                    counts.push(n);
                    Some((bin, 1))
                }
                None => Some((bin, 1)),
            };
        }
        if let Some((_, n)) = current {
            counts.push(n);
        }
        counts.sort_unstable();
        let mut best: Option<(usize, usize)> = None;
        for chunk in counts.chunk_by(|a, b| a == b) {
            let (value, freq) = (chunk[0], chunk.len());
            if best.map_or(true, |(_, f)| freq > f) {
                best = Some((value, freq));
            }
        }
        best.map(|(value, _)| value)
    }
}

/// A labelled experiment segment bounded by its first and last sample.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PhaseInterval {
    pub name: String,
    pub start: Micros,
    pub end: Micros,
}

impl PhaseInterval {
    /// Strictly inside the interval; the boundary samples themselves are excluded.
    pub fn contains(&self, t: Micros) -> bool {
        self.start < t && t < self.end
    }
}

/// Time-indexed metric values with gaps.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricSeries {
    pub times: Vec<Micros>,
    pub values: Vec<Option<f64>>,
}

impl MetricSeries {
    pub fn len(&self) -> usize {
        self.values.len()
    }

    pub fn is_empty(&self) -> bool {
        self.values.is_empty()
    }
}

/// One detected beat.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Peak {
    /// Sample index in the recording.
    pub index: usize,
    pub time: Micros,
    pub value: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample(time: Micros, phase: Option<&str>) -> Sample {
        Sample {
            time,
            subject_id: "S01".into(),
            primary: Some(0.0),
            secondary: Some(1.0),
            phase: phase.map(str::to_string),
        }
    }

    #[test]
    fn rejects_empty_and_backwards() {
        assert!(matches!(
            Recording::new(Clock::Seconds, Vec::new()),
            Err(IngestError::Empty)
        ));
        let err = Recording::new(Clock::Seconds, vec![sample(10, None), sample(5, None)])
            .unwrap_err();
        assert!(matches!(err, IngestError::Backwards { row: 2, .. }));
    }

    #[test]
    fn backwards_row_uses_supplied_numbering() {
        let samples = vec![sample(0, None), sample(10, None), sample(5, None)];
        let err = Recording::with_row_numbers(Clock::Seconds, samples, |idx| idx as u64 + 7)
            .unwrap_err();
        assert!(matches!(
            err,
            IngestError::Backwards {
                row: 9,
                previous: 10,
                current: 5
            }
        ));
    }

    #[test]
    fn keeps_duplicate_timestamps() {
        let rec = Recording::new(Clock::Seconds, vec![sample(10, None), sample(10, None)])
            .expect("duplicates allowed");
        assert_eq!(rec.len(), 2);
    }

    #[test]
    fn phase_intervals_follow_first_appearance() {
        let rec = Recording::new(
            Clock::Seconds,
            vec![
                sample(0, Some("control")),
                sample(1, None),
                sample(2, Some("control")),
                sample(3, Some("experiment")),
                sample(4, Some("experiment")),
            ],
        )
        .unwrap();
        let intervals = rec.phase_intervals();
        assert_eq!(intervals.len(), 2);
        assert_eq!(intervals[0].name, "control");
        assert_eq!((intervals[0].start, intervals[0].end), (0, 2));
        assert_eq!(intervals[1].name, "experiment");
        assert!(!intervals[0].contains(0));
        assert!(intervals[0].contains(1));
        assert!(!intervals[0].contains(2));
    }

    #[test]
    fn modal_rate_prefers_smaller_count_on_tie() {
        // bins: 0s -> 3 samples, 1s -> 2 samples, 2s -> 2 samples, 3s -> 3 samples
        let times = [
            0, 300_000, 600_000, 1_000_000, 1_500_000, 2_000_000, 2_500_000, 3_000_000, 3_100_000,
            3_200_000,
        ];
        let samples = times.iter().map(|&t| sample(t, None)).collect();
        let rec = Recording::new(Clock::Seconds, samples).unwrap();
        assert_eq!(rec.modal_samples_per_second(), Some(2));
    }

    #[test]
    fn clock_formats() {
        assert_eq!(Clock::Seconds.format(1_500_000), "1.5");
        assert_eq!(
            Clock::WallClock.format(1_614_852_000_250_000),
            "2021-03-04 10:00:00.250000"
        );
    }
}
