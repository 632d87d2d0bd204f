use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::{
    detectors::bvp::PeakDetectorConfig, metrics::heart_rate::HeartRateConfig,
    metrics::phase::PhaseConfig,
};

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SkinResponseConfig {
    /// Optional trailing moving average over the skin response channel (seconds).
    /// Unset means the raw channel is summarized.
    pub smoothing_window_s: Option<f64>,
}

/// Every tunable of the pipeline. All fields are optional in TOML.
///
/// ```toml
/// [peaks]
/// offset_scaler = 6.0
/// smoothing_window_s = 3.0
/// resting_window = { range = { start = 0, end = 1000 } }
///
/// [heart_rate]
/// median_window_s = 10.0
///
/// [phases]
/// canonical_order = ["baseline", "stress"]
/// ```
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub peaks: PeakDetectorConfig,
    pub heart_rate: HeartRateConfig,
    pub phases: PhaseConfig,
    pub skin_response: SkinResponseConfig,
}

impl PipelineConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        toml::from_str(text).context("parsing pipeline config")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_toml_str(&text).with_context(|| format!("in {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detectors::bvp::RestingWindow;

    #[test]
    fn empty_config_is_default() {
        let cfg = PipelineConfig::from_toml_str("").unwrap();
        assert_eq!(cfg, PipelineConfig::default());
        assert_eq!(cfg.peaks.offset_scaler, 6.0);
        assert_eq!(cfg.heart_rate.median_window_s, 10.0);
        assert_eq!(cfg.phases.canonical_order[0], "baseline");
    }

    #[test]
    fn partial_sections_keep_other_defaults() {
        let cfg = PipelineConfig::from_toml_str(
            r#"
            [peaks]
            offset_scaler = 4.0
            resting_window = { range = { start = 10, end = 500 } }

            [phases]
            canonical_order = ["stress", "baseline"]

            [skin_response]
            smoothing_window_s = 0.5
            "#,
        )
        .unwrap();
        assert_eq!(cfg.peaks.offset_scaler, 4.0);
        assert_eq!(cfg.peaks.smoothing_window_s, 3.0);
        assert_eq!(
            cfg.peaks.resting_window,
            RestingWindow::Range { start: 10, end: 500 }
        );
        assert_eq!(cfg.phases.baseline, "baseline");
        assert_eq!(cfg.phases.canonical_order, vec!["stress", "baseline"]);
        assert_eq!(cfg.skin_response.smoothing_window_s, Some(0.5));
        assert_eq!(cfg.heart_rate, HeartRateConfig::default());
    }

    #[test]
    fn whole_recording_window_by_name() {
        let cfg = PipelineConfig::from_toml_str("[peaks]\nresting_window = \"whole_recording\"\n")
            .unwrap();
        assert_eq!(cfg.peaks.resting_window, RestingWindow::WholeRecording);
    }

    #[test]
    fn load_reports_missing_file() {
        let dir = tempfile::tempdir().unwrap();
        let err = PipelineConfig::load(&dir.path().join("missing.toml")).unwrap_err();
        assert!(format!("{err:#}").contains("missing.toml"));
    }
}
