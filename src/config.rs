use anyhow::{anyhow, Result};
use image::GrayImage;
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::classify::ClassifierKind;
use crate::frame::{FeatureShape, DEFAULT_FEATURE_HEIGHT, DEFAULT_FEATURE_WIDTH};
use crate::history::DEFAULT_HISTORY_SIZE;
use crate::ingest::SourceSettings;
use crate::pipeline::{IntensityGate, PipelineSettings, DEFAULT_BRIGHT_ABOVE, DEFAULT_DARK_BELOW};
use crate::spots::{SpotBounds, SpotList, DEFAULT_BINARIZE_THRESHOLD, DEFAULT_OVERLAP_THRESHOLD};

const DEFAULT_MASK_PATH: &str = "mask.png";
const DEFAULT_LOG_PATH: &str = "parking_data.csv";
const DEFAULT_CLASSIFIER_PATH: &str = "model.json";

#[derive(Debug, Deserialize, Default)]
struct MonitorConfigFile {
    mask_path: Option<PathBuf>,
    log_path: Option<PathBuf>,
    source: Option<SourceConfigFile>,
    classifier: Option<ClassifierConfigFile>,
    spots: Option<SpotsConfigFile>,
    smoothing: Option<SmoothingConfigFile>,
    gate: Option<GateConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct SourceConfigFile {
    url: Option<String>,
    loop_playback: Option<bool>,
    width: Option<u32>,
    height: Option<u32>,
    synthetic_frames: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct ClassifierConfigFile {
    kind: Option<ClassifierKind>,
    path: Option<PathBuf>,
    feature_width: Option<u32>,
    feature_height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct SpotsConfigFile {
    binarize_threshold: Option<u8>,
    overlap_threshold: Option<f64>,
    min_width: Option<u32>,
    max_width: Option<u32>,
    min_height: Option<u32>,
    max_height: Option<u32>,
    min_area: Option<u64>,
    max_area: Option<u64>,
}

#[derive(Debug, Deserialize, Default)]
struct SmoothingConfigFile {
    history_size: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct GateConfigFile {
    dark_below: Option<f64>,
    bright_above: Option<f64>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct MonitorConfig {
    pub mask_path: PathBuf,
    pub log_path: PathBuf,
    pub source: SourceSettings,
    pub classifier: ClassifierSettings,
    pub spots: SpotSettings,
    pub history_size: usize,
    pub gate: IntensityGate,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ClassifierSettings {
    pub kind: ClassifierKind,
    /// Artifact path; unused by the stub backend.
    pub path: PathBuf,
    pub feature_shape: FeatureShape,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SpotSettings {
    pub binarize_threshold: u8,
    pub overlap_threshold: f64,
    pub bounds: SpotBounds,
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self::from_file(MonitorConfigFile::default())
    }
}

impl MonitorConfig {
    /// Load `PARKING_CONFIG` (if set), apply `PARKING_*` overrides, validate.
    pub fn load() -> Result<Self> {
        let config_path = non_empty_env("PARKING_CONFIG").map(PathBuf::from);
        Self::load_from(config_path.as_deref())
    }

    /// Like `load`, with an explicit config file in place of `PARKING_CONFIG`.
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let file_cfg = match config_path {
            Some(path) => Some(read_config_file(path)?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default());
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MonitorConfigFile) -> Self {
        let source_defaults = SourceSettings::default();
        let source_file = file.source.unwrap_or_default();
        let source = SourceSettings {
            url: source_file.url.unwrap_or(source_defaults.url),
            loop_playback: source_file
                .loop_playback
                .unwrap_or(source_defaults.loop_playback),
            width: source_file.width.unwrap_or(source_defaults.width),
            height: source_file.height.unwrap_or(source_defaults.height),
            synthetic_frames: source_file
                .synthetic_frames
                .unwrap_or(source_defaults.synthetic_frames),
        };

        let classifier_file = file.classifier.unwrap_or_default();
        let classifier = ClassifierSettings {
            kind: classifier_file.kind.unwrap_or_default(),
            path: classifier_file
                .path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_CLASSIFIER_PATH)),
            feature_shape: FeatureShape {
                width: classifier_file
                    .feature_width
                    .unwrap_or(DEFAULT_FEATURE_WIDTH),
                height: classifier_file
                    .feature_height
                    .unwrap_or(DEFAULT_FEATURE_HEIGHT),
            },
        };

        let bound_defaults = SpotBounds::default();
        let spots_file = file.spots.unwrap_or_default();
        let spots = SpotSettings {
            binarize_threshold: spots_file
                .binarize_threshold
                .unwrap_or(DEFAULT_BINARIZE_THRESHOLD),
            overlap_threshold: spots_file
                .overlap_threshold
                .unwrap_or(DEFAULT_OVERLAP_THRESHOLD),
            bounds: SpotBounds {
                min_width: spots_file.min_width.unwrap_or(bound_defaults.min_width),
                max_width: spots_file.max_width.unwrap_or(bound_defaults.max_width),
                min_height: spots_file.min_height.unwrap_or(bound_defaults.min_height),
                max_height: spots_file.max_height.unwrap_or(bound_defaults.max_height),
                min_area: spots_file.min_area.unwrap_or(bound_defaults.min_area),
                max_area: spots_file.max_area.unwrap_or(bound_defaults.max_area),
            },
        };

        let gate_file = file.gate.unwrap_or_default();
        Self {
            mask_path: file
                .mask_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_MASK_PATH)),
            log_path: file
                .log_path
                .unwrap_or_else(|| PathBuf::from(DEFAULT_LOG_PATH)),
            source,
            classifier,
            spots,
            history_size: file
                .smoothing
                .and_then(|smoothing| smoothing.history_size)
                .unwrap_or(DEFAULT_HISTORY_SIZE),
            gate: IntensityGate {
                dark_below: gate_file.dark_below.unwrap_or(DEFAULT_DARK_BELOW),
                bright_above: gate_file.bright_above.unwrap_or(DEFAULT_BRIGHT_ABOVE),
            },
        }
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(path) = non_empty_env("PARKING_MASK_PATH") {
            self.mask_path = PathBuf::from(path);
        }
        if let Some(path) = non_empty_env("PARKING_LOG_PATH") {
            self.log_path = PathBuf::from(path);
        }
        if let Some(url) = non_empty_env("PARKING_SOURCE_URL") {
            self.source.url = url;
        }
        if let Some(value) = non_empty_env("PARKING_SOURCE_LOOP") {
            self.source.loop_playback = parse_bool(&value)
                .ok_or_else(|| anyhow!("PARKING_SOURCE_LOOP must be true or false"))?;
        }
        if let Some(kind) = non_empty_env("PARKING_CLASSIFIER_KIND") {
            self.classifier.kind = ClassifierKind::parse(&kind)?;
        }
        if let Some(path) = non_empty_env("PARKING_CLASSIFIER_PATH") {
            self.classifier.path = PathBuf::from(path);
        }
        if let Some(value) = non_empty_env("PARKING_OVERLAP_THRESHOLD") {
            self.spots.overlap_threshold = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("PARKING_OVERLAP_THRESHOLD must be a number"))?;
        }
        if let Some(value) = non_empty_env("PARKING_HISTORY_SIZE") {
            self.history_size = value
                .trim()
                .parse()
                .map_err(|_| anyhow!("PARKING_HISTORY_SIZE must be a positive integer"))?;
        }
        Ok(())
    }

    fn validate(&self) -> Result<()> {
        let overlap = self.spots.overlap_threshold;
        if !(overlap > 0.0 && overlap < 1.0) {
            return Err(anyhow!(
                "overlap_threshold must lie strictly between 0 and 1 (got {})",
                overlap
            ));
        }
        if self.history_size == 0 {
            return Err(anyhow!("history_size must be at least 1"));
        }
        if !(self.gate.dark_below < self.gate.bright_above) {
            return Err(anyhow!(
                "gate.dark_below ({}) must be below gate.bright_above ({})",
                self.gate.dark_below,
                self.gate.bright_above
            ));
        }
        let shape = self.classifier.feature_shape;
        if shape.width == 0 || shape.height == 0 {
            return Err(anyhow!("classifier feature dimensions must be greater than zero"));
        }
        let bounds = &self.spots.bounds;
        if bounds.min_width > bounds.max_width
            || bounds.min_height > bounds.max_height
            || bounds.min_area > bounds.max_area
        {
            return Err(anyhow!("spot size bounds have a minimum above their maximum"));
        }
        if self.source.url.trim().is_empty() {
            return Err(anyhow!("source.url must not be empty"));
        }
        Ok(())
    }

    /// Extract and resolve the session's spots from a decoded mask.
    pub fn spot_list(&self, mask: &GrayImage) -> Result<SpotList> {
        SpotList::from_mask(
            mask,
            self.spots.binarize_threshold,
            &self.spots.bounds,
            self.spots.overlap_threshold,
        )
    }

    pub fn pipeline_settings(&self) -> PipelineSettings {
        PipelineSettings {
            history_size: self.history_size,
            gate: self.gate,
            feature_shape: self.classifier.feature_shape,
        }
    }

    /// Artifact path for backends that need one.
    pub fn classifier_path(&self) -> Option<&Path> {
        match self.classifier.kind {
            ClassifierKind::Stub => None,
            ClassifierKind::Linear | ClassifierKind::Onnx => Some(self.classifier.path.as_path()),
        }
    }
}

fn read_config_file(path: &Path) -> Result<MonitorConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn non_empty_env(key: &str) -> Option<String> {
    std::env::var(key)
        .ok()
        .filter(|value| !value.trim().is_empty())
}

fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let cfg = MonitorConfig::default();
        cfg.validate().unwrap();
        assert_eq!(cfg.mask_path, PathBuf::from("mask.png"));
        assert_eq!(cfg.log_path, PathBuf::from("parking_data.csv"));
        assert_eq!(cfg.spots.overlap_threshold, 0.2);
        assert_eq!(cfg.history_size, 5);
        assert_eq!(cfg.pipeline_settings(), PipelineSettings::default());
    }

    #[test]
    fn parses_partial_file() {
        let file: MonitorConfigFile = serde_json::from_str(
            r#"{ "classifier": { "kind": "stub" }, "spots": { "min_area": 100 } }"#,
        )
        .unwrap();
        let cfg = MonitorConfig::from_file(file);
        assert_eq!(cfg.classifier.kind, ClassifierKind::Stub);
        assert_eq!(cfg.classifier_path(), None);
        assert_eq!(cfg.spots.bounds.min_area, 100);
        assert_eq!(cfg.spots.bounds.max_area, 30_000);
    }

    #[test]
    fn rejects_out_of_range_values() {
        let mut cfg = MonitorConfig::default();
        cfg.spots.overlap_threshold = 1.0;
        assert!(cfg.validate().is_err());

        let mut cfg = MonitorConfig::default();
        cfg.history_size = 0;
        assert!(cfg.validate().is_err());

        let mut cfg = MonitorConfig::default();
        cfg.gate.dark_below = 240.0;
        assert!(cfg.validate().is_err());

        let mut cfg = MonitorConfig::default();
        cfg.spots.bounds.min_width = 500;
        assert!(cfg.validate().is_err());

        let mut cfg = MonitorConfig::default();
        cfg.classifier.feature_shape.width = 0;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn bool_parsing() {
        assert_eq!(parse_bool("TRUE"), Some(true));
        assert_eq!(parse_bool(" 0 "), Some(false));
        assert_eq!(parse_bool("maybe"), None);
    }
}
