//! Per-frame classification.
//!
//! `ClassificationPipeline` owns the session's `SpotList`, one `SlotHistory` per
//! spot (indexed by spot id) and the classifier. For each frame it:
//!
//! 1. Crops every spot (a spot outside the frame skips the whole frame)
//! 2. Gates crops whose mean intensity is too dark or too bright (forced occupied)
//! 3. Classifies the remaining crops
//! 4. Commits raw labels to the histories and resolves final labels
//! 5. Aggregates free/occupied counts
//!
//! Steps 1-3 finish for every spot before any history is touched, so a skipped or
//! failed frame leaves all histories unchanged.

use std::fmt;

use anyhow::{anyhow, Context, Result};
use serde::Serialize;

use crate::classify::SpotClassifier;
use crate::frame::{FeatureShape, Frame};
use crate::history::{SlotHistory, DEFAULT_HISTORY_SIZE};
use crate::spots::SpotList;
use crate::Occupancy;

pub const DEFAULT_DARK_BELOW: f64 = 20.0;
pub const DEFAULT_BRIGHT_ABOVE: f64 = 240.0;

/// Mean-intensity guard for unclassifiable crops (glare, deep shadow).
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct IntensityGate {
    pub dark_below: f64,
    pub bright_above: f64,
}

impl Default for IntensityGate {
    fn default() -> Self {
        Self {
            dark_below: DEFAULT_DARK_BELOW,
            bright_above: DEFAULT_BRIGHT_ABOVE,
        }
    }
}

impl IntensityGate {
    pub fn blocks(&self, mean_intensity: f64) -> bool {
        mean_intensity < self.dark_below || mean_intensity > self.bright_above
    }
}

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct PipelineSettings {
    pub history_size: usize,
    pub gate: IntensityGate,
    pub feature_shape: FeatureShape,
}

impl Default for PipelineSettings {
    fn default() -> Self {
        Self {
            history_size: DEFAULT_HISTORY_SIZE,
            gate: IntensityGate::default(),
            feature_shape: FeatureShape::default(),
        }
    }
}

/// How a spot's final label was decided.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum LabelSource {
    /// Intensity gate fired; classifier not invoked, history untouched.
    Gated,
    /// History not yet full; raw classifier label passed through.
    WarmUp,
    /// Majority vote over a full history.
    Smoothed,
}

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct SpotState {
    pub spot_id: usize,
    pub label: Occupancy,
    pub source: LabelSource,
    pub mean_intensity: f64,
}

/// Aggregate result for one processed frame.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct FrameSummary {
    pub free_slots: usize,
    pub occupied_slots: usize,
    pub total_slots: usize,
    pub occupancy_percent: f64,
    pub states: Vec<SpotState>,
}

impl FrameSummary {
    pub fn from_states(states: Vec<SpotState>) -> Self {
        let total_slots = states.len();
        let free_slots = states.iter().filter(|s| s.label.is_empty()).count();
        let occupied_slots = total_slots - free_slots;
        let occupancy_percent = if total_slots == 0 {
            0.0
        } else {
            occupied_slots as f64 / total_slots as f64 * 100.0
        };
        Self {
            free_slots,
            occupied_slots,
            total_slots,
            occupancy_percent,
            states,
        }
    }

    pub fn free_spot_ids(&self) -> Vec<usize> {
        self.spot_ids_where(Occupancy::Empty)
    }

    pub fn occupied_spot_ids(&self) -> Vec<usize> {
        self.spot_ids_where(Occupancy::Occupied)
    }

    pub fn free_percent(&self) -> f64 {
        if self.total_slots == 0 {
            0.0
        } else {
            100.0 - self.occupancy_percent
        }
    }

    fn spot_ids_where(&self, label: Occupancy) -> Vec<usize> {
        self.states
            .iter()
            .filter(|s| s.label == label)
            .map(|s| s.spot_id)
            .collect()
    }
}

/// Why a frame produced no record.
#[non_exhaustive]
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SkipReason {
    /// A spot box does not fit inside the frame (resolution mismatch with the mask).
    SpotOutOfBounds {
        spot_id: usize,
        frame_width: u32,
        frame_height: u32,
    },
    /// The source could not decode the frame and moved on to the next one.
    UnreadableFrame { location: String, reason: String },
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::SpotOutOfBounds {
                spot_id,
                frame_width,
                frame_height,
            } => write!(
                f,
                "spot {} lies outside the {}x{} frame",
                spot_id, frame_width, frame_height
            ),
            SkipReason::UnreadableFrame { location, reason } => {
                write!(f, "frame {} could not be decoded: {}", location, reason)
            }
        }
    }
}

/// Result of processing one frame. Fatal failures are returned as `Err`.
#[derive(Clone, Debug, PartialEq)]
pub enum FrameOutcome {
    Processed(FrameSummary),
    Skipped(SkipReason),
}

enum Verdict {
    Gated,
    Raw(Occupancy),
}

pub struct ClassificationPipeline<C: SpotClassifier> {
    spots: SpotList,
    histories: Vec<SlotHistory>,
    classifier: C,
    gate: IntensityGate,
    feature_shape: FeatureShape,
}

impl<C: SpotClassifier> ClassificationPipeline<C> {
    pub fn new(spots: SpotList, classifier: C, settings: PipelineSettings) -> Result<Self> {
        if let Some(expected) = classifier.input_len() {
            if expected != settings.feature_shape.len() {
                return Err(anyhow!(
                    "classifier '{}' expects {} features, feature shape yields {}",
                    classifier.name(),
                    expected,
                    settings.feature_shape.len()
                ));
            }
        }
        let histories = (0..spots.len())
            .map(|_| SlotHistory::new(settings.history_size))
            .collect();
        Ok(Self {
            spots,
            histories,
            classifier,
            gate: settings.gate,
            feature_shape: settings.feature_shape,
        })
    }

    pub fn spots(&self) -> &SpotList {
        &self.spots
    }

    pub fn history(&self, spot_id: usize) -> Option<&SlotHistory> {
        self.histories.get(spot_id)
    }

    pub fn classifier(&self) -> &C {
        &self.classifier
    }

    /// Classify every spot in `frame`.
    ///
    /// `Ok(Skipped)` leaves histories untouched; `Err` means the classifier failed and
    /// the session cannot continue.
    pub fn process_frame(&mut self, frame: &Frame) -> Result<FrameOutcome> {
        let mut crops = Vec::with_capacity(self.spots.len());
        for spot in self.spots.iter() {
            match frame.crop(spot) {
                Some(crop) => crops.push(crop),
                None => {
                    return Ok(FrameOutcome::Skipped(SkipReason::SpotOutOfBounds {
                        spot_id: spot.id,
                        frame_width: frame.width,
                        frame_height: frame.height,
                    }))
                }
            }
        }

        let mut verdicts = Vec::with_capacity(crops.len());
        for crop in &crops {
            let mean = crop.mean_intensity();
            if self.gate.blocks(mean) {
                verdicts.push((mean, Verdict::Gated));
                continue;
            }
            let features = crop.features(self.feature_shape);
            let label = self
                .classifier
                .predict(&features)
                .with_context(|| format!("classifier failed on spot {}", crop.spot().id))?;
            verdicts.push((mean, Verdict::Raw(label)));
        }

        // barrier: every spot has a verdict, commit histories and aggregate
        let states = verdicts
            .into_iter()
            .zip(self.histories.iter_mut())
            .enumerate()
            .map(|(spot_id, ((mean_intensity, verdict), history))| {
                let (label, source) = match verdict {
                    Verdict::Gated => (Occupancy::Occupied, LabelSource::Gated),
                    Verdict::Raw(raw) => {
                        history.push(raw);
                        match history.vote() {
                            Some(voted) => (voted, LabelSource::Smoothed),
                            None => (raw, LabelSource::WarmUp),
                        }
                    }
                };
                SpotState {
                    spot_id,
                    label,
                    source,
                    mean_intensity,
                }
            })
            .collect();

        Ok(FrameOutcome::Processed(FrameSummary::from_states(states)))
    }
}
