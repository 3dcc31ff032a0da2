//! Parking occupancy monitor
//!
//! This crate turns a stream of video frames into a time series of parking-lot
//! occupancy metrics.
//!
//! # Architecture
//!
//! The monitor is built from a fixed, once-per-session geometry stage and a
//! per-frame loop:
//!
//! 1. **Spot geometry**: a mask image is binarized, closed, labeled and filtered into
//!    candidate boxes, then de-duplicated by IoU into the session's `SpotList`.
//! 2. **Classification**: each frame is cropped per spot, intensity-gated, classified,
//!    and smoothed by a bounded majority vote (`SlotHistory`).
//! 3. **Metrics**: one aggregate record per processed frame is appended to a durable
//!    CSV log, flushed and synced before the next frame is read.
//!
//! # Module Structure
//!
//! - `spots`: Spot extraction (`extract`) and overlap resolution (`overlap`)
//! - `frame`: Frame buffers, crops and feature vectors
//! - `ingest`: Frame sources (synthetic, image sequences, local video files)
//! - `classify`: Classifier backends behind `SpotClassifier`
//! - `history`: Per-spot bounded history and majority vote
//! - `pipeline`: Per-frame classification (`ClassificationPipeline`)
//! - `storage`: Durable metrics log (`MetricsStore`, `CsvMetricsSink`)
//! - `monitor`: The single-threaded processing loop
//! - `verify`: Offline metrics log verification

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

pub mod classify;
pub mod config;
pub mod frame;
pub mod history;
pub mod ingest;
pub mod monitor;
pub mod pipeline;
pub mod spots;
pub mod storage;
pub mod verify;

pub use classify::{load_classifier, ClassifierKind, LinearClassifier, SpotClassifier, StubClassifier};
pub use config::MonitorConfig;
pub use frame::{Frame, FeatureShape, SpotCrop};
pub use history::{SlotHistory, DEFAULT_HISTORY_SIZE};
pub use ingest::{
    FrameSource, ImageSequenceSource, Looping, SourceSettings, SourceStats, SyntheticSource,
    UnreadableFrame, VideoSource,
};
pub use monitor::{Monitor, MonitorSettings, RunReport, StopReason};
pub use pipeline::{
    ClassificationPipeline, FrameOutcome, FrameSummary, IntensityGate, LabelSource, PipelineSettings,
    SkipReason, SpotState,
};
pub use spots::{extract_spot_boxes, resolve_overlaps, Spot, SpotBounds, SpotList};
pub use storage::{
    AppendReceipt, CsvMetricsSink, Durability, FrameMetricsRecord, InMemoryMetricsStore,
    MetricsStore, SinkStats, METRICS_HEADER,
};
pub use verify::{verify_metrics_log, LogReport};

// -------------------- Occupancy Labels --------------------

/// Binary occupancy label. The numeric values are the classifier's raw labels.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Occupancy {
    Empty = 0,
    Occupied = 1,
}

impl Occupancy {
    /// Map a raw classifier label onto an occupancy state.
    pub fn from_label(label: i64) -> Result<Self> {
        match label {
            0 => Ok(Occupancy::Empty),
            1 => Ok(Occupancy::Occupied),
            other => Err(anyhow!("classifier label {} is outside {{0,1}}", other)),
        }
    }

    pub fn as_label(self) -> u8 {
        self as u8
    }

    pub fn is_empty(self) -> bool {
        matches!(self, Occupancy::Empty)
    }
}

// -------------------- Conformance Tests --------------------
