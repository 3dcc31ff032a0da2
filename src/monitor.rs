//! The processing loop.
//!
//! One frame at a time: read, classify, record. A frame the source cannot decode
//! is skipped like any other unprocessable frame; a run of them longer than
//! `max_consecutive_unreadable` means the source is broken and ends the loop. A
//! stop request is honoured between frames. Whatever ends the loop, the source is released and the metrics log is
//! flushed and closed before `run` returns.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use anyhow::{Context, Result};

use crate::classify::SpotClassifier;
use crate::ingest::{FrameSource, UnreadableFrame};
use crate::pipeline::{ClassificationPipeline, FrameOutcome, SkipReason};
use crate::storage::{Durability, FrameMetricsRecord, MetricsStore};

const HEALTH_LOG_INTERVAL: Duration = Duration::from_secs(5);
const DEFAULT_MAX_CONSECUTIVE_UNREADABLE: u32 = 25;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MonitorSettings {
    /// Stop after reading this many frames.
    pub max_frames: Option<u64>,
    /// Minimum wall time between frames.
    pub frame_interval: Option<Duration>,
    pub health_interval: Duration,
    /// Unreadable frames in a row tolerated before the source counts as failed.
    pub max_consecutive_unreadable: u32,
}

impl Default for MonitorSettings {
    fn default() -> Self {
        Self {
            max_frames: None,
            frame_interval: None,
            health_interval: HEALTH_LOG_INTERVAL,
            max_consecutive_unreadable: DEFAULT_MAX_CONSECUTIVE_UNREADABLE,
        }
    }
}

/// Why the loop ended.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StopReason {
    EndOfStream,
    StopRequested,
    FrameLimit,
    SourceFailed(String),
    ClassifierFailed(String),
}

impl StopReason {
    pub fn is_failure(&self) -> bool {
        matches!(
            self,
            StopReason::SourceFailed(_) | StopReason::ClassifierFailed(_)
        )
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct RunReport {
    pub frames_read: u64,
    pub frames_recorded: u64,
    pub frames_skipped: u64,
    pub write_failures: u64,
    pub sync_failures: u64,
    pub last_record: Option<FrameMetricsRecord>,
    pub stop_reason: StopReason,
}

pub struct Monitor<S, C, M>
where
    S: FrameSource,
    C: SpotClassifier,
    M: MetricsStore,
{
    source: S,
    pipeline: ClassificationPipeline<C>,
    store: M,
    settings: MonitorSettings,
}

impl<S, C, M> Monitor<S, C, M>
where
    S: FrameSource,
    C: SpotClassifier,
    M: MetricsStore,
{
    pub fn new(source: S, pipeline: ClassificationPipeline<C>, store: M) -> Self {
        Self {
            source,
            pipeline,
            store,
            settings: MonitorSettings::default(),
        }
    }

    pub fn with_settings(mut self, settings: MonitorSettings) -> Self {
        self.settings = settings;
        self
    }

    pub fn pipeline(&self) -> &ClassificationPipeline<C> {
        &self.pipeline
    }

    pub fn store(&self) -> &M {
        &self.store
    }

    pub fn into_store(self) -> M {
        self.store
    }

    /// Run until end-of-stream, a stop request, the frame limit, or a fatal error.
    ///
    /// Fatal mid-loop errors are reported in `RunReport::stop_reason`; `Err` is only
    /// returned when the metrics log cannot be closed.
    pub fn run(&mut self, stop: &AtomicBool) -> Result<RunReport> {
        let mut report = RunReport {
            frames_read: 0,
            frames_recorded: 0,
            frames_skipped: 0,
            write_failures: 0,
            sync_failures: 0,
            last_record: None,
            stop_reason: StopReason::EndOfStream,
        };
        let mut last_health_log = Instant::now();
        let mut unreadable_run = 0u32;

        log::info!(
            "monitor running: {} spots, next frame_number {}",
            self.pipeline.spots().len(),
            self.store.next_frame_number()
        );

        report.stop_reason = loop {
            if stop.load(Ordering::SeqCst) {
                break StopReason::StopRequested;
            }
            if let Some(max_frames) = self.settings.max_frames {
                if report.frames_read >= max_frames {
                    break StopReason::FrameLimit;
                }
            }
            let started = Instant::now();

            let (frame_index, outcome) = match self.source.next_frame() {
                Ok(Some(frame)) => {
                    unreadable_run = 0;
                    report.frames_read += 1;
                    let outcome = self
                        .pipeline
                        .process_frame(&frame)
                        .with_context(|| format!("frame {}", frame.index));
                    (Some(frame.index), outcome)
                }
                Ok(None) => break StopReason::EndOfStream,
                Err(e) => match UnreadableFrame::find(&e) {
                    Some(unreadable) => {
                        unreadable_run += 1;
                        report.frames_read += 1;
                        if unreadable_run > self.settings.max_consecutive_unreadable {
                            log::error!(
                                "video source failed: {} unreadable frames in a row",
                                unreadable_run
                            );
                            break StopReason::SourceFailed(format!(
                                "{} unreadable frames in a row, last: {}",
                                unreadable_run, unreadable
                            ));
                        }
                        let reason = SkipReason::UnreadableFrame {
                            location: unreadable.location.clone(),
                            reason: unreadable.reason.clone(),
                        };
                        (None, Ok(FrameOutcome::Skipped(reason)))
                    }
                    None => {
                        log::error!("video source failed: {:#}", e);
                        break StopReason::SourceFailed(format!("{:#}", e));
                    }
                },
            };

            match outcome {
                Ok(FrameOutcome::Processed(summary)) => {
                    let receipt = self.store.append(&summary);
                    match &receipt.durability {
                        Durability::Synced => {}
                        Durability::Unsynced(_) => report.sync_failures += 1,
                        Durability::WriteFailed(_) => report.write_failures += 1,
                    }
                    log::debug!(
                        "frame {}: {}/{} free ({:.1}% occupied)",
                        receipt.record.frame_number,
                        summary.free_slots,
                        summary.total_slots,
                        summary.occupancy_percent
                    );
                    report.frames_recorded += 1;
                    report.last_record = Some(receipt.record);
                }
                Ok(FrameOutcome::Skipped(reason)) => {
                    report.frames_skipped += 1;
                    match frame_index {
                        Some(index) => log::warn!("frame {} skipped: {}", index, reason),
                        None => log::warn!("skipped: {}", reason),
                    }
                }
                Err(e) => {
                    log::error!("{:#}", e);
                    break StopReason::ClassifierFailed(format!("{:#}", e));
                }
            }

            if last_health_log.elapsed() >= self.settings.health_interval {
                let stats = self.source.stats();
                log::info!(
                    "source health={} frames={} restarts={} location={} recorded={} skipped={}",
                    self.source.is_healthy(),
                    stats.frames_captured,
                    stats.restarts,
                    stats.location,
                    report.frames_recorded,
                    report.frames_skipped
                );
                last_health_log = Instant::now();
            }

            if let Some(interval) = self.settings.frame_interval {
                let elapsed = started.elapsed();
                if elapsed < interval {
                    std::thread::sleep(interval - elapsed);
                }
            }
        };

        self.source.release();
        self.store.close()?;
        log::info!(
            "monitor stopped ({:?}): read={} recorded={} skipped={} write_failures={}",
            report.stop_reason,
            report.frames_read,
            report.frames_recorded,
            report.frames_skipped,
            report.write_failures
        );
        Ok(report)
    }
}
