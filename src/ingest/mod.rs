//! Frame ingestion sources.
//!
//! This module provides sources of decoded RGB frames:
//! - Synthetic frames (`stub://` URLs, testing and dry runs)
//! - Directories of still images (png/jpeg), in file-name order
//! - Local video files (feature: ingest-file-ffmpeg)
//!
//! Every source exposes "next frame or end-of-stream" plus `seek_to_start`.
//! Replaying a stream forever is not baked into the sources: wrap one in
//! `Looping` (or set `loop_playback`) to restart it at end-of-stream.
//!
//! A frame that cannot be decoded is reported as an `UnreadableFrame` error after
//! the source has moved past it; any other error means the source itself is gone.
//!
//! Sources only read local media; URL schemes other than `stub://` are rejected.

#[cfg(feature = "ingest-file-ffmpeg")]
pub(crate) mod file_ffmpeg;
pub mod images;
pub mod synthetic;

use anyhow::{anyhow, Result};
use std::fmt;
use std::path::Path;

#[cfg(feature = "ingest-file-ffmpeg")]
use file_ffmpeg::FfmpegFileSource;
pub use images::{read_frame, ImageSequenceSource};
pub use synthetic::SyntheticSource;

use crate::frame::Frame;

/// Sequential frame source.
pub trait FrameSource {
    /// Next frame, or `None` at end-of-stream.
    fn next_frame(&mut self) -> Result<Option<Frame>>;

    /// Rewind to the first frame.
    fn seek_to_start(&mut self) -> Result<()>;

    /// Check if the source is healthy.
    fn is_healthy(&self) -> bool {
        true
    }

    /// Get frame statistics.
    fn stats(&self) -> SourceStats;

    /// Release decoder resources. Further reads are undefined.
    fn release(&mut self) {}
}

impl<S: FrameSource + ?Sized> FrameSource for Box<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        (**self).next_frame()
    }

    fn seek_to_start(&mut self) -> Result<()> {
        (**self).seek_to_start()
    }

    fn is_healthy(&self) -> bool {
        (**self).is_healthy()
    }

    fn stats(&self) -> SourceStats {
        (**self).stats()
    }

    fn release(&mut self) {
        (**self).release()
    }
}

/// One frame that could not be decoded. The source is already positioned on the
/// next frame, so reading can continue.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UnreadableFrame {
    pub location: String,
    pub reason: String,
}

impl UnreadableFrame {
    pub fn new(location: impl Into<String>, reason: impl fmt::Display) -> Self {
        Self {
            location: location.into(),
            reason: reason.to_string(),
        }
    }

    /// The marker carried by `err`, if it reports a single unreadable frame.
    pub fn find(err: &anyhow::Error) -> Option<&UnreadableFrame> {
        err.downcast_ref::<UnreadableFrame>()
    }
}

impl fmt::Display for UnreadableFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unreadable frame {}: {}", self.location, self.reason)
    }
}

impl std::error::Error for UnreadableFrame {}

/// Statistics for a frame source.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct SourceStats {
    pub frames_captured: u64,
    pub restarts: u64,
    pub location: String,
}

/// Restarts the wrapped source from the beginning at end-of-stream.
///
/// A source that yields nothing right after a rewind is empty, and ends the stream.
pub struct Looping<S> {
    inner: S,
    restarts: u64,
}

impl<S: FrameSource> Looping<S> {
    pub fn new(inner: S) -> Self {
        Self { inner, restarts: 0 }
    }

    pub fn into_inner(self) -> S {
        self.inner
    }
}

impl<S: FrameSource> FrameSource for Looping<S> {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if let Some(frame) = self.inner.next_frame()? {
            return Ok(Some(frame));
        }
        self.inner.seek_to_start()?;
        self.restarts += 1;
        log::debug!(
            "{}: end of stream, restarting (restart #{})",
            self.inner.stats().location,
            self.restarts
        );
        self.inner.next_frame()
    }

    fn seek_to_start(&mut self) -> Result<()> {
        self.inner.seek_to_start()
    }

    fn is_healthy(&self) -> bool {
        self.inner.is_healthy()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            restarts: self.restarts,
            ..self.inner.stats()
        }
    }

    fn release(&mut self) {
        self.inner.release()
    }
}

/// Configuration for a video source.
#[derive(Clone, Debug, PartialEq)]
pub struct SourceSettings {
    /// `stub://name`, a directory of frames, or a local video file.
    pub url: String,
    /// Restart from the first frame at end-of-stream.
    pub loop_playback: bool,
    /// Frame width (synthetic sources only).
    pub width: u32,
    /// Frame height (synthetic sources only).
    pub height: u32,
    /// Frames per pass (synthetic sources only).
    pub synthetic_frames: u64,
}

impl Default for SourceSettings {
    fn default() -> Self {
        Self {
            url: "stub://parking_lot".to_string(),
            loop_playback: true,
            width: 640,
            height: 480,
            synthetic_frames: 100,
        }
    }
}

/// Local video source, dispatched on the configured URL.
pub struct VideoSource {
    backend: VideoBackend,
}

enum VideoBackend {
    Synthetic(SyntheticSource),
    Images(ImageSequenceSource),
    #[cfg(feature = "ingest-file-ffmpeg")]
    Ffmpeg(FfmpegFileSource),
}

impl VideoSource {
    pub fn new(settings: &SourceSettings) -> Result<Self> {
        if !is_local_source(&settings.url) {
            return Err(anyhow!(
                "video ingestion only supports local paths and stub:// (got '{}')",
                settings.url
            ));
        }
        let backend = if settings.url.starts_with("stub://") {
            VideoBackend::Synthetic(SyntheticSource::new(
                &settings.url,
                settings.width,
                settings.height,
                settings.synthetic_frames,
            )?)
        } else if Path::new(&settings.url).is_dir() {
            VideoBackend::Images(ImageSequenceSource::open(&settings.url)?)
        } else {
            open_video_file(&settings.url)?
        };
        Ok(Self { backend })
    }

    /// Open the configured source, wrapped in `Looping` when `loop_playback` is set.
    pub fn open(settings: &SourceSettings) -> Result<Box<dyn FrameSource>> {
        let source = Self::new(settings)?;
        log::info!(
            "video source {} opened (loop_playback={})",
            settings.url,
            settings.loop_playback
        );
        if settings.loop_playback {
            Ok(Box::new(Looping::new(source)))
        } else {
            Ok(Box::new(source))
        }
    }
}

#[cfg(feature = "ingest-file-ffmpeg")]
fn open_video_file(path: &str) -> Result<VideoBackend> {
    Ok(VideoBackend::Ffmpeg(FfmpegFileSource::new(path)?))
}

#[cfg(not(feature = "ingest-file-ffmpeg"))]
fn open_video_file(path: &str) -> Result<VideoBackend> {
    if !Path::new(path).exists() {
        return Err(anyhow!("video source {} does not exist", path));
    }
    Err(anyhow!(
        "video file ingestion requires the ingest-file-ffmpeg feature ({})",
        path
    ))
}

impl FrameSource for VideoSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        match &mut self.backend {
            VideoBackend::Synthetic(source) => source.next_frame(),
            VideoBackend::Images(source) => source.next_frame(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            VideoBackend::Ffmpeg(source) => source.next_frame(),
        }
    }

    fn seek_to_start(&mut self) -> Result<()> {
        match &mut self.backend {
            VideoBackend::Synthetic(source) => source.seek_to_start(),
            VideoBackend::Images(source) => source.seek_to_start(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            VideoBackend::Ffmpeg(source) => source.seek_to_start(),
        }
    }

    fn is_healthy(&self) -> bool {
        match &self.backend {
            VideoBackend::Synthetic(source) => source.is_healthy(),
            VideoBackend::Images(source) => source.is_healthy(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            VideoBackend::Ffmpeg(source) => source.is_healthy(),
        }
    }

    fn stats(&self) -> SourceStats {
        match &self.backend {
            VideoBackend::Synthetic(source) => source.stats(),
            VideoBackend::Images(source) => source.stats(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            VideoBackend::Ffmpeg(source) => source.stats(),
        }
    }

    fn release(&mut self) {
        match &mut self.backend {
            VideoBackend::Synthetic(source) => source.release(),
            VideoBackend::Images(source) => source.release(),
            #[cfg(feature = "ingest-file-ffmpeg")]
            VideoBackend::Ffmpeg(source) => source.release(),
        }
    }
}

fn is_local_source(url: &str) -> bool {
    if url.trim().is_empty() {
        return false;
    }
    if url.starts_with("stub://") {
        return true;
    }
    !url.contains("://")
}
