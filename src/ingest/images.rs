use anyhow::{anyhow, Context, Result};
use std::path::{Path, PathBuf};

use super::{FrameSource, SourceStats, UnreadableFrame};
use crate::frame::Frame;

const FRAME_EXTENSIONS: &[&str] = &["png", "jpg", "jpeg"];

/// Frames read from a directory of still images, in file-name order.
pub struct ImageSequenceSource {
    dir: PathBuf,
    files: Vec<PathBuf>,
    position: usize,
    frames_captured: u64,
    last_error: Option<String>,
}

impl ImageSequenceSource {
    pub fn open<P: AsRef<Path>>(dir: P) -> Result<Self> {
        let dir = dir.as_ref().to_path_buf();
        let mut files: Vec<PathBuf> = std::fs::read_dir(&dir)
            .with_context(|| format!("failed to list frame directory {}", dir.display()))?
            .filter_map(|entry| entry.ok().map(|e| e.path()))
            .filter(|path| path.is_file() && has_frame_extension(path))
            .collect();
        if files.is_empty() {
            return Err(anyhow!("frame directory {} has no png/jpeg frames", dir.display()));
        }
        files.sort();
        log::info!(
            "ImageSequenceSource: {} frames in {}",
            files.len(),
            dir.display()
        );
        Ok(Self {
            dir,
            files,
            position: 0,
            frames_captured: 0,
            last_error: None,
        })
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

impl FrameSource for ImageSequenceSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        let Some(path) = self.files.get(self.position) else {
            return Ok(None);
        };
        self.position += 1;
        match read_frame(path, self.position as u64) {
            Ok(frame) => {
                self.frames_captured += 1;
                self.last_error = None;
                Ok(Some(frame))
            }
            Err(e) => {
                let unreadable = UnreadableFrame::new(path.display().to_string(), format!("{:#}", e));
                self.last_error = Some(unreadable.to_string());
                Err(anyhow::Error::new(unreadable))
            }
        }
    }

    fn seek_to_start(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn is_healthy(&self) -> bool {
        self.last_error.is_none()
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            restarts: 0,
            location: self.dir.display().to_string(),
        }
    }
}

/// Decode one still image into a frame with the given index.
pub fn read_frame(path: &Path, index: u64) -> Result<Frame> {
    let image = image::open(path)
        .with_context(|| format!("failed to decode frame {}", path.display()))?;
    Frame::from_rgb_image(image.to_rgb8(), index)
}

fn has_frame_extension(path: &Path) -> bool {
    path.extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| FRAME_EXTENSIONS.contains(&ext.to_ascii_lowercase().as_str()))
        .unwrap_or(false)
}
