use anyhow::{anyhow, Result};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use super::{FrameSource, SourceStats};
use crate::frame::Frame;

/// Deterministic synthetic frames for `stub://` URLs.
///
/// Each pass yields `frames_per_pass` frames of asphalt-gray noise. Frame `n` of a pass
/// is always the same image, so a replayed stream is bit-identical.
pub struct SyntheticSource {
    url: String,
    width: u32,
    height: u32,
    frames_per_pass: u64,
    position: u64,
    frames_captured: u64,
}

impl SyntheticSource {
    pub fn new(url: &str, width: u32, height: u32, frames_per_pass: u64) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("synthetic source needs non-zero dimensions"));
        }
        log::info!("SyntheticSource: connected to {} ({}x{})", url, width, height);
        Ok(Self {
            url: url.to_string(),
            width,
            height,
            frames_per_pass,
            position: 0,
            frames_captured: 0,
        })
    }

    fn generate_pixels(&self, index: u64) -> Vec<u8> {
        let mut rng = StdRng::seed_from_u64(index);
        let pixel_count = (self.width as usize) * (self.height as usize) * 3;
        (0..pixel_count).map(|_| rng.gen_range(70u8..=130)).collect()
    }
}

impl FrameSource for SyntheticSource {
    fn next_frame(&mut self) -> Result<Option<Frame>> {
        if self.position >= self.frames_per_pass {
            return Ok(None);
        }
        self.position += 1;
        self.frames_captured += 1;
        let pixels = self.generate_pixels(self.position);
        Frame::new(pixels, self.width, self.height, self.position).map(Some)
    }

    fn seek_to_start(&mut self) -> Result<()> {
        self.position = 0;
        Ok(())
    }

    fn stats(&self) -> SourceStats {
        SourceStats {
            frames_captured: self.frames_captured,
            restarts: 0,
            location: self.url.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replayed_frames_are_identical() {
        let mut source = SyntheticSource::new("stub://replay", 16, 8, 2).unwrap();
        let first = source.next_frame().unwrap().unwrap();
        source.seek_to_start().unwrap();
        let again = source.next_frame().unwrap().unwrap();
        assert_eq!(first.index, 1);
        assert_eq!(again.index, 1);
        assert_eq!(first.pixels(), again.pixels());
    }

    #[test]
    fn pixels_stay_in_the_classifiable_band() {
        let mut source = SyntheticSource::new("stub://band", 16, 8, 1).unwrap();
        let frame = source.next_frame().unwrap().unwrap();
        assert!(frame.pixels().iter().all(|&p| (70..=130).contains(&p)));
        assert!(source.next_frame().unwrap().is_none());
    }

    #[test]
    fn rejects_zero_dimensions() {
        assert!(SyntheticSource::new("stub://zero", 0, 8, 1).is_err());
    }
}
