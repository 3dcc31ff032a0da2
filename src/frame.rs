//! Frame buffers and per-spot crops.
//!
//! - `Frame`: one decoded RGB24 video frame, owned by the processing loop.
//! - `SpotCrop`: borrowed view of a frame restricted to one spot box.
//! - `FeatureShape`: the fixed shape crops are resized to before classification.
//!
//! Frames are validated at construction, so a `Frame` always holds exactly
//! `width * height * 3` bytes.

use anyhow::{anyhow, Result};
use image::imageops::{self, FilterType};
use image::RgbImage;

use crate::spots::Spot;

pub const CHANNELS: usize = 3;

/// Default feature shape: crops are resized to 15x15 RGB.
pub const DEFAULT_FEATURE_WIDTH: u32 = 15;
pub const DEFAULT_FEATURE_HEIGHT: u32 = 15;

/// Decoded RGB24 frame.
#[derive(Debug)]
pub struct Frame {
    data: Vec<u8>,
    pub width: u32,
    pub height: u32,
    /// 1-based position within the current pass over the source.
    pub index: u64,
}

impl Frame {
    pub fn new(data: Vec<u8>, width: u32, height: u32, index: u64) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(anyhow!("frame dimensions must be non-zero ({}x{})", width, height));
        }
        let expected = (width as usize)
            .checked_mul(height as usize)
            .and_then(|v| v.checked_mul(CHANNELS))
            .ok_or_else(|| anyhow!("frame dimensions overflow"))?;
        if data.len() != expected {
            return Err(anyhow!(
                "expected {} RGB bytes for {}x{}, received {}",
                expected,
                width,
                height,
                data.len()
            ));
        }
        Ok(Self {
            data,
            width,
            height,
            index,
        })
    }

    /// Frame filled with one RGB value.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3], index: u64) -> Result<Self> {
        let pixels = (width as usize) * (height as usize);
        let mut data = Vec::with_capacity(pixels * CHANNELS);
        for _ in 0..pixels {
            data.extend_from_slice(&rgb);
        }
        Self::new(data, width, height, index)
    }

    pub fn from_rgb_image(image: RgbImage, index: u64) -> Result<Self> {
        let (width, height) = image.dimensions();
        Self::new(image.into_raw(), width, height, index)
    }

    pub fn pixels(&self) -> &[u8] {
        &self.data
    }

    pub fn byte_len(&self) -> usize {
        self.data.len()
    }

    /// Crop to a spot box. `None` when the box does not fit inside the frame.
    pub fn crop<'a>(&'a self, spot: &'a Spot) -> Option<SpotCrop<'a>> {
        if !spot.fits_within(self.width, self.height) {
            return None;
        }
        Some(SpotCrop { frame: self, spot })
    }

    /// Paint a rectangle of one colour, clipped to the frame.
    pub fn fill_rect(&mut self, x: u32, y: u32, width: u32, height: u32, rgb: [u8; 3]) {
        let x_end = x.saturating_add(width).min(self.width);
        let y_end = y.saturating_add(height).min(self.height);
        for yy in y.min(self.height)..y_end {
            for xx in x.min(self.width)..x_end {
                let idx = ((yy as usize) * (self.width as usize) + xx as usize) * CHANNELS;
                self.data[idx..idx + CHANNELS].copy_from_slice(&rgb);
            }
        }
    }
}

/// Shape a crop is resized to before it becomes a feature vector.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct FeatureShape {
    pub width: u32,
    pub height: u32,
}

impl Default for FeatureShape {
    fn default() -> Self {
        Self {
            width: DEFAULT_FEATURE_WIDTH,
            height: DEFAULT_FEATURE_HEIGHT,
        }
    }
}

impl FeatureShape {
    /// Flattened feature vector length (height x width x RGB).
    pub fn len(&self) -> usize {
        self.width as usize * self.height as usize * CHANNELS
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Borrowed view of one spot inside a frame.
pub struct SpotCrop<'a> {
    frame: &'a Frame,
    spot: &'a Spot,
}

impl<'a> SpotCrop<'a> {
    pub fn spot(&self) -> &Spot {
        self.spot
    }

    fn rows(&self) -> impl Iterator<Item = &'a [u8]> + '_ {
        let stride = self.frame.width as usize * CHANNELS;
        let x0 = self.spot.x as usize * CHANNELS;
        let x1 = x0 + self.spot.width as usize * CHANNELS;
        let y0 = self.spot.y as usize;
        let y1 = y0 + self.spot.height as usize;
        let data: &'a [u8] = &self.frame.data;
        (y0..y1).map(move |y| &data[y * stride + x0..y * stride + x1])
    }

    /// Mean over every channel value in the crop.
    pub fn mean_intensity(&self) -> f64 {
        let mut sum = 0u64;
        let mut count = 0u64;
        for row in self.rows() {
            sum += row.iter().map(|&v| v as u64).sum::<u64>();
            count += row.len() as u64;
        }
        if count == 0 {
            0.0
        } else {
            sum as f64 / count as f64
        }
    }

    pub fn to_image(&self) -> RgbImage {
        let mut raw = Vec::with_capacity(self.spot.area() as usize * CHANNELS);
        for row in self.rows() {
            raw.extend_from_slice(row);
        }
        // dimensions and length agree by construction
        RgbImage::from_raw(self.spot.width, self.spot.height, raw).unwrap_or_default()
    }

    /// Resize to `shape` and flatten row-major (y, x, channel) into [0, 1] floats.
    pub fn features(&self, shape: FeatureShape) -> Vec<f32> {
        let resized = imageops::resize(&self.to_image(), shape.width, shape.height, FilterType::Triangle);
        resized
            .into_raw()
            .into_iter()
            .map(|v| v as f32 / 255.0)
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn rejects_mismatched_buffers() {
        assert!(Frame::new(vec![0; 11], 2, 2, 1).is_err());
        assert!(Frame::new(vec![], 0, 0, 1).is_err());
        assert!(Frame::new(vec![0; 12], 2, 2, 1).is_ok());
    }

    #[test]
    fn crop_outside_frame_is_none() {
        let frame = Frame::filled(100, 80, [10, 10, 10], 1).unwrap();
        let inside = Spot::new(0, 60, 40, 40, 40);
        let outside = Spot::new(1, 61, 40, 40, 40);
        assert!(frame.crop(&inside).is_some());
        assert!(frame.crop(&outside).is_none());
    }

    #[test]
    fn mean_intensity_covers_only_the_crop() {
        let mut frame = Frame::filled(100, 100, [0, 0, 0], 1).unwrap();
        frame.fill_rect(10, 10, 30, 30, [250, 250, 250]);
        let spot = Spot::new(0, 10, 10, 30, 30);
        let crop = frame.crop(&spot).unwrap();
        assert_eq!(crop.mean_intensity(), 250.0);

        let straddling = Spot::new(1, 0, 10, 20, 30); // half dark, half bright
        let crop = frame.crop(&straddling).unwrap();
        assert_eq!(crop.mean_intensity(), 125.0);
    }

    #[test]
    fn features_have_fixed_length_and_unit_range() {
        let mut frame = Frame::filled(64, 48, [0, 128, 255], 1).unwrap();
        frame.fill_rect(0, 0, 8, 8, [255, 0, 0]);
        let spot = Spot::new(0, 2, 3, 40, 30);
        let shape = FeatureShape::default();
        let features = frame.crop(&spot).unwrap().features(shape);
        assert_eq!(features.len(), 675);
        assert!(features.iter().all(|v| (0.0..=1.0).contains(v)));
    }

    #[test]
    fn uniform_crop_features_match_pixel_value() {
        let frame = Frame::filled(50, 50, [51, 102, 204], 1).unwrap();
        let spot = Spot::new(0, 5, 5, 30, 30);
        let features = frame.crop(&spot).unwrap().features(FeatureShape { width: 3, height: 2 });
        assert_eq!(features.len(), 18);
        for px in features.chunks(3) {
            assert!((px[0] - 0.2).abs() < 1e-3);
            assert!((px[1] - 0.4).abs() < 1e-3);
            assert!((px[2] - 0.8).abs() < 1e-3);
        }
    }
}
