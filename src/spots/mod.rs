//! Parking-spot geometry.
//!
//! Spot geometry is computed once per session from a mask image:
//! - `extract`: binarize, close, label 8-connected components, filter by size
//! - `overlap`: drop duplicate boxes by IoU, largest first
//!
//! The resulting `SpotList` is immutable for the rest of the session. Spot ids are
//! positions in that list and index the per-spot histories in the pipeline.

mod extract;
mod overlap;

use anyhow::{Context, Result};
use image::GrayImage;
use std::path::Path;
use serde::Serialize;

pub use extract::extract_spot_boxes;
pub use overlap::{iou, resolve_overlaps};

/// Foreground is any mask pixel strictly above this value.
pub const DEFAULT_BINARIZE_THRESHOLD: u8 = 127;

/// Boxes whose IoU with an already-kept box exceeds this value are duplicates.
pub const DEFAULT_OVERLAP_THRESHOLD: f64 = 0.2;

/// Axis-aligned parking-spot box in frame pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub struct Spot {
    pub id: usize,
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

impl Spot {
    pub fn new(id: usize, x: u32, y: u32, width: u32, height: u32) -> Self {
        Self {
            id,
            x,
            y,
            width,
            height,
        }
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Exclusive right edge.
    pub fn right(&self) -> u64 {
        self.x as u64 + self.width as u64
    }

    /// Exclusive bottom edge.
    pub fn bottom(&self) -> u64 {
        self.y as u64 + self.height as u64
    }

    /// True when the box lies entirely inside a `width` x `height` frame.
    pub fn fits_within(&self, width: u32, height: u32) -> bool {
        self.width > 0 && self.height > 0 && self.right() <= width as u64 && self.bottom() <= height as u64
    }
}

/// Decode a mask image and convert it to 8-bit grayscale.
pub fn load_mask(path: &Path) -> Result<GrayImage> {
    let mask = image::open(path)
        .with_context(|| format!("failed to read mask image {}", path.display()))?;
    Ok(mask.to_luma8())
}

/// Size bounds a connected component must satisfy to count as a spot.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SpotBounds {
    pub min_width: u32,
    pub max_width: u32,
    pub min_height: u32,
    pub max_height: u32,
    pub min_area: u64,
    pub max_area: u64,
}

impl Default for SpotBounds {
    fn default() -> Self {
        Self {
            min_width: 25,
            max_width: 200,
            min_height: 20,
            max_height: 200,
            min_area: 300,
            max_area: 30_000,
        }
    }
}

impl SpotBounds {
    pub fn accepts(&self, width: u32, height: u32) -> bool {
        let area = width as u64 * height as u64;
        (self.min_width..=self.max_width).contains(&width)
            && (self.min_height..=self.max_height).contains(&height)
            && (self.min_area..=self.max_area).contains(&area)
    }
}

/// The session's fixed, de-duplicated spot list.
#[derive(Clone, Debug, Default, Serialize)]
pub struct SpotList {
    spots: Vec<Spot>,
}

impl SpotList {
    /// Build a list from resolved boxes, renumbering ids to list positions.
    pub(crate) fn from_resolved(boxes: Vec<Spot>) -> Self {
        let spots = boxes
            .into_iter()
            .enumerate()
            .map(|(id, spot)| Spot { id, ..spot })
            .collect();
        Self { spots }
    }

    /// Run extraction and overlap resolution over a grayscale mask.
    pub fn from_mask(
        mask: &GrayImage,
        binarize_threshold: u8,
        bounds: &SpotBounds,
        overlap_threshold: f64,
    ) -> Result<Self> {
        let candidates = extract_spot_boxes(mask, binarize_threshold, bounds);
        let candidate_count = candidates.len();
        let spots = resolve_overlaps(candidates, overlap_threshold)?;
        log::info!(
            "spot geometry: {} candidate boxes, {} spots after overlap resolution",
            candidate_count,
            spots.len()
        );
        Ok(spots)
    }

    pub fn len(&self) -> usize {
        self.spots.len()
    }

    pub fn is_empty(&self) -> bool {
        self.spots.is_empty()
    }

    pub fn iter(&self) -> std::slice::Iter<'_, Spot> {
        self.spots.iter()
    }

    pub fn as_slice(&self) -> &[Spot] {
        &self.spots
    }

    pub fn get(&self, id: usize) -> Option<&Spot> {
        self.spots.get(id)
    }
}

impl<'a> IntoIterator for &'a SpotList {
    type Item = &'a Spot;
    type IntoIter = std::slice::Iter<'a, Spot>;

    fn into_iter(self) -> Self::IntoIter {
        self.spots.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn bounds_are_inclusive() {
        let bounds = SpotBounds::default();
        assert!(bounds.accepts(25, 20)); // area 500
        assert!(bounds.accepts(200, 150)); // area 30000
        assert!(!bounds.accepts(24, 50));
        assert!(!bounds.accepts(50, 19));
        assert!(!bounds.accepts(201, 50));
        assert!(!bounds.accepts(200, 151)); // area 30200
    }

    #[test]
    fn spot_fits_within_frame() {
        let spot = Spot::new(0, 10, 10, 30, 30);
        assert!(spot.fits_within(40, 40));
        assert!(!spot.fits_within(39, 40));
        assert!(!spot.fits_within(40, 39));
    }

    #[test]
    fn from_mask_renumbers_ids_in_resolved_order() {
        let mut mask = GrayImage::new(300, 200);
        // smaller blob first in raster order, larger blob second
        for y in 5..35 {
            for x in 5..35 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        for y in 50..130 {
            for x in 100..180 {
                mask.put_pixel(x, y, Luma([255]));
            }
        }
        let spots = SpotList::from_mask(&mask, 127, &SpotBounds::default(), 0.2).unwrap();
        assert_eq!(spots.len(), 2);
        let ids: Vec<usize> = spots.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1]);
        // largest first after resolution
        assert_eq!(spots.get(0).unwrap().width, 80);
        assert_eq!(spots.get(1).unwrap().width, 30);
    }
}
