use anyhow::{anyhow, Result};

use super::{Spot, SpotList};

/// Intersection-over-union of two axis-aligned boxes; 0 when they do not intersect.
pub fn iou(a: &Spot, b: &Spot) -> f64 {
    let left = a.x.max(b.x) as u64;
    let top = a.y.max(b.y) as u64;
    let right = a.right().min(b.right());
    let bottom = a.bottom().min(b.bottom());
    if right <= left || bottom <= top {
        return 0.0;
    }
    let intersection = (right - left) * (bottom - top);
    let union = a.area() + b.area() - intersection;
    if union == 0 {
        0.0
    } else {
        intersection as f64 / union as f64
    }
}

/// Greedy largest-first de-duplication.
///
/// Boxes are stable-sorted by area, descending, and each is kept unless its IoU with
/// any already-kept box exceeds `overlap_threshold`. The result keeps the filtering
/// order; ids are renumbered to list positions.
pub fn resolve_overlaps(mut boxes: Vec<Spot>, overlap_threshold: f64) -> Result<SpotList> {
    if !(overlap_threshold > 0.0 && overlap_threshold < 1.0) {
        return Err(anyhow!(
            "overlap threshold must be in (0, 1), got {}",
            overlap_threshold
        ));
    }

    boxes.sort_by(|a, b| b.area().cmp(&a.area()));

    let mut kept: Vec<Spot> = Vec::with_capacity(boxes.len());
    for candidate in boxes {
        let duplicate_of = kept
            .iter()
            .find(|k| iou(&candidate, k) > overlap_threshold);
        match duplicate_of {
            Some(existing) => log::debug!(
                "dropping spot candidate {}x{}@({},{}) overlapping {}x{}@({},{})",
                candidate.width,
                candidate.height,
                candidate.x,
                candidate.y,
                existing.width,
                existing.height,
                existing.x,
                existing.y
            ),
            None => kept.push(candidate),
        }
    }
    Ok(SpotList::from_resolved(kept))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spot(x: u32, y: u32, w: u32, h: u32) -> Spot {
        Spot::new(0, x, y, w, h)
    }

    #[test]
    fn iou_of_disjoint_and_touching_boxes_is_zero() {
        assert_eq!(iou(&spot(0, 0, 10, 10), &spot(20, 20, 10, 10)), 0.0);
        assert_eq!(iou(&spot(0, 0, 10, 10), &spot(10, 0, 10, 10)), 0.0);
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        assert_eq!(iou(&spot(5, 5, 40, 30), &spot(5, 5, 40, 30)), 1.0);
    }

    #[test]
    fn iou_of_half_shifted_boxes() {
        // intersection 50, union 150
        let value = iou(&spot(0, 0, 10, 10), &spot(5, 0, 10, 10));
        assert!((value - 1.0 / 3.0).abs() < 1e-12);
    }

    #[test]
    fn rejects_threshold_outside_open_unit_interval() {
        assert!(resolve_overlaps(vec![], 0.0).is_err());
        assert!(resolve_overlaps(vec![], 1.0).is_err());
        assert!(resolve_overlaps(vec![], f64::NAN).is_err());
        assert!(resolve_overlaps(vec![], 0.5).unwrap().is_empty());
    }

    #[test]
    fn equal_area_ties_keep_input_order() {
        let boxes = vec![spot(0, 0, 40, 40), spot(100, 0, 40, 40), spot(200, 0, 40, 40)];
        let list = resolve_overlaps(boxes, 0.3).unwrap();
        let xs: Vec<u32> = list.iter().map(|s| s.x).collect();
        assert_eq!(xs, vec![0, 100, 200]);
    }

    #[test]
    fn iou_at_threshold_is_kept() {
        // 30x30 inside 60x60: IoU exactly 0.25
        let boxes = vec![spot(0, 0, 60, 60), spot(0, 0, 30, 30)];
        assert_eq!(resolve_overlaps(boxes.clone(), 0.25).unwrap().len(), 2);
        assert_eq!(resolve_overlaps(boxes, 0.2).unwrap().len(), 1);
    }

    #[test]
    fn kept_pairs_never_exceed_threshold() {
        let mut boxes = Vec::new();
        for i in 0..12u32 {
            boxes.push(spot(i * 7, (i % 3) * 9, 30 + (i % 4) * 5, 25 + (i % 5) * 4));
        }
        let threshold = 0.3;
        let list = resolve_overlaps(boxes, threshold).unwrap();
        let spots = list.as_slice();
        for (i, a) in spots.iter().enumerate() {
            for b in &spots[i + 1..] {
                assert!(iou(a, b) <= threshold);
            }
        }
        // output is in filtering order: areas never increase
        for pair in spots.windows(2) {
            assert!(pair[0].area() >= pair[1].area());
        }
    }
}
