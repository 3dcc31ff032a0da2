use image::GrayImage;

use super::{Spot, SpotBounds};

/// Derive candidate spot boxes from a grayscale mask.
///
/// Steps: binarize (`value > threshold`), 3x3 closing, 8-connected labeling, size filter.
/// Boxes come out in labeling order, which is the raster order of each component's
/// first pixel. Ids are the candidate's position in the returned list.
pub fn extract_spot_boxes(mask: &GrayImage, threshold: u8, bounds: &SpotBounds) -> Vec<Spot> {
    let width = mask.width() as usize;
    let height = mask.height() as usize;
    if width == 0 || height == 0 {
        return Vec::new();
    }

    let binary = binarize(mask.as_raw(), threshold);
    let closed = close_3x3(&binary, width, height);

    connected_components(&closed, width, height)
        .into_iter()
        .map(|c| {
            (
                c.min_x as u32,
                c.min_y as u32,
                (c.max_x - c.min_x + 1) as u32,
                (c.max_y - c.min_y + 1) as u32,
            )
        })
        .filter(|&(_, _, w, h)| bounds.accepts(w, h))
        .enumerate()
        .map(|(id, (x, y, w, h))| Spot::new(id, x, y, w, h))
        .collect()
}

fn binarize(pixels: &[u8], threshold: u8) -> Vec<u8> {
    pixels.iter().map(|&p| u8::from(p > threshold)).collect()
}

/// Morphological closing (dilate, then erode) with a 3x3 rectangle.
fn close_3x3(mask: &[u8], width: usize, height: usize) -> Vec<u8> {
    let dilated = rect_filter(mask, width, height, |a, b| a.max(b));
    rect_filter(&dilated, width, height, |a, b| a.min(b))
}

/// Separable 3x3 rank filter. Neighbours outside the image are ignored, so
/// dilation never grows from the border and erosion never eats into it.
fn rect_filter(mask: &[u8], width: usize, height: usize, pick: impl Fn(u8, u8) -> u8) -> Vec<u8> {
    let mut horizontal = vec![0u8; mask.len()];
    for y in 0..height {
        let row = &mask[y * width..(y + 1) * width];
        for x in 0..width {
            let mut value = row[x];
            if x > 0 {
                value = pick(value, row[x - 1]);
            }
            if x + 1 < width {
                value = pick(value, row[x + 1]);
            }
            horizontal[y * width + x] = value;
        }
    }

    let mut out = vec![0u8; mask.len()];
    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            let mut value = horizontal[idx];
            if y > 0 {
                value = pick(value, horizontal[idx - width]);
            }
            if y + 1 < height {
                value = pick(value, horizontal[idx + width]);
            }
            out[idx] = value;
        }
    }
    out
}

#[derive(Clone, Copy, Debug)]
struct ComponentStats {
    min_x: usize,
    max_x: usize,
    min_y: usize,
    max_y: usize,
}

impl ComponentStats {
    fn new(x: usize, y: usize) -> Self {
        Self {
            min_x: x,
            max_x: x,
            min_y: y,
            max_y: y,
        }
    }

    fn include(&mut self, x: usize, y: usize) {
        self.min_x = self.min_x.min(x);
        self.max_x = self.max_x.max(x);
        self.min_y = self.min_y.min(y);
        self.max_y = self.max_y.max(y);
    }
}

/// Two-pass 8-connected labeling. Components are returned in the raster order of
/// their first pixel.
fn connected_components(mask: &[u8], width: usize, height: usize) -> Vec<ComponentStats> {
    let mut labels = vec![0u32; width * height];
    let mut dsu = DisjointSet::new();

    for y in 0..height {
        for x in 0..width {
            let idx = y * width + x;
            if mask[idx] == 0 {
                continue;
            }

            let mut neighbors = [0u32; 4];
            let mut count = 0usize;
            let mut consider = |label: u32| {
                if label != 0 {
                    neighbors[count] = label;
                    count += 1;
                }
            };
            if x > 0 {
                consider(labels[idx - 1]);
            }
            if y > 0 {
                consider(labels[idx - width]);
                if x > 0 {
                    consider(labels[idx - width - 1]);
                }
                if x + 1 < width {
                    consider(labels[idx - width + 1]);
                }
            }

            labels[idx] = if count == 0 {
                dsu.make_set()
            } else {
                let base = neighbors[0];
                for &n in neighbors.iter().take(count).skip(1) {
                    dsu.union(base, n);
                }
                base
            };
        }
    }

    // root label -> position in output
    let mut slot_for_root: Vec<Option<usize>> = vec![None; dsu.len()];
    let mut components: Vec<ComponentStats> = Vec::new();

    for y in 0..height {
        for x in 0..width {
            let label = labels[y * width + x];
            if label == 0 {
                continue;
            }
            let root = dsu.find(label) as usize;
            match slot_for_root[root] {
                Some(slot) => components[slot].include(x, y),
                None => {
                    slot_for_root[root] = Some(components.len());
                    components.push(ComponentStats::new(x, y));
                }
            }
        }
    }
    components
}

struct DisjointSet {
    parent: Vec<u32>,
    rank: Vec<u8>,
}

impl DisjointSet {
    fn new() -> Self {
        // index 0 is reserved for background
        Self {
            parent: vec![0],
            rank: vec![0],
        }
    }

    fn len(&self) -> usize {
        self.parent.len()
    }

    fn make_set(&mut self) -> u32 {
        let idx = self.parent.len() as u32;
        self.parent.push(idx);
        self.rank.push(0);
        idx
    }

    fn find(&mut self, x: u32) -> u32 {
        let mut root = x;
        while self.parent[root as usize] != root {
            root = self.parent[root as usize];
        }
        let mut cursor = x;
        while self.parent[cursor as usize] != root {
            let next = self.parent[cursor as usize];
            self.parent[cursor as usize] = root;
            cursor = next;
        }
        root
    }

    fn union(&mut self, a: u32, b: u32) {
        let mut root_a = self.find(a);
        let mut root_b = self.find(b);
        if root_a == root_b {
            return;
        }
        let rank_a = self.rank[root_a as usize];
        let rank_b = self.rank[root_b as usize];
        if rank_a < rank_b {
            std::mem::swap(&mut root_a, &mut root_b);
        }
        self.parent[root_b as usize] = root_a;
        if rank_a == rank_b {
            self.rank[root_a as usize] = rank_a + 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    fn paint(mask: &mut GrayImage, x: u32, y: u32, w: u32, h: u32, value: u8) {
        for yy in y..y + h {
            for xx in x..x + w {
                mask.put_pixel(xx, yy, Luma([value]));
            }
        }
    }

    fn dims(spots: &[Spot]) -> Vec<(u32, u32, u32, u32)> {
        spots.iter().map(|s| (s.x, s.y, s.width, s.height)).collect()
    }

    #[test]
    fn empty_and_blank_masks_yield_nothing() {
        let bounds = SpotBounds::default();
        assert!(extract_spot_boxes(&GrayImage::new(0, 0), 127, &bounds).is_empty());
        assert!(extract_spot_boxes(&GrayImage::new(120, 80), 127, &bounds).is_empty());
    }

    #[test]
    fn rectangles_keep_exact_boxes_in_raster_order() {
        let mut mask = GrayImage::new(400, 300);
        paint(&mut mask, 200, 100, 30, 90, 255);
        paint(&mut mask, 10, 10, 40, 60, 255);
        paint(&mut mask, 100, 20, 50, 50, 255);

        let spots = extract_spot_boxes(&mask, 127, &SpotBounds::default());
        assert_eq!(
            dims(&spots),
            vec![(10, 10, 40, 60), (100, 20, 50, 50), (200, 100, 30, 90)]
        );
        let ids: Vec<usize> = spots.iter().map(|s| s.id).collect();
        assert_eq!(ids, vec![0, 1, 2]);
    }

    #[test]
    fn pixels_at_threshold_are_background() {
        let mut mask = GrayImage::new(200, 200);
        paint(&mut mask, 10, 10, 50, 50, 127);
        paint(&mut mask, 100, 100, 50, 50, 128);
        let spots = extract_spot_boxes(&mask, 127, &SpotBounds::default());
        assert_eq!(dims(&spots), vec![(100, 100, 50, 50)]);
    }

    #[test]
    fn closing_fills_small_holes_and_bridges_one_pixel_gaps() {
        let mut mask = GrayImage::new(200, 200);
        paint(&mut mask, 20, 20, 60, 40, 255);
        // pinhole inside the blob
        mask.put_pixel(50, 40, Luma([0]));
        // one-pixel column gap splitting the blob in two
        paint(&mut mask, 40, 20, 1, 40, 0);

        let spots = extract_spot_boxes(&mask, 127, &SpotBounds::default());
        assert_eq!(dims(&spots), vec![(20, 20, 60, 40)]);
    }

    #[test]
    fn diagonal_touching_blobs_are_one_component() {
        let mut mask = GrayImage::new(200, 200);
        paint(&mut mask, 10, 10, 30, 30, 255);
        paint(&mut mask, 40, 40, 30, 30, 255);
        let spots = extract_spot_boxes(&mask, 127, &SpotBounds::default());
        assert_eq!(dims(&spots), vec![(10, 10, 60, 60)]);
    }

    #[test]
    fn out_of_bounds_components_are_filtered() {
        let mut mask = GrayImage::new(600, 400);
        paint(&mut mask, 5, 5, 10, 10, 255); // too small
        paint(&mut mask, 50, 50, 250, 40, 255); // too wide
        paint(&mut mask, 50, 150, 30, 30, 255); // ok
        paint(&mut mask, 350, 150, 190, 190, 255); // area too large
        let bounds = SpotBounds::default();
        let spots = extract_spot_boxes(&mask, 127, &bounds);
        assert_eq!(dims(&spots), vec![(50, 150, 30, 30)]);
        for spot in &spots {
            assert!(bounds.accepts(spot.width, spot.height));
        }
    }

    #[test]
    fn blobs_touching_the_border_are_not_eroded() {
        let mut mask = GrayImage::new(100, 100);
        paint(&mut mask, 0, 0, 40, 30, 255);
        let spots = extract_spot_boxes(&mask, 127, &SpotBounds::default());
        assert_eq!(dims(&spots), vec![(0, 0, 40, 30)]);
    }
}
