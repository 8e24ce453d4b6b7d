//! Approximate shelf volume from a depth image.
//!
//! Pipeline: Sobel gradient on the depth map, hysteresis edge thresholding,
//! 8-connected grouping of edge pixels, then the bounding box of the largest
//! group. Pixel extents become meters through a fixed scale factor; this is a
//! placeholder until the camera pose is calibrated.

use serde::Serialize;

use crate::frame::DepthImage;

/// Pixel to meter conversion for the bounding box. Uncalibrated.
pub const PIXEL_TO_METER: f64 = 0.001;

/// Gradient magnitude (mm per pixel, Sobel-weighted) that may extend an edge.
const WEAK_EDGE: f64 = 100.0;
/// Gradient magnitude that may start an edge.
const STRONG_EDGE: f64 = 200.0;

/// Used when no valid depth falls inside the detected box.
const FALLBACK_DEPTH_M: f64 = 0.5;

#[derive(Clone, Copy, Debug, PartialEq, Serialize)]
pub struct ShelfDimensions {
    pub width: f64,
    pub height: f64,
    pub depth: f64,
}

impl ShelfDimensions {
    pub fn volume(&self) -> f64 {
        self.width * self.height * self.depth
    }
}

impl Default for ShelfDimensions {
    fn default() -> Self {
        Self {
            width: 1.0,
            height: 2.0,
            depth: 0.5,
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
struct BoundingBox {
    min_x: u32,
    min_y: u32,
    max_x: u32,
    max_y: u32,
}

impl BoundingBox {
    fn width(&self) -> u32 {
        self.max_x - self.min_x + 1
    }

    fn height(&self) -> u32 {
        self.max_y - self.min_y + 1
    }

    fn area(&self) -> u64 {
        self.width() as u64 * self.height() as u64
    }
}

/// Estimate the monitored shelf volume. Returns the defaults when no edge
/// group is found.
pub fn estimate_shelf_dimensions(depth: &DepthImage) -> ShelfDimensions {
    let (width, height) = depth.dimensions();
    if width < 3 || height < 3 {
        return ShelfDimensions::default();
    }

    let magnitude = sobel_magnitude(depth);
    let Some(bbox) = largest_edge_group(&magnitude, width, height) else {
        log::debug!("shelf: no edges found, using default dimensions");
        return ShelfDimensions::default();
    };

    let mut sum = 0u64;
    let mut valid = 0u64;
    for y in bbox.min_y..=bbox.max_y {
        for x in bbox.min_x..=bbox.max_x {
            let mm = depth.get_pixel(x, y).0[0];
            if mm > 0 {
                sum += mm as u64;
                valid += 1;
            }
        }
    }
    let avg_depth = if valid > 0 {
        sum as f64 / valid as f64 / 1000.0
    } else {
        FALLBACK_DEPTH_M
    };

    ShelfDimensions {
        width: bbox.width() as f64 * PIXEL_TO_METER,
        height: bbox.height() as f64 * PIXEL_TO_METER,
        depth: avg_depth,
    }
}

/// Gradient magnitude per pixel, row-major. Border pixels are zero.
fn sobel_magnitude(depth: &DepthImage) -> Vec<f64> {
    let (width, height) = depth.dimensions();
    let w = width as usize;
    let mut out = vec![0.0; w * height as usize];
    let at = |x: u32, y: u32| depth.get_pixel(x, y).0[0] as f64;

    for y in 1..height - 1 {
        for x in 1..width - 1 {
            let gx = (at(x + 1, y - 1) + 2.0 * at(x + 1, y) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x - 1, y) + at(x - 1, y + 1));
            let gy = (at(x - 1, y + 1) + 2.0 * at(x, y + 1) + at(x + 1, y + 1))
                - (at(x - 1, y - 1) + 2.0 * at(x, y - 1) + at(x + 1, y - 1));
            out[y as usize * w + x as usize] = (gx * gx + gy * gy).sqrt();
        }
    }
    out
}

/// Bounding box of the largest 8-connected group of weak edge pixels that
/// contains at least one strong edge pixel.
fn largest_edge_group(magnitude: &[f64], width: u32, height: u32) -> Option<BoundingBox> {
    let w = width as usize;
    let mut visited = vec![false; magnitude.len()];
    let mut best: Option<BoundingBox> = None;

    for start in 0..magnitude.len() {
        if visited[start] || magnitude[start] < STRONG_EDGE {
            continue;
        }

        visited[start] = true;
        let mut queue = vec![start];
        let mut bbox = BoundingBox {
            min_x: u32::MAX,
            min_y: u32::MAX,
            max_x: 0,
            max_y: 0,
        };

        while let Some(index) = queue.pop() {
            let x = (index % w) as i64;
            let y = (index / w) as i64;
            bbox.min_x = bbox.min_x.min(x as u32);
            bbox.min_y = bbox.min_y.min(y as u32);
            bbox.max_x = bbox.max_x.max(x as u32);
            bbox.max_y = bbox.max_y.max(y as u32);

            for dy in -1..=1 {
                for dx in -1..=1 {
                    if dx == 0 && dy == 0 {
                        continue;
                    }
                    let nx = x + dx;
                    let ny = y + dy;
                    if nx < 0 || ny < 0 || nx >= width as i64 || ny >= height as i64 {
                        continue;
                    }
                    let neighbor = ny as usize * w + nx as usize;
                    if !visited[neighbor] && magnitude[neighbor] >= WEAK_EDGE {
                        visited[neighbor] = true;
                        queue.push(neighbor);
                    }
                }
            }
        }

        if best.map_or(true, |b| bbox.area() > b.area()) {
            best = Some(bbox);
        }
    }
    best
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Luma;

    #[test]
    fn flat_depth_uses_defaults() {
        let depth = DepthImage::from_pixel(40, 30, Luma([1500]));
        assert_eq!(estimate_shelf_dimensions(&depth), ShelfDimensions::default());
        assert_eq!(ShelfDimensions::default().volume(), 1.0);
    }

    #[test]
    fn largest_region_sets_extent_and_depth() {
        let mut depth = DepthImage::from_pixel(100, 80, Luma([2500]));
        // Large region at 1.2 m.
        for y in 10..70 {
            for x in 20..80 {
                depth.put_pixel(x, y, Luma([1200]));
            }
        }
        // Small separate region.
        for y in 2..6 {
            for x in 2..6 {
                depth.put_pixel(x, y, Luma([900]));
            }
        }

        let dims = estimate_shelf_dimensions(&depth);
        // Edge band straddles the step by one pixel on each side.
        assert!((dims.width - 0.062).abs() < 1e-9, "width {}", dims.width);
        assert!((dims.height - 0.062).abs() < 1e-9, "height {}", dims.height);
        assert!(dims.depth > 1.2 && dims.depth < 2.5);
    }

    #[test]
    fn invalid_samples_fall_back_to_default_depth() {
        let mut depth = DepthImage::from_pixel(50, 50, Luma([0]));
        for y in 10..40 {
            for x in 10..40 {
                depth.put_pixel(x, y, Luma([800]));
            }
        }
        let dims = estimate_shelf_dimensions(&depth);
        // Box contains the 800 mm region plus a ring of zeros; zeros are skipped.
        assert!((dims.depth - 0.8).abs() < 1e-9);
    }

    #[test]
    fn tiny_images_use_defaults() {
        let depth = DepthImage::from_pixel(2, 2, Luma([1000]));
        assert_eq!(estimate_shelf_dimensions(&depth), ShelfDimensions::default());
    }
}
