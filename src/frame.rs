//! Captured media and the latest-wins hand-off slot.
//!
//! - `Frame`: one synchronized color + depth capture with its timestamp.
//! - `PointCloud`: 3D points (meters) derived from a frame's depth channel.
//! - `Latest<T>`: single-slot buffer. Each `set` replaces the previous value;
//!   `snapshot` returns the newest completed write.
//!
//! Image and point payloads sit behind `Arc`, so handing a frame to a consumer
//! is a pointer copy and nobody can mutate a frame another thread is reading.

use chrono::{DateTime, Utc};
use image::{ImageBuffer, Luma, RgbImage};
use std::sync::{Arc, Mutex};

/// Depth image in millimeters; zero marks an invalid sample.
pub type DepthImage = ImageBuffer<Luma<u16>, Vec<u16>>;

/// One synchronized color + depth capture.
#[derive(Clone, Debug)]
pub struct Frame {
    color: Arc<RgbImage>,
    depth: Arc<DepthImage>,
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(color: RgbImage, depth: DepthImage) -> Self {
        Self::with_timestamp(color, depth, Utc::now())
    }

    pub fn with_timestamp(color: RgbImage, depth: DepthImage, captured_at: DateTime<Utc>) -> Self {
        Self {
            color: Arc::new(color),
            depth: Arc::new(depth),
            captured_at,
        }
    }

    pub fn color(&self) -> &RgbImage {
        &self.color
    }

    pub fn depth(&self) -> &DepthImage {
        &self.depth
    }

    /// Shared handle to the color image (no pixel copy).
    pub fn color_arc(&self) -> Arc<RgbImage> {
        self.color.clone()
    }

    /// Shared handle to the depth image (no pixel copy).
    pub fn depth_arc(&self) -> Arc<DepthImage> {
        self.depth.clone()
    }
}

/// A point in sensor space, meters.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct Point3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Point3 {
    pub const fn new(x: f32, y: f32, z: f32) -> Self {
        Self { x, y, z }
    }
}

/// Ordered point sequence. Cloning shares the underlying buffer.
#[derive(Clone, Debug, Default)]
pub struct PointCloud {
    points: Arc<[Point3]>,
}

impl PointCloud {
    pub fn new(points: Vec<Point3>) -> Self {
        Self {
            points: points.into(),
        }
    }

    pub fn points(&self) -> &[Point3] {
        &self.points
    }

    pub fn len(&self) -> usize {
        self.points.len()
    }

    pub fn is_empty(&self) -> bool {
        self.points.is_empty()
    }

    /// Mean and population standard deviation over all coordinates, flattened.
    pub fn coordinate_stats(&self) -> (f64, f64) {
        let n = (self.points.len() * 3) as f64;
        if n == 0.0 {
            return (0.0, 0.0);
        }
        let sum: f64 = self
            .points
            .iter()
            .map(|p| p.x as f64 + p.y as f64 + p.z as f64)
            .sum();
        let mean = sum / n;
        let var: f64 = self
            .points
            .iter()
            .flat_map(|p| [p.x as f64, p.y as f64, p.z as f64])
            .map(|v| (v - mean) * (v - mean))
            .sum::<f64>()
            / n;
        (mean, var.sqrt())
    }

    /// Per-axis centroid.
    pub fn centroid(&self) -> Point3 {
        if self.points.is_empty() {
            return Point3::default();
        }
        let n = self.points.len() as f64;
        let (sx, sy, sz) = self.points.iter().fold((0.0, 0.0, 0.0), |acc, p| {
            (acc.0 + p.x as f64, acc.1 + p.y as f64, acc.2 + p.z as f64)
        });
        Point3::new((sx / n) as f32, (sy / n) as f32, (sz / n) as f32)
    }
}

/// Single-slot latest-wins buffer.
///
/// The lock is held only to swap or copy a value whose payload is shared, so
/// a writer never waits on a slow reader and a reader never sees a partial
/// value.
#[derive(Debug)]
pub struct Latest<T> {
    slot: Mutex<Option<T>>,
}

impl<T: Clone> Latest<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    pub fn set(&self, value: T) {
        let previous = {
            let mut slot = match self.slot.lock() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            slot.replace(value)
        };
        // Drop the replaced value outside the lock.
        drop(previous);
    }

    pub fn snapshot(&self) -> Option<T> {
        match self.slot.lock() {
            Ok(slot) => slot.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    pub fn is_empty(&self) -> bool {
        match self.slot.lock() {
            Ok(slot) => slot.is_none(),
            Err(poisoned) => poisoned.into_inner().is_none(),
        }
    }

    pub fn clear(&self) {
        let previous = match self.slot.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        drop(previous);
    }
}

impl<T: Clone> Default for Latest<T> {
    fn default() -> Self {
        Self::new()
    }
}
