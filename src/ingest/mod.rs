//! Depth sensor ingestion.
//!
//! This module provides:
//! - `DepthSensor`: the boundary to the physical sensor driver
//! - `SyntheticSensor`: a hardware-free sensor for `stub://` URLs
//! - `FrameSource`: owns the sensor, runs continuous capture, serves latest frames
//! - `estimate_shelf_dimensions`: approximate shelf volume from a depth image
//!
//! Sensor failures are retryable. Only opening the sensor at construction is
//! fatal for a processor.

pub mod shelf;
pub mod source;
pub mod synthetic;

use image::RgbImage;
use std::time::Duration;

use crate::error::CaptureError;
use crate::frame::{DepthImage, Frame, Point3, PointCloud};

pub use shelf::{estimate_shelf_dimensions, ShelfDimensions};
pub use source::{CaptureSettings, CaptureStats, FrameSource};
pub use synthetic::SyntheticSensor;

/// Raw output of one sensor acquisition. Either channel may be missing.
#[derive(Clone, Debug, Default)]
pub struct SensorCapture {
    pub color: Option<RgbImage>,
    pub depth: Option<DepthImage>,
}

impl SensorCapture {
    /// Build a frame, failing unless both channels are present.
    pub fn into_frame(self) -> Result<Frame, CaptureError> {
        match (self.color, self.depth) {
            (Some(color), Some(depth)) => Ok(Frame::new(color, depth)),
            _ => Err(CaptureError::Incomplete),
        }
    }
}

/// Depth sensor driver boundary.
///
/// Implementations own the device handle. Calls are serialized by
/// `FrameSource`; `acquire` may block for up to one sensor frame period.
pub trait DepthSensor: Send {
    /// Sensor identifier for logs and status.
    fn name(&self) -> &str;

    /// Open the device and begin streaming.
    fn start(&mut self) -> Result<(), CaptureError>;

    /// Stop streaming and release the device.
    fn stop(&mut self) -> Result<(), CaptureError>;

    /// Acquire one synchronized capture.
    fn acquire(&mut self) -> Result<SensorCapture, CaptureError>;

    /// Back-project a depth image into a point cloud.
    fn depth_to_point_cloud(&self, depth: &DepthImage) -> Result<PointCloud, CaptureError>;
}

/// Sensor selection resolved from configuration.
#[derive(Clone, Debug)]
pub struct SensorConfig {
    /// `stub://<name>` selects the synthetic sensor.
    pub url: String,
    pub width: u32,
    pub height: u32,
    /// Settle time after the device starts.
    pub warmup: Duration,
}

impl Default for SensorConfig {
    fn default() -> Self {
        Self {
            url: "stub://shelf_cam".to_string(),
            width: 640,
            height: 480,
            warmup: Duration::ZERO,
        }
    }
}

/// Construct the sensor named by `config.url`.
pub fn open_sensor(config: &SensorConfig) -> Result<Box<dyn DepthSensor>, CaptureError> {
    if config.url.starts_with("stub://") {
        return Ok(Box::new(SyntheticSensor::new(config.clone())));
    }
    Err(CaptureError::Device(format!(
        "no driver for sensor url '{}' (only stub:// is built in)",
        config.url
    )))
}

/// Placeholder pinhole intrinsics. Not a calibration.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Intrinsics {
    pub fx: f32,
    pub fy: f32,
    pub cx: f32,
    pub cy: f32,
}

impl Intrinsics {
    /// Rough intrinsics for a ~75 degree horizontal field of view.
    pub fn approximate(width: u32, height: u32) -> Self {
        let focal = width as f32 * 0.65;
        Self {
            fx: focal,
            fy: focal,
            cx: width as f32 / 2.0,
            cy: height as f32 / 2.0,
        }
    }
}

/// Back-project valid (non-zero) depth samples; millimeters in, meters out.
pub fn back_project(depth: &DepthImage, intrinsics: Intrinsics) -> PointCloud {
    let mut points = Vec::with_capacity((depth.width() * depth.height()) as usize);
    for (u, v, sample) in depth.enumerate_pixels() {
        let mm = sample.0[0];
        if mm == 0 {
            continue;
        }
        let z = mm as f32 / 1000.0;
        let x = (u as f32 - intrinsics.cx) * z / intrinsics.fx;
        let y = (v as f32 - intrinsics.cy) * z / intrinsics.fy;
        points.push(Point3::new(x, y, z));
    }
    PointCloud::new(points)
}
