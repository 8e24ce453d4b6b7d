//! Synthetic depth sensor (`stub://`) for tests and hardware-free runs.
//!
//! Produces a fixed scene: a far background wall, a shelf face closer to the
//! camera, and a few boxes standing on it. Every 50 frames one box shifts so
//! consecutive scans are not all identical.

use image::{Luma, Rgb, RgbImage};

use super::{back_project, DepthSensor, Intrinsics, SensorCapture, SensorConfig};
use crate::error::CaptureError;
use crate::frame::{DepthImage, PointCloud};

const BACKGROUND_MM: u16 = 2500;
const SHELF_MM: u16 = 1200;
const BOX_MM: u16 = 950;

pub struct SyntheticSensor {
    config: SensorConfig,
    started: bool,
    frame_count: u64,
    /// Simulated scene state; advances every 50 frames.
    scene_state: u8,
}

impl SyntheticSensor {
    pub fn new(config: SensorConfig) -> Self {
        Self {
            config,
            started: false,
            frame_count: 0,
            scene_state: 0,
        }
    }

    pub fn frames_generated(&self) -> u64 {
        self.frame_count
    }

    fn shelf_rect(&self) -> (u32, u32, u32, u32) {
        let w = self.config.width;
        let h = self.config.height;
        (w * 15 / 100, h / 10, w * 85 / 100, h * 9 / 10)
    }

    fn box_rects(&self) -> Vec<(u32, u32, u32, u32)> {
        let (x0, y0, x1, y1) = self.shelf_rect();
        let span = x1 - x0;
        let rise = y1 - y0;
        let shift = (self.scene_state as u32 % 4) * span / 40;
        vec![
            (x0 + span / 10 + shift, y1 - rise / 3, x0 + span * 3 / 10 + shift, y1 - 4),
            (x0 + span * 4 / 10, y1 - rise / 4, x0 + span * 6 / 10, y1 - 4),
            (x0 + span * 7 / 10, y0 + rise / 3, x0 + span * 9 / 10, y0 + rise / 2),
        ]
    }

    fn render(&self) -> (RgbImage, DepthImage) {
        let w = self.config.width;
        let h = self.config.height;
        let (sx0, sy0, sx1, sy1) = self.shelf_rect();
        let boxes = self.box_rects();

        let mut color = RgbImage::new(w, h);
        let mut depth = DepthImage::new(w, h);
        for y in 0..h {
            for x in 0..w {
                let in_box = boxes
                    .iter()
                    .any(|&(bx0, by0, bx1, by1)| x >= bx0 && x < bx1 && y >= by0 && y < by1);
                let in_shelf = x >= sx0 && x < sx1 && y >= sy0 && y < sy1;
                let shade = ((x + y + self.scene_state as u32) % 16) as u8;
                let (rgb, mm) = if in_box {
                    ([150 + shade, 110, 60], BOX_MM)
                } else if in_shelf {
                    ([120 + shade, 120 + shade, 125], SHELF_MM)
                } else {
                    ([30 + shade, 30, 40], BACKGROUND_MM)
                };
                color.put_pixel(x, y, Rgb(rgb));
                depth.put_pixel(x, y, Luma([mm]));
            }
        }
        (color, depth)
    }
}

impl DepthSensor for SyntheticSensor {
    fn name(&self) -> &str {
        &self.config.url
    }

    fn start(&mut self) -> Result<(), CaptureError> {
        self.started = true;
        log::info!("SyntheticSensor: started {} (synthetic)", self.config.url);
        Ok(())
    }

    fn stop(&mut self) -> Result<(), CaptureError> {
        self.started = false;
        log::info!("SyntheticSensor: stopped {}", self.config.url);
        Ok(())
    }

    fn acquire(&mut self) -> Result<SensorCapture, CaptureError> {
        if !self.started {
            return Err(CaptureError::NotOpen);
        }
        self.frame_count += 1;
        if self.frame_count % 50 == 0 {
            self.scene_state = self.scene_state.wrapping_add(1);
        }
        let (color, depth) = self.render();
        Ok(SensorCapture {
            color: Some(color),
            depth: Some(depth),
        })
    }

    fn depth_to_point_cloud(&self, depth: &DepthImage) -> Result<PointCloud, CaptureError> {
        Ok(back_project(
            depth,
            Intrinsics::approximate(depth.width(), depth.height()),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_sensor() -> SyntheticSensor {
        SyntheticSensor::new(SensorConfig {
            url: "stub://test".to_string(),
            width: 64,
            height: 48,
            ..SensorConfig::default()
        })
    }

    #[test]
    fn acquire_requires_start() {
        let mut sensor = small_sensor();
        assert!(matches!(sensor.acquire(), Err(CaptureError::NotOpen)));
        sensor.start().unwrap();
        let frame = sensor.acquire().unwrap().into_frame().unwrap();
        assert_eq!(frame.color().dimensions(), (64, 48));
        assert_eq!(frame.depth().dimensions(), (64, 48));
        assert_eq!(sensor.frames_generated(), 1);
    }

    #[test]
    fn scene_has_shelf_and_boxes() {
        let mut sensor = small_sensor();
        sensor.start().unwrap();
        let frame = sensor.acquire().unwrap().into_frame().unwrap();
        let depths: std::collections::HashSet<u16> =
            frame.depth().pixels().map(|p| p.0[0]).collect();
        assert!(depths.contains(&BACKGROUND_MM));
        assert!(depths.contains(&SHELF_MM));
        assert!(depths.contains(&BOX_MM));

        let cloud = sensor.depth_to_point_cloud(frame.depth()).unwrap();
        assert_eq!(cloud.len(), 64 * 48);
    }
}
