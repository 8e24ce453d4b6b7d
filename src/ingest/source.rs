//! `FrameSource`: sensor ownership, continuous capture and latest-frame buffers.

use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use super::shelf::{estimate_shelf_dimensions, ShelfDimensions};
use super::DepthSensor;
use crate::error::CaptureError;
use crate::frame::{DepthImage, Frame, Latest, PointCloud};
use crate::worker::{StopToken, Worker};

/// Timing knobs for the capture loop.
#[derive(Clone, Copy, Debug)]
pub struct CaptureSettings {
    /// Yield between successful acquisitions. The sensor's own frame rate is
    /// the real limit.
    pub yield_delay: Duration,
    /// Pause after a failed acquisition.
    pub retry_delay: Duration,
    /// Bounded wait when stopping the capture loop.
    pub join_timeout: Duration,
    /// Settle time after the sensor starts.
    pub warmup: Duration,
}

impl Default for CaptureSettings {
    fn default() -> Self {
        Self {
            yield_delay: Duration::from_millis(10),
            retry_delay: Duration::from_millis(100),
            join_timeout: Duration::from_secs(5),
            warmup: Duration::ZERO,
        }
    }
}

/// Capture counters for status reporting.
#[derive(Clone, Debug, Default, serde::Serialize)]
pub struct CaptureStats {
    pub frames_captured: u64,
    pub capture_failures: u64,
    pub last_capture: Option<DateTime<Utc>>,
    pub continuous: bool,
}

/// Frame and point cloud from the same acquisition.
#[derive(Clone, Debug)]
pub struct CapturedScene {
    pub frame: Frame,
    pub cloud: PointCloud,
}

struct Shared {
    sensor: Mutex<Box<dyn DepthSensor>>,
    open: AtomicBool,
    latest: Latest<CapturedScene>,
    frames_captured: AtomicU64,
    capture_failures: AtomicU64,
    last_capture: Latest<DateTime<Utc>>,
}

impl Shared {
    /// One synchronous acquisition. The sensor lock covers the device call
    /// only; buffers are never touched while it is held.
    fn acquire_scene(&self) -> Result<CapturedScene, CaptureError> {
        if !self.open.load(Ordering::SeqCst) {
            return Err(CaptureError::NotOpen);
        }
        let result = {
            let mut sensor = self.sensor.lock().map_err(|_| CaptureError::Poisoned)?;
            sensor.acquire().and_then(|capture| {
                let frame = capture.into_frame()?;
                let cloud = sensor.depth_to_point_cloud(frame.depth())?;
                Ok(CapturedScene { frame, cloud })
            })
        };
        match &result {
            Ok(scene) => {
                self.frames_captured.fetch_add(1, Ordering::Relaxed);
                self.last_capture.set(scene.frame.captured_at);
            }
            Err(_) => {
                self.capture_failures.fetch_add(1, Ordering::Relaxed);
            }
        }
        result
    }
}

/// Owns the depth sensor and serves the most recent capture.
///
/// In continuous mode a background worker keeps the buffer fresh and
/// `capture_frame`/`point_cloud` return the buffered values without touching
/// the sensor. Otherwise every call performs one synchronous acquisition.
pub struct FrameSource {
    shared: Arc<Shared>,
    settings: CaptureSettings,
    capture: Mutex<Option<Worker>>,
}

impl FrameSource {
    /// Start the sensor. Failure here is fatal for the owning processor.
    pub fn open(sensor: Box<dyn DepthSensor>, settings: CaptureSettings) -> Result<Self, CaptureError> {
        let source = Self {
            shared: Arc::new(Shared {
                sensor: Mutex::new(sensor),
                open: AtomicBool::new(false),
                latest: Latest::new(),
                frames_captured: AtomicU64::new(0),
                capture_failures: AtomicU64::new(0),
                last_capture: Latest::new(),
            }),
            settings,
            capture: Mutex::new(None),
        };
        source.reopen()?;
        Ok(source)
    }

    /// Start the sensor again after `close`. No-op when already open.
    pub fn reopen(&self) -> Result<(), CaptureError> {
        if self.shared.open.load(Ordering::SeqCst) {
            return Ok(());
        }
        let name = {
            let mut sensor = self.shared.sensor.lock().map_err(|_| CaptureError::Poisoned)?;
            sensor.start()?;
            sensor.name().to_string()
        };
        if !self.settings.warmup.is_zero() {
            std::thread::sleep(self.settings.warmup);
        }
        self.shared.open.store(true, Ordering::SeqCst);
        log::info!("FrameSource: sensor {} open", name);
        Ok(())
    }

    pub fn is_open(&self) -> bool {
        self.shared.open.load(Ordering::SeqCst)
    }

    pub fn start_continuous_capture(&self) -> Result<(), CaptureError> {
        let mut slot = self.capture.lock().map_err(|_| CaptureError::Poisoned)?;
        if slot.as_ref().is_some_and(Worker::is_running) {
            log::warn!("FrameSource: continuous capture already active");
            return Ok(());
        }
        if !self.is_open() {
            return Err(CaptureError::NotOpen);
        }
        let shared = self.shared.clone();
        let settings = self.settings;
        let worker = Worker::spawn("frame-capture", move |token| {
            capture_loop(&shared, settings, &token)
        })
        .map_err(|e| CaptureError::Device(format!("spawn capture thread: {}", e)))?;
        *slot = Some(worker);
        log::info!("FrameSource: continuous capture started");
        Ok(())
    }

    /// Stop the capture loop and drop buffered data.
    pub fn stop_continuous_capture(&self) -> Result<(), CaptureError> {
        let worker = {
            let mut slot = self.capture.lock().map_err(|_| CaptureError::Poisoned)?;
            slot.take()
        };
        let Some(worker) = worker else {
            log::warn!("FrameSource: continuous capture not active");
            return Ok(());
        };
        if !worker.stop(self.settings.join_timeout) {
            log::warn!("FrameSource: capture loop still finishing its last acquisition");
        }
        self.shared.latest.clear();
        log::info!("FrameSource: continuous capture stopped");
        Ok(())
    }

    pub fn is_continuous(&self) -> bool {
        match self.capture.lock() {
            Ok(slot) => slot.as_ref().is_some_and(Worker::is_running),
            Err(_) => false,
        }
    }

    /// Buffered frame in continuous mode, otherwise a fresh acquisition.
    pub fn capture_frame(&self) -> Result<Frame, CaptureError> {
        Ok(self.capture_with_cloud()?.frame)
    }

    /// Buffered point cloud in continuous mode, otherwise a fresh acquisition.
    pub fn point_cloud(&self) -> Result<PointCloud, CaptureError> {
        Ok(self.capture_with_cloud()?.cloud)
    }

    /// Frame and its point cloud from the same acquisition.
    pub fn capture_with_cloud(&self) -> Result<CapturedScene, CaptureError> {
        if self.is_continuous() {
            if let Some(scene) = self.shared.latest.snapshot() {
                return Ok(scene);
            }
        }
        self.shared.acquire_scene()
    }

    pub fn estimate_shelf_dimensions(&self, depth: &DepthImage) -> ShelfDimensions {
        estimate_shelf_dimensions(depth)
    }

    pub fn stats(&self) -> CaptureStats {
        CaptureStats {
            frames_captured: self.shared.frames_captured.load(Ordering::Relaxed),
            capture_failures: self.shared.capture_failures.load(Ordering::Relaxed),
            last_capture: self.shared.last_capture.snapshot(),
            continuous: self.is_continuous(),
        }
    }

    /// Stop capture (if active) and release the sensor.
    pub fn close(&self) -> Result<(), CaptureError> {
        if self.is_continuous() {
            self.stop_continuous_capture()?;
        }
        if !self.shared.open.swap(false, Ordering::SeqCst) {
            return Ok(());
        }
        let mut sensor = self.shared.sensor.lock().map_err(|_| CaptureError::Poisoned)?;
        sensor.stop()?;
        log::info!("FrameSource: sensor {} closed", sensor.name());
        Ok(())
    }
}

impl Drop for FrameSource {
    fn drop(&mut self) {
        if let Err(e) = self.close() {
            log::warn!("FrameSource: close on drop failed: {}", e);
        }
    }
}

fn capture_loop(shared: &Shared, settings: CaptureSettings, token: &StopToken) {
    while token.is_running() {
        match shared.acquire_scene() {
            Ok(scene) => {
                shared.latest.set(scene);
                token.sleep(settings.yield_delay);
            }
            Err(e) => {
                log::warn!("FrameSource: capture failed: {}", e);
                token.sleep(settings.retry_delay);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ingest::{SensorCapture, SensorConfig, SyntheticSensor};
    use std::sync::atomic::AtomicUsize;

    /// Sensor that fails the first `fail_first` acquisitions.
    struct FlakySensor {
        inner: SyntheticSensor,
        fail_first: usize,
        calls: Arc<AtomicUsize>,
    }

    impl DepthSensor for FlakySensor {
        fn name(&self) -> &str {
            "flaky"
        }
        fn start(&mut self) -> Result<(), CaptureError> {
            self.inner.start()
        }
        fn stop(&mut self) -> Result<(), CaptureError> {
            self.inner.stop()
        }
        fn acquire(&mut self) -> Result<SensorCapture, CaptureError> {
            let n = self.calls.fetch_add(1, Ordering::SeqCst);
            if n < self.fail_first {
                return Err(CaptureError::Device("transient".to_string()));
            }
            self.inner.acquire()
        }
        fn depth_to_point_cloud(&self, depth: &DepthImage) -> Result<PointCloud, CaptureError> {
            self.inner.depth_to_point_cloud(depth)
        }
    }

    fn flaky(fail_first: usize) -> (Box<dyn DepthSensor>, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let sensor = FlakySensor {
            inner: SyntheticSensor::new(SensorConfig {
                width: 32,
                height: 24,
                ..SensorConfig::default()
            }),
            fail_first,
            calls: calls.clone(),
        };
        (Box::new(sensor), calls)
    }

    fn fast_settings() -> CaptureSettings {
        CaptureSettings {
            yield_delay: Duration::from_millis(2),
            retry_delay: Duration::from_millis(5),
            join_timeout: Duration::from_secs(1),
            warmup: Duration::ZERO,
        }
    }

    #[test]
    fn single_shot_capture_surfaces_errors() {
        let (sensor, _) = flaky(1);
        let source = FrameSource::open(sensor, fast_settings()).unwrap();
        assert!(matches!(source.capture_frame(), Err(CaptureError::Device(_))));
        assert!(source.capture_frame().is_ok());
        let stats = source.stats();
        assert_eq!(stats.frames_captured, 1);
        assert_eq!(stats.capture_failures, 1);
    }

    #[test]
    fn continuous_loop_survives_failures_and_serves_buffer() {
        let (sensor, calls) = flaky(3);
        let source = FrameSource::open(sensor, fast_settings()).unwrap();
        source.start_continuous_capture().unwrap();
        // Second start is a warning, not an error.
        source.start_continuous_capture().unwrap();

        let deadline = std::time::Instant::now() + Duration::from_secs(2);
        while source.stats().frames_captured == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(source.stats().frames_captured > 0);
        assert!(calls.load(Ordering::SeqCst) > 3);

        let scene = source.capture_with_cloud().unwrap();
        assert_eq!(scene.frame.depth().dimensions(), (32, 24));
        assert!(!scene.cloud.is_empty());

        source.stop_continuous_capture().unwrap();
        assert!(!source.is_continuous());
        // Stopping again only warns.
        source.stop_continuous_capture().unwrap();
    }

    #[test]
    fn closed_source_refuses_capture() {
        let (sensor, _) = flaky(0);
        let source = FrameSource::open(sensor, fast_settings()).unwrap();
        source.close().unwrap();
        assert!(matches!(source.capture_frame(), Err(CaptureError::NotOpen)));
        assert!(matches!(
            source.start_continuous_capture(),
            Err(CaptureError::NotOpen)
        ));
        source.reopen().unwrap();
        assert!(source.capture_frame().is_ok());
    }
}
