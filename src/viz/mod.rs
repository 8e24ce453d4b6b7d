//! Live overlay rendering.
//!
//! The scan loop pushes updates with `Visualizer::update`; a separate render
//! loop redraws the latest snapshot at its own cadence. There is no queue
//! between them: a slow scan loop means the same snapshot is drawn again, a
//! fast one means intermediate snapshots are never drawn.

pub mod display;
pub mod draw;
pub mod render;

use image::RgbImage;
use serde::Serialize;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use crate::detect::DetectedObject;
use crate::frame::DepthImage;
use crate::scan::ScanReport;
use crate::worker::{StopToken, Worker};

pub use display::{FileDisplay, OverlayDisplay, QUIT_KEY};

/// Shelf-level figures shown in the banner.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct ShelfSummary {
    pub shelf_id: String,
    pub total_volume: f64,
    pub occupied_volume: f64,
    pub free_volume: f64,
    pub usage_percentage: f64,
    pub object_count: usize,
}

impl From<&ScanReport> for ShelfSummary {
    fn from(report: &ScanReport) -> Self {
        Self {
            shelf_id: report.shelf_id.clone(),
            total_volume: report.total_volume,
            occupied_volume: report.occupied_volume,
            free_volume: report.free_volume,
            usage_percentage: report.usage_percentage(),
            object_count: report.objects.len(),
        }
    }
}

/// What the render loop draws. `depth` is already pseudo-colored.
#[derive(Clone, Debug, Default)]
pub struct VisualSnapshot {
    pub color: Option<Arc<RgbImage>>,
    pub depth: Option<Arc<RgbImage>>,
    pub objects: Vec<DetectedObject>,
    pub summary: Option<ShelfSummary>,
}

/// Partial update; `None` fields keep their current value.
#[derive(Clone, Debug, Default)]
pub struct VisualUpdate {
    pub color: Option<Arc<RgbImage>>,
    pub depth: Option<Arc<DepthImage>>,
    pub objects: Option<Vec<DetectedObject>>,
    pub summary: Option<ShelfSummary>,
}

#[derive(Clone, Copy, Debug)]
pub struct VizSettings {
    /// Images wider than this are scaled down on update.
    pub max_width: u32,
    /// Sleep between rendered frames (about 30 fps).
    pub frame_period: Duration,
    /// Pause after a display error.
    pub error_delay: Duration,
    pub join_timeout: Duration,
}

impl Default for VizSettings {
    fn default() -> Self {
        Self {
            max_width: 1280,
            frame_period: Duration::from_millis(30),
            error_delay: Duration::from_millis(100),
            join_timeout: Duration::from_secs(5),
        }
    }
}

pub struct Visualizer {
    snapshot: Arc<Mutex<VisualSnapshot>>,
    display: Arc<Mutex<Box<dyn OverlayDisplay>>>,
    settings: VizSettings,
    worker: Mutex<Option<Worker>>,
}

impl Visualizer {
    pub fn new(display: Box<dyn OverlayDisplay>, settings: VizSettings) -> Self {
        Self {
            snapshot: Arc::new(Mutex::new(VisualSnapshot::default())),
            display: Arc::new(Mutex::new(display)),
            settings,
            worker: Mutex::new(None),
        }
    }

    /// Start the render loop. Warns and does nothing when already running.
    pub fn start(&self) -> std::io::Result<()> {
        let mut slot = lock(&self.worker);
        if slot.as_ref().is_some_and(Worker::is_running) {
            log::warn!("Visualizer: already running");
            return Ok(());
        }
        let snapshot = self.snapshot.clone();
        let display = self.display.clone();
        let settings = self.settings;
        let worker = Worker::spawn("overlay-render", move |token| {
            render_loop(&snapshot, &display, settings, &token)
        })?;
        *slot = Some(worker);
        log::info!("Visualizer: render loop started");
        Ok(())
    }

    /// Stop the render loop. Warns when it is not running.
    pub fn stop(&self) {
        let worker = lock(&self.worker).take();
        match worker {
            Some(worker) => {
                let was_running = worker.is_running();
                if !worker.stop(self.settings.join_timeout) {
                    log::warn!("Visualizer: render loop still finishing its frame");
                }
                if was_running {
                    log::info!("Visualizer: render loop stopped");
                } else {
                    log::warn!("Visualizer: render loop had already exited");
                }
            }
            None => log::warn!("Visualizer: not running"),
        }
    }

    pub fn is_running(&self) -> bool {
        lock(&self.worker).as_ref().is_some_and(Worker::is_running)
    }

    /// Replace the supplied fields. Scaling and depth pseudo-coloring happen
    /// before the lock is taken.
    pub fn update(&self, update: VisualUpdate) {
        let max_width = self.settings.max_width;
        let color = update
            .color
            .map(|color| match render::fit_width(&color, max_width) {
                Some(scaled) => Arc::new(scaled),
                None => color,
            });
        let depth = update.depth.map(|depth| {
            let colored = render::colorize_depth(&depth);
            Arc::new(render::fit_width(&colored, max_width).unwrap_or(colored))
        });

        let mut current = lock(&self.snapshot);
        if let Some(color) = color {
            current.color = Some(color);
        }
        if let Some(depth) = depth {
            current.depth = Some(depth);
        }
        if let Some(objects) = update.objects {
            current.objects = objects;
        }
        if let Some(summary) = update.summary {
            current.summary = Some(summary);
        }
    }

    pub fn snapshot(&self) -> VisualSnapshot {
        lock(&self.snapshot).clone()
    }

    /// Render the current snapshot without the loop.
    pub fn render_now(&self) -> RgbImage {
        render::compose(&self.snapshot())
    }
}

impl Drop for Visualizer {
    fn drop(&mut self) {
        if let Some(worker) = lock(&self.worker).take() {
            worker.stop(self.settings.join_timeout);
        }
    }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn render_loop(
    snapshot: &Mutex<VisualSnapshot>,
    display: &Mutex<Box<dyn OverlayDisplay>>,
    settings: VizSettings,
    token: &StopToken,
) {
    while token.is_running() {
        let current = lock(snapshot).clone();
        let frame = render::compose(&current);

        let (shown, key) = {
            let mut display = lock(display);
            let shown = display.show(&frame);
            (shown, display.poll_key())
        };
        if let Err(e) = shown {
            log::error!("Visualizer: display error: {:#}", e);
            token.sleep(settings.error_delay);
            continue;
        }
        if key == Some(QUIT_KEY) {
            log::info!("Visualizer: quit key pressed");
            break;
        }
        token.sleep(settings.frame_period);
    }
    lock(display).close();
}
