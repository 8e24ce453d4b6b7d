//! `ScanOrchestrator`: one shelf's scan pipeline and its continuous loop.
//!
//! Lifecycle is `Stopped -> Running -> Stopping -> Stopped`. Starting brings
//! up continuous capture, the overlay render loop and the scan loop; stopping
//! tears them down in reverse and finally releases the sensor. A restart
//! reopens the sensor.

use chrono::Utc;
use serde::Serialize;
use std::fmt::Display;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use super::report::{ScanRecord, ScanReport};
use crate::detect::{AnalyzerSettings, AnalyzerStats, SceneAnalyzer, SceneModel};
use crate::error::ScanError;
use crate::frame::Latest;
use crate::ingest::{CaptureSettings, CaptureStats, DepthSensor, FrameSource};
use crate::sink::{ReportSink, ResultSinks};
use crate::viz::{OverlayDisplay, ShelfSummary, VisualUpdate, Visualizer, VizSettings};
use crate::worker::{StopToken, Worker};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessorState {
    Stopped,
    Running,
    Stopping,
}

#[derive(Clone, Copy, Debug)]
pub struct ScanSettings {
    /// Target time from one scan start to the next.
    pub interval: Duration,
    /// Pause after a failed scan cycle.
    pub error_backoff: Duration,
    /// Bounded wait for the scan loop on stop.
    pub join_timeout: Duration,
    pub capture: CaptureSettings,
    pub analyzer: AnalyzerSettings,
    pub visualization: VizSettings,
}

impl Default for ScanSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            error_backoff: Duration::from_secs(1),
            join_timeout: Duration::from_secs(10),
            capture: CaptureSettings::default(),
            analyzer: AnalyzerSettings::default(),
            visualization: VizSettings::default(),
        }
    }
}

/// External collaborators handed to a processor.
pub struct ProcessorParts {
    pub sensor: Box<dyn DepthSensor>,
    pub model: Box<dyn SceneModel>,
    pub sinks: Vec<Box<dyn ReportSink>>,
    /// `None` disables visualization.
    pub display: Option<Box<dyn OverlayDisplay>>,
}

impl ProcessorParts {
    pub fn new(sensor: Box<dyn DepthSensor>, model: Box<dyn SceneModel>) -> Self {
        Self {
            sensor,
            model,
            sinks: Vec::new(),
            display: None,
        }
    }

    pub fn with_sink(mut self, sink: Box<dyn ReportSink>) -> Self {
        self.sinks.push(sink);
        self
    }

    pub fn with_display(mut self, display: Box<dyn OverlayDisplay>) -> Self {
        self.display = Some(display);
        self
    }
}

#[derive(Clone, Debug, Serialize)]
pub struct ProcessorStatus {
    pub shelf_id: String,
    pub state: ProcessorState,
    pub interval_secs: f64,
    pub scans_completed: u64,
    pub scan_failures: u64,
    pub sinks: Vec<String>,
    pub visualization: bool,
    pub capture: CaptureStats,
    pub analyzer: AnalyzerStats,
    pub last_scan: Option<ScanRecord>,
}

/// State shared with the scan loop thread.
struct Pipeline {
    shelf_id: String,
    source: FrameSource,
    analyzer: SceneAnalyzer,
    visualizer: Option<Visualizer>,
    sinks: ResultSinks,
    last_report: Latest<ScanReport>,
    scans_completed: AtomicU64,
    scan_failures: AtomicU64,
}

impl Pipeline {
    fn perform_scan(&self, shelf_id: &str) -> Result<ScanReport, ScanError> {
        let scene = self.source.capture_with_cloud()?;
        let dims = self.source.estimate_shelf_dimensions(scene.frame.depth());
        let objects = self.analyzer.analyze(&scene.cloud, scene.frame.color())?;
        let report = ScanReport::build(shelf_id, Utc::now(), dims.volume(), objects);

        if let Some(visualizer) = &self.visualizer {
            visualizer.update(VisualUpdate {
                color: Some(scene.frame.color_arc()),
                depth: Some(scene.frame.depth_arc()),
                objects: Some(report.objects.clone()),
                summary: Some(ShelfSummary::from(&report)),
            });
        }

        self.last_report.set(report.clone());
        Ok(report)
    }

    /// One loop iteration: scan, deliver, return the pacing delay.
    fn cycle(&self, interval: Duration) -> Result<Duration, ScanError> {
        let started = Instant::now();
        let report = match self.perform_scan(&self.shelf_id) {
            Ok(report) => report,
            Err(e) => {
                self.scan_failures.fetch_add(1, Ordering::Relaxed);
                return Err(e);
            }
        };
        self.scans_completed.fetch_add(1, Ordering::Relaxed);
        if !self.sinks.is_empty() {
            self.sinks.deliver(&report);
        }
        let elapsed = started.elapsed();
        log::info!(
            "{}: scan done in {:.2}s, usage {:.2}% ({} objects)",
            self.shelf_id,
            elapsed.as_secs_f64(),
            report.usage_percentage(),
            report.objects.len()
        );
        Ok(pacing_delay(interval, elapsed))
    }
}

/// Longest accepted scan interval.
pub const MAX_SCAN_INTERVAL: Duration = Duration::from_secs(86_400);

/// Interval from caller-supplied seconds. `None` unless finite, positive and
/// at most `MAX_SCAN_INTERVAL`.
pub fn scan_interval(secs: f64) -> Option<Duration> {
    if !(secs.is_finite() && secs > 0.0) {
        return None;
    }
    Duration::try_from_secs_f64(secs)
        .ok()
        .filter(|interval| !interval.is_zero() && *interval <= MAX_SCAN_INTERVAL)
}

/// Sleep before the next scan: the remainder of the interval, or zero when
/// the scan overran it. Skipped ticks are not caught up.
pub fn pacing_delay(interval: Duration, elapsed: Duration) -> Duration {
    interval.saturating_sub(elapsed)
}

/// Run `cycle` until the token is cancelled. A successful cycle returns how
/// long to wait before the next one; a failed cycle is logged and followed
/// by `backoff`. There is no retry limit.
pub fn run_with_backoff<E, F>(label: &str, token: &StopToken, backoff: Duration, mut cycle: F)
where
    E: Display,
    F: FnMut() -> Result<Duration, E>,
{
    while token.is_running() {
        let pause = match cycle() {
            Ok(pause) => pause,
            Err(e) => {
                log::error!("{}: scan cycle failed: {}; retrying in {:?}", label, e, backoff);
                backoff
            }
        };
        if !pause.is_zero() {
            token.sleep(pause);
        }
    }
}

pub struct ScanOrchestrator {
    pipeline: Arc<Pipeline>,
    settings: ScanSettings,
    state: Mutex<ProcessorState>,
    scan_loop: Mutex<Option<Worker>>,
}

impl std::fmt::Debug for ScanOrchestrator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ScanOrchestrator")
            .field("shelf_id", &self.pipeline.shelf_id)
            .finish_non_exhaustive()
    }
}

impl ScanOrchestrator {
    /// Open the sensor and warm up the model. Either failure is fatal for
    /// this processor only.
    pub fn new(shelf_id: &str, parts: ProcessorParts, settings: ScanSettings) -> Result<Self, ScanError> {
        let source = FrameSource::open(parts.sensor, settings.capture)?;
        let analyzer = SceneAnalyzer::new(parts.model, settings.analyzer)?;
        analyzer.start_sweeper()?;
        let visualizer = parts
            .display
            .map(|display| Visualizer::new(display, settings.visualization));

        log::info!(
            "{}: processor ready (model {}, {} sinks, visualization {})",
            shelf_id,
            analyzer.model_name(),
            parts.sinks.len(),
            if visualizer.is_some() { "on" } else { "off" }
        );
        Ok(Self {
            pipeline: Arc::new(Pipeline {
                shelf_id: shelf_id.to_string(),
                source,
                analyzer,
                visualizer,
                sinks: ResultSinks::new(parts.sinks),
                last_report: Latest::new(),
                scans_completed: AtomicU64::new(0),
                scan_failures: AtomicU64::new(0),
            }),
            settings,
            state: Mutex::new(ProcessorState::Stopped),
            scan_loop: Mutex::new(None),
        })
    }

    pub fn shelf_id(&self) -> &str {
        &self.pipeline.shelf_id
    }

    pub fn settings(&self) -> &ScanSettings {
        &self.settings
    }

    pub fn state(&self) -> ProcessorState {
        *self.state_guard()
    }

    pub fn is_running(&self) -> bool {
        self.state() == ProcessorState::Running
    }

    /// One scan, outside the loop. Does not deliver to sinks.
    pub fn perform_scan(&self, shelf_id: &str) -> Result<ScanReport, ScanError> {
        self.pipeline.perform_scan(shelf_id)
    }

    /// Deliver a report to this processor's sinks. Returns the failure count.
    pub fn deliver(&self, report: &ScanReport) -> usize {
        self.pipeline.sinks.deliver(report)
    }

    pub fn last_report(&self) -> Option<ScanReport> {
        self.pipeline.last_report.snapshot()
    }

    pub fn visualizer(&self) -> Option<&Visualizer> {
        self.pipeline.visualizer.as_ref()
    }

    /// Start continuous scanning. Warns and does nothing unless stopped.
    pub fn start(&self) -> Result<(), ScanError> {
        let mut state = self.state_guard();
        if *state != ProcessorState::Stopped {
            log::warn!("{}: processor already running", self.shelf_id());
            return Ok(());
        }

        let pipeline = &self.pipeline;
        pipeline.source.reopen()?;
        pipeline.source.start_continuous_capture()?;
        if let Some(visualizer) = &pipeline.visualizer {
            if let Err(e) = visualizer.start() {
                log::error!("{}: visualizer failed to start: {}", self.shelf_id(), e);
            }
        }

        let loop_pipeline = pipeline.clone();
        let interval = self.settings.interval;
        let backoff = self.settings.error_backoff;
        let spawned = Worker::spawn("scan-loop", move |token| {
            let label = loop_pipeline.shelf_id.clone();
            run_with_backoff(&label, &token, backoff, || loop_pipeline.cycle(interval));
        });
        let worker = match spawned {
            Ok(worker) => worker,
            Err(e) => {
                self.teardown();
                return Err(e.into());
            }
        };

        *self.loop_guard() = Some(worker);
        *state = ProcessorState::Running;
        log::info!(
            "{}: continuous scanning every {:.1}s",
            self.shelf_id(),
            interval.as_secs_f64()
        );
        Ok(())
    }

    /// Stop continuous scanning and release the sensor. Warns and does
    /// nothing unless running. Every shutdown step runs even if an earlier
    /// one fails.
    pub fn stop(&self) {
        {
            let mut state = self.state_guard();
            if *state != ProcessorState::Running {
                log::warn!("{}: processor not running", self.shelf_id());
                return;
            }
            *state = ProcessorState::Stopping;
        }

        let worker = self.loop_guard().take();
        if let Some(worker) = worker {
            if !worker.stop(self.settings.join_timeout) {
                log::warn!(
                    "{}: scan loop did not finish within {:?}",
                    self.shelf_id(),
                    self.settings.join_timeout
                );
            }
        }
        self.teardown();

        *self.state_guard() = ProcessorState::Stopped;
        log::info!("{}: processor stopped", self.shelf_id());
    }

    fn teardown(&self) {
        let pipeline = &self.pipeline;
        if let Err(e) = pipeline.source.stop_continuous_capture() {
            log::error!("{}: stopping capture failed: {}", self.shelf_id(), e);
        }
        if let Some(visualizer) = &pipeline.visualizer {
            visualizer.stop();
        }
        if let Err(e) = pipeline.source.close() {
            log::error!("{}: closing sensor failed: {}", self.shelf_id(), e);
        }
    }

    pub fn status(&self) -> ProcessorStatus {
        let pipeline = &self.pipeline;
        ProcessorStatus {
            shelf_id: pipeline.shelf_id.clone(),
            state: self.state(),
            interval_secs: self.settings.interval.as_secs_f64(),
            scans_completed: pipeline.scans_completed.load(Ordering::Relaxed),
            scan_failures: pipeline.scan_failures.load(Ordering::Relaxed),
            sinks: pipeline.sinks.names(),
            visualization: pipeline.visualizer.is_some(),
            capture: pipeline.source.stats(),
            analyzer: pipeline.analyzer.stats(),
            last_scan: self.last_report().map(|r| r.to_record()),
        }
    }

    /// Release the sensor of a processor that is not running.
    pub fn close(&self) {
        if self.is_running() {
            self.stop();
            return;
        }
        if let Err(e) = self.pipeline.source.close() {
            log::error!("{}: closing sensor failed: {}", self.shelf_id(), e);
        }
    }

    fn state_guard(&self) -> MutexGuard<'_, ProcessorState> {
        match self.state.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }

    fn loop_guard(&self) -> MutexGuard<'_, Option<Worker>> {
        match self.scan_loop.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

impl Drop for ScanOrchestrator {
    fn drop(&mut self) {
        if self.is_running() {
            self.stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubSceneModel;
    use crate::ingest::{SensorConfig, SyntheticSensor};
    use std::sync::atomic::AtomicUsize;

    fn parts() -> ProcessorParts {
        parts_sized(64, 48)
    }

    fn parts_sized(width: u32, height: u32) -> ProcessorParts {
        ProcessorParts::new(
            Box::new(SyntheticSensor::new(SensorConfig {
                width,
                height,
                ..SensorConfig::default()
            })),
            Box::new(StubSceneModel::new()),
        )
    }

    fn fast_settings() -> ScanSettings {
        ScanSettings {
            interval: Duration::from_millis(20),
            error_backoff: Duration::from_millis(10),
            join_timeout: Duration::from_secs(2),
            capture: CaptureSettings {
                yield_delay: Duration::from_millis(2),
                retry_delay: Duration::from_millis(5),
                ..CaptureSettings::default()
            },
            ..ScanSettings::default()
        }
    }

    #[test]
    fn overrun_scan_gets_no_sleep() {
        assert_eq!(
            pacing_delay(Duration::from_secs(5), Duration::from_secs(7)),
            Duration::ZERO
        );
        assert_eq!(
            pacing_delay(Duration::from_secs(5), Duration::from_secs(2)),
            Duration::from_secs(3)
        );
    }

    #[test]
    fn interval_bounds() {
        assert_eq!(scan_interval(0.5), Some(Duration::from_millis(500)));
        assert_eq!(scan_interval(86_400.0), Some(MAX_SCAN_INTERVAL));
        for bad in [0.0, -1.0, 1e-12, 86_400.5, 1e20, f64::NAN, f64::INFINITY] {
            assert_eq!(scan_interval(bad), None, "{}", bad);
        }
    }

    #[test]
    fn backoff_wrapper_retries_until_cancelled() {
        let attempts = Arc::new(AtomicUsize::new(0));
        let counter = attempts.clone();
        let worker = Worker::spawn("test-backoff", move |token| {
            let inner = token.clone();
            run_with_backoff("test", &token, Duration::from_millis(1), || {
                let n = counter.fetch_add(1, Ordering::SeqCst);
                if n >= 5 {
                    inner.cancel();
                }
                if n % 2 == 0 {
                    Err("boom")
                } else {
                    Ok(Duration::ZERO)
                }
            });
        })
        .unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while worker.is_running() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(5));
        }
        assert!(worker.stop(Duration::from_secs(1)));
        assert_eq!(attempts.load(Ordering::SeqCst), 6);
    }

    #[test]
    fn single_scan_builds_report() {
        let orchestrator =
            ScanOrchestrator::new("shelf_T1", parts_sized(320, 240), fast_settings()).unwrap();
        let report = orchestrator.perform_scan("shelf_T1").unwrap();
        assert_eq!(report.shelf_id, "shelf_T1");
        assert_eq!(report.objects.len(), 3);
        assert!(report.total_volume > 0.0);
        assert_eq!(orchestrator.last_report(), Some(report));
        assert_eq!(orchestrator.state(), ProcessorState::Stopped);
    }

    #[test]
    fn start_stop_lifecycle() {
        let orchestrator = ScanOrchestrator::new("shelf_T2", parts(), fast_settings()).unwrap();
        orchestrator.start().unwrap();
        orchestrator.start().unwrap();
        assert!(orchestrator.is_running());

        let deadline = Instant::now() + Duration::from_secs(3);
        while orchestrator.status().scans_completed < 2 && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(orchestrator.status().scans_completed >= 2);

        orchestrator.stop();
        assert_eq!(orchestrator.state(), ProcessorState::Stopped);
        orchestrator.stop();

        // Restart reopens the sensor.
        orchestrator.start().unwrap();
        assert!(orchestrator.is_running());
        orchestrator.stop();
    }
}
