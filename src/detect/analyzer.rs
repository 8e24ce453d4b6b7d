//! `SceneAnalyzer`: cached scene understanding.

use image::RgbImage;
use rand::Rng;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use super::backend::SceneModel;
use super::cache::{DetectionCache, Signature};
use super::parse::parse_model_response;
use super::result::DetectedObject;
use crate::error::AnalysisError;
use crate::frame::{Point3, PointCloud};
use crate::worker::Worker;

/// Prompt sent with every scene.
pub const SCENE_PROMPT: &str = "Describe the objects on this 3D shelf scene. \
For each object give its type, its dimensions (width, height, depth in meters), \
its position (x, y, z in meters) and a detection confidence. \
Answer as a JSON array: [{\"id\": \"obj_1\", \"width\": 0.4, \"height\": 0.3, \
\"depth\": 0.25, \"x\": 0.1, \"y\": 0.2, \"z\": 0.05, \"confidence\": 0.95, \
\"object_type\": \"box\"}]";

#[derive(Clone, Copy, Debug)]
pub struct AnalyzerSettings {
    /// Maximum age of a cache entry.
    pub ttl: Duration,
    /// Period of the eviction sweep.
    pub sweep_interval: Duration,
    /// Point cap applied before the model call.
    pub max_points: usize,
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self {
            ttl: Duration::from_secs(60),
            sweep_interval: Duration::from_secs(30),
            max_points: 10_000,
        }
    }
}

#[derive(Clone, Copy, Debug, Default, Serialize)]
pub struct AnalyzerStats {
    pub cache_hits: u64,
    pub model_calls: u64,
    pub cached_entries: usize,
}

/// Scene model behind a signature-keyed cache.
///
/// Neither the cache lock nor any other analyzer lock is held while the
/// model runs, except the model's own lock, which serializes inference.
pub struct SceneAnalyzer {
    model: Mutex<Box<dyn SceneModel>>,
    model_name: String,
    cache: Arc<DetectionCache>,
    settings: AnalyzerSettings,
    sweeper: Mutex<Option<Worker>>,
    cache_hits: AtomicU64,
    model_calls: AtomicU64,
}

impl SceneAnalyzer {
    /// Warm up the model. A model that cannot warm up is fatal for the owner.
    pub fn new(mut model: Box<dyn SceneModel>, settings: AnalyzerSettings) -> Result<Self, AnalysisError> {
        model.warm_up()?;
        let model_name = model.name().to_string();
        log::info!("SceneAnalyzer: model {} ready", model_name);
        Ok(Self {
            model: Mutex::new(model),
            model_name,
            cache: Arc::new(DetectionCache::new(settings.ttl)),
            settings,
            sweeper: Mutex::new(None),
            cache_hits: AtomicU64::new(0),
            model_calls: AtomicU64::new(0),
        })
    }

    pub fn model_name(&self) -> &str {
        &self.model_name
    }

    pub fn cache(&self) -> &DetectionCache {
        &self.cache
    }

    /// Detected objects for a scene, from cache when a fresh entry exists.
    pub fn analyze(
        &self,
        cloud: &PointCloud,
        color: &RgbImage,
    ) -> Result<Vec<DetectedObject>, AnalysisError> {
        let signature = Signature::compute(cloud, color);
        if let Some(objects) = self.cache.lookup(&signature) {
            self.cache_hits.fetch_add(1, Ordering::Relaxed);
            log::debug!("SceneAnalyzer: cache hit {}", signature);
            return Ok(objects);
        }

        let started = Instant::now();
        let processed = preprocess(cloud, self.settings.max_points, &mut rand::thread_rng());
        let response = {
            let mut model = self.model.lock().map_err(|_| AnalysisError::Poisoned)?;
            self.model_calls.fetch_add(1, Ordering::Relaxed);
            model.describe(&processed, color, SCENE_PROMPT)?
        };
        let objects = parse_model_response(&response);
        log::info!(
            "SceneAnalyzer: {} objects in {:.2}s ({} points sent)",
            objects.len(),
            started.elapsed().as_secs_f64(),
            processed.len()
        );

        self.cache.insert(signature, objects.clone());
        Ok(objects)
    }

    /// Start the periodic eviction sweep. Warns when already running.
    pub fn start_sweeper(&self) -> Result<(), AnalysisError> {
        let mut slot = self.sweeper.lock().map_err(|_| AnalysisError::Poisoned)?;
        if slot.as_ref().is_some_and(Worker::is_running) {
            log::warn!("SceneAnalyzer: cache sweep already running");
            return Ok(());
        }
        let cache = self.cache.clone();
        let interval = self.settings.sweep_interval;
        let worker = Worker::spawn("cache-sweep", move |token| {
            while token.sleep(interval) {
                let removed = cache.sweep();
                if removed > 0 {
                    log::debug!("SceneAnalyzer: swept {} expired cache entries", removed);
                }
            }
        })
        .map_err(|e| AnalysisError::Unavailable(format!("spawn cache sweep: {}", e)))?;
        *slot = Some(worker);
        Ok(())
    }

    pub fn stop_sweeper(&self) {
        let worker = match self.sweeper.lock() {
            Ok(mut slot) => slot.take(),
            Err(poisoned) => poisoned.into_inner().take(),
        };
        if let Some(worker) = worker {
            worker.stop(Duration::from_secs(1));
        }
    }

    pub fn stats(&self) -> AnalyzerStats {
        AnalyzerStats {
            cache_hits: self.cache_hits.load(Ordering::Relaxed),
            model_calls: self.model_calls.load(Ordering::Relaxed),
            cached_entries: self.cache.len(),
        }
    }
}

impl Drop for SceneAnalyzer {
    fn drop(&mut self) {
        self.stop_sweeper();
    }
}

/// Uniform sample without replacement down to `max_points`, then subtract
/// the centroid.
pub fn preprocess<R: Rng + ?Sized>(cloud: &PointCloud, max_points: usize, rng: &mut R) -> PointCloud {
    let sampled: Vec<Point3> = if cloud.len() > max_points {
        rand::seq::index::sample(rng, cloud.len(), max_points)
            .into_iter()
            .map(|i| cloud.points()[i])
            .collect()
    } else {
        cloud.points().to_vec()
    };

    let centroid = PointCloud::new(sampled.clone()).centroid();
    PointCloud::new(
        sampled
            .into_iter()
            .map(|p| Point3::new(p.x - centroid.x, p.y - centroid.y, p.z - centroid.z))
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::backends::StubSceneModel;
    use crate::detect::parse::fallback_objects;
    use rand::SeedableRng;
    use std::sync::atomic::AtomicUsize;

    struct CountingModel {
        calls: Arc<AtomicUsize>,
        response: String,
    }

    impl SceneModel for CountingModel {
        fn name(&self) -> &str {
            "counting"
        }

        fn describe(
            &mut self,
            _cloud: &PointCloud,
            _color: &RgbImage,
            _prompt: &str,
        ) -> Result<String, AnalysisError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(self.response.clone())
        }
    }

    fn scene(points: usize) -> (PointCloud, RgbImage) {
        let cloud = PointCloud::new(
            (0..points)
                .map(|i| Point3::new(i as f32 * 0.01, 0.5, 1.0))
                .collect(),
        );
        (cloud, RgbImage::from_pixel(8, 8, image::Rgb([90, 90, 90])))
    }

    #[test]
    fn repeated_scene_within_ttl_skips_model() {
        let calls = Arc::new(AtomicUsize::new(0));
        let analyzer = SceneAnalyzer::new(
            Box::new(CountingModel {
                calls: calls.clone(),
                response: "garbage".to_string(),
            }),
            AnalyzerSettings::default(),
        )
        .unwrap();

        let (cloud, color) = scene(50);
        let first = analyzer.analyze(&cloud, &color).unwrap();
        let second = analyzer.analyze(&cloud, &color).unwrap();
        assert_eq!(first, fallback_objects());
        assert_eq!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(analyzer.stats().cache_hits, 1);
    }

    #[test]
    fn expired_entry_triggers_new_model_call() {
        let calls = Arc::new(AtomicUsize::new(0));
        let analyzer = SceneAnalyzer::new(
            Box::new(CountingModel {
                calls: calls.clone(),
                response: "[]".to_string(),
            }),
            AnalyzerSettings {
                ttl: Duration::from_millis(20),
                ..AnalyzerSettings::default()
            },
        )
        .unwrap();

        let (cloud, color) = scene(10);
        analyzer.analyze(&cloud, &color).unwrap();
        std::thread::sleep(Duration::from_millis(40));
        analyzer.analyze(&cloud, &color).unwrap();
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn sweeper_evicts_expired_entries() {
        let analyzer = SceneAnalyzer::new(
            Box::new(StubSceneModel::new()),
            AnalyzerSettings {
                ttl: Duration::from_millis(10),
                sweep_interval: Duration::from_millis(20),
                max_points: 100,
            },
        )
        .unwrap();
        let (cloud, color) = scene(10);
        analyzer.analyze(&cloud, &color).unwrap();
        assert_eq!(analyzer.cache().len(), 1);

        analyzer.start_sweeper().unwrap();
        let deadline = Instant::now() + Duration::from_secs(2);
        while !analyzer.cache().is_empty() && Instant::now() < deadline {
            std::thread::sleep(Duration::from_millis(10));
        }
        assert!(analyzer.cache().is_empty());
        analyzer.stop_sweeper();
    }

    #[test]
    fn preprocess_caps_and_centers() {
        let (cloud, _) = scene(500);
        let mut rng = rand::rngs::StdRng::seed_from_u64(7);
        let processed = preprocess(&cloud, 100, &mut rng);
        assert_eq!(processed.len(), 100);
        let c = processed.centroid();
        assert!(c.x.abs() < 1e-4 && c.y.abs() < 1e-4 && c.z.abs() < 1e-4);

        let small = preprocess(&scene(20).0, 100, &mut rng);
        assert_eq!(small.len(), 20);
    }

    #[test]
    fn failed_warm_up_is_fatal() {
        struct Broken;
        impl SceneModel for Broken {
            fn name(&self) -> &str {
                "broken"
            }
            fn describe(
                &mut self,
                _: &PointCloud,
                _: &RgbImage,
                _: &str,
            ) -> Result<String, AnalysisError> {
                unreachable!()
            }
            fn warm_up(&mut self) -> Result<(), AnalysisError> {
                Err(AnalysisError::Unavailable("no weights".to_string()))
            }
        }
        assert!(SceneAnalyzer::new(Box::new(Broken), AnalyzerSettings::default()).is_err());
    }
}
