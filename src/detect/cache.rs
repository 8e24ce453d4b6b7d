//! Time-bounded detection cache keyed by an approximate input signature.

use image::RgbImage;
use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::{Duration, Instant};

use super::result::DetectedObject;
use crate::frame::PointCloud;

/// Approximate cache key built from cheap statistics of the analysis input.
///
/// This is lossy: two different scenes with the same point count, similar
/// coordinate statistics, the same image size and a similar mean pixel value
/// share a signature. Statistics are quantized to two decimals so that float
/// noise below that resolution maps to the same key.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Signature {
    point_count: u64,
    coord_mean: i64,
    coord_std: i64,
    image_width: u32,
    image_height: u32,
    pixel_mean: i64,
}

impl Signature {
    pub fn compute(cloud: &PointCloud, color: &RgbImage) -> Self {
        let (mean, std) = cloud.coordinate_stats();
        let raw = color.as_raw();
        let pixel_mean = if raw.is_empty() {
            0.0
        } else {
            raw.iter().map(|&v| v as f64).sum::<f64>() / raw.len() as f64
        };
        Self {
            point_count: cloud.len() as u64,
            coord_mean: quantize(mean),
            coord_std: quantize(std),
            image_width: color.width(),
            image_height: color.height(),
            pixel_mean: quantize(pixel_mean),
        }
    }
}

fn quantize(value: f64) -> i64 {
    (value * 100.0).round() as i64
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{}_{:.2}_{:.2}_{}x{}_{:.2}",
            self.point_count,
            self.coord_mean as f64 / 100.0,
            self.coord_std as f64 / 100.0,
            self.image_height,
            self.image_width,
            self.pixel_mean as f64 / 100.0
        )
    }
}

#[derive(Clone, Debug)]
struct CacheEntry {
    inserted_at: Instant,
    objects: Vec<DetectedObject>,
}

impl CacheEntry {
    fn is_fresh(&self, now: Instant, ttl: Duration) -> bool {
        now.saturating_duration_since(self.inserted_at) < ttl
    }
}

/// Signature-keyed cache. The lock covers map access only.
#[derive(Debug)]
pub struct DetectionCache {
    ttl: Duration,
    entries: Mutex<HashMap<Signature, CacheEntry>>,
}

impl DetectionCache {
    pub fn new(ttl: Duration) -> Self {
        Self {
            ttl,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn lookup(&self, signature: &Signature) -> Option<Vec<DetectedObject>> {
        self.lookup_at(signature, Instant::now())
    }

    /// Cached objects when the entry is younger than the TTL at `now`. An
    /// expired entry is a miss even before the sweep removes it.
    pub fn lookup_at(&self, signature: &Signature, now: Instant) -> Option<Vec<DetectedObject>> {
        let entries = self.lock();
        entries
            .get(signature)
            .filter(|entry| entry.is_fresh(now, self.ttl))
            .map(|entry| entry.objects.clone())
    }

    pub fn insert(&self, signature: Signature, objects: Vec<DetectedObject>) {
        self.insert_at(signature, objects, Instant::now());
    }

    /// Store `objects`, replacing any entry under the same signature.
    pub fn insert_at(&self, signature: Signature, objects: Vec<DetectedObject>, now: Instant) {
        let previous = self.lock().insert(
            signature,
            CacheEntry {
                inserted_at: now,
                objects,
            },
        );
        drop(previous);
    }

    pub fn sweep(&self) -> usize {
        self.sweep_at(Instant::now())
    }

    /// Remove entries older than the TTL at `now`. Returns how many went.
    pub fn sweep_at(&self, now: Instant) -> usize {
        let mut entries = self.lock();
        let before = entries.len();
        entries.retain(|_, entry| entry.is_fresh(now, self.ttl));
        before - entries.len()
    }

    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<Signature, CacheEntry>> {
        // Entries are replaced whole, so a poisoned map is still consistent.
        match self.entries.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}
