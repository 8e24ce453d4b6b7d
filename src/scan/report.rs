use chrono::{DateTime, Utc};
use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::detect::{occupied_volume, DetectedObject, DEFAULT_OBJECT_TYPE};
use crate::ingest::ShelfDimensions;

/// Occupancy report for one scan.
///
/// `usage_percentage` is derived from the two volume fields on demand and is
/// never stored on its own. `free_volume` may be negative when detections
/// overlap or are over-estimated.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(into = "ScanRecord")]
pub struct ScanReport {
    pub shelf_id: String,
    pub timestamp: DateTime<Utc>,
    pub total_volume: f64,
    pub occupied_volume: f64,
    pub free_volume: f64,
    pub objects: Vec<DetectedObject>,
}

impl ScanReport {
    /// Aggregate detections against the shelf volume. Volumes are rounded to
    /// two decimals; free volume is rounded from the unrounded difference.
    pub fn build(
        shelf_id: &str,
        timestamp: DateTime<Utc>,
        total_volume: f64,
        objects: Vec<DetectedObject>,
    ) -> Self {
        let occupied = occupied_volume(&objects);
        Self {
            shelf_id: shelf_id.to_string(),
            timestamp,
            total_volume: round2(total_volume),
            occupied_volume: round2(occupied),
            free_volume: round2(total_volume - occupied),
            objects,
        }
    }

    /// `occupied / total * 100` rounded to two decimals; 0 when the total is
    /// not positive.
    pub fn usage_percentage(&self) -> f64 {
        if self.total_volume > 0.0 {
            round2(self.occupied_volume / self.total_volume * 100.0)
        } else {
            0.0
        }
    }

    pub fn to_record(&self) -> ScanRecord {
        ScanRecord::from(self.clone())
    }
}

/// Flat form handed to sinks and returned by the request surface.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ScanRecord {
    pub shelf_id: String,
    /// RFC 3339 / ISO-8601.
    pub timestamp: String,
    pub total_volume: f64,
    pub occupied_volume: f64,
    pub free_volume: f64,
    pub usage_percentage: f64,
    pub objects: Vec<DetectedObject>,
}

impl From<ScanReport> for ScanRecord {
    fn from(report: ScanReport) -> Self {
        let usage_percentage = report.usage_percentage();
        Self {
            shelf_id: report.shelf_id,
            timestamp: report.timestamp.to_rfc3339(),
            total_volume: report.total_volume,
            occupied_volume: report.occupied_volume,
            free_volume: report.free_volume,
            usage_percentage,
            objects: report.objects,
        }
    }
}

pub fn round2(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

/// Shelf used by simulated scans.
pub const SIMULATED_SHELF: ShelfDimensions = ShelfDimensions {
    width: 1.0,
    height: 2.0,
    depth: 0.5,
};

/// Hardware-free scan: three random boxes on a 1.0 x 2.0 x 0.5 m shelf.
pub fn simulate_scan<R: Rng + ?Sized>(shelf_id: &str, rng: &mut R) -> ScanReport {
    let objects = (1..=3)
        .map(|i| DetectedObject {
            id: format!("box_{}", i),
            x: round2(rng.gen_range(0.0..=SIMULATED_SHELF.width)),
            y: round2(rng.gen_range(0.0..=SIMULATED_SHELF.height)),
            z: round2(rng.gen_range(0.0..=SIMULATED_SHELF.depth)),
            width: round2(rng.gen_range(0.3..=0.5)),
            height: round2(rng.gen_range(0.3..=0.5)),
            depth: round2(rng.gen_range(0.2..=0.4)),
            confidence: round2(rng.gen_range(0.85..=0.99)),
            object_type: DEFAULT_OBJECT_TYPE.to_string(),
        })
        .collect();
    ScanReport::build(shelf_id, Utc::now(), SIMULATED_SHELF.volume(), objects)
}
