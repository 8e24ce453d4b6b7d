use serde::{Deserialize, Serialize};

/// Label used when the model gives none.
pub const DEFAULT_OBJECT_TYPE: &str = "box";

/// One object found on the shelf. Position and extents are meters.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DetectedObject {
    pub id: String,
    pub x: f64,
    pub y: f64,
    pub z: f64,
    pub width: f64,
    pub height: f64,
    pub depth: f64,
    /// Always within [0, 1] after validation.
    pub confidence: f64,
    pub object_type: String,
}

impl DetectedObject {
    pub fn volume(&self) -> f64 {
        self.width * self.height * self.depth
    }
}

/// Sum of object volumes.
pub fn occupied_volume(objects: &[DetectedObject]) -> f64 {
    objects.iter().map(DetectedObject::volume).sum()
}
