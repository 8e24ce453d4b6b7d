use image::RgbImage;

use crate::detect::backend::SceneModel;
use crate::error::AnalysisError;
use crate::frame::PointCloud;

const CANNED_RESPONSE: &str = r#"Objects on the shelf:
[{"id": "box_1", "x": 0.12, "y": 0.35, "z": 0.08, "width": 0.30, "height": 0.25, "depth": 0.20, "confidence": 0.91, "object_type": "box"},
 {"id": "box_2", "x": 0.55, "y": 0.30, "z": 0.10, "width": 0.25, "height": 0.20, "depth": 0.22, "confidence": 0.87, "object_type": "box"},
 {"id": "bin_1", "x": 0.80, "y": 0.70, "z": 0.05, "width": 0.20, "height": 0.15, "depth": 0.30, "confidence": 0.78, "object_type": "bin"}]"#;

/// Model stand-in for hardware-free runs. Returns a fixed response.
pub struct StubSceneModel {
    response: String,
}

impl StubSceneModel {
    pub fn new() -> Self {
        Self {
            response: CANNED_RESPONSE.to_string(),
        }
    }

    /// Stub that always answers with `response`.
    pub fn with_response(response: impl Into<String>) -> Self {
        Self {
            response: response.into(),
        }
    }
}

impl Default for StubSceneModel {
    fn default() -> Self {
        Self::new()
    }
}

impl SceneModel for StubSceneModel {
    fn name(&self) -> &str {
        "stub"
    }

    fn describe(
        &mut self,
        cloud: &PointCloud,
        color: &RgbImage,
        _prompt: &str,
    ) -> Result<String, AnalysisError> {
        log::debug!(
            "stub model: {} points, {}x{} image",
            cloud.len(),
            color.width(),
            color.height()
        );
        Ok(self.response.clone())
    }
}
