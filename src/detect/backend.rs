use crate::error::AnalysisError;
use crate::frame::PointCloud;
use image::RgbImage;

/// Scene-understanding model boundary.
///
/// The model receives a preprocessed (downsampled, mean-centered) point cloud
/// and the color image and returns free-form text. Extracting objects from
/// that text is `SceneAnalyzer`'s job, not the model's.
///
/// Calls may take seconds. `SceneAnalyzer` never holds its cache lock across
/// `describe`.
pub trait SceneModel: Send {
    /// Backend identifier.
    fn name(&self) -> &str;

    /// Ask the model to describe the objects in the scene.
    fn describe(
        &mut self,
        cloud: &PointCloud,
        color: &RgbImage,
        prompt: &str,
    ) -> Result<String, AnalysisError>;

    /// Optional warm-up hook, run once when a processor is constructed.
    fn warm_up(&mut self) -> Result<(), AnalysisError> {
        Ok(())
    }
}
