//! Scene understanding: model boundary, response parsing, cached analysis.

mod analyzer;
mod backend;
pub mod backends;
mod cache;
pub mod parse;
mod result;

pub use analyzer::{preprocess, AnalyzerSettings, AnalyzerStats, SceneAnalyzer, SCENE_PROMPT};
pub use backend::SceneModel;
pub use backends::StubSceneModel;
#[cfg(feature = "model-http")]
pub use backends::HttpSceneModel;
pub use cache::{DetectionCache, Signature};
pub use parse::{fallback_objects, parse_model_response};
pub use result::{occupied_volume, DetectedObject, DEFAULT_OBJECT_TYPE};
