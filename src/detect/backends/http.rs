//! Scene model served by an HTTP inference sidecar.
//!
//! Request: `POST <endpoint>` with a JSON body holding the prompt, the
//! processed points as `[x, y, z]` triples and the color image as hex-encoded
//! JPEG. Response: either `{"text": "..."}` or the raw model text.

use image::{ImageFormat, RgbImage};
use serde::Serialize;
use std::io::Cursor;
use std::time::Duration;

use crate::detect::backend::SceneModel;
use crate::error::AnalysisError;
use crate::frame::PointCloud;

#[derive(Serialize)]
struct DescribeRequest<'a> {
    prompt: &'a str,
    points: Vec<[f32; 3]>,
    image: ImagePayload,
}

#[derive(Serialize)]
struct ImagePayload {
    width: u32,
    height: u32,
    jpeg_hex: String,
}

pub struct HttpSceneModel {
    endpoint: String,
    agent: ureq::Agent,
}

impl HttpSceneModel {
    pub fn new(endpoint: &str, timeout: Duration) -> Self {
        Self {
            endpoint: endpoint.to_string(),
            agent: ureq::AgentBuilder::new().timeout(timeout).build(),
        }
    }

    fn encode_jpeg(color: &RgbImage) -> Result<String, AnalysisError> {
        let mut bytes = Vec::new();
        color
            .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Jpeg)
            .map_err(|e| AnalysisError::Model(format!("encode jpeg: {}", e)))?;
        Ok(hex::encode(bytes))
    }
}

impl SceneModel for HttpSceneModel {
    fn name(&self) -> &str {
        "http"
    }

    fn describe(
        &mut self,
        cloud: &PointCloud,
        color: &RgbImage,
        prompt: &str,
    ) -> Result<String, AnalysisError> {
        let request = DescribeRequest {
            prompt,
            points: cloud.points().iter().map(|p| [p.x, p.y, p.z]).collect(),
            image: ImagePayload {
                width: color.width(),
                height: color.height(),
                jpeg_hex: Self::encode_jpeg(color)?,
            },
        };
        let body = serde_json::to_string(&request)
            .map_err(|e| AnalysisError::Model(format!("serialize request: {}", e)))?;

        let response = self
            .agent
            .post(&self.endpoint)
            .set("Content-Type", "application/json")
            .send_string(&body)
            .map_err(|e| AnalysisError::Unavailable(format!("{}: {}", self.endpoint, e)))?;
        let text = response
            .into_string()
            .map_err(|e| AnalysisError::Model(format!("read response: {}", e)))?;

        match serde_json::from_str::<serde_json::Value>(&text) {
            Ok(serde_json::Value::Object(map)) => match map.get("text") {
                Some(serde_json::Value::String(inner)) => Ok(inner.clone()),
                _ => Ok(text),
            },
            _ => Ok(text),
        }
    }

    fn warm_up(&mut self) -> Result<(), AnalysisError> {
        if self.endpoint.starts_with("http://") || self.endpoint.starts_with("https://") {
            Ok(())
        } else {
            Err(AnalysisError::Unavailable(format!(
                "model endpoint must be an http(s) url, got '{}'",
                self.endpoint
            )))
        }
    }
}
