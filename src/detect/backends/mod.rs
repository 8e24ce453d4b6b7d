pub mod stub;

#[cfg(feature = "model-http")]
pub mod http;

pub use stub::StubSceneModel;

#[cfg(feature = "model-http")]
pub use http::HttpSceneModel;
