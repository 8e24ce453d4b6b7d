//! Shelf occupancy scanner.
//!
//! Captures color + depth frames of a storage shelf, turns the depth into a
//! point cloud, asks a scene model which objects sit on the shelf and reports
//! how much of the shelf volume they occupy.
//!
//! # Module Structure
//!
//! - `frame`: Frame, PointCloud and the latest-wins slot shared between loops
//! - `worker`: background threads with cooperative cancellation
//! - `ingest`: depth sensors, the capture loop and shelf extent estimation
//! - `detect`: scene model boundary, response parsing and the detection cache
//! - `scan`: reports and the per-shelf scan orchestrator
//! - `viz`: overlay rendering and displays
//! - `sink`, `storage`, `transport`: where finished reports go
//! - `api`: HTTP request surface and the processor registry
//! - `config`: file + environment configuration

pub mod api;
pub mod config;
pub mod detect;
pub mod error;
pub mod frame;
pub mod ingest;
pub mod scan;
pub mod sink;
pub mod storage;
pub mod transport;
pub mod viz;
pub mod worker;

pub use detect::{DetectedObject, SceneAnalyzer, SceneModel};
pub use error::{AnalysisError, CaptureError, ScanError, SinkError};
pub use frame::{Frame, Latest, Point3, PointCloud};
pub use ingest::{DepthSensor, FrameSource, ShelfDimensions};
pub use scan::{ProcessorParts, ScanOrchestrator, ScanRecord, ScanReport, ScanSettings};
pub use sink::ReportSink;
