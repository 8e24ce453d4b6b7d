//! Occupancy reports and the per-shelf scan processor.

mod orchestrator;
mod report;

pub use orchestrator::{
    pacing_delay, run_with_backoff, scan_interval, ProcessorParts, ProcessorState,
    ProcessorStatus, ScanOrchestrator, ScanSettings, MAX_SCAN_INTERVAL,
};
pub use report::{round2, simulate_scan, ScanRecord, ScanReport, SIMULATED_SHELF};
