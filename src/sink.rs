//! Result sinks: downstream consumers of finished scan reports.
//!
//! Sinks run synchronously on the scan loop with no timeout. A sink that
//! blocks stalls the next scan cycle; failures are logged and never change
//! the report or abort the cycle.

use std::sync::Mutex;

use crate::error::SinkError;
use crate::scan::ScanReport;

pub trait ReportSink: Send {
    fn name(&self) -> &str;

    /// Deliver one report. No acknowledgment is consumed beyond the result.
    fn deliver(&mut self, report: &ScanReport) -> Result<(), SinkError>;
}

/// Ordered set of sinks fed by one processor.
#[derive(Default)]
pub struct ResultSinks {
    sinks: Mutex<Vec<Box<dyn ReportSink>>>,
}

impl ResultSinks {
    pub fn new(sinks: Vec<Box<dyn ReportSink>>) -> Self {
        Self {
            sinks: Mutex::new(sinks),
        }
    }

    pub fn push(&self, sink: Box<dyn ReportSink>) {
        self.guard().push(sink);
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn names(&self) -> Vec<String> {
        self.guard().iter().map(|s| s.name().to_string()).collect()
    }

    /// Hand `report` to every sink in order. Returns the number of failures.
    pub fn deliver(&self, report: &ScanReport) -> usize {
        let mut sinks = self.guard();
        let mut failures = 0;
        for sink in sinks.iter_mut() {
            if let Err(e) = sink.deliver(report) {
                failures += 1;
                log::error!(
                    "sink {}: failed to deliver scan for {}: {}",
                    sink.name(),
                    report.shelf_id,
                    e
                );
            }
        }
        failures
    }

    fn guard(&self) -> std::sync::MutexGuard<'_, Vec<Box<dyn ReportSink>>> {
        match self.sinks.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use std::sync::Arc;

    struct Recording {
        seen: Arc<Mutex<Vec<String>>>,
    }

    impl ReportSink for Recording {
        fn name(&self) -> &str {
            "recording"
        }
        fn deliver(&mut self, report: &ScanReport) -> Result<(), SinkError> {
            self.seen.lock().unwrap().push(report.shelf_id.clone());
            Ok(())
        }
    }

    struct Failing;

    impl ReportSink for Failing {
        fn name(&self) -> &str {
            "failing"
        }
        fn deliver(&mut self, _report: &ScanReport) -> Result<(), SinkError> {
            Err(SinkError::Publish("broker down".to_string()))
        }
    }

    #[test]
    fn failure_does_not_skip_later_sinks() {
        let seen = Arc::new(Mutex::new(Vec::new()));
        let sinks = ResultSinks::new(vec![
            Box::new(Failing),
            Box::new(Recording { seen: seen.clone() }),
        ]);
        let report = ScanReport::build("shelf_B2", Utc::now(), 1.0, Vec::new());
        assert_eq!(sinks.deliver(&report), 1);
        assert_eq!(*seen.lock().unwrap(), vec!["shelf_B2".to_string()]);
        assert_eq!(sinks.names(), vec!["failing", "recording"]);
    }
}
