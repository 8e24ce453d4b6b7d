//! Processors owned by the request surface, keyed by shelf id.

use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex, MutexGuard};

use thiserror::Error;

use crate::scan::{ProcessorStatus, ScanOrchestrator};

#[derive(Error, Debug, PartialEq, Eq)]
pub enum RegistryError {
    #[error("a processor is already running for {0}")]
    AlreadyRunning(String),
}

/// Owned map of shelf id to processor.
///
/// At most one processor per shelf id. A stopped processor stays registered
/// (its last report remains queryable) until it is replaced or removed.
#[derive(Default)]
pub struct ProcessorRegistry {
    processors: Mutex<HashMap<String, Arc<ScanOrchestrator>>>,
}

impl ProcessorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register `processor` under its shelf id. Fails when a running
    /// processor holds the id; a stopped one is replaced and returned.
    pub fn insert(
        &self,
        processor: ScanOrchestrator,
    ) -> Result<Option<Arc<ScanOrchestrator>>, RegistryError> {
        let shelf_id = processor.shelf_id().to_string();
        let mut processors = self.guard();
        if processors.get(&shelf_id).is_some_and(|p| p.is_running()) {
            return Err(RegistryError::AlreadyRunning(shelf_id));
        }
        let previous = processors.insert(shelf_id.clone(), Arc::new(processor));
        if previous.is_some() {
            log::info!("{}: replaced stopped processor", shelf_id);
        }
        Ok(previous)
    }

    /// Drop a stopped processor for `shelf_id`. Returns true when the id is
    /// now free; false when a running processor holds it.
    pub fn release_stopped(&self, shelf_id: &str) -> bool {
        let mut processors = self.guard();
        match processors.get(shelf_id) {
            Some(p) if p.is_running() => false,
            Some(_) => {
                processors.remove(shelf_id);
                true
            }
            None => true,
        }
    }

    pub fn get(&self, shelf_id: &str) -> Option<Arc<ScanOrchestrator>> {
        self.guard().get(shelf_id).cloned()
    }

    pub fn is_running(&self, shelf_id: &str) -> bool {
        self.get(shelf_id).is_some_and(|p| p.is_running())
    }

    pub fn len(&self) -> usize {
        self.guard().len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn status(&self) -> BTreeMap<String, ProcessorStatus> {
        self.snapshot()
            .into_iter()
            .map(|p| (p.shelf_id().to_string(), p.status()))
            .collect()
    }

    /// Stop every running processor. Processors stay registered.
    pub fn stop_all(&self) {
        for processor in self.snapshot() {
            if processor.is_running() {
                log::info!("{}: stopping for shutdown", processor.shelf_id());
                processor.stop();
            }
        }
    }

    // Stopping can take seconds; never hold the map lock across it.
    fn snapshot(&self) -> Vec<Arc<ScanOrchestrator>> {
        self.guard().values().cloned().collect()
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<String, Arc<ScanOrchestrator>>> {
        match self.processors.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::StubSceneModel;
    use crate::ingest::{SensorConfig, SyntheticSensor};
    use crate::scan::{ProcessorParts, ScanSettings};
    use std::time::Duration;

    fn processor(shelf_id: &str) -> ScanOrchestrator {
        let parts = ProcessorParts::new(
            Box::new(SyntheticSensor::new(SensorConfig {
                width: 64,
                height: 48,
                ..SensorConfig::default()
            })),
            Box::new(StubSceneModel::new()),
        );
        let settings = ScanSettings {
            interval: Duration::from_millis(20),
            ..ScanSettings::default()
        };
        ScanOrchestrator::new(shelf_id, parts, settings).unwrap()
    }

    #[test]
    fn running_processor_blocks_insert() {
        let registry = ProcessorRegistry::new();
        let first = processor("A1");
        first.start().unwrap();
        registry.insert(first).unwrap();

        let err = registry.insert(processor("A1")).unwrap_err();
        assert_eq!(err, RegistryError::AlreadyRunning("A1".to_string()));
        assert!(!registry.release_stopped("A1"));

        registry.stop_all();
        assert!(!registry.is_running("A1"));
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn stopped_processor_is_replaced() {
        let registry = ProcessorRegistry::new();
        assert!(registry.insert(processor("A1")).unwrap().is_none());
        assert!(registry.insert(processor("A1")).unwrap().is_some());
        registry.insert(processor("B2")).unwrap();

        let status = registry.status();
        assert_eq!(status.keys().collect::<Vec<_>>(), vec!["A1", "B2"]);
        assert!(registry.release_stopped("B2"));
        assert!(registry.get("B2").is_none());
        assert!(registry.release_stopped("A1"));
        assert!(registry.is_empty());
    }
}
