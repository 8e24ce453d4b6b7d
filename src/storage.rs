//! Scan persistence.
//!
//! Reports are stored in their flat form: one row per scan, timestamp as an
//! ISO-8601 string, detections as JSON text.

use rusqlite::{params, Connection};
use std::path::Path;

use crate::error::SinkError;
use crate::scan::{ScanRecord, ScanReport};
use crate::sink::ReportSink;

pub trait ReportStore: Send {
    /// Append one record. Returns the row id.
    fn insert_record(&mut self, record: &ScanRecord) -> Result<i64, SinkError>;

    /// Most recent records for a shelf, newest first.
    fn recent(&mut self, shelf_id: &str, limit: usize) -> Result<Vec<ScanRecord>, SinkError>;

    fn count(&mut self) -> Result<usize, SinkError>;
}

pub struct SqliteReportStore {
    conn: Connection,
}

impl SqliteReportStore {
    pub fn open(db_path: impl AsRef<Path>) -> Result<Self, SinkError> {
        let conn = Connection::open(db_path)?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    pub fn open_in_memory() -> Result<Self, SinkError> {
        let conn = Connection::open_in_memory()?;
        let mut store = Self { conn };
        store.ensure_schema()?;
        Ok(store)
    }

    fn ensure_schema(&mut self) -> Result<(), SinkError> {
        self.conn.execute_batch(
            r#"
            PRAGMA journal_mode=WAL;

            CREATE TABLE IF NOT EXISTS shelf_scans (
              id INTEGER PRIMARY KEY AUTOINCREMENT,
              shelf_id TEXT NOT NULL,
              timestamp TEXT NOT NULL,
              total_volume REAL NOT NULL,
              occupied_volume REAL NOT NULL,
              free_volume REAL NOT NULL,
              usage_percentage REAL NOT NULL,
              objects_json TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_scans_shelf ON shelf_scans(shelf_id, id);
            "#,
        )?;
        Ok(())
    }
}

impl ReportStore for SqliteReportStore {
    fn insert_record(&mut self, record: &ScanRecord) -> Result<i64, SinkError> {
        let objects_json = serde_json::to_string(&record.objects)?;
        self.conn.execute(
            r#"
            INSERT INTO shelf_scans(
              shelf_id, timestamp, total_volume, occupied_volume,
              free_volume, usage_percentage, objects_json
            )
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            "#,
            params![
                record.shelf_id,
                record.timestamp,
                record.total_volume,
                record.occupied_volume,
                record.free_volume,
                record.usage_percentage,
                objects_json
            ],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    fn recent(&mut self, shelf_id: &str, limit: usize) -> Result<Vec<ScanRecord>, SinkError> {
        let limit = i64::try_from(limit).unwrap_or(i64::MAX);
        let rows = {
            let mut stmt = self.conn.prepare(
                r#"
                SELECT shelf_id, timestamp, total_volume, occupied_volume,
                       free_volume, usage_percentage, objects_json
                FROM shelf_scans
                WHERE shelf_id = ?1
                ORDER BY id DESC
                LIMIT ?2
                "#,
            )?;
            let mapped = stmt.query_map(params![shelf_id, limit], |row| {
                Ok((
                    ScanRecord {
                        shelf_id: row.get(0)?,
                        timestamp: row.get(1)?,
                        total_volume: row.get(2)?,
                        occupied_volume: row.get(3)?,
                        free_volume: row.get(4)?,
                        usage_percentage: row.get(5)?,
                        objects: Vec::new(),
                    },
                    row.get::<_, String>(6)?,
                ))
            })?;
            mapped.collect::<Result<Vec<_>, _>>()?
        };

        rows.into_iter()
            .map(|(mut record, objects_json)| {
                record.objects = serde_json::from_str(&objects_json)?;
                Ok(record)
            })
            .collect()
    }

    fn count(&mut self) -> Result<usize, SinkError> {
        let n: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM shelf_scans", [], |row| row.get(0))?;
        Ok(n.max(0) as usize)
    }
}

/// Store used by tests and by deployments with persistence disabled.
#[derive(Default)]
pub struct InMemoryReportStore {
    records: Vec<ScanRecord>,
}

impl InMemoryReportStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ReportStore for InMemoryReportStore {
    fn insert_record(&mut self, record: &ScanRecord) -> Result<i64, SinkError> {
        self.records.push(record.clone());
        Ok(self.records.len() as i64)
    }

    fn recent(&mut self, shelf_id: &str, limit: usize) -> Result<Vec<ScanRecord>, SinkError> {
        Ok(self
            .records
            .iter()
            .rev()
            .filter(|r| r.shelf_id == shelf_id)
            .take(limit)
            .cloned()
            .collect())
    }

    fn count(&mut self) -> Result<usize, SinkError> {
        Ok(self.records.len())
    }
}

/// Adapts any store into a result sink.
pub struct StoreSink<S> {
    store: S,
}

impl<S: ReportStore> StoreSink<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store_mut(&mut self) -> &mut S {
        &mut self.store
    }
}

impl<S: ReportStore> ReportSink for StoreSink<S> {
    fn name(&self) -> &str {
        "storage"
    }

    fn deliver(&mut self, report: &ScanReport) -> Result<(), SinkError> {
        let id = self.store.insert_record(&report.to_record())?;
        log::debug!("storage: scan for {} saved as row {}", report.shelf_id, id);
        Ok(())
    }
}
