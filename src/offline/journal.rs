//! Durable journal for pending offline operations.
//!
//! The durable subset of the pending queue is mirrored to one JSON document
//! after every change. Writes go through a temp file and rename so a crash
//! mid-write leaves the previous journal intact. A missing file reads as an
//! empty queue; a corrupt one is the caller's decision to degrade.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::operation::PendingRecord;

/// Directory under the app data dir holding coordination state.
const MEALSYNC_DIR_NAME: &str = ".mealsync";

/// Journal file for pending offline operations.
const PENDING_FILE_NAME: &str = "pending_operations.json";

/// Bumped when the journal document shape changes.
const JOURNAL_SCHEMA_VERSION: u32 = 1;

/// Errors from journal storage operations.
#[derive(Debug, Error)]
pub enum JournalError {
    #[error("journal io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("journal serialization error: {0}")]
    Json(#[from] serde_json::Error),
}

pub type JournalResult<T> = Result<T, JournalError>;

#[derive(Debug, Serialize, Deserialize)]
struct JournalDocument {
    schema_version: u32,
    operations: Vec<PendingRecord>,
}

/// Atomic reader/writer for the pending-operations journal.
#[derive(Debug, Clone)]
pub struct QueueJournal {
    path: PathBuf,
}

impl QueueJournal {
    /// Journal rooted at the app data dir; the file lives under
    /// `.mealsync/pending_operations.json`.
    pub fn new(base_dir: impl AsRef<Path>) -> Self {
        Self {
            path: base_dir
                .as_ref()
                .join(MEALSYNC_DIR_NAME)
                .join(PENDING_FILE_NAME),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the journaled operations. A missing file is an empty queue.
    pub fn load(&self) -> JournalResult<Vec<PendingRecord>> {
        let raw = match fs::read_to_string(&self.path) {
            Ok(raw) => raw,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };
        let document: JournalDocument = serde_json::from_str(&raw)?;
        Ok(document.operations)
    }

    /// Replace the journal with `operations`, atomically.
    pub fn store(&self, operations: &[PendingRecord]) -> JournalResult<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let document = JournalDocument {
            schema_version: JOURNAL_SCHEMA_VERSION,
            operations: operations.to_vec(),
        };
        let json = serde_json::to_string_pretty(&document)?;
        let temp_path = self.path.with_extension("json.tmp");
        {
            let mut file = OpenOptions::new()
                .create(true)
                .write(true)
                .truncate(true)
                .open(&temp_path)?;
            file.write_all(json.as_bytes())?;
            file.sync_all()?;
        }
        fs::rename(&temp_path, &self.path)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::offline::operation::QueuedOperation;
    use crate::plan::PlanDraft;
    use serde_json::json;
    use tempfile::TempDir;
    use tokio_test::assert_ok;

    fn sample_records() -> Vec<PendingRecord> {
        vec![
            PendingRecord::new(
                QueuedOperation::SavePlan(PlanDraft::new(
                    "u1",
                    "2025-03-10",
                    json!({"monday": ["oats"]}),
                )),
                "save weekly plan",
            ),
            PendingRecord::new(
                QueuedOperation::DeletePlan {
                    plan_id: "plan-7".to_string(),
                },
                "delete weekly plan",
            ),
        ]
    }

    #[test]
    fn missing_file_loads_empty() {
        let dir = TempDir::new().unwrap();
        let journal = QueueJournal::new(dir.path());
        let loaded = assert_ok!(journal.load());
        assert!(loaded.is_empty());
    }

    #[test]
    fn round_trip_preserves_operations_exactly() {
        let dir = TempDir::new().unwrap();
        let journal = QueueJournal::new(dir.path());
        let records = sample_records();

        assert_ok!(journal.store(&records));
        let loaded = assert_ok!(journal.load());
        assert_eq!(loaded, records);
    }

    #[test]
    fn store_creates_parent_directories() {
        let dir = TempDir::new().unwrap();
        let journal = QueueJournal::new(dir.path());
        assert_ok!(journal.store(&[]));
        assert!(journal.path().exists());
        assert!(journal.path().parent().unwrap().ends_with(".mealsync"));
    }

    #[test]
    fn store_replaces_rather_than_appends() {
        let dir = TempDir::new().unwrap();
        let journal = QueueJournal::new(dir.path());
        let records = sample_records();

        assert_ok!(journal.store(&records));
        assert_ok!(journal.store(&records[1..]));
        let loaded = assert_ok!(journal.load());
        assert_eq!(loaded.len(), 1);
        assert_eq!(loaded[0].description, "delete weekly plan");
    }

    #[test]
    fn corrupt_file_is_a_json_error() {
        let dir = TempDir::new().unwrap();
        let journal = QueueJournal::new(dir.path());
        fs::create_dir_all(journal.path().parent().unwrap()).unwrap();
        fs::write(journal.path(), "{not json").unwrap();

        let result = journal.load();
        assert!(matches!(result, Err(JournalError::Json(_))));
    }

    #[test]
    fn document_carries_schema_version() {
        let dir = TempDir::new().unwrap();
        let journal = QueueJournal::new(dir.path());
        assert_ok!(journal.store(&sample_records()));

        let raw = fs::read_to_string(journal.path()).unwrap();
        let document: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(document["schema_version"], 1);
        assert_eq!(document["operations"].as_array().unwrap().len(), 2);
    }
}
