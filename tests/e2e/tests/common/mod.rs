//! Shared harness for end-to-end scenario tests: an isolated, temp-file
//! backed [`Storage`] plus small seeding helpers. Not itself a test binary —
//! included via `mod common;` from each scenario file.

use chrono::{DateTime, Utc};
use mnemo_core::{InsertProposal, Storage};
use tempfile::TempDir;

pub struct TestDb {
    pub storage: Storage,
    _temp_dir: TempDir,
}

impl TestDb {
    /// A fresh database in its own temporary directory, cleaned up on drop.
    pub fn new() -> Self {
        let temp_dir = TempDir::new().expect("failed to create temp directory");
        let db_path = temp_dir.path().join("test_mnemo.db");
        let storage = Storage::new(Some(db_path)).expect("failed to open test storage");
        Self { storage, _temp_dir: temp_dir }
    }
}

impl std::ops::Deref for TestDb {
    type Target = Storage;

    fn deref(&self) -> &Storage {
        &self.storage
    }
}

/// A bare memory insert with a given summary and importance, for scenarios
/// that only care about relation/decay mechanics rather than tiering.
pub fn insert_plain(db: &TestDb, summary: &str, base_importance: f64) -> String {
    db.storage
        .insert_memory_unit(InsertProposal { summary: summary.to_string(), base_importance, ..Default::default() })
        .expect("insert_memory_unit failed")
        .id
}

pub fn days_ago(days: i64) -> DateTime<Utc> {
    Utc::now() - chrono::Duration::days(days)
}

pub fn days_from_now(days: i64) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::days(days)
}
