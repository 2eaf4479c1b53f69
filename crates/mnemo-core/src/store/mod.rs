//! Memory Store (C7)
//!
//! Owns the SQLite-backed persistence layer and the single transactional
//! write pipeline every new memory passes through.

mod migrations;
mod sqlite;

pub use migrations::{apply_migrations, get_current_version, Migration, MIGRATIONS};
pub use sqlite::{InsertProposal, PreferenceInput, Storage, StorageError};
