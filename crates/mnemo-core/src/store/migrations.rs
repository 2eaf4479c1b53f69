//! Database Migrations
//!
//! Schema migration definitions for the storage layer.

/// Migration definitions, applied in order against the writer connection.
pub const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    description: "Initial schema: memory units, preferences, entities, relations, contradictions",
    up: MIGRATION_V1_UP,
}];

/// A database migration.
#[derive(Debug, Clone)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

const MIGRATION_V1_UP: &str = r#"
CREATE TABLE IF NOT EXISTS memory_units (
    id TEXT PRIMARY KEY,
    created_at TEXT NOT NULL,

    summary TEXT NOT NULL,
    entities TEXT NOT NULL DEFAULT '[]',
    facts TEXT NOT NULL DEFAULT '[]',
    structured_facts TEXT NOT NULL DEFAULT '[]',

    tier TEXT NOT NULL DEFAULT 'observed_fact',
    confidence REAL NOT NULL DEFAULT 0.8,

    valid_from TEXT,
    valid_to TEXT,

    base_importance REAL NOT NULL DEFAULT 5.0,
    current_importance REAL NOT NULL DEFAULT 5.0,
    last_decay_at TEXT NOT NULL,

    access_count INTEGER NOT NULL DEFAULT 0,
    last_accessed_at TEXT,

    is_active INTEGER NOT NULL DEFAULT 1,
    supersedes TEXT NOT NULL DEFAULT '[]',

    source_conversation_id TEXT
);

CREATE INDEX IF NOT EXISTS idx_memory_units_active ON memory_units(is_active);
CREATE INDEX IF NOT EXISTS idx_memory_units_tier ON memory_units(tier);
CREATE INDEX IF NOT EXISTS idx_memory_units_created ON memory_units(created_at);
CREATE INDEX IF NOT EXISTS idx_memory_units_importance ON memory_units(current_importance);
CREATE INDEX IF NOT EXISTS idx_memory_units_valid_range ON memory_units(valid_from, valid_to);

CREATE TABLE IF NOT EXISTS memory_embeddings (
    memory_id TEXT PRIMARY KEY REFERENCES memory_units(id) ON DELETE CASCADE,
    embedding BLOB NOT NULL,
    dimensions INTEGER NOT NULL,
    created_at TEXT NOT NULL
);

CREATE VIRTUAL TABLE IF NOT EXISTS memory_fts USING fts5(
    id,
    summary,
    facts,
    content='memory_units',
    content_rowid='rowid'
);

CREATE TRIGGER IF NOT EXISTS memory_units_ai AFTER INSERT ON memory_units BEGIN
    INSERT INTO memory_fts(rowid, id, summary, facts)
    VALUES (NEW.rowid, NEW.id, NEW.summary, NEW.facts);
END;

CREATE TRIGGER IF NOT EXISTS memory_units_ad AFTER DELETE ON memory_units BEGIN
    INSERT INTO memory_fts(memory_fts, rowid, id, summary, facts)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.summary, OLD.facts);
END;

CREATE TRIGGER IF NOT EXISTS memory_units_au AFTER UPDATE ON memory_units BEGIN
    INSERT INTO memory_fts(memory_fts, rowid, id, summary, facts)
    VALUES ('delete', OLD.rowid, OLD.id, OLD.summary, OLD.facts);
    INSERT INTO memory_fts(rowid, id, summary, facts)
    VALUES (NEW.rowid, NEW.id, NEW.summary, NEW.facts);
END;

CREATE TABLE IF NOT EXISTS preferences (
    id TEXT PRIMARY KEY,
    subject TEXT NOT NULL,
    entity TEXT NOT NULL,
    valence TEXT NOT NULL,
    strength REAL NOT NULL,
    context TEXT,
    confidence REAL NOT NULL,
    memory_id TEXT REFERENCES memory_units(id) ON DELETE SET NULL,
    is_active INTEGER NOT NULL DEFAULT 1,
    superseded_by TEXT,
    created_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_preferences_entity ON preferences(entity);
CREATE INDEX IF NOT EXISTS idx_preferences_active ON preferences(is_active);

CREATE TABLE IF NOT EXISTS entities (
    id TEXT PRIMARY KEY,
    canonical_name TEXT NOT NULL,
    aliases TEXT NOT NULL DEFAULT '[]',
    entity_type TEXT NOT NULL DEFAULT 'unknown',
    confidence REAL NOT NULL,
    confirmed INTEGER NOT NULL DEFAULT 0,
    memory_ids TEXT NOT NULL DEFAULT '[]',
    first_seen_at TEXT NOT NULL,
    last_seen_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_entities_canonical_name ON entities(canonical_name);

CREATE TABLE IF NOT EXISTS relations (
    source_id TEXT NOT NULL REFERENCES memory_units(id) ON DELETE CASCADE,
    target_id TEXT NOT NULL REFERENCES memory_units(id) ON DELETE CASCADE,
    relation_type TEXT NOT NULL,
    weight REAL NOT NULL,
    bidirectional INTEGER NOT NULL DEFAULT 0,
    PRIMARY KEY (source_id, target_id, relation_type)
);

CREATE INDEX IF NOT EXISTS idx_relations_source ON relations(source_id);
CREATE INDEX IF NOT EXISTS idx_relations_target ON relations(target_id);

CREATE TABLE IF NOT EXISTS contradictions (
    id TEXT PRIMARY KEY,
    memory_a TEXT NOT NULL REFERENCES memory_units(id) ON DELETE CASCADE,
    memory_b TEXT NOT NULL REFERENCES memory_units(id) ON DELETE CASCADE,
    field_path TEXT NOT NULL,
    reason TEXT NOT NULL,
    resolution TEXT NOT NULL DEFAULT 'pending',
    resolution_note TEXT,
    detected_at TEXT NOT NULL,
    resolved_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_contradictions_resolution ON contradictions(resolution);

CREATE TABLE IF NOT EXISTS decay_log (
    memory_id TEXT NOT NULL REFERENCES memory_units(id) ON DELETE CASCADE,
    old_importance REAL NOT NULL,
    new_importance REAL NOT NULL,
    decay_factor REAL NOT NULL,
    reinforcement REAL NOT NULL,
    run_at TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_decay_log_memory ON decay_log(memory_id);

CREATE TABLE IF NOT EXISTS schema_version (
    version INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL
);

INSERT OR IGNORE INTO schema_version (version, applied_at) VALUES (1, datetime('now'));
"#;

/// Current applied schema version, or 0 if `schema_version` is empty.
pub fn get_current_version(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    conn.query_row("SELECT COALESCE(MAX(version), 0) FROM schema_version", [], |row| row.get(0))
        .or(Ok(0))
}

/// Apply pending migrations in order, returning the count applied.
pub fn apply_migrations(conn: &rusqlite::Connection) -> rusqlite::Result<u32> {
    let current_version = get_current_version(conn)?;
    let mut applied = 0;

    for migration in MIGRATIONS {
        if migration.version > current_version {
            tracing::info!(
                "Applying migration v{}: {}",
                migration.version,
                migration.description
            );
            conn.execute_batch(migration.up)?;
            applied += 1;
        }
    }

    Ok(applied)
}

#[cfg(test)]
mod tests {
    use super::*;
    use rusqlite::Connection;

    #[test]
    fn fresh_database_applies_all_migrations() {
        let conn = Connection::open_in_memory().unwrap();
        let applied = apply_migrations(&conn).unwrap();
        assert_eq!(applied, MIGRATIONS.len() as u32);
        assert_eq!(get_current_version(&conn).unwrap(), MIGRATIONS.last().unwrap().version);
    }

    #[test]
    fn migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        apply_migrations(&conn).unwrap();
        let applied_again = apply_migrations(&conn).unwrap();
        assert_eq!(applied_again, 0);
    }
}
