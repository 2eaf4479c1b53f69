//! SQLite storage implementation.
//!
//! Separate reader/writer connections to the same file give `Storage`
//! `Send + Sync` without requiring callers to wrap it in `Arc<Mutex<_>>`
//! themselves; the write pipeline still serializes through a single writer
//! connection per the transactional contract in §4.7.

use std::path::PathBuf;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use directories::ProjectDirs;
use rusqlite::{params, Connection, OptionalExtension, Row};
use uuid::Uuid;

use crate::contradiction::{self, ConflictType, ExistingMemory};
use crate::decay::{self, DecayConfig, DecayInput};
use crate::embedder::{EmbeddingError, EmbeddingService};
use crate::entity::{self, ExistingEntity, ExplicitLink, ResolutionSource};
use crate::model::{
    Contradiction, DecayLogEntry, Entity, EntityType, EngineStats, MemoryUnit, Preference,
    Relation, Resolution, StructuredFact, Tier, Valence,
};
use crate::retrieval::{self, Candidate, RelationEdge, RetrievalConfig, RetrievalResult};
use crate::tiering;

#[cfg(feature = "vector-search")]
use crate::vector_index::VectorIndex;

/// Storage error type.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("embedding error: {0}")]
    Embedding(#[from] EmbeddingError),
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
    #[error("initialization error: {0}")]
    Init(String),
    #[error("not found: {0}")]
    NotFound(String),
}

pub type Result<T> = std::result::Result<T, StorageError>;

fn lock_err(label: &str) -> StorageError {
    StorageError::Init(format!("{label} lock poisoned"))
}

/// One preference to attach to a new memory.
#[derive(Debug, Clone)]
pub struct PreferenceInput {
    pub subject: String,
    pub entity: String,
    pub valence: Valence,
    pub strength: f64,
    pub context: Option<String>,
    pub confidence: f64,
}

/// Input to [`Storage::insert_memory_unit`].
#[derive(Debug, Clone)]
pub struct InsertProposal {
    pub summary: String,
    pub entities: Vec<String>,
    pub facts: Vec<String>,
    pub structured_facts: Vec<StructuredFact>,
    pub tier: Option<Tier>,
    pub confidence: Option<f64>,
    pub base_importance: f64,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
    pub preferences: Vec<PreferenceInput>,
    pub related_to: Vec<String>,
    pub source_conversation_id: Option<String>,
}

impl Default for InsertProposal {
    fn default() -> Self {
        Self {
            summary: String::new(),
            entities: Vec::new(),
            facts: Vec::new(),
            structured_facts: Vec::new(),
            tier: None,
            confidence: None,
            base_importance: 5.0,
            valid_from: None,
            valid_to: None,
            preferences: Vec::new(),
            related_to: Vec::new(),
            source_conversation_id: None,
        }
    }
}

fn embedding_to_bytes(v: &[f32]) -> Vec<u8> {
    v.iter().flat_map(|x| x.to_le_bytes()).collect()
}

fn bytes_to_embedding(bytes: &[u8]) -> Vec<f32> {
    bytes
        .chunks_exact(4)
        .map(|c| f32::from_le_bytes([c[0], c[1], c[2], c[3]]))
        .collect()
}

fn json_strings(s: &str) -> Vec<String> {
    serde_json::from_str(s).unwrap_or_default()
}

fn json_structured_facts(s: &str) -> Vec<StructuredFact> {
    serde_json::from_str(s).unwrap_or_default()
}

fn parse_dt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.and_then(|s| DateTime::parse_from_rfc3339(&s).ok()).map(|dt| dt.with_timezone(&Utc))
}

fn row_to_memory_unit(row: &Row) -> rusqlite::Result<MemoryUnit> {
    let created_at: String = row.get("created_at")?;
    let last_decay_at: String = row.get("last_decay_at")?;
    let tier: String = row.get("tier")?;
    let embedding_bytes: Option<Vec<u8>> = row.get("embedding").ok();

    Ok(MemoryUnit {
        id: row.get("id")?,
        created_at: DateTime::parse_from_rfc3339(&created_at).unwrap_or_default().with_timezone(&Utc),
        summary: row.get("summary")?,
        entities: json_strings(&row.get::<_, String>("entities")?),
        facts: json_strings(&row.get::<_, String>("facts")?),
        structured_facts: json_structured_facts(&row.get::<_, String>("structured_facts")?),
        tier: Tier::parse(&tier).unwrap_or_default(),
        confidence: row.get("confidence")?,
        valid_from: parse_dt(row.get("valid_from")?),
        valid_to: parse_dt(row.get("valid_to")?),
        base_importance: row.get("base_importance")?,
        current_importance: row.get("current_importance")?,
        last_decay_at: DateTime::parse_from_rfc3339(&last_decay_at).unwrap_or_default().with_timezone(&Utc),
        access_count: row.get("access_count")?,
        last_accessed_at: parse_dt(row.get("last_accessed_at")?),
        embedding: embedding_bytes.map(|b| bytes_to_embedding(&b)),
        is_active: row.get::<_, i64>("is_active")? != 0,
        supersedes: json_strings(&row.get::<_, String>("supersedes")?),
        source_conversation_id: row.get("source_conversation_id")?,
    })
}

const MEMORY_UNIT_SELECT: &str = "SELECT m.id, m.created_at, m.summary, m.entities, m.facts, m.structured_facts, \
     m.tier, m.confidence, m.valid_from, m.valid_to, m.base_importance, m.current_importance, \
     m.last_decay_at, m.access_count, m.last_accessed_at, m.is_active, m.supersedes, \
     m.source_conversation_id, e.embedding \
     FROM memory_units m LEFT JOIN memory_embeddings e ON e.memory_id = m.id";

/// Main storage struct. All methods take `&self`; interior mutability is via
/// `Mutex`-guarded connections, making `Storage` safe to share as `Arc<Storage>`.
pub struct Storage {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
    embedder: EmbeddingService,
    #[cfg(feature = "vector-search")]
    vector_index: Mutex<VectorIndex>,
}

impl Storage {
    fn configure_connection(conn: &Connection) -> Result<()> {
        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA synchronous = NORMAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )?;
        Ok(())
    }

    /// Open (creating if needed) the memory database at `db_path`, or the
    /// platform default data directory when `None`.
    pub fn new(db_path: Option<PathBuf>) -> Result<Self> {
        let path = match db_path {
            Some(p) => p,
            None => {
                let dirs = ProjectDirs::from("dev", "mnemo", "mnemo")
                    .ok_or_else(|| StorageError::Init("could not determine data directory".to_string()))?;
                let data_dir = dirs.data_dir();
                std::fs::create_dir_all(data_dir)?;
                #[cfg(unix)]
                {
                    use std::os::unix::fs::PermissionsExt;
                    let _ = std::fs::set_permissions(data_dir, std::fs::Permissions::from_mode(0o700));
                }
                data_dir.join("mnemo.db")
            }
        };

        let writer_conn = Connection::open(&path)?;
        #[cfg(unix)]
        if path.exists() {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600));
        }
        Self::configure_connection(&writer_conn)?;
        super::migrations::apply_migrations(&writer_conn)?;

        let reader_conn = Connection::open(&path)?;
        Self::configure_connection(&reader_conn)?;

        let storage = Self {
            writer: Mutex::new(writer_conn),
            reader: Mutex::new(reader_conn),
            embedder: EmbeddingService::new(),
            #[cfg(feature = "vector-search")]
            vector_index: Mutex::new(VectorIndex::new().map_err(|e| StorageError::Init(e.to_string()))?),
        };

        #[cfg(feature = "vector-search")]
        storage.load_embeddings_into_index()?;

        Ok(storage)
    }

    #[cfg(feature = "vector-search")]
    fn load_embeddings_into_index(&self) -> Result<()> {
        let reader = self.reader.lock().map_err(|_| lock_err("reader"))?;
        let mut stmt = reader.prepare("SELECT memory_id, embedding FROM memory_embeddings")?;
        let rows: Vec<(String, Vec<u8>)> =
            stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?.filter_map(|r| r.ok()).collect();
        drop(stmt);
        drop(reader);

        let mut index = self.vector_index.lock().map_err(|_| lock_err("vector index"))?;
        for (id, bytes) in rows {
            let vector = bytes_to_embedding(&bytes);
            if let Err(e) = index.upsert(&id, &vector) {
                tracing::warn!("failed to load embedding for {id}: {e}");
            }
        }
        Ok(())
    }

    fn fetch_active_for_detection(&self, reader: &Connection) -> Result<Vec<MemoryUnit>> {
        let sql = format!("{MEMORY_UNIT_SELECT} WHERE m.is_active = 1 ORDER BY m.created_at DESC");
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_memory_unit)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Run the full write pipeline (§4.7): embed, detect contradictions,
    /// insert, resolve entities, link relations, and commit atomically.
    pub fn insert_memory_unit(&self, proposal: InsertProposal) -> Result<MemoryUnit> {
        let now = Utc::now();
        let embedding = self.embedder.embed(&proposal.summary)?;

        let classification = tiering::classify_and_enforce(&proposal.summary);
        let tier = proposal.tier.unwrap_or(classification.tier);
        let confidence = tier.enforce(proposal.confidence.unwrap_or(classification.confidence));

        let mut writer = self.writer.lock().map_err(|_| lock_err("writer"))?;
        let tx = writer.transaction()?;

        let existing = {
            let reader = self.reader.lock().map_err(|_| lock_err("reader"))?;
            self.fetch_active_for_detection(&reader)?
        };
        let existing_views: Vec<ExistingMemory<'_>> = existing
            .iter()
            .map(|m| ExistingMemory {
                id: &m.id,
                summary: &m.summary,
                facts: &m.facts,
                structured_facts: &m.structured_facts,
                entities: &m.entities,
                embedding: m.embedding.as_deref().unwrap_or(&[]),
                tier: m.tier,
                confidence: m.confidence,
            })
            .collect();

        let mut conflicts = Vec::new();
        if let Some(identity) = contradiction::detect_identity_conflict(&proposal.summary, &existing_views) {
            conflicts.push(identity);
        }
        conflicts.extend(contradiction::detect_semantic_conflicts(
            &proposal.summary,
            &proposal.structured_facts,
            &proposal.entities,
            &embedding,
            &existing_views,
        ));

        let id = Uuid::new_v4().to_string();
        let mut supersedes: Vec<String> = Vec::new();
        let mut deactivate_existing: Vec<String> = Vec::new();
        let mut new_is_active = true;
        let mut pending_conflicts: Vec<(String, String, Resolution)> = Vec::new();

        for conflict in &conflicts {
            let resolution = if conflict.conflict_type == ConflictType::IdentityConflict {
                conflict.suggested_resolution
            } else {
                let existing_mem = existing.iter().find(|m| m.id == conflict.existing_id);
                let ctx = contradiction::ResolutionContext {
                    new_temporal: proposal
                        .structured_facts
                        .first()
                        .map(|f| f.temporal)
                        .unwrap_or_default(),
                    existing_temporal: existing_mem
                        .and_then(|m| m.structured_facts.first())
                        .map(|f| f.temporal)
                        .unwrap_or_default(),
                    new_tier: tier,
                    existing_tier: existing_mem.map(|m| m.tier).unwrap_or(tier),
                    new_confidence: confidence,
                    existing_confidence: existing_mem.map(|m| m.confidence).unwrap_or(confidence),
                };
                contradiction::select_resolution(&ctx)
            };

            match resolution {
                Resolution::ASupersedes => {
                    supersedes.push(conflict.existing_id.clone());
                    deactivate_existing.push(conflict.existing_id.clone());
                }
                Resolution::BSupersedes => {
                    new_is_active = false;
                }
                _ => {}
            }
            pending_conflicts.push((conflict.existing_id.clone(), conflict.reason.clone(), resolution));
        }

        tx.execute(
            "INSERT INTO memory_units (
                id, created_at, summary, entities, facts, structured_facts, tier, confidence,
                valid_from, valid_to, base_importance, current_importance, last_decay_at,
                access_count, last_accessed_at, is_active, supersedes, source_conversation_id
            ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11,?12,?13,?14,?15,?16,?17,?18)",
            params![
                id,
                now.to_rfc3339(),
                proposal.summary,
                serde_json::to_string(&proposal.entities)?,
                serde_json::to_string(&proposal.facts)?,
                serde_json::to_string(&proposal.structured_facts)?,
                tier.as_str(),
                confidence,
                proposal.valid_from.map(|d| d.to_rfc3339()),
                proposal.valid_to.map(|d| d.to_rfc3339()),
                proposal.base_importance,
                proposal.base_importance,
                now.to_rfc3339(),
                0i64,
                Option::<String>::None,
                new_is_active as i64,
                serde_json::to_string(&supersedes)?,
                proposal.source_conversation_id,
            ],
        )?;

        tx.execute(
            "INSERT INTO memory_embeddings (memory_id, embedding, dimensions, created_at) VALUES (?1,?2,?3,?4)",
            params![id, embedding_to_bytes(&embedding), embedding.len() as i64, now.to_rfc3339()],
        )?;

        for existing_id in &deactivate_existing {
            tx.execute("UPDATE memory_units SET is_active = 0 WHERE id = ?1", params![existing_id])?;
        }

        for (existing_id, reason, resolution) in &pending_conflicts {
            let cid = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO contradictions (id, memory_a, memory_b, field_path, reason, resolution, detected_at, resolved_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8)",
                params![
                    cid,
                    id,
                    existing_id,
                    "summary",
                    reason,
                    resolution.as_str(),
                    now.to_rfc3339(),
                    Option::<String>::None,
                ],
            )?;
        }

        for pref in &proposal.preferences {
            let pid = Uuid::new_v4().to_string();
            tx.execute(
                "INSERT INTO preferences (id, subject, entity, valence, strength, context, confidence, memory_id, is_active, created_at)
                 VALUES (?1,?2,?3,?4,?5,?6,?7,?8,1,?9)",
                params![
                    pid,
                    pref.subject,
                    pref.entity,
                    pref.valence.as_str(),
                    pref.strength,
                    pref.context,
                    pref.confidence,
                    id,
                    now.to_rfc3339(),
                ],
            )?;
        }

        for mention in &proposal.entities {
            self.resolve_and_link_entity(&tx, mention, &id, now)?;
        }

        for related_id in &proposal.related_to {
            tx.execute(
                "INSERT INTO relations (source_id, target_id, relation_type, weight, bidirectional)
                 VALUES (?1,?2,'related_to',0.8,1)
                 ON CONFLICT(source_id, target_id, relation_type) DO UPDATE SET weight = excluded.weight",
                params![id, related_id],
            )?;
        }

        let others_with_entities: Vec<(String, Vec<String>)> =
            existing.iter().map(|m| (m.id.clone(), m.entities.clone())).collect();
        for discovered in retrieval::discover_relations(&proposal.entities, &others_with_entities) {
            tx.execute(
                "INSERT INTO relations (source_id, target_id, relation_type, weight, bidirectional)
                 VALUES (?1,?2,'related_to',?3,1)
                 ON CONFLICT(source_id, target_id, relation_type) DO UPDATE SET weight = excluded.weight",
                params![id, discovered.other_id, discovered.weight],
            )?;
        }

        tx.commit()?;

        #[cfg(feature = "vector-search")]
        {
            let mut index = self.vector_index.lock().map_err(|_| lock_err("vector index"))?;
            let _ = index.upsert(&id, &embedding);
        }

        self.get_memory(&id)?.ok_or_else(|| StorageError::NotFound(id))
    }

    fn resolve_and_link_entity(
        &self,
        tx: &rusqlite::Transaction<'_>,
        mention: &str,
        memory_id: &str,
        now: DateTime<Utc>,
    ) -> Result<()> {
        let existing_rows: Vec<(String, String, Vec<String>)> = {
            let mut stmt = tx.prepare("SELECT id, canonical_name, aliases FROM entities")?;
            let rows = stmt.query_map([], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?, json_strings(&row.get::<_, String>(2)?)))
            })?;
            rows.collect::<rusqlite::Result<_>>()?
        };
        let existing_views: Vec<ExistingEntity<'_>> = existing_rows
            .iter()
            .map(|(id, name, aliases)| ExistingEntity { id, canonical_name: name, aliases })
            .collect();
        let explicit_links: Vec<ExplicitLink<'_>> = Vec::new();

        let resolved = entity::resolve(mention, &explicit_links, &existing_views);

        match resolved.source {
            ResolutionSource::ExactMatch | ResolutionSource::AliasMatch | ResolutionSource::ExplicitLink => {
                if let Some(entity_id) = &resolved.entity_id {
                    let memory_ids_json: String =
                        tx.query_row("SELECT memory_ids FROM entities WHERE id = ?1", params![entity_id], |r| r.get(0))?;
                    let mut memory_ids = json_strings(&memory_ids_json);
                    if !memory_ids.contains(&memory_id.to_string()) {
                        memory_ids.push(memory_id.to_string());
                    }
                    tx.execute(
                        "UPDATE entities SET memory_ids = ?1, last_seen_at = ?2 WHERE id = ?3",
                        params![serde_json::to_string(&memory_ids)?, now.to_rfc3339(), entity_id],
                    )?;
                }
            }
            ResolutionSource::NewEntity => {
                let entity_id = Uuid::new_v4().to_string();
                tx.execute(
                    "INSERT INTO entities (id, canonical_name, aliases, entity_type, confidence, confirmed, memory_ids, first_seen_at, last_seen_at)
                     VALUES (?1,?2,'[]',?3,?4,0,?5,?6,?7)",
                    params![
                        entity_id,
                        resolved.canonical.unwrap_or_else(|| mention.to_string()),
                        resolved.inferred_type.unwrap_or(EntityType::Unknown).as_str(),
                        resolved.confidence,
                        serde_json::to_string(&vec![memory_id.to_string()])?,
                        now.to_rfc3339(),
                        now.to_rfc3339(),
                    ],
                )?;
            }
            ResolutionSource::Unresolved => {}
        }
        Ok(())
    }

    /// Fetch a single memory by id.
    pub fn get_memory(&self, id: &str) -> Result<Option<MemoryUnit>> {
        let reader = self.reader.lock().map_err(|_| lock_err("reader"))?;
        let sql = format!("{MEMORY_UNIT_SELECT} WHERE m.id = ?1");
        reader.query_row(&sql, params![id], row_to_memory_unit).optional().map_err(StorageError::from)
    }

    /// All active memories, most recent first.
    pub fn get_all_memories(&self) -> Result<Vec<MemoryUnit>> {
        let reader = self.reader.lock().map_err(|_| lock_err("reader"))?;
        self.fetch_active_for_detection(&reader)
    }

    /// `GET /memories?inactive=` listing: active only, or every memory ever
    /// written, most recent first.
    pub fn get_memories(&self, include_inactive: bool) -> Result<Vec<MemoryUnit>> {
        if !include_inactive {
            return self.get_all_memories();
        }
        let reader = self.reader.lock().map_err(|_| lock_err("reader"))?;
        let sql = format!("{MEMORY_UNIT_SELECT} ORDER BY m.created_at DESC");
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map([], row_to_memory_unit)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn get_memories_by_tier(&self, tier: Tier) -> Result<Vec<MemoryUnit>> {
        let reader = self.reader.lock().map_err(|_| lock_err("reader"))?;
        let sql = format!("{MEMORY_UNIT_SELECT} WHERE m.is_active = 1 AND m.tier = ?1 ORDER BY m.created_at DESC");
        let mut stmt = reader.prepare(&sql)?;
        let rows = stmt.query_map(params![tier.as_str()], row_to_memory_unit)?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn get_user_preferences(&self) -> Result<Vec<Preference>> {
        let reader = self.reader.lock().map_err(|_| lock_err("reader"))?;
        let mut stmt = reader.prepare(
            "SELECT id, subject, entity, valence, strength, context, confidence, memory_id, is_active, superseded_by, created_at
             FROM preferences WHERE is_active = 1 ORDER BY created_at DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            let created_at: String = row.get(10)?;
            Ok(Preference {
                id: row.get(0)?,
                subject: row.get(1)?,
                entity: row.get(2)?,
                valence: Valence::parse(&row.get::<_, String>(3)?),
                strength: row.get(4)?,
                context: row.get(5)?,
                confidence: row.get(6)?,
                memory_id: row.get(7)?,
                is_active: row.get::<_, i64>(8)? != 0,
                superseded_by: row.get(9)?,
                created_at: DateTime::parse_from_rfc3339(&created_at).unwrap_or_default().with_timezone(&Utc),
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn get_entities(&self) -> Result<Vec<Entity>> {
        let reader = self.reader.lock().map_err(|_| lock_err("reader"))?;
        let mut stmt = reader.prepare(
            "SELECT id, canonical_name, aliases, entity_type, confidence, confirmed, memory_ids, first_seen_at, last_seen_at FROM entities",
        )?;
        let rows = stmt.query_map([], |row| {
            let first_seen: String = row.get(7)?;
            let last_seen: String = row.get(8)?;
            Ok(Entity {
                id: row.get(0)?,
                canonical_name: row.get(1)?,
                aliases: json_strings(&row.get::<_, String>(2)?),
                entity_type: EntityType::parse(&row.get::<_, String>(3)?),
                confidence: row.get(4)?,
                confirmed: row.get::<_, i64>(5)? != 0,
                memory_ids: json_strings(&row.get::<_, String>(6)?),
                first_seen_at: DateTime::parse_from_rfc3339(&first_seen).unwrap_or_default().with_timezone(&Utc),
                last_seen_at: DateTime::parse_from_rfc3339(&last_seen).unwrap_or_default().with_timezone(&Utc),
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// A single entity by id, for `GET /entities/:id/memories` and
    /// `POST /entities/:id/confirm`.
    pub fn get_entity(&self, id: &str) -> Result<Option<Entity>> {
        Ok(self.get_entities()?.into_iter().find(|e| e.id == id))
    }

    /// Every memory currently linked to `entity_id`.
    pub fn get_memories_for_entity(&self, entity_id: &str) -> Result<Vec<MemoryUnit>> {
        let Some(entity) = self.get_entity(entity_id)? else { return Ok(Vec::new()) };
        let mut out = Vec::new();
        for memory_id in &entity.memory_ids {
            if let Some(memory) = self.get_memory(memory_id)? {
                out.push(memory);
            }
        }
        Ok(out)
    }

    /// Mark an entity as user-confirmed (disambiguated by a human rather
    /// than inferred by [`crate::entity::resolve`]).
    pub fn confirm_entity(&self, entity_id: &str) -> Result<()> {
        let writer = self.writer.lock().map_err(|_| lock_err("writer"))?;
        writer.execute("UPDATE entities SET confirmed = 1 WHERE id = ?1", params![entity_id])?;
        Ok(())
    }

    pub fn get_relations_for(&self, memory_id: &str) -> Result<Vec<Relation>> {
        let reader = self.reader.lock().map_err(|_| lock_err("reader"))?;
        let mut stmt = reader.prepare(
            "SELECT source_id, target_id, relation_type, weight, bidirectional FROM relations
             WHERE source_id = ?1 OR (target_id = ?1 AND bidirectional = 1)",
        )?;
        let rows = stmt.query_map(params![memory_id], |row| {
            Ok(Relation {
                source_id: row.get(0)?,
                target_id: row.get(1)?,
                relation_type: row.get(2)?,
                weight: row.get(3)?,
                bidirectional: row.get::<_, i64>(4)? != 0,
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    pub fn get_pending_contradictions(&self) -> Result<Vec<Contradiction>> {
        let reader = self.reader.lock().map_err(|_| lock_err("reader"))?;
        let mut stmt = reader.prepare(
            "SELECT id, memory_a, memory_b, field_path, reason, resolution, resolution_note, detected_at, resolved_at
             FROM contradictions WHERE resolution = 'pending'",
        )?;
        let rows = stmt.query_map([], |row| {
            let detected_at: String = row.get(7)?;
            Ok(Contradiction {
                id: row.get(0)?,
                memory_a: row.get(1)?,
                memory_b: row.get(2)?,
                field_path: row.get(3)?,
                reason: row.get(4)?,
                resolution: Resolution::parse(&row.get::<_, String>(5)?).unwrap_or(Resolution::Pending),
                resolution_note: row.get(6)?,
                detected_at: DateTime::parse_from_rfc3339(&detected_at).unwrap_or_default().with_timezone(&Utc),
                resolved_at: parse_dt(row.get(8)?),
            })
        })?;
        let mut out = Vec::new();
        for r in rows {
            out.push(r?);
        }
        Ok(out)
    }

    /// Apply a manual resolution to a pending contradiction (§4.6's
    /// `resolve` entry point).
    pub fn resolve_contradiction(&self, contradiction_id: &str, resolution: Resolution, note: Option<String>) -> Result<()> {
        let mut writer = self.writer.lock().map_err(|_| lock_err("writer"))?;
        let tx = writer.transaction()?;

        let (memory_a, memory_b): (String, String) = tx.query_row(
            "SELECT memory_a, memory_b FROM contradictions WHERE id = ?1",
            params![contradiction_id],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;

        let effect = contradiction::resolve(&memory_a, &memory_b, resolution);
        if let Some(deactivate_id) = &effect.deactivate_id {
            tx.execute("UPDATE memory_units SET is_active = 0 WHERE id = ?1", params![deactivate_id])?;
        }
        if let Some(target_id) = &effect.supersedes_append_to {
            let loser = if target_id == &memory_a { &memory_b } else { &memory_a };
            let supersedes_json: String =
                tx.query_row("SELECT supersedes FROM memory_units WHERE id = ?1", params![target_id], |r| r.get(0))?;
            let mut supersedes = json_strings(&supersedes_json);
            if !supersedes.contains(loser) {
                supersedes.push(loser.clone());
            }
            tx.execute(
                "UPDATE memory_units SET supersedes = ?1 WHERE id = ?2",
                params![serde_json::to_string(&supersedes)?, target_id],
            )?;
        }

        tx.execute(
            "UPDATE contradictions SET resolution = ?1, resolution_note = ?2, resolved_at = ?3 WHERE id = ?4",
            params![resolution.as_str(), note, Utc::now().to_rfc3339(), contradiction_id],
        )?;
        tx.commit()?;
        Ok(())
    }

    /// Run hybrid + spreading-activation retrieval (§4.5) over every active
    /// memory and relation, then reinforce the returned ids.
    pub fn retrieve(&self, query_text: &str, config: &RetrievalConfig) -> Result<Vec<RetrievalResult>> {
        let query_embedding = self.embedder.embed(query_text)?;
        let memories = self.get_all_memories()?;

        let candidates: Vec<Candidate> = memories
            .iter()
            .filter_map(|m| {
                m.embedding.clone().map(|embedding| Candidate {
                    id: m.id.clone(),
                    embedding,
                    summary: m.summary.clone(),
                    current_importance: m.current_importance,
                })
            })
            .collect();

        let reader = self.reader.lock().map_err(|_| lock_err("reader"))?;
        let mut stmt = reader.prepare("SELECT source_id, target_id, relation_type, weight, bidirectional FROM relations")?;
        let relations: Vec<RelationEdge> = stmt
            .query_map([], |row| {
                Ok(RelationEdge {
                    source_id: row.get(0)?,
                    target_id: row.get(1)?,
                    relation_type: row.get(2)?,
                    weight: row.get(3)?,
                    bidirectional: row.get::<_, i64>(4)? != 0,
                })
            })?
            .collect::<rusqlite::Result<_>>()?;
        drop(stmt);
        drop(reader);

        let results = retrieval::retrieve(&candidates, &relations, &query_embedding, query_text, config);
        self.reinforce_memories(&results.iter().map(|r| r.id.clone()).collect::<Vec<_>>(), Utc::now())?;
        Ok(results)
    }

    /// Bump `access_count` and `last_accessed_at` for each retrieved memory.
    pub fn reinforce_memories(&self, ids: &[String], now: DateTime<Utc>) -> Result<()> {
        if ids.is_empty() {
            return Ok(());
        }
        let mut writer = self.writer.lock().map_err(|_| lock_err("writer"))?;
        let tx = writer.transaction()?;
        for id in ids {
            tx.execute(
                "UPDATE memory_units SET access_count = access_count + 1, last_accessed_at = ?1 WHERE id = ?2",
                params![now.to_rfc3339(), id],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    /// Apply decay + reinforcement to every active memory in fixed-size
    /// batches, logging each material change.
    pub fn run_decay_sweep(&self, config: &DecayConfig, now: DateTime<Utc>) -> Result<Vec<DecayLogEntry>> {
        const BATCH_SIZE: i64 = 500;
        let mut entries = Vec::new();
        let mut offset: i64 = 0;

        loop {
            let batch: Vec<(String, f64, DateTime<Utc>, Option<DateTime<Utc>>, i64)> = {
                let reader = self.reader.lock().map_err(|_| lock_err("reader"))?;
                let mut stmt = reader.prepare(
                    "SELECT id, base_importance, last_decay_at, last_accessed_at, access_count
                     FROM memory_units WHERE is_active = 1 ORDER BY id LIMIT ?1 OFFSET ?2",
                )?;
                let rows = stmt.query_map(params![BATCH_SIZE, offset], |row| {
                    let last_decay: String = row.get(2)?;
                    Ok((
                        row.get::<_, String>(0)?,
                        row.get::<_, f64>(1)?,
                        DateTime::parse_from_rfc3339(&last_decay).unwrap_or_default().with_timezone(&Utc),
                        parse_dt(row.get(3)?),
                        row.get::<_, i64>(4)?,
                    ))
                })?;
                rows.collect::<rusqlite::Result<_>>()?
            };

            if batch.is_empty() {
                break;
            }

            let mut writer = self.writer.lock().map_err(|_| lock_err("writer"))?;
            let tx = writer.transaction()?;
            for (id, base_importance, last_decay_at, last_accessed_at, access_count) in &batch {
                let old_importance: f64 =
                    tx.query_row("SELECT current_importance FROM memory_units WHERE id = ?1", params![id], |r| r.get(0))?;
                let input = DecayInput {
                    base_importance: *base_importance,
                    last_decay_at: *last_decay_at,
                    last_accessed_at: *last_accessed_at,
                    access_count: *access_count,
                    now,
                };
                let output = decay::update_importance(&input, config);

                tx.execute(
                    "UPDATE memory_units SET current_importance = ?1, last_decay_at = ?2 WHERE id = ?3",
                    params![output.current_importance, now.to_rfc3339(), id],
                )?;

                if decay::is_material_change(old_importance, output.current_importance) {
                    tx.execute(
                        "INSERT INTO decay_log (memory_id, old_importance, new_importance, decay_factor, reinforcement, run_at)
                         VALUES (?1,?2,?3,?4,?5,?6)",
                        params![id, old_importance, output.current_importance, output.decay_factor, output.reinforcement, now.to_rfc3339()],
                    )?;
                    entries.push(DecayLogEntry {
                        memory_id: id.clone(),
                        old_importance,
                        new_importance: output.current_importance,
                        decay_factor: output.decay_factor,
                        reinforcement: output.reinforcement,
                        run_at: now,
                    });
                }
            }
            tx.commit()?;

            if batch.len() < BATCH_SIZE as usize {
                break;
            }
            offset += BATCH_SIZE;
        }

        Ok(entries)
    }

    /// Aggregate counters for `GET /stats`.
    pub fn get_stats(&self) -> Result<EngineStats> {
        let reader = self.reader.lock().map_err(|_| lock_err("reader"))?;

        let total_memories: i64 = reader.query_row("SELECT COUNT(*) FROM memory_units", [], |r| r.get(0))?;
        let active_memories: i64 = reader.query_row("SELECT COUNT(*) FROM memory_units WHERE is_active = 1", [], |r| r.get(0))?;
        let average_importance: f64 = reader
            .query_row("SELECT COALESCE(AVG(current_importance), 0.0) FROM memory_units WHERE is_active = 1", [], |r| r.get(0))?;
        let average_confidence: f64 = reader
            .query_row("SELECT COALESCE(AVG(confidence), 0.0) FROM memory_units WHERE is_active = 1", [], |r| r.get(0))?;
        let preference_count: i64 = reader.query_row("SELECT COUNT(*) FROM preferences WHERE is_active = 1", [], |r| r.get(0))?;
        let entity_count: i64 = reader.query_row("SELECT COUNT(*) FROM entities", [], |r| r.get(0))?;
        let relation_count: i64 = reader.query_row("SELECT COUNT(*) FROM relations", [], |r| r.get(0))?;
        let pending_contradiction_count: i64 =
            reader.query_row("SELECT COUNT(*) FROM contradictions WHERE resolution = 'pending'", [], |r| r.get(0))?;

        let mut tier_counts = std::collections::BTreeMap::new();
        let mut stmt = reader.prepare("SELECT tier, COUNT(*) FROM memory_units WHERE is_active = 1 GROUP BY tier")?;
        let rows = stmt.query_map([], |row| Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?)))?;
        for r in rows {
            let (tier, count) = r?;
            tier_counts.insert(tier, count);
        }

        Ok(EngineStats {
            total_memories,
            active_memories,
            tier_counts,
            average_importance,
            average_confidence,
            preference_count,
            entity_count,
            relation_count,
            pending_contradiction_count,
        })
    }
}
