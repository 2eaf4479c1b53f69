//! Core data types for the belief-tiered memory model.
//!
//! Mirrors the shape persisted in `storage::sqlite`: memory units, preferences,
//! entities, relations and contradictions are independent rows joined by id,
//! never nested object graphs (memories and entities cross-reference each
//! other through `memory_ids`, which would otherwise be cyclic).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Confidence tier a memory is classified into.
///
/// Ordering matters: `tier_priority` below encodes the resolution hierarchy
/// used by contradiction handling, not the derive order of this enum.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum Tier {
    AssertedFact,
    ObservedFact,
    Preference,
    Hypothesis,
    TemporaryContext,
}

impl Tier {
    /// Inclusive confidence bounds for this tier.
    pub fn bounds(self) -> (f64, f64) {
        match self {
            Tier::AssertedFact => (0.90, 1.00),
            Tier::ObservedFact => (0.80, 1.00),
            Tier::Preference => (0.75, 1.00),
            Tier::Hypothesis => (0.30, 0.50),
            Tier::TemporaryContext => (0.40, 1.00),
        }
    }

    /// Clamp `confidence` into this tier's [floor, ceiling] band.
    pub fn enforce(self, confidence: f64) -> f64 {
        let (floor, ceiling) = self.bounds();
        confidence.clamp(floor, ceiling)
    }

    /// Resolution priority: higher wins when two tiers conflict.
    pub fn priority(self) -> u8 {
        match self {
            Tier::AssertedFact => 5,
            Tier::ObservedFact => 4,
            Tier::Preference => 3,
            Tier::Hypothesis => 2,
            Tier::TemporaryContext => 1,
        }
    }

    pub fn promotable_to(self) -> Option<Tier> {
        match self {
            Tier::AssertedFact => None,
            Tier::ObservedFact => Some(Tier::AssertedFact),
            Tier::Preference => Some(Tier::AssertedFact),
            Tier::Hypothesis => Some(Tier::ObservedFact),
            Tier::TemporaryContext => Some(Tier::ObservedFact),
        }
    }

    pub fn demotable_to(self) -> Option<Tier> {
        match self {
            Tier::AssertedFact => Some(Tier::ObservedFact),
            Tier::ObservedFact => Some(Tier::Hypothesis),
            Tier::Preference => Some(Tier::Hypothesis),
            Tier::Hypothesis => None,
            Tier::TemporaryContext => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Tier::AssertedFact => "asserted_fact",
            Tier::ObservedFact => "observed_fact",
            Tier::Preference => "preference",
            Tier::Hypothesis => "hypothesis",
            Tier::TemporaryContext => "temporary_context",
        }
    }

    pub fn parse(s: &str) -> Option<Tier> {
        match s {
            "asserted_fact" => Some(Tier::AssertedFact),
            "observed_fact" => Some(Tier::ObservedFact),
            "preference" => Some(Tier::Preference),
            "hypothesis" => Some(Tier::Hypothesis),
            "temporary_context" => Some(Tier::TemporaryContext),
            _ => None,
        }
    }
}

impl Default for Tier {
    fn default() -> Self {
        Tier::ObservedFact
    }
}

impl std::fmt::Display for Tier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Temporal qualifier on a structured fact.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "snake_case")]
pub enum Temporal {
    Current,
    Past,
    Future,
    #[default]
    Unknown,
}

impl Temporal {
    pub fn parse(s: &str) -> Temporal {
        match s {
            "current" => Temporal::Current,
            "past" => Temporal::Past,
            "future" => Temporal::Future,
            _ => Temporal::Unknown,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Temporal::Current => "current",
            Temporal::Past => "past",
            Temporal::Future => "future",
            Temporal::Unknown => "unknown",
        }
    }
}

/// A single `(subject, predicate, object)` triple extracted from an utterance.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct StructuredFact {
    pub subject: String,
    pub predicate: String,
    pub object: String,
    pub confidence: f64,
    #[serde(default)]
    pub temporal: Temporal,
}

/// The atomic stored belief (Memory Unit, `M` in the data model).
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MemoryUnit {
    pub id: String,
    pub created_at: DateTime<Utc>,

    pub summary: String,
    pub entities: Vec<String>,
    pub facts: Vec<String>,
    pub structured_facts: Vec<StructuredFact>,

    pub tier: Tier,
    pub confidence: f64,

    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,

    pub base_importance: f64,
    pub current_importance: f64,
    pub last_decay_at: DateTime<Utc>,

    pub access_count: i64,
    pub last_accessed_at: Option<DateTime<Utc>>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,

    pub is_active: bool,
    pub supersedes: Vec<String>,

    pub source_conversation_id: Option<String>,
}

impl MemoryUnit {
    /// `true` if the memory was valid (by its bi-temporal range) at `at`.
    pub fn is_valid_at(&self, at: DateTime<Utc>) -> bool {
        let after_start = self.valid_from.is_none_or(|from| at >= from);
        let before_end = self.valid_to.is_none_or(|until| at < until);
        after_start && before_end
    }

    /// `true` if the embedding's L2 norm is within [0.99, 1.01] (invariant I4).
    pub fn has_unit_embedding(&self) -> bool {
        match &self.embedding {
            Some(v) if !v.is_empty() => {
                let norm = v.iter().map(|x| (*x as f64).powi(2)).sum::<f64>().sqrt();
                (0.99..=1.01).contains(&norm)
            }
            _ => false,
        }
    }
}

/// Valence of a preference.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Valence {
    Positive,
    Negative,
    Neutral,
}

impl Valence {
    pub fn as_str(self) -> &'static str {
        match self {
            Valence::Positive => "positive",
            Valence::Negative => "negative",
            Valence::Neutral => "neutral",
        }
    }

    pub fn parse(s: &str) -> Valence {
        match s {
            "positive" => Valence::Positive,
            "negative" => Valence::Negative,
            _ => Valence::Neutral,
        }
    }
}

/// First-class preference record (`P` in the data model). Immutable on
/// content: updates insert a new row and retire the old one via
/// `superseded_by`.
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Preference {
    pub id: String,
    pub subject: String,
    pub entity: String,
    pub valence: Valence,
    pub strength: f64,
    pub context: Option<String>,
    pub confidence: f64,
    pub memory_id: Option<String>,
    pub is_active: bool,
    pub superseded_by: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Inferred surface type of an entity.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum EntityType {
    Person,
    Place,
    Organization,
    Unknown,
}

impl EntityType {
    pub fn as_str(self) -> &'static str {
        match self {
            EntityType::Person => "person",
            EntityType::Place => "place",
            EntityType::Organization => "organization",
            EntityType::Unknown => "unknown",
        }
    }

    pub fn parse(s: &str) -> EntityType {
        match s {
            "person" => EntityType::Person,
            "place" => EntityType::Place,
            "organization" => EntityType::Organization,
            _ => EntityType::Unknown,
        }
    }
}

/// Canonical entity identity (`E` in the data model).
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Entity {
    pub id: String,
    pub canonical_name: String,
    pub aliases: Vec<String>,
    pub entity_type: EntityType,
    pub confidence: f64,
    pub confirmed: bool,
    pub memory_ids: Vec<String>,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
}

/// Directed edge between two memories (`R` in the data model).
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Relation {
    pub source_id: String,
    pub target_id: String,
    pub relation_type: String,
    pub weight: f64,
    pub bidirectional: bool,
}

/// Resolution outcome for a contradiction between two memories.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Resolution {
    Pending,
    ASupersedes,
    BSupersedes,
    Coexist,
    Merged,
    UserResolved,
}

impl Resolution {
    pub fn as_str(self) -> &'static str {
        match self {
            Resolution::Pending => "pending",
            Resolution::ASupersedes => "a_supersedes",
            Resolution::BSupersedes => "b_supersedes",
            Resolution::Coexist => "coexist",
            Resolution::Merged => "merged",
            Resolution::UserResolved => "user_resolved",
        }
    }

    pub fn parse(s: &str) -> Option<Resolution> {
        match s {
            "pending" => Some(Resolution::Pending),
            "a_supersedes" => Some(Resolution::ASupersedes),
            "b_supersedes" => Some(Resolution::BSupersedes),
            "coexist" => Some(Resolution::Coexist),
            "merged" => Some(Resolution::Merged),
            "user_resolved" => Some(Resolution::UserResolved),
            _ => None,
        }
    }
}

/// A detected (or manually recorded) conflict between two memories (`X`).
#[non_exhaustive]
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Contradiction {
    pub id: String,
    pub memory_a: String,
    pub memory_b: String,
    pub field_path: String,
    pub reason: String,
    pub resolution: Resolution,
    pub resolution_note: Option<String>,
    pub detected_at: DateTime<Utc>,
    pub resolved_at: Option<DateTime<Utc>>,
}

/// Append-only audit record of a decay update.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DecayLogEntry {
    pub memory_id: String,
    pub old_importance: f64,
    pub new_importance: f64,
    pub decay_factor: f64,
    pub reinforcement: f64,
    pub run_at: DateTime<Utc>,
}

/// Aggregate counters returned by `GET /stats`.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct EngineStats {
    pub total_memories: i64,
    pub active_memories: i64,
    pub tier_counts: std::collections::BTreeMap<String, i64>,
    pub average_importance: f64,
    pub average_confidence: f64,
    pub preference_count: i64,
    pub entity_count: i64,
    pub relation_count: i64,
    pub pending_contradiction_count: i64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn tier_enforce_clamps_into_band() {
        assert_eq!(Tier::Hypothesis.enforce(0.9), 0.50);
        assert_eq!(Tier::Hypothesis.enforce(0.1), 0.30);
        assert_eq!(Tier::AssertedFact.enforce(0.95), 0.95);
    }

    #[test]
    fn enforce_is_idempotent() {
        for tier in [
            Tier::AssertedFact,
            Tier::ObservedFact,
            Tier::Preference,
            Tier::Hypothesis,
            Tier::TemporaryContext,
        ] {
            for raw in [0.0, 0.2, 0.45, 0.5, 0.8, 0.95, 1.0] {
                let once = tier.enforce(raw);
                let twice = tier.enforce(once);
                assert_eq!(once, twice, "enforce not idempotent for {tier:?} at {raw}");
            }
        }
    }

    #[test]
    fn tier_round_trip_through_str() {
        for tier in [
            Tier::AssertedFact,
            Tier::ObservedFact,
            Tier::Preference,
            Tier::Hypothesis,
            Tier::TemporaryContext,
        ] {
            assert_eq!(Tier::parse(tier.as_str()), Some(tier));
        }
    }

    #[test]
    fn memory_unit_valid_at_respects_bitemporal_range() {
        let now = Utc::now();
        let m = MemoryUnit {
            id: "m1".into(),
            created_at: now,
            summary: "x".into(),
            entities: vec![],
            facts: vec![],
            structured_facts: vec![],
            tier: Tier::ObservedFact,
            confidence: 0.8,
            valid_from: Some(now - chrono::Duration::days(1)),
            valid_to: Some(now + chrono::Duration::days(1)),
            base_importance: 5.0,
            current_importance: 5.0,
            last_decay_at: now,
            access_count: 0,
            last_accessed_at: None,
            embedding: Some(vec![1.0, 0.0, 0.0]),
            is_active: true,
            supersedes: vec![],
            source_conversation_id: None,
        };
        assert!(m.is_valid_at(now));
        assert!(!m.is_valid_at(now + chrono::Duration::days(2)));
        assert!(m.has_unit_embedding());
    }
}
