//! Contradiction Detector (C6)
//!
//! Two-pass conflict detection run before a memory is inserted (identity
//! guard, then semantic conflict over nearby memories), followed by an
//! ordered resolution-rule dispatch.

use std::sync::OnceLock;

use regex::Regex;

use crate::embedder::cosine_similarity;
use crate::model::{Resolution, StructuredFact, Temporal, Tier};

/// Stopwords excluded from name extraction so "the user is asking" etc.
/// don't get misread as an identity assertion.
const NAME_STOPWORDS: &[&str] = &["user", "asking", "the", "a", "an", "here", "there"];

fn name_patterns() -> &'static Vec<Regex> {
    static CELL: OnceLock<Vec<Regex>> = OnceLock::new();
    CELL.get_or_init(|| {
        [
            r"(?i)\buser'?s name is ([A-Z][a-z]+)",
            r"(?i)\bmy name is ([A-Z][a-z]+)",
            r"(?i)\bi am ([A-Z][a-z]+)\b",
            r"(?i)\bcall me ([A-Z][a-z]+)",
            r"(?i)\b([A-Z][a-z]+) introduces\b",
        ]
        .iter()
        .map(|p| Regex::new(p).expect("valid name-extraction regex"))
        .collect()
    })
}

/// Extract an asserted identity name from free text, in pattern-family
/// order, rejecting stopword matches.
pub fn extract_user_name(text: &str) -> Option<String> {
    for re in name_patterns() {
        if let Some(caps) = re.captures(text) {
            let name = caps.get(1)?.as_str();
            if !NAME_STOPWORDS.contains(&name.to_lowercase().as_str()) {
                return Some(name.to_string());
            }
        }
    }
    None
}

/// Minimal view of an existing memory sufficient for contradiction checks.
pub struct ExistingMemory<'a> {
    pub id: &'a str,
    pub summary: &'a str,
    pub facts: &'a [String],
    pub structured_facts: &'a [StructuredFact],
    pub entities: &'a [String],
    pub embedding: &'a [f32],
    pub tier: Tier,
    pub confidence: f64,
}

/// The kind of conflict detected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConflictType {
    IdentityConflict,
    FactConflict,
    PotentialUpdate,
}

/// A single detected conflict between the proposed memory and an existing one.
#[derive(Debug, Clone)]
pub struct Conflict {
    pub conflict_type: ConflictType,
    pub existing_id: String,
    pub field_path: String,
    pub reason: String,
    pub similarity: f64,
    pub suggested_resolution: Resolution,
}

/// Similarity threshold for Pass B candidate selection.
pub const SEMANTIC_CANDIDATE_THRESHOLD: f32 = 0.75;
/// Similarity threshold above which differing summaries count as a potential update.
pub const POTENTIAL_UPDATE_THRESHOLD: f32 = 0.85;
/// Max existing memories considered by the identity guard.
pub const IDENTITY_GUARD_WINDOW: usize = 5;
/// Max semantic candidates considered by Pass B.
pub const SEMANTIC_CANDIDATE_LIMIT: usize = 10;

/// Pass A: look for an existing asserted identity that conflicts with the
/// name (if any) found in the new utterance.
pub fn detect_identity_conflict(new_text: &str, existing: &[ExistingMemory<'_>]) -> Option<Conflict> {
    let new_name = extract_user_name(new_text)?;

    for mem in existing.iter().take(IDENTITY_GUARD_WINDOW) {
        let mentions_identity = mem.summary.to_lowercase().contains("name is")
            || mem.summary.to_lowercase().contains("i am")
            || mem.summary.to_lowercase().contains("introduces")
            || mem
                .facts
                .iter()
                .any(|f| f.to_lowercase().contains("name is") || f.to_lowercase().contains("i am"));
        if !mentions_identity {
            continue;
        }
        if let Some(existing_name) = extract_user_name(mem.summary) {
            if !existing_name.eq_ignore_ascii_case(&new_name) {
                return Some(Conflict {
                    conflict_type: ConflictType::IdentityConflict,
                    existing_id: mem.id.to_string(),
                    field_path: "user_name".to_string(),
                    reason: format!("existing name '{existing_name}' conflicts with new name '{new_name}'"),
                    similarity: 0.95,
                    suggested_resolution: Resolution::ASupersedes,
                });
            }
        }
    }
    None
}

/// Pass B: fact-level and summary-level conflicts against nearby memories
/// already filtered to `cosine(new_embedding, candidate.embedding) > threshold`.
pub fn detect_semantic_conflicts(
    new_summary: &str,
    new_structured_facts: &[StructuredFact],
    new_entities: &[String],
    new_embedding: &[f32],
    existing: &[ExistingMemory<'_>],
) -> Vec<Conflict> {
    let mut scored: Vec<(&ExistingMemory<'_>, f32)> = existing
        .iter()
        .map(|m| (m, cosine_similarity(new_embedding, m.embedding)))
        .filter(|(_, sim)| *sim > SEMANTIC_CANDIDATE_THRESHOLD)
        .collect();
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    scored.truncate(SEMANTIC_CANDIDATE_LIMIT);

    let mut conflicts = Vec::new();
    for (mem, sim) in &scored {
        for new_fact in new_structured_facts {
            for old_fact in mem.structured_facts {
                if new_fact.subject.eq_ignore_ascii_case(&old_fact.subject)
                    && new_fact.predicate.eq_ignore_ascii_case(&old_fact.predicate)
                    && !new_fact.object.eq_ignore_ascii_case(&old_fact.object)
                {
                    conflicts.push(Conflict {
                        conflict_type: ConflictType::FactConflict,
                        existing_id: mem.id.to_string(),
                        field_path: format!("{}.{}", new_fact.subject, new_fact.predicate),
                        reason: format!(
                            "'{}' was '{}', now asserted as '{}'",
                            old_fact.predicate, old_fact.object, new_fact.object
                        ),
                        similarity: *sim as f64,
                        suggested_resolution: Resolution::Pending,
                    });
                }
            }
        }

        let entities_overlap = new_entities.iter().any(|e| mem.entities.contains(e));
        if entities_overlap && *sim > POTENTIAL_UPDATE_THRESHOLD && mem.summary != new_summary {
            conflicts.push(Conflict {
                conflict_type: ConflictType::PotentialUpdate,
                existing_id: mem.id.to_string(),
                field_path: "summary".to_string(),
                reason: "overlapping entities with a highly similar but distinct summary".to_string(),
                similarity: *sim as f64,
                suggested_resolution: Resolution::Pending,
            });
        }
    }
    conflicts
}

/// Inputs to resolution-rule selection for a single conflict.
pub struct ResolutionContext {
    pub new_temporal: Temporal,
    pub existing_temporal: Temporal,
    pub new_tier: Tier,
    pub existing_tier: Tier,
    pub new_confidence: f64,
    pub existing_confidence: f64,
}

/// Confidence gap above which the higher-confidence side wins outright.
pub const CONFIDENCE_GAP_THRESHOLD: f64 = 0.2;

/// Apply the ordered resolution rules: temporal supersession, then tier
/// hierarchy, then confidence gap, defaulting to `pending`/coexist.
pub fn select_resolution(ctx: &ResolutionContext) -> Resolution {
    if ctx.new_temporal == Temporal::Current && ctx.existing_temporal == Temporal::Past {
        return Resolution::ASupersedes;
    }

    if ctx.new_tier.priority() != ctx.existing_tier.priority() {
        return if ctx.new_tier.priority() > ctx.existing_tier.priority() {
            Resolution::ASupersedes
        } else {
            Resolution::BSupersedes
        };
    }

    let gap = ctx.new_confidence - ctx.existing_confidence;
    if gap.abs() > CONFIDENCE_GAP_THRESHOLD {
        return if gap > 0.0 { Resolution::ASupersedes } else { Resolution::BSupersedes };
    }

    Resolution::Pending
}

/// Apply a manual resolution decision, returning the side effects the store
/// must apply: which memory id (if any) gets deactivated and appended to the
/// other's `supersedes`, plus the resolved-at stamp the caller should record.
pub struct ResolutionEffect {
    pub deactivate_id: Option<String>,
    pub supersedes_append_to: Option<String>,
}

/// Compute the side effects of resolving one conflict, given the ids of the
/// new memory (`memory_a`) and the existing one it conflicted with
/// (`memory_b`).
pub fn resolve(memory_a: &str, memory_b: &str, resolution: Resolution) -> ResolutionEffect {
    match resolution {
        Resolution::ASupersedes => ResolutionEffect {
            deactivate_id: Some(memory_b.to_string()),
            supersedes_append_to: Some(memory_a.to_string()),
        },
        Resolution::BSupersedes => ResolutionEffect {
            deactivate_id: Some(memory_a.to_string()),
            supersedes_append_to: Some(memory_b.to_string()),
        },
        _ => ResolutionEffect {
            deactivate_id: None,
            supersedes_append_to: None,
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fact(subject: &str, predicate: &str, object: &str) -> StructuredFact {
        StructuredFact {
            subject: subject.to_string(),
            predicate: predicate.to_string(),
            object: object.to_string(),
            confidence: 0.9,
            temporal: Temporal::Current,
        }
    }

    #[test]
    fn extract_user_name_rejects_stopwords() {
        assert_eq!(extract_user_name("i am here"), None);
        assert_eq!(extract_user_name("my name is Costa"), Some("Costa".to_string()));
    }

    #[test]
    fn identity_conflict_flags_differing_names_matches_scenario_s3() {
        let existing = [ExistingMemory {
            id: "m1",
            summary: "the user's name is Alex",
            facts: &[],
            structured_facts: &[],
            entities: &[],
            embedding: &[],
            tier: Tier::AssertedFact,
            confidence: 0.95,
        }];
        let conflict = detect_identity_conflict("my name is Costa", &existing).expect("conflict");
        assert_eq!(conflict.conflict_type, ConflictType::IdentityConflict);
        assert_eq!(conflict.suggested_resolution, Resolution::ASupersedes);
        assert!((conflict.similarity - 0.95).abs() < 1e-9);
    }

    #[test]
    fn identity_guard_ignores_matching_name() {
        let existing = [ExistingMemory {
            id: "m1",
            summary: "my name is Costa",
            facts: &[],
            structured_facts: &[],
            entities: &[],
            embedding: &[],
            tier: Tier::AssertedFact,
            confidence: 0.95,
        }];
        assert!(detect_identity_conflict("my name is Costa", &existing).is_none());
    }

    #[test]
    fn fact_conflict_detected_on_same_subject_predicate_differing_object() {
        let existing = [ExistingMemory {
            id: "m1",
            summary: "lives in Athens",
            facts: &[],
            structured_facts: &[fact("Costa", "livesIn", "Athens")],
            entities: &["Costa".into()],
            embedding: &[1.0, 0.0],
            tier: Tier::ObservedFact,
            confidence: 0.8,
        }];
        let new_facts = [fact("Costa", "livesIn", "Berlin")];
        let conflicts = detect_semantic_conflicts(
            "lives in Berlin",
            &new_facts,
            &["Costa".to_string()],
            &[0.99, 0.01],
            &existing,
        );
        assert!(conflicts.iter().any(|c| c.conflict_type == ConflictType::FactConflict));
    }

    #[test]
    fn resolution_prefers_temporal_current_over_past() {
        let ctx = ResolutionContext {
            new_temporal: Temporal::Current,
            existing_temporal: Temporal::Past,
            new_tier: Tier::ObservedFact,
            existing_tier: Tier::ObservedFact,
            new_confidence: 0.8,
            existing_confidence: 0.8,
        };
        assert_eq!(select_resolution(&ctx), Resolution::ASupersedes);
    }

    #[test]
    fn resolution_falls_back_to_tier_priority() {
        let ctx = ResolutionContext {
            new_temporal: Temporal::Unknown,
            existing_temporal: Temporal::Unknown,
            new_tier: Tier::AssertedFact,
            existing_tier: Tier::Hypothesis,
            new_confidence: 0.8,
            existing_confidence: 0.8,
        };
        assert_eq!(select_resolution(&ctx), Resolution::ASupersedes);
    }

    #[test]
    fn resolution_falls_back_to_confidence_gap_then_pending() {
        let big_gap = ResolutionContext {
            new_temporal: Temporal::Unknown,
            existing_temporal: Temporal::Unknown,
            new_tier: Tier::ObservedFact,
            existing_tier: Tier::ObservedFact,
            new_confidence: 0.95,
            existing_confidence: 0.6,
        };
        assert_eq!(select_resolution(&big_gap), Resolution::ASupersedes);

        let small_gap = ResolutionContext {
            new_temporal: Temporal::Unknown,
            existing_temporal: Temporal::Unknown,
            new_tier: Tier::ObservedFact,
            existing_tier: Tier::ObservedFact,
            new_confidence: 0.82,
            existing_confidence: 0.80,
        };
        assert_eq!(select_resolution(&small_gap), Resolution::Pending);
    }

    #[test]
    fn resolve_produces_expected_side_effects() {
        let effect = resolve("new", "old", Resolution::ASupersedes);
        assert_eq!(effect.deactivate_id, Some("old".to_string()));
        assert_eq!(effect.supersedes_append_to, Some("new".to_string()));

        let pending = resolve("new", "old", Resolution::Pending);
        assert_eq!(pending.deactivate_id, None);
    }
}
