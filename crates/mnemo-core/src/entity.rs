//! Entity Resolver (C3)
//!
//! Canonicalizes surface mentions to entity identities, manages aliases, and
//! links entities to the memories that mention them.

use std::sync::OnceLock;

use regex::Regex;

use crate::model::EntityType;

/// How a mention was resolved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionSource {
    ExplicitLink,
    ExactMatch,
    AliasMatch,
    NewEntity,
    Unresolved,
}

/// Outcome of resolving a single mention.
#[derive(Debug, Clone)]
pub struct Resolved {
    pub canonical: Option<String>,
    pub entity_id: Option<String>,
    pub confidence: f64,
    pub source: ResolutionSource,
    /// Populated only when `source == NewEntity`: the inferred type for the
    /// caller to persist.
    pub inferred_type: Option<EntityType>,
}

/// A minimal view of an existing entity, as supplied by the storage layer,
/// sufficient for lookup without pulling in the full persisted row.
pub struct ExistingEntity<'a> {
    pub id: &'a str,
    pub canonical_name: &'a str,
    pub aliases: &'a [String],
}

/// An explicit `(mention, canonical)` link supplied by the extractor.
pub struct ExplicitLink<'a> {
    pub mention: &'a str,
    pub canonical: &'a str,
    pub entity_id: &'a str,
}

fn title_prefix() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| {
        Regex::new(r"(?i)^(mr|mrs|ms|dr|prof|sir|dame)\.?\s").expect("valid title regex")
    })
}

fn place_suffix() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| {
        Regex::new(r"(?i)\b(city|state|country|street|avenue|road)\b").expect("valid place regex")
    })
}

fn org_suffix() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| {
        Regex::new(r"(?i)\b(inc|corp|llc|ltd|company)\b").expect("valid org regex")
    })
}

/// Infer an [`EntityType`] from surface patterns in the mention text.
pub fn infer_type(mention: &str) -> EntityType {
    if title_prefix().is_match(mention) {
        EntityType::Person
    } else if place_suffix().is_match(mention) {
        EntityType::Place
    } else if org_suffix().is_match(mention) {
        EntityType::Organization
    } else {
        EntityType::Unknown
    }
}

/// Resolve `mention` against explicit links and existing entities, in the
/// lookup order specified: explicit link (0.95) -> case-folded canonical
/// match (1.0) -> case-folded alias match (0.9) -> new entity if the mention
/// starts uppercase (0.7) -> unresolved (0.0).
pub fn resolve(
    mention: &str,
    explicit_links: &[ExplicitLink<'_>],
    existing: &[ExistingEntity<'_>],
) -> Resolved {
    let folded = mention.to_lowercase();

    if let Some(link) = explicit_links.iter().find(|l| l.mention == mention) {
        return Resolved {
            canonical: Some(link.canonical.to_string()),
            entity_id: Some(link.entity_id.to_string()),
            confidence: 0.95,
            source: ResolutionSource::ExplicitLink,
            inferred_type: None,
        };
    }

    if let Some(entity) = existing
        .iter()
        .find(|e| e.canonical_name.to_lowercase() == folded)
    {
        return Resolved {
            canonical: Some(entity.canonical_name.to_string()),
            entity_id: Some(entity.id.to_string()),
            confidence: 1.0,
            source: ResolutionSource::ExactMatch,
            inferred_type: None,
        };
    }

    if let Some(entity) = existing
        .iter()
        .find(|e| e.aliases.iter().any(|a| a.to_lowercase() == folded))
    {
        return Resolved {
            canonical: Some(entity.canonical_name.to_string()),
            entity_id: Some(entity.id.to_string()),
            confidence: 0.9,
            source: ResolutionSource::AliasMatch,
            inferred_type: None,
        };
    }

    if mention.chars().next().is_some_and(|c| c.is_uppercase()) {
        return Resolved {
            canonical: Some(mention.to_string()),
            entity_id: None,
            confidence: 0.7,
            source: ResolutionSource::NewEntity,
            inferred_type: Some(infer_type(mention)),
        };
    }

    Resolved {
        canonical: None,
        entity_id: None,
        confidence: 0.0,
        source: ResolutionSource::Unresolved,
        inferred_type: None,
    }
}

/// Result of merging two entities' content, independent of which row survives
/// as the target. Used to assert merge commutativity (law L3).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergedContent {
    pub aliases: Vec<String>,
    pub memory_ids: Vec<String>,
}

/// Merge `source` into `target`: union aliases (including the source's own
/// canonical name as a new alias) and union `memory_ids`. The caller deletes
/// the source row atomically in the same transaction.
pub fn merge(
    target_canonical: &str,
    target_aliases: &[String],
    target_memory_ids: &[String],
    source_canonical: &str,
    source_aliases: &[String],
    source_memory_ids: &[String],
) -> MergedContent {
    let mut aliases: Vec<String> = target_aliases.to_vec();
    for a in source_aliases.iter().chain(std::iter::once(&source_canonical.to_string())) {
        if !aliases.iter().any(|x| x.eq_ignore_ascii_case(a)) && !a.eq_ignore_ascii_case(target_canonical) {
            aliases.push(a.clone());
        }
    }
    aliases.sort();

    let mut memory_ids: Vec<String> = target_memory_ids.to_vec();
    for id in source_memory_ids {
        if !memory_ids.contains(id) {
            memory_ids.push(id.clone());
        }
    }
    memory_ids.sort();

    MergedContent { aliases, memory_ids }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn explicit_link_wins_first() {
        let links = [ExplicitLink {
            mention: "Costa",
            canonical: "Costa Papadopoulos",
            entity_id: "e1",
        }];
        let r = resolve("Costa", &links, &[]);
        assert_eq!(r.source, ResolutionSource::ExplicitLink);
        assert_eq!(r.confidence, 0.95);
    }

    #[test]
    fn exact_case_folded_match() {
        let existing = [ExistingEntity {
            id: "e1",
            canonical_name: "Costa",
            aliases: &[],
        }];
        let r = resolve("costa", &[], &existing);
        assert_eq!(r.source, ResolutionSource::ExactMatch);
        assert_eq!(r.confidence, 1.0);
    }

    #[test]
    fn alias_match() {
        let aliases = vec!["Kostas".to_string()];
        let existing = [ExistingEntity {
            id: "e1",
            canonical_name: "Costa",
            aliases: &aliases,
        }];
        let r = resolve("kostas", &[], &existing);
        assert_eq!(r.source, ResolutionSource::AliasMatch);
        assert_eq!(r.confidence, 0.9);
    }

    #[test]
    fn uppercase_unmatched_mention_becomes_new_entity() {
        let r = resolve("Athens", &[], &[]);
        assert_eq!(r.source, ResolutionSource::NewEntity);
        assert_eq!(r.confidence, 0.7);
        assert_eq!(r.inferred_type, Some(EntityType::Place));
    }

    #[test]
    fn lowercase_unmatched_mention_is_unresolved() {
        let r = resolve("rock music", &[], &[]);
        assert_eq!(r.source, ResolutionSource::Unresolved);
        assert_eq!(r.confidence, 0.0);
    }

    #[test]
    fn infer_type_covers_all_families() {
        assert_eq!(infer_type("Dr. Smith"), EntityType::Person);
        assert_eq!(infer_type("Main Street"), EntityType::Place);
        assert_eq!(infer_type("Acme Corp"), EntityType::Organization);
        assert_eq!(infer_type("Bluebird"), EntityType::Unknown);
    }

    #[test]
    fn merge_is_commutative_on_content() {
        let ab = merge(
            "X",
            &["x-alias".to_string()],
            &["m1".to_string()],
            "Y",
            &["y-alias".to_string()],
            &["m2".to_string()],
        );
        let ba = merge(
            "Y",
            &["y-alias".to_string()],
            &["m2".to_string()],
            "X",
            &["x-alias".to_string()],
            &["m1".to_string()],
        );
        // Canonical target differs, but union content matches up to which
        // side's own name ends up as an alias vs. the surviving canonical.
        let mut ab_all: Vec<String> = ab.aliases.clone();
        ab_all.push("X".to_string());
        ab_all.sort();
        let mut ba_all: Vec<String> = ba.aliases.clone();
        ba_all.push("Y".to_string());
        ba_all.sort();
        assert_eq!(ab_all, ba_all);
        assert_eq!(ab.memory_ids, ba.memory_ids);
    }
}
