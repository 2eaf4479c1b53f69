//! Instant Extractor (C8)
//!
//! Regex-only extraction run synchronously on the raw user turn, before any
//! LLM call, so identity and preference statements land before the same
//! turn's retrieval (see the orchestrator's P0 step).

use std::sync::OnceLock;

use regex::Regex;

use crate::model::{Tier, Valence};

/// Names rejected even though they match the capitalized-word shape.
const NAME_REJECT: &[&str] = &["here", "there", "fine", "good", "great", "okay"];

struct NamePattern {
    re: Regex,
}

fn name_patterns() -> &'static Vec<NamePattern> {
    static CELL: OnceLock<Vec<NamePattern>> = OnceLock::new();
    CELL.get_or_init(|| {
        [
            r"(?i)\bmy name is ([A-Z][a-z]+)\b",
            r"(?i)\bi am ([A-Z][a-z]+)\b",
            r"(?i)\bi'm ([A-Z][a-z]+)\b",
            r"(?i)\bcall me ([A-Z][a-z]+)\b",
            r"(?i)\bthis is ([A-Z][a-z]+)\s+(?:speaking|here)\b",
        ]
        .iter()
        .map(|p| NamePattern { re: Regex::new(p).expect("valid name pattern") })
        .collect()
    })
}

/// An instant name-assertion memory, queued for insertion before retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct InstantName {
    pub name: String,
    pub tier: Tier,
    pub confidence: f64,
    pub importance: f64,
}

/// Confidence assigned to a name capture.
pub const NAME_CONFIDENCE: f64 = 0.95;
/// Initial importance assigned to a name capture.
pub const NAME_IMPORTANCE: f64 = 8.0;

/// Extract a name assertion from raw text, first pattern family that matches
/// wins. Rejects matches against [`NAME_REJECT`].
pub fn extract_name(text: &str) -> Option<InstantName> {
    for pattern in name_patterns() {
        if let Some(caps) = pattern.re.captures(text) {
            let name = caps.get(1)?.as_str();
            if NAME_REJECT.contains(&name.to_lowercase().as_str()) {
                continue;
            }
            return Some(InstantName {
                name: name.to_string(),
                tier: Tier::AssertedFact,
                confidence: NAME_CONFIDENCE,
                importance: NAME_IMPORTANCE,
            });
        }
    }
    None
}

struct PreferencePattern {
    re: Regex,
    valence: Valence,
    strength: f64,
}

fn preference_patterns() -> &'static Vec<PreferencePattern> {
    static CELL: OnceLock<Vec<PreferencePattern>> = OnceLock::new();
    CELL.get_or_init(|| {
        vec![
            PreferencePattern {
                re: Regex::new(r"(?i)\bi (?:really )?(?:love|adore) (.+)").unwrap(),
                valence: Valence::Positive,
                strength: 0.9,
            },
            PreferencePattern {
                re: Regex::new(r"(?i)\bi (?:like|enjoy|prefer) (.+)").unwrap(),
                valence: Valence::Positive,
                strength: 0.7,
            },
            PreferencePattern {
                re: Regex::new(r"(?i)\bi (?:really )?(?:hate|despise|can't stand) (.+)").unwrap(),
                valence: Valence::Negative,
                strength: 0.9,
            },
            PreferencePattern {
                re: Regex::new(r"(?i)\bi (?:don't like|dislike) (.+)").unwrap(),
                valence: Valence::Negative,
                strength: 0.7,
            },
            PreferencePattern {
                re: Regex::new(r"(?i)\bmy favorite (?:is|are) (.+)").unwrap(),
                valence: Valence::Positive,
                strength: 0.85,
            },
        ]
    })
}

/// An instant preference memory, queued for insertion before retrieval.
#[derive(Debug, Clone, PartialEq)]
pub struct InstantPreference {
    pub entity: String,
    pub valence: Valence,
    pub strength: f64,
    pub tier: Tier,
    pub confidence: f64,
    pub importance: f64,
}

/// Confidence assigned to an instant preference capture.
pub const PREFERENCE_CONFIDENCE: f64 = 0.85;
/// Initial importance assigned to an instant preference capture.
pub const PREFERENCE_IMPORTANCE: f64 = 6.0;

fn and_split_pattern() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"(?i)\s+and\s+").expect("valid and-split pattern"))
}

fn starts_with_subject(clause: &str) -> bool {
    let lower = clause.trim_start().to_lowercase();
    lower == "i" || lower.starts_with("i ") || lower.starts_with("i'")
}

/// Split raw text into clauses on standalone "and". English drops a repeated
/// subject across coordinated clauses ("I love X and hate Y" = "I love X and
/// [I] hate Y"), so a continuation clause without its own subject has "i"
/// reattached before pattern matching.
fn split_clauses(text: &str) -> Vec<String> {
    and_split_pattern()
        .split(text)
        .enumerate()
        .filter_map(|(i, raw)| {
            let clause = raw.trim_end_matches(['.', '!', '?', ',']).trim();
            if clause.is_empty() {
                return None;
            }
            if i == 0 || starts_with_subject(clause) {
                Some(clause.to_string())
            } else {
                Some(format!("i {clause}"))
            }
        })
        .collect()
}

fn make_preference(entity: String, valence: Valence, strength: f64) -> InstantPreference {
    InstantPreference {
        entity,
        valence,
        strength,
        tier: Tier::Preference,
        confidence: PREFERENCE_CONFIDENCE,
        importance: PREFERENCE_IMPORTANCE,
    }
}

/// Extract zero, one, or two instant preferences from raw text. Each clause
/// (split on standalone "and") contributes at most one preference, first
/// pattern family to match wins. A second negative preference is emitted when
/// a later clause is a distinct hate/dislike clause.
pub fn extract_preferences(text: &str) -> Vec<InstantPreference> {
    let mut out = Vec::new();
    let mut matched_negative = false;

    for clause in split_clauses(text) {
        for pattern in preference_patterns() {
            let Some(caps) = pattern.re.captures(&clause) else { continue };
            let entity = caps.get(1).map(|m| m.as_str().trim_end_matches(['.', '!', '?', ',']).trim()).unwrap_or("");
            if entity.is_empty() {
                continue;
            }
            if pattern.valence == Valence::Negative {
                if matched_negative {
                    continue;
                }
                matched_negative = true;
            }
            out.push(make_preference(entity.to_string(), pattern.valence, pattern.strength));
            break;
        }
        if out.len() >= 2 {
            break;
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extracts_name_from_each_pattern_family() {
        assert_eq!(extract_name("my name is Costa").unwrap().name, "Costa");
        assert_eq!(extract_name("i am Alex").unwrap().name, "Alex");
        assert_eq!(extract_name("i'm Maria").unwrap().name, "Maria");
        assert_eq!(extract_name("call me Jo").unwrap().name, "Jo");
        assert_eq!(extract_name("this is Sam speaking").unwrap().name, "Sam");
    }

    #[test]
    fn rejects_non_name_captures() {
        assert!(extract_name("i am here").is_none());
        assert!(extract_name("i am fine").is_none());
    }

    #[test]
    fn name_capture_carries_expected_metadata() {
        let n = extract_name("my name is Costa").unwrap();
        assert_eq!(n.tier, Tier::AssertedFact);
        assert_eq!(n.confidence, NAME_CONFIDENCE);
        assert_eq!(n.importance, NAME_IMPORTANCE);
    }

    #[test]
    fn preference_truncates_at_first_and_clause() {
        let prefs = extract_preferences("i love rock music and jazz too");
        assert_eq!(prefs[0].entity, "rock music");
    }

    #[test]
    fn preference_strength_and_valence_per_family() {
        let p = extract_preferences("i really love hiking").remove(0);
        assert_eq!(p.valence, Valence::Positive);
        assert_eq!(p.strength, 0.9);

        let p = extract_preferences("i like tea").remove(0);
        assert_eq!(p.strength, 0.7);

        let p = extract_preferences("i hate mondays").remove(0);
        assert_eq!(p.valence, Valence::Negative);
        assert_eq!(p.strength, 0.9);
    }

    #[test]
    fn no_preference_match_returns_empty() {
        assert!(extract_preferences("the weather is nice today").is_empty());
    }

    #[test]
    fn preference_capture_carries_expected_metadata() {
        let p = extract_preferences("i like tea").remove(0);
        assert_eq!(p.tier, Tier::Preference);
        assert_eq!(p.confidence, PREFERENCE_CONFIDENCE);
        assert_eq!(p.importance, PREFERENCE_IMPORTANCE);
    }
}
