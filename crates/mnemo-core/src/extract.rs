//! Deep-Extract Adapter (C9)
//!
//! Sanitizes and validates the JSON proposal returned by the external
//! extractor model before it reaches the write pipeline. The extractor is
//! untrusted input: every field is defaulted, coerced, or clamped rather than
//! trusted as-is.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::model::{StructuredFact, Temporal, Tier, Valence};

/// A sanitized preference proposal, ready for C7 to persist.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct PreferenceProposal {
    pub entity: String,
    pub valence: Valence,
    pub strength: f64,
}

/// The Memory Proposal produced by the extractor, after sanitization.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct MemoryProposal {
    pub should_write: bool,
    pub summary: String,
    pub tier: Tier,
    pub facts: Vec<String>,
    pub structured_facts: Vec<StructuredFact>,
    pub entities: Vec<String>,
    pub preferences: Vec<PreferenceProposal>,
    pub confidence: f64,
    pub importance: f64,
    pub related_to: Vec<String>,
    pub valid_from: Option<DateTime<Utc>>,
    pub valid_to: Option<DateTime<Utc>>,
}

/// Failure modes for sanitization/validation.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ExtractError {
    #[error("extractor response was not valid JSON: {0}")]
    InvalidJson(String),
    #[error("extractor response was not a JSON object")]
    NotAnObject,
    #[error("extraction failed after retry: {0}")]
    RetryExhausted(String),
}

pub type Result<T> = std::result::Result<T, ExtractError>;

/// Maximum temperature allowed for the extractor call.
pub const MAX_EXTRACTOR_TEMPERATURE: f64 = 0.1;

fn parse_date(value: &Value) -> Option<DateTime<Utc>> {
    value.as_str().and_then(|s| DateTime::parse_from_rfc3339(s).ok()).map(|dt| dt.with_timezone(&Utc))
}

fn coerce_text(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Object(map) => map
            .get("fact")
            .or_else(|| map.get("text"))
            .or_else(|| map.get("content"))
            .and_then(|v| v.as_str().map(|s| s.to_string()))
            .or_else(|| Some(value.to_string())),
        other => Some(other.to_string()),
    }
}

fn sanitize_facts(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(coerce_text).collect())
        .unwrap_or_default()
}

fn sanitize_structured_facts(value: Option<&Value>) -> Vec<StructuredFact> {
    value
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|item| {
                    let obj = item.as_object()?;
                    let subject = obj.get("subject")?.as_str()?.to_string();
                    let predicate = obj.get("predicate")?.as_str()?.to_string();
                    let object = obj.get("object")?.as_str()?.to_string();
                    let confidence = obj.get("confidence").and_then(Value::as_f64).unwrap_or(0.8).clamp(0.0, 1.0);
                    let temporal = obj
                        .get("temporal")
                        .and_then(Value::as_str)
                        .map(Temporal::parse)
                        .unwrap_or_default();
                    Some(StructuredFact { subject, predicate, object, confidence, temporal })
                })
                .collect()
        })
        .unwrap_or_default()
}

fn sanitize_entities(value: Option<&Value>) -> Vec<String> {
    value
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some(s.clone()),
                    Value::Object(map) => map.get("name").and_then(Value::as_str).map(|s| s.to_string()),
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

fn sanitize_preferences(value: Option<&Value>) -> Vec<PreferenceProposal> {
    value
        .and_then(Value::as_array)
        .map(|arr| {
            arr.iter()
                .filter_map(|item| {
                    let obj = item.as_object()?;
                    let entity = obj.get("entity").and_then(Value::as_str)?.to_string();
                    let valence = obj
                        .get("valence")
                        .and_then(Value::as_str)
                        .map(Valence::parse)
                        .unwrap_or(Valence::Neutral);
                    let strength = obj.get("strength").and_then(Value::as_f64).unwrap_or(0.5).clamp(0.0, 1.0);
                    Some(PreferenceProposal { entity, valence, strength })
                })
                .collect()
        })
        .unwrap_or_default()
}

/// Sanitize a raw extractor JSON object into a [`MemoryProposal`], applying
/// null-coalescing defaults, type coercion, and clamping. Never fails: an
/// unusable response becomes a proposal with `should_write = false`.
pub fn sanitize(raw: &Value) -> MemoryProposal {
    let obj = raw.as_object();

    let summary = obj
        .and_then(|o| o.get("summary"))
        .and_then(Value::as_str)
        .map(|s| s.to_string())
        .unwrap_or_default();

    let should_write = obj
        .and_then(|o| o.get("shouldWrite").or_else(|| o.get("should_write")))
        .and_then(Value::as_bool)
        .unwrap_or(!summary.trim().is_empty());

    let confidence = obj
        .and_then(|o| o.get("confidence"))
        .and_then(Value::as_f64)
        .unwrap_or(0.8)
        .clamp(0.0, 1.0);

    let importance = obj
        .and_then(|o| o.get("importance"))
        .and_then(Value::as_f64)
        .unwrap_or(5.0)
        .clamp(0.0, 10.0);

    let related_to = obj
        .and_then(|o| o.get("relatedTo").or_else(|| o.get("related_to")))
        .and_then(Value::as_array)
        .map(|arr| arr.iter().filter_map(|v| v.as_str().map(|s| s.to_string())).collect())
        .unwrap_or_default();

    let tier = obj
        .and_then(|o| o.get("tier"))
        .and_then(Value::as_str)
        .and_then(Tier::parse)
        .unwrap_or_default();

    let valid_from = obj.and_then(|o| o.get("validFrom").or_else(|| o.get("valid_from"))).and_then(parse_date);
    let valid_to = obj.and_then(|o| o.get("validTo").or_else(|| o.get("valid_to"))).and_then(parse_date);

    MemoryProposal {
        should_write,
        summary,
        tier,
        facts: sanitize_facts(obj.and_then(|o| o.get("facts"))),
        structured_facts: sanitize_structured_facts(obj.and_then(|o| o.get("structuredFacts").or_else(|| o.get("structured_facts")))),
        entities: sanitize_entities(obj.and_then(|o| o.get("entities"))),
        preferences: sanitize_preferences(obj.and_then(|o| o.get("preferences"))),
        confidence,
        importance,
        related_to,
        valid_from,
        valid_to,
    }
}

/// Parse raw extractor output text and sanitize it. Tolerates a response
/// wrapped in markdown code fences or preceded/followed by stray prose, the
/// same way the written-to-file teacher adapters do.
pub fn parse_extractor_response(raw_text: &str) -> Result<MemoryProposal> {
    let json_slice = extract_json_object(raw_text).ok_or_else(|| ExtractError::InvalidJson(raw_text.to_string()))?;
    let value: Value = serde_json::from_str(json_slice).map_err(|e| ExtractError::InvalidJson(e.to_string()))?;
    if !value.is_object() {
        return Err(ExtractError::NotAnObject);
    }
    Ok(sanitize(&value))
}

/// Find the first top-level `{...}` object in `text`, tolerating markdown
/// fences and surrounding commentary.
fn extract_json_object(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let mut depth = 0i32;
    for (offset, ch) in text[start..].char_indices() {
        match ch {
            '{' => depth += 1,
            '}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[start..start + offset + ch.len_utf8()]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Run the parse-then-sanitize flow with a single retry on failure, as
/// dictated by the orchestrator's "JSON only" reminder path. `call` performs
/// one extractor invocation and returns its raw text.
pub fn extract_with_retry<F>(mut call: F) -> Result<MemoryProposal>
where
    F: FnMut(bool) -> std::result::Result<String, String>,
{
    let first = call(false).map_err(ExtractError::InvalidJson)?;
    if let Ok(proposal) = parse_extractor_response(&first) {
        return Ok(proposal);
    }

    let retry = call(true).map_err(ExtractError::RetryExhausted)?;
    parse_extractor_response(&retry).map_err(|e| ExtractError::RetryExhausted(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn sanitize_parses_tier_and_defaults_to_observed_fact() {
        let with_tier = sanitize(&json!({ "summary": "x", "tier": "asserted_fact" }));
        assert_eq!(with_tier.tier, Tier::AssertedFact);

        let without_tier = sanitize(&json!({ "summary": "x" }));
        assert_eq!(without_tier.tier, Tier::ObservedFact);
    }

    #[test]
    fn sanitize_applies_null_coalescing_defaults() {
        let raw = json!({ "summary": "likes tea" });
        let p = sanitize(&raw);
        assert_eq!(p.confidence, 0.8);
        assert_eq!(p.importance, 5.0);
        assert!(p.should_write);
    }

    #[test]
    fn sanitize_coerces_object_facts_to_text() {
        let raw = json!({
            "summary": "x",
            "facts": [{ "fact": "likes tea" }, "plain fact"]
        });
        let p = sanitize(&raw);
        assert_eq!(p.facts, vec!["likes tea".to_string(), "plain fact".to_string()]);
    }

    #[test]
    fn sanitize_clamps_out_of_range_numbers() {
        let raw = json!({ "summary": "x", "confidence": 5.0, "importance": -3.0 });
        let p = sanitize(&raw);
        assert_eq!(p.confidence, 1.0);
        assert_eq!(p.importance, 0.0);
    }

    #[test]
    fn sanitize_defaults_should_write_false_on_empty_summary() {
        let raw = json!({ "summary": "" });
        assert!(!sanitize(&raw).should_write);
    }

    #[test]
    fn sanitize_drops_malformed_preferences() {
        let raw = json!({ "summary": "x", "preferences": [{ "entity": "tea", "valence": "positive", "strength": 0.7 }, { "valence": "positive" }] });
        let p = sanitize(&raw);
        assert_eq!(p.preferences.len(), 1);
    }

    #[test]
    fn parse_extractor_response_tolerates_markdown_fences() {
        let text = "Here you go:\n```json\n{\"summary\": \"likes tea\", \"shouldWrite\": true}\n```\nThanks!";
        let proposal = parse_extractor_response(text).unwrap();
        assert_eq!(proposal.summary, "likes tea");
        assert!(proposal.should_write);
    }

    #[test]
    fn extract_with_retry_succeeds_on_second_attempt() {
        let result = extract_with_retry(|is_retry| {
            if is_retry {
                Ok(r#"{"summary": "ok", "shouldWrite": true}"#.to_string())
            } else {
                Ok("not json at all".to_string())
            }
        });
        assert!(result.is_ok());
        assert_eq!(result.unwrap().summary, "ok");
    }

    #[test]
    fn extract_with_retry_surfaces_error_after_second_failure() {
        let result = extract_with_retry(|_| Ok("still not json".to_string()));
        assert!(matches!(result, Err(ExtractError::RetryExhausted(_))));
    }
}
