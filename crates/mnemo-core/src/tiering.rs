//! Belief Tiering (C2)
//!
//! Classifies a raw utterance into a [`Tier`] and initial confidence via
//! ordered pattern families (hedging, temporal, preference, assertion,
//! default). Centralized here rather than scattered per caller, per the
//! pattern-family design note.

use std::sync::OnceLock;

use regex::RegexSet;

use crate::model::Tier;

/// A classification result: the tier and its pre-`enforce` confidence.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Classification {
    pub tier: Tier,
    pub confidence: f64,
}

struct PatternFamily {
    set: RegexSet,
    tier: Tier,
    confidence: f64,
}

fn hedging() -> &'static PatternFamily {
    static CELL: OnceLock<PatternFamily> = OnceLock::new();
    CELL.get_or_init(|| PatternFamily {
        set: RegexSet::new([
            r"(?i)\bi think\b",
            r"(?i)\bmaybe\b",
            r"(?i)\bprobably\b",
            r"(?i)\bmight\b",
            r"(?i)\bnot sure\b",
            r"(?i)\bi guess\b",
            r"(?i)\bperhaps\b",
            r"(?i)\bseems like\b",
        ])
        .expect("hedging patterns are valid regexes"),
        tier: Tier::Hypothesis,
        confidence: 0.45,
    })
}

fn temporal() -> &'static PatternFamily {
    static CELL: OnceLock<PatternFamily> = OnceLock::new();
    CELL.get_or_init(|| PatternFamily {
        set: RegexSet::new([
            r"(?i)\bright now\b",
            r"(?i)\bcurrently\b",
            r"(?i)\bat the moment\b",
            r"(?i)\btoday\b",
            r"(?i)\bthis week\b",
            r"(?i)\btemporarily\b",
        ])
        .expect("temporal patterns are valid regexes"),
        tier: Tier::TemporaryContext,
        confidence: 0.40,
    })
}

fn preference() -> &'static PatternFamily {
    static CELL: OnceLock<PatternFamily> = OnceLock::new();
    CELL.get_or_init(|| PatternFamily {
        set: RegexSet::new([
            r"(?i)\bi (really )?(like|love|enjoy|prefer)\b",
            r"(?i)\bi (hate|dislike|can't stand)\b",
            r"(?i)\bi don't like\b",
            r"(?i)\bmy favorite\b",
            r"(?i)\bi'm (not )?a fan of\b",
        ])
        .expect("preference patterns are valid regexes"),
        tier: Tier::Preference,
        confidence: 0.80,
    })
}

fn assertion() -> &'static PatternFamily {
    static CELL: OnceLock<PatternFamily> = OnceLock::new();
    CELL.get_or_init(|| PatternFamily {
        set: RegexSet::new([
            r"(?i)\bi am\b",
            r"(?i)\bmy name is\b",
            r"(?i)\bi have\b",
            r"(?i)\bi work (at|for|as)\b",
            r"(?i)\bi live in\b",
            r"(?i)\bi'm from\b",
            r"(?i)\bi was born\b",
        ])
        .expect("assertion patterns are valid regexes"),
        tier: Tier::AssertedFact,
        confidence: 0.92,
    })
}

/// Classify `text` into a tier and confidence. First-match-wins across
/// families in the order hedging -> temporal -> preference -> assertion ->
/// default(observed_fact/0.80). Deterministic for identical input (law L1).
pub fn classify(text: &str) -> Classification {
    for family in [hedging(), temporal(), preference(), assertion()] {
        if family.set.is_match(text) {
            return Classification {
                tier: family.tier,
                confidence: family.confidence,
            };
        }
    }
    Classification {
        tier: Tier::ObservedFact,
        confidence: 0.80,
    }
}

/// Classify and clamp confidence into the resulting tier's band in one step.
pub fn classify_and_enforce(text: &str) -> Classification {
    let c = classify(text);
    Classification {
        tier: c.tier,
        confidence: c.tier.enforce(c.confidence),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hedged_utterance_is_hypothesis() {
        let c = classify("I think I'm from Greece");
        assert_eq!(c.tier, Tier::Hypothesis);
        assert!(c.confidence <= 0.50);
    }

    #[test]
    fn assertion_beats_default() {
        let c = classify("My name is Costa");
        assert_eq!(c.tier, Tier::AssertedFact);
        assert_eq!(c.confidence, 0.92);
    }

    #[test]
    fn preference_markers_classify_as_preference() {
        let c = classify("I really love rock music");
        assert_eq!(c.tier, Tier::Preference);
    }

    #[test]
    fn temporal_markers_classify_as_temporary_context() {
        let c = classify("I'm currently living out of a suitcase");
        assert_eq!(c.tier, Tier::TemporaryContext);
    }

    #[test]
    fn unmatched_text_defaults_to_observed_fact() {
        let c = classify("The meeting starts at 9am");
        assert_eq!(c.tier, Tier::ObservedFact);
        assert_eq!(c.confidence, 0.80);
    }

    #[test]
    fn hedging_takes_priority_over_assertion_markers() {
        // Contains both "i think" (hedging) and "i am" (assertion); hedging
        // is checked first so it must win.
        let c = classify("I think I am going to Greece next week");
        assert_eq!(c.tier, Tier::Hypothesis);
    }

    #[test]
    fn classify_is_deterministic() {
        let text = "I work as an engineer";
        assert_eq!(classify(text), classify(text));
    }

    #[test]
    fn classify_and_enforce_respects_tier_bounds() {
        let c = classify_and_enforce("I think I'm from Greece");
        let (floor, ceiling) = c.tier.bounds();
        assert!(c.confidence >= floor && c.confidence <= ceiling);
    }
}
