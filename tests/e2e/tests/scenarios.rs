//! End-to-end scenarios (S1-S6) against a real temp-file-backed `Storage`.

mod common;

use common::{days_from_now, insert_plain, TestDb};
use mnemo_core::decay::DecayConfig;
use mnemo_core::instant;
use mnemo_core::model::{Tier, Valence};
use mnemo_core::retrieval::RetrievalConfig;
use mnemo_core::{InsertProposal, PreferenceInput};

fn default_retrieval_config() -> RetrievalConfig {
    RetrievalConfig { k: 5, depth: 2, spread_decay: 0.5 }
}

/// S1 — name capture lands in the same turn, but only becomes retrievable on
/// a later turn (the snapshot for retrieval is taken before P0 commits).
#[test]
fn s1_name_capture_same_turn_then_later_retrieval() {
    let db = TestDb::new();

    let snapshot_before_p0 = db.retrieve("My name is Costa", &default_retrieval_config()).unwrap();

    let name = instant::extract_name("My name is Costa").expect("name pattern should match");
    assert_eq!(name.name, "Costa");
    assert_eq!(name.confidence, 0.95);

    let inserted = db
        .insert_memory_unit(InsertProposal {
            summary: format!("User's name is {}.", name.name),
            tier: Some(name.tier),
            confidence: Some(name.confidence),
            base_importance: name.importance,
            ..Default::default()
        })
        .unwrap();
    assert_eq!(inserted.tier, Tier::AssertedFact);
    assert_eq!(inserted.confidence, 0.95);
    assert!(!snapshot_before_p0.iter().any(|r| r.id == inserted.id));

    let next_turn = db.retrieve("Who am I?", &default_retrieval_config()).unwrap();
    assert!(next_turn.iter().any(|r| r.id == inserted.id), "name memory should surface on the next turn's retrieval");
}

/// S2 — a single "I love X and hate Y" utterance yields two active
/// preferences with valence and strength split correctly across the clause.
#[test]
fn s2_preference_pair_splits_by_valence() {
    let db = TestDb::new();
    let text = "I love rock music and hate country";

    let extracted = instant::extract_preferences(text);
    assert_eq!(extracted.len(), 2);

    for pref in &extracted {
        db.insert_memory_unit(InsertProposal {
            summary: format!(
                "User {} {}.",
                if pref.valence == Valence::Positive { "likes" } else { "dislikes" },
                pref.entity
            ),
            tier: Some(pref.tier),
            confidence: Some(pref.confidence),
            base_importance: pref.importance,
            preferences: vec![PreferenceInput {
                subject: "user".to_string(),
                entity: pref.entity.clone(),
                valence: pref.valence,
                strength: pref.strength,
                context: None,
                confidence: pref.confidence,
            }],
            ..Default::default()
        })
        .unwrap();
    }

    let preferences = db.get_user_preferences().unwrap();
    let rock = preferences.iter().find(|p| p.entity.eq_ignore_ascii_case("rock music")).expect("rock music preference");
    assert_eq!(rock.valence, Valence::Positive);
    assert!(rock.strength >= 0.85);

    let country = preferences.iter().find(|p| p.entity.eq_ignore_ascii_case("country")).expect("country preference");
    assert_eq!(country.valence, Valence::Negative);
    assert!(country.strength >= 0.7);
}

/// S3 — a later name assertion supersedes and deactivates the earlier one.
#[test]
fn s3_identity_contradiction_supersedes_previous_name() {
    let db = TestDb::new();

    let costa = db
        .insert_memory_unit(InsertProposal { summary: "My name is Costa".to_string(), ..Default::default() })
        .unwrap();
    assert!(costa.is_active);

    let alex = db
        .insert_memory_unit(InsertProposal { summary: "Actually, my name is Alex".to_string(), ..Default::default() })
        .unwrap();

    let costa_after = db.get_memory(&costa.id).unwrap().expect("costa memory should still exist");
    assert!(!costa_after.is_active, "superseded identity memory must deactivate");

    assert!(alex.is_active);
    assert!(alex.supersedes.contains(&costa.id));

    let pending = db.get_pending_contradictions().unwrap();
    assert!(pending.is_empty(), "auto-resolved identity conflicts leave no pending row");
}

/// S4 — decay without reinforcement, and decay with access-based
/// reinforcement, each matching the closed-form values in the scenario. Each
/// case runs against its own freshly created memory, 14 simulated days out
/// from `last_decay_at` (which `run_decay_sweep` sets at insertion time).
#[test]
fn s4_decay_without_access_matches_closed_form() {
    let db = TestDb::new();
    let id = insert_plain(&db, "A fact with slow decay", 5.0);
    let config = DecayConfig { lambda: 0.05, beta: 0.3, floor: 1.0 };

    db.run_decay_sweep(&config, days_from_now(14)).unwrap();
    let after = db.get_memory(&id).unwrap().unwrap();
    assert!((after.current_importance - 2.48).abs() < 0.05, "{}", after.current_importance);
    assert!(after.current_importance >= config.floor);
}

#[test]
fn s4_decay_with_recent_access_adds_reinforcement() {
    let db = TestDb::new();
    let id = insert_plain(&db, "A fact with recent access", 5.0);
    let config = DecayConfig { lambda: 0.05, beta: 0.3, floor: 1.0 };

    for _ in 0..5 {
        db.reinforce_memories(&[id.clone()], days_from_now(13)).unwrap();
    }

    db.run_decay_sweep(&config, days_from_now(14)).unwrap();
    let after = db.get_memory(&id).unwrap().unwrap();
    assert_eq!(after.access_count, 5);
    assert!((after.current_importance - 3.77).abs() < 0.1, "{}", after.current_importance);
}

/// S6 — a hedged utterance classifies as a low-confidence hypothesis.
#[test]
fn s6_hedged_utterance_is_low_confidence_hypothesis() {
    let db = TestDb::new();
    let inserted = db
        .insert_memory_unit(InsertProposal { summary: "I think I'm from Greece".to_string(), ..Default::default() })
        .unwrap();

    assert_eq!(inserted.tier, Tier::Hypothesis);
    assert!(inserted.confidence <= 0.50);
}
