//! Decay Service (C4)
//!
//! Per-memory importance under exponential decay with access-based
//! reinforcement, plus the archival policy applied by the periodic sweep.

use chrono::{DateTime, Utc};

/// Tunables for the decay formula (defaults per the environment table).
#[derive(Debug, Clone, Copy)]
pub struct DecayConfig {
    pub lambda: f64,
    pub beta: f64,
    pub floor: f64,
}

impl Default for DecayConfig {
    fn default() -> Self {
        Self {
            lambda: 0.05,
            beta: 0.3,
            floor: 1.0,
        }
    }
}

/// Inputs to a single-memory importance update.
pub struct DecayInput {
    pub base_importance: f64,
    pub last_decay_at: DateTime<Utc>,
    pub last_accessed_at: Option<DateTime<Utc>>,
    pub access_count: i64,
    pub now: DateTime<Utc>,
}

/// Result of a single-memory importance update.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DecayOutput {
    pub current_importance: f64,
    pub decay_factor: f64,
    pub reinforcement: f64,
}

/// Apply the decay + reinforcement formula (§4.4) to one memory.
pub fn update_importance(input: &DecayInput, config: &DecayConfig) -> DecayOutput {
    let days_decay = (input.now - input.last_decay_at).num_milliseconds() as f64 / 86_400_000.0;
    let decay_factor = (-config.lambda * days_decay).exp();
    let decayed = input.base_importance * decay_factor;

    let reinforcement = match input.last_accessed_at {
        Some(last) => {
            let days_access = (input.now - last).num_milliseconds() as f64 / 86_400_000.0;
            if days_access < 7.0 {
                config.beta * (input.access_count.min(10) as f64) * (1.0 - days_access / 7.0)
            } else {
                0.0
            }
        }
        None => 0.0,
    };

    let current_importance = (decayed + reinforcement).max(config.floor);

    DecayOutput {
        current_importance,
        decay_factor,
        reinforcement,
    }
}

/// `true` if the change between `old` and `new` importance is worth an audit
/// entry (avoids flooding the decay log with negligible float noise).
pub fn is_material_change(old: f64, new: f64) -> bool {
    (old - new).abs() > 1e-6
}

/// Archival policy: a memory qualifies for deactivation once its importance
/// has fallen below the threshold and it has aged past the minimum.
pub fn should_archive(current_importance: f64, age_days: f64) -> bool {
    current_importance < 1.5 && age_days > 90.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    #[test]
    fn decay_without_access_matches_scenario_s4() {
        let now = Utc::now();
        let input = DecayInput {
            base_importance: 5.0,
            last_decay_at: now - Duration::days(14),
            last_accessed_at: None,
            access_count: 0,
            now,
        };
        let out = update_importance(&input, &DecayConfig::default());
        assert!((out.current_importance - 2.48).abs() < 0.01, "{}", out.current_importance);
    }

    #[test]
    fn decay_with_recent_access_matches_scenario_s4() {
        let now = Utc::now();
        let input = DecayInput {
            base_importance: 5.0,
            last_decay_at: now - Duration::days(14),
            last_accessed_at: Some(now - Duration::days(1)),
            access_count: 5,
            now,
        };
        let out = update_importance(&input, &DecayConfig::default());
        assert!((out.current_importance - 3.77).abs() < 0.02, "{}", out.current_importance);
    }

    #[test]
    fn current_importance_never_drops_below_floor() {
        let now = Utc::now();
        let input = DecayInput {
            base_importance: 1.0,
            last_decay_at: now - Duration::days(3650),
            last_accessed_at: None,
            access_count: 0,
            now,
        };
        let out = update_importance(&input, &DecayConfig::default());
        assert!(out.current_importance >= 1.0);
    }

    #[test]
    fn decay_time_translation_matches_law_l4() {
        // With no reinforcement, current(t+delta) == base * exp(-lambda*(delta+t))
        let config = DecayConfig::default();
        let base = 5.0;
        let t_days = 3.0;
        let delta_days = 2.0;
        let now = Utc::now();
        let input = DecayInput {
            base_importance: base,
            last_decay_at: now - Duration::days((t_days + delta_days) as i64),
            last_accessed_at: None,
            access_count: 0,
            now,
        };
        let out = update_importance(&input, &config);
        let expected = base * (-config.lambda * (t_days + delta_days)).exp();
        assert!((out.current_importance - expected).abs() < 1e-6);
    }

    #[test]
    fn archival_requires_both_low_importance_and_age() {
        assert!(should_archive(1.2, 91.0));
        assert!(!should_archive(1.2, 10.0));
        assert!(!should_archive(5.0, 200.0));
    }

    #[test]
    fn material_change_threshold() {
        assert!(is_material_change(5.0, 4.99));
        assert!(!is_material_change(5.0, 5.0000001));
    }
}
