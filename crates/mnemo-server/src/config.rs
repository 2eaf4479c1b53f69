//! Runtime configuration (§10.3).
//!
//! Numeric tunables and selectors are read once at startup from the
//! environment, with the defaults from the environment table, into an
//! immutable [`EngineConfig`] shared via `Arc`.

use std::sync::Arc;

use mnemo_core::decay::DecayConfig;
use mnemo_core::retrieval::RetrievalConfig;

fn env_f64(key: &str, default: f64) -> f64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u32(key: &str, default: u32) -> u32 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_bool(key: &str, default: bool) -> bool {
    std::env::var(key).ok().map(|v| matches!(v.as_str(), "1" | "true" | "TRUE" | "yes")).unwrap_or(default)
}

/// Immutable, process-wide configuration assembled from the environment.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    pub decay: DecayConfig,
    pub retrieval: RetrievalConfig,
    pub decay_interval_hours: u64,
    pub similarity_threshold: f64,
    pub contradiction_threshold: f64,
    pub use_local_memory_llm: bool,
    pub host: String,
    pub port: u16,
}

impl EngineConfig {
    /// Load from environment variables, falling back to the documented
    /// defaults for any unset tunable.
    pub fn from_env() -> Self {
        Self {
            decay: DecayConfig {
                lambda: env_f64("DECAY_RATE", 0.05),
                beta: env_f64("REINFORCEMENT_BONUS", 0.3),
                floor: env_f64("IMPORTANCE_FLOOR", 1.0),
            },
            retrieval: RetrievalConfig {
                k: env_usize("RETRIEVAL_K", 5),
                depth: env_u32("SPREADING_DEPTH", 2),
                spread_decay: env_f64("SPREADING_DECAY", 0.5),
            },
            decay_interval_hours: env_u64("DECAY_INTERVAL_HOURS", 6),
            similarity_threshold: env_f64("SIMILARITY_THRESHOLD", 0.3),
            contradiction_threshold: env_f64("CONTRADICTION_THRESHOLD", 0.75),
            use_local_memory_llm: env_bool("USE_LOCAL_MEMORY_LLM", true),
            host: std::env::var("MNEMO_HOST").unwrap_or_else(|_| "127.0.0.1".to_string()),
            port: std::env::var("MNEMO_PORT").ok().and_then(|v| v.parse().ok()).unwrap_or(8787),
        }
    }

    pub fn shared() -> Arc<Self> {
        Arc::new(Self::from_env())
    }
}
