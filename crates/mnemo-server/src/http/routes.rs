//! Admin/read routes: memories, stats, preferences, entities, relations,
//! contradictions, and the manual decay trigger.

use std::sync::Arc;

use axum::extract::{Path, Query, State};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::Utc;
use mnemo_core::model::{Resolution, Valence};
use serde::Deserialize;

use crate::error::{EngineError, Result};

use super::AppState;

pub fn router() -> Router<Arc<AppState>> {
    Router::new()
        .route("/memories", get(list_memories))
        .route("/memories/{id}/relations", get(memory_relations))
        .route("/stats", get(stats))
        .route("/preferences", get(preferences))
        .route("/entities", get(entities))
        .route("/entities/{id}/memories", get(entity_memories))
        .route("/entities/{id}/confirm", post(confirm_entity))
        .route("/contradictions", get(contradictions))
        .route("/contradictions/{id}/resolve", post(resolve_contradiction))
        .route("/decay/run", post(run_decay))
}

#[derive(Debug, Deserialize)]
struct MemoriesQuery {
    #[serde(default)]
    inactive: bool,
}

async fn list_memories(State(state): State<Arc<AppState>>, Query(q): Query<MemoriesQuery>) -> Result<impl axum::response::IntoResponse> {
    let memories = state.storage.get_memories(q.inactive)?;
    Ok(Json(memories))
}

async fn memory_relations(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<impl axum::response::IntoResponse> {
    let relations = state.storage.get_relations_for(&id)?;
    Ok(Json(relations))
}

async fn stats(State(state): State<Arc<AppState>>) -> Result<impl axum::response::IntoResponse> {
    Ok(Json(state.storage.get_stats()?))
}

#[derive(Debug, Deserialize)]
struct PreferencesQuery {
    entity: Option<String>,
    valence: Option<String>,
}

async fn preferences(State(state): State<Arc<AppState>>, Query(q): Query<PreferencesQuery>) -> Result<impl axum::response::IntoResponse> {
    let mut preferences = state.storage.get_user_preferences()?;
    if let Some(entity) = &q.entity {
        preferences.retain(|p| p.entity.eq_ignore_ascii_case(entity));
    }
    if let Some(valence) = &q.valence {
        let parsed = Valence::parse(valence);
        preferences.retain(|p| p.valence == parsed);
    }
    Ok(Json(preferences))
}

async fn entities(State(state): State<Arc<AppState>>) -> Result<impl axum::response::IntoResponse> {
    Ok(Json(state.storage.get_entities()?))
}

async fn entity_memories(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<impl axum::response::IntoResponse> {
    Ok(Json(state.storage.get_memories_for_entity(&id)?))
}

async fn confirm_entity(State(state): State<Arc<AppState>>, Path(id): Path<String>) -> Result<impl axum::response::IntoResponse> {
    state.storage.get_entity(&id)?.ok_or_else(|| EngineError::NotFound(format!("entity {id}")))?;
    state.storage.confirm_entity(&id)?;
    Ok(Json(serde_json::json!({ "confirmed": true })))
}

async fn contradictions(State(state): State<Arc<AppState>>) -> Result<impl axum::response::IntoResponse> {
    Ok(Json(state.storage.get_pending_contradictions()?))
}

#[derive(Debug, Deserialize)]
struct ResolveBody {
    resolution: String,
    note: Option<String>,
}

async fn resolve_contradiction(
    State(state): State<Arc<AppState>>,
    Path(id): Path<String>,
    Json(body): Json<ResolveBody>,
) -> Result<impl axum::response::IntoResponse> {
    let resolution = Resolution::parse(&body.resolution)
        .ok_or_else(|| EngineError::Input(format!("unknown resolution '{}'", body.resolution)))?;
    state.storage.resolve_contradiction(&id, resolution, body.note)?;
    Ok(Json(serde_json::json!({ "resolved": true })))
}

async fn run_decay(State(state): State<Arc<AppState>>) -> Result<impl axum::response::IntoResponse> {
    let entries = state.storage.run_decay_sweep(&state.config.decay, Utc::now())?;
    Ok(Json(serde_json::json!({ "updated": entries.len() })))
}
