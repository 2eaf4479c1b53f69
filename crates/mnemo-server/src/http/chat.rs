//! `POST /chat` — Server-Sent-Events chat stream.

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::State;
use axum::response::sse::{Event, Sse};
use axum::response::IntoResponse;
use axum::routing::post;
use axum::{Json, Router};
use serde::Deserialize;
use tokio_stream::wrappers::ReceiverStream;
use tokio_stream::StreamExt;

use crate::error::EngineError;
use crate::orchestrator::ChatEvent;

use super::AppState;

#[derive(Debug, Deserialize)]
pub struct ChatRequest {
    pub message: String,
    pub conversation_id: Option<String>,
}

pub fn router() -> Router<Arc<AppState>> {
    Router::new().route("/chat", post(handle_chat))
}

async fn handle_chat(State(state): State<Arc<AppState>>, Json(body): Json<ChatRequest>) -> axum::response::Response {
    if body.message.trim().is_empty() {
        return EngineError::Input("message must not be empty".to_string()).into_response();
    }

    let rx = state.orchestrator.handle_turn(body.message, body.conversation_id);
    let events = ReceiverStream::new(rx).map(|event| {
        let payload = match event {
            ChatEvent::Chunk(text) => serde_json::json!({ "chunk": text }),
            ChatEvent::Done => serde_json::json!({ "done": true }),
            ChatEvent::Error(msg) => serde_json::json!({ "error": msg }),
        };
        Ok::<_, Infallible>(Event::default().data(payload.to_string()))
    });

    Sse::new(events).into_response()
}
