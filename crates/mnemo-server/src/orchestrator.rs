//! Turn orchestrator (C10).
//!
//! Pipeline per turn: P0 instant writes, P1 retrieval, P2 streamed response,
//! then a detached P3 extract + P4 store that outlive the client connection.

use std::sync::Arc;

use mnemo_core::extract::{self, MemoryProposal};
use mnemo_core::instant;
use mnemo_core::model::Valence;
use mnemo_core::retrieval::RetrievalResult;
use mnemo_core::{InsertProposal, PreferenceInput, Storage, StorageError};
use tokio::sync::mpsc;
use tracing::{debug, error, warn};

use crate::clients::extractor_client::ExtractorClient;
use crate::clients::response_generator::{format_context_line, format_preferences_block, ResponseGeneratorClient};
use crate::config::EngineConfig;

const SYSTEM_PROMPT: &str = "You are a helpful assistant with access to long-term memory about the user. \
Use the memory context naturally; hedge when a memory's confidence is low. Never invent memories not given to you.";

/// One event in a turn's SSE stream.
#[derive(Debug, Clone)]
pub enum ChatEvent {
    Chunk(String),
    Done,
    Error(String),
}

#[derive(Clone)]
pub struct Orchestrator {
    storage: Arc<Storage>,
    config: Arc<EngineConfig>,
    response_generator: ResponseGeneratorClient,
    extractor: ExtractorClient,
}

impl Orchestrator {
    pub fn new(storage: Arc<Storage>, config: Arc<EngineConfig>) -> Self {
        Self { storage, config, response_generator: ResponseGeneratorClient::new(), extractor: ExtractorClient::new() }
    }

    /// Run one turn. Returns a receiver of [`ChatEvent`]s; P3/P4 continue in
    /// a detached task after the receiver reports [`ChatEvent::Done`].
    pub fn handle_turn(&self, user_text: String, conversation_id: Option<String>) -> mpsc::Receiver<ChatEvent> {
        let (tx, rx) = mpsc::channel(64);
        let this = self.clone();
        tokio::spawn(async move {
            this.run_turn(user_text, conversation_id, tx).await;
        });
        rx
    }

    async fn run_turn(&self, user_text: String, conversation_id: Option<String>, tx: mpsc::Sender<ChatEvent>) {
        // Snapshot retrieval before the instant writes land, so a name or
        // preference asserted this turn only becomes retrievable next turn.
        let memory_context = match build_memory_context(&self.storage, &self.config, &user_text) {
            Ok(ctx) => ctx,
            Err(e) => {
                let _ = tx.send(ChatEvent::Error(e.to_string())).await;
                return;
            }
        };

        if let Err(e) = run_instant_writes(&self.storage, &user_text, conversation_id.clone()) {
            warn!("instant extraction write failed: {e}");
        }

        let user_prompt = format!("MEMORY CONTEXT:\n{memory_context}\n\nUSER: {user_text}");
        let (chunk_tx, mut chunk_rx) = mpsc::channel(64);
        let generator = self.response_generator.clone();
        let system_prompt = SYSTEM_PROMPT.to_string();
        let stream_task = tokio::spawn(async move { generator.stream_reply(&system_prompt, &user_prompt, chunk_tx).await });

        let mut client_connected = true;
        while let Some(chunk) = chunk_rx.recv().await {
            if client_connected && tx.send(ChatEvent::Chunk(chunk)).await.is_err() {
                // Client disconnected mid-stream: stop forwarding but keep draining
                // so P3/P4 below still see the full reply once generation ends.
                client_connected = false;
            }
        }

        let full_reply = match stream_task.await {
            Ok(Ok(reply)) => reply,
            Ok(Err(e)) => {
                if client_connected {
                    let _ = tx.send(ChatEvent::Error(e.to_string())).await;
                }
                error!("response generator failed: {e}");
                String::new()
            }
            Err(e) => {
                error!("response generator task panicked: {e}");
                String::new()
            }
        };

        if client_connected {
            let _ = tx.send(ChatEvent::Done).await;
        }
        drop(tx);

        if full_reply.is_empty() {
            return;
        }

        let storage = self.storage.clone();
        let extractor = self.extractor.clone();
        tokio::spawn(async move {
            run_extract_and_store(storage, extractor, user_text, full_reply, memory_context, conversation_id).await;
        });
    }
}

/// P0: regex-only name/preference capture, written before this turn's
/// retrieval runs.
fn run_instant_writes(storage: &Storage, text: &str, conversation_id: Option<String>) -> Result<(), StorageError> {
    if let Some(name) = instant::extract_name(text) {
        storage.insert_memory_unit(InsertProposal {
            summary: format!("User's name is {}.", name.name),
            tier: Some(name.tier),
            confidence: Some(name.confidence),
            base_importance: name.importance,
            source_conversation_id: conversation_id.clone(),
            ..Default::default()
        })?;
    }

    for pref in instant::extract_preferences(text) {
        let verb = match pref.valence {
            Valence::Positive => "likes",
            Valence::Negative => "dislikes",
            Valence::Neutral => "mentioned",
        };
        storage.insert_memory_unit(InsertProposal {
            summary: format!("User {verb} {}.", pref.entity),
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
            source_conversation_id: conversation_id.clone(),
            ..Default::default()
        })?;
    }

    Ok(())
}

/// P1: hybrid + spreading-activation retrieval plus the active preference
/// set, rendered into the response generator's expected context block.
fn build_memory_context(storage: &Storage, config: &EngineConfig, query_text: &str) -> Result<String, StorageError> {
    let results: Vec<RetrievalResult> = storage.retrieve(query_text, &config.retrieval)?;

    let mut lines = Vec::new();
    for result in &results {
        if let Some(memory) = storage.get_memory(&result.id)? {
            lines.push(format_context_line(&memory.summary, memory.tier.as_str(), memory.confidence, &memory.facts));
        }
    }

    let preferences = storage.get_user_preferences()?;
    let likes: Vec<String> = preferences.iter().filter(|p| p.valence == Valence::Positive).map(|p| p.entity.clone()).collect();
    let dislikes: Vec<String> = preferences.iter().filter(|p| p.valence == Valence::Negative).map(|p| p.entity.clone()).collect();
    let preferences_block = format_preferences_block(&likes, &dislikes);
    if !preferences_block.is_empty() {
        lines.push(preferences_block);
    }

    Ok(lines.join("\n"))
}

/// P3 + P4: detached extract-then-store, run after the response stream has
/// already ended. Errors here are logged, never surfaced to the caller.
async fn run_extract_and_store(
    storage: Arc<Storage>,
    extractor: ExtractorClient,
    user_text: String,
    assistant_reply: String,
    memory_context: String,
    conversation_id: Option<String>,
) {
    let proposal = match run_extract_with_retry(&extractor, &user_text, &assistant_reply, &memory_context).await {
        Ok(p) => p,
        Err(e) => {
            warn!("deep extraction failed after retry: {e}");
            return;
        }
    };

    if !proposal.should_write {
        debug!("extractor proposed no write for this turn");
        return;
    }

    let insert = memory_proposal_to_insert(proposal, conversation_id);
    if let Err(e) = storage.insert_memory_unit(insert) {
        warn!("failed to store extracted memory: {e}");
    }
}

/// Async two-call retry: first attempt, then one retry with a stricter
/// "JSON only" reminder. Mirrors [`mnemo_core::extract::extract_with_retry`]'s
/// shape, reimplemented here because that function's closure is synchronous
/// (so it stays trivially unit-testable) while the real extractor call is not.
async fn run_extract_with_retry(
    extractor: &ExtractorClient,
    user_text: &str,
    assistant_reply: &str,
    memory_context: &str,
) -> extract::Result<MemoryProposal> {
    if let Ok(raw) = extractor.extract_once(user_text, assistant_reply, memory_context, false).await {
        if let Ok(proposal) = extract::parse_extractor_response(&raw) {
            return Ok(proposal);
        }
    }

    let retry = extractor
        .extract_once(user_text, assistant_reply, memory_context, true)
        .await
        .map_err(|e| extract::ExtractError::RetryExhausted(e.to_string()))?;
    extract::parse_extractor_response(&retry).map_err(|e| extract::ExtractError::RetryExhausted(e.to_string()))
}

fn memory_proposal_to_insert(proposal: MemoryProposal, conversation_id: Option<String>) -> InsertProposal {
    InsertProposal {
        summary: proposal.summary,
        entities: proposal.entities,
        facts: proposal.facts,
        structured_facts: proposal.structured_facts,
        tier: Some(proposal.tier),
        confidence: Some(proposal.confidence),
        base_importance: proposal.importance,
        valid_from: proposal.valid_from,
        valid_to: proposal.valid_to,
        preferences: proposal
            .preferences
            .into_iter()
            .map(|p| PreferenceInput {
                subject: "user".to_string(),
                entity: p.entity,
                valence: p.valence,
                strength: p.strength,
                context: None,
                confidence: proposal.confidence,
            })
            .collect(),
        related_to: proposal.related_to,
        source_conversation_id: conversation_id,
    }
}
