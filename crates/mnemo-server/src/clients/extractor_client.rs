//! Deep-extractor client (C9/P3).
//!
//! Non-streaming JSON-object chat completion. Temperature is capped at
//! [`mnemo_core::extract::MAX_EXTRACTOR_TEMPERATURE`]; the `is_retry` flag
//! swaps in a stricter "JSON only" system-prompt reminder.

use mnemo_core::extract::MAX_EXTRACTOR_TEMPERATURE;
use serde_json::json;

use super::{ClientError, Result};

const BASE_SYSTEM_PROMPT: &str = "You extract a single structured memory proposal from a conversation turn. \
Respond with a single JSON object matching the Memory Proposal schema and nothing else.";

const RETRY_SYSTEM_PROMPT: &str = "Your previous response could not be parsed as JSON. \
Respond with ONLY a single valid JSON object matching the Memory Proposal schema. No prose, no markdown fences.";

#[derive(Debug, Clone)]
pub struct ExtractorClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl ExtractorClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: std::env::var("EXTRACTOR_BASE_URL").unwrap_or_else(|_| "http://localhost:11434".to_string()),
            model: std::env::var("EXTRACTOR_MODEL").unwrap_or_else(|_| "llama3.1".to_string()),
        }
    }

    /// Run one extractor call. `is_retry` selects the stricter reminder
    /// prompt; returns the raw response text for [`mnemo_core::extract`] to
    /// parse and sanitize.
    pub async fn extract_once(&self, user_text: &str, assistant_reply: &str, memory_context: &str, is_retry: bool) -> Result<String> {
        let endpoint = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let system_prompt = if is_retry { RETRY_SYSTEM_PROMPT } else { BASE_SYSTEM_PROMPT };
        let prompt = format!(
            "{system_prompt}\n\nMEMORY CONTEXT:\n{memory_context}\n\nUSER: {user_text}\nASSISTANT: {assistant_reply}"
        );

        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": false,
            "format": "json",
            "options": { "temperature": MAX_EXTRACTOR_TEMPERATURE },
        });

        let response = self.client.post(&endpoint).json(&payload).send().await.map_err(|e| {
            ClientError::Unavailable { model: self.model.clone(), base_url: self.base_url.clone(), detail: e.to_string() }
        })?;

        if !response.status().is_success() {
            let status = response.status();
            return Err(ClientError::Unavailable {
                model: self.model.clone(),
                base_url: self.base_url.clone(),
                detail: format!("http {status}"),
            });
        }

        let body: serde_json::Value = response.json().await?;
        Ok(body.get("response").and_then(|v| v.as_str()).unwrap_or_default().to_string())
    }
}

impl Default for ExtractorClient {
    fn default() -> Self {
        Self::new()
    }
}
