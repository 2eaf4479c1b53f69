//! Response generator client (C10/P2).
//!
//! Streams chat-completion deltas from the configured local/cloud model.
//! The request carries a system prompt (natural use of memory, hedging at
//! low confidence) and a user prompt formed from the retrieved memory
//! context plus the raw user text.

use serde_json::json;
use tokio::sync::mpsc;

use super::{ClientError, Result};

#[derive(Debug, Clone)]
pub struct ResponseGeneratorClient {
    client: reqwest::Client,
    base_url: String,
    model: String,
}

impl ResponseGeneratorClient {
    pub fn new() -> Self {
        Self {
            client: reqwest::Client::new(),
            base_url: std::env::var("RESPONSE_GENERATOR_BASE_URL")
                .unwrap_or_else(|_| "http://localhost:11434".to_string()),
            model: std::env::var("RESPONSE_GENERATOR_MODEL").unwrap_or_else(|_| "llama3.1".to_string()),
        }
    }

    /// Stream the reply token-by-token into `tx`, returning the full
    /// accumulated text once the stream ends.
    pub async fn stream_reply(&self, system_prompt: &str, user_prompt: &str, tx: mpsc::Sender<String>) -> Result<String> {
        let endpoint = format!("{}/api/generate", self.base_url.trim_end_matches('/'));
        let prompt = format!("{system_prompt}\n\n{user_prompt}");
        let payload = json!({
            "model": self.model,
            "prompt": prompt,
            "stream": true,
        });

        let mut response = self.client.post(&endpoint).json(&payload).send().await.map_err(|e| {
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

        let mut full_reply = String::new();
        while let Some(chunk) = response.chunk().await? {
            let chunk_str = String::from_utf8_lossy(&chunk);
            for line in chunk_str.lines() {
                if line.trim().is_empty() {
                    continue;
                }
                let Ok(parsed) = serde_json::from_str::<serde_json::Value>(line) else { continue };
                if let Some(content) = parsed.get("response").and_then(|v| v.as_str()) {
                    if !content.is_empty() {
                        full_reply.push_str(content);
                        let _ = tx.send(content.to_string()).await;
                    }
                }
            }
        }

        Ok(full_reply)
    }
}

impl Default for ResponseGeneratorClient {
    fn default() -> Self {
        Self::new()
    }
}

/// Format one retrieved memory as a context line (§6 outbound format).
pub fn format_context_line(summary: &str, tier: &str, confidence: f64, facts: &[String]) -> String {
    let mut line = format!("[{tier}][{confidence:.1}] {summary}");
    if !facts.is_empty() {
        line.push_str(&format!("\n  Facts: {}", facts.join("; ")));
    }
    line
}

/// Format the preferences block (§6 outbound format): `Likes: a, b` / `Dislikes: c, d`.
pub fn format_preferences_block(likes: &[String], dislikes: &[String]) -> String {
    let mut lines = Vec::new();
    if !likes.is_empty() {
        lines.push(format!("Likes: {}", likes.join(", ")));
    }
    if !dislikes.is_empty() {
        lines.push(format!("Dislikes: {}", dislikes.join(", ")));
    }
    lines.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn context_line_includes_facts_when_present() {
        let line = format_context_line("User likes tea", "preference", 0.85, &["drinks green tea".to_string()]);
        assert!(line.starts_with("[preference][0.8] User likes tea"));
        assert!(line.contains("Facts: drinks green tea"));
    }

    #[test]
    fn context_line_omits_facts_line_when_empty() {
        let line = format_context_line("User's name is Costa", "asserted_fact", 0.95, &[]);
        assert!(!line.contains("Facts:"));
    }

    #[test]
    fn preferences_block_formats_both_valences() {
        let block = format_preferences_block(&["tea".to_string(), "jazz".to_string()], &["mondays".to_string()]);
        assert_eq!(block, "Likes: tea, jazz\nDislikes: mondays");
    }
}
