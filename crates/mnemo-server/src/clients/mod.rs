//! Outbound HTTP clients for the response generator and deep extractor (§6).
//!
//! Both speak the same Ollama-shaped chat-completion protocol the rest of
//! this ecosystem's local-model clients use: POST a JSON payload, read back
//! newline-delimited JSON chunks.

pub mod extractor_client;
pub mod response_generator;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum ClientError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("{model} unavailable at {base_url}: {detail}")]
    Unavailable { model: String, base_url: String, detail: String },
}

pub type Result<T> = std::result::Result<T, ClientError>;
