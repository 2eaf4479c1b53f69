//! Embedder adapter (C1)
//!
//! Text -> unit-normalized vector of fixed dimension [`EMBEDDING_DIMENSIONS`].
//! The underlying model is loaded once and shared; failure is fatal to the
//! caller's current operation (writes that need an embedding must abort).

use std::sync::{Mutex, OnceLock};

/// Fixed embedding dimension for the default model.
pub const EMBEDDING_DIMENSIONS: usize = 384;

/// Texts longer than this are truncated before embedding.
pub const MAX_TEXT_LENGTH: usize = 8192;

/// Batch size used by `embed_batch`.
pub const BATCH_SIZE: usize = 32;

/// Failure modes for the embedder adapter.
#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum EmbeddingError {
    #[error("embedding model failed to initialize: {0}")]
    ModelInit(String),
    #[error("embedding generation failed: {0}")]
    EmbeddingFailed(String),
    #[error("invalid input: {0}")]
    InvalidInput(String),
}

pub type Result<T> = std::result::Result<T, EmbeddingError>;

/// L2-normalize `vector` in place; no-op on a zero vector.
pub fn normalize(vector: &mut [f32]) {
    let norm = (vector.iter().map(|v| v * v).sum::<f32>()).sqrt();
    if norm > f32::EPSILON {
        for v in vector.iter_mut() {
            *v /= norm;
        }
    }
}

/// Cosine similarity between two equal-length vectors. Returns 0.0 if either
/// is empty or the lengths differ.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.is_empty() || a.len() != b.len() {
        return 0.0;
    }
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    let norm_a = (a.iter().map(|x| x * x).sum::<f32>()).sqrt();
    let norm_b = (b.iter().map(|y| y * y).sum::<f32>()).sqrt();
    if norm_a <= f32::EPSILON || norm_b <= f32::EPSILON {
        0.0
    } else {
        (dot / (norm_a * norm_b)).clamp(-1.0, 1.0)
    }
}

/// Thread-safe adapter in front of the embedding model. The model (when the
/// `embeddings` feature is enabled) is lazily loaded once behind a
/// [`OnceLock`] and shared across every call; without the feature, a
/// deterministic local fallback is used so the engine remains fully
/// functional (if lower-quality) without a model download.
pub struct EmbeddingService {
    #[cfg(feature = "embeddings")]
    model: OnceLock<std::result::Result<Mutex<fastembed::TextEmbedding>, String>>,
    #[cfg(not(feature = "embeddings"))]
    _marker: std::marker::PhantomData<()>,
}

impl EmbeddingService {
    pub fn new() -> Self {
        Self {
            #[cfg(feature = "embeddings")]
            model: OnceLock::new(),
            #[cfg(not(feature = "embeddings"))]
            _marker: std::marker::PhantomData,
        }
    }

    pub fn dimensions(&self) -> usize {
        EMBEDDING_DIMENSIONS
    }

    /// Embed a single piece of text, returning a unit vector of
    /// [`EMBEDDING_DIMENSIONS`].
    pub fn embed(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(EmbeddingError::InvalidInput("empty text".into()));
        }
        let truncated: &str = if text.len() > MAX_TEXT_LENGTH {
            &text[..MAX_TEXT_LENGTH]
        } else {
            text
        };

        #[cfg(feature = "embeddings")]
        {
            self.embed_with_model(truncated)
        }
        #[cfg(not(feature = "embeddings"))]
        {
            Ok(deterministic_embedding(truncated))
        }
    }

    pub fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut out = Vec::with_capacity(texts.len());
        for chunk in texts.chunks(BATCH_SIZE) {
            for text in chunk {
                out.push(self.embed(text)?);
            }
        }
        Ok(out)
    }

    #[cfg(feature = "embeddings")]
    fn embed_with_model(&self, text: &str) -> Result<Vec<f32>> {
        use fastembed::{InitOptions, TextEmbedding};

        let model = self.model.get_or_init(|| {
            TextEmbedding::try_new(InitOptions::default())
                .map(Mutex::new)
                .map_err(|e| e.to_string())
        });

        let model = model
            .as_ref()
            .map_err(|e| EmbeddingError::ModelInit(e.clone()))?;

        let mut guard = model
            .lock()
            .map_err(|_| EmbeddingError::ModelInit("embedding model lock poisoned".into()))?;

        let embeddings = guard
            .embed(vec![text], None)
            .map_err(|e| EmbeddingError::EmbeddingFailed(e.to_string()))?;

        let mut vector = embeddings
            .into_iter()
            .next()
            .ok_or_else(|| EmbeddingError::EmbeddingFailed("no embedding returned".into()))?;

        matryoshka_truncate(&mut vector, EMBEDDING_DIMENSIONS);
        Ok(vector)
    }
}

impl Default for EmbeddingService {
    fn default() -> Self {
        Self::new()
    }
}

/// Truncate `vector` to `dims` and re-normalize (Matryoshka representation
/// learning: the leading dimensions of the full embedding remain meaningful
/// on their own).
pub fn matryoshka_truncate(vector: &mut Vec<f32>, dims: usize) {
    if vector.len() > dims {
        vector.truncate(dims);
    }
    normalize(vector);
}

/// Deterministic, dependency-free fallback embedding used when the
/// `embeddings` feature is disabled (e.g. CI without model downloads).
/// Hashes overlapping character n-grams into a fixed-width vector; not
/// semantically meaningful, but stable, unit-normalized, and collision-light
/// enough to exercise the rest of the pipeline (indexing, retrieval scoring,
/// contradiction thresholds) deterministically.
#[cfg_attr(feature = "embeddings", allow(dead_code))]
fn deterministic_embedding(text: &str) -> Vec<f32> {
    let mut v = vec![0f32; EMBEDDING_DIMENSIONS];
    let lower = text.to_lowercase();
    let bytes = lower.as_bytes();
    const N: usize = 3;
    if bytes.len() < N {
        v[0] = 1.0;
        return v;
    }
    for window in bytes.windows(N) {
        let mut h: u64 = 1469598103934665603;
        for b in window {
            h ^= *b as u64;
            h = h.wrapping_mul(1099511628211);
        }
        let idx = (h as usize) % EMBEDDING_DIMENSIONS;
        v[idx] += 1.0;
    }
    normalize(&mut v);
    v
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_of_identical_vectors_is_one() {
        let v = vec![0.6, 0.8, 0.0];
        assert!((cosine_similarity(&v, &v) - 1.0).abs() < 1e-5);
    }

    #[test]
    fn cosine_of_orthogonal_vectors_is_zero() {
        let a = vec![1.0, 0.0];
        let b = vec![0.0, 1.0];
        assert!(cosine_similarity(&a, &b).abs() < 1e-6);
    }

    #[test]
    fn cosine_mismatched_lengths_is_zero() {
        assert_eq!(cosine_similarity(&[1.0, 0.0], &[1.0]), 0.0);
    }

    #[test]
    fn normalize_produces_unit_vector() {
        let mut v = vec![3.0, 4.0];
        normalize(&mut v);
        let norm = (v[0] * v[0] + v[1] * v[1]).sqrt();
        assert!((norm - 1.0).abs() < 1e-6);
    }

    #[test]
    fn embed_rejects_empty_text() {
        let svc = EmbeddingService::new();
        assert!(svc.embed("   ").is_err());
    }

    #[test]
    #[cfg(not(feature = "embeddings"))]
    fn fallback_embeddings_are_unit_and_deterministic() {
        let svc = EmbeddingService::new();
        let a = svc.embed("the user's name is Costa").unwrap();
        let b = svc.embed("the user's name is Costa").unwrap();
        assert_eq!(a, b);
        assert_eq!(a.len(), EMBEDDING_DIMENSIONS);
        let norm = (a.iter().map(|x| x * x).sum::<f32>()).sqrt();
        assert!((norm - 1.0).abs() < 1e-3);
    }
}
