//! HNSW vector index (optional ANN acceleration)
//!
//! Graph retrieval (§4.5) scores every active memory directly, so this index
//! is not on the correctness path; it exists to prefilter Pass B semantic
//! candidates in the contradiction detector and the `/memories/search` route
//! without a full table scan once the store grows large.

use std::collections::HashMap;

use usearch::{Index, IndexOptions, MetricKind, ScalarKind};

use crate::embedder::EMBEDDING_DIMENSIONS;

#[non_exhaustive]
#[derive(Debug, thiserror::Error)]
pub enum VectorIndexError {
    #[error("index creation failed: {0}")]
    Creation(String),
    #[error("index add failed: {0}")]
    Add(String),
    #[error("index search failed: {0}")]
    Search(String),
    #[error("invalid dimensions: expected {expected}, got {got}")]
    InvalidDimensions { expected: usize, got: usize },
}

pub type Result<T> = std::result::Result<T, VectorIndexError>;

const CONNECTIVITY: usize = 16;
const EXPANSION_ADD: usize = 128;
const EXPANSION_SEARCH: usize = 64;

/// HNSW index over memory ids, keyed by string id rather than usearch's
/// native `u64`.
pub struct VectorIndex {
    index: Index,
    key_to_id: HashMap<String, u64>,
    id_to_key: HashMap<u64, String>,
    next_id: u64,
}

impl VectorIndex {
    pub fn new() -> Result<Self> {
        let options = IndexOptions {
            dimensions: EMBEDDING_DIMENSIONS,
            metric: MetricKind::Cos,
            quantization: ScalarKind::F32,
            connectivity: CONNECTIVITY,
            expansion_add: EXPANSION_ADD,
            expansion_search: EXPANSION_SEARCH,
            multi: false,
        };
        let index = Index::new(&options).map_err(|e| VectorIndexError::Creation(e.to_string()))?;
        Ok(Self { index, key_to_id: HashMap::new(), id_to_key: HashMap::new(), next_id: 0 })
    }

    pub fn len(&self) -> usize {
        self.index.size()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn ensure_capacity(&self) -> Result<()> {
        let capacity = self.index.capacity();
        let size = self.index.size();
        if size >= capacity {
            let new_capacity = std::cmp::max(capacity * 2, 16);
            self.index
                .reserve(new_capacity)
                .map_err(|e| VectorIndexError::Creation(e.to_string()))?;
        }
        Ok(())
    }

    /// Insert or replace the vector for `key`.
    pub fn upsert(&mut self, key: &str, vector: &[f32]) -> Result<()> {
        if vector.len() != EMBEDDING_DIMENSIONS {
            return Err(VectorIndexError::InvalidDimensions { expected: EMBEDDING_DIMENSIONS, got: vector.len() });
        }

        if let Some(&existing_id) = self.key_to_id.get(key) {
            self.index.remove(existing_id).map_err(|e| VectorIndexError::Add(e.to_string()))?;
            self.ensure_capacity()?;
            self.index.add(existing_id, vector).map_err(|e| VectorIndexError::Add(e.to_string()))?;
            return Ok(());
        }

        self.ensure_capacity()?;
        let id = self.next_id;
        self.next_id += 1;
        self.index.add(id, vector).map_err(|e| VectorIndexError::Add(e.to_string()))?;
        self.key_to_id.insert(key.to_string(), id);
        self.id_to_key.insert(id, key.to_string());
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Result<bool> {
        if let Some(id) = self.key_to_id.remove(key) {
            self.id_to_key.remove(&id);
            self.index.remove(id).map_err(|e| VectorIndexError::Add(e.to_string()))?;
            Ok(true)
        } else {
            Ok(false)
        }
    }

    pub fn contains(&self, key: &str) -> bool {
        self.key_to_id.contains_key(key)
    }

    /// Approximate nearest neighbors, returned as `(id, cosine_similarity)`.
    pub fn search(&self, query: &[f32], limit: usize) -> Result<Vec<(String, f32)>> {
        if query.len() != EMBEDDING_DIMENSIONS {
            return Err(VectorIndexError::InvalidDimensions { expected: EMBEDDING_DIMENSIONS, got: query.len() });
        }
        if self.is_empty() {
            return Ok(Vec::new());
        }
        let matches = self.index.search(query, limit).map_err(|e| VectorIndexError::Search(e.to_string()))?;
        Ok(matches
            .keys
            .iter()
            .zip(matches.distances.iter())
            .filter_map(|(id, distance)| self.id_to_key.get(id).map(|key| (key.clone(), 1.0 - distance)))
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn vec_of(value: f32) -> Vec<f32> {
        let mut v = vec![0.0; EMBEDDING_DIMENSIONS];
        v[0] = value;
        v[1] = 1.0;
        v
    }

    #[test]
    fn upsert_then_search_finds_the_key() {
        let mut index = VectorIndex::new().unwrap();
        index.upsert("a", &vec_of(1.0)).unwrap();
        index.upsert("b", &vec_of(-1.0)).unwrap();
        let results = index.search(&vec_of(1.0), 1).unwrap();
        assert_eq!(results[0].0, "a");
    }

    #[test]
    fn remove_drops_the_key() {
        let mut index = VectorIndex::new().unwrap();
        index.upsert("a", &vec_of(1.0)).unwrap();
        assert!(index.remove("a").unwrap());
        assert!(!index.contains("a"));
    }

    #[test]
    fn wrong_dimensions_are_rejected() {
        let index = VectorIndex::new().unwrap();
        assert!(index.search(&[1.0, 0.0], 1).is_err());
    }
}
