use std::cmp::Ordering;
use std::collections::HashMap;

use crate::chunk::Chunk;
use crate::error::{CritError, Result};
use crate::pairs::{Neighbor, SimilaritySearch};

/// Brute-force cosine similarity index over chunk embeddings.
#[derive(Debug, Clone, Default)]
pub struct VectorIndex {
    ids: Vec<String>,
    vectors: Vec<Vec<f32>>,
    positions: HashMap<String, usize>,
}

impl VectorIndex {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, chunk_id: impl Into<String>, vector: Vec<f32>) {
        let chunk_id = chunk_id.into();
        if let Some(&position) = self.positions.get(&chunk_id) {
            self.vectors[position] = vector;
            return;
        }
        self.positions.insert(chunk_id.clone(), self.ids.len());
        self.ids.push(chunk_id);
        self.vectors.push(vector);
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }

    pub fn get(&self, chunk_id: &str) -> Option<&[f32]> {
        self.positions
            .get(chunk_id)
            .map(|&position| self.vectors[position].as_slice())
    }

    /// Best `limit` matches for `query`; equal scores are ordered by chunk ID.
    pub fn search(&self, query: &[f32], limit: usize) -> Vec<Neighbor> {
        let mut hits: Vec<Neighbor> = self
            .ids
            .iter()
            .zip(&self.vectors)
            .map(|(id, vector)| Neighbor {
                chunk_id: id.clone(),
                score: cosine_similarity(query, vector),
            })
            .collect();
        hits.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(Ordering::Equal)
                .then_with(|| a.chunk_id.cmp(&b.chunk_id))
        });
        hits.truncate(limit);
        hits
    }
}

impl SimilaritySearch for VectorIndex {
    fn nearest(&self, chunk: &Chunk, limit: usize) -> Result<Vec<Neighbor>> {
        let query = self
            .get(&chunk.id)
            .ok_or_else(|| CritError::UnknownChunk(chunk.id.clone()))?;
        Ok(self.search(query, limit))
    }
}

pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    let mut dot = 0.0f32;
    let mut a_norm = 0.0f32;
    let mut b_norm = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        dot += x * y;
        a_norm += x * x;
        b_norm += y * y;
    }
    if a_norm == 0.0 || b_norm == 0.0 {
        return 0.0;
    }
    dot / (a_norm.sqrt() * b_norm.sqrt())
}
