use std::collections::{BTreeSet, HashSet};

use itertools::Itertools;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::chunk::{Chunk, ChunkTable};
use crate::error::{CritError, Result};

pub const DEFAULT_NEIGHBORS: usize = 5;

/// Above this many chunks the exhaustive strategy is usually too expensive to run.
pub const EXHAUSTIVE_WARN_CHUNKS: usize = 5_000;

/// Two chunk IDs selected for comparison. `left` is presented to the comparator first.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ChunkPair {
    pub left: String,
    pub right: String,
}

impl ChunkPair {
    pub fn new(left: impl Into<String>, right: impl Into<String>) -> Self {
        Self {
            left: left.into(),
            right: right.into(),
        }
    }

    /// Sorted form, so `(a, b)` and `(b, a)` compare equal.
    pub fn canonical(a: &str, b: &str) -> Self {
        if a <= b {
            Self::new(a, b)
        } else {
            Self::new(b, a)
        }
    }

    pub fn is_self_pair(&self) -> bool {
        self.left == self.right
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "strategy", rename_all = "snake_case")]
pub enum PairStrategy {
    Exhaustive,
    Vector {
        #[serde(default = "default_neighbors")]
        neighbors: usize,
    },
}

impl Default for PairStrategy {
    fn default() -> Self {
        PairStrategy::Exhaustive
    }
}

impl PairStrategy {
    pub fn validate(&self) -> Result<()> {
        if let PairStrategy::Vector { neighbors: 0 } = self {
            return Err(CritError::Config(
                "vector pairing needs at least one neighbor".to_string(),
            ));
        }
        Ok(())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            PairStrategy::Exhaustive => "exhaustive",
            PairStrategy::Vector { .. } => "vector",
        }
    }
}

fn default_neighbors() -> usize {
    DEFAULT_NEIGHBORS
}

/// Every pair of chunk IDs including self-pairs, in chunk-table order.
///
/// This yields n(n+1)/2 pairs for n chunks and dominates the cost of a run; beyond a few
/// thousand chunks prefer the vector strategy.
pub fn exhaustive_pairs(table: &ChunkTable) -> Vec<ChunkPair> {
    let pairs: Vec<ChunkPair> = table
        .ids()
        .combinations_with_replacement(2)
        .map(|ids| ChunkPair::new(ids[0], ids[1]))
        .collect();
    info!(chunks = table.len(), pairs = pairs.len(), "generated exhaustive pairs");
    pairs
}

pub fn exhaustive_pair_count(chunks: usize) -> usize {
    chunks * (chunks + 1) / 2
}

#[derive(Debug, Clone, PartialEq)]
pub struct Neighbor {
    pub chunk_id: String,
    pub score: f32,
}

/// Ranked nearest-neighbor lookup over the chunks of a table.
pub trait SimilaritySearch {
    /// Up to `limit` chunks most similar to `chunk`, best first. The chunk itself may appear.
    fn nearest(&self, chunk: &Chunk, limit: usize) -> Result<Vec<Neighbor>>;
}

/// Pairs each chunk with its `k` nearest other chunks.
///
/// Asks for `k + 1` hits so the chunk itself can be skipped; pairs are stored in canonical
/// order in a set, so each unordered pair appears once.
pub fn neighbor_pairs<S>(table: &ChunkTable, search: &S, k: usize) -> Result<Vec<ChunkPair>>
where
    S: SimilaritySearch + ?Sized,
{
    info!(k, chunks = table.len(), "collecting nearest chunks");
    let mut pairs = BTreeSet::new();
    for chunk in table.iter() {
        let hits = search.nearest(chunk, k + 1)?;
        let mut taken: HashSet<&str> = HashSet::with_capacity(k);
        for hit in &hits {
            if taken.len() == k {
                break;
            }
            if hit.chunk_id == chunk.id || taken.contains(hit.chunk_id.as_str()) {
                continue;
            }
            if !table.contains(&hit.chunk_id) {
                return Err(CritError::UnknownChunk(hit.chunk_id.clone()));
            }
            taken.insert(hit.chunk_id.as_str());
            pairs.insert(ChunkPair::canonical(&chunk.id, &hit.chunk_id));
        }
    }
    info!(pairs = pairs.len(), "generated neighbor pairs");
    Ok(pairs.into_iter().collect())
}
