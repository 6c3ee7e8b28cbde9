use std::collections::HashMap;

use crit_core::{
    neighbor_pairs, CallError, ChunkPair, ChunkTable, CritError, Embedder, Result, VectorIndex,
};
use tracing::{debug, info};

use crate::retry::RetryPolicy;
use crate::store::EmbeddingStore;

/// Pairs every chunk with its `k` most similar chunks.
///
/// Vectors already in `store` for the embedder's model are reused; the rest are embedded in
/// batches of `batch_size` and written back.
pub fn vector_pairs<E>(
    table: &ChunkTable,
    embedder: &E,
    store: Option<&EmbeddingStore>,
    k: usize,
    retry: &RetryPolicy,
    batch_size: usize,
) -> Result<Vec<ChunkPair>>
where
    E: Embedder + ?Sized,
{
    retry.validate()?;
    let model = embedder.model_id();
    let ids: Vec<&str> = table.ids().collect();
    let mut vectors: HashMap<String, Vec<f32>> = match store {
        Some(store) => store.get_many(&model, &ids)?,
        None => HashMap::new(),
    };
    let missing: Vec<&str> = ids
        .iter()
        .copied()
        .filter(|id| !vectors.contains_key(*id))
        .collect();
    info!(
        model = %model,
        chunks = ids.len(),
        cached = ids.len() - missing.len(),
        "embedding chunks"
    );

    for batch in missing.chunks(batch_size.max(1)) {
        let texts: Vec<String> = batch
            .iter()
            .filter_map(|id| table.get(id).map(|chunk| chunk.text.clone()))
            .collect();
        let (embedded, attempts) = retry
            .run_blocking("embed", || embedder.embed_batch(&texts))
            .map_err(|failure| CritError::Embedding(failure.error))?;
        if embedded.len() != batch.len() {
            return Err(CritError::Embedding(CallError::Malformed(format!(
                "received {} vectors for {} chunks",
                embedded.len(),
                batch.len()
            ))));
        }
        debug!(batch = batch.len(), attempts, "embedded batch");
        let entries: Vec<(String, Vec<f32>)> = batch
            .iter()
            .map(|id| (*id).to_string())
            .zip(embedded)
            .collect();
        if let Some(store) = store {
            store.put_many(&model, &entries)?;
        }
        vectors.extend(entries);
    }

    let mut index = VectorIndex::new();
    for id in &ids {
        if let Some(vector) = vectors.remove(*id) {
            index.insert(*id, vector);
        }
    }
    if index.is_empty() {
        info!("no chunks to pair");
        return Ok(Vec::new());
    }
    let pairs = neighbor_pairs(table, &index, k)?;
    info!(pairs = pairs.len(), neighbors = k, "vector pairing complete");
    Ok(pairs)
}
