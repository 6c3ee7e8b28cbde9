use crate::error::CallError;

/// Text embedding backend used by the vector pairing strategy.
pub trait Embedder {
    /// Identifies the vector space, so cached vectors from another model are never mixed in.
    fn model_id(&self) -> String;

    fn embed_batch(&self, inputs: &[String]) -> std::result::Result<Vec<Vec<f32>>, CallError>;
}

#[derive(Debug, Clone, Copy)]
pub struct HashEmbedderConfig {
    pub dimensions: usize,
    pub seed: u64,
}

impl Default for HashEmbedderConfig {
    fn default() -> Self {
        Self {
            dimensions: 256,
            seed: 1337,
        }
    }
}

/// Offline feature-hashing embedder. Words are lowercased, stripped of surrounding
/// punctuation and hashed into a fixed number of buckets; the vector is L2-normalised.
#[derive(Debug, Clone)]
pub struct HashEmbedder {
    config: HashEmbedderConfig,
}

impl HashEmbedder {
    pub fn new(config: HashEmbedderConfig) -> Self {
        Self { config }
    }

    pub fn embed_text(&self, text: &str) -> Vec<f32> {
        let dims = self.config.dimensions.max(1);
        let mut vector = vec![0f32; dims];
        for word in text.split_whitespace() {
            let word = word.trim_matches(|c: char| !c.is_alphanumeric());
            if word.is_empty() {
                continue;
            }
            vector[self.bucket_for(&word.to_lowercase())] += 1.0;
        }
        normalize(&mut vector);
        vector
    }

    // blake3 keeps buckets stable across toolchains, unlike the std hasher.
    fn bucket_for(&self, word: &str) -> usize {
        let mut hasher = blake3::Hasher::new();
        hasher.update(&self.config.seed.to_le_bytes());
        hasher.update(word.as_bytes());
        let digest = hasher.finalize();
        let mut head = [0u8; 8];
        head.copy_from_slice(&digest.as_bytes()[..8]);
        (u64::from_le_bytes(head) % self.config.dimensions.max(1) as u64) as usize
    }
}

impl Embedder for HashEmbedder {
    fn model_id(&self) -> String {
        format!(
            "hash-{}-{}",
            self.config.dimensions.max(1),
            self.config.seed
        )
    }

    fn embed_batch(&self, inputs: &[String]) -> std::result::Result<Vec<Vec<f32>>, CallError> {
        Ok(inputs.iter().map(|text| self.embed_text(text)).collect())
    }
}

fn normalize(vector: &mut [f32]) {
    let norm = vector.iter().map(|v| v * v).sum::<f32>().sqrt();
    if norm == 0.0 {
        return;
    }
    for value in vector.iter_mut() {
        *value /= norm;
    }
}
