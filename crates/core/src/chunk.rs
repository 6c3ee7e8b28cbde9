use std::ops::Range;

use indexmap::IndexMap;
use once_cell::sync::Lazy;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use tiktoken_rs::CoreBPE;
use tracing::{debug, info};

use crate::corpus::Corpus;
use crate::error::{CritError, Result};

static TOKENIZER: Lazy<CoreBPE> = Lazy::new(|| tiktoken_rs::cl100k_base().expect("tokenizer"));

/// Hex characters kept from the content digest.
pub const CHUNK_ID_WIDTH: usize = 8;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(default)]
pub struct ChunkConfig {
    pub chunk_size: usize,
    pub overlap: usize,
}

impl Default for ChunkConfig {
    fn default() -> Self {
        Self {
            chunk_size: 768,
            overlap: 20,
        }
    }
}

impl ChunkConfig {
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(CritError::Config(
                "chunk_size must be greater than zero".to_string(),
            ));
        }
        if self.overlap >= self.chunk_size {
            return Err(CritError::Config(format!(
                "overlap ({}) must be smaller than chunk_size ({})",
                self.overlap, self.chunk_size
            )));
        }
        Ok(())
    }

    fn stride(&self) -> usize {
        self.chunk_size - self.overlap
    }
}

/// A token window of one document, identified by a digest of its decoded text.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Chunk {
    pub id: String,
    pub text: String,
    pub title: String,
    pub document: String,
    #[serde(default)]
    pub token_start: usize,
    #[serde(default)]
    pub token_end: usize,
}

impl Chunk {
    pub fn token_count(&self) -> usize {
        self.token_end.saturating_sub(self.token_start)
    }
}

/// Chunks of a whole corpus keyed by chunk ID, in insertion order.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChunkTable {
    chunks: IndexMap<String, Chunk>,
    #[serde(skip)]
    duplicates: usize,
}

impl ChunkTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a chunk. An existing chunk with the same ID is replaced (the newer document
    /// wins) but keeps its original position.
    pub fn insert(&mut self, chunk: Chunk) -> Option<Chunk> {
        if let Some(existing) = self.chunks.get(&chunk.id) {
            self.duplicates += 1;
            if existing.document != chunk.document {
                debug!(
                    chunk = %chunk.id,
                    previous = %existing.document,
                    document = %chunk.document,
                    "identical text in two documents, keeping the later one"
                );
            }
        }
        self.chunks.insert(chunk.id.clone(), chunk)
    }

    pub fn get(&self, id: &str) -> Option<&Chunk> {
        self.chunks.get(id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.chunks.contains_key(id)
    }

    pub fn len(&self) -> usize {
        self.chunks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.chunks.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = &str> {
        self.chunks.keys().map(|id| id.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = &Chunk> {
        self.chunks.values()
    }

    /// Number of inserts that hit an already present ID.
    pub fn duplicate_count(&self) -> usize {
        self.duplicates
    }
}

impl FromIterator<Chunk> for ChunkTable {
    fn from_iter<I: IntoIterator<Item = Chunk>>(iter: I) -> Self {
        let mut table = ChunkTable::new();
        for chunk in iter {
            table.insert(chunk);
        }
        table
    }
}

pub struct Chunker {
    config: ChunkConfig,
}

impl Chunker {
    pub fn new(config: ChunkConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    pub fn config(&self) -> &ChunkConfig {
        &self.config
    }

    pub fn chunk_text(&self, document: &str, title: &str, text: &str) -> Vec<Chunk> {
        if text.is_empty() {
            return Vec::new();
        }
        let tokens = TOKENIZER.encode_with_special_tokens(text);
        windows(tokens.len(), &self.config)
            .into_iter()
            .map(|range| {
                let text = decode_lossy(&tokens[range.clone()]);
                Chunk {
                    id: chunk_id(&text),
                    text,
                    title: title.to_string(),
                    document: document.to_string(),
                    token_start: range.start,
                    token_end: range.end,
                }
            })
            .collect()
    }

    /// Chunks every document of the corpus. Documents are tokenized in parallel and inserted
    /// in corpus order, so the table matches a sequential run.
    pub fn chunk_corpus(&self, corpus: &Corpus) -> ChunkTable {
        info!(
            documents = corpus.len(),
            chunk_size = self.config.chunk_size,
            overlap = self.config.overlap,
            "turning scrape into chunks"
        );
        let present: Vec<_> = corpus.present().collect();
        let per_document: Vec<Vec<Chunk>> = present
            .par_iter()
            .map(|(id, doc)| self.chunk_text(id, doc.title.as_deref().unwrap_or_default(), &doc.text))
            .collect();
        let table: ChunkTable = per_document.into_iter().flatten().collect();
        info!(
            chunks = table.len(),
            duplicates = table.duplicate_count(),
            "chunk table built"
        );
        table
    }
}

/// Half-open token ranges covered by successive windows over `token_count` tokens.
pub fn token_windows(token_count: usize, config: &ChunkConfig) -> Result<Vec<Range<usize>>> {
    config.validate()?;
    Ok(windows(token_count, config))
}

pub fn chunk_id(text: &str) -> String {
    let digest = blake3::hash(text.as_bytes());
    digest.to_hex().as_str()[..CHUNK_ID_WIDTH].to_string()
}

pub fn count_tokens(text: &str) -> usize {
    TOKENIZER.encode_with_special_tokens(text).len()
}

fn windows(token_count: usize, config: &ChunkConfig) -> Vec<Range<usize>> {
    let stride = config.stride();
    let mut ranges = Vec::with_capacity(token_count / stride + 1);
    let mut start = 0usize;
    while start < token_count {
        let end = (start + config.chunk_size).min(token_count);
        ranges.push(start..end);
        start += stride;
    }
    ranges
}

// Window edges may split a multi-byte character.
fn decode_lossy(tokens: &[usize]) -> String {
    let bytes = TOKENIZER._decode_native(tokens);
    String::from_utf8_lossy(&bytes).into_owned()
}
