mod chunk;
mod corpus;
mod embedding;
mod error;
mod finding;
mod index;
mod pairs;
mod reduce;

pub use chunk::{
    chunk_id, count_tokens, token_windows, Chunk, ChunkConfig, ChunkTable, Chunker,
    CHUNK_ID_WIDTH,
};
pub use corpus::{Corpus, ScrapedDocument};
pub use embedding::{Embedder, HashEmbedder, HashEmbedderConfig};
pub use error::{CallError, CritError, Result};
pub use finding::{
    parse_payload, ComparisonResult, Finding, Fragment, PairFailure, TokenUsage,
};
pub use index::{cosine_similarity, VectorIndex};
pub use pairs::{
    exhaustive_pair_count, exhaustive_pairs, neighbor_pairs, ChunkPair, Neighbor, PairStrategy,
    SimilaritySearch, DEFAULT_NEIGHBORS, EXHAUSTIVE_WARN_CHUNKS,
};
pub use reduce::{reduce, reduce_findings, resolve_findings, Reference, ResolvedFinding};
