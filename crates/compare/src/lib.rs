pub mod comparator;
pub mod embedding;
pub mod executor;
pub mod pricing;
pub mod retry;
pub mod store;
pub mod usage;
pub mod vector;

pub use comparator::{Comparator, ComparatorReply, LlmComparator, PromptTemplate, DEFAULT_PROMPT};
pub use embedding::{EmbeddingClient, EmbeddingConfig};
pub use executor::{ComparisonExecutor, ExecutionReport, ExecutorConfig, FailurePolicy};
pub use pricing::{PricingConfig, PricingEntry, PricingRate};
pub use retry::{RetryFailure, RetryPolicy};
pub use store::EmbeddingStore;
pub use usage::{UsageAccumulator, UsageTotals};
pub use vector::vector_pairs;
pub use crit_llm::{LlmClient, LlmProvider, LlmRequest, LlmResponse};
