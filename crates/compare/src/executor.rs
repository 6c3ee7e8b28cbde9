use std::pin::pin;

use crit_core::{
    Chunk, ChunkPair, ChunkTable, ComparisonResult, CritError, PairFailure, Result,
};
use futures::stream::{self, StreamExt};
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rand::SeedableRng;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::comparator::Comparator;
use crate::retry::RetryPolicy;
use crate::usage::{UsageAccumulator, UsageTotals};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop at the first pair that cannot be compared.
    #[default]
    Abort,
    /// Keep going and report failed pairs next to the results.
    Record,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutorConfig {
    pub workers: usize,
    /// Compare only this many randomly chosen pairs.
    pub sample: Option<usize>,
    pub sample_seed: Option<u64>,
    pub failure_policy: FailurePolicy,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            sample: None,
            sample_seed: None,
            failure_policy: FailurePolicy::Abort,
        }
    }
}

impl ExecutorConfig {
    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(CritError::Config(
                "executor.workers must be at least 1".to_string(),
            ));
        }
        if self.sample == Some(0) {
            return Err(CritError::Config(
                "executor.sample must be positive when set".to_string(),
            ));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ExecutionReport {
    /// Pairs produced by the pairing strategy.
    pub planned: usize,
    /// Pairs actually submitted after sampling.
    pub executed: usize,
    pub results: Vec<ComparisonResult>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub failures: Vec<PairFailure>,
    pub usage: UsageTotals,
}

/// Runs comparisons for a list of pairs with at most `workers` calls in flight.
pub struct ComparisonExecutor<C> {
    comparator: C,
    config: ExecutorConfig,
    retry: RetryPolicy,
}

impl<C: Comparator> ComparisonExecutor<C> {
    pub fn new(comparator: C, config: ExecutorConfig, retry: RetryPolicy) -> Result<Self> {
        config.validate()?;
        retry.validate()?;
        Ok(Self {
            comparator,
            config,
            retry,
        })
    }

    pub fn comparator(&self) -> &C {
        &self.comparator
    }

    pub fn config(&self) -> &ExecutorConfig {
        &self.config
    }

    pub async fn run(
        &self,
        table: &ChunkTable,
        pairs: &[ChunkPair],
        usage: &UsageAccumulator,
    ) -> Result<ExecutionReport> {
        let selected = self.select(pairs.len());
        let mut jobs = Vec::with_capacity(selected.len());
        for index in selected {
            let pair = &pairs[index];
            let left = lookup(table, &pair.left)?;
            let right = lookup(table, &pair.right)?;
            jobs.push((index, left, right));
        }

        let total = jobs.len();
        info!(
            planned = pairs.len(),
            executed = total,
            workers = self.config.workers,
            "starting comparisons"
        );

        let comparator = &self.comparator;
        let retry = &self.retry;
        let pending = stream::iter(jobs.into_iter().enumerate().map(
            move |(ordinal, (index, left, right))| async move {
                info!("comparison {} of {}", ordinal + 1, total);
                let label = format!("{}:{}", left.id, right.id);
                let outcome = retry
                    .run(&label, move || comparator.compare(left, right))
                    .await;
                (index, left, right, outcome)
            },
        ))
        .buffer_unordered(self.config.workers);
        let mut pending = pin!(pending);

        let mut results = Vec::with_capacity(total);
        let mut failures = Vec::new();
        while let Some((index, left, right, outcome)) = pending.next().await {
            match outcome {
                Ok((reply, attempts)) => {
                    let totals = usage.record(reply.usage);
                    debug!(
                        pair = index,
                        left = %left.id,
                        right = %right.id,
                        findings = reply.findings.len(),
                        attempts,
                        "comparison finished"
                    );
                    info!(
                        calls = totals.calls,
                        input_tokens = totals.input_tokens,
                        output_tokens = totals.output_tokens,
                        cost = totals.cost,
                        "running usage"
                    );
                    results.push(ComparisonResult {
                        pair_index: index,
                        chunk1: left.clone(),
                        chunk2: right.clone(),
                        findings: reply.findings,
                        usage: reply.usage,
                        attempts,
                    });
                }
                Err(failure) => match self.config.failure_policy {
                    FailurePolicy::Abort => {
                        return Err(CritError::Comparison {
                            left: left.id.clone(),
                            right: right.id.clone(),
                            attempts: failure.attempts,
                            source: failure.error,
                        });
                    }
                    FailurePolicy::Record => {
                        warn!(
                            pair = index,
                            left = %left.id,
                            right = %right.id,
                            attempts = failure.attempts,
                            error = %failure.error,
                            "comparison failed, continuing"
                        );
                        failures.push(PairFailure {
                            pair_index: index,
                            left: left.id.clone(),
                            right: right.id.clone(),
                            attempts: failure.attempts,
                            reason: failure.error.to_string(),
                        });
                    }
                },
            }
        }

        results.sort_by_key(|result| result.pair_index);
        failures.sort_by_key(|failure| failure.pair_index);
        Ok(ExecutionReport {
            planned: pairs.len(),
            executed: total,
            results,
            failures,
            usage: usage.snapshot(),
        })
    }

    /// Indices of the pairs to submit, in their original order.
    fn select(&self, count: usize) -> Vec<usize> {
        let mut indices: Vec<usize> = (0..count).collect();
        let Some(limit) = self.config.sample else {
            return indices;
        };
        if limit >= count {
            return indices;
        }
        let mut rng = match self.config.sample_seed {
            Some(seed) => StdRng::seed_from_u64(seed),
            None => StdRng::from_entropy(),
        };
        indices.shuffle(&mut rng);
        indices.truncate(limit);
        indices.sort_unstable();
        info!(sampled = limit, of = count, "sampling pairs");
        indices
    }
}

fn lookup<'a>(table: &'a ChunkTable, id: &str) -> Result<&'a Chunk> {
    table
        .get(id)
        .ok_or_else(|| CritError::UnknownChunk(id.to_string()))
}
