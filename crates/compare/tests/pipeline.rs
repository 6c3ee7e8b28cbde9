use std::sync::atomic::{AtomicU32, AtomicUsize, Ordering};
use std::time::Duration;

use crit_compare::{
    vector_pairs, Comparator, ComparatorReply, ComparisonExecutor, EmbeddingClient,
    EmbeddingStore, ExecutorConfig, FailurePolicy, PricingRate, RetryPolicy, UsageAccumulator,
};
use crit_core::{
    count_tokens, exhaustive_pairs, reduce, CallError, Chunk, ChunkConfig, ChunkPair, ChunkTable,
    Chunker, Corpus, CritError, Embedder, Finding, Fragment, ScrapedDocument, TokenUsage,
};
use tempfile::tempdir;

const FRANCE: &str = "Paris is the capital of France. Lyon is the capital of France.";

fn instant_retry() -> RetryPolicy {
    RetryPolicy {
        unit_ms: 0,
        ..RetryPolicy::default()
    }
}

fn accumulator() -> UsageAccumulator {
    UsageAccumulator::new(PricingRate {
        prompt_per_1k: 1.0,
        completion_per_1k: 2.0,
    })
}

fn usage() -> TokenUsage {
    TokenUsage {
        input_tokens: 100,
        output_tokens: 10,
    }
}

fn contradiction(left: &Chunk, right: &Chunk) -> Finding {
    Finding {
        rationale: format!("{}|{}", left.id, right.id),
        fragments: vec![
            Fragment {
                chunk_id: left.id.clone(),
                quotation: left.text.trim().to_string(),
            },
            Fragment {
                chunk_id: right.id.clone(),
                quotation: right.text.trim().to_string(),
            },
        ],
    }
}

/// Reports a contradiction for every pair of distinct chunks.
struct DistinctPairs;

impl Comparator for DistinctPairs {
    async fn compare(&self, left: &Chunk, right: &Chunk) -> Result<ComparatorReply, CallError> {
        let findings = if left.id == right.id {
            Vec::new()
        } else {
            vec![contradiction(left, right)]
        };
        Ok(ComparatorReply {
            findings,
            usage: usage(),
        })
    }
}

/// Fails transiently a fixed number of times per pair, then answers.
struct Flaky {
    failures: u32,
    calls: AtomicU32,
}

impl Comparator for Flaky {
    async fn compare(&self, _left: &Chunk, _right: &Chunk) -> Result<ComparatorReply, CallError> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) + 1;
        if call <= self.failures {
            return Err(CallError::Transient(format!("429 on call {call}")));
        }
        Ok(ComparatorReply {
            findings: Vec::new(),
            usage: usage(),
        })
    }
}

/// Fails one specific pair with a malformed payload.
struct MalformedFor {
    bad: ChunkPair,
    calls: AtomicU32,
}

impl Comparator for MalformedFor {
    async fn compare(&self, left: &Chunk, right: &Chunk) -> Result<ComparatorReply, CallError> {
        if left.id == self.bad.left && right.id == self.bad.right {
            self.calls.fetch_add(1, Ordering::SeqCst);
            return Err(CallError::Malformed("expected value at line 1".to_string()));
        }
        Ok(ComparatorReply {
            findings: Vec::new(),
            usage: usage(),
        })
    }
}

/// Sleeps a pair-dependent time so completions come back out of order.
struct Jittery {
    in_flight: AtomicUsize,
    peak: AtomicUsize,
}

impl Comparator for Jittery {
    async fn compare(&self, left: &Chunk, right: &Chunk) -> Result<ComparatorReply, CallError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
        let delay = (left.id.len() + right.text.len()) % 7 + 1;
        tokio::time::sleep(Duration::from_millis(delay as u64)).await;
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(ComparatorReply {
            findings: vec![contradiction(left, right)],
            usage: usage(),
        })
    }
}

fn france_table() -> ChunkTable {
    let tokens = count_tokens(FRANCE);
    let chunker = Chunker::new(ChunkConfig {
        chunk_size: tokens.div_ceil(2),
        overlap: 0,
    })
    .unwrap();
    let mut corpus = Corpus::new();
    corpus.insert(
        "france.html",
        Some(ScrapedDocument {
            text: FRANCE.to_string(),
            title: Some("France".to_string()),
        }),
    );
    chunker.chunk_corpus(&corpus)
}

fn policy_table() -> ChunkTable {
    let corpus = Corpus::from_json_str(
        r#"{
            "refunds.html": {"text": "Refunds are issued within 30 days of purchase.", "title": "Refunds"},
            "returns.html": {"text": "Items may be returned for a refund within 90 days.", "title": "Returns"},
            "shipping.html": {"text": "Orders ship within two business days.", "title": "Shipping"},
            "support.html": {"text": "Support is available on weekdays from 9 to 5.", "title": "Support"},
            "empty.html": null
        }"#,
    )
    .unwrap();
    Chunker::new(ChunkConfig::default())
        .unwrap()
        .chunk_corpus(&corpus)
}

#[tokio::test]
async fn two_chunk_document_yields_one_reduced_finding() {
    let table = france_table();
    assert_eq!(table.len(), 2);
    let pairs = exhaustive_pairs(&table);
    assert_eq!(pairs.len(), 3);
    assert_eq!(pairs.iter().filter(|pair| pair.is_self_pair()).count(), 2);

    let executor =
        ComparisonExecutor::new(DistinctPairs, ExecutorConfig::default(), instant_retry()).unwrap();
    let usage = accumulator();
    let report = executor.run(&table, &pairs, &usage).await.unwrap();
    assert_eq!(report.results.len(), 3);
    assert_eq!(report.usage.calls, 3);

    let findings = reduce(&report.results, &table).unwrap();
    assert_eq!(findings.len(), 1);
    let references = &findings[0].references;
    assert_eq!(references.len(), 2);
    assert!(references.iter().all(|r| r.document == "france.html"));
    assert!(references[0].quotation.contains("Paris"));
    assert!(references[1].quotation.ends_with("capital of France."));
}

#[tokio::test]
async fn five_transient_failures_still_count_once() {
    let table = france_table();
    let pairs = vec![ChunkPair::new(
        table.ids().next().unwrap(),
        table.ids().next().unwrap(),
    )];
    let executor = ComparisonExecutor::new(
        Flaky {
            failures: 5,
            calls: AtomicU32::new(0),
        },
        ExecutorConfig::default(),
        instant_retry(),
    )
    .unwrap();
    let usage = accumulator();
    let report = executor.run(&table, &pairs, &usage).await.unwrap();
    assert_eq!(report.results[0].attempts, 6);
    let totals = usage.snapshot();
    assert_eq!(totals.calls, 1);
    assert_eq!(totals.input_tokens, 100);
    assert_eq!(totals.output_tokens, 10);
    assert!((totals.cost - 0.12).abs() < 1e-9);
}

#[tokio::test]
async fn six_transient_failures_abort_without_usage() {
    let table = france_table();
    let pairs = exhaustive_pairs(&table);
    let executor = ComparisonExecutor::new(
        Flaky {
            failures: u32::MAX,
            calls: AtomicU32::new(0),
        },
        ExecutorConfig {
            workers: 1,
            ..ExecutorConfig::default()
        },
        instant_retry(),
    )
    .unwrap();
    let usage = accumulator();
    let err = executor.run(&table, &pairs, &usage).await.unwrap_err();
    match err {
        CritError::Comparison {
            attempts, source, ..
        } => {
            assert_eq!(attempts, 6);
            assert!(matches!(source, CallError::Transient(_)));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(usage.snapshot().calls, 0);
}

#[tokio::test]
async fn malformed_payload_fails_the_pair_without_retry() {
    let table = policy_table();
    let pairs = exhaustive_pairs(&table);
    let bad = pairs[1].clone();
    let comparator = MalformedFor {
        bad: bad.clone(),
        calls: AtomicU32::new(0),
    };
    let executor =
        ComparisonExecutor::new(comparator, ExecutorConfig::default(), instant_retry()).unwrap();
    let err = executor
        .run(&table, &pairs, &accumulator())
        .await
        .unwrap_err();
    match err {
        CritError::Comparison {
            left,
            right,
            attempts,
            source,
        } => {
            assert_eq!((left, right), (bad.left, bad.right));
            assert_eq!(attempts, 1);
            assert!(matches!(source, CallError::Malformed(_)));
        }
        other => panic!("unexpected error {other:?}"),
    }
    assert_eq!(executor.comparator().calls.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn record_policy_keeps_going_past_failed_pairs() {
    let table = policy_table();
    let pairs = exhaustive_pairs(&table);
    let bad = pairs[3].clone();
    let executor = ComparisonExecutor::new(
        MalformedFor {
            bad: bad.clone(),
            calls: AtomicU32::new(0),
        },
        ExecutorConfig {
            failure_policy: FailurePolicy::Record,
            ..ExecutorConfig::default()
        },
        instant_retry(),
    )
    .unwrap();
    let usage = accumulator();
    let report = executor.run(&table, &pairs, &usage).await.unwrap();
    assert_eq!(report.executed, pairs.len());
    assert_eq!(report.results.len(), pairs.len() - 1);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].pair_index, 3);
    assert_eq!(report.failures[0].left, bad.left);
    assert_eq!(usage.snapshot().calls as usize, pairs.len() - 1);
}

#[tokio::test]
async fn concurrent_results_keep_pair_attribution_and_order() {
    let table = policy_table();
    assert_eq!(table.len(), 4);
    let pairs = exhaustive_pairs(&table);
    let comparator = Jittery {
        in_flight: AtomicUsize::new(0),
        peak: AtomicUsize::new(0),
    };
    let executor = ComparisonExecutor::new(
        comparator,
        ExecutorConfig {
            workers: 3,
            ..ExecutorConfig::default()
        },
        instant_retry(),
    )
    .unwrap();
    let usage = accumulator();
    let report = executor.run(&table, &pairs, &usage).await.unwrap();

    assert_eq!(report.results.len(), pairs.len());
    for (index, result) in report.results.iter().enumerate() {
        assert_eq!(result.pair_index, index);
        assert_eq!(result.chunk1.id, pairs[index].left);
        assert_eq!(result.chunk2.id, pairs[index].right);
        assert_eq!(
            result.findings[0].rationale,
            format!("{}|{}", result.chunk1.id, result.chunk2.id)
        );
    }
    assert_eq!(usage.snapshot().calls as usize, pairs.len());
}

#[tokio::test]
async fn worker_count_bounds_calls_in_flight() {
    let table = policy_table();
    let pairs = exhaustive_pairs(&table);
    let executor = ComparisonExecutor::new(
        Jittery {
            in_flight: AtomicUsize::new(0),
            peak: AtomicUsize::new(0),
        },
        ExecutorConfig {
            workers: 2,
            ..ExecutorConfig::default()
        },
        instant_retry(),
    )
    .unwrap();
    executor.run(&table, &pairs, &accumulator()).await.unwrap();
    let peak = executor.comparator().peak.load(Ordering::SeqCst);
    assert!((1..=2).contains(&peak), "peak {peak}");
    assert_eq!(executor.comparator().in_flight.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn sampling_caps_executed_pairs() {
    let table = policy_table();
    let pairs = exhaustive_pairs(&table);
    let config = ExecutorConfig {
        sample: Some(4),
        sample_seed: Some(11),
        ..ExecutorConfig::default()
    };
    let executor = ComparisonExecutor::new(DistinctPairs, config, instant_retry()).unwrap();
    let first = executor.run(&table, &pairs, &accumulator()).await.unwrap();
    let second = executor.run(&table, &pairs, &accumulator()).await.unwrap();
    assert_eq!(first.planned, pairs.len());
    assert_eq!(first.executed, 4);
    assert_eq!(first.results.len(), 4);
    let indices: Vec<usize> = first.results.iter().map(|r| r.pair_index).collect();
    let again: Vec<usize> = second.results.iter().map(|r| r.pair_index).collect();
    assert_eq!(indices, again);
    assert!(indices.windows(2).all(|w| w[0] < w[1]));
}

#[tokio::test]
async fn unknown_pair_members_are_rejected_before_any_call() {
    let table = france_table();
    let pairs = vec![ChunkPair::new("deadbeef", "deadbeef")];
    let executor =
        ComparisonExecutor::new(DistinctPairs, ExecutorConfig::default(), instant_retry()).unwrap();
    let usage = accumulator();
    let err = executor.run(&table, &pairs, &usage).await.unwrap_err();
    assert!(matches!(err, CritError::UnknownChunk(id) if id == "deadbeef"));
    assert_eq!(usage.snapshot().calls, 0);
}

#[test]
fn cached_vectors_are_reused_across_runs() {
    let dir = tempdir().unwrap();
    let table = policy_table();
    let client = EmbeddingClient::hash();
    let store = EmbeddingStore::open(dir.path().join("embeddings.sqlite")).unwrap();

    let first = vector_pairs(&table, &client, Some(&store), 2, &instant_retry(), 3).unwrap();
    assert_eq!(store.count(&client.model_id()).unwrap(), table.len());
    let second = vector_pairs(&table, &client, Some(&store), 2, &instant_retry(), 3).unwrap();
    assert_eq!(first, second);
    assert!(first.len() <= table.len() * 2);
    assert!(first.iter().all(|pair| pair.left < pair.right));
}
