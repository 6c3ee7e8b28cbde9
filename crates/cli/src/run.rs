use std::fs::File;
use std::io::BufReader;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use chrono::{Local, Utc};
use crit_compare::{
    vector_pairs, ComparisonExecutor, EmbeddingClient, EmbeddingStore, ExecutionReport,
    LlmClient, LlmComparator, PromptTemplate, UsageAccumulator, UsageTotals,
};
use crit_core::{
    exhaustive_pair_count, exhaustive_pairs, reduce, ChunkPair, ChunkTable, Chunker, Corpus,
    PairStrategy, ResolvedFinding, EXHAUSTIVE_WARN_CHUNKS,
};
use serde::Serialize;
use tokio::runtime::Runtime;
use tracing::{info, warn};

use crate::artifacts::{write_json, write_text, RunArtifacts};
use crate::config::CritConfig;
use crate::report::render_report;

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub chunks: usize,
    pub planned: usize,
    pub executed: usize,
    pub failures: usize,
    pub findings: usize,
    pub usage: UsageTotals,
    pub results_path: PathBuf,
    pub findings_path: Option<PathBuf>,
    pub report_path: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ChunkSummary {
    pub documents: usize,
    pub skipped: usize,
    pub chunks: usize,
    pub duplicates: usize,
    pub exhaustive_pairs: usize,
}

/// Full run: chunk, pair, compare, persist results, reduce, persist findings, render a report.
pub fn compare(config: &CritConfig, input: &Path) -> Result<RunSummary> {
    config.validate()?;
    let corpus = load_corpus(input)?;
    let table = Chunker::new(config.chunking)?.chunk_corpus(&corpus);
    let pairs = plan_pairs(config, &table)?;

    let provider = config.llm.provider()?;
    let model = config.llm.model(provider);
    let client = LlmClient::new(provider, model.clone())
        .with_context(|| format!("failed to configure {} client", provider.as_str()))?;
    let template = match &config.llm.prompt {
        Some(path) => PromptTemplate::from_file(path)?,
        None => PromptTemplate::default(),
    };
    let executor = ComparisonExecutor::new(
        LlmComparator::new(client, template),
        config.executor.clone(),
        config.retry,
    )?;
    let usage = UsageAccumulator::new(config.pricing.rate_for(provider.as_str(), &model));
    info!(provider = provider.as_str(), model = %model, "comparator ready");

    let runtime = Runtime::new().context("failed to start tokio runtime")?;
    let artifacts = RunArtifacts::new(&config.output.dir, Utc::now().timestamp());
    run_pipeline(
        &table,
        &pairs,
        &artifacts,
        |table, pairs| Ok(runtime.block_on(executor.run(table, pairs, &usage))?),
        write_report,
    )
}

fn run_pipeline<FExec, FRender>(
    table: &ChunkTable,
    pairs: &[ChunkPair],
    artifacts: &RunArtifacts,
    execute: FExec,
    render: FRender,
) -> Result<RunSummary>
where
    FExec: FnOnce(&ChunkTable, &[ChunkPair]) -> Result<ExecutionReport>,
    FRender: FnOnce(&[ResolvedFinding], &Path) -> Result<()>,
{
    let report = execute(table, pairs)?;
    let results_path = artifacts.results_path();
    write_json(&results_path, &report)?;
    info!(path = %results_path.display(), results = report.results.len(), "comparison results saved");
    if !report.failures.is_empty() {
        warn!(failed = report.failures.len(), "some pairs could not be compared");
    }

    let findings = reduce(&report.results, table)?;
    let mut summary = RunSummary {
        chunks: table.len(),
        planned: report.planned,
        executed: report.executed,
        failures: report.failures.len(),
        findings: findings.len(),
        usage: report.usage,
        results_path,
        findings_path: None,
        report_path: None,
    };
    if findings.is_empty() {
        info!("No contradictions found");
        return Ok(summary);
    }
    info!("Found {} contradiction(s)", findings.len());

    let findings_path = artifacts.findings_path();
    write_json(&findings_path, &findings)?;
    let report_path = artifacts.report_path();
    render(&findings, &report_path)?;
    info!(path = %report_path.display(), "report generated");
    summary.findings_path = Some(findings_path);
    summary.report_path = Some(report_path);
    Ok(summary)
}

/// Chunks the corpus and counts pairs without calling any external service.
pub fn chunks(config: &CritConfig, input: &Path, out: Option<&Path>) -> Result<ChunkSummary> {
    config.chunking.validate()?;
    let corpus = load_corpus(input)?;
    let table = Chunker::new(config.chunking)?.chunk_corpus(&corpus);
    if table.len() > EXHAUSTIVE_WARN_CHUNKS {
        warn!(
            chunks = table.len(),
            "exhaustive pairing is quadratic; consider the vector strategy"
        );
    }
    if let Some(out) = out {
        let chunks: Vec<_> = table.iter().collect();
        write_json(out, &chunks)?;
        info!(path = %out.display(), "chunk table saved");
    }
    let present = corpus.present().count();
    Ok(ChunkSummary {
        documents: corpus.len(),
        skipped: corpus.len() - present,
        chunks: table.len(),
        duplicates: table.duplicate_count(),
        exhaustive_pairs: exhaustive_pair_count(table.len()),
    })
}

/// Re-renders a report from a findings file written by an earlier run.
pub fn report(config: &CritConfig, findings: &Path, out: Option<PathBuf>) -> Result<PathBuf> {
    let file = File::open(findings)
        .with_context(|| format!("failed to open findings {}", findings.display()))?;
    let findings: Vec<ResolvedFinding> = serde_json::from_reader(BufReader::new(file))
        .context("invalid findings file")?;
    let path = out.unwrap_or_else(|| {
        RunArtifacts::new(&config.output.dir, Utc::now().timestamp()).report_path()
    });
    write_report(&findings, &path)?;
    Ok(path)
}

fn plan_pairs(config: &CritConfig, table: &ChunkTable) -> Result<Vec<ChunkPair>> {
    match config.pairing {
        PairStrategy::Exhaustive => {
            if table.len() > EXHAUSTIVE_WARN_CHUNKS {
                warn!(
                    chunks = table.len(),
                    pairs = exhaustive_pair_count(table.len()),
                    "exhaustive pairing is quadratic; consider the vector strategy"
                );
            }
            Ok(exhaustive_pairs(table))
        }
        PairStrategy::Vector { neighbors } => {
            let client = EmbeddingClient::from_config(&config.embedding)?;
            let store = config
                .embedding
                .cache
                .as_ref()
                .map(EmbeddingStore::open)
                .transpose()?;
            Ok(vector_pairs(
                table,
                &client,
                store.as_ref(),
                neighbors,
                &config.retry,
                client.batch_size(),
            )?)
        }
    }
}

fn load_corpus(input: &Path) -> Result<Corpus> {
    let file =
        File::open(input).with_context(|| format!("failed to open corpus {}", input.display()))?;
    let corpus = Corpus::from_reader(BufReader::new(file))
        .with_context(|| format!("invalid corpus {}", input.display()))?;
    info!(documents = corpus.len(), path = %input.display(), "corpus loaded");
    Ok(corpus)
}

fn write_report(findings: &[ResolvedFinding], path: &Path) -> Result<()> {
    let generated = Local::now().format("%B %d, %Y").to_string();
    write_text(path, &render_report(findings, &generated))
}
