use serde::{Deserialize, Serialize};

use crate::chunk::ChunkTable;
use crate::error::{CritError, Result};
use crate::finding::{ComparisonResult, Finding};

/// A quotation attributed to the document it came from.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Reference {
    pub document: String,
    #[serde(default)]
    pub title: String,
    pub quotation: String,
}

/// Finding with chunk IDs resolved to documents, as consumed by the report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResolvedFinding {
    pub rationale: String,
    pub references: Vec<Reference>,
}

/// Concatenates the findings of every result, in result order then finding order.
/// Identical rationales from different pairs are kept.
pub fn reduce_findings(results: &[ComparisonResult]) -> Vec<Finding> {
    results
        .iter()
        .flat_map(|result| result.findings.iter().cloned())
        .collect()
}

pub fn resolve_findings(findings: &[Finding], table: &ChunkTable) -> Result<Vec<ResolvedFinding>> {
    findings
        .iter()
        .map(|finding| {
            let references = finding
                .fragments
                .iter()
                .map(|fragment| {
                    let chunk = table
                        .get(&fragment.chunk_id)
                        .ok_or_else(|| CritError::UnknownChunk(fragment.chunk_id.clone()))?;
                    Ok(Reference {
                        document: chunk.document.clone(),
                        title: chunk.title.clone(),
                        quotation: fragment.quotation.clone(),
                    })
                })
                .collect::<Result<Vec<_>>>()?;
            Ok(ResolvedFinding {
                rationale: finding.rationale.clone(),
                references,
            })
        })
        .collect()
}

pub fn reduce(results: &[ComparisonResult], table: &ChunkTable) -> Result<Vec<ResolvedFinding>> {
    resolve_findings(&reduce_findings(results), table)
}
