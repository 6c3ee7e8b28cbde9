use std::io::Read;

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Extracted main content of one scraped page.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct ScrapedDocument {
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub title: Option<String>,
}

/// Scraper output: document identifier to content, `null` when the page had no main content.
///
/// Entries keep the order in which they appear in the source file so the chunk table and the
/// exhaustive pair list are reproducible between runs.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Corpus {
    documents: IndexMap<String, Option<ScrapedDocument>>,
}

impl Corpus {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_json_str(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn from_reader<R: Read>(reader: R) -> Result<Self> {
        Ok(serde_json::from_reader(reader)?)
    }

    pub fn insert(&mut self, document: impl Into<String>, content: Option<ScrapedDocument>) {
        self.documents.insert(document.into(), content);
    }

    pub fn len(&self) -> usize {
        self.documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    pub fn documents(&self) -> impl Iterator<Item = (&str, Option<&ScrapedDocument>)> {
        self.documents
            .iter()
            .map(|(id, content)| (id.as_str(), content.as_ref()))
    }

    /// Documents that carry non-empty text.
    pub fn present(&self) -> impl Iterator<Item = (&str, &ScrapedDocument)> {
        self.documents().filter_map(|(id, content)| {
            content
                .filter(|doc| !doc.text.is_empty())
                .map(|doc| (id, doc))
        })
    }
}
