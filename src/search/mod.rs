// src/search/mod.rs

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{BotError, BotResult};

pub mod filter;
pub mod vk;

pub use filter::{ExtensionFilter, filter};

/// Provider-assigned type of a search result.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ResultKind {
    Audio,
    Document,
}

/// One candidate item returned by the search provider.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResultDescriptor {
    /// Where the payload can be fetched from.
    pub locator: String,
    pub title: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub author: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_secs: Option<u32>,
    /// File extension as reported by the provider, e.g. `pdf`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub format: Option<String>,
    pub kind: ResultKind,
}

impl ResultDescriptor {
    pub fn audio(
        locator: impl Into<String>,
        title: impl Into<String>,
        author: Option<String>,
        duration_secs: Option<u32>,
    ) -> Self {
        Self {
            locator: locator.into(),
            title: title.into(),
            author,
            duration_secs,
            format: Some("mp3".into()),
            kind: ResultKind::Audio,
        }
    }

    pub fn document(
        locator: impl Into<String>,
        title: impl Into<String>,
        format: impl Into<String>,
    ) -> Self {
        Self {
            locator: locator.into(),
            title: title.into(),
            author: None,
            duration_secs: None,
            format: Some(format.into()),
            kind: ResultKind::Document,
        }
    }

    /// `author - title` when an author is known, the bare title otherwise.
    pub fn display_name(&self) -> String {
        match self.author.as_deref().map(str::trim) {
            Some(author) if !author.is_empty() => format!("{} - {}", author, self.title),
            _ => self.title.clone(),
        }
    }
}

/// A user query plus the policy deciding how many results get delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchQuery {
    pub text: String,
    /// Upper bound on delivered results.
    pub limit: usize,
    /// How many raw results to request when a filter is expected to discard some.
    pub overfetch: usize,
    pub filter: Option<ExtensionFilter>,
}

impl SearchQuery {
    pub fn audio(text: impl Into<String>, limit: usize) -> Self {
        Self {
            text: text.into(),
            limit,
            overfetch: limit,
            filter: None,
        }
    }

    pub fn documents(
        text: impl Into<String>,
        limit: usize,
        overfetch: usize,
        filter: ExtensionFilter,
    ) -> Self {
        Self {
            text: text.into(),
            limit,
            overfetch,
            filter: Some(filter),
        }
    }

    /// Number of raw results to ask the provider for.
    pub fn request_count(&self) -> usize {
        match self.filter {
            Some(_) => self.overfetch.max(self.limit),
            None => self.limit,
        }
    }
}

/// Remote search backend. Implementations rely on an authenticated
/// provider session injected at construction time.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search_audio(&self, query: &str, count: usize) -> BotResult<Vec<ResultDescriptor>>;

    /// The provider does not filter by type; callers filter locally.
    async fn search_documents(&self, query: &str, count: usize)
    -> BotResult<Vec<ResultDescriptor>>;
}

/// Runs `query` against `provider`, filters and truncates the raw results.
///
/// Returns `NoResults` when nothing survives (or the query is blank) and
/// passes provider failures through untouched.
pub async fn run_query(
    provider: &dyn SearchProvider,
    kind: ResultKind,
    query: &SearchQuery,
) -> BotResult<Vec<ResultDescriptor>> {
    let text = query.text.trim();
    if text.is_empty() || query.limit == 0 {
        return Err(BotError::NoResults(text.to_string()));
    }

    let count = query.request_count();
    let raw = match kind {
        ResultKind::Audio => provider.search_audio(text, count).await?,
        ResultKind::Document => provider.search_documents(text, count).await?,
    };
    let raw_len = raw.len();

    let selected = match &query.filter {
        Some(allowed) => filter(raw, |d| allowed.allows(d), query.limit),
        None => filter(raw, |_| true, query.limit),
    };
    debug!(query = text, ?kind, raw = raw_len, selected = selected.len(), "search finished");

    if selected.is_empty() {
        return Err(BotError::NoResults(text.to_string()));
    }
    Ok(selected)
}
