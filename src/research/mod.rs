//! Web research for error remediation.
//!
//! When diagnosis decides an error is worth researching, the pipeline
//! generates search queries, filters results, fetches the promising pages
//! and condenses them into a remediation summary for the repair prompt.
//! Search backends implement [`SearchProvider`]; production uses Tavily.

pub mod pipeline;
pub mod tavily;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::SearchError;

pub use pipeline::ResearchPipeline;
pub use tavily::TavilyClient;

/// One search result.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchHit {
    /// Page title.
    pub title: String,
    /// Page URL.
    pub url: String,
    /// Snippet or summary returned by the search backend.
    pub content: String,
}

/// Search and page-fetch backend.
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// Runs one search query.
    async fn search(&self, query: &str, max_results: usize)
        -> Result<Vec<SearchHit>, SearchError>;

    /// Fetches the readable content of one page.
    async fn fetch(&self, url: &str) -> Result<String, SearchError>;
}
