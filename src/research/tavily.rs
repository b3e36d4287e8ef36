//! Tavily search backend.

use std::env;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde::{Deserialize, Serialize};

use crate::error::SearchError;
use crate::research::{SearchHit, SearchProvider};

const TAVILY_API_BASE: &str = "https://api.tavily.com";

/// Tavily-backed [`SearchProvider`].
pub struct TavilyClient {
    api_key: String,
    api_base: String,
    http_client: Client,
}

impl TavilyClient {
    /// Creates a client with an explicit API key.
    pub fn new(api_key: impl Into<String>) -> Self {
        Self {
            api_key: api_key.into(),
            api_base: TAVILY_API_BASE.to_string(),
            http_client: Client::builder()
                .timeout(Duration::from_secs(60))
                .build()
                .expect("Failed to build HTTP client"),
        }
    }

    /// Creates a client from the `TAVILY_API_KEY` environment variable.
    pub fn from_env() -> Result<Self, SearchError> {
        let api_key = env::var("TAVILY_API_KEY").map_err(|_| SearchError::MissingApiKey)?;
        Ok(Self::new(api_key))
    }

    /// Overrides the API base URL, for tests against a local server.
    pub fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

#[derive(Debug, Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    max_results: usize,
    search_depth: &'a str,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchResponseItem>,
}

#[derive(Debug, Deserialize)]
struct SearchResponseItem {
    #[serde(default)]
    title: String,
    url: String,
    #[serde(default)]
    content: String,
}

#[derive(Debug, Serialize)]
struct ExtractRequest<'a> {
    api_key: &'a str,
    urls: Vec<&'a str>,
}

#[derive(Debug, Deserialize)]
struct ExtractResponse {
    #[serde(default)]
    results: Vec<ExtractResponseItem>,
}

#[derive(Debug, Deserialize)]
struct ExtractResponseItem {
    #[serde(default)]
    raw_content: String,
}

#[async_trait]
impl SearchProvider for TavilyClient {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchHit>, SearchError> {
        let request = SearchRequest {
            api_key: &self.api_key,
            query,
            max_results,
            search_depth: "basic",
        };

        let response = self
            .http_client
            .post(format!("{}/search", self.api_base))
            .json(&request)
            .send()
            .await
            .map_err(|e| SearchError::RequestFailed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(SearchError::RequestFailed(format!(
                "Tavily search returned status {}",
                response.status()
            )));
        }

        let parsed: SearchResponse = response
            .json()
            .await
            .map_err(|e| SearchError::ParseError(e.to_string()))?;

        Ok(parsed
            .results
            .into_iter()
            .map(|item| SearchHit {
                title: item.title,
                url: item.url,
                content: item.content,
            })
            .collect())
    }

    async fn fetch(&self, url: &str) -> Result<String, SearchError> {
        let request = ExtractRequest {
            api_key: &self.api_key,
            urls: vec![url],
        };

        let response = self
            .http_client
            .post(format!("{}/extract", self.api_base))
            .json(&request)
            .send()
            .await
            .map_err(|e| SearchError::FetchFailed {
                url: url.to_string(),
                message: e.to_string(),
            })?;

        if !response.status().is_success() {
            return Err(SearchError::FetchFailed {
                url: url.to_string(),
                message: format!("status {}", response.status()),
            });
        }

        let parsed: ExtractResponse =
            response
                .json()
                .await
                .map_err(|e| SearchError::FetchFailed {
                    url: url.to_string(),
                    message: e.to_string(),
                })?;

        parsed
            .results
            .into_iter()
            .next()
            .map(|item| item.raw_content)
            .ok_or_else(|| SearchError::FetchFailed {
                url: url.to_string(),
                message: "empty extract response".to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_env_requires_key() {
        // Only assert behavior when the variable is absent in the test env.
        if env::var("TAVILY_API_KEY").is_err() {
            assert!(matches!(
                TavilyClient::from_env(),
                Err(SearchError::MissingApiKey)
            ));
        }
    }

    #[test]
    fn test_search_request_serialization() {
        let request = SearchRequest {
            api_key: "k",
            query: "pandas ValueError merge",
            max_results: 7,
            search_depth: "basic",
        };
        let json = serde_json::to_string(&request).expect("serialize");
        assert!(json.contains("pandas ValueError merge"));
        assert!(json.contains("\"max_results\":7"));
    }

    #[test]
    fn test_search_response_parsing() {
        let body = r#"{"results": [{"title": "t", "url": "https://x.dev", "content": "snippet"}], "query": "q"}"#;
        let parsed: SearchResponse = serde_json::from_str(body).expect("parse");
        assert_eq!(parsed.results.len(), 1);
        assert_eq!(parsed.results[0].url, "https://x.dev");
    }
}
