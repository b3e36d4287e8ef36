//! Query-filter-crawl-condense research pipeline.

use std::collections::HashSet;
use std::sync::Arc;

use serde::Deserialize;
use tera::Context;

use crate::config::SynthesisConfig;
use crate::llm::{GenerationRequest, LlmProvider, Message};
use crate::prompts::{
    PromptLibrary, RESEARCH_CONDENSE_SYSTEM, RESEARCH_FILTER_SYSTEM, RESEARCH_QUERY_SYSTEM,
};
use crate::research::{SearchHit, SearchProvider};
use crate::stages::{with_llm_retry, StageError};
use crate::utils::extract_json;

#[derive(Debug, Deserialize)]
struct QuerySet {
    queries: Vec<String>,
}

#[derive(Debug, Deserialize)]
struct FilterSelection {
    #[serde(default)]
    selected_indexes: Vec<usize>,
}

/// Research pipeline turning an error summary into a remediation summary.
///
/// One round: generate queries, search, filter the merged results, fetch
/// the selected pages and condense them. When filtering selects nothing the
/// queries are regenerated, up to `max_query_rounds` rounds. A run that
/// never finds anything useful yields `None` rather than an error, so the
/// repair loop degrades to diagnosis-only feedback.
pub struct ResearchPipeline {
    provider: Arc<dyn LlmProvider>,
    search: Arc<dyn SearchProvider>,
    prompts: Arc<PromptLibrary>,
    model: String,
    retries: u32,
    max_query_rounds: u32,
    search_max_results: usize,
    max_fetched_pages: usize,
}

impl ResearchPipeline {
    pub fn new(
        provider: Arc<dyn LlmProvider>,
        search: Arc<dyn SearchProvider>,
        prompts: Arc<PromptLibrary>,
        config: &SynthesisConfig,
    ) -> Self {
        Self {
            provider,
            search,
            prompts,
            model: config.chat_model.clone(),
            retries: config.llm_retries,
            max_query_rounds: config.max_query_rounds,
            search_max_results: config.search_max_results,
            max_fetched_pages: config.max_fetched_pages,
        }
    }

    /// Researches an error and condenses findings into a summary.
    pub async fn research(
        &self,
        code: &str,
        error_summary: &str,
    ) -> Result<Option<String>, StageError> {
        for round in 1..=self.max_query_rounds {
            let queries = self.generate_queries(error_summary).await?;
            if queries.is_empty() {
                tracing::warn!(round, "Query generation produced no queries");
                continue;
            }

            let hits = self.run_searches(&queries).await;
            if hits.is_empty() {
                tracing::info!(round, "No search results, regenerating queries");
                continue;
            }

            let selected = self.filter_hits(error_summary, &hits).await?;
            if selected.is_empty() {
                tracing::info!(
                    round,
                    results = hits.len(),
                    "No relevant results, regenerating queries"
                );
                continue;
            }

            let pages = self.fetch_pages(&hits, &selected).await;
            let summary = self.condense(code, error_summary, &pages).await?;
            return Ok(Some(summary));
        }

        tracing::warn!("Research rounds exhausted without relevant results");
        Ok(None)
    }

    async fn generate_queries(&self, error_summary: &str) -> Result<Vec<String>, StageError> {
        let mut context = Context::new();
        context.insert("error_summary", error_summary);
        let user = self.prompts.render("research.queries", &context)?;

        let set: QuerySet = self
            .structured_call("research.queries", RESEARCH_QUERY_SYSTEM, &user)
            .await?;
        Ok(set.queries)
    }

    async fn run_searches(&self, queries: &[String]) -> Vec<SearchHit> {
        let mut seen = HashSet::new();
        let mut hits = Vec::new();

        for query in queries {
            match self.search.search(query, self.search_max_results).await {
                Ok(results) => {
                    for hit in results {
                        if seen.insert(hit.url.clone()) {
                            hits.push(hit);
                        }
                    }
                }
                Err(e) => {
                    tracing::warn!(query, error = %e, "Search query failed");
                }
            }
        }

        hits
    }

    async fn filter_hits(
        &self,
        error_summary: &str,
        hits: &[SearchHit],
    ) -> Result<Vec<usize>, StageError> {
        let results_text = hits
            .iter()
            .enumerate()
            .map(|(i, hit)| format!("[{}] {}\n{}\n{}", i, hit.title, hit.url, hit.content))
            .collect::<Vec<_>>()
            .join("\n\n");

        let mut context = Context::new();
        context.insert("error_summary", error_summary);
        context.insert("results", &results_text);
        let user = self.prompts.render("research.filter", &context)?;

        let selection: FilterSelection = self
            .structured_call("research.filter", RESEARCH_FILTER_SYSTEM, &user)
            .await?;

        Ok(selection
            .selected_indexes
            .into_iter()
            .filter(|&i| i < hits.len())
            .collect())
    }

    async fn fetch_pages(&self, hits: &[SearchHit], selected: &[usize]) -> Vec<String> {
        let mut pages = Vec::new();

        for &index in selected.iter().take(self.max_fetched_pages) {
            let hit = &hits[index];
            match self.search.fetch(&hit.url).await {
                Ok(content) => pages.push(format!("### {}\n{}", hit.url, content)),
                Err(e) => {
                    // Snippet still carries signal when the full page is unreachable.
                    tracing::warn!(url = %hit.url, error = %e, "Page fetch failed, using snippet");
                    pages.push(format!("### {}\n{}", hit.url, hit.content));
                }
            }
        }

        pages
    }

    async fn condense(
        &self,
        code: &str,
        error_summary: &str,
        pages: &[String],
    ) -> Result<String, StageError> {
        let mut context = Context::new();
        context.insert("code", code);
        context.insert("error_summary", error_summary);
        context.insert("pages", &pages.join("\n\n"));
        let user = self.prompts.render("research.condense", &context)?;

        with_llm_retry("research.condense", self.retries, || {
            let request = GenerationRequest::new(
                self.model.clone(),
                vec![
                    Message::system(RESEARCH_CONDENSE_SYSTEM),
                    Message::user(user.clone()),
                ],
            );

            async move {
                let response = self.provider.generate(request).await?;
                let content = response
                    .first_content()
                    .ok_or_else(|| StageError::MalformedResponse("empty completion".into()))?
                    .trim()
                    .to_string();

                if content.is_empty() {
                    return Err(StageError::MalformedResponse(
                        "empty remediation summary".into(),
                    ));
                }
                Ok(content)
            }
        })
        .await
    }

    async fn structured_call<T: for<'de> Deserialize<'de>>(
        &self,
        stage: &str,
        system: &str,
        user: &str,
    ) -> Result<T, StageError> {
        with_llm_retry(stage, self.retries, || {
            let request = GenerationRequest::new(
                self.model.clone(),
                vec![Message::system(system), Message::user(user)],
            );

            async move {
                let response = self.provider.generate(request).await?;
                let content = response
                    .first_content()
                    .ok_or_else(|| StageError::MalformedResponse("empty completion".into()))?;

                let json = extract_json(content)
                    .into_result(content)
                    .map_err(StageError::MalformedResponse)?;

                serde_json::from_str(&json).map_err(|e| {
                    StageError::MalformedResponse(format!("invalid {stage} response: {e}"))
                })
            }
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    use crate::error::SearchError;
    use crate::llm::MockLlmProvider;

    /// Search provider returning canned hits and pages.
    #[derive(Default)]
    struct MockSearchProvider {
        hits: Mutex<Vec<SearchHit>>,
        pages: Mutex<std::collections::HashMap<String, String>>,
        searches: AtomicUsize,
        fail_fetch: bool,
    }

    impl MockSearchProvider {
        fn with_hit(self, title: &str, url: &str, content: &str) -> Self {
            self.hits.lock().unwrap().push(SearchHit {
                title: title.to_string(),
                url: url.to_string(),
                content: content.to_string(),
            });
            self
        }

        fn with_page(self, url: &str, content: &str) -> Self {
            self.pages
                .lock()
                .unwrap()
                .insert(url.to_string(), content.to_string());
            self
        }
    }

    #[async_trait]
    impl SearchProvider for MockSearchProvider {
        async fn search(
            &self,
            _query: &str,
            _max_results: usize,
        ) -> Result<Vec<SearchHit>, SearchError> {
            self.searches.fetch_add(1, Ordering::SeqCst);
            Ok(self.hits.lock().unwrap().clone())
        }

        async fn fetch(&self, url: &str) -> Result<String, SearchError> {
            if self.fail_fetch {
                return Err(SearchError::FetchFailed {
                    url: url.to_string(),
                    message: "connection reset".to_string(),
                });
            }
            self.pages
                .lock()
                .unwrap()
                .get(url)
                .cloned()
                .ok_or_else(|| SearchError::FetchFailed {
                    url: url.to_string(),
                    message: "unknown url".to_string(),
                })
        }
    }

    fn pipeline(
        provider: Arc<MockLlmProvider>,
        search: Arc<MockSearchProvider>,
    ) -> ResearchPipeline {
        ResearchPipeline::new(
            provider,
            search,
            Arc::new(PromptLibrary::builtin().expect("library")),
            &SynthesisConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_full_round_produces_summary() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.push_response(r#"{"queries": ["scanpy concat var names mismatch"]}"#);
        provider.push_response(r#"{"selected_indexes": [0]}"#);
        provider.push_response("Use anndata.concat with join='outer'.");

        let search = Arc::new(
            MockSearchProvider::default()
                .with_hit("GH issue", "https://github.test/1", "concat fails")
                .with_page("https://github.test/1", "full discussion of the fix"),
        );

        let summary = pipeline(provider, search)
            .research("ad.concat(adatas)", "var names mismatch")
            .await
            .expect("research")
            .expect("summary");

        assert!(summary.contains("join='outer'"));
    }

    #[tokio::test]
    async fn test_empty_filter_regenerates_queries() {
        let provider = Arc::new(MockLlmProvider::new());
        // Round 1: queries, then empty selection.
        provider.push_response(r#"{"queries": ["first round"]}"#);
        provider.push_response(r#"{"selected_indexes": []}"#);
        // Round 2: new queries, a selection, and the condensed answer.
        provider.push_response(r#"{"queries": ["second round"]}"#);
        provider.push_response(r#"{"selected_indexes": [0]}"#);
        provider.push_response("Pin the library to 1.9.x.");

        let search = Arc::new(
            MockSearchProvider::default()
                .with_hit("forum", "https://forum.test/a", "snippet")
                .with_page("https://forum.test/a", "pin to 1.9.x"),
        );

        let summary = pipeline(provider, search.clone())
            .research("code", "version error")
            .await
            .expect("research")
            .expect("summary");

        assert!(summary.contains("1.9.x"));
        assert_eq!(search.searches.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_rounds_exhausted_yields_none() {
        let provider = Arc::new(MockLlmProvider::new());
        for _ in 0..SynthesisConfig::default().max_query_rounds {
            provider.push_response(r#"{"queries": ["q"]}"#);
            provider.push_response(r#"{"selected_indexes": []}"#);
        }

        let search =
            Arc::new(MockSearchProvider::default().with_hit("x", "https://x.test", "irrelevant"));

        let summary = pipeline(provider, search)
            .research("code", "error")
            .await
            .expect("research");

        assert!(summary.is_none());
    }

    #[tokio::test]
    async fn test_fetch_failure_falls_back_to_snippet() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.push_response(r#"{"queries": ["q"]}"#);
        provider.push_response(r#"{"selected_indexes": [0]}"#);
        provider.push_response("Summary built from the snippet.");

        let search = Arc::new(MockSearchProvider {
            fail_fetch: true,
            ..Default::default()
        });
        search.hits.lock().unwrap().push(SearchHit {
            title: "t".into(),
            url: "https://down.test".into(),
            content: "useful snippet".into(),
        });

        let summary = pipeline(provider.clone(), search)
            .research("code", "error")
            .await
            .expect("research")
            .expect("summary");

        assert!(summary.contains("snippet"));
        // The condense prompt saw the snippet in place of the page.
        let requests = provider.requests();
        let condense_user = &requests.last().unwrap().messages[1].content;
        assert!(condense_user.contains("useful snippet"));
    }

    #[tokio::test]
    async fn test_out_of_range_indexes_are_dropped() {
        let provider = Arc::new(MockLlmProvider::new());
        provider.push_response(r#"{"queries": ["q"]}"#);
        provider.push_response(r#"{"selected_indexes": [0, 9]}"#);
        provider.push_response("Done.");

        let search = Arc::new(
            MockSearchProvider::default()
                .with_hit("only", "https://one.test", "s")
                .with_page("https://one.test", "page body"),
        );

        let summary = pipeline(provider, search)
            .research("code", "error")
            .await
            .expect("research");

        assert!(summary.is_some());
    }
}
