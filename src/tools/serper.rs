use crate::error::ProviderError;
use crate::models::{
    SearchHits, SearchQuery, SearchResult, SerperSearchRequest, SerperSearchResponse,
};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, instrument};

#[async_trait]
pub trait SearchProvider: Send + Sync {
    async fn search(&self, query: &SearchQuery) -> Result<SearchHits, ProviderError>;
}

/// Google search through serper.dev.
#[derive(Debug, Clone)]
pub struct SerperSearch {
    http: reqwest::Client,
    api_key: String,
    endpoint: String,
    timeout: Duration,
}

impl SerperSearch {
    pub fn new(http: reqwest::Client, api_key: &str, endpoint: &str, timeout: Duration) -> Self {
        Self {
            http,
            api_key: api_key.to_string(),
            endpoint: endpoint.to_string(),
            timeout,
        }
    }
}

#[async_trait]
impl SearchProvider for SerperSearch {
    #[instrument(skip(self), fields(query = %query.text))]
    async fn search(&self, query: &SearchQuery) -> Result<SearchHits, ProviderError> {
        let request = SerperSearchRequest {
            q: query.text.clone(),
            num: query.limit.unwrap_or(10),
        };

        let response = self
            .http
            .post(&self.endpoint)
            .header("X-API-KEY", &self.api_key)
            .json(&request)
            .send()
            .await
            .map_err(|e| ProviderError::from_reqwest(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::from_status(status, body));
        }

        let parsed: SerperSearchResponse = response
            .json()
            .await
            .map_err(|e| ProviderError::Decode(e.to_string()))?;

        let results: Vec<SearchResult> = parsed
            .organic
            .into_iter()
            .filter(|r| !r.link.trim().is_empty())
            .map(|r| SearchResult {
                title: if r.title.trim().is_empty() {
                    "No title".to_string()
                } else {
                    r.title
                },
                url: r.link,
                snippet: r.snippet,
            })
            .collect();
        debug!("search returned {} results", results.len());

        Ok(SearchHits {
            results,
            related_queries: parsed.related_searches.into_iter().map(|r| r.query).collect(),
        })
    }
}
