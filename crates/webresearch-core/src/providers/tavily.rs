//! Tavily web-search backend.

use std::time::Duration;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tracing::debug;

use super::SearchProvider;
use crate::config::SearchConfig;
use crate::error::SearchBackendError;
use crate::model::SearchResult;
use crate::security::SecretValue;

pub struct TavilySearch {
    client: reqwest::Client,
    base_url: String,
    api_key: SecretValue,
    search_depth: String,
}

#[derive(Serialize)]
struct SearchRequest<'a> {
    api_key: &'a str,
    query: &'a str,
    search_depth: &'a str,
    max_results: usize,
    include_raw_content: bool,
}

#[derive(Deserialize)]
struct SearchResponse {
    #[serde(default)]
    results: Vec<SearchHit>,
}

#[derive(Deserialize)]
struct SearchHit {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    url: Option<String>,
    #[serde(default)]
    content: Option<String>,
    #[serde(default)]
    score: Option<f64>,
}

impl From<SearchHit> for SearchResult {
    fn from(hit: SearchHit) -> Self {
        Self {
            title: hit
                .title
                .filter(|title| !title.trim().is_empty())
                .unwrap_or_else(|| "No title".to_string()),
            url: hit.url.unwrap_or_default(),
            content: hit.content.unwrap_or_default(),
            score: hit.score,
        }
    }
}

impl TavilySearch {
    pub fn new(
        config: &SearchConfig,
        api_key: SecretValue,
        timeout: Duration,
    ) -> Result<Self, SearchBackendError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|err| SearchBackendError::Transport(err.to_string()))?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            api_key,
            search_depth: config.search_depth.clone(),
        })
    }
}

#[async_trait]
impl SearchProvider for TavilySearch {
    async fn search(
        &self,
        query: &str,
        max_results: usize,
    ) -> Result<Vec<SearchResult>, SearchBackendError> {
        let url = format!("{}/search", self.base_url);
        let request = SearchRequest {
            api_key: self.api_key.expose(),
            query,
            search_depth: &self.search_depth,
            max_results,
            include_raw_content: true,
        };

        debug!(%query, max_results, "querying tavily");

        let response = self
            .client
            .post(&url)
            .json(&request)
            .send()
            .await
            .map_err(|err| SearchBackendError::Transport(err.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SearchBackendError::Status {
                status: status.as_u16(),
                body,
            });
        }

        let payload: SearchResponse = response
            .json()
            .await
            .map_err(|err| SearchBackendError::Decode(err.to_string()))?;

        let results: Vec<SearchResult> = payload
            .results
            .into_iter()
            .take(max_results)
            .map(SearchResult::from)
            .collect();
        debug!(%query, found = results.len(), "tavily search complete");
        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_partial_json, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client_for(server: &MockServer) -> TavilySearch {
        let config = SearchConfig {
            base_url: server.uri(),
            ..SearchConfig::default()
        };
        TavilySearch::new(&config, SecretValue::new("tvly-test"), Duration::from_secs(5))
            .expect("client builds")
    }

    #[tokio::test]
    async fn maps_hits_and_fills_missing_titles() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/search"))
            .and(body_partial_json(json!({
                "api_key": "tvly-test",
                "query": "photosynthesis",
                "search_depth": "basic",
                "max_results": 3,
                "include_raw_content": true
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "results": [
                    { "title": "Photosynthesis", "url": "https://a.example", "content": "light", "score": 0.9 },
                    { "url": "https://b.example", "content": "chlorophyll" }
                ]
            })))
            .expect(1)
            .mount(&server)
            .await;

        let results = client_for(&server)
            .search("photosynthesis", 3)
            .await
            .expect("search succeeds");

        assert_eq!(results.len(), 2);
        assert_eq!(results[0].score, Some(0.9));
        assert_eq!(results[1].title, "No title");
        assert_eq!(results[1].score, None);
    }

    #[tokio::test]
    async fn empty_payload_is_empty_list() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({})))
            .mount(&server)
            .await;

        let results = client_for(&server).search("nothing", 3).await.unwrap();
        assert!(results.is_empty());
    }

    #[tokio::test]
    async fn server_error_maps_to_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500).set_body_string("upstream down"))
            .mount(&server)
            .await;

        let err = client_for(&server).search("q", 3).await.unwrap_err();
        assert!(matches!(err, SearchBackendError::Status { status: 500, .. }));
    }
}
