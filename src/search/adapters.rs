//! A concrete external `SearchAdapter`: a JSON search API reachable over HTTP.
//!
//! Most deployments register at least one of these alongside the corpus
//! adapter. The shape (base URL + API key + a small response DTO) is
//! intentionally generic so it covers most hosted search APIs without this
//! core depending on any particular vendor.

use std::time::Instant;

use async_trait::async_trait;
use serde::Deserialize;

use crate::domain::models::NormalizedQuery;
use crate::search::fanout::{AdapterError, PartialResult, SearchAdapter, SearchItem};

#[derive(Debug, Deserialize)]
struct ApiResponse {
    results: Vec<ApiResultItem>,
}

#[derive(Debug, Deserialize)]
struct ApiResultItem {
    title: String,
    url: String,
    #[serde(default)]
    snippet: String,
}

/// Calls a hosted JSON search API over HTTP. `source_id` is what gets
/// attributed on emitted `SearchItem`s and in `source_error` events.
pub struct HttpSearchAdapter {
    source_id: String,
    base_url: String,
    api_key: Option<String>,
    client: reqwest::Client,
}

impl HttpSearchAdapter {
    pub fn new(source_id: impl Into<String>, base_url: impl Into<String>, api_key: Option<String>) -> Self {
        Self {
            source_id: source_id.into(),
            base_url: base_url.into(),
            api_key,
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl SearchAdapter for HttpSearchAdapter {
    fn id(&self) -> &str {
        &self.source_id
    }

    async fn fetch(
        &self,
        query: &NormalizedQuery,
        _deadline: Instant,
    ) -> std::result::Result<PartialResult, AdapterError> {
        let started = Instant::now();
        let mut request = self.client.get(&self.base_url).query(&[("q", query.q.as_str())]);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| AdapterError::Failed(e.to_string()))?;

        if !response.status().is_success() {
            return Err(AdapterError::Failed(format!(
                "{} responded with status {}",
                self.source_id,
                response.status()
            )));
        }

        let parsed: ApiResponse = response
            .json()
            .await
            .map_err(|e| AdapterError::Failed(format!("invalid response body: {e}")))?;

        let items = parsed
            .results
            .into_iter()
            .map(|r| SearchItem {
                title: r.title,
                url: r.url,
                snippet: r.snippet,
                source: self.source_id.clone(),
            })
            .collect();

        Ok(PartialResult {
            source: self.source_id.clone(),
            items,
            took_ms: started.elapsed().as_millis() as u64,
        })
    }
}
