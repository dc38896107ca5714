//! External source fan-out.
//!
//! Dispatches the corpus search and every enabled external adapter
//! concurrently, each under its own deadline, and emits one `partial_result`
//! or `source_error` event per source as it completes — in completion order,
//! not source order. Partial failure never fails the job; the job only
//! fails if every source comes back empty or erroring.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio::task::JoinSet;
use tokio::time::timeout;

use crate::domain::models::{EventType, JobId, NormalizedQuery};
use crate::error::{classify, FailureReason};
use crate::events::EventBus;
use crate::search::corpus::CorpusSearch;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchItem {
    pub title: String,
    pub url: String,
    pub snippet: String,
    pub source: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PartialResult {
    pub source: String,
    pub items: Vec<SearchItem>,
    pub took_ms: u64,
}

#[derive(Debug, Clone)]
pub enum AdapterError {
    Timeout,
    Failed(String),
}

impl AdapterError {
    fn failure_reason(&self) -> FailureReason {
        match self {
            AdapterError::Timeout => FailureReason::new(crate::error::FailureCode::TimeoutPerSource),
            AdapterError::Failed(msg) => classify(msg),
        }
    }

    fn message(&self) -> String {
        match self {
            AdapterError::Timeout => "per-source deadline exceeded".to_string(),
            AdapterError::Failed(msg) => msg.clone(),
        }
    }
}

/// A pluggable external search source. Mirrors the strategy-trait shape used
/// for page auditors: one method the fan-out calls, one id for attribution.
#[async_trait]
pub trait SearchAdapter: Send + Sync {
    fn id(&self) -> &str;
    async fn fetch(
        &self,
        query: &NormalizedQuery,
        deadline: Instant,
    ) -> std::result::Result<PartialResult, AdapterError>;
}

/// Wraps the corpus search as a `SearchAdapter` so it fans out alongside
/// external sources uniformly.
pub struct CorpusAdapter {
    corpus: CorpusSearch,
    page_size: u32,
}

impl CorpusAdapter {
    pub fn new(corpus: CorpusSearch, page_size: u32) -> Self {
        Self { corpus, page_size }
    }
}

#[async_trait]
impl SearchAdapter for CorpusAdapter {
    fn id(&self) -> &str {
        "corpus"
    }

    async fn fetch(
        &self,
        query: &NormalizedQuery,
        _deadline: Instant,
    ) -> std::result::Result<PartialResult, AdapterError> {
        let started = Instant::now();
        let page = self
            .corpus
            .search(query, 0, self.page_size)
            .await
            .map_err(|e| AdapterError::Failed(e.to_string()))?;

        let items = page
            .items
            .into_iter()
            .map(|a| SearchItem {
                title: a.title,
                url: a.url,
                snippet: a.content.chars().take(240).collect(),
                source: "corpus".to_string(),
            })
            .collect();

        Ok(PartialResult {
            source: "corpus".to_string(),
            items,
            took_ms: started.elapsed().as_millis() as u64,
        })
    }
}

pub struct FanoutOutcome {
    pub successful_sources: usize,
    pub failed_sources: usize,
    /// Whether at least one source returned a non-empty result. A source
    /// that answers without error but with zero items does not, by itself,
    /// make the job COMPLETED.
    pub any_non_empty: bool,
    pub failure_reason: Option<FailureReason>,
}

fn canonicalize_url(url: &str) -> String {
    url::Url::parse(url)
        .map(|mut u| {
            u.set_fragment(None);
            u.to_string()
        })
        .unwrap_or_else(|_| url.to_string())
}

/// Runs the fan-out: emits `connected`, dispatches every adapter concurrently, emits a
/// `partial_result`/`source_error` per source as it completes, then a single
/// terminal event — `done` if at least one source returned a non-empty
/// result, `error` (carrying the last failure's code/category) otherwise.
/// `cancel_flag` is checked before each dispatch; adapters already in flight
/// are left to finish but their results are discarded once cancelled.
pub async fn run_fanout(
    job_id: &JobId,
    query: &NormalizedQuery,
    adapters: Vec<Arc<dyn SearchAdapter>>,
    events: &EventBus,
    per_source_timeout: Duration,
    cancel_flag: Arc<AtomicBool>,
) -> FanoutOutcome {
    events
        .append(job_id, EventType::Connected, serde_json::json!({}))
        .await;

    if cancel_flag.load(Ordering::Relaxed) {
        return FanoutOutcome {
            successful_sources: 0,
            failed_sources: 0,
            any_non_empty: false,
            failure_reason: Some(FailureReason::new(crate::error::FailureCode::Cancelled)),
        };
    }

    let deadline = Instant::now() + per_source_timeout;
    let mut tasks = JoinSet::new();
    for adapter in adapters {
        let query = query.clone();
        tasks.spawn(async move {
            let id = adapter.id().to_string();
            let result = timeout(per_source_timeout, adapter.fetch(&query, deadline)).await;
            match result {
                Ok(Ok(partial)) => (id, Ok(partial)),
                Ok(Err(e)) => (id, Err(e)),
                Err(_) => (id, Err(AdapterError::Timeout)),
            }
        });
    }

    let mut seen_urls: HashSet<String> = HashSet::new();
    let mut successful = 0usize;
    let mut failed = 0usize;
    let mut any_non_empty = false;
    let mut last_failure: Option<FailureReason> = None;

    // `join_next` resolves tasks in completion order, not spawn order, so
    // events are emitted as each source actually finishes.
    while let Some(joined) = tasks.join_next().await {
        let (source, outcome) = match joined {
            Ok(pair) => pair,
            Err(_) => continue, // adapter task panicked; treated as silently dropped
        };

        if cancel_flag.load(Ordering::Relaxed) {
            continue;
        }

        match outcome {
            Ok(mut partial) => {
                partial.items.retain(|item| {
                    let canon = canonicalize_url(&item.url);
                    seen_urls.insert(canon)
                });
                successful += 1;
                if !partial.items.is_empty() {
                    any_non_empty = true;
                }
                events
                    .append(
                        job_id,
                        EventType::PartialResult,
                        serde_json::to_value(&partial).unwrap_or_default(),
                    )
                    .await;
            }
            Err(err) => {
                failed += 1;
                let reason = err.failure_reason();
                last_failure = Some(reason);
                events
                    .append(
                        job_id,
                        EventType::SourceError,
                        serde_json::json!({
                            "source": source,
                            "code": reason.code.as_str(),
                            "message": err.message(),
                        }),
                    )
                    .await;
            }
        }
    }

    let failure_reason = if !any_non_empty {
        Some(last_failure.unwrap_or_else(|| FailureReason::new(crate::error::FailureCode::Unknown)))
    } else {
        None
    };

    if let Some(reason) = failure_reason {
        events
            .append(
                job_id,
                EventType::Error,
                serde_json::json!({
                    "status": "failed",
                    "code": reason.code.as_str(),
                    "category": format!("{:?}", reason.category).to_lowercase(),
                    "summary": "no source returned any results",
                }),
            )
            .await;
    } else {
        events
            .append(
                job_id,
                EventType::Done,
                serde_json::json!({
                    "successful": successful,
                    "failed": failed,
                    "total": successful + failed,
                }),
            )
            .await;
    }

    FanoutOutcome {
        successful_sources: successful,
        failed_sources: failed,
        any_non_empty,
        failure_reason,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::QueryMode;

    struct OkAdapter(&'static str);
    #[async_trait]
    impl SearchAdapter for OkAdapter {
        fn id(&self) -> &str {
            self.0
        }
        async fn fetch(
            &self,
            _query: &NormalizedQuery,
            _deadline: Instant,
        ) -> std::result::Result<PartialResult, AdapterError> {
            Ok(PartialResult {
                source: self.0.to_string(),
                items: vec![SearchItem {
                    title: "t".into(),
                    url: format!("https://example.com/{}", self.0),
                    snippet: "s".into(),
                    source: self.0.to_string(),
                }],
                took_ms: 1,
            })
        }
    }

    struct FailingAdapter(&'static str);
    #[async_trait]
    impl SearchAdapter for FailingAdapter {
        fn id(&self) -> &str {
            self.0
        }
        async fn fetch(
            &self,
            _query: &NormalizedQuery,
            _deadline: Instant,
        ) -> std::result::Result<PartialResult, AdapterError> {
            Err(AdapterError::Failed("service unavailable (503)".into()))
        }
    }

    fn nq() -> NormalizedQuery {
        NormalizedQuery {
            q: "bitcoin".into(),
            since: None,
            until: None,
            mode: QueryMode::Fts,
        }
    }

    #[tokio::test]
    async fn one_failing_source_does_not_fail_the_job() {
        let events = EventBus::new(256);
        let job_id = crate::domain::models::new_job_id();
        let adapters: Vec<Arc<dyn SearchAdapter>> =
            vec![Arc::new(OkAdapter("a")), Arc::new(FailingAdapter("b"))];

        let outcome = run_fanout(
            &job_id,
            &nq(),
            adapters,
            &events,
            Duration::from_secs(5),
            Arc::new(AtomicBool::new(false)),
        )
        .await;

        assert_eq!(outcome.successful_sources, 1);
        assert_eq!(outcome.failed_sources, 1);
        assert!(outcome.failure_reason.is_none());
    }

    #[tokio::test]
    async fn all_sources_failing_yields_a_failure_reason() {
        let events = EventBus::new(256);
        let job_id = crate::domain::models::new_job_id();
        let adapters: Vec<Arc<dyn SearchAdapter>> =
            vec![Arc::new(FailingAdapter("a")), Arc::new(FailingAdapter("b"))];

        let outcome = run_fanout(
            &job_id,
            &nq(),
            adapters,
            &events,
            Duration::from_secs(5),
            Arc::new(AtomicBool::new(false)),
        )
        .await;

        assert_eq!(outcome.successful_sources, 0);
        assert!(outcome.failure_reason.is_some());

        let journal = events.journal(&job_id).unwrap();
        let all = journal.subscribe(None).await;
        assert_eq!(all.last().unwrap().event_type, EventType::Error);
    }

    #[tokio::test]
    async fn duplicate_urls_across_sources_are_deduplicated() {
        struct DupAdapter(&'static str, &'static str);
        #[async_trait]
        impl SearchAdapter for DupAdapter {
            fn id(&self) -> &str {
                self.0
            }
            async fn fetch(
                &self,
                _query: &NormalizedQuery,
                _deadline: Instant,
            ) -> std::result::Result<PartialResult, AdapterError> {
                Ok(PartialResult {
                    source: self.0.to_string(),
                    items: vec![SearchItem {
                        title: "t".into(),
                        url: self.1.to_string(),
                        snippet: "s".into(),
                        source: self.0.to_string(),
                    }],
                    took_ms: 1,
                })
            }
        }

        let events = EventBus::new(256);
        let job_id = crate::domain::models::new_job_id();
        let adapters: Vec<Arc<dyn SearchAdapter>> = vec![
            Arc::new(DupAdapter("a", "https://example.com/x#frag1")),
            Arc::new(DupAdapter("b", "https://example.com/x#frag2")),
        ];

        let outcome = run_fanout(
            &job_id,
            &nq(),
            adapters,
            &events,
            Duration::from_secs(5),
            Arc::new(AtomicBool::new(false)),
        )
        .await;

        // Both sources "succeed" at the source level; dedup happens on items.
        assert_eq!(outcome.successful_sources, 2);
    }

    #[tokio::test]
    async fn emits_connected_then_done_with_aggregate_counts() {
        let events = EventBus::new(256);
        let job_id = crate::domain::models::new_job_id();
        let adapters: Vec<Arc<dyn SearchAdapter>> = vec![Arc::new(OkAdapter("a"))];

        run_fanout(
            &job_id,
            &nq(),
            adapters,
            &events,
            Duration::from_secs(5),
            Arc::new(AtomicBool::new(false)),
        )
        .await;

        let journal = events.journal(&job_id).unwrap();
        let all = journal.subscribe(None).await;
        assert_eq!(all.first().unwrap().event_type, EventType::Connected);
        assert_eq!(all.last().unwrap().event_type, EventType::Done);
    }

    #[tokio::test]
    async fn partial_results_emit_in_completion_order_not_spawn_order() {
        struct DelayedAdapter {
            id: &'static str,
            delay: Duration,
        }
        #[async_trait]
        impl SearchAdapter for DelayedAdapter {
            fn id(&self) -> &str {
                self.id
            }
            async fn fetch(
                &self,
                _query: &NormalizedQuery,
                _deadline: Instant,
            ) -> std::result::Result<PartialResult, AdapterError> {
                tokio::time::sleep(self.delay).await;
                Ok(PartialResult {
                    source: self.id.to_string(),
                    items: vec![SearchItem {
                        title: "t".into(),
                        url: format!("https://example.com/{}", self.id),
                        snippet: "s".into(),
                        source: self.id.to_string(),
                    }],
                    took_ms: 1,
                })
            }
        }

        let events = EventBus::new(256);
        let job_id = crate::domain::models::new_job_id();
        // Spawned slow-then-fast; completion order should be reversed.
        let adapters: Vec<Arc<dyn SearchAdapter>> = vec![
            Arc::new(DelayedAdapter { id: "slow", delay: Duration::from_millis(80) }),
            Arc::new(DelayedAdapter { id: "fast", delay: Duration::from_millis(5) }),
        ];

        run_fanout(
            &job_id,
            &nq(),
            adapters,
            &events,
            Duration::from_secs(5),
            Arc::new(AtomicBool::new(false)),
        )
        .await;

        let journal = events.journal(&job_id).unwrap();
        let all = journal.subscribe(None).await;
        let sources: Vec<String> = all
            .iter()
            .filter(|e| e.event_type == EventType::PartialResult)
            .map(|e| e.data["source"].as_str().unwrap().to_string())
            .collect();
        assert_eq!(sources, vec!["fast", "slow"]);
    }
}
