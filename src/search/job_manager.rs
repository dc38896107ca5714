//! Search job lifecycle management.
//!
//! Owns job creation, the PENDING→RUNNING→{COMPLETED,FAILED,CANCELLED,TIMEOUT}
//! state machine, and the cancel-flag map used to implement cancel-on-detach.
//! Mirrors a poll-and-mark job queue (mark_running/mark_completed/mark_failed)
//! plus a cancel-flag registry keyed by job id.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use tracing::{info, warn};

use crate::config::CoreConfig;
use crate::domain::models::{JobId, NormalizedQuery, SearchJob, SearchStatus, SearchWindow};
use crate::error::{CoreError, FailureCode, FailureReason, Result};
use crate::events::EventBus;
use crate::repository::SearchJobRepository;
use crate::search::fanout::{run_fanout, CorpusAdapter, SearchAdapter};
use crate::search::normalizer;

pub struct SearchJobManager {
    repo: Arc<dyn SearchJobRepository>,
    events: EventBus,
    config: CoreConfig,
    corpus_adapter: Arc<CorpusAdapter>,
    external_adapters: Vec<Arc<dyn SearchAdapter>>,
    cancel_flags: Arc<DashMap<JobId, Arc<AtomicBool>>>,
}

pub struct SearchJobHandle {
    pub job_id: JobId,
    pub status: SearchStatus,
}

impl SearchJobManager {
    pub fn new(
        repo: Arc<dyn SearchJobRepository>,
        events: EventBus,
        config: CoreConfig,
        corpus_adapter: Arc<CorpusAdapter>,
        external_adapters: Vec<Arc<dyn SearchAdapter>>,
    ) -> Self {
        Self {
            repo,
            events,
            config,
            corpus_adapter,
            external_adapters,
            cancel_flags: Arc::new(DashMap::new()),
        }
    }

    fn cancel_flag(&self, job_id: &JobId) -> Arc<AtomicBool> {
        self.cancel_flags
            .entry(job_id.clone())
            .or_insert_with(|| Arc::new(AtomicBool::new(false)))
            .clone()
    }

    pub fn cancel(&self, job_id: &JobId) {
        self.cancel_flag(job_id).store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self, job_id: &JobId) -> bool {
        self.cancel_flags
            .get(job_id)
            .is_some_and(|f| f.load(Ordering::Relaxed))
    }

    /// Forces a non-terminal job straight to TIMEOUT, bypassing whatever
    /// fan-out is still in flight. Called by the sweeper once a job has
    /// outlived its overall deadline; in-flight adapter tasks are left to
    /// finish but their results are discarded via the cancel flag.
    pub async fn force_timeout(&self, job_id: &JobId) -> Result<()> {
        self.cancel(job_id);
        let changed = self
            .repo
            .update_status(
                job_id,
                SearchStatus::Timeout,
                Some(FailureReason::new(FailureCode::TimeoutJobOverall)),
            )
            .await?;
        if changed {
            self.events
                .append(
                    job_id,
                    crate::domain::models::EventType::Error,
                    serde_json::json!({"status": "timeout", "code": "timeout_job_overall"}),
                )
                .await;
            warn!(%job_id, "search job exceeded its overall timeout");
        }
        Ok(())
    }

    pub async fn get_status(&self, job_id: &JobId) -> Result<SearchJob> {
        self.repo
            .get(job_id)
            .await?
            .ok_or_else(|| CoreError::JobNotFound(job_id.clone()))
    }

    /// Normalizes the query first so that an invalid request never creates a
    /// job record — validation happens before any state exists.
    pub async fn create_job(
        self: &Arc<Self>,
        query: String,
        window: SearchWindow,
        priority_urls: Vec<String>,
    ) -> Result<SearchJobHandle> {
        let normalized = normalizer::normalize(&query, &window)?;

        let job = SearchJob::new(query, window, priority_urls);
        self.repo.create(&job).await?;
        self.events.create_journal(&job.job_id);

        let job_id = job.job_id.clone();
        let status = job.status;

        let this = Arc::clone(self);
        tokio::spawn(async move {
            this.run_job(job_id, normalized).await;
        });

        Ok(SearchJobHandle {
            job_id: job.job_id,
            status,
        })
    }

    async fn run_job(&self, job_id: JobId, query: NormalizedQuery) {
        let cancel_flag = self.cancel_flag(&job_id);

        if !self
            .repo
            .update_status(&job_id, SearchStatus::Running, None)
            .await
            .unwrap_or(false)
        {
            warn!(%job_id, "search job was no longer pending at dispatch time");
            return;
        }

        let mut adapters: Vec<Arc<dyn SearchAdapter>> = vec![self.corpus_adapter.clone()];
        adapters.extend(self.external_adapters.iter().cloned());

        let outcome = run_fanout(
            &job_id,
            &query,
            adapters,
            &self.events,
            self.config.search_per_source_timeout,
            cancel_flag.clone(),
        )
        .await;

        let (final_status, failure_reason) = if cancel_flag.load(Ordering::Relaxed) {
            (SearchStatus::Cancelled, Some(FailureReason::new(FailureCode::Cancelled)))
        } else if outcome.any_non_empty {
            (SearchStatus::Completed, None)
        } else {
            (SearchStatus::Failed, outcome.failure_reason)
        };

        match self
            .repo
            .update_status(&job_id, final_status, failure_reason)
            .await
        {
            Ok(true) => info!(%job_id, status = final_status.as_str(), "search job finished"),
            Ok(false) => warn!(%job_id, "search job already terminal (likely timed out by sweeper)"),
            Err(e) => warn!(%job_id, error = %e, "failed to persist final search job status"),
        }

        self.cancel_flags.remove(&job_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::repository::sqlite::{SqliteArticleRepository, SqliteSearchJobRepository};
    use crate::search::corpus::CorpusSearch;
    use crate::test_utils::{insert_sample_article, setup_test_db};
    use std::time::Duration;
    use tokio::time::sleep;

    async fn build_manager() -> (Arc<SearchJobManager>, sqlx::SqlitePool) {
        let pool = setup_test_db().await;
        let repo = Arc::new(SqliteSearchJobRepository::new(pool.clone()));
        let corpus = CorpusSearch::new(Arc::new(SqliteArticleRepository::new(pool.clone())));
        let corpus_adapter = Arc::new(CorpusAdapter::new(corpus, 20));
        let manager = Arc::new(SearchJobManager::new(
            repo,
            EventBus::new(256),
            CoreConfig::default(),
            corpus_adapter,
            vec![],
        ));
        (manager, pool)
    }

    #[tokio::test]
    async fn empty_query_never_creates_a_job() {
        let (manager, _pool) = build_manager().await;
        let err = manager
            .create_job("   ".into(), SearchWindow::Unbounded, vec![])
            .await
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidQuery(_)));
    }

    #[tokio::test]
    async fn job_completes_when_corpus_has_a_hit() {
        let (manager, pool) = build_manager().await;
        insert_sample_article(&pool, "bitcoin surges", "bitcoin price moved today").await;

        let handle = manager
            .create_job("bitcoin".into(), SearchWindow::Unbounded, vec![])
            .await
            .unwrap();
        assert_eq!(handle.status, SearchStatus::Pending);

        for _ in 0..20 {
            let job = manager.get_status(&handle.job_id).await.unwrap();
            if job.status.is_terminal() {
                assert_eq!(job.status, SearchStatus::Completed);
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("job did not reach a terminal state in time");
    }

    #[tokio::test]
    async fn job_fails_when_corpus_is_empty_and_no_adapters_enabled() {
        let (manager, _pool) = build_manager().await;
        let handle = manager
            .create_job("nonexistent-topic".into(), SearchWindow::Unbounded, vec![])
            .await
            .unwrap();

        for _ in 0..20 {
            let job = manager.get_status(&handle.job_id).await.unwrap();
            if job.status.is_terminal() {
                assert_eq!(job.status, SearchStatus::Failed);
                return;
            }
            sleep(Duration::from_millis(20)).await;
        }
        panic!("job did not reach a terminal state in time");
    }
}
