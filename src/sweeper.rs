//! The background timeout/retention loop.
//!
//! Polls on a fixed interval, the same shape as a poll-loop job queue but
//! with three sweeps per tick instead of one dequeue: stale in-progress
//! sub-tasks, jobs past their overall deadline, and terminal rows past the
//! retention window.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::config::CoreConfig;
use crate::deep::orchestrator::DeepSearchOrchestrator;
use crate::domain::models::AiSubTaskStatus;
use crate::error::{FailureCode, FailureReason, Result};
use crate::repository::{AiJobRepository, AiSubTaskRepository, SearchJobRepository};
use crate::search::job_manager::SearchJobManager;

pub struct Sweeper {
    search_jobs: Arc<dyn SearchJobRepository>,
    ai_jobs: Arc<dyn AiJobRepository>,
    ai_sub_tasks: Arc<dyn AiSubTaskRepository>,
    search_manager: Arc<SearchJobManager>,
    orchestrator: Arc<DeepSearchOrchestrator>,
    config: CoreConfig,
}

impl Sweeper {
    pub fn new(
        search_jobs: Arc<dyn SearchJobRepository>,
        ai_jobs: Arc<dyn AiJobRepository>,
        ai_sub_tasks: Arc<dyn AiSubTaskRepository>,
        search_manager: Arc<SearchJobManager>,
        orchestrator: Arc<DeepSearchOrchestrator>,
        config: CoreConfig,
    ) -> Self {
        Self {
            search_jobs,
            ai_jobs,
            ai_sub_tasks,
            search_manager,
            orchestrator,
            config,
        }
    }

    /// Spawns the sweep loop; returns its handle so callers can abort it on shutdown.
    pub fn spawn(self: Arc<Self>) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(self.config.sweeper_interval);
            loop {
                ticker.tick().await;
                if let Err(e) = self.run_once().await {
                    warn!(error = %e, "sweep pass failed");
                }
            }
        })
    }

    /// Runs one sweep pass: timeout stale sub-tasks, timeout overdue jobs,
    /// purge terminal rows past retention. Each stage is independent; a
    /// failure in one does not skip the others.
    pub async fn run_once(&self) -> Result<()> {
        let now = Utc::now();

        let subtask_cutoff = now
            - chrono::Duration::from_std(self.config.deep_per_subtask_timeout).unwrap_or_default();
        let stale_subtasks = self.ai_sub_tasks.list_stale_in_progress(subtask_cutoff).await?;
        let mut affected_jobs = HashSet::new();
        for task in &stale_subtasks {
            self.ai_sub_tasks
                .fail(
                    &task.sub_task_id,
                    AiSubTaskStatus::Timeout,
                    "sub-task exceeded its per-subtask timeout".into(),
                    FailureReason::new(FailureCode::TimeoutPerSubtask),
                )
                .await?;
            affected_jobs.insert(task.job_id.clone());
        }
        if !stale_subtasks.is_empty() {
            info!(count = stale_subtasks.len(), "timed out stale sub-tasks");
        }
        for job_id in &affected_jobs {
            self.orchestrator.recompute_parent(job_id).await?;
        }

        let deep_cutoff =
            now - chrono::Duration::from_std(self.config.deep_overall_timeout).unwrap_or_default();
        let overdue_ai_jobs = self.ai_jobs.list_non_terminal_older_than(deep_cutoff).await?;
        for job in &overdue_ai_jobs {
            self.orchestrator.force_timeout(&job.job_id).await?;
        }
        if !overdue_ai_jobs.is_empty() {
            info!(count = overdue_ai_jobs.len(), "timed out overdue deep-search jobs");
        }

        let search_cutoff =
            now - chrono::Duration::from_std(self.config.search_overall_timeout).unwrap_or_default();
        let overdue_search_jobs = self.search_jobs.list_non_terminal_older_than(search_cutoff).await?;
        for job in &overdue_search_jobs {
            self.search_manager.force_timeout(&job.job_id).await?;
        }
        if !overdue_search_jobs.is_empty() {
            info!(count = overdue_search_jobs.len(), "timed out overdue search jobs");
        }

        let retention_cutoff =
            now - chrono::Duration::from_std(self.config.retention_window).unwrap_or_default();
        let purged_search = self.search_jobs.purge_terminal_older_than(retention_cutoff).await?;
        let purged_ai = self.ai_jobs.purge_terminal_older_than(retention_cutoff).await?;
        if purged_search > 0 || purged_ai > 0 {
            info!(purged_search, purged_ai, "purged terminal jobs past retention window");
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::{AiSubTask, SearchJob, SearchWindow};
    use crate::events::EventBus;
    use crate::repository::sqlite::{
        SqliteAiJobRepository, SqliteAiSubTaskRepository, SqliteSearchJobRepository,
    };
    use crate::search::corpus::CorpusSearch;
    use crate::search::fanout::CorpusAdapter;
    use crate::test_utils::setup_test_db;
    use std::time::Duration;

    #[tokio::test]
    async fn sweep_times_out_stale_subtasks_and_recomputes_parent() {
        let pool = setup_test_db().await;
        let ai_jobs: Arc<dyn AiJobRepository> = Arc::new(SqliteAiJobRepository::new(pool.clone()));
        let ai_sub_tasks: Arc<dyn AiSubTaskRepository> =
            Arc::new(SqliteAiSubTaskRepository::new(pool.clone()));
        let search_jobs: Arc<dyn SearchJobRepository> =
            Arc::new(SqliteSearchJobRepository::new(pool.clone()));

        let job = crate::domain::models::AiJob::new("topic".into(), None);
        ai_jobs.create(&job).await.unwrap();
        let mut task = AiSubTask::new(job.job_id.clone(), "p1".into(), "evidence_gather".into(), "h".into());
        task.status = AiSubTaskStatus::InProgress;
        task.created_at = Utc::now() - chrono::Duration::hours(2);
        ai_sub_tasks.create(&task).await.unwrap();
        ai_sub_tasks.mark_in_progress(&task.sub_task_id).await.unwrap();

        let orchestrator = Arc::new(DeepSearchOrchestrator::new(
            ai_jobs.clone(),
            ai_sub_tasks.clone(),
            EventBus::new(256),
            CoreConfig::default(),
            vec![],
            "https://callbacks.test".into(),
        ));

        let corpus = CorpusSearch::new(Arc::new(crate::repository::sqlite::SqliteArticleRepository::new(pool.clone())));
        let corpus_adapter = Arc::new(CorpusAdapter::new(corpus, 20));
        let search_manager = Arc::new(SearchJobManager::new(
            search_jobs.clone(),
            EventBus::new(256),
            CoreConfig::default(),
            corpus_adapter,
            vec![],
        ));

        let mut config = CoreConfig::default();
        config.deep_per_subtask_timeout = Duration::from_secs(60);

        let sweeper = Sweeper::new(
            search_jobs,
            ai_jobs.clone(),
            ai_sub_tasks.clone(),
            search_manager,
            orchestrator,
            config,
        );

        sweeper.run_once().await.unwrap();

        let updated = ai_sub_tasks.get(&task.sub_task_id).await.unwrap().unwrap();
        assert_eq!(updated.status, AiSubTaskStatus::Timeout);

        let job_after = ai_jobs.get(&job.job_id).await.unwrap().unwrap();
        assert!(job_after.overall_status.is_terminal());
    }

    #[tokio::test]
    async fn sweep_purges_old_terminal_search_jobs() {
        let pool = setup_test_db().await;
        let search_jobs: Arc<dyn SearchJobRepository> =
            Arc::new(SqliteSearchJobRepository::new(pool.clone()));
        let ai_jobs: Arc<dyn AiJobRepository> = Arc::new(SqliteAiJobRepository::new(pool.clone()));
        let ai_sub_tasks: Arc<dyn AiSubTaskRepository> =
            Arc::new(SqliteAiSubTaskRepository::new(pool.clone()));

        let mut job = SearchJob::new("bitcoin".into(), SearchWindow::Unbounded, vec![]);
        job.status = crate::domain::models::SearchStatus::Completed;
        search_jobs.create(&job).await.unwrap();
        search_jobs
            .update_status(&job.job_id, crate::domain::models::SearchStatus::Completed, None)
            .await
            .unwrap();

        let corpus = CorpusSearch::new(Arc::new(crate::repository::sqlite::SqliteArticleRepository::new(pool.clone())));
        let corpus_adapter = Arc::new(CorpusAdapter::new(corpus, 20));
        let search_manager = Arc::new(SearchJobManager::new(
            search_jobs.clone(),
            EventBus::new(256),
            CoreConfig::default(),
            corpus_adapter,
            vec![],
        ));
        let orchestrator = Arc::new(DeepSearchOrchestrator::new(
            ai_jobs.clone(),
            ai_sub_tasks.clone(),
            EventBus::new(256),
            CoreConfig::default(),
            vec![],
            "https://callbacks.test".into(),
        ));

        let mut config = CoreConfig::default();
        config.retention_window = Duration::from_millis(1);
        tokio::time::sleep(Duration::from_millis(5)).await;

        let sweeper = Sweeper::new(search_jobs.clone(), ai_jobs, ai_sub_tasks, search_manager, orchestrator, config);
        sweeper.run_once().await.unwrap();

        assert!(search_jobs.get(&job.job_id).await.unwrap().is_none());
    }
}
