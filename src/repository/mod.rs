//! Persistence ports. Each trait is the contract a component depends on;
//! `sqlite/` holds the one SQLite-backed implementation of each.

pub mod sqlite;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::domain::models::{
    AiJob, AiOverallStatus, AiSubTask, AiSubTaskStatus, Article, CrawlEvidence, JobId,
    NormalizedQuery, Page, SearchJob, SearchStatus, SubTaskId,
};
use crate::error::{FailureReason, Result};

#[async_trait]
pub trait SearchJobRepository: Send + Sync {
    async fn create(&self, job: &SearchJob) -> Result<()>;
    async fn get(&self, job_id: &JobId) -> Result<Option<SearchJob>>;
    /// Atomic compare-and-set: succeeds only if the current status is not terminal.
    async fn update_status(
        &self,
        job_id: &JobId,
        status: SearchStatus,
        failure: Option<FailureReason>,
    ) -> Result<bool>;
    async fn list_non_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<SearchJob>>;
    async fn purge_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait ArticleRepository: Send + Sync {
    async fn search(
        &self,
        query: &NormalizedQuery,
        page_index: u32,
        page_size: u32,
    ) -> Result<Page<Article>>;
}

#[async_trait]
pub trait AiJobRepository: Send + Sync {
    async fn create(&self, job: &AiJob) -> Result<()>;
    async fn get(&self, job_id: &JobId) -> Result<Option<AiJob>>;
    async fn update_status(
        &self,
        job_id: &JobId,
        status: AiOverallStatus,
    ) -> Result<bool>;
    async fn list_non_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<AiJob>>;
    async fn purge_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64>;
}

#[async_trait]
pub trait AiSubTaskRepository: Send + Sync {
    async fn create(&self, task: &AiSubTask) -> Result<()>;
    async fn get(&self, sub_task_id: &SubTaskId) -> Result<Option<AiSubTask>>;
    async fn list_for_job(&self, job_id: &JobId) -> Result<Vec<AiSubTask>>;
    async fn mark_in_progress(&self, sub_task_id: &SubTaskId) -> Result<bool>;
    async fn complete(&self, sub_task_id: &SubTaskId, result_payload: serde_json::Value) -> Result<bool>;
    async fn fail(
        &self,
        sub_task_id: &SubTaskId,
        status: AiSubTaskStatus,
        error_message: String,
        failure: FailureReason,
    ) -> Result<bool>;
    async fn increment_retry(&self, sub_task_id: &SubTaskId, new_token_hash: String) -> Result<()>;
    async fn list_stale_in_progress(&self, cutoff: DateTime<Utc>) -> Result<Vec<AiSubTask>>;
}

#[async_trait]
pub trait CrawlEvidenceRepository: Send + Sync {
    /// Idempotent by `(job_id, url)`.
    async fn insert(&self, evidence: &CrawlEvidence) -> Result<()>;
    async fn list_for_job(&self, job_id: &JobId) -> Result<Vec<CrawlEvidence>>;
    async fn purge_for_jobs(&self, job_ids: &[JobId]) -> Result<u64>;
}
