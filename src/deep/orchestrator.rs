//! Deep-search / AI job orchestrator.
//!
//! Creates a parent `AiJob` plus one `AiSubTask` per registered provider,
//! dispatches each to its provider, and recomputes the parent's aggregate
//! status every time a sub-task transitions (called from `deep::callback`
//! and from the sweeper). Composition mirrors a small-collaborators
//! `JobProcessor`/`Auditor` pairing: single-purpose collaborators wired
//! together rather than one monolith.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use sha2::{Digest, Sha256};
use tracing::{info, warn};

use crate::config::CoreConfig;
use crate::domain::models::{
    AiJob, AiOverallStatus, AiSubTask, AiSubTaskStatus, JobId, SubTaskId,
};
use crate::error::{CoreError, Result};
use crate::events::EventBus;
use crate::repository::{AiJobRepository, AiSubTaskRepository};

#[derive(Debug, Clone, serde::Serialize)]
pub struct TaskRequest {
    pub job_id: JobId,
    pub sub_task_id: SubTaskId,
    pub provider_id: String,
    pub task_type: String,
    pub topic: String,
    pub base_url: Option<String>,
    pub callback_url: String,
    /// The plain one-time token; only its hash is ever persisted.
    pub callback_token: String,
    pub created_at: chrono::DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct DispatchError(pub String);

impl std::fmt::Display for DispatchError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}
impl std::error::Error for DispatchError {}

/// The outbound analogue of `SearchAdapter`: one provider this orchestrator
/// can hand a task to.
#[async_trait]
pub trait ProviderDispatcher: Send + Sync {
    fn provider_id(&self) -> &str;
    fn task_type(&self) -> &str;
    async fn dispatch(&self, task: &TaskRequest) -> std::result::Result<(), DispatchError>;
}

pub fn hash_token(token: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(token.as_bytes());
    hex::encode(hasher.finalize())
}

fn generate_token() -> String {
    uuid::Uuid::new_v4().to_string()
}

/// Applies the parent aggregation rule to the
/// current multiset of sub-task states.
pub fn aggregate_status(sub_tasks: &[AiSubTask]) -> AiOverallStatus {
    if sub_tasks.is_empty() {
        return AiOverallStatus::Pending;
    }
    let any_pending = sub_tasks
        .iter()
        .any(|t| matches!(t.status, AiSubTaskStatus::Pending | AiSubTaskStatus::InProgress));
    let completed = sub_tasks
        .iter()
        .filter(|t| t.status == AiSubTaskStatus::Completed)
        .count();
    let terminal_non_completed = sub_tasks
        .iter()
        .filter(|t| t.status.is_terminal() && t.status != AiSubTaskStatus::Completed)
        .count();

    if any_pending {
        let none_started = sub_tasks
            .iter()
            .all(|t| t.status == AiSubTaskStatus::Pending);
        return if none_started {
            AiOverallStatus::Pending
        } else {
            AiOverallStatus::InProgress
        };
    }

    if completed == sub_tasks.len() {
        AiOverallStatus::Completed
    } else if completed > 0 && terminal_non_completed > 0 {
        AiOverallStatus::PartialSuccess
    } else {
        AiOverallStatus::Failed
    }
}

/// Resolves the partial-success failure category: the earliest non-`content`
/// failing category among non-completed sub-tasks, in creation order; falls
/// back to `content` if every failure was content-category.
pub fn partial_failure_category(sub_tasks: &[AiSubTask]) -> Option<crate::error::FailureCategory> {
    use crate::error::FailureCategory;
    let failing: Vec<_> = sub_tasks
        .iter()
        .filter(|t| t.status.is_terminal() && t.status != AiSubTaskStatus::Completed)
        .collect();

    failing
        .iter()
        .find_map(|t| {
            t.failure_reason
                .filter(|r| r.category != FailureCategory::Content)
                .map(|r| r.category)
        })
        .or_else(|| failing.first().and_then(|t| t.failure_reason).map(|r| r.category))
}

pub struct AiJobHandle {
    pub job_id: JobId,
    pub overall_status: AiOverallStatus,
}

pub struct DeepSearchOrchestrator {
    ai_jobs: Arc<dyn AiJobRepository>,
    sub_tasks: Arc<dyn AiSubTaskRepository>,
    events: EventBus,
    #[allow(dead_code)]
    config: CoreConfig,
    providers: Vec<Arc<dyn ProviderDispatcher>>,
    callback_base_url: String,
}

impl DeepSearchOrchestrator {
    pub fn new(
        ai_jobs: Arc<dyn AiJobRepository>,
        sub_tasks: Arc<dyn AiSubTaskRepository>,
        events: EventBus,
        config: CoreConfig,
        providers: Vec<Arc<dyn ProviderDispatcher>>,
        callback_base_url: String,
    ) -> Self {
        Self {
            ai_jobs,
            sub_tasks,
            events,
            config,
            providers,
            callback_base_url,
        }
    }

    pub async fn get_status(&self, job_id: &JobId) -> Result<AiJob> {
        self.ai_jobs
            .get(job_id)
            .await?
            .ok_or_else(|| CoreError::JobNotFound(job_id.clone()))
    }

    pub async fn create_job(&self, topic: String, base_url: Option<String>) -> Result<AiJobHandle> {
        if topic.trim().is_empty() {
            return Err(CoreError::InvalidQuery("topic must not be empty".into()));
        }

        let job = AiJob::new(topic.clone(), base_url.clone());
        self.ai_jobs.create(&job).await?;
        self.events.create_journal(&job.job_id);

        for provider in &self.providers {
            let token = generate_token();
            let task = AiSubTask::new(
                job.job_id.clone(),
                provider.provider_id().to_string(),
                provider.task_type().to_string(),
                hash_token(&token),
            );
            self.sub_tasks.create(&task).await?;

            let request = TaskRequest {
                job_id: job.job_id.clone(),
                sub_task_id: task.sub_task_id.clone(),
                provider_id: provider.provider_id().to_string(),
                task_type: provider.task_type().to_string(),
                topic: topic.clone(),
                base_url: base_url.clone(),
                callback_url: format!("{}/callbacks/{}", self.callback_base_url, task.sub_task_id),
                callback_token: token,
                created_at: task.created_at,
            };

            match provider.dispatch(&request).await {
                Ok(()) => {
                    self.sub_tasks.mark_in_progress(&task.sub_task_id).await?;
                    self.events
                        .append(
                            &job.job_id,
                            crate::domain::models::EventType::TaskDispatched,
                            serde_json::json!({
                                "subTaskId": task.sub_task_id,
                                "providerId": provider.provider_id(),
                            }),
                        )
                        .await;
                }
                Err(e) => {
                    warn!(provider = provider.provider_id(), error = %e, "dispatch failed");
                    let reason = crate::error::classify(&e.0);
                    self.sub_tasks
                        .fail(&task.sub_task_id, AiSubTaskStatus::Failed, e.0, reason)
                        .await?;
                }
            }
        }

        self.recompute_parent(&job.job_id).await?;

        let refreshed = self.get_status(&job.job_id).await?;
        Ok(AiJobHandle {
            job_id: refreshed.job_id,
            overall_status: refreshed.overall_status,
        })
    }

    /// Appends an `evidence` event for a freshly-ingested `CrawlEvidence` row.
    pub async fn events_append_evidence(
        &self,
        job_id: &JobId,
        evidence: &crate::domain::models::CrawlEvidence,
    ) {
        self.events
            .append(
                job_id,
                crate::domain::models::EventType::Evidence,
                serde_json::json!({
                    "url": evidence.url,
                    "title": evidence.title,
                    "stance": evidence.stance.as_str(),
                    "sourceCategory": evidence.source_category.as_str(),
                }),
            )
            .await;
    }

    /// Appends a `task_completed` event for a sub-task that just reached a
    /// terminal state (completed or failed) via callback.
    pub async fn events_append_task_completed(
        &self,
        job_id: &JobId,
        sub_task_id: &SubTaskId,
        provider_id: &str,
        status: crate::domain::models::AiSubTaskStatus,
    ) {
        self.events
            .append(
                job_id,
                crate::domain::models::EventType::TaskCompleted,
                serde_json::json!({
                    "subTaskId": sub_task_id,
                    "providerId": provider_id,
                    "status": status.as_str(),
                }),
            )
            .await;
    }

    /// Forces a non-terminal job straight to TIMEOUT, overriding whatever
    /// the sub-task aggregation would otherwise compute. Called by the
    /// sweeper once a job has outlived `deep_overall_timeout`; any sub-task
    /// still pending or in-progress is marked TIMEOUT too so it stops being
    /// eligible for a callback-driven retry.
    pub async fn force_timeout(&self, job_id: &JobId) -> Result<()> {
        let tasks = self.sub_tasks.list_for_job(job_id).await?;
        for task in tasks.iter().filter(|t| !t.status.is_terminal()) {
            self.sub_tasks
                .fail(
                    &task.sub_task_id,
                    AiSubTaskStatus::Timeout,
                    "job exceeded its overall timeout".into(),
                    crate::error::FailureReason::new(crate::error::FailureCode::TimeoutJobOverall),
                )
                .await?;
        }

        let changed = self.ai_jobs.update_status(job_id, AiOverallStatus::Timeout).await?;
        if changed {
            self.events
                .append(
                    job_id,
                    crate::domain::models::EventType::Error,
                    serde_json::json!({"status": "timeout", "code": "timeout_job_overall"}),
                )
                .await;
            warn!(%job_id, "deep-search job exceeded its overall timeout");
        }
        Ok(())
    }

    /// Re-evaluates and persists the parent's aggregate status from its
    /// current sub-tasks, emitting a terminal event if the job just closed.
    /// Called after every sub-task transition (dispatch, callback, sweep).
    pub async fn recompute_parent(&self, job_id: &JobId) -> Result<()> {
        let tasks = self.sub_tasks.list_for_job(job_id).await?;
        let new_status = aggregate_status(&tasks);

        let changed = self.ai_jobs.update_status(job_id, new_status).await?;
        if changed && new_status.is_terminal() {
            let event_type = if matches!(new_status, AiOverallStatus::Failed) {
                crate::domain::models::EventType::Error
            } else {
                crate::domain::models::EventType::Done
            };
            let category = partial_failure_category(&tasks);
            self.events
                .append(
                    job_id,
                    event_type,
                    serde_json::json!({
                        "status": new_status.as_str(),
                        "category": category.map(|c| format!("{c:?}")),
                    }),
                )
                .await;
            info!(%job_id, status = new_status.as_str(), "deep-search job reached terminal state");
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::new_sub_task_id;

    fn task(job_id: &str, status: AiSubTaskStatus) -> AiSubTask {
        let mut t = AiSubTask::new(job_id.to_string(), "p".into(), "t".into(), "hash".into());
        t.sub_task_id = new_sub_task_id();
        t.status = status;
        t
    }

    #[test]
    fn all_completed_is_completed() {
        let tasks = vec![
            task("j", AiSubTaskStatus::Completed),
            task("j", AiSubTaskStatus::Completed),
        ];
        assert_eq!(aggregate_status(&tasks), AiOverallStatus::Completed);
    }

    #[test]
    fn mixed_completed_and_failed_is_partial_success() {
        let tasks = vec![
            task("j", AiSubTaskStatus::Completed),
            task("j", AiSubTaskStatus::Failed),
        ];
        assert_eq!(aggregate_status(&tasks), AiOverallStatus::PartialSuccess);
    }

    #[test]
    fn all_failed_is_failed() {
        let tasks = vec![
            task("j", AiSubTaskStatus::Failed),
            task("j", AiSubTaskStatus::Timeout),
        ];
        assert_eq!(aggregate_status(&tasks), AiOverallStatus::Failed);
    }

    #[test]
    fn any_non_terminal_is_in_progress() {
        let tasks = vec![
            task("j", AiSubTaskStatus::Completed),
            task("j", AiSubTaskStatus::InProgress),
        ];
        assert_eq!(aggregate_status(&tasks), AiOverallStatus::InProgress);
    }

    #[test]
    fn none_started_is_pending() {
        let tasks = vec![task("j", AiSubTaskStatus::Pending)];
        assert_eq!(aggregate_status(&tasks), AiOverallStatus::Pending);
    }

    #[test]
    fn token_hash_is_deterministic_and_never_equals_the_token() {
        let token = "abc123";
        let h1 = hash_token(token);
        let h2 = hash_token(token);
        assert_eq!(h1, h2);
        assert_ne!(h1, token);
    }
}
