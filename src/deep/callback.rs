//! Callback ingress.
//!
//! Verifies the callback token against the persisted hash, applies the
//! reported status to the sub-task idempotently, retries retryable
//! failures up to the configured limit, appends any evidence the provider
//! returned, emits `task_completed` once a sub-task reaches a terminal
//! state, and re-evaluates the parent job.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::CoreConfig;
use crate::deep::orchestrator::{hash_token, DeepSearchOrchestrator, TaskRequest};
use crate::domain::models::{AiSubTaskStatus, CrawlEvidence, JobId, SourceCategory, Stance, SubTaskId};
use crate::error::{classify, CoreError, FailureCode, FailureReason, Result};
use crate::repository::{AiSubTaskRepository, CrawlEvidenceRepository};

#[derive(Debug, Clone, Deserialize)]
pub struct EvidenceInput {
    pub url: String,
    pub title: String,
    pub stance: Option<String>,
    pub snippet: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CallbackRequest {
    pub job_id: JobId,
    pub sub_task_id: SubTaskId,
    pub callback_token: String,
    pub status: String, // "completed" | "failed"
    pub result_json: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub evidence: Vec<EvidenceInput>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum CallbackAck {
    Applied,
    Duplicate,
    Ignored,
}

pub struct CallbackIngress {
    sub_tasks: Arc<dyn AiSubTaskRepository>,
    evidence: Arc<dyn CrawlEvidenceRepository>,
    orchestrator: Arc<DeepSearchOrchestrator>,
    providers: Vec<Arc<dyn crate::deep::orchestrator::ProviderDispatcher>>,
    config: CoreConfig,
    callback_base_url: String,
}

impl CallbackIngress {
    pub fn new(
        sub_tasks: Arc<dyn AiSubTaskRepository>,
        evidence: Arc<dyn CrawlEvidenceRepository>,
        orchestrator: Arc<DeepSearchOrchestrator>,
        providers: Vec<Arc<dyn crate::deep::orchestrator::ProviderDispatcher>>,
        config: CoreConfig,
        callback_base_url: String,
    ) -> Self {
        Self {
            sub_tasks,
            evidence,
            orchestrator,
            providers,
            config,
            callback_base_url,
        }
    }

    pub async fn on_callback(&self, req: CallbackRequest) -> Result<CallbackAck> {
        let Some(task) = self.sub_tasks.get(&req.sub_task_id).await? else {
            warn!(sub_task_id = %req.sub_task_id, "callback for unknown sub-task; ignoring");
            return Ok(CallbackAck::Ignored);
        };

        if hash_token(&req.callback_token) != task.callback_token_hash {
            return Err(CoreError::InvalidCallbackToken);
        }

        if task.status.is_terminal() {
            info!(sub_task_id = %req.sub_task_id, "duplicate callback for terminal sub-task");
            return Ok(CallbackAck::Duplicate);
        }

        match req.status.as_str() {
            "completed" => {
                let payload = req.result_json.unwrap_or(serde_json::Value::Null);
                self.sub_tasks.complete(&req.sub_task_id, payload).await?;
                self.orchestrator
                    .events_append_task_completed(
                        &req.job_id,
                        &req.sub_task_id,
                        &task.provider_id,
                        AiSubTaskStatus::Completed,
                    )
                    .await;

                for ev in req.evidence {
                    let stance: Stance = ev
                        .stance
                        .as_deref()
                        .and_then(|s| s.parse().ok())
                        .unwrap_or(Stance::Neutral);
                    let category = url::Url::parse(&ev.url)
                        .ok()
                        .and_then(|u| u.host_str().map(SourceCategory::infer_from_host))
                        .unwrap_or(SourceCategory::Blog);
                    let evidence = CrawlEvidence::new(
                        req.job_id.clone(),
                        ev.url,
                        ev.title,
                        stance,
                        ev.snippet,
                        category,
                    );
                    self.evidence.insert(&evidence).await?;
                    self.orchestrator
                        .events_append_evidence(&req.job_id, &evidence)
                        .await;
                }
            }
            _ => {
                let message = req.error_message.unwrap_or_else(|| "provider reported failure".into());
                let reason = classify(&message);

                if reason.code.is_retryable() && task.retry_count < self.config.max_subtask_retries {
                    self.retry(&task.sub_task_id, &task.provider_id, &task.job_id, &task.task_type)
                        .await?;
                } else {
                    self.sub_tasks
                        .fail(&req.sub_task_id, AiSubTaskStatus::Failed, message, reason)
                        .await?;
                    self.orchestrator
                        .events_append_task_completed(
                            &req.job_id,
                            &req.sub_task_id,
                            &task.provider_id,
                            AiSubTaskStatus::Failed,
                        )
                        .await;
                }
            }
        }

        self.orchestrator.recompute_parent(&req.job_id).await?;
        Ok(CallbackAck::Applied)
    }

    async fn retry(
        &self,
        sub_task_id: &SubTaskId,
        provider_id: &str,
        job_id: &JobId,
        task_type: &str,
    ) -> Result<()> {
        let Some(provider) = self.providers.iter().find(|p| p.provider_id() == provider_id) else {
            warn!(provider_id, "no registered provider for retry; failing sub-task");
            self.sub_tasks
                .fail(
                    sub_task_id,
                    AiSubTaskStatus::Failed,
                    "provider no longer registered".into(),
                    FailureReason::new(FailureCode::ServiceError),
                )
                .await?;
            return Ok(());
        };

        let token = uuid::Uuid::new_v4().to_string();
        self.sub_tasks
            .increment_retry(sub_task_id, hash_token(&token))
            .await?;

        let request = TaskRequest {
            job_id: job_id.clone(),
            sub_task_id: sub_task_id.clone(),
            provider_id: provider_id.to_string(),
            task_type: task_type.to_string(),
            topic: String::new(),
            base_url: None,
            callback_url: format!("{}/callbacks/{}", self.callback_base_url, sub_task_id),
            callback_token: token,
            created_at: chrono::Utc::now(),
        };

        if let Err(e) = provider.dispatch(&request).await {
            self.sub_tasks
                .fail(sub_task_id, AiSubTaskStatus::Failed, e.0, FailureReason::new(FailureCode::ServiceError))
                .await?;
        } else {
            self.sub_tasks.mark_in_progress(sub_task_id).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::EventBus;
    use crate::repository::sqlite::{SqliteAiJobRepository, SqliteAiSubTaskRepository, SqliteCrawlEvidenceRepository};
    use crate::test_utils::setup_test_db;
    use async_trait::async_trait;

    struct StaticProvider {
        id: &'static str,
        token: std::sync::Mutex<Option<String>>,
    }

    impl StaticProvider {
        fn new(id: &'static str) -> Self {
            Self { id, token: std::sync::Mutex::new(None) }
        }

        fn token(&self) -> String {
            self.token.lock().unwrap().clone().expect("dispatch was never called")
        }
    }

    #[async_trait]
    impl crate::deep::orchestrator::ProviderDispatcher for StaticProvider {
        fn provider_id(&self) -> &str {
            self.id
        }
        fn task_type(&self) -> &str {
            "evidence_gather"
        }
        async fn dispatch(
            &self,
            task: &TaskRequest,
        ) -> std::result::Result<(), crate::deep::orchestrator::DispatchError> {
            *self.token.lock().unwrap() = Some(task.callback_token.clone());
            Ok(())
        }
    }

    async fn build() -> (
        Arc<DeepSearchOrchestrator>,
        CallbackIngress,
        Arc<dyn AiSubTaskRepository>,
        EventBus,
        Arc<StaticProvider>,
    ) {
        let pool = setup_test_db().await;
        let ai_jobs = Arc::new(SqliteAiJobRepository::new(pool.clone()));
        let sub_tasks: Arc<dyn AiSubTaskRepository> = Arc::new(SqliteAiSubTaskRepository::new(pool.clone()));
        let evidence = Arc::new(SqliteCrawlEvidenceRepository::new(pool.clone()));
        let provider = Arc::new(StaticProvider::new("p1"));
        let providers: Vec<Arc<dyn crate::deep::orchestrator::ProviderDispatcher>> = vec![provider.clone()];
        let events = EventBus::new(256);

        let orchestrator = Arc::new(DeepSearchOrchestrator::new(
            ai_jobs,
            sub_tasks.clone(),
            events.clone(),
            CoreConfig::default(),
            providers.clone(),
            "https://callbacks.test".into(),
        ));

        let ingress = CallbackIngress::new(
            sub_tasks.clone(),
            evidence,
            orchestrator.clone(),
            providers,
            CoreConfig::default(),
            "https://callbacks.test".into(),
        );

        (orchestrator, ingress, sub_tasks, events, provider)
    }

    #[tokio::test]
    async fn wrong_token_is_rejected() {
        let (orchestrator, ingress, sub_tasks, _events, _provider) = build().await;
        let handle = orchestrator.create_job("topic".into(), None).await.unwrap();
        let tasks = sub_tasks.list_for_job(&handle.job_id).await.unwrap();
        let task = &tasks[0];

        let req = CallbackRequest {
            job_id: handle.job_id.clone(),
            sub_task_id: task.sub_task_id.clone(),
            callback_token: "wrong-token".into(),
            status: "completed".into(),
            result_json: None,
            error_message: None,
            evidence: vec![],
        };

        let err = ingress.on_callback(req).await.unwrap_err();
        assert!(matches!(err, CoreError::InvalidCallbackToken));
    }

    #[tokio::test]
    async fn unknown_sub_task_is_ignored_not_errored() {
        let (_orchestrator, ingress, _sub_tasks, _events, _provider) = build().await;
        let req = CallbackRequest {
            job_id: "ghost-job".into(),
            sub_task_id: "ghost-task".into(),
            callback_token: "anything".into(),
            status: "completed".into(),
            result_json: None,
            error_message: None,
            evidence: vec![],
        };
        let ack = ingress.on_callback(req).await.unwrap();
        assert_eq!(ack, CallbackAck::Ignored);
    }

    #[tokio::test]
    async fn completed_callback_emits_task_completed_event() {
        let (_orchestrator, ingress, sub_tasks, events, provider) = build().await;
        let handle = _orchestrator.create_job("topic".into(), None).await.unwrap();
        let tasks = sub_tasks.list_for_job(&handle.job_id).await.unwrap();
        let task = &tasks[0];

        let req = CallbackRequest {
            job_id: handle.job_id.clone(),
            sub_task_id: task.sub_task_id.clone(),
            callback_token: provider.token(),
            status: "completed".into(),
            result_json: Some(serde_json::json!({"ok": true})),
            error_message: None,
            evidence: vec![],
        };

        let ack = ingress.on_callback(req).await.unwrap();
        assert_eq!(ack, CallbackAck::Applied);

        let journal = events.journal(&handle.job_id).unwrap();
        let log = journal.subscribe(None).await;
        let found = log
            .iter()
            .find(|e| e.event_type == EventType::TaskCompleted)
            .expect("task_completed event should have been appended");
        assert_eq!(found.data["status"], "completed");
    }

    #[tokio::test]
    async fn failed_callback_emits_task_completed_event_with_failed_status() {
        let (_orchestrator, ingress, sub_tasks, events, provider) = build().await;
        let handle = _orchestrator.create_job("topic".into(), None).await.unwrap();
        let tasks = sub_tasks.list_for_job(&handle.job_id).await.unwrap();
        let task = &tasks[0];

        let req = CallbackRequest {
            job_id: handle.job_id.clone(),
            sub_task_id: task.sub_task_id.clone(),
            callback_token: provider.token(),
            status: "failed".into(),
            result_json: None,
            error_message: Some("permanent failure, do not retry".into()),
            evidence: vec![],
        };

        let ack = ingress.on_callback(req).await.unwrap();
        assert_eq!(ack, CallbackAck::Applied);

        let journal = events.journal(&handle.job_id).unwrap();
        let log = journal.subscribe(None).await;
        let found = log
            .iter()
            .find(|e| e.event_type == EventType::TaskCompleted)
            .expect("task_completed event should have been appended");
        assert_eq!(found.data["status"], "failed");
    }
}
