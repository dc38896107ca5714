//! A concrete `ProviderDispatcher`: hands a `TaskRequest` to an external
//! AI/crawl provider over HTTP and trusts it to call back later.
//!
//! Dispatch only has to succeed at *handing off* the task — the provider's
//! actual work happens out of process and its result arrives through
//! `deep::callback`, not as this call's response.

use async_trait::async_trait;
use serde::Serialize;

use crate::deep::orchestrator::{DispatchError, ProviderDispatcher, TaskRequest};

#[derive(Debug, Serialize)]
struct DispatchPayload<'a> {
    sub_task_id: &'a str,
    job_id: &'a str,
    topic: &'a str,
    base_url: &'a Option<String>,
    callback_url: &'a str,
    callback_token: &'a str,
}

/// Posts the task to `endpoint` and expects a 2xx acknowledgement that the
/// provider accepted the work. `provider_id`/`task_type` are this provider's
/// identity as attributed on `AiSubTask` rows and dispatch events.
pub struct HttpProviderDispatcher {
    provider_id: String,
    task_type: String,
    endpoint: String,
    client: reqwest::Client,
}

impl HttpProviderDispatcher {
    pub fn new(provider_id: impl Into<String>, task_type: impl Into<String>, endpoint: impl Into<String>) -> Self {
        Self {
            provider_id: provider_id.into(),
            task_type: task_type.into(),
            endpoint: endpoint.into(),
            client: reqwest::Client::new(),
        }
    }
}

#[async_trait]
impl ProviderDispatcher for HttpProviderDispatcher {
    fn provider_id(&self) -> &str {
        &self.provider_id
    }

    fn task_type(&self) -> &str {
        &self.task_type
    }

    async fn dispatch(&self, task: &TaskRequest) -> std::result::Result<(), DispatchError> {
        let payload = DispatchPayload {
            sub_task_id: &task.sub_task_id,
            job_id: &task.job_id,
            topic: &task.topic,
            base_url: &task.base_url,
            callback_url: &task.callback_url,
            callback_token: &task.callback_token,
        };

        let response = self
            .client
            .post(&self.endpoint)
            .json(&payload)
            .send()
            .await
            .map_err(|e| DispatchError(e.to_string()))?;

        if !response.status().is_success() {
            return Err(DispatchError(format!(
                "{} responded with status {}",
                self.provider_id,
                response.status()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn request(endpoint: &str) -> TaskRequest {
        TaskRequest {
            job_id: "job-1".into(),
            sub_task_id: "task-1".into(),
            provider_id: "claims-checker".into(),
            task_type: "evidence_gather".into(),
            topic: "bitcoin ETF approval".into(),
            base_url: None,
            callback_url: format!("{endpoint}/callbacks/task-1"),
            callback_token: "tok".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn dispatch_succeeds_on_2xx() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/tasks")
            .with_status(202)
            .create_async()
            .await;

        let dispatcher =
            HttpProviderDispatcher::new("claims-checker", "evidence_gather", format!("{}/tasks", server.url()));
        let result = dispatcher.dispatch(&request(&server.url())).await;
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn dispatch_fails_on_server_error() {
        let mut server = mockito::Server::new_async().await;
        let _m = server
            .mock("POST", "/tasks")
            .with_status(500)
            .create_async()
            .await;

        let dispatcher =
            HttpProviderDispatcher::new("claims-checker", "evidence_gather", format!("{}/tasks", server.url()));
        let err = dispatcher.dispatch(&request(&server.url())).await.unwrap_err();
        assert!(err.0.contains("500"));
    }
}
