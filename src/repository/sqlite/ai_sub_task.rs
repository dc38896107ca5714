use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::models::{AiSubTask, AiSubTaskStatus, JobId, SubTaskId};
use crate::error::{FailureCategory, FailureCode, FailureReason, Result};
use crate::repository::sqlite::parse_datetime;
use crate::repository::AiSubTaskRepository;

pub struct SqliteAiSubTaskRepository {
    pool: SqlitePool,
}

impl SqliteAiSubTaskRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn category_str(c: FailureCategory) -> &'static str {
    match c {
        FailureCategory::Timeout => "timeout",
        FailureCategory::Network => "network",
        FailureCategory::Service => "service",
        FailureCategory::Content => "content",
        FailureCategory::Processing => "processing",
        FailureCategory::Job => "job",
        FailureCategory::Unknown => "unknown",
    }
}

fn category_from_str(s: &str) -> FailureCategory {
    match s {
        "timeout" => FailureCategory::Timeout,
        "network" => FailureCategory::Network,
        "service" => FailureCategory::Service,
        "content" => FailureCategory::Content,
        "processing" => FailureCategory::Processing,
        "job" => FailureCategory::Job,
        _ => FailureCategory::Unknown,
    }
}

#[allow(clippy::too_many_arguments)]
fn row_to_task(
    sub_task_id: String,
    job_id: String,
    provider_id: String,
    task_type: String,
    status: String,
    result_json: Option<String>,
    error_message: Option<String>,
    failure_code: Option<String>,
    failure_category: Option<String>,
    retry_count: i64,
    created_at: String,
    completed_at: Option<String>,
    callback_token_hash: String,
) -> AiSubTask {
    let result_payload = result_json.and_then(|s| serde_json::from_str(&s).ok());
    let failure_reason = failure_code.and_then(|c| c.parse::<FailureCode>().ok()).map(|code| {
        FailureReason {
            code,
            category: failure_category.map(|c| category_from_str(&c)).unwrap_or(FailureCategory::Unknown),
        }
    });

    AiSubTask {
        sub_task_id,
        job_id,
        provider_id,
        task_type,
        status: status.parse().unwrap_or(AiSubTaskStatus::Pending),
        result_payload,
        error_message,
        failure_reason,
        retry_count: retry_count.max(0) as u32,
        created_at: parse_datetime(&created_at),
        completed_at: completed_at.map(|s| parse_datetime(&s)),
        callback_token_hash,
    }
}

macro_rules! extract_row {
    ($r:expr) => {
        row_to_task(
            $r.get("sub_task_id"),
            $r.get("job_id"),
            $r.get("provider_id"),
            $r.get("task_type"),
            $r.get("status"),
            $r.get("result_json"),
            $r.get("error_message"),
            $r.get("failure_code"),
            $r.get("failure_category"),
            $r.get("retry_count"),
            $r.get("created_at"),
            $r.get("completed_at"),
            $r.get("callback_token_hash"),
        )
    };
}

#[async_trait]
impl AiSubTaskRepository for SqliteAiSubTaskRepository {
    async fn create(&self, task: &AiSubTask) -> Result<()> {
        sqlx::query(
            "INSERT INTO ai_sub_task (sub_task_id, job_id, provider_id, task_type, status, retry_count, created_at, completed_at, callback_token_hash)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, NULL, ?8)",
        )
        .bind(&task.sub_task_id)
        .bind(&task.job_id)
        .bind(&task.provider_id)
        .bind(&task.task_type)
        .bind(task.status.as_str())
        .bind(task.retry_count as i64)
        .bind(task.created_at.to_rfc3339())
        .bind(&task.callback_token_hash)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, sub_task_id: &SubTaskId) -> Result<Option<AiSubTask>> {
        let row = sqlx::query(
            "SELECT sub_task_id, job_id, provider_id, task_type, status, result_json, error_message, failure_code, failure_category, retry_count, created_at, completed_at, callback_token_hash
             FROM ai_sub_task WHERE sub_task_id = ?1",
        )
        .bind(sub_task_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(row.map(|r| extract_row!(r)))
    }

    async fn list_for_job(&self, job_id: &JobId) -> Result<Vec<AiSubTask>> {
        let rows = sqlx::query(
            "SELECT sub_task_id, job_id, provider_id, task_type, status, result_json, error_message, failure_code, failure_category, retry_count, created_at, completed_at, callback_token_hash
             FROM ai_sub_task WHERE job_id = ?1 ORDER BY created_at ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| extract_row!(r)).collect())
    }

    async fn mark_in_progress(&self, sub_task_id: &SubTaskId) -> Result<bool> {
        let result = sqlx::query(
            "UPDATE ai_sub_task SET status = 'in_progress' WHERE sub_task_id = ?1 AND status = 'pending'",
        )
        .bind(sub_task_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn complete(&self, sub_task_id: &SubTaskId, result_payload: serde_json::Value) -> Result<bool> {
        let placeholders = super::AI_SUB_TASK_TERMINAL
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "UPDATE ai_sub_task SET status = 'completed', result_json = ?1, completed_at = ?2
             WHERE sub_task_id = ?3 AND status NOT IN ({placeholders})"
        );
        let mut q = sqlx::query(&sql)
            .bind(result_payload.to_string())
            .bind(Utc::now().to_rfc3339())
            .bind(sub_task_id);
        for t in super::AI_SUB_TASK_TERMINAL {
            q = q.bind(*t);
        }
        let result = q.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn fail(
        &self,
        sub_task_id: &SubTaskId,
        status: AiSubTaskStatus,
        error_message: String,
        failure: FailureReason,
    ) -> Result<bool> {
        let placeholders = super::AI_SUB_TASK_TERMINAL
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "UPDATE ai_sub_task SET status = ?1, error_message = ?2, failure_code = ?3, failure_category = ?4, completed_at = ?5
             WHERE sub_task_id = ?6 AND status NOT IN ({placeholders})"
        );
        let mut q = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(error_message)
            .bind(failure.code.as_str())
            .bind(category_str(failure.category))
            .bind(Utc::now().to_rfc3339())
            .bind(sub_task_id);
        for t in super::AI_SUB_TASK_TERMINAL {
            q = q.bind(*t);
        }
        let result = q.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn increment_retry(&self, sub_task_id: &SubTaskId, new_token_hash: String) -> Result<()> {
        sqlx::query(
            "UPDATE ai_sub_task SET status = 'pending', retry_count = retry_count + 1, callback_token_hash = ?1, error_message = NULL, failure_code = NULL, failure_category = NULL
             WHERE sub_task_id = ?2",
        )
        .bind(new_token_hash)
        .bind(sub_task_id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_stale_in_progress(&self, cutoff: DateTime<Utc>) -> Result<Vec<AiSubTask>> {
        let rows = sqlx::query(
            "SELECT sub_task_id, job_id, provider_id, task_type, status, result_json, error_message, failure_code, failure_category, retry_count, created_at, completed_at, callback_token_hash
             FROM ai_sub_task WHERE status = 'in_progress' AND created_at < ?1",
        )
        .bind(cutoff.to_rfc3339())
        .fetch_all(&self.pool)
        .await?;
        Ok(rows.into_iter().map(|r| extract_row!(r)).collect())
    }
}
