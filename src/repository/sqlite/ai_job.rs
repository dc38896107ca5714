use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::models::{AiJob, AiOverallStatus, JobId};
use crate::error::Result;
use crate::repository::sqlite::{parse_datetime, parse_datetime_opt};
use crate::repository::AiJobRepository;

pub struct SqliteAiJobRepository {
    pool: SqlitePool,
}

impl SqliteAiJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_job(
    job_id: String,
    topic: String,
    base_url: Option<String>,
    overall_status: String,
    created_at: String,
    completed_at: Option<String>,
) -> AiJob {
    AiJob {
        job_id,
        topic,
        base_url,
        overall_status: overall_status.parse().unwrap_or(AiOverallStatus::Pending),
        created_at: parse_datetime(&created_at),
        completed_at: parse_datetime_opt(completed_at),
    }
}

#[async_trait]
impl AiJobRepository for SqliteAiJobRepository {
    async fn create(&self, job: &AiJob) -> Result<()> {
        sqlx::query(
            "INSERT INTO ai_job (job_id, topic, base_url, overall_status, created_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, ?5, NULL)",
        )
        .bind(&job.job_id)
        .bind(&job.topic)
        .bind(&job.base_url)
        .bind(job.overall_status.as_str())
        .bind(job.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<AiJob>> {
        let row = sqlx::query(
            "SELECT job_id, topic, base_url, overall_status, created_at, completed_at FROM ai_job WHERE job_id = ?1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            row_to_job(
                r.get("job_id"),
                r.get("topic"),
                r.get("base_url"),
                r.get("overall_status"),
                r.get("created_at"),
                r.get("completed_at"),
            )
        }))
    }

    async fn update_status(&self, job_id: &JobId, status: AiOverallStatus) -> Result<bool> {
        let completed_at = status.is_terminal().then(|| Utc::now().to_rfc3339());
        let placeholders = super::AI_JOB_TERMINAL
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "UPDATE ai_job SET overall_status = ?1, completed_at = COALESCE(?2, completed_at)
             WHERE job_id = ?3 AND overall_status NOT IN ({placeholders})"
        );
        let mut q = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(completed_at)
            .bind(job_id);
        for t in super::AI_JOB_TERMINAL {
            q = q.bind(*t);
        }
        let result = q.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_non_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<AiJob>> {
        let placeholders = super::AI_JOB_TERMINAL
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT job_id, topic, base_url, overall_status, created_at, completed_at
             FROM ai_job WHERE created_at < ? AND overall_status NOT IN ({placeholders})"
        );
        let mut q = sqlx::query(&sql).bind(cutoff.to_rfc3339());
        for t in super::AI_JOB_TERMINAL {
            q = q.bind(*t);
        }
        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|r| {
                row_to_job(
                    r.get("job_id"),
                    r.get("topic"),
                    r.get("base_url"),
                    r.get("overall_status"),
                    r.get("created_at"),
                    r.get("completed_at"),
                )
            })
            .collect())
    }

    async fn purge_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let placeholders = super::AI_JOB_TERMINAL
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "DELETE FROM ai_job WHERE completed_at < ? AND overall_status IN ({placeholders})"
        );
        let mut q = sqlx::query(&sql).bind(cutoff.to_rfc3339());
        for t in super::AI_JOB_TERMINAL {
            q = q.bind(*t);
        }
        let result = q.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
