use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::{Row, SqlitePool};

use crate::domain::models::{JobId, SearchJob, SearchStatus, SearchWindow};
use crate::error::{FailureCategory, FailureCode, FailureReason, Result};
use crate::repository::sqlite::{parse_datetime, parse_datetime_opt};
use crate::repository::SearchJobRepository;

pub struct SqliteSearchJobRepository {
    pool: SqlitePool,
}

impl SqliteSearchJobRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn window_to_json(window: &SearchWindow) -> serde_json::Value {
    match window {
        SearchWindow::Unbounded => serde_json::json!({"kind": "unbounded"}),
        SearchWindow::Preset(p) => serde_json::json!({"kind": "preset", "value": p}),
        SearchWindow::Range { since, until } => {
            serde_json::json!({"kind": "range", "since": since, "until": until})
        }
    }
}

fn window_from_json(v: &serde_json::Value) -> SearchWindow {
    match v.get("kind").and_then(|k| k.as_str()) {
        Some("preset") => SearchWindow::Preset(
            v.get("value").and_then(|s| s.as_str()).unwrap_or("").to_string(),
        ),
        Some("range") => {
            let since = v
                .get("since")
                .and_then(|s| s.as_str())
                .map(parse_datetime)
                .unwrap_or_else(Utc::now);
            let until = v
                .get("until")
                .and_then(|s| s.as_str())
                .map(parse_datetime)
                .unwrap_or_else(Utc::now);
            SearchWindow::Range { since, until }
        }
        _ => SearchWindow::Unbounded,
    }
}

fn row_to_job(
    job_id: String,
    query: String,
    window_json: String,
    priority_urls_json: String,
    status: String,
    created_at: String,
    completed_at: Option<String>,
    failure_code: Option<String>,
    failure_category: Option<String>,
) -> SearchJob {
    let window = window_from_json(&serde_json::from_str(&window_json).unwrap_or_default());
    let priority_urls: Vec<String> = serde_json::from_str(&priority_urls_json).unwrap_or_default();
    let failure_reason = failure_code.and_then(|c| c.parse::<FailureCode>().ok()).map(|code| {
        let category = failure_category
            .and_then(|c| match c.as_str() {
                "timeout" => Some(FailureCategory::Timeout),
                "network" => Some(FailureCategory::Network),
                "service" => Some(FailureCategory::Service),
                "content" => Some(FailureCategory::Content),
                "processing" => Some(FailureCategory::Processing),
                "job" => Some(FailureCategory::Job),
                _ => Some(FailureCategory::Unknown),
            })
            .unwrap_or(FailureCategory::Unknown);
        FailureReason { code, category }
    });

    SearchJob {
        job_id,
        query,
        window,
        priority_urls,
        status: status.parse().unwrap_or(SearchStatus::Pending),
        created_at: parse_datetime(&created_at),
        completed_at: parse_datetime_opt(completed_at),
        failure_reason,
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

#[async_trait]
impl SearchJobRepository for SqliteSearchJobRepository {
    async fn create(&self, job: &SearchJob) -> Result<()> {
        let window_json = window_to_json(&job.window).to_string();
        let priority_urls_json = serde_json::to_string(&job.priority_urls).unwrap_or_default();
        sqlx::query(
            "INSERT INTO search_job (job_id, query, window_json, priority_urls_json, status, created_at, completed_at, failure_code, failure_category)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, NULL, NULL, NULL)",
        )
        .bind(&job.job_id)
        .bind(&job.query)
        .bind(window_json)
        .bind(priority_urls_json)
        .bind(job.status.as_str())
        .bind(job.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn get(&self, job_id: &JobId) -> Result<Option<SearchJob>> {
        let row = sqlx::query(
            "SELECT job_id, query, window_json, priority_urls_json, status, created_at, completed_at, failure_code, failure_category
             FROM search_job WHERE job_id = ?1",
        )
        .bind(job_id)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|r| {
            row_to_job(
                r.get("job_id"),
                r.get("query"),
                r.get("window_json"),
                r.get("priority_urls_json"),
                r.get("status"),
                r.get("created_at"),
                r.get("completed_at"),
                r.get("failure_code"),
                r.get("failure_category"),
            )
        }))
    }

    async fn update_status(
        &self,
        job_id: &JobId,
        status: SearchStatus,
        failure: Option<FailureReason>,
    ) -> Result<bool> {
        let completed_at = status.is_terminal().then(|| Utc::now().to_rfc3339());
        let (code, category) = match failure {
            Some(f) => (Some(f.code.as_str()), Some(category_str(f.category))),
            None => (None, None),
        };
        let placeholders = super::SEARCH_TERMINAL
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "UPDATE search_job SET status = ?1, completed_at = COALESCE(?2, completed_at), failure_code = ?3, failure_category = ?4
             WHERE job_id = ?5 AND status NOT IN ({placeholders})"
        );
        let mut q = sqlx::query(&sql)
            .bind(status.as_str())
            .bind(completed_at)
            .bind(code)
            .bind(category)
            .bind(job_id);
        for t in super::SEARCH_TERMINAL {
            q = q.bind(*t);
        }
        let result = q.execute(&self.pool).await?;
        Ok(result.rows_affected() > 0)
    }

    async fn list_non_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<SearchJob>> {
        let placeholders = super::SEARCH_TERMINAL
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "SELECT job_id, query, window_json, priority_urls_json, status, created_at, completed_at, failure_code, failure_category
             FROM search_job WHERE created_at < ? AND status NOT IN ({placeholders})"
        );
        let mut q = sqlx::query(&sql).bind(cutoff.to_rfc3339());
        for t in super::SEARCH_TERMINAL {
            q = q.bind(*t);
        }
        let rows = q.fetch_all(&self.pool).await?;
        Ok(rows
            .into_iter()
            .map(|r| {
                row_to_job(
                    r.get("job_id"),
                    r.get("query"),
                    r.get("window_json"),
                    r.get("priority_urls_json"),
                    r.get("status"),
                    r.get("created_at"),
                    r.get("completed_at"),
                    r.get("failure_code"),
                    r.get("failure_category"),
                )
            })
            .collect())
    }

    async fn purge_terminal_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64> {
        let placeholders = super::SEARCH_TERMINAL
            .iter()
            .map(|_| "?")
            .collect::<Vec<_>>()
            .join(",");
        let sql = format!(
            "DELETE FROM search_job WHERE completed_at < ? AND status IN ({placeholders})"
        );
        let mut q = sqlx::query(&sql).bind(cutoff.to_rfc3339());
        for t in super::SEARCH_TERMINAL {
            q = q.bind(*t);
        }
        let result = q.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
