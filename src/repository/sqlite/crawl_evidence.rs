use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::models::{CrawlEvidence, JobId, SourceCategory, Stance};
use crate::error::Result;
use crate::repository::sqlite::parse_datetime;
use crate::repository::CrawlEvidenceRepository;

pub struct SqliteCrawlEvidenceRepository {
    pool: SqlitePool,
}

impl SqliteCrawlEvidenceRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl CrawlEvidenceRepository for SqliteCrawlEvidenceRepository {
    async fn insert(&self, evidence: &CrawlEvidence) -> Result<()> {
        sqlx::query(
            "INSERT INTO crawl_evidence (id, job_id, url, title, stance, snippet, source_category, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(job_id, url) DO NOTHING",
        )
        .bind(&evidence.id)
        .bind(&evidence.job_id)
        .bind(&evidence.url)
        .bind(&evidence.title)
        .bind(evidence.stance.as_str())
        .bind(&evidence.snippet)
        .bind(evidence.source_category.as_str())
        .bind(evidence.created_at.to_rfc3339())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn list_for_job(&self, job_id: &JobId) -> Result<Vec<CrawlEvidence>> {
        let rows = sqlx::query(
            "SELECT id, job_id, url, title, stance, snippet, source_category, created_at
             FROM crawl_evidence WHERE job_id = ?1 ORDER BY created_at ASC",
        )
        .bind(job_id)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows
            .into_iter()
            .map(|r| {
                let stance: String = r.get("stance");
                let category: String = r.get("source_category");
                let created_at: String = r.get("created_at");
                CrawlEvidence {
                    id: r.get("id"),
                    job_id: r.get("job_id"),
                    url: r.get("url"),
                    title: r.get("title"),
                    stance: stance.parse().unwrap_or(Stance::Neutral),
                    snippet: r.get("snippet"),
                    source_category: category.parse().unwrap_or(SourceCategory::Blog),
                    created_at: parse_datetime(&created_at),
                }
            })
            .collect())
    }

    async fn purge_for_jobs(&self, job_ids: &[JobId]) -> Result<u64> {
        if job_ids.is_empty() {
            return Ok(0);
        }
        let placeholders = job_ids.iter().map(|_| "?").collect::<Vec<_>>().join(",");
        let sql = format!("DELETE FROM crawl_evidence WHERE job_id IN ({placeholders})");
        let mut q = sqlx::query(&sql);
        for id in job_ids {
            q = q.bind(id);
        }
        let result = q.execute(&self.pool).await?;
        Ok(result.rows_affected())
    }
}
