//! SQLite-backed implementations of the repository ports.
//!
//! All queries use runtime-checked `sqlx::query`/`query_as`/`query_scalar`
//! rather than the compile-time `query!` macros, since this crate has no
//! live `DATABASE_URL` or `.sqlx` offline cache to validate against.

mod ai_job;
mod ai_sub_task;
mod article;
mod crawl_evidence;
mod search_job;

pub use ai_job::SqliteAiJobRepository;
pub use ai_sub_task::SqliteAiSubTaskRepository;
pub use article::SqliteArticleRepository;
pub use crawl_evidence::SqliteCrawlEvidenceRepository;
pub use search_job::SqliteSearchJobRepository;

use chrono::{DateTime, Utc};

/// Parses an RFC3339 timestamp column, falling back to `now` on malformed
/// data rather than failing the whole row read.
pub(crate) fn parse_datetime(s: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_datetime_opt(s: Option<String>) -> Option<DateTime<Utc>> {
    s.map(|s| parse_datetime(&s))
}

pub(crate) const SEARCH_TERMINAL: &[&str] = &["completed", "failed", "cancelled", "timeout"];
pub(crate) const AI_JOB_TERMINAL: &[&str] = &["completed", "partial_success", "failed", "cancelled", "timeout"];
pub(crate) const AI_SUB_TASK_TERMINAL: &[&str] = &["completed", "failed", "cancelled", "timeout"];
