//! Domain entities shared across the search and deep-search subsystems.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::FailureReason;

/// Opaque, client-correlatable job identifier.
pub type JobId = String;
/// Opaque sub-task identifier, unique across all jobs.
pub type SubTaskId = String;

pub fn new_job_id() -> JobId {
    uuid::Uuid::new_v4().to_string()
}

pub fn new_sub_task_id() -> SubTaskId {
    uuid::Uuid::new_v4().to_string()
}

// ============================================================================
// SEARCH JOB
// ============================================================================

/// Lifecycle state of a search job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl SearchStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }

    /// Terminal states are absorbing: once reached, no further transition is valid.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }
}

impl fmt::Display for SearchStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for SearchStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        Ok(match s {
            "pending" => Self::Pending,
            "running" => Self::Running,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" | "canceled" => Self::Cancelled,
            "timeout" | "timed_out" => Self::Timeout,
            _ => return Err(()),
        })
    }
}

/// The resolved time window for a search: either a named preset (`"7d"`) or
/// an explicit `[since, until]` pair. Exactly one form is ever set on a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SearchWindow {
    Preset(String),
    Range {
        since: DateTime<Utc>,
        until: DateTime<Utc>,
    },
    Unbounded,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueryMode {
    Substring,
    Fts,
}

/// The result of normalization: a safe, ready-to-run query.
#[derive(Debug, Clone)]
pub struct NormalizedQuery {
    pub q: String,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub mode: QueryMode,
}

#[derive(Debug, Clone)]
pub struct SearchJob {
    pub job_id: JobId,
    pub query: String,
    pub window: SearchWindow,
    pub priority_urls: Vec<String>,
    pub status: SearchStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub failure_reason: Option<FailureReason>,
}

impl SearchJob {
    pub fn new(query: String, window: SearchWindow, priority_urls: Vec<String>) -> Self {
        Self {
            job_id: new_job_id(),
            query,
            window,
            priority_urls,
            status: SearchStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
            failure_reason: None,
        }
    }
}

// ============================================================================
// SEARCH EVENT / JOURNAL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventType {
    Connected,
    Progress,
    PartialResult,
    SourceError,
    TaskDispatched,
    TaskCompleted,
    Evidence,
    Done,
    Error,
    Overflow,
}

impl EventType {
    /// A stream may end in exactly one of these; see `Journal::is_terminal`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Done | Self::Error | Self::Overflow)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchEvent {
    pub job_id: JobId,
    pub seq: u64,
    pub event_type: EventType,
    pub data: serde_json::Value,
    pub at: DateTime<Utc>,
}

// ============================================================================
// ARTICLE (corpus item)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize, sqlx::FromRow)]
pub struct Article {
    pub id: String,
    pub title: String,
    pub content: String,
    pub url: String,
    pub source: String,
    pub published_date: Option<DateTime<Utc>>,
    pub collected_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page_index: u32,
    pub page_size: u32,
    pub total_elements: u64,
}

// ============================================================================
// DEEP SEARCH / AI JOB
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiOverallStatus {
    Pending,
    InProgress,
    Completed,
    PartialSuccess,
    Failed,
    Cancelled,
    Timeout,
}

impl AiOverallStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::PartialSuccess => "partial_success",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::PartialSuccess | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }
}

impl fmt::Display for AiOverallStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AiOverallStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        Ok(match s {
            "pending" => Self::Pending,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "partial_success" => Self::PartialSuccess,
            "failed" => Self::Failed,
            "cancelled" | "canceled" => Self::Cancelled,
            "timeout" | "timed_out" => Self::Timeout,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AiSubTaskStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
    Cancelled,
    Timeout,
}

impl AiSubTaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::InProgress => "in_progress",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
            Self::Timeout => "timeout",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Completed | Self::Failed | Self::Cancelled | Self::Timeout
        )
    }
}

impl fmt::Display for AiSubTaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for AiSubTaskStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        Ok(match s {
            "pending" => Self::Pending,
            "in_progress" => Self::InProgress,
            "completed" => Self::Completed,
            "failed" => Self::Failed,
            "cancelled" | "canceled" => Self::Cancelled,
            "timeout" | "timed_out" => Self::Timeout,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct AiJob {
    pub job_id: JobId,
    pub topic: String,
    pub base_url: Option<String>,
    pub overall_status: AiOverallStatus,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl AiJob {
    pub fn new(topic: String, base_url: Option<String>) -> Self {
        Self {
            job_id: new_job_id(),
            topic,
            base_url,
            overall_status: AiOverallStatus::Pending,
            created_at: Utc::now(),
            completed_at: None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AiSubTask {
    pub sub_task_id: SubTaskId,
    pub job_id: JobId,
    pub provider_id: String,
    pub task_type: String,
    pub status: AiSubTaskStatus,
    pub result_payload: Option<serde_json::Value>,
    pub error_message: Option<String>,
    pub failure_reason: Option<FailureReason>,
    pub retry_count: u32,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    /// SHA-256 hex digest of the one-time callback token; the raw token is
    /// never persisted (see the callback-token-persistence decision).
    pub callback_token_hash: String,
}

impl AiSubTask {
    pub fn new(job_id: JobId, provider_id: String, task_type: String, callback_token_hash: String) -> Self {
        Self {
            sub_task_id: new_sub_task_id(),
            job_id,
            provider_id,
            task_type,
            status: AiSubTaskStatus::Pending,
            result_payload: None,
            error_message: None,
            failure_reason: None,
            retry_count: 0,
            created_at: Utc::now(),
            completed_at: None,
            callback_token_hash,
        }
    }
}

// ============================================================================
// CRAWL EVIDENCE
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    Pro,
    Con,
    Neutral,
}

impl Stance {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pro => "pro",
            Self::Con => "con",
            Self::Neutral => "neutral",
        }
    }
}

impl FromStr for Stance {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        Ok(match s {
            "pro" => Self::Pro,
            "con" => Self::Con,
            _ => Self::Neutral,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceCategory {
    News,
    Community,
    Blog,
    Official,
    Academic,
}

impl SourceCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::News => "news",
            Self::Community => "community",
            Self::Blog => "blog",
            Self::Official => "official",
            Self::Academic => "academic",
        }
    }

    /// Infers a category from a URL host against a small closed domain map.
    /// Falls back to `Blog`, the least specific category, when unknown.
    pub fn infer_from_host(host: &str) -> Self {
        let host = host.trim_start_matches("www.");
        if host.ends_with(".gov") || host.ends_with(".mil") {
            Self::Official
        } else if host.ends_with(".edu") || host.contains("arxiv.org") {
            Self::Academic
        } else if host.contains("reddit.com") || host.contains("news.ycombinator.com") || host.contains("stackexchange.com")
        {
            Self::Community
        } else if host.contains("reuters.com")
            || host.contains("apnews.com")
            || host.contains("bbc.")
            || host.contains("nytimes.com")
        {
            Self::News
        } else {
            Self::Blog
        }
    }
}

impl FromStr for SourceCategory {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, ()> {
        Ok(match s {
            "news" => Self::News,
            "community" => Self::Community,
            "blog" => Self::Blog,
            "official" => Self::Official,
            "academic" => Self::Academic,
            _ => return Err(()),
        })
    }
}

#[derive(Debug, Clone)]
pub struct CrawlEvidence {
    pub id: String,
    pub job_id: JobId,
    pub url: String,
    pub title: String,
    pub stance: Stance,
    pub snippet: String,
    pub source_category: SourceCategory,
    pub created_at: DateTime<Utc>,
}

impl CrawlEvidence {
    pub fn new(
        job_id: JobId,
        url: String,
        title: String,
        stance: Stance,
        snippet: String,
        source_category: SourceCategory,
    ) -> Self {
        Self {
            id: uuid::Uuid::new_v4().to_string(),
            job_id,
            url,
            title,
            stance,
            snippet,
            source_category,
            created_at: Utc::now(),
        }
    }
}
