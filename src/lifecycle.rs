//! Process lifecycle: logging setup, database init, and explicit
//! dependency wiring.
//!
//! Some application frameworks wire services through a managed-state
//! registry; this core has no such framework to lean on, so `Context` plays
//! the same role explicitly — one struct holding every collaborator a
//! caller needs, built once at startup and shared via `Arc`.

use std::sync::Arc;

use anyhow::{Context as _, Result};
use sqlx::SqlitePool;

use crate::config::CoreConfig;
use crate::deep::callback::CallbackIngress;
use crate::deep::orchestrator::{DeepSearchOrchestrator, ProviderDispatcher};
use crate::events::EventBus;
use crate::repository::sqlite::{
    SqliteAiJobRepository, SqliteAiSubTaskRepository, SqliteArticleRepository,
    SqliteCrawlEvidenceRepository, SqliteSearchJobRepository,
};
use crate::search::corpus::CorpusSearch;
use crate::search::fanout::{CorpusAdapter, SearchAdapter};
use crate::search::job_manager::SearchJobManager;
use crate::sweeper::Sweeper;

/// Initializes `tracing-subscriber`: `RUST_LOG`-driven filtering with `sqlx`
/// turned down to `warn` by default, compact formatting, no target module noise.
pub fn init_logging() {
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("sqlx=warn".parse().unwrap())
                .add_directive("info".parse().unwrap()),
        )
        .compact()
        .with_target(false)
        .init();
}

/// Connects to SQLite and runs embedded migrations.
pub async fn init_db(database_url: &str) -> Result<SqlitePool> {
    let pool = SqlitePool::connect(database_url)
        .await
        .with_context(|| format!("failed to connect to database at {database_url}"))?;

    sqlx::migrate!()
        .run(&pool)
        .await
        .context("failed to run migrations")?;

    Ok(pool)
}

/// Every long-lived collaborator the core needs, wired together once.
pub struct Context {
    pub pool: SqlitePool,
    pub events: EventBus,
    pub search_manager: Arc<SearchJobManager>,
    pub orchestrator: Arc<DeepSearchOrchestrator>,
    pub callback_ingress: Arc<CallbackIngress>,
    pub sweeper: Arc<Sweeper>,
}

impl Context {
    /// Builds the full dependency graph. `external_search_adapters` and
    /// `providers` are supplied by the caller (the binary/embedder) since
    /// which external sources and AI providers are enabled is deployment
    /// configuration, not something this core hardcodes.
    pub fn build(
        pool: SqlitePool,
        config: CoreConfig,
        external_search_adapters: Vec<Arc<dyn SearchAdapter>>,
        providers: Vec<Arc<dyn ProviderDispatcher>>,
        callback_base_url: String,
    ) -> Self {
        let events = EventBus::new(config.event_buffer_size);

        let search_jobs = Arc::new(SqliteSearchJobRepository::new(pool.clone()));
        let articles = Arc::new(SqliteArticleRepository::new(pool.clone()));
        let ai_jobs = Arc::new(SqliteAiJobRepository::new(pool.clone()));
        let ai_sub_tasks = Arc::new(SqliteAiSubTaskRepository::new(pool.clone()));
        let evidence = Arc::new(SqliteCrawlEvidenceRepository::new(pool.clone()));

        let corpus = CorpusSearch::new(articles);
        let corpus_adapter = Arc::new(CorpusAdapter::new(corpus, 20));

        let search_manager = Arc::new(SearchJobManager::new(
            search_jobs.clone(),
            events.clone(),
            config.clone(),
            corpus_adapter,
            external_search_adapters,
        ));

        let orchestrator = Arc::new(DeepSearchOrchestrator::new(
            ai_jobs.clone(),
            ai_sub_tasks.clone(),
            events.clone(),
            config.clone(),
            providers.clone(),
            callback_base_url.clone(),
        ));

        let callback_ingress = Arc::new(CallbackIngress::new(
            ai_sub_tasks.clone(),
            evidence,
            orchestrator.clone(),
            providers,
            config.clone(),
            callback_base_url,
        ));

        let sweeper = Arc::new(Sweeper::new(
            search_jobs,
            ai_jobs,
            ai_sub_tasks,
            search_manager.clone(),
            orchestrator.clone(),
            config,
        ));

        Self {
            pool,
            events,
            search_manager,
            orchestrator,
            callback_ingress,
            sweeper,
        }
    }

    /// Spawns the sweeper loop; the returned handle lets callers abort it on shutdown.
    pub fn spawn_sweeper(&self) -> tokio::task::JoinHandle<()> {
        self.sweeper.clone().spawn()
    }
}
