//! Shared test fixtures: an in-memory SQLite pool with migrations applied,
//! plus small builders for seeding sample rows.

#![cfg(test)]

use sqlx::SqlitePool;
use uuid::Uuid;

/// Creates an in-memory SQLite database with migrations applied.
pub async fn setup_test_db() -> SqlitePool {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await
        .expect("failed to create in-memory test database");
    sqlx::migrate!()
        .run(&pool)
        .await
        .expect("failed to run migrations");
    pool
}

/// Inserts a single article row (and its FTS shadow, via trigger) for search tests.
pub async fn insert_sample_article(pool: &SqlitePool, title: &str, content: &str) {
    let id = Uuid::new_v4().to_string();
    let now = chrono::Utc::now().to_rfc3339();
    sqlx::query(
        "INSERT INTO article (id, title, content, url, source, published_date, collected_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
    )
    .bind(&id)
    .bind(title)
    .bind(content)
    .bind(format!("https://example.com/{id}"))
    .bind("test-source")
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await
    .expect("failed to insert sample article");
}
