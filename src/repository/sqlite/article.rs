use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

use crate::domain::models::{Article, NormalizedQuery, Page, QueryMode};
use crate::error::Result;
use crate::repository::sqlite::parse_datetime;
use crate::repository::ArticleRepository;

pub struct SqliteArticleRepository {
    pool: SqlitePool,
}

impl SqliteArticleRepository {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }
}

fn row_to_article(
    id: String,
    title: String,
    content: String,
    url: String,
    source: String,
    published_date: Option<String>,
    collected_at: String,
) -> Article {
    Article {
        id,
        title,
        content,
        url,
        source,
        published_date: published_date.map(|s| parse_datetime(&s)),
        collected_at: parse_datetime(&collected_at),
    }
}

// All placeholders below are plain anonymous `?`, bound strictly in the order
// they appear in the SQL text — avoids mixing SQLite's numbered (`?1`) and
// anonymous placeholder forms within the same statement.
const DATE_FILTER: &str = "AND (
    (a.published_date IS NOT NULL AND a.published_date >= COALESCE(?, a.published_date) AND a.published_date <= COALESCE(?, a.published_date))
    OR (a.published_date IS NULL AND a.collected_at >= COALESCE(?, a.collected_at) AND a.collected_at <= COALESCE(?, a.collected_at))
)";

#[async_trait]
impl ArticleRepository for SqliteArticleRepository {
    async fn search(
        &self,
        query: &NormalizedQuery,
        page_index: u32,
        page_size: u32,
    ) -> Result<Page<Article>> {
        let offset = (page_index as i64) * (page_size as i64);
        let since = query.since.map(|d| d.to_rfc3339());
        let until = query.until.map(|d| d.to_rfc3339());

        let (items, total) = match query.mode {
            QueryMode::Fts => {
                let list_sql = format!(
                    "SELECT a.id, a.title, a.content, a.url, a.source, a.published_date, a.collected_at
                     FROM article_fts f
                     JOIN article a ON a.rowid = f.rowid
                     WHERE article_fts MATCH ? {DATE_FILTER}
                     ORDER BY bm25(article_fts) ASC, COALESCE(a.published_date, a.collected_at) DESC, a.id ASC
                     LIMIT ? OFFSET ?"
                );
                let rows = sqlx::query(&list_sql)
                    .bind(&query.q)
                    .bind(&since)
                    .bind(&until)
                    .bind(&since)
                    .bind(&until)
                    .bind(page_size as i64)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?;

                let count_sql = format!(
                    "SELECT COUNT(*) as c FROM article_fts f JOIN article a ON a.rowid = f.rowid
                     WHERE article_fts MATCH ? {DATE_FILTER}"
                );
                let total: i64 = sqlx::query(&count_sql)
                    .bind(&query.q)
                    .bind(&since)
                    .bind(&until)
                    .bind(&since)
                    .bind(&until)
                    .fetch_one(&self.pool)
                    .await?
                    .get("c");

                (rows, total)
            }
            QueryMode::Substring => {
                let pattern = format!("%{}%", query.q.replace('%', "\\%").replace('_', "\\_"));
                let list_sql = format!(
                    "SELECT a.id, a.title, a.content, a.url, a.source, a.published_date, a.collected_at
                     FROM article a
                     WHERE (a.title LIKE ? ESCAPE '\\' OR a.content LIKE ? ESCAPE '\\') {DATE_FILTER}
                     ORDER BY COALESCE(a.published_date, a.collected_at) DESC, a.id ASC
                     LIMIT ? OFFSET ?"
                );
                let rows = sqlx::query(&list_sql)
                    .bind(&pattern)
                    .bind(&pattern)
                    .bind(&since)
                    .bind(&until)
                    .bind(&since)
                    .bind(&until)
                    .bind(page_size as i64)
                    .bind(offset)
                    .fetch_all(&self.pool)
                    .await?;

                let count_sql = format!(
                    "SELECT COUNT(*) as c FROM article a
                     WHERE (a.title LIKE ? ESCAPE '\\' OR a.content LIKE ? ESCAPE '\\') {DATE_FILTER}"
                );
                let total: i64 = sqlx::query(&count_sql)
                    .bind(&pattern)
                    .bind(&pattern)
                    .bind(&since)
                    .bind(&until)
                    .bind(&since)
                    .bind(&until)
                    .fetch_one(&self.pool)
                    .await?
                    .get("c");

                (rows, total)
            }
        };

        let items = items
            .into_iter()
            .map(|r| {
                row_to_article(
                    r.get("id"),
                    r.get("title"),
                    r.get("content"),
                    r.get("url"),
                    r.get("source"),
                    r.get("published_date"),
                    r.get("collected_at"),
                )
            })
            .collect();

        Ok(Page {
            items,
            page_index,
            page_size,
            total_elements: total.max(0) as u64,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::models::QueryMode;
    use crate::test_utils::{insert_sample_article, setup_test_db};

    #[tokio::test]
    async fn fts_search_ranks_and_paginates() {
        let pool = setup_test_db().await;
        insert_sample_article(&pool, "bitcoin surges", "the price of bitcoin rose today").await;
        insert_sample_article(&pool, "ethereum news", "nothing about the b word here").await;
        let repo = SqliteArticleRepository::new(pool);

        let nq = NormalizedQuery {
            q: "bitcoin".into(),
            since: None,
            until: None,
            mode: QueryMode::Fts,
        };
        let page = repo.search(&nq, 0, 10).await.unwrap();
        assert_eq!(page.total_elements, 1);
        assert_eq!(page.items[0].title, "bitcoin surges");
    }

    #[tokio::test]
    async fn substring_search_matches_short_queries() {
        let pool = setup_test_db().await;
        insert_sample_article(&pool, "ai regulation", "body text").await;
        insert_sample_article(&pool, "unrelated", "body text").await;
        let repo = SqliteArticleRepository::new(pool);

        let nq = NormalizedQuery {
            q: "ai".into(),
            since: None,
            until: None,
            mode: QueryMode::Substring,
        };
        let page = repo.search(&nq, 0, 10).await.unwrap();
        assert_eq!(page.total_elements, 1);
    }
}
