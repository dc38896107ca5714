//! Corpus full-text search, composed from the query normalizer and the
//! `ArticleRepository` port.

use std::sync::Arc;

use crate::domain::models::{Article, NormalizedQuery, Page};
use crate::error::Result;
use crate::repository::ArticleRepository;

#[derive(Clone)]
pub struct CorpusSearch {
    articles: Arc<dyn ArticleRepository>,
}

impl CorpusSearch {
    pub fn new(articles: Arc<dyn ArticleRepository>) -> Self {
        Self { articles }
    }

    pub async fn search(
        &self,
        query: &NormalizedQuery,
        page_index: u32,
        page_size: u32,
    ) -> Result<Page<Article>> {
        self.articles.search(query, page_index, page_size).await
    }
}
