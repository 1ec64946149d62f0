//! Similarity index over past interactions
//!
//! Each completed chat turn is embedded and upserted scoped to
//! `user:session`; retrieval is a black-box top-k cosine lookup that feeds
//! the next response prompt.

use crate::error::{EngineError, Result};
use async_trait::async_trait;
use sqlx::{Row, SqlitePool};

/// Top-k lookup service over embedded interactions.
#[async_trait]
pub trait SimilarityIndex: Send + Sync {
    /// Insert or overwrite the interaction identified by `id`.
    async fn upsert(
        &self,
        text: &str,
        embedding: &[f32],
        user: &str,
        session: &str,
        id: &str,
    ) -> Result<()>;

    /// Return up to `k` interactions most similar to `embedding`, scoped to
    /// `(user, session)`, best first, with their cosine scores.
    async fn query(
        &self,
        embedding: &[f32],
        user: &str,
        session: &str,
        k: usize,
    ) -> Result<Vec<(String, f32)>>;
}

/// SQLite-backed index: vectors stored as JSON rows, ranked in memory.
///
/// Fine for per-session interaction counts; a dedicated vector store can be
/// dropped in behind the trait without touching the orchestrator.
#[derive(Clone)]
pub struct SqliteSimilarityIndex {
    pool: SqlitePool,
}

impl SqliteSimilarityIndex {
    pub fn new(pool: SqlitePool) -> Self {
        Self { pool }
    }

    fn scope(user: &str, session: &str) -> String {
        format!("{user}:{session}")
    }
}

#[async_trait]
impl SimilarityIndex for SqliteSimilarityIndex {
    async fn upsert(
        &self,
        text: &str,
        embedding: &[f32],
        user: &str,
        session: &str,
        id: &str,
    ) -> Result<()> {
        let embedding_json = serde_json::to_string(embedding)
            .map_err(|e| EngineError::Serialization(e.to_string()))?;

        sqlx::query(
            r#"
            INSERT INTO interactions (id, user_session, content, embedding, created_at)
            VALUES (?, ?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE SET
                content = excluded.content,
                embedding = excluded.embedding
            "#,
        )
        .bind(id)
        .bind(Self::scope(user, session))
        .bind(text)
        .bind(embedding_json)
        .bind(chrono::Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn query(
        &self,
        embedding: &[f32],
        user: &str,
        session: &str,
        k: usize,
    ) -> Result<Vec<(String, f32)>> {
        let rows = sqlx::query("SELECT content, embedding FROM interactions WHERE user_session = ?")
            .bind(Self::scope(user, session))
            .fetch_all(&self.pool)
            .await?;

        let mut results = Vec::with_capacity(rows.len());
        for row in rows {
            let content: String = row.try_get("content")?;
            let stored_json: String = row.try_get("embedding")?;
            let stored: Vec<f32> = serde_json::from_str(&stored_json)
                .map_err(|e| EngineError::Serialization(e.to_string()))?;

            results.push((content, cosine_similarity(embedding, &stored)));
        }

        results.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        results.truncate(k);

        Ok(results)
    }
}

/// Compute cosine similarity between two vectors
fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let dot_product: f32 = a.iter().zip(b.iter()).map(|(x, y)| x * y).sum();
    let norm_a: f32 = a.iter().map(|x| x * x).sum::<f32>().sqrt();
    let norm_b: f32 = b.iter().map(|x| x * x).sum::<f32>().sqrt();

    if norm_a == 0.0 || norm_b == 0.0 {
        return 0.0;
    }

    dot_product / (norm_a * norm_b)
}
