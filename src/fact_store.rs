//! Per-user fact storage using SQLite
//!
//! One chat turn's fact set is written in one transaction: either every
//! valid candidate lands or none do.

use crate::error::Result;
use crate::types::{Fact, FactCandidate};

use sqlx::{Row, SqlitePool};
use std::sync::Arc;

/// Fact store for user-scoped fact persistence
#[derive(Clone)]
pub struct FactStore {
    pool: SqlitePool,
}

impl std::fmt::Debug for FactStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FactStore")
            .field("pool", &"<SqlitePool>")
            .finish()
    }
}

impl FactStore {
    pub fn new(pool: SqlitePool) -> Arc<Self> {
        Arc::new(Self { pool })
    }

    /// List all facts stored for a user, oldest first
    pub async fn list(&self, user_name: &str) -> Result<Vec<Fact>> {
        let rows = sqlx::query(
            r#"
            SELECT id, user_name, fact_type, fact_content, source_message, created_at
            FROM facts
            WHERE user_name = ?
            ORDER BY created_at ASC
            "#,
        )
        .bind(user_name)
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.iter().map(row_to_fact).collect())
    }

    /// Insert all valid candidates for a user in a single transaction.
    ///
    /// Candidates missing `fact_content` or `source_message` are skipped.
    pub async fn add_facts(
        &self,
        user_name: &str,
        candidates: &[FactCandidate],
    ) -> Result<Vec<Fact>> {
        let mut tx = self.pool.begin().await?;
        let added = insert_candidates(&mut tx, user_name, candidates).await?;
        tx.commit().await?;

        Ok(added)
    }

    /// Delete every fact for `user_name` whose content contains `needle`,
    /// then insert the new candidates, all in one transaction.
    ///
    /// Returns the number of deleted rows and the inserted facts.
    pub async fn replace_matching(
        &self,
        user_name: &str,
        conflicting: &[String],
        candidates: &[FactCandidate],
    ) -> Result<(u64, Vec<Fact>)> {
        let mut tx = self.pool.begin().await?;

        let mut deleted = 0u64;
        for needle in conflicting {
            let result = sqlx::query(
                "DELETE FROM facts WHERE user_name = ? AND fact_content LIKE '%' || ? || '%' ESCAPE '\\'",
            )
            .bind(user_name)
            .bind(escape_like(needle))
            .execute(&mut *tx)
            .await?;
            deleted += result.rows_affected();
        }

        let added = insert_candidates(&mut tx, user_name, candidates).await?;
        tx.commit().await?;

        Ok((deleted, added))
    }

    /// Delete facts whose content contains `needle`, returning the count
    pub async fn delete_matching(&self, user_name: &str, needle: &str) -> Result<u64> {
        let result = sqlx::query(
            "DELETE FROM facts WHERE user_name = ? AND fact_content LIKE '%' || ? || '%' ESCAPE '\\'",
        )
        .bind(user_name)
        .bind(escape_like(needle))
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Number of facts stored for a user
    pub async fn count(&self, user_name: &str) -> Result<i64> {
        let row = sqlx::query("SELECT COUNT(*) AS n FROM facts WHERE user_name = ?")
            .bind(user_name)
            .fetch_one(&self.pool)
            .await?;

        Ok(row.try_get("n")?)
    }
}

/// Escape `LIKE` metacharacters so a conflict description is matched as a
/// literal substring, never as a pattern
fn escape_like(needle: &str) -> String {
    needle
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}

async fn insert_candidates(
    tx: &mut sqlx::Transaction<'_, sqlx::Sqlite>,
    user_name: &str,
    candidates: &[FactCandidate],
) -> Result<Vec<Fact>> {
    let mut added = Vec::new();

    for candidate in candidates.iter().filter(|c| c.is_valid()) {
        let fact = Fact::from_candidate(user_name, candidate);

        sqlx::query(
            r#"
            INSERT INTO facts (id, user_name, fact_type, fact_content, source_message, created_at)
            VALUES (?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&fact.id)
        .bind(&fact.user_name)
        .bind(&fact.fact_type)
        .bind(&fact.fact_content)
        .bind(&fact.source_message)
        .bind(fact.created_at)
        .execute(&mut **tx)
        .await?;

        added.push(fact);
    }

    Ok(added)
}

/// Helper: Convert database row to Fact
fn row_to_fact(row: &sqlx::sqlite::SqliteRow) -> Fact {
    Fact {
        id: row.try_get("id").unwrap_or_default(),
        user_name: row.try_get("user_name").unwrap_or_default(),
        fact_type: row.try_get("fact_type").unwrap_or_default(),
        fact_content: row.try_get("fact_content").unwrap_or_default(),
        source_message: row.try_get("source_message").unwrap_or_default(),
        created_at: row
            .try_get("created_at")
            .unwrap_or_else(|_| chrono::Utc::now()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn test_store() -> Arc<FactStore> {
        FactStore::new(crate::test_pool().await)
    }

    #[tokio::test]
    async fn add_facts_skips_invalid_candidates() {
        let store = test_store().await;
        let candidates = vec![
            FactCandidate::new("preference", "likes coffee", "I like coffee"),
            FactCandidate {
                fact_type: Some("preference".into()),
                fact_content: None,
                source_message: Some("something".into()),
            },
            FactCandidate {
                fact_type: None,
                fact_content: Some("has a dog".into()),
                source_message: Some("".into()),
            },
        ];

        let added = store.add_facts("alice", &candidates).await.unwrap();
        assert_eq!(added.len(), 1);
        assert_eq!(store.count("alice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn replace_matching_deletes_substring_hits_only() {
        let store = test_store().await;
        store
            .add_facts(
                "alice",
                &[
                    FactCandidate::new("preference", "likes coffee", "I like coffee"),
                    FactCandidate::new("location", "works in Delhi", "I work in Delhi"),
                ],
            )
            .await
            .unwrap();

        let (deleted, added) = store
            .replace_matching(
                "alice",
                &["coffee".to_string()],
                &[FactCandidate::new("preference", "hates coffee", "I hate coffee")],
            )
            .await
            .unwrap();

        assert_eq!(deleted, 1);
        assert_eq!(added.len(), 1);

        let remaining = store.list("alice").await.unwrap();
        let contents: Vec<&str> = remaining.iter().map(|f| f.fact_content.as_str()).collect();
        assert!(contents.contains(&"works in Delhi"));
        assert!(contents.contains(&"hates coffee"));
        assert!(!contents.contains(&"likes coffee"));
    }

    #[tokio::test]
    async fn substring_matching_can_delete_multiple_facts() {
        // The loose heuristic deletes every fact sharing the flagged
        // substring, related or not. Documented blast radius.
        let store = test_store().await;
        store
            .add_facts(
                "alice",
                &[
                    FactCandidate::new("preference", "likes coffee", "m1"),
                    FactCandidate::new("habit", "drinks coffee every morning", "m2"),
                    FactCandidate::new("location", "lives in Pune", "m3"),
                ],
            )
            .await
            .unwrap();

        let deleted = store.delete_matching("alice", "coffee").await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.count("alice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn like_wildcards_in_descriptions_match_literally() {
        let store = test_store().await;
        store
            .add_facts(
                "alice",
                &[
                    FactCandidate::new("preference", "likes coffee", "m1"),
                    FactCandidate::new("preference", "wants 100% cotton shirts", "m2"),
                ],
            )
            .await
            .unwrap();

        // A bare wildcard must not match everything
        assert_eq!(store.delete_matching("alice", "%").await.unwrap(), 0);
        assert_eq!(store.delete_matching("alice", "c_ffee").await.unwrap(), 0);

        // A literal percent sign still matches the fact that contains one
        assert_eq!(store.delete_matching("alice", "100%").await.unwrap(), 1);
        assert_eq!(store.count("alice").await.unwrap(), 1);
    }

    #[tokio::test]
    async fn facts_are_scoped_per_user() {
        let store = test_store().await;
        store
            .add_facts("alice", &[FactCandidate::new("preference", "likes tea", "m")])
            .await
            .unwrap();
        store
            .add_facts("bob", &[FactCandidate::new("preference", "likes tea", "m")])
            .await
            .unwrap();

        store.delete_matching("alice", "tea").await.unwrap();
        assert_eq!(store.count("alice").await.unwrap(), 0);
        assert_eq!(store.count("bob").await.unwrap(), 1);
    }
}
