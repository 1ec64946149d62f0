//! # Remora - Conversational Memory Consolidation for AI Chat Agents
//!
//! Remora watches a chat session, extracts durable facts about the user
//! from each message, detects contradictions against previously stored
//! facts via a text oracle, reconciles the fact store under a configurable
//! policy, and retrieves semantically similar past interactions to enrich
//! the next prompt.

pub mod conflict;
pub mod embedding;
pub mod error;
pub mod extractor;
pub mod fact_store;
pub mod oracle;
pub mod orchestrator;
pub mod prompts;
pub mod reconciler;
pub mod session;
pub mod similarity;
pub mod types;

pub use conflict::{parse_verdict, ConflictDetector};
pub use embedding::{EmbeddingProvider, HashEmbeddingProvider, HttpEmbeddingProvider};
pub use error::{EngineError, Result};
pub use extractor::FactExtractor;
pub use fact_store::FactStore;
pub use oracle::{ChatCompletionsOracle, Oracle, ScriptedOracle, DEFAULT_ORACLE_TIMEOUT};
pub use orchestrator::{ChatOrchestrator, OrchestratorConfig};
pub use reconciler::MemoryReconciler;
pub use session::{SessionStore, DEFAULT_HISTORY_CAP};
pub use similarity::{SimilarityIndex, SqliteSimilarityIndex};
pub use types::{
    ChatTurn, ConflictResult, Fact, FactCandidate, OverrideDecision, ReconcileAction,
    ReconcileStrategy, ReconciliationOutcome, Role, Session, SessionId, TurnOutcome,
};

use sqlx::sqlite::SqliteConnectOptions;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;

/// In-memory SQLite pool. Capped at one connection so every handle sees the
/// same database.
async fn connect_memory_pool() -> Result<SqlitePool> {
    let options = SqliteConnectOptions::new()
        .in_memory(true)
        .create_if_missing(true);

    let pool = sqlx::pool::PoolOptions::<sqlx::Sqlite>::new()
        .max_connections(1)
        .connect_with(options)
        .await?;

    Ok(pool)
}

/// Migrated in-memory pool for unit tests
#[cfg(test)]
pub(crate) async fn test_pool() -> SqlitePool {
    let pool = connect_memory_pool().await.expect("in-memory SQLite");
    sqlx::migrate!("./migrations")
        .run(&pool)
        .await
        .expect("migrations");
    pool
}

/// Main engine - wires the stores, collaborators, and orchestrator over one
/// SQLite database
#[derive(Clone)]
pub struct MemoryEngine {
    pool: SqlitePool,
    oracle: Arc<dyn Oracle>,
    facts: Arc<FactStore>,
    sessions: Arc<SessionStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn SimilarityIndex>,
    config: OrchestratorConfig,
    orchestrator: ChatOrchestrator,
}

impl std::fmt::Debug for MemoryEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryEngine")
            .field("config", &self.config)
            .finish()
    }
}

impl MemoryEngine {
    /// Open (or create) the engine's database under `data_dir` and wire the
    /// default collaborators around the given oracle.
    pub async fn new(data_dir: impl AsRef<Path>, oracle: Arc<dyn Oracle>) -> Result<Self> {
        let data_dir = data_dir.as_ref().to_path_buf();
        std::fs::create_dir_all(&data_dir)?;

        let sqlite_path = data_dir.join("remora.db");
        let options = SqliteConnectOptions::new()
            .filename(&sqlite_path)
            .create_if_missing(true);

        let pool = SqlitePool::connect_with(options).await?;
        Self::from_pool(pool, oracle).await
    }

    /// Fully in-memory engine, handy for tests and demos
    pub async fn in_memory(oracle: Arc<dyn Oracle>) -> Result<Self> {
        let pool = connect_memory_pool().await?;
        Self::from_pool(pool, oracle).await
    }

    async fn from_pool(pool: SqlitePool, oracle: Arc<dyn Oracle>) -> Result<Self> {
        sqlx::migrate!("./migrations")
            .run(&pool)
            .await
            .map_err(|e| EngineError::Database(e.into()))?;

        let facts = FactStore::new(pool.clone());
        let sessions = SessionStore::new(pool.clone());
        let embedder: Arc<dyn EmbeddingProvider> = Arc::new(HashEmbeddingProvider::default());
        let index: Arc<dyn SimilarityIndex> = Arc::new(SqliteSimilarityIndex::new(pool.clone()));
        let config = OrchestratorConfig::default();

        let orchestrator = ChatOrchestrator::new(
            oracle.clone(),
            sessions.clone(),
            facts.clone(),
            embedder.clone(),
            index.clone(),
            config.clone(),
        );

        Ok(Self {
            pool,
            oracle,
            facts,
            sessions,
            embedder,
            index,
            config,
            orchestrator,
        })
    }

    /// Swap the embedding provider (e.g. for a learned model)
    pub fn with_embedder(mut self, embedder: Arc<dyn EmbeddingProvider>) -> Self {
        self.embedder = embedder;
        self.rebuild();
        self
    }

    /// Swap the similarity index implementation
    pub fn with_similarity_index(mut self, index: Arc<dyn SimilarityIndex>) -> Self {
        self.index = index;
        self.rebuild();
        self
    }

    /// Replace the orchestrator configuration
    pub fn with_config(mut self, config: OrchestratorConfig) -> Self {
        self.config = config;
        self.rebuild();
        self
    }

    /// Set the reconciliation strategy applied to confirmed conflicts
    pub fn with_strategy(mut self, strategy: ReconcileStrategy) -> Self {
        self.config.strategy = strategy;
        self.rebuild();
        self
    }

    /// Bound the number of turns retained per session
    pub fn with_history_cap(mut self, cap: usize) -> Self {
        self.sessions = SessionStore::with_cap(self.pool.clone(), cap);
        self.rebuild();
        self
    }

    fn rebuild(&mut self) {
        self.orchestrator = ChatOrchestrator::new(
            self.oracle.clone(),
            self.sessions.clone(),
            self.facts.clone(),
            self.embedder.clone(),
            self.index.clone(),
            self.config.clone(),
        );
    }

    /// Run one chat turn for `(session, user)`
    pub async fn submit_turn(
        &self,
        session_id: &str,
        user_name: &str,
        message: &str,
        override_conflict: OverrideDecision,
    ) -> Result<TurnOutcome> {
        self.orchestrator
            .submit_turn(session_id, user_name, message, override_conflict)
            .await
    }

    /// All facts stored for a user
    pub async fn list_facts(&self, user_name: &str) -> Result<Vec<Fact>> {
        self.facts.list(user_name).await
    }

    /// Explicitly create a session (idempotent for explicit ids)
    pub async fn create_session(
        &self,
        user_name: &str,
        session_id: Option<&str>,
    ) -> Result<SessionId> {
        self.sessions.create(user_name, session_id).await
    }

    /// All sessions belonging to a user
    pub async fn sessions_for_user(&self, user_name: &str) -> Result<Vec<Session>> {
        self.sessions.sessions_for_user(user_name).await
    }

    /// Get the underlying fact store
    pub fn facts(&self) -> &FactStore {
        &self.facts
    }

    /// Get the underlying session store
    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn engine_runs_a_full_turn_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let oracle = Arc::new(ScriptedOracle::new());
        oracle.push("Introductions"); // naming
        oracle.push(r#"[{"fact_type": "name", "fact_content": "named Alice", "source_message": "I'm Alice"}]"#);
        oracle.push("Hi Alice!"); // response

        let engine = MemoryEngine::new(dir.path(), oracle).await.unwrap();
        let outcome = engine
            .submit_turn("s1", "alice", "I'm Alice", OverrideDecision::Unset)
            .await
            .unwrap();

        assert_eq!(outcome, TurnOutcome::Reply("Hi Alice!".to_string()));
        assert_eq!(engine.list_facts("alice").await.unwrap().len(), 1);

        let sessions = engine.sessions_for_user("alice").await.unwrap();
        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].name.as_deref(), Some("Introductions"));
    }

    #[tokio::test]
    async fn create_session_is_idempotent_through_the_facade() {
        let oracle = Arc::new(ScriptedOracle::new());
        let engine = MemoryEngine::in_memory(oracle).await.unwrap();

        let a = engine.create_session("alice", Some("s1")).await.unwrap();
        let b = engine.create_session("alice", Some("s1")).await.unwrap();
        assert_eq!(a, b);
        assert_eq!(engine.sessions_for_user("alice").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn history_cap_is_configurable_through_the_facade() {
        let oracle = Arc::new(ScriptedOracle::new());
        let engine = MemoryEngine::in_memory(oracle)
            .await
            .unwrap()
            .with_history_cap(2);

        engine.create_session("alice", Some("s1")).await.unwrap();
        for i in 0..5 {
            engine
                .sessions()
                .append("s1", Role::User, &format!("turn {i}"))
                .await
                .unwrap();
        }

        let history = engine.sessions().history("s1").await.unwrap();
        assert_eq!(history.len(), 2);
    }
}
