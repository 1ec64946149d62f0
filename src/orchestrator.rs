//! Conversation orchestration
//!
//! Sequences one chat turn: best-effort session naming, context retrieval,
//! fact extraction, conflict check, reconciliation, response generation,
//! history update, and similarity-index update. The orchestrator holds no
//! per-turn state between calls; a conflict override decision is supplied by
//! the caller on re-submission, never stored server-side.

use crate::conflict::ConflictDetector;
use crate::embedding::EmbeddingProvider;
use crate::error::Result;
use crate::extractor::FactExtractor;
use crate::fact_store::FactStore;
use crate::oracle::Oracle;
use crate::prompts;
use crate::reconciler::MemoryReconciler;
use crate::session::SessionStore;
use crate::similarity::SimilarityIndex;
use crate::types::{Fact, OverrideDecision, ReconcileStrategy, Role, TurnOutcome};

use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

/// Reply used when the caller declines to override a detected conflict
const DECLINED_REPLY: &str =
    "Understood, I'll keep what I already know about you unchanged.";

/// Tuning knobs for the per-turn pipeline
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Storage policy applied when a conflict is confirmed
    pub strategy: ReconcileStrategy,
    /// How many similar past interactions to pull into the response prompt
    pub retrieval_k: usize,
    /// Budget for the best-effort session-naming call
    pub name_timeout: Duration,
    /// Name used when naming fails and the message yields no usable words
    pub default_session_name: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            strategy: ReconcileStrategy::default(),
            retrieval_k: 5,
            name_timeout: Duration::from_secs(5),
            default_session_name: "New Chat".to_string(),
        }
    }
}

/// Drives the fact pipeline for each submitted chat turn
#[derive(Clone)]
pub struct ChatOrchestrator {
    oracle: Arc<dyn Oracle>,
    extractor: FactExtractor,
    detector: ConflictDetector,
    reconciler: MemoryReconciler,
    sessions: Arc<SessionStore>,
    facts: Arc<FactStore>,
    embedder: Arc<dyn EmbeddingProvider>,
    index: Arc<dyn SimilarityIndex>,
    config: OrchestratorConfig,
}

impl ChatOrchestrator {
    pub fn new(
        oracle: Arc<dyn Oracle>,
        sessions: Arc<SessionStore>,
        facts: Arc<FactStore>,
        embedder: Arc<dyn EmbeddingProvider>,
        index: Arc<dyn SimilarityIndex>,
        config: OrchestratorConfig,
    ) -> Self {
        Self {
            extractor: FactExtractor::new(oracle.clone()),
            detector: ConflictDetector::new(oracle.clone()),
            reconciler: MemoryReconciler::new(facts.clone()),
            oracle,
            sessions,
            facts,
            embedder,
            index,
            config,
        }
    }

    /// Run one chat turn.
    ///
    /// Returns the assistant's reply, or a conflict prompt when new facts
    /// contradict stored ones and the caller has not yet decided. On the
    /// prompt path nothing is persisted; the caller re-submits the same
    /// message with an explicit [`OverrideDecision`].
    pub async fn submit_turn(
        &self,
        session_id: &str,
        user_name: &str,
        message: &str,
        override_conflict: OverrideDecision,
    ) -> Result<TurnOutcome> {
        // Sessions come into being on first interaction
        if self.sessions.get(session_id).await?.is_none() {
            self.sessions.create(user_name, Some(session_id)).await?;
        }

        if self.sessions.is_first_user_message(session_id).await? {
            self.assign_session_name(session_id, message).await;
        }

        let similar = self.similar_interactions(user_name, session_id, message).await;
        let stored_facts = self.facts.list(user_name).await?;

        let new_facts = self.extractor.extract(message).await?;
        let conflict = self.detector.detect(&new_facts, &stored_facts).await?;

        if conflict.has_conflict && override_conflict == OverrideDecision::Unset {
            tracing::debug!(
                user = user_name,
                conflicts = conflict.conflicting_facts.len(),
                "conflict detected, awaiting caller decision"
            );
            return Ok(TurnOutcome::conflict_prompt(conflict.conflicting_facts));
        }

        if override_conflict == OverrideDecision::Decline {
            self.sessions.append(session_id, Role::User, message).await?;
            return Ok(TurnOutcome::Reply(DECLINED_REPLY.to_string()));
        }

        let outcome = self
            .reconciler
            .reconcile(user_name, &new_facts, &conflict, self.config.strategy)
            .await;
        if let Some(error) = &outcome.error {
            tracing::warn!(user = user_name, error, "continuing turn despite reconciliation failure");
        }

        // The user turn lands before the response call: a generation failure
        // must still leave the message in history exactly once.
        let history = self.sessions.append(session_id, Role::User, message).await?;

        // Re-read so the response prompt sees the post-reconciliation facts
        let facts_now = self.facts.list(user_name).await?;
        let prompt = prompts::response(
            &facts_now,
            &similar,
            &history,
            override_conflict == OverrideDecision::Accept,
        );
        let reply = self.oracle.complete(&prompt).await?;

        self.sessions
            .append(session_id, Role::Assistant, &reply)
            .await?;

        self.index_interaction(user_name, session_id, message, &reply)
            .await;

        Ok(TurnOutcome::Reply(reply))
    }

    /// Read-only view of a user's stored facts
    pub async fn list_facts(&self, user_name: &str) -> Result<Vec<Fact>> {
        self.facts.list(user_name).await
    }

    /// Best-effort naming of a fresh session. Never fails the turn: a slow
    /// or broken oracle degrades to a name derived from the message itself.
    async fn assign_session_name(&self, session_id: &str, first_message: &str) {
        let prompt = prompts::session_name(first_message);
        let name = match tokio::time::timeout(
            self.config.name_timeout,
            self.oracle.complete(&prompt),
        )
        .await
        {
            Ok(Ok(title)) => clean_title(&title)
                .unwrap_or_else(|| self.fallback_name(first_message)),
            Ok(Err(e)) => {
                tracing::warn!(error = %e, "session naming failed, using fallback");
                self.fallback_name(first_message)
            }
            Err(_) => {
                tracing::warn!("session naming timed out, using fallback");
                self.fallback_name(first_message)
            }
        };

        if let Err(e) = self.sessions.rename(session_id, &name).await {
            tracing::warn!(error = %e, "could not store session name");
        }
    }

    fn fallback_name(&self, first_message: &str) -> String {
        let words: Vec<&str> = first_message.split_whitespace().take(4).collect();
        if words.is_empty() {
            self.config.default_session_name.clone()
        } else {
            capitalize(&words.join(" "))
        }
    }

    /// Top-k similar past interactions for the response prompt. Retrieval
    /// is enrichment only, so failures degrade to no context.
    async fn similar_interactions(
        &self,
        user_name: &str,
        session_id: &str,
        message: &str,
    ) -> Vec<String> {
        let embedded = self
            .embedder
            .embed(std::slice::from_ref(&message.to_string()))
            .await;

        let embedding = match embedded {
            Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
            Ok(_) => return Vec::new(),
            Err(e) => {
                tracing::warn!(error = %e, "message embedding failed, skipping similarity context");
                return Vec::new();
            }
        };

        match self
            .index
            .query(&embedding, user_name, session_id, self.config.retrieval_k)
            .await
        {
            Ok(hits) => hits.into_iter().map(|(text, _)| text).collect(),
            Err(e) => {
                tracing::warn!(error = %e, "similarity lookup failed, skipping context");
                Vec::new()
            }
        }
    }

    /// Embed the completed exchange and upsert it for future retrieval.
    /// Non-fatal: the reply has already been computed.
    async fn index_interaction(
        &self,
        user_name: &str,
        session_id: &str,
        message: &str,
        reply: &str,
    ) {
        let text = format!("{message}{reply}");
        let embedded = self.embedder.embed(std::slice::from_ref(&text)).await;

        let embedding = match embedded {
            Ok(mut vectors) if !vectors.is_empty() => vectors.remove(0),
            Ok(_) => return,
            Err(e) => {
                tracing::warn!(error = %e, "interaction embedding failed, skipping index update");
                return;
            }
        };

        let id = format!("{user_name}-{session_id}-{}", Uuid::new_v4());
        if let Err(e) = self
            .index
            .upsert(&text, &embedding, user_name, session_id, &id)
            .await
        {
            tracing::warn!(error = %e, "similarity index update failed");
        }
    }
}

/// Normalize an oracle-produced title: strip quotes, collapse to one line,
/// cap the length. Returns `None` when nothing usable remains.
fn clean_title(raw: &str) -> Option<String> {
    let title = raw
        .lines()
        .next()
        .unwrap_or("")
        .replace(['"', '\''], "")
        .trim()
        .to_string();

    if title.is_empty() {
        return None;
    }

    if title.len() > 50 {
        let mut truncated: String = title.chars().take(47).collect();
        truncated.push_str("...");
        Some(truncated)
    } else {
        Some(title)
    }
}

fn capitalize(s: &str) -> String {
    let mut chars = s.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::embedding::HashEmbeddingProvider;
    use crate::error::EngineError;
    use crate::oracle::ScriptedOracle;
    use crate::similarity::SqliteSimilarityIndex;
    use crate::types::FactCandidate;

    struct Fixture {
        orchestrator: ChatOrchestrator,
        oracle: Arc<ScriptedOracle>,
        sessions: Arc<SessionStore>,
        facts: Arc<FactStore>,
        index: Arc<SqliteSimilarityIndex>,
        embedder: Arc<HashEmbeddingProvider>,
    }

    async fn fixture(strategy: ReconcileStrategy) -> Fixture {
        let pool = crate::test_pool().await;

        let oracle = Arc::new(ScriptedOracle::new());
        let sessions = SessionStore::new(pool.clone());
        let facts = FactStore::new(pool.clone());
        let index = Arc::new(SqliteSimilarityIndex::new(pool));
        let embedder = Arc::new(HashEmbeddingProvider::new(64));
        let orchestrator = ChatOrchestrator::new(
            oracle.clone(),
            sessions.clone(),
            facts.clone(),
            embedder.clone(),
            index.clone(),
            OrchestratorConfig {
                strategy,
                ..OrchestratorConfig::default()
            },
        );

        Fixture {
            orchestrator,
            oracle,
            sessions,
            facts,
            index,
            embedder,
        }
    }

    /// Seed a prior user turn so naming does not consume a scripted answer
    async fn skip_naming(f: &Fixture, session_id: &str) {
        f.sessions.create("alice", Some(session_id)).await.unwrap();
        f.sessions
            .append(session_id, Role::User, "earlier message")
            .await
            .unwrap();
    }

    const EXTRACTION_EMPTY: &str = "[]";
    const EXTRACTION_HATES_COFFEE: &str = r#"[{"fact_type": "preference", "fact_content": "hates coffee", "source_message": "I hate coffee"}]"#;

    #[tokio::test]
    async fn first_turn_names_session_extracts_and_replies() {
        let f = fixture(ReconcileStrategy::Merge).await;
        f.oracle.push("Coffee Preferences"); // naming
        f.oracle.push(EXTRACTION_HATES_COFFEE); // extraction
        // no stored facts yet, so the conflict check makes no oracle call
        f.oracle.push("Noted, no coffee for you!"); // response

        let outcome = f
            .orchestrator
            .submit_turn("s1", "alice", "I hate coffee", OverrideDecision::Unset)
            .await
            .unwrap();

        assert_eq!(
            outcome,
            TurnOutcome::Reply("Noted, no coffee for you!".to_string())
        );

        let session = f.sessions.get("s1").await.unwrap().unwrap();
        assert_eq!(session.name.as_deref(), Some("Coffee Preferences"));
        assert_eq!(session.history.len(), 2);
        assert_eq!(session.history[0].role, Role::User);
        assert_eq!(session.history[1].role, Role::Assistant);

        let facts = f.orchestrator.list_facts("alice").await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].fact_content, "hates coffee");
        assert_eq!(f.oracle.remaining(), 0);
    }

    #[tokio::test]
    async fn naming_failure_degrades_to_fallback_name() {
        let f = fixture(ReconcileStrategy::Merge).await;
        f.oracle.push_failure("naming service down"); // naming
        f.oracle.push(EXTRACTION_EMPTY); // extraction
        f.oracle.push("Hello!"); // response

        f.orchestrator
            .submit_turn("s1", "alice", "help me plan a trip", OverrideDecision::Unset)
            .await
            .unwrap();

        let session = f.sessions.get("s1").await.unwrap().unwrap();
        assert_eq!(session.name.as_deref(), Some("Help me plan a"));
    }

    #[tokio::test]
    async fn conflict_without_decision_prompts_and_persists_nothing() {
        let f = fixture(ReconcileStrategy::Merge).await;
        skip_naming(&f, "s1").await;
        f.facts
            .add_facts("alice", &[FactCandidate::new("preference", "likes coffee", "m")])
            .await
            .unwrap();

        f.oracle.push(EXTRACTION_HATES_COFFEE); // extraction
        f.oracle.push("yes\n- likes coffee"); // conflict verdict

        let history_before = f.sessions.history("s1").await.unwrap();
        let outcome = f
            .orchestrator
            .submit_turn("s1", "alice", "I hate coffee", OverrideDecision::Unset)
            .await
            .unwrap();

        match outcome {
            TurnOutcome::ConflictPrompt {
                options, conflicts, ..
            } => {
                assert_eq!(options, ["yes", "no"]);
                assert_eq!(conflicts, vec!["likes coffee".to_string()]);
            }
            other => panic!("expected conflict prompt, got {other:?}"),
        }

        // Nothing persisted, no reply generated
        assert_eq!(f.facts.count("alice").await.unwrap(), 1);
        assert_eq!(f.sessions.history("s1").await.unwrap(), history_before);
        assert_eq!(f.oracle.remaining(), 0);
    }

    #[tokio::test]
    async fn declined_override_acknowledges_and_appends_message() {
        let f = fixture(ReconcileStrategy::Replace).await;
        skip_naming(&f, "s1").await;
        f.facts
            .add_facts("alice", &[FactCandidate::new("preference", "likes coffee", "m")])
            .await
            .unwrap();

        f.oracle.push(EXTRACTION_HATES_COFFEE); // extraction
        f.oracle.push("yes\n- likes coffee"); // conflict verdict

        let outcome = f
            .orchestrator
            .submit_turn("s1", "alice", "I hate coffee", OverrideDecision::Decline)
            .await
            .unwrap();

        assert_eq!(outcome, TurnOutcome::Reply(DECLINED_REPLY.to_string()));

        // Stored facts untouched, user message still recorded
        let facts = f.facts.list("alice").await.unwrap();
        assert_eq!(facts.len(), 1);
        assert_eq!(facts[0].fact_content, "likes coffee");

        let history = f.sessions.history("s1").await.unwrap();
        assert_eq!(history.last().unwrap().content, "I hate coffee");
    }

    #[tokio::test]
    async fn accepted_override_replaces_conflicting_facts() {
        let f = fixture(ReconcileStrategy::Replace).await;
        skip_naming(&f, "s1").await;
        f.facts
            .add_facts("alice", &[FactCandidate::new("preference", "likes coffee", "m")])
            .await
            .unwrap();

        f.oracle.push(EXTRACTION_HATES_COFFEE); // extraction
        f.oracle.push("yes\n- likes coffee"); // conflict verdict
        f.oracle.push("Got it, updated."); // response

        let outcome = f
            .orchestrator
            .submit_turn("s1", "alice", "I hate coffee", OverrideDecision::Accept)
            .await
            .unwrap();

        assert_eq!(outcome, TurnOutcome::Reply("Got it, updated.".to_string()));

        let contents: Vec<String> = f
            .facts
            .list("alice")
            .await
            .unwrap()
            .into_iter()
            .map(|fact| fact.fact_content)
            .collect();
        assert_eq!(contents, vec!["hates coffee".to_string()]);
    }

    #[tokio::test]
    async fn response_failure_leaves_user_message_exactly_once() {
        let f = fixture(ReconcileStrategy::Merge).await;
        skip_naming(&f, "s1").await;

        f.oracle.push(EXTRACTION_EMPTY); // extraction
        f.oracle.push_failure("completion service down"); // response

        let err = f
            .orchestrator
            .submit_turn("s1", "alice", "hello there", OverrideDecision::Unset)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Oracle(_)));

        let history = f.sessions.history("s1").await.unwrap();
        let occurrences = history
            .iter()
            .filter(|t| t.content == "hello there")
            .count();
        assert_eq!(occurrences, 1);
    }

    #[tokio::test]
    async fn ambiguous_conflict_verdict_fails_the_turn() {
        let f = fixture(ReconcileStrategy::Merge).await;
        skip_naming(&f, "s1").await;
        f.facts
            .add_facts("alice", &[FactCandidate::new("preference", "likes coffee", "m")])
            .await
            .unwrap();

        f.oracle.push(EXTRACTION_HATES_COFFEE); // extraction
        f.oracle.push("maybe? hard to say"); // malformed verdict

        let err = f
            .orchestrator
            .submit_turn("s1", "alice", "I hate coffee", OverrideDecision::Unset)
            .await
            .unwrap_err();
        assert!(matches!(err, EngineError::Parse(_)));

        // Nothing was persisted for the failed turn
        assert_eq!(f.facts.count("alice").await.unwrap(), 1);
        assert_eq!(f.sessions.history("s1").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_turn_sees_similarity_context_from_first() {
        let f = fixture(ReconcileStrategy::Merge).await;
        skip_naming(&f, "s1").await;

        f.oracle.push(EXTRACTION_EMPTY);
        f.oracle.push("Espresso it is.");
        f.orchestrator
            .submit_turn("s1", "alice", "let's talk espresso", OverrideDecision::Unset)
            .await
            .unwrap();

        f.oracle.push(EXTRACTION_EMPTY);
        f.oracle.push("More espresso talk.");
        f.orchestrator
            .submit_turn("s1", "alice", "more espresso please", OverrideDecision::Unset)
            .await
            .unwrap();

        // Both exchanges are now indexed for this user+session
        let query = f
            .embedder
            .embed(&["espresso".to_string()])
            .await
            .unwrap();
        let hits = f.index.query(&query[0], "alice", "s1", 5).await.unwrap();
        assert_eq!(hits.len(), 2);
        assert!(hits.iter().all(|(text, _)| text.contains("espresso")));

        // Scoped retrieval: a different session sees none of it
        let other = f.index.query(&query[0], "alice", "s2", 5).await.unwrap();
        assert!(other.is_empty());
    }
}
