//! Core data types: facts, chat turns, sessions, reconciliation results

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for sessions/conversations
pub type SessionId = String;

/// A persisted, user-scoped statement extracted from a chat message.
///
/// Facts are created only by the reconciler after a candidate survives
/// validation, are never mutated in place, and are removed only by the
/// replace strategy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Fact {
    /// Unique identifier
    pub id: String,
    /// User this fact belongs to (facts are session-agnostic)
    pub user_name: String,
    /// Category of fact (name, preference, habit, location, ...)
    pub fact_type: String,
    /// The specific information or value
    pub fact_content: String,
    /// The span of the user message the fact came from
    pub source_message: String,
    /// When the fact was persisted
    pub created_at: DateTime<Utc>,
}

impl Fact {
    /// Build a fact from a validated candidate
    pub fn from_candidate(user_name: impl Into<String>, candidate: &FactCandidate) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            user_name: user_name.into(),
            fact_type: candidate.fact_type.clone().unwrap_or_default(),
            fact_content: candidate.fact_content.clone().unwrap_or_default(),
            source_message: candidate.source_message.clone().unwrap_or_default(),
            created_at: Utc::now(),
        }
    }
}

/// One entry of the oracle's extraction response, before validation.
///
/// Fields are optional because the oracle may omit them; candidates with a
/// missing or empty `fact_content` or `source_message` never reach storage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct FactCandidate {
    pub fact_type: Option<String>,
    pub fact_content: Option<String>,
    pub source_message: Option<String>,
}

impl FactCandidate {
    pub fn new(
        fact_type: impl Into<String>,
        fact_content: impl Into<String>,
        source_message: impl Into<String>,
    ) -> Self {
        Self {
            fact_type: Some(fact_type.into()),
            fact_content: Some(fact_content.into()),
            source_message: Some(source_message.into()),
        }
    }

    /// A candidate is persistable only when both content and source are present
    pub fn is_valid(&self) -> bool {
        self.fact_content.as_deref().is_some_and(|s| !s.trim().is_empty())
            && self.source_message.as_deref().is_some_and(|s| !s.trim().is_empty())
    }
}

/// Verdict of one conflict check. Produced once per turn, never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ConflictResult {
    pub has_conflict: bool,
    /// Free-text descriptions of the conflicting facts (not fact ids)
    pub conflicting_facts: Vec<String>,
    /// The oracle's verbatim answer, kept for diagnostics
    pub raw_response: String,
}

impl ConflictResult {
    /// The no-conflict verdict used when there is nothing to compare
    pub fn none() -> Self {
        Self {
            has_conflict: false,
            conflicting_facts: Vec::new(),
            raw_response: String::new(),
        }
    }
}

/// Who said a chat turn
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Role::User => write!(f, "user"),
            Role::Assistant => write!(f, "assistant"),
        }
    }
}

/// One message of a session's history. Immutable once appended.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChatTurn {
    pub role: Role,
    pub content: String,
}

impl ChatTurn {
    pub fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
        }
    }
}

/// A conversation owned by one user, carrying its bounded history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Session {
    pub session_id: SessionId,
    pub user_name: String,
    /// Assigned once, on the first user message, by best-effort naming
    pub name: Option<String>,
    pub history: Vec<ChatTurn>,
    pub created_at: DateTime<Utc>,
}

/// Policy governing how conflicting facts are resolved in storage
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileStrategy {
    /// Append new facts, leave conflicting ones alone
    Add,
    /// Delete stored facts matching the conflict descriptions, then append
    Replace,
    /// Append new facts and report which old ones they conflict with
    #[default]
    Merge,
}

impl std::fmt::Display for ReconcileStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ReconcileStrategy::Add => write!(f, "add"),
            ReconcileStrategy::Replace => write!(f, "replace"),
            ReconcileStrategy::Merge => write!(f, "merge"),
        }
    }
}

/// What the reconciler did to the fact store
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReconcileAction {
    Added,
    Replaced,
    Merged,
}

/// Result of applying one turn's extracted facts to storage.
///
/// A persistence failure is reported in `error` rather than returned as an
/// `Err`: the turn's conversational reply must still reach the user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ReconciliationOutcome {
    pub action: ReconcileAction,
    pub facts_added: usize,
    /// Conflict descriptions that drove deletions (replace) or were kept
    /// for caller visibility (merge)
    pub superseded_facts: Vec<String>,
    pub error: Option<String>,
}

impl ReconciliationOutcome {
    pub fn is_ok(&self) -> bool {
        self.error.is_none()
    }
}

/// Caller-supplied decision about a previously reported conflict
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum OverrideDecision {
    /// No decision yet; a detected conflict halts the turn with a prompt
    #[default]
    Unset,
    /// Override: proceed, prioritizing the new information
    Accept,
    /// Keep the stored facts; reply with a fixed acknowledgement
    Decline,
}

/// What `submit_turn` hands back to the caller
#[derive(Debug, Clone, PartialEq)]
pub enum TurnOutcome {
    /// The assistant's reply text
    Reply(String),
    /// A detected conflict needs a caller decision before the turn proceeds
    ConflictPrompt {
        message: String,
        options: [&'static str; 2],
        conflicts: Vec<String>,
    },
}

impl TurnOutcome {
    pub fn conflict_prompt(conflicts: Vec<String>) -> Self {
        let listed = conflicts.join("; ");
        TurnOutcome::ConflictPrompt {
            message: format!(
                "This seems to contradict what I know about you ({listed}). \
                 Should I update my memory with the new information?"
            ),
            options: ["yes", "no"],
            conflicts,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn candidate_validity_requires_content_and_source() {
        let full = FactCandidate::new("preference", "likes coffee", "I like coffee");
        assert!(full.is_valid());

        let no_content = FactCandidate {
            fact_type: Some("preference".into()),
            fact_content: None,
            source_message: Some("I like coffee".into()),
        };
        assert!(!no_content.is_valid());

        let blank_source = FactCandidate {
            fact_type: None,
            fact_content: Some("likes coffee".into()),
            source_message: Some("   ".into()),
        };
        assert!(!blank_source.is_valid());
    }

    #[test]
    fn candidate_deserializes_with_missing_fields() {
        let parsed: FactCandidate =
            serde_json::from_str(r#"{"fact_content": "likes tea"}"#).unwrap();
        assert_eq!(parsed.fact_content.as_deref(), Some("likes tea"));
        assert!(!parsed.is_valid());
    }
}
