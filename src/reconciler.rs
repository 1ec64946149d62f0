//! Memory reconciliation policies
//!
//! Applies one turn's extracted facts to the store under the configured
//! strategy. The reconciler is the sole mutator of the fact collection, and
//! one turn's fact set is one transaction.

use crate::fact_store::FactStore;
use crate::types::{
    ConflictResult, FactCandidate, ReconcileAction, ReconcileStrategy, ReconciliationOutcome,
};

use std::sync::Arc;

/// Applies add/replace/merge strategies to the fact store
#[derive(Clone)]
pub struct MemoryReconciler {
    facts: Arc<FactStore>,
}

impl MemoryReconciler {
    pub fn new(facts: Arc<FactStore>) -> Self {
        Self { facts }
    }

    /// Persist `new_facts` for `user_name` according to `strategy` and the
    /// turn's conflict verdict.
    ///
    /// Without a conflict every strategy is plain addition. `Replace`
    /// deletes stored facts whose content contains a flagged conflict
    /// description (loose substring match, so one description can take out
    /// several facts); `Merge` keeps everything and echoes the conflicting
    /// descriptions for caller visibility.
    ///
    /// Persistence failures are reported in the outcome, never as an `Err`:
    /// the turn's reply must still reach the user.
    pub async fn reconcile(
        &self,
        user_name: &str,
        new_facts: &[FactCandidate],
        conflict_result: &ConflictResult,
        strategy: ReconcileStrategy,
    ) -> ReconciliationOutcome {
        if !conflict_result.has_conflict {
            return self.add(user_name, new_facts).await;
        }

        match strategy {
            ReconcileStrategy::Add => self.add(user_name, new_facts).await,
            ReconcileStrategy::Replace => {
                self.replace(user_name, new_facts, &conflict_result.conflicting_facts)
                    .await
            }
            ReconcileStrategy::Merge => {
                self.merge(user_name, new_facts, &conflict_result.conflicting_facts)
                    .await
            }
        }
    }

    async fn add(&self, user_name: &str, new_facts: &[FactCandidate]) -> ReconciliationOutcome {
        match self.facts.add_facts(user_name, new_facts).await {
            Ok(added) => ReconciliationOutcome {
                action: ReconcileAction::Added,
                facts_added: added.len(),
                superseded_facts: Vec::new(),
                error: None,
            },
            Err(e) => failed(ReconcileAction::Added, e),
        }
    }

    async fn replace(
        &self,
        user_name: &str,
        new_facts: &[FactCandidate],
        conflicting: &[String],
    ) -> ReconciliationOutcome {
        match self
            .facts
            .replace_matching(user_name, conflicting, new_facts)
            .await
        {
            Ok((deleted, added)) => {
                tracing::debug!(
                    user = user_name,
                    deleted,
                    added = added.len(),
                    "replaced conflicting facts"
                );
                ReconciliationOutcome {
                    action: ReconcileAction::Replaced,
                    facts_added: added.len(),
                    superseded_facts: conflicting.to_vec(),
                    error: None,
                }
            }
            Err(e) => failed(ReconcileAction::Replaced, e),
        }
    }

    async fn merge(
        &self,
        user_name: &str,
        new_facts: &[FactCandidate],
        conflicting: &[String],
    ) -> ReconciliationOutcome {
        match self.facts.add_facts(user_name, new_facts).await {
            Ok(added) => ReconciliationOutcome {
                action: ReconcileAction::Merged,
                facts_added: added.len(),
                superseded_facts: conflicting.to_vec(),
                error: None,
            },
            Err(e) => failed(ReconcileAction::Merged, e),
        }
    }
}

fn failed(action: ReconcileAction, e: crate::error::EngineError) -> ReconciliationOutcome {
    tracing::warn!(error = %e, ?action, "fact reconciliation failed, continuing turn");
    ReconciliationOutcome {
        action,
        facts_added: 0,
        superseded_facts: Vec::new(),
        error: Some(e.to_string()),
    }
}
