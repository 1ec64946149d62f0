//! Conflict detection between new and stored facts
//!
//! The oracle is asked to judge direct same-topic contradictions and answer
//! in a fixed two-line shape: first line `yes` or `no`, then a bulleted list
//! of the conflicting fact descriptions. The parser is strict: a first line
//! that is neither token is a parse error, never a silent "no conflict".

use crate::error::{EngineError, Result};
use crate::oracle::Oracle;
use crate::prompts;
use crate::types::{ConflictResult, Fact, FactCandidate};

use std::sync::Arc;

/// Compares newly extracted facts against a user's stored fact set
#[derive(Clone)]
pub struct ConflictDetector {
    oracle: Arc<dyn Oracle>,
}

impl ConflictDetector {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }

    /// Ask the oracle whether `new_facts` contradict `existing_facts`.
    ///
    /// An empty `new_facts` set short-circuits to no-conflict without an
    /// oracle call. Oracle failures and malformed verdicts both propagate;
    /// fallback behavior is the orchestrator's decision, not this layer's.
    pub async fn detect(
        &self,
        new_facts: &[FactCandidate],
        existing_facts: &[Fact],
    ) -> Result<ConflictResult> {
        if new_facts.is_empty() || existing_facts.is_empty() {
            return Ok(ConflictResult::none());
        }

        let prompt = prompts::conflict_check(new_facts, existing_facts);
        let response = self.oracle.complete(&prompt).await?;

        parse_verdict(&response)
    }
}

/// Parse the two-line verdict contract.
///
/// First line (trimmed, lowercased) must be exactly `yes` or `no`. On `yes`,
/// each subsequent non-empty line minus its leading `-` marker is one
/// conflicting fact description; the literal `[]` empty-list marker is
/// skipped.
pub fn parse_verdict(response: &str) -> Result<ConflictResult> {
    let mut lines = response.trim().lines();
    let first = lines.next().unwrap_or("").trim().to_lowercase();

    let has_conflict = match first.as_str() {
        "yes" => true,
        "no" => false,
        other => {
            return Err(EngineError::Parse(format!(
                "conflict verdict must start with 'yes' or 'no', got {other:?}"
            )))
        }
    };

    let mut conflicting_facts = Vec::new();
    if has_conflict {
        for line in lines {
            let fact = line.trim().trim_start_matches('-').trim();
            if !fact.is_empty() && fact != "[]" {
                conflicting_facts.push(fact.to_string());
            }
        }
    }

    Ok(ConflictResult {
        has_conflict,
        conflicting_facts,
        raw_response: response.to_string(),
    })
}
