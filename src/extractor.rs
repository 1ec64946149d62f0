//! Fact extraction from user messages
//!
//! Turns one message into zero or more structured fact candidates via the
//! oracle. Malformed oracle output degrades to "no facts extracted" so a
//! bad completion never aborts the turn; transport failures still
//! propagate, because fabricating an empty result on a timeout would
//! silently drop real facts.

use crate::error::Result;
use crate::oracle::Oracle;
use crate::prompts;
use crate::types::FactCandidate;

use std::sync::Arc;

/// Extracts durable user facts from chat messages
#[derive(Clone)]
pub struct FactExtractor {
    oracle: Arc<dyn Oracle>,
}

impl FactExtractor {
    pub fn new(oracle: Arc<dyn Oracle>) -> Self {
        Self { oracle }
    }

    /// Extract fact candidates from `message`.
    ///
    /// Returns only candidates carrying both a non-empty `fact_content` and
    /// `source_message`. A response that is not a valid JSON array yields an
    /// empty vector with a diagnostic log entry.
    pub async fn extract(&self, message: &str) -> Result<Vec<FactCandidate>> {
        let prompt = prompts::extraction(message);
        let response = self.oracle.complete(&prompt).await?;

        let candidates = match parse_candidates(&response) {
            Ok(candidates) => candidates,
            Err(e) => {
                tracing::warn!(error = %e, "fact extraction response was not valid JSON, treating as no facts");
                return Ok(Vec::new());
            }
        };

        let total = candidates.len();
        let valid: Vec<FactCandidate> =
            candidates.into_iter().filter(|c| c.is_valid()).collect();

        if valid.len() < total {
            tracing::debug!(
                dropped = total - valid.len(),
                "discarded extraction candidates with missing content or source"
            );
        }

        Ok(valid)
    }
}

/// Parse the oracle response as a JSON array of candidates, tolerating a
/// Markdown code fence around the payload
fn parse_candidates(response: &str) -> serde_json::Result<Vec<FactCandidate>> {
    serde_json::from_str(strip_code_fence(response))
}

fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    let Some(inner) = trimmed.strip_prefix("```") else {
        return trimmed;
    };

    let inner = inner.strip_prefix("json").unwrap_or(inner);
    inner.strip_suffix("```").unwrap_or(inner).trim()
}
