//! AI payee type classifier seam
//!
//! The classifier itself lives outside this crate; the orchestrator only
//! consumes a type label, a confidence, and a reasoning string.

use crate::error::ResolutionResult;
use crate::types::AiClassification;
use async_trait::async_trait;

/// Classifies a payee name as Individual, Business or Government
#[async_trait]
pub trait PayeeClassifier: Send + Sync {
    /// Classify one original (un-normalized) payee name
    ///
    /// Errors are not fatal to a batch; the orchestrator records the payee
    /// with an `Unknown` type instead.
    async fn classify(&self, name: &str) -> ResolutionResult<AiClassification>;
}
