//! Persistence of searches and classifications
//!
//! Searches are created and updated by request id. Classifications are
//! append-only: a correction is a new row with the next revision, never an
//! update of an existing one.

mod sqlite;

pub use sqlite::SqliteStore;

use crate::error::ResolutionResult;
use crate::types::{BatchId, Classification, ExternalSearch, PayeeId};
use async_trait::async_trait;

#[async_trait]
pub trait ResolutionStore: Send + Sync {
    /// Create or update a search by request id
    async fn record_search(&self, batch_id: BatchId, search: &ExternalSearch) -> ResolutionResult<()>;

    async fn load_search(&self, request_id: &str) -> ResolutionResult<Option<ExternalSearch>>;

    /// Append a classification
    ///
    /// Returns `false` when a row with the same evidence key and revision
    /// already exists; nothing is written in that case.
    async fn record_classification(&self, classification: &Classification) -> ResolutionResult<bool>;

    /// Every stored classification of a payee, oldest first
    async fn classification_history(&self, payee_id: PayeeId) -> ResolutionResult<Vec<Classification>>;
}
