//! Shared types and data contracts
//!
//! These types are the contracts between the supplier cache, the bulk search
//! client and the orchestrator. Confidence values are always in `[0.0, 1.0]`.

use chrono::{DateTime, Utc};
use payee_common::normalize_name;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use uuid::Uuid;

/// Identifier of one input payee row
pub type PayeeId = Uuid;

/// Identifier of one submitted batch
pub type BatchId = Uuid;

// ============================================================================
// Input Rows
// ============================================================================

/// Optional structured address supplied with a payee row
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PayeeAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub line1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub city: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub postal_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country: Option<String>,
}

/// One input row of a batch
///
/// `cleaned_name` is derived from `original_name` at construction and never
/// recomputed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PayeeRecord {
    pub id: PayeeId,
    pub original_name: String,
    pub cleaned_name: String,
    pub address: Option<PayeeAddress>,
}

impl PayeeRecord {
    /// Create a record with a fresh id
    pub fn new(original_name: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4(), original_name)
    }

    /// Create a record with a caller-assigned id
    pub fn with_id(id: PayeeId, original_name: impl Into<String>) -> Self {
        let original_name = original_name.into();
        let cleaned_name = normalize_name(&original_name);
        Self {
            id,
            original_name,
            cleaned_name,
            address: None,
        }
    }

    /// Attach an address
    pub fn with_address(mut self, address: PayeeAddress) -> Self {
        self.address = Some(address);
        self
    }
}

// ============================================================================
// Supplier Cache Types
// ============================================================================

/// Supplier mirrored from the local supplier directory
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CachedSupplier {
    /// Identifier in the supplier directory
    pub supplier_id: String,
    /// Display form of the name
    pub payee_name: String,
    /// Derived from `payee_name`; the indexed key
    #[serde(default)]
    pub normalized_name: String,
    /// System the supplier was synced from
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
}

impl CachedSupplier {
    pub fn new(supplier_id: impl Into<String>, payee_name: impl Into<String>) -> Self {
        let payee_name = payee_name.into();
        Self {
            supplier_id: supplier_id.into(),
            normalized_name: normalize_name(&payee_name),
            payee_name,
            source: None,
        }
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    /// Recompute `normalized_name` (snapshot files may omit or stale it)
    pub(crate) fn renormalized(mut self) -> Self {
        self.normalized_name = normalize_name(&self.payee_name);
        self
    }
}

/// How a cache lookup matched
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum MatchType {
    Exact,
    Prefix,
    Contains,
    None,
}

/// Outcome of a supplier cache lookup
///
/// Invariants: `Exact` carries confidence 1.0; `None` carries no supplier and
/// confidence 0.0. Construct through the associated functions to keep them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MatchResult {
    pub matched_supplier: Option<CachedSupplier>,
    pub confidence: f64,
    pub match_type: MatchType,
}

impl MatchResult {
    pub fn none() -> Self {
        Self {
            matched_supplier: None,
            confidence: 0.0,
            match_type: MatchType::None,
        }
    }

    pub fn exact(supplier: CachedSupplier) -> Self {
        Self {
            matched_supplier: Some(supplier),
            confidence: 1.0,
            match_type: MatchType::Exact,
        }
    }

    pub fn fuzzy(supplier: CachedSupplier, match_type: MatchType, confidence: f64) -> Self {
        debug_assert!(matches!(match_type, MatchType::Prefix | MatchType::Contains));
        Self {
            matched_supplier: Some(supplier),
            confidence: confidence.clamp(0.0, 1.0),
            match_type,
        }
    }

    pub fn is_match(&self) -> bool {
        self.match_type != MatchType::None
    }
}

// ============================================================================
// External Search Types
// ============================================================================

/// Local state of a provider bulk search
///
/// SUBMITTED → IN_PROGRESS → {COMPLETED | FAILED}
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SearchStatus {
    Submitted,
    InProgress,
    Completed,
    Failed,
}

impl SearchStatus {
    pub fn is_terminal(self) -> bool {
        matches!(self, SearchStatus::Completed | SearchStatus::Failed)
    }

    /// Map a provider status string; `None` for strings the provider never documented
    pub fn from_remote(remote: &str) -> Option<Self> {
        match remote.trim().to_ascii_uppercase().as_str() {
            "PENDING" | "QUEUED" | "SUBMITTED" => Some(SearchStatus::Submitted),
            "IN_PROGRESS" | "PROCESSING" | "RUNNING" => Some(SearchStatus::InProgress),
            "COMPLETED" | "COMPLETE" => Some(SearchStatus::Completed),
            "FAILED" | "ERROR" | "CANCELLED" | "EXPIRED" => Some(SearchStatus::Failed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            SearchStatus::Submitted => "SUBMITTED",
            SearchStatus::InProgress => "IN_PROGRESS",
            SearchStatus::Completed => "COMPLETED",
            SearchStatus::Failed => "FAILED",
        }
    }
}

/// One submitted bulk search job
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExternalSearch {
    /// Client-generated, alphanumeric request identifier
    pub request_id: String,
    /// Provider-assigned id; absent when submission never reached the provider
    pub search_id: Option<String>,
    /// Digest of the payee-id set, used for idempotent re-submission
    pub submission_key: String,
    pub status: SearchStatus,
    pub submitted_at: DateTime<Utc>,
    pub last_polled_at: Option<DateTime<Utc>>,
    pub payee_ids: Vec<PayeeId>,
    /// Per-item reference sent to the provider → originating payee
    pub references: BTreeMap<String, PayeeId>,
    /// Reason recorded when the search entered FAILED
    pub failure_reason: Option<String>,
}

impl ExternalSearch {
    /// Provider id, or the request id when the provider never assigned one
    pub fn display_id(&self) -> &str {
        self.search_id.as_deref().unwrap_or(&self.request_id)
    }

    pub(crate) fn mark_failed(&mut self, reason: impl Into<String>) {
        self.status = SearchStatus::Failed;
        self.failure_reason = Some(reason.into());
    }
}

/// Structured entity details returned by the provider
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EntityDetails {
    pub business_name: Option<String>,
    pub tax_id: Option<String>,
    pub address: Option<PayeeAddress>,
    pub phone: Option<String>,
    pub category_code: Option<String>,
}

/// One provider result item
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExternalMatchItem {
    /// Per-item reference from the submission
    pub reference_id: String,
    pub confidence: f64,
    pub entity: EntityDetails,
}

/// One window of search results
#[derive(Debug, Clone, PartialEq)]
pub struct ResultPage {
    pub offset: usize,
    pub limit: usize,
    /// Total items the provider reports for the search, when it reports one
    pub total: Option<usize>,
    pub items: Vec<ExternalMatchItem>,
}

// ============================================================================
// Classification Types
// ============================================================================

/// Payee type label produced by the AI classifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayeeType {
    Individual,
    Business,
    Government,
    /// Classifier unavailable or returned no usable label
    Unknown,
}

/// Output of the AI type classifier
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AiClassification {
    pub payee_type: PayeeType,
    pub confidence: f64,
    pub reasoning: String,
}

impl AiClassification {
    /// Placeholder used when the classifier fails
    pub fn unavailable(reason: impl Into<String>) -> Self {
        Self {
            payee_type: PayeeType::Unknown,
            confidence: 0.0,
            reasoning: reason.into(),
        }
    }
}

/// State of the external search signal in a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExternalMatchStatus {
    /// Payee was not eligible for external search
    NotRequired,
    Matched,
    NoMatch,
    Failed,
    /// Job exceeded its ceiling or the batch was cancelled
    Abandoned,
}

impl ExternalMatchStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            ExternalMatchStatus::NotRequired => "NOT_REQUIRED",
            ExternalMatchStatus::Matched => "MATCHED",
            ExternalMatchStatus::NoMatch => "NO_MATCH",
            ExternalMatchStatus::Failed => "FAILED",
            ExternalMatchStatus::Abandoned => "ABANDONED",
        }
    }
}

/// Signal that supplied the entity identity of a classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignalSource {
    External,
    Cache,
    Ai,
}

/// Final per-payee output
///
/// Never edited after creation; a correction is a new value produced by
/// [`Classification::supersede`] with the next revision number.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Classification {
    pub batch_id: BatchId,
    pub payee_id: PayeeId,
    pub original_name: String,
    pub cleaned_name: String,
    pub payee_type: PayeeType,
    pub ai_confidence: f64,
    pub ai_reasoning: String,
    pub cache_match: MatchResult,
    pub external_match_status: ExternalMatchStatus,
    pub external_match_confidence: Option<f64>,
    pub external_match: Option<ExternalMatchItem>,
    /// Request id of the search that produced the external signal
    pub external_search_id: Option<String>,
    /// Which signal supplied the entity identity, if any cleared its floor
    pub identity_source: Option<SignalSource>,
    /// Entity name from the identity source
    pub matched_name: Option<String>,
    /// Confidence of the identity source, or the strongest signal when none cleared its floor
    pub confidence: f64,
    pub is_excluded: bool,
    pub exclusion_reason: Option<String>,
    pub revision: u32,
    pub created_at: DateTime<Utc>,
}

impl Classification {
    /// Produce a corrected copy with the next revision
    pub fn supersede(&self, correct: impl FnOnce(&mut Classification)) -> Classification {
        let mut next = self.clone();
        correct(&mut next);
        next.revision = self.revision + 1;
        next.created_at = Utc::now();
        next
    }

    /// Key identifying the evidence this classification was built from
    ///
    /// Two classifications of one payee from the same search (or, without a
    /// search, the same batch) describe the same resolution.
    pub fn evidence_key(&self) -> String {
        match &self.external_search_id {
            Some(request_id) => format!("{}:{}", self.payee_id, request_id),
            None => format!("{}:{}", self.payee_id, self.batch_id),
        }
    }
}
