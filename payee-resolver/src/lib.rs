//! payee-resolver library
//!
//! Payee identity resolution: a supplier match cache, a signed bulk search
//! client, and the orchestrator that merges cache, provider and AI signals
//! into one classification per payee.

pub mod bulk_search;
pub mod cache;
pub mod classifier;
pub mod config;
pub mod error;
pub mod events;
pub mod orchestrator;
pub mod store;
pub mod types;

pub use bulk_search::BulkSearchClient;
pub use cache::SupplierCache;
pub use classifier::PayeeClassifier;
pub use config::{ProviderConfig, ProviderCredentials, ResolutionSettings, ResolverConfig};
pub use error::{ResolutionError, ResolutionResult};
pub use events::{EventBus, ResolutionEvent};
pub use orchestrator::ResolutionOrchestrator;
pub use store::{ResolutionStore, SqliteStore};
pub use types::*;

/// Log filter used when neither `RUST_LOG` nor `[logging] level` is set
pub const DEFAULT_LOG_FILTER: &str = "payee_resolver=info,payee_common=info";
