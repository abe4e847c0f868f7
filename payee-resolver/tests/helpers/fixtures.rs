//! Supplier, payee and component fixtures

use super::{FakeProvider, ScriptedClassifier};
use payee_resolver::{
    BulkSearchClient, CachedSupplier, PayeeRecord, ProviderConfig, ProviderCredentials,
    ResolutionOrchestrator, ResolutionSettings, SupplierCache,
};
use std::sync::Arc;

pub fn suppliers() -> Vec<CachedSupplier> {
    vec![
        CachedSupplier::new("S001", "Amazon Capital Services"),
        CachedSupplier::new("S002", "Amazonas Trading"),
        CachedSupplier::new("S003", "Acme, Inc."),
        CachedSupplier::new("S004", "Globex Corporation"),
        CachedSupplier::new("S005", "First National Bank of Omaha"),
        CachedSupplier::new("S006", "Initech LLC"),
        CachedSupplier::new("S007", "Delivery Services Group"),
    ]
}

pub fn payees(names: &[&str]) -> Vec<PayeeRecord> {
    names.iter().map(|name| PayeeRecord::new(*name)).collect()
}

pub fn provider_config() -> ProviderConfig {
    ProviderConfig {
        base_url: "https://provider.test/v1".to_string(),
        client_id: "integration-tests".to_string(),
        requests_per_second: 1000,
        max_attempts: 3,
        initial_backoff_ms: 1,
        max_backoff_ms: 4,
        page_size: 25,
        ..ProviderConfig::default()
    }
}

/// Millisecond polling; ceiling long enough that only deliberate tests hit it
pub fn fast_settings() -> ResolutionSettings {
    ResolutionSettings {
        poll_interval_ms: 10,
        job_ceiling_ms: 5_000,
        ..ResolutionSettings::default()
    }
}

pub fn build_client(provider: Arc<FakeProvider>, config: &ProviderConfig) -> Arc<BulkSearchClient> {
    let credentials = ProviderCredentials {
        consumer_key: "integration-key".to_string(),
        signing_secret: "integration-secret".to_string(),
    };
    Arc::new(BulkSearchClient::new(config, credentials, provider).unwrap())
}

/// Orchestrator over the fixture suppliers, the given provider and classifier
pub fn build_orchestrator(
    provider: Arc<FakeProvider>,
    classifier: ScriptedClassifier,
    settings: ResolutionSettings,
) -> ResolutionOrchestrator {
    let cache = Arc::new(SupplierCache::with_suppliers(suppliers()));
    let client = build_client(provider, &provider_config());
    ResolutionOrchestrator::new(cache, client, Arc::new(classifier), settings).unwrap()
}
