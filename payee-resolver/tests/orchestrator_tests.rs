//! Integration tests for batch classification
//!
//! Runs the orchestrator against the fixture supplier cache, the in-memory
//! provider and a scripted classifier.

mod helpers;

use helpers::fake_provider::Completion;
use helpers::*;
use payee_resolver::{
    ExternalMatchStatus, MatchType, PayeeRecord, PayeeType, ResolutionEvent,
    ResolutionOrchestrator, ResolutionStore, SignalSource, SqliteStore, SupplierCache,
};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::task::JoinSet;
use uuid::Uuid;

fn drain_events(rx: &mut tokio::sync::broadcast::Receiver<ResolutionEvent>) -> Vec<ResolutionEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

#[tokio::test]
async fn test_mixed_batch_merges_every_signal() {
    let provider = Arc::new(FakeProvider::new().with_match("HOOLI HOLDINGS", "HOOLI HOLDINGS INC", 0.93));
    let classifier = ScriptedClassifier::businesses().with("Jane Doe", PayeeType::Individual, 0.85);
    let orchestrator = build_orchestrator(provider.clone(), classifier, fast_settings());

    let batch = payees(&["Acme Inc", "Amazon", "Hooli Holdings", "Jane Doe", "Unknown Vendor 42"]);
    let results = orchestrator.classify_batch(Uuid::new_v4(), batch.clone()).await.unwrap();

    assert_eq!(results.len(), 5);
    for (payee, classification) in batch.iter().zip(&results) {
        assert_eq!(classification.payee_id, payee.id);
    }

    // Exact cache hit: no external search
    assert_eq!(results[0].cache_match.match_type, MatchType::Exact);
    assert_eq!(results[0].external_match_status, ExternalMatchStatus::NotRequired);
    assert_eq!(results[0].identity_source, Some(SignalSource::Cache));
    assert_eq!(results[0].confidence, 1.0);

    // Prefix hit at 0.95 is complete enough
    assert_eq!(results[1].cache_match.match_type, MatchType::Prefix);
    assert_eq!(results[1].matched_name.as_deref(), Some("Amazon Capital Services"));
    assert_eq!(results[1].external_match_status, ExternalMatchStatus::NotRequired);

    // Cache miss resolved by the provider
    assert_eq!(results[2].external_match_status, ExternalMatchStatus::Matched);
    assert_eq!(results[2].identity_source, Some(SignalSource::External));
    assert_eq!(results[2].matched_name.as_deref(), Some("HOOLI HOLDINGS INC"));
    assert_eq!(results[2].external_match_confidence, Some(0.93));
    assert!(results[2].external_search_id.is_some());

    // Individuals are never searched
    assert_eq!(results[3].payee_type, PayeeType::Individual);
    assert_eq!(results[3].external_match_status, ExternalMatchStatus::NotRequired);
    assert_eq!(results[3].identity_source, Some(SignalSource::Ai));

    // Searched, no provider match, AI label still stands
    assert_eq!(results[4].external_match_status, ExternalMatchStatus::NoMatch);
    assert_eq!(results[4].identity_source, Some(SignalSource::Ai));
    assert!(!results[4].is_excluded);

    assert_eq!(provider.submit_count(), 1);
    assert!(provider.violations().is_empty(), "{:?}", provider.violations());
}

#[tokio::test]
async fn test_large_job_is_drained_page_by_page() {
    let names: Vec<String> = (0..57).map(|i| format!("Vendor {:02} Holdings", i)).collect();
    let mut provider = FakeProvider::new();
    for name in &names {
        let cleaned = payee_common::normalize_name(name);
        provider = provider.with_match(&cleaned, &format!("{} LLC", cleaned), 0.9);
    }
    let provider = Arc::new(provider);
    let orchestrator = build_orchestrator(provider.clone(), ScriptedClassifier::businesses(), fast_settings());

    let batch: Vec<PayeeRecord> = names.iter().map(|n| PayeeRecord::new(n.as_str())).collect();
    let results = orchestrator.classify_batch(Uuid::new_v4(), batch).await.unwrap();

    let fetches = provider.result_fetches();
    let offsets: Vec<usize> = fetches.iter().map(|(_, offset, _)| *offset).collect();
    assert_eq!(offsets, vec![0, 25, 50]);
    assert!(fetches.iter().all(|(_, _, limit)| *limit == 25));

    assert_eq!(results.len(), 57);
    assert!(results
        .iter()
        .all(|c| c.external_match_status == ExternalMatchStatus::Matched));
    for c in &results {
        assert_eq!(c.matched_name.as_deref(), Some(format!("{} LLC", c.cleaned_name).as_str()));
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_batches_share_one_search() {
    let provider = Arc::new(
        FakeProvider::new()
            .with_match("HOOLI HOLDINGS", "HOOLI HOLDINGS INC", 0.93)
            .with_match("PIED PIPER", "PIED PIPER INC", 0.88)
            .completing(Completion::AfterPolls(3)),
    );
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let orchestrator = Arc::new(
        build_orchestrator(provider.clone(), ScriptedClassifier::businesses(), fast_settings())
            .with_store(store.clone()),
    );

    let batch = payees(&["Hooli Holdings", "Pied Piper", "Raviga Capital"]);

    let mut join_set = JoinSet::new();
    for _ in 0..2 {
        let orchestrator = Arc::clone(&orchestrator);
        let batch = batch.clone();
        join_set.spawn(async move { orchestrator.classify_batch(Uuid::new_v4(), batch).await });
    }

    let mut request_ids = Vec::new();
    while let Some(result) = join_set.join_next().await {
        let results = result.expect("Task panicked").unwrap();
        assert_eq!(results.len(), 3);
        request_ids.push(results[0].external_search_id.clone());
    }

    assert_eq!(provider.submit_count(), 1);
    assert_eq!(request_ids[0], request_ids[1]);

    for payee in &batch {
        let history = store.classification_history(payee.id).await.unwrap();
        assert_eq!(history.len(), 1, "payee {} recorded more than once", payee.original_name);
    }
}

#[tokio::test]
async fn test_resubmitting_a_resolved_set_adds_no_rows() {
    let provider = Arc::new(FakeProvider::new().with_match("HOOLI HOLDINGS", "HOOLI HOLDINGS INC", 0.93));
    let store = Arc::new(SqliteStore::in_memory().await.unwrap());
    let orchestrator = build_orchestrator(provider.clone(), ScriptedClassifier::businesses(), fast_settings())
        .with_store(store.clone());

    let batch = payees(&["Hooli Holdings"]);
    orchestrator.classify_batch(Uuid::new_v4(), batch.clone()).await.unwrap();
    let second = orchestrator.classify_batch(Uuid::new_v4(), batch.clone()).await.unwrap();

    assert_eq!(second[0].external_match_status, ExternalMatchStatus::Matched);
    assert_eq!(provider.submit_count(), 1);
    assert_eq!(store.classification_history(batch[0].id).await.unwrap().len(), 1);
}

#[tokio::test]
async fn test_job_past_ceiling_is_abandoned() {
    let provider = Arc::new(FakeProvider::new().completing(Completion::Never));
    let mut settings = fast_settings();
    settings.job_ceiling_ms = 150;
    let orchestrator = build_orchestrator(provider.clone(), ScriptedClassifier::businesses(), settings);
    let mut rx = orchestrator.subscribe();

    let started = Instant::now();
    let results = orchestrator
        .classify_batch(Uuid::new_v4(), payees(&["Capital Services"]))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_secs(3));

    let c = &results[0];
    assert_eq!(c.external_match_status, ExternalMatchStatus::Abandoned);
    assert_eq!(c.cache_match.match_type, MatchType::Contains);
    assert_eq!(c.identity_source, Some(SignalSource::Cache));
    assert_eq!(c.confidence, c.cache_match.confidence);
    assert_eq!(c.external_match_confidence, None);
    assert!(provider.status_polls() > 0);

    let events = drain_events(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, ResolutionEvent::SearchAbandoned { request_id: Some(_), .. })));
}

#[tokio::test]
async fn test_failed_search_is_resubmitted() {
    let provider = Arc::new(
        FakeProvider::new()
            .with_match("HOOLI HOLDINGS", "HOOLI HOLDINGS INC", 0.93)
            .failing_first(1)
            .completing(Completion::AfterPolls(1)),
    );
    let orchestrator = build_orchestrator(provider.clone(), ScriptedClassifier::businesses(), fast_settings());

    let results = orchestrator
        .classify_batch(Uuid::new_v4(), payees(&["Hooli Holdings"]))
        .await
        .unwrap();

    assert_eq!(provider.submit_count(), 2);
    assert_eq!(results[0].external_match_status, ExternalMatchStatus::Matched);
}

#[tokio::test]
async fn test_resubmission_budget_exhausted_marks_failed() {
    let provider = Arc::new(FakeProvider::new().failing_first(10));
    let mut settings = fast_settings();
    settings.max_resubmissions = 1;
    let orchestrator = build_orchestrator(provider.clone(), ScriptedClassifier::businesses(), settings);

    let results = orchestrator
        .classify_batch(Uuid::new_v4(), payees(&["Hooli Holdings"]))
        .await
        .unwrap();

    assert_eq!(provider.submit_count(), 2);
    let c = &results[0];
    assert_eq!(c.external_match_status, ExternalMatchStatus::Failed);
    assert!(c.external_search_id.is_some());
    assert_eq!(c.identity_source, Some(SignalSource::Ai));
}

#[tokio::test]
async fn test_cancel_batch_abandons_pending_jobs() {
    let provider = Arc::new(FakeProvider::new().completing(Completion::Never));
    let mut settings = fast_settings();
    settings.job_ceiling_ms = 60_000;
    let orchestrator = Arc::new(build_orchestrator(
        provider.clone(),
        ScriptedClassifier::businesses(),
        settings,
    ));
    let mut rx = orchestrator.subscribe();

    let batch_id = Uuid::new_v4();
    let task = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move {
            orchestrator
                .classify_batch(batch_id, payees(&["Acme Inc", "Hooli Holdings"]))
                .await
        })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(ResolutionEvent::SearchSubmitted { .. }) = rx.recv().await {
                break;
            }
        }
    })
    .await
    .expect("search never submitted");

    assert_eq!(orchestrator.active_batches().await, vec![batch_id]);
    assert!(orchestrator.cancel_batch(batch_id).await);

    let results = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("cancelled batch did not finish")
        .unwrap()
        .unwrap();

    assert_eq!(results[0].external_match_status, ExternalMatchStatus::NotRequired);
    assert_eq!(results[0].identity_source, Some(SignalSource::Cache));
    assert_eq!(results[1].external_match_status, ExternalMatchStatus::Abandoned);

    assert!(orchestrator.active_batches().await.is_empty());
    assert!(!orchestrator.cancel_batch(batch_id).await);
}

#[tokio::test]
async fn test_unavailable_cache_degrades_to_ai_only() {
    let (logs, _guard) = capture_logs();
    let provider = Arc::new(FakeProvider::new());
    let orchestrator = ResolutionOrchestrator::new(
        Arc::new(SupplierCache::new()),
        build_client(provider.clone(), &provider_config()),
        Arc::new(ScriptedClassifier::businesses()),
        fast_settings(),
    )
    .unwrap();
    let mut rx = orchestrator.subscribe();

    let results = orchestrator
        .classify_batch(Uuid::new_v4(), payees(&["Acme Inc"]))
        .await
        .unwrap();

    let c = &results[0];
    assert_eq!(c.cache_match.match_type, MatchType::None);
    assert_eq!(c.external_match_status, ExternalMatchStatus::NoMatch);
    assert_eq!(c.identity_source, Some(SignalSource::Ai));

    logs.assert_contains("Continuing without supplier cache matches");
    let events = drain_events(&mut rx);
    assert!(events.iter().any(|e| matches!(
        e,
        ResolutionEvent::CacheLookupsComplete { cache_available: false, .. }
    )));
}

#[tokio::test]
async fn test_classifier_failure_keeps_batch_alive() {
    let provider = Arc::new(FakeProvider::new());
    let classifier = ScriptedClassifier::businesses().failing_on("Hooli Holdings");
    let orchestrator = build_orchestrator(provider.clone(), classifier, fast_settings());

    let results = orchestrator
        .classify_batch(Uuid::new_v4(), payees(&["Hooli Holdings", "Acme Inc"]))
        .await
        .unwrap();

    assert_eq!(results.len(), 2);
    let failed = &results[0];
    assert_eq!(failed.payee_type, PayeeType::Unknown);
    assert_eq!(failed.external_match_status, ExternalMatchStatus::NotRequired);
    assert!(failed.is_excluded);
    assert!(failed.ai_reasoning.contains("model timeout"));

    assert!(!results[1].is_excluded);
    assert_eq!(provider.submit_count(), 0);
}

#[tokio::test]
async fn test_duplicate_rows_yield_one_classification() {
    let provider = Arc::new(FakeProvider::new());
    let classifier = ScriptedClassifier::businesses();
    let orchestrator = build_orchestrator(provider, classifier, fast_settings());

    let acme = PayeeRecord::new("Acme Inc");
    let globex = PayeeRecord::new("Globex Corp");
    let results = orchestrator
        .classify_batch(Uuid::new_v4(), vec![acme.clone(), globex.clone(), acme.clone()])
        .await
        .unwrap();

    let ids: Vec<Uuid> = results.iter().map(|c| c.payee_id).collect();
    assert_eq!(ids, vec![acme.id, globex.id]);
}

#[tokio::test]
async fn test_eligible_payees_split_by_provider_cap() {
    let provider = Arc::new(FakeProvider::new().completing(Completion::AfterPolls(1)));
    let mut config = provider_config();
    config.max_items_per_job = 2;
    let orchestrator = ResolutionOrchestrator::new(
        Arc::new(SupplierCache::with_suppliers(suppliers())),
        build_client(provider.clone(), &config),
        Arc::new(ScriptedClassifier::businesses()),
        fast_settings(),
    )
    .unwrap();

    let batch = payees(&["Alpha Co", "Bravo Co", "Charlie Co", "Delta Co", "Echo Co"]);
    let results = orchestrator.classify_batch(Uuid::new_v4(), batch).await.unwrap();

    assert_eq!(provider.submit_count(), 3);
    assert!(results
        .iter()
        .all(|c| c.external_match_status == ExternalMatchStatus::NoMatch));
}

#[tokio::test]
async fn test_denylisted_payee_is_excluded_without_search() {
    let provider = Arc::new(FakeProvider::new());
    let mut settings = fast_settings();
    settings.denylist_patterns = vec!["^PAYROLL\\b".to_string()];
    let orchestrator = build_orchestrator(provider.clone(), ScriptedClassifier::businesses(), settings);

    let results = orchestrator
        .classify_batch(Uuid::new_v4(), payees(&["Payroll Transfer 0415"]))
        .await
        .unwrap();

    assert!(results[0].is_excluded);
    assert!(results[0].exclusion_reason.as_deref().unwrap().contains("denylist"));
    assert_eq!(results[0].external_match_status, ExternalMatchStatus::NotRequired);
    assert_eq!(provider.submit_count(), 0);
}

#[tokio::test]
async fn test_progress_events_bracket_the_batch() {
    let provider = Arc::new(FakeProvider::new().with_match("HOOLI HOLDINGS", "HOOLI HOLDINGS INC", 0.93));
    let orchestrator = build_orchestrator(provider, ScriptedClassifier::businesses(), fast_settings());
    let mut rx = orchestrator.subscribe();

    let batch_id = Uuid::new_v4();
    orchestrator
        .classify_batch(batch_id, payees(&["Hooli Holdings", "Acme Inc"]))
        .await
        .unwrap();

    let events = drain_events(&mut rx);
    assert!(events.iter().all(|e| e.batch_id() == batch_id));
    assert!(matches!(events.first(), Some(ResolutionEvent::BatchStarted { payees: 2, .. })));
    assert!(matches!(
        events.last(),
        Some(ResolutionEvent::BatchCompleted {
            classifications: 2,
            matched: 2,
            excluded: 0,
            ..
        })
    ));
    assert!(events.iter().any(|e| matches!(e, ResolutionEvent::SearchSubmitted { items: 1, .. })));
    assert!(events.iter().any(|e| matches!(e, ResolutionEvent::SearchDrained { items: 1, .. })));
    assert!(events.iter().any(|e| matches!(
        e,
        ResolutionEvent::SearchStatusChanged {
            status: payee_resolver::SearchStatus::Completed,
            ..
        }
    )));
}

fn assert_send<T: Send>(_: &T) {}

#[tokio::test]
async fn test_classify_batch_future_is_send() {
    let provider = Arc::new(FakeProvider::new());
    let orchestrator = Arc::new(build_orchestrator(
        provider,
        ScriptedClassifier::businesses(),
        fast_settings(),
    ));

    let batch = payees(&["Acme Inc"]);
    let future = orchestrator.classify_batch(Uuid::new_v4(), batch.clone());
    assert_send(&future);
    drop(future);

    let handle = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.classify_batch(Uuid::new_v4(), batch).await })
    };
    let results = handle.await.unwrap().unwrap();
    assert_eq!(results.len(), 1);
}

#[tokio::test]
async fn test_batch_after_cancelled_one_gets_its_own_ceiling() {
    let provider = Arc::new(
        FakeProvider::new()
            .with_match("HOOLI HOLDINGS", "HOOLI HOLDINGS INC", 0.93)
            .completing(Completion::AfterPolls(5)),
    );
    let mut settings = fast_settings();
    settings.poll_interval_ms = 20;
    settings.job_ceiling_ms = 300;
    let orchestrator = Arc::new(build_orchestrator(
        provider.clone(),
        ScriptedClassifier::businesses(),
        settings,
    ));
    let batch = payees(&["Hooli Holdings"]);

    let mut rx = orchestrator.subscribe();
    let first = Uuid::new_v4();
    let task = {
        let orchestrator = Arc::clone(&orchestrator);
        let batch = batch.clone();
        tokio::spawn(async move { orchestrator.classify_batch(first, batch).await })
    };
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            if let Ok(ResolutionEvent::SearchSubmitted { .. }) = rx.recv().await {
                break;
            }
        }
    })
    .await
    .expect("search never submitted");

    assert!(orchestrator.cancel_batch(first).await);
    let cancelled = task.await.unwrap().unwrap();
    assert_eq!(cancelled[0].external_match_status, ExternalMatchStatus::Abandoned);

    // Past the first batch's deadline
    tokio::time::sleep(Duration::from_millis(400)).await;

    let mut rx = orchestrator.subscribe();
    let second = Uuid::new_v4();
    let results = orchestrator.classify_batch(second, batch).await.unwrap();

    assert_eq!(results[0].external_match_status, ExternalMatchStatus::Matched);
    assert_eq!(results[0].matched_name.as_deref(), Some("HOOLI HOLDINGS INC"));
    assert_eq!(provider.submit_count(), 1);

    let events = drain_events(&mut rx);
    assert!(!events.is_empty());
    assert!(events.iter().all(|e| e.batch_id() == second));
    assert!(!events
        .iter()
        .any(|e| matches!(e, ResolutionEvent::SearchAbandoned { .. })));
}

#[tokio::test]
async fn test_cancel_during_drain_keeps_results() {
    let names: Vec<String> = (0..30).map(|i| format!("Vendor {:02} Holdings", i)).collect();
    let mut provider = FakeProvider::new().slow_results(Duration::from_millis(100));
    for name in &names {
        let cleaned = payee_common::normalize_name(name);
        provider = provider.with_match(&cleaned, &format!("{} LLC", cleaned), 0.9);
    }
    let provider = Arc::new(provider);
    let orchestrator = Arc::new(build_orchestrator(
        provider.clone(),
        ScriptedClassifier::businesses(),
        fast_settings(),
    ));

    let batch_id = Uuid::new_v4();
    let batch: Vec<PayeeRecord> = names.iter().map(|n| PayeeRecord::new(n.as_str())).collect();
    let task = {
        let orchestrator = Arc::clone(&orchestrator);
        tokio::spawn(async move { orchestrator.classify_batch(batch_id, batch).await })
    };

    tokio::time::timeout(Duration::from_secs(5), async {
        while provider.result_fetches().is_empty() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("draining never started");
    assert!(orchestrator.cancel_batch(batch_id).await);

    let results = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .expect("batch did not finish")
        .unwrap()
        .unwrap();

    assert_eq!(provider.result_fetches().len(), 2);
    assert_eq!(results.len(), 30);
    assert!(results
        .iter()
        .all(|c| c.external_match_status == ExternalMatchStatus::Matched));
}

#[tokio::test]
async fn test_ceiling_covers_slow_submission() {
    let provider = Arc::new(FakeProvider::new().slow_submissions(Duration::from_secs(1)));
    let mut settings = fast_settings();
    settings.job_ceiling_ms = 100;
    let orchestrator = build_orchestrator(provider.clone(), ScriptedClassifier::businesses(), settings);
    let mut rx = orchestrator.subscribe();

    let started = Instant::now();
    let results = orchestrator
        .classify_batch(Uuid::new_v4(), payees(&["Hooli Holdings"]))
        .await
        .unwrap();
    assert!(started.elapsed() < Duration::from_millis(800));

    assert_eq!(results[0].external_match_status, ExternalMatchStatus::Abandoned);
    assert_eq!(results[0].external_search_id, None);
    assert_eq!(provider.submit_count(), 0);

    let events = drain_events(&mut rx);
    assert!(events
        .iter()
        .any(|e| matches!(e, ResolutionEvent::SearchAbandoned { request_id: None, .. })));
    assert!(!events
        .iter()
        .any(|e| matches!(e, ResolutionEvent::SearchSubmitted { .. })));
}

#[tokio::test]
async fn test_no_resubmission_after_ceiling() {
    let provider = Arc::new(FakeProvider::new().failing_first(1_000));
    let mut settings = fast_settings();
    settings.max_resubmissions = 1_000;
    settings.job_ceiling_ms = 150;
    let orchestrator = build_orchestrator(provider.clone(), ScriptedClassifier::businesses(), settings);

    let results = orchestrator
        .classify_batch(Uuid::new_v4(), payees(&["Hooli Holdings"]))
        .await
        .unwrap();
    assert_eq!(results[0].external_match_status, ExternalMatchStatus::Abandoned);

    let submitted = provider.submit_count();
    assert!(submitted > 1);
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert_eq!(provider.submit_count(), submitted);
}
