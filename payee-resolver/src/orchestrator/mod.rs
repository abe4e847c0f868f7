//! Resolution orchestrator
//!
//! Drives a batch of payees through the supplier cache, the AI classifier and
//! the bulk search provider, then merges the signals into one
//! [`Classification`] per unique payee.
//!
//! # Flow
//! 1. Cache lookup for every payee (before any external submission)
//! 2. AI type classification, bounded concurrency
//! 3. Eligible payees split into jobs of at most the provider cap
//! 4. Jobs polled to COMPLETED/FAILED under a wall-clock ceiling, then drained
//! 5. Merge and persist
//!
//! A batch always yields one classification per unique payee. A provider
//! failure, a missing cache, or a classifier error degrades the affected
//! payees' signals; it never fails the batch.

mod merge;
mod tracker;

pub use merge::{ExternalSignal, MergePolicy, PayeeSignals};

use crate::bulk_search::{submission_key, BulkSearchClient};
use crate::cache::SupplierCache;
use crate::classifier::PayeeClassifier;
use crate::config::ResolutionSettings;
use crate::error::{ResolutionError, ResolutionResult};
use crate::events::{EventBus, ResolutionEvent};
use crate::store::ResolutionStore;
use crate::types::{
    AiClassification, BatchId, Classification, MatchResult, PayeeId, PayeeRecord, SignalSource,
};
use futures::future::{join_all, BoxFuture, FutureExt, Shared};
use futures::stream::{self, StreamExt};
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{broadcast, RwLock};
use tokio_util::sync::CancellationToken;
use tracker::{JobContext, JobDisposition, JobOutcome, JobShared, Release};

/// A running search job and the way to wait on it
#[derive(Clone)]
struct JobHandle {
    id: u64,
    shared: Arc<JobShared>,
    outcome: Shared<BoxFuture<'static, Arc<JobOutcome>>>,
}

type InFlight = Arc<Mutex<HashMap<String, JobHandle>>>;

pub struct ResolutionOrchestrator {
    cache: Arc<SupplierCache>,
    client: Arc<BulkSearchClient>,
    classifier: Arc<dyn PayeeClassifier>,
    store: Option<Arc<dyn ResolutionStore>>,
    settings: ResolutionSettings,
    policy: MergePolicy,
    events: EventBus,
    /// Cancellation token per running batch
    batches: Arc<RwLock<HashMap<BatchId, CancellationToken>>>,
    /// Running jobs by submission key; a second batch with the same payee set joins the first
    in_flight: InFlight,
    next_job_id: AtomicU64,
}

impl ResolutionOrchestrator {
    pub fn new(
        cache: Arc<SupplierCache>,
        client: Arc<BulkSearchClient>,
        classifier: Arc<dyn PayeeClassifier>,
        settings: ResolutionSettings,
    ) -> ResolutionResult<Self> {
        settings.validate()?;
        let policy = MergePolicy::from_settings(&settings)?;
        let events = EventBus::new(settings.event_capacity);

        Ok(Self {
            cache,
            client,
            classifier,
            store: None,
            settings,
            policy,
            events,
            batches: Arc::new(RwLock::new(HashMap::new())),
            in_flight: Arc::new(Mutex::new(HashMap::new())),
            next_job_id: AtomicU64::new(0),
        })
    }

    /// Persist searches and classifications to `store`
    pub fn with_store(mut self, store: Arc<dyn ResolutionStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn subscribe(&self) -> broadcast::Receiver<ResolutionEvent> {
        self.events.subscribe()
    }

    pub fn settings(&self) -> &ResolutionSettings {
        &self.settings
    }

    /// Ids of batches currently running
    pub async fn active_batches(&self) -> Vec<BatchId> {
        self.batches.read().await.keys().copied().collect()
    }

    /// Abandon every pending job of a running batch
    ///
    /// Jobs that already reached a terminal state keep their results.
    /// Returns `false` when no batch with that id is running.
    pub async fn cancel_batch(&self, batch_id: BatchId) -> bool {
        match self.batches.read().await.get(&batch_id) {
            Some(token) => {
                tracing::info!(batch_id = %batch_id, "Cancelling batch");
                token.cancel();
                true
            }
            None => false,
        }
    }

    /// Classify a batch of payees
    ///
    /// Rows sharing a payee id are classified once; the result follows the
    /// order of first appearance.
    ///
    /// # Errors
    /// `InvalidState` when a batch with the same id is already running.
    pub async fn classify_batch(
        &self,
        batch_id: BatchId,
        payees: Vec<PayeeRecord>,
    ) -> ResolutionResult<Vec<Classification>> {
        let token = CancellationToken::new();
        {
            let mut batches = self.batches.write().await;
            if batches.contains_key(&batch_id) {
                return Err(ResolutionError::InvalidState(format!(
                    "Batch {} is already running",
                    batch_id
                )));
            }
            batches.insert(batch_id, token.clone());
        }

        let classifications = self.run_batch(batch_id, payees, &token).await;

        self.batches.write().await.remove(&batch_id);
        Ok(classifications)
    }

    async fn run_batch(
        &self,
        batch_id: BatchId,
        payees: Vec<PayeeRecord>,
        token: &CancellationToken,
    ) -> Vec<Classification> {
        let start_time = std::time::Instant::now();
        let payees = unique_payees(payees);

        tracing::info!(
            batch_id = %batch_id,
            payees = payees.len(),
            subscribers = self.events.subscriber_count(),
            "Starting batch classification"
        );
        self.events.emit_lossy(ResolutionEvent::BatchStarted {
            batch_id,
            payees: payees.len(),
        });

        let (cache_matches, cache_available) = self.lookup_all(&payees);
        self.events.emit_lossy(ResolutionEvent::CacheLookupsComplete {
            batch_id,
            matched: cache_matches.iter().filter(|m| m.is_match()).count(),
            cache_available,
        });

        let ai_results = self.classify_all(&payees).await;

        let eligible: Vec<PayeeRecord> = payees
            .iter()
            .zip(&cache_matches)
            .zip(&ai_results)
            .filter(|((payee, cache_match), ai)| self.needs_external_search(payee, cache_match, ai))
            .map(|((payee, _), _)| payee.clone())
            .collect();

        let mut external = self.search_external(batch_id, eligible, token).await;

        let classifications: Vec<Classification> = payees
            .iter()
            .zip(cache_matches)
            .zip(ai_results)
            .map(|((payee, cache_match), ai)| {
                self.policy.merge(PayeeSignals {
                    batch_id,
                    payee,
                    ai,
                    cache_match,
                    external: external
                        .remove(&payee.id)
                        .unwrap_or_else(ExternalSignal::not_required),
                })
            })
            .collect();

        self.persist(&classifications).await;

        let matched = classifications
            .iter()
            .filter(|c| {
                matches!(
                    c.identity_source,
                    Some(SignalSource::External) | Some(SignalSource::Cache)
                )
            })
            .count();
        let excluded = classifications.iter().filter(|c| c.is_excluded).count();

        tracing::info!(
            batch_id = %batch_id,
            classifications = classifications.len(),
            matched,
            excluded,
            elapsed_ms = start_time.elapsed().as_millis() as u64,
            "Batch classification complete"
        );
        self.events.emit_lossy(ResolutionEvent::BatchCompleted {
            batch_id,
            classifications: classifications.len(),
            matched,
            excluded,
        });

        classifications
    }

    /// Cache match per payee, and whether the cache was available
    fn lookup_all(&self, payees: &[PayeeRecord]) -> (Vec<MatchResult>, bool) {
        match self.cache.snapshot() {
            Ok(index) => (
                payees
                    .iter()
                    .map(|p| index.lookup_normalized(&p.cleaned_name))
                    .collect(),
                true,
            ),
            Err(err) => {
                tracing::warn!(error = %err, "Continuing without supplier cache matches");
                (vec![MatchResult::none(); payees.len()], false)
            }
        }
    }

    /// AI classification per payee, in input order
    async fn classify_all(&self, payees: &[PayeeRecord]) -> Vec<AiClassification> {
        let requests: Vec<_> = payees
            .iter()
            .map(|payee| {
                let classifier = Arc::clone(&self.classifier);
                let payee_id = payee.id;
                let name = payee.original_name.clone();
                async move {
                    match classifier.classify(&name).await {
                        Ok(mut ai) => {
                            ai.confidence = ai.confidence.clamp(0.0, 1.0);
                            ai
                        }
                        Err(err) => {
                            tracing::warn!(payee_id = %payee_id, error = %err, "AI classification failed");
                            AiClassification::unavailable(format!("Classifier unavailable: {}", err))
                        }
                    }
                }
            })
            .collect();

        stream::iter(requests)
            .buffered(self.settings.classifier_concurrency)
            .collect()
            .await
    }

    fn needs_external_search(
        &self,
        payee: &PayeeRecord,
        cache_match: &MatchResult,
        ai: &AiClassification,
    ) -> bool {
        self.settings.enable_external_search
            && !payee.cleaned_name.is_empty()
            && self.settings.search_payee_types.contains(&ai.payee_type)
            && cache_match.confidence < self.settings.completeness_threshold
            && self.policy.denylisted(&payee.cleaned_name).is_none()
    }

    /// Run (or join) one job per chunk and collect each payee's external signal
    async fn search_external(
        &self,
        batch_id: BatchId,
        eligible: Vec<PayeeRecord>,
        token: &CancellationToken,
    ) -> HashMap<PayeeId, ExternalSignal> {
        let mut signals = HashMap::new();
        if eligible.is_empty() {
            return signals;
        }

        if token.is_cancelled() {
            tracing::info!(batch_id = %batch_id, "Batch cancelled before external search");
            for payee in &eligible {
                signals.insert(payee.id, ExternalSignal::abandoned());
            }
            return signals;
        }

        let jobs: Vec<(Vec<PayeeId>, JobHandle)> = eligible
            .chunks(self.client.max_items_per_job())
            .map(|chunk| {
                let ids: Vec<PayeeId> = chunk.iter().map(|p| p.id).collect();
                let job = self.job_for(batch_id, &ids, chunk.to_vec());
                (ids, job)
            })
            .collect();

        tracing::debug!(
            batch_id = %batch_id,
            eligible = eligible.len(),
            jobs = jobs.len(),
            "External search jobs scheduled"
        );

        let waits: Vec<_> = jobs
            .into_iter()
            .map(|(ids, job)| {
                let token = token.clone();
                async move {
                    let outcome = tokio::select! {
                        biased;
                        outcome = job.outcome.clone() => Some(outcome),
                        _ = token.cancelled() => None,
                    };
                    let outcome = match outcome {
                        Some(outcome) => Some(outcome),
                        None => match job.shared.release(batch_id) {
                            Release::AwaitResults => Some(job.outcome.await),
                            Release::Released => None,
                        },
                    };
                    (ids, outcome)
                }
            })
            .collect();
        let outcomes = join_all(waits).await;

        for (ids, outcome) in outcomes {
            let Some(outcome) = outcome else {
                self.events.emit_lossy(ResolutionEvent::SearchAbandoned {
                    batch_id,
                    request_id: None,
                    reason: "Batch cancelled".to_string(),
                });
                for id in ids {
                    signals.insert(id, ExternalSignal::abandoned());
                }
                continue;
            };

            let request_id = outcome.search.as_ref().map(|s| s.request_id.as_str());
            for id in ids {
                let signal = match (&outcome.disposition, request_id) {
                    (JobDisposition::Drained(matches), Some(request_id)) => {
                        ExternalSignal::drained(request_id, matches.get(&id).cloned())
                    }
                    (JobDisposition::Abandoned(_), _) => ExternalSignal::abandoned(),
                    _ => ExternalSignal::failed(request_id),
                };
                signals.insert(id, signal);
            }
        }

        signals
    }

    /// Running job for this payee set, spawned if none can be joined
    fn job_for(&self, batch_id: BatchId, ids: &[PayeeId], payees: Vec<PayeeRecord>) -> JobHandle {
        let key = submission_key(ids);
        let ceiling = self.settings.job_ceiling();
        let mut in_flight = self
            .in_flight
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());

        if let Some(job) = in_flight.get(&key) {
            if job.shared.join(batch_id, ceiling) {
                tracing::debug!(batch_id = %batch_id, job_id = job.id, "Joining running search job for identical payee set");
                return job.clone();
            }
        }

        let id = self.next_job_id.fetch_add(1, Ordering::Relaxed);
        let shared = Arc::new(JobShared::new(batch_id, ceiling));
        let context = JobContext {
            client: self.client.clone(),
            store: self.store.clone(),
            events: self.events.clone(),
            batch_id,
            shared: shared.clone(),
            poll_interval: self.settings.poll_interval(),
            max_resubmissions: self.settings.max_resubmissions,
        };

        let registry = Arc::clone(&self.in_flight);
        let task_key = key.clone();
        let task = tokio::spawn(async move {
            let outcome = Arc::new(context.run(payees).await);
            let mut in_flight = registry.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
            if in_flight.get(&task_key).map_or(false, |job| job.id == id) {
                in_flight.remove(&task_key);
            }
            outcome
        });

        let outcome = task
            .map(|joined| {
                joined.unwrap_or_else(|err| {
                    tracing::error!(error = %err, "Search job task failed");
                    Arc::new(JobOutcome {
                        search: None,
                        disposition: JobDisposition::Failed(format!("Search job task failed: {}", err)),
                    })
                })
            })
            .boxed()
            .shared();

        let job = JobHandle { id, shared, outcome };
        in_flight.insert(key, job.clone());
        job
    }

    async fn persist(&self, classifications: &[Classification]) {
        let Some(store) = &self.store else {
            return;
        };
        for classification in classifications {
            if let Err(err) = store.record_classification(classification).await {
                tracing::error!(
                    payee_id = %classification.payee_id,
                    error = %err,
                    "Failed to persist classification"
                );
            }
        }
    }
}

/// Drop rows repeating an earlier payee id
fn unique_payees(payees: Vec<PayeeRecord>) -> Vec<PayeeRecord> {
    let mut seen = HashSet::new();
    payees.into_iter().filter(|p| seen.insert(p.id)).collect()
}
