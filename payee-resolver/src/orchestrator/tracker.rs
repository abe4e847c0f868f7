//! Bulk search job tracking
//!
//! One job owns one payee subset from submission to a terminal outcome:
//! submit, poll on an interval, re-submit a FAILED search a bounded number
//! of times, then drain a COMPLETED search. The job's ExternalSearch is only
//! ever mutated here.
//!
//! A job runs on its own task and may be waited on by several batches. Each
//! joining batch extends the wall-clock ceiling to its own deadline. The
//! ceiling and cancellation cover submission and polling; once a search is
//! COMPLETED, draining always runs to the end.

use crate::bulk_search::BulkSearchClient;
use crate::error::ResolutionError;
use crate::events::{EventBus, ResolutionEvent};
use crate::store::ResolutionStore;
use crate::types::{BatchId, ExternalMatchItem, ExternalSearch, PayeeId, PayeeRecord, SearchStatus};
use std::collections::HashMap;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

/// How a job ended
#[derive(Debug, Clone)]
pub(crate) enum JobDisposition {
    /// Best result item per payee; payees without one had no match
    Drained(HashMap<PayeeId, ExternalMatchItem>),
    Failed(String),
    /// Ceiling passed or every waiting batch was cancelled before the search completed
    Abandoned(String),
}

#[derive(Debug, Clone)]
pub(crate) struct JobOutcome {
    /// Last known state of the job's search, if one was created
    pub search: Option<ExternalSearch>,
    pub disposition: JobDisposition,
}

/// What a cancelled batch does with a job it was waiting on
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Release {
    /// The search is COMPLETED and being drained; wait for the results
    AwaitResults,
    /// The batch no longer waits on the job
    Released,
}

#[derive(Debug)]
struct JobState {
    /// Batches waiting on the job, in join order
    batches: Vec<BatchId>,
    deadline: Instant,
    draining: bool,
}

/// State shared between a running job and the batches waiting on it
#[derive(Debug)]
pub(crate) struct JobShared {
    state: Mutex<JobState>,
    cancel: CancellationToken,
}

impl JobShared {
    pub(crate) fn new(batch_id: BatchId, ceiling: Duration) -> Self {
        Self {
            state: Mutex::new(JobState {
                batches: vec![batch_id],
                deadline: Instant::now() + ceiling,
                draining: false,
            }),
            cancel: CancellationToken::new(),
        }
    }

    fn state(&self) -> MutexGuard<'_, JobState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add a waiting batch, extending the deadline to `now + ceiling`
    ///
    /// Returns `false` when the job was already abandoned by its last waiter.
    pub(crate) fn join(&self, batch_id: BatchId, ceiling: Duration) -> bool {
        let mut state = self.state();
        if self.cancel.is_cancelled() {
            return false;
        }
        if !state.batches.contains(&batch_id) {
            state.batches.push(batch_id);
        }
        state.deadline = state.deadline.max(Instant::now() + ceiling);
        true
    }

    /// Stop waiting on behalf of a cancelled batch
    ///
    /// The last batch to leave abandons the job, unless its search is
    /// already being drained.
    pub(crate) fn release(&self, batch_id: BatchId) -> Release {
        let mut state = self.state();
        if state.draining {
            return Release::AwaitResults;
        }
        state.batches.retain(|b| *b != batch_id);
        if state.batches.is_empty() {
            self.cancel.cancel();
        }
        Release::Released
    }

    /// Enter the draining phase; `false` if every waiter already left
    fn begin_draining(&self) -> bool {
        let mut state = self.state();
        if self.cancel.is_cancelled() {
            return false;
        }
        state.draining = true;
        true
    }

    /// Refuse further joins once the job has given up
    fn close(&self) {
        let _state = self.state();
        self.cancel.cancel();
    }

    fn deadline(&self) -> Instant {
        self.state().deadline
    }

    fn batches(&self) -> Vec<BatchId> {
        self.state().batches.clone()
    }
}

/// Why the submit/poll phase stopped early
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Interrupted {
    Deadline,
    Cancelled,
}

/// Everything a job needs, detached from the orchestrator's lifetime
#[derive(Clone)]
pub(crate) struct JobContext {
    pub client: Arc<BulkSearchClient>,
    pub store: Option<Arc<dyn ResolutionStore>>,
    pub events: EventBus,
    /// Batch that started the job; search rows are stored under it
    pub batch_id: BatchId,
    pub shared: Arc<JobShared>,
    pub poll_interval: Duration,
    pub max_resubmissions: u32,
}

impl JobContext {
    pub(crate) async fn run(self, payees: Vec<PayeeRecord>) -> JobOutcome {
        let mut resubmissions = 0;
        let mut current: Option<ExternalSearch> = None;

        loop {
            let phase = self
                .until_deadline(self.submit_and_poll(&payees, &mut current))
                .await;

            let search = match phase {
                Ok(Ok(())) => current.take(),
                Ok(Err(err)) => {
                    tracing::error!(
                        batch_id = %self.batch_id,
                        items = payees.len(),
                        error = %err,
                        "Bulk search submission rejected"
                    );
                    return JobOutcome {
                        search: current,
                        disposition: JobDisposition::Failed(err.to_string()),
                    };
                }
                Err(Interrupted::Cancelled) => {
                    tracing::info!(
                        request_id = current.as_ref().map(|s| s.request_id.as_str()).unwrap_or("-"),
                        "Every waiting batch cancelled, abandoning bulk search"
                    );
                    return JobOutcome {
                        search: current,
                        disposition: JobDisposition::Abandoned("Batch cancelled".to_string()),
                    };
                }
                Err(Interrupted::Deadline) => return self.abandon(current),
            };

            let Some(search) = search else {
                return JobOutcome {
                    search: None,
                    disposition: JobDisposition::Failed("Search was never submitted".to_string()),
                };
            };

            match search.status {
                SearchStatus::Completed => {
                    if !self.shared.begin_draining() {
                        return JobOutcome {
                            search: Some(search),
                            disposition: JobDisposition::Abandoned("Batch cancelled".to_string()),
                        };
                    }
                    return self.drain(search).await;
                }
                _ if resubmissions < self.max_resubmissions => {
                    resubmissions += 1;
                    tracing::warn!(
                        request_id = %search.request_id,
                        resubmission = resubmissions,
                        reason = search.failure_reason.as_deref().unwrap_or("unknown"),
                        "Bulk search FAILED, re-submitting payees"
                    );
                    current = Some(search);
                }
                _ => {
                    let reason = search
                        .failure_reason
                        .clone()
                        .unwrap_or_else(|| "Search failed".to_string());
                    tracing::error!(
                        request_id = %search.request_id,
                        resubmissions,
                        reason = %reason,
                        "Bulk search FAILED, giving up"
                    );
                    return JobOutcome {
                        search: Some(search),
                        disposition: JobDisposition::Failed(reason),
                    };
                }
            }
        }
    }

    /// Submit `payees` and poll the new search until COMPLETED or FAILED
    async fn submit_and_poll(
        &self,
        payees: &[PayeeRecord],
        current: &mut Option<ExternalSearch>,
    ) -> Result<(), ResolutionError> {
        let search = self.client.submit(payees).await?;

        self.record(&search).await;
        self.emit(|batch_id| ResolutionEvent::SearchSubmitted {
            batch_id,
            request_id: search.request_id.clone(),
            items: search.payee_ids.len(),
        });

        let search = current.insert(search);
        self.await_terminal(search).await;
        Ok(())
    }

    /// Run `operation` until it finishes, the deadline passes, or the job is cancelled
    ///
    /// Deadline and cancellation are checked before `operation` is polled, so
    /// nothing is sent once either has fired.
    async fn until_deadline<F: Future>(&self, operation: F) -> Result<F::Output, Interrupted> {
        tokio::pin!(operation);
        loop {
            let deadline = self.shared.deadline();
            tokio::select! {
                biased;
                _ = self.shared.cancel.cancelled() => return Err(Interrupted::Cancelled),
                _ = tokio::time::sleep_until(deadline) => {
                    // A joining batch may have moved the deadline
                    if Instant::now() >= self.shared.deadline() {
                        return Err(Interrupted::Deadline);
                    }
                }
                output = &mut operation => return Ok(output),
            }
        }
    }

    fn abandon(&self, search: Option<ExternalSearch>) -> JobOutcome {
        let target = search
            .as_ref()
            .map(|s| s.display_id().to_string())
            .unwrap_or_else(|| "submission".to_string());
        let reason = ResolutionError::SearchTimedOut(target).to_string();
        self.shared.close();
        tracing::warn!(
            request_id = search.as_ref().map(|s| s.request_id.as_str()).unwrap_or("-"),
            "Bulk search passed its wall-clock ceiling, abandoning"
        );
        let request_id = search.as_ref().map(|s| s.request_id.clone());
        self.emit(|batch_id| ResolutionEvent::SearchAbandoned {
            batch_id,
            request_id: request_id.clone(),
            reason: reason.clone(),
        });
        JobOutcome {
            search,
            disposition: JobDisposition::Abandoned(reason),
        }
    }

    /// Poll until the search is COMPLETED or FAILED
    async fn await_terminal(&self, search: &mut ExternalSearch) {
        while !search.status.is_terminal() {
            tokio::time::sleep(self.poll_interval).await;

            let polled = match self.client.poll(search).await {
                Ok(polled) => polled,
                Err(err) => {
                    let mut failed = search.clone();
                    failed.mark_failed(err.to_string());
                    failed
                }
            };

            if polled.status != search.status {
                self.emit(|batch_id| ResolutionEvent::SearchStatusChanged {
                    batch_id,
                    request_id: polled.request_id.clone(),
                    status: polled.status,
                });
            }

            *search = polled;
            self.record(search).await;
        }
    }

    async fn drain(&self, mut search: ExternalSearch) -> JobOutcome {
        match self.client.drain_results(&search).await {
            Ok(items) => {
                let total = items.len();
                let matches = match_to_payees(&search, items);
                self.emit(|batch_id| ResolutionEvent::SearchDrained {
                    batch_id,
                    request_id: search.request_id.clone(),
                    items: total,
                });
                JobOutcome {
                    search: Some(search),
                    disposition: JobDisposition::Drained(matches),
                }
            }
            Err(err) => {
                tracing::error!(
                    request_id = %search.request_id,
                    error = %err,
                    "Draining results failed"
                );
                let reason = err.to_string();
                search.mark_failed(reason.clone());
                self.record(&search).await;
                JobOutcome {
                    search: Some(search),
                    disposition: JobDisposition::Failed(reason),
                }
            }
        }
    }

    /// Emit one event per waiting batch
    fn emit(&self, event: impl Fn(BatchId) -> ResolutionEvent) {
        for batch_id in self.shared.batches() {
            self.events.emit_lossy(event(batch_id));
        }
    }

    async fn record(&self, search: &ExternalSearch) {
        if let Some(store) = &self.store {
            if let Err(err) = store.record_search(self.batch_id, search).await {
                tracing::warn!(
                    request_id = %search.request_id,
                    error = %err,
                    "Failed to persist search state"
                );
            }
        }
    }
}

/// Map result items back to payees by item reference, keeping the best per payee
fn match_to_payees(
    search: &ExternalSearch,
    items: Vec<ExternalMatchItem>,
) -> HashMap<PayeeId, ExternalMatchItem> {
    let mut matches: HashMap<PayeeId, ExternalMatchItem> = HashMap::new();

    for item in items {
        let Some(&payee_id) = search.references.get(&item.reference_id) else {
            tracing::warn!(
                request_id = %search.request_id,
                reference = %item.reference_id,
                "Result item references no submitted payee"
            );
            continue;
        };

        match matches.get(&payee_id) {
            Some(best) if best.confidence >= item.confidence => {}
            _ => {
                matches.insert(payee_id, item);
            }
        }
    }

    matches
}
