//! Bulk search provider client
//!
//! Submits payee batches as bulk search jobs, polls their status, and pages
//! through their results. Every request is rate limited, signed, and retried
//! on transient failure. The client never sleeps between polls; the caller
//! owns the poll schedule.

use super::request_id::{generate_request_id, is_valid_identifier, item_reference, submission_key};
use super::retry::{retry_transient, RetryPolicy};
use super::signer::OAuthSigner;
use super::transport::{HttpMethod, ProviderRequest, ProviderResponse, ReqwestTransport, SearchTransport};
use super::wire::{
    BulkSearchRequest, ErrorResponse, ResultsResponse, SearchCriteria, StatusResponse,
    SubmitResponse,
};
use crate::config::{ProviderConfig, ProviderCredentials};
use crate::error::{ResolutionError, ResolutionResult};
use crate::types::{ExternalMatchItem, ExternalSearch, PayeeId, PayeeRecord, ResultPage, SearchStatus};
use chrono::Utc;
use governor::{Quota, RateLimiter};
use std::collections::{BTreeMap, HashMap, HashSet};
use std::num::NonZeroU32;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

const LOOKUP_TYPE: &str = "SUPPLIERS";
const MAXIMUM_MATCHES: u32 = 1;

/// Latest live search for one submission key
struct Submission {
    search: ExternalSearch,
    recorded_at: Instant,
}

impl Submission {
    fn new(search: ExternalSearch) -> Self {
        Self {
            search,
            recorded_at: Instant::now(),
        }
    }
}

type SubmissionSlot = Arc<tokio::sync::Mutex<Option<Submission>>>;

/// Signed client for the bulk search provider
pub struct BulkSearchClient {
    transport: Arc<dyn SearchTransport>,
    signer: OAuthSigner,
    base_url: String,
    client_id: String,
    retry: RetryPolicy,
    page_size: usize,
    max_items_per_job: usize,
    rate_limiter: RateLimiter<
        governor::state::direct::NotKeyed,
        governor::state::InMemoryState,
        governor::clock::DefaultClock,
    >,
    /// Pending or COMPLETED search per submission key; FAILED and expired entries are dropped
    submissions: Mutex<HashMap<String, SubmissionSlot>>,
    submission_ttl: Duration,
}

impl BulkSearchClient {
    pub fn new(
        config: &ProviderConfig,
        credentials: ProviderCredentials,
        transport: Arc<dyn SearchTransport>,
    ) -> ResolutionResult<Self> {
        config.validate()?;

        let per_second = NonZeroU32::new(config.requests_per_second).ok_or_else(|| {
            ResolutionError::Config("provider.requests_per_second must be positive".to_string())
        })?;

        Ok(Self {
            transport,
            signer: OAuthSigner::new(credentials.consumer_key, credentials.signing_secret),
            base_url: config.base_url.trim_end_matches('/').to_string(),
            client_id: config.client_id.clone(),
            retry: config.retry_policy(),
            page_size: config.page_size,
            max_items_per_job: config.max_items_per_job,
            rate_limiter: RateLimiter::direct(Quota::per_second(per_second)),
            submissions: Mutex::new(HashMap::new()),
            submission_ttl: config.submission_ttl(),
        })
    }

    /// Client backed by `reqwest`, credentials resolved from ENV or TOML
    pub fn from_config(config: &ProviderConfig) -> ResolutionResult<Self> {
        let credentials = config.credentials()?;
        let user_agent = payee_common::config::get_user_agent();
        let transport = ReqwestTransport::new(config.timeout(), &user_agent)?;
        Self::new(config, credentials, Arc::new(transport))
    }

    pub fn page_size(&self) -> usize {
        self.page_size
    }

    /// Provider cap on items per submission
    pub fn max_items_per_job(&self) -> usize {
        self.max_items_per_job
    }

    /// Track an existing provider search by id (status unknown until polled)
    pub fn attach(&self, search_id: &str) -> ExternalSearch {
        ExternalSearch {
            request_id: search_id.to_string(),
            search_id: Some(search_id.to_string()),
            submission_key: String::new(),
            status: SearchStatus::InProgress,
            submitted_at: Utc::now(),
            last_polled_at: None,
            payee_ids: Vec::new(),
            references: BTreeMap::new(),
            failure_reason: None,
        }
    }

    /// Submit one bulk search for `payees`
    ///
    /// Submitting a payee set whose earlier search is still pending or already
    /// COMPLETED returns that search. A FAILED earlier search is replaced by a
    /// fresh submission. When transient failures exhaust the retry budget the
    /// returned search is FAILED with no provider id.
    ///
    /// # Errors
    /// - `InvalidState` for an empty set or one over the per-job cap
    /// - `ProviderRejected` when the provider refuses the request
    pub async fn submit(&self, payees: &[PayeeRecord]) -> ResolutionResult<ExternalSearch> {
        let mut seen = HashSet::new();
        let payees: Vec<&PayeeRecord> = payees.iter().filter(|p| seen.insert(p.id)).collect();

        if payees.is_empty() {
            return Err(ResolutionError::InvalidState(
                "Cannot submit an empty payee set".to_string(),
            ));
        }
        if payees.len() > self.max_items_per_job {
            return Err(ResolutionError::InvalidState(format!(
                "{} payees exceed the provider cap of {} per job",
                payees.len(),
                self.max_items_per_job
            )));
        }

        let payee_ids: Vec<PayeeId> = payees.iter().map(|p| p.id).collect();
        let key = submission_key(&payee_ids);
        let slot = self.submission_slot(&key);
        let mut current = slot.lock().await;

        if let Some(existing) = current
            .as_ref()
            .filter(|entry| entry.recorded_at.elapsed() < self.submission_ttl)
            .map(|entry| &entry.search)
        {
            if existing.status != SearchStatus::Failed {
                tracing::debug!(
                    request_id = %existing.request_id,
                    status = existing.status.as_str(),
                    "Payee set already submitted, reusing search"
                );
                return Ok(existing.clone());
            }
        }

        let request_id = generate_request_id();
        if !is_valid_identifier(&request_id) {
            return Err(ResolutionError::InvalidState(format!(
                "Generated request id {:?} is not alphanumeric",
                request_id
            )));
        }
        let mut references = BTreeMap::new();
        let mut searches = Vec::with_capacity(payees.len());
        for (position, payee) in payees.iter().enumerate() {
            let reference = item_reference(position);
            if !is_valid_identifier(&reference) {
                return Err(ResolutionError::InvalidState(format!(
                    "Item reference {:?} is not alphanumeric",
                    reference
                )));
            }
            references.insert(reference.clone(), payee.id);
            searches.push(SearchCriteria::for_payee(reference, payee));
        }

        let body = serde_json::to_vec(&BulkSearchRequest {
            search_request_id: &request_id,
            lookup_type: LOOKUP_TYPE,
            maximum_matches: MAXIMUM_MATCHES,
            searches,
        })?;

        let url = format!("{}/bulk-searches", self.base_url);
        let mut search = ExternalSearch {
            request_id,
            search_id: None,
            submission_key: key,
            status: SearchStatus::Submitted,
            submitted_at: Utc::now(),
            last_polled_at: None,
            payee_ids,
            references,
            failure_reason: None,
        };

        let outcome = retry_transient("submit", &self.retry, || {
            self.send_once(HttpMethod::Post, &url, Some(body.clone()))
        })
        .await;

        match outcome {
            Ok(response) => {
                let accepted: SubmitResponse = serde_json::from_slice(&response.body)?;
                search.search_id = Some(accepted.bulk_search_id);
                if let Some(remote) = accepted.status.as_deref() {
                    search.status = self.map_remote_status(remote, &search.request_id);
                }
                tracing::info!(
                    request_id = %search.request_id,
                    search_id = %search.display_id(),
                    items = search.payee_ids.len(),
                    "Bulk search submitted"
                );
            }
            Err(err @ ResolutionError::RetriesExhausted { .. }) => {
                tracing::error!(
                    request_id = %search.request_id,
                    error = %err,
                    "Bulk search submission failed"
                );
                search.mark_failed(err.to_string());
            }
            Err(err) => return Err(err),
        }

        *current = (search.status != SearchStatus::Failed).then(|| Submission::new(search.clone()));
        Ok(search)
    }

    /// Refresh the status of `search`
    ///
    /// Terminal searches are returned unchanged without a request. Transient
    /// failures are retried; when the budget runs out, or the provider refuses
    /// the request, the returned search is FAILED.
    pub async fn poll(&self, search: &ExternalSearch) -> ResolutionResult<ExternalSearch> {
        if search.status.is_terminal() {
            return Ok(search.clone());
        }

        let search_id = search.search_id.as_deref().ok_or_else(|| {
            ResolutionError::InvalidState(format!(
                "Search {} has no provider id to poll",
                search.request_id
            ))
        })?;

        let url = format!("{}/bulk-searches/{}", self.base_url, search_id);
        let outcome = retry_transient("poll", &self.retry, || {
            self.send_once(HttpMethod::Get, &url, None)
        })
        .await
        .and_then(|response| {
            serde_json::from_slice::<StatusResponse>(&response.body).map_err(ResolutionError::from)
        });

        let mut updated = search.clone();
        updated.last_polled_at = Some(Utc::now());

        match outcome {
            Ok(remote) => {
                updated.status = self.map_remote_status(&remote.status, search_id);
                if updated.status == SearchStatus::Failed {
                    updated.failure_reason = Some(format!("Provider reported {}", remote.status));
                }
            }
            Err(err) => {
                tracing::error!(search_id = %search_id, error = %err, "Status poll failed, marking search FAILED");
                updated.mark_failed(err.to_string());
            }
        }

        if updated.status != search.status {
            tracing::info!(
                search_id = %search_id,
                from = search.status.as_str(),
                to = updated.status.as_str(),
                "Bulk search status changed"
            );
        }

        if updated.status.is_terminal() {
            self.remember(&updated).await;
        }

        Ok(updated)
    }

    /// Fetch one window of results of a COMPLETED search
    pub async fn fetch_results(
        &self,
        search: &ExternalSearch,
        offset: usize,
        limit: usize,
    ) -> ResolutionResult<ResultPage> {
        if search.status != SearchStatus::Completed {
            return Err(ResolutionError::InvalidState(format!(
                "Results requested for search {} in state {}",
                search.display_id(),
                search.status.as_str()
            )));
        }
        if limit == 0 {
            return Err(ResolutionError::InvalidState(
                "Result page limit must be positive".to_string(),
            ));
        }
        let search_id = search.search_id.as_deref().ok_or_else(|| {
            ResolutionError::InvalidState(format!(
                "Search {} has no provider id",
                search.request_id
            ))
        })?;

        let url = format!(
            "{}/bulk-searches/{}/results?offset={}&limit={}",
            self.base_url, search_id, offset, limit
        );
        let response = retry_transient("fetch_results", &self.retry, || {
            self.send_once(HttpMethod::Get, &url, None)
        })
        .await?;

        let page: ResultsResponse = serde_json::from_slice(&response.body)?;
        tracing::debug!(
            search_id = %search_id,
            offset,
            limit,
            received = page.items.len(),
            "Fetched result page"
        );

        Ok(ResultPage {
            offset,
            limit,
            total: page.total,
            items: page.items.into_iter().map(ExternalMatchItem::from).collect(),
        })
    }

    /// Fetch every result page of a COMPLETED search, in order
    ///
    /// Stops at the reported total, or at the first short page when the
    /// provider reports none.
    pub async fn drain_results(
        &self,
        search: &ExternalSearch,
    ) -> ResolutionResult<Vec<ExternalMatchItem>> {
        let mut items = Vec::new();
        let mut offset = 0;
        let mut pages = 0;

        loop {
            let page = self.fetch_results(search, offset, self.page_size).await?;
            pages += 1;
            let received = page.items.len();
            offset += received;
            items.extend(page.items);

            let drained = match page.total {
                Some(total) => received == 0 || offset >= total,
                None => received < self.page_size,
            };
            if drained {
                break;
            }
        }

        tracing::info!(
            search_id = %search.display_id(),
            pages,
            items = items.len(),
            "Bulk search results drained"
        );
        Ok(items)
    }

    /// One rate-limited, signed attempt
    async fn send_once(
        &self,
        method: HttpMethod,
        url: &str,
        body: Option<Vec<u8>>,
    ) -> ResolutionResult<ProviderResponse> {
        self.rate_limiter.until_ready().await;

        let authorization = self.signer.authorization_header(method, url, body.as_deref())?;
        let mut headers = vec![
            ("Authorization".to_string(), authorization),
            ("X-Client-Id".to_string(), self.client_id.clone()),
            ("Accept".to_string(), "application/json".to_string()),
        ];
        if body.is_some() {
            headers.push(("Content-Type".to_string(), "application/json".to_string()));
        }

        let response = self
            .transport
            .send(ProviderRequest {
                method,
                url: url.to_string(),
                headers,
                body,
            })
            .await?;

        check_status(response)
    }

    fn map_remote_status(&self, remote: &str, search_id: &str) -> SearchStatus {
        SearchStatus::from_remote(remote).unwrap_or_else(|| {
            tracing::warn!(
                search_id = %search_id,
                remote_status = %remote,
                "Unrecognized provider status, treating as IN_PROGRESS"
            );
            SearchStatus::InProgress
        })
    }

    fn submission_slot(&self, key: &str) -> SubmissionSlot {
        let mut submissions = self
            .submissions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner());
        let ttl = self.submission_ttl;
        submissions.retain(|existing, slot| existing == key || !is_stale(slot, ttl));
        submissions.entry(key.to_string()).or_default().clone()
    }

    #[cfg(test)]
    fn tracked_submissions(&self) -> usize {
        self.submissions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .len()
    }

    /// Record a terminal poll outcome against its submission key
    async fn remember(&self, search: &ExternalSearch) {
        if search.submission_key.is_empty() {
            return;
        }
        let slot = self.submission_slot(&search.submission_key);
        let mut current = slot.lock().await;
        let same_search = current
            .as_ref()
            .map_or(true, |existing| existing.search.request_id == search.request_id);
        if !same_search {
            return;
        }
        *current = match search.status {
            SearchStatus::Failed => None,
            _ => Some(Submission::new(search.clone())),
        };
    }
}

/// Unreferenced slot holding nothing reusable
fn is_stale(slot: &SubmissionSlot, ttl: Duration) -> bool {
    Arc::strong_count(slot) == 1
        && slot.try_lock().map_or(false, |entry| {
            entry
                .as_ref()
                .map_or(true, |entry| entry.recorded_at.elapsed() >= ttl)
        })
}

/// Classify an HTTP response: 2xx passes, 408/429/5xx are transient, the rest are rejections
fn check_status(response: ProviderResponse) -> ResolutionResult<ProviderResponse> {
    let status = response.status;
    match status {
        200..=299 => Ok(response),
        408 | 429 | 500..=599 => {
            let details = ErrorResponse::parse(&response.body);
            Err(ResolutionError::TransientNetwork(format!(
                "HTTP {}: {}",
                status,
                details.message()
            )))
        }
        401 | 403 => Err(ResolutionError::ProviderRejected {
            field: None,
            message: format!("Authentication rejected (HTTP {})", status),
        }),
        _ => {
            let details = ErrorResponse::parse(&response.body);
            Err(ResolutionError::ProviderRejected {
                field: details.field(),
                message: format!("HTTP {}: {}", status, details.message()),
            })
        }
    }
}
