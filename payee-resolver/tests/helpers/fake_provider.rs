//! In-memory bulk search provider
//!
//! Speaks the provider's wire format over the `SearchTransport` seam and
//! checks every request the way the real provider does: signed header,
//! client id, no body hash on GET, alphanumeric request ids.

use async_trait::async_trait;
use payee_resolver::bulk_search::{HttpMethod, ProviderRequest, ProviderResponse, SearchTransport};
use payee_resolver::ResolutionResult;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Copy)]
pub enum Completion {
    /// COMPLETED on the n-th status poll
    AfterPolls(u32),
    /// IN_PROGRESS forever
    Never,
}

struct FakeSearch {
    items: Vec<Value>,
    polls: u32,
    fail: bool,
}

#[derive(Default)]
struct FakeState {
    searches: HashMap<String, FakeSearch>,
    submits: usize,
    status_polls: usize,
    /// (search id, offset, limit) per results request
    result_fetches: Vec<(String, usize, usize)>,
    violations: Vec<String>,
}

pub struct FakeProvider {
    /// Cleaned business name → (entity name, confidence)
    directory: HashMap<String, (String, f64)>,
    completion: Completion,
    /// Number of searches (in submission order) reported FAILED
    fail_first: usize,
    /// Latency before a submission is accepted
    submit_delay: Duration,
    /// Latency of each results page, after it is recorded
    result_delay: Duration,
    state: Mutex<FakeState>,
}

impl FakeProvider {
    pub fn new() -> Self {
        Self {
            directory: HashMap::new(),
            completion: Completion::AfterPolls(2),
            fail_first: 0,
            submit_delay: Duration::ZERO,
            result_delay: Duration::ZERO,
            state: Mutex::new(FakeState::default()),
        }
    }

    pub fn with_match(mut self, cleaned_name: &str, entity_name: &str, confidence: f64) -> Self {
        self.directory
            .insert(cleaned_name.to_string(), (entity_name.to_string(), confidence));
        self
    }

    pub fn completing(mut self, completion: Completion) -> Self {
        self.completion = completion;
        self
    }

    pub fn failing_first(mut self, searches: usize) -> Self {
        self.fail_first = searches;
        self
    }

    pub fn slow_submissions(mut self, delay: Duration) -> Self {
        self.submit_delay = delay;
        self
    }

    pub fn slow_results(mut self, delay: Duration) -> Self {
        self.result_delay = delay;
        self
    }

    pub fn submit_count(&self) -> usize {
        self.state.lock().unwrap().submits
    }

    pub fn status_polls(&self) -> usize {
        self.state.lock().unwrap().status_polls
    }

    pub fn result_fetches(&self) -> Vec<(String, usize, usize)> {
        self.state.lock().unwrap().result_fetches.clone()
    }

    pub fn violations(&self) -> Vec<String> {
        self.state.lock().unwrap().violations.clone()
    }

    fn check_headers(&self, request: &ProviderRequest, state: &mut FakeState) {
        let auth = request.header("Authorization").unwrap_or_default();
        if !auth.starts_with("OAuth ") || !auth.contains("oauth_signature=") {
            state.violations.push(format!("unsigned request to {}", request.url));
        }
        if request.header("X-Client-Id").is_none() {
            state.violations.push(format!("missing client id on {}", request.url));
        }
        match request.method {
            HttpMethod::Get if auth.contains("oauth_body_hash") => {
                state.violations.push(format!("body hash on GET {}", request.url));
            }
            HttpMethod::Post if !auth.contains("oauth_body_hash") => {
                state.violations.push(format!("no body hash on POST {}", request.url));
            }
            _ => {}
        }
    }

    fn submit(&self, body: &[u8], state: &mut FakeState) -> ProviderResponse {
        let request: Value = match serde_json::from_slice(body) {
            Ok(v) => v,
            Err(_) => return error(400, "body", "malformed JSON"),
        };
        let request_id = request["searchRequestId"].as_str().unwrap_or_default();
        if request_id.is_empty() || !request_id.chars().all(|c| c.is_ascii_alphanumeric()) {
            return error(400, "searchRequestId", "must be alphanumeric");
        }

        let items = request["searches"]
            .as_array()
            .cloned()
            .unwrap_or_default()
            .iter()
            .filter_map(|search| {
                let reference = search["searchRequestId"].as_str()?;
                let name = search["businessName"].as_str()?;
                let (entity, confidence) = self.directory.get(name)?;
                Some(json!({
                    "searchRequestId": reference,
                    "matchConfidence": confidence,
                    "entityDetails": {
                        "businessName": entity,
                        "taxId": "00-0000000",
                        "categoryCode": "5999"
                    }
                }))
            })
            .collect();

        let fail = state.submits < self.fail_first;
        state.submits += 1;
        let search_id = format!("BS{}", state.submits);
        state.searches.insert(
            search_id.clone(),
            FakeSearch {
                items,
                polls: 0,
                fail,
            },
        );

        ProviderResponse::json(202, &json!({"bulkSearchId": search_id, "status": "PENDING"}))
    }

    fn status(&self, search_id: &str, state: &mut FakeState) -> ProviderResponse {
        state.status_polls += 1;
        let completion = self.completion;
        let Some(search) = state.searches.get_mut(search_id) else {
            return error(404, "bulkSearchId", "unknown search");
        };
        search.polls += 1;

        let status = if search.fail {
            "FAILED"
        } else {
            match completion {
                Completion::AfterPolls(n) if search.polls >= n => "COMPLETED",
                _ => "IN_PROGRESS",
            }
        };
        ProviderResponse::json(200, &json!({"status": status}))
    }

    fn results(&self, search_id: &str, url: &Url, state: &mut FakeState) -> ProviderResponse {
        let query: HashMap<String, String> = url.query_pairs().into_owned().collect();
        let offset: usize = query.get("offset").and_then(|v| v.parse().ok()).unwrap_or(0);
        let limit: usize = query.get("limit").and_then(|v| v.parse().ok()).unwrap_or(25);
        state
            .result_fetches
            .push((search_id.to_string(), offset, limit));

        let Some(search) = state.searches.get(search_id) else {
            return error(404, "bulkSearchId", "unknown search");
        };
        let page: Vec<Value> = search.items.iter().skip(offset).take(limit).cloned().collect();
        ProviderResponse::json(200, &json!({"items": page, "total": search.items.len()}))
    }
}

impl Default for FakeProvider {
    fn default() -> Self {
        Self::new()
    }
}

fn error(status: u16, field: &str, description: &str) -> ProviderResponse {
    ProviderResponse::json(
        status,
        &json!({"errors": [{"source": field, "reasonCode": "INVALID", "description": description}]}),
    )
}

#[async_trait]
impl SearchTransport for FakeProvider {
    async fn send(&self, request: ProviderRequest) -> ResolutionResult<ProviderResponse> {
        // A submission dropped while waiting here never reaches the provider
        if request.method == HttpMethod::Post && !self.submit_delay.is_zero() {
            tokio::time::sleep(self.submit_delay).await;
        }

        let url = Url::parse(&request.url).unwrap();
        let (response, delay) = {
            let mut state = self.state.lock().unwrap();
            self.check_headers(&request, &mut state);

            let segments: Vec<&str> = url.path_segments().map(|s| s.collect()).unwrap_or_default();
            let route = segments
                .iter()
                .position(|s| *s == "bulk-searches")
                .map(|i| &segments[i + 1..])
                .unwrap_or(&[]);

            match (request.method, route) {
                (HttpMethod::Post, []) => (
                    self.submit(request.body.as_deref().unwrap_or_default(), &mut state),
                    Duration::ZERO,
                ),
                (HttpMethod::Get, [id]) => (self.status(id, &mut state), Duration::ZERO),
                (HttpMethod::Get, [id, "results"]) => {
                    (self.results(id, &url, &mut state), self.result_delay)
                }
                _ => (error(404, "path", "no such route"), Duration::ZERO),
            }
        };

        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        Ok(response)
    }
}
