//! HTTP transport seam for the bulk search provider
//!
//! The client signs and interprets requests; a transport only moves bytes.
//! Connection failures and timeouts surface as `TransientNetwork` so the
//! client's retry loop can decide what to do with them.

use crate::error::{ResolutionError, ResolutionResult};
use async_trait::async_trait;
use std::time::Duration;

/// HTTP methods used by the provider protocol
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
}

impl HttpMethod {
    pub fn as_str(self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
        }
    }
}

/// Fully signed request ready to send
#[derive(Debug, Clone)]
pub struct ProviderRequest {
    pub method: HttpMethod,
    pub url: String,
    pub headers: Vec<(String, String)>,
    pub body: Option<Vec<u8>>,
}

impl ProviderRequest {
    /// First header value with the given name (case-insensitive)
    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(name))
            .map(|(_, v)| v.as_str())
    }
}

/// Raw provider response
#[derive(Debug, Clone)]
pub struct ProviderResponse {
    pub status: u16,
    pub body: Vec<u8>,
}

impl ProviderResponse {
    pub fn json(status: u16, value: &serde_json::Value) -> Self {
        Self {
            status,
            body: value.to_string().into_bytes(),
        }
    }
}

/// Moves signed requests to the provider
#[async_trait]
pub trait SearchTransport: Send + Sync {
    async fn send(&self, request: ProviderRequest) -> ResolutionResult<ProviderResponse>;
}

/// `reqwest`-backed transport
pub struct ReqwestTransport {
    http_client: reqwest::Client,
}

impl ReqwestTransport {
    pub fn new(timeout: Duration, user_agent: &str) -> ResolutionResult<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(user_agent)
            .timeout(timeout)
            .connect_timeout(Duration::from_secs(5))
            .build()
            .map_err(|e| ResolutionError::Config(format!("Failed to build HTTP client: {}", e)))?;

        Ok(Self { http_client })
    }
}

#[async_trait]
impl SearchTransport for ReqwestTransport {
    async fn send(&self, request: ProviderRequest) -> ResolutionResult<ProviderResponse> {
        let mut builder = match request.method {
            HttpMethod::Get => self.http_client.get(&request.url),
            HttpMethod::Post => self.http_client.post(&request.url),
        };
        for (name, value) in &request.headers {
            builder = builder.header(name.as_str(), value.as_str());
        }
        if let Some(body) = request.body {
            builder = builder.body(body);
        }

        let response = builder.send().await.map_err(|e| {
            ResolutionError::TransientNetwork(format!(
                "{} {} failed: {}",
                request.method.as_str(),
                request.url,
                e
            ))
        })?;

        let status = response.status().as_u16();
        let body = response
            .bytes()
            .await
            .map_err(|e| ResolutionError::TransientNetwork(format!("Reading response body failed: {}", e)))?
            .to_vec();

        Ok(ProviderResponse { status, body })
    }
}
