//! Bulk search provider integration
//!
//! Signed submit/poll/paginate against the provider's bulk search API.

pub mod client;
pub mod request_id;
pub mod retry;
pub mod signer;
pub mod transport;
mod wire;

pub use client::BulkSearchClient;
pub use request_id::{generate_request_id, is_valid_identifier, item_reference, submission_key};
pub use retry::{retry_transient, RetryPolicy};
pub use signer::OAuthSigner;
pub use transport::{HttpMethod, ProviderRequest, ProviderResponse, ReqwestTransport, SearchTransport};
