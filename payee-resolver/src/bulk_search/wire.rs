//! Provider request and response bodies

use crate::types::{EntityDetails, ExternalMatchItem, PayeeAddress, PayeeRecord};
use serde::{Deserialize, Serialize};

// ============================================================================
// Requests
// ============================================================================

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct BulkSearchRequest<'a> {
    pub search_request_id: &'a str,
    pub lookup_type: &'static str,
    pub maximum_matches: u32,
    pub searches: Vec<SearchCriteria<'a>>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SearchCriteria<'a> {
    pub search_request_id: String,
    pub business_name: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub business_address: Option<WireAddress>,
}

impl<'a> SearchCriteria<'a> {
    /// Criteria for one payee; the cleaned name is sent, the original kept locally
    pub fn for_payee(reference: String, payee: &'a PayeeRecord) -> Self {
        Self {
            search_request_id: reference,
            business_name: &payee.cleaned_name,
            business_address: payee.address.as_ref().map(WireAddress::from),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireAddress {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address_line1: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub town_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_subdivision: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub post_code: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub country_code: Option<String>,
}

impl From<&PayeeAddress> for WireAddress {
    fn from(address: &PayeeAddress) -> Self {
        Self {
            address_line1: address.line1.clone(),
            town_name: address.city.clone(),
            country_subdivision: address.state.clone(),
            post_code: address.postal_code.clone(),
            country_code: address.country.clone(),
        }
    }
}

impl From<WireAddress> for PayeeAddress {
    fn from(address: WireAddress) -> Self {
        Self {
            line1: address.address_line1,
            city: address.town_name,
            state: address.country_subdivision,
            postal_code: address.post_code,
            country: address.country_code,
        }
    }
}

// ============================================================================
// Responses
// ============================================================================

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct SubmitResponse {
    pub bulk_search_id: String,
    #[serde(default)]
    pub status: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct StatusResponse {
    pub status: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct ResultsResponse {
    #[serde(default)]
    pub items: Vec<WireResultItem>,
    #[serde(default)]
    pub total: Option<usize>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireResultItem {
    pub search_request_id: String,
    #[serde(default)]
    pub match_confidence: f64,
    #[serde(default)]
    pub entity_details: WireEntityDetails,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireEntityDetails {
    pub business_name: Option<String>,
    pub tax_id: Option<String>,
    pub address: Option<WireAddress>,
    pub phone_number: Option<String>,
    pub category_code: Option<String>,
}

impl From<WireResultItem> for ExternalMatchItem {
    fn from(item: WireResultItem) -> Self {
        let details = item.entity_details;
        Self {
            reference_id: item.search_request_id,
            confidence: item.match_confidence.clamp(0.0, 1.0),
            entity: EntityDetails {
                business_name: details.business_name,
                tax_id: details.tax_id,
                address: details.address.map(PayeeAddress::from),
                phone: details.phone_number,
                category_code: details.category_code,
            },
        }
    }
}

/// Provider error envelope: `{"errors":[{"source":"field","description":"..."}]}`
#[derive(Debug, Default, Deserialize)]
pub(crate) struct ErrorResponse {
    #[serde(default)]
    pub errors: Vec<WireError>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub(crate) struct WireError {
    #[serde(default)]
    pub source: Option<String>,
    #[serde(default)]
    pub reason_code: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

impl ErrorResponse {
    /// Parse an error body; unparseable bodies become a single description
    pub fn parse(body: &[u8]) -> Self {
        serde_json::from_slice(body).unwrap_or_else(|_| {
            let text = String::from_utf8_lossy(body).trim().to_string();
            ErrorResponse {
                errors: vec![WireError {
                    source: None,
                    reason_code: None,
                    description: (!text.is_empty()).then_some(text),
                }],
            }
        })
    }

    /// Field reported by the first error that names one
    pub fn field(&self) -> Option<String> {
        self.errors.iter().find_map(|e| e.source.clone())
    }

    pub fn message(&self) -> String {
        let parts: Vec<String> = self
            .errors
            .iter()
            .filter_map(|e| match (&e.reason_code, &e.description) {
                (Some(code), Some(desc)) => Some(format!("{}: {}", code, desc)),
                (Some(code), None) => Some(code.clone()),
                (None, Some(desc)) => Some(desc.clone()),
                (None, None) => None,
            })
            .collect();
        if parts.is_empty() {
            "no error details".to_string()
        } else {
            parts.join("; ")
        }
    }
}
