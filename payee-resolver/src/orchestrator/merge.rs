//! Signal merging
//!
//! Entity identity comes from the first signal in precedence order that
//! clears its own floor. The AI label always supplies the payee type unless
//! an accepted external match beats the AI confidence by the override margin.

use crate::config::ResolutionSettings;
use crate::error::{ResolutionError, ResolutionResult};
use crate::types::{
    AiClassification, BatchId, Classification, ExternalMatchItem, ExternalMatchStatus, MatchResult,
    PayeeRecord, PayeeType, SignalSource,
};
use chrono::Utc;
use regex::Regex;

/// External search outcome for one payee
#[derive(Debug, Clone, PartialEq)]
pub struct ExternalSignal {
    pub status: ExternalMatchStatus,
    pub item: Option<ExternalMatchItem>,
    /// Request id of the search, when the outcome is the search's own
    pub request_id: Option<String>,
}

impl ExternalSignal {
    pub fn not_required() -> Self {
        Self {
            status: ExternalMatchStatus::NotRequired,
            item: None,
            request_id: None,
        }
    }

    /// Outcome of a drained search: MATCHED with an item, NO_MATCH without
    pub fn drained(request_id: &str, item: Option<ExternalMatchItem>) -> Self {
        let status = if item.is_some() {
            ExternalMatchStatus::Matched
        } else {
            ExternalMatchStatus::NoMatch
        };
        Self {
            status,
            item,
            request_id: Some(request_id.to_string()),
        }
    }

    pub fn failed(request_id: Option<&str>) -> Self {
        Self {
            status: ExternalMatchStatus::Failed,
            item: None,
            request_id: request_id.map(str::to_string),
        }
    }

    /// Batch-local: the search may still finish for another batch
    pub fn abandoned() -> Self {
        Self {
            status: ExternalMatchStatus::Abandoned,
            item: None,
            request_id: None,
        }
    }
}

/// Every signal gathered for one payee
#[derive(Debug, Clone)]
pub struct PayeeSignals<'a> {
    pub batch_id: BatchId,
    pub payee: &'a PayeeRecord,
    pub ai: AiClassification,
    pub cache_match: MatchResult,
    pub external: ExternalSignal,
}

/// Thresholds, precedence and denylist applied when merging
#[derive(Debug, Clone)]
pub struct MergePolicy {
    precedence: Vec<SignalSource>,
    external_acceptance_threshold: f64,
    cache_floor: f64,
    ai_floor: f64,
    type_override_margin: f64,
    denylist: Vec<Regex>,
}

impl MergePolicy {
    pub fn from_settings(settings: &ResolutionSettings) -> ResolutionResult<Self> {
        let denylist = settings
            .denylist_patterns
            .iter()
            .map(|pattern| {
                Regex::new(pattern).map_err(|e| {
                    ResolutionError::Config(format!("Invalid denylist pattern {:?}: {}", pattern, e))
                })
            })
            .collect::<ResolutionResult<Vec<_>>>()?;

        Ok(Self {
            precedence: settings.precedence.clone(),
            external_acceptance_threshold: settings.external_acceptance_threshold,
            cache_floor: settings.cache_floor,
            ai_floor: settings.ai_floor,
            type_override_margin: settings.type_override_margin,
            denylist,
        })
    }

    /// First denylist pattern matching the normalized name
    pub fn denylisted(&self, normalized_name: &str) -> Option<&str> {
        self.denylist
            .iter()
            .find(|re| re.is_match(normalized_name))
            .map(|re| re.as_str())
    }

    fn accepts(&self, source: SignalSource, signals: &PayeeSignals<'_>) -> Option<(Option<String>, f64)> {
        match source {
            SignalSource::External => {
                let item = signals.external.item.as_ref()?;
                (signals.external.status == ExternalMatchStatus::Matched
                    && item.confidence >= self.external_acceptance_threshold)
                    .then(|| (item.entity.business_name.clone(), item.confidence))
            }
            SignalSource::Cache => {
                let cache = &signals.cache_match;
                let supplier = cache.matched_supplier.as_ref()?;
                (cache.confidence >= self.cache_floor)
                    .then(|| (Some(supplier.payee_name.clone()), cache.confidence))
            }
            SignalSource::Ai => {
                let ai = &signals.ai;
                (ai.payee_type != PayeeType::Unknown && ai.confidence >= self.ai_floor)
                    .then_some((None, ai.confidence))
            }
        }
    }

    /// Build the classification for one payee
    pub fn merge(&self, signals: PayeeSignals<'_>) -> Classification {
        let identity = self
            .precedence
            .iter()
            .find_map(|&source| self.accepts(source, &signals).map(|(name, conf)| (source, name, conf)));

        let external_confidence = signals.external.item.as_ref().map(|item| item.confidence);

        let (identity_source, matched_name, confidence) = match identity {
            Some((source, name, confidence)) => (Some(source), name, confidence),
            None => {
                let strongest = [
                    Some(signals.ai.confidence),
                    Some(signals.cache_match.confidence),
                    external_confidence,
                ]
                .into_iter()
                .flatten()
                .fold(0.0_f64, f64::max);
                (None, None, strongest)
            }
        };

        let payee_type = self.payee_type(&signals);

        let (is_excluded, exclusion_reason) =
            match self.denylisted(&signals.payee.cleaned_name) {
                Some(pattern) => (true, Some(format!("Matches denylist pattern {}", pattern))),
                None if identity_source.is_none() => (
                    true,
                    Some("No signal cleared its confidence floor".to_string()),
                ),
                None => (false, None),
            };

        Classification {
            batch_id: signals.batch_id,
            payee_id: signals.payee.id,
            original_name: signals.payee.original_name.clone(),
            cleaned_name: signals.payee.cleaned_name.clone(),
            payee_type,
            ai_confidence: signals.ai.confidence,
            ai_reasoning: signals.ai.reasoning,
            cache_match: signals.cache_match,
            external_match_status: signals.external.status,
            external_match_confidence: external_confidence,
            external_match: signals.external.item,
            external_search_id: signals.external.request_id,
            identity_source,
            matched_name,
            confidence,
            is_excluded,
            exclusion_reason,
            revision: 0,
            created_at: Utc::now(),
        }
    }

    /// AI type, unless an accepted external business match outweighs it
    fn payee_type(&self, signals: &PayeeSignals<'_>) -> PayeeType {
        let ai = &signals.ai;
        let external = signals.external.item.as_ref().filter(|item| {
            signals.external.status == ExternalMatchStatus::Matched
                && item.confidence >= self.external_acceptance_threshold
        });

        match external {
            Some(item)
                if ai.payee_type != PayeeType::Business
                    && (ai.payee_type == PayeeType::Unknown
                        || item.confidence >= ai.confidence + self.type_override_margin) =>
            {
                PayeeType::Business
            }
            _ => ai.payee_type,
        }
    }
}
