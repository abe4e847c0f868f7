//! Immutable supplier index and the matching algorithm
//!
//! Matching tiers, highest first:
//! - EXACT: normalized names are equal (confidence 1.0)
//! - PREFIX: candidate starts with the input followed by a boundary character
//!   (confidence 0.95). "AMAZON" matches "AMAZON CAPITAL SERVICES" but not
//!   "AMAZONAS TRADING".
//! - CONTAINS: input occurs inside the candidate bounded on both sides
//!   (confidence 0.70-0.85 by coverage, times a penalty for single-token input)
//!
//! Ties resolve by confidence, then edit distance to the input, then the
//! candidate's normalized name, then supplier id.

use crate::types::{CachedSupplier, MatchResult, MatchType};
use payee_common::normalize::{is_boundary, normalize_name, tokens};
use std::cmp::Ordering;
use std::collections::HashMap;

/// Confidence assigned to boundary-checked prefix matches
pub const PREFIX_CONFIDENCE: f64 = 0.95;

/// Lower bound of the CONTAINS confidence band
pub const CONTAINS_MIN_CONFIDENCE: f64 = 0.70;

/// Upper bound of the CONTAINS confidence band
pub const CONTAINS_MAX_CONFIDENCE: f64 = 0.85;

/// Multiplier applied to CONTAINS matches of a single-token input
pub const SINGLE_WORD_PENALTY: f64 = 0.8;

/// Read-only index over one supplier snapshot
#[derive(Debug, Default)]
pub struct SupplierIndex {
    suppliers: Vec<CachedSupplier>,
    /// normalized name → supplier positions
    exact: HashMap<String, Vec<usize>>,
    /// first token → supplier positions (prefix candidates)
    first_token: HashMap<String, Vec<usize>>,
    /// every token → supplier positions (contains candidates)
    any_token: HashMap<String, Vec<usize>>,
}

struct Candidate<'a> {
    supplier: &'a CachedSupplier,
    match_type: MatchType,
    confidence: f64,
    distance: usize,
}

impl SupplierIndex {
    /// Build an index; suppliers whose name normalizes to nothing are skipped
    pub fn build(suppliers: Vec<CachedSupplier>) -> Self {
        let suppliers: Vec<CachedSupplier> = suppliers
            .into_iter()
            .map(CachedSupplier::renormalized)
            .filter(|s| !s.normalized_name.is_empty())
            .collect();

        let mut exact: HashMap<String, Vec<usize>> = HashMap::new();
        let mut first_token: HashMap<String, Vec<usize>> = HashMap::new();
        let mut any_token: HashMap<String, Vec<usize>> = HashMap::new();

        for (pos, supplier) in suppliers.iter().enumerate() {
            let name = &supplier.normalized_name;
            exact.entry(name.clone()).or_default().push(pos);

            let mut seen: Vec<&str> = Vec::new();
            for (i, token) in tokens(name).enumerate() {
                if i == 0 {
                    first_token.entry(token.to_string()).or_default().push(pos);
                }
                if !seen.contains(&token) {
                    seen.push(token);
                    any_token.entry(token.to_string()).or_default().push(pos);
                }
            }
        }

        Self {
            suppliers,
            exact,
            first_token,
            any_token,
        }
    }

    pub fn len(&self) -> usize {
        self.suppliers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.suppliers.is_empty()
    }

    pub fn suppliers(&self) -> &[CachedSupplier] {
        &self.suppliers
    }

    /// Look up a raw (un-normalized) payee name
    pub fn lookup(&self, name: &str) -> MatchResult {
        self.lookup_normalized(&normalize_name(name))
    }

    /// Look up an already-normalized name
    pub fn lookup_normalized(&self, input: &str) -> MatchResult {
        if input.is_empty() {
            return MatchResult::none();
        }

        if let Some(positions) = self.exact.get(input) {
            let best = positions
                .iter()
                .map(|&pos| &self.suppliers[pos])
                .min_by(|a, b| {
                    a.payee_name
                        .cmp(&b.payee_name)
                        .then_with(|| a.supplier_id.cmp(&b.supplier_id))
                });
            if let Some(supplier) = best {
                return MatchResult::exact(supplier.clone());
            }
        }

        let input_tokens: Vec<&str> = tokens(input).collect();
        let Some(first) = input_tokens.first() else {
            return MatchResult::none();
        };
        let single_word = input_tokens.len() == 1;

        let mut candidates: Vec<Candidate<'_>> = Vec::new();

        if let Some(positions) = self.first_token.get(*first) {
            for &pos in positions {
                let supplier = &self.suppliers[pos];
                if is_bounded_prefix(&supplier.normalized_name, input) {
                    candidates.push(Candidate {
                        supplier,
                        match_type: MatchType::Prefix,
                        confidence: PREFIX_CONFIDENCE,
                        distance: strsim::levenshtein(input, &supplier.normalized_name),
                    });
                }
            }
        }

        // Every input token must appear as a whole token in a CONTAINS candidate,
        // so the smallest bucket bounds the scan.
        let rarest = input_tokens
            .iter()
            .map(|t| self.any_token.get(*t))
            .collect::<Option<Vec<_>>>()
            .and_then(|buckets| buckets.into_iter().min_by_key(|b| b.len()));

        if let Some(positions) = rarest {
            for &pos in positions {
                let supplier = &self.suppliers[pos];
                if is_bounded_interior(&supplier.normalized_name, input) {
                    candidates.push(Candidate {
                        supplier,
                        match_type: MatchType::Contains,
                        confidence: contains_confidence(input, &supplier.normalized_name, single_word),
                        distance: strsim::levenshtein(input, &supplier.normalized_name),
                    });
                }
            }
        }

        candidates
            .into_iter()
            .min_by(rank)
            .map(|c| MatchResult::fuzzy(c.supplier.clone(), c.match_type, c.confidence))
            .unwrap_or_else(MatchResult::none)
    }
}

fn rank(a: &Candidate<'_>, b: &Candidate<'_>) -> Ordering {
    b.confidence
        .partial_cmp(&a.confidence)
        .unwrap_or(Ordering::Equal)
        .then_with(|| a.distance.cmp(&b.distance))
        .then_with(|| a.supplier.normalized_name.cmp(&b.supplier.normalized_name))
        .then_with(|| a.supplier.supplier_id.cmp(&b.supplier.supplier_id))
}

/// `candidate` starts with `input` and the next character is a boundary
fn is_bounded_prefix(candidate: &str, input: &str) -> bool {
    candidate.len() > input.len()
        && candidate.starts_with(input)
        && candidate[input.len()..].chars().next().is_some_and(is_boundary)
}

/// `input` occurs after position 0 with boundaries on both sides
fn is_bounded_interior(candidate: &str, input: &str) -> bool {
    candidate.match_indices(input).any(|(start, _)| {
        if start == 0 {
            return false;
        }
        let end = start + input.len();
        let before_ok = candidate[..start].chars().next_back().is_some_and(is_boundary);
        let after_ok = end == candidate.len()
            || candidate[end..].chars().next().is_some_and(is_boundary);
        before_ok && after_ok
    })
}

fn contains_confidence(input: &str, candidate: &str, single_word: bool) -> f64 {
    let coverage = input.chars().count() as f64 / candidate.chars().count().max(1) as f64;
    let scaled = CONTAINS_MIN_CONFIDENCE
        + (CONTAINS_MAX_CONFIDENCE - CONTAINS_MIN_CONFIDENCE) * coverage.clamp(0.0, 1.0);
    if single_word {
        scaled * SINGLE_WORD_PENALTY
    } else {
        scaled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn index(names: &[(&str, &str)]) -> SupplierIndex {
        SupplierIndex::build(
            names
                .iter()
                .map(|(id, name)| CachedSupplier::new(*id, *name))
                .collect(),
        )
    }

    #[test]
    fn test_exact_match_full_confidence() {
        let idx = index(&[("1", "Acme, Inc."), ("2", "Acme Tools")]);
        let result = idx.lookup("ACME");
        assert_eq!(result.match_type, MatchType::Exact);
        assert_eq!(result.confidence, 1.0);
        assert_eq!(result.matched_supplier.unwrap().supplier_id, "1");
    }

    #[test]
    fn test_prefix_requires_boundary() {
        let idx = index(&[("1", "Amazon Capital Services"), ("2", "Amazonas Trading")]);
        let result = idx.lookup("Amazon");
        assert_eq!(result.match_type, MatchType::Prefix);
        assert_eq!(result.confidence, PREFIX_CONFIDENCE);
        assert_eq!(result.matched_supplier.unwrap().supplier_id, "1");

        let only_amazonas = index(&[("2", "Amazonas Trading")]);
        assert_eq!(only_amazonas.lookup("AMAZON").match_type, MatchType::None);
    }

    #[test]
    fn test_prefix_accepts_punctuation_boundary() {
        let idx = index(&[("1", "amazon.com services")]);
        let result = idx.lookup("amazon");
        assert_eq!(result.match_type, MatchType::Prefix);
    }

    #[test]
    fn test_contains_is_bounded_on_both_sides() {
        let idx = index(&[("1", "First National Bank of Omaha")]);
        let hit = idx.lookup("National Bank");
        assert_eq!(hit.match_type, MatchType::Contains);
        assert!(hit.confidence >= CONTAINS_MIN_CONFIDENCE && hit.confidence <= CONTAINS_MAX_CONFIDENCE);

        let idx = index(&[("1", "International Banking Group")]);
        assert_eq!(idx.lookup("National Bank").match_type, MatchType::None);
    }

    #[test]
    fn test_single_word_contains_is_penalized_below_prefix() {
        let idx = index(&[("1", "Bank of the Ozarks")]);
        let hit = idx.lookup("Ozarks");
        assert_eq!(hit.match_type, MatchType::Contains);
        assert!(hit.confidence < CONTAINS_MIN_CONFIDENCE);
        assert!(hit.confidence < PREFIX_CONFIDENCE);
    }

    #[test]
    fn test_prefix_beats_contains() {
        let idx = index(&[("1", "Global Acme Holdings"), ("2", "Acme Global Holdings")]);
        let hit = idx.lookup("Acme Global");
        assert_eq!(hit.match_type, MatchType::Prefix);
        assert_eq!(hit.matched_supplier.unwrap().supplier_id, "2");
    }

    #[test]
    fn test_tie_break_prefers_shorter_edit_distance_then_lexical() {
        let idx = index(&[
            ("1", "Delta Supply Company of the Greater Northwest"),
            ("2", "Delta Supply West"),
            ("3", "Delta Supply East"),
        ]);
        let hit = idx.lookup("Delta Supply");
        assert_eq!(hit.match_type, MatchType::Prefix);
        // "EAST" and "WEST" are equally distant; lexical order decides
        assert_eq!(hit.matched_supplier.unwrap().supplier_id, "3");
    }

    #[test]
    fn test_deterministic_across_builds() {
        let names = [("a", "Metro Cleaning North"), ("b", "Metro Cleaning South"), ("c", "Metro Cleaning Eastside")];
        let first = index(&names).lookup("Metro Cleaning");
        let mut reversed = names;
        reversed.reverse();
        let second = index(&reversed).lookup("Metro Cleaning");
        assert_eq!(first, second);
    }

    #[test]
    fn test_empty_input_is_none() {
        let idx = index(&[("1", "Acme")]);
        assert_eq!(idx.lookup("  ").match_type, MatchType::None);
        assert_eq!(idx.lookup("!!!").match_type, MatchType::None);
    }

    #[test]
    fn test_unknown_token_is_none() {
        let idx = index(&[("1", "Acme Tools")]);
        assert_eq!(idx.lookup("Zenith").match_type, MatchType::None);
    }

    #[test]
    fn test_blank_suppliers_skipped() {
        let idx = index(&[("1", "   "), ("2", "Acme")]);
        assert_eq!(idx.len(), 1);
    }
}
