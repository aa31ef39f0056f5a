//! Relevance selection — which context items earn a slot in the prompt.
//!
//! Scores each candidate (a file or resource descriptor) by keyword
//! overlap with the user's request, recency of modification, and
//! capability-tag matches. A freshness adjustment then *penalizes* items
//! the agent has not inspected recently and *strongly rewards* items
//! known to have changed since last inspection — the agent must
//! re-inspect those before mutating them.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

// Scoring weights. Overlap dominates; freshness can override it.
const WEIGHT_OVERLAP: f64 = 0.5;
const WEIGHT_RECENCY: f64 = 0.25;
const WEIGHT_CAPABILITY: f64 = 0.25;
const CHANGED_SINCE_INSPECTION_BOOST: f64 = 0.5;
const STALE_INSPECTION_PENALTY: f64 = 0.15;

/// How long after inspection an item starts counting as stale.
const INSPECTION_STALE_SECS: i64 = 600;

/// Recency half-life: a modification from six hours ago scores half of a
/// fresh one.
const RECENCY_HALF_LIFE_SECS: f64 = 6.0 * 3600.0;

/// A candidate context item offered to the selector.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateItem {
    /// Stable identifier (path, resource name).
    pub id: String,

    /// Keywords describing the item's content.
    pub keywords: Vec<String>,

    /// Capability tags (e.g., "config", "tests", "entrypoint").
    pub capabilities: Vec<String>,

    /// When the item last changed.
    pub modified_at: DateTime<Utc>,

    /// When the agent last inspected it, if ever.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_inspected_at: Option<DateTime<Utc>>,

    /// Whether the item changed after the last inspection.
    #[serde(default)]
    pub changed_since_inspection: bool,
}

/// A scored, selected item with the reason it made the cut.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScoredItem {
    pub id: String,
    pub score: f64,
    pub reason: String,
}

/// The relevance selector. Stateless — create one and reuse it.
pub struct RelevanceSelector {
    top_k: usize,
}

impl RelevanceSelector {
    pub fn new(top_k: usize) -> Self {
        Self { top_k: top_k.max(1) }
    }

    /// Score every candidate against the request and return the top-K,
    /// best first. Deterministic: ties break by id.
    pub fn select(
        &self,
        request: &str,
        candidates: &[CandidateItem],
        now: DateTime<Utc>,
    ) -> Vec<ScoredItem> {
        let request_words = tokenize(request);

        let mut scored: Vec<ScoredItem> = candidates
            .iter()
            .map(|item| Self::score(item, &request_words, now))
            .collect();

        scored.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| a.id.cmp(&b.id))
        });
        scored.truncate(self.top_k);

        debug!(
            selected = scored.len(),
            candidates = candidates.len(),
            "Relevance selection complete"
        );
        scored
    }

    fn score(item: &CandidateItem, request_words: &[String], now: DateTime<Utc>) -> ScoredItem {
        let mut reasons: Vec<String> = Vec::new();

        // Keyword overlap: fraction of request words present in the
        // item's keywords.
        let overlap = if request_words.is_empty() {
            0.0
        } else {
            let hits = request_words
                .iter()
                .filter(|w| item.keywords.iter().any(|k| k.eq_ignore_ascii_case(w)))
                .count();
            hits as f64 / request_words.len() as f64
        };
        if overlap > 0.0 {
            reasons.push(format!("keyword overlap {:.0}%", overlap * 100.0));
        }

        // Recency of modification: exponential falloff.
        let age_secs = now
            .signed_duration_since(item.modified_at)
            .num_seconds()
            .max(0) as f64;
        let recency = 0.5_f64.powf(age_secs / RECENCY_HALF_LIFE_SECS);
        if recency > 0.5 {
            reasons.push("recently modified".into());
        }

        // Capability tags matched against request words.
        let capability = if request_words.is_empty() {
            0.0
        } else {
            let hits = item
                .capabilities
                .iter()
                .filter(|c| request_words.iter().any(|w| c.eq_ignore_ascii_case(w)))
                .count();
            (hits as f64 / item.capabilities.len().max(1) as f64).min(1.0)
        };
        if capability > 0.0 {
            reasons.push("capability match".into());
        }

        let mut score =
            WEIGHT_OVERLAP * overlap + WEIGHT_RECENCY * recency + WEIGHT_CAPABILITY * capability;

        // Freshness adjustment.
        if item.changed_since_inspection {
            score += CHANGED_SINCE_INSPECTION_BOOST;
            reasons.push("changed since last inspection — re-inspect before mutating".into());
        } else {
            let stale = match item.last_inspected_at {
                None => true,
                Some(t) => now.signed_duration_since(t).num_seconds() > INSPECTION_STALE_SECS,
            };
            if stale {
                score = (score - STALE_INSPECTION_PENALTY).max(0.0);
                reasons.push("not recently inspected".into());
            }
        }

        let reason = if reasons.is_empty() {
            "no signal".to_string()
        } else {
            reasons.join("; ")
        };

        ScoredItem {
            id: item.id.clone(),
            score,
            reason,
        }
    }
}

/// Lowercased words of length > 2 — short tokens are noise.
fn tokenize(text: &str) -> Vec<String> {
    text.split(|c: char| !c.is_alphanumeric() && c != '_')
        .filter(|w| w.len() > 2)
        .map(|w| w.to_lowercase())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn item(id: &str, keywords: &[&str]) -> CandidateItem {
        CandidateItem {
            id: id.into(),
            keywords: keywords.iter().map(|s| s.to_string()).collect(),
            capabilities: vec![],
            modified_at: Utc::now(),
            last_inspected_at: Some(Utc::now()),
            changed_since_inspection: false,
        }
    }

    #[test]
    fn keyword_overlap_ranks_first() {
        let selector = RelevanceSelector::new(2);
        let candidates = vec![
            item("docs/notes.md", &["meeting", "notes"]),
            item("src/parser.rs", &["parser", "grammar", "tokens"]),
        ];

        let result = selector.select("fix the parser grammar", &candidates, Utc::now());
        assert_eq!(result[0].id, "src/parser.rs");
        assert!(result[0].score > result[1].score);
        assert!(result[0].reason.contains("keyword overlap"));
    }

    #[test]
    fn changed_since_inspection_strongly_rewarded() {
        let selector = RelevanceSelector::new(2);
        let mut changed = item("src/config.rs", &[]);
        changed.changed_since_inspection = true;
        let unchanged = item("src/other.rs", &[]);

        let result = selector.select("anything", &[unchanged, changed], Utc::now());
        assert_eq!(result[0].id, "src/config.rs");
        assert!(result[0].reason.contains("re-inspect"));
    }

    #[test]
    fn stale_inspection_penalized() {
        let selector = RelevanceSelector::new(2);
        let now = Utc::now();

        let mut stale = item("a.rs", &["parser"]);
        stale.last_inspected_at = Some(now - Duration::hours(2));
        let mut fresh = item("b.rs", &["parser"]);
        fresh.last_inspected_at = Some(now);

        let result = selector.select("parser", &[stale, fresh], now);
        assert_eq!(result[0].id, "b.rs");
        assert!(result[1].reason.contains("not recently inspected"));
    }

    #[test]
    fn never_inspected_counts_as_stale() {
        let selector = RelevanceSelector::new(1);
        let mut never = item("a.rs", &[]);
        never.last_inspected_at = None;

        let result = selector.select("something", &[never], Utc::now());
        assert!(result[0].reason.contains("not recently inspected"));
    }

    #[test]
    fn recency_decays_with_age() {
        let selector = RelevanceSelector::new(2);
        let now = Utc::now();

        let mut old = item("old.rs", &[]);
        old.modified_at = now - Duration::days(7);
        let new = item("new.rs", &[]);

        let result = selector.select("", &[old, new], now);
        assert_eq!(result[0].id, "new.rs");
    }

    #[test]
    fn top_k_bounds_output() {
        let selector = RelevanceSelector::new(2);
        let candidates: Vec<CandidateItem> =
            (0..10).map(|i| item(&format!("f{i}.rs"), &[])).collect();
        assert_eq!(selector.select("x", &candidates, Utc::now()).len(), 2);
    }

    #[test]
    fn deterministic_tie_break_by_id() {
        let selector = RelevanceSelector::new(3);
        let now = Utc::now();
        let mut a = item("aaa.rs", &[]);
        let mut b = item("bbb.rs", &[]);
        a.modified_at = now;
        b.modified_at = now;

        let first = selector.select("x", &[b.clone(), a.clone()], now);
        let second = selector.select("x", &[a, b], now);
        let ids1: Vec<_> = first.iter().map(|s| &s.id).collect();
        let ids2: Vec<_> = second.iter().map(|s| &s.id).collect();
        assert_eq!(ids1, ids2);
    }
}
