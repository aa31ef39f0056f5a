//! Tiered working memory with exponential relevance decay.
//!
//! Three tiers:
//!
//! - **Critical** — the active goal and key decisions. Never decays,
//!   never evicted. Cleared only when the task completes.
//! - **Working** — recent observations and tool results. Relevance
//!   decays as `base × 0.5^(elapsed / half_life)` measured from the last
//!   access; items under the floor sink to Background when the tier is
//!   over capacity.
//! - **Background** — truncated summaries of evicted items, kept for
//!   recall rather than prompt injection.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;
use uuid::Uuid;

/// How much of an evicted item's content survives in its background
/// summary.
const BACKGROUND_SUMMARY_CHARS: usize = 160;

/// The three memory tiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MemoryTier {
    Critical,
    Working,
    Background,
}

/// One remembered item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryItem {
    /// Unique item ID.
    pub id: String,

    /// What kind of thing this is ("goal", "decision", "observation",
    /// "tool_result", ...).
    pub kind: String,

    /// One-line summary.
    pub summary: String,

    /// Full content (empty once demoted to background).
    pub content: String,

    /// Relevance at the last access.
    pub base_relevance: f64,

    /// When the item was added.
    pub added_at: DateTime<Utc>,

    /// When the item was last accessed — the decay origin.
    pub last_accessed_at: DateTime<Utc>,
}

impl MemoryItem {
    pub fn new(kind: &str, summary: impl Into<String>, content: impl Into<String>, relevance: f64) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4().to_string(),
            kind: kind.into(),
            summary: summary.into(),
            content: content.into(),
            base_relevance: relevance.clamp(0.0, 1.0),
            added_at: now,
            last_accessed_at: now,
        }
    }
}

/// The tiered store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkingMemory {
    capacity: usize,
    half_life_secs: f64,
    floor: f64,
    critical: Vec<MemoryItem>,
    working: Vec<MemoryItem>,
    background: Vec<MemoryItem>,
}

impl WorkingMemory {
    /// Create a store with the given working-tier capacity, decay
    /// half-life, and eviction floor.
    pub fn new(capacity: usize, half_life_secs: u64, floor: f64) -> Self {
        Self {
            capacity: capacity.max(1),
            half_life_secs: half_life_secs.max(1) as f64,
            floor,
            critical: Vec::new(),
            working: Vec::new(),
            background: Vec::new(),
        }
    }

    pub fn from_config(config: &tiller_config::ContextConfig) -> Self {
        Self::new(
            config.working_capacity,
            config.half_life_secs,
            config.relevance_floor,
        )
    }

    // ── Insertion ──

    /// Add an item to the critical tier (active goal, key decisions).
    pub fn add_critical(&mut self, item: MemoryItem) {
        self.critical.push(item);
    }

    /// Add an item to the working tier, then run maintenance.
    pub fn add_working(&mut self, item: MemoryItem, now: DateTime<Utc>) {
        self.working.push(item);
        self.maintain(now);
    }

    // ── Relevance ──

    /// An item's decayed relevance at `now`.
    ///
    /// Critical items are always 1.0; background items keep their last
    /// working-tier value frozen.
    pub fn relevance_of(&self, id: &str, now: DateTime<Utc>) -> Option<f64> {
        if self.critical.iter().any(|i| i.id == id) {
            return Some(1.0);
        }
        if let Some(item) = self.working.iter().find(|i| i.id == id) {
            return Some(self.decayed(item, now));
        }
        self.background
            .iter()
            .find(|i| i.id == id)
            .map(|i| i.base_relevance)
    }

    fn decayed(&self, item: &MemoryItem, now: DateTime<Utc>) -> f64 {
        let elapsed = now
            .signed_duration_since(item.last_accessed_at)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0;
        item.base_relevance * 0.5_f64.powf(elapsed / self.half_life_secs)
    }

    /// Access a working-tier item: refreshes its decay origin so the next
    /// decay sample starts from the current base again. Returns the item.
    pub fn access(&mut self, id: &str, now: DateTime<Utc>) -> Option<&MemoryItem> {
        let item = self.working.iter_mut().find(|i| i.id == id)?;
        item.last_accessed_at = now;
        Some(item)
    }

    // ── Maintenance ──

    /// Evict working items under the floor into the background tier once
    /// the tier exceeds capacity. If the tier is still over capacity
    /// after that, the lowest-relevance items sink next.
    pub fn maintain(&mut self, now: DateTime<Utc>) {
        if self.working.len() <= self.capacity {
            return;
        }

        let floor = self.floor;
        let mut keep: Vec<MemoryItem> = Vec::with_capacity(self.working.len());
        let mut evicted: Vec<MemoryItem> = Vec::new();

        for item in self.working.drain(..) {
            let relevance = item.base_relevance
                * 0.5_f64.powf(
                    now.signed_duration_since(item.last_accessed_at)
                        .num_milliseconds()
                        .max(0) as f64
                        / 1000.0
                        / self.half_life_secs,
                );
            if relevance < floor {
                evicted.push(Self::demote(item, relevance));
            } else {
                keep.push(item);
            }
        }

        // Still over capacity: lowest decayed relevance goes next.
        if keep.len() > self.capacity {
            keep.sort_by(|a, b| {
                let ra = self.decay_raw(a, now);
                let rb = self.decay_raw(b, now);
                rb.partial_cmp(&ra).unwrap_or(std::cmp::Ordering::Equal)
            });
            while keep.len() > self.capacity {
                let Some(item) = keep.pop() else { break };
                let relevance = self.decay_raw(&item, now);
                evicted.push(Self::demote(item, relevance));
            }
        }

        if !evicted.is_empty() {
            debug!(evicted = evicted.len(), "Working memory eviction");
        }
        self.working = keep;
        self.background.extend(evicted);
    }

    fn decay_raw(&self, item: &MemoryItem, now: DateTime<Utc>) -> f64 {
        let elapsed = now
            .signed_duration_since(item.last_accessed_at)
            .num_milliseconds()
            .max(0) as f64
            / 1000.0;
        item.base_relevance * 0.5_f64.powf(elapsed / self.half_life_secs)
    }

    /// Demotion truncates content into the summary and freezes relevance.
    fn demote(mut item: MemoryItem, relevance_at_eviction: f64) -> MemoryItem {
        if item.summary.is_empty() {
            item.summary = item.content.chars().take(BACKGROUND_SUMMARY_CHARS).collect();
        } else {
            item.summary = item.summary.chars().take(BACKGROUND_SUMMARY_CHARS).collect();
        }
        item.content.clear();
        item.base_relevance = relevance_at_eviction;
        item
    }

    // ── Rendering ──

    /// Render critical items plus the liveliest working items as a text
    /// section for prompt injection, most relevant first.
    pub fn render(&self, now: DateTime<Utc>, max_items: usize) -> String {
        let mut out = String::new();

        if !self.critical.is_empty() {
            out.push_str("## Active Goal & Decisions\n");
            for item in &self.critical {
                out.push_str(&format!("- [{}] {}\n", item.kind, item.summary));
            }
        }

        if !self.working.is_empty() {
            let mut ranked: Vec<(&MemoryItem, f64)> = self
                .working
                .iter()
                .map(|i| (i, self.decayed(i, now)))
                .collect();
            ranked.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));

            out.push_str("## Recent Context\n");
            for (item, relevance) in ranked.into_iter().take(max_items) {
                out.push_str(&format!(
                    "- [{} r={relevance:.2}] {}\n",
                    item.kind, item.summary
                ));
            }
        }

        out
    }

    // ── Scope resets ──

    /// Task-scope reset: clears critical and working tiers, keeps the
    /// background tier for the rest of the session.
    pub fn clear_task(&mut self) {
        self.critical.clear();
        self.working.clear();
    }

    /// Session-scope reset: clears everything.
    pub fn clear_all(&mut self) {
        self.critical.clear();
        self.working.clear();
        self.background.clear();
    }

    // ── Introspection ──

    pub fn tier_len(&self, tier: MemoryTier) -> usize {
        match tier {
            MemoryTier::Critical => self.critical.len(),
            MemoryTier::Working => self.working.len(),
            MemoryTier::Background => self.background.len(),
        }
    }

    pub fn tier_of(&self, id: &str) -> Option<MemoryTier> {
        if self.critical.iter().any(|i| i.id == id) {
            Some(MemoryTier::Critical)
        } else if self.working.iter().any(|i| i.id == id) {
            Some(MemoryTier::Working)
        } else if self.background.iter().any(|i| i.id == id) {
            Some(MemoryTier::Background)
        } else {
            None
        }
    }
}

impl Default for WorkingMemory {
    fn default() -> Self {
        Self::new(50, 300, 0.15)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn store() -> WorkingMemory {
        // 10-second half-life keeps the math easy
        WorkingMemory::new(3, 10, 0.2)
    }

    #[test]
    fn decay_halves_per_half_life() {
        let mut wm = store();
        let item = MemoryItem::new("observation", "saw a thing", "details", 0.8);
        let id = item.id.clone();
        let added = item.last_accessed_at;
        wm.add_working(item, added);

        let r0 = wm.relevance_of(&id, added).unwrap();
        assert!((r0 - 0.8).abs() < 1e-9);

        let r1 = wm.relevance_of(&id, added + Duration::seconds(10)).unwrap();
        assert!((r1 - 0.4).abs() < 1e-6);

        let r2 = wm.relevance_of(&id, added + Duration::seconds(20)).unwrap();
        assert!((r2 - 0.2).abs() < 1e-6);
    }

    #[test]
    fn relevance_non_increasing_between_accesses() {
        let mut wm = store();
        let item = MemoryItem::new("observation", "s", "c", 1.0);
        let id = item.id.clone();
        let t0 = item.last_accessed_at;
        wm.add_working(item, t0);

        let mut last = f64::MAX;
        for secs in [0, 1, 5, 10, 30, 60] {
            let r = wm.relevance_of(&id, t0 + Duration::seconds(secs)).unwrap();
            assert!(r <= last, "relevance rose from {last} to {r} at +{secs}s");
            last = r;
        }
    }

    #[test]
    fn access_refreshes_decay_origin() {
        let mut wm = store();
        let item = MemoryItem::new("observation", "s", "c", 1.0);
        let id = item.id.clone();
        let t0 = item.last_accessed_at;
        wm.add_working(item, t0);

        let t1 = t0 + Duration::seconds(10);
        let before_access = wm.relevance_of(&id, t1).unwrap(); // ≈ 0.5

        wm.access(&id, t1);
        let after_access = wm.relevance_of(&id, t1).unwrap(); // back to base

        assert!(
            after_access >= before_access,
            "next sample after access ({after_access}) must be >= pre-access value ({before_access})"
        );
    }

    #[test]
    fn critical_items_never_decay() {
        let mut wm = store();
        let item = MemoryItem::new("goal", "finish the migration", "", 0.9);
        let id = item.id.clone();
        wm.add_critical(item);

        let far_future = Utc::now() + Duration::days(30);
        assert_eq!(wm.relevance_of(&id, far_future), Some(1.0));
    }

    #[test]
    fn eviction_only_when_over_capacity() {
        let mut wm = store();
        let now = Utc::now();

        // One stale item, tier under capacity: no eviction
        let mut old = MemoryItem::new("observation", "old", "c", 0.5);
        old.last_accessed_at = now - Duration::seconds(100);
        wm.add_working(old, now);
        assert_eq!(wm.tier_len(MemoryTier::Working), 1);
        assert_eq!(wm.tier_len(MemoryTier::Background), 0);
    }

    #[test]
    fn stale_items_sink_to_background_when_full() {
        let mut wm = store();
        let now = Utc::now();

        let mut stale = MemoryItem::new("observation", "", "a long observation about the build", 0.5);
        stale.last_accessed_at = now - Duration::seconds(200); // decayed ≈ 0
        let stale_id = stale.id.clone();
        wm.add_working(stale, now);

        for i in 0..3 {
            wm.add_working(MemoryItem::new("observation", format!("fresh {i}"), "c", 0.9), now);
        }

        assert_eq!(wm.tier_of(&stale_id), Some(MemoryTier::Background));
        assert!(wm.tier_len(MemoryTier::Working) <= 3);
    }

    #[test]
    fn demoted_item_keeps_truncated_summary() {
        let mut wm = WorkingMemory::new(1, 10, 0.2);
        let now = Utc::now();

        let mut stale = MemoryItem::new("observation", "", "x".repeat(500), 0.5);
        stale.last_accessed_at = now - Duration::seconds(500);
        let id = stale.id.clone();
        wm.add_working(stale, now);
        wm.add_working(MemoryItem::new("observation", "fresh", "c", 0.9), now);

        assert_eq!(wm.tier_of(&id), Some(MemoryTier::Background));
        let relevance = wm.relevance_of(&id, now).unwrap();
        assert!(relevance < 0.2, "frozen background relevance, got {relevance}");
    }

    #[test]
    fn critical_exempt_from_eviction() {
        let mut wm = WorkingMemory::new(1, 10, 0.2);
        let now = Utc::now();
        wm.add_critical(MemoryItem::new("goal", "the goal", "", 1.0));

        for i in 0..5 {
            wm.add_working(MemoryItem::new("observation", format!("o{i}"), "c", 0.9), now);
        }

        assert_eq!(wm.tier_len(MemoryTier::Critical), 1);
    }

    #[test]
    fn render_shows_goal_first() {
        let mut wm = store();
        let now = Utc::now();
        wm.add_critical(MemoryItem::new("goal", "ship the feature", "", 1.0));
        wm.add_working(MemoryItem::new("observation", "tests pass", "c", 0.8), now);

        let rendered = wm.render(now, 10);
        let goal_pos = rendered.find("ship the feature").unwrap();
        let obs_pos = rendered.find("tests pass").unwrap();
        assert!(goal_pos < obs_pos);
    }

    #[test]
    fn task_clear_keeps_background() {
        let mut wm = WorkingMemory::new(1, 10, 0.2);
        let now = Utc::now();
        let mut stale = MemoryItem::new("observation", "", "c", 0.5);
        stale.last_accessed_at = now - Duration::seconds(500);
        wm.add_working(stale, now);
        wm.add_working(MemoryItem::new("observation", "fresh", "c", 0.9), now);
        wm.add_critical(MemoryItem::new("goal", "g", "", 1.0));

        wm.clear_task();
        assert_eq!(wm.tier_len(MemoryTier::Critical), 0);
        assert_eq!(wm.tier_len(MemoryTier::Working), 0);
        assert!(wm.tier_len(MemoryTier::Background) > 0);

        wm.clear_all();
        assert_eq!(wm.tier_len(MemoryTier::Background), 0);
    }
}
