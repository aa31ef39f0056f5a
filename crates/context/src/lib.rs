//! Context budget subsystem — what the agent gets to see each iteration.
//!
//! Three cooperating algorithms:
//!
//! 1. **Relevance selection** ([`relevance`]) — scores candidate context
//!    items by keyword overlap, recency, and capability tags, with a
//!    freshness adjustment that rewards items changed since last
//!    inspection.
//! 2. **Working memory decay** ([`memory`]) — a three-tier store where
//!    working-tier relevance halves every half-life and stale items sink
//!    into a compressed background tier. Critical items never decay.
//! 3. **Compression fallback** ([`compress`]) — when estimated tokens
//!    exceed the budget, older history is replaced by a model summary,
//!    falling back to a deterministic structured extraction that always
//!    succeeds. The most recent turns are always preserved verbatim.

pub mod compress;
pub mod memory;
pub mod relevance;
pub mod token;

pub use compress::{CompressionReport, CompressionStrategy, Compressor};
pub use memory::{MemoryItem, MemoryTier, WorkingMemory};
pub use relevance::{CandidateItem, RelevanceSelector, ScoredItem};
