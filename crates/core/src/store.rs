//! Persistent store contract — what the agent keeps across conversations.
//!
//! Two independently-lifecycled documents: **project knowledge**
//! (validated, anchor-checked facts about the workspace) and **decision
//! patterns** (recorded tool sequences with their outcome). Both are
//! loaded at conversation start and saved at conversation end or at
//! explicit checkpoints — never mid-task.

use crate::error::StoreError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// One validated fact about the project.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KnowledgeFact {
    /// Unique fact ID.
    pub id: String,

    /// The fact itself.
    pub statement: String,

    /// The workspace target this fact is anchored to. Facts whose anchor
    /// no longer exists are dropped on load.
    pub anchor: String,

    /// When the fact was last confirmed against the workspace.
    pub confirmed_at: DateTime<Utc>,
}

impl KnowledgeFact {
    pub fn new(statement: impl Into<String>, anchor: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            statement: statement.into(),
            anchor: anchor.into(),
            confirmed_at: Utc::now(),
        }
    }
}

/// The project knowledge document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectKnowledge {
    pub facts: Vec<KnowledgeFact>,
}

impl ProjectKnowledge {
    /// Drop facts whose anchors no longer resolve. Returns how many were
    /// removed.
    pub fn prune_unanchored<F: Fn(&str) -> bool>(&mut self, anchor_exists: F) -> usize {
        let before = self.facts.len();
        self.facts.retain(|f| anchor_exists(&f.anchor));
        before - self.facts.len()
    }
}

/// A recorded tool sequence and how it went.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionPattern {
    /// Unique pattern ID.
    pub id: String,

    /// Short description of the task this sequence served.
    pub task_summary: String,

    /// The tools invoked, in order.
    pub tool_sequence: Vec<String>,

    /// Whether the task succeeded.
    pub success: bool,

    /// When the pattern was recorded.
    pub recorded_at: DateTime<Utc>,
}

impl DecisionPattern {
    pub fn new(task_summary: impl Into<String>, tool_sequence: Vec<String>, success: bool) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            task_summary: task_summary.into(),
            tool_sequence,
            success,
            recorded_at: Utc::now(),
        }
    }
}

/// The persistent store contract.
///
/// Implementations: in-memory (tests), JSON files (default deployment).
#[async_trait]
pub trait KnowledgeStore: Send + Sync {
    async fn load_knowledge(&self) -> std::result::Result<ProjectKnowledge, StoreError>;

    async fn save_knowledge(
        &self,
        knowledge: &ProjectKnowledge,
    ) -> std::result::Result<(), StoreError>;

    async fn load_patterns(&self) -> std::result::Result<Vec<DecisionPattern>, StoreError>;

    async fn save_patterns(
        &self,
        patterns: &[DecisionPattern],
    ) -> std::result::Result<(), StoreError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn prune_drops_dead_anchors() {
        let mut knowledge = ProjectKnowledge {
            facts: vec![
                KnowledgeFact::new("uses tokio", "Cargo.toml"),
                KnowledgeFact::new("entry point", "src/deleted.rs"),
            ],
        };
        let removed = knowledge.prune_unanchored(|anchor| anchor == "Cargo.toml");
        assert_eq!(removed, 1);
        assert_eq!(knowledge.facts.len(), 1);
        assert_eq!(knowledge.facts[0].anchor, "Cargo.toml");
    }

    #[test]
    fn pattern_roundtrip() {
        let pattern = DecisionPattern::new(
            "add a config field",
            vec!["read_entry".into(), "patch_entry".into()],
            true,
        );
        let json = serde_json::to_string(&pattern).unwrap();
        let back: DecisionPattern = serde_json::from_str(&json).unwrap();
        assert_eq!(back.tool_sequence.len(), 2);
        assert!(back.success);
    }
}
