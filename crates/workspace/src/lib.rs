//! Reference Tool Backend — an in-memory virtual file tree.
//!
//! Implements the full backend contract so the engine, CLI, and tests
//! have a concrete workspace to drive: create/read/patch/list/remove
//! over path-keyed entries, unique-match patching, and an approval queue
//! for dangerous operations. Production deployments supply their own
//! `ToolBackend`; nothing in the engine depends on this one.
//!
//! Semantic failures (target exists, ambiguous patch) come back as
//! `ToolOutcome::Error` with a hint — the model reacts to those.
//! `BackendError` is reserved for transport-shaped failures, which an
//! in-memory backend only produces for unknown/expired operations.

use async_trait::async_trait;
use chrono::Utc;
use serde_json::json;
use std::collections::{BTreeMap, HashMap};
use std::sync::{Mutex, RwLock};
use tiller_core::backend::{
    OperationKind, PendingOperation, PendingStatus, TargetIndex, ToolBackend, ToolOutcome,
    ToolSchema,
};
use tiller_core::error::BackendError;
use tiller_core::turn::ToolCall;
use tracing::{debug, info};

/// The in-memory workspace backend.
pub struct MemoryWorkspace {
    entries: RwLock<BTreeMap<String, String>>,
    pending: Mutex<HashMap<String, PendingOperation>>,
    pending_ttl_secs: u64,
}

impl MemoryWorkspace {
    pub fn new(pending_ttl_secs: u64) -> Self {
        Self {
            entries: RwLock::new(BTreeMap::new()),
            pending: Mutex::new(HashMap::new()),
            pending_ttl_secs,
        }
    }

    /// Seed the workspace with entries (tests, demo mode).
    pub fn seed(self, entries: &[(&str, &str)]) -> Self {
        {
            let mut map = self.entries.write().unwrap();
            for (path, content) in entries {
                map.insert(path.to_string(), content.to_string());
            }
        }
        self
    }

    /// Snapshot of all entry paths.
    pub fn paths(&self) -> Vec<String> {
        self.entries.read().unwrap().keys().cloned().collect()
    }

    /// Read an entry's content directly (assertions in tests).
    pub fn content_of(&self, path: &str) -> Option<String> {
        self.entries.read().unwrap().get(path).cloned()
    }

    /// Mark pending operations past their TTL as expired.
    pub fn expire_stale(&self) -> usize {
        let now = Utc::now();
        let mut pending = self.pending.lock().unwrap();
        let mut expired = 0;
        for op in pending.values_mut() {
            if op.status == PendingStatus::Pending && op.is_expired(now) {
                op.status = PendingStatus::Expired;
                expired += 1;
            }
        }
        expired
    }

    // ── Tool implementations ──

    fn list(&self, args: &serde_json::Value) -> ToolOutcome {
        let prefix = args.get("prefix").and_then(|v| v.as_str()).unwrap_or("");
        let entries = self.entries.read().unwrap();
        let listing: Vec<&String> = entries.keys().filter(|k| k.starts_with(prefix)).collect();
        ToolOutcome::ok_with("entries", json!(listing))
    }

    fn read(&self, path: &str) -> ToolOutcome {
        let entries = self.entries.read().unwrap();
        match entries.get(path) {
            Some(content) => ToolOutcome::ok_with("content", json!(content)),
            None => ToolOutcome::error_with_hint(
                format!("no entry at '{path}'"),
                "use list_entries to see what exists",
            ),
        }
    }

    fn create(&self, path: &str, content: &str) -> ToolOutcome {
        let mut entries = self.entries.write().unwrap();
        if entries.contains_key(path) {
            return ToolOutcome::error_with_hint(
                format!("'{path}' already exists"),
                "use patch_entry to modify an existing entry",
            );
        }
        entries.insert(path.to_string(), content.to_string());
        info!(path, bytes = content.len(), "Entry created");
        ToolOutcome::ok_with("created", json!(path))
    }

    fn patch(&self, path: &str, search: &str, replace: &str) -> ToolOutcome {
        let mut entries = self.entries.write().unwrap();
        let Some(content) = entries.get(path) else {
            return ToolOutcome::error(format!("no entry at '{path}'"));
        };

        let occurrences = content.matches(search).count();
        match occurrences {
            0 => ToolOutcome::error_with_hint(
                format!("search text not found in '{path}'"),
                "read the entry again; its content may have changed",
            ),
            1 => {
                let updated = content.replacen(search, replace, 1);
                entries.insert(path.to_string(), updated);
                info!(path, "Entry patched");
                ToolOutcome::ok_with("patched", json!(path))
            }
            n => ToolOutcome::error_with_hint(
                format!("search text matches {n} locations in '{path}'"),
                "expand the search text until it is unique",
            ),
        }
    }

    fn remove(&self, path: &str) -> ToolOutcome {
        // Dangerous: park the side effect until a human approves.
        if !self.entries.read().unwrap().contains_key(path) {
            return ToolOutcome::error(format!("no entry at '{path}'"));
        }
        let op = PendingOperation::new("remove_entry", json!({ "path": path }), self.pending_ttl_secs);
        let id = op.id.clone();
        self.pending.lock().unwrap().insert(id.clone(), op);
        debug!(path, operation_id = %id, "Removal queued for approval");
        ToolOutcome::Pending { operation_id: id }
    }

    fn apply_pending(&self, op: &PendingOperation) -> ToolOutcome {
        match op.tool.as_str() {
            "remove_entry" => {
                let path = op.payload.get("path").and_then(|v| v.as_str()).unwrap_or("");
                let mut entries = self.entries.write().unwrap();
                match entries.remove(path) {
                    Some(_) => {
                        info!(path, "Entry removed (approved)");
                        ToolOutcome::ok_with("removed", json!(path))
                    }
                    None => ToolOutcome::error(format!("'{path}' vanished before approval")),
                }
            }
            other => ToolOutcome::error(format!("unknown deferred tool '{other}'")),
        }
    }
}

impl Default for MemoryWorkspace {
    fn default() -> Self {
        Self::new(600)
    }
}

impl TargetIndex for MemoryWorkspace {
    fn contains(&self, target: &str) -> bool {
        let entries = self.entries.read().unwrap();
        let trimmed = target.trim_end_matches('/');
        entries.contains_key(trimmed)
            || entries
                .keys()
                .any(|k| k.starts_with(trimmed) && k[trimmed.len()..].starts_with('/'))
    }

    fn targets(&self) -> Vec<String> {
        self.paths()
    }
}

#[async_trait]
impl ToolBackend for MemoryWorkspace {
    fn schemas(&self) -> Vec<ToolSchema> {
        vec![
            ToolSchema {
                name: "list_entries".into(),
                description: "List workspace entries, optionally under a prefix".into(),
                kind: OperationKind::Query,
                required: vec![],
                target_field: None,
                content_fields: vec![],
                dangerous: false,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "prefix": { "type": "string", "description": "Path prefix filter" }
                    }
                }),
            },
            ToolSchema {
                name: "read_entry".into(),
                description: "Read the content of one entry".into(),
                kind: OperationKind::Read,
                required: vec!["path".into()],
                target_field: Some("path".into()),
                content_fields: vec![],
                dangerous: false,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string", "description": "Entry path" }
                    },
                    "required": ["path"]
                }),
            },
            ToolSchema {
                name: "create_entry".into(),
                description: "Create a new entry with the given content".into(),
                kind: OperationKind::Create,
                required: vec!["path".into(), "content".into()],
                target_field: Some("path".into()),
                content_fields: vec!["content".into()],
                dangerous: false,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string", "description": "New entry path" },
                        "content": { "type": "string", "description": "Full entry content" }
                    },
                    "required": ["path", "content"]
                }),
            },
            ToolSchema {
                name: "patch_entry".into(),
                description: "Replace one unique occurrence of search text in an entry".into(),
                kind: OperationKind::Modify,
                required: vec!["path".into(), "search".into(), "replace".into()],
                target_field: Some("path".into()),
                content_fields: vec!["replace".into()],
                dangerous: false,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string", "description": "Entry path" },
                        "search": { "type": "string", "description": "Text to find (must match exactly once)" },
                        "replace": { "type": "string", "description": "Replacement text" }
                    },
                    "required": ["path", "search", "replace"]
                }),
            },
            ToolSchema {
                name: "remove_entry".into(),
                description: "Remove an entry (requires human approval)".into(),
                kind: OperationKind::Delete,
                required: vec!["path".into()],
                target_field: Some("path".into()),
                content_fields: vec![],
                dangerous: true,
                parameters: json!({
                    "type": "object",
                    "properties": {
                        "path": { "type": "string", "description": "Entry path" }
                    },
                    "required": ["path"]
                }),
            },
        ]
    }

    async fn execute(&self, call: &ToolCall) -> Result<ToolOutcome, BackendError> {
        let args = &call.arguments;
        let str_arg = |key: &str| args.get(key).and_then(|v| v.as_str()).unwrap_or("");

        let outcome = match call.name.as_str() {
            "list_entries" => self.list(args),
            "read_entry" => self.read(str_arg("path")),
            "create_entry" => self.create(str_arg("path"), str_arg("content")),
            "patch_entry" => self.patch(str_arg("path"), str_arg("search"), str_arg("replace")),
            "remove_entry" => self.remove(str_arg("path")),
            other => return Err(BackendError::NotFound(other.to_string())),
        };
        Ok(outcome)
    }

    async fn resolve_pending(
        &self,
        operation_id: &str,
        approved: bool,
    ) -> Result<ToolOutcome, BackendError> {
        let mut pending = self.pending.lock().unwrap();
        let op = pending
            .get_mut(operation_id)
            .ok_or_else(|| BackendError::UnknownOperation(operation_id.to_string()))?;

        if op.status == PendingStatus::Pending && op.is_expired(Utc::now()) {
            op.status = PendingStatus::Expired;
        }
        match op.status {
            PendingStatus::Expired => {
                return Err(BackendError::OperationExpired(operation_id.to_string()));
            }
            PendingStatus::Approved | PendingStatus::Rejected => {
                // Resume consumes a pause exactly once; a second resolve is a bug upstream
                return Err(BackendError::UnknownOperation(format!(
                    "{operation_id} already resolved"
                )));
            }
            PendingStatus::Pending => {}
        }

        if approved {
            op.status = PendingStatus::Approved;
            let op = op.clone();
            drop(pending);
            Ok(self.apply_pending(&op))
        } else {
            op.status = PendingStatus::Rejected;
            Ok(ToolOutcome::error("operation rejected by user"))
        }
    }

    async fn pending_operations(&self) -> Vec<PendingOperation> {
        self.pending
            .lock()
            .unwrap()
            .values()
            .filter(|op| op.status == PendingStatus::Pending)
            .cloned()
            .collect()
    }
}
