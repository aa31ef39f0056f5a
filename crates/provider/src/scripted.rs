//! Scripted provider — deterministic canned responses.
//!
//! Feeds a fixed sequence of responses back to the loop, one per
//! `complete()` call. Used by engine tests and the CLI's offline demo
//! mode. When the script runs out it answers with a plain "done" text so
//! the loop always terminates.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;
use tiller_core::error::ProviderError;
use tiller_core::provider::{ModelProvider, ModelRequest, ModelResponse};

pub struct ScriptedProvider {
    responses: Mutex<VecDeque<ModelResponse>>,
    requests_seen: Mutex<Vec<ModelRequest>>,
}

impl ScriptedProvider {
    pub fn new(responses: Vec<ModelResponse>) -> Self {
        Self {
            responses: Mutex::new(responses.into()),
            requests_seen: Mutex::new(Vec::new()),
        }
    }

    /// How many completion calls have been made.
    pub fn call_count(&self) -> usize {
        self.requests_seen.lock().unwrap().len()
    }

    /// The request history, for assertions on what the loop sent.
    pub fn requests(&self) -> Vec<ModelRequest> {
        self.requests_seen.lock().unwrap().clone()
    }
}

#[async_trait]
impl ModelProvider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn complete(&self, request: ModelRequest) -> Result<ModelResponse, ProviderError> {
        self.requests_seen.lock().unwrap().push(request);
        let next = self.responses.lock().unwrap().pop_front();
        Ok(next.unwrap_or_else(|| ModelResponse::text_only("done")))
    }
}
