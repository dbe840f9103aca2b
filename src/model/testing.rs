//! Scripted gateway for unit tests.

use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::Mutex;

use super::{ModelError, ModelGateway, ModelInvocationRequest, ModelInvocationResult};

/// Replays queued outcomes in order and records every request it sees
pub(crate) struct ScriptedGateway {
    outcomes: Mutex<VecDeque<Result<ModelInvocationResult, ModelError>>>,
    requests: Mutex<Vec<ModelInvocationRequest>>,
}

impl ScriptedGateway {
    pub(crate) fn new(
        outcomes: impl IntoIterator<Item = Result<ModelInvocationResult, ModelError>>,
    ) -> Self {
        Self {
            outcomes: Mutex::new(outcomes.into_iter().collect()),
            requests: Mutex::new(Vec::new()),
        }
    }

    pub(crate) fn answers(texts: &[&str]) -> Self {
        Self::new(
            texts
                .iter()
                .map(|t| Ok(ModelInvocationResult::from_text(*t))),
        )
    }

    pub(crate) fn calls(&self) -> usize {
        self.requests.lock().expect("lock should not be poisoned").len()
    }

    pub(crate) fn requests(&self) -> Vec<ModelInvocationRequest> {
        self.requests
            .lock()
            .expect("lock should not be poisoned")
            .clone()
    }
}

#[async_trait]
impl ModelGateway for ScriptedGateway {
    fn model_name(&self) -> &str {
        "scripted"
    }

    async fn invoke(
        &self,
        request: &ModelInvocationRequest,
    ) -> Result<ModelInvocationResult, ModelError> {
        self.requests
            .lock()
            .expect("lock should not be poisoned")
            .push(request.clone());
        self.outcomes
            .lock()
            .expect("lock should not be poisoned")
            .pop_front()
            .unwrap_or_else(|| Err(ModelError::fatal("script exhausted")))
    }
}
