use crate::traits::{ChatMessage, ChatRequest, ChatResponse, Provider};
use async_trait::async_trait;
use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

/// Replays a fixed queue of replies and records every request it receives.
#[derive(Default)]
pub struct ScriptedProvider {
    replies: Mutex<VecDeque<Result<ChatResponse, String>>>,
    requests: Mutex<Vec<Vec<ChatMessage>>>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
}

impl ScriptedProvider {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_responses(responses: impl IntoIterator<Item = ChatResponse>) -> Self {
        let provider = Self::new();
        for response in responses {
            provider.push_response(response);
        }
        provider
    }

    pub fn push_response(&self, response: ChatResponse) {
        lock(&self.replies).push_back(Ok(response));
    }

    pub fn push_error(&self, message: impl Into<String>) {
        lock(&self.replies).push_back(Err(message.into()));
    }

    pub fn call_count(&self) -> usize {
        lock(&self.requests).len()
    }

    /// Messages of the `n`-th request, zero-based.
    pub fn request(&self, n: usize) -> Option<Vec<ChatMessage>> {
        lock(&self.requests).get(n).cloned()
    }

    pub fn remaining(&self) -> usize {
        lock(&self.replies).len()
    }
}

#[async_trait]
impl Provider for ScriptedProvider {
    fn name(&self) -> &str {
        "scripted"
    }

    async fn chat(&self, request: ChatRequest<'_>) -> anyhow::Result<ChatResponse> {
        lock(&self.requests).push(request.messages.to_vec());

        match lock(&self.replies).pop_front() {
            Some(Ok(response)) => Ok(response),
            Some(Err(message)) => Err(anyhow::anyhow!(message)),
            None => Err(anyhow::anyhow!("scripted provider has no replies left")),
        }
    }
}
