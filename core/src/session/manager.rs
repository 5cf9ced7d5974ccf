use crate::agent::{AgentLoop, Answer};
use crate::error::OrchestratorError;
use crate::session::{ConversationContext, ConversationTurn, SessionId, SessionSummary};
use crate::session::store::DEFAULT_MAX_HISTORY;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, RwLock};
use tokio_util::sync::CancellationToken;
use tracing::info;

type SessionSlot = Arc<Mutex<ConversationContext>>;

/// Caller-facing entry point. Each session owns an independent
/// [`ConversationContext`]; the agent loop and its registry are shared.
pub struct SessionManager {
    agent: Arc<AgentLoop>,
    sessions: RwLock<HashMap<SessionId, SessionSlot>>,
    max_history: Option<usize>,
}

impl SessionManager {
    pub fn new(agent: Arc<AgentLoop>) -> Self {
        Self {
            agent,
            sessions: RwLock::new(HashMap::new()),
            max_history: Some(DEFAULT_MAX_HISTORY),
        }
    }

    pub fn with_max_history(mut self, max_history: Option<usize>) -> Self {
        self.max_history = max_history;
        self
    }

    pub fn agent(&self) -> &Arc<AgentLoop> {
        &self.agent
    }

    pub async fn new_session(&self) -> SessionId {
        let id = SessionId::new();
        let context = ConversationContext::new().with_max_history(self.max_history);
        self.sessions
            .write()
            .await
            .insert(id, Arc::new(Mutex::new(context)));
        info!(session = %id, "Started session");
        id
    }

    async fn slot(&self, id: SessionId) -> Result<SessionSlot, OrchestratorError> {
        self.sessions
            .read()
            .await
            .get(&id)
            .cloned()
            .ok_or(OrchestratorError::UnknownSession(id))
    }

    pub async fn ask(&self, id: SessionId, query: &str) -> Result<Answer, OrchestratorError> {
        self.ask_with_cancel(id, query, &CancellationToken::new())
            .await
    }

    /// Queries on one session run one at a time; different sessions never
    /// wait on each other.
    pub async fn ask_with_cancel(
        &self,
        id: SessionId,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Answer, OrchestratorError> {
        let slot = self.slot(id).await?;
        let mut context = slot.lock().await;
        self.agent
            .process_with_cancel(&mut context, query, cancel)
            .await
    }

    pub async fn reset(&self, id: SessionId) -> Result<(), OrchestratorError> {
        let slot = self.slot(id).await?;
        slot.lock().await.reset();
        info!(session = %id, "Cleared session history");
        Ok(())
    }

    pub async fn close(&self, id: SessionId) -> Result<(), OrchestratorError> {
        self.sessions
            .write()
            .await
            .remove(&id)
            .map(|_| ())
            .ok_or(OrchestratorError::UnknownSession(id))
    }

    pub async fn history(&self, id: SessionId) -> Result<Vec<ConversationTurn>, OrchestratorError> {
        let slot = self.slot(id).await?;
        let context = slot.lock().await;
        Ok(context.history().to_vec())
    }

    pub async fn summary(&self, id: SessionId) -> Result<SessionSummary, OrchestratorError> {
        let slot = self.slot(id).await?;
        let context = slot.lock().await;
        Ok(context.summary())
    }

    pub async fn session_count(&self) -> usize {
        self.sessions.read().await.len()
    }
}
