use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub const DEFAULT_MAX_HISTORY: usize = 50;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Role {
    User,
    Assistant,
    ToolObservation,
}

impl std::fmt::Display for Role {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::User => write!(f, "user"),
            Self::Assistant => write!(f, "assistant"),
            Self::ToolObservation => write!(f, "tool"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConversationTurn {
    pub role: Role,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    /// Plan-step indices summarized by a tool-observation turn.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub steps: Vec<usize>,
}

impl ConversationTurn {
    fn new(role: Role, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            timestamp: Utc::now(),
            steps: vec![],
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn observation(content: impl Into<String>, steps: Vec<usize>) -> Self {
        Self {
            steps,
            ..Self::new(Role::ToolObservation, content)
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionSummary {
    pub turns: usize,
    pub started_at: DateTime<Utc>,
    pub age_secs: i64,
}

/// Turn history of a single session.
///
/// The only mutations are [`append`](Self::append) and [`reset`](Self::reset).
/// `max_history` is enforced when a user turn opens a new exchange: whole
/// earlier exchanges are dropped, oldest first, so a query in flight always
/// keeps its question and observations.
#[derive(Debug, Clone)]
pub struct ConversationContext {
    turns: Vec<ConversationTurn>,
    max_history: Option<usize>,
    started_at: DateTime<Utc>,
}

impl Default for ConversationContext {
    fn default() -> Self {
        Self::new()
    }
}

impl ConversationContext {
    pub fn new() -> Self {
        Self {
            turns: Vec::new(),
            max_history: Some(DEFAULT_MAX_HISTORY),
            started_at: Utc::now(),
        }
    }

    /// `None` keeps every turn.
    pub fn with_max_history(mut self, max_history: Option<usize>) -> Self {
        self.max_history = max_history.filter(|max| *max > 0);
        self
    }

    pub fn append(&mut self, turn: ConversationTurn) {
        if turn.role == Role::User {
            self.trim_before_exchange();
        }
        self.turns.push(turn);
    }

    fn trim_before_exchange(&mut self) {
        let Some(max) = self.max_history else {
            return;
        };

        while !self.turns.is_empty() && self.turns.len() >= max {
            let end = self.turns[1..]
                .iter()
                .position(|t| t.role == Role::User)
                .map_or(self.turns.len(), |i| i + 1);
            self.turns.drain(..end);
        }
    }

    pub fn history(&self) -> &[ConversationTurn] {
        &self.turns
    }

    pub fn reset(&mut self) {
        self.turns.clear();
        self.started_at = Utc::now();
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    pub fn summary(&self) -> SessionSummary {
        SessionSummary {
            turns: self.turns.len(),
            started_at: self.started_at,
            age_secs: (Utc::now() - self.started_at).num_seconds(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn append_preserves_order() {
        let mut context = ConversationContext::new();
        context.append(ConversationTurn::user("total sales?"));
        context.append(ConversationTurn::observation("Step 1 ok", vec![1]));
        context.append(ConversationTurn::assistant("42"));

        let roles: Vec<_> = context.history().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User, Role::ToolObservation, Role::Assistant]);
        assert_eq!(context.history()[1].steps, vec![1]);
    }

    #[test]
    fn reset_clears_history() {
        let mut context = ConversationContext::new();
        context.append(ConversationTurn::user("hello"));
        context.reset();
        assert!(context.is_empty());
        assert_eq!(context.summary().turns, 0);
    }

    #[test]
    fn oldest_turns_dropped_past_limit() {
        let mut context = ConversationContext::new().with_max_history(Some(3));
        for i in 0..5 {
            context.append(ConversationTurn::user(format!("q{i}")));
        }

        let contents: Vec<_> = context.history().iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["q2", "q3", "q4"]);
    }

    #[test]
    fn unbounded_history() {
        let mut context = ConversationContext::new().with_max_history(None);
        for i in 0..(DEFAULT_MAX_HISTORY + 10) {
            context.append(ConversationTurn::user(format!("q{i}")));
        }
        assert_eq!(context.len(), DEFAULT_MAX_HISTORY + 10);
    }

    #[test]
    fn whole_exchanges_are_dropped() {
        let mut context = ConversationContext::new().with_max_history(Some(4));
        context.append(ConversationTurn::user("q1"));
        context.append(ConversationTurn::observation("Step 1 ok", vec![1]));
        context.append(ConversationTurn::assistant("a1"));
        context.append(ConversationTurn::user("q2"));
        context.append(ConversationTurn::assistant("a2"));
        context.append(ConversationTurn::user("q3"));

        let contents: Vec<_> = context.history().iter().map(|t| t.content.as_str()).collect();
        assert_eq!(contents, vec!["q2", "a2", "q3"]);
    }

    #[test]
    fn exchange_in_flight_is_never_trimmed() {
        let mut context = ConversationContext::new().with_max_history(Some(2));
        context.append(ConversationTurn::user("q1"));
        for step in 1..=4 {
            context.append(ConversationTurn::observation(format!("Step {step} ok"), vec![step]));
        }
        context.append(ConversationTurn::assistant("a1"));

        assert_eq!(context.len(), 6);
        assert_eq!(context.history()[0].content, "q1");

        context.append(ConversationTurn::user("q2"));
        let roles: Vec<_> = context.history().iter().map(|t| t.role).collect();
        assert_eq!(roles, vec![Role::User]);
    }
}
