use crate::agent::context::DecisionMode;
use crate::agent::observation::render_observation;
use crate::agent::{CapabilityAdapter, Decision, ReasoningClient};
use crate::error::OrchestratorError;
use crate::session::{ConversationContext, ConversationTurn};
use crate::traits::{Arguments, CapabilityDescriptor, InvocationResult};
use serde::Serialize;
use std::path::PathBuf;
use tokio_util::sync::CancellationToken;
use tracing::{Instrument, debug, error, info, info_span, warn};

pub const DEFAULT_MAX_ITERATIONS: usize = 8;
pub const DEFAULT_OBSERVATION_MAX_CHARS: usize = 2_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoopState {
    Planning,
    Executing,
    Observing,
    Summarizing,
    Done,
    Failed,
}

/// One executed invocation within a single query.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlanStep {
    pub index: usize,
    pub capability: String,
    pub arguments: Arguments,
    pub result: InvocationResult,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Answer {
    pub text: String,
    pub steps: Vec<PlanStep>,
    pub iterations: usize,
}

impl Answer {
    /// Files written by successful steps (charts, reports).
    pub fn artifacts(&self) -> Vec<PathBuf> {
        self.steps
            .iter()
            .filter_map(|step| step.result.payload())
            .filter_map(|payload| payload.get("path").and_then(|p| p.as_str()))
            .map(PathBuf::from)
            .collect()
    }
}

/// Drives plan → execute → observe until the reasoning service answers,
/// a fatal failure occurs, or the step budget runs out.
pub struct AgentLoop {
    reasoning: ReasoningClient,
    adapter: CapabilityAdapter,
    max_iterations: usize,
    observation_max_chars: usize,
}

impl AgentLoop {
    pub fn new(reasoning: ReasoningClient, adapter: CapabilityAdapter) -> Self {
        Self {
            reasoning,
            adapter,
            max_iterations: DEFAULT_MAX_ITERATIONS,
            observation_max_chars: DEFAULT_OBSERVATION_MAX_CHARS,
        }
    }

    pub fn with_max_iterations(mut self, max: usize) -> Self {
        self.max_iterations = max;
        self
    }

    pub fn with_observation_max_chars(mut self, max: usize) -> Self {
        self.observation_max_chars = max;
        self
    }

    pub fn max_iterations(&self) -> usize {
        self.max_iterations
    }

    pub fn manifest(&self) -> &[CapabilityDescriptor] {
        self.adapter.registry().manifest()
    }

    pub async fn process(
        &self,
        context: &mut ConversationContext,
        query: &str,
    ) -> Result<Answer, OrchestratorError> {
        self.process_with_cancel(context, query, &CancellationToken::new())
            .await
    }

    pub async fn process_with_cancel(
        &self,
        context: &mut ConversationContext,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Answer, OrchestratorError> {
        let span = info_span!("query", max_iterations = self.max_iterations);
        async move {
            info!(query, "New query");
            let outcome = self.run(context, query, cancel).await;
            match &outcome {
                Ok(answer) => info!(
                    state = ?LoopState::Done,
                    iterations = answer.iterations,
                    steps = answer.steps.len(),
                    "Query answered"
                ),
                Err(e) => error!(state = ?LoopState::Failed, error = %e, "Query failed"),
            }
            outcome
        }
        .instrument(span)
        .await
    }

    async fn run(
        &self,
        context: &mut ConversationContext,
        query: &str,
        cancel: &CancellationToken,
    ) -> Result<Answer, OrchestratorError> {
        context.append(ConversationTurn::user(query));

        let manifest = self.manifest();
        let mut steps: Vec<PlanStep> = Vec::new();
        let mut iterations = 0;

        loop {
            if cancel.is_cancelled() {
                return Err(OrchestratorError::Cancelled { iterations });
            }

            let mode = if iterations >= self.max_iterations {
                warn!(iterations, "Step budget reached, asking for a final answer");
                DecisionMode::FinalAnswer
            } else {
                DecisionMode::Normal
            };

            debug!(state = ?LoopState::Planning, iterations, ?mode);
            let decision = tokio::select! {
                biased;
                _ = cancel.cancelled() => {
                    return Err(OrchestratorError::Cancelled { iterations });
                }
                decision = self.reasoning.decide(context.history(), manifest, mode) => decision?,
            };

            let request = match decision {
                Decision::Respond(text) => {
                    debug!(state = ?LoopState::Summarizing, iterations);
                    context.append(ConversationTurn::assistant(text.clone()));
                    return Ok(Answer {
                        text,
                        steps,
                        iterations,
                    });
                }
                Decision::Invoke(request) if mode == DecisionMode::FinalAnswer => {
                    return Err(OrchestratorError::StepBudgetExceeded {
                        iterations,
                        capability: request.capability,
                    });
                }
                Decision::Invoke(request) => request,
            };

            let index = steps.len() + 1;
            info!(
                state = ?LoopState::Executing,
                step = index,
                capability = %request.capability,
                "Invoking capability"
            );
            let result = self.adapter.invoke(&request).await;

            debug!(state = ?LoopState::Observing, step = index, success = result.is_success());
            context.append(ConversationTurn::observation(
                render_observation(index, &request, &result, self.observation_max_chars),
                vec![index],
            ));

            let fatal_reason = match &result {
                InvocationResult::Failure {
                    reason,
                    recoverable: false,
                } => Some(reason.clone()),
                _ => None,
            };

            steps.push(PlanStep {
                index,
                capability: request.capability.clone(),
                arguments: request.arguments,
                result,
            });

            if let Some(reason) = fatal_reason {
                return Err(OrchestratorError::ToolFailed {
                    capability: request.capability,
                    step: index,
                    reason,
                });
            }

            iterations += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::agent::context::FINAL_ANSWER_INSTRUCTION;
    use crate::agent::{CapabilityRegistry, ContextBuilder};
    use crate::error::{ReasoningServiceError, ToolError};
    use crate::providers::ScriptedProvider;
    use crate::session::Role;
    use crate::traits::{Capability, ChatRequest, ChatResponse, ParamType, ParameterSpec, Provider};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::collections::BTreeMap;
    use std::sync::Arc;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    struct SalesQuery;

    #[async_trait]
    impl Capability for SalesQuery {
        fn name(&self) -> &str {
            "query"
        }

        fn description(&self) -> &str {
            "Query the sales table"
        }

        fn parameters(&self) -> BTreeMap<String, ParameterSpec> {
            BTreeMap::from([(
                "filter".to_string(),
                ParameterSpec::optional(ParamType::String, "Row filter"),
            )])
        }

        async fn execute(&self, _args: Arguments) -> Result<Value, ToolError> {
            Ok(json!({
                "columns": ["product", "total_sales"],
                "rows": [["Serum", 1200], ["Lipstick", 800]],
            }))
        }
    }

    struct Visualize {
        calls: Arc<AtomicUsize>,
    }

    #[async_trait]
    impl Capability for Visualize {
        fn name(&self) -> &str {
            "visualize"
        }

        fn description(&self) -> &str {
            "Render a chart"
        }

        fn parameters(&self) -> BTreeMap<String, ParameterSpec> {
            BTreeMap::from([(
                "chart_type".to_string(),
                ParameterSpec::required(ParamType::String, "Chart type"),
            )])
        }

        async fn execute(&self, args: Arguments) -> Result<Value, ToolError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            match args.get("chart_type").and_then(Value::as_str) {
                Some("bar") => Ok(json!({ "path": "charts/sales.json" })),
                Some("unreachable") => Err(ToolError::fatal("datastore unreachable")),
                _ => Err(ToolError::recoverable("unsupported chart type")),
            }
        }
    }

    /// Finishes its work, then the user interrupts the query.
    struct Interrupt {
        cancel: CancellationToken,
    }

    #[async_trait]
    impl Capability for Interrupt {
        fn name(&self) -> &str {
            "profile"
        }

        fn description(&self) -> &str {
            "Profile the sales table"
        }

        fn parameters(&self) -> BTreeMap<String, ParameterSpec> {
            BTreeMap::new()
        }

        async fn execute(&self, _args: Arguments) -> Result<Value, ToolError> {
            self.cancel.cancel();
            Ok(json!({ "rows": 8, "columns": 7 }))
        }
    }

    /// Reasoning service that never replies.
    #[derive(Default)]
    struct Stalled {
        calls: AtomicUsize,
    }

    #[async_trait]
    impl Provider for Stalled {
        fn name(&self) -> &str {
            "stalled"
        }

        async fn chat(&self, _request: ChatRequest<'_>) -> anyhow::Result<ChatResponse> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            std::future::pending::<anyhow::Result<ChatResponse>>().await
        }
    }

    fn agent(provider: Arc<ScriptedProvider>, max_iterations: usize) -> (AgentLoop, Arc<AtomicUsize>) {
        let calls = Arc::new(AtomicUsize::new(0));
        let mut registry = CapabilityRegistry::new();
        registry.register(SalesQuery).unwrap();
        registry
            .register(Visualize {
                calls: calls.clone(),
            })
            .unwrap();

        let reasoning = ReasoningClient::new(provider, ContextBuilder::new("/tmp/ws"))
            .with_retry_backoff(Duration::ZERO);
        let adapter = CapabilityAdapter::new(Arc::new(registry));
        (
            AgentLoop::new(reasoning, adapter).with_max_iterations(max_iterations),
            calls,
        )
    }

    fn roles(context: &ConversationContext) -> Vec<Role> {
        context.history().iter().map(|t| t.role).collect()
    }

    #[tokio::test]
    async fn single_query_step_then_answer() {
        let provider = Arc::new(ScriptedProvider::with_responses([
            ChatResponse::tool_call("query", json!({ "filter": "October" })),
            ChatResponse::text("Total sales: Serum 1200, Lipstick 800"),
        ]));
        let (agent, _) = agent(provider.clone(), DEFAULT_MAX_ITERATIONS);
        let mut context = ConversationContext::new();

        let answer = agent
            .process(&mut context, "show total sales by product in October")
            .await
            .unwrap();

        assert_eq!(answer.text, "Total sales: Serum 1200, Lipstick 800");
        assert_eq!(answer.iterations, 1);
        assert_eq!(answer.steps.len(), 1);
        assert!(answer.steps[0].result.is_success());
        assert_eq!(
            roles(&context),
            vec![Role::User, Role::ToolObservation, Role::Assistant]
        );
        assert!(context.history()[1].content.contains("Serum"));
        assert_eq!(provider.call_count(), 2);
    }

    #[tokio::test]
    async fn recoverable_failure_is_fed_back() {
        let provider = Arc::new(ScriptedProvider::with_responses([
            ChatResponse::tool_call("visualize", json!({ "chart_type": "radar" })),
            ChatResponse::tool_call("visualize", json!({ "chart_type": "bar" })),
            ChatResponse::text("Here is the bar chart."),
        ]));
        let (agent, calls) = agent(provider.clone(), DEFAULT_MAX_ITERATIONS);
        let mut context = ConversationContext::new();

        let answer = agent.process(&mut context, "chart sales").await.unwrap();

        assert_eq!(answer.iterations, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
        assert_eq!(answer.artifacts(), vec![PathBuf::from("charts/sales.json")]);

        let second_round = provider.request(1).unwrap();
        let last = second_round.last().unwrap();
        assert!(last.content.contains("unsupported chart type"));
        assert_eq!(
            roles(&context),
            vec![
                Role::User,
                Role::ToolObservation,
                Role::ToolObservation,
                Role::Assistant
            ]
        );
    }

    #[tokio::test]
    async fn validation_failure_counts_as_iteration() {
        let provider = Arc::new(ScriptedProvider::with_responses([
            ChatResponse::tool_call("visualize", json!({})),
            ChatResponse::text("I could not draw it."),
        ]));
        let (agent, calls) = agent(provider, DEFAULT_MAX_ITERATIONS);
        let mut context = ConversationContext::new();

        let answer = agent.process(&mut context, "chart").await.unwrap();
        assert_eq!(answer.iterations, 1);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
        assert!(context.history()[1].content.contains("missing required parameter"));
    }

    #[tokio::test]
    async fn fatal_failure_stops_planning() {
        let provider = Arc::new(ScriptedProvider::with_responses([
            ChatResponse::tool_call("visualize", json!({ "chart_type": "unreachable" })),
            ChatResponse::text("should never be requested"),
        ]));
        let (agent, _) = agent(provider.clone(), DEFAULT_MAX_ITERATIONS);
        let mut context = ConversationContext::new();

        let err = agent.process(&mut context, "chart").await.unwrap_err();

        assert_eq!(
            err,
            OrchestratorError::ToolFailed {
                capability: "visualize".to_string(),
                step: 1,
                reason: "datastore unreachable".to_string(),
            }
        );
        assert_eq!(provider.call_count(), 1);
        assert_eq!(roles(&context), vec![Role::User, Role::ToolObservation]);
    }

    #[tokio::test]
    async fn unknown_capability_is_fatal() {
        let provider = Arc::new(ScriptedProvider::with_responses([ChatResponse::tool_call(
            "teleport",
            json!({}),
        )]));
        let (agent, _) = agent(provider.clone(), DEFAULT_MAX_ITERATIONS);
        let mut context = ConversationContext::new();

        let err = agent.process(&mut context, "go").await.unwrap_err();
        assert!(matches!(err, OrchestratorError::ToolFailed { step: 1, .. }));
        assert_eq!(provider.call_count(), 1);
    }

    #[tokio::test]
    async fn runaway_plan_exceeds_budget() {
        let max = 3;
        let provider = Arc::new(ScriptedProvider::with_responses(
            (0..20).map(|_| ChatResponse::tool_call("query", json!({}))),
        ));
        let (agent, _) = agent(provider.clone(), max);
        let mut context = ConversationContext::new();

        let err = agent.process(&mut context, "loop forever").await.unwrap_err();

        assert_eq!(
            err,
            OrchestratorError::StepBudgetExceeded {
                iterations: max,
                capability: "query".to_string(),
            }
        );
        assert_eq!(provider.call_count(), max + 1);
        let final_round = provider.request(max).unwrap();
        assert_eq!(final_round.last().unwrap().content, FINAL_ANSWER_INSTRUCTION);
    }

    #[tokio::test]
    async fn forced_final_round_can_answer() {
        let provider = Arc::new(ScriptedProvider::with_responses([
            ChatResponse::tool_call("query", json!({})),
            ChatResponse::tool_call("query", json!({})),
            ChatResponse::text("Best effort: Serum leads."),
        ]));
        let (agent, _) = agent(provider.clone(), 2);
        let mut context = ConversationContext::new();

        let answer = agent.process(&mut context, "who leads?").await.unwrap();
        assert_eq!(answer.text, "Best effort: Serum leads.");
        assert_eq!(answer.iterations, 2);
        assert_eq!(provider.call_count(), 3);
    }

    #[tokio::test]
    async fn reasoning_failure_keeps_user_turn() {
        let provider = Arc::new(ScriptedProvider::new());
        provider.push_error("503");
        provider.push_error("503");
        let (agent, _) = agent(provider.clone(), DEFAULT_MAX_ITERATIONS);
        let mut context = ConversationContext::new();

        let err = agent.process(&mut context, "hello").await.unwrap_err();
        assert!(matches!(
            err,
            OrchestratorError::Reasoning(ReasoningServiceError::Transport(_))
        ));
        assert_eq!(provider.call_count(), 2);
        assert_eq!(roles(&context), vec![Role::User]);
    }

    #[tokio::test]
    async fn cancelled_query_does_not_plan() {
        let provider = Arc::new(ScriptedProvider::with_responses([ChatResponse::text("hi")]));
        let (agent, _) = agent(provider.clone(), DEFAULT_MAX_ITERATIONS);
        let mut context = ConversationContext::new();
        let cancel = CancellationToken::new();
        cancel.cancel();

        let err = agent
            .process_with_cancel(&mut context, "hello", &cancel)
            .await
            .unwrap_err();
        assert_eq!(err, OrchestratorError::Cancelled { iterations: 0 });
        assert_eq!(provider.call_count(), 0);
    }

    #[tokio::test]
    async fn follow_up_sees_earlier_exchange() {
        let provider = Arc::new(ScriptedProvider::with_responses([
            ChatResponse::tool_call("query", json!({ "filter": "October" })),
            ChatResponse::text("Serum sold 1200."),
            ChatResponse::text("That is 60% of October sales."),
        ]));
        let (agent, _) = agent(provider.clone(), DEFAULT_MAX_ITERATIONS);
        let mut context = ConversationContext::new();

        agent.process(&mut context, "sales in October?").await.unwrap();
        let answer = agent
            .process(&mut context, "what share is that?")
            .await
            .unwrap();

        assert_eq!(answer.iterations, 0);
        assert_eq!(context.len(), 5);
        let third = provider.request(2).unwrap();
        assert!(third.iter().any(|m| m.content == "Serum sold 1200."));
    }

    #[tokio::test]
    async fn cancel_between_steps_keeps_partial_transcript() {
        let cancel = CancellationToken::new();
        let provider = Arc::new(ScriptedProvider::with_responses([
            ChatResponse::tool_call("profile", json!({})),
            ChatResponse::text("should never be requested"),
        ]));
        let mut registry = CapabilityRegistry::new();
        registry
            .register(Interrupt {
                cancel: cancel.clone(),
            })
            .unwrap();
        let reasoning = ReasoningClient::new(provider.clone(), ContextBuilder::new("/tmp/ws"))
            .with_retry_backoff(Duration::ZERO);
        let agent = AgentLoop::new(reasoning, CapabilityAdapter::new(Arc::new(registry)));
        let mut context = ConversationContext::new();

        let err = agent
            .process_with_cancel(&mut context, "profile the table", &cancel)
            .await
            .unwrap_err();

        assert_eq!(err, OrchestratorError::Cancelled { iterations: 1 });
        assert_eq!(provider.call_count(), 1);
        assert_eq!(provider.remaining(), 1);
        assert_eq!(roles(&context), vec![Role::User, Role::ToolObservation]);
        assert!(context.history()[1].content.contains("profile({}) succeeded"));
    }

    #[tokio::test]
    async fn cancel_interrupts_pending_reasoning_call() {
        let provider = Arc::new(Stalled::default());
        let reasoning = ReasoningClient::new(provider.clone(), ContextBuilder::new("/tmp/ws"));
        let agent = AgentLoop::new(
            reasoning,
            CapabilityAdapter::new(Arc::new(CapabilityRegistry::new())),
        );
        let mut context = ConversationContext::new();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let err = tokio::time::timeout(
            Duration::from_secs(5),
            agent.process_with_cancel(&mut context, "hello", &cancel),
        )
        .await
        .unwrap()
        .unwrap_err();

        assert_eq!(err, OrchestratorError::Cancelled { iterations: 0 });
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
        assert_eq!(roles(&context), vec![Role::User]);
    }

    #[tokio::test]
    async fn small_history_cap_keeps_question_in_flight() {
        let provider = Arc::new(ScriptedProvider::with_responses([
            ChatResponse::tool_call("query", json!({ "filter": "October" })),
            ChatResponse::tool_call("query", json!({ "filter": "Skincare" })),
            ChatResponse::tool_call("query", json!({ "filter": "North" })),
            ChatResponse::text("Serum leads October."),
            ChatResponse::text("September is quieter."),
        ]));
        let (agent, _) = agent(provider.clone(), DEFAULT_MAX_ITERATIONS);
        let mut context = ConversationContext::new().with_max_history(Some(3));

        let answer = agent
            .process(&mut context, "who leads October?")
            .await
            .unwrap();

        assert_eq!(answer.iterations, 3);
        let last_round = provider.request(3).unwrap();
        assert!(last_round.iter().any(|m| m.content == "who leads October?"));
        assert_eq!(
            roles(&context),
            vec![
                Role::User,
                Role::ToolObservation,
                Role::ToolObservation,
                Role::ToolObservation,
                Role::Assistant
            ]
        );

        agent
            .process(&mut context, "and September?")
            .await
            .unwrap();
        assert_eq!(roles(&context), vec![Role::User, Role::Assistant]);
        assert_eq!(context.history()[0].content, "and September?");
    }
}
