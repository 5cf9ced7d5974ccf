pub mod adapter;
pub mod context;
pub mod loop_;
pub mod observation;
pub mod reasoning;
pub mod registry;

pub use adapter::{CapabilityAdapter, validate_arguments};
pub use context::{ContextBuilder, DecisionMode};
pub use loop_::{AgentLoop, Answer, LoopState, PlanStep};
pub use reasoning::{Decision, ReasoningClient};
pub use registry::{CapabilityEntry, CapabilityRegistry};
