pub mod agent;
pub mod config;
pub mod data;
pub mod error;
pub mod providers;
pub mod session;
pub mod tools;
pub mod traits;

pub use agent::{AgentLoop, Answer, CapabilityAdapter, CapabilityRegistry, ContextBuilder, ReasoningClient};
pub use config::*;
pub use error::*;
pub use providers::*;
pub use session::{ConversationContext, ConversationTurn, Role, SessionId, SessionManager};
pub use tools::*;
pub use traits::*;
