pub mod capability;
pub mod provider;

pub use capability::{
    Arguments, Capability, CapabilityDescriptor, InvocationRequest, InvocationResult, ParamType,
    ParameterSpec,
};
pub use provider::{ChatMessage, ChatRequest, ChatResponse, Provider, ToolCall};
