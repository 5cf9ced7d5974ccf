use crate::session::{ConversationTurn, Role};
use crate::traits::{CapabilityDescriptor, ChatMessage};
use std::fmt::Write;
use std::path::{Path, PathBuf};

const DATASET_MAX_CHARS: usize = 8_000;

pub const FINAL_ANSWER_INSTRUCTION: &str = "The step budget for this question is used up. \
Do NOT request another tool. Write the best final answer you can from the tool results above, \
and say plainly if they are not enough to answer fully.";

const IDENTITY: &str = "You are tabula, a data-analysis assistant. You answer questions about a \
tabular dataset by calling analysis tools one at a time, reading each result, and then either \
calling another tool or replying with the final answer. Never invent numbers that no tool returned.";

/// Whether the reasoning service may still pick a tool this round.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecisionMode {
    Normal,
    FinalAnswer,
}

/// Assembles the system prompt and the message transcript sent to the
/// reasoning service every round.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    pub workspace: PathBuf,
    pub dataset_preamble: Option<String>,
}

impl ContextBuilder {
    pub fn new(workspace: impl AsRef<Path>) -> Self {
        Self {
            workspace: workspace.as_ref().to_path_buf(),
            dataset_preamble: None,
        }
    }

    pub fn with_dataset_preamble(mut self, preamble: impl Into<String>) -> Self {
        self.dataset_preamble = Some(preamble.into());
        self
    }

    pub fn build_system_prompt(&self, manifest: &[CapabilityDescriptor]) -> String {
        let mut parts = vec![IDENTITY.to_string()];

        parts.push(self.get_tool_instructions(manifest));
        parts.push(self.get_runtime_context());

        if let Some(dataset) = self.get_dataset_context() {
            parts.push(dataset);
        }

        parts.join("\n\n---\n\n")
    }

    fn get_tool_instructions(&self, manifest: &[CapabilityDescriptor]) -> String {
        if manifest.is_empty() {
            return "No tools are available. Answer directly.".to_string();
        }

        let mut instructions = String::new();
        instructions.push_str("## Tool Use Protocol\n\n");
        instructions.push_str(
            "Call exactly one tool per reply. If native function calling is unavailable, \
             wrap a JSON object in <tool_call> tags:\n\n",
        );
        instructions.push_str(
            "```\n<tool_call>\n{\"name\": \"tool_name\", \"arguments\": {\"param\": \"value\"}}\n</tool_call>\n```\n\n",
        );
        instructions.push_str("Tool results come back in <tool_result> tags. ");
        instructions.push_str(
            "A failed result explains what went wrong; fix the arguments or choose another tool. ",
        );
        instructions.push_str("When you can answer, reply with plain text and no tool call.\n\n");
        instructions.push_str("### Available Tools\n\n");

        for descriptor in manifest {
            let _ = writeln!(instructions, "**{}**: {}", descriptor.name, descriptor.description);
            for (name, spec) in &descriptor.parameters {
                let _ = writeln!(
                    instructions,
                    "- `{}` ({}{}): {}",
                    name,
                    spec.param_type,
                    if spec.required { ", required" } else { "" },
                    spec.description
                );
            }
            instructions.push('\n');
        }

        instructions
    }

    fn get_runtime_context(&self) -> String {
        let timestamp = chrono::Local::now().format("%Y-%m-%d %H:%M (%A)");

        format!(
            "## Runtime Context

### Current Time
{}

### Workspace
{}",
            timestamp,
            self.workspace.display()
        )
    }

    fn get_dataset_context(&self) -> Option<String> {
        let preamble = self.dataset_preamble.as_deref()?.trim();
        if preamble.is_empty() {
            return None;
        }

        let body = if preamble.chars().count() > DATASET_MAX_CHARS {
            let truncated: String = preamble.chars().take(DATASET_MAX_CHARS).collect();
            format!("{truncated}\n\n[... truncated, use data_inspector for the full schema]")
        } else {
            preamble.to_string()
        };

        Some(format!("## Dataset\n\n{body}"))
    }

    pub fn build_messages(
        &self,
        history: &[ConversationTurn],
        manifest: &[CapabilityDescriptor],
        mode: DecisionMode,
    ) -> Vec<ChatMessage> {
        let mut messages = Vec::with_capacity(history.len() + 2);
        messages.push(ChatMessage::system(self.build_system_prompt(manifest)));

        for turn in history {
            messages.push(match turn.role {
                Role::User => ChatMessage::user(turn.content.clone()),
                Role::Assistant => ChatMessage::assistant(turn.content.clone()),
                Role::ToolObservation => {
                    ChatMessage::user(format!("<tool_result>\n{}\n</tool_result>", turn.content))
                }
            });
        }

        if mode == DecisionMode::FinalAnswer {
            messages.push(ChatMessage::user(FINAL_ANSWER_INSTRUCTION));
        }

        messages
    }
}
