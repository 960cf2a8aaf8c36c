// flow/router.rs

use std::collections::HashMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

/// Universal command that leaves the active flow.
pub const CANCEL_COMMAND: &str = "cancel";

/// The fixed set of commands the bot understands.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FlowKind {
    Start,
    Help,
    Audio,
    Document,
    Generate,
}

impl FlowKind {
    pub const ALL: [FlowKind; 5] = [
        FlowKind::Start,
        FlowKind::Help,
        FlowKind::Audio,
        FlowKind::Document,
        FlowKind::Generate,
    ];

    pub fn command(&self) -> &'static str {
        match self {
            FlowKind::Start => "start",
            FlowKind::Help => "help",
            FlowKind::Audio => "audio",
            FlowKind::Document => "document",
            FlowKind::Generate => "generate",
        }
    }
}

/// A step a flow can wait on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepId {
    AwaitingQuery,
    AwaitingPrompt,
}

/// The work a step performs with the user's reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StepAction {
    SearchAudio,
    SearchDocuments,
    GenerateText,
}

/// Static description of one command's conversation. Built once at startup
/// and shared read-only by every session.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowDefinition {
    pub kind: FlowKind,
    /// Sent when the command is issued.
    pub entry_prompt: String,
    /// `None` for informational commands that answer and finish at once.
    pub entry_step: Option<StepId>,
    pub steps: HashMap<StepId, StepAction>,
    pub cancel_reply: String,
}

impl FlowDefinition {
    /// A command that only replies with `text`.
    pub fn informational(kind: FlowKind, text: impl Into<String>) -> Self {
        Self {
            kind,
            entry_prompt: text.into(),
            entry_step: None,
            steps: HashMap::new(),
            cancel_reply: String::new(),
        }
    }

    /// A prompt followed by exactly one reply handled by `action`.
    pub fn single_step(
        kind: FlowKind,
        prompt: impl Into<String>,
        step: StepId,
        action: StepAction,
        cancel_reply: impl Into<String>,
    ) -> Self {
        Self {
            kind,
            entry_prompt: prompt.into(),
            entry_step: Some(step),
            steps: HashMap::from([(step, action)]),
            cancel_reply: cancel_reply.into(),
        }
    }

    pub fn command(&self) -> &'static str {
        self.kind.command()
    }

    pub fn is_interactive(&self) -> bool {
        self.entry_step.is_some()
    }

    pub fn action(&self, step: StepId) -> Option<StepAction> {
        self.steps.get(&step).copied()
    }
}

pub const START_TEXT: &str = "This bot works with the VK API.\n\
/audio - search music\n\
/document - search documents\n\
/generate - generate text";

pub const HELP_TEXT: &str = "Available commands:\n\
/audio - search music\n\
/document - search documents (fb2, epub, pdf, doc, docx)\n\
/generate - generate text from a prompt\n\
/cancel - cancel the current action";

pub const CANCELLED_TEXT: &str = "Action cancelled";

/// Maps command names to flow definitions.
#[derive(Debug, Clone, Default)]
pub struct CommandRouter {
    flows: HashMap<String, Arc<FlowDefinition>>,
}

impl CommandRouter {
    /// An empty router.
    pub fn new() -> Self {
        Self::default()
    }

    /// The router with every built-in command registered.
    pub fn with_default_flows() -> Self {
        let mut router = Self::new();
        router.register(FlowDefinition::informational(FlowKind::Start, START_TEXT));
        router.register(FlowDefinition::informational(FlowKind::Help, HELP_TEXT));
        router.register(FlowDefinition::single_step(
            FlowKind::Audio,
            "Enter a track name or /cancel:",
            StepId::AwaitingQuery,
            StepAction::SearchAudio,
            CANCELLED_TEXT,
        ));
        router.register(FlowDefinition::single_step(
            FlowKind::Document,
            "Enter a document name or /cancel:",
            StepId::AwaitingQuery,
            StepAction::SearchDocuments,
            CANCELLED_TEXT,
        ));
        router.register(FlowDefinition::single_step(
            FlowKind::Generate,
            "Enter a prompt or /cancel:",
            StepId::AwaitingPrompt,
            StepAction::GenerateText,
            CANCELLED_TEXT,
        ));
        router
    }

    /// Registers `flow` under its command name, replacing any earlier entry.
    pub fn register(&mut self, flow: FlowDefinition) {
        self.flows.insert(flow.command().to_string(), Arc::new(flow));
    }

    /// Looks up the flow started by `command`.
    pub fn route(&self, command: &str) -> Option<Arc<FlowDefinition>> {
        self.flows.get(command).cloned()
    }

    /// Looks up the definition of an already known flow.
    pub fn definition(&self, kind: FlowKind) -> Option<Arc<FlowDefinition>> {
        self.route(kind.command())
    }

    /// Registered command names, sorted.
    pub fn commands(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.flows.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }
}
