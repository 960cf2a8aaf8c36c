// flow/conversation.rs

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::router::{CANCEL_COMMAND, CommandRouter, FlowDefinition, FlowKind, StepAction, StepId};
use crate::channel::InboundMessage;

/// Where a session currently is. A session waits on at most one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(tag = "state", rename_all = "snake_case")]
pub enum ConversationState {
    #[default]
    Idle,
    AwaitingInput { flow: FlowKind, step: StepId },
}

impl ConversationState {
    pub fn is_idle(&self) -> bool {
        matches!(self, ConversationState::Idle)
    }

    pub fn active_flow(&self) -> Option<FlowKind> {
        match self {
            ConversationState::Idle => None,
            ConversationState::AwaitingInput { flow, .. } => Some(*flow),
        }
    }
}

/// What happens to a flow-starting command sent while another flow waits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MidFlowPolicy {
    /// Abandon the waiting flow and start the new one.
    #[default]
    Replace,
    /// Keep the waiting flow and ask the user to answer or cancel.
    Reject,
    /// Hand the command text to the waiting step as its answer.
    Text,
}

impl FromStr for MidFlowPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "replace" => Ok(MidFlowPolicy::Replace),
            "reject" => Ok(MidFlowPolicy::Reject),
            "text" | "as_text" => Ok(MidFlowPolicy::Text),
            other => Err(format!(
                "unknown mid-flow policy `{other}` (expected replace, reject or text)"
            )),
        }
    }
}

impl fmt::Display for MidFlowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            MidFlowPolicy::Replace => "replace",
            MidFlowPolicy::Reject => "reject",
            MidFlowPolicy::Text => "text",
        })
    }
}

/// Side effects a transition asks the caller to perform, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Effect {
    /// Send a text message to the session.
    Reply(String),
    /// Execute a step action with the user's input.
    Run {
        flow: FlowKind,
        action: StepAction,
        input: String,
    },
}

/// Per-session state machine.
///
/// Not thread-safe on its own: the session store serialises access so that
/// only one message per session is handled at a time.
#[derive(Debug, Default)]
pub struct Conversation {
    state: ConversationState,
}

pub fn unknown_command_hint(name: &str) -> String {
    format!("Unknown command /{name}. Send /help to see what I can do.")
}

fn busy_hint(flow: FlowKind) -> String {
    format!(
        "Still waiting for your /{} answer. Reply to it or send /cancel.",
        flow.command()
    )
}

impl Conversation {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> ConversationState {
        self.state
    }

    pub fn is_idle(&self) -> bool {
        self.state.is_idle()
    }

    /// Applies one inbound message and returns the effects to perform.
    ///
    /// A `Run` effect is always the last one; by the time it is returned the
    /// conversation has already folded back to `Idle`.
    pub fn handle(
        &mut self,
        router: &CommandRouter,
        policy: MidFlowPolicy,
        message: InboundMessage,
    ) -> Vec<Effect> {
        match self.state {
            ConversationState::Idle => self.on_idle(router, message),
            ConversationState::AwaitingInput { flow, step } => {
                self.on_awaiting(router, policy, flow, step, message)
            }
        }
    }

    fn on_idle(&mut self, router: &CommandRouter, message: InboundMessage) -> Vec<Effect> {
        match message {
            InboundMessage::Command { name, .. } if name == CANCEL_COMMAND => {
                debug!("cancel while idle ignored");
                Vec::new()
            }
            InboundMessage::Command { name, .. } => match router.route(&name) {
                Some(definition) => self.enter(&definition),
                None => vec![Effect::Reply(unknown_command_hint(&name))],
            },
            InboundMessage::Text(_) => {
                debug!("text outside of a flow ignored");
                Vec::new()
            }
        }
    }

    fn on_awaiting(
        &mut self,
        router: &CommandRouter,
        policy: MidFlowPolicy,
        flow: FlowKind,
        step: StepId,
        message: InboundMessage,
    ) -> Vec<Effect> {
        let active = router.definition(flow);

        let name = match &message {
            InboundMessage::Command { name, .. } => name.clone(),
            InboundMessage::Text(text) => return self.complete(active.as_deref(), step, text.clone()),
        };

        if name == CANCEL_COMMAND {
            info!(flow = flow.command(), "flow cancelled");
            self.state = ConversationState::Idle;
            let reply = active
                .map(|d| d.cancel_reply.clone())
                .filter(|r| !r.is_empty());
            return reply.map(Effect::Reply).into_iter().collect();
        }

        if policy == MidFlowPolicy::Text {
            return self.complete(active.as_deref(), step, message.raw().to_string());
        }

        match router.route(&name) {
            Some(definition) if !definition.is_interactive() => {
                vec![Effect::Reply(definition.entry_prompt.clone())]
            }
            Some(definition) => match policy {
                MidFlowPolicy::Replace => {
                    info!(
                        from = flow.command(),
                        to = definition.command(),
                        "flow replaced by a new command"
                    );
                    self.enter(&definition)
                }
                _ => vec![Effect::Reply(busy_hint(flow))],
            },
            None => vec![Effect::Reply(unknown_command_hint(&name))],
        }
    }

    fn enter(&mut self, definition: &FlowDefinition) -> Vec<Effect> {
        self.state = match definition.entry_step {
            Some(step) => ConversationState::AwaitingInput {
                flow: definition.kind,
                step,
            },
            None => ConversationState::Idle,
        };
        vec![Effect::Reply(definition.entry_prompt.clone())]
    }

    fn complete(
        &mut self,
        definition: Option<&FlowDefinition>,
        step: StepId,
        input: String,
    ) -> Vec<Effect> {
        self.state = ConversationState::Idle;
        match definition.and_then(|d| d.action(step).map(|a| (d.kind, a))) {
            Some((flow, action)) => vec![Effect::Run {
                flow,
                action,
                input,
            }],
            None => Vec::new(),
        }
    }
}
