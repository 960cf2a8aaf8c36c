//! Conversation flows: command routing, per-session state and the step
//! actions that search, fetch and deliver.

use std::sync::Arc;

use tracing::warn;

use crate::channel::InboundMessage;
use crate::logger::instrument_request;

pub mod actions;
pub mod conversation;
pub mod router;
pub mod session;

pub use actions::{FlowReport, FlowServices, SearchLimits};
pub use conversation::{Conversation, ConversationState, Effect, MidFlowPolicy};
pub use router::{CommandRouter, FlowDefinition, FlowKind, StepAction, StepId};
pub use session::{SessionHandle, SessionStore};

/// Ties the router, the session store and the step actions together.
/// One instance serves every chat.
pub struct MediaBot {
    router: Arc<CommandRouter>,
    sessions: SessionStore,
    services: Arc<FlowServices>,
    policy: MidFlowPolicy,
}

impl MediaBot {
    pub fn new(
        router: CommandRouter,
        sessions: SessionStore,
        services: FlowServices,
        policy: MidFlowPolicy,
    ) -> Arc<Self> {
        Arc::new(Self {
            router: Arc::new(router),
            sessions,
            services: Arc::new(services),
            policy,
        })
    }

    pub fn sessions(&self) -> &SessionStore {
        &self.sessions
    }

    pub fn policy(&self) -> MidFlowPolicy {
        self.policy
    }

    pub async fn state_of(&self, session_id: &str) -> ConversationState {
        self.sessions.state_of(session_id).await
    }

    /// Handles one inbound message for `session_id` and returns a report
    /// for every step action it ran.
    ///
    /// The session lock is held until the last effect is done, so messages
    /// of one session are processed strictly one after another while
    /// other sessions proceed in parallel. The session stays leased for the
    /// whole call, so it cannot expire under a slow flow.
    #[tracing::instrument(name = "handle_message", skip(self, message))]
    pub async fn handle(&self, session_id: &str, message: InboundMessage) -> Vec<FlowReport> {
        let lease = self.sessions.checkout(session_id).await;
        let mut conversation = lease.handle().lock().await;

        let effects = conversation.handle(&self.router, self.policy, message);

        let mut reports = Vec::new();
        for effect in effects {
            match effect {
                Effect::Reply(text) => {
                    if let Err(err) = self.services.transport.send_text(session_id, &text).await {
                        warn!("could not send reply: {err}");
                    }
                }
                Effect::Run {
                    flow,
                    action,
                    input,
                } => {
                    let name = format!("flow.{}", flow.command());
                    let report = instrument_request(&name, || {
                        self.services.execute(session_id, flow, action, &input)
                    })
                    .await;
                    reports.push(report);
                }
            }
        }
        drop(conversation);
        lease.release().await;
        reports
    }
}

impl std::fmt::Debug for MediaBot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MediaBot")
            .field("commands", &self.router.commands())
            .field("policy", &self.policy)
            .finish()
    }
}
