// flow/actions.rs

use std::sync::Arc;

use tracing::{info, warn};

use super::router::{FlowKind, StepAction};
use crate::agent::TextGenerator;
use crate::channel::ChatTransport;
use crate::error::{BotError, BotResult};
use crate::fetch::{Artifact, Dispatcher, FetchOutcome, in_input_order};
use crate::logger::RequestStatus;
use crate::search::{self, ExtensionFilter, ResultKind, SearchProvider, SearchQuery};

/// How much each search flow asks for and delivers.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchLimits {
    pub audio_limit: usize,
    pub document_limit: usize,
    /// Raw documents requested per search; most get filtered out.
    pub document_overfetch: usize,
    pub document_filter: ExtensionFilter,
    /// Fetches in flight per search. `0` means one per result.
    pub concurrency: usize,
}

impl Default for SearchLimits {
    fn default() -> Self {
        Self {
            audio_limit: 5,
            document_limit: 5,
            document_overfetch: 20,
            document_filter: ExtensionFilter::default(),
            concurrency: 0,
        }
    }
}

/// What one step action did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowReport {
    pub flow: FlowKind,
    /// Items selected for delivery.
    pub requested: usize,
    pub delivered: usize,
    pub retrieval_failures: usize,
    pub delivery_failures: usize,
    /// Set when the flow stopped before delivering anything.
    pub aborted: Option<BotError>,
}

impl FlowReport {
    fn new(flow: FlowKind) -> Self {
        Self {
            flow,
            requested: 0,
            delivered: 0,
            retrieval_failures: 0,
            delivery_failures: 0,
            aborted: None,
        }
    }

    pub fn is_aborted(&self) -> bool {
        self.aborted.is_some()
    }
}

impl RequestStatus for FlowReport {
    fn status(&self) -> &'static str {
        match &self.aborted {
            Some(BotError::NoResults(_)) => "no_results",
            Some(_) => "error",
            None if self.delivered < self.requested => "partial",
            None => "ok",
        }
    }
}

/// Collaborators the step actions work with. Built once at startup.
#[derive(Clone)]
pub struct FlowServices {
    pub search: Arc<dyn SearchProvider>,
    pub dispatcher: Dispatcher,
    pub generator: Arc<dyn TextGenerator>,
    pub transport: Arc<dyn ChatTransport>,
    pub limits: SearchLimits,
}

impl FlowServices {
    /// Performs `action` for `session_id` with the user's `input`.
    pub async fn execute(
        &self,
        session_id: &str,
        flow: FlowKind,
        action: StepAction,
        input: &str,
    ) -> FlowReport {
        match action {
            StepAction::SearchAudio => {
                let query = SearchQuery::audio(input, self.limits.audio_limit);
                self.search_and_deliver(session_id, flow, ResultKind::Audio, query)
                    .await
            }
            StepAction::SearchDocuments => {
                let query = SearchQuery::documents(
                    input,
                    self.limits.document_limit,
                    self.limits.document_overfetch,
                    self.limits.document_filter.clone(),
                );
                self.search_and_deliver(session_id, flow, ResultKind::Document, query)
                    .await
            }
            StepAction::GenerateText => self.generate_and_deliver(session_id, flow, input).await,
        }
    }

    /// Sends a short notice; a failure here is only logged.
    pub async fn notify(&self, session_id: &str, text: &str) {
        if let Err(err) = self.transport.send_text(session_id, text).await {
            warn!(session_id, "could not send notice: {err}");
        }
    }

    async fn search_and_deliver(
        &self,
        session_id: &str,
        flow: FlowKind,
        kind: ResultKind,
        query: SearchQuery,
    ) -> FlowReport {
        let mut report = FlowReport::new(flow);

        let selected = match search::run_query(self.search.as_ref(), kind, &query).await {
            Ok(selected) => selected,
            Err(err) => {
                info!(session_id, flow = flow.command(), "flow aborted: {err}");
                self.notify(session_id, &err.user_notice()).await;
                report.aborted = Some(err);
                return report;
            }
        };
        report.requested = selected.len();

        let outcomes = self
            .dispatcher
            .dispatch(selected, self.limits.concurrency)
            .await;

        for dispatched in in_input_order(outcomes) {
            match dispatched.outcome {
                FetchOutcome::Fetched(artifact) => {
                    match self.deliver(session_id, kind, artifact).await {
                        Ok(()) => report.delivered += 1,
                        Err(err) => {
                            warn!(session_id, index = dispatched.index, "{err}");
                            report.delivery_failures += 1;
                        }
                    }
                }
                FetchOutcome::Failed(failure) => {
                    let err = BotError::from(failure);
                    warn!(session_id, index = dispatched.index, "{err}");
                    report.retrieval_failures += 1;
                }
            }
        }

        if report.retrieval_failures == report.requested {
            self.notify(session_id, "Could not download any of the results.")
                .await;
        }
        report
    }

    async fn deliver(&self, session_id: &str, kind: ResultKind, artifact: Artifact) -> BotResult<()> {
        match kind {
            ResultKind::Audio => self.transport.send_audio(session_id, artifact).await,
            ResultKind::Document => self.transport.send_document(session_id, artifact).await,
        }
    }

    async fn generate_and_deliver(&self, session_id: &str, flow: FlowKind, prompt: &str) -> FlowReport {
        let mut report = FlowReport::new(flow);
        report.requested = 1;

        match self.generator.generate(prompt).await {
            Ok(text) => match self.transport.send_text(session_id, &text).await {
                Ok(()) => report.delivered = 1,
                Err(err) => {
                    warn!(session_id, "{err}");
                    report.delivery_failures = 1;
                }
            },
            Err(err) => {
                info!(session_id, "generation failed: {err}");
                self.notify(session_id, &err.user_notice()).await;
                report.aborted = Some(err);
            }
        }
        report
    }
}
