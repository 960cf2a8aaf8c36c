// src/fetch/dispatcher.rs

use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tracing::{error, info};

use super::{FetchOutcome, Fetcher, RetrievalFailure};
use crate::error::RetrievalKind;
use crate::search::ResultDescriptor;

/// Hard ceiling on fetches in flight for one dispatch.
pub const DEFAULT_MAX_CONCURRENCY: usize = 8;

/// An outcome paired with the position of its descriptor in the input.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DispatchedOutcome {
    pub index: usize,
    pub outcome: FetchOutcome,
}

/// Runs one fetch per descriptor on a bounded pool and waits for all of them.
#[derive(Clone)]
pub struct Dispatcher {
    fetcher: Arc<dyn Fetcher>,
    ceiling: usize,
}

impl Dispatcher {
    pub fn new(fetcher: Arc<dyn Fetcher>, ceiling: usize) -> Self {
        Self {
            fetcher,
            ceiling: ceiling.max(1),
        }
    }

    pub fn ceiling(&self) -> usize {
        self.ceiling
    }

    /// `0` asks for one worker per descriptor; the result is always capped
    /// by the ceiling and never below one.
    pub fn effective_concurrency(&self, requested: usize, count: usize) -> usize {
        let wanted = if requested == 0 { count } else { requested };
        wanted.min(self.ceiling).max(1)
    }

    /// Fetches every descriptor with at most `concurrency` fetches in flight.
    ///
    /// Returns exactly one outcome per descriptor once every worker has
    /// finished. A failing or panicking worker does not affect its siblings;
    /// it shows up as a `Failed` outcome.
    #[tracing::instrument(name = "dispatch", skip(self, descriptors), fields(count = descriptors.len()))]
    pub async fn dispatch(
        &self,
        descriptors: Vec<ResultDescriptor>,
        concurrency: usize,
    ) -> Vec<DispatchedOutcome> {
        let limit = self.effective_concurrency(concurrency, descriptors.len());
        let slots = Arc::new(Semaphore::new(limit));

        let workers: Vec<(usize, ResultDescriptor, JoinHandle<FetchOutcome>)> = descriptors
            .into_iter()
            .enumerate()
            .map(|(index, descriptor)| {
                let fetcher = Arc::clone(&self.fetcher);
                let slots = Arc::clone(&slots);
                let job = descriptor.clone();
                let handle = tokio::spawn(async move {
                    // held until the fetch returns
                    let _slot = slots.acquire_owned().await;
                    fetcher.fetch(&job).await
                });
                (index, descriptor, handle)
            })
            .collect();

        let mut outcomes = Vec::with_capacity(workers.len());
        for (index, descriptor, handle) in workers {
            let outcome = match handle.await {
                Ok(outcome) => outcome,
                Err(err) => {
                    error!(index, locator = %descriptor.locator, "fetch worker died: {err}");
                    FetchOutcome::Failed(RetrievalFailure {
                        descriptor,
                        kind: RetrievalKind::Aborted(err.to_string()),
                    })
                }
            };
            outcomes.push(DispatchedOutcome { index, outcome });
        }

        let fetched = outcomes.iter().filter(|o| o.outcome.is_fetched()).count();
        info!(limit, fetched, failed = outcomes.len() - fetched, "dispatch joined");
        outcomes
    }
}

/// Sorts outcomes back into the order their descriptors were submitted.
pub fn in_input_order(mut outcomes: Vec<DispatchedOutcome>) -> Vec<DispatchedOutcome> {
    outcomes.sort_by_key(|o| o.index);
    outcomes
}
