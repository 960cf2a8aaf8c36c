// src/fetch/mod.rs

use std::fmt;

use async_trait::async_trait;
use reqwest::Client;
use tracing::{debug, warn};

use crate::error::{BotError, RetrievalKind};
use crate::search::{ResultDescriptor, ResultKind};

pub mod dispatcher;

pub use dispatcher::{DEFAULT_MAX_CONCURRENCY, DispatchedOutcome, Dispatcher, in_input_order};

/// A fetched payload together with what the transport needs to present it.
#[derive(Clone, PartialEq, Eq)]
pub struct Artifact {
    pub descriptor: ResultDescriptor,
    pub payload: Vec<u8>,
    pub file_name: String,
}

impl Artifact {
    pub fn new(descriptor: ResultDescriptor, payload: Vec<u8>) -> Self {
        let file_name = file_name_for(&descriptor);
        Self {
            descriptor,
            payload,
            file_name,
        }
    }
}

impl fmt::Debug for Artifact {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Artifact")
            .field("file_name", &self.file_name)
            .field("locator", &self.descriptor.locator)
            .field("bytes", &self.payload.len())
            .finish()
    }
}

/// Which descriptor could not be retrieved, and why.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetrievalFailure {
    pub descriptor: ResultDescriptor,
    pub kind: RetrievalKind,
}

impl From<RetrievalFailure> for BotError {
    fn from(failure: RetrievalFailure) -> Self {
        BotError::Retrieval {
            title: failure.descriptor.display_name(),
            kind: failure.kind,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Fetched(Artifact),
    Failed(RetrievalFailure),
}

impl FetchOutcome {
    pub fn is_fetched(&self) -> bool {
        matches!(self, FetchOutcome::Fetched(_))
    }

    pub fn descriptor(&self) -> &ResultDescriptor {
        match self {
            FetchOutcome::Fetched(artifact) => &artifact.descriptor,
            FetchOutcome::Failed(failure) => &failure.descriptor,
        }
    }
}

/// Retrieves the payload named by one descriptor.
///
/// Errors are values: implementations never panic or return early past
/// their own boundary, they report a `FetchOutcome::Failed` instead.
#[async_trait]
pub trait Fetcher: Send + Sync {
    async fn fetch(&self, descriptor: &ResultDescriptor) -> FetchOutcome;
}

/// Plain HTTP `GET` fetcher. Timeouts come from the client it is given.
#[derive(Debug, Clone)]
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    async fn download(&self, locator: &str) -> Result<Vec<u8>, RetrievalKind> {
        let response = self.client.get(locator).send().await.map_err(classify)?;
        let status = response.status();
        if !status.is_success() {
            return Err(RetrievalKind::Status(status.as_u16()));
        }
        let body = response.bytes().await.map_err(|e| {
            if e.is_timeout() {
                RetrievalKind::Timeout
            } else {
                RetrievalKind::Body(e.to_string())
            }
        })?;
        Ok(body.to_vec())
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    #[tracing::instrument(name = "fetch", skip_all, fields(locator = %descriptor.locator))]
    async fn fetch(&self, descriptor: &ResultDescriptor) -> FetchOutcome {
        match self.download(&descriptor.locator).await {
            Ok(payload) => {
                debug!(bytes = payload.len(), "fetched");
                FetchOutcome::Fetched(Artifact::new(descriptor.clone(), payload))
            }
            Err(kind) => {
                warn!(error = %kind, "fetch failed");
                FetchOutcome::Failed(RetrievalFailure {
                    descriptor: descriptor.clone(),
                    kind,
                })
            }
        }
    }
}

fn classify(err: reqwest::Error) -> RetrievalKind {
    if err.is_timeout() {
        RetrievalKind::Timeout
    } else {
        RetrievalKind::Transport(err.to_string())
    }
}

fn file_name_for(descriptor: &ResultDescriptor) -> String {
    let base = match descriptor.kind {
        ResultKind::Audio => descriptor.display_name(),
        ResultKind::Document => descriptor.title.clone(),
    };
    let base = base.replace(['/', '\\'], "_");
    let ext = descriptor
        .format
        .as_deref()
        .map(|e| e.trim().trim_start_matches('.').to_ascii_lowercase())
        .filter(|e| !e.is_empty());

    match ext {
        Some(ext) if base.to_ascii_lowercase().ends_with(&format!(".{ext}")) => base,
        Some(ext) => format!("{base}.{ext}"),
        None => base,
    }
}
