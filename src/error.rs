use thiserror::Error;

/// Why a single payload could not be retrieved.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RetrievalKind {
    #[error("timed out")]
    Timeout,

    #[error("transport error: {0}")]
    Transport(String),

    #[error("remote answered with status {0}")]
    Status(u16),

    #[error("could not read body: {0}")]
    Body(String),

    /// The worker task died before producing an outcome.
    #[error("worker aborted: {0}")]
    Aborted(String),
}

/// Failures a flow can run into. None of them is fatal to the process;
/// each one is confined to the session whose flow produced it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum BotError {
    /// One result could not be fetched. Recovered locally by dropping it.
    #[error("could not retrieve `{title}`: {kind}")]
    Retrieval { title: String, kind: RetrievalKind },

    /// The chat transport rejected an outgoing message or artifact.
    #[error("delivery failed: {0}")]
    Delivery(String),

    /// The search call itself failed before any fetch began.
    #[error("search provider failed: {0}")]
    Provider(String),

    /// The query produced nothing deliverable.
    #[error("nothing found for `{0}`")]
    NoResults(String),

    #[error("text generation failed: {0}")]
    Generation(String),
}

pub type BotResult<T> = Result<T, BotError>;

impl BotError {
    /// Short notice shown to the user when this error ends a flow.
    pub fn user_notice(&self) -> String {
        match self {
            BotError::NoResults(query) if query.is_empty() => "Nothing to search for.".to_string(),
            BotError::NoResults(query) => format!("Nothing found for \"{query}\"."),
            BotError::Provider(_) => "Search is unavailable right now, try again later.".to_string(),
            BotError::Generation(_) => "Could not generate an answer right now.".to_string(),
            BotError::Retrieval { title, .. } => format!("Could not download \"{title}\"."),
            BotError::Delivery(_) => "Could not send the result.".to_string(),
        }
    }
}
