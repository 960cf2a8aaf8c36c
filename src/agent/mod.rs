//! Text generation backends used by the `/generate` flow.
//!
//! The flow only sees the [`TextGenerator`] trait; [`ollama::OllamaGenerator`]
//! is the implementation wired up at startup.

use async_trait::async_trait;

use crate::error::BotResult;

pub mod ollama;

pub use ollama::OllamaGenerator;

/// Turns a prompt into generated text. May take seconds; callers await it
/// inside the flow step and block that session until it returns.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> BotResult<String>;
}
