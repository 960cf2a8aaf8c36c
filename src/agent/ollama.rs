use std::time::Duration;

use async_trait::async_trait;
use ollama_rs::Ollama;
use ollama_rs::generation::completion::request::GenerationRequest;
use reqwest::header::{AUTHORIZATION, HeaderMap, HeaderValue};
use tracing::{error, info};
use url::Url;

use super::TextGenerator;
use crate::error::{BotError, BotResult};

pub const DEFAULT_MODEL: &str = "llama3.2";
const DEFAULT_PORT: u16 = 11434;

// --------------------------------------------------------------------------------
// OllamaGenerator wraps ollama-rs plain generation
// --------------------------------------------------------------------------------

/// `OllamaGenerator` asks an Ollama server to complete a prompt.
/// Without a url the local default server is used.
/// With a key a Bearer token is sent on every request.
pub struct OllamaGenerator {
    client: Ollama,
    model: String,
    system_prompt: Option<String>,
}

impl OllamaGenerator {
    pub fn new(
        url: Option<Url>,
        key: Option<String>,
        model: impl Into<String>,
        system_prompt: Option<String>,
    ) -> anyhow::Result<Self> {
        Ok(Self {
            client: build_ollama_client(url, key)?,
            model: model.into(),
            system_prompt,
        })
    }

    pub fn model(&self) -> &str {
        &self.model
    }
}

impl std::fmt::Debug for OllamaGenerator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("OllamaGenerator")
            .field("model", &self.model)
            .field("system_prompt", &self.system_prompt.is_some())
            .finish()
    }
}

fn build_ollama_client(url: Option<Url>, key: Option<String>) -> anyhow::Result<Ollama> {
    let Some(url) = url else {
        return Ok(Ollama::default());
    };
    if !matches!(url.scheme(), "http" | "https") || !url.has_host() {
        anyhow::bail!("OLLAMA_URL must be an http(s) url with a host: {url}");
    }
    let port = url.port_or_known_default().unwrap_or(DEFAULT_PORT);

    let mut headers = HeaderMap::new();
    if let Some(key) = key {
        let value = HeaderValue::from_str(&format!("Bearer {key}"))
            .map_err(|e| anyhow::anyhow!("OLLAMA_KEY is not a valid header value: {e}"))?;
        headers.insert(AUTHORIZATION, value);
    }

    let client = reqwest::Client::builder()
        .default_headers(headers)
        .timeout(Duration::from_secs(60))
        .build()?;
    Ok(Ollama::builder()
        .host(url)
        .port(port)
        .reqwest_client(client)
        .build())
}

#[async_trait]
impl TextGenerator for OllamaGenerator {
    #[tracing::instrument(name = "ollama_generate", skip(self, prompt), fields(model = %self.model))]
    async fn generate(&self, prompt: &str) -> BotResult<String> {
        let prompt = prompt.trim();
        if prompt.is_empty() {
            return Err(BotError::Generation("empty prompt".into()));
        }

        let mut request = GenerationRequest::new(self.model.clone(), prompt.to_string());
        if let Some(system) = &self.system_prompt {
            request = request.system(system.clone());
        }

        let response = self.client.generate(request).await.map_err(|e| {
            error!("ollama gave error: {e}");
            BotError::Generation(e.to_string())
        })?;

        let text = response.response.trim().to_string();
        if text.is_empty() {
            return Err(BotError::Generation("model returned an empty answer".into()));
        }
        info!(chars = text.chars().count(), "generated answer");
        Ok(text)
    }
}
