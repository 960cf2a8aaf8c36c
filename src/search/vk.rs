// src/search/vk.rs

use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde::de::DeserializeOwned;
use tracing::{debug, error};
use url::Url;

use super::{ResultDescriptor, SearchProvider};
use crate::error::{BotError, BotResult};

pub const DEFAULT_API_URL: &str = "https://api.vk.com/method/";
pub const DEFAULT_API_VERSION: &str = "5.131";

/// Authenticated VK session, established once at startup and shared
/// read-only by everything that talks to the API.
#[derive(Clone)]
pub struct ProviderSession {
    access_token: String,
    api_version: String,
    base_url: Url,
}

impl ProviderSession {
    pub fn new(
        access_token: impl Into<String>,
        api_version: impl Into<String>,
        mut base_url: Url,
    ) -> Arc<Self> {
        // `Url::join` drops the last segment unless the path ends with a slash
        if !base_url.path().ends_with('/') {
            let path = format!("{}/", base_url.path());
            base_url.set_path(&path);
        }
        Arc::new(Self {
            access_token: access_token.into(),
            api_version: api_version.into(),
            base_url,
        })
    }

    pub fn api_version(&self) -> &str {
        &self.api_version
    }

    fn method_url(&self, method: &str) -> BotResult<Url> {
        self.base_url
            .join(method)
            .map_err(|e| BotError::Provider(format!("bad method url for {method}: {e}")))
    }
}

impl fmt::Debug for ProviderSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ProviderSession")
            .field("access_token", &"*******")
            .field("api_version", &self.api_version)
            .field("base_url", &self.base_url.as_str())
            .finish()
    }
}

#[derive(Debug, Deserialize)]
struct VkEnvelope<T> {
    response: Option<T>,
    error: Option<VkApiError>,
}

#[derive(Debug, Deserialize)]
struct VkApiError {
    error_code: i64,
    #[serde(default)]
    error_msg: String,
}

#[derive(Debug, Deserialize)]
struct VkItems<T> {
    #[serde(default = "Vec::new")]
    items: Vec<T>,
}

#[derive(Debug, Deserialize)]
struct VkAudio {
    #[serde(default)]
    artist: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    duration: u32,
    #[serde(default)]
    url: String,
}

#[derive(Debug, Deserialize)]
struct VkDocument {
    #[serde(default)]
    title: String,
    #[serde(default)]
    ext: String,
    #[serde(default)]
    url: String,
}

/// Search provider backed by the VK HTTP API.
#[derive(Debug, Clone)]
pub struct VkSearchProvider {
    client: Client,
    session: Arc<ProviderSession>,
}

impl VkSearchProvider {
    pub fn new(client: Client, session: Arc<ProviderSession>) -> Self {
        Self { client, session }
    }

    async fn call<T: DeserializeOwned>(&self, method: &str, params: &[(&str, String)]) -> BotResult<T> {
        let url = self.session.method_url(method)?;
        let response = self
            .client
            .get(url)
            .query(params)
            .query(&[
                ("access_token", self.session.access_token.as_str()),
                ("v", self.session.api_version.as_str()),
            ])
            .send()
            .await
            .map_err(|e| provider_error(method, "request failed", e))?;

        let status = response.status();
        if !status.is_success() {
            error!(method, %status, "vk api rejected the request");
            return Err(BotError::Provider(format!("{method}: status {status}")));
        }

        let envelope: VkEnvelope<T> = response
            .json()
            .await
            .map_err(|e| provider_error(method, "malformed response", e))?;

        match envelope {
            VkEnvelope {
                error: Some(err), ..
            } => {
                error!(method, code = err.error_code, "vk api error: {}", err.error_msg);
                Err(BotError::Provider(format!(
                    "{method}: [{}] {}",
                    err.error_code, err.error_msg
                )))
            }
            VkEnvelope {
                response: Some(body),
                ..
            } => Ok(body),
            _ => Err(BotError::Provider(format!("{method}: empty response"))),
        }
    }
}

#[async_trait]
impl SearchProvider for VkSearchProvider {
    #[tracing::instrument(name = "vk_audio_search", skip(self))]
    async fn search_audio(&self, query: &str, count: usize) -> BotResult<Vec<ResultDescriptor>> {
        let found: VkItems<VkAudio> = self
            .call(
                "audio.search",
                &[("q", query.to_string()), ("count", count.to_string())],
            )
            .await?;

        let tracks: Vec<_> = found
            .items
            .into_iter()
            .filter(|t| !t.url.is_empty())
            .map(|t| {
                let author = Some(t.artist).filter(|a| !a.is_empty());
                let duration = Some(t.duration).filter(|d| *d > 0);
                ResultDescriptor::audio(normalize_audio_url(&t.url), t.title, author, duration)
            })
            .collect();
        debug!(query, found = tracks.len(), "audio search done");
        Ok(tracks)
    }

    #[tracing::instrument(name = "vk_docs_search", skip(self))]
    async fn search_documents(
        &self,
        query: &str,
        count: usize,
    ) -> BotResult<Vec<ResultDescriptor>> {
        let found: VkItems<VkDocument> = self
            .call(
                "docs.search",
                &[
                    ("q", query.to_string()),
                    ("search_own", "0".to_string()),
                    ("count", count.to_string()),
                ],
            )
            .await?;

        let docs: Vec<_> = found
            .items
            .into_iter()
            .filter(|d| !d.url.is_empty())
            .map(|d| ResultDescriptor::document(d.url, d.title, d.ext))
            .collect();
        debug!(query, found = docs.len(), "document search done");
        Ok(docs)
    }
}

/// The request url carries the access token, so it never goes into the error text.
fn provider_error(method: &str, what: &str, err: reqwest::Error) -> BotError {
    BotError::Provider(format!("{method}: {what}: {}", err.without_url()))
}

/// Audio urls carry a signed tail after the `.mp3` path; the file itself
/// is served without it.
pub fn normalize_audio_url(url: &str) -> String {
    match url.find("mp3") {
        Some(pos) => url[..pos + 3].to_string(),
        None => url.to_string(),
    }
}
