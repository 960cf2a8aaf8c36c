use std::str::FromStr;
use std::{env, path::PathBuf};

use anyhow::{Context, anyhow, bail};
use async_trait::async_trait;
use dashmap::DashMap;
use tracing::{error, info};
use url::Url;

use crate::agent::ollama::DEFAULT_MODEL;
use crate::fetch::DEFAULT_MAX_CONCURRENCY;
use crate::flow::{MidFlowPolicy, SearchLimits};
use crate::search::ExtensionFilter;
use crate::search::vk::{DEFAULT_API_URL, DEFAULT_API_VERSION};

/// Source of raw string settings.
#[async_trait]
pub trait ConfigManagerType: Send + Sync {
    async fn get(&self, key: &str) -> Option<String>;
    fn clone_box(&self) -> Box<dyn ConfigManagerType>;
    fn debug_box(&self) -> String;
}

pub struct ConfigManager(pub Box<dyn ConfigManagerType>);

impl ConfigManager {
    pub async fn get(&self, key: &str) -> Option<String> {
        self.0.get(key).await
    }
}

impl Clone for ConfigManager {
    fn clone(&self) -> Self {
        ConfigManager(self.0.clone_box())
    }
}

impl std::fmt::Debug for ConfigManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0.debug_box())
    }
}

/// Reads settings from the process environment, after loading `env_file`.
/// Variables already set in the environment win over the file.
#[derive(Clone, Debug)]
pub struct EnvConfigManager {
    env_file: PathBuf,
}

impl EnvConfigManager {
    pub fn new(env_file: PathBuf) -> Box<Self> {
        if env_file.exists() {
            dotenvy::from_path(&env_file).ok();
            info!("Loaded .env from {}", env_file.display());
        } else {
            error!("could not load .env from {}", env_file.display())
        }

        Box::new(Self { env_file })
    }
}

#[async_trait]
impl ConfigManagerType for EnvConfigManager {
    async fn get(&self, key: &str) -> Option<String> {
        env::var(key).ok()
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("EnvConfigManager({})", self.env_file.display())
    }
}

/// In-memory settings, mostly for tests.
#[derive(Debug, Clone, Default)]
pub struct MapConfigManager {
    map: DashMap<String, String>,
}

impl MapConfigManager {
    pub fn new() -> Box<Self> {
        Box::new(Self::default())
    }

    pub fn from_pairs<'a>(pairs: impl IntoIterator<Item = (&'a str, &'a str)>) -> Box<Self> {
        let mgr = Self::default();
        for (k, v) in pairs {
            mgr.map.insert(k.to_string(), v.to_string());
        }
        Box::new(mgr)
    }
}

#[async_trait]
impl ConfigManagerType for MapConfigManager {
    async fn get(&self, key: &str) -> Option<String> {
        self.map.get(key).map(|v| v.clone())
    }

    fn clone_box(&self) -> Box<dyn ConfigManagerType> {
        Box::new(self.clone())
    }

    fn debug_box(&self) -> String {
        format!("MapConfigManager({} entries)", self.map.len())
    }
}

/// Every setting the bot reads at startup.
#[derive(Clone)]
pub struct BotSettings {
    pub telegram_token: String,
    pub vk_token: String,
    pub vk_api_url: Url,
    pub vk_api_version: String,
    pub ollama_url: Option<Url>,
    pub ollama_key: Option<String>,
    pub ollama_model: String,
    pub ollama_system_prompt: Option<String>,
    pub audio_limit: usize,
    pub document_limit: usize,
    pub document_overfetch: usize,
    pub document_extensions: ExtensionFilter,
    pub max_concurrent_fetches: usize,
    pub fetch_timeout_secs: u64,
    pub mid_flow_policy: MidFlowPolicy,
}

impl std::fmt::Debug for BotSettings {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BotSettings")
            .field("telegram_token", &"*******")
            .field("vk_token", &"*******")
            .field("vk_api_url", &self.vk_api_url.as_str())
            .field("vk_api_version", &self.vk_api_version)
            .field("ollama_url", &self.ollama_url.as_ref().map(Url::as_str))
            .field("ollama_model", &self.ollama_model)
            .field("audio_limit", &self.audio_limit)
            .field("document_limit", &self.document_limit)
            .field("document_overfetch", &self.document_overfetch)
            .field("document_extensions", &self.document_extensions.extensions())
            .field("max_concurrent_fetches", &self.max_concurrent_fetches)
            .field("fetch_timeout_secs", &self.fetch_timeout_secs)
            .field("mid_flow_policy", &self.mid_flow_policy)
            .finish()
    }
}

async fn optional(config: &ConfigManager, key: &str) -> Option<String> {
    config
        .get(key)
        .await
        .map(|v| v.trim().to_string())
        .filter(|v| !v.is_empty())
}

async fn required(config: &ConfigManager, key: &str) -> anyhow::Result<String> {
    match optional(config, key).await {
        Some(value) => Ok(value),
        None => bail!("missing required setting {key}"),
    }
}

async fn parsed<T>(config: &ConfigManager, key: &str, default: T) -> anyhow::Result<T>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match optional(config, key).await {
        Some(raw) => raw
            .parse::<T>()
            .map_err(|e| anyhow!("invalid value `{raw}` for {key}: {e}")),
        None => Ok(default),
    }
}

impl BotSettings {
    pub async fn load(config: &ConfigManager) -> anyhow::Result<Self> {
        let telegram_token = required(config, "TELEGRAM_TOKEN").await?;
        let vk_token = required(config, "VK_TOKEN").await?;

        let vk_api_url = optional(config, "VK_API_URL")
            .await
            .unwrap_or_else(|| DEFAULT_API_URL.to_string());
        let vk_api_url =
            Url::parse(&vk_api_url).with_context(|| format!("invalid VK_API_URL `{vk_api_url}`"))?;

        let ollama_url = match optional(config, "OLLAMA_URL").await {
            Some(raw) => {
                Some(Url::parse(&raw).with_context(|| format!("invalid OLLAMA_URL `{raw}`"))?)
            }
            None => None,
        };

        let document_extensions = match optional(config, "DOCUMENT_EXTENSIONS").await {
            Some(raw) => ExtensionFilter::parse(&raw),
            None => ExtensionFilter::default(),
        };
        if document_extensions.extensions().is_empty() {
            bail!("DOCUMENT_EXTENSIONS must name at least one extension");
        }

        let fetch_timeout_secs = parsed(config, "FETCH_TIMEOUT_SECS", 60u64).await?;
        if fetch_timeout_secs == 0 {
            bail!("FETCH_TIMEOUT_SECS must be greater than zero");
        }

        Ok(Self {
            telegram_token,
            vk_token,
            vk_api_url,
            vk_api_version: optional(config, "VK_API_VERSION")
                .await
                .unwrap_or_else(|| DEFAULT_API_VERSION.to_string()),
            ollama_url,
            ollama_key: optional(config, "OLLAMA_KEY").await,
            ollama_model: optional(config, "OLLAMA_MODEL")
                .await
                .unwrap_or_else(|| DEFAULT_MODEL.to_string()),
            ollama_system_prompt: optional(config, "OLLAMA_SYSTEM_PROMPT").await,
            audio_limit: parsed(config, "AUDIO_LIMIT", 5).await?,
            document_limit: parsed(config, "DOCUMENT_LIMIT", 5).await?,
            document_overfetch: parsed(config, "DOCUMENT_OVERFETCH", 20).await?,
            document_extensions,
            max_concurrent_fetches: parsed(
                config,
                "MAX_CONCURRENT_FETCHES",
                DEFAULT_MAX_CONCURRENCY,
            )
            .await?,
            fetch_timeout_secs,
            mid_flow_policy: parsed(config, "MID_FLOW_COMMANDS", MidFlowPolicy::default()).await?,
        })
    }

    /// Per-search limits handed to the flow services.
    pub fn search_limits(&self) -> SearchLimits {
        SearchLimits {
            audio_limit: self.audio_limit,
            document_limit: self.document_limit,
            document_overfetch: self.document_overfetch,
            document_filter: self.document_extensions.clone(),
            concurrency: 0,
        }
    }
}
