// src/apps.rs
use std::{fs, path::Path, sync::Arc, time::Duration};

use anyhow::{Context, Error, Result, anyhow};
use reqwest::Client;
use tracing::{error, info};

use crate::{
    agent::OllamaGenerator,
    channel::{ChatTransport, TelegramTransport, telegram::run_polling},
    config::{BotSettings, ConfigManager},
    fetch::{Dispatcher, HttpFetcher},
    flow::{CommandRouter, FlowServices, MediaBot, SessionStore},
    search::vk::{ProviderSession, VkSearchProvider},
};

/// Template written by `mediabot init`.
pub const ENV_TEMPLATE: &str = "\
# Required
TELEGRAM_TOKEN=
VK_TOKEN=

# VK API
#VK_API_URL=https://api.vk.com/method/
#VK_API_VERSION=5.131

# Text generation
#OLLAMA_URL=http://localhost:11434
#OLLAMA_KEY=
#OLLAMA_MODEL=llama3.2
#OLLAMA_SYSTEM_PROMPT=

# Search and delivery
#AUDIO_LIMIT=5
#DOCUMENT_LIMIT=5
#DOCUMENT_OVERFETCH=20
#DOCUMENT_EXTENSIONS=fb2,epub,pdf,doc,docx
#MAX_CONCURRENT_FETCHES=8
#FETCH_TIMEOUT_SECS=60

# replace | reject | text
#MID_FLOW_COMMANDS=replace
";

#[derive(Default)]
pub struct App {
    core: Option<Arc<MediaBot>>,
    transport: Option<TelegramTransport>,
}

impl App {
    pub fn new() -> Self {
        Self::default()
    }

    /// Bootstraps the bot:
    ///   - loads settings from `config`
    ///   - builds the search provider, fetcher and generator
    ///   - wires them to the Telegram transport
    pub async fn bootstrap(&mut self, session_timeout: u64, config: ConfigManager) -> Result<(), Error> {
        let settings = match BotSettings::load(&config).await {
            Ok(settings) => settings,
            Err(err) => {
                error!("Could not load settings because {:#}", err);
                return Err(err);
            }
        };
        info!(?settings, "settings loaded");

        let transport = TelegramTransport::new(settings.telegram_token.clone());
        let services = build_services(&settings, Arc::new(transport.clone()))?;

        self.core = Some(MediaBot::new(
            CommandRouter::with_default_flows(),
            SessionStore::new(session_timeout),
            services,
            settings.mid_flow_policy,
        ));
        self.transport = Some(transport);
        Ok(())
    }

    pub fn core(&self) -> Option<Arc<MediaBot>> {
        self.core.clone()
    }

    /// Polls Telegram until Ctrl-C.
    pub async fn run(&self) -> Result<()> {
        let (Some(core), Some(transport)) = (self.core.clone(), self.transport.clone()) else {
            return Err(anyhow!("run called before bootstrap"));
        };

        tokio::select! {
            _ = run_polling(transport, core) => {
                error!("Telegram polling stopped unexpectedly");
            }
            res = tokio::signal::ctrl_c() => {
                res.context("waiting for Ctrl-C")?;
                info!("Ctrl-C received");
            }
        }
        Ok(())
    }

    pub fn shutdown(&self) {
        if let Some(core) = self.core.as_ref() {
            core.sessions().clear();
        }
    }
}

/// Builds the flow services from settings. `transport` receives every
/// outgoing message.
pub fn build_services(settings: &BotSettings, transport: Arc<dyn ChatTransport>) -> Result<FlowServices> {
    let vk_client = Client::builder()
        .timeout(Duration::from_secs(settings.fetch_timeout_secs))
        .build()
        .context("building VK client")?;
    let session = ProviderSession::new(
        settings.vk_token.clone(),
        settings.vk_api_version.clone(),
        settings.vk_api_url.clone(),
    );
    let search = Arc::new(VkSearchProvider::new(vk_client, session));

    let fetch_client = Client::builder()
        .timeout(Duration::from_secs(settings.fetch_timeout_secs))
        .build()
        .context("building fetch client")?;
    let dispatcher = Dispatcher::new(
        Arc::new(HttpFetcher::new(fetch_client)),
        settings.max_concurrent_fetches,
    );

    let generator = Arc::new(OllamaGenerator::new(
        settings.ollama_url.clone(),
        settings.ollama_key.clone(),
        settings.ollama_model.clone(),
        settings.ollama_system_prompt.clone(),
    )?);

    Ok(FlowServices {
        search,
        dispatcher,
        generator,
        transport,
        limits: settings.search_limits(),
    })
}

/// Called when user runs `mediabot init`
pub async fn cmd_init(root: &Path) -> Result<(), Error> {
    for d in ["config", "logs"] {
        let path = root.join(d);
        fs::create_dir_all(&path).with_context(|| format!("failed to create {}", path.display()))?;
    }

    let conf_path = root.join("config/.env");
    if !conf_path.exists() {
        fs::write(&conf_path, ENV_TEMPLATE)
            .with_context(|| format!("failed to write {}", conf_path.display()))?;
        println!("Created {}", conf_path.display());
    } else {
        println!("Skipping {}, already exists", conf_path.display());
    }
    Ok(())
}
