// # changebot - headless Changebot consumer
//
// A thin integration layer over changebot-core: it connects one provider,
// reads its state the way a badge or toast would, prints it, and optionally
// records a view. No changelog logic lives here.
//
// ## Configuration
//
// All configuration is done via environment variables:
//
// ### Source (one of)
// - `CHANGEBOT_SLUG`: Hosted changelog slug
// - `CHANGEBOT_URL`: Raw updates feed URL
//
// ### Provider
// - `CHANGEBOT_SCOPE`: Scope name (default: `default`)
// - `CHANGEBOT_USER_ID`: Identified user; enables API sync of the watermark
// - `CHANGEBOT_USER_DATA`: JSON object sent along with tracking updates
// - `CHANGEBOT_API_BASE`: API root (default: `https://api.changebot.ai/v1`)
//
// ### Storage
// - `CHANGEBOT_STATE_PATH`: File for persisted watermarks (in-memory if unset)
//
// ### Behaviour
// - `CHANGEBOT_MARK_VIEWED`: `true` to record a view after printing
// - `CHANGEBOT_FORMAT`: `text` (default) or `json`
// - `CHANGEBOT_LOG_LEVEL`: trace, debug, info, warn, error (default: info)
//
// ## Example
//
// ```bash
// export CHANGEBOT_SLUG=acme
// export CHANGEBOT_USER_ID=user-42
// export CHANGEBOT_STATE_PATH=~/.cache/changebot.json
//
// changebot
// ```

use anyhow::Result;
use changebot_core::updates::HighlightTarget;
use changebot_core::{
    HighlightTracker, ProviderConfig, ProviderController, ProviderDeps, StorageConfig,
    WidgetConsumer, storage,
};
use changebot_http::HttpTransport;
use std::env;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{Level, error, info};
use tracing_subscriber::FmtSubscriber;

/// Exit codes
///
/// - 0: Success
/// - 1: Configuration or startup error
/// - 2: Runtime error (updates could not be loaded)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum CliExitCode {
    Success = 0,
    ConfigError = 1,
    RuntimeError = 2,
}

impl From<CliExitCode> for ExitCode {
    fn from(code: CliExitCode) -> Self {
        ExitCode::from(code as u8)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum OutputFormat {
    Text,
    Json,
}

/// Application configuration
#[derive(Debug)]
struct Config {
    slug: Option<String>,
    url: Option<String>,
    scope: Option<String>,
    user_id: Option<String>,
    user_data: Option<String>,
    api_base: Option<String>,
    state_path: Option<String>,
    mark_viewed: bool,
    format: String,
    log_level: String,
}

impl Config {
    /// Load configuration from environment variables
    fn from_env() -> Self {
        Self::from_lookup(|key| env::var(key).ok())
    }

    fn from_lookup(get: impl Fn(&str) -> Option<String>) -> Self {
        let non_empty = |key: &str| get(key).filter(|value| !value.trim().is_empty());
        Self {
            slug: non_empty("CHANGEBOT_SLUG"),
            url: non_empty("CHANGEBOT_URL"),
            scope: non_empty("CHANGEBOT_SCOPE"),
            user_id: non_empty("CHANGEBOT_USER_ID"),
            user_data: non_empty("CHANGEBOT_USER_DATA"),
            api_base: non_empty("CHANGEBOT_API_BASE"),
            state_path: non_empty("CHANGEBOT_STATE_PATH"),
            mark_viewed: non_empty("CHANGEBOT_MARK_VIEWED")
                .map(|value| matches!(value.to_lowercase().as_str(), "1" | "true" | "yes"))
                .unwrap_or(false),
            format: non_empty("CHANGEBOT_FORMAT").unwrap_or_else(|| "text".to_string()),
            log_level: non_empty("CHANGEBOT_LOG_LEVEL").unwrap_or_else(|| "info".to_string()),
        }
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.slug.is_none() && self.url.is_none() {
            anyhow::bail!(
                "Either CHANGEBOT_SLUG or CHANGEBOT_URL is required. \
                Set it via: export CHANGEBOT_SLUG=your-changelog"
            );
        }

        for (name, value) in [("CHANGEBOT_URL", &self.url), ("CHANGEBOT_API_BASE", &self.api_base)] {
            if let Some(url) = value {
                if !(url.starts_with("http://") || url.starts_with("https://")) {
                    anyhow::bail!("{} must be an http(s) URL. Got: {}", name, url);
                }
            }
        }

        self.output_format()?;
        self.log_level()?;
        self.provider_config().validate()?;
        Ok(())
    }

    fn output_format(&self) -> Result<OutputFormat> {
        match self.format.to_lowercase().as_str() {
            "text" => Ok(OutputFormat::Text),
            "json" => Ok(OutputFormat::Json),
            _ => anyhow::bail!(
                "CHANGEBOT_FORMAT '{}' is not valid. Valid formats: text, json",
                self.format
            ),
        }
    }

    fn log_level(&self) -> Result<Level> {
        match self.log_level.to_lowercase().as_str() {
            "trace" => Ok(Level::TRACE),
            "debug" => Ok(Level::DEBUG),
            "info" => Ok(Level::INFO),
            "warn" => Ok(Level::WARN),
            "error" => Ok(Level::ERROR),
            _ => anyhow::bail!(
                "CHANGEBOT_LOG_LEVEL '{}' is not valid. \
                Valid levels: trace, debug, info, warn, error",
                self.log_level
            ),
        }
    }

    fn provider_config(&self) -> ProviderConfig {
        let mut config = ProviderConfig::new(
            self.scope
                .clone()
                .unwrap_or_else(|| changebot_core::config::DEFAULT_SCOPE.to_string()),
        );
        config.slug = self.slug.clone();
        config.url = self.url.clone();
        config.user_id = self.user_id.clone();
        config.user_data = self.user_data.clone();
        if let Some(api_base) = &self.api_base {
            config.api_base = api_base.clone();
        }
        config
    }

    fn storage_config(&self) -> StorageConfig {
        match &self.state_path {
            Some(path) => StorageConfig::File { path: path.clone() },
            None => StorageConfig::Memory,
        }
    }
}

fn main() -> ExitCode {
    let config = Config::from_env();

    if let Err(e) = config.validate() {
        eprintln!("Configuration validation error: {}", e);
        return CliExitCode::ConfigError.into();
    }

    let log_level = config.log_level().unwrap_or(Level::INFO);
    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_writer(std::io::stderr)
        .finish();

    if let Err(e) = tracing::subscriber::set_global_default(subscriber) {
        eprintln!("Failed to set tracing subscriber: {}", e);
        return CliExitCode::ConfigError.into();
    }

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(runtime) => runtime,
        Err(e) => {
            error!("Failed to create tokio runtime: {}", e);
            return CliExitCode::RuntimeError.into();
        }
    };

    let result = rt.block_on(async {
        match run(config).await {
            Ok(code) => code,
            Err(e) => {
                error!("changebot error: {}", e);
                CliExitCode::RuntimeError
            }
        }
    });

    result.into()
}

/// Connect, report, optionally record a view, disconnect
async fn run(config: Config) -> Result<CliExitCode> {
    let format = config.output_format()?;
    let persisted = storage::open(&config.storage_config()).await;
    let transport = Arc::new(HttpTransport::new()?);
    let deps = ProviderDeps::new(persisted.clone(), transport);

    let provider = ProviderController::connect(config.provider_config(), deps.clone()).await?;
    provider.wait_for_background_sync().await;
    info!("Connected to scope {}", provider.scope());

    let consumer = WidgetConsumer::connect(deps.bus.clone(), provider.scope());
    let Some(services) = consumer.services() else {
        anyhow::bail!("Provider did not answer for scope {}", provider.scope());
    };

    let state = services.store.snapshot();
    let banner = HighlightTracker::new(HighlightTarget::Banner).check_services(services);
    let toast = HighlightTracker::new(HighlightTarget::Toast).check_services(services);

    match format {
        OutputFormat::Json => {
            let report = serde_json::json!({
                "scope": provider.scope(),
                "state": state,
                "banner": banner,
                "toast": toast,
            });
            println!("{}", serde_json::to_string_pretty(&report)?);
        }
        OutputFormat::Text => {
            let title = state
                .widget
                .as_ref()
                .map(|widget| widget.title.as_str())
                .unwrap_or(changebot_core::updates::DEFAULT_WIDGET_TITLE);
            println!("{} ({} new of {})", title, state.new_updates_count, state.updates.len());
            if let Some(update) = &banner {
                println!("banner: {}", update.title);
            }
            if let Some(update) = &toast {
                println!("toast: {}", update.title);
            }
            for update in &state.updates {
                println!("  [{}] {} {}", update.id, update.display_date, update.title);
            }
        }
    }

    let code = match &state.error {
        Some(message) => {
            error!("Failed to load updates: {}", message);
            CliExitCode::RuntimeError
        }
        None => CliExitCode::Success,
    };

    if config.mark_viewed && code == CliExitCode::Success {
        provider.mark_viewed(None).await;
        info!("Recorded view for scope {}", provider.scope());
    }

    drop(consumer);
    provider.disconnect();
    persisted.flush().await;

    Ok(code)
}
