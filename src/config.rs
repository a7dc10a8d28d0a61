use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;
use std::time::Duration;

use crate::upstream::RetryPolicy;
use crate::upstream::rotation::ApiKey;

// ---------------------------------------------------------------------------
// Environment override tracking
// ---------------------------------------------------------------------------

/// Tracks which configuration settings are overridden by environment variables.
#[derive(Debug, Clone, Default)]
pub struct EnvOverrides {
    overrides: HashMap<String, String>,
}

impl EnvOverrides {
    /// Check whether a setting key (e.g. "server.host") is overridden by an env var.
    pub fn is_overridden(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    /// Get the env var name that overrides the given setting key.
    pub fn env_var_for(&self, key: &str) -> Option<&str> {
        self.overrides.get(key).map(String::as_str)
    }

    /// Get all overrides as a map of setting key -> env var name.
    pub fn all(&self) -> &HashMap<String, String> {
        &self.overrides
    }

    fn record(&mut self, key: &str, env_var: &str) {
        self.overrides.insert(key.to_string(), env_var.to_string());
    }
}

// ---------------------------------------------------------------------------
// Main configuration
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub upstream: UpstreamConfig,
    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub stream: StreamConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    /// Env var overrides are not serialized to TOML.
    #[serde(skip)]
    pub env_overrides: EnvOverrides,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    /// Allowed CORS origins. Empty allows any origin.
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            cors_origins: Vec::new(),
        }
    }
}

#[derive(Clone, Deserialize, Serialize)]
pub struct UpstreamConfig {
    /// Base URL of the OpenAI-compatible API, without `/chat/completions`.
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// API keys tried in rotation.
    #[serde(default)]
    pub api_keys: Vec<String>,
    /// Models for text generation and modification, in fallback order.
    #[serde(default = "default_text_models")]
    pub text_models: Vec<String>,
    /// Vision-capable models for image generation, in fallback order.
    #[serde(default = "default_vision_models")]
    pub vision_models: Vec<String>,
    /// Sent as `HTTP-Referer`.
    #[serde(default = "default_site_url")]
    pub site_url: String,
    /// Sent as `X-Title`.
    #[serde(default = "default_app_title")]
    pub app_title: String,
    #[serde(default = "default_text_max_tokens")]
    pub max_tokens: u32,
    #[serde(default = "default_image_max_tokens")]
    pub image_max_tokens: u32,
    #[serde(default = "default_temperature")]
    pub temperature: f32,
    #[serde(default = "default_top_p")]
    pub top_p: f32,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
            api_keys: Vec::new(),
            text_models: default_text_models(),
            vision_models: default_vision_models(),
            site_url: default_site_url(),
            app_title: default_app_title(),
            max_tokens: default_text_max_tokens(),
            image_max_tokens: default_image_max_tokens(),
            temperature: default_temperature(),
            top_p: default_top_p(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

impl std::fmt::Debug for UpstreamConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamConfig")
            .field("base_url", &self.base_url)
            .field("api_keys", &format!("[{} keys]", self.api_keys.len()))
            .field("text_models", &self.text_models)
            .field("vision_models", &self.vision_models)
            .field("max_tokens", &self.max_tokens)
            .field("image_max_tokens", &self.image_max_tokens)
            .finish_non_exhaustive()
    }
}

impl UpstreamConfig {
    /// Configured keys, falling back to `OPENROUTER_API_KEY_1..=3` when the
    /// list is empty. Blank entries are dropped.
    pub fn resolved_api_keys(&self) -> Vec<ApiKey> {
        let keys: Vec<String> = if self.api_keys.is_empty() {
            (1..=LEGACY_KEY_VARS)
                .filter_map(|i| std::env::var(format!("OPENROUTER_API_KEY_{i}")).ok())
                .collect()
        } else {
            self.api_keys.clone()
        };

        keys.into_iter()
            .map(|key| key.trim().to_string())
            .filter(|key| !key.is_empty())
            .map(ApiKey::new)
            .collect()
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,
    #[serde(default = "default_backoff_multiplier")]
    pub backoff_multiplier: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: default_max_retries(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            backoff_multiplier: default_backoff_multiplier(),
        }
    }
}

impl RetryConfig {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy::new()
            .with_max_retries(self.max_retries)
            .with_initial_backoff(Duration::from_millis(self.initial_backoff_ms))
            .with_max_backoff(Duration::from_millis(self.max_backoff_ms))
            .with_backoff_multiplier(self.backoff_multiplier)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StreamConfig {
    /// Wall-clock budget for one session, request included.
    #[serde(default = "default_stream_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_max_consecutive_decode_failures")]
    pub max_consecutive_decode_failures: u32,
    /// Image requests stream too when true.
    #[serde(default)]
    pub stream_image_requests: bool,
}

impl Default for StreamConfig {
    fn default() -> Self {
        Self {
            timeout_secs: default_stream_timeout_secs(),
            max_consecutive_decode_failures: default_max_consecutive_decode_failures(),
            stream_image_requests: false,
        }
    }
}

impl StreamConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct LoggingConfig {
    #[serde(default = "default_log_level")]
    pub level: String,
    #[serde(default)]
    pub json: bool,
    /// Log prompt previews and response samples.
    #[serde(default)]
    pub log_content: bool,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            json: false,
            log_content: false,
        }
    }
}

// -- Defaults --

const LEGACY_KEY_VARS: usize = 3;

const fn default_port() -> u16 {
    8410
}
fn default_host() -> String {
    "127.0.0.1".to_string()
}
fn default_base_url() -> String {
    "https://openrouter.ai/api/v1".to_string()
}
fn default_text_models() -> Vec<String> {
    vec!["deepseek/deepseek-chat-v3-0324:free".to_string()]
}
fn default_vision_models() -> Vec<String> {
    [
        "google/gemini-2.0-flash-exp:free",
        "google/gemini-flash-1.5:free",
        "google/gemini-pro-vision:free",
        "meta-llama/llama-3.2-11b-vision-instruct:free",
        "meta-llama/llama-3.2-90b-vision-instruct:free",
        "qwen/qwen-2-vl-7b-instruct:free",
    ]
    .into_iter()
    .map(String::from)
    .collect()
}
fn default_site_url() -> String {
    "http://localhost:8410".to_string()
}
fn default_app_title() -> String {
    "Zensite".to_string()
}
const fn default_text_max_tokens() -> u32 {
    12_000
}
const fn default_image_max_tokens() -> u32 {
    8_000
}
const fn default_temperature() -> f32 {
    0.7
}
const fn default_top_p() -> f32 {
    0.9
}
const fn default_connect_timeout_secs() -> u64 {
    10
}
const fn default_max_retries() -> u32 {
    crate::upstream::retry::DEFAULT_MAX_RETRIES
}
const fn default_initial_backoff_ms() -> u64 {
    crate::upstream::retry::DEFAULT_INITIAL_BACKOFF_MS
}
const fn default_max_backoff_ms() -> u64 {
    crate::upstream::retry::DEFAULT_MAX_BACKOFF_MS
}
const fn default_backoff_multiplier() -> f64 {
    crate::upstream::retry::DEFAULT_BACKOFF_MULTIPLIER
}
const fn default_stream_timeout_secs() -> u64 {
    120
}
const fn default_max_consecutive_decode_failures() -> u32 {
    crate::stream::DEFAULT_MAX_CONSECUTIVE_FAILURES
}
fn default_log_level() -> String {
    "info".to_string()
}

fn split_list(value: &str) -> Vec<String> {
    value
        .split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// ---------------------------------------------------------------------------
// Config loading and env overrides
// ---------------------------------------------------------------------------

impl Config {
    /// Load configuration from a TOML file, then apply environment variable
    /// overrides. Any setting prefixed with `ZENSITE_` takes precedence over
    /// the file value and is tracked in `env_overrides`.
    pub fn load(path: &Path) -> anyhow::Result<Self> {
        let mut config = if path.exists() {
            let content = std::fs::read_to_string(path)?;
            let config: Config = toml::from_str(&content)?;
            config
        } else {
            tracing::warn!("Config file not found at {}, using defaults", path.display());
            Self::default()
        };
        config.apply_env_overrides();
        config.validate()?;
        Ok(config)
    }

    pub fn listen_addr(&self) -> String {
        format!("{}:{}", self.server.host, self.server.port)
    }

    /// Save the current (file-level) configuration to a TOML file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let content = toml::to_string_pretty(self)
            .map_err(|e| anyhow::anyhow!("Failed to serialize config: {e}"))?;
        std::fs::write(path, content)?;
        Ok(())
    }

    /// Reject settings that would make every request fail.
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.upstream.text_models.is_empty() {
            anyhow::bail!("upstream.text_models must name at least one model");
        }
        if self.stream.timeout_secs == 0 {
            anyhow::bail!("stream.timeout_secs must be greater than zero");
        }
        if !(self.upstream.base_url.starts_with("http://")
            || self.upstream.base_url.starts_with("https://"))
        {
            anyhow::bail!(
                "upstream.base_url must be an http(s) URL, got {}",
                self.upstream.base_url
            );
        }
        Ok(())
    }

    /// Apply environment variable overrides to the configuration.
    fn apply_env_overrides(&mut self) {
        let mut ov = EnvOverrides::default();

        macro_rules! env_str {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = val;
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_bool {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = matches!(val.to_lowercase().as_str(), "1" | "true" | "yes" | "on");
                    ov.record($key, $env);
                }
            };
        }
        macro_rules! env_parse {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    if let Ok(parsed) = val.parse() {
                        $field = parsed;
                        ov.record($key, $env);
                    }
                }
            };
        }
        macro_rules! env_list {
            ($key:expr, $env:expr, $field:expr) => {
                if let Ok(val) = std::env::var($env) {
                    $field = split_list(&val);
                    ov.record($key, $env);
                }
            };
        }

        // -- Server --
        env_str!("server.host", "ZENSITE_SERVER_HOST", self.server.host);
        env_parse!("server.port", "ZENSITE_SERVER_PORT", self.server.port);
        env_list!(
            "server.cors_origins",
            "ZENSITE_SERVER_CORS_ORIGINS",
            self.server.cors_origins
        );

        // -- Upstream --
        env_str!(
            "upstream.base_url",
            "ZENSITE_UPSTREAM_BASE_URL",
            self.upstream.base_url
        );
        env_list!(
            "upstream.api_keys",
            "ZENSITE_UPSTREAM_API_KEYS",
            self.upstream.api_keys
        );
        env_list!(
            "upstream.text_models",
            "ZENSITE_UPSTREAM_TEXT_MODELS",
            self.upstream.text_models
        );
        env_list!(
            "upstream.vision_models",
            "ZENSITE_UPSTREAM_VISION_MODELS",
            self.upstream.vision_models
        );
        env_str!(
            "upstream.site_url",
            "ZENSITE_UPSTREAM_SITE_URL",
            self.upstream.site_url
        );
        env_str!(
            "upstream.app_title",
            "ZENSITE_UPSTREAM_APP_TITLE",
            self.upstream.app_title
        );
        env_parse!(
            "upstream.max_tokens",
            "ZENSITE_UPSTREAM_MAX_TOKENS",
            self.upstream.max_tokens
        );
        env_parse!(
            "upstream.temperature",
            "ZENSITE_UPSTREAM_TEMPERATURE",
            self.upstream.temperature
        );

        // -- Retry --
        env_parse!(
            "retry.max_retries",
            "ZENSITE_RETRY_MAX_RETRIES",
            self.retry.max_retries
        );
        env_parse!(
            "retry.initial_backoff_ms",
            "ZENSITE_RETRY_INITIAL_BACKOFF_MS",
            self.retry.initial_backoff_ms
        );

        // -- Stream --
        env_parse!(
            "stream.timeout_secs",
            "ZENSITE_STREAM_TIMEOUT_SECS",
            self.stream.timeout_secs
        );
        env_bool!(
            "stream.stream_image_requests",
            "ZENSITE_STREAM_IMAGE_REQUESTS",
            self.stream.stream_image_requests
        );

        // -- Logging --
        env_str!("logging.level", "ZENSITE_LOG_LEVEL", self.logging.level);
        env_bool!("logging.json", "ZENSITE_LOG_JSON", self.logging.json);
        env_bool!(
            "logging.log_content",
            "ZENSITE_LOG_CONTENT",
            self.logging.log_content
        );

        self.env_overrides = ov;
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
