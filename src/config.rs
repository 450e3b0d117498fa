use crate::error::{ProxyError, Result};
use crate::translate::streaming::StreamMode;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::Duration;

const CONFIG_DIR_NAME: &str = "translate-proxy";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProxyConfig {
    #[serde(default = "default_port")]
    pub port: u16,
    pub upstream: UpstreamConfig,
    /// Caller model name -> upstream model name.
    #[serde(default)]
    pub models: HashMap<String, String>,
    /// Passthrough options applied to every request before the caller's own.
    #[serde(default)]
    pub defaults: Map<String, Value>,
    #[serde(default)]
    pub auth: AuthConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpstreamConfig {
    pub base_url: String,
    #[serde(default = "default_api_key_env")]
    pub api_key_env: String,
    /// Fixed upstream model; overrides whatever the caller asked for.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub model: Option<String>,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default)]
    pub stream_mode: StreamMode,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuthConfig {
    /// Accepted bearer tokens. Empty accepts any well-formed token.
    #[serde(default)]
    pub api_keys: Vec<String>,
}

fn default_port() -> u16 {
    4333
}

fn default_api_key_env() -> String {
    "UPSTREAM_API_KEY".to_string()
}

fn default_timeout_secs() -> u64 {
    120
}

impl ProxyConfig {
    /// Config with only an upstream base URL set.
    pub fn with_base_url(base_url: impl Into<String>) -> Self {
        Self {
            port: default_port(),
            upstream: UpstreamConfig {
                base_url: base_url.into(),
                api_key_env: default_api_key_env(),
                model: None,
                timeout_secs: default_timeout_secs(),
                stream_mode: StreamMode::default(),
            },
            models: HashMap::new(),
            defaults: Map::new(),
            auth: AuthConfig::default(),
        }
    }

    /// Load config from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            ProxyError::config(format!("Failed to read config file {}: {}", path.display(), e))
        })?;
        let config: Self = toml::from_str(&content)?;
        config.validate()?;
        Ok(config)
    }

    /// Search standard locations for a config file.
    /// Priority: CLI arg > CWD > XDG config > home dir
    pub fn find_and_load(explicit_path: Option<&Path>) -> Result<Self> {
        if let Some(path) = explicit_path {
            return Self::load(path);
        }

        let candidates = config_search_paths();
        for candidate in &candidates {
            if candidate.exists() {
                tracing::info!(path = %candidate.display(), "Loading config");
                return Self::load(candidate);
            }
        }

        Err(ProxyError::config(format!(
            "No config file found. Searched: {}",
            candidates
                .iter()
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ")
        )))
    }

    pub fn validate(&self) -> Result<()> {
        let url = self.upstream.base_url.trim();
        if !(url.starts_with("http://") || url.starts_with("https://")) {
            return Err(ProxyError::config(format!(
                "upstream.base_url must be an http(s) URL, got '{}'",
                self.upstream.base_url
            )));
        }
        if self.upstream.timeout_secs == 0 {
            return Err(ProxyError::config("upstream.timeout_secs must be positive"));
        }
        Ok(())
    }

    /// Resolve the upstream API key from the configured environment variable
    pub fn resolve_api_key(&self) -> Result<String> {
        std::env::var(&self.upstream.api_key_env).map_err(|_| {
            ProxyError::config(format!(
                "Environment variable '{}' not set. Set it with your upstream API key.",
                self.upstream.api_key_env
            ))
        })
    }

    pub fn completions_url(&self) -> String {
        format!(
            "{}/chat/completions",
            self.upstream.base_url.trim().trim_end_matches('/')
        )
    }

    pub fn upstream_timeout(&self) -> Duration {
        Duration::from_secs(self.upstream.timeout_secs)
    }

    /// Upstream model for a caller's model name: fixed model, then alias, then as-is.
    pub fn upstream_model(&self, requested: &str) -> String {
        self.upstream
            .model
            .clone()
            .or_else(|| self.models.get(requested).cloned())
            .unwrap_or_else(|| requested.to_string())
    }

    /// Whether `token` may call the proxy.
    pub fn accepts_token(&self, token: &str) -> bool {
        self.auth.api_keys.is_empty() || self.auth.api_keys.iter().any(|k| k == token)
    }
}

pub fn config_search_paths() -> Vec<PathBuf> {
    let mut paths = Vec::new();

    paths.push(PathBuf::from(format!("{CONFIG_DIR_NAME}.toml")));

    if cfg!(target_os = "macos") {
        if let Some(home) = home_dir() {
            paths.push(
                home.join("Library")
                    .join("Application Support")
                    .join(CONFIG_DIR_NAME)
                    .join("config.toml"),
            );
        }
    } else {
        if let Ok(xdg) = std::env::var("XDG_CONFIG_HOME") {
            paths.push(PathBuf::from(xdg).join(CONFIG_DIR_NAME).join("config.toml"));
        }
        if let Some(home) = home_dir() {
            paths.push(home.join(".config").join(CONFIG_DIR_NAME).join("config.toml"));
        }
    }

    if let Some(home) = home_dir() {
        paths.push(home.join(format!(".{CONFIG_DIR_NAME}.toml")));
    }

    paths
}

fn home_dir() -> Option<PathBuf> {
    std::env::var("HOME").ok().map(PathBuf::from)
}
