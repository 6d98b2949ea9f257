use std::collections::HashMap;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const DEFAULT_ENV_PREFIX: &str = "SUBFEED";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Config {
    #[serde(default)]
    pub reddit: RedditConfig,
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RedditConfig {
    #[serde(default)]
    pub client_id: String,
    #[serde(default)]
    pub client_secret: String,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    #[serde(default = "default_api_base_url")]
    pub api_base_url: String,
    #[serde(default = "default_refresh_skew", with = "humantime_serde")]
    pub refresh_skew: Duration,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
}

impl Default for RedditConfig {
    fn default() -> Self {
        Self {
            client_id: String::new(),
            client_secret: String::new(),
            user_agent: default_user_agent(),
            token_url: default_token_url(),
            api_base_url: default_api_base_url(),
            refresh_skew: default_refresh_skew(),
            request_timeout: default_request_timeout(),
        }
    }
}

fn default_user_agent() -> String {
    format!("subfeed/{} (proxy)", crate::VERSION)
}

fn default_token_url() -> String {
    "https://www.reddit.com/api/v1/access_token".into()
}

fn default_api_base_url() -> String {
    crate::reddit::DEFAULT_BASE_URL.into()
}

fn default_refresh_skew() -> Duration {
    Duration::from_secs(30)
}

fn default_request_timeout() -> Duration {
    Duration::from_secs(8)
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    #[serde(default = "default_listen_addr")]
    pub listen_addr: String,
    #[serde(default = "default_workers")]
    pub workers: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen_addr: default_listen_addr(),
            workers: default_workers(),
        }
    }
}

fn default_listen_addr() -> String {
    "127.0.0.1:3000".into()
}

fn default_workers() -> usize {
    4
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default = "default_proxy_url")]
    pub proxy_url: String,
    #[serde(default = "default_request_timeout", with = "humantime_serde")]
    pub request_timeout: Duration,
    #[serde(default = "default_search_debounce", with = "humantime_serde")]
    pub search_debounce: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            proxy_url: default_proxy_url(),
            request_timeout: default_request_timeout(),
            search_debounce: default_search_debounce(),
        }
    }
}

fn default_proxy_url() -> String {
    "http://127.0.0.1:3000/".into()
}

fn default_search_debounce() -> Duration {
    crate::debounce::SEARCH_DEBOUNCE
}

#[derive(Debug, Clone, Default)]
pub struct LoadOptions {
    pub config_file: Option<PathBuf>,
    pub env_prefix: Option<String>,
    /// Also read `REDDIT_CLIENT_ID`, `REDDIT_CLIENT_SECRET` and `REDDIT_USER_AGENT`.
    pub legacy_env: bool,
}

pub fn load(options: LoadOptions) -> Result<Config> {
    let mut cfg = Config::default();

    if let Some(path) = options.config_file.as_ref() {
        if path.exists() {
            let from_file = read_config_file(path)?;
            cfg = merge_config(cfg, from_file);
        }
    } else if let Some(default_path) = default_config_path() {
        if default_path.exists() {
            let from_file = read_config_file(&default_path)?;
            cfg = merge_config(cfg, from_file);
        }
    }

    let prefix = options.env_prefix.as_deref().unwrap_or(DEFAULT_ENV_PREFIX);
    cfg = merge_config(cfg, load_env(prefix)?);

    if options.legacy_env {
        apply_legacy_env(&mut cfg);
    }

    Ok(cfg)
}

fn read_config_file(path: &Path) -> Result<Config> {
    let data = fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file at {}", path.display()))?;
    let config: Config = serde_yaml::from_str(&data)
        .with_context(|| format!("Failed to parse config file at {}", path.display()))?;
    Ok(config)
}

fn merge_config(mut base: Config, other: Config) -> Config {
    let defaults = Config::default();

    if !other.reddit.client_id.is_empty() {
        base.reddit.client_id = other.reddit.client_id;
    }
    if !other.reddit.client_secret.is_empty() {
        base.reddit.client_secret = other.reddit.client_secret;
    }
    if !other.reddit.user_agent.is_empty() && other.reddit.user_agent != defaults.reddit.user_agent
    {
        base.reddit.user_agent = other.reddit.user_agent;
    }
    if !other.reddit.token_url.is_empty() && other.reddit.token_url != defaults.reddit.token_url {
        base.reddit.token_url = other.reddit.token_url;
    }
    if !other.reddit.api_base_url.is_empty()
        && other.reddit.api_base_url != defaults.reddit.api_base_url
    {
        base.reddit.api_base_url = other.reddit.api_base_url;
    }
    if other.reddit.refresh_skew != defaults.reddit.refresh_skew {
        base.reddit.refresh_skew = other.reddit.refresh_skew;
    }
    if other.reddit.request_timeout != defaults.reddit.request_timeout {
        base.reddit.request_timeout = other.reddit.request_timeout;
    }

    if !other.server.listen_addr.is_empty()
        && other.server.listen_addr != defaults.server.listen_addr
    {
        base.server.listen_addr = other.server.listen_addr;
    }
    if other.server.workers != 0 && other.server.workers != defaults.server.workers {
        base.server.workers = other.server.workers;
    }

    if !other.client.proxy_url.is_empty() && other.client.proxy_url != defaults.client.proxy_url {
        base.client.proxy_url = other.client.proxy_url;
    }
    if other.client.request_timeout != defaults.client.request_timeout {
        base.client.request_timeout = other.client.request_timeout;
    }
    if other.client.search_debounce != defaults.client.search_debounce {
        base.client.search_debounce = other.client.search_debounce;
    }

    base
}

fn load_env(prefix: &str) -> Result<Config> {
    let mut map: HashMap<String, String> = HashMap::new();
    let upper_prefix = format!("{}_", prefix.to_uppercase());

    for (key, value) in env::vars() {
        if let Some(stripped) = key.strip_prefix(&upper_prefix) {
            let normalized = stripped.to_ascii_lowercase().replace("__", ".");
            map.insert(normalized, value);
        }
    }

    if map.is_empty() {
        return Ok(Config::default());
    }

    let mut cfg = Config::default();

    for (key, value) in map {
        apply_env_value(&mut cfg, &key, value);
    }

    Ok(cfg)
}

fn apply_env_value(cfg: &mut Config, key: &str, value: String) {
    match key {
        "reddit.client_id" => cfg.reddit.client_id = value,
        "reddit.client_secret" => cfg.reddit.client_secret = value,
        "reddit.user_agent" => cfg.reddit.user_agent = value,
        "reddit.token_url" => cfg.reddit.token_url = value,
        "reddit.api_base_url" => cfg.reddit.api_base_url = value,
        "reddit.refresh_skew" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.reddit.refresh_skew = duration;
            }
        }
        "reddit.request_timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.reddit.request_timeout = duration;
            }
        }
        "server.listen_addr" => cfg.server.listen_addr = value,
        "server.workers" => {
            if let Ok(parsed) = value.parse::<usize>() {
                cfg.server.workers = parsed;
            }
        }
        "client.proxy_url" => cfg.client.proxy_url = value,
        "client.request_timeout" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.client.request_timeout = duration;
            }
        }
        "client.search_debounce" => {
            if let Ok(duration) = humantime::parse_duration(&value) {
                cfg.client.search_debounce = duration;
            }
        }
        _ => {}
    }
}

fn apply_legacy_env(cfg: &mut Config) {
    let legacy = [
        ("REDDIT_CLIENT_ID", "reddit.client_id"),
        ("REDDIT_CLIENT_SECRET", "reddit.client_secret"),
        ("REDDIT_USER_AGENT", "reddit.user_agent"),
    ];
    for (var, key) in legacy {
        if let Ok(value) = env::var(var) {
            if !value.trim().is_empty() {
                apply_env_value(cfg, key, value.trim().to_string());
            }
        }
    }
}

pub fn default_path() -> Option<PathBuf> {
    default_config_path()
}

fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|dir| dir.join("subfeed").join("config.yaml"))
}
