use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    /// Address the HTTP server listens on
    #[serde(default = "default_bind")]
    pub bind: String,
    #[serde(default = "default_database_url")]
    pub database_url: String,
    /// Podcast directory search endpoint (iTunes Search API compatible)
    #[serde(default = "default_search_url")]
    pub search_url: String,
    /// Outbound request timeout in seconds
    #[serde(default = "default_fetch_timeout")]
    pub fetch_timeout: u64,
    #[serde(default = "default_user_agent")]
    pub user_agent: String,
}

fn default_bind() -> String {
    "0.0.0.0:3000".to_string()
}

fn default_database_url() -> String {
    "sqlite:podcache.db?mode=rwc".to_string()
}

fn default_search_url() -> String {
    "https://itunes.apple.com/search".to_string()
}

fn default_fetch_timeout() -> u64 {
    30
}

fn default_user_agent() -> String {
    "podcache/0.1 (Podcast Manager)".to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind: default_bind(),
            database_url: default_database_url(),
            search_url: default_search_url(),
            fetch_timeout: default_fetch_timeout(),
            user_agent: default_user_agent(),
        }
    }
}

impl Config {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }

    /// Like [`Config::load`], but a missing file means "use the defaults".
    pub fn load_or_default<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        if path.as_ref().exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    /// Parse config from a TOML string (useful for testing)
    pub fn from_str(content: &str) -> anyhow::Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }
}
