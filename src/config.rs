use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Settings file, stored as JSON. Missing fields fall back to their defaults so
/// older files keep loading.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub search: SearchConfig,
    pub mail: MailConfig,
    pub discovery: DiscoveryConfig,
    pub store: StoreConfig,
    pub log_level: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    pub keywords: Vec<String>,
    pub location: String,
    pub exclude_keywords: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct MailConfig {
    pub imap_server: String,
    pub imap_port: u16,
    /// Empty means mail checking is not configured.
    pub username: String,
    pub password_file: String,
    pub lookback_days: u32,
    pub max_messages: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DiscoveryConfig {
    pub workers: usize,
    pub max_postings_per_source: usize,
    pub feeds: Vec<FeedConfig>,
}

/// A JSON file of postings dropped off by a portal scraper.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeedConfig {
    pub portal: String,
    pub path: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    pub database: Option<String>,
    pub backup_dir: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            search: SearchConfig::default(),
            mail: MailConfig::default(),
            discovery: DiscoveryConfig::default(),
            store: StoreConfig::default(),
            log_level: "info".to_string(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            keywords: vec![
                "python developer".to_string(),
                "software engineer".to_string(),
                "data scientist".to_string(),
            ],
            location: "Remote".to_string(),
            exclude_keywords: vec!["senior".to_string(), "lead".to_string(), "manager".to_string()],
        }
    }
}

impl Default for MailConfig {
    fn default() -> Self {
        Self {
            imap_server: "imap.gmail.com".to_string(),
            imap_port: 993,
            username: String::new(),
            password_file: "~/.jobtrack.app_password.txt".to_string(),
            lookback_days: 7,
            max_messages: 100,
        }
    }
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            workers: 4,
            max_postings_per_source: 20,
            feeds: Vec::new(),
        }
    }
}

impl MailConfig {
    pub fn is_configured(&self) -> bool {
        !self.username.trim().is_empty()
    }
}

impl StoreConfig {
    pub fn database_path(&self) -> Option<PathBuf> {
        self.database.as_deref().map(expand_home)
    }

    pub fn backup_path(&self) -> Option<PathBuf> {
        self.backup_dir.as_deref().map(expand_home)
    }
}

impl Config {
    pub fn default_path() -> PathBuf {
        if let Some(proj_dirs) = directories::ProjectDirs::from("", "", "jobtrack") {
            proj_dirs.config_dir().join("config.json")
        } else {
            PathBuf::from("jobtrack.json")
        }
    }

    /// Reads the config file, writing the defaults there first if it does not exist.
    pub fn load_or_create(path: &Path) -> Result<Self> {
        if !path.exists() {
            let config = Self::default();
            config.save(path)?;
            tracing::info!(path = %path.display(), "created default configuration");
            return Ok(config);
        }

        let text = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        let config: Self = serde_json::from_str(&text)
            .with_context(|| format!("Invalid config file: {}", path.display()))?;
        Ok(config)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                fs::create_dir_all(parent)?;
            }
        }
        let text = serde_json::to_string_pretty(self)?;
        fs::write(path, text).with_context(|| format!("Failed to write config file: {}", path.display()))?;
        Ok(())
    }
}

/// Expands a leading `~/` to the home directory.
pub fn expand_home(path: &str) -> PathBuf {
    if let Some(rest) = path.strip_prefix("~/") {
        let home = std::env::var("HOME").unwrap_or_default();
        PathBuf::from(home).join(rest)
    } else {
        PathBuf::from(path)
    }
}
