use anyhow::{Context, Result};
use jira_harvest_core::classify::DEFAULT_MAX_DEPTH;
use jira_harvest_core::extract::{ExtractOptions, DEFAULT_MAX_HTML_BYTES};
use jira_harvest_core::PageClassifier;
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone)]
pub struct Config {
    pub db: DbConfig,
    pub server: ServerConfig,
    #[serde(default)]
    pub extraction: ExtractionConfig,
    #[serde(default)]
    pub events: EventsConfig,
    #[serde(default)]
    pub jira: Option<JiraConfig>,
}

#[derive(Debug, Deserialize, Clone)]
pub struct DbConfig {
    pub path: PathBuf,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ServerConfig {
    pub bind: String,
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExtractionConfig {
    #[serde(default = "default_max_depth")]
    pub max_depth: usize,
    #[serde(default = "default_row_walk_depth")]
    pub row_walk_depth: usize,
    #[serde(default = "default_link_depth")]
    pub link_depth: usize,
    #[serde(default = "default_max_html_bytes")]
    pub max_html_bytes: usize,
    #[serde(default)]
    pub capture_raw_html: bool,
}

impl Default for ExtractionConfig {
    fn default() -> Self {
        Self {
            max_depth: default_max_depth(),
            row_walk_depth: default_row_walk_depth(),
            link_depth: default_link_depth(),
            max_html_bytes: default_max_html_bytes(),
            capture_raw_html: false,
        }
    }
}

fn default_max_depth() -> usize {
    DEFAULT_MAX_DEPTH
}
fn default_row_walk_depth() -> usize {
    60
}
fn default_link_depth() -> usize {
    5
}
fn default_max_html_bytes() -> usize {
    DEFAULT_MAX_HTML_BYTES
}

impl ExtractionConfig {
    pub fn classifier(&self) -> PageClassifier {
        PageClassifier::new(self.max_depth, self.max_html_bytes)
    }

    pub fn options(&self) -> ExtractOptions {
        ExtractOptions {
            row_walk_depth: self.row_walk_depth,
            link_depth: self.link_depth,
            max_html_bytes: self.max_html_bytes,
            capture_raw_html: self.capture_raw_html,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EventsConfig {
    #[serde(default = "default_capacity")]
    pub capacity: usize,
}

impl Default for EventsConfig {
    fn default() -> Self {
        Self {
            capacity: default_capacity(),
        }
    }
}

fn default_capacity() -> usize {
    256
}

#[derive(Debug, Deserialize, Clone)]
pub struct JiraConfig {
    pub base_url: String,
    pub email: String,
    #[serde(default = "default_api_token_env")]
    pub api_token_env: String,
    #[serde(default = "default_page_size")]
    pub page_size: u32,
}

fn default_api_token_env() -> String {
    "JIRA_API_TOKEN".to_string()
}
fn default_page_size() -> u32 {
    50
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    // Validate extraction limits
    let x = &config.extraction;
    if x.max_depth == 0 {
        anyhow::bail!("extraction.max_depth must be >= 1");
    }
    if x.row_walk_depth == 0 {
        anyhow::bail!("extraction.row_walk_depth must be >= 1");
    }
    if x.link_depth == 0 {
        anyhow::bail!("extraction.link_depth must be >= 1");
    }
    if x.max_html_bytes == 0 {
        anyhow::bail!("extraction.max_html_bytes must be > 0");
    }

    if config.events.capacity == 0 {
        anyhow::bail!("events.capacity must be > 0");
    }

    if let Some(jira) = &config.jira {
        if !(1..=100).contains(&jira.page_size) {
            anyhow::bail!("jira.page_size must be in [1, 100]");
        }
        if !jira.base_url.starts_with("http://") && !jira.base_url.starts_with("https://") {
            anyhow::bail!("jira.base_url must be an http(s) URL, got '{}'", jira.base_url);
        }
    }

    Ok(config)
}
