//! Jira REST issue search.
//!
//! Pages through `GET /rest/api/2/search` with basic auth (account email plus
//! an API token read from the environment). Issues come back as raw JSON
//! objects; callers feed them through the normalizer's API path.
//!
//! No retries: an HTTP or decode error fails the whole fetch.

use std::time::Duration;

use anyhow::{bail, Context, Result};
use serde::Deserialize;
use serde_json::Value as Json;
use tracing::{debug, info};

use crate::config::JiraConfig;

const REQUEST_TIMEOUT_SECS: u64 = 30;

/// One page of a search response.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SearchPage {
    #[serde(default)]
    pub start_at: u64,
    #[serde(default)]
    pub total: u64,
    #[serde(default)]
    pub issues: Vec<Json>,
}

impl SearchPage {
    /// Offset of the next page, or `None` when this page was the last.
    pub fn next_start(&self) -> Option<u64> {
        let next = self.start_at + self.issues.len() as u64;
        (!self.issues.is_empty() && next < self.total).then_some(next)
    }
}

pub struct JiraClient {
    client: reqwest::Client,
    base_url: String,
    email: String,
    token: String,
    page_size: u32,
}

impl JiraClient {
    pub fn from_config(config: &JiraConfig) -> Result<Self> {
        let token = std::env::var(&config.api_token_env)
            .map_err(|_| anyhow::anyhow!("{} not set", config.api_token_env))?;

        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(REQUEST_TIMEOUT_SECS))
            .build()?;

        Ok(Self {
            client,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            email: config.email.clone(),
            token,
            page_size: config.page_size,
        })
    }

    async fn page(&self, jql: &str, start_at: u64) -> Result<SearchPage> {
        let url = format!("{}/rest/api/2/search", self.base_url);
        let response = self
            .client
            .get(&url)
            .basic_auth(&self.email, Some(&self.token))
            .header("Accept", "application/json")
            .query(&[
                ("jql", jql.to_string()),
                ("startAt", start_at.to_string()),
                ("maxResults", self.page_size.to_string()),
            ])
            .send()
            .await
            .with_context(|| format!("request to {} failed", url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("Jira API error {}: {}", status, body_text);
        }

        response
            .json::<SearchPage>()
            .await
            .with_context(|| "Failed to decode search response")
    }

    /// Every issue matching `jql`, in server order.
    #[tracing::instrument(skip(self))]
    pub async fn search(&self, jql: &str) -> Result<Vec<Json>> {
        let mut issues = Vec::new();
        let mut start_at = 0;

        loop {
            let page = self.page(jql, start_at).await?;
            debug!(start_at, received = page.issues.len(), total = page.total, "search page");
            let next = page.next_start();
            issues.extend(page.issues);
            match next {
                Some(n) => start_at = n,
                None => break,
            }
        }

        info!(count = issues.len(), "search complete");
        Ok(issues)
    }
}
