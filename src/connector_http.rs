//! HTTP page fetcher for `website` sources.
//!
//! Fetches exactly one page with `reqwest`, following a bounded number of
//! redirects under a request timeout. No crawling.

use anyhow::{bail, Context, Result};
use async_trait::async_trait;
use std::time::Duration;

use crate::config::FetchConfig;
use crate::traits::Fetcher;

pub struct HttpFetcher {
    client: reqwest::Client,
}

impl HttpFetcher {
    pub fn new(config: &FetchConfig) -> Result<Self> {
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .redirect(reqwest::redirect::Policy::limited(config.max_redirects))
            .user_agent(config.user_agent.clone())
            .build()
            .context("Failed to build HTTP client")?;
        Ok(Self { client })
    }
}

#[async_trait]
impl Fetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<String> {
        let resp = self
            .client
            .get(url)
            .send()
            .await
            .with_context(|| format!("GET {} failed", url))?;

        if !resp.status().is_success() {
            let status = resp.status();
            bail!("GET {} returned HTTP {}", url, status);
        }

        let body = resp
            .text()
            .await
            .with_context(|| format!("Failed to read body of {}", url))?;
        Ok(body)
    }
}
