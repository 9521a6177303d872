//! Provisioning Client

use std::time::Duration;

use anyhow::{bail, Context};
use reqwest::{StatusCode, Url};
use tracing::{debug, info};

use crate::Result;

/// How long a single HTTP request may take
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);
/// Pause between address queries
const POLL_INTERVAL: Duration = Duration::from_secs(2);
/// Address queries before giving up
const POLL_ATTEMPTS: u32 = 11;

/// Client for the remote provisioning endpoint
pub struct ProvisionClient {
    http: reqwest::Client,
    base_url: Url,
    key: String,
    poll_interval: Duration,
    poll_attempts: u32,
}

impl ProvisionClient {
    /// Create a client for the given control URL and key
    pub fn new(url: &str, key: &str) -> Result<Self> {
        let base_url = normalize_base_url(url)?;
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .context("Failed to build HTTP client")?;

        Ok(Self {
            http,
            base_url,
            key: key.to_string(),
            poll_interval: POLL_INTERVAL,
            poll_attempts: POLL_ATTEMPTS,
        })
    }

    /// Create a client with a custom polling schedule
    pub fn with_polling(mut self, interval: Duration, attempts: u32) -> Self {
        self.poll_interval = interval;
        self.poll_attempts = attempts;
        self
    }

    /// Ask the control endpoint to start the remote server
    pub async fn request_start(&self) -> Result<()> {
        self.post("start").await?;
        info!("Start requested; the server may take several minutes to come up");
        Ok(())
    }

    /// Query the remote server address; `None` until provisioning finishes
    pub async fn query_address(&self) -> Result<Option<String>> {
        let response = self.post("query_ip").await?;
        let body = response
            .text()
            .await
            .context("Failed to read the address response")?;
        let body = body.trim();

        if body.is_empty() || body == "null" {
            Ok(None)
        } else {
            Ok(Some(body.to_string()))
        }
    }

    /// Start the remote server and poll until its address is known
    pub async fn resolve(&self) -> Result<String> {
        self.request_start().await?;

        info!("Waiting for the remote server address");
        for attempt in 1..=self.poll_attempts {
            if let Some(address) = self.query_address().await? {
                info!("Remote server address: {}", address);
                return Ok(address);
            }
            debug!(
                "Address not ready yet (attempt {}/{})",
                attempt, self.poll_attempts
            );
            tokio::time::sleep(self.poll_interval).await;
        }

        bail!("Timed out waiting for the remote server address. Try again later.")
    }

    async fn post(&self, path: &str) -> Result<reqwest::Response> {
        let mut url = self.base_url.clone();
        url.set_path(path);

        let response = self
            .http
            .post(url.clone())
            .form(&[("password", self.key.as_str())])
            .send()
            .await
            .with_context(|| format!("Request to {} failed", url))?;

        if response.status() != StatusCode::OK {
            bail!(
                "Request to {} failed with HTTP status {}. Try again later.",
                url,
                response.status()
            );
        }

        Ok(response)
    }
}

/// Keep only scheme and authority from the configured URL; https is assumed
/// when no scheme is given.
fn normalize_base_url(raw: &str) -> Result<Url> {
    let raw = raw.trim();
    if raw.is_empty() {
        bail!("Control URL is empty");
    }

    let with_scheme = if raw.contains("://") {
        raw.to_string()
    } else {
        format!("https://{}", raw)
    };

    let mut url =
        Url::parse(&with_scheme).with_context(|| format!("Invalid control URL: {}", raw))?;
    if !url.has_host() {
        bail!("Control URL has no host: {}", raw);
    }

    url.set_path("");
    url.set_query(None);
    url.set_fragment(None);
    Ok(url)
}
