//! RDAP HTTP client.
//!
//! Blocking reqwest client (no Tokio runtime required). One request per
//! address, retried with exponential backoff on network errors, 429, 5xx
//! and unparseable bodies. Other 4xx responses fail immediately.

use std::thread;
use std::time::Duration;

use circuitmap_recon::config::RegistryConfig;

use crate::entity::RdapNetwork;
use crate::error::RegistryError;

const USER_AGENT: &str = concat!("cmap/", env!("CARGO_PKG_VERSION"));

/// RDAP API client (blocking).
#[derive(Clone)]
pub struct RdapClient {
    http: reqwest::blocking::Client,
    base_url: String,
    max_retries: u32,
    backoff_base: Duration,
}

impl RdapClient {
    pub fn new(config: &RegistryConfig) -> Result<Self, RegistryError> {
        let http = reqwest::blocking::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()
            .map_err(|e| RegistryError::Network(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            max_retries: config.max_retries,
            backoff_base: Duration::from_millis(config.backoff_base_ms),
        })
    }

    /// Point the client at another server (tests, mirrors).
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into().trim_end_matches('/').to_string();
        self
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    /// Fetch the RDAP network document for `ip`.
    pub fn fetch_network(&self, ip: &str) -> Result<RdapNetwork, RegistryError> {
        let url = format!("{}/ip/{}", self.base_url, ip);
        let mut backoff = self.backoff_base;

        for attempt in 0..=self.max_retries {
            let err = match self.fetch_once(&url) {
                Ok(network) => return Ok(network),
                Err(e) => e,
            };

            if !err.is_retryable() || attempt == self.max_retries {
                return Err(err);
            }

            log::warn!(
                "rdap {ip}: retry {}/{} in {}ms ({err})",
                attempt + 1,
                self.max_retries,
                backoff.as_millis()
            );
            thread::sleep(backoff);
            backoff *= 2;
        }

        Err(RegistryError::Network(format!("no attempt made for {ip}")))
    }

    fn fetch_once(&self, url: &str) -> Result<RdapNetwork, RegistryError> {
        let resp = self
            .http
            .get(url)
            .header("Accept", "application/rdap+json, application/json")
            .send()
            .map_err(|e| RegistryError::Network(e.to_string()))?;

        let status = resp.status().as_u16();
        if !resp.status().is_success() {
            let body = resp.text().unwrap_or_default();
            return Err(RegistryError::Http(status, body.chars().take(200).collect()));
        }

        let text = resp.text().map_err(|e| RegistryError::Network(e.to_string()))?;
        serde_json::from_str(&text).map_err(|e| {
            let head: String = text.chars().take(200).collect();
            RegistryError::Parse(format!("{e} (body: {head})"))
        })
    }
}
