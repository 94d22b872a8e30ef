//! HTTP implementations of the controller capabilities.
//!
//! The daemon wires these to whatever deploy system, routing layer and
//! metrics backend sit behind the configured URLs:
//!
//! - deploy: `POST {deploy_url}` with `{"slot": "green", "version": "v2"}`
//! - switch: `POST {switch_url}` with `{"from": "blue", "to": "green"}`
//! - split:  `POST {split_url}` with `{"rules": [{"version", "percentage"}]}`
//! - metrics: `GET {endpoint}{path}?version=v2`, answering a camelCase
//!   subset of the canary counters
//!
//! Any non-2xx answer is a failure.

use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use rampart_probe::http;
use serde::Serialize;
use tracing::debug;
use url::Url;

use crate::blue_green::Slot;
use crate::canary::MetricsUpdate;
use crate::capability::{Deployer, MetricsSource, TrafficRouter, TrafficRule};

fn parse(url: &str) -> anyhow::Result<Url> {
    Url::parse(url).with_context(|| format!("invalid webhook url {url:?}"))
}

/// Reads canary metrics from an HTTP endpoint.
#[derive(Debug, Clone)]
pub struct HttpMetricsSource {
    url: Url,
    timeout: Duration,
}

impl HttpMetricsSource {
    pub fn new(endpoint: &str, path: &str, timeout: Duration) -> anyhow::Result<Self> {
        let url = parse(&http::join_url(endpoint, path))?;
        Ok(Self { url, timeout })
    }

    /// Request URL for a version.
    pub fn url_for(&self, version: &str) -> Url {
        let mut url = self.url.clone();
        url.query_pairs_mut().append_pair("version", version);
        url
    }
}

#[async_trait]
impl MetricsSource for HttpMetricsSource {
    async fn fetch(&self, version: &str) -> anyhow::Result<MetricsUpdate> {
        let url = self.url_for(version);
        let response = http::get(url.as_str(), self.timeout)
            .await?
            .error_for_status()?;
        let update = response.json::<MetricsUpdate>()?;
        debug!(%version, "fetched canary metrics");
        Ok(update)
    }
}

#[derive(Serialize)]
struct DeployRequest<'a> {
    slot: Slot,
    version: &'a str,
}

/// Deploys by posting to a webhook.
#[derive(Debug, Clone)]
pub struct WebhookDeployer {
    url: Url,
    timeout: Duration,
}

impl WebhookDeployer {
    pub fn new(url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            url: parse(url)?,
            timeout,
        })
    }
}

#[async_trait]
impl Deployer for WebhookDeployer {
    async fn deploy(&self, slot: Slot, version: &str) -> anyhow::Result<()> {
        http::post_json(self.url.as_str(), &DeployRequest { slot, version }, self.timeout)
            .await?
            .error_for_status()?;
        debug!(%slot, %version, "deploy webhook accepted");
        Ok(())
    }
}

#[derive(Serialize)]
struct SwitchRequest {
    from: Slot,
    to: Slot,
}

#[derive(Serialize)]
struct SplitRequest<'a> {
    rules: &'a [TrafficRule],
}

/// Routes traffic by posting to switch and split webhooks.
#[derive(Debug, Clone)]
pub struct WebhookRouter {
    switch_url: Url,
    split_url: Url,
    timeout: Duration,
}

impl WebhookRouter {
    pub fn new(switch_url: &str, split_url: &str, timeout: Duration) -> anyhow::Result<Self> {
        Ok(Self {
            switch_url: parse(switch_url)?,
            split_url: parse(split_url)?,
            timeout,
        })
    }
}

#[async_trait]
impl TrafficRouter for WebhookRouter {
    async fn switch_traffic(&self, from: Slot, to: Slot) -> anyhow::Result<()> {
        http::post_json(self.switch_url.as_str(), &SwitchRequest { from, to }, self.timeout)
            .await?
            .error_for_status()?;
        debug!(%from, %to, "switch webhook accepted");
        Ok(())
    }

    async fn apply_split(&self, rules: &[TrafficRule]) -> anyhow::Result<()> {
        http::post_json(self.split_url.as_str(), &SplitRequest { rules }, self.timeout)
            .await?
            .error_for_status()?;
        debug!(rules = rules.len(), "split webhook accepted");
        Ok(())
    }
}
