use crate::{
    config::DeviceConfig,
    http_client::{build_url, device_client, handle_http_response},
    types::{AttemptOutcome, Credentials},
};
use anyhow::{Context, Result};
use log::{debug, info, warn};
#[cfg(feature = "mock")]
use mockall::automock;
use reqwest::Client;
use serde::Deserialize;
use std::time::Duration;
use trait_variant::make;

pub const WIFI_SETUP_ENDPOINT: &str = "/wifi-setup";

/// `status` field reported by the device
#[derive(Debug, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum SetupStatus {
    Success,
    Fail,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Deserialize)]
pub struct SetupReply {
    pub status: SetupStatus,
}

impl SetupReply {
    pub fn outcome(&self) -> AttemptOutcome {
        match self.status {
            SetupStatus::Success => AttemptOutcome::Success,
            SetupStatus::Fail => AttemptOutcome::ApplicationFailure,
            SetupStatus::Unknown => {
                warn!("device replied with an unrecognized status");
                AttemptOutcome::TransportError
            }
        }
    }
}

/// Issues a single provisioning request and classifies its result
///
/// Implementations never fail: every error ends up as
/// [`AttemptOutcome::TransportError`].
#[make(Send)]
#[cfg_attr(feature = "mock", automock)]
pub trait AttemptExecutor {
    async fn execute(&self, credentials: &Credentials) -> AttemptOutcome;
}

/// Race a request against a hard deadline
///
/// Whichever settles first wins. On timeout the request future is dropped,
/// which aborts the underlying connection.
pub async fn execute_with_timeout<F>(request: F, timeout: Duration) -> AttemptOutcome
where
    F: Future<Output = Result<AttemptOutcome>>,
{
    match tokio::time::timeout(timeout, request).await {
        Ok(Ok(outcome)) => outcome,
        Ok(Err(e)) => {
            warn!("error connecting to device: {e:#}");
            AttemptOutcome::TransportError
        }
        Err(_) => {
            warn!("setup request timed out after {timeout:?}");
            AttemptOutcome::TransportError
        }
    }
}

/// Executor posting credentials to the device's `/wifi-setup` endpoint
#[derive(Clone, Debug)]
pub struct HttpAttemptExecutor {
    client: Client,
    url: String,
    timeout: Duration,
}

impl HttpAttemptExecutor {
    pub fn new(config: &DeviceConfig) -> Result<Self> {
        Ok(Self {
            client: device_client()?,
            url: build_url(&config.url, WIFI_SETUP_ENDPOINT),
            timeout: config.request_timeout,
        })
    }

    pub fn url(&self) -> &str {
        &self.url
    }

    async fn post_credentials(&self, credentials: &Credentials) -> Result<AttemptOutcome> {
        info!("POST {} (ssid: {})", self.url, credentials.ssid);

        let res = self
            .client
            .post(&self.url)
            .json(credentials)
            .send()
            .await
            .context(format!("failed to send POST request to {}", self.url))?;

        let body = handle_http_response(res, &format!("POST {}", self.url)).await?;
        debug!("response from device: {body}");

        let reply: SetupReply =
            serde_json::from_str(&body).context("failed to parse setup reply")?;

        Ok(reply.outcome())
    }
}

impl AttemptExecutor for HttpAttemptExecutor {
    async fn execute(&self, credentials: &Credentials) -> AttemptOutcome {
        execute_with_timeout(self.post_credentials(credentials), self.timeout).await
    }
}
