use crate::types::ReentryPolicy;
use anyhow::{Context, Result, ensure};
use std::{env, time::Duration};

/// Fixed address of the device while it runs its setup access point
pub const DEFAULT_DEVICE_URL: &str = "http://192.168.4.1";
pub const REQUEST_TIMEOUT: Duration = Duration::from_millis(2000);
pub const RETRY_DELAY: Duration = Duration::from_millis(2000);
pub const MAX_RETRIES: u32 = 3;
pub const COUNTDOWN_START_SECONDS: u32 = 2;
pub const DOTS_INTERVAL: Duration = Duration::from_millis(500);
pub const COUNTDOWN_INTERVAL: Duration = Duration::from_millis(1000);

/// Provisioner configuration
///
/// `Default` carries the built-in values; [`ProvisionerConfig::from_env`]
/// overrides them from `PROVISIONER_*` environment variables.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct ProvisionerConfig {
    /// Device endpoint configuration
    pub device: DeviceConfig,

    /// Retry ceiling and re-entrancy rules
    pub session: SessionPolicy,

    /// Retry delay and cosmetic ticker periods
    pub timing: TimingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeviceConfig {
    pub url: String,
    pub request_timeout: Duration,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionPolicy {
    pub max_retries: u32,
    pub countdown_start_seconds: u32,
    pub reentry: ReentryPolicy,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TimingConfig {
    pub retry_delay: Duration,
    pub dots_interval: Duration,
    pub countdown_interval: Duration,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            url: DEFAULT_DEVICE_URL.to_string(),
            request_timeout: REQUEST_TIMEOUT,
        }
    }
}

impl Default for SessionPolicy {
    fn default() -> Self {
        Self {
            max_retries: MAX_RETRIES,
            countdown_start_seconds: COUNTDOWN_START_SECONDS,
            reentry: ReentryPolicy::default(),
        }
    }
}

impl Default for TimingConfig {
    fn default() -> Self {
        Self {
            retry_delay: RETRY_DELAY,
            dots_interval: DOTS_INTERVAL,
            countdown_interval: COUNTDOWN_INTERVAL,
        }
    }
}

impl ProvisionerConfig {
    /// Load the configuration from the process environment
    pub fn from_env() -> Result<Self> {
        Self::load_with(|name| env::var(name).ok())
    }

    /// Load the configuration from an arbitrary variable lookup
    ///
    /// Unset variables keep their defaults, malformed ones are reported as errors.
    pub fn load_with<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let device = DeviceConfig::load(&lookup)?;
        let session = SessionPolicy::load(&lookup)?;
        let timing = TimingConfig::load(&lookup)?;

        Ok(Self {
            device,
            session,
            timing,
        })
    }
}

impl DeviceConfig {
    fn load<F>(lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let url = lookup("PROVISIONER_DEVICE_URL")
            .unwrap_or_else(|| DEFAULT_DEVICE_URL.to_string())
            .trim_end_matches('/')
            .to_string();

        // the setup access point only serves plain HTTP
        ensure!(
            url.starts_with("http://"),
            "failed to parse PROVISIONER_DEVICE_URL: expected http:// URL, got {url}"
        );

        let request_timeout =
            millis(lookup, "PROVISIONER_REQUEST_TIMEOUT_MS")?.unwrap_or(REQUEST_TIMEOUT);

        ensure!(
            !request_timeout.is_zero(),
            "failed to parse PROVISIONER_REQUEST_TIMEOUT_MS: timeout must not be zero"
        );

        Ok(Self {
            url,
            request_timeout,
        })
    }
}

impl SessionPolicy {
    fn load<F>(lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let max_retries = lookup("PROVISIONER_MAX_RETRIES")
            .map(|v| {
                v.trim()
                    .parse::<u32>()
                    .context("failed to parse PROVISIONER_MAX_RETRIES: invalid format")
            })
            .transpose()?
            .unwrap_or(MAX_RETRIES);

        let reentry = lookup("PROVISIONER_REENTRY_POLICY")
            .map(|v| {
                v.parse::<ReentryPolicy>()
                    .context("failed to parse PROVISIONER_REENTRY_POLICY")
            })
            .transpose()?
            .unwrap_or_default();

        Ok(Self {
            max_retries,
            countdown_start_seconds: COUNTDOWN_START_SECONDS,
            reentry,
        })
    }
}

impl TimingConfig {
    fn load<F>(lookup: &F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let retry_delay = millis(lookup, "PROVISIONER_RETRY_DELAY_MS")?.unwrap_or(RETRY_DELAY);

        Ok(Self {
            retry_delay,
            ..Default::default()
        })
    }
}

fn millis<F>(lookup: &F, name: &str) -> Result<Option<Duration>>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|v| {
            v.trim()
                .parse::<u64>()
                .map(Duration::from_millis)
                .with_context(|| format!("failed to parse {name}: invalid format"))
        })
        .transpose()
}
