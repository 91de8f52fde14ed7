use serde::{Deserialize, Serialize};
use serde_valid::Validate;

/// WiFi credentials submitted to the device
///
/// Serialized as the JSON body of the setup request. Lengths follow the
/// 802.11 limits in octets of the UTF-8 encoding: an SSID carries 1 to 32
/// octets and a WPA passphrase at most 63. An empty password selects an open
/// network.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq, Validate)]
pub struct Credentials {
    #[validate(custom = ssid_octets)]
    pub ssid: String,
    #[validate(custom = passphrase_octets)]
    pub password: String,
}

pub const MAX_SSID_OCTETS: usize = 32;
pub const MAX_PASSPHRASE_OCTETS: usize = 63;

fn ssid_octets(ssid: &str) -> Result<(), serde_valid::validation::Error> {
    octets(ssid, 1, MAX_SSID_OCTETS)
}

fn passphrase_octets(password: &str) -> Result<(), serde_valid::validation::Error> {
    octets(password, 0, MAX_PASSPHRASE_OCTETS)
}

fn octets(value: &str, min: usize, max: usize) -> Result<(), serde_valid::validation::Error> {
    let len = value.len();

    if (min..=max).contains(&len) {
        Ok(())
    } else {
        Err(serde_valid::validation::Error::Custom(format!(
            "length must be {min} to {max} octets, got {len}"
        )))
    }
}

impl Credentials {
    pub fn new(ssid: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            ssid: ssid.into(),
            password: password.into(),
        }
    }
}

/// Classified result of a single setup request
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum AttemptOutcome {
    /// Device joined the network
    Success,
    /// Device was reachable and rejected the credentials
    ApplicationFailure,
    /// Device unreachable, timed out or answered with something unusable
    TransportError,
}

/// Lifecycle phase of a provisioning session
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub enum Phase {
    #[default]
    Idle,
    Connecting,
    Retrying,
    Succeeded,
    Failed,
}

impl Phase {
    /// Whether the session still has work pending (request or retry delay)
    pub fn is_active(self) -> bool {
        matches!(self, Phase::Connecting | Phase::Retrying)
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, Phase::Succeeded | Phase::Failed)
    }
}

/// What to do when provisioning is triggered while a session is still active
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ReentryPolicy {
    /// Cancel the running session and start over with the new credentials
    #[default]
    Restart,
    /// Keep the running session, drop the new trigger
    Ignore,
}

impl std::str::FromStr for ReentryPolicy {
    type Err = anyhow::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "restart" => Ok(ReentryPolicy::Restart),
            "ignore" => Ok(ReentryPolicy::Ignore),
            other => anyhow::bail!("unknown reentry policy: {other}"),
        }
    }
}

/// Read-only view of the session published to the presentation layer
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    /// Generation id of the session this snapshot belongs to (0 before the first one)
    pub session: u64,
    pub phase: Phase,
    pub retry_count: u32,
    pub countdown_seconds: u32,
    pub dots_phase: u8,
}

impl Snapshot {
    /// Progress dots for the current animation frame
    pub fn dots(&self) -> &'static str {
        match self.dots_phase {
            0 => "",
            1 => ".",
            2 => "..",
            _ => "...",
        }
    }
}
