// Lobby configuration.
// Defaults < JSON file < MESHLOBBY_RELAY_URL < CLI flags.

use crate::error::{Error, Result};
use crate::peer::types::ServerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;

/// Environment variable overriding the relay URL
pub const RELAY_URL_ENV: &str = "MESHLOBBY_RELAY_URL";

pub const DEFAULT_RELAY_URL: &str = "ws://127.0.0.1:8080/";
pub const PRESENCE_INTERVAL: Duration = Duration::from_secs(10);
pub const SWEEP_INTERVAL: Duration = Duration::from_secs(10);
pub const PEER_TTL: Duration = Duration::from_secs(30);
pub const RECONNECT_DELAY: Duration = Duration::from_secs(3);
/// Wait before a disconnected peer transport counts as gone
pub const DISCONNECT_GRACE: Duration = Duration::from_secs(10);
pub const CHAT_HISTORY_LIMIT: usize = 500;

const DEFAULT_STUN_URLS: [&str; 5] = [
    "stun:stun.l.google.com:19302",
    "stun:stun1.l.google.com:19302",
    "stun:stun2.l.google.com:19302",
    "stun:stun3.l.google.com:19302",
    "stun:stun4.l.google.com:19302",
];

/// What to do with an inbound `call`
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "kebab-case")]
pub enum AnswerPolicy {
    /// Surface the call and wait for the user's decision
    #[default]
    Ask,
    AutoAccept,
    AutoReject,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(default)]
pub struct LobbyConfig {
    pub relay_url: String,
    pub ice_servers: Vec<ServerConfig>,
    #[serde(with = "secs")]
    pub presence_interval: Duration,
    #[serde(with = "secs")]
    pub sweep_interval: Duration,
    #[serde(with = "secs")]
    pub peer_ttl: Duration,
    #[serde(with = "secs")]
    pub reconnect_delay: Duration,
    #[serde(with = "secs")]
    pub disconnect_grace: Duration,
    pub answer_policy: AnswerPolicy,
    /// Keep candidates that arrive before the remote description instead of dropping them
    pub queue_early_candidates: bool,
    pub chat_history_limit: usize,
}

impl Default for LobbyConfig {
    fn default() -> Self {
        Self {
            relay_url: DEFAULT_RELAY_URL.into(),
            ice_servers: default_ice_servers(),
            presence_interval: PRESENCE_INTERVAL,
            sweep_interval: SWEEP_INTERVAL,
            peer_ttl: PEER_TTL,
            reconnect_delay: RECONNECT_DELAY,
            disconnect_grace: DISCONNECT_GRACE,
            answer_policy: AnswerPolicy::Ask,
            queue_early_candidates: false,
            chat_history_limit: CHAT_HISTORY_LIMIT,
        }
    }
}

pub fn default_ice_servers() -> Vec<ServerConfig> {
    DEFAULT_STUN_URLS
        .iter()
        .enumerate()
        .map(|(i, url)| ServerConfig::stun(&format!("default-stun-{i}"), url))
        .collect()
}

impl LobbyConfig {
    /// Loads a JSON config file; missing fields keep their defaults
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Applies `MESHLOBBY_RELAY_URL` when it is set and non-empty
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(url) = std::env::var(RELAY_URL_ENV) {
            if !url.trim().is_empty() {
                self.relay_url = url.trim().to_string();
            }
        }
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.relay_url.is_empty() {
            return Err(Error::InvalidConfig("relay_url cannot be empty".into()));
        }
        if !(self.relay_url.starts_with("ws://") || self.relay_url.starts_with("wss://")) {
            return Err(Error::InvalidConfig(format!(
                "relay_url must be ws:// or wss://, got {}",
                self.relay_url
            )));
        }

        for (name, value) in [
            ("presence_interval", self.presence_interval),
            ("sweep_interval", self.sweep_interval),
            ("peer_ttl", self.peer_ttl),
            ("reconnect_delay", self.reconnect_delay),
        ] {
            if value.is_zero() {
                return Err(Error::InvalidConfig(format!("{name} must be positive")));
            }
        }
        if self.peer_ttl <= self.sweep_interval {
            return Err(Error::InvalidConfig(
                "peer_ttl must be longer than sweep_interval".into(),
            ));
        }

        for server in &self.ice_servers {
            if server.url.is_empty() {
                return Err(Error::InvalidConfig(format!(
                    "ICE server {} has an empty url",
                    server.id
                )));
            }
            if server.r#type == "turn" && (server.username.is_none() || server.credential.is_none())
            {
                return Err(Error::InvalidConfig(format!(
                    "TURN server {} requires username and credential",
                    server.id
                )));
            }
        }
        Ok(())
    }
}

/// Durations as whole seconds
mod secs {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(value: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(value.as_secs())
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        u64::deserialize(d).map(Duration::from_secs)
    }
}
