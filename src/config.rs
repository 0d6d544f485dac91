//! Session settings: JSON file, then environment overrides

use crate::error::{Error, Result};
use crate::media::MediaConstraints;
use crate::peer::types::ServerConfig;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

/// Verbose in debug builds, quiet in release builds
#[cfg(debug_assertions)]
pub const DEFAULT_LOG_FILTER: &str = "peermeet=debug";

#[cfg(not(debug_assertions))]
pub const DEFAULT_LOG_FILTER: &str = "warn";

/// What happens when the relay reports the remote peer gone
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum PeerLeftPolicy {
    /// Fresh connection, local media re-attached, wait for the next offer
    #[default]
    Rearm,
    End,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq, Eq)]
#[serde(default)]
pub struct SessionConfig {
    pub signaling_url: String,
    pub ice_servers: Vec<ServerConfig>,
    pub constraints: MediaConstraints,
    /// Offer as soon as local media is attached
    pub auto_offer: bool,
    pub peer_left: PeerLeftPolicy,
    /// How long a disconnected transport may recover before the session ends
    pub grace_period_secs: u64,
    pub local_author: String,
    pub remote_author: String,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            signaling_url: "ws://localhost:8080".into(),
            ice_servers: vec![
                ServerConfig::stun("google-1", "stun:stun.l.google.com:19302"),
                ServerConfig::stun("google-2", "stun:stun1.l.google.com:19302"),
            ],
            constraints: MediaConstraints::default(),
            auto_offer: true,
            peer_left: PeerLeftPolicy::Rearm,
            grace_period_secs: 10,
            local_author: "Me".into(),
            remote_author: "Peer".into(),
        }
    }
}

impl SessionConfig {
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&text)?;
        debug!("Loaded config from {}", path.display());
        Ok(config)
    }

    /// Applies `PEERMEET_*` overrides from the process environment.
    pub fn apply_env(&mut self) -> Result<()> {
        self.apply_vars(|key| std::env::var(key).ok())
    }

    fn apply_vars<F>(&mut self, var: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = var("PEERMEET_SIGNALING_URL") {
            self.signaling_url = url;
        }
        if let Some(json) = var("PEERMEET_ICE_SERVERS") {
            self.ice_servers = serde_json::from_str(&json)
                .map_err(|e| Error::Config(format!("PEERMEET_ICE_SERVERS: {e}")))?;
        }
        if let Some(flag) = var("PEERMEET_AUTO_OFFER") {
            self.auto_offer = parse_bool(&flag)
                .ok_or_else(|| Error::Config(format!("PEERMEET_AUTO_OFFER: {flag:?}")))?;
        }
        if let Some(secs) = var("PEERMEET_GRACE_PERIOD_SECS") {
            self.grace_period_secs = secs
                .trim()
                .parse()
                .map_err(|e| Error::Config(format!("PEERMEET_GRACE_PERIOD_SECS: {e}")))?;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.signaling_url.is_empty() {
            return Err(Error::Config("signaling_url is empty".into()));
        }
        for server in &self.ice_servers {
            match server.r#type.as_str() {
                "stun" => {}
                "turn" => {
                    if server.username.is_none() || server.credential.is_none() {
                        return Err(Error::Config(format!(
                            "TURN server {} needs username and credential",
                            server.id
                        )));
                    }
                }
                other => {
                    return Err(Error::Config(format!(
                        "ICE server {} has unknown type {other:?}",
                        server.id
                    )))
                }
            }
            if server.url.is_empty() {
                return Err(Error::Config(format!("ICE server {} has no url", server.id)));
            }
        }
        Ok(())
    }

    pub fn grace_period(&self) -> Duration {
        Duration::from_secs(self.grace_period_secs)
    }
}

fn parse_bool(s: &str) -> Option<bool> {
    match s.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    #[test]
    fn defaults_are_valid() {
        let config = SessionConfig::default();
        config.validate().unwrap();
        assert_eq!(config.grace_period(), Duration::from_secs(10));
        assert_eq!(config.peer_left, PeerLeftPolicy::Rearm);
    }

    #[test]
    fn partial_json_keeps_defaults() {
        let config: SessionConfig =
            serde_json::from_str(r#"{"auto_offer": false, "peer_left": "end"}"#).unwrap();
        assert!(!config.auto_offer);
        assert_eq!(config.peer_left, PeerLeftPolicy::End);
        assert_eq!(config.local_author, "Me");
        assert_eq!(config.ice_servers.len(), 2);
    }

    #[test]
    fn turn_without_credentials_is_rejected() {
        let mut config = SessionConfig::default();
        config.ice_servers.push(ServerConfig {
            id: "relay".into(),
            r#type: "turn".into(),
            url: "relay.example:3478".into(),
            username: Some("u".into()),
            credential: None,
        });
        assert!(matches!(config.validate(), Err(Error::Config(_))));
    }

    #[test]
    fn env_overrides() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("PEERMEET_SIGNALING_URL", "wss://relay.example"),
            ("PEERMEET_AUTO_OFFER", "no"),
            ("PEERMEET_GRACE_PERIOD_SECS", "3"),
            (
                "PEERMEET_ICE_SERVERS",
                r#"[{"id":"t","type":"turn","url":"t.example","username":"u","credential":"p"}]"#,
            ),
        ]);
        let mut config = SessionConfig::default();
        config
            .apply_vars(|k| vars.get(k).map(|v| v.to_string()))
            .unwrap();
        assert_eq!(config.signaling_url, "wss://relay.example");
        assert!(!config.auto_offer);
        assert_eq!(config.grace_period_secs, 3);
        assert_eq!(config.ice_servers[0].r#type, "turn");
        config.validate().unwrap();
    }

    #[test]
    fn bad_env_value_is_a_config_error() {
        let mut config = SessionConfig::default();
        let err = config
            .apply_vars(|k| (k == "PEERMEET_AUTO_OFFER").then(|| "maybe".to_string()))
            .unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }
}
