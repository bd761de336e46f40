use serde::{Deserialize, Serialize};

fn default_bind_addr() -> String {
    "127.0.0.1:8088".to_string()
}

fn default_subscription_queue_capacity() -> usize {
    256
}

fn default_dedup_cache_size() -> usize {
    256
}

fn default_heartbeat_secs() -> u64 {
    15
}

fn default_log_format() -> String {
    "pretty".to_string()
}

/// Layered configuration shared by the gateway binary and any embedder that
/// wires up the orchestrator directly. Loaded from an optional TOML file and
/// overridden by environment variables (`CONCLAVE_*`); see `Config::load`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Config {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,

    /// Bearer token required on the WebSocket and REST surfaces. `None`
    /// disables auth, which is only appropriate for local development.
    #[serde(default)]
    pub api_token: Option<String>,

    #[serde(default = "default_subscription_queue_capacity")]
    pub subscription_queue_capacity: usize,

    #[serde(default = "default_dedup_cache_size")]
    pub dedup_cache_size: usize,

    #[serde(default = "default_heartbeat_secs")]
    pub heartbeat_secs: u64,

    /// `pretty` or `json`.
    #[serde(default = "default_log_format")]
    pub log_format: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            api_token: None,
            subscription_queue_capacity: default_subscription_queue_capacity(),
            dedup_cache_size: default_dedup_cache_size(),
            heartbeat_secs: default_heartbeat_secs(),
            log_format: default_log_format(),
        }
    }
}

impl Config {
    /// Parse from TOML text, without applying environment overrides.
    pub fn from_toml(text: &str) -> crate::error::Result<Self> {
        toml::from_str(text).map_err(|e| crate::error::Error::Config(e.to_string()))
    }

    /// Load from an optional file path, then apply `CONCLAVE_*` environment
    /// variable overrides on top. Missing file is not an error: defaults
    /// apply and env vars can supply everything.
    pub fn load(path: Option<&std::path::Path>) -> crate::error::Result<Self> {
        let mut config = match path {
            Some(p) => {
                let text = std::fs::read_to_string(p)?;
                Self::from_toml(&text)?
            }
            None => Self::default(),
        };
        config.apply_env_overrides();
        Ok(config)
    }

    fn apply_env_overrides(&mut self) {
        if let Ok(v) = std::env::var("CONCLAVE_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Ok(v) = std::env::var("CONCLAVE_API_TOKEN") {
            self.api_token = Some(v);
        }
        if let Ok(v) = std::env::var("CONCLAVE_LOG_FORMAT") {
            self.log_format = v;
        }
        if let Ok(v) = std::env::var("CONCLAVE_HEARTBEAT_SECS") {
            if let Ok(secs) = v.parse() {
                self.heartbeat_secs = secs;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_when_no_file_and_no_env() {
        std::env::remove_var("CONCLAVE_BIND_ADDR");
        let config = Config::load(None).unwrap();
        assert_eq!(config.bind_addr, "127.0.0.1:8088");
        assert_eq!(config.subscription_queue_capacity, 256);
    }

    #[test]
    fn partial_toml_fills_remaining_defaults() {
        let config = Config::from_toml("bind_addr = \"0.0.0.0:9000\"\n").unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9000");
        assert_eq!(config.heartbeat_secs, 15);
    }

    #[test]
    fn env_override_wins_over_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("conclave.toml");
        std::fs::write(&path, "bind_addr = \"0.0.0.0:9000\"\n").unwrap();
        std::env::set_var("CONCLAVE_BIND_ADDR", "0.0.0.0:9999");
        let config = Config::load(Some(&path)).unwrap();
        assert_eq!(config.bind_addr, "0.0.0.0:9999");
        std::env::remove_var("CONCLAVE_BIND_ADDR");
    }
}
