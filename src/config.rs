//! Server configuration (spec §6.2): a typed, `Default`-backed struct loaded
//! from a JSON file with environment-variable overrides, the same loader
//! shape as the teacher's `load_config`.

use std::{env, fs::read_to_string, path::Path};

use serde::Deserialize;

/// Environment variable carrying the whole config as a JSON document,
/// checked before the on-disk file.
const CONFIG_ENV_KEY: &str = "RELAY_CONFIG_JSON";

const CONFIG_FILE: &str = "config.json";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub bind_addr: String,
    pub port: u16,
    pub max_peers: usize,
    pub max_rooms: usize,
    pub max_room_members: usize,
    /// Absolute ceiling on a room's `maxPlayers`, regardless of what a
    /// client requests at creation time (spec §6.2).
    pub max_players_room_hard_cap: usize,
    pub event_cache_capacity: usize,
    pub outbound_queue_capacity: usize,
    pub liveness_timeout_secs: u64,
    pub ping_interval_secs: u64,
    pub cleanup_interval_secs: u64,
    pub empty_room_ttl_secs: u64,
    pub shutdown_drain_secs: u64,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: "0.0.0.0".to_string(),
            port: 9340,
            max_peers: 4096,
            max_rooms: 1024,
            max_room_members: 16,
            max_players_room_hard_cap: 500,
            event_cache_capacity: 100,
            outbound_queue_capacity: 1024,
            liveness_timeout_secs: 60,
            ping_interval_secs: 30,
            cleanup_interval_secs: 60,
            empty_room_ttl_secs: 300,
            shutdown_drain_secs: 10,
        }
    }
}

impl ServerConfig {
    /// Applies `RELAY_`-prefixed environment overrides on top of whatever
    /// was loaded from file/env JSON, one field at a time, so a deployment
    /// can tweak a single knob without shipping a whole config document.
    fn apply_env_overrides(&mut self) {
        if let Ok(v) = env::var("RELAY_BIND_ADDR") {
            self.bind_addr = v;
        }
        if let Some(v) = parsed_env("RELAY_PORT") {
            self.port = v;
        }
        if let Some(v) = parsed_env("RELAY_MAX_PEERS") {
            self.max_peers = v;
        }
        if let Some(v) = parsed_env("RELAY_MAX_ROOMS") {
            self.max_rooms = v;
        }
        if let Some(v) = parsed_env("RELAY_MAX_ROOM_MEMBERS") {
            self.max_room_members = v;
        }
    }
}

fn parsed_env<T: std::str::FromStr>(key: &str) -> Option<T> {
    env::var(key).ok().and_then(|v| v.parse().ok())
}

/// Loads configuration, preferring a `RELAY_CONFIG_JSON` environment
/// variable over `config.json` on disk, and falling back to defaults if
/// neither is present or either fails to parse.
pub fn load_config() -> ServerConfig {
    let mut config = if let Ok(env_json) = env::var(CONFIG_ENV_KEY) {
        match serde_json::from_str(&env_json) {
            Ok(config) => config,
            Err(err) => {
                log::warn!("failed to parse {CONFIG_ENV_KEY} (using defaults): {err}");
                ServerConfig::default()
            }
        }
    } else {
        load_from_file().unwrap_or_default()
    };

    config.apply_env_overrides();
    config
}

fn load_from_file() -> Option<ServerConfig> {
    let path = Path::new(CONFIG_FILE);
    if !path.exists() {
        return None;
    }
    let contents = match read_to_string(path) {
        Ok(contents) => contents,
        Err(err) => {
            log::warn!("failed to read {CONFIG_FILE} (using defaults): {err}");
            return None;
        }
    };
    match serde_json::from_str(&contents) {
        Ok(config) => Some(config),
        Err(err) => {
            log::warn!("failed to parse {CONFIG_FILE} (using defaults): {err}");
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let config = ServerConfig::default();
        assert_eq!(config.port, 9340);
        assert!(config.max_peers > 0);
    }
}
