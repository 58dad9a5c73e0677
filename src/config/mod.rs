//! Configuration module - environment variable parsing

use std::env;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;

use crate::util::rate_limit::INPUT_RATE_LIMIT;
use crate::util::time::DEFAULT_TICK_RATE;

/// Application configuration loaded from environment variables
#[derive(Clone, Debug)]
pub struct Config {
    /// Server binding address
    pub server_addr: SocketAddr,
    /// Log level (trace, debug, info, warn, error)
    pub log_level: String,

    /// Heightmap loaded at startup
    pub terrain_path: PathBuf,
    /// Scheduler frequency (Hz)
    pub tick_rate: u32,
    /// Physics steps per snapshot
    pub snapshot_every: u32,
    /// World spawn seed
    pub world_seed: u64,

    /// Messages buffered per player before it is evicted as a slow consumer
    pub outbound_queue_capacity: usize,
    /// Capacity of each arena event queue
    pub input_queue_capacity: usize,
    /// Control payloads accepted per player per second
    pub input_rate_limit: u32,
}

impl Config {
    /// Load configuration from environment variables
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from any key lookup (environment, test fixtures)
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        // Hosting platforms provide PORT, fall back to SERVER_ADDR or default
        let server_addr = match lookup("PORT") {
            Some(port) => format!("0.0.0.0:{}", port),
            None => lookup("SERVER_ADDR").unwrap_or_else(|| "0.0.0.0:8080".to_string()),
        };

        let config = Self {
            server_addr: server_addr
                .parse()
                .map_err(|_| ConfigError::InvalidAddress)?,

            log_level: lookup("LOG_LEVEL").unwrap_or_else(|| "info".to_string()),

            terrain_path: lookup("TERRAIN_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./map.esmap")),
            tick_rate: parse_or(&lookup, "TICK_RATE", DEFAULT_TICK_RATE)?,
            snapshot_every: parse_or(&lookup, "SNAPSHOT_EVERY", 1)?,
            world_seed: parse_or(&lookup, "WORLD_SEED", 0)?,

            outbound_queue_capacity: parse_or(&lookup, "OUTBOUND_QUEUE_CAPACITY", 64)?,
            input_queue_capacity: parse_or(&lookup, "INPUT_QUEUE_CAPACITY", 1024)?,
            input_rate_limit: parse_or(&lookup, "INPUT_RATE_LIMIT", INPUT_RATE_LIMIT)?,
        };

        if config.tick_rate == 0 {
            return Err(ConfigError::Invalid("TICK_RATE"));
        }
        if config.snapshot_every == 0 {
            return Err(ConfigError::Invalid("SNAPSHOT_EVERY"));
        }
        if config.outbound_queue_capacity == 0 {
            return Err(ConfigError::Invalid("OUTBOUND_QUEUE_CAPACITY"));
        }
        if config.input_queue_capacity == 0 {
            return Err(ConfigError::Invalid("INPUT_QUEUE_CAPACITY"));
        }

        Ok(config)
    }
}

fn parse_or<T: FromStr>(
    lookup: &impl Fn(&str) -> Option<String>,
    key: &'static str,
    default: T,
) -> Result<T, ConfigError> {
    match lookup(key) {
        Some(raw) => raw.trim().parse().map_err(|_| ConfigError::Invalid(key)),
        None => Ok(default),
    }
}

/// Configuration errors
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Invalid value for environment variable: {0}")]
    Invalid(&'static str),

    #[error("Invalid server address format")]
    InvalidAddress,
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use tokio_test::assert_err;

    fn load(vars: &[(&str, &str)]) -> Result<Config, ConfigError> {
        let vars: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        Config::from_lookup(|key| vars.get(key).cloned())
    }

    #[test]
    fn defaults_apply_when_unset() {
        let config = load(&[]).unwrap();

        assert_eq!(config.server_addr, "0.0.0.0:8080".parse::<SocketAddr>().unwrap());
        assert_eq!(config.log_level, "info");
        assert_eq!(config.terrain_path, PathBuf::from("./map.esmap"));
        assert_eq!(config.tick_rate, 60);
        assert_eq!(config.snapshot_every, 1);
        assert_eq!(config.outbound_queue_capacity, 64);
        assert_eq!(config.input_queue_capacity, 1024);
        assert_eq!(config.input_rate_limit, 120);
        assert_eq!(config.world_seed, 0);
    }

    #[test]
    fn port_takes_precedence_over_server_addr() {
        let config = load(&[("PORT", "9000"), ("SERVER_ADDR", "127.0.0.1:1234")]).unwrap();
        assert_eq!(config.server_addr.port(), 9000);

        let config = load(&[("SERVER_ADDR", "127.0.0.1:1234")]).unwrap();
        assert_eq!(config.server_addr, "127.0.0.1:1234".parse::<SocketAddr>().unwrap());
    }

    #[test]
    fn overrides_are_parsed() {
        let config = load(&[
            ("TICK_RATE", "30"),
            ("SNAPSHOT_EVERY", "2"),
            ("WORLD_SEED", "42"),
            ("TERRAIN_PATH", "/srv/maps/canyon.esmap"),
        ])
        .unwrap();

        assert_eq!(config.tick_rate, 30);
        assert_eq!(config.snapshot_every, 2);
        assert_eq!(config.world_seed, 42);
        assert_eq!(config.terrain_path, PathBuf::from("/srv/maps/canyon.esmap"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        assert!(matches!(
            load(&[("TICK_RATE", "fast")]),
            Err(ConfigError::Invalid("TICK_RATE"))
        ));
        assert!(matches!(
            load(&[("TICK_RATE", "0")]),
            Err(ConfigError::Invalid("TICK_RATE"))
        ));
        assert!(matches!(
            load(&[("SNAPSHOT_EVERY", "0")]),
            Err(ConfigError::Invalid("SNAPSHOT_EVERY"))
        ));
        assert_err!(load(&[("SERVER_ADDR", "not an address")]));
    }
}
