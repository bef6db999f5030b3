//! Server configuration read from the environment

use std::net::SocketAddr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use acp_core::crypto::{generate_encryption_key, parse_encryption_key, CryptoError, KEY_SIZE};
use tracing::warn;

const DEFAULT_DATA_DIR: &str = ".acp-data";
const DEFAULT_MAX_CONNECTIONS: usize = 1000;
const DEFAULT_HEARTBEAT_INTERVAL_SECS: u64 = 20;
const DEFAULT_HEARTBEAT_TIMEOUT_SECS: u64 = 30;
const DEFAULT_CONNECT_RATE_LIMIT: usize = 10;
const DEFAULT_HANDSHAKE_TIMEOUT_SECS: u64 = 10;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub bind_addr: SocketAddr,
    pub data_dir: PathBuf,
    pub max_connections: usize,
    pub heartbeat_interval: Duration,
    pub heartbeat_timeout: Duration,
    pub connect_rate_limit: usize,
    pub handshake_timeout: Duration,
    pub encryption_key: Option<String>,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self::from_lookup(|_| None)
    }
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build from an arbitrary variable source
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let bind_addr = env_parse(&lookup, "ACP_BIND_ADDR", || {
            SocketAddr::from(([0, 0, 0, 0], 9090))
        });
        let data_dir = lookup("ACP_DATA_DIR")
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from(DEFAULT_DATA_DIR));
        let max_connections =
            env_parse(&lookup, "ACP_MAX_CONNECTIONS", || DEFAULT_MAX_CONNECTIONS);
        let heartbeat_timeout = Duration::from_secs(positive_secs(
            &lookup,
            "ACP_HEARTBEAT_TIMEOUT_SECS",
            DEFAULT_HEARTBEAT_TIMEOUT_SECS,
        ));
        let mut heartbeat_interval = Duration::from_secs(positive_secs(
            &lookup,
            "ACP_HEARTBEAT_INTERVAL_SECS",
            DEFAULT_HEARTBEAT_INTERVAL_SECS,
        ));
        if heartbeat_interval >= heartbeat_timeout {
            let clamped = heartbeat_timeout / 2;
            warn!(
                "Heartbeat interval must be smaller than the timeout interval_secs={} timeout_secs={} using_ms={}",
                heartbeat_interval.as_secs(),
                heartbeat_timeout.as_secs(),
                clamped.as_millis()
            );
            heartbeat_interval = clamped;
        }
        let connect_rate_limit =
            env_parse(&lookup, "ACP_CONNECT_RATE_LIMIT", || DEFAULT_CONNECT_RATE_LIMIT);
        let handshake_timeout = Duration::from_secs(positive_secs(
            &lookup,
            "ACP_HANDSHAKE_TIMEOUT_SECS",
            DEFAULT_HANDSHAKE_TIMEOUT_SECS,
        ));
        let encryption_key = lookup("ACP_ENCRYPTION_KEY")
            .map(|raw| raw.trim().to_string())
            .filter(|raw| !raw.is_empty());

        Self {
            bind_addr,
            data_dir,
            max_connections,
            heartbeat_interval,
            heartbeat_timeout,
            connect_rate_limit,
            handshake_timeout,
            encryption_key,
        }
    }

    /// Decode the configured vault key, or generate a throwaway one
    pub fn resolve_encryption_key(&self) -> Result<[u8; KEY_SIZE], CryptoError> {
        match &self.encryption_key {
            Some(encoded) => parse_encryption_key(encoded),
            None => {
                warn!(
                    "ACP_ENCRYPTION_KEY is not set, using an ephemeral key; stored gateway credentials will not decrypt after restart"
                );
                Ok(generate_encryption_key())
            }
        }
    }
}

fn env_parse<T, F, D>(lookup: &F, name: &str, default: D) -> T
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
    D: FnOnce() -> T,
{
    match lookup(name) {
        Some(raw) => match raw.trim().parse::<T>() {
            Ok(value) => value,
            Err(_) => {
                warn!("Ignoring invalid value name={} value={}", name, raw);
                default()
            }
        },
        None => default(),
    }
}

fn positive_secs<F>(lookup: &F, name: &str, default: u64) -> u64
where
    F: Fn(&str) -> Option<String>,
{
    let secs = env_parse(lookup, name, || default);
    if secs == 0 {
        warn!("Ignoring zero duration name={}", name);
        return default;
    }
    secs
}
