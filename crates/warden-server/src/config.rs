// Copyright (C) 2025 SyncMyOrders Sp. z o.o.
// SPDX-License-Identifier: AGPL-3.0-or-later
//! Configuration for warden-server.

use std::net::{Ipv4Addr, SocketAddr};
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

/// Which backend driver creates containers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// Plain directories and host processes. No isolation.
    Insecure,
    /// Script-driven Linux containers.
    Linux,
}

impl FromStr for BackendKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "insecure" => Ok(BackendKind::Insecure),
            "linux" => Ok(BackendKind::Linux),
            other => Err(ConfigError::InvalidBackend(other.to_string())),
        }
    }
}

/// Daemon configuration loaded from environment variables.
#[derive(Debug, Clone)]
pub struct Config {
    /// Unix socket the daemon listens on
    pub socket_path: PathBuf,
    /// TCP address to listen on instead of the Unix socket
    pub tcp_addr: Option<SocketAddr>,
    /// Directory holding container depots and backend scripts
    pub container_root: PathBuf,
    /// Backend driver
    pub backend: BackendKind,
    /// Default grace time; `None` disables automatic destruction
    pub grace_time: Option<Duration>,
    /// Default cap on combined job output; `None` is unbounded
    pub job_output_limit: Option<usize>,
    /// Delay between TERM and KILL when stopping processes
    pub kill_grace: Duration,
    /// Upper bound on a graceful drain
    pub drain_timeout: Duration,
    /// First /30 of the network pool
    pub network_pool_start: Ipv4Addr,
    /// Number of /30 networks in the pool
    pub network_pool_size: u32,
    /// Cooldown before a released network is handed out again
    pub network_release_delay: Duration,
    /// First uid of the uid pool
    pub uid_pool_start: u32,
    /// Number of uids in the pool
    pub uid_pool_size: u32,
    /// First host port of the port pool
    pub port_pool_start: u16,
    /// Number of ports in the pool
    pub port_pool_size: u16,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/tmp/warden.sock"),
            tcp_addr: None,
            container_root: PathBuf::from(".data/containers"),
            backend: BackendKind::Insecure,
            grace_time: Some(Duration::from_secs(300)),
            job_output_limit: Some(10 * 1024 * 1024),
            kill_grace: Duration::from_secs(5),
            drain_timeout: Duration::from_secs(30),
            network_pool_start: Ipv4Addr::new(10, 254, 0, 0),
            network_pool_size: 256,
            network_release_delay: Duration::from_secs(5),
            uid_pool_start: 10000,
            uid_pool_size: 256,
            port_pool_start: 61001,
            port_pool_size: 4000,
        }
    }
}

fn var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn parse_var<T: FromStr>(name: &'static str, default: T) -> Result<T, ConfigError> {
    match var(name) {
        Some(v) => v.parse().map_err(|_| ConfigError::InvalidValue(name, v)),
        None => Ok(default),
    }
}

/// Parse a seconds value where `none` disables the setting.
fn optional_secs(name: &'static str, default: Option<Duration>) -> Result<Option<Duration>, ConfigError> {
    match var(name).as_deref() {
        None => Ok(default),
        Some("none") => Ok(None),
        Some(v) => v
            .parse()
            .map(|secs| Some(Duration::from_secs(secs)))
            .map_err(|_| ConfigError::InvalidValue(name, v.to_string())),
    }
}

impl Config {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let socket_path = var("WARDEN_SOCKET_PATH")
            .map(PathBuf::from)
            .unwrap_or(defaults.socket_path);

        let tcp_addr = match var("WARDEN_TCP_ADDR") {
            Some(addr) => Some(
                addr.parse()
                    .map_err(|_| ConfigError::InvalidValue("WARDEN_TCP_ADDR", addr))?,
            ),
            None => None,
        };

        let container_root = var("WARDEN_CONTAINER_ROOT")
            .map(PathBuf::from)
            .unwrap_or(defaults.container_root);

        let backend = match var("WARDEN_BACKEND") {
            Some(b) => b.parse()?,
            None => defaults.backend,
        };

        let grace_time = optional_secs("WARDEN_GRACE_TIME_SECS", defaults.grace_time)?;

        let job_output_limit = match var("WARDEN_JOB_OUTPUT_LIMIT").as_deref() {
            None => defaults.job_output_limit,
            Some("none") => None,
            Some(v) => Some(v.parse().map_err(|_| {
                ConfigError::InvalidValue("WARDEN_JOB_OUTPUT_LIMIT", v.to_string())
            })?),
        };

        let kill_grace = Duration::from_secs(parse_var("WARDEN_KILL_GRACE_SECS", 5)?);
        let drain_timeout = Duration::from_secs(parse_var("WARDEN_DRAIN_TIMEOUT_SECS", 30)?);

        let network_pool_start =
            parse_var("WARDEN_NETWORK_POOL_START", defaults.network_pool_start)?;
        if u32::from(network_pool_start) % 4 != 0 {
            return Err(ConfigError::InvalidValue(
                "WARDEN_NETWORK_POOL_START",
                format!("{network_pool_start} is not aligned to a /30"),
            ));
        }

        Ok(Self {
            socket_path,
            tcp_addr,
            container_root,
            backend,
            grace_time,
            job_output_limit,
            kill_grace,
            drain_timeout,
            network_pool_start,
            network_pool_size: parse_var("WARDEN_NETWORK_POOL_SIZE", defaults.network_pool_size)?,
            network_release_delay: Duration::from_secs(parse_var(
                "WARDEN_NETWORK_RELEASE_DELAY_SECS",
                5,
            )?),
            uid_pool_start: parse_var("WARDEN_UID_POOL_START", defaults.uid_pool_start)?,
            uid_pool_size: parse_var("WARDEN_UID_POOL_SIZE", defaults.uid_pool_size)?,
            port_pool_start: parse_var("WARDEN_PORT_POOL_START", defaults.port_pool_start)?,
            port_pool_size: parse_var("WARDEN_PORT_POOL_SIZE", defaults.port_pool_size)?,
        })
    }
}

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An environment variable could not be parsed.
    #[error("Invalid value for {0}: {1}")]
    InvalidValue(&'static str, String),
    /// Unknown backend name.
    #[error("Unknown backend: {0} (expected insecure or linux)")]
    InvalidBackend(String),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.grace_time, Some(Duration::from_secs(300)));
        assert_eq!(config.network_pool_start, Ipv4Addr::new(10, 254, 0, 0));
        assert_eq!(config.backend, BackendKind::Insecure);
    }

    #[test]
    fn test_backend_kind_parse() {
        assert_eq!("linux".parse::<BackendKind>().unwrap(), BackendKind::Linux);
        assert!(matches!(
            "docker".parse::<BackendKind>(),
            Err(ConfigError::InvalidBackend(_))
        ));
    }

    #[test]
    fn test_config_error_display() {
        let err = ConfigError::InvalidValue("WARDEN_UID_POOL_SIZE", "lots".to_string());
        assert_eq!(
            err.to_string(),
            "Invalid value for WARDEN_UID_POOL_SIZE: lots"
        );
    }
}
