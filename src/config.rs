// SPDX-License-Identifier: AGPL-3.0-or-later
//
// Copyright (C) 2026 Relational Network

//! # Runtime Configuration
//!
//! Environment variable names, defaults, and the loader that turns them into
//! an [`AgentConfig`] at startup.
//!
//! ## Environment Variables
//!
//! | Variable | Description | Default |
//! |----------|-------------|---------|
//! | `HUB_API_URL` | Base URL of the billing hub REST API | Required |
//! | `RPC_URL` | Ledger node JSON-RPC endpoint | Required |
//! | `WALLET_KEY_PATH` | Device wallet key file (raw 32 bytes, hex, or PEM) | Required |
//! | `SETUP_KEY_PATH` | Factory setup key used to register the wallet | Optional (skips registration) |
//! | `SERIAL_NUMBER` | Device serial number | Required with `SETUP_KEY_PATH` |
//! | `POLL_INTERVAL_SECS` | Seconds between settlement cycles | `10` |
//! | `CONFIRMATION_INTERVAL_SECS` | Seconds between receipt polls | `10` |
//! | `MIN_CHANNEL_FUNDING` | Token units required before opening a channel | `500000000` |
//! | `RPC_TIMEOUT_SECS` | Per-request HTTP timeout | `15` |
//! | `LOG_FORMAT` | Logging format (`json` or `pretty`) | `pretty` |
//! | `RUST_LOG` | Log level filter | `info,relational_channel_agent=debug` |

use std::path::PathBuf;
use std::time::Duration;

use alloy::primitives::{keccak256, B256, U256};
use url::Url;

/// Base URL of the billing hub REST API.
pub const HUB_API_URL_ENV: &str = "HUB_API_URL";

/// JSON-RPC endpoint of the ledger node.
pub const RPC_URL_ENV: &str = "RPC_URL";

/// Path of the device wallet key. The key is only ever read.
pub const WALLET_KEY_PATH_ENV: &str = "WALLET_KEY_PATH";

/// Path of the factory setup key. When unset the device is assumed to be
/// registered already.
pub const SETUP_KEY_PATH_ENV: &str = "SETUP_KEY_PATH";

/// Device serial number, stored on-chain as its keccak-256 hash.
pub const SERIAL_NUMBER_ENV: &str = "SERIAL_NUMBER";

pub const POLL_INTERVAL_SECS_ENV: &str = "POLL_INTERVAL_SECS";
pub const CONFIRMATION_INTERVAL_SECS_ENV: &str = "CONFIRMATION_INTERVAL_SECS";
pub const MIN_CHANNEL_FUNDING_ENV: &str = "MIN_CHANNEL_FUNDING";
pub const RPC_TIMEOUT_SECS_ENV: &str = "RPC_TIMEOUT_SECS";

/// Logging format selector, read by `main` before anything else.
pub const LOG_FORMAT_ENV: &str = "LOG_FORMAT";

/// Filter used when `RUST_LOG` is unset.
pub const DEFAULT_LOG_FILTER: &str = "info,relational_channel_agent=debug";

pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_CONFIRMATION_INTERVAL_SECS: u64 = 10;
pub const DEFAULT_RPC_TIMEOUT_SECS: u64 = 15;

/// Five dollars at the 8 decimals of the hub's stable token.
pub const DEFAULT_MIN_CHANNEL_FUNDING: u64 = 500_000_000;

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required environment variable {0}")]
    Missing(&'static str),

    #[error("Invalid value for {name}: {reason}")]
    Invalid { name: &'static str, reason: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}

impl LogFormat {
    /// `json` (any case) selects JSON lines; anything else is pretty.
    pub fn parse(raw: Option<&str>) -> Self {
        match raw.map(str::trim) {
            Some(v) if v.eq_ignore_ascii_case("json") => LogFormat::Json,
            _ => LogFormat::Pretty,
        }
    }
}

/// Device registration inputs.
#[derive(Debug, Clone)]
pub struct SetupConfig {
    pub key_path: PathBuf,
    pub serial_number: String,
}

impl SetupConfig {
    pub fn serial_hash(&self) -> B256 {
        keccak256(self.serial_number.as_bytes())
    }
}

#[derive(Debug, Clone)]
pub struct AgentConfig {
    pub hub_api_url: Url,
    pub rpc_url: Url,
    pub wallet_key_path: PathBuf,
    pub setup: Option<SetupConfig>,
    pub poll_interval: Duration,
    pub confirmation_interval: Duration,
    pub min_channel_funding: U256,
    pub rpc_timeout: Duration,
    pub log_format: LogFormat,
}

impl AgentConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Load from an arbitrary variable source. Blank values count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| {
            lookup(name)
                .map(|v| v.trim().to_string())
                .filter(|v| !v.is_empty())
        };
        let required = |name: &'static str| get(name).ok_or(ConfigError::Missing(name));

        let setup = match get(SETUP_KEY_PATH_ENV) {
            Some(path) => Some(SetupConfig {
                key_path: PathBuf::from(path),
                serial_number: required(SERIAL_NUMBER_ENV)?,
            }),
            None => None,
        };

        Ok(Self {
            hub_api_url: parse_url(HUB_API_URL_ENV, &required(HUB_API_URL_ENV)?)?,
            rpc_url: parse_url(RPC_URL_ENV, &required(RPC_URL_ENV)?)?,
            wallet_key_path: PathBuf::from(required(WALLET_KEY_PATH_ENV)?),
            setup,
            poll_interval: seconds(
                POLL_INTERVAL_SECS_ENV,
                get(POLL_INTERVAL_SECS_ENV),
                DEFAULT_POLL_INTERVAL_SECS,
            )?,
            confirmation_interval: seconds(
                CONFIRMATION_INTERVAL_SECS_ENV,
                get(CONFIRMATION_INTERVAL_SECS_ENV),
                DEFAULT_CONFIRMATION_INTERVAL_SECS,
            )?,
            min_channel_funding: match get(MIN_CHANNEL_FUNDING_ENV) {
                Some(raw) => U256::from_str_radix(&raw, 10).map_err(|e| ConfigError::Invalid {
                    name: MIN_CHANNEL_FUNDING_ENV,
                    reason: e.to_string(),
                })?,
                None => U256::from(DEFAULT_MIN_CHANNEL_FUNDING),
            },
            rpc_timeout: seconds(
                RPC_TIMEOUT_SECS_ENV,
                get(RPC_TIMEOUT_SECS_ENV),
                DEFAULT_RPC_TIMEOUT_SECS,
            )?,
            log_format: LogFormat::parse(get(LOG_FORMAT_ENV).as_deref()),
        })
    }
}

fn parse_url(name: &'static str, raw: &str) -> Result<Url, ConfigError> {
    let url = Url::parse(raw).map_err(|e| ConfigError::Invalid {
        name,
        reason: e.to_string(),
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid {
            name,
            reason: format!("unsupported scheme {}", url.scheme()),
        });
    }
    Ok(url)
}

fn seconds(name: &'static str, raw: Option<String>, default: u64) -> Result<Duration, ConfigError> {
    let secs = match raw {
        Some(raw) => raw.parse::<u64>().map_err(|e| ConfigError::Invalid {
            name,
            reason: e.to_string(),
        })?,
        None => default,
    };
    if secs == 0 {
        return Err(ConfigError::Invalid {
            name,
            reason: "must be at least 1 second".to_string(),
        });
    }
    Ok(Duration::from_secs(secs))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn load(vars: &[(&str, &str)]) -> Result<AgentConfig, ConfigError> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        AgentConfig::from_lookup(|name| map.get(name).cloned())
    }

    const BASE: [(&str, &str); 3] = [
        ("HUB_API_URL", "http://hub.local:3000"),
        ("RPC_URL", "http://127.0.0.1:8545"),
        ("WALLET_KEY_PATH", "/var/lib/agent/wallet.key"),
    ];

    #[test]
    fn defaults_apply() {
        let config = load(&BASE).unwrap();
        assert_eq!(config.poll_interval, Duration::from_secs(10));
        assert_eq!(config.confirmation_interval, Duration::from_secs(10));
        assert_eq!(config.rpc_timeout, Duration::from_secs(15));
        assert_eq!(config.min_channel_funding, U256::from(500_000_000u64));
        assert_eq!(config.log_format, LogFormat::Pretty);
        assert!(config.setup.is_none());
    }

    #[test]
    fn missing_required_variable() {
        let err = load(&BASE[..2]).unwrap_err();
        assert!(matches!(err, ConfigError::Missing("WALLET_KEY_PATH")));
    }

    #[test]
    fn setup_key_requires_serial() {
        let mut vars = BASE.to_vec();
        vars.push(("SETUP_KEY_PATH", "/etc/agent/setup.key"));
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::Missing("SERIAL_NUMBER")
        ));

        vars.push(("SERIAL_NUMBER", "AGENT-0001"));
        let setup = load(&vars).unwrap().setup.unwrap();
        assert_eq!(setup.serial_hash(), keccak256(b"AGENT-0001"));
    }

    #[test]
    fn invalid_values_are_rejected() {
        let mut vars = BASE.to_vec();
        vars.push(("POLL_INTERVAL_SECS", "0"));
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::Invalid { name: "POLL_INTERVAL_SECS", .. }
        ));

        let mut vars = BASE.to_vec();
        vars[1] = ("RPC_URL", "ws://127.0.0.1:8546");
        assert!(matches!(
            load(&vars).unwrap_err(),
            ConfigError::Invalid { name: "RPC_URL", .. }
        ));

        let mut vars = BASE.to_vec();
        vars.push(("MIN_CHANNEL_FUNDING", "five"));
        assert!(load(&vars).is_err());
    }

    #[test]
    fn log_format_parsing() {
        assert_eq!(LogFormat::parse(Some("JSON")), LogFormat::Json);
        assert_eq!(LogFormat::parse(Some("pretty")), LogFormat::Pretty);
        assert_eq!(LogFormat::parse(None), LogFormat::Pretty);
    }
}
