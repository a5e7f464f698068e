//! Application configuration loaded from environment variables.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::errors::{BridgeError, Result};
use crate::poller::{Backoff, PollingPolicy};

#[derive(Clone)]
pub struct Config {
    /// Network JSON-RPC endpoint (e.g. http://localhost:4000/api)
    pub rpc_url: String,
    /// Hex private key the bridge signs every submission with
    pub signing_key: String,
    /// Registry contract address
    pub registry_address: String,
    /// Oracle contract source for the deploy-then-register plan
    pub oracle_contract_path: Option<PathBuf>,
    /// Port for the REST API server
    pub api_port: u16,
    /// Transport timeout applied to every RPC request
    pub rpc_timeout: Duration,
    /// Default receipt polling policy
    pub polling: PollingPolicy,
    /// Runs still waiting after this long are cancelled
    pub run_deadline: Duration,
}

impl Config {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let var = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let required = |key: &str| {
            var(key).ok_or_else(|| {
                BridgeError::Config(format!("{key} environment variable is required"))
            })
        };

        let interval_ms: u64 = parse_or(&var, "POLL_INTERVAL_MS", 3000)?;
        let max_attempts: u32 = parse_or(&var, "POLL_MAX_ATTEMPTS", 100)?;
        let max_interval_ms: u64 = parse_or(&var, "POLL_MAX_INTERVAL_MS", 30_000)?;
        let backoff = match var("POLL_BACKOFF").as_deref().unwrap_or("fixed") {
            "fixed" => Backoff::Fixed,
            "exponential" => Backoff::Exponential {
                cap: Duration::from_millis(max_interval_ms),
            },
            other => {
                return Err(BridgeError::Config(format!(
                    "Invalid POLL_BACKOFF `{other}` (expected `fixed` or `exponential`)"
                )))
            }
        };
        let polling =
            PollingPolicy::new(Duration::from_millis(interval_ms), max_attempts, backoff)
                .ok_or_else(|| {
                    BridgeError::Config(
                        "POLL_INTERVAL_MS and POLL_MAX_ATTEMPTS must both be at least 1"
                            .to_string(),
                    )
                })?;

        Ok(Config {
            rpc_url: var("RPC_URL").unwrap_or_else(|| "http://localhost:4000/api".to_string()),
            signing_key: required("SIGNING_KEY")?,
            registry_address: required("REGISTRY_ADDRESS")?,
            oracle_contract_path: var("ORACLE_CONTRACT_PATH").map(PathBuf::from),
            api_port: parse_or(&var, "API_PORT", 3001)?,
            rpc_timeout: Duration::from_secs(parse_or(&var, "RPC_TIMEOUT_SECS", 30)?),
            polling,
            run_deadline: Duration::from_secs(parse_or(&var, "RUN_DEADLINE_SECS", 900)?),
        })
    }
}

fn parse_or<T: FromStr>(
    var: &impl Fn(&str) -> Option<String>,
    key: &str,
    default: T,
) -> Result<T> {
    match var(key) {
        None => Ok(default),
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|_| BridgeError::Config(format!("Invalid {key}"))),
    }
}
