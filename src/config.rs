//! Tracker configuration loaded from environment variables
//!
//! Environment variables:
//! - `RPC_URL` (required, http:// or https://)
//! - `TOKEN_ADDRESS` (optional, base58 mint address)
//! - `RPC_COMMITMENT` (default: confirmed)
//! - `RPC_TIMEOUT_SECS` (default: 30)
//! - `CONNECT_MAX_RETRIES` (default: 3)
//! - `CONNECT_RETRY_BASE_SECS` (default: 5)
//! - `POLL_INTERVAL_SECS` (default: 5)
//! - `MAX_POLL_INTERVAL_SECS` (default: 60)
//! - `SIGNATURE_FETCH_LIMIT` (default: 10)
//! - `MAX_TRANSACTIONS` (default: 100)
//! - `LARGE_TX_THRESHOLD` (default: 1000000, token base units)
//! - `LARGE_FEED_CAP` (default: 50)
//! - `ROUND_PAYOUT` (default: 100000)
//! - `TRACKER_DB_PATH` (default: round_tracker.db)
//! - `SNAPSHOT_PATH` (default: transactions.json)
//! - `SNAPSHOT_INTERVAL_SECS` (default: 60)
//!
//! Durations and sizes are bounded; `validate` rejects values above the
//! `MAX_*` limits below.

use crate::error::ConfigError;
use solana_pubkey::Pubkey;
use std::env;
use std::str::FromStr;
use std::time::Duration;

pub const MAX_POLL_INTERVAL: Duration = Duration::from_secs(3600);
pub const MAX_RPC_TIMEOUT: Duration = Duration::from_secs(300);
pub const MAX_RETRY_BASE_DELAY: Duration = Duration::from_secs(300);
pub const MAX_CONNECT_RETRIES: u32 = 100;
pub const MAX_SNAPSHOT_INTERVAL: Duration = Duration::from_secs(86_400);
pub const MAX_LOG_CAPACITY: usize = 100_000;
pub const MAX_FEED_CAPACITY: usize = 10_000;

/// Commitment level passed to every RPC read
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Commitment {
    Processed,
    Confirmed,
    Finalized,
}

impl Commitment {
    pub fn as_str(&self) -> &'static str {
        match self {
            Commitment::Processed => "processed",
            Commitment::Confirmed => "confirmed",
            Commitment::Finalized => "finalized",
        }
    }
}

/// Connection and request settings for the RPC endpoint
#[derive(Debug, Clone)]
pub struct RpcSettings {
    pub endpoint: String,
    pub commitment: Commitment,
    pub request_timeout: Duration,
    pub max_retries: u32,
    pub retry_base_delay: Duration,
}

/// Poll cadence and fetch size
#[derive(Debug, Clone)]
pub struct PollSettings {
    pub interval: Duration,
    pub max_interval: Duration,
    pub fetch_limit: usize,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5),
            max_interval: Duration::from_secs(60),
            fetch_limit: 10,
        }
    }
}

/// Transaction log and large-transaction feed limits
#[derive(Debug, Clone)]
pub struct StoreSettings {
    pub max_transactions: usize,
    pub large_tx_threshold: u64,
    pub large_feed_cap: usize,
}

impl Default for StoreSettings {
    fn default() -> Self {
        Self {
            max_transactions: 100,
            large_tx_threshold: 1_000_000,
            large_feed_cap: 50,
        }
    }
}

#[derive(Debug, Clone)]
pub struct TrackerConfig {
    pub rpc: RpcSettings,
    pub token_address: Option<String>,
    pub poll: PollSettings,
    pub store: StoreSettings,
    /// Points credited to the winner of each round
    pub round_payout: u64,
    pub db_path: String,
    pub snapshot_path: String,
    pub snapshot_interval: Duration,
}

impl TrackerConfig {
    /// Configuration with defaults for everything but the endpoint
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            rpc: RpcSettings {
                endpoint: endpoint.into(),
                commitment: Commitment::Confirmed,
                request_timeout: Duration::from_secs(30),
                max_retries: 3,
                retry_base_delay: Duration::from_secs(5),
            },
            token_address: None,
            poll: PollSettings::default(),
            store: StoreSettings::default(),
            round_payout: 100_000,
            db_path: "round_tracker.db".to_string(),
            snapshot_path: "transactions.json".to_string(),
            snapshot_interval: Duration::from_secs(60),
        }
    }

    pub fn from_env() -> Result<Self, ConfigError> {
        let endpoint = env::var("RPC_URL")
            .map_err(|_| ConfigError::MissingVariable("RPC_URL".to_string()))?;
        validate_endpoint(&endpoint)?;

        let mut config = Self::new(endpoint);

        let commitment_str = env::var("RPC_COMMITMENT").unwrap_or_else(|_| "confirmed".to_string());
        config.rpc.commitment = match commitment_str.to_lowercase().as_str() {
            "processed" => Commitment::Processed,
            "confirmed" => Commitment::Confirmed,
            "finalized" => Commitment::Finalized,
            _ => {
                log::warn!(
                    "Invalid RPC_COMMITMENT '{}', defaulting to confirmed",
                    commitment_str
                );
                Commitment::Confirmed
            }
        };

        config.rpc.request_timeout = Duration::from_secs(parse_or("RPC_TIMEOUT_SECS", 30));
        config.rpc.max_retries = parse_or("CONNECT_MAX_RETRIES", 3);
        config.rpc.retry_base_delay = Duration::from_secs(parse_or("CONNECT_RETRY_BASE_SECS", 5));

        config.token_address = match env::var("TOKEN_ADDRESS") {
            Ok(address) if !address.trim().is_empty() => {
                let address = address.trim().to_string();
                validate_token_address(&address)?;
                Some(address)
            }
            _ => None,
        };

        config.poll.interval = Duration::from_secs(parse_or("POLL_INTERVAL_SECS", 5));
        config.poll.max_interval = Duration::from_secs(parse_or("MAX_POLL_INTERVAL_SECS", 60));
        config.poll.fetch_limit = parse_or("SIGNATURE_FETCH_LIMIT", 10);

        config.store.max_transactions = parse_or("MAX_TRANSACTIONS", 100);
        config.store.large_tx_threshold = parse_or("LARGE_TX_THRESHOLD", 1_000_000);
        config.store.large_feed_cap = parse_or("LARGE_FEED_CAP", 50);

        config.round_payout = parse_or("ROUND_PAYOUT", 100_000);
        config.db_path = env::var("TRACKER_DB_PATH").unwrap_or(config.db_path);
        config.snapshot_path = env::var("SNAPSHOT_PATH").unwrap_or(config.snapshot_path);
        config.snapshot_interval = Duration::from_secs(parse_or("SNAPSHOT_INTERVAL_SECS", 60));

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_endpoint(&self.rpc.endpoint)?;

        if self.poll.interval.is_zero() {
            return Err(ConfigError::InvalidValue(
                "POLL_INTERVAL_SECS must be greater than zero".to_string(),
            ));
        }

        if self.poll.max_interval > MAX_POLL_INTERVAL {
            return Err(ConfigError::InvalidValue(format!(
                "MAX_POLL_INTERVAL_SECS must be at most {}",
                MAX_POLL_INTERVAL.as_secs()
            )));
        }

        if self.poll.max_interval < self.poll.interval {
            return Err(ConfigError::InvalidValue(
                "MAX_POLL_INTERVAL_SECS must not be below POLL_INTERVAL_SECS".to_string(),
            ));
        }

        // getSignaturesForAddress accepts at most 1000
        if self.poll.fetch_limit == 0 || self.poll.fetch_limit > 1000 {
            return Err(ConfigError::InvalidValue(format!(
                "SIGNATURE_FETCH_LIMIT must be 1-1000, got {}",
                self.poll.fetch_limit
            )));
        }

        if self.rpc.request_timeout.is_zero() || self.rpc.request_timeout > MAX_RPC_TIMEOUT {
            return Err(ConfigError::InvalidValue(format!(
                "RPC_TIMEOUT_SECS must be 1-{}",
                MAX_RPC_TIMEOUT.as_secs()
            )));
        }

        if self.rpc.retry_base_delay > MAX_RETRY_BASE_DELAY || self.rpc.max_retries > MAX_CONNECT_RETRIES {
            return Err(ConfigError::InvalidValue(format!(
                "CONNECT_RETRY_BASE_SECS must be at most {} and CONNECT_MAX_RETRIES at most {}",
                MAX_RETRY_BASE_DELAY.as_secs(),
                MAX_CONNECT_RETRIES
            )));
        }

        if self.store.max_transactions == 0 || self.store.large_feed_cap == 0 {
            return Err(ConfigError::InvalidValue(
                "MAX_TRANSACTIONS and LARGE_FEED_CAP must be greater than zero".to_string(),
            ));
        }

        if self.store.max_transactions > MAX_LOG_CAPACITY || self.store.large_feed_cap > MAX_FEED_CAPACITY {
            return Err(ConfigError::InvalidValue(format!(
                "MAX_TRANSACTIONS must be at most {} and LARGE_FEED_CAP at most {}",
                MAX_LOG_CAPACITY, MAX_FEED_CAPACITY
            )));
        }

        if self.snapshot_interval.is_zero() || self.snapshot_interval > MAX_SNAPSHOT_INTERVAL {
            return Err(ConfigError::InvalidValue(format!(
                "SNAPSHOT_INTERVAL_SECS must be 1-{}",
                MAX_SNAPSHOT_INTERVAL.as_secs()
            )));
        }

        if self.round_payout == 0 {
            return Err(ConfigError::InvalidValue(
                "ROUND_PAYOUT must be greater than zero".to_string(),
            ));
        }

        Ok(())
    }
}

pub fn validate_endpoint(endpoint: &str) -> Result<(), ConfigError> {
    if !endpoint.starts_with("http://") && !endpoint.starts_with("https://") {
        return Err(ConfigError::InvalidValue(
            "RPC_URL must start with http:// or https://".to_string(),
        ));
    }
    Ok(())
}

/// Token addresses must decode as a base58 public key
pub fn validate_token_address(address: &str) -> Result<(), ConfigError> {
    Pubkey::from_str(address)
        .map(|_| ())
        .map_err(|_| ConfigError::InvalidValue(format!("Invalid token address: {}", address)))
}

fn parse_or<T: FromStr>(name: &str, default: T) -> T {
    match env::var(name) {
        Ok(raw) => raw.trim().parse().unwrap_or_else(|_| {
            log::warn!("Invalid {} '{}', using default", name, raw);
            default
        }),
        Err(_) => default,
    }
}
