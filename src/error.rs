//! Error taxonomy for the tracker
//!
//! Transient failures (`RpcError::RateLimited`, `RpcError::Timeout`, transport
//! errors) are retried or absorbed by the poller. `ConnectError::Exhausted` is
//! terminal until the caller reconnects. Winner determination outcomes are not
//! errors and live in `winner::WinnerOutcome`.

use std::time::Duration;
use thiserror::Error;

/// Errors raised while talking to the ledger RPC endpoint
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RpcError {
    #[error("Rate limited by RPC endpoint")]
    RateLimited,

    #[error("RPC call timed out after {0:?}")]
    Timeout(Duration),

    #[error("Transport error: {0}")]
    Transport(String),

    #[error("HTTP status {0}")]
    Http(u16),

    #[error("RPC error {code}: {message}")]
    Rpc { code: i64, message: String },

    #[error("Malformed RPC response: {0}")]
    Malformed(String),

    #[error("Invalid RPC endpoint: {0}")]
    InvalidEndpoint(String),
}

impl RpcError {
    /// Failures that should slow the poll cadence down instead of being logged and dropped
    pub fn triggers_backoff(&self) -> bool {
        matches!(self, RpcError::RateLimited | RpcError::Timeout(_))
    }
}

/// Errors from establishing a session
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConnectError {
    #[error("Invalid endpoint: {0}")]
    InvalidEndpoint(String),

    #[error("Connection attempts exhausted after {attempts} tries: {last_error}")]
    Exhausted { attempts: u32, last_error: String },
}

/// Errors from durable storage (watermarks, feed, rewards, snapshots)
#[derive(Error, Debug)]
pub enum PersistenceError {
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Invalid stored value: {0}")]
    InvalidData(String),

    #[error("Storage lock poisoned")]
    Poisoned,
}

/// Errors from the points/reward ledger
#[derive(Error, Debug)]
pub enum LedgerError {
    #[error("Amount must be greater than zero")]
    InvalidAmount,

    #[error("Unknown wallet: {0}")]
    UnknownWallet(String),

    #[error("Insufficient points: available {available}, requested {requested}")]
    InsufficientPoints { available: u64, requested: u64 },

    #[error("Reward {0} not found")]
    RewardNotFound(i64),

    #[error("Reward {0} already claimed")]
    AlreadyClaimed(i64),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),
}

impl From<rusqlite::Error> for LedgerError {
    fn from(err: rusqlite::Error) -> Self {
        LedgerError::Persistence(PersistenceError::Database(err))
    }
}

/// Configuration errors, raised at startup
#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("Missing environment variable: {0}")]
    MissingVariable(String),

    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// Top-level error for tracker operations
#[derive(Error, Debug)]
pub enum TrackerError {
    #[error("Not connected to RPC endpoint")]
    NotConnected,

    #[error("No token is being tracked")]
    NotTracking,

    #[error("Tracking is already running for {0}")]
    AlreadyTracking(String),

    #[error("Invalid token address: {0}")]
    InvalidAddress(String),

    #[error(transparent)]
    Connect(#[from] ConnectError),

    #[error(transparent)]
    Rpc(#[from] RpcError),

    #[error(transparent)]
    Persistence(#[from] PersistenceError),

    #[error(transparent)]
    Ledger(#[from] LedgerError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("Poller task failed: {0}")]
    Task(String),
}

impl From<rusqlite::Error> for TrackerError {
    fn from(err: rusqlite::Error) -> Self {
        TrackerError::Persistence(PersistenceError::Database(err))
    }
}
