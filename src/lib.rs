//! Round tracker
//!
//! Follows one token's on-chain transfers through a ledger RPC endpoint,
//! keeps a bounded, deduplicated log of classified trades and picks the
//! round winner once the countdown deadline has passed.
//!
//! Data flow: connection → poller → classifier/event store → winner engine →
//! reward ledger.

pub mod backoff;
pub mod classifier;
pub mod config;
pub mod connection;
pub mod error;
pub mod extractor;
pub mod poller;
pub mod reward;
pub mod rpc;
pub mod snapshot;
pub mod storage;
pub mod store;
pub mod tracker;
pub mod watermark;
pub mod winner;

pub use config::TrackerConfig;
pub use error::TrackerError;
pub use tracker::Tracker;
