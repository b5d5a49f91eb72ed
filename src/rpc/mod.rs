//! Ledger RPC boundary
//!
//! The tracker consumes three calls only: a version check, recent signatures
//! for an address, and a single transaction lookup. `LedgerRpc` is the seam the
//! poller and connection manager are written against; `HttpRpcClient` is the
//! production implementation.

pub mod client;
pub mod types;

pub use client::{HttpConnector, HttpRpcClient};
pub use types::{LedgerTransaction, RpcVersion, SignatureInfo};

use crate::error::RpcError;
use async_trait::async_trait;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

#[async_trait]
pub trait LedgerRpc: Send + Sync {
    /// Lightweight capability check
    async fn get_version(&self) -> Result<RpcVersion, RpcError>;

    /// Most recent signatures touching `address`, newest first
    async fn get_signatures_for_address(
        &self,
        address: &str,
        limit: usize,
    ) -> Result<Vec<SignatureInfo>, RpcError>;

    /// `Ok(None)` when the endpoint has not indexed the transaction (yet)
    async fn get_transaction(&self, signature: &str) -> Result<Option<LedgerTransaction>, RpcError>;
}

/// Builds an RPC handle for an endpoint
pub trait RpcConnector: Send + Sync {
    fn open(&self, endpoint: &str) -> Result<Arc<dyn LedgerRpc>, RpcError>;
}

/// Apply a hard upper bound to any RPC future
///
/// A timed-out call surfaces as `RpcError::Timeout`, which the poller treats
/// like a rate limit.
pub async fn bounded<T, F>(limit: Duration, call: F) -> Result<T, RpcError>
where
    F: Future<Output = Result<T, RpcError>>,
{
    match tokio::time::timeout(limit, call).await {
        Ok(result) => result,
        Err(_) => Err(RpcError::Timeout(limit)),
    }
}
