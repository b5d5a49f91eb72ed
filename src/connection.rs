//! Connection manager
//!
//! Opens an RPC handle, verifies it with a `getVersion` call and retries with
//! linear backoff (`base * attempt`). Status transitions are published on a
//! watch channel so callers (CLI, UI bridges, tests) can observe
//! `connecting → connected | error`.

use crate::backoff::RetryBackoff;
use crate::config::RpcSettings;
use crate::error::{ConnectError, RpcError};
use crate::rpc::{bounded, LedgerRpc, RpcConnector, RpcVersion};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionStatus {
    Disconnected,
    Connecting { attempt: u32 },
    Connected { version: String },
    Error { message: String },
}

/// A verified, usable RPC handle
#[derive(Clone)]
pub struct Session {
    endpoint: String,
    rpc: Arc<dyn LedgerRpc>,
    version: RpcVersion,
}

impl Session {
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    pub fn rpc(&self) -> Arc<dyn LedgerRpc> {
        self.rpc.clone()
    }

    pub fn version(&self) -> &RpcVersion {
        &self.version
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("endpoint", &self.endpoint)
            .field("version", &self.version.solana_core)
            .finish()
    }
}

pub struct ConnectionManager {
    connector: Arc<dyn RpcConnector>,
    retry_base_delay: Duration,
    max_retries: u32,
    version_timeout: Duration,
    status_tx: watch::Sender<ConnectionStatus>,
}

impl ConnectionManager {
    pub fn new(connector: Arc<dyn RpcConnector>, settings: &RpcSettings) -> Self {
        let (status_tx, _) = watch::channel(ConnectionStatus::Disconnected);
        Self {
            connector,
            retry_base_delay: settings.retry_base_delay,
            max_retries: settings.max_retries,
            version_timeout: settings.request_timeout,
            status_tx,
        }
    }

    pub fn subscribe(&self) -> watch::Receiver<ConnectionStatus> {
        self.status_tx.subscribe()
    }

    pub fn status(&self) -> ConnectionStatus {
        self.status_tx.borrow().clone()
    }

    /// Connect and verify, retrying up to `max_retries` times
    ///
    /// Returns `ConnectError::Exhausted` once retries are used up; no further
    /// automatic attempts are made after that.
    pub async fn connect(&self, endpoint: &str) -> Result<Session, ConnectError> {
        let mut backoff = RetryBackoff::new(self.retry_base_delay, self.max_retries);

        log::info!("🔗 Connecting to RPC endpoint: {}", endpoint);

        loop {
            self.set_status(ConnectionStatus::Connecting {
                attempt: backoff.attempt() + 1,
            });

            let result = match self.connector.open(endpoint) {
                Err(RpcError::InvalidEndpoint(msg)) => {
                    self.set_status(ConnectionStatus::Error {
                        message: format!("Invalid endpoint: {}", msg),
                    });
                    return Err(ConnectError::InvalidEndpoint(msg));
                }
                Err(e) => Err(e),
                Ok(rpc) => bounded(self.version_timeout, rpc.get_version())
                    .await
                    .map(|version| (rpc, version)),
            };

            match result {
                Ok((rpc, version)) => {
                    backoff.reset();
                    log::info!("✅ Connected to RPC, solana-core {}", version.solana_core);
                    self.set_status(ConnectionStatus::Connected {
                        version: version.solana_core.clone(),
                    });
                    return Ok(Session {
                        endpoint: endpoint.to_string(),
                        rpc,
                        version,
                    });
                }
                Err(e) => {
                    log::error!("❌ Connection failed: {}", e);
                    self.set_status(ConnectionStatus::Error {
                        message: format!("Connection failed: {}", e),
                    });

                    if backoff.sleep().await.is_err() {
                        let attempts = backoff.attempt() + 1;
                        log::error!("❌ Giving up after {} connection attempts", attempts);
                        return Err(ConnectError::Exhausted {
                            attempts,
                            last_error: e.to_string(),
                        });
                    }
                }
            }
        }
    }

    pub fn mark_disconnected(&self) {
        self.set_status(ConnectionStatus::Disconnected);
    }

    fn set_status(&self, status: ConnectionStatus) {
        self.status_tx.send_replace(status);
    }
}
