//! Tracker facade
//!
//! Wires the connection manager, poller, event store, snapshot task and
//! winner engine together. One tracker follows one token at a time; all
//! collaborators that touch the outside world are injected.

use crate::config::{validate_token_address, TrackerConfig};
use crate::connection::{ConnectionManager, ConnectionStatus, Session};
use crate::error::TrackerError;
use crate::poller::{CycleReport, PollHandle, Poller};
use crate::reward::RewardLedger;
use crate::rpc::RpcConnector;
use crate::snapshot::{autosave_task, load_snapshot, save_snapshot, SnapshotConfig};
use crate::store::{EventStore, FeedStore, LargeTransactionNotice, SharedEventStore};
use crate::watermark::{Watermark, WatermarkStore};
use crate::winner::{CountdownDeadline, WinnerEngine, WinnerOutcome};
use std::path::PathBuf;
use chrono::Utc;
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;

struct ActiveTracking {
    token_address: String,
    shutdown: watch::Sender<bool>,
    poller: JoinHandle<Poller>,
    poll: PollHandle,
    autosave: JoinHandle<()>,
}

pub struct Tracker {
    config: TrackerConfig,
    connections: ConnectionManager,
    session: Option<Session>,
    watermarks: Arc<dyn WatermarkStore>,
    feed_store: Arc<dyn FeedStore>,
    ledger: Arc<dyn RewardLedger>,
    events: SharedEventStore,
    active: Option<ActiveTracking>,
}

impl Tracker {
    pub fn new(
        config: TrackerConfig,
        connector: Arc<dyn RpcConnector>,
        watermarks: Arc<dyn WatermarkStore>,
        feed_store: Arc<dyn FeedStore>,
        ledger: Arc<dyn RewardLedger>,
    ) -> Self {
        let connections = ConnectionManager::new(connector, &config.rpc);
        let events = EventStore::shared(&config.store);
        Self {
            config,
            connections,
            session: None,
            watermarks,
            feed_store,
            ledger,
            events,
            active: None,
        }
    }

    /// Connect to the configured endpoint; may be called again after `Exhausted`
    pub async fn connect(&mut self) -> Result<(), TrackerError> {
        let session = self.connections.connect(&self.config.rpc.endpoint).await?;
        self.session = Some(session);
        Ok(())
    }

    pub fn is_connected(&self) -> bool {
        self.session.is_some()
    }

    pub fn connection_status(&self) -> ConnectionStatus {
        self.connections.status()
    }

    pub fn subscribe_status(&self) -> watch::Receiver<ConnectionStatus> {
        self.connections.subscribe()
    }

    pub fn tracked_token(&self) -> Option<&str> {
        self.active.as_ref().map(|a| a.token_address.as_str())
    }

    pub fn events(&self) -> SharedEventStore {
        self.events.clone()
    }

    pub async fn subscribe_large_transactions(&self) -> broadcast::Receiver<LargeTransactionNotice> {
        self.events.read().await.subscribe()
    }

    pub fn ledger(&self) -> Arc<dyn RewardLedger> {
        self.ledger.clone()
    }

    pub fn winner_engine(&self) -> WinnerEngine {
        WinnerEngine::new(self.events.clone(), self.ledger.clone(), self.config.round_payout)
    }

    /// Handle for requesting cycles from the running poller
    pub fn poll_handle(&self) -> Option<PollHandle> {
        self.active.as_ref().map(|a| a.poll.clone())
    }

    /// Run a cycle now and wait for its result
    pub async fn poll_now(&self) -> Result<CycleReport, TrackerError> {
        let active = self.active.as_ref().ok_or(TrackerError::NotTracking)?;
        active.poll.poll_now().await
    }

    /// Stored watermark for `token_address`, if any
    pub async fn stored_watermark(&self, token_address: &str) -> Result<Option<Watermark>, TrackerError> {
        Ok(self.watermarks.load(token_address).await?)
    }

    /// Start polling `token_address`, resuming from its stored watermark
    pub async fn start_tracking(&mut self, token_address: &str) -> Result<(), TrackerError> {
        if let Some(active) = &self.active {
            return Err(TrackerError::AlreadyTracking(active.token_address.clone()));
        }

        let token_address = token_address.trim().to_string();
        validate_token_address(&token_address)
            .map_err(|_| TrackerError::InvalidAddress(token_address.clone()))?;

        let session = self.session.as_ref().ok_or(TrackerError::NotConnected)?;
        let stored = self.watermarks.load(&token_address).await?;

        self.restore_events(&token_address).await;

        let poller = Poller::new(
            session.rpc(),
            token_address.clone(),
            self.events.clone(),
            self.watermarks.clone(),
            self.feed_store.clone(),
            &self.config.poll,
            self.config.rpc.request_timeout,
        )
        .with_watermark(stored);

        let (shutdown, shutdown_rx) = watch::channel(false);
        let (poll, requests) = PollHandle::channel();
        let poller = tokio::spawn(poller.run(shutdown_rx.clone(), requests));
        let autosave = tokio::spawn(autosave_task(
            self.events.clone(),
            token_address.clone(),
            SnapshotConfig {
                file_path: PathBuf::from(&self.config.snapshot_path),
                autosave_interval: self.config.snapshot_interval,
            },
            shutdown_rx,
        ));

        log::info!("👀 Tracking {}", token_address);
        self.active = Some(ActiveTracking {
            token_address,
            shutdown,
            poller,
            poll,
            autosave,
        });
        Ok(())
    }

    /// Halt polling, then flush the watermark and the log snapshot
    ///
    /// The snapshot is written even when the watermark flush fails; the first
    /// error is returned afterwards. A no-op when nothing is tracked.
    pub async fn stop_tracking(&mut self) -> Result<(), TrackerError> {
        let Some(active) = self.active.take() else {
            return Ok(());
        };

        // Receivers may already be gone if both tasks ended
        let _ = active.shutdown.send(true);

        let mut poller = active
            .poller
            .await
            .map_err(|e| TrackerError::Task(e.to_string()))?;

        if let Err(e) = active.autosave.await {
            log::warn!("Snapshot task ended abnormally: {}", e);
        }

        let flushed = poller.flush().await;
        if let Err(e) = &flushed {
            log::error!("❌ Could not flush state for {}: {}", active.token_address, e);
        }

        let records = self.events.read().await.recent_records();
        let saved = save_snapshot(
            &active.token_address,
            &records,
            &PathBuf::from(&self.config.snapshot_path),
        );
        flushed?;
        saved?;

        log::info!(
            "💾 Stopped tracking {} ({} transactions saved)",
            active.token_address,
            records.len()
        );
        Ok(())
    }

    /// Move tracking to another token
    ///
    /// The previous token's watermark is deleted and the in-memory log and feed
    /// are cleared before the first poll of the new token.
    pub async fn switch_token(&mut self, token_address: &str) -> Result<(), TrackerError> {
        let token_address = token_address.trim();
        validate_token_address(token_address)
            .map_err(|_| TrackerError::InvalidAddress(token_address.to_string()))?;

        let previous = self.tracked_token().map(str::to_string);
        if previous.as_deref() == Some(token_address) {
            return Ok(());
        }

        self.stop_tracking().await?;

        if let Some(previous) = previous {
            self.watermarks.clear(&previous).await?;
            log::info!("🔄 Switching {} → {}", previous, token_address);
        }
        self.events.write().await.clear();

        self.start_tracking(token_address).await
    }

    /// Reload log and feed for a token; failures leave the store empty
    async fn restore_events(&self, token_address: &str) {
        let records = match load_snapshot(token_address, &PathBuf::from(&self.config.snapshot_path)) {
            Ok(records) => records,
            Err(e) => {
                log::warn!("Ignoring unreadable snapshot: {}", e);
                Vec::new()
            }
        };

        let notices = match self
            .feed_store
            .load_recent(token_address, self.config.store.large_feed_cap)
            .await
        {
            Ok(notices) => notices,
            Err(e) => {
                log::warn!("Could not load large-transaction feed: {}", e);
                Vec::new()
            }
        };

        let mut events = self.events.write().await;
        events.clear();
        let restored_log = events.restore_log(records);
        let restored_feed = events.restore_feed(notices);

        if restored_log > 0 || restored_feed > 0 {
            log::info!(
                "📂 Restored {} transactions and {} large notices for {}",
                restored_log,
                restored_feed,
                token_address
            );
        }
    }
}

/// Wait for the deadline, poll once more, then determine the winner
///
/// The final cycle picks up buys confirmed just before the deadline that the
/// regular schedule has not reached yet. If it fails, no winner is decided so
/// the round can be closed again later.
pub async fn close_round(
    poll: &PollHandle,
    engine: &WinnerEngine,
    round_id: &str,
    deadline: &CountdownDeadline,
) -> Result<WinnerOutcome, TrackerError> {
    tokio::time::sleep(deadline.remaining(Utc::now())).await;

    let report = poll.poll_now().await?;
    log::info!(
        "🏁 Closing round {} after a final cycle ({} new transactions)",
        round_id,
        report.appended
    );

    let now = Utc::now().max(deadline.target_time);
    engine.determine_winner(round_id, deadline, now).await
}
