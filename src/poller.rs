//! Incremental poller
//!
//! Each cycle lists the newest signatures for the tracked address, walks them
//! newest → oldest until the watermark, then processes that unseen subset
//! oldest → newest (fetch, extract, classify, append). The watermark moves to
//! the newest listed signature only after the whole subset went through.
//!
//! Rate limits and timeouts double the cadence (capped); any other failure
//! abandons the cycle with the watermark untouched. Cycles never overlap:
//! `run` owns the poller and awaits each cycle before scheduling the next.
//! Extra cycles can be requested through a `PollHandle`; they run on the
//! same loop.

use crate::backoff::Cadence;
use crate::classifier::classify;
use crate::config::{PollSettings, MAX_POLL_INTERVAL};
use crate::error::{PersistenceError, TrackerError};
use crate::extractor::extract_event;
use crate::rpc::{bounded, LedgerRpc, SignatureInfo};
use crate::store::{FeedStore, IngestOutcome, LargeTransactionNotice, SharedEventStore};
use crate::watermark::{Watermark, WatermarkStore};
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{sleep_until, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PollState {
    Idle,
    Polling,
    Backoff,
}

/// What one cycle did
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub fetched: usize,
    pub unseen: usize,
    pub appended: usize,
    pub large: usize,
    /// Already in the log, not indexed yet, or irrelevant to the mint
    pub skipped: usize,
    pub watermark_advanced: bool,
}

pub type CycleReply = oneshot::Sender<Result<CycleReport, TrackerError>>;

/// Requests an immediate cycle from a running poller
#[derive(Clone)]
pub struct PollHandle {
    requests: mpsc::Sender<CycleReply>,
}

impl PollHandle {
    /// Channel pair: the handle for callers, the receiver for `Poller::run`
    pub fn channel() -> (Self, mpsc::Receiver<CycleReply>) {
        let (requests, rx) = mpsc::channel(4);
        (Self { requests }, rx)
    }

    /// Run one cycle as soon as the current one (if any) finishes and wait for it
    pub async fn poll_now(&self) -> Result<CycleReport, TrackerError> {
        let (reply, result) = oneshot::channel();
        self.requests
            .send(reply)
            .await
            .map_err(|_| TrackerError::Task("poller is not running".to_string()))?;
        result
            .await
            .map_err(|_| TrackerError::Task("poller stopped before the cycle finished".to_string()))?
    }
}

/// Prefix of `signatures` (newest first) that lies above the watermark
///
/// If the watermark is not among them, everything is unseen.
pub fn unseen_since<'a>(signatures: &'a [SignatureInfo], watermark: Option<&str>) -> &'a [SignatureInfo] {
    let end = match watermark {
        Some(mark) => signatures
            .iter()
            .position(|info| info.signature == mark)
            .unwrap_or(signatures.len()),
        None => signatures.len(),
    };
    &signatures[..end]
}

pub struct Poller {
    rpc: Arc<dyn LedgerRpc>,
    token_address: String,
    events: SharedEventStore,
    watermarks: Arc<dyn WatermarkStore>,
    feed_store: Arc<dyn FeedStore>,
    cadence: Cadence,
    fetch_limit: usize,
    call_timeout: Duration,
    watermark: Option<Watermark>,
    /// Last signature known to be in the watermark store, used for compare-and-swap
    persisted: Option<String>,
    /// Large notices whose durable append failed; retried each cycle
    pending_feed: Vec<LargeTransactionNotice>,
    state: PollState,
}

impl Poller {
    pub fn new(
        rpc: Arc<dyn LedgerRpc>,
        token_address: impl Into<String>,
        events: SharedEventStore,
        watermarks: Arc<dyn WatermarkStore>,
        feed_store: Arc<dyn FeedStore>,
        settings: &PollSettings,
        call_timeout: Duration,
    ) -> Self {
        Self {
            rpc,
            token_address: token_address.into(),
            events,
            watermarks,
            feed_store,
            // Bounded so the run loop's deadline arithmetic cannot overflow
            cadence: Cadence::new(
                settings.interval.min(MAX_POLL_INTERVAL),
                settings.max_interval.min(MAX_POLL_INTERVAL),
            ),
            fetch_limit: settings.fetch_limit,
            call_timeout,
            watermark: None,
            persisted: None,
            pending_feed: Vec::new(),
            state: PollState::Idle,
        }
    }

    /// Resume from a stored watermark; one recorded for another token is dropped
    pub fn with_watermark(mut self, watermark: Option<Watermark>) -> Self {
        match watermark {
            Some(wm) if wm.applies_to(&self.token_address) => {
                log::info!("📍 Resuming {} from watermark {}", self.token_address, wm.signature);
                self.persisted = Some(wm.signature.clone());
                self.watermark = Some(wm);
            }
            Some(wm) => {
                log::warn!(
                    "Discarding watermark for {} while tracking {}",
                    wm.token_address,
                    self.token_address
                );
            }
            None => {}
        }
        self
    }

    pub fn token_address(&self) -> &str {
        &self.token_address
    }

    pub fn watermark(&self) -> Option<&Watermark> {
        self.watermark.as_ref()
    }

    pub fn state(&self) -> PollState {
        self.state
    }

    /// Delay until the next cycle
    pub fn current_interval(&self) -> Duration {
        self.cadence.current()
    }

    /// Run a single cycle
    pub async fn poll_once(&mut self) -> Result<CycleReport, TrackerError> {
        if self.token_address.is_empty() {
            return Ok(CycleReport::default());
        }

        self.state = PollState::Polling;
        let result = self.run_cycle().await;

        self.state = PollState::Idle;
        match &result {
            Ok(report) => {
                if report.appended > 0 {
                    log::info!(
                        "✅ Cycle for {}: {} new transactions ({} large)",
                        self.token_address,
                        report.appended,
                        report.large
                    );
                } else {
                    log::debug!("Cycle for {}: nothing new ({} fetched)", self.token_address, report.fetched);
                }
            }
            Err(TrackerError::Rpc(e)) if e.triggers_backoff() => {
                let next = self.cadence.back_off();
                self.state = PollState::Backoff;
                log::warn!("⏳ {}; polling every {:?}", e, next);
            }
            Err(TrackerError::Persistence(e)) => {
                log::error!("❌ Persistence failed, continuing in memory: {}", e);
            }
            Err(e) => {
                log::error!("❌ Cycle abandoned: {}", e);
            }
        }

        result
    }

    /// Large notices not yet in the durable feed
    pub fn pending_feed(&self) -> &[LargeTransactionNotice] {
        &self.pending_feed
    }

    async fn retry_pending_feed(&mut self) -> Option<PersistenceError> {
        while let Some(notice) = self.pending_feed.first() {
            if let Err(e) = self.feed_store.append(&self.token_address, notice).await {
                return Some(e);
            }
            self.pending_feed.remove(0);
        }
        None
    }

    async fn run_cycle(&mut self) -> Result<CycleReport, TrackerError> {
        let mut feed_error = self.retry_pending_feed().await;

        let signatures = bounded(
            self.call_timeout,
            self.rpc
                .get_signatures_for_address(&self.token_address, self.fetch_limit),
        )
        .await?;

        let mut report = CycleReport {
            fetched: signatures.len(),
            ..CycleReport::default()
        };
        let Some(newest) = signatures.first().map(|info| info.signature.clone()) else {
            return Ok(report);
        };

        let unseen = unseen_since(&signatures, self.watermark.as_ref().map(|wm| wm.signature.as_str()));
        report.unseen = unseen.len();

        for info in unseen.iter().rev() {
            if self.events.read().await.contains(&info.signature) {
                report.skipped += 1;
                continue;
            }

            let fetched = bounded(self.call_timeout, self.rpc.get_transaction(&info.signature)).await?;
            let Some(tx) = fetched else {
                log::debug!("Transaction {} not available, skipping", info.signature);
                report.skipped += 1;
                continue;
            };

            let Some(raw) = extract_event(&info.signature, &tx, &self.token_address, info.block_time) else {
                report.skipped += 1;
                continue;
            };

            let record = classify(raw, Utc::now());
            let outcome = self.events.write().await.ingest(record.clone());

            match outcome {
                IngestOutcome::Duplicate => report.skipped += 1,
                IngestOutcome::Appended { large } => {
                    report.appended += 1;
                    if large {
                        report.large += 1;
                        log::info!(
                            "🐋 Large {} of {} by {} ({})",
                            record.kind.as_str(),
                            record.ui_amount(),
                            record.trader,
                            record.signature
                        );
                        let notice = LargeTransactionNotice {
                            timestamp: record.observed_at,
                            transaction: record,
                        };
                        if let Err(e) = self.feed_store.append(&self.token_address, &notice).await {
                            feed_error.get_or_insert(e);
                            self.pending_feed.push(notice);
                        }
                    }
                }
            }
        }

        report.watermark_advanced = self.watermark.as_ref().map(|wm| wm.signature != newest).unwrap_or(true);
        self.commit_watermark(newest).await?;

        match feed_error {
            Some(e) => Err(e.into()),
            None => Ok(report),
        }
    }

    /// Advance the in-memory watermark, then persist it with compare-and-swap
    ///
    /// The in-memory value moves even when persistence fails.
    async fn commit_watermark(&mut self, signature: String) -> Result<(), PersistenceError> {
        let watermark = Watermark::new(self.token_address.clone(), signature);
        self.watermark = Some(watermark.clone());

        let swapped = self
            .watermarks
            .compare_and_swap(self.persisted.as_deref(), &watermark)
            .await?;

        if swapped {
            self.persisted = Some(watermark.signature);
        } else {
            // Someone else wrote in between; next cycle swaps against their value
            let stored = self.watermarks.load(&self.token_address).await?;
            log::warn!(
                "Watermark for {} changed concurrently (stored {:?}), will retry",
                self.token_address,
                stored.as_ref().map(|wm| wm.signature.as_str())
            );
            self.persisted = stored.map(|wm| wm.signature);
        }

        Ok(())
    }

    /// Retry pending feed appends, then write the watermark; both are attempted
    pub async fn flush(&mut self) -> Result<(), PersistenceError> {
        let feed = self.retry_pending_feed().await;
        let watermark = self.flush_watermark().await;
        match feed {
            Some(e) => Err(e),
            None => watermark,
        }
    }

    /// Unconditionally write the in-memory watermark
    pub async fn flush_watermark(&mut self) -> Result<(), PersistenceError> {
        if let Some(watermark) = &self.watermark {
            self.watermarks.save(watermark).await?;
            self.persisted = Some(watermark.signature.clone());
            log::debug!("Flushed watermark {} for {}", watermark.signature, self.token_address);
        }
        Ok(())
    }

    /// Poll until `shutdown` flips to true; the first cycle starts immediately
    ///
    /// Requests arriving on `requests` run a cycle right away and reset the
    /// schedule. Returns the poller so the caller can flush its watermark.
    pub async fn run(
        mut self,
        mut shutdown: watch::Receiver<bool>,
        mut requests: mpsc::Receiver<CycleReply>,
    ) -> Self {
        log::info!(
            "🚀 Polling {} every {:?} (limit {})",
            self.token_address,
            self.cadence.current(),
            self.fetch_limit
        );

        let mut next_at = Instant::now();

        loop {
            let reply = tokio::select! {
                _ = sleep_until(next_at) => None,
                Some(reply) = requests.recv() => Some(reply),
                _ = shutdown_requested(&mut shutdown) => break,
            };

            let started = Instant::now();
            let result = tokio::select! {
                result = self.poll_once() => result,
                _ = shutdown_requested(&mut shutdown) => break,
            };
            if let Some(reply) = reply {
                // Caller may have given up waiting
                let _ = reply.send(result);
            }

            // Ticks that fell inside a slow cycle are dropped, not queued
            let interval = self.cadence.current();
            next_at = started + interval;
            let now = Instant::now();
            while next_at <= now {
                next_at += interval;
            }
        }

        self.state = PollState::Idle;
        log::info!("🛑 Stopped polling {}", self.token_address);
        self
    }
}

/// Resolves once shutdown is requested or the sender is gone
async fn shutdown_requested(shutdown: &mut watch::Receiver<bool>) {
    loop {
        if *shutdown.borrow_and_update() {
            return;
        }
        if shutdown.changed().await.is_err() {
            return;
        }
    }
}
