//! In-memory event store: bounded transaction log plus large-transaction feed
//!
//! Single writer (the poller), many readers (winner engine, snapshot task,
//! subscribers). Shared as `Arc<tokio::sync::RwLock<EventStore>>`; readers
//! clone what they need so they never observe a half-applied append.

use crate::classifier::{TradeKind, TransactionRecord};
use crate::config::StoreSettings;
use crate::error::PersistenceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::{HashSet, VecDeque};
use std::sync::Arc;
use tokio::sync::{broadcast, RwLock};

pub type SharedEventStore = Arc<RwLock<EventStore>>;

/// Entry of the large-transaction feed
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LargeTransactionNotice {
    pub transaction: TransactionRecord,
    pub timestamp: DateTime<Utc>,
}

/// Durable copy of the large-transaction feed, scoped by token address
#[async_trait]
pub trait FeedStore: Send + Sync {
    async fn append(
        &self,
        token_address: &str,
        notice: &LargeTransactionNotice,
    ) -> Result<(), PersistenceError>;

    /// Up to `limit` most recent notices, oldest first
    async fn load_recent(
        &self,
        token_address: &str,
        limit: usize,
    ) -> Result<Vec<LargeTransactionNotice>, PersistenceError>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IngestOutcome {
    Duplicate,
    Appended { large: bool },
}

/// FIFO log of classified records, unique by signature
#[derive(Debug)]
pub struct TransactionLog {
    records: VecDeque<TransactionRecord>,
    signatures: HashSet<String>,
    capacity: usize,
}

impl TransactionLog {
    pub fn new(capacity: usize) -> Self {
        Self {
            records: VecDeque::with_capacity(capacity + 1),
            signatures: HashSet::with_capacity(capacity + 1),
            capacity,
        }
    }

    pub fn contains(&self, signature: &str) -> bool {
        self.signatures.contains(signature)
    }

    /// Append; returns the evicted record when the cap is exceeded.
    /// Callers check `contains` first.
    fn push(&mut self, record: TransactionRecord) -> Option<TransactionRecord> {
        self.signatures.insert(record.signature.clone());
        self.records.push_back(record);

        if self.records.len() > self.capacity {
            let evicted = self.records.pop_front()?;
            self.signatures.remove(&evicted.signature);
            return Some(evicted);
        }
        None
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &TransactionRecord> {
        self.records.iter()
    }
}

/// Capped, time-ordered list of large transactions
#[derive(Debug)]
pub struct LargeTransactionFeed {
    entries: VecDeque<LargeTransactionNotice>,
    capacity: usize,
}

impl LargeTransactionFeed {
    pub fn new(capacity: usize) -> Self {
        Self {
            entries: VecDeque::with_capacity(capacity + 1),
            capacity,
        }
    }

    fn push(&mut self, notice: LargeTransactionNotice) {
        self.entries.push_back(notice);
        while self.entries.len() > self.capacity {
            self.entries.pop_front();
        }
    }

    pub fn contains(&self, signature: &str) -> bool {
        self.entries.iter().any(|n| n.transaction.signature == signature)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &LargeTransactionNotice> {
        self.entries.iter()
    }
}

pub struct EventStore {
    log: TransactionLog,
    feed: LargeTransactionFeed,
    large_tx_threshold: u64,
    notices: broadcast::Sender<LargeTransactionNotice>,
}

impl EventStore {
    pub fn new(settings: &StoreSettings) -> Self {
        let (notices, _) = broadcast::channel(settings.large_feed_cap.max(16));
        Self {
            log: TransactionLog::new(settings.max_transactions),
            feed: LargeTransactionFeed::new(settings.large_feed_cap),
            large_tx_threshold: settings.large_tx_threshold,
            notices,
        }
    }

    pub fn shared(settings: &StoreSettings) -> SharedEventStore {
        Arc::new(RwLock::new(Self::new(settings)))
    }

    pub fn is_large(&self, record: &TransactionRecord) -> bool {
        record.amount > self.large_tx_threshold
    }

    pub fn contains(&self, signature: &str) -> bool {
        self.log.contains(signature)
    }

    /// Append a classified record, surfacing it to the feed when large
    pub fn ingest(&mut self, record: TransactionRecord) -> IngestOutcome {
        if self.log.contains(&record.signature) {
            return IngestOutcome::Duplicate;
        }

        let large = self.is_large(&record) && !self.feed.contains(&record.signature);
        if large {
            let notice = LargeTransactionNotice {
                transaction: record.clone(),
                timestamp: record.observed_at,
            };
            self.feed.push(notice.clone());
            // No subscribers is fine
            let _ = self.notices.send(notice);
        }

        if let Some(evicted) = self.log.push(record) {
            log::debug!("Evicted oldest transaction {} (log cap {})", evicted.signature, self.log.capacity);
        }

        IngestOutcome::Appended { large }
    }

    /// Restore the log from a snapshot, oldest first; duplicates are skipped
    pub fn restore_log(&mut self, records: Vec<TransactionRecord>) -> usize {
        let mut restored = 0;
        for record in records {
            if !self.log.contains(&record.signature) {
                self.log.push(record);
                restored += 1;
            }
        }
        restored
    }

    /// Restore feed entries loaded from durable storage, oldest first
    pub fn restore_feed(&mut self, notices: Vec<LargeTransactionNotice>) -> usize {
        let mut restored = 0;
        for notice in notices {
            if !self.feed.contains(&notice.transaction.signature) {
                self.feed.push(notice);
                restored += 1;
            }
        }
        restored
    }

    pub fn clear(&mut self) {
        self.log = TransactionLog::new(self.log.capacity);
        self.feed = LargeTransactionFeed::new(self.feed.capacity);
    }

    pub fn subscribe(&self) -> broadcast::Receiver<LargeTransactionNotice> {
        self.notices.subscribe()
    }

    pub fn log(&self) -> &TransactionLog {
        &self.log
    }

    pub fn feed(&self) -> &LargeTransactionFeed {
        &self.feed
    }

    pub fn recent_records(&self) -> Vec<TransactionRecord> {
        self.log.iter().cloned().collect()
    }

    pub fn large_transactions(&self) -> Vec<TransactionRecord> {
        self.feed.iter().map(|n| n.transaction.clone()).collect()
    }

    /// Confirmed buys at or before `deadline`, ordered by occurrence
    pub fn records_before(&self, deadline: DateTime<Utc>) -> Vec<TransactionRecord> {
        let mut records: Vec<TransactionRecord> = self
            .log
            .iter()
            .filter(|r| r.kind == TradeKind::Buy)
            .filter(|r| r.occurred_at.map(|t| t <= deadline).unwrap_or(false))
            .cloned()
            .collect();
        records.sort_by(|a, b| a.occurred_at.cmp(&b.occurred_at));
        records
    }
}
