//! Event classification
//!
//! Raw events (already reduced to trader / amount / operation by the
//! extractor) become immutable `TransactionRecord`s.

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

/// Trade direction for type-safe handling
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TradeKind {
    Buy,
    Sell,
    Other,
}

impl TradeKind {
    /// Case-insensitive match on the operation type; anything unknown is `Other`
    pub fn from_operation(operation: &str) -> Self {
        match operation.trim().to_lowercase().as_str() {
            "buy" => TradeKind::Buy,
            "sell" => TradeKind::Sell,
            _ => TradeKind::Other,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TradeKind::Buy => "buy",
            TradeKind::Sell => "sell",
            TradeKind::Other => "other",
        }
    }
}

/// Unclassified event as produced by the extractor
#[derive(Debug, Clone, PartialEq)]
pub struct RawEvent {
    pub signature: String,
    pub trader: String,
    pub amount: u64,
    pub decimals: u8,
    pub operation: String,
    /// Ledger block time in unix seconds, `None` if not yet indexed
    pub block_time: Option<i64>,
}

/// One classified on-chain event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub signature: String,
    pub trader: String,
    /// Token base units
    pub amount: u64,
    pub decimals: u8,
    pub kind: TradeKind,
    /// `None` means unconfirmed; such records never take part in selection
    pub occurred_at: Option<DateTime<Utc>>,
    pub observed_at: DateTime<Utc>,
}

impl TransactionRecord {
    pub fn is_confirmed(&self) -> bool {
        self.occurred_at.is_some()
    }

    pub fn ui_amount(&self) -> f64 {
        self.amount as f64 / 10f64.powi(self.decimals as i32)
    }
}

pub fn classify(raw: RawEvent, observed_at: DateTime<Utc>) -> TransactionRecord {
    let occurred_at = raw
        .block_time
        .and_then(|secs| Utc.timestamp_opt(secs, 0).single());

    TransactionRecord {
        kind: TradeKind::from_operation(&raw.operation),
        signature: raw.signature,
        trader: raw.trader,
        amount: raw.amount,
        decimals: raw.decimals,
        occurred_at,
        observed_at,
    }
}
