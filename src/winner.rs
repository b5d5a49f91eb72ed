//! Winner determination
//!
//! Once a round's deadline has passed, the largest confirmed buy in the
//! large-transaction feed at or before the deadline wins. Ties go to the
//! earliest occurrence, then to the lexicographically smallest signature.
//! The reward is written through the ledger exactly once per round.

use crate::classifier::{TradeKind, TransactionRecord};
use crate::error::TrackerError;
use crate::reward::{NewReward, RewardLedger, RewardRecord};
use crate::store::SharedEventStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::sync::Arc;
use std::time::Duration;

/// Round deadline supplied by the countdown source
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CountdownDeadline {
    #[serde(rename = "targetTime")]
    pub target_time: DateTime<Utc>,
}

impl CountdownDeadline {
    pub fn new(target_time: DateTime<Utc>) -> Self {
        Self { target_time }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.target_time
    }

    pub fn remaining(&self, now: DateTime<Utc>) -> Duration {
        (self.target_time - now).to_std().unwrap_or_default()
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum WinnerOutcome {
    /// Deadline still ahead
    NotReady { remaining: Duration },
    /// No eligible buy; the round pays nothing
    NoWinner,
    /// The round was decided earlier
    AlreadyAwarded(RewardRecord),
    Winner {
        record: TransactionRecord,
        reward: RewardRecord,
    },
}

fn is_eligible(record: &TransactionRecord, deadline: DateTime<Utc>) -> bool {
    record.kind == TradeKind::Buy && record.occurred_at.map(|t| t <= deadline).unwrap_or(false)
}

/// Winner ordering: larger amount first, then earlier, then smaller signature
fn rank_order(a: &TransactionRecord, b: &TransactionRecord) -> Ordering {
    b.amount
        .cmp(&a.amount)
        .then_with(|| a.occurred_at.cmp(&b.occurred_at))
        .then_with(|| a.signature.cmp(&b.signature))
}

/// Eligible records in winning order
pub fn rank_candidates(records: &[TransactionRecord], deadline: DateTime<Utc>) -> Vec<TransactionRecord> {
    let mut eligible: Vec<TransactionRecord> = records
        .iter()
        .filter(|r| is_eligible(r, deadline))
        .cloned()
        .collect();
    eligible.sort_by(rank_order);
    eligible
}

/// Pure selection over a set of records
pub fn select_winner(records: &[TransactionRecord], deadline: DateTime<Utc>) -> Option<TransactionRecord> {
    records
        .iter()
        .filter(|r| is_eligible(r, deadline))
        .min_by(|a, b| rank_order(a, b))
        .cloned()
}

pub struct WinnerEngine {
    events: SharedEventStore,
    ledger: Arc<dyn RewardLedger>,
    round_payout: u64,
}

impl WinnerEngine {
    pub fn new(events: SharedEventStore, ledger: Arc<dyn RewardLedger>, round_payout: u64) -> Self {
        Self {
            events,
            ledger,
            round_payout,
        }
    }

    /// Ranked eligible candidates from the current feed
    pub async fn rank_candidates(&self, deadline: &CountdownDeadline) -> Vec<TransactionRecord> {
        let feed = self.events.read().await.large_transactions();
        rank_candidates(&feed, deadline.target_time)
    }

    pub async fn determine_winner(
        &self,
        round: &str,
        deadline: &CountdownDeadline,
        now: DateTime<Utc>,
    ) -> Result<WinnerOutcome, TrackerError> {
        if !deadline.is_expired(now) {
            return Ok(WinnerOutcome::NotReady {
                remaining: deadline.remaining(now),
            });
        }

        if let Some(existing) = self.ledger.reward_for_round(round).await? {
            log::debug!("Round {} already awarded to {}", round, existing.winner);
            return Ok(WinnerOutcome::AlreadyAwarded(existing));
        }

        let feed = self.events.read().await.large_transactions();
        let Some(record) = select_winner(&feed, deadline.target_time) else {
            log::info!("🏁 Round {} closed with no eligible buy", round);
            return Ok(WinnerOutcome::NoWinner);
        };

        let new_reward = NewReward {
            round: round.to_string(),
            winner: record.trader.clone(),
            amount: self.round_payout,
            winning_signature: record.signature.clone(),
        };
        self.ledger.create_reward(&new_reward).await?;

        let reward = self
            .ledger
            .reward_for_round(round)
            .await?
            .ok_or_else(|| TrackerError::Task(format!("reward for round {} vanished after insert", round)))?;

        // Lost a race with another writer for the same round
        if reward.winning_signature != record.signature {
            return Ok(WinnerOutcome::AlreadyAwarded(reward));
        }

        log::info!(
            "🏆 Round {} winner: {} with {} ({})",
            round,
            record.trader,
            record.ui_amount(),
            record.signature
        );
        Ok(WinnerOutcome::Winner { record, reward })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StoreSettings;
    use crate::storage::{open_in_memory, SqliteRewardLedger};
    use crate::store::EventStore;
    use chrono::TimeZone;

    fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(secs, 0).unwrap()
    }

    fn record(sig: &str, kind: TradeKind, amount: u64, occurred: Option<i64>) -> TransactionRecord {
        TransactionRecord {
            signature: sig.to_string(),
            trader: format!("trader_{}", sig),
            amount,
            decimals: 6,
            kind,
            occurred_at: occurred.map(at),
            observed_at: at(0),
        }
    }

    #[test]
    fn test_largest_buy_before_deadline_wins() {
        let records = vec![
            record("A", TradeKind::Buy, 5, Some(100)),
            record("B", TradeKind::Buy, 7, Some(200)),
            record("C", TradeKind::Buy, 9, Some(300)),
            record("D", TradeKind::Buy, 100, Some(301)),
            record("E", TradeKind::Sell, 50, Some(150)),
        ];
        let winner = select_winner(&records, at(300)).unwrap();
        assert_eq!(winner.signature, "C");

        let ranked: Vec<_> = rank_candidates(&records, at(300))
            .into_iter()
            .map(|r| r.signature)
            .collect();
        assert_eq!(ranked, vec!["C", "B", "A"]);
    }

    #[test]
    fn test_ties_go_to_earliest_then_signature() {
        let records = vec![
            record("late", TradeKind::Buy, 10, Some(200)),
            record("zzz", TradeKind::Buy, 10, Some(100)),
            record("aaa", TradeKind::Buy, 10, Some(100)),
        ];
        assert_eq!(select_winner(&records, at(500)).unwrap().signature, "aaa");
    }

    #[test]
    fn test_nothing_eligible() {
        let records = vec![
            record("future", TradeKind::Buy, 10, Some(1_000)),
            record("pending", TradeKind::Buy, 10, None),
            record("other", TradeKind::Other, 10, Some(1)),
        ];
        assert!(select_winner(&records, at(500)).is_none());
        assert!(rank_candidates(&records, at(500)).is_empty());
    }

    #[test]
    fn test_deadline_expiry() {
        let deadline = CountdownDeadline::new(at(100));
        assert!(!deadline.is_expired(at(99)));
        assert!(deadline.is_expired(at(100)));
        assert_eq!(deadline.remaining(at(40)), Duration::from_secs(60));
        assert_eq!(deadline.remaining(at(140)), Duration::ZERO);
    }

    #[tokio::test]
    async fn test_engine_awards_once_per_round() {
        let events = EventStore::shared(&StoreSettings {
            max_transactions: 100,
            large_tx_threshold: 1,
            large_feed_cap: 10,
        });
        {
            let mut store = events.write().await;
            store.ingest(record("A", TradeKind::Buy, 5, Some(100)));
            store.ingest(record("B", TradeKind::Buy, 7, Some(200)));
            store.ingest(record("C", TradeKind::Buy, 9, Some(300)));
        }

        let ledger = Arc::new(SqliteRewardLedger::new(open_in_memory().unwrap()));
        let engine = WinnerEngine::new(events.clone(), ledger.clone(), 100_000);
        let deadline = CountdownDeadline::new(at(300));

        let early = engine.determine_winner("round-1", &deadline, at(299)).await.unwrap();
        assert_eq!(
            early,
            WinnerOutcome::NotReady {
                remaining: Duration::from_secs(1)
            }
        );

        match engine.determine_winner("round-1", &deadline, at(301)).await.unwrap() {
            WinnerOutcome::Winner { record, reward } => {
                assert_eq!(record.signature, "C");
                assert_eq!(reward.winner, "trader_C");
                assert_eq!(reward.amount, 100_000);
                assert!(!reward.claimed);
            }
            other => panic!("expected winner, got {:?}", other),
        }

        // A bigger buy arriving later does not change a decided round
        events.write().await.ingest(record("Z", TradeKind::Buy, 99, Some(250)));
        assert!(matches!(
            engine.determine_winner("round-1", &deadline, at(400)).await.unwrap(),
            WinnerOutcome::AlreadyAwarded(r) if r.winner == "trader_C"
        ));
        assert_eq!(ledger.get_rewards().await.unwrap().len(), 1);

        let empty_deadline = CountdownDeadline::new(at(50));
        assert_eq!(
            engine.determine_winner("round-0", &empty_deadline, at(400)).await.unwrap(),
            WinnerOutcome::NoWinner
        );
    }
}
