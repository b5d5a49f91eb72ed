//! Reward records and the points ledger
//!
//! A round produces at most one `RewardRecord`. Claiming it credits the
//! winner's points account; points can later be exchanged for tokens.

use crate::error::LedgerError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub type RewardId = i64;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RewardRecord {
    pub id: RewardId,
    pub round: String,
    pub winner: String,
    /// Points credited on claim
    pub amount: u64,
    pub winning_signature: String,
    pub created_at: DateTime<Utc>,
    pub claimed: bool,
    pub claim_tx_ref: Option<String>,
}

impl RewardRecord {
    pub fn is_pending(&self) -> bool {
        !self.claimed
    }
}

/// Insert payload for `RewardLedger::create_reward`
#[derive(Debug, Clone, PartialEq)]
pub struct NewReward {
    pub round: String,
    pub winner: String,
    pub amount: u64,
    pub winning_signature: String,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PointsBalance {
    pub wallet: String,
    pub points: u64,
    pub tokens: u64,
    /// `None` for wallets the ledger has never seen
    pub updated_at: Option<DateTime<Utc>>,
}

impl PointsBalance {
    pub fn empty(wallet: impl Into<String>) -> Self {
        Self {
            wallet: wallet.into(),
            points: 0,
            tokens: 0,
            updated_at: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeReceipt {
    pub wallet: String,
    pub points_spent: u64,
    pub tokens_granted: u64,
    pub previous_points: u64,
    pub remaining_points: u64,
    pub total_tokens: u64,
}

#[async_trait]
pub trait RewardLedger: Send + Sync {
    /// Create the reward for `reward.round`, or return the id of the existing one
    async fn create_reward(&self, reward: &NewReward) -> Result<RewardId, LedgerError>;

    /// All rewards, newest first
    async fn get_rewards(&self) -> Result<Vec<RewardRecord>, LedgerError>;

    async fn reward_for_round(&self, round: &str) -> Result<Option<RewardRecord>, LedgerError>;

    async fn rewards_for_wallet(&self, wallet: &str) -> Result<Vec<RewardRecord>, LedgerError>;

    /// Claimed (`true`) or pending (`false`) rewards, newest first
    async fn rewards_by_status(&self, claimed: bool) -> Result<Vec<RewardRecord>, LedgerError>;

    /// Mark claimed and credit the reward amount to the winner, atomically
    async fn claim_reward(&self, id: RewardId, claim_tx_ref: &str)
        -> Result<RewardRecord, LedgerError>;

    /// Returns the new point balance
    async fn credit_points(&self, wallet: &str, points: u64) -> Result<u64, LedgerError>;

    async fn balance(&self, wallet: &str) -> Result<PointsBalance, LedgerError>;

    /// Spend points for tokens; fails without side effects if the balance is short
    async fn exchange(
        &self,
        wallet: &str,
        points_spent: u64,
        tokens_granted: u64,
    ) -> Result<ExchangeReceipt, LedgerError>;
}
