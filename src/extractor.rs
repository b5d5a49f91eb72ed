//! Raw event extraction from fetched ledger transactions
//!
//! Computes token balance deltas for the tracked mint (post - pre, per owner)
//! and reduces them to a single `RawEvent`:
//! - fee payer gained tokens → `buy`
//! - fee payer lost tokens → `sell`
//! - fee payer untouched → `transfer`, attributed to the largest receiver
//!
//! Transactions that failed on-chain or never touch the mint yield `None`.

use crate::classifier::RawEvent;
use crate::rpc::types::{LedgerTransaction, TokenBalance, TransactionMeta};
use std::collections::BTreeMap;

/// Net balance change of one owner for one mint
#[derive(Debug, Clone, PartialEq)]
pub struct TokenDelta {
    pub owner: String,
    pub raw_change: i128,
    pub decimals: u8,
}

impl TokenDelta {
    pub fn is_inflow(&self) -> bool {
        self.raw_change > 0
    }

    pub fn is_outflow(&self) -> bool {
        self.raw_change < 0
    }

    pub fn abs_amount(&self) -> u64 {
        u64::try_from(self.raw_change.unsigned_abs()).unwrap_or(u64::MAX)
    }
}

fn raw_amount(balance: &TokenBalance) -> i128 {
    balance.ui_token_amount.amount.parse::<u64>().unwrap_or(0) as i128
}

/// Per-owner token deltas for `mint`, ordered by owner address
pub fn extract_mint_deltas(meta: &TransactionMeta, mint: &str) -> Vec<TokenDelta> {
    let empty = Vec::new();
    let pre_balances = meta.pre_token_balances.as_ref().unwrap_or(&empty);
    let post_balances = meta.post_token_balances.as_ref().unwrap_or(&empty);

    let mut by_owner: BTreeMap<String, (i128, u8)> = BTreeMap::new();

    for pre in pre_balances.iter().filter(|b| b.mint == mint) {
        let post_raw = post_balances
            .iter()
            .find(|p| p.account_index == pre.account_index)
            .map(raw_amount)
            .unwrap_or(0);

        let Some(owner) = pre.owner.clone() else {
            continue;
        };
        let entry = by_owner.entry(owner).or_insert((0, pre.ui_token_amount.decimals));
        entry.0 += post_raw - raw_amount(pre);
    }

    // Accounts created by this transaction only show up in post balances
    for post in post_balances.iter().filter(|b| b.mint == mint) {
        let exists_in_pre = pre_balances
            .iter()
            .any(|pre| pre.account_index == post.account_index);
        if exists_in_pre {
            continue;
        }

        let Some(owner) = post.owner.clone() else {
            continue;
        };
        let entry = by_owner.entry(owner).or_insert((0, post.ui_token_amount.decimals));
        entry.0 += raw_amount(post);
    }

    by_owner
        .into_iter()
        .filter(|(_, (change, _))| *change != 0)
        .map(|(owner, (raw_change, decimals))| TokenDelta {
            owner,
            raw_change,
            decimals,
        })
        .collect()
}

/// Reduce a fetched transaction to a raw event for `mint`
///
/// `fallback_block_time` comes from the signature listing and is used when the
/// transaction payload lacks `blockTime`.
pub fn extract_event(
    signature: &str,
    tx: &LedgerTransaction,
    mint: &str,
    fallback_block_time: Option<i64>,
) -> Option<RawEvent> {
    if tx.is_failed() {
        log::debug!("Skipping failed transaction {}", signature);
        return None;
    }

    let meta = tx.meta.as_ref()?;
    let deltas = extract_mint_deltas(meta, mint);
    if deltas.is_empty() {
        log::debug!("No balance change for tracked mint in {}", signature);
        return None;
    }

    let fee_payer = tx.fee_payer();
    let payer_delta = fee_payer.and_then(|payer| deltas.iter().find(|d| d.owner == payer));

    let (delta, operation) = match payer_delta {
        Some(d) if d.is_inflow() => (d, "buy"),
        Some(d) => (d, "sell"),
        None => {
            // Largest receiver wins; fall back to the largest mover
            let receiver = deltas
                .iter()
                .filter(|d| d.is_inflow())
                .max_by_key(|d| d.raw_change)
                .or_else(|| deltas.iter().max_by_key(|d| d.raw_change.unsigned_abs()))?;
            (receiver, "transfer")
        }
    };

    Some(RawEvent {
        signature: signature.to_string(),
        trader: delta.owner.clone(),
        amount: delta.abs_amount(),
        decimals: delta.decimals,
        operation: operation.to_string(),
        block_time: tx.block_time.or(fallback_block_time),
    })
}
