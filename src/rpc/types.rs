//! Response shapes for the subset of Solana JSON-RPC the tracker consumes
//!
//! Only the fields that extraction and polling read are modelled; everything
//! else in the payload is ignored by serde.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// `getVersion` result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcVersion {
    #[serde(rename = "solana-core")]
    pub solana_core: String,
    #[serde(rename = "feature-set", default)]
    pub feature_set: Option<u64>,
}

/// One entry of `getSignaturesForAddress` (newest first)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SignatureInfo {
    pub signature: String,
    #[serde(default)]
    pub slot: u64,
    #[serde(rename = "blockTime", default)]
    pub block_time: Option<i64>,
    #[serde(default)]
    pub err: Option<Value>,
}

impl SignatureInfo {
    pub fn new(signature: impl Into<String>, block_time: Option<i64>) -> Self {
        Self {
            signature: signature.into(),
            slot: 0,
            block_time,
            err: None,
        }
    }
}

/// `getTransaction` result with `jsonParsed` encoding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LedgerTransaction {
    #[serde(default)]
    pub slot: u64,
    #[serde(rename = "blockTime", default)]
    pub block_time: Option<i64>,
    #[serde(default)]
    pub meta: Option<TransactionMeta>,
    pub transaction: EncodedTransaction,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionMeta {
    #[serde(default)]
    pub err: Option<Value>,
    #[serde(rename = "preTokenBalances", default)]
    pub pre_token_balances: Option<Vec<TokenBalance>>,
    #[serde(rename = "postTokenBalances", default)]
    pub post_token_balances: Option<Vec<TokenBalance>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenBalance {
    #[serde(rename = "accountIndex")]
    pub account_index: u32,
    pub mint: String,
    #[serde(default)]
    pub owner: Option<String>,
    #[serde(rename = "uiTokenAmount")]
    pub ui_token_amount: UiTokenAmount,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UiTokenAmount {
    pub amount: String,
    pub decimals: u8,
    #[serde(rename = "uiAmount", default)]
    pub ui_amount: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedTransaction {
    #[serde(default)]
    pub signatures: Vec<String>,
    pub message: EncodedMessage,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncodedMessage {
    #[serde(rename = "accountKeys")]
    pub account_keys: Vec<AccountKey>,
}

/// `json` encoding lists plain strings, `jsonParsed` lists objects
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AccountKey {
    Plain(String),
    Parsed {
        pubkey: String,
        #[serde(default)]
        signer: bool,
    },
}

impl AccountKey {
    pub fn pubkey(&self) -> &str {
        match self {
            AccountKey::Plain(key) => key,
            AccountKey::Parsed { pubkey, .. } => pubkey,
        }
    }
}

impl LedgerTransaction {
    /// First account key is always the fee payer
    pub fn fee_payer(&self) -> Option<&str> {
        self.transaction.message.account_keys.first().map(AccountKey::pubkey)
    }

    pub fn is_failed(&self) -> bool {
        self.meta
            .as_ref()
            .and_then(|meta| meta.err.as_ref())
            .map(|err| !err.is_null())
            .unwrap_or(false)
    }
}
