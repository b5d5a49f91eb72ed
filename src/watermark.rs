//! Watermark: boundary between processed and unprocessed signatures
//!
//! Scoped to one token address. The poller owns the in-memory copy and writes
//! it through a `WatermarkStore` after each cycle that fetched at least one
//! signature.

use crate::error::PersistenceError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Watermark {
    pub token_address: String,
    pub signature: String,
    pub updated_at: DateTime<Utc>,
}

impl Watermark {
    pub fn new(token_address: impl Into<String>, signature: impl Into<String>) -> Self {
        Self {
            token_address: token_address.into(),
            signature: signature.into(),
            updated_at: Utc::now(),
        }
    }

    pub fn applies_to(&self, token_address: &str) -> bool {
        self.token_address == token_address
    }
}

/// Durable watermark storage keyed by token address
#[async_trait]
pub trait WatermarkStore: Send + Sync {
    async fn load(&self, token_address: &str) -> Result<Option<Watermark>, PersistenceError>;

    /// Unconditional write, used when flushing on stop
    async fn save(&self, watermark: &Watermark) -> Result<(), PersistenceError>;

    /// Write only if the stored signature still equals `expected`
    /// (`None` = no stored watermark). Returns whether the write happened.
    async fn compare_and_swap(
        &self,
        expected: Option<&str>,
        watermark: &Watermark,
    ) -> Result<bool, PersistenceError>;

    async fn clear(&self, token_address: &str) -> Result<(), PersistenceError>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_applies_to_own_token_only() {
        let wm = Watermark::new("TokenA", "sig1");
        assert!(wm.applies_to("TokenA"));
        assert!(!wm.applies_to("TokenB"));
    }
}
