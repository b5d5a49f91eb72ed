//! JSON snapshot of the transaction log
//!
//! Written periodically by a background task and once more when tracking
//! stops. A snapshot only restores into the token it was taken for.

use crate::classifier::TransactionRecord;
use crate::error::PersistenceError;
use crate::store::SharedEventStore;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tokio::sync::watch;
use tokio::time::{interval, MissedTickBehavior};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogSnapshot {
    pub token_address: String,
    pub records: Vec<TransactionRecord>,
    pub saved_at: DateTime<Utc>,
}

pub struct SnapshotConfig {
    pub file_path: PathBuf,
    pub autosave_interval: Duration,
}

/// Save the log to a JSON file (write to temp file, then rename)
pub fn save_snapshot(
    token_address: &str,
    records: &[TransactionRecord],
    file_path: &Path,
) -> Result<(), PersistenceError> {
    let snapshot = LogSnapshot {
        token_address: token_address.to_string(),
        records: records.to_vec(),
        saved_at: Utc::now(),
    };

    let json = serde_json::to_string_pretty(&snapshot)?;
    let tmp_path = file_path.with_extension("json.tmp");
    fs::write(&tmp_path, json)?;
    fs::rename(&tmp_path, file_path)?;

    log::debug!("Saved {} transactions to {}", records.len(), file_path.display());
    Ok(())
}

/// Load the records saved for `token_address`; other tokens' snapshots are ignored
pub fn load_snapshot(
    token_address: &str,
    file_path: &Path,
) -> Result<Vec<TransactionRecord>, PersistenceError> {
    if !file_path.exists() {
        log::info!("No existing snapshot file found: {}", file_path.display());
        return Ok(Vec::new());
    }

    let json = fs::read_to_string(file_path)?;
    let snapshot: LogSnapshot = serde_json::from_str(&json)?;

    if snapshot.token_address != token_address {
        log::info!(
            "Snapshot {} belongs to {}, not {}; starting empty",
            file_path.display(),
            snapshot.token_address,
            token_address
        );
        return Ok(Vec::new());
    }

    log::info!("📂 Loaded {} transactions from {}", snapshot.records.len(), file_path.display());
    Ok(snapshot.records)
}

/// Periodically snapshot the log until `shutdown` flips to true
pub async fn autosave_task(
    events: SharedEventStore,
    token_address: String,
    config: SnapshotConfig,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut interval_timer = interval(config.autosave_interval);
    interval_timer.set_missed_tick_behavior(MissedTickBehavior::Skip);
    // First tick fires immediately; nothing worth saving yet
    interval_timer.tick().await;

    loop {
        tokio::select! {
            _ = interval_timer.tick() => {}
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    break;
                }
                continue;
            }
        }

        let records = events.read().await.recent_records();
        if let Err(e) = save_snapshot(&token_address, &records, &config.file_path) {
            log::warn!("Failed to save snapshot: {}", e);
        }
    }

    log::debug!("Snapshot task for {} stopped", token_address);
}
