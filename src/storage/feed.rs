use super::{lock, parse_timestamp, to_sql_int, SharedConnection};
use crate::error::PersistenceError;
use crate::store::{FeedStore, LargeTransactionNotice};
use async_trait::async_trait;
use rusqlite::params;

/// SQLite-backed large-transaction feed, trimmed to `capacity` rows per token
pub struct SqliteFeedStore {
    conn: SharedConnection,
    capacity: usize,
}

impl SqliteFeedStore {
    pub fn new(conn: SharedConnection, capacity: usize) -> Self {
        Self { conn, capacity }
    }
}

#[async_trait]
impl FeedStore for SqliteFeedStore {
    async fn append(
        &self,
        token_address: &str,
        notice: &LargeTransactionNotice,
    ) -> Result<(), PersistenceError> {
        let record_json = serde_json::to_string(&notice.transaction)?;
        let capacity = to_sql_int(self.capacity as u64)?;

        let mut conn = lock(&self.conn)?;
        let tx = conn.transaction()?;

        tx.execute(
            "INSERT INTO large_transactions (token_address, signature, record_json, noticed_at)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(token_address, signature) DO NOTHING",
            params![
                token_address,
                notice.transaction.signature,
                record_json,
                notice.timestamp.to_rfc3339()
            ],
        )?;

        tx.execute(
            "DELETE FROM large_transactions
             WHERE token_address = ?1 AND id NOT IN (
                SELECT id FROM large_transactions
                WHERE token_address = ?1
                ORDER BY id DESC
                LIMIT ?2
             )",
            params![token_address, capacity],
        )?;

        tx.commit()?;
        Ok(())
    }

    async fn load_recent(
        &self,
        token_address: &str,
        limit: usize,
    ) -> Result<Vec<LargeTransactionNotice>, PersistenceError> {
        let limit = to_sql_int(limit as u64)?;
        let conn = lock(&self.conn)?;

        let mut stmt = conn.prepare(
            "SELECT record_json, noticed_at FROM large_transactions
             WHERE token_address = ?1
             ORDER BY id DESC
             LIMIT ?2",
        )?;

        let rows = stmt
            .query_map(params![token_address, limit], |row| {
                Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
            })?
            .collect::<Result<Vec<_>, _>>()?;

        let mut notices = Vec::with_capacity(rows.len());
        for (record_json, noticed_at) in rows.into_iter().rev() {
            notices.push(LargeTransactionNotice {
                transaction: serde_json::from_str(&record_json)?,
                timestamp: parse_timestamp(&noticed_at)?,
            });
        }

        Ok(notices)
    }
}
